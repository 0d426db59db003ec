pub mod catalog;
pub mod config;
pub mod error;

pub use catalog::{DEFAULT_MODEL, MODELS, ModelInfo, find_model};
pub use config::AppConfig;
pub use error::ChatError;
