use crate::core::{DEFAULT_MODEL, MODELS};

pub fn run() {
    for model in MODELS {
        let marker = if model.id == DEFAULT_MODEL { "*" } else { " " };
        println!("{} {:<20} {:<12} {}", marker, model.id, model.name, model.description);
    }
}
