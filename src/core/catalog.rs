//! Fixed catalog of models that can be selected for a session.

pub const DEFAULT_MODEL: &str = "llama3-8b-8192";

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ModelInfo {
    pub id: &'static str,
    pub name: &'static str,
    pub description: &'static str,
}

pub const MODELS: &[ModelInfo] = &[
    ModelInfo {
        id: "llama3-8b-8192",
        name: "Llama 3 8B",
        description: "Meta's Llama 3 8B model - balanced performance",
    },
    ModelInfo {
        id: "llama3-70b-8192",
        name: "Llama 3 70B",
        description: "Meta's largest Llama 3 model - best quality",
    },
    ModelInfo {
        id: "mixtral-8x7b-32768",
        name: "Mixtral 8x7B",
        description: "Mistral's mixture of experts model",
    },
    ModelInfo {
        id: "gemma-7b-it",
        name: "Gemma 7B",
        description: "Google's Gemma instruction-tuned model",
    },
];

pub fn find_model(id: &str) -> Option<&'static ModelInfo> {
    MODELS.iter().find(|m| m.id == id)
}
