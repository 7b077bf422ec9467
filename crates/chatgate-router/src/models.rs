use std::collections::HashMap;

use tracing::warn;

use chatgate_protocol::openai::list_models::response::{
    ListModelsResponse, ListObjectType, Model, ModelObjectType,
};

/// Requested name -> upstream model id.
const MODEL_ALIASES: &[(&str, &str)] = &[
    ("qwen-max-latest", "qwen-max-latest"),
    ("qwen-max", "qwen-max-latest"),
    ("qwen2.5-coder-32b-instruct", "qwen2.5-coder-32b-instruct"),
    ("qwen2.5-coder-14b-instruct", "qwen2.5-14b-instruct-1m"),
    ("qwen2.5-coder-7b-instruct", "qwen2.5-omni-7b"),
    ("qwen2.5-coder-3b-instruct", "qwen3-32b"),
    ("qwen2.5-coder-1.5b-instruct", "qwen3-32b"),
    ("qwen2.5-coder-0.5b-instruct", "qwen3-32b"),
    ("qwen3-coder-plus", "qwen3-coder-plus"),
    ("qwen-coder-plus-latest", "qwen3-coder-plus"),
    ("qwen-coder-plus", "qwen3-coder-plus"),
    ("qwen-plus-latest", "qwen-plus-2025-01-25"),
    ("qwen-plus", "qwen-plus-2025-01-25"),
    ("qwen-turbo-latest", "qwen-turbo-2025-02-11"),
    ("qwen-turbo", "qwen-turbo-2025-02-11"),
    ("qwen-vl-max", "qwen2.5-vl-32b-instruct"),
    ("qwen-vl-max-latest", "qwen2.5-vl-32b-instruct"),
    ("qwen-vl-plus", "qwen2.5-vl-32b-instruct"),
    ("qwen-vl-plus-latest", "qwen2.5-vl-32b-instruct"),
    ("qwen3", "qwen3-235b-a22b"),
    ("qwen-3", "qwen3-235b-a22b"),
    ("qwen3-max", "qwen3-235b-a22b"),
    ("qwen3-plus", "qwen3-30b-a3b"),
    ("qwen-plus-2025-09-11", "qwen-plus-2025-09-11"),
    ("qwen3-next-80b-a3b", "qwen-plus-2025-09-11"),
    ("qwen3-max-preview", "qwen3-max-preview"),
    ("Qwen3-Max-Preview", "qwen3-max-preview"),
];

const MODEL_OWNER: &str = "qwen";

/// Static model alias table plus the list of upstream ids it can reach.
#[derive(Debug, Clone)]
pub struct ModelTable {
    aliases: HashMap<String, String>,
    available: Vec<String>,
    default_model: String,
}

impl ModelTable {
    pub fn new(default_model: impl Into<String>) -> Self {
        let default_model = default_model.into();
        let aliases: HashMap<String, String> = MODEL_ALIASES
            .iter()
            .map(|(name, id)| (name.to_string(), id.to_string()))
            .collect();

        let mut available: Vec<String> = Vec::new();
        for id in std::iter::once(default_model.as_str())
            .chain(MODEL_ALIASES.iter().map(|(_, id)| *id))
        {
            if !available.iter().any(|known| known == id) {
                available.push(id.to_string());
            }
        }

        Self {
            aliases,
            available,
            default_model,
        }
    }

    pub fn default_model(&self) -> &str {
        &self.default_model
    }

    /// Maps a requested model name onto an upstream id. Unknown names fall
    /// back to the default model.
    pub fn resolve(&self, requested: &str) -> String {
        let requested = requested.trim();
        if requested.is_empty() {
            return self.default_model.clone();
        }
        if let Some(id) = self.aliases.get(requested) {
            return id.clone();
        }
        if self.available.iter().any(|id| id == requested) {
            return requested.to_string();
        }
        warn!(
            event = "model_fallback",
            requested = %requested,
            model = %self.default_model,
            "unknown model, using default"
        );
        self.default_model.clone()
    }

    pub fn list(&self) -> ListModelsResponse {
        ListModelsResponse {
            object: ListObjectType::List,
            data: self
                .available
                .iter()
                .map(|id| Model {
                    id: id.clone(),
                    object: ModelObjectType::Model,
                    created: 0,
                    owned_by: MODEL_OWNER.to_string(),
                    permission: Vec::new(),
                })
                .collect(),
        }
    }
}
