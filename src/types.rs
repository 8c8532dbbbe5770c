use serde::{Deserialize, Serialize};

/// One normalized generation request. A multi-model orchestration derives one
/// instance per target model; the rest of the fields are shared.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImageGenerationRequest {
    pub prompt: String,
    #[serde(default)]
    pub model: Option<String>,
    #[serde(default)]
    pub size: Option<String>,
    #[serde(default)]
    pub quality: Option<String>,
    #[serde(default)]
    pub steps: Option<u32>,
}

/// Normalized output of one successful provider call.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImageGenerationResult {
    pub provider: String,
    pub model: String,
    pub prompt: String,
    pub image_base64: String,
    pub size: Option<String>,
    pub quality: Option<String>,
    pub revised_prompt: Option<String>,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModelOption {
    pub id: String,
    pub label: String,
}

impl ModelOption {
    pub fn new(id: impl Into<String>, label: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            label: label.into(),
        }
    }
}

/// Static per-provider metadata. This is the single source of truth for both
/// request validation and the discovery endpoint.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProviderCapabilities {
    pub models: Vec<ModelOption>,
    pub sizes: Vec<String>,
    pub qualities: Vec<String>,
    pub default_model: String,
    pub default_size: String,
    pub default_quality: Option<String>,
    pub supports_steps: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default_steps: Option<u32>,
}

impl ProviderCapabilities {
    pub fn model_ids(&self) -> Vec<&str> {
        self.models.iter().map(|model| model.id.as_str()).collect()
    }
}
