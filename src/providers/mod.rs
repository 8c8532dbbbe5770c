use std::time::Duration;

use async_trait::async_trait;

use crate::Result;
use crate::types::{ImageGenerationRequest, ImageGenerationResult, ProviderCapabilities};

pub mod krea;
pub mod openai;
mod registry;

pub use krea::KreaImages;
pub use openai::OpenAiImages;
pub use registry::{ProviderFactory, ProviderRegistry};

/// Uniform contract over external image-generation services. A provider
/// either answers synchronously or polls a job to completion; either way the
/// caller sees one `generate` call that returns a normalized result.
#[async_trait]
pub trait ImageProvider: Send + Sync {
    fn name(&self) -> &str;
    fn capabilities(&self) -> &ProviderCapabilities;

    async fn generate(&self, request: &ImageGenerationRequest) -> Result<ImageGenerationResult>;
}

pub(crate) const HTTP_TIMEOUT: Duration = Duration::from_secs(60);

pub(crate) fn default_http_client() -> reqwest::Client {
    reqwest::Client::builder()
        .timeout(HTTP_TIMEOUT)
        .build()
        .unwrap_or_else(|_| reqwest::Client::new())
}

pub(crate) fn join_endpoint(base_url: &str, endpoint: &str) -> String {
    let base = base_url.trim_end_matches('/');
    let endpoint = endpoint.trim_start_matches('/');
    format!("{base}/{endpoint}")
}

pub(crate) fn unsupported_value(provider: &str, field: &str, value: &str, allowed: &[&str]) -> crate::EaselError {
    crate::EaselError::InvalidInput(format!(
        "Unsupported {provider} {field} '{value}'. Supported: {}",
        allowed.join(", ")
    ))
}
