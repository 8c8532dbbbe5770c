use async_trait::async_trait;
use serde::Deserialize;
use serde_json::json;

use super::{default_http_client, join_endpoint, unsupported_value};
use crate::env::Env;
use crate::types::{
    ImageGenerationRequest, ImageGenerationResult, ModelOption, ProviderCapabilities,
};
use crate::{EaselError, Result};

use super::ImageProvider;

pub(crate) const DEFAULT_BASE_URL: &str = "https://api.openai.com/v1";

const PROVIDER_NAME: &str = "openai";

/// Synchronous provider: one POST to `images/generations`, the first returned
/// image is the result.
pub struct OpenAiImages {
    http: reqwest::Client,
    api_key: String,
    base_url: String,
    model: String,
    size: String,
    quality: String,
    capabilities: ProviderCapabilities,
}

impl OpenAiImages {
    pub fn new(api_key: impl Into<String>) -> Self {
        let capabilities = Self::capabilities_static();
        Self {
            http: default_http_client(),
            api_key: api_key.into(),
            base_url: DEFAULT_BASE_URL.to_string(),
            model: capabilities.default_model.clone(),
            size: capabilities.default_size.clone(),
            quality: capabilities
                .default_quality
                .clone()
                .unwrap_or_else(|| "standard".to_string()),
            capabilities,
        }
    }

    pub fn from_env(env: &Env) -> Result<Self> {
        let api_key = env
            .get("OPENAI_API_KEY")
            .ok_or(EaselError::MissingCredentials("OPENAI_API_KEY"))?;
        let mut provider = Self::new(api_key);
        if let Some(base_url) = env.get("OPENAI_API_BASE_URL") {
            provider = provider.with_base_url(base_url);
        }
        if let Some(model) = env.get("OPENAI_IMAGE_MODEL") {
            provider = provider.with_model(model);
        }
        if let Some(size) = env.get("OPENAI_IMAGE_SIZE") {
            provider = provider.with_size(size);
        }
        if let Some(quality) = env.get("OPENAI_IMAGE_QUALITY") {
            provider = provider.with_quality(quality);
        }
        Ok(provider)
    }

    pub fn with_http_client(mut self, http: reqwest::Client) -> Self {
        self.http = http;
        self
    }

    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into().trim_end_matches('/').to_string();
        self
    }

    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = model.into();
        self
    }

    pub fn with_size(mut self, size: impl Into<String>) -> Self {
        self.size = size.into();
        self
    }

    pub fn with_quality(mut self, quality: impl Into<String>) -> Self {
        self.quality = quality.into();
        self
    }

    pub fn capabilities_static() -> ProviderCapabilities {
        ProviderCapabilities {
            models: vec![
                ModelOption::new("gpt-image-1", "gpt-image-1 (GPT Image 1)"),
                ModelOption::new("dall-e-3", "dall-e-3 (DALL-E 3)"),
                ModelOption::new("dall-e-2", "dall-e-2 (DALL-E 2)"),
            ],
            sizes: vec![
                "1024x1024".to_string(),
                "1536x1024".to_string(),
                "1024x1536".to_string(),
                "1792x1024".to_string(),
                "1024x1792".to_string(),
            ],
            qualities: vec!["standard".to_string(), "hd".to_string()],
            default_model: "gpt-image-1".to_string(),
            default_size: "1024x1024".to_string(),
            default_quality: Some("standard".to_string()),
            supports_steps: false,
            default_steps: None,
        }
    }

    fn ensure_supported(&self, field: &str, value: &str, allowed: &[&str]) -> Result<()> {
        if allowed.contains(&value) {
            return Ok(());
        }
        Err(unsupported_value(PROVIDER_NAME, field, value, allowed))
    }
}

#[derive(Debug, Deserialize)]
struct ImagesGenerationResponse {
    #[serde(default)]
    data: Vec<ImageGenerationData>,
}

#[derive(Debug, Deserialize)]
struct ImageGenerationData {
    #[serde(default)]
    b64_json: Option<String>,
    #[serde(default)]
    revised_prompt: Option<String>,
}

#[async_trait]
impl ImageProvider for OpenAiImages {
    fn name(&self) -> &str {
        PROVIDER_NAME
    }

    fn capabilities(&self) -> &ProviderCapabilities {
        &self.capabilities
    }

    async fn generate(&self, request: &ImageGenerationRequest) -> Result<ImageGenerationResult> {
        let model = request
            .model
            .as_deref()
            .map(str::trim)
            .filter(|value| !value.is_empty())
            .unwrap_or(&self.model);
        let size = request
            .size
            .as_deref()
            .map(str::trim)
            .filter(|value| !value.is_empty())
            .unwrap_or(&self.size);
        let quality = request
            .quality
            .as_deref()
            .map(str::trim)
            .filter(|value| !value.is_empty())
            .unwrap_or(&self.quality);

        self.ensure_supported("model", model, &self.capabilities.model_ids())?;
        let sizes: Vec<&str> = self.capabilities.sizes.iter().map(String::as_str).collect();
        self.ensure_supported("size", size, &sizes)?;
        let qualities: Vec<&str> = self
            .capabilities
            .qualities
            .iter()
            .map(String::as_str)
            .collect();
        self.ensure_supported("quality", quality, &qualities)?;

        let body = json!({
            "model": model,
            "prompt": request.prompt,
            "n": 1,
            "size": size,
            "quality": quality,
            "response_format": "b64_json",
        });

        let url = join_endpoint(&self.base_url, "images/generations");
        let response = self
            .http
            .post(url)
            .bearer_auth(&self.api_key)
            .json(&body)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            return Err(EaselError::Api { status, body: text });
        }

        let parsed = response.json::<ImagesGenerationResponse>().await?;
        let image = parsed.data.into_iter().next().ok_or_else(|| {
            EaselError::InvalidResponse("openai response contained no images".to_string())
        })?;
        let image_base64 = image
            .b64_json
            .filter(|value| !value.trim().is_empty())
            .ok_or_else(|| {
                EaselError::InvalidResponse("openai image item is missing b64_json".to_string())
            })?;

        Ok(ImageGenerationResult {
            provider: PROVIDER_NAME.to_string(),
            model: model.to_string(),
            prompt: request.prompt.clone(),
            image_base64,
            size: Some(size.to_string()),
            quality: Some(quality.to_string()),
            revised_prompt: image
                .revised_prompt
                .filter(|value| !value.trim().is_empty()),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use httpmock::{Method::POST, MockServer};

    fn request(prompt: &str) -> ImageGenerationRequest {
        ImageGenerationRequest {
            prompt: prompt.to_string(),
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn generate_echoes_prompt_and_captures_revised_prompt() -> Result<()> {
        if crate::utils::test_support::should_skip_httpmock() {
            return Ok(());
        }
        let server = MockServer::start_async().await;
        let mock = server
            .mock_async(|when, then| {
                when.method(POST)
                    .path("/v1/images/generations")
                    .body_includes("\"model\":\"dall-e-3\"")
                    .body_includes("\"prompt\":\"a quiet harbor\"")
                    .body_includes("\"response_format\":\"b64_json\"");
                then.status(200)
                    .header("content-type", "application/json")
                    .body(
                        serde_json::json!({
                            "created": 1,
                            "data": [{
                                "b64_json": "QUJD",
                                "revised_prompt": "a quiet harbor at dawn"
                            }]
                        })
                        .to_string(),
                    );
            })
            .await;

        let provider = OpenAiImages::new("test-key")
            .with_base_url(server.url("/v1"))
            .with_model("dall-e-3");

        let result = provider.generate(&request("a quiet harbor")).await?;

        mock.assert_async().await;
        assert_eq!(result.provider, "openai");
        assert_eq!(result.model, "dall-e-3");
        assert_eq!(result.prompt, "a quiet harbor");
        assert_eq!(result.image_base64, "QUJD");
        assert_eq!(result.size.as_deref(), Some("1024x1024"));
        assert_eq!(result.quality.as_deref(), Some("standard"));
        assert_eq!(result.revised_prompt.as_deref(), Some("a quiet harbor at dawn"));
        Ok(())
    }

    #[tokio::test]
    async fn generate_rejects_unsupported_size_before_any_call() {
        let provider = OpenAiImages::new("test-key").with_base_url("http://127.0.0.1:1");
        let mut req = request("x");
        req.size = Some("7x7".to_string());

        let err = provider.generate(&req).await.unwrap_err();
        match err {
            EaselError::InvalidInput(message) => {
                assert!(message.contains("Unsupported openai size '7x7'"));
                assert!(message.contains("1024x1024"));
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[tokio::test]
    async fn generate_rejects_unsupported_model_and_quality() {
        let provider = OpenAiImages::new("test-key").with_base_url("http://127.0.0.1:1");

        let mut req = request("x");
        req.model = Some("sdxl".to_string());
        let err = provider.generate(&req).await.unwrap_err();
        assert!(matches!(err, EaselError::InvalidInput(message) if message.contains("model 'sdxl'")));

        let mut req = request("x");
        req.quality = Some("ultra".to_string());
        let err = provider.generate(&req).await.unwrap_err();
        assert!(
            matches!(err, EaselError::InvalidInput(message) if message.contains("quality 'ultra'"))
        );
    }

    #[tokio::test]
    async fn generate_surfaces_api_errors_with_status_and_body() -> Result<()> {
        if crate::utils::test_support::should_skip_httpmock() {
            return Ok(());
        }
        let server = MockServer::start_async().await;
        server
            .mock_async(|when, then| {
                when.method(POST).path("/v1/images/generations");
                then.status(429).body("rate limited");
            })
            .await;

        let provider = OpenAiImages::new("test-key").with_base_url(server.url("/v1"));
        let err = provider.generate(&request("x")).await.unwrap_err();
        match err {
            EaselError::Api { status, body } => {
                assert_eq!(status.as_u16(), 429);
                assert_eq!(body, "rate limited");
            }
            other => panic!("unexpected error: {other:?}"),
        }
        Ok(())
    }
}
