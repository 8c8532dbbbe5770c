use std::time::Duration;

use async_trait::async_trait;
use base64::Engine as _;
use base64::engine::general_purpose::STANDARD as BASE64;
use reqwest::StatusCode;
use serde_json::{Map, Value};

use super::{ImageProvider, default_http_client};
use crate::env::Env;
use crate::types::{
    ImageGenerationRequest, ImageGenerationResult, ModelOption, ProviderCapabilities,
};
use crate::{EaselError, Result};

pub(crate) const DEFAULT_BASE_URL: &str = "https://api.krea.ai";

const PROVIDER_NAME: &str = "krea";
const DEFAULT_USER_AGENT: &str = "easel/1.0";
const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(2);
const MIN_POLL_INTERVAL: Duration = Duration::from_millis(200);
const DEFAULT_JOB_TIMEOUT: Duration = Duration::from_secs(120);
const MIN_JOB_TIMEOUT: Duration = Duration::from_secs(1);

const MIN_DIMENSION: u32 = 512;
const MAX_DIMENSION: u32 = 2368;
const MIN_STEPS: u32 = 1;
const MAX_STEPS: u32 = 100;
const DEFAULT_STEPS: u32 = 28;

/// User-facing model aliases mapped to the API's model paths. Both the short
/// alias and the full path are accepted.
const MODEL_PATH_ALIASES: &[(&str, &str)] = &[
    ("qwen_2512", "qwen/2512"),
    ("qwen/2512", "qwen/2512"),
    ("z_image", "z-image/z-image"),
    ("z-image/z-image", "z-image/z-image"),
    ("flux_1_dev", "bfl/flux-1-dev"),
    ("bfl/flux-1-dev", "bfl/flux-1-dev"),
];

const MODEL_PATH_Z_IMAGE: &str = "z-image/z-image";
const MODEL_PATH_FLUX_DEV: &str = "bfl/flux-1-dev";

/// Keys probed, in order, when a payload carries a single image rather than
/// an image list.
const SINGLE_IMAGE_KEYS: &[&str] = &["image_url", "image", "image_base64", "b64_json", "base64"];

const FAILED_STATUSES: &[&str] = &["failed", "error", "cancelled", "canceled"];

/// Asynchronous polling provider: submission may return a `job_id` that is
/// polled until a terminal status or the configured deadline.
pub struct KreaImages {
    http: reqwest::Client,
    api_key: String,
    base_url: String,
    user_agent: String,
    poll_interval: Duration,
    job_timeout: Duration,
    capabilities: ProviderCapabilities,
}

impl KreaImages {
    pub fn new(api_key: impl Into<String>) -> Self {
        Self {
            http: default_http_client(),
            api_key: api_key.into(),
            base_url: DEFAULT_BASE_URL.to_string(),
            user_agent: DEFAULT_USER_AGENT.to_string(),
            poll_interval: DEFAULT_POLL_INTERVAL,
            job_timeout: DEFAULT_JOB_TIMEOUT,
            capabilities: Self::capabilities_static(),
        }
    }

    pub fn from_env(env: &Env) -> Result<Self> {
        let api_key = env
            .get("KREA_API_KEY")
            .ok_or(EaselError::MissingCredentials("KREA_API_KEY"))?;
        let mut provider = Self::new(api_key);
        if let Some(base_url) = env.get("KREA_API_BASE_URL") {
            provider = provider.with_base_url(base_url);
        }
        if let Some(user_agent) = env.get("KREA_USER_AGENT") {
            provider.user_agent = user_agent;
        }
        if let Some(interval) = env
            .get("KREA_POLL_INTERVAL_SECONDS")
            .and_then(|value| value.trim().parse::<f64>().ok())
            .filter(|value| value.is_finite() && *value >= 0.0)
        {
            provider = provider.with_poll_interval(Duration::from_secs_f64(interval));
        }
        if let Some(timeout) = env
            .get("KREA_JOB_TIMEOUT_SECONDS")
            .and_then(|value| value.trim().parse::<u64>().ok())
        {
            provider = provider.with_job_timeout(Duration::from_secs(timeout));
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

    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval.max(MIN_POLL_INTERVAL);
        self
    }

    pub fn with_job_timeout(mut self, timeout: Duration) -> Self {
        self.job_timeout = timeout.max(MIN_JOB_TIMEOUT);
        self
    }

    pub fn capabilities_static() -> ProviderCapabilities {
        ProviderCapabilities {
            models: vec![
                ModelOption::new("qwen_2512", "qwen_2512 (Qwen 2512)"),
                ModelOption::new("z_image", "z_image (Z Image)"),
                ModelOption::new("flux_1_dev", "flux_1_dev (Flux 1 Dev)"),
            ],
            sizes: vec![
                "1024x1024".to_string(),
                "1024x576".to_string(),
                "576x1024".to_string(),
                "1536x1024".to_string(),
                "1024x1536".to_string(),
            ],
            qualities: Vec::new(),
            default_model: "qwen_2512".to_string(),
            default_size: "1024x1024".to_string(),
            default_quality: None,
            supports_steps: true,
            default_steps: Some(DEFAULT_STEPS),
        }
    }

    fn resolve_model_path(&self, model_alias: &str) -> Result<&'static str> {
        if let Some(&(_, path)) = MODEL_PATH_ALIASES
            .iter()
            .find(|(alias, _)| *alias == model_alias)
        {
            return Ok(path);
        }

        let mut supported: Vec<&str> = MODEL_PATH_ALIASES.iter().map(|(alias, _)| *alias).collect();
        supported.sort_unstable();
        Err(EaselError::InvalidInput(format!(
            "Unsupported krea model '{model_alias}'. Supported: {}",
            supported.join(", ")
        )))
    }

    fn resolve_dimensions(&self, requested_size: Option<&str>) -> Result<(u32, u32)> {
        if let Some(requested) = requested_size {
            if let Some((width, height)) = parse_size(requested) {
                return validate_dimensions(width, height);
            }
        }

        if let Some((width, height)) = parse_size(&self.capabilities.default_size) {
            return validate_dimensions(width, height);
        }

        validate_dimensions(1024, 1024)
    }

    fn resolve_flux_steps(&self, requested_steps: Option<u32>) -> Result<u32> {
        validate_steps(requested_steps.unwrap_or(DEFAULT_STEPS))
    }

    fn base_headers(&self, builder: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        builder
            .bearer_auth(&self.api_key)
            .header(reqwest::header::ACCEPT, "application/json")
            .header(reqwest::header::USER_AGENT, &self.user_agent)
    }

    async fn post_json(&self, url: &str, body: &Map<String, Value>) -> Result<Map<String, Value>> {
        let response = self.base_headers(self.http.post(url)).json(body).send().await?;
        parse_json_response(response).await
    }

    async fn get_json(&self, url: &str) -> Result<Map<String, Value>> {
        let response = self.base_headers(self.http.get(url)).send().await?;
        parse_json_response(response).await
    }

    /// Submits the generation request and, when the API answers with a job
    /// id, polls the job endpoint until a terminal status or the wall-clock
    /// deadline. A response without a job id is already complete.
    async fn resolve_generation_payload(
        &self,
        endpoint: &str,
        body: &Map<String, Value>,
    ) -> Result<Map<String, Value>> {
        let payload = self.post_json(endpoint, body).await?;
        let Some(job_id) = payload
            .get("job_id")
            .and_then(Value::as_str)
            .map(str::trim)
            .filter(|id| !id.is_empty())
            .map(str::to_string)
        else {
            return Ok(payload);
        };

        let job_url = format!("{}/jobs/{job_id}", self.base_url);
        let deadline = tokio::time::Instant::now() + self.job_timeout;

        while tokio::time::Instant::now() < deadline {
            let job_payload = self.get_json(&job_url).await?;
            let status = job_payload
                .get("status")
                .and_then(Value::as_str)
                .unwrap_or_default()
                .trim()
                .to_ascii_lowercase();

            if status == "completed" {
                return Ok(job_payload);
            }
            if FAILED_STATUSES.contains(&status.as_str()) {
                return Err(EaselError::JobFailed {
                    provider: PROVIDER_NAME.to_string(),
                    status,
                });
            }

            tracing::debug!(%job_id, %status, "krea job pending");
            tokio::time::sleep(self.poll_interval).await;
        }

        Err(EaselError::JobTimeout {
            provider: PROVIDER_NAME.to_string(),
            seconds: self.job_timeout.as_secs(),
        })
    }

    /// Probes the completed payload for an image, in a fixed order: list
    /// fields, the nested `result` object, then top-level single-image keys.
    /// The first candidate that normalizes to base64 wins.
    async fn extract_image_base64(&self, payload: &Map<String, Value>) -> Result<String> {
        let mut candidates: Vec<&Value> = Vec::new();

        for key in ["images", "data", "image_urls"] {
            if let Some(Value::Array(items)) = payload.get(key) {
                candidates.extend(items.iter());
            }
        }

        if let Some(Value::Object(result)) = payload.get("result") {
            if let Some(Value::Array(urls)) = result.get("urls") {
                candidates.extend(urls.iter());
            }
            for key in SINGLE_IMAGE_KEYS {
                if let Some(value) = result.get(*key).filter(|value| !value.is_null()) {
                    candidates.push(value);
                }
            }
        }

        for key in SINGLE_IMAGE_KEYS {
            if let Some(value) = payload.get(*key).filter(|value| !value.is_null()) {
                candidates.push(value);
            }
        }

        for candidate in candidates {
            if let Some(resolved) = self.resolve_candidate_base64(candidate).await? {
                return Ok(resolved);
            }
        }

        Err(EaselError::InvalidResponse(
            "krea response did not contain an image".to_string(),
        ))
    }

    async fn resolve_candidate_base64(&self, candidate: &Value) -> Result<Option<String>> {
        match candidate {
            Value::String(value) => self.normalize_image_string(value).await,
            Value::Object(object) => {
                for key in ["url", "src", "image_url"] {
                    if let Some(Value::String(value)) = object.get(key) {
                        if let Some(resolved) = self.normalize_image_string(value).await? {
                            return Ok(Some(resolved));
                        }
                    }
                }
                for key in ["image_base64", "b64_json", "base64"] {
                    if let Some(Value::String(value)) = object.get(key) {
                        if let Some(resolved) = self.normalize_image_string(value).await? {
                            return Ok(Some(resolved));
                        }
                    }
                }
                Ok(None)
            }
            _ => Ok(None),
        }
    }

    /// Normalizes one candidate string to bare base64: data URIs keep the
    /// part after the comma, http(s) URLs are fetched and encoded, anything
    /// else non-empty is assumed to already be base64.
    async fn normalize_image_string(&self, value: &str) -> Result<Option<String>> {
        let trimmed = value.trim();
        if trimmed.is_empty() {
            return Ok(None);
        }

        if trimmed.starts_with("data:") {
            let payload = trimmed
                .split_once(',')
                .map(|(_, payload)| payload.trim())
                .unwrap_or_default();
            return Ok((!payload.is_empty()).then(|| payload.to_string()));
        }

        if trimmed.starts_with("http://") || trimmed.starts_with("https://") {
            let bytes = self.download_bytes(trimmed).await?;
            return Ok(Some(BASE64.encode(bytes)));
        }

        Ok(Some(trimmed.to_string()))
    }

    async fn download_bytes(&self, url: &str) -> Result<Vec<u8>> {
        let response = self.base_headers(self.http.get(url)).send().await?;
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            if let Some(err) = edge_blocked(status, &body) {
                return Err(err);
            }
            return Err(EaselError::Api { status, body });
        }
        Ok(response.bytes().await?.to_vec())
    }
}

async fn parse_json_response(response: reqwest::Response) -> Result<Map<String, Value>> {
    let status = response.status();
    let text = response.text().await.unwrap_or_default();

    if !status.is_success() {
        if let Some(err) = edge_blocked(status, &text) {
            return Err(err);
        }
        return Err(EaselError::Api { status, body: text });
    }

    let value: Value = serde_json::from_str(&text).map_err(|_| {
        EaselError::InvalidResponse("krea api returned invalid JSON".to_string())
    })?;
    match value {
        Value::Object(map) => Ok(map),
        _ => Err(EaselError::InvalidResponse(
            "krea api returned an unexpected payload".to_string(),
        )),
    }
}

/// A 403 carrying Cloudflare's "error code: 1010" means the server IP needs
/// allowlisting, not a retry; surfaced with remediation instead of raw body.
fn edge_blocked(status: StatusCode, body: &str) -> Option<EaselError> {
    if status == StatusCode::FORBIDDEN && body.to_ascii_lowercase().contains("error code: 1010") {
        return Some(EaselError::UpstreamBlocked(
            "krea access blocked by Cloudflare (1010); check the API key scope and ask Krea support to allowlist this server IP"
                .to_string(),
        ));
    }
    None
}

fn parse_size(value: &str) -> Option<(u32, u32)> {
    let lowered = value.to_ascii_lowercase();
    let mut parts = lowered.split('x');
    let width = parts.next()?.trim().parse::<u32>().ok()?;
    let height = parts.next()?.trim().parse::<u32>().ok()?;
    if parts.next().is_some() {
        return None;
    }
    if width == 0 || height == 0 {
        return None;
    }
    Some((width, height))
}

fn validate_dimensions(width: u32, height: u32) -> Result<(u32, u32)> {
    if !(MIN_DIMENSION..=MAX_DIMENSION).contains(&width) {
        return Err(EaselError::InvalidInput(format!(
            "Krea width must be between {MIN_DIMENSION} and {MAX_DIMENSION}"
        )));
    }
    if !(MIN_DIMENSION..=MAX_DIMENSION).contains(&height) {
        return Err(EaselError::InvalidInput(format!(
            "Krea height must be between {MIN_DIMENSION} and {MAX_DIMENSION}"
        )));
    }
    Ok((width, height))
}

fn validate_steps(steps: u32) -> Result<u32> {
    if !(MIN_STEPS..=MAX_STEPS).contains(&steps) {
        return Err(EaselError::InvalidInput(format!(
            "Krea Flux steps must be between {MIN_STEPS} and {MAX_STEPS}"
        )));
    }
    Ok(steps)
}

#[async_trait]
impl ImageProvider for KreaImages {
    fn name(&self) -> &str {
        PROVIDER_NAME
    }

    fn capabilities(&self) -> &ProviderCapabilities {
        &self.capabilities
    }

    async fn generate(&self, request: &ImageGenerationRequest) -> Result<ImageGenerationResult> {
        let model_alias = request
            .model
            .as_deref()
            .map(str::trim)
            .filter(|alias| !alias.is_empty())
            .unwrap_or(&self.capabilities.default_model);
        let model_path = self.resolve_model_path(model_alias)?;

        let mut body = Map::new();
        body.insert("prompt".to_string(), Value::String(request.prompt.clone()));
        let mut size_label = None;

        if model_path == MODEL_PATH_Z_IMAGE || model_path == MODEL_PATH_FLUX_DEV {
            let (width, height) = self.resolve_dimensions(request.size.as_deref())?;
            body.insert("width".to_string(), Value::Number(width.into()));
            body.insert("height".to_string(), Value::Number(height.into()));
            size_label = Some(format!("{width}x{height}"));
        }

        if model_path == MODEL_PATH_FLUX_DEV {
            let steps = self.resolve_flux_steps(request.steps)?;
            body.insert("steps".to_string(), Value::Number(steps.into()));
        }

        let endpoint = format!("{}/generate/image/{model_path}", self.base_url);
        let payload = self.resolve_generation_payload(&endpoint, &body).await?;
        let image_base64 = self.extract_image_base64(&payload).await?;

        Ok(ImageGenerationResult {
            provider: PROVIDER_NAME.to_string(),
            model: model_path.to_string(),
            prompt: request.prompt.clone(),
            image_base64,
            size: size_label,
            quality: request.quality.clone(),
            revised_prompt: None,
        })
    }
}
