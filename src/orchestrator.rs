use std::sync::Arc;

use serde::Serialize;
use serde_json::Value;
use uuid::Uuid;

use crate::env::Env;
use crate::providers::ProviderRegistry;
use crate::store::{ImageRecord, ImageStore};
use crate::types::{ImageGenerationRequest, ImageGenerationResult};
use crate::{EaselError, Result};

const DEFAULT_PROVIDER: &str = "openai";

/// Coordinates one generation call end to end: normalize the raw payload,
/// fan out one provider call per target model, then persist all results as a
/// single run or none of them.
#[derive(Clone)]
pub struct Orchestrator {
    registry: Arc<ProviderRegistry>,
    store: ImageStore,
}

/// One persisted result as surfaced to callers.
#[derive(Clone, Debug, Serialize)]
pub struct GeneratedImage {
    pub provider: String,
    pub model: String,
    pub prompt: String,
    pub image_base64: String,
    pub size: Option<String>,
    pub quality: Option<String>,
    pub revised_prompt: Option<String>,
    pub image_id: String,
    pub image_url: String,
    pub run_id: String,
}

/// Aggregated response: the first result's fields at the top level for
/// single-model callers, the full per-model list for multi-model callers.
#[derive(Clone, Debug, Serialize)]
pub struct GenerateResponse {
    #[serde(flatten)]
    pub primary: GeneratedImage,
    pub images: Vec<GeneratedImage>,
}

#[derive(Clone, Debug, PartialEq, Eq)]
struct ParsedPayload {
    provider: String,
    request: ImageGenerationRequest,
    targets: Vec<Option<String>>,
}

pub fn image_url(image_id: &str) -> String {
    format!("/api/images/{image_id}/file")
}

fn non_empty(value: Option<&Value>) -> Option<String> {
    value
        .and_then(Value::as_str)
        .map(str::trim)
        .filter(|text| !text.is_empty())
        .map(str::to_string)
}

fn parse_payload(payload: &Value) -> Result<ParsedPayload> {
    let prompt = payload
        .get("prompt")
        .and_then(Value::as_str)
        .map(str::trim)
        .unwrap_or_default();
    if prompt.is_empty() {
        return Err(EaselError::InvalidInput(
            "Field 'prompt' is required".to_string(),
        ));
    }

    let provider = non_empty(payload.get("provider"))
        .map(|name| name.to_ascii_lowercase())
        .unwrap_or_else(|| DEFAULT_PROVIDER.to_string());
    let model = non_empty(payload.get("model"));
    let size = non_empty(payload.get("size"));
    let quality = non_empty(payload.get("quality"));

    let steps = match payload.get("steps") {
        None | Some(Value::Null) => None,
        Some(value) => {
            let steps = value
                .as_u64()
                .filter(|steps| (1..=u64::from(u32::MAX)).contains(steps))
                .ok_or_else(|| {
                    EaselError::InvalidInput(
                        "Field 'steps' must be a positive integer".to_string(),
                    )
                })?;
            Some(steps as u32)
        }
    };

    let models: Vec<String> = payload
        .get("models")
        .and_then(Value::as_array)
        .map(|items| {
            items
                .iter()
                .filter_map(Value::as_str)
                .map(str::trim)
                .filter(|item| !item.is_empty())
                .map(str::to_string)
                .collect()
        })
        .unwrap_or_default();

    // Model precedence, as one decision table: an explicit single `model`
    // always wins; the `models` list applies only without one; with neither,
    // the provider's default model decides.
    let targets: Vec<Option<String>> = match (&model, models.as_slice()) {
        (Some(model), _) => vec![Some(model.clone())],
        (None, []) => vec![None],
        (None, _) => models.into_iter().map(Some).collect(),
    };

    Ok(ParsedPayload {
        provider,
        request: ImageGenerationRequest {
            prompt: prompt.to_string(),
            model,
            size,
            quality,
            steps,
        },
        targets,
    })
}

impl Orchestrator {
    pub fn new(registry: Arc<ProviderRegistry>, store: ImageStore) -> Self {
        Self { registry, store }
    }

    pub fn store(&self) -> &ImageStore {
        &self.store
    }

    pub fn registry(&self) -> &ProviderRegistry {
        &self.registry
    }

    pub async fn generate(&self, payload: &Value, env: &Env) -> Result<GenerateResponse> {
        let parsed = parse_payload(payload)?;
        let provider = self.registry.get(&parsed.provider, env)?;

        // Sequential fan-out keeps "first result is primary" and the revised
        // prompt precedence deterministic, and leaves no concurrent partial
        // work to reconcile on rollback.
        let mut results = Vec::with_capacity(parsed.targets.len());
        for target in &parsed.targets {
            let request = ImageGenerationRequest {
                model: target.clone(),
                ..parsed.request.clone()
            };
            tracing::info!(
                provider = provider.name(),
                model = target.as_deref().unwrap_or("<default>"),
                "generating image"
            );
            results.push(provider.generate(&request).await?);
        }

        let revised_prompt = results.iter().find_map(|result| {
            result
                .revised_prompt
                .as_deref()
                .map(str::trim)
                .filter(|text| !text.is_empty())
                .map(str::to_string)
        });

        let run_id = Uuid::new_v4().to_string();
        let records = self.persist_run(payload, &results, &run_id).await?;

        let images: Vec<GeneratedImage> = results
            .iter()
            .zip(records.iter())
            .map(|(result, record)| to_generated_image(result, record, &run_id))
            .collect();

        let mut primary = images
            .first()
            .cloned()
            .ok_or_else(|| EaselError::InvalidResponse("generation produced no results".to_string()))?;
        primary.revised_prompt = revised_prompt;

        Ok(GenerateResponse { primary, images })
    }

    /// All-or-nothing persistence: any failed save deletes the whole run
    /// before the error propagates.
    async fn persist_run(
        &self,
        payload: &Value,
        results: &[ImageGenerationResult],
        run_id: &str,
    ) -> Result<Vec<ImageRecord>> {
        let mut records = Vec::with_capacity(results.len());
        for result in results {
            match self.store.save_generation(payload, result, Some(run_id)).await {
                Ok(record) => records.push(record),
                Err(err) => {
                    tracing::error!(
                        run_id,
                        persisted = records.len(),
                        error = %err,
                        "run persistence failed, rolling back"
                    );
                    if let Err(rollback_err) = self.store.delete_run(run_id).await {
                        tracing::error!(run_id, error = %rollback_err, "run rollback failed");
                    }
                    return Err(err.into());
                }
            }
        }
        Ok(records)
    }
}

fn to_generated_image(
    result: &ImageGenerationResult,
    record: &ImageRecord,
    run_id: &str,
) -> GeneratedImage {
    GeneratedImage {
        provider: result.provider.clone(),
        model: result.model.clone(),
        prompt: result.prompt.clone(),
        image_base64: result.image_base64.clone(),
        size: result.size.clone(),
        quality: result.quality.clone(),
        revised_prompt: result.revised_prompt.clone(),
        image_id: record.id.clone(),
        image_url: image_url(&record.id),
        run_id: run_id.to_string(),
    }
}
