use super::*;
use crate::types::ImageGenerationResult;
use serde_json::json;

fn result(model: &str, image_base64: &str) -> ImageGenerationResult {
    ImageGenerationResult {
        provider: "openai".to_string(),
        model: model.to_string(),
        prompt: "a lighthouse".to_string(),
        image_base64: image_base64.to_string(),
        size: Some("1024x1024".to_string()),
        quality: Some("standard".to_string()),
        revised_prompt: Some("a lighthouse at dusk".to_string()),
    }
}

fn store(dir: &tempfile::TempDir) -> ImageStore {
    ImageStore::new(dir.path().join("images.db"), dir.path().join("images"))
}

#[tokio::test]
async fn save_and_get_round_trip_preserves_fields_and_bytes() {
    let dir = tempfile::tempdir().expect("tempdir");
    let store = store(&dir);
    store.init().await.expect("init");

    let payload = json!({"prompt": "a lighthouse", "provider": "openai"});
    let image_base64 = BASE64.encode(b"not really a png");
    let saved = store
        .save_generation(&payload, &result("gpt-image-1", &image_base64), None)
        .await
        .expect("save");

    // No explicit run id: the image forms its own run.
    assert_eq!(saved.run_id, saved.id);
    assert_eq!(saved.mime_type, "image/png");
    assert_eq!(saved.sha256, format!("{:x}", Sha256::digest(b"not really a png")));

    let fetched = store
        .get_generation(&saved.id)
        .await
        .expect("get")
        .expect("record exists");
    assert_eq!(fetched.provider, "openai");
    assert_eq!(fetched.model, "gpt-image-1");
    assert_eq!(fetched.prompt, "a lighthouse");
    assert_eq!(fetched.size.as_deref(), Some("1024x1024"));
    assert_eq!(fetched.quality.as_deref(), Some("standard"));
    assert_eq!(fetched.revised_prompt.as_deref(), Some("a lighthouse at dusk"));
    assert_eq!(fetched.request_json.expect("request json")["prompt"], "a lighthouse");
    assert_eq!(
        fetched.response_json.expect("response json")["image_base64"],
        image_base64
    );

    let path = store
        .image_file_path(&saved.id)
        .await
        .expect("path")
        .expect("file exists");
    let bytes = std::fs::read(path).expect("read image file");
    assert_eq!(bytes, b"not really a png");
}

#[tokio::test]
async fn get_generation_returns_none_for_unknown_id() {
    let dir = tempfile::tempdir().expect("tempdir");
    let store = store(&dir);
    store.init().await.expect("init");

    assert!(store.get_generation("missing").await.expect("get").is_none());
    assert!(
        store
            .image_file_path("missing")
            .await
            .expect("path")
            .is_none()
    );
}

#[tokio::test]
async fn save_rejects_invalid_base64() {
    let dir = tempfile::tempdir().expect("tempdir");
    let store = store(&dir);
    store.init().await.expect("init");

    let err = store
        .save_generation(&json!({}), &result("gpt-image-1", "!!not base64!!"), None)
        .await
        .unwrap_err();
    assert!(matches!(err, StoreError::Base64(_)));
    assert!(
        store
            .list_generations(10, 0)
            .await
            .expect("list")
            .is_empty()
    );
}

#[tokio::test]
async fn list_runs_groups_by_run_id() {
    let dir = tempfile::tempdir().expect("tempdir");
    let store = store(&dir);
    store.init().await.expect("init");

    let payload = json!({"prompt": "a lighthouse"});
    let image = BASE64.encode(b"img");
    store
        .save_generation(&payload, &result("gpt-image-1", &image), Some("run-1"))
        .await
        .expect("save 1");
    store
        .save_generation(&payload, &result("dall-e-3", &image), Some("run-1"))
        .await
        .expect("save 2");
    store
        .save_generation(&payload, &result("dall-e-2", &image), Some("run-2"))
        .await
        .expect("save 3");

    let runs = store.list_runs(10, 0).await.expect("list runs");
    assert_eq!(runs.len(), 2);
    let run_1 = runs
        .iter()
        .find(|run| run.run_id == "run-1")
        .expect("run-1");
    assert_eq!(run_1.image_count, 2);
    assert_eq!(run_1.images.len(), 2);
    let run_2 = runs
        .iter()
        .find(|run| run.run_id == "run-2")
        .expect("run-2");
    assert_eq!(run_2.image_count, 1);
}

#[tokio::test]
async fn delete_run_removes_rows_and_files() {
    let dir = tempfile::tempdir().expect("tempdir");
    let store = store(&dir);
    store.init().await.expect("init");

    let payload = json!({"prompt": "x"});
    let image = BASE64.encode(b"img");
    let first = store
        .save_generation(&payload, &result("gpt-image-1", &image), Some("run-1"))
        .await
        .expect("save 1");
    let second = store
        .save_generation(&payload, &result("dall-e-3", &image), Some("run-1"))
        .await
        .expect("save 2");
    let kept = store
        .save_generation(&payload, &result("dall-e-2", &image), Some("run-2"))
        .await
        .expect("save 3");

    // Losing a file ahead of rollback must not fail the rollback.
    std::fs::remove_file(&second.image_path).expect("drop file early");

    let removed = store.delete_run("run-1").await.expect("delete run");
    assert_eq!(removed, 2);
    assert!(store.get_generation(&first.id).await.expect("get").is_none());
    assert!(!std::path::Path::new(&first.image_path).exists());
    assert!(store.get_generation(&kept.id).await.expect("get").is_some());

    let runs = store.list_runs(10, 0).await.expect("list runs");
    assert_eq!(runs.len(), 1);
    assert_eq!(runs[0].run_id, "run-2");
}

#[tokio::test]
async fn list_generations_is_newest_first_with_limit_and_offset() {
    let dir = tempfile::tempdir().expect("tempdir");
    let store = store(&dir);
    store.init().await.expect("init");

    let image = BASE64.encode(b"img");
    for model in ["m1", "m2", "m3"] {
        store
            .save_generation(&json!({}), &result(model, &image), None)
            .await
            .expect("save");
        // created_at has second-level precision in RFC 3339; space the rows out.
        tokio::time::sleep(std::time::Duration::from_millis(1100)).await;
    }

    let page = store.list_generations(2, 0).await.expect("list");
    assert_eq!(page.len(), 2);
    assert_eq!(page[0].model, "m3");
    assert_eq!(page[1].model, "m2");

    let rest = store.list_generations(2, 2).await.expect("list rest");
    assert_eq!(rest.len(), 1);
    assert_eq!(rest[0].model, "m1");
}
