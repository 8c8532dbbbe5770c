use std::path::{Path, PathBuf};
use std::time::Duration;

use base64::Engine as _;
use base64::engine::general_purpose::STANDARD as BASE64;
use rusqlite::OptionalExtension;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use sha2::{Digest, Sha256};
use thiserror::Error;
use time::OffsetDateTime;
use time::format_description::well_known::Rfc3339;
use uuid::Uuid;

use crate::types::ImageGenerationResult;

/// SQLite-backed record store: one row and one PNG file per generated image.
/// Every operation opens its own connection inside `spawn_blocking`; the
/// orchestrator composes them and supplies its own run-level rollback.
#[derive(Clone, Debug)]
pub struct ImageStore {
    db_path: PathBuf,
    image_dir: PathBuf,
}

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("sqlite join error: {0}")]
    Join(#[from] tokio::task::JoinError),
    #[error("sqlite error: {0}")]
    Sqlite(#[from] rusqlite::Error),
    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),
    #[error("invalid image payload: {0}")]
    Base64(#[from] base64::DecodeError),
    #[error("timestamp error: {0}")]
    Timestamp(#[from] time::error::Format),
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

/// Persisted projection of one generation. The request/response JSON columns
/// are loaded only on by-id fetches.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ImageRecord {
    pub id: String,
    pub run_id: String,
    pub created_at: String,
    pub provider: String,
    pub model: String,
    pub prompt: String,
    pub revised_prompt: Option<String>,
    pub size: Option<String>,
    pub quality: Option<String>,
    pub image_path: String,
    pub mime_type: String,
    pub sha256: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub request_json: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub response_json: Option<Value>,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct RunRecord {
    pub run_id: String,
    pub created_at: String,
    pub image_count: u64,
    pub images: Vec<ImageRecord>,
}

const LIST_COLUMNS: &str = "id, run_id, created_at, provider, model, prompt, revised_prompt, \
     size, quality, image_path, mime_type, sha256";

impl ImageStore {
    pub fn new(db_path: impl Into<PathBuf>, image_dir: impl Into<PathBuf>) -> Self {
        Self {
            db_path: db_path.into(),
            image_dir: image_dir.into(),
        }
    }

    pub fn db_path(&self) -> &Path {
        &self.db_path
    }

    pub fn image_dir(&self) -> &Path {
        &self.image_dir
    }

    pub async fn init(&self) -> Result<(), StoreError> {
        let db_path = self.db_path.clone();
        let image_dir = self.image_dir.clone();
        tokio::task::spawn_blocking(move || -> Result<(), StoreError> {
            if let Some(parent) = db_path.parent() {
                std::fs::create_dir_all(parent)?;
            }
            std::fs::create_dir_all(&image_dir)?;
            let conn = open_connection(db_path)?;
            init_schema(&conn)?;
            Ok(())
        })
        .await?
    }

    /// Decodes and writes the image bytes, then inserts the row. Without an
    /// explicit run id the image forms a single-image run keyed by its own id.
    pub async fn save_generation(
        &self,
        request_payload: &Value,
        result: &ImageGenerationResult,
        run_id: Option<&str>,
    ) -> Result<ImageRecord, StoreError> {
        let db_path = self.db_path.clone();
        let image_dir = self.image_dir.clone();
        let image_id = Uuid::new_v4().to_string();
        let run_id = run_id.unwrap_or(&image_id).to_string();
        let request_json = serde_json::to_string(request_payload)?;
        let response_json = serde_json::to_string(result)?;
        let result = result.clone();

        tokio::task::spawn_blocking(move || -> Result<ImageRecord, StoreError> {
            let image_bytes = BASE64.decode(result.image_base64.as_bytes())?;
            let sha256 = format!("{:x}", Sha256::digest(&image_bytes));

            std::fs::create_dir_all(&image_dir)?;
            let image_path = image_dir.join(format!("{image_id}.png"));
            std::fs::write(&image_path, &image_bytes)?;

            let created_at = OffsetDateTime::now_utc().format(&Rfc3339)?;

            let conn = open_connection(db_path)?;
            init_schema(&conn)?;
            conn.execute(
                "INSERT INTO image_generations (
                    id, run_id, created_at, provider, model, prompt, revised_prompt,
                    size, quality, image_path, mime_type, sha256, request_json, response_json
                ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14)",
                rusqlite::params![
                    image_id,
                    run_id,
                    created_at,
                    result.provider,
                    result.model,
                    result.prompt,
                    result.revised_prompt,
                    result.size,
                    result.quality,
                    image_path.to_string_lossy().into_owned(),
                    "image/png",
                    sha256,
                    request_json,
                    response_json,
                ],
            )?;

            read_record(&conn, &image_id)?.ok_or_else(|| {
                StoreError::Sqlite(rusqlite::Error::QueryReturnedNoRows)
            })
        })
        .await?
    }

    pub async fn get_generation(&self, image_id: &str) -> Result<Option<ImageRecord>, StoreError> {
        let db_path = self.db_path.clone();
        let image_id = image_id.to_string();
        tokio::task::spawn_blocking(move || -> Result<Option<ImageRecord>, StoreError> {
            let conn = open_connection(db_path)?;
            init_schema(&conn)?;
            read_record(&conn, &image_id)
        })
        .await?
    }

    /// Resolves the on-disk file for an image; `None` when either the row or
    /// the file is gone.
    pub async fn image_file_path(&self, image_id: &str) -> Result<Option<PathBuf>, StoreError> {
        let db_path = self.db_path.clone();
        let image_id = image_id.to_string();
        tokio::task::spawn_blocking(move || -> Result<Option<PathBuf>, StoreError> {
            let conn = open_connection(db_path)?;
            init_schema(&conn)?;
            let path: Option<String> = conn
                .query_row(
                    "SELECT image_path FROM image_generations WHERE id = ?1",
                    rusqlite::params![image_id],
                    |row| row.get(0),
                )
                .optional()?;
            Ok(path.map(PathBuf::from).filter(|path| path.exists()))
        })
        .await?
    }

    pub async fn list_generations(
        &self,
        limit: i64,
        offset: i64,
    ) -> Result<Vec<ImageRecord>, StoreError> {
        let db_path = self.db_path.clone();
        tokio::task::spawn_blocking(move || -> Result<Vec<ImageRecord>, StoreError> {
            let conn = open_connection(db_path)?;
            init_schema(&conn)?;
            let mut stmt = conn.prepare(&format!(
                "SELECT {LIST_COLUMNS} FROM image_generations
                 ORDER BY created_at DESC LIMIT ?1 OFFSET ?2"
            ))?;
            let rows = stmt.query_map(rusqlite::params![limit, offset], row_to_record)?;
            rows.collect::<Result<Vec<_>, _>>().map_err(StoreError::from)
        })
        .await?
    }

    /// Run summaries, newest first; each run carries its images oldest first.
    pub async fn list_runs(&self, limit: i64, offset: i64) -> Result<Vec<RunRecord>, StoreError> {
        let db_path = self.db_path.clone();
        tokio::task::spawn_blocking(move || -> Result<Vec<RunRecord>, StoreError> {
            let conn = open_connection(db_path)?;
            init_schema(&conn)?;

            let mut runs_stmt = conn.prepare(
                "SELECT run_id, MAX(created_at) AS created_at, COUNT(*) AS image_count
                 FROM image_generations
                 GROUP BY run_id
                 ORDER BY created_at DESC
                 LIMIT ?1 OFFSET ?2",
            )?;
            let summaries = runs_stmt
                .query_map(rusqlite::params![limit, offset], |row| {
                    Ok((
                        row.get::<_, String>(0)?,
                        row.get::<_, String>(1)?,
                        row.get::<_, i64>(2)?.max(0) as u64,
                    ))
                })?
                .collect::<Result<Vec<_>, _>>()?;

            let mut images_stmt = conn.prepare(&format!(
                "SELECT {LIST_COLUMNS} FROM image_generations
                 WHERE run_id = ?1 ORDER BY created_at ASC"
            ))?;

            let mut runs = Vec::with_capacity(summaries.len());
            for (run_id, created_at, image_count) in summaries {
                let images = images_stmt
                    .query_map(rusqlite::params![run_id], row_to_record)?
                    .collect::<Result<Vec<_>, _>>()?;
                runs.push(RunRecord {
                    run_id,
                    created_at,
                    image_count,
                    images,
                });
            }
            Ok(runs)
        })
        .await?
    }

    /// Removes every row of a run, then the files. Row deletion is
    /// authoritative; a file that is already gone is logged and skipped.
    pub async fn delete_run(&self, run_id: &str) -> Result<usize, StoreError> {
        let db_path = self.db_path.clone();
        let run_id = run_id.to_string();
        tokio::task::spawn_blocking(move || -> Result<usize, StoreError> {
            let conn = open_connection(db_path)?;
            init_schema(&conn)?;

            let mut stmt =
                conn.prepare("SELECT image_path FROM image_generations WHERE run_id = ?1")?;
            let paths = stmt
                .query_map(rusqlite::params![run_id], |row| row.get::<_, String>(0))?
                .collect::<Result<Vec<_>, _>>()?;

            let removed = conn.execute(
                "DELETE FROM image_generations WHERE run_id = ?1",
                rusqlite::params![run_id],
            )?;

            for path in paths {
                if let Err(err) = std::fs::remove_file(&path) {
                    tracing::debug!(%run_id, %path, error = %err, "image file removal skipped");
                }
            }

            Ok(removed)
        })
        .await?
    }
}

fn open_connection(path: PathBuf) -> Result<rusqlite::Connection, rusqlite::Error> {
    let conn = rusqlite::Connection::open(path)?;
    let _ = conn.busy_timeout(Duration::from_secs(5));
    let _ = conn.execute_batch("PRAGMA journal_mode = WAL; PRAGMA synchronous = NORMAL;");
    Ok(conn)
}

fn init_schema(conn: &rusqlite::Connection) -> Result<(), rusqlite::Error> {
    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS image_generations (
            id TEXT PRIMARY KEY,
            run_id TEXT NOT NULL,
            created_at TEXT NOT NULL,
            provider TEXT NOT NULL,
            model TEXT NOT NULL,
            prompt TEXT NOT NULL,
            revised_prompt TEXT,
            size TEXT,
            quality TEXT,
            image_path TEXT NOT NULL,
            mime_type TEXT NOT NULL,
            sha256 TEXT NOT NULL,
            request_json TEXT NOT NULL,
            response_json TEXT NOT NULL
        );

        CREATE INDEX IF NOT EXISTS idx_image_generations_created_at
            ON image_generations(created_at DESC);
        CREATE INDEX IF NOT EXISTS idx_image_generations_provider
            ON image_generations(provider);
        CREATE INDEX IF NOT EXISTS idx_image_generations_run_id
            ON image_generations(run_id);",
    )?;

    // Databases created before runs existed carry rows without a run id;
    // each such row becomes its own single-image run.
    conn.execute(
        "UPDATE image_generations SET run_id = id WHERE run_id IS NULL OR run_id = ''",
        [],
    )?;

    Ok(())
}

fn read_record(
    conn: &rusqlite::Connection,
    image_id: &str,
) -> Result<Option<ImageRecord>, StoreError> {
    let row = conn
        .query_row(
            &format!(
                "SELECT {LIST_COLUMNS}, request_json, response_json
                 FROM image_generations WHERE id = ?1"
            ),
            rusqlite::params![image_id],
            |row| {
                let mut record = row_to_record(row)?;
                record.request_json = Some(Value::String(row.get::<_, String>(12)?));
                record.response_json = Some(Value::String(row.get::<_, String>(13)?));
                Ok(record)
            },
        )
        .optional()?;

    let Some(mut record) = row else {
        return Ok(None);
    };
    record.request_json = parse_json_column(record.request_json)?;
    record.response_json = parse_json_column(record.response_json)?;
    Ok(Some(record))
}

fn parse_json_column(raw: Option<Value>) -> Result<Option<Value>, StoreError> {
    match raw {
        Some(Value::String(text)) => Ok(Some(serde_json::from_str(&text)?)),
        other => Ok(other),
    }
}

fn row_to_record(row: &rusqlite::Row<'_>) -> Result<ImageRecord, rusqlite::Error> {
    Ok(ImageRecord {
        id: row.get(0)?,
        run_id: row.get(1)?,
        created_at: row.get(2)?,
        provider: row.get(3)?,
        model: row.get(4)?,
        prompt: row.get(5)?,
        revised_prompt: row.get(6)?,
        size: row.get(7)?,
        quality: row.get(8)?,
        image_path: row.get(9)?,
        mime_type: row.get(10)?,
        sha256: row.get(11)?,
        request_json: None,
        response_json: None,
    })
}

#[cfg(test)]
mod tests;
