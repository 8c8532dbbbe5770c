//! Image-generation backend: a thin orchestration layer that fans one
//! request out to external text-to-image providers and persists every
//! generated image in a local SQLite-backed store, grouped into atomic runs.

pub mod env;
mod error;
pub mod orchestrator;
pub mod providers;
pub mod server;
pub mod store;
pub mod types;
pub mod utils;

pub use env::Env;
pub use error::{EaselError, Result};
pub use orchestrator::{GenerateResponse, GeneratedImage, Orchestrator};
pub use providers::{ImageProvider, KreaImages, OpenAiImages, ProviderRegistry};
pub use server::{AppState, router};
pub use store::{ImageRecord, ImageStore, RunRecord, StoreError};
pub use types::{
    ImageGenerationRequest, ImageGenerationResult, ModelOption, ProviderCapabilities,
};
