//! Proposal PDF generation service.
//!
//! Turns a proposal's structured content into a PDF through one of two
//! rendering backends (headless browser or office suite), with a
//! content-addressed file cache in front and a durable job queue with
//! retries behind. [`Orchestrator`] is the entry point.

pub mod cache;
pub mod clock;
pub mod config;
pub mod error;
pub mod jobs;
pub mod logging;
pub mod orchestrator;
pub mod selector;

pub use cache::{CacheSettings, CacheStats, CacheStore, ClearScope, cache_key};
pub use clock::RuntimeClock;
pub use config::{ConfigError, ServiceConfig};
pub use error::GenerationError;
pub use jobs::CancelOutcome;
pub use orchestrator::{
    GenerateResponse, Orchestrator, OrchestratorBuilder, Status, StatusReport, SyncResult,
    capabilities,
};
pub use selector::MethodSelector;

pub use quire_render_core::{RenderError, RenderedPdf, Renderer, SharedRenderer};
pub use quire_traits::{ContentError, ContentSource, InMemoryContentSource};
pub use quire_types::{
    GenerationOptions, JobId, JobResult, Margins, MethodCapabilities, MethodPreference,
    Orientation, ProposalContent, ProposalId, Quality, RenderMethod,
};
