pub mod cache;
pub mod capabilities;
pub mod content;
pub mod ids;
pub mod job;
pub mod options;
pub mod time;

pub use cache::CacheEntry;
pub use capabilities::{EstimatedTimeRange, MethodCapabilities, QualityTier, RelativeSpeed};
pub use content::{Branding, ComplexitySignals, ProposalContent, Section, Visualization, VisualizationKind};
pub use ids::{CacheKey, JobId, ProposalId};
pub use job::{
    AttemptError, FailureKind, Job, JobFailure, JobResult, JobState, RetryDecision, backoff_delay,
};
pub use options::{
    GenerationOptions, GenerationRequest, Margins, MethodPreference, Orientation, Quality,
    RenderMethod, ResolvedOptions,
};
