pub mod config;
pub mod errors;
pub mod types;

// Re-export commonly used items for convenience
pub use config::Config;
pub use errors::{
    ConfigError, CredentialError, DetectionError, PipelineError, RenderingError,
    TranslationError, WorkerError,
};
pub use types::{
    AppState, DetectParams, FusedRegion, Point, Quad, Rect, RenderSpec, StageTimings, TextRegion,
};
