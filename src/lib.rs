// Library exports for the screen-capture translation overlay
//
// detect (color + grayscale) -> fuse -> translate -> render

pub mod core;
pub mod middleware;
pub mod orchestration;
pub mod services;
pub mod utils;

#[cfg(test)]
mod testing;

// Re-export commonly used types and functions
pub use core::{
    config::Config,
    errors::{
        ConfigError, CredentialError, DetectionError, PipelineError, RenderingError,
        TranslationError, WorkerError,
    },
    types::{DetectParams, FusedRegion, OverlayRegion, Point, Quad, Rect, StageTimings, TextRegion},
};

pub use middleware::{CircuitBreaker, CircuitBreakerConfig, CircuitState};

pub use orchestration::{spawn_worker, OverlayPipeline, PipelineOutput, WorkerHandle};

pub use services::{
    CosmicTextEngine, CredentialStore, KeyringStore, OnnxTextDetector, OverlayRenderer,
    RegionFuser, TextDetector, Translator,
};

pub use utils::Metrics;
