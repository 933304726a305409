pub mod pipeline;
pub mod worker;

pub use pipeline::{OverlayPipeline, PipelineOutput};
pub use worker::{spawn_worker, WorkerHandle};
