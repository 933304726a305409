// Error types for each pipeline concern
//
// thiserror enums per service, chained into PipelineError at the
// orchestration layer. Binaries wrap these in anyhow for startup context.

use thiserror::Error;

/// Detector errors (initialization and per-run inference)
#[derive(Debug, Error)]
pub enum DetectionError {
    #[error("Model artifact not found: {path}")]
    ModelNotFound { path: String },

    #[error("Failed to read model artifact {path}: {source}")]
    ModelLoad {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("ONNX inference failed: {0}")]
    InferenceFailed(#[from] ort::Error),

    #[error("Session setup failed: {0}")]
    SessionSetup(String),

    #[error("Unexpected model output: {0}")]
    InvalidOutput(String),

    #[error("Invalid image dimensions: {width}x{height}")]
    InvalidImageSize { width: u32, height: u32 },
}

/// Translation backend errors
#[derive(Debug, Error)]
pub enum TranslationError {
    #[error("API request failed: {0}")]
    ApiRequestFailed(#[from] reqwest::Error),

    #[error("Translation API returned {status}: {body}")]
    ApiStatus { status: u16, body: String },

    #[error("Invalid response format: {0}")]
    InvalidResponse(String),

    #[error("Backend returned {got} translations for {expected} texts")]
    LengthMismatch { expected: usize, got: usize },

    #[error("Circuit breaker open, refusing translation request")]
    CircuitOpen,
}

/// Credential store errors
#[derive(Debug, Error)]
pub enum CredentialError {
    #[error("Unknown translation provider: {0}")]
    UnknownProvider(String),

    #[error("Keyring access failed: {0}")]
    Keyring(#[from] keyring::Error),
}

/// Rendering errors (font system setup only; the per-region loop never fails)
#[derive(Debug, Error)]
pub enum RenderingError {
    #[error("Font directory not readable: {path}")]
    FontDirectory { path: String },

    #[error("No fonts loaded (fonts dir: {fonts_dir}, system fonts: {system})")]
    NoFonts { fonts_dir: String, system: bool },
}

/// Errors of one pipeline run
#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("Detection failed on the {pass} pass: {source}")]
    DetectionFailed {
        pass: &'static str,
        #[source]
        source: DetectionError,
    },

    #[error("Task join failed: {0}")]
    TaskJoinFailed(String),
}

/// Errors talking to the pipeline worker
#[derive(Debug, Error)]
pub enum WorkerError {
    #[error("A run is already in flight")]
    Busy,

    #[error("Pipeline worker has shut down")]
    Closed,

    #[error(transparent)]
    Pipeline(#[from] PipelineError),
}

/// Configuration errors
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Invalid detection config: {0}")]
    InvalidDetectionConfig(String),

    #[error("Invalid translation config: {0}")]
    InvalidTranslationConfig(String),

    #[error("Invalid rendering config: {0}")]
    InvalidRenderingConfig(String),

    #[error("Confidence threshold must be in [0.0, 1.0], got {0}")]
    InvalidConfidenceThreshold(f32),

    #[error("IoU threshold must be in [0.0, 1.0], got {0}")]
    InvalidIoUThreshold(f32),

    #[error("Batch size must be > 0, got {0}")]
    InvalidBatchSize(usize),
}

// Convenience type aliases for Results
pub type DetectionResult<T> = Result<T, DetectionError>;
pub type TranslationResult<T> = Result<T, TranslationError>;
pub type CredentialResult<T> = Result<T, CredentialError>;
pub type RenderingResult<T> = Result<T, RenderingError>;
pub type PipelineResult<T> = Result<T, PipelineError>;
pub type ConfigResult<T> = Result<T, ConfigError>;

/// Attach the detection pass name to a detector error
pub trait PassContext<T> {
    fn in_pass(self, pass: &'static str) -> PipelineResult<T>;
}

impl<T> PassContext<T> for DetectionResult<T> {
    fn in_pass(self, pass: &'static str) -> PipelineResult<T> {
        self.map_err(|source| PipelineError::DetectionFailed { pass, source })
    }
}
