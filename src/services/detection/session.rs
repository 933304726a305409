// ONNX Runtime session construction shared by the box detector and the
// text recognizer.

use anyhow::{Context, Result};
use ort::execution_providers::CPUExecutionProvider;
use ort::session::{builder::GraphOptimizationLevel, Session};
use std::path::Path;
use tracing::{debug, info, warn};

#[cfg(feature = "cuda")]
use ort::execution_providers::CUDAExecutionProvider;

use crate::core::errors::{DetectionError, DetectionResult};

/// All physical cores, capped at 6 on Windows.
fn intra_op_threads() -> usize {
    let cores = num_cpus::get_physical().max(1);

    #[cfg(target_os = "windows")]
    let threads = cores.min(6);
    #[cfg(not(target_os = "windows"))]
    let threads = cores;

    debug!("Inference threads: {} of {} physical cores", threads, cores);
    threads
}

/// Read a model artifact, mapping a missing file to `ModelNotFound`
pub fn read_artifact(path: &Path) -> DetectionResult<Vec<u8>> {
    if !path.is_file() {
        return Err(DetectionError::ModelNotFound {
            path: path.display().to_string(),
        });
    }
    std::fs::read(path).map_err(|source| DetectionError::ModelLoad {
        path: path.display().to_string(),
        source,
    })
}

fn cpu_session(model_bytes: &[u8], model_name: &str) -> Result<Session> {
    Session::builder()
        .context("Failed to create session builder")?
        .with_execution_providers([CPUExecutionProvider::default().build()])
        .context("Failed to configure CPU execution provider")?
        .with_optimization_level(GraphOptimizationLevel::Level3)
        .context("Failed to set graph optimization level")?
        .with_intra_threads(intra_op_threads())
        .context("Failed to configure intra-op threads")?
        .with_inter_threads(1)
        .context("Failed to configure inter-op threads")?
        .commit_from_memory(model_bytes)
        .with_context(|| format!("Failed to load {} model", model_name))
}

#[cfg(feature = "cuda")]
fn cuda_session(model_bytes: &[u8], model_name: &str) -> Result<Session> {
    Session::builder()
        .context("Failed to create session builder")?
        .with_execution_providers([CUDAExecutionProvider::default().build()])
        .context("Failed to configure CUDA execution provider")?
        .with_optimization_level(GraphOptimizationLevel::Level3)
        .context("Failed to set graph optimization level")?
        .with_intra_threads(intra_op_threads())
        .context("Failed to configure intra-op threads")?
        .commit_from_memory(model_bytes)
        .with_context(|| format!("Failed to load {} model with CUDA", model_name))
}

fn build(model_bytes: &[u8], model_name: &str, backend: Option<&str>) -> Result<(String, Session)> {
    match backend.unwrap_or("auto") {
        #[cfg(feature = "cuda")]
        "cuda" => Ok(("CUDA".to_string(), cuda_session(model_bytes, model_name)?)),
        #[cfg(feature = "cuda")]
        "auto" => match cuda_session(model_bytes, model_name) {
            Ok(session) => Ok(("CUDA".to_string(), session)),
            Err(e) => {
                warn!("CUDA unavailable for {} ({:#}), using CPU", model_name, e);
                Ok(("CPU".to_string(), cpu_session(model_bytes, model_name)?))
            }
        },
        "cpu" | "auto" => Ok(("CPU".to_string(), cpu_session(model_bytes, model_name)?)),
        other => {
            warn!(
                "INFERENCE_BACKEND={} is not compiled in, using CPU for {}",
                other, model_name
            );
            Ok(("CPU".to_string(), cpu_session(model_bytes, model_name)?))
        }
    }
}

/// Load `path` into an ONNX Runtime session on the requested backend
/// (`cpu`, `cuda` with the `cuda` feature, or `auto`).
///
/// Returns `(backend_name, session)`.
pub fn build_session(
    path: &Path,
    model_name: &str,
    backend: Option<&str>,
) -> DetectionResult<(String, Session)> {
    let model_bytes = read_artifact(path)?;
    let size_mb = model_bytes.len() as f64 / 1_048_576.0;

    let (device, session) = build(&model_bytes, model_name, backend)
        .map_err(|e| DetectionError::SessionSetup(format!("{:#}", e)))?;

    info!(
        "Loaded {} model from {} ({:.1} MB) on {}",
        model_name,
        path.display(),
        size_mb,
        device
    );
    Ok((device, session))
}
