// Pipeline worker: one task owns the pipeline and runs requests to
// completion, one at a time.

use image::RgbaImage;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::core::errors::{PipelineResult, WorkerError};
use crate::orchestration::pipeline::{OverlayPipeline, PipelineOutput};

struct Job {
    image: RgbaImage,
    target_lang: Option<String>,
    reply: oneshot::Sender<PipelineResult<PipelineOutput>>,
}

/// Cloneable handle for submitting runs to the worker
#[derive(Clone)]
pub struct WorkerHandle {
    sender: mpsc::Sender<Job>,
    // accepted but not yet answered
    outstanding: Arc<AtomicUsize>,
}

/// Start the worker task. `queue_depth` bounds how many runs `submit` may
/// park behind the one in flight.
pub fn spawn_worker(pipeline: OverlayPipeline, queue_depth: usize) -> (WorkerHandle, JoinHandle<()>) {
    let (sender, receiver) = mpsc::channel(queue_depth.max(1));
    let outstanding = Arc::new(AtomicUsize::new(0));

    let task = tokio::spawn(worker_loop(pipeline, receiver, Arc::clone(&outstanding)));
    (WorkerHandle { sender, outstanding }, task)
}

async fn worker_loop(
    mut pipeline: OverlayPipeline,
    mut receiver: mpsc::Receiver<Job>,
    outstanding: Arc<AtomicUsize>,
) {
    info!("Pipeline worker started (target {})", pipeline.target_lang());

    while let Some(job) = receiver.recv().await {
        let result = match job.target_lang.as_deref() {
            Some(lang) => pipeline.run_for(job.image, lang).await,
            None => pipeline.run(job.image).await,
        };
        if let Err(e) = &result {
            warn!("Pipeline run failed: {}", e);
        }

        outstanding.fetch_sub(1, Ordering::SeqCst);
        if job.reply.send(result).is_err() {
            debug!("Requester went away before the run finished");
        }
    }

    info!("Pipeline worker stopped");
}

impl WorkerHandle {
    /// Queue a run and wait for its result
    pub async fn submit(
        &self,
        image: RgbaImage,
        target_lang: Option<String>,
    ) -> Result<PipelineOutput, WorkerError> {
        // Count the job only once it holds a queue slot; dropping this
        // future while waiting for one leaves nothing behind.
        let permit = self
            .sender
            .reserve()
            .await
            .map_err(|_| WorkerError::Closed)?;
        self.outstanding.fetch_add(1, Ordering::SeqCst);

        let (reply, rx) = oneshot::channel();
        permit.send(Job {
            image,
            target_lang,
            reply,
        });
        Self::await_reply(rx).await
    }

    /// Run only if nothing is in flight or queued, otherwise `Busy`
    pub async fn try_submit(
        &self,
        image: RgbaImage,
        target_lang: Option<String>,
    ) -> Result<PipelineOutput, WorkerError> {
        if self
            .outstanding
            .compare_exchange(0, 1, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            return Err(WorkerError::Busy);
        }

        let (reply, rx) = oneshot::channel();
        let job = Job {
            image,
            target_lang,
            reply,
        };
        if let Err(e) = self.sender.try_send(job) {
            self.outstanding.fetch_sub(1, Ordering::SeqCst);
            return Err(match e {
                mpsc::error::TrySendError::Full(_) => WorkerError::Busy,
                mpsc::error::TrySendError::Closed(_) => WorkerError::Closed,
            });
        }
        Self::await_reply(rx).await
    }

    async fn await_reply(
        rx: oneshot::Receiver<PipelineResult<PipelineOutput>>,
    ) -> Result<PipelineOutput, WorkerError> {
        match rx.await {
            Ok(result) => Ok(result?),
            Err(_) => Err(WorkerError::Closed),
        }
    }

    pub fn is_busy(&self) -> bool {
        self.outstanding.load(Ordering::SeqCst) > 0
    }

    pub fn is_closed(&self) -> bool {
        self.sender.is_closed()
    }
}
