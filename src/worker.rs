use std::future::Future;
use std::pin::Pin;
use std::sync::mpsc::{self, Sender};
use std::task::{Context, Poll};
use std::thread::JoinHandle;

use tokio::sync::oneshot;
use tracing::{debug, info};

use crate::classification::{ClassificationPipeline, ImageSource, Interpretation};
use crate::error::{GraderError, Result};

/// Work item for the classifier thread
struct Job {
    source: ImageSource,
    reply: oneshot::Sender<Result<Interpretation>>,
}

/// Result of a submitted job; await it, or call [`PendingClassification::wait`]
/// from synchronous code. Dropping it discards the result, the work still runs.
pub struct PendingClassification {
    receiver: oneshot::Receiver<Result<Interpretation>>,
}

impl PendingClassification {
    /// Block the current thread until the result arrives. Must not be called
    /// from inside an async runtime.
    pub fn wait(self) -> Result<Interpretation> {
        self.receiver
            .blocking_recv()
            .map_err(|_| GraderError::WorkerStopped)?
    }
}

impl Future for PendingClassification {
    type Output = Result<Interpretation>;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        Pin::new(&mut self.receiver)
            .poll(cx)
            .map(|received| {
                received
                    .map_err(|_| GraderError::WorkerStopped)
                    .and_then(|outcome| outcome)
            })
    }
}

/// Dedicated thread owning one [`ClassificationPipeline`].
///
/// Jobs are processed one at a time in submission order. For parallelism,
/// spawn several workers, each with its own engine.
pub struct ClassifierWorker {
    sender: Option<Sender<Job>>,
    handle: Option<JoinHandle<()>>,
}

impl ClassifierWorker {
    pub fn spawn(mut pipeline: ClassificationPipeline) -> Result<Self> {
        let (sender, receiver) = mpsc::channel::<Job>();
        let handle = std::thread::Builder::new()
            .name("classifier-worker".to_string())
            .spawn(move || {
                for job in receiver {
                    let outcome = pipeline.classify(job.source);
                    if job.reply.send(outcome).is_err() {
                        debug!("Caller dropped a pending classification");
                    }
                }
                pipeline.close();
                info!("Classifier worker stopped");
            })?;

        Ok(Self {
            sender: Some(sender),
            handle: Some(handle),
        })
    }

    /// Queue an image; the result is delivered through the returned handle.
    pub fn submit(&self, source: impl Into<ImageSource>) -> Result<PendingClassification> {
        let sender = self.sender.as_ref().ok_or(GraderError::WorkerStopped)?;
        let (reply, receiver) = oneshot::channel();
        sender
            .send(Job {
                source: source.into(),
                reply,
            })
            .map_err(|_| GraderError::WorkerStopped)?;
        Ok(PendingClassification { receiver })
    }

    pub async fn classify(&self, source: impl Into<ImageSource>) -> Result<Interpretation> {
        self.submit(source)?.await
    }

    /// Finish queued jobs, close the engine and join the thread.
    pub fn shutdown(mut self) {
        self.stop();
    }

    fn stop(&mut self) {
        // Closing the channel ends the worker loop once the queue drains.
        self.sender.take();
        if let Some(handle) = self.handle.take() {
            if handle.join().is_err() {
                tracing::error!("Classifier worker panicked");
            }
        }
    }
}

impl Drop for ClassifierWorker {
    fn drop(&mut self) {
        self.stop();
    }
}
