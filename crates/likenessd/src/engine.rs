use axum::body::Bytes;
use likeness_core::{decode_image, DecisionEngine, EmbeddingSource, Gallery, ImageReport, MatchPolicy, SourceError};
use std::sync::Arc;
use std::time::Instant;
use thiserror::Error;
use tokio::sync::{mpsc, oneshot};

#[derive(Error, Debug)]
pub enum EngineError {
    #[error(transparent)]
    Source(#[from] SourceError),
    #[error("failed to spawn engine thread: {0}")]
    Spawn(std::io::Error),
    #[error("engine thread exited")]
    ChannelClosed,
}

/// Messages sent from HTTP handlers to the engine thread.
enum EngineRequest {
    Recognize {
        image: Bytes,
        reply: oneshot::Sender<Result<ImageReport, EngineError>>,
    },
}

/// Clone-safe handle to the engine thread.
#[derive(Clone)]
pub struct EngineHandle {
    tx: mpsc::Sender<EngineRequest>,
}

impl EngineHandle {
    /// Decode an uploaded image and return its final match set.
    pub async fn recognize(&self, image: Bytes) -> Result<ImageReport, EngineError> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.tx
            .send(EngineRequest::Recognize {
                image,
                reply: reply_tx,
            })
            .await
            .map_err(|_| EngineError::ChannelClosed)?;
        reply_rx.await.map_err(|_| EngineError::ChannelClosed)?
    }
}

/// Spawn the engine on a dedicated OS thread.
///
/// The thread owns the embedding source (inference sessions need exclusive
/// access) and reads the gallery through a shared, never-mutated `Arc`.
/// Requests are served one at a time in arrival order.
pub fn spawn_engine<S>(
    mut source: S,
    gallery: Arc<Gallery>,
    policy: MatchPolicy,
    queue_depth: usize,
) -> Result<EngineHandle, EngineError>
where
    S: EmbeddingSource + Send + 'static,
{
    let (tx, mut rx) = mpsc::channel::<EngineRequest>(queue_depth);
    let decisions = DecisionEngine::new(policy);

    std::thread::Builder::new()
        .name("likeness-engine".into())
        .spawn(move || {
            tracing::info!(
                threshold = policy.confidence_threshold,
                max_faces = policy.max_faces,
                "engine thread started"
            );
            while let Some(req) = rx.blocking_recv() {
                match req {
                    EngineRequest::Recognize { image, reply } => {
                        let started = Instant::now();
                        let result = run_recognize(&decisions, &mut source, &gallery, &image);
                        match &result {
                            Ok(report) => tracing::debug!(
                                matches = report.matches.len(),
                                skipped = report.skipped,
                                elapsed_ms = started.elapsed().as_millis() as u64,
                                "image processed"
                            ),
                            Err(e) => tracing::error!(error = %e, "error processing image"),
                        }
                        let _ = reply.send(result);
                    }
                }
            }
            tracing::info!("engine thread exiting");
        })
        .map_err(EngineError::Spawn)?;

    Ok(EngineHandle { tx })
}

fn run_recognize<S: EmbeddingSource>(
    decisions: &DecisionEngine,
    source: &mut S,
    gallery: &Gallery,
    bytes: &[u8],
) -> Result<ImageReport, EngineError> {
    let image = decode_image(bytes)?;
    Ok(decisions.recognize(source, &image, gallery)?)
}
