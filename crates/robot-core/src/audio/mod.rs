//! Streaming audio between the hardware and a realtime session.

pub mod capture;
pub mod playback;

pub use capture::{CaptureFormat, CapturePipeline};
pub use playback::{PlaybackConfig, PlaybackPipeline};

use tokio::task::JoinHandle;

/// Cancels a background task and waits for it to unwind.
pub(crate) async fn cancel_and_join(task: JoinHandle<()>, name: &str) {
    task.abort();
    match task.await {
        Ok(()) => {}
        Err(e) if e.is_cancelled() => tracing::debug!("{} task cancelled", name),
        Err(e) => tracing::error!("{} task failed: {:?}", name, e),
    }
}
