use super::cancel_and_join;
use crate::hardware::Microphone;
use crate::realtime_api::RealtimeSession;
use anyhow::Result;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::task::JoinHandle;

/// Microphone stream parameters.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CaptureFormat {
    pub sample_rate: u32,
    pub channels: u16,
    /// Bytes per frame.
    pub chunk_size: usize,
}

/// Reads microphone frames and forwards them to a connected session.
///
/// A pipeline is bound to one session for the length of one conversation.
pub struct CapturePipeline {
    microphone: Arc<dyn Microphone>,
    session: Arc<dyn RealtimeSession>,
    format: CaptureFormat,
    streaming: Arc<AtomicBool>,
    opened_microphone: bool,
    task: Option<JoinHandle<()>>,
}

impl CapturePipeline {
    pub fn new(
        microphone: Arc<dyn Microphone>,
        session: Arc<dyn RealtimeSession>,
        format: CaptureFormat,
    ) -> Self {
        Self {
            microphone,
            session,
            format,
            streaming: Arc::new(AtomicBool::new(false)),
            opened_microphone: false,
            task: None,
        }
    }

    pub fn is_streaming(&self) -> bool {
        self.streaming.load(Ordering::SeqCst)
    }

    /// Starts streaming. Does nothing if already streaming.
    pub fn start(&mut self) -> Result<()> {
        if self.is_streaming() {
            return Ok(());
        }
        if !self.microphone.is_open() {
            self.microphone.open(
                self.format.sample_rate,
                self.format.channels,
                self.format.chunk_size,
            )?;
            self.opened_microphone = true;
        }

        self.streaming.store(true, Ordering::SeqCst);
        self.task = Some(tokio::spawn(capture_loop(
            self.microphone.clone(),
            self.session.clone(),
            self.streaming.clone(),
        )));
        tracing::info!("Audio capture started");
        Ok(())
    }

    /// Stops streaming, waits for the loop to exit and closes the microphone if
    /// this pipeline opened it.
    pub async fn stop(&mut self) {
        self.streaming.store(false, Ordering::SeqCst);
        if let Some(task) = self.task.take() {
            cancel_and_join(task, "capture").await;
        }
        if self.opened_microphone {
            self.opened_microphone = false;
            if let Err(e) = self.microphone.close() {
                tracing::warn!("Failed to close microphone: {:?}", e);
            }
        }
        tracing::info!("Audio capture stopped");
    }
}

async fn capture_loop(
    microphone: Arc<dyn Microphone>,
    session: Arc<dyn RealtimeSession>,
    streaming: Arc<AtomicBool>,
) {
    while streaming.load(Ordering::SeqCst) {
        let mic = microphone.clone();
        let frame = match tokio::task::spawn_blocking(move || mic.read_frame()).await {
            Ok(Ok(frame)) => frame,
            Ok(Err(e)) => {
                tracing::error!("Audio capture read failed: {:?}", e);
                break;
            }
            Err(e) => {
                tracing::error!("Audio capture reader panicked: {:?}", e);
                break;
            }
        };

        // Frames read while the session is down are dropped.
        if streaming.load(Ordering::SeqCst) && session.is_connected() {
            if let Err(e) = session.send_audio(frame).await {
                tracing::error!("Failed to send audio frame: {:?}", e);
                break;
            }
        }
        tokio::task::yield_now().await;
    }
    streaming.store(false, Ordering::SeqCst);
}
