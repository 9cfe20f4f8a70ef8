use super::cancel_and_join;
use crate::hardware::Speaker;
use crate::hardware::stubs::read_wav_mono;
use anyhow::{Context, Result, anyhow};
use std::path::Path;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::timeout;

/// Jitter buffering for model speech.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PlaybackConfig {
    pub sample_rate: u32,
    /// Frames collected before the first write to the speaker.
    pub buffer_frames: usize,
    /// Per-frame wait while collecting the initial buffer.
    pub initial_wait: Duration,
    /// Per-frame wait once playback is running; expiry ends the stream.
    pub drain_wait: Duration,
}

impl Default for PlaybackConfig {
    fn default() -> Self {
        Self {
            sample_rate: 24_000,
            buffer_frames: 3,
            initial_wait: Duration::from_secs(1),
            drain_wait: Duration::from_secs(2),
        }
    }
}

/// `None` marks the end of a turn.
type Frame = Option<Vec<u8>>;

/// Buffers frames from the session and drains them to the speaker in arrival order.
pub struct PlaybackPipeline {
    speaker: Arc<dyn Speaker>,
    config: PlaybackConfig,
    playing: Arc<AtomicBool>,
    queue: Option<mpsc::UnboundedSender<Frame>>,
    task: Option<JoinHandle<()>>,
}

impl PlaybackPipeline {
    pub fn new(speaker: Arc<dyn Speaker>, config: PlaybackConfig) -> Self {
        Self {
            speaker,
            config,
            playing: Arc::new(AtomicBool::new(false)),
            queue: None,
            task: None,
        }
    }

    pub fn is_playing(&self) -> bool {
        self.playing.load(Ordering::SeqCst)
    }

    /// Queues one frame, starting the drain loop if none is running.
    pub fn play_chunk(&mut self, frame: Vec<u8>) -> Result<()> {
        if !self.is_playing() || self.queue.is_none() {
            self.start_drain()?;
        }
        let Some(queue) = &self.queue else {
            return Ok(());
        };
        if let Err(mpsc::error::SendError(frame)) = queue.send(Some(frame)) {
            // The previous loop ran out of audio and exited between the check and the send.
            self.start_drain()?;
            if let Some(queue) = &self.queue {
                queue
                    .send(frame)
                    .map_err(|_| anyhow!("playback queue closed before the frame was queued"))?;
            }
        }
        Ok(())
    }

    /// Marks the end of the current turn and waits for everything queued to be played.
    pub async fn flush(&mut self) {
        if let Some(queue) = self.queue.take() {
            let _ = queue.send(None);
        }
        if let Some(task) = self.task.take() {
            if let Err(e) = task.await {
                if !e.is_cancelled() {
                    tracing::error!("Playback task failed: {:?}", e);
                }
            }
        }
    }

    /// Cuts playback off immediately, discarding anything not yet written.
    pub async fn stop(&mut self) {
        self.playing.store(false, Ordering::SeqCst);
        self.queue = None;
        if let Some(task) = self.task.take() {
            cancel_and_join(task, "playback").await;
        }
        if let Err(e) = self.speaker.stop() {
            tracing::warn!("Failed to stop speaker: {:?}", e);
        }
    }

    /// Plays a WAV file straight to the speaker, bypassing the queue.
    pub async fn play_file(&self, path: &Path) -> Result<()> {
        let (samples, file_rate) = read_wav_mono(path)?;
        let speaker = self.speaker.clone();
        let rate = self.config.sample_rate;
        if file_rate != rate {
            tracing::warn!("{} is {} Hz, speaker runs at {} Hz", path.display(), file_rate, rate);
        }
        let chunk = ((rate as usize * 2 / 10).max(1024) / 2) * 2;
        let pcm: Vec<u8> = samples.iter().flat_map(|s| s.to_le_bytes()).collect();

        tokio::task::spawn_blocking(move || -> Result<()> {
            if !speaker.is_open() {
                speaker.open(rate)?;
            }
            for frame in pcm.chunks(chunk) {
                speaker.write_frame(frame)?;
            }
            Ok(())
        })
        .await
        .context("Audio file playback task failed")??;
        tracing::debug!("Played {}", path.display());
        Ok(())
    }

    fn start_drain(&mut self) -> Result<()> {
        if !self.speaker.is_open() {
            self.speaker
                .open(self.config.sample_rate)
                .context("Failed to open speaker")?;
        }
        let (tx, rx) = mpsc::unbounded_channel();
        self.playing.store(true, Ordering::SeqCst);
        self.queue = Some(tx);
        self.task = Some(tokio::spawn(drain_loop(
            self.speaker.clone(),
            rx,
            self.playing.clone(),
            self.config,
        )));
        Ok(())
    }
}

async fn drain_loop(
    speaker: Arc<dyn Speaker>,
    mut rx: mpsc::UnboundedReceiver<Frame>,
    playing: Arc<AtomicBool>,
    config: PlaybackConfig,
) {
    let mut buffered = Vec::with_capacity(config.buffer_frames);
    let mut ended = false;
    while buffered.len() < config.buffer_frames {
        match timeout(config.initial_wait, rx.recv()).await {
            Ok(Some(Some(frame))) => buffered.push(frame),
            Ok(Some(None)) | Ok(None) => {
                ended = true;
                break;
            }
            // Start with whatever arrived.
            Err(_) => break,
        }
    }

    for frame in buffered {
        if !playing.load(Ordering::SeqCst) || !write(&speaker, frame).await {
            playing.store(false, Ordering::SeqCst);
            return;
        }
    }

    let mut starved = false;
    while !ended && playing.load(Ordering::SeqCst) {
        match timeout(config.drain_wait, rx.recv()).await {
            Ok(Some(Some(frame))) => {
                if !write(&speaker, frame).await {
                    break;
                }
            }
            Ok(Some(None)) | Ok(None) => ended = true,
            Err(_) => {
                tracing::debug!("No audio for {:?}, ending playback", config.drain_wait);
                starved = true;
                break;
            }
        }
    }
    playing.store(false, Ordering::SeqCst);
    if starved {
        drain_remaining(&speaker, &mut rx).await;
    }
}

/// Closes the queue and plays whatever was sent before the close landed.
/// Later sends fail, which makes `play_chunk` start a new loop.
async fn drain_remaining(speaker: &Arc<dyn Speaker>, rx: &mut mpsc::UnboundedReceiver<Frame>) {
    rx.close();
    while let Ok(Some(frame)) = rx.try_recv() {
        if !write(speaker, frame).await {
            break;
        }
    }
}

async fn write(speaker: &Arc<dyn Speaker>, frame: Vec<u8>) -> bool {
    let speaker = speaker.clone();
    match tokio::task::spawn_blocking(move || speaker.write_frame(&frame)).await {
        Ok(Ok(())) => true,
        Ok(Err(e)) => {
            tracing::error!("Speaker write failed: {:?}", e);
            false
        }
        Err(e) => {
            tracing::error!("Speaker writer panicked: {:?}", e);
            false
        }
    }
}
