//! Wake-word detection on the open microphone stream.

pub mod energy;

use crate::audio::{CaptureFormat, cancel_and_join};
use crate::hardware::Microphone;
use anyhow::{Context, Result};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use tokio::task::JoinHandle;

pub use energy::EnergyWakeModel;

/// Samples per detector frame (80 ms at 16 kHz).
pub const DETECTOR_FRAME_SAMPLES: usize = 1280;
pub const DETECTOR_FRAME_BYTES: usize = DETECTOR_FRAME_SAMPLES * 2;

/// A frame-by-frame keyword classifier.
pub trait WakeWordModel: Send {
    /// Scores one detector frame, returning a score in 0..1 per wake-word model.
    fn predict(&mut self, frame: &[i16]) -> Result<HashMap<String, f32>>;
    /// Clears any activation history.
    fn reset(&mut self);
}

/// Loads a classifier. Called on every `start`.
pub type ModelLoader = Arc<dyn Fn() -> Result<Box<dyn WakeWordModel>> + Send + Sync>;

pub type WakeCallback = Arc<dyn Fn() + Send + Sync>;

type SharedModel = Arc<Mutex<Option<Box<dyn WakeWordModel>>>>;

pub struct WakeWordMonitor {
    microphone: Arc<dyn Microphone>,
    loader: ModelLoader,
    format: CaptureFormat,
    threshold: f32,
    model: SharedModel,
    running: Arc<AtomicBool>,
    paused: Arc<AtomicBool>,
    task: tokio::sync::Mutex<Option<JoinHandle<()>>>,
}

impl WakeWordMonitor {
    pub fn new(
        microphone: Arc<dyn Microphone>,
        loader: ModelLoader,
        format: CaptureFormat,
        threshold: f32,
    ) -> Self {
        Self {
            microphone,
            loader,
            format,
            threshold,
            model: Arc::new(Mutex::new(None)),
            running: Arc::new(AtomicBool::new(false)),
            paused: Arc::new(AtomicBool::new(false)),
            task: tokio::sync::Mutex::new(None),
        }
    }

    /// Starts listening. Calling it while already running does nothing.
    pub async fn start(&self, on_wake: WakeCallback) -> Result<()> {
        let mut task = self.task.lock().await;
        if self.running.load(Ordering::SeqCst) {
            return Ok(());
        }

        if !self.microphone.is_open() {
            self.microphone
                .open(
                    self.format.sample_rate,
                    self.format.channels,
                    self.format.chunk_size,
                )
                .context("Failed to open microphone for wake word detection")?;
        }

        let loader = self.loader.clone();
        let model = tokio::task::spawn_blocking(move || loader())
            .await
            .context("Wake word model loader panicked")?
            .context("Failed to load wake word model")?;
        if let Ok(mut slot) = self.model.lock() {
            *slot = Some(model);
        }

        self.paused.store(false, Ordering::SeqCst);
        self.running.store(true, Ordering::SeqCst);
        *task = Some(tokio::spawn(detection_loop(
            self.microphone.clone(),
            self.model.clone(),
            self.running.clone(),
            self.paused.clone(),
            self.threshold,
            on_wake,
        )));
        tracing::info!("Wake word monitor started (threshold {})", self.threshold);
        Ok(())
    }

    /// Stops listening, closes the microphone and releases the model. Idempotent.
    pub async fn stop(&self) {
        let mut task = self.task.lock().await;
        let was_running = self.running.swap(false, Ordering::SeqCst);
        if let Some(handle) = task.take() {
            cancel_and_join(handle, "wake word").await;
        }
        if self.microphone.is_open() {
            if let Err(e) = self.microphone.close() {
                tracing::warn!("Failed to close microphone: {:?}", e);
            }
        }
        if let Ok(mut slot) = self.model.lock() {
            *slot = None;
        }
        if was_running {
            tracing::info!("Wake word monitor stopped");
        }
    }

    /// Stops scoring without closing the stream.
    pub fn pause(&self) {
        self.paused.store(true, Ordering::SeqCst);
        self.reset_model();
    }

    pub fn resume(&self) {
        self.paused.store(false, Ordering::SeqCst);
        self.reset_model();
    }

    pub fn is_listening(&self) -> bool {
        self.running.load(Ordering::SeqCst) && !self.paused.load(Ordering::SeqCst)
    }

    fn reset_model(&self) {
        if let Ok(mut slot) = self.model.lock() {
            if let Some(model) = slot.as_mut() {
                model.reset();
            }
        }
    }
}

async fn detection_loop(
    microphone: Arc<dyn Microphone>,
    model: SharedModel,
    running: Arc<AtomicBool>,
    paused: Arc<AtomicBool>,
    threshold: f32,
    on_wake: WakeCallback,
) {
    let mut buffer: Vec<u8> = Vec::with_capacity(DETECTOR_FRAME_BYTES * 2);
    while running.load(Ordering::SeqCst) {
        let mic = microphone.clone();
        let chunk = match tokio::task::spawn_blocking(move || mic.read_frame()).await {
            Ok(Ok(chunk)) => chunk,
            Ok(Err(e)) => {
                tracing::error!("Wake word microphone read failed: {:?}", e);
                break;
            }
            Err(e) => {
                tracing::error!("Wake word reader panicked: {:?}", e);
                break;
            }
        };

        // Keep draining the stream while paused so the device never backs up.
        if paused.load(Ordering::SeqCst) {
            buffer.clear();
            continue;
        }

        buffer.extend_from_slice(&chunk);
        while buffer.len() >= DETECTOR_FRAME_BYTES {
            let frame: Vec<i16> = buffer
                .drain(..DETECTOR_FRAME_BYTES)
                .collect::<Vec<u8>>()
                .chunks_exact(2)
                .map(|p| i16::from_le_bytes([p[0], p[1]]))
                .collect();

            let scores = match score(&model, frame).await {
                Ok(scores) => scores,
                Err(e) => {
                    tracing::error!("Wake word inference failed: {:?}", e);
                    running.store(false, Ordering::SeqCst);
                    return;
                }
            };

            if let Some((name, value)) = scores.iter().find(|(_, v)| **v >= threshold) {
                tracing::info!(model = %name, score = value, "Wake word detected");
                on_wake();
                if let Ok(mut slot) = model.lock() {
                    if let Some(m) = slot.as_mut() {
                        m.reset();
                    }
                }
                buffer.clear();
                break;
            }
        }
    }
    running.store(false, Ordering::SeqCst);
}

async fn score(model: &SharedModel, frame: Vec<i16>) -> Result<HashMap<String, f32>> {
    let model = model.clone();
    tokio::task::spawn_blocking(move || {
        let mut slot = model
            .lock()
            .map_err(|_| anyhow::anyhow!("wake word model lock poisoned"))?;
        match slot.as_mut() {
            Some(m) => m.predict(&frame),
            None => Ok(HashMap::new()),
        }
    })
    .await
    .context("Wake word inference panicked")?
}

/// A loader that always builds an [`EnergyWakeModel`] for `name`.
pub fn energy_loader(name: impl Into<String>) -> ModelLoader {
    let name = name.into();
    Arc::new(move || Ok(Box::new(EnergyWakeModel::new(name.clone())) as Box<dyn WakeWordModel>))
}
