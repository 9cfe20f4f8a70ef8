//! cpal-backed microphone and speaker.
//!
//! A cpal stream is not `Send` on every host, so each one lives on its own thread
//! for as long as it is open. The microphone callback forwards mono samples over a
//! channel; the speaker callback drains a ring buffer.

use crate::config::OUTPUT_LATENCY_MS;
use anyhow::{Context, Result, anyhow};
use cpal::traits::{DeviceTrait, StreamTrait};
use ringbuf::traits::{Consumer, Producer, Split};
use ringbuf::{HeapCons, HeapProd};
use robot_core::Error;
use robot_core::hardware::{Microphone, Speaker};
use robot_native_utils::audio::{
    StreamResampler, downmix, f32_to_pcm16_bytes, pcm16_bytes_to_f32, shared_buffer,
};
use robot_native_utils::device;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::mpsc::{Receiver, SyncSender};
use std::sync::{Arc, Mutex};
use std::time::Duration;

/// Device-side format of an opened stream.
#[derive(Debug, Clone, Copy)]
struct StreamInfo {
    sample_rate: u32,
    channels: usize,
}

/// Owns the thread a cpal stream lives on.
struct StreamWorker {
    stop: std::sync::mpsc::Sender<()>,
    thread: std::thread::JoinHandle<()>,
}

impl StreamWorker {
    /// Runs `build` on a new thread and keeps the stream playing until `shutdown`.
    fn spawn<F>(name: &str, build: F) -> Result<(Self, StreamInfo)>
    where
        F: FnOnce() -> Result<(cpal::Stream, StreamInfo)> + Send + 'static,
    {
        let (ready_tx, ready_rx) = std::sync::mpsc::channel::<Result<StreamInfo, String>>();
        let (stop_tx, stop_rx) = std::sync::mpsc::channel::<()>();
        let thread = std::thread::Builder::new()
            .name(name.to_string())
            .spawn(move || {
                let started = build().and_then(|(stream, info)| {
                    stream.play().context("Failed to start audio stream")?;
                    Ok((stream, info))
                });
                match started {
                    Ok((stream, info)) => {
                        let _ = ready_tx.send(Ok(info));
                        // Either a stop request or the owner going away ends the stream.
                        let _ = stop_rx.recv();
                        drop(stream);
                    }
                    Err(e) => {
                        let _ = ready_tx.send(Err(format!("{e:#}")));
                    }
                }
            })
            .context("Failed to spawn audio thread")?;

        match ready_rx.recv() {
            Ok(Ok(info)) => Ok((
                Self {
                    stop: stop_tx,
                    thread,
                },
                info,
            )),
            Ok(Err(e)) => {
                let _ = thread.join();
                Err(anyhow!(e))
            }
            Err(_) => Err(anyhow!("audio thread exited before the stream started")),
        }
    }

    fn shutdown(self) {
        let _ = self.stop.send(());
        if self.thread.join().is_err() {
            tracing::error!("Audio thread panicked");
        }
    }
}

struct CaptureBuffer {
    samples: Receiver<Vec<f32>>,
    resampler: StreamResampler,
    pending: Vec<u8>,
    chunk_size: usize,
}

/// Microphone on a cpal input device.
pub struct CpalMicrophone {
    device_name: Option<String>,
    worker: Mutex<Option<StreamWorker>>,
    buffer: Mutex<Option<CaptureBuffer>>,
}

impl CpalMicrophone {
    pub fn new(device_name: Option<String>) -> Self {
        Self {
            device_name,
            worker: Mutex::new(None),
            buffer: Mutex::new(None),
        }
    }
}

fn build_input_stream(
    device_name: Option<String>,
    samples: SyncSender<Vec<f32>>,
) -> Result<(cpal::Stream, StreamInfo)> {
    let input = device::get_or_default_input(device_name.as_deref())?;
    tracing::info!("Using input device: {:?}", input.name()?);
    let config: cpal::StreamConfig = input
        .default_input_config()
        .context("Failed to get default input config")?
        .into();
    let info = StreamInfo {
        sample_rate: config.sample_rate.0,
        channels: config.channels as usize,
    };
    tracing::debug!("Input stream config: {:?}", &config);

    let channels = info.channels;
    let stream = input.build_input_stream(
        &config,
        move |data: &[f32], _: &cpal::InputCallbackInfo| {
            if let Err(e) = samples.try_send(downmix(data, channels)) {
                tracing::warn!("Dropping microphone samples: {:?}", e);
            }
        },
        move |err| tracing::error!("An error occurred on input stream: {}", err),
        None,
    )?;
    Ok((stream, info))
}

impl Microphone for CpalMicrophone {
    fn open(&self, sample_rate: u32, channels: u16, chunk_size: usize) -> Result<()> {
        let mut worker = self
            .worker
            .lock()
            .map_err(|_| anyhow!("microphone state poisoned"))?;
        if worker.is_some() {
            return Ok(());
        }
        if channels != 1 {
            tracing::warn!("Only mono capture is supported; downmixing to 1 channel");
        }

        let (tx, rx) = std::sync::mpsc::sync_channel(64);
        let device_name = self.device_name.clone();
        let (started, info) =
            StreamWorker::spawn("robot-mic", move || build_input_stream(device_name, tx))?;
        let resampler = StreamResampler::new(info.sample_rate, sample_rate, 1024)?;
        *self
            .buffer
            .lock()
            .map_err(|_| anyhow!("microphone buffer poisoned"))? = Some(CaptureBuffer {
            samples: rx,
            resampler,
            pending: Vec::with_capacity(chunk_size * 2),
            chunk_size,
        });
        *worker = Some(started);
        tracing::info!(
            device_rate = info.sample_rate,
            rate = sample_rate,
            chunk_size,
            "Microphone opened"
        );
        Ok(())
    }

    fn read_frame(&self) -> Result<Vec<u8>> {
        let mut guard = self
            .buffer
            .lock()
            .map_err(|_| anyhow!("microphone buffer poisoned"))?;
        let buffer = guard.as_mut().ok_or(Error::StreamNotOpen("microphone"))?;
        while buffer.pending.len() < buffer.chunk_size {
            let samples = buffer
                .samples
                .recv()
                .map_err(|_| Error::StreamNotOpen("microphone"))?;
            let resampled = buffer.resampler.process(&samples)?;
            buffer.pending.extend(f32_to_pcm16_bytes(&resampled));
        }
        Ok(buffer.pending.drain(..buffer.chunk_size).collect())
    }

    fn close(&self) -> Result<()> {
        let worker = self
            .worker
            .lock()
            .map_err(|_| anyhow!("microphone state poisoned"))?
            .take();
        if let Some(worker) = worker {
            // Stopping the stream drops the sender, which wakes any blocked read.
            worker.shutdown();
            tracing::info!("Microphone closed");
        }
        if let Ok(mut buffer) = self.buffer.lock() {
            *buffer = None;
        }
        Ok(())
    }

    fn is_open(&self) -> bool {
        self.worker.lock().map(|w| w.is_some()).unwrap_or(false)
    }
}

struct PlaybackBuffer {
    producer: HeapProd<f32>,
    resampler: StreamResampler,
}

/// Speaker on a cpal output device.
pub struct CpalSpeaker {
    device_name: Option<String>,
    worker: Mutex<Option<StreamWorker>>,
    buffer: Mutex<Option<PlaybackBuffer>>,
    flush: Arc<AtomicBool>,
    generation: AtomicU64,
}

impl CpalSpeaker {
    pub fn new(device_name: Option<String>) -> Self {
        Self {
            device_name,
            worker: Mutex::new(None),
            buffer: Mutex::new(None),
            flush: Arc::new(AtomicBool::new(false)),
            generation: AtomicU64::new(0),
        }
    }
}

fn build_output_stream(
    device_name: Option<String>,
    producer_slot: Arc<Mutex<Option<HeapProd<f32>>>>,
    flush: Arc<AtomicBool>,
) -> Result<(cpal::Stream, StreamInfo)> {
    let output = device::get_or_default_output(device_name.as_deref())?;
    tracing::info!("Using output device: {:?}", output.name()?);
    let config: cpal::StreamConfig = output
        .default_output_config()
        .context("Failed to get default output config")?
        .into();
    let info = StreamInfo {
        sample_rate: config.sample_rate.0,
        channels: config.channels as usize,
    };
    tracing::debug!("Output stream config: {:?}", &config);

    let ring = shared_buffer(info.sample_rate as usize * OUTPUT_LATENCY_MS / 1000);
    let (producer, mut consumer): (HeapProd<f32>, HeapCons<f32>) = ring.split();
    *producer_slot
        .lock()
        .map_err(|_| anyhow!("speaker buffer poisoned"))? = Some(producer);

    let channels = info.channels.max(1);
    let stream = output.build_output_stream(
        &config,
        move |data: &mut [f32], _: &cpal::OutputCallbackInfo| {
            if flush.swap(false, Ordering::SeqCst) {
                consumer.clear();
            }
            for frame in data.chunks_mut(channels) {
                let sample = consumer.try_pop().unwrap_or(0.0);
                frame.fill(sample);
            }
        },
        move |err| tracing::error!("An error occurred on output stream: {}", err),
        None,
    )?;
    Ok((stream, info))
}

impl Speaker for CpalSpeaker {
    fn open(&self, sample_rate: u32) -> Result<()> {
        let mut worker = self
            .worker
            .lock()
            .map_err(|_| anyhow!("speaker state poisoned"))?;
        if worker.is_some() {
            return Ok(());
        }

        let producer_slot = Arc::new(Mutex::new(None));
        let device_name = self.device_name.clone();
        let flush = self.flush.clone();
        let slot = producer_slot.clone();
        let (started, info) = StreamWorker::spawn("robot-speaker", move || {
            build_output_stream(device_name, slot, flush)
        })?;
        let producer = producer_slot
            .lock()
            .map_err(|_| anyhow!("speaker buffer poisoned"))?
            .take()
            .ok_or_else(|| anyhow!("output stream started without a buffer"))?;

        *self
            .buffer
            .lock()
            .map_err(|_| anyhow!("speaker buffer poisoned"))? = Some(PlaybackBuffer {
            producer,
            resampler: StreamResampler::new(sample_rate, info.sample_rate, 1024)?,
        });
        *worker = Some(started);
        tracing::info!(
            rate = sample_rate,
            device_rate = info.sample_rate,
            "Speaker opened"
        );
        Ok(())
    }

    fn write_frame(&self, frame: &[u8]) -> Result<()> {
        let generation = self.generation.load(Ordering::SeqCst);
        let mut guard = self
            .buffer
            .lock()
            .map_err(|_| anyhow!("speaker buffer poisoned"))?;
        let buffer = guard.as_mut().ok_or(Error::StreamNotOpen("speaker"))?;
        let samples = buffer.resampler.process(&pcm16_bytes_to_f32(frame))?;

        let mut offset = 0;
        while offset < samples.len() {
            offset += buffer.producer.push_slice(&samples[offset..]);
            if offset < samples.len() {
                if self.generation.load(Ordering::SeqCst) != generation {
                    // Stopped while waiting for room; the rest is discarded.
                    break;
                }
                std::thread::sleep(Duration::from_millis(5));
            }
        }
        Ok(())
    }

    fn stop(&self) -> Result<()> {
        self.generation.fetch_add(1, Ordering::SeqCst);
        self.flush.store(true, Ordering::SeqCst);
        if let Ok(mut buffer) = self.buffer.lock() {
            if let Some(buffer) = buffer.as_mut() {
                buffer.resampler.reset();
            }
        }
        Ok(())
    }

    fn close(&self) -> Result<()> {
        self.generation.fetch_add(1, Ordering::SeqCst);
        let worker = self
            .worker
            .lock()
            .map_err(|_| anyhow!("speaker state poisoned"))?
            .take();
        if let Some(worker) = worker {
            worker.shutdown();
            tracing::info!("Speaker closed");
        }
        if let Ok(mut buffer) = self.buffer.lock() {
            *buffer = None;
        }
        self.flush.store(false, Ordering::SeqCst);
        Ok(())
    }

    fn is_open(&self) -> bool {
        self.worker.lock().map(|w| w.is_some()).unwrap_or(false)
    }
}
