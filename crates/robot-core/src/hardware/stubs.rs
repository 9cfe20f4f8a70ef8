//! Desktop stand-ins for the robot's hardware, driven by WAV files.

use super::{Camera, Display, Microphone, Speaker};
use crate::error::Error;
use anyhow::{Context, Result};
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::Duration;

/// Smallest byte sequence a JPEG decoder accepts as an image: SOI followed by EOI.
pub const MINIMAL_JPEG: [u8; 4] = [0xFF, 0xD8, 0xFF, 0xD9];

/// Reads a WAV file into mono PCM16 samples.
pub fn read_wav_mono(path: &Path) -> Result<(Vec<i16>, u32)> {
    let mut reader = hound::WavReader::open(path)
        .with_context(|| format!("Failed to open WAV file {}", path.display()))?;
    let spec = reader.spec();
    let interleaved: Vec<i16> = match spec.sample_format {
        hound::SampleFormat::Int => reader
            .samples::<i16>()
            .collect::<Result<_, _>>()
            .context("Failed to decode PCM16 samples")?,
        hound::SampleFormat::Float => reader
            .samples::<f32>()
            .map(|s| s.map(|v| (v.clamp(-1.0, 1.0) * i16::MAX as f32) as i16))
            .collect::<Result<_, _>>()
            .context("Failed to decode float samples")?,
    };
    let channels = spec.channels.max(1) as usize;
    let mono = if channels > 1 {
        interleaved
            .chunks(channels)
            .map(|c| (c.iter().map(|&s| s as i32).sum::<i32>() / c.len() as i32) as i16)
            .collect()
    } else {
        interleaved
    };
    Ok((mono, spec.sample_rate))
}

/// Writes little-endian PCM16 mono bytes to a WAV file.
pub fn write_wav_mono(path: &Path, pcm: &[u8], sample_rate: u32) -> Result<()> {
    let spec = hound::WavSpec {
        channels: 1,
        sample_rate,
        bits_per_sample: 16,
        sample_format: hound::SampleFormat::Int,
    };
    let mut writer = hound::WavWriter::create(path, spec)
        .with_context(|| format!("Failed to create WAV file {}", path.display()))?;
    for pair in pcm.chunks_exact(2) {
        writer.write_sample(i16::from_le_bytes([pair[0], pair[1]]))?;
    }
    writer.finalize().context("Failed to finalize WAV file")?;
    Ok(())
}

#[derive(Default)]
struct MicState {
    open: bool,
    samples: Vec<i16>,
    position: usize,
    chunk_size: usize,
    frame_duration: Duration,
}

/// Microphone that loops a WAV file, or produces silence when none is given.
pub struct StubMicrophone {
    source: Option<PathBuf>,
    paced: bool,
    state: Mutex<MicState>,
}

impl StubMicrophone {
    pub fn new(source: Option<PathBuf>) -> Self {
        Self {
            source,
            paced: true,
            state: Mutex::new(MicState::default()),
        }
    }

    /// Disables the real-time sleep between frames.
    pub fn unpaced(mut self) -> Self {
        self.paced = false;
        self
    }
}

impl Microphone for StubMicrophone {
    fn open(&self, sample_rate: u32, _channels: u16, chunk_size: usize) -> Result<()> {
        let samples = match &self.source {
            Some(path) => {
                let (samples, file_rate) = read_wav_mono(path)?;
                if file_rate != sample_rate {
                    tracing::warn!(
                        "Stub microphone source is {} Hz, stream is {} Hz; playing unresampled",
                        file_rate,
                        sample_rate
                    );
                }
                samples
            }
            None => Vec::new(),
        };
        let mut state = self.state.lock().map_err(|_| anyhow::anyhow!("microphone lock poisoned"))?;
        let samples_per_frame = (chunk_size / 2).max(1) as f64;
        *state = MicState {
            open: true,
            samples,
            position: 0,
            chunk_size,
            frame_duration: Duration::from_secs_f64(samples_per_frame / sample_rate.max(1) as f64),
        };
        tracing::info!(
            "Stub microphone opened ({} Hz, {} bytes per frame)",
            sample_rate,
            chunk_size
        );
        Ok(())
    }

    fn read_frame(&self) -> Result<Vec<u8>> {
        let (frame, pause) = {
            let mut state = self.state.lock().map_err(|_| anyhow::anyhow!("microphone lock poisoned"))?;
            if !state.open {
                return Err(Error::StreamNotOpen("input").into());
            }
            let wanted = state.chunk_size / 2;
            let mut frame = Vec::with_capacity(state.chunk_size);
            if state.samples.is_empty() {
                frame.resize(state.chunk_size, 0);
            } else {
                for _ in 0..wanted {
                    let sample = state.samples[state.position];
                    frame.extend_from_slice(&sample.to_le_bytes());
                    state.position = (state.position + 1) % state.samples.len();
                }
            }
            (frame, state.frame_duration)
        };
        if self.paced {
            std::thread::sleep(pause);
        }
        Ok(frame)
    }

    fn close(&self) -> Result<()> {
        if let Ok(mut state) = self.state.lock() {
            state.open = false;
        }
        Ok(())
    }

    fn is_open(&self) -> bool {
        self.state.lock().map(|s| s.open).unwrap_or(false)
    }
}

/// Speaker that records everything written to it, optionally saving a WAV on close.
pub struct StubSpeaker {
    output: Option<PathBuf>,
    open: AtomicBool,
    sample_rate: Mutex<u32>,
    recorded: Mutex<Vec<u8>>,
    stops: AtomicUsize,
}

impl StubSpeaker {
    pub fn new(output: Option<PathBuf>) -> Self {
        Self {
            output,
            open: AtomicBool::new(false),
            sample_rate: Mutex::new(24_000),
            recorded: Mutex::new(Vec::new()),
            stops: AtomicUsize::new(0),
        }
    }

    /// Every byte written since creation.
    pub fn recorded(&self) -> Vec<u8> {
        self.recorded.lock().map(|r| r.clone()).unwrap_or_default()
    }

    /// How many times `stop` has been called.
    pub fn stop_count(&self) -> usize {
        self.stops.load(Ordering::SeqCst)
    }
}

impl Speaker for StubSpeaker {
    fn open(&self, sample_rate: u32) -> Result<()> {
        if let Ok(mut rate) = self.sample_rate.lock() {
            *rate = sample_rate;
        }
        self.open.store(true, Ordering::SeqCst);
        tracing::info!("Stub speaker opened ({} Hz)", sample_rate);
        Ok(())
    }

    fn write_frame(&self, frame: &[u8]) -> Result<()> {
        if !self.open.load(Ordering::SeqCst) {
            return Err(Error::StreamNotOpen("output").into());
        }
        self.recorded
            .lock()
            .map_err(|_| anyhow::anyhow!("speaker lock poisoned"))?
            .extend_from_slice(frame);
        Ok(())
    }

    fn stop(&self) -> Result<()> {
        self.stops.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    fn close(&self) -> Result<()> {
        if !self.open.swap(false, Ordering::SeqCst) {
            return Ok(());
        }
        if let Some(path) = &self.output {
            let rate = self.sample_rate.lock().map(|r| *r).unwrap_or(24_000);
            let recorded = self.recorded();
            write_wav_mono(path, &recorded, rate)?;
            tracing::info!("Stub speaker wrote {} bytes to {}", recorded.len(), path.display());
        }
        Ok(())
    }

    fn is_open(&self) -> bool {
        self.open.load(Ordering::SeqCst)
    }
}

/// Display that prints to stdout and remembers what it last showed.
#[derive(Default)]
pub struct StubDisplay {
    last_text: Mutex<Option<String>>,
    last_status: Mutex<Option<String>>,
}

impl StubDisplay {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn last_text(&self) -> Option<String> {
        self.last_text.lock().ok().and_then(|t| t.clone())
    }

    pub fn last_status(&self) -> Option<String> {
        self.last_status.lock().ok().and_then(|s| s.clone())
    }
}

impl Display for StubDisplay {
    fn show_text(&self, text: &str) -> Result<()> {
        println!("[display] {text}");
        if let Ok(mut last) = self.last_text.lock() {
            *last = Some(text.to_string());
        }
        Ok(())
    }

    fn show_status(&self, status: &str) -> Result<()> {
        println!("[status] {status}");
        if let Ok(mut last) = self.last_status.lock() {
            *last = Some(status.to_string());
        }
        Ok(())
    }

    fn clear(&self) -> Result<()> {
        if let Ok(mut last) = self.last_text.lock() {
            *last = None;
        }
        if let Ok(mut last) = self.last_status.lock() {
            *last = None;
        }
        Ok(())
    }
}

/// Camera that returns the bytes of an image file, or a minimal JPEG.
pub struct StubCamera {
    image: Option<PathBuf>,
}

impl StubCamera {
    pub fn new(image: Option<PathBuf>) -> Self {
        Self { image }
    }
}

impl Camera for StubCamera {
    fn capture_frame(&self) -> Result<Vec<u8>> {
        match &self.image {
            Some(path) => std::fs::read(path)
                .with_context(|| format!("Failed to read camera image {}", path.display())),
            None => Ok(MINIMAL_JPEG.to_vec()),
        }
    }

    fn is_available(&self) -> bool {
        true
    }
}
