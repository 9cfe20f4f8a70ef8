//! Capability traits for the robot's hardware.
//!
//! Implementations are handed to the controller at construction time. Calls that may
//! block (`Microphone::read_frame`, `Speaker::write_frame`) are always issued from
//! `tokio::task::spawn_blocking`, so implementations are free to block.

pub mod stubs;

use anyhow::Result;
use std::sync::Arc;

pub trait Microphone: Send + Sync {
    /// Opens the input stream. `chunk_size` is the frame size in bytes of PCM16 mono.
    fn open(&self, sample_rate: u32, channels: u16, chunk_size: usize) -> Result<()>;
    /// Blocks until one full frame is available.
    fn read_frame(&self) -> Result<Vec<u8>>;
    fn close(&self) -> Result<()>;
    fn is_open(&self) -> bool;
}

pub trait Speaker: Send + Sync {
    fn open(&self, sample_rate: u32) -> Result<()>;
    /// Blocks until the frame has been handed to the device.
    fn write_frame(&self, frame: &[u8]) -> Result<()>;
    /// Drops anything the device still has buffered.
    fn stop(&self) -> Result<()>;
    fn close(&self) -> Result<()>;
    fn is_open(&self) -> bool;
}

pub trait Display: Send + Sync {
    fn show_text(&self, text: &str) -> Result<()>;
    fn show_status(&self, status: &str) -> Result<()>;
    fn clear(&self) -> Result<()>;
}

pub trait Camera: Send + Sync {
    /// Captures one frame as an encoded JPEG.
    fn capture_frame(&self) -> Result<Vec<u8>>;
    fn is_available(&self) -> bool;
}

/// The set of capabilities a controller drives. Display and camera are optional.
#[derive(Clone)]
pub struct Hardware {
    pub microphone: Arc<dyn Microphone>,
    pub speaker: Arc<dyn Speaker>,
    pub display: Option<Arc<dyn Display>>,
    pub camera: Option<Arc<dyn Camera>>,
}

impl Hardware {
    /// Shows a status line if a display is attached. Display errors are logged only.
    pub fn status(&self, status: &str) {
        if let Some(display) = &self.display {
            if let Err(e) = display.show_status(status) {
                tracing::warn!("Failed to show status '{}': {:?}", status, e);
            }
        }
    }

    /// Shows text if a display is attached. Display errors are logged only.
    pub fn text(&self, text: &str) {
        if let Some(display) = &self.display {
            if let Err(e) = display.show_text(text) {
                tracing::warn!("Failed to show text: {:?}", e);
            }
        }
    }
}
