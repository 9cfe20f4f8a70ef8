pub mod audio;
pub mod controller;
pub mod error;
pub mod generic_types;
pub mod hardware;
pub mod personality;
pub mod realtime_api;
pub mod settings;
pub mod state;
pub mod tools;
pub mod wake_word;

pub use controller::{ControllerHandle, RobotController, RobotControllerBuilder};
pub use error::Error;
pub use generic_types::{NormalizedMessage, ToolArgs, ToolResult};
pub use realtime_api::{RealtimeSession, SessionConfig, SessionFactory, VadSensitivity};
pub use settings::RobotSettings;
pub use state::RobotState;
