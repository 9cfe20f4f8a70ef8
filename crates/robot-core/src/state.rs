use std::fmt;

/// States of the robot controller.
///
/// ```text
/// IDLE -> CONNECTING        wake word detected
/// CONNECTING -> CONVERSATION session opened
/// CONNECTING -> IDLE        connection failed
/// CONVERSATION -> IDLE      silence timeout, go_away, error or stream end
/// any -> SHUTTING_DOWN      stop requested
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum RobotState {
    #[default]
    Idle,
    Connecting,
    Conversation,
    ShuttingDown,
}

impl RobotState {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Idle => "idle",
            Self::Connecting => "connecting",
            Self::Conversation => "conversation",
            Self::ShuttingDown => "shutting_down",
        }
    }
}

impl fmt::Display for RobotState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
