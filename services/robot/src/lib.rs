pub mod config;
pub mod gemini_adapter;
pub mod hardware;
pub mod tool_loader;
