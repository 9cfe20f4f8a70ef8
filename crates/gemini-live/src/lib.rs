mod client;
pub mod types;

pub use client::config::{Config, ConfigBuilder};
pub use client::{Client, ClientTx, ServerRx, connect_with_config};
pub use types::ServerEvent;
