//! noteshare-client: network adapters for noteshare-core.
//!
//! - `HttpNoteApi`: the REST collaborator over reqwest
//! - `WsTransport`: the real-time channel over tokio-tungstenite

pub mod config;
pub mod http;
pub mod ws;

pub use config::{Config, ConfigError};
pub use http::{HttpNoteApi, RetryPolicy};
pub use ws::{WsConfig, WsTransport};
