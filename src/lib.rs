//! Pulsewire SDK
//!
//! This library lets a backend service report logs and metrics to the
//! Pulsewire monitoring service:
//!
//! - **config**: Environment-based SDK configuration (endpoints, timeouts)
//! - **config_store**: The local `.pulsewire.json` credential file
//! - **client**: REST calls for validation, status and reset notification
//! - **transport**: Duplex transport seam with a WebSocket implementation
//! - **channel**: Actor owning the single streaming connection
//! - **event**: Outbound log and metric events and their wire envelope
//! - **session**: The application-owned session tying it all together
//!
//! # Example
//!
//! ```no_run
//! use std::collections::HashMap;
//!
//! use pulsewire::config::Config;
//! use pulsewire::event::LogLevel;
//! use pulsewire::session::{InitOptions, Session};
//!
//! #[tokio::main]
//! async fn main() {
//!     // Load endpoints and timeouts from environment
//!     let config = Config::from_env().expect("Failed to load config");
//!
//!     // Credentials come from PULSEWIRE_API_KEY / PULSEWIRE_INSTANCE_ID
//!     // or the .pulsewire.json written by `pulsewire config`
//!     let mut session = Session::new(config).expect("Failed to create session");
//!     session.init(InitOptions::new()).await.ok();
//!
//!     session.send_log("checkout completed", LogLevel::Info).await;
//!     session.send_metric("checkout_ms", 184.0, HashMap::new()).await;
//! }
//! ```

// Module declarations
pub mod channel;
pub mod client;
pub mod config;
pub mod config_store;
pub mod event;
pub mod session;
pub mod transport;

// Re-export commonly used types at crate root for convenience
pub use channel::{Channel, ChannelOptions, ChannelState};
pub use client::{ClientError, Credentials, StatusResponse, ValidationClient, ValidationResponse};
pub use config::{Config, ConfigError};
pub use config_store::{ensure_gitignore, ConfigStore, ConfigStoreError, StoredConfig};
pub use event::{LogLevel, LogMessage, OutboundEvent};
pub use session::{Entitlement, InitOptions, Session, SessionError};
pub use transport::{Transport, TransportError, WebSocketTransport};
