//! hookwire - local RPC bridge for desktop-client RPC packets.
//!
//! Third-party clients (web pages, local processes) talk to hookwire as if
//! it were the official desktop client. Every inbound packet is validated
//! against a fixed catalog and routed to user-registered hooks, which may
//! accept it (a default acknowledgement is sent) or close the connection
//! with a status code.
//!
//! # Architecture
//!
//! - **Catalog** - Recognized packet shapes, default responses, close codes
//! - **Hooks** - Per-kind callback registry with an activity flag
//! - **Engine** - Owns the registry and logger; irreversible destroy
//! - **Dispatch** - Frame decoding and hook fan-out, shared by transports
//! - **Transports** - Loopback WebSocket and Unix socket listeners
//!
//! # Modules
//!
//! - [`protocol`] - Packet catalog and validation
//! - [`hooks`] - Hook registry
//! - [`engine`] - Protocol engine and lifecycle
//! - [`transport`] - WebSocket and IPC socket transports
//! - [`config`] - Configuration loading/saving

// Library modules
pub mod dispatch;
pub mod engine;
pub mod hooks;
pub mod negotiate;
pub mod protocol;
pub mod transport;

pub mod config;
pub mod constants;
pub mod error;
pub mod logging;

// Re-export commonly used types
pub use config::Config;
pub use engine::{Engine, EngineBuilder, ServerDetail};
pub use error::{EngineError, EngineResult};
pub use hooks::{Hook, HookFuture};
pub use logging::{BadgeColor, DebugFilter, Logger, LoggerConfig};
pub use negotiate::CandidateRange;
pub use protocol::{HookName, Message};
pub use transport::websocket::{OriginPolicy, WsServer};
pub use transport::Transport;

#[cfg(unix)]
pub use transport::socket::SocketServer;
