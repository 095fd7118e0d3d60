//! Application-wide constants for hookwire.
//!
//! Wire-level numbers of the emulated RPC protocol live here so transports
//! and tests agree on them.
//!
//! # Categories
//!
//! - **WebSocket**: loopback port range and origin deny-list
//! - **Local socket**: IPC path naming and frame limits
//! - **Timing**: accept retry delays

use std::time::Duration;

// ============================================================================
// WebSocket
// ============================================================================

/// First loopback port tried by the WebSocket transport.
///
/// Clients probe this range in order, so it must match what they expect.
pub const WS_PORT_START: u16 = 6463;

/// Last loopback port tried by the WebSocket transport (inclusive).
pub const WS_PORT_END: u16 = 6472;

/// Hosts whose origins are rejected even when allow-listed, on any scheme
/// or port.
///
/// The vendor's own hosted web clients talk to the real desktop client.
/// Loopback hosts are rejected as well; they are matched by address rather
/// than listed here.
pub const DENIED_HOSTS: &[&str] = &["discord.com", "ptb.discord.com", "canary.discord.com"];

// ============================================================================
// Local socket
// ============================================================================

/// File name prefix of IPC sockets; the candidate index is appended.
pub const SOCKET_PREFIX: &str = "discord-ipc-";

/// First IPC socket index tried.
pub const SOCKET_INDEX_START: u16 = 0;

/// Last IPC socket index tried (inclusive).
pub const SOCKET_INDEX_END: u16 = 9;

/// Environment variables consulted, in order, for the socket directory.
pub const SOCKET_DIR_VARS: &[&str] = &["XDG_RUNTIME_DIR", "TMPDIR", "TMP", "TEMP"];

/// Fallback socket directory when none of [`SOCKET_DIR_VARS`] is set.
pub const SOCKET_DIR_FALLBACK: &str = "/tmp";

/// Maximum socket path length.
///
/// `sun_path` is 104 bytes on macOS and 108 on Linux; use the smaller one.
pub const MAX_SOCKET_PATH: usize = 104;

/// Maximum IPC frame payload (64 KiB).
pub const MAX_FRAME_SIZE: u32 = 64 * 1024;

/// Size of the per-connection read buffer.
pub const READ_BUFFER_SIZE: usize = 64 * 1024;

// ============================================================================
// Timing
// ============================================================================

/// Delay before accepting again after a failed `accept()`.
///
/// Keeps a persistent error (e.g. fd exhaustion) from spinning the loop.
pub const ACCEPT_RETRY_DELAY: Duration = Duration::from_millis(100);

/// How long a closing connection waits for the peer's close acknowledgement.
pub const CLOSE_HANDSHAKE_TIMEOUT: Duration = Duration::from_secs(1);

/// How long `stop_server()` waits for live connections to wind down.
pub const SHUTDOWN_GRACE: Duration = Duration::from_secs(2);
