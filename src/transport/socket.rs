//! Unix domain socket transport.
//!
//! Listens on `<runtime dir>/discord-ipc-<n>` for the first free `n` in the
//! configured index range and speaks the opcode-framed protocol from
//! [`super::framing`]. A candidate path is busy while another process
//! accepts connections on it; a socket file nobody listens on is stale and
//! gets replaced.
//!
//! Each accepted connection receives the READY event in a FRAME, then:
//! - HANDSHAKE is acknowledged silently
//! - FRAME payloads are dispatched to the engine
//! - PING is answered with a PONG carrying the same payload
//! - CLOSE ends the connection

use std::ffi::OsString;
use std::io;
use std::os::unix::fs::FileTypeExt;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, PoisonError};

use anyhow::{Context, Result};
use async_trait::async_trait;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::unix::OwnedWriteHalf;
use tokio::net::{UnixListener, UnixStream};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;

use super::framing::{Frame, FrameDecoder, Opcode};
use super::{connection_id, Transport};
use crate::constants::{
    ACCEPT_RETRY_DELAY, MAX_SOCKET_PATH, READ_BUFFER_SIZE, SHUTDOWN_GRACE, SOCKET_DIR_FALLBACK,
    SOCKET_DIR_VARS, SOCKET_PREFIX,
};
use crate::dispatch::{dispatch, Inbound, Outcome};
use crate::engine::{Engine, ServerDetail};
use crate::error::EngineResult;
use crate::logging::Logger;
use crate::negotiate::CandidateRange;
use crate::protocol::{is_text, ready_event, CloseCode};

/// Directory holding IPC sockets, from the environment.
pub fn default_socket_dir() -> PathBuf {
    resolve_socket_dir(|key| std::env::var_os(key))
}

/// First non-empty directory among [`SOCKET_DIR_VARS`], else `/tmp`.
fn resolve_socket_dir(lookup: impl Fn(&str) -> Option<OsString>) -> PathBuf {
    SOCKET_DIR_VARS
        .iter()
        .filter_map(|key| lookup(key))
        .find(|value| !value.is_empty())
        .map_or_else(|| PathBuf::from(SOCKET_DIR_FALLBACK), PathBuf::from)
}

/// Socket path for candidate `index` inside `dir`.
pub fn socket_path(dir: &Path, index: u16) -> PathBuf {
    dir.join(format!("{SOCKET_PREFIX}{index}"))
}

/// Unix socket server bound to a negotiated IPC path.
#[derive(Debug)]
pub struct SocketServer {
    engine: Arc<Engine>,
    path: PathBuf,
    shutdown: CancellationToken,
    tracker: TaskTracker,
    accept_handle: Mutex<Option<JoinHandle<()>>>,
}

impl SocketServer {
    /// Negotiate a socket path in `dir` over `indices`, bind it and start
    /// accepting.
    ///
    /// # Errors
    ///
    /// Returns an error if every candidate path is busy or unusable.
    pub async fn start(engine: Engine, indices: CandidateRange, dir: &Path) -> Result<Self> {
        let engine = Arc::new(engine);
        let logger = engine.logger()?;

        let (_, (path, listener)) = engine
            .negotiate(
                indices,
                |index| bind_candidate(socket_path(dir, index)),
                |_, bound: &(PathBuf, UnixListener)| ServerDetail::Path(bound.0.clone()),
            )
            .await
            .with_context(|| format!("Failed to bind IPC socket in {}", dir.display()))?;

        let shutdown = CancellationToken::new();
        let tracker = TaskTracker::new();
        let accept_handle = tokio::spawn(accept_loop(
            listener,
            Arc::clone(&engine),
            logger,
            shutdown.clone(),
            tracker.clone(),
        ));

        Ok(Self {
            engine,
            path,
            shutdown,
            tracker,
            accept_handle: Mutex::new(Some(accept_handle)),
        })
    }

    /// Path of the bound socket file.
    pub fn path(&self) -> EngineResult<&Path> {
        self.engine.ensure_not_destroyed()?;
        Ok(&self.path)
    }
}

#[async_trait]
impl Transport for SocketServer {
    fn label(&self) -> &'static str {
        "IPC socket"
    }

    fn engine(&self) -> &Engine {
        &self.engine
    }

    async fn shutdown(&self) -> Result<()> {
        let handle = self
            .accept_handle
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        let Some(handle) = handle else {
            return Ok(());
        };

        self.shutdown.cancel();
        self.tracker.close();
        if let Err(e) = handle.await {
            log::warn!("IPC accept loop ended abnormally: {e}");
        }
        if tokio::time::timeout(SHUTDOWN_GRACE, self.tracker.wait()).await.is_err() {
            log::warn!("IPC connections did not close within {SHUTDOWN_GRACE:?}");
        }
        self.engine.release_detail();

        match std::fs::remove_file(&self.path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e)
                .with_context(|| format!("Failed to remove socket: {}", self.path.display())),
        }
    }
}

/// Try to claim one candidate path.
///
/// Fails with `AddrInUse` if another process is listening on it, and with
/// `AlreadyExists` if something other than a socket occupies the path. A
/// stale socket file is removed before binding. The socket is made owner-only
/// (0600).
async fn bind_candidate(path: PathBuf) -> io::Result<(PathBuf, UnixListener)> {
    let path_len = path.as_os_str().len();
    if path_len >= MAX_SOCKET_PATH {
        return Err(io::Error::new(
            io::ErrorKind::InvalidInput,
            format!(
                "socket path too long ({path_len} bytes, max {}): {}",
                MAX_SOCKET_PATH - 1,
                path.display()
            ),
        ));
    }

    if let Ok(metadata) = std::fs::symlink_metadata(&path) {
        if !metadata.file_type().is_socket() {
            return Err(io::Error::new(
                io::ErrorKind::AlreadyExists,
                format!("{} exists and is not a socket", path.display()),
            ));
        }
        if UnixStream::connect(&path).await.is_ok() {
            return Err(io::Error::new(
                io::ErrorKind::AddrInUse,
                format!("{} is served by another process", path.display()),
            ));
        }
        std::fs::remove_file(&path)?;
    }

    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }

    let listener = std::os::unix::net::UnixListener::bind(&path)?;

    {
        use std::os::unix::fs::PermissionsExt;
        std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o600))?;
    }

    listener.set_nonblocking(true)?;
    let listener = UnixListener::from_std(listener)?;
    Ok((path, listener))
}

/// Accept loop; runs as a tokio task until the shutdown token fires.
async fn accept_loop(
    listener: UnixListener,
    engine: Arc<Engine>,
    logger: Logger,
    shutdown: CancellationToken,
    tracker: TaskTracker,
) {
    loop {
        let accepted = tokio::select! {
            () = shutdown.cancelled() => break,
            accepted = listener.accept() => accepted,
        };
        match accepted {
            Ok((stream, _addr)) => {
                let id = connection_id("ipc");
                logger.info(format_args!("[{id}] Client connected"));
                let conn = Connection {
                    id,
                    engine: Arc::clone(&engine),
                    logger: logger.clone(),
                    shutdown: shutdown.clone(),
                };
                tracker.spawn(conn.run(stream));
            }
            Err(e) => {
                logger.error(format_args!("Accept error: {e}"));
                tokio::time::sleep(ACCEPT_RETRY_DELAY).await;
            }
        }
    }
    logger.debug(format_args!("Accept loop stopped"));
}

struct Connection {
    id: String,
    engine: Arc<Engine>,
    logger: Logger,
    shutdown: CancellationToken,
}

impl Connection {
    async fn run(self, stream: UnixStream) {
        if let Err(e) = self.serve(stream).await {
            self.logger
                .debug(format_args!("[{}] Connection ended: {e:#}", self.id));
        }
    }

    async fn serve(&self, stream: UnixStream) -> Result<()> {
        let (mut reader, mut writer) = stream.into_split();
        write_frame(&mut writer, &Frame::new(Opcode::Frame, ready_event().to_json())).await?;

        let mut decoder = FrameDecoder::new();
        let mut buf = vec![0u8; READ_BUFFER_SIZE];

        loop {
            let read = tokio::select! {
                () = self.shutdown.cancelled() => None,
                read = reader.read(&mut buf) => Some(read),
            };
            let Some(read) = read else {
                return close(&mut writer, Outcome::going_away()).await;
            };

            let n = read.context("Socket read failed")?;
            if n == 0 {
                self.logger.info(format_args!("[{}] Client disconnected", self.id));
                return Ok(());
            }

            let frames = match decoder.feed(&buf[..n]) {
                Ok(frames) => frames,
                Err(e) => {
                    self.logger
                        .error(format_args!("[{}] Frame decode error: {e}", self.id));
                    let outcome = Outcome::close(CloseCode::ProtocolError, e.to_string());
                    return close(&mut writer, outcome).await;
                }
            };

            for frame in frames {
                match frame.opcode {
                    Opcode::Handshake => {
                        self.logger.debug(format_args!(
                            "[{}] Handshake: {}",
                            self.id,
                            String::from_utf8_lossy(&frame.payload)
                        ));
                    }
                    Opcode::Frame => {
                        let inbound = if is_text(&frame.payload) {
                            Inbound::Text(String::from_utf8_lossy(&frame.payload).into_owned())
                        } else {
                            Inbound::Binary(frame.payload)
                        };
                        let outcome = tokio::select! {
                            outcome = dispatch(&self.engine, inbound, None) => outcome,
                            () = self.shutdown.cancelled() => Outcome::going_away(),
                        };
                        match outcome {
                            Outcome::Reply(packet) => {
                                write_frame(&mut writer, &Frame::new(Opcode::Frame, packet.to_json()))
                                    .await?;
                            }
                            close_outcome @ Outcome::Close { .. } => {
                                return close(&mut writer, close_outcome).await;
                            }
                        }
                    }
                    Opcode::Close => {
                        self.logger.info(format_args!("[{}] Client closed", self.id));
                        return Ok(());
                    }
                    Opcode::Ping => {
                        write_frame(&mut writer, &Frame::new(Opcode::Pong, frame.payload)).await?;
                    }
                    Opcode::Pong => {}
                }
            }
        }
    }
}

async fn write_frame(writer: &mut OwnedWriteHalf, frame: &Frame) -> Result<()> {
    writer
        .write_all(&frame.encode())
        .await
        .context("Socket write failed")
}

/// Send a CLOSE frame for a close outcome and shut the stream down.
async fn close(writer: &mut OwnedWriteHalf, outcome: Outcome) -> Result<()> {
    if let Outcome::Close { code, reason } = outcome {
        write_frame(writer, &Frame::close(code, &reason)).await?;
    }
    writer.shutdown().await.context("Socket shutdown failed")
}
