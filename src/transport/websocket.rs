//! Loopback WebSocket transport.
//!
//! Binds `127.0.0.1` on the first free port of the configured range and
//! accepts browser connections. Every connection must present an `Origin`
//! header accepted by the [`OriginPolicy`]; rejected connections complete the
//! handshake and are immediately closed with 1008 (policy violation).
//!
//! Accepted connections receive the READY event, then every text or binary
//! message is dispatched to the engine in order.

use std::borrow::Cow;
use std::net::{Ipv4Addr, Ipv6Addr};
use std::sync::{Arc, Mutex, PoisonError};

use anyhow::{Context, Result};
use async_trait::async_trait;
use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use globset::{GlobBuilder, GlobSet, GlobSetBuilder};
use tokio::net::{TcpListener, TcpStream};
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::handshake::server::{ErrorResponse, Request, Response};
use tokio_tungstenite::tungstenite::http::header::ORIGIN;
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode as WsCloseCode;
use tokio_tungstenite::tungstenite::protocol::CloseFrame;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::WebSocketStream;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;

use super::{connection_id, Transport};
use crate::constants::{ACCEPT_RETRY_DELAY, CLOSE_HANDSHAKE_TIMEOUT, DENIED_HOSTS, SHUTDOWN_GRACE};
use crate::dispatch::{dispatch, Inbound, Outcome, SHUTDOWN_REASON};
use crate::engine::{Engine, ServerDetail};
use crate::error::EngineResult;
use crate::logging::Logger;
use crate::negotiate::CandidateRange;
use crate::protocol::{ready_event, CloseCode};

type WsSink = SplitSink<WebSocketStream<TcpStream>, Message>;
type WsSource = SplitStream<WebSocketStream<TcpStream>>;

/// Maximum close reason length allowed in a WebSocket control frame.
const MAX_CLOSE_REASON: usize = 123;

/// Decides which browser origins may connect.
///
/// Entries without glob metacharacters match exactly; the others are
/// compiled as glob patterns where `*` never crosses a `/`. Origins whose
/// host is loopback or one of [`DENIED_HOSTS`] are rejected even when
/// allow-listed, whatever their scheme or port.
#[derive(Debug, Clone)]
pub struct OriginPolicy {
    exact: Vec<String>,
    patterns: GlobSet,
}

impl OriginPolicy {
    /// Build a policy from allow-list entries.
    ///
    /// # Errors
    ///
    /// Returns an error if a pattern is not a valid glob.
    pub fn new<S: AsRef<str>>(allowed: &[S]) -> Result<Self> {
        let mut exact = Vec::new();
        let mut patterns = GlobSetBuilder::new();

        for entry in allowed {
            let entry = entry.as_ref().trim();
            if entry.is_empty() {
                continue;
            }
            if entry.contains(['*', '?', '[', '{']) {
                let glob = GlobBuilder::new(entry)
                    .literal_separator(true)
                    .build()
                    .with_context(|| format!("Invalid origin pattern: {entry}"))?;
                patterns.add(glob);
            } else {
                exact.push(entry.to_string());
            }
        }

        Ok(Self {
            exact,
            patterns: patterns.build().context("Failed to compile origin patterns")?,
        })
    }

    /// Whether nothing is allow-listed (every connection will be rejected).
    pub fn is_empty(&self) -> bool {
        self.exact.is_empty() && self.patterns.is_empty()
    }

    /// Check a request origin, returning the rejection reason on failure.
    pub fn check(&self, origin: Option<&str>) -> Result<(), String> {
        let Some(origin) = origin else {
            return Err("Missing Origin header".to_string());
        };
        if is_denied(origin) {
            return Err(format!("Origin {origin} is not allowed"));
        }
        if self.exact.iter().any(|e| e == origin) || self.patterns.is_match(origin) {
            Ok(())
        } else {
            Err(format!("Origin {origin} is not allow-listed"))
        }
    }
}

/// Lowercased host of a `scheme://host[:port]` origin, without the port.
/// IPv6 hosts keep their brackets.
fn origin_host(origin: &str) -> Option<String> {
    let (_, rest) = origin.split_once("://")?;
    let authority = rest.split(['/', '?', '#']).next().unwrap_or_default();
    let authority = authority.rsplit_once('@').map_or(authority, |(_, host)| host);
    let host = if authority.starts_with('[') {
        &authority[..=authority.find(']')?]
    } else {
        authority.split(':').next().unwrap_or_default()
    };
    let host = host.trim_end_matches('.');
    (!host.is_empty()).then(|| host.to_ascii_lowercase())
}

fn is_loopback_host(host: &str) -> bool {
    if host == "localhost" || host.ends_with(".localhost") {
        return true;
    }
    if let Some(v6) = host.strip_prefix('[').and_then(|h| h.strip_suffix(']')) {
        return v6.parse::<Ipv6Addr>().is_ok_and(|ip| {
            ip.is_loopback() || ip.to_ipv4_mapped().is_some_and(|v4| v4.is_loopback())
        });
    }
    host.parse::<Ipv4Addr>().is_ok_and(|ip| ip.is_loopback())
}

/// Whether `origin` points at loopback or a vendor-hosted client.
fn is_denied(origin: &str) -> bool {
    origin_host(origin)
        .is_some_and(|host| is_loopback_host(&host) || DENIED_HOSTS.contains(&host.as_str()))
}

/// WebSocket server bound to a loopback port.
#[derive(Debug)]
pub struct WsServer {
    engine: Arc<Engine>,
    port: u16,
    shutdown: CancellationToken,
    tracker: TaskTracker,
    accept_handle: Mutex<Option<JoinHandle<()>>>,
}

impl WsServer {
    /// Negotiate a port in `ports`, bind it and start accepting.
    ///
    /// # Errors
    ///
    /// Returns an error if every port in the range is busy.
    pub async fn start(engine: Engine, ports: CandidateRange, policy: OriginPolicy) -> Result<Self> {
        let engine = Arc::new(engine);
        let logger = engine.logger()?;
        if policy.is_empty() {
            logger.error(format_args!("No allowed origins configured; every connection will be rejected"));
        }

        let (port, listener) = engine
            .negotiate(
                ports,
                |port| TcpListener::bind((Ipv4Addr::LOCALHOST, port)),
                |port, _: &TcpListener| ServerDetail::Port(port),
            )
            .await
            .context("Failed to bind WebSocket listener")?;

        let shutdown = CancellationToken::new();
        let tracker = TaskTracker::new();
        let accept_handle = tokio::spawn(accept_loop(
            listener,
            Arc::clone(&engine),
            Arc::new(policy),
            logger,
            shutdown.clone(),
            tracker.clone(),
        ));

        Ok(Self {
            engine,
            port,
            shutdown,
            tracker,
            accept_handle: Mutex::new(Some(accept_handle)),
        })
    }

    /// Negotiated port.
    pub fn port(&self) -> EngineResult<u16> {
        self.engine.ensure_not_destroyed()?;
        Ok(self.port)
    }
}

#[async_trait]
impl Transport for WsServer {
    fn label(&self) -> &'static str {
        "WebSocket"
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
            log::warn!("WebSocket accept loop ended abnormally: {e}");
        }
        if tokio::time::timeout(SHUTDOWN_GRACE, self.tracker.wait()).await.is_err() {
            log::warn!("WebSocket connections did not close within {SHUTDOWN_GRACE:?}");
        }
        self.engine.release_detail();
        Ok(())
    }
}

/// Accept loop; runs as a tokio task until the shutdown token fires.
async fn accept_loop(
    listener: TcpListener,
    engine: Arc<Engine>,
    policy: Arc<OriginPolicy>,
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
            Ok((stream, peer)) => {
                let id = connection_id("ws");
                logger.debug(format_args!("[{id}] Accepted TCP connection from {peer}"));
                let conn = Connection {
                    id,
                    engine: Arc::clone(&engine),
                    policy: Arc::clone(&policy),
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
    policy: Arc<OriginPolicy>,
    logger: Logger,
    shutdown: CancellationToken,
}

impl Connection {
    async fn run(self, stream: TcpStream) {
        if let Err(e) = self.serve(stream).await {
            self.logger
                .debug(format_args!("[{}] Connection ended: {e:#}", self.id));
        }
    }

    async fn serve(&self, stream: TcpStream) -> Result<()> {
        let mut origin = None;
        let ws = tokio_tungstenite::accept_hdr_async(
            stream,
            |request: &Request, response: Response| -> Result<Response, ErrorResponse> {
                origin = request
                    .headers()
                    .get(ORIGIN)
                    .and_then(|value| value.to_str().ok())
                    .map(str::to_owned);
                Ok(response)
            },
        )
        .await
        .context("WebSocket handshake failed")?;
        let (mut sink, mut source) = ws.split();

        if let Err(reason) = self.policy.check(origin.as_deref()) {
            self.logger
                .error(format_args!("[{}] Rejected connection: {reason}", self.id));
            return close(&mut sink, &mut source, CloseCode::PolicyViolation.code(), &reason).await;
        }

        self.logger
            .info(format_args!("[{}] Connected from {}", self.id, origin.as_deref().unwrap_or("?")));
        sink.send(Message::Text(ready_event().to_json()))
            .await
            .context("Failed to send READY")?;

        loop {
            let next = tokio::select! {
                () = self.shutdown.cancelled() => None,
                next = source.next() => Some(next),
            };
            let Some(next) = next else {
                return close(&mut sink, &mut source, CloseCode::GoingAway.code(), SHUTDOWN_REASON).await;
            };

            let inbound = match next {
                Some(Ok(Message::Text(text))) => Inbound::Text(text),
                Some(Ok(Message::Binary(data))) => Inbound::Binary(data),
                Some(Ok(Message::Close(frame))) => {
                    self.logger
                        .info(format_args!("[{}] Client closed: {frame:?}", self.id));
                    return Ok(());
                }
                Some(Ok(_)) => continue,
                Some(Err(e)) => return Err(e).context("WebSocket read failed"),
                None => {
                    self.logger.info(format_args!("[{}] Disconnected", self.id));
                    return Ok(());
                }
            };

            let outcome = tokio::select! {
                outcome = dispatch(&self.engine, inbound, origin.as_deref()) => outcome,
                () = self.shutdown.cancelled() => Outcome::going_away(),
            };
            match outcome {
                Outcome::Reply(packet) => {
                    sink.send(Message::Text(packet.to_json()))
                        .await
                        .context("WebSocket send failed")?;
                }
                Outcome::Close { code, reason } => {
                    return close(&mut sink, &mut source, code, &reason).await;
                }
            }
        }
    }
}

/// Send a close frame and wait briefly for the peer to acknowledge it.
async fn close(sink: &mut WsSink, source: &mut WsSource, code: u16, reason: &str) -> Result<()> {
    let frame = CloseFrame {
        code: WsCloseCode::from(code),
        reason: Cow::Owned(truncate_reason(reason).to_string()),
    };
    sink.send(Message::Close(Some(frame)))
        .await
        .context("WebSocket close failed")?;

    // Drain until the peer's close reply ends the stream.
    let drained = tokio::time::timeout(CLOSE_HANDSHAKE_TIMEOUT, async {
        while let Some(Ok(_)) = source.next().await {}
    })
    .await;
    if drained.is_err() {
        log::debug!("Peer did not acknowledge close {code} in time");
    }
    Ok(())
}

/// Cut `reason` to fit a close frame without splitting a character.
fn truncate_reason(reason: &str) -> &str {
    if reason.len() <= MAX_CLOSE_REASON {
        return reason;
    }
    let mut end = MAX_CLOSE_REASON;
    while !reason.is_char_boundary(end) {
        end -= 1;
    }
    &reason[..end]
}
