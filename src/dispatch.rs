//! Per-frame dispatch shared by every transport.
//!
//! A transport hands each inbound frame to [`dispatch`] and acts on the
//! returned [`Outcome`]: write the reply, or close the connection with the
//! given status. Dispatch of one frame completes before the next frame of the
//! same connection is read.
//!
//! | Inbound                                   | Outcome                         |
//! |-------------------------------------------|---------------------------------|
//! | classified, a hook returns `n > 0`        | close `n` (1011 if unsendable)  |
//! | classified, otherwise                     | default response                |
//! | packet envelope, unknown command or shape | close 1003                      |
//! | text that is not JSON                     | close 1007                      |
//! | binary, or JSON without the envelope      | close 1002                      |
//! | engine destroyed                          | close 1001                      |

use std::sync::Arc;

use futures_util::future::join_all;
use serde_json::Value;

use crate::engine::Engine;
use crate::logging::Logger;
use crate::protocol::{
    classify_kind, default_response, is_sendable, Classified, CloseCode, OutboundPacket,
};

/// Close reason used when a transport shuts down under a live connection.
pub const SHUTDOWN_REASON: &str = "Server shutting down";

/// A frame received from a client.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Inbound {
    /// UTF-8 text payload.
    Text(String),
    /// Opaque binary payload.
    Binary(Vec<u8>),
}

/// What the transport must do with a dispatched frame.
#[derive(Debug, Clone, PartialEq)]
pub enum Outcome {
    /// Send this packet and keep reading.
    Reply(OutboundPacket),
    /// Close the connection with this status.
    Close {
        /// Close status code.
        code: u16,
        /// Human-readable reason.
        reason: String,
    },
}

impl Outcome {
    /// Close with a catalog status.
    pub fn close(code: CloseCode, reason: impl Into<String>) -> Self {
        Outcome::Close {
            code: code.code(),
            reason: reason.into(),
        }
    }

    /// Close sent when the transport is shutting down.
    pub fn going_away() -> Self {
        Self::close(CloseCode::GoingAway, SHUTDOWN_REASON)
    }
}

/// Decode, validate and route one inbound frame.
///
/// Never fails: every problem becomes an [`Outcome::Close`].
pub async fn dispatch(engine: &Engine, frame: Inbound, origin: Option<&str>) -> Outcome {
    let Ok(logger) = engine.logger() else {
        return Outcome::going_away();
    };

    let value = match frame {
        Inbound::Text(text) => match serde_json::from_str::<Value>(&text) {
            Ok(value) => value,
            Err(e) => {
                logger.error(format_args!("Unhandled packed text data: {text}"));
                logger.debug(format_args!("JSON decode failed: {e}"));
                return Outcome::close(
                    CloseCode::InvalidPayload,
                    format!("Unhandled packed text data: {text}"),
                );
            }
        },
        Inbound::Binary(data) => {
            logger.error(format_args!("Unknown data transfer ({} binary bytes)", data.len()));
            logger.debug(format_args!("Binary payload: {data:02x?}"));
            return Outcome::close(CloseCode::ProtocolError, "Unknown data transfer");
        }
    };

    match classify_kind(&value) {
        Ok(classified) => run_hooks(engine, &logger, classified, origin).await,
        Err(e) if e.is_message_like() => {
            logger.error(format_args!("Unsupported request type: {e}"));
            logger.debug(format_args!("Rejected packet: {value}"));
            Outcome::close(CloseCode::UnsupportedData, "Unsupported request type")
        }
        Err(e) => {
            logger.error(format_args!("Unknown data transfer: {e}"));
            logger.debug(format_args!("Rejected payload: {value}"));
            Outcome::close(CloseCode::ProtocolError, "Unknown data transfer")
        }
    }
}

/// Run the active hooks of a classified message and pick the outcome.
///
/// All hooks run concurrently and every result is awaited. The first
/// positive status in registration order wins; statuses that cannot go in a
/// close frame become 1011. Failed hooks are logged and count as "no status".
async fn run_hooks(
    engine: &Engine,
    logger: &Logger,
    classified: Classified,
    origin: Option<&str>,
) -> Outcome {
    let Classified { kind, message } = classified;
    let Ok(hooks) = engine.active_hooks(kind) else {
        return Outcome::going_away();
    };
    logger.debug(format_args!("{kind} from {origin:?} -> {} hook(s)", hooks.len()));

    if hooks.is_empty() {
        return Outcome::Reply(default_response(&message));
    }

    let message = Arc::new(message);
    let origin = origin.map(str::to_owned);
    let results = join_all(
        hooks
            .iter()
            .map(|hook| hook.call(Arc::clone(&message), origin.clone())),
    )
    .await;

    let mut status = None;
    for result in results {
        match result {
            Ok(Some(code)) if code > 0 => {
                status.get_or_insert(code);
            }
            Ok(_) => {}
            Err(e) => logger.error(format_args!("{kind} hook failed: {e:#}")),
        }
    }

    match status {
        Some(code) if !is_sendable(code) => {
            logger.error(format_args!(
                "{kind} hook returned unsendable close status {code}, closing with {}",
                CloseCode::InternalError
            ));
            Outcome::close(CloseCode::InternalError, format!("Closed by {kind} hook"))
        }
        Some(code) => {
            let reason = CloseCode::from_code(code)
                .map_or_else(|| format!("Closed by {kind} hook"), |c| c.description().to_string());
            logger.info(format_args!("{kind} hook closed connection with {code}"));
            Outcome::Close { code, reason }
        }
        None => Outcome::Reply(default_response(&message)),
    }
}
