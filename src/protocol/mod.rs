//! Packet catalog: recognized commands, validation, default responses and
//! close status codes.
//!
//! Everything here is pure and transport-agnostic. Transports decode raw
//! frames into [`serde_json::Value`]s, hand them to [`classify_kind`], and
//! send back whatever [`default_response`] produces unless a hook decides to
//! close the connection instead.

pub mod catalog;
pub mod close_code;
pub mod message;

pub use catalog::{ArgsType, Code, EventName, HookName};
pub use close_code::{is_sendable, CloseCode};
pub use message::{
    classify, classify_kind, default_response, is_message, is_text, ready_event, Classified,
    Message, OutboundPacket, ValidationError,
};
