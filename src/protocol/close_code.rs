//! Connection close status codes.
//!
//! Mirrors the IANA WebSocket close code registry. The socket transport
//! reuses the same numbers in its CLOSE frames so both transports report
//! failures identically.

use std::fmt;

/// Close status sent to a client when the bridge ends a connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u16)]
pub enum CloseCode {
    /// 1000: normal closure.
    Normal = 1000,
    /// 1001: endpoint is going away (server shutdown).
    GoingAway = 1001,
    /// 1002: protocol error.
    ProtocolError = 1002,
    /// 1003: data type cannot be accepted.
    UnsupportedData = 1003,
    /// 1004: reserved.
    Reserved = 1004,
    /// 1005: no status code was present. Never sent on the wire.
    NoStatus = 1005,
    /// 1006: connection dropped without a close frame. Never sent on the wire.
    Abnormal = 1006,
    /// 1007: payload inconsistent with the message type.
    InvalidPayload = 1007,
    /// 1008: policy violation.
    PolicyViolation = 1008,
    /// 1009: message too big to process.
    MessageTooBig = 1009,
    /// 1010: client expected an extension the server did not negotiate.
    MandatoryExtension = 1010,
    /// 1011: unexpected server condition.
    InternalError = 1011,
    /// 1012: service is restarting.
    ServiceRestart = 1012,
    /// 1013: temporary overload, try again later.
    TryAgainLater = 1013,
    /// 1014: upstream gateway returned an invalid response.
    BadGateway = 1014,
}

impl CloseCode {
    /// Every code in the registry, in numeric order.
    pub const ALL: [CloseCode; 15] = [
        CloseCode::Normal,
        CloseCode::GoingAway,
        CloseCode::ProtocolError,
        CloseCode::UnsupportedData,
        CloseCode::Reserved,
        CloseCode::NoStatus,
        CloseCode::Abnormal,
        CloseCode::InvalidPayload,
        CloseCode::PolicyViolation,
        CloseCode::MessageTooBig,
        CloseCode::MandatoryExtension,
        CloseCode::InternalError,
        CloseCode::ServiceRestart,
        CloseCode::TryAgainLater,
        CloseCode::BadGateway,
    ];

    /// Numeric status code.
    #[must_use]
    pub const fn code(self) -> u16 {
        self as u16
    }

    /// Look up a registry entry by number.
    #[must_use]
    pub fn from_code(code: u16) -> Option<Self> {
        Self::ALL.into_iter().find(|c| c.code() == code)
    }

    /// Short human-readable description.
    #[must_use]
    pub const fn description(self) -> &'static str {
        match self {
            CloseCode::Normal => "normal closure",
            CloseCode::GoingAway => "going away",
            CloseCode::ProtocolError => "protocol error",
            CloseCode::UnsupportedData => "unsupported data",
            CloseCode::Reserved => "reserved",
            CloseCode::NoStatus => "no status received",
            CloseCode::Abnormal => "abnormal closure",
            CloseCode::InvalidPayload => "invalid frame payload data",
            CloseCode::PolicyViolation => "policy violation",
            CloseCode::MessageTooBig => "message too big",
            CloseCode::MandatoryExtension => "mandatory extension",
            CloseCode::InternalError => "internal error",
            CloseCode::ServiceRestart => "service restart",
            CloseCode::TryAgainLater => "try again later",
            CloseCode::BadGateway => "bad gateway",
        }
    }
}

/// Whether `code` may appear in a close frame.
///
/// 1004-1006 and 1015 are reserved for local use, anything below 1000 is
/// invalid, and 1015-2999 belong to future protocol revisions.
#[must_use]
pub const fn is_sendable(code: u16) -> bool {
    matches!(code, 1000..=1003 | 1007..=1014 | 3000..=4999)
}

impl From<CloseCode> for u16 {
    fn from(code: CloseCode) -> Self {
        code.code()
    }
}

impl fmt::Display for CloseCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({})", self.code(), self.description())
    }
}
