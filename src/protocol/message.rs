//! Inbound packet validation and outbound packet synthesis.
//!
//! Inbound packets look like:
//!
//! ```text
//! { "cmd": "AUTHORIZE", "nonce": "n1", "args": { "client_id": "123", "scopes": ["identify"] } }
//! ```
//!
//! Validation is structural only: `cmd` and `nonce` must be strings, `args`
//! must be an object, and `DEEP_LINK` channel links must carry the expected
//! `params` fields. Nothing checks that a client id or guild actually exists.
//! Per-command argument views ([`AuthorizeArgs`], [`ActivityArgs`], ...) are
//! available for hooks that want typed access.

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};

use super::catalog::{ArgsType, Code, EventName, HookName};

/// RPC protocol version advertised in the READY event.
pub const RPC_VERSION: u32 = 1;

/// A structurally valid inbound packet.
#[derive(Debug, Clone, PartialEq)]
pub struct Message {
    /// Command name. May be outside the catalog when classified without a
    /// command filter.
    pub cmd: String,
    /// Client-chosen correlation id, echoed back in the response.
    pub nonce: String,
    /// Command arguments.
    pub args: Map<String, Value>,
}

impl Message {
    /// Catalog code of this message, if recognized.
    #[must_use]
    pub fn code(&self) -> Option<Code> {
        Code::from_wire(&self.cmd)
    }

    /// Deserialize `args` into a typed view.
    ///
    /// Returns `None` when the arguments do not fit `T`.
    #[must_use]
    pub fn args_as<T: DeserializeOwned>(&self) -> Option<T> {
        T::deserialize(Value::Object(self.args.clone())).ok()
    }
}

/// A message matched to exactly one hook name.
#[derive(Debug, Clone, PartialEq)]
pub struct Classified {
    /// Hook name the message routes to.
    pub kind: HookName,
    /// The validated message.
    pub message: Message,
}

/// Why a value failed validation.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ValidationError {
    /// Not a JSON object (array, null, string, number or bool).
    #[error("payload is not an object")]
    NotAnObject,
    /// `cmd` missing or not a string.
    #[error("missing or non-string `cmd`")]
    MissingCmd,
    /// `nonce` missing or not a string.
    #[error("missing or non-string `nonce`")]
    MissingNonce,
    /// `args` missing or not an object.
    #[error("missing or non-object `args`")]
    MissingArgs,
    /// `cmd` is not one of the accepted commands.
    #[error("unsupported command `{0}`")]
    UnsupportedCommand(String),
    /// `args.type` does not match the expected sub-type.
    #[error("expected args.type `{expected}`, found {found:?}")]
    ArgsTypeMismatch {
        /// Sub-type that was required.
        expected: ArgsType,
        /// Value that was present, if it was a string.
        found: Option<String>,
    },
    /// `args.params` missing or not an object.
    #[error("missing or non-object `args.params`")]
    MissingParams,
    /// A field of `args.params` is missing or has the wrong type.
    #[error("invalid `args.params.{0}`")]
    InvalidParam(&'static str),
}

impl ValidationError {
    /// Whether the value had the packet envelope (`cmd`, `nonce`, `args`)
    /// and was only rejected by the catalog.
    #[must_use]
    pub fn is_message_like(&self) -> bool {
        matches!(
            self,
            ValidationError::UnsupportedCommand(_)
                | ValidationError::ArgsTypeMismatch { .. }
                | ValidationError::MissingParams
                | ValidationError::InvalidParam(_)
        )
    }
}

/// Validate `value` as an inbound packet.
///
/// `cmds` restricts the accepted commands (empty accepts any string command).
/// `args_type` additionally requires `args.type` to equal the sub-type and
/// `args.params` to carry that sub-type's fields.
pub fn classify(
    value: &Value,
    cmds: &[Code],
    args_type: Option<ArgsType>,
) -> Result<Message, ValidationError> {
    let Value::Object(obj) = value else {
        return Err(ValidationError::NotAnObject);
    };
    let cmd = obj
        .get("cmd")
        .and_then(Value::as_str)
        .ok_or(ValidationError::MissingCmd)?;
    let nonce = obj
        .get("nonce")
        .and_then(Value::as_str)
        .ok_or(ValidationError::MissingNonce)?;
    let args = obj
        .get("args")
        .and_then(Value::as_object)
        .ok_or(ValidationError::MissingArgs)?;

    if !cmds.is_empty() && !cmds.iter().any(|code| code.as_str() == cmd) {
        return Err(ValidationError::UnsupportedCommand(cmd.to_string()));
    }

    if let Some(expected) = args_type {
        check_args_type(args, expected)?;
    }

    Ok(Message {
        cmd: cmd.to_string(),
        nonce: nonce.to_string(),
        args: args.clone(),
    })
}

fn check_args_type(args: &Map<String, Value>, expected: ArgsType) -> Result<(), ValidationError> {
    let found = args.get("type").and_then(Value::as_str);
    if found != Some(expected.as_str()) {
        return Err(ValidationError::ArgsTypeMismatch {
            expected,
            found: found.map(str::to_string),
        });
    }
    let params = args
        .get("params")
        .and_then(Value::as_object)
        .ok_or(ValidationError::MissingParams)?;

    match expected {
        ArgsType::Channel => {
            for field in ["guildId", "search", "fingerprint"] {
                if !params.get(field).is_some_and(Value::is_string) {
                    return Err(ValidationError::InvalidParam(field));
                }
            }
            if params.get("channelId").is_some_and(|v| !v.is_string()) {
                return Err(ValidationError::InvalidParam("channelId"));
            }
        }
    }
    Ok(())
}

/// Boolean form of [`classify`].
#[must_use]
pub fn is_message(value: &Value, cmds: &[Code], args_type: Option<ArgsType>) -> bool {
    classify(value, cmds, args_type).is_ok()
}

/// Match `value` against every hook name in catalog order.
///
/// The first structural match wins. On failure the error describes the most
/// specific reason: envelope errors first, then the sub-type error of the
/// matching command, then [`ValidationError::UnsupportedCommand`].
pub fn classify_kind(value: &Value) -> Result<Classified, ValidationError> {
    let envelope = classify(value, &[], None)?;

    let mut specific = None;
    for kind in HookName::ALL {
        let code = kind.code();
        if code.as_str() != envelope.cmd {
            continue;
        }
        match classify(value, &[code], kind.args_type()) {
            Ok(message) => return Ok(Classified { kind, message }),
            Err(e) => specific = Some(e),
        }
    }
    Err(specific.unwrap_or(ValidationError::UnsupportedCommand(envelope.cmd)))
}

/// Outbound packet: responses and server-initiated events.
///
/// `evt` is omitted entirely for `*_BROWSER` responses and serialized as
/// `null` for every other response.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OutboundPacket {
    /// Command being answered, or `DISPATCH` for events.
    pub cmd: String,
    /// Response payload.
    pub data: Value,
    /// Event marker.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub evt: Option<Value>,
    /// Correlation id copied from the request; `null` for events.
    pub nonce: Option<String>,
}

impl OutboundPacket {
    /// Serialize to a JSON string.
    #[must_use]
    pub fn to_json(&self) -> String {
        // Only string keys and JSON values; serialization cannot fail.
        serde_json::to_string(self).unwrap_or_default()
    }
}

/// Synthesize the acknowledgement sent when no hook overrides the reply.
#[must_use]
pub fn default_response(message: &Message) -> OutboundPacket {
    let is_browser = message.code().is_some_and(Code::is_browser);
    if !is_browser {
        return OutboundPacket {
            cmd: message.cmd.clone(),
            data: Value::Null,
            evt: Some(Value::Null),
            nonce: Some(message.nonce.clone()),
        };
    }

    let code = message.args.get("code").cloned().unwrap_or(Value::Null);
    let data = if message.code() == Some(Code::GuildTemplateBrowser) {
        json!({ "code": code, "guildTemplate": { "code": code } })
    } else {
        json!({ "code": code })
    };
    OutboundPacket {
        cmd: message.cmd.clone(),
        data,
        evt: None,
        nonce: Some(message.nonce.clone()),
    }
}

/// The READY event every transport sends right after accepting a connection.
#[must_use]
pub fn ready_event() -> OutboundPacket {
    OutboundPacket {
        cmd: "DISPATCH".to_string(),
        data: json!({ "v": RPC_VERSION, "config": null, "user": null }),
        evt: Some(Value::String(EventName::Ready.as_str().to_string())),
        nonce: None,
    }
}

/// Whether `bytes` is text: its UTF-8 decoding re-encodes to the same bytes.
///
/// Anything else is opaque binary and must not reach the JSON decoder.
#[must_use]
pub fn is_text(bytes: &[u8]) -> bool {
    String::from_utf8_lossy(bytes).as_bytes() == bytes
}

// ============================================================================
// Typed argument views
// ============================================================================

/// `AUTHORIZE` arguments.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuthorizeArgs {
    /// Requested OAuth2 scopes.
    pub scopes: Vec<String>,
    /// Application id.
    pub client_id: String,
    /// Consent prompt behavior (`"consent"` or `"none"`).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub prompt: Option<String>,
}

/// `DEEP_LINK` arguments with `type == "CHANNEL"`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeepLinkChannelArgs {
    /// Always `"CHANNEL"`.
    #[serde(rename = "type")]
    pub link_type: String,
    /// Channel coordinates.
    pub params: ChannelParams,
}

/// Target of a channel deep link.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChannelParams {
    /// Guild id.
    pub guild_id: String,
    /// Channel id; absent links to the guild itself.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub channel_id: Option<String>,
    /// Query string of the originating link.
    pub search: String,
    /// Browser fingerprint.
    pub fingerprint: String,
}

/// `SET_ACTIVITY` arguments.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ActivityArgs {
    /// Process id of the reporting application.
    pub pid: u32,
    /// New activity; absent clears it.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub activity: Option<Activity>,
}

/// Rich presence activity.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Activity {
    /// Party status line.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub state: Option<String>,
    /// What the player is doing.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<String>,
    /// Start/end unix timestamps.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub timestamps: Option<ActivityTimestamps>,
    /// Image keys and hover texts.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub assets: Option<ActivityAssets>,
    /// Link buttons (at most two are displayed).
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub buttons: Vec<ActivityButton>,
    /// Whether the activity is an instanced session.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub instance: Option<bool>,
}

/// Activity start/end times.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ActivityTimestamps {
    /// Unix time (ms) the activity started.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub start: Option<u64>,
    /// Unix time (ms) the activity ends.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub end: Option<u64>,
}

/// Activity images.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ActivityAssets {
    /// Large image key.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub large_image: Option<String>,
    /// Large image hover text.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub large_text: Option<String>,
    /// Small image key.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub small_image: Option<String>,
    /// Small image hover text.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub small_text: Option<String>,
}

/// Activity link button.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ActivityButton {
    /// Button text.
    pub label: String,
    /// Target URL.
    pub url: String,
}

/// `INVITE_BROWSER` and `GUILD_TEMPLATE_BROWSER` arguments.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InviteArgs {
    /// Invite or template code.
    pub code: String,
}
