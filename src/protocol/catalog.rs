//! Static catalog of recognized RPC commands, argument sub-types and events.
//!
//! The catalog is the single source of truth for which packets the bridge
//! understands. Hook names are derived from it: every command is one hook
//! name, except `DEEP_LINK`, which is split by its `args.type`
//! sub-discriminator (currently only `CHANNEL`).

use std::fmt;
use std::str::FromStr;

use crate::error::EngineError;

/// RPC command codes carried in a packet's `cmd` field.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Code {
    /// OAuth2 authorization request.
    Authorize,
    /// Navigation request into the host application.
    DeepLink,
    /// Rich presence update.
    SetActivity,
    /// Invite opened from a browser.
    InviteBrowser,
    /// Guild template opened from a browser.
    GuildTemplateBrowser,
}

impl Code {
    /// All codes, in the order the classifier probes them.
    pub const ALL: [Code; 5] = [
        Code::Authorize,
        Code::DeepLink,
        Code::SetActivity,
        Code::InviteBrowser,
        Code::GuildTemplateBrowser,
    ];

    /// Wire representation of the code.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Code::Authorize => "AUTHORIZE",
            Code::DeepLink => "DEEP_LINK",
            Code::SetActivity => "SET_ACTIVITY",
            Code::InviteBrowser => "INVITE_BROWSER",
            Code::GuildTemplateBrowser => "GUILD_TEMPLATE_BROWSER",
        }
    }

    /// Look up a code by its wire representation.
    #[must_use]
    pub fn from_wire(cmd: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|code| code.as_str() == cmd)
    }

    /// Whether this is one of the `*_BROWSER` commands, whose default
    /// response echoes the invite code back.
    #[must_use]
    pub fn is_browser(self) -> bool {
        self.as_str().ends_with("_BROWSER")
    }

    /// Argument sub-types this code is refined by. Empty for most codes.
    #[must_use]
    pub const fn args_types(self) -> &'static [ArgsType] {
        match self {
            Code::DeepLink => &[ArgsType::Channel],
            _ => &[],
        }
    }
}

impl fmt::Display for Code {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Sub-discriminator stored in `args.type`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ArgsType {
    /// Deep link into a guild channel.
    Channel,
}

impl ArgsType {
    /// Wire representation of the sub-type.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            ArgsType::Channel => "CHANNEL",
        }
    }
}

impl fmt::Display for ArgsType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Server-initiated event names.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventName {
    /// Sent once on every accepted connection.
    Ready,
}

impl EventName {
    /// Wire representation of the event.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            EventName::Ready => "READY",
        }
    }
}

/// Flattened message kind: a code, refined by a sub-type for `DEEP_LINK`.
///
/// This is the key space of the hook registry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum HookName {
    /// `AUTHORIZE`
    Authorize,
    /// `DEEP_LINK` with `args.type == "CHANNEL"`
    DeepLinkChannel,
    /// `SET_ACTIVITY`
    SetActivity,
    /// `INVITE_BROWSER`
    InviteBrowser,
    /// `GUILD_TEMPLATE_BROWSER`
    GuildTemplateBrowser,
}

impl HookName {
    /// Number of hook names.
    pub const COUNT: usize = 5;

    /// All hook names in catalog order.
    pub const ALL: [HookName; Self::COUNT] = [
        HookName::Authorize,
        HookName::DeepLinkChannel,
        HookName::SetActivity,
        HookName::InviteBrowser,
        HookName::GuildTemplateBrowser,
    ];

    /// String key of the hook name.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            HookName::Authorize => "AUTHORIZE",
            HookName::DeepLinkChannel => "DEEP_LINK_CHANNEL",
            HookName::SetActivity => "SET_ACTIVITY",
            HookName::InviteBrowser => "INVITE_BROWSER",
            HookName::GuildTemplateBrowser => "GUILD_TEMPLATE_BROWSER",
        }
    }

    /// The command code this hook name listens to.
    #[must_use]
    pub const fn code(self) -> Code {
        match self {
            HookName::Authorize => Code::Authorize,
            HookName::DeepLinkChannel => Code::DeepLink,
            HookName::SetActivity => Code::SetActivity,
            HookName::InviteBrowser => Code::InviteBrowser,
            HookName::GuildTemplateBrowser => Code::GuildTemplateBrowser,
        }
    }

    /// The argument sub-type, if this hook name is a refinement.
    #[must_use]
    pub const fn args_type(self) -> Option<ArgsType> {
        match self {
            HookName::DeepLinkChannel => Some(ArgsType::Channel),
            _ => None,
        }
    }

    /// Slot index in registry storage.
    pub(crate) const fn index(self) -> usize {
        self as usize
    }
}

impl fmt::Display for HookName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for HookName {
    type Err = EngineError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|name| name.as_str() == s)
            .ok_or_else(|| EngineError::InvalidArgument(format!("unknown hook name: {s:?}")))
    }
}
