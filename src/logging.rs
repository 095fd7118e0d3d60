//! Per-engine logging handle.
//!
//! Each engine logs through a [`Logger`] with three channels:
//!
//! - `info` and `error` are emitted whenever the logger has a sink.
//! - `debug` is emitted only when the [`DebugFilter`] accepts the engine's
//!   sanitized name.
//!
//! A silent logger (no sink) turns every channel into a no-op. Messages are
//! routed through the `log` crate with the sanitized engine name as target,
//! so `RUST_LOG` filters still apply on top.
//!
//! # Debug filter syntax
//!
//! Comma or whitespace separated glob patterns; a leading `-` excludes:
//!
//! ```text
//! HOOKWIRE_DEBUG="*,-socket"    # every engine except "socket"
//! HOOKWIRE_DEBUG="websocket"    # only "websocket"
//! ```

use std::fmt;
use std::sync::Arc;

use globset::{Glob, GlobSet, GlobSetBuilder};
use serde::{Deserialize, Serialize};

/// Environment variable holding the debug filter spec.
pub const DEBUG_ENV_VAR: &str = "HOOKWIRE_DEBUG";

/// ANSI color of an engine's log badge.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BadgeColor {
    /// Red badge.
    Red,
    /// Green badge.
    Green,
    /// Yellow badge.
    Yellow,
    /// Blue badge.
    Blue,
    /// Magenta badge.
    Magenta,
    /// Cyan badge.
    Cyan,
}

impl BadgeColor {
    const fn ansi(self) -> u8 {
        match self {
            BadgeColor::Red => 31,
            BadgeColor::Green => 32,
            BadgeColor::Yellow => 33,
            BadgeColor::Blue => 34,
            BadgeColor::Magenta => 35,
            BadgeColor::Cyan => 36,
        }
    }
}

/// Decides which engines emit debug output.
#[derive(Debug, Clone)]
pub struct DebugFilter {
    include: GlobSet,
    exclude: GlobSet,
}

impl Default for DebugFilter {
    fn default() -> Self {
        Self::disabled()
    }
}

impl DebugFilter {
    /// Filter that accepts nothing.
    #[must_use]
    pub fn disabled() -> Self {
        Self {
            include: GlobSet::empty(),
            exclude: GlobSet::empty(),
        }
    }

    /// Filter that accepts every name.
    #[must_use]
    pub fn all() -> Self {
        Self::parse("*")
    }

    /// Parse a filter spec. Invalid patterns are skipped with a warning.
    #[must_use]
    pub fn parse(spec: &str) -> Self {
        let mut include = GlobSetBuilder::new();
        let mut exclude = GlobSetBuilder::new();

        for pattern in spec.split(|c: char| c == ',' || c.is_whitespace()) {
            let (builder, pattern) = match pattern.strip_prefix('-') {
                Some(rest) => (&mut exclude, rest),
                None => (&mut include, pattern),
            };
            if pattern.is_empty() {
                continue;
            }
            match Glob::new(pattern) {
                Ok(glob) => {
                    builder.add(glob);
                }
                Err(e) => log::warn!("Ignoring debug filter pattern {pattern:?}: {e}"),
            }
        }

        Self {
            include: include.build().unwrap_or_else(|_| GlobSet::empty()),
            exclude: exclude.build().unwrap_or_else(|_| GlobSet::empty()),
        }
    }

    /// Whether debug output is enabled for `name` (already sanitized).
    #[must_use]
    pub fn enabled_for(&self, name: &str) -> bool {
        self.include.is_match(name) && !self.exclude.is_match(name)
    }
}

/// Logging configuration handed to an engine at construction.
#[derive(Debug, Clone)]
pub struct LoggerConfig {
    /// Whether a sink exists at all. `false` suppresses every channel.
    pub enabled: bool,
    /// Badge color; `None` prints a plain badge.
    pub color: Option<BadgeColor>,
    /// Debug channel visibility.
    pub debug: DebugFilter,
}

impl Default for LoggerConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            color: None,
            debug: DebugFilter::disabled(),
        }
    }
}

impl LoggerConfig {
    /// Configuration with no sink.
    #[must_use]
    pub fn silent() -> Self {
        Self {
            enabled: false,
            ..Self::default()
        }
    }

    /// Set the badge color.
    #[must_use]
    pub fn with_color(mut self, color: BadgeColor) -> Self {
        self.color = Some(color);
        self
    }

    /// Set the debug filter.
    #[must_use]
    pub fn with_debug(mut self, debug: DebugFilter) -> Self {
        self.debug = debug;
        self
    }
}

#[derive(Debug)]
struct Sink {
    target: String,
    badge: String,
    debug: bool,
}

/// Cheap-to-clone logging handle of one engine.
#[derive(Debug, Clone, Default)]
pub struct Logger {
    sink: Option<Arc<Sink>>,
}

impl Logger {
    /// Build the logger for an engine called `name`.
    #[must_use]
    pub fn new(name: &str, config: &LoggerConfig) -> Self {
        if !config.enabled {
            return Self::silent();
        }
        let target = sanitize_name(name);
        let badge = match config.color {
            Some(color) => format!("\x1b[{}m[{name}]\x1b[0m", color.ansi()),
            None => format!("[{name}]"),
        };
        let debug = config.debug.enabled_for(&target);
        Self {
            sink: Some(Arc::new(Sink {
                target,
                badge,
                debug,
            })),
        }
    }

    /// Logger that drops everything.
    #[must_use]
    pub fn silent() -> Self {
        Self { sink: None }
    }

    /// Whether anything is emitted at all.
    #[must_use]
    pub fn is_enabled(&self) -> bool {
        self.sink.is_some()
    }

    /// Whether the debug channel is emitted.
    #[must_use]
    pub fn debug_enabled(&self) -> bool {
        self.sink.as_ref().is_some_and(|s| s.debug)
    }

    /// Informational channel.
    pub fn info(&self, args: fmt::Arguments<'_>) {
        if let Some(sink) = &self.sink {
            log::info!(target: sink.target.as_str(), "{} {}", sink.badge, args);
        }
    }

    /// Error channel.
    pub fn error(&self, args: fmt::Arguments<'_>) {
        if let Some(sink) = &self.sink {
            log::error!(target: sink.target.as_str(), "{} {}", sink.badge, args);
        }
    }

    /// Debug channel.
    pub fn debug(&self, args: fmt::Arguments<'_>) {
        if let Some(sink) = self.sink.as_ref().filter(|s| s.debug) {
            log::debug!(target: sink.target.as_str(), "{} {}", sink.badge, args);
        }
    }
}

/// Lowercase `name` and collapse every run of non-alphanumerics into `-`.
#[must_use]
pub fn sanitize_name(name: &str) -> String {
    let mut out = String::with_capacity(name.len());
    for c in name.chars() {
        if c.is_ascii_alphanumeric() {
            out.push(c.to_ascii_lowercase());
        } else if !out.is_empty() && !out.ends_with('-') {
            out.push('-');
        }
    }
    while out.ends_with('-') {
        out.pop();
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sanitize_name() {
        assert_eq!(sanitize_name("WebSocket"), "websocket");
        assert_eq!(sanitize_name("Local Socket (IPC)"), "local-socket-ipc");
        assert_eq!(sanitize_name("--x--"), "x");
        assert_eq!(sanitize_name(""), "");
    }

    #[test]
    fn test_debug_filter_patterns() {
        let filter = DebugFilter::parse("*,-socket");
        assert!(filter.enabled_for("websocket"));
        assert!(!filter.enabled_for("socket"));

        let filter = DebugFilter::parse("web*");
        assert!(filter.enabled_for("websocket"));
        assert!(!filter.enabled_for("socket"));

        let filter = DebugFilter::parse("socket websocket");
        assert!(filter.enabled_for("socket"));
        assert!(filter.enabled_for("websocket"));

        assert!(!DebugFilter::disabled().enabled_for("websocket"));
        assert!(DebugFilter::all().enabled_for("anything"));
        assert!(!DebugFilter::parse("").enabled_for("websocket"));
    }

    #[test]
    fn test_silent_logger() {
        let logger = Logger::new("WebSocket", &LoggerConfig::silent().with_debug(DebugFilter::all()));
        assert!(!logger.is_enabled());
        assert!(!logger.debug_enabled());
        // No-ops, must not panic
        logger.info(format_args!("info"));
        logger.error(format_args!("error"));
        logger.debug(format_args!("debug"));
    }

    #[test]
    fn test_debug_visibility_uses_sanitized_name() {
        let config = LoggerConfig::default().with_debug(DebugFilter::parse("local-socket"));
        assert!(Logger::new("Local Socket", &config).debug_enabled());
        assert!(!Logger::new("WebSocket", &config).debug_enabled());
        assert!(Logger::new("WebSocket", &config).is_enabled());
    }

    #[test]
    fn test_badge_color_deserializes_lowercase() {
        let color: BadgeColor = serde_json::from_str("\"magenta\"").unwrap();
        assert_eq!(color, BadgeColor::Magenta);
    }
}
