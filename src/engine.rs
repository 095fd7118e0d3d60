//! Protocol engine: hook registry, logging and the destroy lifecycle.
//!
//! One [`Engine`] backs one transport instance. Every connection accepted by
//! that transport shares the engine's registry, so toggling or registering
//! hooks affects current and future connections alike.
//!
//! # Lifecycle
//!
//! ```text
//! Active ──destroy()──► Destroying ──stop_server() done──► Destroyed
//! ```
//!
//! Once `destroy()` begins, every public operation fails with
//! [`EngineError::Destroyed`] and a second `destroy()` fails with
//! [`EngineError::AlreadyDestroyed`]. Only [`Engine::is_destroyed`] keeps
//! working.

use std::future::Future;
use std::io;
use std::path::PathBuf;
use std::sync::{Mutex, MutexGuard};

use crate::error::{EngineError, EngineResult};
use crate::hooks::{Hook, HookRegistry};
use crate::logging::{Logger, LoggerConfig};
use crate::negotiate::{negotiate, CandidateRange};
use crate::protocol::HookName;

/// Connection detail a transport negotiated for its listener.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ServerDetail {
    /// Loopback TCP port.
    Port(u16),
    /// Filesystem path of a local socket.
    Path(PathBuf),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Phase {
    Active,
    Destroying,
    Destroyed,
}

#[derive(Debug)]
struct State {
    phase: Phase,
    registry: HookRegistry,
    logger: Logger,
    detail: Option<ServerDetail>,
}

/// Transport-agnostic core shared by every transport.
#[derive(Debug)]
pub struct Engine {
    state: Mutex<State>,
}

impl Engine {
    /// Create an active engine named `name` (used for log targets and the
    /// debug filter).
    #[must_use]
    pub fn new(name: &str, logging: &LoggerConfig) -> Self {
        Self {
            state: Mutex::new(State {
                phase: Phase::Active,
                registry: HookRegistry::new(),
                logger: Logger::new(name, logging),
                detail: None,
            }),
        }
    }

    fn lock(&self) -> MutexGuard<'_, State> {
        // A panicking hook never runs under this lock; recover the guard anyway.
        self.state
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
    }

    fn active(&self) -> EngineResult<MutexGuard<'_, State>> {
        let state = self.lock();
        if state.phase == Phase::Active {
            Ok(state)
        } else {
            Err(EngineError::Destroyed)
        }
    }

    /// Start building an engine called `name`.
    #[must_use]
    pub fn builder(name: impl Into<String>) -> EngineBuilder {
        EngineBuilder {
            name: name.into(),
            logging: LoggerConfig::default(),
        }
    }

    /// Register `hook` for `name`.
    ///
    /// Returns `None` if the hook was already registered, otherwise the new
    /// number of hooks for `name`.
    pub fn add_hook(&self, name: HookName, hook: Hook) -> EngineResult<Option<usize>> {
        self.active()?.registry.add(name, hook)
    }

    /// Unregister `hook`. Returns whether it was registered.
    pub fn remove_hook(&self, name: HookName, hook: &Hook) -> EngineResult<bool> {
        self.active()?.registry.remove(name, hook)
    }

    /// Unregister all hooks for `name`. Returns whether any existed.
    pub fn remove_all_hooks(&self, name: HookName) -> EngineResult<bool> {
        self.active()?.registry.remove_all(name)
    }

    /// Snapshot of the hooks registered for `name`, in insertion order.
    pub fn get_hooks(&self, name: HookName) -> EngineResult<Vec<Hook>> {
        self.active()?.registry.get(name)
    }

    /// `false` when no hooks are registered for `name`, otherwise its
    /// activity flag.
    pub fn any_hooks_active(&self, name: HookName) -> EngineResult<bool> {
        self.active()?.registry.any_active(name)
    }

    /// Set (`Some`) or flip (`None`) the activity flag of `name`.
    ///
    /// Returns the resulting [`Self::any_hooks_active`] value.
    pub fn toggle_hooks(&self, name: HookName, active: Option<bool>) -> EngineResult<bool> {
        self.active()?.registry.toggle(name, active)
    }

    /// Hooks to run for a message of kind `name`; empty when inactive.
    pub fn active_hooks(&self, name: HookName) -> EngineResult<Vec<Hook>> {
        self.active()?.registry.active(name)
    }

    /// [`Self::add_hook`] with a string hook name.
    pub fn add_hook_by_key(&self, key: &str, hook: Hook) -> EngineResult<Option<usize>> {
        self.add_hook(key.parse()?, hook)
    }

    /// [`Self::remove_hook`] with a string hook name.
    pub fn remove_hook_by_key(&self, key: &str, hook: &Hook) -> EngineResult<bool> {
        self.remove_hook(key.parse()?, hook)
    }

    /// [`Self::remove_all_hooks`] with a string hook name.
    pub fn remove_all_hooks_by_key(&self, key: &str) -> EngineResult<bool> {
        self.remove_all_hooks(key.parse()?)
    }

    /// [`Self::get_hooks`] with a string hook name.
    pub fn get_hooks_by_key(&self, key: &str) -> EngineResult<Vec<Hook>> {
        self.get_hooks(key.parse()?)
    }

    /// [`Self::any_hooks_active`] with a string hook name.
    pub fn any_hooks_active_by_key(&self, key: &str) -> EngineResult<bool> {
        self.any_hooks_active(key.parse()?)
    }

    /// [`Self::toggle_hooks`] with a string hook name.
    pub fn toggle_hooks_by_key(&self, key: &str, active: Option<bool>) -> EngineResult<bool> {
        self.toggle_hooks(key.parse()?, active)
    }

    /// Logging handle of this engine.
    pub fn logger(&self) -> EngineResult<Logger> {
        Ok(self.active()?.logger.clone())
    }

    /// Negotiated listener detail, once a transport has bound.
    pub fn detail(&self) -> EngineResult<Option<ServerDetail>> {
        Ok(self.active()?.detail.clone())
    }

    /// Whether `destroy()` has been called. Always callable.
    pub fn is_destroyed(&self) -> bool {
        self.lock().phase != Phase::Active
    }

    /// Fails with [`EngineError::Destroyed`] once destroy has completed.
    ///
    /// Passes while a destroy is still tearing the transport down, so the
    /// teardown itself can stop the server.
    pub(crate) fn ensure_not_destroyed(&self) -> EngineResult<()> {
        if self.lock().phase == Phase::Destroyed {
            return Err(EngineError::Destroyed);
        }
        Ok(())
    }

    /// Bind the first free candidate of `range` and record its detail.
    ///
    /// `detail` maps the winning candidate to the recorded
    /// [`ServerDetail`]. Nothing is recorded on failure.
    pub async fn negotiate<T, F, Fut>(
        &self,
        range: CandidateRange,
        bind: F,
        detail: impl FnOnce(u16, &T) -> ServerDetail,
    ) -> EngineResult<(u16, T)>
    where
        F: FnMut(u16) -> Fut,
        Fut: Future<Output = io::Result<T>>,
    {
        let logger = self.logger()?;
        let (candidate, bound) = negotiate(range, bind, &logger).await?;
        let detail = detail(candidate, &bound);

        let mut state = self.active()?;
        logger.info(format_args!("Listening on {detail:?}"));
        state.detail = Some(detail);
        Ok((candidate, bound))
    }

    /// Forget the negotiated detail. Used by transports when they stop.
    pub(crate) fn release_detail(&self) {
        self.lock().detail = None;
    }

    /// Enter the destroying phase, returning the logger for teardown output.
    pub(crate) fn begin_destroy(&self) -> EngineResult<Logger> {
        let mut state = self.lock();
        if state.phase != Phase::Active {
            return Err(EngineError::AlreadyDestroyed);
        }
        state.phase = Phase::Destroying;
        Ok(state.logger.clone())
    }

    /// Poison the registry and drop the logging handle.
    pub(crate) fn finish_destroy(&self) {
        let mut state = self.lock();
        state.registry.poison();
        state.logger = Logger::silent();
        state.detail = None;
        state.phase = Phase::Destroyed;
    }
}

/// Builder for [`Engine`].
#[derive(Debug, Clone)]
pub struct EngineBuilder {
    name: String,
    logging: LoggerConfig,
}

impl EngineBuilder {
    /// Logging configuration (sink, badge color, debug filter).
    #[must_use]
    pub fn logging(mut self, logging: LoggerConfig) -> Self {
        self.logging = logging;
        self
    }

    /// Build the engine in the active state.
    #[must_use]
    pub fn build(self) -> Engine {
        Engine::new(&self.name, &self.logging)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn engine() -> Engine {
        Engine::new("test", &LoggerConfig::silent())
    }

    fn noop() -> Hook {
        Hook::new(|_, _| async { Ok(None) })
    }

    #[test]
    fn test_hook_api_round_trip() {
        let engine = engine();
        let a = noop();
        let b = noop();

        assert_eq!(engine.add_hook(HookName::Authorize, a.clone()).unwrap(), Some(1));
        assert_eq!(engine.add_hook(HookName::Authorize, a.clone()).unwrap(), None);
        assert_eq!(engine.add_hook(HookName::Authorize, b.clone()).unwrap(), Some(2));
        assert_eq!(engine.get_hooks(HookName::Authorize).unwrap(), vec![a.clone(), b]);
        assert!(engine.any_hooks_active(HookName::Authorize).unwrap());
        assert!(!engine.toggle_hooks(HookName::Authorize, None).unwrap());
        assert!(engine.active_hooks(HookName::Authorize).unwrap().is_empty());
        assert!(engine.remove_hook(HookName::Authorize, &a).unwrap());
        assert!(engine.remove_all_hooks(HookName::Authorize).unwrap());
        assert!(!engine.any_hooks_active(HookName::Authorize).unwrap());
    }

    #[test]
    fn test_string_keys() {
        let engine = Engine::builder("keys").logging(LoggerConfig::silent()).build();
        let hook = noop();

        assert_eq!(engine.add_hook_by_key("DEEP_LINK_CHANNEL", hook.clone()).unwrap(), Some(1));
        assert_eq!(engine.get_hooks(HookName::DeepLinkChannel).unwrap(), vec![hook.clone()]);
        assert!(engine.any_hooks_active_by_key("DEEP_LINK_CHANNEL").unwrap());
        assert!(!engine.toggle_hooks_by_key("DEEP_LINK_CHANNEL", Some(false)).unwrap());
        assert!(engine.remove_hook_by_key("DEEP_LINK_CHANNEL", &hook).unwrap());
        assert!(!engine.remove_all_hooks_by_key("DEEP_LINK_CHANNEL").unwrap());
        assert!(engine.get_hooks_by_key("SET_ACTIVITY").unwrap().is_empty());

        assert!(matches!(
            engine.add_hook_by_key("DEEP_LINK", hook),
            Err(EngineError::InvalidArgument(_))
        ));
    }

    #[test]
    fn test_destroy_phases() {
        let engine = engine();
        engine.add_hook(HookName::SetActivity, noop()).unwrap();

        engine.begin_destroy().unwrap();
        assert!(engine.is_destroyed());
        assert!(matches!(engine.get_hooks(HookName::SetActivity), Err(EngineError::Destroyed)));
        assert!(matches!(engine.begin_destroy(), Err(EngineError::AlreadyDestroyed)));

        engine.finish_destroy();
        assert!(engine.is_destroyed());
        assert!(matches!(engine.logger(), Err(EngineError::Destroyed)));
        assert!(matches!(engine.detail(), Err(EngineError::Destroyed)));
        assert!(matches!(engine.begin_destroy(), Err(EngineError::AlreadyDestroyed)));
    }

    #[tokio::test]
    async fn test_negotiate_records_detail() {
        let engine = engine();
        assert_eq!(engine.detail().unwrap(), None);

        let (port, ()) = engine
            .negotiate(
                CandidateRange::new(6463, 6472),
                |port| async move {
                    if port < 6466 {
                        Err(io::Error::from(io::ErrorKind::AddrInUse))
                    } else {
                        Ok(())
                    }
                },
                |port, ()| ServerDetail::Port(port),
            )
            .await
            .unwrap();

        assert_eq!(port, 6466);
        assert_eq!(engine.detail().unwrap(), Some(ServerDetail::Port(6466)));

        engine.release_detail();
        assert_eq!(engine.detail().unwrap(), None);
    }

    #[tokio::test]
    async fn test_failed_negotiation_records_nothing() {
        let engine = engine();
        let result = engine
            .negotiate(
                CandidateRange::new(0, 2),
                |_| async { Err::<(), _>(io::Error::from(io::ErrorKind::AddrInUse)) },
                |i, ()| ServerDetail::Port(i),
            )
            .await;
        assert!(matches!(result, Err(EngineError::Exhausted { .. })));
        assert_eq!(engine.detail().unwrap(), None);
    }
}
