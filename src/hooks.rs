//! Hook registry: per-engine callbacks keyed by [`HookName`].
//!
//! Every hook name owns an ordered set of hooks and an `active` flag. The
//! flag is independent of whether any hooks are registered, but
//! [`HookRegistry::any_active`] reports `false` for an empty list
//! regardless of the flag. Transports use that single signal to decide
//! whether to wait for hook results before responding.
//!
//! # Example
//!
//! ```rust,ignore
//! let hook = Hook::new(|message, origin| async move {
//!     log::info!("{} from {:?}", message.cmd, origin);
//!     Ok(None) // keep the default response
//! });
//! engine.add_hook(HookName::Authorize, hook.clone())?;
//! ```

use std::fmt;
use std::future::Future;
use std::sync::Arc;

use futures_util::future::BoxFuture;

use crate::error::{EngineError, EngineResult};
use crate::protocol::{HookName, Message};

/// Future returned by a hook.
///
/// Resolves to `Some(code)` with a positive `code` to close the connection
/// with that status instead of sending the default response.
pub type HookFuture = BoxFuture<'static, anyhow::Result<Option<u16>>>;

type HookFn = dyn Fn(Arc<Message>, Option<String>) -> HookFuture + Send + Sync;

/// A registered callback.
///
/// Cloning shares the callback; equality is identity of the shared
/// callback, so registering a clone of an already registered hook is a no-op.
#[derive(Clone)]
pub struct Hook(Arc<HookFn>);

impl Hook {
    /// Wrap an async callback receiving the message and the connection
    /// origin (`None` for local sockets).
    pub fn new<F, Fut>(f: F) -> Self
    where
        F: Fn(Arc<Message>, Option<String>) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = anyhow::Result<Option<u16>>> + Send + 'static,
    {
        let inner: Arc<HookFn> =
            Arc::new(move |message: Arc<Message>, origin: Option<String>| -> HookFuture {
                Box::pin(f(message, origin))
            });
        Self(inner)
    }

    /// Invoke the hook.
    pub fn call(&self, message: Arc<Message>, origin: Option<String>) -> HookFuture {
        (self.0)(message, origin)
    }
}

impl PartialEq for Hook {
    fn eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.0, &other.0)
    }
}

impl Eq for Hook {}

impl fmt::Debug for Hook {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Hook({:p})", Arc::as_ptr(&self.0).cast::<()>())
    }
}

/// Hooks and activity flag for one hook name.
#[derive(Debug)]
struct HookEntry {
    list: Vec<Hook>,
    active: bool,
}

impl Default for HookEntry {
    fn default() -> Self {
        Self {
            list: Vec::new(),
            active: true,
        }
    }
}

/// Storage for every hook name's entry.
///
/// Built eagerly with one entry per hook name. Once poisoned (on engine
/// destroy) every operation fails with [`EngineError::Destroyed`].
#[derive(Debug)]
pub struct HookRegistry {
    entries: Option<[HookEntry; HookName::COUNT]>,
}

impl Default for HookRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl HookRegistry {
    /// Create a registry with an empty, active entry for every hook name.
    #[must_use]
    pub fn new() -> Self {
        Self {
            entries: Some(std::array::from_fn(|_| HookEntry::default())),
        }
    }

    fn entry(&self, name: HookName) -> EngineResult<&HookEntry> {
        self.entries
            .as_ref()
            .map(|entries| &entries[name.index()])
            .ok_or(EngineError::Destroyed)
    }

    fn entry_mut(&mut self, name: HookName) -> EngineResult<&mut HookEntry> {
        self.entries
            .as_mut()
            .map(|entries| &mut entries[name.index()])
            .ok_or(EngineError::Destroyed)
    }

    /// Register `hook` under `name`.
    ///
    /// Returns `None` if the same hook is already registered (nothing is
    /// inserted), otherwise the new number of hooks for `name`.
    pub fn add(&mut self, name: HookName, hook: Hook) -> EngineResult<Option<usize>> {
        let entry = self.entry_mut(name)?;
        if entry.list.contains(&hook) {
            return Ok(None);
        }
        entry.list.push(hook);
        Ok(Some(entry.list.len()))
    }

    /// Unregister `hook`. Returns whether it was registered.
    pub fn remove(&mut self, name: HookName, hook: &Hook) -> EngineResult<bool> {
        let entry = self.entry_mut(name)?;
        match entry.list.iter().position(|h| h == hook) {
            Some(idx) => {
                entry.list.remove(idx);
                Ok(true)
            }
            None => Ok(false),
        }
    }

    /// Unregister every hook for `name`. Returns whether any were registered.
    pub fn remove_all(&mut self, name: HookName) -> EngineResult<bool> {
        let entry = self.entry_mut(name)?;
        let had_hooks = !entry.list.is_empty();
        entry.list.clear();
        Ok(had_hooks)
    }

    /// Snapshot of the hooks for `name`, in insertion order.
    pub fn get(&self, name: HookName) -> EngineResult<Vec<Hook>> {
        Ok(self.entry(name)?.list.clone())
    }

    /// `false` if no hooks are registered, otherwise the activity flag.
    pub fn any_active(&self, name: HookName) -> EngineResult<bool> {
        let entry = self.entry(name)?;
        Ok(!entry.list.is_empty() && entry.active)
    }

    /// Set the activity flag (`Some`) or flip it (`None`).
    ///
    /// Returns the resulting [`Self::any_active`] value.
    pub fn toggle(&mut self, name: HookName, active: Option<bool>) -> EngineResult<bool> {
        let entry = self.entry_mut(name)?;
        entry.active = active.unwrap_or(!entry.active);
        self.any_active(name)
    }

    /// Hooks to run for `name`: empty unless [`Self::any_active`].
    pub fn active(&self, name: HookName) -> EngineResult<Vec<Hook>> {
        if self.any_active(name)? {
            self.get(name)
        } else {
            Ok(Vec::new())
        }
    }

    /// Clear every entry and make all further operations fail.
    pub fn poison(&mut self) {
        if let Some(entries) = self.entries.as_mut() {
            for entry in entries.iter_mut() {
                entry.list.clear();
            }
        }
        self.entries = None;
    }

    /// Whether [`Self::poison`] has been called.
    #[must_use]
    pub fn is_poisoned(&self) -> bool {
        self.entries.is_none()
    }
}
