//! Transports that carry RPC packets to the engine.
//!
//! Each transport owns one [`Engine`], negotiates its listener through it,
//! and runs one task per accepted connection:
//!
//! ```text
//! accept ──► send READY ──► read frame ──► dispatch ──► reply | close
//!                               ▲                         │
//!                               └─────────────────────────┘
//! ```
//!
//! - [`websocket`]: loopback WebSocket listener with origin checks
//! - [`socket`]: Unix domain socket listener speaking the IPC frame format
//!   from [`framing`]

pub mod framing;
#[cfg(unix)]
pub mod socket;
pub mod websocket;

use async_trait::async_trait;

use crate::engine::Engine;
use crate::error::EngineResult;

/// Common lifecycle of a transport.
///
/// Once [`Transport::destroy`] has completed, every method except
/// [`Transport::is_destroyed`] and the fixed [`Transport::label`] fails.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Fixed transport label used in log lines.
    fn label(&self) -> &'static str;

    /// Engine backing this transport. Its operations fail once destroyed.
    fn engine(&self) -> &Engine;

    /// Stop accepting, close live connections and release the listener.
    ///
    /// Reached through [`Transport::stop_server`]. Calling it again after a
    /// successful stop is a no-op.
    async fn shutdown(&self) -> anyhow::Result<()>;

    /// Short human-readable transport name.
    fn name(&self) -> EngineResult<&'static str> {
        self.engine().ensure_not_destroyed()?;
        Ok(self.label())
    }

    /// Whether `destroy()` has been called. Always callable.
    fn is_destroyed(&self) -> bool {
        self.engine().is_destroyed()
    }

    /// Stop the server without destroying the transport.
    async fn stop_server(&self) -> anyhow::Result<()> {
        self.engine().ensure_not_destroyed()?;
        self.shutdown().await
    }

    /// Tear down the transport for good.
    ///
    /// Stops the server, then poisons the engine: every later engine
    /// operation, including a second `destroy()`, fails.
    async fn destroy(&self) -> EngineResult<()> {
        let logger = self.engine().begin_destroy()?;
        if let Err(e) = self.stop_server().await {
            logger.error(format_args!("Failed to stop {} server: {e:#}", self.label()));
        }
        self.engine().finish_destroy();
        logger.info(format_args!("{} transport destroyed", self.label()));
        Ok(())
    }
}

/// Generate a unique connection ID using a monotonic counter + random suffix.
pub(crate) fn connection_id(prefix: &str) -> String {
    use std::sync::atomic::{AtomicU64, Ordering};
    static COUNTER: AtomicU64 = AtomicU64::new(0);

    let seq = COUNTER.fetch_add(1, Ordering::Relaxed);
    let rand: u16 = rand::random();
    format!("{prefix}:{seq:x}{rand:04x}")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::EngineError;
    use crate::logging::LoggerConfig;
    use crate::protocol::HookName;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct FakeTransport {
        engine: Engine,
        stops: AtomicUsize,
        fail_stop: bool,
    }

    #[async_trait]
    impl Transport for FakeTransport {
        fn label(&self) -> &'static str {
            "fake"
        }

        fn engine(&self) -> &Engine {
            &self.engine
        }

        async fn shutdown(&self) -> anyhow::Result<()> {
            self.stops.fetch_add(1, Ordering::SeqCst);
            if self.fail_stop {
                anyhow::bail!("listener already gone");
            }
            Ok(())
        }
    }

    fn fake(fail_stop: bool) -> FakeTransport {
        FakeTransport {
            engine: Engine::new("fake", &LoggerConfig::silent()),
            stops: AtomicUsize::new(0),
            fail_stop,
        }
    }

    #[tokio::test]
    async fn test_destroy_stops_server_once() {
        let transport = fake(false);
        assert!(!transport.engine().is_destroyed());

        transport.destroy().await.unwrap();
        assert_eq!(transport.stops.load(Ordering::SeqCst), 1);
        assert!(transport.engine().is_destroyed());

        assert!(matches!(transport.destroy().await, Err(EngineError::AlreadyDestroyed)));
        assert_eq!(transport.stops.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_every_operation_fails_after_destroy() {
        let transport = fake(false);
        transport.destroy().await.unwrap();
        let engine = transport.engine();

        let hook = crate::hooks::Hook::new(|_, _| async { Ok(None) });
        assert!(matches!(engine.add_hook(HookName::Authorize, hook.clone()), Err(EngineError::Destroyed)));
        assert!(matches!(engine.remove_hook(HookName::Authorize, &hook), Err(EngineError::Destroyed)));
        assert!(matches!(engine.remove_all_hooks(HookName::Authorize), Err(EngineError::Destroyed)));
        assert!(matches!(engine.get_hooks(HookName::Authorize), Err(EngineError::Destroyed)));
        assert!(matches!(engine.any_hooks_active(HookName::Authorize), Err(EngineError::Destroyed)));
        assert!(matches!(engine.toggle_hooks(HookName::Authorize, None), Err(EngineError::Destroyed)));
        assert!(matches!(engine.active_hooks(HookName::Authorize), Err(EngineError::Destroyed)));
        assert!(matches!(engine.logger(), Err(EngineError::Destroyed)));
        assert!(matches!(engine.detail(), Err(EngineError::Destroyed)));
        assert!(engine.is_destroyed());
    }

    #[tokio::test]
    async fn test_transport_methods_fail_after_destroy() {
        let transport = fake(false);
        assert_eq!(transport.name().unwrap(), "fake");
        transport.stop_server().await.unwrap();
        assert_eq!(transport.stops.load(Ordering::SeqCst), 1);

        transport.destroy().await.unwrap();
        assert_eq!(transport.stops.load(Ordering::SeqCst), 2);
        assert!(transport.is_destroyed());
        assert!(matches!(transport.name(), Err(EngineError::Destroyed)));
        let err = transport.stop_server().await.unwrap_err();
        assert!(matches!(err.downcast_ref::<EngineError>(), Some(EngineError::Destroyed)));
        assert_eq!(transport.stops.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_destroy_completes_when_stop_fails() {
        let transport = fake(true);
        transport.destroy().await.unwrap();
        assert!(transport.engine().is_destroyed());
        assert!(matches!(transport.engine().logger(), Err(EngineError::Destroyed)));
    }

    #[test]
    fn test_connection_ids_are_unique() {
        let a = connection_id("ws");
        let b = connection_id("ws");
        assert!(a.starts_with("ws:"));
        assert_ne!(a, b);
    }
}
