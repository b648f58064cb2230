use async_trait::async_trait;
use tokio::sync::oneshot;

use crate::runtime::{ServiceExit, ServiceHost, ServiceState};

/// A pluggable unit of service functionality with an independent
/// start/stop lifecycle, owned by the [`ServiceHost`] registry.
///
/// Modules are registered before the first `start()` call locks the host and
/// are started/stopped exactly once per start/stop cycle. Start and stop are
/// dispatched concurrently across modules; no ordering between modules is
/// guaranteed.
#[async_trait]
pub trait Module: Send + Sync + 'static {
    /// Registry identity. Must be unique within one host.
    fn name(&self) -> &str;

    /// Begin starting the module and hand back its completion signal.
    ///
    /// The receiver resolves once the module has finished starting: `Ok(())`
    /// when it is up, `Err` when startup failed. The host treats a dropped
    /// sender as a failed start.
    fn start(&self) -> oneshot::Receiver<anyhow::Result<()>>;

    /// Stop the module. Called during shutdown; errors are collected and
    /// logged by the host but do not abort the shutdown.
    async fn stop(&self) -> anyhow::Result<()>;

    /// Whether the module currently reports itself as running.
    fn is_running(&self) -> bool;
}

/// User-supplied lifecycle hooks customizing runtime behavior.
///
/// All hooks are invoked synchronously at defined points of the service
/// lifecycle. Every hook has a no-op default so instances only implement
/// what they care about.
pub trait ServiceInstance: Send + Sync + 'static {
    /// Runs before any module starts; an error aborts startup.
    fn on_init(&self, host: &ServiceHost) -> anyhow::Result<()> {
        let _ = host;
        Ok(())
    }

    /// Observes every single-step state transition, in state order.
    fn on_state_change(&self, old: ServiceState, new: ServiceState) {
        let _ = (old, new);
    }

    /// Observes the final exit record once shutdown has completed.
    fn on_shutdown(&self, exit: &ServiceExit) {
        let _ = exit;
    }

    /// First refusal on a critical runtime error. Returning `true` marks the
    /// error handled and suppresses the automatic unplanned shutdown.
    fn on_critical_error(&self, error: &anyhow::Error) -> bool {
        let _ = error;
        false
    }
}

/// Instance with all hooks left at their defaults. Useful in tests and for
/// services that need no lifecycle customization.
pub struct NullInstance;

impl ServiceInstance for NullInstance {}
