//! Service host: module registry, concurrent start/stop orchestration and
//! the shutdown coordinator.
//!
//! Lifecycle order:
//! - `start`: `on_init` → state `Starting` → concurrent module start fan-out
//!   (join barrier) → state `Running`.
//! - `shutdown`: state `Stopping` → concurrent module stop fan-out (join
//!   barrier) → state `Stopped` → completion signal → `on_shutdown`.
//!
//! Shutdown happens at most once per start cycle. The `in_shutdown` flag and
//! the exit record are guarded by a single async mutex; the critical section
//! spans the stop fan-out so no waiter observes completion before every
//! module was asked to stop.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::{Mutex, RwLock};
use tokio::sync::watch;
use tokio::task::JoinSet;

use crate::config::CoreConfig;
use crate::contracts::{Module, NullInstance, ServiceInstance};
use crate::errors::CoreError;
use crate::runtime::state::ServiceState;

/// Immutable record describing why and how the service exited.
///
/// Created exactly once per shutdown by the coordinator and broadcast on the
/// completion signal and to [`ServiceInstance::on_shutdown`].
#[derive(Clone, Debug)]
pub struct ServiceExit {
    pub reason: String,
    pub error: Option<Arc<anyhow::Error>>,
    pub exit_code: i32,
}

impl ServiceExit {
    /// Compose the exit record from the shutdown inputs.
    ///
    /// Precedence: the exit code is the explicit code if given, else 1 when
    /// an error is present, else 0. The reason is the explicit reason if
    /// non-empty, else the error's message, else empty.
    fn compose(error: Option<Arc<anyhow::Error>>, reason: &str, exit_code: Option<i32>) -> Self {
        let reason = if reason.is_empty() {
            error.as_ref().map_or_else(String::new, |e| e.to_string())
        } else {
            reason.to_owned()
        };
        let exit_code = exit_code.unwrap_or(i32::from(error.is_some()));
        ServiceExit {
            reason,
            error,
            exit_code,
        }
    }
}

/// Receiver half of the shutdown completion signal.
///
/// Resolves once shutdown has finished; late observers see the already
/// published [`ServiceExit`] immediately instead of blocking.
pub type ShutdownSignal = watch::Receiver<Option<ServiceExit>>;

/// Caller-supplied exit-code override consulted by [`ServiceHost::wait_for_shutdown`].
pub type ExitCallback = dyn Fn(&ServiceExit) -> i32 + Send + Sync;

struct ShutdownState {
    in_shutdown: bool,
    reason: Option<ServiceExit>,
    signal: Option<watch::Sender<Option<ServiceExit>>>,
}

/// Owner of the service lifecycle: module registry, start/stop orchestration
/// and the single race-free shutdown.
pub struct ServiceHost {
    config: CoreConfig,
    instance: Arc<dyn ServiceInstance>,
    locked: AtomicBool,
    modules: RwLock<Vec<Arc<dyn Module>>>,
    state: Mutex<ServiceState>,
    shutdown: tokio::sync::Mutex<ShutdownState>,
    stop_timeout: Option<Duration>,
    span: tracing::Span,
}

impl ServiceHost {
    pub fn new(config: CoreConfig, instance: Arc<dyn ServiceInstance>) -> Self {
        let span = tracing::info_span!("service", name = %config.name);
        let stop_timeout = config.stop_timeout_ms.map(Duration::from_millis);
        ServiceHost {
            config,
            instance,
            locked: AtomicBool::new(false),
            modules: RwLock::new(Vec::new()),
            state: Mutex::new(ServiceState::Uninitialized),
            shutdown: tokio::sync::Mutex::new(ShutdownState {
                in_shutdown: false,
                reason: None,
                signal: None,
            }),
            stop_timeout,
            span,
        }
    }

    /// Host with empty metadata and a [`NullInstance`]. Useful in tests.
    #[must_use]
    pub fn null() -> Self {
        ServiceHost::new(
            CoreConfig {
                name: "null".to_owned(),
                ..CoreConfig::default()
            },
            Arc::new(NullInstance),
        )
    }

    pub fn name(&self) -> &str {
        &self.config.name
    }

    pub fn description(&self) -> &str {
        &self.config.description
    }

    pub fn owner(&self) -> &str {
        &self.config.owner
    }

    pub fn roles(&self) -> &[String] {
        &self.config.roles
    }

    /// True when the host carries no role restriction, the query is empty,
    /// or any queried role is configured.
    pub fn supports_role(&self, roles: &[&str]) -> bool {
        if self.config.roles.is_empty() || roles.is_empty() {
            return true;
        }
        roles
            .iter()
            .any(|r| self.config.roles.iter().any(|have| have == r))
    }

    /// Root logging span of this service, propagated into request contexts.
    pub fn span(&self) -> &tracing::Span {
        &self.span
    }

    pub fn state(&self) -> ServiceState {
        *self.state.lock()
    }

    /// Whether a start cycle is active (a completion signal exists).
    pub async fn is_running(&self) -> bool {
        self.shutdown.lock().await.signal.is_some()
    }

    /// Register a module. Fails once the service has locked (first `start`)
    /// or when a module with the same name is already registered.
    ///
    /// # Errors
    /// [`CoreError::AlreadyStarted`] after the first start call,
    /// [`CoreError::DuplicateModule`] on a name collision.
    pub fn add_module(&self, module: Arc<dyn Module>) -> Result<(), CoreError> {
        if self.locked.load(Ordering::Acquire) {
            return Err(CoreError::AlreadyStarted);
        }
        let mut modules = self.modules.write();
        if modules.iter().any(|m| m.name() == module.name()) {
            return Err(CoreError::DuplicateModule(module.name().to_owned()));
        }
        modules.push(module);
        Ok(())
    }

    /// Snapshot of the registered modules in registration order.
    pub fn modules(&self) -> Vec<Arc<dyn Module>> {
        self.modules.read().clone()
    }

    /// Start the service.
    ///
    /// Locks the registry, runs `on_init`, starts all modules concurrently
    /// and transitions to `Running` once every module has reported. Any
    /// module failure drives shutdown and is returned as
    /// [`CoreError::ModuleStart`]; the service never reaches `Running` with a
    /// failed module. Calling `start` while already running idempotently
    /// returns the existing completion signal.
    ///
    /// With `wait_for_shutdown` set the call blocks until shutdown completes
    /// and then terminates the process (see [`ServiceHost::wait_for_shutdown`]).
    ///
    /// # Errors
    /// [`CoreError::ShuttingDown`] while a shutdown is in progress,
    /// [`CoreError::Init`] when the instance hook rejects startup,
    /// [`CoreError::ModuleStart`] when a module fails to start.
    pub async fn start(&self, wait_for_shutdown: bool) -> Result<ShutdownSignal, CoreError> {
        self.locked.store(true, Ordering::Release);
        let mut sd = self.shutdown.lock().await;

        if sd.in_shutdown {
            return Err(CoreError::ShuttingDown);
        }
        if let Some(sender) = &sd.signal {
            let signal = sender.subscribe();
            drop(sd);
            if wait_for_shutdown {
                self.wait_for_shutdown(None).await;
            }
            return Ok(signal);
        }

        // Re-arm after a completed previous cycle.
        {
            let mut state = self.state.lock();
            if *state == ServiceState::Stopped {
                *state = ServiceState::Uninitialized;
            }
        }

        self.instance.on_init(self).map_err(CoreError::Init)?;

        sd.reason = None;
        let (sender, signal) = watch::channel(None);
        sd.signal = Some(sender);

        self.transition_state(ServiceState::Starting);
        tracing::info!(service = %self.config.name, "starting modules");

        let mut errors = self.start_modules().await;
        if let Some((module, error)) = self.first_start_error(&mut errors) {
            self.shutdown_locked(&mut sd, Some(error.clone()), "", None)
                .await;
            return Err(CoreError::ModuleStart { module, error });
        }

        self.transition_state(ServiceState::Running);
        tracing::info!(service = %self.config.name, "service running");
        drop(sd);

        if wait_for_shutdown {
            self.wait_for_shutdown(None).await;
        }
        Ok(signal)
    }

    /// Planned shutdown with an explicit reason and exit code.
    ///
    /// Returns `true` when this call performed the shutdown, `false` when it
    /// was a no-op (already shut down or never running).
    pub async fn stop(&self, reason: &str, exit_code: i32) -> bool {
        let mut sd = self.shutdown.lock().await;
        self.shutdown_locked(&mut sd, None, reason, Some(exit_code))
            .await
    }

    /// Route a critical runtime error through the instance hook. Unhandled
    /// errors drive an unplanned shutdown carrying the error.
    pub async fn on_critical_error(&self, error: anyhow::Error) {
        if self.instance.on_critical_error(&error) {
            tracing::warn!(error = %error, "critical error handled by instance");
            return;
        }
        let mut sd = self.shutdown.lock().await;
        self.shutdown_locked(&mut sd, Some(Arc::new(error)), "", None)
            .await;
    }

    /// Await the completion signal and return the exit record.
    ///
    /// Resolves immediately when shutdown already completed. Blocks forever
    /// on a host that was never started.
    pub async fn wait(&self) -> ServiceExit {
        let (receiver, done) = {
            let sd = self.shutdown.lock().await;
            (sd.signal.as_ref().map(watch::Sender::subscribe), sd.reason.clone())
        };
        let Some(mut receiver) = receiver else {
            if let Some(exit) = done {
                return exit;
            }
            std::future::pending::<()>().await;
            unreachable!()
        };
        if let Ok(value) = receiver.wait_for(Option::is_some).await {
            if let Some(exit) = value.clone() {
                return exit;
            }
        }
        // Sender dropped without publishing; treat as a clean exit.
        ServiceExit {
            reason: String::new(),
            error: None,
            exit_code: 0,
        }
    }

    /// Block until shutdown completes, then terminate the process.
    ///
    /// The exit code is the callback's result when one is supplied, else 1
    /// when the exit carries an error, else 0. Process termination is part of
    /// this call's contract; it is the only process-terminating path in the
    /// runtime.
    pub async fn wait_for_shutdown(&self, exit_callback: Option<&ExitCallback>) {
        let exit = self.wait().await;
        tracing::info!(reason = %exit.reason, exit_code = exit.exit_code, "shutting down");
        std::process::exit(resolve_exit_code(&exit, exit_callback));
    }

    /// Single shutdown critical section. Caller holds the shutdown mutex.
    ///
    /// Cancellation-safe: callers may drop the future mid-fan-out (a timeout
    /// around `stop`, for example). `in_shutdown` is cleared by a drop guard
    /// on every exit path, and the exit record and completion sender are only
    /// touched after the fan-out, so a cancelled shutdown leaves the host
    /// drivable by a later call.
    async fn shutdown_locked(
        &self,
        sd: &mut ShutdownState,
        error: Option<Arc<anyhow::Error>>,
        reason: &str,
        exit_code: Option<i32>,
    ) -> bool {
        struct Armed<'a>(&'a mut ShutdownState);
        impl Drop for Armed<'_> {
            fn drop(&mut self) {
                self.0.in_shutdown = false;
            }
        }
        sd.in_shutdown = true;
        let armed = Armed(sd);

        if armed.0.reason.is_some() || armed.0.signal.is_none() {
            return false;
        }
        let exit = ServiceExit::compose(error, reason, exit_code);

        self.enter_state(ServiceState::Stopping);
        let stop_errors = self.stop_modules().await;
        if !stop_errors.is_empty() {
            tracing::warn!(
                failed = stop_errors.len(),
                "some modules failed to stop cleanly"
            );
        }

        armed.0.reason = Some(exit.clone());
        self.enter_state(ServiceState::Stopped);
        if let Some(sender) = armed.0.signal.take() {
            let _ = sender.send(Some(exit.clone()));
        }
        self.instance.on_shutdown(&exit);
        tracing::info!(reason = %exit.reason, exit_code = exit.exit_code, "service shut down");
        true
    }

    /// Concurrent start fan-out with join semantics: every module's
    /// completion signal is awaited before returning, even when an early
    /// failure is already known.
    async fn start_modules(&self) -> HashMap<String, anyhow::Error> {
        let mut tasks: JoinSet<Option<(String, anyhow::Error)>> = JoinSet::new();
        for module in self.modules() {
            tasks.spawn(async move {
                if module.is_running() {
                    return None;
                }
                let completion = module.start();
                match completion.await {
                    Ok(Ok(())) => None,
                    Ok(Err(error)) => Some((module.name().to_owned(), error)),
                    Err(_) => Some((
                        module.name().to_owned(),
                        anyhow::anyhow!("start completion signal dropped"),
                    )),
                }
            });
        }

        let mut errors = HashMap::new();
        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok(Some((name, error))) => {
                    tracing::warn!(module = %name, error = %error, "module failed to start");
                    errors.insert(name, error);
                }
                Ok(None) => {}
                Err(join_error) => {
                    tracing::warn!(error = %join_error, "module start task failed to join");
                }
            }
        }
        errors
    }

    /// Concurrent stop fan-out, join semantics identical to start. Per-module
    /// errors are collected and logged; they do not abort the shutdown.
    async fn stop_modules(&self) -> HashMap<String, anyhow::Error> {
        let stop_timeout = self.stop_timeout;
        let mut tasks: JoinSet<Option<(String, anyhow::Error)>> = JoinSet::new();
        for module in self.modules() {
            tasks.spawn(async move {
                if module.is_running() {
                    return None;
                }
                let result = match stop_timeout {
                    Some(limit) => match tokio::time::timeout(limit, module.stop()).await {
                        Ok(result) => result,
                        Err(_) => Err(anyhow::anyhow!("stop timed out after {limit:?}")),
                    },
                    None => module.stop().await,
                };
                result.err().map(|error| (module.name().to_owned(), error))
            });
        }

        let mut errors = HashMap::new();
        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok(Some((name, error))) => {
                    tracing::warn!(module = %name, error = %error, "module failed to stop");
                    errors.insert(name, error);
                }
                Ok(None) => {}
                Err(join_error) => {
                    tracing::warn!(error = %join_error, "module stop task failed to join");
                }
            }
        }
        errors
    }

    /// First failing module in registration order.
    fn first_start_error(
        &self,
        errors: &mut HashMap<String, anyhow::Error>,
    ) -> Option<(String, Arc<anyhow::Error>)> {
        if errors.is_empty() {
            return None;
        }
        for module in self.modules() {
            if let Some(error) = errors.remove(module.name()) {
                return Some((module.name().to_owned(), Arc::new(error)));
            }
        }
        None
    }

    /// Move the state forward to `to` one step at a time, notifying the
    /// instance for every intermediate state crossed.
    ///
    /// # Panics
    /// Panics when `to` is below the current state; the machine never
    /// regresses.
    fn transition_state(&self, to: ServiceState) {
        let steps = {
            let mut state = self.state.lock();
            if to < *state {
                panic!("cannot transition service state backwards from {state} to {to}");
            }
            let mut steps = Vec::new();
            while *state < to {
                let old = *state;
                let new = old.next();
                *state = new;
                steps.push((old, new));
            }
            steps
        };
        for (old, new) in steps {
            self.instance.on_state_change(old, new);
        }
    }

    /// Enter `to` directly with a single notification. Shutdown after a
    /// failed start goes `Starting -> Stopping` without ever announcing
    /// `Running`.
    fn enter_state(&self, to: ServiceState) {
        let step = {
            let mut state = self.state.lock();
            if to < *state {
                panic!("cannot transition service state backwards from {state} to {to}");
            }
            if *state == to {
                None
            } else {
                let old = *state;
                *state = to;
                Some((old, to))
            }
        };
        if let Some((old, new)) = step {
            self.instance.on_state_change(old, new);
        }
    }
}

/// Exit code precedence: explicit callback result > error-implies-1 > 0.
fn resolve_exit_code(exit: &ServiceExit, exit_callback: Option<&ExitCallback>) -> i32 {
    match exit_callback {
        Some(callback) => callback(exit),
        None => i32::from(exit.error.is_some()),
    }
}
