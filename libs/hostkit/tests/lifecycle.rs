//! End-to-end lifecycle tests for the service host: concurrent module
//! orchestration, the shutdown coordinator and the observer notifications.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use tokio::sync::oneshot;

use hostkit::config::CoreConfig;
use hostkit::{
    CoreError, Module, NullInstance, ServiceExit, ServiceHost, ServiceInstance, ServiceState,
};

struct TestModule {
    name: String,
    start_delay: Duration,
    start_error: Option<String>,
    stop_delay: Duration,
    stop_error: Option<String>,
    reports_running: bool,
    started: Arc<AtomicUsize>,
    stopped: Arc<AtomicUsize>,
}

impl TestModule {
    fn named(name: &str) -> Arc<Self> {
        Arc::new(TestModule {
            name: name.to_owned(),
            start_delay: Duration::ZERO,
            start_error: None,
            stop_delay: Duration::ZERO,
            stop_error: None,
            reports_running: false,
            started: Arc::new(AtomicUsize::new(0)),
            stopped: Arc::new(AtomicUsize::new(0)),
        })
    }

    fn build(name: &str) -> TestModuleBuilder {
        TestModuleBuilder {
            inner: TestModule {
                name: name.to_owned(),
                start_delay: Duration::ZERO,
                start_error: None,
                stop_delay: Duration::ZERO,
                stop_error: None,
                reports_running: false,
                started: Arc::new(AtomicUsize::new(0)),
                stopped: Arc::new(AtomicUsize::new(0)),
            },
        }
    }

    fn started(&self) -> usize {
        self.started.load(Ordering::SeqCst)
    }

    fn stopped(&self) -> usize {
        self.stopped.load(Ordering::SeqCst)
    }
}

struct TestModuleBuilder {
    inner: TestModule,
}

impl TestModuleBuilder {
    fn start_delay(mut self, delay: Duration) -> Self {
        self.inner.start_delay = delay;
        self
    }

    fn failing_start(mut self, message: &str) -> Self {
        self.inner.start_error = Some(message.to_owned());
        self
    }

    fn stop_delay(mut self, delay: Duration) -> Self {
        self.inner.stop_delay = delay;
        self
    }

    fn failing_stop(mut self, message: &str) -> Self {
        self.inner.stop_error = Some(message.to_owned());
        self
    }

    fn reports_running(mut self) -> Self {
        self.inner.reports_running = true;
        self
    }

    fn finish(self) -> Arc<TestModule> {
        Arc::new(self.inner)
    }
}

#[async_trait]
impl Module for TestModule {
    fn name(&self) -> &str {
        &self.name
    }

    fn start(&self) -> oneshot::Receiver<anyhow::Result<()>> {
        let (tx, rx) = oneshot::channel();
        let delay = self.start_delay;
        let error = self.start_error.clone();
        let started = self.started.clone();
        tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            started.fetch_add(1, Ordering::SeqCst);
            let result = match error {
                Some(message) => Err(anyhow::anyhow!(message)),
                None => Ok(()),
            };
            let _ = tx.send(result);
        });
        rx
    }

    async fn stop(&self) -> anyhow::Result<()> {
        tokio::time::sleep(self.stop_delay).await;
        self.stopped.fetch_add(1, Ordering::SeqCst);
        match &self.stop_error {
            Some(message) => Err(anyhow::anyhow!(message.clone())),
            None => Ok(()),
        }
    }

    fn is_running(&self) -> bool {
        self.reports_running
    }
}

struct RecordingInstance {
    transitions: Arc<Mutex<Vec<(ServiceState, ServiceState)>>>,
    exits: Arc<Mutex<Vec<ServiceExit>>>,
    handle_critical: bool,
}

impl RecordingInstance {
    fn new(handle_critical: bool) -> Arc<Self> {
        Arc::new(RecordingInstance {
            transitions: Arc::new(Mutex::new(Vec::new())),
            exits: Arc::new(Mutex::new(Vec::new())),
            handle_critical,
        })
    }

    fn saw_state(&self, state: ServiceState) -> bool {
        self.transitions
            .lock()
            .unwrap()
            .iter()
            .any(|(_, new)| *new == state)
    }
}

impl ServiceInstance for RecordingInstance {
    fn on_state_change(&self, old: ServiceState, new: ServiceState) {
        self.transitions.lock().unwrap().push((old, new));
    }

    fn on_shutdown(&self, exit: &ServiceExit) {
        self.exits.lock().unwrap().push(exit.clone());
    }

    fn on_critical_error(&self, _error: &anyhow::Error) -> bool {
        self.handle_critical
    }
}

fn host_named(name: &str) -> ServiceHost {
    ServiceHost::new(
        CoreConfig {
            name: name.to_owned(),
            ..CoreConfig::default()
        },
        Arc::new(NullInstance),
    )
}

fn host_with_instance(instance: Arc<RecordingInstance>) -> ServiceHost {
    ServiceHost::new(
        CoreConfig {
            name: "test".to_owned(),
            ..CoreConfig::default()
        },
        instance,
    )
}

#[tokio::test]
async fn start_runs_all_modules_concurrently() {
    let host = host_named("svc");
    let fast = TestModule::named("fast");
    let slow = TestModule::build("slow")
        .start_delay(Duration::from_millis(80))
        .finish();
    host.add_module(fast.clone()).unwrap();
    host.add_module(slow.clone()).unwrap();

    let begin = Instant::now();
    host.start(false).await.unwrap();

    assert_eq!(fast.started(), 1);
    assert_eq!(slow.started(), 1);
    assert_eq!(host.state(), ServiceState::Running);
    assert!(host.is_running().await);
    // The join barrier waits for the slowest module but no longer.
    assert!(begin.elapsed() >= Duration::from_millis(80));
}

#[tokio::test]
async fn start_is_idempotent_while_running() {
    let host = host_named("svc");
    let module = TestModule::named("m");
    host.add_module(module.clone()).unwrap();

    host.start(false).await.unwrap();
    host.start(false).await.unwrap();

    assert_eq!(module.started(), 1);
}

#[tokio::test]
async fn registry_locks_on_first_start() {
    let host = host_named("svc");
    host.add_module(TestModule::named("a")).unwrap();
    host.start(false).await.unwrap();

    let err = host.add_module(TestModule::named("b")).unwrap_err();
    assert!(matches!(err, CoreError::AlreadyStarted));
}

#[tokio::test]
async fn duplicate_module_names_are_rejected() {
    let host = host_named("svc");
    host.add_module(TestModule::named("dup")).unwrap();
    let err = host.add_module(TestModule::named("dup")).unwrap_err();
    assert!(matches!(err, CoreError::DuplicateModule(name) if name == "dup"));
}

#[tokio::test]
async fn failed_start_is_all_or_nothing() {
    let instance = RecordingInstance::new(false);
    let host = host_with_instance(instance.clone());

    let ok_fast = TestModule::named("ok-fast");
    let failing = TestModule::build("failing")
        .start_delay(Duration::from_millis(20))
        .failing_start("port already bound")
        .finish();
    let ok_slow = TestModule::build("ok-slow")
        .start_delay(Duration::from_millis(120))
        .finish();
    host.add_module(ok_fast.clone()).unwrap();
    host.add_module(failing.clone()).unwrap();
    host.add_module(ok_slow.clone()).unwrap();

    let err = host.start(false).await.unwrap_err();
    match err {
        CoreError::ModuleStart { module, error } => {
            assert_eq!(module, "failing");
            assert_eq!(error.to_string(), "port already bound");
        }
        other => panic!("unexpected error: {other}"),
    }

    // Join completeness: the slow module's start completed even though the
    // failure was known much earlier.
    assert_eq!(ok_slow.started(), 1);

    // The service never announced Running and modules were asked to stop
    // before the error was returned.
    assert!(!instance.saw_state(ServiceState::Running));
    assert!(instance.saw_state(ServiceState::Stopped));
    assert_eq!(ok_fast.stopped(), 1);
    assert_eq!(ok_slow.stopped(), 1);
    assert_eq!(failing.stopped(), 1);
    assert_eq!(host.state(), ServiceState::Stopped);
    assert!(!host.is_running().await);
}

#[tokio::test]
async fn shutdown_is_idempotent() {
    let host = host_named("svc");
    let module = TestModule::named("m");
    host.add_module(module.clone()).unwrap();
    host.start(false).await.unwrap();

    assert!(host.stop("manual", 7).await);
    assert!(!host.stop("again", 9).await);
    assert_eq!(module.stopped(), 1);

    let exit = host.wait().await;
    assert_eq!(exit.reason, "manual");
    assert_eq!(exit.exit_code, 7);
    assert!(exit.error.is_none());
}

#[tokio::test]
async fn stopping_a_service_that_never_ran_is_a_noop() {
    let host = host_named("svc");
    assert!(!host.stop("nothing to do", 0).await);
}

#[tokio::test]
async fn unhandled_critical_error_drives_unplanned_shutdown() {
    let instance = RecordingInstance::new(false);
    let host = host_with_instance(instance.clone());
    let module = TestModule::named("m");
    host.add_module(module.clone()).unwrap();
    host.start(false).await.unwrap();

    host.on_critical_error(anyhow::anyhow!("disk failure")).await;

    assert_eq!(module.stopped(), 1);
    let exit = host.wait().await;
    assert_eq!(exit.reason, "disk failure");
    assert_eq!(exit.exit_code, 1);
    assert!(exit.error.is_some());

    let exits = instance.exits.lock().unwrap();
    assert_eq!(exits.len(), 1);
    assert_eq!(exits[0].reason, "disk failure");
}

#[tokio::test]
async fn handled_critical_error_suppresses_shutdown() {
    let instance = RecordingInstance::new(true);
    let host = host_with_instance(instance);
    let module = TestModule::named("m");
    host.add_module(module.clone()).unwrap();
    host.start(false).await.unwrap();

    host.on_critical_error(anyhow::anyhow!("transient glitch"))
        .await;

    assert!(host.is_running().await);
    assert_eq!(module.stopped(), 0);
}

#[tokio::test]
async fn observer_sees_every_transition_in_order() {
    let instance = RecordingInstance::new(false);
    let host = host_with_instance(instance.clone());
    host.add_module(TestModule::named("m")).unwrap();

    host.start(false).await.unwrap();
    host.stop("done", 0).await;

    assert_eq!(
        *instance.transitions.lock().unwrap(),
        vec![
            (ServiceState::Uninitialized, ServiceState::Initialized),
            (ServiceState::Initialized, ServiceState::Starting),
            (ServiceState::Starting, ServiceState::Running),
            (ServiceState::Running, ServiceState::Stopping),
            (ServiceState::Stopping, ServiceState::Stopped),
        ]
    );
}

#[tokio::test]
async fn stop_failures_do_not_abort_shutdown() {
    let host = host_named("svc");
    let bad = TestModule::build("bad").failing_stop("flush failed").finish();
    let good = TestModule::named("good");
    host.add_module(bad.clone()).unwrap();
    host.add_module(good.clone()).unwrap();
    host.start(false).await.unwrap();

    assert!(host.stop("rollout", 0).await);
    assert_eq!(bad.stopped(), 1);
    assert_eq!(good.stopped(), 1);
    assert_eq!(host.wait().await.exit_code, 0);
}

#[tokio::test]
async fn bounded_stop_wait_caps_a_stuck_module() {
    let host = ServiceHost::new(
        CoreConfig {
            name: "svc".to_owned(),
            stop_timeout_ms: Some(50),
            ..CoreConfig::default()
        },
        Arc::new(NullInstance),
    );
    let stuck = TestModule::build("stuck")
        .stop_delay(Duration::from_secs(30))
        .finish();
    host.add_module(stuck.clone()).unwrap();
    host.start(false).await.unwrap();

    let begin = Instant::now();
    assert!(host.stop("deadline", 0).await);
    assert!(begin.elapsed() < Duration::from_secs(5));
    // The stop call never completed; the bounded wait moved on without it.
    assert_eq!(stuck.stopped(), 0);
}

#[tokio::test]
async fn cancelled_stop_leaves_the_host_drivable() {
    let host = host_named("svc");
    let slow = TestModule::build("slow")
        .stop_delay(Duration::from_millis(300))
        .finish();
    host.add_module(slow.clone()).unwrap();
    host.start(false).await.unwrap();

    // The caller abandons the stop mid-fan-out, a normal pattern when a
    // deadline wraps the shutdown call.
    let cancelled =
        tokio::time::timeout(Duration::from_millis(50), host.stop("abandoned", 0)).await;
    assert!(cancelled.is_err());

    // The host is not wedged: start still resolves against the live cycle
    // and a later stop drives the shutdown to completion.
    host.start(false).await.unwrap();
    assert!(host.stop("second attempt", 0).await);
    assert_eq!(slow.stopped(), 1);

    let exit = host.wait().await;
    assert_eq!(exit.reason, "second attempt");
    assert_eq!(exit.exit_code, 0);
}

#[tokio::test]
async fn modules_reporting_running_are_left_alone() {
    let host = host_named("svc");
    let external = TestModule::build("external").reports_running().finish();
    host.add_module(external.clone()).unwrap();

    host.start(false).await.unwrap();
    assert_eq!(external.started(), 0);

    host.stop("done", 0).await;
    assert_eq!(external.stopped(), 0);
}

#[tokio::test]
async fn service_restarts_after_a_completed_cycle() {
    let instance = RecordingInstance::new(false);
    let host = host_with_instance(instance.clone());
    let module = TestModule::named("m");
    host.add_module(module.clone()).unwrap();

    host.start(false).await.unwrap();
    host.stop("first cycle", 0).await;
    assert_eq!(host.state(), ServiceState::Stopped);

    host.start(false).await.unwrap();
    assert_eq!(module.started(), 2);
    assert_eq!(host.state(), ServiceState::Running);

    host.stop("second cycle", 3).await;
    assert_eq!(module.stopped(), 2);
    assert_eq!(host.wait().await.exit_code, 3);
}

#[tokio::test]
async fn late_waiters_observe_a_resolved_signal() {
    let host = host_named("svc");
    host.add_module(TestModule::named("m")).unwrap();
    let signal = host.start(false).await.unwrap();

    host.stop("early", 0).await;

    // The signal handed out at start resolves for a waiter arriving after
    // shutdown already finished.
    let mut late = signal;
    let value = late.wait_for(Option::is_some).await.unwrap().clone();
    assert_eq!(value.unwrap().reason, "early");

    // So does the host-level wait.
    let exit = host.wait().await;
    assert_eq!(exit.reason, "early");
}

#[tokio::test]
async fn failing_on_init_aborts_before_any_module_starts() {
    struct RejectingInstance;
    impl ServiceInstance for RejectingInstance {
        fn on_init(&self, _host: &ServiceHost) -> anyhow::Result<()> {
            anyhow::bail!("missing configuration")
        }
    }

    let host = ServiceHost::new(
        CoreConfig {
            name: "svc".to_owned(),
            ..CoreConfig::default()
        },
        Arc::new(RejectingInstance),
    );
    let module = TestModule::named("m");
    host.add_module(module.clone()).unwrap();

    let err = host.start(false).await.unwrap_err();
    assert!(matches!(err, CoreError::Init(_)));
    assert_eq!(module.started(), 0);
    assert!(!host.is_running().await);
}
