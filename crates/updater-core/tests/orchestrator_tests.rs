//! ---
//! upd_section: "02-update-pipeline"
//! upd_subsection: "module"
//! upd_type: "source"
//! upd_scope: "code"
//! upd_description: "Version probing, download, install and restart of the target application."
//! upd_version: "v0.0.0-prealpha"
//! upd_owner: "tbd"
//! ---
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicI64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::sync::broadcast::error::TryRecvError;
use tokio::sync::broadcast::Receiver;
use tempfile::tempdir;
use updater_core::{
    CacheLock, CommandResult, CommandRunner, CycleOutcome, DownloadError, InstalledVersionProbe,
    OrchestratorParts, OrchestratorState, PackageCommands, PackageDownloader, StateChange,
    UpdateOrchestrator, UpdateTarget, VersionCode, VersionSource,
};
use updater_metrics::{new_registry, UpdaterMetrics};

const APP_ID: &str = "com.example.kiosk";
const ARTIFACT: &str = "/tmp/updater-test/kiosk.apk";

/// Fake device: package registry plus privileged shell.
struct Device {
    installed: AtomicI64,
    publishes: i64,
    install_exit: i32,
    force_stop_exit: i32,
    launch_exit: i32,
    calls: Mutex<Vec<(String, bool)>>,
    probe_delay: Duration,
    probes_active: AtomicUsize,
    probes_peak: AtomicUsize,
}

impl Device {
    fn new(installed: i64, publishes: i64, install_exit: i32) -> Self {
        Self {
            installed: AtomicI64::new(installed),
            publishes,
            install_exit,
            force_stop_exit: 0,
            launch_exit: 0,
            calls: Mutex::new(Vec::new()),
            probe_delay: Duration::ZERO,
            probes_active: AtomicUsize::new(0),
            probes_peak: AtomicUsize::new(0),
        }
    }

    fn calls(&self) -> Vec<(String, bool)> {
        self.calls.lock().clone()
    }
}

#[async_trait]
impl CommandRunner for Device {
    async fn run(&self, command: &str, elevated: bool) -> CommandResult {
        self.calls.lock().push((command.to_owned(), elevated));
        if command.starts_with("pm install") {
            if self.install_exit == 0 {
                self.installed.store(self.publishes, Ordering::SeqCst);
                return CommandResult::new(0, "Success\n", "");
            }
            return CommandResult::new(self.install_exit, "", "Failure [INSTALL_FAILED_INVALID_APK]\n");
        }
        if command.starts_with("am force-stop") {
            return CommandResult::new(self.force_stop_exit, "", "");
        }
        if command.starts_with("monkey") {
            return CommandResult::new(self.launch_exit, "", "** No activities found to run\n");
        }
        CommandResult::new(0, "", "")
    }
}

#[async_trait]
impl InstalledVersionProbe for Device {
    async fn installed_version(&self, application_id: &str) -> VersionCode {
        assert_eq!(application_id, APP_ID);
        let active = self.probes_active.fetch_add(1, Ordering::SeqCst) + 1;
        self.probes_peak.fetch_max(active, Ordering::SeqCst);
        if !self.probe_delay.is_zero() {
            tokio::time::sleep(self.probe_delay).await;
        }
        self.probes_active.fetch_sub(1, Ordering::SeqCst);
        VersionCode::new(self.installed.load(Ordering::SeqCst))
    }
}

struct Remote(VersionCode);

#[async_trait]
impl VersionSource for Remote {
    async fn latest_version(&self, _url: &str) -> VersionCode {
        self.0
    }
}

struct Fetcher {
    fail: bool,
    requests: Mutex<Vec<(String, PathBuf)>>,
}

#[async_trait]
impl PackageDownloader for Fetcher {
    async fn download(&self, url: &str, destination: &Path) -> Result<u64, DownloadError> {
        self.requests
            .lock()
            .push((url.to_owned(), destination.to_path_buf()));
        if self.fail {
            Err(DownloadError::Status(404))
        } else {
            Ok(4096)
        }
    }
}

struct Harness {
    orchestrator: UpdateOrchestrator,
    device: Arc<Device>,
    fetcher: Arc<Fetcher>,
}

fn target(artifact_path: PathBuf) -> UpdateTarget {
    UpdateTarget {
        application_id: APP_ID.into(),
        version_url: "http://updates.invalid/app-version-code".into(),
        package_url: "http://updates.invalid/app.apk".into(),
        artifact_path,
    }
}

fn harness_with(device: Device, remote: i64, fetch_fails: bool) -> Harness {
    harness_at(device, remote, fetch_fails, PathBuf::from(ARTIFACT))
}

fn harness_at(device: Device, remote: i64, fetch_fails: bool, artifact_path: PathBuf) -> Harness {
    let device = Arc::new(device);
    let fetcher = Arc::new(Fetcher {
        fail: fetch_fails,
        requests: Mutex::new(Vec::new()),
    });
    let parts = OrchestratorParts {
        runner: device.clone(),
        remote: Arc::new(Remote(VersionCode::new(remote))),
        inspector: device.clone(),
        fetcher: fetcher.clone(),
        commands: PackageCommands::default(),
    };
    Harness {
        orchestrator: UpdateOrchestrator::new(target(artifact_path), parts),
        device,
        fetcher,
    }
}

fn harness(installed: i64, remote: i64) -> Harness {
    harness_with(Device::new(installed, remote, 0), remote, false)
}

fn drain(events: &mut Receiver<StateChange>) -> Vec<(OrchestratorState, OrchestratorState)> {
    let mut seen = Vec::new();
    loop {
        match events.try_recv() {
            Ok(change) => seen.push((change.from, change.to)),
            Err(TryRecvError::Empty) | Err(TryRecvError::Closed) => break,
            Err(TryRecvError::Lagged(_)) => continue,
        }
    }
    seen
}

#[tokio::test]
async fn equal_versions_do_nothing() {
    let h = harness(7, 7);
    let report = h.orchestrator.run_cycle().await;
    assert_eq!(report.outcome, CycleOutcome::UpToDate);
    assert_eq!(report.installed, VersionCode::new(7));
    assert_eq!(report.remote, VersionCode::new(7));
    assert!(h.device.calls().is_empty());
    assert!(h.fetcher.requests.lock().is_empty());
    assert_eq!(h.orchestrator.state(), OrchestratorState::Idle);
}

#[tokio::test]
async fn newer_install_is_never_downgraded() {
    let h = harness(9, 7);
    let report = h.orchestrator.run_cycle().await;
    assert_eq!(report.outcome, CycleOutcome::UpToDate);
    assert!(h.device.calls().is_empty());
    assert!(h.fetcher.requests.lock().is_empty());
}

#[tokio::test]
async fn unknown_remote_skips_cycle() {
    for installed in [5, -1] {
        let h = harness_with(Device::new(installed, 7, 0), -1, false);
        let report = h.orchestrator.run_cycle().await;
        assert_eq!(report.outcome, CycleOutcome::RemoteUnavailable);
        assert_eq!(report.remote, VersionCode::UNKNOWN);
        assert!(h.device.calls().is_empty());
        assert!(h.fetcher.requests.lock().is_empty());
        assert_eq!(h.orchestrator.state(), OrchestratorState::Idle);
    }
}

#[tokio::test]
async fn stale_install_runs_full_pipeline() {
    let h = harness(5, 7);
    let report = h.orchestrator.run_cycle().await;
    assert_eq!(
        report.outcome,
        CycleOutcome::Updated {
            from: VersionCode::new(5),
            to: VersionCode::new(7),
            relaunched: true,
        }
    );

    let requests = h.fetcher.requests.lock().clone();
    assert_eq!(
        requests,
        vec![(
            "http://updates.invalid/app.apk".to_owned(),
            PathBuf::from(ARTIFACT)
        )]
    );

    let calls = h.device.calls();
    assert_eq!(calls.len(), 3, "install, force-stop, launch: {calls:?}");
    assert!(calls.iter().all(|(_, elevated)| *elevated));
    assert_eq!(calls[0].0, format!("pm install -r {ARTIFACT}"));
    assert!(calls[1].0.starts_with("am force-stop"));
    assert!(calls[1].0.contains(APP_ID));
    assert!(calls[2].0.starts_with("monkey"));
    assert!(calls[2].0.contains(APP_ID));
    assert_eq!(h.orchestrator.state(), OrchestratorState::Idle);
}

#[tokio::test]
async fn missing_application_is_installed_fresh() {
    let h = harness(-1, 7);
    let report = h.orchestrator.run_cycle().await;
    assert_eq!(report.installed, VersionCode::UNKNOWN);
    assert!(matches!(report.outcome, CycleOutcome::Updated { .. }));
    assert_eq!(h.device.calls().len(), 3);
}

#[tokio::test]
async fn download_failure_skips_install() {
    let h = harness_with(Device::new(5, 7, 0), 7, true);
    let mut events = h.orchestrator.subscribe();
    let report = h.orchestrator.run_cycle().await;
    match &report.outcome {
        CycleOutcome::DownloadFailed { reason } => assert!(reason.contains("404"), "{reason}"),
        other => panic!("unexpected outcome {other:?}"),
    }
    assert!(h.device.calls().is_empty());
    assert_eq!(
        drain(&mut events),
        vec![
            (OrchestratorState::Idle, OrchestratorState::Checking),
            (OrchestratorState::Checking, OrchestratorState::Downloading),
            (OrchestratorState::Downloading, OrchestratorState::Failed),
            (OrchestratorState::Failed, OrchestratorState::Idle),
        ]
    );
}

#[tokio::test]
async fn failed_install_skips_restart() {
    let h = harness_with(Device::new(5, 7, 1), 7, false);
    let report = h.orchestrator.run_cycle().await;
    assert_eq!(report.outcome, CycleOutcome::InstallFailed { exit_code: 1 });
    let calls = h.device.calls();
    assert_eq!(calls.len(), 1);
    assert!(calls[0].0.starts_with("pm install"));
    assert_eq!(h.orchestrator.state(), OrchestratorState::Idle);
}

#[tokio::test]
async fn failed_force_stop_still_relaunches() {
    let mut device = Device::new(5, 7, 0);
    device.force_stop_exit = 255;
    let h = harness_with(device, 7, false);
    let mut events = h.orchestrator.subscribe();

    let report = h.orchestrator.run_cycle().await;
    assert_eq!(
        report.outcome,
        CycleOutcome::Updated {
            from: VersionCode::new(5),
            to: VersionCode::new(7),
            relaunched: true,
        }
    );
    let calls = h.device.calls();
    assert_eq!(calls.len(), 3);
    assert!(calls[2].0.starts_with("monkey"));
    assert_eq!(
        drain(&mut events).last(),
        Some(&(OrchestratorState::Restarting, OrchestratorState::Idle))
    );
    assert_eq!(h.orchestrator.state(), OrchestratorState::Idle);
}

#[tokio::test]
async fn failed_relaunch_still_counts_as_updated() {
    let mut device = Device::new(5, 7, 0);
    device.launch_exit = 252;
    let h = harness_with(device, 7, false);
    let mut events = h.orchestrator.subscribe();

    let report = h.orchestrator.run_cycle().await;
    assert_eq!(
        report.outcome,
        CycleOutcome::Updated {
            from: VersionCode::new(5),
            to: VersionCode::new(7),
            relaunched: false,
        }
    );
    assert!(!report.outcome.is_failure());
    let transitions = drain(&mut events);
    assert!(!transitions
        .iter()
        .any(|(_, to)| *to == OrchestratorState::Failed));
    assert_eq!(
        transitions.last(),
        Some(&(OrchestratorState::Restarting, OrchestratorState::Idle))
    );
    assert_eq!(h.orchestrator.state(), OrchestratorState::Idle);
}

#[tokio::test]
async fn successful_update_is_idempotent() {
    let h = harness(5, 7);
    let first = h.orchestrator.run_cycle().await;
    assert!(matches!(first.outcome, CycleOutcome::Updated { .. }));

    let second = h.orchestrator.run_cycle().await;
    assert_eq!(second.outcome, CycleOutcome::UpToDate);
    assert_eq!(second.installed, VersionCode::new(7));
    assert_eq!(h.device.calls().len(), 3);
    assert_eq!(h.fetcher.requests.lock().len(), 1);
}

#[tokio::test]
async fn update_publishes_every_transition() {
    let h = harness(5, 7);
    let mut events = h.orchestrator.subscribe();
    h.orchestrator.run_cycle().await;
    assert_eq!(
        drain(&mut events),
        vec![
            (OrchestratorState::Idle, OrchestratorState::Checking),
            (OrchestratorState::Checking, OrchestratorState::Downloading),
            (OrchestratorState::Downloading, OrchestratorState::Installing),
            (OrchestratorState::Installing, OrchestratorState::Restarting),
            (OrchestratorState::Restarting, OrchestratorState::Idle),
        ]
    );
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn concurrent_cycles_are_serialized() {
    let mut device = Device::new(7, 7, 0);
    device.probe_delay = Duration::from_millis(50);
    let h = harness_with(device, 7, false);
    let orchestrator = Arc::new(h.orchestrator);

    let first = tokio::spawn({
        let orchestrator = orchestrator.clone();
        async move { orchestrator.run_cycle().await }
    });
    let second = tokio::spawn({
        let orchestrator = orchestrator.clone();
        async move { orchestrator.run_cycle().await }
    });
    let (first, second) = (first.await.unwrap(), second.await.unwrap());

    assert_eq!(first.outcome, CycleOutcome::UpToDate);
    assert_eq!(second.outcome, CycleOutcome::UpToDate);
    assert_eq!(h.device.probes_peak.load(Ordering::SeqCst), 1);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn cycle_waits_for_cache_lock_held_by_another_updater() {
    let dir = tempdir().unwrap();
    let artifact = dir.path().join("cache").join("kiosk.apk");
    let held = CacheLock::acquire(&artifact).await.unwrap();
    assert_eq!(held.path(), dir.path().join("cache").join(".lock"));

    let h = harness_at(Device::new(5, 7, 0), 7, false, artifact.clone());
    let orchestrator = Arc::new(h.orchestrator);
    let mut events = orchestrator.subscribe();
    let cycle = tokio::spawn({
        let orchestrator = orchestrator.clone();
        async move { orchestrator.run_cycle().await }
    });

    tokio::time::sleep(Duration::from_millis(300)).await;
    assert!(!cycle.is_finished());
    assert!(drain(&mut events).is_empty());
    assert!(h.fetcher.requests.lock().is_empty());
    assert!(h.device.calls().is_empty());

    drop(held);
    let report = tokio::time::timeout(Duration::from_secs(5), cycle)
        .await
        .expect("cycle resumes once the lock is released")
        .unwrap();
    assert!(matches!(report.outcome, CycleOutcome::Updated { .. }), "{:?}", report.outcome);
    assert_eq!(h.fetcher.requests.lock()[0].1, artifact);
}

#[tokio::test]
async fn cycle_outcomes_are_exported_as_metrics() {
    let registry = new_registry();
    let metrics = UpdaterMetrics::new(registry.clone()).unwrap();
    let h = harness(5, 7);
    let orchestrator = h.orchestrator.with_metrics(metrics);
    orchestrator.run_cycle().await;

    let families = registry.gather();
    let cycles = families
        .iter()
        .find(|family| family.get_name() == "updater_cycles_total")
        .expect("cycle counter registered");
    let updated = cycles
        .get_metric()
        .iter()
        .find(|metric| {
            metric
                .get_label()
                .iter()
                .any(|label| label.get_name() == "outcome" && label.get_value() == "updated")
        })
        .expect("updated outcome recorded");
    assert_eq!(updated.get_counter().get_value(), 1.0);

    let bytes = families
        .iter()
        .find(|family| family.get_name() == "updater_download_bytes_total")
        .expect("download counter registered");
    assert_eq!(bytes.get_metric()[0].get_counter().get_value(), 4096.0);
}
