//! End-to-end device flows against a scripted fake adb
//!
//! Each test writes its own fake tool into a temp dir, so the flows run
//! through the real supervisor and the real parsing without a device.

#![cfg(unix)]

use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use droidci_core::application::{AdbToolchain, DeviceOps, DeviceRegistry};
use droidci_core::port::time_provider::SystemTimeProvider;
use droidci_core::port::{ProcessSupervisor, TimeProvider};
use droidci_core::AppError;
use droidci_infra_process::{process_exists, TokioProcessSupervisor};

struct Harness {
    dir: PathBuf,
    toolchain: Arc<AdbToolchain>,
    supervisor: Arc<dyn ProcessSupervisor>,
    time_provider: Arc<dyn TimeProvider>,
}

impl Harness {
    /// Write `body` as the fake adb under a fresh per-test temp dir
    fn new(test: &str, body: &str) -> Self {
        let dir = std::env::temp_dir().join(format!("droidci-it-{}-{test}", std::process::id()));
        std::fs::remove_dir_all(&dir).ok();
        std::fs::create_dir_all(&dir).unwrap();

        let adb = dir.join("adb");
        std::fs::write(&adb, format!("#!/bin/sh\n{body}\n")).unwrap();
        let mut perms = std::fs::metadata(&adb).unwrap().permissions();
        perms.set_mode(0o755);
        std::fs::set_permissions(&adb, perms).unwrap();

        Self {
            dir,
            toolchain: Arc::new(AdbToolchain::new(adb)),
            supervisor: Arc::new(TokioProcessSupervisor::new(Arc::new(SystemTimeProvider))),
            time_provider: Arc::new(SystemTimeProvider),
        }
    }

    fn registry(&self) -> DeviceRegistry {
        DeviceRegistry::new(self.toolchain.clone(), self.supervisor.clone())
    }

    fn ops(&self, serial: &str) -> DeviceOps {
        DeviceOps::new(
            serial,
            self.toolchain.clone(),
            self.supervisor.clone(),
            self.time_provider.clone(),
        )
    }

    fn path(&self, name: &str) -> PathBuf {
        self.dir.join(name)
    }
}

impl Drop for Harness {
    fn drop(&mut self) {
        std::fs::remove_dir_all(&self.dir).ok();
    }
}

#[tokio::test]
async fn discovery_parses_and_enriches_real_invocations() {
    let harness = Harness::new(
        "discovery",
        r#"
if [ "$1" = "devices" ]; then
    printf 'List of devices attached\nemulator-5554\tdevice\nHT1234\toffline\n'
    exit 0
fi
if [ "$1" = "-s" ] && [ "$3" = "shell" ] && [ "$4" = "getprop" ]; then
    if [ "$2" = "emulator-5554" ]; then
        printf 'sdk_gphone64_x86_64\n'
    else
        printf 'undefined\n'
    fi
    exit 0
fi
exit 64
"#,
    );

    let mut devices = harness.registry().discover().await.unwrap();
    devices.sort_by(|a, b| a.id.cmp(&b.id));

    assert_eq!(devices.len(), 2);
    assert_eq!(devices[0].id, "HT1234");
    assert!(!devices[0].online);
    assert_eq!(devices[0].model, "", "undefined sentinel maps to empty");
    assert_eq!(devices[1].id, "emulator-5554");
    assert!(devices[1].online);
    assert_eq!(devices[1].model, "sdk_gphone64_x86_64");
}

#[tokio::test]
async fn installed_is_matched_against_exact_lines() {
    let harness = Harness::new(
        "installed",
        r#"printf 'package:com.example.app\npackage:com.example.app.tests\n'"#,
    );
    let ops = harness.ops("emulator-5554");

    assert!(ops.is_app_installed("com.example.app").await.unwrap());
    assert!(!ops.is_app_installed("com.example.ap").await.unwrap());
}

#[tokio::test]
async fn install_succeeds_on_the_success_marker() {
    let harness = Harness::new(
        "install-ok",
        r#"printf 'Performing Streamed Install\nSuccess\n'"#,
    );

    harness
        .ops("emulator-5554")
        .install_apk(Path::new("/tmp/app.apk"))
        .await
        .unwrap();
}

#[tokio::test]
async fn install_rejection_is_a_fatal_error() {
    let harness = Harness::new(
        "install-fail",
        r#"printf 'Failure [INSTALL_FAILED_INVALID_APK]\n'; exit 1"#,
    );

    let err = harness
        .ops("emulator-5554")
        .install_apk(Path::new("/tmp/app.apk"))
        .await
        .unwrap_err();

    assert!(matches!(err, AppError::InstallFailed { .. }));
    assert!(err.is_fatal());
}

#[tokio::test]
async fn failing_pull_retries_three_times_then_reports_false() {
    let harness = Harness::new("pull", "");
    let counter = harness.path("attempts");
    // Each invocation appends a line, then fails
    let body = format!(
        r#"echo attempt >> "{}"
printf 'adb: error: remote object does not exist\n' >&2
exit 1"#,
        counter.display()
    );
    std::fs::write(
        harness.toolchain.adb_path(),
        format!("#!/bin/sh\n{body}\n"),
    )
    .unwrap();

    let pulled = harness
        .ops("emulator-5554")
        .pull_folder("/sdcard/logs", &harness.path("out"), true)
        .await;

    assert!(!pulled);
    let attempts = std::fs::read_to_string(&counter).unwrap();
    assert_eq!(attempts.lines().count(), 4, "1 attempt + 3 retries");
}

#[tokio::test]
async fn logcat_streams_into_the_file_until_the_lease_drops() {
    let harness = Harness::new(
        "logcat",
        r#"
if [ "$3" = "logcat" ]; then
    while true; do echo "08-07 12:00:00.000 I/droidci: tick"; sleep 0.05; done
fi
"#,
    );
    let file = harness.path("logs/logcat.txt");

    let lease = harness
        .ops("emulator-5554")
        .redirect_logcat_to_file(&file)
        .await
        .unwrap();
    let pid = lease.pid().expect("logcat child has a pid");

    tokio::time::sleep(Duration::from_millis(400)).await;
    assert!(lease.is_alive(), "stream is expected to run indefinitely");
    let contents = std::fs::read_to_string(&file).unwrap();
    assert!(contents.contains("droidci: tick"));

    drop(lease);

    for _ in 0..100 {
        if !process_exists(pid) {
            return;
        }
        tokio::time::sleep(Duration::from_millis(50)).await;
    }
    panic!("logcat subprocess leaked after the lease was dropped");
}
