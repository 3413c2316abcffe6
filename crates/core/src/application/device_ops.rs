// Device Operations - per-device use cases composed over the supervisor

use crate::application::retry::RetryPolicy;
use crate::application::toolchain::AdbToolchain;
use crate::error::{AppError, Result};
use crate::port::process_supervisor::{
    ExitEvent, InvocationOptions, LifecycleEvent, ProcessLease, ProcessSupervisor,
};
use crate::port::TimeProvider;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info, warn};

/// Default ceiling for one install invocation
pub const DEFAULT_INSTALL_TIMEOUT: Duration = Duration::from_secs(120);
/// Default ceiling for one pull attempt
pub const DEFAULT_PULL_TIMEOUT: Duration = Duration::from_secs(60);
/// Re-invocations of a failed pull before degrading to a boolean outcome
const PULL_RETRIES: u32 = 3;

/// Operations scoped to a single device serial. Each wraps one or more
/// supervisor invocations with operation-specific parsing and success
/// criteria; operations on distinct devices are independent and may run
/// concurrently.
pub struct DeviceOps {
    serial: String,
    toolchain: Arc<AdbToolchain>,
    supervisor: Arc<dyn ProcessSupervisor>,
    time_provider: Arc<dyn TimeProvider>,
}

impl DeviceOps {
    pub fn new(
        serial: impl Into<String>,
        toolchain: Arc<AdbToolchain>,
        supervisor: Arc<dyn ProcessSupervisor>,
        time_provider: Arc<dyn TimeProvider>,
    ) -> Self {
        Self {
            serial: serial.into(),
            toolchain,
            supervisor,
            time_provider,
        }
    }

    pub fn serial(&self) -> &str {
        &self.serial
    }

    /// True iff `package` appears as an exact `package:<name>` line in the
    /// package listing. Substring matches do not count.
    pub async fn is_app_installed(&self, package: &str) -> Result<bool> {
        let exit = self
            .supervisor
            .run(
                self.toolchain.list_packages(&self.serial, package),
                InvocationOptions::default(),
            )
            .await?;

        let needle = format!("package:{package}");
        Ok(exit
            .output
            .stdout()
            .lines()
            .any(|line| line.trim() == needle))
    }

    /// Install an APK with the default timeout. See [`Self::install_apk_with_timeout`].
    pub async fn install_apk(&self, apk: &Path) -> Result<()> {
        self.install_apk_with_timeout(apk, DEFAULT_INSTALL_TIMEOUT)
            .await
    }

    /// Install an APK. Success requires an explicit `Success` line in the
    /// install output; anything else is `AppError::InstallFailed`, which is
    /// fatal for the whole automation run by policy - the caller decides
    /// how to terminate.
    pub async fn install_apk_with_timeout(&self, apk: &Path, timeout: Duration) -> Result<()> {
        let started = self.time_provider.now_millis();
        let outcome = self
            .supervisor
            .run(
                self.toolchain.install(&self.serial, apk),
                InvocationOptions::default().with_timeout(timeout),
            )
            .await;
        let elapsed_ms = self.time_provider.now_millis() - started;

        match outcome {
            Ok(exit) if install_succeeded(&exit) => {
                info!(
                    serial = %self.serial,
                    apk = %apk.display(),
                    elapsed_ms = %elapsed_ms,
                    "APK installed"
                );
                Ok(())
            }
            Ok(exit) => {
                error!(
                    serial = %self.serial,
                    apk = %apk.display(),
                    elapsed_ms = %elapsed_ms,
                    exit_code = ?exit.exit_code,
                    "APK install rejected by device"
                );
                Err(AppError::InstallFailed {
                    device: self.serial.clone(),
                    reason: format!(
                        "no Success marker in install output (exit code {:?})",
                        exit.exit_code
                    ),
                })
            }
            Err(err) => {
                error!(
                    serial = %self.serial,
                    apk = %apk.display(),
                    elapsed_ms = %elapsed_ms,
                    error = %err,
                    "APK install failed"
                );
                Err(AppError::InstallFailed {
                    device: self.serial.clone(),
                    reason: err.to_string(),
                })
            }
        }
    }

    /// Pull a device directory to the host with the default per-attempt timeout.
    pub async fn pull_folder(&self, device_dir: &str, host_dir: &Path, log_errors: bool) -> bool {
        self.pull_folder_with_timeout(device_dir, host_dir, log_errors, DEFAULT_PULL_TIMEOUT)
            .await
    }

    /// Pull a device directory to the host. Never fails: any failure is
    /// retried up to `PULL_RETRIES` times, then reported as `false`.
    /// The failure is logged only when `log_errors` is set.
    pub async fn pull_folder_with_timeout(
        &self,
        device_dir: &str,
        host_dir: &Path,
        log_errors: bool,
        timeout: Duration,
    ) -> bool {
        let outcome = RetryPolicy::new(PULL_RETRIES)
            .run(|| self.pull_once(device_dir, host_dir, timeout), |_| true)
            .await;

        match outcome {
            Ok(()) => {
                info!(
                    serial = %self.serial,
                    device_dir = %device_dir,
                    host_dir = %host_dir.display(),
                    "Pulled device directory"
                );
                true
            }
            Err(err) => {
                if log_errors {
                    warn!(
                        serial = %self.serial,
                        device_dir = %device_dir,
                        host_dir = %host_dir.display(),
                        error = %err,
                        "Pull failed after retries"
                    );
                }
                false
            }
        }
    }

    async fn pull_once(&self, device_dir: &str, host_dir: &Path, timeout: Duration) -> Result<()> {
        let exit = self
            .supervisor
            .run(
                self.toolchain.pull(&self.serial, device_dir, host_dir),
                InvocationOptions::default().with_timeout(timeout),
            )
            .await?;

        if exit.success() {
            Ok(())
        } else {
            Err(AppError::CommandFailed {
                context: format!("pull {device_dir}"),
                exit_code: exit.exit_code,
            })
        }
    }

    /// Start streaming the device log into `file`, creating parent
    /// directories first. Returns the lease as soon as the process has
    /// started - the stream is expected to run until the lease is
    /// terminated or dropped, never to exit on its own.
    pub async fn redirect_logcat_to_file(&self, file: &Path) -> Result<Box<dyn ProcessLease>> {
        if let Some(parent) = file.parent() {
            if !parent.as_os_str().is_empty() {
                tokio::fs::create_dir_all(parent).await?;
            }
        }

        let mut lease = self
            .supervisor
            .spawn(
                self.toolchain.logcat(&self.serial),
                InvocationOptions::streaming().redirect_to(file),
            )
            .await?;

        if let Some(LifecycleEvent::Started { pid }) = lease.next_event().await? {
            info!(
                serial = %self.serial,
                pid = ?pid,
                file = %file.display(),
                "Logcat redirection started"
            );
        }
        Ok(lease)
    }
}

fn install_succeeded(exit: &ExitEvent) -> bool {
    exit.output
        .stdout()
        .lines()
        .any(|line| line.trim().eq_ignore_ascii_case("success"))
}
