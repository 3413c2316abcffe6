// Tokio-backed process supervisor
// Spawns external commands and observes their lifecycle; owns termination

use async_trait::async_trait;
use std::path::PathBuf;
use std::process::Stdio;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::AsyncReadExt;
use tokio::process::{Child, ChildStderr, ChildStdout, Command};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use droidci_core::port::process_supervisor::{
    ExitEvent, InvocationOptions, InvocationSpec, LifecycleEvent, ProcessLease, ProcessOutput,
    ProcessSupervisor, SupervisorError,
};
use droidci_core::port::TimeProvider;

/// Bounded wait for a voluntary exit after SIGTERM before escalating
const GRACEFUL_EXIT_TIMEOUT: Duration = Duration::from_secs(5);

/// Signal-0 probe of the OS process table
#[cfg(unix)]
pub fn process_exists(pid: u32) -> bool {
    use nix::sys::signal::kill;
    use nix::unistd::Pid;

    // None sends no signal, only checks existence
    kill(Pid::from_raw(pid as i32), None).is_ok()
}

/// Process supervisor spawning real OS processes via tokio
pub struct TokioProcessSupervisor {
    time_provider: Arc<dyn TimeProvider>,
}

impl TokioProcessSupervisor {
    pub fn new(time_provider: Arc<dyn TimeProvider>) -> Self {
        Self { time_provider }
    }
}

#[async_trait]
impl ProcessSupervisor for TokioProcessSupervisor {
    async fn spawn(
        &self,
        spec: InvocationSpec,
        options: InvocationOptions,
    ) -> Result<Box<dyn ProcessLease>, SupervisorError> {
        let mut command = Command::new(&spec.program);
        command
            .args(&spec.args)
            .stdin(Stdio::null())
            .kill_on_drop(true);

        match &options.redirect_stdout {
            Some(path) => {
                let file = std::fs::File::create(path)
                    .map_err(|e| SupervisorError::Io(format!("{}: {e}", path.display())))?;
                command.stdout(Stdio::from(file)).stderr(Stdio::null());
            }
            None => {
                command.stdout(Stdio::piped()).stderr(Stdio::piped());
            }
        }

        let mut child = command
            .spawn()
            .map_err(|e| SupervisorError::SpawnFailed(format!("{}: {e}", spec.program.display())))?;

        let pid = child.id();
        info!(
            program = %spec.program.display(),
            args = ?spec.args,
            pid = ?pid,
            "Subprocess started"
        );

        let capture = match &options.redirect_stdout {
            Some(path) => OutputCapture::Redirected(path.clone()),
            None => {
                let stdout = child.stdout.take();
                let stderr = child.stderr.take();
                if options.unbuffered {
                    // Eager drain from launch: a child that outlives the
                    // caller's interest can never stall on a full pipe.
                    OutputCapture::Streaming {
                        stdout: spawn_drain(stdout),
                        stderr: spawn_drain(stderr),
                    }
                } else {
                    OutputCapture::Buffered { stdout, stderr }
                }
            }
        };

        Ok(Box::new(TokioProcessLease {
            child,
            pid,
            started_at_ms: self.time_provider.now_millis(),
            deadline: options.timeout.map(|t| tokio::time::Instant::now() + t),
            timeout: options.timeout,
            capture: Some(capture),
            started_seen: false,
            exited: false,
            time_provider: Arc::clone(&self.time_provider),
        }))
    }
}

enum OutputCapture {
    Redirected(PathBuf),
    Buffered {
        stdout: Option<ChildStdout>,
        stderr: Option<ChildStderr>,
    },
    Streaming {
        stdout: JoinHandle<Vec<u8>>,
        stderr: JoinHandle<Vec<u8>>,
    },
}

fn spawn_drain<R>(reader: Option<R>) -> JoinHandle<Vec<u8>>
where
    R: tokio::io::AsyncRead + Unpin + Send + 'static,
{
    tokio::spawn(async move {
        let mut buf = Vec::new();
        if let Some(mut reader) = reader {
            let mut chunk = [0u8; 8192];
            loop {
                match reader.read(&mut chunk).await {
                    Ok(0) | Err(_) => break,
                    Ok(n) => buf.extend_from_slice(&chunk[..n]),
                }
            }
        }
        buf
    })
}

fn lossy(bytes: Vec<u8>) -> String {
    String::from_utf8_lossy(&bytes).into_owned()
}

/// Scoped handle to one spawned child. Dropping it kills the process;
/// `terminate` releases it gracefully.
struct TokioProcessLease {
    child: Child,
    pid: Option<u32>,
    started_at_ms: i64,
    deadline: Option<tokio::time::Instant>,
    timeout: Option<Duration>,
    capture: Option<OutputCapture>,
    started_seen: bool,
    exited: bool,
    time_provider: Arc<dyn TimeProvider>,
}

impl TokioProcessLease {
    async fn wait_child(&mut self) -> Result<std::process::ExitStatus, SupervisorError> {
        match self.deadline {
            Some(deadline) => {
                match tokio::time::timeout_at(deadline, self.child.wait()).await {
                    Ok(Ok(status)) => Ok(status),
                    Ok(Err(e)) => Err(SupervisorError::Io(e.to_string())),
                    Err(_) => {
                        warn!(pid = ?self.pid, "Timeout elapsed, killing subprocess");
                        let _ = self.child.kill().await;
                        self.exited = true;
                        Err(SupervisorError::Timeout(
                            self.timeout.map(|t| t.as_millis() as u64).unwrap_or_default(),
                        ))
                    }
                }
            }
            None => self
                .child
                .wait()
                .await
                .map_err(|e| SupervisorError::Io(e.to_string())),
        }
    }

    async fn wait_for_exit(&mut self) -> Result<ExitEvent, SupervisorError> {
        let capture = self
            .capture
            .take()
            .ok_or_else(|| SupervisorError::Io("output already consumed".to_string()))?;

        let (status, output) = match capture {
            OutputCapture::Redirected(path) => {
                let status = self.wait_child().await?;
                (status, ProcessOutput::Redirected(path))
            }
            OutputCapture::Streaming { stdout, stderr } => {
                let status = self.wait_child().await?;
                let out = stdout.await.unwrap_or_default();
                let err = stderr.await.unwrap_or_default();
                (
                    status,
                    ProcessOutput::Captured {
                        stdout: lossy(out),
                        stderr: lossy(err),
                    },
                )
            }
            OutputCapture::Buffered { stdout, stderr } => {
                // Drain concurrently with the wait; collecting only after
                // exit can deadlock once the pipe buffer fills.
                let drain_out = spawn_drain(stdout);
                let drain_err = spawn_drain(stderr);
                let status = self.wait_child().await?;
                let out = drain_out.await.unwrap_or_default();
                let err = drain_err.await.unwrap_or_default();
                (
                    status,
                    ProcessOutput::Captured {
                        stdout: lossy(out),
                        stderr: lossy(err),
                    },
                )
            }
        };

        let duration_ms = self.time_provider.now_millis() - self.started_at_ms;
        info!(
            pid = ?self.pid,
            exit_code = ?status.code(),
            duration_ms = %duration_ms,
            "Subprocess exited"
        );

        Ok(ExitEvent {
            exit_code: status.code(),
            output,
            duration_ms,
        })
    }
}

#[async_trait]
impl ProcessLease for TokioProcessLease {
    fn pid(&self) -> Option<u32> {
        self.pid
    }

    async fn next_event(&mut self) -> Result<Option<LifecycleEvent>, SupervisorError> {
        if !self.started_seen {
            self.started_seen = true;
            return Ok(Some(LifecycleEvent::Started { pid: self.pid }));
        }
        if self.exited {
            return Ok(None);
        }
        let exit = self.wait_for_exit().await?;
        self.exited = true;
        Ok(Some(LifecycleEvent::Exited(exit)))
    }

    async fn terminate(&mut self) -> Result<(), SupervisorError> {
        if self.exited || self.child.try_wait().ok().flatten().is_some() {
            self.exited = true;
            return Ok(());
        }

        #[cfg(unix)]
        {
            if let Some(pid) = self.pid {
                use nix::sys::signal::{kill, Signal};
                use nix::unistd::Pid;

                debug!(pid = %pid, "Sending SIGTERM for graceful shutdown");
                if kill(Pid::from_raw(pid as i32), Signal::SIGTERM).is_ok() {
                    if let Ok(Ok(_)) =
                        tokio::time::timeout(GRACEFUL_EXIT_TIMEOUT, self.child.wait()).await
                    {
                        debug!(pid = %pid, "Process exited after SIGTERM");
                        self.exited = true;
                        return Ok(());
                    }
                    warn!(pid = %pid, "Process did not exit after SIGTERM, sending SIGKILL");
                }
            }
        }

        self.child
            .kill()
            .await
            .map_err(|e| SupervisorError::Killed(e.to_string()))?;
        self.exited = true;
        Ok(())
    }

    fn is_alive(&self) -> bool {
        if self.exited {
            return false;
        }
        #[cfg(unix)]
        {
            self.pid.map(process_exists).unwrap_or(false)
        }
        #[cfg(not(unix))]
        {
            true
        }
    }
}

impl Drop for TokioProcessLease {
    fn drop(&mut self) {
        // A lease must never leak its subprocess: kill synchronously here,
        // with kill_on_drop on the Child backstopping the reap.
        if !self.exited {
            let _ = self.child.start_kill();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use droidci_core::port::time_provider::SystemTimeProvider;

    fn supervisor() -> TokioProcessSupervisor {
        TokioProcessSupervisor::new(Arc::new(SystemTimeProvider))
    }

    fn spec(program: &str, args: &[&str]) -> InvocationSpec {
        InvocationSpec::new(program, args.iter().map(|s| s.to_string()).collect())
    }

    #[tokio::test]
    async fn captures_stdout_of_a_finished_process() {
        let exit = supervisor()
            .run(spec("echo", &["hello"]), InvocationOptions::default())
            .await
            .unwrap();

        assert_eq!(exit.exit_code, Some(0));
        assert!(exit.output.stdout().contains("hello"));
        assert!(exit.duration_ms >= 0);
    }

    #[tokio::test]
    async fn unbuffered_capture_collects_streamed_output() {
        let exit = supervisor()
            .run(
                spec("sh", &["-c", "echo one; sleep 0.1; echo two"]),
                InvocationOptions::streaming(),
            )
            .await
            .unwrap();

        assert!(exit.output.stdout().contains("one"));
        assert!(exit.output.stdout().contains("two"));
    }

    #[tokio::test]
    async fn abnormal_exit_is_an_event_not_an_error() {
        let exit = supervisor()
            .run(spec("sh", &["-c", "exit 3"]), InvocationOptions::default())
            .await
            .unwrap();

        assert_eq!(exit.exit_code, Some(3));
        assert!(!exit.success());
    }

    #[tokio::test]
    async fn missing_binary_fails_the_spawn() {
        let err = supervisor()
            .run(
                spec("/nonexistent/droidci-no-such-binary", &[]),
                InvocationOptions::default(),
            )
            .await
            .unwrap_err();

        assert!(matches!(err, SupervisorError::SpawnFailed(_)));
    }

    #[tokio::test]
    async fn timeout_kills_the_child_and_fails_the_wait() {
        let started = std::time::Instant::now();
        let err = supervisor()
            .run(
                spec("sleep", &["10"]),
                InvocationOptions::default().with_timeout(Duration::from_millis(200)),
            )
            .await
            .unwrap_err();

        assert!(matches!(err, SupervisorError::Timeout(200)));
        assert!(started.elapsed() < Duration::from_secs(5));
    }

    #[tokio::test]
    async fn started_strictly_precedes_exited() {
        let mut lease = supervisor()
            .spawn(spec("echo", &["ordered"]), InvocationOptions::default())
            .await
            .unwrap();

        let first = lease.next_event().await.unwrap();
        assert!(matches!(first, Some(LifecycleEvent::Started { .. })));

        let second = lease.next_event().await.unwrap();
        assert!(matches!(second, Some(LifecycleEvent::Exited(_))));

        let third = lease.next_event().await.unwrap();
        assert!(third.is_none(), "lifecycle completes after the exit");
    }
}
