// Process Supervisor Port
// Abstraction for spawning external commands and observing their lifecycle

use async_trait::async_trait;
use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

/// Argument vector for one external tool invocation
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InvocationSpec {
    pub program: PathBuf,
    pub args: Vec<String>,
}

impl InvocationSpec {
    pub fn new(program: impl Into<PathBuf>, args: Vec<String>) -> Self {
        Self {
            program: program.into(),
            args,
        }
    }
}

/// Per-invocation configuration
#[derive(Debug, Clone, Default)]
pub struct InvocationOptions {
    /// Drain stdout eagerly from the moment of launch instead of collecting
    /// at exit, so a long-running child can never stall on a full pipe.
    pub unbuffered: bool,
    /// Kill the child and fail the wait once this elapses, measured from launch
    pub timeout: Option<Duration>,
    /// Write stdout to this file instead of capturing it in memory
    pub redirect_stdout: Option<PathBuf>,
}

impl InvocationOptions {
    /// Options for streaming invocations: eager drain, no timeout
    pub fn streaming() -> Self {
        Self {
            unbuffered: true,
            ..Self::default()
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    pub fn redirect_to(mut self, path: impl Into<PathBuf>) -> Self {
        self.redirect_stdout = Some(path.into());
        self
    }
}

/// Where the child's standard output ended up
#[derive(Debug, Clone)]
pub enum ProcessOutput {
    Captured { stdout: String, stderr: String },
    Redirected(PathBuf),
}

impl ProcessOutput {
    /// Captured stdout; empty for redirected invocations
    pub fn stdout(&self) -> &str {
        match self {
            ProcessOutput::Captured { stdout, .. } => stdout,
            ProcessOutput::Redirected(_) => "",
        }
    }
}

/// Terminal lifecycle notification of one invocation
#[derive(Debug, Clone)]
pub struct ExitEvent {
    pub exit_code: Option<i32>,
    pub output: ProcessOutput,
    pub duration_ms: i64,
}

impl ExitEvent {
    pub fn success(&self) -> bool {
        self.exit_code == Some(0)
    }
}

/// Lifecycle of a supervised invocation. Exactly one `Started` is observed
/// per launch, then exactly one `Exited` on termination - or neither, if
/// the lease is dropped first.
#[derive(Debug, Clone)]
pub enum LifecycleEvent {
    Started { pid: Option<u32> },
    Exited(ExitEvent),
}

/// Supervisor failures. An abnormal exit code is NOT an error - it is
/// reported through `ExitEvent::exit_code`. Only launch failures, timeouts,
/// and I/O problems fail the lifecycle.
#[derive(Error, Debug, Clone)]
pub enum SupervisorError {
    #[error("Spawn failed: {0}")]
    SpawnFailed(String),

    #[error("Process timeout after {0}ms")]
    Timeout(u64),

    #[error("Process killed: {0}")]
    Killed(String),

    #[error("IO error: {0}")]
    Io(String),
}

/// Scoped handle to a running invocation.
///
/// The lease owns the OS process: dropping it kills the child, so no exit
/// path - cancellation, timeout, error - can leak a subprocess.
/// `terminate` is the graceful explicit release.
#[async_trait]
pub trait ProcessLease: Send {
    /// OS pid, when the platform exposes one
    fn pid(&self) -> Option<u32>;

    /// Next lifecycle notification: `Started` once, then `Exited` once,
    /// then `None` when the lifecycle has completed.
    async fn next_event(&mut self) -> Result<Option<LifecycleEvent>, SupervisorError>;

    /// Graceful release: ask the child to stop, then force-kill it
    async fn terminate(&mut self) -> Result<(), SupervisorError>;

    /// Whether the child is still in the OS process table
    fn is_alive(&self) -> bool;
}

/// Process Supervisor trait
///
/// Implementations:
/// - TokioProcessSupervisor: spawns real OS processes (infra-process)
/// - MockProcessSupervisor: scripted outcomes for tests (below)
#[async_trait]
pub trait ProcessSupervisor: Send + Sync {
    /// Launch `spec` and return the lease observing it. Nothing is spawned
    /// until this is awaited.
    ///
    /// # Errors
    /// - SupervisorError::SpawnFailed if the binary is missing or not executable
    async fn spawn(
        &self,
        spec: InvocationSpec,
        options: InvocationOptions,
    ) -> Result<Box<dyn ProcessLease>, SupervisorError>;

    /// Launch, consume lifecycle events, and return the exit.
    ///
    /// # Errors
    /// - SupervisorError::Timeout if the invocation outlives its timeout
    /// - SupervisorError::Io on wait or capture failures
    async fn run(
        &self,
        spec: InvocationSpec,
        options: InvocationOptions,
    ) -> Result<ExitEvent, SupervisorError> {
        let mut lease = self.spawn(spec, options).await?;
        loop {
            match lease.next_event().await? {
                Some(LifecycleEvent::Exited(exit)) => return Ok(exit),
                Some(LifecycleEvent::Started { .. }) => continue,
                None => {
                    return Err(SupervisorError::Io(
                        "lifecycle completed without an exit event".to_string(),
                    ))
                }
            }
        }
    }
}

// ============================================================================
// Mock Implementations for Testing
// ============================================================================

pub mod mocks {
    use super::*;
    use std::collections::VecDeque;
    use std::sync::Mutex;

    /// Scripted outcome for one spawn
    #[derive(Debug, Clone)]
    pub enum MockOutcome {
        /// Start, then exit with this code and canned stdout
        Exit { code: i32, stdout: String },
        /// Fail the spawn itself
        SpawnFailure(String),
        /// Start, then fail the exit wait with a timeout
        Timeout(u64),
    }

    impl MockOutcome {
        pub fn exit_ok(stdout: impl Into<String>) -> Self {
            MockOutcome::Exit {
                code: 0,
                stdout: stdout.into(),
            }
        }
    }

    /// Mock supervisor replaying scripted outcomes in spawn order and
    /// recording every invocation it receives.
    pub struct MockProcessSupervisor {
        script: Mutex<VecDeque<MockOutcome>>,
        fallback: MockOutcome,
        recorded: Mutex<Vec<(InvocationSpec, InvocationOptions)>>,
    }

    impl MockProcessSupervisor {
        /// Every spawn resolves to `fallback` unless a scripted outcome is queued
        pub fn new(fallback: MockOutcome) -> Self {
            Self {
                script: Mutex::new(VecDeque::new()),
                fallback,
                recorded: Mutex::new(Vec::new()),
            }
        }

        pub fn always_exit(code: i32, stdout: impl Into<String>) -> Self {
            Self::new(MockOutcome::Exit {
                code,
                stdout: stdout.into(),
            })
        }

        /// Queue an outcome consumed by the next spawn
        pub fn push(self, outcome: MockOutcome) -> Self {
            self.script.lock().unwrap().push_back(outcome);
            self
        }

        pub fn invocation_count(&self) -> usize {
            self.recorded.lock().unwrap().len()
        }

        pub fn recorded(&self) -> Vec<(InvocationSpec, InvocationOptions)> {
            self.recorded.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl ProcessSupervisor for MockProcessSupervisor {
        async fn spawn(
            &self,
            spec: InvocationSpec,
            options: InvocationOptions,
        ) -> Result<Box<dyn ProcessLease>, SupervisorError> {
            self.recorded
                .lock()
                .unwrap()
                .push((spec, options.clone()));

            let outcome = self
                .script
                .lock()
                .unwrap()
                .pop_front()
                .unwrap_or_else(|| self.fallback.clone());

            if let MockOutcome::SpawnFailure(reason) = &outcome {
                return Err(SupervisorError::SpawnFailed(reason.clone()));
            }

            Ok(Box::new(MockLease {
                outcome,
                redirect: options.redirect_stdout,
                emitted: 0,
            }))
        }
    }

    struct MockLease {
        outcome: MockOutcome,
        redirect: Option<PathBuf>,
        emitted: u8,
    }

    #[async_trait]
    impl ProcessLease for MockLease {
        fn pid(&self) -> Option<u32> {
            Some(4242)
        }

        async fn next_event(&mut self) -> Result<Option<LifecycleEvent>, SupervisorError> {
            self.emitted += 1;
            match self.emitted {
                1 => Ok(Some(LifecycleEvent::Started { pid: self.pid() })),
                2 => match &self.outcome {
                    MockOutcome::Exit { code, stdout } => {
                        let output = match &self.redirect {
                            Some(path) => ProcessOutput::Redirected(path.clone()),
                            None => ProcessOutput::Captured {
                                stdout: stdout.clone(),
                                stderr: String::new(),
                            },
                        };
                        Ok(Some(LifecycleEvent::Exited(ExitEvent {
                            exit_code: Some(*code),
                            output,
                            duration_ms: 5,
                        })))
                    }
                    MockOutcome::Timeout(ms) => Err(SupervisorError::Timeout(*ms)),
                    MockOutcome::SpawnFailure(_) => unreachable!("rejected at spawn"),
                },
                _ => Ok(None),
            }
        }

        async fn terminate(&mut self) -> Result<(), SupervisorError> {
            self.emitted = 3;
            Ok(())
        }

        fn is_alive(&self) -> bool {
            self.emitted == 1
        }
    }
}
