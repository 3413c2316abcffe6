// Port Layer - Interfaces for external dependencies

pub mod process_supervisor;
pub mod time_provider;

// Re-exports
pub use process_supervisor::{
    ExitEvent, InvocationOptions, InvocationSpec, LifecycleEvent, ProcessLease, ProcessOutput,
    ProcessSupervisor, SupervisorError,
};
pub use time_provider::TimeProvider;
