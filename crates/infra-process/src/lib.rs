// droidci Infrastructure - Process Adapter
// Implements: ProcessSupervisor over tokio::process

pub mod supervisor;

#[cfg(unix)]
pub use supervisor::process_exists;
pub use supervisor::TokioProcessSupervisor;
