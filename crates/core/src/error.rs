// Central Error Type for the Application

use thiserror::Error;

/// Application-level error type
#[derive(Error, Debug)]
pub enum AppError {
    #[error("Domain error: {0}")]
    Domain(#[from] crate::domain::DomainError),

    #[error("Process error: {0}")]
    Supervisor(#[from] crate::port::SupervisorError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Install failed on device {device}: {reason}")]
    InstallFailed { device: String, reason: String },

    #[error("Command failed: {context} (exit code {exit_code:?})")]
    CommandFailed {
        context: String,
        exit_code: Option<i32>,
    },

    #[error("Internal error: {0}")]
    Internal(String),
}

impl AppError {
    /// Failures that abort the whole automation run, not just one device.
    /// The top-level driver decides how to terminate on these.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            AppError::InstallFailed { .. } | AppError::Config(_)
        )
    }
}

/// Result type alias using AppError
pub type Result<T> = std::result::Result<T, AppError>;
