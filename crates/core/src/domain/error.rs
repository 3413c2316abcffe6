// Domain Error Types

use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DomainError {
    /// The listing output did not contain the expected header line.
    /// Transient: the tool occasionally emits daemon-startup noise instead.
    #[error("Device listing missing the header line")]
    MissingListingHeader,

    /// A listing line carried a state token that is neither online nor
    /// offline. Permanent: retrying will not change the protocol.
    #[error("Unrecognized device state in line: {0}")]
    UnrecognizedDeviceState(String),
}

pub type Result<T> = std::result::Result<T, DomainError>;
