// Domain Layer - Pure device model and listing protocol parsing

pub mod device;
pub mod error;

// Re-exports
pub use device::{normalize_model, parse_device_listing, Device, ListedDevice, LISTING_HEADER};
pub use error::DomainError;
