// Device Domain Model

use crate::domain::error::{DomainError, Result};
use serde::{Deserialize, Serialize};

/// Literal header line preceding device entries in the listing output
pub const LISTING_HEADER: &str = "List of devices attached";

/// Sentinel the property query returns when the model is unset
pub const MODEL_UNDEFINED: &str = "undefined";

/// One connected or emulated Android unit as seen by a single discovery
/// snapshot. `id` is the stable serial key; `online` and `model` are facts
/// about that snapshot only. A later discovery produces a new snapshot,
/// never an in-place update.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Device {
    pub id: String,
    pub online: bool,
    /// Human-readable product name; empty until enrichment supplies one
    pub model: String,
}

impl Device {
    pub fn new(id: impl Into<String>, online: bool) -> Self {
        Self {
            id: id.into(),
            online,
            model: String::new(),
        }
    }

    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = model.into();
        self
    }
}

/// A parsed listing entry, before model enrichment
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ListedDevice {
    pub id: String,
    pub online: bool,
}

/// Parse the raw listing output into device entries.
///
/// The text must contain [`LISTING_HEADER`]. Everything after it is split
/// into lines, trimmed, and classified: a line mentioning `offline`
/// (case-insensitive) maps to `online = false`, otherwise a line mentioning
/// `device` maps to `online = true`, and anything else is an unrecognized
/// state. The id is the substring before the first tab.
///
/// Pure function over text so it is testable without spawning processes.
pub fn parse_device_listing(raw: &str) -> Result<Vec<ListedDevice>> {
    let after_header = raw
        .split_once(LISTING_HEADER)
        .ok_or(DomainError::MissingListingHeader)?
        .1;

    let mut devices = Vec::new();
    for line in after_header.lines() {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }

        let lowered = line.to_ascii_lowercase();
        let online = if lowered.contains("offline") {
            false
        } else if lowered.contains("device") {
            true
        } else {
            return Err(DomainError::UnrecognizedDeviceState(line.to_string()));
        };

        let id = line.split('\t').next().unwrap_or(line).trim().to_string();
        devices.push(ListedDevice { id, online });
    }

    Ok(devices)
}

/// Map the raw property-query output to the model field
pub fn normalize_model(raw: &str) -> String {
    let trimmed = raw.trim();
    if trimmed == MODEL_UNDEFINED {
        String::new()
    } else {
        trimmed.to_string()
    }
}
