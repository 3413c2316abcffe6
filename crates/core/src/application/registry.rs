// Device Registry - discovery over the listing protocol

use crate::application::retry::RetryPolicy;
use crate::application::toolchain::AdbToolchain;
use crate::domain::device::{normalize_model, parse_device_listing, Device, ListedDevice};
use crate::domain::DomainError;
use crate::error::{AppError, Result};
use crate::port::process_supervisor::{InvocationOptions, ProcessSupervisor};
use futures::future::try_join_all;
use std::sync::Arc;
use tracing::{debug, info};

/// Re-invocations of the listing command after a malformed response
const LISTING_RETRIES: u32 = 5;

/// Discovers connected devices and enriches each with its model name
pub struct DeviceRegistry {
    toolchain: Arc<AdbToolchain>,
    supervisor: Arc<dyn ProcessSupervisor>,
}

impl DeviceRegistry {
    pub fn new(toolchain: Arc<AdbToolchain>, supervisor: Arc<dyn ProcessSupervisor>) -> Self {
        Self {
            toolchain,
            supervisor,
        }
    }

    /// One discovery snapshot: listing, parse, concurrent model enrichment.
    ///
    /// A malformed listing (missing header) is retried up to
    /// `LISTING_RETRIES` times; any other failure propagates immediately.
    /// A model-query failure fails the whole snapshot - no partial results.
    pub async fn discover(&self) -> Result<Vec<Device>> {
        let listed = RetryPolicy::new(LISTING_RETRIES)
            .run(
                || self.list_once(),
                |err| matches!(err, AppError::Domain(DomainError::MissingListingHeader)),
            )
            .await?;

        let devices = try_join_all(listed.into_iter().map(|entry| self.enrich(entry))).await?;

        info!(devices = devices.len(), "Discovery snapshot complete");
        Ok(devices)
    }

    async fn list_once(&self) -> Result<Vec<ListedDevice>> {
        let exit = self
            .supervisor
            .run(self.toolchain.list_devices(), InvocationOptions::streaming())
            .await?;
        let listed = parse_device_listing(exit.output.stdout())?;
        debug!(entries = listed.len(), "Parsed device listing");
        Ok(listed)
    }

    async fn enrich(&self, entry: ListedDevice) -> Result<Device> {
        let exit = self
            .supervisor
            .run(
                self.toolchain.query_model(&entry.id),
                InvocationOptions::default(),
            )
            .await?;
        let model = normalize_model(exit.output.stdout());
        Ok(Device {
            id: entry.id,
            online: entry.online,
            model,
        })
    }
}
