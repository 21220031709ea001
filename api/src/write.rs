use std::sync::Arc;

use chrono::Utc;
use rand::distributions::Alphanumeric;
use rand::Rng;
use tracing::{debug, info};

use crate::cache::CacheAsideStore;
use crate::cache_keys::point_key;
use crate::errors::{Error, Result};
use crate::model::{Device, DeviceRequest, NewReading, Reading};
use crate::store::{DeviceStore, ReadingStore};
use crate::validate::validate;

const SUFFIX_LEN: usize = 6;

fn random_suffix() -> String {
    rand::thread_rng()
        .sample_iter(&Alphanumeric)
        .take(SUFFIX_LEN)
        .map(|c| char::from(c).to_ascii_lowercase())
        .collect()
}

/// Write path for readings.
///
/// A successful create writes the new reading's point entry to the cache.
/// Page and filtered entries are left alone and keep serving their old
/// contents until they expire.
pub struct WriteCoordinator {
    readings: Arc<dyn ReadingStore>,
    devices: Arc<dyn DeviceStore>,
    cache: CacheAsideStore,
}

impl WriteCoordinator {
    pub fn new(
        readings: Arc<dyn ReadingStore>,
        devices: Arc<dyn DeviceStore>,
        cache: CacheAsideStore,
    ) -> Self {
        Self {
            readings,
            devices,
            cache,
        }
    }

    pub async fn create(&self, request: &NewReading, owner_key: &str) -> Result<Reading> {
        let device_request = validate(request)?;
        let device = self.resolve_device(device_request, owner_key).await?;

        let reading = Reading::new(
            request.temperature_c,
            request.humidity_percent,
            Utc::now().timestamp_millis(),
            device,
        );
        let saved = self.readings.save(&reading).await?;

        self.cache.populate(&point_key(&saved.id), &saved).await;

        info!(id = %saved.id, device = %saved.device.name, "Reading created");
        Ok(saved)
    }

    /// Finds the owner's device by the name they asked for, creating it if
    /// needed. A name already used by another owner gets a random suffix;
    /// a concurrent create by the same owner resolves to the winner's row.
    async fn resolve_device(&self, request: &DeviceRequest, owner_key: &str) -> Result<Device> {
        let name = request.device_name.trim();

        if let Some(mut device) = self.devices.find_by_requested_name(name, owner_key).await? {
            if let Some(location) = &request.location {
                if device.location.as_deref() != Some(location.as_str()) {
                    self.devices.update_location(&device.id, location).await?;
                    device.location = Some(location.clone());
                }
            }
            return Ok(device);
        }

        let candidate = Device::new(name, request.location.clone(), owner_key);
        match self.devices.insert(&candidate).await {
            Err(Error::Conflict(reason)) => {
                debug!(name, reason = %reason, "Device name conflict");
                if let Some(device) = self.devices.find_by_requested_name(name, owner_key).await? {
                    return Ok(device);
                }
                let renamed = candidate.with_suffix(&random_suffix());
                info!(
                    requested = name,
                    name = %renamed.name,
                    "Device name taken by another owner, using suffix"
                );
                self.devices.insert(&renamed).await
            }
            other => other,
        }
    }

    /// Removes an owned reading and its point cache entry.
    pub async fn delete(&self, id: &str, owner_key: &str) -> Result<()> {
        let owned = self
            .readings
            .find_by_id(id)
            .await?
            .is_some_and(|r| r.is_owned_by(owner_key));
        if !owned {
            return Err(Error::reading_not_found(id));
        }

        self.readings.delete_by_id(id).await?;

        let key = point_key(id);
        if let Ok(true) = self.cache.exists(&key).await {
            // Failure is already logged by the cache layer.
            let _ = self.cache.invalidate(&key).await;
        }

        info!(id, "Reading deleted");
        Ok(())
    }
}
