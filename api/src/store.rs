use async_trait::async_trait;

use crate::errors::Result;
use crate::model::{Device, Page, Reading};

/// Primary store for readings. Implementations return readings joined with
/// their owning device.
#[async_trait]
pub trait ReadingStore: Send + Sync {
    async fn find_by_id(&self, id: &str) -> Result<Option<Reading>>;

    async fn find_all(&self) -> Result<Vec<Reading>>;

    /// Readings ordered by timestamp, then id.
    async fn find_all_paged(&self, page: usize, size: usize) -> Result<Page<Reading>>;

    async fn find_latest_by_owner(&self, owner_key: &str) -> Result<Option<Reading>>;

    async fn save(&self, reading: &Reading) -> Result<Reading>;

    async fn delete_by_id(&self, id: &str) -> Result<()>;
}

/// Primary store for devices.
#[async_trait]
pub trait DeviceStore: Send + Sync {
    async fn find_by_id(&self, id: &str) -> Result<Option<Device>>;

    async fn find_by_requested_name(&self, name: &str, owner_key: &str) -> Result<Option<Device>>;

    async fn find_by_owner(&self, owner_key: &str) -> Result<Vec<Device>>;

    /// Fails with `Error::Conflict` when the name is already taken, either
    /// globally or under the same owner.
    async fn insert(&self, device: &Device) -> Result<Device>;

    async fn update_location(&self, id: &str, location: &str) -> Result<()>;
}

/// Maps an API key to the owner key its data is stored under.
#[async_trait]
pub trait IdentityResolver: Send + Sync {
    async fn resolve(&self, api_key: &str) -> Result<Option<String>>;
}
