//! In-memory collaborators for unit tests.

use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use dashmap::DashMap;

use crate::cache::{CacheClient, CacheError, CacheResult};
use crate::errors::{Error, Result};
use crate::model::{Device, Page, Reading};
use crate::store::{DeviceStore, IdentityResolver, ReadingStore};

/// Cache double that can be switched off to simulate a Redis outage.
#[derive(Default)]
pub struct MemoryCache {
    entries: DashMap<String, (String, Duration)>,
    down: AtomicBool,
}

impl MemoryCache {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn set_available(&self, available: bool) {
        self.down.store(!available, Ordering::SeqCst);
    }

    pub fn contains(&self, key: &str) -> bool {
        self.entries.contains_key(key)
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn ttl_of(&self, key: &str) -> Option<Duration> {
        self.entries.get(key).map(|entry| entry.1)
    }

    pub fn insert_raw(&self, key: &str, value: &str) {
        self.entries
            .insert(key.to_string(), (value.to_string(), Duration::ZERO));
    }

    fn check(&self) -> CacheResult<()> {
        if self.down.load(Ordering::SeqCst) {
            Err(CacheError::Unavailable("connection refused".to_string()))
        } else {
            Ok(())
        }
    }
}

#[async_trait]
impl CacheClient for MemoryCache {
    async fn get(&self, key: &str) -> CacheResult<Option<String>> {
        self.check()?;
        Ok(self.entries.get(key).map(|entry| entry.0.clone()))
    }

    async fn set_with_ttl(&self, key: &str, value: String, ttl: Duration) -> CacheResult<()> {
        self.check()?;
        self.entries.insert(key.to_string(), (value, ttl));
        Ok(())
    }

    async fn exists(&self, key: &str) -> CacheResult<bool> {
        self.check()?;
        Ok(self.entries.contains_key(key))
    }

    async fn delete(&self, key: &str) -> CacheResult<()> {
        self.check()?;
        self.entries.remove(key);
        Ok(())
    }
}

#[derive(Default)]
pub struct MemoryReadingStore {
    rows: Mutex<Vec<Reading>>,
    find_by_id_calls: AtomicUsize,
    find_all_calls: AtomicUsize,
    paged_calls: AtomicUsize,
}

impl MemoryReadingStore {
    pub fn insert(&self, reading: Reading) {
        self.rows.lock().unwrap().push(reading);
    }

    pub fn len(&self) -> usize {
        self.rows.lock().unwrap().len()
    }

    pub fn find_by_id_calls(&self) -> usize {
        self.find_by_id_calls.load(Ordering::SeqCst)
    }

    pub fn find_all_calls(&self) -> usize {
        self.find_all_calls.load(Ordering::SeqCst)
    }

    pub fn paged_calls(&self) -> usize {
        self.paged_calls.load(Ordering::SeqCst)
    }

    fn sorted(&self) -> Vec<Reading> {
        let mut rows = self.rows.lock().unwrap().clone();
        rows.sort_by(|a, b| a.timestamp_ms.cmp(&b.timestamp_ms).then_with(|| a.id.cmp(&b.id)));
        rows
    }
}

#[async_trait]
impl ReadingStore for MemoryReadingStore {
    async fn find_by_id(&self, id: &str) -> Result<Option<Reading>> {
        self.find_by_id_calls.fetch_add(1, Ordering::SeqCst);
        Ok(self.rows.lock().unwrap().iter().find(|r| r.id == id).cloned())
    }

    async fn find_all(&self) -> Result<Vec<Reading>> {
        self.find_all_calls.fetch_add(1, Ordering::SeqCst);
        Ok(self.sorted())
    }

    async fn find_all_paged(&self, page: usize, size: usize) -> Result<Page<Reading>> {
        self.paged_calls.fetch_add(1, Ordering::SeqCst);
        let rows = self.sorted();
        let total = rows.len() as u64;
        Ok(Page {
            content: rows.into_iter().skip(page.saturating_mul(size)).take(size).collect(),
            page,
            size,
            total,
        })
    }

    async fn find_latest_by_owner(&self, owner_key: &str) -> Result<Option<Reading>> {
        Ok(self
            .sorted()
            .into_iter()
            .filter(|r| r.is_owned_by(owner_key))
            .last())
    }

    async fn save(&self, reading: &Reading) -> Result<Reading> {
        self.insert(reading.clone());
        Ok(reading.clone())
    }

    async fn delete_by_id(&self, id: &str) -> Result<()> {
        self.rows.lock().unwrap().retain(|r| r.id != id);
        Ok(())
    }
}

/// Device store enforcing the same uniqueness rules as the Postgres schema.
#[derive(Default)]
pub struct MemoryDeviceStore {
    rows: Mutex<Vec<Device>>,
    racing: Mutex<Option<Device>>,
    insert_calls: AtomicUsize,
}

impl MemoryDeviceStore {
    pub fn add(&self, device: Device) {
        self.rows.lock().unwrap().push(device);
    }

    pub fn all(&self) -> Vec<Device> {
        self.rows.lock().unwrap().clone()
    }

    pub fn insert_calls(&self) -> usize {
        self.insert_calls.load(Ordering::SeqCst)
    }

    /// Makes `device` appear just before the next insert runs, as if a
    /// concurrent request had created it between lookup and insert.
    pub fn race_next_insert(&self, device: Device) {
        *self.racing.lock().unwrap() = Some(device);
    }
}

#[async_trait]
impl DeviceStore for MemoryDeviceStore {
    async fn find_by_id(&self, id: &str) -> Result<Option<Device>> {
        Ok(self.rows.lock().unwrap().iter().find(|d| d.id == id).cloned())
    }

    async fn find_by_requested_name(&self, name: &str, owner_key: &str) -> Result<Option<Device>> {
        Ok(self
            .rows
            .lock()
            .unwrap()
            .iter()
            .find(|d| d.requested_name == name && d.owner_key == owner_key)
            .cloned())
    }

    async fn find_by_owner(&self, owner_key: &str) -> Result<Vec<Device>> {
        Ok(self
            .rows
            .lock()
            .unwrap()
            .iter()
            .filter(|d| d.owner_key == owner_key)
            .cloned()
            .collect())
    }

    async fn insert(&self, device: &Device) -> Result<Device> {
        self.insert_calls.fetch_add(1, Ordering::SeqCst);
        if let Some(winner) = self.racing.lock().unwrap().take() {
            self.add(winner);
        }

        let mut rows = self.rows.lock().unwrap();
        let taken = rows.iter().any(|d| {
            d.name == device.name
                || (d.requested_name == device.requested_name && d.owner_key == device.owner_key)
        });
        if taken {
            return Err(Error::Conflict(format!("device name {} is taken", device.name)));
        }
        rows.push(device.clone());
        Ok(device.clone())
    }

    async fn update_location(&self, id: &str, location: &str) -> Result<()> {
        if let Some(device) = self.rows.lock().unwrap().iter_mut().find(|d| d.id == id) {
            device.location = Some(location.to_string());
        }
        Ok(())
    }
}

#[derive(Default)]
pub struct StaticIdentities {
    keys: HashSet<String>,
}

impl StaticIdentities {
    pub fn new(keys: &[&str]) -> Self {
        Self {
            keys: keys.iter().map(|k| k.to_string()).collect(),
        }
    }
}

#[async_trait]
impl IdentityResolver for StaticIdentities {
    async fn resolve(&self, api_key: &str) -> Result<Option<String>> {
        Ok(self.keys.get(api_key).cloned())
    }
}
