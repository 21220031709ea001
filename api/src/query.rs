//! Read path: cache-aside lookups in front of the primary store.
//!
//! Every query walks the same states: check the cache; on a hit return it;
//! on a miss read the store and populate the cache; when the cache is
//! unavailable read the store and skip populating. The owner filter is
//! applied after this, whichever branch produced the data, because list and
//! filtered entries are shared between all owners.

use std::sync::Arc;
use std::time::Instant;

use tracing::debug;

use crate::cache::{CacheAsideStore, CacheLookup};
use crate::cache_keys::{filtered_key, page_key, point_key};
use crate::errors::{Error, Result};
use crate::filter::ReadingFilter;
use crate::metrics::QUERY_LATENCY_SECONDS;
use crate::model::{Pager, Reading};
use crate::stats::{Statistic, Summary};
use crate::store::ReadingStore;

/// Result of `all`. `pager` is only known when the page came straight from
/// the store; a cached page carries no pager state.
#[derive(Debug, Clone, PartialEq)]
pub struct Listing {
    pub readings: Vec<Reading>,
    pub pager: Option<Pager>,
}

/// One page of a filtered query.
#[derive(Debug, Clone, PartialEq)]
pub struct FilteredPage {
    pub readings: Vec<Reading>,
    pub total: usize,
    pub pager: Pager,
}

pub struct QueryEngine {
    readings: Arc<dyn ReadingStore>,
    cache: CacheAsideStore,
}

impl QueryEngine {
    pub fn new(readings: Arc<dyn ReadingStore>, cache: CacheAsideStore) -> Self {
        Self { readings, cache }
    }

    /// Point lookup. Entries are keyed by id only, so ownership is checked
    /// again on every hit.
    pub async fn one(&self, id: &str, owner_key: &str) -> Result<Reading> {
        let started = Instant::now();
        let key = point_key(id);

        let reading = match self.cache.get::<Reading>(&key).await {
            CacheLookup::Hit(reading) => Some(reading),
            CacheLookup::Miss => {
                let found = self.owned_by_id(id, owner_key).await?;
                if let Some(reading) = &found {
                    self.cache.populate(&key, reading).await;
                }
                found
            }
            CacheLookup::Unavailable => self.owned_by_id(id, owner_key).await?,
        };

        observe("one", started);
        reading
            .filter(|r| r.is_owned_by(owner_key))
            .ok_or_else(|| Error::reading_not_found(id))
    }

    async fn owned_by_id(&self, id: &str, owner_key: &str) -> Result<Option<Reading>> {
        Ok(self
            .readings
            .find_by_id(id)
            .await?
            .filter(|r| r.is_owned_by(owner_key)))
    }

    /// Paged listing. The cache holds the raw page, before the owner filter.
    pub async fn all(&self, page: usize, size: usize, owner_key: &str) -> Result<Listing> {
        let started = Instant::now();
        let key = page_key(page, size);

        let (content, pager) = match self.cache.get::<Vec<Reading>>(&key).await {
            CacheLookup::Hit(content) => (content, None),
            CacheLookup::Miss => {
                let fetched = self.readings.find_all_paged(page, size).await?;
                self.cache.populate(&key, &fetched.content).await;
                let pager = Pager {
                    has_next: fetched.has_next(),
                    has_previous: fetched.has_previous(),
                };
                (fetched.content, Some(pager))
            }
            CacheLookup::Unavailable => {
                let fetched = self.readings.find_all_paged(page, size).await?;
                (fetched.content, None)
            }
        };

        observe("all", started);
        Ok(Listing {
            readings: owned(content, owner_key),
            pager,
        })
    }

    /// Filtered query. The full match set (all owners) is cached under the
    /// parameter key; paging re-slices it rather than querying again.
    pub async fn filtered(
        &self,
        filter: &ReadingFilter,
        page: usize,
        size: usize,
        owner_key: &str,
    ) -> Result<FilteredPage> {
        let started = Instant::now();
        let key = filtered_key(filter, page, size);

        let matching = match self.cache.get::<Vec<Reading>>(&key).await {
            CacheLookup::Hit(matching) => matching,
            CacheLookup::Miss => {
                let matching = self.matching(filter).await?;
                self.cache.populate(&key, &matching).await;
                matching
            }
            CacheLookup::Unavailable => self.matching(filter).await?,
        };

        let owned = owned(matching, owner_key);
        let total = owned.len();
        let pager = Pager {
            has_next: total > page.saturating_add(1).saturating_mul(size),
            has_previous: page > 0,
        };

        observe("filtered", started);
        Ok(FilteredPage {
            readings: slice_page(owned, page, size),
            total,
            pager,
        })
    }

    async fn matching(&self, filter: &ReadingFilter) -> Result<Vec<Reading>> {
        let all = self.readings.find_all().await?;
        let matching: Vec<Reading> = all.into_iter().filter(|r| filter.matches(r)).collect();
        debug!(matched = matching.len(), "Filtered readings in memory");
        Ok(matching)
    }

    /// Statistics always recompute from the store; they are never cached.
    pub async fn statistic(
        &self,
        statistic: Statistic,
        filter: &ReadingFilter,
        owner_key: &str,
    ) -> Result<Summary> {
        let started = Instant::now();
        let readings = owned(self.matching(filter).await?, owner_key);
        let summary = statistic.summarize(&readings);
        observe("statistic", started);
        Ok(summary)
    }

    pub async fn latest(&self, owner_key: &str) -> Result<Reading> {
        self.readings
            .find_latest_by_owner(owner_key)
            .await?
            .ok_or_else(|| {
                Error::NotFound("No temperature records found for the current user".to_string())
            })
    }
}

fn owned(readings: Vec<Reading>, owner_key: &str) -> Vec<Reading> {
    readings
        .into_iter()
        .filter(|r| r.is_owned_by(owner_key))
        .collect()
}

/// `[page * size, min((page + 1) * size, n))`, empty past the end.
fn slice_page(readings: Vec<Reading>, page: usize, size: usize) -> Vec<Reading> {
    readings
        .into_iter()
        .skip(page.saturating_mul(size))
        .take(size)
        .collect()
}

fn observe(operation: &str, started: Instant) {
    QUERY_LATENCY_SECONDS
        .with_label_values(&[operation])
        .observe(started.elapsed().as_secs_f64());
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::Device;
    use crate::test_support::{MemoryCache, MemoryReadingStore};

    struct Fixture {
        store: Arc<MemoryReadingStore>,
        cache: Arc<MemoryCache>,
        engine: QueryEngine,
    }

    fn fixture() -> Fixture {
        let store = Arc::new(MemoryReadingStore::default());
        let cache = MemoryCache::new();
        let engine = QueryEngine::new(store.clone(), CacheAsideStore::new(cache.clone()));
        Fixture { store, cache, engine }
    }

    fn seed(
        store: &MemoryReadingStore,
        owner: &str,
        device: &str,
        temperatures: &[f64],
    ) -> Vec<Reading> {
        let device = Device::new(device, Some("lab".to_string()), owner);
        temperatures
            .iter()
            .enumerate()
            .map(|(i, t)| {
                let reading = Reading::new(*t, 50.0, 1_000 * (i as i64 + 1), device.clone());
                store.insert(reading.clone());
                reading
            })
            .collect()
    }

    #[tokio::test]
    async fn test_one_miss_populates_then_hits() {
        let f = fixture();
        let reading = seed(&f.store, "key-a", "s1", &[21.0]).remove(0);

        let first = f.engine.one(&reading.id, "key-a").await.unwrap();
        assert!(f.cache.contains(&point_key(&reading.id)));

        let second = f.engine.one(&reading.id, "key-a").await.unwrap();
        assert_eq!(first, second);
        assert_eq!(f.store.find_by_id_calls(), 1);
    }

    #[tokio::test]
    async fn test_one_hit_rechecks_ownership() {
        let f = fixture();
        let reading = seed(&f.store, "key-a", "s1", &[21.0]).remove(0);
        f.engine.one(&reading.id, "key-a").await.unwrap();

        let err = f.engine.one(&reading.id, "key-b").await.unwrap_err();
        assert!(matches!(err, Error::NotFound(_)));
    }

    #[tokio::test]
    async fn test_one_foreign_reading_is_not_cached() {
        let f = fixture();
        let reading = seed(&f.store, "key-a", "s1", &[21.0]).remove(0);

        assert!(f.engine.one(&reading.id, "key-b").await.is_err());
        assert!(!f.cache.contains(&point_key(&reading.id)));
    }

    #[tokio::test]
    async fn test_one_unknown_id_is_not_found() {
        let f = fixture();
        let err = f.engine.one("missing", "key-a").await.unwrap_err();
        assert_eq!(err.to_string(), "Could not find temperature reading missing");
    }

    #[tokio::test]
    async fn test_one_survives_cache_outage() {
        let f = fixture();
        let reading = seed(&f.store, "key-a", "s1", &[21.0]).remove(0);
        f.cache.set_available(false);

        assert_eq!(f.engine.one(&reading.id, "key-a").await.unwrap(), reading);
        assert!(f.engine.one(&reading.id, "key-b").await.is_err());

        f.cache.set_available(true);
        assert!(!f.cache.contains(&point_key(&reading.id)));
    }

    #[tokio::test]
    async fn test_all_fresh_page_has_pager_cached_page_does_not() {
        let f = fixture();
        seed(&f.store, "key-a", "s1", &[1.0, 2.0, 3.0]);

        let fresh = f.engine.all(0, 2, "key-a").await.unwrap();
        assert_eq!(fresh.readings.len(), 2);
        assert_eq!(
            fresh.pager,
            Some(Pager { has_next: true, has_previous: false })
        );

        let cached = f.engine.all(0, 2, "key-a").await.unwrap();
        assert_eq!(cached.readings, fresh.readings);
        assert_eq!(cached.pager, None);
        assert_eq!(f.store.paged_calls(), 1);
    }

    #[tokio::test]
    async fn test_all_shared_page_is_filtered_per_owner() {
        let f = fixture();
        seed(&f.store, "key-a", "s1", &[1.0]);
        seed(&f.store, "key-b", "s2", &[2.0]);

        let a = f.engine.all(0, 10, "key-a").await.unwrap();
        let b = f.engine.all(0, 10, "key-b").await.unwrap();

        assert_eq!(a.readings.len(), 1);
        assert!(a.readings.iter().all(|r| r.is_owned_by("key-a")));
        assert_eq!(b.readings.len(), 1);
        assert!(b.readings.iter().all(|r| r.is_owned_by("key-b")));
        assert_eq!(f.store.paged_calls(), 1);
    }

    #[tokio::test]
    async fn test_all_degrades_without_pager() {
        let f = fixture();
        seed(&f.store, "key-a", "s1", &[1.0, 2.0, 3.0]);
        let expected = f.engine.all(0, 2, "key-a").await.unwrap();

        f.cache.set_available(false);
        let degraded = f.engine.all(0, 2, "key-a").await.unwrap();

        assert_eq!(degraded.readings, expected.readings);
        assert_eq!(degraded.pager, None);
    }

    #[tokio::test]
    async fn test_filtered_pages_reslice_cached_set() {
        let f = fixture();
        seed(&f.store, "key-a", "s1", &[1.0, 2.0, 3.0, 4.0, 5.0]);
        let filter = ReadingFilter {
            device_name: Some("s1".to_string()),
            ..Default::default()
        };

        let first = f.engine.filtered(&filter, 0, 2, "key-a").await.unwrap();
        assert_eq!(first.total, 5);
        assert_eq!(first.readings.len(), 2);
        assert_eq!(first.pager, Pager { has_next: true, has_previous: false });

        let again = f.engine.filtered(&filter, 0, 2, "key-a").await.unwrap();
        assert_eq!(again, first);
        assert_eq!(f.store.find_all_calls(), 1);

        let last = f.engine.filtered(&filter, 2, 2, "key-a").await.unwrap();
        assert_eq!(last.readings.len(), 1);
        assert_eq!(last.pager, Pager { has_next: false, has_previous: true });

        let past_end = f.engine.filtered(&filter, 9, 2, "key-a").await.unwrap();
        assert!(past_end.readings.is_empty());
    }

    #[tokio::test]
    async fn test_filtered_isolates_owners_with_same_device_name() {
        let f = fixture();
        seed(&f.store, "key-a", "sensor1", &[10.0, 11.0]);
        seed(&f.store, "key-b", "sensor1", &[20.0]);
        let filter = ReadingFilter {
            device_name: Some("sensor1".to_string()),
            ..Default::default()
        };

        let a = f.engine.filtered(&filter, 0, 10, "key-a").await.unwrap();
        let b = f.engine.filtered(&filter, 0, 10, "key-b").await.unwrap();

        assert_eq!(a.total, 2);
        assert!(a.readings.iter().all(|r| r.is_owned_by("key-a")));
        assert_eq!(b.total, 1);
        assert!(b.readings.iter().all(|r| r.is_owned_by("key-b")));
    }

    #[tokio::test]
    async fn test_filtered_same_result_with_and_without_cache() {
        let f = fixture();
        seed(&f.store, "key-a", "s1", &[1.0, 2.0, 3.0]);
        seed(&f.store, "key-b", "s2", &[4.0]);
        let filter = ReadingFilter {
            start_timestamp: Some(2_000),
            ..Default::default()
        };

        let cold = f.engine.filtered(&filter, 0, 10, "key-a").await.unwrap();
        let warm = f.engine.filtered(&filter, 0, 10, "key-a").await.unwrap();
        f.cache.set_available(false);
        let degraded = f.engine.filtered(&filter, 0, 10, "key-a").await.unwrap();

        assert_eq!(cold, warm);
        assert_eq!(cold, degraded);
        assert_eq!(cold.total, 2);
    }

    #[tokio::test]
    async fn test_statistics_are_never_cached() {
        let f = fixture();
        seed(&f.store, "key-a", "s1", &[10.0, 20.0, 30.0, 40.0]);
        let filter = ReadingFilter::default();

        let median = f
            .engine
            .statistic(Statistic::Median, &filter, "key-a")
            .await
            .unwrap();
        assert_eq!(median.temperature_c, 30.0);

        f.engine.statistic(Statistic::Average, &filter, "key-a").await.unwrap();
        assert_eq!(f.store.find_all_calls(), 2);
        assert!(f.cache.is_empty());
    }

    #[tokio::test]
    async fn test_statistics_of_empty_selection_are_zero() {
        let f = fixture();
        seed(&f.store, "key-a", "s1", &[10.0]);
        let filter = ReadingFilter {
            device_name: Some("nothing-matches".to_string()),
            ..Default::default()
        };

        for statistic in [Statistic::Average, Statistic::Min, Statistic::Max, Statistic::Median] {
            let summary = f.engine.statistic(statistic, &filter, "key-a").await.unwrap();
            assert_eq!(summary.temperature_c, 0.0);
            assert_eq!(summary.humidity_percent, 0.0);
            assert_eq!(summary.dew_point_c, 0.0);
        }
    }

    #[tokio::test]
    async fn test_latest_is_scoped_to_owner() {
        let f = fixture();
        let a = seed(&f.store, "key-a", "s1", &[1.0, 2.0]);
        seed(&f.store, "key-b", "s2", &[3.0, 4.0, 5.0]);

        let latest = f.engine.latest("key-a").await.unwrap();
        assert_eq!(latest.id, a[1].id);
        assert!(matches!(f.engine.latest("key-c").await, Err(Error::NotFound(_))));
    }
}
