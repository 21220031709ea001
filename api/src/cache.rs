//! Cache-aside access to the shared key-value cache.
//!
//! `CacheClient` is the raw transport (Redis in production). `CacheAsideStore`
//! sits on top of it and is the only thing the read/write paths talk to.
//! Values are stored as JSON with a one hour TTL. Any transport failure
//! surfaces as `CacheLookup::Unavailable` or `CacheUnavailable`.

use crate::metrics::{
    CACHE_HITS_TOTAL, CACHE_MISSES_TOTAL, CACHE_POPULATE_FAILURES_TOTAL, CACHE_UNAVAILABLE_TOTAL,
};
use async_trait::async_trait;
use redis::{aio::ConnectionManager, AsyncCommands, Client, RedisResult};
use serde::{de::DeserializeOwned, Serialize};
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::OnceCell;
use tracing::{debug, info, warn};

/// Lifetime of every cache entry written by this service.
pub const CACHE_TTL: Duration = Duration::from_secs(60 * 60);

#[derive(Debug, Error)]
pub enum CacheError {
    #[error("Redis error: {0}")]
    Redis(#[from] redis::RedisError),

    #[error("Cache operation timed out after {0:?}")]
    Timeout(Duration),

    #[error("Cache not available: {0}")]
    Unavailable(String),
}

pub type CacheResult<T> = std::result::Result<T, CacheError>;

#[async_trait]
pub trait CacheClient: Send + Sync {
    async fn get(&self, key: &str) -> CacheResult<Option<String>>;

    async fn set_with_ttl(&self, key: &str, value: String, ttl: Duration) -> CacheResult<()>;

    async fn exists(&self, key: &str) -> CacheResult<bool>;

    async fn delete(&self, key: &str) -> CacheResult<()>;
}

/// Redis-backed cache client.
///
/// The connection is opened on first use rather than at start-up, so the
/// service boots while Redis is down and picks it up once it appears. Every
/// command, including that first connect, is bounded by `timeout`.
pub struct RedisCacheClient {
    client: Client,
    connection: OnceCell<ConnectionManager>,
    timeout: Duration,
}

impl RedisCacheClient {
    pub fn new(url: &str, timeout: Duration) -> CacheResult<Self> {
        let client = Client::open(url)?;
        Ok(Self {
            client,
            connection: OnceCell::new(),
            timeout,
        })
    }

    async fn connection(&self) -> CacheResult<ConnectionManager> {
        let manager = self
            .connection
            .get_or_try_init(|| async {
                info!("Connecting to Redis...");
                let manager = self
                    .isolated(ConnectionManager::new(self.client.clone()))
                    .await?;
                info!("Redis connection established");
                Ok::<_, CacheError>(manager)
            })
            .await?;
        Ok(manager.clone())
    }

    /// Runs driver work on its own task. A panic inside the redis driver
    /// comes back as `Unavailable` instead of unwinding into the request.
    async fn isolated<T, F>(&self, work: F) -> CacheResult<T>
    where
        F: Future<Output = RedisResult<T>> + Send + 'static,
        T: Send + 'static,
    {
        let timeout = self.timeout;
        match tokio::spawn(tokio::time::timeout(timeout, work)).await {
            Ok(Ok(result)) => Ok(result?),
            Ok(Err(_)) => Err(CacheError::Timeout(timeout)),
            Err(e) => Err(CacheError::Unavailable(format!("redis task failed: {}", e))),
        }
    }

    async fn bounded<T, F>(&self, operation: F) -> CacheResult<T>
    where
        F: Future<Output = CacheResult<T>> + Send,
    {
        tokio::time::timeout(self.timeout, operation)
            .await
            .map_err(|_| CacheError::Timeout(self.timeout))?
    }
}

#[async_trait]
impl CacheClient for RedisCacheClient {
    async fn get(&self, key: &str) -> CacheResult<Option<String>> {
        self.bounded(async {
            let mut conn = self.connection().await?;
            let key = key.to_string();
            self.isolated(async move { conn.get::<_, Option<String>>(key).await })
                .await
        })
        .await
    }

    async fn set_with_ttl(&self, key: &str, value: String, ttl: Duration) -> CacheResult<()> {
        self.bounded(async {
            let mut conn = self.connection().await?;
            let key = key.to_string();
            self.isolated(async move { conn.set_ex::<_, _, ()>(key, value, ttl.as_secs()).await })
                .await
        })
        .await
    }

    async fn exists(&self, key: &str) -> CacheResult<bool> {
        self.bounded(async {
            let mut conn = self.connection().await?;
            let key = key.to_string();
            self.isolated(async move { conn.exists::<_, bool>(key).await })
                .await
        })
        .await
    }

    async fn delete(&self, key: &str) -> CacheResult<()> {
        self.bounded(async {
            let mut conn = self.connection().await?;
            let key = key.to_string();
            self.isolated(async move { conn.del::<_, ()>(key).await })
                .await
        })
        .await
    }
}

/// Outcome of a cache read.
#[derive(Debug, Clone, PartialEq)]
pub enum CacheLookup<T> {
    Hit(T),
    Miss,
    Unavailable,
}

/// The single failure signal the cache layer lets out.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("cache unavailable")]
pub struct CacheUnavailable;

#[derive(Clone)]
pub struct CacheAsideStore {
    client: Arc<dyn CacheClient>,
}

impl CacheAsideStore {
    pub fn new(client: Arc<dyn CacheClient>) -> Self {
        Self { client }
    }

    /// An entry that no longer decodes (e.g. written by an older build) is
    /// reported as a miss, so the caller overwrites it.
    pub async fn get<T: DeserializeOwned>(&self, key: &str) -> CacheLookup<T> {
        match self.client.get(key).await {
            Ok(Some(raw)) => match serde_json::from_str(&raw) {
                Ok(value) => {
                    CACHE_HITS_TOTAL.inc();
                    debug!(key, "Cache hit");
                    CacheLookup::Hit(value)
                }
                Err(e) => {
                    CACHE_MISSES_TOTAL.inc();
                    warn!(key, error = %e, "Discarding undecodable cache entry");
                    CacheLookup::Miss
                }
            },
            Ok(None) => {
                CACHE_MISSES_TOTAL.inc();
                debug!(key, "Cache miss");
                CacheLookup::Miss
            }
            Err(e) => {
                self.unavailable(key, "get", &e);
                CacheLookup::Unavailable
            }
        }
    }

    pub async fn set<T: Serialize + ?Sized>(
        &self,
        key: &str,
        value: &T,
    ) -> Result<(), CacheUnavailable> {
        let raw = serde_json::to_string(value).map_err(|e| {
            warn!(key, error = %e, "Failed to serialise cache value");
            CacheUnavailable
        })?;
        self.client
            .set_with_ttl(key, raw, CACHE_TTL)
            .await
            .map_err(|e| self.unavailable(key, "set", &e))
    }

    pub async fn exists(&self, key: &str) -> Result<bool, CacheUnavailable> {
        self.client
            .exists(key)
            .await
            .map_err(|e| self.unavailable(key, "exists", &e))
    }

    pub async fn invalidate(&self, key: &str) -> Result<(), CacheUnavailable> {
        self.client
            .delete(key)
            .await
            .map_err(|e| self.unavailable(key, "delete", &e))
    }

    /// Writes `value` after a successful store operation. A failure is
    /// logged and counted, never returned.
    pub async fn populate<T: Serialize + ?Sized>(&self, key: &str, value: &T) {
        if self.set(key, value).await.is_err() {
            CACHE_POPULATE_FAILURES_TOTAL.inc();
            warn!(key, "Cache populate skipped");
        }
    }

    fn unavailable(&self, key: &str, operation: &str, error: &CacheError) -> CacheUnavailable {
        CACHE_UNAVAILABLE_TOTAL.inc();
        warn!(key, operation, error = %error, "Cache unavailable, continuing without it");
        CacheUnavailable
    }
}
