use crate::errors::{Error, Result};
use crate::metrics::DB_FAILURES_TOTAL;
use crate::model::{Device, Page, Reading};
use crate::store::{DeviceStore, IdentityResolver, ReadingStore};
use async_trait::async_trait;
use sqlx::postgres::{PgPool, PgPoolOptions};
use std::time::Duration;
use tracing::{debug, error, info};

const UNIQUE_VIOLATION: &str = "23505";

const READING_COLUMNS: &str = r#"
    SELECT r.id, r.temperature_c, r.humidity_percent, r.dew_point_c, r.timestamp_ms,
           d.id AS device_id, d.device_name, d.requested_name, d.location, d.owner_key
    FROM readings r
    JOIN devices d ON d.id = r.device_id
    "#;

const DEVICE_COLUMNS: &str =
    "SELECT id, device_name, requested_name, location, owner_key FROM devices";

pub async fn make_pool(database_url: &str, max_connections: u32) -> Result<PgPool> {
    info!("Connecting to database...");
    let pool = PgPoolOptions::new()
        .max_connections(max_connections)
        .acquire_timeout(Duration::from_secs(10))
        .connect(database_url)
        .await?;

    info!("Database connection established");
    info!("Running database migrations...");
    sqlx::migrate!("./migrations").run(&pool).await?;
    info!("Migrations completed");

    Ok(pool)
}

/// Counts and logs a failed store call before handing it up.
fn store_error(operation: &str, err: sqlx::Error) -> Error {
    DB_FAILURES_TOTAL.inc();
    error!("Database {} failed: {}", operation, err);
    Error::Database(err)
}

fn is_unique_violation(err: &sqlx::Error) -> bool {
    match err {
        sqlx::Error::Database(db_err) => db_err.code().is_some_and(|code| code == UNIQUE_VIOLATION),
        _ => false,
    }
}

#[derive(Debug, sqlx::FromRow)]
struct ReadingRow {
    id: String,
    temperature_c: f64,
    humidity_percent: f64,
    dew_point_c: f64,
    timestamp_ms: i64,
    device_id: String,
    device_name: String,
    requested_name: String,
    location: Option<String>,
    owner_key: String,
}

impl From<ReadingRow> for Reading {
    fn from(row: ReadingRow) -> Self {
        Reading {
            id: row.id,
            temperature_c: row.temperature_c,
            humidity_percent: row.humidity_percent,
            dew_point_c: row.dew_point_c,
            timestamp_ms: row.timestamp_ms,
            device: Device {
                id: row.device_id,
                name: row.device_name,
                requested_name: row.requested_name,
                location: row.location,
                owner_key: row.owner_key,
            },
        }
    }
}

#[derive(Debug, Clone)]
pub struct PgReadingStore {
    pool: PgPool,
}

impl PgReadingStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl ReadingStore for PgReadingStore {
    async fn find_by_id(&self, id: &str) -> Result<Option<Reading>> {
        let query = format!("{} WHERE r.id = $1", READING_COLUMNS);
        let row = sqlx::query_as::<_, ReadingRow>(&query)
            .bind(id)
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| store_error("find reading", e))?;
        Ok(row.map(Reading::from))
    }

    async fn find_all(&self) -> Result<Vec<Reading>> {
        let query = format!("{} ORDER BY r.timestamp_ms, r.id", READING_COLUMNS);
        let rows = sqlx::query_as::<_, ReadingRow>(&query)
            .fetch_all(&self.pool)
            .await
            .map_err(|e| store_error("list readings", e))?;
        Ok(rows.into_iter().map(Reading::from).collect())
    }

    async fn find_all_paged(&self, page: usize, size: usize) -> Result<Page<Reading>> {
        let query = format!(
            "{} ORDER BY r.timestamp_ms, r.id LIMIT $1 OFFSET $2",
            READING_COLUMNS
        );
        let rows = sqlx::query_as::<_, ReadingRow>(&query)
            .bind(size as i64)
            .bind(i64::try_from(page.saturating_mul(size)).unwrap_or(i64::MAX))
            .fetch_all(&self.pool)
            .await
            .map_err(|e| store_error("page readings", e))?;

        let total: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM readings")
            .fetch_one(&self.pool)
            .await
            .map_err(|e| store_error("count readings", e))?;

        Ok(Page {
            content: rows.into_iter().map(Reading::from).collect(),
            page,
            size,
            total: total.max(0) as u64,
        })
    }

    async fn find_latest_by_owner(&self, owner_key: &str) -> Result<Option<Reading>> {
        let query = format!(
            "{} WHERE d.owner_key = $1 ORDER BY r.timestamp_ms DESC, r.id DESC LIMIT 1",
            READING_COLUMNS
        );
        let row = sqlx::query_as::<_, ReadingRow>(&query)
            .bind(owner_key)
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| store_error("latest reading", e))?;
        Ok(row.map(Reading::from))
    }

    async fn save(&self, reading: &Reading) -> Result<Reading> {
        sqlx::query(
            r#"
            INSERT INTO readings
                (id, device_id, temperature_c, humidity_percent, dew_point_c, timestamp_ms)
            VALUES ($1, $2, $3, $4, $5, $6)
            "#,
        )
        .bind(&reading.id)
        .bind(&reading.device.id)
        .bind(reading.temperature_c)
        .bind(reading.humidity_percent)
        .bind(reading.dew_point_c)
        .bind(reading.timestamp_ms)
        .execute(&self.pool)
        .await
        .map_err(|e| store_error("insert reading", e))?;

        debug!(id = %reading.id, device = %reading.device.id, "Stored reading");
        Ok(reading.clone())
    }

    async fn delete_by_id(&self, id: &str) -> Result<()> {
        sqlx::query("DELETE FROM readings WHERE id = $1")
            .bind(id)
            .execute(&self.pool)
            .await
            .map_err(|e| store_error("delete reading", e))?;
        Ok(())
    }
}

#[derive(Debug, Clone)]
pub struct PgDeviceStore {
    pool: PgPool,
}

impl PgDeviceStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl DeviceStore for PgDeviceStore {
    async fn find_by_id(&self, id: &str) -> Result<Option<Device>> {
        let query = format!("{} WHERE id = $1", DEVICE_COLUMNS);
        sqlx::query_as::<_, Device>(&query)
            .bind(id)
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| store_error("find device", e))
    }

    async fn find_by_requested_name(&self, name: &str, owner_key: &str) -> Result<Option<Device>> {
        let query = format!("{} WHERE requested_name = $1 AND owner_key = $2", DEVICE_COLUMNS);
        sqlx::query_as::<_, Device>(&query)
            .bind(name)
            .bind(owner_key)
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| store_error("find device by name", e))
    }

    async fn find_by_owner(&self, owner_key: &str) -> Result<Vec<Device>> {
        let query = format!("{} WHERE owner_key = $1 ORDER BY device_name", DEVICE_COLUMNS);
        sqlx::query_as::<_, Device>(&query)
            .bind(owner_key)
            .fetch_all(&self.pool)
            .await
            .map_err(|e| store_error("list devices", e))
    }

    async fn insert(&self, device: &Device) -> Result<Device> {
        let result = sqlx::query(
            r#"
            INSERT INTO devices (id, device_name, requested_name, location, owner_key)
            VALUES ($1, $2, $3, $4, $5)
            "#,
        )
        .bind(&device.id)
        .bind(&device.name)
        .bind(&device.requested_name)
        .bind(&device.location)
        .bind(&device.owner_key)
        .execute(&self.pool)
        .await;

        match result {
            Ok(_) => {
                debug!(id = %device.id, name = %device.name, "Registered device");
                Ok(device.clone())
            }
            Err(e) if is_unique_violation(&e) => {
                Err(Error::Conflict(format!("device name {} is taken", device.name)))
            }
            Err(e) => Err(store_error("insert device", e)),
        }
    }

    async fn update_location(&self, id: &str, location: &str) -> Result<()> {
        sqlx::query("UPDATE devices SET location = $2 WHERE id = $1")
            .bind(id)
            .bind(location)
            .execute(&self.pool)
            .await
            .map_err(|e| store_error("update device", e))?;
        Ok(())
    }
}

#[derive(Debug, Clone)]
pub struct PgIdentityResolver {
    pool: PgPool,
}

impl PgIdentityResolver {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl IdentityResolver for PgIdentityResolver {
    async fn resolve(&self, api_key: &str) -> Result<Option<String>> {
        sqlx::query_scalar::<_, String>("SELECT api_key FROM api_keys WHERE api_key = $1")
            .bind(api_key)
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| store_error("resolve api key", e))
    }
}
