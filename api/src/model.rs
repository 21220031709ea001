use serde::{Deserialize, Serialize};
use uuid::Uuid;

// Magnus coefficients over water, valid for roughly -45..60 C.
const MAGNUS_A: f64 = 17.27;
const MAGNUS_B: f64 = 237.7;

/// Dew point in degrees Celsius from air temperature and relative humidity.
///
/// Zero humidity has no finite logarithm, so it is treated as the smallest
/// positive fraction and yields the formula's lower asymptote instead of
/// negative infinity.
pub fn dew_point(temperature_c: f64, humidity_percent: f64) -> f64 {
    let fraction = (humidity_percent / 100.0).max(f64::MIN_POSITIVE);
    let gamma = fraction.ln() + MAGNUS_A * temperature_c / (MAGNUS_B + temperature_c);
    MAGNUS_B * gamma / (MAGNUS_A - gamma)
}

/// A sensor device, scoped to the client (owner key) that registered it.
///
/// `name` is unique across the whole store; `requested_name` is what the
/// owner asked for and is unique per owner. They differ only when the
/// requested name was already taken by another owner and a suffix had to be
/// appended.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, sqlx::FromRow)]
pub struct Device {
    pub id: String,
    #[sqlx(rename = "device_name")]
    pub name: String,
    pub requested_name: String,
    pub location: Option<String>,
    pub owner_key: String,
}

impl Device {
    pub fn new(name: &str, location: Option<String>, owner_key: &str) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            name: name.to_string(),
            requested_name: name.to_string(),
            location,
            owner_key: owner_key.to_string(),
        }
    }

    /// Same device, renamed `<requested>-<suffix>`.
    pub fn with_suffix(&self, suffix: &str) -> Self {
        Self {
            name: format!("{}-{}", self.requested_name, suffix),
            ..self.clone()
        }
    }

    pub fn answers_to(&self, name: &str) -> bool {
        self.name.eq_ignore_ascii_case(name) || self.requested_name.eq_ignore_ascii_case(name)
    }
}

/// A single temperature/humidity sample. The owning device travels with it,
/// so ownership can be checked on a value read back from the cache.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Reading {
    pub id: String,
    pub temperature_c: f64,
    pub humidity_percent: f64,
    pub dew_point_c: f64,
    pub timestamp_ms: i64,
    pub device: Device,
}

impl Reading {
    /// Builds a fresh reading with a new id; the dew point is always derived
    /// here, never taken from the caller.
    pub fn new(
        temperature_c: f64,
        humidity_percent: f64,
        timestamp_ms: i64,
        device: Device,
    ) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            temperature_c,
            humidity_percent,
            dew_point_c: dew_point(temperature_c, humidity_percent),
            timestamp_ms,
            device,
        }
    }

    pub fn is_owned_by(&self, owner_key: &str) -> bool {
        self.device.owner_key == owner_key
    }
}

/// Request body of `POST /temperatures`. Any dew point or timestamp sent by
/// the client is ignored.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewReading {
    pub temperature_c: f64,
    pub humidity_percent: f64,
    pub device: Option<DeviceRequest>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeviceRequest {
    pub device_name: String,
    pub location: Option<String>,
}

/// One page of rows as returned by the primary store.
#[derive(Debug, Clone, PartialEq)]
pub struct Page<T> {
    pub content: Vec<T>,
    pub page: usize,
    pub size: usize,
    pub total: u64,
}

impl<T> Page<T> {
    pub fn has_next(&self) -> bool {
        let end = self.page.saturating_add(1).saturating_mul(self.size);
        (end as u64) < self.total
    }

    pub fn has_previous(&self) -> bool {
        self.page > 0
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Pager {
    pub has_next: bool,
    pub has_previous: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DeviceView {
    pub id: String,
    pub device_name: String,
    pub location: Option<String>,
}

impl From<&Device> for DeviceView {
    fn from(device: &Device) -> Self {
        Self {
            id: device.id.clone(),
            device_name: device.name.clone(),
            location: device.location.clone(),
        }
    }
}

/// Client-facing rendering of a reading; never exposes the owner key.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ReadingView {
    pub id: String,
    pub temperature_c: f64,
    pub humidity_percent: f64,
    pub dew_point: f64,
    pub timestamp: i64,
    pub device: DeviceView,
}

impl From<&Reading> for ReadingView {
    fn from(reading: &Reading) -> Self {
        Self {
            id: reading.id.clone(),
            temperature_c: reading.temperature_c,
            humidity_percent: reading.humidity_percent,
            dew_point: reading.dew_point_c,
            timestamp: reading.timestamp_ms,
            device: DeviceView::from(&reading.device),
        }
    }
}
