use crate::errors::{Error, Result};
use crate::model::{DeviceRequest, NewReading};

const TEMP_MIN: f64 = -50.0;
const TEMP_MAX: f64 = 100.0;
const HUMIDITY_MIN: f64 = 0.0;
const HUMIDITY_MAX: f64 = 100.0;
pub const DEFAULT_PAGE_SIZE: usize = 10;
pub const MAX_PAGE_SIZE: usize = 1000;

/// Validates a reading submitted for creation and hands back its device.
pub fn validate(reading: &NewReading) -> Result<&DeviceRequest> {
    let device = reading
        .device
        .as_ref()
        .ok_or_else(|| Error::Validation("Device is required in the request body".to_string()))?;

    if device.device_name.trim().is_empty() {
        return Err(Error::Validation("Device name cannot be empty".to_string()));
    }

    // Validate temperature
    if !(TEMP_MIN..=TEMP_MAX).contains(&reading.temperature_c) {
        return Err(Error::Validation(format!(
            "Temperature {} out of range [{}, {}]",
            reading.temperature_c, TEMP_MIN, TEMP_MAX
        )));
    }

    // Validate humidity
    if !(HUMIDITY_MIN..=HUMIDITY_MAX).contains(&reading.humidity_percent) {
        return Err(Error::Validation(format!(
            "Humidity {} out of range [{}, {}]",
            reading.humidity_percent, HUMIDITY_MIN, HUMIDITY_MAX
        )));
    }

    Ok(device)
}

/// Resolves optional page/size query values, capping the size.
///
/// The end offset of the requested page must fit in a signed 64-bit
/// offset, so page arithmetic downstream cannot overflow.
pub fn page_params(page: Option<usize>, size: Option<usize>) -> Result<(usize, usize)> {
    let size = size.unwrap_or(DEFAULT_PAGE_SIZE);
    if size == 0 {
        return Err(Error::Validation("Page size must be at least 1".to_string()));
    }
    let size = size.min(MAX_PAGE_SIZE);
    let page = page.unwrap_or(0);

    let end = page
        .checked_add(1)
        .and_then(|next| next.checked_mul(size))
        .and_then(|end| i64::try_from(end).ok());
    if end.is_none() {
        return Err(Error::Validation(format!("Page {} is out of range", page)));
    }
    Ok((page, size))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn reading(temperature_c: f64, humidity_percent: f64, device_name: Option<&str>) -> NewReading {
        NewReading {
            temperature_c,
            humidity_percent,
            device: device_name.map(|name| DeviceRequest {
                device_name: name.to_string(),
                location: None,
            }),
        }
    }

    #[test]
    fn test_valid_reading() {
        let body = reading(25.0, 60.0, Some("dev-1"));
        let device = validate(&body).unwrap();
        assert_eq!(device.device_name, "dev-1");
    }

    #[test]
    fn test_missing_device() {
        let err = validate(&reading(25.0, 60.0, None)).unwrap_err();
        assert!(matches!(err, Error::Validation(msg) if msg.contains("Device is required")));
    }

    #[test]
    fn test_empty_device_name() {
        assert!(validate(&reading(25.0, 60.0, Some("  "))).is_err());
    }

    #[test]
    fn test_invalid_temperature() {
        assert!(validate(&reading(150.0, 60.0, Some("dev-1"))).is_err());
    }

    #[test]
    fn test_invalid_humidity() {
        assert!(validate(&reading(25.0, 150.0, Some("dev-1"))).is_err());
        assert!(validate(&reading(25.0, -1.0, Some("dev-1"))).is_err());
    }

    #[test]
    fn test_humidity_bounds_inclusive() {
        assert!(validate(&reading(25.0, 0.0, Some("dev-1"))).is_ok());
        assert!(validate(&reading(25.0, 100.0, Some("dev-1"))).is_ok());
    }

    #[test]
    fn test_page_params() {
        assert_eq!(page_params(None, None).unwrap(), (0, DEFAULT_PAGE_SIZE));
        assert_eq!(page_params(Some(3), Some(5)).unwrap(), (3, 5));
        assert_eq!(page_params(None, Some(5000)).unwrap(), (0, MAX_PAGE_SIZE));
        assert!(page_params(None, Some(0)).is_err());
    }

    #[test]
    fn test_page_beyond_offset_range() {
        assert!(matches!(
            page_params(Some(usize::MAX), Some(10)),
            Err(Error::Validation(_))
        ));
        assert!(page_params(Some(usize::MAX / 2), Some(4)).is_err());

        let last = i64::MAX as usize / 10 - 1;
        assert_eq!(page_params(Some(last), Some(10)).unwrap(), (last, 10));
    }
}
