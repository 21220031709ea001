use chrono::{DateTime, Datelike, Local, TimeZone, Timelike};
use serde::Deserialize;

use crate::model::Reading;

/// Optional predicates of the filtered query. Every supplied field must
/// match; absent fields match everything.
///
/// Calendar fields (`year`, `month`, `day`, `hour`) are compared against the
/// reading's timestamp decomposed in the server's local time zone, not UTC.
/// `start_timestamp` and `end_timestamp` are inclusive epoch-millisecond
/// bounds and may be given independently of each other.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReadingFilter {
    pub year: Option<i32>,
    pub month: Option<u32>,
    pub day: Option<u32>,
    pub hour: Option<u32>,
    pub start_timestamp: Option<i64>,
    pub end_timestamp: Option<i64>,
    pub device_name: Option<String>,
    pub device_id: Option<String>,
    pub location: Option<String>,
}

fn local_time(timestamp_ms: i64) -> Option<DateTime<Local>> {
    Local.timestamp_millis_opt(timestamp_ms).earliest()
}

impl ReadingFilter {
    pub fn matches(&self, reading: &Reading) -> bool {
        if self.has_calendar_fields() {
            let Some(at) = local_time(reading.timestamp_ms) else {
                return false;
            };
            if self.year.is_some_and(|y| at.year() != y)
                || self.month.is_some_and(|m| at.month() != m)
                || self.day.is_some_and(|d| at.day() != d)
                || self.hour.is_some_and(|h| at.hour() != h)
            {
                return false;
            }
        }

        if self.start_timestamp.is_some_and(|start| reading.timestamp_ms < start)
            || self.end_timestamp.is_some_and(|end| reading.timestamp_ms > end)
        {
            return false;
        }

        let device = &reading.device;
        if let Some(name) = &self.device_name {
            if !device.answers_to(name) {
                return false;
            }
        }
        if let Some(id) = &self.device_id {
            if !device.id.eq_ignore_ascii_case(id) {
                return false;
            }
        }
        if let Some(location) = &self.location {
            let found = device
                .location
                .as_deref()
                .is_some_and(|l| l.eq_ignore_ascii_case(location));
            if !found {
                return false;
            }
        }

        true
    }

    fn has_calendar_fields(&self) -> bool {
        self.year.is_some() || self.month.is_some() || self.day.is_some() || self.hour.is_some()
    }

    /// `(name, value)` pairs of the supplied fields, for building links.
    pub fn query_pairs(&self) -> Vec<(&'static str, String)> {
        let mut pairs = Vec::new();
        let numbers = [
            ("year", self.year.map(i64::from)),
            ("month", self.month.map(i64::from)),
            ("day", self.day.map(i64::from)),
            ("hour", self.hour.map(i64::from)),
            ("startTimestamp", self.start_timestamp),
            ("endTimestamp", self.end_timestamp),
        ];
        for (name, value) in numbers {
            if let Some(value) = value {
                pairs.push((name, value.to_string()));
            }
        }
        let texts = [
            ("deviceName", &self.device_name),
            ("deviceId", &self.device_id),
            ("location", &self.location),
        ];
        for (name, value) in texts {
            if let Some(value) = value {
                pairs.push((name, value.clone()));
            }
        }
        pairs
    }
}
