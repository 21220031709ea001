//! Canonical cache keys for read queries.
//!
//! A key is the namespace, the query kind, then every parameter the kind
//! recognises as `name::value` pairs in a fixed order, all joined by `::`:
//!
//! ```text
//! temperatures::point::id::3f2a...
//! temperatures::page::page::0::size::10
//! temperatures::filtered::year::2024::month::-1::...::location::null::page::0::size::10
//! ```
//!
//! An absent number is written as `-1` and an absent string as `null`, so a
//! parameter that is absent and one that is literally `-1` (or the string
//! `"null"`) produce the same key. This collision is accepted: neither value
//! is meaningful as a filter. Text values have `%` and `:` percent-escaped so
//! they cannot fake a separator.

use crate::filter::ReadingFilter;

pub const NAMESPACE: &str = "temperatures";
const SEPARATOR: &str = "::";
const ABSENT_NUMBER: i64 = -1;
const ABSENT_TEXT: &str = "null";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QueryKind {
    Point,
    Page,
    Filtered,
}

impl QueryKind {
    fn segment(self) -> &'static str {
        match self {
            QueryKind::Point => "point",
            QueryKind::Page => "page",
            QueryKind::Filtered => "filtered",
        }
    }
}

/// Parameters of one cacheable query.
#[derive(Debug, Clone, Copy)]
pub enum KeyParams<'a> {
    Point {
        id: &'a str,
    },
    Page {
        page: usize,
        size: usize,
    },
    Filtered {
        filter: &'a ReadingFilter,
        page: usize,
        size: usize,
    },
}

impl KeyParams<'_> {
    pub fn kind(&self) -> QueryKind {
        match self {
            KeyParams::Point { .. } => QueryKind::Point,
            KeyParams::Page { .. } => QueryKind::Page,
            KeyParams::Filtered { .. } => QueryKind::Filtered,
        }
    }
}

struct KeyWriter {
    key: String,
}

impl KeyWriter {
    fn new(kind: QueryKind) -> Self {
        let mut key = String::with_capacity(64);
        key.push_str(NAMESPACE);
        key.push_str(SEPARATOR);
        key.push_str(kind.segment());
        Self { key }
    }

    fn raw(&mut self, name: &str, value: &str) {
        self.key.push_str(SEPARATOR);
        self.key.push_str(name);
        self.key.push_str(SEPARATOR);
        self.key.push_str(value);
    }

    fn number(&mut self, name: &str, value: Option<i64>) {
        self.raw(name, &value.unwrap_or(ABSENT_NUMBER).to_string());
    }

    fn text(&mut self, name: &str, value: Option<&str>) {
        match value {
            Some(value) => self.raw(name, &escape(value)),
            None => self.raw(name, ABSENT_TEXT),
        }
    }

    fn finish(self) -> String {
        self.key
    }
}

fn escape(value: &str) -> String {
    value.replace('%', "%25").replace(':', "%3A")
}

/// Builds the cache key for a query. Pure: equal parameters always give the
/// same key, whatever order they arrived in.
pub fn build_key(params: &KeyParams<'_>) -> String {
    let mut writer = KeyWriter::new(params.kind());
    match *params {
        KeyParams::Point { id } => writer.text("id", Some(id)),
        KeyParams::Page { page, size } => {
            writer.number("page", Some(page as i64));
            writer.number("size", Some(size as i64));
        }
        KeyParams::Filtered { filter, page, size } => {
            writer.number("year", filter.year.map(i64::from));
            writer.number("month", filter.month.map(i64::from));
            writer.number("day", filter.day.map(i64::from));
            writer.number("hour", filter.hour.map(i64::from));
            writer.number("startTimestamp", filter.start_timestamp);
            writer.number("endTimestamp", filter.end_timestamp);
            writer.text("deviceName", filter.device_name.as_deref());
            writer.text("deviceId", filter.device_id.as_deref());
            writer.text("location", filter.location.as_deref());
            writer.number("page", Some(page as i64));
            writer.number("size", Some(size as i64));
        }
    }
    writer.finish()
}

pub fn point_key(id: &str) -> String {
    build_key(&KeyParams::Point { id })
}

pub fn page_key(page: usize, size: usize) -> String {
    build_key(&KeyParams::Page { page, size })
}

pub fn filtered_key(filter: &ReadingFilter, page: usize, size: usize) -> String {
    build_key(&KeyParams::Filtered { filter, page, size })
}
