pub mod auth;
pub mod cache;
pub mod cache_keys;
pub mod config;
pub mod db;
pub mod errors;
pub mod filter;
pub mod metrics;
pub mod model;
pub mod query;
pub mod rate_limit;
pub mod rest;
pub mod stats;
pub mod store;
pub mod validate;
pub mod write;

#[cfg(test)]
mod test_support;
