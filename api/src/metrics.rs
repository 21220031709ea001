use lazy_static::lazy_static;
use prometheus::{Counter, Encoder, HistogramOpts, HistogramVec, Opts, Registry, TextEncoder};

lazy_static! {
    pub static ref REGISTRY: Registry = Registry::new();
    pub static ref RATE_LIMITED_TOTAL: Counter = Counter::with_opts(Opts::new(
        "temperature_api_rate_limited_total",
        "Total requests rejected by the rate limiter"
    ))
    .unwrap();
    pub static ref CACHE_HITS_TOTAL: Counter = Counter::with_opts(Opts::new(
        "temperature_api_cache_hits_total",
        "Total cache lookups answered from the cache"
    ))
    .unwrap();
    pub static ref CACHE_MISSES_TOTAL: Counter = Counter::with_opts(Opts::new(
        "temperature_api_cache_misses_total",
        "Total cache lookups that fell through to the primary store"
    ))
    .unwrap();
    pub static ref CACHE_UNAVAILABLE_TOTAL: Counter = Counter::with_opts(Opts::new(
        "temperature_api_cache_unavailable_total",
        "Total cache operations that failed at the transport level"
    ))
    .unwrap();
    pub static ref CACHE_POPULATE_FAILURES_TOTAL: Counter = Counter::with_opts(Opts::new(
        "temperature_api_cache_populate_failures_total",
        "Total cache writes dropped after a successful store operation"
    ))
    .unwrap();
    pub static ref DB_FAILURES_TOTAL: Counter = Counter::with_opts(Opts::new(
        "temperature_api_db_failures_total",
        "Total primary store operations that failed"
    ))
    .unwrap();
    pub static ref QUERY_LATENCY_SECONDS: HistogramVec = HistogramVec::new(
        HistogramOpts::new(
            "temperature_api_query_latency_seconds",
            "Time taken to answer a read query"
        )
        .buckets(vec![
            0.001, 0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0
        ]),
        &["operation"]
    )
    .unwrap();
}

pub fn init_metrics() {
    REGISTRY
        .register(Box::new(RATE_LIMITED_TOTAL.clone()))
        .unwrap();
    REGISTRY.register(Box::new(CACHE_HITS_TOTAL.clone())).unwrap();
    REGISTRY
        .register(Box::new(CACHE_MISSES_TOTAL.clone()))
        .unwrap();
    REGISTRY
        .register(Box::new(CACHE_UNAVAILABLE_TOTAL.clone()))
        .unwrap();
    REGISTRY
        .register(Box::new(CACHE_POPULATE_FAILURES_TOTAL.clone()))
        .unwrap();
    REGISTRY
        .register(Box::new(DB_FAILURES_TOTAL.clone()))
        .unwrap();
    REGISTRY
        .register(Box::new(QUERY_LATENCY_SECONDS.clone()))
        .unwrap();
}

pub fn gather_metrics() -> String {
    let encoder = TextEncoder::new();
    let metric_families = REGISTRY.gather();
    let mut buffer = Vec::new();
    encoder.encode(&metric_families, &mut buffer).unwrap();
    String::from_utf8(buffer).unwrap()
}
