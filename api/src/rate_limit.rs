use crate::metrics::RATE_LIMITED_TOTAL;
use axum::{
    extract::{ConnectInfo, Request, State},
    http::{HeaderMap, StatusCode},
    middleware::Next,
    response::{IntoResponse, Response},
};
use dashmap::DashMap;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::time::interval;
use tracing::{debug, info, warn};

pub const MAX_REQUESTS_PER_WINDOW: u64 = 100;
pub const WINDOW: Duration = Duration::from_secs(60);

#[derive(Debug, Clone, Copy)]
struct Counter {
    count: u64,
    expires_at: Instant,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Admission {
    Admitted { count: u64 },
    Rejected { count: u64 },
}

/// Per-client request counter.
///
/// A counter is created by the first request of a window and dies exactly
/// `WINDOW` after that, however busy the client is in between; the next
/// request then starts again from one. Expired counters are reset when
/// touched and dropped by `sweep`, so idle clients do not accumulate.
#[derive(Debug)]
pub struct RateLimiter {
    counters: DashMap<String, Counter>,
    limit: u64,
    window: Duration,
}

impl Default for RateLimiter {
    fn default() -> Self {
        Self::new()
    }
}

impl RateLimiter {
    pub fn new() -> Self {
        Self {
            counters: DashMap::new(),
            limit: MAX_REQUESTS_PER_WINDOW,
            window: WINDOW,
        }
    }

    pub fn admit(&self, identity: &str) -> Admission {
        self.admit_at(identity, Instant::now())
    }

    /// Counts the request even when it ends up rejected.
    pub fn admit_at(&self, identity: &str, now: Instant) -> Admission {
        let count = {
            let mut counter = self
                .counters
                .entry(identity.to_owned())
                .or_insert_with(|| Counter {
                    count: 0,
                    expires_at: now + self.window,
                });
            if counter.expires_at <= now {
                *counter = Counter {
                    count: 0,
                    expires_at: now + self.window,
                };
            }
            counter.count += 1;
            counter.count
        };

        if count > self.limit {
            Admission::Rejected { count }
        } else {
            Admission::Admitted { count }
        }
    }

    /// Drops every counter whose window has closed; returns how many went.
    pub fn sweep_at(&self, now: Instant) -> usize {
        let before = self.counters.len();
        self.counters.retain(|_, counter| counter.expires_at > now);
        before.saturating_sub(self.counters.len())
    }

    pub fn tracked(&self) -> usize {
        self.counters.len()
    }
}

pub async fn run_sweeper(limiter: Arc<RateLimiter>, period: Duration) {
    info!("Starting rate-limit sweeper every {:?}", period);
    let mut ticker = interval(period);

    loop {
        ticker.tick().await;
        let removed = limiter.sweep_at(tokio::time::Instant::now().into_std());
        if removed > 0 {
            debug!(
                "Swept {} expired rate-limit counters, {} tracked",
                removed,
                limiter.tracked()
            );
        }
    }
}

/// First `X-Forwarded-For` entry if present, else the peer address.
pub fn client_identity(headers: &HeaderMap, peer: Option<SocketAddr>) -> String {
    let forwarded = headers
        .get("x-forwarded-for")
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.split(',').next())
        .map(str::trim)
        .filter(|first| !first.is_empty());

    match (forwarded, peer) {
        (Some(first), _) => first.to_string(),
        (None, Some(addr)) => addr.ip().to_string(),
        (None, None) => "unknown".to_string(),
    }
}

pub async fn rate_limit_middleware(
    State(limiter): State<Arc<RateLimiter>>,
    request: Request,
    next: Next,
) -> Response {
    let peer = request
        .extensions()
        .get::<ConnectInfo<SocketAddr>>()
        .map(|ConnectInfo(addr)| *addr);
    let identity = client_identity(request.headers(), peer);

    match limiter.admit(&identity) {
        Admission::Admitted { .. } => next.run(request).await,
        Admission::Rejected { count } => {
            RATE_LIMITED_TOTAL.inc();
            warn!(client = %identity, count, "Rate limit exceeded");
            (StatusCode::TOO_MANY_REQUESTS, "Too many requests").into_response()
        }
    }
}
