mod reading;

use clap::Parser;
use reqwest::{Client, StatusCode};
use std::time::{Duration, Instant};
use tracing::{error, info, warn};

/// Rate-limit window of the API; after a 429 the simulator waits this long.
const RATE_LIMIT_WINDOW: Duration = Duration::from_secs(60);

#[derive(Debug, Parser)]
#[command(about = "Posts simulated temperature readings to the API")]
struct Args {
    #[arg(long, env = "BASE_URL", default_value = "http://localhost:8080")]
    base_url: String,

    #[arg(long, env = "API_KEY")]
    api_key: String,

    /// Target requests per second.
    #[arg(long, env = "RATE", default_value_t = 1)]
    rate: u64,

    #[arg(long, env = "DEVICES", default_value_t = 5)]
    devices: usize,

    /// Readings to send; 0 runs until interrupted.
    #[arg(long, env = "COUNT", default_value_t = 0)]
    count: u64,
}

#[tokio::main]
async fn main() {
    let args = Args::parse();

    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    info!("Starting temperature simulator");
    info!(
        "Target: {}, Rate: {} req/s, Devices: {}",
        args.base_url, args.rate, args.devices
    );

    let client = Client::new();
    let url = format!("{}/temperatures", args.base_url.trim_end_matches('/'));
    let interval = Duration::from_micros(1_000_000 / args.rate.max(1));
    let devices = args.devices.max(1);

    let mut rng = rand::thread_rng();
    let mut sent = 0u64;
    let mut rejected = 0u64;

    while args.count == 0 || sent < args.count {
        let started = Instant::now();
        let body = reading::generate(&mut rng, (sent as usize) % devices);

        match client
            .post(&url)
            .header("x-api-key", &args.api_key)
            .json(&body)
            .send()
            .await
        {
            Ok(response) if response.status() == StatusCode::TOO_MANY_REQUESTS => {
                rejected += 1;
                warn!(
                    "Rate limited after {} readings, pausing {:?}",
                    sent, RATE_LIMIT_WINDOW
                );
                tokio::time::sleep(RATE_LIMIT_WINDOW).await;
                continue;
            }
            Ok(response) if response.status().is_success() => {
                sent += 1;
            }
            Ok(response) => {
                let status = response.status();
                let text = response.text().await.unwrap_or_default();
                warn!("Reading rejected with {}: {}", status, text);
                // Counted so a persistent 4xx cannot loop forever.
                sent += 1;
            }
            Err(e) => {
                error!("Failed to post reading: {}", e);
                tokio::time::sleep(Duration::from_secs(1)).await;
                continue;
            }
        }

        if sent % 100 == 0 {
            info!("Posted {} readings ({} rate limited)", sent, rejected);
        }

        let elapsed = started.elapsed();
        if elapsed < interval {
            tokio::time::sleep(interval - elapsed).await;
        }
    }

    info!("Done: {} readings posted, {} rate limited", sent, rejected);
}
