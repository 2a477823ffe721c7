use delta_arb::config::StrategyConfig;
use delta_arb::strategy::controller::StrategyController;
use delta_arb::strategy::execution::ExecutionBackend;
use delta_arb::strategy::market_data::MarketDataFeed;
use delta_arb::strategy::paper_backend::{PaperBackend, SimFeed};
use log::{error, info};
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

/// Cheap jitter source for the simulated quotes, in [0, 1).
fn jitter() -> f64 {
    let nanos = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.subsec_nanos())
        .unwrap_or(0);
    (nanos % 10_000) as f64 / 10_000.0
}

/// Publish a drifting book to all three venues. Venue B occasionally runs
/// rich against venue A, opening a crossable spread for the strategy to
/// take.
async fn run_quote_task(feed: Arc<SimFeed>, cfg: StrategyConfig) {
    let mut mid = 30_000.0_f64;
    loop {
        mid *= 1.0 + (jitter() - 0.5) * 0.0004;
        let edge = mid * 0.0002;
        feed.set_book(&cfg.venue_a, &cfg.symbol, mid - edge, mid + edge, 5.0);
        feed.set_book(&cfg.hedge_venue, &cfg.symbol, mid - edge, mid + edge, 10.0);

        let skew = if jitter() > 0.97 {
            1.0 + (cfg.entry_threshold_pct + 0.2) / 100.0
        } else {
            1.0 + (jitter() - 0.5) * 0.0006
        };
        let mid_b = mid * skew;
        feed.set_book(&cfg.venue_b, &cfg.symbol, mid_b - edge, mid_b + edge, 5.0);

        tokio::time::sleep(Duration::from_millis(100)).await;
    }
}

#[tokio::main]
async fn main() {
    dotenv::dotenv().ok();
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let cfg = match StrategyConfig::from_env() {
        Ok(cfg) => cfg,
        Err(e) => {
            error!("[MAIN] {}", e);
            std::process::exit(1);
        }
    };
    info!(
        "[MAIN] paper session: {} on {}/{} hedged at {}",
        cfg.symbol, cfg.venue_a, cfg.venue_b, cfg.hedge_venue
    );

    let feed = Arc::new(SimFeed::new());
    let backend: Arc<dyn ExecutionBackend> = Arc::new(PaperBackend::new(Arc::clone(&feed)));

    tokio::spawn(run_quote_task(Arc::clone(&feed), cfg.clone()));
    // First quotes land before the controller probes connectivity.
    tokio::time::sleep(Duration::from_millis(150)).await;

    let feed_dyn: Arc<dyn MarketDataFeed> = feed;
    let (controller, handle) = StrategyController::new(cfg, feed_dyn, backend);

    let stopper = handle.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("[MAIN] ctrl-c received, stopping strategy");
            stopper.request_shutdown();
        }
    });

    let report = controller.run().await;
    match serde_json::to_string_pretty(&report) {
        Ok(json) => println!("{}", json),
        Err(e) => error!("[MAIN] could not serialize session report: {}", e),
    }
}
