//! Headless demo binary wiring the signal lifecycle engine to a single
//! (symbol, strategy) live driver. Not part of the tested contract — a
//! manual smoke-testing entry point, grounded on the teacher's
//! `src/bin/server.rs` startup sequence (dotenv, `tracing_subscriber` with
//! `EnvFilter`, structured startup logs).

use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use rust_decimal::Decimal;
use signalcore::application::engine::{SignalGenerator, SignalProposal, StrategyEngine};
use signalcore::application::persistence::JsonFilePersistence;
use signalcore::application::scheduler::LiveScheduler;
use signalcore::config::EngineConfig;
use signalcore::domain::candle::{Candle, CandleFeed, CandleSource};
use signalcore::domain::risk::RiskProfile;
use signalcore::domain::signal::ValidatorConfig;
use signalcore::infrastructure::event_bus::EventBus;
use std::sync::Arc;
use tracing::{info, Level};
use tracing_subscriber::prelude::*;

/// Placeholder adapter: the real exchange/feed integration is outside this
/// core's scope, so the demo binary runs against a flat, deterministic
/// feed solely to exercise the wiring end-to-end.
struct DemoFeed;

#[async_trait]
impl CandleFeed for DemoFeed {
    async fn fetch_since(
        &self,
        _symbol: &str,
        interval: Duration,
        since: DateTime<Utc>,
        limit: usize,
    ) -> Result<Vec<Candle>> {
        let candles = (0..limit as i64)
            .map(|i| Candle {
                timestamp: since + interval * i as i32,
                open: Decimal::from(42000),
                high: Decimal::from(42000),
                low: Decimal::from(42000),
                close: Decimal::from(42000),
                volume: Decimal::from(1),
            })
            .collect();
        Ok(candles)
    }
}

/// A strategy that never proposes a signal; wiring proof only.
struct NoopGenerator;

#[async_trait]
impl SignalGenerator for NoopGenerator {
    async fn generate(&self, _symbol: &str) -> Result<Option<SignalProposal>> {
        Ok(None)
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();

    let stdout_layer = tracing_subscriber::fmt::layer().with_target(false);
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::from_default_env().add_directive(Level::INFO.into()))
        .with(stdout_layer)
        .init();

    info!("signalcore server {} starting", env!("CARGO_PKG_VERSION"));

    let config = EngineConfig::from_env();
    info!(dump_dir = %config.dump_dir, "configuration loaded");

    let source = CandleSource::new(Arc::new(DemoFeed));
    let persistence = Arc::new(JsonFilePersistence::new(&config.dump_dir));
    let risk = Arc::new(RiskProfile::new("default"));
    let bus = EventBus::new();

    let engine = Arc::new(
        StrategyEngine::new(
            "BTCUSDT",
            "demo-strategy",
            "demo-exchange",
            Duration::minutes(1),
            config.avg_price_candles_count,
            Duration::from_std(config.schedule_await)?,
            source,
            persistence,
            risk,
            bus,
            Arc::new(NoopGenerator),
            ValidatorConfig::default(),
            true,
        )
        .await?,
    );

    let scheduler = Arc::new(LiveScheduler::new(engine));
    let outcome = scheduler.run_once().await?;
    info!(?outcome, "ran one live tick");

    Ok(())
}
