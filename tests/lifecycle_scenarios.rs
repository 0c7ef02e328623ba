//! Cross-module end-to-end scenarios for the signal lifecycle engine.

use async_trait::async_trait;
use chrono::{DateTime, Duration, TimeZone, Utc};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use signalcore::application::engine::{
    CancelReason, CloseReason, SignalGenerator, SignalProposal, StrategyEngine, TickOutcome,
};
use signalcore::application::persistence::{JsonFilePersistence, PersistenceAdapter};
use signalcore::domain::candle::{Candle, CandleFeed, CandleSource};
use signalcore::domain::context::ExecutionContext;
use signalcore::domain::risk::RiskProfile;
use signalcore::domain::signal::{Position, ValidatorConfig};
use signalcore::infrastructure::event_bus::EventBus;
use std::sync::Arc;

struct FlatFeed {
    price: std::sync::Mutex<Decimal>,
}

#[async_trait]
impl CandleFeed for FlatFeed {
    async fn fetch_since(
        &self,
        _symbol: &str,
        interval: Duration,
        since: DateTime<Utc>,
        limit: usize,
    ) -> anyhow::Result<Vec<Candle>> {
        let price = *self.price.lock().unwrap();
        let candles = (0..limit as i64)
            .map(|i| Candle {
                timestamp: since + interval * i as i32,
                open: price,
                high: price,
                low: price,
                close: price,
                volume: dec!(10),
            })
            .collect();
        Ok(candles)
    }
}

struct OnceGenerator {
    proposal: std::sync::Mutex<Option<SignalProposal>>,
}

#[async_trait]
impl SignalGenerator for OnceGenerator {
    async fn generate(&self, _symbol: &str) -> anyhow::Result<Option<SignalProposal>> {
        Ok(self.proposal.lock().unwrap().take())
    }
}

fn base() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap()
}

#[tokio::test]
async fn test_s2_scheduled_cancelled_by_timeout() {
    let dir = tempfile::tempdir().unwrap();
    let feed = Arc::new(FlatFeed { price: std::sync::Mutex::new(dec!(43050)) });
    let source = CandleSource::new(feed);
    let generator = Arc::new(OnceGenerator {
        proposal: std::sync::Mutex::new(Some(SignalProposal {
            position: Position::Long,
            price_open: Some(dec!(42000)),
            price_take_profit: dec!(43000),
            price_stop_loss: dec!(41000),
            minute_estimated_time: 600,
            note: None,
        })),
    });

    let engine = StrategyEngine::new(
        "BTCUSDT",
        "dual_sma",
        "binance",
        Duration::minutes(1),
        5,
        Duration::minutes(120),
        source,
        Arc::new(JsonFilePersistence::new(dir.path())),
        Arc::new(RiskProfile::new("unbounded")),
        EventBus::new(),
        generator,
        ValidatorConfig::default(),
        false,
    )
    .await
    .unwrap();

    let start = base();
    let scheduled_outcome = ExecutionContext::run(ExecutionContext::live(start), engine.tick())
        .await
        .unwrap();
    assert!(matches!(scheduled_outcome, TickOutcome::Scheduled { .. }));

    // Price never reaches priceOpen (42000) nor SL (41000), so only the
    // timeout path can resolve this — a single tick past the await window
    // suffices since the check is a direct elapsed-time comparison.
    let after_timeout = start + Duration::minutes(121);
    let outcome = ExecutionContext::run(ExecutionContext::live(after_timeout), engine.tick())
        .await
        .unwrap();

    match outcome {
        TickOutcome::Cancelled { reason, .. } => assert_eq!(reason, CancelReason::Timeout),
        other => panic!("expected Cancelled(Timeout), got {other:?}"),
    }
}

#[tokio::test]
async fn test_s4_short_stop_loss_hit() {
    let dir = tempfile::tempdir().unwrap();
    let feed = Arc::new(FlatFeed { price: std::sync::Mutex::new(dec!(42000)) });
    let source = CandleSource::new(Arc::clone(&feed));
    let generator = Arc::new(OnceGenerator {
        proposal: std::sync::Mutex::new(Some(SignalProposal {
            position: Position::Short,
            price_open: None,
            price_take_profit: dec!(41000),
            price_stop_loss: dec!(43000),
            minute_estimated_time: 600,
            note: None,
        })),
    });

    let engine = StrategyEngine::new(
        "BTCUSDT",
        "dual_sma",
        "binance",
        Duration::minutes(1),
        5,
        Duration::minutes(120),
        source,
        Arc::new(JsonFilePersistence::new(dir.path())),
        Arc::new(RiskProfile::new("unbounded")),
        EventBus::new(),
        generator,
        ValidatorConfig::default(),
        false,
    )
    .await
    .unwrap();

    let start = base();
    let opened = ExecutionContext::run(ExecutionContext::live(start), engine.tick())
        .await
        .unwrap();
    assert!(matches!(opened, TickOutcome::Opened { .. }));

    // Price rises above the short's stop-loss.
    *feed.price.lock().unwrap() = dec!(43500);
    let outcome = ExecutionContext::run(ExecutionContext::live(start + Duration::minutes(5)), engine.tick())
        .await
        .unwrap();

    match outcome {
        TickOutcome::Closed { reason, pnl_percentage, .. } => {
            assert_eq!(reason, CloseReason::StopLoss);
            assert!(pnl_percentage < Decimal::ZERO);
        }
        other => panic!("expected Closed(StopLoss), got {other:?}"),
    }
}

#[tokio::test]
async fn test_s6_crash_restart_rehydrates_pending_signal() {
    let dir = tempfile::tempdir().unwrap();
    let persistence = Arc::new(JsonFilePersistence::new(dir.path()));
    let feed = Arc::new(FlatFeed { price: std::sync::Mutex::new(dec!(42000)) });

    let start = base();
    let generator = Arc::new(OnceGenerator {
        proposal: std::sync::Mutex::new(Some(SignalProposal {
            position: Position::Long,
            price_open: None,
            price_take_profit: dec!(43000),
            price_stop_loss: dec!(41000),
            minute_estimated_time: 600,
            note: None,
        })),
    });

    let engine = StrategyEngine::new(
        "BTCUSDT",
        "dual_sma",
        "binance",
        Duration::minutes(1),
        5,
        Duration::minutes(120),
        CandleSource::new(Arc::clone(&feed)),
        Arc::clone(&persistence) as Arc<dyn PersistenceAdapter>,
        Arc::new(RiskProfile::new("unbounded")),
        EventBus::new(),
        generator,
        ValidatorConfig::default(),
        false,
    )
    .await
    .unwrap();

    let opened = ExecutionContext::run(ExecutionContext::live(start), engine.tick())
        .await
        .unwrap();
    assert!(matches!(opened, TickOutcome::Opened { .. }));

    // Simulate a crash: drop the engine entirely, losing all in-memory
    // state, and build a fresh one against the same persistence directory.
    drop(engine);

    let restarted = StrategyEngine::new(
        "BTCUSDT",
        "dual_sma",
        "binance",
        Duration::minutes(1),
        5,
        Duration::minutes(120),
        CandleSource::new(Arc::clone(&feed)),
        Arc::clone(&persistence) as Arc<dyn PersistenceAdapter>,
        Arc::new(RiskProfile::new("unbounded")),
        EventBus::new(),
        Arc::new(OnceGenerator { proposal: std::sync::Mutex::new(None) }),
        ValidatorConfig::default(),
        true, // rehydrate
    )
    .await
    .unwrap();

    // Price reaches take-profit; the rehydrated pending signal must still
    // be monitored and close normally.
    *feed.price.lock().unwrap() = dec!(43500);
    let outcome = ExecutionContext::run(ExecutionContext::live(start + Duration::minutes(5)), restarted.tick())
        .await
        .unwrap();

    match outcome {
        TickOutcome::Closed { reason, .. } => assert_eq!(reason, CloseReason::TakeProfit),
        other => panic!("expected Closed(TakeProfit) after rehydration, got {other:?}"),
    }
}
