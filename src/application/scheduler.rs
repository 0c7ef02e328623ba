//! Drivers that call `StrategyEngine::tick`/`backtest` at the right cadence:
//! a fixed wall-clock interval for live trading, or an enumerated simulated
//! timeframe for backtests.

use crate::application::engine::{StrategyEngine, TickOutcome};
use crate::domain::candle::CandleSource;
use crate::domain::context::ExecutionContext;
use crate::domain::errors::EngineError;
use chrono::{DateTime, Duration, Utc};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::Mutex as AsyncMutex;
use tracing::{info, warn};

/// A backtest's simulated domain: an interval and an inclusive date range.
#[derive(Debug, Clone)]
pub struct Frame {
    pub frame_name: String,
    pub interval: Duration,
    pub start_date: DateTime<Utc>,
    pub end_date: DateTime<Utc>,
}

/// Cooperative cancellation handle for a background driver. `stop()` is
/// deliberately non-blocking: the driver exits at its next safe point
/// (between ticks), never mid-tick.
pub struct DriverHandle {
    stop_flag: Arc<AtomicBool>,
    task: tokio::task::JoinHandle<()>,
}

impl DriverHandle {
    pub fn stop(&self) {
        self.stop_flag.store(true, Ordering::SeqCst);
    }

    pub async fn join(self) {
        let _ = self.task.await;
    }
}

/// Drives `tick()` at a fixed wall-clock cadence. Enforces single-flight
/// per symbol: if a prior tick is still running when the next cadence
/// fires, that cadence is skipped rather than queued.
pub struct LiveScheduler {
    engine: Arc<StrategyEngine>,
    in_flight: Arc<AsyncMutex<()>>,
}

impl LiveScheduler {
    pub fn new(engine: Arc<StrategyEngine>) -> Self {
        Self {
            engine,
            in_flight: Arc::new(AsyncMutex::new(())),
        }
    }

    /// Runs a single tick under `ExecutionContext::live(Utc::now())`. If a
    /// previous tick is still in flight, this call is a no-op returning
    /// `Ok(None)` rather than blocking — the next cadence will try again.
    pub async fn run_once(&self) -> Result<Option<TickOutcome>, EngineError> {
        let guard = match self.in_flight.clone().try_lock_owned() {
            Ok(guard) => guard,
            Err(_) => return Ok(None),
        };

        let ctx = ExecutionContext::live(Utc::now());
        let result = ExecutionContext::run(ctx, self.engine.tick()).await;
        drop(guard);
        result.map(Some)
    }

    /// Spawns a background task calling `run_once` every `cadence` until
    /// `DriverHandle::stop` is called.
    pub fn spawn_background(self: Arc<Self>, cadence: std::time::Duration) -> DriverHandle {
        let stop_flag = Arc::new(AtomicBool::new(false));
        let flag = Arc::clone(&stop_flag);
        let scheduler = Arc::clone(&self);

        let task = tokio::spawn(async move {
            let mut interval = tokio::time::interval(cadence);
            loop {
                interval.tick().await;
                if flag.load(Ordering::SeqCst) {
                    break;
                }
                if let Err(e) = scheduler.run_once().await {
                    warn!(error = %e, "live tick failed");
                }
            }
        });

        DriverHandle { stop_flag, task }
    }
}

/// Iterates a `Frame`'s simulated timeframe, invoking `tick()` per
/// timestamp and delegating to `backtest(candles)` to resolve a signal in
/// one jump as soon as it opens.
pub struct BacktestScheduler {
    engine: Arc<StrategyEngine>,
    source: CandleSource,
    symbol: String,
}

impl BacktestScheduler {
    pub fn new(engine: Arc<StrategyEngine>, source: CandleSource, symbol: impl Into<String>) -> Self {
        Self {
            engine,
            source,
            symbol: symbol.into(),
        }
    }

    /// Runs the entire frame, returning every tick-machine result produced
    /// along the way (including the terminal event for each resolved
    /// signal). The caller, not this driver, decides whether to persist or
    /// further aggregate the stream — this core only guarantees ordering.
    pub async fn run(&self, frame: &Frame) -> Result<Vec<TickOutcome>, EngineError> {
        let mut outcomes = Vec::new();
        let mut t = frame.start_date;

        while t <= frame.end_date {
            let ctx = ExecutionContext::backtest_at(t);
            let outcome = ExecutionContext::run(ctx, self.engine.tick()).await?;

            if let TickOutcome::Opened { signal } = &outcome {
                let limit = (signal.minute_estimated_time + 4) as usize;
                let candles = self
                    .source
                    .fetch_forward(&self.symbol, frame.interval, t, limit)
                    .await?;

                let resolved = self.engine.backtest(&candles).await?;
                let advance_to = match &resolved {
                    TickOutcome::Closed { at, .. } => *at,
                    TickOutcome::Cancelled { at, .. } => *at,
                    _ => t,
                };
                info!(symbol = %self.symbol, frame = %frame.frame_name, "resolved signal via backtest fast path");
                outcomes.push(resolved);
                t = advance_to + frame.interval;
                continue;
            }

            outcomes.push(outcome);
            t += frame.interval;
        }

        Ok(outcomes)
    }
}
