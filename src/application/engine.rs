//! `StrategyEngine` — the per-(symbol, strategy) state machine: idle ↔
//! scheduled → opened → active → closed/cancelled, driven identically by
//! `tick()` (live) or `backtest(candles)` (fast-path replay).

use crate::application::milestones::{MilestoneEvent, MilestoneTracker, ProgressDistances};
use crate::application::persistence::{PersistedSignal, PersistenceAdapter, SignalState};
use crate::domain::average_price::{current_price, vwap};
use crate::domain::candle::{Candle, CandleSource};
use crate::domain::context::ExecutionContext;
use crate::domain::errors::EngineError;
use crate::domain::risk::RiskProfile;
use crate::domain::signal::{validate, Position, Signal, ValidationMode, ValidatorConfig};
use crate::infrastructure::event_bus::{Event, EventBus, Topic};
use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use rust_decimal::Decimal;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{error, info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CloseReason {
    TakeProfit,
    StopLoss,
    TimeExpired,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CancelReason {
    Timeout,
    StopLoss,
}

/// The state machine's result, a discriminated union rather than a set of
/// boolean flags — every call site matches exhaustively.
#[derive(Debug, Clone)]
pub enum TickOutcome {
    Idle,
    Scheduled { signal: Signal },
    Opened { signal: Signal },
    Active { signal: Signal, price: Decimal },
    Closed {
        signal: Signal,
        reason: CloseReason,
        pnl_percentage: Decimal,
        at: DateTime<Utc>,
    },
    Cancelled {
        signal: Signal,
        reason: CancelReason,
        at: DateTime<Utc>,
    },
}

/// A user strategy's proposal. `price_open: None` means "enter immediately
/// at the current VWAP"; `Some(price)` schedules the signal to wait for the
/// market to reach it.
#[derive(Debug, Clone)]
pub struct SignalProposal {
    pub position: Position,
    pub price_open: Option<Decimal>,
    pub price_take_profit: Decimal,
    pub price_stop_loss: Decimal,
    pub minute_estimated_time: i64,
    pub note: Option<String>,
}

/// The user-supplied strategy callback. Errors are caught by the engine and
/// surfaced on `Topic::Error` — they never propagate out of `tick()`.
#[async_trait]
pub trait SignalGenerator: Send + Sync {
    async fn generate(&self, symbol: &str) -> anyhow::Result<Option<SignalProposal>>;
}

struct EngineState {
    stopped: bool,
    pending: Option<Signal>,
    scheduled: Option<Signal>,
    last_signal_at: Option<DateTime<Utc>>,
    milestones: Option<MilestoneTracker>,
}

pub struct StrategyEngine {
    symbol: String,
    strategy_name: String,
    exchange_name: String,
    interval: Duration,
    avg_price_candles_count: usize,
    schedule_await: Duration,
    source: CandleSource,
    persistence: Arc<dyn PersistenceAdapter>,
    risk: Arc<RiskProfile>,
    bus: EventBus,
    generator: Arc<dyn SignalGenerator>,
    validator_config: ValidatorConfig,
    state: Mutex<EngineState>,
}

impl StrategyEngine {
    #[allow(clippy::too_many_arguments)]
    pub async fn new(
        symbol: impl Into<String>,
        strategy_name: impl Into<String>,
        exchange_name: impl Into<String>,
        interval: Duration,
        avg_price_candles_count: usize,
        schedule_await: Duration,
        source: CandleSource,
        persistence: Arc<dyn PersistenceAdapter>,
        risk: Arc<RiskProfile>,
        bus: EventBus,
        generator: Arc<dyn SignalGenerator>,
        validator_config: ValidatorConfig,
        rehydrate: bool,
    ) -> Result<Self, EngineError> {
        let symbol = symbol.into();
        let strategy_name = strategy_name.into();

        let mut pending = None;
        let mut milestones = None;
        if rehydrate {
            if let Some(persisted) = persistence.load(&symbol, &strategy_name).await? {
                if persisted.state == SignalState::Pending {
                    info!(symbol = %symbol, strategy_name = %strategy_name, "rehydrated pending signal from persistence");
                    milestones = Some(MilestoneTracker::new(ProgressDistances::from_signal(
                        persisted.signal.position,
                        persisted.signal.price_open,
                        persisted.signal.price_take_profit,
                        persisted.signal.price_stop_loss,
                    )));
                    let signal = persisted.signal.clone();
                    pending = Some(persisted.signal);
                    bus.publish(Topic::ActivePing, Event::Signal(signal)).await;
                }
            }
        }

        Ok(Self {
            symbol,
            strategy_name,
            exchange_name: exchange_name.into(),
            interval,
            avg_price_candles_count,
            schedule_await,
            source,
            persistence,
            risk,
            bus,
            generator,
            validator_config,
            state: Mutex::new(EngineState {
                stopped: false,
                pending,
                scheduled: None,
                last_signal_at: None,
                milestones,
            }),
        })
    }

    pub async fn stop(&self) {
        self.state.lock().await.stopped = true;
    }

    /// One step of the state machine at the ambient `ExecutionContext`.
    pub async fn tick(&self) -> Result<TickOutcome, EngineError> {
        let ctx = ExecutionContext::current()?;
        let mut state = self.state.lock().await;

        if let Some(scheduled) = state.scheduled.clone() {
            return self.tick_scheduled(&mut state, scheduled, ctx.when, ctx.backtest).await;
        }

        if state.pending.is_none() && !state.stopped {
            if let Some(outcome) = self.tick_generate(&mut state, ctx.when, ctx.backtest).await? {
                return Ok(outcome);
            }
        }

        if let Some(pending) = state.pending.clone() {
            return self.tick_pending(&mut state, pending, ctx.when, ctx.backtest).await;
        }

        Ok(TickOutcome::Idle)
    }

    async fn tick_scheduled(
        &self,
        state: &mut EngineState,
        scheduled: Signal,
        when: DateTime<Utc>,
        backtest: bool,
    ) -> Result<TickOutcome, EngineError> {
        let vwap_price = current_price(&self.source, &self.symbol, self.interval, self.avg_price_candles_count).await?;

        if when - scheduled.timestamp >= self.schedule_await {
            state.scheduled = None;
            info!(symbol = %self.symbol, strategy_name = %self.strategy_name, "scheduled signal timed out");
            self.bus
                .publish(Topic::Signal, Event::Done { symbol: self.symbol.clone(), strategy_name: self.strategy_name.clone() })
                .await;
            return Ok(TickOutcome::Cancelled { signal: scheduled, reason: CancelReason::Timeout, at: when });
        }

        let (activate, cancel) = match scheduled.position {
            Position::Long => (vwap_price <= scheduled.price_open, vwap_price <= scheduled.price_stop_loss),
            Position::Short => (vwap_price >= scheduled.price_open, vwap_price >= scheduled.price_stop_loss),
        };

        // Cancellation takes priority over activation in the same tick.
        if cancel {
            state.scheduled = None;
            self.bus
                .publish(Topic::Signal, Event::Done { symbol: self.symbol.clone(), strategy_name: self.strategy_name.clone() })
                .await;
            return Ok(TickOutcome::Cancelled { signal: scheduled, reason: CancelReason::StopLoss, at: when });
        }

        if activate {
            let mut activated = scheduled;
            activated.timestamp = when;
            state.milestones = Some(MilestoneTracker::new(ProgressDistances::from_signal(
                activated.position,
                activated.price_open,
                activated.price_take_profit,
                activated.price_stop_loss,
            )));
            state.scheduled = None;
            state.pending = Some(activated.clone());
            self.risk.add_signal(&activated.symbol);

            if !backtest {
                self.persistence
                    .save(&self.symbol, &self.strategy_name, &PersistedSignal { state: SignalState::Pending, signal: activated.clone() })
                    .await?;
            }

            info!(symbol = %self.symbol, strategy_name = %self.strategy_name, "signal activated");
            self.bus.publish(Topic::Signal, Event::Signal(activated.clone())).await;
            return Ok(TickOutcome::Opened { signal: activated });
        }

        self.bus
            .publish(Topic::SchedulePing, Event::Ping { symbol: self.symbol.clone(), strategy_name: self.strategy_name.clone(), price: vwap_price, at: when })
            .await;
        Ok(TickOutcome::Active { signal: scheduled, price: vwap_price })
    }

    async fn tick_generate(
        &self,
        state: &mut EngineState,
        when: DateTime<Utc>,
        backtest: bool,
    ) -> Result<Option<TickOutcome>, EngineError> {
        if let Some(last) = state.last_signal_at {
            if when - last < self.interval {
                return Ok(None);
            }
        }

        let proposal = match self.generator.generate(&self.symbol).await {
            Ok(Some(proposal)) => proposal,
            Ok(None) => return Ok(None),
            Err(e) => {
                error!(symbol = %self.symbol, error = %e, "getSignal failed");
                self.bus.publish(Topic::Error, Event::Error { message: e.to_string() }).await;
                return Ok(Some(TickOutcome::Idle));
            }
        };

        state.last_signal_at = Some(when);

        if let Some(price_open) = proposal.price_open {
            let signal = Signal::new(
                &self.symbol,
                &self.strategy_name,
                &self.exchange_name,
                proposal.position,
                price_open,
                proposal.price_take_profit,
                proposal.price_stop_loss,
                proposal.minute_estimated_time,
                when,
                proposal.note,
            );

            if let Err(e) = validate(&signal, ValidationMode::Scheduled, None, &self.validator_config) {
                warn!(symbol = %self.symbol, error = %e, "proposed scheduled signal rejected by validator");
                self.bus.publish(Topic::Error, Event::Error { message: e.to_string() }).await;
                return Ok(Some(TickOutcome::Idle));
            }

            state.scheduled = Some(signal.clone());
            self.bus.publish(Topic::Signal, Event::Signal(signal.clone())).await;
            return Ok(Some(TickOutcome::Scheduled { signal }));
        }

        let vwap_price = current_price(&self.source, &self.symbol, self.interval, self.avg_price_candles_count).await?;
        let signal = Signal::new(
            &self.symbol,
            &self.strategy_name,
            &self.exchange_name,
            proposal.position,
            vwap_price,
            proposal.price_take_profit,
            proposal.price_stop_loss,
            proposal.minute_estimated_time,
            when,
            proposal.note,
        );

        if let Err(reason) = self.risk.check_signal(&signal) {
            self.bus
                .publish(Topic::Risk, Event::RiskRejected { symbol: self.symbol.clone(), strategy_name: self.strategy_name.clone(), reason })
                .await;
            return Ok(Some(TickOutcome::Idle));
        }

        if let Err(e) = validate(&signal, ValidationMode::Immediate, Some(vwap_price), &self.validator_config) {
            warn!(symbol = %self.symbol, error = %e, "proposed immediate signal rejected by validator");
            self.bus.publish(Topic::Error, Event::Error { message: e.to_string() }).await;
            return Ok(Some(TickOutcome::Idle));
        }

        state.milestones = Some(MilestoneTracker::new(ProgressDistances::from_signal(
            signal.position,
            signal.price_open,
            signal.price_take_profit,
            signal.price_stop_loss,
        )));
        state.pending = Some(signal.clone());
        self.risk.add_signal(&signal.symbol);

        if !backtest {
            self.persistence
                .save(&self.symbol, &self.strategy_name, &PersistedSignal { state: SignalState::Pending, signal: signal.clone() })
                .await?;
        }

        info!(symbol = %self.symbol, strategy_name = %self.strategy_name, "signal opened immediately");
        self.bus.publish(Topic::Signal, Event::Signal(signal.clone())).await;
        Ok(Some(TickOutcome::Opened { signal }))
    }

    async fn tick_pending(
        &self,
        state: &mut EngineState,
        pending: Signal,
        when: DateTime<Utc>,
        backtest: bool,
    ) -> Result<TickOutcome, EngineError> {
        let vwap_price = current_price(&self.source, &self.symbol, self.interval, self.avg_price_candles_count).await?;
        let pnl = pending.pnl_percentage(vwap_price);

        let lifetime = Duration::minutes(pending.minute_estimated_time);
        let close_reason = if when - pending.timestamp >= lifetime {
            Some(CloseReason::TimeExpired)
        } else {
            match pending.position {
                Position::Long => {
                    if vwap_price >= pending.price_take_profit {
                        Some(CloseReason::TakeProfit)
                    } else if vwap_price <= pending.price_stop_loss {
                        Some(CloseReason::StopLoss)
                    } else {
                        None
                    }
                }
                Position::Short => {
                    if vwap_price <= pending.price_take_profit {
                        Some(CloseReason::TakeProfit)
                    } else if vwap_price >= pending.price_stop_loss {
                        Some(CloseReason::StopLoss)
                    } else {
                        None
                    }
                }
            }
        };

        if let Some(reason) = close_reason {
            state.pending = None;
            state.milestones = None;
            self.risk.remove_signal(&pending.symbol);

            if !backtest {
                self.persistence.clear(&self.symbol, &self.strategy_name).await?;
            }

            let topic = if backtest { Topic::DoneBacktest } else { Topic::DoneLive };
            info!(symbol = %self.symbol, strategy_name = %self.strategy_name, ?reason, %pnl, "signal closed");
            self.bus
                .publish(topic, Event::Done { symbol: self.symbol.clone(), strategy_name: self.strategy_name.clone() })
                .await;
            return Ok(TickOutcome::Closed { signal: pending, reason, pnl_percentage: pnl, at: when });
        }

        self.emit_milestones(state, pnl).await;

        self.bus
            .publish(Topic::ActivePing, Event::Ping { symbol: self.symbol.clone(), strategy_name: self.strategy_name.clone(), price: vwap_price, at: when })
            .await;
        Ok(TickOutcome::Active { signal: pending, price: vwap_price })
    }

    async fn emit_milestones(&self, state: &mut EngineState, pnl_percentage: Decimal) {
        let Some(tracker) = state.milestones.as_mut() else {
            return;
        };
        for event in tracker.evaluate(pnl_percentage) {
            match event {
                MilestoneEvent::Breakeven => {
                    self.bus
                        .publish(Topic::BreakevenAvailable, Event::Milestone { symbol: self.symbol.clone(), strategy_name: self.strategy_name.clone(), percent: 0 })
                        .await;
                }
                MilestoneEvent::PartialProfit(percent) => {
                    self.bus
                        .publish(Topic::PartialProfitAvailable, Event::Milestone { symbol: self.symbol.clone(), strategy_name: self.strategy_name.clone(), percent })
                        .await;
                }
                MilestoneEvent::PartialLoss(percent) => {
                    self.bus
                        .publish(Topic::PartialLossAvailable, Event::Milestone { symbol: self.symbol.clone(), strategy_name: self.strategy_name.clone(), percent })
                        .await;
                }
            }
        }
    }

    /// Fast-path replay over a candle slice, resolving a scheduled and/or
    /// pending signal in one call instead of one tick per candle. Never
    /// touches persistence — backtests are purely in-memory.
    pub async fn backtest(&self, candles: &[Candle]) -> Result<TickOutcome, EngineError> {
        if candles.is_empty() {
            return Err(EngineError::NoData {
                symbol: self.symbol.clone(),
                interval: format!("{}", self.interval),
                reason: "backtest called with an empty candle slice".to_string(),
            });
        }

        let mut state = self.state.lock().await;
        let mut start_index = 0usize;

        if let Some(scheduled) = state.scheduled.clone() {
            let mut outcome = None;
            for (i, candle) in candles.iter().enumerate() {
                let cancel = match scheduled.position {
                    Position::Long => candle.low <= scheduled.price_stop_loss,
                    Position::Short => candle.high >= scheduled.price_stop_loss,
                };
                let activate = match scheduled.position {
                    Position::Long => candle.low <= scheduled.price_open,
                    Position::Short => candle.high >= scheduled.price_open,
                };

                if cancel {
                    state.scheduled = None;
                    outcome = Some(TickOutcome::Cancelled { signal: scheduled.clone(), reason: CancelReason::StopLoss, at: candle.timestamp });
                    break;
                }
                if activate {
                    let mut activated = scheduled.clone();
                    activated.timestamp = candle.timestamp;
                    state.milestones = Some(MilestoneTracker::new(ProgressDistances::from_signal(
                        activated.position,
                        activated.price_open,
                        activated.price_take_profit,
                        activated.price_stop_loss,
                    )));
                    state.scheduled = None;
                    state.pending = Some(activated.clone());
                    self.risk.add_signal(&activated.symbol);
                    start_index = i + 1;
                    outcome = Some(TickOutcome::Opened { signal: activated });
                    break;
                }
            }

            match outcome {
                Some(TickOutcome::Opened { .. }) => {
                    // fall through into Phase B below using start_index
                }
                Some(terminal) => {
                    self.bus
                        .publish(Topic::Signal, Event::Done { symbol: self.symbol.clone(), strategy_name: self.strategy_name.clone() })
                        .await;
                    return Ok(terminal);
                }
                None => {
                    state.scheduled = None;
                    let at = candles.last().expect("checked non-empty above").timestamp;
                    self.bus
                        .publish(Topic::Signal, Event::Done { symbol: self.symbol.clone(), strategy_name: self.strategy_name.clone() })
                        .await;
                    return Ok(TickOutcome::Cancelled { signal: scheduled, reason: CancelReason::Timeout, at });
                }
            }
        }

        let Some(pending) = state.pending.clone() else {
            return Ok(TickOutcome::Idle);
        };

        if candles.len() < start_index + 5 {
            let price = vwap(&candles[start_index..]);
            return Ok(TickOutcome::Active { signal: pending, price });
        }

        for i in (start_index + 4)..candles.len() {
            let window = &candles[(i + 1 - 5)..=i];
            let price = vwap(window);
            let lifetime = Duration::minutes(pending.minute_estimated_time);

            let close_reason = if candles[i].timestamp - pending.timestamp >= lifetime {
                Some(CloseReason::TimeExpired)
            } else {
                match pending.position {
                    Position::Long => {
                        if price >= pending.price_take_profit {
                            Some(CloseReason::TakeProfit)
                        } else if price <= pending.price_stop_loss {
                            Some(CloseReason::StopLoss)
                        } else {
                            None
                        }
                    }
                    Position::Short => {
                        if price <= pending.price_take_profit {
                            Some(CloseReason::TakeProfit)
                        } else if price >= pending.price_stop_loss {
                            Some(CloseReason::StopLoss)
                        } else {
                            None
                        }
                    }
                }
            };

            if let Some(reason) = close_reason {
                let pnl = pending.pnl_percentage(price);
                state.pending = None;
                state.milestones = None;
                self.risk.remove_signal(&pending.symbol);
                self.bus
                    .publish(Topic::DoneBacktest, Event::Done { symbol: self.symbol.clone(), strategy_name: self.strategy_name.clone() })
                    .await;
                return Ok(TickOutcome::Closed { signal: pending, reason, pnl_percentage: pnl, at: candles[i].timestamp });
            }

            let pnl = pending.pnl_percentage(price);
            self.emit_milestones(&mut state, pnl).await;
        }

        let last_window = &candles[(candles.len() - 5)..];
        let price = vwap(last_window);
        let pnl = pending.pnl_percentage(price);
        state.pending = None;
        state.milestones = None;
        self.risk.remove_signal(&pending.symbol);
        let at = candles.last().expect("checked non-empty above").timestamp;
        self.bus
            .publish(Topic::DoneBacktest, Event::Done { symbol: self.symbol.clone(), strategy_name: self.strategy_name.clone() })
            .await;
        Ok(TickOutcome::Closed { signal: pending, reason: CloseReason::TimeExpired, pnl_percentage: pnl, at })
    }
}
