//! The Signal data model and static validation (SignalValidator, C4).

use crate::domain::errors::EngineError;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Position {
    Long,
    Short,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PartialKind {
    Profit,
    Loss,
}

/// One entry of the append-only partial-closure log. Invariant 5: strictly
/// increasing `percent` within a `kind`, each `percent` appears at most once.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct PartialClosure {
    pub kind: PartialKind,
    pub percent: u8,
    pub price: Decimal,
}

/// The single unit of work. A signal is `scheduled` (awaiting `price_open`)
/// xor `pending` (active, being monitored) — the engine, not this type,
/// enforces the at-most-one invariant across the pair.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Signal {
    pub id: Uuid,
    pub symbol: String,
    pub strategy_name: String,
    pub exchange_name: String,
    pub position: Position,
    pub price_open: Decimal,
    pub price_take_profit: Decimal,
    pub price_stop_loss: Decimal,
    pub minute_estimated_time: i64,
    pub timestamp: DateTime<Utc>,
    pub note: Option<String>,
    #[serde(default)]
    pub partials: Vec<PartialClosure>,
}

impl Signal {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        symbol: impl Into<String>,
        strategy_name: impl Into<String>,
        exchange_name: impl Into<String>,
        position: Position,
        price_open: Decimal,
        price_take_profit: Decimal,
        price_stop_loss: Decimal,
        minute_estimated_time: i64,
        timestamp: DateTime<Utc>,
        note: Option<String>,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            symbol: symbol.into(),
            strategy_name: strategy_name.into(),
            exchange_name: exchange_name.into(),
            position,
            price_open,
            price_take_profit,
            price_stop_loss,
            minute_estimated_time,
            timestamp,
            note,
            partials: Vec::new(),
        }
    }

    /// Appends a partial closure, enforcing invariant 5. Rejects silently
    /// (returns `false`) if `percent` would violate monotonicity or has
    /// already fired for this `kind` — callers are expected to have already
    /// deduplicated via `MilestoneTracker`, this is a last-line invariant
    /// check, not the primary dedup mechanism.
    pub fn push_partial(&mut self, kind: PartialKind, percent: u8, price: Decimal) -> bool {
        let last_for_kind = self
            .partials
            .iter()
            .filter(|p| p.kind == kind)
            .map(|p| p.percent)
            .max();
        if let Some(last) = last_for_kind {
            if percent <= last {
                return false;
            }
        }
        self.partials.push(PartialClosure { kind, percent, price });
        true
    }

    /// PnL in percent of `price_open`, long or short.
    pub fn pnl_percentage(&self, price_close: Decimal) -> Decimal {
        let hundred = Decimal::from(100);
        match self.position {
            Position::Long => (price_close - self.price_open) / self.price_open * hundred,
            Position::Short => (self.price_open - price_close) / self.price_open * hundred,
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub enum ValidationMode {
    /// Signal awaits `price_open` — the current-VWAP-already-past check
    /// (step 5) does not apply.
    Scheduled,
    /// Signal opens immediately at the supplied VWAP.
    Immediate,
}

#[derive(Debug, Clone)]
pub struct ValidatorConfig {
    /// Round-trip slippage + fee, as a fraction (e.g. 0.002 for 0.2%).
    pub round_trip_cost_pct: Decimal,
    /// Maximum tolerated stop-loss distance from entry, as a fraction.
    pub max_stop_loss_move_pct: Decimal,
    pub max_minute_estimated_time: i64,
}

impl Default for ValidatorConfig {
    fn default() -> Self {
        Self {
            round_trip_cost_pct: Decimal::new(4, 3),     // 0.004 = 2 * (0.1% + 0.1%)
            max_stop_loss_move_pct: Decimal::new(20, 2), // 0.20
            max_minute_estimated_time: 30 * 24 * 60,     // 30 days, in minutes
        }
    }
}

/// Validates a proposed signal, failing fast with a descriptive
/// `InvalidSignal` on the first violated check, in the order specified.
pub fn validate(
    signal: &Signal,
    mode: ValidationMode,
    current_vwap: Option<Decimal>,
    cfg: &ValidatorConfig,
) -> Result<(), EngineError> {
    let invalid = |reason: String| EngineError::InvalidSignal { reason };

    // 1. Basic sanity.
    if signal.price_open <= Decimal::ZERO {
        return Err(invalid("price_open must be > 0".to_string()));
    }
    if signal.price_take_profit <= Decimal::ZERO {
        return Err(invalid("price_take_profit must be > 0".to_string()));
    }
    if signal.price_stop_loss <= Decimal::ZERO {
        return Err(invalid("price_stop_loss must be > 0".to_string()));
    }
    if signal.minute_estimated_time <= 0 {
        return Err(invalid("minute_estimated_time must be > 0".to_string()));
    }
    if signal.timestamp.timestamp() <= 0 {
        return Err(invalid("timestamp must be > 0".to_string()));
    }

    // 2. Position geometry.
    match signal.position {
        Position::Long => {
            if signal.price_take_profit <= signal.price_open {
                return Err(invalid(
                    "long: price_take_profit must be > price_open".to_string(),
                ));
            }
            if signal.price_stop_loss >= signal.price_open {
                return Err(invalid(
                    "long: price_stop_loss must be < price_open".to_string(),
                ));
            }
        }
        Position::Short => {
            if signal.price_take_profit >= signal.price_open {
                return Err(invalid(
                    "short: price_take_profit must be < price_open".to_string(),
                ));
            }
            if signal.price_stop_loss <= signal.price_open {
                return Err(invalid(
                    "short: price_stop_loss must be > price_open".to_string(),
                ));
            }
        }
    }

    // 3. Risk-reward / TP-distance heuristics.
    let tp_distance_pct =
        ((signal.price_take_profit - signal.price_open) / signal.price_open).abs();
    let sl_distance_pct =
        ((signal.price_open - signal.price_stop_loss) / signal.price_open).abs();

    if tp_distance_pct <= cfg.round_trip_cost_pct {
        return Err(invalid(format!(
            "take-profit distance {tp_distance_pct} does not clear round-trip cost {}",
            cfg.round_trip_cost_pct
        )));
    }
    if sl_distance_pct > cfg.max_stop_loss_move_pct {
        return Err(invalid(format!(
            "stop-loss distance {sl_distance_pct} exceeds max move {}",
            cfg.max_stop_loss_move_pct
        )));
    }

    // 4. Lifetime cap.
    if signal.minute_estimated_time > cfg.max_minute_estimated_time {
        return Err(invalid(format!(
            "minute_estimated_time {} exceeds configured maximum {}",
            signal.minute_estimated_time, cfg.max_minute_estimated_time
        )));
    }

    // 5. Immediate-only: current VWAP must not already be past SL or TP.
    if let ValidationMode::Immediate = mode {
        let vwap = current_vwap.ok_or_else(|| {
            invalid("immediate validation requires the current VWAP".to_string())
        })?;
        match signal.position {
            Position::Long => {
                if vwap < signal.price_stop_loss {
                    return Err(invalid(
                        "current VWAP is already past the stop-loss".to_string(),
                    ));
                }
                if vwap > signal.price_take_profit {
                    return Err(invalid(
                        "current VWAP has already passed the take-profit".to_string(),
                    ));
                }
            }
            Position::Short => {
                if vwap > signal.price_stop_loss {
                    return Err(invalid(
                        "current VWAP is already past the stop-loss".to_string(),
                    ));
                }
                if vwap < signal.price_take_profit {
                    return Err(invalid(
                        "current VWAP has already passed the take-profit".to_string(),
                    ));
                }
            }
        }
    }

    Ok(())
}
