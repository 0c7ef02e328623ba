//! Risk profiles — shared, named gates a strategy's proposed signals must
//! clear before the engine schedules or opens them.
//!
//! A `RiskProfile` is a shared resource, never an owner of strategies: it
//! tracks how many signals are currently active against it (per symbol) so a
//! predicate can enforce e.g. "at most 3 concurrent BTCUSDT signals", but it
//! never emits engine events itself — the engine emits `Risk` on rejection
//! after calling `check_signal`.

use crate::domain::signal::Signal;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};

/// Read-only view handed to a risk predicate: the proposed signal plus how
/// many signals are presently active for its symbol under this profile.
pub struct RiskCheckContext<'a> {
    pub signal: &'a Signal,
    pub active_for_symbol: usize,
}

type RiskPredicate = dyn Fn(&RiskCheckContext) -> Result<(), String> + Send + Sync;

/// A named collection of predicates plus the active-signal counters they
/// read. Predicates run in registration order; the first failure short
/// circuits with its message.
pub struct RiskProfile {
    name: String,
    active: Mutex<HashMap<String, usize>>,
    predicates: Vec<Arc<RiskPredicate>>,
}

impl RiskProfile {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            active: Mutex::new(HashMap::new()),
            predicates: Vec::new(),
        }
    }

    pub fn with_predicate<F>(mut self, predicate: F) -> Self
    where
        F: Fn(&RiskCheckContext) -> Result<(), String> + Send + Sync + 'static,
    {
        self.predicates.push(Arc::new(predicate));
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn active_count(&self, symbol: &str) -> usize {
        *self.active.lock().unwrap().get(symbol).unwrap_or(&0)
    }

    /// Runs every predicate against `signal`. Does not mutate the active
    /// counters — call `add_signal` once the caller has decided to proceed.
    pub fn check_signal(&self, signal: &Signal) -> Result<(), String> {
        let active_for_symbol = self.active_count(&signal.symbol);
        let ctx = RiskCheckContext {
            signal,
            active_for_symbol,
        };
        for predicate in &self.predicates {
            predicate(&ctx)?;
        }
        Ok(())
    }

    pub fn add_signal(&self, symbol: &str) {
        let mut active = self.active.lock().unwrap();
        *active.entry(symbol.to_string()).or_insert(0) += 1;
    }

    pub fn remove_signal(&self, symbol: &str) {
        let mut active = self.active.lock().unwrap();
        if let Some(count) = active.get_mut(symbol) {
            *count = count.saturating_sub(1);
        }
    }

    pub fn clear(&self) {
        self.active.lock().unwrap().clear();
    }
}
