//! Ambient execution context.
//!
//! Every read that could introduce look-ahead bias — candle fetches, VWAP,
//! "current time" — resolves `when` from here rather than the wall clock.
//! The context is installed per task via [`tokio::task_local!`], which
//! guarantees it is torn down on every exit path of the scoped future
//! (return, error, panic unwind, or cancellation), never leaking into a
//! sibling task.

use crate::domain::errors::EngineError;
use chrono::{DateTime, Utc};
use std::future::Future;

tokio::task_local! {
    static CONTEXT: ExecutionContext;
}

/// `{when, backtest}` — the simulated (or live) instant a tick is evaluated
/// at, and whether it runs under backtest semantics (no persistence writes).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExecutionContext {
    pub when: DateTime<Utc>,
    pub backtest: bool,
}

impl ExecutionContext {
    pub fn new(when: DateTime<Utc>, backtest: bool) -> Self {
        Self { when, backtest }
    }

    pub fn live(when: DateTime<Utc>) -> Self {
        Self::new(when, false)
    }

    pub fn backtest_at(when: DateTime<Utc>) -> Self {
        Self::new(when, true)
    }

    /// Returns the ambient context, or `ContextMissing` if none is installed.
    /// Calling this outside of [`ExecutionContext::run`] is a programming
    /// error — every time-sensitive function demands it.
    pub fn current() -> Result<Self, EngineError> {
        CONTEXT
            .try_with(|ctx| *ctx)
            .map_err(|_| EngineError::ContextMissing)
    }

    /// Installs `ctx` as ambient for the duration of `fut`, removing it
    /// unconditionally when `fut` completes (success, error, or panic
    /// unwind — `task_local` scopes never leak across task boundaries).
    pub async fn run<F, T>(ctx: ExecutionContext, fut: F) -> T
    where
        F: Future<Output = T>,
    {
        CONTEXT.scope(ctx, fut).await
    }
}
