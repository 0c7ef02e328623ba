//! Crash-safe persistence of a strategy's live state: which signal (if any)
//! is scheduled or pending for a given (symbol, strategy), so a restart can
//! resume without re-opening a position the engine already committed to.

use crate::domain::errors::EngineError;
use crate::domain::signal::Signal;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use tracing::info;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SignalState {
    Scheduled,
    Pending,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PersistedSignal {
    pub state: SignalState,
    pub signal: Signal,
}

/// The persistence seam. Backtest runs never call this (the engine skips
/// persistence entirely when `ExecutionContext::backtest` is set); live runs
/// call `save`/`clear` on every state transition and `load` once at startup.
#[async_trait]
pub trait PersistenceAdapter: Send + Sync {
    async fn load(&self, symbol: &str, strategy_name: &str) -> Result<Option<PersistedSignal>, EngineError>;
    async fn save(&self, symbol: &str, strategy_name: &str, persisted: &PersistedSignal) -> Result<(), EngineError>;
    async fn clear(&self, symbol: &str, strategy_name: &str) -> Result<(), EngineError>;
}

/// One JSON file per (symbol, strategy) under `dump_dir`, written atomically
/// via write-to-`.tmp`-then-rename so a crash mid-write never leaves a
/// corrupt file behind.
pub struct JsonFilePersistence {
    dump_dir: PathBuf,
}

impl JsonFilePersistence {
    pub fn new(dump_dir: impl Into<PathBuf>) -> Self {
        Self {
            dump_dir: dump_dir.into(),
        }
    }

    fn path_for(&self, symbol: &str, strategy_name: &str) -> PathBuf {
        self.dump_dir.join(format!("{symbol}__{strategy_name}.json"))
    }

    fn fail(symbol: &str, strategy_name: &str, reason: impl ToString) -> EngineError {
        EngineError::PersistenceFailure {
            symbol: symbol.to_string(),
            strategy_name: strategy_name.to_string(),
            reason: reason.to_string(),
        }
    }
}

#[async_trait]
impl PersistenceAdapter for JsonFilePersistence {
    async fn load(&self, symbol: &str, strategy_name: &str) -> Result<Option<PersistedSignal>, EngineError> {
        let path = self.path_for(symbol, strategy_name);
        if !path.exists() {
            return Ok(None);
        }
        let content = tokio::fs::read_to_string(&path)
            .await
            .map_err(|e| Self::fail(symbol, strategy_name, e))?;
        let persisted: PersistedSignal = serde_json::from_str(&content)
            .map_err(|e| Self::fail(symbol, strategy_name, e))?;
        info!(symbol, strategy_name, "loaded persisted signal state");
        Ok(Some(persisted))
    }

    async fn save(&self, symbol: &str, strategy_name: &str, persisted: &PersistedSignal) -> Result<(), EngineError> {
        tokio::fs::create_dir_all(&self.dump_dir)
            .await
            .map_err(|e| Self::fail(symbol, strategy_name, e))?;

        let path = self.path_for(symbol, strategy_name);
        let temp_path = path.with_extension("tmp");

        let content = serde_json::to_string_pretty(persisted)
            .map_err(|e| Self::fail(symbol, strategy_name, e))?;
        tokio::fs::write(&temp_path, content)
            .await
            .map_err(|e| Self::fail(symbol, strategy_name, e))?;
        tokio::fs::rename(&temp_path, &path)
            .await
            .map_err(|e| Self::fail(symbol, strategy_name, e))?;

        info!(symbol, strategy_name, "persisted signal state");
        Ok(())
    }

    async fn clear(&self, symbol: &str, strategy_name: &str) -> Result<(), EngineError> {
        let path = self.path_for(symbol, strategy_name);
        if path.exists() {
            tokio::fs::remove_file(&path)
                .await
                .map_err(|e| Self::fail(symbol, strategy_name, e))?;
        }
        Ok(())
    }
}
