// =============================================================================
// Application State — shared handle for the API layer and background loops
// =============================================================================
//
// One `Arc<AppState>` is built at startup and cloned into every worker task
// and the Axum router. It owns the connection pool, the process-wide bias
// state, the market-data multiplex, hot-reloadable runtime config, a
// read-mostly feature-flag cache, and an in-process error tracker so no
// caught error is ever silently swallowed (every one either lands on an
// audit row or here).
// =============================================================================

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::Serialize;
use sqlx::PgPool;

use crate::bias::store::BiasStateStore;
use crate::db::repo;
use crate::market_data::MarketDataMultiplex;
use crate::runtime_config::RuntimeConfig;

const MAX_RECENT_ERRORS: usize = 50;

/// One entry in the in-process error tracker, surfaced via the monitoring
/// endpoint. `code` mirrors `PipelineError::reason_code()` when the error
/// came from a `PipelineError`.
#[derive(Debug, Clone, Serialize)]
pub struct ErrorRecord {
    pub timestamp: DateTime<Utc>,
    pub code: Option<&'static str>,
    pub message: String,
}

pub struct AppState {
    pub pool: PgPool,
    pub bias_store: Arc<BiasStateStore>,
    pub market_data: Arc<MarketDataMultiplex>,
    pub runtime_config: RwLock<RuntimeConfig>,
    feature_flags: RwLock<HashMap<String, bool>>,
    recent_errors: RwLock<VecDeque<ErrorRecord>>,
    state_version: AtomicU64,
}

impl AppState {
    pub fn new(
        pool: PgPool,
        bias_store: Arc<BiasStateStore>,
        market_data: Arc<MarketDataMultiplex>,
        runtime_config: RuntimeConfig,
    ) -> Self {
        Self {
            pool,
            bias_store,
            market_data,
            runtime_config: RwLock::new(runtime_config),
            feature_flags: RwLock::new(HashMap::new()),
            recent_errors: RwLock::new(VecDeque::with_capacity(MAX_RECENT_ERRORS)),
            state_version: AtomicU64::new(0),
        }
    }

    pub fn increment_version(&self) -> u64 {
        self.state_version.fetch_add(1, Ordering::Relaxed) + 1
    }

    pub fn current_state_version(&self) -> u64 {
        self.state_version.load(Ordering::Relaxed)
    }

    /// Record a caught error that did not otherwise reach an audit row (the
    /// webhook and signal-processing paths already persist their own
    /// rejection reasons; this is for background-worker failures).
    pub fn push_error(&self, message: impl Into<String>) {
        self.push_error_with_code(None, message);
    }

    pub fn push_error_with_code(&self, code: Option<&'static str>, message: impl Into<String>) {
        let mut errors = self.recent_errors.write();
        if errors.len() >= MAX_RECENT_ERRORS {
            errors.pop_front();
        }
        errors.push_back(ErrorRecord {
            timestamp: Utc::now(),
            code,
            message: message.into(),
        });
    }

    pub fn recent_errors(&self) -> Vec<ErrorRecord> {
        self.recent_errors.read().iter().cloned().collect()
    }

    pub fn feature_flag(&self, name: &str) -> bool {
        self.feature_flags.read().get(name).copied().unwrap_or(false)
    }

    pub fn feature_flags_snapshot(&self) -> HashMap<String, bool> {
        self.feature_flags.read().clone()
    }

    /// Reload the feature-flag cache from storage. Called on a periodic
    /// timer (default 5s) by a dedicated background task.
    pub async fn refresh_feature_flags(&self) -> Result<(), crate::error::PipelineError> {
        let rows = repo::list_feature_flags(&self.pool).await?;
        let mut flags = self.feature_flags.write();
        flags.clear();
        flags.extend(rows);
        Ok(())
    }

    pub async fn set_feature_flag(&self, name: &str, enabled: bool) -> Result<(), crate::error::PipelineError> {
        repo::set_feature_flag(&self.pool, name, enabled).await?;
        self.feature_flags.write().insert(name.to_string(), enabled);
        self.increment_version();
        Ok(())
    }
}
