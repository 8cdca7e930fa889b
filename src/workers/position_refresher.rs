// =============================================================================
// Position Refresher Worker
// =============================================================================
//
// Prices every open position off the market-data multiplex, updates
// unrealized PnL, and applies exit intelligence's bias-aware adjustments.
// Exit intelligence never auto-closes a position here beyond marking it
// closing on a forced full exit; broker-side order placement for the exit
// itself is out of scope.
// =============================================================================

use std::sync::Arc;

use chrono::Utc;

use crate::bias::store::BiasStateStore;
use crate::bias::Bias;
use crate::db::repo;
use crate::error::PipelineError;
use crate::exit_intelligence::{self, ExitInputs};
use crate::market_data::MarketDataMultiplex;
use crate::risk_model::StrategyType;
use crate::types::{Direction, Position, PositionStatus};

/// Inverse of the tagging done in `orchestrator.rs`; an unrecognized or
/// absent tag falls back to Pullback, the least aggressive classification.
fn strategy_type_from_tag(tag: Option<&str>) -> StrategyType {
    match tag {
        Some("BREAKOUT") => StrategyType::Breakout,
        Some("MEAN_REVERT") => StrategyType::MeanRevert,
        _ => StrategyType::Pullback,
    }
}

pub struct PositionRefresher {
    pub pool: sqlx::PgPool,
    pub market_data: Arc<MarketDataMultiplex>,
    pub bias_store: Arc<BiasStateStore>,
}

impl PositionRefresher {
    pub async fn run_once(&self) -> Result<usize, PipelineError> {
        let positions = repo::find_open_positions(&self.pool).await?;
        let count = positions.len();

        for position in positions {
            if let Err(e) = self.refresh_one(&position).await {
                tracing::warn!(position_id = %position.id, error = %e, "position refresh failed");
            }
        }

        Ok(count)
    }

    async fn refresh_one(&self, position: &Position) -> Result<(), PipelineError> {
        let quote = self.market_data.get_stock_price(&position.symbol).await?;
        let current_price = quote.value.current_price;

        let unrealized_pnl = match position.direction {
            Direction::Long => (current_price - position.entry_price) * position.quantity as f64,
            Direction::Short => (position.entry_price - current_price) * position.quantity as f64,
        };

        let state = match self.bias_store.get(&position.symbol) {
            Some(s) => s,
            None => {
                repo::update_position(
                    &self.pool,
                    position.id,
                    current_price,
                    unrealized_pnl,
                    position.status,
                    None,
                )
                .await?;
                return Ok(());
            }
        };

        let risk_distance = position
            .stop_loss
            .map(|sl| (position.entry_price - sl).abs())
            .unwrap_or_else(|| (position.entry_price - current_price).abs())
            .max(1e-9);
        let unrealized_pnl_r = unrealized_pnl / (risk_distance * position.quantity as f64);

        let trade_aligned_with_macro = match position.direction {
            Direction::Long => state.bias == Bias::Bullish,
            Direction::Short => state.bias == Bias::Bearish,
        };

        let entry_state = position
            .entry_bias_state
            .as_ref()
            .and_then(|v| serde_json::from_value(v.clone()).ok());

        let inputs = ExitInputs {
            entry_price: position.entry_price,
            entry_state: entry_state.as_ref(),
            current_state: &state,
            direction: position.direction,
            strategy_type: strategy_type_from_tag(position.strategy_type.as_deref()),
            unrealized_pnl_r,
            trade_aligned_with_macro,
            atr_expanding: matches!(state.atr_state_15m, crate::bias::AtrState::Expanding),
        };

        let decision = exit_intelligence::evaluate(&inputs);

        if decision.force_full_exit {
            let reason = decision
                .applied
                .last()
                .map(|m| m.tag)
                .unwrap_or("FORCED_EXIT");
            repo::close_position(&self.pool, position.id, current_price, unrealized_pnl, reason, Utc::now())
                .await?;
        } else {
            repo::update_position(&self.pool, position.id, current_price, unrealized_pnl, position.status, None)
                .await?;
        }

        Ok(())
    }
}
