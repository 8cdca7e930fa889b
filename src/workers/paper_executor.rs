// =============================================================================
// Paper Executor Worker
// =============================================================================
//
// Polls pending_execution orders; for each, fetches a current option price
// through the market-data multiplex and creates a Trade + Position.
// Transitions: pending_execution -> filled, or -> failed on missing price
// after exhausted retries.
// =============================================================================

use std::sync::Arc;

use chrono::Utc;
use sqlx::PgPool;
use uuid::Uuid;

use crate::bias::store::BiasStateStore;
use crate::db::repo;
use crate::error::PipelineError;
use crate::market_data::MarketDataMultiplex;
use crate::types::{Direction, Order, OptionType, OrderStatus, Position, PositionStatus, Trade};

pub struct PaperExecutor {
    pub pool: PgPool,
    pub market_data: Arc<MarketDataMultiplex>,
    pub bias_store: Arc<BiasStateStore>,
}

impl PaperExecutor {
    pub async fn run_batch(&self, limit: i64) -> Result<usize, PipelineError> {
        let orders = repo::find_pending_orders(&self.pool, limit).await?;
        let count = orders.len();

        for order in orders {
            if let Err(e) = self.fill_order(&order).await {
                tracing::warn!(order_id = %order.id, error = %e, "paper fill failed");
                if !e.is_retriable() {
                    repo::update_order_status(&self.pool, order.id, OrderStatus::Failed).await?;
                }
            }
        }

        Ok(count)
    }

    async fn fill_order(&self, order: &Order) -> Result<(), PipelineError> {
        let quote = self
            .market_data
            .get_option_price(&order.option_symbol)
            .await
            .map_err(|e| if e.is_retriable() { e } else { PipelineError::OrderPricingMissing })?;

        let fill_price = quote.value.mid_price;

        let symbol = option_underlying(&order.option_symbol);
        let entry_bias_state = self
            .bias_store
            .get(&symbol)
            .and_then(|s| serde_json::to_value(&s).ok());

        let trade = Trade {
            id: Uuid::new_v4(),
            order_id: order.id,
            fill_price,
            quantity: order.quantity,
            filled_at: Utc::now(),
        };

        let position = Position {
            id: Uuid::new_v4(),
            order_id: order.id,
            symbol,
            direction: match order.option_type {
                OptionType::Call => Direction::Long,
                OptionType::Put => Direction::Short,
            },
            entry_price: fill_price,
            current_price: fill_price,
            quantity: order.quantity,
            unrealized_pnl: 0.0,
            realized_pnl: 0.0,
            status: PositionStatus::Open,
            macro_class_at_entry: order.macro_class_at_entry.clone(),
            strategy_type: order.strategy_type.clone(),
            regime_at_entry: order.regime_at_entry.clone(),
            trend_phase_at_entry: order.trend_phase_at_entry.clone(),
            high_acceleration_entry: order.high_acceleration_entry,
            stop_loss: order.stop_loss,
            exit_reason: None,
            entry_bias_state,
            entry_timestamp: Utc::now(),
            exit_timestamp: None,
        };

        repo::insert_trade_and_position(&self.pool, &trade, &position).await?;
        repo::update_order_status(&self.pool, order.id, OrderStatus::Filled).await?;

        Ok(())
    }
}

/// The underlying equity symbol is the alphabetic prefix of an OCC-style
/// option symbol (everything before the 6-digit expiration date).
fn option_underlying(option_symbol: &str) -> String {
    option_symbol
        .chars()
        .take_while(|c| c.is_ascii_alphabetic())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn extracts_underlying_from_occ_symbol() {
        assert_eq!(option_underlying("SPY250110C00400000"), "SPY");
        assert_eq!(option_underlying("AAPL250110P00150000"), "AAPL");
    }
}
