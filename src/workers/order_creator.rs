// =============================================================================
// Order Creator Worker
// =============================================================================
//
// Polls TradeRecommendation rows with is_shadow=false and no order yet;
// for each, constructs a pending_execution Order.
// =============================================================================

use sqlx::PgPool;
use uuid::Uuid;

use crate::db::repo::{self, PendingRecommendation};
use crate::error::PipelineError;
use crate::types::{Direction, Order, OrderStatus, OptionType};

const ORDER_TYPE_MARKET: &str = "MARKET";

pub struct OrderCreator {
    pub pool: PgPool,
}

impl OrderCreator {
    pub async fn run_batch(&self, limit: i64) -> Result<usize, PipelineError> {
        let recommendations = repo::find_executable_recommendations_without_order(&self.pool, limit).await?;
        let count = recommendations.len();

        for rec in recommendations {
            let order = build_order(&rec);
            repo::insert_order(&self.pool, &order).await?;
        }

        Ok(count)
    }
}

fn build_order(rec: &PendingRecommendation) -> Order {
    let option_type = match rec.direction {
        Direction::Long => OptionType::Call,
        Direction::Short => OptionType::Put,
    };

    Order {
        id: Uuid::new_v4(),
        signal_id: rec.signal_id,
        recommendation_id: rec.id,
        option_symbol: format_option_symbol(&rec.symbol, rec.expiration, rec.strike, option_type),
        strike: rec.strike,
        expiration: rec.expiration,
        option_type,
        quantity: rec.quantity,
        order_type: ORDER_TYPE_MARKET.to_string(),
        status: OrderStatus::PendingExecution,
        engine: rec.engine,
        stop_loss: rec.stop_loss,
        strategy_type: rec.strategy_type.clone(),
        regime_at_entry: rec.regime_at_entry.clone(),
        trend_phase_at_entry: rec.trend_phase_at_entry.clone(),
        high_acceleration_entry: rec.high_acceleration_entry,
        macro_class_at_entry: rec.macro_class_at_entry.clone(),
        created_at: chrono::Utc::now(),
    }
}

/// OCC-style option symbol: SYMBOL + YYMMDD + C/P + strike*1000 zero-padded
/// to 8 digits.
fn format_option_symbol(
    symbol: &str,
    expiration: chrono::DateTime<chrono::Utc>,
    strike: f64,
    option_type: OptionType,
) -> String {
    let type_char = match option_type {
        OptionType::Call => 'C',
        OptionType::Put => 'P',
    };
    let strike_thousandths = (strike * 1000.0).round() as i64;
    format!(
        "{symbol}{}{type_char}{strike_thousandths:08}",
        expiration.format("%y%m%d")
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    #[test]
    fn formats_occ_style_symbol() {
        let expiration = "2025-01-10T00:00:00Z".parse().unwrap();
        let symbol = format_option_symbol("SPY", expiration, 400.0, OptionType::Call);
        assert_eq!(symbol, "SPY250110C00400000");
    }

    #[test]
    fn build_order_derives_call_for_long() {
        let rec = PendingRecommendation {
            id: Uuid::new_v4(),
            experiment_id: Uuid::new_v4(),
            signal_id: Uuid::new_v4(),
            engine: crate::types::Variant::A,
            symbol: "SPY".to_string(),
            direction: Direction::Long,
            strike: 400.0,
            expiration: Utc::now(),
            quantity: 2,
            entry_price: 400.0,
            stop_loss: None,
            take_profit: None,
            is_shadow: false,
            strategy_type: Some("BREAKOUT".to_string()),
            regime_at_entry: Some("RANGE".to_string()),
            trend_phase_at_entry: Some("MID".to_string()),
            high_acceleration_entry: false,
            macro_class_at_entry: Some("MACRO_TREND_UP".to_string()),
            created_at: Utc::now(),
        };
        let order = build_order(&rec);
        assert_eq!(order.option_type, OptionType::Call);
        assert_eq!(order.quantity, 2);
        assert_eq!(order.status, OrderStatus::PendingExecution);
    }
}
