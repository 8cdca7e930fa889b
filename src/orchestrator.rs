// =============================================================================
// Orchestrator
// =============================================================================
//
// Assigns the experiment, selects the execution policy, gathers the bias
// state, invokes both engines with byte-identical inputs, and persists
// Experiment / ExecutionPolicy / 0-2 TradeRecommendation rows in that order.
// =============================================================================

use std::sync::Arc;

use chrono::Utc;
use sqlx::PgPool;
use uuid::Uuid;

use crate::bias::store::BiasStateStore;
use crate::bias::{RegimeType, TrendPhase, UnifiedBiasState};
use crate::db::repo;
use crate::engines::{EngineInputs, EngineInvoker};
use crate::error::PipelineError;
use crate::experiment;
use crate::portfolio_guard::{self, CandidateTrade};
use crate::risk_model::{self, StrategyType};
use crate::runtime_config::RuntimeConfig;
use crate::types::{
    ExecutionPolicy, Experiment, MarketContext, Signal, SignalStatus, TradeRecommendation, Variant,
};

/// `state_strength_delta` magnitude above which a trade's entry is tagged
/// high-acceleration for the adaptive tuner's rolling statistics.
const HIGH_ACCELERATION_THRESHOLD: f64 = 15.0;

fn strategy_tag(strategy_type: Option<StrategyType>) -> Option<String> {
    strategy_type.map(|s| {
        match s {
            StrategyType::Breakout => "BREAKOUT",
            StrategyType::Pullback => "PULLBACK",
            StrategyType::MeanRevert => "MEAN_REVERT",
        }
        .to_string()
    })
}

fn regime_tag(regime: RegimeType) -> String {
    match regime {
        RegimeType::Trend => "TREND",
        RegimeType::Range => "RANGE",
        RegimeType::Transition => "TRANSITION",
    }
    .to_string()
}

fn trend_phase_tag(phase: TrendPhase) -> String {
    match phase {
        TrendPhase::Early => "EARLY",
        TrendPhase::Mid => "MID",
        TrendPhase::Late => "LATE",
    }
    .to_string()
}

fn is_high_acceleration(state: &UnifiedBiasState) -> bool {
    state
        .acceleration
        .as_ref()
        .map(|a| a.state_strength_delta.abs() > HIGH_ACCELERATION_THRESHOLD)
        .unwrap_or(false)
}

pub struct Orchestrator {
    pub pool: PgPool,
    pub bias_store: Arc<BiasStateStore>,
    pub engine_a: Arc<dyn EngineInvoker>,
    pub engine_b: Arc<dyn EngineInvoker>,
}

pub struct OrchestrationOutcome {
    pub experiment_id: Uuid,
    pub status: SignalStatus,
    pub rejection_reason: Option<String>,
}

impl Orchestrator {
    pub async fn run(
        &self,
        config: &RuntimeConfig,
        signal: &Signal,
        context: &MarketContext,
    ) -> Result<OrchestrationOutcome, PipelineError> {
        let variant = experiment::assign_variant(
            &signal.signal_hash,
            &config.policy_version,
            config.split_percentage,
        );
        let assignment_hash = experiment::assignment_hash(&signal.signal_hash, &config.policy_version);
        let policy_decision = experiment::select_policy(config, variant);

        let bias_state = self.bias_store.get(&signal.symbol).ok_or_else(|| {
            PipelineError::EnrichmentFailed(format!("no bias state for symbol {}", signal.symbol))
        })?;

        let inputs = EngineInputs {
            signal,
            context,
            bias_state: &bias_state,
        };

        let a_result = self.engine_a.invoke(&inputs).await;
        let b_result = self.engine_b.invoke(&inputs).await;

        let a_errored = a_result.is_err();
        let b_errored = b_result.is_err();

        if a_errored {
            tracing::warn!(signal_id = %signal.id, error = ?a_result.as_ref().err(), "engine A failed");
        }
        if b_errored {
            tracing::warn!(signal_id = %signal.id, error = ?b_result.as_ref().err(), "engine B failed");
        }

        let mut rec_a = a_result.ok().flatten();
        let mut rec_b = b_result.ok().flatten();

        let experiment_id = Uuid::new_v4();

        if a_errored && b_errored {
            self.persist(
                signal,
                config,
                variant,
                &assignment_hash,
                experiment_id,
                &policy_decision,
                None,
                None,
            )
            .await?;
            return Ok(OrchestrationOutcome {
                experiment_id,
                status: SignalStatus::Rejected,
                rejection_reason: Some("engines_failed".to_string()),
            });
        }

        let strategy_type = risk_model::strategy_type_from_intent(bias_state.intent_type);
        let regime_at_entry = regime_tag(bias_state.regime_type);
        let trend_phase_at_entry = trend_phase_tag(bias_state.trend_phase);
        let high_acceleration_entry = is_high_acceleration(&bias_state);

        for rec in [rec_a.as_mut(), rec_b.as_mut()].into_iter().flatten() {
            rec.experiment_id = experiment_id;
            rec.is_shadow = policy_decision.executed_engine != Some(rec.engine);
            rec.strategy_type = strategy_tag(strategy_type);
            rec.regime_at_entry = Some(regime_at_entry.clone());
            rec.trend_phase_at_entry = Some(trend_phase_at_entry.clone());
            rec.high_acceleration_entry = high_acceleration_entry;
            rec.macro_class_at_entry = Some(bias_state.macro_class.clone());
        }

        let mut rejection_reason = None;

        if let Some(executed) = policy_decision.executed_engine {
            let executed_rec = match executed {
                Variant::A => rec_a.as_mut(),
                Variant::B => rec_b.as_mut(),
            };

            match executed_rec {
                None => {
                    rejection_reason = Some(if (executed == Variant::A && a_errored) || (executed == Variant::B && b_errored) {
                        "ENGINE_FAILED".to_string()
                    } else {
                        "NO_RECOMMENDATION".to_string()
                    });
                }
                Some(rec) => {
                    let open_positions = repo::find_open_positions(&self.pool).await?;
                    if let Some(strategy_type) = strategy_type {
                        let candidate = CandidateTrade {
                            symbol: &rec.symbol,
                            direction: rec.direction,
                            strategy_type,
                            macro_class_bearish_confirmed: risk_model::is_macro_bearish_confirmed(&bias_state),
                        };
                        let guard = portfolio_guard::evaluate(&bias_state, &candidate, &open_positions, None);
                        if guard.verdict_is_block {
                            rec.is_shadow = true;
                            rejection_reason = Some(
                                guard
                                    .reasons
                                    .first()
                                    .cloned()
                                    .unwrap_or_else(|| "POLICY_VIOLATION".to_string()),
                            );
                        }
                    }
                }
            }
        } else if rec_a.is_none() && rec_b.is_none() {
            rejection_reason = Some("NO_RECOMMENDATION".to_string());
        }

        self.persist(
            signal,
            config,
            variant,
            &assignment_hash,
            experiment_id,
            &policy_decision,
            rec_a.as_ref(),
            rec_b.as_ref(),
        )
        .await?;

        let status = if rejection_reason.is_some() {
            SignalStatus::Rejected
        } else {
            SignalStatus::Approved
        };

        Ok(OrchestrationOutcome {
            experiment_id,
            status,
            rejection_reason,
        })
    }

    #[allow(clippy::too_many_arguments)]
    async fn persist(
        &self,
        signal: &Signal,
        config: &RuntimeConfig,
        variant: Variant,
        assignment_hash: &str,
        experiment_id: Uuid,
        policy_decision: &experiment::PolicyDecision,
        rec_a: Option<&TradeRecommendation>,
        rec_b: Option<&TradeRecommendation>,
    ) -> Result<(), PipelineError> {
        let experiment = Experiment {
            id: experiment_id,
            signal_id: signal.id,
            variant,
            assignment_hash: assignment_hash.to_string(),
            split_percentage: config.split_percentage,
            policy_version: config.policy_version.clone(),
            created_at: Utc::now(),
        };
        repo::insert_experiment(&self.pool, &experiment).await?;

        let policy = ExecutionPolicy {
            id: Uuid::new_v4(),
            experiment_id,
            execution_mode: config.execution_mode,
            executed_engine: policy_decision.executed_engine,
            shadow_engine: policy_decision.shadow_engine,
            reason: policy_decision.reason.clone(),
            created_at: Utc::now(),
        };
        repo::insert_execution_policy(&self.pool, &policy).await?;

        for rec in [rec_a, rec_b].into_iter().flatten() {
            repo::insert_trade_recommendation(&self.pool, rec).await?;
        }

        Ok(())
    }
}
