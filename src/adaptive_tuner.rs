// =============================================================================
// Adaptive Tuner
// =============================================================================
//
// Once per calendar day, nudges the bounded parameters of the risk model from
// rolling trade performance. Every applied change is capped at ±10% of its
// current value and clamped to the rule's own range; every change, applied or
// not, is explainable via its rationale string. When the "adaptive" BiasConfig
// document has enabled=false the tuner still runs and logs what it would have
// done, but does not persist the risk document or history rows.
//
// last_run_date is mirrored into the "adaptive" BiasConfig document so a
// process restart does not cause the tuner to run twice in one day.
// =============================================================================

use chrono::{NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use sqlx::PgPool;

use crate::db::repo;
use crate::error::PipelineError;
use crate::risk_model::RiskConfig;
use crate::runtime_config::RuntimeConfig;

const RISK_CONFIG_KEY: &str = "risk";
const ADAPTIVE_CONFIG_KEY: &str = "adaptive";

const MIN_TRADE_COUNT: i64 = 10;
const MAX_DAILY_CHANGE_FRACTION: f64 = 0.10;

const RANGE_BREAKOUT_WIN_RATE_THRESHOLD: f64 = 0.35;
const RANGE_BREAKOUT_MULTIPLIER_TARGET: f64 = 0.6;
const RANGE_BREAKOUT_MULTIPLIER_MIN: f64 = 0.5;
const RANGE_BREAKOUT_MULTIPLIER_MAX: f64 = 0.9;

const HIGH_ACCEL_AVG_R_THRESHOLD: f64 = 1.5;
const STATE_STRENGTH_UP_MULTIPLIER_MAX: f64 = 1.2;

const MACRO_DRIFT_EXIT_MIN_COUNT: i64 = 3;
const MACRO_DRIFT_EXIT_AVG_R_THRESHOLD: f64 = 0.3;
const MACRO_DRIFT_THRESHOLD_TARGET: f64 = 0.25;
const MACRO_DRIFT_THRESHOLD_MIN: f64 = 0.15;
const MACRO_DRIFT_THRESHOLD_MAX: f64 = 0.25;

const LATE_PHASE_AVG_R_THRESHOLD: f64 = 1.0;
const LATE_PHASE_NEGATIVE_MULTIPLIER_MIN: f64 = 0.7;
const LATE_PHASE_NEGATIVE_MULTIPLIER_TARGET: f64 = 1.0;

/// The "adaptive" BiasConfig document — process-wide tuner state.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AdaptiveConfig {
    pub enabled: bool,
    pub dry_run: bool,
    pub last_run_date: Option<NaiveDate>,
}

impl Default for AdaptiveConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            dry_run: true,
            last_run_date: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ParameterChange {
    pub parameter: &'static str,
    pub previous_value: f64,
    pub new_value: f64,
    pub rationale: &'static str,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TuningReport {
    pub ran: bool,
    pub dry_run: bool,
    pub trade_count: i64,
    pub changes: Vec<ParameterChange>,
}

pub struct AdaptiveTuner {
    pub pool: PgPool,
    pub lookback_days: i64,
}

impl AdaptiveTuner {
    /// Run the daily tuning pass. `force_run` bypasses the once-per-day gate
    /// (used by an operator-triggered manual run).
    pub async fn run(&self, config: &RuntimeConfig, force_run: bool) -> Result<TuningReport, PipelineError> {
        let today = Utc::now().date_naive();
        let mut adaptive_doc = load_adaptive_config(&self.pool).await?;

        if !force_run && adaptive_doc.last_run_date == Some(today) {
            return Ok(TuningReport {
                ran: false,
                dry_run: adaptive_doc.dry_run,
                ..Default::default()
            });
        }

        let stats = repo::compute_rolling_trade_stats(&self.pool, self.lookback_days).await?;
        if stats.trade_count < MIN_TRADE_COUNT {
            tracing::info!(trade_count = stats.trade_count, "adaptive tuner skipped: below minimum trade count");
            adaptive_doc.last_run_date = Some(today);
            repo::save_bias_config(&self.pool, ADAPTIVE_CONFIG_KEY, &to_json(&adaptive_doc)?).await?;
            return Ok(TuningReport {
                ran: false,
                dry_run: adaptive_doc.dry_run,
                trade_count: stats.trade_count,
                ..Default::default()
            });
        }

        let dry_run = !config.adaptive_enabled || config.adaptive_dry_run;
        let mut risk_config = load_risk_config(&self.pool).await?;
        let mut changes = Vec::new();

        if let Some(win_rate) = stats.breakout_range_win_rate {
            if win_rate < RANGE_BREAKOUT_WIN_RATE_THRESHOLD {
                if let Some(new_value) = bounded_step_toward(
                    risk_config.range_breakout_multiplier,
                    RANGE_BREAKOUT_MULTIPLIER_TARGET,
                    RANGE_BREAKOUT_MULTIPLIER_MIN,
                    RANGE_BREAKOUT_MULTIPLIER_MAX,
                ) {
                    changes.push(ParameterChange {
                        parameter: "range_breakout_multiplier",
                        previous_value: risk_config.range_breakout_multiplier,
                        new_value,
                        rationale: "breakout-in-range win rate below 0.35",
                    });
                    risk_config.range_breakout_multiplier = new_value;
                }
            }
        }

        if let Some(avg_r) = stats.high_acceleration_avg_r {
            if avg_r > HIGH_ACCEL_AVG_R_THRESHOLD {
                if let Some(new_value) = bounded_step_toward(
                    risk_config.state_strength_up_multiplier,
                    STATE_STRENGTH_UP_MULTIPLIER_MAX,
                    risk_config.state_strength_up_multiplier.min(STATE_STRENGTH_UP_MULTIPLIER_MAX),
                    STATE_STRENGTH_UP_MULTIPLIER_MAX,
                ) {
                    changes.push(ParameterChange {
                        parameter: "state_strength_up_multiplier",
                        previous_value: risk_config.state_strength_up_multiplier,
                        new_value,
                        rationale: "high-acceleration trades averaging above 1.5R",
                    });
                    risk_config.state_strength_up_multiplier = new_value;
                }
            }
        }

        if stats.macro_drift_exit_count >= MACRO_DRIFT_EXIT_MIN_COUNT {
            if let Some(avg_r) = stats.macro_drift_exit_avg_r {
                if avg_r < MACRO_DRIFT_EXIT_AVG_R_THRESHOLD {
                    if let Some(new_value) = bounded_step_toward(
                        risk_config.macro_drift_threshold,
                        MACRO_DRIFT_THRESHOLD_TARGET,
                        MACRO_DRIFT_THRESHOLD_MIN,
                        MACRO_DRIFT_THRESHOLD_MAX,
                    ) {
                        changes.push(ParameterChange {
                            parameter: "macro_drift_threshold",
                            previous_value: risk_config.macro_drift_threshold,
                            new_value,
                            rationale: "3+ macro-drift exits averaging below 0.3R",
                        });
                        risk_config.macro_drift_threshold = new_value;
                    }
                }
            }
        }

        if let Some(avg_r) = stats.late_phase_avg_r {
            if avg_r > LATE_PHASE_AVG_R_THRESHOLD {
                if let Some(new_value) = bounded_step_toward(
                    risk_config.late_phase_negative_multiplier,
                    LATE_PHASE_NEGATIVE_MULTIPLIER_TARGET,
                    LATE_PHASE_NEGATIVE_MULTIPLIER_MIN,
                    LATE_PHASE_NEGATIVE_MULTIPLIER_TARGET,
                ) {
                    changes.push(ParameterChange {
                        parameter: "late_phase_negative_multiplier",
                        previous_value: risk_config.late_phase_negative_multiplier,
                        new_value,
                        rationale: "LATE-phase trades averaging above 1.0R",
                    });
                    risk_config.late_phase_negative_multiplier = new_value;
                }
            }
        }

        if !dry_run && !changes.is_empty() {
            repo::save_bias_config(&self.pool, RISK_CONFIG_KEY, &to_json(&risk_config)?).await?;
            for change in &changes {
                repo::insert_adaptive_history_row(
                    &self.pool,
                    RISK_CONFIG_KEY,
                    change.parameter,
                    change.previous_value,
                    change.new_value,
                    change.rationale,
                )
                .await?;
            }
        } else if dry_run && !changes.is_empty() {
            tracing::info!(?changes, "adaptive tuner dry-run: changes computed but not persisted");
        }

        adaptive_doc.last_run_date = Some(today);
        adaptive_doc.enabled = config.adaptive_enabled;
        adaptive_doc.dry_run = dry_run;
        repo::save_bias_config(&self.pool, ADAPTIVE_CONFIG_KEY, &to_json(&adaptive_doc)?).await?;

        Ok(TuningReport {
            ran: true,
            dry_run,
            trade_count: stats.trade_count,
            changes,
        })
    }
}

/// Step at most `MAX_DAILY_CHANGE_FRACTION` of `current` toward `target`,
/// never overshooting it, then clamp to `[min, max]`. Returns `None` when the
/// result would be indistinguishable from `current`.
fn bounded_step_toward(current: f64, target: f64, min: f64, max: f64) -> Option<f64> {
    const EPSILON: f64 = 1e-9;
    if (target - current).abs() < EPSILON {
        return None;
    }

    let max_step = current.abs() * MAX_DAILY_CHANGE_FRACTION;
    let direction = if target > current { 1.0 } else { -1.0 };
    let mut new_value = current + direction * max_step;

    if (direction > 0.0 && new_value > target) || (direction < 0.0 && new_value < target) {
        new_value = target;
    }
    new_value = new_value.clamp(min, max);

    if (new_value - current).abs() < EPSILON {
        None
    } else {
        Some(new_value)
    }
}

fn to_json<T: Serialize>(value: &T) -> Result<serde_json::Value, PipelineError> {
    serde_json::to_value(value).map_err(|e| PipelineError::Fatal(format!("config serialization failed: {e}")))
}

async fn load_risk_config(pool: &PgPool) -> Result<RiskConfig, PipelineError> {
    match repo::load_bias_config(pool, RISK_CONFIG_KEY).await? {
        Some(doc) => serde_json::from_value(doc).map_err(|e| {
            PipelineError::Fatal(format!("corrupt risk config document: {e}"))
        }),
        None => Ok(RiskConfig::default()),
    }
}

async fn load_adaptive_config(pool: &PgPool) -> Result<AdaptiveConfig, PipelineError> {
    match repo::load_bias_config(pool, ADAPTIVE_CONFIG_KEY).await? {
        Some(doc) => serde_json::from_value(doc).map_err(|e| {
            PipelineError::Fatal(format!("corrupt adaptive config document: {e}"))
        }),
        None => Ok(AdaptiveConfig::default()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn step_clamps_to_ten_percent_of_current() {
        let stepped = bounded_step_toward(0.7, 0.6, 0.5, 0.9).unwrap();
        assert!((stepped - 0.63).abs() < 1e-9);
    }

    #[test]
    fn step_never_overshoots_target() {
        let stepped = bounded_step_toward(0.605, 0.6, 0.5, 0.9).unwrap();
        assert_eq!(stepped, 0.6);
    }

    #[test]
    fn step_respects_hard_clamp() {
        let stepped = bounded_step_toward(0.52, 0.6, 0.5, 0.9);
        // 10% step from 0.52 overshoots past nothing and stays within bounds
        assert!(stepped.unwrap() <= 0.9);
    }

    #[test]
    fn no_step_when_already_at_target() {
        assert!(bounded_step_toward(0.6, 0.6, 0.5, 0.9).is_none());
    }

    #[test]
    fn late_phase_relax_moves_up_toward_one() {
        let stepped = bounded_step_toward(0.75, 1.0, 0.7, 1.0).unwrap();
        assert!(stepped > 0.75 && stepped <= 1.0);
    }
}
