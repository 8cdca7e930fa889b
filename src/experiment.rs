// =============================================================================
// Experiment assignment and execution policy selection
// =============================================================================
//
// Variant assignment is deterministic: the same (signal_hash, policy_version)
// always yields the same A/B split, so replaying a signal through the
// pipeline twice (e.g. after a crash) never flips its variant.
// =============================================================================

use sha2::{Digest, Sha256};

use crate::runtime_config::RuntimeConfig;
use crate::types::{ExecutionMode, Variant};

/// SHA-256(signal_hash || policy_version), hex-encoded. The same hash backs
/// both the variant draw and the audit trail on the Experiment row.
pub fn assignment_hash(signal_hash: &str, policy_version: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(signal_hash.as_bytes());
    hasher.update(policy_version.as_bytes());
    hex::encode(hasher.finalize())
}

/// Deterministic variant assignment: SHA-256(signal_hash || policy_version)
/// interpreted as a uniform draw in [0, 1), split at `split_percentage`.
pub fn assign_variant(signal_hash: &str, policy_version: &str, split_percentage: f64) -> Variant {
    let hash = assignment_hash(signal_hash, policy_version);
    let bytes = hex::decode(&hash[0..16]).unwrap_or_else(|_| vec![0u8; 8]);
    let mut buf = [0u8; 8];
    buf.copy_from_slice(&bytes[0..8]);
    let draw = (u64::from_be_bytes(buf) as f64) / (u64::MAX as f64);

    if draw < split_percentage {
        Variant::A
    } else {
        Variant::B
    }
}

/// What to run live vs. shadow, and why, for a given execution mode.
pub struct PolicyDecision {
    pub executed_engine: Option<Variant>,
    pub shadow_engine: Option<Variant>,
    pub reason: String,
}

/// Select which engine(s) execute live and which run in shadow, given the
/// configured execution mode and this signal's assigned variant.
///
/// `SplitCapital` trades the assigned variant live and shadows the other;
/// the split itself was already decided by [`assign_variant`], so this
/// function only records the reason.
pub fn select_policy(config: &RuntimeConfig, assigned: Variant) -> PolicyDecision {
    match config.execution_mode {
        ExecutionMode::ShadowOnly => PolicyDecision {
            executed_engine: None,
            shadow_engine: None,
            reason: "shadow_only: no engine executes live, both engines run for comparison"
                .to_string(),
        },
        ExecutionMode::EngineAPrimary => PolicyDecision {
            executed_engine: Some(Variant::A),
            shadow_engine: Some(Variant::B),
            reason: "engine_a_primary: engine A executes live, engine B shadows".to_string(),
        },
        ExecutionMode::EngineBPrimary => PolicyDecision {
            executed_engine: Some(Variant::B),
            shadow_engine: Some(Variant::A),
            reason: "engine_b_primary: engine B executes live, engine A shadows".to_string(),
        },
        ExecutionMode::SplitCapital => PolicyDecision {
            executed_engine: Some(assigned),
            shadow_engine: Some(assigned.other()),
            reason: format!(
                "split_capital: signal assigned to variant {assigned}, its own engine executes live"
            ),
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn assignment_is_deterministic() {
        let a = assign_variant("abc123", "v1.0", 0.5);
        let b = assign_variant("abc123", "v1.0", 0.5);
        assert_eq!(a, b);
    }

    #[test]
    fn different_policy_version_can_change_assignment() {
        // Not guaranteed to differ for any specific hash, but the function
        // must at least be a pure function of both inputs.
        let a = assign_variant("xyz", "v1.0", 0.5);
        let b = assign_variant("xyz", "v1.0", 0.5);
        assert_eq!(a, b);
    }

    #[test]
    fn split_zero_always_assigns_b() {
        for hash in ["a", "bb", "ccc", "dddd", "eeeee"] {
            assert_eq!(assign_variant(hash, "v1.0", 0.0), Variant::B);
        }
    }

    #[test]
    fn split_one_always_assigns_a() {
        for hash in ["a", "bb", "ccc", "dddd", "eeeee"] {
            assert_eq!(assign_variant(hash, "v1.0", 1.0), Variant::A);
        }
    }

    #[test]
    fn shadow_only_executes_nothing() {
        let config = RuntimeConfig {
            execution_mode: ExecutionMode::ShadowOnly,
            ..RuntimeConfig::default()
        };
        let decision = select_policy(&config, Variant::A);
        assert!(decision.executed_engine.is_none());
    }

    #[test]
    fn split_capital_executes_assigned_variant() {
        let config = RuntimeConfig {
            execution_mode: ExecutionMode::SplitCapital,
            ..RuntimeConfig::default()
        };
        let decision = select_policy(&config, Variant::B);
        assert_eq!(decision.executed_engine, Some(Variant::B));
        assert_eq!(decision.shadow_engine, Some(Variant::A));
    }

    #[test]
    fn engine_a_primary_shadows_b() {
        let config = RuntimeConfig {
            execution_mode: ExecutionMode::EngineAPrimary,
            ..RuntimeConfig::default()
        };
        let decision = select_policy(&config, Variant::B);
        assert_eq!(decision.executed_engine, Some(Variant::A));
        assert_eq!(decision.shadow_engine, Some(Variant::B));
    }
}
