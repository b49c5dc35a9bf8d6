// =============================================================================
// Central Application State — bootstraps and ties the core together
// =============================================================================
//
// `AppState` owns the `Orchestrator` plus the bookkeeping the CLI needs
// around it: the decision/error audit ring buffers the teacher's dashboard
// used to show a human, kept here for the same purpose in `validate-matrix`
// output and future tooling, and `full_combination_universe`, the exhaustive
// combination space the Matrix Store's completeness check (spec §4.2) is
// validated against.
// =============================================================================

use std::sync::atomic::{AtomicU64, Ordering};

use chrono::Utc;
use parking_lot::RwLock;
use serde::Serialize;
use tracing::{info, warn};

use crate::classifier::CombinationId;
use crate::config::EngineConfig;
use crate::csv_bus::CsvSignalBus;
use crate::decision_envelope::DecisionEnvelope;
use crate::errors::{ChainTerminationReason, EngineError};
use crate::ledger::ChainLedger;
use crate::matrix::MatrixStore;
use crate::orchestrator::{Orchestrator, OrchestratorOutcome};
use crate::registry::ParameterSetRegistry;
use crate::types::{DurationBucket, Generation, Outcome, Proximity, SignalClass};

/// A recorded error event, surfaced by the `validate-matrix`/`run` CLI paths.
#[derive(Debug, Clone, Serialize)]
pub struct ErrorRecord {
    pub message: String,
    pub code: Option<String>,
    pub at: String,
}

const MAX_RECENT_ERRORS: usize = 50;
const MAX_RECENT_DECISIONS: usize = 200;

/// Every legal `CombinationId` reachable under the spec §3 grammar:
/// Generation x SignalClass x Proximity x Outcome, with `DurationBucket`
/// nested only for ECO-class signals. The Matrix Store's completeness check
/// (spec §4.2) is validated against exactly this set.
pub fn full_combination_universe() -> Vec<CombinationId> {
    const GENERATIONS: [Generation; 3] = [Generation::O, Generation::R1, Generation::R2];
    const SIGNALS: [SignalClass; 8] = [
        SignalClass::EcoHigh,
        SignalClass::EcoMed,
        SignalClass::Anticipation1Hr,
        SignalClass::Anticipation8Hr,
        SignalClass::EquityOpenAsia,
        SignalClass::EquityOpenEurope,
        SignalClass::EquityOpenUsa,
        SignalClass::AllIndicators,
    ];
    const PROXIMITIES: [Proximity; 4] = [
        Proximity::Immediate,
        Proximity::Short,
        Proximity::Long,
        Proximity::Extended,
    ];
    const OUTCOMES: [Outcome; 6] = [
        Outcome::Win,
        Outcome::Loss,
        Outcome::Be,
        Outcome::Skip,
        Outcome::Reject,
        Outcome::Cancel,
    ];
    const DURATIONS: [DurationBucket; 4] = [
        DurationBucket::Flash,
        DurationBucket::Quick,
        DurationBucket::Long,
        DurationBucket::Extended,
    ];

    let mut universe = Vec::new();
    for generation in GENERATIONS {
        for signal in SIGNALS {
            for proximity in PROXIMITIES {
                for outcome in OUTCOMES {
                    if signal.is_eco_class() {
                        for duration in DURATIONS {
                            universe.push(CombinationId::new(
                                generation,
                                signal,
                                Some(duration),
                                proximity,
                                outcome,
                            ));
                        }
                    } else {
                        universe.push(CombinationId::new(generation, signal, None, proximity, outcome));
                    }
                }
            }
        }
    }
    universe
}

/// Ties the `Orchestrator` together with the engine config and the audit
/// ring buffers surfaced by the CLI.
pub struct AppState {
    pub state_version: AtomicU64,
    pub config: EngineConfig,
    pub orchestrator: Orchestrator,
    pub recent_decisions: RwLock<Vec<DecisionEnvelope>>,
    pub recent_errors: RwLock<Vec<ErrorRecord>>,
    pub start_time: std::time::Instant,
}

impl AppState {
    /// Load every store from `config`'s derived paths and assemble the
    /// orchestrator. A missing `parameter_sets.json` starts an empty
    /// registry rather than failing — an operator bootstrapping a brand new
    /// `<root>` has nothing to load yet, and the matrix/registry reload
    /// paths exist precisely to backfill this once the real documents land.
    pub fn bootstrap(config: EngineConfig) -> Result<Self, EngineError> {
        let universe = full_combination_universe();

        let registry = if config.parameter_sets_path().exists() {
            ParameterSetRegistry::load_from_json(config.parameter_sets_path())?
        } else {
            warn!(
                path = %config.parameter_sets_path().display(),
                "parameter sets document not found — starting with an empty registry"
            );
            ParameterSetRegistry::empty()
        };

        let matrix = MatrixStore::load(config.matrix_map_path(), &registry, &universe)?;
        let ledger = ChainLedger::reconstruct_from_history(
            config.chain_history_path(),
            config.max_chain_duration_hours,
        )?;
        let bus = CsvSignalBus::new(config.trading_signals_path())
            .with_lock_timeout(std::time::Duration::from_millis(config.bus_contention_timeout_ms));

        let orchestrator = Orchestrator::new(matrix, registry, ledger, bus, config.clone());

        info!(
            root = %config.root.display(),
            universe_size = universe.len(),
            "app state bootstrapped"
        );

        Ok(Self {
            state_version: AtomicU64::new(1),
            config,
            orchestrator,
            recent_decisions: RwLock::new(Vec::new()),
            recent_errors: RwLock::new(Vec::new()),
            start_time: std::time::Instant::now(),
        })
    }

    /// Atomically increment the state version. Called after every meaningful
    /// mutation so future dashboard tooling can detect fresh data.
    pub fn increment_version(&self) -> u64 {
        self.state_version.fetch_add(1, Ordering::SeqCst)
    }

    pub fn current_state_version(&self) -> u64 {
        self.state_version.load(Ordering::SeqCst)
    }

    pub fn push_error(&self, msg: String) {
        self.push_error_with_code(msg, None);
    }

    pub fn push_error_with_code(&self, msg: String, code: Option<String>) {
        let record = ErrorRecord {
            message: msg,
            code,
            at: Utc::now().to_rfc3339(),
        };
        let mut errors = self.recent_errors.write();
        errors.push(record);
        while errors.len() > MAX_RECENT_ERRORS {
            errors.remove(0);
        }
        self.increment_version();
    }

    fn push_decision(&self, envelope: DecisionEnvelope) {
        let mut decisions = self.recent_decisions.write();
        decisions.push(envelope);
        while decisions.len() > MAX_RECENT_DECISIONS {
            decisions.remove(0);
        }
        self.increment_version();
    }

    /// Record an `OrchestratorOutcome` into the decision audit trail. Called
    /// by the `run` CLI path after every `handle_closed_trade`.
    pub fn record_outcome(&self, symbol: &str, outcome: &OrchestratorOutcome) {
        let envelope = match outcome {
            OrchestratorOutcome::AwaitingAck { chain_id } => {
                DecisionEnvelope::awaiting_ack(symbol, chain_id.clone())
            }
            OrchestratorOutcome::ChainEnded { chain_id, reason } => {
                let layer = termination_layer(reason);
                DecisionEnvelope::chain_ended(
                    symbol,
                    chain_id.clone(),
                    None,
                    layer,
                    reason.to_string(),
                )
            }
        };
        self.push_decision(envelope);
    }
}

fn termination_layer(reason: &ChainTerminationReason) -> &'static str {
    match reason {
        ChainTerminationReason::ClassifyFailure => "CLASSIFIER",
        ChainTerminationReason::EndTrading => "MATRIX",
        ChainTerminationReason::ChainBudgetExhausted | ChainTerminationReason::SubMinLot => "RISK",
        ChainTerminationReason::DurationExpired
        | ChainTerminationReason::AckTimeout
        | ChainTerminationReason::RejectTrade => "LEDGER",
    }
}

// =============================================================================
// Tests
// =============================================================================
#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn universe_size_matches_grammar() {
        let universe = full_combination_universe();
        // 3 generations x (2 eco classes x 4 durations + 6 non-eco classes) x 4 proximities x 6 outcomes
        let per_generation = (2 * 4 + 6) * 4 * 6;
        assert_eq!(universe.len(), 3 * per_generation);
    }

    #[test]
    fn universe_has_no_duplicates() {
        let universe = full_combination_universe();
        let mut seen = std::collections::HashSet::new();
        for id in &universe {
            assert!(seen.insert(id.canonical()), "duplicate: {}", id.canonical());
        }
    }

    #[test]
    fn bootstrap_with_empty_root_starts_empty_registry_and_fails_on_missing_matrix() {
        let dir = tempfile::tempdir().unwrap();
        let config = EngineConfig {
            root: dir.path().to_path_buf(),
            ..EngineConfig::default()
        };
        let err = AppState::bootstrap(config).unwrap_err();
        assert!(matches!(err, EngineError::Csv(_) | EngineError::Io(_)));
    }

}
