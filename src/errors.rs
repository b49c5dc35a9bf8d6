// =============================================================================
// Error taxonomy — the single error currency for the core
// =============================================================================
//
// Every fallible operation in the classifier, matrix store, registry, risk
// engine, ledger, and CSV bus returns `EngineError`. Top-level binaries
// translate these into the CLI exit codes in spec §6.3; library code never
// reaches for `anyhow!` for control flow.
// =============================================================================

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// The error taxonomy from spec §7, flattened into one enum so every
/// fallible call site in the core shares a currency.
#[derive(Debug, Error)]
pub enum EngineError {
    // --- Classifier -----------------------------------------------------
    #[error("invalid signal class: {0}")]
    InvalidSignal(String),

    #[error("invalid generation: {0}")]
    InvalidGeneration(String),

    #[error("invalid combination id: {0}")]
    InvalidCombination(String),

    // --- Schema / registry -----------------------------------------------
    #[error("schema violation: {0}")]
    SchemaViolation(String),

    // --- Matrix -----------------------------------------------------------
    #[error("matrix incomplete: combination {0} has no matrix entry")]
    MatrixIncomplete(String),

    #[error("matrix reload rejected: {0}")]
    MatrixReloadReject(String),

    #[error("matrix references unknown parameter set: {0}")]
    RegistryReference(String),

    // --- Risk / sizing ------------------------------------------------------
    #[error("risk cap breach: {0}")]
    RiskCapBreach(String),

    // --- Chain termination --------------------------------------------------
    #[error("chain termination: {0}")]
    ChainTermination(#[from] ChainTerminationReason),

    // --- CSV bus --------------------------------------------------------
    #[error("bus transient error: {0}")]
    BusTransient(String),

    #[error("bus contention: could not acquire lock on {path} within {timeout_ms}ms")]
    BusContention { path: String, timeout_ms: u64 },

    #[error("bus fatal error: {0}")]
    BusFatal(String),

    #[error("unsupported signal bus schema version: {0}")]
    UnsupportedVersion(String),

    // --- I/O passthrough --------------------------------------------------
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("csv error: {0}")]
    Csv(#[from] csv::Error),

    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Reasons a chain can terminate, per spec §4.7 / §7.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ChainTerminationReason {
    #[error("matrix resolved END_TRADING")]
    EndTrading,
    #[error("chain risk budget exhausted")]
    ChainBudgetExhausted,
    #[error("computed lot size below broker minimum")]
    SubMinLot,
    #[error("maximum chain duration expired")]
    DurationExpired,
    #[error("ACK not received within grace period")]
    AckTimeout,
    #[error("classification of the closed trade failed")]
    ClassifyFailure,
    #[error("execution adapter rejected the trade")]
    RejectTrade,
}

impl ChainTerminationReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::EndTrading => "END_TRADING",
            Self::ChainBudgetExhausted => "CHAIN_BUDGET_EXHAUSTED",
            Self::SubMinLot => "SUB_MIN_LOT",
            Self::DurationExpired => "DURATION_EXPIRED",
            Self::AckTimeout => "ACK_TIMEOUT",
            Self::ClassifyFailure => "CLASSIFY_FAILURE",
            Self::RejectTrade => "REJECT_TRADE",
        }
    }
}

impl EngineError {
    /// Map to the process exit code defined in spec §6.3.
    pub fn exit_code(&self) -> i32 {
        match self {
            Self::MatrixIncomplete(_) => 10,
            Self::RegistryReference(_) | Self::SchemaViolation(_) => 11,
            Self::BusContention { .. } => 12,
            Self::InvalidSignal(_) | Self::InvalidGeneration(_) | Self::InvalidCombination(_) => {
                13
            }
            _ => 20,
        }
    }
}
