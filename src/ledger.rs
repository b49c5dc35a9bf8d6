// =============================================================================
// Chain Ledger — tracks reentry chains from first signal to termination
// =============================================================================
//
// A chain begins the first time a generation-`O` trade resolves to `REENTRY`
// and ends when the matrix resolves `END_TRADING`, the chain risk budget is
// exhausted, the max chain duration expires, or an ACK never arrives.
// `cumulative_used_risk_pct` only advances on `ACK_TRADE` — a signal that is
// emitted but never acknowledged must not count against the budget, so the
// tentative increment lives outside `ChainState` until it is confirmed.
//
// History is append-only and persisted to `chain_history.csv` so a crashed
// process can reconstruct live state by replaying it (see `replay.rs`).
// =============================================================================

use std::collections::HashMap;
use std::fs::OpenOptions;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Duration, Utc};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::errors::{ChainTerminationReason, EngineError};

/// Current status of a chain.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum ChainStatus {
    Active,
    Terminated { reason: ChainTerminationReason },
}

impl std::fmt::Display for ChainStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Active => write!(f, "ACTIVE"),
            Self::Terminated { reason } => write!(f, "TERMINATED:{}", reason.as_str()),
        }
    }
}

/// Full tracked state of one reentry chain.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChainState {
    pub chain_id: String,
    pub symbol: String,
    pub original_trade_id: String,
    pub current_generation: String,
    pub cumulative_used_risk_pct: f64,
    pub max_chain_loss_pct: f64,
    pub opened_at_utc: DateTime<Utc>,
    pub combination_history: Vec<String>,
    pub status: ChainStatus,
}

impl ChainState {
    fn is_active(&self) -> bool {
        matches!(self.status, ChainStatus::Active)
    }
}

/// One append-only row of `chain_history.csv`. Carries enough of the chain's
/// identity (`symbol`, `original_trade_id`, `max_chain_loss_pct`) that
/// `reconstruct_from_history` can rebuild a `ChainState` from the `OPEN`
/// event alone — the CSV signal bus never carries `chain_id`, so this file is
/// the only durable record of that mapping.
#[derive(Debug, Clone, Serialize, Deserialize)]
struct HistoryRow {
    recorded_at_utc: DateTime<Utc>,
    chain_id: String,
    event: String,
    combination_id: String,
    symbol: String,
    original_trade_id: String,
    max_chain_loss_pct: f64,
    tentative_risk_pct: f64,
    cumulative_used_risk_pct: f64,
    status: String,
}

struct Inner {
    chains: HashMap<String, ChainState>,
    /// Tentative risk increments keyed by chain_id, pending ACK.
    pending: HashMap<String, f64>,
}

/// The Chain Ledger (spec §4.5).
pub struct ChainLedger {
    inner: RwLock<Inner>,
    history_path: PathBuf,
    max_chain_duration_hours: i64,
}

impl ChainLedger {
    pub fn new(history_path: impl Into<PathBuf>, max_chain_duration_hours: i64) -> Self {
        Self {
            inner: RwLock::new(Inner {
                chains: HashMap::new(),
                pending: HashMap::new(),
            }),
            history_path: history_path.into(),
            max_chain_duration_hours,
        }
    }

    /// Open (or create) a chain for a generation-`O` trade's first `REENTRY`
    /// decision. No-op if the chain already exists.
    pub fn open_chain(
        &self,
        chain_id: &str,
        symbol: &str,
        original_trade_id: &str,
        max_chain_loss_pct: f64,
        now_utc: DateTime<Utc>,
    ) {
        let mut inner = self.inner.write();
        if inner.chains.contains_key(chain_id) {
            return;
        }
        let state = ChainState {
            chain_id: chain_id.to_string(),
            symbol: symbol.to_string(),
            original_trade_id: original_trade_id.to_string(),
            current_generation: "O".to_string(),
            cumulative_used_risk_pct: 0.0,
            max_chain_loss_pct,
            opened_at_utc: now_utc,
            combination_history: Vec::new(),
            status: ChainStatus::Active,
        };
        info!(chain_id, symbol, max_chain_loss_pct, "chain opened");
        inner.chains.insert(chain_id.to_string(), state);
        drop(inner);
        if let Err(err) = self.append_history(chain_id, "OPEN", "", 0.0) {
            warn!(chain_id, error = %err, "failed to append OPEN event to chain history");
        }
    }

    /// Record that a `TRADE_SIGNAL` was emitted for `chain_id` with a
    /// tentative risk percentage. The tentative amount is held separately
    /// until `on_ack` confirms it.
    pub fn on_signal_emitted(
        &self,
        chain_id: &str,
        combination_id: &str,
        tentative_risk_pct: f64,
    ) -> Result<(), EngineError> {
        {
            let mut inner = self.inner.write();
            let chain = inner
                .chains
                .get_mut(chain_id)
                .ok_or_else(|| EngineError::BusFatal(format!("unknown chain: {chain_id}")))?;
            chain.combination_history.push(combination_id.to_string());
            inner.pending.insert(chain_id.to_string(), tentative_risk_pct);
        }
        self.append_history(
            chain_id,
            "SIGNAL_EMITTED",
            combination_id,
            tentative_risk_pct,
        )?;
        Ok(())
    }

    /// Confirm the tentative increment — called when the execution adapter
    /// ACKs the trade signal.
    pub fn on_ack(&self, chain_id: &str) -> Result<(), EngineError> {
        let tentative = {
            let mut inner = self.inner.write();
            let tentative = inner.pending.remove(chain_id).unwrap_or(0.0);
            if let Some(chain) = inner.chains.get_mut(chain_id) {
                chain.cumulative_used_risk_pct += tentative;
                if let Some(next) = Self::next_generation_label(&chain.current_generation) {
                    chain.current_generation = next;
                }
            }
            tentative
        };
        self.append_history(chain_id, "ACK", "", tentative)?;
        info!(chain_id, tentative, "chain ack — cumulative risk advanced");
        Ok(())
    }

    /// Roll back the tentative increment — called on NACK or ACK timeout,
    /// and terminate the chain with `reason`.
    pub fn on_reject(
        &self,
        chain_id: &str,
        reason: ChainTerminationReason,
    ) -> Result<(), EngineError> {
        {
            let mut inner = self.inner.write();
            inner.pending.remove(chain_id);
            if let Some(chain) = inner.chains.get_mut(chain_id) {
                chain.status = ChainStatus::Terminated { reason };
            }
        }
        warn!(chain_id, reason = reason.as_str(), "chain rejected");
        self.append_history(chain_id, &format!("REJECT:{}", reason.as_str()), "", 0.0)?;
        Ok(())
    }

    /// Terminate a chain directly (matrix `END_TRADING`, budget exhaustion,
    /// sub-min-lot, or classify failure) without an intervening ACK cycle.
    pub fn terminate(
        &self,
        chain_id: &str,
        reason: ChainTerminationReason,
    ) -> Result<(), EngineError> {
        {
            let mut inner = self.inner.write();
            inner.pending.remove(chain_id);
            if let Some(chain) = inner.chains.get_mut(chain_id) {
                chain.status = ChainStatus::Terminated { reason };
            }
        }
        info!(chain_id, reason = reason.as_str(), "chain terminated");
        self.append_history(chain_id, &format!("TERMINATE:{}", reason.as_str()), "", 0.0)?;
        Ok(())
    }

    /// Sweep all active chains and terminate any whose
    /// `max_chain_duration_hours` has expired as of `now_utc`.
    pub fn gc_expired(&self, now_utc: DateTime<Utc>) -> Result<Vec<String>, EngineError> {
        let expired: Vec<String> = {
            let inner = self.inner.read();
            inner
                .chains
                .values()
                .filter(|c| {
                    c.is_active()
                        && now_utc - c.opened_at_utc > Duration::hours(self.max_chain_duration_hours)
                })
                .map(|c| c.chain_id.clone())
                .collect()
        };
        for chain_id in &expired {
            self.terminate(chain_id, ChainTerminationReason::DurationExpired)?;
        }
        Ok(expired)
    }

    pub fn get(&self, chain_id: &str) -> Option<ChainState> {
        self.inner.read().chains.get(chain_id).cloned()
    }

    /// Whether any chain's history mentions `combination_id` — used by
    /// `replay` to cross-check a response row against reconstructed state
    /// (the wire format carries no `chain_id`, so this is the closest join
    /// key available).
    pub fn chain_count(&self) -> usize {
        self.inner.read().chains.len()
    }

    pub fn any_chain_touched(&self, combination_id: &str) -> bool {
        self.inner
            .read()
            .chains
            .values()
            .any(|c| c.combination_history.iter().any(|id| id == combination_id))
    }

    pub fn remaining_budget(&self, chain_id: &str) -> Option<f64> {
        self.inner
            .read()
            .chains
            .get(chain_id)
            .map(|c| c.max_chain_loss_pct - c.cumulative_used_risk_pct)
    }

    fn next_generation_label(current: &str) -> Option<String> {
        match current {
            "O" => Some("R1".to_string()),
            "R1" => Some("R2".to_string()),
            _ => None,
        }
    }

    fn append_history(
        &self,
        chain_id: &str,
        event: &str,
        combination_id: &str,
        tentative_risk_pct: f64,
    ) -> Result<(), EngineError> {
        let (symbol, original_trade_id, max_chain_loss_pct, cumulative, status) = {
            let inner = self.inner.read();
            match inner.chains.get(chain_id) {
                Some(chain) => (
                    chain.symbol.clone(),
                    chain.original_trade_id.clone(),
                    chain.max_chain_loss_pct,
                    chain.cumulative_used_risk_pct,
                    chain.status.to_string(),
                ),
                None => (String::new(), String::new(), 0.0, 0.0, ChainStatus::Active.to_string()),
            }
        };
        let row = HistoryRow {
            recorded_at_utc: Utc::now(),
            chain_id: chain_id.to_string(),
            event: event.to_string(),
            combination_id: combination_id.to_string(),
            symbol,
            original_trade_id,
            max_chain_loss_pct,
            tentative_risk_pct,
            cumulative_used_risk_pct: cumulative,
            status,
        };
        append_csv_row(&self.history_path, &row)
    }

    /// Rebuild a ledger purely from `chain_history.csv`, replaying every
    /// `OPEN`/`SIGNAL_EMITTED`/`ACK`/`REJECT:*`/`TERMINATE:*` event in order.
    /// Used for crash recovery and by the `replay` CLI path (spec §8.1's
    /// determinism invariant).
    pub fn reconstruct_from_history(
        history_path: impl Into<PathBuf>,
        max_chain_duration_hours: i64,
    ) -> Result<Self, EngineError> {
        let history_path = history_path.into();
        let ledger = Self::new(history_path.clone(), max_chain_duration_hours);
        if !history_path.exists() {
            return Ok(ledger);
        }

        let mut reader = csv::Reader::from_path(&history_path)?;
        {
            let mut inner = ledger.inner.write();
            for result in reader.deserialize() {
                let row: HistoryRow = result?;
                match row.event.as_str() {
                    "OPEN" => {
                        inner.chains.entry(row.chain_id.clone()).or_insert(ChainState {
                            chain_id: row.chain_id.clone(),
                            symbol: row.symbol,
                            original_trade_id: row.original_trade_id,
                            current_generation: "O".to_string(),
                            cumulative_used_risk_pct: 0.0,
                            max_chain_loss_pct: row.max_chain_loss_pct,
                            opened_at_utc: row.recorded_at_utc,
                            combination_history: Vec::new(),
                            status: ChainStatus::Active,
                        });
                    }
                    "SIGNAL_EMITTED" => {
                        if let Some(chain) = inner.chains.get_mut(&row.chain_id) {
                            chain.combination_history.push(row.combination_id.clone());
                        }
                        inner.pending.insert(row.chain_id.clone(), row.tentative_risk_pct);
                    }
                    "ACK" => {
                        let tentative = inner.pending.remove(&row.chain_id).unwrap_or(0.0);
                        if let Some(chain) = inner.chains.get_mut(&row.chain_id) {
                            chain.cumulative_used_risk_pct += tentative;
                            if let Some(next) = Self::next_generation_label(&chain.current_generation)
                            {
                                chain.current_generation = next;
                            }
                        }
                    }
                    other if other.starts_with("REJECT:") || other.starts_with("TERMINATE:") => {
                        inner.pending.remove(&row.chain_id);
                        if let Some(chain) = inner.chains.get_mut(&row.chain_id) {
                            let reason_str = other.splitn(2, ':').nth(1).unwrap_or("");
                            if let Some(reason) = parse_termination_reason(reason_str) {
                                chain.status = ChainStatus::Terminated { reason };
                            }
                        }
                    }
                    other => {
                        warn!(event = other, "unrecognised chain history event — skipped");
                    }
                }
            }
        }
        info!(path = %history_path.display(), "chain ledger reconstructed from history");
        Ok(ledger)
    }
}

fn parse_termination_reason(s: &str) -> Option<ChainTerminationReason> {
    match s {
        "END_TRADING" => Some(ChainTerminationReason::EndTrading),
        "CHAIN_BUDGET_EXHAUSTED" => Some(ChainTerminationReason::ChainBudgetExhausted),
        "SUB_MIN_LOT" => Some(ChainTerminationReason::SubMinLot),
        "DURATION_EXPIRED" => Some(ChainTerminationReason::DurationExpired),
        "ACK_TIMEOUT" => Some(ChainTerminationReason::AckTimeout),
        "CLASSIFY_FAILURE" => Some(ChainTerminationReason::ClassifyFailure),
        "REJECT_TRADE" => Some(ChainTerminationReason::RejectTrade),
        _ => None,
    }
}

const HISTORY_HEADER: [&str; 10] = [
    "recorded_at_utc",
    "chain_id",
    "event",
    "combination_id",
    "symbol",
    "original_trade_id",
    "max_chain_loss_pct",
    "tentative_risk_pct",
    "cumulative_used_risk_pct",
    "status",
];

/// Append one serializable row to `path`, writing the header first if the
/// file is new, then fsync before releasing the handle.
fn append_csv_row(path: &Path, row: &HistoryRow) -> Result<(), EngineError> {
    let write_header = !path.exists();
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let file = OpenOptions::new().create(true).append(true).open(path)?;
    let mut wtr = csv::WriterBuilder::new()
        .has_headers(false)
        .from_writer(file);
    if write_header {
        wtr.write_record(HISTORY_HEADER)?;
    }
    wtr.serialize(row)?;
    wtr.flush()?;
    wtr.get_ref().sync_all()?;
    Ok(())
}

// =============================================================================
// Tests
// =============================================================================
#[cfg(test)]
mod tests {
    use super::*;

    fn ledger() -> (ChainLedger, tempfile::TempDir) {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("chain_history.csv");
        (ChainLedger::new(path, 24), dir)
    }

    #[test]
    fn ack_advances_cumulative_risk_and_generation() {
        let (ledger, _dir) = ledger();
        let now = Utc::now();
        ledger.open_chain("c1", "EURUSD", "t1", 8.0, now);
        ledger.on_signal_emitted("c1", "O:ECO_HIGH:FLASH:SHORT:WIN", 2.0).unwrap();
        ledger.on_ack("c1").unwrap();
        let chain = ledger.get("c1").unwrap();
        assert_eq!(chain.cumulative_used_risk_pct, 2.0);
        assert_eq!(chain.current_generation, "R1");
    }

    #[test]
    fn reject_rolls_back_tentative_and_terminates() {
        let (ledger, _dir) = ledger();
        let now = Utc::now();
        ledger.open_chain("c1", "EURUSD", "t1", 8.0, now);
        ledger.on_signal_emitted("c1", "O:ECO_HIGH:FLASH:SHORT:WIN", 2.0).unwrap();
        ledger.on_reject("c1", ChainTerminationReason::AckTimeout).unwrap();
        let chain = ledger.get("c1").unwrap();
        assert_eq!(chain.cumulative_used_risk_pct, 0.0);
        assert!(matches!(
            chain.status,
            ChainStatus::Terminated {
                reason: ChainTerminationReason::AckTimeout
            }
        ));
    }

    #[test]
    fn gc_expires_chains_past_max_duration() {
        let (ledger, _dir) = ledger();
        let opened = Utc::now() - Duration::hours(25);
        ledger.open_chain("c1", "EURUSD", "t1", 8.0, opened);
        let expired = ledger.gc_expired(Utc::now()).unwrap();
        assert_eq!(expired, vec!["c1".to_string()]);
        let chain = ledger.get("c1").unwrap();
        assert!(matches!(
            chain.status,
            ChainStatus::Terminated {
                reason: ChainTerminationReason::DurationExpired
            }
        ));
    }

    #[test]
    fn reconstruct_from_history_rebuilds_equivalent_state() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("chain_history.csv");
        let ledger = ChainLedger::new(&path, 24);
        let now = Utc::now();
        ledger.open_chain("c1", "EURUSD", "t1", 8.0, now);
        ledger.on_signal_emitted("c1", "O:ECO_HIGH:FLASH:SHORT:WIN", 2.0).unwrap();
        ledger.on_ack("c1").unwrap();

        let rebuilt = ChainLedger::reconstruct_from_history(&path, 24).unwrap();
        let chain = rebuilt.get("c1").unwrap();
        assert_eq!(chain.cumulative_used_risk_pct, 2.0);
        assert_eq!(chain.current_generation, "R1");
        assert_eq!(chain.symbol, "EURUSD");
    }

    #[test]
    fn reconstruct_from_missing_history_yields_empty_ledger() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("chain_history.csv");
        let rebuilt = ChainLedger::reconstruct_from_history(&path, 24).unwrap();
        assert!(rebuilt.get("c1").is_none());
    }

    #[test]
    fn reopening_an_existing_chain_is_a_no_op() {
        let (ledger, _dir) = ledger();
        let now = Utc::now();
        ledger.open_chain("c1", "EURUSD", "t1", 8.0, now);
        ledger.on_signal_emitted("c1", "O:ECO_HIGH:FLASH:SHORT:WIN", 2.0).unwrap();
        ledger.on_ack("c1").unwrap();
        ledger.open_chain("c1", "EURUSD", "t1", 8.0, now);
        assert_eq!(ledger.get("c1").unwrap().cumulative_used_risk_pct, 2.0);
    }
}
