// =============================================================================
// Decision Orchestrator — the state machine wiring every component together
// =============================================================================
//
// States: Idle, Classifying, Resolving, Sizing, Emitting, AwaitingAck,
// ChainUpdating, Terminal (spec §4.7). Because the ACK wait is a logical
// timer serviced by the event loop rather than a blocking call, this engine
// splits into three entry points instead of one long-lived state object:
//
//   - `handle_closed_trade` drives Idle -> ... -> Emitting -> AwaitingAck (or
//     straight to Terminal on END_TRADING / a classify failure).
//   - `handle_response` drives AwaitingAck -> ChainUpdating -> Idle/Terminal
//     when an ACK/NACK arrives off the response tail.
//   - `tick` services the ACK-timeout and chain-duration timers.
//
// Failure semantics from spec §4.7: bus contention retries locally (bounded
// by `order_retry_attempts`); schema/risk/classifier errors surface as a
// chain termination and the service keeps running; a matrix/registry defect
// at startup is fatal and handled by the caller before the orchestrator is
// ever constructed.
// =============================================================================

use std::collections::HashMap;
use std::path::Path;

use chrono::{DateTime, Duration as ChronoDuration, Utc};
use parking_lot::RwLock;
use tracing::{info, warn};

use crate::classifier::{classify, CalendarLookup, ClosedTradeEvent, CombinationId};
use crate::config::EngineConfig;
use crate::csv_bus::{CsvSignalBus, ResponseRow, SignalAction, SignalRow};
use crate::errors::{ChainTerminationReason, EngineError};
use crate::ledger::ChainLedger;
use crate::matrix::{MatrixResponse, MatrixStore};
use crate::registry::ParameterSetRegistry;
use crate::risk::{self, BrokerLotConstraints, SizingDecision, SizingRequest};
use crate::types::{EntryMethod, Generation};

/// Instrument facts the sizing engine needs that the combination key and
/// parameter set do not carry.
pub trait InstrumentInfo {
    fn pip_value_per_lot(&self, symbol: &str) -> f64;
    fn lot_constraints(&self, symbol: &str) -> BrokerLotConstraints;
}

/// Conservative standard-lot forex defaults, used by tests and by operators
/// who have not wired up a real instrument catalogue.
pub struct StandardForexInstruments;

impl InstrumentInfo for StandardForexInstruments {
    fn pip_value_per_lot(&self, _symbol: &str) -> f64 {
        10.0
    }
    fn lot_constraints(&self, _symbol: &str) -> BrokerLotConstraints {
        BrokerLotConstraints {
            min_lot: 0.01,
            max_lot: 100.0,
            lot_step: 0.01,
        }
    }
}

/// Terminal (for this call) result of processing one closed-trade event.
#[derive(Debug, Clone, PartialEq)]
pub enum OrchestratorOutcome {
    /// A `TRADE_SIGNAL` was emitted; the chain is now waiting on an ACK.
    AwaitingAck { chain_id: String },
    /// The chain ended without emitting a signal (`END_TRADING`, budget
    /// exhaustion, sub-min lot, or a classify failure).
    ChainEnded {
        chain_id: Option<String>,
        reason: ChainTerminationReason,
    },
}

struct PendingAck {
    chain_id: String,
    deadline_utc: DateTime<Utc>,
    retries_remaining: u32,
}

/// Ties the Combination Classifier, Matrix Store, Parameter Set Registry,
/// Risk & Sizing Engine, Chain Ledger, and CSV Signal Bus into the state
/// machine from spec §4.7.
pub struct Orchestrator {
    matrix: MatrixStore,
    registry: ParameterSetRegistry,
    ledger: ChainLedger,
    bus: CsvSignalBus,
    config: EngineConfig,
    /// Tracks the active chain for a symbol — the wire format carries
    /// `symbol` + `combination_id`, never `chain_id` (spec §5: each chain
    /// lives in exactly one symbol), so this is the bridge between them.
    chain_by_symbol: RwLock<HashMap<String, String>>,
    pending: RwLock<HashMap<String, PendingAck>>,
}

impl Orchestrator {
    pub fn new(
        matrix: MatrixStore,
        registry: ParameterSetRegistry,
        ledger: ChainLedger,
        bus: CsvSignalBus,
        config: EngineConfig,
    ) -> Self {
        Self {
            matrix,
            registry,
            ledger,
            bus,
            config,
            chain_by_symbol: RwLock::new(HashMap::new()),
            pending: RwLock::new(HashMap::new()),
        }
    }

    /// Idle -> Classifying -> Resolving -> (Sizing -> Emitting -> AwaitingAck)
    /// | ChainUpdating -> Terminal.
    pub fn handle_closed_trade(
        &self,
        event: &ClosedTradeEvent,
        symbol_currency: &str,
        calendar: &dyn CalendarLookup,
        instruments: &dyn InstrumentInfo,
        cumulative_used_risk_pct: f64,
        original_trade_profitable: bool,
    ) -> Result<OrchestratorOutcome, EngineError> {
        let chain_id = event
            .chain_id
            .clone()
            .unwrap_or_else(|| event.trade_id.clone());

        let combination_id = match classify(event, symbol_currency, calendar) {
            Ok(id) => id,
            Err(err) => {
                warn!(trade_id = %event.trade_id, error = %err, "classification failed");
                self.ledger
                    .terminate(&chain_id, ChainTerminationReason::ClassifyFailure)?;
                return Ok(OrchestratorOutcome::ChainEnded {
                    chain_id: Some(chain_id),
                    reason: ChainTerminationReason::ClassifyFailure,
                });
            }
        };

        let response = self.matrix.resolve(&combination_id).ok_or_else(|| {
            EngineError::MatrixIncomplete(combination_id.canonical())
        })?;

        match response {
            MatrixResponse::EndTrading { .. } => {
                self.ledger
                    .terminate(&chain_id, ChainTerminationReason::EndTrading)?;
                self.chain_by_symbol.write().remove(&event.symbol);
                Ok(OrchestratorOutcome::ChainEnded {
                    chain_id: Some(chain_id),
                    reason: ChainTerminationReason::EndTrading,
                })
            }
            MatrixResponse::Reentry {
                parameter_set_id, ..
            } => self.resolve_reentry(
                event,
                &chain_id,
                &combination_id,
                &combination_id.generation.next().unwrap_or(Generation::R2),
                &parameter_set_id,
                instruments,
                cumulative_used_risk_pct,
                original_trade_profitable,
            ),
        }
    }

    #[allow(clippy::too_many_arguments)]
    fn resolve_reentry(
        &self,
        event: &ClosedTradeEvent,
        chain_id: &str,
        combination_id: &CombinationId,
        next_generation: &Generation,
        parameter_set_id: &str,
        instruments: &dyn InstrumentInfo,
        cumulative_used_risk_pct: f64,
        original_trade_profitable: bool,
    ) -> Result<OrchestratorOutcome, EngineError> {
        let parameter_set = self
            .registry
            .get(parameter_set_id)
            .ok_or_else(|| EngineError::RegistryReference(parameter_set_id.to_string()))?;

        let max_chain_loss_pct = if original_trade_profitable { 15.0 } else { 8.0 };
        if event.generation == "O" {
            self.ledger
                .open_chain(chain_id, &event.symbol, &event.trade_id, max_chain_loss_pct, Utc::now());
            self.chain_by_symbol
                .write()
                .insert(event.symbol.clone(), chain_id.to_string());
        }

        let outcome: crate::types::Outcome = event.outcome.parse()?;
        let stop_loss_pips_effective = parameter_set.stop_loss_pips.unwrap_or(40.0);

        let request = SizingRequest {
            account_balance_now: event.last_known_balance,
            parameter_set: &parameter_set,
            stop_loss_pips_effective,
            instrument_pip_value_per_lot: instruments.pip_value_per_lot(&event.symbol),
            generation: *next_generation,
            outcome,
            realized_pips: event.realized_pips,
            elapsed_minutes: event.elapsed_minutes(),
            cumulative_used_risk_pct,
            original_trade_profitable,
            broker: instruments.lot_constraints(&event.symbol),
        };

        match risk::size(&request) {
            SizingDecision::EndTrading { reason } => {
                self.ledger.terminate(chain_id, reason)?;
                self.chain_by_symbol.write().remove(&event.symbol);
                Ok(OrchestratorOutcome::ChainEnded {
                    chain_id: Some(chain_id.to_string()),
                    reason,
                })
            }
            SizingDecision::Sized {
                lots,
                actual_risk_pct,
                ..
            } => self.emit_and_await_ack(
                event,
                chain_id,
                combination_id,
                parameter_set_id,
                &parameter_set,
                lots,
                actual_risk_pct,
            ),
        }
    }

    /// Append `row` to the bus, retrying locally on bus contention up to
    /// `order_retry_attempts` before surfacing the error.
    fn emit_with_retry(&self, row: &SignalRow, chain_id: &str) -> Result<(), EngineError> {
        let mut attempts = 0;
        loop {
            match self.bus.emit(row) {
                Ok(()) => return Ok(()),
                Err(EngineError::BusContention { .. }) if attempts < self.config.order_retry_attempts => {
                    attempts += 1;
                    warn!(chain_id, attempts, action = %row.action, "bus contention on emit — retrying locally");
                    std::thread::sleep(std::time::Duration::from_millis(200 * attempts as u64));
                }
                Err(err) => return Err(err),
            }
        }
    }

    #[allow(clippy::too_many_arguments)]
    fn emit_and_await_ack(
        &self,
        event: &ClosedTradeEvent,
        chain_id: &str,
        combination_id: &CombinationId,
        parameter_set_id: &str,
        parameter_set: &crate::registry::ParameterSet,
        lots: f64,
        actual_risk_pct: f64,
    ) -> Result<OrchestratorOutcome, EngineError> {
        let combination_id_str = combination_id.canonical();
        let entry_method = EntryMethod::from(parameter_set.entry_order_type);

        let update_payload = serde_json::json!({
            "global_risk_percent": parameter_set.global_risk_percent,
            "risk_multiplier": parameter_set.risk_multiplier,
            "stop_loss_method": parameter_set.stop_loss_method.as_str(),
            "stop_loss_pips": parameter_set.stop_loss_pips,
            "take_profit_method": parameter_set.take_profit_method.as_str(),
            "take_profit_pips": parameter_set.take_profit_pips,
            "entry_method": entry_method.as_str(),
        });
        let update_row = SignalRow::new(
            event.symbol.as_str(),
            combination_id_str.as_str(),
            SignalAction::UpdateParams,
            parameter_set_id,
            &update_payload,
        );
        self.emit_with_retry(&update_row, chain_id)?;

        let payload = serde_json::json!({
            "lots": lots,
            "symbol": event.symbol,
            "trade_id": event.trade_id,
            "entry_method": entry_method.as_str(),
        });
        let row = SignalRow::new(
            event.symbol.as_str(),
            combination_id_str.as_str(),
            SignalAction::TradeSignal,
            parameter_set_id,
            &payload,
        );
        self.emit_with_retry(&row, chain_id)?;

        self.ledger
            .on_signal_emitted(chain_id, &combination_id_str, actual_risk_pct)?;

        if let Err(err) = append_parameter_log_row(
            &self.config.parameter_log_path(),
            &event.symbol,
            &combination_id_str,
            parameter_set,
        ) {
            warn!(chain_id, error = %err, "failed to append parameter log row");
        }

        let deadline_utc = Utc::now() + ChronoDuration::seconds(self.config.ack_grace_seconds as i64);
        self.pending.write().insert(
            event.symbol.clone(),
            PendingAck {
                chain_id: chain_id.to_string(),
                deadline_utc,
                retries_remaining: self.config.order_retry_attempts,
            },
        );

        info!(chain_id, lots, actual_risk_pct, "trade signal emitted — awaiting ack");
        Ok(OrchestratorOutcome::AwaitingAck {
            chain_id: chain_id.to_string(),
        })
    }

    /// AwaitingAck -> ChainUpdating -> Idle | Terminal, driven by one row
    /// read off `trade_responses.csv`.
    pub fn handle_response(&self, row: &ResponseRow) -> Result<(), EngineError> {
        match row.action.as_str() {
            "ACK_UPDATE" => {
                info!(symbol = %row.symbol, combination_id = %row.combination_id, "parameter update acknowledged");
                return Ok(());
            }
            "REJECT_SET" => {
                warn!(symbol = %row.symbol, combination_id = %row.combination_id, ea_code = %row.ea_code, "parameter set update rejected");
                return Ok(());
            }
            _ => {}
        }

        let chain_id = match self.pending.write().remove(&row.symbol) {
            Some(pending) => pending.chain_id,
            None => return Ok(()), // unmatched or duplicate response — nothing pending
        };

        match (row.action.as_str(), row.status.as_str()) {
            ("ACK_TRADE", "OK") => {
                self.ledger.on_ack(&chain_id)?;
                info!(chain_id, "ack received — chain advanced");
            }
            _ => {
                self.ledger.on_reject(&chain_id, ChainTerminationReason::RejectTrade)?;
                self.chain_by_symbol.write().remove(&row.symbol);
                warn!(chain_id, action = %row.action, status = %row.status, "trade rejected");
            }
        }
        Ok(())
    }

    /// Emit a `CANCEL_PENDING` row for `chain_id`'s outstanding order before
    /// the chain is torn down. Best-effort: a failure here is logged, not
    /// propagated, since the chain is terminating either way.
    fn emit_cancel_pending(&self, chain_id: &str) {
        let chain = match self.ledger.get(chain_id) {
            Some(chain) => chain,
            None => return,
        };
        let combination_id = chain.combination_history.last().cloned().unwrap_or_default();
        let payload = serde_json::json!({ "chain_id": chain_id });
        let row = SignalRow::new(
            chain.symbol.as_str(),
            combination_id.as_str(),
            SignalAction::CancelPending,
            "",
            &payload,
        );
        if let Err(err) = self.emit_with_retry(&row, chain_id) {
            warn!(chain_id, error = %err, "failed to emit cancel_pending signal");
        }
    }

    /// Services the ACK-timeout and chain-duration-expiry timers. Should be
    /// invoked on every turn of the event loop.
    pub fn tick(&self, now_utc: DateTime<Utc>) -> Result<(), EngineError> {
        let expired_symbols: Vec<(String, String)> = {
            let pending = self.pending.read();
            pending
                .iter()
                .filter(|(_, p)| now_utc > p.deadline_utc)
                .map(|(symbol, p)| (symbol.clone(), p.chain_id.clone()))
                .collect()
        };
        for (symbol, chain_id) in expired_symbols {
            self.pending.write().remove(&symbol);
            self.chain_by_symbol.write().remove(&symbol);
            self.emit_cancel_pending(&chain_id);
            self.ledger.on_reject(&chain_id, ChainTerminationReason::AckTimeout)?;
            warn!(chain_id, "ack timeout — chain terminated");
        }

        for chain_id in self.ledger.gc_expired(now_utc)? {
            self.emit_cancel_pending(&chain_id);
            if let Some(chain) = self.ledger.get(&chain_id) {
                self.chain_by_symbol.write().remove(&chain.symbol);
            }
            warn!(chain_id, "chain duration expired");
        }
        Ok(())
    }

    /// Attempt a transactional matrix reload. Previous map is retained on
    /// any validation failure (spec §4.2).
    pub fn reload_matrix(
        &self,
        path: impl AsRef<Path>,
        universe: &[CombinationId],
    ) -> Result<(), EngineError> {
        self.matrix.reload(path, &self.registry, universe)
    }

    /// Attempt a transactional parameter set registry reload. Previous map
    /// is retained on any validation failure (spec §4.3).
    pub fn reload_registry(&self, path: impl AsRef<Path>) -> Result<(), EngineError> {
        self.registry.reload_from_json(path)
    }

    pub fn registry(&self) -> &ParameterSetRegistry {
        &self.registry
    }

    pub fn ledger(&self) -> &ChainLedger {
        &self.ledger
    }

    pub fn matrix(&self) -> &MatrixStore {
        &self.matrix
    }
}

/// Append one row to `parameter_log.csv` (spec §6.2) for every accepted
/// parameter-set emission, echoing the resolved parameter set and the
/// combination that produced it. Append-only, mirroring the
/// create-dir-all / write-header-if-new / append / flush / sync_all
/// discipline `ledger.rs` uses for `chain_history.csv`.
fn append_parameter_log_row(
    path: &Path,
    symbol: &str,
    combination_id: &str,
    parameter_set: &crate::registry::ParameterSet,
) -> Result<(), EngineError> {
    #[derive(serde::Serialize)]
    struct ParameterLogRow<'a> {
        recorded_at_utc: DateTime<Utc>,
        symbol: &'a str,
        combination_id: &'a str,
        parameter_set_id: &'a str,
        global_risk_percent: f64,
        risk_multiplier: f64,
        stop_loss_method: &'static str,
        take_profit_method: &'static str,
        entry_order_type: &'static str,
    }

    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let write_header = !path.exists();
    let file = std::fs::OpenOptions::new().create(true).append(true).open(path)?;
    let mut wtr = csv::WriterBuilder::new().has_headers(false).from_writer(&file);
    if write_header {
        wtr.write_record([
            "recorded_at_utc",
            "symbol",
            "combination_id",
            "parameter_set_id",
            "global_risk_percent",
            "risk_multiplier",
            "stop_loss_method",
            "take_profit_method",
            "entry_order_type",
        ])?;
    }
    wtr.serialize(ParameterLogRow {
        recorded_at_utc: Utc::now(),
        symbol,
        combination_id,
        parameter_set_id: &parameter_set.parameter_set_id,
        global_risk_percent: parameter_set.global_risk_percent,
        risk_multiplier: parameter_set.risk_multiplier,
        stop_loss_method: parameter_set.stop_loss_method.as_str(),
        take_profit_method: parameter_set.take_profit_method.as_str(),
        entry_order_type: parameter_set.entry_order_type.as_str(),
    })?;
    wtr.flush()?;
    file.sync_all()?;
    Ok(())
}

// =============================================================================
// Tests
// =============================================================================
#[cfg(test)]
mod tests {
    use super::*;
    use crate::classifier::NoCalendar;
    use crate::registry::ParameterSet;
    use crate::types::{EntryOrderType, StopLossMethod, TakeProfitMethod};
    use std::collections::HashMap as Map;

    fn parameter_set() -> ParameterSet {
        ParameterSet {
            parameter_set_id: "PS-base".into(),
            description: None,
            global_risk_percent: 2.0,
            risk_multiplier: 1.0,
            stop_loss_method: StopLossMethod::Fixed,
            stop_loss_pips: Some(40.0),
            stop_loss_percent: None,
            sl_atr_multiple: None,
            sl_atr_period: None,
            sl_atr_timeframe: None,
            take_profit_method: TakeProfitMethod::Fixed,
            take_profit_pips: Some(80.0),
            tp_atr_multiple: None,
            tp_atr_period: None,
            tp_atr_timeframe: None,
            entry_order_type: EntryOrderType::Market,
            straddle_distance_buy_pips: None,
            straddle_distance_sell_pips: None,
            reentry_risk_method: None,
            extra: Map::new(),
        }
    }

    fn event() -> ClosedTradeEvent {
        ClosedTradeEvent {
            trade_id: "t1".into(),
            chain_id: Some("c1".into()),
            symbol: "EURUSD".into(),
            signal: "EQUITY_OPEN_USA".into(),
            opened_at_utc: "2026-01-01T00:00:00Z".parse().unwrap(),
            closed_at_utc: "2026-01-01T00:10:00Z".parse().unwrap(),
            outcome: "LOSS".into(),
            realized_pips: -10.0,
            realized_pnl_quote: -100.0,
            pnl_account_ccy: -100.0,
            generation: "O".into(),
            last_known_balance: 10_000.0,
        }
    }

    fn build_orchestrator(dir: &std::path::Path) -> Orchestrator {
        let registry = ParameterSetRegistry::empty();
        registry.insert(parameter_set()).unwrap();

        use crate::classifier::CombinationId;
        use crate::types::{Outcome, Proximity};
        let universe = vec![CombinationId::new(
            Generation::O,
            crate::types::SignalClass::EquityOpenUsa,
            None,
            Proximity::Extended,
            Outcome::Loss,
        )];

        let matrix_csv = dir.join("matrix_map.csv");
        std::fs::write(
            &matrix_csv,
            format!(
                "combination_id,response_type,parameter_set_id,notes\n{},REENTRY,PS-base,\n",
                universe[0].canonical()
            ),
        )
        .unwrap();
        let matrix = MatrixStore::load(&matrix_csv, &registry, &universe).unwrap();

        let ledger = ChainLedger::new(dir.join("chain_history.csv"), 24);
        let bus = CsvSignalBus::new(dir.join("trading_signals.csv"));
        let config = EngineConfig {
            root: dir.to_path_buf(),
            ack_grace_seconds: 30,
            ..EngineConfig::default()
        };
        Orchestrator::new(matrix, registry, ledger, bus, config)
    }

    #[test]
    fn emits_trade_signal_and_awaits_ack() {
        let dir = tempfile::tempdir().unwrap();
        let orchestrator = build_orchestrator(dir.path());
        let outcome = orchestrator
            .handle_closed_trade(
                &event(),
                "USD",
                &NoCalendar,
                &StandardForexInstruments,
                0.0,
                false,
            )
            .unwrap();
        assert!(matches!(outcome, OrchestratorOutcome::AwaitingAck { .. }));

        let mut reader = csv::ReaderBuilder::new()
            .has_headers(true)
            .from_path(dir.path().join("trading_signals.csv"))
            .unwrap();
        let rows: Vec<SignalRow> = reader
            .deserialize()
            .collect::<Result<_, _>>()
            .unwrap();
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0].action, "UPDATE_PARAMS");
        assert_eq!(rows[1].action, "TRADE_SIGNAL");
    }

    #[test]
    fn ack_update_does_not_disturb_pending_trade_ack() {
        let dir = tempfile::tempdir().unwrap();
        let orchestrator = build_orchestrator(dir.path());
        orchestrator
            .handle_closed_trade(&event(), "USD", &NoCalendar, &StandardForexInstruments, 0.0, false)
            .unwrap();

        let ack_update = ResponseRow {
            version: "3.0".into(),
            timestamp_utc: Utc::now(),
            symbol: "EURUSD".into(),
            combination_id: "c1".into(),
            action: "ACK_UPDATE".into(),
            status: "OK".into(),
            ea_code: "0".into(),
            detail_json: None,
        };
        orchestrator.handle_response(&ack_update).unwrap();
        assert!(orchestrator.pending.read().contains_key("EURUSD"));
    }

    #[test]
    fn ack_timeout_emits_cancel_pending() {
        let dir = tempfile::tempdir().unwrap();
        let orchestrator = build_orchestrator(dir.path());
        orchestrator
            .handle_closed_trade(&event(), "USD", &NoCalendar, &StandardForexInstruments, 0.0, false)
            .unwrap();

        let far_future = Utc::now() + ChronoDuration::seconds(3600);
        orchestrator.tick(far_future).unwrap();

        let mut reader = csv::ReaderBuilder::new()
            .has_headers(true)
            .from_path(dir.path().join("trading_signals.csv"))
            .unwrap();
        let rows: Vec<SignalRow> = reader
            .deserialize()
            .collect::<Result<_, _>>()
            .unwrap();
        assert!(rows.iter().any(|r| r.action == "CANCEL_PENDING"));
    }

    #[test]
    fn ack_advances_chain_to_idle() {
        let dir = tempfile::tempdir().unwrap();
        let orchestrator = build_orchestrator(dir.path());
        orchestrator
            .handle_closed_trade(&event(), "USD", &NoCalendar, &StandardForexInstruments, 0.0, false)
            .unwrap();

        let response = ResponseRow {
            version: "3.0".into(),
            timestamp_utc: Utc::now(),
            symbol: "EURUSD".into(),
            combination_id: "c1".into(),
            action: "ACK_TRADE".into(),
            status: "OK".into(),
            ea_code: "0".into(),
            detail_json: None,
        };
        orchestrator.handle_response(&response).unwrap();
        let chain = orchestrator.ledger.get("c1").unwrap();
        assert!(chain.cumulative_used_risk_pct > 0.0);
    }

    #[test]
    fn classify_failure_terminates_chain_without_emitting() {
        let dir = tempfile::tempdir().unwrap();
        let orchestrator = build_orchestrator(dir.path());
        let mut bad_event = event();
        bad_event.signal = "NOT_A_SIGNAL".into();
        let outcome = orchestrator
            .handle_closed_trade(&bad_event, "USD", &NoCalendar, &StandardForexInstruments, 0.0, false)
            .unwrap();
        assert!(matches!(
            outcome,
            OrchestratorOutcome::ChainEnded {
                reason: ChainTerminationReason::ClassifyFailure,
                ..
            }
        ));
    }

    #[test]
    fn ack_timeout_rolls_back_via_tick() {
        let dir = tempfile::tempdir().unwrap();
        let orchestrator = build_orchestrator(dir.path());
        orchestrator
            .handle_closed_trade(&event(), "USD", &NoCalendar, &StandardForexInstruments, 0.0, false)
            .unwrap();

        let far_future = Utc::now() + ChronoDuration::seconds(3600);
        orchestrator.tick(far_future).unwrap();

        let chain = orchestrator.ledger.get("c1").unwrap();
        assert!(matches!(
            chain.status,
            crate::ledger::ChainStatus::Terminated {
                reason: ChainTerminationReason::AckTimeout
            }
        ));
    }
}
