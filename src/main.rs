// =============================================================================
// reentry-engine — Main Entry Point
// =============================================================================
//
// A single-threaded cooperative event loop: no tokio, no async. `run`
// repeatedly calls `Orchestrator::tick` and polls the response tail; there is
// no concurrency model to race against because there is exactly one thread
// driving the state machine (spec §4.7). Closed-trade events are read off
// stdin, one JSON object per line, so the engine composes with whatever
// out-of-scope adapter watches the broker.
// =============================================================================

mod app_state;
mod classifier;
mod config;
mod csv_bus;
mod decision_envelope;
mod errors;
mod ledger;
mod matrix;
mod orchestrator;
mod registry;
mod replay;
mod risk;
mod types;

use std::io::BufRead;

use chrono::Utc;
use clap::{Parser, Subcommand};
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use crate::app_state::{full_combination_universe, AppState};
use crate::classifier::{ClosedTradeEvent, NoCalendar};
use crate::config::EngineConfig;
use crate::csv_bus::ResponseTail;
use crate::errors::EngineError;
use crate::orchestrator::{OrchestratorOutcome, StandardForexInstruments};

const TICK_INTERVAL: std::time::Duration = std::time::Duration::from_millis(250);

#[derive(Parser)]
#[command(name = "reentry-engine", version, about = "Deterministic reentry decision engine")]
struct Cli {
    /// Root directory holding bridge/, config/, logs/ (spec §6.2).
    #[arg(long, env = "REENTRY_ROOT", default_value = "reentry")]
    root: std::path::PathBuf,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Start the engine against the configured root.
    Run,
    /// Validate a matrix_map.csv against the current registry and universe.
    ValidateMatrix {
        /// Path to the matrix CSV to validate. Defaults to `<root>/config/matrix_map.csv`.
        path: Option<std::path::PathBuf>,
    },
    /// Reconstruct the chain ledger from a historical responses stream.
    Replay {
        /// Path to `trade_responses.csv` to cross-check against chain_history.csv.
        responses: std::path::PathBuf,
    },
}

fn main() {
    let _ = dotenv::dotenv();
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let cli = Cli::parse();
    let exit_code = match cli.command {
        Command::Run => run(cli.root),
        Command::ValidateMatrix { path } => validate_matrix(cli.root, path),
        Command::Replay { responses } => replay_cmd(cli.root, responses),
    };
    std::process::exit(exit_code);
}

fn load_config(root: std::path::PathBuf) -> EngineConfig {
    EngineConfig::with_root(root)
}

fn run(root: std::path::PathBuf) -> i32 {
    let config = load_config(root);
    let state = match AppState::bootstrap(config) {
        Ok(state) => state,
        Err(err) => {
            error!(error = %err, "fatal error during startup");
            return err.exit_code();
        }
    };

    info!(root = %state.config.root.display(), "engine running — reading closed-trade events from stdin");

    let response_tail = ResponseTail::new(state.config.trade_responses_path());
    let stdin = std::io::stdin();
    let mut lines = stdin.lock().lines();

    loop {
        if let Err(err) = state.orchestrator.tick(Utc::now()) {
            error!(error = %err, "tick failed");
            state.push_error_with_code(err.to_string(), None);
        }

        match response_tail.poll() {
            Ok(rows) => {
                for result in rows {
                    match result {
                        Ok(row) => {
                            if let Err(err) = state.orchestrator.handle_response(&row) {
                                warn!(error = %err, "failed to process response row");
                                state.push_error_with_code(err.to_string(), None);
                            }
                        }
                        Err(err) => {
                            warn!(error = %err, "malformed response row skipped");
                            state.push_error_with_code(err.to_string(), None);
                        }
                    }
                }
            }
            Err(err) => {
                error!(error = %err, "response tail poll failed");
                return err.exit_code();
            }
        }

        match lines.next() {
            Some(Ok(line)) => {
                if line.trim().is_empty() {
                    continue;
                }
                process_closed_trade_line(&state, &line);
            }
            Some(Err(err)) => {
                error!(error = %err, "failed to read closed-trade event from stdin");
            }
            None => {
                std::thread::sleep(TICK_INTERVAL);
            }
        }
    }
}

fn process_closed_trade_line(state: &AppState, line: &str) {
    let event: ClosedTradeEvent = match serde_json::from_str(line) {
        Ok(event) => event,
        Err(err) => {
            warn!(error = %err, "malformed closed-trade event skipped");
            state.push_error_with_code(err.to_string(), None);
            return;
        }
    };

    let symbol_currency = event.symbol.get(..3).unwrap_or(&event.symbol).to_string();
    let chain_id = event
        .chain_id
        .clone()
        .unwrap_or_else(|| event.trade_id.clone());
    let (cumulative_used_risk_pct, original_trade_profitable) =
        match state.orchestrator.ledger().get(&chain_id) {
            // Reentry within an existing chain: the budget tier was fixed
            // when the chain opened and tracks the *original* leg, not
            // whichever trade is closing now.
            Some(chain) => (chain.cumulative_used_risk_pct, chain.max_chain_loss_pct > 10.0),
            // No chain yet — this event is itself the candidate original
            // leg, so its own P&L decides which budget tier a chain it
            // opens would get.
            None => (0.0, event.pnl_account_ccy > 0.0),
        };

    match state.orchestrator.handle_closed_trade(
        &event,
        &symbol_currency,
        &NoCalendar,
        &StandardForexInstruments,
        cumulative_used_risk_pct,
        original_trade_profitable,
    ) {
        Ok(outcome) => {
            log_outcome(&event, &outcome);
            state.record_outcome(&event.symbol, &outcome);
        }
        Err(err) => {
            error!(trade_id = %event.trade_id, error = %err, "failed to process closed trade");
            state.push_error_with_code(err.to_string(), None);
        }
    }
}

fn log_outcome(event: &ClosedTradeEvent, outcome: &OrchestratorOutcome) {
    match outcome {
        OrchestratorOutcome::AwaitingAck { chain_id } => {
            info!(trade_id = %event.trade_id, chain_id, "awaiting ack");
        }
        OrchestratorOutcome::ChainEnded { chain_id, reason } => {
            info!(trade_id = %event.trade_id, ?chain_id, reason = %reason, "chain ended");
        }
    }
}

fn validate_matrix(root: std::path::PathBuf, path: Option<std::path::PathBuf>) -> i32 {
    let config = load_config(root);
    let matrix_path = path.unwrap_or_else(|| config.matrix_map_path());

    let schema_path = config.parameters_schema_path();
    if !schema_path.exists() {
        if let Some(parent) = schema_path.parent() {
            let _ = std::fs::create_dir_all(parent);
        }
        match std::fs::write(
            &schema_path,
            serde_json::to_string_pretty(&registry::schema_document()).unwrap(),
        ) {
            Ok(()) => info!(path = %schema_path.display(), "parameters schema written"),
            Err(err) => warn!(error = %err, "failed to write parameters schema"),
        }
    }

    let registry = if config.parameter_sets_path().exists() {
        match registry::ParameterSetRegistry::load_from_json(config.parameter_sets_path()) {
            Ok(registry) => registry,
            Err(err) => {
                error!(error = %err, "registry invalid");
                return err.exit_code();
            }
        }
    } else {
        registry::ParameterSetRegistry::empty()
    };

    let universe = full_combination_universe();
    match matrix::MatrixStore::load(&matrix_path, &registry, &universe) {
        Ok(store) => {
            info!(path = %matrix_path.display(), count = store.len(), "matrix valid");
            0
        }
        Err(err) => {
            error!(path = %matrix_path.display(), error = %err, "matrix invalid");
            err.exit_code()
        }
    }
}

fn replay_cmd(root: std::path::PathBuf, responses: std::path::PathBuf) -> i32 {
    let config = load_config(root);
    match replay::replay(
        config.chain_history_path(),
        &responses,
        config.max_chain_duration_hours,
    ) {
        Ok((ledger, summary)) => {
            info!(
                chains_reconstructed = summary.chains_reconstructed,
                responses_examined = summary.responses_examined,
                mismatches = summary.mismatches.len(),
                "replay complete"
            );
            for mismatch in &summary.mismatches {
                warn!(%mismatch, "replay mismatch");
            }
            let _ = ledger;
            if summary.mismatches.is_empty() {
                0
            } else {
                EngineError::BusFatal("replay mismatches found".to_string()).exit_code()
            }
        }
        Err(err) => {
            error!(error = %err, "replay failed");
            err.exit_code()
        }
    }
}
