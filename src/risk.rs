// =============================================================================
// Risk & Sizing Engine — deterministic lot derivation from effective risk %
// =============================================================================
//
// `size` is a pure function: generation default reduction, outcome modifier,
// and breakout override compose into a single multiplier, which is capped at
// the global risk ceiling and then at the chain's remaining budget before the
// lot step rounds it down to something a broker will accept.
// =============================================================================

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::errors::ChainTerminationReason;
use crate::registry::{ParameterSet, MAX_RISK_CAP_PERCENT};
use crate::types::{Generation, Outcome};

/// Breakout classification derived from the originating trade's pip velocity.
/// Only consulted when that trade closed profitably.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum BreakoutClass {
    Flash,
    Fast,
    Normal,
    None,
}

impl BreakoutClass {
    /// Classify `|realized_pips|` against `elapsed_minutes` per spec §4.4.4.
    pub fn classify(realized_pips: f64, elapsed_minutes: f64) -> Self {
        let pips = realized_pips.abs();
        if pips < 20.0 {
            return Self::None;
        }
        if elapsed_minutes <= 5.0 {
            Self::Flash
        } else if elapsed_minutes <= 15.0 {
            Self::Fast
        } else if elapsed_minutes <= 30.0 {
            Self::Normal
        } else {
            Self::None
        }
    }

    /// The multiplier floor this classification imposes, if any. The
    /// override replaces the generation/outcome multiplier only when it is
    /// strictly higher.
    fn override_floor(&self) -> Option<f64> {
        match self {
            Self::Flash => Some(1.0),
            Self::Fast => Some(0.9),
            Self::Normal => Some(0.7),
            Self::None => None,
        }
    }
}

impl std::fmt::Display for BreakoutClass {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Flash => "FLASH_BREAKOUT",
            Self::Fast => "FAST_BREAKOUT",
            Self::Normal => "NORMAL_BREAKOUT",
            Self::None => "NONE",
        };
        write!(f, "{s}")
    }
}

/// Generation default risk reduction: `O -> 1.0, R1 -> 0.8, R2 -> 0.5`.
fn generation_default_reduction(generation: Generation) -> f64 {
    match generation {
        Generation::O => 1.0,
        Generation::R1 => 0.8,
        Generation::R2 => 0.5,
    }
}

/// Broker-side lot constraints, separate from the parameter set because they
/// describe the instrument/account, not the reentry strategy.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct BrokerLotConstraints {
    pub min_lot: f64,
    pub max_lot: f64,
    pub lot_step: f64,
}

/// Inputs to a single sizing decision (spec §4.4).
#[derive(Debug, Clone)]
pub struct SizingRequest<'a> {
    pub account_balance_now: f64,
    pub parameter_set: &'a ParameterSet,
    pub stop_loss_pips_effective: f64,
    pub instrument_pip_value_per_lot: f64,
    pub generation: Generation,
    pub outcome: Outcome,
    pub realized_pips: f64,
    pub elapsed_minutes: f64,
    pub cumulative_used_risk_pct: f64,
    pub original_trade_profitable: bool,
    pub broker: BrokerLotConstraints,
}

/// Outcome of a sizing attempt.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum SizingDecision {
    Sized {
        lots: f64,
        actual_risk_pct: f64,
        actual_risk_amount: f64,
        raw_risk_pct: f64,
        capped_by_chain_budget: bool,
        classification_used: BreakoutClass,
        rounded_down: bool,
    },
    EndTrading {
        reason: ChainTerminationReason,
    },
}

/// Standard chain risk budget; trades whose *original* leg closed profitably
/// get the wider budget instead (spec §4.4.6).
const STANDARD_CHAIN_BUDGET_PCT: f64 = 8.0;
const PROFITABLE_CHAIN_BUDGET_PCT: f64 = 15.0;

/// Derive the lot size for one reentry decision. Pure and deterministic: the
/// same request always yields the same decision.
pub fn size(request: &SizingRequest<'_>) -> SizingDecision {
    let raw_base =
        (request.parameter_set.global_risk_percent * request.parameter_set.risk_multiplier)
            .min(MAX_RISK_CAP_PERCENT);

    let generation_reduction = generation_default_reduction(request.generation);
    let outcome_modifier = request.outcome.risk_modifier();
    let mut multiplier = generation_reduction * outcome_modifier;
    let mut classification_used = BreakoutClass::None;

    if request.outcome.is_profitable() {
        let classification = BreakoutClass::classify(request.realized_pips, request.elapsed_minutes);
        if let Some(floor) = classification.override_floor() {
            if floor > multiplier {
                multiplier = floor;
                classification_used = classification;
            }
        }
    }

    let mut p = (raw_base * multiplier).min(MAX_RISK_CAP_PERCENT);
    let raw_risk_pct = p;

    let max_chain_loss_pct = if request.original_trade_profitable {
        PROFITABLE_CHAIN_BUDGET_PCT
    } else {
        STANDARD_CHAIN_BUDGET_PCT
    };
    let remaining = max_chain_loss_pct - request.cumulative_used_risk_pct;
    let capped_by_chain_budget = p > remaining;
    if capped_by_chain_budget {
        p = remaining;
    }

    if p <= 0.0 {
        debug!(
            remaining,
            max_chain_loss_pct, "chain budget exhausted — terminating chain"
        );
        return SizingDecision::EndTrading {
            reason: ChainTerminationReason::ChainBudgetExhausted,
        };
    }

    let risk_amount = request.account_balance_now * p / 100.0;
    let raw_lots =
        risk_amount / (request.stop_loss_pips_effective * request.instrument_pip_value_per_lot);

    let lot_step = request.broker.lot_step;
    let stepped = (raw_lots / lot_step).floor() * lot_step;
    let rounded_down = stepped + f64::EPSILON < raw_lots;
    let clamped = stepped.clamp(0.0, request.broker.max_lot);
    let lots = if clamped < request.broker.min_lot {
        0.0
    } else {
        clamped
    };

    if lots <= 0.0 {
        warn!(raw_lots, lot_step, "lot size below broker minimum — terminating chain");
        return SizingDecision::EndTrading {
            reason: ChainTerminationReason::SubMinLot,
        };
    }

    let actual_risk_amount =
        lots * request.stop_loss_pips_effective * request.instrument_pip_value_per_lot;
    let actual_risk_pct = actual_risk_amount / request.account_balance_now * 100.0;

    debug!(
        lots,
        actual_risk_pct,
        raw_risk_pct,
        capped_by_chain_budget,
        classification = %classification_used,
        "sizing decision computed"
    );

    SizingDecision::Sized {
        lots,
        actual_risk_pct,
        actual_risk_amount,
        raw_risk_pct,
        capped_by_chain_budget,
        classification_used,
        rounded_down,
    }
}

// =============================================================================
// Tests
// =============================================================================
#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{EntryOrderType, StopLossMethod, TakeProfitMethod};
    use std::collections::HashMap;

    fn parameter_set(global_risk_percent: f64, risk_multiplier: f64) -> ParameterSet {
        ParameterSet {
            parameter_set_id: "PS-test".into(),
            description: None,
            global_risk_percent,
            risk_multiplier,
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
            extra: HashMap::new(),
        }
    }

    fn broker() -> BrokerLotConstraints {
        BrokerLotConstraints {
            min_lot: 0.01,
            max_lot: 100.0,
            lot_step: 0.01,
        }
    }

    /// Spec §8.4 scenario 1: profitable fast breakout, first reentry.
    #[test]
    fn scenario_profitable_fast_breakout_first_reentry() {
        let set = parameter_set(3.0, 1.0);
        let request = SizingRequest {
            account_balance_now: 10_500.0,
            parameter_set: &set,
            stop_loss_pips_effective: 40.0,
            instrument_pip_value_per_lot: 1.0,
            generation: Generation::R1,
            outcome: Outcome::Win,
            realized_pips: 22.0,
            elapsed_minutes: 12.0,
            cumulative_used_risk_pct: 0.0,
            original_trade_profitable: true,
            broker: broker(),
        };
        match size(&request) {
            SizingDecision::Sized {
                lots,
                actual_risk_pct,
                raw_risk_pct,
                classification_used,
                ..
            } => {
                assert_eq!(classification_used, BreakoutClass::Fast);
                assert!((raw_risk_pct - 2.7).abs() < 1e-9);
                assert!((lots - 7.08).abs() < 1e-9);
                assert!((actual_risk_pct - 2.697142857142857).abs() < 1e-9);
            }
            other => panic!("expected Sized, got {other:?}"),
        }
    }

    /// Spec §8.4 scenario 2: chain budget exhausts on second reentry.
    #[test]
    fn scenario_chain_budget_exhausted() {
        let set = parameter_set(3.0, 1.0);
        let request = SizingRequest {
            account_balance_now: 10_000.0,
            parameter_set: &set,
            stop_loss_pips_effective: 40.0,
            instrument_pip_value_per_lot: 1.0,
            generation: Generation::R2,
            outcome: Outcome::Loss,
            realized_pips: -10.0,
            elapsed_minutes: 20.0,
            cumulative_used_risk_pct: 8.0,
            original_trade_profitable: false,
            broker: broker(),
        };
        assert!(matches!(
            size(&request),
            SizingDecision::EndTrading {
                reason: ChainTerminationReason::ChainBudgetExhausted
            }
        ));
    }

    /// Same scenario but the original trade closed profitably, unlocking the
    /// wider 15% budget — the second reentry now proceeds.
    #[test]
    fn scenario_profitable_original_unlocks_wider_budget() {
        let set = parameter_set(3.0, 1.0);
        let request = SizingRequest {
            account_balance_now: 10_000.0,
            parameter_set: &set,
            stop_loss_pips_effective: 40.0,
            instrument_pip_value_per_lot: 1.0,
            generation: Generation::R2,
            outcome: Outcome::Loss,
            realized_pips: -10.0,
            elapsed_minutes: 20.0,
            cumulative_used_risk_pct: 8.0,
            original_trade_profitable: true,
            broker: broker(),
        };
        assert!(matches!(size(&request), SizingDecision::Sized { .. }));
    }

    #[test]
    fn raw_base_caps_at_max_risk_percent() {
        let set = parameter_set(3.5, 1.2);
        let request = SizingRequest {
            account_balance_now: 10_000.0,
            parameter_set: &set,
            stop_loss_pips_effective: 40.0,
            instrument_pip_value_per_lot: 1.0,
            generation: Generation::O,
            outcome: Outcome::Win,
            realized_pips: 0.0,
            elapsed_minutes: 90.0,
            cumulative_used_risk_pct: 0.0,
            original_trade_profitable: false,
            broker: broker(),
        };
        match size(&request) {
            SizingDecision::Sized { raw_risk_pct, .. } => {
                assert!((raw_risk_pct - MAX_RISK_CAP_PERCENT).abs() < 1e-9);
            }
            other => panic!("expected Sized, got {other:?}"),
        }
    }

    #[test]
    fn sub_min_lot_terminates_chain() {
        let set = parameter_set(0.05, 0.5);
        let request = SizingRequest {
            account_balance_now: 200.0,
            parameter_set: &set,
            stop_loss_pips_effective: 200.0,
            instrument_pip_value_per_lot: 10.0,
            generation: Generation::R2,
            outcome: Outcome::Loss,
            realized_pips: -5.0,
            elapsed_minutes: 20.0,
            cumulative_used_risk_pct: 0.0,
            original_trade_profitable: false,
            broker: broker(),
        };
        assert!(matches!(
            size(&request),
            SizingDecision::EndTrading {
                reason: ChainTerminationReason::SubMinLot
            }
        ));
    }

    #[test]
    fn sizing_is_monotone_in_stop_loss_pips() {
        let set = parameter_set(2.0, 1.0);
        let lots_at = |sl_pips: f64| -> f64 {
            let request = SizingRequest {
                account_balance_now: 10_000.0,
                parameter_set: &set,
                stop_loss_pips_effective: sl_pips,
                instrument_pip_value_per_lot: 1.0,
                generation: Generation::O,
                outcome: Outcome::Loss,
                realized_pips: -10.0,
                elapsed_minutes: 20.0,
                cumulative_used_risk_pct: 0.0,
                original_trade_profitable: false,
                broker: broker(),
            };
            match size(&request) {
                SizingDecision::Sized { lots, .. } => lots,
                SizingDecision::EndTrading { .. } => 0.0,
            }
        };
        assert!(lots_at(80.0) <= lots_at(40.0));
    }

    #[test]
    fn sizing_is_monotone_in_account_balance() {
        let set = parameter_set(2.0, 1.0);
        let lots_at = |balance: f64| -> f64 {
            let request = SizingRequest {
                account_balance_now: balance,
                parameter_set: &set,
                stop_loss_pips_effective: 40.0,
                instrument_pip_value_per_lot: 1.0,
                generation: Generation::O,
                outcome: Outcome::Loss,
                realized_pips: -10.0,
                elapsed_minutes: 20.0,
                cumulative_used_risk_pct: 0.0,
                original_trade_profitable: false,
                broker: broker(),
            };
            match size(&request) {
                SizingDecision::Sized { lots, .. } => lots,
                SizingDecision::EndTrading { .. } => 0.0,
            }
        };
        assert!(lots_at(5_000.0) <= lots_at(10_000.0));
    }
}
