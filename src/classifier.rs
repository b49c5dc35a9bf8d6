// =============================================================================
// Combination Classifier — maps a closed trade to a unique CombinationId
// =============================================================================
//
// `classify` is a pure function: given a closed-trade event and a calendar
// lookup, it derives the five (or four, for non-ECO signals) components of
// the combination key and renders them through `CombinationId`'s canonical
// grammar. Errors here are fatal for the *current* event only — the
// orchestrator terminates that one chain with `CLASSIFY_FAILURE` and keeps
// serving other events.
// =============================================================================

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::errors::EngineError;
use crate::types::{DurationBucket, Generation, Outcome, Proximity, SignalClass};

/// Canonical combination key: `gen:sig[:dur]:prox:outc`.
///
/// The `dur` segment is present iff `sig` is ECO-class (`ECO_HIGH` or
/// `ECO_MED`). Producers must always go through [`CombinationId::new`] so the
/// grammar stays canonical.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct CombinationId {
    pub generation: Generation,
    pub signal: SignalClass,
    pub duration: Option<DurationBucket>,
    pub proximity: Proximity,
    pub outcome: Outcome,
}

impl CombinationId {
    pub fn new(
        generation: Generation,
        signal: SignalClass,
        duration: Option<DurationBucket>,
        proximity: Proximity,
        outcome: Outcome,
    ) -> Self {
        let duration = if signal.is_eco_class() { duration } else { None };
        Self {
            generation,
            signal,
            duration,
            proximity,
            outcome,
        }
    }

    /// Render the canonical textual key, e.g. `R1:ECO_HIGH:QUICK:SHORT:LOSS`.
    pub fn canonical(&self) -> String {
        match self.duration {
            Some(dur) => format!(
                "{}:{}:{}:{}:{}",
                self.generation, self.signal, dur, self.proximity, self.outcome
            ),
            None => format!(
                "{}:{}:{}:{}",
                self.generation, self.signal, self.proximity, self.outcome
            ),
        }
    }

    /// Parse the canonical textual key back into a `CombinationId`.
    pub fn parse(s: &str) -> Result<Self, EngineError> {
        let parts: Vec<&str> = s.split(':').collect();
        let generation: Generation = parts
            .first()
            .ok_or_else(|| EngineError::InvalidCombination(s.to_string()))?
            .parse()?;
        let signal: SignalClass = parts
            .get(1)
            .ok_or_else(|| EngineError::InvalidCombination(s.to_string()))?
            .parse()?;

        let (duration, prox_idx) = if signal.is_eco_class() {
            let dur: DurationBucket = parts
                .get(2)
                .ok_or_else(|| EngineError::InvalidCombination(s.to_string()))?
                .parse()?;
            (Some(dur), 3)
        } else {
            (None, 2)
        };

        let proximity: Proximity = parts
            .get(prox_idx)
            .ok_or_else(|| EngineError::InvalidCombination(s.to_string()))?
            .parse()?;
        let outcome: Outcome = parts
            .get(prox_idx + 1)
            .ok_or_else(|| EngineError::InvalidCombination(s.to_string()))?
            .parse()?;

        if parts.len() != prox_idx + 2 {
            return Err(EngineError::InvalidCombination(s.to_string()));
        }

        Ok(Self {
            generation,
            signal,
            duration,
            proximity,
            outcome,
        })
    }
}

impl std::fmt::Display for CombinationId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.canonical())
    }
}

impl TryFrom<String> for CombinationId {
    type Error = EngineError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(&value)
    }
}

impl From<CombinationId> for String {
    fn from(value: CombinationId) -> Self {
        value.canonical()
    }
}

// ---------------------------------------------------------------------------
// Closed trade event (classifier input)
// ---------------------------------------------------------------------------

/// A closed-trade event as reported by the (out-of-scope) execution adapter.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClosedTradeEvent {
    pub trade_id: String,
    #[serde(default)]
    pub chain_id: Option<String>,
    pub symbol: String,
    /// Raw signal class string, validated during classification.
    pub signal: String,
    pub opened_at_utc: DateTime<Utc>,
    pub closed_at_utc: DateTime<Utc>,
    /// Raw outcome string, validated during classification.
    pub outcome: String,
    pub realized_pips: f64,
    pub realized_pnl_quote: f64,
    pub pnl_account_ccy: f64,
    /// Raw generation string, validated during classification.
    pub generation: String,
    pub last_known_balance: f64,
}

impl ClosedTradeEvent {
    /// Elapsed time between open and close, in minutes. Never negative;
    /// same-tick trades report `0.0`.
    pub fn elapsed_minutes(&self) -> f64 {
        let delta = self.closed_at_utc - self.opened_at_utc;
        (delta.num_milliseconds().max(0) as f64) / 60_000.0
    }
}

/// Pure-function calendar lookup: given a currency and a timestamp, returns
/// minutes to the next same-currency high/medium economic event, or `None`
/// if the calendar has no such event (or stale data — degrades
/// deterministically rather than failing).
pub trait CalendarLookup {
    fn minutes_to_next_event(&self, symbol_currency: &str, at_time_utc: DateTime<Utc>)
        -> Option<f64>;
}

/// A calendar lookup that always reports no upcoming event — useful for
/// tests and for operating without calendar ingestion wired up.
pub struct NoCalendar;

impl CalendarLookup for NoCalendar {
    fn minutes_to_next_event(
        &self,
        _symbol_currency: &str,
        _at_time_utc: DateTime<Utc>,
    ) -> Option<f64> {
        None
    }
}

// ---------------------------------------------------------------------------
// Classification
// ---------------------------------------------------------------------------

/// Classify a closed trade event into a canonical [`CombinationId`].
///
/// `InvalidSignal` / `InvalidGeneration` are the only error conditions; both
/// are fatal for this event and must be surfaced by the caller as
/// `CLASSIFY_FAILURE` chain termination.
pub fn classify(
    event: &ClosedTradeEvent,
    symbol_currency: &str,
    calendar: &dyn CalendarLookup,
) -> Result<CombinationId, EngineError> {
    let generation: Generation = event.generation.parse().map_err(|e| {
        warn!(trade_id = %event.trade_id, generation = %event.generation, "invalid generation");
        e
    })?;
    let signal: SignalClass = event.signal.parse().map_err(|e| {
        warn!(trade_id = %event.trade_id, signal = %event.signal, "invalid signal class");
        e
    })?;
    let outcome: Outcome = event.outcome.parse()?;

    let duration = if signal.is_eco_class() {
        Some(DurationBucket::from_minutes(event.elapsed_minutes()))
    } else {
        None
    };

    let minutes_to_event = calendar.minutes_to_next_event(symbol_currency, event.closed_at_utc);
    let proximity = Proximity::from_minutes(minutes_to_event);

    let combination = CombinationId::new(generation, signal, duration, proximity, outcome);
    debug!(
        trade_id = %event.trade_id,
        combination_id = %combination,
        "classified closed trade"
    );
    Ok(combination)
}

// =============================================================================
// Tests
// =============================================================================
#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn base_event() -> ClosedTradeEvent {
        ClosedTradeEvent {
            trade_id: "t1".into(),
            chain_id: None,
            symbol: "EURUSD".into(),
            signal: "ECO_HIGH".into(),
            opened_at_utc: "2026-01-01T00:00:00Z".parse().unwrap(),
            closed_at_utc: "2026-01-01T00:10:00Z".parse().unwrap(),
            outcome: "LOSS".into(),
            realized_pips: -12.0,
            realized_pnl_quote: -120.0,
            pnl_account_ccy: -120.0,
            generation: "R1".into(),
            last_known_balance: 10_000.0,
        }
    }

    #[test]
    fn classifies_eco_high_with_duration() {
        let event = base_event();
        let combo = classify(&event, "USD", &NoCalendar).unwrap();
        assert_eq!(combo.canonical(), "R1:ECO_HIGH:QUICK:EXTENDED:LOSS");
    }

    #[test]
    fn non_eco_signal_has_no_duration_segment() {
        let mut event = base_event();
        event.signal = "EQUITY_OPEN_USA".into();
        let combo = classify(&event, "USD", &NoCalendar).unwrap();
        assert!(combo.duration.is_none());
        assert_eq!(combo.canonical(), "R1:EQUITY_OPEN_USA:EXTENDED:LOSS");
    }

    #[test]
    fn zero_duration_trade_buckets_flash() {
        let mut event = base_event();
        event.closed_at_utc = event.opened_at_utc;
        let combo = classify(&event, "USD", &NoCalendar).unwrap();
        assert_eq!(combo.duration, Some(DurationBucket::Flash));
    }

    #[test]
    fn duration_exactly_five_minutes_is_flash() {
        let mut event = base_event();
        event.closed_at_utc = event.opened_at_utc + Duration::minutes(5);
        let combo = classify(&event, "USD", &NoCalendar).unwrap();
        assert_eq!(combo.duration, Some(DurationBucket::Flash));
    }

    #[test]
    fn duration_five_minutes_one_second_is_quick() {
        let mut event = base_event();
        event.closed_at_utc = event.opened_at_utc + Duration::seconds(301);
        let combo = classify(&event, "USD", &NoCalendar).unwrap();
        assert_eq!(combo.duration, Some(DurationBucket::Quick));
    }

    #[test]
    fn invalid_signal_is_fatal_for_event() {
        let mut event = base_event();
        event.signal = "BOGUS".into();
        let err = classify(&event, "USD", &NoCalendar).unwrap_err();
        assert!(matches!(err, EngineError::InvalidSignal(_)));
    }

    #[test]
    fn invalid_generation_is_fatal_for_event() {
        let mut event = base_event();
        event.generation = "R3".into();
        let err = classify(&event, "USD", &NoCalendar).unwrap_err();
        assert!(matches!(err, EngineError::InvalidGeneration(_)));
    }

    #[test]
    fn parse_is_identity_on_canonical_output() {
        let event = base_event();
        let combo = classify(&event, "USD", &NoCalendar).unwrap();
        let round_tripped = CombinationId::parse(&combo.canonical()).unwrap();
        assert_eq!(combo, round_tripped);
    }
}
