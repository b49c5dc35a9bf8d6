// =============================================================================
// Parameter Set Registry — validated parameter sets, addressed by slug
// =============================================================================
//
// Parameter sets are dynamic-looking dictionaries in the source system; here
// they are a tagged struct keyed by `stop_loss_method` / `take_profit_method`
// / `entry_order_type`; conditional requireds are checked once at load time
// in `validate`, eliminating the "field present but meaningless" pathology
// spec §9 calls out.
//
// On a bad reload the registry keeps serving the last-known-good map — the
// same retain-previous-on-failure behaviour as the Matrix Store.
// =============================================================================

use std::collections::HashMap;
use std::path::Path;

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::errors::EngineError;
use crate::types::{
    EntryOrderType, ReentryRiskMethod, StopLossMethod, TakeProfitMethod, Timeframe,
};

pub const MAX_RISK_CAP_PERCENT: f64 = 3.5;

// ---------------------------------------------------------------------------
// Parameter set schema (spec §6.1)
// ---------------------------------------------------------------------------

/// A fully validated parameter set, identified by a stable slug
/// (`PS-[a-z0-9-]+`).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ParameterSet {
    pub parameter_set_id: String,

    #[serde(default)]
    pub description: Option<String>,

    pub global_risk_percent: f64,
    #[serde(default = "default_risk_multiplier")]
    pub risk_multiplier: f64,

    pub stop_loss_method: StopLossMethod,
    #[serde(default)]
    pub stop_loss_pips: Option<f64>,
    #[serde(default)]
    pub stop_loss_percent: Option<f64>,
    #[serde(default)]
    pub sl_atr_multiple: Option<f64>,
    #[serde(default)]
    pub sl_atr_period: Option<u32>,
    #[serde(default)]
    pub sl_atr_timeframe: Option<Timeframe>,

    pub take_profit_method: TakeProfitMethod,
    #[serde(default)]
    pub take_profit_pips: Option<f64>,
    #[serde(default)]
    pub tp_atr_multiple: Option<f64>,
    #[serde(default)]
    pub tp_atr_period: Option<u32>,
    #[serde(default)]
    pub tp_atr_timeframe: Option<Timeframe>,

    pub entry_order_type: EntryOrderType,
    #[serde(default)]
    pub straddle_distance_buy_pips: Option<f64>,
    #[serde(default)]
    pub straddle_distance_sell_pips: Option<f64>,

    #[serde(default)]
    pub reentry_risk_method: Option<ReentryRiskMethod>,

    /// Forward-compatible: any additional fields carried by the source
    /// document but not part of the validated schema are ignored by the
    /// core, not rejected.
    #[serde(default, flatten)]
    pub extra: HashMap<String, serde_json::Value>,
}

fn default_risk_multiplier() -> f64 {
    1.0
}

impl ParameterSet {
    /// Validate this parameter set against the schema-level types/ranges and
    /// the cross-field rules in spec §4.3. Returns the first violation found.
    pub fn validate(&self) -> Result<(), EngineError> {
        let id_ok = self.parameter_set_id.starts_with("PS-")
            && self.parameter_set_id[3..]
                .chars()
                .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '-')
            && self.parameter_set_id.len() > 3;
        if !id_ok {
            return Err(EngineError::SchemaViolation(format!(
                "parameter_set_id {:?} does not match ^PS-[a-z0-9-]+$",
                self.parameter_set_id
            )));
        }

        if !(0.01..=MAX_RISK_CAP_PERCENT).contains(&self.global_risk_percent) {
            return Err(EngineError::SchemaViolation(format!(
                "{}: global_risk_percent {} out of range [0.01, 3.50]",
                self.parameter_set_id, self.global_risk_percent
            )));
        }
        if !(0.10..=3.00).contains(&self.risk_multiplier) {
            return Err(EngineError::SchemaViolation(format!(
                "{}: risk_multiplier {} out of range [0.10, 3.00]",
                self.parameter_set_id, self.risk_multiplier
            )));
        }

        // --- Stop loss conditional requireds ---------------------------------
        match self.stop_loss_method {
            StopLossMethod::Fixed => {
                let pips = self.stop_loss_pips.ok_or_else(|| {
                    schema_err(&self.parameter_set_id, "stop_loss_pips required for FIXED")
                })?;
                if !(5.0..=1000.0).contains(&pips) {
                    return Err(schema_err(
                        &self.parameter_set_id,
                        "stop_loss_pips out of range [5, 1000]",
                    ));
                }
            }
            StopLossMethod::Percent => {
                let pct = self.stop_loss_percent.ok_or_else(|| {
                    schema_err(
                        &self.parameter_set_id,
                        "stop_loss_percent required for PERCENT",
                    )
                })?;
                if !(0.05..=10.0).contains(&pct) {
                    return Err(schema_err(
                        &self.parameter_set_id,
                        "stop_loss_percent out of range [0.05, 10.0]",
                    ));
                }
            }
            StopLossMethod::Atr => self.validate_atr_triplet(
                self.sl_atr_multiple,
                self.sl_atr_period,
                self.sl_atr_timeframe,
                "sl",
            )?,
        }

        // --- Take profit conditional requireds --------------------------------
        match self.take_profit_method {
            TakeProfitMethod::Fixed => {
                let tp = self.take_profit_pips.ok_or_else(|| {
                    schema_err(
                        &self.parameter_set_id,
                        "take_profit_pips required for FIXED",
                    )
                })?;
                if self.stop_loss_method == StopLossMethod::Fixed {
                    let sl = self.stop_loss_pips.unwrap_or(0.0);
                    if tp <= sl {
                        return Err(schema_err(
                            &self.parameter_set_id,
                            "take_profit_pips must exceed stop_loss_pips when both FIXED",
                        ));
                    }
                }
            }
            TakeProfitMethod::Atr => self.validate_atr_triplet(
                self.tp_atr_multiple,
                self.tp_atr_period,
                self.tp_atr_timeframe,
                "tp",
            )?,
            TakeProfitMethod::Rr => {}
        }

        // --- Entry order conditional requireds ---------------------------------
        if self.entry_order_type == EntryOrderType::Straddle {
            let buy = self.straddle_distance_buy_pips.ok_or_else(|| {
                schema_err(
                    &self.parameter_set_id,
                    "straddle_distance_buy_pips required for STRADDLE",
                )
            })?;
            let sell = self.straddle_distance_sell_pips.ok_or_else(|| {
                schema_err(
                    &self.parameter_set_id,
                    "straddle_distance_sell_pips required for STRADDLE",
                )
            })?;
            if buy <= 0.0 || sell <= 0.0 {
                return Err(schema_err(
                    &self.parameter_set_id,
                    "straddle distances must both be positive",
                ));
            }
        }

        if let Some(desc) = &self.description {
            if desc.len() > 200 {
                return Err(schema_err(
                    &self.parameter_set_id,
                    "description exceeds 200 chars",
                ));
            }
        }

        Ok(())
    }

    fn validate_atr_triplet(
        &self,
        multiple: Option<f64>,
        period: Option<u32>,
        timeframe: Option<Timeframe>,
        prefix: &str,
    ) -> Result<(), EngineError> {
        let multiple = multiple.ok_or_else(|| {
            schema_err(
                &self.parameter_set_id,
                &format!("{prefix}_atr_multiple required for ATR"),
            )
        })?;
        let period = period.ok_or_else(|| {
            schema_err(
                &self.parameter_set_id,
                &format!("{prefix}_atr_period required for ATR"),
            )
        })?;
        timeframe.ok_or_else(|| {
            schema_err(
                &self.parameter_set_id,
                &format!("{prefix}_atr_timeframe required for ATR"),
            )
        })?;
        if !(0.5..=10.0).contains(&multiple) {
            return Err(schema_err(
                &self.parameter_set_id,
                &format!("{prefix}_atr_multiple out of range [0.5, 10.0]"),
            ));
        }
        if !(5..=200).contains(&period) {
            return Err(schema_err(
                &self.parameter_set_id,
                &format!("{prefix}_atr_period out of range [5, 200]"),
            ));
        }
        Ok(())
    }
}

fn schema_err(id: &str, msg: &str) -> EngineError {
    EngineError::SchemaViolation(format!("{id}: {msg}"))
}

// ---------------------------------------------------------------------------
// Registry
// ---------------------------------------------------------------------------

struct Inner {
    sets: HashMap<String, ParameterSet>,
}

/// In-memory registry of validated parameter sets. Retains the last-known-good
/// map across a failed reload.
pub struct ParameterSetRegistry {
    inner: RwLock<Inner>,
}

impl ParameterSetRegistry {
    pub fn empty() -> Self {
        Self {
            inner: RwLock::new(Inner {
                sets: HashMap::new(),
            }),
        }
    }

    /// Load parameter sets from a JSON document: `{ "PS-...": {...}, ... }`.
    /// Every entry is schema-validated; the whole load is rejected (previous
    /// state, if any, retained) if any single entry fails.
    pub fn load_from_json(path: impl AsRef<Path>) -> Result<Self, EngineError> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)?;
        let raw: HashMap<String, ParameterSet> = serde_json::from_str(&content)?;
        let mut sets = HashMap::with_capacity(raw.len());
        for (id, mut set) in raw {
            set.parameter_set_id = id.clone();
            set.validate()?;
            sets.insert(id, set);
        }
        info!(count = sets.len(), path = %path.display(), "parameter set registry loaded");
        Ok(Self {
            inner: RwLock::new(Inner { sets }),
        })
    }

    /// Attempt a transactional reload from `path`. On validation failure the
    /// previous map is retained and the error is returned for the caller to
    /// log as a `REJECT_SET` diagnostic.
    pub fn reload_from_json(&self, path: impl AsRef<Path>) -> Result<(), EngineError> {
        match Self::load_from_json(path) {
            Ok(fresh) => {
                *self.inner.write() = fresh.inner.into_inner();
                Ok(())
            }
            Err(e) => {
                warn!(error = %e, "parameter set registry reload rejected — retaining previous map");
                Err(e)
            }
        }
    }

    /// Resolve a parameter set by id.
    pub fn get(&self, parameter_set_id: &str) -> Option<ParameterSet> {
        self.inner.read().sets.get(parameter_set_id).cloned()
    }

    /// Whether `parameter_set_id` exists in the registry.
    pub fn contains(&self, parameter_set_id: &str) -> bool {
        self.inner.read().sets.contains_key(parameter_set_id)
    }

    /// All currently loaded parameter sets, in no particular order. Used to
    /// echo the accepted set into `parameter_log.csv` after a load/reload.
    pub fn all(&self) -> Vec<ParameterSet> {
        self.inner.read().sets.values().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.inner.read().sets.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Insert or replace a parameter set directly (used by tests and by the
    /// `validate-matrix` CLI path building an in-memory registry).
    pub fn insert(&self, set: ParameterSet) -> Result<(), EngineError> {
        set.validate()?;
        self.inner
            .write()
            .sets
            .insert(set.parameter_set_id.clone(), set);
        Ok(())
    }
}

/// Produce the JSON Schema document for the parameter set shape described in
/// spec §6.1. Written to `config/parameters.schema.json` by the
/// `validate-matrix` CLI path if that file is absent, so the file layout in
/// spec §6.2 is self-establishing.
pub fn schema_document() -> serde_json::Value {
    serde_json::json!({
        "$schema": "http://json-schema.org/draft-07/schema#",
        "title": "ParameterSet",
        "type": "object",
        "required": [
            "parameter_set_id",
            "global_risk_percent",
            "stop_loss_method",
            "take_profit_method",
            "entry_order_type"
        ],
        "properties": {
            "parameter_set_id": { "type": "string", "pattern": "^PS-[a-z0-9-]+$" },
            "description": { "type": "string", "maxLength": 200 },
            "global_risk_percent": { "type": "number", "minimum": 0.01, "maximum": 3.50 },
            "risk_multiplier": { "type": "number", "minimum": 0.10, "maximum": 3.00, "default": 1.00 },
            "stop_loss_method": { "enum": ["FIXED", "ATR", "PERCENT"] },
            "take_profit_method": { "enum": ["FIXED", "RR", "ATR"] },
            "entry_order_type": {
                "enum": ["MARKET", "BUY_STOP_ONLY", "SELL_STOP_ONLY", "STRADDLE"]
            },
            "max_risk_cap_percent": { "const": MAX_RISK_CAP_PERCENT }
        },
        "additionalProperties": true
    })
}

// =============================================================================
// Tests
// =============================================================================
#[cfg(test)]
mod tests {
    use super::*;

    fn fixed_set(id: &str) -> ParameterSet {
        ParameterSet {
            parameter_set_id: id.to_string(),
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
            extra: HashMap::new(),
        }
    }

    #[test]
    fn valid_fixed_set_passes() {
        assert!(fixed_set("PS-base").validate().is_ok());
    }

    #[test]
    fn fixed_tp_must_exceed_fixed_sl() {
        let mut set = fixed_set("PS-bad-tp");
        set.take_profit_pips = Some(10.0);
        assert!(set.validate().is_err());
    }

    #[test]
    fn straddle_requires_positive_distances() {
        let mut set = fixed_set("PS-straddle");
        set.entry_order_type = EntryOrderType::Straddle;
        assert!(set.validate().is_err());
        set.straddle_distance_buy_pips = Some(5.0);
        set.straddle_distance_sell_pips = Some(5.0);
        assert!(set.validate().is_ok());
    }

    #[test]
    fn atr_requires_full_triplet() {
        let mut set = fixed_set("PS-atr");
        set.stop_loss_method = StopLossMethod::Atr;
        assert!(set.validate().is_err());
        set.sl_atr_multiple = Some(1.5);
        set.sl_atr_period = Some(14);
        set.sl_atr_timeframe = Some(Timeframe::H1);
        assert!(set.validate().is_ok());
    }

    #[test]
    fn invalid_id_rejected() {
        let set = fixed_set("not-a-valid-id");
        assert!(set.validate().is_err());
    }

    #[test]
    fn registry_retains_previous_on_bad_reload() {
        let registry = ParameterSetRegistry::empty();
        registry.insert(fixed_set("PS-keep")).unwrap();

        let dir = tempfile::tempdir().unwrap();
        let bad_path = dir.path().join("bad.json");
        std::fs::write(&bad_path, r#"{"PS-x": {"parameter_set_id": "PS-x"}}"#).unwrap();

        let result = registry.reload_from_json(&bad_path);
        assert!(result.is_err());
        assert!(registry.contains("PS-keep"));
    }
}
