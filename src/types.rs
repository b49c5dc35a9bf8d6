// =============================================================================
// Shared types used across the reentry decision engine
// =============================================================================

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::errors::EngineError;

/// Reentry generation. `R2` is terminal: a trade with generation `R2` may
/// never spawn a reentry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Generation {
    O,
    R1,
    R2,
}

impl Generation {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::O => "O",
            Self::R1 => "R1",
            Self::R2 => "R2",
        }
    }

    /// The generation reached by the next reentry spawned from this one, if
    /// any. `R2` has no successor.
    pub fn next(&self) -> Option<Generation> {
        match self {
            Self::O => Some(Self::R1),
            Self::R1 => Some(Self::R2),
            Self::R2 => None,
        }
    }
}

impl fmt::Display for Generation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for Generation {
    type Err = EngineError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "O" => Ok(Self::O),
            "R1" => Ok(Self::R1),
            "R2" => Ok(Self::R2),
            other => Err(EngineError::InvalidGeneration(other.to_string())),
        }
    }
}

/// Closed set of signal classes that can trigger a trade.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SignalClass {
    EcoHigh,
    EcoMed,
    Anticipation1Hr,
    Anticipation8Hr,
    EquityOpenAsia,
    EquityOpenEurope,
    EquityOpenUsa,
    AllIndicators,
}

impl SignalClass {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::EcoHigh => "ECO_HIGH",
            Self::EcoMed => "ECO_MED",
            Self::Anticipation1Hr => "ANTICIPATION_1HR",
            Self::Anticipation8Hr => "ANTICIPATION_8HR",
            Self::EquityOpenAsia => "EQUITY_OPEN_ASIA",
            Self::EquityOpenEurope => "EQUITY_OPEN_EUROPE",
            Self::EquityOpenUsa => "EQUITY_OPEN_USA",
            Self::AllIndicators => "ALL_INDICATORS",
        }
    }

    /// Whether this signal class carries a duration bucket in its
    /// combination key (ECO-class signals only).
    pub fn is_eco_class(&self) -> bool {
        matches!(self, Self::EcoHigh | Self::EcoMed)
    }
}

impl fmt::Display for SignalClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for SignalClass {
    type Err = EngineError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "ECO_HIGH" => Ok(Self::EcoHigh),
            "ECO_MED" => Ok(Self::EcoMed),
            "ANTICIPATION_1HR" => Ok(Self::Anticipation1Hr),
            "ANTICIPATION_8HR" => Ok(Self::Anticipation8Hr),
            "EQUITY_OPEN_ASIA" => Ok(Self::EquityOpenAsia),
            "EQUITY_OPEN_EUROPE" => Ok(Self::EquityOpenEurope),
            "EQUITY_OPEN_USA" => Ok(Self::EquityOpenUsa),
            "ALL_INDICATORS" => Ok(Self::AllIndicators),
            other => Err(EngineError::InvalidSignal(other.to_string())),
        }
    }
}

/// ECO-only duration bucket, derived from `closed_at - opened_at`.
/// Boundaries are inclusive on the upper edge: exactly 5 min is `Flash`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum DurationBucket {
    Flash,
    Quick,
    Long,
    Extended,
}

impl DurationBucket {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Flash => "FLASH",
            Self::Quick => "QUICK",
            Self::Long => "LONG",
            Self::Extended => "EXTENDED",
        }
    }

    /// Classify an elapsed duration (in minutes) into a bucket.
    /// Zero-duration (same-tick) trades bucket into `Flash`.
    pub fn from_minutes(minutes: f64) -> Self {
        if minutes <= 5.0 {
            Self::Flash
        } else if minutes <= 15.0 {
            Self::Quick
        } else if minutes <= 30.0 {
            Self::Long
        } else {
            Self::Extended
        }
    }
}

impl fmt::Display for DurationBucket {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for DurationBucket {
    type Err = EngineError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "FLASH" => Ok(Self::Flash),
            "QUICK" => Ok(Self::Quick),
            "LONG" => Ok(Self::Long),
            "EXTENDED" => Ok(Self::Extended),
            other => Err(EngineError::InvalidCombination(format!(
                "unknown duration bucket: {other}"
            ))),
        }
    }
}

/// Proximity to the next same-currency high/medium economic event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Proximity {
    Immediate,
    Short,
    Long,
    Extended,
}

impl Proximity {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Immediate => "IMMEDIATE",
            Self::Short => "SHORT",
            Self::Long => "LONG",
            Self::Extended => "EXTENDED",
        }
    }

    /// Classify minutes-to-next-event. `None` (stale/missing calendar data
    /// or no event within 24h) degrades deterministically to `Extended`.
    pub fn from_minutes(minutes: Option<f64>) -> Self {
        match minutes {
            None => Self::Extended,
            Some(m) if m <= 5.0 => Self::Immediate,
            Some(m) if m <= 60.0 => Self::Short,
            Some(m) if m <= 240.0 => Self::Long,
            Some(_) => Self::Extended,
        }
    }
}

impl fmt::Display for Proximity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for Proximity {
    type Err = EngineError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "IMMEDIATE" => Ok(Self::Immediate),
            "SHORT" => Ok(Self::Short),
            "LONG" => Ok(Self::Long),
            "EXTENDED" => Ok(Self::Extended),
            other => Err(EngineError::InvalidCombination(format!(
                "unknown proximity bucket: {other}"
            ))),
        }
    }
}

/// Closed six-bucket outcome of a closed trade.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Outcome {
    Win,
    Loss,
    Be,
    Skip,
    Reject,
    Cancel,
}

impl Outcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Win => "WIN",
            Self::Loss => "LOSS",
            Self::Be => "BE",
            Self::Skip => "SKIP",
            Self::Reject => "REJECT",
            Self::Cancel => "CANCEL",
        }
    }

    /// Whether the originating trade was profitable — gates the breakout
    /// override in the sizing engine.
    pub fn is_profitable(&self) -> bool {
        matches!(self, Self::Win)
    }

    /// Outcome modifier applied on top of the generation default reduction.
    /// `{4,5,6}->1.0` i.e. WIN/BE/SKIP; `{1,2}->0.7` i.e. LOSS/REJECT/CANCEL.
    pub fn risk_modifier(&self) -> f64 {
        match self {
            Self::Win | Self::Be | Self::Skip => 1.0,
            Self::Loss | Self::Reject | Self::Cancel => 0.7,
        }
    }
}

impl fmt::Display for Outcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for Outcome {
    type Err = EngineError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "WIN" => Ok(Self::Win),
            "LOSS" => Ok(Self::Loss),
            "BE" => Ok(Self::Be),
            "SKIP" => Ok(Self::Skip),
            "REJECT" => Ok(Self::Reject),
            "CANCEL" => Ok(Self::Cancel),
            other => Err(EngineError::InvalidCombination(format!(
                "unknown outcome: {other}"
            ))),
        }
    }
}

/// Entry order type as carried in the parameter set schema (§6.1).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum EntryOrderType {
    Market,
    BuyStopOnly,
    SellStopOnly,
    Straddle,
}

impl EntryOrderType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Market => "MARKET",
            Self::BuyStopOnly => "BUY_STOP_ONLY",
            Self::SellStopOnly => "SELL_STOP_ONLY",
            Self::Straddle => "STRADDLE",
        }
    }
}

impl FromStr for EntryOrderType {
    type Err = EngineError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "MARKET" => Ok(Self::Market),
            "BUY_STOP_ONLY" => Ok(Self::BuyStopOnly),
            "SELL_STOP_ONLY" => Ok(Self::SellStopOnly),
            "STRADDLE" => Ok(Self::Straddle),
            other => Err(EngineError::SchemaViolation(format!(
                "unknown entry_order_type: {other}"
            ))),
        }
    }
}

/// Coarse execution-adapter-facing entry method (§3.1): the adapter only
/// ever needs to know whether to place the order at market, as a pending
/// order, or as a straddle pair — not which side a lone pending order sits
/// on, which is why `EntryOrderType`'s `BUY_STOP_ONLY`/`SELL_STOP_ONLY` both
/// collapse to `PENDING` here.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum EntryMethod {
    Market,
    Pending,
    Straddle,
}

impl EntryMethod {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Market => "MARKET",
            Self::Pending => "PENDING",
            Self::Straddle => "STRADDLE",
        }
    }
}

impl fmt::Display for EntryMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for EntryMethod {
    type Err = EngineError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "MARKET" => Ok(Self::Market),
            "PENDING" => Ok(Self::Pending),
            "STRADDLE" => Ok(Self::Straddle),
            other => Err(EngineError::SchemaViolation(format!(
                "unknown entry_method: {other}"
            ))),
        }
    }
}

impl From<EntryOrderType> for EntryMethod {
    fn from(order_type: EntryOrderType) -> Self {
        match order_type {
            EntryOrderType::Market => Self::Market,
            EntryOrderType::BuyStopOnly | EntryOrderType::SellStopOnly => Self::Pending,
            EntryOrderType::Straddle => Self::Straddle,
        }
    }
}

/// Stop-loss calculation method.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum StopLossMethod {
    Fixed,
    Atr,
    Percent,
}

impl StopLossMethod {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Fixed => "FIXED",
            Self::Atr => "ATR",
            Self::Percent => "PERCENT",
        }
    }
}

impl fmt::Display for StopLossMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for StopLossMethod {
    type Err = EngineError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "FIXED" => Ok(Self::Fixed),
            "ATR" => Ok(Self::Atr),
            "PERCENT" => Ok(Self::Percent),
            other => Err(EngineError::SchemaViolation(format!(
                "unknown stop_loss_method: {other}"
            ))),
        }
    }
}

/// Take-profit calculation method.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TakeProfitMethod {
    Fixed,
    Rr,
    Atr,
}

impl TakeProfitMethod {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Fixed => "FIXED",
            Self::Rr => "RR",
            Self::Atr => "ATR",
        }
    }
}

impl fmt::Display for TakeProfitMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for TakeProfitMethod {
    type Err = EngineError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "FIXED" => Ok(Self::Fixed),
            "RR" => Ok(Self::Rr),
            "ATR" => Ok(Self::Atr),
            other => Err(EngineError::SchemaViolation(format!(
                "unknown take_profit_method: {other}"
            ))),
        }
    }
}

/// Chart timeframe, used by ATR-based stop/target methods.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Timeframe {
    M1,
    M5,
    M15,
    M30,
    H1,
    H4,
    D1,
}

impl FromStr for Timeframe {
    type Err = EngineError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "M1" => Ok(Self::M1),
            "M5" => Ok(Self::M5),
            "M15" => Ok(Self::M15),
            "M30" => Ok(Self::M30),
            "H1" => Ok(Self::H1),
            "H4" => Ok(Self::H4),
            "D1" => Ok(Self::D1),
            other => Err(EngineError::SchemaViolation(format!(
                "unknown timeframe: {other}"
            ))),
        }
    }
}

/// Reentry risk method carried by a parameter set, when present.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ReentryRiskMethod {
    MaintainOriginal,
    MaintainPercent,
    ReduceProgressive,
    ChainRiskBudget,
}

impl FromStr for ReentryRiskMethod {
    type Err = EngineError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "MAINTAIN_ORIGINAL" => Ok(Self::MaintainOriginal),
            "MAINTAIN_PERCENT" => Ok(Self::MaintainPercent),
            "REDUCE_PROGRESSIVE" => Ok(Self::ReduceProgressive),
            "CHAIN_RISK_BUDGET" => Ok(Self::ChainRiskBudget),
            other => Err(EngineError::SchemaViolation(format!(
                "unknown reentry_risk_method: {other}"
            ))),
        }
    }
}
