// =============================================================================
// Decision Envelope — auditable record of every reentry decision
// =============================================================================
//
// Every closed trade that reaches the orchestrator flows through classify ->
// matrix resolve -> (size -> emit). The Decision Envelope captures the
// verdict from each layer so a chain's outcome can be audited after the
// fact, independent of the chain_history.csv row-level trail.
// =============================================================================

use serde::Serialize;

/// Complete auditable record of one `handle_closed_trade` call.
#[derive(Debug, Clone, Serialize)]
pub struct DecisionEnvelope {
    /// Unique identifier for this decision (UUID v4).
    pub id: String,

    /// Chain this decision belongs to, if classification reached that far.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub chain_id: Option<String>,

    /// Symbol the decision pertains to.
    pub symbol: String,

    /// Canonical combination id, once classification succeeds.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub combination_id: Option<String>,

    /// Combination Classifier verdict ("PASS" / "FAIL").
    pub classify_verdict: String,

    /// Matrix Store verdict ("REENTRY" / "END_TRADING" / "N/A").
    pub matrix_verdict: String,

    /// Risk & Sizing Engine verdict ("SIZED" / "END_TRADING" / "N/A").
    pub risk_verdict: String,

    /// Final outcome: "AWAITING_ACK" or "CHAIN_ENDED".
    pub final_decision: String,

    /// Which layer ended the chain, if it did.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub blocking_layer: Option<String>,

    /// Human-readable termination reason, if the chain ended.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,

    /// ISO 8601 timestamp of when this decision was created.
    pub created_at: String,
}

impl DecisionEnvelope {
    /// A trade signal was emitted and the chain is awaiting an ACK.
    pub fn awaiting_ack(symbol: impl Into<String>, chain_id: impl Into<String>) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            chain_id: Some(chain_id.into()),
            symbol: symbol.into(),
            combination_id: None,
            classify_verdict: "PASS".to_string(),
            matrix_verdict: "REENTRY".to_string(),
            risk_verdict: "SIZED".to_string(),
            final_decision: "AWAITING_ACK".to_string(),
            blocking_layer: None,
            reason: None,
            created_at: chrono::Utc::now().to_rfc3339(),
        }
    }

    /// The chain ended without emitting a signal — classify failure, matrix
    /// `END_TRADING`, or a risk-engine termination.
    pub fn chain_ended(
        symbol: impl Into<String>,
        chain_id: Option<String>,
        combination_id: Option<String>,
        blocking_layer: impl Into<String>,
        reason: impl Into<String>,
    ) -> Self {
        let layer = blocking_layer.into();
        let classify_verdict = if layer == "CLASSIFIER" { "FAIL" } else { "PASS" };
        let matrix_verdict = if layer == "MATRIX" {
            "END_TRADING"
        } else if layer == "CLASSIFIER" {
            "N/A"
        } else {
            "REENTRY"
        };
        let risk_verdict = if layer == "RISK" { "END_TRADING" } else { "N/A" };

        Self {
            id: uuid::Uuid::new_v4().to_string(),
            chain_id,
            symbol: symbol.into(),
            combination_id,
            classify_verdict: classify_verdict.to_string(),
            matrix_verdict: matrix_verdict.to_string(),
            risk_verdict: risk_verdict.to_string(),
            final_decision: "CHAIN_ENDED".to_string(),
            blocking_layer: Some(layer),
            reason: Some(reason.into()),
            created_at: chrono::Utc::now().to_rfc3339(),
        }
    }
}
