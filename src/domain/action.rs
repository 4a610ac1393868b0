//! Actions
//!
//! Append-only audit records. One `reserve_tickets` action per reservation
//! and one `buy_tickets` action per settlement attempt.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

/// Action type
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActionKind {
    ReserveTickets,
    BuyTickets,
}

impl ActionKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ActionKind::ReserveTickets => "reserve_tickets",
            ActionKind::BuyTickets => "buy_tickets",
        }
    }
}

impl fmt::Display for ActionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ActionKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "reserve_tickets" => Ok(ActionKind::ReserveTickets),
            "buy_tickets" => Ok(ActionKind::BuyTickets),
            other => Err(format!("unknown action type '{}'", other)),
        }
    }
}

/// Action row
#[derive(Debug, Clone, PartialEq)]
pub struct ActionRecord {
    pub id: Uuid,
    pub company_id: Uuid,
    pub user_id: Option<Uuid>,
    pub kind: ActionKind,
    pub created_at: DateTime<Utc>,
    pub extra: serde_json::Value,
}

/// Where a settlement attempt stands
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SettlementOutcome {
    /// Tickets are payment_pending and the charge has not been confirmed
    Pending,
    Succeeded,
    Failed,
    /// Gateway retries exhausted without a definitive answer
    Unresolved,
}

/// Gateway customer and card an attempt charges. Fixed when the attempt is
/// opened; a resumed attempt charges the same pair under the same key.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChargeSource {
    pub customer_id: String,
    pub source_id: String,
}

/// Body of a `buy_tickets` action's `extra` column
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SettlementAttempt {
    pub reservation_action_id: Uuid,
    pub attempt: u32,
    #[serde(flatten)]
    pub source: ChargeSource,
    pub new_customer: bool,
    pub new_card: bool,
    pub outcome: SettlementOutcome,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub charge_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub failure: Option<String>,
    pub started_at: DateTime<Utc>,
}

impl SettlementAttempt {
    /// A new pending attempt
    pub fn pending(
        reservation_action_id: Uuid,
        attempt: u32,
        source: ChargeSource,
        new_customer: bool,
        new_card: bool,
        started_at: DateTime<Utc>,
    ) -> Self {
        Self {
            reservation_action_id,
            attempt,
            source,
            new_customer,
            new_card,
            outcome: SettlementOutcome::Pending,
            charge_id: None,
            failure: None,
            started_at,
        }
    }

    /// Whether a new settlement call may take this attempt over.
    pub fn is_resumable(&self, now: DateTime<Utc>, stale_after: Duration) -> bool {
        match self.outcome {
            SettlementOutcome::Unresolved => true,
            SettlementOutcome::Pending => now - self.started_at >= stale_after,
            SettlementOutcome::Succeeded | SettlementOutcome::Failed => false,
        }
    }
}
