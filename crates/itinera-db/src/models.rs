use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

// ---------------------------------------------------------------------------
// Enums
// ---------------------------------------------------------------------------

/// Status of a plan request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "text", rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum PlanStatus {
    Generating,
    Ready,
    Failed,
}

impl fmt::Display for PlanStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Generating => "generating",
            Self::Ready => "ready",
            Self::Failed => "failed",
        };
        f.write_str(s)
    }
}

impl FromStr for PlanStatus {
    type Err = PlanStatusParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "generating" => Ok(Self::Generating),
            "ready" => Ok(Self::Ready),
            "failed" => Ok(Self::Failed),
            other => Err(PlanStatusParseError(other.to_owned())),
        }
    }
}

/// Error returned when parsing an invalid [`PlanStatus`] string.
#[derive(Debug, Clone)]
pub struct PlanStatusParseError(pub String);

impl fmt::Display for PlanStatusParseError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "invalid plan status: {:?}", self.0)
    }
}

impl std::error::Error for PlanStatusParseError {}

// ---------------------------------------------------------------------------

/// Kind of a credit ledger entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "text", rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum TransactionKind {
    Consume,
    Purchase,
}

impl fmt::Display for TransactionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Consume => "consume",
            Self::Purchase => "purchase",
        };
        f.write_str(s)
    }
}

impl FromStr for TransactionKind {
    type Err = TransactionKindParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "consume" => Ok(Self::Consume),
            "purchase" => Ok(Self::Purchase),
            other => Err(TransactionKindParseError(other.to_owned())),
        }
    }
}

/// Error returned when parsing an invalid [`TransactionKind`] string.
#[derive(Debug, Clone)]
pub struct TransactionKindParseError(pub String);

impl fmt::Display for TransactionKindParseError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "invalid transaction kind: {:?}", self.0)
    }
}

impl std::error::Error for TransactionKindParseError {}

// ---------------------------------------------------------------------------
// Row structs
// ---------------------------------------------------------------------------

/// A plan request -- one itinerary-generation job and its eventual result.
///
/// The result fields (`result_text`, `points_of_interest`, `failure_reason`)
/// start empty and are written exactly once by the background generation
/// task, either with success content or with a failure reason.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct PlanRequest {
    pub id: Uuid,
    pub owner_id: String,
    pub origin: String,
    pub destination: String,
    pub travel_date: NaiveDate,
    pub days: i32,
    pub preferences: Vec<String>,
    pub status: PlanStatus,
    pub result_text: Option<String>,
    /// JSON array of points of interest; empty until generation succeeds.
    pub points_of_interest: serde_json::Value,
    pub failure_reason: Option<String>,
    /// Workflow attempts used before the request reached a terminal state.
    pub attempts: i32,
    pub created_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
}

/// Denormalized credit counter for one owner. The ledger is the audit trail;
/// this row exists for fast balance reads and is only ever written together
/// with a ledger entry in the same transaction.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct CreditBalance {
    pub owner_id: String,
    pub total: i64,
    pub updated_at: DateTime<Utc>,
}

/// An append-only credit ledger entry.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct CreditTransaction {
    pub id: Uuid,
    pub owner_id: String,
    pub kind: TransactionKind,
    pub amount: i64,
    pub remark: String,
    pub created_at: DateTime<Utc>,
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
