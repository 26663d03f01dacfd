// Copyright 2023-, GraphOps and Semiotic Labs.
// SPDX-License-Identifier: Apache-2.0

//! Row types for the six core ledger entities: pledges, receipts,
//! allocations, the beneficiary split store, and the audit log.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;

use crate::actor::Actor;
use crate::ids::{AllocId, BatchId, BeneficiaryId, PledgeId, ReceiptId};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "text", rename_all = "SCREAMING_SNAKE_CASE")]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PledgeStatus {
    Pledged,
    PartialReceipt,
    ProofSubmitted,
    Verified,
    PartiallyAllocated,
    FullyAllocated,
    Closed,
    Cancelled,
    Rejected,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "text", rename_all = "SCREAMING_SNAKE_CASE")]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AllocationStatus {
    PendingHostel,
    HostelQuery,
    HostelVerified,
    Completed,
    Cancelled,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "text", rename_all = "SCREAMING_SNAKE_CASE")]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ReceiptStatus {
    Valid,
    Duplicate,
    Rejected,
    RequiresReview,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "text", rename_all = "UPPERCASE")]
#[serde(rename_all = "UPPERCASE")]
pub enum Confidence {
    Low,
    Medium,
    High,
}

/// Recognized pledge durations and the duration→amount mapping.
/// `Custom` carries an operator-supplied amount directly.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Duration {
    OneMonth,
    OneSemester,
    OneYear,
    FourYears,
    Custom(String),
}

impl Duration {
    /// The slug persisted in `pledges.duration`. `Custom` pledges store the
    /// donor's own wording verbatim so it survives a human review.
    pub fn slug(&self) -> String {
        match self {
            Duration::OneMonth => "one-month".to_string(),
            Duration::OneSemester => "one-semester".to_string(),
            Duration::OneYear => "one-year".to_string(),
            Duration::FourYears => "four-years".to_string(),
            Duration::Custom(text) => text.clone(),
        }
    }

    /// Reconstructs the recognised variant from a stored slug, falling back
    /// to `Custom` for anything an operator typed in free text.
    pub fn from_slug(slug: &str) -> Duration {
        match slug {
            "one-month" => Duration::OneMonth,
            "one-semester" => Duration::OneSemester,
            "one-year" => Duration::OneYear,
            "four-years" => Duration::FourYears,
            other => Duration::Custom(other.to_string()),
        }
    }
}

#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct Pledge {
    pub pledge_id: PledgeId,
    pub donor_email: String,
    pub donor_name: String,
    pub donor_chapter: String,
    pub duration: String,
    pub promised_amount: i64,
    pub zakat: bool,
    pub request_receipt: bool,
    pub status: PledgeStatus,
    pub verified_total: i64,
    pub balance: i64,
    pub outstanding: i64,
    pub confirmation_message_id: Option<String>,
    pub last_receipt_message_id: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct Receipt {
    pub receipt_id: ReceiptId,
    pub pledge_id: PledgeId,
    pub processed_at: DateTime<Utc>,
    pub email_received_at: DateTime<Utc>,
    pub transfer_date: DateTime<Utc>,
    pub declared_amount: Option<i64>,
    pub verified_amount: i64,
    pub confidence: Confidence,
    pub storage_link: String,
    pub filename: String,
    pub normalised_filename: String,
    pub status: ReceiptStatus,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct Allocation {
    pub alloc_id: AllocId,
    pub batch_id: Option<BatchId>,
    pub pledge_id: PledgeId,
    pub beneficiary_id: BeneficiaryId,
    pub amount: i64,
    pub status: AllocationStatus,
    pub created_at: DateTime<Utc>,
    pub hostel_intimation_message_id: String,
    pub hostel_intimation_at: DateTime<Utc>,
    pub donor_intermediate_message_id: String,
    pub donor_intermediate_at: DateTime<Utc>,
    pub hostel_reply_message_id: Option<String>,
    pub hostel_reply_at: Option<DateTime<Utc>>,
    pub donor_final_message_id: Option<String>,
    pub donor_final_at: Option<DateTime<Utc>>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct BeneficiaryOps {
    pub beneficiary_id: BeneficiaryId,
    pub school: String,
    pub total_due: i64,
    pub cleared: i64,
    pub pending: i64,
}

/// Lives in a physically separate store from `BeneficiaryOps`; the core
/// only reads this for templating hostel correspondence, never exposes it
/// to the operator UI.
#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct BeneficiaryConfidential {
    pub beneficiary_id: BeneficiaryId,
    pub name: String,
    pub sensitive_ids: serde_json::Value,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "text", rename_all = "SCREAMING_SNAKE_CASE")]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AuditEventKind {
    NewPledge,
    ReceiptProcessed,
    ReceiptIgnored,
    DonorQuery,
    Allocation,
    BatchAllocation,
    PartialVerification,
    HostelVerification,
    HostelQuery,
    StatusChange,
    Alert,
}

#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct AuditEvent {
    pub id: i64,
    pub at: DateTime<Utc>,
    pub actor: String,
    pub kind: AuditEventKind,
    pub target_id: String,
    pub description: String,
    pub previous_value: Option<serde_json::Value>,
    pub new_value: Option<serde_json::Value>,
    pub metadata: serde_json::Value,
}

/// Input to `AuditWriter::append`, before the `id`/`at` columns exist.
#[derive(Debug, Clone)]
pub struct NewAuditEvent {
    pub actor: Actor,
    pub kind: AuditEventKind,
    pub target_id: String,
    pub description: String,
    pub previous_value: Option<serde_json::Value>,
    pub new_value: Option<serde_json::Value>,
    pub metadata: serde_json::Value,
}
