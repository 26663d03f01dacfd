// Copyright 2023-, GraphOps and Semiotic Labs.
// SPDX-License-Identifier: Apache-2.0

//! Structured-output schemas for C4. Both schemas use a
//! closed-set enum for their discriminant and a mandatory `reasoning`
//! field; anything outside the enum fails to parse rather than being
//! salvaged.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::ids::AllocId;
use crate::ledger::models::Confidence;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ReceiptCategory {
    ReceiptSubmission,
    Question,
    Irrelevant,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ValidReceiptLine {
    pub filename: String,
    /// What the donor's email body claimed the transfer amount to be,
    /// when the body states one; `None` when only the attachment carries it.
    #[serde(default)]
    pub declared_amount: Option<i64>,
    pub amount: i64,
    pub date: DateTime<Utc>,
    pub confidence_score: Confidence,
    pub duplicate_of: Option<String>,
    pub rejection_reason: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReceiptExtraction {
    pub category: ReceiptCategory,
    pub summary: String,
    pub valid_receipts: Vec<ValidReceiptLine>,
    pub suggested_reply: Option<String>,
    pub reasoning: String,
}

/// Input to receipt extraction: the email body, attachment
/// blobs, and the constraints passed in-prompt (`pledge_date ≤ date ≤
/// email_date`, amount reconciliation against body text).
pub struct ReceiptExtractionInput<'a> {
    pub body_text: &'a str,
    pub attachments: &'a [crate::mail::types::Attachment],
    pub pledge_created_at: DateTime<Utc>,
    pub email_received_at: DateTime<Utc>,
    pub promised_amount: i64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ReplyStatus {
    ConfirmedAll,
    Partial,
    Ambiguous,
    Query,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HostelReplyClassification {
    pub status: ReplyStatus,
    pub confirmed_alloc_ids: Vec<AllocId>,
    pub reasoning: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct OpenAllocationRef {
    pub alloc_id: AllocId,
    pub amount: i64,
    pub beneficiary_id: String,
}

pub struct HostelReplyInput<'a> {
    pub thread_text: &'a str,
    pub open_allocations: &'a [OpenAllocationRef],
}
