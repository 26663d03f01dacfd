// Copyright 2023-, GraphOps and Semiotic Labs.
// SPDX-License-Identifier: Apache-2.0

//! Errors typed by origin: validation, concurrency, external
//! I/O, data integrity. Each subsystem gets its own enum; `AppError` is the
//! composition surfaced at the HTTP boundary.

use axum::{http::StatusCode, response::IntoResponse, Json};
use serde_json::json;

use crate::lock::LockError;
use crate::state_machine::StateError;

#[derive(Debug, thiserror::Error)]
pub enum LedgerError {
    #[error("row not found in {table}: {column}={value}")]
    RowNotFound {
        table: &'static str,
        column: &'static str,
        value: String,
    },
    #[error("row position stale, concurrent reorder in {table}")]
    StaleRow { table: &'static str },
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
}

#[derive(Debug, thiserror::Error)]
pub enum MailError {
    #[error("mail gateway timed out")]
    Timeout,
    #[error("mail gateway request failed: {0}")]
    Transport(reqwest::Error),
    #[error("mail gateway returned an unexpected response: {0}")]
    Protocol(String),
}

impl From<reqwest::Error> for MailError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_timeout() {
            MailError::Timeout
        } else {
            MailError::Transport(e)
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ClassifierError {
    #[error("classifier call timed out")]
    Timeout,
    #[error("classifier request failed: {0}")]
    Transport(reqwest::Error),
    #[error("classifier returned output outside the enforced schema: {0}")]
    SchemaViolation(String),
}

impl From<reqwest::Error> for ClassifierError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_timeout() {
            ClassifierError::Timeout
        } else {
            ClassifierError::Transport(e)
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum AllocationError {
    #[error("system busy, try again")]
    SystemBusy,
    #[error("pledge {0} not found")]
    PledgeNotFound(String),
    #[error("beneficiary {0} not found")]
    BeneficiaryNotFound(String),
    #[error("pledge {pledge_id} is in status {status:?}, which cannot be allocated from")]
    InvalidPledgeStatus {
        pledge_id: String,
        status: crate::ledger::models::PledgeStatus,
    },
    #[error("amount {amount} exceeds pledge balance {balance}")]
    InsufficientFunds { amount: i64, balance: i64 },
    #[error("amount {amount} exceeds beneficiary pending need {pending}")]
    ExceedsBeneficiaryNeed { amount: i64, pending: i64 },
    #[error("batch allocation requested zero valid line items")]
    EmptyBatch,
    #[error("notify phase failed, transaction aborted: {0}")]
    NotifyFailed(#[from] MailError),
    #[error("state transition rejected: {0}")]
    InvalidTransition(#[from] StateError),
    #[error("ledger error: {0}")]
    Ledger(#[from] LedgerError),
    #[error("template rendering failed: {0}")]
    Template(#[from] crate::templates::TemplateError),
}

impl From<LockError> for AllocationError {
    fn from(_: LockError) -> Self {
        AllocationError::SystemBusy
    }
}

#[derive(Debug, thiserror::Error)]
pub enum IngestError {
    #[error("system busy, try again later")]
    SystemBusy,
    #[error("mail gateway error: {0}")]
    Mail(#[from] MailError),
    #[error("ledger error: {0}")]
    Ledger(#[from] LedgerError),
    #[error("blob storage error: {0}")]
    Storage(String),
}

impl From<LockError> for IngestError {
    fn from(_: LockError) -> Self {
        IngestError::SystemBusy
    }
}

#[derive(Debug, thiserror::Error)]
pub enum WatchdogError {
    #[error("system busy, try again later")]
    SystemBusy,
    #[error("mail gateway error: {0}")]
    Mail(#[from] MailError),
    #[error("ledger error: {0}")]
    Ledger(#[from] LedgerError),
    #[error("state transition rejected: {0}")]
    InvalidTransition(#[from] StateError),
}

impl From<LockError> for WatchdogError {
    fn from(_: LockError) -> Self {
        WatchdogError::SystemBusy
    }
}

/// Composition surfaced to the operator UI.
#[derive(Debug, thiserror::Error)]
pub enum AppError {
    #[error("{0}")]
    Allocation(#[from] AllocationError),
    #[error("{0}")]
    Ledger(#[from] LedgerError),
    #[error("not found: {0}")]
    NotFound(String),
}

impl IntoResponse for AppError {
    fn into_response(self) -> axum::response::Response {
        let (status, code) = match &self {
            AppError::Allocation(AllocationError::SystemBusy) => {
                (StatusCode::SERVICE_UNAVAILABLE, "SYSTEM_BUSY")
            }
            AppError::Allocation(AllocationError::InsufficientFunds { .. }) => {
                (StatusCode::UNPROCESSABLE_ENTITY, "INSUFFICIENT_FUNDS")
            }
            AppError::Allocation(AllocationError::ExceedsBeneficiaryNeed { .. }) => {
                (StatusCode::UNPROCESSABLE_ENTITY, "EXCEEDS_BENEFICIARY_NEED")
            }
            AppError::Allocation(AllocationError::InvalidPledgeStatus { .. }) => {
                (StatusCode::UNPROCESSABLE_ENTITY, "INVALID_PLEDGE_STATUS")
            }
            AppError::Allocation(AllocationError::InvalidTransition(_)) => {
                (StatusCode::CONFLICT, "INVALID_TRANSITION")
            }
            AppError::Allocation(AllocationError::NotifyFailed(_)) => {
                (StatusCode::BAD_GATEWAY, "NOTIFY_FAILED")
            }
            AppError::NotFound(_) => (StatusCode::NOT_FOUND, "NOT_FOUND"),
            _ => (StatusCode::INTERNAL_SERVER_ERROR, "INTERNAL"),
        };
        let body = Json(json!({
            "ok": false,
            "code": code,
            "message": self.to_string(),
        }));
        (status, body).into_response()
    }
}
