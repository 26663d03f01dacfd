// Copyright 2023-, GraphOps and Semiotic Labs.
// SPDX-License-Identifier: Apache-2.0

//! C1: the ledger store over a typed Postgres schema. Each entity gets
//! its own typed repository methods rather than a single stringly-typed
//! dispatcher.
//!
//! Row updates use optimistic concurrency on `updated_at`: callers pass
//! back the `updated_at` they read, and a zero-rows-affected update
//! fails loudly as `LedgerError::StaleRow` rather than silently clobbering
//! a concurrent writer.

use chrono::{DateTime, Utc};
use sqlx::PgPool;
use tracing::instrument;

use crate::error::LedgerError;
use crate::ids::{AllocId, BatchId, BeneficiaryId, PledgeId, ReceiptId};

use super::models::{
    Allocation, AllocationStatus, AuditEvent, AuditEventKind, BeneficiaryConfidential,
    BeneficiaryOps, NewAuditEvent, Pledge, PledgeStatus, Receipt, ReceiptStatus,
};

#[derive(Clone)]
pub struct PostgresLedgerStore {
    pool: PgPool,
}

impl PostgresLedgerStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    // ---- pledges ---------------------------------------------------

    #[instrument(skip(self))]
    pub async fn find_pledge(&self, pledge_id: &PledgeId) -> Result<Option<Pledge>, LedgerError> {
        let row = sqlx::query_as::<_, Pledge>("SELECT * FROM pledges WHERE pledge_id = $1")
            .bind(pledge_id.as_str())
            .fetch_optional(&self.pool)
            .await?;
        Ok(row)
    }

    #[instrument(skip(self, pledge))]
    pub async fn append_pledge(&self, pledge: &Pledge) -> Result<(), LedgerError> {
        sqlx::query(
            r#"
            INSERT INTO pledges (
                pledge_id, donor_email, donor_name, donor_chapter, duration,
                promised_amount, zakat, request_receipt, status, verified_total,
                balance, outstanding, confirmation_message_id, last_receipt_message_id,
                created_at, updated_at
            ) VALUES ($1,$2,$3,$4,$5,$6,$7,$8,$9,$10,$11,$12,$13,$14,$15,$16)
            "#,
        )
        .bind(pledge.pledge_id.as_str())
        .bind(&pledge.donor_email)
        .bind(&pledge.donor_name)
        .bind(&pledge.donor_chapter)
        .bind(&pledge.duration)
        .bind(pledge.promised_amount)
        .bind(pledge.zakat)
        .bind(pledge.request_receipt)
        .bind(pledge.status)
        .bind(pledge.verified_total)
        .bind(pledge.balance)
        .bind(pledge.outstanding)
        .bind(&pledge.confirmation_message_id)
        .bind(&pledge.last_receipt_message_id)
        .bind(pledge.created_at)
        .bind(pledge.updated_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// Optimistic-concurrency update: `expected_updated_at` must match the
    /// row's current `updated_at`, or this fails with `LedgerError::StaleRow`.
    #[instrument(skip(self))]
    #[allow(clippy::too_many_arguments)]
    pub async fn update_pledge_rollup(
        &self,
        pledge_id: &PledgeId,
        expected_updated_at: DateTime<Utc>,
        status: PledgeStatus,
        verified_total: i64,
        balance: i64,
        outstanding: i64,
        last_receipt_message_id: Option<&str>,
    ) -> Result<Pledge, LedgerError> {
        let now = Utc::now();
        let updated = sqlx::query_as::<_, Pledge>(
            r#"
            UPDATE pledges SET
                status = $1, verified_total = $2, balance = $3, outstanding = $4,
                last_receipt_message_id = COALESCE($5, last_receipt_message_id),
                updated_at = $6
            WHERE pledge_id = $7 AND updated_at = $8
            RETURNING *
            "#,
        )
        .bind(status)
        .bind(verified_total)
        .bind(balance)
        .bind(outstanding)
        .bind(last_receipt_message_id)
        .bind(now)
        .bind(pledge_id.as_str())
        .bind(expected_updated_at)
        .fetch_optional(&self.pool)
        .await?;

        updated.ok_or(LedgerError::StaleRow { table: "pledges" })
    }

    pub async fn snapshot_pledges(&self) -> Result<Vec<Pledge>, LedgerError> {
        let rows = sqlx::query_as::<_, Pledge>("SELECT * FROM pledges ORDER BY pledge_id")
            .fetch_all(&self.pool)
            .await?;
        Ok(rows)
    }

    pub async fn set_confirmation_message_id(
        &self,
        pledge_id: &PledgeId,
        message_id: &str,
    ) -> Result<(), LedgerError> {
        sqlx::query("UPDATE pledges SET confirmation_message_id = $1 WHERE pledge_id = $2")
            .bind(message_id)
            .bind(pledge_id.as_str())
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    /// Monotonic sequence number for `PLEDGE-<year>-<seq>`, scoped to the
    /// calendar year.
    pub async fn next_pledge_seq(&self, year: i32) -> Result<u32, LedgerError> {
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM pledges WHERE pledge_id LIKE $1")
            .bind(format!("PLEDGE-{year:04}-%"))
            .fetch_one(&self.pool)
            .await?;
        Ok(count as u32 + 1)
    }

    // ---- receipts ----------------------------------------------------

    #[instrument(skip(self))]
    pub async fn find_duplicate_receipt(
        &self,
        pledge_id: &PledgeId,
        verified_amount: i64,
        transfer_date: DateTime<Utc>,
        normalised_filename: &str,
    ) -> Result<Option<Receipt>, LedgerError> {
        let row = sqlx::query_as::<_, Receipt>(
            r#"
            SELECT * FROM receipts
            WHERE pledge_id = $1 AND verified_amount = $2 AND transfer_date = $3
              AND normalised_filename = $4 AND status = 'VALID'
            LIMIT 1
            "#,
        )
        .bind(pledge_id.as_str())
        .bind(verified_amount)
        .bind(transfer_date)
        .bind(normalised_filename)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row)
    }

    #[instrument(skip(self, receipt))]
    pub async fn append_receipt(&self, receipt: &Receipt) -> Result<(), LedgerError> {
        sqlx::query(
            r#"
            INSERT INTO receipts (
                receipt_id, pledge_id, processed_at, email_received_at, transfer_date,
                declared_amount, verified_amount, confidence, storage_link, filename,
                normalised_filename, status, updated_at
            ) VALUES ($1,$2,$3,$4,$5,$6,$7,$8,$9,$10,$11,$12,$13)
            "#,
        )
        .bind(receipt.receipt_id.as_str())
        .bind(receipt.pledge_id.as_str())
        .bind(receipt.processed_at)
        .bind(receipt.email_received_at)
        .bind(receipt.transfer_date)
        .bind(receipt.declared_amount)
        .bind(receipt.verified_amount)
        .bind(receipt.confidence)
        .bind(&receipt.storage_link)
        .bind(&receipt.filename)
        .bind(&receipt.normalised_filename)
        .bind(receipt.status)
        .bind(receipt.updated_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub async fn valid_receipts_total(&self, pledge_id: &PledgeId) -> Result<i64, LedgerError> {
        let total: Option<i64> = sqlx::query_scalar(
            "SELECT SUM(verified_amount) FROM receipts WHERE pledge_id = $1 AND status = 'VALID'",
        )
        .bind(pledge_id.as_str())
        .fetch_one(&self.pool)
        .await?;
        Ok(total.unwrap_or(0))
    }

    pub async fn receipt_exists_for_thread_idempotency(
        &self,
        receipt_id: &ReceiptId,
    ) -> Result<bool, LedgerError> {
        let row: Option<i64> = sqlx::query_scalar("SELECT 1 FROM receipts WHERE receipt_id = $1")
            .bind(receipt_id.as_str())
            .fetch_optional(&self.pool)
            .await?;
        Ok(row.is_some())
    }

    pub async fn next_receipt_seq(&self, pledge_id: &PledgeId) -> Result<u32, LedgerError> {
        let count: i64 =
            sqlx::query_scalar("SELECT COUNT(*) FROM receipts WHERE pledge_id = $1")
                .bind(pledge_id.as_str())
                .fetch_one(&self.pool)
                .await?;
        Ok(count as u32 + 1)
    }

    pub async fn receipts_for_pledge(&self, pledge_id: &PledgeId) -> Result<Vec<Receipt>, LedgerError> {
        let rows = sqlx::query_as::<_, Receipt>(
            "SELECT * FROM receipts WHERE pledge_id = $1 ORDER BY processed_at",
        )
        .bind(pledge_id.as_str())
        .fetch_all(&self.pool)
        .await?;
        Ok(rows)
    }

    /// Pledges with funds still awaiting allocation: proof has been submitted and the dynamic
    /// balance is still positive.
    pub async fn list_allocatable_pledges(&self) -> Result<Vec<Pledge>, LedgerError> {
        let rows = sqlx::query_as::<_, Pledge>(
            r#"
            SELECT * FROM pledges
            WHERE status IN ('PROOF_SUBMITTED', 'VERIFIED', 'PARTIALLY_ALLOCATED')
              AND balance > 0
            ORDER BY created_at
            "#,
        )
        .fetch_all(&self.pool)
        .await?;
        Ok(rows)
    }

    // ---- allocations ---------------------------------------------------

    #[instrument(skip(self, allocation))]
    pub async fn append_allocation(&self, allocation: &Allocation) -> Result<(), LedgerError> {
        sqlx::query(
            r#"
            INSERT INTO allocations (
                alloc_id, batch_id, pledge_id, beneficiary_id, amount, status, created_at,
                hostel_intimation_message_id, hostel_intimation_at,
                donor_intermediate_message_id, donor_intermediate_at,
                hostel_reply_message_id, hostel_reply_at,
                donor_final_message_id, donor_final_at, updated_at
            ) VALUES ($1,$2,$3,$4,$5,$6,$7,$8,$9,$10,$11,$12,$13,$14,$15,$16)
            "#,
        )
        .bind(allocation.alloc_id.as_str())
        .bind(allocation.batch_id.as_ref().map(|b| b.as_str()))
        .bind(allocation.pledge_id.as_str())
        .bind(allocation.beneficiary_id.as_str())
        .bind(allocation.amount)
        .bind(allocation.status)
        .bind(allocation.created_at)
        .bind(&allocation.hostel_intimation_message_id)
        .bind(allocation.hostel_intimation_at)
        .bind(&allocation.donor_intermediate_message_id)
        .bind(allocation.donor_intermediate_at)
        .bind(&allocation.hostel_reply_message_id)
        .bind(allocation.hostel_reply_at)
        .bind(&allocation.donor_final_message_id)
        .bind(allocation.donor_final_at)
        .bind(allocation.updated_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub async fn allocations_for_pledge(
        &self,
        pledge_id: &PledgeId,
    ) -> Result<Vec<Allocation>, LedgerError> {
        let rows = sqlx::query_as::<_, Allocation>(
            "SELECT * FROM allocations WHERE pledge_id = $1 ORDER BY created_at",
        )
        .bind(pledge_id.as_str())
        .fetch_all(&self.pool)
        .await?;
        Ok(rows)
    }

    pub async fn open_allocations_for_pledge(
        &self,
        pledge_id: &PledgeId,
    ) -> Result<Vec<Allocation>, LedgerError> {
        let rows = sqlx::query_as::<_, Allocation>(
            "SELECT * FROM allocations WHERE pledge_id = $1 AND status = 'PENDING_HOSTEL' ORDER BY created_at",
        )
        .bind(pledge_id.as_str())
        .fetch_all(&self.pool)
        .await?;
        Ok(rows)
    }

    pub async fn open_allocations_for_batch(
        &self,
        batch_id: &BatchId,
    ) -> Result<Vec<Allocation>, LedgerError> {
        let rows = sqlx::query_as::<_, Allocation>(
            "SELECT * FROM allocations WHERE batch_id = $1 AND status = 'PENDING_HOSTEL' ORDER BY created_at",
        )
        .bind(batch_id.as_str())
        .fetch_all(&self.pool)
        .await?;
        Ok(rows)
    }

    pub async fn snapshot_open_allocations(&self) -> Result<Vec<Allocation>, LedgerError> {
        let rows = sqlx::query_as::<_, Allocation>(
            "SELECT * FROM allocations WHERE status = 'PENDING_HOSTEL' ORDER BY pledge_id, created_at",
        )
        .fetch_all(&self.pool)
        .await?;
        Ok(rows)
    }

    /// Crate-wide monotonic sequence for `ALLOC-<seq>`.
    pub async fn next_alloc_seq(&self) -> Result<u64, LedgerError> {
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM allocations")
            .fetch_one(&self.pool)
            .await?;
        Ok(count as u64 + 1)
    }

    /// Crate-wide monotonic sequence for `BATCH-<seq>`.
    pub async fn next_batch_seq(&self) -> Result<u64, LedgerError> {
        let count: i64 =
            sqlx::query_scalar("SELECT COUNT(DISTINCT batch_id) FROM allocations WHERE batch_id IS NOT NULL")
                .fetch_one(&self.pool)
                .await?;
        Ok(count as u64 + 1)
    }

    pub async fn committed_total_for_pledge(
        &self,
        pledge_id: &PledgeId,
    ) -> Result<i64, LedgerError> {
        let total: Option<i64> = sqlx::query_scalar(
            "SELECT SUM(amount) FROM allocations WHERE pledge_id = $1 AND status != 'CANCELLED'",
        )
        .bind(pledge_id.as_str())
        .fetch_one(&self.pool)
        .await?;
        Ok(total.unwrap_or(0))
    }

    #[instrument(skip(self))]
    pub async fn set_allocation_status(
        &self,
        alloc_id: &AllocId,
        status: AllocationStatus,
    ) -> Result<Allocation, LedgerError> {
        let row = sqlx::query_as::<_, Allocation>(
            "UPDATE allocations SET status = $1, updated_at = now() WHERE alloc_id = $2 RETURNING *",
        )
        .bind(status)
        .bind(alloc_id.as_str())
        .fetch_optional(&self.pool)
        .await?;
        row.ok_or(LedgerError::RowNotFound {
            table: "allocations",
            column: "alloc_id",
            value: alloc_id.to_string(),
        })
    }

    #[instrument(skip(self))]
    pub async fn mark_hostel_verified(
        &self,
        alloc_id: &AllocId,
        reply_message_id: &str,
        reply_at: DateTime<Utc>,
    ) -> Result<Allocation, LedgerError> {
        let row = sqlx::query_as::<_, Allocation>(
            r#"
            UPDATE allocations SET
                status = 'HOSTEL_VERIFIED',
                hostel_reply_message_id = $1,
                hostel_reply_at = $2,
                updated_at = now()
            WHERE alloc_id = $3
            RETURNING *
            "#,
        )
        .bind(reply_message_id)
        .bind(reply_at)
        .bind(alloc_id.as_str())
        .fetch_optional(&self.pool)
        .await?;
        row.ok_or(LedgerError::RowNotFound {
            table: "allocations",
            column: "alloc_id",
            value: alloc_id.to_string(),
        })
    }

    #[instrument(skip(self))]
    pub async fn mark_completed(
        &self,
        alloc_id: &AllocId,
        donor_final_message_id: &str,
        donor_final_at: DateTime<Utc>,
    ) -> Result<Allocation, LedgerError> {
        let row = sqlx::query_as::<_, Allocation>(
            r#"
            UPDATE allocations SET
                status = 'COMPLETED',
                donor_final_message_id = $1,
                donor_final_at = $2,
                updated_at = now()
            WHERE alloc_id = $3
            RETURNING *
            "#,
        )
        .bind(donor_final_message_id)
        .bind(donor_final_at)
        .bind(alloc_id.as_str())
        .fetch_optional(&self.pool)
        .await?;
        row.ok_or(LedgerError::RowNotFound {
            table: "allocations",
            column: "alloc_id",
            value: alloc_id.to_string(),
        })
    }

    // ---- beneficiaries (split store) -------------------------------------

    pub async fn find_beneficiary_ops(
        &self,
        beneficiary_id: &BeneficiaryId,
    ) -> Result<Option<BeneficiaryOps>, LedgerError> {
        let row = sqlx::query_as::<_, BeneficiaryOps>(
            "SELECT * FROM beneficiaries_ops WHERE beneficiary_id = $1",
        )
        .bind(beneficiary_id.as_str())
        .fetch_optional(&self.pool)
        .await?;
        Ok(row)
    }

    pub async fn find_beneficiary_confidential(
        &self,
        beneficiary_id: &BeneficiaryId,
    ) -> Result<Option<BeneficiaryConfidential>, LedgerError> {
        let row = sqlx::query_as::<_, BeneficiaryConfidential>(
            "SELECT * FROM beneficiaries_confidential WHERE beneficiary_id = $1",
        )
        .bind(beneficiary_id.as_str())
        .fetch_optional(&self.pool)
        .await?;
        Ok(row)
    }

    pub async fn list_beneficiaries_ops(&self) -> Result<Vec<BeneficiaryOps>, LedgerError> {
        let rows = sqlx::query_as::<_, BeneficiaryOps>(
            "SELECT * FROM beneficiaries_ops ORDER BY beneficiary_id",
        )
        .fetch_all(&self.pool)
        .await?;
        Ok(rows)
    }

    pub async fn committed_total_for_beneficiary(
        &self,
        beneficiary_id: &BeneficiaryId,
    ) -> Result<i64, LedgerError> {
        let total: Option<i64> = sqlx::query_scalar(
            "SELECT SUM(amount) FROM allocations WHERE beneficiary_id = $1 AND status != 'CANCELLED'",
        )
        .bind(beneficiary_id.as_str())
        .fetch_one(&self.pool)
        .await?;
        Ok(total.unwrap_or(0))
    }

    pub async fn completed_total_for_beneficiary(
        &self,
        beneficiary_id: &BeneficiaryId,
    ) -> Result<i64, LedgerError> {
        let total: Option<i64> = sqlx::query_scalar(
            "SELECT SUM(amount) FROM allocations WHERE beneficiary_id = $1 AND status = 'COMPLETED'",
        )
        .bind(beneficiary_id.as_str())
        .fetch_one(&self.pool)
        .await?;
        Ok(total.unwrap_or(0))
    }

    /// Beneficiary onboarding is an external collaborator's job, but the split store still needs a write path for it to exist.
    pub async fn upsert_beneficiary_ops(&self, beneficiary: &BeneficiaryOps) -> Result<(), LedgerError> {
        sqlx::query(
            r#"
            INSERT INTO beneficiaries_ops (beneficiary_id, school, total_due, cleared, pending)
            VALUES ($1,$2,$3,$4,$5)
            ON CONFLICT (beneficiary_id) DO UPDATE SET
                school = EXCLUDED.school, total_due = EXCLUDED.total_due,
                cleared = EXCLUDED.cleared, pending = EXCLUDED.pending
            "#,
        )
        .bind(beneficiary.beneficiary_id.as_str())
        .bind(&beneficiary.school)
        .bind(beneficiary.total_due)
        .bind(beneficiary.cleared)
        .bind(beneficiary.pending)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub async fn upsert_beneficiary_confidential(
        &self,
        beneficiary: &BeneficiaryConfidential,
    ) -> Result<(), LedgerError> {
        sqlx::query(
            r#"
            INSERT INTO beneficiaries_confidential (beneficiary_id, name, sensitive_ids)
            VALUES ($1,$2,$3)
            ON CONFLICT (beneficiary_id) DO UPDATE SET
                name = EXCLUDED.name, sensitive_ids = EXCLUDED.sensitive_ids
            "#,
        )
        .bind(beneficiary.beneficiary_id.as_str())
        .bind(&beneficiary.name)
        .bind(&beneficiary.sensitive_ids)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub async fn update_beneficiary_pending(
        &self,
        beneficiary_id: &BeneficiaryId,
        pending: i64,
        cleared: i64,
    ) -> Result<(), LedgerError> {
        sqlx::query("UPDATE beneficiaries_ops SET pending = $1, cleared = $2 WHERE beneficiary_id = $3")
            .bind(pending)
            .bind(cleared)
            .bind(beneficiary_id.as_str())
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    // ---- audit (append-only) ---------------------------------------------

    #[instrument(skip(self, event))]
    pub async fn append_audit_event(&self, event: NewAuditEvent) -> Result<AuditEvent, LedgerError> {
        let row = sqlx::query_as::<_, AuditEvent>(
            r#"
            INSERT INTO audit_events (actor, kind, target_id, description, previous_value, new_value, metadata)
            VALUES ($1,$2,$3,$4,$5,$6,$7)
            RETURNING *
            "#,
        )
        .bind(event.actor.to_string())
        .bind(event.kind)
        .bind(event.target_id)
        .bind(event.description)
        .bind(event.previous_value)
        .bind(event.new_value)
        .bind(event.metadata)
        .fetch_one(&self.pool)
        .await?;
        Ok(row)
    }

    pub async fn audit_events_for_target(
        &self,
        target_id: &str,
    ) -> Result<Vec<AuditEvent>, LedgerError> {
        let rows = sqlx::query_as::<_, AuditEvent>(
            "SELECT * FROM audit_events WHERE target_id = $1 ORDER BY at",
        )
        .bind(target_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows)
    }

    // ---- lookup cache (soft cache) ----------------------------------------

    pub async fn refresh_lookup_cache(
        &self,
        key: &str,
        value: serde_json::Value,
    ) -> Result<(), LedgerError> {
        sqlx::query(
            r#"
            INSERT INTO lookup_cache (key, value, refreshed_at) VALUES ($1, $2, now())
            ON CONFLICT (key) DO UPDATE SET value = EXCLUDED.value, refreshed_at = now()
            "#,
        )
        .bind(key)
        .bind(value)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    #[allow(dead_code)]
    pub async fn find_receipt(&self, receipt_id: &ReceiptId) -> Result<Option<Receipt>, LedgerError> {
        let row = sqlx::query_as::<_, Receipt>("SELECT * FROM receipts WHERE receipt_id = $1")
            .bind(receipt_id.as_str())
            .fetch_optional(&self.pool)
            .await?;
        Ok(row)
    }

    #[allow(dead_code)]
    pub fn receipt_status_is_valid(status: ReceiptStatus) -> bool {
        matches!(status, ReceiptStatus::Valid)
    }
}
