// Copyright 2023-, GraphOps and Semiotic Labs.
// SPDX-License-Identifier: Apache-2.0

//! `verify_invariants()`: stored `balance` is an optimisation only, this
//! recomputes every pledge's balance from the receipt/allocation tables
//! and reports drift.

use serde::Serialize;

use crate::error::LedgerError;
use crate::ids::PledgeId;

use super::store::PostgresLedgerStore;

#[derive(Debug, Clone, Serialize)]
pub struct DriftReport {
    pub pledge_id: PledgeId,
    pub stored_balance: i64,
    pub recomputed_balance: i64,
    pub stored_verified_total: i64,
    pub recomputed_verified_total: i64,
}

impl DriftReport {
    pub fn is_drifted(&self) -> bool {
        self.stored_balance != self.recomputed_balance
            || self.stored_verified_total != self.recomputed_verified_total
    }
}

/// Recomputes every pledge's authoritative balance/verified_total from the
/// receipt and allocation tables and flags any row whose cached value has
/// drifted from it. Never mutates anything.
pub async fn verify_invariants(store: &PostgresLedgerStore) -> Result<Vec<DriftReport>, LedgerError> {
    let pledges = store.snapshot_pledges().await?;
    let mut reports = Vec::new();
    for pledge in pledges {
        let recomputed_verified_total = store.valid_receipts_total(&pledge.pledge_id).await?;
        let committed = store.committed_total_for_pledge(&pledge.pledge_id).await?;
        let recomputed_balance = recomputed_verified_total - committed;

        let report = DriftReport {
            pledge_id: pledge.pledge_id.clone(),
            stored_balance: pledge.balance,
            recomputed_balance,
            stored_verified_total: pledge.verified_total,
            recomputed_verified_total,
        };
        if report.is_drifted() {
            reports.push(report);
        }
    }
    Ok(reports)
}
