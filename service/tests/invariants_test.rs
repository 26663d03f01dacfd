// Copyright 2023-, GraphOps and Semiotic Labs.
// SPDX-License-Identifier: Apache-2.0

//! The `verify_invariants` diagnostic: a consistent ledger
//! reports no drift, and a row whose cached balance has been hand-edited
//! out from under it is flagged without being corrected.

use chrono::Utc;
use sqlx::PgPool;

use service::ids::PledgeId;
use service::ledger::invariants::verify_invariants;
use service::ledger::models::{Pledge, PledgeStatus};
use service::ledger::PostgresLedgerStore;

fn pledge(pledge_id: &str, promised_amount: i64, verified_total: i64, balance: i64) -> Pledge {
    let now = Utc::now();
    Pledge {
        pledge_id: PledgeId::from(pledge_id),
        donor_email: "donor@donors.test".to_string(),
        donor_name: "A Donor".to_string(),
        donor_chapter: "default".to_string(),
        duration: "one-year".to_string(),
        promised_amount,
        zakat: false,
        request_receipt: true,
        status: PledgeStatus::Pledged,
        verified_total,
        balance,
        outstanding: promised_amount - verified_total,
        confirmation_message_id: None,
        last_receipt_message_id: None,
        created_at: now,
        updated_at: now,
    }
}

#[test_log::test(sqlx::test(migrations = "./migrations"))]
async fn consistent_ledger_reports_no_drift(pool: PgPool) {
    let store = PostgresLedgerStore::new(pool);
    store.append_pledge(&pledge("PLEDGE-2025-30", 10_000, 0, 0)).await.unwrap();

    let reports = verify_invariants(&store).await.unwrap();
    assert!(reports.is_empty());
}

#[test_log::test(sqlx::test(migrations = "./migrations"))]
async fn stale_cached_balance_is_flagged_not_corrected(pool: PgPool) {
    let store = PostgresLedgerStore::new(pool);
    store.append_pledge(&pledge("PLEDGE-2025-31", 10_000, 5_000, 5_000)).await.unwrap();

    let reports = verify_invariants(&store).await.unwrap();
    assert_eq!(reports.len(), 1);
    let report = &reports[0];
    assert_eq!(report.stored_verified_total, 5_000);
    assert_eq!(report.recomputed_verified_total, 0);
    assert!(report.is_drifted());

    let pledge_row = store.find_pledge(&PledgeId::from("PLEDGE-2025-31")).await.unwrap().unwrap();
    assert_eq!(pledge_row.verified_total, 5_000);
}
