// Copyright 2023-, GraphOps and Semiotic Labs.
// SPDX-License-Identifier: Apache-2.0

//! Allocation scenarios: happy path commit, the greedy-cap batch split,
//! and the concurrent-allocation race.

mod common;

use std::path::Path;
use std::sync::Arc;

use chrono::Utc;
use sqlx::PgPool;

use common::FakeMailGateway;
use service::actor::Actor;
use service::allocation::{AllocationLine, AllocationService};
use service::ids::{BeneficiaryId, PledgeId};
use service::ledger::models::{BeneficiaryConfidential, BeneficiaryOps, Pledge, PledgeStatus};
use service::ledger::{AuditWriter, PostgresLedgerStore};
use service::lock::ScriptLock;
use service::templates::TemplateRenderer;

fn pledge(pledge_id: &str, promised_amount: i64, verified_total: i64, balance: i64, status: PledgeStatus) -> Pledge {
    let now = Utc::now();
    Pledge {
        pledge_id: PledgeId::from(pledge_id),
        donor_email: format!("{pledge_id}@donors.test"),
        donor_name: "A Donor".to_string(),
        donor_chapter: "default".to_string(),
        duration: "one-year".to_string(),
        promised_amount,
        zakat: false,
        request_receipt: true,
        status,
        verified_total,
        balance,
        outstanding: promised_amount - verified_total,
        confirmation_message_id: Some("confirm@donors.test".to_string()),
        last_receipt_message_id: None,
        created_at: now,
        updated_at: now,
    }
}

async fn seed_beneficiary(store: &PostgresLedgerStore, id: &str, total_due: i64, pending: i64) {
    store
        .upsert_beneficiary_ops(&BeneficiaryOps {
            beneficiary_id: BeneficiaryId::from(id),
            school: format!("{id} school"),
            total_due,
            cleared: 0,
            pending,
        })
        .await
        .unwrap();
    store
        .upsert_beneficiary_confidential(&BeneficiaryConfidential {
            beneficiary_id: BeneficiaryId::from(id),
            name: format!("{id} hostel"),
            sensitive_ids: serde_json::json!({}),
        })
        .await
        .unwrap();
}

#[test_log::test(sqlx::test(migrations = "./migrations"))]
async fn happy_path_allocation_fully_allocates_pledge(pool: PgPool) {
    let store = PostgresLedgerStore::new(pool);
    let audit = AuditWriter::new(store.clone());
    let mail = FakeMailGateway::new();
    let templates = TemplateRenderer::load_from_dir(Path::new("templates")).unwrap();
    let lock = ScriptLock::new();

    store
        .append_pledge(&pledge("PLEDGE-2025-1", 50_000, 50_000, 50_000, PledgeStatus::ProofSubmitted))
        .await
        .unwrap();
    seed_beneficiary(&store, "CMS-111", 60_000, 60_000).await;

    let service = AllocationService {
        store: &store,
        audit: &audit,
        mail: &mail,
        templates: &templates,
        lock: &lock,
        hostel_office_address: "hostel-office@example.org",
    };

    let allocation = service
        .allocate_single(
            Actor::Operator("ops@example.org".to_string()),
            &PledgeId::from("PLEDGE-2025-1"),
            &BeneficiaryId::from("CMS-111"),
            50_000,
        )
        .await
        .unwrap();
    assert_eq!(allocation.amount, 50_000);

    let updated_pledge = store.find_pledge(&PledgeId::from("PLEDGE-2025-1")).await.unwrap().unwrap();
    assert_eq!(updated_pledge.status, PledgeStatus::FullyAllocated);

    let beneficiary = store.find_beneficiary_ops(&BeneficiaryId::from("CMS-111")).await.unwrap().unwrap();
    assert_eq!(beneficiary.pending, 10_000);

    let events = store.audit_events_for_target(&allocation.alloc_id.to_string()).await.unwrap();
    assert_eq!(events.len(), 1);
    let status_events = store.audit_events_for_target("PLEDGE-2025-1").await.unwrap();
    assert!(status_events.iter().any(|e| matches!(e.kind, service::ledger::models::AuditEventKind::StatusChange)));
}

#[test_log::test(sqlx::test(migrations = "./migrations"))]
async fn batch_allocation_caps_last_line_to_beneficiary_pending(pool: PgPool) {
    let store = PostgresLedgerStore::new(pool);
    let audit = AuditWriter::new(store.clone());
    let mail = FakeMailGateway::new();
    let templates = TemplateRenderer::load_from_dir(Path::new("templates")).unwrap();
    let lock = ScriptLock::new();

    store
        .append_pledge(&pledge("PLEDGE-2025-2", 25_000, 25_000, 25_000, PledgeStatus::ProofSubmitted))
        .await
        .unwrap();
    store
        .append_pledge(&pledge("PLEDGE-2025-3", 25_000, 25_000, 25_000, PledgeStatus::ProofSubmitted))
        .await
        .unwrap();
    seed_beneficiary(&store, "CMS-200", 30_000, 30_000).await;

    let service = AllocationService {
        store: &store,
        audit: &audit,
        mail: &mail,
        templates: &templates,
        lock: &lock,
        hostel_office_address: "hostel-office@example.org",
    };

    let lines = vec![
        AllocationLine { pledge_id: PledgeId::from("PLEDGE-2025-2"), amount: 25_000 },
        AllocationLine { pledge_id: PledgeId::from("PLEDGE-2025-3"), amount: 25_000 },
    ];
    let allocations = service
        .allocate_batch(Actor::System, lines, &BeneficiaryId::from("CMS-200"))
        .await
        .unwrap();

    assert_eq!(allocations.len(), 2);
    assert_eq!(allocations[0].amount, 25_000);
    assert_eq!(allocations[1].amount, 5_000);
    assert!(allocations[0].batch_id.is_some());
    assert_eq!(allocations[0].batch_id, allocations[1].batch_id);

    let beneficiary = store.find_beneficiary_ops(&BeneficiaryId::from("CMS-200")).await.unwrap().unwrap();
    assert_eq!(beneficiary.pending, 0);
    assert_eq!(mail.sent.lock().unwrap().len(), 3); // one hostel intimation + two donor intermediates
}

#[test_log::test(sqlx::test(migrations = "./migrations"))]
async fn concurrent_allocation_race_only_one_succeeds(pool: PgPool) {
    let store = PostgresLedgerStore::new(pool);
    let audit = AuditWriter::new(store.clone());
    let mail = FakeMailGateway::new();
    let templates = TemplateRenderer::load_from_dir(Path::new("templates")).unwrap();
    let lock = ScriptLock::new();

    store
        .append_pledge(&pledge("PLEDGE-2025-4", 50_000, 50_000, 50_000, PledgeStatus::ProofSubmitted))
        .await
        .unwrap();
    seed_beneficiary(&store, "CMS-300", 100_000, 100_000).await;

    let service = Arc::new(AllocationService {
        store: &store,
        audit: &audit,
        mail: &mail,
        templates: &templates,
        lock: &lock,
        hostel_office_address: "hostel-office@example.org",
    });

    let pledge_id = PledgeId::from("PLEDGE-2025-4");
    let beneficiary_id = BeneficiaryId::from("CMS-300");

    let (first, second) = tokio::join!(
        service.allocate_single(Actor::System, &pledge_id, &beneficiary_id, 40_000),
        service.allocate_single(Actor::System, &pledge_id, &beneficiary_id, 20_000),
    );

    let results = [first, second];
    let ok_count = results.iter().filter(|r| r.is_ok()).count();
    let err_count = results.iter().filter(|r| r.is_err()).count();
    assert_eq!(ok_count, 1);
    assert_eq!(err_count, 1);

    let final_pledge = store.find_pledge(&pledge_id).await.unwrap().unwrap();
    assert!(final_pledge.balance >= 0);
}
