// Copyright 2023-, GraphOps and Semiotic Labs.
// SPDX-License-Identifier: Apache-2.0

//! Reply watchdog scenario: an ambiguous hostel reply leaves every open
//! allocation untouched, flags the thread for manual review, and raises
//! exactly one alert.

mod common;

use chrono::Utc;
use sqlx::PgPool;

use common::{FakeMailGateway, ScriptedClassifier};
use service::ids::{AllocId, BeneficiaryId, PledgeId};
use service::ledger::models::{
    Allocation, AllocationStatus, AuditEventKind, BeneficiaryConfidential, BeneficiaryOps, Pledge, PledgeStatus,
};
use service::ledger::{AuditWriter, PostgresLedgerStore};
use service::lm::{HostelReplyClassification, ReplyStatus};
use service::lock::ScriptLock;
use service::mail::{labels, Message, Rfc822MessageId, Thread, ThreadId};
use service::templates::TemplateRenderer;
use service::watchdog::ReplyWatchdog;

fn pledge(pledge_id: &str, amount: i64) -> Pledge {
    let now = Utc::now();
    Pledge {
        pledge_id: PledgeId::from(pledge_id),
        donor_email: "donor@donors.test".to_string(),
        donor_name: "A Donor".to_string(),
        donor_chapter: "default".to_string(),
        duration: "one-year".to_string(),
        promised_amount: amount,
        zakat: false,
        request_receipt: true,
        status: PledgeStatus::FullyAllocated,
        verified_total: amount,
        balance: 0,
        outstanding: 0,
        confirmation_message_id: Some("confirm@donors.test".to_string()),
        last_receipt_message_id: None,
        created_at: now,
        updated_at: now,
    }
}

fn allocation(alloc_id: &str, pledge_id: &str, beneficiary_id: &str, amount: i64) -> Allocation {
    let now = Utc::now();
    Allocation {
        alloc_id: AllocId::from(alloc_id),
        batch_id: None,
        pledge_id: PledgeId::from(pledge_id),
        beneficiary_id: BeneficiaryId::from(beneficiary_id),
        amount,
        status: AllocationStatus::PendingHostel,
        created_at: now,
        hostel_intimation_message_id: "hostel-msg@example.org".to_string(),
        hostel_intimation_at: now,
        donor_intermediate_message_id: "donor-msg@example.org".to_string(),
        donor_intermediate_at: now,
        hostel_reply_message_id: None,
        hostel_reply_at: None,
        donor_final_message_id: None,
        donor_final_at: None,
        updated_at: now,
    }
}

#[test_log::test(sqlx::test(migrations = "./migrations"))]
async fn ambiguous_hostel_reply_leaves_allocation_open_and_alerts(pool: PgPool) {
    let store = PostgresLedgerStore::new(pool);
    let audit = AuditWriter::new(store.clone());
    let mail = FakeMailGateway::new();
    let classifier = ScriptedClassifier::new();
    let templates = TemplateRenderer::load_from_dir(std::path::Path::new("templates")).unwrap();
    let lock = ScriptLock::new();

    store.append_pledge(&pledge("PLEDGE-2025-20", 50_000)).await.unwrap();
    store
        .upsert_beneficiary_ops(&BeneficiaryOps {
            beneficiary_id: BeneficiaryId::from("CMS-400"),
            school: "Some School".to_string(),
            total_due: 50_000,
            cleared: 0,
            pending: 0,
        })
        .await
        .unwrap();
    store
        .upsert_beneficiary_confidential(&BeneficiaryConfidential {
            beneficiary_id: BeneficiaryId::from("CMS-400"),
            name: "Some Hostel".to_string(),
            sensitive_ids: serde_json::json!({}),
        })
        .await
        .unwrap();
    store
        .append_allocation(&allocation("ALLOC-2025-1", "PLEDGE-2025-20", "CMS-400", 50_000))
        .await
        .unwrap();

    let thread = Thread {
        id: ThreadId("hostel-thread-1".to_string()),
        subject: "Re: donation transfer Ref: PLEDGE-2025-20".to_string(),
        labels: vec![],
    };
    let message = Message {
        rfc822_message_id: Rfc822MessageId("hostel-reply@hostel.test".to_string()),
        from: "accounts@hostel.test".to_string(),
        to: vec!["ledger@example.org".to_string()],
        subject: thread.subject.clone(),
        body_text: "we are still reconciling our records, unclear which transfer this refers to".to_string(),
        received_at: Utc::now(),
        attachments: Vec::new(),
    };
    mail.seed_thread(thread, vec![message]);

    classifier.reply_responses.lock().unwrap().push(Ok(HostelReplyClassification {
        status: ReplyStatus::Ambiguous,
        confirmed_alloc_ids: Vec::new(),
        reasoning: "hostel reply does not clearly confirm or deny any transfer".to_string(),
    }));

    let watchdog = ReplyWatchdog {
        store: &store,
        audit: &audit,
        mail: &mail,
        classifier: &classifier,
        templates: &templates,
        lock: &lock,
        admin_alert_address: "admin@example.org",
    };
    watchdog.run_once().await.unwrap();

    let allocations = store.allocations_for_pledge(&PledgeId::from("PLEDGE-2025-20")).await.unwrap();
    assert_eq!(allocations.len(), 1);
    assert_eq!(allocations[0].status, AllocationStatus::PendingHostel);

    let threads = mail.threads.lock().unwrap();
    assert!(threads[0].labels.iter().any(|l| l == labels::WATCHDOG_MANUAL_REVIEW));
    drop(threads);

    let events = store.audit_events_for_target("PLEDGE-2025-20").await.unwrap();
    assert_eq!(events.iter().filter(|e| e.kind == AuditEventKind::Alert).count(), 1);

    assert_eq!(mail.sent.lock().unwrap().len(), 1);
}
