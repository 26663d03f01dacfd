// Copyright 2023-, GraphOps and Semiotic Labs.
// SPDX-License-Identifier: Apache-2.0

//! Receipt ingestion scenarios: a duplicate attachment is rejected
//! without moving the verified total, and a partial payment topped up
//! days later crosses into full proof.

mod common;

use chrono::{Duration, Utc};
use sqlx::PgPool;

use common::{FakeMailGateway, ScriptedClassifier};
use service::ids::PledgeId;
use service::ingestor::ReceiptIngestor;
use service::ledger::models::{Confidence, Pledge, PledgeStatus, ReceiptStatus};
use service::ledger::{AuditWriter, PostgresLedgerStore};
use service::lm::{ReceiptCategory, ValidReceiptLine};
use service::lock::ScriptLock;
use service::mail::{labels, Attachment, Message, Rfc822MessageId, Thread, ThreadId};

fn pledge(pledge_id: &str, promised_amount: i64) -> Pledge {
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
        verified_total: 0,
        balance: 0,
        outstanding: promised_amount,
        confirmation_message_id: Some("confirm@donors.test".to_string()),
        last_receipt_message_id: None,
        created_at: now,
        updated_at: now,
    }
}

fn seed_thread(mail: &FakeMailGateway, thread_id: &str, subject: &str, filename: &str, body: &str) {
    let thread = Thread {
        id: ThreadId(thread_id.to_string()),
        subject: subject.to_string(),
        labels: vec![labels::TO_PROCESS.to_string()],
    };
    let message = Message {
        rfc822_message_id: Rfc822MessageId(format!("{thread_id}-msg@donors.test")),
        from: "donor@donors.test".to_string(),
        to: vec!["ledger@example.org".to_string()],
        subject: subject.to_string(),
        body_text: body.to_string(),
        received_at: Utc::now(),
        attachments: vec![Attachment {
            filename: filename.to_string(),
            content_type: "application/pdf".to_string(),
            bytes: b"receipt-bytes".to_vec(),
        }],
    };
    mail.seed_thread(thread, vec![message]);
}

#[test_log::test(sqlx::test(migrations = "./migrations"))]
async fn duplicate_receipt_leaves_verified_total_unchanged(pool: PgPool) {
    let store = PostgresLedgerStore::new(pool);
    let audit = AuditWriter::new(store.clone());
    let mail = FakeMailGateway::new();
    let classifier = ScriptedClassifier::new();
    let lock = ScriptLock::new();

    store.append_pledge(&pledge("PLEDGE-2025-9", 50_000)).await.unwrap();

    let line = ValidReceiptLine {
        filename: "transfer.pdf".to_string(),
        amount: 50_000,
        date: Utc::now(),
        confidence_score: Confidence::High,
        duplicate_of: None,
        rejection_reason: None,
    };
    let extraction = service::lm::ReceiptExtraction {
        category: ReceiptCategory::ReceiptSubmission,
        summary: "transfer receipt".to_string(),
        valid_receipts: vec![line],
        suggested_reply: None,
        reasoning: "matches promised amount".to_string(),
    };
    classifier.receipt_responses.lock().unwrap().push(Ok(extraction.clone()));
    classifier.receipt_responses.lock().unwrap().push(Ok(extraction));

    seed_thread(&mail, "thread-1", "Ref: PLEDGE-2025-9", "transfer.pdf", "please find attached our transfer");

    let ingestor = ReceiptIngestor {
        store: &store,
        audit: &audit,
        mail: &mail,
        classifier: &classifier,
        lock: &lock,
        blob_receipts_dir: "/tmp/hostel-ledger-test-receipts",
        service_mailbox_address: "ledger@example.org",
        admin_alert_address: "admin@example.org",
    };

    ingestor.run_once().await.unwrap();
    mail.threads.lock().unwrap()[0].labels = vec![labels::TO_PROCESS.to_string()];
    ingestor.run_once().await.unwrap();

    let receipts = store.receipts_for_pledge(&PledgeId::from("PLEDGE-2025-9")).await.unwrap();
    assert_eq!(receipts.len(), 2);
    assert_eq!(receipts[0].status, ReceiptStatus::Valid);
    assert_eq!(receipts[1].status, ReceiptStatus::Duplicate);

    let updated = store.find_pledge(&PledgeId::from("PLEDGE-2025-9")).await.unwrap().unwrap();
    assert_eq!(updated.verified_total, 50_000);
}

#[test_log::test(sqlx::test(migrations = "./migrations"))]
async fn partial_payment_then_topup_crosses_into_proof_submitted(pool: PgPool) {
    let store = PostgresLedgerStore::new(pool);
    let audit = AuditWriter::new(store.clone());
    let mail = FakeMailGateway::new();
    let classifier = ScriptedClassifier::new();
    let lock = ScriptLock::new();

    store.append_pledge(&pledge("PLEDGE-2025-10", 50_000)).await.unwrap();

    seed_thread(&mail, "thread-2", "Ref: PLEDGE-2025-10", "first.pdf", "partial transfer");
    classifier.receipt_responses.lock().unwrap().push(Ok(service::lm::ReceiptExtraction {
        category: ReceiptCategory::ReceiptSubmission,
        summary: "first installment".to_string(),
        valid_receipts: vec![ValidReceiptLine {
            filename: "first.pdf".to_string(),
            amount: 30_000,
            date: Utc::now(),
            confidence_score: Confidence::High,
            duplicate_of: None,
            rejection_reason: None,
        }],
        suggested_reply: None,
        reasoning: "first installment".to_string(),
    }));

    let ingestor = ReceiptIngestor {
        store: &store,
        audit: &audit,
        mail: &mail,
        classifier: &classifier,
        lock: &lock,
        blob_receipts_dir: "/tmp/hostel-ledger-test-receipts",
        service_mailbox_address: "ledger@example.org",
        admin_alert_address: "admin@example.org",
    };
    ingestor.run_once().await.unwrap();

    let mid = store.find_pledge(&PledgeId::from("PLEDGE-2025-10")).await.unwrap().unwrap();
    assert_eq!(mid.status, PledgeStatus::PartialReceipt);
    assert_eq!(mid.verified_total, 30_000);

    seed_thread(&mail, "thread-3", "Ref: PLEDGE-2025-10", "topup.pdf", "remaining transfer");
    {
        let mut threads = mail.threads.lock().unwrap();
        for t in threads.iter_mut() {
            if t.id.0 == "thread-2" {
                t.labels = vec![labels::PROCESSED.to_string()];
            }
        }
    }
    classifier.receipt_responses.lock().unwrap().push(Ok(service::lm::ReceiptExtraction {
        category: ReceiptCategory::ReceiptSubmission,
        summary: "top up".to_string(),
        valid_receipts: vec![ValidReceiptLine {
            filename: "topup.pdf".to_string(),
            amount: 20_000,
            date: Utc::now() + Duration::days(3),
            confidence_score: Confidence::High,
            duplicate_of: None,
            rejection_reason: None,
        }],
        suggested_reply: None,
        reasoning: "remainder".to_string(),
    }));
    ingestor.run_once().await.unwrap();

    let final_pledge = store.find_pledge(&PledgeId::from("PLEDGE-2025-10")).await.unwrap().unwrap();
    assert_eq!(final_pledge.status, PledgeStatus::ProofSubmitted);
    assert_eq!(final_pledge.verified_total, 50_000);
}
