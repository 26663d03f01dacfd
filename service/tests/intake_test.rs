// Copyright 2023-, GraphOps and Semiotic Labs.
// SPDX-License-Identifier: Apache-2.0

//! Pledge intake: id generation, initial status, and the
//! confirmation email sent to the donor plus chapter leads.

mod common;

use std::collections::HashMap;

use sqlx::PgPool;

use common::FakeMailGateway;
use service::intake::{NewPledgeRequest, PledgeIntake};
use service::ledger::models::{Duration, PledgeStatus};
use service::ledger::{AuditWriter, PostgresLedgerStore};
use service::templates::TemplateRenderer;

#[test_log::test(sqlx::test(migrations = "./migrations"))]
async fn create_pledge_assigns_id_and_sends_confirmation(pool: PgPool) {
    let store = PostgresLedgerStore::new(pool);
    let audit = AuditWriter::new(store.clone());
    let mail = FakeMailGateway::new();
    let templates = TemplateRenderer::load_from_dir(std::path::Path::new("templates")).unwrap();

    let mut duration_amounts = HashMap::new();
    duration_amounts.insert("one-year".to_string(), 50_000);

    let mut chapter_leads = HashMap::new();
    chapter_leads.insert("default".to_string(), vec!["lead@example.org".to_string()]);

    let always_cc = vec!["admin@example.org".to_string()];

    let intake = PledgeIntake {
        store: &store,
        audit: &audit,
        mail: &mail,
        templates: &templates,
        duration_amounts: &duration_amounts,
        chapter_leads: &chapter_leads,
        always_cc: &always_cc,
    };

    let pledge = intake
        .create_pledge(NewPledgeRequest {
            donor_email: "donor@donors.test".to_string(),
            donor_name: "A Donor".to_string(),
            donor_chapter: "default".to_string(),
            duration: Duration::OneYear,
            zakat: false,
            request_receipt: true,
        })
        .await
        .unwrap();

    assert!(pledge.pledge_id.as_str().starts_with("PLEDGE-"));
    assert_eq!(pledge.promised_amount, 50_000);
    assert_eq!(pledge.status, PledgeStatus::Pledged);
    assert!(pledge.confirmation_message_id.is_some());

    let sent = mail.sent.lock().unwrap();
    assert_eq!(sent.len(), 1);
    assert!(sent[0].to.contains(&"donor@donors.test".to_string()));

    let stored = store.find_pledge(&pledge.pledge_id).await.unwrap().unwrap();
    assert_eq!(stored.confirmation_message_id, pledge.confirmation_message_id);
}
