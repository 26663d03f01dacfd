// Copyright 2023-, GraphOps and Semiotic Labs.
// SPDX-License-Identifier: Apache-2.0

//! Pledge intake. The form itself is an external
//! collaborator; this module is the thin boundary the core owns: id
//! generation, initial status, and the outbound confirmation email.

use std::collections::HashMap;

use chrono::Utc;
use tracing::instrument;

use crate::actor::Actor;
use crate::error::LedgerError;
use crate::ids::format_pledge_id;
use crate::ledger::models::{AuditEventKind, Duration, Pledge, PledgeStatus};
use crate::ledger::{AuditWriter, PostgresLedgerStore};
use crate::mail::{DraftOptions, MailGateway};
use crate::templates::{TemplateId, TemplateRenderer};

pub struct NewPledgeRequest {
    pub donor_email: String,
    pub donor_name: String,
    pub donor_chapter: String,
    pub duration: Duration,
    pub zakat: bool,
    pub request_receipt: bool,
}

pub struct PledgeIntake<'a> {
    pub store: &'a PostgresLedgerStore,
    pub audit: &'a AuditWriter,
    pub mail: &'a (dyn MailGateway + Send + Sync),
    pub templates: &'a TemplateRenderer,
    pub duration_amounts: &'a HashMap<String, i64>,
    pub chapter_leads: &'a HashMap<String, Vec<String>>,
    pub always_cc: &'a [String],
}

impl<'a> PledgeIntake<'a> {
    #[instrument(skip(self, request))]
    pub async fn create_pledge(&self, request: NewPledgeRequest) -> Result<Pledge, LedgerError> {
        let now = Utc::now();
        let year: i32 = now.format("%Y").to_string().parse().expect("chrono always yields a numeric year");
        let seq = self.store.next_pledge_seq(year).await?;
        let pledge_id = format_pledge_id(year, seq);

        let promised_amount = self
            .duration_amounts
            .get(&request.duration.slug())
            .copied()
            .unwrap_or(0);

        let mut pledge = Pledge {
            pledge_id: pledge_id.clone(),
            donor_email: request.donor_email.clone(),
            donor_name: request.donor_name.clone(),
            donor_chapter: request.donor_chapter.clone(),
            duration: request.duration.slug(),
            promised_amount,
            zakat: request.zakat,
            request_receipt: request.request_receipt,
            status: PledgeStatus::Pledged,
            verified_total: 0,
            balance: 0,
            outstanding: promised_amount,
            confirmation_message_id: None,
            last_receipt_message_id: None,
            created_at: now,
            updated_at: now,
        };

        self.store.append_pledge(&pledge).await?;

        let mut recipients = vec![pledge.donor_email.clone()];
        if let Some(leads) = self.chapter_leads.get(&pledge.donor_chapter) {
            recipients.extend(leads.iter().cloned());
        }

        let mut ctx = HashMap::new();
        ctx.insert("donor_name".to_string(), pledge.donor_name.clone());
        ctx.insert("pledge_id".to_string(), pledge.pledge_id.to_string());
        ctx.insert("promised_amount".to_string(), pledge.promised_amount.to_string());
        ctx.insert("duration".to_string(), pledge.duration.clone());

        if let Ok(rendered) = self.templates.render(TemplateId::PledgeConfirmation, &ctx) {
            if let Ok(draft) = self
                .mail
                .create_draft(
                    recipients,
                    rendered.subject,
                    rendered.html_body,
                    DraftOptions {
                        cc: self.always_cc.to_vec(),
                        ..Default::default()
                    },
                )
                .await
            {
                if let Ok(sent) = self.mail.send_draft(&draft).await {
                    pledge.confirmation_message_id = Some(sent.rfc822_message_id.to_string());
                    self.store
                        .set_confirmation_message_id(&pledge.pledge_id, &sent.rfc822_message_id.to_string())
                        .await?;
                }
            }
        }

        self.audit
            .record(
                Actor::System,
                AuditEventKind::NewPledge,
                pledge.pledge_id.to_string(),
                format!("pledge created for {}", pledge.donor_email),
                None,
                serde_json::to_value(&pledge).ok(),
            )
            .await?;

        Ok(pledge)
    }
}
