// Copyright 2023-, GraphOps and Semiotic Labs.
// SPDX-License-Identifier: Apache-2.0

//! C7: the reply watchdog. Correlates free-form hostel
//! replies to open allocations, dispatches confirmed/partial/query/
//! ambiguous handling, and yields the lock between threads so an
//! interactive allocation is never starved out.

use std::collections::HashMap;

use chrono::Utc;
use tracing::{instrument, warn};

use crate::actor::Actor;
use crate::error::WatchdogError;
use crate::ids::AllocId;
use crate::ledger::models::{Allocation, AuditEventKind, PledgeStatus};
use crate::ledger::{AuditWriter, PostgresLedgerStore};
use crate::lm::{HostelReplyInput, LmClassifier, OpenAllocationRef, ReplyStatus};
use crate::lock::ScriptLock;
use crate::mail::{flatten_thread_text, labels, DraftOptions, MailGateway};
use crate::metrics;
use crate::reference::{parse_reference, Reference};
use crate::state_machine::validate_pledge_transition;
use crate::templates::{TemplateId, TemplateRenderer};

/// How many prior messages are handed to the classifier.
const MAX_PRIOR_MESSAGES: usize = 10;

pub struct ReplyWatchdog<'a> {
    pub store: &'a PostgresLedgerStore,
    pub audit: &'a AuditWriter,
    pub mail: &'a (dyn MailGateway + Send + Sync),
    pub classifier: &'a (dyn LmClassifier + Send + Sync),
    pub templates: &'a TemplateRenderer,
    pub lock: &'a ScriptLock,
    pub admin_alert_address: &'a str,
}

impl<'a> ReplyWatchdog<'a> {
    #[instrument(skip(self))]
    pub async fn run_once(&self) -> Result<(), WatchdogError> {
        let threads = self
            .mail
            .search("subject:(\"Ref: PLEDGE-\" OR \"Ref: BATCH-\")", 50)
            .await?;

        let open = self.store.snapshot_open_allocations().await?;
        let mut by_pledge: HashMap<String, Vec<Allocation>> = HashMap::new();
        for alloc in open {
            by_pledge
                .entry(alloc.pledge_id.to_string())
                .or_default()
                .push(alloc.clone());
            if let Some(batch_id) = &alloc.batch_id {
                by_pledge.entry(batch_id.to_string()).or_default().push(alloc);
            }
        }

        let mut processed = 0u64;
        for thread in threads {
            let already_handled = thread
                .labels
                .iter()
                .any(|l| l == labels::WATCHDOG_PROCESSED || l == labels::WATCHDOG_MANUAL_REVIEW);
            if already_handled {
                continue;
            }
            if let Err(e) = self.process_thread(&thread, &by_pledge).await {
                warn!(thread = %thread.id.0, error = %e, "failed to process watchdog thread, continuing with next");
            }
            processed += 1;
        }
        metrics::record_watchdog_run(processed);
        Ok(())
    }

    async fn process_thread(
        &self,
        thread: &crate::mail::Thread,
        by_reference: &HashMap<String, Vec<Allocation>>,
    ) -> Result<(), WatchdogError> {
        let reference = match parse_reference(&thread.subject) {
            Some(Reference::Pledge(id)) => id.to_string(),
            Some(Reference::Batch(id)) => id.to_string(),
            None => {
                self.escalate(thread, "no pledge/batch reference found in subject")
                    .await?;
                return Ok(());
            }
        };

        let Some(open_allocations) = by_reference.get(&reference).filter(|v| !v.is_empty()) else {
            self.escalate(thread, &format!("no open allocations for {reference}"))
                .await?;
            return Ok(());
        };

        let messages = self.mail.fetch_messages(&thread.id).await?;
        let thread_text = flatten_thread_text(&messages, MAX_PRIOR_MESSAGES);
        let open_refs: Vec<OpenAllocationRef> = open_allocations
            .iter()
            .map(|a| OpenAllocationRef {
                alloc_id: a.alloc_id.clone(),
                amount: a.amount,
                beneficiary_id: a.beneficiary_id.to_string(),
            })
            .collect();

        let classification = self
            .classifier
            .classify_hostel_reply(HostelReplyInput {
                thread_text: &thread_text,
                open_allocations: &open_refs,
            })
            .await;

        let classification = match classification {
            Ok(c) => c,
            Err(e) => {
                metrics::record_classifier_no_decision("watchdog");
                self.escalate(thread, &format!("classifier failure: {e}")).await?;
                return Ok(());
            }
        };

        let token = self.lock.acquire_default().await?;

        let latest_reply = messages.iter().max_by_key(|m| m.received_at);
        let reply_message_id = latest_reply.map(|m| m.rfc822_message_id.to_string()).unwrap_or_default();
        let reply_at = latest_reply.map(|m| m.received_at).unwrap_or_else(Utc::now);

        match classification.status {
            ReplyStatus::ConfirmedAll => {
                for alloc in open_allocations {
                    self.complete_allocation(alloc, &reply_message_id, reply_at).await?;
                }
                self.mail.label_apply(&thread.id, labels::WATCHDOG_PROCESSED).await?;
            }
            ReplyStatus::Partial => {
                let confirmed: std::collections::HashSet<&AllocId> =
                    classification.confirmed_alloc_ids.iter().collect();
                for alloc in open_allocations {
                    if confirmed.contains(&alloc.alloc_id) {
                        self.complete_allocation(alloc, &reply_message_id, reply_at).await?;
                    }
                }
                self.mail.label_apply(&thread.id, labels::WATCHDOG_PROCESSED).await?;
                self.audit
                    .record(
                        Actor::System,
                        AuditEventKind::PartialVerification,
                        reference.clone(),
                        classification.reasoning.clone(),
                        None,
                        None,
                    )
                    .await?;
            }
            ReplyStatus::Query => {
                for alloc in open_allocations {
                    self.store
                        .set_allocation_status(&alloc.alloc_id, crate::ledger::models::AllocationStatus::HostelQuery)
                        .await?;
                }
                self.mail.label_apply(&thread.id, labels::WATCHDOG_MANUAL_REVIEW).await?;
                self.audit
                    .record(
                        Actor::System,
                        AuditEventKind::HostelQuery,
                        reference.clone(),
                        classification.reasoning.clone(),
                        None,
                        None,
                    )
                    .await?;
                self.send_admin_alert(&reference, &classification.reasoning).await;
            }
            ReplyStatus::Ambiguous => {
                self.mail.label_apply(&thread.id, labels::WATCHDOG_MANUAL_REVIEW).await?;
                self.audit
                    .record(
                        Actor::System,
                        AuditEventKind::Alert,
                        reference.clone(),
                        format!("ambiguous hostel reply: {}", classification.reasoning),
                        None,
                        None,
                    )
                    .await?;
                self.send_admin_alert(&reference, &classification.reasoning).await;
            }
        }

        drop(token);
        Ok(())
    }

    async fn complete_allocation(
        &self,
        alloc: &Allocation,
        reply_message_id: &str,
        reply_at: chrono::DateTime<Utc>,
    ) -> Result<(), WatchdogError> {
        self.store
            .mark_hostel_verified(&alloc.alloc_id, reply_message_id, reply_at)
            .await?;

        let pledge = self.store.find_pledge(&alloc.pledge_id).await?;
        let donor_email = pledge.as_ref().map(|p| p.donor_email.clone()).unwrap_or_default();
        let donor_name = pledge.as_ref().map(|p| p.donor_name.clone()).unwrap_or_default();

        let mut ctx = HashMap::new();
        ctx.insert("donor_name".to_string(), donor_name);
        ctx.insert("pledge_id".to_string(), alloc.pledge_id.to_string());
        ctx.insert("amount".to_string(), alloc.amount.to_string());

        let final_message_id = if let Ok(rendered) = self.templates.render(TemplateId::DonorFinal, &ctx) {
            if let Ok(draft) = self
                .mail
                .create_draft(vec![donor_email], rendered.subject, rendered.html_body, DraftOptions {
                    in_reply_to: Some(crate::mail::Rfc822MessageId(alloc.donor_intermediate_message_id.clone())),
                    ..Default::default()
                })
                .await
            {
                self.mail.send_draft(&draft).await.ok().map(|m| m.rfc822_message_id.to_string())
            } else {
                None
            }
        } else {
            None
        };

        self.store
            .mark_completed(
                &alloc.alloc_id,
                &final_message_id.unwrap_or_default(),
                Utc::now(),
            )
            .await?;

        self.audit
            .record(
                Actor::System,
                AuditEventKind::HostelVerification,
                alloc.alloc_id.to_string(),
                "hostel confirmed allocation".to_string(),
                None,
                None,
            )
            .await?;

        self.recompute_pledge_status(&alloc.pledge_id).await?;
        Ok(())
    }

    /// Closes a pledge once every child allocation has been hostel-verified
    ///.
    async fn recompute_pledge_status(&self, pledge_id: &crate::ids::PledgeId) -> Result<(), WatchdogError> {
        let Some(pledge) = self.store.find_pledge(pledge_id).await? else {
            return Ok(());
        };
        if pledge.status != PledgeStatus::FullyAllocated {
            return Ok(());
        }
        let allocations = self.store.allocations_for_pledge(pledge_id).await?;
        let all_verified = allocations.iter().all(|a| {
            matches!(
                a.status,
                crate::ledger::models::AllocationStatus::Completed
                    | crate::ledger::models::AllocationStatus::Cancelled
            )
        });
        if !all_verified {
            return Ok(());
        }
        if validate_pledge_transition(pledge.status, PledgeStatus::Closed).is_ok() {
            self.store
                .update_pledge_rollup(
                    pledge_id,
                    pledge.updated_at,
                    PledgeStatus::Closed,
                    pledge.verified_total,
                    pledge.balance,
                    pledge.outstanding,
                    None,
                )
                .await?;
            self.audit
                .record(
                    Actor::System,
                    AuditEventKind::StatusChange,
                    pledge_id.to_string(),
                    "FULLY_ALLOCATED -> CLOSED".to_string(),
                    None,
                    None,
                )
                .await?;
        }
        Ok(())
    }

    async fn escalate(&self, thread: &crate::mail::Thread, reason: &str) -> Result<(), WatchdogError> {
        self.mail.label_apply(&thread.id, labels::WATCHDOG_MANUAL_REVIEW).await?;
        self.audit
            .record(Actor::System, AuditEventKind::Alert, thread.id.0.clone(), reason.to_string(), None, None)
            .await?;
        self.send_admin_alert(&thread.subject, reason).await;
        Ok(())
    }

    async fn send_admin_alert(&self, reference: &str, reasoning: &str) {
        if let Ok(draft) = self
            .mail
            .create_draft(
                vec![self.admin_alert_address.to_string()],
                format!("Hostel reply needs manual review: {reference}"),
                reasoning.to_string(),
                DraftOptions::default(),
            )
            .await
        {
            let _ = self.mail.send_draft(&draft).await;
        }
    }
}
