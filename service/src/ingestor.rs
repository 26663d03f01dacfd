// Copyright 2023-, GraphOps and Semiotic Labs.
// SPDX-License-Identifier: Apache-2.0

//! C5: the receipt ingestor. Polls the `TO_PROCESS` label,
//! extracts a pledge reference from the subject, invokes the classifier
//! over attachments, persists receipts, and rolls up the pledge.

use chrono::Utc;
use tracing::{info, instrument, warn};

use crate::actor::Actor;
use crate::blob::{normalise_filename, persist_attachment};
use crate::error::IngestError;
use crate::ids::{format_receipt_id, PledgeId};
use crate::ledger::models::{AuditEventKind, PledgeStatus, Receipt, ReceiptStatus};
use crate::ledger::{AuditWriter, PostgresLedgerStore};
use crate::lm::{LmClassifier, ReceiptCategory, ReceiptExtractionInput};
use crate::lock::ScriptLock;
use crate::mail::{labels, DraftOptions, MailGateway, ReplyOptions};
use crate::metrics;
use crate::reference::{parse_reference, Reference};
use crate::state_machine::validate_pledge_transition;

pub struct ReceiptIngestor<'a> {
    pub store: &'a PostgresLedgerStore,
    pub audit: &'a AuditWriter,
    pub mail: &'a (dyn MailGateway + Send + Sync),
    pub classifier: &'a (dyn LmClassifier + Send + Sync),
    pub lock: &'a ScriptLock,
    pub blob_receipts_dir: &'a str,
    pub service_mailbox_address: &'a str,
    pub admin_alert_address: &'a str,
}

impl<'a> ReceiptIngestor<'a> {
    /// One pass over the `TO_PROCESS` mailbox.
    #[instrument(skip(self))]
    pub async fn run_once(&self) -> Result<(), IngestError> {
        let threads = self
            .mail
            .search(&format!("label:{}", labels::TO_PROCESS), 50)
            .await?;

        let mut processed = 0u64;
        for thread in threads {
            if let Err(e) = self.process_thread(&thread.id).await {
                warn!(thread = %thread.id.0, error = %e, "failed to process receipt thread, continuing with next");
            }
            processed += 1;
        }
        metrics::record_ingestor_run(processed);
        Ok(())
    }

    async fn process_thread(&self, thread_id: &crate::mail::ThreadId) -> Result<(), IngestError> {
        let messages = self.mail.fetch_messages(thread_id).await?;
        let Some(latest) = messages
            .iter()
            .filter(|m| m.from != self.service_mailbox_address)
            .max_by_key(|m| m.received_at)
        else {
            // only the system itself ever spoke in this thread; loop suppression.
            return Ok(());
        };

        let subject = messages
            .iter()
            .find(|m| !m.subject.is_empty())
            .map(|m| m.subject.clone())
            .unwrap_or_default();

        let pledge_id = match parse_reference(&subject) {
            Some(Reference::Pledge(id)) => id,
            Some(Reference::Batch(batch_id)) => {
                match self.resolve_pledge_from_batch(&batch_id).await? {
                    Some(id) => id,
                    None => {
                        self.mark_unmatched(thread_id).await?;
                        return Ok(());
                    }
                }
            }
            None => {
                self.mark_unmatched(thread_id).await?;
                return Ok(());
            }
        };

        let token = self.lock.acquire_default().await?;

        let Some(pledge) = self.store.find_pledge(&pledge_id).await? else {
            warn!(pledge_id = %pledge_id, "receipt referenced a pledge that does not exist, skipping");
            drop(token);
            return Ok(());
        };

        let extraction = self
            .classifier
            .extract_receipt(ReceiptExtractionInput {
                body_text: &latest.body_text,
                attachments: &latest.attachments,
                pledge_created_at: pledge.created_at,
                email_received_at: latest.received_at,
                promised_amount: pledge.promised_amount,
            })
            .await;

        let extraction = match extraction {
            Ok(e) => e,
            Err(e) => {
                warn!(error = %e, "receipt extraction returned no decision, escalating");
                metrics::record_classifier_no_decision("ingestor");
                self.escalate(thread_id, &pledge_id, &format!("classifier failure: {e}"))
                    .await?;
                drop(token);
                return Ok(());
            }
        };

        match extraction.category {
            ReceiptCategory::Irrelevant => {
                self.mail.label_apply(thread_id, labels::PROCESSED).await?;
                self.mail.label_remove(thread_id, labels::TO_PROCESS).await?;
                self.audit
                    .record(
                        Actor::System,
                        AuditEventKind::ReceiptIgnored,
                        pledge_id.to_string(),
                        extraction.summary,
                        None,
                        None,
                    )
                    .await?;
            }
            ReceiptCategory::Question => {
                let reply_body = extraction
                    .suggested_reply
                    .clone()
                    .unwrap_or_else(|| "Thank you, we will get back to you shortly.".to_string());
                self.mail
                    .reply_in_thread(thread_id, &reply_body, ReplyOptions::default())
                    .await?;
                self.mail.label_apply(thread_id, labels::PROCESSED).await?;
                self.mail.label_remove(thread_id, labels::TO_PROCESS).await?;
                self.audit
                    .record(
                        Actor::System,
                        AuditEventKind::DonorQuery,
                        pledge_id.to_string(),
                        extraction.summary,
                        None,
                        None,
                    )
                    .await?;
            }
            ReceiptCategory::ReceiptSubmission => {
                self.ingest_receipts(&pledge_id, latest, &extraction.valid_receipts)
                    .await?;
                self.mail.label_apply(thread_id, labels::PROCESSED).await?;
                self.mail.label_remove(thread_id, labels::TO_PROCESS).await?;
                self.audit
                    .record(
                        Actor::System,
                        AuditEventKind::ReceiptProcessed,
                        pledge_id.to_string(),
                        format!("processed {} receipt line(s)", extraction.valid_receipts.len()),
                        None,
                        None,
                    )
                    .await?;
            }
        }

        drop(token);
        Ok(())
    }

    async fn ingest_receipts(
        &self,
        pledge_id: &PledgeId,
        message: &crate::mail::Message,
        lines: &[crate::lm::ValidReceiptLine],
    ) -> Result<(), IngestError> {
        for line in lines {
            let attachment = message.attachments.iter().find(|a| a.filename == line.filename);
            let Some(attachment) = attachment else {
                warn!(filename = %line.filename, "classifier referenced an attachment not present on the message");
                continue;
            };

            let normalised_filename = normalise_filename(&line.filename);

            if line.rejection_reason.is_some() {
                self.append_receipt_row(pledge_id, message, line, &normalised_filename, ReceiptStatus::Rejected)
                    .await?;
                continue;
            }

            let duplicate = self
                .store
                .find_duplicate_receipt(pledge_id, line.amount, line.date, &normalised_filename)
                .await?;
            let status = if duplicate.is_some() {
                ReceiptStatus::Duplicate
            } else {
                ReceiptStatus::Valid
            };

            if status == ReceiptStatus::Valid {
                if let Err(e) = persist_attachment(
                    self.blob_receipts_dir,
                    pledge_id,
                    &line.filename,
                    &attachment.bytes,
                )
                .await
                {
                    return Err(IngestError::Storage(e.to_string()));
                }
            }

            self.append_receipt_row(pledge_id, message, line, &normalised_filename, status)
                .await?;
        }

        self.rollup_pledge(pledge_id, message.rfc822_message_id.to_string())
            .await?;
        Ok(())
    }

    async fn append_receipt_row(
        &self,
        pledge_id: &PledgeId,
        message: &crate::mail::Message,
        line: &crate::lm::ValidReceiptLine,
        normalised_filename: &str,
        status: ReceiptStatus,
    ) -> Result<(), IngestError> {
        let seq = self.store.next_receipt_seq(pledge_id).await?;
        let receipt_id = format_receipt_id(pledge_id, seq);
        let now = Utc::now();
        let receipt = Receipt {
            receipt_id,
            pledge_id: pledge_id.clone(),
            processed_at: now,
            email_received_at: message.received_at,
            transfer_date: line.date,
            declared_amount: line.declared_amount,
            verified_amount: line.amount,
            confidence: line.confidence_score,
            storage_link: format!("{}/{}/{}", self.blob_receipts_dir, pledge_id.as_str(), line.filename),
            filename: line.filename.clone(),
            normalised_filename: normalised_filename.to_string(),
            status,
            updated_at: now,
        };
        self.store.append_receipt(&receipt).await?;
        Ok(())
    }

    /// Recomputes `verified_total`/`balance`/`outstanding` and advances
    /// pledge status when the state machine allows it. The "fully proven"
    /// threshold is exact equality against the promised amount, not a grace
    /// band.
    async fn rollup_pledge(&self, pledge_id: &PledgeId, last_receipt_message_id: String) -> Result<(), IngestError> {
        let Some(pledge) = self.store.find_pledge(pledge_id).await? else {
            return Ok(());
        };
        let verified_total = self.store.valid_receipts_total(pledge_id).await?;
        let committed = self.store.committed_total_for_pledge(pledge_id).await?;
        let balance = verified_total - committed;
        let outstanding = pledge.promised_amount - verified_total;

        let candidate = if verified_total <= 0 {
            PledgeStatus::Pledged
        } else if verified_total < pledge.promised_amount {
            PledgeStatus::PartialReceipt
        } else {
            PledgeStatus::ProofSubmitted
        };

        let next_status = match validate_pledge_transition(pledge.status, candidate) {
            Ok(()) => candidate,
            Err(_) => pledge.status,
        };

        self.store
            .update_pledge_rollup(
                pledge_id,
                pledge.updated_at,
                next_status,
                verified_total,
                balance,
                outstanding,
                Some(&last_receipt_message_id),
            )
            .await?;
        info!(pledge_id = %pledge_id, verified_total, %balance, "pledge rollup complete");
        Ok(())
    }

    async fn resolve_pledge_from_batch(
        &self,
        batch_id: &crate::ids::BatchId,
    ) -> Result<Option<PledgeId>, IngestError> {
        let open = self.store.open_allocations_for_batch(batch_id).await?;
        Ok(open.into_iter().next().map(|a| a.pledge_id))
    }

    async fn mark_unmatched(&self, thread_id: &crate::mail::ThreadId) -> Result<(), IngestError> {
        self.mail.label_apply(thread_id, labels::UNMATCHED).await?;
        self.mail.label_remove(thread_id, labels::TO_PROCESS).await?;
        Ok(())
    }

    async fn escalate(
        &self,
        thread_id: &crate::mail::ThreadId,
        pledge_id: &PledgeId,
        reasoning: &str,
    ) -> Result<(), IngestError> {
        self.mail.label_apply(thread_id, labels::UNMATCHED).await?;
        self.audit
            .record(
                Actor::System,
                AuditEventKind::Alert,
                pledge_id.to_string(),
                reasoning.to_string(),
                None,
                None,
            )
            .await?;
        if let Ok(draft) = self
            .mail
            .create_draft(
                vec![self.admin_alert_address.to_string()],
                format!("Receipt needs manual review: {pledge_id}"),
                reasoning.to_string(),
                DraftOptions::default(),
            )
            .await
        {
            let _ = self.mail.send_draft(&draft).await;
        }
        Ok(())
    }
}
