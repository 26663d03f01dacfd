// Copyright 2023-, GraphOps and Semiotic Labs.
// SPDX-License-Identifier: Apache-2.0

//! C6: the allocation service. Lock-scoped
//! validate/notify/commit for both the single and batch entry points;
//! notify-first, commit-last.

use std::collections::HashMap;

use chrono::Utc;
use tracing::instrument;

use crate::actor::Actor;
use crate::error::AllocationError;
use crate::ids::{format_alloc_id, format_batch_id, AllocId, BatchId, BeneficiaryId, PledgeId};
use crate::ledger::models::{Allocation, AllocationStatus, AuditEventKind, Pledge, PledgeStatus};
use crate::ledger::{AuditWriter, PostgresLedgerStore};
use crate::lock::ScriptLock;
use crate::mail::{DraftOptions, MailGateway};
use crate::metrics;
use crate::state_machine::validate_pledge_transition;
use crate::templates::{TemplateId, TemplateRenderer};

pub struct AllocationLine {
    pub pledge_id: PledgeId,
    pub amount: i64,
}

pub struct AllocationService<'a> {
    pub store: &'a PostgresLedgerStore,
    pub audit: &'a AuditWriter,
    pub mail: &'a (dyn MailGateway + Send + Sync),
    pub templates: &'a TemplateRenderer,
    pub lock: &'a ScriptLock,
    pub hostel_office_address: &'a str,
}

impl<'a> AllocationService<'a> {
    /// Single allocation `(pledge_id, beneficiary_id, amount)`.
    #[instrument(skip(self))]
    pub async fn allocate_single(
        &self,
        actor: Actor,
        pledge_id: &PledgeId,
        beneficiary_id: &BeneficiaryId,
        amount: i64,
    ) -> Result<Allocation, AllocationError> {
        let result = self.allocate_single_inner(actor, pledge_id, beneficiary_id, amount).await;
        match &result {
            Ok(_) => metrics::record_allocation_outcome("committed"),
            Err(e) => metrics::record_allocation_outcome(outcome_label(e)),
        }
        result
    }

    async fn allocate_single_inner(
        &self,
        actor: Actor,
        pledge_id: &PledgeId,
        beneficiary_id: &BeneficiaryId,
        amount: i64,
    ) -> Result<Allocation, AllocationError> {
        let token = self.lock.acquire_default().await?;

        let pledge = self
            .store
            .find_pledge(pledge_id)
            .await?
            .ok_or_else(|| AllocationError::PledgeNotFound(pledge_id.to_string()))?;
        let beneficiary = self
            .store
            .find_beneficiary_ops(beneficiary_id)
            .await?
            .ok_or_else(|| AllocationError::BeneficiaryNotFound(beneficiary_id.to_string()))?;

        validate_eligible(&pledge, amount, beneficiary.pending)?;

        let hostel_message_id = self
            .send_hostel_intimation(&pledge, &[(&pledge, amount)], beneficiary_id, None)
            .await?;
        let donor_message_id = self.send_donor_intermediate(&pledge, amount, beneficiary_id).await?;

        let seq = self.store.next_alloc_seq().await?;
        let alloc_id = format_alloc_id(seq);
        let now = Utc::now();
        let allocation = Allocation {
            alloc_id,
            batch_id: None,
            pledge_id: pledge_id.clone(),
            beneficiary_id: beneficiary_id.clone(),
            amount,
            status: AllocationStatus::PendingHostel,
            created_at: now,
            hostel_intimation_message_id: hostel_message_id,
            hostel_intimation_at: now,
            donor_intermediate_message_id: donor_message_id,
            donor_intermediate_at: now,
            hostel_reply_message_id: None,
            hostel_reply_at: None,
            donor_final_message_id: None,
            donor_final_at: None,
            updated_at: now,
        };
        self.store.append_allocation(&allocation).await?;

        self.recompute_pledge_status(pledge_id).await?;
        self.recompute_beneficiary_pending(beneficiary_id).await?;

        self.audit
            .record(
                actor,
                AuditEventKind::Allocation,
                allocation.alloc_id.to_string(),
                format!("allocated {amount} from {pledge_id} to {beneficiary_id}"),
                None,
                serde_json::to_value(&allocation).ok(),
            )
            .await?;

        self.refresh_cache(pledge_id, beneficiary_id).await;

        drop(token);
        Ok(allocation)
    }

    /// Batch allocation `([(pledge_id, amount)…], beneficiary_id)`.
    /// Greedy-cap: truncates the last line if the requested sum exceeds
    /// `beneficiary.pending`; any non-last line exceeding its own pledge's
    /// balance fails the whole batch.
    #[instrument(skip(self, lines))]
    pub async fn allocate_batch(
        &self,
        actor: Actor,
        lines: Vec<AllocationLine>,
        beneficiary_id: &BeneficiaryId,
    ) -> Result<Vec<Allocation>, AllocationError> {
        let result = self.allocate_batch_inner(actor, lines, beneficiary_id).await;
        match &result {
            Ok(_) => metrics::record_allocation_outcome("committed"),
            Err(e) => metrics::record_allocation_outcome(outcome_label(e)),
        }
        result
    }

    async fn allocate_batch_inner(
        &self,
        actor: Actor,
        lines: Vec<AllocationLine>,
        beneficiary_id: &BeneficiaryId,
    ) -> Result<Vec<Allocation>, AllocationError> {
        if lines.is_empty() {
            return Err(AllocationError::EmptyBatch);
        }

        let token = self.lock.acquire_default().await?;

        let beneficiary = self
            .store
            .find_beneficiary_ops(beneficiary_id)
            .await?
            .ok_or_else(|| AllocationError::BeneficiaryNotFound(beneficiary_id.to_string()))?;

        let mut pledges = Vec::with_capacity(lines.len());
        for line in &lines {
            let pledge = self
                .store
                .find_pledge(&line.pledge_id)
                .await?
                .ok_or_else(|| AllocationError::PledgeNotFound(line.pledge_id.to_string()))?;
            pledges.push(pledge);
        }

        let mut capped_lines: Vec<(usize, i64)> = lines.iter().map(|l| l.amount).enumerate().collect();
        let total: i64 = capped_lines.iter().map(|(_, a)| *a).sum();
        if total > beneficiary.pending {
            let overage = total - beneficiary.pending;
            let last = capped_lines.len() - 1;
            let (_, last_amount) = &mut capped_lines[last];
            if *last_amount <= overage {
                return Err(AllocationError::ExceedsBeneficiaryNeed {
                    amount: total,
                    pending: beneficiary.pending,
                });
            }
            *last_amount -= overage;
        }

        for (idx, amount) in &capped_lines {
            let pledge = &pledges[*idx];
            if *amount <= 0 {
                return Err(AllocationError::InsufficientFunds { amount: *amount, balance: pledge.balance });
            }
            if *amount > pledge.balance {
                return Err(AllocationError::InsufficientFunds { amount: *amount, balance: pledge.balance });
            }
            validate_pledge_allows_allocation(pledge.status, pledge.pledge_id.clone())?;
        }

        let batch_seq = self.store.next_batch_seq().await?;
        let batch_id = format_batch_id(batch_seq);

        let pledge_amount_refs: Vec<(&Pledge, i64)> = capped_lines
            .iter()
            .map(|(idx, amount)| (&pledges[*idx], *amount))
            .collect();
        let hostel_message_id = self
            .send_hostel_intimation(&pledges[0], &pledge_amount_refs, beneficiary_id, Some(&batch_id))
            .await?;

        let mut donor_message_ids = HashMap::new();
        for (idx, amount) in &capped_lines {
            let pledge = &pledges[*idx];
            let donor_message_id = self.send_donor_intermediate(pledge, *amount, beneficiary_id).await?;
            donor_message_ids.insert(*idx, donor_message_id);
        }

        let mut allocations = Vec::with_capacity(capped_lines.len());
        for (idx, amount) in &capped_lines {
            let pledge = &pledges[*idx];
            let seq = self.store.next_alloc_seq().await?;
            let now = Utc::now();
            let allocation = Allocation {
                alloc_id: format_alloc_id(seq),
                batch_id: Some(batch_id.clone()),
                pledge_id: pledge.pledge_id.clone(),
                beneficiary_id: beneficiary_id.clone(),
                amount: *amount,
                status: AllocationStatus::PendingHostel,
                created_at: now,
                hostel_intimation_message_id: hostel_message_id.clone(),
                hostel_intimation_at: now,
                donor_intermediate_message_id: donor_message_ids.get(idx).cloned().unwrap_or_default(),
                donor_intermediate_at: now,
                hostel_reply_message_id: None,
                hostel_reply_at: None,
                donor_final_message_id: None,
                donor_final_at: None,
                updated_at: now,
            };
            self.store.append_allocation(&allocation).await?;
            self.recompute_pledge_status(&pledge.pledge_id).await?;
            allocations.push(allocation);
        }

        self.recompute_beneficiary_pending(beneficiary_id).await?;

        self.audit
            .record(
                actor,
                AuditEventKind::BatchAllocation,
                batch_id.to_string(),
                format!("batch of {} allocation(s) to {beneficiary_id}", allocations.len()),
                None,
                serde_json::to_value(&allocations).ok(),
            )
            .await?;

        for (idx, _) in &capped_lines {
            self.refresh_cache(&pledges[*idx].pledge_id, beneficiary_id).await;
        }

        drop(token);
        Ok(allocations)
    }

    async fn send_hostel_intimation(
        &self,
        primary_pledge: &Pledge,
        lines: &[(&Pledge, i64)],
        beneficiary_id: &BeneficiaryId,
        batch_id: Option<&BatchId>,
    ) -> Result<String, AllocationError> {
        let beneficiary = self
            .store
            .find_beneficiary_confidential(beneficiary_id)
            .await?
            .ok_or_else(|| AllocationError::BeneficiaryNotFound(beneficiary_id.to_string()))?;

        let donor_lines: String = lines
            .iter()
            .map(|(p, amount)| format!("{} — {}", p.donor_name, amount))
            .collect::<Vec<_>>()
            .join("\n");
        let donor_emails: Vec<String> = lines.iter().map(|(p, _)| p.donor_email.clone()).collect();
        let total_amount: i64 = lines.iter().map(|(_, a)| a).sum();

        let mut ctx = HashMap::new();
        ctx.insert("beneficiary_school".to_string(), beneficiary.name.clone());
        ctx.insert("amount".to_string(), total_amount.to_string());
        ctx.insert("total_amount".to_string(), total_amount.to_string());
        ctx.insert("donor_lines".to_string(), donor_lines);
        ctx.insert("mailto_link".to_string(), format!("mailto:?bcc={}", donor_emails.join(",")));
        if let Some(batch_id) = batch_id {
            ctx.insert("batch_id".to_string(), batch_id.to_string());
        } else {
            ctx.insert("batch_id".to_string(), String::new());
        }

        let template_id = if batch_id.is_some() {
            TemplateId::BatchIntimation
        } else {
            TemplateId::HostelVerification
        };
        let rendered = self.templates.render(template_id, &ctx)?;

        let subject = if let Some(batch_id) = batch_id {
            format!("{} Ref: {}", rendered.subject, batch_id)
        } else {
            format!("{} Ref: {}", rendered.subject, primary_pledge.pledge_id)
        };

        let draft = self
            .mail
            .create_draft(
                vec![self.hostel_office_address.to_string()],
                subject,
                rendered.html_body,
                DraftOptions {
                    bcc: donor_emails,
                    ..Default::default()
                },
            )
            .await?;
        let sent = self.mail.send_draft(&draft).await?;
        Ok(sent.rfc822_message_id.to_string())
    }

    async fn send_donor_intermediate(
        &self,
        pledge: &Pledge,
        amount: i64,
        beneficiary_id: &BeneficiaryId,
    ) -> Result<String, AllocationError> {
        let beneficiary = self
            .store
            .find_beneficiary_ops(beneficiary_id)
            .await?
            .ok_or_else(|| AllocationError::BeneficiaryNotFound(beneficiary_id.to_string()))?;

        let mut ctx = HashMap::new();
        ctx.insert("donor_name".to_string(), pledge.donor_name.clone());
        ctx.insert("pledge_id".to_string(), pledge.pledge_id.to_string());
        ctx.insert("amount".to_string(), amount.to_string());
        ctx.insert("beneficiary_school".to_string(), beneficiary.school.clone());

        let rendered = self.templates.render(TemplateId::DonorAllocationIntermediate, &ctx)?;

        let draft = self
            .mail
            .create_draft(
                vec![pledge.donor_email.clone()],
                rendered.subject,
                rendered.html_body,
                DraftOptions::default(),
            )
            .await?;
        let sent = self.mail.send_draft(&draft).await?;
        Ok(sent.rfc822_message_id.to_string())
    }

    async fn recompute_pledge_status(&self, pledge_id: &PledgeId) -> Result<(), AllocationError> {
        let pledge = self
            .store
            .find_pledge(pledge_id)
            .await?
            .ok_or_else(|| AllocationError::PledgeNotFound(pledge_id.to_string()))?;
        let committed = self.store.committed_total_for_pledge(pledge_id).await?;
        let balance = pledge.verified_total - committed;
        let outstanding = pledge.promised_amount - pledge.verified_total;

        let candidate = if balance <= 0 {
            PledgeStatus::FullyAllocated
        } else {
            PledgeStatus::PartiallyAllocated
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
                pledge.verified_total,
                balance,
                outstanding,
                None,
            )
            .await?;

        if next_status != pledge.status {
            self.audit
                .record(
                    Actor::System,
                    AuditEventKind::StatusChange,
                    pledge_id.to_string(),
                    format!("{:?} -> {:?}", pledge.status, next_status),
                    serde_json::to_value(pledge.status).ok(),
                    serde_json::to_value(next_status).ok(),
                )
                .await?;
        }
        Ok(())
    }

    /// `pending`/`cleared` are recomputed from the allocation scan, not
    /// trusted from the stale stored value.
    /// `pending` is need still un-earmarked — total_due minus every
    /// non-cancelled allocation; `cleared` is the
    /// subset that has reached COMPLETED.
    async fn recompute_beneficiary_pending(&self, beneficiary_id: &BeneficiaryId) -> Result<(), AllocationError> {
        let beneficiary = self
            .store
            .find_beneficiary_ops(beneficiary_id)
            .await?
            .ok_or_else(|| AllocationError::BeneficiaryNotFound(beneficiary_id.to_string()))?;
        let committed = self.store.committed_total_for_beneficiary(beneficiary_id).await?;
        let cleared = self.store.completed_total_for_beneficiary(beneficiary_id).await?;
        let pending = beneficiary.total_due - committed;
        self.store
            .update_beneficiary_pending(beneficiary_id, pending, cleared)
            .await?;
        Ok(())
    }

    async fn refresh_cache(&self, pledge_id: &PledgeId, beneficiary_id: &BeneficiaryId) {
        if let Ok(Some(pledge)) = self.store.find_pledge(pledge_id).await {
            let _ = self
                .store
                .refresh_lookup_cache(
                    &format!("pledge:{pledge_id}"),
                    serde_json::json!({ "balance": pledge.balance, "outstanding": pledge.outstanding }),
                )
                .await;
        }
        if let Ok(Some(beneficiary)) = self.store.find_beneficiary_ops(beneficiary_id).await {
            let _ = self
                .store
                .refresh_lookup_cache(
                    &format!("beneficiary:{beneficiary_id}"),
                    serde_json::json!({ "pending": beneficiary.pending }),
                )
                .await;
        }
    }
}

fn outcome_label(err: &AllocationError) -> &'static str {
    match err {
        AllocationError::SystemBusy => "system_busy",
        AllocationError::PledgeNotFound(_) => "pledge_not_found",
        AllocationError::BeneficiaryNotFound(_) => "beneficiary_not_found",
        AllocationError::InvalidPledgeStatus { .. } => "invalid_pledge_status",
        AllocationError::InsufficientFunds { .. } => "insufficient_funds",
        AllocationError::ExceedsBeneficiaryNeed { .. } => "exceeds_beneficiary_need",
        AllocationError::EmptyBatch => "empty_batch",
        AllocationError::NotifyFailed(_) => "notify_failed",
        AllocationError::InvalidTransition(_) => "invalid_transition",
        AllocationError::Ledger(_) => "ledger_error",
        AllocationError::Template(_) => "template_error",
    }
}

fn validate_eligible(pledge: &Pledge, amount: i64, beneficiary_pending: i64) -> Result<(), AllocationError> {
    if !matches!(
        pledge.status,
        PledgeStatus::ProofSubmitted | PledgeStatus::Verified | PledgeStatus::PartiallyAllocated
    ) {
        return Err(AllocationError::InvalidPledgeStatus {
            pledge_id: pledge.pledge_id.to_string(),
            status: pledge.status,
        });
    }
    if amount <= 0 || amount > pledge.balance {
        return Err(AllocationError::InsufficientFunds { amount, balance: pledge.balance });
    }
    if amount > beneficiary_pending {
        return Err(AllocationError::ExceedsBeneficiaryNeed { amount, pending: beneficiary_pending });
    }
    Ok(())
}

fn validate_pledge_allows_allocation(status: PledgeStatus, pledge_id: PledgeId) -> Result<(), AllocationError> {
    if !matches!(
        status,
        PledgeStatus::ProofSubmitted | PledgeStatus::Verified | PledgeStatus::PartiallyAllocated
    ) {
        return Err(AllocationError::InvalidPledgeStatus {
            pledge_id: pledge_id.to_string(),
            status,
        });
    }
    Ok(())
}
