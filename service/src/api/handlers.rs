// Copyright 2023-, GraphOps and Semiotic Labs.
// SPDX-License-Identifier: Apache-2.0

//! The three operator UI entry points. Handlers only ever read
//! `BeneficiaryOps`, never `BeneficiaryConfidential` — the sanitised proxy
//! boundary is enforced at this layer too, not just in the store.

use axum::extract::{Path, State};
use axum::http::HeaderMap;
use axum::Json;

use crate::actor::Actor;
use crate::allocation::{AllocationLine, AllocationService};
use crate::error::AppError;
use crate::ids::{BeneficiaryId, PledgeId};
use crate::state::AppState;

use super::dto::{
    AvailablePledge, AvailablePledgesResponse, BeneficiarySummary, ReceiptSummary, SidebarData,
    SubmitAllocationRequest, SubmitAllocationResponse,
};

fn actor_from_headers(headers: &HeaderMap) -> Actor {
    headers
        .get("x-operator-email")
        .and_then(|v| v.to_str().ok())
        .map(|email| Actor::Operator(email.to_string()))
        .unwrap_or(Actor::System)
}

/// `sidebar_data(active_row)` — the per-pledge panel shown when an operator
/// selects a row in the allocation sheet.
pub async fn sidebar_data(
    State(state): State<AppState>,
    Path(pledge_id): Path<String>,
) -> Result<Json<SidebarData>, AppError> {
    let pledge_id = PledgeId::from(pledge_id.as_str());
    let pledge = state
        .store
        .find_pledge(&pledge_id)
        .await?
        .ok_or_else(|| AppError::NotFound(format!("pledge {pledge_id}")))?;

    let receipts = state.store.receipts_for_pledge(&pledge_id).await?;
    let proof_link = receipts.last().map(|r| r.storage_link.clone());
    let receipt_summaries = receipts
        .into_iter()
        .map(|r| ReceiptSummary {
            receipt_id: r.receipt_id.to_string(),
            verified_amount: r.verified_amount,
            status: format!("{:?}", r.status),
            storage_link: r.storage_link,
        })
        .collect();

    let beneficiaries = state
        .store
        .list_beneficiaries_ops()
        .await?
        .into_iter()
        .map(|b| BeneficiarySummary { id: b.beneficiary_id.to_string(), pending: b.pending })
        .collect();

    Ok(Json(SidebarData {
        pledge_id: pledge.pledge_id.to_string(),
        max_available: pledge.balance,
        proof_link,
        receipts: receipt_summaries,
        verified_total: pledge.verified_total,
        beneficiaries,
    }))
}

/// `available_pledges()` — pledges with an unallocated balance, alongside
/// every beneficiary's current pending need.
pub async fn available_pledges(
    State(state): State<AppState>,
) -> Result<Json<AvailablePledgesResponse>, AppError> {
    let pledges = state
        .store
        .list_allocatable_pledges()
        .await?
        .into_iter()
        .map(|p| AvailablePledge {
            id: p.pledge_id.to_string(),
            donor_name: p.donor_name,
            amount: p.balance,
            proof_link: p.last_receipt_message_id,
        })
        .collect();

    let beneficiaries = state
        .store
        .list_beneficiaries_ops()
        .await?
        .into_iter()
        .map(|b| BeneficiarySummary { id: b.beneficiary_id.to_string(), pending: b.pending })
        .collect();

    Ok(Json(AvailablePledgesResponse { pledges, beneficiaries }))
}

/// `submit_allocation({pledge_ids, beneficiary_id})` — dispatches to the
/// single or batch path of `AllocationService` depending on line count.
pub async fn submit_allocation(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(request): Json<SubmitAllocationRequest>,
) -> Result<Json<SubmitAllocationResponse>, AppError> {
    let actor = actor_from_headers(&headers);
    let beneficiary_id = BeneficiaryId::from(request.beneficiary_id.as_str());

    let service = AllocationService {
        store: &state.store,
        audit: &state.audit,
        mail: state.mail.as_ref(),
        templates: &state.templates,
        lock: &state.lock,
        hostel_office_address: &state.hostel_office_address,
    };

    let message = if request.pledge_ids.len() == 1 {
        let line = &request.pledge_ids[0];
        let pledge_id = PledgeId::from(line.id.as_str());
        let allocation = service
            .allocate_single(actor, &pledge_id, &beneficiary_id, line.amount)
            .await?;
        format!("allocated {} as {}", allocation.amount, allocation.alloc_id)
    } else {
        let lines = request
            .pledge_ids
            .iter()
            .map(|l| AllocationLine { pledge_id: PledgeId::from(l.id.as_str()), amount: l.amount })
            .collect();
        let allocations = service.allocate_batch(actor, lines, &beneficiary_id).await?;
        format!(
            "allocated {} line(s) as batch {}",
            allocations.len(),
            allocations
                .first()
                .and_then(|a| a.batch_id.as_ref())
                .map(|b| b.to_string())
                .unwrap_or_default()
        )
    };

    Ok(Json(SubmitAllocationResponse { ok: true, message }))
}
