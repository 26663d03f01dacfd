// Copyright 2023-, GraphOps and Semiotic Labs.
// SPDX-License-Identifier: Apache-2.0

//! Response/request shapes for the three operator UI entry points
//!. Only the sanitised `BeneficiaryOps` projection ever
//! appears here — never `BeneficiaryConfidential`.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize)]
pub struct ReceiptSummary {
    pub receipt_id: String,
    pub verified_amount: i64,
    pub status: String,
    pub storage_link: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct BeneficiarySummary {
    pub id: String,
    pub pending: i64,
}

#[derive(Debug, Clone, Serialize)]
pub struct SidebarData {
    pub pledge_id: String,
    pub max_available: i64,
    pub proof_link: Option<String>,
    pub receipts: Vec<ReceiptSummary>,
    pub verified_total: i64,
    pub beneficiaries: Vec<BeneficiarySummary>,
}

#[derive(Debug, Clone, Serialize)]
pub struct AvailablePledge {
    pub id: String,
    pub donor_name: String,
    pub amount: i64,
    pub proof_link: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct AvailablePledgesResponse {
    pub pledges: Vec<AvailablePledge>,
    pub beneficiaries: Vec<BeneficiarySummary>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct AllocationLineDto {
    pub id: String,
    pub amount: i64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SubmitAllocationRequest {
    pub pledge_ids: Vec<AllocationLineDto>,
    pub beneficiary_id: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct SubmitAllocationResponse {
    pub ok: bool,
    pub message: String,
}
