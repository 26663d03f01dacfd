// Copyright 2023-, GraphOps and Semiotic Labs.
// SPDX-License-Identifier: Apache-2.0

//! Shared application state handed to every axum handler and scheduled task.

use std::collections::HashMap;
use std::sync::Arc;

use crate::lm::LmClassifier;
use crate::ledger::{AuditWriter, PostgresLedgerStore};
use crate::lock::ScriptLock;
use crate::mail::MailGateway;
use crate::templates::TemplateRenderer;

#[derive(Clone)]
pub struct AppState {
    pub store: PostgresLedgerStore,
    pub audit: AuditWriter,
    pub mail: Arc<dyn MailGateway + Send + Sync>,
    pub classifier: Arc<dyn LmClassifier + Send + Sync>,
    pub templates: TemplateRenderer,
    pub lock: ScriptLock,
    pub duration_amounts: Arc<HashMap<String, i64>>,
    pub chapter_leads: Arc<HashMap<String, Vec<String>>>,
    pub always_cc: Arc<Vec<String>>,
    pub service_mailbox_address: Arc<String>,
    pub admin_alert_address: Arc<String>,
    pub hostel_office_address: Arc<String>,
    pub blob_receipts_dir: Arc<String>,
}
