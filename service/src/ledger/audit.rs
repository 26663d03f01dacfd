// Copyright 2023-, GraphOps and Semiotic Labs.
// SPDX-License-Identifier: Apache-2.0

//! `AuditWriter`: a typed front door onto the append-only audit table so
//! call sites can't typo one of the closed-set event kinds.

use serde_json::json;

use crate::actor::Actor;
use crate::error::LedgerError;

use super::models::{AuditEvent, AuditEventKind, NewAuditEvent};
use super::store::PostgresLedgerStore;

#[derive(Clone)]
pub struct AuditWriter {
    store: PostgresLedgerStore,
}

impl AuditWriter {
    pub fn new(store: PostgresLedgerStore) -> Self {
        Self { store }
    }

    pub async fn record(
        &self,
        actor: Actor,
        kind: AuditEventKind,
        target_id: impl Into<String>,
        description: impl Into<String>,
        previous: Option<serde_json::Value>,
        new: Option<serde_json::Value>,
    ) -> Result<AuditEvent, LedgerError> {
        self.store
            .append_audit_event(NewAuditEvent {
                actor,
                kind,
                target_id: target_id.into(),
                description: description.into(),
                previous_value: previous,
                new_value: new,
                metadata: json!({}),
            })
            .await
    }
}
