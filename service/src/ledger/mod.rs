// Copyright 2023-, GraphOps and Semiotic Labs.
// SPDX-License-Identifier: Apache-2.0

//! C1: the ledger store — pledges, receipts, allocations,
//! the audit log, and the beneficiary split store, plus the
//! `verify_invariants` diagnostic.

pub mod audit;
pub mod invariants;
pub mod models;
pub mod store;

pub use audit::AuditWriter;
pub use store::PostgresLedgerStore;
