// Copyright 2023-, GraphOps and Semiotic Labs.
// SPDX-License-Identifier: Apache-2.0

//! C3: mail gateway abstraction.

pub mod gateway;
pub mod types;

pub use gateway::{HttpMailGateway, MailGateway};
pub use types::*;

/// Closed set of mail labels.
pub mod labels {
    pub const TO_PROCESS: &str = "receipts/to-process";
    pub const PROCESSED: &str = "receipts/processed";
    pub const UNMATCHED: &str = "receipts/unmatched";
    pub const WATCHDOG_PROCESSED: &str = "watchdog/processed";
    pub const WATCHDOG_MANUAL_REVIEW: &str = "watchdog/manual-review";
}
