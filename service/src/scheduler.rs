// Copyright 2023-, GraphOps and Semiotic Labs.
// SPDX-License-Identifier: Apache-2.0

//! Drives the two scheduled tasks: the receipt ingestor every
//! ~10 minutes, the reply watchdog every ~15 minutes. Each tick is
//! independently caught, logged, and swallowed — a failing
//! tick must never kill the scheduler loop.

use std::time::Duration;

use tokio::task::JoinHandle;
use tracing::{error, info};

use crate::ingestor::ReceiptIngestor;
use crate::state::AppState;
use crate::watchdog::ReplyWatchdog;

pub fn spawn_ingestor_loop(state: AppState, interval: Duration) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        loop {
            ticker.tick().await;
            let ingestor = ReceiptIngestor {
                store: &state.store,
                audit: &state.audit,
                mail: state.mail.as_ref(),
                classifier: state.classifier.as_ref(),
                lock: &state.lock,
                blob_receipts_dir: &state.blob_receipts_dir,
                service_mailbox_address: &state.service_mailbox_address,
                admin_alert_address: &state.admin_alert_address,
            };
            match ingestor.run_once().await {
                Ok(()) => info!("ingestor tick completed"),
                Err(e) => error!(error = %e, "ingestor tick failed, will retry next interval"),
            }
        }
    })
}

pub fn spawn_watchdog_loop(state: AppState, interval: Duration) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        loop {
            ticker.tick().await;
            let watchdog = ReplyWatchdog {
                store: &state.store,
                audit: &state.audit,
                mail: state.mail.as_ref(),
                classifier: state.classifier.as_ref(),
                templates: &state.templates,
                lock: &state.lock,
                admin_alert_address: &state.admin_alert_address,
            };
            match watchdog.run_once().await {
                Ok(()) => info!("watchdog tick completed"),
                Err(e) => error!(error = %e, "watchdog tick failed, will retry next interval"),
            }
        }
    })
}
