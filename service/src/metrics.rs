// Copyright 2023-, GraphOps and Semiotic Labs.
// SPDX-License-Identifier: Apache-2.0

//! Prometheus metrics: receipts ingested, allocations committed, lock
//! wait time and lock timeouts, LM no-decision count, and watchdog
//! manual-review count — counters/histograms at the seams that matter
//! operationally: lock contention, allocation outcomes, and the two poll
//! loops.

use std::net::SocketAddr;

use metrics_exporter_prometheus::PrometheusBuilder;
use tracing::info;

pub fn install_recorder(listen_addr: SocketAddr) -> anyhow::Result<()> {
    PrometheusBuilder::new()
        .with_http_listener(listen_addr)
        .install()?;
    info!(%listen_addr, "prometheus exporter installed");
    Ok(())
}

pub fn record_allocation_outcome(outcome: &str) {
    metrics::counter!("hostel_ledger_allocations_total", "outcome" => outcome.to_string()).increment(1);
}

pub fn record_lock_wait(waited_ms: u64) {
    metrics::histogram!("hostel_ledger_lock_wait_milliseconds").record(waited_ms as f64);
}

pub fn record_lock_timeout() {
    metrics::counter!("hostel_ledger_lock_timeouts_total").increment(1);
}

pub fn record_ingestor_run(threads_processed: u64) {
    metrics::counter!("hostel_ledger_ingestor_threads_processed_total").increment(threads_processed);
}

pub fn record_watchdog_run(threads_processed: u64) {
    metrics::counter!("hostel_ledger_watchdog_threads_processed_total").increment(threads_processed);
}

pub fn record_classifier_no_decision(origin: &str) {
    metrics::counter!("hostel_ledger_classifier_no_decision_total", "origin" => origin.to_string()).increment(1);
}
