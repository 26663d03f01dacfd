// Copyright 2023-, GraphOps and Semiotic Labs.
// SPDX-License-Identifier: Apache-2.0

//! Thin binary: wires the ledger store, mail gateway, LM classifier, the
//! scheduled ingestor/watchdog loops, and the operator UI API together
//!.

use std::net::SocketAddr;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use sqlx::postgres::PgPoolOptions;
use tracing::info;

use service::config::Cli;
use service::ledger::{AuditWriter, PostgresLedgerStore};
use service::lm::HttpLmClassifier;
use service::lock::ScriptLock;
use service::mail::HttpMailGateway;
use service::state::AppState;
use service::templates::TemplateRenderer;
use service::{api, metrics, scheduler, util};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    let cli = Cli::args();

    let pool = PgPoolOptions::new()
        .max_connections(cli.database.max_connections)
        .connect(&cli.database.database_url)
        .await?;
    sqlx::migrate!("./migrations").run(&pool).await?;

    let store = PostgresLedgerStore::new(pool);
    let audit = AuditWriter::new(store.clone());
    let mail = Arc::new(HttpMailGateway::new(cli.mail.mail_gateway_url.clone()));
    let classifier = Arc::new(HttpLmClassifier::new(
        cli.classifier.classifier_base_url.clone(),
        cli.classifier.classifier_model.clone(),
        cli.classifier.classifier_api_key.clone(),
    ));
    let templates = TemplateRenderer::load_from_dir(Path::new(&cli.ledger.templates_dir))?;
    let duration_amounts = Arc::new(cli.ledger.load_duration_amounts()?);
    let chapter_leads = Arc::new(cli.ledger.load_chapter_leads()?);

    let state = AppState {
        store,
        audit,
        mail,
        classifier,
        templates,
        lock: ScriptLock::new(),
        duration_amounts,
        chapter_leads,
        always_cc: Arc::new(vec![cli.mail.admin_alert_address.clone()]),
        service_mailbox_address: Arc::new(cli.mail.service_mailbox_address.clone()),
        admin_alert_address: Arc::new(cli.mail.admin_alert_address.clone()),
        hostel_office_address: Arc::new(cli.mail.hostel_office_address.clone()),
        blob_receipts_dir: Arc::new(cli.ledger.blob_receipts_dir.clone()),
    };

    metrics::install_recorder(SocketAddr::from(([0, 0, 0, 0], cli.server.metrics_port)))?;

    let ingestor_handle = scheduler::spawn_ingestor_loop(
        state.clone(),
        Duration::from_secs(cli.server.ingestor_interval_seconds),
    );
    let watchdog_handle = scheduler::spawn_watchdog_loop(
        state.clone(),
        Duration::from_secs(cli.server.watchdog_interval_seconds),
    );

    let app = api::router(state).layer(tower_http::trace::TraceLayer::new_for_http());
    let addr = SocketAddr::from(([0, 0, 0, 0], cli.server.port));
    info!(%addr, "serving operator UI API");
    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(util::shutdown_signal())
        .await?;

    ingestor_handle.abort();
    watchdog_handle.abort();
    Ok(())
}
