// Copyright 2023-, GraphOps and Semiotic Labs.
// SPDX-License-Identifier: Apache-2.0

use std::collections::HashMap;

use clap::{command, Args, Parser};
use serde::{Deserialize, Serialize};

use crate::util::init_tracing;

#[derive(Clone, Debug, Parser, Serialize, Deserialize, Default)]
#[clap(
    name = "hostel-ledger",
    about = "Donation lifecycle engine for the hostel-fees campaign",
    author = "hostel-fees-campaign"
)]
#[command(author, version, about, long_about = None, arg_required_else_help = true)]
pub struct Cli {
    #[command(flatten)]
    pub database: Database,
    #[command(flatten)]
    pub server: Server,
    #[command(flatten)]
    pub mail: Mail,
    #[command(flatten)]
    pub classifier: Classifier,
    #[command(flatten)]
    pub ledger: LedgerConfig,

    #[arg(
        long,
        value_name = "config",
        env = "CONFIG",
        help = "Configuration file (TOML format) overlaying CLI/env values"
    )]
    config: Option<String>,
}

#[derive(Clone, Debug, Args, Serialize, Deserialize, Default)]
#[group(required = true, multiple = true)]
pub struct Database {
    #[clap(
        long,
        value_name = "database-url",
        env = "DATABASE_URL",
        help = "Postgres connection string for the ledger store"
    )]
    pub database_url: String,
    #[clap(
        long,
        value_name = "max-connections",
        env = "DATABASE_MAX_CONNECTIONS",
        default_value_t = 10,
        help = "Postgres connection pool size"
    )]
    pub max_connections: u32,
}

#[derive(Clone, Debug, Args, Serialize, Deserialize, Default)]
#[group(required = true, multiple = true)]
pub struct Server {
    #[clap(
        long,
        value_name = "port",
        env = "PORT",
        default_value_t = 7600,
        help = "Port to serve the operator UI API at"
    )]
    pub port: u16,
    #[clap(
        long,
        value_name = "metrics-port",
        env = "METRICS_PORT",
        default_value_t = 7300,
        help = "Port to serve Prometheus metrics at"
    )]
    pub metrics_port: u16,
    #[clap(
        long,
        value_name = "log-level",
        env = "LOG_LEVEL",
        help = "Log level in RUST_LOG format"
    )]
    pub log_level: Option<String>,
    #[clap(
        long,
        value_name = "log-format",
        env = "LOG_FORMAT",
        default_value_t = String::from("pretty"),
        help = "Log format: pretty, json, compact, full"
    )]
    pub log_format: String,
    #[clap(
        long,
        value_name = "ingestor-interval-seconds",
        env = "INGESTOR_INTERVAL_SECONDS",
        default_value_t = 600,
        help = "Receipt ingestor poll interval (spec: ~10 minutes)"
    )]
    pub ingestor_interval_seconds: u64,
    #[clap(
        long,
        value_name = "watchdog-interval-seconds",
        env = "WATCHDOG_INTERVAL_SECONDS",
        default_value_t = 900,
        help = "Hostel-reply watchdog poll interval (spec: ~15 minutes)"
    )]
    pub watchdog_interval_seconds: u64,
}

#[derive(Clone, Debug, Args, Serialize, Deserialize, Default)]
#[group(required = true, multiple = true)]
pub struct Mail {
    #[clap(
        long,
        value_name = "mail-gateway-url",
        env = "MAIL_GATEWAY_URL",
        help = "Base URL of the mail gateway bridge service"
    )]
    pub mail_gateway_url: String,
    #[clap(
        long,
        value_name = "service-mailbox-address",
        env = "SERVICE_MAILBOX_ADDRESS",
        help = "The service's own mailbox address, for loop suppression"
    )]
    pub service_mailbox_address: String,
    #[clap(
        long,
        value_name = "admin-alert-address",
        env = "ADMIN_ALERT_ADDRESS",
        help = "Address that receives manual-review / ambiguity alerts"
    )]
    pub admin_alert_address: String,
    #[clap(
        long,
        value_name = "hostel-office-address",
        env = "HOSTEL_OFFICE_ADDRESS",
        help = "Mailbox address of the hostel office counterparty"
    )]
    pub hostel_office_address: String,
}

#[derive(Clone, Debug, Args, Serialize, Deserialize, Default)]
#[group(required = true, multiple = true)]
pub struct Classifier {
    #[clap(
        long,
        value_name = "classifier-base-url",
        env = "CLASSIFIER_BASE_URL",
        help = "Base URL of the LM classifier endpoint"
    )]
    pub classifier_base_url: String,
    #[clap(
        long,
        value_name = "classifier-model",
        env = "CLASSIFIER_MODEL",
        help = "Model identifier for structured-output classification calls"
    )]
    pub classifier_model: String,
    #[clap(
        long,
        value_name = "classifier-api-key",
        env = "CLASSIFIER_API_KEY",
        help = "API key for the LM classifier endpoint"
    )]
    pub classifier_api_key: String,
}

#[derive(Clone, Debug, Args, Serialize, Deserialize, Default)]
#[group(required = true, multiple = true)]
pub struct LedgerConfig {
    #[clap(
        long,
        value_name = "blob-receipts-dir",
        env = "BLOB_RECEIPTS_DIR",
        help = "Directory receipt attachments are persisted under"
    )]
    pub blob_receipts_dir: String,
    #[clap(
        long,
        value_name = "templates-dir",
        env = "TEMPLATES_DIR",
        default_value_t = String::from("templates"),
        help = "Directory holding the email templates"
    )]
    pub templates_dir: String,
    #[clap(
        long,
        value_name = "anonymisation-salt",
        env = "ANONYMISATION_SALT",
        help = "Salt used by the (out-of-scope) anonymised reporting export"
    )]
    pub anonymisation_salt: String,
    #[clap(
        long,
        value_name = "duration-amounts-file",
        env = "DURATION_AMOUNTS_FILE",
        help = "JSON object mapping recognised pledge durations to promised amounts"
    )]
    pub duration_amounts_file: String,
    #[clap(
        long,
        value_name = "chapter-leads-file",
        env = "CHAPTER_LEADS_FILE",
        help = "JSON object mapping donor chapter to lead-contact email addresses"
    )]
    pub chapter_leads_file: String,
}

impl LedgerConfig {
    /// Loads the duration→amount map referenced by `duration_amounts_file`
    ///. Read once at startup; any recognised duration absent
    /// from the file is a configuration error, not a runtime one.
    pub fn load_duration_amounts(&self) -> Result<HashMap<String, i64>, ConfigError> {
        let text =
            std::fs::read_to_string(&self.duration_amounts_file).map_err(ConfigError::ReadStr)?;
        serde_json::from_str(&text)
            .map_err(|e| ConfigError::ValidateInput(format!("duration amounts file: {e}")))
    }

    /// Loads the chapter→lead-emails map referenced by `chapter_leads_file`.
    pub fn load_chapter_leads(&self) -> Result<HashMap<String, Vec<String>>, ConfigError> {
        let text =
            std::fs::read_to_string(&self.chapter_leads_file).map_err(ConfigError::ReadStr)?;
        serde_json::from_str(&text)
            .map_err(|e| ConfigError::ValidateInput(format!("chapter leads file: {e}")))
    }
}

impl Cli {
    /// Parse config arguments. CLI flags and environment variables are
    /// resolved by clap directly; `--config`/`CONFIG` names an optional
    /// TOML file intended for deployment-level overrides but is otherwise
    /// unused here (kept as a documented extension point, matching the
    /// teacher's own pattern of an optional config-file argument).
    pub fn args() -> Self {
        let cli = Cli::parse();

        if let Some(log_setting) = &cli.server.log_level {
            std::env::set_var("RUST_LOG", log_setting);
        };
        init_tracing(cli.server.log_format.clone()).expect(
            "Could not set up global default subscriber for logger, check RUST_LOG or --log-level",
        );
        cli
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("validate the input: {0}")]
    ValidateInput(String),
    #[error("read config file: {0}")]
    ReadStr(std::io::Error),
    #[error("parse config file: {0}")]
    Parse(toml::de::Error),
}
