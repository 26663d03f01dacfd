// Copyright 2023-, GraphOps and Semiotic Labs.
// SPDX-License-Identifier: Apache-2.0

//! C4: the LM classifier contract. Any failure — network,
//! malformed output, schema violation — surfaces as a `ClassifierError`;
//! callers in C5/C7 must treat every variant the same way: escalate for
//! human review, never confirm.

use async_trait::async_trait;
use reqwest::Client;
use serde::Serialize;
use std::time::Duration;
use tracing::{instrument, warn};

use crate::error::ClassifierError;

use super::schema::{HostelReplyClassification, HostelReplyInput, ReceiptExtraction, ReceiptExtractionInput};

/// Per-call bound: ~30s.
pub const CALL_TIMEOUT: Duration = Duration::from_secs(30);

#[async_trait]
pub trait LmClassifier: Send + Sync {
    async fn extract_receipt(
        &self,
        input: ReceiptExtractionInput<'_>,
    ) -> Result<ReceiptExtraction, ClassifierError>;

    async fn classify_hostel_reply(
        &self,
        input: HostelReplyInput<'_>,
    ) -> Result<HostelReplyClassification, ClassifierError>;
}

pub struct HttpLmClassifier {
    client: Client,
    base_url: String,
    model: String,
    api_key: String,
}

impl HttpLmClassifier {
    pub fn new(base_url: impl Into<String>, model: impl Into<String>, api_key: impl Into<String>) -> Self {
        let client = Client::builder()
            .timeout(CALL_TIMEOUT)
            .build()
            .expect("reqwest client builds");
        Self {
            client,
            base_url: base_url.into(),
            model: model.into(),
            api_key: api_key.into(),
        }
    }
}

#[derive(Serialize)]
struct AttachmentRef<'a> {
    filename: &'a str,
    content_type: &'a str,
    #[serde(serialize_with = "serialize_base64")]
    bytes: &'a [u8],
}

fn serialize_base64<S: serde::Serializer>(bytes: &&[u8], serializer: S) -> Result<S::Ok, S::Error> {
    use base64::Engine;
    serializer.serialize_str(&base64::engine::general_purpose::STANDARD.encode(bytes))
}

#[derive(Serialize)]
struct ExtractReceiptRequest<'a> {
    model: &'a str,
    body_text: &'a str,
    attachments: Vec<AttachmentRef<'a>>,
    pledge_created_at: chrono::DateTime<chrono::Utc>,
    email_received_at: chrono::DateTime<chrono::Utc>,
    promised_amount: i64,
}

#[derive(Serialize)]
struct ClassifyReplyRequest<'a> {
    model: &'a str,
    thread_text: &'a str,
    open_allocations: &'a [super::schema::OpenAllocationRef],
}

#[async_trait]
impl LmClassifier for HttpLmClassifier {
    #[instrument(skip(self, input))]
    async fn extract_receipt(
        &self,
        input: ReceiptExtractionInput<'_>,
    ) -> Result<ReceiptExtraction, ClassifierError> {
        let req = ExtractReceiptRequest {
            model: &self.model,
            body_text: input.body_text,
            attachments: input
                .attachments
                .iter()
                .map(|a| AttachmentRef {
                    filename: &a.filename,
                    content_type: &a.content_type,
                    bytes: &a.bytes,
                })
                .collect(),
            pledge_created_at: input.pledge_created_at,
            email_received_at: input.email_received_at,
            promised_amount: input.promised_amount,
        };

        let resp = self
            .client
            .post(format!("{}/v1/receipt-extraction", self.base_url))
            .bearer_auth(&self.api_key)
            .json(&req)
            .send()
            .await?;

        let text = resp.text().await?;
        serde_json::from_str::<ReceiptExtraction>(&text).map_err(|e| {
            warn!(error = %e, "receipt extraction output failed schema validation");
            ClassifierError::SchemaViolation(e.to_string())
        })
    }

    #[instrument(skip(self, input))]
    async fn classify_hostel_reply(
        &self,
        input: HostelReplyInput<'_>,
    ) -> Result<HostelReplyClassification, ClassifierError> {
        let req = ClassifyReplyRequest {
            model: &self.model,
            thread_text: input.thread_text,
            open_allocations: input.open_allocations,
        };

        let resp = self
            .client
            .post(format!("{}/v1/hostel-reply-classification", self.base_url))
            .bearer_auth(&self.api_key)
            .json(&req)
            .send()
            .await?;

        let text = resp.text().await?;
        serde_json::from_str::<HostelReplyClassification>(&text).map_err(|e| {
            warn!(error = %e, "hostel reply classification output failed schema validation");
            ClassifierError::SchemaViolation(e.to_string())
        })
    }
}
