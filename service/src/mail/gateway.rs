// Copyright 2023-, GraphOps and Semiotic Labs.
// SPDX-License-Identifier: Apache-2.0

//! The mail gateway contract, plus one concrete implementation over a
//! generic REST mail-gateway backend. No vendor is prescribed, so
//! `HttpMailGateway` only assumes a small JSON contract any bridge
//! service could expose.

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::instrument;

use crate::error::MailError;

use super::types::{Draft, DraftOptions, Label, Message, ReplyOptions, Thread, ThreadId};

/// Mail send timeout: ~60s.
pub const SEND_TIMEOUT: Duration = Duration::from_secs(60);

#[async_trait]
pub trait MailGateway: Send + Sync {
    async fn search(&self, query: &str, limit: usize) -> Result<Vec<Thread>, MailError>;
    async fn label_apply(&self, thread: &ThreadId, label: &str) -> Result<(), MailError>;
    async fn label_remove(&self, thread: &ThreadId, label: &str) -> Result<(), MailError>;
    async fn ensure_label(&self, name: &str) -> Result<Label, MailError>;
    async fn fetch_messages(&self, thread: &ThreadId) -> Result<Vec<Message>, MailError>;
    async fn create_draft(
        &self,
        to: Vec<String>,
        subject: String,
        html_body: String,
        options: DraftOptions,
    ) -> Result<Draft, MailError>;
    async fn send_draft(&self, draft: &Draft) -> Result<Message, MailError>;
    async fn reply_in_thread(
        &self,
        thread: &ThreadId,
        html_body: &str,
        options: ReplyOptions,
    ) -> Result<Message, MailError>;
}

pub struct HttpMailGateway {
    client: Client,
    base_url: String,
}

impl HttpMailGateway {
    pub fn new(base_url: impl Into<String>) -> Self {
        let client = Client::builder()
            .timeout(SEND_TIMEOUT)
            .build()
            .expect("reqwest client builds");
        Self {
            client,
            base_url: base_url.into(),
        }
    }
}

#[derive(Serialize)]
struct SearchRequest<'a> {
    query: &'a str,
    limit: usize,
}

#[derive(Deserialize)]
struct SearchResponse {
    threads: Vec<Thread>,
}

#[async_trait]
impl MailGateway for HttpMailGateway {
    #[instrument(skip(self))]
    async fn search(&self, query: &str, limit: usize) -> Result<Vec<Thread>, MailError> {
        let resp = self
            .client
            .post(format!("{}/threads/search", self.base_url))
            .json(&SearchRequest { query, limit })
            .send()
            .await?;
        let body: SearchResponse = resp.json().await?;
        Ok(body.threads)
    }

    #[instrument(skip(self))]
    async fn label_apply(&self, thread: &ThreadId, label: &str) -> Result<(), MailError> {
        self.client
            .post(format!(
                "{}/threads/{}/labels/{}",
                self.base_url, thread.0, label
            ))
            .send()
            .await?;
        Ok(())
    }

    #[instrument(skip(self))]
    async fn label_remove(&self, thread: &ThreadId, label: &str) -> Result<(), MailError> {
        self.client
            .delete(format!(
                "{}/threads/{}/labels/{}",
                self.base_url, thread.0, label
            ))
            .send()
            .await?;
        Ok(())
    }

    #[instrument(skip(self))]
    async fn ensure_label(&self, name: &str) -> Result<Label, MailError> {
        let resp = self
            .client
            .put(format!("{}/labels/{}", self.base_url, name))
            .send()
            .await?;
        let label: Label = resp.json().await?;
        Ok(label)
    }

    #[instrument(skip(self))]
    async fn fetch_messages(&self, thread: &ThreadId) -> Result<Vec<Message>, MailError> {
        let resp = self
            .client
            .get(format!("{}/threads/{}/messages", self.base_url, thread.0))
            .send()
            .await?;
        let messages: Vec<Message> = resp.json().await?;
        Ok(messages)
    }

    #[instrument(skip(self, html_body, options))]
    async fn create_draft(
        &self,
        to: Vec<String>,
        subject: String,
        html_body: String,
        options: DraftOptions,
    ) -> Result<Draft, MailError> {
        #[derive(Serialize)]
        struct Req {
            to: Vec<String>,
            subject: String,
            html_body: String,
            cc: Vec<String>,
            bcc: Vec<String>,
            in_reply_to: Option<String>,
        }
        #[derive(Deserialize)]
        struct Resp {
            id: String,
        }
        let req = Req {
            to: to.clone(),
            subject: subject.clone(),
            html_body: html_body.clone(),
            cc: options.cc.clone(),
            bcc: options.bcc.clone(),
            in_reply_to: options.in_reply_to.as_ref().map(|m| m.0.clone()),
        };
        let resp = self
            .client
            .post(format!("{}/drafts", self.base_url))
            .json(&req)
            .send()
            .await?;
        let body: Resp = resp.json().await?;
        Ok(Draft {
            id: body.id,
            to,
            subject,
            html_body,
            options,
        })
    }

    #[instrument(skip(self, draft))]
    async fn send_draft(&self, draft: &Draft) -> Result<Message, MailError> {
        let resp = self
            .client
            .post(format!("{}/drafts/{}/send", self.base_url, draft.id))
            .send()
            .await?;
        let message: Message = resp.json().await?;
        Ok(message)
    }

    #[instrument(skip(self, html_body, options))]
    async fn reply_in_thread(
        &self,
        thread: &ThreadId,
        html_body: &str,
        options: ReplyOptions,
    ) -> Result<Message, MailError> {
        #[derive(Serialize)]
        struct Req<'a> {
            html_body: &'a str,
            cc: Vec<String>,
            bcc: Vec<String>,
        }
        let resp = self
            .client
            .post(format!("{}/threads/{}/reply", self.base_url, thread.0))
            .json(&Req {
                html_body,
                cc: options.cc,
                bcc: options.bcc,
            })
            .send()
            .await?;
        let message: Message = resp.json().await?;
        Ok(message)
    }
}
