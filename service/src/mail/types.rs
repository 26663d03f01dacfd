// Copyright 2023-, GraphOps and Semiotic Labs.
// SPDX-License-Identifier: Apache-2.0

//! Wire-ish types for the mail gateway contract. RFC-822
//! message ids are the only durable correlation key; vendor
//! thread ids are carried only as a lookup accelerator.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Hash)]
pub struct ThreadId(pub String);

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Hash)]
pub struct Rfc822MessageId(pub String);

impl std::fmt::Display for Rfc822MessageId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Attachment {
    pub filename: String,
    pub content_type: String,
    pub bytes: Vec<u8>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Message {
    pub rfc822_message_id: Rfc822MessageId,
    pub from: String,
    pub to: Vec<String>,
    pub subject: String,
    pub body_text: String,
    pub received_at: DateTime<Utc>,
    pub attachments: Vec<Attachment>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Thread {
    pub id: ThreadId,
    pub subject: String,
    pub labels: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Label {
    pub name: String,
}

#[derive(Debug, Clone, Default)]
pub struct DraftOptions {
    pub cc: Vec<String>,
    pub bcc: Vec<String>,
    pub attachments: Vec<Attachment>,
    pub in_reply_to: Option<Rfc822MessageId>,
}

#[derive(Debug, Clone)]
pub struct Draft {
    pub id: String,
    pub to: Vec<String>,
    pub subject: String,
    pub html_body: String,
    pub options: DraftOptions,
}

#[derive(Debug, Clone, Default)]
pub struct ReplyOptions {
    pub cc: Vec<String>,
    pub bcc: Vec<String>,
}

/// Flattens a thread's messages, most-recent first, for LM input
///.
pub fn flatten_thread_text(messages: &[Message], max_prior: usize) -> String {
    let mut ordered: Vec<&Message> = messages.iter().collect();
    ordered.sort_by(|a, b| b.received_at.cmp(&a.received_at));
    ordered
        .into_iter()
        .take(max_prior.max(1))
        .map(|m| format!("From: {}\nAt: {}\n\n{}", m.from, m.received_at.to_rfc3339(), m.body_text))
        .collect::<Vec<_>>()
        .join("\n---\n")
}
