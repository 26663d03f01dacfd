// Copyright 2023-, GraphOps and Semiotic Labs.
// SPDX-License-Identifier: Apache-2.0

//! In-memory fakes for the two external-call boundaries, used by the integration tests under `tests/`.

use std::collections::HashMap;
use std::sync::Mutex;

use async_trait::async_trait;
use chrono::Utc;

use service::error::{ClassifierError, MailError};
use service::lm::{HostelReplyClassification, HostelReplyInput, LmClassifier, ReceiptExtraction, ReceiptExtractionInput};
use service::mail::{Draft, DraftOptions, Label, MailGateway, Message, ReplyOptions, Rfc822MessageId, Thread, ThreadId};

#[derive(Default)]
pub struct FakeMailGateway {
    pub threads: Mutex<Vec<Thread>>,
    pub messages: Mutex<HashMap<String, Vec<Message>>>,
    pub sent: Mutex<Vec<Message>>,
    next_id: Mutex<u64>,
}

impl FakeMailGateway {
    pub fn new() -> Self {
        Self::default()
    }

    fn next_message_id(&self) -> String {
        let mut n = self.next_id.lock().unwrap();
        *n += 1;
        format!("msg-{n}@fake.test")
    }

    pub fn seed_thread(&self, thread: Thread, messages: Vec<Message>) {
        self.messages.lock().unwrap().insert(thread.id.0.clone(), messages);
        self.threads.lock().unwrap().push(thread);
    }
}

#[async_trait]
impl MailGateway for FakeMailGateway {
    async fn search(&self, query: &str, _limit: usize) -> Result<Vec<Thread>, MailError> {
        let threads = self.threads.lock().unwrap();
        let matched = match query.strip_prefix("label:") {
            Some(label) => threads.iter().filter(|t| t.labels.iter().any(|l| l == label)).cloned().collect(),
            None => threads.clone(),
        };
        Ok(matched)
    }

    async fn label_apply(&self, thread: &ThreadId, label: &str) -> Result<(), MailError> {
        let mut threads = self.threads.lock().unwrap();
        if let Some(t) = threads.iter_mut().find(|t| t.id == *thread) {
            if !t.labels.iter().any(|l| l == label) {
                t.labels.push(label.to_string());
            }
        }
        Ok(())
    }

    async fn label_remove(&self, thread: &ThreadId, label: &str) -> Result<(), MailError> {
        let mut threads = self.threads.lock().unwrap();
        if let Some(t) = threads.iter_mut().find(|t| t.id == *thread) {
            t.labels.retain(|l| l != label);
        }
        Ok(())
    }

    async fn ensure_label(&self, name: &str) -> Result<Label, MailError> {
        Ok(Label { name: name.to_string() })
    }

    async fn fetch_messages(&self, thread: &ThreadId) -> Result<Vec<Message>, MailError> {
        Ok(self.messages.lock().unwrap().get(&thread.0).cloned().unwrap_or_default())
    }

    async fn create_draft(
        &self,
        to: Vec<String>,
        subject: String,
        html_body: String,
        options: DraftOptions,
    ) -> Result<Draft, MailError> {
        Ok(Draft {
            id: self.next_message_id(),
            to,
            subject,
            html_body,
            options,
        })
    }

    async fn send_draft(&self, draft: &Draft) -> Result<Message, MailError> {
        let message = Message {
            rfc822_message_id: Rfc822MessageId(draft.id.clone()),
            from: "hostel-ledger@fake.test".to_string(),
            to: draft.to.clone(),
            subject: draft.subject.clone(),
            body_text: draft.html_body.clone(),
            received_at: Utc::now(),
            attachments: Vec::new(),
        };
        self.sent.lock().unwrap().push(message.clone());
        Ok(message)
    }

    async fn reply_in_thread(
        &self,
        _thread: &ThreadId,
        html_body: &str,
        _options: ReplyOptions,
    ) -> Result<Message, MailError> {
        let message = Message {
            rfc822_message_id: Rfc822MessageId(self.next_message_id()),
            from: "hostel-ledger@fake.test".to_string(),
            to: Vec::new(),
            subject: String::new(),
            body_text: html_body.to_string(),
            received_at: Utc::now(),
            attachments: Vec::new(),
        };
        self.sent.lock().unwrap().push(message.clone());
        Ok(message)
    }
}

/// Scripted classifier: returns whatever the test enqueued, in order.
/// An empty queue is a test bug, not a `NoDecision` — tests that need to
/// exercise the no-decision path enqueue an `Err` explicitly.
#[derive(Default)]
pub struct ScriptedClassifier {
    pub receipt_responses: Mutex<Vec<Result<ReceiptExtraction, ClassifierError>>>,
    pub reply_responses: Mutex<Vec<Result<HostelReplyClassification, ClassifierError>>>,
}

impl ScriptedClassifier {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl LmClassifier for ScriptedClassifier {
    async fn extract_receipt(&self, _input: ReceiptExtractionInput<'_>) -> Result<ReceiptExtraction, ClassifierError> {
        self.receipt_responses
            .lock()
            .unwrap()
            .pop()
            .expect("test must enqueue a receipt extraction response")
    }

    async fn classify_hostel_reply(
        &self,
        _input: HostelReplyInput<'_>,
    ) -> Result<HostelReplyClassification, ClassifierError> {
        self.reply_responses
            .lock()
            .unwrap()
            .pop()
            .expect("test must enqueue a hostel reply classification response")
    }
}
