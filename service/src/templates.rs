// Copyright 2023-, GraphOps and Semiotic Labs.
// SPDX-License-Identifier: Apache-2.0

//! Template rendering. Each template is a pair of files on disk
//! (`<id>.subject.txt`, `<id>.body.html`) holding `{{placeholder}}` tokens;
//! `TemplateRenderer` loads them once at startup and substitutes tokens at
//! render time.

use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;

use once_cell::sync::Lazy;
use regex::Regex;
use serde::Serialize;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TemplateId {
    PledgeConfirmation,
    HostelVerification,
    DonorAllocationIntermediate,
    DonorFinal,
    HostelMailto,
    BatchIntimation,
    BatchMailto,
}

impl TemplateId {
    pub fn slug(self) -> &'static str {
        match self {
            TemplateId::PledgeConfirmation => "pledge-confirmation",
            TemplateId::HostelVerification => "hostel-verification",
            TemplateId::DonorAllocationIntermediate => "donor-allocation-intermediate",
            TemplateId::DonorFinal => "donor-final",
            TemplateId::HostelMailto => "hostel-mailto",
            TemplateId::BatchIntimation => "batch-intimation",
            TemplateId::BatchMailto => "batch-mailto",
        }
    }

    pub fn all() -> [TemplateId; 7] {
        [
            TemplateId::PledgeConfirmation,
            TemplateId::HostelVerification,
            TemplateId::DonorAllocationIntermediate,
            TemplateId::DonorFinal,
            TemplateId::HostelMailto,
            TemplateId::BatchIntimation,
            TemplateId::BatchMailto,
        ]
    }
}

#[derive(Debug, thiserror::Error)]
pub enum TemplateError {
    #[error("failed to read template file {0}: {1}")]
    Io(String, std::io::Error),
    #[error("template {template} is missing a value for placeholder {placeholder}")]
    MissingPlaceholder {
        template: &'static str,
        placeholder: String,
    },
}

#[derive(Debug, Clone)]
pub struct Template {
    subject: String,
    html_body: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct RenderedTemplate {
    pub subject: String,
    pub html_body: String,
}

static PLACEHOLDER: Lazy<Regex> = Lazy::new(|| Regex::new(r"\{\{\s*([a-zA-Z0-9_]+)\s*\}\}").unwrap());

fn substitute(
    template_slug: &'static str,
    text: &str,
    context: &HashMap<String, String>,
) -> Result<String, TemplateError> {
    let mut missing: Option<String> = None;
    let rendered = PLACEHOLDER.replace_all(text, |caps: &regex::Captures| {
        let key = &caps[1];
        match context.get(key) {
            Some(value) => value.clone(),
            None => {
                if missing.is_none() {
                    missing = Some(key.to_string());
                }
                String::new()
            }
        }
    });
    if let Some(placeholder) = missing {
        return Err(TemplateError::MissingPlaceholder {
            template: template_slug,
            placeholder,
        });
    }
    Ok(rendered.into_owned())
}

#[derive(Clone)]
pub struct TemplateRenderer {
    templates: Arc<HashMap<&'static str, Template>>,
}

impl TemplateRenderer {
    pub fn load_from_dir(dir: &Path) -> Result<Self, TemplateError> {
        let mut templates = HashMap::new();
        for id in TemplateId::all() {
            let subject_path = dir.join(format!("{}.subject.txt", id.slug()));
            let body_path = dir.join(format!("{}.body.html", id.slug()));
            let subject = std::fs::read_to_string(&subject_path)
                .map_err(|e| TemplateError::Io(subject_path.display().to_string(), e))?;
            let html_body = std::fs::read_to_string(&body_path)
                .map_err(|e| TemplateError::Io(body_path.display().to_string(), e))?;
            templates.insert(
                id.slug(),
                Template {
                    subject: subject.trim().to_string(),
                    html_body,
                },
            );
        }
        Ok(Self {
            templates: Arc::new(templates),
        })
    }

    pub fn render(
        &self,
        id: TemplateId,
        context: &HashMap<String, String>,
    ) -> Result<RenderedTemplate, TemplateError> {
        let template = self
            .templates
            .get(id.slug())
            .expect("all TemplateId variants are loaded at startup");
        Ok(RenderedTemplate {
            subject: substitute(id.slug(), &template.subject, context)?,
            html_body: substitute(id.slug(), &template.html_body, context)?,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn substitute_fills_known_placeholders() {
        let mut ctx = HashMap::new();
        ctx.insert("donor_name".to_string(), "Aisha".to_string());
        let out = substitute("t", "Dear {{donor_name}},", &ctx).unwrap();
        assert_eq!(out, "Dear Aisha,");
    }

    #[test]
    fn substitute_errors_on_missing_placeholder() {
        let ctx = HashMap::new();
        let err = substitute("t", "Dear {{donor_name}},", &ctx).unwrap_err();
        assert!(matches!(err, TemplateError::MissingPlaceholder { .. }));
    }
}
