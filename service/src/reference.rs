// Copyright 2023-, GraphOps and Semiotic Labs.
// SPDX-License-Identifier: Apache-2.0

//! Subject-line reference parsing shared by the ingestor and the watchdog
//!. Precedence: an explicit pledge id,
//! then an explicit `Ref:` token, then a batch id, then a permissive
//! numeric fallback interpreted as a pledge sequence in the current year.

use chrono::Datelike;
use once_cell::sync::Lazy;
use regex::Regex;

use crate::ids::{format_pledge_id, BatchId, PledgeId};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Reference {
    Pledge(PledgeId),
    Batch(BatchId),
}

static PLEDGE_ID: Lazy<Regex> = Lazy::new(|| Regex::new(r"PLEDGE-\d{4}-\d+").unwrap());
static BATCH_ID: Lazy<Regex> = Lazy::new(|| Regex::new(r"BATCH-\d+").unwrap());
static REF_TOKEN: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?i)ref:\s*(\S+)").unwrap());
static NUMERIC_FALLBACK: Lazy<Regex> = Lazy::new(|| Regex::new(r"\b(\d{1,6})\b").unwrap());

pub fn parse_reference(subject: &str) -> Option<Reference> {
    if let Some(m) = PLEDGE_ID.find(subject) {
        return Some(Reference::Pledge(PledgeId::from(m.as_str())));
    }
    if let Some(caps) = REF_TOKEN.captures(subject) {
        let token = caps.get(1).unwrap().as_str();
        if PLEDGE_ID.is_match(token) {
            return Some(Reference::Pledge(PledgeId::from(token)));
        }
        if BATCH_ID.is_match(token) {
            return Some(Reference::Batch(BatchId::from(token)));
        }
        return Some(Reference::Pledge(PledgeId::from(token)));
    }
    if let Some(m) = BATCH_ID.find(subject) {
        return Some(Reference::Batch(BatchId::from(m.as_str())));
    }
    if let Some(caps) = NUMERIC_FALLBACK.captures(subject) {
        let year = chrono::Utc::now().year();
        let seq: u32 = caps.get(1).unwrap().as_str().parse().ok()?;
        return Some(Reference::Pledge(format_pledge_id(year, seq)));
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn prefers_explicit_pledge_id_over_everything() {
        let subject = "Re: PLEDGE-2025-12 Ref: BATCH-3";
        assert_eq!(
            parse_reference(subject),
            Some(Reference::Pledge(PledgeId::from("PLEDGE-2025-12")))
        );
    }

    #[test]
    fn falls_back_to_ref_token() {
        let subject = "Receipt attached Ref: PLEDGE-2024-7";
        assert_eq!(
            parse_reference(subject),
            Some(Reference::Pledge(PledgeId::from("PLEDGE-2024-7")))
        );
    }

    #[test]
    fn recognises_batch_id() {
        let subject = "Payment confirmation BATCH-9";
        assert_eq!(parse_reference(subject), Some(Reference::Batch(BatchId::from("BATCH-9"))));
    }

    #[test]
    fn numeric_fallback_assumes_current_year_pledge() {
        let subject = "receipt for pledge 42";
        let year = chrono::Utc::now().year();
        assert_eq!(
            parse_reference(subject),
            Some(Reference::Pledge(format_pledge_id(year, 42)))
        );
    }

    #[test]
    fn no_match_returns_none() {
        assert_eq!(parse_reference("hello there"), None);
    }
}
