// Copyright 2023-, GraphOps and Semiotic Labs.
// SPDX-License-Identifier: Apache-2.0

//! Newtype identifiers. Every id is an opaque string downstream; these
//! wrappers keep the compiler from letting a `PledgeId` slip into a slot
//! that expects an `AllocId`.

use std::fmt;

use serde::{Deserialize, Serialize};

macro_rules! newtype_id {
    ($name:ident) => {
        #[derive(
            Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, sqlx::Type,
        )]
        #[sqlx(transparent)]
        pub struct $name(pub String);

        impl $name {
            pub fn as_str(&self) -> &str {
                &self.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}", self.0)
            }
        }

        impl From<String> for $name {
            fn from(value: String) -> Self {
                Self(value)
            }
        }

        impl From<&str> for $name {
            fn from(value: &str) -> Self {
                Self(value.to_owned())
            }
        }
    };
}

newtype_id!(PledgeId);
newtype_id!(ReceiptId);
newtype_id!(AllocId);
newtype_id!(BatchId);
newtype_id!(BeneficiaryId);

/// `PLEDGE-<4-digit-year>-<monotonic>`.
pub fn format_pledge_id(year: i32, seq: u32) -> PledgeId {
    PledgeId(format!("PLEDGE-{year:04}-{seq}"))
}

/// `<pledge_id>-R<seq>`.
pub fn format_receipt_id(pledge_id: &PledgeId, seq: u32) -> ReceiptId {
    ReceiptId(format!("{}-R{}", pledge_id.as_str(), seq))
}

/// `ALLOC-<monotonic>`.
pub fn format_alloc_id(seq: u64) -> AllocId {
    AllocId(format!("ALLOC-{seq}"))
}

/// `BATCH-<monotonic>`.
pub fn format_batch_id(seq: u64) -> BatchId {
    BatchId(format!("BATCH-{seq}"))
}
