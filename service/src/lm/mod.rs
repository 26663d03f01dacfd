// Copyright 2023-, GraphOps and Semiotic Labs.
// SPDX-License-Identifier: Apache-2.0

//! C4: the LM classifier.

pub mod classifier;
pub mod schema;

pub use classifier::{HttpLmClassifier, LmClassifier};
pub use schema::*;
