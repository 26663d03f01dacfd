// Copyright 2023-, GraphOps and Semiotic Labs.
// SPDX-License-Identifier: Apache-2.0

//! The audit actor: either a logged-in operator's email, or the `SYSTEM`
//! sentinel used by scheduled tasks.

use std::fmt;

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "value")]
pub enum Actor {
    Operator(String),
    System,
}

impl fmt::Display for Actor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Actor::Operator(email) => write!(f, "{email}"),
            Actor::System => write!(f, "SYSTEM"),
        }
    }
}
