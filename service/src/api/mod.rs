// Copyright 2023-, GraphOps and Semiotic Labs.
// SPDX-License-Identifier: Apache-2.0

//! The operator UI HTTP surface: three read/write entry
//! points backed directly by `AppState`, no session store of its own.

pub mod dto;
pub mod handlers;

use axum::routing::{get, post};
use axum::Router;

use crate::state::AppState;

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/api/sidebar/:pledge_id", get(handlers::sidebar_data))
        .route("/api/pledges/available", get(handlers::available_pledges))
        .route("/api/allocations", post(handlers::submit_allocation))
        .with_state(state)
}
