// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

// Allow panic!/unwrap/expect in test code
#![cfg_attr(test, allow(clippy::panic))]
#![cfg_attr(test, allow(clippy::unwrap_used))]
#![cfg_attr(test, allow(clippy::expect_used))]

//! fortify-server: the HTTP front door for the pipeline

pub mod env;
pub mod routes;
pub mod security;
pub mod state;

pub use routes::router;
pub use state::{AppState, ServerPipeline};
