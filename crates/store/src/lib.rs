// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

// Allow panic!/unwrap/expect in test code
#![cfg_attr(test, allow(clippy::panic))]
#![cfg_attr(test, allow(clippy::unwrap_used))]
#![cfg_attr(test, allow(clippy::expect_used))]

//! fortify-store: path-validated artifact storage and file leases

pub mod locks;
pub mod paths;
pub mod sidecar;

pub use locks::{Grant, GrantId, LockError, LockManager, DEFAULT_TTL, REAPER_TICK};
pub use paths::{ProjectLayout, StoreError};
pub use sidecar::{MirrorResolver, SidecarStore, TestPathResolver};
