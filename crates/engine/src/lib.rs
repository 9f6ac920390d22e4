// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

// Allow panic!/unwrap/expect in test code
#![cfg_attr(test, allow(clippy::panic))]
#![cfg_attr(test, allow(clippy::unwrap_used))]
#![cfg_attr(test, allow(clippy::expect_used))]

//! fortify-engine: workflow scheduling and the pipeline state machine

pub mod error;
pub mod phases;
pub mod pipeline;
pub mod scheduler;

pub use error::PipelineError;
pub use phases::{PhaseClass, PhaseKey, WritePlan, VALID_PROMPT_PHASES};
pub use pipeline::{
    BatchSpec, Decision, DecisionAction, GrantView, Guard, Pipeline, StateSnapshot, Target,
    RESET_JOIN_TIMEOUT,
};
pub use scheduler::{
    Scheduler, WorkCallback, WorkFuture, WorkItemInfo, WorkStatus, DISPATCH_TICK,
    STARVATION_AFTER,
};
