// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Ad-hoc operator queries (ask / explain-finding).

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Maximum retained queries; oldest pruned on overflow.
pub const MAX_QUERIES: usize = 50;

/// Unique identifier for a query.
pub type QueryId = Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QueryKind {
    /// Free-form operator question about a target
    Ask,
    /// Explanation of a specific analysis finding
    Explain,
}

crate::simple_display! {
    QueryKind {
        Ask => "ask",
        Explain => "explain",
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum QueryStatus {
    #[default]
    Pending,
    Complete,
    Error,
}

crate::simple_display! {
    QueryStatus {
        Pending => "pending",
        Complete => "complete",
        Error => "error",
    }
}

/// One ad-hoc question or explanation request and its outcome.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Query {
    pub id: QueryId,
    pub target: String,
    pub kind: QueryKind,
    pub question: String,
    #[serde(default)]
    pub status: QueryStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub created_at: u64,
}

impl Query {
    pub fn pending(
        target: impl Into<String>,
        kind: QueryKind,
        question: impl Into<String>,
        created_at: u64,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            target: target.into(),
            kind,
            question: question.into(),
            status: QueryStatus::Pending,
            result: None,
            error: None,
            created_at,
        }
    }
}

/// Drop oldest entries until the list fits the cap.
pub fn prune_queries(queries: &mut Vec<Query>) {
    while queries.len() > MAX_QUERIES {
        queries.remove(0);
    }
}

#[cfg(test)]
#[path = "query_tests.rs"]
mod tests;
