// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Ad-hoc operator queries: free-form questions and finding
//! explanations. Both return a query id immediately and resolve on a
//! worker task.

use super::Pipeline;
use crate::error::PipelineError;
use crate::phases::{self, PhaseKey};
use fortify_core::{query, Clock, Query, QueryId, QueryKind, QueryStatus};
use serde_json::Value;
use std::sync::Arc;

impl<C: Clock> Pipeline<C> {
    /// Enqueue a free-form question about a target.
    pub fn ask(self: &Arc<Self>, name: &str, question: &str) -> Result<QueryId, PipelineError> {
        let _ = self.workflow(name)?;
        let q = Query::pending(name, QueryKind::Ask, question, self.clock.epoch_ms());
        let id = q.id;
        {
            let mut state = self.state.lock();
            state.queries.push(q);
            query::prune_queries(&mut state.queries);
        }

        let pipeline = Arc::clone(self);
        let workflow = name.to_string();
        let question = question.to_string();
        self.spawn_worker(name, async move {
            pipeline.run_ask(id, &workflow, &question).await;
            Ok(())
        });
        Ok(id)
    }

    /// Enqueue an explanation of one analysis finding.
    pub fn explain(self: &Arc<Self>, name: &str, finding_id: &str) -> Result<QueryId, PipelineError> {
        let wf = self.workflow(name)?;
        let finding = find_finding(wf.analysis.as_ref(), finding_id)
            .ok_or_else(|| PipelineError::UnknownFinding(finding_id.to_string()))?;

        let q = Query::pending(
            name,
            QueryKind::Explain,
            format!("explain finding {finding_id}"),
            self.clock.epoch_ms(),
        );
        let id = q.id;
        {
            let mut state = self.state.lock();
            state.queries.push(q);
            query::prune_queries(&mut state.queries);
        }

        let pipeline = Arc::clone(self);
        let workflow = name.to_string();
        self.spawn_worker(name, async move {
            pipeline.run_explain(id, &workflow, finding).await;
            Ok(())
        });
        Ok(id)
    }

    /// Deep copy of a query by id.
    pub fn query(&self, id: QueryId) -> Option<Query> {
        self.state.lock().queries.iter().find(|q| q.id == id).cloned()
    }

    async fn run_ask(&self, id: QueryId, name: &str, question: &str) {
        let cancel = self.cancel_token();
        let outcome = async {
            let wf = self.workflow(name)?;
            let source = std::fs::read_to_string(&wf.full_path)
                .map_err(|e| PipelineError::io(format!("read {}", wf.full_path.display()), e))?;
            let prompt = phases::ask_prompt(&wf, question, &source);
            self.store_prompt(name, PhaseKey::Ask, &prompt);
            Ok::<_, PipelineError>(self.tool.call(&prompt, &cancel).await?)
        }
        .await;
        self.finish_query(id, outcome);
    }

    async fn run_explain(&self, id: QueryId, name: &str, finding: Value) {
        let cancel = self.cancel_token();
        let outcome = async {
            let wf = self.workflow(name)?;
            let prompt = phases::explain_prompt(&wf, &finding);
            self.store_prompt(name, PhaseKey::Explain, &prompt);
            Ok::<_, PipelineError>(self.tool.call(&prompt, &cancel).await?)
        }
        .await;
        self.finish_query(id, outcome);
    }

    /// Queries never mark the workflow failed; they fail in place.
    fn finish_query(&self, id: QueryId, outcome: Result<String, PipelineError>) {
        let mut state = self.state.lock();
        let Some(q) = state.queries.iter_mut().find(|q| q.id == id) else {
            return;
        };
        match outcome {
            Ok(result) => {
                q.status = QueryStatus::Complete;
                q.result = Some(result);
            }
            Err(e) => {
                q.status = QueryStatus::Error;
                q.error = Some(e.to_string());
                tracing::warn!(query = %id, error = %e, "query failed");
            }
        }
    }
}

/// Locate a finding by `id` in the analysis payload.
fn find_finding(analysis: Option<&Value>, finding_id: &str) -> Option<Value> {
    analysis?
        .get("findings")?
        .as_array()?
        .iter()
        .find(|f| f.get("id").and_then(Value::as_str) == Some(finding_id))
        .cloned()
}

#[cfg(test)]
#[path = "queries_tests.rs"]
mod tests;
