// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Shared fixture for the spec suite: a temp project wired through a
//! real pipeline and the axum router, with a scripted tool.

#![allow(dead_code)]

pub use axum::body::{to_bytes, Body};
pub use axum::http::{header, Method, Request, Response, StatusCode};
pub use axum::Router;
pub use fortify_core::{Mode, PipelineConfig, SystemClock, ToolCommand, WorkflowStatus};
pub use fortify_engine::{Pipeline, Scheduler};
pub use fortify_exec::{ScriptedInvoker, ToolInvoker};
pub use fortify_server::{router, AppState};
pub use serde_json::{json, Value};
pub use std::sync::Arc;
pub use std::time::Duration;
pub use tempfile::TempDir;
pub use tower::ServiceExt;

pub struct Spec {
    pub tmp: TempDir,
    pub pipeline: Arc<Pipeline<SystemClock>>,
    pub invoker: Arc<ScriptedInvoker>,
    pub state: AppState,
    pub app: Router,
}

impl Spec {
    /// Project with one controller target, passing checks, and the
    /// given scripted tool responses. No passcode: specs that exercise
    /// auth build their own state.
    pub fn new(responses: Vec<Result<String, String>>) -> Self {
        Self::build(responses, None, |_| {})
    }

    pub fn with_auth(responses: Vec<Result<String, String>>, passcode: Option<&str>) -> Self {
        Self::build(responses, passcode, |_| {})
    }

    pub fn with_config(
        responses: Vec<Result<String, String>>,
        configure: impl FnOnce(&mut PipelineConfig),
    ) -> Self {
        Self::build(responses, None, configure)
    }

    fn build(
        responses: Vec<Result<String, String>>,
        passcode: Option<&str>,
        configure: impl FnOnce(&mut PipelineConfig),
    ) -> Self {
        let tmp = TempDir::new().unwrap();
        std::fs::create_dir_all(tmp.path().join("app/controllers")).unwrap();
        std::fs::create_dir_all(tmp.path().join("test/controllers")).unwrap();
        std::fs::write(
            tmp.path().join("app/controllers/bar_controller.rb"),
            "class BarController; end\n",
        )
        .unwrap();
        std::fs::write(
            tmp.path().join("app/controllers/baz_controller.rb"),
            "class BazController; end\n",
        )
        .unwrap();

        let mut config = PipelineConfig::for_project(tmp.path().to_path_buf());
        config.test_command = ToolCommand::new("sh", &["-c", "echo run >> test_runs.txt"]);
        config.lint_commands = vec![ToolCommand::new("sh", &["-c", "echo run >> lint_runs.txt"])];
        config.tool_timeout = Duration::from_secs(5);
        config.test_timeout = Duration::from_secs(5);
        config.lint_timeout = Duration::from_secs(5);
        configure(&mut config);

        let invoker = Arc::new(ScriptedInvoker::new(responses));
        let pipeline = Pipeline::new(
            config,
            Arc::clone(&invoker) as Arc<dyn ToolInvoker>,
            None,
            SystemClock,
        );
        pipeline.discover_targets().unwrap();

        let state = AppState::new(
            Arc::clone(&pipeline),
            passcode.map(String::from),
            "spec-secret".into(),
            tmp.path(),
        );
        let app = router(state.clone());
        Self { tmp, pipeline, invoker, state, app }
    }

    pub fn status_of(&self, name: &str) -> WorkflowStatus {
        self.pipeline.workflow(name).unwrap().status
    }

    pub fn seed_awaiting_decisions(&self, name: &str) {
        // Drive the real load-analysis path: write the sidecar, load it.
        let dir = self
            .tmp
            .path()
            .join(format!("app/controllers/.harden/{name}"));
        std::fs::create_dir_all(&dir).unwrap();
        std::fs::write(
            dir.join("analysis.json"),
            json!({"findings": [{"id": "f1", "scope": "action"}]}).to_string(),
        )
        .unwrap();
        self.pipeline.load_analysis(name).unwrap();
    }

    pub fn stage_file(&self, target: &str, rel: &str, content: &str) {
        let path = self
            .tmp
            .path()
            .join(format!("app/controllers/.harden/{target}/staging"))
            .join(rel);
        std::fs::create_dir_all(path.parent().unwrap()).unwrap();
        std::fs::write(path, content).unwrap();
    }

    pub async fn wait_terminal(&self, name: &str) -> WorkflowStatus {
        for _ in 0..500 {
            let status = self.status_of(name);
            if status.is_terminal() {
                return status;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!("workflow {name} never settled; last status {}", self.status_of(name));
    }

    pub async fn post(&self, path: &str, body: Value) -> Response<Body> {
        self.app
            .clone()
            .oneshot(
                Request::builder()
                    .method(Method::POST)
                    .uri(path)
                    .header(header::CONTENT_TYPE, "application/json")
                    .header("x-requested-with", "XMLHttpRequest")
                    .body(Body::from(body.to_string()))
                    .unwrap(),
            )
            .await
            .unwrap()
    }

    pub async fn get(&self, path: &str) -> Response<Body> {
        self.app
            .clone()
            .oneshot(Request::builder().uri(path).body(Body::empty()).unwrap())
            .await
            .unwrap()
    }
}

pub async fn body_json(response: Response<Body>) -> Value {
    let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    serde_json::from_slice(&bytes).unwrap()
}
