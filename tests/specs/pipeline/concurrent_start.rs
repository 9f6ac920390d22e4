// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Concurrent start: the non-active gate admits exactly one request.

use crate::prelude::*;

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn ten_concurrent_analyze_requests_admit_exactly_one() {
    let spec = Spec::new(vec![Ok(json!({"findings": []}).to_string())]);

    let mut tasks = Vec::new();
    for _ in 0..10 {
        let app = spec.app.clone();
        tasks.push(tokio::spawn(async move {
            app.oneshot(
                Request::builder()
                    .method(Method::POST)
                    .uri("/pipeline/analyze")
                    .header(header::CONTENT_TYPE, "application/json")
                    .header("x-requested-with", "XMLHttpRequest")
                    .body(Body::from(json!({"controller": "bar_controller"}).to_string()))
                    .unwrap(),
            )
            .await
            .unwrap()
        }));
    }

    let mut ok = 0;
    let mut conflict = 0;
    for task in tasks {
        let response = task.await.unwrap();
        match response.status() {
            StatusCode::OK => ok += 1,
            StatusCode::CONFLICT => {
                let body = body_json(response).await;
                assert!(body["error"].as_str().unwrap().contains("already active"));
                conflict += 1;
            }
            other => panic!("unexpected status {other}"),
        }
    }
    assert_eq!(ok, 1);
    assert_eq!(conflict, 9);
}
