// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Auth specs over HTTP: rate limiting keyed by forwarded IP and the
//! session-fixation defense.

use crate::prelude::*;
use fortify_server::security::AUTH_MAX_ATTEMPTS;

async fn login_as(spec: &Spec, ip: &str, passcode: &str) -> Response<Body> {
    spec.app
        .clone()
        .oneshot(
            Request::builder()
                .method(Method::POST)
                .uri("/auth")
                .header(header::CONTENT_TYPE, "application/x-www-form-urlencoded")
                .header("x-forwarded-for", ip)
                .body(Body::from(format!("passcode={passcode}")))
                .unwrap(),
        )
        .await
        .unwrap()
}

#[tokio::test]
async fn limited_ip_is_refused_even_with_the_correct_passcode() {
    let spec = Spec::with_auth(Vec::new(), Some("hunter2"));

    for _ in 0..AUTH_MAX_ATTEMPTS {
        let response = login_as(&spec, "9.9.9.9", "wrong").await;
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    }
    let response = login_as(&spec, "9.9.9.9", "hunter2").await;
    assert_eq!(response.status(), StatusCode::TOO_MANY_REQUESTS);

    // A different IP is unaffected and can log in.
    let response = login_as(&spec, "8.8.8.8", "hunter2").await;
    assert_eq!(response.status(), StatusCode::FOUND);
}

#[tokio::test]
async fn rightmost_forwarded_entry_is_the_limited_key() {
    let spec = Spec::with_auth(Vec::new(), Some("hunter2"));

    for _ in 0..AUTH_MAX_ATTEMPTS {
        let response = spec
            .app
            .clone()
            .oneshot(
                Request::builder()
                    .method(Method::POST)
                    .uri("/auth")
                    .header(header::CONTENT_TYPE, "application/x-www-form-urlencoded")
                    // Spoofed left entries must not dodge the limit.
                    .header("x-forwarded-for", "1.2.3.4, 9.9.9.9")
                    .body(Body::from("passcode=wrong"))
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    }

    let response = login_as(&spec, "9.9.9.9", "hunter2").await;
    assert_eq!(response.status(), StatusCode::TOO_MANY_REQUESTS);
}

#[tokio::test]
async fn successful_login_rotates_the_session_cookie() {
    let spec = Spec::with_auth(Vec::new(), Some("hunter2"));
    let pre = spec.state.sessions.issue();

    let response = spec
        .app
        .clone()
        .oneshot(
            Request::builder()
                .method(Method::POST)
                .uri("/auth")
                .header(header::CONTENT_TYPE, "application/x-www-form-urlencoded")
                .header(header::COOKIE, format!("fortify_session={pre}"))
                .body(Body::from("passcode=hunter2"))
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::FOUND);

    let set_cookie = response.headers()[header::SET_COOKIE].to_str().unwrap();
    let post = set_cookie
        .split(';')
        .next()
        .unwrap()
        .split_once('=')
        .unwrap()
        .1;
    assert_ne!(pre, post);
    assert!(!spec.state.sessions.is_authenticated(&pre));
}
