#[cfg(test)]
mod tests {
    use axum::{
        body::Body,
        http::{header, Method, Request, StatusCode},
    };
    use serde_json::json;
    use tower::ServiceExt;

    use crate::tests::support::*;
    use crate::token::Role;

    fn login_attempt() -> Request<Body> {
        json_request("POST", "/api/auth/login", json!({"email": "nobody@example.com", "password": "wrong-password"}))
    }

    #[tokio::test]
    async fn test_request_id_and_hardening_headers_on_success() {
        let (app, _) = setup_app();

        let res = app.oneshot(get("/health")).await.unwrap();

        assert_eq!(res.status(), StatusCode::OK);
        let id = request_id(&res);
        assert!(uuid::Uuid::parse_str(&id).is_ok());
        assert_eq!(res.headers().get("x-content-type-options").unwrap(), "nosniff");
        assert_eq!(res.headers().get("x-frame-options").unwrap(), "DENY");
        assert!(res.headers().get("strict-transport-security").is_some());
        assert!(res.headers().get("x-powered-by").is_none());
        assert_eq!(res.headers().get(header::CACHE_CONTROL).unwrap(), "no-store");
    }

    #[tokio::test]
    async fn test_inbound_request_id_is_not_trusted() {
        let (app, _) = setup_app();

        let req = Request::builder().uri("/health").header("x-request-id", "forged").body(Body::empty()).unwrap();
        let res = app.oneshot(req).await.unwrap();

        assert_ne!(request_id(&res), "forged");
    }

    #[tokio::test]
    async fn test_unknown_route_uses_error_envelope() {
        let (app, _) = setup_app();

        let res = app.oneshot(get("/api/does-not-exist")).await.unwrap();

        assert_eq!(res.status(), StatusCode::NOT_FOUND);
        let id = request_id(&res);
        assert_eq!(res.headers().get("x-content-type-options").unwrap(), "nosniff");
        let body = body_json(res).await;
        assert_eq!(body["success"], false);
        assert_eq!(body["message"], "Route not found");
        assert_eq!(body["requestId"], id);
    }

    #[tokio::test]
    async fn test_sixth_failed_login_is_rate_limited() {
        let (app, _) = setup_app();

        for _ in 0..5 {
            let res = app.clone().oneshot(login_attempt()).await.unwrap();
            assert_eq!(res.status(), StatusCode::UNAUTHORIZED);
            assert_eq!(body_json(res).await["message"], "Invalid credentials");
        }

        let res = app.oneshot(login_attempt()).await.unwrap();
        assert_eq!(res.status(), StatusCode::TOO_MANY_REQUESTS);
        let retry_after: u64 = res.headers().get(header::RETRY_AFTER).unwrap().to_str().unwrap().parse().unwrap();
        assert!(retry_after >= 1);
        assert_eq!(res.headers().get("x-content-type-options").unwrap(), "nosniff");
        let id = request_id(&res);
        let body = body_json(res).await;
        assert_eq!(body["message"], "Too many authentication attempts, please try again later.");
        assert_eq!(body["requestId"], id);
    }

    #[tokio::test]
    async fn test_general_limiter_covers_api_prefix_only() {
        let mut cfg = test_config();
        cfg.rate_limit.general_max_requests = 2;
        let (app, _) = setup_app_with(cfg);

        for _ in 0..3 {
            let res = app.clone().oneshot(get("/health")).await.unwrap();
            assert_eq!(res.status(), StatusCode::OK);
        }
        for _ in 0..2 {
            let res = app.clone().oneshot(get("/api/does-not-exist")).await.unwrap();
            assert_eq!(res.status(), StatusCode::NOT_FOUND);
        }
        let res = app.oneshot(get("/api/does-not-exist")).await.unwrap();
        assert_eq!(res.status(), StatusCode::TOO_MANY_REQUESTS);
        assert_eq!(body_json(res).await["message"], "Too many requests from this IP, please try again later.");
    }

    #[tokio::test]
    async fn test_disallowed_origin_is_rejected() {
        let (app, _) = setup_app();

        let req = Request::builder().uri("/health").header(header::ORIGIN, "https://evil.example").body(Body::empty()).unwrap();
        let res = app.oneshot(req).await.unwrap();

        assert_eq!(res.status(), StatusCode::FORBIDDEN);
        assert!(res.headers().get(header::ACCESS_CONTROL_ALLOW_ORIGIN).is_none());
        assert_eq!(body_json(res).await["message"], "Not allowed by CORS");
    }

    #[tokio::test]
    async fn test_allowed_origin_is_echoed() {
        let (app, _) = setup_app();

        let req = Request::builder().uri("/health").header(header::ORIGIN, ORIGIN).body(Body::empty()).unwrap();
        let res = app.oneshot(req).await.unwrap();

        assert_eq!(res.status(), StatusCode::OK);
        assert_eq!(res.headers().get(header::ACCESS_CONTROL_ALLOW_ORIGIN).unwrap(), ORIGIN);
        assert_eq!(res.headers().get(header::ACCESS_CONTROL_ALLOW_CREDENTIALS).unwrap(), "true");
    }

    #[tokio::test]
    async fn test_preflight_short_circuits() {
        let (app, _) = setup_app();

        let req = Request::builder()
            .method(Method::OPTIONS)
            .uri("/api/auth/login")
            .header(header::ORIGIN, ORIGIN)
            .header(header::ACCESS_CONTROL_REQUEST_METHOD, "POST")
            .body(Body::empty())
            .unwrap();
        let res = app.oneshot(req).await.unwrap();

        assert_eq!(res.status(), StatusCode::NO_CONTENT);
        assert!(res.headers().get(header::ACCESS_CONTROL_ALLOW_METHODS).is_some());
        assert_eq!(res.headers().get(header::ACCESS_CONTROL_ALLOW_ORIGIN).unwrap(), ORIGIN);
    }

    #[tokio::test]
    async fn test_oversized_body_is_rejected() {
        let mut cfg = test_config();
        cfg.limits.max_body_bytes = 1024;
        let (app, _) = setup_app_with(cfg);

        let padding = "x".repeat(4096);
        let req = json_request("POST", "/api/auth/login", json!({"email": "a@example.com", "password": padding}));
        let res = app.oneshot(req).await.unwrap();

        assert_eq!(res.status(), StatusCode::PAYLOAD_TOO_LARGE);
        assert_eq!(body_json(res).await["message"], "Request entity too large");
    }

    #[tokio::test]
    async fn test_stalled_body_is_cut_off_by_request_timeout() {
        use futures::stream::{self, StreamExt};

        let mut cfg = test_config();
        cfg.server.request_timeout_secs = 1;
        let (app, _) = setup_app_with(cfg);

        let first = stream::once(async { Ok::<_, std::io::Error>(axum::body::Bytes::from_static(b"{\"email\":")) });
        let body = Body::from_stream(first.chain(stream::pending()));
        let req = Request::builder()
            .method("POST")
            .uri("/api/auth/login")
            .header(header::CONTENT_TYPE, "application/json")
            .body(body)
            .unwrap();

        let res = tokio::time::timeout(std::time::Duration::from_secs(5), app.oneshot(req))
            .await
            .expect("stalled upload must not hold the request open")
            .unwrap();
        assert_eq!(res.status(), StatusCode::REQUEST_TIMEOUT);
        assert!(!request_id(&res).is_empty());
        let body = body_json(res).await;
        assert_eq!(body["success"], false);
        assert!(body["requestId"].is_string());
    }

    #[tokio::test]
    async fn test_suspicious_body_is_rejected() {
        let (app, _) = setup_app();

        let req = json_request("POST", "/api/auth/login", json!({"email": "' or 1=1 --", "password": "irrelevant"}));
        let res = app.oneshot(req).await.unwrap();

        assert_eq!(res.status(), StatusCode::BAD_REQUEST);
        assert_eq!(body_json(res).await["message"], "Suspicious activity detected");
    }

    #[tokio::test]
    async fn test_suspicious_query_is_rejected() {
        let (app, _) = setup_app();

        let res = app.oneshot(get("/health?file=..%2F..%2Fetc%2Fpasswd")).await.unwrap();

        assert_eq!(res.status(), StatusCode::BAD_REQUEST);
        assert_eq!(body_json(res).await["message"], "Suspicious activity detected");
    }

    #[tokio::test]
    async fn test_missing_content_type() {
        let (app, _) = setup_app();

        let req = Request::builder()
            .method(Method::POST)
            .uri("/api/auth/login")
            .body(Body::from(r#"{"email":"a@example.com","password":"x"}"#))
            .unwrap();
        let res = app.oneshot(req).await.unwrap();

        assert_eq!(res.status(), StatusCode::BAD_REQUEST);
        assert_eq!(body_json(res).await["message"], "Content-Type header is required");
    }

    #[tokio::test]
    async fn test_unsupported_content_type() {
        let (app, _) = setup_app();

        let req = Request::builder()
            .method(Method::POST)
            .uri("/api/auth/login")
            .header(header::CONTENT_TYPE, "text/xml")
            .body(Body::from("<login/>"))
            .unwrap();
        let res = app.oneshot(req).await.unwrap();

        assert_eq!(res.status(), StatusCode::UNSUPPORTED_MEDIA_TYPE);
        assert_eq!(body_json(res).await["message"], "Unsupported content type");
    }

    #[tokio::test]
    async fn test_malformed_json_is_a_validation_failure() {
        let (app, _) = setup_app();

        let req = Request::builder()
            .method(Method::POST)
            .uri("/api/auth/login")
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::from("{not json"))
            .unwrap();
        let res = app.oneshot(req).await.unwrap();

        assert_eq!(res.status(), StatusCode::BAD_REQUEST);
        let body = body_json(res).await;
        assert_eq!(body["message"], "Validation failed");
        assert!(body["errors"][0].as_str().unwrap().starts_with("body:"));
    }

    #[tokio::test]
    async fn test_sanitized_body_reaches_handler() {
        let (app, _) = setup_app();

        let req = json_request(
            "POST",
            "/api/auth/register",
            json!({"email": "alice@example.com", "password": "long-enough-password", "name": "<script>alert(1)</script>Alice"}),
        );
        let res = app.oneshot(req).await.unwrap();

        assert_eq!(res.status(), StatusCode::CREATED);
        assert_eq!(body_json(res).await["data"]["user"]["name"], "Alice");
    }

    #[tokio::test]
    async fn test_compression_can_be_bypassed() {
        let (app, _) = setup_app();

        let req = Request::builder().uri("/version").header(header::ACCEPT_ENCODING, "gzip").body(Body::empty()).unwrap();
        let res = app.clone().oneshot(req).await.unwrap();
        assert_eq!(res.headers().get(header::CONTENT_ENCODING).unwrap(), "gzip");

        let req = Request::builder()
            .uri("/version")
            .header(header::ACCEPT_ENCODING, "gzip")
            .header("x-no-compression", "1")
            .body(Body::empty())
            .unwrap();
        let res = app.oneshot(req).await.unwrap();
        assert!(res.headers().get(header::CONTENT_ENCODING).is_none());
    }

    #[tokio::test]
    async fn test_handler_failures_carry_request_id() {
        let (app, _) = setup_app();

        let res = app.oneshot(get("/api/auth/me")).await.unwrap();

        assert_eq!(res.status(), StatusCode::UNAUTHORIZED);
        let id = request_id(&res);
        let body = body_json(res).await;
        assert_eq!(body["message"], "Not authorized, no token");
        assert_eq!(body["requestId"], id);
    }

    #[tokio::test]
    async fn test_expired_and_invalid_tokens_are_distinct() {
        let (app, state) = setup_app();
        let (user, _) = seed_user(&state, "bob@example.com", Role::User).await;

        let res = app.clone().oneshot(authed_get("/api/auth/me", "not-a-token")).await.unwrap();
        assert_eq!(res.status(), StatusCode::UNAUTHORIZED);
        assert_eq!(body_json(res).await["message"], "Invalid token");

        let now = crate::token::now_secs();
        let expired = jsonwebtoken::encode(
            &jsonwebtoken::Header::default(),
            &crate::token::Claims { sub: user.id, email: user.email, role: Role::User, iat: now - 7200, exp: now - 3600 },
            &jsonwebtoken::EncodingKey::from_secret(ACCESS_SECRET.as_bytes()),
        )
        .unwrap();
        let res = app.oneshot(authed_get("/api/auth/me", &expired)).await.unwrap();
        assert_eq!(res.status(), StatusCode::UNAUTHORIZED);
        assert_eq!(body_json(res).await["message"], "Token expired");
    }

    #[tokio::test]
    async fn test_wrong_method_is_wrapped() {
        let (app, _) = setup_app();

        let res = app.oneshot(get("/api/auth/login")).await.unwrap();

        assert_eq!(res.status(), StatusCode::METHOD_NOT_ALLOWED);
        let body = body_json(res).await;
        assert_eq!(body["success"], false);
        assert!(body["requestId"].is_string());
    }

    #[tokio::test]
    async fn test_rejections_are_counted() {
        let (app, state) = setup_app();

        let req = Request::builder().uri("/health").header(header::ORIGIN, "https://evil.example").body(Body::empty()).unwrap();
        app.clone().oneshot(req).await.unwrap();
        app.oneshot(get("/health")).await.unwrap();

        let snapshot = state.metrics.get_snapshot();
        assert_eq!(snapshot.requests_total, 2);
        assert_eq!(snapshot.requests_rejected, 1);
    }
}
