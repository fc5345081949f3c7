use std::{sync::Arc, time::Duration};

use anyhow::Result;
use jsonwebtoken::{encode, EncodingKey, Header};
use reqwest::StatusCode;
use serde_json::{json, Value};
use servekit::{
    config::{HttpConfig, KeyStrategy},
    features::auth::JwtVerifier,
    handler_fn,
    middleware::{
        auth::JwtMiddleware,
        rate_limiter::{RateLimitMiddleware, RateLimitSettings},
        restore::RestoreMiddleware,
        timeout::TimeoutMiddleware,
    },
    server::HttpServer,
    Context, Handler, MiddlewareRegistry,
};

const SECRET: &str = "http-test-secret";

fn registry() -> Arc<MiddlewareRegistry> {
    let mut registry = MiddlewareRegistry::new();
    registry.register("restore", Arc::new(RestoreMiddleware::new("restore")));
    registry.register(
        "timeout",
        Arc::new(TimeoutMiddleware::new("timeout", Duration::from_millis(50))),
    );
    registry.register(
        "rate_limit",
        Arc::new(RateLimitMiddleware::new(
            "rate_limit",
            RateLimitSettings::new(2, Duration::from_secs(60)).with_key_strategy(KeyStrategy::Global),
        )),
    );
    registry.register(
        "jwt",
        Arc::new(JwtMiddleware::new("jwt", JwtVerifier::hs256(SECRET.as_bytes()), "claims")),
    );
    Arc::new(registry)
}

fn text(body: &'static str) -> Handler {
    handler_fn(move |mut ctx: Context| async move {
        ctx.response_mut().set_body(body);
        ctx
    })
}

async fn start_server() -> Result<(HttpServer, String)> {
    let config = HttpConfig {
        addr: "127.0.0.1:0".to_string(),
        base_middleware: vec!["restore".to_string()],
        ..HttpConfig::default()
    };
    let server = HttpServer::new(config, registry())?;

    let greet = handler_fn(|mut ctx: Context| async move {
        let name = ctx.param("name").unwrap_or_default().to_string();
        ctx.response_mut().set_body(json!({ "hello": name }).to_string());
        ctx
    });
    let explode = handler_fn(|ctx: Context| async move {
        if ctx.request().path.starts_with("/explode") {
            panic!("handler blew up");
        }
        ctx
    });
    let slow = handler_fn(|mut ctx: Context| async move {
        tokio::time::sleep(Duration::from_millis(500)).await;
        ctx.response_mut().set_body("late");
        ctx
    });
    let whoami = handler_fn(|mut ctx: Context| async move {
        let sub = ctx
            .get::<Value>("claims")
            .and_then(|claims| claims.get("sub"))
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string();
        ctx.response_mut().set_body(sub);
        ctx
    });
    let empty = handler_fn(|ctx: Context| async move { ctx });
    let typed = handler_fn(|mut ctx: Context| async move {
        ctx.response_mut().set_header_str("content-type", "text/plain");
        ctx.response_mut().set_body("plain");
        ctx
    });

    server.push_route::<&str>("GET", "/test/{name}", greet, &[]).await?;
    server.push_route::<&str>("GET", "*", text("fallback"), &[]).await?;
    server.push_route::<&str>("GET", "/explode", explode, &[]).await?;
    server.push_route("GET", "/slow", slow, &["timeout"]).await?;
    server.push_route("GET", "/limited", text("ok"), &["rate_limit"]).await?;
    server.push_route("GET", "/me", whoami, &["jwt"]).await?;
    server.push_route::<&str>("DELETE", "/items/{id}", empty, &[]).await?;
    server.push_route::<&str>("GET", "/plain", typed, &[]).await?;

    let addr = server.start().await?;
    Ok((server, format!("http://{}", addr)))
}

#[tokio::test]
async fn test_routes_params_and_wildcard() -> Result<()> {
    let (server, base) = start_server().await?;
    let client = reqwest::Client::new();

    let resp = client.get(format!("{}/test/alex", base)).send().await?;
    assert_eq!(resp.status(), StatusCode::OK);
    assert_eq!(
        resp.headers().get("content-type").unwrap(),
        "application/json; charset=utf-8"
    );
    let body: Value = resp.json().await?;
    assert_eq!(body, json!({ "hello": "alex" }));

    let resp = client.get(format!("{}/test/alex/", base)).send().await?;
    assert_eq!(resp.status(), StatusCode::OK);

    // Parameters are bound from the decoded path
    let resp = client.get(format!("{}/test/al%20ex", base)).send().await?;
    assert_eq!(resp.status(), StatusCode::OK);
    let body: Value = resp.json().await?;
    assert_eq!(body, json!({ "hello": "al ex" }));

    let resp = client.get(format!("{}/nowhere", base)).send().await?;
    assert_eq!(resp.status(), StatusCode::OK);
    assert_eq!(resp.text().await?, "fallback");

    // No POST routes at all
    let resp = client.post(format!("{}/test/alex", base)).send().await?;
    assert_eq!(resp.status(), StatusCode::NOT_FOUND);

    server.stop().await;
    Ok(())
}

#[tokio::test]
async fn test_response_mapping() -> Result<()> {
    let (server, base) = start_server().await?;
    let client = reqwest::Client::new();

    let resp = client.delete(format!("{}/items/3", base)).send().await?;
    assert_eq!(resp.status(), StatusCode::NO_CONTENT);

    let resp = client.get(format!("{}/plain", base)).send().await?;
    assert_eq!(resp.headers().get("content-type").unwrap(), "text/plain");
    assert_eq!(resp.text().await?, "plain");

    let resp = client
        .get(format!("{}/plain", base))
        .header("x-request-id", "req-42")
        .send()
        .await?;
    assert_eq!(resp.headers().get("x-request-id").unwrap(), "req-42");

    let resp = client.get(format!("{}/plain", base)).send().await?;
    assert!(resp.headers().contains_key("x-request-id"));

    server.stop().await;
    Ok(())
}

#[tokio::test]
async fn test_middleware_rejections() -> Result<()> {
    let (server, base) = start_server().await?;
    let client = reqwest::Client::new();

    let resp = client.get(format!("{}/explode", base)).send().await?;
    assert_eq!(resp.status(), StatusCode::INTERNAL_SERVER_ERROR);
    assert_eq!(resp.text().await?, "unknown server error");

    let resp = client.get(format!("{}/slow", base)).send().await?;
    assert_eq!(resp.status().as_u16(), 499);

    for _ in 0..2 {
        let resp = client.get(format!("{}/limited", base)).send().await?;
        assert_eq!(resp.status(), StatusCode::OK);
    }
    let resp = client.get(format!("{}/limited", base)).send().await?;
    assert_eq!(resp.status(), StatusCode::TOO_MANY_REQUESTS);
    assert!(resp.headers().contains_key("retry-after"));

    // Still serving after a panic
    let resp = client.get(format!("{}/test/again", base)).send().await?;
    assert_eq!(resp.status(), StatusCode::OK);

    assert!(server.stats().handled() >= 6);
    assert!(server.stats().failed() >= 3);

    server.stop().await;
    Ok(())
}

#[tokio::test]
async fn test_jwt_protected_route() -> Result<()> {
    let (server, base) = start_server().await?;
    let client = reqwest::Client::new();

    let resp = client.get(format!("{}/me", base)).send().await?;
    assert_eq!(resp.status(), StatusCode::UNAUTHORIZED);
    assert_eq!(resp.text().await?, "Authorization header is missing");

    let claims = json!({
        "sub": "alice",
        "exp": chrono::Utc::now().timestamp() + 3600,
    });
    let token = encode(&Header::default(), &claims, &EncodingKey::from_secret(SECRET.as_bytes()))?;

    let resp = client.get(format!("{}/me", base)).bearer_auth(&token).send().await?;
    assert_eq!(resp.status(), StatusCode::OK);
    assert_eq!(resp.text().await?, "alice");

    let resp = client.get(format!("{}/me", base)).bearer_auth("not-a-token").send().await?;
    assert_eq!(resp.status(), StatusCode::UNAUTHORIZED);

    server.stop().await;
    Ok(())
}

#[tokio::test]
async fn test_double_start_fails() -> Result<()> {
    let (server, _base) = start_server().await?;
    assert!(server.start().await.is_err());
    assert_eq!(server.route_count().await, 8);
    server.stop().await;
    Ok(())
}
