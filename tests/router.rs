use std::sync::{Arc, Mutex};

use servekit::{
    handler_fn, Context, FrameworkError, Handler, Middleware, MiddlewareRegistry, Request, Router,
};

/// Writes its tag into the response body so tests can tell handlers apart.
fn tagged(tag: &'static str) -> Handler {
    handler_fn(move |mut ctx: Context| async move {
        ctx.response_mut().set_body(tag);
        ctx
    })
}

async fn call(router: &Router, path: &str) -> Option<(String, Context)> {
    let found = router.find(path)?;
    let mut ctx = Context::new(Request::new("GET", path));
    ctx.set_params(found.params);
    let ctx = (found.handler)(ctx).await;
    Some((ctx.response().body_string().unwrap_or_default(), ctx))
}

fn router() -> Router {
    Router::new(Arc::new(MiddlewareRegistry::new()))
}

#[tokio::test]
async fn test_prefix_sharing_routes_keep_their_siblings() {
    let mut router = router();
    router.push_route::<&str>("/api/{v}/users", tagged("users"), &[]).unwrap();
    router.push_route::<&str>("/api/{v}/orders", tagged("orders"), &[]).unwrap();
    router.push_route::<&str>("/api/{v}/users/profile", tagged("profile"), &[]).unwrap();

    let (body, ctx) = call(&router, "/api/v1/users").await.unwrap();
    assert_eq!(body, "users");
    assert_eq!(ctx.param("v"), Some("v1"));

    let (body, ctx) = call(&router, "/api/v2/orders").await.unwrap();
    assert_eq!(body, "orders");
    assert_eq!(ctx.param("v"), Some("v2"));

    let (body, ctx) = call(&router, "/api/v3/users/profile").await.unwrap();
    assert_eq!(body, "profile");
    assert_eq!(ctx.param("v"), Some("v3"));

    assert_eq!(router.route_count(), 3);
}

#[tokio::test]
async fn test_static_siblings_survive_later_registrations() {
    let mut router = router();
    router.push_route::<&str>("/shop/{id}/cart", tagged("cart"), &[]).unwrap();
    router.push_route::<&str>("/shop/{id}/cart/items", tagged("items"), &[]).unwrap();
    router.push_route::<&str>("/shop/{id}/wishlist", tagged("wishlist"), &[]).unwrap();

    assert_eq!(call(&router, "/shop/1/cart").await.unwrap().0, "cart");
    assert_eq!(call(&router, "/shop/1/cart/items").await.unwrap().0, "items");
    assert_eq!(call(&router, "/shop/1/wishlist").await.unwrap().0, "wishlist");
}

#[tokio::test]
async fn test_trailing_slash_is_ignored() {
    let mut router = router();
    router.push_route::<&str>("/users", tagged("list"), &[]).unwrap();
    router.push_route::<&str>("/users/{id}/", tagged("one"), &[]).unwrap();

    for path in ["/users", "/users/"] {
        assert_eq!(call(&router, path).await.unwrap().0, "list");
    }
    for path in ["/users/7", "/users/7/"] {
        let (body, ctx) = call(&router, path).await.unwrap();
        assert_eq!(body, "one");
        assert_eq!(ctx.param("id"), Some("7"));
    }
}

#[tokio::test]
async fn test_static_beats_dynamic() {
    let mut router = router();
    router.push_route::<&str>("/users/{id}", tagged("dynamic"), &[]).unwrap();
    router.push_route::<&str>("/users/me", tagged("static"), &[]).unwrap();

    let (body, ctx) = call(&router, "/users/me").await.unwrap();
    assert_eq!(body, "static");
    assert!(ctx.params().is_empty());
    assert_eq!(call(&router, "/users/42").await.unwrap().0, "dynamic");
}

#[tokio::test]
async fn test_wildcard_only_when_registered() {
    let mut router = router();
    router.push_route::<&str>("/test/{name}", tagged("named"), &[]).unwrap();
    assert!(router.find("/nowhere").is_none());

    router.push_route::<&str>("*", tagged("fallback"), &[]).unwrap();
    let (body, ctx) = call(&router, "/nowhere").await.unwrap();
    assert_eq!(body, "fallback");
    assert!(ctx.params().is_empty());

    let (body, ctx) = call(&router, "/test/alex").await.unwrap();
    assert_eq!(body, "named");
    assert_eq!(ctx.param("name"), Some("alex"));
}

#[tokio::test]
async fn test_exact_duplicate_static_route_replaces() {
    let mut router = router();
    router.push_route::<&str>("/ping", tagged("old"), &[]).unwrap();
    router.push_route::<&str>("/ping/", tagged("new"), &[]).unwrap();

    assert_eq!(call(&router, "/ping").await.unwrap().0, "new");
    assert_eq!(router.route_count(), 1);
}

struct Trace {
    name: &'static str,
    log: Arc<Mutex<Vec<String>>>,
}

impl Middleware for Trace {
    fn name(&self) -> &str {
        self.name
    }

    fn invoke(&self, next: Handler) -> Handler {
        let name = self.name;
        let log = self.log.clone();
        handler_fn(move |ctx: Context| {
            let next = next.clone();
            let log = log.clone();
            async move {
                log.lock().unwrap().push(format!("{} in", name));
                let ctx = next(ctx).await;
                log.lock().unwrap().push(format!("{} out", name));
                ctx
            }
        })
    }
}

fn traced_registry(log: &Arc<Mutex<Vec<String>>>) -> Arc<MiddlewareRegistry> {
    let mut registry = MiddlewareRegistry::new();
    for name in ["base", "m0", "m1"] {
        registry.register(name, Arc::new(Trace { name, log: log.clone() }));
    }
    Arc::new(registry)
}

#[tokio::test]
async fn test_base_chain_wraps_route_chain() {
    let log = Arc::new(Mutex::new(Vec::new()));
    let mut router = Router::new(traced_registry(&log)).with_base_chain(&["base"]).unwrap();

    let handler_log = log.clone();
    let handler = handler_fn(move |ctx: Context| {
        let handler_log = handler_log.clone();
        async move {
            handler_log.lock().unwrap().push("handler".to_string());
            ctx
        }
    });
    router.push_route("/orders", handler, &["m0", "m1"]).unwrap();

    call(&router, "/orders").await.unwrap();
    assert_eq!(
        *log.lock().unwrap(),
        vec!["base in", "m0 in", "m1 in", "handler", "m1 out", "m0 out", "base out"]
    );
}

#[tokio::test]
async fn test_unknown_middleware_fails_without_side_effects() {
    let log = Arc::new(Mutex::new(Vec::new()));
    let mut router = Router::new(traced_registry(&log));

    let err = router
        .push_route("/orders", tagged("orders"), &["m0", "auth"])
        .unwrap_err();
    assert!(matches!(&err, FrameworkError::MiddlewareNotFound(name) if name == "auth"));
    assert!(router.find("/orders").is_none());
    assert_eq!(router.route_count(), 0);

    assert!(Router::new(traced_registry(&log)).with_base_chain(&["nope"]).is_err());
}

#[tokio::test]
async fn test_repeated_parameter_name_is_rejected() {
    let mut router = router();
    let err = router
        .push_route::<&str>("/teams/{id}/members/{id}", tagged("members"), &[])
        .unwrap_err();
    assert!(matches!(err, FrameworkError::InvalidRoute(_)));
    assert_eq!(router.route_count(), 0);
}

#[tokio::test]
async fn test_leading_slash_is_optional_for_both_stores() {
    let mut router = router();
    router.push_route::<&str>("users", tagged("users"), &[]).unwrap();
    router.push_route::<&str>("items/{id}", tagged("item"), &[]).unwrap();

    for path in ["users", "/users", "users/", "/users/"] {
        assert_eq!(call(&router, path).await.unwrap().0, "users", "lookup of {}", path);
    }
    for path in ["items/1", "/items/1", "/items/1/"] {
        let (body, ctx) = call(&router, path).await.unwrap();
        assert_eq!(body, "item", "lookup of {}", path);
        assert_eq!(ctx.param("id"), Some("1"));
    }
}
