//! HTTP front end on axum.
//!
//! axum only supplies the listener, connection info and tracing layers; every
//! request lands in one fallback handler that hands it to the
//! [`MethodRouter`].

use std::{borrow::Cow, net::SocketAddr, sync::Arc};

use axum::{
    body::Body,
    extract::{Request, State},
    http::{header::CONTENT_TYPE, HeaderValue, StatusCode},
    middleware::{from_fn, Next},
    response::Response,
};
use axum_client_ip::{ClientIp, ClientIpSource};
use http_body_util::BodyExt;
use percent_encoding::percent_decode_str;
use tokio::{
    net::TcpListener,
    sync::{oneshot, Mutex, RwLock, Semaphore},
    task::JoinHandle,
};
use tower_http::trace::TraceLayer;
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::{
    config::{concurrency_limit, HttpConfig},
    constants::{headers, server as server_constants},
    context::{self, Context},
    errors::{FrameworkError, Rejection, Result},
    handler::Handler,
    middleware::MiddlewareRegistry,
    router::MethodRouter,
    server::{dispatch, ServerStats},
    utils::logging::{log_route_registered, log_startup},
};

#[derive(Clone)]
struct HttpState {
    router: Arc<RwLock<MethodRouter>>,
    limiter: Arc<Semaphore>,
    stats: Arc<ServerStats>,
}

struct Running {
    shutdown: oneshot::Sender<()>,
    task: JoinHandle<()>,
}

pub struct HttpServer {
    config: HttpConfig,
    state: HttpState,
    running: Mutex<Option<Running>>,
}

impl HttpServer {
    /// Fails when the configured base chain names an unknown middleware.
    pub fn new(config: HttpConfig, registry: Arc<MiddlewareRegistry>) -> Result<Self> {
        let router = MethodRouter::new(registry).with_base_chain(config.base_middleware.as_slice())?;
        let permits = concurrency_limit(&config.name, "max_in_flight", config.max_in_flight)?;
        let limiter = Arc::new(Semaphore::new(permits as usize));

        Ok(Self {
            config,
            state: HttpState {
                router: Arc::new(RwLock::new(router)),
                limiter,
                stats: Arc::new(ServerStats::default()),
            },
            running: Mutex::new(None),
        })
    }

    pub fn name(&self) -> &str {
        &self.config.name
    }

    pub fn stats(&self) -> &ServerStats {
        &self.state.stats
    }

    pub async fn push_route<S: AsRef<str>>(
        &self,
        method: &str,
        path: &str,
        handler: Handler,
        middleware: &[S],
    ) -> Result<()> {
        self.state
            .router
            .write()
            .await
            .push_route(method, path, handler, middleware)?;
        log_route_registered(&self.config.name, method, path);
        Ok(())
    }

    pub async fn route_count(&self) -> usize {
        self.state.router.read().await.route_count()
    }

    /// The axum application serving this front end. Needs
    /// `into_make_service_with_connect_info::<SocketAddr>()` for client
    /// addresses.
    pub fn app(&self) -> axum::Router {
        axum::Router::new()
            .fallback(serve)
            .with_state(self.state.clone())
            .layer(ClientIpSource::ConnectInfo.into_extension())
            .layer(TraceLayer::new_for_http().make_span_with(|request: &Request<_>| {
                let request_id = request
                    .headers()
                    .get(headers::REQUEST_ID)
                    .and_then(|value| value.to_str().ok())
                    .unwrap_or("unknown");

                tracing::info_span!(
                    "request",
                    id = %request_id,
                    method = %request.method(),
                    uri = %request.uri(),
                )
            }))
            .layer(from_fn(request_id_layer))
    }

    /// Binds the configured address and serves in the background. Returns
    /// the bound address (useful with port 0).
    pub async fn start(&self) -> Result<SocketAddr> {
        let mut running = self.running.lock().await;
        if running.is_some() {
            return Err(FrameworkError::Server(format!("{} is already running", self.config.name)));
        }

        let listener = TcpListener::bind(&self.config.addr).await?;
        let addr = listener.local_addr()?;
        let app = self.app();
        let name = self.config.name.clone();
        let (shutdown, signal) = oneshot::channel::<()>();

        let task = tokio::spawn(async move {
            let served = axum::serve(listener, app.into_make_service_with_connect_info::<SocketAddr>())
                .with_graceful_shutdown(async {
                    let _ = signal.await;
                })
                .await;
            if let Err(e) = served {
                error!(server = %name, error = %e, "HTTP server failed");
            }
        });

        *running = Some(Running { shutdown, task });
        log_startup(&self.config.name, "listening", Some(addr.to_string().as_str()));
        Ok(addr)
    }

    /// Stops accepting connections and waits for in-flight requests.
    pub async fn stop(&self) {
        let Some(running) = self.running.lock().await.take() else {
            return;
        };

        let _ = running.shutdown.send(());
        if let Err(e) = running.task.await {
            warn!(server = %self.config.name, error = %e, "HTTP server task ended abnormally");
        }
        info!(server = %self.config.name, "HTTP server stopped");
    }
}

async fn request_id_layer(mut request: Request, next: Next) -> Response {
    let request_id = request
        .headers()
        .get(headers::REQUEST_ID)
        .cloned()
        .or_else(|| HeaderValue::from_str(&Uuid::new_v4().to_string()).ok());

    if let Some(id) = &request_id {
        request.headers_mut().insert(headers::REQUEST_ID, id.clone());
    }

    let mut response = next.run(request).await;
    if let Some(id) = request_id {
        response.headers_mut().insert(headers::REQUEST_ID, id);
    }
    response
}

async fn serve(State(state): State<HttpState>, ClientIp(client_ip): ClientIp, request: Request) -> Response {
    // Held until the reply is built, whatever path we leave by
    let Ok(_permit) = state.limiter.clone().acquire_owned().await else {
        return reply(&state.stats, Rejection::Unavailable);
    };

    let (parts, body) = request.into_parts();
    let body = match body.collect().await {
        Ok(collected) => collected.to_bytes(),
        Err(e) => {
            warn!(error = %e, "Failed to read request body");
            return plain(&state.stats, StatusCode::BAD_REQUEST, Body::empty());
        }
    };

    let path = decoded_path(parts.uri.path());
    let mut inbound = context::Request::new(parts.method.as_str(), path.to_string())
        .with_body(body)
        .with_remote_addr(client_ip.to_string());
    inbound.headers = parts.headers;

    let route = state.router.read().await.find(parts.method.as_str(), &path);
    let found = route.is_some();
    let ctx = dispatch(route, Context::new(inbound)).await;

    let (status, mut response_headers, body) = ctx.into_response().into_parts();
    if found && !response_headers.contains_key(CONTENT_TYPE) {
        response_headers.insert(CONTENT_TYPE, HeaderValue::from_static(server_constants::DEFAULT_CONTENT_TYPE));
    }
    let status = if status == 200 && body.is_empty() { 204 } else { status };

    state.stats.record(status);
    let mut response = Response::new(Body::from(body));
    *response.status_mut() = StatusCode::from_u16(status).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
    *response.headers_mut() = response_headers;
    response
}

/// Percent-decoded request path. Paths that do not decode to UTF-8 are
/// routed as received.
fn decoded_path(raw: &str) -> Cow<'_, str> {
    percent_decode_str(raw)
        .decode_utf8()
        .unwrap_or(Cow::Borrowed(raw))
}

fn reply(stats: &ServerStats, rejection: Rejection) -> Response {
    let mut response = context::Response::default();
    rejection.write_to(&mut response);
    let status = StatusCode::from_u16(response.status()).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
    let (_, _, body) = response.into_parts();
    plain(stats, status, Body::from(body))
}

fn plain(stats: &ServerStats, status: StatusCode, body: Body) -> Response {
    stats.record(status.as_u16());
    let mut response = Response::new(body);
    *response.status_mut() = status;
    response
}
