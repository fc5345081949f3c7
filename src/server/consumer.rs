//! Message consumer front end.
//!
//! In [`ConsumerMode::Kafka`] every delivery is routed by its topic; in
//! [`ConsumerMode::Amqp`] by the queue the consumer is bound to. Broker
//! clients plug in through [`DeliverySource`].

use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use http::{HeaderMap, HeaderName, HeaderValue};
use tokio::{
    sync::{mpsc, oneshot, Mutex, RwLock, Semaphore},
    task::JoinHandle,
};
use tracing::{debug, info, warn};

use crate::{
    config::{concurrency_limit, ConsumerConfig},
    constants::server as server_constants,
    context::{Context, Request},
    errors::{FrameworkError, Result},
    handler::Handler,
    middleware::MiddlewareRegistry,
    router::Router,
    server::{dispatch, ServerStats},
    utils::logging::{log_route_registered, log_startup},
};

const DEFAULT_BASE_MIDDLEWARE: &str = "timing";

/// Outcome of one delivery, sent back as the acknowledgement.
#[derive(Debug, Clone, PartialEq)]
pub struct Reply {
    pub status: u16,
    pub headers: HeaderMap,
    pub body: Bytes,
}

/// One inbound message.
#[derive(Debug)]
pub struct Delivery {
    pub topic: String,
    pub headers: HeaderMap,
    pub payload: Bytes,
    pub source: Option<String>,
    pub reply: Option<oneshot::Sender<Reply>>,
}

impl Delivery {
    pub fn new(topic: impl Into<String>, payload: impl Into<Bytes>) -> Self {
        Self {
            topic: topic.into(),
            headers: HeaderMap::new(),
            payload: payload.into(),
            source: None,
            reply: None,
        }
    }

    #[must_use]
    pub fn with_header(mut self, name: &str, value: &str) -> Self {
        match (HeaderName::try_from(name), HeaderValue::from_str(value)) {
            (Ok(name), Ok(value)) => {
                self.headers.insert(name, value);
            }
            _ => warn!(header = %name, "Skipping invalid delivery header"),
        }
        self
    }

    #[must_use]
    pub fn with_source(mut self, source: impl Into<String>) -> Self {
        self.source = Some(source.into());
        self
    }

    /// Attaches a reply channel and returns its receiving end.
    pub fn with_reply(mut self) -> (Self, oneshot::Receiver<Reply>) {
        let (tx, rx) = oneshot::channel();
        self.reply = Some(tx);
        (self, rx)
    }
}

/// Where deliveries come from. `None` means the source is exhausted.
#[async_trait]
pub trait DeliverySource: Send {
    async fn recv(&mut self) -> Option<Delivery>;
}

/// A [`DeliverySource`] fed through a tokio channel.
pub struct ChannelSource {
    rx: mpsc::Receiver<Delivery>,
}

impl ChannelSource {
    pub fn new(rx: mpsc::Receiver<Delivery>) -> Self {
        Self { rx }
    }

    pub fn channel(buffer: usize) -> (mpsc::Sender<Delivery>, Self) {
        let (tx, rx) = mpsc::channel(buffer.max(1));
        (tx, Self::new(rx))
    }
}

#[async_trait]
impl DeliverySource for ChannelSource {
    async fn recv(&mut self) -> Option<Delivery> {
        self.rx.recv().await
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConsumerMode {
    Kafka,
    Amqp { queue: String },
}

impl ConsumerMode {
    fn method(&self) -> &'static str {
        match self {
            ConsumerMode::Kafka => server_constants::KAFKA_METHOD,
            ConsumerMode::Amqp { .. } => server_constants::AMQP_METHOD,
        }
    }

    fn route_key<'a>(&'a self, delivery: &'a Delivery) -> &'a str {
        match self {
            ConsumerMode::Kafka => &delivery.topic,
            ConsumerMode::Amqp { queue } => queue,
        }
    }
}

#[derive(Clone)]
struct Worker {
    name: Arc<str>,
    mode: ConsumerMode,
    router: Arc<RwLock<Router>>,
    stats: Arc<ServerStats>,
}

impl Worker {
    async fn process(&self, mut delivery: Delivery) -> Reply {
        let key = self.mode.route_key(&delivery).to_string();
        let reply_to = delivery.reply.take();

        let mut request = Request::new(self.mode.method(), key.as_str()).with_body(delivery.payload);
        request.headers = delivery.headers;
        request.remote_addr = delivery.source;

        let route = self.router.read().await.find(&key);
        let ctx = dispatch(route, Context::new(request)).await;

        let (status, headers, body) = ctx.into_response().into_parts();
        self.stats.record(status);
        debug!(consumer = %self.name, route = %key, status, "Delivery handled");

        let reply = Reply { status, headers, body };
        if let Some(reply_to) = reply_to {
            // Receiver gone means nobody waits for the ack
            let _ = reply_to.send(reply.clone());
        }
        reply
    }
}

struct Running {
    shutdown: oneshot::Sender<()>,
    task: JoinHandle<()>,
}

pub struct ConsumerServer {
    limit: u32,
    worker: Worker,
    permits: Arc<Semaphore>,
    running: Mutex<Option<Running>>,
}

impl ConsumerServer {
    pub fn kafka(config: ConsumerConfig, registry: Arc<MiddlewareRegistry>) -> Result<Self> {
        Self::new(config, ConsumerMode::Kafka, registry)
    }

    pub fn amqp(config: ConsumerConfig, registry: Arc<MiddlewareRegistry>) -> Result<Self> {
        let queue = config
            .queue
            .clone()
            .filter(|queue| !queue.is_empty())
            .ok_or_else(|| FrameworkError::Config(format!("amqp consumer '{}' requires a queue", config.name)))?;
        Self::new(config, ConsumerMode::Amqp { queue }, registry)
    }

    /// Without an explicit base chain the consumer wraps every route in
    /// `timing`, when such a middleware is registered.
    pub fn new(config: ConsumerConfig, mode: ConsumerMode, registry: Arc<MiddlewareRegistry>) -> Result<Self> {
        let base = match config.base_middleware {
            Some(names) => names,
            None if registry.contains(DEFAULT_BASE_MIDDLEWARE) => vec![DEFAULT_BASE_MIDDLEWARE.to_string()],
            None => Vec::new(),
        };
        let limit = concurrency_limit(&config.name, "limit_message_count", config.limit_message_count)?;
        let router = Router::new(registry).with_base_chain(base.as_slice())?;

        Ok(Self {
            limit,
            worker: Worker {
                name: Arc::from(config.name.as_str()),
                mode,
                router: Arc::new(RwLock::new(router)),
                stats: Arc::new(ServerStats::default()),
            },
            permits: Arc::new(Semaphore::new(limit as usize)),
            running: Mutex::new(None),
        })
    }

    pub fn name(&self) -> &str {
        &self.worker.name
    }

    pub fn mode(&self) -> &ConsumerMode {
        &self.worker.mode
    }

    pub fn stats(&self) -> &ServerStats {
        &self.worker.stats
    }

    /// Registers a handler for a topic (Kafka mode) or the queue name (AMQP
    /// mode). `*` catches anything unrouted.
    pub async fn push_route<S: AsRef<str>>(&self, topic: &str, handler: Handler, middleware: &[S]) -> Result<()> {
        self.worker.router.write().await.push_route(topic, handler, middleware)?;
        log_route_registered(&self.worker.name, self.worker.mode.method(), topic);
        Ok(())
    }

    /// Handles one delivery on the caller's task.
    pub async fn handle(&self, delivery: Delivery) -> Reply {
        self.worker.process(delivery).await
    }

    /// Consumes `source` in the background. Each delivery runs on its own
    /// task; at most `limit_message_count` run at once and a slot is taken
    /// before the next delivery is read.
    pub async fn start<S: DeliverySource + 'static>(&self, mut source: S) -> Result<()> {
        let mut running = self.running.lock().await;
        if running.is_some() {
            return Err(FrameworkError::Server(format!("{} is already running", self.worker.name)));
        }

        let (shutdown, mut signal) = oneshot::channel::<()>();
        let permits = self.permits.clone();
        let worker = self.worker.clone();

        let task = tokio::spawn(async move {
            loop {
                let permit = tokio::select! {
                    _ = &mut signal => break,
                    permit = permits.clone().acquire_owned() => match permit {
                        Ok(permit) => permit,
                        Err(_) => break,
                    },
                };

                let delivery = tokio::select! {
                    _ = &mut signal => break,
                    delivery = source.recv() => match delivery {
                        Some(delivery) => delivery,
                        None => break,
                    },
                };

                let worker = worker.clone();
                tokio::spawn(async move {
                    worker.process(delivery).await;
                    drop(permit);
                });
            }
            info!(consumer = %worker.name, "Consumer loop finished");
        });

        *running = Some(Running { shutdown, task });
        log_startup(&self.worker.name, "consuming", None);
        Ok(())
    }

    /// Stops reading new deliveries and waits for the in-flight ones.
    pub async fn stop(&self) {
        if let Some(running) = self.running.lock().await.take() {
            let _ = running.shutdown.send(());
            if let Err(e) = running.task.await {
                warn!(consumer = %self.worker.name, error = %e, "Consumer loop ended abnormally");
            }
        }

        // Every slot free means no delivery is still being handled
        match self.permits.acquire_many(self.limit).await {
            Ok(_all) => info!(consumer = %self.worker.name, "Consumer stopped"),
            Err(e) => warn!(consumer = %self.worker.name, error = %e, "Consumer slots closed"),
        }
    }
}
