//! Per-call context shared by every transport front end.
//!
//! A [`Context`] carries the inbound message (method or transport tag,
//! path or topic, headers, body, remote source), the mutable outbound
//! [`Response`], the parameters captured by the router and a small bag of
//! user values that middleware and handlers use to pass data to each other.

use std::{any::Any, collections::HashMap, fmt, sync::Arc};

use bytes::Bytes;
use http::{HeaderMap, HeaderName, HeaderValue};
use tracing::warn;

/// Route parameters captured from dynamic `{name}` segments.
pub type Params = HashMap<String, String>;

/// An inbound unit of work, adapted from an HTTP request, a consumer record
/// or a queue delivery.
#[derive(Debug, Clone, Default)]
pub struct Request {
    /// HTTP method, or a transport tag such as `KAFKA` for consumers.
    pub method: String,
    /// Request path or topic / queue name.
    pub path: String,
    pub headers: HeaderMap,
    pub body: Bytes,
    /// Remote source identifier (client address, broker, ...).
    pub remote_addr: Option<String>,
}

impl Request {
    pub fn new(method: impl Into<String>, path: impl Into<String>) -> Self {
        Self {
            method: method.into(),
            path: path.into(),
            ..Self::default()
        }
    }

    /// Adds a header. Names or values that are not valid header text are
    /// skipped.
    #[must_use]
    pub fn with_header(mut self, name: &str, value: &str) -> Self {
        insert_header(&mut self.headers, name, value);
        self
    }

    #[must_use]
    pub fn with_body(mut self, body: impl Into<Bytes>) -> Self {
        self.body = body.into();
        self
    }

    #[must_use]
    pub fn with_remote_addr(mut self, addr: impl Into<String>) -> Self {
        self.remote_addr = Some(addr.into());
        self
    }

    /// Case-insensitive header lookup.
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(name).and_then(|value| value.to_str().ok())
    }
}

/// The mutable outbound side of a call.
#[derive(Debug, Clone)]
pub struct Response {
    status: u16,
    headers: HeaderMap,
    body: Bytes,
}

impl Default for Response {
    fn default() -> Self {
        Self {
            status: 200,
            headers: HeaderMap::new(),
            body: Bytes::new(),
        }
    }
}

impl Response {
    pub fn status(&self) -> u16 {
        self.status
    }

    pub fn set_status(&mut self, status: u16) {
        self.status = status;
    }

    pub fn body(&self) -> &Bytes {
        &self.body
    }

    pub fn set_body(&mut self, body: impl Into<Bytes>) {
        self.body = body.into();
    }

    pub fn body_string(&self) -> Option<String> {
        String::from_utf8(self.body.to_vec()).ok()
    }

    pub fn headers(&self) -> &HeaderMap {
        &self.headers
    }

    pub fn headers_mut(&mut self) -> &mut HeaderMap {
        &mut self.headers
    }

    pub fn set_header(&mut self, name: HeaderName, value: HeaderValue) {
        self.headers.insert(name, value);
    }

    /// Sets a header from plain strings, returning false when either part is
    /// not valid header text.
    pub fn set_header_str(&mut self, name: &str, value: &str) -> bool {
        insert_header(&mut self.headers, name, value)
    }

    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(name).and_then(|value| value.to_str().ok())
    }

    pub fn into_parts(self) -> (u16, HeaderMap, Bytes) {
        (self.status, self.headers, self.body)
    }

    /// Resets the response to a fresh 200 with no headers and no body.
    pub fn clear(&mut self) {
        *self = Self::default();
    }
}

/// Per-call state handed through the middleware chain to the handler.
///
/// Cloning is cheap: the request is shared and user values are reference
/// counted. Middleware that may abandon a call (timeout, restore) keep a
/// clone to answer from.
#[derive(Clone)]
pub struct Context {
    request: Arc<Request>,
    response: Response,
    params: Params,
    values: HashMap<String, Arc<dyn Any + Send + Sync>>,
}

impl Context {
    pub fn new(request: Request) -> Self {
        Self {
            request: Arc::new(request),
            response: Response::default(),
            params: Params::new(),
            values: HashMap::new(),
        }
    }

    pub fn request(&self) -> &Request {
        &self.request
    }

    pub fn response(&self) -> &Response {
        &self.response
    }

    pub fn response_mut(&mut self) -> &mut Response {
        &mut self.response
    }

    pub fn into_response(self) -> Response {
        self.response
    }

    pub fn params(&self) -> &Params {
        &self.params
    }

    /// Value bound to a dynamic segment of the matched route.
    pub fn param(&self, name: &str) -> Option<&str> {
        self.params.get(name).map(String::as_str)
    }

    pub fn set_params(&mut self, params: Params) {
        self.params = params;
    }

    pub fn set<T: Any + Send + Sync>(&mut self, key: impl Into<String>, value: T) {
        self.values.insert(key.into(), Arc::new(value));
    }

    /// Typed lookup in the user value bag. `None` when the key is absent or
    /// holds a value of another type.
    pub fn get<T: Any>(&self, key: &str) -> Option<&T> {
        self.values.get(key)?.downcast_ref::<T>()
    }

    pub fn contains(&self, key: &str) -> bool {
        self.values.contains_key(key)
    }
}

impl fmt::Debug for Context {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Context")
            .field("request", &self.request)
            .field("response", &self.response)
            .field("params", &self.params)
            .field("values", &self.values.keys().collect::<Vec<_>>())
            .finish()
    }
}

fn insert_header(headers: &mut HeaderMap, name: &str, value: &str) -> bool {
    match (
        HeaderName::try_from(name),
        HeaderValue::from_str(value),
    ) {
        (Ok(name), Ok(value)) => {
            headers.insert(name, value);
            true
        }
        _ => {
            warn!(header = %name, "Skipping invalid header");
            false
        }
    }
}
