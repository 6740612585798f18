//! Scripted route fakes shared by the handler and driver tests.

use std::collections::VecDeque;
use std::path::Path;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use bytes::Bytes;
use edgeproxy_core::store::StoreConfig;
use edgeproxy_core::{AppConfig, CacheStore, Classifier};

use crate::context::Context;
use crate::route::{FetchedResponse, Headers, RouteError, RouteHandle};

/// Build a context on a fresh cache dir with a one-hour body TTL.
pub async fn test_context(dir: &Path) -> Context {
    test_context_with_ttl(dir, 3_600_000).await
}

/// Build a context with an explicit body TTL (0 makes every entry stale).
pub async fn test_context_with_ttl(dir: &Path, body_ttl_ms: u64) -> Context {
    let config = AppConfig::default();
    let classifier = Classifier::new(&config.auction_patterns, &config.beacon_patterns);
    let store = CacheStore::open(StoreConfig {
        cache_dir: dir.to_path_buf(),
        max_size_bytes: 64 * 1024 * 1024,
        body_ttl_ms,
    })
    .await
    .expect("store init");
    Context::new(classifier, store, Duration::from_secs(60))
}

/// A canned origin response.
#[derive(Debug, Clone)]
pub struct FakeResponse {
    pub status: u16,
    pub headers: Headers,
    pub body: Bytes,
}

impl FakeResponse {
    pub fn new(status: u16, body: &[u8]) -> Self {
        Self { status, headers: Headers::new(), body: Bytes::copy_from_slice(body) }
    }

    pub fn with_header(mut self, name: &str, value: &str) -> Self {
        self.headers.insert(name.to_ascii_lowercase(), value.to_string());
        self
    }
}

#[async_trait::async_trait]
impl FetchedResponse for FakeResponse {
    fn status(&self) -> u16 {
        self.status
    }

    fn headers(&self) -> &Headers {
        &self.headers
    }

    async fn body(&self) -> Result<Bytes, RouteError> {
        Ok(self.body.clone())
    }
}

/// Terminal action recorded by a [`FakeRoute`].
#[derive(Debug, Clone, PartialEq)]
pub enum Outcome {
    Continued,
    Fulfilled { status: u16, headers: Headers, body: Bytes },
}

/// Scripted intercepted request.
///
/// Fetch responses are consumed in order; an unscripted fetch fails like a
/// dead network.
pub struct FakeRoute {
    method: String,
    url: String,
    resource_type: String,
    request_headers: Headers,
    fetches: Mutex<VecDeque<Result<FakeResponse, RouteError>>>,
    seen_fetches: Arc<Mutex<Vec<Headers>>>,
    outcome: Arc<Mutex<Option<Outcome>>>,
}

impl FakeRoute {
    pub fn new(method: &str, url: &str, resource_type: &str) -> Self {
        Self {
            method: method.to_string(),
            url: url.to_string(),
            resource_type: resource_type.to_string(),
            request_headers: Headers::new(),
            fetches: Mutex::new(VecDeque::new()),
            seen_fetches: Arc::new(Mutex::new(Vec::new())),
            outcome: Arc::new(Mutex::new(None)),
        }
    }

    pub fn get(url: &str, resource_type: &str) -> Self {
        Self::new("GET", url, resource_type)
    }

    pub fn with_request_header(mut self, name: &str, value: &str) -> Self {
        self.request_headers.insert(name.to_ascii_lowercase(), value.to_string());
        self
    }

    /// Queue the next fetch response.
    pub fn respond(self, response: FakeResponse) -> Self {
        self.fetches.lock().unwrap().push_back(Ok(response));
        self
    }

    /// Queue a failing fetch.
    pub fn fail_fetch(self) -> Self {
        self.fetches.lock().unwrap().push_back(Err(RouteError::Fetch("connection reset".into())));
        self
    }

    pub fn outcome(&self) -> Outcome {
        self.outcome.lock().unwrap().clone().expect("route reached no terminal action")
    }

    pub fn no_outcome(&self) -> bool {
        self.outcome.lock().unwrap().is_none()
    }

    /// The recorded fulfill, or a panic if the route was continued.
    pub fn fulfilled(&self) -> (u16, Headers, Bytes) {
        match self.outcome() {
            Outcome::Fulfilled { status, headers, body } => (status, headers, body),
            Outcome::Continued => panic!("route was continued, not fulfilled"),
        }
    }

    pub fn fetch_count(&self) -> usize {
        self.seen_fetches.lock().unwrap().len()
    }

    pub fn seen_fetch_headers(&self) -> Vec<Headers> {
        self.seen_fetches.lock().unwrap().clone()
    }
}

#[async_trait::async_trait]
impl RouteHandle for FakeRoute {
    type Response = FakeResponse;

    fn method(&self) -> &str {
        &self.method
    }

    fn url(&self) -> &str {
        &self.url
    }

    fn resource_type(&self) -> &str {
        &self.resource_type
    }

    fn headers(&self) -> &Headers {
        &self.request_headers
    }

    async fn proceed(&self) -> Result<(), RouteError> {
        *self.outcome.lock().unwrap() = Some(Outcome::Continued);
        Ok(())
    }

    async fn fetch(&self, headers: Headers) -> Result<FakeResponse, RouteError> {
        self.seen_fetches.lock().unwrap().push(headers);
        self.fetches
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| Err(RouteError::Fetch("no scripted response".into())))
    }

    async fn fulfill(&self, status: u16, headers: Headers, body: Bytes) -> Result<(), RouteError> {
        *self.outcome.lock().unwrap() = Some(Outcome::Fulfilled { status, headers, body });
        Ok(())
    }
}
