//! Capability traits for the browser automation layer.
//!
//! The automation layer surfaces each intercepted request as a handle with
//! exactly three terminal operations: release it to the network untouched
//! (`proceed`), perform the outbound fetch on our behalf (`fetch`), or
//! answer it directly (`fulfill`). Bodies cross this boundary already
//! decompressed; header names are lowercased.

use std::collections::HashMap;

use bytes::Bytes;

/// Lowercase-keyed header map as exchanged with the automation layer.
pub type Headers = HashMap<String, String>;

/// Errors surfaced by the automation layer.
#[derive(Debug, thiserror::Error)]
pub enum RouteError {
    /// Outbound fetch failed (network, DNS, timeout).
    #[error("FETCH_FAILED: {0}")]
    Fetch(String),

    /// Response body could not be read.
    #[error("BODY_READ_FAILED: {0}")]
    Body(String),

    /// The browser side of the route is gone.
    #[error("FULFILL_FAILED: {0}")]
    Fulfill(String),

    /// Releasing the request to the network failed.
    #[error("CONTINUE_FAILED: {0}")]
    Continue(String),
}

/// A response obtained through [`RouteHandle::fetch`].
#[async_trait::async_trait]
pub trait FetchedResponse: Send + Sync {
    fn status(&self) -> u16;

    fn ok(&self) -> bool {
        (200..300).contains(&self.status())
    }

    /// Response headers, lowercased names.
    fn headers(&self) -> &Headers;

    /// Decompressed body bytes.
    async fn body(&self) -> Result<Bytes, RouteError>;
}

/// One intercepted request.
///
/// The handler invokes exactly one of `proceed` or `fulfill` per request;
/// `fetch` may precede either.
#[async_trait::async_trait]
pub trait RouteHandle: Send + Sync {
    type Response: FetchedResponse;

    /// HTTP method, uppercase.
    fn method(&self) -> &str;

    fn url(&self) -> &str;

    /// Automation-layer resource type tag
    /// (`document`, `stylesheet`, `script`, `image`, `font`, `media`,
    /// `fetch`, `xhr`, ...).
    fn resource_type(&self) -> &str;

    /// Request headers, lowercased names.
    fn headers(&self) -> &Headers;

    /// Release the request to the network untouched.
    async fn proceed(&self) -> Result<(), RouteError>;

    /// Perform the outbound fetch with the given headers.
    async fn fetch(&self, headers: Headers) -> Result<Self::Response, RouteError>;

    /// Answer the request directly.
    async fn fulfill(&self, status: u16, headers: Headers, body: Bytes) -> Result<(), RouteError>;
}
