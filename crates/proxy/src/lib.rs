//! edgeproxy: a transparent local CDN between an instrumented browser and
//! the public internet.
//!
//! This crate provides the request pipeline: capability traits for the
//! browser automation layer, the request handler state machine (with a
//! separate always-revalidate path for documents), header replay rules,
//! and the session driver that owns reporting and shutdown. The classifier,
//! normalizer, and storage engine live in `edgeproxy-core`.

pub mod context;
mod document;
pub mod handler;
pub mod headers;
pub mod route;
pub mod session;

#[cfg(test)]
mod testkit;

pub use context::Context;
pub use handler::handle_request;
pub use route::{FetchedResponse, Headers, RouteError, RouteHandle};
pub use session::{AutomationSession, init_logging, run};
