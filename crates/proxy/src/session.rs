//! Session driver: multiplexes intercepted requests onto tasks and owns
//! the report cadence and shutdown sequence.

use std::io::IsTerminal;
use std::sync::Arc;

use edgeproxy_core::{AppConfig, Error, report};
use tracing_subscriber::EnvFilter;

use crate::context::Context;
use crate::handler;
use crate::route::{RouteError, RouteHandle};

/// The browser automation context, as seen by the driver.
///
/// `next_request` is polled inside a select loop and must be cancel-safe;
/// `None` means the browser context is gone and the session should wind
/// down.
#[async_trait::async_trait]
pub trait AutomationSession: Send {
    type Route: RouteHandle + 'static;

    /// Next intercepted request, or `None` once the browser context closed.
    async fn next_request(&mut self) -> Option<Self::Route>;

    /// Tear down the browser context.
    async fn close(&mut self) -> Result<(), RouteError>;
}

/// Install the tracing subscriber for the configured verbosity.
///
/// `RUST_LOG` wins over the config level when set. Logs go to stderr.
pub fn init_logging(config: &AppConfig) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(config.env_filter_directive()));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_ansi(std::io::stderr().is_terminal())
        .init();
}

/// Drive a session to completion.
///
/// Spawns one task per intercepted request, emits the savings report on the
/// configured cadence, and on shutdown (SIGINT/SIGTERM or a drained
/// session) emits a final report, flushes the storage engine, and closes
/// the automation context.
///
/// Returns `Ok(())` on graceful shutdown; the embedder maps that to exit
/// code 0 and any `Err` (including an initialization failure from
/// [`Context::from_config`]) to exit code 1.
pub async fn run<S: AutomationSession>(mut session: S, ctx: Arc<Context>) -> Result<(), Error> {
    let mut report_timer = tokio::time::interval(ctx.report_interval);
    report_timer.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
    report_timer.tick().await; // the first tick is immediate

    let shutdown = shutdown_signal();
    tokio::pin!(shutdown);

    loop {
        tokio::select! {
            _ = &mut shutdown => {
                tracing::info!("shutdown signal received");
                break;
            }
            _ = report_timer.tick() => {
                emit_report(&ctx);
            }
            route = session.next_request() => {
                let Some(route) = route else {
                    tracing::info!("automation session drained");
                    break;
                };
                let ctx = Arc::clone(&ctx);
                tokio::spawn(async move {
                    if let Err(error) = handler::handle_request(&ctx, &route).await {
                        tracing::warn!(url = route.url(), error = %error, "request task ended with error");
                    }
                });
            }
        }
    }

    emit_report(&ctx);
    ctx.store.flush().await?;
    if let Err(error) = session.close().await {
        tracing::warn!(error = %error, "automation session close failed");
    }
    Ok(())
}

fn emit_report(ctx: &Context) {
    let snapshot = ctx.store.stats().snapshot();
    tracing::info!("\n{}", report::render(&snapshot));
}

async fn shutdown_signal() {
    let ctrl_c = tokio::signal::ctrl_c();
    #[cfg(unix)]
    {
        use tokio::signal::unix::{SignalKind, signal};
        match signal(SignalKind::terminate()) {
            Ok(mut term) => {
                tokio::select! {
                    _ = ctrl_c => {}
                    _ = term.recv() => {}
                }
            }
            Err(error) => {
                tracing::warn!(error = %error, "SIGTERM handler unavailable, relying on ctrl-c");
                let _ = ctrl_c.await;
            }
        }
    }
    #[cfg(not(unix))]
    {
        let _ = ctrl_c.await;
    }
}
