mod index;
mod status;
mod ws;

use std::sync::Arc;

use anyhow::{Context as AnyhowContext, Result};
use axum::routing::get;
use axum::Router;
use relay_config::{GatewayConfig, DEFAULT_MAILBOX_CAPACITY, DEFAULT_WS_PATH, STATUS_PATH};
use relay_core::Hub;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tracing::info;

pub use status::StatusBody;

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct GatewayOptions {
    pub ws_path: String,
    pub mailbox_capacity: usize,
    pub serve_index: bool,
}

impl Default for GatewayOptions {
    fn default() -> Self {
        Self {
            ws_path: DEFAULT_WS_PATH.to_string(),
            mailbox_capacity: DEFAULT_MAILBOX_CAPACITY,
            serve_index: true,
        }
    }
}

impl From<&GatewayConfig> for GatewayOptions {
    fn from(cfg: &GatewayConfig) -> Self {
        Self {
            ws_path: cfg.ws_path.clone(),
            mailbox_capacity: cfg.mailbox_capacity,
            serve_index: cfg.serve_index,
        }
    }
}

#[derive(Clone)]
struct GatewayState {
    hub: Hub,
    mailbox_capacity: usize,
    index_page: Arc<str>,
}

pub fn router(hub: Hub, options: &GatewayOptions) -> Router {
    let state = GatewayState {
        hub,
        mailbox_capacity: options.mailbox_capacity,
        index_page: index::render(&options.ws_path).into(),
    };

    let mut router = Router::new()
        .route(&options.ws_path, get(ws::upgrade))
        .route(STATUS_PATH, get(status::status));
    if options.serve_index {
        router = router.route("/", get(index::page));
    }
    router.with_state(state)
}

/// Serves `router` on `listener` until `shutdown` fires.
pub async fn serve(
    listener: TcpListener,
    router: Router,
    shutdown: CancellationToken,
) -> Result<()> {
    let addr = listener
        .local_addr()
        .context("failed to read gateway listen address")?;
    info!(%addr, "gateway listening");

    axum::serve(listener, router)
        .with_graceful_shutdown(shutdown.cancelled_owned())
        .await
        .with_context(|| format!("gateway server on {addr} failed"))?;

    info!(%addr, "gateway stopped");
    Ok(())
}
