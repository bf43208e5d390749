use std::net::SocketAddr;
use std::time::Duration;

use anyhow::{anyhow, Context, Result};
use relay_config::RelayConfig;
use relay_core::{spawn_hub, spawn_ingest_listener, Hub};
use relay_gateway::{router, serve, GatewayOptions};
use tokio::net::TcpListener;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::cli::Cli;
use crate::config_io::load_config;

/// Everything needed to start a relay, resolved from a validated config.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct RelayPlan {
    ingest_addr: SocketAddr,
    gateway_addr: SocketAddr,
    max_frame_bytes: usize,
    command_buffer: usize,
    shutdown_grace: Duration,
    gateway: GatewayOptions,
}

impl RelayPlan {
    pub(crate) fn from_config(config: &RelayConfig) -> Result<Self> {
        config.validate().context("invalid relay configuration")?;
        Ok(Self {
            ingest_addr: config.ingest.socket_addr()?,
            gateway_addr: config.gateway.socket_addr()?,
            max_frame_bytes: config.ingest.max_frame_bytes,
            command_buffer: config.hub.command_buffer,
            shutdown_grace: config.hub.shutdown_grace_duration()?,
            gateway: GatewayOptions::from(&config.gateway),
        })
    }
}

type TaskExit = (&'static str, Result<()>);

pub(crate) struct Relay {
    shutdown: CancellationToken,
    hub: Hub,
    ingest_addr: SocketAddr,
    gateway_addr: SocketAddr,
    shutdown_grace: Duration,
    tasks: JoinSet<TaskExit>,
}

impl Relay {
    pub(crate) fn hub(&self) -> Hub {
        self.hub.clone()
    }

    pub(crate) fn ingest_addr(&self) -> SocketAddr {
        self.ingest_addr
    }

    pub(crate) fn gateway_addr(&self) -> SocketAddr {
        self.gateway_addr
    }

    /// Resolves when any relay task stops before shutdown was requested.
    pub(crate) async fn wait_failure(&mut self) -> anyhow::Error {
        match self.tasks.join_next().await {
            Some(Ok((name, Ok(())))) => anyhow!("{name} stopped unexpectedly"),
            Some(Ok((name, Err(err)))) => err.context(format!("{name} failed")),
            Some(Err(err)) => anyhow!("relay task panicked: {err}"),
            None => anyhow!("relay has no running tasks"),
        }
    }

    pub(crate) async fn shutdown(self) {
        let Relay {
            shutdown,
            hub: _hub,
            shutdown_grace,
            mut tasks,
            ..
        } = self;

        shutdown.cancel();
        let drained = tokio::time::timeout(shutdown_grace, async {
            while let Some(joined) = tasks.join_next().await {
                match joined {
                    Ok((name, Err(err))) => {
                        warn!(task = name, error = %err, "task failed during shutdown");
                    }
                    Ok(_) => {}
                    Err(err) if !err.is_cancelled() => {
                        warn!(error = %err, "task join failed during shutdown");
                    }
                    Err(_) => {}
                }
            }
        })
        .await;

        if drained.is_err() {
            warn!(
                grace_ms = shutdown_grace.as_millis() as u64,
                remaining = tasks.len(),
                "shutdown grace elapsed, aborting remaining tasks"
            );
            tasks.abort_all();
        }
    }
}

/// Binds both listeners and starts the hub, the ingest listener and the
/// gateway. Failing to bind either address is fatal.
pub(crate) async fn start_relay(plan: &RelayPlan) -> Result<Relay> {
    let ingest_listener = TcpListener::bind(plan.ingest_addr)
        .await
        .with_context(|| format!("failed to bind ingest listener on {}", plan.ingest_addr))?;
    let gateway_listener = TcpListener::bind(plan.gateway_addr)
        .await
        .with_context(|| format!("failed to bind gateway listener on {}", plan.gateway_addr))?;
    let ingest_addr = ingest_listener.local_addr()?;
    let gateway_addr = gateway_listener.local_addr()?;

    let shutdown = CancellationToken::new();
    let (hub, hub_task) = spawn_hub(shutdown.clone(), plan.command_buffer);
    let ingest_task = spawn_ingest_listener(
        shutdown.clone(),
        ingest_listener,
        hub.clone(),
        plan.max_frame_bytes,
    );
    let app = router(hub.clone(), &plan.gateway);

    let mut tasks = JoinSet::new();
    tasks.spawn(async move { ("hub", hub_task.await.context("hub task join failed")) });
    tasks.spawn(async move {
        (
            "ingest listener",
            ingest_task.await.context("ingest listener join failed"),
        )
    });
    let gateway_shutdown = shutdown.clone();
    tasks.spawn(async move { ("gateway", serve(gateway_listener, app, gateway_shutdown).await) });

    Ok(Relay {
        shutdown,
        hub,
        ingest_addr,
        gateway_addr,
        shutdown_grace: plan.shutdown_grace,
        tasks,
    })
}

pub async fn run_daemon(cli: Cli) -> Result<()> {
    let mut config = load_config(&cli.config).await?;
    cli.apply_overrides(&mut config)?;
    let plan = RelayPlan::from_config(&config)?;
    let mut relay = start_relay(&plan).await?;
    info!(
        ingest_addr = %relay.ingest_addr(),
        gateway_addr = %relay.gateway_addr(),
        ws_path = %plan.gateway.ws_path,
        "relay started"
    );

    let result = tokio::select! {
        ctrl = tokio::signal::ctrl_c() => {
            ctrl.context("failed to wait ctrl-c")
                .map(|()| info!("received ctrl-c, stopping relay"))
        }
        failure = relay.wait_failure() => Err(failure),
    };

    if let Ok(status) = relay.hub().status().await {
        info!(
            subscribers = status.subscribers,
            published = status.published,
            dropped_slow = status.dropped_slow,
            "relay stopping"
        );
    }
    relay.shutdown().await;
    info!("relay stopped");
    result
}
