use std::fmt::Display;
use std::time::Duration;

use futures_util::{Stream, StreamExt};
use relay_protocol::UpdateBatch;
use relay_transport::IngestConnection;
use tokio::net::TcpListener;
use tokio::task::{JoinHandle, JoinSet};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::{Hub, HubError};

const ACCEPT_RETRY_DELAY: Duration = Duration::from_millis(100);

/// How one ingest session ended. `batches` counts batches received.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum IngestOutcome {
    /// Producer closed the stream cleanly.
    Finished { batches: u64 },
    /// Receive or decode failure; the hub keeps its last snapshot.
    Failed { batches: u64, reason: String },
    HubClosed { batches: u64 },
    Cancelled { batches: u64 },
}

impl IngestOutcome {
    pub fn batches(&self) -> u64 {
        match self {
            Self::Finished { batches }
            | Self::Failed { batches, .. }
            | Self::HubClosed { batches }
            | Self::Cancelled { batches } => *batches,
        }
    }
}

/// Publishes every batch read from `batches` until the stream ends, fails,
/// the hub goes away or `shutdown` fires.
///
/// Batches that fail validation are logged and skipped without ending the
/// session.
pub async fn run_ingest_adapter<S, E>(
    hub: &Hub,
    mut batches: S,
    shutdown: &CancellationToken,
) -> IngestOutcome
where
    S: Stream<Item = Result<UpdateBatch, E>> + Unpin,
    E: Display,
{
    let mut received: u64 = 0;

    loop {
        let next = tokio::select! {
            _ = shutdown.cancelled() => return IngestOutcome::Cancelled { batches: received },
            next = batches.next() => next,
        };

        let batch = match next {
            Some(Ok(batch)) => batch,
            Some(Err(err)) => {
                warn!(batches = received, error = %err, "ingest receive failed");
                return IngestOutcome::Failed {
                    batches: received,
                    reason: err.to_string(),
                };
            }
            None => return IngestOutcome::Finished { batches: received },
        };
        received += 1;

        if let Err(err) = batch.validate() {
            warn!(error = %err, updates = batch.len(), "skipping invalid update batch");
            continue;
        }

        info!(
            updates = batch.len(),
            schema = batch.schema_version().map(|v| v.as_str()).unwrap_or("-"),
            "received update batch"
        );
        for update in &batch {
            debug!(
                id = %update.id,
                symbol = %update.symbol,
                price = update.current_price,
                change_24h = update.price_change_24h_or_zero(),
                "update"
            );
        }

        match hub.publish(&batch).await {
            Ok(report) => {
                debug!(
                    seq = report.seq,
                    delivered = report.delivered,
                    dropped = report.dropped,
                    "batch published"
                );
            }
            Err(HubError::Closed) => {
                warn!("hub closed, ending ingest session");
                return IngestOutcome::HubClosed { batches: received };
            }
            Err(err) => {
                warn!(error = %err, "failed to publish update batch");
            }
        }
    }
}

/// Accepts producer connections on `listener`, running one adapter per
/// connection. Keeps accepting after sessions end so a restarted producer
/// can reconnect.
pub fn spawn_ingest_listener(
    shutdown: CancellationToken,
    listener: TcpListener,
    hub: Hub,
    max_frame_bytes: usize,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut sessions = JoinSet::new();

        loop {
            tokio::select! {
                _ = shutdown.cancelled() => break,
                accepted = listener.accept() => match accepted {
                    Ok((stream, peer)) => {
                        if let Err(err) = stream.set_nodelay(true) {
                            debug!(%peer, error = %err, "set_nodelay failed");
                        }
                        info!(%peer, "ingest producer connected");
                        let connection = IngestConnection::from_tcp(stream, max_frame_bytes);
                        sessions.spawn(run_ingest_session(
                            hub.clone(),
                            connection,
                            shutdown.clone(),
                        ));
                    }
                    Err(err) => {
                        warn!(error = %err, "ingest accept failed");
                        tokio::time::sleep(ACCEPT_RETRY_DELAY).await;
                    }
                },
                Some(joined) = sessions.join_next(), if !sessions.is_empty() => {
                    if let Err(err) = joined {
                        warn!(error = %err, "ingest session task failed");
                    }
                }
            }
        }

        while sessions.join_next().await.is_some() {}
        debug!("ingest listener stopped");
    })
}

async fn run_ingest_session(
    hub: Hub,
    mut connection: IngestConnection,
    shutdown: CancellationToken,
) {
    let peer = connection.peer().to_string();
    let outcome = run_ingest_adapter(&hub, &mut connection, &shutdown).await;

    match outcome {
        IngestOutcome::Finished { batches } => {
            info!(%peer, batches, "ingest stream finished");
            if let Err(err) = connection.acknowledge().await {
                warn!(%peer, error = %err, "failed to acknowledge ingest stream");
            }
        }
        IngestOutcome::Failed { batches, reason } => {
            warn!(%peer, batches, %reason, "ingest stream failed");
        }
        IngestOutcome::HubClosed { batches } => {
            warn!(%peer, batches, "ingest stream dropped: hub closed");
        }
        IngestOutcome::Cancelled { batches } => {
            debug!(%peer, batches, "ingest stream cancelled");
        }
    }
}
