use std::cmp;
use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use relay_protocol::{IngestAck, UpdateBatch};
use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::codec::Framed;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::{JsonFrameCodec, TransportError, DEFAULT_MAX_FRAME_BYTES};

#[derive(Clone, Debug)]
pub struct ProducerOptions {
    pub reconnect: Duration,
    pub reconnect_max: Duration,
    pub dial_timeout: Duration,
    pub max_frame_bytes: usize,
}

impl Default for ProducerOptions {
    fn default() -> Self {
        Self {
            reconnect: Duration::from_secs(1),
            reconnect_max: Duration::from_secs(30),
            dial_timeout: Duration::from_secs(5),
            max_frame_bytes: DEFAULT_MAX_FRAME_BYTES,
        }
    }
}

/// Producer side of an ingest stream.
pub struct IngestClient<T = TcpStream> {
    framed: Framed<T, JsonFrameCodec<IngestAck, UpdateBatch>>,
}

impl IngestClient<TcpStream> {
    pub async fn connect(addr: &str, options: &ProducerOptions) -> Result<Self, TransportError> {
        let stream = tokio::time::timeout(options.dial_timeout, TcpStream::connect(addr))
            .await
            .map_err(|_| TransportError::ConnectTimeout {
                addr: addr.to_string(),
                timeout_ms: options.dial_timeout.as_millis() as u64,
            })??;
        stream.set_nodelay(true)?;
        Ok(Self::from_io(stream, options.max_frame_bytes))
    }
}

impl<T> IngestClient<T>
where
    T: AsyncRead + AsyncWrite + Unpin,
{
    pub fn from_io(io: T, max_frame_bytes: usize) -> Self {
        Self {
            framed: Framed::new(io, JsonFrameCodec::new(max_frame_bytes)),
        }
    }

    pub async fn send(&mut self, batch: UpdateBatch) -> Result<(), TransportError> {
        self.framed.send(batch).await
    }

    /// Half-closes the stream and waits for the relay's acknowledgement.
    pub async fn finish(mut self) -> Result<IngestAck, TransportError> {
        SinkExt::<UpdateBatch>::flush(&mut self.framed).await?;
        self.framed.get_mut().shutdown().await?;
        match self.framed.next().await {
            Some(Ok(ack)) => Ok(ack),
            Some(Err(err)) => Err(err),
            None => Err(TransportError::MissingAck),
        }
    }
}

enum ForwardEnd {
    SourceClosed,
    Cancelled,
}

/// Forwards batches from `batches` to the relay at `addr`, redialing with
/// linear backoff whenever the stream breaks.
///
/// A batch whose send failed is retried on the next connection. When the
/// batch channel closes the stream is finished cleanly and the task exits.
pub fn spawn_producer(
    shutdown: CancellationToken,
    addr: String,
    mut batches: mpsc::Receiver<UpdateBatch>,
    options: ProducerOptions,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut attempts: u32 = 0;
        let mut pending: Option<UpdateBatch> = None;

        while !shutdown.is_cancelled() {
            let mut client = match IngestClient::connect(&addr, &options).await {
                Ok(client) => client,
                Err(err) => {
                    attempts = attempts.saturating_add(1);
                    warn!(%addr, attempt = attempts, error = %err, "ingest connect failed");
                    wait_backoff(&shutdown, &options, attempts).await;
                    continue;
                }
            };

            attempts = 0;
            info!(%addr, "ingest stream connected");

            match forward_batches(&mut client, &mut batches, &mut pending, &shutdown).await {
                Ok(ForwardEnd::SourceClosed) => {
                    match client.finish().await {
                        Ok(_) => info!(%addr, "ingest stream finished and acknowledged"),
                        Err(err) => warn!(%addr, error = %err, "ingest stream finish failed"),
                    }
                    return;
                }
                Ok(ForwardEnd::Cancelled) => {
                    if let Err(err) = client.finish().await {
                        debug!(%addr, error = %err, "ingest stream finish failed during shutdown");
                    }
                    return;
                }
                Err(err) => {
                    attempts = 1;
                    warn!(%addr, error = %err, "ingest stream broken");
                }
            }

            wait_backoff(&shutdown, &options, attempts).await;
        }
    })
}

async fn forward_batches<T>(
    client: &mut IngestClient<T>,
    batches: &mut mpsc::Receiver<UpdateBatch>,
    pending: &mut Option<UpdateBatch>,
    shutdown: &CancellationToken,
) -> Result<ForwardEnd, TransportError>
where
    T: AsyncRead + AsyncWrite + Unpin,
{
    loop {
        let batch = match pending.take() {
            Some(batch) => batch,
            None => {
                tokio::select! {
                    _ = shutdown.cancelled() => return Ok(ForwardEnd::Cancelled),
                    next = batches.recv() => match next {
                        Some(batch) => batch,
                        None => return Ok(ForwardEnd::SourceClosed),
                    },
                }
            }
        };

        let count = batch.len();
        if let Err(err) = client.send(batch.clone()).await {
            *pending = Some(batch);
            return Err(err);
        }
        debug!(updates = count, "sent update batch");
    }
}

pub(crate) fn backoff_delay(options: &ProducerOptions, attempts: u32) -> Duration {
    cmp::min(
        options.reconnect.saturating_mul(attempts),
        options.reconnect_max,
    )
}

async fn wait_backoff(shutdown: &CancellationToken, options: &ProducerOptions, attempts: u32) {
    if attempts == 0 {
        return;
    }

    tokio::select! {
        _ = shutdown.cancelled() => {}
        _ = tokio::time::sleep(backoff_delay(options, attempts)) => {}
    }
}
