use std::pin::Pin;
use std::task::{Context, Poll};

use futures_util::{SinkExt, Stream, StreamExt};
use relay_protocol::{IngestAck, UpdateBatch};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::TcpStream;
use tokio_util::codec::Framed;

use crate::{JsonFrameCodec, TransportError};

/// Relay side of one producer stream.
///
/// Yields decoded batches until the producer half-closes; the caller then
/// answers with [`IngestConnection::acknowledge`].
pub struct IngestConnection<T = TcpStream> {
    peer: String,
    framed: Framed<T, JsonFrameCodec<UpdateBatch, IngestAck>>,
}

impl IngestConnection<TcpStream> {
    pub fn from_tcp(stream: TcpStream, max_frame_bytes: usize) -> Self {
        let peer = stream
            .peer_addr()
            .map(|addr| addr.to_string())
            .unwrap_or_else(|_| "unknown".to_string());
        Self::new(stream, peer, max_frame_bytes)
    }
}

impl<T> IngestConnection<T>
where
    T: AsyncRead + AsyncWrite + Unpin,
{
    pub fn new(io: T, peer: impl Into<String>, max_frame_bytes: usize) -> Self {
        Self {
            peer: peer.into(),
            framed: Framed::new(io, JsonFrameCodec::new(max_frame_bytes)),
        }
    }

    pub fn peer(&self) -> &str {
        &self.peer
    }

    pub async fn acknowledge(mut self) -> Result<(), TransportError> {
        self.framed.send(IngestAck::default()).await?;
        SinkExt::<IngestAck>::close(&mut self.framed).await
    }
}

impl<T> Stream for IngestConnection<T>
where
    T: AsyncRead + AsyncWrite + Unpin,
{
    type Item = Result<UpdateBatch, TransportError>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        self.framed.poll_next_unpin(cx)
    }
}
