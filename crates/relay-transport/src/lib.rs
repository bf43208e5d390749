mod codec;
mod connection;
mod producer;

use thiserror::Error;

pub use codec::JsonFrameCodec;
pub use connection::IngestConnection;
pub use producer::{spawn_producer, IngestClient, ProducerOptions};

pub const DEFAULT_MAX_FRAME_BYTES: usize = 8 * 1024 * 1024;

#[derive(Debug, Error)]
pub enum TransportError {
    #[error("ingest stream I/O failed: {0}")]
    Io(#[from] std::io::Error),
    #[error("failed to decode ingest frame: {0}")]
    Decode(serde_json::Error),
    #[error("failed to encode ingest frame: {0}")]
    Encode(serde_json::Error),
    #[error("connect to {addr} timed out after {timeout_ms}ms")]
    ConnectTimeout { addr: String, timeout_ms: u64 },
    #[error("ingest stream closed before acknowledgement")]
    MissingAck,
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use bytes::{BufMut, BytesMut};
    use futures_util::StreamExt;
    use relay_protocol::{IngestAck, Update, UpdateBatch};
    use tokio::net::TcpListener;
    use tokio::sync::mpsc;
    use tokio_util::codec::{Decoder, Encoder};
    use tokio_util::sync::CancellationToken;

    use super::*;
    use crate::producer::backoff_delay;

    fn batch(id: &str, price: f64) -> UpdateBatch {
        UpdateBatch::new(vec![Update::new(id, id.to_uppercase(), id, price)])
    }

    #[test]
    fn partial_frame_waits_for_more_bytes() {
        let mut codec = JsonFrameCodec::<UpdateBatch, IngestAck>::new(1024);
        let mut full = BytesMut::new();
        codec.encode(IngestAck::default(), &mut full).expect("encode");

        let mut partial = BytesMut::from(&full[..full.len() - 1]);
        assert!(codec.decode(&mut partial).expect("decode").is_none());
    }

    #[test]
    fn decodes_batch_frame() {
        let mut codec = JsonFrameCodec::<UpdateBatch, UpdateBatch>::new(1024);
        let mut buf = BytesMut::new();
        codec.encode(batch("btc", 50_000.0), &mut buf).expect("encode");

        let decoded = codec.decode(&mut buf).expect("decode").expect("frame");
        assert_eq!(decoded, batch("btc", 50_000.0));
        assert!(buf.is_empty());
    }

    #[test]
    fn oversized_frame_is_rejected() {
        let mut codec = JsonFrameCodec::<UpdateBatch, IngestAck>::new(16);
        assert_eq!(codec.max_frame_bytes(), 16);

        let mut buf = BytesMut::new();
        buf.put_u32(1024);
        buf.extend_from_slice(&[b' '; 64]);
        let err = codec.decode(&mut buf).expect_err("frame too large");
        assert!(matches!(err, TransportError::Io(_)));
    }

    #[test]
    fn malformed_json_is_a_decode_error() {
        let mut codec = JsonFrameCodec::<UpdateBatch, IngestAck>::new(1024);
        let body = b"{not json";
        let mut buf = BytesMut::new();
        buf.put_u32(body.len() as u32);
        buf.extend_from_slice(body);

        let err = codec.decode(&mut buf).expect_err("bad json");
        assert!(matches!(err, TransportError::Decode(_)));
    }

    #[test]
    fn backoff_is_linear_and_capped() {
        let options = ProducerOptions {
            reconnect: Duration::from_millis(100),
            reconnect_max: Duration::from_millis(250),
            ..ProducerOptions::default()
        };
        assert_eq!(backoff_delay(&options, 1), Duration::from_millis(100));
        assert_eq!(backoff_delay(&options, 2), Duration::from_millis(200));
        assert_eq!(backoff_delay(&options, 3), Duration::from_millis(250));
        assert_eq!(backoff_delay(&options, u32::MAX), Duration::from_millis(250));
    }

    #[tokio::test]
    async fn client_finish_receives_ack_after_half_close() {
        let (client_io, relay_io) = tokio::io::duplex(4096);
        let mut relay = IngestConnection::new(relay_io, "duplex", 1024);
        assert_eq!(relay.peer(), "duplex");

        let relay_task = tokio::spawn(async move {
            let mut received = Vec::new();
            while let Some(item) = relay.next().await {
                received.push(item.expect("batch"));
            }
            relay.acknowledge().await.expect("ack");
            received
        });

        let mut client = IngestClient::from_io(client_io, 1024);
        client.send(batch("btc", 50_000.0)).await.expect("send");
        client.send(batch("eth", 3_000.0)).await.expect("send");
        let ack = client.finish().await.expect("finish");
        assert_eq!(ack, IngestAck::default());

        let received = relay_task.await.expect("join");
        assert_eq!(received, vec![batch("btc", 50_000.0), batch("eth", 3_000.0)]);
    }

    #[tokio::test]
    async fn finish_without_ack_is_reported() {
        let (client_io, relay_io) = tokio::io::duplex(4096);
        let relay_task = tokio::spawn(async move {
            let mut relay = IngestConnection::new(relay_io, "duplex", 1024);
            while relay.next().await.is_some() {}
        });

        let client = IngestClient::from_io(client_io, 1024);
        let err = client.finish().await.expect_err("no ack");
        assert!(matches!(err, TransportError::MissingAck));
        relay_task.await.expect("join");
    }

    #[tokio::test]
    async fn producer_forwards_batches_over_tcp() {
        let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind");
        let addr = listener.local_addr().expect("addr").to_string();

        let relay_task = tokio::spawn(async move {
            let (stream, _) = listener.accept().await.expect("accept");
            let mut relay = IngestConnection::from_tcp(stream, DEFAULT_MAX_FRAME_BYTES);
            let mut received = Vec::new();
            while let Some(item) = relay.next().await {
                received.push(item.expect("batch"));
            }
            relay.acknowledge().await.expect("ack");
            received
        });

        let (tx, rx) = mpsc::channel(4);
        let producer = spawn_producer(
            CancellationToken::new(),
            addr,
            rx,
            ProducerOptions {
                reconnect: Duration::from_millis(10),
                ..ProducerOptions::default()
            },
        );
        tx.send(batch("btc", 1.0)).await.expect("queue");
        tx.send(batch("btc", 2.0)).await.expect("queue");
        drop(tx);

        tokio::time::timeout(Duration::from_secs(5), producer)
            .await
            .expect("producer exits")
            .expect("join");
        let received = relay_task.await.expect("join");
        assert_eq!(received, vec![batch("btc", 1.0), batch("btc", 2.0)]);
    }

    #[tokio::test]
    async fn producer_stops_on_cancel_while_unreachable() {
        let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind");
        let addr = listener.local_addr().expect("addr").to_string();
        drop(listener);

        let shutdown = CancellationToken::new();
        let (_tx, rx) = mpsc::channel(1);
        let producer = spawn_producer(
            shutdown.clone(),
            addr,
            rx,
            ProducerOptions {
                reconnect: Duration::from_millis(10),
                reconnect_max: Duration::from_millis(20),
                dial_timeout: Duration::from_millis(200),
                ..ProducerOptions::default()
            },
        );

        tokio::time::sleep(Duration::from_millis(50)).await;
        shutdown.cancel();
        tokio::time::timeout(Duration::from_secs(2), producer)
            .await
            .expect("producer exits")
            .expect("join");
    }
}
