use axum::extract::ws::{Message, Utf8Bytes, WebSocket, WebSocketUpgrade};
use axum::extract::State;
use axum::response::Response;
use futures_util::{future, SinkExt, StreamExt};
use relay_core::{attach, InboundSignal};
use relay_protocol::Payload;
use tracing::{debug, warn};

use crate::GatewayState;

pub(crate) async fn upgrade(ws: WebSocketUpgrade, State(state): State<GatewayState>) -> Response {
    ws.on_failed_upgrade(|err| warn!(error = %err, "websocket upgrade failed"))
        .on_upgrade(move |socket| serve_subscriber(socket, state))
}

async fn serve_subscriber(socket: WebSocket, state: GatewayState) {
    let (sink, stream) = socket.split();

    let outbound = sink.with(|payload: Payload| {
        future::ready(Ok::<_, axum::Error>(Message::Text(Utf8Bytes::from(
            payload.as_str(),
        ))))
    });
    let inbound = stream.map(|message| {
        message.map(|message| match message {
            Message::Close(_) => InboundSignal::Close,
            _ => InboundSignal::Activity,
        })
    });

    let handle = match attach(&state.hub, outbound, inbound, state.mailbox_capacity).await {
        Ok(handle) => handle,
        Err(err) => {
            warn!(error = %err, "websocket subscriber not registered");
            return;
        }
    };

    let id = handle.id();
    handle.join().await;
    debug!(subscriber = %id, "websocket session ended");
}
