use std::fmt::Display;

use futures_util::{pin_mut, Sink, SinkExt, Stream, StreamExt};
use relay_protocol::Payload;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::{mailbox, Hub, HubError, SubscriberId};

/// What the liveness task learns from one inbound message.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum InboundSignal {
    Activity,
    Close,
}

/// A registered subscriber with its delivery and liveness tasks running.
#[derive(Debug)]
pub struct SubscriberHandle {
    id: SubscriberId,
    cancel: CancellationToken,
    delivery: JoinHandle<()>,
    liveness: JoinHandle<()>,
}

impl SubscriberHandle {
    pub fn id(&self) -> SubscriberId {
        self.id
    }

    /// Stops both tasks; they unregister on their way out.
    pub fn disconnect(&self) {
        self.cancel.cancel();
    }

    /// Waits until both tasks have finished.
    pub async fn join(self) {
        for (task, name) in [(self.delivery, "delivery"), (self.liveness, "liveness")] {
            if let Err(err) = task.await {
                if !err.is_cancelled() {
                    warn!(
                        subscriber = %self.id,
                        task = name,
                        error = %err,
                        "subscriber task join failed"
                    );
                }
            }
        }
    }
}

/// Registers a subscriber with `hub` and starts its tasks.
///
/// `outbound` receives every payload in mailbox order; `inbound` is drained
/// only to notice that the peer went away. Whichever side ends first cancels
/// the other, and both unregister. The hub removing the subscriber, for
/// example after its mailbox overflowed, stops both tasks as well.
pub async fn attach<O, I, E>(
    hub: &Hub,
    outbound: O,
    inbound: I,
    mailbox_capacity: usize,
) -> Result<SubscriberHandle, HubError>
where
    O: Sink<Payload> + Send + 'static,
    O::Error: Display + Send + 'static,
    I: Stream<Item = Result<InboundSignal, E>> + Send + 'static,
    E: Display + Send + 'static,
{
    let (sender, receiver) = mailbox(mailbox_capacity);
    let registration = hub.register(sender).await?;
    let id = registration.id;
    let cancel = registration.removed;

    let delivery = tokio::spawn(run_delivery(
        hub.clone(),
        id,
        receiver,
        outbound,
        cancel.clone(),
    ));
    let liveness = tokio::spawn(run_liveness(hub.clone(), id, inbound, cancel.clone()));

    Ok(SubscriberHandle {
        id,
        cancel,
        delivery,
        liveness,
    })
}

async fn run_delivery<O>(
    hub: Hub,
    id: SubscriberId,
    mut receiver: mpsc::Receiver<Payload>,
    outbound: O,
    cancel: CancellationToken,
) where
    O: Sink<Payload>,
    O::Error: Display,
{
    pin_mut!(outbound);
    let mut stalled = false;

    loop {
        let payload = tokio::select! {
            _ = cancel.cancelled() => break,
            next = receiver.recv() => match next {
                Some(payload) => payload,
                None => {
                    debug!(subscriber = %id, "mailbox closed by hub");
                    break;
                }
            },
        };

        let written = tokio::select! {
            _ = cancel.cancelled() => {
                stalled = true;
                break;
            }
            written = outbound.send(payload) => written,
        };
        if let Err(err) = written {
            debug!(subscriber = %id, error = %err, "subscriber write failed");
            break;
        }
    }

    cancel.cancel();
    hub.unregister(id).await;
    // A sink abandoned mid-write may never make progress again.
    if stalled {
        debug!(subscriber = %id, "dropping subscriber sink with a write in flight");
    } else if let Err(err) = outbound.close().await {
        debug!(subscriber = %id, error = %err, "subscriber close failed");
    }
}

async fn run_liveness<I, E>(hub: Hub, id: SubscriberId, inbound: I, cancel: CancellationToken)
where
    I: Stream<Item = Result<InboundSignal, E>>,
    E: Display,
{
    pin_mut!(inbound);

    loop {
        let next = tokio::select! {
            _ = cancel.cancelled() => return,
            next = inbound.next() => next,
        };
        match next {
            Some(Ok(InboundSignal::Activity)) => {}
            Some(Ok(InboundSignal::Close)) => {
                debug!(subscriber = %id, "subscriber sent close");
                break;
            }
            Some(Err(err)) => {
                debug!(subscriber = %id, error = %err, "subscriber read failed");
                break;
            }
            None => {
                debug!(subscriber = %id, "subscriber stream ended");
                break;
            }
        }
    }

    cancel.cancel();
    hub.unregister(id).await;
}
