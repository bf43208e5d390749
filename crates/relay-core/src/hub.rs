use std::collections::BTreeMap;
use std::fmt;
use std::time::SystemTime;

use relay_protocol::{encode_payload, Payload, ProtocolError, UpdateBatch};
use thiserror::Error;
use tokio::sync::mpsc::error::TrySendError;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::SnapshotStore;

#[derive(Debug, Error)]
pub enum HubError {
    #[error("hub coordinator is not running")]
    Closed,
    #[error(transparent)]
    Encode(#[from] ProtocolError),
    #[error("subscriber {id} rejected: mailbox could not take the snapshot")]
    RegistrationRejected { id: SubscriberId },
}

/// Hub-assigned subscriber identity. Never reused within one hub.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct SubscriberId(u64);

impl fmt::Display for SubscriberId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Creates a subscriber mailbox. Capacity is clamped to at least one slot.
pub fn mailbox(capacity: usize) -> (mpsc::Sender<Payload>, mpsc::Receiver<Payload>) {
    mpsc::channel(capacity.max(1))
}

#[derive(Clone, Debug)]
pub struct Registration {
    pub id: SubscriberId,
    /// Sequence of the snapshot replayed into the mailbox, if one existed.
    pub replayed_seq: Option<u64>,
    /// Cancelled once the hub drops this subscriber from its set, whatever
    /// the reason. Delivery tasks stuck on a stalled peer watch it to exit.
    pub removed: CancellationToken,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct PublishReport {
    pub seq: u64,
    pub delivered: usize,
    pub dropped: usize,
}

#[derive(Clone, Debug, Default, PartialEq)]
pub struct HubStatus {
    pub subscribers: usize,
    pub snapshot_seq: u64,
    pub published: u64,
    pub registered_total: u64,
    pub rejected: u64,
    pub dropped_slow: u64,
    pub last_publish_at: Option<SystemTime>,
}

enum HubCommand {
    Register {
        mailbox: mpsc::Sender<Payload>,
        reply: oneshot::Sender<Result<Registration, HubError>>,
    },
    Unregister {
        id: SubscriberId,
    },
    Publish {
        payload: Payload,
        updates: usize,
        reply: oneshot::Sender<PublishReport>,
    },
    Status {
        reply: oneshot::Sender<HubStatus>,
    },
}

/// Cloneable handle to the hub coordinator task.
#[derive(Clone, Debug)]
pub struct Hub {
    commands: mpsc::Sender<HubCommand>,
}

impl fmt::Debug for HubCommand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Register { .. } => f.write_str("Register"),
            Self::Unregister { id } => write!(f, "Unregister({id})"),
            Self::Publish { updates, .. } => write!(f, "Publish({updates} updates)"),
            Self::Status { .. } => f.write_str("Status"),
        }
    }
}

/// Starts the coordinator and returns a handle to it.
///
/// The coordinator stops when `shutdown` fires or every handle is dropped;
/// stopping drops all mailboxes, which ends every delivery task.
pub fn spawn_hub(shutdown: CancellationToken, command_buffer: usize) -> (Hub, JoinHandle<()>) {
    let (commands, receiver) = mpsc::channel(command_buffer.max(1));
    let task = tokio::spawn(run_coordinator(receiver, shutdown));
    (Hub { commands }, task)
}

impl Hub {
    /// Adds `mailbox` to the subscriber set, replaying the current snapshot
    /// into it before any later publish can reach it.
    pub async fn register(
        &self,
        mailbox: mpsc::Sender<Payload>,
    ) -> Result<Registration, HubError> {
        let (reply, response) = oneshot::channel();
        self.send(HubCommand::Register { mailbox, reply }).await?;
        response.await.map_err(|_| HubError::Closed)?
    }

    /// Removes a subscriber. Unknown or already removed ids are ignored.
    pub async fn unregister(&self, id: SubscriberId) {
        if self.send(HubCommand::Unregister { id }).await.is_err() {
            debug!(subscriber = %id, "hub closed before unregister");
        }
    }

    /// Serializes `batch` once and fans it out to every subscriber.
    pub async fn publish(&self, batch: &UpdateBatch) -> Result<PublishReport, HubError> {
        let payload = encode_payload(batch)?;
        self.publish_payload(payload, batch.len()).await
    }

    pub async fn publish_payload(
        &self,
        payload: Payload,
        updates: usize,
    ) -> Result<PublishReport, HubError> {
        let (reply, response) = oneshot::channel();
        self.send(HubCommand::Publish {
            payload,
            updates,
            reply,
        })
        .await?;
        response.await.map_err(|_| HubError::Closed)
    }

    pub async fn status(&self) -> Result<HubStatus, HubError> {
        let (reply, response) = oneshot::channel();
        self.send(HubCommand::Status { reply }).await?;
        response.await.map_err(|_| HubError::Closed)
    }

    async fn send(&self, command: HubCommand) -> Result<(), HubError> {
        self.commands.send(command).await.map_err(|_| HubError::Closed)
    }
}

async fn run_coordinator(mut commands: mpsc::Receiver<HubCommand>, shutdown: CancellationToken) {
    let mut state = HubState::default();

    loop {
        let command = tokio::select! {
            _ = shutdown.cancelled() => break,
            command = commands.recv() => match command {
                Some(command) => command,
                None => break,
            },
        };
        state.apply(command);
    }

    info!(
        subscribers = state.subscribers.len(),
        published = state.published,
        "hub coordinator stopped"
    );
    state.close();
}

struct Member {
    mailbox: mpsc::Sender<Payload>,
    removed: CancellationToken,
}

#[derive(Default)]
struct HubState {
    subscribers: BTreeMap<SubscriberId, Member>,
    snapshot: SnapshotStore,
    next_id: u64,
    published: u64,
    registered_total: u64,
    rejected: u64,
    dropped_slow: u64,
}

impl HubState {
    fn apply(&mut self, command: HubCommand) {
        match command {
            HubCommand::Register { mailbox, reply } => {
                let result = self.register(mailbox);
                // The caller gave up waiting; undo so the set stays accurate.
                if let Err(Ok(registration)) = reply.send(result) {
                    self.remove(registration.id);
                }
            }
            HubCommand::Unregister { id } => {
                if self.remove(id) {
                    info!(
                        subscriber = %id,
                        total = self.subscribers.len(),
                        "subscriber disconnected"
                    );
                }
            }
            HubCommand::Publish {
                payload,
                updates,
                reply,
            } => {
                let report = self.publish(payload, updates);
                let _ = reply.send(report);
            }
            HubCommand::Status { reply } => {
                let _ = reply.send(self.status());
            }
        }
    }

    fn register(&mut self, mailbox: mpsc::Sender<Payload>) -> Result<Registration, HubError> {
        self.next_id += 1;
        let id = SubscriberId(self.next_id);
        self.registered_total += 1;

        let mut replayed_seq = None;
        if let Some(snapshot) = self.snapshot.latest() {
            if let Err(err) = mailbox.try_send(snapshot.payload.clone()) {
                self.rejected += 1;
                warn!(
                    subscriber = %id,
                    reason = try_send_reason(&err),
                    "rejecting subscriber: snapshot replay failed"
                );
                return Err(HubError::RegistrationRejected { id });
            }
            replayed_seq = Some(snapshot.seq);
        }

        let removed = CancellationToken::new();
        self.subscribers.insert(
            id,
            Member {
                mailbox,
                removed: removed.clone(),
            },
        );
        info!(subscriber = %id, total = self.subscribers.len(), "subscriber connected");
        Ok(Registration {
            id,
            replayed_seq,
            removed,
        })
    }

    fn remove(&mut self, id: SubscriberId) -> bool {
        match self.subscribers.remove(&id) {
            Some(member) => {
                member.removed.cancel();
                true
            }
            None => false,
        }
    }

    fn close(&mut self) {
        for member in std::mem::take(&mut self.subscribers).into_values() {
            member.removed.cancel();
        }
    }

    fn publish(&mut self, payload: Payload, updates: usize) -> PublishReport {
        let seq = self.snapshot.replace(payload.clone());
        self.published += 1;

        let mut delivered = 0;
        let mut dropped = Vec::new();
        for (id, member) in &self.subscribers {
            match member.mailbox.try_send(payload.clone()) {
                Ok(()) => delivered += 1,
                Err(err) => dropped.push((*id, err)),
            }
        }

        for (id, err) in &dropped {
            self.remove(*id);
            if matches!(err, TrySendError::Full(_)) {
                self.dropped_slow += 1;
                warn!(
                    subscriber = %id,
                    total = self.subscribers.len(),
                    "dropping slow subscriber: mailbox full"
                );
            } else {
                info!(
                    subscriber = %id,
                    total = self.subscribers.len(),
                    "subscriber disconnected: mailbox closed"
                );
            }
        }

        debug!(seq, updates, delivered, dropped = dropped.len(), "published batch");
        PublishReport {
            seq,
            delivered,
            dropped: dropped.len(),
        }
    }

    fn status(&self) -> HubStatus {
        HubStatus {
            subscribers: self.subscribers.len(),
            snapshot_seq: self.snapshot.seq(),
            published: self.published,
            registered_total: self.registered_total,
            rejected: self.rejected,
            dropped_slow: self.dropped_slow,
            last_publish_at: self.snapshot.latest().map(|snapshot| snapshot.published_at),
        }
    }
}

fn try_send_reason<T>(err: &TrySendError<T>) -> &'static str {
    match err {
        TrySendError::Full(_) => "mailbox full",
        TrySendError::Closed(_) => "mailbox closed",
    }
}
