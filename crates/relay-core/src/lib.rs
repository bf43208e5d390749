mod hub;
mod ingest;
mod snapshot;
mod subscriber;

pub use hub::{
    mailbox, spawn_hub, Hub, HubError, HubStatus, PublishReport, Registration, SubscriberId,
};
pub use ingest::{run_ingest_adapter, spawn_ingest_listener, IngestOutcome};
pub use snapshot::{Snapshot, SnapshotStore};
pub use subscriber::{attach, InboundSignal, SubscriberHandle};
