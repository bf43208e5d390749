use std::time::SystemTime;

use relay_protocol::Payload;

/// Most recently published payload, tagged with its publish sequence.
#[derive(Clone, Debug)]
pub struct Snapshot {
    pub seq: u64,
    pub payload: Payload,
    pub published_at: SystemTime,
}

/// Holds at most one snapshot; every publish overwrites the previous one.
#[derive(Debug, Default)]
pub struct SnapshotStore {
    latest: Option<Snapshot>,
    seq: u64,
}

impl SnapshotStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Stores `payload` as the new snapshot and returns its sequence number.
    pub fn replace(&mut self, payload: Payload) -> u64 {
        self.seq += 1;
        self.latest = Some(Snapshot {
            seq: self.seq,
            payload,
            published_at: SystemTime::now(),
        });
        self.seq
    }

    pub fn latest(&self) -> Option<&Snapshot> {
        self.latest.as_ref()
    }

    /// Sequence of the current snapshot, 0 before the first publish.
    pub fn seq(&self) -> u64 {
        self.seq
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_until_first_replace() {
        let store = SnapshotStore::new();
        assert!(store.latest().is_none());
        assert_eq!(store.seq(), 0);
    }

    #[test]
    fn replace_overwrites_and_bumps_sequence() {
        let mut store = SnapshotStore::new();
        let first = Payload::from_text("[1]");
        let second = Payload::from_text("[2]");

        assert_eq!(store.replace(first), 1);
        assert_eq!(store.replace(second.clone()), 2);

        let latest = store.latest().expect("snapshot");
        assert_eq!(latest.seq, 2);
        assert!(latest.payload.ptr_eq(&second));
    }
}
