use std::fmt;
use std::sync::Arc;

use crate::{ProtocolError, Update, UpdateBatch};

/// Serialized batch shared by every mailbox it is delivered to.
///
/// Cloning is a reference-count bump, so every subscriber sees the same bytes.
#[derive(Clone, PartialEq, Eq, Hash)]
pub struct Payload(Arc<str>);

impl Payload {
    pub fn from_text(text: impl Into<Arc<str>>) -> Self {
        Self(text.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn as_bytes(&self) -> &[u8] {
        self.0.as_bytes()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn ptr_eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.0, &other.0)
    }
}

impl fmt::Debug for Payload {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Payload").field("len", &self.len()).finish()
    }
}

impl fmt::Display for Payload {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Encodes a batch the way subscribers receive it: a bare JSON array.
pub fn encode_payload(batch: &UpdateBatch) -> Result<Payload, ProtocolError> {
    let text = serde_json::to_string(&batch.updates).map_err(ProtocolError::Encode)?;
    Ok(Payload::from_text(text))
}

pub fn decode_payload(raw: &str) -> Result<Vec<Update>, ProtocolError> {
    serde_json::from_str(raw).map_err(ProtocolError::Decode)
}

pub fn decode_batch(raw: &[u8]) -> Result<UpdateBatch, ProtocolError> {
    serde_json::from_slice(raw).map_err(ProtocolError::Decode)
}
