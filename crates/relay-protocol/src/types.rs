use std::fmt;

use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ProtocolError {
    #[error("failed to encode update payload: {0}")]
    Encode(serde_json::Error),
    #[error("failed to decode update payload: {0}")]
    Decode(serde_json::Error),
    #[error("update {index} has empty {field}")]
    MissingField { index: usize, field: &'static str },
    #[error("update {id} has non-finite {field}")]
    NonFinite { id: String, field: &'static str },
}

/// Revision of the update schema a value conforms to.
///
/// Early producers only sent identity and price; `V2` added the 24h change.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SchemaVersion {
    V1,
    V2,
}

impl SchemaVersion {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::V1 => "v1",
            Self::V2 => "v2",
        }
    }
}

impl fmt::Display for SchemaVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One instrument's latest market state as produced by the upstream fetcher.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Update {
    pub id: String,
    pub symbol: String,
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image: Option<String>,
    #[serde(alias = "currentPrice")]
    pub current_price: f64,
    #[serde(
        default,
        alias = "priceChange24h",
        skip_serializing_if = "Option::is_none"
    )]
    pub price_change_24h: Option<f64>,
}

impl Update {
    pub fn new(
        id: impl Into<String>,
        symbol: impl Into<String>,
        name: impl Into<String>,
        current_price: f64,
    ) -> Self {
        Self {
            id: id.into(),
            symbol: symbol.into(),
            name: name.into(),
            image: None,
            current_price,
            price_change_24h: None,
        }
    }

    pub fn with_image(mut self, image: impl Into<String>) -> Self {
        self.image = Some(image.into());
        self
    }

    pub fn with_price_change_24h(mut self, change: f64) -> Self {
        self.price_change_24h = Some(change);
        self
    }

    pub fn image_or_empty(&self) -> &str {
        self.image.as_deref().unwrap_or_default()
    }

    pub fn price_change_24h_or_zero(&self) -> f64 {
        self.price_change_24h.unwrap_or(0.0)
    }

    pub fn schema_version(&self) -> SchemaVersion {
        if self.price_change_24h.is_some() {
            SchemaVersion::V2
        } else {
            SchemaVersion::V1
        }
    }
}

/// Updates produced atomically by one ingest cycle, in producer order.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct UpdateBatch {
    #[serde(default)]
    pub updates: Vec<Update>,
}

impl UpdateBatch {
    pub fn new(updates: Vec<Update>) -> Self {
        Self { updates }
    }

    pub fn len(&self) -> usize {
        self.updates.len()
    }

    pub fn is_empty(&self) -> bool {
        self.updates.is_empty()
    }

    pub fn iter(&self) -> std::slice::Iter<'_, Update> {
        self.updates.iter()
    }

    /// Highest schema revision present in the batch, `None` when empty.
    pub fn schema_version(&self) -> Option<SchemaVersion> {
        self.updates.iter().map(Update::schema_version).max()
    }

    pub fn validate(&self) -> Result<(), ProtocolError> {
        for (index, update) in self.updates.iter().enumerate() {
            if update.id.trim().is_empty() {
                return Err(ProtocolError::MissingField { index, field: "id" });
            }
            if update.symbol.trim().is_empty() {
                return Err(ProtocolError::MissingField {
                    index,
                    field: "symbol",
                });
            }
            if !update.current_price.is_finite() {
                return Err(ProtocolError::NonFinite {
                    id: update.id.clone(),
                    field: "current_price",
                });
            }
            if update
                .price_change_24h
                .is_some_and(|change| !change.is_finite())
            {
                return Err(ProtocolError::NonFinite {
                    id: update.id.clone(),
                    field: "price_change_24h",
                });
            }
        }
        Ok(())
    }
}

impl From<Vec<Update>> for UpdateBatch {
    fn from(updates: Vec<Update>) -> Self {
        Self::new(updates)
    }
}

impl<'a> IntoIterator for &'a UpdateBatch {
    type Item = &'a Update;
    type IntoIter = std::slice::Iter<'a, Update>;

    fn into_iter(self) -> Self::IntoIter {
        self.updates.iter()
    }
}

/// Empty success response sent back to a producer after a clean end of stream.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct IngestAck {}
