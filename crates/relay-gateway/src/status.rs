use std::time::{Duration, SystemTime};

use axum::extract::State;
use axum::http::StatusCode;
use axum::Json;
use relay_core::HubStatus;
use serde::{Deserialize, Serialize};
use time::format_description::well_known::Rfc3339;
use time::OffsetDateTime;

use crate::GatewayState;

/// JSON body of the status route.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatusBody {
    pub subscribers: usize,
    pub snapshot_seq: u64,
    pub published: u64,
    pub registered_total: u64,
    pub rejected: u64,
    pub dropped_slow: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_publish_at: Option<String>,
}

impl From<HubStatus> for StatusBody {
    fn from(status: HubStatus) -> Self {
        Self {
            subscribers: status.subscribers,
            snapshot_seq: status.snapshot_seq,
            published: status.published,
            registered_total: status.registered_total,
            rejected: status.rejected,
            dropped_slow: status.dropped_slow,
            last_publish_at: status.last_publish_at.map(format_timestamp),
        }
    }
}

pub(crate) async fn status(
    State(state): State<GatewayState>,
) -> Result<Json<StatusBody>, StatusCode> {
    state
        .hub
        .status()
        .await
        .map(|status| Json(status.into()))
        .map_err(|_| StatusCode::SERVICE_UNAVAILABLE)
}

fn format_timestamp(ts: SystemTime) -> String {
    let duration = ts
        .duration_since(SystemTime::UNIX_EPOCH)
        .unwrap_or_else(|_| Duration::from_secs(0));
    OffsetDateTime::from_unix_timestamp_nanos(duration.as_nanos() as i128)
        .ok()
        .and_then(|value| value.format(&Rfc3339).ok())
        .unwrap_or_else(|| "1970-01-01T00:00:00Z".to_string())
}
