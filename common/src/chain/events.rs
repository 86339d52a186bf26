//! On-chain event schema and the allow-listed, tagged variant the listener
//! dispatches over.

use crate::k8s::{HttpMethod, Priority};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// The raw JSON envelope every chain event arrives in, regardless of
/// transport (poll or push).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RawEvent {
    /// Fully-qualified Move name, e.g. `0x2::k8s_gateway::WorkerRegisteredEvent`.
    #[serde(rename = "type")]
    pub event_type: String,
    #[serde(rename = "packageId")]
    pub package_id: String,
    pub sender: String,
    #[serde(rename = "parsedJson")]
    pub parsed_json: Value,
    #[serde(rename = "timestampMs")]
    pub timestamp_ms: u64,
    #[serde(rename = "transactionDigest")]
    pub transaction_digest: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkerRegisteredEvent {
    pub node_id: String,
    pub owner: String,
    pub amount: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StakeDepositedEvent {
    pub staker_address: String,
    pub amount: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkerStatusChangedEvent {
    pub node_id: String,
    pub new_status: String,
    pub timestamp_ms: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct K8sApiRequestScheduledEvent {
    pub request_id: String,
    pub method: HttpMethod,
    pub path: String,
    pub namespace: String,
    pub resource_type: String,
    pub name: Option<String>,
    pub payload_b64: String,
    pub requester: String,
    pub seal_token_ref: String,
    pub priority: Priority,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkerAssignedEvent {
    pub request_id: String,
    pub node_id: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JoinTokenSetEvent {
    pub node_id: String,
    pub join_token: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct K8sApiResultEvent {
    pub request_id: String,
    pub status_code: u16,
    pub body_b64: String,
}

/// The exhaustively-handled tagged variant the dispatcher switches over.
/// An event type outside the allow-list is never constructed here; the
/// caller logs and skips it instead.
#[derive(Debug, Clone)]
pub enum ChainEvent {
    WorkerRegistered { digest: String, timestamp_ms: u64, event: WorkerRegisteredEvent },
    StakeDeposited { digest: String, timestamp_ms: u64, event: StakeDepositedEvent },
    WorkerStatusChanged { digest: String, timestamp_ms: u64, event: WorkerStatusChangedEvent },
    K8sApiRequestScheduled { digest: String, timestamp_ms: u64, event: K8sApiRequestScheduledEvent },
    WorkerAssigned { digest: String, timestamp_ms: u64, event: WorkerAssignedEvent },
    JoinTokenSet { digest: String, timestamp_ms: u64, event: JoinTokenSetEvent },
    K8sApiResult { digest: String, timestamp_ms: u64, event: K8sApiResultEvent },
}

impl ChainEvent {
    pub fn timestamp_ms(&self) -> u64 {
        match self {
            ChainEvent::WorkerRegistered { timestamp_ms, .. }
            | ChainEvent::StakeDeposited { timestamp_ms, .. }
            | ChainEvent::WorkerStatusChanged { timestamp_ms, .. }
            | ChainEvent::K8sApiRequestScheduled { timestamp_ms, .. }
            | ChainEvent::WorkerAssigned { timestamp_ms, .. }
            | ChainEvent::JoinTokenSet { timestamp_ms, .. }
            | ChainEvent::K8sApiResult { timestamp_ms, .. } => *timestamp_ms,
        }
    }

    pub fn digest(&self) -> &str {
        match self {
            ChainEvent::WorkerRegistered { digest, .. }
            | ChainEvent::StakeDeposited { digest, .. }
            | ChainEvent::WorkerStatusChanged { digest, .. }
            | ChainEvent::K8sApiRequestScheduled { digest, .. }
            | ChainEvent::WorkerAssigned { digest, .. }
            | ChainEvent::JoinTokenSet { digest, .. }
            | ChainEvent::K8sApiResult { digest, .. } => digest,
        }
    }
}

/// The allow-list of fully-qualified event-type suffixes the listener
/// accepts.
const ALLOWED_EVENT_SUFFIXES: &[&str] = &[
    "WorkerRegisteredEvent",
    "StakeDepositedEvent",
    "WorkerStatusChangedEvent",
    "K8sAPIRequestScheduledEvent",
    "WorkerAssignedEvent",
    "JoinTokenSetEvent",
    "K8sAPIResultEvent",
];

/// Whether `event_type` (a fully-qualified Move name) is one the listener
/// recognizes at all, irrespective of module filtering.
pub fn is_allow_listed(event_type: &str) -> bool {
    ALLOWED_EVENT_SUFFIXES.iter().any(|suffix| event_type.ends_with(suffix))
}

/// Parse a [`RawEvent`] into the tagged [`ChainEvent`] variant. Returns
/// `Ok(None)` for an event type outside the allow-list — the caller logs and
/// skips, it is never a hard error.
pub fn parse_event(raw: &RawEvent) -> Result<Option<ChainEvent>, serde_json::Error> {
    let digest = raw.transaction_digest.clone();
    let timestamp_ms = raw.timestamp_ms;

    macro_rules! parsed {
        ($variant:ident) => {
            Ok(Some(ChainEvent::$variant {
                digest,
                timestamp_ms,
                event: serde_json::from_value(raw.parsed_json.clone())?,
            }))
        };
    }

    if raw.event_type.ends_with("WorkerRegisteredEvent") {
        parsed!(WorkerRegistered)
    } else if raw.event_type.ends_with("StakeDepositedEvent") {
        parsed!(StakeDeposited)
    } else if raw.event_type.ends_with("WorkerStatusChangedEvent") {
        parsed!(WorkerStatusChanged)
    } else if raw.event_type.ends_with("K8sAPIRequestScheduledEvent") {
        parsed!(K8sApiRequestScheduled)
    } else if raw.event_type.ends_with("WorkerAssignedEvent") {
        parsed!(WorkerAssigned)
    } else if raw.event_type.ends_with("JoinTokenSetEvent") {
        parsed!(JoinTokenSet)
    } else if raw.event_type.ends_with("K8sAPIResultEvent") {
        parsed!(K8sApiResult)
    } else {
        Ok(None)
    }
}

/// Sort a batch of events in the dispatch order required by
/// Ascending timestamp, ties broken by transaction digest.
pub fn sort_for_dispatch(events: &mut [ChainEvent]) {
    events.sort_by(|a, b| a.timestamp_ms().cmp(&b.timestamp_ms()).then_with(|| a.digest().cmp(b.digest())));
}
