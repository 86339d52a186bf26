//! On-chain K8s request/response payloads and the verb
//! vocabulary the gateway parser and the dispatcher both speak.

use serde::{Deserialize, Serialize};
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum HttpMethod {
    Get,
    Post,
    Put,
    Patch,
    Delete,
}

impl fmt::Display for HttpMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            HttpMethod::Get => "GET",
            HttpMethod::Post => "POST",
            HttpMethod::Put => "PUT",
            HttpMethod::Patch => "PATCH",
            HttpMethod::Delete => "DELETE",
        };
        write!(f, "{s}")
    }
}

/// A kubectl verb recognized by the gateway parser.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Verb {
    Get,
    List,
    Watch,
    Create,
    Apply,
    Update,
    Patch,
    Delete,
    Logs,
    Exec,
}

impl Verb {
    /// The RBAC action a capability check should be made against. Several
    /// verbs share an action because they carry the same authorization
    /// weight (e.g. `create`/`apply`/`update` are all mutating writes).
    pub fn capability_action(self) -> &'static str {
        match self {
            Verb::Get | Verb::List | Verb::Watch | Verb::Logs => "read",
            Verb::Create | Verb::Apply | Verb::Update | Verb::Patch | Verb::Exec => "write",
            Verb::Delete => "write",
        }
    }

    /// Whether this verb must be routed through chain mode even under the
    /// `hybrid` mode selection: everything but reads routes to chain.
    pub fn is_mutating(self) -> bool {
        !matches!(self, Verb::Get | Verb::List | Verb::Watch | Verb::Logs)
    }

    pub fn http_method(self) -> HttpMethod {
        match self {
            Verb::Get | Verb::List | Verb::Watch | Verb::Logs => HttpMethod::Get,
            Verb::Create | Verb::Apply => HttpMethod::Post,
            Verb::Update => HttpMethod::Put,
            Verb::Patch => HttpMethod::Patch,
            Verb::Delete => HttpMethod::Delete,
            Verb::Exec => HttpMethod::Post,
        }
    }
}

/// A request parsed out of an incoming kubectl-style HTTP call.
#[derive(Debug, Clone)]
pub struct ParsedRequest {
    pub verb: Verb,
    pub resource: String,
    pub namespace: String,
    pub name: Option<String>,
    pub options: std::collections::HashMap<String, String>,
    pub payload: Vec<u8>,
}

/// An on-chain `K8sAPIRequest` event payload.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct K8sApiRequest {
    pub request_id: String,
    pub method: HttpMethod,
    pub path: String,
    pub namespace: String,
    pub resource_type: String,
    pub name: Option<String>,
    #[serde(with = "base64_bytes")]
    pub payload: Vec<u8>,
    pub requester: String,
    pub seal_token_ref: String,
    pub timestamp_ms: u64,
    pub priority: Priority,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[repr(u8)]
pub enum Priority {
    Low = 1,
    Normal = 2,
    High = 3,
}

/// An on-chain `K8sAPIResponse` record, TTL-bounded.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct K8sApiResponse {
    pub request_id: String,
    pub status_code: u16,
    #[serde(with = "base64_bytes")]
    pub body: Vec<u8>,
    pub processed_at_ms: u64,
    pub expires_at_ms: u64,
}

impl K8sApiResponse {
    pub fn is_expired(&self, now_ms: u64) -> bool {
        now_ms > self.expires_at_ms
    }
}

mod base64_bytes {
    use base64::{engine::general_purpose::STANDARD, Engine};
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(bytes: &[u8], serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&STANDARD.encode(bytes))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<u8>, D::Error> {
        let s = String::deserialize(deserializer)?;
        STANDARD.decode(s.as_bytes()).map_err(serde::de::Error::custom)
    }
}
