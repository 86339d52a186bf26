//! Shared types and chain plumbing for the blockchain-authenticated Kubernetes bridge.
//!
//! This crate has no binary of its own; it is the shared foundation consumed
//! by the `bridge` crate's `gateway`, `worker` and `validate` subcommands.

pub mod chain;
pub mod config;
pub mod crypto;
pub mod k8s;
pub mod seal_token;
pub mod stake;
pub mod status;

pub use chain::{ChainClient, ChainClientError, ChainEvent};
pub use k8s::{K8sApiRequest, K8sApiResponse};
pub use seal_token::{SealToken, SealTokenError};
pub use stake::{CapabilitySet, StakeRecord, StakeStatus, StakeType, Tier};
pub use status::KubeStatus;
