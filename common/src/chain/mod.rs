//! South-bound chain plumbing: JSON-RPC client, event schema and contract
//! ABI builders.

pub mod abi;
pub mod client;
pub mod events;

pub use abi::ContractCall;
pub use client::{ChainClient, ChainClientError, EventPage, JsonRpcChainClient, TxResult};
pub use events::{parse_event, sort_for_dispatch, ChainEvent, RawEvent};
