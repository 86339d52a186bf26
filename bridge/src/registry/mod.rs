//! Worker Registry: worker lifecycle,
//! join-token custody and least-loaded worker selection. Backed by a
//! sharded concurrent map so readers on unrelated node-ids never block
//! writers.

use bridge_common::crypto::WalletAddress;
use dashmap::DashMap;
use log::{info, warn};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};
use thiserror::Error;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkerStatus {
    Pending,
    Active,
    Busy,
    Offline,
    Slashed,
}

#[derive(Error, Debug, PartialEq, Eq)]
pub enum RegistryError {
    #[error("worker {0} is already registered and not offline")]
    ConflictingWorker(String),
    #[error("stake amount is below the minimum required to register a worker node")]
    InsufficientStake,
    #[error("worker {0} is not known to the registry")]
    UnknownWorker(String),
    #[error("worker {0} is slashed and permanently unavailable for re-registration")]
    PermanentlySlashed(String),
    #[error("join token for {0} can only be assigned while the worker is pending")]
    NotPending(String),
    #[error("invalid status transition for {node_id}: {from:?} -> {to:?}")]
    InvalidTransition { node_id: String, from: WorkerStatus, to: WorkerStatus },
}

pub struct Worker {
    pub node_id: String,
    pub owner: WalletAddress,
    pub stake_amount: u64,
    pub join_token: Option<String>,
    pub status: WorkerStatus,
    pub last_heartbeat: Option<Instant>,
    pub offline_since: Option<Instant>,
    inflight_requests: AtomicU64,
}

impl Worker {
    pub fn inflight_count(&self) -> u64 {
        self.inflight_requests.load(Ordering::SeqCst)
    }
}

/// A lock-free snapshot of a worker's state, safe to hand to callers without
/// exposing the opaque join token: the token is never logged or returned
/// except to the worker's owner.
#[derive(Debug, Clone)]
pub struct WorkerSummary {
    pub node_id: String,
    pub owner: WalletAddress,
    pub stake_amount: u64,
    pub status: WorkerStatus,
    pub has_join_token: bool,
    pub inflight_requests: u64,
}

pub struct WorkerRegistry {
    workers: DashMap<String, Worker>,
    stake_min_node_units: u64,
}

impl WorkerRegistry {
    pub fn new(stake_min_node_units: u64) -> Self {
        Self { workers: DashMap::new(), stake_min_node_units }
    }

    pub fn register(&self, node_id: &str, owner: WalletAddress, amount: u64) -> Result<(), RegistryError> {
        if amount < self.stake_min_node_units {
            return Err(RegistryError::InsufficientStake);
        }

        if let Some(existing) = self.workers.get(node_id) {
            if existing.status == WorkerStatus::Slashed {
                return Err(RegistryError::PermanentlySlashed(node_id.to_string()));
            }
            if existing.status != WorkerStatus::Offline {
                return Err(RegistryError::ConflictingWorker(node_id.to_string()));
            }
        }

        self.workers.insert(
            node_id.to_string(),
            Worker {
                node_id: node_id.to_string(),
                owner,
                stake_amount: amount,
                join_token: None,
                status: WorkerStatus::Pending,
                last_heartbeat: None,
                offline_since: None,
                inflight_requests: AtomicU64::new(0),
            },
        );
        info!("registered worker {node_id} pending activation");
        Ok(())
    }

    /// Idempotent: assigning the same token to an already-pending worker a
    /// second time is a no-op, matching the at-least-once delivery
    /// guarantee for `JoinTokenSetEvent` delivery.
    pub fn assign_join_token(&self, node_id: &str, token: String) -> Result<(), RegistryError> {
        let mut worker = self.workers.get_mut(node_id).ok_or_else(|| RegistryError::UnknownWorker(node_id.to_string()))?;
        if worker.status != WorkerStatus::Pending {
            if worker.join_token.as_deref() == Some(token.as_str()) {
                return Ok(());
            }
            return Err(RegistryError::NotPending(node_id.to_string()));
        }
        worker.join_token = Some(token);
        Ok(())
    }

    /// Record a signed heartbeat; transitions `pending -> active` on the
    /// first heartbeat once a join token is present.
    pub fn record_heartbeat(&self, node_id: &str, at: Instant) -> Result<(), RegistryError> {
        let mut worker = self.workers.get_mut(node_id).ok_or_else(|| RegistryError::UnknownWorker(node_id.to_string()))?;
        worker.last_heartbeat = Some(at);
        if worker.status == WorkerStatus::Pending && worker.join_token.is_some() {
            worker.status = WorkerStatus::Active;
            worker.offline_since = None;
            info!("worker {node_id} activated on first heartbeat");
        } else if worker.status == WorkerStatus::Offline {
            // Converging source: a heartbeat observed after an offline
            // transition brings the worker back without requiring a
            // matching on-chain status-change event.
            worker.status = WorkerStatus::Active;
            worker.offline_since = None;
        }
        Ok(())
    }

    /// Idempotent on `(node_id, new_status)`: replaying an identical
    /// transition is a no-op.
    pub fn update_status(&self, node_id: &str, new_status: WorkerStatus) -> Result<(), RegistryError> {
        let mut worker = self.workers.get_mut(node_id).ok_or_else(|| RegistryError::UnknownWorker(node_id.to_string()))?;
        if worker.status == new_status {
            return Ok(());
        }

        let allowed = match (worker.status, new_status) {
            (WorkerStatus::Pending, WorkerStatus::Active) => worker.join_token.is_some(),
            (WorkerStatus::Active, WorkerStatus::Busy) | (WorkerStatus::Busy, WorkerStatus::Active) => true,
            (WorkerStatus::Slashed, _) => false,
            (_, WorkerStatus::Offline) => true,
            (_, WorkerStatus::Slashed) => true,
            _ => false,
        };

        if !allowed {
            return Err(RegistryError::InvalidTransition { node_id: node_id.to_string(), from: worker.status, to: new_status });
        }

        worker.status = new_status;
        worker.offline_since = if new_status == WorkerStatus::Offline { Some(Instant::now()) } else { None };
        Ok(())
    }

    pub fn summary(&self, node_id: &str) -> Option<WorkerSummary> {
        self.workers.get(node_id).map(|w| WorkerSummary {
            node_id: w.node_id.clone(),
            owner: w.owner,
            stake_amount: w.stake_amount,
            status: w.status,
            has_join_token: w.join_token.is_some(),
            inflight_requests: w.inflight_count(),
        })
    }

    /// Among `active` workers, pick the least-loaded, ties broken by
    /// highest stake.
    pub fn pick_worker(&self) -> Option<String> {
        self.workers
            .iter()
            .filter(|entry| entry.status == WorkerStatus::Active)
            .min_by(|a, b| {
                a.inflight_count()
                    .cmp(&b.inflight_count())
                    .then_with(|| b.stake_amount.cmp(&a.stake_amount))
            })
            .map(|entry| entry.node_id.clone())
    }

    pub fn begin_dispatch(&self, node_id: &str) {
        if let Some(worker) = self.workers.get(node_id) {
            worker.inflight_requests.fetch_add(1, Ordering::SeqCst);
        }
    }

    pub fn end_dispatch(&self, node_id: &str) {
        if let Some(worker) = self.workers.get(node_id) {
            worker.inflight_requests.fetch_sub(1, Ordering::SeqCst);
        }
    }

    /// Local timer source for the offline transition: a
    /// worker whose last heartbeat is older than `heartbeat_timeout` moves
    /// offline even without an on-chain status-change event.
    pub fn sweep_heartbeat_timeouts(&self, now: Instant, heartbeat_timeout: Duration) {
        for mut entry in self.workers.iter_mut() {
            if matches!(entry.status, WorkerStatus::Active | WorkerStatus::Busy) {
                if let Some(last) = entry.last_heartbeat {
                    if now.saturating_duration_since(last) > heartbeat_timeout {
                        warn!("worker {} missed heartbeat, marking offline", entry.node_id);
                        entry.status = WorkerStatus::Offline;
                        entry.offline_since = Some(now);
                    }
                }
            }
        }
    }

    /// Purge offline workers that never returned to `active` within
    /// `remove_after`.
    pub fn purge_stale_offline(&self, now: Instant, remove_after: Duration) {
        self.workers.retain(|_, worker| {
            !(worker.status == WorkerStatus::Offline
                && worker.offline_since.is_some_and(|since| now.saturating_duration_since(since) > remove_after))
        });
    }

    pub fn len(&self) -> usize {
        self.workers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.workers.is_empty()
    }
}
