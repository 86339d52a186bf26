//! Default tunables shared between the gateway, the worker agent and the
//! chain client. Mirrors the `const fn default_x() -> T` convention used for
//! the discovery protocol's configuration.

use std::time::Duration;

/// 1 whole token in smallest on-chain units (MIST).
pub const COIN_VALUE: u64 = 1_000_000_000;

/// `T_stake`: how long a stake validation cache entry stays fresh.
pub const fn default_stake_cache_ttl() -> Duration {
    Duration::from_secs(5 * 60)
}

/// `T_challenge`: maximum allowed clock skew for a seal-token challenge.
pub const fn default_challenge_ttl() -> Duration {
    Duration::from_secs(5 * 60)
}

/// `T_stale_grace`: how long a stale cache entry may still be served after
/// `ChainUnavailable`.
pub const fn default_stale_grace() -> Duration {
    Duration::from_secs(60)
}

/// `T_chain_roundtrip`: how long the gateway blocks on a chain-mode request.
pub const fn default_request_timeout() -> Duration {
    Duration::from_secs(30)
}

/// `T_response_ttl`: how long an on-chain `K8sAPIResponse` record stays valid.
pub const fn default_response_ttl() -> Duration {
    Duration::from_secs(5 * 60)
}

/// `T_hb_timeout`: a worker with no heartbeat for this long is moved offline.
pub const fn default_heartbeat_timeout() -> Duration {
    Duration::from_secs(90)
}

/// `T_remove`: an offline worker record is purged after this much additional
/// time without returning to `active`.
pub const fn default_worker_remove_after() -> Duration {
    Duration::from_secs(60 * 60)
}

/// `T_poll`: polling cadence used by the chain event listener's poll mode.
pub const fn default_poll_interval() -> Duration {
    Duration::from_secs(2)
}

/// `T_sweep`: sweep interval for the response correlator's expiry scan.
pub const fn default_correlator_sweep_interval() -> Duration {
    Duration::from_secs(10)
}

/// `T_drain`: maximum graceful shutdown drain window.
pub const fn default_drain_timeout() -> Duration {
    Duration::from_secs(30)
}

/// `N_retry`: attempts for chain RPC calls before surfacing `ChainUnavailable`.
pub const DEFAULT_CHAIN_RETRIES: u32 = 3;

/// Exponential backoff schedule used by the stake validator and the
/// dispatcher's chain-response retry path: 100ms, 300ms, 900ms, ...
pub fn backoff_delay(attempt: u32) -> Duration {
    let base_ms = 100u64;
    Duration::from_millis(base_ms.saturating_mul(3u64.saturating_pow(attempt)))
}

/// `P_inflight`: max concurrent kubectl dispatches per worker.
pub const DEFAULT_MAX_INFLIGHT: usize = 16;

/// `Q_max`: max queued, undispatched chain events before the listener
/// applies back-pressure.
pub const DEFAULT_QUEUE_MAX: usize = 1024;

/// Default bound on a chain-mode request payload before the gateway rejects
/// it with HTTP 413 rather than store an unbounded payload on chain.
pub const DEFAULT_MAX_PAYLOAD_BYTES: usize = 256 * 1024;

/// Default minimum stake (in whole tokens) to register as a worker node.
pub const DEFAULT_STAKE_MIN_NODE_TOKENS: f64 = 1.0;

/// Default minimum stake (in whole tokens) to hold any K8s capability at all.
pub const DEFAULT_STAKE_MIN_USER_TOKENS: f64 = 0.5;

/// Default minimum stake (in whole tokens) for the admin-all tier.
pub const DEFAULT_STAKE_MIN_ADMIN_TOKENS: f64 = 10.0;
