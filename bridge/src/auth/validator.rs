//! Stake Validator: translates a wallet address into a
//! capability set, with a bounded-TTL cache and single-flight coalescing of
//! concurrent lookups for the same wallet.

use bridge_common::chain::{ChainClient, ChainClientError};
use bridge_common::crypto::WalletAddress;
use bridge_common::stake::{CapabilitySet, StakeStatus, TierThresholds};
use dashmap::DashMap;
use log::warn;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use thiserror::Error;
use tokio::sync::Mutex as AsyncMutex;

#[derive(Error, Debug)]
pub enum StakeError {
    #[error("wallet holds {amount_tokens} tokens, which is below the required minimum of {required_tokens}")]
    InsufficientStake { amount_tokens: f64, required_tokens: f64 },
    #[error("chain is unavailable: {0}")]
    ChainUnavailable(#[from] ChainClientError),
}

#[derive(Debug, Clone)]
struct CacheEntry {
    capabilities: CapabilitySet,
    amount: u64,
    valid_until: Instant,
}

/// A monotonic clock abstraction so cache TTL tests don't depend on real
/// wall-clock sleeps. Production code uses [`Instant::now`] via `SystemClock`.
pub trait Clock: Send + Sync {
    fn now(&self) -> Instant;
}

pub struct SystemClock;
impl Clock for SystemClock {
    fn now(&self) -> Instant {
        Instant::now()
    }
}

pub struct StakeValidator {
    chain: Arc<dyn ChainClient>,
    clock: Arc<dyn Clock>,
    cache: DashMap<WalletAddress, CacheEntry>,
    inflight: DashMap<WalletAddress, Arc<AsyncMutex<()>>>,
    thresholds: TierThresholds,
    cache_ttl: Duration,
    stale_grace: Duration,
    chain_queries: AtomicU64,
}

impl StakeValidator {
    pub fn new(chain: Arc<dyn ChainClient>, thresholds: TierThresholds, cache_ttl: Duration, stale_grace: Duration) -> Self {
        Self::with_clock(chain, Arc::new(SystemClock), thresholds, cache_ttl, stale_grace)
    }

    pub fn with_clock(
        chain: Arc<dyn ChainClient>,
        clock: Arc<dyn Clock>,
        thresholds: TierThresholds,
        cache_ttl: Duration,
        stale_grace: Duration,
    ) -> Self {
        Self {
            chain,
            clock,
            cache: DashMap::new(),
            inflight: DashMap::new(),
            thresholds,
            cache_ttl,
            stale_grace,
            chain_queries: AtomicU64::new(0),
        }
    }

    /// Number of chain queries actually issued; exposed for single-flight
    /// coalescing tests.
    pub fn chain_query_count(&self) -> u64 {
        self.chain_queries.load(Ordering::SeqCst)
    }

    /// Validate `wallet` and return its capability set, failing with
    /// `InsufficientStake` if its amount is below `required_min_units`
    /// (smallest on-chain units).
    pub async fn validate(&self, wallet: WalletAddress, required_min_units: u64) -> Result<(CapabilitySet, u64), StakeError> {
        if let Some(entry) = self.fresh_cache_entry(&wallet) {
            return self.check_minimum(entry.capabilities, entry.amount, required_min_units);
        }

        let lock = self
            .inflight
            .entry(wallet)
            .or_insert_with(|| Arc::new(AsyncMutex::new(())))
            .clone();
        let _guard = lock.lock().await;

        // Another task may have refreshed the cache while we waited.
        if let Some(entry) = self.fresh_cache_entry(&wallet) {
            return self.check_minimum(entry.capabilities, entry.amount, required_min_units);
        }

        let result = self.refresh(wallet).await;
        self.inflight.remove(&wallet);
        let entry = result?;
        self.check_minimum(entry.capabilities, entry.amount, required_min_units)
    }

    fn fresh_cache_entry(&self, wallet: &WalletAddress) -> Option<CacheEntry> {
        self.cache.get(wallet).and_then(|entry| {
            if self.clock.now() <= entry.valid_until {
                Some(entry.clone())
            } else {
                None
            }
        })
    }

    fn check_minimum(&self, capabilities: CapabilitySet, amount: u64, required_min_units: u64) -> Result<(CapabilitySet, u64), StakeError> {
        if amount < required_min_units {
            return Err(StakeError::InsufficientStake {
                amount_tokens: amount as f64 / bridge_common::config::COIN_VALUE as f64,
                required_tokens: required_min_units as f64 / bridge_common::config::COIN_VALUE as f64,
            });
        }
        Ok((capabilities, amount))
    }

    async fn refresh(&self, wallet: WalletAddress) -> Result<CacheEntry, StakeError> {
        match self.query_chain(&wallet).await {
            Ok(entry) => {
                self.cache.insert(wallet, entry.clone());
                Ok(entry)
            }
            Err(err) => {
                warn!("stake query for {wallet} failed after retries: {err}");
                if let Some(stale) = self.cache.get(&wallet) {
                    let grace_deadline = stale.valid_until + self.stale_grace;
                    if self.clock.now() <= grace_deadline {
                        warn!("serving stale stake cache entry for {wallet} within grace period");
                        return Ok(stale.clone());
                    }
                }
                Err(StakeError::ChainUnavailable(err))
            }
        }
    }

    async fn query_chain(&self, wallet: &WalletAddress) -> Result<CacheEntry, ChainClientError> {
        self.chain_queries.fetch_add(1, Ordering::SeqCst);
        let records = self.chain.get_owned_objects(&wallet.to_hex()).await?;
        let amount: u64 = records
            .iter()
            .filter(|r| matches!(r.status, StakeStatus::Active))
            .map(|r| r.amount)
            .sum();
        let capabilities = CapabilitySet::from_amount(amount, &self.thresholds);
        Ok(CacheEntry { capabilities, amount, valid_until: self.clock.now() + self.cache_ttl })
    }
}
