//! On-chain stake records and the derived RBAC capability sets: translating
//! a stake amount into a tier and the set of resource:action pairs it grants.

use crate::config::COIN_VALUE;
use crate::crypto::WalletAddress;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum StakeStatus {
    Active,
    Slashed,
    Withdrawn,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum StakeType {
    Node,
    User,
    Admin,
}

/// An on-chain stake entity as reported by `getOwnedObjects`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StakeRecord {
    pub staker_address: WalletAddress,
    pub node_id: Option<String>,
    pub amount: u64,
    pub status: StakeStatus,
    pub stake_type: StakeType,
}

/// A stake tier: an amount threshold that grants a specific capability set.
/// Ordered so that `Tier::from_amount` always returns the highest tier the
/// amount qualifies for, and so that tiers compare by strength.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Tier {
    Unauthenticated,
    Reader,
    User,
    Operator,
    AdminAll,
}

/// Thresholds (in whole tokens) used to map a stake amount to a [`Tier`].
/// `stake_min_node` does not gate a tier directly — it gates worker
/// *registration* — but is carried here so a single config struct can own
/// every stake threshold.
#[derive(Debug, Clone, Copy)]
pub struct TierThresholds {
    pub reader_min_tokens: f64,
    pub user_min_tokens: f64,
    pub operator_min_tokens: f64,
    pub admin_min_tokens: f64,
}

impl Default for TierThresholds {
    fn default() -> Self {
        Self {
            reader_min_tokens: 0.5,
            user_min_tokens: 1.0,
            operator_min_tokens: 5.0,
            admin_min_tokens: 10.0,
        }
    }
}

impl Tier {
    /// Map a stake `amount` (in smallest units) to the highest tier it
    /// qualifies for under `thresholds`.
    pub fn from_amount(amount: u64, thresholds: &TierThresholds) -> Self {
        let whole_tokens = amount as f64 / COIN_VALUE as f64;
        if whole_tokens >= thresholds.admin_min_tokens {
            Tier::AdminAll
        } else if whole_tokens >= thresholds.operator_min_tokens {
            Tier::Operator
        } else if whole_tokens >= thresholds.user_min_tokens {
            Tier::User
        } else if whole_tokens >= thresholds.reader_min_tokens {
            Tier::Reader
        } else {
            Tier::Unauthenticated
        }
    }

    /// The capabilities granted strictly at this tier, before inclusion of
    /// lower tiers. Tiers are strictly inclusive:
    /// [`CapabilitySet::for_tier`] folds these together up to `self`.
    fn own_capabilities(self) -> &'static [&'static str] {
        match self {
            Tier::Unauthenticated => &[],
            Tier::Reader => &["pods:read", "services:read", "configmaps:read"],
            Tier::User => &["pods:write", "services:write", "nodes:write"],
            Tier::Operator => &["deployments:write", "secrets:read", "namespaces:write"],
            Tier::AdminAll => &["*:*"],
        }
    }

    fn rank(self) -> u8 {
        match self {
            Tier::Unauthenticated => 0,
            Tier::Reader => 1,
            Tier::User => 2,
            Tier::Operator => 3,
            Tier::AdminAll => 4,
        }
    }

    fn all_up_to(self) -> impl Iterator<Item = Tier> {
        [Tier::Unauthenticated, Tier::Reader, Tier::User, Tier::Operator, Tier::AdminAll]
            .into_iter()
            .filter(move |t| t.rank() <= self.rank())
    }
}

impl fmt::Display for Tier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Tier::Unauthenticated => "unauthenticated",
            Tier::Reader => "reader",
            Tier::User => "user",
            Tier::Operator => "operator",
            Tier::AdminAll => "admin-all",
        };
        write!(f, "{name}")
    }
}

/// An ordered set of `{resource}:{action}` capability strings, with `*:*`
/// denoting full access.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CapabilitySet {
    tier: Tier,
    entries: BTreeSet<String>,
}

impl CapabilitySet {
    pub fn for_tier(tier: Tier) -> Self {
        let mut entries = BTreeSet::new();
        for t in tier.all_up_to() {
            for cap in t.own_capabilities() {
                entries.insert((*cap).to_string());
            }
        }
        Self { tier, entries }
    }

    pub fn from_amount(amount: u64, thresholds: &TierThresholds) -> Self {
        Self::for_tier(Tier::from_amount(amount, thresholds))
    }

    pub fn tier(&self) -> Tier {
        self.tier
    }

    pub fn entries(&self) -> impl Iterator<Item = &str> {
        self.entries.iter().map(String::as_str)
    }

    /// Check whether this set grants `{resource}:{action}`; `*:*` dominates.
    pub fn allows(&self, resource: &str, action: &str) -> bool {
        if self.entries.contains("*:*") {
            return true;
        }
        let specific = format!("{resource}:{action}");
        self.entries.contains(&specific)
    }

    /// Whether the wallet holds any capability at all; an
    /// `Unauthenticated`-tier set is rejected for any K8s operation.
    pub fn is_authenticated(&self) -> bool {
        self.tier != Tier::Unauthenticated
    }

    /// Superset check, used to assert tier monotonicity in tests:
    /// `amount1 <= amount2 => capabilities(amount1).is_subset_of(capabilities(amount2))`.
    pub fn is_subset_of(&self, other: &CapabilitySet) -> bool {
        self.entries.is_subset(&other.entries)
    }
}
