//! Stake-backed authentication: translating a seal token into a capability set.

pub mod validator;

pub use validator::{Clock, StakeError, StakeValidator, SystemClock};
