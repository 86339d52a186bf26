//! Loads the deployment's signer key from disk, generating and persisting a
//! fresh one on first run. The key file holds the raw 32-byte Ed25519 seed,
//! hex-encoded. Also serializes every chain submission made under that key.

use anyhow::{Context, Result};
use bridge_common::chain::abi::ContractCall;
use bridge_common::chain::client::TxResult;
use bridge_common::chain::{ChainClient, ChainClientError};
use bridge_common::crypto::SignerKey;
use log::{info, warn};
use std::path::Path;
use std::sync::Arc;

/// Serializes every signed transaction submitted under one signing
/// identity behind a single lock, held across sign-and-submit rather than
/// just the signature itself. The gateway's own request-handling path and
/// the dispatcher's chain-event path both hold an `Arc` to the same
/// `TxSubmitter`, so the two can never interleave two submissions for the
/// same wallet and race the chain's nonce assignment.
pub struct TxSubmitter {
    chain: Arc<dyn ChainClient>,
    signer: tokio::sync::Mutex<SignerKey>,
}

impl TxSubmitter {
    pub fn new(chain: Arc<dyn ChainClient>, signer: SignerKey) -> Self {
        Self { chain, signer: tokio::sync::Mutex::new(signer) }
    }

    pub async fn submit(&self, call: ContractCall) -> Result<TxResult, ChainClientError> {
        let signer = self.signer.lock().await;
        self.chain.execute_transaction_block(call, &signer).await
    }
}

pub fn load_or_generate(path: &Path) -> Result<SignerKey> {
    if path.exists() {
        let contents = std::fs::read_to_string(path).with_context(|| format!("reading signer key from {}", path.display()))?;
        let bytes = hex::decode(contents.trim()).context("signer key file is not valid hex")?;
        let secret: [u8; 32] = bytes.try_into().map_err(|_| anyhow::anyhow!("signer key must be exactly 32 bytes"))?;
        let signer = SignerKey::from_bytes(secret);
        info!("loaded signer key for wallet {}", signer.wallet());
        return Ok(signer);
    }

    warn!("no signer key found at {}, generating a new one", path.display());
    let signer = SignerKey::generate();
    persist(path, &signer)?;
    info!("generated signer key for wallet {}", signer.wallet());
    Ok(signer)
}

fn persist(path: &Path, signer: &SignerKey) -> Result<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent).with_context(|| format!("creating signer key directory {}", parent.display()))?;
    }
    std::fs::write(path, hex::encode(signer.to_bytes())).with_context(|| format!("writing signer key to {}", path.display()))?;
    restrict_permissions(path)?;
    Ok(())
}

#[cfg(unix)]
fn restrict_permissions(path: &Path) -> Result<()> {
    use std::os::unix::fs::PermissionsExt;
    std::fs::set_permissions(path, std::fs::Permissions::from_mode(0o600)).with_context(|| format!("restricting permissions on {}", path.display()))
}

#[cfg(not(unix))]
fn restrict_permissions(_path: &Path) -> Result<()> {
    Ok(())
}
