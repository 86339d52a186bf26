//! Wallet address and signature primitives used to verify seal tokens and to
//! sign chain transactions. Adapted from the discovery protocol's Ed25519
//! identity types: a wallet is identified by its Ed25519 public key, and a
//! signer key is zeroized on drop.

use ed25519_dalek::{Signature as DalekSignature, Signer, SigningKey, Verifier, VerifyingKey};
use rand::rngs::OsRng;
use serde::{Deserialize, Serialize};
use serde_big_array::BigArray;
use std::fmt;
use thiserror::Error;
use zeroize::{Zeroize, ZeroizeOnDrop};

pub const WALLET_ADDRESS_SIZE: usize = 32;
pub const SIGNATURE_SIZE: usize = 64;

#[derive(Error, Debug, Clone)]
pub enum CryptoError {
    #[error("invalid wallet address length: expected {WALLET_ADDRESS_SIZE}, got {0}")]
    InvalidAddressLength(usize),
    #[error("invalid signature length: expected {SIGNATURE_SIZE}, got {0}")]
    InvalidSignatureLength(usize),
    #[error("malformed public key bytes")]
    InvalidPublicKey,
    #[error("signature verification failed")]
    VerificationFailed,
    #[error("invalid hex string: {0}")]
    HexError(String),
}

/// A wallet's Ed25519 public key, also used as its on-chain address.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct WalletAddress([u8; WALLET_ADDRESS_SIZE]);

impl WalletAddress {
    pub fn from_bytes(bytes: [u8; WALLET_ADDRESS_SIZE]) -> Self {
        Self(bytes)
    }

    pub fn from_slice(slice: &[u8]) -> Result<Self, CryptoError> {
        if slice.len() != WALLET_ADDRESS_SIZE {
            return Err(CryptoError::InvalidAddressLength(slice.len()));
        }
        let mut bytes = [0u8; WALLET_ADDRESS_SIZE];
        bytes.copy_from_slice(slice);
        Ok(Self(bytes))
    }

    pub fn from_hex(hex_str: &str) -> Result<Self, CryptoError> {
        let bytes = hex::decode(hex_str).map_err(|e| CryptoError::HexError(e.to_string()))?;
        Self::from_slice(&bytes)
    }

    pub fn as_bytes(&self) -> &[u8; WALLET_ADDRESS_SIZE] {
        &self.0
    }

    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }

    fn verifying_key(&self) -> Result<VerifyingKey, CryptoError> {
        VerifyingKey::from_bytes(&self.0).map_err(|_| CryptoError::InvalidPublicKey)
    }
}

impl fmt::Debug for WalletAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "WalletAddress({})", self.to_hex())
    }
}

impl fmt::Display for WalletAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_hex())
    }
}

/// A detached Ed25519 signature.
#[derive(Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Signature(#[serde(with = "BigArray")] [u8; SIGNATURE_SIZE]);

impl Signature {
    pub fn from_bytes(bytes: [u8; SIGNATURE_SIZE]) -> Self {
        Self(bytes)
    }

    pub fn from_slice(slice: &[u8]) -> Result<Self, CryptoError> {
        if slice.len() != SIGNATURE_SIZE {
            return Err(CryptoError::InvalidSignatureLength(slice.len()));
        }
        let mut bytes = [0u8; SIGNATURE_SIZE];
        bytes.copy_from_slice(slice);
        Ok(Self(bytes))
    }

    pub fn as_bytes(&self) -> &[u8; SIGNATURE_SIZE] {
        &self.0
    }

    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }
}

impl fmt::Debug for Signature {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Signature({})", self.to_hex())
    }
}

/// Verify that `signature` was produced by the holder of `wallet` over `message`.
pub fn verify(wallet: &WalletAddress, message: &[u8], signature: &Signature) -> Result<(), CryptoError> {
    let verifying_key = wallet.verifying_key()?;
    let dalek_sig = DalekSignature::from_bytes(signature.as_bytes());
    verifying_key
        .verify(message, &dalek_sig)
        .map_err(|_| CryptoError::VerificationFailed)
}

/// The deployment's signing identity, used to sign outbound chain
/// transactions. Owned exclusively by the dispatcher and the gateway; never
/// handed to a kubectl subprocess environment.
///
/// The secret key is zeroized on drop for security.
#[derive(Zeroize, ZeroizeOnDrop)]
pub struct SignerKey {
    #[zeroize(skip)]
    signing_key: SigningKey,
    #[zeroize(skip)]
    wallet: WalletAddress,
}

impl SignerKey {
    pub fn generate() -> Self {
        let signing_key = SigningKey::generate(&mut OsRng);
        let wallet = WalletAddress::from_bytes(signing_key.verifying_key().to_bytes());
        Self { signing_key, wallet }
    }

    pub fn from_bytes(secret: [u8; 32]) -> Self {
        let signing_key = SigningKey::from_bytes(&secret);
        let wallet = WalletAddress::from_bytes(signing_key.verifying_key().to_bytes());
        Self { signing_key, wallet }
    }

    pub fn wallet(&self) -> WalletAddress {
        self.wallet
    }

    pub fn sign(&self, message: &[u8]) -> Signature {
        let sig = self.signing_key.sign(message);
        Signature::from_bytes(sig.to_bytes())
    }

    /// Raw secret seed bytes, for persisting a freshly generated key to
    /// disk. Never logged and never passed to a subprocess.
    pub fn to_bytes(&self) -> [u8; 32] {
        self.signing_key.to_bytes()
    }
}

impl fmt::Debug for SignerKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SignerKey")
            .field("wallet", &self.wallet)
            .field("secret", &"[REDACTED]")
            .finish()
    }
}

impl Clone for SignerKey {
    fn clone(&self) -> Self {
        Self { signing_key: self.signing_key.clone(), wallet: self.wallet }
    }
}
