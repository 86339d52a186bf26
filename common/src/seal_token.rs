//! Seal token codec: parses and verifies the bearer
//! credential kubectl presents to the gateway, and generates the
//! unpredictable challenge bytes a staker signs to mint one.

use crate::crypto::{self, CryptoError, Signature, WalletAddress};
use rand::RngCore;
use std::time::{Duration, SystemTime, UNIX_EPOCH};
use thiserror::Error;

/// Size of the random nonce portion of a challenge, in bytes.
const CHALLENGE_NONCE_SIZE: usize = 16;
/// Size of the big-endian unix-ms timestamp prefix, in bytes.
const CHALLENGE_TIMESTAMP_SIZE: usize = 8;
const CHALLENGE_SIZE: usize = CHALLENGE_TIMESTAMP_SIZE + CHALLENGE_NONCE_SIZE;

#[derive(Error, Debug, Clone)]
pub enum SealTokenError {
    #[error("no seal token present in the request")]
    MissingToken,
    #[error("seal token is malformed: {0}")]
    Malformed(&'static str),
    #[error(transparent)]
    InvalidCrypto(#[from] CryptoError),
    #[error("challenge timestamp is {skew_secs}s outside the allowed window")]
    ExpiredChallenge { skew_secs: i64 },
    #[error("signature does not verify against the wallet's registered key")]
    InvalidSignature,
}

/// A bearer credential proving control of an on-chain wallet, consisting of
/// `(wallet, signature, challenge)`.
#[derive(Debug, Clone)]
pub struct SealToken {
    pub wallet_address: WalletAddress,
    pub signature: Signature,
    pub challenge: Vec<u8>,
}

impl SealToken {
    /// Canonical wire prefix for the `Authorization`/`X-Kubectl-Token` form:
    /// `SEAL<wallet>::<sig>::<challenge>`.
    const PREFIX: &'static str = "SEAL";
    const SEPARATOR: &'static str = "::";

    /// Extract the embedded unix-ms timestamp from the challenge bytes.
    pub fn challenge_timestamp_ms(&self) -> Result<u64, SealTokenError> {
        if self.challenge.len() < CHALLENGE_TIMESTAMP_SIZE {
            return Err(SealTokenError::Malformed("challenge too short"));
        }
        let mut ts_bytes = [0u8; CHALLENGE_TIMESTAMP_SIZE];
        ts_bytes.copy_from_slice(&self.challenge[..CHALLENGE_TIMESTAMP_SIZE]);
        Ok(u64::from_be_bytes(ts_bytes))
    }

    /// Encode as the canonical `SEAL<wallet>::<sig>::<challenge>` wire form.
    pub fn encode(&self) -> String {
        format!(
            "{}{}{}{}{}{}",
            Self::PREFIX,
            self.wallet_address.to_hex(),
            Self::SEPARATOR,
            self.signature.to_hex(),
            Self::SEPARATOR,
            hex::encode(&self.challenge),
        )
    }

    /// Decode the canonical wire form produced by [`SealToken::encode`].
    pub fn decode(encoded: &str) -> Result<Self, SealTokenError> {
        let rest = encoded
            .strip_prefix(Self::PREFIX)
            .ok_or(SealTokenError::Malformed("missing SEAL prefix"))?;
        let mut parts = rest.split(Self::SEPARATOR);
        let wallet_hex = parts.next().ok_or(SealTokenError::Malformed("missing wallet field"))?;
        let sig_hex = parts.next().ok_or(SealTokenError::Malformed("missing signature field"))?;
        let challenge_hex = parts.next().ok_or(SealTokenError::Malformed("missing challenge field"))?;
        if parts.next().is_some() {
            return Err(SealTokenError::Malformed("too many fields"));
        }

        let wallet_address = WalletAddress::from_hex(wallet_hex)?;
        let signature = Signature::from_slice(&hex::decode(sig_hex).map_err(|_| SealTokenError::Malformed("signature is not hex"))?)?;
        let challenge = hex::decode(challenge_hex).map_err(|_| SealTokenError::Malformed("challenge is not hex"))?;

        Ok(Self { wallet_address, signature, challenge })
    }

    /// Build from the three explicit `X-Seal-*` headers, which carry the
    /// same fields un-concatenated.
    pub fn from_parts(wallet_hex: &str, sig_hex: &str, challenge_hex: &str) -> Result<Self, SealTokenError> {
        let wallet_address = WalletAddress::from_hex(wallet_hex)?;
        let signature = Signature::from_slice(
            &hex::decode(sig_hex).map_err(|_| SealTokenError::Malformed("signature is not hex"))?,
        )?;
        let challenge =
            hex::decode(challenge_hex).map_err(|_| SealTokenError::Malformed("challenge is not hex"))?;
        Ok(Self { wallet_address, signature, challenge })
    }

    /// Validate a token: the signature must verify over the challenge bytes
    /// and the embedded timestamp must be within `challenge_ttl` of now.
    pub fn validate(&self, challenge_ttl: Duration) -> Result<(), SealTokenError> {
        let timestamp_ms = self.challenge_timestamp_ms()?;
        let now_ms = now_unix_ms();
        let skew_ms = now_ms as i64 - timestamp_ms as i64;
        if skew_ms.unsigned_abs() > challenge_ttl.as_millis() as u64 {
            return Err(SealTokenError::ExpiredChallenge { skew_secs: skew_ms / 1000 });
        }

        crypto::verify(&self.wallet_address, &self.challenge, &self.signature)
            .map_err(|_| SealTokenError::InvalidSignature)
    }
}

/// Generate fresh challenge bytes: 8-byte big-endian unix-ms || 16 random bytes.
pub fn generate_challenge() -> Vec<u8> {
    let mut out = Vec::with_capacity(CHALLENGE_SIZE);
    out.extend_from_slice(&now_unix_ms().to_be_bytes());
    let mut nonce = [0u8; CHALLENGE_NONCE_SIZE];
    rand::thread_rng().fill_bytes(&mut nonce);
    out.extend_from_slice(&nonce);
    out
}

fn now_unix_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .expect("system clock is before the unix epoch")
        .as_millis() as u64
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crypto::SignerKey;

    fn signed_token(signer: &SignerKey, challenge: Vec<u8>) -> SealToken {
        let signature = signer.sign(&challenge);
        SealToken { wallet_address: signer.wallet(), signature, challenge }
    }

    #[test]
    fn encode_decode_round_trips() {
        let signer = SignerKey::generate();
        let token = signed_token(&signer, generate_challenge());
        let encoded = token.encode();
        let decoded = SealToken::decode(&encoded).unwrap();
        assert_eq!(decoded.wallet_address, token.wallet_address);
        assert_eq!(decoded.challenge, token.challenge);
    }

    #[test]
    fn validate_accepts_fresh_challenge() {
        let signer = SignerKey::generate();
        let token = signed_token(&signer, generate_challenge());
        assert!(token.validate(Duration::from_secs(300)).is_ok());
    }

    #[test]
    fn validate_rejects_expired_challenge() {
        let signer = SignerKey::generate();
        let mut challenge = generate_challenge();
        // Push the embedded timestamp 10 minutes into the past.
        let stale_ms = now_unix_ms() - Duration::from_secs(600).as_millis() as u64;
        challenge[..8].copy_from_slice(&stale_ms.to_be_bytes());
        let token = signed_token(&signer, challenge);
        let err = token.validate(Duration::from_secs(300)).unwrap_err();
        assert!(matches!(err, SealTokenError::ExpiredChallenge { .. }));
    }

    #[test]
    fn validate_rejects_wrong_signer() {
        let signer = SignerKey::generate();
        let impostor = SignerKey::generate();
        let challenge = generate_challenge();
        let signature = impostor.sign(&challenge);
        let token = SealToken { wallet_address: signer.wallet(), signature, challenge };
        let err = token.validate(Duration::from_secs(300)).unwrap_err();
        assert!(matches!(err, SealTokenError::InvalidSignature));
    }

    #[test]
    fn decode_rejects_missing_prefix() {
        assert!(matches!(SealToken::decode("nope"), Err(SealTokenError::Malformed(_))));
    }
}
