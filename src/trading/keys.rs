//! Caller-supplied private keys, converted into the venue's native signer.
//! Keys live only for the duration of one execution and are never logged.

use alloy::signers::local::PrivateKeySigner;
use std::fmt;

use crate::error::{GatewayError, GatewayResult};
use crate::market_data::types::ChainFamily;

pub enum SigningKey {
    Ledger(ed25519_dalek::SigningKey),
    Evm(PrivateKeySigner),
}

impl fmt::Debug for SigningKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SigningKey::Ledger(_) => write!(f, "SigningKey::Ledger({})", self.public_id()),
            SigningKey::Evm(_) => write!(f, "SigningKey::Evm({})", self.public_id()),
        }
    }
}

impl SigningKey {
    pub fn parse(raw: &str, family: ChainFamily) -> GatewayResult<Self> {
        let raw = raw.trim();
        if raw.is_empty() {
            return Err(GatewayError::InvalidPrivateKey("empty key".into()));
        }
        match family {
            ChainFamily::Ledger => parse_ledger(raw).map(SigningKey::Ledger),
            ChainFamily::Evm => parse_evm(raw).map(SigningKey::Evm),
        }
    }

    pub fn family(&self) -> ChainFamily {
        match self {
            SigningKey::Ledger(_) => ChainFamily::Ledger,
            SigningKey::Evm(_) => ChainFamily::Evm,
        }
    }

    /// Base58 public key or checksummed address; safe to log.
    pub fn public_id(&self) -> String {
        match self {
            SigningKey::Ledger(k) => bs58::encode(k.verifying_key().as_bytes()).into_string(),
            SigningKey::Evm(s) => s.address().to_checksum(None),
        }
    }
}

fn invalid(msg: impl Into<String>) -> GatewayError {
    GatewayError::InvalidPrivateKey(msg.into())
}

// Accepts base58 (64-byte keypair or 32-byte seed) or a JSON byte array.
fn parse_ledger(raw: &str) -> GatewayResult<ed25519_dalek::SigningKey> {
    let bytes = if raw.starts_with('[') {
        serde_json::from_str::<Vec<u8>>(raw).map_err(|e| invalid(format!("bad byte array: {e}")))?
    } else {
        bs58::decode(raw)
            .into_vec()
            .map_err(|e| invalid(format!("bad base58: {e}")))?
    };

    match bytes.len() {
        64 => {
            let keypair: [u8; 64] = bytes
                .as_slice()
                .try_into()
                .map_err(|_| invalid("expected 64 bytes"))?;
            ed25519_dalek::SigningKey::from_keypair_bytes(&keypair)
                .map_err(|_| invalid("keypair public half does not match secret"))
        }
        32 => {
            let seed: [u8; 32] = bytes
                .as_slice()
                .try_into()
                .map_err(|_| invalid("expected 32 bytes"))?;
            Ok(ed25519_dalek::SigningKey::from_bytes(&seed))
        }
        n => Err(invalid(format!("expected 32 or 64 key bytes, got {n}"))),
    }
}

fn parse_evm(raw: &str) -> GatewayResult<PrivateKeySigner> {
    let hex_str = raw.strip_prefix("0x").unwrap_or(raw);
    let bytes = alloy::hex::decode(hex_str).map_err(|e| invalid(format!("bad hex: {e}")))?;
    if bytes.len() != 32 {
        return Err(invalid(format!("expected 32 key bytes, got {}", bytes.len())));
    }
    PrivateKeySigner::from_slice(&bytes).map_err(|e| invalid(e.to_string()))
}
