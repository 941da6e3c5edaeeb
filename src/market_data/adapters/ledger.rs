// Ledger-network signing and submission.
//
// Wire layout of a serialized transaction:
//   compact-u16 signature count | count * 64-byte signatures | message bytes
// A versioned message starts with 0x80 | version, then a 3-byte header, then a
// compact-u16 account count followed by 32-byte account keys; the first key pays fees.

use base64::prelude::*;
use ed25519_dalek::Signer;
use serde_json::{json, Value};

use super::http::VenueHttp;
use crate::error::{GatewayError, GatewayResult};
use crate::market_data::types::VenueSlug;

const SIGNATURE_LEN: usize = 64;
const PUBKEY_LEN: usize = 32;

fn err(venue: VenueSlug, msg: impl Into<String>) -> GatewayError {
    GatewayError::platform(venue.as_str(), msg)
}

/// Decode a compact-u16 at the front of `bytes`, returning (value, bytes consumed).
fn read_compact_u16(bytes: &[u8]) -> Option<(usize, usize)> {
    let mut value = 0usize;
    for (i, byte) in bytes.iter().take(3).enumerate() {
        value |= ((byte & 0x7f) as usize) << (7 * i);
        if byte & 0x80 == 0 {
            return Some((value, i + 1));
        }
    }
    None
}

fn fee_payer(message: &[u8]) -> Option<&[u8]> {
    let mut offset = 0;
    if *message.first()? & 0x80 != 0 {
        offset += 1;
    }
    offset += 3;
    let (count, used) = read_compact_u16(message.get(offset..)?)?;
    offset += used;
    if count == 0 {
        return None;
    }
    message.get(offset..offset + PUBKEY_LEN)
}

/// Sign the venue-built transaction with `key`, filling signature slot 0.
pub fn sign_transaction(venue: VenueSlug, tx_b64: &str, key: &ed25519_dalek::SigningKey) -> GatewayResult<String> {
    let mut bytes = BASE64_STANDARD
        .decode(tx_b64.trim())
        .map_err(|e| err(venue, format!("transaction is not base64: {e}")))?;
    let (sig_count, prefix) =
        read_compact_u16(&bytes).ok_or_else(|| err(venue, "truncated signature count"))?;
    if sig_count == 0 {
        return Err(err(venue, "transaction has no signature slots"));
    }
    let message_start = prefix + sig_count * SIGNATURE_LEN;
    if bytes.len() <= message_start {
        return Err(err(venue, "transaction is truncated"));
    }

    let pubkey = key.verifying_key();
    let payer = fee_payer(&bytes[message_start..]).ok_or_else(|| err(venue, "malformed transaction message"))?;
    if payer != pubkey.as_bytes() {
        return Err(err(venue, "signing key is not the transaction fee payer"));
    }

    let signature = key.sign(&bytes[message_start..]);
    bytes[prefix..prefix + SIGNATURE_LEN].copy_from_slice(&signature.to_bytes());
    Ok(BASE64_STANDARD.encode(bytes))
}

/// JSON-RPC `sendTransaction`; returns the transaction signature.
pub async fn send_transaction(http: &VenueHttp, venue: VenueSlug, rpc_url: &str, signed_b64: &str) -> GatewayResult<String> {
    let body = json!({
        "jsonrpc": "2.0",
        "id": 1,
        "method": "sendTransaction",
        "params": [
            signed_b64,
            {"encoding": "base64", "skipPreflight": false, "preflightCommitment": "confirmed"}
        ]
    });
    let resp = http.post_json(rpc_url, &body).await?;
    if let Some(e) = resp.get("error") {
        let msg = e.get("message").and_then(Value::as_str).unwrap_or("rpc error");
        return Err(err(venue, msg));
    }
    resp.get("result")
        .and_then(Value::as_str)
        .map(str::to_string)
        .ok_or_else(|| err(venue, "rpc response missing result"))
}
