// EVM helpers shared by the EVM venues: ERC-20 calldata, allowance checks,
// raw call submission with receipt status.

use alloy::network::{EthereumWallet, TransactionBuilder};
use alloy::primitives::{Address, Bytes, U256};
use alloy::providers::{Provider, ProviderBuilder};
use alloy::rpc::types::TransactionRequest;
use alloy::signers::local::PrivateKeySigner;
use alloy::sol;
use alloy::sol_types::SolCall;
use rust_decimal::Decimal;
use std::str::FromStr;
use tracing::{debug, info};

use crate::error::{GatewayError, GatewayResult};
use crate::market_data::normaliser::to_base_units;
use crate::market_data::types::{Chain, PreparedTransaction, VenueSlug};
use crate::trading::keys::SigningKey;

sol! {
    #[sol(rpc)]
    interface IERC20 {
        function approve(address spender, uint256 amount) external returns (bool);
        function allowance(address owner, address spender) external view returns (uint256);
        function transfer(address to, uint256 amount) external returns (bool);
    }
}

pub const APPROVE_GAS: u64 = 100_000;
pub const TRADE_GAS: u64 = 300_000;
pub const FEE_GAS: u64 = 60_000;

pub fn parse_address(venue: VenueSlug, s: &str) -> GatewayResult<Address> {
    Address::from_str(s.trim()).map_err(|e| GatewayError::platform(venue.as_str(), format!("invalid address '{s}': {e}")))
}

pub fn approve_calldata(spender: Address, amount: U256) -> String {
    alloy::hex::encode_prefixed(IERC20::approveCall { spender, amount }.abi_encode())
}

pub fn approve_tx(
    token: Address,
    spender: Address,
    amount: U256,
    chain: Chain,
    gas: u64,
    description: impl Into<String>,
) -> PreparedTransaction {
    PreparedTransaction {
        to: token.to_checksum(None),
        data: approve_calldata(spender, amount),
        value: "0".into(),
        gas: Some(gas.to_string()),
        chain_id: chain.chain_id(),
        description: description.into(),
    }
}

/// Platform fee as an ERC-20 allowance for the fee account, appended after the trade step.
/// The fee account collects it after the trade settles.
pub fn fee_approval_tx(token: Address, fee_account: Address, amount: U256, chain: Chain, fee_bps: u32) -> PreparedTransaction {
    PreparedTransaction {
        to: token.to_checksum(None),
        data: approve_calldata(fee_account, amount),
        value: "0".into(),
        gas: Some(FEE_GAS.to_string()),
        chain_id: chain.chain_id(),
        description: format!("Platform fee: {}%", Decimal::new(fee_bps as i64, 2).normalize()),
    }
}

/// Trade step for venues whose orders settle through an off-chain book: the calldata is the
/// outcome token id as one 32-byte word, so the wallet can show what is being bought.
pub fn order_tx(exchange: &str, token_id: Option<&str>, chain: Chain, description: String) -> PreparedTransaction {
    let word = token_id
        .and_then(|t| {
            if let Some(hex) = t.strip_prefix("0x") {
                U256::from_str_radix(hex, 16).ok()
            } else {
                U256::from_str_radix(t, 10).ok()
            }
        })
        .unwrap_or_default();
    PreparedTransaction {
        to: exchange.to_string(),
        data: alloy::hex::encode_prefixed(word.to_be_bytes::<32>()),
        value: "0".into(),
        gas: Some(TRADE_GAS.to_string()),
        chain_id: chain.chain_id(),
        description,
    }
}

/// Outcome of a submitted transaction once its receipt is in.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Submitted {
    pub tx_hash: String,
    pub success: bool,
}

/// RPC endpoint for one EVM chain, used to sign and submit on behalf of a caller's key.
#[derive(Debug, Clone)]
pub struct EvmRpc {
    venue: VenueSlug,
    chain: Chain,
    rpc_url: String,
}

impl EvmRpc {
    pub fn new(venue: VenueSlug, chain: Chain, rpc_url: impl Into<String>) -> Self {
        Self {
            venue,
            chain,
            rpc_url: rpc_url.into(),
        }
    }

    pub fn chain(&self) -> Chain {
        self.chain
    }

    fn err(&self, e: impl std::fmt::Display) -> GatewayError {
        GatewayError::platform(self.venue.as_str(), e.to_string())
    }

    fn provider(&self, signer: &PrivateKeySigner) -> GatewayResult<impl Provider> {
        let url = self.rpc_url.parse().map_err(|e| self.err(format!("bad rpc url: {e}")))?;
        Ok(ProviderBuilder::new()
            .wallet(EthereumWallet::from(signer.clone()))
            .connect_http(url))
    }

    /// Approve `spender` for `needed` unless the current allowance already covers it.
    /// Returns the approval hash when one was sent.
    pub async fn ensure_allowance(
        &self,
        signer: &PrivateKeySigner,
        token: Address,
        spender: Address,
        needed: U256,
    ) -> GatewayResult<Option<String>> {
        let provider = self.provider(signer)?;
        let erc20 = IERC20::new(token, &provider);
        let current: U256 = erc20
            .allowance(signer.address(), spender)
            .call()
            .await
            .map_err(|e| self.err(e))?;
        if current >= needed {
            debug!(venue = %self.venue, %spender, "allowance sufficient, skipping approval");
            return Ok(None);
        }

        let receipt = erc20
            .approve(spender, U256::MAX)
            .send()
            .await
            .map_err(|e| self.err(e))?
            .get_receipt()
            .await
            .map_err(|e| self.err(e))?;
        let hash = receipt.transaction_hash.to_string();
        if !receipt.status() {
            return Err(self.err(format!("approval {hash} reverted")));
        }
        info!(venue = %self.venue, %spender, tx = %hash, "approval confirmed");
        Ok(Some(hash))
    }

    /// Send raw calldata and wait for the receipt. A reverted receipt is returned, not raised.
    pub async fn send_call(
        &self,
        signer: &PrivateKeySigner,
        to: Address,
        data: Bytes,
        value: U256,
        gas: Option<u64>,
    ) -> GatewayResult<Submitted> {
        let provider = self.provider(signer)?;
        let mut tx = TransactionRequest::default()
            .with_from(signer.address())
            .with_to(to)
            .with_input(data)
            .with_value(value);
        if let Some(gas) = gas {
            tx = tx.with_gas_limit(gas);
        }
        let receipt = provider
            .send_transaction(tx)
            .await
            .map_err(|e| self.err(e))?
            .get_receipt()
            .await
            .map_err(|e| self.err(e))?;
        Ok(Submitted {
            tx_hash: receipt.transaction_hash.to_string(),
            success: receipt.status(),
        })
    }

    pub async fn transfer(
        &self,
        signer: &PrivateKeySigner,
        token: Address,
        to: Address,
        amount: U256,
    ) -> GatewayResult<Submitted> {
        let data = IERC20::transferCall { to, amount }.abi_encode();
        self.send_call(signer, token, data.into(), U256::ZERO, Some(FEE_GAS)).await
    }

    /// Post-trade fee collection: transfer `amount` of `token` from the trader to `fee_account`.
    pub async fn collect_fee(
        &self,
        key: &SigningKey,
        token: &str,
        decimals: u32,
        fee_account: &str,
        amount: Decimal,
    ) -> GatewayResult<Option<String>> {
        let SigningKey::Evm(signer) = key else {
            return Err(GatewayError::InvalidKeyType { expected: "EVM private key" });
        };
        let raw = match to_base_units(amount, decimals) {
            Some(raw) if !raw.is_zero() => raw,
            _ => return Ok(None),
        };
        let token = parse_address(self.venue, token)?;
        let to = parse_address(self.venue, fee_account)?;
        let sent = self.transfer(signer, token, to, raw).await?;
        if !sent.success {
            return Err(GatewayError::TransactionReverted { tx_hash: sent.tx_hash });
        }
        info!(venue = %self.venue, tx = %sent.tx_hash, %amount, "platform fee collected");
        Ok(Some(sent.tx_hash))
    }
}


#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_approve_calldata_layout() {
        let spender = Address::from_str("0x4bFb41d5B3570DeFd03C39a9A4D8dE6Bd8B8982E").unwrap();
        let data = approve_calldata(spender, U256::from(1_000_000u64));
        // selector + two 32-byte words
        assert!(data.starts_with("0x095ea7b3"));
        assert_eq!(data.len(), 2 + 8 + 128);
        assert!(data.ends_with("f4240"));
    }

    #[test]
    fn test_approve_tx_fields() {
        let token = Address::from_str("0x833589fCD6eDb6E08f4c7C32D4f71b54bdA02913").unwrap();
        let tx = approve_tx(token, Address::ZERO, U256::MAX, Chain::Base, APPROVE_GAS, "Approve USDC");
        assert_eq!(tx.chain_id, 8453);
        assert_eq!(tx.gas.as_deref(), Some("100000"));
        assert_eq!(tx.to, "0x833589fCD6eDb6E08f4c7C32D4f71b54bdA02913");
        assert_eq!(tx.value, "0");
    }

    #[test]
    fn test_fee_and_order_steps() {
        let token = Address::from_str("0x833589fCD6eDb6E08f4c7C32D4f71b54bdA02913").unwrap();
        let fee_account = Address::from_str("0x4bFb41d5B3570DeFd03C39a9A4D8dE6Bd8B8982E").unwrap();
        let fee = fee_approval_tx(token, fee_account, U256::from(500u64), Chain::Base, 50);
        assert_eq!(fee.data, approve_calldata(fee_account, U256::from(500u64)));
        assert!(fee.data.ends_with("1f4"));
        assert_eq!(fee.gas.as_deref(), Some("60000"));
        assert_eq!(fee.description, "Platform fee: 0.5%");

        let order = order_tx("0xexchange", Some("333"), Chain::Polygon, "BUY YES on m".into());
        assert_eq!(order.data.len(), 2 + 64);
        assert!(order.data.ends_with("014d"));
        assert_eq!(order.gas.as_deref(), Some("300000"));
        let hex = order_tx("0xexchange", Some("0xff"), Chain::Polygon, String::new());
        assert!(hex.data.ends_with("00ff"));
    }

    fn signer() -> PrivateKeySigner {
        test_node::TEST_KEY.parse().unwrap()
    }

    const TOKEN: &str = "0x55d398326f99059fF775485246999027B3197955";
    const SPENDER: &str = "0x5F45344126D6488025B0b84A3A8189F2487a7246";

    #[tokio::test]
    async fn test_sufficient_allowance_skips_approval() {
        let node = test_node::start(test_node::EvmNode {
            chain_id: 56,
            allowance: U256::from(5_000u64),
            succeeds: true,
        })
        .await;
        let rpc = EvmRpc::new(VenueSlug::Opinion, Chain::Bsc, node.uri());
        let token = Address::from_str(TOKEN).unwrap();
        let spender = Address::from_str(SPENDER).unwrap();

        let sent = rpc.ensure_allowance(&signer(), token, spender, U256::from(5_000u64)).await.unwrap();
        assert_eq!(sent, None);
        assert_eq!(test_node::calls(&node, "eth_call").await, 1);
        assert_eq!(test_node::calls(&node, "eth_sendRawTransaction").await, 0);
    }

    #[tokio::test]
    async fn test_short_allowance_sends_one_approval() {
        let node = test_node::start(test_node::EvmNode {
            chain_id: 56,
            allowance: U256::from(1u64),
            succeeds: true,
        })
        .await;
        let rpc = EvmRpc::new(VenueSlug::Opinion, Chain::Bsc, node.uri());
        let token = Address::from_str(TOKEN).unwrap();
        let spender = Address::from_str(SPENDER).unwrap();

        let sent = rpc.ensure_allowance(&signer(), token, spender, U256::from(5_000u64)).await.unwrap();
        assert!(sent.is_some_and(|h| h.starts_with("0x")));
        assert_eq!(test_node::calls(&node, "eth_sendRawTransaction").await, 1);
    }

    #[tokio::test]
    async fn test_reverted_receipt_is_reported_not_raised() {
        let node = test_node::start(test_node::EvmNode {
            chain_id: 56,
            allowance: U256::ZERO,
            succeeds: false,
        })
        .await;
        let rpc = EvmRpc::new(VenueSlug::Opinion, Chain::Bsc, node.uri());
        let to = Address::from_str(SPENDER).unwrap();

        let sent = rpc
            .send_call(&signer(), to, Bytes::from_static(&[0xde, 0xad]), U256::ZERO, Some(TRADE_GAS))
            .await
            .unwrap();
        assert!(!sent.success);
        assert!(sent.tx_hash.starts_with("0x"));

        // A reverted approval is an error for the caller.
        let token = Address::from_str(TOKEN).unwrap();
        assert!(rpc.ensure_allowance(&signer(), token, to, U256::from(1u64)).await.is_err());
    }

    #[test]
    fn test_parse_address_rejects_garbage() {
        assert!(parse_address(VenueSlug::Opinion, "0x1234").is_err());
        assert!(parse_address(VenueSlug::Opinion, " 0x55d398326f99059fF775485246999027B3197955 ").is_ok());
    }
}
