//! Transfer gateway: the faucet's only view of the blockchain.
//!
//! The node owns block sync, the wallet keys, signing and relay. The faucet
//! asks it for a balance, asks it to send a transfer, and polls it for
//! confirmation.

use crate::address::WalletAddress;
use crate::amount::{TokenAmount, GAS_DECIMALS};
use crate::config::TokenInfo;
use crate::error::{FaucetError, FaucetResult};
use async_trait::async_trait;
use serde::Serialize;
use serde_json::{json, Value};
use tracing::{debug, info, warn};

/// Node error code for a transaction it has not seen in a block or its pool.
const UNKNOWN_TRANSACTION: i64 = -100;

/// Result of a submission attempt.
#[derive(Debug, Clone, PartialEq)]
pub enum TransferOutcome {
    Submitted {
        transaction_id: String,
        fee_paid: TokenAmount,
        gas_used: TokenAmount,
        /// Transaction as reported by the node
        raw: Value,
    },
    Failed {
        detail: String,
    },
}

/// Inclusion status of a submitted transaction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum Confirmation {
    Pending,
    Confirmed { confirmations: u64 },
}

/// Chain and wallet sync heights, for display.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct ChainStatus {
    pub height: u64,
    pub wallet_height: u64,
}

#[async_trait]
pub trait TransferGateway: Send + Sync {
    /// Faucet wallet balance of the configured token.
    async fn get_balance(&self) -> FaucetResult<TokenAmount>;

    /// Builds and relays a transfer. May take seconds. Failures are reported
    /// in the outcome rather than as errors.
    async fn submit_transfer(&self, to: &WalletAddress, amount: TokenAmount) -> TransferOutcome;

    async fn confirmation(&self, transaction_id: &str) -> FaucetResult<Confirmation>;

    async fn chain_status(&self) -> FaucetResult<ChainStatus>;
}

/// A JSON-RPC reply that was received and decoded.
enum RpcReply {
    Result(Value),
    Error { code: i64, message: String },
}

/// RPC client for interacting with blockchain
pub struct JsonRpcClient {
    rpc_url: String,
    client: reqwest::Client,
}

impl JsonRpcClient {
    pub fn new(rpc_url: String) -> Self {
        Self {
            rpc_url,
            client: reqwest::Client::new(),
        }
    }

    async fn request(&self, method: &str, params: Value) -> FaucetResult<RpcReply> {
        let payload = json!({
            "jsonrpc": "2.0",
            "method": method,
            "params": params,
            "id": 1
        });

        let response = self
            .client
            .post(&self.rpc_url)
            .json(&payload)
            .send()
            .await
            .map_err(|e| FaucetError::RpcError(format!("Request failed: {}", e)))?;

        let json: Value = response
            .json()
            .await
            .map_err(|e| FaucetError::RpcError(format!("Invalid response: {}", e)))?;

        if let Some(error) = json.get("error").filter(|e| !e.is_null()) {
            return Ok(RpcReply::Error {
                code: error.get("code").and_then(Value::as_i64).unwrap_or_default(),
                message: error
                    .get("message")
                    .and_then(Value::as_str)
                    .map(str::to_string)
                    .unwrap_or_else(|| error.to_string()),
            });
        }

        Ok(RpcReply::Result(json.get("result").cloned().unwrap_or(Value::Null)))
    }

    pub async fn call(&self, method: &str, params: Value) -> FaucetResult<Value> {
        match self.request(method, params).await? {
            RpcReply::Result(value) => Ok(value),
            RpcReply::Error { code, message } => {
                Err(FaucetError::RpcError(format!("{} (code {})", message, code)))
            }
        }
    }
}

/// Gateway backed by a node's JSON-RPC wallet interface.
pub struct NeoRpcGateway {
    rpc: JsonRpcClient,
    token: TokenInfo,
    faucet_address: WalletAddress,
}

impl NeoRpcGateway {
    pub fn new(rpc_url: String, token: TokenInfo, faucet_address: WalletAddress) -> Self {
        Self {
            rpc: JsonRpcClient::new(rpc_url),
            token,
            faucet_address,
        }
    }

    /// Opens the faucet wallet on the node. Called once at startup.
    pub async fn open_wallet(&self, path: &str, password: &str) -> FaucetResult<()> {
        let opened = self.rpc.call("openwallet", json!([path, password])).await?;
        if opened.as_bool() != Some(true) {
            return Err(FaucetError::RpcError(format!(
                "Node refused to open wallet at {}",
                path
            )));
        }
        info!("Opened faucet wallet {} on node", self.faucet_address);
        Ok(())
    }

    async fn send(&self, to: &WalletAddress, amount: TokenAmount) -> FaucetResult<TransferOutcome> {
        let value = amount.to_decimal_string(self.token.decimals);
        let tx = self
            .rpc
            .call(
                "sendfrom",
                json!([self.token.script_hash, self.faucet_address.as_str(), to.as_str(), value]),
            )
            .await?;

        // A reply without a txid means the node built the transaction but
        // could not sign it completely, so nothing was relayed.
        let Some(transaction_id) = tx.get("txid").and_then(Value::as_str).map(str::to_string) else {
            return Ok(TransferOutcome::Failed {
                detail: format!("Node did not relay the transaction: {}", tx),
            });
        };

        // The transfer is already relayed at this point; bad fee fields only
        // affect what we display.
        let fee_paid = gas_field(&tx, "net_fee").unwrap_or_else(|e| {
            warn!("Unreadable net_fee on {}: {}", transaction_id, e);
            TokenAmount::ZERO
        });
        let gas_used = gas_field(&tx, "sys_fee").unwrap_or_else(|e| {
            warn!("Unreadable sys_fee on {}: {}", transaction_id, e);
            TokenAmount::ZERO
        });

        info!(
            "Transaction relayed: {} (fee {}, gas {})",
            transaction_id,
            fee_paid.to_decimal_string(GAS_DECIMALS),
            gas_used.to_decimal_string(GAS_DECIMALS)
        );

        Ok(TransferOutcome::Submitted {
            transaction_id,
            fee_paid,
            gas_used,
            raw: tx,
        })
    }
}

#[async_trait]
impl TransferGateway for NeoRpcGateway {
    async fn get_balance(&self) -> FaucetResult<TokenAmount> {
        let result = self
            .rpc
            .call("getwalletbalance", json!([self.token.script_hash]))
            .await?;

        match result.get("balance").and_then(Value::as_str) {
            Some(balance) => TokenAmount::parse_decimal(balance, self.token.decimals),
            // The wallet holds none of the token yet.
            None => Ok(TokenAmount::ZERO),
        }
    }

    async fn submit_transfer(&self, to: &WalletAddress, amount: TokenAmount) -> TransferOutcome {
        match self.send(to, amount).await {
            Ok(outcome) => outcome,
            Err(e) => {
                warn!("Transfer to {} failed: {}", to, e);
                TransferOutcome::Failed {
                    detail: e.to_string(),
                }
            }
        }
    }

    async fn confirmation(&self, transaction_id: &str) -> FaucetResult<Confirmation> {
        match self
            .rpc
            .request("getrawtransaction", json!([transaction_id, 1]))
            .await?
        {
            RpcReply::Result(tx) => {
                let confirmations = tx.get("confirmations").and_then(Value::as_u64).unwrap_or(0);
                if confirmations > 0 {
                    Ok(Confirmation::Confirmed { confirmations })
                } else {
                    Ok(Confirmation::Pending)
                }
            }
            RpcReply::Error { code, .. } if code == UNKNOWN_TRANSACTION => {
                debug!("Transaction {} not yet known to node", transaction_id);
                Ok(Confirmation::Pending)
            }
            RpcReply::Error { code, message } => {
                Err(FaucetError::RpcError(format!("{} (code {})", message, code)))
            }
        }
    }

    async fn chain_status(&self) -> FaucetResult<ChainStatus> {
        // getblockcount reports the number of blocks, one more than the tip height.
        let count = self.rpc.call("getblockcount", json!([])).await?;
        let wallet_height = self.rpc.call("getwalletheight", json!([])).await?;

        Ok(ChainStatus {
            height: count.as_u64().unwrap_or(0).saturating_sub(1),
            wallet_height: wallet_height.as_u64().unwrap_or(0),
        })
    }
}

/// Reads a GAS-denominated field that the node reports as a decimal string
/// or a number. Missing fields count as zero.
fn gas_field(tx: &Value, field: &str) -> FaucetResult<TokenAmount> {
    match tx.get(field) {
        Some(Value::String(s)) => TokenAmount::parse_decimal(s, GAS_DECIMALS),
        Some(Value::Number(n)) => TokenAmount::parse_decimal(&n.to_string(), GAS_DECIMALS),
        _ => Ok(TokenAmount::ZERO),
    }
}
