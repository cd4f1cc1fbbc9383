//! Faucet configuration

use crate::address::WalletAddress;
use crate::amount::TokenAmount;
use crate::error::{FaucetError, FaucetResult};
use crate::identity::{ClientIpSource, DEFAULT_IP_HEADER};
use crate::ledger::SCAN_CAP;
use crate::limiter::RateLimitPolicy;
use crate::service::{AdmissionSettings, QuotaOnFailure};
use serde::{Deserialize, Serialize};
use spout_common::LoggingConfig;
use std::fmt;
use std::path::PathBuf;
use std::time::Duration;

/// Settings exactly as read from config files and the environment.
///
/// Field names match the environment variables, lowercased.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct RawSettings {
    pub token_name: Option<String>,
    pub token_symbol: Option<String>,
    pub token_script_hash: Option<String>,
    pub token_decimals: Option<u32>,

    pub faucet_wallet_path: Option<String>,
    pub faucet_wallet_password: Option<String>,
    pub faucet_wallet_address: Option<String>,

    pub faucet_host: Option<String>,
    pub faucet_port: Option<u16>,
    pub faucet_rpc_url: Option<String>,
    pub faucet_db_path: Option<String>,

    pub faucet_drip_amount: Option<u64>,
    pub faucet_claim_window_secs: Option<u64>,
    pub faucet_ip_max_claims: Option<u32>,
    pub faucet_wallet_max_claims: Option<u32>,

    pub faucet_client_ip_source: Option<String>,
    pub faucet_client_ip_header: Option<String>,

    pub faucet_confirm_attempts: Option<u32>,
    pub faucet_confirm_interval_ms: Option<u64>,
    pub faucet_submit_timeout_secs: Option<u64>,
    pub faucet_release_on_submit_failure: Option<bool>,

    pub faucet_burst_per_minute: Option<u32>,
    pub faucet_receipt_ttl_secs: Option<u64>,
    pub faucet_cleanup_interval_secs: Option<u64>,

    pub faucet_log_level: Option<String>,
    pub faucet_log_format: Option<String>,
    pub faucet_log_dir: Option<PathBuf>,
}

/// Token the faucet hands out.
#[derive(Debug, Clone, Serialize)]
pub struct TokenInfo {
    pub name: String,
    pub symbol: String,
    pub script_hash: String,
    pub decimals: u32,
}

/// Faucet wallet as opened on the node.
#[derive(Clone)]
pub struct WalletSettings {
    pub path: String,
    pub password: String,
    pub address: WalletAddress,
}

impl fmt::Debug for WalletSettings {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WalletSettings")
            .field("path", &self.path)
            .field("password", &"<redacted>")
            .field("address", &self.address)
            .finish()
    }
}

/// Faucet service configuration
#[derive(Debug, Clone)]
pub struct FaucetConfig {
    pub token: TokenInfo,
    pub wallet: WalletSettings,

    /// Listen host
    pub host: String,
    /// Listen port
    pub port: u16,

    /// RPC endpoint of the node
    pub rpc_url: String,
    /// Ledger database path
    pub db_path: String,

    /// Whole tokens dispensed per claim
    pub drip_amount: u64,
    /// Rolling window shared by both rate limits
    pub claim_window: Duration,
    pub ip_max_claims: u32,
    pub wallet_max_claims: u32,

    pub client_ip_source: ClientIpSource,

    pub confirm_attempts: u32,
    pub confirm_interval: Duration,
    pub submit_timeout: Duration,
    pub release_on_submit_failure: bool,

    /// Claims accepted per minute across all clients before shedding
    pub burst_per_minute: u32,
    /// How long a success page stays retrievable
    pub receipt_ttl: Duration,
    pub cleanup_interval: Duration,

    pub logging: LoggingConfig,
}

impl FaucetConfig {
    /// Validates raw settings and fills in defaults.
    pub fn from_settings(raw: RawSettings) -> FaucetResult<Self> {
        let mut missing = Vec::new();
        let mut required = |value: Option<String>, key: &'static str| {
            match value.map(|v| v.trim().to_string()).filter(|v| !v.is_empty()) {
                Some(v) => v,
                None => {
                    missing.push(key);
                    String::new()
                }
            }
        };

        let token_name = required(raw.token_name, "TOKEN_NAME");
        let token_symbol = required(raw.token_symbol, "TOKEN_SYMBOL");
        let token_script_hash = required(raw.token_script_hash, "TOKEN_SCRIPT_HASH");
        let wallet_path = required(raw.faucet_wallet_path, "FAUCET_WALLET_PATH");
        let wallet_password = required(raw.faucet_wallet_password, "FAUCET_WALLET_PASSWORD");
        let wallet_address = required(raw.faucet_wallet_address, "FAUCET_WALLET_ADDRESS");

        if !missing.is_empty() {
            return Err(FaucetError::Configuration(format!(
                "Please set {}",
                missing.join(", ")
            )));
        }

        validate_script_hash(&token_script_hash)?;
        let address = WalletAddress::parse(&wallet_address).map_err(|e| {
            FaucetError::Configuration(format!("FAUCET_WALLET_ADDRESS is not valid: {}", e))
        })?;

        let client_ip_source = ClientIpSource::parse(
            raw.faucet_client_ip_source.as_deref().unwrap_or("socket"),
            raw.faucet_client_ip_header.as_deref().unwrap_or(DEFAULT_IP_HEADER),
        )
        .map_err(FaucetError::Configuration)?;

        // Ledger counts stop at SCAN_CAP, so a larger limit would never trigger.
        let ip_max_claims = raw.faucet_ip_max_claims.unwrap_or(3);
        let wallet_max_claims = raw.faucet_wallet_max_claims.unwrap_or(1);
        for (key, max_claims) in [
            ("FAUCET_IP_MAX_CLAIMS", ip_max_claims),
            ("FAUCET_WALLET_MAX_CLAIMS", wallet_max_claims),
        ] {
            if max_claims as usize > SCAN_CAP {
                return Err(FaucetError::Configuration(format!(
                    "{} must be at most {}, got {}",
                    key, SCAN_CAP, max_claims
                )));
            }
        }

        let burst_per_minute = raw.faucet_burst_per_minute.unwrap_or(60);
        if burst_per_minute == 0 {
            return Err(FaucetError::Configuration(
                "FAUCET_BURST_PER_MINUTE must be at least 1".to_string(),
            ));
        }

        let logging = LoggingConfig {
            level: raw.faucet_log_level.unwrap_or_else(|| "info".to_string()),
            format: raw.faucet_log_format.unwrap_or_else(|| "pretty".to_string()),
            log_dir: raw.faucet_log_dir,
            ..Default::default()
        };

        let config = Self {
            token: TokenInfo {
                name: token_name,
                symbol: token_symbol,
                script_hash: token_script_hash,
                decimals: raw.token_decimals.unwrap_or(8),
            },
            wallet: WalletSettings {
                path: wallet_path,
                password: wallet_password,
                address,
            },
            host: raw.faucet_host.unwrap_or_else(|| "localhost".to_string()),
            port: raw.faucet_port.unwrap_or(80),
            rpc_url: raw
                .faucet_rpc_url
                .unwrap_or_else(|| "http://localhost:20332".to_string()),
            db_path: raw.faucet_db_path.unwrap_or_else(|| "./faucet_data".to_string()),
            drip_amount: raw.faucet_drip_amount.unwrap_or(10_000),
            claim_window: Duration::from_secs(raw.faucet_claim_window_secs.unwrap_or(7 * 24 * 3600)),
            ip_max_claims,
            wallet_max_claims,
            client_ip_source,
            confirm_attempts: raw.faucet_confirm_attempts.unwrap_or(3),
            confirm_interval: Duration::from_millis(raw.faucet_confirm_interval_ms.unwrap_or(1_000)),
            submit_timeout: Duration::from_secs(raw.faucet_submit_timeout_secs.unwrap_or(30)),
            release_on_submit_failure: raw.faucet_release_on_submit_failure.unwrap_or(false),
            burst_per_minute,
            receipt_ttl: Duration::from_secs(raw.faucet_receipt_ttl_secs.unwrap_or(600)),
            cleanup_interval: Duration::from_secs(raw.faucet_cleanup_interval_secs.unwrap_or(86_400)),
            logging,
        };

        // Fail at startup rather than on the first claim.
        config.admission()?;
        Ok(config)
    }

    /// Drip amount in the token's smallest unit
    pub fn drip_units(&self) -> FaucetResult<TokenAmount> {
        TokenAmount::from_whole(self.drip_amount, self.token.decimals).ok_or_else(|| {
            FaucetError::Configuration(format!(
                "Drip amount {} does not fit with {} decimals",
                self.drip_amount, self.token.decimals
            ))
        })
    }

    /// Settings for the admission pipeline
    pub fn admission(&self) -> FaucetResult<AdmissionSettings> {
        let window = chrono::Duration::from_std(self.claim_window).map_err(|_| {
            FaucetError::Configuration("FAUCET_CLAIM_WINDOW_SECS is too large".to_string())
        })?;

        Ok(AdmissionSettings {
            drip_amount: self.drip_units()?,
            ip_policy: RateLimitPolicy::new(window, self.ip_max_claims),
            wallet_policy: RateLimitPolicy::new(window, self.wallet_max_claims),
            record_retention: window,
            on_submit_failure: if self.release_on_submit_failure {
                QuotaOnFailure::Release
            } else {
                QuotaOnFailure::Retain
            },
            confirm_attempts: self.confirm_attempts,
            confirm_interval: self.confirm_interval,
            submit_timeout: self.submit_timeout,
            faucet_address: Some(self.wallet.address.clone()),
        })
    }
}

/// Script hashes are 20 bytes of hex, optionally `0x`-prefixed.
fn validate_script_hash(script_hash: &str) -> FaucetResult<()> {
    let digits = script_hash.strip_prefix("0x").unwrap_or(script_hash);
    match hex::decode(digits) {
        Ok(bytes) if bytes.len() == 20 => Ok(()),
        _ => Err(FaucetError::Configuration(format!(
            "TOKEN_SCRIPT_HASH must be 20 bytes of hex, got {:?}",
            script_hash
        ))),
    }
}
