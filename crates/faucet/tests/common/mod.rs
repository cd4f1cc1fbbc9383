#![allow(dead_code)]

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::json;
use spout_faucet::address::WalletAddress;
use spout_faucet::amount::TokenAmount;
use spout_faucet::gateway::{ChainStatus, Confirmation, TransferGateway, TransferOutcome};
use spout_faucet::ledger::{ClaimLedger, ClaimRecord, Scope, SledLedger};
use spout_faucet::limiter::RateLimitPolicy;
use spout_faucet::service::{AdmissionSettings, ClaimRequest, QuotaOnFailure};
use spout_faucet::{FaucetError, FaucetResult, FaucetService};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;

pub const DRIP: u128 = 10_000;
pub const TXID: &str = "deadbeef";

pub fn wallet(n: u8) -> WalletAddress {
    WalletAddress::from_script_hash([n; 20])
}

pub fn claim(wallet: &WalletAddress, ip: &str) -> ClaimRequest {
    ClaimRequest {
        address_to: Some(wallet.to_string()),
        client_ip: ip.to_string(),
    }
}

pub fn settings() -> AdmissionSettings {
    AdmissionSettings {
        drip_amount: TokenAmount::from_units(DRIP),
        ip_policy: RateLimitPolicy::ip_default(),
        wallet_policy: RateLimitPolicy::wallet_default(),
        record_retention: chrono::Duration::days(7),
        on_submit_failure: QuotaOnFailure::Retain,
        confirm_attempts: 2,
        confirm_interval: Duration::from_millis(1),
        submit_timeout: Duration::from_secs(5),
        faucet_address: Some(wallet(0)),
    }
}

/// Scripted node.
pub struct FakeGateway {
    pub balance: TokenAmount,
    pub fail_with: Option<String>,
    pub delay: Duration,
    pub submissions: AtomicUsize,
    in_flight: AtomicUsize,
    pub max_in_flight: AtomicUsize,
}

impl FakeGateway {
    pub fn with_balance(units: u128) -> Self {
        Self {
            balance: TokenAmount::from_units(units),
            fail_with: None,
            delay: Duration::ZERO,
            submissions: AtomicUsize::new(0),
            in_flight: AtomicUsize::new(0),
            max_in_flight: AtomicUsize::new(0),
        }
    }

    pub fn funded() -> Self {
        Self::with_balance(DRIP * 100)
    }

    pub fn failing(detail: &str) -> Self {
        Self {
            fail_with: Some(detail.to_string()),
            ..Self::funded()
        }
    }

    pub fn slow(delay: Duration) -> Self {
        Self {
            delay,
            ..Self::funded()
        }
    }

    pub fn submissions(&self) -> usize {
        self.submissions.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl TransferGateway for FakeGateway {
    async fn get_balance(&self) -> FaucetResult<TokenAmount> {
        Ok(self.balance)
    }

    async fn submit_transfer(&self, _to: &WalletAddress, _amount: TokenAmount) -> TransferOutcome {
        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(now, Ordering::SeqCst);
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        self.in_flight.fetch_sub(1, Ordering::SeqCst);
        self.submissions.fetch_add(1, Ordering::SeqCst);

        match &self.fail_with {
            Some(detail) => TransferOutcome::Failed {
                detail: detail.clone(),
            },
            None => TransferOutcome::Submitted {
                transaction_id: TXID.to_string(),
                fee_paid: TokenAmount::ZERO,
                gas_used: TokenAmount::ZERO,
                raw: json!({"txid": TXID, "net_fee": "0"}),
            },
        }
    }

    async fn confirmation(&self, _transaction_id: &str) -> FaucetResult<Confirmation> {
        Ok(Confirmation::Confirmed { confirmations: 1 })
    }

    async fn chain_status(&self) -> FaucetResult<ChainStatus> {
        Ok(ChainStatus {
            height: 100,
            wallet_height: 100,
        })
    }
}

/// Sled ledger that counts how often it is touched.
pub struct CountingLedger {
    inner: SledLedger,
    pub reads: AtomicUsize,
    pub writes: AtomicUsize,
}

impl CountingLedger {
    pub fn reads(&self) -> usize {
        self.reads.load(Ordering::SeqCst)
    }

    pub fn writes(&self) -> usize {
        self.writes.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ClaimLedger for CountingLedger {
    async fn count_since(&self, scope: Scope, identity: &str, since: DateTime<Utc>) -> FaucetResult<usize> {
        self.reads.fetch_add(1, Ordering::SeqCst);
        self.inner.count_since(scope, identity, since).await
    }

    async fn append(&self, scope: Scope, record: &ClaimRecord) -> FaucetResult<()> {
        self.writes.fetch_add(1, Ordering::SeqCst);
        self.inner.append(scope, record).await
    }

    async fn remove(&self, scope: Scope, record: &ClaimRecord) -> FaucetResult<()> {
        self.writes.fetch_add(1, Ordering::SeqCst);
        self.inner.remove(scope, record).await
    }

    async fn purge_expired(&self, now: DateTime<Utc>) -> FaucetResult<usize> {
        self.inner.purge_expired(now).await
    }

    async fn len(&self, scope: Scope) -> FaucetResult<usize> {
        self.inner.len(scope).await
    }
}

/// Ledger whose storage is gone.
pub struct BrokenLedger;

fn broken() -> FaucetError {
    FaucetError::DatabaseError(sled::Error::Unsupported("storage offline".to_string()))
}

#[async_trait]
impl ClaimLedger for BrokenLedger {
    async fn count_since(&self, _: Scope, _: &str, _: DateTime<Utc>) -> FaucetResult<usize> {
        Err(broken())
    }

    async fn append(&self, _: Scope, _: &ClaimRecord) -> FaucetResult<()> {
        Err(broken())
    }

    async fn remove(&self, _: Scope, _: &ClaimRecord) -> FaucetResult<()> {
        Err(broken())
    }

    async fn purge_expired(&self, _: DateTime<Utc>) -> FaucetResult<usize> {
        Err(broken())
    }

    async fn len(&self, _: Scope) -> FaucetResult<usize> {
        Err(broken())
    }
}

/// A service over a fresh on-disk ledger.
pub struct Harness {
    pub service: Arc<FaucetService>,
    pub ledger: Arc<CountingLedger>,
    pub gateway: Arc<FakeGateway>,
    _dir: TempDir,
}

impl Harness {
    pub fn new(gateway: FakeGateway) -> Self {
        Self::with_settings(gateway, settings())
    }

    pub fn with_settings(gateway: FakeGateway, settings: AdmissionSettings) -> Self {
        let dir = TempDir::new().unwrap();
        let ledger = Arc::new(CountingLedger {
            inner: SledLedger::open(dir.path().join("ledger")).unwrap(),
            reads: AtomicUsize::new(0),
            writes: AtomicUsize::new(0),
        });
        let gateway = Arc::new(gateway);
        let service = Arc::new(
            FaucetService::new(settings, ledger.clone(), gateway.clone()).unwrap(),
        );

        Self {
            service,
            ledger,
            gateway,
            _dir: dir,
        }
    }

    pub async fn records(&self, scope: Scope) -> usize {
        self.ledger.len(scope).await.unwrap()
    }
}
