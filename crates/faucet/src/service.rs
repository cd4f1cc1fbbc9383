//! Faucet service core logic
//!
//! A claim moves through: balance pre-check, address validation, IP check,
//! wallet check, commit of both ledger records, submission, confirmation.
//! Records are committed before the transfer is submitted. If submission
//! fails they stay committed unless [`QuotaOnFailure::Release`] is set.

use crate::address::WalletAddress;
use crate::amount::TokenAmount;
use crate::error::{FaucetError, FaucetResult};
use crate::gateway::{ChainStatus, Confirmation, TransferGateway, TransferOutcome};
use crate::ledger::{ClaimLedger, ClaimRecord, Scope};
use crate::limiter::{self, RateLimitPolicy};
use crate::metrics::FaucetMetrics;
use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::Value;
use spout_common::AUDIT_TARGET;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tracing::{debug, error, info, warn};

/// What happens to committed quota when the transfer itself fails.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum QuotaOnFailure {
    /// Keep both records; the claim counts even though nothing was sent.
    #[default]
    Retain,
    /// Remove the records committed for this claim.
    Release,
}

/// Pipeline parameters.
#[derive(Debug, Clone)]
pub struct AdmissionSettings {
    pub drip_amount: TokenAmount,
    pub ip_policy: RateLimitPolicy,
    pub wallet_policy: RateLimitPolicy,
    /// Advisory lifetime stamped on new records
    pub record_retention: chrono::Duration,
    pub on_submit_failure: QuotaOnFailure,
    /// Confirmation polls after a successful submission. Zero disables polling.
    pub confirm_attempts: u32,
    pub confirm_interval: Duration,
    /// Bound on waiting for a submission. Expiry leaves the outcome unknown.
    pub submit_timeout: Duration,
    /// Claims to this address are refused
    pub faucet_address: Option<WalletAddress>,
}

/// One incoming claim.
#[derive(Debug, Clone)]
pub struct ClaimRequest {
    /// Raw form input
    pub address_to: Option<String>,
    pub client_ip: String,
}

/// What a successful claim hands back to the user.
#[derive(Debug, Clone, Serialize)]
pub struct TransferReceipt {
    pub address: WalletAddress,
    pub amount: TokenAmount,
    pub transaction_id: String,
    pub fee_paid: TokenAmount,
    pub gas_used: TokenAmount,
    pub confirmation: Confirmation,
    pub transaction: Value,
    pub submitted_at: DateTime<Utc>,
}

/// Terminal state of a claim.
#[derive(Debug, Clone)]
pub enum ClaimOutcome {
    Success(TransferReceipt),
    /// Rejected before anything was written. `scope` is set for rate-limit
    /// denials and empty for invalid input.
    Denied {
        scope: Option<Scope>,
        reason: String,
    },
    Failed {
        message: String,
    },
    /// Faucet balance is below one drip.
    Unavailable {
        message: String,
    },
    /// The submission outlived its timeout and may still have been relayed.
    Unknown {
        message: String,
    },
}

impl ClaimOutcome {
    pub fn label(&self) -> &'static str {
        match self {
            ClaimOutcome::Success(_) => "success",
            ClaimOutcome::Denied { .. } => "denied",
            ClaimOutcome::Failed { .. } => "failed",
            ClaimOutcome::Unavailable { .. } => "unavailable",
            ClaimOutcome::Unknown { .. } => "unknown",
        }
    }

    pub fn message(&self) -> String {
        match self {
            ClaimOutcome::Success(receipt) => format!(
                "Your request has been relayed to the network. Transaction: {}",
                receipt.transaction_id
            ),
            ClaimOutcome::Denied { reason, .. } => reason.clone(),
            ClaimOutcome::Failed { message }
            | ClaimOutcome::Unavailable { message }
            | ClaimOutcome::Unknown { message } => message.clone(),
        }
    }
}

pub const UNAVAILABLE_MESSAGE: &str = "NO ASSETS AVAILABLE. Come back later.";
const RETRY_MESSAGE: &str = "Request failed. Please try again.";

impl From<FaucetError> for ClaimOutcome {
    fn from(err: FaucetError) -> Self {
        match err {
            FaucetError::Validation(reason) => ClaimOutcome::Denied { scope: None, reason },
            FaucetError::RateLimited { scope, reason } => ClaimOutcome::Denied {
                scope: Some(scope),
                reason,
            },
            FaucetError::InsufficientFunds => ClaimOutcome::Unavailable {
                message: UNAVAILABLE_MESSAGE.to_string(),
            },
            FaucetError::TransactionFailed(detail) => ClaimOutcome::Failed {
                message: format!("Error constructing transaction: {}", detail),
            },
            FaucetError::RpcError(detail) => ClaimOutcome::Failed {
                message: format!("Could not reach the blockchain node: {}", detail),
            },
            FaucetError::SubmissionTimedOut(_) => ClaimOutcome::Unknown {
                message: "Your transfer was handed to the network but has not been confirmed yet. \
                          Check your wallet before asking again."
                    .to_string(),
            },
            err if err.is_storage() => {
                error!("Claim ledger unavailable: {}", err);
                ClaimOutcome::Failed {
                    message: RETRY_MESSAGE.to_string(),
                }
            }
            other => {
                error!("Claim failed: {}", other);
                ClaimOutcome::Failed {
                    message: RETRY_MESSAGE.to_string(),
                }
            }
        }
    }
}

/// Snapshot for the status page.
#[derive(Debug, Clone, Serialize)]
pub struct FaucetStatus {
    pub faucet_wallet: Option<WalletAddress>,
    pub balance: TokenAmount,
    pub drip_amount: TokenAmount,
    pub chain: ChainStatus,
    pub wallet_claims: usize,
    pub ip_claims: usize,
}

impl FaucetStatus {
    pub fn can_dispense(&self) -> bool {
        self.balance >= self.drip_amount
    }
}

/// Faucet service
pub struct FaucetService {
    settings: AdmissionSettings,
    ledger: Arc<dyn ClaimLedger>,
    gateway: Arc<dyn TransferGateway>,
    /// One signing wallet, so one submission at a time.
    submit_lock: Arc<Mutex<()>>,
    metrics: FaucetMetrics,
}

impl FaucetService {
    /// Create new faucet service
    pub fn new(
        settings: AdmissionSettings,
        ledger: Arc<dyn ClaimLedger>,
        gateway: Arc<dyn TransferGateway>,
    ) -> FaucetResult<Self> {
        let metrics = FaucetMetrics::new()
            .map_err(|e| FaucetError::InternalError(format!("Failed to register metrics: {}", e)))?;

        Ok(Self {
            settings,
            ledger,
            gateway,
            submit_lock: Arc::new(Mutex::new(())),
            metrics,
        })
    }

    pub fn settings(&self) -> &AdmissionSettings {
        &self.settings
    }

    pub fn metrics(&self) -> &FaucetMetrics {
        &self.metrics
    }

    /// Runs a claim through the pipeline. Never fails: every error becomes
    /// an outcome the caller can render.
    pub async fn ask(&self, request: &ClaimRequest) -> ClaimOutcome {
        self.ask_at(request, Utc::now()).await
    }

    /// [`ask`](Self::ask) with an explicit clock.
    pub async fn ask_at(&self, request: &ClaimRequest, now: DateTime<Utc>) -> ClaimOutcome {
        let outcome = match self.admit(request, now).await {
            Ok(receipt) => ClaimOutcome::Success(receipt),
            Err(err) => ClaimOutcome::from(err),
        };

        self.metrics.record_outcome(outcome.label());
        info!(
            target: AUDIT_TARGET,
            ip = %request.client_ip,
            address = loggable(request.address_to.as_deref().unwrap_or("")),
            outcome = outcome.label(),
            "{}",
            outcome.message()
        );
        outcome
    }

    async fn admit(&self, request: &ClaimRequest, now: DateTime<Utc>) -> FaucetResult<TransferReceipt> {
        self.ensure_funds().await?;

        let address = WalletAddress::parse(request.address_to.as_deref().unwrap_or(""))?;
        if self.settings.faucet_address.as_ref() == Some(&address) {
            return Err(FaucetError::Validation(
                "Cannot send to the faucet's own wallet".to_string(),
            ));
        }

        let client = request.client_ip.as_str();
        self.check_scope(Scope::Ip, client, &self.settings.ip_policy, now).await?;
        self.check_scope(Scope::Wallet, address.as_str(), &self.settings.wallet_policy, now)
            .await?;

        // Both checks passed. Only now does the IP side get a record, so a
        // wallet denial never spends IP quota.
        let ip_record = ClaimRecord::new(client, now, self.settings.record_retention);
        let wallet_record = ClaimRecord::new(address.as_str(), now, self.settings.record_retention);
        self.ledger.append(Scope::Ip, &ip_record).await?;
        self.ledger.append(Scope::Wallet, &wallet_record).await?;

        info!(
            target: AUDIT_TARGET,
            ip = %client,
            address = %address,
            at = %now.to_rfc3339(),
            "Claim recorded"
        );

        match self.submit(&address).await? {
            TransferOutcome::Submitted {
                transaction_id,
                fee_paid,
                gas_used,
                raw,
            } => {
                info!("Transfer to {} relayed as {}", address, transaction_id);
                let confirmation = self.await_confirmation(&transaction_id).await;
                Ok(TransferReceipt {
                    address,
                    amount: self.settings.drip_amount,
                    transaction_id,
                    fee_paid,
                    gas_used,
                    confirmation,
                    transaction: raw,
                    submitted_at: now,
                })
            }
            TransferOutcome::Failed { detail } => {
                warn!("Transfer to {} failed after commit: {}", address, detail);
                self.release_quota(&ip_record, &wallet_record).await;
                Err(FaucetError::TransactionFailed(detail))
            }
        }
    }

    async fn ensure_funds(&self) -> FaucetResult<()> {
        let balance = self.gateway.get_balance().await?;
        self.metrics.balance.set(balance.units() as f64);

        if balance < self.settings.drip_amount {
            warn!("NO ASSETS AVAILABLE: balance {} below drip", balance.units());
            return Err(FaucetError::InsufficientFunds);
        }
        Ok(())
    }

    async fn check_scope(
        &self,
        scope: Scope,
        identity: &str,
        policy: &RateLimitPolicy,
        now: DateTime<Utc>,
    ) -> FaucetResult<()> {
        let decision = limiter::check(self.ledger.as_ref(), scope, identity, policy, now).await?;
        info!(
            target: AUDIT_TARGET,
            scope = %scope,
            identity = %identity,
            "{} TOTAL: {}",
            scope.table(),
            decision.observed_count
        );

        if decision.allowed {
            Ok(())
        } else {
            Err(FaucetError::RateLimited {
                scope,
                reason: decision
                    .reason
                    .unwrap_or_else(|| limiter::denial_reason(scope, policy)),
            })
        }
    }

    /// Submits the drip under the global submission lock.
    ///
    /// The submission runs as its own task so that hitting the timeout stops
    /// the wait, not the transfer.
    async fn submit(&self, to: &WalletAddress) -> FaucetResult<TransferOutcome> {
        let gateway = Arc::clone(&self.gateway);
        let lock = Arc::clone(&self.submit_lock);
        let to = to.clone();
        let amount = self.settings.drip_amount;

        let timer = self.metrics.submit_duration.start_timer();
        let task = tokio::spawn(async move {
            let _guard = lock.lock_owned().await;
            gateway.submit_transfer(&to, amount).await
        });
        let result = tokio::time::timeout(self.settings.submit_timeout, task).await;
        timer.observe_duration();

        match result {
            Ok(Ok(outcome)) => Ok(outcome),
            Ok(Err(e)) => Err(FaucetError::InternalError(format!("Submission task failed: {}", e))),
            Err(_) => {
                warn!(
                    "Submission still running after {:?}; outcome unknown",
                    self.settings.submit_timeout
                );
                Err(FaucetError::SubmissionTimedOut(self.settings.submit_timeout.as_secs()))
            }
        }
    }

    async fn await_confirmation(&self, transaction_id: &str) -> Confirmation {
        let attempts = self.settings.confirm_attempts;
        for attempt in 1..=attempts {
            match self.gateway.confirmation(transaction_id).await {
                Ok(confirmed @ Confirmation::Confirmed { .. }) => return confirmed,
                Ok(Confirmation::Pending) => {
                    debug!("{} pending (poll {}/{})", transaction_id, attempt, attempts)
                }
                Err(e) => warn!("Confirmation poll for {} failed: {}", transaction_id, e),
            }
            if attempt < attempts {
                tokio::time::sleep(self.settings.confirm_interval).await;
            }
        }
        Confirmation::Pending
    }

    async fn release_quota(&self, ip_record: &ClaimRecord, wallet_record: &ClaimRecord) {
        if self.settings.on_submit_failure != QuotaOnFailure::Release {
            return;
        }

        for (scope, record) in [(Scope::Ip, ip_record), (Scope::Wallet, wallet_record)] {
            match self.ledger.remove(scope, record).await {
                Ok(()) => info!(target: AUDIT_TARGET, scope = %scope, identity = %record.identity, "Quota released"),
                Err(e) => error!("Failed to release {} quota for {}: {}", scope, record.identity, e),
            }
        }
    }

    /// Status snapshot. Node errors are logged and shown as zeros.
    pub async fn status(&self) -> FaucetStatus {
        let balance = match self.gateway.get_balance().await {
            Ok(balance) => {
                self.metrics.balance.set(balance.units() as f64);
                balance
            }
            Err(e) => {
                warn!("Balance query failed: {}", e);
                TokenAmount::ZERO
            }
        };

        let chain = self.gateway.chain_status().await.unwrap_or_else(|e| {
            warn!("Chain status query failed: {}", e);
            ChainStatus::default()
        });

        FaucetStatus {
            faucet_wallet: self.settings.faucet_address.clone(),
            balance,
            drip_amount: self.settings.drip_amount,
            chain,
            wallet_claims: self.count_records(Scope::Wallet).await,
            ip_claims: self.count_records(Scope::Ip).await,
        }
    }

    async fn count_records(&self, scope: Scope) -> usize {
        self.ledger.len(scope).await.unwrap_or_else(|e| {
            warn!("Counting {} records failed: {}", scope, e);
            0
        })
    }

    /// Garbage-collects records past their advisory expiry.
    pub async fn purge_expired(&self) -> FaucetResult<usize> {
        self.ledger.purge_expired(Utc::now()).await
    }
}

/// Longest slice of raw user input written to the logs.
const LOGGED_INPUT_MAX: usize = 64;

/// Clips unvalidated input before it reaches a log line.
pub fn loggable(input: &str) -> &str {
    match input.char_indices().nth(LOGGED_INPUT_MAX) {
        Some((end, _)) => &input[..end],
        None => input,
    }
}
