//! Claim ledger: durable, append-only history of past claims per identity.
//!
//! Each scope lives in its own sled tree. Keys are the identity, a zero
//! byte, then the claim time in big-endian microseconds, so all claims of one
//! identity are contiguous and ordered by time. That makes "claims since T"
//! a single bounded range scan.

use crate::error::{FaucetError, FaucetResult};
use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use sled::{Db, Tree};
use std::fmt;
use std::path::Path;
use tracing::{debug, info};

/// Upper bound on records visited by [`ClaimLedger::count_since`].
///
/// Counts are a lower bound once an identity has more than this many claims in
/// the window. Rate-limit thresholds are far below it, so comparisons against
/// them stay exact.
pub const SCAN_CAP: usize = 10;

/// Identity dimension a claim is recorded and limited under.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Scope {
    Ip,
    Wallet,
}

impl Scope {
    pub const ALL: [Scope; 2] = [Scope::Ip, Scope::Wallet];

    /// Name of the tree holding this scope's records.
    pub fn table(&self) -> &'static str {
        match self {
            Scope::Ip => "IPRequest",
            Scope::Wallet => "FaucetRequest",
        }
    }
}

impl fmt::Display for Scope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Scope::Ip => f.write_str("ip"),
            Scope::Wallet => f.write_str("wallet"),
        }
    }
}

/// One past claim.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClaimRecord {
    /// Wallet address or client IP
    pub identity: String,
    /// Claim time
    #[serde(with = "chrono::serde::ts_microseconds")]
    pub timestamp: DateTime<Utc>,
    /// When garbage collection may drop the record. Rate-limit math ignores it.
    #[serde(with = "chrono::serde::ts_microseconds")]
    pub expiry: DateTime<Utc>,
}

impl ClaimRecord {
    pub fn new(identity: impl Into<String>, timestamp: DateTime<Utc>, retention: Duration) -> Self {
        let expiry = timestamp
            .checked_add_signed(retention)
            .unwrap_or(DateTime::<Utc>::MAX_UTC);
        Self {
            identity: identity.into(),
            timestamp,
            expiry,
        }
    }

    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.expiry <= now
    }
}

/// Durable store of past claims.
///
/// Implementations must tolerate concurrent callers without external locking.
/// Appends are not idempotent: a retried append may store a duplicate, which
/// only ever over-counts.
#[async_trait]
pub trait ClaimLedger: Send + Sync {
    /// Number of records for `identity` with `timestamp >= since`, capped at
    /// [`SCAN_CAP`].
    async fn count_since(&self, scope: Scope, identity: &str, since: DateTime<Utc>) -> FaucetResult<usize>;

    /// Persists a new record.
    async fn append(&self, scope: Scope, record: &ClaimRecord) -> FaucetResult<()>;

    /// Deletes one record. Only used to hand quota back after a failed transfer.
    async fn remove(&self, scope: Scope, record: &ClaimRecord) -> FaucetResult<()>;

    /// Drops every record whose advisory expiry has passed. Returns how many
    /// were removed.
    async fn purge_expired(&self, now: DateTime<Utc>) -> FaucetResult<usize>;

    /// Total records held for a scope.
    async fn len(&self, scope: Scope) -> FaucetResult<usize>;
}

/// sled-backed ledger.
pub struct SledLedger {
    db: Db,
    ip_requests: Tree,
    wallet_requests: Tree,
}

impl SledLedger {
    /// Create or open the ledger database
    pub fn open<P: AsRef<Path>>(path: P) -> FaucetResult<Self> {
        info!("Opening claim ledger at: {}", path.as_ref().display());

        let db = sled::Config::default()
            .path(path)
            .cache_capacity(64 * 1024 * 1024) // 64MB cache
            .open()?;

        Self::from_db(db)
    }

    pub fn from_db(db: Db) -> FaucetResult<Self> {
        let ip_requests = db.open_tree(Scope::Ip.table())?;
        let wallet_requests = db.open_tree(Scope::Wallet.table())?;

        Ok(Self {
            db,
            ip_requests,
            wallet_requests,
        })
    }

    fn tree(&self, scope: Scope) -> Tree {
        match scope {
            Scope::Ip => self.ip_requests.clone(),
            Scope::Wallet => self.wallet_requests.clone(),
        }
    }

    /// Flush everything to disk
    pub async fn flush(&self) -> FaucetResult<()> {
        self.db.flush_async().await?;
        Ok(())
    }
}

#[async_trait]
impl ClaimLedger for SledLedger {
    async fn count_since(&self, scope: Scope, identity: &str, since: DateTime<Utc>) -> FaucetResult<usize> {
        let tree = self.tree(scope);
        let start = record_key(identity, since);
        let end = record_key_at(identity, u64::MAX);

        blocking(move || {
            let mut count = 0;
            for item in tree.range(start..=end).take(SCAN_CAP) {
                item?;
                count += 1;
            }
            Ok(count)
        })
        .await
    }

    async fn append(&self, scope: Scope, record: &ClaimRecord) -> FaucetResult<()> {
        let tree = self.tree(scope);
        let key = record_key(&record.identity, record.timestamp);
        let value = bincode::serialize(record)?;

        blocking(move || {
            tree.insert(key, value)?;
            tree.flush()?;
            Ok(())
        })
        .await?;

        debug!(scope = %scope, identity = %record.identity, "Appended claim record");
        Ok(())
    }

    async fn remove(&self, scope: Scope, record: &ClaimRecord) -> FaucetResult<()> {
        let tree = self.tree(scope);
        let key = record_key(&record.identity, record.timestamp);

        blocking(move || {
            tree.remove(key)?;
            tree.flush()?;
            Ok(())
        })
        .await
    }

    async fn purge_expired(&self, now: DateTime<Utc>) -> FaucetResult<usize> {
        let trees: Vec<Tree> = Scope::ALL.iter().map(|scope| self.tree(*scope)).collect();

        let removed = blocking(move || {
            let mut removed = 0;
            for tree in trees {
                let mut expired = Vec::new();
                for item in tree.iter() {
                    let (key, value) = item?;
                    let record: ClaimRecord = bincode::deserialize(&value)?;
                    if record.is_expired(now) {
                        expired.push(key);
                    }
                }
                for key in expired {
                    tree.remove(key)?;
                    removed += 1;
                }
                tree.flush()?;
            }
            Ok(removed)
        })
        .await?;

        info!("Purged {} expired claim records", removed);
        Ok(removed)
    }

    async fn len(&self, scope: Scope) -> FaucetResult<usize> {
        Ok(self.tree(scope).len())
    }
}

/// Runs sled work off the async executor.
async fn blocking<T, F>(work: F) -> FaucetResult<T>
where
    F: FnOnce() -> FaucetResult<T> + Send + 'static,
    T: Send + 'static,
{
    tokio::task::spawn_blocking(work)
        .await
        .map_err(|e| FaucetError::InternalError(format!("Ledger task failed: {}", e)))?
}

fn record_key(identity: &str, at: DateTime<Utc>) -> Vec<u8> {
    // Pre-epoch instants clamp to zero; they sort before every real claim.
    let micros = u64::try_from(at.timestamp_micros()).unwrap_or(0);
    record_key_at(identity, micros)
}

fn record_key_at(identity: &str, micros: u64) -> Vec<u8> {
    let mut key = Vec::with_capacity(identity.len() + 9);
    key.extend_from_slice(identity.as_bytes());
    key.push(0);
    key.extend_from_slice(&micros.to_be_bytes());
    key
}
