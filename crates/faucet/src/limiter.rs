//! Rolling-window rate limiting over the claim ledger

use crate::error::FaucetResult;
use crate::ledger::{ClaimLedger, Scope};
use chrono::{DateTime, Duration, Utc};

/// Claims allowed per identity within a rolling window.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RateLimitPolicy {
    pub window: Duration,
    pub max_claims: u32,
}

impl RateLimitPolicy {
    pub fn new(window: Duration, max_claims: u32) -> Self {
        Self { window, max_claims }
    }

    /// Three claims per network address per week.
    pub fn ip_default() -> Self {
        Self::new(Duration::days(7), 3)
    }

    /// One claim per wallet per week.
    pub fn wallet_default() -> Self {
        Self::new(Duration::days(7), 1)
    }
}

/// Result of evaluating a policy for one identity.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClaimDecision {
    pub allowed: bool,
    pub observed_count: usize,
    /// Set only when the claim is denied.
    pub reason: Option<String>,
}

/// Evaluates `policy` for `identity` as of `now`.
///
/// Reads the ledger and nothing else, so two calls against the same ledger
/// state and `now` always agree. A claim is allowed while fewer than
/// `max_claims` claims fall inside the window.
pub async fn check(
    ledger: &dyn ClaimLedger,
    scope: Scope,
    identity: &str,
    policy: &RateLimitPolicy,
    now: DateTime<Utc>,
) -> FaucetResult<ClaimDecision> {
    let since = now
        .checked_sub_signed(policy.window)
        .unwrap_or(DateTime::<Utc>::MIN_UTC);
    let observed_count = ledger.count_since(scope, identity, since).await?;
    let allowed = observed_count < policy.max_claims as usize;

    Ok(ClaimDecision {
        allowed,
        observed_count,
        reason: (!allowed).then(|| denial_reason(scope, policy)),
    })
}

/// User-facing explanation for a denial in `scope`.
pub fn denial_reason(scope: Scope, policy: &RateLimitPolicy) -> String {
    let window = describe_window(policy.window);
    match scope {
        Scope::Ip => format!(
            "You have requested too many times from this network address within the past {}. \
             Try again once that period has passed.",
            window
        ),
        Scope::Wallet => format!("Already requested within the past {}", window),
    }
}

fn describe_window(window: Duration) -> String {
    let plural = |n: i64, unit: &str| {
        if n == 1 {
            format!("1 {}", unit)
        } else {
            format!("{} {}s", n, unit)
        }
    };

    let secs = window.num_seconds();
    if secs >= 86_400 && secs % 86_400 == 0 {
        plural(secs / 86_400, "day")
    } else if secs >= 3_600 && secs % 3_600 == 0 {
        plural(secs / 3_600, "hour")
    } else if secs >= 60 && secs % 60 == 0 {
        plural(secs / 60, "minute")
    } else {
        plural(secs, "second")
    }
}
