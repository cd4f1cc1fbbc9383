mod common;

use chrono::{Duration as ChronoDuration, Utc};
use common::*;
use spout_faucet::gateway::Confirmation;
use spout_faucet::ledger::Scope;
use spout_faucet::service::{ClaimOutcome, ClaimRequest, FaucetService, QuotaOnFailure};
use spout_faucet::ClaimLedger;
use std::sync::Arc;
use std::time::Duration;

#[tokio::test]
async fn test_successful_claim() {
    let h = Harness::new(FakeGateway::funded());

    let outcome = h.service.ask(&claim(&wallet(1), "10.0.0.1")).await;
    let ClaimOutcome::Success(receipt) = outcome else {
        panic!("expected success, got {:?}", outcome);
    };

    assert_eq!(receipt.transaction_id, TXID);
    assert_eq!(receipt.address, wallet(1));
    assert_eq!(receipt.amount.units(), DRIP);
    assert_eq!(receipt.confirmation, Confirmation::Confirmed { confirmations: 1 });
    assert_eq!(h.records(Scope::Ip).await, 1);
    assert_eq!(h.records(Scope::Wallet).await, 1);
    assert_eq!(h.gateway.submissions(), 1);
}

#[tokio::test]
async fn test_repeat_claim_is_denied_without_writes() {
    let h = Harness::new(FakeGateway::funded());
    let request = claim(&wallet(1), "10.0.0.1");

    assert!(matches!(h.service.ask(&request).await, ClaimOutcome::Success(_)));
    let writes = h.ledger.writes();

    match h.service.ask(&request).await {
        ClaimOutcome::Denied { scope, reason } => {
            assert_eq!(scope, Some(Scope::Wallet));
            assert!(reason.starts_with("Already requested"));
        }
        other => panic!("expected denial, got {:?}", other),
    }
    assert_eq!(h.ledger.writes(), writes);
    assert_eq!(h.records(Scope::Ip).await, 1);
    assert_eq!(h.records(Scope::Wallet).await, 1);
    assert_eq!(h.gateway.submissions(), 1);
}

#[tokio::test]
async fn test_fourth_claim_from_one_ip_is_denied() {
    let h = Harness::new(FakeGateway::funded());

    for n in 1..=3 {
        let outcome = h.service.ask(&claim(&wallet(n), "10.0.0.1")).await;
        assert!(matches!(outcome, ClaimOutcome::Success(_)), "claim {}: {:?}", n, outcome);
    }

    match h.service.ask(&claim(&wallet(4), "10.0.0.1")).await {
        ClaimOutcome::Denied { scope, reason } => {
            assert_eq!(scope, Some(Scope::Ip));
            assert!(reason.contains("too many times"));
        }
        other => panic!("expected denial, got {:?}", other),
    }
    assert_eq!(h.records(Scope::Wallet).await, 3);
    assert_eq!(h.records(Scope::Ip).await, 3);

    // Another network address is unaffected.
    let outcome = h.service.ask(&claim(&wallet(4), "10.0.0.2")).await;
    assert!(matches!(outcome, ClaimOutcome::Success(_)));
}

#[tokio::test]
async fn test_wallet_denial_leaves_no_ip_record() {
    let h = Harness::new(FakeGateway::funded());
    assert!(matches!(
        h.service.ask(&claim(&wallet(1), "10.0.0.1")).await,
        ClaimOutcome::Success(_)
    ));

    let outcome = h.service.ask(&claim(&wallet(1), "10.0.0.2")).await;
    assert!(matches!(outcome, ClaimOutcome::Denied { scope: Some(Scope::Wallet), .. }));

    let since = Utc::now() - ChronoDuration::days(1);
    assert_eq!(h.ledger.count_since(Scope::Ip, "10.0.0.2", since).await.unwrap(), 0);
    assert_eq!(h.records(Scope::Ip).await, 1);
}

#[tokio::test]
async fn test_low_balance_is_unavailable_without_ledger_access() {
    let h = Harness::new(FakeGateway::with_balance(DRIP - 1));

    let outcome = h.service.ask(&claim(&wallet(1), "10.0.0.1")).await;
    match &outcome {
        ClaimOutcome::Unavailable { message } => assert!(message.contains("NO ASSETS AVAILABLE")),
        other => panic!("expected unavailable, got {:?}", other),
    }
    assert_eq!(h.ledger.reads(), 0);
    assert_eq!(h.ledger.writes(), 0);
    assert_eq!(h.gateway.submissions(), 0);
}

#[tokio::test]
async fn test_invalid_input_is_denied_without_writes() {
    let h = Harness::new(FakeGateway::funded());

    let blank = ClaimRequest {
        address_to: Some("   ".to_string()),
        client_ip: "10.0.0.1".to_string(),
    };
    match h.service.ask(&blank).await {
        ClaimOutcome::Denied { scope: None, reason } => {
            assert_eq!(reason, "You must input a wallet address to proceed")
        }
        other => panic!("expected denial, got {:?}", other),
    }

    let missing = ClaimRequest {
        address_to: None,
        client_ip: "10.0.0.1".to_string(),
    };
    assert!(matches!(h.service.ask(&missing).await, ClaimOutcome::Denied { scope: None, .. }));

    let garbage = ClaimRequest {
        address_to: Some("0x1234".to_string()),
        client_ip: "10.0.0.1".to_string(),
    };
    match h.service.ask(&garbage).await {
        ClaimOutcome::Denied { scope: None, reason } => assert!(reason.starts_with("Invalid wallet address")),
        other => panic!("expected denial, got {:?}", other),
    }

    // The faucet never pays itself.
    let own = claim(&wallet(0), "10.0.0.1");
    assert!(matches!(h.service.ask(&own).await, ClaimOutcome::Denied { scope: None, .. }));

    assert_eq!(h.ledger.writes(), 0);
    assert_eq!(h.gateway.submissions(), 0);
}

#[tokio::test]
async fn test_storage_failure_fails_closed() {
    let gateway = Arc::new(FakeGateway::funded());
    let service = FaucetService::new(settings(), Arc::new(BrokenLedger), gateway.clone()).unwrap();

    match service.ask(&claim(&wallet(1), "10.0.0.1")).await {
        ClaimOutcome::Failed { message } => {
            assert_eq!(message, "Request failed. Please try again.");
            assert!(!message.contains("storage offline"));
        }
        other => panic!("expected failure, got {:?}", other),
    }
    assert_eq!(gateway.submissions(), 0);
}

#[tokio::test]
async fn test_failed_transfer_keeps_quota_by_default() {
    let h = Harness::new(FakeGateway::failing("insufficient network fee"));

    match h.service.ask(&claim(&wallet(1), "10.0.0.1")).await {
        ClaimOutcome::Failed { message } => {
            assert!(message.starts_with("Error constructing transaction"));
            assert!(message.contains("insufficient network fee"));
        }
        other => panic!("expected failure, got {:?}", other),
    }
    assert_eq!(h.records(Scope::Ip).await, 1);
    assert_eq!(h.records(Scope::Wallet).await, 1);

    let retry = h.service.ask(&claim(&wallet(1), "10.0.0.1")).await;
    assert!(matches!(retry, ClaimOutcome::Denied { scope: Some(Scope::Wallet), .. }));
}

#[tokio::test]
async fn test_failed_transfer_releases_quota_when_configured() {
    let mut settings = settings();
    settings.on_submit_failure = QuotaOnFailure::Release;
    let h = Harness::with_settings(FakeGateway::failing("node busy"), settings);

    let outcome = h.service.ask(&claim(&wallet(1), "10.0.0.1")).await;
    assert!(matches!(outcome, ClaimOutcome::Failed { .. }));
    assert_eq!(h.records(Scope::Ip).await, 0);
    assert_eq!(h.records(Scope::Wallet).await, 0);

    // The wallet may try again straight away.
    let retry = h.service.ask(&claim(&wallet(1), "10.0.0.1")).await;
    assert!(matches!(retry, ClaimOutcome::Failed { .. }));
    assert_eq!(h.gateway.submissions(), 2);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_submissions_are_serialized() {
    let h = Harness::new(FakeGateway::slow(Duration::from_millis(30)));

    let claims = (1..=5u8).map(|n| {
        let service = h.service.clone();
        tokio::spawn(async move { service.ask(&claim(&wallet(n), &format!("10.0.1.{}", n))).await })
    });
    for outcome in futures::future::join_all(claims).await {
        assert!(matches!(outcome.unwrap(), ClaimOutcome::Success(_)));
    }

    assert_eq!(h.gateway.submissions(), 5);
    assert_eq!(h.gateway.max_in_flight.load(std::sync::atomic::Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_slow_submission_is_unknown_not_failed() {
    let mut settings = settings();
    settings.submit_timeout = Duration::from_millis(20);
    let h = Harness::with_settings(FakeGateway::slow(Duration::from_millis(300)), settings);

    match h.service.ask(&claim(&wallet(1), "10.0.0.1")).await {
        ClaimOutcome::Unknown { message } => assert!(message.contains("not been confirmed")),
        other => panic!("expected unknown, got {:?}", other),
    }
    // The transfer may still land, so the quota stays spent.
    assert_eq!(h.records(Scope::Wallet).await, 1);

    // The submission keeps running in the background.
    tokio::time::sleep(Duration::from_millis(400)).await;
    assert_eq!(h.gateway.submissions(), 1);
}

#[tokio::test]
async fn test_window_rolls_over() {
    let h = Harness::new(FakeGateway::funded());
    let start = Utc::now();
    let request = claim(&wallet(1), "10.0.0.1");

    assert!(matches!(h.service.ask_at(&request, start).await, ClaimOutcome::Success(_)));
    let six_days = start + ChronoDuration::days(6);
    assert!(matches!(h.service.ask_at(&request, six_days).await, ClaimOutcome::Denied { .. }));
    let eight_days = start + ChronoDuration::days(8);
    assert!(matches!(h.service.ask_at(&request, eight_days).await, ClaimOutcome::Success(_)));
}

#[tokio::test]
async fn test_status_and_purge() {
    let mut settings = settings();
    settings.record_retention = ChronoDuration::zero();
    let h = Harness::with_settings(FakeGateway::funded(), settings);

    assert!(matches!(
        h.service.ask(&claim(&wallet(1), "10.0.0.1")).await,
        ClaimOutcome::Success(_)
    ));

    let status = h.service.status().await;
    assert!(status.can_dispense());
    assert_eq!(status.wallet_claims, 1);
    assert_eq!(status.ip_claims, 1);
    assert_eq!(status.chain.height, 100);
    assert_eq!(status.faucet_wallet, Some(wallet(0)));

    assert_eq!(h.service.purge_expired().await.unwrap(), 2);
    assert_eq!(h.service.status().await.wallet_claims, 0);
}

#[tokio::test]
async fn test_outcomes_are_counted() {
    let h = Harness::new(FakeGateway::funded());
    h.service.ask(&claim(&wallet(1), "10.0.0.1")).await;
    h.service.ask(&claim(&wallet(1), "10.0.0.1")).await;

    let text = h.service.metrics().encode().unwrap();
    assert!(text.contains("faucet_claims_total{outcome=\"success\"} 1"));
    assert!(text.contains("faucet_claims_total{outcome=\"denied\"} 1"));
    assert!(text.contains("faucet_submit_duration_seconds_count 1"));
}
