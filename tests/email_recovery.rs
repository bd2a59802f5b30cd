//! Email recovery scenarios: mailto construction, verification polling,
//! finalization, timeout and cancellation.

mod common;

use common::build_harness;
use passkey_wallet::config::SignerMode;
use passkey_wallet::Clock;
use passkey_wallet::errors::ErrorKind;
use passkey_wallet::orchestrator::registration::RegistrationOptions;
use tokio_util::sync::CancellationToken;

#[tokio::test]
async fn email_recovery_end_to_end() {
    let harness = build_harness(SignerMode::LocalSigner);

    // Existing account with a funded balance.
    harness
        .wallet
        .register_passkey("alice.near", RegistrationOptions::default())
        .await
        .unwrap();

    let start = harness
        .wallet
        .start_email_recovery("alice.near", "a@b.com")
        .await
        .unwrap();

    // 6-character [A-Z0-9] request id, mailto in the documented format.
    assert_eq!(start.request_id.len(), 6);
    assert!(start
        .request_id
        .chars()
        .all(|c| c.is_ascii_uppercase() || c.is_ascii_digit()));
    assert!(start.mailto_url.starts_with("mailto:recover@wallet.example?subject=recover-"));
    assert!(start
        .mailto_url
        .contains(&format!("recover-{}%20alice.near%20{}", start.request_id, start.new_public_key)));

    // The DKIM verifier contract adds the key on-chain and publishes the
    // verification result.
    harness
        .chain
        .add_access_key("alice.near", &start.new_public_key);
    harness.chain.set_verification_result(
        &start.request_id,
        serde_json::json!({
            "verified": true,
            "account_id": "alice.near",
            "new_public_key": start.new_public_key,
        }),
    );

    let cancel = CancellationToken::new();
    let result = harness
        .wallet
        .poll_and_finalize_email_recovery("alice.near", &cancel)
        .await
        .unwrap();

    assert_eq!(result.account_id, "alice.near");
    assert_eq!(result.device_number, start.device_number);
    assert_eq!(result.near_public_key, start.new_public_key);

    // The new key is on-chain and the pending record is cleared.
    assert!(harness
        .chain
        .access_keys("alice.near")
        .contains(&start.new_public_key));
    assert!(harness
        .vault
        .load_pending_recovery("alice.near", harness.clock.now_ms(), u64::MAX)
        .unwrap()
        .is_none());

    // Auto-login completed.
    assert!(harness.wallet.check_vrf_status().await.unwrap().active);
}

#[tokio::test]
async fn polling_times_out_when_verification_never_lands() {
    let harness = build_harness(SignerMode::LocalSigner);
    harness
        .wallet
        .register_passkey("alice.near", RegistrationOptions::default())
        .await
        .unwrap();

    harness
        .wallet
        .start_email_recovery("alice.near", "a@b.com")
        .await
        .unwrap();

    let cancel = CancellationToken::new();
    let err = harness
        .wallet
        .poll_and_finalize_email_recovery("alice.near", &cancel)
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::EmailPollTimeout);
}

#[tokio::test]
async fn mismatched_verification_result_fails() {
    let harness = build_harness(SignerMode::LocalSigner);
    harness
        .wallet
        .register_passkey("alice.near", RegistrationOptions::default())
        .await
        .unwrap();

    let start = harness
        .wallet
        .start_email_recovery("alice.near", "a@b.com")
        .await
        .unwrap();
    harness.chain.set_verification_result(
        &start.request_id,
        serde_json::json!({
            "verified": true,
            "account_id": "alice.near",
            "new_public_key": "ed25519:SomebodyElsesKey",
        }),
    );

    let cancel = CancellationToken::new();
    let err = harness
        .wallet
        .poll_and_finalize_email_recovery("alice.near", &cancel)
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::EmailVerificationFailed);
}

#[tokio::test]
async fn cancel_and_reset_clears_pending_state() {
    let harness = build_harness(SignerMode::LocalSigner);
    harness
        .wallet
        .register_passkey("alice.near", RegistrationOptions::default())
        .await
        .unwrap();

    harness
        .wallet
        .start_email_recovery("alice.near", "a@b.com")
        .await
        .unwrap();
    assert!(harness
        .vault
        .load_pending_recovery("alice.near", harness.clock.now_ms(), u64::MAX)
        .unwrap()
        .is_some());

    let cancel = CancellationToken::new();
    harness
        .wallet
        .cancel_and_reset_email_recovery("alice.near", &cancel)
        .unwrap();
    assert!(cancel.is_cancelled());
    assert!(harness
        .vault
        .load_pending_recovery("alice.near", harness.clock.now_ms(), u64::MAX)
        .unwrap()
        .is_none());
}

#[tokio::test]
async fn insufficient_balance_blocks_recovery_start() {
    let harness = build_harness(SignerMode::LocalSigner);
    harness
        .wallet
        .register_passkey("poor.near", RegistrationOptions::default())
        .await
        .unwrap();
    // Drain below the configured minimum (relay funds accounts at creation).
    harness.chain.create_account("poor.near", 10);

    let err = harness
        .wallet
        .start_email_recovery("poor.near", "a@b.com")
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::ValidationFailed);
}
