//! Login (Shamir-first unlock, TouchID fallback, device switch) and account
//! recovery scenarios.

mod common;

use common::build_harness;
use passkey_wallet::config::SignerMode;
use passkey_wallet::errors::ErrorKind;
use passkey_wallet::orchestrator::login::LoginOptions;
use passkey_wallet::orchestrator::registration::RegistrationOptions;

#[tokio::test]
async fn login_unlocks_via_shamir_without_a_prompt() {
    let harness = build_harness(SignerMode::LocalSigner);
    harness
        .wallet
        .register_passkey("alice.near", RegistrationOptions::default())
        .await
        .unwrap();
    harness.wallet.logout_and_clear_session().await.unwrap();

    let result = harness
        .wallet
        .login(Some("alice.near"), LoginOptions::default())
        .await
        .unwrap();

    assert!(result.unlocked_via_shamir);
    assert_eq!(result.account_id, "alice.near");
    assert!(harness.wallet.check_vrf_status().await.unwrap().active);
}

#[tokio::test]
async fn login_falls_back_to_touch_id_when_shamir_relay_fails() {
    let harness = build_harness(SignerMode::LocalSigner);
    harness
        .wallet
        .register_passkey("alice.near", RegistrationOptions::default())
        .await
        .unwrap();
    harness.wallet.logout_and_clear_session().await.unwrap();

    harness.relay.set_fail_shamir(true);
    let result = harness
        .wallet
        .login(Some("alice.near"), LoginOptions::default())
        .await
        .unwrap();

    assert!(!result.unlocked_via_shamir);
    assert!(harness.wallet.check_vrf_status().await.unwrap().active);
}

#[tokio::test]
async fn fallback_unlock_rotates_the_server_encrypted_keypair() {
    let harness = build_harness(SignerMode::LocalSigner);
    harness
        .wallet
        .register_passkey("alice.near", RegistrationOptions::default())
        .await
        .unwrap();
    harness.wallet.logout_and_clear_session().await.unwrap();

    // Rotate the relay's Shamir exponent: the stored blob is now from a dead
    // epoch, so the Shamir unlock fails and TouchID takes over; the fallback
    // re-encrypts under the new epoch.
    harness.relay.rotate_server_key("key-epoch-2");
    let result = harness
        .wallet
        .login(Some("alice.near"), LoginOptions::default())
        .await
        .unwrap();
    assert!(!result.unlocked_via_shamir);

    // Next login goes through Shamir again under the rotated epoch.
    harness.wallet.logout_and_clear_session().await.unwrap();
    let result = harness
        .wallet
        .login(Some("alice.near"), LoginOptions::default())
        .await
        .unwrap();
    assert!(result.unlocked_via_shamir);
}

#[tokio::test]
async fn login_can_mint_a_server_session_jwt() {
    let harness = build_harness(SignerMode::LocalSigner);
    harness
        .wallet
        .register_passkey("alice.near", RegistrationOptions::default())
        .await
        .unwrap();
    harness.wallet.logout_and_clear_session().await.unwrap();

    let result = harness
        .wallet
        .login(
            Some("alice.near"),
            LoginOptions {
                mint_server_session: true,
            },
        )
        .await
        .unwrap();
    assert_eq!(result.jwt.as_deref(), Some("jwt-for-alice.near"));
}

#[tokio::test]
async fn recovery_restores_vault_rows_from_an_existing_passkey() {
    let harness = build_harness(SignerMode::LocalSigner);
    let registration = harness
        .wallet
        .register_passkey("alice.near", RegistrationOptions::default())
        .await
        .unwrap();

    // Simulate a fresh install: wipe local rows, keep the chain + passkey.
    harness.wallet.logout_and_clear_session().await.unwrap();
    // (recovery assigns the next device number; the original rows stay.)

    let session = harness
        .wallet
        .discover_recovery_options(Some("alice.near"))
        .await
        .unwrap();
    assert_eq!(session.options().len(), 1);
    assert_eq!(session.options()[0].account_id, "alice.near");

    let result = harness.wallet.recover_account(&session, 0).await.unwrap();
    assert_eq!(result.account_id, "alice.near");
    // Deterministic derivation reproduces the registered public key.
    assert_eq!(result.near_public_key, registration.near_public_key);
    assert!(harness.wallet.check_vrf_status().await.unwrap().active);
}

#[tokio::test]
async fn recovery_without_account_hint_uses_the_user_handle() {
    let harness = build_harness(SignerMode::LocalSigner);
    harness
        .wallet
        .register_passkey("alice.near", RegistrationOptions::default())
        .await
        .unwrap();
    harness.wallet.logout_and_clear_session().await.unwrap();

    let session = harness.wallet.discover_recovery_options(None).await.unwrap();
    assert_eq!(session.options()[0].account_id, "alice.near");
}

#[tokio::test]
async fn login_with_unknown_credential_is_a_passkey_mismatch() {
    let harness = build_harness(SignerMode::LocalSigner);
    harness
        .wallet
        .register_passkey("alice.near", RegistrationOptions::default())
        .await
        .unwrap();
    harness.wallet.logout_and_clear_session().await.unwrap();

    // A passkey the vault has never seen for this account.
    harness
        .wallet
        .register_passkey("mallory.near", RegistrationOptions::default())
        .await
        .unwrap();
    harness.wallet.logout_and_clear_session().await.unwrap();

    // Force the TouchID path and steer the prompt to mallory's credential.
    harness.relay.set_fail_shamir(true);
    let mallory_cred = harness
        .authenticator
        .credential_ids()
        .into_iter()
        .max()
        .unwrap();
    harness.authenticator.set_preferred_credential(&mallory_cred);

    let err = harness
        .wallet
        .login(Some("alice.near"), LoginOptions::default())
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::VrfSessionPasskeyMismatch);
}
