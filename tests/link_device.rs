//! Device-linking scenarios: the QR + temporary-key swap happy path, the
//! safety-net bookkeeping, and the passkey-mismatch device switch at login.

mod common;

use common::build_harness;
use passkey_wallet::config::SignerMode;
use passkey_wallet::orchestrator::login::LoginOptions;
use passkey_wallet::orchestrator::registration::RegistrationOptions;

#[tokio::test]
async fn link_device_happy_path_swaps_the_temporary_key() {
    let harness = build_harness(SignerMode::LocalSigner);

    // Device1: register and stay logged in.
    let registration = harness
        .wallet
        .register_passkey("alice.near", RegistrationOptions::default())
        .await
        .unwrap();

    // Device2: QR payload with a temporary key.
    let device2_session = harness
        .wallet
        .start_device2_linking(Some("alice.near"))
        .unwrap();
    let temp_public_key = device2_session.qr_payload.device2_public_key.clone();
    assert_eq!(device2_session.qr_payload.version, "1.0");

    // Device1 scans and authorizes with one prompt (3 signed transactions,
    // 2 broadcast immediately).
    let device1_result = harness
        .wallet
        .link_device_with_qr(device2_session.qr_payload.clone())
        .await
        .unwrap();
    device1_result.cancel_safety_net.cancel();

    // The mapping and the temporary access key are on-chain.
    assert!(harness
        .chain
        .access_keys("alice.near")
        .contains(&temp_public_key));

    // Device2 polls, swaps keys and registers itself without a new prompt.
    let link_result = harness
        .wallet
        .poll_and_complete_device2_linking(&device2_session)
        .await
        .unwrap();

    assert_eq!(link_result.account_id, "alice.near");
    assert_eq!(link_result.device_number, 2);

    let keys = harness.chain.access_keys("alice.near");
    assert!(keys.contains(&link_result.near_public_key));
    assert!(keys.contains(&registration.near_public_key));
    // The temporary key is gone.
    assert!(!keys.contains(&temp_public_key));

    // Device2 is logged in with an active VRF session.
    let status = harness.wallet.check_vrf_status().await.unwrap();
    assert!(status.active);
    let current = harness.wallet.current_user().await.unwrap();
    assert_eq!(current.device_number, 2);
}

#[tokio::test]
async fn stale_qr_payloads_are_rejected() {
    let harness = build_harness(SignerMode::LocalSigner);
    harness
        .wallet
        .register_passkey("alice.near", RegistrationOptions::default())
        .await
        .unwrap();

    let mut qr = harness
        .wallet
        .start_device2_linking(Some("alice.near"))
        .unwrap()
        .qr_payload
        .clone();
    // Older than the linking session TTL.
    qr.timestamp = qr.timestamp.saturating_sub(11 * 60 * 1000);

    let err = harness.wallet.link_device_with_qr(qr).await.unwrap_err();
    assert_eq!(
        err.kind(),
        passkey_wallet::errors::ErrorKind::LinkDeviceSessionExpired
    );
}

#[tokio::test]
async fn login_switches_device_when_a_different_passkey_is_picked() {
    let harness = build_harness(SignerMode::LocalSigner);

    // Device 1 registers, device 2 arrives via linking.
    let registration = harness
        .wallet
        .register_passkey("alice.near", RegistrationOptions::default())
        .await
        .unwrap();
    let device2_session = harness
        .wallet
        .start_device2_linking(Some("alice.near"))
        .unwrap();
    let device1_result = harness
        .wallet
        .link_device_with_qr(device2_session.qr_payload.clone())
        .await
        .unwrap();
    device1_result.cancel_safety_net.cancel();
    let link_result = harness
        .wallet
        .poll_and_complete_device2_linking(&device2_session)
        .await
        .unwrap();

    // Vault believes device 1 was last used; the user picks device 2's
    // passkey during the TouchID fallback.
    harness.wallet.logout_and_clear_session().await.unwrap();
    harness.vault.set_last_user("alice.near", 1).unwrap();
    harness.relay.set_fail_shamir(true);

    let device2_credential = harness
        .vault
        .list_authenticators("alice.near")
        .unwrap()
        .into_iter()
        .find(|a| a.device_number == 2)
        .map(|a| a.credential_id)
        .expect("device 2 authenticator");
    harness
        .authenticator
        .set_preferred_credential(&device2_credential);

    let login = harness
        .wallet
        .login(Some("alice.near"), LoginOptions::default())
        .await
        .unwrap();

    // The effective record switched to device 2.
    assert_eq!(login.device_number, 2);
    assert_eq!(login.near_public_key, link_result.near_public_key);
    assert_ne!(login.near_public_key, registration.near_public_key);
}
