mod common;

use common::{public_key, sign, TestNetwork, NAMESPACE};
use identity_service::models::{KeyType, RequestMode, ResponseStatus, UpdateNodeParams};
use identity_service::services::providers::CallbackDirectory;

const IDENTIFIER: &str = "5100900456789";

#[tokio::test]
async fn disabled_namespace_blocks_new_requests_and_identities() {
    let network = TestNetwork::spawn().await;
    network
        .onboard("idp1", IDENTIFIER, RequestMode::Two)
        .await
        .expect("Onboarding rejected");
    let existing = network
        .create_request(network.request_params(RequestMode::Two, IDENTIFIER, 1))
        .await;

    network
        .governance
        .disable_namespace(NAMESPACE)
        .expect("Disable rejected");
    assert!(network
        .governance
        .list_namespaces()
        .iter()
        .all(|ns| ns.namespace != NAMESPACE));

    let err = network
        .engine
        .create_request("rp1", network.request_params(RequestMode::Two, IDENTIFIER, 1))
        .await
        .unwrap_err();
    assert_eq!(err.code(), 20013);

    let err = network
        .onboard("idp2", "5100900000000", RequestMode::Two)
        .await
        .unwrap_err();
    assert_eq!(err.code(), 20013);

    // Requests opened before the switch are unaffected.
    network
        .respond(
            "idp1",
            &existing.request_id,
            ResponseStatus::Accept,
        )
        .await
        .expect("Existing request rejected the response");

    network
        .governance
        .enable_namespace(NAMESPACE)
        .expect("Enable rejected");
    network
        .engine
        .create_request("rp1", network.request_params(RequestMode::Two, IDENTIFIER, 1))
        .await
        .expect("Request rejected after enabling");
}

#[tokio::test]
async fn inactive_node_cannot_act() {
    let network = TestNetwork::spawn().await;
    network
        .onboard("idp1", IDENTIFIER, RequestMode::Two)
        .await
        .expect("Onboarding rejected");

    network
        .governance
        .set_node_active("rp1", false)
        .expect("Deactivate rejected");
    let err = network
        .engine
        .create_request("rp1", network.request_params(RequestMode::Two, IDENTIFIER, 1))
        .await
        .unwrap_err();
    assert_eq!(err.code(), 20005);
}

#[tokio::test]
async fn rotated_node_key_takes_effect() {
    let network = TestNetwork::spawn().await;
    let check_string = network
        .governance
        .issue_check_string("idp1")
        .expect("No check string");

    let node = network
        .governance
        .update_node(
            "idp1",
            UpdateNodeParams {
                check_string: check_string.clone(),
                node_key: Some(public_key(60)),
                node_key_type: Some(KeyType::Ed25519),
                signed_check_string: Some(sign(60, check_string.as_bytes())),
                ..Default::default()
            },
        )
        .expect("Rotation rejected");
    assert_eq!(node.public_key, public_key(60));

    let err = network
        .governance
        .update_node(
            "idp1",
            UpdateNodeParams {
                check_string,
                node_key: Some(public_key(61)),
                signed_check_string: Some(sign(61, b"anything")),
                ..Default::default()
            },
        )
        .unwrap_err();
    assert_eq!(err.code(), 20050);

    let check_string = network
        .governance
        .issue_check_string("idp1")
        .expect("No check string");
    let err = network
        .governance
        .update_node(
            "idp1",
            UpdateNodeParams {
                check_string: check_string.clone(),
                node_key: Some(public_key(61)),
                signed_check_string: Some(sign(62, check_string.as_bytes())),
                ..Default::default()
            },
        )
        .unwrap_err();
    assert_eq!(err.code(), 20063);
    assert_eq!(
        network.governance.get_node("idp1").expect("Node missing").public_key,
        public_key(60)
    );
}

#[tokio::test]
async fn callback_urls_are_resolved_per_node() {
    let network = TestNetwork::spawn().await;
    network
        .governance
        .set_callback_url("rp1", "http://rp1.local/callback")
        .expect("Callback URL rejected");

    assert_eq!(
        network.governance.callback_url("rp1").as_deref(),
        Some("http://rp1.local/callback")
    );
    assert!(network.governance.callback_url("idp1").is_none());
}
