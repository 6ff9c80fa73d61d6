mod common;

use common::{engine_config, TestNetwork};
use identity_service::models::{CallbackEvent, RequestMode, RequestStatus, ResponseStatus};
use identity_service::config::EngineConfig;
use std::time::Duration;

const IDENTIFIER: &str = "1409900123456";

#[tokio::test]
async fn expired_request_times_out_and_rejects_responses() {
    let network = TestNetwork::spawn().await;
    network
        .onboard("idp1", IDENTIFIER, RequestMode::Two)
        .await
        .expect("Onboarding rejected");

    let mut params = network.request_params(RequestMode::Two, IDENTIFIER, 1);
    params.request_timeout = 1;
    let accepted = network.create_request(params).await;

    let timed_out = network
        .wait_for_status("rp1", &accepted.request_id, |s| s.timed_out)
        .await;
    assert!(timed_out.closed);
    assert_eq!(timed_out.status, RequestStatus::Pending);

    let idp_view = network
        .wait_for_status("idp1", &accepted.request_id, |s| s.timed_out)
        .await;
    assert_eq!(idp_view.block_height, timed_out.block_height);

    let err = network
        .respond("idp1", &accepted.request_id, ResponseStatus::Accept)
        .await
        .unwrap_err();
    assert_eq!(err.code(), 20026);
}

#[tokio::test]
async fn completed_request_does_not_time_out() {
    let network = TestNetwork::spawn().await;
    network
        .onboard("idp1", IDENTIFIER, RequestMode::Two)
        .await
        .expect("Onboarding rejected");

    let mut params = network.request_params(RequestMode::Two, IDENTIFIER, 1);
    params.request_timeout = 1;
    let accepted = network.create_request(params).await;
    network
        .respond("idp1", &accepted.request_id, ResponseStatus::Accept)
        .await
        .expect("Response rejected");

    network
        .wait_for_status("rp1", &accepted.request_id, |s| s.closed)
        .await;
    tokio::time::sleep(Duration::from_millis(1_300)).await;

    let request = network
        .engine
        .get_request(&accepted.request_id)
        .await
        .expect("Request missing");
    assert!(request.closed);
    assert!(!request.timed_out);
    assert_eq!(request.status, RequestStatus::Completed);
    assert!(network
        .statuses("rp1", &accepted.request_id)
        .iter()
        .all(|s| !s.timed_out));
}

#[tokio::test]
async fn unanswered_consent_request_fails_the_change() {
    let network = TestNetwork::with_config(EngineConfig {
        identity_request_timeout_secs: 1,
        ..engine_config()
    })
    .await;
    network
        .onboard("idp1", IDENTIFIER, RequestMode::Three)
        .await
        .expect("Onboarding rejected");
    let accepted = network
        .onboard("idp2", IDENTIFIER, RequestMode::Three)
        .await
        .expect("Second onboarding rejected");
    assert!(accepted.request_id.is_some());

    let event = network
        .wait_for_kind("idp2", "create_identity_result")
        .await;
    let CallbackEvent::CreateIdentityResult(result) = event else {
        panic!("Expected create_identity_result");
    };
    assert!(!result.success);
    assert_eq!(result.error.map(|e| e.code), Some(20026));
}
