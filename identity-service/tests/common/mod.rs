#![allow(dead_code)]

use base64::{engine::general_purpose::STANDARD, Engine as _};
use ed25519_dalek::{Signer, SigningKey};
use identity_service::config::{DispatcherConfig, EngineConfig, IdentityConfig};
use identity_service::models::{
    CallbackEvent, CreateIdentityParams, CreateRequestAccepted, CreateRequestParams, DataRequest,
    Identity, IdentityOperationAccepted, IdpResponseParams, KeyType, NodeRole,
    RegisterAsServiceParams, RegisterNamespaceParams, RegisterNodeParams, RequestMode,
    RequestStatusEvent, ResponseStatus,
};
use identity_service::services::providers::{CallbackSink, MockCallbackSink};
use identity_service::services::{Dispatcher, Governance, RequestEngine, ServiceError};
use identity_service::startup::Application;
use service_core::config::Config as CoreConfig;
use std::sync::Arc;
use std::time::Duration;

pub const NAMESPACE: &str = "citizen_id";
pub const SERVICE_ID: &str = "bank_statement";
pub const ASSOCIATION_IAL: f64 = 2.3;

pub fn engine_config() -> EngineConfig {
    EngineConfig {
        chain_id: "test-chain".to_string(),
        auto_close_grace_ms: 100,
        identity_request_timeout_secs: 30,
    }
}

pub fn dispatcher_config() -> DispatcherConfig {
    DispatcherConfig {
        initial_backoff_ms: 5,
        max_backoff_ms: 50,
        request_timeout_ms: 1_000,
        mock_callbacks: true,
    }
}

pub fn signing_key(seed: u8) -> SigningKey {
    SigningKey::from_bytes(&[seed; 32])
}

pub fn public_key(seed: u8) -> String {
    STANDARD.encode(signing_key(seed).verifying_key().to_bytes())
}

pub fn sign(seed: u8, message: &[u8]) -> String {
    STANDARD.encode(signing_key(seed).sign(message).to_bytes())
}

fn node_seed(node_id: &str) -> u8 {
    match node_id {
        "rp1" => 1,
        "idp1" => 2,
        "idp2" => 3,
        "as1" => 4,
        "ndid1" => 5,
        _ => 9,
    }
}

/// Seed of the first accessor key each IdP onboards with.
pub fn accessor_seed(idp_id: &str) -> u8 {
    node_seed(idp_id) + 10
}

pub fn accessor_id(idp_id: &str) -> String {
    format!("{}-accessor", idp_id)
}

/// Create-identity parameters using the IdP's default accessor.
pub fn onboarding_params(idp_id: &str, identifier: &str, mode: RequestMode) -> CreateIdentityParams {
    CreateIdentityParams {
        reference_id: format!("onboard-{}-{}", idp_id, identifier),
        identity_list: vec![Identity::new(NAMESPACE, identifier)],
        mode,
        accessor_type: KeyType::Ed25519,
        accessor_public_key: public_key(accessor_seed(idp_id)),
        accessor_id: Some(accessor_id(idp_id)),
        ial: ASSOCIATION_IAL,
        lial: None,
        laal: None,
        request_message: None,
    }
}

/// In-process network: rp1, idp1, idp2, as1 and ndid1 registered, namespace
/// `citizen_id` and service `bank_statement` offered by as1. Callbacks land
/// in a recording sink.
pub struct TestNetwork {
    pub engine: RequestEngine,
    pub governance: Arc<Governance>,
    pub sink: Arc<MockCallbackSink>,
}

impl TestNetwork {
    pub async fn spawn() -> Self {
        Self::with_config(engine_config()).await
    }

    pub async fn with_config(config: EngineConfig) -> Self {
        let governance = Arc::new(Governance::new());
        seed_governance(&governance);

        let sink = Arc::new(MockCallbackSink::new());
        let dispatcher = Dispatcher::new(sink.clone(), dispatcher_config());
        let engine = RequestEngine::new(config, governance.clone(), dispatcher);

        TestNetwork {
            engine,
            governance,
            sink,
        }
    }

    /// Onboard `identifier` with the IdP's default accessor.
    pub async fn onboard(
        &self,
        idp_id: &str,
        identifier: &str,
        mode: RequestMode,
    ) -> Result<IdentityOperationAccepted, ServiceError> {
        self.engine
            .create_identity(idp_id, onboarding_params(idp_id, identifier, mode))
            .await
    }

    pub fn request_params(&self, mode: RequestMode, identifier: &str, min_idp: u32) -> CreateRequestParams {
        let (namespace, identifier) = match mode {
            RequestMode::One => (None, None),
            _ => (Some(NAMESPACE.to_string()), Some(identifier.to_string())),
        };
        CreateRequestParams {
            reference_id: uuid::Uuid::new_v4().to_string(),
            mode,
            namespace,
            identifier,
            idp_id_list: vec![],
            data_request_list: vec![],
            request_message: "Please confirm your identity to open an account".to_string(),
            min_ial: 1.1,
            min_aal: 1.0,
            min_idp,
            request_timeout: 60,
        }
    }

    pub fn bank_statement_request() -> DataRequest {
        DataRequest {
            service_id: SERVICE_ID.to_string(),
            as_id_list: vec![],
            min_as: 1,
            request_params: Some("{\"format\":\"pdf\"}".to_string()),
        }
    }

    pub async fn create_request(&self, params: CreateRequestParams) -> CreateRequestAccepted {
        self.engine
            .create_request("rp1", params)
            .await
            .expect("Failed to create request")
    }

    /// Answer with the IdP's default accessor, signing the stored hash.
    pub async fn respond(
        &self,
        idp_id: &str,
        request_id: &str,
        status: ResponseStatus,
    ) -> Result<(), ServiceError> {
        self.respond_with(idp_id, request_id, status, &accessor_id(idp_id), accessor_seed(idp_id))
            .await
    }

    pub async fn respond_with(
        &self,
        idp_id: &str,
        request_id: &str,
        status: ResponseStatus,
        accessor: &str,
        key_seed: u8,
    ) -> Result<(), ServiceError> {
        let request = self.engine.get_request(request_id).await?;
        let signature = sign(key_seed, request.request_message_hash.as_bytes());
        self.engine
            .submit_idp_response(
                idp_id,
                IdpResponseParams {
                    reference_id: request.reference_id.clone(),
                    request_id: request_id.to_string(),
                    ial: ASSOCIATION_IAL,
                    aal: 2.2,
                    status,
                    accessor_id: Some(accessor.to_string()),
                    signature: Some(signature),
                },
            )
            .await
    }

    pub fn events(&self, node_id: &str) -> Vec<CallbackEvent> {
        self.sink.events_for(node_id)
    }

    pub fn statuses(&self, node_id: &str, request_id: &str) -> Vec<RequestStatusEvent> {
        self.events(node_id)
            .into_iter()
            .filter_map(|event| match event {
                CallbackEvent::RequestStatus(status) if status.request_id == request_id => {
                    Some(status)
                }
                _ => None,
            })
            .collect()
    }

    /// Poll the sink until `node_id` received a matching event.
    pub async fn wait_for<F>(&self, node_id: &str, predicate: F) -> CallbackEvent
    where
        F: Fn(&CallbackEvent) -> bool,
    {
        for _ in 0..200 {
            if let Some(event) = self.events(node_id).into_iter().find(|e| predicate(e)) {
                return event;
            }
            tokio::time::sleep(Duration::from_millis(25)).await;
        }
        panic!(
            "No matching event for {}; received: {:?}",
            node_id,
            self.events(node_id)
                .iter()
                .map(|e| e.kind())
                .collect::<Vec<_>>()
        );
    }

    pub async fn wait_for_kind(&self, node_id: &str, kind: &str) -> CallbackEvent {
        self.wait_for(node_id, |e| e.kind() == kind).await
    }

    pub async fn wait_for_status<F>(&self, node_id: &str, request_id: &str, predicate: F) -> RequestStatusEvent
    where
        F: Fn(&RequestStatusEvent) -> bool,
    {
        let event = self
            .wait_for(node_id, |event| match event {
                CallbackEvent::RequestStatus(status) => {
                    status.request_id == request_id && predicate(status)
                }
                _ => false,
            })
            .await;
        match event {
            CallbackEvent::RequestStatus(status) => status,
            other => panic!("Expected request_status, got {}", other.kind()),
        }
    }

    /// Give queued callbacks time to drain.
    pub async fn settle(&self) {
        tokio::time::sleep(Duration::from_millis(150)).await;
    }
}

fn seed_governance(governance: &Governance) {
    let nodes = [
        ("rp1", NodeRole::Rp),
        ("idp1", NodeRole::Idp),
        ("idp2", NodeRole::Idp),
        ("as1", NodeRole::As),
        ("ndid1", NodeRole::Ndid),
    ];
    for (node_id, role) in nodes {
        let is_idp = role == NodeRole::Idp;
        governance
            .register_node(RegisterNodeParams {
                node_id: node_id.to_string(),
                node_name: format!("Test {}", node_id),
                role,
                public_key: public_key(node_seed(node_id)),
                key_type: KeyType::Ed25519,
                master_public_key: public_key(node_seed(node_id) + 100),
                master_key_type: KeyType::Ed25519,
                max_ial: is_idp.then_some(3.0),
                max_aal: is_idp.then_some(3.0),
            })
            .expect("Failed to register node");
    }

    governance
        .register_namespace(RegisterNamespaceParams {
            namespace: NAMESPACE.to_string(),
            description: "Citizen ID".to_string(),
            allowed_identifier_count_in_reference_group: None,
        })
        .expect("Failed to register namespace");

    governance
        .register_service(SERVICE_ID, "Bank statement")
        .expect("Failed to register service");
    governance
        .register_as_service(
            "as1",
            RegisterAsServiceParams {
                service_id: SERVICE_ID.to_string(),
                min_ial: 1.1,
                min_aal: 1.0,
            },
        )
        .expect("Failed to register AS service");
}

pub struct TestApp {
    pub address: String,
    pub engine: RequestEngine,
    /// Set when callbacks are recorded rather than sent over HTTP.
    pub sink: Option<Arc<MockCallbackSink>>,
}

fn app_config(mock_callbacks: bool) -> IdentityConfig {
    IdentityConfig {
        common: CoreConfig {
            port: 0,
            log_level: "info".to_string(),
            otlp_endpoint: None,
        },
        engine: engine_config(),
        dispatcher: DispatcherConfig {
            mock_callbacks,
            ..dispatcher_config()
        },
    }
}

impl TestApp {
    pub async fn spawn() -> Self {
        let governance = Arc::new(Governance::new());
        seed_governance(&governance);
        let sink = Arc::new(MockCallbackSink::new());
        let callback_sink: Arc<dyn CallbackSink> = sink.clone();

        let app = Application::build_with_sink(app_config(true), governance, callback_sink)
            .await
            .expect("Failed to build test application");
        Self::start(app, Some(sink)).await
    }

    /// The production build: callbacks go over HTTP to registered URLs.
    pub async fn spawn_with_http_callbacks() -> Self {
        let app = Application::build(app_config(false))
            .await
            .expect("Failed to build test application");
        seed_governance(app.engine().governance());
        Self::start(app, None).await
    }

    async fn start(app: Application, sink: Option<Arc<MockCallbackSink>>) -> Self {
        let port = app.http_port();
        let engine = app.engine();
        let address = format!("http://127.0.0.1:{}", port);

        tokio::spawn(async move {
            app.run_until_stopped().await.ok();
        });

        let client = reqwest::Client::new();
        let health_url = format!("{}/health", address);
        for _ in 0..50 {
            if client.get(&health_url).send().await.is_ok() {
                break;
            }
            tokio::time::sleep(Duration::from_millis(50)).await;
        }

        TestApp {
            address,
            engine,
            sink,
        }
    }
}
