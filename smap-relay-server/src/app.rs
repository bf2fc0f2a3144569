// smap-relay server - HTTP front end for the relay
// Copyright (c) 2025 David Martin Venti
//
// Dual-licensed under AGPL-3.0 and Commercial License.
// See LICENSE file for details.

//! HTTP routes and handlers

use crate::metrics::{self, encode_metrics};
use axum::{
    body::Bytes,
    extract::{Path, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use clap::ValueEnum;
use serde::Serialize;
use smap_relay::{
    ingest_routed, ingest_with_identity, ClassResolver, CredentialStore, IdentityFactory,
    IngestReport, IngestStats, Ontology, RelayConfig, RelayError, StoreError, StoreState,
};
use std::sync::Arc;
use std::time::Instant;
use tokio::task::JoinError;
use tracing::{error, info};

/// Which ingest route the server exposes
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum Mode {
    /// `POST /add/:vk/uri/*uri`, published as the identity named in the path
    Identity,
    /// `POST /add/*uri`, addressed through the ontology
    Ontology,
}

impl Mode {
    fn as_str(self) -> &'static str {
        match self {
            Mode::Identity => "identity",
            Mode::Ontology => "ontology",
        }
    }
}

/// Ontology routing and the identity it publishes as
pub struct Routed<I> {
    pub resolver: ClassResolver<Arc<dyn Ontology>>,
    pub identity: Arc<I>,
}

/// Application state shared across handlers.
pub struct AppState<F: IdentityFactory> {
    pub mode: Mode,
    pub store: Arc<CredentialStore<F>>,
    pub routed: Option<Routed<F::Identity>>,
    pub config: RelayConfig,
    pub stats: Arc<IngestStats>,
    pub started: Instant,
}

/// Build the router for `state.mode`
pub fn router<F: IdentityFactory + 'static>(state: Arc<AppState<F>>) -> Router {
    let ingest = match state.mode {
        Mode::Identity => Router::new().route("/add/:vk/uri/*uri", post(ingest_identity::<F>)),
        Mode::Ontology => Router::new().route("/add/*uri", post(ingest_ontology::<F>)),
    };
    ingest
        .route("/health", get(health_handler))
        .route("/status", get(status_handler::<F>))
        .route("/metrics", get(metrics_handler))
        .route("/admin/reload", post(reload_handler::<F>))
        .with_state(state)
}

/// Advance the store's reload by one phase and record it
pub fn reload_step<F: IdentityFactory>(
    store: &CredentialStore<F>,
) -> Result<StoreState, StoreError> {
    let reached = store.signal()?;
    let phase = match reached {
        StoreState::Closed => "drain",
        _ => "resume",
    };
    metrics::record_reload(phase, store.identity_count());
    info!("Reload {} complete, store {}", phase, reached);
    Ok(reached)
}

fn bad_request(err: RelayError) -> Response {
    (StatusCode::BAD_REQUEST, err.to_string()).into_response()
}

fn respond(outcome: Result<smap_relay::Result<IngestReport>, JoinError>) -> Response {
    match outcome {
        Ok(Ok(report)) => {
            metrics::record_ingest(Some(&report));
            StatusCode::OK.into_response()
        }
        Ok(Err(err)) => {
            metrics::record_ingest(None);
            bad_request(err)
        }
        Err(err) => {
            metrics::record_ingest(None);
            error!("Ingest task failed: {}", err);
            (StatusCode::INTERNAL_SERVER_ERROR, err.to_string()).into_response()
        }
    }
}

/// Identity variant: publish as the live identity named by `vk`.
async fn ingest_identity<F: IdentityFactory + 'static>(
    State(state): State<Arc<AppState<F>>>,
    Path((vk, uri)): Path<(String, String)>,
    body: Bytes,
) -> Response {
    let Some(identity) = state.store.identity(&vk) else {
        metrics::record_ingest(None);
        return bad_request(RelayError::UnknownIdentity(vk));
    };
    let outcome = tokio::task::spawn_blocking(move || {
        ingest_with_identity(
            identity.as_ref(),
            &state.config,
            &state.stats,
            &uri,
            &body,
        )
    })
    .await;
    respond(outcome)
}

/// Ontology variant: address each point by its equipment.
async fn ingest_ontology<F: IdentityFactory + 'static>(
    State(state): State<Arc<AppState<F>>>,
    Path(uri): Path<String>,
    body: Bytes,
) -> Response {
    if state.routed.is_none() {
        return (
            StatusCode::SERVICE_UNAVAILABLE,
            "ontology routing is not configured",
        )
            .into_response();
    }
    let outcome = tokio::task::spawn_blocking(move || match &state.routed {
        Some(routed) => ingest_routed(
            &routed.resolver,
            routed.identity.as_ref(),
            &state.config,
            &state.stats,
            &uri,
            &body,
        ),
        None => Ok(IngestReport::default()),
    })
    .await;
    respond(outcome)
}

/// Health check handler.
async fn health_handler() -> impl IntoResponse {
    (StatusCode::OK, "OK")
}

/// Metrics handler - returns Prometheus text format.
async fn metrics_handler() -> impl IntoResponse {
    (
        StatusCode::OK,
        [("Content-Type", "text/plain; charset=utf-8")],
        encode_metrics(),
    )
}

/// Status information response.
#[derive(Serialize)]
struct StatusResponse {
    version: String,
    uptime_secs: u64,
    mode: &'static str,
    store_state: String,
    identities: Vec<String>,
}

/// Status handler - returns JSON status information.
async fn status_handler<F: IdentityFactory + 'static>(
    State(state): State<Arc<AppState<F>>>,
) -> Response {
    let store = Arc::clone(&state.store);
    let store_state = tokio::task::spawn_blocking(move || store.state())
        .await
        .map_err(|e| e.to_string())
        .and_then(|s| s.map_err(|e| e.to_string()))
        .map(|s| s.to_string())
        .unwrap_or_else(|e| format!("unavailable: {}", e));

    Json(StatusResponse {
        version: smap_relay::VERSION.to_string(),
        uptime_secs: state.started.elapsed().as_secs(),
        mode: state.mode.as_str(),
        store_state,
        identities: state.store.identity_keys(),
    })
    .into_response()
}

/// Admin handler - one reload phase per call.
async fn reload_handler<F: IdentityFactory + 'static>(
    State(state): State<Arc<AppState<F>>>,
) -> Response {
    let store = Arc::clone(&state.store);
    match tokio::task::spawn_blocking(move || reload_step(&store)).await {
        Ok(Ok(reached)) => Json(serde_json::json!({ "state": reached.to_string() })).into_response(),
        Ok(Err(err)) => (StatusCode::CONFLICT, err.to_string()).into_response(),
        Err(err) => (StatusCode::INTERNAL_SERVER_ERROR, err.to_string()).into_response(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::{to_bytes, Body};
    use axum::http::Request;
    use serde_json::Value;
    use smap_relay::{IdentityError, MemoryOntology, MemoryTransport, VerifyingKey};
    use tempfile::TempDir;
    use tower::ServiceExt;

    /// Tag 0x01 credentials use their payload as the key
    struct TestFactory;

    impl IdentityFactory for TestFactory {
        type Identity = MemoryTransport;

        fn verifying_key(&self, type_tag: u8, payload: &[u8]) -> Result<VerifyingKey, IdentityError> {
            match type_tag {
                0x01 => Ok(VerifyingKey::new(payload.to_vec())),
                other => Err(IdentityError::UnsupportedType(other)),
            }
        }

        fn create(
            &self,
            type_tag: u8,
            payload: &[u8],
        ) -> Result<(MemoryTransport, VerifyingKey), IdentityError> {
            Ok((MemoryTransport::new(), self.verifying_key(type_tag, payload)?))
        }
    }

    const BODY: &str = r#"{
        "/": {"Metadata": {"Site": "Soda"}},
        "/temp": {"uuid": "u-temp", "Readings": [[1500000000, 21.5], [1500000060, 21.7]]}
    }"#;

    fn state(mode: Mode, routed: Option<Routed<MemoryTransport>>) -> (TempDir, Arc<AppState<TestFactory>>) {
        let dir = TempDir::new().unwrap();
        let store = CredentialStore::open(dir.path().join("relay.db"), TestFactory).unwrap();
        let state = AppState {
            mode,
            store: Arc::new(store),
            routed,
            config: RelayConfig::default(),
            stats: Arc::new(IngestStats::new()),
            started: Instant::now(),
        };
        (dir, Arc::new(state))
    }

    async fn send(app: &Router, method: &str, uri: &str, body: &str) -> (StatusCode, String) {
        let response = app
            .clone()
            .oneshot(
                Request::builder()
                    .method(method)
                    .uri(uri)
                    .body(Body::from(body.to_string()))
                    .unwrap(),
            )
            .await
            .unwrap();
        let status = response.status();
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        (status, String::from_utf8(bytes.to_vec()).unwrap())
    }

    #[tokio::test]
    async fn test_unknown_identity_is_rejected() {
        let (_dir, state) = state(Mode::Identity, None);
        let app = router(state);
        let (status, body) = send(&app, "POST", "/add/AQID/uri/ns/smap", BODY).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body, "No client found for vk AQID");
    }

    #[tokio::test]
    async fn test_register_reload_then_ingest() {
        let (_dir, state) = state(Mode::Identity, None);
        let vk = state.store.register(&[0x01, 1, 2, 3]).unwrap();
        assert_eq!(vk, "AQID");
        let app = router(Arc::clone(&state));

        let (status, body) = send(&app, "POST", "/admin/reload", "").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(serde_json::from_str::<Value>(&body).unwrap()["state"], "closed");
        let (_, body) = send(&app, "POST", "/admin/reload", "").await;
        assert_eq!(serde_json::from_str::<Value>(&body).unwrap()["state"], "open");

        let (status, _) = send(&app, "POST", "/add/AQID/uri/ns/smap", BODY).await;
        assert_eq!(status, StatusCode::OK);

        let identity = state.store.identity("AQID").unwrap();
        let published = identity.published();
        assert_eq!(published.len(), 2);
        assert_eq!(published[0].address, "ns/smap/temp");
        assert_eq!(identity.metadata()[0].key, "Site");
    }

    #[tokio::test]
    async fn test_bad_body_returns_error_text() {
        let (_dir, state) = state(Mode::Identity, None);
        state.store.register(&[0x01, 1, 2, 3]).unwrap();
        state.store.signal().unwrap();
        state.store.signal().unwrap();
        let app = router(state);

        let (status, body) = send(
            &app,
            "POST",
            "/add/AQID/uri/ns",
            r#"{"/a": {"uuid": "u", "Readings": [["soon", 1]]}}"#,
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert!(body.starts_with("Invalid timestamp in /a"));
    }

    #[tokio::test]
    async fn test_ontology_route() {
        let ontology: Arc<dyn Ontology> = Arc::new(
            MemoryOntology::new()
                .subclass("VAV_With_Reheat", "VAV")
                .point("u-temp", "ZNT_1", "Sensor", "VAV_1", "VAV_With_Reheat"),
        );
        let identity = Arc::new(MemoryTransport::new());
        let routed = Routed {
            resolver: ClassResolver::new(ontology),
            identity: Arc::clone(&identity),
        };
        let (_dir, state) = state(Mode::Ontology, Some(routed));
        let app = router(state);

        let (status, _) = send(&app, "POST", "/add/bldg", BODY).await;
        assert_eq!(status, StatusCode::OK);
        let published = identity.published();
        assert_eq!(published.len(), 2);
        assert_eq!(published[0].address, "bldg/s.bms/VAV_1/i.VAV/signal/info");
    }

    #[tokio::test]
    async fn test_ingest_during_reload_uses_previous_cache() {
        let (_dir, state) = state(Mode::Identity, None);
        state.store.register(&[0x01, 1, 2, 3]).unwrap();
        state.store.signal().unwrap();
        state.store.signal().unwrap();
        let app = router(Arc::clone(&state));

        let (_, body) = send(&app, "POST", "/admin/reload", "").await;
        assert_eq!(serde_json::from_str::<Value>(&body).unwrap()["state"], "closed");

        let (status, _) = send(&app, "POST", "/add/AQID/uri/ns", BODY).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(state.store.identity("AQID").unwrap().published().len(), 2);

        let (_, body) = send(&app, "GET", "/status", "").await;
        let status: Value = serde_json::from_str(&body).unwrap();
        assert_eq!(status["store_state"], "closed");
        assert_eq!(status["identities"], serde_json::json!(["AQID"]));
    }

    #[tokio::test]
    async fn test_health_status_and_metrics() {
        let (_dir, state) = state(Mode::Identity, None);
        let app = router(state);

        let (status, body) = send(&app, "GET", "/health", "").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body, "OK");

        let (_, body) = send(&app, "GET", "/status", "").await;
        let status: Value = serde_json::from_str(&body).unwrap();
        assert_eq!(status["mode"], "identity");
        assert_eq!(status["store_state"], "open");
        assert_eq!(status["identities"], serde_json::json!([]));

        send(&app, "POST", "/add/nobody/uri/x", BODY).await;
        let (_, body) = send(&app, "GET", "/metrics", "").await;
        assert!(body.contains("smap_relay_requests_total"));
    }
}
