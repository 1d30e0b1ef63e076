//! HTTP client tests against an in-process API server.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use axum::extract::{Path, Query, State};
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::{Json, Router};
use futures_util::StreamExt;
use kubemeta_client::{HttpClientFactory, HttpKubeClient};
use kubemeta_core::{
    ApiClientFactory, ApiError, KubeApi, ListParams, ObjectList, WatchEvent, WatchParams,
};
use kubemeta_test_utils::fixtures;
use serde_json::json;

const TOKEN: &str = "good-token";

#[derive(Clone, Default)]
struct ServerState {
    queries: Arc<Mutex<Vec<HashMap<String, String>>>>,
}

impl ServerState {
    fn record(&self, query: HashMap<String, String>) {
        self.queries.lock().unwrap().push(query);
    }

    fn queries(&self) -> Vec<HashMap<String, String>> {
        self.queries.lock().unwrap().clone()
    }
}

fn status(code: StatusCode, message: &str) -> Response {
    (
        code,
        Json(json!({"kind": "Status", "code": code.as_u16(), "message": message})),
    )
        .into_response()
}

fn authorized(headers: &HeaderMap) -> bool {
    headers
        .get("authorization")
        .and_then(|v| v.to_str().ok())
        .map(|v| v == format!("Bearer {}", TOKEN))
        .unwrap_or(false)
}

async fn get_pod(headers: HeaderMap, Path((ns, name)): Path<(String, String)>) -> Response {
    if !authorized(&headers) {
        return status(StatusCode::UNAUTHORIZED, "Unauthorized");
    }
    if name != "web" {
        return status(StatusCode::NOT_FOUND, &format!("pods \"{}\" not found", name));
    }
    Json(fixtures::pod_object(&ns, &name, "P1", "node-1")).into_response()
}

async fn get_namespace(headers: HeaderMap, Path(name): Path<String>) -> Response {
    if !authorized(&headers) {
        return status(StatusCode::UNAUTHORIZED, "Unauthorized");
    }
    if name == "broken" {
        return status(StatusCode::INTERNAL_SERVER_ERROR, "etcd unavailable");
    }
    Json(fixtures::namespace_object(&name, "N1", None)).into_response()
}

async fn pods(
    State(state): State<ServerState>,
    headers: HeaderMap,
    Query(query): Query<HashMap<String, String>>,
) -> Response {
    if !authorized(&headers) {
        return status(StatusCode::UNAUTHORIZED, "Unauthorized");
    }
    let watching = query.get("watch").map(String::as_str) == Some("true");
    state.record(query);

    if watching {
        let mut pod = fixtures::pod_object("default", "web", "P1", "node-1");
        pod.metadata.resource_version = Some("43".to_string());
        let body = format!(
            "{}\n{}\n",
            json!({"type": "MODIFIED", "object": pod}),
            json!({"type": "ERROR", "object": {"kind": "Status", "code": 410, "message": "too old resource version"}}),
        );
        return (StatusCode::OK, body).into_response();
    }

    let list = ObjectList::new(
        vec![
            fixtures::pod_object("default", "web", "P1", "node-1"),
            fixtures::pod_object("default", "db", "P2", "node-1"),
        ],
        "42",
    );
    Json(list).into_response()
}

async fn namespaces(headers: HeaderMap) -> Response {
    if !authorized(&headers) {
        return status(StatusCode::UNAUTHORIZED, "Unauthorized");
    }
    let list = ObjectList::new(vec![fixtures::namespace_object("default", "N1", None)], "7");
    Json(list).into_response()
}

async fn start_server(state: ServerState) -> String {
    let app = Router::new()
        .route("/api/v1/pods", get(pods))
        .route("/api/v1/namespaces", get(namespaces))
        .route("/api/v1/namespaces/:name", get(get_namespace))
        .route("/api/v1/namespaces/:ns/pods/:name", get(get_pod))
        .with_state(state);

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    format!("http://{}", addr)
}

fn client(base_url: &str, token: &str) -> HttpKubeClient {
    HttpKubeClient::new(
        base_url,
        Some(token.to_string()),
        Duration::from_secs(2),
        Duration::from_secs(5),
    )
    .unwrap()
}

// ============================================================================
// GET
// ============================================================================

#[tokio::test]
async fn test_get_pod() {
    let base = start_server(ServerState::default()).await;
    let pod = client(&base, TOKEN).get_pod("web", "default").await.unwrap();

    assert_eq!(pod.metadata.name.as_deref(), Some("web"));
    assert_eq!(pod.metadata.uid.as_deref(), Some("P1"));
    assert_eq!(pod.node_name(), Some("node-1"));
}

#[tokio::test]
async fn test_missing_pod_is_not_found() {
    let base = start_server(ServerState::default()).await;
    let err = client(&base, TOKEN)
        .get_pod("missing", "default")
        .await
        .unwrap_err();

    assert_eq!(
        err,
        ApiError::NotFound {
            kind: "pod".to_string(),
            name: "default/missing".to_string(),
        }
    );
}

#[tokio::test]
async fn test_wrong_token_is_unauthorized() {
    let base = start_server(ServerState::default()).await;
    let err = client(&base, "stale-token")
        .get_namespace("default")
        .await
        .unwrap_err();

    assert!(err.is_unauthorized());
}

#[tokio::test]
async fn test_server_error_is_transient() {
    let base = start_server(ServerState::default()).await;
    let err = client(&base, TOKEN)
        .get_namespace("broken")
        .await
        .unwrap_err();

    assert_eq!(err, ApiError::transient("etcd unavailable"));
}

#[tokio::test]
async fn test_connection_refused_is_transient() {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    drop(listener);

    let err = client(&format!("http://{}", addr), TOKEN)
        .get_namespace("default")
        .await
        .unwrap_err();
    assert!(matches!(err, ApiError::Transient { .. }));
}

// ============================================================================
// LIST / WATCH
// ============================================================================

#[tokio::test]
async fn test_list_pods_sends_field_selector() {
    let state = ServerState::default();
    let base = start_server(state.clone()).await;

    let list = client(&base, TOKEN)
        .list_pods(&ListParams {
            field_selector: Some("spec.nodeName=node-1".to_string()),
            resource_version: None,
        })
        .await
        .unwrap();

    assert_eq!(list.items.len(), 2);
    assert_eq!(list.resource_version(), Some("42"));

    let queries = state.queries();
    assert_eq!(queries.len(), 1);
    assert_eq!(
        queries[0].get("fieldSelector").map(String::as_str),
        Some("spec.nodeName=node-1")
    );
    assert!(!queries[0].contains_key("resourceVersion"));
}

#[tokio::test]
async fn test_list_namespaces() {
    let base = start_server(ServerState::default()).await;
    let list = client(&base, TOKEN)
        .list_namespaces(&ListParams::default())
        .await
        .unwrap();

    assert_eq!(list.items.len(), 1);
    assert_eq!(list.resource_version(), Some("7"));
}

#[tokio::test]
async fn test_watch_pods_streams_events() {
    let state = ServerState::default();
    let base = start_server(state.clone()).await;

    let stream = client(&base, TOKEN)
        .watch_pods(&WatchParams {
            field_selector: Some("spec.nodeName=node-1".to_string()),
            resource_version: Some("42".to_string()),
        })
        .await
        .unwrap();
    let events: Vec<_> = stream.collect().await;

    assert_eq!(events.len(), 2);
    match &events[0] {
        Ok(WatchEvent::Modified(pod)) => {
            assert_eq!(pod.metadata.resource_version.as_deref(), Some("43"))
        }
        other => panic!("unexpected event: {:?}", other),
    }
    match &events[1] {
        Ok(WatchEvent::Error(payload)) => assert!(payload.clone().into_api_error().is_gone()),
        other => panic!("unexpected event: {:?}", other),
    }

    let queries = state.queries();
    assert_eq!(queries[0].get("watch").map(String::as_str), Some("true"));
    assert_eq!(
        queries[0].get("resourceVersion").map(String::as_str),
        Some("42")
    );
}

#[tokio::test]
async fn test_watch_rejected_before_streaming() {
    let base = start_server(ServerState::default()).await;
    let err = client(&base, "stale-token")
        .watch_pods(&WatchParams::default())
        .await
        .err()
        .unwrap();
    assert!(err.is_unauthorized());
}

// ============================================================================
// FACTORY
// ============================================================================

#[tokio::test]
async fn test_factory_rereads_rotated_token() {
    let base = start_server(ServerState::default()).await;
    let dir = tempfile::tempdir().unwrap();
    let token_path = dir.path().join("token");
    std::fs::write(&token_path, "stale-token\n").unwrap();

    let factory = HttpClientFactory::new(
        base,
        Some(token_path.clone()),
        Duration::from_secs(2),
        Duration::from_secs(5),
    );

    let stale = factory.create().await.unwrap();
    assert!(stale.get_namespace("default").await.unwrap_err().is_unauthorized());

    std::fs::write(&token_path, format!("{}\n", TOKEN)).unwrap();
    let fresh = factory.create().await.unwrap();
    let ns = fresh.get_namespace("default").await.unwrap();
    assert_eq!(ns.metadata.uid.as_deref(), Some("N1"));
}
