//! `KubeApi` over the Kubernetes REST endpoints.

use std::time::Duration;

use async_trait::async_trait;
use kubemeta_core::{
    ApiError, ErrorPayload, KubeApi, ListParams, NamespaceObject, ObjectList, PodObject,
    WatchParams, WatchStream,
};
use serde::de::DeserializeOwned;

use crate::ndjson::decode_watch_body;

/// Plain HTTP client for pods and namespaces.
///
/// Gets and lists run under the read timeout. Watches only bound the
/// connect phase, since a healthy watch stays open indefinitely.
#[derive(Clone)]
pub struct HttpKubeClient {
    client: reqwest::Client,
    watch_client: reqwest::Client,
    base_url: String,
    token: Option<String>,
}

impl std::fmt::Debug for HttpKubeClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HttpKubeClient")
            .field("base_url", &self.base_url)
            .field("token", &self.token.as_ref().map(|_| "<redacted>"))
            .finish()
    }
}

impl HttpKubeClient {
    pub fn new(
        base_url: &str,
        token: Option<String>,
        open_timeout: Duration,
        read_timeout: Duration,
    ) -> Result<Self, ApiError> {
        let client = reqwest::Client::builder()
            .connect_timeout(open_timeout)
            .timeout(read_timeout)
            .build()
            .map_err(|e| ApiError::Fatal {
                message: format!("Failed to build HTTP client: {}", e),
            })?;
        let watch_client = reqwest::Client::builder()
            .connect_timeout(open_timeout)
            .build()
            .map_err(|e| ApiError::Fatal {
                message: format!("Failed to build HTTP client: {}", e),
            })?;

        Ok(Self {
            client,
            watch_client,
            base_url: base_url.trim_end_matches('/').to_string(),
            token,
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn request(
        &self,
        client: &reqwest::Client,
        path: &str,
        query: &[(&str, String)],
    ) -> reqwest::RequestBuilder {
        let url = format!("{}{}", self.base_url, path);
        let mut request = client.get(url);
        if !query.is_empty() {
            request = request.query(query);
        }
        if let Some(token) = &self.token {
            request = request.bearer_auth(token);
        }
        request
    }

    async fn get_json<T: DeserializeOwned>(
        &self,
        operation: &str,
        path: &str,
        query: &[(&str, String)],
    ) -> Result<T, ApiError> {
        let response = self
            .request(&self.client, path, query)
            .send()
            .await
            .map_err(|e| transport_error(operation, e))?;
        let response = check_status(response).await?;
        let body = response
            .bytes()
            .await
            .map_err(|e| transport_error(operation, e))?;
        serde_json::from_slice(&body).map_err(|e| {
            ApiError::invalid_payload(format!("{} returned undecodable body: {}", operation, e))
        })
    }

    async fn watch<T>(&self, path: &str, params: &WatchParams) -> Result<WatchStream<T>, ApiError>
    where
        T: DeserializeOwned + Send + 'static,
    {
        let mut query = vec![("watch", "true".to_string())];
        if let Some(rv) = &params.resource_version {
            query.push(("resourceVersion", rv.clone()));
        }
        if let Some(selector) = &params.field_selector {
            query.push(("fieldSelector", selector.clone()));
        }

        let response = self
            .request(&self.watch_client, path, &query)
            .send()
            .await
            .map_err(|e| transport_error("watch", e))?;
        let response = check_status(response).await?;
        tracing::debug!(
            path,
            resource_version = ?params.resource_version,
            "Watch established"
        );
        Ok(decode_watch_body(response.bytes_stream()))
    }
}

fn list_query(params: &ListParams) -> Vec<(&'static str, String)> {
    let mut query = Vec::new();
    if let Some(selector) = &params.field_selector {
        query.push(("fieldSelector", selector.clone()));
    }
    if let Some(rv) = &params.resource_version {
        query.push(("resourceVersion", rv.clone()));
    }
    query
}

fn transport_error(operation: &str, err: reqwest::Error) -> ApiError {
    if err.is_timeout() {
        ApiError::Timeout {
            operation: operation.to_string(),
        }
    } else {
        ApiError::transient(format!("{} failed: {}", operation, err))
    }
}

/// Pass successful responses through; map everything else onto `ApiError`.
async fn check_status(response: reqwest::Response) -> Result<reqwest::Response, ApiError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }

    let body = response.text().await.unwrap_or_default();
    let message = serde_json::from_str::<ErrorPayload>(&body)
        .ok()
        .and_then(|payload| payload.message)
        .unwrap_or_else(|| {
            if body.is_empty() {
                status.to_string()
            } else {
                body
            }
        });
    Err(ApiError::from_status(status.as_u16(), message))
}

fn not_found_as(kind: &str, name: &str, err: ApiError) -> ApiError {
    match err {
        ApiError::NotFound { .. } => ApiError::NotFound {
            kind: kind.to_string(),
            name: name.to_string(),
        },
        other => other,
    }
}

#[async_trait]
impl KubeApi for HttpKubeClient {
    async fn get_pod(&self, name: &str, namespace: &str) -> Result<PodObject, ApiError> {
        let path = format!("/api/v1/namespaces/{}/pods/{}", namespace, name);
        self.get_json("get pod", &path, &[])
            .await
            .map_err(|e| not_found_as("pod", &format!("{}/{}", namespace, name), e))
    }

    async fn get_namespace(&self, name: &str) -> Result<NamespaceObject, ApiError> {
        let path = format!("/api/v1/namespaces/{}", name);
        self.get_json("get namespace", &path, &[])
            .await
            .map_err(|e| not_found_as("namespace", name, e))
    }

    async fn list_pods(&self, params: &ListParams) -> Result<ObjectList<PodObject>, ApiError> {
        self.get_json("list pods", "/api/v1/pods", &list_query(params))
            .await
    }

    async fn list_namespaces(
        &self,
        params: &ListParams,
    ) -> Result<ObjectList<NamespaceObject>, ApiError> {
        self.get_json("list namespaces", "/api/v1/namespaces", &list_query(params))
            .await
    }

    async fn watch_pods(&self, params: &WatchParams) -> Result<WatchStream<PodObject>, ApiError> {
        self.watch("/api/v1/pods", params).await
    }

    async fn watch_namespaces(
        &self,
        params: &WatchParams,
    ) -> Result<WatchStream<NamespaceObject>, ApiError> {
        self.watch("/api/v1/namespaces", params).await
    }
}
