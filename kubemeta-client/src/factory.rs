//! Client factory that re-reads the bearer token on every build.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use kubemeta_core::{ApiClientFactory, ApiError, KubeApi, MetadataConfig};

use crate::http::HttpKubeClient;

/// Builds [`HttpKubeClient`]s for the configured API server.
///
/// The token file is read on each `create`, so a client rebuilt after a 401
/// picks up rotated credentials.
#[derive(Debug, Clone)]
pub struct HttpClientFactory {
    base_url: String,
    token_file: Option<PathBuf>,
    open_timeout: Duration,
    read_timeout: Duration,
}

impl HttpClientFactory {
    pub fn new(
        base_url: impl Into<String>,
        token_file: Option<PathBuf>,
        open_timeout: Duration,
        read_timeout: Duration,
    ) -> Self {
        Self {
            base_url: base_url.into(),
            token_file,
            open_timeout,
            read_timeout,
        }
    }

    pub fn from_config(config: &MetadataConfig) -> Result<Self, ApiError> {
        let base_url = config.kubernetes_url.clone().ok_or_else(|| ApiError::Fatal {
            message: "kubernetes_url is not configured".to_string(),
        })?;
        Ok(Self::new(
            base_url,
            config.bearer_token_file.as_ref().map(PathBuf::from),
            config.open_timeout(),
            config.read_timeout(),
        ))
    }

    async fn read_token(&self) -> Result<Option<String>, ApiError> {
        let Some(path) = &self.token_file else {
            return Ok(None);
        };
        let raw = tokio::fs::read_to_string(path)
            .await
            .map_err(|e| ApiError::Fatal {
                message: format!("Failed to read token file {}: {}", path.display(), e),
            })?;
        let token = raw.trim();
        Ok((!token.is_empty()).then(|| token.to_string()))
    }
}

#[async_trait]
impl ApiClientFactory for HttpClientFactory {
    async fn create(&self) -> Result<Arc<dyn KubeApi>, ApiError> {
        let token = self.read_token().await?;
        tracing::debug!(
            base_url = %self.base_url,
            authenticated = token.is_some(),
            "Building API client"
        );
        let client = HttpKubeClient::new(&self.base_url, token, self.open_timeout, self.read_timeout)?;
        Ok(Arc::new(client))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_from_config_requires_url() {
        let config = MetadataConfig::default();
        let err = HttpClientFactory::from_config(&config).unwrap_err();
        assert!(matches!(err, ApiError::Fatal { .. }));
    }

    #[tokio::test]
    async fn test_missing_token_file_is_fatal() {
        let factory = HttpClientFactory::new(
            "http://127.0.0.1:1",
            Some(PathBuf::from("/nonexistent/kubemeta/token")),
            Duration::from_secs(1),
            Duration::from_secs(1),
        );
        let err = factory.create().await.err().unwrap();
        assert!(matches!(err, ApiError::Fatal { .. }));
    }

    #[tokio::test]
    async fn test_blank_token_file_means_no_token() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("token");
        std::fs::write(&path, "  \n").unwrap();
        let factory = HttpClientFactory::new(
            "http://127.0.0.1:1",
            Some(path),
            Duration::from_secs(1),
            Duration::from_secs(1),
        );
        assert_eq!(factory.read_token().await.unwrap(), None);
    }
}
