//! Configuration types

use std::time::Duration;

use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::error::{ConfigError, KubeMetaError, KubeMetaResult};
use crate::metadata::PodMetadata;
use crate::parse::simple_pod_key;

/// Default capacity of each cache.
pub const DEFAULT_CACHE_SIZE: usize = 1000;
/// Default cache TTL in seconds.
pub const DEFAULT_CACHE_TTL_SECS: i64 = 3600;
pub const DEFAULT_ORPHANED_NAMESPACE_NAME: &str = ".orphaned";
pub const DEFAULT_ORPHANED_NAMESPACE_ID: &str = "orphaned";

/// How log identities map onto cache keys.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ResolverStrategy {
    /// Container identity -> pod uid -> namespace uid, three caches.
    #[default]
    Identity,
    /// Pods keyed by `namespace_pod`, namespaces by name.
    Simple,
}

impl ResolverStrategy {
    /// Pod cache key under this strategy.
    pub fn pod_key(&self, pod: &PodMetadata) -> String {
        match self {
            Self::Identity => pod.pod_id.clone(),
            Self::Simple => simple_pod_key(
                pod.namespace_name.as_deref().unwrap_or_default(),
                pod.pod_name.as_deref().unwrap_or_default(),
            ),
        }
    }

    /// Namespace cache key under this strategy.
    pub fn namespace_key(&self, namespace_id: &str, namespace_name: &str) -> String {
        match self {
            Self::Identity => namespace_id.to_string(),
            Self::Simple => namespace_name.to_string(),
        }
    }
}

impl std::str::FromStr for ResolverStrategy {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "identity" => Ok(Self::Identity),
            "simple" => Ok(Self::Simple),
            other => Err(ConfigError::InvalidValue {
                field: "strategy".to_string(),
                value: other.to_string(),
                reason: "expected 'identity' or 'simple'".to_string(),
            }),
        }
    }
}

/// Tracing subscriber settings for embedding binaries.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// `EnvFilter` directive, overridden by `RUST_LOG` when set.
    pub filter: String,
    pub json: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            filter: "info".to_string(),
            json: false,
        }
    }
}

/// Periodic LMDB persistence of the caches.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CheckpointConfig {
    pub path: String,
    #[serde(default = "default_checkpoint_interval")]
    pub interval_secs: u64,
    #[serde(default = "default_checkpoint_size")]
    pub max_size_mb: usize,
}

fn default_checkpoint_interval() -> u64 {
    60
}

fn default_checkpoint_size() -> usize {
    64
}

/// Flags consumed by the parse helpers.
#[derive(Debug, Clone, Default)]
pub struct ParseOptions {
    pub skip_labels: bool,
    pub skip_container_metadata: bool,
    /// `None` when `skip_master_url` is set or no URL is configured.
    pub master_url: Option<String>,
    pub annotation_match: Vec<Regex>,
}

impl ParseOptions {
    pub fn annotation_matches(&self, key: &str) -> bool {
        self.annotation_match.iter().any(|re| re.is_match(key))
    }
}

/// Master configuration for the metadata subsystem.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MetadataConfig {
    pub kubernetes_url: Option<String>,
    /// File holding the bearer token, re-read whenever a client is rebuilt.
    pub bearer_token_file: Option<String>,
    pub cache_size: usize,
    /// `<= 0` disables expiry.
    pub cache_ttl_secs: i64,
    pub strategy: ResolverStrategy,
    pub watch: bool,
    pub allow_orphans: bool,
    pub orphaned_namespace_name: String,
    pub orphaned_namespace_id: String,
    pub skip_labels: bool,
    pub skip_container_metadata: bool,
    pub skip_master_url: bool,
    pub skip_namespace_metadata: bool,
    pub annotation_match: Vec<String>,
    pub watch_retry_interval_ms: u64,
    pub watch_retry_exponential_backoff_base: f64,
    pub watch_retry_max_times: u32,
    pub node_name: Option<String>,
    pub stats_interval_secs: u64,
    pub open_timeout_ms: u64,
    pub read_timeout_ms: u64,
    pub checkpoint: Option<CheckpointConfig>,
    pub logging: LoggingConfig,
}

impl Default for MetadataConfig {
    fn default() -> Self {
        Self {
            kubernetes_url: None,
            bearer_token_file: None,
            cache_size: DEFAULT_CACHE_SIZE,
            cache_ttl_secs: DEFAULT_CACHE_TTL_SECS,
            strategy: ResolverStrategy::Identity,
            watch: true,
            allow_orphans: true,
            orphaned_namespace_name: DEFAULT_ORPHANED_NAMESPACE_NAME.to_string(),
            orphaned_namespace_id: DEFAULT_ORPHANED_NAMESPACE_ID.to_string(),
            skip_labels: false,
            skip_container_metadata: false,
            skip_master_url: false,
            skip_namespace_metadata: false,
            annotation_match: Vec::new(),
            watch_retry_interval_ms: 1000,
            watch_retry_exponential_backoff_base: 2.0,
            watch_retry_max_times: 10,
            node_name: None,
            stats_interval_secs: 30,
            open_timeout_ms: 3000,
            read_timeout_ms: 10_000,
            checkpoint: None,
            logging: LoggingConfig::default(),
        }
    }
}

impl MetadataConfig {
    /// Create MetadataConfig from environment variables.
    ///
    /// Environment variables:
    /// - `KUBEMETA_KUBERNETES_URL`: API server base URL
    /// - `KUBEMETA_BEARER_TOKEN_FILE`: token file path
    /// - `KUBEMETA_CACHE_SIZE`: per-cache capacity (default: 1000)
    /// - `KUBEMETA_CACHE_TTL_SECS`: TTL, `<= 0` disables expiry (default: 3600)
    /// - `KUBEMETA_STRATEGY`: "identity" or "simple" (default: identity)
    /// - `KUBEMETA_WATCH`: "true" or "false" (default: true)
    /// - `KUBEMETA_ALLOW_ORPHANS`: "true" or "false" (default: true)
    /// - `KUBEMETA_ANNOTATION_MATCH`: comma-separated regexes
    /// - `KUBEMETA_WATCH_RETRY_INTERVAL_MS` (default: 1000)
    /// - `KUBEMETA_WATCH_RETRY_BACKOFF_BASE` (default: 2.0)
    /// - `KUBEMETA_WATCH_RETRY_MAX_TIMES` (default: 10)
    /// - `KUBEMETA_STATS_INTERVAL_SECS` (default: 30)
    /// - `KUBEMETA_CHECKPOINT_PATH`: enables checkpointing when set
    /// - `KUBEMETA_LOG`: tracing filter (default: info)
    /// - `K8S_NODE_NAME`: scopes pod list/watch to the local node
    pub fn from_env() -> Self {
        let defaults = Self::default();

        let bool_var = |name: &str, default: bool| {
            std::env::var(name)
                .ok()
                .map(|s| s.to_lowercase() == "true")
                .unwrap_or(default)
        };

        let annotation_match = std::env::var("KUBEMETA_ANNOTATION_MATCH")
            .ok()
            .map(|s| {
                s.split(',')
                    .map(|p| p.trim().to_string())
                    .filter(|p| !p.is_empty())
                    .collect()
            })
            .unwrap_or_default();

        let checkpoint = std::env::var("KUBEMETA_CHECKPOINT_PATH")
            .ok()
            .filter(|p| !p.is_empty())
            .map(|path| CheckpointConfig {
                path,
                interval_secs: std::env::var("KUBEMETA_CHECKPOINT_INTERVAL_SECS")
                    .ok()
                    .and_then(|s| s.parse().ok())
                    .unwrap_or_else(default_checkpoint_interval),
                max_size_mb: default_checkpoint_size(),
            });

        Self {
            kubernetes_url: std::env::var("KUBEMETA_KUBERNETES_URL").ok(),
            bearer_token_file: std::env::var("KUBEMETA_BEARER_TOKEN_FILE").ok(),
            cache_size: std::env::var("KUBEMETA_CACHE_SIZE")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(defaults.cache_size),
            cache_ttl_secs: std::env::var("KUBEMETA_CACHE_TTL_SECS")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(defaults.cache_ttl_secs),
            strategy: std::env::var("KUBEMETA_STRATEGY")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or_default(),
            watch: bool_var("KUBEMETA_WATCH", defaults.watch),
            allow_orphans: bool_var("KUBEMETA_ALLOW_ORPHANS", defaults.allow_orphans),
            skip_labels: bool_var("KUBEMETA_SKIP_LABELS", false),
            skip_container_metadata: bool_var("KUBEMETA_SKIP_CONTAINER_METADATA", false),
            skip_master_url: bool_var("KUBEMETA_SKIP_MASTER_URL", false),
            skip_namespace_metadata: bool_var("KUBEMETA_SKIP_NAMESPACE_METADATA", false),
            annotation_match,
            watch_retry_interval_ms: std::env::var("KUBEMETA_WATCH_RETRY_INTERVAL_MS")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(defaults.watch_retry_interval_ms),
            watch_retry_exponential_backoff_base: std::env::var(
                "KUBEMETA_WATCH_RETRY_BACKOFF_BASE",
            )
            .ok()
            .and_then(|s| s.parse().ok())
            .unwrap_or(defaults.watch_retry_exponential_backoff_base),
            watch_retry_max_times: std::env::var("KUBEMETA_WATCH_RETRY_MAX_TIMES")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(defaults.watch_retry_max_times),
            node_name: std::env::var("K8S_NODE_NAME")
                .ok()
                .filter(|n| !n.is_empty()),
            stats_interval_secs: std::env::var("KUBEMETA_STATS_INTERVAL_SECS")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(defaults.stats_interval_secs),
            checkpoint,
            logging: LoggingConfig {
                filter: std::env::var("KUBEMETA_LOG")
                    .unwrap_or_else(|_| defaults.logging.filter.clone()),
                json: bool_var("KUBEMETA_LOG_JSON", false),
            },
            ..defaults
        }
    }

    /// Parse a TOML document. Missing keys take their defaults.
    pub fn from_toml_str(input: &str) -> KubeMetaResult<Self> {
        let config: Self = toml::from_str(input).map_err(|e| ConfigError::Parse {
            reason: e.to_string(),
        })?;
        config.validate()?;
        Ok(config)
    }

    /// Validate the configuration.
    ///
    /// Validates:
    /// - cache_size > 0
    /// - watch_retry_interval_ms > 0
    /// - watch_retry_exponential_backoff_base >= 1.0
    /// - annotation_match entries compile
    /// - checkpoint interval > 0
    pub fn validate(&self) -> KubeMetaResult<()> {
        if self.cache_size == 0 {
            return Err(ConfigError::InvalidValue {
                field: "cache_size".to_string(),
                value: self.cache_size.to_string(),
                reason: "cache_size must be greater than 0".to_string(),
            }
            .into());
        }

        if self.watch_retry_interval_ms == 0 {
            return Err(ConfigError::InvalidValue {
                field: "watch_retry_interval_ms".to_string(),
                value: self.watch_retry_interval_ms.to_string(),
                reason: "retry interval must be positive".to_string(),
            }
            .into());
        }

        let base = self.watch_retry_exponential_backoff_base;
        if base.is_nan() || base < 1.0 {
            return Err(ConfigError::InvalidValue {
                field: "watch_retry_exponential_backoff_base".to_string(),
                value: self.watch_retry_exponential_backoff_base.to_string(),
                reason: "backoff base must be at least 1.0".to_string(),
            }
            .into());
        }

        self.compile_annotation_match()?;

        if let Some(checkpoint) = &self.checkpoint {
            if checkpoint.interval_secs == 0 {
                return Err(ConfigError::InvalidValue {
                    field: "checkpoint.interval_secs".to_string(),
                    value: checkpoint.interval_secs.to_string(),
                    reason: "checkpoint interval must be positive".to_string(),
                }
                .into());
            }
        }

        Ok(())
    }

    /// Cache TTL, `None` meaning entries never expire.
    pub fn cache_ttl(&self) -> Option<Duration> {
        if self.cache_ttl_secs <= 0 {
            None
        } else {
            Some(Duration::from_secs(self.cache_ttl_secs as u64))
        }
    }

    pub fn watch_retry_interval(&self) -> Duration {
        Duration::from_millis(self.watch_retry_interval_ms)
    }

    pub fn stats_interval(&self) -> Duration {
        Duration::from_secs(self.stats_interval_secs.max(1))
    }

    pub fn open_timeout(&self) -> Duration {
        Duration::from_millis(self.open_timeout_ms)
    }

    pub fn read_timeout(&self) -> Duration {
        Duration::from_millis(self.read_timeout_ms)
    }

    pub fn parse_options(&self) -> KubeMetaResult<ParseOptions> {
        Ok(ParseOptions {
            skip_labels: self.skip_labels,
            skip_container_metadata: self.skip_container_metadata,
            master_url: if self.skip_master_url {
                None
            } else {
                self.kubernetes_url.clone()
            },
            annotation_match: self.compile_annotation_match()?,
        })
    }

    fn compile_annotation_match(&self) -> KubeMetaResult<Vec<Regex>> {
        self.annotation_match
            .iter()
            .map(|pattern| {
                Regex::new(pattern).map_err(|e| {
                    KubeMetaError::from(ConfigError::InvalidValue {
                        field: "annotation_match".to_string(),
                        value: pattern.clone(),
                        reason: e.to_string(),
                    })
                })
            })
            .collect()
    }
}
