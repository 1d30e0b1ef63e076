//! KubeMeta Client - HTTP access to the Kubernetes API
//!
//! Implements the `KubeApi` contract over REST gets, lists and chunked
//! watch bodies, plus a factory that re-reads credentials on rebuild.

pub mod factory;
pub mod http;
pub mod ndjson;

pub use factory::HttpClientFactory;
pub use http::HttpKubeClient;
pub use ndjson::{decode_frame, decode_watch_body};
