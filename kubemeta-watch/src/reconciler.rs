//! The list-then-watch state machine shared by both resource kinds.
//!
//! ```text
//! INITIAL_LIST -> WATCHING -> (clean close) WATCHING from last cursor
//!                          -> (empty close) short pause, then WATCHING
//!                          -> (410 Gone) INITIAL_LIST with empty cursor
//!                          -> (401) new client, INITIAL_LIST
//!                          -> (other) BACKOFF -> INITIAL_LIST | FATAL
//! ```
//!
//! Kind-specific behaviour lives behind [`ResourceReconciler`]; this module
//! owns retries, cursors and client lifetime.

use std::sync::Arc;

use async_trait::async_trait;
use futures_util::StreamExt;
use kubemeta_core::{
    ApiClientFactory, ApiError, Counter, HasObjectMeta, KubeApi, KubeMetaError, KubeMetaResult,
    ObjectList, Stats, WatchEvent, WatchStream,
};
use tokio::sync::watch;

use crate::state::{BackoffPolicy, ReconcilerState, RetryDecision};

/// Counters bumped by the generic loop for one kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LoopCounters {
    pub failures: Counter,
    pub gone: Counter,
    pub auth_refreshes: Counter,
    /// Frames that arrived but could not be decoded.
    pub ignored: Counter,
}

/// Kind-specific half of a reconciliation loop.
#[async_trait]
pub trait ResourceReconciler: Send + Sync + 'static {
    type Object: HasObjectMeta + Send + 'static;

    /// Short kind name for logs ("pods", "namespaces").
    fn kind(&self) -> &'static str;

    fn counters(&self) -> LoopCounters;

    /// Full list with no cursor filter.
    async fn list(&self, client: &dyn KubeApi) -> Result<ObjectList<Self::Object>, ApiError>;

    async fn watch(
        &self,
        client: &dyn KubeApi,
        resource_version: Option<String>,
    ) -> Result<WatchStream<Self::Object>, ApiError>;

    /// Store every listed object. Returns how many were stored.
    async fn apply_list(&self, items: Vec<Self::Object>) -> usize;

    async fn on_added(&self, object: Self::Object);

    async fn on_modified(&self, object: Self::Object);

    async fn on_deleted(&self, object: Self::Object);
}

/// Run one reconciliation loop until shutdown or an unrecoverable failure.
///
/// Returns `Ok(())` when `shutdown_rx` flips to `true` (or its sender is
/// dropped), and `KubeMetaError::Unrecoverable` once the retry budget is
/// exhausted.
pub async fn run_reconcile_loop<R: ResourceReconciler>(
    reconciler: Arc<R>,
    factory: Arc<dyn ApiClientFactory>,
    stats: Arc<Stats>,
    policy: BackoffPolicy,
    mut shutdown_rx: watch::Receiver<bool>,
) -> KubeMetaResult<()> {
    let kind = reconciler.kind();
    let counters = reconciler.counters();
    let mut state = ReconcilerState::new(policy);
    let mut client: Option<Arc<dyn KubeApi>> = None;

    tracing::info!(kind, "Reconciliation loop started");

    loop {
        let outcome = tokio::select! {
            _ = shutdown_signalled(&mut shutdown_rx) => break,
            outcome = run_cycle(
                reconciler.as_ref(),
                factory.as_ref(),
                &stats,
                &mut client,
                &mut state,
            ) => outcome,
        };

        match outcome {
            Ok(0) => {
                let pause = state.policy().initial_interval;
                tracing::debug!(
                    kind,
                    pause_ms = pause.as_millis() as u64,
                    "watch closed without events, pausing before reopening"
                );
                tokio::select! {
                    _ = shutdown_signalled(&mut shutdown_rx) => break,
                    _ = tokio::time::sleep(pause) => {}
                }
            }
            Ok(_) => {
                tracing::debug!(
                    kind,
                    resource_version = ?state.resource_version(),
                    "watch closed, resuming from last cursor"
                );
            }
            Err(ApiError::Gone { message }) => {
                stats.bump(counters.gone);
                state.clear_resource_version();
                tracing::info!(kind, %message, "watch cursor expired, relisting");
            }
            Err(ApiError::Unauthorized { message }) if state.record_auth_refresh() => {
                stats.bump(counters.auth_refreshes);
                client = None;
                state.clear_resource_version();
                tracing::info!(kind, %message, "authorization rejected, rebuilding client");
            }
            Err(e) => {
                stats.bump(counters.failures);
                state.clear_resource_version();
                match state.record_failure() {
                    RetryDecision::Retry(wait) => {
                        tracing::warn!(
                            kind,
                            error = %e,
                            retry = state.retry_count(),
                            backoff_ms = wait.as_millis() as u64,
                            "watch failed, retrying"
                        );
                        tokio::select! {
                            _ = shutdown_signalled(&mut shutdown_rx) => break,
                            _ = tokio::time::sleep(wait) => {}
                        }
                    }
                    RetryDecision::GiveUp => {
                        tracing::error!(
                            kind,
                            error = %e,
                            retries = state.retry_count(),
                            "watch retries exhausted"
                        );
                        return Err(KubeMetaError::Unrecoverable {
                            kind: kind.to_string(),
                            retries: state.retry_count(),
                            last_error: e.to_string(),
                        });
                    }
                }
            }
        }
    }

    tracing::info!(kind, "Reconciliation loop stopped");
    Ok(())
}

/// One pass: (re)create the client if needed, list when there is no cursor,
/// then consume a watch stream until it closes or fails.
///
/// Returns how many frames the watch delivered before closing cleanly.
async fn run_cycle<R: ResourceReconciler>(
    reconciler: &R,
    factory: &dyn ApiClientFactory,
    stats: &Stats,
    client: &mut Option<Arc<dyn KubeApi>>,
    state: &mut ReconcilerState,
) -> Result<usize, ApiError> {
    let api = match client.clone() {
        Some(api) => api,
        None => {
            let api = factory.create().await?;
            *client = Some(Arc::clone(&api));
            api
        }
    };

    if state.resource_version().is_none() {
        let list = reconciler.list(api.as_ref()).await?;
        let cursor = list.resource_version().map(str::to_string);
        let stored = reconciler.apply_list(list.items).await;
        state.set_resource_version(cursor.as_deref());
        state.reset();
        tracing::debug!(kind = reconciler.kind(), stored, cursor = ?cursor, "initial list applied");
    }

    let cursor = state.resource_version().map(str::to_string);
    let mut stream = reconciler.watch(api.as_ref(), cursor).await?;

    let mut received = 0;
    while let Some(item) = stream.next().await {
        received += 1;
        let event = match item {
            Ok(event) => event,
            Err(ApiError::InvalidPayload { reason }) => {
                stats.bump(reconciler.counters().ignored);
                tracing::debug!(kind = reconciler.kind(), %reason, "skipping undecodable watch frame");
                continue;
            }
            Err(e) => return Err(e),
        };
        match event {
            WatchEvent::Error(payload) => return Err(payload.into_api_error()),
            WatchEvent::Added(object) => {
                state.set_resource_version(object.resource_version());
                reconciler.on_added(object).await;
            }
            WatchEvent::Modified(object) => {
                state.set_resource_version(object.resource_version());
                reconciler.on_modified(object).await;
            }
            WatchEvent::Deleted(object) => {
                state.set_resource_version(object.resource_version());
                reconciler.on_deleted(object).await;
            }
        }
        state.reset();
    }

    Ok(received)
}

/// Resolves once shutdown is requested or the sender goes away.
async fn shutdown_signalled(shutdown_rx: &mut watch::Receiver<bool>) {
    loop {
        if *shutdown_rx.borrow_and_update() {
            return;
        }
        if shutdown_rx.changed().await.is_err() {
            return;
        }
    }
}
