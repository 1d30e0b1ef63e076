//! Spawning the background tasks around a shared `MetadataStore`.
//!
//! Both reconciliation loops, the stats reporter and (when configured) the
//! checkpoint task all observe the same shutdown channel.

use std::sync::Arc;
use std::time::Duration;

use kubemeta_cache::{checkpoint_task, stats_report_task, CheckpointStore, MetadataStore};
use kubemeta_core::{ApiClientFactory, KubeMetaResult, MetadataConfig, Stats};
use tokio::sync::watch;
use tokio::task::JoinHandle;

use crate::namespaces::NamespaceReconciler;
use crate::pods::PodReconciler;
use crate::reconciler::run_reconcile_loop;
use crate::state::BackoffPolicy;

/// Join handles of the two reconciliation loops.
#[derive(Debug)]
pub struct ReconcilerHandles {
    pub pods: JoinHandle<KubeMetaResult<()>>,
    pub namespaces: JoinHandle<KubeMetaResult<()>>,
}

/// Spawn the pod and namespace loops.
///
/// The loops share nothing but the caches and the counters.
pub fn spawn_reconcilers(
    config: &MetadataConfig,
    store: Arc<MetadataStore>,
    stats: Arc<Stats>,
    factory: Arc<dyn ApiClientFactory>,
    shutdown_rx: watch::Receiver<bool>,
) -> KubeMetaResult<ReconcilerHandles> {
    let policy = BackoffPolicy::from_config(config);
    let pods = Arc::new(PodReconciler::from_config(config, Arc::clone(&store), Arc::clone(&stats))?);
    let namespaces = Arc::new(NamespaceReconciler::from_config(
        config,
        Arc::clone(&store),
        Arc::clone(&stats),
    )?);

    let pods = tokio::spawn(run_reconcile_loop(
        pods,
        Arc::clone(&factory),
        Arc::clone(&stats),
        policy,
        shutdown_rx.clone(),
    ));
    let namespaces = tokio::spawn(run_reconcile_loop(
        namespaces,
        factory,
        stats,
        policy,
        shutdown_rx,
    ));

    Ok(ReconcilerHandles { pods, namespaces })
}

/// Everything `spawn_background_tasks` started.
#[derive(Debug)]
pub struct BackgroundTasks {
    /// `None` when watching is disabled.
    pub reconcilers: Option<ReconcilerHandles>,
    pub stats_reporter: JoinHandle<u64>,
    /// `None` when checkpointing is not configured.
    pub checkpoint: Option<JoinHandle<u64>>,
}

/// Restore from the checkpoint (if configured), then spawn the reconcilers,
/// the stats reporter and the checkpoint task.
pub async fn spawn_background_tasks(
    config: &MetadataConfig,
    store: Arc<MetadataStore>,
    stats: Arc<Stats>,
    factory: Arc<dyn ApiClientFactory>,
    shutdown_rx: watch::Receiver<bool>,
) -> KubeMetaResult<BackgroundTasks> {
    config.validate()?;

    let checkpoint = match &config.checkpoint {
        Some(settings) => {
            let checkpoint = Arc::new(CheckpointStore::open(&settings.path, settings.max_size_mb)?);
            if let Some(ttl) = config.cache_ttl() {
                checkpoint.prune(ttl)?;
            }
            checkpoint.restore(&store).await?;
            Some(tokio::spawn(checkpoint_task(
                checkpoint,
                Arc::clone(&store),
                Duration::from_secs(settings.interval_secs),
                config.cache_ttl(),
                shutdown_rx.clone(),
            )))
        }
        None => None,
    };

    let reconcilers = if config.watch {
        Some(spawn_reconcilers(
            config,
            Arc::clone(&store),
            Arc::clone(&stats),
            factory,
            shutdown_rx.clone(),
        )?)
    } else {
        tracing::info!("watch disabled, caches fill on lookup only");
        None
    };

    let stats_reporter = tokio::spawn(stats_report_task(
        store,
        stats,
        config.stats_interval(),
        shutdown_rx,
    ));

    Ok(BackgroundTasks {
        reconcilers,
        stats_reporter,
        checkpoint,
    })
}
