//! KubeMeta Watch - Cache Reconciliation
//!
//! Long-running list-then-watch loops that keep the pod and namespace
//! caches fresh, with exponential backoff, full relists on expired cursors
//! and client rebuilds on authorization failures.

pub mod namespaces;
pub mod pods;
pub mod reconciler;
pub mod state;
pub mod supervisor;
pub mod telemetry;

pub use namespaces::NamespaceReconciler;
pub use pods::PodReconciler;
pub use reconciler::{run_reconcile_loop, LoopCounters, ResourceReconciler};
pub use state::{BackoffPolicy, ReconcilerState, RetryDecision};
pub use supervisor::{spawn_background_tasks, spawn_reconcilers, BackgroundTasks, ReconcilerHandles};
pub use telemetry::init_tracing;
