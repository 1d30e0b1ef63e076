//! LMDB checkpointing of the metadata caches.
//!
//! Lets a restarted process enrich records immediately instead of waiting
//! for the first list and a round of cache misses.
//!
//! # Layout
//!
//! One LMDB environment with three named databases (`identities`, `pods`,
//! `namespaces`). Keys are the cache keys as UTF-8; values are
//! `[created_at millis LE: 8 bytes][json]`.
//!
//! Writes are insert-or-ignore: an entry keeps the `created_at` of its first
//! write, so `prune` ages entries out by when they were first seen.

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use heed::types::Bytes;
use heed::{Database, Env, EnvOpenOptions, RoTxn, RwTxn};
use kubemeta_core::CheckpointError;
use serde::de::DeserializeOwned;
use serde::Serialize;
use tokio::sync::watch;
use tokio::time::{interval, MissedTickBehavior};

use crate::store::MetadataStore;

type RawDb = Database<Bytes, Bytes>;

/// Per-table entry counts.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CheckpointCounts {
    pub identities: usize,
    pub pods: usize,
    pub namespaces: usize,
}

impl CheckpointCounts {
    pub fn total(&self) -> usize {
        self.identities + self.pods + self.namespaces
    }
}

/// LMDB-backed snapshot of the three caches.
pub struct CheckpointStore {
    env: Env,
    identities: RawDb,
    pods: RawDb,
    namespaces: RawDb,
}

impl CheckpointStore {
    /// Open (or create) a checkpoint environment under `path`.
    ///
    /// # Errors
    ///
    /// Returns an error if:
    /// - The directory cannot be created
    /// - LMDB environment cannot be opened
    /// - One of the named databases cannot be created
    pub fn open<P: AsRef<Path>>(path: P, max_size_mb: usize) -> Result<Self, CheckpointError> {
        std::fs::create_dir_all(&path).map_err(|e| CheckpointError::Io(e.to_string()))?;

        let env = unsafe {
            EnvOpenOptions::new()
                .map_size(max_size_mb.max(1) * 1024 * 1024)
                .max_dbs(3)
                .open(path.as_ref())
        }
        .map_err(|e| CheckpointError::EnvOpen(e.to_string()))?;

        let mut wtxn = env
            .write_txn()
            .map_err(|e| CheckpointError::Transaction(e.to_string()))?;
        let identities = Self::create_db(&env, &mut wtxn, "identities")?;
        let pods = Self::create_db(&env, &mut wtxn, "pods")?;
        let namespaces = Self::create_db(&env, &mut wtxn, "namespaces")?;
        wtxn.commit()
            .map_err(|e| CheckpointError::Transaction(e.to_string()))?;

        Ok(Self {
            env,
            identities,
            pods,
            namespaces,
        })
    }

    fn create_db(env: &Env, wtxn: &mut RwTxn<'_>, name: &str) -> Result<RawDb, CheckpointError> {
        env.create_database(wtxn, Some(name))
            .map_err(|e| CheckpointError::DbOpen {
                name: name.to_string(),
                reason: e.to_string(),
            })
    }

    /// Persist every fresh cache entry, keeping existing rows untouched.
    ///
    /// Returns how many new rows were inserted per table.
    pub async fn write(&self, store: &MetadataStore) -> Result<CheckpointCounts, CheckpointError> {
        self.write_at(store, Utc::now()).await
    }

    async fn write_at(
        &self,
        store: &MetadataStore,
        now: DateTime<Utc>,
    ) -> Result<CheckpointCounts, CheckpointError> {
        let identities = store.identities.snapshot().await;
        let pods = store.pods.snapshot().await;
        let namespaces = store.namespaces.snapshot().await;

        let mut wtxn = self
            .env
            .write_txn()
            .map_err(|e| CheckpointError::Transaction(e.to_string()))?;
        let counts = CheckpointCounts {
            identities: insert_missing(&mut wtxn, self.identities, &identities, now)?,
            pods: insert_missing(&mut wtxn, self.pods, &pods, now)?,
            namespaces: insert_missing(&mut wtxn, self.namespaces, &namespaces, now)?,
        };
        wtxn.commit()
            .map_err(|e| CheckpointError::Transaction(e.to_string()))?;

        tracing::debug!(
            identities = counts.identities,
            pods = counts.pods,
            namespaces = counts.namespaces,
            "checkpoint written"
        );
        Ok(counts)
    }

    /// Delete rows first written at least `ttl` ago.
    pub fn prune(&self, ttl: Duration) -> Result<CheckpointCounts, CheckpointError> {
        let ttl = chrono::Duration::from_std(ttl)
            .map_err(|e| CheckpointError::Serialization(e.to_string()))?;
        self.prune_before(Utc::now() - ttl)
    }

    /// Delete rows whose `created_at <= cutoff`.
    pub fn prune_before(&self, cutoff: DateTime<Utc>) -> Result<CheckpointCounts, CheckpointError> {
        let mut wtxn = self
            .env
            .write_txn()
            .map_err(|e| CheckpointError::Transaction(e.to_string()))?;
        let counts = CheckpointCounts {
            identities: delete_older(&mut wtxn, self.identities, cutoff)?,
            pods: delete_older(&mut wtxn, self.pods, cutoff)?,
            namespaces: delete_older(&mut wtxn, self.namespaces, cutoff)?,
        };
        wtxn.commit()
            .map_err(|e| CheckpointError::Transaction(e.to_string()))?;
        Ok(counts)
    }

    /// Load every row back into the caches.
    pub async fn restore(&self, store: &MetadataStore) -> Result<CheckpointCounts, CheckpointError> {
        let (identities, pods, namespaces) = {
            let rtxn = self
                .env
                .read_txn()
                .map_err(|e| CheckpointError::Transaction(e.to_string()))?;
            (
                read_all(&rtxn, self.identities)?,
                read_all(&rtxn, self.pods)?,
                read_all(&rtxn, self.namespaces)?,
            )
        };

        let counts = CheckpointCounts {
            identities: identities.len(),
            pods: pods.len(),
            namespaces: namespaces.len(),
        };
        for (key, value) in identities {
            store.identities.set(key, value).await;
        }
        for (key, value) in pods {
            store.pods.set(key, value).await;
        }
        for (key, value) in namespaces {
            store.namespaces.set(key, value).await;
        }

        tracing::info!(
            identities = counts.identities,
            pods = counts.pods,
            namespaces = counts.namespaces,
            "restored metadata caches from checkpoint"
        );
        Ok(counts)
    }

    /// Current row counts.
    pub fn counts(&self) -> Result<CheckpointCounts, CheckpointError> {
        let rtxn = self
            .env
            .read_txn()
            .map_err(|e| CheckpointError::Transaction(e.to_string()))?;
        let len = |db: RawDb| {
            db.len(&rtxn)
                .map(|n| n as usize)
                .map_err(|e| CheckpointError::Transaction(e.to_string()))
        };
        Ok(CheckpointCounts {
            identities: len(self.identities)?,
            pods: len(self.pods)?,
            namespaces: len(self.namespaces)?,
        })
    }
}

// ============================================================================
// ROW ENCODING
// ============================================================================

fn encode_row<T: Serialize>(created_at: DateTime<Utc>, value: &T) -> Result<Vec<u8>, CheckpointError> {
    let json = serde_json::to_vec(value).map_err(|e| CheckpointError::Serialization(e.to_string()))?;
    let mut row = Vec::with_capacity(8 + json.len());
    row.extend_from_slice(&created_at.timestamp_millis().to_le_bytes());
    row.extend_from_slice(&json);
    Ok(row)
}

fn decode_created_at(row: &[u8]) -> Option<DateTime<Utc>> {
    let millis: [u8; 8] = row.get(0..8)?.try_into().ok()?;
    DateTime::from_timestamp_millis(i64::from_le_bytes(millis))
}

fn decode_row<T: DeserializeOwned>(row: &[u8]) -> Result<T, CheckpointError> {
    if row.len() < 8 {
        return Err(CheckpointError::Serialization("row shorter than header".to_string()));
    }
    serde_json::from_slice(&row[8..]).map_err(|e| CheckpointError::Serialization(e.to_string()))
}

fn insert_missing<T: Serialize>(
    wtxn: &mut RwTxn<'_>,
    db: RawDb,
    entries: &[(String, T)],
    now: DateTime<Utc>,
) -> Result<usize, CheckpointError> {
    let mut inserted = 0;
    for (key, value) in entries {
        let exists = db
            .get(wtxn, key.as_bytes())
            .map_err(|e| CheckpointError::Transaction(e.to_string()))?
            .is_some();
        if exists {
            continue;
        }
        let row = encode_row(now, value)?;
        db.put(wtxn, key.as_bytes(), &row)
            .map_err(|e| CheckpointError::Transaction(e.to_string()))?;
        inserted += 1;
    }
    Ok(inserted)
}

fn delete_older(wtxn: &mut RwTxn<'_>, db: RawDb, cutoff: DateTime<Utc>) -> Result<usize, CheckpointError> {
    let stale: Vec<Vec<u8>> = {
        let iter = db
            .iter(wtxn)
            .map_err(|e| CheckpointError::Transaction(e.to_string()))?;
        let mut stale = Vec::new();
        for item in iter {
            let (key, row) = item.map_err(|e| CheckpointError::Transaction(e.to_string()))?;
            // Rows with an unreadable header are treated as stale.
            let expired = decode_created_at(row).map(|t| t <= cutoff).unwrap_or(true);
            if expired {
                stale.push(key.to_vec());
            }
        }
        stale
    };

    for key in &stale {
        db.delete(wtxn, key)
            .map_err(|e| CheckpointError::Transaction(e.to_string()))?;
    }
    Ok(stale.len())
}

fn read_all<T: DeserializeOwned>(rtxn: &RoTxn<'_>, db: RawDb) -> Result<Vec<(String, T)>, CheckpointError> {
    let iter = db
        .iter(rtxn)
        .map_err(|e| CheckpointError::Transaction(e.to_string()))?;
    let mut rows = Vec::new();
    for item in iter {
        let (key, row) = item.map_err(|e| CheckpointError::Transaction(e.to_string()))?;
        let key = String::from_utf8_lossy(key).into_owned();
        match decode_row(row) {
            Ok(value) => rows.push((key, value)),
            Err(e) => tracing::debug!(key = %key, error = %e, "skipping unreadable checkpoint row"),
        }
    }
    Ok(rows)
}

// ============================================================================
// BACKGROUND TASK
// ============================================================================

/// Periodically write the caches to `checkpoint` and prune rows older than
/// `ttl`. A final write happens on shutdown.
///
/// Returns the number of completed checkpoint cycles.
pub async fn checkpoint_task(
    checkpoint: Arc<CheckpointStore>,
    store: Arc<MetadataStore>,
    period: Duration,
    ttl: Option<Duration>,
    mut shutdown_rx: watch::Receiver<bool>,
) -> u64 {
    let mut ticker = interval(period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
    ticker.tick().await;

    tracing::info!(interval_secs = period.as_secs(), "Checkpoint task started");

    let mut cycles = 0u64;
    loop {
        tokio::select! {
            changed = shutdown_rx.changed() => {
                if changed.is_err() || *shutdown_rx.borrow() {
                    break;
                }
            }
            _ = ticker.tick() => {
                run_cycle(&checkpoint, &store, ttl).await;
                cycles += 1;
            }
        }
    }

    if let Err(e) = checkpoint.write(&store).await {
        tracing::warn!(error = %e, "final checkpoint write failed");
    }
    tracing::info!(cycles, "Checkpoint task stopped");
    cycles
}

async fn run_cycle(checkpoint: &CheckpointStore, store: &MetadataStore, ttl: Option<Duration>) {
    if let Err(e) = checkpoint.write(store).await {
        tracing::warn!(error = %e, "checkpoint write failed");
        return;
    }
    if let Some(ttl) = ttl {
        match checkpoint.prune(ttl) {
            Ok(pruned) if pruned.total() > 0 => {
                tracing::debug!(pruned = pruned.total(), "pruned checkpoint rows")
            }
            Ok(_) => {}
            Err(e) => tracing::warn!(error = %e, "checkpoint prune failed"),
        }
    }
}
