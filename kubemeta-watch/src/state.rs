//! Per-loop retry and cursor state.
//!
//! Each reconciliation task owns one `ReconcilerState`; nothing here is
//! shared between tasks.

use std::time::Duration;

use kubemeta_core::MetadataConfig;

/// Retry settings for one loop.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BackoffPolicy {
    pub initial_interval: Duration,
    pub base: f64,
    pub max_retries: u32,
}

impl BackoffPolicy {
    pub fn new(initial_interval: Duration, base: f64, max_retries: u32) -> Self {
        Self {
            initial_interval,
            base,
            max_retries,
        }
    }

    pub fn from_config(config: &MetadataConfig) -> Self {
        Self::new(
            config.watch_retry_interval(),
            config.watch_retry_exponential_backoff_base,
            config.watch_retry_max_times,
        )
    }
}

impl Default for BackoffPolicy {
    fn default() -> Self {
        Self::from_config(&MetadataConfig::default())
    }
}

/// What to do after a generic failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryDecision {
    /// Sleep this long, then list and watch again.
    Retry(Duration),
    /// Retry budget exhausted.
    GiveUp,
}

#[derive(Debug, Clone)]
pub struct ReconcilerState {
    policy: BackoffPolicy,
    retry_count: u32,
    backoff_interval: Duration,
    auth_refreshes: u32,
    resource_version: Option<String>,
}

impl ReconcilerState {
    pub fn new(policy: BackoffPolicy) -> Self {
        Self {
            policy,
            retry_count: 0,
            backoff_interval: policy.initial_interval,
            auth_refreshes: 0,
            resource_version: None,
        }
    }

    pub fn policy(&self) -> &BackoffPolicy {
        &self.policy
    }

    pub fn retry_count(&self) -> u32 {
        self.retry_count
    }

    pub fn backoff_interval(&self) -> Duration {
        self.backoff_interval
    }

    /// Connectivity is healthy again: restore the full retry budget.
    pub fn reset(&mut self) {
        self.retry_count = 0;
        self.backoff_interval = self.policy.initial_interval;
        self.auth_refreshes = 0;
    }

    /// Account for one generic failure.
    ///
    /// While under budget, returns the interval to sleep and grows the next
    /// one by the policy base.
    pub fn record_failure(&mut self) -> RetryDecision {
        if self.retry_count >= self.policy.max_retries {
            return RetryDecision::GiveUp;
        }
        let wait = self.backoff_interval;
        self.backoff_interval = scale(wait, self.policy.base);
        self.retry_count += 1;
        RetryDecision::Retry(wait)
    }

    /// Account for one 401. Returns `false` once consecutive refreshes exceed
    /// the retry budget, at which point the failure counts as generic.
    pub fn record_auth_refresh(&mut self) -> bool {
        if self.auth_refreshes >= self.policy.max_retries {
            return false;
        }
        self.auth_refreshes += 1;
        true
    }

    /// Cursor the next watch resumes from. `None` forces a full relist.
    pub fn resource_version(&self) -> Option<&str> {
        self.resource_version.as_deref()
    }

    pub fn set_resource_version(&mut self, resource_version: Option<&str>) {
        if let Some(rv) = resource_version {
            self.resource_version = Some(rv.to_string());
        }
    }

    pub fn clear_resource_version(&mut self) {
        self.resource_version = None;
    }
}

/// `interval * factor`, rounded to the nanosecond and saturating.
fn scale(interval: Duration, factor: f64) -> Duration {
    let nanos = (interval.as_nanos() as f64 * factor).round();
    if nanos >= u64::MAX as f64 {
        Duration::from_nanos(u64::MAX)
    } else {
        Duration::from_nanos(nanos as u64)
    }
}
