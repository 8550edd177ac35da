use std::{sync::Arc, time::Duration};

use chrono::{DateTime, Duration as ChronoDuration, Utc};
use metrics::{counter, histogram};
use thiserror::Error;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

use covtrack_core::expiry::ExpiryWindow;
use covtrack_core::types::ExpiringPolicy;
use covtrack_storage::{Database, PolicyError};
use covtrack_util::ExpirySettings;

/// Alert payload for a single lapsed policy.
#[derive(Debug, Clone, PartialEq)]
pub struct ExpiryAlert {
    pub policy_id: i64,
    pub car_model: Option<String>,
    pub provider: String,
}

/// Sink for expiry alerts.
///
/// Emission is synchronous and best-effort: a notifier must not return an
/// error and must not panic, so a failing sink can never abort a scan.
pub trait ExpirationNotifier: Send + Sync {
    fn notify(&self, alert: &ExpiryAlert);
}

/// Notifier that appends one structured log line per alert.
pub struct LogNotifier;

impl ExpirationNotifier for LogNotifier {
    fn notify(&self, alert: &ExpiryAlert) {
        info!(
            stage = "expiry",
            "Policy expiration alert: PolicyId={}, Car={}, Provider={}",
            alert.policy_id,
            alert.car_model.as_deref().unwrap_or(""),
            alert.provider
        );
    }
}

/// Background worker that detects lapsed policies and notifies exactly once
/// per policy.
///
/// One instance runs process-wide. Running several instances against the
/// same store would duplicate notifications inside a grace span before the
/// first commit lands; coordinating that is out of scope here.
pub struct ExpirationWorker {
    database: Database,
    notifier: Arc<dyn ExpirationNotifier>,
    window: ExpiryWindow,
    scan_interval: Duration,
    retry_backoff: Duration,
    clock: Arc<dyn Fn() -> DateTime<Utc> + Send + Sync>,
}

impl ExpirationWorker {
    /// Creates a worker over the given store, cadence settings and alert sink.
    pub fn new(
        database: Database,
        settings: ExpirySettings,
        notifier: Arc<dyn ExpirationNotifier>,
    ) -> Self {
        Self {
            database,
            notifier,
            window: ExpiryWindow::new(ChronoDuration::seconds(
                settings.grace_span.as_secs() as i64
            )),
            scan_interval: settings.scan_interval,
            retry_backoff: settings.retry_backoff,
            clock: Arc::new(Utc::now),
        }
    }

    /// Overrides the clock used to determine scan instants.
    #[cfg(test)]
    pub fn with_clock(mut self, clock: Arc<dyn Fn() -> DateTime<Utc> + Send + Sync>) -> Self {
        self.clock = clock;
        self
    }

    /// Runs the scheduler loop in the background until `shutdown` fires.
    pub fn spawn(self, shutdown: CancellationToken) -> tokio::task::JoinHandle<()> {
        tokio::spawn(async move {
            self.run_loop(shutdown).await;
        })
    }

    /// Scan, then sleep. Errors shorten the sleep to the retry backoff and
    /// never terminate the loop. Cancellation is honored between scans and
    /// during the sleep; a scan in flight always completes first.
    async fn run_loop(self, shutdown: CancellationToken) {
        info!(
            stage = "expiry",
            interval_secs = self.scan_interval.as_secs(),
            grace_span_secs = self.window.grace_span().num_seconds(),
            "expiration worker started"
        );

        while !shutdown.is_cancelled() {
            let delay = match self.run_once((self.clock)()).await {
                Ok(outcome) => {
                    if outcome.notified > 0 {
                        info!(
                            stage = "expiry",
                            notified = outcome.notified,
                            "expiration scan completed"
                        );
                    }
                    self.scan_interval
                }
                Err(err) => {
                    error!(stage = "expiry", error = %err, "expiration scan failed");
                    self.retry_backoff
                }
            };

            tokio::select! {
                _ = shutdown.cancelled() => break,
                _ = tokio::time::sleep(delay) => {}
            }
        }

        info!(stage = "expiry", "expiration worker stopped");
    }

    /// Executes one detection-and-mark scan against the provided instant.
    pub async fn run_once(&self, now: DateTime<Utc>) -> Result<ScanOutcome, ExpirationError> {
        let start = std::time::Instant::now();
        let result = self.scan(now).await;
        histogram!("policy_expiry_scan_seconds").record(start.elapsed().as_secs_f64());
        match &result {
            Ok(_) => counter!("policy_expiry_scans_total", "result" => "ok").increment(1),
            Err(_) => counter!("policy_expiry_scans_total", "result" => "error").increment(1),
        }
        result
    }

    async fn scan(&self, now: DateTime<Utc>) -> Result<ScanOutcome, ExpirationError> {
        let candidates = self
            .database
            .policies()
            .list_unprocessed_expiring(
                self.window.earliest_candidate_date(now),
                self.window.latest_candidate_date(now),
            )
            .await
            .map_err(ExpirationError::Query)?;

        let due: Vec<ExpiringPolicy> = candidates
            .into_iter()
            .filter(|policy| self.window.is_due(policy.end_date, now))
            .collect();

        if due.is_empty() {
            return Ok(ScanOutcome { notified: 0 });
        }

        for policy in &due {
            self.notifier.notify(&ExpiryAlert {
                policy_id: policy.id,
                car_model: policy.car_model.clone(),
                provider: policy.provider.clone(),
            });
            counter!("policy_expiry_notified_total").increment(1);
        }

        // Single batch commit. A failure here leaves every flag untouched;
        // the notifications above stand and the batch is retried next scan.
        let ids: Vec<i64> = due.iter().map(|policy| policy.id).collect();
        self.database
            .policies()
            .mark_processed(&ids)
            .await
            .map_err(ExpirationError::Commit)?;

        Ok(ScanOutcome {
            notified: ids.len(),
        })
    }
}

/// Result of one scan.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ScanOutcome {
    pub notified: usize,
}

/// Errors surfaced by a single scan. Both variants are recovered by the
/// scheduler loop with a retry backoff.
#[derive(Debug, Error)]
pub enum ExpirationError {
    #[error("failed to query expiring policies: {0}")]
    Query(#[source] PolicyError),
    #[error("failed to mark policies processed: {0}")]
    Commit(#[source] PolicyError),
}
