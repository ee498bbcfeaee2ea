//! Periodic archival of stale triggers and event logs.
//!
//! Each run takes one snapshot timestamp and passes it to both stores, so a
//! row created while the run is in progress is never compared against a
//! later boundary and cannot be archived by the pass that raced it.

use std::sync::Arc;
use std::time::Duration;

use beacon_core::error::CoreError;
use beacon_core::types::Timestamp;
use beacon_db::{EventLogStore, TriggerStore};
use beacon_events::{names, EventBus, PlatformEvent};
use chrono::Utc;
use serde::Serialize;
use serde_json::json;
use tokio_util::sync::CancellationToken;

/// Result of one retention pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct RetentionReport {
    pub as_of: Timestamp,
    pub triggers_archived: u64,
    pub logs_archived: u64,
}

pub struct RetentionManager {
    triggers: Arc<dyn TriggerStore>,
    logs: Arc<dyn EventLogStore>,
    bus: Arc<EventBus>,
    trigger_age: chrono::Duration,
    log_age: chrono::Duration,
    interval: Duration,
}

impl RetentionManager {
    pub fn new(
        triggers: Arc<dyn TriggerStore>,
        logs: Arc<dyn EventLogStore>,
        bus: Arc<EventBus>,
        trigger_retention_days: i64,
        log_retention_days: i64,
        interval: Duration,
    ) -> Self {
        Self {
            triggers,
            logs,
            bus,
            trigger_age: chrono::Duration::days(trigger_retention_days),
            log_age: chrono::Duration::days(log_retention_days),
            interval,
        }
    }

    /// Archive triggers and logs older than the configured thresholds,
    /// relative to `as_of`.
    ///
    /// Each store call is atomic; if the log pass fails the trigger pass
    /// stays committed and the error is returned.
    pub async fn run_once(&self, as_of: Timestamp) -> Result<RetentionReport, CoreError> {
        let triggers_archived = self.triggers.archive_older_than(self.trigger_age, as_of).await?;
        let logs_archived = self.logs.archive_older_than(self.log_age, as_of).await?;

        let report = RetentionReport {
            as_of,
            triggers_archived,
            logs_archived,
        };
        self.bus.publish(
            PlatformEvent::new(names::RETENTION_COMPLETED).with_payload(json!({
                "triggers_archived": triggers_archived,
                "logs_archived": logs_archived,
            })),
        );
        Ok(report)
    }

    /// Run the retention loop until `cancel` fires. The first pass runs
    /// immediately.
    pub async fn run(&self, cancel: CancellationToken) {
        tracing::info!(
            trigger_retention_days = self.trigger_age.num_days(),
            log_retention_days = self.log_age.num_days(),
            interval_secs = self.interval.as_secs(),
            "Retention manager started"
        );

        let mut interval = tokio::time::interval(self.interval);

        loop {
            tokio::select! {
                _ = cancel.cancelled() => {
                    tracing::info!("Retention manager stopping");
                    break;
                }
                _ = interval.tick() => {
                    match self.run_once(Utc::now()).await {
                        Ok(report) => {
                            if report.triggers_archived + report.logs_archived > 0 {
                                tracing::info!(
                                    triggers = report.triggers_archived,
                                    logs = report.logs_archived,
                                    "Retention: archived stale rows"
                                );
                            } else {
                                tracing::debug!("Retention: nothing to archive");
                            }
                        }
                        Err(e) => {
                            tracing::error!(error = %e, "Retention pass failed, retrying next cycle");
                        }
                    }
                }
            }
        }
    }
}
