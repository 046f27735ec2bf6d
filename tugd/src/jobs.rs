//! Background-job lifecycle helpers.
//!
//! Jobs are persisted rows ([`tug_common::entities::Job`]) driven through
//! `queued -> running -> (completed | failed | cancelled)`. Work loops hold a
//! [`JobHandle`] and call [`JobHandle::checkpoint`] between units of work:
//! counters are persisted and the cooperative cancel flag is observed there,
//! never mid-unit, so persisted state stays consistent at every checkpoint.

use std::sync::Arc;
use std::time::Duration;

use rand::RngExt;
use tracing::{info, warn};
use uuid::Uuid;

use tug_common::entities::PollState;
use tug_common::errors::{ErrorCode, StoreError};
use tug_common::types::{JobKind, JobStatus};

use crate::backends::VulnerabilityScanner;
use crate::events::EventBus;
use crate::metrics;
use crate::scan::ingest_report;
use crate::store::{StartJobOutcome, Store};

/// Start a job of `kind`, emitting events and metrics on a fresh start.
pub fn start_job(
    store: &Store,
    events: &EventBus,
    kind: JobKind,
    triggered_by: &str,
    poll: Option<PollState>,
) -> Result<StartJobOutcome, StoreError> {
    let outcome = store.try_start_job(kind, triggered_by, poll)?;
    if !outcome.already_running {
        metrics::JOBS_STARTED_TOTAL
            .with_label_values(&[kind.to_string().as_str()])
            .inc();
        events.emit(
            "job_started",
            &serde_json::json!({
                "id": outcome.job.id,
                "kind": kind,
                "triggered_by": triggered_by,
            }),
        );
    }
    Ok(outcome)
}

/// Progress deltas reported at a checkpoint.
#[derive(Debug, Clone, Copy, Default)]
pub struct Progress {
    pub processed: u64,
    pub found: u64,
    pub errors: u64,
}

/// Handle a work loop uses to drive one job row.
#[derive(Clone)]
pub struct JobHandle {
    store: Arc<Store>,
    events: EventBus,
    id: Uuid,
}

impl JobHandle {
    pub fn new(store: Arc<Store>, events: EventBus, id: Uuid) -> Self {
        Self { store, events, id }
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    /// Transition `queued -> running` and record the unit-of-work total.
    pub fn begin(&self, total: u64) -> Result<(), StoreError> {
        self.store.mutate_job(&self.id, |job| {
            job.mark_running();
            job.total_count = total;
            Ok(())
        })?;
        Ok(())
    }

    /// Persist progress and observe the cancel flag.
    ///
    /// Returns `false` when cancellation was requested: the job has been
    /// transitioned to `cancelled` (partial results intact) and the caller
    /// must stop.
    pub fn checkpoint(&self, progress: Progress) -> Result<bool, StoreError> {
        let job = self.store.mutate_job(&self.id, |job| {
            job.processed_count += progress.processed;
            job.found_count += progress.found;
            job.errors_count += progress.errors;
            if job.cancel_requested {
                job.mark_cancelled();
            }
            Ok(())
        })?;
        if job.status == JobStatus::Cancelled {
            info!(id = %self.id, kind = %job.kind, "job cancelled at checkpoint");
            self.events.emit(
                "job_cancelled",
                &serde_json::json!({ "id": self.id, "kind": job.kind }),
            );
            return Ok(false);
        }
        Ok(true)
    }

    pub fn complete(&self) -> Result<(), StoreError> {
        let job = self.store.mutate_job(&self.id, |job| {
            job.mark_completed();
            Ok(())
        })?;
        self.events.emit(
            "job_completed",
            &serde_json::json!({
                "id": self.id,
                "kind": job.kind,
                "processed": job.processed_count,
                "found": job.found_count,
                "errors": job.errors_count,
            }),
        );
        Ok(())
    }

    pub fn fail(&self, message: impl Into<String>) -> Result<(), StoreError> {
        let message = message.into();
        let job = self.store.mutate_job(&self.id, |job| {
            job.mark_failed(message.clone());
            Ok(())
        })?;
        self.events.emit(
            "job_failed",
            &serde_json::json!({ "id": self.id, "kind": job.kind, "error": message }),
        );
        Ok(())
    }
}

/// Request cooperative cancellation. The runner observes the flag at its
/// next checkpoint; in-flight work is never preempted.
pub fn request_cancel(store: &Store, id: &Uuid) -> Result<(), StoreError> {
    store.mutate_job(id, |job| {
        if !job.status.is_terminal() {
            job.cancel_requested = true;
        }
        Ok(())
    })?;
    Ok(())
}

/// Drive a pending-scan job: bounded polling of the external scanner after a
/// container recreate.
///
/// The external discovery system is eventually consistent — it may not have
/// seen the recreated container yet. Each cycle persists its bookkeeping
/// before touching the scanner, so a daemon restart resumes nothing and the
/// orphaned row tells the operator exactly how far polling got. Exhausting
/// `max_polls` or the trigger ceiling fails the job with a descriptive error
/// instead of retrying forever.
pub async fn run_pending_scan(
    handle: JobHandle,
    store: Arc<Store>,
    scanner: Arc<dyn VulnerabilityScanner>,
    poll_interval: Duration,
) {
    if let Err(err) = handle.begin(0) {
        warn!(id = %handle.id(), error = %err, "pending scan failed to start");
        return;
    }

    loop {
        let Some(job) = store.get_job(&handle.id()) else {
            warn!(id = %handle.id(), "pending scan job row disappeared");
            return;
        };
        let Some(poll) = job.poll.clone() else {
            let _ = handle.fail("pending scan job has no poll state");
            return;
        };
        let Some(container) = store.get_container(&poll.container) else {
            let _ = handle.fail(format!(
                "container `{}` no longer exists",
                poll.container
            ));
            return;
        };

        match handle.checkpoint(Progress::default()) {
            Ok(true) => {}
            Ok(false) => return,
            Err(err) => {
                warn!(id = %handle.id(), error = %err, "pending scan checkpoint failed");
                return;
            }
        }

        if poll.poll_count >= poll.max_polls {
            let _ = handle.fail(format!(
                "{}: scanner never discovered `{}` after {} polls",
                ErrorCode::JobPollBudgetExhausted.code_string(),
                container.image,
                poll.poll_count
            ));
            return;
        }

        // Persist the poll before performing it: restart-safe bookkeeping.
        if store
            .mutate_job(&handle.id(), |job| {
                if let Some(state) = job.poll.as_mut() {
                    state.poll_count += 1;
                }
                Ok(())
            })
            .is_err()
        {
            return;
        }

        match scanner.scan_result_for(&container.image) {
            Ok(Some(report)) => {
                let found = report.dependencies.len() as u64;
                if let Err(err) = ingest_report(&store, &container, &report) {
                    let _ = handle.fail(format!("failed to record scan result: {err}"));
                    return;
                }
                let _ = handle.checkpoint(Progress {
                    processed: 1,
                    found,
                    errors: 0,
                });
                let _ = handle.complete();
                return;
            }
            Ok(None) => {
                if poll.trigger_attempt_count >= poll.max_trigger_attempts {
                    let _ = handle.fail(format!(
                        "{}: triggered `{}` {} times without discovery",
                        ErrorCode::JobPollBudgetExhausted.code_string(),
                        container.image,
                        poll.trigger_attempt_count
                    ));
                    return;
                }
                let now = chrono::Utc::now();
                if store
                    .mutate_job(&handle.id(), |job| {
                        if let Some(state) = job.poll.as_mut() {
                            state.trigger_attempt_count += 1;
                            state.last_trigger_attempt_at = Some(now);
                        }
                        Ok(())
                    })
                    .is_err()
                {
                    return;
                }
                if let Err(err) = scanner.trigger_scan(&container.image) {
                    warn!(image = %container.image, error = %err, "scan trigger failed");
                    let _ = handle.checkpoint(Progress {
                        processed: 0,
                        found: 0,
                        errors: 1,
                    });
                }
            }
            Err(err) => {
                warn!(image = %container.image, error = %err, "scanner poll failed");
                let _ = handle.checkpoint(Progress {
                    processed: 0,
                    found: 0,
                    errors: 1,
                });
            }
        }

        // Jittered sleep so many daemons do not stampede a shared scanner.
        let jitter = rand::rng().random_range(0..=poll_interval.as_millis().max(1) as u64 / 5);
        tokio::time::sleep(poll_interval + Duration::from_millis(jitter)).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backends::{MockScanner, VulnReport};
    use tug_common::types::ContainerId;

    fn store() -> (tempfile::TempDir, Arc<Store>) {
        let dir = tempfile::tempdir().unwrap();
        let store = Arc::new(Store::open(dir.path()).unwrap());
        (dir, store)
    }

    fn seed_container(store: &Store, name: &str) {
        store
            .upsert_discovered(&crate::backends::DiscoveredContainer {
                name: ContainerId::new(name),
                compose_file: "/srv/stack/docker-compose.yml".into(),
                service: name.to_string(),
                project: "homelab".to_string(),
                image: format!("library/{name}"),
                registry: "docker.io".to_string(),
                tag: "1.0.0".to_string(),
                digest: None,
            })
            .unwrap();
    }

    fn poll_state(name: &str, max_polls: u32, max_triggers: u32) -> PollState {
        PollState {
            container: ContainerId::new(name),
            poll_count: 0,
            max_polls,
            trigger_attempt_count: 0,
            max_trigger_attempts: max_triggers,
            last_trigger_attempt_at: None,
        }
    }

    #[tokio::test]
    async fn checkpoint_observes_cancellation() {
        let (_dir, store) = store();
        let events = EventBus::new(8);
        let outcome = start_job(&store, &events, JobKind::Check, "test", None).unwrap();
        let handle = JobHandle::new(store.clone(), events, outcome.job.id);
        handle.begin(10).unwrap();

        assert!(handle.checkpoint(Progress { processed: 3, found: 1, errors: 0 }).unwrap());
        request_cancel(&store, &outcome.job.id).unwrap();
        assert!(!handle.checkpoint(Progress { processed: 1, found: 0, errors: 0 }).unwrap());

        let job = store.get_job(&outcome.job.id).unwrap();
        assert_eq!(job.status, JobStatus::Cancelled);
        // Partial progress survives cancellation.
        assert_eq!(job.processed_count, 4);
        assert_eq!(job.found_count, 1);
    }

    #[tokio::test]
    async fn pending_scan_completes_once_scanner_discovers() {
        let (_dir, store) = store();
        seed_container(&store, "app");
        let events = EventBus::new(8);
        let scanner = Arc::new(MockScanner::default());
        scanner.set_report("library/app", VulnReport::default());

        let outcome = start_job(
            &store,
            &events,
            JobKind::PendingScan,
            "orchestrator",
            Some(poll_state("app", 5, 3)),
        )
        .unwrap();
        let handle = JobHandle::new(store.clone(), events, outcome.job.id);
        run_pending_scan(handle, store.clone(), scanner, Duration::from_millis(1)).await;

        let job = store.get_job(&outcome.job.id).unwrap();
        assert_eq!(job.status, JobStatus::Completed);
        assert_eq!(job.poll.unwrap().poll_count, 1);
    }

    #[tokio::test]
    async fn pending_scan_triggers_then_fails_after_poll_budget() {
        let (_dir, store) = store();
        seed_container(&store, "app");
        let events = EventBus::new(8);
        let scanner = Arc::new(MockScanner::default());
        // Never discovered: scanner returns None forever.

        let outcome = start_job(
            &store,
            &events,
            JobKind::PendingScan,
            "orchestrator",
            Some(poll_state("app", 3, 10)),
        )
        .unwrap();
        let handle = JobHandle::new(store.clone(), events.clone(), outcome.job.id);
        run_pending_scan(handle, store.clone(), scanner.clone(), Duration::from_millis(1)).await;

        let job = store.get_job(&outcome.job.id).unwrap();
        assert_eq!(job.status, JobStatus::Failed);
        let message = job.error_message.unwrap();
        assert!(message.contains("TUG-E202"), "message: {message}");
        assert_eq!(job.poll.unwrap().poll_count, 3);
        assert_eq!(scanner.triggered().len(), 3);
    }

    #[tokio::test]
    async fn pending_scan_trigger_ceiling_fails_descriptively() {
        let (_dir, store) = store();
        seed_container(&store, "app");
        let events = EventBus::new(8);
        let scanner = Arc::new(MockScanner::default());

        let outcome = start_job(
            &store,
            &events,
            JobKind::PendingScan,
            "orchestrator",
            Some(poll_state("app", 100, 2)),
        )
        .unwrap();
        let handle = JobHandle::new(store.clone(), events, outcome.job.id);
        run_pending_scan(handle, store.clone(), scanner, Duration::from_millis(1)).await;

        let job = store.get_job(&outcome.job.id).unwrap();
        assert_eq!(job.status, JobStatus::Failed);
        let poll = job.poll.unwrap();
        assert_eq!(poll.trigger_attempt_count, 2);
        assert!(poll.last_trigger_attempt_at.is_some());
    }
}
