//! Unix-socket API: newline-delimited JSON requests from the `tug` CLI.

use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::Utc;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::UnixStream;
use tracing::{debug, warn};

use tug_common::config::DaemonConfig;
use tug_common::entities::ActionStamp;
use tug_common::errors::{ErrorCode, StoreError};
use tug_common::protocol::{Request, Response, StatusInfo, SweepReport};
use tug_common::types::{JobKind, UpdateStatus};

use crate::backends::{Clock, ContainerEngine, Registry, VulnerabilityScanner};
use crate::events::EventBus;
use crate::jobs::{self, JobHandle};
use crate::orchestrator::{self, PollBudget, SweepContext};
use crate::scan::{self, ScanContext};
use crate::store::Store;

/// Shared daemon context passed to all API handlers and timers.
#[derive(Clone)]
pub struct DaemonContext {
    pub store: Arc<Store>,
    pub engine: Arc<dyn ContainerEngine>,
    pub registry: Arc<dyn Registry>,
    pub scanner: Arc<dyn VulnerabilityScanner>,
    pub clock: Arc<dyn Clock>,
    pub events: EventBus,
    pub config: Arc<DaemonConfig>,
    pub started_at: Instant,
}

impl DaemonContext {
    fn scan_context(&self) -> ScanContext {
        ScanContext {
            store: self.store.clone(),
            engine: self.engine.clone(),
            registry: self.registry.clone(),
            scanner: self.scanner.clone(),
            clock: self.clock.clone(),
            events: self.events.clone(),
            settings: self.config.engine_settings(),
        }
    }

    fn sweep_context(&self) -> SweepContext {
        SweepContext {
            store: self.store.clone(),
            engine: self.engine.clone(),
            clock: self.clock.clone(),
            events: self.events.clone(),
            settings: self.config.engine_settings(),
            poll_budget: PollBudget {
                max_polls: self.config.scan.max_polls,
                max_trigger_attempts: self.config.scan.max_trigger_attempts,
            },
        }
    }
}

/// Serve one CLI connection.
pub async fn handle_connection(stream: UnixStream, ctx: DaemonContext) -> anyhow::Result<()> {
    let (reader, mut writer) = stream.into_split();
    let mut lines = BufReader::new(reader).lines();
    while let Some(line) = lines.next_line().await? {
        if line.trim().is_empty() {
            continue;
        }
        let response = match serde_json::from_str::<Request>(&line) {
            Ok(request) => dispatch(&ctx, request).await,
            Err(err) => Response::error(ErrorCode::Internal, format!("invalid request: {err}")),
        };
        let mut payload = serde_json::to_string(&response)?;
        payload.push('\n');
        writer.write_all(payload.as_bytes()).await?;
    }
    Ok(())
}

/// Route one request to its handler.
pub async fn dispatch(ctx: &DaemonContext, request: Request) -> Response {
    match request {
        Request::Status => status(ctx),
        Request::ListContainers => Response::Containers {
            containers: ctx.store.containers(),
        },
        Request::GetTrace { container } => {
            // The effective trace is the unresolved row's, falling back to
            // the most recently created row for the container.
            let entries = ctx
                .store
                .unresolved_update_for(&container)
                .or_else(|| {
                    ctx.store
                        .updates(None)
                        .into_iter()
                        .find(|u| u.container == container)
                })
                .map(|u| u.decision_trace)
                .unwrap_or_default();
            Response::Trace { entries }
        }
        Request::ListUpdates { status } => Response::Updates {
            updates: ctx.store.updates(status),
        },
        Request::ApproveUpdate {
            id,
            expected_version,
            actor,
            reason,
        } => {
            let result =
                ctx.store
                    .transition_update(&id, expected_version, UpdateStatus::Approved, |u| {
                        u.approval = Some(ActionStamp {
                            actor: actor.clone(),
                            at: Utc::now(),
                            reason,
                        });
                        // A fresh approval resets spent retry budget.
                        u.retry_count = 0;
                        u.next_retry_at = None;
                        u.last_error = None;
                    });
            match result {
                Ok(update) => {
                    ctx.events.emit(
                        "update_approved",
                        &serde_json::json!({ "id": id, "actor": actor }),
                    );
                    Response::Update {
                        update: Box::new(update),
                    }
                }
                Err(err) => store_error_response(err),
            }
        }
        Request::RejectUpdate {
            id,
            expected_version,
            actor,
            reason,
        } => {
            let result =
                ctx.store
                    .transition_update(&id, expected_version, UpdateStatus::Rejected, |u| {
                        u.rejection = Some(ActionStamp {
                            actor: actor.clone(),
                            at: Utc::now(),
                            reason,
                        });
                    });
            match result {
                Ok(update) => {
                    ctx.events.emit(
                        "update_rejected",
                        &serde_json::json!({ "id": id, "actor": actor }),
                    );
                    Response::Update {
                        update: Box::new(update),
                    }
                }
                Err(err) => store_error_response(err),
            }
        }
        Request::SnoozeUpdate {
            id,
            expected_version,
            until,
        } => {
            let result = ctx.store.mutate_update(&id, expected_version, |u| {
                if !u.is_unresolved() {
                    return Err(StoreError::InvalidTransition {
                        entity: "update",
                        id: id.to_string(),
                        from: u.status.to_string(),
                        to: "snoozed".to_string(),
                    });
                }
                u.snoozed_until = Some(until);
                Ok(())
            });
            match result {
                Ok(update) => Response::Update {
                    update: Box::new(update),
                },
                Err(err) => store_error_response(err),
            }
        }
        Request::StartCheck { triggered_by } => start_check(ctx, &triggered_by),
        Request::StartDependencyScan { triggered_by } => {
            start_dependency_scan(ctx, &triggered_by)
        }
        Request::ListJobs => Response::Jobs {
            jobs: ctx.store.jobs(),
        },
        Request::CancelJob { id } => match jobs::request_cancel(&ctx.store, &id) {
            Ok(()) => Response::CancelRequested { id },
            Err(err) => store_error_response(err),
        },
        Request::ListHistory { container, limit } => Response::History {
            entries: ctx.store.history(container.as_ref(), limit),
        },
        Request::Sweep => Response::Sweep {
            report: run_sweep(ctx).await,
        },
    }
}

fn status(ctx: &DaemonContext) -> Response {
    let jobs = ctx.store.jobs();
    Response::Status(StatusInfo {
        version: env!("CARGO_PKG_VERSION").to_string(),
        pid: std::process::id(),
        uptime_secs: ctx.started_at.elapsed().as_secs(),
        containers: ctx.store.containers().len(),
        pending_updates: ctx.store.updates(Some(UpdateStatus::Pending)).len(),
        running_jobs: jobs.iter().filter(|j| !j.status.is_terminal()).count(),
    })
}

/// Start a fleet check job; the work runs as a background task.
pub fn start_check(ctx: &DaemonContext, triggered_by: &str) -> Response {
    match jobs::start_job(&ctx.store, &ctx.events, JobKind::Check, triggered_by, None) {
        Ok(outcome) => {
            if !outcome.already_running {
                let handle =
                    JobHandle::new(ctx.store.clone(), ctx.events.clone(), outcome.job.id);
                let scan_ctx = ctx.scan_context();
                tokio::spawn(async move {
                    scan::run_check_job(handle, scan_ctx).await;
                });
            }
            Response::JobStarted {
                id: outcome.job.id,
                already_running: outcome.already_running,
            }
        }
        Err(err) => store_error_response(err),
    }
}

/// Start a dependency scan job; the work runs as a background task.
pub fn start_dependency_scan(ctx: &DaemonContext, triggered_by: &str) -> Response {
    match jobs::start_job(
        &ctx.store,
        &ctx.events,
        JobKind::DependencyScan,
        triggered_by,
        None,
    ) {
        Ok(outcome) => {
            if !outcome.already_running {
                let handle =
                    JobHandle::new(ctx.store.clone(), ctx.events.clone(), outcome.job.id);
                let scan_ctx = ctx.scan_context();
                tokio::spawn(async move {
                    scan::run_dependency_scan_job(handle, scan_ctx).await;
                });
            }
            Response::JobStarted {
                id: outcome.job.id,
                already_running: outcome.already_running,
            }
        }
        Err(err) => store_error_response(err),
    }
}

/// Run one orchestration sweep off the async runtime's worker threads and
/// start polling loops for any pending-scan jobs it created.
pub async fn run_sweep(ctx: &DaemonContext) -> SweepReport {
    let sweep_ctx = ctx.sweep_context();
    let outcome = match tokio::task::spawn_blocking(move || orchestrator::sweep(&sweep_ctx)).await
    {
        Ok(outcome) => outcome,
        Err(err) => {
            warn!(error = %err, "sweep task panicked");
            return SweepReport::default();
        }
    };
    for job_id in &outcome.pending_scan_jobs {
        let handle = JobHandle::new(ctx.store.clone(), ctx.events.clone(), *job_id);
        let store = ctx.store.clone();
        let scanner = ctx.scanner.clone();
        let interval = Duration::from_secs(ctx.config.scan.poll_interval_secs);
        tokio::spawn(async move {
            jobs::run_pending_scan(handle, store, scanner, interval).await;
        });
    }
    debug!(report = ?outcome.report, "sweep finished");
    outcome.report
}

fn store_error_response(err: StoreError) -> Response {
    let code = match &err {
        StoreError::VersionConflict { .. } => ErrorCode::VersionConflict,
        StoreError::NotFound { .. } => ErrorCode::Internal,
        StoreError::InvalidTransition { .. } => ErrorCode::Internal,
        _ => ErrorCode::Internal,
    };
    Response::error(code, err.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backends::{
        DiscoveredContainer, ManualClock, MockContainerEngine, MockRegistry, MockScanner,
    };
    use std::path::PathBuf;
    use tug_common::types::ContainerId;

    fn context() -> (tempfile::TempDir, DaemonContext) {
        let dir = tempfile::tempdir().unwrap();
        let store = Arc::new(Store::open(dir.path()).unwrap());
        let ctx = DaemonContext {
            store,
            engine: Arc::new(MockContainerEngine::default()),
            registry: Arc::new(MockRegistry::default()),
            scanner: Arc::new(MockScanner::default()),
            clock: Arc::new(ManualClock::at(Utc::now())),
            events: EventBus::new(8),
            config: Arc::new(DaemonConfig::default()),
            started_at: Instant::now(),
        };
        (dir, ctx)
    }

    fn seed_container(ctx: &DaemonContext, name: &str) {
        ctx.store
            .upsert_discovered(&DiscoveredContainer {
                name: ContainerId::new(name),
                compose_file: PathBuf::from("/srv/stack/docker-compose.yml"),
                service: name.to_string(),
                project: "homelab".to_string(),
                image: format!("library/{name}"),
                registry: "docker.io".to_string(),
                tag: "1.0.0".to_string(),
                digest: None,
            })
            .unwrap();
    }

    #[tokio::test]
    async fn status_reports_counts() {
        let (_dir, ctx) = context();
        seed_container(&ctx, "app");
        let response = dispatch(&ctx, Request::Status).await;
        match response {
            Response::Status(info) => {
                assert_eq!(info.containers, 1);
                assert_eq!(info.pending_updates, 0);
            }
            other => panic!("unexpected response: {other:?}"),
        }
    }

    #[tokio::test]
    async fn start_check_reports_already_running_for_a_live_job() {
        let (_dir, ctx) = context();
        // Pin a live job directly in the store (no runner racing the test).
        let existing = ctx
            .store
            .try_start_job(tug_common::types::JobKind::Check, "timer", None)
            .unwrap();

        let response = dispatch(
            &ctx,
            Request::StartCheck {
                triggered_by: "operator".to_string(),
            },
        )
        .await;
        match response {
            Response::JobStarted {
                id,
                already_running,
            } => {
                assert!(already_running);
                assert_eq!(id, existing.job.id);
            }
            other => panic!("unexpected response: {other:?}"),
        }
        assert_eq!(ctx.store.jobs().len(), 1, "no second row created");
    }

    #[tokio::test]
    async fn approve_requires_the_observed_version() {
        let (_dir, ctx) = context();
        seed_container(&ctx, "app");
        let now = Utc::now();
        let update = ctx
            .store
            .insert_update(tug_common::entities::Update {
                id: uuid::Uuid::new_v4(),
                container: ContainerId::new("app"),
                from_tag: "1.0.0".to_string(),
                to_tag: "1.1.0".to_string(),
                registry: "docker.io".to_string(),
                reason: Default::default(),
                cve_delta: Default::default(),
                status: UpdateStatus::Pending,
                update_kind: tug_common::types::UpdateKind::Tag,
                change_type: None,
                scope_violation: false,
                decision_trace: Vec::new(),
                retry_count: 0,
                max_retries: 3,
                backoff_multiplier: 3,
                next_retry_at: None,
                last_error: None,
                approval: None,
                rejection: None,
                snoozed_until: None,
                version: 1,
                created_at: now,
                updated_at: now,
            })
            .unwrap();

        // Stale version: rejected with the conflict catalog code.
        let stale = dispatch(
            &ctx,
            Request::ApproveUpdate {
                id: update.id,
                expected_version: 99,
                actor: "ops".to_string(),
                reason: None,
            },
        )
        .await;
        match stale {
            Response::Error { code, .. } => assert_eq!(code, "TUG-E302"),
            other => panic!("unexpected response: {other:?}"),
        }

        let ok = dispatch(
            &ctx,
            Request::ApproveUpdate {
                id: update.id,
                expected_version: 1,
                actor: "ops".to_string(),
                reason: Some("fine".to_string()),
            },
        )
        .await;
        match ok {
            Response::Update { update } => {
                assert_eq!(update.status, UpdateStatus::Approved);
                assert_eq!(update.approval.as_ref().unwrap().actor, "ops");
                assert_eq!(update.version, 2);
            }
            other => panic!("unexpected response: {other:?}"),
        }
    }

    #[tokio::test]
    async fn snooze_refuses_resolved_rows() {
        let (_dir, ctx) = context();
        seed_container(&ctx, "app");
        let now = Utc::now();
        let update = ctx
            .store
            .insert_update(tug_common::entities::Update {
                id: uuid::Uuid::new_v4(),
                container: ContainerId::new("app"),
                from_tag: "1.0.0".to_string(),
                to_tag: "1.1.0".to_string(),
                registry: "docker.io".to_string(),
                reason: Default::default(),
                cve_delta: Default::default(),
                status: UpdateStatus::Pending,
                update_kind: tug_common::types::UpdateKind::Tag,
                change_type: None,
                scope_violation: false,
                decision_trace: Vec::new(),
                retry_count: 0,
                max_retries: 3,
                backoff_multiplier: 3,
                next_retry_at: None,
                last_error: None,
                approval: None,
                rejection: None,
                snoozed_until: None,
                version: 1,
                created_at: now,
                updated_at: now,
            })
            .unwrap();
        let rejected = ctx
            .store
            .transition_update(&update.id, 1, UpdateStatus::Rejected, |_| {})
            .unwrap();

        let response = dispatch(
            &ctx,
            Request::SnoozeUpdate {
                id: update.id,
                expected_version: rejected.version,
                until: Utc::now() + chrono::Duration::hours(4),
            },
        )
        .await;
        assert!(matches!(response, Response::Error { .. }));
    }

    #[tokio::test]
    async fn sweep_request_runs_inline() {
        let (_dir, ctx) = context();
        let response = dispatch(&ctx, Request::Sweep).await;
        match response {
            Response::Sweep { report } => {
                assert_eq!(report.applied, 0);
            }
            other => panic!("unexpected response: {other:?}"),
        }
    }
}
