//! The update orchestrator: turns approved and auto-eligible updates into
//! applied changes, safely.
//!
//! One sweep: collect due updates, order them dependency-first, gate each on
//! its maintenance window, then claim-apply-finalize under the optimistic
//! lock. A version conflict aborts only that update for this sweep; fresh
//! state is re-read next cycle. Transient failures reschedule with backoff,
//! fatal ones fail immediately, and every actual apply attempt lands in
//! history with its backup reference.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Instant;

use chrono::Utc;
use tracing::{debug, info, warn};
use uuid::Uuid;

use tug_common::entities::{Container, PollState, Update, UpdateHistoryEntry};
use tug_common::errors::{ApplyError, ErrorCode};
use tug_common::policy::decision::{CheckOutcome, EngineSettings, TraceEntry};
use tug_common::policy::window::MaintenanceWindow;
use tug_common::protocol::SweepReport;
use tug_common::types::{HistoryStatus, JobKind, UpdateKind, UpdatePolicy, UpdateStatus, WindowMode};

use crate::backends::{Clock, ContainerEngine};
use crate::events::EventBus;
use crate::graph;
use crate::metrics;
use crate::store::Store;

/// Poll budgets stamped onto pending-scan jobs started after an apply.
#[derive(Debug, Clone, Copy)]
pub struct PollBudget {
    pub max_polls: u32,
    pub max_trigger_attempts: u32,
}

/// Everything one sweep needs, threaded explicitly.
pub struct SweepContext {
    pub store: Arc<Store>,
    pub engine: Arc<dyn ContainerEngine>,
    pub clock: Arc<dyn Clock>,
    pub events: EventBus,
    pub settings: EngineSettings,
    pub poll_budget: PollBudget,
}

/// Sweep outcome: the report plus any pending-scan jobs the caller should
/// start polling loops for.
#[derive(Debug, Default)]
pub struct SweepOutcome {
    pub report: SweepReport,
    pub pending_scan_jobs: Vec<Uuid>,
}

/// Run one orchestration sweep.
pub fn sweep(ctx: &SweepContext) -> SweepOutcome {
    let timer = Instant::now();
    let mut outcome = SweepOutcome::default();

    let batch = collect_due(ctx);
    if batch.is_empty() {
        return outcome;
    }
    info!(batch = batch.len(), "orchestration sweep starting");

    let edges: Vec<_> = batch
        .values()
        .map(|(container, _)| (container.id.clone(), container.depends_on.clone()))
        .collect();
    let ordering = graph::order_batch(&edges);

    // Cycles are a fatal ordering error for their members: excluded from the
    // batch, marked failed, never retried. Everyone else proceeds.
    for issue in &ordering.issues {
        warn!(members = ?issue.members, "dependency ordering failed");
    }
    for excluded in &ordering.excluded {
        if let Some((_, update)) = batch.get(excluded) {
            let error = ApplyError::DependencyCycle(
                ordering.excluded.iter().map(|c| c.to_string()).collect(),
            );
            fail_terminal(ctx, update, &error, None);
            outcome.report.failed += 1;
        }
        outcome.report.excluded.push(excluded.clone());
    }

    for id in &ordering.order {
        let Some((container, update)) = batch.get(id) else {
            continue;
        };
        apply_one(ctx, container, update, &mut outcome);
    }

    metrics::SWEEP_DURATION_SECONDS.observe(timer.elapsed().as_secs_f64());
    ctx.events.emit(
        "sweep_completed",
        &serde_json::json!({
            "applied": outcome.report.applied,
            "failed": outcome.report.failed,
            "retried": outcome.report.retried,
            "deferred": outcome.report.deferred,
            "conflicts": outcome.report.conflicts,
        }),
    );
    outcome
}

/// Updates eligible for this sweep: approved rows, plus pending rows under an
/// auto policy, that are past any snooze and retry backoff.
fn collect_due(ctx: &SweepContext) -> BTreeMap<tug_common::types::ContainerId, (Container, Update)> {
    let now = ctx.clock.now();
    let mut batch = BTreeMap::new();
    for update in ctx.store.updates(None) {
        if !update.is_unresolved() {
            continue;
        }
        let Some(container) = ctx.store.get_container(&update.container) else {
            continue;
        };
        if container.policy == UpdatePolicy::Disabled {
            continue;
        }
        let auto = container.policy == UpdatePolicy::Auto;
        if update.is_due(auto, now) {
            batch.insert(container.id.clone(), (container, update));
        }
    }
    batch
}

/// Apply one update through the claim → side effects → finalize sequence.
fn apply_one(ctx: &SweepContext, container: &Container, update: &Update, outcome: &mut SweepOutcome) {
    // Maintenance window re-check at apply time: the sweep may run long
    // after the decision that queued this row.
    let mut window_warn = None;
    if let Some(expr) = &container.maintenance_window {
        match MaintenanceWindow::parse(expr) {
            Err(err) => {
                let error = ApplyError::InvalidWindow {
                    window: expr.clone(),
                    error: err.to_string(),
                };
                fail_terminal(ctx, update, &error, None);
                outcome.report.failed += 1;
                return;
            }
            Ok(window) => {
                let inside = window.contains(ctx.clock.now_local());
                if !inside {
                    match ctx.settings.window_mode {
                        WindowMode::Strict => {
                            debug!(container = %container.id, window = %expr, "outside strict window, deferring");
                            outcome.report.deferred += 1;
                            return;
                        }
                        WindowMode::Advisory => {
                            window_warn = Some(TraceEntry::WindowCheck {
                                window: expr.clone(),
                                mode: WindowMode::Advisory,
                                inside: false,
                                outcome: CheckOutcome::Warn,
                            });
                        }
                    }
                }
            }
        }
    }

    // Claim: bump the version so any actor still holding the old one
    // conflicts. Exactly one of two racing sweeps gets past this point.
    let claimed = match ctx.store.mutate_update(&update.id, update.version, |_| Ok(())) {
        Ok(row) => row,
        Err(err) => {
            debug!(update = %update.id, error = %err, "claim conflict, aborting this update");
            outcome.report.conflicts += 1;
            return;
        }
    };

    let started = Instant::now();
    let backup_path = match ctx.engine.backup(container) {
        Ok(path) => Some(path),
        Err(error) => {
            handle_failure(ctx, &claimed, &error, None, started, outcome);
            return;
        }
    };

    if let Err(error) = ctx.engine.recreate(container, &claimed.to_tag) {
        handle_failure(ctx, &claimed, &error, backup_path, started, outcome);
        return;
    }

    finalize_success(ctx, container, &claimed, backup_path, window_warn, started, outcome);
}

/// Post-recreate bookkeeping: flip the row to applied, move the container's
/// deployed tag forward, write history, start the pending scan.
fn finalize_success(
    ctx: &SweepContext,
    container: &Container,
    claimed: &Update,
    backup_path: Option<String>,
    window_warn: Option<TraceEntry>,
    started: Instant,
    outcome: &mut SweepOutcome,
) {
    let duration_ms = started.elapsed().as_millis() as u64;
    let finalized = ctx.store.transition_update(
        &claimed.id,
        claimed.version,
        UpdateStatus::Applied,
        |u| {
            if let Some(entry) = window_warn {
                u.record_trace(entry);
            }
            u.next_retry_at = None;
            u.last_error = None;
        },
    );
    if let Err(err) = finalized {
        // The recreate already happened; reality wins and the next scan
        // reconciles. Only the row bookkeeping lost the race.
        warn!(update = %claimed.id, error = %err, "finalize conflict after apply");
        outcome.report.conflicts += 1;
    }

    let container_result = ctx
        .store
        .mutate_container(&container.id, container.version, |c| {
            if claimed.update_kind == UpdateKind::Tag {
                c.current_tag = claimed.to_tag.clone();
            }
            // Digest refreshes on the next scan's registry lookup.
            c.current_digest = None;
            Ok(())
        });
    if let Err(err) = container_result {
        warn!(container = %container.id, error = %err, "container row conflict after apply");
    }

    let _ = ctx.store.append_history(UpdateHistoryEntry {
        id: Uuid::new_v4(),
        container: container.id.clone(),
        from_tag: claimed.from_tag.clone(),
        to_tag: claimed.to_tag.clone(),
        status: HistoryStatus::Success,
        duration_ms,
        backup_path: backup_path.clone(),
        data_backup_id: None,
        data_backup_status: None,
        can_rollback: backup_path.is_some(),
        error: None,
        timestamp: Utc::now(),
    });

    metrics::UPDATES_APPLIED_TOTAL.inc();
    ctx.events.emit(
        "update_applied",
        &serde_json::json!({
            "id": claimed.id,
            "container": container.id,
            "from": claimed.from_tag,
            "to": claimed.to_tag,
            "duration_ms": duration_ms,
        }),
    );
    outcome.report.applied += 1;

    // The recreated container needs a fresh dependency scan; the external
    // scanner may take a while to notice it, hence the durable polling job.
    match ctx.store.try_start_job(
        JobKind::PendingScan,
        "orchestrator",
        Some(PollState {
            container: container.id.clone(),
            poll_count: 0,
            max_polls: ctx.poll_budget.max_polls,
            trigger_attempt_count: 0,
            max_trigger_attempts: ctx.poll_budget.max_trigger_attempts,
            last_trigger_attempt_at: None,
        }),
    ) {
        Ok(started) if !started.already_running => {
            outcome.pending_scan_jobs.push(started.job.id);
        }
        Ok(_) => {
            debug!(container = %container.id, "pending scan already in flight");
        }
        Err(err) => {
            warn!(container = %container.id, error = %err, "failed to start pending scan");
        }
    }
}

/// Route a failed attempt: transient failures under budget reschedule with
/// `multiplier^retry_count` seconds of backoff; everything else is terminal.
fn handle_failure(
    ctx: &SweepContext,
    claimed: &Update,
    error: &ApplyError,
    backup_path: Option<String>,
    started: Instant,
    outcome: &mut SweepOutcome,
) {
    let now = ctx.clock.now();
    match crate::retry::disposition(claimed, error, now) {
        crate::retry::FailureDisposition::Retry { next_retry_at } => {
            info!(
                update = %claimed.id,
                attempt = claimed.retry_count + 1,
                next_retry_at = %next_retry_at,
                error = %error,
                "transient apply failure, backing off"
            );
            let result = ctx.store.mutate_update(&claimed.id, claimed.version, |u| {
                u.retry_count += 1;
                u.next_retry_at = Some(next_retry_at);
                u.last_error = Some(error.to_string());
                Ok(())
            });
            if result.is_err() {
                outcome.report.conflicts += 1;
            } else {
                outcome.report.retried += 1;
            }
            record_failed_attempt(ctx, claimed, error, backup_path, started, false);
        }
        crate::retry::FailureDisposition::GiveUp => {
            let rolled_back = fail_terminal(ctx, claimed, error, backup_path.clone());
            record_failed_attempt(ctx, claimed, error, backup_path, started, rolled_back);
            outcome.report.failed += 1;
        }
    }
}

/// Mark an update terminally failed, rolling back when a consistent backup
/// exists. Returns whether a rollback was performed.
fn fail_terminal(
    ctx: &SweepContext,
    update: &Update,
    error: &ApplyError,
    backup_path: Option<String>,
) -> bool {
    let code = if error.is_transient() {
        ErrorCode::ApplyRetriesExhausted
    } else {
        match error {
            ApplyError::DependencyCycle(_) => ErrorCode::OrderingCycle,
            ApplyError::InvalidWindow { .. } => ErrorCode::ConfigInvalidWindow,
            _ => ErrorCode::EngineRecreateFailed,
        }
    };
    let result = ctx
        .store
        .transition_update(&update.id, update.version, UpdateStatus::Failed, |u| {
            u.last_error = Some(format!("{}: {error}", code.code_string()));
            u.next_retry_at = None;
        });
    match result {
        Ok(_) => {
            metrics::UPDATES_FAILED_TOTAL.inc();
            ctx.events.emit(
                "update_failed",
                &serde_json::json!({
                    "id": update.id,
                    "container": update.container,
                    "error": error.to_string(),
                }),
            );
            // Roll back if a consistent backup exists; the restore mechanics
            // belong to the engine.
            if let Some(path) = backup_path
                && let Some(container) = ctx.store.get_container(&update.container)
            {
                match ctx.engine.restore(&container, &path) {
                    Ok(()) => {
                        metrics::ROLLBACKS_TOTAL.inc();
                        info!(container = %container.id, backup = %path, "rolled back after failed apply");
                        return true;
                    }
                    Err(err) => {
                        warn!(container = %container.id, error = %err, "rollback failed");
                    }
                }
            }
            false
        }
        Err(err) => {
            warn!(update = %update.id, error = %err, "failed to mark update failed");
            false
        }
    }
}

/// Every actual apply attempt is recorded in history, including transient
/// ones that will retry.
fn record_failed_attempt(
    ctx: &SweepContext,
    claimed: &Update,
    error: &ApplyError,
    backup_path: Option<String>,
    started: Instant,
    rolled_back: bool,
) {
    let status = if rolled_back && backup_path.is_some() {
        HistoryStatus::RolledBack
    } else {
        HistoryStatus::Failed
    };
    let _ = ctx.store.append_history(UpdateHistoryEntry {
        id: Uuid::new_v4(),
        container: claimed.container.clone(),
        from_tag: claimed.from_tag.clone(),
        to_tag: claimed.to_tag.clone(),
        status,
        duration_ms: started.elapsed().as_millis() as u64,
        backup_path: backup_path.clone(),
        data_backup_id: None,
        data_backup_status: None,
        can_rollback: backup_path.is_some(),
        error: Some(error.to_string()),
        timestamp: Utc::now(),
    });
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backends::{DiscoveredContainer, ManualClock, MockContainerEngine};
    use std::path::PathBuf;
    use tug_common::types::{ChangeType, ContainerId};

    struct Fixture {
        _dir: tempfile::TempDir,
        store: Arc<Store>,
        engine: Arc<MockContainerEngine>,
        clock: Arc<ManualClock>,
    }

    impl Fixture {
        fn ctx(&self) -> SweepContext {
            self.ctx_with(EngineSettings::default())
        }

        fn ctx_with(&self, settings: EngineSettings) -> SweepContext {
            SweepContext {
                store: self.store.clone(),
                engine: self.engine.clone(),
                clock: self.clock.clone(),
                events: EventBus::new(8),
                settings,
                poll_budget: PollBudget {
                    max_polls: 5,
                    max_trigger_attempts: 3,
                },
            }
        }
    }

    fn fixture() -> Fixture {
        let dir = tempfile::tempdir().unwrap();
        Fixture {
            store: Arc::new(Store::open(dir.path()).unwrap()),
            engine: Arc::new(MockContainerEngine::default()),
            clock: Arc::new(ManualClock::at(Utc::now())),
            _dir: dir,
        }
    }

    fn seed_container(
        fixture: &Fixture,
        name: &str,
        policy: UpdatePolicy,
        depends_on: &[&str],
    ) -> Container {
        let container = fixture
            .store
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
        fixture
            .store
            .mutate_container(&container.id, container.version, |c| {
                c.policy = policy;
                c.depends_on = depends_on.iter().map(|d| ContainerId::new(*d)).collect();
                Ok(())
            })
            .unwrap()
    }

    fn seed_update(fixture: &Fixture, container: &str, to_tag: &str) -> Update {
        let now = fixture.clock.now();
        fixture
            .store
            .insert_update(Update {
                id: Uuid::new_v4(),
                container: ContainerId::new(container),
                from_tag: "1.0.0".to_string(),
                to_tag: to_tag.to_string(),
                registry: "docker.io".to_string(),
                reason: Default::default(),
                cve_delta: Default::default(),
                status: UpdateStatus::Pending,
                update_kind: UpdateKind::Tag,
                change_type: Some(ChangeType::Minor),
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
            .unwrap()
    }

    #[test]
    fn auto_update_applies_and_records_history() {
        let fixture = fixture();
        seed_container(&fixture, "app", UpdatePolicy::Auto, &[]);
        let update = seed_update(&fixture, "app", "1.1.0");

        let outcome = sweep(&fixture.ctx());
        assert_eq!(outcome.report.applied, 1);

        let row = fixture.store.get_update(&update.id).unwrap();
        assert_eq!(row.status, UpdateStatus::Applied);

        let container = fixture
            .store
            .get_container(&ContainerId::new("app"))
            .unwrap();
        assert_eq!(container.current_tag, "1.1.0");

        let history = fixture.store.history(None, 10);
        assert_eq!(history.len(), 1);
        assert_eq!(history[0].status, HistoryStatus::Success);
        assert!(history[0].can_rollback);
        assert!(history[0].backup_path.is_some());

        // A pending scan was started for the recreated container.
        assert_eq!(outcome.pending_scan_jobs.len(), 1);
    }

    #[test]
    fn monitor_pending_updates_are_not_applied() {
        let fixture = fixture();
        seed_container(&fixture, "app", UpdatePolicy::Monitor, &[]);
        seed_update(&fixture, "app", "1.1.0");

        let outcome = sweep(&fixture.ctx());
        assert_eq!(outcome.report.applied, 0);
        assert!(fixture.engine.recreated().is_empty());
    }

    #[test]
    fn approved_monitor_update_applies() {
        let fixture = fixture();
        seed_container(&fixture, "app", UpdatePolicy::Monitor, &[]);
        let update = seed_update(&fixture, "app", "1.1.0");
        fixture
            .store
            .transition_update(&update.id, update.version, UpdateStatus::Approved, |u| {
                u.approval = Some(tug_common::entities::ActionStamp {
                    actor: "ops".to_string(),
                    at: Utc::now(),
                    reason: None,
                });
            })
            .unwrap();

        let outcome = sweep(&fixture.ctx());
        assert_eq!(outcome.report.applied, 1);
    }

    #[test]
    fn dependencies_apply_strictly_before_dependents() {
        let fixture = fixture();
        seed_container(&fixture, "db", UpdatePolicy::Auto, &[]);
        seed_container(&fixture, "app", UpdatePolicy::Auto, &["db"]);
        seed_update(&fixture, "app", "1.1.0");
        seed_update(&fixture, "db", "1.1.0");

        let outcome = sweep(&fixture.ctx());
        assert_eq!(outcome.report.applied, 2);

        let order: Vec<String> = fixture
            .engine
            .recreated()
            .into_iter()
            .map(|(id, _)| id.to_string())
            .collect();
        assert_eq!(order, vec!["db".to_string(), "app".to_string()]);
    }

    #[test]
    fn cycle_members_fail_while_independents_apply() {
        let fixture = fixture();
        seed_container(&fixture, "a", UpdatePolicy::Auto, &["b"]);
        seed_container(&fixture, "b", UpdatePolicy::Auto, &["a"]);
        seed_container(&fixture, "c", UpdatePolicy::Auto, &[]);
        let ua = seed_update(&fixture, "a", "1.1.0");
        let ub = seed_update(&fixture, "b", "1.1.0");
        seed_update(&fixture, "c", "1.1.0");

        let outcome = sweep(&fixture.ctx());
        assert_eq!(outcome.report.applied, 1);
        assert_eq!(outcome.report.failed, 2);
        assert_eq!(outcome.report.excluded.len(), 2);

        for id in [ua.id, ub.id] {
            let row = fixture.store.get_update(&id).unwrap();
            assert_eq!(row.status, UpdateStatus::Failed);
            let err = row.last_error.unwrap();
            assert!(err.contains("TUG-E301"), "error: {err}");
            assert!(err.contains("cycle"));
        }
    }

    #[test]
    fn strict_window_defers_without_mutating_the_row() {
        let fixture = fixture();
        let container = seed_container(&fixture, "app", UpdatePolicy::Auto, &[]);
        fixture
            .store
            .mutate_container(&container.id, container.version, |c| {
                c.maintenance_window = Some("daily 22:00-06:00".to_string());
                Ok(())
            })
            .unwrap();
        let update = seed_update(&fixture, "app", "1.1.0");

        // Pin the clock to 10:00, well outside the window.
        let ten_am = chrono::NaiveDate::from_ymd_opt(2026, 8, 3)
            .unwrap()
            .and_hms_opt(10, 0, 0)
            .unwrap()
            .and_utc();
        fixture.clock.set(ten_am);

        let settings = EngineSettings {
            window_mode: WindowMode::Strict,
            ..EngineSettings::default()
        };
        let outcome = sweep(&fixture.ctx_with(settings));
        assert_eq!(outcome.report.deferred, 1);
        assert_eq!(outcome.report.applied, 0);

        let row = fixture.store.get_update(&update.id).unwrap();
        assert_eq!(row.status, UpdateStatus::Pending);
        assert_eq!(row.version, update.version, "deferral does not touch the row");
    }

    #[test]
    fn advisory_window_applies_with_a_trace_warning() {
        let fixture = fixture();
        let container = seed_container(&fixture, "app", UpdatePolicy::Auto, &[]);
        fixture
            .store
            .mutate_container(&container.id, container.version, |c| {
                c.maintenance_window = Some("daily 22:00-06:00".to_string());
                Ok(())
            })
            .unwrap();
        let update = seed_update(&fixture, "app", "1.1.0");

        let ten_am = chrono::NaiveDate::from_ymd_opt(2026, 8, 3)
            .unwrap()
            .and_hms_opt(10, 0, 0)
            .unwrap()
            .and_utc();
        fixture.clock.set(ten_am);

        let outcome = sweep(&fixture.ctx());
        assert_eq!(outcome.report.applied, 1);

        let row = fixture.store.get_update(&update.id).unwrap();
        assert_eq!(row.status, UpdateStatus::Applied);
        assert!(row.decision_trace.iter().any(|e| matches!(
            e,
            TraceEntry::WindowCheck {
                outcome: CheckOutcome::Warn,
                inside: false,
                ..
            }
        )));
    }

    #[test]
    fn invalid_window_expression_fails_fatally() {
        let fixture = fixture();
        let container = seed_container(&fixture, "app", UpdatePolicy::Auto, &[]);
        fixture
            .store
            .mutate_container(&container.id, container.version, |c| {
                c.maintenance_window = Some("sometimes".to_string());
                Ok(())
            })
            .unwrap();
        let update = seed_update(&fixture, "app", "1.1.0");

        let outcome = sweep(&fixture.ctx());
        assert_eq!(outcome.report.failed, 1);
        let row = fixture.store.get_update(&update.id).unwrap();
        assert_eq!(row.status, UpdateStatus::Failed);
        assert_eq!(row.retry_count, 0, "fatal failures consume no retries");
    }

    #[test]
    fn transient_failures_back_off_three_nine_twenty_seven_then_fail() {
        let fixture = fixture();
        seed_container(&fixture, "app", UpdatePolicy::Auto, &[]);
        let update = seed_update(&fixture, "app", "1.1.0");
        let start = fixture.clock.now();

        for (attempt, expected_secs) in [(1u32, 3i64), (2, 9), (3, 27)] {
            fixture
                .engine
                .push_recreate_result(Err(ApplyError::Engine("pull failed".to_string())));
            let outcome = sweep(&fixture.ctx());
            assert_eq!(outcome.report.retried, 1, "attempt {attempt}");

            let row = fixture.store.get_update(&update.id).unwrap();
            assert_eq!(row.status, UpdateStatus::Pending);
            assert_eq!(row.retry_count, attempt);
            let expected_at = fixture.clock.now() + chrono::Duration::seconds(expected_secs);
            assert_eq!(row.next_retry_at, Some(expected_at));

            // Before the backoff expires the row is not due.
            let premature = sweep(&fixture.ctx());
            assert_eq!(premature.report.retried + premature.report.applied, 0);

            fixture
                .clock
                .advance(chrono::Duration::seconds(expected_secs + 1));
        }

        // Fourth failure exceeds max_retries=3: terminal.
        fixture
            .engine
            .push_recreate_result(Err(ApplyError::Engine("pull failed".to_string())));
        let outcome = sweep(&fixture.ctx());
        assert_eq!(outcome.report.failed, 1);
        let row = fixture.store.get_update(&update.id).unwrap();
        assert_eq!(row.status, UpdateStatus::Failed);
        assert!(row.last_error.unwrap().contains("TUG-E300"));

        // Nothing further happens on later sweeps.
        fixture.clock.advance(chrono::Duration::hours(1));
        let quiet = sweep(&fixture.ctx());
        assert_eq!(
            quiet.report.applied + quiet.report.failed + quiet.report.retried,
            0
        );
        assert!(start < fixture.clock.now());

        // Every attempt left an audit row; the terminal one rolled back.
        let history = fixture.store.history(None, 10);
        assert_eq!(history.len(), 4);
        assert!(!fixture.engine.restored().is_empty());
    }

    #[test]
    fn snoozed_update_waits_out_its_snooze() {
        let fixture = fixture();
        seed_container(&fixture, "app", UpdatePolicy::Auto, &[]);
        let update = seed_update(&fixture, "app", "1.1.0");
        let until = fixture.clock.now() + chrono::Duration::hours(2);
        fixture
            .store
            .mutate_update(&update.id, update.version, |u| {
                u.snoozed_until = Some(until);
                Ok(())
            })
            .unwrap();

        let outcome = sweep(&fixture.ctx());
        assert_eq!(outcome.report.applied, 0);

        fixture.clock.advance(chrono::Duration::hours(3));
        let outcome = sweep(&fixture.ctx());
        assert_eq!(outcome.report.applied, 1);
    }

    #[test]
    fn digest_update_keeps_the_tag_and_clears_the_digest() {
        let fixture = fixture();
        let container = seed_container(&fixture, "app", UpdatePolicy::Auto, &[]);
        fixture
            .store
            .mutate_container(&container.id, container.version, |c| {
                c.current_digest = Some("sha256:aaa".to_string());
                Ok(())
            })
            .unwrap();
        let now = fixture.clock.now();
        fixture
            .store
            .insert_update(Update {
                id: Uuid::new_v4(),
                container: ContainerId::new("app"),
                from_tag: "1.0.0".to_string(),
                to_tag: "1.0.0".to_string(),
                registry: "docker.io".to_string(),
                reason: Default::default(),
                cve_delta: Default::default(),
                status: UpdateStatus::Pending,
                update_kind: UpdateKind::Digest,
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

        let outcome = sweep(&fixture.ctx());
        assert_eq!(outcome.report.applied, 1);
        let fresh = fixture
            .store
            .get_container(&ContainerId::new("app"))
            .unwrap();
        assert_eq!(fresh.current_tag, "1.0.0");
        assert!(fresh.current_digest.is_none(), "digest refreshes next scan");
    }
}
