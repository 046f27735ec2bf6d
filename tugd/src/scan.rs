//! Fleet scanning: discovery, decision evaluation, update reconciliation.
//!
//! One scan walks every monitored container: refresh the inventory from the
//! engine, ask the registry what exists, run the decision engine, and
//! reconcile the container's (single) unresolved update row. Each container
//! is one unit of work — errors are isolated per unit and the job checkpoint
//! between units observes cancellation.

use std::sync::Arc;

use chrono::Utc;
use tracing::{debug, info, warn};
use uuid::Uuid;

use tug_common::entities::{Container, CveDelta, DependencyRecord, Update};
use tug_common::errors::StoreError;
use tug_common::policy::decision::{
    self, Decision, EngineSettings, RegistryObservation, TraceEntry, Verdict,
};
use tug_common::types::{UpdateStatus, UpdatePolicy};

use crate::backends::{Clock, ContainerEngine, Registry, VulnReport, VulnerabilityScanner};
use crate::events::EventBus;
use crate::jobs::{JobHandle, Progress};
use crate::metrics;
use crate::store::Store;

/// Everything a scan needs, threaded explicitly.
pub struct ScanContext {
    pub store: Arc<Store>,
    pub engine: Arc<dyn ContainerEngine>,
    pub registry: Arc<dyn Registry>,
    pub scanner: Arc<dyn VulnerabilityScanner>,
    pub clock: Arc<dyn Clock>,
    pub events: EventBus,
    pub settings: EngineSettings,
}

/// Run a fleet check job to completion (or cancellation).
pub async fn run_check_job(handle: JobHandle, ctx: ScanContext) {
    // Inventory refresh first: reality wins over stored state.
    match ctx.engine.list() {
        Ok(found) => {
            for discovered in &found {
                if let Err(err) = ctx.store.upsert_discovered(discovered) {
                    warn!(container = %discovered.name, error = %err, "failed to upsert discovered container");
                }
            }
        }
        Err(err) => {
            warn!(error = %err, "container engine inventory failed");
            let _ = handle.fail(format!("container engine inventory failed: {err}"));
            return;
        }
    }

    let containers = ctx.store.containers();
    if let Err(err) = handle.begin(containers.len() as u64) {
        warn!(error = %err, "check job failed to start");
        return;
    }

    for container in containers {
        let mut progress = Progress {
            processed: 1,
            ..Progress::default()
        };
        match scan_container(&ctx, &container) {
            Ok(found_new) => {
                if found_new {
                    progress.found = 1;
                }
            }
            Err(err) => {
                warn!(container = %container.id, error = %err, "scan unit failed");
                progress.errors = 1;
            }
        }
        match handle.checkpoint(progress) {
            Ok(true) => {}
            Ok(false) => return, // cancelled; partial results intact
            Err(err) => {
                warn!(error = %err, "check job checkpoint failed");
                return;
            }
        }
    }

    metrics::SCANS_TOTAL.inc();
    metrics::PENDING_UPDATES.set(ctx.store.updates(Some(UpdateStatus::Pending)).len() as i64);
    let _ = handle.complete();
}

/// Scan one container: observe the registry, decide, reconcile.
/// Returns whether a new (or retargeted) update proposal was recorded.
fn scan_container(ctx: &ScanContext, container: &Container) -> anyhow::Result<bool> {
    // Registry outage is a per-unit error; the rest of the fleet proceeds.
    let tags = ctx
        .registry
        .list_tags(&container.image)
        .map_err(|err| anyhow::anyhow!("listing tags for {}: {err}", container.image))?;
    let current_tag_digest = match ctx
        .registry
        .digest(&container.image, &container.current_tag)
    {
        Ok(digest) => digest,
        Err(err) => {
            debug!(container = %container.id, error = %err, "digest lookup failed, tag-only scan");
            None
        }
    };

    let observation = RegistryObservation {
        tags,
        current_tag_digest,
    };
    let decision = decision::evaluate(
        container,
        &observation,
        &ctx.settings,
        ctx.clock.now_local(),
    );

    let found_new = reconcile_update(ctx, container, &decision)?;

    // Informational fields are cleared every scan and repopulated from this
    // decision; a stale ignore rule is dropped here as well.
    ctx.store
        .mutate_container(&container.id, container.version, |c| {
            c.latest_major_tag = decision.latest_major_tag.clone();
            c.calver_blocked_tag = decision.calver_blocked_tag.clone();
            if decision.clear_ignore {
                info!(container = %c.id, rule = ?c.ignore, "ignore rule went stale, clearing");
                c.ignore = None;
            }
            Ok(())
        })?;

    Ok(found_new)
}

/// Reconcile the container's single unresolved update row with the decision.
fn reconcile_update(
    ctx: &ScanContext,
    container: &Container,
    decision: &Decision,
) -> Result<bool, StoreError> {
    let existing = ctx.store.unresolved_update_for(&container.id);

    let Some(proposal) = decision.proposal.as_ref() else {
        // Nothing qualifies. A pending row whose moment has passed is
        // resolved in place rather than left dangling: the deployed tag
        // caught up with the target (applied externally) or the candidate
        // vanished from the registry.
        if let Some(row) = existing
            && row.status == UpdateStatus::Pending
        {
            if row.to_tag == container.current_tag {
                ctx.store
                    .transition_update(&row.id, row.version, UpdateStatus::Applied, |u| {
                        u.record_trace(TraceEntry::Reconciled {
                            previous_target: u.to_tag.clone(),
                            new_target: u.from_tag.clone(),
                        });
                    })?;
            } else {
                ctx.store
                    .transition_update(&row.id, row.version, UpdateStatus::Rejected, |u| {
                        u.rejection = Some(tug_common::entities::ActionStamp {
                            actor: "scan".to_string(),
                            at: Utc::now(),
                            reason: Some("candidate no longer qualifies".to_string()),
                        });
                    })?;
            }
        }
        return Ok(false);
    };

    if decision.verdict == Verdict::Disabled {
        return Ok(false);
    }

    let cve_delta = cve_delta_for(
        ctx.scanner.as_ref(),
        &container.image,
        &container.current_tag,
        &proposal.to_tag,
    );
    let reason = decision::classify_reason(proposal.change_type, &cve_delta);

    match existing {
        None => {
            // A rejection sticks for the candidate it named: only a
            // different candidate may open a new row. Ignore rules exist for
            // stronger suppression.
            let rejected_same_target = ctx
                .store
                .updates(Some(UpdateStatus::Rejected))
                .into_iter()
                .find(|u| u.container == container.id)
                .is_some_and(|u| {
                    u.to_tag == proposal.to_tag && u.update_kind == proposal.update_kind
                });
            if rejected_same_target {
                debug!(container = %container.id, candidate = %proposal.to_tag, "candidate was rejected, not re-proposing");
                return Ok(false);
            }
            let now = ctx.clock.now();
            let update = Update {
                id: Uuid::new_v4(),
                container: container.id.clone(),
                from_tag: container.current_tag.clone(),
                to_tag: proposal.to_tag.clone(),
                registry: container.registry.clone(),
                reason,
                cve_delta,
                status: UpdateStatus::Pending,
                update_kind: proposal.update_kind,
                change_type: proposal.change_type,
                scope_violation: proposal.scope_violation,
                decision_trace: decision.trace.clone(),
                retry_count: 0,
                max_retries: ctx.settings.max_retries,
                backoff_multiplier: ctx.settings.backoff_multiplier,
                next_retry_at: None,
                last_error: None,
                approval: None,
                rejection: None,
                snoozed_until: None,
                version: 1,
                created_at: now,
                updated_at: now,
            };
            let inserted = ctx.store.insert_update(update)?;
            metrics::UPDATES_DETECTED_TOTAL.inc();
            ctx.events.emit(
                "update_detected",
                &serde_json::json!({
                    "id": inserted.id,
                    "container": container.id,
                    "from": inserted.from_tag,
                    "to": inserted.to_tag,
                    "kind": inserted.update_kind,
                    "change": inserted.change_type,
                }),
            );
            Ok(true)
        }
        Some(row) if row.to_tag == proposal.to_tag && row.update_kind == proposal.update_kind => {
            // Same target: the row stands, nothing to rewrite.
            Ok(false)
        }
        Some(row) if row.status == UpdateStatus::Pending => {
            // A newer candidate superseded the pending target: rewrite the
            // row in place — never duplicate — resetting retry bookkeeping.
            let previous = row.to_tag.clone();
            ctx.store.mutate_update(&row.id, row.version, |u| {
                u.record_trace(TraceEntry::Reconciled {
                    previous_target: previous.clone(),
                    new_target: proposal.to_tag.clone(),
                });
                u.decision_trace.extend(decision.trace.iter().cloned());
                u.from_tag = container.current_tag.clone();
                u.to_tag = proposal.to_tag.clone();
                u.update_kind = proposal.update_kind;
                u.change_type = proposal.change_type;
                u.scope_violation = proposal.scope_violation;
                u.reason = reason;
                u.cve_delta = cve_delta.clone();
                u.retry_count = 0;
                u.next_retry_at = None;
                u.last_error = None;
                Ok(())
            })?;
            ctx.events.emit(
                "update_reconciled",
                &serde_json::json!({
                    "id": row.id,
                    "container": container.id,
                    "previous": previous,
                    "to": proposal.to_tag,
                }),
            );
            Ok(true)
        }
        // An approved row targets what the operator approved; a newer
        // candidate waits until that row resolves.
        Some(_) => Ok(false),
    }
}

/// CVE delta between the deployed image and the candidate, consumed opaquely
/// from the external scanner. Missing scans yield an empty delta.
fn cve_delta_for(
    scanner: &dyn VulnerabilityScanner,
    image: &str,
    current_tag: &str,
    candidate_tag: &str,
) -> CveDelta {
    let current = scanner
        .scan_result_for(&format!("{image}:{current_tag}"))
        .unwrap_or_default()
        .unwrap_or_default();
    let candidate = scanner
        .scan_result_for(&format!("{image}:{candidate_tag}"))
        .unwrap_or_default();
    let Some(candidate) = candidate else {
        return CveDelta::default();
    };
    let resolved = current
        .cves
        .iter()
        .filter(|cve| !candidate.cves.contains(cve))
        .cloned()
        .collect();
    let introduced = candidate
        .cves
        .iter()
        .filter(|cve| !current.cves.contains(cve))
        .cloned()
        .collect();
    CveDelta {
        resolved,
        introduced,
        critical: candidate.critical,
        high: candidate.high,
        medium: candidate.medium,
        low: candidate.low,
    }
}

/// Run a dependency scan job: refresh per-container dependency records from
/// the external scanner's findings.
pub async fn run_dependency_scan_job(handle: JobHandle, ctx: ScanContext) {
    let containers: Vec<Container> = ctx
        .store
        .containers()
        .into_iter()
        .filter(|c| c.policy != UpdatePolicy::Disabled)
        .collect();
    if let Err(err) = handle.begin(containers.len() as u64) {
        warn!(error = %err, "dependency scan failed to start");
        return;
    }

    for container in containers {
        let mut progress = Progress {
            processed: 1,
            ..Progress::default()
        };
        match ctx.scanner.scan_result_for(&container.image) {
            Ok(Some(report)) => {
                progress.found = report.dependencies.len() as u64;
                if let Err(err) = ingest_report(&ctx.store, &container, &report) {
                    warn!(container = %container.id, error = %err, "failed to record dependencies");
                    progress.errors = 1;
                }
            }
            Ok(None) => {
                debug!(container = %container.id, "scanner has not discovered this image yet");
            }
            Err(err) => {
                warn!(container = %container.id, error = %err, "dependency scan unit failed");
                progress.errors = 1;
            }
        }
        match handle.checkpoint(progress) {
            Ok(true) => {}
            Ok(false) => return,
            Err(err) => {
                warn!(error = %err, "dependency scan checkpoint failed");
                return;
            }
        }
    }
    let _ = handle.complete();
}

/// Record a scan report's dependency findings for a container, preserving
/// operator ignore state and clearing rules that went stale.
pub fn ingest_report(
    store: &Store,
    container: &Container,
    report: &VulnReport,
) -> Result<(), StoreError> {
    for finding in &report.dependencies {
        let mut record = DependencyRecord::new(
            container.id.clone(),
            finding.kind,
            finding.name.clone(),
            finding.current_version.clone(),
        );
        record.ecosystem = finding.ecosystem.clone();
        record.latest_version = finding.latest_version.clone();
        record.severity = finding.severity;
        store.upsert_dependency(record)?;
    }

    // Exact ignores clear when the candidate moves past them; prefix ignores
    // persist until the prefix itself changes.
    for record in store.dependencies_for(&container.id) {
        if let (Some(rule), Some(latest)) = (&record.ignore, &record.latest_version)
            && rule.is_stale(latest)
        {
            store.mutate_dependency(&record.id, record.version, |d| {
                d.ignore = None;
                Ok(())
            })?;
        }
    }
    Ok(())
}
