//! Persistent entity store.
//!
//! In-memory maps guarded by an `RwLock`, mirrored to disk on every mutation:
//! entity state as one atomically-replaced JSON snapshot, apply history as an
//! append-only JSONL file. This is the single funnel for the optimistic-lock
//! discipline — every versioned mutation goes through a compare-and-swap on
//! the row's `version` counter.

use std::collections::BTreeMap;
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::RwLock;

use chrono::Utc;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};
use uuid::Uuid;

use tug_common::entities::{Container, DependencyRecord, Job, PollState, Update, UpdateHistoryEntry};
use tug_common::errors::{ErrorCode, StoreError};
use tug_common::types::{ContainerId, HistoryStatus, JobKind, JobStatus, UpdateStatus};

use crate::backends::DiscoveredContainer;

const STATE_FILE: &str = "state.json";
const HISTORY_FILE: &str = "history.jsonl";

/// Maximum history entries kept in memory; the JSONL file keeps everything.
const HISTORY_MEMORY_CAP: usize = 1000;

#[derive(Debug, Default, Serialize, Deserialize)]
struct State {
    #[serde(default)]
    containers: BTreeMap<ContainerId, Container>,
    #[serde(default)]
    updates: BTreeMap<Uuid, Update>,
    #[serde(default)]
    jobs: BTreeMap<Uuid, Job>,
    #[serde(default)]
    dependencies: BTreeMap<Uuid, DependencyRecord>,
}

/// Outcome of a job-start attempt.
#[derive(Debug, Clone)]
pub struct StartJobOutcome {
    pub job: Job,
    /// True when an existing queued/running job was returned instead of a
    /// new row being created.
    pub already_running: bool,
}

/// Thread-safe persistent store for all engine entities.
pub struct Store {
    state: RwLock<State>,
    history: RwLock<Vec<UpdateHistoryEntry>>,
    data_dir: PathBuf,
}

impl Store {
    /// Open (or create) the store under `data_dir`, recovering any jobs left
    /// non-terminal by a previous process as `failed`.
    pub fn open(data_dir: &Path) -> Result<Self, StoreError> {
        fs::create_dir_all(data_dir)?;
        let state_path = data_dir.join(STATE_FILE);
        let mut state = if state_path.exists() {
            let raw = fs::read_to_string(&state_path)?;
            serde_json::from_str(&raw)?
        } else {
            debug!(path = %state_path.display(), "no existing state, starting empty");
            State::default()
        };

        let orphaned = recover_orphaned_jobs(&mut state);
        let history = load_history(&data_dir.join(HISTORY_FILE));

        let store = Self {
            state: RwLock::new(state),
            history: RwLock::new(history),
            data_dir: data_dir.to_path_buf(),
        };
        if orphaned > 0 {
            info!(orphaned, "recovered orphaned jobs as failed");
            store.persist_locked(&store.read_state())?;
        }
        Ok(store)
    }

    fn read_state(&self) -> std::sync::RwLockReadGuard<'_, State> {
        self.state.read().unwrap_or_else(|e| e.into_inner())
    }

    fn write_state(&self) -> std::sync::RwLockWriteGuard<'_, State> {
        self.state.write().unwrap_or_else(|e| e.into_inner())
    }

    fn persist_locked(&self, state: &State) -> Result<(), StoreError> {
        let path = self.data_dir.join(STATE_FILE);
        let bytes = serde_json::to_vec_pretty(state)?;
        write_atomic(&path, &bytes)?;
        Ok(())
    }

    // ── Containers ───────────────────────────────────────────────────────

    pub fn containers(&self) -> Vec<Container> {
        self.read_state().containers.values().cloned().collect()
    }

    pub fn get_container(&self, id: &ContainerId) -> Option<Container> {
        self.read_state().containers.get(id).cloned()
    }

    /// Reconcile a discovered container into the store. New containers are
    /// registered with default policy; known ones get their deployed
    /// tag/digest refreshed — observed reality wins over stale state.
    pub fn upsert_discovered(&self, found: &DiscoveredContainer) -> Result<Container, StoreError> {
        let mut state = self.write_state();
        let container = match state.containers.get_mut(&found.name) {
            Some(existing) => {
                if existing.current_tag != found.tag || existing.current_digest != found.digest {
                    existing.current_tag = found.tag.clone();
                    existing.current_digest = found.digest.clone();
                    existing.version += 1;
                    existing.updated_at = Utc::now();
                }
                existing.image = found.image.clone();
                existing.compose_file = found.compose_file.clone();
                existing.clone()
            }
            None => {
                let mut container = Container::new(
                    found.name.clone(),
                    found.compose_file.clone(),
                    found.service.clone(),
                    found.project.clone(),
                    found.image.clone(),
                    found.registry.clone(),
                    found.tag.clone(),
                );
                container.current_digest = found.digest.clone();
                info!(container = %container.id, image = %container.image, "registered new container");
                state
                    .containers
                    .insert(found.name.clone(), container.clone());
                container
            }
        };
        self.persist_locked(&state)?;
        Ok(container)
    }

    /// Containers that declare a dependency on `id` (the reverse of
    /// `depends_on`, derived rather than stored).
    pub fn dependents_of(&self, id: &ContainerId) -> Vec<ContainerId> {
        self.read_state()
            .containers
            .values()
            .filter(|c| c.depends_on.contains(id))
            .map(|c| c.id.clone())
            .collect()
    }

    /// Versioned compare-and-swap mutation of a container row.
    pub fn mutate_container<F>(
        &self,
        id: &ContainerId,
        expected_version: u64,
        mutate: F,
    ) -> Result<Container, StoreError>
    where
        F: FnOnce(&mut Container) -> Result<(), StoreError>,
    {
        let mut state = self.write_state();
        let row = state
            .containers
            .get_mut(id)
            .ok_or_else(|| StoreError::NotFound {
                entity: "container",
                id: id.to_string(),
            })?;
        if row.version != expected_version {
            return Err(StoreError::VersionConflict {
                entity: "container",
                id: id.to_string(),
                expected: expected_version,
                found: row.version,
            });
        }
        mutate(row)?;
        row.version += 1;
        row.updated_at = Utc::now();
        let fresh = row.clone();
        self.persist_locked(&state)?;
        Ok(fresh)
    }

    // ── Updates ──────────────────────────────────────────────────────────

    pub fn updates(&self, status: Option<UpdateStatus>) -> Vec<Update> {
        let state = self.read_state();
        let mut rows: Vec<Update> = state
            .updates
            .values()
            .filter(|u| status.is_none_or(|s| u.status == s))
            .cloned()
            .collect();
        rows.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        rows
    }

    pub fn get_update(&self, id: &Uuid) -> Option<Update> {
        self.read_state().updates.get(id).cloned()
    }

    /// The single unresolved row for a container, if any.
    pub fn unresolved_update_for(&self, container: &ContainerId) -> Option<Update> {
        self.read_state()
            .updates
            .values()
            .find(|u| &u.container == container && u.is_unresolved())
            .cloned()
    }

    /// Insert a freshly detected update. Enforces the one-unresolved-row
    /// invariant: scans must reconcile instead of inserting a duplicate.
    pub fn insert_update(&self, update: Update) -> Result<Update, StoreError> {
        let mut state = self.write_state();
        if let Some(existing) = state
            .updates
            .values()
            .find(|u| u.container == update.container && u.is_unresolved())
        {
            return Err(StoreError::InvalidTransition {
                entity: "update",
                id: existing.id.to_string(),
                from: existing.status.to_string(),
                to: "duplicate pending".to_string(),
            });
        }
        state.updates.insert(update.id, update.clone());
        self.persist_locked(&state)?;
        Ok(update)
    }

    /// Versioned compare-and-swap mutation of an update row.
    ///
    /// This is the core defense against two schedulers (or a scheduler and
    /// an operator) racing on approve/apply: the row is written back only if
    /// `version` still matches what the caller observed.
    pub fn mutate_update<F>(
        &self,
        id: &Uuid,
        expected_version: u64,
        mutate: F,
    ) -> Result<Update, StoreError>
    where
        F: FnOnce(&mut Update) -> Result<(), StoreError>,
    {
        let mut state = self.write_state();
        let row = state.updates.get_mut(id).ok_or_else(|| StoreError::NotFound {
            entity: "update",
            id: id.to_string(),
        })?;
        if row.version != expected_version {
            crate::metrics::VERSION_CONFLICTS_TOTAL.inc();
            return Err(StoreError::VersionConflict {
                entity: "update",
                id: id.to_string(),
                expected: expected_version,
                found: row.version,
            });
        }
        mutate(row)?;
        row.version += 1;
        row.updated_at = Utc::now();
        let fresh = row.clone();
        self.persist_locked(&state)?;
        Ok(fresh)
    }

    /// Guarded status transition helper for operator actions.
    pub fn transition_update(
        &self,
        id: &Uuid,
        expected_version: u64,
        to: UpdateStatus,
        apply: impl FnOnce(&mut Update),
    ) -> Result<Update, StoreError> {
        self.mutate_update(id, expected_version, |row| {
            if !row.can_transition_to(to) {
                return Err(StoreError::InvalidTransition {
                    entity: "update",
                    id: id.to_string(),
                    from: row.status.to_string(),
                    to: to.to_string(),
                });
            }
            row.status = to;
            apply(row);
            Ok(())
        })
    }

    // ── Jobs ─────────────────────────────────────────────────────────────

    pub fn jobs(&self) -> Vec<Job> {
        let state = self.read_state();
        let mut rows: Vec<Job> = state.jobs.values().cloned().collect();
        rows.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        rows
    }

    pub fn get_job(&self, id: &Uuid) -> Option<Job> {
        self.read_state().jobs.get(id).cloned()
    }

    /// Start a job of `kind` unless one is already queued or running.
    ///
    /// The check and the insert happen under one write lock — a single
    /// persisted check-and-set, so two schedulers cannot both start one.
    pub fn try_start_job(
        &self,
        kind: JobKind,
        triggered_by: &str,
        poll: Option<PollState>,
    ) -> Result<StartJobOutcome, StoreError> {
        let mut state = self.write_state();
        if let Some(existing) = state
            .jobs
            .values()
            .find(|j| j.kind == kind && !j.status.is_terminal())
        {
            debug!(kind = %kind, id = %existing.id, "job already running");
            return Ok(StartJobOutcome {
                job: existing.clone(),
                already_running: true,
            });
        }
        let mut job = Job::new(kind, triggered_by);
        job.poll = poll;
        state.jobs.insert(job.id, job.clone());
        self.persist_locked(&state)?;
        Ok(StartJobOutcome {
            job,
            already_running: false,
        })
    }

    /// Read-modify-write a job row under the store lock, bumping its version.
    /// Cancellation flags and runner checkpoints both come through here, so
    /// they serialize cleanly.
    pub fn mutate_job<F>(&self, id: &Uuid, mutate: F) -> Result<Job, StoreError>
    where
        F: FnOnce(&mut Job) -> Result<(), StoreError>,
    {
        let mut state = self.write_state();
        let row = state.jobs.get_mut(id).ok_or_else(|| StoreError::NotFound {
            entity: "job",
            id: id.to_string(),
        })?;
        mutate(row)?;
        row.version += 1;
        let fresh = row.clone();
        self.persist_locked(&state)?;
        Ok(fresh)
    }

    // ── History ──────────────────────────────────────────────────────────

    pub fn history(&self, container: Option<&ContainerId>, limit: usize) -> Vec<UpdateHistoryEntry> {
        let history = self.history.read().unwrap_or_else(|e| e.into_inner());
        let mut rows: Vec<UpdateHistoryEntry> = history
            .iter()
            .filter(|h| container.is_none_or(|c| &h.container == c))
            .cloned()
            .collect();
        rows.sort_by(|a, b| b.timestamp.cmp(&a.timestamp));
        rows.truncate(limit);
        rows
    }

    /// Append an apply attempt to history (memory ring + JSONL file).
    pub fn append_history(&self, entry: UpdateHistoryEntry) -> Result<(), StoreError> {
        {
            let mut history = self.history.write().unwrap_or_else(|e| e.into_inner());
            if history.len() >= HISTORY_MEMORY_CAP {
                history.remove(0);
            }
            history.push(entry.clone());
        }
        let path = self.data_dir.join(HISTORY_FILE);
        let mut file = fs::OpenOptions::new().create(true).append(true).open(&path)?;
        writeln!(file, "{}", serde_json::to_string(&entry)?)?;
        Ok(())
    }

    /// Flip the rollback marker on a history row — the only mutation history
    /// permits. The JSONL file records it as a fresh rolled-back entry.
    pub fn mark_history_rolled_back(&self, id: &Uuid) -> Result<(), StoreError> {
        let entry = {
            let mut history = self.history.write().unwrap_or_else(|e| e.into_inner());
            let row = history
                .iter_mut()
                .find(|h| &h.id == id)
                .ok_or_else(|| StoreError::NotFound {
                    entity: "history",
                    id: id.to_string(),
                })?;
            row.status = HistoryStatus::RolledBack;
            row.clone()
        };
        let path = self.data_dir.join(HISTORY_FILE);
        let mut file = fs::OpenOptions::new().create(true).append(true).open(&path)?;
        writeln!(file, "{}", serde_json::to_string(&entry)?)?;
        Ok(())
    }

    // ── Dependency records ───────────────────────────────────────────────

    pub fn dependencies_for(&self, container: &ContainerId) -> Vec<DependencyRecord> {
        self.read_state()
            .dependencies
            .values()
            .filter(|d| &d.container == container)
            .cloned()
            .collect()
    }

    /// Insert or refresh a dependency record, matching on
    /// (container, kind, name). Ignore state on existing rows is preserved.
    pub fn upsert_dependency(&self, record: DependencyRecord) -> Result<DependencyRecord, StoreError> {
        let mut state = self.write_state();
        let existing = state
            .dependencies
            .values_mut()
            .find(|d| {
                d.container == record.container && d.kind == record.kind && d.name == record.name
            });
        let fresh = match existing {
            Some(row) => {
                row.current_version = record.current_version;
                row.latest_version = record.latest_version;
                row.severity = record.severity;
                row.ecosystem = record.ecosystem;
                row.version += 1;
                row.updated_at = Utc::now();
                row.clone()
            }
            None => {
                state.dependencies.insert(record.id, record.clone());
                record
            }
        };
        self.persist_locked(&state)?;
        Ok(fresh)
    }

    /// Versioned compare-and-swap mutation of a dependency record.
    pub fn mutate_dependency<F>(
        &self,
        id: &Uuid,
        expected_version: u64,
        mutate: F,
    ) -> Result<DependencyRecord, StoreError>
    where
        F: FnOnce(&mut DependencyRecord) -> Result<(), StoreError>,
    {
        let mut state = self.write_state();
        let row = state
            .dependencies
            .get_mut(id)
            .ok_or_else(|| StoreError::NotFound {
                entity: "dependency",
                id: id.to_string(),
            })?;
        if row.version != expected_version {
            return Err(StoreError::VersionConflict {
                entity: "dependency",
                id: id.to_string(),
                expected: expected_version,
                found: row.version,
            });
        }
        mutate(row)?;
        row.version += 1;
        row.updated_at = Utc::now();
        let fresh = row.clone();
        self.persist_locked(&state)?;
        Ok(fresh)
    }
}

/// Any job left non-terminal by a previous process is orphaned: nothing will
/// resume it, so it transitions to failed with a catalog-coded message.
fn recover_orphaned_jobs(state: &mut State) -> usize {
    let mut orphaned = 0;
    for job in state.jobs.values_mut() {
        if matches!(job.status, JobStatus::Running | JobStatus::Queued) {
            warn!(id = %job.id, kind = %job.kind, status = %job.status, "orphaning job from previous run");
            job.mark_failed(format!(
                "{}: daemon restarted while job was {}",
                ErrorCode::JobOrphaned.code_string(),
                job.status
            ));
            job.version += 1;
            orphaned += 1;
        }
    }
    orphaned
}

fn load_history(path: &Path) -> Vec<UpdateHistoryEntry> {
    let Ok(content) = fs::read_to_string(path) else {
        return Vec::new();
    };
    let mut entries: Vec<UpdateHistoryEntry> = content
        .lines()
        .filter_map(|line| serde_json::from_str(line).ok())
        .collect();
    // Rolled-back markers are appended as duplicate ids; keep the last word.
    entries.reverse();
    let mut seen = std::collections::HashSet::new();
    entries.retain(|e| seen.insert(e.id));
    entries.reverse();
    if entries.len() > HISTORY_MEMORY_CAP {
        let skip = entries.len() - HISTORY_MEMORY_CAP;
        entries.drain(..skip);
    }
    entries
}

fn write_atomic(path: &Path, bytes: &[u8]) -> std::io::Result<()> {
    let tmp = path.with_extension("tmp");
    fs::write(&tmp, bytes)?;
    fs::rename(&tmp, path)
}
