//! Collaborator capabilities consumed by the engine.
//!
//! The container engine, image registry, and vulnerability scanner are
//! external systems; the engine only sees these traits. Every call must be
//! bounded by the implementation — an expired deadline surfaces as
//! `ApplyError::Timeout`, which the orchestrator treats as transient.
//!
//! The mock implementations are deterministic and scripted (FIFO failure
//! injection, recorded calls) so engine behavior can be tested end to end
//! without a container runtime.

use std::collections::{HashMap, VecDeque};
use std::path::PathBuf;
use std::sync::Mutex;

use chrono::{DateTime, NaiveDateTime, Utc};

use tug_common::entities::Container;
use tug_common::errors::ApplyError;
use tug_common::types::{ContainerId, DependencyKind, Severity};

/// Injectable clock, so window and backoff behavior is deterministic in tests.
pub trait Clock: Send + Sync {
    /// Current instant in UTC, used for retry scheduling and timestamps.
    fn now(&self) -> DateTime<Utc>;
    /// Operator wall-clock time, used for maintenance-window checks.
    fn now_local(&self) -> NaiveDateTime;
}

/// System clock: UTC for bookkeeping, local time for windows.
#[derive(Debug, Clone, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }

    fn now_local(&self) -> NaiveDateTime {
        chrono::Local::now().naive_local()
    }
}

/// Manually advanced clock for tests.
#[derive(Debug)]
pub struct ManualClock {
    now: Mutex<DateTime<Utc>>,
}

impl ManualClock {
    pub fn at(now: DateTime<Utc>) -> Self {
        Self {
            now: Mutex::new(now),
        }
    }

    pub fn advance(&self, delta: chrono::Duration) {
        let mut guard = self.now.lock().expect("clock mutex poisoned");
        *guard = *guard + delta;
    }

    pub fn set(&self, now: DateTime<Utc>) {
        *self.now.lock().expect("clock mutex poisoned") = now;
    }
}

impl Clock for ManualClock {
    fn now(&self) -> DateTime<Utc> {
        *self.now.lock().expect("clock mutex poisoned")
    }

    fn now_local(&self) -> NaiveDateTime {
        self.now().naive_utc()
    }
}

/// A container as reported by the engine's inventory.
#[derive(Debug, Clone)]
pub struct DiscoveredContainer {
    pub name: ContainerId,
    pub compose_file: PathBuf,
    pub service: String,
    pub project: String,
    pub image: String,
    pub registry: String,
    pub tag: String,
    pub digest: Option<String>,
}

/// Container engine capability: inventory plus recreate/restore.
pub trait ContainerEngine: Send + Sync {
    /// List running containers managed by compose.
    fn list(&self) -> Result<Vec<DiscoveredContainer>, ApplyError>;
    /// Snapshot the service definition before an apply; returns the backup
    /// path. A failed backup is transient — the apply is retried later.
    fn backup(&self, container: &Container) -> Result<String, ApplyError>;
    /// Pull the target tag and recreate the compose service with it.
    fn recreate(&self, container: &Container, target_tag: &str) -> Result<(), ApplyError>;
    /// Restore a previously taken backup (rollback mechanics live here).
    fn restore(&self, container: &Container, backup_path: &str) -> Result<(), ApplyError>;
}

/// Image registry capability.
pub trait Registry: Send + Sync {
    /// Tags available for an image repository.
    fn list_tags(&self, image: &str) -> Result<Vec<String>, ApplyError>;
    /// Content digest currently served for `image:tag`.
    fn digest(&self, image: &str, tag: &str) -> Result<Option<String>, ApplyError>;
}

/// One dependency found inside an image by the external scanner.
#[derive(Debug, Clone)]
pub struct DependencyFinding {
    pub kind: DependencyKind,
    pub name: String,
    pub ecosystem: Option<String>,
    pub current_version: String,
    pub latest_version: Option<String>,
    pub severity: Severity,
}

/// Opaque scan result for an image: CVE ids, severity counts, dependencies.
#[derive(Debug, Clone, Default)]
pub struct VulnReport {
    pub cves: Vec<String>,
    pub critical: u32,
    pub high: u32,
    pub medium: u32,
    pub low: u32,
    pub dependencies: Vec<DependencyFinding>,
}

/// External vulnerability scanner. Eventually consistent: a just-recreated
/// container may not be discovered yet, in which case `scan_result_for`
/// returns `Ok(None)` and the pending-scan job keeps polling.
pub trait VulnerabilityScanner: Send + Sync {
    fn scan_result_for(&self, image: &str) -> Result<Option<VulnReport>, ApplyError>;
    /// Ask the scanner to (re)scan an image it has not discovered yet.
    fn trigger_scan(&self, image: &str) -> Result<(), ApplyError>;
}

/// Fire-and-forget event fan-out.
pub trait EventSink: Send + Sync {
    fn publish(&self, event_type: &str, payload: serde_json::Value);
}

/// No-op sink for tests and headless runs.
#[derive(Debug, Clone, Default)]
pub struct NullEventSink;

impl EventSink for NullEventSink {
    fn publish(&self, _event_type: &str, _payload: serde_json::Value) {}
}

// ── Scripted mocks ───────────────────────────────────────────────────────

/// Deterministic in-memory container engine for tests and the `mock` driver.
#[derive(Debug, Default)]
pub struct MockContainerEngine {
    containers: Mutex<Vec<DiscoveredContainer>>,
    /// Scripted recreate results, consumed FIFO; empty means success.
    recreate_results: Mutex<VecDeque<Result<(), ApplyError>>>,
    /// Scripted backup results, consumed FIFO; empty means success.
    backup_results: Mutex<VecDeque<Result<String, ApplyError>>>,
    recreated: Mutex<Vec<(ContainerId, String)>>,
    restored: Mutex<Vec<(ContainerId, String)>>,
}

impl MockContainerEngine {
    pub fn with_containers(containers: Vec<DiscoveredContainer>) -> Self {
        Self {
            containers: Mutex::new(containers),
            ..Self::default()
        }
    }

    /// Append a scripted recreate result. Results are consumed FIFO.
    pub fn push_recreate_result(&self, result: Result<(), ApplyError>) {
        self.recreate_results
            .lock()
            .expect("recreate_results mutex poisoned")
            .push_back(result);
    }

    pub fn push_backup_result(&self, result: Result<String, ApplyError>) {
        self.backup_results
            .lock()
            .expect("backup_results mutex poisoned")
            .push_back(result);
    }

    /// Snapshot of all recreate calls received by the mock.
    pub fn recreated(&self) -> Vec<(ContainerId, String)> {
        self.recreated
            .lock()
            .expect("recreated mutex poisoned")
            .clone()
    }

    pub fn restored(&self) -> Vec<(ContainerId, String)> {
        self.restored
            .lock()
            .expect("restored mutex poisoned")
            .clone()
    }
}

impl ContainerEngine for MockContainerEngine {
    fn list(&self) -> Result<Vec<DiscoveredContainer>, ApplyError> {
        Ok(self
            .containers
            .lock()
            .expect("containers mutex poisoned")
            .clone())
    }

    fn backup(&self, container: &Container) -> Result<String, ApplyError> {
        let scripted = self
            .backup_results
            .lock()
            .expect("backup_results mutex poisoned")
            .pop_front();
        match scripted {
            Some(result) => result,
            None => Ok(format!("/var/lib/tugboat/backups/{}.yml", container.id)),
        }
    }

    fn recreate(&self, container: &Container, target_tag: &str) -> Result<(), ApplyError> {
        let scripted = self
            .recreate_results
            .lock()
            .expect("recreate_results mutex poisoned")
            .pop_front();
        let outcome = scripted.unwrap_or(Ok(()));
        if outcome.is_ok() {
            self.recreated
                .lock()
                .expect("recreated mutex poisoned")
                .push((container.id.clone(), target_tag.to_string()));
        }
        outcome
    }

    fn restore(&self, container: &Container, backup_path: &str) -> Result<(), ApplyError> {
        self.restored
            .lock()
            .expect("restored mutex poisoned")
            .push((container.id.clone(), backup_path.to_string()));
        Ok(())
    }
}

/// Deterministic in-memory registry.
#[derive(Debug, Default)]
pub struct MockRegistry {
    tags: Mutex<HashMap<String, Vec<String>>>,
    digests: Mutex<HashMap<String, String>>,
    /// Scripted failures injected ahead of the next calls, consumed FIFO.
    failures: Mutex<VecDeque<ApplyError>>,
}

impl MockRegistry {
    pub fn set_tags(&self, image: &str, tags: &[&str]) {
        self.tags.lock().expect("tags mutex poisoned").insert(
            image.to_string(),
            tags.iter().map(|s| s.to_string()).collect(),
        );
    }

    pub fn set_digest(&self, image: &str, tag: &str, digest: &str) {
        self.digests
            .lock()
            .expect("digests mutex poisoned")
            .insert(format!("{image}:{tag}"), digest.to_string());
    }

    /// Inject a failure for the next registry call.
    pub fn push_failure(&self, error: ApplyError) {
        self.failures
            .lock()
            .expect("failures mutex poisoned")
            .push_back(error);
    }

    fn take_failure(&self) -> Option<ApplyError> {
        self.failures
            .lock()
            .expect("failures mutex poisoned")
            .pop_front()
    }
}

impl Registry for MockRegistry {
    fn list_tags(&self, image: &str) -> Result<Vec<String>, ApplyError> {
        if let Some(error) = self.take_failure() {
            return Err(error);
        }
        Ok(self
            .tags
            .lock()
            .expect("tags mutex poisoned")
            .get(image)
            .cloned()
            .unwrap_or_default())
    }

    fn digest(&self, image: &str, tag: &str) -> Result<Option<String>, ApplyError> {
        if let Some(error) = self.take_failure() {
            return Err(error);
        }
        Ok(self
            .digests
            .lock()
            .expect("digests mutex poisoned")
            .get(&format!("{image}:{tag}"))
            .cloned())
    }
}

/// Deterministic scanner: images become visible only once marked discovered.
#[derive(Debug, Default)]
pub struct MockScanner {
    reports: Mutex<HashMap<String, VulnReport>>,
    triggered: Mutex<Vec<String>>,
    /// Scripted trigger failures, consumed FIFO.
    trigger_failures: Mutex<VecDeque<ApplyError>>,
}

impl MockScanner {
    pub fn set_report(&self, image: &str, report: VulnReport) {
        self.reports
            .lock()
            .expect("reports mutex poisoned")
            .insert(image.to_string(), report);
    }

    pub fn push_trigger_failure(&self, error: ApplyError) {
        self.trigger_failures
            .lock()
            .expect("trigger_failures mutex poisoned")
            .push_back(error);
    }

    pub fn triggered(&self) -> Vec<String> {
        self.triggered
            .lock()
            .expect("triggered mutex poisoned")
            .clone()
    }
}

impl VulnerabilityScanner for MockScanner {
    fn scan_result_for(&self, image: &str) -> Result<Option<VulnReport>, ApplyError> {
        Ok(self
            .reports
            .lock()
            .expect("reports mutex poisoned")
            .get(image)
            .cloned())
    }

    fn trigger_scan(&self, image: &str) -> Result<(), ApplyError> {
        if let Some(error) = self
            .trigger_failures
            .lock()
            .expect("trigger_failures mutex poisoned")
            .pop_front()
        {
            return Err(error);
        }
        self.triggered
            .lock()
            .expect("triggered mutex poisoned")
            .push(image.to_string());
        Ok(())
    }
}
