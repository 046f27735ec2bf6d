//! Shared fixture: a small fleet wired to scripted mock backends.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;

use chrono::Utc;

use tug_common::config::DaemonConfig;
use tug_common::types::{ContainerId, UpdatePolicy, UpdateScope};

use tugd::api::DaemonContext;
use tugd::backends::{DiscoveredContainer, ManualClock, MockContainerEngine, MockRegistry, MockScanner};
use tugd::events::EventBus;
use tugd::store::Store;

/// A daemon context over mock backends with handles kept for scripting.
pub struct Fleet {
    pub ctx: DaemonContext,
    pub engine: Arc<MockContainerEngine>,
    pub registry: Arc<MockRegistry>,
    pub scanner: Arc<MockScanner>,
    pub clock: Arc<ManualClock>,
    _dir: tempfile::TempDir,
}

impl Fleet {
    /// Build a fleet whose engine inventory reports the given containers.
    pub fn new(containers: &[(&str, &str)]) -> Self {
        Self::with_config(containers, DaemonConfig::default())
    }

    pub fn with_config(containers: &[(&str, &str)], config: DaemonConfig) -> Self {
        let dir = tempfile::tempdir().expect("tempdir");
        let store = Arc::new(Store::open(dir.path()).expect("store"));
        let discovered: Vec<DiscoveredContainer> = containers
            .iter()
            .map(|(name, tag)| DiscoveredContainer {
                name: ContainerId::new(*name),
                compose_file: PathBuf::from("/srv/stack/docker-compose.yml"),
                service: name.to_string(),
                project: "homelab".to_string(),
                image: format!("library/{name}"),
                registry: "docker.io".to_string(),
                tag: tag.to_string(),
                digest: None,
            })
            .collect();
        // Seed the store as well so tests can configure policies before the
        // first scan re-discovers the same inventory.
        for found in &discovered {
            store.upsert_discovered(found).expect("seed container");
        }
        let engine = Arc::new(MockContainerEngine::with_containers(discovered));
        let registry = Arc::new(MockRegistry::default());
        let scanner = Arc::new(MockScanner::default());
        let clock = Arc::new(ManualClock::at(Utc::now()));

        let ctx = DaemonContext {
            store,
            engine: engine.clone(),
            registry: registry.clone(),
            scanner: scanner.clone(),
            clock: clock.clone(),
            events: EventBus::new(16),
            config: Arc::new(config),
            started_at: Instant::now(),
        };
        Self {
            ctx,
            engine,
            registry,
            scanner,
            clock,
            _dir: dir,
        }
    }

    /// Switch a container's policy and scope after discovery.
    pub fn configure(&self, name: &str, policy: UpdatePolicy, scope: UpdateScope) {
        let id = ContainerId::new(name);
        let container = self.ctx.store.get_container(&id).expect("container");
        self.ctx
            .store
            .mutate_container(&id, container.version, |c| {
                c.policy = policy;
                c.scope = scope;
                Ok(())
            })
            .expect("configure container");
    }
}
