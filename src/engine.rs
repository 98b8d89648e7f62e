// Field engine - one handle that wires storage, events and services together

use std::path::Path;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tracing::{info, warn};

use crate::agent_lifecycle::{FieldWorker, WorkHandler, WorkerConfig};
use crate::agents::{AgentRegistry, LivenessSweeper};
use crate::bundles::BundleStore;
use crate::config::SwarmFieldConfig;
use crate::database::DatabaseManager;
use crate::error::FieldResult;
use crate::events::{AuditSubscriber, EventBus};
use crate::field::{FieldCoordinator, PotentialModel};

/// Every service shares the same pool and event bus
pub struct FieldEngine {
    database: DatabaseManager,
    events: EventBus,
    coordinator: FieldCoordinator,
    registry: AgentRegistry,
    sweeper: LivenessSweeper,
    bundles: BundleStore,
    audit: Mutex<Option<JoinHandle<()>>>,
}

impl FieldEngine {
    pub async fn open(config: &SwarmFieldConfig) -> FieldResult<Self> {
        let database = DatabaseManager::new(&config.database).await?;
        Ok(Self::assemble(database, config))
    }

    /// Engine over a fresh database file in `dir`, default settings otherwise
    pub async fn open_in_directory(dir: &Path) -> FieldResult<Self> {
        let database = DatabaseManager::in_directory(dir).await?;
        Ok(Self::assemble(database, &SwarmFieldConfig::default()))
    }

    fn assemble(database: DatabaseManager, config: &SwarmFieldConfig) -> Self {
        let pool = database.pool().clone();
        let events = EventBus::default();
        let audit = AuditSubscriber::spawn(pool.clone(), &events);

        let coordinator = FieldCoordinator::new(pool.clone(), config.field.clone(), events.clone());
        let registry = AgentRegistry::new(pool.clone(), config.agents.clone(), events.clone());
        let sweeper = LivenessSweeper::new(
            pool.clone(),
            registry.clone(),
            PotentialModel::from_config(&config.field),
            events.clone(),
            config.liveness.heartbeat_timeout(),
            config.liveness.sweep_interval(),
        );
        let bundles = BundleStore::new(pool, events.clone());

        info!("Swarm field engine ready");
        Self {
            database,
            events,
            coordinator,
            registry,
            sweeper,
            bundles,
            audit: Mutex::new(Some(audit)),
        }
    }

    pub fn coordinator(&self) -> &FieldCoordinator {
        &self.coordinator
    }

    pub fn registry(&self) -> &AgentRegistry {
        &self.registry
    }

    pub fn sweeper(&self) -> &LivenessSweeper {
        &self.sweeper
    }

    pub fn bundles(&self) -> &BundleStore {
        &self.bundles
    }

    pub fn events(&self) -> &EventBus {
        &self.events
    }

    pub fn database(&self) -> &DatabaseManager {
        &self.database
    }

    /// Worker bound to this engine's coordinator and registry
    pub fn worker(&self, handler: std::sync::Arc<dyn WorkHandler>, config: WorkerConfig) -> FieldWorker {
        FieldWorker::new(self.coordinator.clone(), self.registry.clone(), handler, config)
    }

    /// Stop the audit writer and close the pool.
    ///
    /// Services cloned out of the engine keep the bus alive, so the writer is
    /// aborted rather than drained. Events still queued are not recorded.
    pub async fn shutdown(&self) {
        if let Some(handle) = self.audit.lock().await.take() {
            handle.abort();
            if let Err(e) = handle.await {
                if !e.is_cancelled() {
                    warn!("Audit writer ended abnormally: {}", e);
                }
            }
        }
        self.database.shutdown().await;
    }
}
