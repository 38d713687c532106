//! Mesh node root context
//!
//! Builds the bus, registry store, directory and router from configuration
//! and owns the background tasks (rules watcher, stale sweeper). Everything
//! else receives `Arc` handles from here; there is no global state.

use nodemesh_core::{NodeConfig, StorageType};
use nodemesh_storage::{SharedRegistryStore, StoreError, create_memory_store};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use thiserror::Error;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tracing::{debug, info};

use crate::bus::EventBus;
use crate::directory::{DirectoryError, NodeDirectory};
use crate::io::{SharedConsole, SharedVoice, StdoutConsole};
use crate::router::{HttpRelay, RelayTransport, Router, RouterError, RouterSettings};
use crate::scenario::{ScenarioEngine, ScenarioRepository, ScenarioService};
use crate::skills::SharedSkillInvoker;

#[derive(Debug, Error)]
pub enum NodeError {
    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    #[error("Directory error: {0}")]
    Directory(#[from] DirectoryError),

    #[error("Router error: {0}")]
    Router(#[from] RouterError),

    #[error("Unsupported configuration: {0}")]
    Unsupported(String),
}

pub type Result<T> = std::result::Result<T, NodeError>;

struct Sweeper {
    stop: oneshot::Sender<()>,
    task: JoinHandle<()>,
}

pub struct MeshNode {
    config: NodeConfig,
    bus: Arc<EventBus>,
    store: SharedRegistryStore,
    directory: Arc<NodeDirectory>,
    router: Arc<Router>,
    console: SharedConsole,
    sweeper: Mutex<Option<Sweeper>>,
}

impl std::fmt::Debug for MeshNode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MeshNode")
            .field("node_id", &self.config.node_id)
            .field("role", &self.config.role)
            .field("router", &self.router)
            .finish()
    }
}

/// Open the registry store selected by `config.storage`
pub async fn open_store(config: &NodeConfig) -> Result<SharedRegistryStore> {
    match config.storage.storage_type {
        StorageType::Memory => Ok(create_memory_store()),
        #[cfg(feature = "sqlite")]
        StorageType::Sqlite => {
            let path = config.storage.db_path(&config.base_dir);
            Ok(nodemesh_storage::create_sqlite_store(path).await?)
        }
        #[cfg(not(feature = "sqlite"))]
        StorageType::Sqlite => Err(NodeError::Unsupported(
            "sqlite storage requires the `sqlite` feature".to_string(),
        )),
    }
}

impl MeshNode {
    /// Build a node with the configured store, HTTP relay and stdout console
    pub async fn open(config: NodeConfig) -> Result<Self> {
        let store = open_store(&config).await?;
        let transport = Arc::new(HttpRelay::new(config.router.relay_timeout())?);
        Self::with_parts(config, store, transport, Arc::new(StdoutConsole)).await
    }

    pub async fn with_parts(
        config: NodeConfig,
        store: SharedRegistryStore,
        transport: Arc<dyn RelayTransport>,
        console: SharedConsole,
    ) -> Result<Self> {
        let bus = Arc::new(EventBus::new());
        let directory = Arc::new(NodeDirectory::load(Arc::clone(&store)).await?);
        let router = Arc::new(Router::new(
            RouterSettings::from_config(&config),
            Arc::clone(&bus),
            Arc::clone(&directory),
            transport,
            Arc::clone(&console),
        ));

        debug!(node_id = %config.node_id, role = %config.role, "mesh node assembled");
        Ok(Self {
            config,
            bus,
            store,
            directory,
            router,
            console,
            sweeper: Mutex::new(None),
        })
    }

    pub fn config(&self) -> &NodeConfig {
        &self.config
    }

    pub fn bus(&self) -> &Arc<EventBus> {
        &self.bus
    }

    pub fn store(&self) -> &SharedRegistryStore {
        &self.store
    }

    pub fn directory(&self) -> &Arc<NodeDirectory> {
        &self.directory
    }

    pub fn router(&self) -> &Arc<Router> {
        &self.router
    }

    /// Engine wired to this node's bus and console
    pub fn scenario_engine(&self, invoker: SharedSkillInvoker, voice: SharedVoice) -> ScenarioEngine {
        ScenarioEngine::standard(
            invoker,
            Arc::clone(&self.bus),
            Arc::clone(&self.console),
            voice,
            self.config.node_id.clone(),
        )
    }

    pub fn scenario_service(&self, engine: ScenarioEngine) -> ScenarioService {
        ScenarioService::new(
            ScenarioRepository::new(self.config.scenarios_dir()),
            Arc::clone(&self.store),
            Arc::clone(&self.bus),
            Arc::new(engine),
        )
    }

    /// Start the router and the periodic stale sweep. Idempotent.
    pub fn start(&self) -> Result<()> {
        self.router.start()?;

        let mut sweeper = self
            .sweeper
            .lock()
            .map_err(|_| NodeError::Router(RouterError::Poisoned))?;
        if sweeper.is_none() {
            let (stop, stop_rx) = oneshot::channel();
            let task = tokio::spawn(sweep_loop(
                Arc::clone(&self.directory),
                self.config.directory.ttl(),
                self.config.directory.sweep_interval(),
                stop_rx,
            ));
            *sweeper = Some(Sweeper { stop, task });
        }

        info!(node_id = %self.config.node_id, role = %self.config.role, "mesh node started");
        Ok(())
    }

    /// Stop the router and the sweeper. Safe to repeat.
    pub fn stop(&self) {
        self.router.stop();
        if let Ok(mut sweeper) = self.sweeper.lock() {
            if let Some(sweeper) = sweeper.take() {
                if sweeper.stop.send(()).is_err() {
                    sweeper.task.abort();
                }
                info!(node_id = %self.config.node_id, "mesh node stopped");
            }
        }
    }
}

impl Drop for MeshNode {
    fn drop(&mut self) {
        self.stop();
    }
}

async fn sweep_loop(
    directory: Arc<NodeDirectory>,
    ttl: Duration,
    interval: Duration,
    mut stop: oneshot::Receiver<()>,
) {
    loop {
        tokio::select! {
            _ = &mut stop => break,
            _ = tokio::time::sleep(interval) => {
                directory.sweep_stale(ttl).await;
            }
        }
    }
    debug!("stale sweeper stopped");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::io::MemoryConsole;
    use nodemesh_core::{Event, NodeInfo, UI_NOTIFY};

    fn config(dir: &std::path::Path) -> NodeConfig {
        let mut config = NodeConfig::default();
        config.node_id = "hub-1".to_string();
        config.role = nodemesh_core::NodeRole::Hub;
        config.base_dir = dir.to_path_buf();
        config.router.watch_interval_ms = 20;
        config.directory.ttl_secs = 0;
        config.directory.sweep_interval_secs = 1;
        config
    }

    #[tokio::test]
    async fn test_start_stop_lifecycle() {
        let tmp = tempfile::tempdir().unwrap();
        let console = Arc::new(MemoryConsole::new());
        let node = MeshNode::with_parts(
            config(tmp.path()),
            create_memory_store(),
            Arc::new(HttpRelay::new(Duration::from_millis(100)).unwrap()),
            console.clone(),
        )
        .await
        .unwrap();

        node.start().unwrap();
        node.start().unwrap();
        assert!(node.router().is_started());
        assert_eq!(node.bus().subscriber_count(UI_NOTIFY), 1);

        node.bus().publish(&Event::notify("hello"));
        for _ in 0..50 {
            if !console.lines().is_empty() {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert_eq!(console.lines(), vec!["[hub-1] hello"]);

        node.stop();
        node.stop();
        assert!(!node.router().is_started());
        assert_eq!(node.bus().subscriber_count(UI_NOTIFY), 0);
    }

    #[tokio::test]
    async fn test_sweeper_marks_nodes_offline() {
        let tmp = tempfile::tempdir().unwrap();
        let node = MeshNode::with_parts(
            config(tmp.path()),
            create_memory_store(),
            Arc::new(HttpRelay::new(Duration::from_millis(100)).unwrap()),
            Arc::new(MemoryConsole::new()),
        )
        .await
        .unwrap();

        node.directory()
            .register(NodeInfo::new("kitchen"))
            .await
            .unwrap();
        assert!(node.directory().is_online("kitchen").await);

        node.start().unwrap();
        let mut offline = false;
        for _ in 0..40 {
            tokio::time::sleep(Duration::from_millis(100)).await;
            if !node.directory().is_online("kitchen").await {
                offline = true;
                break;
            }
        }
        node.stop();
        assert!(offline);
    }

    #[tokio::test]
    async fn test_sqlite_storage_without_feature() {
        let tmp = tempfile::tempdir().unwrap();
        let mut config = config(tmp.path());
        config.storage.storage_type = StorageType::Sqlite;

        let result = open_store(&config).await;
        if cfg!(feature = "sqlite") {
            assert!(result.is_ok());
        } else {
            assert!(matches!(result, Err(NodeError::Unsupported(_))));
        }
    }
}
