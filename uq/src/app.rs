//! Application wiring
//!
//! Opens the store, hydrates the registry and queue from it, fails work left
//! in flight by a previous process and builds the engine and scheduler.

use std::sync::Arc;

use eyre::{Context, Result};
use tracing::{debug, info};

use crate::config::Config;
use crate::engine::{ExecutionEngine, SimulatedTransport, UssdTransport};
use crate::overview::Overview;
use crate::queue::{CommandFilter, CommandQueue, RecoveryStats};
use crate::registry::{SimRegistry, today};
use crate::scheduler::Scheduler;
use crate::state::StateManager;

/// Fully wired scheduler components
pub struct App {
    pub state: StateManager,
    pub registry: Arc<SimRegistry>,
    pub queue: Arc<CommandQueue>,
    pub engine: Arc<ExecutionEngine>,
    pub scheduler: Arc<Scheduler>,
    pub recovered: RecoveryStats,
}

impl App {
    /// Open the configured store and wire everything with the simulated transport
    pub async fn open(config: &Config) -> Result<Self> {
        debug!(in_memory = config.storage.in_memory, "App::open: called");
        let state = if config.storage.in_memory {
            StateManager::spawn_memory()
        } else {
            let path = &config.storage.database_path;
            if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
                std::fs::create_dir_all(parent)
                    .context(format!("Failed to create data directory {}", parent.display()))?;
            }
            StateManager::spawn_sqlite(path).context(format!("Failed to open database {}", path.display()))?
        };
        let transport = Arc::new(SimulatedTransport::new(config.transport.clone()));
        Self::with_state(config, state, transport).await
    }

    /// Wire components over an existing state manager and transport
    pub async fn with_state(config: &Config, state: StateManager, transport: Arc<dyn UssdTransport>) -> Result<Self> {
        debug!("App::with_state: called");
        let snapshot = state.load().await.context("Failed to load stored records")?;
        info!(
            devices = snapshot.devices.len(),
            sims = snapshot.sims.len(),
            commands = snapshot.commands.len(),
            sessions = snapshot.sessions.len(),
            "Loaded stored records"
        );

        let registry = Arc::new(SimRegistry::from_records(
            config.registry.clone(),
            state.clone(),
            snapshot.devices,
            snapshot.sims,
        ));
        let queue = Arc::new(CommandQueue::from_records(
            registry.clone(),
            state.clone(),
            snapshot.commands,
            snapshot.sessions,
        ));
        let recovered = queue
            .recover_interrupted()
            .await
            .context("Failed to recover interrupted work")?;

        let engine = Arc::new(ExecutionEngine::new(
            registry.clone(),
            queue.clone(),
            transport,
            config.scheduler.execution_timeout(),
        ));
        let scheduler = Arc::new(Scheduler::new(
            config.scheduler.clone(),
            registry.clone(),
            queue.clone(),
            engine.clone(),
        ));

        Ok(Self {
            state,
            registry,
            queue,
            engine,
            scheduler,
            recovered,
        })
    }

    /// Current dashboard counts
    pub async fn overview(&self) -> Overview {
        debug!("App::overview: called");
        let devices = self.registry.list_devices().await;
        let sims = self.registry.list_sims().await;
        let commands = self.queue.list(&CommandFilter::all()).await;
        Overview::compute(&devices, &sims, &commands, today())
    }

    /// Stop the store actor once every write has been issued
    pub async fn close(self) {
        debug!("App::close: called");
        self.state.shutdown().await;
    }
}
