//! Server lifecycle: composition, start/stop/reload, PID file.
//!
//! The composition root constructs one `Server` with its config store,
//! shared extensions, and a stage factory, registers controllers, hands
//! stop duties to the supervisor, and calls [`Server::start`]. The stage
//! factory runs on every (re)start so stages always reflect the current
//! configuration snapshot.

use std::path::PathBuf;
use std::sync::Arc;

use axum::http::Extensions;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

use crate::config::{AppSettings, ConfigStore};
use crate::controller::Controller;
use crate::engine::{EngineConfig, HttpEngine};
use crate::error::StartError;
use crate::pipeline::PipelineSet;
use crate::router::{RouteError, RouteTable};
use crate::state::{ServerState, ServerStats};

pub type StageFactory = Box<dyn Fn(&AppSettings) -> PipelineSet + Send + Sync>;

pub struct Server {
    base_dir: PathBuf,
    config: Arc<ConfigStore>,
    stats: Arc<ServerStats>,
    extensions: Extensions,
    stage_factory: StageFactory,
    routes: RouteTable,
    frozen_routes: Option<Arc<RouteTable>>,
    engine: Option<HttpEngine>,
    pid_path: Option<PathBuf>,
}

impl Server {
    pub fn new(
        base_dir: PathBuf,
        config: Arc<ConfigStore>,
        mut extensions: Extensions,
        stage_factory: StageFactory,
    ) -> Self {
        let stats = Arc::new(ServerStats::new());
        // Make the counters reachable from handlers (health endpoint).
        extensions.insert(stats.clone());
        Self {
            base_dir,
            config,
            stats,
            extensions,
            stage_factory,
            routes: RouteTable::new(),
            frozen_routes: None,
            engine: None,
            pid_path: None,
        }
    }

    pub fn stats(&self) -> Arc<ServerStats> {
        self.stats.clone()
    }

    pub fn state(&self) -> ServerState {
        self.stats.state()
    }

    /// Address the active listener is bound to, if running.
    pub fn local_addr(&self) -> Option<std::net::SocketAddr> {
        self.engine.as_ref().and_then(|engine| engine.local_addr())
    }

    /// Register a controller's routes. All registration must complete before
    /// the first [`start`](Self::start); the table is frozen from then on.
    pub fn register_controller(&mut self, controller: &dyn Controller) -> Result<(), RouteError> {
        if self.frozen_routes.is_some() {
            return Err(RouteError::TableFrozen);
        }
        controller.register(&mut self.routes)
    }

    /// Bring the listener up. Valid from `Initializing` or `Stopped`.
    pub async fn start(&mut self) -> Result<(), StartError> {
        match self.stats.state() {
            ServerState::Initializing | ServerState::Stopped => {}
            other => {
                return Err(StartError::InvalidState(format!(
                    "cannot start from state '{other}'"
                )))
            }
        }
        self.stats.set_state(ServerState::Starting);

        let settings = self.config.settings();
        let routes = self
            .frozen_routes
            .get_or_insert_with(|| Arc::new(std::mem::take(&mut self.routes)))
            .clone();

        let engine_config = match EngineConfig::from_settings(&settings.server, &self.base_dir) {
            Ok(config) => config,
            Err(err) => {
                self.stats.set_state(ServerState::Error);
                return Err(err);
            }
        };
        let pipeline = (self.stage_factory)(&settings);
        let engine = HttpEngine::new(
            engine_config,
            pipeline,
            routes.clone(),
            self.stats.clone(),
            self.extensions.clone(),
            CancellationToken::new(),
        );

        let addr = match engine.start().await {
            Ok(addr) => addr,
            Err(err) => {
                self.stats.set_state(ServerState::Error);
                return Err(err);
            }
        };

        let pid_path = self.base_dir.join(&settings.server.pid_file);
        if let Err(err) = std::fs::write(&pid_path, std::process::id().to_string()) {
            engine.stop().await;
            self.stats.set_state(ServerState::Error);
            return Err(StartError::PidFile(format!(
                "'{}': {err}",
                pid_path.display()
            )));
        }
        self.pid_path = Some(pid_path);

        self.engine = Some(engine);
        self.stats.set_state(ServerState::Running);
        self.stats.mark_started();
        info!(%addr, routes = routes.len(), "server running");
        Ok(())
    }

    /// Graceful stop: drain in-flight work, deactivate the listener, remove
    /// the PID file. Safe to call in any state; repeated calls are no-ops.
    pub async fn stop(&mut self) {
        match self.stats.state() {
            ServerState::Running | ServerState::Starting => {}
            _ => return,
        }
        self.stats.set_state(ServerState::Stopping);
        if let Some(engine) = self.engine.take() {
            engine.stop().await;
        }
        if let Some(pid_path) = self.pid_path.take() {
            if let Err(err) = std::fs::remove_file(&pid_path) {
                error!(path = %pid_path.display(), error = %err, "failed to remove PID file");
            }
        }
        self.stats.set_state(ServerState::Stopped);
        info!(stats = ?self.stats.snapshot(), "server stopped");
    }

    /// Reload the configuration, restarting the listener if it was running.
    /// In-flight requests drain before the old listener goes away.
    pub async fn reload(&mut self) -> bool {
        let was_running = self.stats.state() == ServerState::Running;
        if was_running {
            self.stop().await;
        }
        let reloaded = self.config.reload();
        if was_running {
            if let Err(err) = self.start().await {
                error!(error = %err, "restart after reload failed");
                self.stats.set_state(ServerState::Error);
                return false;
            }
        }
        reloaded
    }
}
