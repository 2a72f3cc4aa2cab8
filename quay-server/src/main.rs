//! Quay server binary.
//!
//! Composition root: constructs one of each manager and hands them down
//! explicitly. Startup order is logger → config → pools → engine + stages →
//! controllers → shutdown handlers → listen → wait.
//!
//! Exit codes: 0 clean shutdown, 1 unclassified error, 2 configuration
//! error, 3 server-start error.

use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;

use axum::http::Extensions;
use clap::Parser;
use tracing::error;

use quay_core::config::{AppSettings, ApplicationSettings, ConfigStore};
use quay_core::controller::HealthController;
use quay_core::cors::CorsStage;
use quay_core::error::StartError;
use quay_core::logging::init_logging;
use quay_core::pipeline::PipelineSet;
use quay_core::server::Server;
use quay_core::supervisor::Supervisor;
use quay_data::PoolManager;
use quay_rate_limit::{IpRateLimiter, RateLimitPolicy};
use quay_security::{AuthStage, SecurityStage};
use quay_session::SessionStore;

#[derive(Parser)]
#[command(name = "quay-server", about = "Quay HTTP API server", version)]
struct Cli {
    /// Base directory holding config.json. Defaults to the directory of
    /// this executable.
    #[arg(long)]
    base_dir: Option<PathBuf>,
}

enum RunError {
    Config(String),
    Start(StartError),
    Other(String),
}

fn default_base_dir() -> PathBuf {
    std::env::current_exe()
        .ok()
        .and_then(|exe| exe.parent().map(Path::to_path_buf))
        .unwrap_or_else(|| PathBuf::from("."))
}

fn main() -> ExitCode {
    let cli = Cli::parse();

    // Minimum viable logging until the config is loaded.
    let logging = init_logging(&ApplicationSettings::default());

    let base_dir = cli.base_dir.unwrap_or_else(default_base_dir);
    let config = match ConfigStore::initialize(&base_dir) {
        Ok(config) => Arc::new(config),
        Err(err) => {
            error!(error = %err, base_dir = %base_dir.display(), "configuration load failed");
            return ExitCode::from(2);
        }
    };
    let settings = config.settings();
    logging.apply(&settings.application);

    let mut runtime = tokio::runtime::Builder::new_multi_thread();
    runtime.enable_all();
    if settings.server.thread_pool_size > 0 {
        runtime.worker_threads(settings.server.thread_pool_size);
    }
    let runtime = match runtime.build() {
        Ok(runtime) => runtime,
        Err(err) => {
            error!(error = %err, "failed to build runtime");
            return ExitCode::from(3);
        }
    };

    match runtime.block_on(run(base_dir, config, settings)) {
        Ok(()) => ExitCode::SUCCESS,
        Err(RunError::Config(err)) => {
            error!(error = %err, "configuration error");
            ExitCode::from(2)
        }
        Err(RunError::Start(err)) => {
            error!(error = %err, "server start failed");
            ExitCode::from(3)
        }
        Err(RunError::Other(err)) => {
            error!(error = %err, "unexpected error");
            ExitCode::from(1)
        }
    }
}

async fn run(
    base_dir: PathBuf,
    config: Arc<ConfigStore>,
    settings: AppSettings,
) -> Result<(), RunError> {
    let supervisor = Arc::new(Supervisor::new());
    let token = supervisor.cancellation_token();

    let pools = Arc::new(PoolManager::new());
    pools
        .configure_from_settings(&settings.database_pools)
        .await
        .map_err(|err| RunError::Config(err.to_string()))?;

    let session_cfg = &settings.security.session;
    let sessions = Arc::new(SessionStore::new(Duration::from_secs(
        session_cfg.timeout_minutes * 60,
    )));
    let rate_cfg = &settings.security.security_middleware.rate_limit;
    let limiter = Arc::new(IpRateLimiter::new(RateLimitPolicy {
        max_requests: rate_cfg.max_requests,
        window_seconds: rate_cfg.window_seconds,
        burst_limit: rate_cfg.burst_limit,
        block_minutes: rate_cfg.block_minutes,
    }));

    quay_session::spawn_sweeper(
        sessions.clone(),
        Duration::from_secs(session_cfg.cleanup_interval_seconds.max(1)),
        token.child_token(),
    );
    quay_rate_limit::spawn_sweeper(
        limiter.clone(),
        Duration::from_secs(rate_cfg.window_seconds.max(1)),
        token.child_token(),
    );
    pools.spawn_maintenance(Duration::from_secs(30), &token);

    let mut extensions = Extensions::new();
    extensions.insert(pools.clone());
    extensions.insert(sessions.clone());
    extensions.insert(config.clone());

    let stage_factory = {
        let sessions = sessions.clone();
        let limiter = limiter.clone();
        Box::new(move |settings: &AppSettings| PipelineSet {
            pre_route: vec![
                Box::new(CorsStage::new(&settings.server.cors)) as Box<dyn quay_core::Stage>,
                Box::new(SecurityStage::new(
                    &settings.security.security_middleware,
                    Some(limiter.clone()),
                    sessions.clone(),
                )),
            ],
            post_route: vec![Box::new(AuthStage::new(
                &settings.security.jwt,
                &settings.security.auth_middleware,
            )) as Box<dyn quay_core::Stage>],
        })
    };

    let mut server = Server::new(base_dir, config, extensions, stage_factory);
    server
        .register_controller(&HealthController)
        .map_err(|err| RunError::Other(err.to_string()))?;

    // Handlers run LIFO: engine stop first, then pool drain.
    let grace = Duration::from_secs(settings.server.shutdown_grace_period_seconds);
    {
        let pools = pools.clone();
        supervisor.register_shutdown_handler(move || async move {
            pools.shutdown_all(grace).await;
            Ok(())
        });
    }
    let server = Arc::new(tokio::sync::Mutex::new(server));
    {
        let server = server.clone();
        supervisor.register_shutdown_handler(move || async move {
            server.lock().await.stop().await;
            Ok(())
        });
    }

    server
        .lock()
        .await
        .start()
        .await
        .map_err(RunError::Start)?;

    supervisor.wait_for_shutdown_signal().await;
    Ok(())
}
