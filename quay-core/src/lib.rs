pub mod config;
pub mod controller;
pub mod cors;
pub mod engine;
pub mod error;
pub mod logging;
pub mod pipeline;
pub mod router;
pub mod server;
pub mod state;
pub mod supervisor;

pub use config::{AppSettings, ConfigError, ConfigStore};
pub use controller::{Controller, HealthController};
pub use cors::CorsStage;
pub use engine::HttpEngine;
pub use error::{HttpError, StartError};
pub use logging::{init_logging, Logging};
pub use pipeline::{BoxFuture, Exchange, PipelineSet, Stage, Verdict};
pub use router::{ParamKind, ParamSpec, Route, RouteError, RouteOptions, RouteTable};
pub use server::Server;
pub use state::{ServerState, ServerStats};
pub use supervisor::Supervisor;
