use std::sync::atomic::{AtomicU64, AtomicU8, Ordering};
use std::sync::RwLock;

use chrono::{DateTime, Utc};

/// Lifecycle state of a server run. Transitions are monotone within one run:
/// `Stopped → Starting → Running → Stopping → Stopped`; `Error` is terminal.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ServerState {
    Initializing,
    Starting,
    Running,
    Stopping,
    Stopped,
    Error,
    Unknown,
}

impl ServerState {
    fn from_u8(value: u8) -> Self {
        match value {
            0 => ServerState::Initializing,
            1 => ServerState::Starting,
            2 => ServerState::Running,
            3 => ServerState::Stopping,
            4 => ServerState::Stopped,
            5 => ServerState::Error,
            _ => ServerState::Unknown,
        }
    }

    fn as_u8(self) -> u8 {
        match self {
            ServerState::Initializing => 0,
            ServerState::Starting => 1,
            ServerState::Running => 2,
            ServerState::Stopping => 3,
            ServerState::Stopped => 4,
            ServerState::Error => 5,
            ServerState::Unknown => 6,
        }
    }
}

impl std::fmt::Display for ServerState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            ServerState::Initializing => "initializing",
            ServerState::Starting => "starting",
            ServerState::Running => "running",
            ServerState::Stopping => "stopping",
            ServerState::Stopped => "stopped",
            ServerState::Error => "error",
            ServerState::Unknown => "unknown",
        };
        f.write_str(name)
    }
}

/// Shared run counters. The engine mutates these on the request path, so
/// everything is atomic; the state byte and startup time change rarely.
pub struct ServerStats {
    state: AtomicU8,
    pub active_connections: AtomicU64,
    pub total_requests: AtomicU64,
    pub failed_requests: AtomicU64,
    startup_time: RwLock<Option<DateTime<Utc>>>,
}

impl ServerStats {
    pub fn new() -> Self {
        Self {
            state: AtomicU8::new(ServerState::Initializing.as_u8()),
            active_connections: AtomicU64::new(0),
            total_requests: AtomicU64::new(0),
            failed_requests: AtomicU64::new(0),
            startup_time: RwLock::new(None),
        }
    }

    pub fn state(&self) -> ServerState {
        ServerState::from_u8(self.state.load(Ordering::SeqCst))
    }

    pub fn set_state(&self, state: ServerState) {
        self.state.store(state.as_u8(), Ordering::SeqCst);
    }

    pub fn mark_started(&self) {
        *self.startup_time.write().expect("stats lock poisoned") = Some(Utc::now());
    }

    pub fn startup_time(&self) -> Option<DateTime<Utc>> {
        *self.startup_time.read().expect("stats lock poisoned")
    }

    pub fn snapshot(&self) -> StatsSnapshot {
        let startup_time = self.startup_time();
        StatsSnapshot {
            state: self.state(),
            active_connections: self.active_connections.load(Ordering::SeqCst),
            total_requests: self.total_requests.load(Ordering::SeqCst),
            failed_requests: self.failed_requests.load(Ordering::SeqCst),
            uptime_seconds: startup_time
                .map(|t| (Utc::now() - t).num_seconds().max(0) as u64)
                .unwrap_or(0),
            startup_time_utc: startup_time,
        }
    }
}

impl Default for ServerStats {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Clone, Debug)]
pub struct StatsSnapshot {
    pub state: ServerState,
    pub active_connections: u64,
    pub total_requests: u64,
    pub failed_requests: u64,
    pub uptime_seconds: u64,
    pub startup_time_utc: Option<DateTime<Utc>>,
}
