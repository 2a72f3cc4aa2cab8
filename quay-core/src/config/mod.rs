mod env;
mod settings;

pub use env::is_production;
pub use settings::{
    AppSettings, ApplicationSettings, AuthMiddlewareSettings, CorsSettings, CsrfSettings,
    DatabasePoolSettings, JwtSettings, RateLimitSettings, SecurityHeaderSettings,
    SecurityMiddlewareSettings, SecuritySettings, ServerSettings, SessionSettings, SslSettings,
};

use std::path::{Path, PathBuf};
use std::sync::RwLock;

use tracing::{info, warn};

/// Error type for configuration operations.
#[derive(Debug)]
pub enum ConfigError {
    /// Reading the configuration file failed.
    Io(String),
    /// The file is not valid JSON, or a section has the wrong kind.
    Parse(String),
    /// The document root is not a JSON object.
    NotAnObject,
    /// A `${VAR}` referenced an unset variable with no built-in default.
    MissingEnv(String),
    /// A critical secret was left at its default or is too weak for production.
    WeakSecret(String),
    /// Malformed placeholder or other structural problem in the raw text.
    Invalid(String),
}

impl std::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConfigError::Io(msg) => write!(f, "Config read error: {msg}"),
            ConfigError::Parse(msg) => write!(f, "Config parse error: {msg}"),
            ConfigError::NotAnObject => write!(f, "Config root must be a JSON object"),
            ConfigError::MissingEnv(name) => {
                write!(f, "Environment variable '{name}' is not set")
            }
            ConfigError::WeakSecret(name) => write!(
                f,
                "Environment variable '{name}' is unset, default, or too weak for production"
            ),
            ConfigError::Invalid(msg) => write!(f, "Invalid configuration: {msg}"),
        }
    }
}

impl std::error::Error for ConfigError {}

struct Loaded {
    raw: serde_json::Value,
    settings: AppSettings,
}

/// Owner of the configuration document.
///
/// Construct one with [`ConfigStore::initialize`] and share it as
/// `Arc<ConfigStore>`. Readers get owned copies ([`snapshot`], [`settings`]);
/// the only mutation path is [`reload`], which swaps the whole document under
/// the internal lock.
///
/// [`snapshot`]: ConfigStore::snapshot
/// [`settings`]: ConfigStore::settings
/// [`reload`]: ConfigStore::reload
pub struct ConfigStore {
    path: PathBuf,
    inner: RwLock<Loaded>,
}

impl ConfigStore {
    /// Load `{base_dir}/config.json`, substituting `${VAR}` tokens first.
    ///
    /// `.env` files next to the config are loaded into the process
    /// environment beforehand and never overwrite already-set variables.
    pub fn initialize(base_dir: &Path) -> Result<Self, ConfigError> {
        let path = base_dir.join("config.json");
        let _ = dotenvy::from_path(base_dir.join(".env"));
        let loaded = Self::load_file(&path)?;
        info!(path = %path.display(), "configuration loaded");
        Ok(Self {
            path,
            inner: RwLock::new(loaded),
        })
    }

    fn load_file(path: &Path) -> Result<Loaded, ConfigError> {
        let raw_text =
            std::fs::read_to_string(path).map_err(|e| ConfigError::Io(e.to_string()))?;
        let substituted = env::substitute(&raw_text)?;
        let raw: serde_json::Value =
            serde_json::from_str(&substituted).map_err(|e| ConfigError::Parse(e.to_string()))?;
        if !raw.is_object() {
            return Err(ConfigError::NotAnObject);
        }
        let settings: AppSettings =
            serde_json::from_value(raw.clone()).map_err(|e| ConfigError::Parse(e.to_string()))?;
        Ok(Loaded { raw, settings })
    }

    /// Re-read and re-substitute the file, atomically replacing the current
    /// document. Returns `false` (keeping the old document) on any failure.
    pub fn reload(&self) -> bool {
        match Self::load_file(&self.path) {
            Ok(loaded) => {
                *self.inner.write().expect("config lock poisoned") = loaded;
                info!(path = %self.path.display(), "configuration reloaded");
                true
            }
            Err(err) => {
                warn!(error = %err, "configuration reload failed, keeping previous document");
                false
            }
        }
    }

    /// Owned deep copy of the raw document.
    pub fn snapshot(&self) -> serde_json::Value {
        self.inner.read().expect("config lock poisoned").raw.clone()
    }

    /// Owned copy of the typed settings record.
    pub fn settings(&self) -> AppSettings {
        self.inner
            .read()
            .expect("config lock poisoned")
            .settings
            .clone()
    }

    /// Absolute path of the backing file.
    pub fn file_path(&self) -> &Path {
        &self.path
    }
}
