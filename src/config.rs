//! Configuración del servidor leída de variables de entorno (`.env` incluido)

use std::env;
use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Valor inválido para {name}: '{value}'")]
    Invalid { name: &'static str, value: String },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StoreBackend {
    MongoDb,
    Memory,
}

#[derive(Debug, Clone)]
pub struct Settings {
    pub store_backend: StoreBackend,
    /// Las transacciones exigen un replica set
    pub mongodb_uri: String,
    pub mongodb_database: String,
    pub bind_address: String,
    pub lock_timeout: Duration,
    /// Token del administrador inicial, si se quiere uno
    pub admin_token: Option<String>,
    pub seed_sample_data: bool,
    pub static_dir: PathBuf,
    /// Peticiones por IP a `/api` en cada ventana
    pub rate_limit_max_requests: u32,
    pub rate_limit_window: Duration,
}

impl Settings {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|name| env::var(name).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let store_backend = match lookup("STORE_BACKEND").as_deref() {
            None | Some("mongodb") => StoreBackend::MongoDb,
            Some("memory") => StoreBackend::Memory,
            Some(other) => {
                return Err(ConfigError::Invalid {
                    name: "STORE_BACKEND",
                    value: other.to_string(),
                })
            }
        };

        let lock_timeout_ms: u64 = parsed(&lookup, "LOCK_TIMEOUT_MS", 2000)?;
        let rate_limit_max_requests: u32 = parsed(&lookup, "RATE_LIMIT_MAX_REQUESTS", 100)?;
        let rate_limit_window_secs: u64 = parsed(&lookup, "RATE_LIMIT_WINDOW_SECS", 15 * 60)?;

        let seed_sample_data = match lookup("SEED_SAMPLE_DATA").as_deref() {
            None | Some("false") | Some("0") => false,
            Some("true") | Some("1") => true,
            Some(other) => {
                return Err(ConfigError::Invalid {
                    name: "SEED_SAMPLE_DATA",
                    value: other.to_string(),
                })
            }
        };

        Ok(Settings {
            store_backend,
            mongodb_uri: lookup("MONGODB_URI")
                .unwrap_or_else(|| "mongodb://localhost:27017/?replicaSet=rs0".to_string()),
            mongodb_database: lookup("MONGODB_DATABASE").unwrap_or_else(|| "table_booking".to_string()),
            bind_address: lookup("BIND_ADDRESS").unwrap_or_else(|| "0.0.0.0:8080".to_string()),
            lock_timeout: Duration::from_millis(lock_timeout_ms),
            admin_token: lookup("ADMIN_TOKEN").filter(|t| !t.trim().is_empty()),
            seed_sample_data,
            static_dir: lookup("STATIC_DIR")
                .map(PathBuf::from)
                .unwrap_or_else(|| PathBuf::from("./static")),
            rate_limit_max_requests,
            rate_limit_window: Duration::from_secs(rate_limit_window_secs),
        })
    }
}

fn parsed<T: std::str::FromStr>(
    lookup: &impl Fn(&str) -> Option<String>,
    name: &'static str,
    default: T,
) -> Result<T, ConfigError> {
    match lookup(name) {
        Some(value) => value.parse().map_err(|_| ConfigError::Invalid { name, value }),
        None => Ok(default),
    }
}
