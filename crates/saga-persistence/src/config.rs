//! Configuración de conexión desde variables de entorno.
//!
//! - `DATABASE_URL` (obligatoria)
//! - `DATABASE_MIN_CONNECTIONS` (por defecto 2)
//! - `DATABASE_MAX_CONNECTIONS` (por defecto 16)

use std::env;

use dotenvy::dotenv;
use once_cell::sync::Lazy;

use crate::error::PersistenceError;

// .env se carga una sola vez por proceso; si no existe se ignora.
static DOTENV_LOADED: Lazy<()> = Lazy::new(|| {
    let _ = dotenv();
});

pub const DEFAULT_MIN_CONNECTIONS: u32 = 2;
pub const DEFAULT_MAX_CONNECTIONS: u32 = 16;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DbConfig {
    pub url: String,
    pub min_connections: u32,
    pub max_connections: u32,
}

impl DbConfig {
    pub fn new(url: impl Into<String>) -> Self {
        Self { url: url.into(),
               min_connections: DEFAULT_MIN_CONNECTIONS,
               max_connections: DEFAULT_MAX_CONNECTIONS }
    }

    pub fn from_env() -> Result<Self, PersistenceError> {
        Lazy::force(&DOTENV_LOADED);
        let url = env::var("DATABASE_URL").map_err(|_| PersistenceError::Configuration("DATABASE_URL is not set".into()))?;
        Ok(Self { url,
                  min_connections: parse_or("DATABASE_MIN_CONNECTIONS", DEFAULT_MIN_CONNECTIONS),
                  max_connections: parse_or("DATABASE_MAX_CONNECTIONS", DEFAULT_MAX_CONNECTIONS) })
    }
}

fn parse_or(var: &str, default: u32) -> u32 {
    match env::var(var) {
        Ok(raw) => raw.parse().unwrap_or_else(|_| {
                                  log::warn!("{var}={raw} is not a valid number; using {default}");
                                  default
                              }),
        Err(_) => default,
    }
}

/// Fuerza la carga de `.env` desde binarios que leen variables antes de
/// llamar a `DbConfig::from_env`.
pub fn init_dotenv() {
    Lazy::force(&DOTENV_LOADED);
}
