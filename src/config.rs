use std::{env, net::SocketAddr, time::Duration};

use crate::error::AppError;

#[derive(Debug, Clone)]
pub struct AppConfig {
    pub database_url: String,
    pub listen_addr: SocketAddr,
    pub max_connections: u32,
    /// Interval of the background status sweep. `None` disables it.
    pub status_sweep_interval: Option<Duration>,
}

impl AppConfig {
    pub fn from_env() -> Result<Self, AppError> {
        let database_url =
            env::var("DATABASE_URL").unwrap_or_else(|_| "sqlite://wayfarer.db".to_string());
        let listen_addr: SocketAddr = env::var("APP_LISTEN_ADDR")
            .unwrap_or_else(|_| "127.0.0.1:3000".to_string())
            .parse()
            .map_err(|err| AppError::Config(format!("invalid APP_LISTEN_ADDR: {err}")))?;

        let max_connections = match env::var("DB_MAX_CONNECTIONS") {
            Ok(raw) => raw
                .parse()
                .map_err(|err| AppError::Config(format!("invalid DB_MAX_CONNECTIONS: {err}")))?,
            Err(_) => 10,
        };

        let status_sweep_interval = match env::var("STATUS_SWEEP_SECS") {
            Ok(raw) if !raw.trim().is_empty() => {
                let secs: u64 = raw
                    .trim()
                    .parse()
                    .map_err(|err| AppError::Config(format!("invalid STATUS_SWEEP_SECS: {err}")))?;
                (secs > 0).then(|| Duration::from_secs(secs))
            }
            _ => None,
        };

        Ok(Self {
            database_url,
            listen_addr,
            max_connections,
            status_sweep_interval,
        })
    }
}
