use crate::error::{CheckerError, Result};
use std::env;

/// Application configuration loaded from environment variables.
#[derive(Debug, Clone)]
pub struct Config {
    pub manager: ManagerConfig,
    pub prober: ProberConfig,
    pub control_plane: ControlPlaneConfig,
    pub database: DatabaseConfig,
    pub log: LogConfig,
}

/// Scheduler tuning (spec §4.5).
#[derive(Debug, Clone)]
pub struct ManagerConfig {
    /// How often the Manager scans its schedule for due proxies (spec §4.5: ≈0.5s).
    pub tick_interval_ms: u64,
    /// How often the Manager re-syncs its schedule from the Store (spec §4.5: ≈30s).
    pub sync_interval_secs: u64,
    /// Number of Workers in the fleet.
    pub worker_count: usize,
    /// Per-Worker concurrency ceiling (spec §4.4 `max_in_flight`).
    pub worker_max_in_flight: usize,
}

/// Prober tuning (spec §4.3, §6).
#[derive(Debug, Clone)]
pub struct ProberConfig {
    /// Default `CheckDefinition.timeout` in seconds when omitted (spec §6: 2).
    pub default_timeout_secs: i32,
    /// Session profiles a probe's headers are drawn from at random (spec
    /// §4.3 step 3). Configured rather than a private constant so a
    /// deployment can swap the pool without a rebuild.
    pub session_profile_pool: Vec<crate::prober::SessionProfile>,
}

#[derive(Debug, Clone)]
pub struct ControlPlaneConfig {
    pub port: u16,
    pub host: String,
    pub cors_origins: Vec<String>,
}

#[derive(Debug, Clone)]
pub struct DatabaseConfig {
    pub host: String,
    pub port: u16,
    pub user: String,
    pub password: String,
    pub name: String,
    pub ssl_mode: String,
    pub max_connections: u32,
    pub min_connections: u32,
}

#[derive(Debug, Clone)]
pub struct LogConfig {
    pub level: String,
    pub format: String,
}

impl Config {
    /// Load configuration from environment variables.
    pub fn from_env() -> Result<Self> {
        Ok(Config {
            manager: ManagerConfig {
                tick_interval_ms: get_env_or("MANAGER_TICK_INTERVAL_MS", "500")
                    .parse()
                    .unwrap_or(500),
                sync_interval_secs: get_env_or("MANAGER_SYNC_INTERVAL_SECS", "30")
                    .parse()
                    .unwrap_or(30),
                worker_count: get_env_or("MANAGER_WORKER_COUNT", "4")
                    .parse()
                    .unwrap_or(4),
                worker_max_in_flight: get_env_or("WORKER_MAX_IN_FLIGHT", "32")
                    .parse()
                    .unwrap_or(32),
            },
            prober: ProberConfig {
                default_timeout_secs: get_env_or("PROBER_DEFAULT_TIMEOUT_SECS", "2")
                    .parse()
                    .unwrap_or(2),
                session_profile_pool: crate::prober::default_session_profiles(),
            },
            control_plane: ControlPlaneConfig {
                port: get_env_or("API_PORT", "8001").parse().map_err(|_| {
                    CheckerError::InvalidConfig("API_PORT must be a valid port number".into())
                })?,
                host: get_env_or("API_HOST", "0.0.0.0"),
                cors_origins: get_env_or("CORS_ORIGINS", "")
                    .split(',')
                    .map(|s| s.trim().to_string())
                    .filter(|s| !s.is_empty())
                    .collect(),
            },
            database: DatabaseConfig {
                host: get_env_or("DB_HOST", "localhost"),
                port: get_env_or("DB_PORT", "5432").parse().map_err(|_| {
                    CheckerError::InvalidConfig("DB_PORT must be a valid port number".into())
                })?,
                user: get_env_or("DB_USER", "proxychecker"),
                password: get_env_or("DB_PASSWORD", "proxychecker_password"),
                name: get_env_or("DB_NAME", "proxychecker"),
                ssl_mode: get_env_or("DB_SSLMODE", "disable"),
                max_connections: get_env_or("DB_MAX_CONNECTIONS", "50")
                    .parse()
                    .map_err(|_| {
                        CheckerError::InvalidConfig("DB_MAX_CONNECTIONS must be a valid number".into())
                    })?,
                min_connections: get_env_or("DB_MIN_CONNECTIONS", "5")
                    .parse()
                    .map_err(|_| {
                        CheckerError::InvalidConfig("DB_MIN_CONNECTIONS must be a valid number".into())
                    })?,
            },
            log: LogConfig {
                level: get_env_or("LOG_LEVEL", "info"),
                format: get_env_or("LOG_FORMAT", "json"),
            },
        })
    }

    pub fn database_url(&self) -> String {
        format!(
            "postgres://{}:{}@{}:{}/{}?sslmode={}",
            self.database.user,
            self.database.password,
            self.database.host,
            self.database.port,
            self.database.name,
            self.database.ssl_mode
        )
    }

    pub fn control_plane_addr(&self) -> String {
        format!("{}:{}", self.control_plane.host, self.control_plane.port)
    }
}

fn get_env_or(key: &str, default: &str) -> String {
    env::var(key).unwrap_or_else(|_| default.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_defaults() {
        let config = Config::from_env().unwrap();

        assert_eq!(config.control_plane.port, 8001);
        assert_eq!(config.database.host, "localhost");
        assert_eq!(config.manager.tick_interval_ms, 500);
        assert_eq!(config.manager.sync_interval_secs, 30);
        assert_eq!(config.prober.default_timeout_secs, 2);
    }
}
