//! Daemon configuration, read from the environment.

/// Runtime configuration for the daemon.
#[derive(Debug, Clone)]
pub struct Config {
    pub host: String,
    pub port: u16,
    /// Finished tasks retained for polling before eviction.
    pub task_history_capacity: usize,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 8080,
            task_history_capacity: 100,
        }
    }
}

impl Config {
    /// Build a config from `MGMTD_*` environment variables, falling
    /// back to defaults for anything unset or unparsable.
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            host: std::env::var("MGMTD_HOST").unwrap_or(defaults.host),
            port: std::env::var("MGMTD_PORT")
                .ok()
                .and_then(|value| value.parse().ok())
                .unwrap_or(defaults.port),
            task_history_capacity: std::env::var("MGMTD_TASK_HISTORY")
                .ok()
                .and_then(|value| value.parse().ok())
                .unwrap_or(defaults.task_history_capacity),
        }
    }
}
