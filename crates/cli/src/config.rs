//! Command-line and environment configuration.

use std::time::Duration;

use clap::{Args, ValueEnum};
use db::pool::PoolSettings;
use engine::EngineConfig;

#[derive(Debug, Clone, Copy, Default, ValueEnum)]
pub enum LogFormat {
    #[default]
    Text,
    Json,
}

#[derive(Debug, Args)]
pub struct DatabaseArgs {
    /// Postgres connection string.
    #[arg(long, env = "DATABASE_URL")]
    pub database_url: Option<String>,

    #[arg(long, env = "HOPPERFLOW_MAX_CONNECTIONS", default_value_t = 10)]
    pub max_connections: u32,
}

impl DatabaseArgs {
    pub fn pool_settings(&self) -> PoolSettings {
        PoolSettings {
            max_connections: self.max_connections,
            ..PoolSettings::default()
        }
    }
}

#[derive(Debug, Args)]
pub struct ServeArgs {
    /// Address the HTTP API binds to.
    #[arg(long, env = "HOPPERFLOW_BIND", default_value = "0.0.0.0:8080")]
    pub bind: String,

    #[command(flatten)]
    pub database: DatabaseArgs,

    /// Keep everything in memory instead of Postgres; state is lost on exit.
    #[arg(long, env = "HOPPERFLOW_IN_MEMORY")]
    pub in_memory: bool,

    /// Default wait for manual runs of event-triggered workflows.
    #[arg(long, env = "HOPPERFLOW_WAIT_TIMEOUT_SECS", default_value_t = 300)]
    pub wait_timeout_secs: u64,
}

impl ServeArgs {
    pub fn engine_config(&self) -> EngineConfig {
        EngineConfig {
            default_wait_timeout: Duration::from_secs(self.wait_timeout_secs),
            ..EngineConfig::default()
        }
    }
}
