//! Command line and environment configuration

use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

use clap::{Parser, Subcommand, ValueEnum};

use crate::error::{Error, Result};
use crate::provider::hcloud::DEFAULT_ENDPOINT;

#[derive(Parser, Debug)]
#[command(name = "floating-ip-operator")]
#[command(about = "Keeps Hetzner Cloud floating IPs assigned to healthy nodes", long_about = None)]
#[command(version)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Option<Command>,

    /// Hetzner Cloud API token
    #[arg(long, env = "HCLOUD_TOKEN", hide_env_values = true, global = true)]
    pub hcloud_token: Option<String>,

    /// Hetzner Cloud API endpoint
    #[arg(long, env = "HCLOUD_ENDPOINT", default_value = DEFAULT_ENDPOINT, global = true)]
    pub hcloud_endpoint: String,

    /// Path to a kubeconfig; in-cluster or default config is used otherwise
    #[arg(long, env = "KUBECONFIG_PATH", global = true)]
    pub kubeconfig: Option<PathBuf>,

    /// Timeout for a single provider request, in seconds
    #[arg(long, default_value_t = 10, global = true)]
    pub provider_timeout_secs: u64,

    /// Minimum time between two reconciles of the same FloatingIP, in seconds
    #[arg(long, default_value_t = 1, global = true)]
    pub debounce_secs: u64,

    /// Listen address for /healthz and /metrics
    #[arg(long, env = "METRICS_ADDR", default_value = "0.0.0.0:8080", global = true)]
    pub metrics_addr: SocketAddr,

    /// Log output format
    #[arg(
        long,
        env = "RUST_LOG_FORMAT",
        value_enum,
        default_value_t = LogFormat::Text,
        global = true
    )]
    pub log_format: LogFormat,

    /// Apply the FloatingIP CRD with server-side apply before starting
    #[arg(long, env = "INSTALL_CRD", global = true)]
    pub install_crd: bool,
}

#[derive(Subcommand, Debug, Clone, Copy, PartialEq, Eq)]
pub enum Command {
    /// Run the operator (default)
    Run,
    /// Print the FloatingIP CustomResourceDefinition as YAML
    Crd,
}

#[derive(ValueEnum, Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogFormat {
    Text,
    Json,
}

impl Cli {
    pub fn command(&self) -> Command {
        self.command.unwrap_or(Command::Run)
    }

    /// The API token, required to run the operator
    pub fn token(&self) -> Result<&str> {
        self.hcloud_token
            .as_deref()
            .filter(|t| !t.trim().is_empty())
            .ok_or_else(|| Error::ConfigError("HCLOUD_TOKEN must be set".to_string()))
    }

    pub fn provider_timeout(&self) -> Duration {
        Duration::from_secs(self.provider_timeout_secs.max(1))
    }

    pub fn debounce(&self) -> Duration {
        Duration::from_secs(self.debounce_secs)
    }
}
