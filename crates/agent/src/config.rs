//! Exporter configuration
//!
//! Layers, lowest precedence first: built-in defaults, an optional config
//! file, `OOMKILL_*` environment variables, command-line flags.

use anyhow::{bail, Context, Result};
use clap::Parser;
use oomkill_agent_lib::{
    extract::{DEFAULT_OOM_MATCH_PATTERN, DEFAULT_PATTERN},
    kmsg::DEFAULT_KMSG_PATH,
    runtime::DEFAULT_DOCKER_HOST,
    ExtractorConfig,
};
use serde::Deserialize;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

/// Export OOM kills of Kubernetes containers from the kernel log as Prometheus metrics
#[derive(Debug, Parser)]
#[command(name = "oomkill-exporter")]
#[command(version, about, long_about = None)]
pub struct Cli {
    /// Configuration file (TOML, YAML or JSON)
    #[arg(long, env = "OOMKILL_CONFIG")]
    pub config: Option<PathBuf>,

    /// The address to listen on for HTTP requests
    #[arg(long)]
    pub listen_address: Option<String>,

    /// Pattern extracting the pod UID and container ID from OOM kill lines
    #[arg(long)]
    pub regexp_pattern: Option<String>,

    /// Coarse OOM test used when the pattern captures only the pod UID
    #[arg(long)]
    pub oom_match_pattern: Option<String>,

    /// Kernel log device or file to read
    #[arg(long)]
    pub kmsg_path: Option<String>,

    /// Count OOM kills already in the kernel ring buffer at startup
    #[arg(long)]
    pub replay_kmsg: bool,

    /// Docker daemon endpoint
    #[arg(long)]
    pub docker_host: Option<String>,

    /// Timeout for each container runtime request, in seconds
    #[arg(long)]
    pub runtime_timeout_secs: Option<u64>,

    /// Extra container label to export as a metric label (repeatable)
    #[arg(long = "extra-label")]
    pub extra_labels: Vec<String>,

    /// Node name reported in logs
    #[arg(long)]
    pub node_name: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct AgentConfig {
    #[serde(default = "default_listen_address")]
    pub listen_address: String,

    #[serde(default = "default_regexp_pattern")]
    pub regexp_pattern: String,

    #[serde(default = "default_oom_match_pattern")]
    pub oom_match_pattern: String,

    #[serde(default = "default_kmsg_path")]
    pub kmsg_path: String,

    #[serde(default)]
    pub replay_kmsg: bool,

    #[serde(default = "default_docker_host")]
    pub docker_host: String,

    #[serde(default = "default_runtime_timeout")]
    pub runtime_timeout_secs: u64,

    #[serde(default)]
    pub extra_labels: Vec<String>,

    /// Node name from Kubernetes downward API
    #[serde(default = "default_node_name")]
    pub node_name: String,
}

fn default_listen_address() -> String {
    "0.0.0.0:9102".to_string()
}

fn default_regexp_pattern() -> String {
    DEFAULT_PATTERN.to_string()
}

fn default_oom_match_pattern() -> String {
    DEFAULT_OOM_MATCH_PATTERN.to_string()
}

fn default_kmsg_path() -> String {
    DEFAULT_KMSG_PATH.to_string()
}

fn default_docker_host() -> String {
    std::env::var("DOCKER_HOST").unwrap_or_else(|_| DEFAULT_DOCKER_HOST.to_string())
}

fn default_runtime_timeout() -> u64 {
    5
}

fn default_node_name() -> String {
    std::env::var("NODE_NAME").unwrap_or_else(|_| "unknown".to_string())
}

impl AgentConfig {
    /// Load configuration from file, environment and command line
    pub fn load(cli: &Cli) -> Result<Self> {
        let mut builder = config::Config::builder();

        if let Some(path) = &cli.config {
            builder = builder.add_source(config::File::from(path.as_path()));
        }

        builder = builder
            .add_source(
                config::Environment::with_prefix("OOMKILL")
                    .try_parsing(true)
                    .list_separator(",")
                    .with_list_parse_key("extra_labels"),
            )
            .set_override_option("listen_address", cli.listen_address.clone())?
            .set_override_option("regexp_pattern", cli.regexp_pattern.clone())?
            .set_override_option("oom_match_pattern", cli.oom_match_pattern.clone())?
            .set_override_option("kmsg_path", cli.kmsg_path.clone())?
            .set_override_option("docker_host", cli.docker_host.clone())?
            .set_override_option("runtime_timeout_secs", cli.runtime_timeout_secs)?
            .set_override_option("node_name", cli.node_name.clone())?;

        if cli.replay_kmsg {
            builder = builder.set_override("replay_kmsg", true)?;
        }
        if !cli.extra_labels.is_empty() {
            builder = builder.set_override("extra_labels", cli.extra_labels.clone())?;
        }

        let config: Self = builder
            .build()
            .context("Failed to read configuration")?
            .try_deserialize()
            .context("Invalid configuration")?;

        if config.runtime_timeout_secs == 0 {
            bail!("runtime_timeout_secs must be at least 1 second");
        }

        Ok(config)
    }

    /// Listen address as a socket address; `:9102` binds all interfaces
    pub fn listen_addr(&self) -> Result<SocketAddr> {
        let address = if self.listen_address.starts_with(':') {
            format!("0.0.0.0{}", self.listen_address)
        } else {
            self.listen_address.clone()
        };

        address
            .parse()
            .with_context(|| format!("Invalid listen address {:?}", self.listen_address))
    }

    pub fn extractor_config(&self) -> ExtractorConfig {
        ExtractorConfig {
            pattern: self.regexp_pattern.clone(),
            oom_match_pattern: self.oom_match_pattern.clone(),
        }
    }

    pub fn runtime_timeout(&self) -> Duration {
        Duration::from_secs(self.runtime_timeout_secs)
    }
}
