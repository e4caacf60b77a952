use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::address;

/// Global configuration for the reconfiguration engine
#[derive(Debug, Deserialize, Clone, Default)]
pub struct Config {
    /// Consul (state store and service discovery) settings
    #[serde(default)]
    pub consul: ConsulConfig,

    /// Filesystem locations for templates and rendered configuration
    #[serde(default)]
    pub paths: PathsConfig,

    /// External template renderer settings
    #[serde(default)]
    pub renderer: RendererConfig,

    /// HAProxy process settings
    #[serde(default)]
    pub haproxy: HaProxyConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct ConsulConfig {
    /// Consul address, with or without scheme (default: http://localhost:8500)
    #[serde(default = "default_consul_address")]
    pub address: String,

    /// Timeout for each KV or catalog request in seconds (default: 10)
    #[serde(default = "default_request_timeout")]
    pub request_timeout_secs: u64,
}

impl Default for ConsulConfig {
    fn default() -> Self {
        Self {
            address: default_consul_address(),
            request_timeout_secs: default_request_timeout(),
        }
    }
}

impl ConsulConfig {
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct PathsConfig {
    /// Directory for template sources and the proxy base template
    #[serde(default = "default_templates_dir")]
    pub templates_dir: PathBuf,

    /// Directory for rendered fragments and the assembled proxy config
    #[serde(default = "default_configs_dir")]
    pub configs_dir: PathBuf,
}

impl Default for PathsConfig {
    fn default() -> Self {
        Self {
            templates_dir: default_templates_dir(),
            configs_dir: default_configs_dir(),
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct RendererConfig {
    /// consul-template binary (default: consul-template)
    #[serde(default = "default_renderer_binary")]
    pub binary: String,

    /// Maximum run time of one render in seconds (default: 60)
    #[serde(default = "default_renderer_timeout")]
    pub timeout_secs: u64,
}

impl Default for RendererConfig {
    fn default() -> Self {
        Self {
            binary: default_renderer_binary(),
            timeout_secs: default_renderer_timeout(),
        }
    }
}

impl RendererConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct HaProxyConfig {
    /// HAProxy binary (default: haproxy)
    #[serde(default = "default_haproxy_binary")]
    pub binary: String,

    /// PID file of the running instance
    #[serde(default = "default_pid_file")]
    pub pid_file: PathBuf,

    /// Assembled config file name, relative to `paths.configs_dir`
    #[serde(default = "default_config_file")]
    pub config_file: String,
}

impl Default for HaProxyConfig {
    fn default() -> Self {
        Self {
            binary: default_haproxy_binary(),
            pid_file: default_pid_file(),
            config_file: default_config_file(),
        }
    }
}

/// Process-wide settings shared by every reconfiguration
#[derive(Debug, Clone, PartialEq)]
pub struct DeploymentContext {
    /// Consul address, always with a scheme
    pub consul_address: String,
    pub templates_dir: PathBuf,
    pub configs_dir: PathBuf,
}

impl DeploymentContext {
    pub fn new(consul_address: &str, templates_dir: &Path, configs_dir: &Path) -> Self {
        Self {
            consul_address: address::normalize(consul_address),
            templates_dir: templates_dir.to_path_buf(),
            configs_dir: configs_dir.to_path_buf(),
        }
    }
}

// Default value functions
fn default_consul_address() -> String {
    "http://localhost:8500".to_string()
}

fn default_request_timeout() -> u64 {
    10
}

fn default_templates_dir() -> PathBuf {
    PathBuf::from("/cfg/tmpl")
}

fn default_configs_dir() -> PathBuf {
    PathBuf::from("/cfg")
}

fn default_renderer_binary() -> String {
    "consul-template".to_string()
}

fn default_renderer_timeout() -> u64 {
    60
}

fn default_haproxy_binary() -> String {
    "haproxy".to_string()
}

fn default_pid_file() -> PathBuf {
    PathBuf::from("/var/run/haproxy.pid")
}

fn default_config_file() -> String {
    "haproxy.cfg".to_string()
}

impl Config {
    pub fn load<P: AsRef<Path>>(path: P) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: Config = toml::from_str(&content)?;
        config.validate()?;
        Ok(config)
    }

    /// Validate all configuration
    pub fn validate(&self) -> anyhow::Result<()> {
        let mut errors = Vec::new();

        if self.consul.address.trim().is_empty() {
            errors.push("consul.address must not be empty".to_string());
        }
        if self.consul.request_timeout_secs == 0 {
            errors.push("consul.request_timeout_secs must be greater than 0".to_string());
        }
        if self.paths.templates_dir.as_os_str().is_empty() {
            errors.push("paths.templates_dir must not be empty".to_string());
        }
        if self.paths.configs_dir.as_os_str().is_empty() {
            errors.push("paths.configs_dir must not be empty".to_string());
        }
        if self.renderer.binary.trim().is_empty() {
            errors.push("renderer.binary must not be empty".to_string());
        }
        if self.renderer.timeout_secs == 0 {
            errors.push("renderer.timeout_secs must be greater than 0".to_string());
        }
        if self.haproxy.config_file.trim().is_empty() {
            errors.push("haproxy.config_file must not be empty".to_string());
        }

        if !errors.is_empty() {
            anyhow::bail!("Configuration errors:\n  - {}", errors.join("\n  - "));
        }

        Ok(())
    }

    pub fn deployment_context(&self) -> DeploymentContext {
        DeploymentContext::new(
            &self.consul.address,
            &self.paths.templates_dir,
            &self.paths.configs_dir,
        )
    }

    /// Path of the assembled HAProxy config
    pub fn haproxy_config_path(&self) -> PathBuf {
        self.paths.configs_dir.join(&self.haproxy.config_file)
    }
}
