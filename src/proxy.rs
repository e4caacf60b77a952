//! Proxy control: configuration assembly and hot reload
//!
//! The engine only needs two operations from a proxy, so any reverse proxy
//! adapter implements [`Proxy`]. [`HaProxy`] is the adapter used by the
//! binary.

use anyhow::{Context, Result};
use async_trait::async_trait;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use tokio::process::Command;
use tracing::{debug, info};

/// Base template looked up in the templates directory
pub const BASE_TEMPLATE_FILENAME: &str = "haproxy.tmpl";

/// Header used when no base template exists
const DEFAULT_BASE_TEMPLATE: &str = "global
    pidfile /var/run/haproxy.pid
    tune.ssl.default-dh-param 2048

defaults
    mode    http
    balance roundrobin
    option  dontlognull
    option  forwardfor
    option  http-server-close
    timeout connect 5s
    timeout client  20s
    timeout server  20s
    timeout queue   30s
    timeout http-request 5s
    timeout http-keep-alive 15s

frontend services
    bind *:80
    mode http
";

/// A reverse proxy that can rebuild and reload its configuration
#[async_trait]
pub trait Proxy: Send + Sync {
    /// Combine all per-service fragments into the proxy's configuration
    async fn assemble_config(&self, templates_dir: &Path, configs_dir: &Path) -> Result<()>;

    /// Apply the assembled configuration without dropping traffic
    async fn reload(&self) -> Result<()>;
}

/// HAProxy adapter
#[derive(Debug, Clone)]
pub struct HaProxy {
    binary: String,
    pid_file: PathBuf,
    config_path: PathBuf,
}

impl HaProxy {
    /// `config_path` is where `assemble_config` output is loaded from on reload
    pub fn new(binary: impl Into<String>, pid_file: PathBuf, config_path: PathBuf) -> Self {
        Self {
            binary: binary.into(),
            pid_file,
            config_path,
        }
    }

    /// Arguments for starting HAProxy, taking over from `old_pid` if given
    pub fn reload_args(&self, old_pid: Option<&str>) -> Vec<String> {
        let mut args = vec![
            "-f".to_string(),
            self.config_path.display().to_string(),
            "-D".to_string(),
            "-p".to_string(),
            self.pid_file.display().to_string(),
        ];
        if let Some(pid) = old_pid {
            args.push("-sf".to_string());
            args.push(pid.to_string());
        }
        args
    }

    async fn read_pid(&self) -> Result<Option<String>> {
        match tokio::fs::read_to_string(&self.pid_file).await {
            Ok(content) => {
                let pid = content.trim();
                Ok((!pid.is_empty()).then(|| pid.to_string()))
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e)
                .with_context(|| format!("Failed to read pid file {}", self.pid_file.display())),
        }
    }
}

/// Build the full configuration text: base template, frontends, then backends
pub async fn assemble(templates_dir: &Path, configs_dir: &Path) -> Result<String> {
    let base_path = templates_dir.join(BASE_TEMPLATE_FILENAME);
    let mut config = match tokio::fs::read_to_string(&base_path).await {
        Ok(content) => content,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => DEFAULT_BASE_TEMPLATE.to_string(),
        Err(e) => {
            return Err(e)
                .with_context(|| format!("Failed to read base template {}", base_path.display()))
        }
    };

    let mut fronts = Vec::new();
    let mut backs = Vec::new();
    let mut entries = tokio::fs::read_dir(configs_dir)
        .await
        .with_context(|| format!("Failed to list {}", configs_dir.display()))?;
    while let Some(entry) = entries.next_entry().await? {
        let name = entry.file_name().to_string_lossy().to_string();
        if name.ends_with("-fe.cfg") {
            fronts.push(entry.path());
        } else if name.ends_with("-be.cfg") {
            backs.push(entry.path());
        }
    }
    fronts.sort();
    backs.sort();

    for path in fronts.iter().chain(backs.iter()) {
        let fragment = tokio::fs::read_to_string(path)
            .await
            .with_context(|| format!("Failed to read fragment {}", path.display()))?;
        if !config.ends_with('\n') {
            config.push('\n');
        }
        config.push_str(&fragment);
        debug!(fragment = %path.display(), "Added config fragment");
    }

    Ok(config)
}

#[async_trait]
impl Proxy for HaProxy {
    async fn assemble_config(&self, templates_dir: &Path, configs_dir: &Path) -> Result<()> {
        let config = assemble(templates_dir, configs_dir).await?;
        tokio::fs::write(&self.config_path, config)
            .await
            .with_context(|| format!("Failed to write {}", self.config_path.display()))?;
        info!(path = %self.config_path.display(), "Proxy configuration assembled");
        Ok(())
    }

    async fn reload(&self) -> Result<()> {
        let old_pid = self.read_pid().await?;
        let args = self.reload_args(old_pid.as_deref());
        debug!(binary = %self.binary, ?args, "Reloading proxy");

        let output = Command::new(&self.binary)
            .args(&args)
            .stdin(Stdio::null())
            .output()
            .await
            .with_context(|| format!("Failed to run {}", self.binary))?;

        if !output.status.success() {
            anyhow::bail!(
                "{} exited with {}: {}",
                self.binary,
                output.status,
                String::from_utf8_lossy(&output.stderr).trim()
            );
        }

        info!(old_pid = ?old_pid, "Proxy reloaded");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn haproxy(dir: &Path, binary: &str) -> HaProxy {
        HaProxy::new(binary, dir.join("haproxy.pid"), dir.join("haproxy.cfg"))
    }

    #[tokio::test]
    async fn test_assemble_orders_header_fronts_backs() {
        let tmpl = TempDir::new().unwrap();
        let cfg = TempDir::new().unwrap();
        std::fs::write(tmpl.path().join(BASE_TEMPLATE_FILENAME), "HEADER\n").unwrap();
        std::fs::write(cfg.path().join("b-be.cfg"), "BACK_B").unwrap();
        std::fs::write(cfg.path().join("a-be.cfg"), "BACK_A").unwrap();
        std::fs::write(cfg.path().join("b-fe.cfg"), "FRONT_B").unwrap();
        std::fs::write(cfg.path().join("a-fe.cfg"), "FRONT_A").unwrap();
        std::fs::write(cfg.path().join("notes.txt"), "IGNORED").unwrap();

        let config = assemble(tmpl.path(), cfg.path()).await.unwrap();
        assert_eq!(config, "HEADER\nFRONT_A\nFRONT_B\nBACK_A\nBACK_B");
    }

    #[tokio::test]
    async fn test_assemble_uses_default_header() {
        let tmpl = TempDir::new().unwrap();
        let cfg = TempDir::new().unwrap();
        std::fs::write(cfg.path().join("api-fe.cfg"), "    acl url_api path_beg /api").unwrap();

        let config = assemble(tmpl.path(), cfg.path()).await.unwrap();
        assert!(config.starts_with("global\n"));
        assert!(config.contains("frontend services\n    bind *:80\n"));
        assert!(config.ends_with("acl url_api path_beg /api"));
    }

    #[tokio::test]
    async fn test_assemble_config_writes_file() {
        let tmpl = TempDir::new().unwrap();
        let cfg = TempDir::new().unwrap();
        std::fs::write(tmpl.path().join(BASE_TEMPLATE_FILENAME), "HEADER").unwrap();
        let proxy = haproxy(cfg.path(), "haproxy");

        proxy.assemble_config(tmpl.path(), cfg.path()).await.unwrap();
        let written = std::fs::read_to_string(cfg.path().join("haproxy.cfg")).unwrap();
        assert_eq!(written, "HEADER");
    }

    #[tokio::test]
    async fn test_assemble_fails_for_missing_configs_dir() {
        let tmpl = TempDir::new().unwrap();
        let err = assemble(tmpl.path(), Path::new("/nonexistent/configs")).await;
        assert!(err.is_err());
    }

    #[test]
    fn test_reload_args() {
        let proxy = HaProxy::new("haproxy", "/run/haproxy.pid".into(), "/cfg/haproxy.cfg".into());
        assert_eq!(
            proxy.reload_args(None),
            vec!["-f", "/cfg/haproxy.cfg", "-D", "-p", "/run/haproxy.pid"]
        );
        assert_eq!(
            proxy.reload_args(Some("123")),
            vec!["-f", "/cfg/haproxy.cfg", "-D", "-p", "/run/haproxy.pid", "-sf", "123"]
        );
    }

    #[tokio::test]
    async fn test_read_pid() {
        let dir = TempDir::new().unwrap();
        let proxy = haproxy(dir.path(), "haproxy");
        assert_eq!(proxy.read_pid().await.unwrap(), None);

        std::fs::write(dir.path().join("haproxy.pid"), "123\n").unwrap();
        assert_eq!(proxy.read_pid().await.unwrap(), Some("123".to_string()));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_reload_reports_failure() {
        let dir = TempDir::new().unwrap();
        assert!(haproxy(dir.path(), "false").reload().await.is_err());
        assert!(haproxy(dir.path(), "true").reload().await.is_ok());
    }
}
