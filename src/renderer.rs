//! External template rendering via consul-template

use async_trait::async_trait;
use std::fmt;
use std::path::PathBuf;
use std::process::Stdio;
use std::time::Duration;
use tokio::process::Command;
use tracing::{debug, warn};

use crate::error::ReconfigureError;

/// Which half of the proxy configuration a template produces
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Side {
    Front,
    Back,
}

impl Side {
    pub const ALL: [Side; 2] = [Side::Front, Side::Back];

    /// Suffix used in file names (`fe` / `be`)
    pub fn suffix(&self) -> &'static str {
        match self {
            Side::Front => "fe",
            Side::Back => "be",
        }
    }

    /// Stable template source file name for this side
    pub fn template_filename(&self) -> &'static str {
        match self {
            Side::Front => SERVICE_TEMPLATE_FE_FILENAME,
            Side::Back => SERVICE_TEMPLATE_BE_FILENAME,
        }
    }

    /// Rendered fragment file name for a service on this side
    pub fn rendered_filename(&self, service_name: &str) -> String {
        format!("{}-{}.cfg", service_name, self.suffix())
    }
}

impl fmt::Display for Side {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Side::Front => f.write_str("front"),
            Side::Back => f.write_str("back"),
        }
    }
}

pub const SERVICE_TEMPLATE_FE_FILENAME: &str = "service-formatted-fe.ctmpl";
pub const SERVICE_TEMPLATE_BE_FILENAME: &str = "service-formatted-be.ctmpl";

/// One renderer invocation: resolve `template` against Consul into `destination`
#[derive(Debug, Clone, PartialEq)]
pub struct RenderJob {
    pub side: Side,
    /// Consul address without scheme (`host:port`)
    pub consul_address: String,
    pub template: PathBuf,
    pub destination: PathBuf,
}

impl RenderJob {
    /// Command-line arguments for consul-template
    pub fn args(&self) -> Vec<String> {
        vec![
            "-consul".to_string(),
            self.consul_address.clone(),
            "-template".to_string(),
            format!("{}:{}", self.template.display(), self.destination.display()),
            "-once".to_string(),
        ]
    }
}

/// Renders a template file into a configuration fragment
#[async_trait]
pub trait TemplateRenderer: Send + Sync {
    async fn render(&self, job: &RenderJob) -> Result<(), ReconfigureError>;
}

/// Runs the consul-template binary once per job
#[derive(Debug, Clone)]
pub struct ConsulTemplate {
    binary: String,
    timeout: Duration,
}

impl ConsulTemplate {
    pub fn new(binary: impl Into<String>, timeout: Duration) -> Self {
        Self {
            binary: binary.into(),
            timeout,
        }
    }
}

#[async_trait]
impl TemplateRenderer for ConsulTemplate {
    async fn render(&self, job: &RenderJob) -> Result<(), ReconfigureError> {
        let args = job.args();
        debug!(binary = %self.binary, side = %job.side, ?args, "Running template renderer");

        let child = Command::new(&self.binary)
            .args(&args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| ReconfigureError::Render {
                side: job.side,
                reason: format!("failed to start {}: {}", self.binary, e),
            })?;

        // Dropping the wait future on timeout kills the child
        let output = match tokio::time::timeout(self.timeout, child.wait_with_output()).await {
            Ok(result) => result.map_err(|e| ReconfigureError::Render {
                side: job.side,
                reason: e.to_string(),
            })?,
            Err(_) => {
                warn!(side = %job.side, timeout_secs = self.timeout.as_secs(), "Template renderer timed out");
                return Err(ReconfigureError::Render {
                    side: job.side,
                    reason: format!("timed out after {}s", self.timeout.as_secs()),
                });
            }
        };

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(ReconfigureError::Render {
                side: job.side,
                reason: format!("{}: {}", output.status, stderr.trim()),
            });
        }

        Ok(())
    }
}
