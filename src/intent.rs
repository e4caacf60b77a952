//! Routing intent: the desired proxy routing for one service

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

use crate::error::ReconfigureError;

/// How service paths are matched by the proxy
#[derive(Debug, Deserialize, Serialize, Clone, Copy, Default, PartialEq, Eq)]
pub enum PathType {
    /// Match on path prefix (`path_beg`)
    #[default]
    #[serde(rename = "path_beg", alias = "prefix")]
    Prefix,
    /// Match on regular expression (`path_reg`)
    #[serde(rename = "path_reg", alias = "regex")]
    Regex,
}

impl PathType {
    /// HAProxy ACL keyword for this match mode
    pub fn as_keyword(&self) -> &'static str {
        match self {
            PathType::Prefix => "path_beg",
            PathType::Regex => "path_reg",
        }
    }

    /// Lenient parse used when reading state back: unknown values fall back to prefix
    pub fn parse(value: &str) -> Self {
        match value.trim().to_lowercase().as_str() {
            "path_reg" | "regex" => PathType::Regex,
            _ => PathType::Prefix,
        }
    }
}

/// Routing configuration requested for a single service
#[derive(Debug, Deserialize, Serialize, Clone, Default, PartialEq)]
pub struct RoutingIntent {
    /// Service name, also used as the Consul service and KV namespace
    pub service_name: String,

    /// Paths routed to the service, in order
    #[serde(default)]
    pub service_path: Vec<String>,

    /// Host header the service answers to
    pub service_domain: Option<String>,

    /// Deployment color (e.g. "blue", "green")
    pub service_color: Option<String>,

    #[serde(default)]
    pub path_type: PathType,

    /// Omit health checks on generated server lines
    #[serde(default)]
    pub skip_check: bool,

    /// Operator-supplied frontend template, used instead of the generated one
    pub consul_template_fe_path: Option<PathBuf>,

    /// Operator-supplied backend template, used instead of the generated one
    pub consul_template_be_path: Option<PathBuf>,
}

impl RoutingIntent {
    /// Create an intent with defaults for everything but the name
    pub fn new(service_name: impl Into<String>) -> Self {
        Self {
            service_name: service_name.into(),
            ..Default::default()
        }
    }

    /// Set the routed paths (builder pattern)
    pub fn with_paths<I, S>(mut self, paths: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.service_path = paths.into_iter().map(Into::into).collect();
        self
    }

    /// Set the domain (builder pattern)
    pub fn with_domain(mut self, domain: &str) -> Self {
        self.service_domain = Some(domain.to_string());
        self
    }

    /// Set the deployment color (builder pattern)
    pub fn with_color(mut self, color: &str) -> Self {
        self.service_color = Some(color.to_string());
        self
    }

    /// Domain if set and non-empty
    pub fn domain(&self) -> Option<&str> {
        self.service_domain.as_deref().filter(|d| !d.is_empty())
    }

    /// Color if set and non-empty
    pub fn color(&self) -> Option<&str> {
        self.service_color.as_deref().filter(|c| !c.is_empty())
    }

    /// Name the service is registered under in Consul
    pub fn lookup_name(&self) -> String {
        match self.color() {
            Some(color) => format!("{}-{}", self.service_name, color),
            None => self.service_name.clone(),
        }
    }

    /// Name of the generated HAProxy backend
    pub fn backend_name(&self) -> String {
        format!("{}-be", self.lookup_name())
    }

    pub fn validate(&self) -> Result<(), ReconfigureError> {
        if self.service_name.trim().is_empty() {
            return Err(ReconfigureError::InvalidIntent(
                "service name must not be empty".to_string(),
            ));
        }
        if self.service_name.contains('/') {
            return Err(ReconfigureError::InvalidIntent(format!(
                "service name '{}' must not contain '/'",
                self.service_name
            )));
        }
        Ok(())
    }
}
