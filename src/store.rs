//! Consul KV persistence of routing intent
//!
//! Each intent is stored as seven independent keys under
//! `docker-flow/<service>/`. Writes are not transactional: a failure part
//! way through leaves the keys written so far in place.

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::time::Duration;

use reqwest::StatusCode;
use tracing::{debug, info};

use crate::address;
use crate::error::ReconfigureError;
use crate::intent::{PathType, RoutingIntent};

/// KV prefix all routing intent lives under
pub const KV_PREFIX: &str = "docker-flow";

pub const COLOR_KEY: &str = "color";
pub const PATH_KEY: &str = "path";
pub const DOMAIN_KEY: &str = "domain";
pub const PATH_TYPE_KEY: &str = "pathtype";
pub const SKIP_CHECK_KEY: &str = "skipcheck";
pub const CONSUL_TEMPLATE_FE_PATH_KEY: &str = "consultemplatefepath";
pub const CONSUL_TEMPLATE_BE_PATH_KEY: &str = "consultemplatebepath";

/// Client for the Consul KV and catalog HTTP APIs
#[derive(Debug, Clone)]
pub struct StateStore {
    base_url: String,
    client: reqwest::Client,
}

impl StateStore {
    /// Create a client for the store at `address` (scheme optional)
    pub fn new(address: &str, request_timeout: Duration) -> anyhow::Result<Self> {
        let client = reqwest::Client::builder().timeout(request_timeout).build()?;
        Ok(Self {
            base_url: address::normalize(address),
            client,
        })
    }

    /// Same HTTP client pointed at another address
    pub fn with_address(&self, address: &str) -> Self {
        Self {
            base_url: address::normalize(address),
            client: self.client.clone(),
        }
    }

    /// Normalized base URL, always carrying a scheme
    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn key_url(&self, service_name: &str, key: &str) -> String {
        format!(
            "{}/v1/kv/{}/{}/{}",
            self.base_url.trim_end_matches('/'),
            KV_PREFIX,
            service_name,
            key
        )
    }

    /// Write every field of the intent, one PUT per key
    pub async fn persist(&self, intent: &RoutingIntent) -> Result<(), ReconfigureError> {
        for (key, value) in encode(intent) {
            let url = self.key_url(&intent.service_name, key);
            let response = self
                .client
                .put(&url)
                .body(value)
                .send()
                .await
                .map_err(|source| ReconfigureError::StoreTransport {
                    url: url.clone(),
                    source,
                })?;

            if !response.status().is_success() {
                return Err(ReconfigureError::StoreStatus {
                    url,
                    status: response.status().as_u16(),
                });
            }
            debug!(service = %intent.service_name, key, "Stored routing key");
        }

        info!(service = %intent.service_name, "Routing intent stored");
        Ok(())
    }

    /// Read an intent back. Absent keys yield default field values.
    pub async fn fetch(&self, service_name: &str) -> Result<RoutingIntent, ReconfigureError> {
        let mut intent = RoutingIntent::new(service_name);

        if let Some(color) = self.get_raw(service_name, COLOR_KEY).await? {
            intent.service_color = non_empty(color);
        }
        if let Some(paths) = self.get_raw(service_name, PATH_KEY).await? {
            intent.service_path = paths
                .split(',')
                .map(str::trim)
                .filter(|p| !p.is_empty())
                .map(String::from)
                .collect();
        }
        if let Some(domain) = self.get_raw(service_name, DOMAIN_KEY).await? {
            intent.service_domain = non_empty(domain);
        }
        if let Some(path_type) = self.get_raw(service_name, PATH_TYPE_KEY).await? {
            intent.path_type = PathType::parse(&path_type);
        }
        if let Some(skip_check) = self.get_raw(service_name, SKIP_CHECK_KEY).await? {
            intent.skip_check = skip_check.trim().parse().unwrap_or(false);
        }
        if let Some(fe_path) = self.get_raw(service_name, CONSUL_TEMPLATE_FE_PATH_KEY).await? {
            intent.consul_template_fe_path = non_empty(fe_path).map(PathBuf::from);
        }
        if let Some(be_path) = self.get_raw(service_name, CONSUL_TEMPLATE_BE_PATH_KEY).await? {
            intent.consul_template_be_path = non_empty(be_path).map(PathBuf::from);
        }

        Ok(intent)
    }

    async fn get_raw(
        &self,
        service_name: &str,
        key: &str,
    ) -> Result<Option<String>, ReconfigureError> {
        let url = format!("{}?raw", self.key_url(service_name, key));
        let transport = |source: reqwest::Error| ReconfigureError::StoreTransport {
            url: url.clone(),
            source,
        };

        let response = self.client.get(&url).send().await.map_err(transport)?;
        match response.status() {
            StatusCode::NOT_FOUND => Ok(None),
            status if status.is_success() => Ok(Some(response.text().await.map_err(transport)?)),
            status => Err(ReconfigureError::StoreStatus {
                url: url.clone(),
                status: status.as_u16(),
            }),
        }
    }

    /// Names of every service in the catalog, sorted
    pub async fn list_services(&self) -> Result<Vec<String>, ReconfigureError> {
        let url = format!("{}/v1/catalog/services", self.base_url.trim_end_matches('/'));
        let invalid = |reason: String| ReconfigureError::InvalidAddress {
            address: self.base_url.clone(),
            reason,
        };

        let response = self
            .client
            .get(&url)
            .send()
            .await
            .map_err(|e| invalid(e.to_string()))?;

        if !response.status().is_success() {
            return Err(invalid(format!("catalog returned status {}", response.status())));
        }

        let services: BTreeMap<String, Vec<String>> =
            response.json().await.map_err(|e| invalid(e.to_string()))?;
        Ok(services.into_keys().collect())
    }
}

/// Key/value pairs written for an intent, in write order
pub fn encode(intent: &RoutingIntent) -> Vec<(&'static str, String)> {
    let path_string = |p: &Option<PathBuf>| {
        p.as_ref()
            .map(|p| p.to_string_lossy().to_string())
            .unwrap_or_default()
    };

    vec![
        (COLOR_KEY, intent.service_color.clone().unwrap_or_default()),
        (PATH_KEY, intent.service_path.join(",")),
        (DOMAIN_KEY, intent.service_domain.clone().unwrap_or_default()),
        (PATH_TYPE_KEY, intent.path_type.as_keyword().to_string()),
        (SKIP_CHECK_KEY, intent.skip_check.to_string()),
        (
            CONSUL_TEMPLATE_FE_PATH_KEY,
            path_string(&intent.consul_template_fe_path),
        ),
        (
            CONSUL_TEMPLATE_BE_PATH_KEY,
            path_string(&intent.consul_template_be_path),
        ),
    ]
}

fn non_empty(value: String) -> Option<String> {
    if value.is_empty() {
        None
    } else {
        Some(value)
    }
}
