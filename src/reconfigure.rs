//! Reconfiguration engine
//!
//! `execute` applies one service's routing intent: generate templates,
//! write them, render both sides, assemble and reload the proxy, then
//! store the intent in Consul. `reload_all_services` replays every stored
//! intent through the same pipeline after the proxy lost its state.
//!
//! Every step is fail-fast and nothing is rolled back. Re-running the
//! whole operation is safe.

use futures::future::try_join_all;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{debug, error, info};

use crate::address;
use crate::config::{Config, DeploymentContext};
use crate::error::ReconfigureError;
use crate::intent::RoutingIntent;
use crate::proxy::{HaProxy, Proxy};
use crate::renderer::{ConsulTemplate, RenderJob, Side, TemplateRenderer};
use crate::store::StateStore;
use crate::template;

/// Permissions of the written template sources
pub const TEMPLATE_FILE_MODE: u32 = 0o664;

/// Fragment name used for the combined output of a recovery pass
pub const RECOVERY_FRAGMENT_NAME: &str = "all-services";

/// Guards the stable template files and the proxy's live config.
/// Held from template write until reload completes.
static RECONFIGURE_LOCK: Mutex<()> = Mutex::const_new(());

/// Applies routing intent to the proxy and keeps Consul in sync
pub struct Reconfigure {
    context: DeploymentContext,
    store: StateStore,
    renderer: Arc<dyn TemplateRenderer>,
    proxy: Arc<dyn Proxy>,
}

impl Reconfigure {
    pub fn new(
        context: DeploymentContext,
        store: StateStore,
        renderer: Arc<dyn TemplateRenderer>,
        proxy: Arc<dyn Proxy>,
    ) -> Self {
        Self {
            context,
            store,
            renderer,
            proxy,
        }
    }

    /// Engine wired to consul-template and HAProxy as configured
    pub fn from_config(config: &Config) -> anyhow::Result<Self> {
        let context = config.deployment_context();
        let store = StateStore::new(&context.consul_address, config.consul.request_timeout())?;
        let renderer = ConsulTemplate::new(config.renderer.binary.clone(), config.renderer.timeout());
        let proxy = HaProxy::new(
            config.haproxy.binary.clone(),
            config.haproxy.pid_file.clone(),
            config.haproxy_config_path(),
        );
        Ok(Self::new(context, store, Arc::new(renderer), Arc::new(proxy)))
    }

    pub fn context(&self) -> &DeploymentContext {
        &self.context
    }

    /// Apply one service's routing intent and persist it
    pub async fn execute(&self, intent: &RoutingIntent) -> Result<(), ReconfigureError> {
        self.try_execute(intent).await.inspect_err(|e| {
            error!(service = %intent.service_name, stage = e.stage(), error = %e, "Reconfiguration failed");
        })
    }

    async fn try_execute(&self, intent: &RoutingIntent) -> Result<(), ReconfigureError> {
        intent.validate()?;
        let (front, back) = template::generate(intent)?;

        {
            let _guard = RECONFIGURE_LOCK.lock().await;
            self.apply(&self.context.consul_address, &front, &back, &intent.service_name)
                .await?;
        }

        self.store.persist(intent).await?;
        info!(service = %intent.service_name, paths = ?intent.service_path, "Service reconfigured");
        Ok(())
    }

    /// Rebuild the proxy configuration for every service known to Consul
    pub async fn reload_all_services(&self, address: &str) -> Result<(), ReconfigureError> {
        self.try_reload_all(address).await.inspect_err(|e| {
            error!(address, stage = e.stage(), error = %e, "Reloading all services failed");
        })
    }

    async fn try_reload_all(&self, address: &str) -> Result<(), ReconfigureError> {
        let store = self.store.with_address(address);
        let services = store.list_services().await?;
        debug!(count = services.len(), "Fetched service catalog");

        let intents = try_join_all(services.iter().map(|name| store.fetch(name))).await?;
        let (front, back) = template::generate_all(&intents)?;

        let _guard = RECONFIGURE_LOCK.lock().await;
        self.apply(store.base_url(), &front, &back, RECOVERY_FRAGMENT_NAME)
            .await?;

        info!(services = ?services, "All services reloaded");
        Ok(())
    }

    /// Write templates, render both sides, assemble and reload.
    /// Callers must hold `RECONFIGURE_LOCK`.
    async fn apply(
        &self,
        consul_address: &str,
        front: &str,
        back: &str,
        fragment_name: &str,
    ) -> Result<(), ReconfigureError> {
        self.write_template(Side::Front, front).await?;
        self.write_template(Side::Back, back).await?;

        let consul_address = address::strip_scheme(consul_address);
        for side in Side::ALL {
            let job = RenderJob {
                side,
                consul_address: consul_address.to_string(),
                template: self.template_path(side),
                destination: self.context.configs_dir.join(side.rendered_filename(fragment_name)),
            };
            self.renderer.render(&job).await?;
            debug!(side = %side, destination = %job.destination.display(), "Template rendered");
        }

        self.proxy
            .assemble_config(&self.context.templates_dir, &self.context.configs_dir)
            .await
            .map_err(ReconfigureError::Assemble)?;
        self.proxy.reload().await.map_err(ReconfigureError::Reload)?;
        Ok(())
    }

    /// Stable location of a side's template source
    pub fn template_path(&self, side: Side) -> PathBuf {
        self.context.templates_dir.join(side.template_filename())
    }

    async fn write_template(&self, side: Side, content: &str) -> Result<(), ReconfigureError> {
        let path = self.template_path(side);
        let write_err = |source: std::io::Error| ReconfigureError::TemplateWrite {
            path: path.clone(),
            source,
        };

        tokio::fs::write(&path, content).await.map_err(write_err)?;
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            let perms = std::fs::Permissions::from_mode(TEMPLATE_FILE_MODE);
            tokio::fs::set_permissions(&path, perms)
                .await
                .map_err(write_err)?;
        }

        debug!(side = %side, path = %path.display(), "Template written");
        Ok(())
    }
}
