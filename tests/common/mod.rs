//! Shared test doubles: an in-process Consul and recording collaborators.

use std::collections::HashMap;
use std::convert::Infallible;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use flowproxy::config::DeploymentContext;
use flowproxy::error::ReconfigureError;
use flowproxy::proxy::Proxy;
use flowproxy::renderer::{RenderJob, Side, TemplateRenderer};
use flowproxy::store::StateStore;
use flowproxy::Reconfigure;
use http_body_util::{BodyExt, Full};
use hyper::body::{Bytes, Incoming};
use hyper::server::conn::http1;
use hyper::service::service_fn;
use hyper::{Method, Request, Response, StatusCode};
use hyper_util::rt::TokioIo;
use parking_lot::Mutex;
use tempfile::TempDir;
use tokio::net::TcpListener;

/// State of the mock Consul agent
#[derive(Default)]
pub struct ConsulState {
    /// Services listed by /v1/catalog/services
    pub services: Vec<String>,
    /// KV entries served on GET, keyed by path below /v1/kv/
    pub kv: HashMap<String, String>,
    /// Answer the catalog with 500
    pub fail_catalog: bool,
    /// Every PUT received, as (path, body)
    pub puts: Mutex<Vec<(String, String)>>,
}

impl ConsulState {
    pub fn put_value(&self, path: &str) -> Option<String> {
        self.puts
            .lock()
            .iter()
            .find(|(p, _)| p == path)
            .map(|(_, body)| body.clone())
    }
}

/// Mock Consul listening on an ephemeral port
pub struct MockConsul {
    pub addr: SocketAddr,
    pub state: Arc<ConsulState>,
}

impl MockConsul {
    pub async fn start(state: ConsulState) -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let state = Arc::new(state);
        let server_state = Arc::clone(&state);

        tokio::spawn(async move {
            loop {
                let (stream, _) = match listener.accept().await {
                    Ok(conn) => conn,
                    Err(_) => break,
                };
                let state = Arc::clone(&server_state);
                tokio::spawn(async move {
                    let service = service_fn(move |req| handle(req, Arc::clone(&state)));
                    let _ = http1::Builder::new()
                        .serve_connection(TokioIo::new(stream), service)
                        .await;
                });
            }
        });

        Self { addr, state }
    }

    /// Address with an explicit scheme
    pub fn url(&self) -> String {
        format!("http://{}", self.addr)
    }
}

fn response(status: StatusCode, body: impl Into<Bytes>) -> Response<Full<Bytes>> {
    Response::builder()
        .status(status)
        .body(Full::new(body.into()))
        .expect("valid response")
}

async fn handle(
    req: Request<Incoming>,
    state: Arc<ConsulState>,
) -> Result<Response<Full<Bytes>>, Infallible> {
    let path = req.uri().path().to_string();
    let query = req.uri().query().map(String::from);
    let method = req.method().clone();

    let resp = match method {
        Method::PUT => {
            let body = req
                .into_body()
                .collect()
                .await
                .map(|b| b.to_bytes())
                .unwrap_or_default();
            state
                .puts
                .lock()
                .push((path, String::from_utf8_lossy(&body).to_string()));
            response(StatusCode::OK, "true")
        }
        Method::GET if path == "/v1/catalog/services" => {
            if state.fail_catalog {
                response(StatusCode::INTERNAL_SERVER_ERROR, "")
            } else {
                let catalog: HashMap<&str, Vec<String>> =
                    state.services.iter().map(|s| (s.as_str(), Vec::new())).collect();
                response(StatusCode::OK, serde_json::to_string(&catalog).unwrap())
            }
        }
        Method::GET => {
            let value = path
                .strip_prefix("/v1/kv/")
                .filter(|_| query.as_deref() == Some("raw"))
                .and_then(|key| state.kv.get(key));
            match value {
                Some(v) => response(StatusCode::OK, v.clone()),
                None => response(StatusCode::NOT_FOUND, ""),
            }
        }
        _ => response(StatusCode::METHOD_NOT_ALLOWED, ""),
    };
    Ok(resp)
}

/// Renderer that records jobs instead of running consul-template
#[derive(Default)]
pub struct RecordingRenderer {
    pub jobs: Mutex<Vec<RenderJob>>,
    pub fail_side: Option<Side>,
    /// Sleep while rendering, to widen race windows
    pub delay: Option<Duration>,
    in_flight: AtomicBool,
    /// Set if two renders ever overlapped
    pub overlapped: AtomicBool,
}

impl RecordingRenderer {
    pub fn failing(side: Side) -> Self {
        Self {
            fail_side: Some(side),
            ..Default::default()
        }
    }

    pub fn slow(delay: Duration) -> Self {
        Self {
            delay: Some(delay),
            ..Default::default()
        }
    }

    pub fn args(&self) -> Vec<Vec<String>> {
        self.jobs.lock().iter().map(RenderJob::args).collect()
    }
}

#[async_trait]
impl TemplateRenderer for RecordingRenderer {
    async fn render(&self, job: &RenderJob) -> Result<(), ReconfigureError> {
        if self.in_flight.swap(true, Ordering::SeqCst) {
            self.overlapped.store(true, Ordering::SeqCst);
        }
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        self.jobs.lock().push(job.clone());
        self.in_flight.store(false, Ordering::SeqCst);

        if self.fail_side == Some(job.side) {
            return Err(ReconfigureError::Render {
                side: job.side,
                reason: "This is an error".to_string(),
            });
        }
        Ok(())
    }
}

/// Proxy that records calls and can be told to fail
#[derive(Default)]
pub struct RecordingProxy {
    pub assembled: Mutex<Vec<(PathBuf, PathBuf)>>,
    pub reloads: Mutex<usize>,
    pub fail_assemble: bool,
    pub fail_reload: bool,
}

#[async_trait]
impl Proxy for RecordingProxy {
    async fn assemble_config(&self, templates_dir: &Path, configs_dir: &Path) -> anyhow::Result<()> {
        self.assembled
            .lock()
            .push((templates_dir.to_path_buf(), configs_dir.to_path_buf()));
        if self.fail_assemble {
            anyhow::bail!("This is an error");
        }
        Ok(())
    }

    async fn reload(&self) -> anyhow::Result<()> {
        *self.reloads.lock() += 1;
        if self.fail_reload {
            anyhow::bail!("This is an error");
        }
        Ok(())
    }
}

/// Temporary templates and configs directories
pub struct Dirs {
    _root: TempDir,
    pub templates: PathBuf,
    pub configs: PathBuf,
}

impl Dirs {
    pub fn new() -> Self {
        let root = TempDir::new().unwrap();
        let templates = root.path().join("tmpl");
        let configs = root.path().join("cfg");
        std::fs::create_dir_all(&templates).unwrap();
        std::fs::create_dir_all(&configs).unwrap();
        Self {
            _root: root,
            templates,
            configs,
        }
    }

    pub fn read(&self, side: Side) -> String {
        std::fs::read_to_string(self.templates.join(side.template_filename())).unwrap()
    }
}

pub fn engine(
    consul_address: &str,
    dirs: &Dirs,
    renderer: Arc<RecordingRenderer>,
    proxy: Arc<RecordingProxy>,
) -> Reconfigure {
    let context = DeploymentContext::new(consul_address, &dirs.templates, &dirs.configs);
    let store = StateStore::new(consul_address, Duration::from_secs(2)).unwrap();
    Reconfigure::new(context, store, renderer, proxy)
}
