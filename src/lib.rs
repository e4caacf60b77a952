//! Flowproxy - keeps HAProxy routing in sync with Consul
//!
//! This library:
//! - Turns per-service routing intent (paths, domain, color, path matching,
//!   health checks) into consul-template sources
//! - Renders them with consul-template and reloads HAProxy
//! - Stores the intent in Consul KV so it survives proxy restarts
//! - Rebuilds the whole proxy configuration from Consul after a restart

pub mod address;
pub mod config;
pub mod error;
pub mod intent;
pub mod proxy;
pub mod reconfigure;
pub mod renderer;
pub mod store;
pub mod template;

pub use error::ReconfigureError;
pub use intent::{PathType, RoutingIntent};
pub use reconfigure::Reconfigure;
