//! Capability modules exposed to guest code.
//!
//! Each module follows the same pattern: `install_*` binds raw primitives
//! over a host trait into a [`Scope`], and a `bootstrap` captures those
//! primitives into a vetted namespace and revokes the raw names.

pub mod fs;
pub mod http;
pub mod lock;
pub mod node;

use std::sync::Arc;

use crate::host::{FsHost, HttpHost, LockHost, NodeHost};
use crate::scope::Scope;

/// Per-capability configuration supplied by the embedding host.
#[derive(Debug, Clone, Default)]
pub struct ApiConfig {
    pub fs: fs::FsPolicy,
    pub http: http::HttpPolicy,
}

/// The host implementations backing one guest instance.
pub struct HostSet {
    pub node: Arc<dyn NodeHost>,
    pub fs: Arc<dyn FsHost>,
    pub http: Arc<dyn HttpHost>,
    pub lock: Arc<dyn LockHost>,
}

/// Install every raw primitive set into `scope`.
pub fn install_all(scope: &mut Scope, hosts: HostSet, config: ApiConfig) {
    node::install_node(scope, hosts.node);
    fs::install_fs(scope, hosts.fs, config.fs);
    http::install_http(scope, hosts.http, config.http);
    lock::install_lock(scope, hosts.lock);
}

/// The vetted namespaces reachable from guest code after bootstrap.
pub struct Namespaces {
    pub node: node::NodeApi,
    pub fs: fs::FsApi,
    pub http: http::HttpApi,
    pub lock: lock::LockApi,
}

/// Build every vetted namespace and revoke every consumed raw name.
#[must_use]
pub fn bootstrap(scope: &mut Scope) -> Namespaces {
    Namespaces {
        node: node::NodeApi::bootstrap(scope),
        fs: fs::FsApi::bootstrap(scope),
        http: http::HttpApi::bootstrap(scope),
        lock: lock::LockApi::bootstrap(scope),
    }
}
