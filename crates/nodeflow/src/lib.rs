pub mod api;
pub mod error;
pub mod host;
pub mod marshal;
pub mod scope;
pub mod session;
pub mod value;

pub const TRACE_TARGET_BRIDGE: &str = "nodeflow::bridge";

pub use api::{ApiConfig, HostSet, Namespaces};
pub use api::fs::{FileFlag, FsApi, FsPolicy, LocalFsHost};
pub use api::http::{HttpApi, HttpPolicy, RequestEnvelope, Rule};
pub use api::lock::{LockApi, LockGuard, SharedLock};
pub use api::node::{ConstructorRef, EmitEnvelope, NodeApi, RegisterEnvelope};
pub use error::{Error, Result};
pub use host::{BoxError, FileStat, FsHost, HttpHost, LockHost, NodeHost, WriteHandle};
pub use marshal::{Region, RegionMut};
pub use nodeflow_envelope::Value;
pub use scope::{Primitive, Scope};
pub use session::Phase;
pub use value::ScriptValue;
