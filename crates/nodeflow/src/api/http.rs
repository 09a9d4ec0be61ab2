//! Network capability.
//!
//! A single pass-through request primitive. The bridge validates the
//! request envelope and the access policy; everything else, including
//! retries, redirects and timeouts, belongs to the host.

use std::sync::Arc;

use nodeflow_envelope::{self as envelope, Value};
use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::TRACE_TARGET_BRIDGE;
use crate::error::{Error, Result};
use crate::host::{BoxError, HttpHost};
use crate::marshal::Region;
use crate::scope::{Captured, ExchangeFn, Primitive, Scope};

pub const REQUEST: &str = "__http_request";

/// Every raw name this capability consumes at bootstrap.
pub const CONSUMED: &[&str] = &[REQUEST];

/// One request crossing the boundary.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RequestEnvelope {
    pub endpoint: String,
    pub data: Value,
    pub headers: Value,
    pub method: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Action {
    Allow,
    Deny,
}

/// Host pattern, normalized at construction: lowercased, dots trimmed.
#[derive(Debug, Clone)]
enum HostMatch {
    Exact(String),
    Suffix(String),
}

impl HostMatch {
    fn new_exact(host: impl Into<String>) -> Self {
        Self::Exact(host.into().trim_end_matches('.').to_ascii_lowercase())
    }

    fn new_suffix(suffix: impl Into<String>) -> Self {
        Self::Suffix(
            suffix
                .into()
                .trim_start_matches('.')
                .trim_end_matches('.')
                .to_ascii_lowercase(),
        )
    }

    fn matches(&self, host: &str) -> bool {
        let host = host.trim_end_matches('.').to_ascii_lowercase();
        match self {
            Self::Exact(expected) => host == *expected,
            Self::Suffix(bare) => {
                host == *bare
                    || host
                        .strip_suffix(bare.as_str())
                        .is_some_and(|prefix| prefix.ends_with('.'))
            }
        }
    }
}

/// One access rule. Unset dimensions match anything.
#[derive(Debug, Clone)]
pub struct Rule {
    action: Action,
    methods: Vec<String>,
    host: Option<HostMatch>,
    path_prefix: Option<String>,
}

impl Rule {
    #[must_use]
    pub const fn allow() -> Self {
        Self::new(Action::Allow)
    }

    #[must_use]
    pub const fn deny() -> Self {
        Self::new(Action::Deny)
    }

    const fn new(action: Action) -> Self {
        Self {
            action,
            methods: Vec::new(),
            host: None,
            path_prefix: None,
        }
    }

    /// Restrict to a method. May be called repeatedly to accept several.
    #[must_use]
    pub fn method(mut self, method: &str) -> Self {
        self.methods.push(method.to_ascii_uppercase());
        self
    }

    #[must_use]
    pub fn exact_host(mut self, host: impl Into<String>) -> Self {
        self.host = Some(HostMatch::new_exact(host));
        self
    }

    /// Match the host itself and any subdomain of it.
    #[must_use]
    pub fn suffix_host(mut self, suffix: impl Into<String>) -> Self {
        self.host = Some(HostMatch::new_suffix(suffix));
        self
    }

    #[must_use]
    pub fn path_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.path_prefix = Some(prefix.into());
        self
    }

    fn matches(&self, method: &str, host: &str, path: &str) -> bool {
        if !self.methods.is_empty() && !self.methods.iter().any(|m| m == method) {
            return false;
        }
        if let Some(host_match) = &self.host {
            if !host_match.matches(host) {
                return false;
            }
        }
        if let Some(prefix) = &self.path_prefix {
            if !path.starts_with(prefix.as_str()) {
                return false;
            }
        }
        true
    }
}

/// Ordered rule list; first matching rule wins, default deny.
#[derive(Debug, Clone, Default)]
pub struct HttpPolicy {
    rules: Vec<Rule>,
}

impl HttpPolicy {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Allow everything. For tests and trusted embeddings.
    #[must_use]
    pub fn permissive() -> Self {
        Self::new().rule(Rule::allow())
    }

    #[must_use]
    pub fn rule(mut self, rule: Rule) -> Self {
        self.rules.push(rule);
        self
    }

    /// Evaluate `method` against an endpoint of the form
    /// `[scheme://]host[:port]/path`.
    #[must_use]
    pub fn can_access(&self, method: &str, endpoint: &str) -> bool {
        let rest = endpoint
            .split_once("://")
            .map_or(endpoint, |(_, rest)| rest);
        let (authority, path) = rest
            .split_once('/')
            .map_or((rest, ""), |(authority, path)| (authority, path));
        let host = authority
            .split_once(':')
            .map_or(authority, |(host, _)| host);
        let method = method.to_ascii_uppercase();

        for rule in &self.rules {
            if rule.matches(&method, host, path) {
                return rule.action == Action::Allow;
            }
        }
        false
    }
}

fn denied(method: &str, endpoint: &str) -> BoxError {
    warn!(target: TRACE_TARGET_BRIDGE, method, endpoint, "request denied by policy");
    std::io::Error::new(
        std::io::ErrorKind::PermissionDenied,
        format!("{method} {endpoint} denied by policy"),
    )
    .into()
}

/// Install the raw request primitive over `host`, with envelope validation
/// and `policy` enforced before the host sees the request.
pub fn install_http(scope: &mut Scope, host: Arc<dyn HttpHost>, policy: HttpPolicy) {
    scope.bind(
        REQUEST,
        Primitive::Exchange(Arc::new(move |region| {
            let payload = region.to_bytes();
            let request: RequestEnvelope = envelope::from_bytes(&payload)
                .map_err(|e| BoxError::from(Error::MalformedEnvelope(e)))?;
            if !policy.can_access(&request.method, &request.endpoint) {
                return Err(denied(&request.method, &request.endpoint));
            }
            host.request(payload)
        })),
    );
}

/// The vetted network namespace.
pub struct HttpApi {
    request: Captured<ExchangeFn>,
}

impl HttpApi {
    /// Capture the request primitive out of `scope` and revoke its name.
    #[must_use]
    pub fn bootstrap(scope: &mut Scope) -> Self {
        let api = Self {
            request: scope.capture_exchange(REQUEST),
        };
        for name in CONSUMED {
            scope.revoke(name);
        }
        api
    }

    /// Perform one request. The guest receives whatever the host returns,
    /// success or error, undistinguished beyond what JSON encodes.
    ///
    /// # Errors
    /// Fails on policy denial, host errors, or an undecodable response.
    pub fn request(
        &self,
        endpoint: &str,
        data: &Value,
        headers: &Value,
        method: &str,
    ) -> Result<Value> {
        let bytes = envelope::to_bytes(&RequestEnvelope {
            endpoint: endpoint.to_string(),
            data: data.clone(),
            headers: headers.clone(),
            method: method.to_string(),
        })
        .map_err(Error::MalformedEnvelope)?;

        let exchange = self.request.get()?;
        let response = exchange(Region::new(&bytes)).map_err(Error::Host)?;
        envelope::from_bytes(&response).map_err(Error::MalformedEnvelope)
    }
}
