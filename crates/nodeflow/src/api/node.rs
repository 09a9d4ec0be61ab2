//! Node invocation capability.
//!
//! Wraps the raw `__node_*` primitives into the vetted per-firing API:
//! message/descriptor/context fetches over the staged length-then-fill
//! protocol, output emission, and definition-time type registration, all
//! checked against the session state machine.

use std::sync::Arc;

use bytes::Bytes;
use nodeflow_envelope::{self as envelope, Value};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::TRACE_TARGET_BRIDGE;
use crate::error::{Error, Result};
use crate::host::{BoxError, NodeHost};
use crate::marshal::{Region, StagedCell, fetch_staged};
use crate::scope::{Captured, FillFn, LengthFn, Primitive, PushFn, Scope};
use crate::session::{Phase, SessionState};

pub const MSG_LENGTH: &str = "__node_msg_length";
pub const MSG_FILL: &str = "__node_msg";
pub const DESC_LENGTH: &str = "__node_desc_length";
pub const DESC_FILL: &str = "__node_desc";
pub const CONTEXT_LENGTH: &str = "__node_context_length";
pub const CONTEXT_FILL: &str = "__node_context";
pub const POP_LENGTH: &str = "__node_pop_length";
pub const POP_FILL: &str = "__node_pop";
pub const SEND: &str = "__node_send";
pub const DONE: &str = "__node_done";
pub const WARN: &str = "__node_warn";
pub const EMIT: &str = "__node_emit";
pub const RESULT: &str = "__node_result";
pub const REGISTER: &str = "__node_register";

/// Every raw name this capability consumes at bootstrap.
pub const CONSUMED: &[&str] = &[
    MSG_LENGTH,
    MSG_FILL,
    DESC_LENGTH,
    DESC_FILL,
    CONTEXT_LENGTH,
    CONTEXT_FILL,
    POP_LENGTH,
    POP_FILL,
    SEND,
    DONE,
    WARN,
    EMIT,
    RESULT,
    REGISTER,
];

/// Event raised outside the primary message path.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EmitEnvelope {
    pub event: String,
    pub payload: Value,
}

/// Opaque token the host maps back to a node constructor.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ConstructorRef(pub String);

impl ConstructorRef {
    #[must_use]
    pub fn new(token: impl Into<String>) -> Self {
        Self(token.into())
    }
}

/// Declarative node-type registration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RegisterEnvelope {
    pub name: String,
    pub constructor: ConstructorRef,
    pub options: Value,
}

/// Bind a length/fill primitive pair over one staged fetch channel.
///
/// The length query fetches fresh from the host on every call and stages
/// the result; the fill call consumes the staged value. `None` from the
/// fetch stages nothing and answers zero.
fn bind_staged(
    scope: &mut Scope,
    length_name: &'static str,
    fill_name: &'static str,
    fetch: impl Fn() -> core::result::Result<Option<Bytes>, BoxError> + Send + Sync + 'static,
) {
    let cell = Arc::new(StagedCell::new());
    {
        let cell = Arc::clone(&cell);
        scope.bind(
            length_name,
            Primitive::Length(Arc::new(move || match fetch()? {
                Some(value) => Ok(cell.stage(value)),
                None => {
                    cell.clear();
                    Ok(0)
                }
            })),
        );
    }
    scope.bind(
        fill_name,
        Primitive::Fill(Arc::new(move |mut region| {
            let staged = cell.take().ok_or(Error::MissingStagedValue)?;
            Ok(region.write(&staged)?)
        })),
    );
}

/// Bind a push primitive that copies the guest region before the host sees
/// it, so the host never holds the pointer past the call.
fn bind_push(
    scope: &mut Scope,
    name: &'static str,
    op: impl Fn(Bytes) -> core::result::Result<(), BoxError> + Send + Sync + 'static,
) {
    scope.bind(
        name,
        Primitive::Push(Arc::new(move |region| {
            op(region.to_bytes())?;
            Ok(region.len())
        })),
    );
}

/// Install the raw node primitives over `host`.
pub fn install_node(scope: &mut Scope, host: Arc<dyn NodeHost>) {
    {
        let host = Arc::clone(&host);
        bind_staged(scope, MSG_LENGTH, MSG_FILL, move || {
            host.message().map(Some)
        });
    }
    {
        let host = Arc::clone(&host);
        bind_staged(scope, DESC_LENGTH, DESC_FILL, move || {
            host.descriptor().map(Some)
        });
    }
    {
        let host = Arc::clone(&host);
        bind_staged(scope, CONTEXT_LENGTH, CONTEXT_FILL, move || {
            host.context().map(Some)
        });
    }
    {
        let host = Arc::clone(&host);
        bind_staged(scope, POP_LENGTH, POP_FILL, move || host.pop());
    }
    {
        let host = Arc::clone(&host);
        bind_push(scope, SEND, move |payload| host.send(payload));
    }
    {
        let host = Arc::clone(&host);
        bind_push(scope, DONE, move |payload| host.done(payload));
    }
    {
        let host = Arc::clone(&host);
        bind_push(scope, WARN, move |payload| host.warn(payload));
    }
    {
        let host = Arc::clone(&host);
        bind_push(scope, EMIT, move |payload| host.emit(payload));
    }
    {
        let host = Arc::clone(&host);
        bind_push(scope, RESULT, move |payload| host.set_result(payload));
    }
    bind_push(scope, REGISTER, move |payload| host.register(payload));
}

/// The vetted node namespace, one per guest instance.
///
/// Owns the session state machine; every operation is checked against the
/// current phase before it touches a primitive.
pub struct NodeApi {
    msg_length: Captured<LengthFn>,
    msg_fill: Captured<FillFn>,
    desc_length: Captured<LengthFn>,
    desc_fill: Captured<FillFn>,
    context_length: Captured<LengthFn>,
    context_fill: Captured<FillFn>,
    pop_length: Captured<LengthFn>,
    pop_fill: Captured<FillFn>,
    send: Captured<PushFn>,
    done: Captured<PushFn>,
    warn: Captured<PushFn>,
    emit: Captured<PushFn>,
    result: Captured<PushFn>,
    register: Captured<PushFn>,
    session: SessionState,
}

fn encode<T: Serialize>(value: &T) -> Result<Bytes> {
    envelope::to_bytes(value).map_err(Error::MalformedEnvelope)
}

fn decode(bytes: &[u8]) -> Result<Value> {
    envelope::from_bytes(bytes).map_err(Error::MalformedEnvelope)
}

impl NodeApi {
    /// Capture the node primitives out of `scope` and revoke their names.
    #[must_use]
    pub fn bootstrap(scope: &mut Scope) -> Self {
        let api = Self {
            msg_length: scope.capture_length(MSG_LENGTH),
            msg_fill: scope.capture_fill(MSG_FILL),
            desc_length: scope.capture_length(DESC_LENGTH),
            desc_fill: scope.capture_fill(DESC_FILL),
            context_length: scope.capture_length(CONTEXT_LENGTH),
            context_fill: scope.capture_fill(CONTEXT_FILL),
            pop_length: scope.capture_length(POP_LENGTH),
            pop_fill: scope.capture_fill(POP_FILL),
            send: scope.capture_push(SEND),
            done: scope.capture_push(DONE),
            warn: scope.capture_push(WARN),
            emit: scope.capture_push(EMIT),
            result: scope.capture_push(RESULT),
            register: scope.capture_push(REGISTER),
            session: SessionState::new(),
        };
        for name in CONSUMED {
            scope.revoke(name);
        }
        api
    }

    /// Open a firing. Called by the host glue before the guest handler
    /// runs; exactly one firing may be open at a time.
    ///
    /// # Errors
    /// Fails with [`Error::FiringInProgress`] if a firing is already open.
    pub fn begin_firing(&self) -> Result<()> {
        self.session.begin()
    }

    /// Destroy the session when the host resumes, after completion or an
    /// uncaught guest failure. Always returns the bridge to `Idle`.
    pub fn finish_firing(&self) {
        self.session.finish();
    }

    #[must_use]
    pub fn phase(&self) -> Phase {
        self.session.phase()
    }

    /// Fetch the current message envelope. Idempotent within a session:
    /// every call re-reads the host, nothing is cached bridge-side.
    ///
    /// # Errors
    /// Fails with [`Error::NoActiveMessage`] outside a session and
    /// [`Error::SessionClosed`] after `done`.
    pub fn fetch_message(&self) -> Result<Value> {
        self.session.touch()?;
        let bytes = fetch_staged(self.msg_length.get()?, self.msg_fill.get()?)?;
        decode(&bytes)
    }

    /// Fetch the firing node's configuration descriptor.
    ///
    /// # Errors
    /// Fails on session-state violations or undecodable host bytes.
    pub fn fetch_descriptor(&self) -> Result<Value> {
        self.session.touch()?;
        let bytes = fetch_staged(self.desc_length.get()?, self.desc_fill.get()?)?;
        decode(&bytes)
    }

    /// Fetch a snapshot of the persisted context. The store is
    /// process-wide and shared across sessions with no transactional
    /// isolation; the snapshot is fetched fresh, never cached.
    ///
    /// # Errors
    /// Fails on session-state violations or undecodable host bytes.
    pub fn fetch_context(&self) -> Result<Value> {
        self.session.touch()?;
        let bytes = fetch_staged(self.context_length.get()?, self.context_fill.get()?)?;
        decode(&bytes)
    }

    /// Remove and return one item from the pending queue, or `None` when
    /// drained. Not idempotent.
    ///
    /// # Errors
    /// Fails on session-state violations or undecodable host bytes.
    pub fn pop_pending(&self) -> Result<Option<Value>> {
        self.session.touch()?;
        let bytes = fetch_staged(self.pop_length.get()?, self.pop_fill.get()?)?;
        if bytes.is_empty() {
            return Ok(None);
        }
        decode(&bytes).map(Some)
    }

    /// Emit one output. Callable zero or more times per session; never
    /// terminates it.
    ///
    /// # Errors
    /// Fails on session-state violations or host errors.
    pub fn send(&self, payload: &Value) -> Result<()> {
        self.session.touch()?;
        let bytes = encode(payload)?;
        self.push(&self.send, &bytes)
    }

    /// Signal completion. Exactly one call per session; the session is
    /// closed by the attempt, so a host-side failure here still consumes
    /// the completion credit.
    ///
    /// # Errors
    /// Fails with [`Error::SessionClosed`] on a second call, or with
    /// [`Error::NoActiveMessage`] outside a session.
    pub fn done(&self, payload: Option<&Value>) -> Result<()> {
        self.session.close()?;
        let bytes = match payload {
            Some(value) => encode(value)?,
            None => encode(&Value::Null)?,
        };
        self.push(&self.done, &bytes)
    }

    /// Best-effort diagnostic side channel. Failures are swallowed and
    /// never surface to guest code.
    pub fn warn(&self, payload: &Value) {
        if let Err(error) = self.try_warn(payload) {
            debug!(target: TRACE_TARGET_BRIDGE, %error, "warn diagnostic dropped");
        }
    }

    fn try_warn(&self, payload: &Value) -> Result<()> {
        self.session.ensure_open()?;
        let bytes = encode(payload)?;
        self.push(&self.warn, &bytes)
    }

    /// Raise a named event, distinct from the primary message path. Valid
    /// in any non-closed phase, including definition time.
    ///
    /// # Errors
    /// Fails with [`Error::SessionClosed`] after `done`, or on host errors.
    pub fn emit(&self, event: &str, payload: &Value) -> Result<()> {
        self.session.ensure_open()?;
        let bytes = encode(&EmitEnvelope {
            event: event.to_string(),
            payload: payload.clone(),
        })?;
        self.push(&self.emit, &bytes)
    }

    /// Store a final value the host reads after the guest terminates, for
    /// scripts that compute a single result instead of send/done.
    ///
    /// # Errors
    /// Fails with [`Error::SessionClosed`] after `done`, or on host errors.
    pub fn set_result(&self, payload: &Value) -> Result<()> {
        self.session.ensure_open()?;
        let bytes = encode(payload)?;
        self.push(&self.result, &bytes)
    }

    /// Declare a node type in the host's registry. Definition-time only.
    ///
    /// # Errors
    /// Fails with [`Error::MidSessionRegistration`] while a firing is open.
    /// Name uniqueness is host-enforced and surfaces as a host error.
    pub fn register_type(
        &self,
        name: &str,
        constructor: &ConstructorRef,
        options: &Value,
    ) -> Result<()> {
        self.session.ensure_definition_time()?;
        let bytes = encode(&RegisterEnvelope {
            name: name.to_string(),
            constructor: constructor.clone(),
            options: options.clone(),
        })?;
        self.push(&self.register, &bytes)
    }

    fn push(&self, primitive: &Captured<PushFn>, payload: &Bytes) -> Result<()> {
        let push = primitive.get()?;
        push(Region::new(payload)).map_err(Error::Host)?;
        Ok(())
    }
}
