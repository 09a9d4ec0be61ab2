//! End-to-end bridge scenarios over an in-memory recording host.

use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex};

use anyhow::Result;
use bytes::Bytes;
use serde_json::json;

use nodeflow::{
    ApiConfig, BoxError, ConstructorRef, Error, FsPolicy, HostSet, HttpHost, HttpPolicy,
    LocalFsHost, NodeHost, Phase, RegisterEnvelope, Scope, ScriptValue, SharedLock, Value,
    api::{self, Namespaces},
};

#[derive(Debug, Clone, PartialEq)]
enum HostEvent {
    Send(Value),
    Done(Value),
    Warn(Value),
    Emit(Value),
    Register(Value),
}

#[derive(Default)]
struct RecordingHost {
    message: Mutex<Bytes>,
    descriptor: Mutex<Bytes>,
    context: Mutex<Bytes>,
    pending: Mutex<VecDeque<Bytes>>,
    events: Mutex<Vec<HostEvent>>,
    registry: Mutex<HashMap<String, (ConstructorRef, Value)>>,
    result: Mutex<Option<Value>>,
    fail_warn: bool,
}

impl RecordingHost {
    fn new() -> Arc<Self> {
        let host = Self::default();
        host.stage_message(&json!({}));
        host.stage_descriptor(&json!({"id": "n1"}));
        host.stage_context(&json!({}));
        Arc::new(host)
    }

    fn stage_message(&self, value: &Value) {
        *self.message.lock().unwrap() = encode(value);
    }

    fn stage_descriptor(&self, value: &Value) {
        *self.descriptor.lock().unwrap() = encode(value);
    }

    fn stage_context(&self, value: &Value) {
        *self.context.lock().unwrap() = encode(value);
    }

    fn queue_pending(&self, value: &Value) {
        self.pending.lock().unwrap().push_back(encode(value));
    }

    fn events(&self) -> Vec<HostEvent> {
        self.events.lock().unwrap().clone()
    }

    fn record(&self, event: HostEvent) {
        self.events.lock().unwrap().push(event);
    }

    fn lookup_type(&self, name: &str) -> Option<(ConstructorRef, Value)> {
        self.registry.lock().unwrap().get(name).cloned()
    }

    fn take_result(&self) -> Option<Value> {
        self.result.lock().unwrap().take()
    }
}

fn encode(value: &Value) -> Bytes {
    serde_json::to_vec(value).unwrap().into()
}

fn decode(bytes: &Bytes) -> Value {
    serde_json::from_slice(bytes).unwrap()
}

impl NodeHost for RecordingHost {
    fn message(&self) -> std::result::Result<Bytes, BoxError> {
        Ok(self.message.lock().unwrap().clone())
    }

    fn descriptor(&self) -> std::result::Result<Bytes, BoxError> {
        Ok(self.descriptor.lock().unwrap().clone())
    }

    fn context(&self) -> std::result::Result<Bytes, BoxError> {
        Ok(self.context.lock().unwrap().clone())
    }

    fn pop(&self) -> std::result::Result<Option<Bytes>, BoxError> {
        Ok(self.pending.lock().unwrap().pop_front())
    }

    fn send(&self, payload: Bytes) -> std::result::Result<(), BoxError> {
        self.record(HostEvent::Send(decode(&payload)));
        Ok(())
    }

    fn done(&self, payload: Bytes) -> std::result::Result<(), BoxError> {
        self.record(HostEvent::Done(decode(&payload)));
        Ok(())
    }

    fn warn(&self, payload: Bytes) -> std::result::Result<(), BoxError> {
        if self.fail_warn {
            return Err(std::io::Error::other("diagnostics offline").into());
        }
        self.record(HostEvent::Warn(decode(&payload)));
        Ok(())
    }

    fn emit(&self, payload: Bytes) -> std::result::Result<(), BoxError> {
        self.record(HostEvent::Emit(decode(&payload)));
        Ok(())
    }

    fn set_result(&self, payload: Bytes) -> std::result::Result<(), BoxError> {
        *self.result.lock().unwrap() = Some(decode(&payload));
        Ok(())
    }

    fn register(&self, payload: Bytes) -> std::result::Result<(), BoxError> {
        let registration: RegisterEnvelope = serde_json::from_slice(&payload)?;
        let mut registry = self.registry.lock().unwrap();
        if registry.contains_key(&registration.name) {
            return Err(std::io::Error::other(format!(
                "type {} already registered",
                registration.name
            ))
            .into());
        }
        registry.insert(
            registration.name.clone(),
            (registration.constructor, registration.options),
        );
        drop(registry);
        self.record(HostEvent::Register(decode(&payload)));
        Ok(())
    }
}

struct EchoHttpHost;

impl HttpHost for EchoHttpHost {
    fn request(&self, envelope: Bytes) -> std::result::Result<Bytes, BoxError> {
        Ok(envelope)
    }
}

fn build_bridge(node_host: Arc<RecordingHost>, shared_lock: Arc<SharedLock>) -> Namespaces {
    let mut scope = Scope::new();
    api::install_all(
        &mut scope,
        HostSet {
            node: node_host,
            fs: Arc::new(LocalFsHost::new()),
            http: Arc::new(EchoHttpHost),
            lock: shared_lock,
        },
        ApiConfig {
            fs: FsPolicy::permissive(),
            http: HttpPolicy::permissive(),
        },
    );
    let namespaces = api::bootstrap(&mut scope);
    assert!(scope.is_empty(), "every raw name must be revoked");
    namespaces
}

#[test]
fn doubling_node_firing_in_order() -> Result<()> {
    let host = RecordingHost::new();
    host.stage_message(&json!({"topic": "a", "payload": 5}));
    let bridge = build_bridge(Arc::clone(&host), Arc::new(SharedLock::new()));

    bridge.node.begin_firing()?;

    // The guest handler: double the payload, forward it, signal completion.
    let msg = bridge.node.fetch_message()?;
    let doubled = msg["payload"].as_i64().unwrap() * 2;
    bridge
        .node
        .send(&json!({"topic": msg["topic"].clone(), "payload": doubled}))?;
    bridge.node.done(None)?;

    assert_eq!(
        host.events(),
        vec![
            HostEvent::Send(json!({"topic": "a", "payload": 10})),
            HostEvent::Done(Value::Null),
        ]
    );
    assert_eq!(bridge.node.phase(), Phase::Closed);

    bridge.node.finish_firing();
    assert_eq!(bridge.node.phase(), Phase::Idle);
    Ok(())
}

#[test]
fn session_calls_after_done_are_rejected() -> Result<()> {
    let bridge = build_bridge(RecordingHost::new(), Arc::new(SharedLock::new()));

    bridge.node.begin_firing()?;
    bridge.node.send(&json!({"seq": 1}))?;
    bridge.node.done(Some(&json!({"ok": true})))?;

    assert!(matches!(
        bridge.node.send(&json!({"seq": 2})),
        Err(Error::SessionClosed)
    ));
    assert!(matches!(bridge.node.pop_pending(), Err(Error::SessionClosed)));
    assert!(matches!(bridge.node.done(None), Err(Error::SessionClosed)));
    Ok(())
}

#[test]
fn fetches_read_fresh_snapshots() -> Result<()> {
    let host = RecordingHost::new();
    host.stage_context(&json!({"count": 1}));
    let bridge = build_bridge(Arc::clone(&host), Arc::new(SharedLock::new()));

    bridge.node.begin_firing()?;
    assert_eq!(bridge.node.fetch_context()?, json!({"count": 1}));

    // Another instance advanced the shared store; the next fetch sees it.
    host.stage_context(&json!({"count": 2}));
    assert_eq!(bridge.node.fetch_context()?, json!({"count": 2}));

    assert_eq!(bridge.node.fetch_descriptor()?, json!({"id": "n1"}));
    Ok(())
}

#[test]
fn pending_queue_drains_to_none() -> Result<()> {
    let host = RecordingHost::new();
    host.queue_pending(&json!({"seq": 1}));
    host.queue_pending(&json!({"seq": 2}));
    let bridge = build_bridge(Arc::clone(&host), Arc::new(SharedLock::new()));

    bridge.node.begin_firing()?;
    assert_eq!(bridge.node.pop_pending()?, Some(json!({"seq": 1})));
    assert_eq!(bridge.node.pop_pending()?, Some(json!({"seq": 2})));
    assert_eq!(bridge.node.pop_pending()?, None);
    Ok(())
}

#[test]
fn type_registration_roundtrip() -> Result<()> {
    let host = RecordingHost::new();
    let bridge = build_bridge(Arc::clone(&host), Arc::new(SharedLock::new()));
    let ctor = ConstructorRef::new("ctor-my-node");

    bridge
        .node
        .register_type("my-node", &ctor, &json!({"category": "function"}))?;

    let (registered_ctor, options) = host.lookup_type("my-node").expect("type registered");
    assert_eq!(registered_ctor, ctor);
    assert_eq!(options, json!({"category": "function"}));

    // Uniqueness is host-enforced.
    assert!(matches!(
        bridge.node.register_type("my-node", &ctor, &json!({})),
        Err(Error::Host(_))
    ));

    // Registration is definition-time only.
    bridge.node.begin_firing()?;
    assert!(matches!(
        bridge.node.register_type("late-node", &ctor, &json!({})),
        Err(Error::MidSessionRegistration)
    ));
    Ok(())
}

#[test]
fn set_result_is_read_after_the_guest_terminates() -> Result<()> {
    let host = RecordingHost::new();
    let bridge = build_bridge(Arc::clone(&host), Arc::new(SharedLock::new()));

    bridge.node.begin_firing()?;
    bridge.node.set_result(&json!({"answer": 42}))?;
    bridge.node.finish_firing();

    assert_eq!(host.take_result(), Some(json!({"answer": 42})));
    Ok(())
}

#[test]
fn emit_carries_a_named_event() -> Result<()> {
    let host = RecordingHost::new();
    let bridge = build_bridge(Arc::clone(&host), Arc::new(SharedLock::new()));

    bridge.node.begin_firing()?;
    bridge.node.emit("progress", &json!({"pct": 50}))?;

    assert_eq!(
        host.events(),
        vec![HostEvent::Emit(
            json!({"event": "progress", "payload": {"pct": 50}})
        )]
    );
    Ok(())
}

#[test]
fn warn_failures_never_reach_the_guest() -> Result<()> {
    let host = Arc::new(RecordingHost {
        fail_warn: true,
        ..RecordingHost::default()
    });
    host.stage_message(&json!({}));
    let bridge = build_bridge(Arc::clone(&host), Arc::new(SharedLock::new()));

    bridge.node.begin_firing()?;
    bridge.node.warn(&json!({"note": "dropped"}));

    // The firing continues unaffected.
    bridge.node.send(&json!({"seq": 1}))?;
    bridge.node.done(None)?;
    assert_eq!(
        host.events(),
        vec![
            HostEvent::Send(json!({"seq": 1})),
            HostEvent::Done(Value::Null),
        ]
    );
    Ok(())
}

#[test]
fn fs_write_then_chunked_read_roundtrip() -> Result<()> {
    let dir = tempfile::tempdir()?;
    let path = dir.path().join("data.bin");
    let path = path.to_str().unwrap();
    let bridge = build_bridge(RecordingHost::new(), Arc::new(SharedLock::new()));

    let mut content = vec![0_u8; 10];
    content.extend_from_slice(&[0x01, 0x02, 0x03, 0x04]);
    bridge
        .fs
        .write_file(path, &ScriptValue::buffer(content.clone()), 0, "w")?;

    let (read, bytes) = bridge.fs.read_chunk(path, 10, 4, "r")?;
    assert_eq!(read, 4);
    assert_eq!(&bytes[..], &[0x01, 0x02, 0x03, 0x04]);

    let whole = bridge.fs.read_file(path, "r")?;
    assert_eq!(&whole[..], &content[..]);
    Ok(())
}

#[test]
fn http_request_passes_through_the_policy() -> Result<()> {
    let bridge = build_bridge(RecordingHost::new(), Arc::new(SharedLock::new()));

    let response = bridge.http.request(
        "example.com/api/data",
        &json!({"q": 1}),
        &Value::Null,
        "GET",
    )?;
    assert_eq!(response["endpoint"], json!("example.com/api/data"));
    assert_eq!(response["method"], json!("GET"));
    Ok(())
}

#[test]
fn lock_guard_spans_a_firing_and_releases() -> Result<()> {
    let shared = Arc::new(SharedLock::new());
    let bridge = build_bridge(RecordingHost::new(), Arc::clone(&shared));

    bridge.node.begin_firing()?;
    {
        let _guard = bridge.lock.acquire()?;
        assert!(shared.is_locked());
        bridge.node.send(&json!({"guarded": true}))?;
    }
    assert!(!shared.is_locked());
    bridge.node.done(None)?;
    Ok(())
}

#[test]
fn instances_stay_isolated() -> Result<()> {
    let host_a = RecordingHost::new();
    let host_b = RecordingHost::new();
    let bridge_a = build_bridge(Arc::clone(&host_a), Arc::new(SharedLock::new()));
    let bridge_b = build_bridge(Arc::clone(&host_b), Arc::new(SharedLock::new()));

    bridge_a.node.begin_firing()?;
    bridge_a.node.done(None)?;

    // Instance B never opened a firing; its session state is untouched.
    assert_eq!(bridge_b.node.phase(), Phase::Idle);
    assert!(matches!(
        bridge_b.node.fetch_message(),
        Err(Error::NoActiveMessage)
    ));
    assert!(host_b.events().is_empty());
    Ok(())
}
