use bytes::Bytes;

use nodeflow_envelope::Value;

/// A dynamic value guest code hands to the bridge.
///
/// Scripts traffic in two shapes: concrete byte buffers, which cross the
/// boundary through the marshaling protocol, and JSON-representable values,
/// which cross through the envelope codec. Operations that demand one shape
/// reject the other before any host call.
#[derive(Debug, Clone, PartialEq)]
pub enum ScriptValue {
    Buffer(Bytes),
    Json(Value),
}

impl ScriptValue {
    #[must_use]
    pub fn buffer(bytes: impl Into<Bytes>) -> Self {
        Self::Buffer(bytes.into())
    }

    #[must_use]
    pub fn json(value: impl Into<Value>) -> Self {
        Self::Json(value.into())
    }

    #[must_use]
    pub const fn as_buffer(&self) -> Option<&Bytes> {
        match self {
            Self::Buffer(bytes) => Some(bytes),
            Self::Json(_) => None,
        }
    }
}

impl From<Bytes> for ScriptValue {
    fn from(bytes: Bytes) -> Self {
        Self::Buffer(bytes)
    }
}

impl From<Value> for ScriptValue {
    fn from(value: Value) -> Self {
        Self::Json(value)
    }
}
