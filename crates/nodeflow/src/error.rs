use thiserror::Error;

use crate::host::BoxError;

pub type Result<T, E = Error> = core::result::Result<T, E>;

#[derive(Error, Debug)]
pub enum Error {
    /// Wrong argument shape, rejected before any host call.
    #[error("type mismatch: {0}")]
    TypeMismatch(&'static str),

    /// The raw primitive was absent (or bound with the wrong shape) when
    /// its capability module was bootstrapped.
    #[error("raw primitive `{0}` is unavailable in this scope")]
    UnavailablePrimitive(&'static str),

    /// Inbound bytes did not decode to a JSON value.
    #[error("malformed envelope")]
    MalformedEnvelope(#[source] nodeflow_envelope::Error),

    /// A message-path operation was called with no firing open.
    #[error("no active message")]
    NoActiveMessage,

    /// A session operation was called after `done`.
    #[error("session closed")]
    SessionClosed,

    /// `begin_firing` while a firing is already open.
    #[error("a firing is already in progress")]
    FiringInProgress,

    /// Type registration attempted while a firing is open.
    #[error("type registration while a firing is open")]
    MidSessionRegistration,

    /// Declared operation with no implementation contract.
    #[error("`{0}` is not supported")]
    Unsupported(&'static str),

    /// Fill destination smaller than the staged value.
    #[error("undersized region: staged value is {staged} bytes, region holds {region}")]
    UndersizedRegion { staged: usize, region: usize },

    /// Fill call without an immediately preceding length query.
    #[error("fill without a staged value")]
    MissingStagedValue,

    /// Host-surfaced error, passed through opaquely.
    #[error("host error: {0}")]
    Host(#[source] BoxError),
}
