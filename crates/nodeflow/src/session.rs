//! Invocation-session lifecycle.
//!
//! One session per node firing, tracked as an explicit state machine and
//! checked on every bridge call. `Idle` means no firing is open.

use parking_lot::Mutex;

use crate::error::{Error, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    /// No firing open; definition-time calls only.
    Idle,
    /// Firing opened by the host, no message-path call made yet.
    Start,
    /// At least one fetch, pop, or send has run.
    Active,
    /// `done` has been called. Terminal within the firing.
    Closed,
}

#[derive(Debug)]
pub(crate) struct SessionState(Mutex<Phase>);

impl SessionState {
    pub(crate) const fn new() -> Self {
        Self(Mutex::new(Phase::Idle))
    }

    pub(crate) fn phase(&self) -> Phase {
        *self.0.lock()
    }

    /// Open a firing. Exactly one may be open at a time.
    pub(crate) fn begin(&self) -> Result<()> {
        let mut phase = self.0.lock();
        match *phase {
            Phase::Idle => {
                *phase = Phase::Start;
                Ok(())
            }
            Phase::Start | Phase::Active | Phase::Closed => Err(Error::FiringInProgress),
        }
    }

    /// Destroy the session unconditionally; the bridge returns to `Idle`.
    pub(crate) fn finish(&self) {
        *self.0.lock() = Phase::Idle;
    }

    /// Guard for message-path calls (fetch, pop, send). Activates the
    /// session on first use.
    pub(crate) fn touch(&self) -> Result<()> {
        let mut phase = self.0.lock();
        match *phase {
            Phase::Idle => Err(Error::NoActiveMessage),
            Phase::Closed => Err(Error::SessionClosed),
            Phase::Start => {
                *phase = Phase::Active;
                Ok(())
            }
            Phase::Active => Ok(()),
        }
    }

    /// Guard for `done`: allowed exactly once per session.
    pub(crate) fn close(&self) -> Result<()> {
        let mut phase = self.0.lock();
        match *phase {
            Phase::Idle => Err(Error::NoActiveMessage),
            Phase::Closed => Err(Error::SessionClosed),
            Phase::Start | Phase::Active => {
                *phase = Phase::Closed;
                Ok(())
            }
        }
    }

    /// Guard for side channels (emit, warn, set_result): any non-`Closed`
    /// phase, including definition time.
    pub(crate) fn ensure_open(&self) -> Result<()> {
        match *self.0.lock() {
            Phase::Closed => Err(Error::SessionClosed),
            Phase::Idle | Phase::Start | Phase::Active => Ok(()),
        }
    }

    /// Guard for type registration: definition time only.
    pub(crate) fn ensure_definition_time(&self) -> Result<()> {
        match *self.0.lock() {
            Phase::Idle => Ok(()),
            Phase::Start | Phase::Active | Phase::Closed => Err(Error::MidSessionRegistration),
        }
    }
}
