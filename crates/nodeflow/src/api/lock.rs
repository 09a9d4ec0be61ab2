//! Lock bridge.
//!
//! A single host-managed, non-reentrant mutex exposed to guest code, used
//! to guard shared critical sections such as trace instrumentation.

use std::sync::Arc;

use parking_lot::lock_api::RawMutex as _;
use tracing::warn;

use crate::TRACE_TARGET_BRIDGE;
use crate::error::{Error, Result};
use crate::host::{BoxError, LockHost};
use crate::scope::{Captured, Primitive, Scope, SignalFn};

pub const LOCK: &str = "__lock";
pub const UNLOCK: &str = "__unlock";

/// Every raw name this capability consumes at bootstrap.
pub const CONSUMED: &[&str] = &[LOCK, UNLOCK];

/// Install the raw lock primitives over `host`.
pub fn install_lock(scope: &mut Scope, host: Arc<dyn LockHost>) {
    {
        let host = Arc::clone(&host);
        scope.bind(LOCK, Primitive::Signal(Arc::new(move || host.lock())));
    }
    scope.bind(UNLOCK, Primitive::Signal(Arc::new(move || host.unlock())));
}

/// The vetted lock namespace.
pub struct LockApi {
    lock: Captured<SignalFn>,
    unlock: Captured<SignalFn>,
}

impl LockApi {
    /// Capture the lock primitives out of `scope` and revoke their names.
    #[must_use]
    pub fn bootstrap(scope: &mut Scope) -> Self {
        let api = Self {
            lock: scope.capture_signal(LOCK),
            unlock: scope.capture_signal(UNLOCK),
        };
        for name in CONSUMED {
            scope.revoke(name);
        }
        api
    }

    /// Acquire the shared mutex. Blocks or fails in the host if it is
    /// already held; never silently succeeds twice.
    ///
    /// # Errors
    /// Fails on host errors or a missing primitive.
    pub fn lock(&self) -> Result<()> {
        (self.lock.get()?)().map_err(Error::Host)
    }

    /// Release the shared mutex. An unlock without a matching lock is a
    /// usage error the host rejects.
    ///
    /// # Errors
    /// Fails on host errors or a missing primitive.
    pub fn unlock(&self) -> Result<()> {
        (self.unlock.get()?)().map_err(Error::Host)
    }

    /// Scoped acquisition: the returned guard releases on every exit path,
    /// including unwinding, so an abnormally terminated guest cannot leave
    /// the lock held.
    ///
    /// # Errors
    /// Fails if the acquisition itself fails.
    pub fn acquire(&self) -> Result<LockGuard<'_>> {
        self.lock()?;
        Ok(LockGuard {
            api: self,
            released: false,
        })
    }
}

/// Guard over a held lock. Dropping releases it best-effort; use
/// [`LockGuard::release`] to observe unlock errors.
pub struct LockGuard<'a> {
    api: &'a LockApi,
    released: bool,
}

impl LockGuard<'_> {
    /// Release explicitly, surfacing any unlock error.
    ///
    /// # Errors
    /// Fails if the host rejects the unlock.
    pub fn release(mut self) -> Result<()> {
        self.released = true;
        self.api.unlock()
    }
}

impl Drop for LockGuard<'_> {
    fn drop(&mut self) {
        if self.released {
            return;
        }
        if let Err(error) = self.api.unlock() {
            warn!(target: TRACE_TARGET_BRIDGE, %error, "lock release failed on drop");
        }
    }
}

/// Reference [`LockHost`] over a raw mutex.
///
/// `lock` blocks until the mutex is free; `unlock` rejects a release with
/// no matching acquisition.
pub struct SharedLock {
    raw: parking_lot::RawMutex,
}

impl Default for SharedLock {
    fn default() -> Self {
        Self::new()
    }
}

impl SharedLock {
    #[must_use]
    pub const fn new() -> Self {
        Self {
            raw: parking_lot::RawMutex::INIT,
        }
    }

    /// Non-blocking probe, for hosts that prefer failing over blocking.
    #[must_use]
    pub fn try_lock(&self) -> bool {
        self.raw.try_lock()
    }

    #[must_use]
    pub fn is_locked(&self) -> bool {
        self.raw.is_locked()
    }
}

impl LockHost for SharedLock {
    fn lock(&self) -> core::result::Result<(), BoxError> {
        self.raw.lock();
        Ok(())
    }

    fn unlock(&self) -> core::result::Result<(), BoxError> {
        if !self.raw.is_locked() {
            return Err(std::io::Error::other("unlock without a matching lock").into());
        }
        // SAFETY: checked above that the mutex is held; the bridge models
        // one logical guest thread, which is the holding context.
        unsafe { self.raw.unlock() };
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use std::sync::mpsc;
    use std::time::Duration;

    use super::*;

    fn lock_api(host: Arc<SharedLock>) -> LockApi {
        let mut scope = Scope::new();
        install_lock(&mut scope, host);
        LockApi::bootstrap(&mut scope)
    }

    #[test]
    fn lock_unlock_roundtrip() {
        let host = Arc::new(SharedLock::new());
        let api = lock_api(Arc::clone(&host));

        api.lock().unwrap();
        assert!(host.is_locked());
        api.unlock().unwrap();
        assert!(!host.is_locked());

        // Acquirable again after the roundtrip.
        api.lock().unwrap();
        api.unlock().unwrap();
    }

    #[test]
    fn unlock_without_lock_is_rejected() {
        let api = lock_api(Arc::new(SharedLock::new()));
        assert!(matches!(api.unlock(), Err(Error::Host(_))));
    }

    #[test]
    fn second_lock_blocks_until_release() {
        let host = Arc::new(SharedLock::new());
        let api = lock_api(Arc::clone(&host));
        api.lock().unwrap();

        let (tx, rx) = mpsc::channel();
        let contender = {
            let host = Arc::clone(&host);
            std::thread::spawn(move || {
                host.lock().unwrap();
                tx.send(()).unwrap();
                host.unlock().unwrap();
            })
        };

        // The contender cannot acquire while the guest holds the lock.
        assert!(rx.recv_timeout(Duration::from_millis(50)).is_err());

        api.unlock().unwrap();
        rx.recv_timeout(Duration::from_secs(5)).unwrap();
        contender.join().unwrap();
    }

    #[test]
    fn guard_releases_on_drop() {
        let host = Arc::new(SharedLock::new());
        let api = lock_api(Arc::clone(&host));

        {
            let _guard = api.acquire().unwrap();
            assert!(host.is_locked());
        }
        assert!(!host.is_locked());
    }

    #[test]
    fn guard_releases_during_unwind() {
        let host = Arc::new(SharedLock::new());
        let api = lock_api(Arc::clone(&host));

        let result = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
            let _guard = api.acquire().unwrap();
            panic!("guest failure while holding the lock");
        }));
        assert!(result.is_err());
        assert!(!host.is_locked());
    }

    #[test]
    fn explicit_release_surfaces_errors() {
        let host = Arc::new(SharedLock::new());
        let api = lock_api(Arc::clone(&host));

        let guard = api.acquire().unwrap();
        guard.release().unwrap();
        assert!(!host.is_locked());
    }
}
