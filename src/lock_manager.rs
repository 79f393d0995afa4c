//! Host-side locking for the decoding library.
//!
//! FFmpeg historically asked its host for mutexes through a single
//! callback taking a lock slot and an operation (create, obtain, release,
//! destroy) and returning an integer status. [`LockManager`] models that
//! callback as four methods; [`HostLockManager`] fulfils it with
//! [`HostMutex`]. Nothing may unwind across the callback boundary, so
//! [`lock_callback`] turns panics into a nonzero status.

use std::{
    panic::{AssertUnwindSafe, catch_unwind},
    sync::{Arc, Condvar, Mutex, PoisonError},
};

/// Status returned by a successful lock operation.
pub const LOCK_OK: i32 = 0;
/// Status returned by a failed lock operation.
pub const LOCK_ERROR: i32 = -1;

/// A lock slot owned by the library; `None` until created.
pub type LockSlot = Option<Arc<HostMutex>>;

/// The four operations the library may request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LockOperation {
    /// Allocate a new lock into the slot.
    Create,
    /// Block until the lock is held.
    Obtain,
    /// Release a held lock.
    Release,
    /// Free the lock and empty the slot.
    Destroy,
}

/// A mutex that can be locked and unlocked from separate calls.
///
/// Unlike [`std::sync::Mutex`] it hands out no guard, which is what a
/// C-style lock callback needs.
#[derive(Debug, Default)]
pub struct HostMutex {
    locked: Mutex<bool>,
    released: Condvar,
}

impl HostMutex {
    /// Create an unlocked mutex.
    pub fn new() -> Self {
        Self::default()
    }

    /// Block until the mutex is acquired.
    pub fn lock(&self) {
        let mut locked = self.locked.lock().unwrap_or_else(PoisonError::into_inner);
        while *locked {
            locked = self
                .released
                .wait(locked)
                .unwrap_or_else(PoisonError::into_inner);
        }
        *locked = true;
    }

    /// Release the mutex. Returns `false` if it was not held.
    pub fn unlock(&self) -> bool {
        let mut locked = self.locked.lock().unwrap_or_else(PoisonError::into_inner);
        if !*locked {
            return false;
        }
        *locked = false;
        self.released.notify_one();
        true
    }

    /// Whether the mutex is currently held.
    pub fn is_locked(&self) -> bool {
        *self.locked.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Mutex provider registered with the library at initialization.
///
/// Every method reports failure through its return value ([`LOCK_OK`] or
/// a nonzero code) instead of panicking.
pub trait LockManager: Send + Sync {
    /// Allocate a lock into `slot`.
    fn create(&self, slot: &mut LockSlot) -> i32;
    /// Acquire the lock in `slot`, blocking.
    fn obtain(&self, slot: &LockSlot) -> i32;
    /// Release the lock in `slot`.
    fn release(&self, slot: &LockSlot) -> i32;
    /// Free the lock in `slot` and leave it empty.
    fn destroy(&self, slot: &mut LockSlot) -> i32;
}

/// [`LockManager`] backed by [`HostMutex`].
#[derive(Debug, Default, Clone, Copy)]
pub struct HostLockManager;

impl LockManager for HostLockManager {
    fn create(&self, slot: &mut LockSlot) -> i32 {
        *slot = Some(Arc::new(HostMutex::new()));
        LOCK_OK
    }

    fn obtain(&self, slot: &LockSlot) -> i32 {
        match slot {
            Some(mutex) => {
                mutex.lock();
                LOCK_OK
            }
            None => LOCK_ERROR,
        }
    }

    fn release(&self, slot: &LockSlot) -> i32 {
        match slot {
            Some(mutex) if mutex.unlock() => LOCK_OK,
            _ => LOCK_ERROR,
        }
    }

    fn destroy(&self, slot: &mut LockSlot) -> i32 {
        match slot.take() {
            Some(_) => LOCK_OK,
            None => LOCK_ERROR,
        }
    }
}

/// Dispatch `operation` to `manager` the way the library's callback does.
///
/// A panicking manager yields [`LOCK_ERROR`].
pub fn lock_callback(manager: &dyn LockManager, slot: &mut LockSlot, operation: LockOperation) -> i32 {
    catch_unwind(AssertUnwindSafe(|| match operation {
        LockOperation::Create => manager.create(slot),
        LockOperation::Obtain => manager.obtain(slot),
        LockOperation::Release => manager.release(slot),
        LockOperation::Destroy => manager.destroy(slot),
    }))
    .unwrap_or_else(|_| {
        log::error!("Lock manager panicked during {operation:?}");
        LOCK_ERROR
    })
}
