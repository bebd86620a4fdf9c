//! # Row Locks
//!
//! The exclusive lock behind `RowEntity::lock` / `unlock`.
//!
//! A row lock is not scoped to one call: it is taken by one call and released
//! by another (possibly from a different task, or by the administrative
//! `unlock_all`). The owned tokio guard is therefore parked inside the lock,
//! tagged with a ticket. The caller receives a [`RowGuard`] carrying that
//! ticket; only the matching guard can write the row or release the hold.
//!
//! ```text
//!   acquire() ──► tokio Mutex::lock_owned().await ──► (ticket, guard) parked
//!                                                  └─► RowGuard { ticket }
//!   RowGuard dropped / unlock(guard) ──► slot cleared if ticket matches
//!   force_release()  ──► slot cleared whatever the ticket (guard goes stale)
//! ```

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use tokio::sync::{Mutex as AsyncMutex, OwnedMutexGuard};

struct Hold {
    ticket: u64,
    _guard: OwnedMutexGuard<()>,
}

/// Exclusive, awaitable lock for one primary key.
#[derive(Default)]
pub(crate) struct RowLock {
    mutex: Arc<AsyncMutex<()>>,
    slot: Mutex<Option<Hold>>,
    tickets: AtomicU64,
}

impl RowLock {
    /// A lock that is already held (fresh, not-yet-stored entities).
    pub(crate) fn held() -> (Arc<RowLock>, RowGuard) {
        let lock = Arc::new(RowLock::default());
        // A brand-new mutex is always free.
        let ticket = lock.next_ticket();
        *lock.slot() = Arc::clone(&lock.mutex)
            .try_lock_owned()
            .ok()
            .map(|owned| Hold {
                ticket,
                _guard: owned,
            });
        let guard = RowGuard {
            lock: Arc::clone(&lock),
            ticket,
        };
        (lock, guard)
    }

    /// Waits until the lock is free and takes it.
    ///
    /// Also returns `true` when the call had to wait for another holder.
    pub(crate) async fn acquire(lock: &Arc<RowLock>) -> (RowGuard, bool) {
        let (owned, contended) = match Arc::clone(&lock.mutex).try_lock_owned() {
            Ok(owned) => (owned, false),
            Err(_) => (Arc::clone(&lock.mutex).lock_owned().await, true),
        };
        (RowLock::park(lock, owned), contended)
    }

    /// Releases the hold identified by `ticket`. Returns whether it was the
    /// current hold.
    fn release(&self, ticket: u64) -> bool {
        let hold = {
            let mut slot = self.slot();
            match slot.as_ref() {
                Some(hold) if hold.ticket == ticket => slot.take(),
                _ => None,
            }
        };
        hold.is_some()
    }

    /// Releases the current hold, whoever owns it. Returns whether it was
    /// held.
    pub(crate) fn force_release(&self) -> bool {
        let hold = self.slot().take();
        hold.is_some()
    }

    fn holds(&self, ticket: u64) -> bool {
        self.slot().as_ref().is_some_and(|hold| hold.ticket == ticket)
    }

    pub(crate) fn is_held(&self) -> bool {
        self.slot().is_some()
    }

    fn park(lock: &Arc<RowLock>, owned: OwnedMutexGuard<()>) -> RowGuard {
        let ticket = lock.next_ticket();
        *lock.slot() = Some(Hold {
            ticket,
            _guard: owned,
        });
        RowGuard {
            lock: Arc::clone(lock),
            ticket,
        }
    }

    fn next_ticket(&self) -> u64 {
        self.tickets.fetch_add(1, Ordering::Relaxed) + 1
    }

    fn slot(&self) -> MutexGuard<'_, Option<Hold>> {
        self.slot.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl fmt::Debug for RowLock {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RowLock")
            .field("held", &self.is_held())
            .finish()
    }
}

/// Proof that the caller holds one row lock.
///
/// Handed out by `RowEntity::lock`, `TableAccessor::load_locked` and the
/// other locking loads, and required by `modify`, `store` and `delete`.
/// Dropping the guard releases the lock. A guard whose hold was broken by
/// `TableAccessor::unlock_all` is stale and every write with it fails with
/// `DbError::NotLocked`.
#[must_use = "the row lock is released as soon as the guard is dropped"]
pub struct RowGuard {
    lock: Arc<RowLock>,
    ticket: u64,
}

impl RowGuard {
    /// Whether this guard still holds its lock.
    pub fn is_valid(&self) -> bool {
        self.lock.holds(self.ticket)
    }

    /// Whether this guard holds `lock`.
    pub(crate) fn guards(&self, lock: &Arc<RowLock>) -> bool {
        Arc::ptr_eq(&self.lock, lock) && self.is_valid()
    }

    /// Releases the lock now. Returns whether the guard still held it.
    pub fn release(self) -> bool {
        self.lock.release(self.ticket)
    }
}

impl Drop for RowGuard {
    fn drop(&mut self) {
        self.lock.release(self.ticket);
    }
}

impl fmt::Debug for RowGuard {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RowGuard")
            .field("ticket", &self.ticket)
            .field("valid", &self.is_valid())
            .finish()
    }
}
