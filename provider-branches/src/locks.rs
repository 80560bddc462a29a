use dashmap::DashMap;
use std::sync::Arc;
use tokio::sync::{Mutex, OwnedMutexGuard};
use uuid::Uuid;

type LockMap = DashMap<Uuid, Arc<Mutex<()>>>;

/// Per-doctor write locks.
///
/// Every mutation of a doctor's aggregate holds that doctor's lock from
/// load to commit. Doctors never share a lock. An entry lives only while
/// someone holds or waits on it.
#[derive(Debug, Clone, Default)]
pub struct DoctorLocks {
    locks: Arc<LockMap>,
}

impl DoctorLocks {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn acquire(&self, doctor_id: Uuid) -> DoctorLockGuard {
        // Clone the Arc so the map shard is released before awaiting
        let lock = Arc::clone(
            self.locks
                .entry(doctor_id)
                .or_insert_with(|| Arc::new(Mutex::new(())))
                .value(),
        );
        DoctorLockGuard {
            guard: lock.lock_owned().await,
            doctor_id,
            locks: Arc::clone(&self.locks),
        }
    }

    pub fn len(&self) -> usize {
        self.locks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.locks.is_empty()
    }
}

/// Held lock for one doctor; removes the registry entry on release when no
/// other task is waiting for it
#[derive(Debug)]
pub struct DoctorLockGuard {
    guard: OwnedMutexGuard<()>,
    doctor_id: Uuid,
    locks: Arc<LockMap>,
}

impl Drop for DoctorLockGuard {
    fn drop(&mut self) {
        // The map and this guard account for two references. Waiters clone
        // the Arc under the shard lock, so any extra count keeps the entry.
        let held = OwnedMutexGuard::mutex(&self.guard);
        self.locks.remove_if(&self.doctor_id, |_, lock| {
            Arc::ptr_eq(lock, held) && Arc::strong_count(lock) == 2
        });
    }
}
