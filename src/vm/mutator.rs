use parking_lot::{RwLock, RwLockReadGuard, RwLockWriteGuard};

/// Shared access is held by every runnable thread; exclusive access is taken by a controller
/// once every other thread has stopped.
#[derive(Debug, Default)]
pub struct MutatorLock {
    lock: RwLock<()>,
}

pub type SharedMutatorGuard<'a> = RwLockReadGuard<'a, ()>;
pub type ExclusiveMutatorGuard<'a> = RwLockWriteGuard<'a, ()>;

impl MutatorLock {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn shared(&self) -> SharedMutatorGuard<'_> {
        self.lock.read()
    }

    pub fn exclusive(&self) -> ExclusiveMutatorGuard<'_> {
        self.lock.write()
    }

    pub fn is_exclusively_held(&self) -> bool {
        self.lock.is_locked_exclusive()
    }
}
