//! Object monitors.
use crate::{
    utils::{ObjectRef, ThreadId},
    vm::{
        exceptions::{ExceptionKind, ManagedResult},
        ScopedAccess,
    },
};
use dashmap::DashMap;
use parking_lot::{Condvar, Mutex};
use std::{sync::Arc, time::Duration};

#[derive(Debug)]
struct SyncBlockState {
    /// `ThreadId::INVALID` means unlocked.
    owner: ThreadId,
    recursion_count: usize,
}

#[derive(Debug)]
pub struct SyncBlock {
    state: Mutex<SyncBlockState>,
    condvar: Condvar,
}

pub enum ExitResult {
    Released,
    /// The monitor is still held after a nested exit.
    StillHeld,
    NotOwner,
}

impl SyncBlock {
    fn new() -> Self {
        Self {
            state: Mutex::new(SyncBlockState {
                owner: ThreadId::INVALID,
                recursion_count: 0,
            }),
            condvar: Condvar::new(),
        }
    }

    pub fn try_enter(&self, thread: ThreadId) -> bool {
        let mut state = self.state.lock();
        if state.owner == ThreadId::INVALID {
            state.owner = thread;
            state.recursion_count = 1;
            true
        } else if state.owner == thread {
            state.recursion_count += 1;
            true
        } else {
            false
        }
    }

    /// Waits at most `timeout` for the monitor to become free.
    fn wait_for_release(&self, timeout: Duration) {
        let mut state = self.state.lock();
        if state.owner != ThreadId::INVALID {
            let _ = self.condvar.wait_for(&mut state, timeout);
        }
    }

    pub fn exit(&self, thread: ThreadId) -> ExitResult {
        let mut state = self.state.lock();
        if state.owner != thread {
            return ExitResult::NotOwner;
        }
        state.recursion_count -= 1;
        if state.recursion_count > 0 {
            return ExitResult::StillHeld;
        }
        state.owner = ThreadId::INVALID;
        self.condvar.notify_one();
        ExitResult::Released
    }

    pub fn owner(&self) -> Option<ThreadId> {
        let state = self.state.lock();
        (state.owner != ThreadId::INVALID).then_some(state.owner)
    }
}

#[derive(Debug, Default)]
pub struct SyncBlockManager {
    blocks: DashMap<ObjectRef, Arc<SyncBlock>>,
}

impl SyncBlockManager {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get_or_create(&self, object: ObjectRef) -> Arc<SyncBlock> {
        self.blocks
            .entry(object)
            .or_insert_with(|| Arc::new(SyncBlock::new()))
            .clone()
    }

    pub fn get(&self, object: ObjectRef) -> Option<Arc<SyncBlock>> {
        self.blocks.get(&object).map(|b| b.clone())
    }

    pub fn owner(&self, object: ObjectRef) -> Option<ThreadId> {
        self.get(object).and_then(|b| b.owner())
    }

    pub fn block_count(&self) -> usize {
        self.blocks.len()
    }

    /// Drops the unowned blocks of objects that are no longer live. Returns how many went.
    pub fn prune(&self, is_live: impl Fn(ObjectRef) -> bool) -> usize {
        let before = self.blocks.len();
        self.blocks
            .retain(|object, block| is_live(*object) || block.owner().is_some());
        before - self.blocks.len()
    }
}

impl ScopedAccess<'_> {
    /// Acquires the monitor of `object`, servicing suspend requests while blocked.
    pub fn monitor_enter(&mut self, object: Option<ObjectRef>) -> ManagedResult<()> {
        let Some(object) = object else {
            return Err(self.throw_new(
                ExceptionKind::NullPointer,
                "Attempt to lock a null object reference",
            ));
        };
        let block = self.runtime().monitors().get_or_create(object);
        let me = self.thread().id();
        let poll = self.runtime().config().init_wait_poll;
        while !block.try_enter(me) {
            self.check_suspend();
            block.wait_for_release(poll);
        }
        Ok(())
    }

    pub fn monitor_exit(&mut self, object: Option<ObjectRef>) -> ManagedResult<()> {
        let Some(object) = object else {
            return Err(self.throw_new(
                ExceptionKind::NullPointer,
                "Attempt to unlock a null object reference",
            ));
        };
        let released = self
            .runtime()
            .monitors()
            .get(object)
            .map(|block| block.exit(self.thread().id()));
        match released {
            Some(ExitResult::Released) | Some(ExitResult::StillHeld) => Ok(()),
            Some(ExitResult::NotOwner) | None => {
                let type_name = self
                    .runtime()
                    .heap()
                    .class_of(object)
                    .map(|c| self.runtime().linker().class(c).pretty_name())
                    .unwrap_or_else(|| "<invalid>".to_string());
                Err(self.throw_new(
                    ExceptionKind::IllegalMonitorState,
                    format!(
                        "did not lock monitor on object of type '{type_name}' before unlocking"
                    ),
                ))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;

    #[test]
    fn test_recursive_enter_and_exit() {
        let block = SyncBlock::new();
        assert!(block.try_enter(ThreadId(1)));
        assert!(block.try_enter(ThreadId(1)));
        assert!(!block.try_enter(ThreadId(2)));
        assert!(matches!(block.exit(ThreadId(1)), ExitResult::StillHeld));
        assert!(matches!(block.exit(ThreadId(2)), ExitResult::NotOwner));
        assert!(matches!(block.exit(ThreadId(1)), ExitResult::Released));
        assert_eq!(block.owner(), None);
        assert!(block.try_enter(ThreadId(2)));
    }

    #[test]
    fn test_waiter_acquires_after_release() {
        let manager = Arc::new(SyncBlockManager::new());
        let block = manager.get_or_create(ObjectRef(7));
        assert!(block.try_enter(ThreadId(1)));

        let waiter = {
            let manager = manager.clone();
            thread::spawn(move || {
                let block = manager.get_or_create(ObjectRef(7));
                while !block.try_enter(ThreadId(2)) {
                    block.wait_for_release(Duration::from_millis(10));
                }
            })
        };
        thread::sleep(Duration::from_millis(20));
        assert!(matches!(block.exit(ThreadId(1)), ExitResult::Released));
        waiter.join().unwrap();
        assert_eq!(manager.owner(ObjectRef(7)), Some(ThreadId(2)));
    }

    #[test]
    fn test_prune_keeps_live_and_owned_blocks() {
        let manager = SyncBlockManager::new();
        manager.get_or_create(ObjectRef(1));
        manager.get_or_create(ObjectRef(2));
        assert!(manager.get_or_create(ObjectRef(3)).try_enter(ThreadId(1)));

        assert_eq!(manager.prune(|object| object == ObjectRef(1)), 1);
        assert!(manager.get(ObjectRef(1)).is_some());
        assert!(manager.get(ObjectRef(2)).is_none());
        assert_eq!(manager.owner(ObjectRef(3)), Some(ThreadId(1)));
        assert_eq!(manager.block_count(), 2);
    }
}
