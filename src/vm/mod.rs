use crate::{
    resolve::ClassLinker,
    utils::MethodId,
    value::{ArenaHeap, HeapOps},
};
use std::sync::Arc;
use tracing::{debug, error};

pub mod config;
pub mod entrypoints;
pub mod exceptions;
pub mod metrics;
pub mod mutator;
pub mod native;
pub mod sync;
pub mod thread;
pub mod threading;

use config::RuntimeConfig;
use exceptions::ManagedResult;
use metrics::RuntimeMetrics;
use mutator::{MutatorLock, SharedMutatorGuard};
use sync::SyncBlockManager;
use thread::{ManagedThread, ThreadState, STACK_OVERFLOW_RESERVED_FRAMES};
use threading::{SuspendAllGuard, ThreadList};

/// Process-wide runtime state shared by every managed thread.
pub struct Runtime {
    config: RuntimeConfig,
    metrics: Arc<RuntimeMetrics>,
    linker: ClassLinker,
    heap: Box<dyn HeapOps>,
    threads: ThreadList,
    monitors: SyncBlockManager,
    mutator_lock: MutatorLock,
}

impl Runtime {
    pub fn new(config: RuntimeConfig) -> Self {
        let heap = ArenaHeap::new(config.heap_capacity);
        Self::with_heap(config, Box::new(heap))
    }

    pub fn with_heap(config: RuntimeConfig, heap: Box<dyn HeapOps>) -> Self {
        let metrics = Arc::new(RuntimeMetrics::new());
        Self {
            linker: ClassLinker::new(metrics.clone()),
            threads: ThreadList::new(metrics.clone()),
            monitors: SyncBlockManager::new(),
            mutator_lock: MutatorLock::new(),
            heap,
            metrics,
            config,
        }
    }

    pub fn config(&self) -> &RuntimeConfig {
        &self.config
    }

    pub fn metrics(&self) -> &RuntimeMetrics {
        &self.metrics
    }

    pub fn linker(&self) -> &ClassLinker {
        &self.linker
    }

    pub fn heap(&self) -> &dyn HeapOps {
        self.heap.as_ref()
    }

    pub fn threads(&self) -> &ThreadList {
        &self.threads
    }

    pub fn monitors(&self) -> &SyncBlockManager {
        &self.monitors
    }

    pub fn mutator_lock(&self) -> &MutatorLock {
        &self.mutator_lock
    }

    /// Registers the calling OS thread with the runtime.
    pub fn attach_thread(&self, name: &str) -> Arc<ManagedThread> {
        let thread = self.threads.attach(name);
        debug!(thread = %thread.id(), name, "attached thread");
        thread
    }

    pub fn detach_thread(&self, thread: &ManagedThread) {
        self.threads.detach(thread);
        debug!(thread = %thread.id(), "detached thread");
    }

    /// Makes `thread` runnable and returns the token every entry point requires. Blocks while
    /// the thread is suspended.
    pub fn scoped(&self, thread: &Arc<ManagedThread>) -> ScopedAccess<'_> {
        loop {
            thread.wait_while_suspended();
            let shared = self.mutator_lock.shared();
            if self.threads.try_transition_to_runnable(thread) {
                return ScopedAccess {
                    runtime: self,
                    thread: thread.clone(),
                    shared,
                };
            }
        }
    }

    /// Stops every other thread and holds the mutator lock exclusively until the guard drops.
    /// The calling thread must not hold a [`ScopedAccess`].
    pub fn suspend_all(&self) -> SuspendAllGuard<'_> {
        self.threads
            .suspend_all(&self.mutator_lock, self.config.suspend_warn_timeout)
    }

    /// Reclaims released objects with the world stopped. Returns how many were freed.
    pub fn collect_garbage(&self) -> usize {
        let _world = self.suspend_all();
        let freed = self.heap.collect();
        let monitors = self.monitors.prune(|object| self.heap.is_live(object));
        self.metrics.record_gc();
        debug!(
            freed,
            monitors,
            live = self.heap.live_objects(),
            "garbage collection finished"
        );
        freed
    }

    /// Reports a broken runtime invariant and aborts.
    pub fn fatal(&self, message: &str) -> ! {
        error!(reason = message, "fatal runtime error");
        if let Some(hook) = &self.config.abort_hook {
            hook(message);
        }
        std::process::abort()
    }
}

/// Proof that a thread is runnable and holds the mutator lock shared. Dropping it moves the
/// thread back to the native state.
pub struct ScopedAccess<'r> {
    runtime: &'r Runtime,
    thread: Arc<ManagedThread>,
    shared: SharedMutatorGuard<'r>,
}

impl<'r> ScopedAccess<'r> {
    pub fn runtime(&self) -> &'r Runtime {
        self.runtime
    }

    pub fn thread(&self) -> &Arc<ManagedThread> {
        &self.thread
    }

    /// Enters `method`, raising `StackOverflowError` past the configured depth.
    pub fn push_frame(&mut self, method: MethodId) -> ManagedResult<()> {
        let max = self.runtime.config.max_stack_depth;
        let limit = if self.thread.is_handling_stack_overflow() {
            max + STACK_OVERFLOW_RESERVED_FRAMES
        } else {
            max
        };
        if self.thread.frame_depth() >= limit {
            return Err(entrypoints::throw_stack_overflow_error(self));
        }
        self.thread.push_frame(method);
        Ok(())
    }

    pub fn pop_frame(&mut self) -> Option<MethodId> {
        let popped = self.thread.pop_frame();
        if self.thread.is_handling_stack_overflow()
            && self.thread.frame_depth() < self.runtime.config.max_stack_depth
        {
            self.thread.set_handling_stack_overflow(false);
        }
        popped
    }
}

impl Drop for ScopedAccess<'_> {
    fn drop(&mut self) {
        self.runtime
            .threads
            .transition_from_runnable(&self.thread, ThreadState::Native);
    }
}
