//! Thread registry and the suspension protocol.
//!
//! Controllers ask threads to stop (or to run a checkpoint) by setting request flags; a
//! runnable thread notices the flags at its next [`ScopedAccess::check_suspend`]. A thread that
//! is not runnable (native or already suspended) counts as stopped, and it cannot become
//! runnable again while a suspension is outstanding.
//!
//! The protocol:
//! 1. The controller raises the target's suspend count and sets its suspend flag.
//! 2. It waits until the target leaves the runnable state.
//! 3. A target reaching a suspend check marks itself suspended, releases its shared mutator
//!    access, and blocks until its suspend count drops back to zero.
//! 4. Dropping the guard lowers the count and wakes the target, which reacquires shared access
//!    before running managed code again.
//!
//! Suspend-all additionally takes the mutator lock exclusively once every thread is stopped.
use crate::{
    utils::ThreadId,
    vm::{
        metrics::RuntimeMetrics,
        mutator::{ExclusiveMutatorGuard, MutatorLock},
        thread::{ManagedThread, ThreadFlag, ThreadState},
        ScopedAccess,
    },
};
use parking_lot::{Condvar, Mutex, MutexGuard, RwLockReadGuard};
use std::{
    cell::Cell,
    collections::HashMap,
    sync::{
        atomic::{AtomicU64, Ordering},
        Arc,
    },
    time::{Duration, Instant},
};
use tracing::warn;

thread_local! {
    /// Managed thread attached to the current OS thread.
    static CURRENT_THREAD: Cell<Option<ThreadId>> = const { Cell::new(None) };
}

pub fn current_thread_id() -> Option<ThreadId> {
    CURRENT_THREAD.get()
}

pub struct ThreadList {
    threads: Mutex<HashMap<ThreadId, Arc<ManagedThread>>>,
    next_thread_id: AtomicU64,
    /// Guards state transitions so controllers observe them consistently.
    state_lock: Mutex<()>,
    state_changed: Condvar,
    /// Only one suspend-all may be in progress at a time.
    suspend_all_lock: Mutex<()>,
    metrics: Arc<RuntimeMetrics>,
}

impl ThreadList {
    pub fn new(metrics: Arc<RuntimeMetrics>) -> Self {
        Self {
            threads: Mutex::new(HashMap::new()),
            // Thread ID 0 is reserved
            next_thread_id: AtomicU64::new(1),
            state_lock: Mutex::new(()),
            state_changed: Condvar::new(),
            suspend_all_lock: Mutex::new(()),
            metrics,
        }
    }

    /// Registers the calling OS thread. The new thread starts out native.
    pub fn attach(&self, name: &str) -> Arc<ManagedThread> {
        let id = ThreadId(self.next_thread_id.fetch_add(1, Ordering::SeqCst));
        let thread = Arc::new(ManagedThread::new(id, name.to_string()));
        self.threads.lock().insert(id, thread.clone());
        CURRENT_THREAD.set(Some(id));
        thread
    }

    pub fn detach(&self, thread: &ManagedThread) {
        {
            let _state = self.state_lock.lock();
            thread.set_state(ThreadState::Exited);
            self.state_changed.notify_all();
        }
        self.threads.lock().remove(&thread.id());
        if CURRENT_THREAD.get() == Some(thread.id()) {
            CURRENT_THREAD.set(None);
        }
    }

    pub fn thread_count(&self) -> usize {
        self.threads.lock().len()
    }

    pub fn get(&self, id: ThreadId) -> Option<Arc<ManagedThread>> {
        self.threads.lock().get(&id).cloned()
    }

    pub fn list(&self) -> Vec<Arc<ManagedThread>> {
        let mut threads: Vec<_> = self.threads.lock().values().cloned().collect();
        threads.sort_by_key(|t| t.id());
        threads
    }

    /// Makes `thread` runnable unless a suspension is outstanding.
    pub(crate) fn try_transition_to_runnable(&self, thread: &ManagedThread) -> bool {
        let _state = self.state_lock.lock();
        if thread.suspend_count() > 0 {
            return false;
        }
        thread.set_state(ThreadState::Runnable);
        self.state_changed.notify_all();
        true
    }

    /// Leaves the runnable state. Any checkpoint accepted while runnable runs first.
    pub(crate) fn transition_from_runnable(&self, thread: &ManagedThread, state: ThreadState) {
        loop {
            if thread.run_pending_checkpoint() {
                self.metrics.record_checkpoint();
            }
            let _state = self.state_lock.lock();
            if thread.read_flag(ThreadFlag::CHECKPOINT_REQUEST) {
                continue;
            }
            thread.set_state(state);
            self.state_changed.notify_all();
            return;
        }
    }

    /// Asks `thread` to run `checkpoint` at its next suspend check. Fails (returning false)
    /// when the thread is not runnable or already has a checkpoint pending; the caller must
    /// then run the function on the thread's behalf.
    pub fn request_checkpoint<F>(&self, thread: &ManagedThread, checkpoint: F) -> bool
    where
        F: FnOnce(&ManagedThread) + Send + 'static,
    {
        let _state = self.state_lock.lock();
        if thread.state() != ThreadState::Runnable {
            return false;
        }
        thread.install_checkpoint(Box::new(checkpoint))
    }

    /// Runs `checkpoint` once for every attached thread: through a checkpoint request where the
    /// thread is runnable, or directly on this thread otherwise. Returns how many threads ran it
    /// themselves.
    pub fn run_checkpoint<F>(&self, checkpoint: F) -> usize
    where
        F: Fn(&ManagedThread) + Clone + Send + 'static,
    {
        let mut requested = 0;
        for thread in self.list() {
            if self.request_checkpoint(&thread, checkpoint.clone()) {
                requested += 1;
            } else {
                // Hold it still while running the function for it.
                let _guard = self.suspend(&thread, Duration::from_secs(1));
                checkpoint(&thread);
            }
        }
        requested
    }

    /// Suspends `thread` and waits until it has stopped running managed code.
    pub fn suspend<'a>(&'a self, thread: &Arc<ManagedThread>, warn_timeout: Duration) -> SuspendGuard<'a> {
        thread.request_suspend();
        self.metrics.record_suspension();
        self.wait_until_stopped(std::slice::from_ref(thread), warn_timeout);
        SuspendGuard {
            threads: self,
            target: thread.clone(),
        }
    }

    /// Suspends every attached thread except the caller, then takes the mutator lock
    /// exclusively. Must not be called while the caller holds scoped access.
    pub fn suspend_all<'a>(&'a self, mutator: &'a MutatorLock, warn_timeout: Duration) -> SuspendAllGuard<'a> {
        let serial = self.suspend_all_lock.lock();
        let started = Instant::now();
        let current = current_thread_id();
        if let Some(me) = current.and_then(|id| self.get(id)) {
            debug_assert_ne!(
                me.state(),
                ThreadState::Runnable,
                "suspend_all called while holding scoped access"
            );
        }

        let targets: Vec<_> = self
            .list()
            .into_iter()
            .filter(|t| Some(t.id()) != current)
            .collect();
        for target in &targets {
            target.request_suspend();
        }
        self.wait_until_stopped(&targets, warn_timeout);
        let exclusive = mutator.exclusive();

        SuspendAllGuard {
            threads: self,
            targets,
            exclusive: Some(exclusive),
            started,
            _serial: serial,
        }
    }

    fn wait_until_stopped(&self, targets: &[Arc<ManagedThread>], warn_timeout: Duration) {
        let start = Instant::now();
        let mut warned = false;
        let mut state = self.state_lock.lock();
        loop {
            let running: Vec<_> = targets
                .iter()
                .filter(|t| t.state() == ThreadState::Runnable)
                .collect();
            if running.is_empty() {
                break;
            }

            if !warned && start.elapsed() > warn_timeout {
                warn!(
                    waiting = running.len(),
                    total = targets.len(),
                    "suspension taking longer than expected"
                );
                for thread in &running {
                    warn!(
                        thread = %thread.id(),
                        name = thread.name(),
                        native = ?thread.native_id(),
                        "thread has not reached a suspend check"
                    );
                }
                warned = true;
            }

            self.state_changed
                .wait_for(&mut state, Duration::from_millis(50));
        }

        if warned {
            warn!(
                elapsed_ms = start.elapsed().as_millis() as u64,
                "suspension completed"
            );
        }
    }
}

/// Keeps one thread suspended; resumes it when dropped.
pub struct SuspendGuard<'a> {
    threads: &'a ThreadList,
    target: Arc<ManagedThread>,
}

impl SuspendGuard<'_> {
    pub fn thread(&self) -> &Arc<ManagedThread> {
        &self.target
    }
}

impl Drop for SuspendGuard<'_> {
    fn drop(&mut self) {
        let _state = self.threads.state_lock.lock();
        self.target.resume();
    }
}

/// Keeps every other thread suspended with the mutator lock held exclusively.
pub struct SuspendAllGuard<'a> {
    threads: &'a ThreadList,
    targets: Vec<Arc<ManagedThread>>,
    exclusive: Option<ExclusiveMutatorGuard<'a>>,
    started: Instant,
    _serial: MutexGuard<'a, ()>,
}

impl SuspendAllGuard<'_> {
    pub fn suspended_threads(&self) -> &[Arc<ManagedThread>] {
        &self.targets
    }
}

impl Drop for SuspendAllGuard<'_> {
    fn drop(&mut self) {
        // Release exclusive access before waking anyone, or they would block on it.
        self.exclusive.take();
        for target in &self.targets {
            target.resume();
        }
        self.threads
            .metrics
            .record_suspend_all(self.started.elapsed());
    }
}

impl ScopedAccess<'_> {
    /// Services pending requests: runs a requested checkpoint, and parks while a suspension
    /// is outstanding.
    pub fn check_suspend(&mut self) {
        loop {
            let flags = self.thread().flags();
            if flags & ThreadFlag::CHECKPOINT_REQUEST != 0 {
                if self.thread().run_pending_checkpoint() {
                    self.runtime().metrics().record_checkpoint();
                }
            } else if flags & ThreadFlag::SUSPEND_REQUEST != 0 {
                self.full_suspend_check();
            } else {
                return;
            }
        }
    }

    fn full_suspend_check(&mut self) {
        let runtime = self.runtime;
        let thread = self.thread.clone();
        runtime
            .threads()
            .transition_from_runnable(&thread, ThreadState::Suspended);
        loop {
            RwLockReadGuard::unlocked(&mut self.shared, || thread.wait_while_suspended());
            if runtime.threads().try_transition_to_runnable(&thread) {
                return;
            }
        }
    }
}
