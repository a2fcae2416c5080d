//! Class initialization.
//!
//! Every class carries an atomic status word. Exactly one thread wins the
//! `Uninitialized -> Initializing` transition and runs the static initializer; a nested request
//! from that same thread proceeds as if initialization were complete, and every other thread
//! waits, polling for suspension requests between waits so a pending suspend-all can make progress.
use crate::{
    resolve::ClassLinker,
    types::{Class, ClassStatus},
    utils::{ClassId, ThreadId},
    vm::{
        exceptions::{ExceptionKind, Throwable},
        ScopedAccess,
    },
};
use parking_lot::{Condvar, Mutex};
use std::{
    sync::{
        atomic::{AtomicU64, AtomicU8, Ordering},
        Arc,
    },
    time::Duration,
};
use tracing::debug;

pub struct InitStatus {
    state: AtomicU8,
    /// The thread running the initializer. Only meaningful while `Initializing`.
    initializing_thread: AtomicU64,
    lock: Mutex<()>,
    cond: Condvar,
}

#[derive(Debug, PartialEq, Eq)]
pub enum InitAttempt {
    /// This thread must run the initializer.
    Execute,
    Initialized,
    /// Nested request on the initializing thread; proceed as if initialized.
    Recursive,
    Failed,
    /// Another thread is initializing the class.
    Waiting,
}

impl InitStatus {
    pub fn new(status: ClassStatus) -> Self {
        Self {
            state: AtomicU8::new(status as u8),
            initializing_thread: AtomicU64::new(ThreadId::INVALID.as_u64()),
            lock: Mutex::new(()),
            cond: Condvar::new(),
        }
    }

    pub fn status(&self) -> ClassStatus {
        ClassStatus::from_u8(self.state.load(Ordering::Acquire))
    }

    pub fn initializing_thread(&self) -> ThreadId {
        ThreadId(self.initializing_thread.load(Ordering::Acquire))
    }

    pub fn begin(&self, thread: ThreadId) -> InitAttempt {
        let current = self.state.load(Ordering::Acquire);
        if current == ClassStatus::Initializing as u8 && self.initializing_thread() == thread {
            return InitAttempt::Recursive;
        }
        match self.state.compare_exchange(
            ClassStatus::Uninitialized as u8,
            ClassStatus::Initializing as u8,
            Ordering::AcqRel,
            Ordering::Acquire,
        ) {
            Ok(_) => {
                self.initializing_thread
                    .store(thread.as_u64(), Ordering::Release);
                InitAttempt::Execute
            }
            Err(raw) => match ClassStatus::from_u8(raw) {
                ClassStatus::Initialized => InitAttempt::Initialized,
                ClassStatus::Erroneous => InitAttempt::Failed,
                ClassStatus::Initializing if self.initializing_thread() == thread => {
                    InitAttempt::Recursive
                }
                _ => InitAttempt::Waiting,
            },
        }
    }

    /// Publishes the outcome of an initialization attempt and wakes any waiters.
    pub fn finish(&self, status: ClassStatus) {
        self.state.store(status as u8, Ordering::Release);
        let _lock = self.lock.lock();
        self.cond.notify_all();
    }

    /// Gives up an attempt that never ran, returning the class to `Uninitialized`.
    pub fn abandon(&self) {
        self.initializing_thread
            .store(ThreadId::INVALID.as_u64(), Ordering::Release);
        self.finish(ClassStatus::Uninitialized);
    }

    /// Waits at most `timeout` for the status to leave `Initializing`.
    pub fn wait_for(&self, timeout: Duration) {
        let mut lock = self.lock.lock();
        if self.status() != ClassStatus::Initializing {
            return;
        }
        let _ = self.cond.wait_for(&mut lock, timeout);
    }
}

impl ClassLinker {
    /// Makes sure `class` is initialized, running its initializer (and its superclasses')
    /// if needed and allowed. Returns false with an exception pending on failure, or with
    /// nothing pending when initialization was needed but `can_run_clinit` forbade it.
    pub fn ensure_initialized(
        &self,
        soa: &mut ScopedAccess<'_>,
        class: ClassId,
        can_run_clinit: bool,
        can_init_parents: bool,
    ) -> bool {
        let class = self.class(class);
        if class.is_initialized() {
            return true;
        }
        self.initialize_class(soa, &class, can_run_clinit, can_init_parents)
    }

    fn initialize_class(
        &self,
        soa: &mut ScopedAccess<'_>,
        class: &Arc<Class>,
        can_run_clinit: bool,
        can_init_parents: bool,
    ) -> bool {
        let me = soa.thread().id();
        loop {
            if !can_run_clinit && class.status() == ClassStatus::Uninitialized {
                return false;
            }
            match class.init.begin(me) {
                InitAttempt::Execute => break,
                InitAttempt::Initialized | InitAttempt::Recursive => return true,
                InitAttempt::Failed => {
                    soa.throw_new(
                        ExceptionKind::NoClassDefFound,
                        format!(
                            "Rejecting re-init on previously-failed class {}",
                            class.pretty_name()
                        ),
                    );
                    return false;
                }
                InitAttempt::Waiting => self.wait_for_init(soa, class),
            }
        }

        if let Some(super_id) = class.super_class() {
            if !self.class(super_id).is_initialized() {
                if !can_init_parents {
                    class.init.abandon();
                    return false;
                }
                if !self.ensure_initialized(soa, super_id, can_run_clinit, true) {
                    if soa.thread().is_exception_pending() {
                        class.init.finish(ClassStatus::Erroneous);
                    } else {
                        class.init.abandon();
                    }
                    return false;
                }
            }
        }

        let outcome = match (class.initializer(), class.class_initializer()) {
            (Some(initializer), Some(clinit)) => match soa.push_frame(clinit) {
                Ok(()) => {
                    let result = initializer(soa, class.id());
                    soa.pop_frame();
                    result
                }
                Err(e) => Err(e),
            },
            _ => Ok(()),
        };

        match outcome {
            Ok(()) => {
                class.init.finish(ClassStatus::Initialized);
                soa.runtime().metrics().record_class_initialization();
                debug!(class = %class.pretty_name(), thread = %me, "initialized class");
                true
            }
            Err(thrown) => {
                let cause = soa.thread().clear_exception().unwrap_or(thrown);
                if cause.is_error() {
                    soa.throw(cause);
                } else {
                    soa.throw(Arc::new(Throwable::with_cause(
                        ExceptionKind::ExceptionInInitializer,
                        None,
                        cause,
                    )));
                }
                class.init.finish(ClassStatus::Erroneous);
                debug!(class = %class.pretty_name(), "class initialization failed");
                false
            }
        }
    }

    fn wait_for_init(&self, soa: &mut ScopedAccess<'_>, class: &Class) {
        let poll = soa.runtime().config().init_wait_poll;
        while class.status() == ClassStatus::Initializing {
            soa.check_suspend();
            class.init.wait_for(poll);
        }
    }
}
