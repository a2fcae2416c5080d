//! Per-thread runtime state: lifecycle state, request flags, the pending exception, the managed
//! frame stack and the local reference table used at the native boundary.
use crate::{
    utils::{MethodId, NativeRef, ObjectRef, ThreadId},
    vm::exceptions::ThrowableRef,
};
use parking_lot::{Condvar, Mutex};
use std::{
    fmt::{self, Debug, Formatter},
    sync::atomic::{AtomicBool, AtomicU32, AtomicU8, Ordering},
};

#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ThreadState {
    /// Not touching managed state; counts as stopped for suspension purposes.
    Native = 0,
    /// Holding shared mutator access and possibly running managed code.
    Runnable = 1,
    /// Parked in a suspend check until resumed.
    Suspended = 2,
    Exited = 3,
}

impl ThreadState {
    fn from_u8(raw: u8) -> Self {
        match raw {
            0 => ThreadState::Native,
            1 => ThreadState::Runnable,
            2 => ThreadState::Suspended,
            _ => ThreadState::Exited,
        }
    }
}

/// Request flags, checked by the thread at its next suspend check.
pub struct ThreadFlag;

impl ThreadFlag {
    pub const CHECKPOINT_REQUEST: u32 = 1 << 0;
    pub const SUSPEND_REQUEST: u32 = 1 << 1;
}

/// A function another thread asked this thread to run at its next suspend check.
pub type Checkpoint = Box<dyn FnOnce(&ManagedThread) + Send>;

/// Frames beyond the configured maximum that a thread may use while it raises a
/// `StackOverflowError`.
pub const STACK_OVERFLOW_RESERVED_FRAMES: usize = 32;

/// Cookie returned when a local reference segment is pushed; restores the previous segment.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LocalSegment(usize);

#[derive(Default)]
struct LocalRefTable {
    entries: Vec<ObjectRef>,
    /// Bumped whenever a slot is released so stale handles stop decoding.
    serials: Vec<u8>,
    segment_start: usize,
}

const LOCAL_INDEX_MASK: u32 = 0x00FF_FFFF;

impl LocalRefTable {
    fn add(&mut self, object: ObjectRef) -> NativeRef {
        let index = self.entries.len();
        self.entries.push(object);
        if self.serials.len() <= index {
            self.serials.push(0);
        }
        NativeRef(((self.serials[index] as u32) << 24) | (index as u32 + 1))
    }

    fn decode(&self, reference: NativeRef) -> ObjectRef {
        let index = (reference.0 & LOCAL_INDEX_MASK) as usize;
        let serial = (reference.0 >> 24) as u8;
        match index.checked_sub(1) {
            Some(i) if i < self.entries.len() && self.serials[i] == serial => self.entries[i],
            _ => ObjectRef::INVALID,
        }
    }

    fn push_segment(&mut self) -> LocalSegment {
        let cookie = LocalSegment(self.segment_start);
        self.segment_start = self.entries.len();
        cookie
    }

    fn pop_segment(&mut self, cookie: LocalSegment) {
        for serial in &mut self.serials[self.segment_start..self.entries.len()] {
            *serial = serial.wrapping_add(1);
        }
        self.entries.truncate(self.segment_start);
        self.segment_start = cookie.0;
    }
}

pub struct ManagedThread {
    id: ThreadId,
    name: String,
    native_id: std::thread::ThreadId,
    state: AtomicU8,
    flags: AtomicU32,
    suspend_count: Mutex<u32>,
    resume_cond: Condvar,
    checkpoint: Mutex<Option<Checkpoint>>,
    exception: Mutex<Option<ThrowableRef>>,
    frames: Mutex<Vec<MethodId>>,
    handling_stack_overflow: AtomicBool,
    local_refs: Mutex<LocalRefTable>,
}

impl ManagedThread {
    pub(crate) fn new(id: ThreadId, name: String) -> Self {
        Self {
            id,
            name,
            native_id: std::thread::current().id(),
            state: AtomicU8::new(ThreadState::Native as u8),
            flags: AtomicU32::new(0),
            suspend_count: Mutex::new(0),
            resume_cond: Condvar::new(),
            checkpoint: Mutex::new(None),
            exception: Mutex::new(None),
            frames: Mutex::new(vec![]),
            handling_stack_overflow: AtomicBool::new(false),
            local_refs: Mutex::new(LocalRefTable::default()),
        }
    }

    pub fn id(&self) -> ThreadId {
        self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn native_id(&self) -> std::thread::ThreadId {
        self.native_id
    }

    pub fn state(&self) -> ThreadState {
        ThreadState::from_u8(self.state.load(Ordering::Acquire))
    }

    pub(crate) fn set_state(&self, state: ThreadState) {
        self.state.store(state as u8, Ordering::Release);
    }

    pub fn flags(&self) -> u32 {
        self.flags.load(Ordering::Acquire)
    }

    pub fn read_flag(&self, flag: u32) -> bool {
        self.flags() & flag != 0
    }

    fn set_flag(&self, flag: u32) {
        self.flags.fetch_or(flag, Ordering::AcqRel);
    }

    fn clear_flag(&self, flag: u32) {
        self.flags.fetch_and(!flag, Ordering::AcqRel);
    }

    /// Installs a checkpoint. Fails if one is already pending. The caller is responsible for
    /// only doing this while the thread is runnable.
    pub(crate) fn install_checkpoint(&self, checkpoint: Checkpoint) -> bool {
        let mut slot = self.checkpoint.lock();
        if slot.is_some() {
            return false;
        }
        *slot = Some(checkpoint);
        self.set_flag(ThreadFlag::CHECKPOINT_REQUEST);
        true
    }

    /// Runs the pending checkpoint, if any, then clears the request. Returns whether one ran.
    pub(crate) fn run_pending_checkpoint(&self) -> bool {
        let checkpoint = self.checkpoint.lock().take();
        let ran = match checkpoint {
            Some(checkpoint) => {
                checkpoint(self);
                true
            }
            None => false,
        };
        let slot = self.checkpoint.lock();
        // A checkpoint installed while this one ran keeps the flag set.
        if slot.is_none() {
            self.clear_flag(ThreadFlag::CHECKPOINT_REQUEST);
        }
        ran
    }

    pub fn suspend_count(&self) -> u32 {
        *self.suspend_count.lock()
    }

    pub(crate) fn request_suspend(&self) {
        let mut count = self.suspend_count.lock();
        *count += 1;
        self.set_flag(ThreadFlag::SUSPEND_REQUEST);
    }

    pub(crate) fn resume(&self) {
        let mut count = self.suspend_count.lock();
        debug_assert!(*count > 0, "resume without matching suspend");
        *count = count.saturating_sub(1);
        if *count == 0 {
            self.clear_flag(ThreadFlag::SUSPEND_REQUEST);
            self.resume_cond.notify_all();
        }
    }

    /// Blocks until no suspension is outstanding.
    pub(crate) fn wait_while_suspended(&self) {
        let mut count = self.suspend_count.lock();
        while *count > 0 {
            self.resume_cond.wait(&mut count);
        }
    }

    pub fn exception(&self) -> Option<ThrowableRef> {
        self.exception.lock().clone()
    }

    pub fn is_exception_pending(&self) -> bool {
        self.exception.lock().is_some()
    }

    pub(crate) fn set_exception(&self, exception: ThrowableRef) {
        *self.exception.lock() = Some(exception);
    }

    /// Clears and returns the pending exception.
    pub fn clear_exception(&self) -> Option<ThrowableRef> {
        self.exception.lock().take()
    }

    pub fn frame_depth(&self) -> usize {
        self.frames.lock().len()
    }

    pub fn current_method(&self) -> Option<MethodId> {
        self.frames.lock().last().copied()
    }

    pub(crate) fn push_frame(&self, method: MethodId) {
        self.frames.lock().push(method);
    }

    pub(crate) fn pop_frame(&self) -> Option<MethodId> {
        self.frames.lock().pop()
    }

    pub fn is_handling_stack_overflow(&self) -> bool {
        self.handling_stack_overflow.load(Ordering::Acquire)
    }

    pub(crate) fn set_handling_stack_overflow(&self, handling: bool) {
        self.handling_stack_overflow
            .store(handling, Ordering::Release);
    }

    pub fn add_local_ref(&self, object: ObjectRef) -> NativeRef {
        self.local_refs.lock().add(object)
    }

    /// Decodes a native reference. Anything that does not name a live slot decodes to
    /// [`ObjectRef::INVALID`].
    pub fn decode_local_ref(&self, reference: NativeRef) -> ObjectRef {
        self.local_refs.lock().decode(reference)
    }

    pub fn local_ref_count(&self) -> usize {
        self.local_refs.lock().entries.len()
    }

    pub(crate) fn push_local_segment(&self) -> LocalSegment {
        self.local_refs.lock().push_segment()
    }

    pub(crate) fn pop_local_segment(&self, cookie: LocalSegment) {
        self.local_refs.lock().pop_segment(cookie)
    }
}

impl Debug for ManagedThread {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.debug_struct("ManagedThread")
            .field("id", &self.id)
            .field("name", &self.name)
            .field("state", &self.state())
            .field("flags", &self.flags())
            .field("suspend_count", &self.suspend_count())
            .finish()
    }
}
