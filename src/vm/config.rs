use crate::error::ConfigError;
use std::{
    fmt::{self, Debug, Formatter},
    sync::Arc,
    time::Duration,
};

/// Invoked with the diagnostic before the process aborts on a fatal runtime error.
pub type AbortHook = Arc<dyn Fn(&str) + Send + Sync>;

#[derive(Clone)]
pub struct RuntimeConfig {
    /// Validate references returned from native code.
    pub check_jni: bool,
    /// Maximum number of live heap objects; `None` is unbounded.
    pub heap_capacity: Option<usize>,
    /// Managed frames a thread may push before raising `StackOverflowError`.
    pub max_stack_depth: usize,
    /// How long a thread waiting on another thread's class initializer sleeps between
    /// suspension checks.
    pub init_wait_poll: Duration,
    /// How long a suspend request may wait before logging which threads are still running.
    pub suspend_warn_timeout: Duration,
    pub abort_hook: Option<AbortHook>,
}

pub const CHECK_JNI_VAR: &str = "DEX_RUNTIME_CHECK_JNI";
pub const HEAP_CAPACITY_VAR: &str = "DEX_RUNTIME_HEAP_CAPACITY";
pub const MAX_STACK_DEPTH_VAR: &str = "DEX_RUNTIME_MAX_STACK_DEPTH";

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            check_jni: true,
            heap_capacity: None,
            max_stack_depth: 1024,
            init_wait_poll: Duration::from_millis(10),
            suspend_warn_timeout: Duration::from_secs(1),
            abort_hook: None,
        }
    }
}

impl RuntimeConfig {
    /// Defaults, overridden by any `DEX_RUNTIME_*` environment variables that are set.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|var| std::env::var(var).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let mut config = Self::default();
        if let Some(value) = lookup(CHECK_JNI_VAR) {
            config.check_jni = match value.trim() {
                "1" | "true" | "on" => true,
                "0" | "false" | "off" => false,
                _ => {
                    return Err(ConfigError::InvalidValue {
                        var: CHECK_JNI_VAR,
                        value,
                    })
                }
            };
        }
        if let Some(value) = lookup(HEAP_CAPACITY_VAR) {
            config.heap_capacity = Some(value.trim().parse().map_err(|_| {
                ConfigError::InvalidValue {
                    var: HEAP_CAPACITY_VAR,
                    value: value.clone(),
                }
            })?);
        }
        if let Some(value) = lookup(MAX_STACK_DEPTH_VAR) {
            config.max_stack_depth = match value.trim().parse() {
                Ok(depth) if depth > 0 => depth,
                _ => {
                    return Err(ConfigError::InvalidValue {
                        var: MAX_STACK_DEPTH_VAR,
                        value,
                    })
                }
            };
        }
        Ok(config)
    }

    pub fn with_check_jni(mut self, check_jni: bool) -> Self {
        self.check_jni = check_jni;
        self
    }

    pub fn with_heap_capacity(mut self, capacity: usize) -> Self {
        self.heap_capacity = Some(capacity);
        self
    }

    pub fn with_max_stack_depth(mut self, depth: usize) -> Self {
        self.max_stack_depth = depth;
        self
    }

    pub fn with_init_wait_poll(mut self, poll: Duration) -> Self {
        self.init_wait_poll = poll;
        self
    }

    pub fn with_abort_hook(mut self, hook: impl Fn(&str) + Send + Sync + 'static) -> Self {
        self.abort_hook = Some(Arc::new(hook));
        self
    }
}

impl Debug for RuntimeConfig {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.debug_struct("RuntimeConfig")
            .field("check_jni", &self.check_jni)
            .field("heap_capacity", &self.heap_capacity)
            .field("max_stack_depth", &self.max_stack_depth)
            .field("init_wait_poll", &self.init_wait_poll)
            .field("suspend_warn_timeout", &self.suspend_warn_timeout)
            .field("abort_hook", &self.abort_hook.is_some())
            .finish()
    }
}
