//! Managed exceptions.
//!
//! A failing runtime operation leaves a [`Throwable`] pending on the current thread and also
//! returns it, so callers can use `?` and still find the exception on the thread when they
//! unwind back to compiled code.
use crate::{
    types::{members::InvokeType, Class},
    utils::{pretty_descriptor, FieldId, MethodId},
    vm::ScopedAccess,
};
use std::{
    fmt::{self, Display, Formatter},
    sync::Arc,
};

#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub enum ExceptionKind {
    AbstractMethod,
    ClassCircularity,
    ExceptionInInitializer,
    IllegalAccess,
    IllegalArgument,
    IllegalMonitorState,
    IncompatibleClassChange,
    Instantiation,
    Internal,
    NegativeArraySize,
    NoClassDefFound,
    NoSuchField,
    NoSuchMethod,
    NullPointer,
    OutOfMemory,
    Runtime,
    StackOverflow,
    Verify,
    /// Any other throwable class, by descriptor.
    Other(Arc<str>),
}

impl ExceptionKind {
    pub fn descriptor(&self) -> &str {
        use ExceptionKind::*;
        match self {
            AbstractMethod => "Ljava/lang/AbstractMethodError;",
            ClassCircularity => "Ljava/lang/ClassCircularityError;",
            ExceptionInInitializer => "Ljava/lang/ExceptionInInitializerError;",
            IllegalAccess => "Ljava/lang/IllegalAccessError;",
            IllegalArgument => "Ljava/lang/IllegalArgumentException;",
            IllegalMonitorState => "Ljava/lang/IllegalMonitorStateException;",
            IncompatibleClassChange => "Ljava/lang/IncompatibleClassChangeError;",
            Instantiation => "Ljava/lang/InstantiationError;",
            Internal => "Ljava/lang/InternalError;",
            NegativeArraySize => "Ljava/lang/NegativeArraySizeException;",
            NoClassDefFound => "Ljava/lang/NoClassDefFoundError;",
            NoSuchField => "Ljava/lang/NoSuchFieldError;",
            NoSuchMethod => "Ljava/lang/NoSuchMethodError;",
            NullPointer => "Ljava/lang/NullPointerException;",
            OutOfMemory => "Ljava/lang/OutOfMemoryError;",
            Runtime => "Ljava/lang/RuntimeException;",
            StackOverflow => "Ljava/lang/StackOverflowError;",
            Verify => "Ljava/lang/VerifyError;",
            Other(descriptor) => descriptor,
        }
    }

    /// Errors (as opposed to exceptions) propagate out of class initializers unwrapped.
    pub fn is_error(&self) -> bool {
        self.descriptor().ends_with("Error;")
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Throwable {
    kind: ExceptionKind,
    message: Option<String>,
    cause: Option<ThrowableRef>,
}

pub type ThrowableRef = Arc<Throwable>;

/// The result of any operation that may raise a managed exception.
pub type ManagedResult<T> = Result<T, ThrowableRef>;

impl Throwable {
    pub fn new(kind: ExceptionKind, message: Option<String>) -> Self {
        Self {
            kind,
            message,
            cause: None,
        }
    }

    pub fn with_cause(kind: ExceptionKind, message: Option<String>, cause: ThrowableRef) -> Self {
        Self {
            kind,
            message,
            cause: Some(cause),
        }
    }

    pub fn kind(&self) -> &ExceptionKind {
        &self.kind
    }

    pub fn message(&self) -> Option<&str> {
        self.message.as_deref()
    }

    pub fn cause(&self) -> Option<&ThrowableRef> {
        self.cause.as_ref()
    }

    pub fn descriptor(&self) -> &str {
        self.kind.descriptor()
    }

    pub fn is_error(&self) -> bool {
        self.kind.is_error()
    }

    /// Multi-line rendering including the cause chain.
    pub fn dump(&self) -> String {
        let mut out = self.to_string();
        let mut cause = self.cause.as_ref();
        while let Some(c) = cause {
            out.push_str("\nCaused by: ");
            out.push_str(&c.to_string());
            cause = c.cause.as_ref();
        }
        out
    }
}

impl Display for Throwable {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "{}", pretty_descriptor(self.descriptor()))?;
        if let Some(message) = &self.message {
            write!(f, ": {message}")?;
        }
        Ok(())
    }
}

impl ScopedAccess<'_> {
    /// Sets `throwable` as the thread's pending exception. Nothing may be pending already.
    pub fn throw(&self, throwable: ThrowableRef) -> ThrowableRef {
        debug_assert!(
            !self.thread().is_exception_pending(),
            "throwing {throwable} while {} is already pending",
            self.thread()
                .exception()
                .map(|e| e.to_string())
                .unwrap_or_default()
        );
        self.thread().set_exception(throwable.clone());
        throwable
    }

    pub fn throw_new(&self, kind: ExceptionKind, message: impl Into<String>) -> ThrowableRef {
        self.throw(Arc::new(Throwable::new(kind, Some(message.into()))))
    }

    /// The exception a failed callee must have left pending.
    pub fn expect_pending(&self) -> ThrowableRef {
        match self.thread().exception() {
            Some(pending) => pending,
            None => self
                .runtime()
                .fatal("operation failed without leaving an exception pending"),
        }
    }

    pub fn throw_out_of_memory(&self, bytes: usize) -> ThrowableRef {
        self.throw_new(
            ExceptionKind::OutOfMemory,
            format!("Failed to allocate a {bytes} byte allocation"),
        )
    }

    pub fn throw_illegal_access_error_class(&self, referrer: &Class, accessed: &Class) -> ThrowableRef {
        self.throw_new(
            ExceptionKind::IllegalAccess,
            format!(
                "Illegal class access: '{}' attempting to access '{}'",
                referrer.pretty_name(),
                accessed.pretty_name()
            ),
        )
    }

    pub fn throw_illegal_access_error_class_for_method_dispatch(
        &self,
        referrer: &Class,
        accessed: &Class,
        caller: MethodId,
        called: MethodId,
        kind: InvokeType,
    ) -> ThrowableRef {
        let linker = self.runtime().linker();
        self.throw_new(
            ExceptionKind::IllegalAccess,
            format!(
                "Illegal class access ('{}' -> '{}') in attempt to invoke {} method '{}' from '{}'",
                referrer.pretty_name(),
                accessed.pretty_name(),
                kind,
                linker.pretty_method(called),
                linker.pretty_method(caller)
            ),
        )
    }

    pub fn throw_illegal_access_error_field(&self, referrer: &Class, field: FieldId) -> ThrowableRef {
        self.throw_new(
            ExceptionKind::IllegalAccess,
            format!(
                "Field '{}' is inaccessible to class '{}'",
                self.runtime().linker().pretty_field(field),
                referrer.pretty_name()
            ),
        )
    }

    pub fn throw_illegal_access_error_final_field(&self, caller: MethodId, field: FieldId) -> ThrowableRef {
        let linker = self.runtime().linker();
        self.throw_new(
            ExceptionKind::IllegalAccess,
            format!(
                "Final field '{}' cannot be written to by method '{}'",
                linker.pretty_field(field),
                linker.pretty_method(caller)
            ),
        )
    }

    pub fn throw_illegal_access_error_method(&self, referrer: &Class, method: MethodId) -> ThrowableRef {
        self.throw_new(
            ExceptionKind::IllegalAccess,
            format!(
                "Method '{}' is inaccessible to class '{}'",
                self.runtime().linker().pretty_method(method),
                referrer.pretty_name()
            ),
        )
    }

    pub fn throw_incompatible_class_change_error_field(
        &self,
        field: FieldId,
        expected_static: bool,
    ) -> ThrowableRef {
        let kind_name = |is_static| if is_static { "static" } else { "instance" };
        self.throw_new(
            ExceptionKind::IncompatibleClassChange,
            format!(
                "Expected '{}' to be a {} field rather than a {} field",
                self.runtime().linker().pretty_field(field),
                kind_name(expected_static),
                kind_name(!expected_static)
            ),
        )
    }

    pub fn throw_incompatible_class_change_error_method(
        &self,
        expected: InvokeType,
        found: InvokeType,
        method: MethodId,
    ) -> ThrowableRef {
        self.throw_new(
            ExceptionKind::IncompatibleClassChange,
            format!(
                "The method '{}' was expected to be of type {} but instead was found to be of type {}",
                self.runtime().linker().pretty_method(method),
                expected,
                found
            ),
        )
    }

    pub fn throw_incompatible_class_change_error_interface(
        &self,
        receiver: &Class,
        interface: &Class,
        method: MethodId,
    ) -> ThrowableRef {
        self.throw_new(
            ExceptionKind::IncompatibleClassChange,
            format!(
                "Class '{}' does not implement interface '{}' in call to '{}'",
                receiver.pretty_name(),
                interface.pretty_name(),
                self.runtime().linker().pretty_method(method)
            ),
        )
    }

    pub fn throw_null_pointer_exception_for_method_access(
        &self,
        method: MethodId,
        kind: InvokeType,
    ) -> ThrowableRef {
        self.throw_new(
            ExceptionKind::NullPointer,
            format!(
                "Attempt to invoke {} method '{}' on a null object reference",
                kind,
                self.runtime().linker().pretty_method(method)
            ),
        )
    }

    pub fn throw_abstract_method_error(&self, method: MethodId) -> ThrowableRef {
        self.throw_new(
            ExceptionKind::AbstractMethod,
            format!(
                "abstract method \"{}\"",
                self.runtime().linker().pretty_method(method)
            ),
        )
    }
}
