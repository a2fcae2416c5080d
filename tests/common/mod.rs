//! Shared class path for the integration tests.
#![allow(dead_code)]
use dex_runtime::{
    types::{
        definition::{ClassDefinition, ConstantPool},
        members::FieldAccessKind,
        AccessFlags as F,
    },
    utils::{ClassId, FieldIndex, MethodId, MethodIndex, StringIndex, TypeIndex},
    vm::{
        config::RuntimeConfig,
        exceptions::{ExceptionKind, ThrowableRef},
        Runtime, ScopedAccess,
    },
};
use std::{
    sync::{
        atomic::{AtomicUsize, Ordering},
        Arc,
    },
    thread,
    time::Duration,
};

pub const MAIN: &str = "Lcom/example/Main;";
pub const POINT: &str = "Lcom/example/Point;";
pub const POINT3D: &str = "Lcom/example/Point3D;";
pub const SHAPE: &str = "Lcom/example/Shape;";
pub const DRAWABLE: &str = "Lcom/example/Drawable;";
pub const CIRCLE: &str = "Lcom/example/Circle;";
pub const BLOB: &str = "Lcom/example/Blob;";
pub const HIDDEN: &str = "Lcom/example/internal/Hidden;";
pub const BROKEN: &str = "Lcom/example/Broken;";
pub const COUNTER: &str = "Lcom/example/Counter;";
pub const MISSING: &str = "Lcom/example/Missing;";
pub const NATIVES: &str = "Lcom/example/Natives;";

/// Pool indices of `Main`.
pub struct MainIndices {
    pub point: TypeIndex,
    pub shape: TypeIndex,
    pub drawable: TypeIndex,
    pub circle: TypeIndex,
    pub blob: TypeIndex,
    pub hidden: TypeIndex,
    pub broken: TypeIndex,
    pub counter: TypeIndex,
    pub missing: TypeIndex,
    pub int_array: TypeIndex,
    pub long_array: TypeIndex,
    pub boolean_array: TypeIndex,
    pub string_array: TypeIndex,

    pub point_x: FieldIndex,
    pub point_count: FieldIndex,
    pub point_id: FieldIndex,
    pub point_label: FieldIndex,
    pub point_secret: FieldIndex,
    pub point3d_x: FieldIndex,
    pub point_nope: FieldIndex,
    pub hidden_data: FieldIndex,
    pub broken_value: FieldIndex,
    pub counter_value: FieldIndex,
    pub missing_value: FieldIndex,

    pub shape_area: MethodIndex,
    pub drawable_draw: MethodIndex,
    pub point_describe: MethodIndex,
    pub point_secret_method: MethodIndex,
    pub point_nothing: MethodIndex,
    pub object_hash_code: MethodIndex,
    pub main_helper: MethodIndex,

    pub hello: StringIndex,
    pub hello_again: StringIndex,
    pub world: StringIndex,
}

impl MainIndices {
    fn build() -> (ConstantPool, Self) {
        let mut pool = ConstantPool::new();
        let indices = MainIndices {
            point: pool.add_type(POINT),
            shape: pool.add_type(SHAPE),
            drawable: pool.add_type(DRAWABLE),
            circle: pool.add_type(CIRCLE),
            blob: pool.add_type(BLOB),
            hidden: pool.add_type(HIDDEN),
            broken: pool.add_type(BROKEN),
            counter: pool.add_type(COUNTER),
            missing: pool.add_type(MISSING),
            int_array: pool.add_type("[I"),
            long_array: pool.add_type("[J"),
            boolean_array: pool.add_type("[Z"),
            string_array: pool.add_type("[Ljava/lang/String;"),

            point_x: pool.add_field(POINT, "x", "I"),
            point_count: pool.add_field(POINT, "count", "I"),
            point_id: pool.add_field(POINT, "id", "J"),
            point_label: pool.add_field(POINT, "label", "Ljava/lang/String;"),
            point_secret: pool.add_field(POINT, "secret", "I"),
            point3d_x: pool.add_field(POINT3D, "x", "I"),
            point_nope: pool.add_field(POINT, "nope", "I"),
            hidden_data: pool.add_field(HIDDEN, "data", "I"),
            broken_value: pool.add_field(BROKEN, "value", "I"),
            counter_value: pool.add_field(COUNTER, "value", "I"),
            missing_value: pool.add_field(MISSING, "value", "I"),

            shape_area: pool.add_method(SHAPE, "area", "()D"),
            drawable_draw: pool.add_method(DRAWABLE, "draw", "()V"),
            point_describe: pool.add_method(POINT, "describe", "()Ljava/lang/String;"),
            point_secret_method: pool.add_method(POINT, "secretMethod", "()V"),
            point_nothing: pool.add_method(POINT, "nothing", "()V"),
            object_hash_code: pool.add_method("Ljava/lang/Object;", "hashCode", "()I"),
            main_helper: pool.add_method(MAIN, "helper", "()V"),

            hello: pool.add_string("hello"),
            hello_again: pool.add_string("hello"),
            world: pool.add_string("world"),
        };
        (pool, indices)
    }
}

/// Method slots of the fixture classes.
pub mod slots {
    pub const MAIN_RUN: u16 = 0;
    pub const MAIN_HELPER: u16 = 1;
    pub const POINT_SET_ID: u16 = 3;
    pub const POINT3D_DESCRIBE: u16 = 0;
    pub const NATIVES_NAME: u16 = 0;
    pub const NATIVES_LOCKED: u16 = 1;
    pub const NATIVES_STATIC_LOCKED: u16 = 2;
    pub const NATIVES_AS_POINT: u16 = 3;
}

/// Pool index of `Point.id` in `Point`'s own pool.
pub const POINT_OWN_ID: FieldIndex = FieldIndex(0);
/// Pool index of `Point.describe` in `Point3D`'s pool.
pub const POINT3D_SUPER_DESCRIBE: MethodIndex = MethodIndex(0);
/// Pool index of `Counter` in its own pool.
pub const COUNTER_SELF: TypeIndex = TypeIndex(0);

pub struct Fixture {
    pub runtime: Runtime,
    pub idx: MainIndices,
    /// How many times `Counter`'s initializer ran.
    pub counter_runs: Arc<AtomicUsize>,
}

impl Fixture {
    pub fn new() -> Self {
        Self::with_config(RuntimeConfig::default())
    }

    /// A fixture whose fatal errors panic instead of aborting the test process.
    pub fn aborting() -> Self {
        Self::with_config(aborting_config())
    }

    pub fn with_config(config: RuntimeConfig) -> Self {
        let runtime = Runtime::new(config);
        let counter_runs = Arc::new(AtomicUsize::new(0));
        let (pool, idx) = MainIndices::build();
        define_class_path(&runtime, pool, counter_runs.clone());
        Self {
            runtime,
            idx,
            counter_runs,
        }
    }

    pub fn class(&self, soa: &ScopedAccess<'_>, descriptor: &str) -> ClassId {
        self.runtime
            .linker()
            .find_class(soa, descriptor)
            .expect("fixture class should load")
    }

    pub fn main_run(&self, soa: &ScopedAccess<'_>) -> MethodId {
        MethodId::new(self.class(soa, MAIN), slots::MAIN_RUN)
    }

    /// Attaches the current thread and runs `f` with scoped access.
    pub fn with_thread<R>(&self, name: &str, f: impl FnOnce(&mut ScopedAccess<'_>) -> R) -> R {
        let thread = self.runtime.attach_thread(name);
        let result = {
            let mut soa = self.runtime.scoped(&thread);
            f(&mut soa)
        };
        self.runtime.detach_thread(&thread);
        result
    }
}

pub fn aborting_config() -> RuntimeConfig {
    RuntimeConfig::default().with_abort_hook(|message| panic!("runtime abort: {message}"))
}

pub fn instance_read(primitive: bool) -> FieldAccessKind {
    FieldAccessKind::new(false, primitive, false)
}

pub fn static_read(primitive: bool) -> FieldAccessKind {
    FieldAccessKind::new(true, primitive, false)
}

pub fn assert_thrown(thrown: &ThrowableRef, kind: ExceptionKind, message: &str) {
    assert_eq!(*thrown.kind(), kind, "unexpected exception {thrown}");
    assert_eq!(thrown.message(), Some(message));
}

/// Takes and returns the thread's pending exception, failing if there is none.
pub fn take_pending(soa: &ScopedAccess<'_>) -> ThrowableRef {
    soa.thread()
        .clear_exception()
        .expect("an exception should be pending")
}

/// Polls until `condition` holds, for at most five seconds.
pub fn wait_until(mut condition: impl FnMut() -> bool) {
    for _ in 0..500 {
        if condition() {
            return;
        }
        thread::sleep(Duration::from_millis(10));
    }
    panic!("condition not reached in time");
}

fn define_class_path(runtime: &Runtime, main_pool: ConstantPool, counter_runs: Arc<AtomicUsize>) {
    let linker = runtime.linker();

    linker
        .define(
            ClassDefinition::class(MAIN)
                .method("run", "()V", F::PUBLIC | F::STATIC)
                .method("helper", "()V", F::PUBLIC | F::STATIC)
                .pool(main_pool),
        )
        .unwrap();

    let mut point_pool = ConstantPool::new();
    point_pool.add_field(POINT, "id", "J");
    linker
        .define(
            ClassDefinition::class(POINT)
                .field("x", "I", F::PUBLIC)
                .field("y", "I", F::PUBLIC)
                .field("count", "I", F::PUBLIC | F::STATIC)
                .field("id", "J", F::PUBLIC | F::FINAL)
                .field("label", "Ljava/lang/String;", F::PUBLIC)
                .field("secret", "I", F::PRIVATE)
                .method("<init>", "()V", F::PUBLIC | F::CONSTRUCTOR)
                .method("describe", "()Ljava/lang/String;", F::PUBLIC)
                .method("secretMethod", "()V", F::PRIVATE)
                .method("setId", "(J)V", F::PUBLIC)
                .pool(point_pool),
        )
        .unwrap();

    let mut point3d_pool = ConstantPool::new();
    point3d_pool.add_method(POINT, "describe", "()Ljava/lang/String;");
    linker
        .define(
            ClassDefinition::class(POINT3D)
                .extends(POINT)
                .field("z", "I", F::PUBLIC)
                .method("describe", "()Ljava/lang/String;", F::PUBLIC)
                .pool(point3d_pool),
        )
        .unwrap();

    linker
        .define(
            ClassDefinition::class(SHAPE)
                .access(F::PUBLIC | F::ABSTRACT)
                .method("area", "()D", F::PUBLIC | F::ABSTRACT)
                .method("name", "()Ljava/lang/String;", F::PUBLIC),
        )
        .unwrap();
    linker
        .define(
            ClassDefinition::interface(DRAWABLE).method("draw", "()V", F::PUBLIC | F::ABSTRACT),
        )
        .unwrap();
    linker
        .define(
            ClassDefinition::class(CIRCLE)
                .extends(SHAPE)
                .implements(DRAWABLE)
                .field("radius", "D", F::PRIVATE)
                .method("area", "()D", F::PUBLIC)
                .method("draw", "()V", F::PUBLIC),
        )
        .unwrap();
    // Inherits `area` without implementing it.
    linker
        .define(ClassDefinition::class(BLOB).extends(SHAPE))
        .unwrap();

    linker
        .define(
            ClassDefinition::class(HIDDEN)
                .access(F::empty())
                .field("data", "I", F::PUBLIC),
        )
        .unwrap();

    linker
        .define(
            ClassDefinition::class(BROKEN)
                .field("value", "I", F::PUBLIC | F::STATIC)
                .initializer(|soa, _| {
                    Err(soa.throw_new(ExceptionKind::Runtime, "boom"))
                }),
        )
        .unwrap();

    let mut counter_pool = ConstantPool::new();
    counter_pool.add_type(COUNTER);
    linker
        .define(
            ClassDefinition::class(COUNTER)
                .field("value", "I", F::PUBLIC | F::STATIC)
                .pool(counter_pool)
                .initializer(move |_, _| {
                    counter_runs.fetch_add(1, Ordering::SeqCst);
                    thread::sleep(Duration::from_millis(20));
                    Ok(())
                }),
        )
        .unwrap();

    linker
        .define(
            ClassDefinition::class(NATIVES)
                .method("name", "()Ljava/lang/String;", F::PUBLIC | F::STATIC | F::NATIVE)
                .method("locked", "()V", F::PUBLIC | F::NATIVE | F::SYNCHRONIZED)
                .method(
                    "staticLocked",
                    "()V",
                    F::PUBLIC | F::STATIC | F::NATIVE | F::SYNCHRONIZED,
                )
                .method("asPoint", "()Lcom/example/Point;", F::PUBLIC | F::STATIC | F::NATIVE),
        )
        .unwrap();
}
