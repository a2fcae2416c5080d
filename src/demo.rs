//! Scenarios run by the `dex-runtime` binary.
use crate::{
    error::CliError,
    types::{
        definition::{ClassDefinition, ConstantPool},
        members::{FieldAccessKind, InvokeType},
        AccessFlags as F,
    },
    utils::{FieldIndex, MethodId, MethodIndex, StringIndex, TypeIndex},
    vm::{entrypoints, exceptions::ManagedResult, Runtime, ScopedAccess},
};
use std::{
    sync::atomic::{AtomicBool, AtomicU64, Ordering},
    thread,
};
use tracing::info;

const MAIN: &str = "Lcom/example/Main;";

const POINT_TYPE: TypeIndex = TypeIndex(0);
const INT_ARRAY_TYPE: TypeIndex = TypeIndex(1);
const CIRCLE_TYPE: TypeIndex = TypeIndex(3);
const POINT_X: FieldIndex = FieldIndex(0);
const SHAPE_AREA: MethodIndex = MethodIndex(0);

fn main_pool() -> ConstantPool {
    let mut pool = ConstantPool::new();
    pool.add_type("Lcom/example/Point;");
    pool.add_type("[I");
    pool.add_type("Lcom/example/Shape;");
    pool.add_type("Lcom/example/Circle;");
    pool.add_field("Lcom/example/Point;", "x", "I");
    pool.add_field("Lcom/example/Point;", "count", "I");
    pool.add_method("Lcom/example/Shape;", "area", "()D");
    pool.add_string("hello");
    pool.add_string("hello");
    pool
}

pub fn define_sample_classes(runtime: &Runtime) -> Result<(), CliError> {
    let linker = runtime.linker();
    linker.define(
        ClassDefinition::class(MAIN)
            .method("main", "()V", F::PUBLIC | F::STATIC)
            .method("describe", "()Ljava/lang/String;", F::PUBLIC | F::STATIC | F::NATIVE)
            .pool(main_pool()),
    )?;
    linker.define(
        ClassDefinition::class("Lcom/example/Point;")
            .field("x", "I", F::PUBLIC)
            .field("y", "I", F::PUBLIC)
            .field("count", "I", F::PUBLIC | F::STATIC)
            .method("<init>", "()V", F::PUBLIC | F::CONSTRUCTOR)
            .initializer(|_, _| {
                info!("Point.<clinit> running");
                Ok(())
            }),
    )?;
    linker.define(
        ClassDefinition::class("Lcom/example/Shape;")
            .access(F::PUBLIC | F::ABSTRACT)
            .method("area", "()D", F::PUBLIC | F::ABSTRACT),
    )?;
    linker.define(
        ClassDefinition::class("Lcom/example/Circle;")
            .extends("Lcom/example/Shape;")
            .field("radius", "D", F::PRIVATE)
            .method("area", "()D", F::PUBLIC),
    )?;
    Ok(())
}

fn main_method(soa: &ScopedAccess<'_>) -> ManagedResult<MethodId> {
    let main = soa.runtime().linker().find_class(soa, MAIN)?;
    Ok(MethodId::new(main, 0))
}

fn run_demo_body(soa: &mut ScopedAccess<'_>) -> ManagedResult<()> {
    let runtime = soa.runtime();
    let linker = runtime.linker();
    let main = main_method(soa)?;
    soa.push_frame(main)?;

    let first = entrypoints::resolve_string_from_code(soa, StringIndex(0), main)?;
    let second = entrypoints::resolve_string_from_code(soa, StringIndex(1), main)?;
    println!("string literals interned to {first} and {second}");

    let point = entrypoints::alloc_object_from_code(soa, POINT_TYPE, main, true)?;
    if let Some(class) = runtime.heap().class_of(point) {
        println!("allocated {point} of {}", linker.class(class).pretty_name());
    }

    let kind = FieldAccessKind::new(false, true, false);
    let fast = entrypoints::find_field_fast(runtime, POINT_X, main, kind, 4);
    println!("field fast path before resolution: {fast:?}");
    let field = entrypoints::find_field_from_code(soa, POINT_X, main, kind, 4)?;
    let fast = entrypoints::find_field_fast(runtime, POINT_X, main, kind, 4);
    println!("resolved {} (fast path now {fast:?})", linker.pretty_field(field));

    let circle = entrypoints::alloc_object_from_code(soa, CIRCLE_TYPE, main, true)?;
    let target = entrypoints::find_method_from_code(
        soa,
        SHAPE_AREA,
        Some(circle),
        main,
        true,
        InvokeType::Virtual,
    )?;
    println!("Shape.area() on a Circle dispatches to {}", linker.pretty_method(target));

    let array = entrypoints::alloc_array_from_code(soa, INT_ARRAY_TYPE, main, 16, true)?;
    println!(
        "allocated int[{}] as {array}",
        runtime.heap().array_length(array).unwrap_or_default()
    );
    match entrypoints::alloc_array_from_code(soa, INT_ARRAY_TYPE, main, -1, true) {
        Ok(_) => println!("negative array length was accepted"),
        Err(thrown) => {
            println!("negative array length raised {thrown}");
            soa.thread().clear_exception();
        }
    }

    let describe = MethodId::new(main.class, 1);
    let described = soa.call_native(describe, None, |env, _| env.new_string("from native code"))?;
    if let Some(string) = described {
        println!(
            "native method returned {:?}",
            runtime.heap().string_value(string).unwrap_or_default()
        );
    }
    soa.pop_frame();
    Ok(())
}

pub fn run_demo(runtime: &Runtime) -> Result<(), CliError> {
    define_sample_classes(runtime)?;
    let thread = runtime.attach_thread("main");
    let outcome = {
        let mut soa = runtime.scoped(&thread);
        run_demo_body(&mut soa)
    };
    runtime.detach_thread(&thread);
    outcome.map_err(|thrown| CliError::Managed(thrown.dump()))?;

    println!("{}", runtime.metrics());
    println!("{}", runtime.metrics().cache_statistics());
    Ok(())
}

/// Workers allocate and poll for suspension while the main thread repeatedly stops the world
/// to collect garbage.
pub fn run_suspend_stress(runtime: &Runtime, workers: usize, rounds: usize) -> Result<(), CliError> {
    define_sample_classes(runtime)?;
    let stop = AtomicBool::new(false);
    let allocated = AtomicU64::new(0);
    let mut freed = 0;

    let panicked = thread::scope(|scope| {
        let handles: Vec<_> = (0..workers)
            .map(|i| {
                let (stop, allocated) = (&stop, &allocated);
                scope.spawn(move || -> ManagedResult<()> {
                    let thread = runtime.attach_thread(&format!("worker-{i}"));
                    let result = (|| -> ManagedResult<()> {
                        let mut soa = runtime.scoped(&thread);
                        let main = main_method(&soa)?;
                        while !stop.load(Ordering::Acquire) {
                            let object = entrypoints::alloc_object_from_code(
                                &mut soa,
                                POINT_TYPE,
                                main,
                                true,
                            )?;
                            allocated.fetch_add(1, Ordering::Relaxed);
                            runtime.heap().release(object);
                            soa.check_suspend();
                        }
                        Ok(())
                    })();
                    runtime.detach_thread(&thread);
                    result
                })
            })
            .collect();

        for _ in 0..rounds {
            freed += runtime.collect_garbage();
            thread::yield_now();
        }
        stop.store(true, Ordering::Release);

        let mut panicked = false;
        for handle in handles {
            match handle.join() {
                Ok(Ok(())) => {}
                Ok(Err(thrown)) => return Err(CliError::Managed(thrown.dump())),
                Err(_) => panicked = true,
            }
        }
        Ok(panicked)
    })?;
    if panicked {
        return Err(CliError::WorkerPanicked);
    }
    freed += runtime.collect_garbage();

    println!(
        "{workers} workers allocated {} objects; {rounds} collections freed {freed}",
        allocated.load(Ordering::Relaxed)
    );
    println!("{}", runtime.metrics());
    Ok(())
}
