//! Dispatch benchmarks against the mock engine.
//!
//! - Pointer-calls into engine classes and into host classes
//! - Variant-calls through `Object.call`
//! - Virtual dispatch from the engine into a host override
//! - Packed array conversion through a variant
//!
//! ## Profiling with Puffin
//!
//! ```bash
//! cargo bench --features profile-with-puffin -- --profile-time 5
//! ```
//!
//! The scope summary printed at the end splits time between `dispatch::ptrcall`,
//! `dispatch::varcall` and the trampolines.

#[path = "../tests/common/mod.rs"]
mod common;

use std::hint::black_box;

use criterion::{Criterion, Throughput, criterion_group, criterion_main};
use gdbridge::prelude::*;

use common::{Node3D, SphereShape3D, SphereShape3DMethod};

#[cfg(feature = "profile-with-puffin")]
static FRAME_VIEW: std::sync::OnceLock<puffin::GlobalFrameView> = std::sync::OnceLock::new();

#[cfg(feature = "profile-with-puffin")]
fn setup_profiler() {
    puffin::set_scopes_on(true);
    FRAME_VIEW.get_or_init(puffin::GlobalFrameView::default);
}

#[cfg(not(feature = "profile-with-puffin"))]
fn setup_profiler() {}

#[cfg(feature = "profile-with-puffin")]
fn end_profiling_frame() {
    puffin::GlobalProfiler::lock().new_frame();
}

#[cfg(not(feature = "profile-with-puffin"))]
fn end_profiling_frame() {}

/// Total time per top-level scope over the recorded frames.
#[cfg(feature = "profile-with-puffin")]
fn print_profiling_stats() {
    use std::collections::HashMap;

    use puffin::Reader;

    let Some(frame_view) = FRAME_VIEW.get() else {
        return;
    };
    let view = frame_view.lock();
    let scopes = view.scope_collection();

    let mut totals: HashMap<String, i64> = HashMap::new();
    for frame in view.recent_frames() {
        let Ok(unpacked) = frame.unpacked() else {
            continue;
        };
        for stream_info in unpacked.thread_streams.values() {
            let Ok(top) = Reader::from_start(&stream_info.stream).read_top_scopes() else {
                continue;
            };
            for scope in top {
                if let Some(details) = scopes.fetch_by_id(&scope.id) {
                    *totals.entry(details.name().to_string()).or_insert(0) += scope.record.duration_ns;
                }
            }
        }
    }

    let mut entries: Vec<_> = totals.into_iter().collect();
    entries.sort_by(|a, b| b.1.cmp(&a.1));
    println!("\n=== Dispatch scopes ===");
    for (name, ns) in entries {
        println!("  {:30} {:>10.2?}", name, std::time::Duration::from_nanos(ns as u64));
    }
}

#[cfg(not(feature = "profile-with-puffin"))]
fn print_profiling_stats() {}

#[derive(HostClass)]
#[class(base = Node3D, init)]
pub struct Mover {
    base: Base<Node3D>,
    distance: f64,
}

#[host_methods]
impl Mover {
    #[virtual_method]
    fn _process(&mut self, delta: f64) {
        self.distance += delta;
    }

    #[method]
    fn advance(&mut self, step: f64, times: i64) -> f64 {
        self.distance += step * times as f64;
        self.distance
    }
}

method_table! {
    static MOVER: MoverMethod = "Mover" {
        advance = 0;
    }
}

struct BenchLibrary;

impl ExtensionLibrary for BenchLibrary {
    fn config() -> ExtensionConfig {
        common::test_config()
    }

    fn method_tables() -> &'static [&'static MethodTable] {
        &common::ENGINE_TABLES
    }

    fn register_classes(registrar: &mut ClassRegistrar) -> Result<(), RegistrationError> {
        registrar.register::<Mover>()?;
        Ok(())
    }
}

gdbridge::entry_point!(gdbridge_bench_init, BenchLibrary);

fn engine_calls(c: &mut Criterion) {
    setup_profiler();
    let _engine = common::engine(gdbridge_bench_init);

    let mut group = c.benchmark_group("dispatch/engine");
    let shape = Owned::<SphereShape3D>::construct();

    group.bench_function("ptrcall_set_radius", |b| {
        b.iter(|| {
            let mut frame = CallFrame::new();
            frame.arg(black_box(1.5f64));
            let result: Result<(), CallError> =
                dispatch::ptrcall(SphereShape3DMethod::set_radius.bind(), Some(shape.raw()), frame);
            end_profiling_frame();
            black_box(result)
        });
    });

    group.bench_function("ptrcall_get_radius", |b| {
        b.iter(|| {
            let result: Result<f64, CallError> =
                dispatch::ptrcall(SphereShape3DMethod::get_radius.bind(), Some(shape.raw()), CallFrame::new());
            end_profiling_frame();
            black_box(result)
        });
    });

    group.bench_function("object_get_class", |b| {
        b.iter(|| {
            let class = shape.bind().get_class();
            end_profiling_frame();
            black_box(class)
        });
    });

    group.finish();
}

fn host_calls(c: &mut Criterion) {
    setup_profiler();
    let _engine = common::engine(gdbridge_bench_init);
    if let Err(err) = MOVER.resolve() {
        panic!("extension class methods did not resolve: {err}");
    }

    let mut group = c.benchmark_group("dispatch/host");
    let mover = gdbridge::instantiate::<Mover>().unwrap();

    group.bench_function("ptrcall_host_method", |b| {
        b.iter(|| {
            let mut frame = CallFrame::new();
            frame.arg(black_box(0.5f64)).arg(black_box(2i64));
            let result: Result<f64, CallError> =
                dispatch::ptrcall(MoverMethod::advance.bind(), Some(mover.raw()), frame);
            end_profiling_frame();
            black_box(result)
        });
    });

    let step = Variant::from(0.5f64);
    let times = Variant::from(2i64);
    group.bench_function("varcall_host_method", |b| {
        b.iter(|| {
            let result = mover.call("advance", &[black_box(&step), black_box(&times)]);
            end_profiling_frame();
            black_box(result)
        });
    });

    let delta = 0.016f64;
    let args = [(&delta as *const f64).cast::<std::ffi::c_void>()];
    group.bench_function("virtual_process", |b| {
        b.iter(|| {
            let found = unsafe {
                gdbridge_mock::call_virtual(mover.raw().as_ptr(), "_process", &args, std::ptr::null_mut())
            };
            end_profiling_frame();
            black_box(found)
        });
    });

    group.finish();
    gdbridge_mock::destroy(mover.into_raw().as_ptr());
}

fn packed_conversion(c: &mut Criterion) {
    setup_profiler();
    let _engine = common::engine(gdbridge_bench_init);

    let mut group = c.benchmark_group("variant/packed");
    for len in [16usize, 1024, 16384] {
        let points: Vec<Vector3> = (0..len).map(|i| Vector3::new(i as f32, 0.0, -(i as f32))).collect();
        group.throughput(Throughput::Elements(len as u64));
        group.bench_function(format!("vector3_round_trip_{len}"), |b| {
            b.iter(|| {
                let array = PackedVector3Array::from_slice(black_box(&points));
                let back: Result<PackedVector3Array, ConversionError> = array.to_variant().to();
                end_profiling_frame();
                black_box(back.map(|back| back.len()))
            });
        });
    }
    group.finish();
    print_profiling_stats();
}

criterion_group!(benches, engine_calls, host_calls, packed_conversion);
criterion_main!(benches);
