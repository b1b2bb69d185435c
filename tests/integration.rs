//! End-to-end tests: a library booted through its entry symbol against the
//! mock engine, exercising host classes generated by the macros.

mod common;

use gdbridge::prelude::*;
use gdbridge::{MAX_FRAME_ARGS, VariantType, handle, shim};

use common::{
    EDITOR_NODE_3D_GIZMO, EditorNode3DGizmo, EditorNode3DGizmoMethod, Node, Node3D, NodeMethod,
    Resource, ResourceMethod, SphereShape3D, SphereShape3DMethod,
};

// ============================================================================
// Host classes
// ============================================================================

#[derive(HostClass)]
#[class(base = RefCounted, init)]
pub struct Counter {
    base: Base<RefCounted>,
    hits: i64,
}

#[host_methods]
#[property(name = "total", get = hits)]
impl Counter {
    #[method]
    fn hit(&mut self) -> i64 {
        self.hits += 1;
        let _ = Self::counted(&self.base, self.hits);
        self.hits
    }

    #[method]
    fn hits(&self) -> i64 {
        self.hits
    }

    #[method]
    fn add(&mut self, a: i64, b: i64) -> i64 {
        self.hits += a + b;
        self.hits
    }

    #[method(name = "reset")]
    fn clear(&mut self) {
        self.hits = 0;
    }

    #[method]
    #[allow(clippy::too_many_arguments)]
    fn sum32(
        &self,
        a0: i64, a1: i64, a2: i64, a3: i64, a4: i64, a5: i64, a6: i64, a7: i64,
        a8: i64, a9: i64, a10: i64, a11: i64, a12: i64, a13: i64, a14: i64, a15: i64,
        a16: i64, a17: i64, a18: i64, a19: i64, a20: i64, a21: i64, a22: i64, a23: i64,
        a24: i64, a25: i64, a26: i64, a27: i64, a28: i64, a29: i64, a30: i64, a31: i64,
    ) -> i64 {
        [
            a0, a1, a2, a3, a4, a5, a6, a7, a8, a9, a10, a11, a12, a13, a14, a15, a16, a17, a18, a19,
            a20, a21, a22, a23, a24, a25, a26, a27, a28, a29, a30, a31,
        ]
        .iter()
        .sum()
    }

    #[signal]
    fn counted(total: i64);
}

#[derive(HostClass)]
#[class(base = Node3D, init)]
pub struct Spinner {
    base: Base<Node3D>,
    speed: f64,
    angle: f64,
    ticks: i64,
}

#[host_methods]
#[property(name = "speed", get = speed, set = set_speed, hint = Range, hint_string = "0,10")]
impl Spinner {
    #[virtual_method]
    fn _process(&mut self, delta: f64) {
        self.angle += self.speed * delta;
        self.ticks += 1;
    }

    #[method]
    fn speed(&self) -> f64 {
        self.speed
    }

    #[method]
    fn set_speed(&mut self, speed: f64) {
        self.speed = speed;
    }
}

/// Three levels of host classes, each overriding `_level`.
#[derive(HostClass)]
#[class(base = Node3D, init)]
pub struct Walker {
    base: Base<Node3D>,
    steps: i64,
}

#[host_methods]
impl Walker {
    #[virtual_method]
    fn _level(&self) -> i64 {
        1
    }

    #[virtual_method]
    fn _process(&mut self, _delta: f64) {
        self.steps += 1;
    }
}

#[derive(HostClass)]
#[class(extends = Walker, init)]
pub struct Runner {
    walker: Walker,
}

#[host_methods]
impl Runner {
    #[virtual_method]
    fn _level(&self) -> i64 {
        2
    }
}

#[derive(HostClass)]
#[class(extends = Runner, init, name = "SprinterNode")]
pub struct Sprinter {
    #[parent]
    inner: Runner,
    laps: i64,
}

#[host_methods]
impl Sprinter {
    #[virtual_method]
    fn _level(&self) -> i64 {
        3 + self.laps
    }
}

#[derive(HostClass)]
#[class(base = EditorNode3DGizmo, init)]
pub struct Ring {
    base: Base<EditorNode3DGizmo>,
    redraws: i64,
    last_buffer: Option<u64>,
}

impl Ring {
    const SEGMENTS: usize = 16;

    fn points() -> Vec<Vector3> {
        (0..Self::SEGMENTS)
            .map(|index| {
                let angle = index as f32 / Self::SEGMENTS as f32 * std::f32::consts::TAU;
                Vector3::new(angle.cos(), 0.0, angle.sin())
            })
            .collect()
    }
}

#[host_methods]
impl Ring {
    #[virtual_method]
    fn _redraw(&mut self) {
        self.redraws += 1;
        let gizmo = self.base.raw();
        let _ = dispatch::ptrcall::<()>(EditorNode3DGizmoMethod::clear.bind(), Some(gizmo), CallFrame::new());

        let lines = PackedVector3Array::from_slice(&Self::points());
        self.last_buffer = lines.payload().raw().ok().map(|slots| slots[0]);

        let mut frame = CallFrame::new();
        frame
            .arg(&lines)
            .arg(Option::<RawObject>::None)
            .arg(false)
            .arg(Color::rgb(0.9, 0.6, 0.1));
        let _ = dispatch::ptrcall::<()>(EditorNode3DGizmoMethod::add_lines.bind(), Some(gizmo), frame);
    }
}

/// Host classes are resolved after registration: the engine hands out binds
/// for extension methods by name.
method_table! {
    static COUNTER: CounterMethod = "Counter" {
        hit = 0;
        hits = 0;
        sum32 = 0;
    }
}

struct TestLibrary;

impl ExtensionLibrary for TestLibrary {
    fn config() -> ExtensionConfig {
        common::test_config()
    }

    fn method_tables() -> &'static [&'static MethodTable] {
        &common::ENGINE_TABLES
    }

    fn register_classes(registrar: &mut ClassRegistrar) -> Result<(), RegistrationError> {
        registrar
            .register::<Counter>()?
            .register::<Spinner>()?
            .register::<Walker>()?
            .register::<Runner>()?
            .register::<Sprinter>()?
            .register::<Ring>()?;
        Ok(())
    }
}

gdbridge::entry_point!(gdbridge_integration_init, TestLibrary);

fn engine() -> std::sync::MutexGuard<'static, ()> {
    common::engine(gdbridge_integration_init)
}

/// Sends one `_process(delta)` the way the engine's main loop does.
fn process(object: RawObject, delta: f64) -> bool {
    let args = [(&delta as *const f64).cast::<std::ffi::c_void>()];
    unsafe { gdbridge_mock::call_virtual(object.as_ptr(), "_process", &args, std::ptr::null_mut()) }
}

fn level(object: RawObject) -> Option<i64> {
    let mut level = 0i64;
    let found = unsafe {
        gdbridge_mock::call_virtual(object.as_ptr(), "_level", &[], (&mut level as *mut i64).cast())
    };
    found.then_some(level)
}

// ============================================================================
// Registration
// ============================================================================

#[test]
fn classes_are_registered_in_order() {
    let _engine = engine();
    assert_eq!(
        gdbridge::registration::registered_classes(),
        ["Counter", "Spinner", "Walker", "Runner", "SprinterNode", "Ring"]
    );
    let sprinter = gdbridge_mock::extension_class("SprinterNode").unwrap();
    assert_eq!(sprinter.parent, "Runner");
    assert_eq!(gdbridge_mock::extension_class("Walker").unwrap().parent, "Node3D");
}

#[test]
fn method_descriptors_carry_signature() {
    let _engine = engine();
    let counter = gdbridge_mock::extension_class("Counter").unwrap();
    assert!(counter.ref_counted_hooks);

    let add = counter.method("add").unwrap();
    let names: Vec<_> = add.arguments.iter().map(|argument| argument.name.as_str()).collect();
    assert_eq!(names, ["a", "b"]);
    assert_eq!(add.return_value.as_ref().map(|ret| ret.ty), Some(VariantType::Int));
    assert_eq!(add.flags & gdbridge::sys::method_flags::CONST, 0);

    let hits = counter.method("hits").unwrap();
    assert_ne!(hits.flags & gdbridge::sys::method_flags::CONST, 0);

    assert!(counter.method("reset").unwrap().return_value.is_none());
    assert!(counter.method("clear").is_none());
    assert_eq!(counter.method("sum32").unwrap().arguments.len(), 32);

    assert_eq!(counter.signals.len(), 1);
    assert_eq!(counter.signals[0].name, "counted");
    assert_eq!(counter.signals[0].arguments[0].name, "total");
}

#[test]
fn properties_name_their_accessors() {
    let _engine = engine();
    let spinner = gdbridge_mock::extension_class("Spinner").unwrap();
    let (info, setter, getter) = &spinner.properties[0];
    assert_eq!(info.name, "speed");
    assert_eq!(info.ty, VariantType::Float);
    assert_eq!(info.hint, gdbridge::PropertyHint::Range as u32);
    assert_eq!(info.hint_string, "0,10");
    assert_eq!((setter.as_str(), getter.as_str()), ("set_speed", "speed"));

    let counter = gdbridge_mock::extension_class("Counter").unwrap();
    let (info, setter, getter) = &counter.properties[0];
    assert_eq!(info.name, "total");
    assert_eq!((setter.as_str(), getter.as_str()), ("", "hits"));
}

// ============================================================================
// Calls into host classes
// ============================================================================

#[test]
fn variant_call_reaches_host_method() -> anyhow::Result<()> {
    let _engine = engine();
    let counter = gdbridge::instantiate::<Counter>().unwrap();

    counter.call("hit", &[])?;
    let total = counter.call("hit", &[])?;
    assert_eq!(total.to::<i64>()?, 2);

    let total = counter.call("add", &[&Variant::from(3i64), &Variant::from(4i64)])?;
    assert_eq!(total.to::<i64>()?, 9);
    assert!(counter.call("reset", &[])?.is_nil());
    assert_eq!(shim::with_instance_of::<Counter, _>(counter.raw(), |this| this.hits), Some(0));

    assert_eq!(gdbridge_mock::emitted_signals(counter.raw().as_ptr()), ["counted", "counted"]);
    assert_eq!(counter.get("total")?.to::<i64>()?, 0);
    Ok(())
}

#[test]
fn pointer_call_reaches_host_method() -> anyhow::Result<()> {
    let _engine = engine();
    COUNTER.resolve()?;
    let counter = gdbridge::instantiate::<Counter>().unwrap();

    for _ in 0..3 {
        let _: i64 = dispatch::ptrcall(CounterMethod::hit.bind(), Some(counter.raw()), CallFrame::new())?;
    }
    let hits: i64 = dispatch::ptrcall(CounterMethod::hits.bind(), Some(counter.raw()), CallFrame::new())?;
    assert_eq!(hits, 3);
    assert_eq!(CounterMethod::hit.bind(), COUNTER.find("hit").unwrap());
    Ok(())
}

#[test]
fn zero_and_thirty_two_argument_calls() -> anyhow::Result<()> {
    let _engine = engine();
    COUNTER.resolve()?;
    let counter = gdbridge::instantiate::<Counter>().unwrap();

    let hits: i64 = dispatch::ptrcall(CounterMethod::hits.bind(), Some(counter.raw()), CallFrame::new())?;
    assert_eq!(hits, 0);

    let mut frame = CallFrame::new();
    for value in 1..=32i64 {
        frame.arg(value);
    }
    assert_eq!(frame.len(), MAX_FRAME_ARGS);
    let sum: i64 = dispatch::ptrcall(CounterMethod::sum32.bind(), Some(counter.raw()), frame)?;
    assert_eq!(sum, (1..=32).sum::<i64>());

    let args: Vec<Variant> = (1..=32i64).map(Variant::from).collect();
    let refs: Vec<&Variant> = args.iter().collect();
    let sum = counter.call("sum32", &refs[..31]);
    assert_eq!(sum.err(), Some(CallError::TooFewArguments { expected: 32 }));
    Ok(())
}

/// Scenario: variant-call of a two-argument method with three variants.
#[test]
fn too_many_arguments_leaves_instance_untouched() {
    let _engine = engine();
    let counter = gdbridge::instantiate::<Counter>().unwrap();

    let args = [Variant::from(1i64), Variant::from(2i64), Variant::from(3i64)];
    let result = counter.call("add", &[&args[0], &args[1], &args[2]]);
    assert_eq!(result.err(), Some(CallError::TooManyArguments { expected: 2 }));
    assert_eq!(shim::with_instance_of::<Counter, _>(counter.raw(), |this| this.hits), Some(0));
    assert!(gdbridge_mock::emitted_signals(counter.raw().as_ptr()).is_empty());

    let result = counter.call("add", &[&Variant::from("one"), &args[1]]);
    assert_eq!(
        result.err(),
        Some(CallError::InvalidArgument {
            index: 0,
            expected: VariantType::Int,
            actual: VariantType::String,
        })
    );
}

#[test]
fn property_round_trips_through_engine() -> anyhow::Result<()> {
    let _engine = engine();
    let spinner = gdbridge::instantiate::<Spinner>().unwrap();
    spinner.set("speed", &Variant::from(2.5f64))?;
    assert_eq!(spinner.get("speed")?.to::<f64>()?, 2.5);

    assert!(process(spinner.raw(), 0.5));
    assert!(process(spinner.raw(), 0.5));
    let state = shim::with_instance_of::<Spinner, _>(spinner.raw(), |this| (this.angle, this.ticks));
    assert_eq!(state, Some((2.5, 2)));
    gdbridge_mock::destroy(spinner.into_raw().as_ptr());
    Ok(())
}

// ============================================================================
// Virtual dispatch
// ============================================================================

#[test]
fn deepest_override_wins() {
    let _engine = engine();
    let walker = gdbridge::instantiate::<Walker>().unwrap();
    let runner = gdbridge::instantiate::<Runner>().unwrap();
    let sprinter = gdbridge::instantiate::<Sprinter>().unwrap();

    assert_eq!(level(walker.raw()), Some(1));
    assert_eq!(level(runner.raw()), Some(2));
    assert_eq!(level(sprinter.raw()), Some(3));

    // `_process` is only declared on Walker; it reaches the embedded Walker.
    assert!(process(sprinter.raw(), 0.016));
    assert!(process(sprinter.raw(), 0.016));
    let steps = shim::with_instance_of::<Sprinter, _>(sprinter.raw(), |this| this.inner.walker.steps);
    assert_eq!(steps, Some(2));

    shim::with_instance_of::<Sprinter, _>(sprinter.raw(), |this| this.laps = 4);
    assert_eq!(level(sprinter.raw()), Some(7));

    for object in [walker, runner, sprinter] {
        gdbridge_mock::destroy(object.into_raw().as_ptr());
    }
}

#[test]
fn virtual_through_parent_typed_handle() {
    let _engine = engine();
    let sprinter = gdbridge::instantiate::<Sprinter>().unwrap();
    let node: Bound<'_, Node> = sprinter.bind().upcast();
    assert_eq!(node.get_class().unwrap(), "SprinterNode");
    assert!(node.is_class("Walker").unwrap());
    assert_eq!(level(node.raw()), Some(3));
    gdbridge_mock::destroy(sprinter.into_raw().as_ptr());
}

/// Scenario: the engine asks a gizmo to redraw; the host answers with lines.
#[test]
fn gizmo_redraw_hands_the_engine_the_host_buffer() {
    let _engine = engine();
    EDITOR_NODE_3D_GIZMO.resolve().unwrap();
    let gizmo = gdbridge::instantiate::<Ring>().unwrap();
    let ptr = gizmo.raw().as_ptr();

    assert!(gdbridge_mock::request_redraw(ptr));
    let redraws = shim::with_instance_of::<Ring, _>(gizmo.raw(), |this| this.redraws);
    assert_eq!(redraws, Some(1));

    let batches = gdbridge_mock::gizmo_lines(ptr);
    assert_eq!(batches.len(), 1);
    let built = shim::with_instance_of::<Ring, _>(gizmo.raw(), |this| this.last_buffer).flatten();
    assert_eq!(Some(batches[0].buffer), built);
    assert_eq!(batches[0].points.len(), Ring::SEGMENTS);
    assert_eq!(batches[0].points[0], [1.0, 0.0, 0.0]);
    assert_eq!(batches[0].modulate, [0.9, 0.6, 0.1, 1.0]);

    assert!(gdbridge_mock::request_redraw(ptr));
    assert_eq!(shim::with_instance_of::<Ring, _>(gizmo.raw(), |this| this.redraws), Some(2));
    assert_eq!(gdbridge_mock::gizmo_lines(ptr).len(), 1);
}

/// Scenario: once the engine frees an instance, no trampoline runs for it.
#[test]
fn engine_free_retires_instance_before_later_virtuals() {
    let _engine = engine();
    let spinner = gdbridge::instantiate::<Spinner>().unwrap().into_raw();
    let instance = gdbridge_mock::instance_of(spinner.as_ptr()).unwrap();
    assert!(shim::is_live(instance));
    assert!(process(spinner, 1.0));

    gdbridge_mock::destroy(spinner.as_ptr());
    assert!(!shim::is_live(instance));

    let before = gdbridge_mock::stats().virtual_calls;
    assert!(!process(spinner, 1.0));
    assert_eq!(gdbridge_mock::stats().virtual_calls, before);
    assert_eq!(shim::with_instance_of::<Spinner, _>(spinner, |this| this.ticks), None);
}

#[test]
fn freeing_a_node_frees_its_host_children() -> anyhow::Result<()> {
    let _engine = engine();
    let parent = Owned::<Node>::construct();
    let child = gdbridge::instantiate::<Spinner>().unwrap();
    let instance = gdbridge_mock::instance_of(child.raw().as_ptr()).unwrap();

    common::add_child(parent.bind(), child.upcast::<Node>().transfer())?;
    assert_eq!(common::get_child_count(parent.bind())?, 1);

    drop(parent);
    assert!(!shim::is_live(instance));
    Ok(())
}

// ============================================================================
// Objects and values
// ============================================================================

/// Scenario: construct a refcounted resource, use it, release it.
#[test]
fn refcounted_resource_is_released_once() -> anyhow::Result<()> {
    let _engine = engine();
    let shape = Owned::<SphereShape3D>::construct();
    let raw = shape.raw();
    let id = shape.instance_id();

    common::set_radius(shape.bind(), 2.0)?;
    assert_eq!(common::get_radius(shape.bind())?, 2.0);
    assert_eq!(shape.bind().get_reference_count()?, 1);

    let second = shape.clone();
    assert_eq!(second.get_reference_count()?, 2);
    drop(second);
    assert_eq!(gdbridge_mock::reference_count(raw.as_ptr()), Some(1));

    drop(shape);
    assert!(!gdbridge_mock::is_alive(raw.as_ptr()));
    assert_eq!(gdbridge_mock::reference_count(raw.as_ptr()), None);
    assert!(!is_instance_valid(id));

    let invalid = gdbridge_mock::stats().invalid_calls;
    let radius: f64 = dispatch::ptrcall(SphereShape3DMethod::get_radius.bind(), Some(raw), CallFrame::new())?;
    assert_eq!(radius, 0.0);
    assert!(gdbridge_mock::stats().invalid_calls > invalid);
    Ok(())
}

#[test]
fn owned_factory_return_adopts_the_engine_reference() -> anyhow::Result<()> {
    let _engine = engine();
    let shape = Owned::<SphereShape3D>::construct();
    common::set_radius(shape.bind(), 3.0)?;

    let copy = common::duplicate(shape.bind().upcast::<Resource>())?.expect("engine returned a copy");
    let copy = copy.cast::<SphereShape3D>().expect("copy keeps its class");
    let copy_ptr = copy.raw().as_ptr();
    assert_ne!(copy_ptr, shape.raw().as_ptr());
    assert_eq!(common::get_radius(copy.bind())?, 3.0);
    assert_eq!(gdbridge_mock::reference_count(copy_ptr), Some(1));
    drop(copy);
    assert!(!gdbridge_mock::is_alive(copy_ptr));

    // Reading an owned return as a plain pointer is refused before the engine runs.
    let created = gdbridge_mock::stats().objects_created;
    let mut frame = CallFrame::new();
    frame.arg(false);
    let borrowed = dispatch::ptrcall::<Option<RawObject>>(ResourceMethod::duplicate.bind(), Some(shape.raw()), frame);
    assert_eq!(
        borrowed,
        Err(CallError::WrongReturnKind {
            method: "duplicate",
            returns_owned: true,
        })
    );
    assert_eq!(gdbridge_mock::stats().objects_created, created);
    Ok(())
}

#[test]
fn refused_call_releases_the_transferred_argument() {
    let _engine = engine();
    let live = gdbridge_mock::stats().live_objects;
    let child = Owned::<Node>::construct();
    let child_ptr = child.raw().as_ptr();

    let mut frame = CallFrame::new();
    frame.arg(child.transfer()).arg(false).arg(0i64);
    let result = dispatch::ptrcall::<()>(NodeMethod::add_child.bind(), None, frame);

    assert_eq!(result, Err(CallError::InstanceIsNull));
    assert!(!gdbridge_mock::is_alive(child_ptr));
    assert_eq!(gdbridge_mock::stats().live_objects, live);
}

#[test]
fn host_refcounted_instance_follows_its_handle() {
    let _engine = engine();
    let counter = gdbridge::instantiate::<Counter>().unwrap();
    let ptr = counter.raw().as_ptr();
    let instance = gdbridge_mock::instance_of(ptr).unwrap();

    let copy = counter.clone();
    drop(counter);
    assert!(shim::is_live(instance));
    drop(copy);
    assert!(!shim::is_live(instance));
    assert!(!gdbridge_mock::is_alive(ptr));
}

/// Scenario: 1024 vectors through a variant and back.
#[test]
fn packed_vector3_round_trip() -> anyhow::Result<()> {
    let _engine = engine();
    let live = handle::stats().live();
    {
        let points: Vec<Vector3> = (0..1024)
            .map(|i| Vector3::new(i as f32, 2.0 * i as f32, 3.0 * i as f32))
            .collect();
        let array = PackedVector3Array::from_slice(&points);
        let variant = array.to_variant();
        assert_eq!(variant.get_type(), VariantType::PackedVector3Array);

        let back: PackedVector3Array = variant.to()?;
        assert_eq!(back.len(), 1024);
        assert_eq!(back.to_vec(), points);
        assert_eq!(back.get(1023), Some(Vector3::new(1023.0, 2046.0, 3069.0)));

        let empty = PackedVector3Array::from_slice(&[]);
        assert!(empty.is_empty());
        assert!(empty.to_vec().is_empty());
    }
    assert_eq!(handle::stats().live(), live);
    Ok(())
}

#[test]
fn nil_converts_to_null_and_zero() {
    let _engine = engine();
    let nil = Variant::nil();
    assert_eq!(nil.to::<Option<RawObject>>(), Ok(None));
    assert_eq!(nil.try_to_nullable::<i64>(), (0, false));
    assert_eq!(Variant::from(7i64).try_to_nullable::<i64>(), (7, true));
}

#[test]
fn engine_class_markers_chain() {
    fn takes_node<T: Inherits<Node>>() {}
    takes_node::<Node3D>();
    assert_eq!(<SphereShape3D as EngineClass>::CLASS_NAME, "SphereShape3D");
    assert!(<SphereShape3D as EngineClass>::REF_COUNTED);
    assert!(!<Node3D as EngineClass>::REF_COUNTED);
}
