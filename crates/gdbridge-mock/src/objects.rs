//! Engine objects, the native class hierarchy and method binds.
//!
//! Object pointers handed to the runtime are opaque tokens derived from the
//! instance id and never reused, so a pointer kept past `object_destroy` is
//! detected instead of aliasing a newer object.
//!
//! The state lock is never held while host code runs: anything that calls a
//! host callback copies what it needs out of the state first.
//!
//! ## Native classes
//!
//! | Class | Parent | Methods |
//! |---|---|---|
//! | `Object` | | get_class, is_class, set, get, notification, to_string, has_method, call, emit_signal |
//! | `RefCounted` | Object | init_ref, reference, unreference, get_reference_count |
//! | `Node` | Object | add_child, get_child, get_child_count, get_parent |
//! | `Node3D` | Node | set_position, get_position |
//! | `Resource` | RefCounted | duplicate (returns a referenced copy) |
//! | `Material`, `Shape3D` | Resource | |
//! | `SphereShape3D` | Shape3D | set_radius, get_radius |
//! | `Node3DGizmo` | RefCounted | |
//! | `EditorNode3DGizmo` | Node3DGizmo | add_lines, clear |
//! | `RenderingServer` | Object | get_frame_count (singleton only) |

use std::ffi::c_void;
use std::ptr::without_provenance_mut;
use std::sync::atomic::{AtomicI64, AtomicU64, Ordering};
use std::sync::{LazyLock, Mutex, MutexGuard, PoisonError};

use gdbridge_sys::{
    Bool, CallErrorRaw, CallErrorType, ClassCreationInfo, ClassInstancePtr, ClassLibraryPtr, ClassTagPtr,
    ConstObjectPtr, ConstStringNamePtr, ConstTypePtr, ConstVariantPtr, FALSE, Int, MethodBindPtr, ObjectPtr,
    TRUE, TypePtr, UninitStringNamePtr, UninitVariantPtr, VariantType,
};
use rustc_hash::FxHashMap;

use crate::classdb::{ExtensionClass, HostMethod};
use crate::diagnostics;
use crate::heap::{self, Packed, read, write};
use crate::variant::{self, OwnedVariant, call_error, simple_error};

pub(crate) type CallResult = Result<(), CallErrorRaw>;

/// Native method body. `args` are typed pointers in pointer-call form, or
/// variant pointers for vararg methods. `ret` is uninitialized storage of the
/// declared return type (a variant for [`Ret::Variant`]), or null.
type Body = unsafe fn(object: ObjectPtr, args: &[*const c_void], ret: *mut c_void) -> CallResult;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Ret {
    Void,
    Variant,
    Typed(VariantType),
}

pub(crate) struct NativeMethod {
    pub(crate) name: &'static str,
    hash: Int,
    /// `Nil` accepts any variant.
    params: &'static [VariantType],
    ret: Ret,
    vararg: bool,
    body: Body,
}

pub(crate) struct NativeClass {
    pub(crate) name: &'static str,
    parent: Option<&'static str>,
    ref_counted: bool,
    instantiable: bool,
    methods: &'static [NativeMethod],
}

macro_rules! method {
    ($name:literal, $hash:literal, [$($param:ident),*], $ret:expr, $body:path) => {
        NativeMethod {
            name: $name,
            hash: $hash,
            params: &[$(VariantType::$param),*],
            ret: $ret,
            vararg: false,
            body: $body,
        }
    };
    ($name:literal, $hash:literal, vararg, $body:path) => {
        NativeMethod {
            name: $name,
            hash: $hash,
            params: &[],
            ret: Ret::Variant,
            vararg: true,
            body: $body,
        }
    };
}

const fn typed(ty: VariantType) -> Ret {
    Ret::Typed(ty)
}

static OBJECT_METHODS: [NativeMethod; 9] = [
    method!("get_class", 201670096, [], typed(VariantType::String), get_class),
    method!("is_class", 3927539163, [String], typed(VariantType::Bool), is_class),
    method!("set", 3776071444, [StringName, Nil], Ret::Void, set),
    method!("get", 2760726917, [StringName], Ret::Variant, get),
    method!("notification", 4023243586, [Int, Bool], Ret::Void, notification),
    method!("to_string", 2841200299, [], typed(VariantType::String), to_string),
    method!("has_method", 2619796661, [StringName], typed(VariantType::Bool), has_method),
    method!("call", 3400424181, vararg, call),
    method!("emit_signal", 4047867050, vararg, emit_signal),
];

static REF_COUNTED_METHODS: [NativeMethod; 4] = [
    method!("init_ref", 2240911060, [], typed(VariantType::Bool), init_ref),
    method!("reference", 2240911060, [], typed(VariantType::Bool), reference),
    method!("unreference", 2240911060, [], typed(VariantType::Bool), unreference),
    method!("get_reference_count", 3905245786, [], typed(VariantType::Int), get_reference_count),
];

static NODE_METHODS: [NativeMethod; 4] = [
    method!("add_child", 3863233950, [Object, Bool, Int], Ret::Void, add_child),
    method!("get_child", 541253412, [Int, Bool], typed(VariantType::Object), get_child),
    method!("get_child_count", 894402480, [Bool], typed(VariantType::Int), get_child_count),
    method!("get_parent", 3160264692, [], typed(VariantType::Object), get_parent),
];

static RESOURCE_METHODS: [NativeMethod; 1] =
    [method!("duplicate", 482882304, [Bool], typed(VariantType::Object), duplicate)];

static NODE3D_METHODS: [NativeMethod; 2] = [
    method!("set_position", 3460891852, [Vector3], Ret::Void, set_position),
    method!("get_position", 3360562783, [], typed(VariantType::Vector3), get_position),
];

static SPHERE_METHODS: [NativeMethod; 2] = [
    method!("set_radius", 373806689, [Float], Ret::Void, set_radius),
    method!("get_radius", 1740695150, [], typed(VariantType::Float), get_radius),
];

static GIZMO_METHODS: [NativeMethod; 2] = [
    method!("add_lines", 2910971437, [PackedVector3Array, Object, Bool, Color], Ret::Void, add_lines),
    method!("clear", 3218959716, [], Ret::Void, clear_lines),
];

static RENDERING_SERVER_METHODS: [NativeMethod; 1] =
    [method!("get_frame_count", 3905245786, [], typed(VariantType::Int), get_frame_count)];

const fn class(
    name: &'static str,
    parent: Option<&'static str>,
    ref_counted: bool,
    instantiable: bool,
    methods: &'static [NativeMethod],
) -> NativeClass {
    NativeClass {
        name,
        parent,
        ref_counted,
        instantiable,
        methods,
    }
}

static CLASSES: [NativeClass; 12] = [
    class("Object", None, false, true, &OBJECT_METHODS),
    class("RefCounted", Some("Object"), true, true, &REF_COUNTED_METHODS),
    class("Node", Some("Object"), false, true, &NODE_METHODS),
    class("Node3D", Some("Node"), false, true, &NODE3D_METHODS),
    class("Resource", Some("RefCounted"), true, true, &RESOURCE_METHODS),
    class("Material", Some("Resource"), true, true, &[]),
    class("Shape3D", Some("Resource"), true, false, &[]),
    class("SphereShape3D", Some("Shape3D"), true, true, &SPHERE_METHODS),
    class("Node3DGizmo", Some("RefCounted"), true, false, &[]),
    class("EditorNode3DGizmo", Some("Node3DGizmo"), true, true, &GIZMO_METHODS),
    class("RenderingServer", Some("Object"), false, false, &RENDERING_SERVER_METHODS),
    class("Engine", Some("Object"), false, false, &[]),
];

const SINGLETONS: [&str; 2] = ["RenderingServer", "Engine"];

pub(crate) fn native_class(name: &str) -> Option<&'static NativeClass> {
    CLASSES.iter().find(|class| class.name == name)
}

fn native_chain(class: &'static NativeClass) -> impl Iterator<Item = &'static NativeClass> {
    std::iter::successors(Some(class), |class| class.parent.and_then(native_class))
}

// ============================================================================
// Counters
// ============================================================================

pub(crate) static PTRCALLS: AtomicU64 = AtomicU64::new(0);
pub(crate) static VARCALLS: AtomicU64 = AtomicU64::new(0);
pub(crate) static VIRTUAL_CALLS: AtomicU64 = AtomicU64::new(0);
pub(crate) static INVALID_CALLS: AtomicU64 = AtomicU64::new(0);
pub(crate) static FRAMES: AtomicI64 = AtomicI64::new(0);

fn bump(counter: &AtomicU64) {
    counter.fetch_add(1, Ordering::AcqRel);
}

fn invalid_call(what: &str) {
    bump(&INVALID_CALLS);
    diagnostics::report(format!("{what} on an invalid object"));
}

// ============================================================================
// Object pointers
// ============================================================================

const OBJECT_BASE: usize = 0x4000_0000;
const OBJECT_STRIDE: usize = 16;

pub(crate) fn object_ptr(id: u64) -> ObjectPtr {
    without_provenance_mut(OBJECT_BASE + id as usize * OBJECT_STRIDE)
}

/// Instance id encoded in `object`, whether or not it is still alive.
pub(crate) fn object_id(object: ConstObjectPtr) -> Option<u64> {
    let offset = object.addr().checked_sub(OBJECT_BASE)?;
    (offset != 0 && offset % OBJECT_STRIDE == 0).then_some((offset / OBJECT_STRIDE) as u64)
}

pub(crate) fn live_id(object: ConstObjectPtr) -> Option<u64> {
    object_id(object).filter(|id| with_state(|state| state.objects.contains_key(id)))
}

pub(crate) fn is_live(object: ConstObjectPtr) -> bool {
    live_id(object).is_some()
}

fn require(object: ConstObjectPtr) -> Result<u64, CallErrorRaw> {
    live_id(object).ok_or_else(|| simple_error(CallErrorType::InstanceIsNull))
}

// ============================================================================
// State
// ============================================================================

#[derive(Debug, Clone, Copy)]
pub(crate) struct Binding {
    pub(crate) class: &'static str,
    pub(crate) instance: ClassInstancePtr,
}

/// Lines recorded by one `EditorNode3DGizmo::add_lines` call.
#[derive(Debug, Clone, PartialEq)]
pub struct LineBatch {
    /// First word of the packed array the engine received, i.e. its buffer.
    pub buffer: u64,
    pub points: Vec<[f32; 3]>,
    pub billboard: bool,
    pub modulate: [f32; 4],
}

pub(crate) struct MockObject {
    class: &'static NativeClass,
    pub(crate) binding: Option<Binding>,
    pub(crate) refcount: Option<i64>,
    properties: Vec<(String, OwnedVariant)>,
    parent: Option<u64>,
    children: Vec<u64>,
    pub(crate) notifications: Vec<i32>,
    pub(crate) signals: Vec<String>,
    pub(crate) lines: Vec<LineBatch>,
    radius: f64,
    position: [f32; 3],
}

impl MockObject {
    fn new(class: &'static NativeClass) -> Self {
        Self {
            class,
            binding: None,
            refcount: class_is_ref_counted(class).then_some(0),
            properties: Vec::new(),
            parent: None,
            children: Vec::new(),
            notifications: Vec::new(),
            signals: Vec::new(),
            lines: Vec::new(),
            radius: 0.5,
            position: [0.0; 3],
        }
    }
}

fn class_is_ref_counted(class: &'static NativeClass) -> bool {
    native_chain(class).any(|class| class.ref_counted)
}

enum Bind {
    Native {
        class: &'static str,
        method: &'static NativeMethod,
    },
    Extension {
        class: &'static str,
        method: String,
    },
}

/// A host method resolved against a live instance, ready to call without the
/// state lock.
#[derive(Clone, Copy)]
pub(crate) struct HostTarget {
    method: HostMethod,
    instance: ClassInstancePtr,
}

#[derive(Clone, Copy)]
pub(crate) struct Hooks {
    pub(crate) info: ClassCreationInfo,
    pub(crate) instance: ClassInstancePtr,
}

enum Found {
    Native(&'static NativeMethod),
    Host(HostTarget),
}

#[derive(Default)]
pub(crate) struct State {
    next_id: u64,
    pub(crate) objects: FxHashMap<u64, MockObject>,
    tags: Vec<String>,
    binds: FxHashMap<(String, String), usize>,
    singletons: FxHashMap<&'static str, u64>,
    pub(crate) classes: Vec<ExtensionClass>,
    pub(crate) destroyed: u64,
}

// Raw pointers in the state are opaque host values the mock never
// dereferences; host callbacks run with the lock released.
unsafe impl Send for State {}

static STATE: LazyLock<Mutex<State>> = LazyLock::new(|| Mutex::new(State::default()));

fn lock() -> MutexGuard<'static, State> {
    STATE.lock().unwrap_or_else(PoisonError::into_inner)
}

pub(crate) fn with_state<R>(f: impl FnOnce(&mut State) -> R) -> R {
    f(&mut lock())
}

impl State {
    fn create(&mut self, class: &'static NativeClass) -> ObjectPtr {
        self.next_id += 1;
        let id = self.next_id;
        self.objects.insert(id, MockObject::new(class));
        tracing::trace!(target: "gdbridge_mock", class = class.name, id, "object created");
        object_ptr(id)
    }

    pub(crate) fn object(&self, id: u64) -> Option<&MockObject> {
        self.objects.get(&id)
    }

    pub(crate) fn object_mut(&mut self, id: u64) -> Option<&mut MockObject> {
        self.objects.get_mut(&id)
    }

    pub(crate) fn extension(&self, name: &str) -> Option<&ExtensionClass> {
        self.classes.iter().find(|class| class.name == name)
    }

    fn knows_class(&self, name: &str) -> bool {
        native_class(name).is_some() || self.extension(name).is_some()
    }

    /// Extension classes from `class` up to its native base, most derived first.
    fn extension_chain(&self, class: &str) -> Vec<&ExtensionClass> {
        let mut chain = Vec::new();
        let mut next = self.extension(class);
        while let Some(class) = next {
            chain.push(class);
            next = self.extension(&class.parent);
        }
        chain
    }

    /// Class names of `id`, most derived first.
    fn class_chain(&self, id: u64) -> Vec<&str> {
        let Some(object) = self.object(id) else {
            return Vec::new();
        };
        let mut chain: Vec<&str> = object
            .binding
            .map(|binding| self.extension_chain(binding.class))
            .unwrap_or_default()
            .into_iter()
            .map(|class| class.name)
            .collect();
        chain.extend(native_chain(object.class).map(|class| class.name));
        chain
    }

    pub(crate) fn is_instance_of(&self, id: u64, class: &str) -> bool {
        self.class_chain(id).contains(&class)
    }

    pub(crate) fn class_name(&self, id: u64) -> Option<String> {
        self.class_chain(id).first().map(|name| name.to_string())
    }

    pub(crate) fn hooks(&self, id: u64) -> Option<Hooks> {
        let binding = self.object(id)?.binding?;
        let class = self.extension(binding.class)?;
        Some(Hooks {
            info: class.info,
            instance: binding.instance,
        })
    }

    fn host_method(&self, id: u64, name: &str) -> Option<HostTarget> {
        let binding = self.object(id)?.binding?;
        self.extension_chain(binding.class)
            .into_iter()
            .find_map(|class| class.methods.iter().find(|method| method.name == name))
            .map(|method| HostTarget {
                method: method.entry,
                instance: binding.instance,
            })
    }

    fn native_method(&self, id: u64, name: &str) -> Option<&'static NativeMethod> {
        let object = self.object(id)?;
        native_chain(object.class).find_map(|class| class.methods.iter().find(|method| method.name == name))
    }

    fn find_method(&self, id: u64, name: &str) -> Option<Found> {
        self.host_method(id, name)
            .map(Found::Host)
            .or_else(|| self.native_method(id, name).map(Found::Native))
    }

    /// Host accessor named by property `name`; `setter` picks the side.
    fn property_accessor(&self, id: u64, name: &str, setter: bool) -> Option<HostTarget> {
        let binding = self.object(id)?.binding?;
        let accessor = self
            .extension_chain(binding.class)
            .into_iter()
            .find_map(|class| class.properties.iter().find(|property| property.info.name == name))
            .map(|property| if setter { &property.setter } else { &property.getter })
            .filter(|accessor| !accessor.is_empty())?
            .clone();
        self.host_method(id, &accessor)
    }

    fn method_bind(&mut self, class: &str, method: &str, hash: Int) -> Option<usize> {
        let key = (class.to_string(), method.to_string());
        if let Some(bind) = self.binds.get(&key) {
            return Some(*bind);
        }
        let bind = if let Some(native) = native_class(class) {
            let found = native_chain(native)
                .find_map(|class| class.methods.iter().find(|candidate| candidate.name == method))
                .filter(|found| found.hash == hash)?;
            Bind::Native {
                class: native.name,
                method: found,
            }
        } else {
            let chain = self.extension_chain(class);
            let owner = chain.first()?.name;
            if !chain.iter().any(|class| class.methods.iter().any(|candidate| candidate.name == method)) {
                return None;
            }
            Bind::Extension {
                class: owner,
                method: method.to_string(),
            }
        };
        let bind = Box::leak(Box::new(bind)) as *const Bind as usize;
        self.binds.insert(key, bind);
        Some(bind)
    }

    /// Drops cached binds of an unregistered class so a re-registration
    /// resolves fresh ones. The leaked binds stay valid and fail their calls.
    pub(crate) fn forget_binds(&mut self, class: &str) {
        self.binds.retain(|(owner, _), _| owner != class);
    }

    fn tag(&mut self, class: &str) -> Option<usize> {
        if !self.knows_class(class) {
            return None;
        }
        let index = match self.tags.iter().position(|known| known == class) {
            Some(index) => index,
            None => {
                self.tags.push(class.to_string());
                self.tags.len() - 1
            }
        };
        Some(index + 1)
    }

    fn singleton(&mut self, name: &str) -> Option<u64> {
        let name = *SINGLETONS.iter().find(|candidate| **candidate == name)?;
        if let Some(id) = self.singletons.get(name) {
            return Some(*id);
        }
        let class = native_class(name)?;
        let id = object_id(self.create(class))?;
        self.singletons.insert(name, id);
        Some(id)
    }

    /// Removes `id` and its node descendants, children first.
    fn remove_tree(&mut self, id: u64) -> Vec<(u64, MockObject)> {
        let mut removed = Vec::new();
        let children = self.object(id).map(|object| object.children.clone()).unwrap_or_default();
        for child in children {
            removed.extend(self.remove_tree(child));
        }
        if let Some(object) = self.objects.remove(&id) {
            if let Some(parent) = object.parent.and_then(|parent| self.objects.get_mut(&parent)) {
                parent.children.retain(|child| *child != id);
            }
            self.singletons.retain(|_, singleton| *singleton != id);
            self.destroyed += 1;
            removed.push((id, object));
        }
        removed
    }
}

/// Class name of a live object, for callable and signal text.
pub(crate) fn class_of_id(id: u64) -> Option<String> {
    with_state(|state| state.class_name(id))
}

// ============================================================================
// Calls
// ============================================================================

unsafe fn host_varcall(target: HostTarget, args: &[ConstVariantPtr], ret: *mut c_void) -> CallResult {
    let Some(call) = target.method.call else {
        return Err(simple_error(CallErrorType::InvalidMethod));
    };
    let mut error = CallErrorRaw::OK;
    let count = Int::try_from(args.len()).unwrap_or(Int::MAX);
    unsafe { call(target.method.userdata, target.instance, args.as_ptr(), count, ret, &mut error) };
    if error.is_ok() { Ok(()) } else { Err(error) }
}

/// Runs a native method from variant arguments, converting them to the
/// declared parameter types first. `ret` is a nil variant.
unsafe fn native_varcall(method: &NativeMethod, object: ObjectPtr, args: &[ConstVariantPtr], ret: *mut c_void) -> CallResult {
    if method.vararg {
        return unsafe { (method.body)(object, args, ret) };
    }

    let expected = method.params.len();
    if args.len() > expected {
        return Err(call_error(CallErrorType::TooManyArguments, expected, VariantType::Nil, VariantType::Nil));
    }
    if args.len() < expected {
        return Err(call_error(CallErrorType::TooFewArguments, expected, VariantType::Nil, VariantType::Nil));
    }
    for (index, (arg, param)) in args.iter().zip(method.params).enumerate() {
        let actual = unsafe { variant::tag(*arg) };
        let accepted = *param == VariantType::Nil
            || actual == *param
            || (*param == VariantType::Object && actual == VariantType::Nil);
        if !accepted {
            return Err(call_error(CallErrorType::InvalidArgument, index, *param, actual));
        }
    }

    let mut scratch = vec![[0u64; 8]; expected];
    let mut converted = Vec::with_capacity(expected);
    for ((arg, param), slot) in args.iter().zip(method.params).zip(scratch.iter_mut()) {
        let slot: *mut c_void = slot.as_mut_ptr().cast();
        if *param == VariantType::Nil {
            converted.push(arg.cast::<c_void>());
            continue;
        }
        if unsafe { variant::tag(*arg) } != VariantType::Nil {
            unsafe { heap::construct_copy(*param, slot, variant::payload(*arg)) };
        }
        converted.push(slot.cast_const());
    }

    let result = match method.ret {
        Ret::Void => unsafe { (method.body)(object, &converted, std::ptr::null_mut()) },
        Ret::Variant => unsafe { (method.body)(object, &converted, ret) },
        Ret::Typed(ty) => {
            let mut typed = [0u64; 8];
            let typed_ptr: *mut c_void = typed.as_mut_ptr().cast();
            let result = unsafe { (method.body)(object, &converted, typed_ptr) };
            if result.is_ok() {
                // Moves the bytes: the variant takes over any heap value.
                unsafe {
                    variant::emplace(ret, ty, |p| {
                        std::ptr::copy_nonoverlapping(typed_ptr.cast::<u8>(), p.cast::<u8>(), ty.ptrcall_size())
                    })
                };
            }
            result
        }
    };

    for ((arg, param), slot) in args.iter().zip(method.params).zip(scratch.iter_mut()) {
        if *param != VariantType::Nil && unsafe { variant::tag(*arg) } != VariantType::Nil {
            unsafe { heap::destroy(*param, slot.as_mut_ptr().cast()) };
        }
    }
    result
}

/// Calls `method` on `object` by name with variant arguments, the way
/// `Object::call` and callables do. `ret` is a nil variant.
pub(crate) unsafe fn invoke_by_name(object: ObjectPtr, method: &str, args: &[ConstVariantPtr], ret: *mut c_void) -> CallResult {
    let id = require(object)?;
    match with_state(|state| state.find_method(id, method)) {
        Some(Found::Host(target)) => unsafe { host_varcall(target, args, ret) },
        Some(Found::Native(native)) => unsafe { native_varcall(native, object, args, ret) },
        None => Err(simple_error(CallErrorType::InvalidMethod)),
    }
}

pub(crate) fn record_signal(object: u64, signal: &str) -> CallResult {
    with_state(|state| match state.object_mut(object) {
        Some(object) => {
            object.signals.push(signal.to_string());
            Ok(())
        }
        None => Err(simple_error(CallErrorType::InstanceIsNull)),
    })
}

unsafe fn bind_ref<'a>(bind: MethodBindPtr) -> Option<&'a Bind> {
    unsafe { bind.cast::<Bind>().as_ref() }
}

fn host_target(id: u64, class: &str, method: &str) -> Option<HostTarget> {
    with_state(|state| {
        if !state.is_instance_of(id, class) {
            return None;
        }
        state.host_method(id, method)
    })
}

pub(crate) unsafe extern "C" fn object_method_bind_ptrcall(
    method_bind: MethodBindPtr,
    instance: ObjectPtr,
    args: *const ConstTypePtr,
    ret: TypePtr,
) {
    bump(&PTRCALLS);
    let Some(bind) = (unsafe { bind_ref(method_bind) }) else {
        invalid_call("ptrcall with a null method bind");
        return;
    };
    match bind {
        Bind::Native { class, method } => {
            let valid = live_id(instance).is_some_and(|id| with_state(|state| state.is_instance_of(id, class)));
            if !valid || method.vararg {
                if let Ret::Typed(ty) = method.ret {
                    unsafe { std::ptr::write_bytes(ret.cast::<u8>(), 0, ty.ptrcall_size()) };
                }
                invalid_call(&format!("ptrcall of {class}::{}", method.name));
                return;
            }
            let args = unsafe { variant::arg_slice(args, method.params.len() as Int) };
            if args.len() != method.params.len() {
                invalid_call(&format!("ptrcall of {class}::{} without arguments", method.name));
                return;
            }
            if let Err(error) = unsafe { (method.body)(instance, args, ret) } {
                diagnostics::report(format!("{class}::{} failed with code {}", method.name, error.error));
            }
        }
        Bind::Extension { class, method } => {
            let target = live_id(instance).and_then(|id| host_target(id, class, method));
            match target.and_then(|target| Some((target.method.ptrcall?, target))) {
                Some((ptrcall, target)) => unsafe { ptrcall(target.method.userdata, target.instance, args, ret) },
                None => invalid_call(&format!("ptrcall of {class}::{method}")),
            }
        }
    }
}

pub(crate) unsafe extern "C" fn object_method_bind_call(
    method_bind: MethodBindPtr,
    instance: ObjectPtr,
    args: *const ConstVariantPtr,
    arg_count: Int,
    ret: UninitVariantPtr,
    error: *mut CallErrorRaw,
) {
    bump(&VARCALLS);
    unsafe { variant::write_nil(ret) };
    let args = unsafe { variant::arg_slice(args, arg_count) };
    let outcome = match unsafe { bind_ref(method_bind) } {
        None => Err(simple_error(CallErrorType::InvalidMethod)),
        Some(bind) => match (require(instance), bind) {
            (Err(error), _) => Err(error),
            (Ok(id), Bind::Native { class, method }) => {
                if with_state(|state| state.is_instance_of(id, class)) {
                    unsafe { native_varcall(method, instance, args, ret) }
                } else {
                    Err(simple_error(CallErrorType::InvalidMethod))
                }
            }
            (Ok(id), Bind::Extension { class, method }) => match host_target(id, class, method) {
                Some(target) => unsafe { host_varcall(target, args, ret) },
                None => Err(simple_error(CallErrorType::InvalidMethod)),
            },
        },
    };
    unsafe { write(error.cast(), outcome.err().unwrap_or(CallErrorRaw::OK)) };
}

// ============================================================================
// Object methods
// ============================================================================

unsafe fn arg<T: Copy>(args: &[*const c_void], index: usize) -> T {
    unsafe { read(args[index]) }
}

unsafe fn get_class(object: ObjectPtr, _args: &[*const c_void], ret: *mut c_void) -> CallResult {
    let id = require(object)?;
    let name = with_state(|state| state.class_name(id)).unwrap_or_default();
    unsafe { heap::write_text(ret, name) };
    Ok(())
}

unsafe fn is_class(object: ObjectPtr, args: &[*const c_void], ret: *mut c_void) -> CallResult {
    let id = require(object)?;
    let class = unsafe { heap::text(args[0]) };
    let found = with_state(|state| state.is_instance_of(id, &class));
    unsafe { write(ret, u8::from(found)) };
    Ok(())
}

unsafe fn set(object: ObjectPtr, args: &[*const c_void], _ret: *mut c_void) -> CallResult {
    let id = require(object)?;
    let (name_ptr, value) = (args[0], args[1]);
    let name = unsafe { heap::text(name_ptr) };

    let hooks = with_state(|state| state.hooks(id));
    if let Some(Hooks { info, instance }) = hooks
        && let Some(set_func) = info.set_func
        && unsafe { set_func(instance, name_ptr, value) } == TRUE
    {
        return Ok(());
    }

    if let Some(setter) = with_state(|state| state.property_accessor(id, &name, true)) {
        let mut discarded = OwnedVariant::nil();
        return unsafe { host_varcall(setter, &[value], discarded.as_mut_ptr()) };
    }

    let value = unsafe { OwnedVariant::copy_of(value) };
    let replaced = with_state(|state| {
        let object = state.object_mut(id)?;
        match object.properties.iter_mut().find(|(key, _)| *key == name) {
            Some((_, slot)) => Some(std::mem::replace(slot, value)),
            None => {
                object.properties.push((name, value));
                None
            }
        }
    });
    drop(replaced);
    Ok(())
}

unsafe fn get(object: ObjectPtr, args: &[*const c_void], ret: *mut c_void) -> CallResult {
    let id = require(object)?;
    let name_ptr = args[0];
    let name = unsafe { heap::text(name_ptr) };

    let hooks = with_state(|state| state.hooks(id));
    if let Some(Hooks { info, instance }) = hooks
        && let Some(get_func) = info.get_func
    {
        let mut value = OwnedVariant::nil();
        if unsafe { get_func(instance, name_ptr, value.as_mut_ptr()) } == TRUE {
            unsafe { value.move_into(ret) };
            return Ok(());
        }
    }

    if let Some(getter) = with_state(|state| state.property_accessor(id, &name, false)) {
        return unsafe { host_varcall(getter, &[], ret) };
    }

    let stored = with_state(|state| {
        state
            .object(id)?
            .properties
            .iter()
            .find(|(key, _)| *key == name)
            .map(|(_, value)| value.clone())
    });
    let value = stored.unwrap_or_else(OwnedVariant::nil);
    unsafe { value.move_into(ret) };
    Ok(())
}

unsafe fn notification(object: ObjectPtr, args: &[*const c_void], _ret: *mut c_void) -> CallResult {
    let id = require(object)?;
    let what = i32::try_from(unsafe { arg::<Int>(args, 0) }).unwrap_or(i32::MAX);
    let reversed: Bool = unsafe { arg(args, 1) };
    let hooks = with_state(|state| {
        if let Some(object) = state.object_mut(id) {
            object.notifications.push(what);
        }
        state.hooks(id)
    });
    if let Some(Hooks { info, instance }) = hooks
        && let Some(notify) = info.notification_func
    {
        unsafe { notify(instance, what, reversed) };
    }
    Ok(())
}

/// Engine text of an object: the host's `to_string` when it provides one.
pub(crate) unsafe fn describe(object: ObjectPtr) -> String {
    if object.is_null() {
        return "<null>".to_string();
    }
    let Some(id) = live_id(object) else {
        return "<Freed Object>".to_string();
    };
    let (class, hooks) = with_state(|state| (state.class_name(id).unwrap_or_default(), state.hooks(id)));
    if let Some(Hooks { info, instance }) = hooks
        && let Some(to_string) = info.to_string_func
    {
        let mut valid: Bool = FALSE;
        let mut out = [0u64; 1];
        unsafe { to_string(instance, &mut valid, out.as_mut_ptr().cast()) };
        if valid == TRUE {
            let text = unsafe { heap::text(out.as_ptr().cast()) };
            unsafe { heap::destroy(VariantType::String, out.as_mut_ptr().cast()) };
            return text;
        }
    }
    format!("<{class}#{id}>")
}

unsafe fn to_string(object: ObjectPtr, _args: &[*const c_void], ret: *mut c_void) -> CallResult {
    require(object)?;
    unsafe { heap::write_text(ret, describe(object)) };
    Ok(())
}

unsafe fn has_method(object: ObjectPtr, args: &[*const c_void], ret: *mut c_void) -> CallResult {
    let id = require(object)?;
    let name = unsafe { heap::text(args[0]) };
    let found = with_state(|state| state.find_method(id, &name).is_some());
    unsafe { write(ret, u8::from(found)) };
    Ok(())
}

fn method_name(arg: ConstVariantPtr, index: usize) -> Result<String, CallErrorRaw> {
    match unsafe { variant::tag(arg) } {
        VariantType::StringName | VariantType::String => Ok(unsafe { heap::text(variant::payload(arg)) }),
        actual => Err(call_error(CallErrorType::InvalidArgument, index, VariantType::StringName, actual)),
    }
}

unsafe fn call(object: ObjectPtr, args: &[*const c_void], ret: *mut c_void) -> CallResult {
    let Some((first, rest)) = args.split_first() else {
        return Err(call_error(CallErrorType::TooFewArguments, 1, VariantType::Nil, VariantType::Nil));
    };
    let name = method_name(*first, 0)?;
    unsafe { invoke_by_name(object, &name, rest, ret) }
}

unsafe fn emit_signal(object: ObjectPtr, args: &[*const c_void], ret: *mut c_void) -> CallResult {
    let Some(first) = args.first() else {
        return Err(call_error(CallErrorType::TooFewArguments, 1, VariantType::Nil, VariantType::Nil));
    };
    let id = require(object)?;
    let name = method_name(*first, 0)?;
    record_signal(id, &name)?;
    unsafe { variant::write_int(ret, 0) };
    Ok(())
}

// ============================================================================
// RefCounted
// ============================================================================

/// Applies `update` to the count and runs the matching host hook.
unsafe fn adjust_count(object: ObjectPtr, ret: *mut c_void, update: fn(&mut i64) -> bool, increment: bool) -> CallResult {
    let id = require(object)?;
    let (result, hooks) = with_state(|state| {
        let result = state
            .object_mut(id)
            .and_then(|object| object.refcount.as_mut())
            .is_some_and(update);
        (result, state.hooks(id))
    });
    if let Some(Hooks { info, instance }) = hooks {
        let hook = if increment { info.reference_func } else { info.unreference_func };
        if let Some(hook) = hook {
            unsafe { hook(instance) };
        }
    }
    unsafe { write(ret, u8::from(result)) };
    Ok(())
}

unsafe fn init_ref(object: ObjectPtr, _args: &[*const c_void], ret: *mut c_void) -> CallResult {
    unsafe {
        adjust_count(
            object,
            ret,
            |count| {
                *count += 1;
                true
            },
            true,
        )
    }
}

unsafe fn reference(object: ObjectPtr, args: &[*const c_void], ret: *mut c_void) -> CallResult {
    unsafe { init_ref(object, args, ret) }
}

unsafe fn unreference(object: ObjectPtr, _args: &[*const c_void], ret: *mut c_void) -> CallResult {
    unsafe {
        adjust_count(
            object,
            ret,
            |count| {
                if *count <= 0 {
                    return false;
                }
                *count -= 1;
                *count == 0
            },
            false,
        )
    }
}

unsafe fn get_reference_count(object: ObjectPtr, _args: &[*const c_void], ret: *mut c_void) -> CallResult {
    let id = require(object)?;
    let count = with_state(|state| state.object(id).and_then(|object| object.refcount)).unwrap_or(0);
    unsafe { write(ret, count) };
    Ok(())
}

/// The copy starts with one reference, which the caller owns.
unsafe fn duplicate(object: ObjectPtr, _args: &[*const c_void], ret: *mut c_void) -> CallResult {
    let id = require(object)?;
    let copy = with_state(|state| {
        let (class, radius) = state.object(id).map(|source| (source.class, source.radius))?;
        let copy = state.create(class);
        let copy_id = object_id(copy)?;
        if let Some(object) = state.object_mut(copy_id) {
            object.radius = radius;
            object.refcount = Some(1);
        }
        Some(copy)
    });
    unsafe { write(ret, copy.unwrap_or(std::ptr::null_mut())) };
    Ok(())
}

// ============================================================================
// Node, Node3D, SphereShape3D, EditorNode3DGizmo, RenderingServer
// ============================================================================

unsafe fn add_child(object: ObjectPtr, args: &[*const c_void], _ret: *mut c_void) -> CallResult {
    let parent = require(object)?;
    let child = require(unsafe { arg::<ObjectPtr>(args, 0) })?;
    with_state(|state| {
        let valid = child != parent
            && state.is_instance_of(child, "Node")
            && state.object(child).is_some_and(|child| child.parent.is_none());
        if !valid {
            return Err(call_error(CallErrorType::InvalidArgument, 0, VariantType::Object, VariantType::Object));
        }
        if let Some(object) = state.object_mut(child) {
            object.parent = Some(parent);
        }
        if let Some(object) = state.object_mut(parent) {
            object.children.push(child);
        }
        Ok(())
    })
}

unsafe fn get_child(object: ObjectPtr, args: &[*const c_void], ret: *mut c_void) -> CallResult {
    let id = require(object)?;
    let index = unsafe { arg::<Int>(args, 0) };
    let child = with_state(|state| {
        let children = &state.object(id)?.children;
        let len = Int::try_from(children.len()).ok()?;
        let index = if index < 0 { index + len } else { index };
        children.get(usize::try_from(index).ok()?).copied()
    });
    unsafe { write(ret, child.map_or(std::ptr::null_mut(), object_ptr)) };
    Ok(())
}

unsafe fn get_child_count(object: ObjectPtr, _args: &[*const c_void], ret: *mut c_void) -> CallResult {
    let id = require(object)?;
    let count = with_state(|state| state.object(id).map_or(0, |object| object.children.len()));
    unsafe { write(ret, Int::try_from(count).unwrap_or(Int::MAX)) };
    Ok(())
}

unsafe fn get_parent(object: ObjectPtr, _args: &[*const c_void], ret: *mut c_void) -> CallResult {
    let id = require(object)?;
    let parent = with_state(|state| state.object(id).and_then(|object| object.parent));
    unsafe { write(ret, parent.map_or(std::ptr::null_mut(), object_ptr)) };
    Ok(())
}

unsafe fn set_position(object: ObjectPtr, args: &[*const c_void], _ret: *mut c_void) -> CallResult {
    let id = require(object)?;
    let position: [f32; 3] = unsafe { arg(args, 0) };
    with_state(|state| state.object_mut(id).map(|object| object.position = position));
    Ok(())
}

unsafe fn get_position(object: ObjectPtr, _args: &[*const c_void], ret: *mut c_void) -> CallResult {
    let id = require(object)?;
    let position = with_state(|state| state.object(id).map(|object| object.position)).unwrap_or_default();
    unsafe { write(ret, position) };
    Ok(())
}

unsafe fn set_radius(object: ObjectPtr, args: &[*const c_void], _ret: *mut c_void) -> CallResult {
    let id = require(object)?;
    let radius: f64 = unsafe { arg(args, 0) };
    with_state(|state| state.object_mut(id).map(|object| object.radius = radius));
    Ok(())
}

unsafe fn get_radius(object: ObjectPtr, _args: &[*const c_void], ret: *mut c_void) -> CallResult {
    let id = require(object)?;
    let radius = with_state(|state| state.object(id).map(|object| object.radius)).unwrap_or_default();
    unsafe { write(ret, radius) };
    Ok(())
}

unsafe fn add_lines(object: ObjectPtr, args: &[*const c_void], _ret: *mut c_void) -> CallResult {
    let id = require(object)?;
    let buffer = unsafe { heap::read_word(args[0], 0) };
    let points = unsafe { heap::get_ref::<Packed>(buffer) }
        .map(|packed| {
            packed
                .reals(3)
                .into_iter()
                .map(|point| [point[0], point[1], point[2]])
                .collect()
        })
        .unwrap_or_default();
    let batch = LineBatch {
        buffer,
        points,
        billboard: unsafe { arg::<Bool>(args, 2) } != 0,
        modulate: unsafe { arg(args, 3) },
    };
    with_state(|state| state.object_mut(id).map(|object| object.lines.push(batch)));
    Ok(())
}

unsafe fn clear_lines(object: ObjectPtr, _args: &[*const c_void], _ret: *mut c_void) -> CallResult {
    let id = require(object)?;
    with_state(|state| state.object_mut(id).map(|object| object.lines.clear()));
    Ok(())
}

unsafe fn get_frame_count(object: ObjectPtr, _args: &[*const c_void], ret: *mut c_void) -> CallResult {
    require(object)?;
    unsafe { write(ret, FRAMES.load(Ordering::Acquire)) };
    Ok(())
}

// ============================================================================
// Object lifecycle and identity
// ============================================================================

pub(crate) fn construct(class: &str) -> ObjectPtr {
    if let Some(native) = native_class(class) {
        if !native.instantiable {
            diagnostics::report(format!("class `{class}` cannot be instantiated"));
            return std::ptr::null_mut();
        }
        return with_state(|state| state.create(native));
    }
    let create = with_state(|state| {
        state
            .extension(class)
            .filter(|extension| extension.info.is_abstract == FALSE)
            .and_then(|extension| Some((extension.info.create_instance_func?, extension.info.class_userdata)))
    });
    match create {
        Some((create, userdata)) => unsafe { create(userdata) },
        None => {
            diagnostics::report(format!("class `{class}` is unknown or abstract"));
            std::ptr::null_mut()
        }
    }
}

pub(crate) fn destroy(object: ObjectPtr) {
    let Some(id) = live_id(object) else {
        invalid_call("object_destroy");
        return;
    };
    let (removed, frees) = with_state(|state| {
        let removed = state.remove_tree(id);
        let frees: Vec<_> = removed
            .iter()
            .filter_map(|(_, object)| {
                let binding = object.binding?;
                let info = state.extension(binding.class)?.info;
                Some((info.free_instance_func?, info.class_userdata, binding.instance))
            })
            .collect();
        (removed, frees)
    });
    for (free, userdata, instance) in frees {
        unsafe { free(userdata, instance) };
    }
    tracing::trace!(target: "gdbridge_mock", id, count = removed.len(), "objects destroyed");
    drop(removed);
}

pub(crate) unsafe extern "C" fn classdb_construct_object(class_name: ConstStringNamePtr) -> ObjectPtr {
    construct(&unsafe { heap::text(class_name) })
}

pub(crate) unsafe extern "C" fn object_destroy(object: ObjectPtr) {
    destroy(object)
}

pub(crate) unsafe extern "C" fn classdb_get_method_bind(
    class_name: ConstStringNamePtr,
    method_name: ConstStringNamePtr,
    hash: Int,
) -> MethodBindPtr {
    let (class, method) = unsafe { (heap::text(class_name), heap::text(method_name)) };
    match with_state(|state| state.method_bind(&class, &method, hash)) {
        Some(bind) => std::ptr::with_exposed_provenance(bind),
        None => std::ptr::null(),
    }
}

pub(crate) unsafe extern "C" fn classdb_get_class_tag(class_name: ConstStringNamePtr) -> ClassTagPtr {
    let class = unsafe { heap::text(class_name) };
    with_state(|state| state.tag(&class)).map_or(std::ptr::null_mut(), without_provenance_mut)
}

pub(crate) unsafe extern "C" fn object_cast_to(object: ConstObjectPtr, class_tag: ClassTagPtr) -> ObjectPtr {
    let Some(id) = live_id(object) else {
        return std::ptr::null_mut();
    };
    let matches = with_state(|state| {
        let index = class_tag.addr().checked_sub(1)?;
        let class = state.tags.get(index)?.clone();
        Some(state.is_instance_of(id, &class))
    });
    if matches == Some(true) { object.cast_mut() } else { std::ptr::null_mut() }
}

pub(crate) unsafe extern "C" fn object_get_instance_id(object: ConstObjectPtr) -> u64 {
    live_id(object).unwrap_or(0)
}

pub(crate) unsafe extern "C" fn object_get_instance_from_id(instance_id: u64) -> ObjectPtr {
    if with_state(|state| state.objects.contains_key(&instance_id)) {
        object_ptr(instance_id)
    } else {
        std::ptr::null_mut()
    }
}

pub(crate) unsafe extern "C" fn global_get_singleton(name: ConstStringNamePtr) -> ObjectPtr {
    let name = unsafe { heap::text(name) };
    with_state(|state| state.singleton(&name)).map_or(std::ptr::null_mut(), object_ptr)
}

pub(crate) unsafe extern "C" fn object_set_instance(
    object: ObjectPtr,
    class_name: ConstStringNamePtr,
    instance: ClassInstancePtr,
) {
    let class = unsafe { heap::text(class_name) };
    let bound = live_id(object).is_some_and(|id| {
        with_state(|state| {
            let Some(class) = state.extension(&class).map(|extension| extension.name) else {
                return false;
            };
            state
                .object_mut(id)
                .map(|object| object.binding = Some(Binding { class, instance }))
                .is_some()
        })
    });
    if !bound {
        diagnostics::report(format!("object_set_instance for `{class}` on an invalid object or class"));
    }
}

/// The class name `library` knows `object` by: its extension class when that
/// class belongs to `library`, its native class otherwise.
pub(crate) unsafe extern "C" fn object_get_class_name(
    object: ConstObjectPtr,
    library: ClassLibraryPtr,
    class_name: UninitStringNamePtr,
) -> Bool {
    let Some(id) = live_id(object) else {
        return FALSE;
    };
    let name = with_state(|state| {
        let object = state.object(id)?;
        let own = object.binding.and_then(|binding| {
            state
                .extension(binding.class)
                .filter(|class| class.library == library.addr())
                .map(|class| class.name)
        });
        Some(own.unwrap_or(object.class.name).to_string())
    });
    match name {
        Some(name) => {
            unsafe { heap::write_text(class_name, name) };
            TRUE
        }
        None => FALSE,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn object_pointers_round_trip_to_ids() {
        assert_eq!(object_id(object_ptr(7)), Some(7));
        assert_eq!(object_id(std::ptr::null()), None);
        assert_eq!(object_id(without_provenance_mut(OBJECT_BASE + 3)), None);
    }

    #[test]
    fn freed_objects_stay_freed() {
        let object = construct("Node");
        assert!(is_live(object));
        let invalid = INVALID_CALLS.load(Ordering::Acquire);
        destroy(object);
        assert!(!is_live(object));
        destroy(object);
        assert!(INVALID_CALLS.load(Ordering::Acquire) > invalid);
    }

    #[test]
    fn destroying_a_node_frees_its_children() {
        let parent = construct("Node");
        let child = construct("Node3D");
        let (internal, index): (Bool, Int) = (FALSE, -1);
        let args = [
            (&raw const child).cast::<c_void>(),
            (&raw const internal).cast(),
            (&raw const index).cast(),
        ];
        assert!(unsafe { add_child(parent, &args, std::ptr::null_mut()) }.is_ok());
        destroy(parent);
        assert!(!is_live(child));
    }

    #[test]
    fn class_chain_runs_up_to_object() {
        let shape = construct("SphereShape3D");
        let id = object_id(shape).unwrap();
        assert!(with_state(|state| state.is_instance_of(id, "RefCounted")));
        assert!(!with_state(|state| state.is_instance_of(id, "Node")));
        assert_eq!(with_state(|state| state.object(id).and_then(|object| object.refcount)), Some(0));
        destroy(shape);
    }

    #[test]
    fn abstract_native_classes_do_not_construct() {
        assert!(construct("Shape3D").is_null());
        assert!(construct("NoSuchClass").is_null());
    }
}
