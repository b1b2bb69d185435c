//! Engine → host calls.
//!
//! The engine calls into host classes through three kinds of entry points,
//! all `extern "C"` functions generated by `#[host_methods]`:
//!
//! | Entry | Arguments | Helper |
//! |---|---|---|
//! | virtual override | typed ABI slots | [`ptr_trampoline_mut`] / [`ptr_trampoline_ref`] |
//! | method, pointer-call | typed ABI slots | same |
//! | method, variant-call | variants + out-error | [`varcall_trampoline_mut`] / [`varcall_trampoline_ref`] |
//!
//! Every helper resolves the instance pointer through the live-instance set
//! first, so a call into an instance the engine already freed is a logged
//! no-op. Panics are caught and never unwind into the engine.
//!
//! ## Virtual tables
//!
//! Each registered class owns a [`VirtualTable`] keyed by the xxh64 of the
//! virtual's name. A miss walks to the parent host class's table; a miss at
//! the top returns null and the engine runs its own implementation.
//!
//! ## Projection
//!
//! A host class extending another host class embeds it. Trampolines are
//! generic over the class that *declared* the method and reach it through
//! [`HostClass::project_mut`](crate::registration::HostClass::project_mut),
//! so an inherited override runs on the embedded parent.

use std::any::{Any, TypeId};
use std::cell::{Ref, RefCell, RefMut};
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::ptr::NonNull;
use std::sync::{Arc, Mutex, PoisonError};

use gdbridge_sys::{
    CallErrorRaw, ClassCallVirtual, ClassInstancePtr, ConstTypePtr, ConstVariantPtr, Int, TypePtr,
};
use rustc_hash::FxHashMap;
use xxhash_rust::xxh64::xxh64;

use crate::error::{CallError, ConversionError, RegistrationError};
use crate::marshal::{AbiType, FromAbiParam, IntoAbiReturn};
use crate::object::{InstanceId, RawObject};
use crate::registration::HostClass;
use crate::variant::{FromVariant, Variant};

// ============================================================================
// Virtual tables
// ============================================================================

const VIRTUAL_SEED: u64 = 0x5649_5254_5541_4c53;

/// Lookup key of a virtual method name.
pub fn virtual_key(name: &str) -> u64 {
    xxh64(name.as_bytes(), VIRTUAL_SEED)
}

#[derive(Debug, Clone, Copy)]
struct VirtualEntry {
    name: &'static str,
    function: ClassCallVirtual,
}

/// Name → trampoline for one host class.
#[derive(Debug)]
pub struct VirtualTable {
    class: &'static str,
    entries: FxHashMap<u64, VirtualEntry>,
    parent: Option<Arc<VirtualTable>>,
}

impl VirtualTable {
    pub fn new(class: &'static str, parent: Option<Arc<VirtualTable>>) -> Self {
        Self {
            class,
            entries: FxHashMap::default(),
            parent,
        }
    }

    pub fn class(&self) -> &'static str {
        self.class
    }

    pub fn insert(&mut self, name: &'static str, function: ClassCallVirtual) -> Result<(), RegistrationError> {
        let key = virtual_key(name);
        if self.entries.contains_key(&key) {
            return Err(RegistrationError::DuplicateVirtual {
                class: self.class.to_string(),
                name: name.to_string(),
            });
        }
        self.entries.insert(key, VirtualEntry { name, function });
        Ok(())
    }

    /// The deepest override of `name`, or `None` if no host class in the
    /// chain overrides it.
    pub fn lookup(&self, name: &str) -> Option<ClassCallVirtual> {
        self.lookup_key(virtual_key(name))
    }

    pub fn lookup_key(&self, key: u64) -> Option<ClassCallVirtual> {
        let mut table = Some(self);
        while let Some(current) = table {
            if let Some(entry) = current.entries.get(&key) {
                tracing::trace!(target: "gdbridge::shim", class = current.class, name = entry.name, "virtual resolved");
                return Some(entry.function);
            }
            table = current.parent.as_deref();
        }
        None
    }

    /// Number of overrides declared by this class alone.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

// ============================================================================
// Instance storage
// ============================================================================

/// Host-side state of one engine object of a host class.
///
/// The engine holds a pointer to this as its "instance" and passes it back on
/// every call.
pub struct InstanceStorage<T> {
    object: RawObject,
    id: InstanceId,
    cell: RefCell<T>,
}

impl<T: 'static> InstanceStorage<T> {
    pub(crate) fn new(object: RawObject, value: T) -> Self {
        Self {
            object,
            id: object.instance_id(),
            cell: RefCell::new(value),
        }
    }

    pub fn object(&self) -> RawObject {
        self.object
    }

    pub fn instance_id(&self) -> InstanceId {
        self.id
    }

    /// Shared access; `None` (and an error event) while a mutable borrow is
    /// active further up the stack.
    pub fn bind(&self) -> Option<Ref<'_, T>> {
        match self.cell.try_borrow() {
            Ok(value) => Some(value),
            Err(_) => {
                tracing::error!(target: "gdbridge::shim", id = self.id.to_u64(), "instance is mutably borrowed by an outer call");
                None
            }
        }
    }

    /// Exclusive access; `None` (and an error event) on re-entry.
    pub fn bind_mut(&self) -> Option<RefMut<'_, T>> {
        match self.cell.try_borrow_mut() {
            Ok(value) => Some(value),
            Err(_) => {
                tracing::error!(target: "gdbridge::shim", id = self.id.to_u64(), "re-entrant mutable borrow of an instance refused");
                None
            }
        }
    }
}

/// Type-erased view of an [`InstanceStorage`], so trampolines declared on a
/// parent class can reach an instance of a derived one.
pub(crate) trait ErasedInstance {
    fn is_borrowed(&self) -> bool;
    fn with_ref(&self, target: TypeId, f: &mut dyn FnMut(&dyn Any)) -> bool;
    fn with_mut(&self, target: TypeId, f: &mut dyn FnMut(&mut dyn Any)) -> bool;
}

impl<T: HostClass> ErasedInstance for InstanceStorage<T> {
    fn is_borrowed(&self) -> bool {
        self.cell.try_borrow_mut().is_err()
    }

    fn with_ref(&self, target: TypeId, f: &mut dyn FnMut(&dyn Any)) -> bool {
        let Some(value) = self.bind() else {
            return false;
        };
        match value.project(target) {
            Some(part) => {
                f(part);
                true
            }
            None => false,
        }
    }

    fn with_mut(&self, target: TypeId, f: &mut dyn FnMut(&mut dyn Any)) -> bool {
        let Some(mut value) = self.bind_mut() else {
            return false;
        };
        match value.project_mut(target) {
            Some(part) => {
                f(part);
                true
            }
            None => false,
        }
    }
}

// ============================================================================
// Live-instance set
// ============================================================================

#[derive(Clone, Copy)]
struct LiveEntry {
    class: &'static str,
    object: RawObject,
    storage: NonNull<dyn ErasedInstance>,
}

// Dereferenced only on the engine thread; the set itself just stores addresses.
unsafe impl Send for LiveEntry {}

/// Live instances keyed by instance pointer, plus the engine object each one
/// is bound to.
#[derive(Default)]
struct LiveSet {
    instances: FxHashMap<usize, LiveEntry>,
    by_object: FxHashMap<usize, usize>,
}

impl LiveSet {
    fn insert(&mut self, instance: usize, entry: LiveEntry) {
        self.by_object.insert(entry.object.as_ptr() as usize, instance);
        self.instances.insert(instance, entry);
    }

    fn remove(&mut self, instance: usize) -> Option<LiveEntry> {
        let entry = self.instances.remove(&instance)?;
        let key = entry.object.as_ptr() as usize;
        if self.by_object.get(&key) == Some(&instance) {
            self.by_object.remove(&key);
        }
        Some(entry)
    }

    fn of_object(&self, object: RawObject) -> Option<LiveEntry> {
        let instance = self.by_object.get(&(object.as_ptr() as usize))?;
        self.instances.get(instance).copied()
    }
}

static LIVE: Mutex<Option<LiveSet>> = Mutex::new(None);

fn with_live<R>(f: impl FnOnce(&mut LiveSet) -> R) -> R {
    let mut live = LIVE.lock().unwrap_or_else(PoisonError::into_inner);
    f(live.get_or_insert_with(LiveSet::default))
}

/// Boxes `value` and records it as live. The returned pointer is what the
/// engine stores as the instance.
pub(crate) fn register_instance<T: HostClass>(object: RawObject, value: T) -> ClassInstancePtr {
    let storage: Box<InstanceStorage<T>> = Box::new(InstanceStorage::new(object, value));
    let ptr = Box::into_raw(storage);
    let erased: NonNull<dyn ErasedInstance> = unsafe { NonNull::new_unchecked(ptr) };
    with_live(|live| {
        live.insert(
            ptr as usize,
            LiveEntry {
                class: T::CLASS_NAME,
                object,
                storage: erased,
            },
        )
    });
    tracing::debug!(target: "gdbridge::shim", class = T::CLASS_NAME, "instance created");
    ptr.cast()
}

/// Removes the instance from the live set, then drops its storage.
///
/// # Safety
///
/// `instance` must have come from [`register_instance::<T>`].
pub(crate) unsafe fn free_instance<T: HostClass>(instance: ClassInstancePtr) {
    let Some(entry) = with_live(|live| live.remove(instance as usize)) else {
        tracing::warn!(target: "gdbridge::shim", class = T::CLASS_NAME, "free of an unknown instance ignored");
        return;
    };
    let erased = unsafe { entry.storage.as_ref() };
    if erased.is_borrowed() {
        tracing::error!(target: "gdbridge::shim", class = entry.class, "instance freed during one of its own calls; storage leaked");
        return;
    }
    drop(unsafe { Box::from_raw(instance.cast::<InstanceStorage<T>>()) });
    tracing::debug!(target: "gdbridge::shim", class = T::CLASS_NAME, "instance freed");
}

fn live_instance(instance: ClassInstancePtr) -> Option<LiveEntry> {
    with_live(|live| live.instances.get(&(instance as usize)).copied())
}

pub fn is_live(instance: ClassInstancePtr) -> bool {
    live_instance(instance).is_some()
}

pub fn live_count() -> usize {
    with_live(|live| live.instances.len())
}

/// Forgets every live instance; their storage is left to the engine's
/// `free_instance` calls, which become no-ops.
pub(crate) fn clear_live_instances() {
    let dropped = with_live(std::mem::take);
    if !dropped.instances.is_empty() {
        tracing::warn!(target: "gdbridge::shim", count = dropped.instances.len(), "instances still live at teardown");
    }
}

/// Runs `f` on the live instance of `D` (or of a class embedding `D`) behind
/// `object`. Host code uses this to reach its own state through an engine
/// handle.
pub fn with_instance_of<D: HostClass, R>(object: RawObject, f: impl FnOnce(&mut D) -> R) -> Option<R> {
    let storage = with_live(|live| live.of_object(object))?;
    project_mut::<D, R>(storage, f)
}

fn project_mut<D: 'static, R>(entry: LiveEntry, f: impl FnOnce(&mut D) -> R) -> Option<R> {
    let mut f = Some(f);
    let mut out = None;
    let erased = unsafe { entry.storage.as_ref() };
    let reached = erased.with_mut(TypeId::of::<D>(), &mut |part| {
        if let (Some(f), Some(this)) = (f.take(), part.downcast_mut::<D>()) {
            out = Some(f(this));
        }
    });
    if !reached {
        tracing::error!(target: "gdbridge::shim", class = entry.class, "instance could not be borrowed as the declaring class");
    }
    out
}

fn project_ref<D: 'static, R>(entry: LiveEntry, f: impl FnOnce(&D) -> R) -> Option<R> {
    let mut f = Some(f);
    let mut out = None;
    let erased = unsafe { entry.storage.as_ref() };
    let reached = erased.with_ref(TypeId::of::<D>(), &mut |part| {
        if let (Some(f), Some(this)) = (f.take(), part.downcast_ref::<D>()) {
            out = Some(f(this));
        }
    });
    if !reached {
        tracing::error!(target: "gdbridge::shim", class = entry.class, "instance could not be borrowed as the declaring class");
    }
    out
}

// ============================================================================
// Trampoline bodies
// ============================================================================

fn guarded<R>(method: &'static str, body: impl FnOnce() -> Option<R>) -> Option<R> {
    if !crate::init::catches_panics() {
        return body();
    }
    match catch_unwind(AssertUnwindSafe(body)) {
        Ok(result) => result,
        Err(payload) => {
            let message = payload
                .downcast_ref::<&str>()
                .map(|s| s.to_string())
                .or_else(|| payload.downcast_ref::<String>().cloned())
                .unwrap_or_else(|| "non-string panic payload".to_string());
            tracing::error!(target: "gdbridge::shim", method, %message, "host code panicked");
            crate::diagnostics::engine_error(&format!("{method}: host code panicked: {message}"));
            None
        }
    }
}

/// Writes `value` into the return slot, or zeroes the slot when there is no
/// value. Zero bytes are nil/empty/null for every ABI type.
unsafe fn write_return<R: IntoAbiReturn>(method: &'static str, ret: TypePtr, value: Option<R>) {
    if ret.is_null() {
        return;
    }
    let slot = ret.cast::<<R as AbiType>::Abi>();
    let written = match value {
        Some(value) => match unsafe { value.into_abi_return(slot) } {
            Ok(()) => true,
            Err(err) => {
                tracing::error!(target: "gdbridge::shim", method, %err, "return value could not be encoded");
                false
            }
        },
        None => false,
    };
    if !written {
        unsafe { std::ptr::write_bytes(ret.cast::<u8>(), 0, std::mem::size_of::<<R as AbiType>::Abi>()) };
    }
}

/// Pointer-call trampoline body for a method taking `&mut self`.
///
/// # Safety
///
/// `ret` must be null or point at a slot for `R`'s ABI representation.
pub unsafe fn ptr_trampoline_mut<D: 'static, R: IntoAbiReturn>(
    method: &'static str,
    instance: ClassInstancePtr,
    ret: TypePtr,
    body: impl FnOnce(&mut D) -> R,
) {
    #[cfg(feature = "profiling")]
    profiling::scope!("shim::ptr_trampoline");

    let Some(entry) = live_instance(instance) else {
        tracing::warn!(target: "gdbridge::shim", method, "call into a freed instance ignored");
        unsafe { write_return::<R>(method, ret, None) };
        return;
    };
    let value = guarded(method, || project_mut::<D, R>(entry, body));
    unsafe { write_return(method, ret, value) };
}

/// Pointer-call trampoline body for a method taking `&self`.
///
/// # Safety
///
/// As [`ptr_trampoline_mut`].
pub unsafe fn ptr_trampoline_ref<D: 'static, R: IntoAbiReturn>(
    method: &'static str,
    instance: ClassInstancePtr,
    ret: TypePtr,
    body: impl FnOnce(&D) -> R,
) {
    #[cfg(feature = "profiling")]
    profiling::scope!("shim::ptr_trampoline");

    let Some(entry) = live_instance(instance) else {
        tracing::warn!(target: "gdbridge::shim", method, "call into a freed instance ignored");
        unsafe { write_return::<R>(method, ret, None) };
        return;
    };
    let value = guarded(method, || project_ref::<D, R>(entry, body));
    unsafe { write_return(method, ret, value) };
}

/// Runs a class callback on the live instance, `None` if it is gone, busy or
/// panicked. Used by the lifecycle hooks, which have no return slot.
pub(crate) fn hook_mut<D: 'static, R>(
    hook: &'static str,
    instance: ClassInstancePtr,
    body: impl FnOnce(&mut D) -> R,
) -> Option<R> {
    let Some(entry) = live_instance(instance) else {
        tracing::warn!(target: "gdbridge::shim", hook, "hook on a freed instance ignored");
        return None;
    };
    guarded(hook, || project_mut::<D, R>(entry, body))
}

pub(crate) fn hook_ref<D: 'static, R>(
    hook: &'static str,
    instance: ClassInstancePtr,
    body: impl FnOnce(&D) -> R,
) -> Option<R> {
    let Some(entry) = live_instance(instance) else {
        tracing::warn!(target: "gdbridge::shim", hook, "hook on a freed instance ignored");
        return None;
    };
    guarded(hook, || project_ref::<D, R>(entry, body))
}

fn varcall_arguments(
    method: &'static str,
    instance: ClassInstancePtr,
    args: *const ConstVariantPtr,
    count: Int,
    arity: usize,
) -> Result<(LiveEntry, Vec<Variant>), CallError> {
    let Some(entry) = live_instance(instance) else {
        tracing::warn!(target: "gdbridge::shim", method, "variant-call into a freed instance refused");
        return Err(CallError::InstanceIsNull);
    };
    let count = usize::try_from(count).unwrap_or(0);
    if count > arity {
        return Err(CallError::TooManyArguments { expected: arity });
    }
    if count < arity {
        return Err(CallError::TooFewArguments { expected: arity });
    }
    let args = (0..count)
        .map(|i| unsafe { Variant::from_borrowed((*args.add(i)).cast()) })
        .collect();
    Ok((entry, args))
}

unsafe fn finish_varcall(
    method: &'static str,
    ret: TypePtr,
    error: *mut CallErrorRaw,
    result: Result<Variant, CallError>,
) {
    let (value, raw) = match result {
        Ok(value) => (value, CallErrorRaw::OK),
        Err(err) => {
            tracing::debug!(target: "gdbridge::shim", method, %err, "variant-call into host failed");
            (Variant::nil(), err.to_raw())
        }
    };
    if !error.is_null() {
        unsafe { error.write(raw) };
    }
    unsafe { write_return(method, ret, Some(value)) };
}

/// Variant-call trampoline body for a method taking `&mut self`: checks
/// arity, copies the arguments, runs `body` and reports failures through
/// `error`. `ret` always receives a variant, nil on failure.
///
/// # Safety
///
/// `args` must hold `count` variant pointers; `ret` must be null or a
/// writable variant slot; `error` must be null or writable.
#[allow(clippy::too_many_arguments)]
pub unsafe fn varcall_trampoline_mut<D: 'static>(
    method: &'static str,
    instance: ClassInstancePtr,
    args: *const ConstVariantPtr,
    count: Int,
    ret: TypePtr,
    error: *mut CallErrorRaw,
    arity: usize,
    body: impl FnOnce(&mut D, &[Variant]) -> Result<Variant, CallError>,
) {
    let result = varcall_arguments(method, instance, args, count, arity).and_then(|(entry, args)| {
        guarded(method, || project_mut::<D, _>(entry, |this| body(this, &args)))
            .unwrap_or(Err(CallError::InvalidMethod))
    });
    unsafe { finish_varcall(method, ret, error, result) };
}

/// As [`varcall_trampoline_mut`], for `&self` methods.
///
/// # Safety
///
/// As [`varcall_trampoline_mut`].
#[allow(clippy::too_many_arguments)]
pub unsafe fn varcall_trampoline_ref<D: 'static>(
    method: &'static str,
    instance: ClassInstancePtr,
    args: *const ConstVariantPtr,
    count: Int,
    ret: TypePtr,
    error: *mut CallErrorRaw,
    arity: usize,
    body: impl FnOnce(&D, &[Variant]) -> Result<Variant, CallError>,
) {
    let result = varcall_arguments(method, instance, args, count, arity).and_then(|(entry, args)| {
        guarded(method, || project_ref::<D, _>(entry, |this| body(this, &args)))
            .unwrap_or(Err(CallError::InvalidMethod))
    });
    unsafe { finish_varcall(method, ret, error, result) };
}

/// Decodes argument `index` of a variant-call, mapping a conversion failure
/// to the engine's invalid-argument error.
pub fn decode_arg<T: FromVariant>(args: &[Variant], index: usize) -> Result<T, CallError> {
    let arg = &args[index];
    T::try_from_variant(arg).map_err(|err| {
        let actual = arg.get_type();
        let expected = match err {
            ConversionError::WrongType { expected, .. } | ConversionError::NilToNonNullable { expected } => {
                expected
            }
            _ => actual,
        };
        CallError::InvalidArgument {
            index,
            expected,
            actual,
        }
    })
}

/// Decodes argument `index` of a pointer-call.
///
/// # Safety
///
/// `args` must hold at least `index + 1` pointers, the one at `index`
/// pointing at a `T::Abi`.
pub unsafe fn ptr_arg<T: FromAbiParam>(args: *const ConstTypePtr, index: usize) -> T {
    unsafe { T::from_abi_param((*args.add(index)).cast()) }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::object::{Base, Object, Owned};
    use crate::test_support;

    unsafe extern "C" fn first(_: ClassInstancePtr, _: *const ConstTypePtr, ret: TypePtr) {
        unsafe { ret.cast::<i64>().write(1) };
    }

    unsafe extern "C" fn second(_: ClassInstancePtr, _: *const ConstTypePtr, ret: TypePtr) {
        unsafe { ret.cast::<i64>().write(2) };
    }

    fn call(function: ClassCallVirtual) -> i64 {
        let mut ret = 0i64;
        unsafe { function(std::ptr::null_mut(), std::ptr::null(), (&mut ret as *mut i64).cast()) };
        ret
    }

    #[test]
    fn virtual_key_is_deterministic() {
        assert_eq!(virtual_key("_ready"), virtual_key("_ready"));
        assert_ne!(virtual_key("_ready"), virtual_key("_process"));
    }

    #[test]
    fn deepest_override_wins() {
        let mut root = VirtualTable::new("Root", None);
        root.insert("_ready", first).unwrap();
        root.insert("_process", first).unwrap();
        let root = Arc::new(root);

        let mut middle = VirtualTable::new("Middle", Some(root.clone()));
        middle.insert("_ready", second).unwrap();
        let middle = Arc::new(middle);

        let leaf = VirtualTable::new("Leaf", Some(middle));
        assert_eq!(leaf.lookup("_ready").map(call), Some(2));
        assert_eq!(leaf.lookup("_process").map(call), Some(1));
        assert!(leaf.lookup("_input").is_none());
        assert!(leaf.is_empty());
        assert_eq!(root.len(), 2);
    }

    #[test]
    fn duplicate_virtual_is_rejected() {
        let mut table = VirtualTable::new("Gizmo", None);
        table.insert("_redraw", first).unwrap();
        assert_eq!(
            table.insert("_redraw", second),
            Err(RegistrationError::DuplicateVirtual {
                class: "Gizmo".into(),
                name: "_redraw".into(),
            })
        );
    }

    struct Counter {
        hits: i64,
        _base: Base<Object>,
    }

    impl HostClass for Counter {
        type Base = Object;
        const CLASS_NAME: &'static str = "Counter";

        fn init(base: Base<Object>) -> Self {
            Self { hits: 0, _base: base }
        }
    }

    fn counter_instance(object: &Owned<Object>) -> ClassInstancePtr {
        register_instance(object.raw(), Counter::init(Base::new(object.raw())))
    }

    #[test]
    fn trampoline_reaches_live_instance() {
        let _guard = test_support::lock();
        let object = Owned::<Object>::construct();
        let instance = counter_instance(&object);

        let mut ret = 0i64;
        for _ in 0..3 {
            unsafe {
                ptr_trampoline_mut::<Counter, i64>("hit", instance, (&mut ret as *mut i64).cast(), |this| {
                    this.hits += 1;
                    this.hits
                })
            };
        }
        assert_eq!(ret, 3);
        assert_eq!(with_instance_of::<Counter, _>(object.raw(), |this| this.hits), Some(3));

        unsafe { free_instance::<Counter>(instance) };
        assert!(!is_live(instance));
    }

    #[test]
    fn instance_lookup_by_object_tracks_frees() {
        let _guard = test_support::lock();
        let first = Owned::<Object>::construct();
        let second = Owned::<Object>::construct();
        let plain = Owned::<Object>::construct();
        let first_instance = counter_instance(&first);
        let second_instance = counter_instance(&second);

        with_instance_of::<Counter, _>(second.raw(), |this| this.hits = 7);
        assert_eq!(with_instance_of::<Counter, _>(first.raw(), |this| this.hits), Some(0));
        assert_eq!(with_instance_of::<Counter, _>(second.raw(), |this| this.hits), Some(7));
        assert_eq!(with_instance_of::<Counter, _>(plain.raw(), |this| this.hits), None);

        unsafe { free_instance::<Counter>(first_instance) };
        assert_eq!(with_instance_of::<Counter, _>(first.raw(), |this| this.hits), None);
        assert_eq!(with_instance_of::<Counter, _>(second.raw(), |this| this.hits), Some(7));
        unsafe { free_instance::<Counter>(second_instance) };
    }

    #[test]
    fn freed_instance_call_is_a_no_op() {
        let _guard = test_support::lock();
        let object = Owned::<Object>::construct();
        let instance = counter_instance(&object);
        unsafe { free_instance::<Counter>(instance) };

        let mut ret = 99i64;
        let mut ran = false;
        unsafe {
            ptr_trampoline_mut::<Counter, i64>("hit", instance, (&mut ret as *mut i64).cast(), |_| {
                ran = true;
                1
            })
        };
        assert!(!ran);
        assert_eq!(ret, 0);
    }

    #[test]
    fn panic_is_contained() {
        let _guard = test_support::lock();
        let object = Owned::<Object>::construct();
        let instance = counter_instance(&object);

        let mut ret = 5i64;
        unsafe {
            ptr_trampoline_mut::<Counter, i64>("boom", instance, (&mut ret as *mut i64).cast(), |_| {
                panic!("host failure")
            })
        };
        assert_eq!(ret, 0);
        assert!(is_live(instance));
        unsafe { free_instance::<Counter>(instance) };
    }

    #[test]
    fn reentrant_mutable_borrow_is_refused() {
        let _guard = test_support::lock();
        let object = Owned::<Object>::construct();
        let instance = counter_instance(&object);

        let mut inner_ran = false;
        unsafe {
            ptr_trampoline_mut::<Counter, ()>("outer", instance, std::ptr::null_mut(), |_| {
                ptr_trampoline_mut::<Counter, ()>("inner", instance, std::ptr::null_mut(), |_| {
                    inner_ran = true;
                })
            })
        };
        assert!(!inner_ran);
        unsafe { free_instance::<Counter>(instance) };
    }

    #[test]
    fn varcall_checks_arity_and_types() {
        let _guard = test_support::lock();
        let object = Owned::<Object>::construct();
        let instance = counter_instance(&object);

        let call = |args: &[&Variant]| {
            let slots: Vec<crate::handle::RawSlots> =
                args.iter().map(|arg| arg.payload().raw().unwrap()).collect();
            let ptrs: Vec<ConstVariantPtr> = slots.iter().map(|slot| slot.as_ptr().cast()).collect();
            let mut error = CallErrorRaw::OK;
            let ret = unsafe {
                Variant::construct(|dest| {
                    varcall_trampoline_mut::<Counter>(
                        "add",
                        instance,
                        ptrs.as_ptr(),
                        ptrs.len() as Int,
                        dest,
                        &mut error,
                        1,
                        |this, args| {
                            this.hits += decode_arg::<i64>(args, 0)?;
                            Ok(Variant::from(this.hits))
                        },
                    )
                })
            };
            (CallError::check(&error), ret)
        };

        let (status, ret) = call(&[&Variant::from(4i64)]);
        assert_eq!(status, Ok(()));
        assert_eq!(ret.to::<i64>(), Ok(4));

        let (status, ret) = call(&[&Variant::from(1i64), &Variant::from(2i64)]);
        assert_eq!(status, Err(CallError::TooManyArguments { expected: 1 }));
        assert!(ret.is_nil());

        let (status, _) = call(&[&Variant::from("four")]);
        assert_eq!(
            status,
            Err(CallError::InvalidArgument {
                index: 0,
                expected: crate::VariantType::Int,
                actual: crate::VariantType::String,
            })
        );

        unsafe { free_instance::<Counter>(instance) };
    }
}
