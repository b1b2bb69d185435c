//! Registry of heap-backed engine payloads.
//!
//! Strings, names, paths, containers, callables, signals, packed arrays and
//! variants own engine-side allocations. The host never holds their raw bytes
//! directly; it holds a [`PackedRef`] into a process-wide registry whose record
//! pins the allocation until [`end`] is called exactly once.
//!
//! ```text
//! wrap(kind, raw) ──> PackedRef{index, generation, kind}
//!                          │
//!        raw()/store() ────┤  (generation must match, entry must be live)
//!                          │
//! end() ──> live=false, generation+1, index back on the free list
//! ```
//!
//! [`Payload`] is the owning wrapper every builtin type is built on: dropping
//! it ends the handle and runs the engine destructor.

mod registry;

pub use registry::{HandleRegistry, KindStats, RegistryStats};

use std::ffi::c_void;
use std::sync::{Mutex, MutexGuard};

use gdbridge_sys::VariantType;

use crate::abi;
use crate::error::HandleError;
use crate::init::LeakReport;

/// Raw slot storage; kinds use the first 1, 2 or 3 words.
pub type RawSlots = [u64; 3];

static REGISTRY: Mutex<HandleRegistry> = Mutex::new(HandleRegistry::new());

fn registry() -> MutexGuard<'static, HandleRegistry> {
    // Nothing panics while holding this lock, so the slab is consistent even
    // if a poisoning panic happened elsewhere on the thread.
    REGISTRY.lock().unwrap_or_else(|poisoned| {
        tracing::warn!(target: "gdbridge::handle", "handle registry lock was poisoned");
        poisoned.into_inner()
    })
}

// ============================================================================
// Kinds and handles
// ============================================================================

/// What a registry record holds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PayloadKind {
    String,
    StringName,
    NodePath,
    Callable,
    Signal,
    Dictionary,
    Array,
    PackedByteArray,
    PackedInt32Array,
    PackedInt64Array,
    PackedFloat32Array,
    PackedFloat64Array,
    PackedStringArray,
    PackedVector2Array,
    PackedVector3Array,
    PackedColorArray,
    PackedVector4Array,
    Variant,
}

impl PayloadKind {
    pub const COUNT: usize = 18;

    pub const ALL: [PayloadKind; Self::COUNT] = [
        Self::String,
        Self::StringName,
        Self::NodePath,
        Self::Callable,
        Self::Signal,
        Self::Dictionary,
        Self::Array,
        Self::PackedByteArray,
        Self::PackedInt32Array,
        Self::PackedInt64Array,
        Self::PackedFloat32Array,
        Self::PackedFloat64Array,
        Self::PackedStringArray,
        Self::PackedVector2Array,
        Self::PackedVector3Array,
        Self::PackedColorArray,
        Self::PackedVector4Array,
        Self::Variant,
    ];

    pub(crate) fn index(self) -> usize {
        self as usize
    }

    /// Number of u64 words in the raw representation.
    pub const fn slot_count(self) -> usize {
        match self {
            Self::String | Self::StringName | Self::NodePath | Self::Dictionary | Self::Array => 1,
            Self::Variant => 3,
            _ => 2,
        }
    }

    /// The variant tag of values of this kind; `None` for [`PayloadKind::Variant`].
    pub fn variant_type(self) -> Option<VariantType> {
        Some(match self {
            Self::String => VariantType::String,
            Self::StringName => VariantType::StringName,
            Self::NodePath => VariantType::NodePath,
            Self::Callable => VariantType::Callable,
            Self::Signal => VariantType::Signal,
            Self::Dictionary => VariantType::Dictionary,
            Self::Array => VariantType::Array,
            Self::PackedByteArray => VariantType::PackedByteArray,
            Self::PackedInt32Array => VariantType::PackedInt32Array,
            Self::PackedInt64Array => VariantType::PackedInt64Array,
            Self::PackedFloat32Array => VariantType::PackedFloat32Array,
            Self::PackedFloat64Array => VariantType::PackedFloat64Array,
            Self::PackedStringArray => VariantType::PackedStringArray,
            Self::PackedVector2Array => VariantType::PackedVector2Array,
            Self::PackedVector3Array => VariantType::PackedVector3Array,
            Self::PackedColorArray => VariantType::PackedColorArray,
            Self::PackedVector4Array => VariantType::PackedVector4Array,
            Self::Variant => return None,
        })
    }

    pub fn from_variant_type(ty: VariantType) -> Option<Self> {
        Self::ALL
            .into_iter()
            .find(|kind| kind.variant_type() == Some(ty))
    }
}

/// Handle to a registry record.
///
/// Copyable; copying does not duplicate ownership. Only the [`Payload`] that
/// created a handle ends it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct PackedRef {
    index: u32,
    generation: u32,
    kind: PayloadKind,
}

impl PackedRef {
    pub(crate) fn new(index: u32, generation: u32, kind: PayloadKind) -> Self {
        Self {
            index,
            generation,
            kind,
        }
    }

    pub fn index(&self) -> u32 {
        self.index
    }

    pub fn generation(&self) -> u32 {
        self.generation
    }

    pub fn kind(&self) -> PayloadKind {
        self.kind
    }

    /// Serializes to a token that [`unpack`] turns back into this handle.
    pub fn pack(&self) -> u64 {
        (u64::from(self.generation) << 32) | u64::from(self.index)
    }

    pub(crate) fn stale(&self) -> HandleError {
        HandleError::Stale {
            kind: self.kind,
            index: self.index,
            generation: self.generation,
        }
    }
}

// ============================================================================
// Registry operations
// ============================================================================

pub fn wrap(kind: PayloadKind, raw: RawSlots) -> PackedRef {
    let handle = registry().wrap(kind, raw);
    tracing::trace!(target: "gdbridge::handle", ?kind, index = handle.index, "wrap");
    handle
}

pub fn raw(handle: PackedRef) -> Result<RawSlots, HandleError> {
    registry().raw(handle)
}

pub(crate) fn store(handle: PackedRef, raw: RawSlots) -> Result<(), HandleError> {
    registry().store(handle, raw)
}

/// Ends a handle. Returns the slots and `true` the first time; afterwards
/// returns zeroed slots and `false`, and logs a warning.
pub fn end(handle: PackedRef) -> (RawSlots, bool) {
    match registry().end(handle) {
        Ok(raw) => (raw, true),
        Err(err) => {
            tracing::warn!(target: "gdbridge::handle", %err, "end on a handle that is not live");
            ([0; 3], false)
        }
    }
}

pub fn is_live(handle: PackedRef) -> bool {
    registry().is_live(handle)
}

pub fn unpack(token: u64) -> Result<PackedRef, HandleError> {
    registry().unpack(token)
}

pub fn stats() -> RegistryStats {
    registry().stats()
}

/// Logs still-live records and returns how many there are.
pub fn report_leaks(report: LeakReport) -> usize {
    let (live, stats): (Vec<PackedRef>, RegistryStats) = {
        let registry = registry();
        (registry.live_handles().collect(), registry.stats())
    };

    match report {
        LeakReport::Off => {}
        LeakReport::Summary => {
            for kind in PayloadKind::ALL {
                let count = stats.kind(kind).live();
                if count > 0 {
                    tracing::warn!(target: "gdbridge::handle", ?kind, count, "handles probably leaked");
                }
            }
        }
        LeakReport::PerHandle => {
            for handle in &live {
                tracing::warn!(
                    target: "gdbridge::handle",
                    kind = ?handle.kind,
                    index = handle.index,
                    generation = handle.generation,
                    "handle probably leaked"
                );
            }
        }
    }
    live.len()
}

// ============================================================================
// Owning wrapper
// ============================================================================

/// Sole owner of one registry record and the engine allocation it pins.
#[derive(Debug)]
pub struct Payload {
    handle: PackedRef,
}

impl Payload {
    /// Takes ownership of an engine value already constructed into `raw`.
    pub(crate) fn adopt(kind: PayloadKind, raw: RawSlots) -> Self {
        Self {
            handle: wrap(kind, raw),
        }
    }

    /// Lets the engine construct a value into fresh slots, then adopts it.
    ///
    /// # Safety
    ///
    /// `construct` must fully initialize a value of `kind` at the pointer.
    pub(crate) unsafe fn construct(kind: PayloadKind, construct: impl FnOnce(*mut c_void)) -> Self {
        let mut raw: RawSlots = [0; 3];
        construct(raw.as_mut_ptr().cast());
        Self::adopt(kind, raw)
    }

    /// Default value of `kind`, through the engine's default constructor.
    pub(crate) fn new_default(kind: PayloadKind) -> Self {
        let interface = abi::interface();
        unsafe {
            Self::construct(kind, |dest| match kind.variant_type() {
                None => (interface.variant_new_nil)(dest),
                Some(ty) => match interface.builtin(ty).construct_default {
                    Some(ctor) => ctor(dest, std::ptr::null()),
                    None => panic!("engine has no default constructor for {ty}"),
                },
            })
        }
    }

    /// Copies a borrowed engine value through the engine's copy constructor.
    ///
    /// # Safety
    ///
    /// `src` must point at a live value of `kind`.
    pub(crate) unsafe fn copy_from(kind: PayloadKind, src: *const c_void) -> Self {
        let interface = abi::interface();
        unsafe {
            Self::construct(kind, |dest| match kind.variant_type() {
                None => (interface.variant_new_copy)(dest, src),
                Some(ty) => match interface.builtin(ty).construct_copy {
                    Some(ctor) => ctor(dest, [src].as_ptr()),
                    None => panic!("engine has no copy constructor for {ty}"),
                },
            })
        }
    }

    pub fn handle(&self) -> PackedRef {
        self.handle
    }

    pub fn kind(&self) -> PayloadKind {
        self.handle.kind
    }

    pub fn raw(&self) -> Result<RawSlots, HandleError> {
        raw(self.handle)
    }

    /// Runs `f` with a pointer to a working copy of the slots and writes the
    /// copy back, so engine mutations that move the allocation stick.
    ///
    /// The registry lock is not held while `f` runs; `f` may call back into
    /// the engine and create handles.
    pub(crate) fn with_ptr<R>(&self, f: impl FnOnce(*mut c_void) -> R) -> Result<R, HandleError> {
        let mut working = self.raw()?;
        let result = f(working.as_mut_ptr().cast());
        store(self.handle, working)?;
        Ok(result)
    }

    /// Releases the record without destroying the engine value; the caller
    /// now owns the bytes (e.g. they were written into an engine return slot).
    pub(crate) fn into_raw(self) -> Result<RawSlots, HandleError> {
        let handle = self.handle;
        std::mem::forget(self);
        registry().end(handle)
    }
}

impl Clone for Payload {
    fn clone(&self) -> Self {
        let raw = match self.raw() {
            Ok(raw) => raw,
            Err(err) => panic!("cannot clone a payload whose handle is dead: {err}"),
        };
        unsafe { Self::copy_from(self.kind(), raw.as_ptr().cast()) }
    }
}

impl Drop for Payload {
    fn drop(&mut self) {
        let (mut raw, ok) = end(self.handle);
        if !ok || abi::is_torn_down() {
            return;
        }
        let Some(interface) = abi::try_interface() else {
            return;
        };
        let ptr: *mut c_void = raw.as_mut_ptr().cast();
        unsafe {
            match self.handle.kind.variant_type() {
                None => (interface.variant_destroy)(ptr),
                Some(ty) => {
                    if let Some(dtor) = interface.builtin(ty).destroy {
                        dtor(ptr);
                    }
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support;

    #[test]
    fn slot_counts_match_abi_sizes() {
        for kind in PayloadKind::ALL {
            let bytes = match kind.variant_type() {
                Some(ty) => ty.ptrcall_size(),
                None => gdbridge_sys::VARIANT_SIZE,
            };
            assert_eq!(kind.slot_count() * 8, bytes, "{kind:?}");
        }
    }

    #[test]
    fn kinds_map_back_from_variant_types() {
        for kind in PayloadKind::ALL {
            if let Some(ty) = kind.variant_type() {
                assert_eq!(PayloadKind::from_variant_type(ty), Some(kind));
            }
        }
        assert_eq!(PayloadKind::from_variant_type(VariantType::Int), None);
    }

    #[test]
    fn payload_drop_ends_once_and_frees_engine_value() {
        let _guard = test_support::lock();
        let before = stats().kind(PayloadKind::Dictionary);
        let allocations = gdbridge_mock::stats().live_heap;

        let payload = Payload::new_default(PayloadKind::Dictionary);
        let handle = payload.handle();
        assert!(is_live(handle));
        assert_eq!(gdbridge_mock::stats().live_heap, allocations + 1);

        drop(payload);
        assert!(!is_live(handle));
        assert_eq!(gdbridge_mock::stats().live_heap, allocations);

        let after = stats().kind(PayloadKind::Dictionary);
        assert_eq!(after.created - before.created, 1);
        assert_eq!(after.ended - before.ended, 1);

        let (_, ok) = end(handle);
        assert!(!ok);
    }

    #[test]
    fn clone_is_an_independent_engine_copy() {
        let _guard = test_support::lock();
        let allocations = gdbridge_mock::stats().live_heap;
        let a = Payload::new_default(PayloadKind::Array);
        let b = a.clone();
        assert_ne!(a.handle(), b.handle());
        assert_ne!(a.raw().unwrap(), b.raw().unwrap());
        assert_eq!(gdbridge_mock::stats().live_heap, allocations + 2);
        drop(a);
        assert!(b.raw().is_ok());
    }

    #[test]
    fn into_raw_hands_over_without_destroying() {
        let _guard = test_support::lock();
        let allocations = gdbridge_mock::stats().live_heap;
        let payload = Payload::new_default(PayloadKind::String);
        let handle = payload.handle();
        let mut raw = payload.into_raw().unwrap();
        assert!(!is_live(handle));
        assert_eq!(gdbridge_mock::stats().live_heap, allocations + 1);

        unsafe {
            let dtor = abi::interface().builtin(VariantType::String).destroy.unwrap();
            dtor(raw.as_mut_ptr().cast());
        }
        assert_eq!(gdbridge_mock::stats().live_heap, allocations);
    }
}
