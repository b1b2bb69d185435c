//! The three ownership modes of an object pointer.
//!
//! ```text
//!              construct / owned return
//!                        │
//!                        ▼
//!   Bound<'a, T> ◄─── bind() ─── Owned<T> ─── transfer() ───► Transferred<T>
//!        │                          ▲                               │
//!        └──── to_owned() ──────────┘                               ▼
//!            (ref-counted only)                 pushed into a frame, handed over
//!                                               once the call reaches the engine
//! ```
//!
//! | Mode | Type | Releases on drop |
//! |---|---|---|
//! | transferred-to-host | [`Owned`] | yes, exactly once |
//! | transferred-to-engine | [`Transferred`] | only if never handed over |
//! | lifetime-bound | [`Bound`], [`Base`] | never |

use std::fmt;
use std::marker::PhantomData;
use std::mem::ManuallyDrop;

use gdbridge_sys::{ClassTagPtr, ObjectPtr, VariantType};

use crate::abi;
use crate::builtin::{PayloadType, StringName};
use crate::error::{ConversionError, HandleError};
use crate::marshal::{AbiType, FromAbiParam, FromAbiReturn, IntoAbiReturn, ReturnOwnership, ToAbi};
use crate::object::classes::{RefCounted, ref_counting};
use crate::object::{EngineClass, Inherits, InstanceId, RawObject, RefCountedClass};
use crate::variant::{FromVariant, ToVariant, Variant};

pub(crate) fn cast_raw(object: RawObject, tag: ClassTagPtr) -> Option<RawObject> {
    if tag.is_null() {
        return None;
    }
    unsafe { RawObject::from_sys((abi::interface().object_cast_to)(object.as_ptr(), tag)) }
}

fn is_ref_counted(object: RawObject) -> bool {
    cast_raw(object, RefCounted::class_tag()).is_some()
}

/// Gives up one host-held reference.
fn release(object: RawObject, ref_counted: bool, class: &'static str) {
    if abi::is_torn_down() {
        tracing::warn!(target: "gdbridge::handle", class, "object released after teardown is leaked");
        return;
    }

    let destroy = if ref_counted {
        match ref_counting::unreference(object) {
            Ok(last) => last,
            Err(err) => {
                tracing::warn!(target: "gdbridge::handle", class, %err, "unreference failed; object leaked");
                false
            }
        }
    } else {
        true
    };

    if destroy {
        tracing::trace!(target: "gdbridge::handle", class, "destroying object");
        unsafe { (abi::interface().object_destroy)(object.as_ptr()) };
    }
}

// ============================================================================
// Owned
// ============================================================================

/// An object the host is responsible for releasing.
///
/// Reference-counted objects are unreferenced on drop and destroyed when that
/// was the last reference. Manual objects are destroyed. Hand ownership to the
/// engine with [`Owned::transfer`] instead of dropping.
pub struct Owned<T: EngineClass> {
    raw: RawObject,
    ref_counted: bool,
    _marker: PhantomData<*const T>,
}

impl<T: EngineClass> Owned<T> {
    /// Constructs a new instance through the class database.
    ///
    /// # Panics
    ///
    /// If the engine does not know `T`.
    pub fn construct() -> Self {
        match Self::construct_named(T::CLASS_NAME) {
            Some(object) => object,
            None => panic!("engine could not construct `{}`", T::CLASS_NAME),
        }
    }

    /// Constructs an instance of `class`, which must derive from `T`. Used for
    /// host classes, whose engine-side handle type is their base.
    pub(crate) fn construct_named(class: &str) -> Option<Self> {
        let name = StringName::from(class);
        let ptr = name
            .with_sys(|name| unsafe { (abi::interface().classdb_construct_object)(name) })
            .ok()?;
        let raw = unsafe { RawObject::from_sys(ptr) }?;

        let ref_counted = T::REF_COUNTED || is_ref_counted(raw);
        if ref_counted {
            if let Err(err) = ref_counting::init_ref(raw) {
                tracing::warn!(target: "gdbridge::handle", class, %err, "init_ref failed");
            }
        }
        tracing::trace!(target: "gdbridge::handle", class, "constructed object");
        Some(Self {
            raw,
            ref_counted,
            _marker: PhantomData,
        })
    }

    /// Adopts a reference the caller already holds.
    ///
    /// # Safety
    ///
    /// `raw` must be a live instance of `T`, and the caller's reference (or,
    /// for manual classes, its ownership) moves into the returned handle.
    pub unsafe fn from_raw_owned(raw: RawObject) -> Self {
        Self {
            raw,
            ref_counted: T::REF_COUNTED || is_ref_counted(raw),
            _marker: PhantomData,
        }
    }

    pub fn raw(&self) -> RawObject {
        self.raw
    }

    pub fn instance_id(&self) -> InstanceId {
        self.raw.instance_id()
    }

    pub fn bind(&self) -> Bound<'_, T> {
        Bound {
            raw: self.raw,
            _marker: PhantomData,
        }
    }

    /// Hands the host's reference over to the engine.
    pub fn transfer(self) -> Transferred<T> {
        let this = ManuallyDrop::new(self);
        Transferred {
            raw: this.raw,
            ref_counted: this.ref_counted,
            _marker: PhantomData,
        }
    }

    pub fn upcast<B: EngineClass>(self) -> Owned<B>
    where
        T: Inherits<B>,
    {
        let this = ManuallyDrop::new(self);
        Owned {
            raw: this.raw,
            ref_counted: this.ref_counted,
            _marker: PhantomData,
        }
    }

    /// Downcasts through the engine. A failed cast gives the handle back.
    pub fn cast<U: EngineClass>(self) -> Result<Owned<U>, Self> {
        match cast_raw(self.raw, U::class_tag()) {
            Some(raw) => {
                let this = ManuallyDrop::new(self);
                Ok(Owned {
                    raw,
                    ref_counted: this.ref_counted,
                    _marker: PhantomData,
                })
            }
            None => Err(self),
        }
    }

    pub fn try_cast<U: EngineClass>(&self) -> Option<Bound<'_, U>> {
        self.bind().cast()
    }

    /// Leaks the host's reference into a raw pointer.
    pub fn into_raw(self) -> RawObject {
        ManuallyDrop::new(self).raw
    }
}

impl<T: RefCountedClass> Clone for Owned<T> {
    fn clone(&self) -> Self {
        self.bind().to_owned()
    }
}

impl<T: EngineClass> Drop for Owned<T> {
    fn drop(&mut self) {
        release(self.raw, self.ref_counted, T::CLASS_NAME);
    }
}

impl<T: EngineClass> fmt::Debug for Owned<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Owned<{}>({:p})", T::CLASS_NAME, self.raw.as_ptr())
    }
}

impl<T: EngineClass> PartialEq for Owned<T> {
    fn eq(&self, other: &Self) -> bool {
        self.raw == other.raw
    }
}

// ============================================================================
// Bound
// ============================================================================

/// A borrowed object, valid while whatever it was borrowed from is alive.
pub struct Bound<'a, T: EngineClass> {
    raw: RawObject,
    _marker: PhantomData<(&'a (), *const T)>,
}

impl<T: EngineClass> Clone for Bound<'_, T> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<T: EngineClass> Copy for Bound<'_, T> {}

impl<'a, T: EngineClass> Bound<'a, T> {
    /// # Safety
    ///
    /// `raw` must be an instance of `T` that stays alive for `'a`.
    pub unsafe fn from_raw(raw: RawObject) -> Self {
        Self {
            raw,
            _marker: PhantomData,
        }
    }

    pub fn raw(&self) -> RawObject {
        self.raw
    }

    pub fn instance_id(&self) -> InstanceId {
        self.raw.instance_id()
    }

    pub fn upcast<B: EngineClass>(self) -> Bound<'a, B>
    where
        T: Inherits<B>,
    {
        Bound {
            raw: self.raw,
            _marker: PhantomData,
        }
    }

    pub fn cast<U: EngineClass>(self) -> Option<Bound<'a, U>> {
        cast_raw(self.raw, U::class_tag()).map(|raw| Bound {
            raw,
            _marker: PhantomData,
        })
    }
}

impl<T: RefCountedClass> Bound<'_, T> {
    /// Takes a new reference.
    pub fn to_owned(&self) -> Owned<T> {
        if let Err(err) = ref_counting::reference(self.raw) {
            tracing::warn!(target: "gdbridge::handle", class = T::CLASS_NAME, %err, "reference failed");
        }
        Owned {
            raw: self.raw,
            ref_counted: true,
            _marker: PhantomData,
        }
    }

    /// References the object so the engine can take that reference over.
    pub fn transfer(&self) -> Transferred<T> {
        self.to_owned().transfer()
    }
}

impl<T: EngineClass> fmt::Debug for Bound<'_, T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Bound<{}>({:p})", T::CLASS_NAME, self.raw.as_ptr())
    }
}

// ============================================================================
// Base
// ============================================================================

/// A host instance's handle to its own engine object.
///
/// Never releases: the engine object owns the host instance, not the other
/// way round.
pub struct Base<T: EngineClass> {
    raw: RawObject,
    _marker: PhantomData<*const T>,
}

impl<T: EngineClass> Base<T> {
    pub(crate) fn new(raw: RawObject) -> Self {
        Self {
            raw,
            _marker: PhantomData,
        }
    }

    pub fn bind(&self) -> Bound<'_, T> {
        Bound {
            raw: self.raw,
            _marker: PhantomData,
        }
    }

    pub fn raw(&self) -> RawObject {
        self.raw
    }

    pub fn instance_id(&self) -> InstanceId {
        self.raw.instance_id()
    }
}

impl<T: EngineClass> fmt::Debug for Base<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Base<{}>({:p})", T::CLASS_NAME, self.raw.as_ptr())
    }
}

// ============================================================================
// Transferred
// ============================================================================

/// A reference on its way into the engine.
///
/// Pushing it into a [`CallFrame`](crate::frame::CallFrame) or returning it
/// from a trampoline hands it over. Dropping it unused releases the reference.
#[must_use = "a transferred object is released if it never reaches the engine"]
pub struct Transferred<T: EngineClass> {
    raw: RawObject,
    ref_counted: bool,
    _marker: PhantomData<*const T>,
}

impl<T: EngineClass> Transferred<T> {
    pub fn raw(&self) -> RawObject {
        self.raw
    }

    /// The engine now holds the reference.
    pub fn hand_over(self) -> RawObject {
        ManuallyDrop::new(self).raw
    }

    /// Parks the reference in a frame until its call reaches the engine.
    pub(crate) fn into_pending(self) -> PendingHandover {
        let this = ManuallyDrop::new(self);
        PendingHandover {
            raw: this.raw,
            ref_counted: this.ref_counted,
            class: T::CLASS_NAME,
        }
    }
}

/// A transferred reference whose call has not been dispatched yet.
///
/// Released on drop, so a call refused before the engine leaves nothing
/// behind.
pub(crate) struct PendingHandover {
    raw: RawObject,
    ref_counted: bool,
    class: &'static str,
}

impl PendingHandover {
    pub(crate) fn raw(&self) -> RawObject {
        self.raw
    }

    /// The call reached the engine, which holds the reference now.
    pub(crate) fn complete(self) {
        let _ = ManuallyDrop::new(self);
    }
}

impl Drop for PendingHandover {
    fn drop(&mut self) {
        tracing::debug!(target: "gdbridge::handle", class = self.class, "call never dispatched; releasing transferred object");
        release(self.raw, self.ref_counted, self.class);
    }
}

impl<T: EngineClass> Drop for Transferred<T> {
    fn drop(&mut self) {
        tracing::warn!(target: "gdbridge::handle", class = T::CLASS_NAME, "transferred object never reached the engine; releasing");
        release(self.raw, self.ref_counted, T::CLASS_NAME);
    }
}

impl<T: EngineClass> fmt::Debug for Transferred<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Transferred<{}>({:p})", T::CLASS_NAME, self.raw.as_ptr())
    }
}

// ============================================================================
// ObjectRef
// ============================================================================

/// Anything that can stand in for an instance of `B` in a call.
pub trait ObjectRef<B: EngineClass> {
    fn object_raw(&self) -> RawObject;
}

impl<B: EngineClass, T: Inherits<B>> ObjectRef<B> for Owned<T> {
    fn object_raw(&self) -> RawObject {
        self.raw
    }
}

impl<B: EngineClass, T: Inherits<B>> ObjectRef<B> for Bound<'_, T> {
    fn object_raw(&self) -> RawObject {
        self.raw
    }
}

impl<B: EngineClass, T: Inherits<B>> ObjectRef<B> for Base<T> {
    fn object_raw(&self) -> RawObject {
        self.raw
    }
}

// ============================================================================
// Pointer-call representation
// ============================================================================

macro_rules! impl_object_to_abi {
    ($([$($gen:tt)*] $ty:ty),* $(,)?) => {
        $(
            impl<$($gen)*> AbiType for $ty {
                type Abi = ObjectPtr;
                const VARIANT_TYPE: VariantType = VariantType::Object;
            }

            impl<$($gen)*> ToAbi for $ty {
                fn to_abi(&self) -> Result<ObjectPtr, HandleError> {
                    Ok(self.raw.as_ptr())
                }
            }

            impl<$($gen)*> ToVariant for $ty {
                fn to_variant(&self) -> Variant {
                    self.raw.to_variant()
                }
            }
        )*
    };
}

impl_object_to_abi! {
    [T: EngineClass] Owned<T>,
    ['a, T: EngineClass] Bound<'a, T>,
    [T: EngineClass] Base<T>,
}

impl<T: EngineClass> AbiType for Transferred<T> {
    type Abi = ObjectPtr;
    const VARIANT_TYPE: VariantType = VariantType::Object;
}

impl<T: EngineClass> IntoAbiReturn for Transferred<T> {
    unsafe fn into_abi_return(self, slot: *mut ObjectPtr) -> Result<(), HandleError> {
        unsafe { slot.write_unaligned(self.hand_over().as_ptr()) };
        Ok(())
    }
}

/// Returning an owned object from a trampoline transfers it.
impl<T: EngineClass> IntoAbiReturn for Owned<T> {
    unsafe fn into_abi_return(self, slot: *mut ObjectPtr) -> Result<(), HandleError> {
        unsafe { self.transfer().into_abi_return(slot) }
    }
}

impl<T: EngineClass> AbiType for Option<Owned<T>> {
    type Abi = ObjectPtr;
    const VARIANT_TYPE: VariantType = VariantType::Object;
}

/// Decodes a return the engine declared as owned.
impl<T: EngineClass> FromAbiReturn for Option<Owned<T>> {
    const OWNERSHIP: ReturnOwnership = ReturnOwnership::Owned;

    unsafe fn from_abi_return(abi: ObjectPtr) -> Self {
        unsafe { RawObject::from_sys(abi).map(|raw| Owned::from_raw_owned(raw)) }
    }
}

/// An object argument of a trampoline is borrowed from the engine; keeping it
/// takes a reference.
impl<T: RefCountedClass> FromAbiParam for Option<Owned<T>> {
    unsafe fn from_abi_param(ptr: *const ObjectPtr) -> Self {
        let raw = unsafe { RawObject::from_sys(ptr.read_unaligned()) }?;
        Some(unsafe { Bound::<T>::from_raw(raw) }.to_owned())
    }
}

impl<T: RefCountedClass> FromVariant for Owned<T> {
    /// Takes a new reference; the variant keeps its own.
    fn try_from_variant(variant: &Variant) -> Result<Self, ConversionError> {
        let raw = RawObject::try_from_variant(variant)?;
        let bound = unsafe { Bound::<crate::object::Object>::from_raw(raw) }
            .cast::<T>()
            .ok_or(ConversionError::WrongClass {
                expected: T::CLASS_NAME,
            })?;
        Ok(bound.to_owned())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::object::{Object, ObjectExt, RefCountedExt};
    use crate::test_support;

    #[test]
    fn ref_counted_object_is_released_once() {
        let _guard = test_support::lock();
        let before = gdbridge_mock::stats();
        let object = Owned::<RefCounted>::construct();
        assert_eq!(object.get_reference_count(), Ok(1));
        assert_eq!(gdbridge_mock::stats().live_objects, before.live_objects + 1);
        drop(object);
        let after = gdbridge_mock::stats();
        assert_eq!(after.live_objects, before.live_objects);
        assert_eq!(after.objects_destroyed, before.objects_destroyed + 1);
    }

    #[test]
    fn upcast_keeps_reference_counting() {
        let _guard = test_support::lock();
        let before = gdbridge_mock::stats().live_objects;
        let object = Owned::<RefCounted>::construct().upcast::<Object>();
        assert_eq!(object.get_class().unwrap(), "RefCounted");
        drop(object);
        assert_eq!(gdbridge_mock::stats().live_objects, before);
    }

    #[test]
    fn cast_to_unrelated_class_gives_the_handle_back() {
        let _guard = test_support::lock();
        let object = Owned::<Object>::construct();
        let object = object.cast::<RefCounted>().unwrap_err();
        assert!(object.try_cast::<RefCounted>().is_none());
        assert!(object.try_cast::<Object>().is_some());
    }

    #[test]
    fn bound_to_owned_takes_a_reference() {
        let _guard = test_support::lock();
        let object = Owned::<RefCounted>::construct();
        let second = object.bind().to_owned();
        assert_eq!(object.get_reference_count(), Ok(2));
        assert_eq!(second, object);
        drop(second);
        assert_eq!(object.get_reference_count(), Ok(1));
    }

    #[test]
    fn unused_transfer_releases() {
        let _guard = test_support::lock();
        let before = gdbridge_mock::stats().live_objects;
        let transferred = Owned::<Object>::construct().transfer();
        drop(transferred);
        assert_eq!(gdbridge_mock::stats().live_objects, before);
    }

    #[test]
    fn variant_does_not_steal_ownership() {
        let _guard = test_support::lock();
        let object = Owned::<RefCounted>::construct();
        let variant = object.to_variant();
        assert_eq!(variant.get_type(), VariantType::Object);

        let back = variant.to::<Owned<RefCounted>>().unwrap();
        assert_eq!(back, object);
        assert_eq!(object.get_reference_count(), Ok(2));
        drop(back);
        assert_eq!(object.get_reference_count(), Ok(1));
    }

    #[test]
    fn object_variant_checks_class() {
        let _guard = test_support::lock();
        let object = Owned::<Object>::construct();
        assert_eq!(
            object.to_variant().to::<Owned<RefCounted>>(),
            Err(ConversionError::WrongClass {
                expected: "RefCounted",
            })
        );
        assert_eq!(Variant::nil().to::<Option<Owned<RefCounted>>>(), Ok(None));
    }

    #[test]
    fn freed_object_is_no_longer_valid() {
        let _guard = test_support::lock();
        let object = Owned::<Object>::construct();
        let id = object.instance_id();
        assert!(crate::object::is_instance_valid(id));
        drop(object);
        assert!(!crate::object::is_instance_valid(id));
    }
}
