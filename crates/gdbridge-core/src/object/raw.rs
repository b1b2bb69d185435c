use std::ffi::c_void;
use std::ptr::NonNull;

use gdbridge_sys::{ObjectPtr, VariantType};

use crate::abi;
use crate::error::{ConversionError, HandleError};
use crate::marshal::{AbiType, FromAbiParam, FromAbiReturn, IntoAbiReturn, ReturnOwnership, ToAbi};
use crate::variant::{FromVariant, ToVariant, Variant};

/// Non-null engine object pointer with no ownership attached.
///
/// Copying it never touches the reference count. Whoever holds one must know
/// from context that the object is alive.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(transparent)]
pub struct RawObject(NonNull<c_void>);

// Plain id; dereferencing is the engine's business and happens on its thread.
unsafe impl Send for RawObject {}
unsafe impl Sync for RawObject {}

impl RawObject {
    /// # Safety
    ///
    /// `ptr` must be null or an engine object pointer.
    pub unsafe fn from_sys(ptr: ObjectPtr) -> Option<Self> {
        NonNull::new(ptr).map(Self)
    }

    pub fn as_ptr(self) -> ObjectPtr {
        self.0.as_ptr()
    }

    pub fn instance_id(self) -> InstanceId {
        InstanceId(unsafe { (abi::interface().object_get_instance_id)(self.as_ptr()) })
    }
}

/// The engine's 64-bit object id. Survives the object; looking it up after
/// the object is freed yields nothing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct InstanceId(u64);

impl InstanceId {
    pub const fn from_u64(id: u64) -> Self {
        Self(id)
    }

    pub const fn to_u64(self) -> u64 {
        self.0
    }

    /// The live object with this id.
    pub fn lookup(self) -> Option<RawObject> {
        unsafe { RawObject::from_sys((abi::interface().object_get_instance_from_id)(self.0)) }
    }
}

/// Whether the object with `id` is still alive.
pub fn is_instance_valid(id: InstanceId) -> bool {
    id.lookup().is_some()
}

// ============================================================================
// Pointer-call representation
// ============================================================================

impl AbiType for RawObject {
    type Abi = ObjectPtr;
    const VARIANT_TYPE: VariantType = VariantType::Object;
}

impl ToAbi for RawObject {
    fn to_abi(&self) -> Result<ObjectPtr, HandleError> {
        Ok(self.as_ptr())
    }
}

impl FromAbiReturn for RawObject {
    const OWNERSHIP: ReturnOwnership = ReturnOwnership::Borrowed;

    unsafe fn from_abi_return(abi: ObjectPtr) -> Self {
        match unsafe { Self::from_sys(abi) } {
            Some(object) => object,
            None => panic!("engine returned null where an object was required"),
        }
    }
}

impl FromAbiParam for RawObject {
    unsafe fn from_abi_param(ptr: *const ObjectPtr) -> Self {
        unsafe { Self::from_abi_return(ptr.read_unaligned()) }
    }
}

impl IntoAbiReturn for RawObject {
    unsafe fn into_abi_return(self, slot: *mut ObjectPtr) -> Result<(), HandleError> {
        unsafe { slot.write_unaligned(self.as_ptr()) };
        Ok(())
    }
}

impl AbiType for Option<RawObject> {
    type Abi = ObjectPtr;
    const VARIANT_TYPE: VariantType = VariantType::Object;
}

impl ToAbi for Option<RawObject> {
    fn to_abi(&self) -> Result<ObjectPtr, HandleError> {
        Ok(self.map_or(std::ptr::null_mut(), RawObject::as_ptr))
    }
}

impl FromAbiReturn for Option<RawObject> {
    const OWNERSHIP: ReturnOwnership = ReturnOwnership::Borrowed;

    unsafe fn from_abi_return(abi: ObjectPtr) -> Self {
        unsafe { RawObject::from_sys(abi) }
    }
}

impl FromAbiParam for Option<RawObject> {
    unsafe fn from_abi_param(ptr: *const ObjectPtr) -> Self {
        unsafe { RawObject::from_sys(ptr.read_unaligned()) }
    }
}

impl IntoAbiReturn for Option<RawObject> {
    unsafe fn into_abi_return(self, slot: *mut ObjectPtr) -> Result<(), HandleError> {
        unsafe { slot.write_unaligned(self.map_or(std::ptr::null_mut(), RawObject::as_ptr)) };
        Ok(())
    }
}

// ============================================================================
// Variants
// ============================================================================

impl ToVariant for RawObject {
    fn to_variant(&self) -> Variant {
        Variant::from_typed(VariantType::Object, self.as_ptr())
    }
}

impl FromVariant for RawObject {
    fn try_from_variant(variant: &Variant) -> Result<Self, ConversionError> {
        variant.try_to_object()?.ok_or(ConversionError::NilToNonNullable {
            expected: VariantType::Object,
        })
    }
}

impl Variant {
    /// The object held by this variant. Nil and freed objects both read as
    /// `None`; any other type is an error.
    pub fn try_to_object(&self) -> Result<Option<RawObject>, ConversionError> {
        if self.is_nil() {
            return Ok(None);
        }
        let ptr = self.to_typed::<ObjectPtr>(VariantType::Object)?;
        Ok(unsafe { RawObject::from_sys(ptr) })
    }
}
