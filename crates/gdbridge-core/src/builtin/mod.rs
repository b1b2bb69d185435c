//! Engine builtin types.
//!
//! PODs ([`math`]) cross the ABI by value. Everything else owns an engine
//! allocation and is a thin newtype over a registry [`Payload`]: cloning goes
//! through the engine copy constructor, dropping ends the handle and runs the
//! engine destructor.

mod array;
mod callable;
mod dictionary;
mod math;
mod node_path;
mod packed;
mod string;
mod string_name;

pub use array::VariantArray;
pub use callable::{Callable, Signal};
pub use dictionary::Dictionary;
pub use math::*;
pub use node_path::NodePath;
pub use packed::{
    PackedArray, PackedByteArray, PackedColorArray, PackedElement, PackedFloat32Array,
    PackedFloat64Array, PackedInt32Array, PackedInt64Array, PackedStringArray,
    PackedVector2Array, PackedVector3Array, PackedVector4Array,
};
pub use string::GString;
pub use string_name::StringName;

use std::ffi::c_void;

use gdbridge_sys::{PtrConstructor, VariantType};

use crate::error::HandleError;
use crate::handle::{Payload, PayloadKind};
use crate::method_bind::{BuiltinMethod, BuiltinMethodSpec, BuiltinMethodTable};

/// A builtin backed by one registry record.
pub trait PayloadType: Sized {
    const KIND: PayloadKind;

    fn payload(&self) -> &Payload;

    fn from_payload(payload: Payload) -> Self;

    fn into_payload(self) -> Payload;

    /// Runs `f` with a pointer to the value's ABI bytes. Engine mutations
    /// through the pointer are written back to the registry.
    fn with_sys<R>(&self, f: impl FnOnce(*mut c_void) -> R) -> Result<R, HandleError> {
        self.payload().with_ptr(f)
    }
}

/// Builds a value of `kind` from one other payload through a conversion
/// constructor. A dead source yields the default value.
pub(crate) fn construct_with(kind: PayloadKind, ctor: PtrConstructor, source: &Payload) -> Payload {
    match source.raw() {
        Ok(raw) => unsafe {
            Payload::construct(kind, |dest| {
                let args = [raw.as_ptr().cast::<c_void>()];
                ctor(dest, args.as_ptr())
            })
        },
        Err(err) => {
            tracing::warn!(target: "gdbridge::handle", %err, ?kind, "converting from a dead handle, using the default value");
            Payload::new_default(kind)
        }
    }
}

/// Implements [`PayloadType`] and every marshalling direction for a newtype
/// over [`Payload`] whose ABI form is `$words` u64 words.
macro_rules! impl_payload_type {
    ($ty:ident, $kind:ident, $words:literal) => {
        impl $crate::builtin::PayloadType for $ty {
            const KIND: $crate::handle::PayloadKind = $crate::handle::PayloadKind::$kind;

            fn payload(&self) -> &$crate::handle::Payload {
                &self.payload
            }

            fn from_payload(payload: $crate::handle::Payload) -> Self {
                debug_assert_eq!(payload.kind(), Self::KIND);
                Self { payload }
            }

            fn into_payload(self) -> $crate::handle::Payload {
                self.payload
            }
        }

        impl $crate::marshal::AbiType for $ty {
            type Abi = [u64; $words];
            const VARIANT_TYPE: gdbridge_sys::VariantType = gdbridge_sys::VariantType::$kind;
        }

        impl $crate::marshal::ToAbi for $ty {
            fn to_abi(&self) -> Result<[u64; $words], $crate::error::HandleError> {
                Ok($crate::marshal::take_words(self.payload.raw()?))
            }
        }

        impl $crate::marshal::FromAbiReturn for $ty {
            unsafe fn from_abi_return(abi: [u64; $words]) -> Self {
                Self {
                    payload: $crate::handle::Payload::adopt(
                        $crate::handle::PayloadKind::$kind,
                        $crate::marshal::widen_words(abi),
                    ),
                }
            }
        }

        impl $crate::marshal::FromAbiParam for $ty {
            unsafe fn from_abi_param(ptr: *const [u64; $words]) -> Self {
                Self {
                    payload: unsafe {
                        $crate::handle::Payload::copy_from(
                            $crate::handle::PayloadKind::$kind,
                            ptr.cast(),
                        )
                    },
                }
            }
        }

        impl $crate::marshal::IntoAbiReturn for $ty {
            unsafe fn into_abi_return(
                self,
                slot: *mut [u64; $words],
            ) -> Result<(), $crate::error::HandleError> {
                let raw = self.payload.into_raw()?;
                unsafe { slot.write_unaligned($crate::marshal::take_words(raw)) };
                Ok(())
            }
        }
    };
}
pub(crate) use impl_payload_type;

// ============================================================================
// Builtin methods used by the containers
// ============================================================================

const fn spec(ty: VariantType, name: &'static str, hash: i64) -> BuiltinMethodSpec {
    BuiltinMethodSpec { ty, name, hash }
}

const SIZE_HASH: i64 = 3173160232;
const RESIZE_HASH: i64 = 848867239;
const CLEAR_HASH: i64 = 3218959716;

pub(crate) static CONTAINER_METHODS: BuiltinMethodTable = BuiltinMethodTable::new(&[
    spec(VariantType::Array, "size", SIZE_HASH),
    spec(VariantType::Array, "resize", RESIZE_HASH),
    spec(VariantType::Array, "push_back", 3316032543),
    spec(VariantType::Array, "clear", CLEAR_HASH),
    spec(VariantType::Dictionary, "size", SIZE_HASH),
    spec(VariantType::Dictionary, "has", 3680194679),
    spec(VariantType::Dictionary, "keys", 4144163970),
    spec(VariantType::Dictionary, "erase", 1776646889),
    spec(VariantType::Dictionary, "clear", CLEAR_HASH),
    spec(VariantType::PackedByteArray, "size", SIZE_HASH),
    spec(VariantType::PackedInt32Array, "size", SIZE_HASH),
    spec(VariantType::PackedInt64Array, "size", SIZE_HASH),
    spec(VariantType::PackedFloat32Array, "size", SIZE_HASH),
    spec(VariantType::PackedFloat64Array, "size", SIZE_HASH),
    spec(VariantType::PackedStringArray, "size", SIZE_HASH),
    spec(VariantType::PackedVector2Array, "size", SIZE_HASH),
    spec(VariantType::PackedVector3Array, "size", SIZE_HASH),
    spec(VariantType::PackedColorArray, "size", SIZE_HASH),
    spec(VariantType::PackedVector4Array, "size", SIZE_HASH),
    spec(VariantType::PackedByteArray, "resize", RESIZE_HASH),
    spec(VariantType::PackedInt32Array, "resize", RESIZE_HASH),
    spec(VariantType::PackedInt64Array, "resize", RESIZE_HASH),
    spec(VariantType::PackedFloat32Array, "resize", RESIZE_HASH),
    spec(VariantType::PackedFloat64Array, "resize", RESIZE_HASH),
    spec(VariantType::PackedStringArray, "resize", RESIZE_HASH),
    spec(VariantType::PackedVector2Array, "resize", RESIZE_HASH),
    spec(VariantType::PackedVector3Array, "resize", RESIZE_HASH),
    spec(VariantType::PackedColorArray, "resize", RESIZE_HASH),
    spec(VariantType::PackedVector4Array, "resize", RESIZE_HASH),
]);

/// Indices into [`CONTAINER_METHODS`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum ContainerMethod {
    ArraySize,
    ArrayResize,
    ArrayPushBack,
    ArrayClear,
    DictionarySize,
    DictionaryHas,
    DictionaryKeys,
    DictionaryErase,
    DictionaryClear,
    PackedSize(VariantType),
    PackedResize(VariantType),
}

impl ContainerMethod {
    const PACKED_SIZE_BASE: usize = 9;
    const PACKED_RESIZE_BASE: usize = 19;

    fn index(self) -> usize {
        let packed_offset =
            |ty: VariantType| (ty.as_raw() - VariantType::PackedByteArray.as_raw()) as usize;
        match self {
            Self::ArraySize => 0,
            Self::ArrayResize => 1,
            Self::ArrayPushBack => 2,
            Self::ArrayClear => 3,
            Self::DictionarySize => 4,
            Self::DictionaryHas => 5,
            Self::DictionaryKeys => 6,
            Self::DictionaryErase => 7,
            Self::DictionaryClear => 8,
            Self::PackedSize(ty) => Self::PACKED_SIZE_BASE + packed_offset(ty),
            Self::PackedResize(ty) => Self::PACKED_RESIZE_BASE + packed_offset(ty),
        }
    }

    pub(crate) fn get(self) -> BuiltinMethod {
        CONTAINER_METHODS.get(self.index())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn container_indices_point_at_matching_specs() {
        let cases = [
            (ContainerMethod::ArrayPushBack, VariantType::Array, "push_back"),
            (ContainerMethod::DictionaryKeys, VariantType::Dictionary, "keys"),
            (ContainerMethod::DictionaryClear, VariantType::Dictionary, "clear"),
            (
                ContainerMethod::PackedSize(VariantType::PackedVector3Array),
                VariantType::PackedVector3Array,
                "size",
            ),
            (
                ContainerMethod::PackedResize(VariantType::PackedColorArray),
                VariantType::PackedColorArray,
                "resize",
            ),
        ];
        let specs = CONTAINER_METHODS.specs();
        for (method, ty, name) in cases {
            let spec = specs[method.index()];
            assert_eq!((spec.ty, spec.name), (ty, name));
        }
    }
}
