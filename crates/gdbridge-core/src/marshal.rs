//! Pointer-call representations of host types.
//!
//! A pointer-call passes every argument as a pointer to its ABI bytes and
//! receives the return value in a slot of the return type's ABI layout. These
//! traits say what those bytes are for each host type and who owns them:
//!
//! | Trait | Direction | Ownership |
//! |---|---|---|
//! | [`ToAbi`] | host → engine argument | borrowed for the call |
//! | [`FromAbiReturn`] | engine → host return slot | moves to the host |
//! | [`FromAbiParam`] | engine → host trampoline argument | copied, engine keeps its value |
//! | [`IntoAbiReturn`] | host → engine trampoline return | moves to the engine |

use gdbridge_sys::{Bool, VariantType};

use crate::error::HandleError;

/// A type with a fixed pointer-call layout.
pub trait AbiType {
    /// The bytes the engine reads or writes.
    type Abi: Copy;

    const VARIANT_TYPE: VariantType;
}

pub trait ToAbi: AbiType {
    fn to_abi(&self) -> Result<Self::Abi, HandleError>;
}

/// Whether a decoded return holds an engine object, and who releases it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReturnOwnership {
    NotObject,
    /// Adopts the reference the engine handed out.
    Owned,
    /// Takes no reference.
    Borrowed,
}

pub trait FromAbiReturn: AbiType + Sized {
    const OWNERSHIP: ReturnOwnership = ReturnOwnership::NotObject;

    /// # Safety
    ///
    /// `abi` must have been constructed by the engine, and no one else may
    /// release it.
    unsafe fn from_abi_return(abi: Self::Abi) -> Self;
}

pub trait FromAbiParam: AbiType + Sized {
    /// # Safety
    ///
    /// `ptr` must point at a live value of this type owned by the engine.
    unsafe fn from_abi_param(ptr: *const Self::Abi) -> Self;
}

pub trait IntoAbiReturn: AbiType + Sized {
    /// # Safety
    ///
    /// `slot` must be writable storage for `Self::Abi`.
    unsafe fn into_abi_return(self, slot: *mut Self::Abi) -> Result<(), HandleError>;
}

// ============================================================================
// Unit
// ============================================================================

impl AbiType for () {
    type Abi = ();
    const VARIANT_TYPE: VariantType = VariantType::Nil;
}

impl FromAbiReturn for () {
    unsafe fn from_abi_return(_: ()) -> Self {}
}

impl IntoAbiReturn for () {
    unsafe fn into_abi_return(self, _: *mut ()) -> Result<(), HandleError> {
        Ok(())
    }
}

// ============================================================================
// Scalars
// ============================================================================

/// Implements every direction for a `Copy` type whose ABI bytes are a
/// conversion of its value.
macro_rules! impl_scalar_abi {
    ($($ty:ty => $abi:ty, $tag:ident, |$v:ident| $to:expr, |$a:ident| $from:expr;)*) => {
        $(
            impl AbiType for $ty {
                type Abi = $abi;
                const VARIANT_TYPE: VariantType = VariantType::$tag;
            }

            impl ToAbi for $ty {
                fn to_abi(&self) -> Result<$abi, HandleError> {
                    let $v = *self;
                    Ok($to)
                }
            }

            impl FromAbiReturn for $ty {
                unsafe fn from_abi_return($a: $abi) -> Self {
                    $from
                }
            }

            impl FromAbiParam for $ty {
                unsafe fn from_abi_param(ptr: *const $abi) -> Self {
                    let $a = unsafe { ptr.read_unaligned() };
                    $from
                }
            }

            impl IntoAbiReturn for $ty {
                unsafe fn into_abi_return(self, slot: *mut $abi) -> Result<(), HandleError> {
                    let $v = self;
                    unsafe { slot.write_unaligned($to) };
                    Ok(())
                }
            }
        )*
    };
}

impl_scalar_abi! {
    bool => Bool, Bool, |v| Bool::from(v), |a| a != 0;
    i64 => i64, Int, |v| v, |a| a;
    i32 => i64, Int, |v| i64::from(v), |a| a as i32;
    i16 => i64, Int, |v| i64::from(v), |a| a as i16;
    i8 => i64, Int, |v| i64::from(v), |a| a as i8;
    u32 => i64, Int, |v| i64::from(v), |a| a as u32;
    u16 => i64, Int, |v| i64::from(v), |a| a as u16;
    u8 => i64, Int, |v| i64::from(v), |a| a as u8;
    f64 => f64, Float, |v| v, |a| a;
    f32 => f64, Float, |v| f64::from(v), |a| a as f32;
}

/// Implements every direction for a `#[repr(C)]` POD whose ABI bytes are the
/// value itself.
macro_rules! impl_pod_abi {
    ($($ty:ty => $tag:ident),* $(,)?) => {
        $(
            impl $crate::marshal::AbiType for $ty {
                type Abi = $ty;
                const VARIANT_TYPE: gdbridge_sys::VariantType = gdbridge_sys::VariantType::$tag;
            }

            impl $crate::marshal::ToAbi for $ty {
                fn to_abi(&self) -> Result<$ty, $crate::error::HandleError> {
                    Ok(*self)
                }
            }

            impl $crate::marshal::FromAbiReturn for $ty {
                unsafe fn from_abi_return(abi: $ty) -> Self {
                    abi
                }
            }

            impl $crate::marshal::FromAbiParam for $ty {
                unsafe fn from_abi_param(ptr: *const $ty) -> Self {
                    unsafe { ptr.read_unaligned() }
                }
            }

            impl $crate::marshal::IntoAbiReturn for $ty {
                unsafe fn into_abi_return(
                    self,
                    slot: *mut $ty,
                ) -> Result<(), $crate::error::HandleError> {
                    unsafe { slot.write_unaligned(self) };
                    Ok(())
                }
            }
        )*
    };
}
pub(crate) use impl_pod_abi;

/// Reads `N` words of a slot array.
pub(crate) fn take_words<const N: usize>(raw: [u64; 3]) -> [u64; N] {
    let mut out = [0u64; N];
    out.copy_from_slice(&raw[..N]);
    out
}

/// Widens `N` words back into a slot array.
pub(crate) fn widen_words<const N: usize>(words: [u64; N]) -> [u64; 3] {
    let mut out = [0u64; 3];
    out[..N].copy_from_slice(&words);
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bool_is_one_byte() {
        assert_eq!(size_of::<<bool as AbiType>::Abi>(), 1);
        assert_eq!(true.to_abi(), Ok(1));
        assert!(unsafe { bool::from_abi_return(1) });
    }

    #[test]
    fn narrow_ints_widen_to_i64() {
        assert_eq!((-3i8).to_abi(), Ok(-3i64));
        assert_eq!(u32::MAX.to_abi(), Ok(4_294_967_295i64));
        assert_eq!(unsafe { i32::from_abi_return(7) }, 7);
    }

    #[test]
    fn f32_widens_to_f64() {
        assert_eq!(1.5f32.to_abi(), Ok(1.5f64));
        let slot = 2.25f64;
        assert_eq!(unsafe { f32::from_abi_param(&slot) }, 2.25f32);
    }

    #[test]
    fn into_return_writes_slot() {
        let mut slot = 0i64;
        unsafe { 42i64.into_abi_return(&mut slot).unwrap() };
        assert_eq!(slot, 42);
    }

    #[test]
    fn word_helpers_preserve_prefix() {
        let words: [u64; 2] = take_words([1, 2, 3]);
        assert_eq!(words, [1, 2]);
        assert_eq!(widen_words(words), [1, 2, 0]);
    }
}
