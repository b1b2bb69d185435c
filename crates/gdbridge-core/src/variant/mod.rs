//! The engine's 24-byte tagged value.
//!
//! A [`Variant`] owns one registry record of kind
//! [`PayloadKind::Variant`]; its bytes are only ever interpreted by the
//! engine. Typed access goes through the per-type from/to constructors
//! resolved at startup:
//!
//! ```ignore
//! let v = Variant::from(&PackedVector3Array::from_slice(&points));
//! assert_eq!(v.get_type(), VariantType::PackedVector3Array);
//! let back: PackedVector3Array = v.to()?;
//! ```

mod convert;

pub use convert::{FromVariant, ToVariant};

use std::ffi::c_void;
use std::fmt;
use std::mem::MaybeUninit;

use gdbridge_sys::{Bool, CallErrorRaw, VariantOperator, VariantType};

use crate::abi;
use crate::builtin::{GString, PayloadType, StringName};
use crate::error::{CallError, ConversionError, HandleError};
use crate::handle::{Payload, PayloadKind};
use crate::marshal::{AbiType, FromAbiParam, FromAbiReturn, IntoAbiReturn, ToAbi, take_words, widen_words};

#[derive(Clone)]
pub struct Variant {
    payload: Payload,
}

impl Variant {
    pub fn nil() -> Self {
        Self {
            payload: Payload::new_default(PayloadKind::Variant),
        }
    }

    /// # Safety
    ///
    /// `construct` must initialize a variant at the pointer.
    pub(crate) unsafe fn construct(construct: impl FnOnce(*mut c_void)) -> Self {
        Self {
            payload: unsafe { Payload::construct(PayloadKind::Variant, construct) },
        }
    }

    /// Copies an engine-owned variant.
    ///
    /// # Safety
    ///
    /// `ptr` must point at a live variant.
    pub(crate) unsafe fn from_borrowed(ptr: *const c_void) -> Self {
        Self {
            payload: unsafe { Payload::copy_from(PayloadKind::Variant, ptr) },
        }
    }

    pub(crate) fn payload(&self) -> &Payload {
        &self.payload
    }

    pub(crate) fn with_sys<R>(&self, f: impl FnOnce(*mut c_void) -> R) -> Result<R, HandleError> {
        self.payload.with_ptr(f)
    }

    /// Wraps a typed ABI value through the engine's from-type constructor.
    pub(crate) fn from_typed<A: Copy>(ty: VariantType, mut value: A) -> Self {
        let Some(from_type) = abi::interface().builtin(ty).from_type else {
            panic!("engine has no variant constructor for {ty}");
        };
        unsafe {
            Self::construct(|dest| from_type(dest, (&mut value as *mut A).cast()))
        }
    }

    /// Extracts a typed ABI value. Heap payloads come back as a fresh copy the
    /// caller owns.
    pub(crate) fn to_typed<A: Copy>(&self, ty: VariantType) -> Result<A, ConversionError> {
        let actual = self.get_type();
        if actual != ty {
            return Err(if actual == VariantType::Nil {
                ConversionError::NilToNonNullable { expected: ty }
            } else {
                ConversionError::WrongType {
                    expected: ty,
                    actual,
                }
            });
        }
        let Some(to_type) = abi::interface().builtin(ty).to_type else {
            panic!("engine has no variant extractor for {ty}");
        };
        let mut out = MaybeUninit::<A>::zeroed();
        self.with_sys(|src| unsafe { to_type(out.as_mut_ptr().cast(), src) })?;
        Ok(unsafe { out.assume_init() })
    }

    /// The stored tag. A variant whose handle was ended reads as nil.
    pub fn get_type(&self) -> VariantType {
        let interface = abi::interface();
        match self.with_sys(|ptr| unsafe { (interface.variant_get_type)(ptr) }) {
            Ok(raw) => VariantType::from_raw(raw).unwrap_or_default(),
            Err(err) => {
                tracing::warn!(target: "gdbridge::handle", %err, "type of a dead variant");
                VariantType::Nil
            }
        }
    }

    pub fn is_nil(&self) -> bool {
        self.get_type() == VariantType::Nil
    }

    pub fn to<T: FromVariant>(&self) -> Result<T, ConversionError> {
        T::try_from_variant(self)
    }

    /// Converts to `T`, yielding `T::default()` and `false` when the variant is
    /// nil or holds another type.
    pub fn try_to_nullable<T: FromVariant + Default>(&self) -> (T, bool) {
        match T::try_from_variant(self) {
            Ok(value) => (value, true),
            Err(err) => {
                if !self.is_nil() {
                    tracing::debug!(target: "gdbridge::handle", %err, "nullable conversion fell back to the default");
                }
                (T::default(), false)
            }
        }
    }

    /// Reads a numeric variant as `f64`. Ints convert exactly below 2^53.
    pub fn coerce_to_f64(&self) -> Result<f64, ConversionError> {
        match self.get_type() {
            VariantType::Float => self.to::<f64>(),
            VariantType::Int => self.to::<i64>().map(|value| value as f64),
            VariantType::Bool => self.to::<bool>().map(|value| if value { 1.0 } else { 0.0 }),
            actual => Err(ConversionError::WrongType {
                expected: VariantType::Float,
                actual,
            }),
        }
    }

    /// Reads a numeric variant as `i64`. Floats truncate toward zero,
    /// saturate at the bounds, and NaN becomes 0.
    pub fn coerce_to_i64(&self) -> Result<i64, ConversionError> {
        match self.get_type() {
            VariantType::Int => self.to::<i64>(),
            // `as` from float saturates and maps NaN to zero.
            VariantType::Float => self.to::<f64>().map(|value| value as i64),
            VariantType::Bool => self.to::<bool>().map(i64::from),
            actual => Err(ConversionError::WrongType {
                expected: VariantType::Int,
                actual,
            }),
        }
    }

    /// The engine's text form of the value.
    pub fn stringify(&self) -> GString {
        let interface = abi::interface();
        let mut raw = [0u64; 1];
        let result = self.with_sys(|ptr| unsafe {
            (interface.variant_stringify)(ptr, raw.as_mut_ptr().cast());
        });
        match result {
            Ok(()) => unsafe { GString::from_abi_return(raw) },
            Err(_) => GString::new(),
        }
    }

    pub fn hash_code(&self) -> i64 {
        let interface = abi::interface();
        self.with_sys(|ptr| unsafe { (interface.variant_hash)(ptr) })
            .unwrap_or(0)
    }

    /// Calls `method` on the value through the engine's variant-call.
    pub fn call(&self, method: &str, args: &[&Variant]) -> Result<Variant, CallError> {
        #[cfg(feature = "profiling")]
        profiling::scope!("Variant::call");

        let interface = abi::interface();
        let method = StringName::from(method);
        let mut frame = crate::frame::CallFrame::new();
        for arg in args {
            frame.variant_arg(arg);
        }
        if let Some(err) = frame.poison() {
            return Err(CallError::PoisonedFrame(err));
        }

        let mut error = CallErrorRaw::OK;
        let mut ret = [0u64; 3];
        let count = frame.len() as i64;
        self.with_sys(|receiver| {
            method.with_sys(|name| unsafe {
                (interface.variant_call)(
                    receiver,
                    name,
                    frame.args_ptr(),
                    count,
                    ret.as_mut_ptr().cast(),
                    &mut error,
                )
            })
        })
        .and_then(|inner| inner)
        .map_err(CallError::PoisonedFrame)?;

        let ret = Variant {
            payload: Payload::adopt(PayloadKind::Variant, ret),
        };
        CallError::check(&error)?;
        Ok(ret)
    }

    /// Evaluates `self <op> rhs`. `None` when the engine has no evaluator for
    /// the operand types.
    pub fn evaluate(&self, op: VariantOperator, rhs: &Variant) -> Option<Variant> {
        let interface = abi::interface();
        let mut valid: Bool = 0;
        let mut ret = [0u64; 3];
        self.with_sys(|a| {
            rhs.with_sys(|b| unsafe {
                (interface.variant_evaluate)(op.into(), a, b, ret.as_mut_ptr().cast(), &mut valid)
            })
        })
        .and_then(|inner| inner)
        .ok()?;

        let result = Variant {
            payload: Payload::adopt(PayloadKind::Variant, ret),
        };
        (valid != 0).then_some(result)
    }
}

impl Default for Variant {
    fn default() -> Self {
        Self::nil()
    }
}

impl PartialEq for Variant {
    fn eq(&self, other: &Self) -> bool {
        self.evaluate(VariantOperator::Equal, other)
            .and_then(|result| result.to::<bool>().ok())
            .unwrap_or(false)
    }
}

impl fmt::Debug for Variant {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Variant({}: {})", self.get_type(), self.stringify())
    }
}

impl fmt::Display for Variant {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(&self.stringify(), f)
    }
}

impl<T: ToVariant + ?Sized> From<&T> for Variant {
    fn from(value: &T) -> Self {
        value.to_variant()
    }
}

macro_rules! impl_from_by_value {
    ($($ty:ty),* $(,)?) => {
        $(
            impl From<$ty> for Variant {
                fn from(value: $ty) -> Self {
                    value.to_variant()
                }
            }
        )*
    };
}

impl_from_by_value!(bool, i64, i32, i16, i8, u32, u16, u8, f64, f32);
impl_from_by_value!(
    crate::builtin::Vector2,
    crate::builtin::Vector2i,
    crate::builtin::Vector3,
    crate::builtin::Vector3i,
    crate::builtin::Vector4,
    crate::builtin::Vector4i,
    crate::builtin::Rect2,
    crate::builtin::Rect2i,
    crate::builtin::Transform2D,
    crate::builtin::Plane,
    crate::builtin::Quaternion,
    crate::builtin::Aabb,
    crate::builtin::Basis,
    crate::builtin::Transform3D,
    crate::builtin::Projection,
    crate::builtin::Color,
    crate::builtin::Rid,
    GString,
    StringName,
);

// ============================================================================
// Pointer-call representation
// ============================================================================

impl AbiType for Variant {
    type Abi = [u64; 3];
    // Nil marks "any": a variant argument, not a typed one.
    const VARIANT_TYPE: VariantType = VariantType::Nil;
}

impl ToAbi for Variant {
    fn to_abi(&self) -> Result<[u64; 3], HandleError> {
        self.payload.raw()
    }
}

impl FromAbiReturn for Variant {
    unsafe fn from_abi_return(abi: [u64; 3]) -> Self {
        Self {
            payload: Payload::adopt(PayloadKind::Variant, widen_words(abi)),
        }
    }
}

impl FromAbiParam for Variant {
    unsafe fn from_abi_param(ptr: *const [u64; 3]) -> Self {
        unsafe { Self::from_borrowed(ptr.cast()) }
    }
}

impl IntoAbiReturn for Variant {
    unsafe fn into_abi_return(self, slot: *mut [u64; 3]) -> Result<(), HandleError> {
        let raw = self.payload.into_raw()?;
        unsafe { slot.write_unaligned(take_words(raw)) };
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::builtin::Vector3;
    use crate::test_support;

    #[test]
    fn nil_is_nil() {
        let _guard = test_support::lock();
        let v = Variant::nil();
        assert!(v.is_nil());
        assert_eq!(v.get_type(), VariantType::Nil);
    }

    #[test]
    fn wrong_type_names_both_tags() {
        let _guard = test_support::lock();
        let v = Variant::from(3i64);
        assert_eq!(
            v.to::<GString>().err(),
            Some(ConversionError::WrongType {
                expected: VariantType::String,
                actual: VariantType::Int,
            })
        );
    }

    #[test]
    fn nullable_conversion_of_nil_is_zero_and_false() {
        let _guard = test_support::lock();
        let (value, ok) = Variant::nil().try_to_nullable::<i64>();
        assert_eq!((value, ok), (0, false));
        let (value, ok) = Variant::from(9i64).try_to_nullable::<i64>();
        assert_eq!((value, ok), (9, true));
    }

    #[test]
    fn coercions_follow_engine_rules() {
        let _guard = test_support::lock();
        assert_eq!(Variant::from(-2.9f64).coerce_to_i64(), Ok(-2));
        assert_eq!(Variant::from(f64::NAN).coerce_to_i64(), Ok(0));
        assert_eq!(Variant::from(1e30f64).coerce_to_i64(), Ok(i64::MAX));
        assert_eq!(Variant::from(1i64 << 52).coerce_to_f64(), Ok(4503599627370496.0));
        assert!(Variant::from("x").coerce_to_f64().is_err());
    }

    #[test]
    fn stringify_and_equality_go_through_the_engine() {
        let _guard = test_support::lock();
        assert_eq!(Variant::from(42i64).stringify(), "42");
        assert_eq!(Variant::from("hi"), Variant::from(&GString::from("hi")));
        assert_ne!(Variant::from(1i64), Variant::from(2i64));
    }

    #[test]
    fn evaluate_adds_vectors() {
        let _guard = test_support::lock();
        let a = Variant::from(Vector3::new(1.0, 2.0, 3.0));
        let b = Variant::from(Vector3::ONE);
        let sum = a.evaluate(VariantOperator::Add, &b).unwrap();
        assert_eq!(sum.to::<Vector3>(), Ok(Vector3::new(2.0, 3.0, 4.0)));
        assert!(a.evaluate(VariantOperator::Add, &Variant::from("x")).is_none());
    }

    #[test]
    fn variant_call_on_a_string() {
        let _guard = test_support::lock();
        let v = Variant::from("abc");
        let len = v.call("length", &[]).unwrap();
        assert_eq!(len.to::<i64>(), Ok(3));
        assert_eq!(v.call("nope", &[]).err(), Some(CallError::InvalidMethod));
    }
}
