//! Host value ⇄ [`Variant`] conversions.
//!
//! ## Supported types
//!
//! - Scalars: `bool`, all integers up to `i64` (range-checked on the way
//!   out), `f32`, `f64`
//! - Every math POD, [`Rid`](crate::builtin::Rid)
//! - Strings: [`GString`], `String`, `&str`, [`StringName`], [`NodePath`]
//! - Containers, callables, signals, packed arrays
//! - Objects (see [`crate::object`]), `Option<T>` for any of the above

use crate::builtin::{
    Callable, Dictionary, GString, NodePath, PackedArray, PackedElement, Signal, StringName,
    VariantArray,
};
use crate::error::ConversionError;
use crate::marshal::{FromAbiReturn, ToAbi};
use crate::variant::Variant;
use gdbridge_sys::VariantType;

pub trait ToVariant {
    fn to_variant(&self) -> Variant;
}

pub trait FromVariant: Sized {
    fn try_from_variant(variant: &Variant) -> Result<Self, ConversionError>;
}

/// Wraps any type with a pointer-call form; a dead handle becomes nil.
pub(crate) fn abi_to_variant<T: ToAbi + ?Sized>(value: &T) -> Variant {
    match value.to_abi() {
        Ok(abi) => Variant::from_typed(T::VARIANT_TYPE, abi),
        Err(err) => {
            tracing::warn!(target: "gdbridge::handle", %err, "converting a dead handle yields nil");
            Variant::nil()
        }
    }
}

pub(crate) fn abi_from_variant<T: FromAbiReturn>(variant: &Variant) -> Result<T, ConversionError> {
    let abi = variant.to_typed::<T::Abi>(T::VARIANT_TYPE)?;
    Ok(unsafe { T::from_abi_return(abi) })
}

macro_rules! impl_variant_via_abi {
    ($($ty:ty),* $(,)?) => {
        $(
            impl ToVariant for $ty {
                fn to_variant(&self) -> Variant {
                    abi_to_variant(self)
                }
            }

            impl FromVariant for $ty {
                fn try_from_variant(variant: &Variant) -> Result<Self, ConversionError> {
                    abi_from_variant(variant)
                }
            }
        )*
    };
}

impl_variant_via_abi!(bool, i64, f64);
impl_variant_via_abi!(
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
);
impl_variant_via_abi!(
    GString,
    StringName,
    NodePath,
    VariantArray,
    Dictionary,
    Callable,
    Signal,
);

impl<T: PackedElement> ToVariant for PackedArray<T> {
    fn to_variant(&self) -> Variant {
        abi_to_variant(self)
    }
}

impl<T: PackedElement> FromVariant for PackedArray<T> {
    fn try_from_variant(variant: &Variant) -> Result<Self, ConversionError> {
        abi_from_variant(variant)
    }
}

// ============================================================================
// Narrow numbers
// ============================================================================

macro_rules! impl_variant_narrow_int {
    ($($ty:ty),*) => {
        $(
            impl ToVariant for $ty {
                fn to_variant(&self) -> Variant {
                    i64::from(*self).to_variant()
                }
            }

            impl FromVariant for $ty {
                fn try_from_variant(variant: &Variant) -> Result<Self, ConversionError> {
                    let value = i64::try_from_variant(variant)?;
                    <$ty>::try_from(value).map_err(|_| ConversionError::IntegerOverflow {
                        value,
                        target: stringify!($ty),
                    })
                }
            }
        )*
    };
}

impl_variant_narrow_int!(i32, i16, i8, u32, u16, u8);

impl ToVariant for f32 {
    fn to_variant(&self) -> Variant {
        f64::from(*self).to_variant()
    }
}

impl FromVariant for f32 {
    fn try_from_variant(variant: &Variant) -> Result<Self, ConversionError> {
        f64::try_from_variant(variant).map(|value| value as f32)
    }
}

// ============================================================================
// Rust strings
// ============================================================================

impl ToVariant for str {
    fn to_variant(&self) -> Variant {
        GString::from(self).to_variant()
    }
}

impl ToVariant for String {
    fn to_variant(&self) -> Variant {
        self.as_str().to_variant()
    }
}

impl FromVariant for String {
    fn try_from_variant(variant: &Variant) -> Result<Self, ConversionError> {
        GString::try_from_variant(variant)?.try_to_string()
    }
}

// ============================================================================
// Variant and Option
// ============================================================================

impl ToVariant for Variant {
    fn to_variant(&self) -> Variant {
        self.clone()
    }
}

/// A method without a return value answers a variant-call with nil.
impl ToVariant for () {
    fn to_variant(&self) -> Variant {
        Variant::nil()
    }
}

impl FromVariant for Variant {
    fn try_from_variant(variant: &Variant) -> Result<Self, ConversionError> {
        Ok(variant.clone())
    }
}

impl<T: ToVariant> ToVariant for Option<T> {
    fn to_variant(&self) -> Variant {
        match self {
            Some(value) => value.to_variant(),
            None => Variant::nil(),
        }
    }
}

impl<T: FromVariant> FromVariant for Option<T> {
    fn try_from_variant(variant: &Variant) -> Result<Self, ConversionError> {
        if variant.get_type() == VariantType::Nil {
            Ok(None)
        } else {
            T::try_from_variant(variant).map(Some)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::builtin::{Color, Projection, Transform3D, Vector2i, Vector3};
    use crate::test_support;

    fn round_trip<T: ToVariant + FromVariant + PartialEq + std::fmt::Debug>(value: T, tag: VariantType) {
        let variant = value.to_variant();
        assert_eq!(variant.get_type(), tag);
        assert_eq!(T::try_from_variant(&variant).unwrap(), value);
    }

    #[test]
    fn scalars_round_trip() {
        let _guard = test_support::lock();
        round_trip(true, VariantType::Bool);
        round_trip(i64::MIN, VariantType::Int);
        round_trip(-7i8, VariantType::Int);
        round_trip(u32::MAX, VariantType::Int);
        round_trip(0.1f64, VariantType::Float);
        round_trip(0.25f32, VariantType::Float);
    }

    #[test]
    fn pods_round_trip() {
        let _guard = test_support::lock();
        round_trip(Vector3::new(1.0, -2.0, 3.5), VariantType::Vector3);
        round_trip(Vector2i::new(4, -4), VariantType::Vector2i);
        round_trip(Color::rgb(0.2, 0.4, 0.6), VariantType::Color);
        round_trip(Transform3D::IDENTITY, VariantType::Transform3D);
        round_trip(Projection::IDENTITY, VariantType::Projection);
    }

    #[test]
    fn strings_round_trip() {
        let _guard = test_support::lock();
        round_trip(String::from("ünïcode"), VariantType::String);
        round_trip(GString::from("engine"), VariantType::String);
        round_trip(StringName::from("name"), VariantType::StringName);
        round_trip(NodePath::from("a/b"), VariantType::NodePath);
    }

    #[test]
    fn narrowing_checks_range() {
        let _guard = test_support::lock();
        let big = Variant::from(300i64);
        assert_eq!(
            big.to::<u8>(),
            Err(ConversionError::IntegerOverflow {
                value: 300,
                target: "u8",
            })
        );
        assert_eq!(big.to::<i16>(), Ok(300));
    }

    #[test]
    fn option_maps_nil_to_none() {
        let _guard = test_support::lock();
        assert_eq!(Variant::nil().to::<Option<i64>>(), Ok(None));
        assert_eq!(Variant::from(5i64).to::<Option<i64>>(), Ok(Some(5)));
        assert!(None::<i64>.to_variant().is_nil());
        assert_eq!(
            Variant::nil().to::<i64>(),
            Err(ConversionError::NilToNonNullable {
                expected: VariantType::Int,
            })
        );
    }
}
