//! Contiguous typed arrays.
//!
//! Each handle is an exclusive owner: a clone goes through the engine copy
//! constructor, even if the engine could share the buffer lazily.

use std::ffi::c_void;
use std::fmt;
use std::marker::PhantomData;

use gdbridge_sys::VariantType;

use crate::abi;
use crate::builtin::{Color, ContainerMethod, GString, PayloadType, Vector2, Vector3, Vector4};
use crate::dispatch;
use crate::error::HandleError;
use crate::frame::CallFrame;
use crate::handle::{Payload, PayloadKind};
use crate::marshal::{
    AbiType, FromAbiParam, FromAbiReturn, IntoAbiReturn, ToAbi, take_words, widen_words,
};

/// An element type with a packed array counterpart.
pub trait PackedElement: Sized {
    const ARRAY_TYPE: VariantType;
    const KIND: PayloadKind;

    /// # Safety
    ///
    /// `ptr` must point at a live element.
    unsafe fn read(ptr: *const c_void) -> Self;

    /// Overwrites the element at `ptr`.
    ///
    /// # Safety
    ///
    /// `ptr` must point at a live element.
    unsafe fn write(&self, ptr: *mut c_void) -> Result<(), HandleError>;
}

macro_rules! impl_packed_pod {
    ($($ty:ty => $array:ident),* $(,)?) => {
        $(
            impl PackedElement for $ty {
                const ARRAY_TYPE: VariantType = VariantType::$array;
                const KIND: PayloadKind = PayloadKind::$array;

                unsafe fn read(ptr: *const c_void) -> Self {
                    unsafe { ptr.cast::<$ty>().read_unaligned() }
                }

                unsafe fn write(&self, ptr: *mut c_void) -> Result<(), HandleError> {
                    unsafe { ptr.cast::<$ty>().write_unaligned(*self) };
                    Ok(())
                }
            }
        )*
    };
}

impl_packed_pod! {
    u8 => PackedByteArray,
    i32 => PackedInt32Array,
    i64 => PackedInt64Array,
    f32 => PackedFloat32Array,
    f64 => PackedFloat64Array,
    Vector2 => PackedVector2Array,
    Vector3 => PackedVector3Array,
    Color => PackedColorArray,
    Vector4 => PackedVector4Array,
}

impl PackedElement for GString {
    const ARRAY_TYPE: VariantType = VariantType::PackedStringArray;
    const KIND: PayloadKind = PayloadKind::PackedStringArray;

    unsafe fn read(ptr: *const c_void) -> Self {
        unsafe { GString::from_abi_param(ptr.cast()) }
    }

    unsafe fn write(&self, ptr: *mut c_void) -> Result<(), HandleError> {
        let source = self.to_abi()?;
        let lifecycle = abi::interface().builtin(VariantType::String);
        if let (Some(destroy), Some(copy)) = (lifecycle.destroy, lifecycle.construct_copy) {
            unsafe {
                destroy(ptr);
                copy(ptr, [source.as_ptr().cast::<c_void>()].as_ptr());
            }
        }
        Ok(())
    }
}

/// Engine packed array of `T`.
pub struct PackedArray<T: PackedElement> {
    payload: Payload,
    _element: PhantomData<T>,
}

pub type PackedByteArray = PackedArray<u8>;
pub type PackedInt32Array = PackedArray<i32>;
pub type PackedInt64Array = PackedArray<i64>;
pub type PackedFloat32Array = PackedArray<f32>;
pub type PackedFloat64Array = PackedArray<f64>;
pub type PackedStringArray = PackedArray<GString>;
pub type PackedVector2Array = PackedArray<Vector2>;
pub type PackedVector3Array = PackedArray<Vector3>;
pub type PackedColorArray = PackedArray<Color>;
pub type PackedVector4Array = PackedArray<Vector4>;

impl<T: PackedElement> PackedArray<T> {
    pub fn new() -> Self {
        Self::from_payload(Payload::new_default(T::KIND))
    }

    /// A new array holding copies of `items`.
    pub fn from_slice(items: &[T]) -> Self {
        #[cfg(feature = "profiling")]
        profiling::scope!("PackedArray::from_slice");

        let mut array = Self::new();
        array.resize(items.len());
        let accessor = abi::interface().packed(T::ARRAY_TYPE).index;
        let written = array.with_sys(|base| {
            for (index, item) in items.iter().enumerate() {
                let slot = unsafe { accessor(base, index as i64) };
                if slot.is_null() {
                    tracing::warn!(target: "gdbridge::handle", index, "packed array shorter than requested");
                    break;
                }
                unsafe { item.write(slot)? };
            }
            Ok::<(), HandleError>(())
        });
        if let Err(err) = written.and_then(|inner| inner) {
            tracing::warn!(target: "gdbridge::handle", %err, "packed array fill incomplete");
        }
        array
    }

    /// Copies of every element.
    pub fn to_vec(&self) -> Vec<T> {
        #[cfg(feature = "profiling")]
        profiling::scope!("PackedArray::to_vec");

        let len = self.len();
        let accessor = abi::interface().packed(T::ARRAY_TYPE).index_const;
        self.with_sys(|base| {
            (0..len)
                .map_while(|index| unsafe {
                    let slot = accessor(base, index as i64);
                    (!slot.is_null()).then(|| T::read(slot))
                })
                .collect()
        })
        .unwrap_or_default()
    }

    pub fn len(&self) -> usize {
        let size: i64 = dispatch::builtin_call_on(
            self,
            ContainerMethod::PackedSize(T::ARRAY_TYPE).get(),
            CallFrame::new(),
        )
        .unwrap_or(0);
        usize::try_from(size).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn get(&self, index: usize) -> Option<T> {
        let accessor = abi::interface().packed(T::ARRAY_TYPE).index_const;
        let index = i64::try_from(index).ok()?;
        self.with_sys(|base| unsafe {
            let slot = accessor(base, index);
            (!slot.is_null()).then(|| T::read(slot))
        })
        .ok()
        .flatten()
    }

    /// Overwrites the element at `index`.
    ///
    /// # Panics
    ///
    /// If `index` is out of range.
    pub fn set(&mut self, index: usize, value: &T) {
        let accessor = abi::interface().packed(T::ARRAY_TYPE).index;
        let len = self.len();
        assert!(index < len, "packed array index {index} out of range for length {len}");
        let result = self.with_sys(|base| unsafe { value.write(accessor(base, index as i64)) });
        if let Err(err) = result.and_then(|inner| inner) {
            tracing::warn!(target: "gdbridge::handle", %err, "packed array set failed");
        }
    }

    pub fn push(&mut self, value: &T) {
        let len = self.len();
        self.resize(len + 1);
        self.set(len, value);
    }

    /// Grows with default elements or truncates.
    pub fn resize(&mut self, len: usize) {
        let mut frame = CallFrame::new();
        frame.arg(i64::try_from(len).unwrap_or(i64::MAX));
        if let Err(err) = dispatch::builtin_call_on::<_, i64>(
            self,
            ContainerMethod::PackedResize(T::ARRAY_TYPE).get(),
            frame,
        ) {
            tracing::warn!(target: "gdbridge::dispatch", %err, "packed array resize failed");
        }
    }
}

impl<T: PackedElement> Default for PackedArray<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: PackedElement> Clone for PackedArray<T> {
    fn clone(&self) -> Self {
        Self::from_payload(self.payload.clone())
    }
}

impl<T: PackedElement + PartialEq> PartialEq for PackedArray<T> {
    fn eq(&self, other: &Self) -> bool {
        self.to_vec() == other.to_vec()
    }
}

impl<T: PackedElement + fmt::Debug> fmt::Debug for PackedArray<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_list().entries(self.to_vec()).finish()
    }
}

impl<T: PackedElement> FromIterator<T> for PackedArray<T> {
    fn from_iter<I: IntoIterator<Item = T>>(iter: I) -> Self {
        let items: Vec<T> = iter.into_iter().collect();
        Self::from_slice(&items)
    }
}

// ============================================================================
// Registry and pointer-call plumbing
// ============================================================================

impl<T: PackedElement> PayloadType for PackedArray<T> {
    const KIND: PayloadKind = T::KIND;

    fn payload(&self) -> &Payload {
        &self.payload
    }

    fn from_payload(payload: Payload) -> Self {
        debug_assert_eq!(payload.kind(), T::KIND);
        Self {
            payload,
            _element: PhantomData,
        }
    }

    fn into_payload(self) -> Payload {
        self.payload
    }
}

impl<T: PackedElement> AbiType for PackedArray<T> {
    type Abi = [u64; 2];
    const VARIANT_TYPE: VariantType = T::ARRAY_TYPE;
}

impl<T: PackedElement> ToAbi for PackedArray<T> {
    fn to_abi(&self) -> Result<[u64; 2], HandleError> {
        Ok(take_words(self.payload.raw()?))
    }
}

impl<T: PackedElement> FromAbiReturn for PackedArray<T> {
    unsafe fn from_abi_return(abi: [u64; 2]) -> Self {
        Self::from_payload(Payload::adopt(T::KIND, widen_words(abi)))
    }
}

impl<T: PackedElement> FromAbiParam for PackedArray<T> {
    unsafe fn from_abi_param(ptr: *const [u64; 2]) -> Self {
        Self::from_payload(unsafe { Payload::copy_from(T::KIND, ptr.cast()) })
    }
}

impl<T: PackedElement> IntoAbiReturn for PackedArray<T> {
    unsafe fn into_abi_return(self, slot: *mut [u64; 2]) -> Result<(), HandleError> {
        let raw = self.payload.into_raw()?;
        unsafe { slot.write_unaligned(take_words(raw)) };
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support;
    use crate::variant::Variant;

    #[test]
    fn empty_array_is_live_and_freeable() {
        let _guard = test_support::lock();
        let before = crate::handle::stats().kind(PayloadKind::PackedVector3Array);
        let empty = PackedVector3Array::from_slice(&[]);
        assert!(empty.is_empty());
        assert!(empty.to_vec().is_empty());
        assert!(crate::handle::is_live(empty.payload().handle()));
        drop(empty);
        let after = crate::handle::stats().kind(PayloadKind::PackedVector3Array);
        assert_eq!(after.created - before.created, after.ended - before.ended);
    }

    #[test]
    fn every_element_type_round_trips() {
        let _guard = test_support::lock();
        assert_eq!(PackedByteArray::from_slice(&[0, 255, 7]).to_vec(), [0, 255, 7]);
        assert_eq!(PackedInt32Array::from_slice(&[i32::MIN, 3]).to_vec(), [i32::MIN, 3]);
        assert_eq!(PackedInt64Array::from_slice(&[i64::MAX]).to_vec(), [i64::MAX]);
        assert_eq!(PackedFloat32Array::from_slice(&[0.5, -1.0]).to_vec(), [0.5, -1.0]);
        assert_eq!(PackedFloat64Array::from_slice(&[1e300]).to_vec(), [1e300]);
        assert_eq!(
            PackedVector2Array::from_slice(&[Vector2::new(1.0, 2.0)]).to_vec(),
            [Vector2::new(1.0, 2.0)]
        );
        assert_eq!(
            PackedColorArray::from_slice(&[Color::WHITE, Color::BLACK]).to_vec(),
            [Color::WHITE, Color::BLACK]
        );
        assert_eq!(
            PackedVector4Array::from_slice(&[Vector4::new(1.0, 2.0, 3.0, 4.0)]).to_vec(),
            [Vector4::new(1.0, 2.0, 3.0, 4.0)]
        );
        let strings = vec![GString::from("a"), GString::from("ü")];
        assert_eq!(PackedStringArray::from_slice(&strings).to_vec(), strings);
    }

    #[test]
    fn push_set_get() {
        let _guard = test_support::lock();
        let mut array = PackedInt64Array::new();
        array.push(&1);
        array.push(&2);
        array.set(0, &10);
        assert_eq!(array.get(0), Some(10));
        assert_eq!(array.get(1), Some(2));
        assert_eq!(array.get(2), None);
        assert_eq!(array.len(), 2);
    }

    #[test]
    #[should_panic(expected = "out of range")]
    fn set_out_of_range_panics() {
        let _guard = test_support::lock();
        let mut array = PackedByteArray::new();
        array.set(0, &1);
    }

    #[test]
    fn variant_round_trip_of_vectors() {
        let _guard = test_support::lock();
        let points: Vec<Vector3> = (0..1024)
            .map(|i| Vector3::new(i as f32, 2.0 * i as f32, 3.0 * i as f32))
            .collect();
        let array = PackedVector3Array::from_slice(&points);
        let variant = Variant::from(&array);
        assert_eq!(variant.get_type(), VariantType::PackedVector3Array);
        let back: PackedVector3Array = variant.to().unwrap();
        assert_eq!(back.to_vec(), points);
    }
}
