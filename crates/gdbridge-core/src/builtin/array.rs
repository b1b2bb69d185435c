use std::fmt;

use crate::abi;
use crate::builtin::{ContainerMethod, PayloadType, impl_payload_type};
use crate::dispatch;
use crate::frame::CallFrame;
use crate::handle::{Payload, PayloadKind};
use crate::variant::{ToVariant, Variant};

/// Untyped engine array of variants.
#[derive(Clone)]
pub struct VariantArray {
    payload: Payload,
}

impl_payload_type!(VariantArray, Array, 1);

impl VariantArray {
    pub fn new() -> Self {
        Self {
            payload: Payload::new_default(PayloadKind::Array),
        }
    }

    pub fn len(&self) -> usize {
        let size: i64 = dispatch::builtin_call_on(self, ContainerMethod::ArraySize.get(), CallFrame::new())
            .unwrap_or(0);
        usize::try_from(size).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// A copy of the element at `index`.
    pub fn get(&self, index: usize) -> Option<Variant> {
        let interface = abi::interface();
        let index = i64::try_from(index).ok()?;
        self.with_sys(|array| unsafe {
            let element = (interface.array_operator_index_const)(array, index);
            (!element.is_null()).then(|| Variant::from_borrowed(element))
        })
        .ok()
        .flatten()
    }

    /// Replaces the element at `index`. Returns `false` when out of range.
    pub fn set(&mut self, index: usize, value: &Variant) -> bool {
        let interface = abi::interface();
        let Ok(index) = i64::try_from(index) else {
            return false;
        };
        let Ok(source) = value.payload().raw() else {
            return false;
        };
        self.with_sys(|array| unsafe {
            let element = (interface.array_operator_index)(array, index);
            if element.is_null() {
                return false;
            }
            (interface.variant_destroy)(element);
            (interface.variant_new_copy)(element, source.as_ptr().cast());
            true
        })
        .unwrap_or(false)
    }

    pub fn push(&mut self, value: &Variant) {
        let mut frame = CallFrame::new();
        frame.variant_arg(value);
        if let Err(err) =
            dispatch::builtin_call_on::<_, ()>(self, ContainerMethod::ArrayPushBack.get(), frame)
        {
            tracing::warn!(target: "gdbridge::dispatch", %err, "array push failed");
        }
    }

    pub fn resize(&mut self, len: usize) {
        let mut frame = CallFrame::new();
        frame.arg(i64::try_from(len).unwrap_or(i64::MAX));
        if let Err(err) =
            dispatch::builtin_call_on::<_, i64>(self, ContainerMethod::ArrayResize.get(), frame)
        {
            tracing::warn!(target: "gdbridge::dispatch", %err, "array resize failed");
        }
    }

    pub fn clear(&mut self) {
        if let Err(err) =
            dispatch::builtin_call_on::<_, ()>(self, ContainerMethod::ArrayClear.get(), CallFrame::new())
        {
            tracing::warn!(target: "gdbridge::dispatch", %err, "array clear failed");
        }
    }

    /// Copies of the elements, in order.
    pub fn iter(&self) -> impl Iterator<Item = Variant> + '_ {
        (0..self.len()).filter_map(|index| self.get(index))
    }

    pub fn to_vec(&self) -> Vec<Variant> {
        self.iter().collect()
    }
}

impl Default for VariantArray {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: ToVariant> FromIterator<T> for VariantArray {
    fn from_iter<I: IntoIterator<Item = T>>(iter: I) -> Self {
        let mut array = Self::new();
        for value in iter {
            array.push(&value.to_variant());
        }
        array
    }
}

impl PartialEq for VariantArray {
    fn eq(&self, other: &Self) -> bool {
        self.to_vec() == other.to_vec()
    }
}

impl fmt::Debug for VariantArray {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_list().entries(self.iter()).finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support;

    #[test]
    fn push_get_set_len() {
        let _guard = test_support::lock();
        let mut array = VariantArray::new();
        assert!(array.is_empty());
        array.push(&Variant::from(1i64));
        array.push(&Variant::from("two"));
        assert_eq!(array.len(), 2);
        assert_eq!(array.get(1).unwrap().to::<String>().unwrap(), "two");
        assert!(array.set(0, &Variant::from(10i64)));
        assert_eq!(array.get(0).unwrap().to::<i64>(), Ok(10));
        assert!(!array.set(5, &Variant::nil()));
        assert!(array.get(2).is_none());
    }

    #[test]
    fn collect_and_clear() {
        let _guard = test_support::lock();
        let mut array: VariantArray = [1i64, 2, 3].into_iter().collect();
        let values: Vec<i64> = array.iter().map(|v| v.to::<i64>().unwrap()).collect();
        assert_eq!(values, vec![1, 2, 3]);
        array.resize(5);
        assert!(array.get(4).unwrap().is_nil());
        array.clear();
        assert!(array.is_empty());
    }
}
