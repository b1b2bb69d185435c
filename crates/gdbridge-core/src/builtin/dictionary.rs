use std::fmt;

use crate::abi;
use crate::builtin::{ContainerMethod, PayloadType, VariantArray, impl_payload_type};
use crate::dispatch;
use crate::frame::CallFrame;
use crate::handle::{Payload, PayloadKind};
use crate::variant::Variant;

/// Engine dictionary keyed and valued by variants. Iteration order is
/// insertion order, as the engine keeps it.
#[derive(Clone)]
pub struct Dictionary {
    payload: Payload,
}

impl_payload_type!(Dictionary, Dictionary, 1);

impl Dictionary {
    pub fn new() -> Self {
        Self {
            payload: Payload::new_default(PayloadKind::Dictionary),
        }
    }

    pub fn len(&self) -> usize {
        let size: i64 =
            dispatch::builtin_call_on(self, ContainerMethod::DictionarySize.get(), CallFrame::new())
                .unwrap_or(0);
        usize::try_from(size).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn get(&self, key: &Variant) -> Option<Variant> {
        let interface = abi::interface();
        let key = key.payload().raw().ok()?;
        self.with_sys(|dict| unsafe {
            let value = (interface.dictionary_operator_index_const)(dict, key.as_ptr().cast());
            (!value.is_null()).then(|| Variant::from_borrowed(value))
        })
        .ok()
        .flatten()
    }

    /// Inserts or replaces the value under `key`.
    pub fn insert(&mut self, key: &Variant, value: &Variant) {
        let interface = abi::interface();
        let (Ok(key), Ok(value)) = (key.payload().raw(), value.payload().raw()) else {
            tracing::warn!(target: "gdbridge::handle", "dictionary insert with a dead key or value");
            return;
        };
        let result = self.with_sys(|dict| unsafe {
            let slot = (interface.dictionary_operator_index)(dict, key.as_ptr().cast());
            if !slot.is_null() {
                (interface.variant_destroy)(slot);
                (interface.variant_new_copy)(slot, value.as_ptr().cast());
            }
        });
        if let Err(err) = result {
            tracing::warn!(target: "gdbridge::handle", %err, "dictionary insert on a dead handle");
        }
    }

    pub fn contains_key(&self, key: &Variant) -> bool {
        let mut frame = CallFrame::new();
        frame.variant_arg(key);
        dispatch::builtin_call_on(self, ContainerMethod::DictionaryHas.get(), frame).unwrap_or(false)
    }

    /// Removes `key`, returning its value if it was present.
    pub fn remove(&mut self, key: &Variant) -> Option<Variant> {
        let value = self.get(key)?;
        let mut frame = CallFrame::new();
        frame.variant_arg(key);
        let erased: bool =
            dispatch::builtin_call_on(self, ContainerMethod::DictionaryErase.get(), frame).ok()?;
        erased.then_some(value)
    }

    pub fn keys(&self) -> VariantArray {
        dispatch::builtin_call_on(self, ContainerMethod::DictionaryKeys.get(), CallFrame::new())
            .unwrap_or_default()
    }

    pub fn clear(&mut self) {
        if let Err(err) =
            dispatch::builtin_call_on::<_, ()>(self, ContainerMethod::DictionaryClear.get(), CallFrame::new())
        {
            tracing::warn!(target: "gdbridge::dispatch", %err, "dictionary clear failed");
        }
    }

    /// `(key, value)` copies in engine order.
    pub fn iter(&self) -> impl Iterator<Item = (Variant, Variant)> + '_ {
        self.keys()
            .to_vec()
            .into_iter()
            .filter_map(|key| self.get(&key).map(|value| (key, value)))
    }
}

impl Default for Dictionary {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for Dictionary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_map().entries(self.iter()).finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support;

    #[test]
    fn insert_get_remove() {
        let _guard = test_support::lock();
        let mut dict = Dictionary::new();
        let key = Variant::from("radius");
        dict.insert(&key, &Variant::from(2.0f64));
        dict.insert(&Variant::from(7i64), &Variant::from(true));
        assert_eq!(dict.len(), 2);
        assert!(dict.contains_key(&key));
        assert_eq!(dict.get(&key).unwrap().to::<f64>(), Ok(2.0));

        dict.insert(&key, &Variant::from(3.0f64));
        assert_eq!(dict.len(), 2);
        assert_eq!(dict.remove(&key).unwrap().to::<f64>(), Ok(3.0));
        assert!(!dict.contains_key(&key));
        assert!(dict.remove(&key).is_none());
    }

    #[test]
    fn keys_keep_insertion_order() {
        let _guard = test_support::lock();
        let mut dict = Dictionary::new();
        for name in ["c", "a", "b"] {
            dict.insert(&Variant::from(name), &Variant::nil());
        }
        let keys: Vec<String> = dict.keys().iter().map(|k| k.to::<String>().unwrap()).collect();
        assert_eq!(keys, ["c", "a", "b"]);
        dict.clear();
        assert!(dict.is_empty());
    }
}
