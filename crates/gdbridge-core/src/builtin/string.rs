use std::fmt;

use crate::abi;
use crate::builtin::{NodePath, PayloadType, StringName, construct_with, impl_payload_type};
use crate::error::ConversionError;
use crate::handle::{Payload, PayloadKind};

/// Engine string. Stored by the engine as UTF-32; converted losslessly to and
/// from Rust's UTF-8.
#[derive(Clone)]
pub struct GString {
    payload: Payload,
}

impl_payload_type!(GString, String, 1);

impl GString {
    pub fn new() -> Self {
        Self {
            payload: Payload::new_default(PayloadKind::String),
        }
    }

    /// Number of code points.
    pub fn len(&self) -> usize {
        let interface = abi::interface();
        self.with_sys(|ptr| unsafe {
            (interface.string_to_utf32_chars)(ptr, std::ptr::null_mut(), 0)
        })
        .map_or(0, |len| usize::try_from(len).unwrap_or(0))
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn chars(&self) -> Vec<char> {
        let interface = abi::interface();
        let units = self
            .with_sys(|ptr| unsafe {
                let len = (interface.string_to_utf32_chars)(ptr, std::ptr::null_mut(), 0);
                let mut buf = vec![0u32; usize::try_from(len).unwrap_or(0)];
                (interface.string_to_utf32_chars)(ptr, buf.as_mut_ptr(), len);
                buf
            })
            .unwrap_or_default();
        units.into_iter().filter_map(char::from_u32).collect()
    }

    /// Converts to a Rust string.
    ///
    /// Fails on a dead handle or when the engine string holds code points
    /// that do not encode (lone surrogates).
    pub fn try_to_string(&self) -> Result<String, ConversionError> {
        let interface = abi::interface();
        let bytes = self.with_sys(|ptr| unsafe {
            let len = (interface.string_to_utf8_chars)(ptr, std::ptr::null_mut(), 0);
            let mut buf = vec![0u8; usize::try_from(len).unwrap_or(0)];
            (interface.string_to_utf8_chars)(ptr, buf.as_mut_ptr().cast(), len);
            buf
        })?;
        String::from_utf8(bytes).map_err(|_| ConversionError::InvalidUtf8)
    }
}

impl Default for GString {
    fn default() -> Self {
        Self::new()
    }
}

impl From<&str> for GString {
    fn from(text: &str) -> Self {
        let interface = abi::interface();
        let len = i64::try_from(text.len()).unwrap_or(i64::MAX);
        let payload = unsafe {
            Payload::construct(PayloadKind::String, |dest| {
                (interface.string_new_with_utf8_chars_and_len)(dest, text.as_ptr().cast(), len)
            })
        };
        Self { payload }
    }
}

impl From<&String> for GString {
    fn from(text: &String) -> Self {
        Self::from(text.as_str())
    }
}

impl From<String> for GString {
    fn from(text: String) -> Self {
        Self::from(text.as_str())
    }
}

impl From<&StringName> for GString {
    fn from(name: &StringName) -> Self {
        let ctor = abi::interface().conversions.string_from_name;
        Self::from_payload(construct_with(PayloadKind::String, ctor, name.payload()))
    }
}

impl From<&NodePath> for GString {
    fn from(path: &NodePath) -> Self {
        let ctor = abi::interface().conversions.string_from_path;
        Self::from_payload(construct_with(PayloadKind::String, ctor, path.payload()))
    }
}

impl fmt::Display for GString {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let text: String = self.chars().into_iter().collect();
        f.write_str(&text)
    }
}

impl fmt::Debug for GString {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "GString({:?})", self.to_string())
    }
}

impl PartialEq for GString {
    fn eq(&self, other: &Self) -> bool {
        self.chars() == other.chars()
    }
}

impl Eq for GString {}

impl PartialEq<str> for GString {
    fn eq(&self, other: &str) -> bool {
        self.chars().into_iter().eq(other.chars())
    }
}

impl PartialEq<&str> for GString {
    fn eq(&self, other: &&str) -> bool {
        self == *other
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support;

    #[test]
    fn utf8_round_trips_through_utf32() {
        let _guard = test_support::lock();
        let text = "héllo wörld ✓ 🎮";
        let s = GString::from(text);
        assert_eq!(s.try_to_string().unwrap(), text);
        assert_eq!(s.len(), text.chars().count());
    }

    #[test]
    fn empty_strings_get_distinct_handles() {
        let _guard = test_support::lock();
        let a = GString::new();
        let b = GString::from("");
        assert!(a.is_empty() && b.is_empty());
        assert_ne!(a.payload().handle(), b.payload().handle());
        assert_eq!(a, b);
    }

    #[test]
    fn clone_survives_original_drop() {
        let _guard = test_support::lock();
        let a = GString::from("copy me");
        let b = a.clone();
        drop(a);
        assert_eq!(b, "copy me");
    }

    #[test]
    fn dead_handle_reports_stale() {
        let _guard = test_support::lock();
        let s = GString::from("gone");
        let (mut raw, _) = crate::handle::end(s.payload().handle());
        assert!(matches!(
            s.try_to_string(),
            Err(ConversionError::Handle(crate::HandleError::Stale { .. }))
        ));
        // free the engine value ourselves; dropping `s` only logs
        unsafe {
            let dtor = abi::interface()
                .builtin(crate::VariantType::String)
                .destroy
                .unwrap();
            dtor(raw.as_mut_ptr().cast());
        }
    }
}
