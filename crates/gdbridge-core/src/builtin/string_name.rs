use std::fmt;
use std::hash::{Hash, Hasher};

use crate::abi;
use crate::builtin::{GString, PayloadType, construct_with, impl_payload_type};
use crate::handle::{Payload, PayloadKind};

/// Interned engine name, used for class, method, property and signal names.
#[derive(Clone)]
pub struct StringName {
    payload: Payload,
}

impl_payload_type!(StringName, StringName, 1);

impl StringName {
    pub fn new() -> Self {
        Self {
            payload: Payload::new_default(PayloadKind::StringName),
        }
    }

    pub fn to_gstring(&self) -> GString {
        GString::from(self)
    }
}

impl Default for StringName {
    fn default() -> Self {
        Self::new()
    }
}

impl From<&str> for StringName {
    fn from(text: &str) -> Self {
        let interface = abi::interface();
        let len = i64::try_from(text.len()).unwrap_or(i64::MAX);
        let payload = unsafe {
            Payload::construct(PayloadKind::StringName, |dest| {
                (interface.string_name_new_with_utf8_chars_and_len)(dest, text.as_ptr().cast(), len)
            })
        };
        Self { payload }
    }
}

impl From<&GString> for StringName {
    fn from(text: &GString) -> Self {
        let ctor = abi::interface().conversions.name_from_string;
        Self::from_payload(construct_with(PayloadKind::StringName, ctor, text.payload()))
    }
}

impl fmt::Display for StringName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(&self.to_gstring(), f)
    }
}

impl fmt::Debug for StringName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "&{:?}", self.to_string())
    }
}

impl PartialEq for StringName {
    fn eq(&self, other: &Self) -> bool {
        self.to_gstring() == other.to_gstring()
    }
}

impl Eq for StringName {}

impl PartialEq<&str> for StringName {
    fn eq(&self, other: &&str) -> bool {
        self.to_gstring() == *other
    }
}

impl Hash for StringName {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.to_string().hash(state);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support;

    #[test]
    fn names_convert_through_strings() {
        let _guard = test_support::lock();
        let name = StringName::from("_redraw");
        let text = name.to_gstring();
        assert_eq!(text, "_redraw");
        assert_eq!(StringName::from(&text), name);
    }

    #[test]
    fn with_sys_exposes_the_engine_value() {
        let _guard = test_support::lock();
        let name = StringName::from("get_radius");
        let ptr = name.with_sys(|ptr| ptr as usize).unwrap();
        assert_ne!(ptr, 0);
    }
}
