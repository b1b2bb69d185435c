use std::fmt;

use crate::abi;
use crate::builtin::{GString, PayloadType, construct_with, impl_payload_type};
use crate::handle::{Payload, PayloadKind};

/// Path to a node or property in the scene tree, e.g. `"Player/Camera:fov"`.
#[derive(Clone)]
pub struct NodePath {
    payload: Payload,
}

impl_payload_type!(NodePath, NodePath, 1);

impl NodePath {
    pub fn new() -> Self {
        Self {
            payload: Payload::new_default(PayloadKind::NodePath),
        }
    }

    pub fn to_gstring(&self) -> GString {
        GString::from(self)
    }

    pub fn is_empty(&self) -> bool {
        self.to_gstring().is_empty()
    }
}

impl Default for NodePath {
    fn default() -> Self {
        Self::new()
    }
}

impl From<&GString> for NodePath {
    fn from(text: &GString) -> Self {
        let ctor = abi::interface().conversions.path_from_string;
        Self::from_payload(construct_with(PayloadKind::NodePath, ctor, text.payload()))
    }
}

impl From<&str> for NodePath {
    fn from(text: &str) -> Self {
        Self::from(&GString::from(text))
    }
}

impl fmt::Display for NodePath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(&self.to_gstring(), f)
    }
}

impl fmt::Debug for NodePath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "^{:?}", self.to_string())
    }
}

impl PartialEq for NodePath {
    fn eq(&self, other: &Self) -> bool {
        self.to_gstring() == other.to_gstring()
    }
}

impl Eq for NodePath {}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support;

    #[test]
    fn path_keeps_its_text() {
        let _guard = test_support::lock();
        let path = NodePath::from("Player/Camera:fov");
        assert_eq!(path.to_string(), "Player/Camera:fov");
        assert!(NodePath::new().is_empty());
    }
}
