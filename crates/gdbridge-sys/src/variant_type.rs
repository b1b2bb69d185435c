use num_enum::{IntoPrimitive, TryFromPrimitive};

/// Variant tags, numbered exactly as the engine numbers them.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, TryFromPrimitive, IntoPrimitive)]
#[repr(u32)]
pub enum VariantType {
    #[default]
    Nil = 0,

    // atomic types
    Bool = 1,
    Int = 2,
    Float = 3,
    String = 4,

    // math types
    Vector2 = 5,
    Vector2i = 6,
    Rect2 = 7,
    Rect2i = 8,
    Vector3 = 9,
    Vector3i = 10,
    Transform2D = 11,
    Vector4 = 12,
    Vector4i = 13,
    Plane = 14,
    Quaternion = 15,
    Aabb = 16,
    Basis = 17,
    Transform3D = 18,
    Projection = 19,

    // misc types
    Color = 20,
    StringName = 21,
    NodePath = 22,
    Rid = 23,
    Object = 24,
    Callable = 25,
    Signal = 26,
    Dictionary = 27,
    Array = 28,

    // typed arrays
    PackedByteArray = 29,
    PackedInt32Array = 30,
    PackedInt64Array = 31,
    PackedFloat32Array = 32,
    PackedFloat64Array = 33,
    PackedStringArray = 34,
    PackedVector2Array = 35,
    PackedVector3Array = 36,
    PackedColorArray = 37,
    PackedVector4Array = 38,
}

impl VariantType {
    /// Number of valid tags.
    pub const COUNT: usize = 39;

    /// All tags in numeric order.
    pub const ALL: [VariantType; Self::COUNT] = [
        Self::Nil,
        Self::Bool,
        Self::Int,
        Self::Float,
        Self::String,
        Self::Vector2,
        Self::Vector2i,
        Self::Rect2,
        Self::Rect2i,
        Self::Vector3,
        Self::Vector3i,
        Self::Transform2D,
        Self::Vector4,
        Self::Vector4i,
        Self::Plane,
        Self::Quaternion,
        Self::Aabb,
        Self::Basis,
        Self::Transform3D,
        Self::Projection,
        Self::Color,
        Self::StringName,
        Self::NodePath,
        Self::Rid,
        Self::Object,
        Self::Callable,
        Self::Signal,
        Self::Dictionary,
        Self::Array,
        Self::PackedByteArray,
        Self::PackedInt32Array,
        Self::PackedInt64Array,
        Self::PackedFloat32Array,
        Self::PackedFloat64Array,
        Self::PackedStringArray,
        Self::PackedVector2Array,
        Self::PackedVector3Array,
        Self::PackedColorArray,
        Self::PackedVector4Array,
    ];

    /// Converts a raw tag, mapping unknown values to `None`.
    pub fn from_raw(raw: u32) -> Option<Self> {
        Self::try_from(raw).ok()
    }

    pub fn as_raw(self) -> u32 {
        self.into()
    }

    /// Size of the pointer-call representation of a value of this type.
    ///
    /// `Nil` has no representation; `Object` is the size of an object pointer.
    pub const fn ptrcall_size(self) -> usize {
        match self {
            Self::Nil => 0,
            Self::Bool => 1,
            Self::Int | Self::Float => 8,
            Self::String | Self::StringName | Self::NodePath => 8,
            Self::Dictionary | Self::Array => 8,
            Self::Rid => 8,
            Self::Object => size_of::<*mut std::ffi::c_void>(),
            Self::Vector2 | Self::Vector2i => 8,
            Self::Vector3 | Self::Vector3i => 12,
            Self::Rect2 | Self::Rect2i => 16,
            Self::Vector4 | Self::Vector4i => 16,
            Self::Plane | Self::Quaternion | Self::Color => 16,
            Self::Transform2D | Self::Aabb => 24,
            Self::Basis => 36,
            Self::Transform3D => 48,
            Self::Projection => 64,
            Self::Callable | Self::Signal => 16,
            Self::PackedByteArray
            | Self::PackedInt32Array
            | Self::PackedInt64Array
            | Self::PackedFloat32Array
            | Self::PackedFloat64Array
            | Self::PackedStringArray
            | Self::PackedVector2Array
            | Self::PackedVector3Array
            | Self::PackedColorArray
            | Self::PackedVector4Array => 16,
        }
    }

    /// Whether values of this type own an engine-side allocation that must be
    /// destroyed through the engine.
    pub const fn is_heap_backed(self) -> bool {
        matches!(
            self,
            Self::String
                | Self::StringName
                | Self::NodePath
                | Self::Callable
                | Self::Signal
                | Self::Dictionary
                | Self::Array
                | Self::PackedByteArray
                | Self::PackedInt32Array
                | Self::PackedInt64Array
                | Self::PackedFloat32Array
                | Self::PackedFloat64Array
                | Self::PackedStringArray
                | Self::PackedVector2Array
                | Self::PackedVector3Array
                | Self::PackedColorArray
                | Self::PackedVector4Array
        )
    }

    pub const fn is_packed_array(self) -> bool {
        (self as u32) >= Self::PackedByteArray as u32
    }

    /// Name the engine uses for this type in diagnostics.
    pub const fn name(self) -> &'static str {
        match self {
            Self::Nil => "Nil",
            Self::Bool => "bool",
            Self::Int => "int",
            Self::Float => "float",
            Self::String => "String",
            Self::Vector2 => "Vector2",
            Self::Vector2i => "Vector2i",
            Self::Rect2 => "Rect2",
            Self::Rect2i => "Rect2i",
            Self::Vector3 => "Vector3",
            Self::Vector3i => "Vector3i",
            Self::Transform2D => "Transform2D",
            Self::Vector4 => "Vector4",
            Self::Vector4i => "Vector4i",
            Self::Plane => "Plane",
            Self::Quaternion => "Quaternion",
            Self::Aabb => "AABB",
            Self::Basis => "Basis",
            Self::Transform3D => "Transform3D",
            Self::Projection => "Projection",
            Self::Color => "Color",
            Self::StringName => "StringName",
            Self::NodePath => "NodePath",
            Self::Rid => "RID",
            Self::Object => "Object",
            Self::Callable => "Callable",
            Self::Signal => "Signal",
            Self::Dictionary => "Dictionary",
            Self::Array => "Array",
            Self::PackedByteArray => "PackedByteArray",
            Self::PackedInt32Array => "PackedInt32Array",
            Self::PackedInt64Array => "PackedInt64Array",
            Self::PackedFloat32Array => "PackedFloat32Array",
            Self::PackedFloat64Array => "PackedFloat64Array",
            Self::PackedStringArray => "PackedStringArray",
            Self::PackedVector2Array => "PackedVector2Array",
            Self::PackedVector3Array => "PackedVector3Array",
            Self::PackedColorArray => "PackedColorArray",
            Self::PackedVector4Array => "PackedVector4Array",
        }
    }
}

impl std::fmt::Display for VariantType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

/// Operators understood by the engine's variant evaluator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, TryFromPrimitive, IntoPrimitive)]
#[repr(u32)]
pub enum VariantOperator {
    Equal = 0,
    NotEqual = 1,
    Less = 2,
    LessEqual = 3,
    Greater = 4,
    GreaterEqual = 5,
    Add = 6,
    Subtract = 7,
    Multiply = 8,
    Divide = 9,
    Negate = 10,
    Positive = 11,
    Module = 12,
    Power = 13,
    ShiftLeft = 14,
    ShiftRight = 15,
    BitAnd = 16,
    BitOr = 17,
    BitXor = 18,
    BitNegate = 19,
    And = 20,
    Or = 21,
    Xor = 22,
    Not = 23,
    In = 24,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn all_is_in_numeric_order() {
        for (index, ty) in VariantType::ALL.iter().enumerate() {
            assert_eq!(ty.as_raw() as usize, index);
        }
    }

    #[test]
    fn unknown_raw_tag_is_rejected() {
        assert_eq!(VariantType::from_raw(39), None);
        assert_eq!(VariantType::from_raw(36), Some(VariantType::PackedVector3Array));
    }

    #[test]
    fn heap_backed_types_are_the_packed_handle_types() {
        assert!(VariantType::String.is_heap_backed());
        assert!(VariantType::PackedVector4Array.is_heap_backed());
        assert!(!VariantType::Transform3D.is_heap_backed());
        assert!(!VariantType::Object.is_heap_backed());
    }

    #[test]
    fn packed_array_range() {
        assert!(VariantType::PackedByteArray.is_packed_array());
        assert!(!VariantType::Array.is_packed_array());
    }
}
