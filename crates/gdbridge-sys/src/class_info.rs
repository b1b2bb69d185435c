//! Descriptors passed to the engine's class database.
//!
//! All string fields are pointers to engine `StringName`/`String` values owned
//! by the caller for the duration of the registration call. The engine copies
//! what it keeps.

use crate::interface::*;
use crate::*;
use std::ffi::c_void;

/// Describes a host class to `classdb_register_extension_class`.
#[repr(C)]
#[derive(Debug, Clone, Copy)]
pub struct ClassCreationInfo {
    pub is_virtual: Bool,
    pub is_abstract: Bool,
    pub is_exposed: Bool,
    pub set_func: Option<ClassSetFn>,
    pub get_func: Option<ClassGetFn>,
    pub notification_func: Option<ClassNotificationFn>,
    pub to_string_func: Option<ClassToStringFn>,
    pub reference_func: Option<ClassReferenceFn>,
    pub unreference_func: Option<ClassUnreferenceFn>,
    pub create_instance_func: Option<ClassCreateInstanceFn>,
    pub free_instance_func: Option<ClassFreeInstanceFn>,
    pub get_virtual_func: Option<ClassGetVirtualFn>,
    pub class_userdata: *mut c_void,
}

/// Property usage bits, as the engine defines them.
pub mod property_usage {
    pub const NONE: u32 = 0;
    pub const STORAGE: u32 = 1 << 1;
    pub const EDITOR: u32 = 1 << 2;
    pub const INTERNAL: u32 = 1 << 3;
    pub const CHECKABLE: u32 = 1 << 4;
    pub const GROUP: u32 = 1 << 6;
    pub const CATEGORY: u32 = 1 << 7;
    pub const DEFAULT: u32 = STORAGE | EDITOR;
}

/// Describes one property, argument or return value.
#[repr(C)]
#[derive(Debug, Clone, Copy)]
pub struct PropertyInfo {
    pub ty: u32,
    pub name: StringNamePtr,
    pub class_name: StringNamePtr,
    pub hint: u32,
    pub hint_string: StringPtr,
    pub usage: u32,
}

/// Per-argument metadata refining the variant type (e.g. `int32` vs `int64`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, num_enum::TryFromPrimitive, num_enum::IntoPrimitive)]
#[repr(u32)]
pub enum ArgumentMetadata {
    #[default]
    None = 0,
    IntIsInt8 = 1,
    IntIsInt16 = 2,
    IntIsInt32 = 3,
    IntIsInt64 = 4,
    IntIsUint8 = 5,
    IntIsUint16 = 6,
    IntIsUint32 = 7,
    IntIsUint64 = 8,
    RealIsFloat = 9,
    RealIsDouble = 10,
}

/// Method flag bits, as the engine defines them.
pub mod method_flags {
    pub const NORMAL: u32 = 1;
    pub const EDITOR: u32 = 1 << 1;
    pub const CONST: u32 = 1 << 2;
    pub const VIRTUAL: u32 = 1 << 3;
    pub const VARARG: u32 = 1 << 4;
    pub const STATIC: u32 = 1 << 5;
    pub const DEFAULT: u32 = NORMAL;
}

/// Describes a host method to `classdb_register_extension_class_method`.
#[repr(C)]
#[derive(Debug, Clone, Copy)]
pub struct ClassMethodInfo {
    pub name: StringNamePtr,
    pub method_userdata: *mut c_void,
    pub call_func: Option<ClassMethodCallFn>,
    pub ptrcall_func: Option<ClassMethodPtrCallFn>,
    pub method_flags: u32,
    pub has_return_value: Bool,
    pub return_value_info: *mut PropertyInfo,
    pub return_value_metadata: u32,
    pub argument_count: u32,
    pub arguments_info: *mut PropertyInfo,
    pub arguments_metadata: *mut u32,
}
