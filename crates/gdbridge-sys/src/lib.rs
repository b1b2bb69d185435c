//! Raw C ABI declarations shared between the engine and an extension library.
//!
//! Nothing in this crate has behavior. It names the pointer aliases, the
//! function-pointer signatures the engine hands out through its symbol
//! resolver, the `#[repr(C)]` descriptor structs used for class registration,
//! and the enums whose numeric values are fixed by the engine.
//!
//! ## Layout
//!
//! - [`VariantType`], [`VariantOperator`]: engine numbering of variant tags and operators
//! - [`CallErrorType`], [`CallErrorRaw`]: the variant-call out-error
//! - [`interface`]: function-pointer typedefs and the symbol names they resolve from
//! - [`class_info`]: descriptors passed to the class database

#![allow(non_camel_case_types)]

pub mod class_info;
pub mod interface;
mod variant_type;

pub use class_info::*;
pub use interface::*;
pub use variant_type::{VariantOperator, VariantType};

use std::ffi::c_void;

// ============================================================================
// Opaque pointer aliases
// ============================================================================

/// Pointer to a 24-byte engine variant.
pub type VariantPtr = *mut c_void;
/// Read-only pointer to a 24-byte engine variant.
pub type ConstVariantPtr = *const c_void;
/// Pointer to storage the callee constructs a variant into.
pub type UninitVariantPtr = *mut c_void;
/// Pointer to a value in its pointer-call representation.
pub type TypePtr = *mut c_void;
/// Read-only pointer to a value in its pointer-call representation.
pub type ConstTypePtr = *const c_void;
/// Pointer to storage the callee constructs a typed value into.
pub type UninitTypePtr = *mut c_void;
pub type StringNamePtr = *mut c_void;
pub type ConstStringNamePtr = *const c_void;
pub type UninitStringNamePtr = *mut c_void;
pub type StringPtr = *mut c_void;
pub type ConstStringPtr = *const c_void;
pub type UninitStringPtr = *mut c_void;
/// Engine object pointer.
pub type ObjectPtr = *mut c_void;
pub type ConstObjectPtr = *const c_void;
/// Engine method-bind pointer; identifies one method on one class.
pub type MethodBindPtr = *const c_void;
/// Opaque library handle the engine passes to the entry function.
pub type ClassLibraryPtr = *mut c_void;
/// Host-side instance pointer handed back to the engine in callbacks.
pub type ClassInstancePtr = *mut c_void;
/// Engine-side class tag used by `object_cast_to`.
pub type ClassTagPtr = *mut c_void;

/// Engine boolean: one byte, zero is false.
pub type Bool = u8;
pub const TRUE: Bool = 1;
pub const FALSE: Bool = 0;

/// Engine integer as seen by pointer-calls.
pub type Int = i64;

/// Size in bytes of an engine variant.
pub const VARIANT_SIZE: usize = 24;

/// Largest argument count the engine documents for a single call.
pub const MAX_CALL_ARGS: usize = 32;

// ============================================================================
// Variant-call errors
// ============================================================================

/// Error codes the engine writes into a [`CallErrorRaw`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, num_enum::TryFromPrimitive, num_enum::IntoPrimitive)]
#[repr(u32)]
pub enum CallErrorType {
    Ok = 0,
    InvalidMethod = 1,
    InvalidArgument = 2,
    TooManyArguments = 3,
    TooFewArguments = 4,
    InstanceIsNull = 5,
    MethodNotConst = 6,
}

/// Out-parameter of every variant-call.
///
/// `argument` is the offending argument index for `InvalidArgument`, and the
/// expected argument count for the arity errors. `expected` and `actual` are
/// variant tags for `InvalidArgument`.
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct CallErrorRaw {
    pub error: u32,
    pub argument: i32,
    pub expected: i32,
    pub actual: i32,
}

impl CallErrorRaw {
    pub const OK: Self = Self {
        error: 0,
        argument: 0,
        expected: 0,
        actual: 0,
    };

    pub fn is_ok(&self) -> bool {
        self.error == CallErrorType::Ok as u32
    }
}

// ============================================================================
// Initialization
// ============================================================================

/// Deinitialization callback the library writes into [`Initialization`].
pub type DeinitializeFn = unsafe extern "C" fn(userdata: *mut c_void);

/// The two-word initialization struct filled in by the library's entry function.
#[repr(C)]
#[derive(Debug)]
pub struct Initialization {
    pub userdata: *mut c_void,
    pub deinitialize: Option<DeinitializeFn>,
}

impl Default for Initialization {
    fn default() -> Self {
        Self {
            userdata: std::ptr::null_mut(),
            deinitialize: None,
        }
    }
}

/// Signature of the library entry function the engine looks up by name.
pub type EntryPointFn = unsafe extern "C" fn(
    get_proc_address: Option<GetProcAddressFn>,
    library: ClassLibraryPtr,
    initialization: *mut Initialization,
) -> Bool;
