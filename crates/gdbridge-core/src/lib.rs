//! Cross-ABI runtime for extension libraries of a variant-typed, refcounted
//! game engine.
//!
//! The engine exposes its object model through a C ABI: a symbol resolver,
//! opaque method binds, 24-byte variants and a class database. This crate
//! owns everything between that ABI and typed Rust:
//!
//! - [`abi`]: the function table resolved once at startup
//! - [`frame`]: bump-allocated argument/return layouts for pointer-calls
//! - [`handle`]: the generation-checked registry pinning heap payloads
//! - [`object`]: object pointers with a static ownership mode
//! - [`variant`], [`builtin`], [`marshal`]: value conversion
//! - [`dispatch`], [`method_bind`]: calling into the engine
//! - [`shim`], [`registration`]: the engine calling into host classes
//! - [`init`]: the library entry and teardown
//!
//! # Example
//!
//! ```ignore
//! let mut frame = CallFrame::new();
//! frame.arg(2.5f64);
//! dispatch::ptrcall::<()>(SphereShape3DMethod::set_radius.bind(), Some(sphere.raw()), frame)?;
//! ```

pub mod abi;
pub mod builtin;
pub mod diagnostics;
pub mod dispatch;
pub mod error;
pub mod frame;
pub mod handle;
pub mod init;
pub mod marshal;
pub mod method_bind;
pub mod object;
pub mod registration;
pub mod shim;
pub mod variant;

#[cfg(test)]
pub(crate) mod test_support;

pub use gdbridge_sys as sys;
pub use gdbridge_sys::{VariantOperator, VariantType};

pub use builtin::*;
pub use error::{
    BridgeError, BridgeResult, CallError, ConversionError, HandleError, InitError,
    RegistrationError,
};
pub use frame::{CallFrame, MAX_FRAME_ARGS};
pub use handle::{PackedRef, PayloadKind};
pub use init::{ExtensionConfig, ExtensionLibrary, LeakReport};
pub use method_bind::{MethodBind, MethodFlags, MethodSpec, MethodTable, UtilityTable};
pub use object::{
    Base, Bound, EngineClass, Inherits, InstanceId, ObjectRef, Owned, RawObject, RefCountedClass,
    Transferred,
};
pub use registration::{ClassBuilder, HostClass, HostHooks, HostMethods, instantiate};
pub use variant::{FromVariant, ToVariant, Variant};
