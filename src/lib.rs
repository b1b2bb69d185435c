//! gdbridge
//!
//! Rust bindings for extension libraries of a variant-typed, refcounted game
//! engine. The runtime lives in `gdbridge-core`; this crate adds the class
//! macros and the library entry symbol.
//!
//! # Example
//!
//! ```ignore
//! use gdbridge::prelude::*;
//!
//! #[derive(HostClass)]
//! #[class(base = RefCounted, init)]
//! pub struct Counter {
//!     base: Base<RefCounted>,
//!     hits: i64,
//! }
//!
//! #[host_methods]
//! impl Counter {
//!     #[method]
//!     fn hit(&mut self) -> i64 {
//!         self.hits += 1;
//!         self.hits
//!     }
//! }
//!
//! struct Library;
//!
//! impl ExtensionLibrary for Library {
//!     fn register_classes(registrar: &mut ClassRegistrar) -> Result<(), RegistrationError> {
//!         registrar.register::<Counter>()?;
//!         Ok(())
//!     }
//! }
//!
//! gdbridge::entry_point!(counter_library_init, Library);
//! ```

extern crate self as gdbridge;

pub use gdbridge_core::*;
pub use gdbridge_macros::{HostClass, host_methods};

pub use gdbridge_core::registration::{
    ArgumentInfo, ClassRegistrar, MethodDescriptor, PropertyDescriptor, PropertyHint,
    SignalDescriptor,
};

/// Everything an extension library usually needs.
pub mod prelude {
    pub use gdbridge_core::builtin::*;
    pub use gdbridge_core::error::{
        BridgeError, BridgeResult, CallError, ConversionError, HandleError, InitError,
        RegistrationError,
    };
    pub use gdbridge_core::init::{ExtensionConfig, ExtensionLibrary, LeakReport};
    pub use gdbridge_core::method_bind::MethodTable;
    pub use gdbridge_core::object::{
        Base, Bound, EngineClass, Inherits, InstanceId, Object, ObjectExt, ObjectRef, Owned,
        RawObject, RefCounted, RefCountedClass, RefCountedExt, Transferred, is_instance_valid,
    };
    pub use gdbridge_core::registration::{
        ClassBuilder, ClassRegistrar, HostHooks, HostMethods, instantiate,
    };
    pub use gdbridge_core::variant::{FromVariant, ToVariant, Variant};
    pub use gdbridge_core::{CallFrame, dispatch, engine_class, method_table};

    pub use crate::{HostClass, host_methods};
}

/// Paths the macros expand to. Not part of the public API.
#[doc(hidden)]
pub mod __private {
    pub use gdbridge_core::error::CallError;
    pub use gdbridge_core::init;
    pub use gdbridge_core::object::{Object, ObjectExt, ObjectRef};
    pub use gdbridge_core::registration::{
        ArgumentInfo, ClassBuilder, HostClass, HostHooks, HostMethods, MethodDescriptor,
        PropertyDescriptor, PropertyHint, SignalDescriptor,
    };
    pub use gdbridge_core::shim;
    pub use gdbridge_core::sys;
    pub use gdbridge_core::variant::Variant;
}

/// Emits the library entry symbol the engine looks up by name.
///
/// ```ignore
/// gdbridge::entry_point!(my_library_init, MyLibrary);
/// ```
///
/// expands to an `extern "C"` function taking the engine's resolver, the
/// library handle and the initialization struct, returning `1` on success.
#[macro_export]
macro_rules! entry_point {
    ($symbol:ident, $library:ty) => {
        /// Library entry called by the engine.
        ///
        /// # Safety
        ///
        /// Called once by the engine with its resolver, library handle and
        /// initialization struct.
        #[unsafe(no_mangle)]
        pub unsafe extern "C" fn $symbol(
            get_proc_address: ::core::option::Option<$crate::__private::sys::GetProcAddressFn>,
            library: $crate::__private::sys::ClassLibraryPtr,
            init: *mut $crate::__private::sys::Initialization,
        ) -> $crate::__private::sys::Bool {
            unsafe { $crate::__private::init::initialize::<$library>(get_proc_address, library, init) }
        }
    };
}
