//! Method binds and the tables that resolve them.
//!
//! Wrappers never look methods up at call time. Each wrapper module declares
//! a [`MethodTable`] listing the `(name, hash)` pairs it calls; the table is
//! resolved once during initialization and every call site afterwards reads
//! the same pointer by index.
//!
//! ```ignore
//! method_table! {
//!     pub static SPHERE_SHAPE_3D: SphereShape3DMethod = "SphereShape3D" {
//!         set_radius = 373806689;
//!         get_radius = 1740695150 [CONST];
//!     }
//! }
//!
//! let bind = SphereShape3DMethod::get_radius.bind();
//! ```

use std::ffi::c_void;
use std::sync::OnceLock;

use bitflags::bitflags;
use gdbridge_sys::{PtrBuiltInMethod, PtrUtilityFunction, VariantType};

use crate::abi::{self, thread_safety};
use crate::builtin::{PayloadType, StringName};
use crate::error::InitError;

bitflags! {
    /// Properties of a method that affect how it may be dispatched.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct MethodFlags: u32 {
        /// Does not mutate the receiver.
        const CONST = 1 << 0;
        /// Takes a variable argument list; only callable through variant-call.
        const VARARG = 1 << 1;
        /// Has no receiver.
        const STATIC = 1 << 2;
        /// Overridable by extension classes.
        const VIRTUAL = 1 << 3;
        /// Returns an object the caller owns.
        const RETURNS_OWNED = 1 << 4;
        /// Safe to call off the main thread.
        const THREAD_SAFE = 1 << 5;
    }
}

/// One method a wrapper calls.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MethodSpec {
    pub name: &'static str,
    pub hash: i64,
    pub flags: MethodFlags,
}

impl MethodSpec {
    pub const fn new(name: &'static str, hash: i64, flags: MethodFlags) -> Self {
        Self { name, hash, flags }
    }
}

/// Resolved engine method bind.
///
/// Equality is pointer identity: two binds are equal iff the engine handed
/// out the same pointer.
#[derive(Debug, Clone, Copy)]
pub struct MethodBind {
    ptr: usize,
    name: &'static str,
    flags: MethodFlags,
}

impl MethodBind {
    pub fn as_ptr(&self) -> *const c_void {
        self.ptr as *const c_void
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    pub fn flags(&self) -> MethodFlags {
        self.flags
    }

    pub fn is_thread_safe(&self) -> bool {
        self.flags.contains(MethodFlags::THREAD_SAFE)
    }
}

impl PartialEq for MethodBind {
    fn eq(&self, other: &Self) -> bool {
        self.ptr == other.ptr
    }
}

impl Eq for MethodBind {}

impl std::hash::Hash for MethodBind {
    fn hash<H: std::hash::Hasher>(&self, state: &mut H) {
        self.ptr.hash(state);
    }
}

// ============================================================================
// Class method tables
// ============================================================================

/// The methods of one engine class a library calls.
pub struct MethodTable {
    class: &'static str,
    specs: &'static [MethodSpec],
    binds: OnceLock<Box<[MethodBind]>>,
}

impl MethodTable {
    pub const fn new(class: &'static str, specs: &'static [MethodSpec]) -> Self {
        Self {
            class,
            specs,
            binds: OnceLock::new(),
        }
    }

    pub fn class(&self) -> &'static str {
        self.class
    }

    pub fn specs(&self) -> &'static [MethodSpec] {
        self.specs
    }

    pub fn is_resolved(&self) -> bool {
        self.binds.get().is_some()
    }

    /// Resolves every bind through `classdb_get_method_bind`. Resolving an
    /// already resolved table is a no-op.
    pub fn resolve(&self) -> Result<(), InitError> {
        if self.is_resolved() {
            return Ok(());
        }

        let interface = abi::interface();
        let class_name = StringName::from(self.class);
        let mut binds = Vec::with_capacity(self.specs.len());

        for spec in self.specs {
            let method_name = StringName::from(spec.name);
            let ptr = class_name
                .with_sys(|class| {
                    method_name.with_sys(|method| unsafe {
                        (interface.classdb_get_method_bind)(class, method, spec.hash)
                    })
                })
                .and_then(|inner| inner)
                .ok()
                .filter(|ptr| !ptr.is_null())
                .ok_or(InitError::MissingMethodBind {
                    class: self.class,
                    method: spec.name,
                    hash: spec.hash,
                })?;

            let mut flags = spec.flags;
            if thread_safety::is_thread_safe_method(self.class, spec.name) {
                flags |= MethodFlags::THREAD_SAFE;
            }

            binds.push(MethodBind {
                ptr: ptr as usize,
                name: spec.name,
                flags,
            });
        }

        tracing::debug!(target: "gdbridge::init", class = self.class, count = binds.len(), "method table resolved");
        let _ = self.binds.set(binds.into_boxed_slice());
        Ok(())
    }

    /// The bind at `index`.
    ///
    /// # Panics
    ///
    /// If the table was not resolved during initialization.
    pub fn bind(&self, index: usize) -> MethodBind {
        match self.binds.get() {
            Some(binds) => binds[index],
            None => panic!("method table for `{}` used before initialization", self.class),
        }
    }

    /// Looks a bind up by name. Only for diagnostics and tests; wrappers use
    /// [`MethodTable::bind`].
    pub fn find(&self, name: &str) -> Option<MethodBind> {
        let index = self.specs.iter().position(|spec| spec.name == name)?;
        self.binds.get().map(|binds| binds[index])
    }
}

/// Declares a [`MethodTable`] and an index enum whose variants name its
/// methods.
#[macro_export]
macro_rules! method_table {
    (
        $vis:vis static $table:ident : $index:ident = $class:literal {
            $( $method:ident = $hash:literal $([$($flag:ident)|+])? ; )*
        }
    ) => {
        $vis static $table: $crate::method_bind::MethodTable = $crate::method_bind::MethodTable::new(
            $class,
            &[
                $(
                    $crate::method_bind::MethodSpec::new(
                        stringify!($method),
                        $hash,
                        $crate::method_bind::MethodFlags::empty()
                            $($(.union($crate::method_bind::MethodFlags::$flag))+)?,
                    ),
                )*
            ],
        );

        #[allow(non_camel_case_types)]
        #[derive(Debug, Clone, Copy, PartialEq, Eq)]
        #[repr(usize)]
        $vis enum $index {
            $($method),*
        }

        impl $index {
            pub fn bind(self) -> $crate::method_bind::MethodBind {
                $table.bind(self as usize)
            }
        }
    };
}

// ============================================================================
// Utility functions
// ============================================================================

/// One global utility function a library calls.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct UtilitySpec {
    pub name: &'static str,
    pub hash: i64,
}

/// Resolved utility function pointer.
#[derive(Debug, Clone, Copy)]
pub struct UtilityFunction {
    pub(crate) function: PtrUtilityFunction,
    pub(crate) name: &'static str,
    pub(crate) thread_safe: bool,
}

impl UtilityFunction {
    pub fn name(&self) -> &'static str {
        self.name
    }
}

pub struct UtilityTable {
    specs: &'static [UtilitySpec],
    functions: OnceLock<Box<[UtilityFunction]>>,
}

impl UtilityTable {
    pub const fn new(specs: &'static [UtilitySpec]) -> Self {
        Self {
            specs,
            functions: OnceLock::new(),
        }
    }

    pub fn resolve(&self) -> Result<(), InitError> {
        if self.functions.get().is_some() {
            return Ok(());
        }

        let interface = abi::interface();
        let mut functions = Vec::with_capacity(self.specs.len());
        for spec in self.specs {
            let name = StringName::from(spec.name);
            let function = name
                .with_sys(|name| unsafe {
                    (interface.variant_get_ptr_utility_function)(name, spec.hash)
                })
                .ok()
                .flatten()
                .ok_or(InitError::MissingUtilityFunction {
                    name: spec.name,
                    hash: spec.hash,
                })?;
            functions.push(UtilityFunction {
                function,
                name: spec.name,
                thread_safe: thread_safety::is_thread_safe_utility(spec.name),
            });
        }

        let _ = self.functions.set(functions.into_boxed_slice());
        Ok(())
    }

    /// # Panics
    ///
    /// If the table was not resolved during initialization.
    pub fn get(&self, index: usize) -> UtilityFunction {
        match self.functions.get() {
            Some(functions) => functions[index],
            None => panic!("utility table used before initialization"),
        }
    }

    /// Calls the function at `index` with `frame`.
    pub fn call<R: crate::marshal::FromAbiReturn>(
        &self,
        index: usize,
        frame: crate::frame::CallFrame<'_>,
    ) -> Result<R, crate::error::CallError> {
        crate::dispatch::utility_call(self.get(index), frame)
    }
}

// ============================================================================
// Builtin-type methods
// ============================================================================

/// One method of a builtin (non-object) type.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BuiltinMethodSpec {
    pub ty: VariantType,
    pub name: &'static str,
    pub hash: i64,
}

#[derive(Debug, Clone, Copy)]
pub struct BuiltinMethod {
    pub(crate) function: PtrBuiltInMethod,
    pub(crate) ty: VariantType,
}

impl BuiltinMethod {
    pub fn variant_type(&self) -> VariantType {
        self.ty
    }
}

pub struct BuiltinMethodTable {
    specs: &'static [BuiltinMethodSpec],
    methods: OnceLock<Box<[BuiltinMethod]>>,
}

impl BuiltinMethodTable {
    pub const fn new(specs: &'static [BuiltinMethodSpec]) -> Self {
        Self {
            specs,
            methods: OnceLock::new(),
        }
    }

    pub fn specs(&self) -> &'static [BuiltinMethodSpec] {
        self.specs
    }

    pub fn resolve(&self) -> Result<(), InitError> {
        if self.methods.get().is_some() {
            return Ok(());
        }

        let interface = abi::interface();
        let mut methods = Vec::with_capacity(self.specs.len());
        for spec in self.specs {
            let name = StringName::from(spec.name);
            let function = name
                .with_sys(|name| unsafe {
                    (interface.variant_get_ptr_builtin_method)(spec.ty.as_raw(), name, spec.hash)
                })
                .ok()
                .flatten()
                .ok_or(InitError::MissingBuiltin {
                    ty: spec.ty,
                    what: spec.name,
                })?;
            methods.push(BuiltinMethod {
                function,
                ty: spec.ty,
            });
        }

        let _ = self.methods.set(methods.into_boxed_slice());
        Ok(())
    }

    /// # Panics
    ///
    /// If the table was not resolved during initialization.
    pub fn get(&self, index: usize) -> BuiltinMethod {
        match self.methods.get() {
            Some(methods) => methods[index],
            None => panic!("builtin method table used before initialization"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support;

    crate::method_table! {
        static SPHERE: SphereMethod = "SphereShape3D" {
            set_radius = 373806689;
            get_radius = 1740695150 [CONST];
        }
    }

    crate::method_table! {
        static MISSING: MissingMethod = "SphereShape3D" {
            set_height = 1;
        }
    }

    #[test]
    fn macro_builds_specs_in_order() {
        assert_eq!(SPHERE.class(), "SphereShape3D");
        assert_eq!(SPHERE.specs()[0].name, "set_radius");
        assert_eq!(SPHERE.specs()[1].flags, MethodFlags::CONST);
        assert_eq!(SphereMethod::get_radius as usize, 1);
    }

    #[test]
    fn bind_is_identical_across_lookups() {
        let _guard = test_support::lock();
        SPHERE.resolve().unwrap();
        let a = SphereMethod::get_radius.bind();
        let b = SPHERE.bind(1);
        let c = SPHERE.find("get_radius").unwrap();
        assert_eq!(a, b);
        assert_eq!(b, c);
        assert_eq!(a.as_ptr(), c.as_ptr());
        assert_ne!(a, SphereMethod::set_radius.bind());
    }

    #[test]
    fn missing_bind_names_class_method_and_hash() {
        let _guard = test_support::lock();
        assert_eq!(
            MISSING.resolve(),
            Err(InitError::MissingMethodBind {
                class: "SphereShape3D",
                method: "set_height",
                hash: 1,
            })
        );
        assert!(!MISSING.is_resolved());
    }

    #[test]
    fn server_binds_are_flagged_thread_safe() {
        let _guard = test_support::lock();
        crate::method_table! {
            static SERVER: ServerMethod = "RenderingServer" {
                get_frame_count = 3905245786;
            }
        }
        SERVER.resolve().unwrap();
        SPHERE.resolve().unwrap();
        assert!(ServerMethod::get_frame_count.bind().is_thread_safe());
        assert!(!SphereMethod::set_radius.bind().is_thread_safe());
    }
}
