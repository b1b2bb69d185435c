//! Static class identity of engine objects.
//!
//! Generated wrapper modules declare each engine class with [`engine_class!`],
//! which emits an uninhabited marker type plus its [`Inherits`] chain:
//!
//! ```ignore
//! engine_class! {
//!     pub struct SphereShape3D: ref_counted [Shape3D, Resource, RefCounted, Object];
//! }
//! ```
//!
//! Marker types are never instantiated; they only parameterize the handle
//! types in [`crate::object`].

use std::sync::{Mutex, PoisonError};

use gdbridge_sys::ClassTagPtr;
use rustc_hash::FxHashMap;

use crate::abi;
use crate::builtin::{PayloadType, StringName};

/// An engine class known at compile time.
pub trait EngineClass: 'static {
    const CLASS_NAME: &'static str;

    /// Whether instances are reference counted. Decides how an owning handle
    /// releases the object.
    const REF_COUNTED: bool;

    fn class_tag() -> ClassTagPtr {
        class_tag(Self::CLASS_NAME)
    }
}

/// `Self` is `Base` or derives from it.
///
/// # Safety
///
/// Implementing this for a class that does not derive from `Base` lets safe
/// code call `Base` methods on the wrong object. Only [`engine_class!`] should
/// implement it.
pub unsafe trait Inherits<Base: EngineClass>: EngineClass {}

unsafe impl<T: EngineClass> Inherits<T> for T {}

/// Classes whose instances carry an engine reference count.
pub trait RefCountedClass: EngineClass + Inherits<crate::object::RefCounted> {}

static CLASS_TAGS: Mutex<Option<FxHashMap<&'static str, usize>>> = Mutex::new(None);

/// Class tags are stable for the process, so each is fetched once.
pub(crate) fn class_tag(class: &'static str) -> ClassTagPtr {
    let mut tags = CLASS_TAGS.lock().unwrap_or_else(PoisonError::into_inner);
    let tags = tags.get_or_insert_with(FxHashMap::default);
    if let Some(&tag) = tags.get(class) {
        return tag as ClassTagPtr;
    }

    let name = StringName::from(class);
    let tag = name
        .with_sys(|name| unsafe { (abi::interface().classdb_get_class_tag)(name) })
        .unwrap_or(std::ptr::null_mut());
    if tag.is_null() {
        tracing::warn!(target: "gdbridge::init", class, "engine has no class tag");
    } else {
        tags.insert(class, tag as usize);
    }
    tag
}

pub(crate) fn clear_class_tags() {
    *CLASS_TAGS.lock().unwrap_or_else(PoisonError::into_inner) = None;
}

/// Declares engine class marker types.
///
/// `ref_counted` classes must list `RefCounted` among their bases; `manual`
/// classes are destroyed explicitly.
#[macro_export]
macro_rules! engine_class {
    (@declare $(#[$meta:meta])* $vis:vis $name:ident, $ref_counted:expr, [$($base:ty),*]) => {
        $(#[$meta])*
        #[derive(Debug)]
        $vis enum $name {}

        impl $crate::object::EngineClass for $name {
            const CLASS_NAME: &'static str = stringify!($name);
            const REF_COUNTED: bool = $ref_counted;
        }

        $(unsafe impl $crate::object::Inherits<$base> for $name {})*
    };
    (
        $(#[$meta:meta])*
        $vis:vis struct $name:ident : ref_counted [$($base:ty),* $(,)?];
        $($rest:tt)*
    ) => {
        $crate::engine_class!(@declare $(#[$meta])* $vis $name, true, [$($base),*]);
        impl $crate::object::RefCountedClass for $name {}
        $crate::engine_class!($($rest)*);
    };
    (
        $(#[$meta:meta])*
        $vis:vis struct $name:ident : manual [$($base:ty),* $(,)?];
        $($rest:tt)*
    ) => {
        $crate::engine_class!(@declare $(#[$meta])* $vis $name, false, [$($base),*]);
        $crate::engine_class!($($rest)*);
    };
    () => {};
}
