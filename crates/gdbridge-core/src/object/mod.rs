//! Engine objects and who releases them.
//!
//! An object pointer crosses the ABI in one of three ownership modes, each a
//! distinct type ([`Owned`], [`Bound`], [`Transferred`]). Class identity is static: handle types are
//! parameterized by an [`EngineClass`] marker, and [`Inherits`] encodes the
//! hierarchy for upcasts. Downcasts go through the engine's `object_cast_to`.

mod class;
mod classes;
mod owned;
mod raw;

pub use class::{EngineClass, Inherits, RefCountedClass};
pub(crate) use class::clear_class_tags;
pub use classes::{
    OBJECT, Object, ObjectExt, ObjectMethod, REF_COUNTED, RefCounted, RefCountedExt,
    RefCountedMethod, class_name_of, singleton,
};
pub(crate) use classes::resolve_tables;
pub(crate) use owned::PendingHandover;
pub use owned::{Base, Bound, ObjectRef, Owned, Transferred};
pub use raw::{InstanceId, RawObject, is_instance_valid};
