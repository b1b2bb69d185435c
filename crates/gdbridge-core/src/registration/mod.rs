//! Publishing host classes to the engine's class database.
//!
//! A host class is a Rust type the engine instantiates as if it were one of
//! its own classes. Registration hands the engine:
//!
//! - lifecycle callbacks: create/free instance, get-virtual, set/get,
//!   notification, to-string, reference/unreference
//! - method descriptors, each with a variant-call and a pointer-call entry
//! - property and signal descriptors
//!
//! Classes stay registered until deinitialization, which unregisters them in
//! reverse order.
//!
//! ```ignore
//! #[derive(HostClass)]
//! #[class(base = Node3D, init)]
//! struct Spinner {
//!     base: Base<Node3D>,
//!     speed: f64,
//! }
//!
//! #[host_methods]
//! impl Spinner {
//!     #[virtual_method]
//!     fn _process(&mut self, delta: f64) { ... }
//!
//!     #[method]
//!     fn set_speed(&mut self, speed: f64) { self.speed = speed; }
//!
//!     #[signal]
//!     fn spun(turns: i64);
//! }
//! ```

mod builder;
pub(crate) mod callbacks;
mod registrar;

use std::any::{Any, TypeId};

use crate::object::{Base, EngineClass, Owned};
use crate::variant::Variant;

pub use builder::{
    ArgumentInfo, ClassBuilder, MethodDescriptor, PropertyDescriptor, PropertyHint,
    SignalDescriptor,
};
pub use registrar::{ClassRegistrar, registered_classes};
pub(crate) use registrar::unregister_all;

/// A Rust type the engine can instantiate.
pub trait HostClass: Any + Sized {
    /// The engine class instances are built on.
    type Base: EngineClass;

    const CLASS_NAME: &'static str;

    /// Registered host class this one extends by embedding it, if any. Its
    /// virtual overrides and methods apply to this class too.
    const PARENT_HOST: Option<&'static str> = None;

    /// Builds the host state of a freshly constructed engine object.
    fn init(base: Base<Self::Base>) -> Self;

    /// The part of `self` of type `target`: `self`, or an embedded parent.
    fn project(&self, target: TypeId) -> Option<&dyn Any> {
        if target == TypeId::of::<Self>() {
            Some(self as &dyn Any)
        } else {
            None
        }
    }

    fn project_mut(&mut self, target: TypeId) -> Option<&mut dyn Any> {
        if target == TypeId::of::<Self>() {
            Some(self as &mut dyn Any)
        } else {
            None
        }
    }
}

/// Optional engine hooks. Every method has a neutral default.
pub trait HostHooks: HostClass {
    fn on_notification(&mut self, what: i32, reversed: bool) {
        let _ = (what, reversed);
    }

    /// Replaces the engine's default string form of the object.
    fn to_string(&self) -> Option<String> {
        None
    }

    /// Serves a property the engine could not resolve itself.
    fn get_property(&self, name: &str) -> Option<Variant> {
        let _ = name;
        None
    }

    /// Returns `true` if the property was handled.
    fn set_property(&mut self, name: &str, value: &Variant) -> bool {
        let _ = (name, value);
        false
    }
}

/// Methods, virtual overrides, properties and signals of a host class.
/// Emitted by `#[host_methods]`.
pub trait HostMethods: HostClass {
    fn register_methods(builder: &mut ClassBuilder<Self>);
}

/// Instantiates host class `T` through the class database, the way the engine
/// does for a scene. The handle is typed by the engine base; the host state is
/// reached through [`with_instance_of`](crate::shim::with_instance_of).
pub fn instantiate<T: HostClass>() -> Option<Owned<T::Base>> {
    Owned::construct_named(T::CLASS_NAME)
}
