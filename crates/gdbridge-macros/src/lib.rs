//! gdbridge Proc Macros
//!
//! Code generation for host classes: the engine-facing `extern "C"` entry
//! points and the registration calls that publish them.
//!
//! # Macros
//!
//! - `#[derive(HostClass)]` - Implement `HostClass` (and an empty `HostHooks`)
//! - `#[host_methods]` - Register methods, virtual overrides, properties and
//!   signals declared in an impl block
//!
//! # Example
//!
//! ```ignore
//! use gdbridge::prelude::*;
//!
//! #[derive(HostClass)]
//! #[class(base = Node3D, init)]
//! pub struct Spinner {
//!     base: Base<Node3D>,
//!     speed: f64,
//! }
//!
//! #[host_methods]
//! #[property(name = "speed", get = speed, set = set_speed)]
//! impl Spinner {
//!     #[virtual_method]
//!     fn _process(&mut self, delta: f64) {
//!         let _ = delta * self.speed;
//!     }
//!
//!     #[method]
//!     fn speed(&self) -> f64 {
//!         self.speed
//!     }
//!
//!     #[method]
//!     fn set_speed(&mut self, speed: f64) {
//!         self.speed = speed;
//!     }
//!
//!     #[signal]
//!     fn spun(turns: i64);
//! }
//! ```

use proc_macro::TokenStream;

mod attrs;
mod derive_host_class;
mod host_methods;

/// Derive `HostClass` for a struct the engine can instantiate.
///
/// # Attributes
///
/// - `#[class(base = Node3D)]` - Engine class the instances are built on
/// - `#[class(extends = OtherHostClass)]` - Embed a registered host class
///   instead; its engine base, overrides and methods carry over
/// - `#[class(init)]` - Generate `init`: the `Base<...>` field (or the
///   embedded parent) receives the engine object, every other field its
///   `Default`
/// - `#[class(init = path)]` - Build instances with `fn(Base<B>) -> Self`
/// - `#[class(name = "...")]` - Override the registered class name
/// - `#[class(manual_hooks)]` - Skip the empty `HostHooks` impl so the type
///   can implement its own
///
/// # Field Attributes
///
/// - `#[base]` - The field receiving `Base<...>` when its type is aliased
/// - `#[parent]` - The embedded parent when `extends` names an alias
///
/// # Example
///
/// ```ignore
/// #[derive(HostClass)]
/// #[class(base = RefCounted, init, name = "Counter")]
/// struct HitCounter {
///     base: Base<RefCounted>,
///     hits: i64,
/// }
/// ```
#[proc_macro_derive(HostClass, attributes(class, base, parent))]
pub fn derive_host_class(input: TokenStream) -> TokenStream {
    derive_host_class::derive_host_class_impl(input)
}

/// Generate engine entry points and `HostMethods` for an impl block.
///
/// Members are picked out by attribute; everything else in the block is left
/// alone.
///
/// # Member Attributes
///
/// - `#[method]` - A method callable through variant-call and pointer-call.
///   `&self` methods are registered as const.
/// - `#[virtual_method]` - An override of an engine virtual such as
///   `_process` or `_redraw`
/// - `#[signal]` - A signal, declared without a body. The declaration is
///   replaced by an emitter taking the object to emit on first.
///
/// Each member takes an optional `name = "..."` to register under another
/// name.
///
/// # Block Attributes
///
/// - `#[property(name = "...", get = getter, set = setter)]` - A property
///   backed by `#[method]`s of this block. `hint = Range` and
///   `hint_string = "0,10"` add an editor hint.
///
/// # Example
///
/// ```ignore
/// #[host_methods]
/// impl Ring {
///     #[virtual_method]
///     fn _redraw(&mut self, gizmo: Bound<'_, EditorNode3DGizmo>) { ... }
///
///     #[method(name = "segment_count")]
///     fn segments(&self) -> i64 { self.segments }
/// }
/// ```
#[proc_macro_attribute]
pub fn host_methods(args: TokenStream, input: TokenStream) -> TokenStream {
    host_methods::host_methods_impl(args, input)
}
