//! Collects what a host class publishes, before the registrar hands it to
//! the engine.
//!
//! # Example
//!
//! ```ignore
//! builder
//!     .virtual_method("_process", spinner_process)
//!     .method(
//!         MethodDescriptor::new("set_speed", set_speed_call, set_speed_ptrcall)
//!             .argument(ArgumentInfo::of::<f64>("speed")),
//!     )
//!     .method(MethodDescriptor::new("get_speed", get_speed_call, get_speed_ptrcall).returns::<f64>())
//!     .property(PropertyDescriptor::of::<f64>("speed").setter("set_speed").getter("get_speed"))
//!     .signal(SignalDescriptor::new("spun").argument(ArgumentInfo::of::<i64>("turns")));
//! ```

use std::marker::PhantomData;
use std::sync::Arc;

use gdbridge_sys::{
    ArgumentMetadata, ClassCallVirtual, ClassMethodCallFn, ClassMethodPtrCallFn, VariantType,
    method_flags, property_usage,
};
use rustc_hash::FxHashSet;

use crate::error::RegistrationError;
use crate::marshal::AbiType;
use crate::registration::HostClass;
use crate::shim::VirtualTable;

/// Editor hint attached to a property.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[repr(u32)]
pub enum PropertyHint {
    #[default]
    None = 0,
    Range = 1,
    Enum = 2,
    File = 13,
    Dir = 14,
    MultilineText = 18,
    PlaceholderText = 20,
    ResourceType = 17,
}

/// Name and type of one argument, signal parameter or return value.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ArgumentInfo {
    pub name: &'static str,
    pub ty: VariantType,
    /// Engine class of an object argument; empty otherwise.
    pub class_name: &'static str,
    pub metadata: ArgumentMetadata,
}

impl ArgumentInfo {
    pub fn new(name: &'static str, ty: VariantType) -> Self {
        Self {
            name,
            ty,
            class_name: "",
            metadata: ArgumentMetadata::None,
        }
    }

    /// Describes an argument of host type `T`.
    pub fn of<T: AbiType>(name: &'static str) -> Self {
        Self::new(name, T::VARIANT_TYPE)
    }

    pub fn class_name(mut self, class_name: &'static str) -> Self {
        self.class_name = class_name;
        self
    }

    pub fn metadata(mut self, metadata: ArgumentMetadata) -> Self {
        self.metadata = metadata;
        self
    }
}

/// One method exposed to the engine, with both of its entry points.
#[derive(Debug, Clone)]
pub struct MethodDescriptor {
    pub name: &'static str,
    pub call: ClassMethodCallFn,
    pub ptrcall: ClassMethodPtrCallFn,
    pub flags: u32,
    pub arguments: Vec<ArgumentInfo>,
    pub return_value: Option<ArgumentInfo>,
}

impl MethodDescriptor {
    pub fn new(name: &'static str, call: ClassMethodCallFn, ptrcall: ClassMethodPtrCallFn) -> Self {
        Self {
            name,
            call,
            ptrcall,
            flags: method_flags::DEFAULT,
            arguments: Vec::new(),
            return_value: None,
        }
    }

    pub fn argument(mut self, argument: ArgumentInfo) -> Self {
        self.arguments.push(argument);
        self
    }

    pub fn returns<T: AbiType>(mut self) -> Self {
        self.return_value = Some(ArgumentInfo::of::<T>(""));
        self
    }

    pub fn returning(mut self, info: ArgumentInfo) -> Self {
        self.return_value = Some(info);
        self
    }

    /// Marks a `&self` method.
    pub fn constant(mut self) -> Self {
        self.flags |= method_flags::CONST;
        self
    }

    pub fn flags(mut self, flags: u32) -> Self {
        self.flags = flags;
        self
    }
}

/// A property backed by a registered setter and getter.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PropertyDescriptor {
    pub name: &'static str,
    pub ty: VariantType,
    pub class_name: &'static str,
    pub hint: PropertyHint,
    pub hint_string: &'static str,
    pub usage: u32,
    /// Method names; empty for none.
    pub setter: &'static str,
    pub getter: &'static str,
}

impl PropertyDescriptor {
    pub fn new(name: &'static str, ty: VariantType) -> Self {
        Self {
            name,
            ty,
            class_name: "",
            hint: PropertyHint::None,
            hint_string: "",
            usage: property_usage::DEFAULT,
            setter: "",
            getter: "",
        }
    }

    pub fn of<T: AbiType>(name: &'static str) -> Self {
        Self::new(name, T::VARIANT_TYPE)
    }

    pub fn setter(mut self, method: &'static str) -> Self {
        self.setter = method;
        self
    }

    pub fn getter(mut self, method: &'static str) -> Self {
        self.getter = method;
        self
    }

    pub fn hint(mut self, hint: PropertyHint, hint_string: &'static str) -> Self {
        self.hint = hint;
        self.hint_string = hint_string;
        self
    }

    pub fn usage(mut self, usage: u32) -> Self {
        self.usage = usage;
        self
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SignalDescriptor {
    pub name: &'static str,
    pub arguments: Vec<ArgumentInfo>,
}

impl SignalDescriptor {
    pub fn new(name: &'static str) -> Self {
        Self {
            name,
            arguments: Vec::new(),
        }
    }

    pub fn argument(mut self, argument: ArgumentInfo) -> Self {
        self.arguments.push(argument);
        self
    }
}

/// Builder for everything a host class publishes.
///
/// Passed to [`HostMethods::register_methods`](super::HostMethods::register_methods).
/// Duplicates are reported when the registrar finishes the class.
pub struct ClassBuilder<T: HostClass> {
    virtuals: Vec<(&'static str, ClassCallVirtual)>,
    methods: Vec<MethodDescriptor>,
    properties: Vec<PropertyDescriptor>,
    signals: Vec<SignalDescriptor>,
    is_abstract: bool,
    is_exposed: bool,
    _marker: PhantomData<fn() -> T>,
}

impl<T: HostClass> ClassBuilder<T> {
    pub(crate) fn new() -> Self {
        Self {
            virtuals: Vec::new(),
            methods: Vec::new(),
            properties: Vec::new(),
            signals: Vec::new(),
            is_abstract: false,
            is_exposed: true,
            _marker: PhantomData,
        }
    }

    pub fn class_name(&self) -> &'static str {
        T::CLASS_NAME
    }

    /// Overrides the engine virtual `name` with `function`.
    pub fn virtual_method(&mut self, name: &'static str, function: ClassCallVirtual) -> &mut Self {
        self.virtuals.push((name, function));
        self
    }

    pub fn method(&mut self, method: MethodDescriptor) -> &mut Self {
        self.methods.push(method);
        self
    }

    pub fn property(&mut self, property: PropertyDescriptor) -> &mut Self {
        self.properties.push(property);
        self
    }

    pub fn signal(&mut self, signal: SignalDescriptor) -> &mut Self {
        self.signals.push(signal);
        self
    }

    /// The engine refuses to instantiate an abstract class directly.
    pub fn abstract_class(&mut self) -> &mut Self {
        self.is_abstract = true;
        self
    }

    /// Hides the class from the editor's class lists.
    pub fn hidden(&mut self) -> &mut Self {
        self.is_exposed = false;
        self
    }

    /// Validates the collected members and builds the virtual table.
    pub(crate) fn finish(self, parent: Option<Arc<VirtualTable>>) -> Result<ClassDefinition, RegistrationError> {
        let class = T::CLASS_NAME;

        let mut virtuals = VirtualTable::new(class, parent);
        for (name, function) in self.virtuals {
            virtuals.insert(name, function)?;
        }

        let mut seen = FxHashSet::default();
        for method in &self.methods {
            if !seen.insert(method.name) {
                return Err(RegistrationError::DuplicateMethod {
                    class: class.to_string(),
                    name: method.name.to_string(),
                });
            }
        }

        seen.clear();
        for property in &self.properties {
            if !seen.insert(property.name) {
                return Err(RegistrationError::DuplicateProperty {
                    class: class.to_string(),
                    name: property.name.to_string(),
                });
            }
        }

        Ok(ClassDefinition {
            virtuals: Arc::new(virtuals),
            methods: self.methods,
            properties: self.properties,
            signals: self.signals,
            is_abstract: self.is_abstract,
            is_exposed: self.is_exposed,
        })
    }
}

/// A validated class, ready to publish.
pub(crate) struct ClassDefinition {
    pub(crate) virtuals: Arc<VirtualTable>,
    pub(crate) methods: Vec<MethodDescriptor>,
    pub(crate) properties: Vec<PropertyDescriptor>,
    pub(crate) signals: Vec<SignalDescriptor>,
    pub(crate) is_abstract: bool,
    pub(crate) is_exposed: bool,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::object::{Base, Object};
    use gdbridge_sys::{CallErrorRaw, ClassInstancePtr, ConstTypePtr, ConstVariantPtr, Int, TypePtr, VariantPtr};
    use std::ffi::c_void;

    struct Gizmo;

    impl HostClass for Gizmo {
        type Base = Object;
        const CLASS_NAME: &'static str = "Gizmo";

        fn init(_base: Base<Object>) -> Self {
            Gizmo
        }
    }

    unsafe extern "C" fn call(
        _: *mut c_void,
        _: ClassInstancePtr,
        _: *const ConstVariantPtr,
        _: Int,
        _: VariantPtr,
        _: *mut CallErrorRaw,
    ) {
    }

    unsafe extern "C" fn ptrcall(_: *mut c_void, _: ClassInstancePtr, _: *const ConstTypePtr, _: TypePtr) {}

    unsafe extern "C" fn redraw(_: ClassInstancePtr, _: *const ConstTypePtr, _: TypePtr) {}

    #[test]
    fn collects_members() {
        let mut builder = ClassBuilder::<Gizmo>::new();
        builder
            .virtual_method("_redraw", redraw)
            .method(
                MethodDescriptor::new("set_size", call, ptrcall).argument(ArgumentInfo::of::<f64>("size")),
            )
            .method(MethodDescriptor::new("get_size", call, ptrcall).returns::<f64>().constant())
            .property(PropertyDescriptor::of::<f64>("size").setter("set_size").getter("get_size"))
            .signal(SignalDescriptor::new("resized"));

        let definition = builder.finish(None).unwrap();
        assert_eq!(definition.virtuals.len(), 1);
        assert!(definition.virtuals.lookup("_redraw").is_some());
        assert_eq!(definition.methods.len(), 2);
        assert_eq!(definition.methods[0].arguments[0].ty, VariantType::Float);
        assert_eq!(definition.methods[1].flags & method_flags::CONST, method_flags::CONST);
        assert_eq!(definition.properties[0].usage, property_usage::DEFAULT);
        assert_eq!(definition.signals[0].name, "resized");
        assert!(definition.is_exposed);
    }

    #[test]
    fn duplicate_method_is_rejected() {
        let mut builder = ClassBuilder::<Gizmo>::new();
        builder
            .method(MethodDescriptor::new("poke", call, ptrcall))
            .method(MethodDescriptor::new("poke", call, ptrcall));
        assert_eq!(
            builder.finish(None).err(),
            Some(RegistrationError::DuplicateMethod {
                class: "Gizmo".into(),
                name: "poke".into(),
            })
        );
    }

    #[test]
    fn duplicate_property_is_rejected() {
        let mut builder = ClassBuilder::<Gizmo>::new();
        builder
            .property(PropertyDescriptor::of::<i64>("size"))
            .property(PropertyDescriptor::of::<f64>("size"));
        assert!(matches!(
            builder.finish(None),
            Err(RegistrationError::DuplicateProperty { .. })
        ));
    }

    #[test]
    fn duplicate_virtual_is_rejected() {
        let mut builder = ClassBuilder::<Gizmo>::new();
        builder.virtual_method("_redraw", redraw).virtual_method("_redraw", redraw);
        assert!(matches!(
            builder.finish(None),
            Err(RegistrationError::DuplicateVirtual { .. })
        ));
    }
}
