//! Publishes host classes through the class-database functions and keeps the
//! records needed to unregister them.

use std::ffi::c_void;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

use bumpalo::Bump;
use gdbridge_sys::{
    ClassCreationInfo, ClassLibraryPtr, ClassMethodInfo, FALSE, PropertyInfo, TRUE,
    property_usage,
};

use crate::abi;
use crate::builtin::{GString, PayloadType, StringName};
use crate::error::{HandleError, RegistrationError};
use crate::handle::Payload;
use crate::object::EngineClass;
use crate::registration::builder::{
    ArgumentInfo, ClassBuilder, ClassDefinition, MethodDescriptor, PropertyDescriptor, PropertyHint,
    SignalDescriptor,
};
use crate::registration::callbacks::{self, ClassUserdata};
use crate::registration::{HostClass, HostHooks, HostMethods};
use crate::shim::VirtualTable;

struct ClassRecord {
    name: &'static str,
    // Engine holds pointers into these until the class is unregistered.
    userdata: Box<ClassUserdata>,
    _method_userdata: Vec<Box<MethodUserdata>>,
}

/// Handed to a method's entry points as `method_userdata`.
struct MethodUserdata {
    _class: &'static str,
    _method: &'static str,
}

static RECORDS: Mutex<Vec<ClassRecord>> = Mutex::new(Vec::new());
static CLOSED: AtomicBool = AtomicBool::new(false);

fn with_records<R>(f: impl FnOnce(&mut Vec<ClassRecord>) -> R) -> R {
    let mut records = RECORDS.lock().unwrap_or_else(PoisonError::into_inner);
    f(&mut records)
}

/// Names of the registered host classes, in registration order.
pub fn registered_classes() -> Vec<&'static str> {
    with_records(|records| records.iter().map(|record| record.name).collect())
}

fn virtual_table_of(class: &str) -> Option<Arc<VirtualTable>> {
    with_records(|records| {
        records
            .iter()
            .find(|record| record.name == class)
            .map(|record| record.userdata.virtuals.clone())
    })
}

/// Unregisters every class, most derived first, and closes registration.
pub(crate) fn unregister_all(library: ClassLibraryPtr) {
    CLOSED.store(true, Ordering::Release);
    let records = with_records(std::mem::take);
    let Some(interface) = abi::try_interface() else {
        return;
    };
    for record in records.into_iter().rev() {
        let name = StringName::from(record.name);
        let result = name.with_sys(|name| unsafe {
            (interface.classdb_unregister_extension_class)(library, name)
        });
        match result {
            Ok(()) => tracing::debug!(target: "gdbridge::registration", class = record.name, "class unregistered"),
            Err(err) => tracing::error!(target: "gdbridge::registration", class = record.name, %err, "class could not be unregistered"),
        }
    }
}

// ============================================================================
// Descriptor strings
// ============================================================================

/// Engine strings referenced by descriptors, alive for one registration call.
struct DescriptorArena {
    bump: Bump,
    owners: Vec<Payload>,
}

impl DescriptorArena {
    fn new() -> Self {
        Self {
            bump: Bump::new(),
            owners: Vec::new(),
        }
    }

    fn pin<P: PayloadType>(&mut self, value: P) -> Result<*mut c_void, HandleError> {
        let raw = value.payload().raw()?;
        self.owners.push(value.into_payload());
        Ok(self.bump.alloc(raw).as_mut_ptr().cast())
    }

    fn name(&mut self, text: &str) -> Result<*mut c_void, HandleError> {
        self.pin(StringName::from(text))
    }

    fn string(&mut self, text: &str) -> Result<*mut c_void, HandleError> {
        self.pin(GString::from(text))
    }

    fn property(
        &mut self,
        info: &ArgumentInfo,
        hint: PropertyHint,
        hint_string: &str,
        usage: u32,
    ) -> Result<PropertyInfo, HandleError> {
        Ok(PropertyInfo {
            ty: info.ty.as_raw(),
            name: self.name(info.name)?,
            class_name: self.name(info.class_name)?,
            hint: hint as u32,
            hint_string: self.string(hint_string)?,
            usage,
        })
    }

    fn argument(&mut self, info: &ArgumentInfo) -> Result<PropertyInfo, HandleError> {
        self.property(info, PropertyHint::None, "", property_usage::DEFAULT)
    }
}

// ============================================================================
// Registrar
// ============================================================================

/// Registers host classes during library initialization.
///
/// Handed to [`ExtensionLibrary::register_classes`](crate::init::ExtensionLibrary::register_classes).
/// A class extending another host class must be registered after it.
pub struct ClassRegistrar {
    library: ClassLibraryPtr,
}

impl ClassRegistrar {
    pub(crate) fn new(library: ClassLibraryPtr) -> Self {
        CLOSED.store(false, Ordering::Release);
        Self { library }
    }

    pub fn register<T: HostClass + HostHooks + HostMethods>(&mut self) -> Result<&mut Self, RegistrationError> {
        #[cfg(feature = "profiling")]
        profiling::scope!("ClassRegistrar::register");

        if CLOSED.load(Ordering::Acquire) {
            return Err(RegistrationError::Closed);
        }
        let class = T::CLASS_NAME;
        if virtual_table_of(class).is_some() {
            return Err(RegistrationError::DuplicateClass(class.to_string()));
        }

        let (parent_name, parent_table) = match T::PARENT_HOST {
            Some(parent) => match virtual_table_of(parent) {
                Some(table) => (parent, Some(table)),
                None => {
                    return Err(RegistrationError::ParentNotRegistered {
                        class: class.to_string(),
                        parent: parent.to_string(),
                    });
                }
            },
            None => (<T::Base as EngineClass>::CLASS_NAME, None),
        };

        let mut builder = ClassBuilder::<T>::new();
        T::register_methods(&mut builder);
        let definition = builder.finish(parent_table)?;

        let descriptor = |source: HandleError| RegistrationError::Descriptor {
            class: class.to_string(),
            source,
        };
        let record = self.publish::<T>(parent_name, definition).map_err(descriptor)?;
        with_records(|records| records.push(record));

        tracing::info!(target: "gdbridge::registration", class, parent = parent_name, "class registered");
        Ok(self)
    }

    fn publish<T: HostClass + HostHooks>(
        &self,
        parent: &'static str,
        definition: ClassDefinition,
    ) -> Result<ClassRecord, HandleError> {
        let interface = abi::interface();
        let class = T::CLASS_NAME;
        let mut arena = DescriptorArena::new();
        let class_name = arena.name(class)?;
        let parent_name = arena.name(parent)?;

        let mut userdata = Box::new(ClassUserdata {
            class,
            virtuals: definition.virtuals,
        });
        let ref_counted = <T::Base as EngineClass>::REF_COUNTED;
        let info = ClassCreationInfo {
            is_virtual: FALSE,
            is_abstract: if definition.is_abstract { TRUE } else { FALSE },
            is_exposed: if definition.is_exposed { TRUE } else { FALSE },
            set_func: Some(callbacks::set_property::<T>),
            get_func: Some(callbacks::get_property::<T>),
            notification_func: Some(callbacks::notification::<T>),
            to_string_func: Some(callbacks::to_string::<T>),
            reference_func: ref_counted.then_some(callbacks::reference::<T> as _),
            unreference_func: ref_counted.then_some(callbacks::unreference::<T> as _),
            create_instance_func: Some(callbacks::create_instance::<T>),
            free_instance_func: Some(callbacks::free_instance::<T>),
            get_virtual_func: Some(callbacks::get_virtual),
            class_userdata: (&mut *userdata as *mut ClassUserdata).cast(),
        };
        unsafe { (interface.classdb_register_extension_class)(self.library, class_name, parent_name, &info) };

        let members = self.publish_members(
            &mut arena,
            class,
            class_name,
            &definition.methods,
            &definition.properties,
            &definition.signals,
        );
        match members {
            Ok(method_userdata) => Ok(ClassRecord {
                name: class,
                userdata,
                _method_userdata: method_userdata,
            }),
            Err(err) => {
                // The engine points at `userdata` until the class is gone.
                unsafe { (interface.classdb_unregister_extension_class)(self.library, class_name) };
                tracing::warn!(target: "gdbridge::registration", class, %err, "class withdrawn after a failed member descriptor");
                drop(userdata);
                Err(err)
            }
        }
    }

    fn publish_members(
        &self,
        arena: &mut DescriptorArena,
        class: &'static str,
        class_name: *mut c_void,
        methods: &[MethodDescriptor],
        properties: &[PropertyDescriptor],
        signals: &[SignalDescriptor],
    ) -> Result<Vec<Box<MethodUserdata>>, HandleError> {
        let interface = abi::interface();
        let mut method_userdata = Vec::with_capacity(methods.len());
        for method in methods {
            let mut data = Box::new(MethodUserdata {
                _class: class,
                _method: method.name,
            });
            let mut arguments = method
                .arguments
                .iter()
                .map(|argument| arena.argument(argument))
                .collect::<Result<Vec<_>, _>>()?;
            let mut metadata: Vec<u32> = method.arguments.iter().map(|argument| argument.metadata.into()).collect();
            let mut return_info = method.return_value.as_ref().map(|info| arena.argument(info)).transpose()?;

            let info = ClassMethodInfo {
                name: arena.name(method.name)?,
                method_userdata: (&mut *data as *mut MethodUserdata).cast(),
                call_func: Some(method.call),
                ptrcall_func: Some(method.ptrcall),
                method_flags: method.flags,
                has_return_value: if return_info.is_some() { TRUE } else { FALSE },
                return_value_info: return_info
                    .as_mut()
                    .map_or(std::ptr::null_mut(), |info| info as *mut PropertyInfo),
                return_value_metadata: method.return_value.map_or(0, |info| info.metadata.into()),
                argument_count: u32::try_from(arguments.len()).unwrap_or(u32::MAX),
                arguments_info: arguments.as_mut_ptr(),
                arguments_metadata: metadata.as_mut_ptr(),
            };
            unsafe { (interface.classdb_register_extension_class_method)(self.library, class_name, &info) };
            tracing::trace!(target: "gdbridge::registration", class, method = method.name, "method registered");
            method_userdata.push(data);
        }

        for property in properties {
            let argument = ArgumentInfo::new(property.name, property.ty).class_name(property.class_name);
            let info = arena.property(&argument, property.hint, property.hint_string, property.usage)?;
            let setter = arena.name(property.setter)?;
            let getter = arena.name(property.getter)?;
            unsafe {
                (interface.classdb_register_extension_class_property)(self.library, class_name, &info, setter, getter)
            };
        }

        for signal in signals {
            let arguments = signal
                .arguments
                .iter()
                .map(|argument| arena.argument(argument))
                .collect::<Result<Vec<_>, _>>()?;
            let name = arena.name(signal.name)?;
            unsafe {
                (interface.classdb_register_extension_class_signal)(
                    self.library,
                    class_name,
                    name,
                    arguments.as_ptr(),
                    arguments.len() as i64,
                )
            };
        }

        Ok(method_userdata)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::object::{Base, Object};
    use crate::shim;
    use crate::test_support;
    use gdbridge_sys::{ClassInstancePtr, ConstTypePtr, TypePtr};

    fn library() -> ClassLibraryPtr {
        std::ptr::without_provenance_mut(0x20)
    }

    struct Beacon {
        pulses: i64,
        _base: Base<Object>,
    }

    impl HostClass for Beacon {
        type Base = Object;
        const CLASS_NAME: &'static str = "RegistrarBeacon";

        fn init(base: Base<Object>) -> Self {
            Self { pulses: 0, _base: base }
        }
    }

    impl HostHooks for Beacon {}

    unsafe extern "C" fn pulse(instance: ClassInstancePtr, _: *const ConstTypePtr, ret: TypePtr) {
        unsafe {
            shim::ptr_trampoline_mut::<Beacon, i64>("_pulse", instance, ret, |this| {
                this.pulses += 1;
                this.pulses
            })
        };
    }

    impl HostMethods for Beacon {
        fn register_methods(builder: &mut ClassBuilder<Self>) {
            builder.virtual_method("_pulse", pulse);
        }
    }

    struct Orphan;

    impl HostClass for Orphan {
        type Base = Object;
        const CLASS_NAME: &'static str = "RegistrarOrphan";
        const PARENT_HOST: Option<&'static str> = Some("RegistrarMissing");

        fn init(_base: Base<Object>) -> Self {
            Orphan
        }
    }

    impl HostHooks for Orphan {}

    impl HostMethods for Orphan {
        fn register_methods(_builder: &mut ClassBuilder<Self>) {}
    }

    #[test]
    fn registered_class_is_constructed_through_the_engine() {
        let _guard = test_support::lock();
        ClassRegistrar::new(library()).register::<Beacon>().unwrap();

        let snapshot = gdbridge_mock::extension_class("RegistrarBeacon").unwrap();
        assert_eq!(snapshot.parent, "Object");
        assert!(!snapshot.ref_counted_hooks);
        assert!(registered_classes().contains(&"RegistrarBeacon"));

        let object = gdbridge_mock::construct("RegistrarBeacon").unwrap();
        let instance = gdbridge_mock::instance_of(object).unwrap();
        assert!(shim::is_live(instance));

        let mut ret = 0i64;
        for _ in 0..2 {
            assert!(unsafe {
                gdbridge_mock::call_virtual(object, "_pulse", &[], (&mut ret as *mut i64).cast())
            });
        }
        assert_eq!(ret, 2);
        assert!(!unsafe { gdbridge_mock::call_virtual(object, "_missing", &[], std::ptr::null_mut()) });

        gdbridge_mock::destroy(object);
        assert!(!shim::is_live(instance));
        assert!(!unsafe { gdbridge_mock::call_virtual(object, "_pulse", &[], (&mut ret as *mut i64).cast()) });
    }

    #[test]
    fn second_registration_is_a_duplicate() {
        let _guard = test_support::lock();
        let mut registrar = ClassRegistrar::new(library());
        if !registered_classes().contains(&"RegistrarBeacon") {
            registrar.register::<Beacon>().unwrap();
        }
        assert!(matches!(
            registrar.register::<Beacon>(),
            Err(RegistrationError::DuplicateClass(name)) if name == "RegistrarBeacon"
        ));
    }

    #[test]
    fn parent_must_be_registered_first() {
        let _guard = test_support::lock();
        let err = ClassRegistrar::new(library()).register::<Orphan>().err();
        assert_eq!(
            err,
            Some(RegistrationError::ParentNotRegistered {
                class: "RegistrarOrphan".into(),
                parent: "RegistrarMissing".into(),
            })
        );
        assert!(gdbridge_mock::extension_class("RegistrarOrphan").is_none());
    }
}
