//! `extern "C"` class callbacks, monomorphized per host class.

use std::ffi::c_void;
use std::sync::Arc;

use gdbridge_sys::{
    Bool, ClassCallVirtual, ClassInstancePtr, ConstStringNamePtr, ConstVariantPtr, FALSE,
    ObjectPtr, StringPtr, TRUE, VariantPtr,
};

use crate::abi;
use crate::builtin::{GString, PayloadType, StringName};
use crate::marshal::{FromAbiParam, IntoAbiReturn};
use crate::object::{Base, EngineClass, RawObject};
use crate::registration::{HostClass, HostHooks};
use crate::shim::{self, VirtualTable};
use crate::variant::Variant;

/// What the engine hands back as `class_userdata`.
pub(crate) struct ClassUserdata {
    pub(crate) class: &'static str,
    pub(crate) virtuals: Arc<VirtualTable>,
}

unsafe fn decode_name(name: ConstStringNamePtr) -> Option<String> {
    if name.is_null() {
        return None;
    }
    let name = unsafe { StringName::from_abi_param(name.cast()) };
    Some(name.to_string())
}

/// Constructs the native base object and attaches a fresh instance of `T`.
pub(crate) unsafe extern "C" fn create_instance<T: HostClass>(_userdata: *mut c_void) -> ObjectPtr {
    let interface = abi::interface();
    let base_name = StringName::from(<T::Base as EngineClass>::CLASS_NAME);
    let object = base_name
        .with_sys(|name| unsafe { (interface.classdb_construct_object)(name) })
        .ok()
        .and_then(|ptr| unsafe { RawObject::from_sys(ptr) });
    let Some(object) = object else {
        tracing::error!(target: "gdbridge::registration", class = T::CLASS_NAME, "engine could not construct the base object");
        return std::ptr::null_mut();
    };

    let value = T::init(Base::new(object));
    let instance = shim::register_instance::<T>(object, value);

    let class_name = StringName::from(T::CLASS_NAME);
    let attached = class_name.with_sys(|name| unsafe {
        (interface.object_set_instance)(object.as_ptr(), name, instance)
    });
    if let Err(err) = attached {
        tracing::error!(target: "gdbridge::registration", class = T::CLASS_NAME, %err, "instance could not be attached");
    }
    object.as_ptr()
}

pub(crate) unsafe extern "C" fn free_instance<T: HostClass>(_userdata: *mut c_void, instance: ClassInstancePtr) {
    unsafe { shim::free_instance::<T>(instance) };
}

pub(crate) unsafe extern "C" fn get_virtual(
    userdata: *mut c_void,
    name: ConstStringNamePtr,
) -> Option<ClassCallVirtual> {
    if userdata.is_null() {
        return None;
    }
    let userdata = unsafe { &*userdata.cast::<ClassUserdata>() };
    let name = unsafe { decode_name(name) }?;
    let found = userdata.virtuals.lookup(&name);
    tracing::trace!(target: "gdbridge::registration", class = userdata.class, %name, found = found.is_some(), "virtual lookup");
    found
}

pub(crate) unsafe extern "C" fn set_property<T: HostHooks>(
    instance: ClassInstancePtr,
    name: ConstStringNamePtr,
    value: ConstVariantPtr,
) -> Bool {
    let Some(name) = (unsafe { decode_name(name) }) else {
        return FALSE;
    };
    let value = unsafe { Variant::from_borrowed(value) };
    match shim::hook_mut::<T, bool>("set", instance, |this| this.set_property(&name, &value)) {
        Some(true) => TRUE,
        _ => FALSE,
    }
}

pub(crate) unsafe extern "C" fn get_property<T: HostHooks>(
    instance: ClassInstancePtr,
    name: ConstStringNamePtr,
    ret: VariantPtr,
) -> Bool {
    let Some(name) = (unsafe { decode_name(name) }) else {
        return FALSE;
    };
    let Some(Some(value)) = shim::hook_ref::<T, Option<Variant>>("get", instance, |this| this.get_property(&name))
    else {
        return FALSE;
    };
    match unsafe { value.into_abi_return(ret.cast()) } {
        Ok(()) => TRUE,
        Err(err) => {
            tracing::error!(target: "gdbridge::registration", class = T::CLASS_NAME, %name, %err, "property value could not be returned");
            FALSE
        }
    }
}

pub(crate) unsafe extern "C" fn notification<T: HostHooks>(instance: ClassInstancePtr, what: i32, reversed: Bool) {
    shim::hook_mut::<T, ()>("notification", instance, |this| this.on_notification(what, reversed != FALSE));
}

pub(crate) unsafe extern "C" fn to_string<T: HostHooks>(
    instance: ClassInstancePtr,
    is_valid: *mut Bool,
    out: StringPtr,
) {
    let text = shim::hook_ref::<T, Option<String>>("to_string", instance, |this| HostHooks::to_string(this)).flatten();
    let valid = match text {
        Some(text) => match unsafe { GString::from(text).into_abi_return(out.cast()) } {
            Ok(()) => true,
            Err(err) => {
                tracing::error!(target: "gdbridge::registration", class = T::CLASS_NAME, %err, "string form could not be returned");
                false
            }
        },
        None => false,
    };
    if !is_valid.is_null() {
        unsafe { is_valid.write(if valid { TRUE } else { FALSE }) };
    }
}

pub(crate) unsafe extern "C" fn reference<T: HostClass>(instance: ClassInstancePtr) {
    tracing::trace!(target: "gdbridge::registration", class = T::CLASS_NAME, live = shim::is_live(instance), "reference");
}

pub(crate) unsafe extern "C" fn unreference<T: HostClass>(instance: ClassInstancePtr) {
    tracing::trace!(target: "gdbridge::registration", class = T::CLASS_NAME, live = shim::is_live(instance), "unreference");
}
