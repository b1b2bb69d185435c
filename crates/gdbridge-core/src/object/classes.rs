//! `Object` and `RefCounted`, the two engine classes the runtime itself calls.

use crate::abi;
use crate::builtin::{GString, PayloadType, StringName};
use crate::dispatch;
use crate::engine_class;
use crate::error::{CallError, InitError};
use crate::frame::CallFrame;
use crate::handle::{Payload, PayloadKind, RawSlots};
use crate::method_table;
use crate::object::{Bound, EngineClass, ObjectRef, RawObject};
use crate::variant::{ToVariant, Variant};

engine_class! {
    /// Root of the engine class hierarchy.
    pub struct Object: manual [];

    /// Base of every reference-counted class.
    pub struct RefCounted: ref_counted [Object];
}

method_table! {
    pub static OBJECT: ObjectMethod = "Object" {
        get_class = 201670096 [CONST];
        is_class = 3927539163 [CONST];
        set = 3776071444;
        get = 2760726917 [CONST];
        notification = 4023243586;
        to_string = 2841200299;
        has_method = 2619796661 [CONST];
        call = 3400424181 [VARARG];
        emit_signal = 4047867050 [VARARG];
    }
}

method_table! {
    pub static REF_COUNTED: RefCountedMethod = "RefCounted" {
        init_ref = 2240911060;
        reference = 2240911060;
        unreference = 2240911060;
        get_reference_count = 3905245786 [CONST];
    }
}

pub(crate) fn resolve_tables() -> Result<(), InitError> {
    OBJECT.resolve()?;
    REF_COUNTED.resolve()
}

/// The raw reference-count operations. Each returns the engine's bool.
pub(crate) mod ref_counting {
    use super::*;

    fn call(method: RefCountedMethod, object: RawObject) -> Result<bool, CallError> {
        dispatch::ptrcall::<bool>(method.bind(), Some(object), CallFrame::new())
    }

    pub(crate) fn init_ref(object: RawObject) -> Result<bool, CallError> {
        call(RefCountedMethod::init_ref, object)
    }

    pub(crate) fn reference(object: RawObject) -> Result<bool, CallError> {
        call(RefCountedMethod::reference, object)
    }

    /// `true` when that was the last reference and the object must be
    /// destroyed.
    pub(crate) fn unreference(object: RawObject) -> Result<bool, CallError> {
        call(RefCountedMethod::unreference, object)
    }
}

/// Methods available on every object.
pub trait ObjectExt: ObjectRef<Object> {
    fn get_class(&self) -> Result<String, CallError> {
        let class: GString = dispatch::ptrcall(
            ObjectMethod::get_class.bind(),
            Some(self.object_raw()),
            CallFrame::new(),
        )?;
        Ok(class.to_string())
    }

    fn is_class(&self, class: &str) -> Result<bool, CallError> {
        let mut frame = CallFrame::new();
        frame.arg(class);
        dispatch::ptrcall(ObjectMethod::is_class.bind(), Some(self.object_raw()), frame)
    }

    fn set(&self, property: &str, value: &Variant) -> Result<(), CallError> {
        let property = StringName::from(property);
        let mut frame = CallFrame::new();
        frame.arg(&property).arg(value);
        dispatch::ptrcall(ObjectMethod::set.bind(), Some(self.object_raw()), frame)
    }

    fn get(&self, property: &str) -> Result<Variant, CallError> {
        let property = StringName::from(property);
        let mut frame = CallFrame::new();
        frame.arg(&property);
        dispatch::ptrcall(ObjectMethod::get.bind(), Some(self.object_raw()), frame)
    }

    fn notification(&self, what: i32) -> Result<(), CallError> {
        let mut frame = CallFrame::new();
        frame.arg(what).arg(false);
        dispatch::ptrcall(ObjectMethod::notification.bind(), Some(self.object_raw()), frame)
    }

    fn to_gstring(&self) -> Result<GString, CallError> {
        dispatch::ptrcall(
            ObjectMethod::to_string.bind(),
            Some(self.object_raw()),
            CallFrame::new(),
        )
    }

    fn has_method(&self, method: &str) -> Result<bool, CallError> {
        let method = StringName::from(method);
        let mut frame = CallFrame::new();
        frame.arg(&method);
        dispatch::ptrcall(ObjectMethod::has_method.bind(), Some(self.object_raw()), frame)
    }

    /// Calls any method by name through the engine's variant-call.
    fn call(&self, method: &str, args: &[&Variant]) -> Result<Variant, CallError> {
        let method = StringName::from(method).to_variant();
        let mut all = Vec::with_capacity(args.len() + 1);
        all.push(&method);
        all.extend_from_slice(args);
        dispatch::varcall(ObjectMethod::call.bind(), Some(self.object_raw()), &all)
    }

    fn emit_signal(&self, signal: &str, args: &[&Variant]) -> Result<(), CallError> {
        let signal = StringName::from(signal).to_variant();
        let mut all = Vec::with_capacity(args.len() + 1);
        all.push(&signal);
        all.extend_from_slice(args);
        dispatch::varcall(ObjectMethod::emit_signal.bind(), Some(self.object_raw()), &all)
            .map(drop)
    }
}

impl<R: ObjectRef<Object> + ?Sized> ObjectExt for R {}

pub trait RefCountedExt: ObjectRef<RefCounted> {
    fn get_reference_count(&self) -> Result<i64, CallError> {
        dispatch::ptrcall(
            RefCountedMethod::get_reference_count.bind(),
            Some(self.object_raw()),
            CallFrame::new(),
        )
    }
}

impl<R: ObjectRef<RefCounted> + ?Sized> RefCountedExt for R {}

/// The engine singleton of class `T`, if the engine registered one.
pub fn singleton<T: EngineClass>() -> Option<Bound<'static, T>> {
    let name = StringName::from(T::CLASS_NAME);
    let ptr = name
        .with_sys(|name| unsafe { (abi::interface().global_get_singleton)(name) })
        .ok()?;
    let raw = unsafe { RawObject::from_sys(ptr) };
    if raw.is_none() {
        tracing::warn!(target: "gdbridge::dispatch", class = T::CLASS_NAME, "no such singleton");
    }
    // Singletons live until the engine shuts the library down.
    raw.map(|raw| unsafe { Bound::from_raw(raw) })
}

/// The class name the engine reports for `object`, as seen by this library.
pub fn class_name_of(object: RawObject) -> Option<String> {
    let mut slots: RawSlots = [0; 3];
    let found = unsafe {
        (abi::interface().object_get_class_name)(
            object.as_ptr(),
            crate::init::library_ptr(),
            slots.as_mut_ptr().cast(),
        )
    } != 0;
    found.then(|| StringName::from_payload(Payload::adopt(PayloadKind::StringName, slots)).to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::VariantType;
    use crate::object::Owned;
    use crate::test_support;

    #[test]
    fn get_class_reports_the_dynamic_class() {
        let _guard = test_support::lock();
        let object = Owned::<RefCounted>::construct();
        assert_eq!(object.get_class().unwrap(), "RefCounted");
        assert_eq!(object.is_class("Object"), Ok(true));
        assert_eq!(class_name_of(object.raw()).as_deref(), Some("RefCounted"));
    }

    #[test]
    fn property_set_and_get() {
        let _guard = test_support::lock();
        let object = Owned::<Object>::construct();
        object.set("speed", &Variant::from(3i64)).unwrap();
        assert_eq!(object.get("speed").unwrap().to::<i64>(), Ok(3));
        assert!(object.get("missing").unwrap().is_nil());
    }

    #[test]
    fn call_by_name() {
        let _guard = test_support::lock();
        let object = Owned::<Object>::construct();
        let class = object.call("get_class", &[]).unwrap();
        assert_eq!(class.get_type(), VariantType::String);
        assert_eq!(object.call("no_such_method", &[]), Err(CallError::InvalidMethod));
        assert_eq!(object.has_method("get_class"), Ok(true));
    }

    #[test]
    fn missing_singleton_is_none() {
        let _guard = test_support::lock();
        assert!(singleton::<RefCounted>().is_none());
    }
}
