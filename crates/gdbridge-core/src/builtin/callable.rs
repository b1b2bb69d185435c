use std::ffi::c_void;
use std::fmt;

use crate::abi;
use crate::builtin::{PayloadType, StringName, impl_payload_type};
use crate::error::CallError;
use crate::handle::{Payload, PayloadKind};
use crate::object::RawObject;
use crate::variant::{ToVariant, Variant};

/// A bound method: an object plus a method name.
#[derive(Clone)]
pub struct Callable {
    payload: Payload,
}

impl_payload_type!(Callable, Callable, 2);

impl Callable {
    /// The null callable; calling it fails.
    pub fn invalid() -> Self {
        Self {
            payload: Payload::new_default(PayloadKind::Callable),
        }
    }

    pub fn from_object_method(object: RawObject, method: &str) -> Self {
        let ctor = abi::interface().conversions.callable_from_method;
        let method = StringName::from(method);
        let object_ptr = object.as_ptr();
        let payload = match method.payload().raw() {
            Ok(name) => unsafe {
                Payload::construct(PayloadKind::Callable, |dest| {
                    let args: [*const c_void; 2] = [
                        (&object_ptr as *const gdbridge_sys::ObjectPtr).cast(),
                        name.as_ptr().cast(),
                    ];
                    ctor(dest, args.as_ptr())
                })
            },
            Err(err) => {
                tracing::warn!(target: "gdbridge::handle", %err, "callable built from a dead method name");
                Payload::new_default(PayloadKind::Callable)
            }
        };
        Self { payload }
    }

    /// Invokes the bound method through the engine's variant-call.
    pub fn call(&self, args: &[&Variant]) -> Result<Variant, CallError> {
        self.to_variant().call("call", args)
    }
}

impl fmt::Debug for Callable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Callable({})", self.to_variant().stringify())
    }
}

/// A named signal on an object.
#[derive(Clone)]
pub struct Signal {
    payload: Payload,
}

impl_payload_type!(Signal, Signal, 2);

impl Signal {
    pub fn new(object: RawObject, name: &str) -> Self {
        let ctor = abi::interface().conversions.signal_from_name;
        let name = StringName::from(name);
        let object_ptr = object.as_ptr();
        let payload = match name.payload().raw() {
            Ok(name) => unsafe {
                Payload::construct(PayloadKind::Signal, |dest| {
                    let args: [*const c_void; 2] = [
                        (&object_ptr as *const gdbridge_sys::ObjectPtr).cast(),
                        name.as_ptr().cast(),
                    ];
                    ctor(dest, args.as_ptr())
                })
            },
            Err(err) => {
                tracing::warn!(target: "gdbridge::handle", %err, "signal built from a dead name");
                Payload::new_default(PayloadKind::Signal)
            }
        };
        Self { payload }
    }

    /// Emits through the engine; connected callables run before this returns.
    pub fn emit(&self, args: &[&Variant]) -> Result<(), CallError> {
        self.to_variant().call("emit", args).map(drop)
    }
}

impl fmt::Debug for Signal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Signal({})", self.to_variant().stringify())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::object::{Object, Owned};
    use crate::test_support;

    #[test]
    fn callable_invokes_the_bound_method() {
        let _guard = test_support::lock();
        let object = Owned::<Object>::construct();
        let callable = Callable::from_object_method(object.raw(), "get_class");
        let class = callable.call(&[]).unwrap();
        assert_eq!(class.to::<String>().unwrap(), "Object");
        assert_eq!(Callable::invalid().call(&[]).err(), Some(CallError::InstanceIsNull));
    }

    #[test]
    fn signal_round_trips_through_variant() {
        let _guard = test_support::lock();
        let object = Owned::<Object>::construct();
        let signal = Signal::new(object.raw(), "changed");
        let variant = Variant::from(&signal);
        assert_eq!(variant.get_type(), crate::VariantType::Signal);
        assert!(variant.to::<Signal>().is_ok());
        assert!(signal.emit(&[]).is_ok());
    }
}
