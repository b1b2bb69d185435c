//! Calling into the engine.
//!
//! Four paths, one state machine each: check thread → check frame poison →
//! check receiver → dispatch → decode. A failed check returns before the
//! engine is touched, and the dropped frame releases any transferred
//! arguments it still holds.
//!
//! | Path | Arguments | Return |
//! |---|---|---|
//! | [`ptrcall`] | typed ABI slots | typed slot |
//! | [`varcall`] | variants | variant + out-error |
//! | [`utility_call`] | typed ABI slots | typed slot |
//! | [`builtin_call`] | typed ABI slots, receiver is a builtin value | typed slot |

use std::ffi::c_void;

use gdbridge_sys::{CallErrorRaw, ObjectPtr};

use crate::abi;
use crate::builtin::PayloadType;
use crate::error::CallError;
use crate::frame::CallFrame;
use crate::marshal::{FromAbiReturn, ReturnOwnership};
use crate::method_bind::{BuiltinMethod, MethodBind, MethodFlags, UtilityFunction};
use crate::object::RawObject;
use crate::variant::Variant;

fn check_thread(name: &'static str, thread_safe: bool) -> Result<(), CallError> {
    if thread_safe || !crate::init::enforces_main_thread() || abi::on_main_thread() {
        return Ok(());
    }
    tracing::error!(target: "gdbridge::dispatch", method = name, "call off the main thread refused");
    Err(CallError::WrongThread { method: name })
}

fn check_poison(frame: &CallFrame<'_>) -> Result<(), CallError> {
    match frame.poison() {
        Some(err) => {
            tracing::warn!(target: "gdbridge::dispatch", %err, "poisoned frame not dispatched");
            Err(CallError::PoisonedFrame(err))
        }
        None => Ok(()),
    }
}

/// Variable-argument binds have no pointer-call form.
fn check_fixed_arity(bind: MethodBind) -> Result<(), CallError> {
    if !bind.flags().contains(MethodFlags::VARARG) {
        return Ok(());
    }
    tracing::error!(target: "gdbridge::dispatch", method = bind.name(), "vararg bind refused on the pointer-call path");
    Err(CallError::VarargPtrcall { method: bind.name() })
}

/// An object return is adopted only when the bind declares it owned.
fn check_return_ownership<R: FromAbiReturn>(bind: MethodBind) -> Result<(), CallError> {
    let returns_owned = bind.flags().contains(MethodFlags::RETURNS_OWNED);
    let mismatch = match R::OWNERSHIP {
        ReturnOwnership::NotObject => false,
        ReturnOwnership::Owned => !returns_owned,
        ReturnOwnership::Borrowed => returns_owned,
    };
    if !mismatch {
        return Ok(());
    }
    tracing::error!(target: "gdbridge::dispatch", method = bind.name(), returns_owned, "object return decoded with the wrong ownership");
    Err(CallError::WrongReturnKind {
        method: bind.name(),
        returns_owned,
    })
}

fn receiver(bind: MethodBind, object: Option<RawObject>) -> Result<ObjectPtr, CallError> {
    match object {
        Some(object) => Ok(object.as_ptr()),
        None if bind.flags().contains(MethodFlags::STATIC) => Ok(std::ptr::null_mut()),
        None => {
            tracing::error!(target: "gdbridge::dispatch", method = bind.name(), "call on a null instance");
            Err(CallError::InstanceIsNull)
        }
    }
}

/// Pointer-call: the fast path. Arguments must match the bind's signature
/// exactly; the engine does not check them. Object returns must be decoded
/// as `Option<Owned<T>>` when the bind is `RETURNS_OWNED` and as a
/// [`RawObject`] otherwise.
pub fn ptrcall<R: FromAbiReturn>(
    bind: MethodBind,
    object: Option<RawObject>,
    mut frame: CallFrame<'_>,
) -> Result<R, CallError> {
    #[cfg(feature = "profiling")]
    profiling::scope!("dispatch::ptrcall");

    check_thread(bind.name(), bind.is_thread_safe())?;
    check_fixed_arity(bind)?;
    check_return_ownership::<R>(bind)?;
    check_poison(&frame)?;
    let instance = receiver(bind, object)?;

    let ret = frame.ret::<R>();
    unsafe {
        (abi::interface().object_method_bind_ptrcall)(bind.as_ptr(), instance, frame.args_ptr(), ret);
        frame.complete_handovers();
        Ok(frame.take_ret::<R>())
    }
}

/// Variant-call: the engine checks arity and argument types and reports
/// failures through the out-error.
pub fn varcall(
    bind: MethodBind,
    object: Option<RawObject>,
    args: &[&Variant],
) -> Result<Variant, CallError> {
    #[cfg(feature = "profiling")]
    profiling::scope!("dispatch::varcall");

    check_thread(bind.name(), bind.is_thread_safe())?;
    let instance = receiver(bind, object)?;

    let mut frame = CallFrame::new();
    for arg in args {
        frame.variant_arg(arg);
    }
    check_poison(&frame)?;

    let mut error = CallErrorRaw::OK;
    let count = frame.len() as i64;
    let ret = unsafe {
        Variant::construct(|dest| {
            (abi::interface().object_method_bind_call)(
                bind.as_ptr(),
                instance,
                frame.args_ptr(),
                count,
                dest,
                &mut error,
            )
        })
    };

    if let Err(err) = CallError::check(&error) {
        tracing::debug!(target: "gdbridge::dispatch", method = bind.name(), %err, "variant-call failed");
        return Err(err);
    }
    Ok(ret)
}

/// Calls a global utility function.
pub fn utility_call<R: FromAbiReturn>(
    function: UtilityFunction,
    mut frame: CallFrame<'_>,
) -> Result<R, CallError> {
    #[cfg(feature = "profiling")]
    profiling::scope!("dispatch::utility_call");

    check_thread(function.name, function.thread_safe)?;
    check_poison(&frame)?;

    let ret = frame.ret::<R>();
    let count = frame.len() as i32;
    unsafe {
        (function.function)(ret, frame.args_ptr(), count);
        frame.complete_handovers();
        Ok(frame.take_ret::<R>())
    }
}

/// Calls a method of a builtin type on the value at `base`.
///
/// # Safety
///
/// `base` must point at a live value of `method.variant_type()`.
pub unsafe fn builtin_call<R: FromAbiReturn>(
    method: BuiltinMethod,
    base: *mut c_void,
    mut frame: CallFrame<'_>,
) -> Result<R, CallError> {
    check_poison(&frame)?;

    let ret = frame.ret::<R>();
    let count = frame.len() as i32;
    unsafe {
        (method.function)(base, frame.args_ptr(), ret, count);
        frame.complete_handovers();
        Ok(frame.take_ret::<R>())
    }
}

/// [`builtin_call`] on a registry-held value; mutations are written back.
pub(crate) fn builtin_call_on<P: PayloadType, R: FromAbiReturn>(
    value: &P,
    method: BuiltinMethod,
    frame: CallFrame<'_>,
) -> Result<R, CallError> {
    value
        .with_sys(|base| unsafe { builtin_call::<R>(method, base, frame) })
        .map_err(CallError::PoisonedFrame)?
}
