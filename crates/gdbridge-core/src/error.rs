//! Error types for every layer of the runtime.
//!
//! ## Error Hierarchy
//!
//! ```text
//! BridgeError (top-level wrapper)
//! ├── InitError         - symbol/bind resolution and startup failures (fatal)
//! ├── RegistrationError - class database publication failures (fatal at init)
//! ├── CallError         - variant-call errors reported by the engine, poisoned frames
//! ├── ConversionError   - host <-> variant conversion failures (never fatal)
//! └── HandleError       - stale or double-ended registry handles
//! ```
//!
//! ABI misuse (null method binds, calls on null objects) is a logic error in the
//! caller and panics at the seam instead of producing a value here.

use gdbridge_sys::{CallErrorRaw, CallErrorType, VariantType};
use thiserror::Error;

use crate::handle::PayloadKind;

pub type BridgeResult<T> = anyhow::Result<T, BridgeError>;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum BridgeError {
    #[error(transparent)]
    Init(#[from] InitError),

    #[error(transparent)]
    Registration(#[from] RegistrationError),

    #[error(transparent)]
    Call(#[from] CallError),

    #[error(transparent)]
    Conversion(#[from] ConversionError),

    #[error(transparent)]
    Handle(#[from] HandleError),
}

// ============================================================================
// Initialization
// ============================================================================

/// Failures while populating the ABI surface. All of them abort startup.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum InitError {
    #[error("engine did not provide a symbol resolver")]
    NoResolver,

    #[error("engine symbol `{0}` could not be resolved")]
    MissingSymbol(String),

    #[error("method bind {class}::{method} (hash {hash}) could not be resolved")]
    MissingMethodBind {
        class: &'static str,
        method: &'static str,
        hash: i64,
    },

    #[error("utility function `{name}` (hash {hash}) could not be resolved")]
    MissingUtilityFunction { name: &'static str, hash: i64 },

    #[error("engine does not provide the {what} for {ty}")]
    MissingBuiltin { ty: VariantType, what: &'static str },

    #[error("the ABI surface is already initialized")]
    AlreadyInitialized,

    #[error("initialization argument `{0}` was null")]
    NullArgument(&'static str),

    #[error(transparent)]
    Registration(#[from] RegistrationError),
}

// ============================================================================
// Registration
// ============================================================================

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RegistrationError {
    #[error("class `{0}` is already registered")]
    DuplicateClass(String),

    #[error("class `{class}` extends host class `{parent}`, which is not registered yet")]
    ParentNotRegistered { class: String, parent: String },

    #[error("class `{class}` declares virtual `{name}` twice")]
    DuplicateVirtual { class: String, name: String },

    #[error("class `{class}` declares method `{name}` twice")]
    DuplicateMethod { class: String, name: String },

    #[error("class `{class}` declares property `{name}` twice")]
    DuplicateProperty { class: String, name: String },

    #[error("class registration is closed once the library is torn down")]
    Closed,

    #[error("descriptor for class `{class}` could not be built: {source}")]
    Descriptor { class: String, source: HandleError },
}

// ============================================================================
// Calls
// ============================================================================

/// Errors surfaced from a dispatch.
///
/// The engine-reported variants mirror the out-error of a variant-call. For
/// arity errors `expected` is the argument count the method takes.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CallError {
    #[error("invalid method")]
    InvalidMethod,

    #[error("invalid argument {index}: expected {expected}, got {actual}")]
    InvalidArgument {
        index: usize,
        expected: VariantType,
        actual: VariantType,
    },

    #[error("too many arguments, method takes {expected}")]
    TooManyArguments { expected: usize },

    #[error("too few arguments, method takes {expected}")]
    TooFewArguments { expected: usize },

    #[error("instance is null")]
    InstanceIsNull,

    #[error("method is not const")]
    MethodNotConst,

    #[error("engine reported unknown call error code {0}")]
    Unknown(u32),

    #[error("frame was poisoned while populating arguments: {0}")]
    PoisonedFrame(HandleError),

    #[error("`{method}` is not thread-safe and was called off the main thread")]
    WrongThread { method: &'static str },

    #[error("`{method}` takes a variable argument list and needs a variant-call")]
    VarargPtrcall { method: &'static str },

    #[error("`{method}` return decoded with the wrong ownership (method returns owned: {returns_owned})")]
    WrongReturnKind { method: &'static str, returns_owned: bool },
}

impl CallError {
    /// Decodes the engine's out-error. `Ok` when the call succeeded.
    pub fn check(raw: &CallErrorRaw) -> Result<(), CallError> {
        let Ok(code) = CallErrorType::try_from(raw.error) else {
            return Err(CallError::Unknown(raw.error));
        };

        let tag = |value: i32| {
            u32::try_from(value)
                .ok()
                .and_then(VariantType::from_raw)
                .unwrap_or(VariantType::Nil)
        };
        let count = |value: i32| usize::try_from(value).unwrap_or(0);

        match code {
            CallErrorType::Ok => Ok(()),
            CallErrorType::InvalidMethod => Err(CallError::InvalidMethod),
            CallErrorType::InvalidArgument => Err(CallError::InvalidArgument {
                index: count(raw.argument),
                expected: tag(raw.expected),
                actual: tag(raw.actual),
            }),
            CallErrorType::TooManyArguments => Err(CallError::TooManyArguments {
                expected: count(raw.argument),
            }),
            CallErrorType::TooFewArguments => Err(CallError::TooFewArguments {
                expected: count(raw.argument),
            }),
            CallErrorType::InstanceIsNull => Err(CallError::InstanceIsNull),
            CallErrorType::MethodNotConst => Err(CallError::MethodNotConst),
        }
    }

    /// Encodes this error into the engine's out-error, for host methods the
    /// engine calls through a variant-call.
    pub fn to_raw(&self) -> CallErrorRaw {
        let mut raw = CallErrorRaw::OK;
        match self {
            CallError::InvalidMethod => raw.error = CallErrorType::InvalidMethod.into(),
            CallError::InvalidArgument {
                index,
                expected,
                actual,
            } => {
                raw.error = CallErrorType::InvalidArgument.into();
                raw.argument = i32::try_from(*index).unwrap_or(i32::MAX);
                raw.expected = expected.as_raw() as i32;
                raw.actual = actual.as_raw() as i32;
            }
            CallError::TooManyArguments { expected } => {
                raw.error = CallErrorType::TooManyArguments.into();
                raw.argument = i32::try_from(*expected).unwrap_or(i32::MAX);
            }
            CallError::TooFewArguments { expected } => {
                raw.error = CallErrorType::TooFewArguments.into();
                raw.argument = i32::try_from(*expected).unwrap_or(i32::MAX);
            }
            CallError::InstanceIsNull => raw.error = CallErrorType::InstanceIsNull.into(),
            CallError::MethodNotConst => raw.error = CallErrorType::MethodNotConst.into(),
            CallError::Unknown(code) => raw.error = *code,
            // Host-side failures have no engine code; the nearest is an invalid method.
            CallError::PoisonedFrame(_)
            | CallError::WrongThread { .. }
            | CallError::VarargPtrcall { .. }
            | CallError::WrongReturnKind { .. } => {
                raw.error = CallErrorType::InvalidMethod.into()
            }
        }
        raw
    }
}

// ============================================================================
// Conversions
// ============================================================================

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ConversionError {
    #[error("wrong type: expected {expected}, variant holds {actual}")]
    WrongType {
        expected: VariantType,
        actual: VariantType,
    },

    #[error("integer {value} does not fit in {target}")]
    IntegerOverflow { value: i64, target: &'static str },

    #[error("nil cannot convert to non-nullable {expected}")]
    NilToNonNullable { expected: VariantType },

    #[error("object is not an instance of `{expected}`")]
    WrongClass { expected: &'static str },

    #[error("engine string is not valid UTF-8")]
    InvalidUtf8,

    #[error(transparent)]
    Handle(#[from] HandleError),
}

// ============================================================================
// Handles
// ============================================================================

#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum HandleError {
    #[error("{kind:?} handle #{index} (generation {generation}) is no longer live")]
    Stale {
        kind: PayloadKind,
        index: u32,
        generation: u32,
    },

    #[error("{kind:?} handle #{index} was already ended")]
    DoubleEnd { kind: PayloadKind, index: u32 },

    #[error("packed token {0:#018x} does not name a registry entry")]
    UnknownToken(u64),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ok_call_error_checks_clean() {
        assert_eq!(CallError::check(&CallErrorRaw::OK), Ok(()));
    }

    #[test]
    fn invalid_argument_decodes_index_and_tags() {
        let raw = CallErrorRaw {
            error: CallErrorType::InvalidArgument.into(),
            argument: 1,
            expected: VariantType::Float.as_raw() as i32,
            actual: VariantType::String.as_raw() as i32,
        };
        assert_eq!(
            CallError::check(&raw),
            Err(CallError::InvalidArgument {
                index: 1,
                expected: VariantType::Float,
                actual: VariantType::String,
            })
        );
    }

    #[test]
    fn arity_errors_round_trip_through_raw() {
        let err = CallError::TooManyArguments { expected: 2 };
        assert_eq!(CallError::check(&err.to_raw()), Err(err));

        let err = CallError::TooFewArguments { expected: 3 };
        assert_eq!(CallError::check(&err.to_raw()), Err(err));
    }

    #[test]
    fn unknown_code_is_preserved() {
        let raw = CallErrorRaw {
            error: 99,
            ..CallErrorRaw::OK
        };
        assert_eq!(CallError::check(&raw), Err(CallError::Unknown(99)));
    }
}
