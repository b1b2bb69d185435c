//! An in-process engine for exercising gdbridge without the real one.
//!
//! The mock implements the engine side of the ABI: a symbol resolver
//! ([`get_proc_address`]), builtin value storage, a small native class
//! hierarchy with method binds, and a class database that accepts extension
//! classes. Tests drive it the way the engine would through [`construct`],
//! [`call_virtual`], [`notify`] and [`destroy`], then inspect what happened
//! through [`stats`], [`extension_class`] and the captured diagnostics.
//!
//! Behavior is process-global, like the engine's. Tests that compare counters
//! must serialize.
//!
//! ```ignore
//! let interface = unsafe { EngineInterface::load(gdbridge_mock::get_proc_address) }?;
//! let node = gdbridge_mock::construct("Node3D").unwrap();
//! assert_eq!(gdbridge_mock::object_class(node).as_deref(), Some("Node3D"));
//! ```

mod builtins;
mod classdb;
mod diagnostics;
mod heap;
mod objects;
mod strings;
mod variant;

use std::ffi::{CStr, c_char};
use std::sync::atomic::Ordering;
use std::sync::{Mutex, PoisonError};

use gdbridge_sys::{InterfaceFunctionPtr, VariantType, interface::*, symbols};

pub use classdb::{
    ClassSnapshot, MethodSnapshot, PropertySnapshot, SignalSnapshot, advance_frames, call_virtual, construct,
    destroy, emitted_signals, extension_class, extension_classes, gizmo_lines, instance_of, is_alive,
    is_instance_of, notifications, notify, object_class, reference_count, request_redraw,
};
pub use diagnostics::{printed_errors, printed_lines, printed_warnings};
pub use objects::LineBatch;

static HIDDEN_SYMBOLS: Mutex<Vec<String>> = Mutex::new(Vec::new());
static HIDDEN_DESTRUCTOR: Mutex<Option<VariantType>> = Mutex::new(None);

/// Makes the resolver answer null for `names`, replacing any earlier set.
/// An empty slice restores every symbol.
pub fn hide_symbols(names: &[&str]) {
    let mut hidden = HIDDEN_SYMBOLS.lock().unwrap_or_else(PoisonError::into_inner);
    *hidden = names.iter().map(|name| name.to_string()).collect();
}

/// Makes `variant_get_ptr_destructor` answer null for `ty`.
pub fn hide_destructor(ty: Option<VariantType>) {
    *HIDDEN_DESTRUCTOR.lock().unwrap_or_else(PoisonError::into_inner) = ty;
}

pub(crate) fn hidden_destructor() -> Option<VariantType> {
    *HIDDEN_DESTRUCTOR.lock().unwrap_or_else(PoisonError::into_inner)
}

fn is_hidden(name: &str) -> bool {
    HIDDEN_SYMBOLS
        .lock()
        .unwrap_or_else(PoisonError::into_inner)
        .iter()
        .any(|hidden| hidden == name)
}

/// Counters of engine-side activity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct MockStats {
    /// Heap values (strings, containers, packed arrays) currently alive.
    pub live_heap: usize,
    pub live_objects: usize,
    pub objects_created: u64,
    pub objects_destroyed: u64,
    pub ptrcalls: u64,
    pub varcalls: u64,
    pub virtual_calls: u64,
    /// Calls refused because the receiver was freed, of the wrong class, or
    /// the bind was null.
    pub invalid_calls: u64,
}

pub fn stats() -> MockStats {
    let (live_objects, objects_created, objects_destroyed) = objects::with_state(|state| {
        let live = state.objects.len();
        (live, state.destroyed + live as u64, state.destroyed)
    });
    MockStats {
        live_heap: heap::live_allocations(),
        live_objects,
        objects_created,
        objects_destroyed,
        ptrcalls: objects::PTRCALLS.load(Ordering::Acquire),
        varcalls: objects::VARCALLS.load(Ordering::Acquire),
        virtual_calls: objects::VIRTUAL_CALLS.load(Ordering::Acquire),
        invalid_calls: objects::INVALID_CALLS.load(Ordering::Acquire),
    }
}

/// Erases a typed entry point into the resolver's return type, checking the
/// signature against its typedef first.
macro_rules! erase {
    ($function:expr => $ty:ty) => {{
        let typed: $ty = $function;
        // SAFETY: every `unsafe extern "C" fn` has the same representation;
        // callers transmute back to the typedef named with the symbol.
        Some(unsafe { std::mem::transmute::<$ty, unsafe extern "C" fn()>(typed) })
    }};
}

fn packed_index(name: &str) -> InterfaceFunctionPtr {
    for stem in symbols::PACKED_ELEMENT_STEMS {
        if name == symbols::packed_array_index(stem, false) {
            return erase!(builtins::packed_operator_index => PackedArrayOperatorIndexFn);
        }
        if name == symbols::packed_array_index(stem, true) {
            return erase!(builtins::packed_operator_index_const => PackedArrayOperatorIndexConstFn);
        }
    }
    None
}

fn resolve(name: &str) -> InterfaceFunctionPtr {
    use symbols::*;
    match name {
        VARIANT_NEW_COPY => erase!(variant::variant_new_copy => VariantNewCopyFn),
        VARIANT_NEW_NIL => erase!(variant::variant_new_nil => VariantNewNilFn),
        VARIANT_DESTROY => erase!(variant::variant_destroy => VariantDestroyFn),
        VARIANT_GET_TYPE => erase!(variant::variant_get_type => VariantGetTypeFn),
        VARIANT_CALL => erase!(variant::variant_call => VariantCallFn),
        VARIANT_EVALUATE => erase!(variant::variant_evaluate => VariantEvaluateFn),
        VARIANT_STRINGIFY => erase!(variant::variant_stringify => VariantStringifyFn),
        VARIANT_HASH => erase!(variant::variant_hash => VariantHashFn),
        VARIANT_GET_PTR_CONSTRUCTOR => erase!(builtins::variant_get_ptr_constructor => VariantGetPtrConstructorFn),
        VARIANT_GET_PTR_DESTRUCTOR => erase!(builtins::variant_get_ptr_destructor => VariantGetPtrDestructorFn),
        VARIANT_GET_PTR_BUILTIN_METHOD => {
            erase!(builtins::variant_get_ptr_builtin_method => VariantGetPtrBuiltinMethodFn)
        }
        VARIANT_GET_PTR_OPERATOR_EVALUATOR => {
            erase!(builtins::variant_get_ptr_operator_evaluator => VariantGetPtrOperatorEvaluatorFn)
        }
        VARIANT_GET_PTR_UTILITY_FUNCTION => {
            erase!(builtins::variant_get_ptr_utility_function => VariantGetPtrUtilityFunctionFn)
        }
        GET_VARIANT_FROM_TYPE_CONSTRUCTOR => {
            erase!(builtins::get_variant_from_type_constructor => GetVariantFromTypeConstructorFn)
        }
        GET_VARIANT_TO_TYPE_CONSTRUCTOR => {
            erase!(builtins::get_variant_to_type_constructor => GetVariantToTypeConstructorFn)
        }

        STRING_NEW_WITH_UTF8_CHARS_AND_LEN => {
            erase!(strings::string_new_with_utf8_chars_and_len => StringNewWithUtf8CharsAndLenFn)
        }
        STRING_NEW_WITH_UTF32_CHARS_AND_LEN => {
            erase!(strings::string_new_with_utf32_chars_and_len => StringNewWithUtf32CharsAndLenFn)
        }
        STRING_TO_UTF8_CHARS => erase!(strings::string_to_utf8_chars => StringToUtf8CharsFn),
        STRING_TO_UTF32_CHARS => erase!(strings::string_to_utf32_chars => StringToUtf32CharsFn),
        // Names and strings share one representation here.
        STRING_NAME_NEW_WITH_UTF8_CHARS_AND_LEN => {
            erase!(strings::string_new_with_utf8_chars_and_len => StringNameNewWithUtf8CharsAndLenFn)
        }

        ARRAY_OPERATOR_INDEX => erase!(builtins::array_operator_index => ArrayOperatorIndexFn),
        ARRAY_OPERATOR_INDEX_CONST => erase!(builtins::array_operator_index_const => ArrayOperatorIndexConstFn),
        DICTIONARY_OPERATOR_INDEX => erase!(builtins::dictionary_operator_index => DictionaryOperatorIndexFn),
        DICTIONARY_OPERATOR_INDEX_CONST => {
            erase!(builtins::dictionary_operator_index_const => DictionaryOperatorIndexConstFn)
        }

        OBJECT_METHOD_BIND_CALL => erase!(objects::object_method_bind_call => ObjectMethodBindCallFn),
        OBJECT_METHOD_BIND_PTRCALL => erase!(objects::object_method_bind_ptrcall => ObjectMethodBindPtrcallFn),
        OBJECT_DESTROY => erase!(objects::object_destroy => ObjectDestroyFn),
        GLOBAL_GET_SINGLETON => erase!(objects::global_get_singleton => GlobalGetSingletonFn),
        OBJECT_SET_INSTANCE => erase!(objects::object_set_instance => ObjectSetInstanceFn),
        OBJECT_GET_CLASS_NAME => erase!(objects::object_get_class_name => ObjectGetClassNameFn),
        OBJECT_CAST_TO => erase!(objects::object_cast_to => ObjectCastToFn),
        OBJECT_GET_INSTANCE_FROM_ID => erase!(objects::object_get_instance_from_id => ObjectGetInstanceFromIdFn),
        OBJECT_GET_INSTANCE_ID => erase!(objects::object_get_instance_id => ObjectGetInstanceIdFn),
        CLASSDB_CONSTRUCT_OBJECT => erase!(objects::classdb_construct_object => ClassdbConstructObjectFn),
        CLASSDB_GET_METHOD_BIND => erase!(objects::classdb_get_method_bind => ClassdbGetMethodBindFn),
        CLASSDB_GET_CLASS_TAG => erase!(objects::classdb_get_class_tag => ClassdbGetClassTagFn),

        CLASSDB_REGISTER_EXTENSION_CLASS => {
            erase!(classdb::classdb_register_extension_class => ClassdbRegisterExtensionClassFn)
        }
        CLASSDB_REGISTER_EXTENSION_CLASS_METHOD => {
            erase!(classdb::classdb_register_extension_class_method => ClassdbRegisterExtensionClassMethodFn)
        }
        CLASSDB_REGISTER_EXTENSION_CLASS_PROPERTY => {
            erase!(classdb::classdb_register_extension_class_property => ClassdbRegisterExtensionClassPropertyFn)
        }
        CLASSDB_REGISTER_EXTENSION_CLASS_SIGNAL => {
            erase!(classdb::classdb_register_extension_class_signal => ClassdbRegisterExtensionClassSignalFn)
        }
        CLASSDB_UNREGISTER_EXTENSION_CLASS => {
            erase!(classdb::classdb_unregister_extension_class => ClassdbUnregisterExtensionClassFn)
        }

        PRINT_ERROR => erase!(diagnostics::print_error => PrintErrorFn),
        PRINT_WARNING => erase!(diagnostics::print_warning => PrintWarningFn),
        other => packed_index(other),
    }
}

/// The engine's symbol resolver. Unknown and hidden names resolve to null.
///
/// # Safety
///
/// `name` must be null or a nul-terminated string.
pub unsafe extern "C" fn get_proc_address(name: *const c_char) -> InterfaceFunctionPtr {
    if name.is_null() {
        return None;
    }
    let Ok(name) = unsafe { CStr::from_ptr(name) }.to_str() else {
        return None;
    };
    if is_hidden(name) {
        tracing::trace!(target: "gdbridge_mock", name, "symbol hidden");
        return None;
    }
    let resolved = resolve(name);
    if resolved.is_none() {
        tracing::warn!(target: "gdbridge_mock", name, "unknown symbol requested");
    }
    resolved
}

#[cfg(test)]
mod tests {
    use super::*;

    fn lookup(name: &str) -> InterfaceFunctionPtr {
        let name = std::ffi::CString::new(name).unwrap();
        unsafe { get_proc_address(name.as_ptr()) }
    }

    #[test]
    fn resolves_packed_accessors_for_every_stem() {
        for stem in symbols::PACKED_ELEMENT_STEMS {
            assert!(lookup(&symbols::packed_array_index(stem, false)).is_some(), "{stem}");
            assert!(lookup(&symbols::packed_array_index(stem, true)).is_some(), "{stem}");
        }
    }

    #[test]
    fn unknown_names_resolve_to_null() {
        assert!(lookup("no_such_symbol").is_none());
        assert!(unsafe { get_proc_address(std::ptr::null()) }.is_none());
    }

    #[test]
    fn stats_track_object_lifetimes() {
        let before = stats();
        let node = construct("Node").unwrap();
        let during = stats();
        assert!(during.objects_created > before.objects_created);
        destroy(node);
        assert!(stats().objects_destroyed > before.objects_destroyed);
    }
}
