//! The engine function table.
//!
//! Every function the runtime calls is resolved exactly once from the
//! engine's symbol resolver and stored in a process-wide [`EngineInterface`].
//! A missing symbol fails initialization; after that the table is read-only
//! and lock-free.

mod builtins;
pub mod thread_safety;

pub use builtins::{BuiltinLifecycle, ConversionConstructors, PackedIndex};

use std::ffi::CString;
use std::sync::OnceLock;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread::{self, ThreadId};

use gdbridge_sys::interface::symbols;
use gdbridge_sys::*;

use crate::error::InitError;

static INTERFACE: OnceLock<EngineInterface> = OnceLock::new();
static MAIN_THREAD: OnceLock<ThreadId> = OnceLock::new();
static TORN_DOWN: AtomicBool = AtomicBool::new(false);

/// Resolves one symbol and casts it to its typedef.
macro_rules! resolve {
    ($resolver:expr, $symbol:expr => $ty:ty) => {{
        let name: &str = $symbol;
        match unsafe { lookup($resolver, name) } {
            Some(raw) => unsafe { std::mem::transmute::<unsafe extern "C" fn(), $ty>(raw) },
            None => return Err(InitError::MissingSymbol(name.to_string())),
        }
    }};
}

/// Looks a symbol up through the engine's resolver.
///
/// # Safety
///
/// `resolver` must be the engine's resolver.
pub(crate) unsafe fn lookup(
    resolver: GetProcAddressFn,
    name: &str,
) -> Option<unsafe extern "C" fn()> {
    let name = CString::new(name).ok()?;
    unsafe { resolver(name.as_ptr()) }
}

/// Function pointers resolved from the engine at startup.
pub struct EngineInterface {
    // variant
    pub variant_new_copy: VariantNewCopyFn,
    pub variant_new_nil: VariantNewNilFn,
    pub variant_destroy: VariantDestroyFn,
    pub variant_get_type: VariantGetTypeFn,
    pub variant_call: VariantCallFn,
    pub variant_evaluate: VariantEvaluateFn,
    pub variant_stringify: VariantStringifyFn,
    pub variant_hash: VariantHashFn,
    pub variant_get_ptr_builtin_method: VariantGetPtrBuiltinMethodFn,
    pub variant_get_ptr_operator_evaluator: VariantGetPtrOperatorEvaluatorFn,
    pub variant_get_ptr_utility_function: VariantGetPtrUtilityFunctionFn,

    // strings
    pub string_new_with_utf8_chars_and_len: StringNewWithUtf8CharsAndLenFn,
    pub string_new_with_utf32_chars_and_len: StringNewWithUtf32CharsAndLenFn,
    pub string_to_utf8_chars: StringToUtf8CharsFn,
    pub string_to_utf32_chars: StringToUtf32CharsFn,
    pub string_name_new_with_utf8_chars_and_len: StringNameNewWithUtf8CharsAndLenFn,

    // containers
    pub array_operator_index: ArrayOperatorIndexFn,
    pub array_operator_index_const: ArrayOperatorIndexConstFn,
    pub dictionary_operator_index: DictionaryOperatorIndexFn,
    pub dictionary_operator_index_const: DictionaryOperatorIndexConstFn,
    pub packed_index: [PackedIndex; 10],

    // objects
    pub object_method_bind_call: ObjectMethodBindCallFn,
    pub object_method_bind_ptrcall: ObjectMethodBindPtrcallFn,
    pub object_destroy: ObjectDestroyFn,
    pub global_get_singleton: GlobalGetSingletonFn,
    pub object_set_instance: ObjectSetInstanceFn,
    pub object_get_class_name: ObjectGetClassNameFn,
    pub object_cast_to: ObjectCastToFn,
    pub object_get_instance_from_id: ObjectGetInstanceFromIdFn,
    pub object_get_instance_id: ObjectGetInstanceIdFn,
    pub classdb_construct_object: ClassdbConstructObjectFn,
    pub classdb_get_method_bind: ClassdbGetMethodBindFn,
    pub classdb_get_class_tag: ClassdbGetClassTagFn,

    // class registration
    pub classdb_register_extension_class: ClassdbRegisterExtensionClassFn,
    pub classdb_register_extension_class_method: ClassdbRegisterExtensionClassMethodFn,
    pub classdb_register_extension_class_property: ClassdbRegisterExtensionClassPropertyFn,
    pub classdb_register_extension_class_signal: ClassdbRegisterExtensionClassSignalFn,
    pub classdb_unregister_extension_class: ClassdbUnregisterExtensionClassFn,

    // diagnostics
    pub print_error: PrintErrorFn,
    pub print_warning: PrintWarningFn,

    /// Construct/copy/destroy/wrap/unwrap per variant type, indexed by tag.
    pub builtins: [BuiltinLifecycle; VariantType::COUNT],
    pub conversions: ConversionConstructors,
}

impl EngineInterface {
    /// Resolves the whole table.
    ///
    /// Fails with the first missing symbol; nothing is installed.
    ///
    /// # Safety
    ///
    /// `resolver` must be the engine's resolver, and the engine must outlive
    /// the returned table.
    pub unsafe fn load(resolver: GetProcAddressFn) -> Result<Self, InitError> {
        #[cfg(feature = "profiling")]
        profiling::scope!("EngineInterface::load");

        let get_ptr_constructor =
            resolve!(resolver, symbols::VARIANT_GET_PTR_CONSTRUCTOR => VariantGetPtrConstructorFn);
        let get_ptr_destructor =
            resolve!(resolver, symbols::VARIANT_GET_PTR_DESTRUCTOR => VariantGetPtrDestructorFn);
        let get_from_type = resolve!(
            resolver,
            symbols::GET_VARIANT_FROM_TYPE_CONSTRUCTOR => GetVariantFromTypeConstructorFn
        );
        let get_to_type = resolve!(
            resolver,
            symbols::GET_VARIANT_TO_TYPE_CONSTRUCTOR => GetVariantToTypeConstructorFn
        );

        let builtins = unsafe {
            builtins::load_all(get_ptr_constructor, get_ptr_destructor, get_from_type, get_to_type)?
        };
        let packed_index = unsafe { builtins::load_packed_index(resolver)? };
        let conversions = unsafe { builtins::load_conversions(get_ptr_constructor)? };

        Ok(Self {
            variant_new_copy: resolve!(resolver, symbols::VARIANT_NEW_COPY => VariantNewCopyFn),
            variant_new_nil: resolve!(resolver, symbols::VARIANT_NEW_NIL => VariantNewNilFn),
            variant_destroy: resolve!(resolver, symbols::VARIANT_DESTROY => VariantDestroyFn),
            variant_get_type: resolve!(resolver, symbols::VARIANT_GET_TYPE => VariantGetTypeFn),
            variant_call: resolve!(resolver, symbols::VARIANT_CALL => VariantCallFn),
            variant_evaluate: resolve!(resolver, symbols::VARIANT_EVALUATE => VariantEvaluateFn),
            variant_stringify: resolve!(resolver, symbols::VARIANT_STRINGIFY => VariantStringifyFn),
            variant_hash: resolve!(resolver, symbols::VARIANT_HASH => VariantHashFn),
            variant_get_ptr_builtin_method: resolve!(
                resolver,
                symbols::VARIANT_GET_PTR_BUILTIN_METHOD => VariantGetPtrBuiltinMethodFn
            ),
            variant_get_ptr_operator_evaluator: resolve!(
                resolver,
                symbols::VARIANT_GET_PTR_OPERATOR_EVALUATOR => VariantGetPtrOperatorEvaluatorFn
            ),
            variant_get_ptr_utility_function: resolve!(
                resolver,
                symbols::VARIANT_GET_PTR_UTILITY_FUNCTION => VariantGetPtrUtilityFunctionFn
            ),

            string_new_with_utf8_chars_and_len: resolve!(
                resolver,
                symbols::STRING_NEW_WITH_UTF8_CHARS_AND_LEN => StringNewWithUtf8CharsAndLenFn
            ),
            string_new_with_utf32_chars_and_len: resolve!(
                resolver,
                symbols::STRING_NEW_WITH_UTF32_CHARS_AND_LEN => StringNewWithUtf32CharsAndLenFn
            ),
            string_to_utf8_chars: resolve!(
                resolver,
                symbols::STRING_TO_UTF8_CHARS => StringToUtf8CharsFn
            ),
            string_to_utf32_chars: resolve!(
                resolver,
                symbols::STRING_TO_UTF32_CHARS => StringToUtf32CharsFn
            ),
            string_name_new_with_utf8_chars_and_len: resolve!(
                resolver,
                symbols::STRING_NAME_NEW_WITH_UTF8_CHARS_AND_LEN => StringNameNewWithUtf8CharsAndLenFn
            ),

            array_operator_index: resolve!(
                resolver,
                symbols::ARRAY_OPERATOR_INDEX => ArrayOperatorIndexFn
            ),
            array_operator_index_const: resolve!(
                resolver,
                symbols::ARRAY_OPERATOR_INDEX_CONST => ArrayOperatorIndexConstFn
            ),
            dictionary_operator_index: resolve!(
                resolver,
                symbols::DICTIONARY_OPERATOR_INDEX => DictionaryOperatorIndexFn
            ),
            dictionary_operator_index_const: resolve!(
                resolver,
                symbols::DICTIONARY_OPERATOR_INDEX_CONST => DictionaryOperatorIndexConstFn
            ),
            packed_index,

            object_method_bind_call: resolve!(
                resolver,
                symbols::OBJECT_METHOD_BIND_CALL => ObjectMethodBindCallFn
            ),
            object_method_bind_ptrcall: resolve!(
                resolver,
                symbols::OBJECT_METHOD_BIND_PTRCALL => ObjectMethodBindPtrcallFn
            ),
            object_destroy: resolve!(resolver, symbols::OBJECT_DESTROY => ObjectDestroyFn),
            global_get_singleton: resolve!(
                resolver,
                symbols::GLOBAL_GET_SINGLETON => GlobalGetSingletonFn
            ),
            object_set_instance: resolve!(
                resolver,
                symbols::OBJECT_SET_INSTANCE => ObjectSetInstanceFn
            ),
            object_get_class_name: resolve!(
                resolver,
                symbols::OBJECT_GET_CLASS_NAME => ObjectGetClassNameFn
            ),
            object_cast_to: resolve!(resolver, symbols::OBJECT_CAST_TO => ObjectCastToFn),
            object_get_instance_from_id: resolve!(
                resolver,
                symbols::OBJECT_GET_INSTANCE_FROM_ID => ObjectGetInstanceFromIdFn
            ),
            object_get_instance_id: resolve!(
                resolver,
                symbols::OBJECT_GET_INSTANCE_ID => ObjectGetInstanceIdFn
            ),
            classdb_construct_object: resolve!(
                resolver,
                symbols::CLASSDB_CONSTRUCT_OBJECT => ClassdbConstructObjectFn
            ),
            classdb_get_method_bind: resolve!(
                resolver,
                symbols::CLASSDB_GET_METHOD_BIND => ClassdbGetMethodBindFn
            ),
            classdb_get_class_tag: resolve!(
                resolver,
                symbols::CLASSDB_GET_CLASS_TAG => ClassdbGetClassTagFn
            ),

            classdb_register_extension_class: resolve!(
                resolver,
                symbols::CLASSDB_REGISTER_EXTENSION_CLASS => ClassdbRegisterExtensionClassFn
            ),
            classdb_register_extension_class_method: resolve!(
                resolver,
                symbols::CLASSDB_REGISTER_EXTENSION_CLASS_METHOD => ClassdbRegisterExtensionClassMethodFn
            ),
            classdb_register_extension_class_property: resolve!(
                resolver,
                symbols::CLASSDB_REGISTER_EXTENSION_CLASS_PROPERTY => ClassdbRegisterExtensionClassPropertyFn
            ),
            classdb_register_extension_class_signal: resolve!(
                resolver,
                symbols::CLASSDB_REGISTER_EXTENSION_CLASS_SIGNAL => ClassdbRegisterExtensionClassSignalFn
            ),
            classdb_unregister_extension_class: resolve!(
                resolver,
                symbols::CLASSDB_UNREGISTER_EXTENSION_CLASS => ClassdbUnregisterExtensionClassFn
            ),

            print_error: resolve!(resolver, symbols::PRINT_ERROR => PrintErrorFn),
            print_warning: resolve!(resolver, symbols::PRINT_WARNING => PrintWarningFn),

            builtins,
            conversions,
        })
    }

    /// Lifecycle functions for `ty`.
    pub fn builtin(&self, ty: VariantType) -> &BuiltinLifecycle {
        &self.builtins[ty.as_raw() as usize]
    }

    /// Index accessors for a packed array type.
    ///
    /// # Panics
    ///
    /// If `ty` is not a packed array type.
    pub fn packed(&self, ty: VariantType) -> &PackedIndex {
        assert!(ty.is_packed_array(), "{ty} is not a packed array type");
        &self.packed_index[(ty.as_raw() - VariantType::PackedByteArray.as_raw()) as usize]
    }
}

// ============================================================================
// Process-wide table
// ============================================================================

/// Publishes the table and records the calling thread as the main thread.
pub(crate) fn install(interface: EngineInterface) -> Result<&'static EngineInterface, InitError> {
    INTERFACE
        .set(interface)
        .map_err(|_| InitError::AlreadyInitialized)?;
    let _ = MAIN_THREAD.set(thread::current().id());
    TORN_DOWN.store(false, Ordering::Release);
    tracing::debug!(target: "gdbridge::init", "engine interface installed");
    INTERFACE.get().ok_or(InitError::AlreadyInitialized)
}

/// The resolved table.
///
/// # Panics
///
/// If called before initialization. That is a logic error in the caller.
pub fn interface() -> &'static EngineInterface {
    match INTERFACE.get() {
        Some(interface) => interface,
        None => panic!("engine interface used before initialization"),
    }
}

/// The resolved table, or `None` before initialization.
pub fn try_interface() -> Option<&'static EngineInterface> {
    INTERFACE.get()
}

pub fn is_initialized() -> bool {
    INTERFACE.get().is_some() && !TORN_DOWN.load(Ordering::Acquire)
}

/// Marks the surface as torn down. Function pointers stay readable because
/// statics cannot be reset, but nothing should dispatch after this.
pub(crate) fn mark_torn_down() {
    TORN_DOWN.store(true, Ordering::Release);
}

pub fn is_torn_down() -> bool {
    TORN_DOWN.load(Ordering::Acquire)
}

/// Whether the caller runs on the thread that initialized the library.
pub fn on_main_thread() -> bool {
    MAIN_THREAD
        .get()
        .is_none_or(|main| *main == thread::current().id())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support;

    #[test]
    fn load_resolves_every_symbol_from_mock() {
        let _guard = test_support::lock();
        let interface = unsafe { EngineInterface::load(gdbridge_mock::get_proc_address) };
        assert!(interface.is_ok());
    }

    #[test]
    fn missing_symbol_is_reported_by_name() {
        let _guard = test_support::lock();
        gdbridge_mock::hide_symbols(&["variant_call"]);
        let result = unsafe { EngineInterface::load(gdbridge_mock::get_proc_address) };
        gdbridge_mock::hide_symbols(&[]);
        assert!(matches!(result, Err(InitError::MissingSymbol(name)) if name == "variant_call"));
    }

    #[test]
    fn missing_destructor_for_heap_type_is_an_init_error() {
        let _guard = test_support::lock();
        gdbridge_mock::hide_destructor(Some(VariantType::Dictionary));
        let result = unsafe { EngineInterface::load(gdbridge_mock::get_proc_address) };
        gdbridge_mock::hide_destructor(None);
        assert_eq!(
            result.err(),
            Some(InitError::MissingBuiltin {
                ty: VariantType::Dictionary,
                what: "destructor",
            })
        );
    }

    #[test]
    fn installed_table_is_shared() {
        let _guard = test_support::lock();
        let a = interface() as *const EngineInterface;
        let b = interface() as *const EngineInterface;
        assert_eq!(a, b);
        assert!(on_main_thread());
    }
}
