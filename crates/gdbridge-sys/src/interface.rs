//! Function-pointer signatures the engine exposes through its symbol resolver.
//!
//! Every entry pairs a typedef with the symbol name passed to
//! [`GetProcAddressFn`]. The resolver returns an untyped function pointer; the
//! core transmutes it to the typedef declared here.

use crate::class_info::{ClassCreationInfo, ClassMethodInfo, PropertyInfo};
use crate::*;
use std::ffi::{c_char, c_void};

/// Untyped function pointer as returned by the resolver.
pub type InterfaceFunctionPtr = Option<unsafe extern "C" fn()>;

/// The engine's symbol resolver.
pub type GetProcAddressFn = unsafe extern "C" fn(name: *const c_char) -> InterfaceFunctionPtr;

// ============================================================================
// Variant
// ============================================================================

pub type VariantNewCopyFn = unsafe extern "C" fn(dest: UninitVariantPtr, src: ConstVariantPtr);
pub type VariantNewNilFn = unsafe extern "C" fn(dest: UninitVariantPtr);
pub type VariantDestroyFn = unsafe extern "C" fn(variant: VariantPtr);
pub type VariantGetTypeFn = unsafe extern "C" fn(variant: ConstVariantPtr) -> u32;
pub type VariantCallFn = unsafe extern "C" fn(
    variant: VariantPtr,
    method: ConstStringNamePtr,
    args: *const ConstVariantPtr,
    arg_count: Int,
    ret: UninitVariantPtr,
    error: *mut CallErrorRaw,
);
pub type VariantEvaluateFn = unsafe extern "C" fn(
    op: u32,
    a: ConstVariantPtr,
    b: ConstVariantPtr,
    ret: UninitVariantPtr,
    valid: *mut Bool,
);
pub type VariantStringifyFn = unsafe extern "C" fn(variant: ConstVariantPtr, ret: UninitStringPtr);
pub type VariantHashFn = unsafe extern "C" fn(variant: ConstVariantPtr) -> Int;

/// Builds a value of a builtin type from pointer-call arguments.
pub type PtrConstructor = unsafe extern "C" fn(base: UninitTypePtr, args: *const ConstTypePtr);
/// Destroys a value of a builtin type in place.
pub type PtrDestructor = unsafe extern "C" fn(base: TypePtr);
/// Calls a method of a builtin type.
pub type PtrBuiltInMethod =
    unsafe extern "C" fn(base: TypePtr, args: *const ConstTypePtr, ret: TypePtr, arg_count: i32);
/// Evaluates one operator for a fixed pair of operand types.
pub type PtrOperatorEvaluator =
    unsafe extern "C" fn(left: ConstTypePtr, right: ConstTypePtr, ret: TypePtr);
/// Calls a global utility function.
pub type PtrUtilityFunction =
    unsafe extern "C" fn(ret: TypePtr, args: *const ConstTypePtr, arg_count: i32);
/// Wraps a typed value into a variant.
pub type VariantFromTypeConstructorFn = unsafe extern "C" fn(dest: UninitVariantPtr, src: TypePtr);
/// Extracts a typed value out of a variant.
pub type TypeFromVariantConstructorFn = unsafe extern "C" fn(dest: UninitTypePtr, src: VariantPtr);

pub type VariantGetPtrConstructorFn =
    unsafe extern "C" fn(ty: u32, constructor: i32) -> Option<PtrConstructor>;
pub type VariantGetPtrDestructorFn = unsafe extern "C" fn(ty: u32) -> Option<PtrDestructor>;
pub type VariantGetPtrBuiltinMethodFn = unsafe extern "C" fn(
    ty: u32,
    method: ConstStringNamePtr,
    hash: Int,
) -> Option<PtrBuiltInMethod>;
pub type VariantGetPtrOperatorEvaluatorFn =
    unsafe extern "C" fn(op: u32, left: u32, right: u32) -> Option<PtrOperatorEvaluator>;
pub type VariantGetPtrUtilityFunctionFn =
    unsafe extern "C" fn(name: ConstStringNamePtr, hash: Int) -> Option<PtrUtilityFunction>;
pub type GetVariantFromTypeConstructorFn =
    unsafe extern "C" fn(ty: u32) -> Option<VariantFromTypeConstructorFn>;
pub type GetVariantToTypeConstructorFn =
    unsafe extern "C" fn(ty: u32) -> Option<TypeFromVariantConstructorFn>;

// ============================================================================
// Strings
// ============================================================================

pub type StringNewWithUtf8CharsAndLenFn =
    unsafe extern "C" fn(dest: UninitStringPtr, contents: *const c_char, len: Int);
pub type StringNewWithUtf32CharsAndLenFn =
    unsafe extern "C" fn(dest: UninitStringPtr, contents: *const u32, len: Int);
pub type StringToUtf8CharsFn =
    unsafe extern "C" fn(string: ConstStringPtr, text: *mut c_char, max_write_len: Int) -> Int;
pub type StringToUtf32CharsFn =
    unsafe extern "C" fn(string: ConstStringPtr, text: *mut u32, max_write_len: Int) -> Int;
pub type StringNameNewWithUtf8CharsAndLenFn =
    unsafe extern "C" fn(dest: UninitStringNamePtr, contents: *const c_char, len: Int);

// ============================================================================
// Containers
// ============================================================================

/// Returns a pointer to element `index` of a packed array, or null when out of range.
pub type PackedArrayOperatorIndexFn = unsafe extern "C" fn(array: TypePtr, index: Int) -> *mut c_void;
pub type PackedArrayOperatorIndexConstFn =
    unsafe extern "C" fn(array: ConstTypePtr, index: Int) -> *const c_void;
pub type ArrayOperatorIndexFn = unsafe extern "C" fn(array: TypePtr, index: Int) -> VariantPtr;
pub type ArrayOperatorIndexConstFn =
    unsafe extern "C" fn(array: ConstTypePtr, index: Int) -> ConstVariantPtr;
pub type DictionaryOperatorIndexFn =
    unsafe extern "C" fn(dictionary: TypePtr, key: ConstVariantPtr) -> VariantPtr;
pub type DictionaryOperatorIndexConstFn =
    unsafe extern "C" fn(dictionary: ConstTypePtr, key: ConstVariantPtr) -> ConstVariantPtr;

// ============================================================================
// Objects
// ============================================================================

pub type ObjectMethodBindCallFn = unsafe extern "C" fn(
    method_bind: MethodBindPtr,
    instance: ObjectPtr,
    args: *const ConstVariantPtr,
    arg_count: Int,
    ret: UninitVariantPtr,
    error: *mut CallErrorRaw,
);
pub type ObjectMethodBindPtrcallFn = unsafe extern "C" fn(
    method_bind: MethodBindPtr,
    instance: ObjectPtr,
    args: *const ConstTypePtr,
    ret: TypePtr,
);
pub type ObjectDestroyFn = unsafe extern "C" fn(object: ObjectPtr);
pub type GlobalGetSingletonFn = unsafe extern "C" fn(name: ConstStringNamePtr) -> ObjectPtr;
pub type ObjectSetInstanceFn =
    unsafe extern "C" fn(object: ObjectPtr, class_name: ConstStringNamePtr, instance: ClassInstancePtr);
pub type ObjectGetClassNameFn = unsafe extern "C" fn(
    object: ConstObjectPtr,
    library: ClassLibraryPtr,
    class_name: UninitStringNamePtr,
) -> Bool;
pub type ObjectCastToFn = unsafe extern "C" fn(object: ConstObjectPtr, class_tag: ClassTagPtr) -> ObjectPtr;
pub type ObjectGetInstanceFromIdFn = unsafe extern "C" fn(instance_id: u64) -> ObjectPtr;
pub type ObjectGetInstanceIdFn = unsafe extern "C" fn(object: ConstObjectPtr) -> u64;
pub type ClassdbConstructObjectFn = unsafe extern "C" fn(class_name: ConstStringNamePtr) -> ObjectPtr;
pub type ClassdbGetMethodBindFn = unsafe extern "C" fn(
    class_name: ConstStringNamePtr,
    method_name: ConstStringNamePtr,
    hash: Int,
) -> MethodBindPtr;
pub type ClassdbGetClassTagFn = unsafe extern "C" fn(class_name: ConstStringNamePtr) -> ClassTagPtr;

// ============================================================================
// Class registration
// ============================================================================

pub type ClassdbRegisterExtensionClassFn = unsafe extern "C" fn(
    library: ClassLibraryPtr,
    class_name: ConstStringNamePtr,
    parent_class_name: ConstStringNamePtr,
    info: *const ClassCreationInfo,
);
pub type ClassdbRegisterExtensionClassMethodFn = unsafe extern "C" fn(
    library: ClassLibraryPtr,
    class_name: ConstStringNamePtr,
    info: *const ClassMethodInfo,
);
pub type ClassdbRegisterExtensionClassPropertyFn = unsafe extern "C" fn(
    library: ClassLibraryPtr,
    class_name: ConstStringNamePtr,
    info: *const PropertyInfo,
    setter: ConstStringNamePtr,
    getter: ConstStringNamePtr,
);
pub type ClassdbRegisterExtensionClassSignalFn = unsafe extern "C" fn(
    library: ClassLibraryPtr,
    class_name: ConstStringNamePtr,
    signal_name: ConstStringNamePtr,
    arguments: *const PropertyInfo,
    argument_count: Int,
);
pub type ClassdbUnregisterExtensionClassFn =
    unsafe extern "C" fn(library: ClassLibraryPtr, class_name: ConstStringNamePtr);

// ============================================================================
// Diagnostics
// ============================================================================

pub type PrintErrorFn = unsafe extern "C" fn(
    description: *const c_char,
    function: *const c_char,
    file: *const c_char,
    line: i32,
    editor_notify: Bool,
);
pub type PrintWarningFn = PrintErrorFn;

// ============================================================================
// Class callbacks (engine -> host)
// ============================================================================

/// Virtual trampoline: `(instance, args, ret)`.
pub type ClassCallVirtual =
    unsafe extern "C" fn(instance: ClassInstancePtr, args: *const ConstTypePtr, ret: TypePtr);
pub type ClassCreateInstanceFn = unsafe extern "C" fn(class_userdata: *mut c_void) -> ObjectPtr;
pub type ClassFreeInstanceFn =
    unsafe extern "C" fn(class_userdata: *mut c_void, instance: ClassInstancePtr);
pub type ClassGetVirtualFn =
    unsafe extern "C" fn(class_userdata: *mut c_void, name: ConstStringNamePtr) -> Option<ClassCallVirtual>;
pub type ClassSetFn = unsafe extern "C" fn(
    instance: ClassInstancePtr,
    name: ConstStringNamePtr,
    value: ConstVariantPtr,
) -> Bool;
pub type ClassGetFn =
    unsafe extern "C" fn(instance: ClassInstancePtr, name: ConstStringNamePtr, ret: VariantPtr) -> Bool;
pub type ClassNotificationFn = unsafe extern "C" fn(instance: ClassInstancePtr, what: i32, reversed: Bool);
pub type ClassToStringFn =
    unsafe extern "C" fn(instance: ClassInstancePtr, is_valid: *mut Bool, out: StringPtr);
pub type ClassReferenceFn = unsafe extern "C" fn(instance: ClassInstancePtr);
pub type ClassUnreferenceFn = unsafe extern "C" fn(instance: ClassInstancePtr);

/// Variant-call entry point of a host method registered with the class DB.
pub type ClassMethodCallFn = unsafe extern "C" fn(
    method_userdata: *mut c_void,
    instance: ClassInstancePtr,
    args: *const ConstVariantPtr,
    arg_count: Int,
    ret: VariantPtr,
    error: *mut CallErrorRaw,
);
/// Pointer-call entry point of a host method registered with the class DB.
pub type ClassMethodPtrCallFn = unsafe extern "C" fn(
    method_userdata: *mut c_void,
    instance: ClassInstancePtr,
    args: *const ConstTypePtr,
    ret: TypePtr,
);

// ============================================================================
// Symbol names
// ============================================================================

/// Symbol names passed to the resolver, grouped by concern.
pub mod symbols {
    pub const VARIANT_NEW_COPY: &str = "variant_new_copy";
    pub const VARIANT_NEW_NIL: &str = "variant_new_nil";
    pub const VARIANT_DESTROY: &str = "variant_destroy";
    pub const VARIANT_GET_TYPE: &str = "variant_get_type";
    pub const VARIANT_CALL: &str = "variant_call";
    pub const VARIANT_EVALUATE: &str = "variant_evaluate";
    pub const VARIANT_STRINGIFY: &str = "variant_stringify";
    pub const VARIANT_HASH: &str = "variant_hash";
    pub const VARIANT_GET_PTR_CONSTRUCTOR: &str = "variant_get_ptr_constructor";
    pub const VARIANT_GET_PTR_DESTRUCTOR: &str = "variant_get_ptr_destructor";
    pub const VARIANT_GET_PTR_BUILTIN_METHOD: &str = "variant_get_ptr_builtin_method";
    pub const VARIANT_GET_PTR_OPERATOR_EVALUATOR: &str = "variant_get_ptr_operator_evaluator";
    pub const VARIANT_GET_PTR_UTILITY_FUNCTION: &str = "variant_get_ptr_utility_function";
    pub const GET_VARIANT_FROM_TYPE_CONSTRUCTOR: &str = "get_variant_from_type_constructor";
    pub const GET_VARIANT_TO_TYPE_CONSTRUCTOR: &str = "get_variant_to_type_constructor";

    pub const STRING_NEW_WITH_UTF8_CHARS_AND_LEN: &str = "string_new_with_utf8_chars_and_len";
    pub const STRING_NEW_WITH_UTF32_CHARS_AND_LEN: &str = "string_new_with_utf32_chars_and_len";
    pub const STRING_TO_UTF8_CHARS: &str = "string_to_utf8_chars";
    pub const STRING_TO_UTF32_CHARS: &str = "string_to_utf32_chars";
    pub const STRING_NAME_NEW_WITH_UTF8_CHARS_AND_LEN: &str =
        "string_name_new_with_utf8_chars_and_len";

    pub const ARRAY_OPERATOR_INDEX: &str = "array_operator_index";
    pub const ARRAY_OPERATOR_INDEX_CONST: &str = "array_operator_index_const";
    pub const DICTIONARY_OPERATOR_INDEX: &str = "dictionary_operator_index";
    pub const DICTIONARY_OPERATOR_INDEX_CONST: &str = "dictionary_operator_index_const";

    pub const OBJECT_METHOD_BIND_CALL: &str = "object_method_bind_call";
    pub const OBJECT_METHOD_BIND_PTRCALL: &str = "object_method_bind_ptrcall";
    pub const OBJECT_DESTROY: &str = "object_destroy";
    pub const GLOBAL_GET_SINGLETON: &str = "global_get_singleton";
    pub const OBJECT_SET_INSTANCE: &str = "object_set_instance";
    pub const OBJECT_GET_CLASS_NAME: &str = "object_get_class_name";
    pub const OBJECT_CAST_TO: &str = "object_cast_to";
    pub const OBJECT_GET_INSTANCE_FROM_ID: &str = "object_get_instance_from_id";
    pub const OBJECT_GET_INSTANCE_ID: &str = "object_get_instance_id";
    pub const CLASSDB_CONSTRUCT_OBJECT: &str = "classdb_construct_object";
    pub const CLASSDB_GET_METHOD_BIND: &str = "classdb_get_method_bind";
    pub const CLASSDB_GET_CLASS_TAG: &str = "classdb_get_class_tag";

    pub const CLASSDB_REGISTER_EXTENSION_CLASS: &str = "classdb_register_extension_class";
    pub const CLASSDB_REGISTER_EXTENSION_CLASS_METHOD: &str =
        "classdb_register_extension_class_method";
    pub const CLASSDB_REGISTER_EXTENSION_CLASS_PROPERTY: &str =
        "classdb_register_extension_class_property";
    pub const CLASSDB_REGISTER_EXTENSION_CLASS_SIGNAL: &str =
        "classdb_register_extension_class_signal";
    pub const CLASSDB_UNREGISTER_EXTENSION_CLASS: &str = "classdb_unregister_extension_class";

    pub const PRINT_ERROR: &str = "print_error";
    pub const PRINT_WARNING: &str = "print_warning";

    /// Index accessor symbol for a packed array type, e.g.
    /// `packed_vector3_array_operator_index`.
    pub fn packed_array_index(element: &str, constant: bool) -> String {
        if constant {
            format!("packed_{element}_array_operator_index_const")
        } else {
            format!("packed_{element}_array_operator_index")
        }
    }

    /// Element stems of the packed array accessors, in variant-tag order.
    pub const PACKED_ELEMENT_STEMS: [&str; 10] = [
        "byte", "int32", "int64", "float32", "float64", "string", "vector2", "vector3", "color",
        "vector4",
    ];
}
