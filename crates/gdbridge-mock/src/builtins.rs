//! Builtin-type lifecycle, builtin methods, container indexing, operator
//! evaluators and utility functions.
//!
//! Lifecycle entries are instantiated once per variant tag, so one function
//! pointer always stands for one type, as the engine's tables do.

use std::ffi::c_void;

use gdbridge_sys::{
    ConstStringNamePtr, ConstTypePtr, ConstVariantPtr, Int, PtrBuiltInMethod, PtrConstructor, PtrDestructor,
    PtrOperatorEvaluator, PtrUtilityFunction, TypeFromVariantConstructorFn, TypePtr, UninitTypePtr,
    UninitVariantPtr, VariantFromTypeConstructorFn, VariantOperator, VariantPtr, VariantType,
};

use crate::heap::{self, ArrayData, DictionaryData, Packed, Shape, Target, read, read_word, write, write_word};
use crate::variant::{self, OwnedVariant};
use crate::{diagnostics, objects};

fn ty_of(tag: u32) -> VariantType {
    VariantType::from_raw(tag).unwrap_or_default()
}

macro_rules! per_tag {
    ($f:ident) => {
        [
            $f::<0>, $f::<1>, $f::<2>, $f::<3>, $f::<4>, $f::<5>, $f::<6>, $f::<7>, $f::<8>, $f::<9>,
            $f::<10>, $f::<11>, $f::<12>, $f::<13>, $f::<14>, $f::<15>, $f::<16>, $f::<17>, $f::<18>,
            $f::<19>, $f::<20>, $f::<21>, $f::<22>, $f::<23>, $f::<24>, $f::<25>, $f::<26>, $f::<27>,
            $f::<28>, $f::<29>, $f::<30>, $f::<31>, $f::<32>, $f::<33>, $f::<34>, $f::<35>, $f::<36>,
            $f::<37>, $f::<38>,
        ]
    };
}

// ============================================================================
// Lifecycle
// ============================================================================

unsafe extern "C" fn default_ctor<const TAG: u32>(base: UninitTypePtr, _args: *const ConstTypePtr) {
    unsafe { heap::construct_default(ty_of(TAG), base) }
}

unsafe extern "C" fn copy_ctor<const TAG: u32>(base: UninitTypePtr, args: *const ConstTypePtr) {
    unsafe { heap::construct_copy(ty_of(TAG), base, *args) }
}

unsafe extern "C" fn destructor<const TAG: u32>(base: TypePtr) {
    unsafe { heap::destroy(ty_of(TAG), base) }
}

unsafe extern "C" fn from_type<const TAG: u32>(dest: UninitVariantPtr, src: TypePtr) {
    let ty = ty_of(TAG);
    unsafe { variant::emplace(dest, ty, |p| heap::construct_copy(ty, p, src)) }
}

unsafe extern "C" fn to_type<const TAG: u32>(dest: UninitTypePtr, src: VariantPtr) {
    let ty = ty_of(TAG);
    unsafe {
        if variant::tag(src) != ty {
            heap::construct_default(ty, dest);
            return;
        }
        if ty == VariantType::Object {
            // A variant does not keep its object alive; freed objects read as null.
            let object = read::<*mut c_void>(variant::payload(src));
            let live = if objects::is_live(object) { object } else { std::ptr::null_mut() };
            write(dest, live);
            return;
        }
        heap::construct_copy(ty, dest, variant::payload(src));
    }
}

const DEFAULT_CTORS: [PtrConstructor; VariantType::COUNT] = per_tag!(default_ctor);
const COPY_CTORS: [PtrConstructor; VariantType::COUNT] = per_tag!(copy_ctor);
const DESTRUCTORS: [PtrDestructor; VariantType::COUNT] = per_tag!(destructor);
const FROM_TYPE: [VariantFromTypeConstructorFn; VariantType::COUNT] = per_tag!(from_type);
const TO_TYPE: [TypeFromVariantConstructorFn; VariantType::COUNT] = per_tag!(to_type);

/// `String(StringName)`, `String(NodePath)`, `StringName(String)`, `NodePath(String)`.
unsafe extern "C" fn text_from_text(base: UninitTypePtr, args: *const ConstTypePtr) {
    unsafe { heap::write_text(base, heap::text(*args)) }
}

/// `Callable(Object, StringName)` and `Signal(Object, StringName)`.
unsafe extern "C" fn target_from_object_and_name(base: UninitTypePtr, args: *const ConstTypePtr) {
    unsafe {
        let object = read::<*mut c_void>(*args);
        let name = heap::text(*args.add(1));
        let object = objects::live_id(object).unwrap_or(0);
        write_word(base, 0, heap::alloc(Target { object, name }));
        write_word(base, 1, 0);
    }
}

pub(crate) unsafe extern "C" fn variant_get_ptr_constructor(ty: u32, constructor: i32) -> Option<PtrConstructor> {
    use VariantType as T;
    let ty = VariantType::from_raw(ty)?;
    if matches!(ty, T::Nil | T::Object) {
        return None;
    }
    let index = ty.as_raw() as usize;
    match (ty, constructor) {
        (_, 0) => Some(DEFAULT_CTORS[index]),
        (_, 1) => Some(COPY_CTORS[index]),
        (T::String, 2 | 3) | (T::StringName | T::NodePath, 2) => Some(text_from_text),
        (T::Callable | T::Signal, 2) => Some(target_from_object_and_name),
        _ => None,
    }
}

pub(crate) unsafe extern "C" fn variant_get_ptr_destructor(ty: u32) -> Option<PtrDestructor> {
    let ty = VariantType::from_raw(ty)?;
    if !ty.is_heap_backed() || crate::hidden_destructor() == Some(ty) {
        return None;
    }
    Some(DESTRUCTORS[ty.as_raw() as usize])
}

pub(crate) unsafe extern "C" fn get_variant_from_type_constructor(ty: u32) -> Option<VariantFromTypeConstructorFn> {
    let ty = VariantType::from_raw(ty).filter(|ty| *ty != VariantType::Nil)?;
    Some(FROM_TYPE[ty.as_raw() as usize])
}

pub(crate) unsafe extern "C" fn get_variant_to_type_constructor(ty: u32) -> Option<TypeFromVariantConstructorFn> {
    let ty = VariantType::from_raw(ty).filter(|ty| *ty != VariantType::Nil)?;
    Some(TO_TYPE[ty.as_raw() as usize])
}

// ============================================================================
// Container indexing
// ============================================================================

fn index_of(index: Int) -> Option<usize> {
    usize::try_from(index).ok()
}

pub(crate) unsafe extern "C" fn array_operator_index(array: TypePtr, index: Int) -> VariantPtr {
    unsafe { heap::get_mut::<ArrayData>(read_word(array, 0)) }
        .and_then(|items| items.get_mut(index_of(index)?))
        .map_or(std::ptr::null_mut(), OwnedVariant::as_mut_ptr)
}

pub(crate) unsafe extern "C" fn array_operator_index_const(array: ConstTypePtr, index: Int) -> ConstVariantPtr {
    unsafe { heap::get_ref::<ArrayData>(read_word(array, 0)) }
        .and_then(|items| items.get(index_of(index)?))
        .map_or(std::ptr::null(), OwnedVariant::as_ptr)
}

/// Value slot for `key`, inserting a nil value when the key is new.
pub(crate) unsafe extern "C" fn dictionary_operator_index(dictionary: TypePtr, key: ConstVariantPtr) -> VariantPtr {
    let entries = unsafe { heap::ensure::<DictionaryData>(dictionary) };
    let position = entries
        .iter()
        .position(|(existing, _)| unsafe { variant::equal(existing.as_ptr(), key) });
    let position = match position {
        Some(position) => position,
        None => {
            entries.push((unsafe { OwnedVariant::copy_of(key) }, OwnedVariant::nil()));
            entries.len() - 1
        }
    };
    entries[position].1.as_mut_ptr()
}

pub(crate) unsafe extern "C" fn dictionary_operator_index_const(
    dictionary: ConstTypePtr,
    key: ConstVariantPtr,
) -> ConstVariantPtr {
    unsafe { heap::get_ref::<DictionaryData>(read_word(dictionary, 0)) }
        .and_then(|entries| {
            entries
                .iter()
                .find(|(existing, _)| unsafe { variant::equal(existing.as_ptr(), key) })
        })
        .map_or(std::ptr::null(), |(_, value)| value.as_ptr())
}

/// Serves every packed element type: the element size lives in the array.
pub(crate) unsafe extern "C" fn packed_operator_index(array: TypePtr, index: Int) -> *mut c_void {
    unsafe { heap::get_mut::<Packed>(read_word(array, 0)) }
        .zip(index_of(index))
        .map_or(std::ptr::null_mut(), |(packed, index)| packed.element_ptr(index))
}

pub(crate) unsafe extern "C" fn packed_operator_index_const(array: ConstTypePtr, index: Int) -> *const c_void {
    unsafe { packed_operator_index(array.cast_mut(), index) }.cast_const()
}

// ============================================================================
// Builtin methods
// ============================================================================

const SIZE: Int = 3173160232;
const RESIZE: Int = 848867239;
const CLEAR: Int = 3218959716;
const PUSH_BACK: Int = 3316032543;
const HAS: Int = 3680194679;
const KEYS: Int = 4144163970;
const ERASE: Int = 1776646889;
const LENGTH: Int = 3173160232;

fn count(len: usize) -> Int {
    Int::try_from(len).unwrap_or(Int::MAX)
}

unsafe extern "C" fn array_size(base: TypePtr, _args: *const ConstTypePtr, ret: TypePtr, _argc: i32) {
    let len = unsafe { heap::get_ref::<ArrayData>(read_word(base, 0)) }.map_or(0, Vec::len);
    unsafe { write(ret, count(len)) }
}

unsafe extern "C" fn array_resize(base: TypePtr, args: *const ConstTypePtr, ret: TypePtr, _argc: i32) {
    let len = usize::try_from(unsafe { read::<Int>(*args) }).unwrap_or(0);
    unsafe { heap::ensure::<ArrayData>(base) }.resize_with(len, OwnedVariant::nil);
    unsafe { write(ret, 0 as Int) }
}

unsafe extern "C" fn array_push_back(base: TypePtr, args: *const ConstTypePtr, _ret: TypePtr, _argc: i32) {
    let value = unsafe { OwnedVariant::copy_of(*args) };
    unsafe { heap::ensure::<ArrayData>(base) }.push(value);
}

unsafe extern "C" fn array_clear(base: TypePtr, _args: *const ConstTypePtr, _ret: TypePtr, _argc: i32) {
    if let Some(items) = unsafe { heap::get_mut::<ArrayData>(read_word(base, 0)) } {
        items.clear();
    }
}

unsafe extern "C" fn dictionary_size(base: TypePtr, _args: *const ConstTypePtr, ret: TypePtr, _argc: i32) {
    let len = unsafe { heap::get_ref::<DictionaryData>(read_word(base, 0)) }.map_or(0, Vec::len);
    unsafe { write(ret, count(len)) }
}

unsafe extern "C" fn dictionary_has(base: TypePtr, args: *const ConstTypePtr, ret: TypePtr, _argc: i32) {
    let found = !unsafe { dictionary_operator_index_const(base, *args) }.is_null();
    unsafe { write(ret, u8::from(found)) }
}

unsafe extern "C" fn dictionary_keys(base: TypePtr, _args: *const ConstTypePtr, ret: TypePtr, _argc: i32) {
    let keys: ArrayData = unsafe { heap::get_ref::<DictionaryData>(read_word(base, 0)) }
        .map(|entries| entries.iter().map(|(key, _)| key.clone()).collect())
        .unwrap_or_default();
    unsafe { write_word(ret, 0, heap::alloc(keys)) }
}

unsafe extern "C" fn dictionary_erase(base: TypePtr, args: *const ConstTypePtr, ret: TypePtr, _argc: i32) {
    let key = unsafe { *args };
    let removed = unsafe { heap::get_mut::<DictionaryData>(read_word(base, 0)) }
        .and_then(|entries| {
            let position = entries
                .iter()
                .position(|(existing, _)| unsafe { variant::equal(existing.as_ptr(), key) })?;
            Some(entries.remove(position))
        })
        .is_some();
    unsafe { write(ret, u8::from(removed)) }
}

unsafe extern "C" fn dictionary_clear(base: TypePtr, _args: *const ConstTypePtr, _ret: TypePtr, _argc: i32) {
    if let Some(entries) = unsafe { heap::get_mut::<DictionaryData>(read_word(base, 0)) } {
        entries.clear();
    }
}

unsafe extern "C" fn packed_size(base: TypePtr, _args: *const ConstTypePtr, ret: TypePtr, _argc: i32) {
    let len = unsafe { heap::get_ref::<Packed>(read_word(base, 0)) }.map_or(0, Packed::len);
    unsafe { write(ret, count(len)) }
}

unsafe extern "C" fn packed_resize<const TAG: u32>(base: TypePtr, args: *const ConstTypePtr, ret: TypePtr, _argc: i32) {
    let len = usize::try_from(unsafe { read::<Int>(*args) }).unwrap_or(0);
    if unsafe { read_word(base, 0) } == 0 {
        let Shape::Packed { element, strings } = heap::shape(ty_of(TAG)) else {
            return;
        };
        unsafe { write_word(base, 0, heap::alloc(Packed::new(element, strings))) };
    }
    if let Some(packed) = unsafe { heap::get_mut::<Packed>(read_word(base, 0)) } {
        packed.resize(len);
    }
    unsafe { write(ret, 0 as Int) }
}

const PACKED_RESIZE: [PtrBuiltInMethod; VariantType::COUNT] = per_tag!(packed_resize);

unsafe extern "C" fn string_length(base: TypePtr, _args: *const ConstTypePtr, ret: TypePtr, _argc: i32) {
    let len = unsafe { heap::text(base) }.chars().count();
    unsafe { write(ret, count(len)) }
}

pub(crate) unsafe extern "C" fn variant_get_ptr_builtin_method(
    ty: u32,
    method: ConstStringNamePtr,
    hash: Int,
) -> Option<PtrBuiltInMethod> {
    use VariantType as T;
    let ty = VariantType::from_raw(ty)?;
    let name = unsafe { heap::text(method) };
    let found: PtrBuiltInMethod = match (ty, name.as_str(), hash) {
        (T::Array, "size", SIZE) => array_size,
        (T::Array, "resize", RESIZE) => array_resize,
        (T::Array, "push_back", PUSH_BACK) => array_push_back,
        (T::Array, "clear", CLEAR) => array_clear,
        (T::Dictionary, "size", SIZE) => dictionary_size,
        (T::Dictionary, "has", HAS) => dictionary_has,
        (T::Dictionary, "keys", KEYS) => dictionary_keys,
        (T::Dictionary, "erase", ERASE) => dictionary_erase,
        (T::Dictionary, "clear", CLEAR) => dictionary_clear,
        (ty, "size", SIZE) if ty.is_packed_array() => packed_size,
        (ty, "resize", RESIZE) if ty.is_packed_array() => PACKED_RESIZE[ty.as_raw() as usize],
        (T::String, "length", LENGTH) => string_length,
        _ => return None,
    };
    Some(found)
}

// ============================================================================
// Operator evaluators
// ============================================================================

macro_rules! evaluator {
    ($name:ident, $operand:ty => $out:ty, |$l:ident, $r:ident| $body:expr) => {
        unsafe extern "C" fn $name(left: ConstTypePtr, right: ConstTypePtr, ret: TypePtr) {
            let ($l, $r) = unsafe { (read::<$operand>(left), read::<$operand>(right)) };
            unsafe { write::<$out>(ret, $body) }
        }
    };
}

evaluator!(int_add, i64 => i64, |l, r| l.wrapping_add(r));
evaluator!(int_subtract, i64 => i64, |l, r| l.wrapping_sub(r));
evaluator!(int_multiply, i64 => i64, |l, r| l.wrapping_mul(r));
evaluator!(int_equal, i64 => u8, |l, r| u8::from(l == r));
evaluator!(float_add, f64 => f64, |l, r| l + r);
evaluator!(float_subtract, f64 => f64, |l, r| l - r);
evaluator!(float_multiply, f64 => f64, |l, r| l * r);

pub(crate) unsafe extern "C" fn variant_get_ptr_operator_evaluator(
    op: u32,
    left: u32,
    right: u32,
) -> Option<PtrOperatorEvaluator> {
    use VariantOperator as Op;
    use VariantType as T;
    let op = VariantOperator::try_from(op).ok()?;
    let found: PtrOperatorEvaluator = match (op, VariantType::from_raw(left)?, VariantType::from_raw(right)?) {
        (Op::Add, T::Int, T::Int) => int_add,
        (Op::Subtract, T::Int, T::Int) => int_subtract,
        (Op::Multiply, T::Int, T::Int) => int_multiply,
        (Op::Equal, T::Int, T::Int) => int_equal,
        (Op::Add, T::Float, T::Float) => float_add,
        (Op::Subtract, T::Float, T::Float) => float_subtract,
        (Op::Multiply, T::Float, T::Float) => float_multiply,
        _ => return None,
    };
    Some(found)
}

// ============================================================================
// Utility functions
// ============================================================================

const ABSF: Int = 2023349228;
const LERPF: Int = 998901048;
const MAXI: Int = 3133453818;
const PRINT: Int = 2648703342;

unsafe fn real_arg(args: *const ConstTypePtr, index: usize) -> f64 {
    unsafe { read::<f64>(*args.add(index)) }
}

unsafe extern "C" fn absf(ret: TypePtr, args: *const ConstTypePtr, _argc: i32) {
    unsafe { write(ret, real_arg(args, 0).abs()) }
}

unsafe extern "C" fn lerpf(ret: TypePtr, args: *const ConstTypePtr, _argc: i32) {
    let (from, to, weight) = unsafe { (real_arg(args, 0), real_arg(args, 1), real_arg(args, 2)) };
    unsafe { write(ret, from + (to - from) * weight) }
}

unsafe extern "C" fn maxi(ret: TypePtr, args: *const ConstTypePtr, _argc: i32) {
    let (a, b) = unsafe { (read::<i64>(*args), read::<i64>(*args.add(1))) };
    unsafe { write(ret, a.max(b)) }
}

/// Variadic: every argument is a variant.
unsafe extern "C" fn print(_ret: TypePtr, args: *const ConstTypePtr, argc: i32) {
    let line: String = unsafe { variant::arg_slice(args, Int::from(argc)) }
        .iter()
        .map(|arg| unsafe { variant::describe(*arg) })
        .collect();
    diagnostics::record_print(line);
}

pub(crate) unsafe extern "C" fn variant_get_ptr_utility_function(
    name: ConstStringNamePtr,
    hash: Int,
) -> Option<PtrUtilityFunction> {
    let name = unsafe { heap::text(name) };
    let found: PtrUtilityFunction = match (name.as_str(), hash) {
        ("absf", ABSF) => absf,
        ("lerpf", LERPF) => lerpf,
        ("maxi", MAXI) => maxi,
        ("print", PRINT) => print,
        _ => return None,
    };
    Some(found)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pod_types_have_no_destructor() {
        assert!(unsafe { variant_get_ptr_destructor(VariantType::Vector3.as_raw()) }.is_none());
        assert!(unsafe { variant_get_ptr_destructor(VariantType::Array.as_raw()) }.is_some());
    }

    #[test]
    fn conversion_constructors_exist_only_where_declared() {
        let ctor = |ty: VariantType, index| unsafe { variant_get_ptr_constructor(ty.as_raw(), index) };
        assert!(ctor(VariantType::String, 3).is_some());
        assert!(ctor(VariantType::StringName, 3).is_none());
        assert!(ctor(VariantType::Callable, 2).is_some());
        assert!(ctor(VariantType::Object, 0).is_none());
    }

    #[test]
    fn dictionary_keeps_insertion_order() {
        let mut dictionary = [0u64; 1];
        let base = dictionary.as_mut_ptr().cast::<c_void>();
        for key in [3i64, 1, 2] {
            let key = OwnedVariant::build(VariantType::Int, |p| unsafe { write(p, key) });
            unsafe { dictionary_operator_index(base, key.as_ptr()) };
        }
        let mut keys = [0u64; 1];
        unsafe { dictionary_keys(base, std::ptr::null(), keys.as_mut_ptr().cast(), 0) };
        let keys_text = unsafe { heap::describe(VariantType::Array, keys.as_ptr().cast()) };
        assert_eq!(keys_text, "[3, 1, 2]");
        unsafe {
            heap::destroy(VariantType::Array, keys.as_mut_ptr().cast());
            heap::destroy(VariantType::Dictionary, base);
        }
    }

    #[test]
    fn missing_utility_hash_is_refused() {
        let mut name = [0u64; 1];
        unsafe { heap::write_text(name.as_mut_ptr().cast(), "absf") };
        assert!(unsafe { variant_get_ptr_utility_function(name.as_ptr().cast(), 1) }.is_none());
        assert!(unsafe { variant_get_ptr_utility_function(name.as_ptr().cast(), ABSF) }.is_some());
        unsafe { heap::destroy(VariantType::StringName, name.as_mut_ptr().cast()) };
    }
}
