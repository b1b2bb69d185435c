//! The 24-byte variant: a tag word followed by 16 payload bytes.
//!
//! Values whose pointer-call form fits in 16 bytes live inline. Larger PODs
//! (transforms, bases, projections, AABBs) live in a boxed 64-byte block whose
//! address is the first payload word. All-zero bytes are nil.

use std::ffi::c_void;
use std::hash::Hasher;
use std::ptr::with_exposed_provenance_mut;

use gdbridge_sys::{
    Bool, CallErrorRaw, CallErrorType, ConstStringNamePtr, ConstVariantPtr, FALSE, Int, TRUE, UninitStringPtr,
    UninitVariantPtr, VariantOperator, VariantPtr, VariantType,
};
use rustc_hash::FxHasher;

use crate::heap::{self, Shape, read, read_word, write, write_word};
use crate::objects;

const INLINE_BYTES: usize = 16;
type Block = [u64; 8];

fn is_boxed(ty: VariantType) -> bool {
    matches!(heap::shape(ty), Shape::Pod(size) if size > INLINE_BYTES)
}

pub(crate) unsafe fn tag(v: *const c_void) -> VariantType {
    if v.is_null() {
        return VariantType::Nil;
    }
    u32::try_from(unsafe { read_word(v, 0) })
        .ok()
        .and_then(VariantType::from_raw)
        .unwrap_or_default()
}

/// Address of the value held by `v`, in its pointer-call form.
pub(crate) unsafe fn payload(v: *const c_void) -> *mut c_void {
    let inline = unsafe { v.cast::<u64>().add(1) }.cast_mut().cast::<c_void>();
    if is_boxed(unsafe { tag(v) }) {
        with_exposed_provenance_mut(unsafe { read_word(inline, 0) } as usize)
    } else {
        inline
    }
}

/// Initializes `dest` as a variant of `ty`; `fill` constructs the payload.
pub(crate) unsafe fn emplace(dest: *mut c_void, ty: VariantType, fill: impl FnOnce(*mut c_void)) {
    unsafe {
        std::ptr::write_bytes(dest.cast::<u8>(), 0, gdbridge_sys::VARIANT_SIZE);
        write_word(dest, 0, u64::from(ty.as_raw()));
    }
    if is_boxed(ty) {
        let block = Box::into_raw(Box::new(Block::default()));
        fill(block.cast());
        unsafe { write_word(dest, 1, block.expose_provenance() as u64) };
    } else {
        fill(unsafe { dest.cast::<u64>().add(1) }.cast());
    }
}

pub(crate) unsafe fn destroy_in_place(v: *mut c_void) {
    unsafe {
        let ty = tag(v);
        if is_boxed(ty) {
            let word = read_word(v, 1);
            if word != 0 {
                drop(Box::from_raw(with_exposed_provenance_mut::<Block>(word as usize)));
            }
        } else {
            heap::destroy(ty, payload(v));
        }
        std::ptr::write_bytes(v.cast::<u8>(), 0, gdbridge_sys::VARIANT_SIZE);
    }
}

pub(crate) unsafe fn copy_into(dest: *mut c_void, src: *const c_void) {
    unsafe {
        let ty = tag(src);
        let source = payload(src);
        emplace(dest, ty, |p| heap::construct_copy(ty, p, source));
    }
}

pub(crate) unsafe fn write_nil(dest: *mut c_void) {
    if !dest.is_null() {
        unsafe { std::ptr::write_bytes(dest.cast::<u8>(), 0, gdbridge_sys::VARIANT_SIZE) }
    }
}

pub(crate) unsafe fn write_int(dest: *mut c_void, value: i64) {
    if !dest.is_null() {
        unsafe { emplace(dest, VariantType::Int, |p| write(p, value)) }
    }
}

/// Deep equality; ints and floats compare by value.
pub(crate) unsafe fn equal(a: *const c_void, b: *const c_void) -> bool {
    let (ta, tb) = unsafe { (tag(a), tag(b)) };
    if ta == tb {
        return unsafe { heap::equal(ta, payload(a), payload(b)) };
    }
    match unsafe { (Operand::read(a), Operand::read(b)) } {
        (Operand::Int(x), Operand::Float(y)) | (Operand::Float(y), Operand::Int(x)) => x as f64 == y,
        _ => false,
    }
}

pub(crate) unsafe fn describe(v: *const c_void) -> String {
    unsafe { heap::describe(tag(v), payload(v)) }
}

pub(crate) unsafe fn hash(v: *const c_void) -> i64 {
    let mut state = FxHasher::default();
    unsafe { heap::hash_into(tag(v), payload(v), &mut state) };
    state.finish() as i64
}

/// Variant bytes owned by the engine side: containers, stored properties.
#[repr(transparent)]
pub(crate) struct OwnedVariant([u64; 3]);

impl OwnedVariant {
    pub(crate) fn nil() -> Self {
        Self([0; 3])
    }

    pub(crate) unsafe fn copy_of(src: *const c_void) -> Self {
        let mut out = Self::nil();
        unsafe { copy_into(out.as_mut_ptr(), src) };
        out
    }

    pub(crate) fn build(ty: VariantType, fill: impl FnOnce(*mut c_void)) -> Self {
        let mut out = Self::nil();
        unsafe { emplace(out.as_mut_ptr(), ty, fill) };
        out
    }

    pub(crate) fn as_ptr(&self) -> *const c_void {
        self.0.as_ptr().cast()
    }

    pub(crate) fn as_mut_ptr(&mut self) -> *mut c_void {
        self.0.as_mut_ptr().cast()
    }

    /// Moves the value into uninitialized `dest`.
    pub(crate) unsafe fn move_into(self, dest: *mut c_void) {
        unsafe { dest.cast::<[u64; 3]>().write_unaligned(self.0) };
        std::mem::forget(self);
    }
}

impl Clone for OwnedVariant {
    fn clone(&self) -> Self {
        unsafe { Self::copy_of(self.as_ptr()) }
    }
}

impl Drop for OwnedVariant {
    fn drop(&mut self) {
        unsafe { destroy_in_place(self.as_mut_ptr()) }
    }
}

// ============================================================================
// Operators
// ============================================================================

#[derive(Debug, Clone, PartialEq)]
enum Operand {
    Nil,
    Bool(bool),
    Int(i64),
    Float(f64),
    Reals(VariantType, [f32; 4]),
    Ints(VariantType, [i32; 4]),
    Text(VariantType, String),
    Other,
}

fn width(ty: VariantType) -> usize {
    match ty {
        VariantType::Vector2 | VariantType::Vector2i => 2,
        VariantType::Vector3 | VariantType::Vector3i => 3,
        _ => 4,
    }
}

impl Operand {
    unsafe fn read(v: *const c_void) -> Self {
        use VariantType as T;
        unsafe {
            let ty = tag(v);
            let p = payload(v);
            match ty {
                T::Nil => Operand::Nil,
                T::Bool => Operand::Bool(read::<u8>(p) != 0),
                T::Int => Operand::Int(read(p)),
                T::Float => Operand::Float(read(p)),
                T::Vector2 | T::Vector3 | T::Vector4 | T::Color => {
                    let mut out = [0.0; 4];
                    for (index, slot) in out.iter_mut().take(width(ty)).enumerate() {
                        *slot = read(p.cast::<f32>().add(index).cast());
                    }
                    Operand::Reals(ty, out)
                }
                T::Vector2i | T::Vector3i | T::Vector4i => {
                    let mut out = [0; 4];
                    for (index, slot) in out.iter_mut().take(width(ty)).enumerate() {
                        *slot = read(p.cast::<i32>().add(index).cast());
                    }
                    Operand::Ints(ty, out)
                }
                T::String | T::StringName | T::NodePath => Operand::Text(ty, heap::text(p)),
                _ => Operand::Other,
            }
        }
    }

    fn number(&self) -> Option<f64> {
        match *self {
            Operand::Int(value) => Some(value as f64),
            Operand::Float(value) => Some(value),
            _ => None,
        }
    }

    fn truthy(&self) -> bool {
        match self {
            Operand::Nil => false,
            Operand::Bool(value) => *value,
            Operand::Int(value) => *value != 0,
            Operand::Float(value) => *value != 0.0,
            Operand::Text(_, text) => !text.is_empty(),
            _ => true,
        }
    }

    fn into_variant(self) -> OwnedVariant {
        match self {
            Operand::Nil | Operand::Other => OwnedVariant::nil(),
            Operand::Bool(value) => OwnedVariant::build(VariantType::Bool, |p| unsafe { write(p, u8::from(value)) }),
            Operand::Int(value) => OwnedVariant::build(VariantType::Int, |p| unsafe { write(p, value) }),
            Operand::Float(value) => OwnedVariant::build(VariantType::Float, |p| unsafe { write(p, value) }),
            Operand::Reals(ty, values) => OwnedVariant::build(ty, |p| unsafe {
                for (index, value) in values.iter().take(width(ty)).enumerate() {
                    write(p.cast::<f32>().add(index).cast(), *value);
                }
            }),
            Operand::Ints(ty, values) => OwnedVariant::build(ty, |p| unsafe {
                for (index, value) in values.iter().take(width(ty)).enumerate() {
                    write(p.cast::<i32>().add(index).cast(), *value);
                }
            }),
            Operand::Text(ty, text) => OwnedVariant::build(ty, |p| unsafe { heap::write_text(p, text) }),
        }
    }
}

fn int_op(op: VariantOperator, l: i64, r: i64) -> Option<Operand> {
    use VariantOperator as Op;
    let shift = || u32::try_from(r).ok();
    Some(match op {
        Op::Add => Operand::Int(l.wrapping_add(r)),
        Op::Subtract => Operand::Int(l.wrapping_sub(r)),
        Op::Multiply => Operand::Int(l.wrapping_mul(r)),
        Op::Divide => Operand::Int(l.checked_div(r)?),
        Op::Module => Operand::Int(l.checked_rem(r)?),
        Op::Power => Operand::Int(l.wrapping_pow(u32::try_from(r).ok()?)),
        Op::ShiftLeft => Operand::Int(l.checked_shl(shift()?)?),
        Op::ShiftRight => Operand::Int(l.checked_shr(shift()?)?),
        Op::BitAnd => Operand::Int(l & r),
        Op::BitOr => Operand::Int(l | r),
        Op::BitXor => Operand::Int(l ^ r),
        Op::Less => Operand::Bool(l < r),
        Op::LessEqual => Operand::Bool(l <= r),
        Op::Greater => Operand::Bool(l > r),
        Op::GreaterEqual => Operand::Bool(l >= r),
        _ => return None,
    })
}

fn float_op(op: VariantOperator, l: f64, r: f64) -> Option<Operand> {
    use VariantOperator as Op;
    Some(match op {
        Op::Add => Operand::Float(l + r),
        Op::Subtract => Operand::Float(l - r),
        Op::Multiply => Operand::Float(l * r),
        Op::Divide => Operand::Float(l / r),
        Op::Power => Operand::Float(l.powf(r)),
        Op::Less => Operand::Bool(l < r),
        Op::LessEqual => Operand::Bool(l <= r),
        Op::Greater => Operand::Bool(l > r),
        Op::GreaterEqual => Operand::Bool(l >= r),
        _ => return None,
    })
}

fn text_op(op: VariantOperator, ty: VariantType, l: String, r: String) -> Option<Operand> {
    use VariantOperator as Op;
    Some(match op {
        Op::Add if ty == VariantType::String => Operand::Text(ty, l + &r),
        Op::Less => Operand::Bool(l < r),
        Op::LessEqual => Operand::Bool(l <= r),
        Op::Greater => Operand::Bool(l > r),
        Op::GreaterEqual => Operand::Bool(l >= r),
        _ => return None,
    })
}

fn zip<T: Copy>(op: VariantOperator, l: [T; 4], r: [T; 4], f: impl Fn(VariantOperator, T, T) -> Option<T>) -> Option<[T; 4]> {
    let mut out = l;
    for (index, slot) in out.iter_mut().enumerate() {
        *slot = f(op, l[index], r[index])?;
    }
    Some(out)
}

fn real_component(op: VariantOperator, l: f32, r: f32) -> Option<f32> {
    match op {
        VariantOperator::Add => Some(l + r),
        VariantOperator::Subtract => Some(l - r),
        VariantOperator::Multiply => Some(l * r),
        VariantOperator::Divide => Some(l / r),
        _ => None,
    }
}

fn int_component(op: VariantOperator, l: i32, r: i32) -> Option<i32> {
    match op {
        VariantOperator::Add => Some(l.wrapping_add(r)),
        VariantOperator::Subtract => Some(l.wrapping_sub(r)),
        VariantOperator::Multiply => Some(l.wrapping_mul(r)),
        _ => None,
    }
}

/// Result of `a op b`, or `None` when the operator is undefined for the pair.
pub(crate) unsafe fn evaluate(op: VariantOperator, a: *const c_void, b: *const c_void) -> Option<OwnedVariant> {
    use Operand as O;
    use VariantOperator as Op;

    if matches!(op, Op::Equal | Op::NotEqual) {
        let same = unsafe { equal(a, b) };
        return Some(O::Bool(same == (op == Op::Equal)).into_variant());
    }

    let (x, y) = unsafe { (O::read(a), O::read(b)) };
    let result = match (op, x, y) {
        (Op::Not, x, _) => O::Bool(!x.truthy()),
        (Op::And, x, y) => O::Bool(x.truthy() && y.truthy()),
        (Op::Or, x, y) => O::Bool(x.truthy() || y.truthy()),
        (Op::Xor, x, y) => O::Bool(x.truthy() != y.truthy()),
        (Op::Negate, O::Int(value), _) => O::Int(value.wrapping_neg()),
        (Op::Negate, O::Float(value), _) => O::Float(-value),
        (Op::Negate, O::Reals(ty, values), _) => O::Reals(ty, values.map(|value| -value)),
        (Op::Positive, x @ (O::Int(_) | O::Float(_) | O::Reals(..)), _) => x,
        (Op::BitNegate, O::Int(value), _) => O::Int(!value),
        (op, O::Int(l), O::Int(r)) => int_op(op, l, r)?,
        (op, l @ (O::Int(_) | O::Float(_)), r @ (O::Int(_) | O::Float(_))) => float_op(op, l.number()?, r.number()?)?,
        (op, O::Text(lt, l), O::Text(rt, r)) if lt == rt => text_op(op, lt, l, r)?,
        (op, O::Reals(lt, l), O::Reals(rt, r)) if lt == rt => O::Reals(lt, zip(op, l, r, real_component)?),
        (op @ (Op::Multiply | Op::Divide), O::Reals(ty, l), s @ (O::Int(_) | O::Float(_))) => {
            let scalar = s.number()? as f32;
            O::Reals(ty, zip(op, l, [scalar; 4], real_component)?)
        }
        (op, O::Ints(lt, l), O::Ints(rt, r)) if lt == rt => O::Ints(lt, zip(op, l, r, int_component)?),
        _ => return None,
    };
    Some(result.into_variant())
}

// ============================================================================
// Builtin method calls on variants
// ============================================================================

pub(crate) fn call_error(code: CallErrorType, argument: usize, expected: VariantType, actual: VariantType) -> CallErrorRaw {
    CallErrorRaw {
        error: code.into(),
        argument: i32::try_from(argument).unwrap_or(i32::MAX),
        expected: expected.as_raw() as i32,
        actual: actual.as_raw() as i32,
    }
}

pub(crate) fn simple_error(code: CallErrorType) -> CallErrorRaw {
    call_error(code, 0, VariantType::Nil, VariantType::Nil)
}

fn expect_arity(args: &[ConstVariantPtr], expected: usize) -> Result<(), CallErrorRaw> {
    use std::cmp::Ordering;
    match args.len().cmp(&expected) {
        Ordering::Equal => Ok(()),
        Ordering::Greater => Err(call_error(CallErrorType::TooManyArguments, expected, VariantType::Nil, VariantType::Nil)),
        Ordering::Less => Err(call_error(CallErrorType::TooFewArguments, expected, VariantType::Nil, VariantType::Nil)),
    }
}

unsafe fn call_on_value(
    receiver: *const c_void,
    method: &str,
    args: &[ConstVariantPtr],
    ret: *mut c_void,
) -> Result<(), CallErrorRaw> {
    use VariantType as T;
    let ty = unsafe { tag(receiver) };
    let value = unsafe { payload(receiver) };
    match (ty, method) {
        (T::String | T::StringName, "length") => {
            expect_arity(args, 0)?;
            let count = unsafe { heap::text(value) }.chars().count();
            unsafe { write_int(ret, i64::try_from(count).unwrap_or(i64::MAX)) };
            Ok(())
        }
        (T::String | T::StringName, "to_upper") => {
            expect_arity(args, 0)?;
            let upper = unsafe { heap::text(value) }.to_uppercase();
            unsafe { emplace(ret, T::String, |p| heap::write_text(p, upper)) };
            Ok(())
        }
        (T::Callable, "call") => {
            let target = unsafe { heap::target(value) };
            if target.object == 0 {
                return Err(simple_error(CallErrorType::InstanceIsNull));
            }
            unsafe { objects::invoke_by_name(objects::object_ptr(target.object), &target.name, args, ret) }
        }
        (T::Signal, "emit") => {
            let target = unsafe { heap::target(value) };
            objects::record_signal(target.object, &target.name)
        }
        (T::Object, method) => {
            let object = unsafe { read::<*mut c_void>(value) };
            if object.is_null() {
                return Err(simple_error(CallErrorType::InstanceIsNull));
            }
            unsafe { objects::invoke_by_name(object, method, args, ret) }
        }
        _ => Err(simple_error(CallErrorType::InvalidMethod)),
    }
}

pub(crate) unsafe fn arg_slice<'a, T>(args: *const T, count: Int) -> &'a [T] {
    let count = usize::try_from(count).unwrap_or(0);
    if args.is_null() || count == 0 {
        return &[];
    }
    unsafe { std::slice::from_raw_parts(args, count) }
}

// ============================================================================
// ABI entry points
// ============================================================================

pub(crate) unsafe extern "C" fn variant_new_copy(dest: UninitVariantPtr, src: ConstVariantPtr) {
    unsafe { copy_into(dest, src) }
}

pub(crate) unsafe extern "C" fn variant_new_nil(dest: UninitVariantPtr) {
    unsafe { write_nil(dest) }
}

pub(crate) unsafe extern "C" fn variant_destroy(variant: VariantPtr) {
    unsafe { destroy_in_place(variant) }
}

pub(crate) unsafe extern "C" fn variant_get_type(variant: ConstVariantPtr) -> u32 {
    unsafe { tag(variant) }.as_raw()
}

pub(crate) unsafe extern "C" fn variant_stringify(variant: ConstVariantPtr, ret: UninitStringPtr) {
    unsafe { heap::write_text(ret, describe(variant)) }
}

pub(crate) unsafe extern "C" fn variant_hash(variant: ConstVariantPtr) -> Int {
    unsafe { hash(variant) }
}

pub(crate) unsafe extern "C" fn variant_evaluate(
    op: u32,
    a: ConstVariantPtr,
    b: ConstVariantPtr,
    ret: UninitVariantPtr,
    valid: *mut Bool,
) {
    let result = VariantOperator::try_from(op)
        .ok()
        .and_then(|op| unsafe { evaluate(op, a, b) });
    let ok = match result {
        Some(value) => {
            unsafe { value.move_into(ret) };
            TRUE
        }
        None => {
            unsafe { write_nil(ret) };
            FALSE
        }
    };
    unsafe { write(valid.cast(), ok) };
}

pub(crate) unsafe extern "C" fn variant_call(
    variant: VariantPtr,
    method: ConstStringNamePtr,
    args: *const ConstVariantPtr,
    arg_count: Int,
    ret: UninitVariantPtr,
    error: *mut CallErrorRaw,
) {
    unsafe { write_nil(ret) };
    let name = unsafe { heap::text(method) };
    let args = unsafe { arg_slice(args, arg_count) };
    let outcome = unsafe { call_on_value(variant, &name, args, ret) };
    unsafe { write(error.cast(), outcome.err().unwrap_or(CallErrorRaw::OK)) };
}

#[cfg(test)]
mod tests {
    use super::*;

    fn int(value: i64) -> OwnedVariant {
        OwnedVariant::build(VariantType::Int, |p| unsafe { write(p, value) })
    }

    fn text(value: &str) -> OwnedVariant {
        OwnedVariant::build(VariantType::String, |p| unsafe { heap::write_text(p, value) })
    }

    #[test]
    fn nil_is_all_zero() {
        let nil = OwnedVariant::nil();
        assert_eq!(unsafe { tag(nil.as_ptr()) }, VariantType::Nil);
        assert_eq!(unsafe { describe(nil.as_ptr()) }, "<null>");
    }

    #[test]
    fn copies_are_deep() {
        let original = text("pine");
        let copy = original.clone();
        assert_ne!(unsafe { read_word(original.as_ptr(), 1) }, unsafe { read_word(copy.as_ptr(), 1) });
        assert!(unsafe { equal(original.as_ptr(), copy.as_ptr()) });
    }

    #[test]
    fn large_values_are_boxed() {
        let value = OwnedVariant::build(VariantType::Transform3D, |p| unsafe { write(p, [1.0f32; 12]) });
        assert_eq!(unsafe { read::<[f32; 12]>(payload(value.as_ptr())) }, [1.0; 12]);
        let copy = value.clone();
        assert!(unsafe { equal(value.as_ptr(), copy.as_ptr()) });
    }

    #[test]
    fn arithmetic_and_mixed_comparison() {
        let sum = unsafe { evaluate(VariantOperator::Add, int(2).as_ptr(), int(40).as_ptr()) };
        assert_eq!(sum.map(|v| unsafe { describe(v.as_ptr()) }), Some("42".to_string()));

        let half = OwnedVariant::build(VariantType::Float, |p| unsafe { write(p, 2.0f64) });
        assert!(unsafe { equal(int(2).as_ptr(), half.as_ptr()) });
        assert!(unsafe { evaluate(VariantOperator::Divide, int(1).as_ptr(), int(0).as_ptr()) }.is_none());
        assert!(unsafe { evaluate(VariantOperator::Add, text("a").as_ptr(), int(1).as_ptr()) }.is_none());
    }
}
