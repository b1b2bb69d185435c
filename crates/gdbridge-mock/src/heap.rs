//! Engine-side storage of builtin values in their pointer-call form.
//!
//! A heap builtin is one boxed Rust value whose address is the first word of
//! the value's pointer-call bytes. Callables, signals and packed arrays carry a
//! second word that stays zero. A null first word reads as the empty value,
//! which is what a zeroed return slot decodes to.
//!
//! Every box is counted so tests can check that the runtime frees exactly what
//! it allocates.

use std::ffi::c_void;
use std::hash::Hasher;
use std::ptr::with_exposed_provenance_mut;
use std::sync::atomic::{AtomicUsize, Ordering};

use gdbridge_sys::VariantType;
use rustc_hash::FxHasher;

use crate::objects;
use crate::variant::{self, OwnedVariant};

static ALLOCATED: AtomicUsize = AtomicUsize::new(0);
static RELEASED: AtomicUsize = AtomicUsize::new(0);

pub(crate) fn live_allocations() -> usize {
    ALLOCATED
        .load(Ordering::Acquire)
        .saturating_sub(RELEASED.load(Ordering::Acquire))
}

pub(crate) type ArrayData = Vec<OwnedVariant>;
pub(crate) type DictionaryData = Vec<(OwnedVariant, OwnedVariant)>;

// ============================================================================
// Boxes and words
// ============================================================================

pub(crate) fn alloc<T>(value: T) -> u64 {
    ALLOCATED.fetch_add(1, Ordering::AcqRel);
    Box::into_raw(Box::new(value)).expose_provenance() as u64
}

/// # Safety
///
/// `word` is zero or came from [`alloc::<T>`] and was not released since.
pub(crate) unsafe fn release<T>(word: u64) {
    if word == 0 {
        return;
    }
    drop(unsafe { Box::from_raw(with_exposed_provenance_mut::<T>(word as usize)) });
    RELEASED.fetch_add(1, Ordering::AcqRel);
}

/// # Safety
///
/// As for [`release`]; the box must not be mutated while the borrow lives.
pub(crate) unsafe fn get_ref<'a, T>(word: u64) -> Option<&'a T> {
    unsafe { with_exposed_provenance_mut::<T>(word as usize).as_ref() }
}

/// # Safety
///
/// As for [`release`]; no other borrow of the box may be live.
pub(crate) unsafe fn get_mut<'a, T>(word: u64) -> Option<&'a mut T> {
    unsafe { with_exposed_provenance_mut::<T>(word as usize).as_mut() }
}

/// Returns the box behind `slot`, allocating an empty one into a null slot.
///
/// # Safety
///
/// `slot` holds zero or a live box of `T`.
pub(crate) unsafe fn ensure<'a, T: Default>(slot: *mut c_void) -> &'a mut T {
    let word = match unsafe { read_word(slot, 0) } {
        0 => {
            let word = alloc(T::default());
            unsafe { write_word(slot, 0, word) };
            word
        }
        word => word,
    };
    unsafe { &mut *with_exposed_provenance_mut::<T>(word as usize) }
}

pub(crate) unsafe fn read_word(ptr: *const c_void, index: usize) -> u64 {
    unsafe { ptr.cast::<u64>().add(index).read_unaligned() }
}

pub(crate) unsafe fn write_word(ptr: *mut c_void, index: usize, word: u64) {
    unsafe { ptr.cast::<u64>().add(index).write_unaligned(word) }
}

pub(crate) unsafe fn read<T: Copy>(ptr: *const c_void) -> T {
    unsafe { ptr.cast::<T>().read_unaligned() }
}

pub(crate) unsafe fn write<T>(ptr: *mut c_void, value: T) {
    if !ptr.is_null() {
        unsafe { ptr.cast::<T>().write_unaligned(value) }
    }
}

/// Text of a `String`, `StringName` or `NodePath` slot.
pub(crate) unsafe fn text(ptr: *const c_void) -> String {
    if ptr.is_null() {
        return String::new();
    }
    unsafe { get_ref::<String>(read_word(ptr, 0)) }
        .cloned()
        .unwrap_or_default()
}

/// Constructs a text value into uninitialized storage.
pub(crate) unsafe fn write_text(dest: *mut c_void, text: impl Into<String>) {
    if !dest.is_null() {
        unsafe { write_word(dest, 0, alloc(text.into())) }
    }
}

// ============================================================================
// Value kinds
// ============================================================================

/// Object and method (or signal) name behind a callable or signal. Object `0`
/// is the null callable.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash)]
pub(crate) struct Target {
    pub(crate) object: u64,
    pub(crate) name: String,
}

pub(crate) unsafe fn target(ptr: *const c_void) -> Target {
    unsafe { get_ref::<Target>(read_word(ptr, 0)) }
        .cloned()
        .unwrap_or_default()
}

/// Contiguous elements of a packed array. String elements are text words
/// owned by the array.
pub(crate) struct Packed {
    element: usize,
    strings: bool,
    bytes: Vec<u8>,
}

impl Packed {
    pub(crate) fn new(element: usize, strings: bool) -> Self {
        Self {
            element,
            strings,
            bytes: Vec::new(),
        }
    }

    pub(crate) fn len(&self) -> usize {
        self.bytes.len() / self.element
    }

    pub(crate) fn resize(&mut self, len: usize) {
        if self.strings {
            for index in len..self.len() {
                unsafe { release::<String>(self.word(index)) };
            }
        }
        self.bytes.resize(len * self.element, 0);
    }

    pub(crate) fn element(&self, index: usize) -> &[u8] {
        &self.bytes[index * self.element..(index + 1) * self.element]
    }

    /// Address of element `index`, or null when out of range.
    pub(crate) fn element_ptr(&mut self, index: usize) -> *mut c_void {
        if index >= self.len() {
            return std::ptr::null_mut();
        }
        unsafe { self.bytes.as_mut_ptr().add(index * self.element).cast() }
    }

    fn word(&self, index: usize) -> u64 {
        let mut bytes = [0u8; 8];
        bytes.copy_from_slice(self.element(index));
        u64::from_ne_bytes(bytes)
    }

    fn texts(&self) -> Vec<String> {
        (0..self.len())
            .map(|index| unsafe { get_ref::<String>(self.word(index)) }.cloned().unwrap_or_default())
            .collect()
    }

    /// Elements read as `width` consecutive `f32`s.
    pub(crate) fn reals(&self, width: usize) -> Vec<Vec<f32>> {
        (0..self.len())
            .map(|index| {
                self.element(index)
                    .chunks_exact(4)
                    .take(width)
                    .map(|chunk| f32::from_ne_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]))
                    .collect()
            })
            .collect()
    }
}

impl Clone for Packed {
    fn clone(&self) -> Self {
        let mut copy = Packed::new(self.element, self.strings);
        if !self.strings {
            copy.bytes = self.bytes.clone();
            return copy;
        }
        for text in self.texts() {
            let word = if text.is_empty() { 0 } else { alloc(text) };
            copy.bytes.extend_from_slice(&word.to_ne_bytes());
        }
        copy
    }
}

impl Drop for Packed {
    fn drop(&mut self) {
        if self.strings {
            self.resize(0);
        }
    }
}

/// How a builtin type is laid out in its pointer-call form.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Shape {
    /// Plain bytes of the given size.
    Pod(usize),
    Text,
    Array,
    Dictionary,
    Target,
    Packed { element: usize, strings: bool },
}

pub(crate) fn shape(ty: VariantType) -> Shape {
    use VariantType as T;
    let packed = |element, strings| Shape::Packed { element, strings };
    match ty {
        T::String | T::StringName | T::NodePath => Shape::Text,
        T::Array => Shape::Array,
        T::Dictionary => Shape::Dictionary,
        T::Callable | T::Signal => Shape::Target,
        T::PackedByteArray => packed(1, false),
        T::PackedInt32Array | T::PackedFloat32Array => packed(4, false),
        T::PackedInt64Array | T::PackedFloat64Array | T::PackedVector2Array => packed(8, false),
        T::PackedStringArray => packed(8, true),
        T::PackedVector3Array => packed(12, false),
        T::PackedColorArray | T::PackedVector4Array => packed(16, false),
        other => Shape::Pod(other.ptrcall_size()),
    }
}

// ============================================================================
// Lifecycle
// ============================================================================

/// # Safety
///
/// `dest` is writable storage for a `ty` value.
pub(crate) unsafe fn construct_default(ty: VariantType, dest: *mut c_void) {
    unsafe {
        match shape(ty) {
            Shape::Pod(size) => std::ptr::write_bytes(dest.cast::<u8>(), 0, size),
            Shape::Text => write_word(dest, 0, alloc(String::new())),
            Shape::Array => write_word(dest, 0, alloc(ArrayData::new())),
            Shape::Dictionary => write_word(dest, 0, alloc(DictionaryData::new())),
            Shape::Target => {
                write_word(dest, 0, alloc(Target::default()));
                write_word(dest, 1, 0);
            }
            Shape::Packed { element, strings } => {
                write_word(dest, 0, alloc(Packed::new(element, strings)));
                write_word(dest, 1, 0);
            }
        }
    }
}

/// Deep-copies a `ty` value from `src` into uninitialized `dest`.
///
/// # Safety
///
/// `src` holds a valid `ty` value; `dest` is writable storage for one.
pub(crate) unsafe fn construct_copy(ty: VariantType, dest: *mut c_void, src: *const c_void) {
    unsafe {
        let word = || read_word(src, 0);
        match shape(ty) {
            Shape::Pod(size) => std::ptr::copy(src.cast::<u8>(), dest.cast::<u8>(), size),
            Shape::Text => write_text(dest, text(src)),
            Shape::Array => {
                let items = get_ref::<ArrayData>(word()).cloned().unwrap_or_default();
                write_word(dest, 0, alloc(items));
            }
            Shape::Dictionary => {
                let entries = get_ref::<DictionaryData>(word()).cloned().unwrap_or_default();
                write_word(dest, 0, alloc(entries));
            }
            Shape::Target => {
                write_word(dest, 0, alloc(target(src)));
                write_word(dest, 1, 0);
            }
            Shape::Packed { element, strings } => {
                let packed = get_ref::<Packed>(word())
                    .cloned()
                    .unwrap_or_else(|| Packed::new(element, strings));
                write_word(dest, 0, alloc(packed));
                write_word(dest, 1, 0);
            }
        }
    }
}

/// Destroys a `ty` value in place and zeroes its words.
///
/// # Safety
///
/// `ptr` holds a valid `ty` value, which must not be used afterwards.
pub(crate) unsafe fn destroy(ty: VariantType, ptr: *mut c_void) {
    unsafe {
        let word = read_word(ptr, 0);
        match shape(ty) {
            Shape::Pod(_) => return,
            Shape::Text => release::<String>(word),
            Shape::Array => release::<ArrayData>(word),
            Shape::Dictionary => release::<DictionaryData>(word),
            Shape::Target => {
                release::<Target>(word);
                write_word(ptr, 1, 0);
            }
            Shape::Packed { .. } => {
                release::<Packed>(word);
                write_word(ptr, 1, 0);
            }
        }
        write_word(ptr, 0, 0);
    }
}

// ============================================================================
// Comparison, hashing and text
// ============================================================================

unsafe fn items<'a>(ptr: *const c_void) -> &'a [OwnedVariant] {
    unsafe { get_ref::<ArrayData>(read_word(ptr, 0)) }.map_or(&[], Vec::as_slice)
}

unsafe fn entries<'a>(ptr: *const c_void) -> &'a [(OwnedVariant, OwnedVariant)] {
    unsafe { get_ref::<DictionaryData>(read_word(ptr, 0)) }.map_or(&[], Vec::as_slice)
}

unsafe fn packed<'a>(ptr: *const c_void) -> Option<&'a Packed> {
    unsafe { get_ref::<Packed>(read_word(ptr, 0)) }
}

unsafe fn bytes<'a>(ptr: *const c_void, size: usize) -> &'a [u8] {
    unsafe { std::slice::from_raw_parts(ptr.cast::<u8>(), size) }
}

/// Deep equality of two `ty` values.
///
/// # Safety
///
/// Both pointers hold valid `ty` values.
pub(crate) unsafe fn equal(ty: VariantType, a: *const c_void, b: *const c_void) -> bool {
    unsafe {
        match shape(ty) {
            Shape::Pod(_) if ty == VariantType::Float => read::<f64>(a) == read::<f64>(b),
            Shape::Pod(size) => bytes(a, size) == bytes(b, size),
            Shape::Text => text(a) == text(b),
            Shape::Array => {
                let (x, y) = (items(a), items(b));
                x.len() == y.len()
                    && x.iter()
                        .zip(y)
                        .all(|(l, r)| variant::equal(l.as_ptr(), r.as_ptr()))
            }
            Shape::Dictionary => {
                let (x, y) = (entries(a), entries(b));
                x.len() == y.len()
                    && x.iter().all(|(key, value)| {
                        y.iter().any(|(other_key, other_value)| {
                            variant::equal(key.as_ptr(), other_key.as_ptr())
                                && variant::equal(value.as_ptr(), other_value.as_ptr())
                        })
                    })
            }
            Shape::Target => target(a) == target(b),
            Shape::Packed { strings: true, .. } => {
                packed(a).map(Packed::texts).unwrap_or_default() == packed(b).map(Packed::texts).unwrap_or_default()
            }
            Shape::Packed { .. } => {
                packed(a).map_or(&[][..], |p| &p.bytes) == packed(b).map_or(&[][..], |p| &p.bytes)
            }
        }
    }
}

/// # Safety
///
/// `ptr` holds a valid `ty` value.
pub(crate) unsafe fn hash_into(ty: VariantType, ptr: *const c_void, state: &mut FxHasher) {
    state.write_u32(ty.as_raw());
    unsafe {
        match shape(ty) {
            Shape::Pod(_) if ty == VariantType::Float => state.write_u64(read::<f64>(ptr).to_bits()),
            Shape::Pod(size) => state.write(bytes(ptr, size)),
            Shape::Text => state.write(text(ptr).as_bytes()),
            Shape::Array => {
                for item in items(ptr) {
                    state.write_i64(variant::hash(item.as_ptr()));
                }
            }
            Shape::Dictionary => {
                for (key, value) in entries(ptr) {
                    state.write_i64(variant::hash(key.as_ptr()));
                    state.write_i64(variant::hash(value.as_ptr()));
                }
            }
            Shape::Target => {
                let target = target(ptr);
                state.write_u64(target.object);
                state.write(target.name.as_bytes());
            }
            Shape::Packed { strings: true, .. } => {
                for text in packed(ptr).map(Packed::texts).unwrap_or_default() {
                    state.write(text.as_bytes());
                }
            }
            Shape::Packed { .. } => state.write(packed(ptr).map_or(&[][..], |p| &p.bytes)),
        }
    }
}

/// Formats a float the way the engine prints it: whole values keep a `.0`.
pub(crate) fn real(value: f64) -> String {
    if value.is_finite() && value.fract() == 0.0 && value.abs() < 1e16 {
        format!("{value:.1}")
    } else {
        format!("{value}")
    }
}

fn tuple(parts: impl IntoIterator<Item = String>) -> String {
    format!("({})", parts.into_iter().collect::<Vec<_>>().join(", "))
}

unsafe fn reals(ptr: *const c_void, count: usize) -> Vec<String> {
    (0..count)
        .map(|index| real(f64::from(unsafe { read::<f32>(ptr.cast::<f32>().add(index).cast()) })))
        .collect()
}

unsafe fn ints(ptr: *const c_void, count: usize) -> Vec<String> {
    (0..count)
        .map(|index| unsafe { read::<i32>(ptr.cast::<i32>().add(index).cast()) }.to_string())
        .collect()
}

fn packed_element(ty: VariantType, element: &[u8]) -> String {
    let ptr: *const c_void = element.as_ptr().cast();
    unsafe {
        match ty {
            VariantType::PackedByteArray => element[0].to_string(),
            VariantType::PackedInt32Array => read::<i32>(ptr).to_string(),
            VariantType::PackedInt64Array => read::<i64>(ptr).to_string(),
            VariantType::PackedFloat32Array => real(f64::from(read::<f32>(ptr))),
            VariantType::PackedFloat64Array => real(read::<f64>(ptr)),
            VariantType::PackedStringArray => text(ptr),
            _ => tuple(reals(ptr, element.len() / 4)),
        }
    }
}

/// Engine text form of a `ty` value.
///
/// # Safety
///
/// `ptr` holds a valid `ty` value.
pub(crate) unsafe fn describe(ty: VariantType, ptr: *const c_void) -> String {
    use VariantType as T;
    unsafe {
        match ty {
            T::Nil => "<null>".to_string(),
            T::Bool => (read::<u8>(ptr) != 0).to_string(),
            T::Int => read::<i64>(ptr).to_string(),
            T::Float => real(read::<f64>(ptr)),
            T::String | T::StringName | T::NodePath => text(ptr),
            T::Vector2i | T::Vector3i | T::Vector4i | T::Rect2i => tuple(ints(ptr, ty.ptrcall_size() / 4)),
            T::Rid => format!("RID({})", read::<u64>(ptr)),
            T::Object => objects::describe(read::<*mut c_void>(ptr)),
            T::Callable => {
                let target = target(ptr);
                match objects::class_of_id(target.object) {
                    Some(class) => format!("{class}::{}", target.name),
                    None => "null::null".to_string(),
                }
            }
            T::Signal => {
                let target = target(ptr);
                let class = objects::class_of_id(target.object).unwrap_or_else(|| "null".to_string());
                format!("{class}::[signal]{}", target.name)
            }
            T::Array => format!(
                "[{}]",
                items(ptr)
                    .iter()
                    .map(|item| variant::describe(item.as_ptr()))
                    .collect::<Vec<_>>()
                    .join(", ")
            ),
            T::Dictionary => {
                let body = entries(ptr)
                    .iter()
                    .map(|(key, value)| format!("{}: {}", variant::describe(key.as_ptr()), variant::describe(value.as_ptr())))
                    .collect::<Vec<_>>()
                    .join(", ");
                if body.is_empty() { "{}".to_string() } else { format!("{{ {body} }}") }
            }
            ty if ty.is_packed_array() => {
                let elements = packed(ptr)
                    .map(|packed| {
                        (0..packed.len())
                            .map(|index| packed_element(ty, packed.element(index)))
                            .collect::<Vec<_>>()
                    })
                    .unwrap_or_default();
                format!("[{}]", elements.join(", "))
            }
            other => tuple(reals(ptr, other.ptrcall_size() / 4)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn shapes_follow_pointer_call_sizes() {
        assert_eq!(shape(VariantType::Vector3), Shape::Pod(12));
        assert_eq!(shape(VariantType::Object), Shape::Pod(8));
        assert_eq!(shape(VariantType::StringName), Shape::Text);
        assert_eq!(
            shape(VariantType::PackedStringArray),
            Shape::Packed { element: 8, strings: true }
        );
    }

    #[test]
    fn packed_strings_are_owned_per_element() {
        let mut packed = Packed::new(8, true);
        packed.resize(2);
        let slot = packed.element_ptr(1);
        unsafe { write_text(slot, "tree") };
        let copy = packed.clone();
        assert_eq!(copy.texts(), vec![String::new(), "tree".to_string()]);
        assert_ne!(copy.word(1), packed.word(1));
        assert!(packed.element_ptr(2).is_null());
    }

    #[test]
    fn whole_reals_keep_a_fraction() {
        assert_eq!(real(2.0), "2.0");
        assert_eq!(real(0.5), "0.5");
    }
}
