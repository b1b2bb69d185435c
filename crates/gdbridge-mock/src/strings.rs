//! String construction and extraction.
//!
//! `String`, `StringName` and `NodePath` share one representation here, so a
//! single constructor serves both string-creating symbols.

use std::ffi::{CStr, c_char};

use gdbridge_sys::{ConstStringPtr, Int, UninitStringPtr};

use crate::heap;

unsafe fn utf8_input<'a>(contents: *const c_char, len: Int) -> &'a [u8] {
    if contents.is_null() {
        return &[];
    }
    match usize::try_from(len) {
        Ok(len) => unsafe { std::slice::from_raw_parts(contents.cast::<u8>(), len) },
        // Negative length: nul-terminated.
        Err(_) => unsafe { CStr::from_ptr(contents) }.to_bytes(),
    }
}

pub(crate) unsafe extern "C" fn string_new_with_utf8_chars_and_len(
    dest: UninitStringPtr,
    contents: *const c_char,
    len: Int,
) {
    let text = String::from_utf8_lossy(unsafe { utf8_input(contents, len) }).into_owned();
    unsafe { heap::write_text(dest, text) }
}

pub(crate) unsafe extern "C" fn string_new_with_utf32_chars_and_len(dest: UninitStringPtr, contents: *const u32, len: Int) {
    let units: &[u32] = match usize::try_from(len) {
        Ok(len) if !contents.is_null() => unsafe { std::slice::from_raw_parts(contents, len) },
        _ => &[],
    };
    let text: String = units
        .iter()
        .map(|unit| char::from_u32(*unit).unwrap_or(char::REPLACEMENT_CHARACTER))
        .collect();
    unsafe { heap::write_text(dest, text) }
}

/// Returns the full UTF-8 length; writes at most `max_write_len` bytes.
pub(crate) unsafe extern "C" fn string_to_utf8_chars(string: ConstStringPtr, text: *mut c_char, max_write_len: Int) -> Int {
    let source = unsafe { heap::text(string) };
    let bytes = source.as_bytes();
    if !text.is_null() {
        let written = bytes.len().min(usize::try_from(max_write_len).unwrap_or(0));
        unsafe { std::ptr::copy_nonoverlapping(bytes.as_ptr(), text.cast::<u8>(), written) };
    }
    Int::try_from(bytes.len()).unwrap_or(Int::MAX)
}

/// Returns the full length in characters; writes at most `max_write_len`.
pub(crate) unsafe extern "C" fn string_to_utf32_chars(string: ConstStringPtr, text: *mut u32, max_write_len: Int) -> Int {
    let chars: Vec<u32> = unsafe { heap::text(string) }.chars().map(u32::from).collect();
    if !text.is_null() {
        let written = chars.len().min(usize::try_from(max_write_len).unwrap_or(0));
        unsafe { std::ptr::copy_nonoverlapping(chars.as_ptr(), text, written) };
    }
    Int::try_from(chars.len()).unwrap_or(Int::MAX)
}

#[cfg(test)]
mod tests {
    use super::*;
    use gdbridge_sys::VariantType;

    #[test]
    fn length_query_then_fill() {
        let mut slot = [0u64; 1];
        let text = "höhe";
        unsafe { string_new_with_utf8_chars_and_len(slot.as_mut_ptr().cast(), text.as_ptr().cast(), text.len() as Int) };

        let ptr = slot.as_ptr().cast();
        assert_eq!(unsafe { string_to_utf32_chars(ptr, std::ptr::null_mut(), 0) }, 4);
        assert_eq!(unsafe { string_to_utf8_chars(ptr, std::ptr::null_mut(), 0) }, 5);

        let mut buffer = [0u32; 4];
        unsafe { string_to_utf32_chars(ptr, buffer.as_mut_ptr(), 4) };
        assert_eq!(buffer[1], u32::from('ö'));
        unsafe { heap::destroy(VariantType::String, slot.as_mut_ptr().cast()) };
    }

    #[test]
    fn negative_length_reads_to_nul() {
        let mut slot = [0u64; 1];
        unsafe { string_new_with_utf8_chars_and_len(slot.as_mut_ptr().cast(), c"oak".as_ptr(), -1) };
        assert_eq!(unsafe { heap::text(slot.as_ptr().cast()) }, "oak");
        unsafe { heap::destroy(VariantType::String, slot.as_mut_ptr().cast()) };
    }
}
