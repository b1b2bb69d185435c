//! Capture of everything the runtime asks the engine to print.

use std::ffi::{CStr, c_char};
use std::sync::{Mutex, PoisonError};

use gdbridge_sys::Bool;

static ERRORS: Mutex<Vec<String>> = Mutex::new(Vec::new());
static WARNINGS: Mutex<Vec<String>> = Mutex::new(Vec::new());
static PRINTED: Mutex<Vec<String>> = Mutex::new(Vec::new());

fn push(log: &Mutex<Vec<String>>, line: String) {
    log.lock().unwrap_or_else(PoisonError::into_inner).push(line);
}

fn snapshot(log: &Mutex<Vec<String>>) -> Vec<String> {
    log.lock().unwrap_or_else(PoisonError::into_inner).clone()
}

unsafe fn owned(text: *const c_char) -> String {
    if text.is_null() {
        return String::new();
    }
    unsafe { CStr::from_ptr(text) }.to_string_lossy().into_owned()
}

pub(crate) unsafe extern "C" fn print_error(
    description: *const c_char,
    function: *const c_char,
    file: *const c_char,
    line: i32,
    _editor_notify: Bool,
) {
    let (description, function, file) = unsafe { (owned(description), owned(function), owned(file)) };
    tracing::debug!(target: "gdbridge_mock", %function, %file, line, "engine error: {description}");
    push(&ERRORS, description);
}

pub(crate) unsafe extern "C" fn print_warning(
    description: *const c_char,
    function: *const c_char,
    file: *const c_char,
    line: i32,
    _editor_notify: Bool,
) {
    let (description, function, file) = unsafe { (owned(description), owned(function), owned(file)) };
    tracing::debug!(target: "gdbridge_mock", %function, %file, line, "engine warning: {description}");
    push(&WARNINGS, description);
}

/// An error the engine raises on its own, e.g. for a misused class database.
pub(crate) fn report(message: impl Into<String>) {
    let message = message.into();
    tracing::debug!(target: "gdbridge_mock", "engine error: {message}");
    push(&ERRORS, message);
}

pub(crate) fn record_print(line: String) {
    push(&PRINTED, line);
}

/// Descriptions passed to `print_error`, plus errors the mock raised itself.
pub fn printed_errors() -> Vec<String> {
    snapshot(&ERRORS)
}

pub fn printed_warnings() -> Vec<String> {
    snapshot(&WARNINGS)
}

/// Lines produced by the `print` utility function.
pub fn printed_lines() -> Vec<String> {
    snapshot(&PRINTED)
}
