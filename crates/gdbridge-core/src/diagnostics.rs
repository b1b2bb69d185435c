//! Forwarding of host diagnostics to the engine's own error output.
//!
//! Everything is logged through `tracing` first. Errors and warnings that the
//! engine user must see (failed initialization, panics in host code) are also
//! printed by the engine through `print_error`/`print_warning`. Before the
//! interface is installed, or after teardown, only the `tracing` event is
//! emitted.

use std::ffi::CString;
use std::panic::Location;

use gdbridge_sys::{FALSE, PrintErrorFn};

use crate::abi;

fn forward(print: fn(&abi::EngineInterface) -> PrintErrorFn, message: &str, location: &Location<'_>) {
    let Some(interface) = abi::try_interface() else {
        return;
    };
    if abi::is_torn_down() {
        return;
    }
    let (Ok(description), Ok(file)) = (
        CString::new(message.replace('\0', " ")),
        CString::new(location.file().replace('\0', " ")),
    ) else {
        return;
    };
    let line = i32::try_from(location.line()).unwrap_or(i32::MAX);
    unsafe { print(interface)(description.as_ptr(), c"gdbridge".as_ptr(), file.as_ptr(), line, FALSE) };
}

/// Logs `message` and prints it as an engine error.
#[track_caller]
pub fn engine_error(message: &str) {
    let location = Location::caller();
    tracing::error!(target: "gdbridge::init", file = location.file(), line = location.line(), "{message}");
    forward(|interface| interface.print_error, message, location);
}

/// Logs `message` and prints it as an engine warning.
#[track_caller]
pub fn engine_warning(message: &str) {
    let location = Location::caller();
    tracing::warn!(target: "gdbridge::init", file = location.file(), line = location.line(), "{message}");
    forward(|interface| interface.print_warning, message, location);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support;

    #[test]
    fn errors_reach_the_engine() {
        let _guard = test_support::lock();
        let before = gdbridge_mock::printed_errors().len();
        engine_error("texture atlas is full");
        let printed = gdbridge_mock::printed_errors();
        assert_eq!(printed.len(), before + 1);
        assert_eq!(printed.last().map(String::as_str), Some("texture atlas is full"));
    }

    #[test]
    fn interior_nul_is_replaced() {
        let _guard = test_support::lock();
        engine_warning("bad\0name");
        assert_eq!(gdbridge_mock::printed_warnings().last().map(String::as_str), Some("bad name"));
    }
}
