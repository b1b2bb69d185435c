//! Shared harness for unit tests: the engine is process-global, so tests
//! serialize on one lock and share one installed mock interface.

use std::sync::{Mutex, MutexGuard, Once, PoisonError};

use crate::abi::{self, EngineInterface};
use crate::builtin::CONTAINER_METHODS;
use crate::init::{self, ExtensionConfig, LeakReport};
use crate::object;

static LOCK: Mutex<()> = Mutex::new(());
static INSTALL: Once = Once::new();

/// Serializes the calling test and makes sure the mock engine is installed.
pub(crate) fn lock() -> MutexGuard<'static, ()> {
    // A failed test poisons the lock; the next one still runs.
    let guard = LOCK.lock().unwrap_or_else(PoisonError::into_inner);
    INSTALL.call_once(|| {
        let interface = unsafe { EngineInterface::load(gdbridge_mock::get_proc_address) }
            .expect("mock engine resolves every symbol");
        abi::install(interface).expect("interface installs once");
        CONTAINER_METHODS.resolve().expect("container methods resolve");
        object::resolve_tables().expect("object tables resolve");
    });
    reset_config();
    guard
}

/// Test defaults: any thread may dispatch, panics are caught, no leak report.
pub(crate) fn reset_config() {
    init::configure(&ExtensionConfig {
        enforce_main_thread: false,
        leak_report: LeakReport::Off,
        catch_panics: true,
        ..ExtensionConfig::default()
    });
}
