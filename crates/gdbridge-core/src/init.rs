//! Library entry and teardown.
//!
//! ```text
//! engine ──entry(get_proc_address, library, init)──▶ initialize::<L>
//!                                                      ├── load + install EngineInterface
//!                                                      ├── resolve builtin, Object and L's method tables
//!                                                      ├── L::register_classes
//!                                                      └── write deinitialize into *init
//! engine ──deinitialize(userdata)──────────────────▶ deinitialize::<L>
//!                                                      ├── unregister classes, most derived first
//!                                                      ├── forget live instances and class tags
//!                                                      ├── leak report
//!                                                      └── mark the surface torn down
//! ```
//!
//! The entry symbol itself is emitted by `gdbridge::entry_point!`.

use std::ffi::c_void;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::atomic::{AtomicBool, AtomicPtr, AtomicU8, Ordering};

use gdbridge_sys::{Bool, ClassLibraryPtr, FALSE, GetProcAddressFn, Initialization, TRUE};

use crate::abi::{self, EngineInterface};
use crate::builtin::CONTAINER_METHODS;
use crate::error::{InitError, RegistrationError};
use crate::method_bind::{MethodTable, UtilityTable};
use crate::registration::{self, ClassRegistrar};
use crate::{handle, object, shim};

// ============================================================================
// Configuration
// ============================================================================

/// What to log about registry handles still live at teardown.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum LeakReport {
    Off = 0,
    /// One event per payload kind with a count.
    Summary = 1,
    /// One event per live handle.
    PerHandle = 2,
}

impl Default for LeakReport {
    fn default() -> Self {
        if cfg!(debug_assertions) {
            LeakReport::PerHandle
        } else {
            LeakReport::Summary
        }
    }
}

impl LeakReport {
    fn from_u8(value: u8) -> Self {
        match value {
            0 => LeakReport::Off,
            1 => LeakReport::Summary,
            _ => LeakReport::PerHandle,
        }
    }
}

/// Library-wide settings, read once at initialization.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExtensionConfig {
    /// Refuse non-thread-safe method binds off the init thread.
    pub enforce_main_thread: bool,
    pub leak_report: LeakReport,
    /// Catch panics in host code called by the engine. When off, a panic in
    /// a trampoline aborts the process at the `extern "C"` boundary.
    pub catch_panics: bool,
}

impl Default for ExtensionConfig {
    fn default() -> Self {
        Self {
            enforce_main_thread: true,
            leak_report: LeakReport::default(),
            catch_panics: true,
        }
    }
}

static ENFORCE_MAIN_THREAD: AtomicBool = AtomicBool::new(true);
static CATCH_PANICS: AtomicBool = AtomicBool::new(true);
static LEAK_REPORT: AtomicU8 = AtomicU8::new(LeakReport::PerHandle as u8);
static LIBRARY: AtomicPtr<c_void> = AtomicPtr::new(std::ptr::null_mut());

pub(crate) fn configure(config: &ExtensionConfig) {
    ENFORCE_MAIN_THREAD.store(config.enforce_main_thread, Ordering::Release);
    CATCH_PANICS.store(config.catch_panics, Ordering::Release);
    LEAK_REPORT.store(config.leak_report as u8, Ordering::Release);
}

pub fn enforces_main_thread() -> bool {
    ENFORCE_MAIN_THREAD.load(Ordering::Acquire)
}

pub fn catches_panics() -> bool {
    CATCH_PANICS.load(Ordering::Acquire)
}

/// The library handle the engine passed to the entry function.
pub(crate) fn library_ptr() -> ClassLibraryPtr {
    LIBRARY.load(Ordering::Acquire)
}

// ============================================================================
// Library trait
// ============================================================================

/// Implemented once per extension library; drives initialization.
pub trait ExtensionLibrary: 'static {
    fn config() -> ExtensionConfig {
        ExtensionConfig::default()
    }

    /// Engine class method tables the library calls. Resolved before any
    /// class is registered.
    fn method_tables() -> &'static [&'static MethodTable] {
        &[]
    }

    fn utility_tables() -> &'static [&'static UtilityTable] {
        &[]
    }

    fn register_classes(registrar: &mut ClassRegistrar) -> Result<(), RegistrationError> {
        let _ = registrar;
        Ok(())
    }

    /// Runs first during teardown, while the engine surface is still usable.
    fn on_deinitialize() {}
}

// ============================================================================
// Entry
// ============================================================================

fn resolve_tables<L: ExtensionLibrary>() -> Result<(), InitError> {
    CONTAINER_METHODS.resolve()?;
    object::resolve_tables()?;
    for table in L::method_tables() {
        table.resolve()?;
    }
    for table in L::utility_tables() {
        table.resolve()?;
    }
    Ok(())
}

unsafe fn try_initialize<L: ExtensionLibrary>(
    get_proc_address: Option<GetProcAddressFn>,
    library: ClassLibraryPtr,
    init: *mut Initialization,
) -> Result<(), InitError> {
    let resolver = get_proc_address.ok_or(InitError::NoResolver)?;
    if init.is_null() {
        return Err(InitError::NullArgument("initialization"));
    }

    let interface = unsafe { EngineInterface::load(resolver)? };
    abi::install(interface)?;

    // Only the library that installed the surface gets to configure it.
    let config = L::config();
    configure(&config);
    tracing::debug!(target: "gdbridge::init", ?config, "initializing");
    LIBRARY.store(library, Ordering::Release);

    resolve_tables::<L>()?;

    let mut registrar = ClassRegistrar::new(library);
    if let Err(err) = L::register_classes(&mut registrar) {
        let published = registration::registered_classes().len();
        tracing::error!(target: "gdbridge::init", %err, published, "class registration failed, withdrawing published classes");
        registration::unregister_all(library);
        return Err(err.into());
    }

    unsafe {
        init.write(Initialization {
            userdata: std::ptr::null_mut(),
            deinitialize: Some(deinitialize::<L>),
        })
    };
    tracing::info!(
        target: "gdbridge::init",
        classes = registration::registered_classes().len(),
        "library initialized"
    );
    Ok(())
}

/// Body of the library entry function. Returns `TRUE` on success; on failure
/// the cause is logged and printed by the engine, and nothing is registered.
///
/// # Safety
///
/// Must be called once, by the engine, with its resolver and library handle;
/// `init` must point at the engine's initialization struct.
pub unsafe fn initialize<L: ExtensionLibrary>(
    get_proc_address: Option<GetProcAddressFn>,
    library: ClassLibraryPtr,
    init: *mut Initialization,
) -> Bool {
    let outcome = catch_unwind(AssertUnwindSafe(|| unsafe {
        try_initialize::<L>(get_proc_address, library, init)
    }));
    match outcome {
        Ok(Ok(())) => TRUE,
        Ok(Err(err)) => {
            crate::diagnostics::engine_error(&format!("extension initialization failed: {err}"));
            FALSE
        }
        Err(_) => {
            crate::diagnostics::engine_error("extension initialization panicked");
            FALSE
        }
    }
}

/// Written into [`Initialization::deinitialize`].
///
/// # Safety
///
/// Called by the engine once, after the library is initialized.
pub unsafe extern "C" fn deinitialize<L: ExtensionLibrary>(_userdata: *mut c_void) {
    if !abi::is_initialized() {
        tracing::warn!(target: "gdbridge::init", "deinitialize without a live library ignored");
        return;
    }
    let outcome = catch_unwind(|| {
        L::on_deinitialize();
        teardown();
    });
    if outcome.is_err() {
        tracing::error!(target: "gdbridge::init", "teardown panicked; surface marked torn down anyway");
        abi::mark_torn_down();
    }
}

fn teardown() {
    registration::unregister_all(library_ptr());
    shim::clear_live_instances();
    object::clear_class_tags();

    let report = LeakReport::from_u8(LEAK_REPORT.load(Ordering::Acquire));
    let leaked = handle::report_leaks(report);

    abi::mark_torn_down();
    LIBRARY.store(std::ptr::null_mut(), Ordering::Release);
    tracing::info!(target: "gdbridge::init", leaked, "library deinitialized");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support;

    struct Empty;

    impl ExtensionLibrary for Empty {}

    #[test]
    fn leak_report_default_follows_build_profile() {
        let expected = if cfg!(debug_assertions) {
            LeakReport::PerHandle
        } else {
            LeakReport::Summary
        };
        assert_eq!(ExtensionConfig::default().leak_report, expected);
        assert_eq!(LeakReport::from_u8(LeakReport::Summary as u8), LeakReport::Summary);
    }

    #[test]
    fn missing_resolver_fails_without_touching_init() {
        let _guard = test_support::lock();
        let mut init = Initialization::default();
        let ok = unsafe { initialize::<Empty>(None, std::ptr::null_mut(), &mut init) };
        assert_eq!(ok, FALSE);
        assert!(init.deinitialize.is_none());
        test_support::reset_config();
    }

    #[test]
    fn second_initialization_is_refused() {
        let _guard = test_support::lock();
        let mut init = Initialization::default();
        let ok = unsafe {
            initialize::<Empty>(Some(gdbridge_mock::get_proc_address), std::ptr::null_mut(), &mut init)
        };
        assert_eq!(ok, FALSE);
        assert!(init.deinitialize.is_none());
        assert!(abi::is_initialized());
        test_support::reset_config();
    }

    struct Noisy;

    impl ExtensionLibrary for Noisy {
        fn config() -> ExtensionConfig {
            ExtensionConfig {
                enforce_main_thread: true,
                catch_panics: false,
                ..ExtensionConfig::default()
            }
        }
    }

    #[test]
    fn refused_initialization_keeps_the_live_config() {
        let _guard = test_support::lock();
        let mut init = Initialization::default();
        let ok = unsafe {
            initialize::<Noisy>(Some(gdbridge_mock::get_proc_address), std::ptr::null_mut(), &mut init)
        };
        assert_eq!(ok, FALSE);
        assert!(!enforces_main_thread());
        assert!(catches_panics());
        test_support::reset_config();
    }
}
