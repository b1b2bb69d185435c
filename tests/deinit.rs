//! Library teardown. Runs in its own binary: once torn down, the process
//! cannot initialize again.

mod common;

use std::sync::atomic::{AtomicBool, Ordering};

use gdbridge::abi;
use gdbridge::prelude::*;

use common::Node3D;

#[derive(HostClass)]
#[class(base = Node3D, init)]
pub struct Beacon {
    base: Base<Node3D>,
    pulses: i64,
}

#[host_methods]
impl Beacon {
    #[method]
    fn pulse(&mut self) -> i64 {
        self.pulses += 1;
        self.pulses
    }
}

#[derive(HostClass)]
#[class(base = RefCounted, init)]
pub struct Token {
    base: Base<RefCounted>,
}

#[host_methods]
impl Token {}

#[derive(HostClass)]
#[class(extends = Beacon, init)]
pub struct Lighthouse {
    beacon: Beacon,
}

#[host_methods]
impl Lighthouse {}

static DEINITIALIZED: AtomicBool = AtomicBool::new(false);

struct DeinitLibrary;

impl ExtensionLibrary for DeinitLibrary {
    fn config() -> ExtensionConfig {
        ExtensionConfig {
            leak_report: LeakReport::Summary,
            ..common::test_config()
        }
    }

    fn method_tables() -> &'static [&'static MethodTable] {
        &common::ENGINE_TABLES
    }

    fn register_classes(registrar: &mut ClassRegistrar) -> Result<(), RegistrationError> {
        registrar
            .register::<Beacon>()?
            .register::<Token>()?
            .register::<Lighthouse>()?;
        Ok(())
    }

    fn on_deinitialize() {
        assert!(abi::is_initialized(), "hook runs while the surface is live");
        DEINITIALIZED.store(true, Ordering::Release);
    }
}

gdbridge::entry_point!(gdbridge_deinit_init, DeinitLibrary);

#[test]
fn teardown_unregisters_and_detaches() -> anyhow::Result<()> {
    let _engine = common::engine(gdbridge_deinit_init);

    let lighthouse = gdbridge::instantiate::<Lighthouse>().unwrap();
    assert_eq!(lighthouse.call("pulse", &[])?.to::<i64>()?, 1);
    let lighthouse_ptr = lighthouse.raw().as_ptr();
    let instance = gdbridge_mock::instance_of(lighthouse_ptr).unwrap();

    let token = gdbridge::instantiate::<Token>().unwrap();
    let token_ptr = token.raw().as_ptr();
    let errors = gdbridge_mock::printed_errors().len();

    let mut classes = gdbridge_mock::extension_classes();
    classes.sort();
    assert_eq!(classes, ["Beacon", "Lighthouse", "Token"]);

    unsafe { gdbridge::init::deinitialize::<DeinitLibrary>(std::ptr::null_mut()) };

    assert!(DEINITIALIZED.load(Ordering::Acquire));
    assert!(abi::is_torn_down());
    assert!(!abi::is_initialized());
    // Subclasses went first, so the engine reported nothing.
    assert!(gdbridge_mock::extension_classes().is_empty());
    assert_eq!(gdbridge_mock::printed_errors().len(), errors);
    assert!(!gdbridge::shim::is_live(instance));

    // Handles outliving the library leak instead of calling into the engine.
    drop(token);
    assert!(gdbridge_mock::is_alive(token_ptr));
    assert_eq!(gdbridge_mock::reference_count(token_ptr), Some(1));
    drop(lighthouse);
    assert!(gdbridge_mock::is_alive(lighthouse_ptr));

    // A second teardown is ignored.
    DEINITIALIZED.store(false, Ordering::Release);
    unsafe { gdbridge::init::deinitialize::<DeinitLibrary>(std::ptr::null_mut()) };
    assert!(!DEINITIALIZED.load(Ordering::Acquire));
    Ok(())
}
