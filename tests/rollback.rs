//! A library whose class registration fails partway. Runs in its own binary:
//! the failed entry leaves the engine surface installed.

mod common;

use gdbridge::__private::sys::{FALSE, Initialization};
use gdbridge::prelude::*;

use common::Node3D;

#[derive(HostClass)]
#[class(base = Node3D, init)]
pub struct Lantern {
    base: Base<Node3D>,
    lit: bool,
}

#[host_methods]
impl Lantern {
    #[method]
    fn light(&mut self) -> bool {
        self.lit = !self.lit;
        self.lit
    }
}

#[derive(HostClass)]
#[class(base = Node3D, init)]
pub struct Wick {
    base: Base<Node3D>,
}

#[host_methods]
impl Wick {}

#[derive(HostClass)]
#[class(extends = Wick, init)]
pub struct Candle {
    wick: Wick,
}

#[host_methods]
impl Candle {}

struct BrokenLibrary;

impl ExtensionLibrary for BrokenLibrary {
    fn config() -> ExtensionConfig {
        common::test_config()
    }

    fn method_tables() -> &'static [&'static MethodTable] {
        &common::ENGINE_TABLES
    }

    fn register_classes(registrar: &mut ClassRegistrar) -> Result<(), RegistrationError> {
        // `Candle` extends `Wick`, which is registered too late.
        registrar
            .register::<Lantern>()?
            .register::<Candle>()?
            .register::<Wick>()?;
        Ok(())
    }
}

gdbridge::entry_point!(gdbridge_rollback_init, BrokenLibrary);

#[test]
fn failed_registration_withdraws_published_classes() {
    common::init_tracing();
    let mut init = Initialization::default();
    let ok = unsafe { gdbridge_rollback_init(Some(gdbridge_mock::get_proc_address), common::library(), &mut init) };

    assert_eq!(ok, FALSE);
    assert!(init.deinitialize.is_none());
    assert!(gdbridge_mock::extension_classes().is_empty());
    assert!(gdbridge_mock::extension_class("Lantern").is_none());
    assert!(gdbridge::registration::registered_classes().is_empty());
    assert!(gdbridge_mock::construct("Lantern").is_none());

    let errors = gdbridge_mock::printed_errors();
    assert!(
        errors
            .iter()
            .any(|error| error.contains("extension initialization failed") && error.contains("`Candle`")),
        "{errors:?}"
    );
}
