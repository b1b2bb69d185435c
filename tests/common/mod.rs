//! Shared harness for the root test suites.
//!
//! The engine is process-global: every suite boots the mock engine once
//! through its own entry symbol, and tests serialize on one lock.

#![allow(dead_code)]

use std::sync::{Mutex, MutexGuard, Once, PoisonError};

use gdbridge::__private::sys::{Bool, ClassLibraryPtr, GetProcAddressFn, Initialization, TRUE};
use gdbridge::prelude::*;

pub type EntryFn =
    unsafe extern "C" fn(Option<GetProcAddressFn>, ClassLibraryPtr, *mut Initialization) -> Bool;

static LOCK: Mutex<()> = Mutex::new(());
static BOOT: Once = Once::new();

/// Library handle the suites pass to their entry symbol.
pub fn library() -> ClassLibraryPtr {
    std::ptr::without_provenance_mut(0x5150)
}

/// Installs a `tracing` subscriber honouring `RUST_LOG`, once.
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

/// Serializes the calling test and boots the engine through `entry` on
/// first use.
pub fn engine(entry: EntryFn) -> MutexGuard<'static, ()> {
    let guard = LOCK.lock().unwrap_or_else(PoisonError::into_inner);
    BOOT.call_once(|| {
        init_tracing();
        let mut init = Initialization::default();
        let ok = unsafe { entry(Some(gdbridge_mock::get_proc_address), library(), &mut init) };
        assert_eq!(ok, TRUE, "entry failed: {:?}", gdbridge_mock::printed_errors());
        assert!(init.deinitialize.is_some());
    });
    guard
}

/// Test config: tests run on harness threads and report nothing at exit.
pub fn test_config() -> ExtensionConfig {
    ExtensionConfig {
        enforce_main_thread: false,
        leak_report: LeakReport::Off,
        ..ExtensionConfig::default()
    }
}

// ============================================================================
// Engine classes the suites call into
// ============================================================================

engine_class! {
    pub struct Node: manual [Object];
    pub struct Node3D: manual [Node, Object];
    pub struct Resource: ref_counted [RefCounted, Object];
    pub struct Shape3D: ref_counted [Resource, RefCounted, Object];
    pub struct SphereShape3D: ref_counted [Shape3D, Resource, RefCounted, Object];
    pub struct Node3DGizmo: ref_counted [RefCounted, Object];
    pub struct EditorNode3DGizmo: ref_counted [Node3DGizmo, RefCounted, Object];
}

method_table! {
    pub static NODE: NodeMethod = "Node" {
        add_child = 3863233950;
        get_child = 541253412;
        get_child_count = 894402480;
        get_parent = 3160264692;
    }
}

method_table! {
    pub static NODE_3D: Node3DMethod = "Node3D" {
        set_position = 3460891852;
        get_position = 3360562783;
    }
}

method_table! {
    pub static RESOURCE: ResourceMethod = "Resource" {
        duplicate = 482882304 [RETURNS_OWNED];
    }
}

method_table! {
    pub static SPHERE_SHAPE_3D: SphereShape3DMethod = "SphereShape3D" {
        set_radius = 373806689;
        get_radius = 1740695150;
    }
}

method_table! {
    pub static EDITOR_NODE_3D_GIZMO: EditorNode3DGizmoMethod = "EditorNode3DGizmo" {
        add_lines = 2910971437;
        clear = 3218959716;
    }
}

pub static ENGINE_TABLES: [&MethodTable; 5] =
    [&NODE, &NODE_3D, &RESOURCE, &SPHERE_SHAPE_3D, &EDITOR_NODE_3D_GIZMO];

/// `Node::add_child(child, false, 0)`.
pub fn add_child(parent: Bound<'_, Node>, child: Transferred<Node>) -> Result<(), CallError> {
    let mut frame = CallFrame::new();
    frame.arg(child).arg(false).arg(0i64);
    dispatch::ptrcall(NodeMethod::add_child.bind(), Some(parent.raw()), frame)
}

pub fn get_child_count(node: Bound<'_, Node>) -> Result<i64, CallError> {
    let mut frame = CallFrame::new();
    frame.arg(false);
    dispatch::ptrcall(NodeMethod::get_child_count.bind(), Some(node.raw()), frame)
}

/// `Resource::duplicate(false)`; the engine hands the copy's reference over.
pub fn duplicate(resource: Bound<'_, Resource>) -> Result<Option<Owned<Resource>>, CallError> {
    let mut frame = CallFrame::new();
    frame.arg(false);
    dispatch::ptrcall(ResourceMethod::duplicate.bind(), Some(resource.raw()), frame)
}

pub fn set_radius(shape: Bound<'_, SphereShape3D>, radius: f64) -> Result<(), CallError> {
    let mut frame = CallFrame::new();
    frame.arg(radius);
    dispatch::ptrcall(SphereShape3DMethod::set_radius.bind(), Some(shape.raw()), frame)
}

pub fn get_radius(shape: Bound<'_, SphereShape3D>) -> Result<f64, CallError> {
    dispatch::ptrcall(SphereShape3DMethod::get_radius.bind(), Some(shape.raw()), CallFrame::new())
}
