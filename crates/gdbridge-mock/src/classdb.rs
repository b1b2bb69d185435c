//! Extension class registration and the engine-side driving API tests use to
//! act like the engine: constructing classes, dispatching virtuals, sending
//! notifications and inspecting what the runtime registered.

use std::ffi::c_void;
use std::sync::atomic::Ordering;

use gdbridge_sys::{
    ClassCreationInfo, ClassInstancePtr, ClassLibraryPtr, ClassMethodCallFn, ClassMethodInfo,
    ClassMethodPtrCallFn, ConstStringNamePtr, ConstTypePtr, FALSE, Int, ObjectPtr, PropertyInfo, TRUE,
    TypePtr, VariantType,
};

use crate::diagnostics;
use crate::heap;
use crate::objects::{self, Hooks, LineBatch, with_state};

/// Entry points of one registered host method.
#[derive(Debug, Clone, Copy)]
pub(crate) struct HostMethod {
    pub(crate) userdata: *mut c_void,
    pub(crate) call: Option<ClassMethodCallFn>,
    pub(crate) ptrcall: Option<ClassMethodPtrCallFn>,
}

pub(crate) struct ExtensionMethod {
    pub(crate) name: String,
    pub(crate) entry: HostMethod,
    snapshot: MethodSnapshot,
}

pub(crate) struct ExtensionProperty {
    pub(crate) info: PropertySnapshot,
    pub(crate) setter: String,
    pub(crate) getter: String,
}

pub(crate) struct ExtensionClass {
    pub(crate) name: &'static str,
    pub(crate) parent: String,
    pub(crate) library: usize,
    pub(crate) info: ClassCreationInfo,
    pub(crate) methods: Vec<ExtensionMethod>,
    pub(crate) properties: Vec<ExtensionProperty>,
    signals: Vec<SignalSnapshot>,
}

/// Copy of a [`PropertyInfo`] the engine keeps after registration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PropertySnapshot {
    pub ty: VariantType,
    pub name: String,
    pub class_name: String,
    pub hint: u32,
    pub hint_string: String,
    pub usage: u32,
}

impl PropertySnapshot {
    unsafe fn read(info: *const PropertyInfo) -> Option<Self> {
        let info = unsafe { info.as_ref() }?;
        Some(Self {
            ty: VariantType::from_raw(info.ty).unwrap_or_default(),
            name: unsafe { heap::text(info.name) },
            class_name: unsafe { heap::text(info.class_name) },
            hint: info.hint,
            hint_string: unsafe { heap::text(info.hint_string) },
            usage: info.usage,
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MethodSnapshot {
    pub name: String,
    pub flags: u32,
    pub arguments: Vec<PropertySnapshot>,
    pub argument_metadata: Vec<u32>,
    pub return_value: Option<PropertySnapshot>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SignalSnapshot {
    pub name: String,
    pub arguments: Vec<PropertySnapshot>,
}

/// What the engine knows about one registered extension class.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClassSnapshot {
    pub name: String,
    pub parent: String,
    pub is_abstract: bool,
    pub is_exposed: bool,
    pub ref_counted_hooks: bool,
    pub methods: Vec<MethodSnapshot>,
    pub properties: Vec<(PropertySnapshot, String, String)>,
    pub signals: Vec<SignalSnapshot>,
}

impl ClassSnapshot {
    pub fn method(&self, name: &str) -> Option<&MethodSnapshot> {
        self.methods.iter().find(|method| method.name == name)
    }
}

impl From<&ExtensionClass> for ClassSnapshot {
    fn from(class: &ExtensionClass) -> Self {
        Self {
            name: class.name.to_string(),
            parent: class.parent.clone(),
            is_abstract: class.info.is_abstract != FALSE,
            is_exposed: class.info.is_exposed != FALSE,
            ref_counted_hooks: class.info.reference_func.is_some() && class.info.unreference_func.is_some(),
            methods: class.methods.iter().map(|method| method.snapshot.clone()).collect(),
            properties: class
                .properties
                .iter()
                .map(|property| (property.info.clone(), property.setter.clone(), property.getter.clone()))
                .collect(),
            signals: class.signals.clone(),
        }
    }
}

unsafe fn read_list(info: *const PropertyInfo, count: usize) -> Vec<PropertySnapshot> {
    if info.is_null() {
        return Vec::new();
    }
    (0..count)
        .filter_map(|index| unsafe { PropertySnapshot::read(info.add(index)) })
        .collect()
}

/// Runs `f` on the class `name` registered by `library`, reporting an engine
/// error when there is none.
fn with_own_class(library: ClassLibraryPtr, name: &str, what: &str, f: impl FnOnce(&mut ExtensionClass)) {
    let found = with_state(|state| {
        let class = state
            .classes
            .iter_mut()
            .find(|class| class.name == name && class.library == library.addr())?;
        f(class);
        Some(())
    });
    if found.is_none() {
        diagnostics::report(format!("cannot register {what} on unknown class `{name}`"));
    }
}

// ============================================================================
// Registration entry points
// ============================================================================

pub(crate) unsafe extern "C" fn classdb_register_extension_class(
    library: ClassLibraryPtr,
    class_name: ConstStringNamePtr,
    parent_class_name: ConstStringNamePtr,
    info: *const ClassCreationInfo,
) {
    let (name, parent) = unsafe { (heap::text(class_name), heap::text(parent_class_name)) };
    let Some(info) = (unsafe { info.as_ref() }).copied() else {
        diagnostics::report(format!("class `{name}` registered without creation info"));
        return;
    };
    let outcome = with_state(|state| {
        if state.extension(&name).is_some() || objects::native_class(&name).is_some() {
            return Err(format!("class `{name}` is already registered"));
        }
        if state.extension(&parent).is_none() && objects::native_class(&parent).is_none() {
            return Err(format!("parent `{parent}` of class `{name}` is not registered"));
        }
        state.classes.push(ExtensionClass {
            name: String::leak(name.clone()),
            parent: parent.clone(),
            library: library.addr(),
            info,
            methods: Vec::new(),
            properties: Vec::new(),
            signals: Vec::new(),
        });
        Ok(())
    });
    match outcome {
        Ok(()) => tracing::debug!(target: "gdbridge_mock", class = %name, %parent, "extension class registered"),
        Err(message) => diagnostics::report(message),
    }
}

pub(crate) unsafe extern "C" fn classdb_register_extension_class_method(
    library: ClassLibraryPtr,
    class_name: ConstStringNamePtr,
    info: *const ClassMethodInfo,
) {
    let class = unsafe { heap::text(class_name) };
    let Some(info) = (unsafe { info.as_ref() }) else {
        diagnostics::report(format!("method on `{class}` registered without info"));
        return;
    };
    let name = unsafe { heap::text(info.name) };
    let count = info.argument_count as usize;
    let argument_metadata = if info.arguments_metadata.is_null() {
        vec![0; count]
    } else {
        unsafe { std::slice::from_raw_parts(info.arguments_metadata, count) }.to_vec()
    };
    let snapshot = MethodSnapshot {
        name: name.clone(),
        flags: info.method_flags,
        arguments: unsafe { read_list(info.arguments_info, count) },
        argument_metadata,
        return_value: if info.has_return_value == TRUE {
            unsafe { PropertySnapshot::read(info.return_value_info) }
        } else {
            None
        },
    };
    let entry = HostMethod {
        userdata: info.method_userdata,
        call: info.call_func,
        ptrcall: info.ptrcall_func,
    };
    let mut duplicate = false;
    with_own_class(library, &class, "a method", |extension| {
        if extension.methods.iter().any(|method| method.name == name) {
            duplicate = true;
            return;
        }
        extension.methods.push(ExtensionMethod {
            name: name.clone(),
            entry,
            snapshot,
        });
    });
    if duplicate {
        diagnostics::report(format!("method `{class}::{name}` is already registered"));
    }
}

pub(crate) unsafe extern "C" fn classdb_register_extension_class_property(
    library: ClassLibraryPtr,
    class_name: ConstStringNamePtr,
    info: *const PropertyInfo,
    setter: ConstStringNamePtr,
    getter: ConstStringNamePtr,
) {
    let class = unsafe { heap::text(class_name) };
    let Some(info) = (unsafe { PropertySnapshot::read(info) }) else {
        diagnostics::report(format!("property on `{class}` registered without info"));
        return;
    };
    let (setter, getter) = unsafe { (heap::text(setter), heap::text(getter)) };
    let mut missing = Vec::new();
    with_own_class(library, &class, "a property", |extension| {
        for accessor in [&setter, &getter] {
            if !accessor.is_empty() && !extension.methods.iter().any(|method| method.name == *accessor) {
                missing.push(accessor.clone());
            }
        }
        extension.properties.push(ExtensionProperty {
            info: info.clone(),
            setter: setter.clone(),
            getter: getter.clone(),
        });
    });
    for accessor in missing {
        diagnostics::report(format!("property `{class}.{}` names unknown accessor `{accessor}`", info.name));
    }
}

pub(crate) unsafe extern "C" fn classdb_register_extension_class_signal(
    library: ClassLibraryPtr,
    class_name: ConstStringNamePtr,
    signal_name: ConstStringNamePtr,
    arguments: *const PropertyInfo,
    argument_count: Int,
) {
    let (class, name) = unsafe { (heap::text(class_name), heap::text(signal_name)) };
    let count = usize::try_from(argument_count).unwrap_or(0);
    let arguments = unsafe { read_list(arguments, count) };
    with_own_class(library, &class, "a signal", |extension| {
        extension.signals.push(SignalSnapshot { name, arguments });
    });
}

pub(crate) unsafe extern "C" fn classdb_unregister_extension_class(
    library: ClassLibraryPtr,
    class_name: ConstStringNamePtr,
) {
    let name = unsafe { heap::text(class_name) };
    let outcome = with_state(|state| {
        if state.classes.iter().any(|class| class.parent == name) {
            return Err(format!("class `{name}` still has registered subclasses"));
        }
        let position = state
            .classes
            .iter()
            .position(|class| class.name == name && class.library == library.addr())
            .ok_or_else(|| format!("class `{name}` is not registered"))?;
        state.classes.remove(position);
        state.forget_binds(&name);
        Ok(())
    });
    match outcome {
        Ok(()) => tracing::debug!(target: "gdbridge_mock", class = %name, "extension class unregistered"),
        Err(message) => diagnostics::report(message),
    }
}

// ============================================================================
// Engine-side driving API
// ============================================================================

/// What the engine recorded for a registered extension class.
pub fn extension_class(name: &str) -> Option<ClassSnapshot> {
    with_state(|state| state.extension(name).map(ClassSnapshot::from))
}

/// Names of the registered extension classes, in registration order.
pub fn extension_classes() -> Vec<String> {
    with_state(|state| state.classes.iter().map(|class| class.name.to_string()).collect())
}

/// Instantiates `class` the way a scene would: native classes directly,
/// extension classes through their `create_instance` callback.
pub fn construct(class: &str) -> Option<ObjectPtr> {
    let object = objects::construct(class);
    (!object.is_null()).then_some(object)
}

/// Frees `object` as the engine would, including its node children.
pub fn destroy(object: ObjectPtr) {
    objects::destroy(object)
}

pub fn is_alive(object: ObjectPtr) -> bool {
    objects::is_live(object)
}

/// Most derived class name of a live object.
pub fn object_class(object: ObjectPtr) -> Option<String> {
    let id = objects::live_id(object)?;
    with_state(|state| state.class_name(id))
}

/// Host instance attached to `object`, if any.
pub fn instance_of(object: ObjectPtr) -> Option<ClassInstancePtr> {
    let id = objects::live_id(object)?;
    with_state(|state| state.object(id)?.binding.map(|binding| binding.instance))
}

pub fn reference_count(object: ObjectPtr) -> Option<i64> {
    let id = objects::live_id(object)?;
    with_state(|state| state.object(id)?.refcount)
}

pub fn notifications(object: ObjectPtr) -> Vec<i32> {
    objects::live_id(object)
        .and_then(|id| with_state(|state| Some(state.object(id)?.notifications.clone())))
        .unwrap_or_default()
}

pub fn emitted_signals(object: ObjectPtr) -> Vec<String> {
    objects::live_id(object)
        .and_then(|id| with_state(|state| Some(state.object(id)?.signals.clone())))
        .unwrap_or_default()
}

/// Line batches an `EditorNode3DGizmo` received since its last `clear`.
pub fn gizmo_lines(object: ObjectPtr) -> Vec<LineBatch> {
    objects::live_id(object)
        .and_then(|id| with_state(|state| Some(state.object(id)?.lines.clone())))
        .unwrap_or_default()
}

/// Sends notification `what` the way the engine does: recorded on the
/// object, then forwarded to the host's notification hook.
pub fn notify(object: ObjectPtr, what: i32) -> bool {
    let Some(id) = objects::live_id(object) else {
        return false;
    };
    let hooks = with_state(|state| {
        if let Some(object) = state.object_mut(id) {
            object.notifications.push(what);
        }
        state.hooks(id)
    });
    if let Some(Hooks { info, instance }) = hooks
        && let Some(notify) = info.notification_func
    {
        unsafe { notify(instance, what, FALSE) };
    }
    true
}

/// Dispatches the virtual `name` on `object` through the class's
/// `get_virtual` callback. Returns `false` when the object is gone or the
/// class does not override `name`.
///
/// # Safety
///
/// `args` and `ret` must match the virtual's pointer-call signature.
pub unsafe fn call_virtual(object: ObjectPtr, name: &str, args: &[ConstTypePtr], ret: TypePtr) -> bool {
    let Some(id) = objects::live_id(object) else {
        return false;
    };
    let Some(Hooks { info, instance }) = with_state(|state| state.hooks(id)) else {
        return false;
    };
    let Some(get_virtual) = info.get_virtual_func else {
        return false;
    };

    let mut name_slot = [0u64; 1];
    unsafe { heap::write_text(name_slot.as_mut_ptr().cast(), name) };
    let function = unsafe { get_virtual(info.class_userdata, name_slot.as_ptr().cast()) };
    unsafe { heap::destroy(VariantType::StringName, name_slot.as_mut_ptr().cast()) };

    let Some(function) = function else {
        return false;
    };
    objects::VIRTUAL_CALLS.fetch_add(1, Ordering::AcqRel);
    unsafe { function(instance, args.as_ptr(), ret) };
    true
}

/// Asks an editor gizmo to rebuild its drawing, as the editor does after a
/// selection change.
pub fn request_redraw(gizmo: ObjectPtr) -> bool {
    unsafe { call_virtual(gizmo, "_redraw", &[], std::ptr::null_mut()) }
}

/// Advances the frame counter `RenderingServer::get_frame_count` reports.
pub fn advance_frames(frames: i64) {
    objects::FRAMES.fetch_add(frames, Ordering::AcqRel);
}

/// `true` when the class database reports `object` as an instance of `class`.
pub fn is_instance_of(object: ObjectPtr, class: &str) -> bool {
    objects::live_id(object).is_some_and(|id| with_state(|state| state.is_instance_of(id, class)))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn name_slot(text: &str) -> [u64; 1] {
        let mut slot = [0u64; 1];
        unsafe { heap::write_text(slot.as_mut_ptr().cast(), text) };
        slot
    }

    fn info() -> ClassCreationInfo {
        ClassCreationInfo {
            is_virtual: FALSE,
            is_abstract: FALSE,
            is_exposed: TRUE,
            set_func: None,
            get_func: None,
            notification_func: None,
            to_string_func: None,
            reference_func: None,
            unreference_func: None,
            create_instance_func: None,
            free_instance_func: None,
            get_virtual_func: None,
            class_userdata: std::ptr::null_mut(),
        }
    }

    fn register(name: &str, parent: &str) {
        let (name, parent) = (name_slot(name), name_slot(parent));
        let library = std::ptr::without_provenance_mut(0x10);
        unsafe {
            classdb_register_extension_class(library, name.as_ptr().cast(), parent.as_ptr().cast(), &info())
        };
    }

    #[test]
    fn registration_records_class_and_parent() {
        register("MockRegistered", "Node3D");
        let snapshot = extension_class("MockRegistered").unwrap();
        assert_eq!(snapshot.parent, "Node3D");
        assert!(snapshot.is_exposed);
        assert!(snapshot.methods.is_empty());
    }

    #[test]
    fn duplicate_and_orphan_classes_are_reported() {
        register("MockTwice", "Node");
        register("MockTwice", "Node");
        register("MockOrphan", "NoSuchParent");
        let errors = diagnostics::printed_errors();
        assert!(errors.iter().any(|error| error.contains("`MockTwice` is already registered")));
        assert!(errors.iter().any(|error| error.contains("parent `NoSuchParent`")));
        assert!(extension_class("MockOrphan").is_none());
    }

    #[test]
    fn unregistering_a_parent_with_subclasses_is_refused() {
        register("MockBase", "Node");
        register("MockDerived", "MockBase");
        let library = std::ptr::without_provenance_mut(0x10);
        let base = name_slot("MockBase");
        unsafe { classdb_unregister_extension_class(library, base.as_ptr().cast()) };
        assert!(extension_class("MockBase").is_some());

        let derived = name_slot("MockDerived");
        unsafe { classdb_unregister_extension_class(library, derived.as_ptr().cast()) };
        unsafe { classdb_unregister_extension_class(library, base.as_ptr().cast()) };
        assert!(extension_class("MockBase").is_none());
    }

    #[test]
    fn classes_without_create_callback_do_not_construct() {
        register("MockNoCreate", "Node");
        assert!(construct("MockNoCreate").is_none());
    }

    #[test]
    fn frame_counter_advances() {
        let before = objects::FRAMES.load(Ordering::Acquire);
        advance_frames(3);
        assert!(objects::FRAMES.load(Ordering::Acquire) >= before + 3);
    }
}
