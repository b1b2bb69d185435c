//! Classes and functions the engine documents as callable off the main thread.
//!
//! The engine exposes no per-method thread-safety metadata, so this list is
//! curated by hand. A method spec matching an entry gets
//! [`MethodFlags::THREAD_SAFE`](crate::method_bind::MethodFlags::THREAD_SAFE)
//! when its table is resolved.

/// Every method of these classes is safe from any thread.
const THREAD_SAFE_CLASSES: &[&str] = &[
    "RenderingServer",
    "PhysicsServer2D",
    "PhysicsServer3D",
    "NavigationServer2D",
    "NavigationServer3D",
    "TextServerManager",
];

/// Individual methods of otherwise main-thread classes.
const THREAD_SAFE_METHODS: &[(&str, &str)] = &[
    // The reference count is atomic.
    ("RefCounted", "init_ref"),
    ("RefCounted", "reference"),
    ("RefCounted", "unreference"),
    ("RefCounted", "get_reference_count"),
    ("ResourceLoader", "load_threaded_request"),
    ("ResourceLoader", "load_threaded_get_status"),
];

const THREAD_SAFE_UTILITIES: &[&str] = &["print", "push_error", "push_warning"];

pub fn is_thread_safe_method(class: &str, method: &str) -> bool {
    THREAD_SAFE_CLASSES.contains(&class)
        || THREAD_SAFE_METHODS
            .iter()
            .any(|&(c, m)| c == class && m == method)
}

pub fn is_thread_safe_utility(name: &str) -> bool {
    THREAD_SAFE_UTILITIES.contains(&name)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn servers_are_thread_safe() {
        assert!(is_thread_safe_method("RenderingServer", "canvas_item_create"));
        assert!(is_thread_safe_method("PhysicsServer3D", "body_create"));
    }

    #[test]
    fn scene_classes_are_not() {
        assert!(!is_thread_safe_method("Node", "add_child"));
        assert!(!is_thread_safe_method("ResourceLoader", "load"));
        assert!(is_thread_safe_method("ResourceLoader", "load_threaded_request"));
        assert!(is_thread_safe_method("RefCounted", "unreference"));
        assert!(!is_thread_safe_method("Resource", "duplicate"));
    }

    #[test]
    fn print_utilities() {
        assert!(is_thread_safe_utility("push_warning"));
        assert!(!is_thread_safe_utility("lerpf"));
    }
}
