//! Local object export: the registry a process consults when it
//! receives a method call addressed to one of its own objects, and the
//! auto-export path minting used when a host value needs to cross the
//! wire as an object-path argument without having been explicitly
//! exported.
//!
//! This only needs the routing bookkeeping half of a dynamic-registry
//! object-tree design — there is no object tree of its own to walk here,
//! since what ultimately runs a dispatched call is the host object
//! system, reached only through the `org.gnustep.objc.selector` a
//! [`crate::method::Method`] carries.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;

use crate::error::Error;
use crate::interface::Interface;
use crate::strings::Path;

/// A single locally exported object: its declared interfaces, keyed by
/// interface name for dispatch.
#[derive(Debug, Clone, Default)]
pub struct ExportedObject {
    pub path: String,
    pub interfaces: HashMap<String, Interface>,
}

/// The result of resolving an incoming method call to a declared method
/// and its host dispatch selector. Actually invoking the host object is
/// out of scope here — that's the host binding's job, reached through
/// [`crate::method::Method::host_selector`].
#[derive(Debug, Clone)]
pub struct DispatchTarget {
    pub interface_name: String,
    pub selector: String,
    pub method: crate::method::Method,
}

/// Tracks every object this process has exported, under one root path
/// prefix used for auto-minted paths.
pub struct ExportRegistry {
    root: String,
    next_id: AtomicU64,
    objects: Mutex<HashMap<String, ExportedObject>>,
}

impl ExportRegistry {
    pub fn new(root: impl Into<String>) -> Self {
        ExportRegistry { root: root.into(), next_id: AtomicU64::new(1), objects: Mutex::new(HashMap::new()) }
    }

    /// Exports interfaces at an explicit, caller-chosen path. Fails if the
    /// path is not a valid object path, or if something is already
    /// exported there.
    pub fn export_at(&self, path: impl Into<String>, interfaces: Vec<Interface>) -> Result<(), Error> {
        let path = path.into();
        Path::new(path.clone()).map_err(|e| Error::type_mismatch(e.to_string()))?;
        let mut objects = self.objects.lock().unwrap();
        if objects.contains_key(&path) {
            return Err(Error::type_mismatch(format!("an object is already exported at {}", path)));
        }
        let by_name = interfaces.into_iter().map(|i| (i.name.clone(), i)).collect();
        objects.insert(path.clone(), ExportedObject { path, interfaces: by_name });
        Ok(())
    }

    /// Mints a fresh path under this registry's root (`/<root>/auto/<id>`)
    /// and exports `interfaces` there, returning the new path.
    pub fn auto_export(&self, interfaces: Vec<Interface>) -> String {
        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        let path = format!("{}/auto/{}", self.root.trim_end_matches('/'), id);
        // The path is built from validated components, so this can only
        // fail if `root` itself wasn't a valid object path; that's a
        // caller bug caught at registry construction time in practice.
        self.export_at(path.clone(), interfaces).expect("auto-minted export path must be valid");
        path
    }

    pub fn unexport(&self, path: &str) -> bool {
        self.objects.lock().unwrap().remove(path).is_some()
    }

    pub fn is_exported(&self, path: &str) -> bool {
        self.objects.lock().unwrap().contains_key(path)
    }

    /// Resolves an incoming call's (path, interface, member) triple to
    /// the method that should handle it and its host dispatch selector.
    pub fn resolve(&self, path: &str, interface_name: &str, member: &str) -> Result<DispatchTarget, Error> {
        let objects = self.objects.lock().unwrap();
        let object = objects.get(path).ok_or_else(|| {
            Error::type_mismatch(format!("no object exported at {}", path))
        })?;
        let interface = object.interfaces.get(interface_name).ok_or_else(|| {
            Error::type_mismatch(format!("{} does not implement {}", path, interface_name))
        })?;
        let method = interface.method(member).ok_or_else(|| {
            Error::type_mismatch(format!("{} has no method {}", interface_name, member))
        })?;
        let selector = method.host_selector().ok_or_else(|| {
            Error::unsupported_value(format!("method {} has no resolvable host selector", member))
        })?;
        Ok(DispatchTarget { interface_name: interface_name.to_string(), selector: selector.to_string(), method: method.clone() })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::method::Method;

    fn ping_interface() -> Interface {
        Interface::new("org.example.Pingable")
            .add_method(Method::new("Ping", Vec::new(), Vec::new()))
            .install_methods()
    }

    #[test]
    fn explicit_export_then_resolve() {
        let reg = ExportRegistry::new("/org/example/App");
        reg.export_at("/org/example/App/obj0", vec![ping_interface()]).unwrap();
        let target = reg.resolve("/org/example/App/obj0", "org.example.Pingable", "Ping").unwrap();
        assert_eq!(target.selector, "ping");
    }

    #[test]
    fn duplicate_export_path_is_rejected() {
        let reg = ExportRegistry::new("/org/example/App");
        reg.export_at("/org/example/App/obj0", vec![ping_interface()]).unwrap();
        assert!(reg.export_at("/org/example/App/obj0", vec![ping_interface()]).is_err());
    }

    #[test]
    fn auto_export_mints_monotonic_paths_under_root() {
        let reg = ExportRegistry::new("/org/example/App");
        let p1 = reg.auto_export(vec![ping_interface()]);
        let p2 = reg.auto_export(vec![ping_interface()]);
        assert_eq!(p1, "/org/example/App/auto/1");
        assert_eq!(p2, "/org/example/App/auto/2");
        assert!(reg.is_exported(&p1));
    }

    #[test]
    fn unexport_removes_object() {
        let reg = ExportRegistry::new("/org/example/App");
        let p = reg.auto_export(vec![ping_interface()]);
        assert!(reg.unexport(&p));
        assert!(!reg.is_exported(&p));
    }

    #[test]
    fn resolve_unknown_path_fails() {
        let reg = ExportRegistry::new("/org/example/App");
        assert!(reg.resolve("/nope", "org.example.Pingable", "Ping").is_err());
    }
}
