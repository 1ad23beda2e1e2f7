//! C4 Interface: a named bundle of methods, signals, and properties, plus
//! the canonical selector derivation that lets a D-Bus member name stand
//! in for a host dispatch selector.

use std::collections::HashMap;

use crate::arg::Argument;
use crate::error::Error;
use crate::method::Method;
use crate::typebridge::HostParamKind;

/// `org.freedesktop.DBus.Properties` access mode for a declared property.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PropertyAccess { Read, Write, ReadWrite }

/// Annotation key on a synthesized getter/setter [`Method`], carrying the
/// property name it forwards (e.g. `"Brightness"`). Its presence is how a
/// dispatcher recognizes the method as a `Properties.Get`/`Properties.Set`
/// forward rather than an ordinary member to send as-is; see
/// [`Method::property_forward`].
pub const PROPERTY_FORWARD_NAME: &str = "org.gnustep.dbusbridge.property.name";

/// Companion to [`PROPERTY_FORWARD_NAME`]: which `Properties` member
/// (`"Get"` or `"Set"`) the forward should issue.
pub const PROPERTY_FORWARD_MEMBER: &str = "org.gnustep.dbusbridge.property.member";

fn property_getter(prop: &Property) -> Method {
    let selector = lower_first(&prop.name);
    let mut annotations = HashMap::new();
    annotations.insert("org.gnustep.objc.selector".to_string(), selector);
    annotations.insert(PROPERTY_FORWARD_NAME.to_string(), prop.name.clone());
    annotations.insert(PROPERTY_FORWARD_MEMBER.to_string(), "Get".to_string());
    Method::new(format!("Get{}", prop.name), Vec::new(), vec![prop.kind.clone()]).with_annotations(annotations)
}

fn property_setter(prop: &Property) -> Method {
    let selector = canonical_selector(&format!("Set{}", prop.name), std::slice::from_ref(&prop.name));
    let mut annotations = HashMap::new();
    annotations.insert("org.gnustep.objc.selector".to_string(), selector);
    annotations.insert(PROPERTY_FORWARD_NAME.to_string(), prop.name.clone());
    annotations.insert(PROPERTY_FORWARD_MEMBER.to_string(), "Set".to_string());
    Method::new(format!("Set{}", prop.name), vec![prop.kind.clone()], Vec::new()).with_annotations(annotations)
}

#[derive(Debug, Clone)]
pub struct Property {
    pub name: String,
    pub kind: Argument,
    pub access: PropertyAccess,
    pub annotations: HashMap<String, String>,
}

/// One D-Bus interface: its methods, signals, and properties.
#[derive(Debug, Clone, Default)]
pub struct Interface {
    pub name: String,
    pub methods: Vec<Method>,
    pub signals: Vec<Method>,
    pub properties: Vec<Property>,
    pub annotations: HashMap<String, String>,
}

/// A host class's self-description, used by [`Interface::build_from_host_class`]
/// to reflect a D-Bus interface off of an existing host type rather than
/// requiring it to be hand-declared.
pub trait HostClass {
    /// The host's name for itself (e.g. an Objective-C class name), used
    /// only diagnostically — it does not appear in the produced interface.
    fn host_name(&self) -> &str;
    /// `(method name, parameter kinds, return kind)` for every method this
    /// class wants exposed.
    fn reflected_methods(&self) -> Vec<(String, Vec<HostParamKind>, Option<HostParamKind>)>;
}

impl Interface {
    pub fn new(name: impl Into<String>) -> Self {
        Interface { name: name.into(), ..Default::default() }
    }

    pub fn add_method(mut self, method: Method) -> Self { self.methods.push(method); self }
    pub fn add_signal(mut self, signal: Method) -> Self { self.signals.push(signal); self }
    pub fn add_property(mut self, property: Property) -> Self { self.properties.push(property); self }

    /// Binds every declared method's `org.gnustep.objc.selector`
    /// annotation to the canonical selector derived from its own name and
    /// argument names, unless the annotation was already set explicitly.
    pub fn install_method(mut method: Method) -> Method {
        if !method.annotations.contains_key("org.gnustep.objc.selector") {
            let arg_names: Vec<String> = method.in_args.iter()
                .map(|a| a.name.clone().unwrap_or_default())
                .collect();
            let selector = canonical_selector(&method.name, &arg_names);
            method.annotations.insert("org.gnustep.objc.selector".to_string(), selector);
        }
        method
    }

    /// Applies [`Self::install_method`] to every method on this interface.
    pub fn install_methods(mut self) -> Self {
        self.methods = self.methods.into_iter().map(Interface::install_method).collect();
        self
    }

    /// Derives accessor selectors for every declared property lacking an
    /// explicit annotation, and synthesizes the getter/setter [`Method`]s
    /// that forward those accessors to `org.freedesktop.DBus.Properties`
    /// (spec §4.4). A read/readwrite property gets a bare-name getter
    /// (`"brightness"`); a write/readwrite property gets a `set<Name>:`
    /// setter. The synthesized methods are pushed onto [`Self::methods`]
    /// so [`crate::proxy::Proxy::dispatch_selector`] finds them exactly
    /// like any hand-declared method; [`Self::property_forward`] is how a
    /// caller recognizes and unpacks one.
    pub fn install_properties(mut self) -> Self {
        let mut synthesized = Vec::new();
        for prop in &mut self.properties {
            if !prop.annotations.contains_key("org.gnustep.objc.selector") {
                prop.annotations.insert("org.gnustep.objc.selector".to_string(), lower_first(&prop.name));
            }
            if matches!(prop.access, PropertyAccess::Read | PropertyAccess::ReadWrite) {
                synthesized.push(property_getter(prop));
            }
            if matches!(prop.access, PropertyAccess::Write | PropertyAccess::ReadWrite) {
                synthesized.push(property_setter(prop));
            }
        }
        self.methods.extend(synthesized);
        self
    }

    /// Builds an interface by reflecting over a host class.
    /// Methods whose reflected parameter or return kind has no D-Bus
    /// representation are rejected rather than silently dropped.
    pub fn build_from_host_class(name: impl Into<String>, class: &dyn HostClass) -> Result<Interface, Error> {
        let mut iface = Interface::new(name);
        for (method_name, params, ret) in class.reflected_methods() {
            let in_args: Vec<Argument> = params.into_iter().map(Argument::from_host_param).collect::<Result<_, _>>()?;
            let out_args = match ret {
                Some(kind) => vec![Argument::from_host_param(kind)?],
                None => Vec::new(),
            };
            let mut method = Method::new(method_name, in_args, out_args);
            method = Interface::install_method(method);
            iface.methods.push(method);
        }
        Ok(iface)
    }

    pub fn method(&self, name: &str) -> Option<&Method> {
        self.methods.iter().find(|m| m.name == name)
    }

    pub fn property(&self, name: &str) -> Option<&Property> {
        self.properties.iter().find(|p| p.name == name)
    }
}

/// Lowercases the first character of `s` if and only if it's an ASCII
/// letter; any other character (digit, underscore, already-lowercase) is
/// left exactly as written. Canonicalization never uppercases, and never
/// touches a non-letter in first position.
fn lower_first(s: &str) -> String {
    let mut chars = s.chars();
    match chars.next() {
        Some(c) if c.is_ascii_uppercase() => format!("{}{}", c.to_ascii_lowercase(), chars.as_str()),
        Some(_) => s.to_string(),
        None => String::new(),
    }
}

/// Derives the canonical host dispatch selector for a method name and its
/// argument names: the method name with its first letter lowercased,
/// followed by a single trailing colon if the method takes any arguments
/// at all. The D-Bus member name already carries the argument keywords
/// (e.g. `SetFooWithBar`), so the selector does not repeat them per
/// argument — matching spec.md §8 S6, where `SetFooWithBar(foo: s, bar: i)`
/// derives `setFooWithBar:`, not `setFooWithBar:bar:`.
pub fn canonical_selector(method_name: &str, arg_names: &[String]) -> String {
    let head = lower_first(method_name);
    if arg_names.is_empty() {
        head
    } else {
        format!("{}:", head)
    }
}
