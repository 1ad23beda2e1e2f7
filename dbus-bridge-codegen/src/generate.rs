use std::fmt::Write as _;

use dbus_bridge::interface::{Interface, PropertyAccess};
use dbus_bridge::introspect;
use dbus_bridge::Error;

fn interface_is_selected(name: &str, filter: Option<&[String]>) -> bool {
    match filter {
        None => true,
        Some(names) => names.iter().any(|f| name == f || name.contains(f.as_str())),
    }
}

fn render_property(out: &mut String, iface: &Interface, prop_name: &str) {
    let prop = iface.property(prop_name).expect("just iterated this interface's own properties");
    let access = match prop.access {
        PropertyAccess::Read => "read-only",
        PropertyAccess::Write => "write-only",
        PropertyAccess::ReadWrite => "read-write",
    };
    let _ = writeln!(out, "    // property {}: {} ({})", prop.name, prop.kind.signature(), access);
}

/// Renders one interface's methods and signals as host-declaration
/// comments (see [`dbus_bridge::method::Method::host_declaration`]),
/// plus a comment line per property. This is deliberately not a
/// trait definition: the host object system this crate bridges to has
/// no static trait to generate against, so the output documents the
/// shape a hand-written or further-generated facade should take.
fn render_interface(iface: &Interface) -> String {
    let mut out = String::new();
    let _ = writeln!(out, "// interface {}", iface.name);
    // Synthesized property getters/setters (`Interface::install_properties`)
    // are skipped here: `render_property` already documents the property
    // they forward to, and showing both would describe the same member twice.
    for method in iface.methods.iter().filter(|m| m.property_forward().is_none()) {
        let _ = writeln!(out, "    {}", method.host_declaration());
    }
    for signal in &iface.signals {
        let _ = writeln!(out, "    // signal {}", signal.host_declaration());
    }
    for prop in iface.properties.iter().map(|p| p.name.as_str()) {
        render_property(&mut out, iface, prop);
    }
    out.push('\n');
    out
}

/// Parses an introspection XML document and renders every selected
/// interface's declaration, trimmed to the one output shape this
/// crate's host binding needs rather than a `GenOpts`-selected menu of
/// output flavors.
pub fn generate(xml: &str, interface_filter: Option<&[String]>) -> Result<String, Error> {
    let interfaces = introspect::load(xml)?;
    let mut out = String::new();
    for iface in interfaces.iter().filter(|i| interface_is_selected(&i.name, interface_filter)) {
        out.push_str(&render_interface(iface));
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = r#"
        <node>
          <interface name="org.example.Pingable">
            <method name="Ping">
              <arg name="count" type="i" direction="in"/>
              <arg name="reply" type="s" direction="out"/>
            </method>
            <property name="Ready" type="b" access="read"/>
          </interface>
        </node>
    "#;

    #[test]
    fn renders_method_and_property() {
        let rendered = generate(SAMPLE, None).unwrap();
        assert!(rendered.contains("org.example.Pingable"));
        assert!(rendered.contains("count:(i)"));
        assert!(rendered.contains("property Ready"));
    }

    #[test]
    fn filter_drops_unmatched_interfaces() {
        let rendered = generate(SAMPLE, Some(&["org.example.Other".to_string()])).unwrap();
        assert!(rendered.is_empty());
    }

    #[test]
    fn synthesized_property_forward_methods_are_not_rendered_twice() {
        // `Ready` is read-only, so `install_properties` synthesizes a bare
        // `GetReady` getter whose declaration would otherwise show up as a
        // stray "-> b" line alongside the "property Ready: b" comment.
        let rendered = generate(SAMPLE, None).unwrap();
        assert!(!rendered.contains("-> b"));
    }
}
