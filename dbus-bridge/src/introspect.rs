//! Loads `org.freedesktop.DBus.Introspectable.Introspect` XML into
//! [`crate::interface::Interface`] trees.
//!
//! Grounded in `dbus-bridge-codegen`'s own introspection-XML walker
//! (`generate.rs`): a flat `for event in EventReader` loop over
//! `xml::reader::XmlEvent::{StartElement,EndElement}`, threading a
//! handful of "currently open" locals rather than building a tree of
//! borrowed nodes. This crate needs the richer result (interfaces with
//! resolved [`crate::arg::Argument`] shapes and the
//! `org.gnustep.objc.*`/`org.freedesktop.DBus.*` annotations attached),
//! where the codegen tool only needed strings to template Rust source.

use std::collections::HashMap;

use xml::attribute::OwnedAttribute;
use xml::reader::{EventReader, XmlEvent};

use crate::arg::Argument;
use crate::error::Error;
use crate::interface::{Interface, Property, PropertyAccess};
use crate::method::Method;

struct PendingMethod {
    name: String,
    in_args: Vec<Argument>,
    out_args: Vec<Argument>,
    annotations: HashMap<String, String>,
}

struct PendingProperty {
    name: String,
    type_sig: String,
    access: String,
    annotations: HashMap<String, String>,
}

/// Parses a complete introspection document (one `<node>`) into its
/// declared interfaces. Nested `<node>` child elements (sub-object
/// hints) are not followed — they name child paths, not this object's
/// own shape, and belong to whatever drives recursive introspection,
/// not to this parser.
pub fn load(xml: &str) -> Result<Vec<Interface>, Error> {
    let mut interfaces = Vec::new();
    let mut cur_interface: Option<(String, Vec<Method>, Vec<Method>, Vec<Property>, HashMap<String, String>)> = None;
    let mut cur_method: Option<PendingMethod> = None;
    let mut cur_signal: Option<PendingMethod> = None;
    let mut cur_property: Option<PendingProperty> = None;

    let parser = EventReader::new(xml.as_bytes());
    for event in parser {
        let event = event.map_err(|e| Error::malformed_signature("", format!("invalid introspection XML: {}", e)))?;
        match event {
            XmlEvent::StartElement { name, attributes, .. } => match name.local_name.as_str() {
                "interface" => {
                    let n = required_attr(&attributes, "interface", "name")?;
                    cur_interface = Some((n, Vec::new(), Vec::new(), Vec::new(), HashMap::new()));
                }
                "method" => {
                    let n = required_attr(&attributes, "method", "name")?;
                    cur_method = Some(PendingMethod { name: n, in_args: Vec::new(), out_args: Vec::new(), annotations: HashMap::new() });
                }
                "signal" => {
                    let n = required_attr(&attributes, "signal", "name")?;
                    cur_signal = Some(PendingMethod { name: n, in_args: Vec::new(), out_args: Vec::new(), annotations: HashMap::new() });
                }
                "property" => {
                    let n = required_attr(&attributes, "property", "name")?;
                    let t = required_attr(&attributes, "property", "type")?;
                    let access = attr(&attributes, "access").unwrap_or_else(|| "read".to_string());
                    cur_property = Some(PendingProperty { name: n, type_sig: t, access, annotations: HashMap::new() });
                }
                "arg" => {
                    let t = required_attr(&attributes, "arg", "type")?;
                    let mut argument = Argument::from_signature_str(&t)?;
                    if let Some(n) = attr(&attributes, "name") {
                        argument = argument.with_name(n);
                    }
                    if let Some(sig) = &mut cur_signal {
                        sig.out_args.push(argument);
                    } else if let Some(m) = &mut cur_method {
                        if attr(&attributes, "direction").as_deref() == Some("out") {
                            m.out_args.push(argument);
                        } else {
                            m.in_args.push(argument);
                        }
                    } else {
                        return Err(Error::malformed_signature(&t, "<arg> outside <method> or <signal>"));
                    }
                }
                "annotation" => {
                    let n = required_attr(&attributes, "annotation", "name")?;
                    let v = attr(&attributes, "value").unwrap_or_default();
                    if let Some(m) = &mut cur_method { m.annotations.insert(n, v); }
                    else if let Some(s) = &mut cur_signal { s.annotations.insert(n, v); }
                    else if let Some(p) = &mut cur_property { p.annotations.insert(n, v); }
                    else if let Some((_, _, _, _, annotations)) = &mut cur_interface { annotations.insert(n, v); }
                }
                _ => {}
            },
            XmlEvent::EndElement { name } => match name.local_name.as_str() {
                "method" => {
                    if let (Some(m), Some((_, methods, ..))) = (cur_method.take(), &mut cur_interface) {
                        let built = Method::new(m.name, m.in_args, m.out_args).with_annotations(m.annotations);
                        methods.push(Interface::install_method(built));
                    }
                }
                "signal" => {
                    if let (Some(s), Some((_, _, signals, ..))) = (cur_signal.take(), &mut cur_interface) {
                        signals.push(Method::new(s.name, Vec::new(), s.out_args).with_annotations(s.annotations));
                    }
                }
                "property" => {
                    if let (Some(p), Some((_, _, _, properties, _))) = (cur_property.take(), &mut cur_interface) {
                        let kind = Argument::from_signature_str(&p.type_sig)?;
                        let access = match p.access.as_str() {
                            "read" => PropertyAccess::Read,
                            "write" => PropertyAccess::Write,
                            "readwrite" => PropertyAccess::ReadWrite,
                            other => return Err(Error::malformed_signature(other, "invalid property access, expected read/write/readwrite")),
                        };
                        properties.push(Property { name: p.name, kind, access, annotations: p.annotations });
                    }
                }
                "interface" => {
                    if let Some((name, methods, signals, properties, annotations)) = cur_interface.take() {
                        let iface = Interface { name, methods, signals, properties, annotations }.install_properties();
                        interfaces.push(iface);
                    }
                }
                _ => {}
            },
            _ => {}
        }
    }
    if cur_interface.is_some() {
        return Err(Error::malformed_signature("", "unterminated <interface> element"));
    }
    Ok(interfaces)
}

fn attr(attrs: &[OwnedAttribute], key: &str) -> Option<String> {
    attrs.iter().find(|a| a.name.local_name == key).map(|a| a.value.clone())
}

fn required_attr(attrs: &[OwnedAttribute], elem: &str, key: &str) -> Result<String, Error> {
    attr(attrs, key).ok_or_else(|| Error::malformed_signature("", format!("<{}> missing required '{}' attribute", elem, key)))
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = r#"
        <node>
          <interface name="org.example.Lamp">
            <method name="SetBrightness">
              <arg name="level" type="i" direction="in"/>
              <annotation name="org.gnustep.objc.selector" value="setBrightnessLevel:"/>
            </method>
            <method name="GetBrightness">
              <arg name="level" type="i" direction="out"/>
            </method>
            <signal name="BrightnessChanged">
              <arg name="level" type="i"/>
            </signal>
            <property name="On" type="b" access="readwrite"/>
            <annotation name="org.freedesktop.DBus.Deprecated" value="false"/>
          </interface>
        </node>
    "#;

    #[test]
    fn parses_methods_signals_and_properties() {
        let ifaces = load(SAMPLE).unwrap();
        assert_eq!(ifaces.len(), 1);
        let lamp = &ifaces[0];
        assert_eq!(lamp.name, "org.example.Lamp");
        assert_eq!(lamp.methods.len(), 2);
        assert_eq!(lamp.signals.len(), 1);
        assert_eq!(lamp.properties.len(), 1);
        assert_eq!(lamp.annotations.get("org.freedesktop.DBus.Deprecated").map(String::as_str), Some("false"));
    }

    #[test]
    fn explicit_selector_annotation_is_preserved() {
        let ifaces = load(SAMPLE).unwrap();
        let set_brightness = ifaces[0].method("SetBrightness").unwrap();
        assert_eq!(set_brightness.host_selector(), Some("setBrightnessLevel:"));
    }

    #[test]
    fn derives_selector_when_not_annotated() {
        let ifaces = load(SAMPLE).unwrap();
        let get_brightness = ifaces[0].method("GetBrightness").unwrap();
        assert_eq!(get_brightness.host_selector(), Some("getBrightness"));
    }

    #[test]
    fn property_access_is_parsed() {
        let ifaces = load(SAMPLE).unwrap();
        let on = ifaces[0].property("On").unwrap();
        assert_eq!(on.access, PropertyAccess::ReadWrite);
        assert_eq!(on.kind.signature(), "b");
    }

    #[test]
    fn readwrite_property_gets_synthesized_getter_and_setter_methods() {
        let ifaces = load(SAMPLE).unwrap();
        let lamp = &ifaces[0];
        assert!(lamp.method("GetOn").unwrap().property_forward().is_some());
        assert!(lamp.method("SetOn").unwrap().property_forward().is_some());
    }

    #[test]
    fn rejects_unterminated_interface() {
        assert!(load("<node><interface name=\"org.example.Foo\">").is_err());
    }
}
