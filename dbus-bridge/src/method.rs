//! C3 Method: a single callable member of an [`crate::interface::Interface`],
//! pairing an argument list with return values and annotations.

use std::collections::HashMap;

use crate::arg::{Argument, Scope};
use crate::error::Error;
use crate::value::Value;
use crate::wire::{Reader, Writer};

/// One method, signal, or property accessor belonging to an interface.
/// Signals and properties are represented the same shape
/// as methods with an empty or single-element argument list respectively;
/// [`Interface`](crate::interface::Interface) is what tells them apart.
#[derive(Debug, Clone)]
pub struct Method {
    pub name: String,
    pub in_args: Vec<Argument>,
    pub out_args: Vec<Argument>,
    pub annotations: HashMap<String, String>,
}

impl Method {
    pub fn new(name: impl Into<String>, in_args: Vec<Argument>, out_args: Vec<Argument>) -> Self {
        Method { name: name.into(), in_args, out_args, annotations: HashMap::new() }
    }

    pub fn with_annotations(mut self, annotations: HashMap<String, String>) -> Self {
        self.annotations = annotations;
        self
    }

    /// The concatenated in-argument signature, e.g. `"sii"`.
    pub fn in_signature(&self) -> String {
        self.in_args.iter().map(Argument::signature).collect()
    }

    /// The concatenated out-argument (return) signature.
    pub fn out_signature(&self) -> String {
        self.out_args.iter().map(Argument::signature).collect()
    }

    /// `org.freedesktop.DBus.Method.NoReply` — the call's reply, if any,
    /// should not be waited for.
    pub fn is_oneway(&self) -> bool {
        self.annotations.get("org.freedesktop.DBus.Method.NoReply").map(String::as_str) == Some("true")
    }

    /// `org.freedesktop.DBus.Deprecated`.
    pub fn is_deprecated(&self) -> bool {
        self.annotations.get("org.freedesktop.DBus.Deprecated").map(String::as_str) == Some("true")
    }

    /// The `org.gnustep.objc.selector` annotation, when the method was
    /// reflected from (or is to be dispatched onto) a host class rather
    /// than hand-declared.
    pub fn host_selector(&self) -> Option<&str> {
        self.annotations.get("org.gnustep.objc.selector").map(String::as_str)
    }

    /// If this method was synthesized by
    /// [`crate::interface::Interface::install_properties`], the
    /// `(property name, "Get" | "Set")` pair it should forward to
    /// `org.freedesktop.DBus.Properties` instead of being sent to the
    /// owning interface directly. `None` for an ordinary method.
    pub fn property_forward(&self) -> Option<(&str, &str)> {
        let name = self.annotations.get(crate::interface::PROPERTY_FORWARD_NAME)?;
        let member = self.annotations.get(crate::interface::PROPERTY_FORWARD_MEMBER)?;
        Some((name.as_str(), member.as_str()))
    }

    /// Writes `values` (positionally matched against `in_args`) into a
    /// fresh message body.
    pub fn marshal_arguments(&self, values: &[Value], scope: Option<&Scope>) -> Result<Vec<u8>, Error> {
        marshal_values(&self.in_args, values, scope)
    }

    /// Writes `values` (positionally matched against `out_args`) into a
    /// fresh message body.
    pub fn marshal_return(&self, values: &[Value], scope: Option<&Scope>) -> Result<Vec<u8>, Error> {
        marshal_values(&self.out_args, values, scope)
    }

    /// Reads a complete in-argument list out of a message body.
    pub fn unmarshal_arguments(&self, body: &[u8]) -> Result<Vec<Value>, Error> {
        unmarshal_values(&self.in_args, body)
    }

    /// Reads a complete out-argument (return) list out of a message body.
    pub fn unmarshal_return(&self, body: &[u8]) -> Result<Vec<Value>, Error> {
        unmarshal_values(&self.out_args, body)
    }

    /// A single-line rendering of this method's shape, the kind of thing
    /// a codegen backend turns into a host-language method declaration,
    /// e.g. `fooWithBar:(NSString*)bar baz:(int32_t)baz -> int32_t`.
    pub fn host_declaration(&self) -> String {
        let ins: Vec<String> = self.in_args.iter().enumerate()
            .map(|(i, a)| {
                let label = a.name.clone().unwrap_or_else(|| format!("arg{}", i));
                format!("{}:({})", label, a.signature())
            })
            .collect();
        let outs = self.out_signature();
        if outs.is_empty() {
            format!("{} -> void", ins.join(" "))
        } else {
            format!("{} -> {}", ins.join(" "), outs)
        }
    }
}

fn marshal_values(args: &[Argument], values: &[Value], scope: Option<&Scope>) -> Result<Vec<u8>, Error> {
    if values.len() != args.len() {
        return Err(Error::type_mismatch(format!(
            "argument count mismatch: expected {}, got {}", args.len(), values.len()
        )));
    }
    let mut w = Writer::new();
    for (arg, val) in args.iter().zip(values.iter()) {
        arg.marshal(val, &mut w, scope)?;
    }
    Ok(w.into_bytes())
}

fn unmarshal_values(args: &[Argument], body: &[u8]) -> Result<Vec<Value>, Error> {
    let mut r = Reader::new(body);
    let mut out = Vec::with_capacity(args.len());
    for arg in args {
        out.push(arg.unmarshal(&mut r)?);
    }
    Ok(out)
}
