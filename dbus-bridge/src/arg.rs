//! The parsed node of a D-Bus signature tree, and the two-way converter
//! between the wire format and [`crate::value::Value`].
//!
//! This is the most load-bearing module in the crate: every feature —
//! proxies, exports, property access — funnels a value through
//! [`Argument::marshal`] or [`Argument::unmarshal`] somewhere along the
//! way.

use std::collections::HashMap;
use std::fmt;

use crate::error::Error;
use crate::signature::{SignatureError, SignatureParser, TypeCode};
use crate::typebridge::{self, HostParamKind};
use crate::value::Value;
use crate::wire::{Reader, Writer};

/// The (endpoint, service) pair that decides whether an object-path
/// argument may be forwarded by reference.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Scope {
    pub endpoint_id: u64,
    pub service: String,
}

/// A node of a parsed D-Bus signature, owning its container children.
///
/// `parent` back-references are deliberately not represented as a
/// pointer here: a back-reference must never become an ownership edge,
/// so this crate instead threads the scope a
/// marshal/unmarshal call needs as an explicit parameter, which is the
/// more idiomatic Rust substitute for "walk up to the owning Proxy".
#[derive(Debug, Clone)]
pub struct Argument {
    pub dbus_type: TypeCode,
    pub name: Option<String>,
    pub annotations: HashMap<String, String>,
    pub host_class_hint: Option<String>,
    pub children: Vec<Argument>,
}

/// Fixed-width slot produced by [`Argument::unbox`] / consumed by
/// [`Argument::box_value`].
#[derive(Debug, Clone)]
pub enum UnboxedSlot {
    /// Sign-extended 64-bit integer buffer ("Numeric semantics": reads
    /// sign-extend, writes mask to the wire width).
    Int(i64),
    /// Raw 64-bit bit pattern, used for doubles (bit-identical reinterpret).
    Bits(u64),
    Text(String),
    Handle(std::os::unix::io::RawFd),
}

fn default_host_class_hint(code: TypeCode) -> &'static str {
    match code {
        TypeCode::Byte | TypeCode::Int16 | TypeCode::UInt16 | TypeCode::Int32
        | TypeCode::UInt32 | TypeCode::Int64 | TypeCode::UInt64 => "Integer",
        TypeCode::Boolean => "Boolean",
        TypeCode::Double => "Double",
        TypeCode::String => "String",
        TypeCode::ObjectPath => "Proxy",
        TypeCode::Signature => "Signature",
        TypeCode::UnixFd => "Handle",
        TypeCode::Array => "Array",
        TypeCode::StructOpen | TypeCode::StructClose => "Struct",
        TypeCode::DictOpen | TypeCode::DictClose => "Dictionary",
        TypeCode::Variant => "Variant",
    }
}

/// Alignment in bytes for a complete type starting with this code.
fn align_of(code: TypeCode) -> usize {
    match code {
        TypeCode::Byte | TypeCode::Signature | TypeCode::Variant => 1,
        TypeCode::Int16 | TypeCode::UInt16 => 2,
        TypeCode::Boolean | TypeCode::Int32 | TypeCode::UInt32
        | TypeCode::String | TypeCode::ObjectPath | TypeCode::UnixFd | TypeCode::Array => 4,
        TypeCode::Int64 | TypeCode::UInt64 | TypeCode::Double
        | TypeCode::StructOpen | TypeCode::StructClose
        | TypeCode::DictOpen | TypeCode::DictClose => 8,
    }
}

impl Argument {
    fn leaf(dbus_type: TypeCode) -> Self {
        Argument {
            dbus_type,
            name: None,
            annotations: HashMap::new(),
            host_class_hint: Some(default_host_class_hint(dbus_type).to_string()),
            children: Vec::new(),
        }
    }

    fn container(dbus_type: TypeCode, children: Vec<Argument>) -> Self {
        Argument {
            dbus_type,
            name: None,
            annotations: HashMap::new(),
            host_class_hint: Some(default_host_class_hint(dbus_type).to_string()),
            children,
        }
    }

    /// Applies the `org.gnustep.objc.class` annotation as an
    /// override of the default host-class hint, if present.
    pub fn with_annotations(mut self, annotations: HashMap<String, String>) -> Self {
        if let Some(class) = annotations.get("org.gnustep.objc.class") {
            self.host_class_hint = Some(class.clone());
        }
        self.annotations = annotations;
        self
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    fn align(&self) -> usize { align_of(self.dbus_type) }

    /// True if this array's sole child is a dict-entry — the marking
    /// that decides whether to box as a dictionary or as a plain array
    /// at unmarshal time.
    pub fn is_dictionary(&self) -> bool {
        self.dbus_type == TypeCode::Array
            && self.children.len() == 1
            && self.children[0].dbus_type == TypeCode::DictOpen
    }

    /// Parses one complete type starting at the parser's current
    /// position, recursing into containers.
    pub fn from_parser(p: &mut SignatureParser) -> Result<Argument, SignatureError> {
        let code = p.next_code()?;
        if !code.is_container_open() && code != TypeCode::Variant {
            return Ok(Argument::leaf(code));
        }
        match code {
            TypeCode::Variant => Ok(Argument::container(TypeCode::Variant, Vec::new())),
            TypeCode::Array => {
                p.enter()?;
                let child = Argument::from_parser(p)?;
                p.leave();
                Ok(Argument::container(TypeCode::Array, vec![child]))
            }
            TypeCode::StructOpen => {
                p.enter()?;
                let mut children = Vec::new();
                while !p.peek_is_close(TypeCode::StructClose) {
                    if p.is_empty() { return Err(p_fail(p, "unterminated struct")); }
                    children.push(Argument::from_parser(p)?);
                }
                p.expect_close(TypeCode::StructClose)?;
                p.leave();
                if children.is_empty() {
                    return Err(p_fail(p, "struct has no fields"));
                }
                Ok(Argument::container(TypeCode::StructOpen, children))
            }
            TypeCode::DictOpen => {
                p.enter()?;
                let key = Argument::from_parser(p)?;
                if !key.dbus_type.is_basic() {
                    return Err(p_fail(p, "dict-entry key must be a basic type"));
                }
                let val = Argument::from_parser(p)?;
                p.expect_close(TypeCode::DictClose)?;
                p.leave();
                Ok(Argument::container(TypeCode::DictOpen, vec![key, val]))
            }
            _ => unreachable!("is_container_open() already filtered the remaining codes"),
        }
    }

    /// Builds a single Argument from a complete signature string (e.g.
    /// `"a{sv}"`). Fails on empty input, trailing garbage, or unbalanced
    /// brackets.
    pub fn from_signature_str(sig: &str) -> Result<Argument, SignatureError> {
        let mut p = SignatureParser::new(sig)?;
        let arg = Argument::from_parser(&mut p)?;
        if !p.is_empty() {
            return Err(p_fail(&mut p, "trailing data after complete type"));
        }
        Ok(arg)
    }

    /// Renders this node back into a signature string; `parse(s).signature() == s`
    /// for every valid `s`.
    pub fn signature(&self) -> String {
        match self.dbus_type {
            TypeCode::Array => format!("a{}", self.children[0].signature()),
            TypeCode::StructOpen => {
                let inner: String = self.children.iter().map(Argument::signature).collect();
                format!("({})", inner)
            }
            TypeCode::DictOpen => format!("{{{}{}}}", self.children[0].signature(), self.children[1].signature()),
            other => other.to_string(),
        }
    }

    /// Builds an Argument from a declared host parameter kind. Unsupported native kinds are
    /// rejected rather than silently coerced.
    pub fn from_host_param(kind: HostParamKind) -> Result<Argument, Error> {
        match kind {
            HostParamKind::Scalar(s) => Ok(Argument::leaf(typebridge::dbus_code_for_host_kind(s))),
            HostParamKind::Str => Ok(Argument::leaf(TypeCode::String)),
            HostParamKind::ObjectPath => Ok(Argument::leaf(TypeCode::ObjectPath)),
            HostParamKind::Handle => Ok(Argument::leaf(TypeCode::UnixFd)),
            HostParamKind::Boxed => Ok(Argument::container(TypeCode::Variant, Vec::new())),
            HostParamKind::Unsupported(what) => {
                Err(Error::unsupported_value(format!("host parameter kind '{}' has no D-Bus representation", what)))
            }
        }
    }

    // ---- unbox / box ----------------------------------------------------

    /// Extracts a fixed-width wire slot from a host value under the
    /// unbox contract. Only valid for basic types.
    pub fn unbox(&self, val: &Value) -> Result<UnboxedSlot, Error> {
        use TypeCode::*;
        match self.dbus_type {
            Boolean => {
                let b = match val {
                    Value::Bool(b) => *b,
                    Value::Null => false,
                    other => other.as_i64().map(|n| n != 0).ok_or_else(|| {
                        Error::type_mismatch(format!("cannot unbox {:?} as boolean", other))
                    })?,
                };
                Ok(UnboxedSlot::Int(if b { 1 } else { 0 }))
            }
            Byte | Int16 | UInt16 | Int32 | UInt32 | Int64 | UInt64 => {
                let n = match val {
                    Value::Null => 0,
                    other => match other.as_i64() {
                        Some(n) => n,
                        None => return Err(self.unbox_int_fallback_error(other)),
                    },
                };
                Ok(UnboxedSlot::Int(n))
            }
            Double => {
                let d = match val {
                    Value::Double(d) => *d,
                    Value::Null => 0.0,
                    other => return Err(Error::type_mismatch(format!("cannot unbox {:?} as double", other))),
                };
                Ok(UnboxedSlot::Bits(d.to_bits()))
            }
            String | ObjectPath | Signature => {
                let s = match val {
                    Value::Null => String::new(),
                    other => other.as_str().map(|s| s.to_string())
                        .or_else(|| match other {
                            Value::Proxy(p) if self.dbus_type == ObjectPath => Some(p.path().to_string()),
                            _ => None,
                        })
                        .ok_or_else(|| Error::type_mismatch(format!("cannot unbox {:?} as {}", other, self.dbus_type)))?,
                };
                Ok(UnboxedSlot::Text(s))
            }
            UnixFd => match val {
                Value::Handle(fd) => Ok(UnboxedSlot::Handle(*fd)),
                Value::Null => Ok(UnboxedSlot::Handle(-1)),
                other => Err(Error::type_mismatch(format!("cannot unbox {:?} as file handle", other))),
            },
            container => Err(Error::type_mismatch(format!("{} is not a basic type, cannot unbox", container))),
        }
    }

    /// Builds the error raised when no builtin numeric accessor applies to
    /// `val`. The unbox-accessor registry (spec.md §4.2/§5) maps a host
    /// *accessor selector name* to a D-Bus code, but `unbox` only ever
    /// receives the already-resolved `Value`, never the selector that
    /// produced it -- that name only exists at the reflective `HostClass`
    /// call site that invoked the accessor in the first place, several
    /// layers above this function. There is nothing here to look up, so
    /// rather than call `value::registry()` and discard its answer, this
    /// reports the gap explicitly per SPEC_FULL.md's rule that an
    /// unimplemented dispatch path must surface, never drop silently.
    fn unbox_int_fallback_error(&self, val: &Value) -> Error {
        Error::unsupported_value(format!(
            "cannot unbox {:?} as {}: no builtin numeric accessor applies and the unbox-accessor \
             registry cannot be consulted without a selector name, which unbox() is never given",
            val, self.dbus_type
        ))
    }

    /// Constructs the default host value for this code from a wire slot.
    pub fn box_value(&self, slot: UnboxedSlot) -> Value {
        use TypeCode::*;
        match (self.dbus_type, slot) {
            (Boolean, UnboxedSlot::Int(n)) => Value::Bool(n != 0),
            (Byte, UnboxedSlot::Int(n)) => Value::Byte(n as u8),
            (Int16, UnboxedSlot::Int(n)) => Value::I16(n as i16),
            (UInt16, UnboxedSlot::Int(n)) => Value::U16(n as u16),
            (Int32, UnboxedSlot::Int(n)) => Value::I32(n as i32),
            (UInt32, UnboxedSlot::Int(n)) => Value::U32(n as u32),
            (Int64, UnboxedSlot::Int(n)) => Value::I64(n),
            (UInt64, UnboxedSlot::Int(n)) => Value::U64(n as u64),
            (Double, UnboxedSlot::Bits(b)) => Value::Double(f64::from_bits(b)),
            (String, UnboxedSlot::Text(s)) => Value::Str(s),
            (ObjectPath, UnboxedSlot::Text(s)) => Value::ObjectPath(s),
            (Signature, UnboxedSlot::Text(s)) => Value::Signature(s),
            (UnixFd, UnboxedSlot::Handle(fd)) => Value::Handle(fd),
            _ => Value::Null,
        }
    }

    // ---- marshal / unmarshal --------------------------------------------

    /// Marshals `val` into `w` according to this node's shape. `scope` is
    /// the marshalling Proxy's (endpoint, service) pair, consulted only
    /// when marshalling object-path values.
    pub fn marshal(&self, val: &Value, w: &mut Writer, scope: Option<&Scope>) -> Result<(), Error> {
        w.pad_to(self.align());
        match self.dbus_type {
            TypeCode::Boolean | TypeCode::Byte | TypeCode::Int16 | TypeCode::UInt16
            | TypeCode::Int32 | TypeCode::UInt32 | TypeCode::Int64 | TypeCode::UInt64
            | TypeCode::Double | TypeCode::Signature | TypeCode::UnixFd => {
                self.marshal_basic(val, w)
            }
            TypeCode::String => self.marshal_basic(val, w),
            TypeCode::ObjectPath => self.marshal_object_path(val, w, scope),
            TypeCode::Array if self.is_dictionary() => self.marshal_dict(val, w, scope),
            TypeCode::Array => self.marshal_array(val, w, scope),
            TypeCode::StructOpen => self.marshal_struct(val, w, scope),
            TypeCode::DictOpen => self.marshal_dict_entry(val, w, scope),
            TypeCode::Variant => self.marshal_variant(val, w, scope),
            other => Err(Error::type_mismatch(format!("cannot marshal into bare {}", other))),
        }
    }

    fn marshal_basic(&self, val: &Value, w: &mut Writer) -> Result<(), Error> {
        let slot = self.unbox(val)?;
        match (self.dbus_type, slot) {
            (TypeCode::Boolean, UnboxedSlot::Int(n)) => w.write_bool(n != 0),
            (TypeCode::Byte, UnboxedSlot::Int(n)) => w.write_u8(n as u8),
            (TypeCode::Int16, UnboxedSlot::Int(n)) => w.write_i16(n as i16),
            (TypeCode::UInt16, UnboxedSlot::Int(n)) => w.write_u16(n as u16),
            (TypeCode::Int32, UnboxedSlot::Int(n)) => w.write_i32(n as i32),
            (TypeCode::UInt32, UnboxedSlot::Int(n)) => w.write_u32(n as u32),
            (TypeCode::Int64, UnboxedSlot::Int(n)) => w.write_i64(n),
            (TypeCode::UInt64, UnboxedSlot::Int(n)) => w.write_u64(n as u64),
            (TypeCode::Double, UnboxedSlot::Bits(b)) => w.write_f64(f64::from_bits(b)),
            (TypeCode::String, UnboxedSlot::Text(s)) => w.write_string(&s),
            (TypeCode::Signature, UnboxedSlot::Text(s)) => w.write_signature(&s),
            (TypeCode::UnixFd, UnboxedSlot::Handle(fd)) => w.write_u32(fd as u32),
            _ => return Err(Error::type_mismatch("unbox slot did not match declared type")),
        }
        Ok(())
    }

    fn marshal_object_path(&self, val: &Value, w: &mut Writer, scope: Option<&Scope>) -> Result<(), Error> {
        match val {
            Value::Proxy(p) => {
                let same_scope = scope.map_or(false, |s| p.scope() == *s);
                if same_scope {
                    w.write_string(p.path());
                    Ok(())
                } else if let Some(path) = p.locally_exported_path() {
                    w.write_string(&path);
                    Ok(())
                } else {
                    Err(Error::type_mismatch("object-path argument crosses proxy scope and is not locally exported"))
                }
            }
            Value::ObjectPath(s) => { w.write_string(s); Ok(()) }
            other => Err(Error::type_mismatch(format!("cannot marshal {:?} as an object path", other))),
        }
    }

    fn marshal_array(&self, val: &Value, w: &mut Writer, scope: Option<&Scope>) -> Result<(), Error> {
        let child = &self.children[0];
        if child.dbus_type == TypeCode::Byte {
            if let Value::Blob(bytes) = val {
                let len_at = w.reserve_array_len();
                w.pad_to(child.align());
                let body_start = w.len();
                for b in bytes { w.write_u8(*b); }
                w.patch_array_len(len_at, body_start);
                return Ok(());
            }
        }
        let items: &[Value] = match val {
            Value::Array(items) => items,
            Value::Blob(bytes) => {
                // byte blob fed into a non-byte-element array is a type error;
                // but a byte blob into a byte array without an explicit Blob
                // branch above cannot happen since we matched it first.
                return Err(Error::type_mismatch(format!("blob of {} bytes cannot marshal as {}", bytes.len(), self.signature())));
            }
            other => return Err(Error::type_mismatch(format!("cannot marshal {:?} as an array", other))),
        };
        let len_at = w.reserve_array_len();
        w.pad_to(child.align());
        let body_start = w.len();
        for item in items {
            child.marshal(item, w, scope)?;
        }
        w.patch_array_len(len_at, body_start);
        Ok(())
    }

    fn marshal_struct(&self, val: &Value, w: &mut Writer, scope: Option<&Scope>) -> Result<(), Error> {
        let items = match val {
            Value::Struct(items) => items,
            other => return Err(Error::type_mismatch(format!("cannot marshal {:?} as a struct", other))),
        };
        if items.len() != self.children.len() {
            return Err(Error::type_mismatch(format!(
                "struct arity mismatch: expected {} fields, got {}", self.children.len(), items.len()
            )));
        }
        for (child, item) in self.children.iter().zip(items.iter()) {
            child.marshal(item, w, scope)?;
        }
        Ok(())
    }

    fn marshal_dict_entry(&self, val: &Value, w: &mut Writer, scope: Option<&Scope>) -> Result<(), Error> {
        let (k, v) = match val {
            Value::Struct(items) if items.len() == 2 => (&items[0], &items[1]),
            other => return Err(Error::type_mismatch(format!("cannot marshal {:?} as a dict-entry", other))),
        };
        self.children[0].marshal(k, w, scope)?;
        self.children[1].marshal(v, w, scope)
    }

    fn marshal_dict(&self, val: &Value, w: &mut Writer, scope: Option<&Scope>) -> Result<(), Error> {
        let entries = match val {
            Value::Dict(entries) => entries,
            other => return Err(Error::type_mismatch(format!("cannot marshal {:?} as a dictionary", other))),
        };
        let entry_arg = &self.children[0];
        let len_at = w.reserve_array_len();
        w.pad_to(entry_arg.align());
        let body_start = w.len();
        for (k, v) in entries {
            entry_arg.marshal(&Value::Struct(vec![k.clone(), v.clone()]), w, scope)?;
        }
        w.patch_array_len(len_at, body_start);
        Ok(())
    }

    fn marshal_variant(&self, val: &Value, w: &mut Writer, scope: Option<&Scope>) -> Result<(), Error> {
        // `val` may itself already be a boxed-variant sentinel -- e.g. an
        // element previously produced by `unmarshal_variant`, or a host
        // value explicitly marking "box this as a variant here". Unwrap it
        // before inferring the actual payload's type, so the payload (not
        // the sentinel) is what gets a concrete signature and gets marshalled.
        let payload = match val {
            Value::Variant(inner) => inner.as_ref(),
            other => other,
        };
        let inferred = infer_variant(payload, scope)?;
        w.write_signature(&inferred.signature());
        inferred.marshal(payload, w, scope)
    }

    /// Unmarshals a value of this node's shape from `r`.
    pub fn unmarshal(&self, r: &mut Reader) -> Result<Value, Error> {
        r.pad_to(self.align())?;
        match self.dbus_type {
            TypeCode::Boolean => Ok(Value::Bool(r.read_bool()?)),
            TypeCode::Byte => Ok(Value::Byte(r.read_u8()?)),
            TypeCode::Int16 => Ok(Value::I16(r.read_i16()?)),
            TypeCode::UInt16 => Ok(Value::U16(r.read_u16()?)),
            TypeCode::Int32 => Ok(Value::I32(r.read_i32()?)),
            TypeCode::UInt32 => Ok(Value::U32(r.read_u32()?)),
            TypeCode::Int64 => Ok(Value::I64(r.read_i64()?)),
            TypeCode::UInt64 => Ok(Value::U64(r.read_u64()?)),
            TypeCode::Double => Ok(Value::Double(r.read_f64()?)),
            TypeCode::String => Ok(Value::Str(r.read_string()?)),
            TypeCode::ObjectPath => Ok(Value::ObjectPath(r.read_string()?)),
            TypeCode::Signature => Ok(Value::Signature(r.read_signature()?)),
            TypeCode::UnixFd => Ok(Value::Handle(r.read_u32()? as std::os::unix::io::RawFd)),
            TypeCode::Array if self.is_dictionary() => self.unmarshal_dict(r),
            TypeCode::Array => self.unmarshal_array(r),
            TypeCode::StructOpen => self.unmarshal_struct(r),
            TypeCode::DictOpen => self.unmarshal_dict_entry(r),
            TypeCode::Variant => self.unmarshal_variant(r),
            other => Err(Error::type_mismatch(format!("cannot unmarshal bare {}", other))),
        }
    }

    fn unmarshal_array(&self, r: &mut Reader) -> Result<Value, Error> {
        let child = &self.children[0];
        let len = r.read_array_len()? as usize;
        r.pad_to(child.align())?;
        let end = r.position() + len;
        if child.dbus_type == TypeCode::Byte {
            let bytes = r.bytes(len)?.to_vec();
            let is_blob = child.host_class_hint.as_deref() == Some("Blob")
                || child.annotations.get("org.gnustep.objc.class").map(String::as_str) == Some("Blob");
            return Ok(if is_blob { Value::Blob(bytes) } else { Value::Array(bytes.into_iter().map(Value::Byte).collect()) });
        }
        let mut items = Vec::new();
        while r.position() < end {
            items.push(child.unmarshal(r)?);
        }
        Ok(Value::Array(items))
    }

    fn unmarshal_struct(&self, r: &mut Reader) -> Result<Value, Error> {
        let mut items = Vec::with_capacity(self.children.len());
        for child in &self.children {
            items.push(child.unmarshal(r)?);
        }
        Ok(Value::Struct(items))
    }

    fn unmarshal_dict_entry(&self, r: &mut Reader) -> Result<Value, Error> {
        let k = self.children[0].unmarshal(r)?;
        let v = self.children[1].unmarshal(r)?;
        Ok(Value::Struct(vec![k, v]))
    }

    fn unmarshal_dict(&self, r: &mut Reader) -> Result<Value, Error> {
        let entry_arg = &self.children[0];
        let len = r.read_array_len()? as usize;
        r.pad_to(entry_arg.align())?;
        let end = r.position() + len;
        let mut entries: Vec<(Value, Value)> = Vec::new();
        while r.position() < end {
            if let Value::Struct(mut kv) = entry_arg.unmarshal(r)? {
                let v = kv.pop().unwrap();
                let k = kv.pop().unwrap();
                // Duplicate keys observed during unmarshalling are ignored
                // (first wins) -- a warning, never an error.
                if entries.iter().any(|(ek, _)| values_equal(ek, &k)) {
                    log::warn!("duplicate dict key {} encountered during unmarshal, dropping", k);
                } else {
                    entries.push((k, v));
                }
            }
        }
        Ok(Value::Dict(entries))
    }

    fn unmarshal_variant(&self, r: &mut Reader) -> Result<Value, Error> {
        let sig = r.read_signature()?;
        let inner = Argument::from_signature_str(&sig)?;
        let v = inner.unmarshal(r)?;
        Ok(Value::Variant(Box::new(v)))
    }
}

fn values_equal(a: &Value, b: &Value) -> bool {
    format!("{:?}", a) == format!("{:?}", b)
}

fn p_fail(p: &mut SignatureParser, msg: &str) -> SignatureError {
    let _ = p;
    SignatureError {
        kind: crate::signature::SignatureErrorKind::NotExactlyOneCompleteType,
        signature: msg.to_string(),
    }
}

/// Picks the most specific D-Bus type representable for `val`.
pub fn infer_variant(val: &Value, scope: Option<&Scope>) -> Result<Argument, Error> {
    if val.is_nested_variant() {
        return Ok(Argument::container(TypeCode::Variant, Vec::new()));
    }
    match val {
        Value::Dict(entries) => infer_dict(entries, scope),
        Value::Struct(items) => infer_struct(items, scope),
        Value::Array(items) => infer_array(items, scope),
        Value::Blob(_) => Ok(Argument::container(TypeCode::Array, vec![Argument::leaf(TypeCode::Byte)])),
        Value::Proxy(p) => {
            match scope {
                Some(s) if p.scope() == *s => Ok(Argument::leaf(TypeCode::ObjectPath)),
                _ if p.locally_exported_path().is_some() => Ok(Argument::leaf(TypeCode::ObjectPath)),
                _ => Err(Error::unsupported_value("proxy is out of scope and not locally exported")),
            }
        }
        Value::Bool(_) => Ok(Argument::leaf(TypeCode::Boolean)),
        other => match other.default_type_code() {
            Some(code) if code.is_basic() => Ok(Argument::leaf(code)),
            _ => Err(Error::unsupported_value(format!("{:?} has no representable D-Bus type", other))),
        },
    }
}

fn infer_dict(entries: &[(Value, Value)], scope: Option<&Scope>) -> Result<Argument, Error> {
    if entries.is_empty() {
        // An empty map has no values to infer a type from; default to a
        // string-keyed variant-valued dictionary, the most permissive shape.
        return Ok(Argument::container(TypeCode::Array, vec![
            Argument::container(TypeCode::DictOpen, vec![Argument::leaf(TypeCode::String), Argument::container(TypeCode::Variant, Vec::new())]),
        ]));
    }
    let keys_basic = entries.iter().all(|(k, _)| matches!(k,
        Value::Str(_) | Value::ObjectPath(_) | Value::Signature(_) | Value::Bool(_) | Value::Byte(_)
        | Value::I16(_) | Value::U16(_) | Value::I32(_) | Value::U32(_) | Value::I64(_) | Value::U64(_) | Value::Double(_)));
    if !keys_basic {
        // Complex keys: fall back to an array of (key, value) structs.
        let key_arg = infer_variant(&entries[0].0, scope)?;
        let val_arg = infer_variant(&entries[0].1, scope)?;
        return Ok(Argument::container(TypeCode::Array, vec![Argument::container(TypeCode::StructOpen, vec![key_arg, val_arg])]));
    }
    let key_sig = infer_variant(&entries[0].0, scope)?.signature();
    let keys_homogeneous = entries.iter().map(|(k, _)| infer_variant(k, scope).map(|a| a.signature()))
        .collect::<Result<Vec<_>, _>>()?.iter().all(|s| *s == key_sig);
    let key_arg = if keys_homogeneous { infer_variant(&entries[0].0, scope)? } else {
        return Err(Error::unsupported_value("dictionary keys are not homogeneously typed"));
    };
    let first_val_sig = infer_variant(&entries[0].1, scope)?.signature();
    let values_homogeneous = entries.iter().map(|(_, v)| infer_variant(v, scope).map(|a| a.signature()))
        .collect::<Result<Vec<_>, _>>()?.iter().all(|s| *s == first_val_sig);
    let val_arg = if values_homogeneous {
        infer_variant(&entries[0].1, scope)?
    } else {
        Argument::container(TypeCode::Variant, Vec::new())
    };
    Ok(Argument::container(TypeCode::Array, vec![Argument::container(TypeCode::DictOpen, vec![key_arg, val_arg])]))
}

fn infer_struct(items: &[Value], scope: Option<&Scope>) -> Result<Argument, Error> {
    let children: Vec<Argument> = items.iter().map(|v| infer_variant(v, scope)).collect::<Result<_, _>>()?;
    Ok(Argument::container(TypeCode::StructOpen, children))
}

fn infer_array(items: &[Value], scope: Option<&Scope>) -> Result<Argument, Error> {
    if items.is_empty() {
        return Ok(Argument::container(TypeCode::Array, vec![Argument::container(TypeCode::Variant, Vec::new())]));
    }
    let sigs: Vec<String> = items.iter().map(|v| infer_variant(v, scope).map(|a| a.signature())).collect::<Result<_, _>>()?;
    let first = &sigs[0];
    if sigs.iter().all(|s| s == first) {
        Ok(Argument::container(TypeCode::Array, vec![infer_variant(&items[0], scope)?]))
    } else {
        Ok(Argument::container(TypeCode::Array, vec![Argument::container(TypeCode::Variant, Vec::new())]))
    }
}

impl fmt::Display for Argument {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result { write!(f, "{}", self.signature()) }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unboxing_a_non_numeric_value_as_an_integer_surfaces_unsupported_value_not_type_mismatch() {
        let arg = Argument::from_signature_str("i").unwrap();
        let err = arg.unbox(&Value::Str("not a number".into())).unwrap_err();
        assert_eq!(err.kind(), &crate::error::ErrorKind::UnsupportedValue);
    }

    #[test]
    fn signature_round_trip() {
        for sig in ["y", "b", "s", "ai", "a{sv}", "(ii)", "a(si)", "v", "ay"] {
            let a = Argument::from_signature_str(sig).unwrap();
            assert_eq!(a.signature(), sig);
        }
    }

    #[test]
    fn rejects_struct_with_no_fields() {
        assert!(Argument::from_signature_str("()").is_err());
    }

    #[test]
    fn rejects_dict_entry_outside_array() {
        // A bare dict-entry signature is syntactically a struct-like
        // container that's only valid as an array's element type; by
        // itself it still parses as a shape (spec only forbids non-basic
        // keys), so this instead exercises the basic-key invariant.
        assert!(Argument::from_signature_str("{vs}").is_err());
    }

    #[test]
    fn marshal_unmarshal_round_trip_basic() {
        let arg = Argument::from_signature_str("s").unwrap();
        let mut w = Writer::new();
        arg.marshal(&Value::Str("hello".into()), &mut w, None).unwrap();
        let bytes = w.into_bytes();
        let mut r = Reader::new(&bytes);
        let v = arg.unmarshal(&mut r).unwrap();
        assert!(matches!(v, Value::Str(s) if s == "hello"));
    }

    #[test]
    fn marshal_unmarshal_round_trip_array() {
        let arg = Argument::from_signature_str("ai").unwrap();
        let mut w = Writer::new();
        let val = Value::Array(vec![Value::I32(1), Value::I32(2), Value::I32(3)]);
        arg.marshal(&val, &mut w, None).unwrap();
        let bytes = w.into_bytes();
        let mut r = Reader::new(&bytes);
        let back = arg.unmarshal(&mut r).unwrap();
        match back {
            Value::Array(items) => assert_eq!(items.len(), 3),
            _ => panic!("expected array"),
        }
    }

    #[test]
    fn dictionary_with_duplicate_keys_drops_second() {
        let arg = Argument::from_signature_str("a{su}").unwrap();
        let mut w = Writer::new();
        let entry_arg = &arg.children[0];
        let len_at = w.reserve_array_len();
        w.pad_to(entry_arg.align());
        let body_start = w.len();
        entry_arg.marshal(&Value::Struct(vec![Value::Str("a".into()), Value::U32(1)]), &mut w, None).unwrap();
        entry_arg.marshal(&Value::Struct(vec![Value::Str("a".into()), Value::U32(2)]), &mut w, None).unwrap();
        w.patch_array_len(len_at, body_start);
        let bytes = w.into_bytes();
        let mut r = Reader::new(&bytes);
        let v = arg.unmarshal(&mut r).unwrap();
        match v {
            Value::Dict(entries) => {
                assert_eq!(entries.len(), 1);
                assert!(matches!(&entries[0].1, Value::U32(1)));
            }
            _ => panic!("expected dict"),
        }
    }

    #[test]
    fn variant_promotes_complex_keyed_map_to_array_of_struct() {
        let entries = vec![
            (Value::Struct(vec![Value::I32(1), Value::I32(2)]), Value::Str("x".into())),
        ];
        let inferred = infer_variant(&Value::Dict(entries), None).unwrap();
        assert_eq!(inferred.signature(), "a((ii)s)");
    }

    #[test]
    fn variant_infers_heterogeneous_values_as_variant_dict() {
        let entries = vec![
            (Value::Str("a".into()), Value::I32(1)),
            (Value::Str("b".into()), Value::Double(2.5)),
        ];
        let inferred = infer_variant(&Value::Dict(entries), None).unwrap();
        assert_eq!(inferred.signature(), "a{sv}");
    }

    #[test]
    fn variant_infers_byte_blob_as_ay() {
        let inferred = infer_variant(&Value::Blob(vec![1, 2, 3]), None).unwrap();
        assert_eq!(inferred.signature(), "ay");
    }

    #[test]
    fn re_marshalling_an_unmarshalled_variant_does_not_double_wrap() {
        // A value just produced by `unmarshal_variant` carries an explicit
        // `Value::Variant` sentinel around its payload; marshalling it again
        // under a "v" argument must unwrap the sentinel and marshal the
        // payload's own inferred type, not recurse on the sentinel itself.
        let arg = Argument::from_signature_str("v").unwrap();
        let mut w = Writer::new();
        arg.marshal(&Value::Variant(Box::new(Value::I32(42))), &mut w, None).unwrap();
        let bytes = w.into_bytes();
        let mut r = Reader::new(&bytes);
        match arg.unmarshal(&mut r).unwrap() {
            Value::Variant(inner) => assert!(matches!(*inner, Value::I32(42))),
            other => panic!("expected variant, got {:?}", other),
        }
    }

    #[test]
    fn heterogeneous_dict_values_round_trip_through_variant_wrapping() {
        let arg = Argument::from_signature_str("a{sv}").unwrap();
        let dict = Value::Dict(vec![
            (Value::Str("a".into()), Value::I32(1)),
            (Value::Str("b".into()), Value::Double(2.5)),
        ]);
        let mut w = Writer::new();
        arg.marshal(&dict, &mut w, None).unwrap();
        let bytes = w.into_bytes();
        let mut r = Reader::new(&bytes);
        let back = arg.unmarshal(&mut r).unwrap();
        let entries = match back { Value::Dict(e) => e, other => panic!("expected dict, got {:?}", other) };
        assert_eq!(entries.len(), 2);
        for (k, v) in &entries {
            match (k, v) {
                (Value::Str(s), Value::Variant(b)) if s == "a" => assert!(matches!(**b, Value::I32(1))),
                (Value::Str(s), Value::Variant(b)) if s == "b" => assert!(matches!(**b, Value::Double(d) if d == 2.5)),
                other => panic!("unexpected entry {:?}", other),
            }
        }
        // Re-marshal the unmarshalled (variant-wrapped) dict: must not panic
        // or infinitely recurse.
        let mut w2 = Writer::new();
        arg.marshal(&Value::Dict(entries), &mut w2, None).unwrap();
    }
}
