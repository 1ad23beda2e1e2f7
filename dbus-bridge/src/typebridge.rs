//! Static tables mapping D-Bus type codes to host primitive kinds and
//! native element sizes, plus the widening/narrowing compatibility rules
//! used when a host invocation's argument layout is checked against a
//! [`crate::method::Method`] (spec §4.1).

use crate::signature::TypeCode;
use std::mem::size_of;

/// The host's view of what shape of value lives behind a D-Bus type.
///
/// Every container and the object-path type bottom out in `Boxed`: the
/// host represents them with a heap-allocated value ([`crate::value::Value`]),
/// never a fixed-width register.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NativeKind {
    U8,
    Bool,
    I16,
    U16,
    I32,
    U32,
    I64,
    U64,
    F64,
    Str,
    OpaqueHandle,
    Boxed,
}

/// A host-side scalar kind as it would be declared by a reflected method
/// parameter, used only by [`fits`] to decide whether widening an
/// invocation argument into a D-Bus slot is lossless.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HostScalarKind {
    I8, U8, I16, U16, I32, U32, I64, U64, F32, F64, Bool,
}

impl HostScalarKind {
    fn is_float(self) -> bool { matches!(self, HostScalarKind::F32 | HostScalarKind::F64) }
    fn is_signed(self) -> bool { matches!(self, HostScalarKind::I8 | HostScalarKind::I16 | HostScalarKind::I32 | HostScalarKind::I64) }
    fn is_unsigned_int(self) -> bool { matches!(self, HostScalarKind::U8 | HostScalarKind::U16 | HostScalarKind::U32 | HostScalarKind::U64) }
    fn byte_width(self) -> usize {
        match self {
            HostScalarKind::I8 | HostScalarKind::U8 => 1,
            HostScalarKind::I16 | HostScalarKind::U16 => 2,
            HostScalarKind::I32 | HostScalarKind::U32 | HostScalarKind::F32 => 4,
            HostScalarKind::I64 | HostScalarKind::U64 | HostScalarKind::F64 => 8,
            HostScalarKind::Bool => 1,
        }
    }
}

/// The native (unboxed) representation size in bytes for a D-Bus code,
/// or the machine pointer size for boxed kinds.
pub fn native_size_for(code: TypeCode) -> usize {
    match native_kind_for(code) {
        NativeKind::U8 => 1,
        NativeKind::Bool => size_of::<u32>(), // D-Bus booleans are 4 bytes on the wire
        NativeKind::I16 | NativeKind::U16 => 2,
        NativeKind::I32 | NativeKind::U32 => 4,
        NativeKind::I64 | NativeKind::U64 | NativeKind::F64 => 8,
        NativeKind::Str | NativeKind::OpaqueHandle | NativeKind::Boxed => size_of::<usize>(),
    }
}

/// Maps a D-Bus type code to the host primitive kind used to hold its
/// unboxed value.
pub fn native_kind_for(code: TypeCode) -> NativeKind {
    match code {
        TypeCode::Byte => NativeKind::U8,
        TypeCode::Boolean => NativeKind::Bool,
        TypeCode::Int16 => NativeKind::I16,
        TypeCode::UInt16 => NativeKind::U16,
        TypeCode::Int32 => NativeKind::I32,
        TypeCode::UInt32 => NativeKind::U32,
        TypeCode::Int64 => NativeKind::I64,
        TypeCode::UInt64 => NativeKind::U64,
        TypeCode::Double => NativeKind::F64,
        TypeCode::String => NativeKind::Str,
        TypeCode::Signature => NativeKind::Str,
        TypeCode::UnixFd => NativeKind::OpaqueHandle,
        // Object paths are basic on the wire, but the host always
        // represents them through a boxed Proxy or string wrapper.
        TypeCode::ObjectPath => NativeKind::Boxed,
        TypeCode::Array | TypeCode::StructOpen | TypeCode::StructClose
        | TypeCode::DictOpen | TypeCode::DictClose | TypeCode::Variant => NativeKind::Boxed,
    }
}

/// The shape of a reflected host method parameter or return slot, as
/// reported by a [`crate::interface::HostClass`] implementation, before
/// it has been turned into an [`crate::arg::Argument`] (spec §4.2 "From a
/// host type descriptor").
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HostParamKind {
    Scalar(HostScalarKind),
    Str,
    ObjectPath,
    Handle,
    /// Any value that must travel boxed, inferred at marshal time (spec
    /// §4.2 variant inference) rather than declared by a fixed code.
    Boxed,
    /// A native kind the bridge has no D-Bus representation for (function
    /// pointers, unions, vectors, ...); carries a short description for
    /// the resulting error.
    Unsupported(&'static str),
}

/// The default D-Bus type code used when generating a signature from a
/// bare host kind (used by the variant-type inference in `arg.rs` for
/// numeric wrappers).
pub fn dbus_code_for_host_kind(kind: HostScalarKind) -> TypeCode {
    match kind {
        HostScalarKind::Bool => TypeCode::Boolean,
        HostScalarKind::I8 => TypeCode::Byte, // no signed-byte D-Bus type; closest unboxed slot
        HostScalarKind::U8 => TypeCode::Byte,
        HostScalarKind::I16 => TypeCode::Int16,
        HostScalarKind::U16 => TypeCode::UInt16,
        HostScalarKind::I32 => TypeCode::Int32,
        HostScalarKind::U32 => TypeCode::UInt32,
        HostScalarKind::I64 => TypeCode::Int64,
        HostScalarKind::U64 => TypeCode::UInt64,
        HostScalarKind::F32 => TypeCode::Double,
        HostScalarKind::F64 => TypeCode::Double,
    }
}

/// Whether a value declared as `source` can be widened into a slot
/// declared as `target` without silent truncation or sign corruption
/// (spec §4.1, tested by invariant 5 in §8).
pub fn fits(source: HostScalarKind, target: HostScalarKind) -> bool {
    if source == target { return true; }

    if source.is_float() != target.is_float() {
        // No cross-class (int <-> float) implicit fit, Bool included as its own class.
        return false;
    }
    if source == HostScalarKind::Bool || target == HostScalarKind::Bool {
        return source == target;
    }

    if source.is_float() && target.is_float() {
        return target.byte_width() >= source.byte_width();
    }

    let sw = source.byte_width();
    let tw = target.byte_width();
    if tw < sw { return false; }
    if tw == sw { return source.is_signed() == target.is_signed(); }

    // tw > sw: widening. Same sign class always fits; an unsigned source
    // may widen into a strictly wider signed target (there's room for the
    // sign bit); a signed source may never widen into an unsigned target.
    if source.is_signed() == target.is_signed() { return true; }
    source.is_unsigned_int() && target.is_signed()
}
