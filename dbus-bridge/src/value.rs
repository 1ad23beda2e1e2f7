//! The host's dynamic value model.
//!
//! The host object system is dynamically typed and message-passing (its
//! values don't carry a Rust-static type the way a static-dispatch
//! `Arg`/`RefArg` trait pair would expect), so this crate represents a
//! host value the simplest way that fits: one flat enum, recursively
//! boxed for containers.

use std::collections::HashMap;
use std::fmt;
use std::os::unix::io::RawFd;
use std::sync::{Arc, Mutex, OnceLock};

use crate::proxy::Proxy;
use crate::signature::TypeCode;

/// A dynamically-typed value flowing between the host object system and
/// the D-Bus wire.
#[derive(Debug, Clone)]
pub enum Value {
    /// The host's explicit null sentinel (used for e.g. an absent
    /// argument, or a multi-valued method return with fewer values than
    /// out-args).
    Null,
    Bool(bool),
    Byte(u8),
    I16(i16),
    U16(u16),
    I32(i32),
    U32(u32),
    I64(i64),
    U64(u64),
    Double(f64),
    Str(String),
    ObjectPath(String),
    Signature(String),
    /// An open file descriptor handle, exchanged by integer value only.
    Handle(RawFd),
    /// A byte array that is host-annotated as a blob type rather than an
    /// array of individual byte values.
    Blob(Vec<u8>),
    Array(Vec<Value>),
    /// An ordered struct value: positional, heterogeneous.
    Struct(Vec<Value>),
    /// A dictionary, preserving insertion order (array of dict-entries on
    /// the wire). Keys are basic values; duplicate keys are resolved
    /// first-wins at unmarshal time.
    Dict(Vec<(Value, Value)>),
    Variant(Box<Value>),
    /// A local stand-in for a remote object, or a freshly auto-exported
    /// local one.
    Proxy(Arc<Proxy>),
}

impl Value {
    /// The D-Bus type code this value would default to if no declared
    /// [`crate::arg::Argument`] type is available — used by variant-type
    /// inference.
    pub fn default_type_code(&self) -> Option<TypeCode> {
        Some(match self {
            Value::Null => return None,
            Value::Bool(_) => TypeCode::Boolean,
            Value::Byte(_) => TypeCode::Byte,
            Value::I16(_) => TypeCode::Int16,
            Value::U16(_) => TypeCode::UInt16,
            Value::I32(_) => TypeCode::Int32,
            Value::U32(_) => TypeCode::UInt32,
            Value::I64(_) => TypeCode::Int64,
            Value::U64(_) => TypeCode::UInt64,
            Value::Double(_) => TypeCode::Double,
            Value::Str(_) => TypeCode::String,
            Value::ObjectPath(_) => TypeCode::ObjectPath,
            Value::Signature(_) => TypeCode::Signature,
            Value::Handle(_) => TypeCode::UnixFd,
            Value::Blob(_) => TypeCode::Array,
            Value::Array(_) => TypeCode::Array,
            Value::Struct(_) => TypeCode::StructOpen,
            Value::Dict(_) => TypeCode::Array,
            Value::Variant(_) => TypeCode::Variant,
            Value::Proxy(_) => TypeCode::ObjectPath,
        })
    }

    /// True if this value is a boxed-variant sentinel one level below the
    /// top.
    pub fn is_nested_variant(&self) -> bool { matches!(self, Value::Variant(_)) }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::Str(s) | Value::ObjectPath(s) | Value::Signature(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_i64(&self) -> Option<i64> {
        match *self {
            Value::Byte(v) => Some(v as i64),
            Value::I16(v) => Some(v as i64),
            Value::U16(v) => Some(v as i64),
            Value::I32(v) => Some(v as i64),
            Value::U32(v) => Some(v as i64),
            Value::I64(v) => Some(v),
            Value::U64(v) => Some(v as i64),
            _ => None,
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Value::Null => write!(f, "null"),
            Value::Bool(b) => write!(f, "{}", b),
            Value::Byte(b) => write!(f, "{}", b),
            Value::I16(v) => write!(f, "{}", v),
            Value::U16(v) => write!(f, "{}", v),
            Value::I32(v) => write!(f, "{}", v),
            Value::U32(v) => write!(f, "{}", v),
            Value::I64(v) => write!(f, "{}", v),
            Value::U64(v) => write!(f, "{}", v),
            Value::Double(v) => write!(f, "{}", v),
            Value::Str(s) => write!(f, "{:?}", s),
            Value::ObjectPath(s) => write!(f, "{}", s),
            Value::Signature(s) => write!(f, "{}", s),
            Value::Handle(fd) => write!(f, "fd({})", fd),
            Value::Blob(b) => write!(f, "blob({} bytes)", b.len()),
            Value::Array(items) => write!(f, "{:?}", items),
            Value::Struct(items) => write!(f, "({:?})", items),
            Value::Dict(entries) => write!(f, "{:?}", entries),
            Value::Variant(v) => write!(f, "variant({})", v),
            Value::Proxy(p) => write!(f, "proxy({}, {})", p.service(), p.path()),
        }
    }
}

/// Process-wide, read-mostly registry mapping a host accessor-method name
/// to the D-Bus type code it should be treated as, consulted by
/// [`crate::arg::Argument::unbox`] when no builtin accessor applies.
#[derive(Default)]
pub struct UnboxRegistry {
    bindings: Mutex<HashMap<String, TypeCode>>,
}

static REGISTRY: OnceLock<UnboxRegistry> = OnceLock::new();

impl UnboxRegistry {
    /// Registers (or overwrites) the D-Bus code a given host accessor
    /// selector maps to.
    pub fn register(&self, selector: impl Into<String>, code: TypeCode) {
        self.bindings.lock().unwrap().insert(selector.into(), code);
    }

    /// Looks up the D-Bus code bound to a host accessor selector,
    /// returning a cheap owned copy so callers never hold the lock.
    pub fn lookup(&self, selector: &str) -> Option<TypeCode> {
        self.bindings.lock().unwrap().get(selector).copied()
    }

    fn clear(&self) { self.bindings.lock().unwrap().clear(); }
}

/// Returns the process-wide unbox-accessor registry.
///
/// In an ordinary build this lazily initializes the registry on first
/// access. Under `#[cfg(test)]` or the `test-support` feature, implicit
/// first-use initialization is forbidden (spec.md §5/§9: "forbid implicit
/// initialisation at first use when running tests so tests can reset
/// state") — call [`init`] explicitly before the first use in a test, or
/// this panics rather than silently initializing behind the test's back.
#[cfg(not(any(test, feature = "test-support")))]
pub fn registry() -> &'static UnboxRegistry {
    REGISTRY.get_or_init(UnboxRegistry::default)
}

/// Test-build variant of [`registry`]: never initializes implicitly.
#[cfg(any(test, feature = "test-support"))]
pub fn registry() -> &'static UnboxRegistry {
    REGISTRY.get().expect(
        "UnboxRegistry accessed before value::init() under a test build -- \
         implicit first-use initialization is forbidden in tests so state \
         stays resettable; call value::init() explicitly first",
    )
}

/// Explicit init hook. Production call sites may rely on [`registry`]'s
/// lazy init, but under a test build this is the *only* way the registry
/// becomes initialized — call this once before a test touches the
/// registry, then [`reset_for_test`] in teardown to clear bindings
/// without un-initializing it.
pub fn init() { let _ = REGISTRY.get_or_init(UnboxRegistry::default); }

/// Clears all registered bindings. Intended for test teardown only: it
/// does not un-initialize the registry, just empties it. Requires
/// [`init`] to have been called already (it does not initialize).
#[cfg(any(test, feature = "test-support"))]
pub fn reset_for_test() { registry().clear(); }
