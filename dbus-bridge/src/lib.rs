//! Type-marshalling and invocation engine bridging a dynamically typed,
//! message-passing host object system to D-Bus.
//!
//! The crate is organized around the seven components this bridge is
//! built from:
//!
//! - [`typebridge`] — numeric widening/narrowing rules between host and
//!   wire types (C1 TypeBridge).
//! - [`arg`] — the parsed signature tree and the two-way converter
//!   between wire bytes and [`value::Value`] (C2 Argument).
//! - [`method`] — a callable member's argument/return shape (C3 Method).
//! - [`interface`] — a named bundle of methods, signals, and properties,
//!   plus selector derivation (C4 Interface).
//! - [`proxy`] — a handle to a remote (or freshly exported local) object,
//!   with its warm-up lifecycle (C5 Proxy).
//! - [`methodcall`] — drives one request/reply round trip, including the
//!   wait strategy and cancellation (C6 MethodCall).
//! - [`signature`] — the signature grammar itself (C7 SignatureParser).
//!
//! [`blocking`] and [`nonblock`] are the two connection-facing
//! facades built on top, and [`export`]/[`introspect`] handle the local
//! object table and introspection XML respectively.

pub mod arg;
pub mod blocking;
pub mod error;
pub mod export;
pub mod interface;
pub mod introspect;
pub mod message;
pub mod method;
pub mod methodcall;
pub mod nonblock;
pub mod proxy;
pub mod signature;
pub mod strings;
pub mod transport;
pub mod typebridge;
pub mod value;
pub mod wire;

pub use error::{Error, ErrorKind};
pub use value::Value;
