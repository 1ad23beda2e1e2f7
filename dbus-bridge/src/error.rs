//! The bridge's error type.
//!
//! An opaque struct with a `name()`-style accessor and manual
//! `Display`/`std::error::Error` impls (no `thiserror`), carrying a
//! nine-variant taxonomy rather than a wrapped FFI `DBusError`.

use std::fmt;
use crate::signature::SignatureError;

/// D-Bus bridge error wrapper. Carries a kind, a human-readable message,
/// and an optional payload (remote error-name, offending signature, or
/// offending value description).
#[derive(Debug, Clone)]
pub struct Error {
    kind: ErrorKind,
    message: String,
    payload: Option<String>,
}

/// The bridge's error taxonomy. `DuplicateKey` is deliberately absent
/// here: a duplicate dict key is warning-only, never raised as an error
/// (logged via `log::warn!` in `arg.rs`, not surfaced here).
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ErrorKind {
    MalformedSignature,
    TypeMismatch,
    OutOfMemory,
    Disconnected,
    RemoteError { error_name: String },
    RemoteUnreachable,
    Timeout,
    Cancelled,
    UnsupportedValue,
}

impl Error {
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Error { kind, message: message.into(), payload: None }
    }

    pub fn with_payload(mut self, payload: impl Into<String>) -> Self {
        self.payload = Some(payload.into());
        self
    }

    pub fn malformed_signature(sig: &str, detail: impl fmt::Display) -> Self {
        Error::new(ErrorKind::MalformedSignature, format!("malformed signature: {}", detail)).with_payload(sig)
    }

    pub fn type_mismatch(detail: impl Into<String>) -> Self {
        Error::new(ErrorKind::TypeMismatch, detail)
    }

    pub fn out_of_memory() -> Self {
        Error::new(ErrorKind::OutOfMemory, "transport failed to enqueue message")
    }

    pub fn disconnected() -> Self {
        Error::new(ErrorKind::Disconnected, "transport closed before a reply arrived")
    }

    pub fn remote(error_name: impl Into<String>, message: impl Into<String>) -> Self {
        let error_name = error_name.into();
        Error::new(ErrorKind::RemoteError { error_name: error_name.clone() }, message).with_payload(error_name)
    }

    pub fn remote_unreachable(detail: impl Into<String>) -> Self {
        Error::new(ErrorKind::RemoteUnreachable, detail)
    }

    pub fn timeout() -> Self {
        Error::new(ErrorKind::Timeout, "method call exceeded its deadline")
    }

    pub fn cancelled() -> Self {
        Error::new(ErrorKind::Cancelled, "invocation was cancelled by the caller")
    }

    pub fn unsupported_value(detail: impl Into<String>) -> Self {
        Error::new(ErrorKind::UnsupportedValue, detail)
    }

    /// The error's kind.
    pub fn kind(&self) -> &ErrorKind { &self.kind }

    /// Human readable message, e.g. "Could not find a matching object path".
    pub fn message(&self) -> &str { &self.message }

    /// Remote D-Bus error-name, offending signature, or offending value
    /// description, when the kind carries one.
    pub fn payload(&self) -> Option<&str> { self.payload.as_deref() }

    /// The prefix a remote error-name must carry for
    /// [`Self::exception_symbol`] to recognize it as a round-tripped host
    /// exception rather than an ordinary D-Bus error.
    const EXCEPTION_PREFIX: &'static str = "org.gnustep.objc.exception.";

    /// If this is a [`ErrorKind::RemoteError`] whose error-name carries the
    /// `org.gnustep.objc.exception.` prefix, the remainder — the host
    /// exception's symbolic name, e.g. `"MyFailure"` for
    /// `"org.gnustep.objc.exception.MyFailure"` (spec §4.6 step 4, scenario
    /// S2). `None` for any other error-name or error kind.
    pub fn exception_symbol(&self) -> Option<&str> {
        match &self.kind {
            ErrorKind::RemoteError { error_name } => error_name.strip_prefix(Self::EXCEPTION_PREFIX),
            _ => None,
        }
    }

    /// The D-Bus error-name for this error, as it would be sent on the
    /// wire if this error were the result of an exported method call.
    /// The GNUstep-style exception round-trip (spec §6) uses this to
    /// encode `org.gnustep.objc.exception.<SymbolicName>`.
    pub fn name(&self) -> &str {
        match &self.kind {
            ErrorKind::MalformedSignature => "org.freedesktop.DBus.Error.InvalidSignature",
            ErrorKind::TypeMismatch => "org.freedesktop.DBus.Error.InvalidArgs",
            ErrorKind::OutOfMemory => "org.freedesktop.DBus.Error.NoMemory",
            ErrorKind::Disconnected => "org.freedesktop.DBus.Error.Disconnected",
            ErrorKind::RemoteError { error_name } => error_name,
            ErrorKind::RemoteUnreachable => "org.freedesktop.DBus.Error.ServiceUnknown",
            ErrorKind::Timeout => "org.freedesktop.DBus.Error.NoReply",
            ErrorKind::Cancelled => "org.freedesktop.DBus.Error.Failed",
            ErrorKind::UnsupportedValue => "org.freedesktop.DBus.Error.Failed",
        }
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{} ({})", self.message, self.name())
    }
}

impl std::error::Error for Error {}

impl From<SignatureError> for Error {
    fn from(e: SignatureError) -> Error {
        Error::malformed_signature(&e.signature, &e)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn remote_error_preserves_name() {
        let e = Error::remote("org.gnustep.objc.exception.MyFailure", "nope");
        assert_eq!(e.name(), "org.gnustep.objc.exception.MyFailure");
        assert_eq!(e.message(), "nope");
    }

    #[test]
    fn exception_symbol_strips_the_gnustep_prefix() {
        let e = Error::remote("org.gnustep.objc.exception.MyFailure", "nope");
        assert_eq!(e.exception_symbol(), Some("MyFailure"));
    }

    #[test]
    fn exception_symbol_is_none_for_an_ordinary_remote_error() {
        let e = Error::remote("org.freedesktop.DBus.Error.Failed", "nope");
        assert_eq!(e.exception_symbol(), None);
    }

    #[test]
    fn exception_symbol_is_none_for_non_remote_error_kinds() {
        assert_eq!(Error::timeout().exception_symbol(), None);
    }
}
