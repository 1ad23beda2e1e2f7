//! This module contains strings with a specific format, such as a valid
//! D-Bus interface name, a valid bus name, etc.
//!
//! Unlike the libdbus-backed implementation these checks are pure Rust:
//! the validation rules are the textual grammar from the D-Bus
//! specification, not a call into an external library.

use std::borrow::Cow;
use std::{fmt, ops};

/// Error returned when a string does not conform to the D-Bus grammar
/// for the kind of name being constructed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InvalidName {
    what: &'static str,
    value: String,
}

impl fmt::Display for InvalidName {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "'{}' is not a valid {}", self.value, self.what)
    }
}

impl std::error::Error for InvalidName {}

fn is_valid_bus_name(s: &str) -> bool {
    if s.is_empty() || s.len() > 255 { return false; }
    if s.starts_with(':') {
        return s[1..].split('.').all(|el| !el.is_empty() && el.chars().all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-'));
    }
    let elems: Vec<&str> = s.split('.').collect();
    if elems.len() < 2 { return false; }
    elems.iter().all(|el| {
        !el.is_empty()
            && !el.chars().next().unwrap().is_ascii_digit()
            && el.chars().all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-')
    })
}

fn is_valid_interface_or_error_name(s: &str) -> bool {
    if s.is_empty() || s.len() > 255 || s.starts_with(':') { return false; }
    let elems: Vec<&str> = s.split('.').collect();
    if elems.len() < 2 { return false; }
    elems.iter().all(|el| {
        !el.is_empty()
            && !el.chars().next().unwrap().is_ascii_digit()
            && el.chars().all(|c| c.is_ascii_alphanumeric() || c == '_')
    })
}

fn is_valid_member_name(s: &str) -> bool {
    !s.is_empty() && s.len() <= 255
        && !s.chars().next().unwrap().is_ascii_digit()
        && s.chars().all(|c| c.is_ascii_alphanumeric() || c == '_')
}

fn is_valid_object_path(s: &str) -> bool {
    if !s.starts_with('/') { return false; }
    if s == "/" { return true; }
    s[1..].split('/').all(|el| !el.is_empty() && el.chars().all(|c| c.is_ascii_alphanumeric() || c == '_'))
}

macro_rules! name_wrapper {
    ($(#[$comments:meta])* $t: ident, $check: ident, $what: expr) => {

$(#[$comments])*
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct $t<'a>(Cow<'a, str>);

impl<'a> $t<'a> {
    /// Creates a new instance of this struct, validating it against the
    /// D-Bus grammar for this kind of name.
    ///
    /// Note: if the `no-string-validation` feature is activated, this
    /// string is accepted unconditionally instead of being checked for
    /// conformance with the D-Bus specification.
    #[cfg(not(feature = "no-string-validation"))]
    pub fn new<S: Into<Cow<'a, str>>>(s: S) -> Result<Self, InvalidName> {
        let s = s.into();
        if $check(&s) { Ok($t(s)) } else { Err(InvalidName { what: $what, value: s.into_owned() }) }
    }

    #[cfg(feature = "no-string-validation")]
    pub fn new<S: Into<Cow<'a, str>>>(s: S) -> Result<Self, InvalidName> {
        Ok($t(s.into()))
    }

    /// Drops any borrow, producing an owned, `'static` value.
    pub fn into_static(self) -> $t<'static> { $t(Cow::Owned(self.0.into_owned())) }
}

impl<'a> ops::Deref for $t<'a> {
    type Target = str;
    fn deref(&self) -> &str { &self.0 }
}

impl<'a> fmt::Display for $t<'a> {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result { fmt::Display::fmt(&self.0, f) }
}

/// # Panics
/// If the given string is not a valid name of this kind.
impl<'a> From<&'a str> for $t<'a> {
    fn from(s: &'a str) -> Self { $t::new(s).unwrap() }
}

/// # Panics
/// If the given string is not a valid name of this kind.
impl From<String> for $t<'static> {
    fn from(s: String) -> Self { $t::new(s).unwrap() }
}

impl<'a> From<&'a $t<'a>> for $t<'a> {
    fn from(v: &'a $t<'a>) -> Self { $t(Cow::Borrowed(&v.0)) }
}

    }
}

name_wrapper!(
    /// A well-known or unique D-Bus bus name (a "service" in spec terms).
    BusName, is_valid_bus_name, "bus name"
);

name_wrapper!(
    /// A D-Bus interface name, e.g. `org.freedesktop.DBus.Properties`.
    Interface, is_valid_interface_or_error_name, "interface name"
);

name_wrapper!(
    /// A D-Bus error name, e.g. `org.freedesktop.DBus.Error.Failed`.
    ErrorName, is_valid_interface_or_error_name, "error name"
);

name_wrapper!(
    /// A D-Bus member name: a method, signal, or property name.
    Member, is_valid_member_name, "member name"
);

name_wrapper!(
    /// An absolute D-Bus object path, e.g. `/org/freedesktop/DBus`.
    Path, is_valid_object_path, "object path"
);

impl<'a> Default for Path<'a> {
    fn default() -> Self { Path(Cow::Borrowed("/")) }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bus_names() {
        assert!(BusName::new("org.freedesktop.DBus").is_ok());
        assert!(BusName::new(":1.42").is_ok());
        assert!(BusName::new("not-a-bus-name").is_err());
        assert!(BusName::new("").is_err());
    }

    #[test]
    fn object_paths() {
        assert!(Path::new("/").is_ok());
        assert!(Path::new("/org/freedesktop/DBus").is_ok());
        assert!(Path::new("no/leading/slash").is_err());
        assert!(Path::new("/trailing/").is_err());
        assert!(Path::new("/double//slash").is_err());
    }

    #[test]
    fn interface_names() {
        assert!(Interface::new("org.freedesktop.DBus.Properties").is_ok());
        assert!(Interface::new("NoDot").is_err());
        assert!(Interface::new("org.3bad.Name").is_err());
    }

    #[test]
    fn member_names() {
        assert!(Member::new("Ping").is_ok());
        assert!(Member::new("3Bad").is_err());
    }
}
