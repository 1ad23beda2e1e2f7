//! C5 Proxy: a local stand-in for a remote (or freshly auto-exported
//! local) D-Bus object, with a cold/warming/ready/invalid lifecycle.
//!
//! A blocking client library can get away with modeling a connected
//! object as a thin wrapper held entirely by the caller; this crate
//! instead needs a process-shared, reference-counted handle, since
//! [`crate::value::Value`] embeds proxies inside arbitrary host values
//! that outlive any single call. `Arc` plus an internal `Mutex`/`Condvar`
//! pair is the idiomatic substitute.

use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, Condvar, Mutex};
use std::time::{Duration, Instant};

use crate::arg::Scope;
use crate::error::Error;
use crate::interface::Interface;
use crate::method::Method;

/// Lifecycle state of a [`Proxy`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProxyState {
    /// Freshly constructed; introspection has not been requested yet.
    Cold,
    /// An introspection round-trip is in flight.
    Warming,
    /// Interfaces are known; method calls may proceed.
    Ready,
    /// The remote object is known gone (service vanished, or introspection
    /// permanently failed); carries the reason.
    Invalid(String),
}

/// A handle to a remote object, or to a local object freshly exported
/// under an auto-minted path.
pub struct Proxy {
    endpoint_id: u64,
    service: String,
    path: String,
    exported_path: Option<String>,
    state: Mutex<ProxyState>,
    interfaces: Mutex<HashMap<String, Interface>>,
    /// The interface name a selector most recently resolved to, used to
    /// break ties when the same selector is installed on more than one
    /// cached interface.
    last_interface: Mutex<Option<String>>,
    ready_cond: Condvar,
}

impl Proxy {
    /// Creates a cold proxy for a remote object reachable at `service`/`path`
    /// over the connection identified by `endpoint_id`.
    pub fn new(endpoint_id: u64, service: impl Into<String>, path: impl Into<String>) -> Arc<Proxy> {
        Arc::new(Proxy {
            endpoint_id,
            service: service.into(),
            path: path.into(),
            exported_path: None,
            state: Mutex::new(ProxyState::Cold),
            interfaces: Mutex::new(HashMap::new()),
            last_interface: Mutex::new(None),
            ready_cond: Condvar::new(),
        })
    }

    /// Creates a proxy standing in for a value this process just exported
    /// under an auto-minted path, so it can travel back out as an
    /// object-path argument.
    pub fn new_local_export(endpoint_id: u64, own_service: impl Into<String>, path: impl Into<String>) -> Arc<Proxy> {
        let path = path.into();
        Arc::new(Proxy {
            endpoint_id,
            service: own_service.into(),
            path: path.clone(),
            exported_path: Some(path),
            state: Mutex::new(ProxyState::Ready),
            interfaces: Mutex::new(HashMap::new()),
            last_interface: Mutex::new(None),
            ready_cond: Condvar::new(),
        })
    }

    pub fn service(&self) -> &str { &self.service }
    pub fn path(&self) -> &str { &self.path }
    pub fn endpoint_id(&self) -> u64 { self.endpoint_id }

    /// The path this proxy is exported at in this process, if it stands
    /// for a local object rather than (or in addition to) a remote one.
    pub fn locally_exported_path(&self) -> Option<String> { self.exported_path.clone() }

    /// The (endpoint, service) scope used to decide whether an object-path
    /// argument may be forwarded as a bare path versus needing a local
    /// re-export.
    pub fn scope(&self) -> Scope {
        Scope { endpoint_id: self.endpoint_id, service: self.service.clone() }
    }

    pub fn state(&self) -> ProxyState { self.state.lock().unwrap().clone() }

    pub fn interfaces(&self) -> Vec<String> { self.interfaces.lock().unwrap().keys().cloned().collect() }

    /// Transitions Cold -> Warming. Returns `true` if this call performed
    /// the transition (i.e. the caller is responsible for driving
    /// introspection); `false` if another caller got there first, or the
    /// proxy is already past Cold, in which case the caller should instead
    /// wait on [`Self::wait_until_ready`].
    pub fn begin_warming(&self) -> bool {
        let mut state = self.state.lock().unwrap();
        if *state == ProxyState::Cold {
            log::debug!("proxy {}{} warming up", self.service, self.path);
            *state = ProxyState::Warming;
            true
        } else {
            false
        }
    }

    /// Transitions to Ready with the given interface set, waking any
    /// threads blocked in [`Self::wait_until_ready`].
    pub fn mark_ready(&self, interfaces: Vec<Interface>) {
        {
            let mut state = self.state.lock().unwrap();
            log::debug!("proxy {}{} ready with {} interface(s)", self.service, self.path, interfaces.len());
            *state = ProxyState::Ready;
        }
        *self.interfaces.lock().unwrap() = interfaces.into_iter().map(|i| (i.name.clone(), i)).collect();
        self.ready_cond.notify_all();
    }

    /// Resolves a host dispatch selector to the interface and method that
    /// should handle it, by searching every cached interface's methods for
    /// one whose `org.gnustep.objc.selector` annotation matches.
    ///
    /// Exactly one match resolves directly. Multiple matches in distinct
    /// interfaces are broken by preferring whichever interface this proxy
    /// most recently dispatched to; if that doesn't narrow it to one,
    /// resolution fails as ambiguous rather than guessing.
    pub fn dispatch_selector(&self, selector: &str) -> Result<(String, Method), Error> {
        let interfaces = self.interfaces.lock().unwrap();
        let mut candidates: Vec<(&String, &Method)> = Vec::new();
        for (name, iface) in interfaces.iter() {
            for method in &iface.methods {
                if method.host_selector() == Some(selector) {
                    candidates.push((name, method));
                }
            }
        }
        match candidates.len() {
            0 => Err(Error::type_mismatch(format!("no method on {} answers selector '{}'", self.path, selector))),
            1 => {
                let (name, method) = candidates[0];
                *self.last_interface.lock().unwrap() = Some(name.clone());
                Ok((name.clone(), method.clone()))
            }
            _ => {
                let last = self.last_interface.lock().unwrap().clone();
                if let Some(last) = last {
                    if let Some((name, method)) = candidates.iter().find(|(n, _)| **n == last) {
                        return Ok(((*name).clone(), (*method).clone()));
                    }
                }
                Err(Error::type_mismatch(format!(
                    "selector '{}' is ambiguous across {} interfaces on {}", selector, candidates.len(), self.path
                )))
            }
        }
    }

    /// Transitions to Invalid, waking any threads blocked in
    /// [`Self::wait_until_ready`] so they can observe the failure.
    pub fn mark_invalid(&self, reason: impl Into<String>) {
        let reason = reason.into();
        {
            let mut state = self.state.lock().unwrap();
            log::debug!("proxy {}{} invalidated: {}", self.service, self.path, reason);
            *state = ProxyState::Invalid(reason);
        }
        self.ready_cond.notify_all();
    }

    /// Blocks the calling thread until the proxy reaches Ready or Invalid,
    /// or until `timeout` elapses. Does not itself drive introspection;
    /// the caller (normally [`crate::methodcall::MethodCall`]) is
    /// responsible for kicking off warming.
    pub fn wait_until_ready(&self, timeout: Duration) -> Result<(), Error> {
        let deadline = Instant::now() + timeout;
        let mut state = self.state.lock().unwrap();
        loop {
            match &*state {
                ProxyState::Ready => return Ok(()),
                ProxyState::Invalid(reason) => return Err(Error::remote_unreachable(reason.clone())),
                ProxyState::Cold | ProxyState::Warming => {}
            }
            let now = Instant::now();
            if now >= deadline { return Err(Error::timeout()); }
            let (guard, result) = self.ready_cond.wait_timeout(state, deadline - now).unwrap();
            state = guard;
            if result.timed_out() {
                if let ProxyState::Ready = &*state { return Ok(()); }
                return Err(Error::timeout());
            }
        }
    }
}

impl fmt::Debug for Proxy {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_struct("Proxy")
            .field("service", &self.service)
            .field("path", &self.path)
            .field("state", &self.state())
            .finish()
    }
}

impl PartialEq for Proxy {
    fn eq(&self, other: &Self) -> bool {
        self.endpoint_id == other.endpoint_id && self.service == other.service && self.path == other.path
    }
}
impl Eq for Proxy {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn scope_equality_matches_same_endpoint_and_service() {
        let a = Proxy::new(1, "org.example.Foo", "/a");
        let b = Proxy::new(1, "org.example.Foo", "/b");
        let c = Proxy::new(2, "org.example.Foo", "/a");
        assert_eq!(a.scope(), b.scope());
        assert_ne!(a.scope(), c.scope());
    }

    #[test]
    fn ready_then_wait_returns_immediately() {
        let p = Proxy::new(1, "org.example.Foo", "/a");
        assert!(p.begin_warming());
        p.mark_ready(vec![Interface::new("org.example.Foo")]);
        assert!(p.wait_until_ready(Duration::from_millis(10)).is_ok());
        assert_eq!(p.interfaces(), vec!["org.example.Foo".to_string()]);
    }

    #[test]
    fn second_begin_warming_call_does_not_repeat_the_transition() {
        let p = Proxy::new(1, "org.example.Foo", "/a");
        assert!(p.begin_warming());
        assert!(!p.begin_warming());
    }

    #[test]
    fn invalid_proxy_fails_wait() {
        let p = Proxy::new(1, "org.example.Foo", "/a");
        p.mark_invalid("service vanished");
        assert!(p.wait_until_ready(Duration::from_millis(10)).is_err());
    }

    #[test]
    fn local_export_is_ready_immediately() {
        let p = Proxy::new_local_export(1, ":1.42", "/auto/1");
        assert_eq!(p.state(), ProxyState::Ready);
        assert_eq!(p.locally_exported_path().as_deref(), Some("/auto/1"));
    }

    fn method_on(iface: &str, selector: &str) -> Interface {
        let m = Method::new(selector, Vec::new(), Vec::new())
            .with_annotations([("org.gnustep.objc.selector".to_string(), selector.to_string())].into_iter().collect());
        Interface::new(iface).add_method(m)
    }

    #[test]
    fn dispatch_selector_resolves_unique_match() {
        let p = Proxy::new(1, "org.example.Foo", "/a");
        p.mark_ready(vec![method_on("org.example.Lamp", "ping")]);
        let (iface, method) = p.dispatch_selector("ping").unwrap();
        assert_eq!(iface, "org.example.Lamp");
        assert_eq!(method.name, "ping");
    }

    #[test]
    fn dispatch_selector_fails_for_unknown_selector() {
        let p = Proxy::new(1, "org.example.Foo", "/a");
        p.mark_ready(vec![method_on("org.example.Lamp", "ping")]);
        assert!(p.dispatch_selector("pong").is_err());
    }

    #[test]
    fn dispatch_selector_breaks_ties_with_most_recently_used_interface() {
        let p = Proxy::new(1, "org.example.Foo", "/a");
        p.mark_ready(vec![method_on("org.example.A", "shared"), method_on("org.example.B", "shared")]);
        // No prior usage: genuinely ambiguous.
        assert!(p.dispatch_selector("shared").is_err());
        // Resolve a selector unique to B, marking it as most-recently-used...
        p.mark_ready(vec![
            method_on("org.example.A", "shared"),
            method_on("org.example.B", "shared"),
        ]);
        {
            let mut ifaces = p.interfaces.lock().unwrap();
            ifaces.get_mut("org.example.B").unwrap().methods.push(Method::new("onlyOnB", Vec::new(), Vec::new()).with_annotations(
                [("org.gnustep.objc.selector".to_string(), "onlyOnB".to_string())].into_iter().collect(),
            ));
        }
        p.dispatch_selector("onlyOnB").unwrap();
        let (iface, _) = p.dispatch_selector("shared").unwrap();
        assert_eq!(iface, "org.example.B");
    }
}
