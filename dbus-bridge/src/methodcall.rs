//! C6 MethodCall: drives a single request/reply round-trip for a
//! [`crate::method::Method`] against a [`crate::proxy::Proxy`], including
//! its wait strategy and cancellation.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use crate::error::Error;
use crate::message::{Message, MessageType};
use crate::method::Method;
use crate::proxy::Proxy;
use crate::strings::{BusName, ErrorName, Interface as InterfaceName, Member, Path};
use crate::transport::Transport;
use crate::value::Value;

/// A slice length used while pumping the transport's event loop waiting
/// on a reply, matching a conventional blocking-call poll interval.
const WAIT_SLICE: Duration = Duration::from_millis(100);
/// After this many poll iterations without a reply, yield the thread once
/// before continuing to poll, so a busy caller doesn't starve other work
/// sharing the same worker thread.
const YIELD_EVERY: u64 = 16;

/// A cooperative cancellation flag threaded into [`MethodCall::invoke`].
/// Cloning shares the same underlying flag.
#[derive(Clone, Default)]
pub struct CancellationToken(Arc<AtomicBool>);

impl CancellationToken {
    pub fn new() -> Self { CancellationToken(Arc::new(AtomicBool::new(false))) }
    pub fn cancel(&self) { self.0.store(true, Ordering::SeqCst); }
    pub fn is_cancelled(&self) -> bool { self.0.load(Ordering::SeqCst) }
}

/// One in-flight or about-to-be-sent method invocation.
pub struct MethodCall<'a> {
    transport: Arc<dyn Transport>,
    proxy: Arc<Proxy>,
    interface_name: String,
    method: &'a Method,
}

impl<'a> MethodCall<'a> {
    pub fn new(transport: Arc<dyn Transport>, proxy: Arc<Proxy>, interface_name: impl Into<String>, method: &'a Method) -> Self {
        MethodCall { transport, proxy, interface_name: interface_name.into(), method }
    }

    fn build_message(&self, args: &[Value]) -> Result<Message, Error> {
        let destination = BusName::new(self.proxy.service().to_string()).map_err(|e| Error::type_mismatch(e.to_string()))?;
        let path = Path::new(self.proxy.path().to_string()).map_err(|e| Error::type_mismatch(e.to_string()))?;
        let interface = InterfaceName::new(self.interface_name.clone()).map_err(|e| Error::type_mismatch(e.to_string()))?;
        let member = Member::new(self.method.name.clone()).map_err(|e| Error::type_mismatch(e.to_string()))?;
        let mut msg = Message::method_call(destination, path, interface, member).with_no_reply(self.method.is_oneway());
        let scope = self.proxy.scope();
        msg.set_body(&self.method.in_args, args, Some(&scope))?;
        Ok(msg)
    }

    /// Sends the call and, unless it's one-way, blocks until a reply
    /// arrives, `timeout` elapses, or `cancel` is signalled.
    pub fn invoke(&self, args: &[Value], timeout: Duration, cancel: &CancellationToken) -> Result<Vec<Value>, Error> {
        let msg = self.build_message(args)?;

        if self.method.is_oneway() {
            self.transport.send(msg)?;
            return Ok(Vec::new());
        }

        let mut pending = self.transport.send_with_reply(msg)?;
        let deadline = Instant::now() + timeout;
        let mut iterations: u64 = 0;

        loop {
            if cancel.is_cancelled() {
                pending.cancel();
                return Err(Error::cancelled());
            }
            if let Some(reply) = pending.poll() {
                return self.handle_reply(reply);
            }
            let now = Instant::now();
            if now >= deadline {
                pending.cancel();
                return Err(Error::timeout());
            }
            let slice = std::cmp::min(WAIT_SLICE, deadline - now);
            self.transport.process(slice)?;
            iterations += 1;
            if iterations % YIELD_EVERY == 0 {
                std::thread::yield_now();
            }
        }
    }

    /// Sends the call without waiting for a reply, handing back the
    /// pending-call handle so a caller (e.g. [`crate::nonblock::Connection`])
    /// can drive its own wait loop instead of [`Self::invoke`]'s.
    pub fn send_only(&self, args: &[Value], cancel: &CancellationToken) -> Result<Box<dyn crate::transport::PendingCall>, Error> {
        let _ = cancel;
        let msg = self.build_message(args)?;
        self.transport.send_with_reply(msg)
    }

    fn handle_reply(&self, reply: Message) -> Result<Vec<Value>, Error> {
        match reply.message_type {
            MessageType::MethodReturn => self.method.unmarshal_return(&reply.body),
            MessageType::Error => {
                let error_name: ErrorName<'static> = reply.error_name.clone()
                    .unwrap_or_else(|| ErrorName::new("org.freedesktop.DBus.Error.Failed").unwrap());
                let text = reply.error_message().unwrap_or_default();
                Err(Error::remote(error_name.to_string(), text))
            }
            other => Err(Error::type_mismatch(format!("unexpected {:?} as a method-call reply", other))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::arg::Argument;
    use crate::transport::mock::MockTransport;

    fn sample_method() -> Method {
        Method::new("Ping", vec![Argument::from_signature_str("i").unwrap()], vec![Argument::from_signature_str("s").unwrap()])
    }

    #[test]
    fn successful_round_trip_unmarshals_return_values() {
        let transport = MockTransport::new();
        let proxy = Proxy::new(1, "org.example.Foo", "/org/example/Foo");
        let method = sample_method();
        let call = MethodCall::new(transport.clone(), proxy, "org.example.Foo", &method);

        let cancel = CancellationToken::new();
        // Build the outgoing message ourselves to discover its serial, then
        // queue up a reply before invoking for real via a second identical
        // transport state -- simpler: invoke in a thread while the main
        // thread queues the reply once it sees the sent message appear.
        let transport_for_reply = transport.clone();
        let handle = std::thread::spawn(move || {
            loop {
                if let Some(sent) = transport_for_reply.sent_messages().into_iter().next() {
                    let mut reply = Message::method_return(&sent);
                    let out_args = vec![Argument::from_signature_str("s").unwrap()];
                    reply.set_body(&out_args, &[Value::Str("pong".into())], None).unwrap();
                    transport_for_reply.queue_reply(sent.serial, reply);
                    break;
                }
                std::thread::yield_now();
            }
        });

        let result = call.invoke(&[Value::I32(1)], Duration::from_secs(2), &cancel).unwrap();
        handle.join().unwrap();
        assert!(matches!(&result[0], Value::Str(s) if s == "pong"));
    }

    #[test]
    fn cancellation_short_circuits_before_first_poll() {
        let transport = MockTransport::new();
        let proxy = Proxy::new(1, "org.example.Foo", "/org/example/Foo");
        let method = sample_method();
        let call = MethodCall::new(transport, proxy, "org.example.Foo", &method);
        let cancel = CancellationToken::new();
        cancel.cancel();
        let err = call.invoke(&[Value::I32(1)], Duration::from_secs(1), &cancel).unwrap_err();
        assert_eq!(err.kind(), &crate::error::ErrorKind::Cancelled);
    }

    #[test]
    fn timeout_elapses_when_no_reply_is_queued() {
        let transport = MockTransport::new();
        let proxy = Proxy::new(1, "org.example.Foo", "/org/example/Foo");
        let method = sample_method();
        let call = MethodCall::new(transport, proxy, "org.example.Foo", &method);
        let cancel = CancellationToken::new();
        let err = call.invoke(&[Value::I32(1)], Duration::from_millis(50), &cancel).unwrap_err();
        assert_eq!(err.kind(), &crate::error::ErrorKind::Timeout);
    }
}
