//! A future-returning twin of [`crate::blocking::Connection`], built on
//! the same [`crate::transport::Transport`] rather than a second I/O
//! stack.
//!
//! There is no real reactor here: connection I/O is out of scope, so the
//! "non-blocking" half of this crate is really "don't block the calling
//! thread on `pending.poll()` — let an executor keep polling the
//! returned future instead." `futures-util`/`futures-channel` (the
//! teacher's own optional `futures` feature stack) provide the `Future`
//! plumbing.

use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};
use std::time::{Duration, Instant};

use futures_util::future::Future;

use crate::arg::Argument;
use crate::error::Error;
use crate::introspect;
use crate::method::Method;
use crate::methodcall::CancellationToken;
use crate::proxy::{Proxy, ProxyState};
use crate::transport::{PendingCall, Transport};
use crate::value::Value;

const INTROSPECTABLE_INTERFACE: &str = "org.freedesktop.DBus.Introspectable";
const PROPERTIES_INTERFACE: &str = "org.freedesktop.DBus.Properties";

/// A future resolving to a method call's return values. Each [`Future::poll`]
/// pumps the transport for one short slice and then checks the pending
/// call again, so driving it to completion requires an executor that
/// actually re-polls it (e.g. `futures_executor::block_on`).
pub struct MethodReply {
    transport: Arc<dyn Transport>,
    pending: Option<Box<dyn PendingCall>>,
    method_out: Vec<crate::arg::Argument>,
    deadline: Instant,
    cancel: CancellationToken,
    poll_slice: Duration,
}

impl MethodReply {
    pub(crate) fn new(transport: Arc<dyn Transport>, pending: Box<dyn PendingCall>, method: &Method, timeout: Duration, cancel: CancellationToken) -> Self {
        MethodReply {
            transport,
            pending: Some(pending),
            method_out: method.out_args.clone(),
            deadline: Instant::now() + timeout,
            cancel,
            poll_slice: Duration::from_millis(100),
        }
    }
}

impl Future for MethodReply {
    type Output = Result<Vec<Value>, Error>;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let this = self.get_mut();
        if this.cancel.is_cancelled() {
            if let Some(p) = this.pending.take() { p.cancel(); }
            return Poll::Ready(Err(Error::cancelled()));
        }
        let reply = this.pending.as_mut().and_then(|p| p.poll());
        if let Some(reply) = reply {
            let out = match reply.message_type {
                crate::message::MessageType::MethodReturn => {
                    crate::method::Method::new("", Vec::new(), this.method_out.clone()).unmarshal_return(&reply.body)
                }
                crate::message::MessageType::Error => {
                    let error_name = reply.error_name.clone()
                        .map(|n| n.to_string())
                        .unwrap_or_else(|| "org.freedesktop.DBus.Error.Failed".to_string());
                    let text = reply.error_message().unwrap_or_default();
                    Err(Error::remote(error_name, text))
                }
                other => Err(Error::type_mismatch(format!("unexpected {:?} as a method-call reply", other))),
            };
            return Poll::Ready(out);
        }
        if Instant::now() >= this.deadline {
            if let Some(p) = this.pending.take() { p.cancel(); }
            return Poll::Ready(Err(Error::timeout()));
        }
        let remaining = this.deadline - Instant::now();
        let _ = this.transport.process(std::cmp::min(this.poll_slice, remaining));
        cx.waker().wake_by_ref();
        Poll::Pending
    }
}

/// A future that resolves once `proxy` leaves Warming, pumping the
/// transport each poll so another task's in-flight introspection call
/// keeps making progress. Used by [`Connection::ensure_ready`] when a
/// second caller races an already-warming proxy instead of winning the
/// Cold -> Warming transition itself.
struct ReadyWait {
    transport: Arc<dyn Transport>,
    proxy: Arc<Proxy>,
    deadline: Instant,
    poll_slice: Duration,
}

impl Future for ReadyWait {
    type Output = Result<(), Error>;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let this = self.get_mut();
        match this.proxy.state() {
            ProxyState::Ready => return Poll::Ready(Ok(())),
            ProxyState::Invalid(reason) => return Poll::Ready(Err(Error::remote_unreachable(reason))),
            ProxyState::Cold | ProxyState::Warming => {}
        }
        if Instant::now() >= this.deadline {
            return Poll::Ready(Err(Error::timeout()));
        }
        let remaining = this.deadline - Instant::now();
        let _ = this.transport.process(std::cmp::min(this.poll_slice, remaining));
        cx.waker().wake_by_ref();
        Poll::Pending
    }
}

/// Connection-like handle that returns futures instead of blocking.
pub struct Connection {
    transport: Arc<dyn Transport>,
}

impl Connection {
    pub fn new(transport: Arc<dyn Transport>) -> Self { Connection { transport } }

    /// Sends `method` on `proxy` and returns a future for its reply.
    /// `interface_name` and the message construction mirror
    /// [`crate::methodcall::MethodCall`] exactly; this exists to hand
    /// back a `Future` instead of blocking.
    pub fn call(&self, proxy: &Arc<Proxy>, interface_name: &str, method: &Method, args: &[Value], timeout: Duration) -> Result<MethodReply, Error> {
        let call = crate::methodcall::MethodCall::new(Arc::clone(&self.transport), Arc::clone(proxy), interface_name, method);
        let cancel = CancellationToken::new();
        let pending = call.send_only(args, &cancel)?;
        Ok(MethodReply::new(Arc::clone(&self.transport), pending, method, timeout, cancel))
    }

    /// Async counterpart to [`crate::blocking::Connection::ensure_ready`]:
    /// drives a cold proxy through `Introspect` by `.await`ing its reply
    /// instead of blocking the calling thread, or awaits [`ReadyWait`] if
    /// another task already won the warm-up race.
    pub async fn ensure_ready(&self, proxy: &Arc<Proxy>, timeout: Duration) -> Result<(), Error> {
        match proxy.state() {
            ProxyState::Ready => return Ok(()),
            ProxyState::Invalid(reason) => return Err(Error::remote_unreachable(reason)),
            _ => {}
        }
        if !proxy.begin_warming() {
            return ReadyWait {
                transport: Arc::clone(&self.transport),
                proxy: Arc::clone(proxy),
                deadline: Instant::now() + timeout,
                poll_slice: Duration::from_millis(100),
            }
            .await;
        }
        let introspect_method = Method::new("Introspect", Vec::new(), vec![Argument::from_signature_str("s")?]);
        let reply = self.call(proxy, INTROSPECTABLE_INTERFACE, &introspect_method, &[], timeout)?;
        let outcome = reply.await.and_then(|values| match values.into_iter().next() {
            Some(Value::Str(xml)) => introspect::load(&xml),
            _ => Err(Error::remote_unreachable("introspection reply carried no XML payload")),
        });
        match outcome {
            Ok(interfaces) => { proxy.mark_ready(interfaces); Ok(()) }
            Err(e) => { proxy.mark_invalid(e.message().to_string()); Err(Error::remote_unreachable(e.message().to_string())) }
        }
    }

    /// The async dynamic dispatch entry point mirroring
    /// [`crate::blocking::Connection::invoke`]: ensures `proxy` is warm,
    /// resolves `selector` against its cached interfaces, then awaits the
    /// resulting call.
    pub async fn invoke(&self, proxy: &Arc<Proxy>, selector: &str, args: &[Value], timeout: Duration) -> Result<Vec<Value>, Error> {
        self.ensure_ready(proxy, timeout).await?;
        let (interface_name, method) = proxy.dispatch_selector(selector)?;
        if let Some((property_name, member)) = method.property_forward() {
            return self.forward_property_call(proxy, &interface_name, property_name, member, args, timeout).await;
        }
        self.call(proxy, &interface_name, &method, args, timeout)?.await
    }

    /// Async counterpart to
    /// [`crate::blocking::Connection::forward_property_call`]: issues a
    /// `Properties.Get`/`Properties.Set` call in place of a synthesized
    /// property-accessor method.
    async fn forward_property_call(&self, proxy: &Arc<Proxy>, interface_name: &str, property_name: &str, member: &str, args: &[Value], timeout: Duration) -> Result<Vec<Value>, Error> {
        match member {
            "Get" => {
                let get_method = Method::new(
                    "Get",
                    vec![Argument::from_signature_str("s")?, Argument::from_signature_str("s")?],
                    vec![Argument::from_signature_str("v")?],
                );
                let call_args = [Value::Str(interface_name.to_string()), Value::Str(property_name.to_string())];
                let result = self.call(proxy, PROPERTIES_INTERFACE, &get_method, &call_args, timeout)?.await?;
                match result.into_iter().next() {
                    Some(Value::Variant(inner)) => Ok(vec![*inner]),
                    Some(other) => Ok(vec![other]),
                    None => Err(Error::type_mismatch("Properties.Get reply carried no value")),
                }
            }
            "Set" => {
                let value = args.first().cloned()
                    .ok_or_else(|| Error::type_mismatch("Properties.Set requires exactly one argument"))?;
                let set_method = Method::new(
                    "Set",
                    vec![Argument::from_signature_str("s")?, Argument::from_signature_str("s")?, Argument::from_signature_str("v")?],
                    Vec::new(),
                );
                let call_args = [
                    Value::Str(interface_name.to_string()),
                    Value::Str(property_name.to_string()),
                    Value::Variant(Box::new(value)),
                ];
                self.call(proxy, PROPERTIES_INTERFACE, &set_method, &call_args, timeout)?.await
            }
            other => Err(Error::type_mismatch(format!("unrecognized property-forward member '{}'", other))),
        }
    }
}
