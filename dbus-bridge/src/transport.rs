//! The seam between this crate's marshalling/invocation engine and an
//! actual bus connection.
//!
//! Connection setup and the wire I/O loop are explicitly out of scope,
//! but [`crate::methodcall::MethodCall`] and [`crate::proxy::Proxy`]
//! still need *something* to send messages through and receive replies
//! from. The teacher splits this into a
//! `BlockingSender` trait (send, block for a reply) and a `NonblockReply`
//! trait (send, get a future-ish handle back); this crate generalizes
//! both into one `Transport` trait so `blocking.rs` and `nonblock.rs` can
//! share an implementation instead of duplicating dispatch logic.

use std::time::Duration;

use crate::error::Error;
use crate::message::Message;

/// A handle to a method call that is in flight, generalized away from
/// any concrete connection type.
pub trait PendingCall: Send {
    /// Returns the reply if it has arrived, without blocking.
    fn poll(&mut self) -> Option<Message>;
    /// Abandons the call. A transport is free to let an in-flight reply
    /// arrive and be dropped silently.
    fn cancel(self: Box<Self>);
}

/// Something that can move [`Message`]s to and from a bus (or a stand-in
/// for one, in tests). Implementations drive their own I/O loop;
/// [`Self::process`] is this crate's only window into that loop, used by
/// [`crate::methodcall::MethodCall`]'s wait strategy.
pub trait Transport: Send + Sync {
    /// Sends a message with no reply expected (a signal, or a method call
    /// with `NoReply` set), returning the serial it was assigned.
    fn send(&self, msg: Message) -> Result<u32, Error>;

    /// Sends a method call and returns a handle for polling its reply.
    fn send_with_reply(&self, msg: Message) -> Result<Box<dyn PendingCall>, Error>;

    /// Pumps the transport's event loop for up to `timeout`, returning any
    /// unsolicited messages received (signals, or calls routed to a
    /// locally exported object) during that slice.
    fn process(&self, timeout: Duration) -> Result<Vec<Message>, Error>;
}

/// An in-memory [`Transport`] for tests: every sent message is recorded,
/// and replies are handed back by enqueuing them against a serial ahead
/// of time with [`MockTransport::queue_reply`], standing in for a real
/// connection without a wire or event loop.
#[cfg(any(test, feature = "test-support"))]
pub mod mock {
    use super::*;
    use std::collections::HashMap;
    use std::collections::VecDeque;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::{Arc, Mutex};

    #[derive(Default)]
    pub struct MockTransport {
        next_serial: AtomicU32,
        sent: Mutex<Vec<Message>>,
        replies: Arc<Mutex<HashMap<u32, Message>>>,
        inbound: Mutex<VecDeque<Message>>,
    }

    impl MockTransport {
        pub fn new() -> Arc<MockTransport> { Arc::new(MockTransport::default()) }

        /// Programs the reply that will be handed back for the call with
        /// the given serial.
        pub fn queue_reply(&self, serial: u32, reply: Message) {
            self.replies.lock().unwrap().insert(serial, reply);
        }

        /// Queues an unsolicited message (e.g. a signal) to be surfaced
        /// by the next [`Transport::process`] call.
        pub fn queue_inbound(&self, msg: Message) {
            self.inbound.lock().unwrap().push_back(msg);
        }

        pub fn sent_messages(&self) -> Vec<Message> { self.sent.lock().unwrap().clone() }

        fn next_serial(&self) -> u32 { self.next_serial.fetch_add(1, Ordering::SeqCst) + 1 }
    }

    impl Transport for MockTransport {
        fn send(&self, mut msg: Message) -> Result<u32, Error> {
            let serial = self.next_serial();
            msg.serial = serial;
            self.sent.lock().unwrap().push(msg);
            Ok(serial)
        }

        fn send_with_reply(&self, msg: Message) -> Result<Box<dyn PendingCall>, Error> {
            let serial = self.send(msg)?;
            Ok(Box::new(MockPendingCall { serial, replies: Arc::clone(&self.replies) }))
        }

        fn process(&self, _timeout: Duration) -> Result<Vec<Message>, Error> {
            Ok(self.inbound.lock().unwrap().drain(..).collect())
        }
    }

    struct MockPendingCall {
        serial: u32,
        replies: Arc<Mutex<HashMap<u32, Message>>>,
    }

    impl PendingCall for MockPendingCall {
        fn poll(&mut self) -> Option<Message> {
            self.replies.lock().unwrap().remove(&self.serial)
        }
        fn cancel(self: Box<Self>) {}
    }

}
