//! A D-Bus message: the envelope carrying a method call, its reply, a
//! signal, or an error, with a marshalled argument body.
//!
//! There is no `*mut ffi::DBusMessage` here deferring to libdbus for
//! header (de)serialization: connection setup and byte-stream framing
//! are out of scope for this crate; a
//! [`crate::transport::Transport`] exchanges `Message` values directly,
//! never raw header bytes. Only the *body* — in scope as part of the
//! marshalling engine — goes through [`crate::wire`].

use crate::arg::{Argument, Scope};
use crate::error::Error;
use crate::strings::{BusName, ErrorName, Interface, Member, Path};
use crate::value::Value;

/// One of the four D-Bus message types.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MessageType {
    MethodCall = 1,
    MethodReturn = 2,
    Error = 3,
    Signal = 4,
}

/// A D-Bus message: header fields plus a marshalled body.
#[derive(Debug, Clone)]
pub struct Message {
    pub message_type: MessageType,
    pub serial: u32,
    pub path: Option<Path<'static>>,
    pub interface: Option<Interface<'static>>,
    pub member: Option<Member<'static>>,
    pub error_name: Option<ErrorName<'static>>,
    pub reply_serial: Option<u32>,
    pub destination: Option<BusName<'static>>,
    pub sender: Option<BusName<'static>>,
    pub signature: String,
    pub body: Vec<u8>,
    pub no_reply: bool,
}

impl Message {
    fn bare(message_type: MessageType) -> Self {
        Message {
            message_type,
            serial: 0,
            path: None,
            interface: None,
            member: None,
            error_name: None,
            reply_serial: None,
            destination: None,
            sender: None,
            signature: String::new(),
            body: Vec::new(),
            no_reply: false,
        }
    }

    pub fn method_call(destination: BusName<'static>, path: Path<'static>, interface: Interface<'static>, member: Member<'static>) -> Self {
        let mut m = Message::bare(MessageType::MethodCall);
        m.destination = Some(destination);
        m.path = Some(path);
        m.interface = Some(interface);
        m.member = Some(member);
        m
    }

    pub fn signal(path: Path<'static>, interface: Interface<'static>, member: Member<'static>) -> Self {
        let mut m = Message::bare(MessageType::Signal);
        m.path = Some(path);
        m.interface = Some(interface);
        m.member = Some(member);
        m
    }

    /// Builds a `MethodReturn` reply to `call`, copying its serial into
    /// `reply_serial` and its sender into `destination`.
    pub fn method_return(call: &Message) -> Self {
        let mut m = Message::bare(MessageType::MethodReturn);
        m.reply_serial = Some(call.serial);
        m.destination = call.sender.clone();
        m
    }

    /// Builds an `Error` reply to `call` carrying a single string
    /// argument (the error message) per the D-Bus convention, used for
    /// the `org.gnustep.objc.exception.<SymbolicName>` round-trip.
    pub fn error_reply(call: &Message, error_name: ErrorName<'static>, message: impl Into<String>) -> Result<Self, Error> {
        let mut m = Message::bare(MessageType::Error);
        m.reply_serial = Some(call.serial);
        m.destination = call.sender.clone();
        m.error_name = Some(error_name);
        m.set_body(&[Argument::from_signature_str("s")?], &[Value::Str(message.into())], None)?;
        Ok(m)
    }

    pub fn with_serial(mut self, serial: u32) -> Self { self.serial = serial; self }
    pub fn with_no_reply(mut self, no_reply: bool) -> Self { self.no_reply = no_reply; self }

    /// Marshals `values` against `args` and stores the resulting body and
    /// signature.
    pub fn set_body(&mut self, args: &[Argument], values: &[Value], scope: Option<&Scope>) -> Result<(), Error> {
        if args.len() != values.len() {
            return Err(Error::type_mismatch(format!(
                "argument count mismatch: expected {}, got {}", args.len(), values.len()
            )));
        }
        let mut w = crate::wire::Writer::new();
        for (arg, val) in args.iter().zip(values.iter()) {
            arg.marshal(val, &mut w, scope)?;
        }
        self.signature = args.iter().map(Argument::signature).collect();
        self.body = w.into_bytes();
        Ok(())
    }

    /// Unmarshals this message's body against the given argument shapes.
    pub fn read_body(&self, args: &[Argument]) -> Result<Vec<Value>, Error> {
        let mut r = crate::wire::Reader::new(&self.body);
        let mut out = Vec::with_capacity(args.len());
        for arg in args {
            out.push(arg.unmarshal(&mut r)?);
        }
        Ok(out)
    }

    /// The single string argument of an `Error` message body, per the
    /// D-Bus convention followed by [`Self::error_reply`].
    pub fn error_message(&self) -> Result<String, Error> {
        let args = [Argument::from_signature_str("s")?];
        match self.read_body(&args)?.into_iter().next() {
            Some(Value::Str(s)) => Ok(s),
            _ => Ok(String::new()),
        }
    }
}
