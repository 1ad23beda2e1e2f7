//! Dynamic-dispatch walkthrough: a cold proxy warms itself through
//! `Introspect`, then a bare host selector resolves to the right
//! interface/method and round-trips a call. Needs a real bus connection
//! to be worth anything outside a demo, so this drives a `MockTransport`
//! instead and answers its own introspection/call on a background thread
//! (run with `--features test-support`).

use std::time::Duration;

use dbus_bridge::arg::Argument;
use dbus_bridge::blocking::Connection;
use dbus_bridge::message::Message;
use dbus_bridge::transport::mock::MockTransport;
use dbus_bridge::value::Value;

const INTROSPECTION: &str = r#"
    <node>
      <interface name="org.example.Greeter">
        <method name="Greet">
          <arg name="name" type="s" direction="in"/>
          <arg name="reply" type="s" direction="out"/>
        </method>
      </interface>
    </node>
"#;

fn main() {
    let transport = MockTransport::new();
    let conn = Connection::new(transport.clone(), ":1.1", "/org/example/Client");
    let proxy = conn.proxy("org.example.Greeter", "/org/example/Greeter");

    let responder = {
        let transport = transport.clone();
        std::thread::spawn(move || {
            loop {
                if let Some(introspect) = transport.sent_messages().iter().find(|m| m.member.as_deref() == Some("Introspect")) {
                    let mut reply = Message::method_return(introspect);
                    reply.set_body(&[Argument::from_signature_str("s").unwrap()], &[Value::Str(INTROSPECTION.to_string())], None).unwrap();
                    transport.queue_reply(introspect.serial, reply);
                    break;
                }
                std::thread::yield_now();
            }
            loop {
                if let Some(call) = transport.sent_messages().iter().find(|m| m.member.as_deref() == Some("Greet")) {
                    let mut reply = Message::method_return(call);
                    reply.set_body(&[Argument::from_signature_str("s").unwrap()], &[Value::Str("hello, world".into())], None).unwrap();
                    transport.queue_reply(call.serial, reply);
                    break;
                }
                std::thread::yield_now();
            }
        })
    };

    // "Greet" with one in-arg named "name" canonicalizes to "greet:".
    let reply = conn.invoke(&proxy, "greet:", &[Value::Str("world".into())], Duration::from_secs(2)).unwrap();
    responder.join().unwrap();
    if let Some(Value::Str(s)) = reply.into_iter().next() {
        println!("{}", s);
    }
}
