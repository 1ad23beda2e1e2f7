//! Demonstrates `org.freedesktop.DBus.Properties` forwarding: a
//! `readwrite` property declared in introspection XML gets a synthesized
//! getter/setter pair (`Interface::install_properties`), and dispatching
//! through either one issues a `Properties.Get`/`Properties.Set` call
//! rather than a direct call on the owning interface (run with
//! `--features test-support`).

use std::time::Duration;

use dbus_bridge::arg::Argument;
use dbus_bridge::blocking::Connection;
use dbus_bridge::message::Message;
use dbus_bridge::transport::mock::MockTransport;
use dbus_bridge::value::Value;

const INTROSPECTION: &str = r#"
    <node>
      <interface name="org.example.Lamp">
        <property name="Brightness" type="i" access="readwrite"/>
      </interface>
    </node>
"#;

fn answer_once(transport: std::sync::Arc<MockTransport>, member: &'static str, reply: impl Fn(&Message) -> Message + Send + 'static) -> std::thread::JoinHandle<()> {
    std::thread::spawn(move || loop {
        if let Some(call) = transport.sent_messages().iter().find(|m| m.member.as_deref() == Some(member)) {
            transport.queue_reply(call.serial, reply(call));
            break;
        }
        std::thread::yield_now();
    })
}

fn main() {
    let transport = MockTransport::new();
    let conn = Connection::new(transport.clone(), ":1.1", "/org/example/Client");
    let proxy = conn.proxy("org.example.Lamp", "/org/example/Lamp");

    let intro = answer_once(transport.clone(), "Introspect", |call| {
        let mut reply = Message::method_return(call);
        reply.set_body(&[Argument::from_signature_str("s").unwrap()], &[Value::Str(INTROSPECTION.to_string())], None).unwrap();
        reply
    });
    let get = answer_once(transport.clone(), "Get", |call| {
        let mut reply = Message::method_return(call);
        let payload = Value::Variant(Box::new(Value::I32(40)));
        reply.set_body(&[Argument::from_signature_str("v").unwrap()], &[payload], None).unwrap();
        reply
    });
    let brightness = conn.invoke(&proxy, "brightness", &[], Duration::from_secs(2)).unwrap();
    intro.join().unwrap();
    get.join().unwrap();
    if let Some(Value::I32(n)) = brightness.into_iter().next() {
        println!("current brightness: {}", n);
    }

    let set = answer_once(transport, "Set", |call| Message::method_return(call));
    conn.invoke(&proxy, "setBrightness:", &[Value::I32(80)], Duration::from_secs(2)).unwrap();
    set.join().unwrap();
    println!("brightness set to 80");
}
