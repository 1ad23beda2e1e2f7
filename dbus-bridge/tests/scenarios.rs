//! Six end-to-end scenarios covering echo round-trips, exception
//! propagation, heterogeneous maps, blob round-trips, oneway calls, and
//! canonical selector dispatch.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use dbus_bridge::arg::Argument;
use dbus_bridge::blocking::Connection;
use dbus_bridge::error::ErrorKind;
use dbus_bridge::interface::Interface;
use dbus_bridge::message::Message;
use dbus_bridge::method::Method;
use dbus_bridge::methodcall::{CancellationToken, MethodCall};
use dbus_bridge::proxy::Proxy;
use dbus_bridge::strings::ErrorName;
use dbus_bridge::transport::mock::MockTransport;
use dbus_bridge::value::Value;

/// Initializes `env_logger` once per test binary so the `log::debug!`
/// proxy-state-transition and `log::warn!` duplicate-dict-key output
/// these scenarios exercise (`proxy.rs`, `arg.rs`) is visible under
/// `cargo test -- --nocapture`, matching how `estokes-netidx-dbus` wires
/// up the same `log`/`env_logger` pairing from its own test/binary entry
/// points rather than the library itself.
fn init_logging() {
    static INIT: std::sync::Once = std::sync::Once::new();
    INIT.call_once(|| { let _ = env_logger::try_init(); });
}

fn answer_once(transport: Arc<MockTransport>, member: &'static str, reply: impl Fn(&Message) -> Message + Send + 'static) -> std::thread::JoinHandle<()> {
    std::thread::spawn(move || loop {
        let sent = transport.sent_messages();
        if let Some(call) = sent.iter().find(|m| m.member.as_deref() == Some(member)) {
            transport.queue_reply(call.serial, reply(call));
            break;
        }
        std::thread::yield_now();
    })
}

/// S1: Invoke `Ping` (in: `s="hello"`, out: `s`) on a peer that echoes its
/// input; the caller observes `"hello"`.
#[test]
fn s1_ping_echo_round_trip() {
    init_logging();
    let transport = MockTransport::new();
    let proxy = Proxy::new(1, "org.example.Echo", "/org/example/Echo");
    let method = Method::new("Ping", vec![Argument::from_signature_str("s").unwrap()], vec![Argument::from_signature_str("s").unwrap()]);
    let call = MethodCall::new(transport.clone(), proxy, "org.example.Echo", &method);

    let handle = answer_once(transport, "Ping", |call| {
        let mut reply = Message::method_return(call);
        let out_args = vec![Argument::from_signature_str("s").unwrap()];
        reply.set_body(&out_args, &[Value::Str("hello".into())], None).unwrap();
        reply
    });

    let result = call.invoke(&[Value::Str("hello".into())], Duration::from_secs(2), &CancellationToken::new()).unwrap();
    handle.join().unwrap();
    assert!(matches!(&result[0], Value::Str(s) if s == "hello"));
}

/// S2: the peer returns an error named `org.gnustep.objc.exception.MyFailure`
/// with message `"nope"`; the caller observes that symbolic name and
/// description.
#[test]
fn s2_exception_round_trip_preserves_symbolic_name_and_message() {
    init_logging();
    let transport = MockTransport::new();
    let proxy = Proxy::new(1, "org.example.Flaky", "/org/example/Flaky");
    let method = Method::new("DoThing", Vec::new(), Vec::new());
    let call = MethodCall::new(transport.clone(), proxy, "org.example.Flaky", &method);

    let handle = answer_once(transport, "DoThing", |call| {
        let err_name = ErrorName::new("org.gnustep.objc.exception.MyFailure").unwrap();
        Message::error_reply(call, err_name, "nope").unwrap()
    });

    let err = call.invoke(&[], Duration::from_secs(2), &CancellationToken::new()).unwrap_err();
    handle.join().unwrap();
    assert_eq!(err.kind(), &ErrorKind::RemoteError { error_name: "org.gnustep.objc.exception.MyFailure".to_string() });
    assert_eq!(err.name(), "org.gnustep.objc.exception.MyFailure");
    assert_eq!(err.exception_symbol(), Some("MyFailure"));
    assert_eq!(err.message(), "nope");
}

/// S3: `{"a": 1, "b": 2.5}` marshalled as a variant promotes to `a{sv}`
/// (heterogeneous values), and unmarshals back to the same map.
#[test]
fn s3_heterogeneous_map_round_trips_as_variant_dict() {
    init_logging();
    use dbus_bridge::arg::infer_variant;
    use dbus_bridge::wire::{Reader, Writer};

    let mut entries = vec![
        (Value::Str("a".into()), Value::I32(1)),
        (Value::Str("b".into()), Value::Double(2.5)),
    ];
    entries.sort_by(|a, b| a.0.to_string().cmp(&b.0.to_string()));
    let map = Value::Dict(entries.clone());

    let inferred = infer_variant(&map, None).unwrap();
    assert_eq!(inferred.signature(), "a{sv}");

    let mut w = Writer::new();
    inferred.marshal(&map, &mut w, None).unwrap();
    let bytes = w.into_bytes();
    let mut r = Reader::new(&bytes);
    let back = inferred.unmarshal(&mut r).unwrap();

    match back {
        Value::Dict(mut back_entries) => {
            back_entries.sort_by(|a, b| a.0.to_string().cmp(&b.0.to_string()));
            assert_eq!(back_entries.len(), entries.len());
            for ((k1, v1), (k2, v2)) in entries.iter().zip(back_entries.iter()) {
                assert_eq!(k1.to_string(), k2.to_string());
                match (v1, v2) {
                    (Value::I32(a), Value::Variant(b)) => assert!(matches!(**b, Value::I32(n) if n == *a)),
                    (Value::Double(a), Value::Variant(b)) => assert!(matches!(**b, Value::Double(n) if n == *a)),
                    other => panic!("unexpected pair {:?}", other),
                }
            }
        }
        other => panic!("expected dict, got {:?}", other),
    }
}

/// S4: a 300-byte blob round-trips with bytewise identity when the
/// element arg carries the `Blob` host-class annotation.
#[test]
fn s4_blob_round_trips_with_bytewise_identity() {
    init_logging();
    use dbus_bridge::wire::{Reader, Writer};

    let bytes: Vec<u8> = (0..300u32).map(|i| (i % 256) as u8).collect();
    let mut annotations = HashMap::new();
    annotations.insert("org.gnustep.objc.class".to_string(), "Blob".to_string());
    // Apply the blob annotation to the element (byte) child, matching how
    // introspection XML attaches `org.gnustep.objc.class` to the array's
    // element arg rather than the array itself.
    let blob_arg = Argument::from_signature_str("y").unwrap().with_annotations(annotations);
    let array_of_blob = wrap_array(blob_arg);

    let mut w = Writer::new();
    array_of_blob.marshal(&Value::Blob(bytes.clone()), &mut w, None).unwrap();
    let out = w.into_bytes();
    let mut r = Reader::new(&out);
    match array_of_blob.unmarshal(&mut r).unwrap() {
        Value::Blob(back) => assert_eq!(back, bytes),
        other => panic!("expected blob, got {:?}", other),
    }
}

fn wrap_array(child: Argument) -> Argument {
    let array_sig = format!("a{}", child.signature());
    let mut array_arg = Argument::from_signature_str(&array_sig).unwrap();
    array_arg.children[0] = child;
    array_arg
}

/// S5: a oneway method annotated `NoReply` returns immediately and leaves
/// no pending-call entry behind.
#[test]
fn s5_oneway_notify_leaves_no_pending_call() {
    init_logging();
    let transport = MockTransport::new();
    let proxy = Proxy::new(1, "org.example.Notifier", "/org/example/Notifier");
    let mut annotations = HashMap::new();
    annotations.insert("org.freedesktop.DBus.Method.NoReply".to_string(), "true".to_string());
    let method = Method::new("Notify", Vec::new(), Vec::new()).with_annotations(annotations);
    let call = MethodCall::new(transport.clone(), proxy, "org.example.Notifier", &method);

    let result = call.invoke(&[], Duration::from_secs(2), &CancellationToken::new()).unwrap();
    assert!(result.is_empty());
    // The oneway send used `Transport::send`, never `send_with_reply`, so
    // there is no pending call anyone could still be waiting on.
    assert_eq!(transport.sent_messages().len(), 1);
}

/// S6: `SetFooWithBar(foo: s, bar: i)` derives a canonical selector
/// (lower-cased head, a single trailing colon regardless of how many
/// in-args the method takes) and a proxy resolves a dispatch against it.
#[test]
fn s6_canonical_selector_resolves_dispatch() {
    init_logging();
    let in_args = vec![
        Argument::from_signature_str("s").unwrap().with_name("foo"),
        Argument::from_signature_str("i").unwrap().with_name("bar"),
    ];
    let method = Method::new("SetFooWithBar", in_args, Vec::new());
    let method = Interface::install_method(method);
    let selector = method.host_selector().unwrap().to_string();
    assert_eq!(selector, "setFooWithBar:");

    let iface = Interface::new("org.example.Widget").add_method(method);
    let conn_proxy = Proxy::new(1, "org.example.Widget", "/org/example/Widget");
    conn_proxy.mark_ready(vec![iface]);
    let (iface_name, resolved) = conn_proxy.dispatch_selector(&selector).unwrap();
    assert_eq!(iface_name, "org.example.Widget");
    assert_eq!(resolved.name, "SetFooWithBar");
}

/// A `readwrite` property's synthesized getter/setter selectors dispatch
/// through `org.freedesktop.DBus.Properties.Get`/`Set` rather than a direct
/// call on the owning interface (spec §4.4, §4.5 "Properties.Get/Set").
#[test]
fn property_getter_and_setter_forward_through_dbus_properties() {
    let transport = MockTransport::new();
    let conn = Connection::new(transport.clone(), ":1.9", "/org/example/App");
    let proxy = conn.proxy("org.example.Lamp", "/org/example/Lamp");

    let xml = r#"
        <node>
          <interface name="org.example.Lamp">
            <property name="Brightness" type="i" access="readwrite"/>
          </interface>
        </node>
    "#;

    let introspect_handle = answer_once(transport.clone(), "Introspect", {
        let xml = xml.to_string();
        move |call| {
            let mut reply = Message::method_return(call);
            let out_args = vec![Argument::from_signature_str("s").unwrap()];
            reply.set_body(&out_args, &[Value::Str(xml.clone())], None).unwrap();
            reply
        }
    });

    let get_handle = answer_once(transport.clone(), "Get", |call| {
        let mut reply = Message::method_return(call);
        let out_args = vec![Argument::from_signature_str("v").unwrap()];
        let payload = Value::Variant(Box::new(Value::I32(7)));
        reply.set_body(&out_args, &[payload], None).unwrap();
        reply
    });

    let result = conn.invoke(&proxy, "brightness", &[], Duration::from_secs(2)).unwrap();
    introspect_handle.join().unwrap();
    get_handle.join().unwrap();
    assert!(matches!(&result[0], Value::I32(7)));

    let set_handle = answer_once(transport.clone(), "Set", |call| Message::method_return(call));
    let result = conn.invoke(&proxy, "setBrightness:", &[Value::I32(3)], Duration::from_secs(2)).unwrap();
    set_handle.join().unwrap();
    assert!(result.is_empty());

    let sent = transport.sent_messages();
    let set_call = sent.iter().find(|m| m.member.as_deref() == Some("Set")).unwrap();
    assert_eq!(set_call.interface.as_deref(), Some("org.freedesktop.DBus.Properties"));
}

#[test]
fn ensure_ready_then_invoke_covers_the_blocking_connection_entry_point() {
    let transport = MockTransport::new();
    let conn = Connection::new(transport.clone(), ":1.9", "/org/example/App");
    let proxy = conn.proxy("org.example.Echo", "/org/example/Echo");

    let xml = r#"
        <node>
          <interface name="org.example.Echo">
            <method name="Ping">
              <arg name="text" type="s" direction="in"/>
              <arg name="reply" type="s" direction="out"/>
            </method>
          </interface>
        </node>
    "#;

    let introspect_handle = answer_once(transport.clone(), "Introspect", {
        let xml = xml.to_string();
        move |call| {
            let mut reply = Message::method_return(call);
            let out_args = vec![Argument::from_signature_str("s").unwrap()];
            reply.set_body(&out_args, &[Value::Str(xml.clone())], None).unwrap();
            reply
        }
    });
    let ping_handle = answer_once(transport, "Ping", |call| {
        let mut reply = Message::method_return(call);
        let out_args = vec![Argument::from_signature_str("s").unwrap()];
        reply.set_body(&out_args, &[Value::Str("hello".into())], None).unwrap();
        reply
    });

    let result = conn.invoke(&proxy, "ping:", &[Value::Str("hello".into())], Duration::from_secs(2)).unwrap();
    introspect_handle.join().unwrap();
    ping_handle.join().unwrap();
    assert!(matches!(&result[0], Value::Str(s) if s == "hello"));
}
