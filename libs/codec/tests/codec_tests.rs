//! # D-Bus Codec Integration Tests
//!
//! Public API behavior across modules:
//! - Wire layout of encoded messages
//! - Decoder robustness against arbitrary input
//! - Message round trips in both byte orders

use dbus_codec::{
    decode_header_fields, ByteOrder, Message, MessageType, ObjectPath, ProtocolError, Signature, Value,
    PREAMBLE_LEN, PROTOCOL_VERSION,
};
use proptest::prelude::*;

#[test]
fn test_encoded_layout() {
    let message = Message::method_call(ObjectPath::new("/org/example").unwrap(), "Ping")
        .with_serial(0x0102_0304)
        .with_arg(7u32);
    let bytes = message.encode(ByteOrder::Little).unwrap();

    assert_eq!(bytes[0], b'l');
    assert_eq!(bytes[1], MessageType::MethodCall as u8);
    assert_eq!(bytes[3], PROTOCOL_VERSION);
    assert_eq!(u32::from_le_bytes(bytes[4..8].try_into().unwrap()), 4);
    assert_eq!(u32::from_le_bytes(bytes[8..12].try_into().unwrap()), 0x0102_0304);

    let fields_len = u32::from_le_bytes(bytes[12..16].try_into().unwrap()) as usize;
    let body_start = PREAMBLE_LEN + (fields_len + 7) / 8 * 8;
    assert_eq!(bytes.len(), body_start + 4);
    assert_eq!(&bytes[body_start..], &7u32.to_le_bytes());

    let headers = decode_header_fields(&bytes, ByteOrder::Little).unwrap();
    assert_eq!(headers.member.as_deref(), Some("Ping"));
    assert_eq!(headers.signature, Some(Signature::new("u").unwrap()));
}

#[test]
fn test_big_endian_layout() {
    let message = Message::method_return(5).with_serial(1);
    let bytes = message.encode(ByteOrder::Big).unwrap();
    assert_eq!(bytes[0], b'B');
    assert_eq!(&bytes[8..12], &[0, 0, 0, 1]);
}

#[test]
fn test_required_fields_enforced() {
    let bytes = Message::method_return(3).with_serial(1).encode(ByteOrder::Little).unwrap();
    let mut as_error = bytes.clone();
    as_error[1] = MessageType::Error as u8;
    let err = Message::decode(&as_error, Vec::new()).unwrap_err();
    assert!(matches!(err, ProtocolError::MissingHeaderField { .. }));
}

#[test]
fn test_trailing_bytes_rejected() {
    let mut bytes = Message::method_return(3).with_serial(1).encode(ByteOrder::Little).unwrap();
    bytes.extend_from_slice(&[0; 8]);
    assert!(Message::decode(&bytes, Vec::new()).is_err());
}

#[test]
fn test_nested_body_roundtrip() {
    let dict = Value::Array(
        dbus_codec::Array::new(
            Signature::array_element("{sv}").unwrap(),
            vec![Value::DictEntry(
                Box::new(Value::from("answer")),
                Box::new(Value::from(42i32).into_variant()),
            )],
        )
        .unwrap(),
    );
    let message = Message::signal(ObjectPath::new("/").unwrap(), "org.example.Props", "Changed")
        .with_serial(8)
        .with_arg(dict.clone())
        .with_arg(Value::Struct(vec![Value::Byte(1), Value::Double(0.5)]));

    for order in [ByteOrder::Little, ByteOrder::Big] {
        let decoded = Message::decode(&message.encode(order).unwrap(), Vec::new()).unwrap();
        assert_eq!(decoded.body_signature(), "a{sv}(yd)");
        assert_eq!(decoded.body()[0], dict);
    }
}

proptest! {
    #[test]
    fn prop_decode_never_panics(bytes in proptest::collection::vec(any::<u8>(), 0..256)) {
        let _ = Message::decode(&bytes, Vec::new());
        let _ = decode_header_fields(&bytes, ByteOrder::Little);
    }

    #[test]
    fn prop_signature_parse_never_panics(sig in "[ybnqiuxtdsogvha(){}]{0,40}") {
        if let Ok(signature) = Signature::new(sig.clone()) {
            prop_assert_eq!(signature.as_str(), sig.as_str());
            let rejoined: Vec<u8> = signature.single_types().flatten().copied().collect();
            prop_assert_eq!(rejoined.as_slice(), sig.as_bytes());
        }
    }

    #[test]
    fn prop_message_roundtrip(
        serial in 1u32..,
        text in "\\PC{0,64}",
        number in any::<i64>(),
        big_endian in any::<bool>(),
    ) {
        let order = if big_endian { ByteOrder::Big } else { ByteOrder::Little };
        let message = Message::method_call(ObjectPath::new("/org/example/Obj").unwrap(), "Set")
            .with_serial(serial)
            .with_destination("org.example")
            .with_arg(text.as_str())
            .with_arg(number);

        let decoded = Message::decode(&message.encode(order).unwrap(), Vec::new()).unwrap();
        prop_assert_eq!(decoded.serial(), serial);
        prop_assert_eq!(decoded.body(), message.body());
        prop_assert_eq!(decoded.headers().destination.as_deref(), Some("org.example"));
    }
}
