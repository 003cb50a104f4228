use super::*;
use serde_json::json;

fn parse(text: &str) -> Value {
    serde_json::from_str(text).expect("control frame should be JSON")
}

#[test]
fn plain_command_encodes_to_single_text_frame() {
    let encoded = encode_command(Command::new(5, "get")).expect("encode");
    assert!(encoded.payload.is_none());
    assert_eq!(parse(&encoded.control), json!({"id": 5, "cmd": "get", "args": []}));
    assert_eq!(encoded.into_frames().len(), 1);
}

#[test]
fn binary_first_argument_is_lifted_into_payload() {
    let blob = Bytes::from_static(b"\x00\x01arrow");
    let command = Command::new(7, "update").with_binary(blob.clone());

    let encoded = encode_command(command).expect("encode");

    assert_eq!(
        parse(&encoded.control),
        json!({"id": 7, "cmd": "update", "args": [{}], "is_transferable": true})
    );
    assert_eq!(encoded.payload.as_ref(), Some(&blob));
}

#[test]
fn transferable_frames_come_out_control_first() {
    let command = Command::new(7, "update")
        .with_binary(vec![9, 9, 9])
        .with_arg(json!({"port_id": 0}));

    let frames = encode_command(command).expect("encode").into_frames();

    assert_eq!(frames.len(), 2);
    let WireFrame::Text(control) = &frames[0] else {
        panic!("first frame must be the control frame");
    };
    assert_eq!(parse(control)["args"], json!([{}, {"port_id": 0}]));
    assert_eq!(frames[1], WireFrame::Binary(Bytes::from_static(&[9, 9, 9])));
}

#[test]
fn binary_argument_after_first_position_is_rejected() {
    let command = Command::new(1, "update")
        .with_arg(json!("table"))
        .with_binary(vec![1, 2]);

    let err = encode_command(command).expect_err("misplaced binary");
    assert!(matches!(err, CodecError::MisplacedBinary { position: 1 }));
}

#[test]
fn extra_fields_are_flattened_into_control_frame() {
    let command = Command::new(3, "table_method")
        .with_field("name", "superstore")
        .with_field("method", "size")
        .with_field("subscribe", false);

    let encoded = encode_command(command).expect("encode");
    let value = parse(&encoded.control);

    assert_eq!(value["name"], json!("superstore"));
    assert_eq!(value["method"], json!("size"));
    assert_eq!(value["subscribe"], json!(false));
    assert!(value.get("is_transferable").is_none());
}

#[test]
fn reserved_field_is_rejected() {
    let command = Command::new(3, "view").with_field("is_transferable", true);
    let err = encode_command(command).expect_err("reserved");
    assert!(matches!(err, CodecError::ReservedField(ref key) if key == "is_transferable"));
}

#[test]
fn loopback_restores_binary_in_original_position() {
    let original = Command::new(11, "update")
        .with_binary(vec![4, 5, 6])
        .with_arg(json!({"port_id": 2}))
        .with_field("name", "prices");

    let encoded = encode_command(original.clone()).expect("encode");
    let decoded = decode_command(&encoded.control, encoded.payload).expect("decode");

    assert_eq!(decoded, original);
}

#[test]
fn decode_requires_announced_payload() {
    let err = decode_command(r#"{"id": 2, "cmd": "update", "args": [{}], "is_transferable": true}"#, None)
        .expect_err("payload missing");
    assert!(matches!(err, CodecError::MissingPayload { id: 2 }));
}

#[test]
fn decode_rejects_unannounced_payload() {
    let err = decode_command(r#"{"id": 2, "cmd": "get"}"#, Some(Bytes::from_static(b"x")))
        .expect_err("payload unexpected");
    assert!(matches!(err, CodecError::UnexpectedPayload { id: 2 }));
}

#[test]
fn control_message_reads_port_id_from_data() {
    let msg = ControlMessage::parse(r#"{"id": 7, "is_transferable": true, "data": {"port_id": 2}}"#)
        .expect("parse");
    assert!(msg.is_transferable);
    assert_eq!(msg.port_id(), Some(2));
}

#[test]
fn control_message_without_port_id_has_none() {
    let msg = ControlMessage::parse(r#"{"id": 7, "data": [1, 2, 3]}"#).expect("parse");
    assert!(!msg.is_transferable);
    assert_eq!(msg.port_id(), None);
}

#[test]
fn control_message_ignores_unknown_keys() {
    let msg = ControlMessage::parse(r#"{"id": 1, "cmd": "whatever", "extra": 1}"#).expect("parse");
    assert_eq!(msg.id, 1);
    assert!(msg.data.is_none());
}

#[test]
fn control_message_requires_integer_id() {
    assert!(ControlMessage::parse(r#"{"data": {}}"#).is_err());
    assert!(ControlMessage::parse(r#"{"id": "seven"}"#).is_err());
    assert!(ControlMessage::parse("not json").is_err());
}

#[test]
fn control_message_constructors_serialize_compactly() {
    let header = ControlMessage::transferable(7, Some(2)).to_text().expect("text");
    assert_eq!(parse(&header), json!({"id": 7, "is_transferable": true, "data": {"port_id": 2}}));

    let reply = ControlMessage::reply(5, json!({"rows": 3})).to_text().expect("text");
    assert_eq!(parse(&reply), json!({"id": 5, "data": {"rows": 3}}));

    let failure = ControlMessage::failure(4, "unknown table").to_text().expect("text");
    assert_eq!(parse(&failure), json!({"id": 4, "error": "unknown table"}));
}
