use super::*;
use bytes::Bytes;
use serde_json::json;

fn message(id: i64, payload: Payload) -> ReassembledMessage {
    ReassembledMessage { command_id: id, payload }
}

fn json_message(id: i64, value: serde_json::Value) -> ReassembledMessage {
    message(id, Payload::Json(value))
}

#[tokio::test]
async fn response_resolves_matching_waiter() {
    let mut c = Correlator::new();
    let waiter = c.register(5).expect("register");

    assert_eq!(c.deliver(json_message(5, json!({"rows": 3}))), Delivery::Resolved);
    assert!(!c.is_pending(5));

    let payload = waiter.wait().await.expect("resolved");
    assert_eq!(payload, Payload::Json(json!({"rows": 3})));
}

#[tokio::test]
async fn binary_delta_resolves_waiter_with_delta() {
    let mut c = Correlator::new();
    let waiter = c.register(7).expect("register");
    let delta = Payload::Delta { port_id: 2, delta: Bytes::from_static(b"B") };

    assert_eq!(c.deliver(message(7, delta.clone())), Delivery::Resolved);
    assert_eq!(waiter.wait().await.expect("resolved"), delta);
}

#[tokio::test]
async fn error_payload_fails_waiter_with_remote_error() {
    let mut c = Correlator::new();
    let waiter = c.register(4).expect("register");

    let _ = c.deliver(message(4, Payload::Error("unknown table".into())));

    let err = waiter.wait().await.expect_err("remote failure");
    assert!(matches!(err, ClientError::Remote { id: 4, ref message } if message == "unknown table"));
}

#[test]
fn duplicate_registration_is_rejected() {
    let mut c = Correlator::new();
    let _waiter = c.register(1).expect("first register");

    let err = c.register(1).expect_err("duplicate");
    assert!(matches!(err, ClientError::DuplicateId(1)));
    assert_eq!(c.pending_count(), 1);
}

#[test]
fn dropped_waiter_frees_its_id() {
    let mut c = Correlator::new();
    drop(c.register(1).expect("register"));

    assert!(c.register(1).is_ok());
}

#[tokio::test]
async fn id_can_be_reused_after_resolution() {
    let mut c = Correlator::new();
    let first = c.register(2).expect("register");
    let _ = c.deliver(json_message(2, json!(1)));
    let _ = first.wait().await;

    let second = c.register(2).expect("id free again");
    let _ = c.deliver(json_message(2, json!(2)));
    assert_eq!(second.wait().await.expect("resolved"), Payload::Json(json!(2)));
}

#[test]
fn second_response_for_same_id_is_unhandled() {
    let mut c = Correlator::new();
    let _waiter = c.register(3).expect("register");

    assert_eq!(c.deliver(json_message(3, json!("a"))), Delivery::Resolved);
    assert_eq!(c.deliver(json_message(3, json!("b"))), Delivery::Unhandled);
}

#[test]
fn late_response_for_abandoned_id_is_unhandled() {
    let mut c = Correlator::new();
    let _waiter = c.register(6).expect("register");

    assert!(c.abandon(6));
    assert!(!c.abandon(6));
    assert_eq!(c.deliver(json_message(6, json!(null))), Delivery::Unhandled);
}

#[tokio::test]
async fn abandoned_waiter_reports_abandoned_not_closed() {
    let mut c = Correlator::new();
    let waiter = c.register(6).expect("register");
    let _ = c.abandon(6);

    assert!(matches!(waiter.wait().await, Err(ClientError::Abandoned { id: 6 })));
    assert!(!c.is_closed());
    assert!(c.register(6).is_ok());
}

#[test]
fn unknown_id_with_no_subscriber_is_unhandled() {
    let mut c = Correlator::new();
    assert_eq!(c.deliver(json_message(42, json!({}))), Delivery::Unhandled);
}

#[test]
fn push_goes_to_every_subscriber_of_that_id() {
    let mut c = Correlator::new();
    let mut a = c.subscribe(9).expect("subscribe");
    let mut b = c.subscribe(9).expect("subscribe");
    let mut other = c.subscribe(10).expect("subscribe");

    assert_eq!(c.deliver(json_message(9, json!({"n": 1}))), Delivery::Pushed(2));

    assert_eq!(a.try_next(), Some(json_message(9, json!({"n": 1}))));
    assert_eq!(b.try_next(), Some(json_message(9, json!({"n": 1}))));
    assert!(other.try_next().is_none());
}

#[test]
fn subscription_keeps_receiving_repeated_pushes() {
    let mut c = Correlator::new();
    let mut sub = c.subscribe(9).expect("subscribe");

    for n in 0..3 {
        assert_eq!(c.deliver(json_message(9, json!(n))), Delivery::Pushed(1));
    }

    let received: Vec<_> = std::iter::from_fn(|| sub.try_next()).collect();
    assert_eq!(received.len(), 3);
}

#[test]
fn pending_request_takes_priority_over_subscriber() {
    let mut c = Correlator::new();
    let mut sub = c.subscribe(11).expect("subscribe");
    let _waiter = c.register(11).expect("register");

    assert_eq!(c.deliver(json_message(11, json!("reply"))), Delivery::Resolved);
    assert!(sub.try_next().is_none());

    assert_eq!(c.deliver(json_message(11, json!("update"))), Delivery::Pushed(1));
    assert_eq!(sub.try_next().map(|m| m.payload), Some(Payload::Json(json!("update"))));
}

#[test]
fn wildcard_receives_only_unrouted_messages() {
    let mut c = Correlator::new();
    let mut all = c.subscribe_all().expect("subscribe_all");
    let mut nine = c.subscribe(9).expect("subscribe");

    assert_eq!(c.deliver(json_message(9, json!(1))), Delivery::Pushed(1));
    assert_eq!(c.deliver(json_message(12, json!(2))), Delivery::Pushed(1));

    assert_eq!(nine.try_next().map(|m| m.command_id), Some(9));
    assert_eq!(all.try_next().map(|m| m.command_id), Some(12));
    assert!(all.try_next().is_none());
}

#[test]
fn dropped_subscriber_falls_through_to_wildcard() {
    let mut c = Correlator::new();
    let mut all = c.subscribe_all().expect("subscribe_all");
    drop(c.subscribe(9).expect("subscribe"));

    assert_eq!(c.deliver(json_message(9, json!(1))), Delivery::Pushed(1));
    assert_eq!(all.try_next().map(|m| m.command_id), Some(9));
}

#[tokio::test]
async fn fail_all_resolves_every_waiter_with_connection_closed() {
    let mut c = Correlator::new();
    let waiters: Vec<Waiter> = (0..3).map(|id| c.register(id).expect("register")).collect();

    assert_eq!(c.fail_all(), 3);
    assert_eq!(c.pending_count(), 0);

    for waiter in waiters {
        assert!(matches!(waiter.wait().await, Err(ClientError::ConnectionClosed)));
    }
}

#[test]
fn fail_all_is_idempotent() {
    let mut c = Correlator::new();
    let _waiter = c.register(1).expect("register");

    assert_eq!(c.fail_all(), 1);
    assert_eq!(c.fail_all(), 0);
    assert!(c.is_closed());
}

#[tokio::test]
async fn fail_all_ends_subscriptions_and_rejects_new_work() {
    let mut c = Correlator::new();
    let mut sub = c.subscribe(9).expect("subscribe");
    let _ = c.fail_all();

    assert!(sub.next().await.is_none());
    assert!(matches!(c.register(1), Err(ClientError::ConnectionClosed)));
    assert!(matches!(c.subscribe(2), Err(ClientError::ConnectionClosed)));
    assert!(matches!(c.subscribe_all(), Err(ClientError::ConnectionClosed)));
}

#[tokio::test]
async fn response_after_fail_all_is_unhandled_and_waiter_sees_close_once() {
    let mut c = Correlator::new();
    let waiter = c.register(1).expect("register");
    let _ = c.fail_all();

    assert_eq!(c.deliver(json_message(1, json!("late"))), Delivery::Unhandled);
    assert!(matches!(waiter.wait().await, Err(ClientError::ConnectionClosed)));
}
