//! Integration tests for the RPC channel.
//!
//! Two styles of peer: a real `RpcChannel` on both ends, and a manual peer
//! that speaks the wire format directly over one end of a duplex pair, for
//! asserting exact message traffic.

use std::sync::Arc;
use std::time::Duration;

use serde_json::Value;
use serde_json::json;

use nbrpc::Duplex;
use nbrpc::Exception;
use nbrpc::Handlers;
use nbrpc::RpcChannel;
use nbrpc::Transport;
use nbrpc::channel;

/// Receives the next object on a raw transport end, with a deadline.
async fn recv_object(transport: &Duplex) -> Value {
    tokio::time::timeout(Duration::from_secs(1), transport.recv())
        .await
        .expect("Timed out waiting for a message")
        .expect("Transport failed")
        .expect("Transport closed")
}

/// Receives the next non-handshake object on a raw transport end.
async fn recv_traffic(transport: &Duplex) -> Value {
    loop {
        let object = recv_object(transport).await;
        match object["type"].as_str() {
            Some("syn") | Some("ack") => continue,
            _ => return object,
        }
    }
}

/// Asserts that nothing arrives on a raw transport end for a short window.
async fn assert_silent(transport: &Duplex) {
    let result = tokio::time::timeout(Duration::from_millis(50), transport.recv()).await;
    assert!(result.is_err(), "Expected silence, got {:?}", result);
}

/// Completes the handshake from the manual side: consumes the channel's syn,
/// answers with ack.
async fn manual_handshake(transport: &Duplex) {
    let syn = recv_object(transport).await;
    assert_eq!(syn, json!({"type": "syn"}));
    transport.send(json!({"type": "ack"})).await.expect("Ack send failed");
}

// --- Test 1: Echo scenario ---

#[tokio::test]
async fn test_echo_roundtrip() {
    let (host_end, peer_end) = Duplex::pair();

    let _peer = RpcChannel::new(
        Box::new(peer_end),
        Handlers::new().register("echo", |mut args| async move { Ok(args.remove(0)) }),
    );
    let host = RpcChannel::new(Box::new(host_end), Handlers::new());

    let result = host.call("echo", vec![json!(42)]).await.expect("Call failed");
    assert_eq!(result, json!(42));
}

// --- Test 2: Boom scenario (remote throw preserves message and stack) ---

#[tokio::test]
async fn test_remote_throw_preserves_message_and_stack() {
    let (host_end, peer_end) = Duplex::pair();

    let _peer = RpcChannel::new(
        Box::new(peer_end),
        Handlers::new().register("boom", |_args| async move {
            Err::<Value, _>(Exception::with_stack("x", "Error: x\n    at boom_site"))
        }),
    );
    let host = RpcChannel::new(Box::new(host_end), Handlers::new());

    let err = host.call("boom", vec![]).await.unwrap_err();
    match err {
        channel::Error::Remote(exception) => {
            assert_eq!(exception.message, "x");
            assert_eq!(exception.stack, "Error: x\n    at boom_site");
            assert!(!exception.stack.is_empty());
        }
        other => panic!("Expected remote exception, got {:?}", other),
    }
}

// --- Test 3: Unknown handler rejects, callee survives ---

#[tokio::test]
async fn test_unknown_handler_rejects() {
    let (host_end, peer_end) = Duplex::pair();

    let _peer = RpcChannel::new(
        Box::new(peer_end),
        Handlers::new().register("echo", |mut args| async move { Ok(args.remove(0)) }),
    );
    let host = RpcChannel::new(Box::new(host_end), Handlers::new());

    let err = host.call("missing", vec![]).await.unwrap_err();
    match err {
        channel::Error::Remote(exception) => {
            assert!(exception.message.contains("missing"));
        }
        other => panic!("Expected remote exception, got {:?}", other),
    }

    // The miss was not fatal to the callee.
    let result = host.call("echo", vec![json!("still alive")]).await.expect("Call failed");
    assert_eq!(result, json!("still alive"));
}

// --- Test 4: Concurrent calls settle independently, out of order ---

#[tokio::test]
async fn test_concurrent_calls_out_of_order() {
    let (host_end, manual) = Duplex::pair();
    let host = Arc::new(RpcChannel::new(Box::new(host_end), Handlers::new()));

    manual_handshake(&manual).await;

    let first = tokio::spawn({
        let host = host.clone();
        async move { host.call("first", vec![]).await }
    });
    let second = tokio::spawn({
        let host = host.clone();
        async move { host.call("second", vec![]).await }
    });

    // Collect both calls, then reply in reverse order of arrival.
    let call_a = recv_traffic(&manual).await;
    let call_b = recv_traffic(&manual).await;
    for call in [&call_b, &call_a] {
        let id = call["id"].as_str().expect("Call should carry an id");
        let result = json!(format!("result of {}", call["handler"].as_str().unwrap()));
        manual
            .send(json!({"type": "return", "id": id, "result": result}))
            .await
            .expect("Return send failed");
    }

    let first = first.await.unwrap().expect("First call failed");
    let second = second.await.unwrap().expect("Second call failed");
    assert_eq!(first, json!("result of first"));
    assert_eq!(second, json!("result of second"));
}

// --- Test 5: Calls wait for the handshake ---

#[tokio::test]
async fn test_call_waits_for_handshake() {
    let (host_end, manual) = Duplex::pair();
    let host = Arc::new(RpcChannel::new(Box::new(host_end), Handlers::new()));

    let pending = tokio::spawn({
        let host = host.clone();
        async move { host.call("early", vec![json!(1)]).await }
    });

    // The channel announces itself, but the call must not cross yet.
    let syn = recv_object(&manual).await;
    assert_eq!(syn, json!({"type": "syn"}));
    assert_silent(&manual).await;

    // Readiness releases the suspended caller immediately.
    manual.send(json!({"type": "ack"})).await.expect("Ack send failed");
    let call = recv_traffic(&manual).await;
    assert_eq!(call["type"], "call");
    assert_eq!(call["handler"], "early");
    assert_eq!(call["args"], json!([1]));

    let id = call["id"].as_str().unwrap();
    manual
        .send(json!({"type": "return", "id": id, "result": "ok"}))
        .await
        .expect("Return send failed");
    assert_eq!(pending.await.unwrap().expect("Call failed"), json!("ok"));
}

// --- Test 6: Redundant handshake traffic after readiness ---

#[tokio::test]
async fn test_redundant_syn_gets_no_duplicate_ack() {
    let (host_end, manual) = Duplex::pair();
    let host = Arc::new(RpcChannel::new(Box::new(host_end), Handlers::new()));

    // Both sides syn; the channel acks ours and is now ready.
    let syn = recv_object(&manual).await;
    assert_eq!(syn, json!({"type": "syn"}));
    manual.send(json!({"type": "syn"})).await.expect("Syn send failed");
    let ack = recv_object(&manual).await;
    assert_eq!(ack, json!({"type": "ack"}));

    // A redundant syn after readiness produces no second ack.
    manual.send(json!({"type": "syn"})).await.expect("Syn send failed");
    assert_silent(&manual).await;

    // A redundant ack is equally inert, and the channel still works.
    manual.send(json!({"type": "ack"})).await.expect("Ack send failed");
    let pending = tokio::spawn({
        let host = host.clone();
        async move { host.call("ping", vec![]).await }
    });
    let call = recv_traffic(&manual).await;
    let id = call["id"].as_str().unwrap();
    manual
        .send(json!({"type": "return", "id": id, "result": "pong"}))
        .await
        .expect("Return send failed");
    assert_eq!(pending.await.unwrap().expect("Call failed"), json!("pong"));
}

// --- Test 7: Unmatched returns are silently ignored ---

#[tokio::test]
async fn test_unmatched_return_has_no_effect() {
    let (host_end, manual) = Duplex::pair();
    let host = Arc::new(RpcChannel::new(Box::new(host_end), Handlers::new()));

    manual_handshake(&manual).await;
    manual
        .send(json!({"type": "return", "id": "not-ours", "result": 1}))
        .await
        .expect("Send failed");

    // The channel is unperturbed; a real call still settles with its own
    // return, not the stale one.
    let pending = tokio::spawn({
        let host = host.clone();
        async move { host.call("ping", vec![]).await }
    });
    let call = recv_traffic(&manual).await;
    let id = call["id"].as_str().unwrap();
    assert_ne!(id, "not-ours");
    manual
        .send(json!({"type": "return", "id": id, "result": 2}))
        .await
        .expect("Return send failed");
    assert_eq!(pending.await.unwrap().expect("Call failed"), json!(2));
}

// --- Test 8: Exactly one return per received call ---

#[tokio::test]
async fn test_exactly_one_return_per_call() {
    let (manual, peer_end) = Duplex::pair();
    let _peer = RpcChannel::new(
        Box::new(peer_end),
        Handlers::new().register("echo", |mut args| async move { Ok(args.remove(0)) }),
    );

    manual_handshake(&manual).await;
    manual
        .send(json!({"type": "call", "id": "m-1", "handler": "echo", "args": [5]}))
        .await
        .expect("Call send failed");

    let ret = recv_traffic(&manual).await;
    assert_eq!(ret, json!({"type": "return", "id": "m-1", "result": 5}));
    assert_silent(&manual).await;
}

// --- Test 9: Teardown settles pending calls ---

#[tokio::test]
async fn test_close_drains_pending_calls() {
    let (host_end, manual) = Duplex::pair();
    let host = Arc::new(RpcChannel::new(Box::new(host_end), Handlers::new()));

    manual_handshake(&manual).await;

    let pending = tokio::spawn({
        let host = host.clone();
        async move { host.call("never-answered", vec![]).await }
    });

    // Wait until the call is actually in flight, then tear down.
    let call = recv_traffic(&manual).await;
    assert_eq!(call["handler"], "never-answered");
    host.close();

    let err = pending.await.unwrap().unwrap_err();
    assert!(matches!(err, channel::Error::ChannelClosed));
}

#[tokio::test]
async fn test_transport_loss_drains_pending_calls() {
    let (host_end, manual) = Duplex::pair();
    let host = Arc::new(RpcChannel::new(Box::new(host_end), Handlers::new()));

    manual_handshake(&manual).await;

    let pending = tokio::spawn({
        let host = host.clone();
        async move { host.call("never-answered", vec![]).await }
    });
    let _call = recv_traffic(&manual).await;

    // Dropping the peer end closes the stream under the pump.
    drop(manual);

    let err = pending.await.unwrap().unwrap_err();
    assert!(matches!(err, channel::Error::ChannelClosed));
}

// --- Test 10: Non-error thrown values pass through unchanged ---

#[tokio::test]
async fn test_thrown_value_passes_through() {
    let (host_end, manual) = Duplex::pair();
    let host = Arc::new(RpcChannel::new(Box::new(host_end), Handlers::new()));

    manual_handshake(&manual).await;

    let pending = tokio::spawn({
        let host = host.clone();
        async move { host.call("weird", vec![]).await }
    });
    let call = recv_traffic(&manual).await;
    let id = call["id"].as_str().unwrap();
    manual
        .send(json!({"type": "return", "id": id, "exception": 42}))
        .await
        .expect("Return send failed");

    let err = pending.await.unwrap().unwrap_err();
    match err {
        channel::Error::RemoteValue(value) => assert_eq!(value, json!(42)),
        other => panic!("Expected pass-through value, got {:?}", other),
    }
}

// --- Test 11: Malformed traffic is ignored, never fatal ---

#[tokio::test]
async fn test_malformed_messages_are_ignored() {
    let (host_end, manual) = Duplex::pair();
    let host = Arc::new(RpcChannel::new(Box::new(host_end), Handlers::new()));

    manual_handshake(&manual).await;
    for junk in [json!(null), json!("hello"), json!({"type": "frobnicate"}), json!({"no": "type"})] {
        manual.send(junk).await.expect("Send failed");
    }

    // The channel shrugged it all off.
    let pending = tokio::spawn({
        let host = host.clone();
        async move { host.call("ping", vec![]).await }
    });
    let call = recv_traffic(&manual).await;
    let id = call["id"].as_str().unwrap();
    manual
        .send(json!({"type": "return", "id": id, "result": true}))
        .await
        .expect("Return send failed");
    assert_eq!(pending.await.unwrap().expect("Call failed"), json!(true));
}
