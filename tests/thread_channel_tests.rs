#![allow(
    clippy::unwrap_used,
    clippy::expect_used,
    clippy::panic,
    clippy::indexing_slicing
)]
//! Integration tests for the thread channel adapter.

mod common;

use std::time::Duration;

use serde_json::json;
use tokio::time::{timeout, Instant};
use tokio_test::assert_err;

use atlantium_client::protocol::{thread_channel, ClientFrame, ServerFrame, ThreadMessage};
use atlantium_client::{
    AtlantiumError, ErrorCode, RealtimeClient, ThreadChannel, ThreadChannelConfig, ThreadEvent,
};

use common::*;

/// A client plus an adapter already bound to `t1`.
async fn bound_channel() -> (RealtimeClient, ThreadChannel, MockServer) {
    let (client, events, mut server) = start_client();
    drop(events);
    let handle = client.handle();
    wait_connected(&handle).await;

    let mut channel = ThreadChannel::new(handle, ThreadChannelConfig::new("me"));
    channel.subscribe("t1");
    assert_eq!(server.expect_subscribe().await, "thread:t1");
    (client, channel, server)
}

async fn next(channel: &mut ThreadChannel) -> ThreadEvent {
    timeout(Duration::from_secs(10), channel.next_event())
        .await
        .expect("timed out waiting for a thread event")
        .expect("thread channel ended")
}

async fn assert_quiet(channel: &mut ThreadChannel, window: Duration) {
    if let Ok(event) = timeout(window, channel.next_event()).await {
        panic!("expected no event, got {event:?}");
    }
}

// ── Binding ─────────────────────────────────────────────────────────

#[tokio::test(start_paused = true)]
async fn binds_once_the_connection_is_up() {
    let (client, _events, mut server) = start_client();
    let mut channel = ThreadChannel::new(client.handle(), ThreadChannelConfig::new("me"));

    channel.subscribe("t1");
    assert!(!channel.is_bound());
    assert_eq!(channel.current_thread(), Some("t1"));

    assert_quiet(&mut channel, Duration::from_millis(10)).await;
    assert!(channel.is_bound());
    assert_eq!(server.expect_subscribe().await, "thread:t1");
}

#[tokio::test(start_paused = true)]
async fn subscribing_to_the_same_thread_is_idempotent() {
    let (_client, mut channel, mut server) = bound_channel().await;
    channel.subscribe("t1");
    channel.subscribe("t1");
    tokio::task::yield_now().await;
    assert!(server.drain_frames().is_empty());
}

#[tokio::test(start_paused = true)]
async fn rejected_subscription_degrades_to_unbound() {
    let (_client, mut channel, server) = bound_channel().await;

    server.push(&ServerFrame::Error {
        channel: Some(thread_channel("t1")),
        message: "forbidden".into(),
        error_code: Some(ErrorCode::ChannelForbidden),
    });

    assert_quiet(&mut channel, Duration::from_secs(1)).await;
    assert!(!channel.is_bound());
    assert_eq!(channel.current_thread(), Some("t1"));
    assert!(matches!(
        assert_err!(channel.broadcast_message(&sample_message())),
        AtlantiumError::NotSubscribed
    ));
}

#[tokio::test(start_paused = true)]
async fn rejection_with_unrecognized_code_still_unbinds() {
    let (_client, mut channel, server) = bound_channel().await;

    server.push_raw(
        json!({
            "type": "error",
            "data": {
                "channel": "thread:t1",
                "message": "forbidden",
                "error_code": "SOME_NEW_CODE"
            }
        })
        .to_string(),
    );

    assert_quiet(&mut channel, Duration::from_secs(1)).await;
    assert!(!channel.is_bound());
}

// ── Messages ────────────────────────────────────────────────────────

#[tokio::test(start_paused = true)]
async fn flat_and_wrapped_messages_are_equivalent() {
    let (_client, mut channel, server) = bound_channel().await;
    let payload = message_payload("m-1", "t1", "u2", "hello");

    server.deliver("thread:t1", new_message(payload.clone()));
    server.deliver("thread:t1", wrapped(new_message(payload)));

    let flat = next(&mut channel).await;
    let nested = next(&mut channel).await;
    assert_eq!(flat, nested);
    match flat {
        ThreadEvent::MessageReceived(msg) => {
            assert_eq!(msg.message_id, "m-1");
            assert_eq!(msg.content, "hello");
            assert_eq!(msg.sender_username, "u2-name");
        }
        other => panic!("expected message, got {other:?}"),
    }
}

#[tokio::test(start_paused = true)]
async fn malformed_and_foreign_messages_are_dropped() {
    let (_client, mut channel, server) = bound_channel().await;

    server.deliver(
        "thread:t1",
        new_message(json!({ "thread_id": "t1", "content": "no id" })),
    );
    server.deliver(
        "thread:t1",
        new_message(message_payload("m-2", "t9", "u2", "elsewhere")),
    );
    server.deliver("thread:t1", json!({ "action": "reaction_added", "payload": {} }));
    server.deliver("thread:t1", json!("not an object"));
    server.deliver("thread:t1", new_message(message_payload("m-3", "t1", "u2", "kept")));

    match next(&mut channel).await {
        ThreadEvent::MessageReceived(msg) => assert_eq!(msg.message_id, "m-3"),
        other => panic!("expected m-3, got {other:?}"),
    }
}

// ── Typing ──────────────────────────────────────────────────────────

#[tokio::test(start_paused = true)]
async fn refreshed_typing_expires_three_seconds_after_last_event() {
    let (_client, mut channel, server) = bound_channel().await;
    let start = Instant::now();

    server.deliver("thread:t1", typing_start("u2", "t1"));
    assert_eq!(
        next(&mut channel).await,
        ThreadEvent::TypingStarted { user_id: "u2".into() }
    );

    tokio::time::sleep(Duration::from_secs(1)).await;
    server.deliver("thread:t1", typing_start("u2", "t1"));
    assert_eq!(
        next(&mut channel).await,
        ThreadEvent::TypingStarted { user_id: "u2".into() }
    );

    // 3.5 s after the first event.
    assert_quiet(&mut channel, Duration::from_millis(2500)).await;
    assert!(channel.is_typing("u2"));

    assert_eq!(
        next(&mut channel).await,
        ThreadEvent::TypingStopped { user_id: "u2".into() }
    );
    let elapsed = start.elapsed();
    assert!(elapsed >= Duration::from_secs(4), "expired early: {elapsed:?}");
    assert!(elapsed < Duration::from_millis(4100), "expired late: {elapsed:?}");
    assert!(channel.typing_users().is_empty());
}

#[tokio::test(start_paused = true)]
async fn typing_stop_removes_immediately_once() {
    let (_client, mut channel, server) = bound_channel().await;

    server.deliver("thread:t1", typing_start("u2", "t1"));
    server.deliver("thread:t1", typing_stop("u2", "t1"));
    server.deliver("thread:t1", typing_stop("u2", "t1"));

    assert_eq!(
        next(&mut channel).await,
        ThreadEvent::TypingStarted { user_id: "u2".into() }
    );
    assert_eq!(
        next(&mut channel).await,
        ThreadEvent::TypingStopped { user_id: "u2".into() }
    );
    assert_quiet(&mut channel, Duration::from_secs(5)).await;
}

#[tokio::test(start_paused = true)]
async fn typing_users_keep_start_order() {
    let (_client, mut channel, server) = bound_channel().await;

    server.deliver("thread:t1", wrapped(typing_start("u3", "t1")));
    server.deliver("thread:t1", typing_start("u2", "t1"));
    server.deliver("thread:t1", typing_start("me", "t1"));
    next(&mut channel).await;
    next(&mut channel).await;
    assert_quiet(&mut channel, Duration::from_millis(10)).await;

    assert_eq!(channel.typing_users(), ["u3", "u2"]);
}

#[tokio::test(start_paused = true)]
async fn switching_threads_drops_pending_typing() {
    let (_client, mut channel, mut server) = bound_channel().await;

    server.deliver("thread:t1", typing_start("u2", "t1"));
    next(&mut channel).await;
    assert!(channel.is_typing("u2"));

    channel.subscribe("t2");
    assert!(channel.typing_users().is_empty());
    assert_eq!(server.expect_subscribe().await, "thread:t2");
    let frames = server.drain_frames();
    assert!(frames
        .iter()
        .all(|f| !matches!(f, ClientFrame::Subscribe { .. })));

    // Well past the old deadline: nothing surfaces for t1.
    assert_quiet(&mut channel, Duration::from_secs(10)).await;
}

#[tokio::test(start_paused = true)]
async fn unsubscribe_clears_everything() {
    let (_client, mut channel, mut server) = bound_channel().await;
    server.deliver("thread:t1", typing_start("u2", "t1"));
    next(&mut channel).await;

    channel.unsubscribe();
    assert!(!channel.is_bound());
    assert_eq!(channel.current_thread(), None);
    assert!(channel.typing_users().is_empty());

    loop {
        if let ClientFrame::Unsubscribe { channel: name } = server.next_frame().await {
            assert_eq!(name, "thread:t1");
            break;
        }
    }
    assert_quiet(&mut channel, Duration::from_secs(5)).await;
}

// ── Outbound ────────────────────────────────────────────────────────

#[tokio::test(start_paused = true)]
async fn typing_notifications_are_published_on_the_thread() {
    let (_client, channel, mut server) = bound_channel().await;

    channel.send_typing_start();
    let (name, message) = server.expect_publish().await;
    assert_eq!(name, "thread:t1");
    assert_eq!(
        message,
        json!({ "action": "typing_start", "payload": { "user_id": "me", "thread_id": "t1" } })
    );

    channel.send_typing_stop();
    let (_, message) = server.expect_publish().await;
    assert_eq!(message["action"], "typing_stop");
}

#[tokio::test(start_paused = true)]
async fn typing_notifications_are_noops_when_unbound() {
    let (client, _events, mut server) = start_client();
    wait_connected(&client.handle()).await;
    let channel = ThreadChannel::new(client.handle(), ThreadChannelConfig::new("me"));

    channel.send_typing_start();
    channel.send_typing_stop();
    tokio::task::yield_now().await;

    assert!(server
        .drain_frames()
        .iter()
        .all(|f| !matches!(f, ClientFrame::Publish { .. })));
}

#[tokio::test(start_paused = true)]
async fn broadcast_message_publishes_new_message() {
    let (_client, channel, mut server) = bound_channel().await;
    let msg = sample_message();

    channel.broadcast_message(&msg).unwrap();
    let (name, envelope) = server.expect_publish().await;
    assert_eq!(name, "thread:t1");
    assert_eq!(envelope["action"], "new_message");
    assert_eq!(envelope["payload"]["message_id"], "m-7");
}

// ── Connection loss ─────────────────────────────────────────────────

#[tokio::test(start_paused = true)]
async fn ends_after_connection_loss_and_typing_drain() {
    let (_client, mut channel, server) = bound_channel().await;
    server.deliver("thread:t1", typing_start("u2", "t1"));
    next(&mut channel).await;

    drop(server);

    assert_eq!(
        next(&mut channel).await,
        ThreadEvent::TypingStopped { user_id: "u2".into() }
    );
    let end = timeout(Duration::from_secs(1), channel.next_event()).await;
    assert_eq!(end.unwrap(), None);
    assert!(!channel.is_bound());
}

fn sample_message() -> ThreadMessage {
    ThreadMessage {
        message_id: "m-7".into(),
        thread_id: "t1".into(),
        sender_id: "me".into(),
        sender_username: "me-name".into(),
        sender_avatar: None,
        content: "hello".into(),
        is_reply: false,
        parent_message: None,
        created_at: "2024-05-01T10:00:00Z".into(),
    }
}
