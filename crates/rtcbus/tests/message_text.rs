// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Message rendering and the text channel's pending-message queue.

mod common;

use std::sync::Arc;

use parking_lot::Mutex;
use rtcbus::asv;
use rtcbus::BusConnection;
use rtcbus::channel::{Channel, TextChannel};
use rtcbus::config::{IFACE_CHANNEL_INTERFACE_MESSAGES, IFACE_CHANNEL_TYPE_TEXT};
use rtcbus::connection::Connection;
use rtcbus::message::{Message, MessageError, MessageType, TextMessageFlags};
use rtcbus::value::{Asv, Value};
use rtcbus::{ErrorKind, Result};

use common::{channel_props, FakeObject, Harness};

#[test]
fn plain_text_renders_and_images_flag_non_text() {
    let mut message = Message::from_parts(vec![
        asv! { "message-type" => 0u32 },
        asv! { "content-type" => "text/plain", "content" => "Hello" },
    ]);
    assert_eq!(message.to_text(), ("Hello".to_owned(), TextMessageFlags::NONE));

    let part = message.append_part().expect("mutable");
    message.set(part, "content-type", "image/png").expect("mutable");
    message.set(part, "content", vec![0x89u8, b'P', b'N', b'G']).expect("mutable");
    let (text, flags) = message.to_text();
    assert_eq!(text, "Hello");
    assert!(flags.contains(TextMessageFlags::NON_TEXT_CONTENT));
}

#[test]
fn frozen_message_keeps_what_was_built() {
    let mut message = Message::new_text(MessageType::Action, "waves");
    message.set(0, "message-token", "t-1").expect("mutable");
    let extra = message.append_part().expect("mutable");
    message.set(extra, "alternative", "body").expect("mutable");
    message.set(extra, "content-type", "text/html").expect("mutable");
    message.set(extra, "content", "<i>waves</i>").expect("mutable");
    let built: Vec<Asv> = message.parts().to_vec();

    message.freeze();
    assert!(message.is_frozen());
    assert_eq!(message.parts(), built.as_slice());
    assert_eq!(message.message_type(), MessageType::Action);
    assert_eq!(message.token(), Some("t-1"));

    assert_eq!(message.set(1, "content", "edited"), Err(MessageError::Frozen));
    assert_eq!(message.append_part(), Err(MessageError::Frozen));
    assert_eq!(message.delete_part(1), Err(MessageError::Frozen));
    assert_eq!(message.parts(), built.as_slice());
}

#[test]
fn header_is_not_a_deletable_part() {
    let mut message = Message::new_text(MessageType::Normal, "x");
    assert_eq!(message.delete_part(0), Err(MessageError::HeaderUndeletable));
    assert_eq!(message.delete_part(5), Err(MessageError::NoSuchPart(5)));
    message.delete_part(1).expect("body part exists");
    assert_eq!(message.count_parts(), 1);
    // header only: nothing to render
    assert!(message.to_text().1.contains(TextMessageFlags::NON_TEXT_CONTENT));
}

#[test]
fn rendering_text_only_messages_is_idempotent() {
    let samples = vec![
        Message::new_text(MessageType::Normal, "plain"),
        Message::from_parts(vec![
            asv! {},
            asv! { "content-type" => "text/plain", "content" => "Hello, " },
            asv! { "content-type" => "text/plain", "content" => "world" },
        ]),
        Message::from_parts(vec![
            asv! {},
            asv! { "alternative" => "a", "content-type" => "text/plain", "content" => "first" },
            asv! { "alternative" => "a", "content-type" => "text/plain", "content" => "second" },
        ]),
    ];
    for message in samples {
        let rendered = message.to_text();
        assert!(rendered.1.is_empty(), "{:?} is text only", message);
        let again = Message::new_text(MessageType::Normal, &rendered.0).to_text();
        assert_eq!(again, rendered);
    }
}

fn incoming(id: u32, sender: u32, sender_id: &str, text: &str) -> Value {
    Value::Parts(vec![
        asv! {
            "pending-message-id" => id,
            "message-sender" => sender,
            "message-sender-id" => sender_id,
            "message-received" => 1_700_000_000i64,
        },
        asv! { "content-type" => "text/plain", "content" => text },
    ])
}

struct TextScene {
    harness: Harness,
    path: String,
    object: Arc<FakeObject>,
    text: TextChannel,
}

fn text_scene(tag: &str) -> TextScene {
    let harness = Harness::new();
    let fake = harness.fake_connection(tag);
    let connection = Connection::new(&harness.daemon, None, &fake.path).expect("connection name is owned");
    let path = format!("{}/chat", fake.path);
    let object = FakeObject::with_properties(
        IFACE_CHANNEL_INTERFACE_MESSAGES,
        asv! {
            "PendingMessages" => Value::Array(vec![incoming(1, 5, "alice@example.com", "are you there?")]),
        },
    );
    harness.export(&path, Arc::clone(&object));
    let channel = Channel::new(
        &connection,
        &path,
        channel_props(IFACE_CHANNEL_TYPE_TEXT, &[IFACE_CHANNEL_INTERFACE_MESSAGES], "alice@example.com"),
    )
    .expect("channel on a live connection");
    let text = TextChannel::new(channel).expect("channel implements Messages");
    TextScene {
        harness,
        path,
        object,
        text,
    }
}

#[test]
fn incoming_messages_queue_until_acknowledged() {
    let scene = text_scene("text");
    let prepared: Arc<Mutex<Option<Result<()>>>> = Arc::new(Mutex::new(None));
    let slot = Arc::clone(&prepared);
    scene
        .text
        .proxy()
        .prepare(&[TextChannel::FEATURE_INCOMING_MESSAGES], move |r| *slot.lock() = Some(r));
    scene.harness.dispatch();
    assert!(prepared.lock().take().expect("prepared").is_ok());
    assert!(scene.text.proxy().is_prepared(TextChannel::FEATURE_INCOMING_MESSAGES));

    let pending = scene.text.pending_messages();
    assert_eq!(pending.len(), 1);
    assert!(pending[0].is_frozen());
    assert_eq!(pending[0].sender().map(|c| c.identifier().to_owned()), Some("alice@example.com".to_owned()));
    assert_eq!(pending[0].to_text().0, "are you there?");

    let received = Arc::new(Mutex::new(Vec::new()));
    let log = Arc::clone(&received);
    scene.text.connect_message_received(move |message| log.lock().push(message.to_text().0));
    for _ in 0..2 {
        scene.harness.service.emit_signal(
            &scene.path,
            IFACE_CHANNEL_INTERFACE_MESSAGES,
            "MessageReceived",
            vec![incoming(2, 5, "alice@example.com", "hello?")],
        );
    }
    scene.harness.dispatch();
    // the repeated pending id is not queued twice
    assert_eq!(received.lock().as_slice(), &["hello?".to_owned()]);
    let pending = scene.text.pending_messages();
    assert_eq!(
        pending.iter().map(|m| m.pending_message_id()).collect::<Vec<_>>(),
        vec![Some(1), Some(2)]
    );
    let contacts = scene.text.connection().contact_repository();
    assert_eq!(contacts.inspect(5).as_deref(), Some("alice@example.com"));

    scene.object.on_method(IFACE_CHANNEL_TYPE_TEXT, "AcknowledgePendingMessages", |_| Ok(vec![]));
    let acked: Arc<Mutex<Option<Result<()>>>> = Arc::new(Mutex::new(None));
    let slot = Arc::clone(&acked);
    scene
        .text
        .acknowledge(&pending, move |r| *slot.lock() = Some(r))
        .expect("channel is valid");
    scene.harness.dispatch();
    assert!(acked.lock().take().expect("reply delivered").is_ok());
    let call = scene
        .object
        .calls()
        .into_iter()
        .find(|c| c.member == "AcknowledgePendingMessages")
        .expect("acknowledged");
    assert_eq!(call.args, vec![Value::from(vec![1u32, 2])]);
    // still pending until the channel confirms
    assert_eq!(scene.text.pending_messages().len(), 2);

    let removed = Arc::new(Mutex::new(Vec::new()));
    let log = Arc::clone(&removed);
    scene.text.connect_pending_message_removed(move |ids| log.lock().extend_from_slice(ids));
    scene.harness.service.emit_signal(
        &scene.path,
        IFACE_CHANNEL_INTERFACE_MESSAGES,
        "PendingMessagesRemoved",
        vec![Value::from(vec![1u32, 2])],
    );
    scene.harness.dispatch();
    assert!(scene.text.pending_messages().is_empty());
    assert_eq!(removed.lock().as_slice(), &[1, 2]);
}

#[test]
fn sending_returns_the_token() {
    let scene = text_scene("send");
    scene.object.on_method(IFACE_CHANNEL_INTERFACE_MESSAGES, "SendMessage", |_| {
        Ok(vec![Value::from("token-42")])
    });

    let message = Message::new_text(MessageType::Normal, "hi alice");
    let token: Arc<Mutex<Option<Result<String>>>> = Arc::new(Mutex::new(None));
    let slot = Arc::clone(&token);
    scene
        .text
        .send_message(&message, 0, move |r| *slot.lock() = Some(r))
        .expect("channel is valid");
    scene.harness.dispatch();

    assert_eq!(
        token.lock().take().expect("reply delivered").expect("sent"),
        "token-42"
    );
    let call = scene
        .object
        .calls()
        .into_iter()
        .find(|c| c.member == "SendMessage")
        .expect("sent");
    assert_eq!(call.args[0], Value::Parts(message.parts().to_vec()));
    assert_eq!(call.args[1], Value::U32(0));

    let empty = Message::new();
    let error = scene.text.send_message(&empty, 0, |_| {}).unwrap_err();
    assert_eq!(error.kind, ErrorKind::InvalidArgument);
}
