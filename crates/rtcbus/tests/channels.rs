// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Channel requests through the dispatcher, and dispatch operations.

mod common;

use std::sync::Arc;

use parking_lot::Mutex;
use rtcbus::account::Account;
use rtcbus::BusConnection;
use rtcbus::account_channel_request::{AccountChannelRequest, RequestOutcome};
use rtcbus::asv;
use rtcbus::channel_dispatch_operation::ChannelDispatchOperation;
use rtcbus::channel_request::ChannelRequest;
use rtcbus::config::{
    CHANNEL_DISPATCHER_OBJECT_PATH, IFACE_CHANNEL_DISPATCHER, IFACE_CHANNEL_DISPATCH_OPERATION,
    IFACE_CHANNEL_REQUEST, IFACE_CHANNEL_TYPE_TEXT, PROP_CHANNEL_TARGET_ID, PROP_CHANNEL_TYPE,
};
use rtcbus::proxy::Cancellable;
use rtcbus::value::Value;
use rtcbus::{ErrorDomain, ErrorKind, Result};

use common::{channel_entry, channel_props, next_id, object_path, FakeObject, Harness};

const HANDLER: &str = "org.freedesktop.Telepathy.Client.Chat";

type Outcome = Arc<Mutex<Option<Result<RequestOutcome>>>>;

/// Dispatcher answering `CreateChannel` with a request whose `Proceed`
/// always succeeds.
struct Dispatcher {
    account: Account,
    account_path: String,
    dispatcher: Arc<FakeObject>,
    request_path: String,
    request: Arc<FakeObject>,
}

fn dispatcher(harness: &Harness) -> Dispatcher {
    let (account_path, _account_object) = harness.fake_account("Chat");
    let account = Account::new(&harness.daemon, &account_path).expect("account path is well formed");

    let request_path = format!("{}/Request{}", CHANNEL_DISPATCHER_OBJECT_PATH, next_id());
    let request = FakeObject::new();
    request.on_method(IFACE_CHANNEL_REQUEST, "Proceed", |_| Ok(vec![]));
    request.on_method(IFACE_CHANNEL_REQUEST, "Cancel", |_| Ok(vec![]));
    harness.export(&request_path, Arc::clone(&request));

    let dispatcher = FakeObject::new();
    let reply_path = request_path.clone();
    dispatcher.on_method(IFACE_CHANNEL_DISPATCHER, "CreateChannel", move |_| {
        Ok(vec![object_path(&reply_path)])
    });
    harness.export(CHANNEL_DISPATCHER_OBJECT_PATH, Arc::clone(&dispatcher));

    Dispatcher {
        account,
        account_path,
        dispatcher,
        request_path,
        request,
    }
}

fn text_request() -> rtcbus::Asv {
    asv! {
        PROP_CHANNEL_TYPE => IFACE_CHANNEL_TYPE_TEXT,
        PROP_CHANNEL_TARGET_ID => "bob@example.com",
    }
}

fn start(scene: &Dispatcher, cancellable: Option<&Cancellable>) -> (AccountChannelRequest, Outcome) {
    let request = AccountChannelRequest::new(&scene.account, text_request(), 1234).with_preferred_handler(HANDLER);
    let outcome: Outcome = Arc::new(Mutex::new(None));
    let slot = Arc::clone(&outcome);
    request
        .create_channel(cancellable, move |result| *slot.lock() = Some(result))
        .expect("first use of the request");
    (request, outcome)
}

#[test]
fn created_channel_comes_back_through_the_request() {
    let harness = Harness::new();
    let scene = dispatcher(&harness);
    let fake = harness.fake_connection("created");
    let (request, outcome) = start(&scene, None);
    harness.dispatch();

    let create = scene
        .dispatcher
        .calls()
        .into_iter()
        .find(|c| c.member == "CreateChannel")
        .expect("dispatcher asked");
    assert_eq!(
        create.args,
        vec![
            object_path(&scene.account_path),
            Value::Dict(text_request()),
            Value::I64(1234),
            Value::from(HANDLER),
        ]
    );
    assert_eq!(scene.request.count("Proceed"), 1);
    assert!(outcome.lock().is_none());

    let channel_path = format!("{}/text{}", fake.path, next_id());
    harness.service.emit_signal(
        &scene.request_path,
        IFACE_CHANNEL_REQUEST,
        "SucceededWithChannel",
        vec![
            object_path(&fake.path),
            Value::Dict(asv! {}),
            object_path(&channel_path),
            Value::Dict(channel_props(IFACE_CHANNEL_TYPE_TEXT, &[], "bob@example.com")),
        ],
    );
    harness
        .service
        .emit_signal(&scene.request_path, IFACE_CHANNEL_REQUEST, "Succeeded", vec![]);
    harness.dispatch();

    let (connection, channel) = outcome
        .lock()
        .take()
        .expect("request finished")
        .expect("request succeeded")
        .expect("dispatcher reported the channel");
    assert_eq!(connection.object_path(), fake.path);
    assert_eq!(channel.object_path(), channel_path);
    assert_eq!(channel.target_id(), Some("bob@example.com".to_owned()));

    let again = request.create_channel(None, |_| {});
    assert_eq!(again.unwrap_err().kind, ErrorKind::NotAvailable);
}

#[test]
fn failed_request_reports_the_remote_error() {
    let harness = Harness::new();
    let scene = dispatcher(&harness);
    let (_request, outcome) = start(&scene, None);
    harness.dispatch();

    harness.service.emit_signal(
        &scene.request_path,
        IFACE_CHANNEL_REQUEST,
        "Failed",
        vec![
            Value::from("org.freedesktop.Telepathy.Error.NotAvailable"),
            Value::from("bob is offline"),
        ],
    );
    harness.dispatch();

    let error = outcome.lock().take().expect("request finished").unwrap_err();
    assert!(error.matches(ErrorDomain::Telepathy, ErrorKind::NotAvailable));
    assert_eq!(error.message, "bob is offline");
}

#[test]
fn cancelling_withdraws_the_request() {
    let harness = Harness::new();
    let scene = dispatcher(&harness);
    let cancellable = Cancellable::new();
    let (_request, outcome) = start(&scene, Some(&cancellable));
    harness.dispatch();

    cancellable.cancel();
    harness.dispatch();
    assert_eq!(scene.request.count("Cancel"), 1);
    assert!(outcome.lock().is_none());

    harness.service.emit_signal(
        &scene.request_path,
        IFACE_CHANNEL_REQUEST,
        "Failed",
        vec![
            Value::from("org.freedesktop.Telepathy.Error.Cancelled"),
            Value::from("withdrawn"),
        ],
    );
    harness.dispatch();
    let error = outcome.lock().take().expect("request finished").unwrap_err();
    assert_eq!(error.kind, ErrorKind::Cancelled);
}

#[test]
fn dispatcher_refusal_fails_the_request() {
    let harness = Harness::new();
    let scene = dispatcher(&harness);
    scene.dispatcher.on_method(IFACE_CHANNEL_DISPATCHER, "CreateChannel", |_| {
        Err(rtcbus::BusError::new(
            "org.freedesktop.Telepathy.Error.NotImplemented",
            "no such channel type",
        ))
    });
    let (_request, outcome) = start(&scene, None);
    harness.dispatch();

    let error = outcome.lock().take().expect("request finished").unwrap_err();
    assert_eq!(error.kind, ErrorKind::NotImplemented);
    assert_eq!(scene.request.count("Proceed"), 0);
}

#[tokio::test]
async fn request_core_reads_the_remote_properties() {
    let harness = Harness::new();
    let scene = dispatcher(&harness);
    scene.request.set_properties(
        IFACE_CHANNEL_REQUEST,
        asv! {
            "Account" => object_path(&scene.account_path),
            "UserActionTime" => 99i64,
            "PreferredHandler" => HANDLER,
            "Requests" => Value::Array(vec![Value::Dict(text_request())]),
            "Hints" => asv! { "org.example.Urgent" => true },
        },
    );
    let request = ChannelRequest::new(&harness.daemon, &scene.request_path, asv! {})
        .expect("dispatcher owns its name");
    assert_eq!(request.account_path(), None);

    let prepared = request.proxy().prepare_async(&[ChannelRequest::FEATURE_CORE]);
    harness.dispatch();
    prepared.await.expect("request prepared");

    assert_eq!(request.account_path(), Some(scene.account_path.clone()));
    assert_eq!(request.user_action_time(), Some(99));
    assert_eq!(request.preferred_handler().as_deref(), Some(HANDLER));
    assert_eq!(request.requests(), vec![text_request()]);
    assert!(request.hints().contains_key("org.example.Urgent"));
}

fn operation_props(harness: &Harness, connection_path: &str, channel_paths: &[String]) -> rtcbus::Asv {
    let (account_path, _object) = harness.fake_account("Ops");
    let channels: Vec<Value> = channel_paths
        .iter()
        .map(|path| channel_entry(path, channel_props(IFACE_CHANNEL_TYPE_TEXT, &[], "carol@example.com")))
        .collect();
    asv! {
        "Connection" => object_path(connection_path),
        "Account" => object_path(&account_path),
        "PossibleHandlers" => vec![HANDLER.to_owned()],
        "Channels" => Value::Array(channels),
    }
}

#[test]
fn dispatch_operation_ends_when_its_channels_are_lost() {
    let harness = Harness::new();
    let fake = harness.fake_connection("lost");
    let (path, object) = harness.fake_dispatch_operation(&[HANDLER]);
    let channel_paths: Vec<String> = (0..2).map(|n| format!("{}/text{}", fake.path, n)).collect();
    let qualified: rtcbus::Asv = operation_props(&harness, &fake.path, &channel_paths)
        .into_iter()
        .map(|(k, v)| (format!("{}.{}", IFACE_CHANNEL_DISPATCH_OPERATION, k), v))
        .collect();
    let operation = ChannelDispatchOperation::new(&harness.daemon, &path, &qualified).expect("valid operation");

    let prepared = Arc::new(Mutex::new(None));
    let slot = Arc::clone(&prepared);
    operation
        .proxy()
        .prepare(&[ChannelDispatchOperation::FEATURE_CORE], move |r| *slot.lock() = Some(r));
    assert!(prepared.lock().take().expect("nothing to fetch").is_ok());
    assert_eq!(object.count("GetAll"), 0);
    assert_eq!(operation.possible_handlers(), vec![HANDLER.to_owned()]);
    assert_eq!(operation.channels().map(|c| c.len()), Some(2));

    let lost = Arc::new(Mutex::new(Vec::new()));
    let log = Arc::clone(&lost);
    operation.connect_channel_lost(move |(channel, error)| {
        log.lock().push((channel.object_path().to_owned(), error.kind));
    });
    for channel_path in &channel_paths {
        harness.service.emit_signal(
            &path,
            IFACE_CHANNEL_DISPATCH_OPERATION,
            "ChannelLost",
            vec![
                object_path(channel_path),
                Value::from("org.freedesktop.Telepathy.Error.Cancelled"),
                Value::from("closed"),
            ],
        );
        harness.dispatch();
        if lost.lock().len() == 1 {
            assert!(operation.proxy().invalidated().is_none());
        }
    }

    let lost = lost.lock();
    assert_eq!(lost.len(), 2);
    assert_eq!(lost[0], (channel_paths[0].clone(), ErrorKind::Cancelled));
    assert_eq!(operation.channels().map(|c| c.len()), Some(0));
    assert!(operation.proxy().invalidated().expect("no channels left").is_object_removed());
}

#[test]
fn dispatch_operation_fetches_properties_and_finishes() {
    let harness = Harness::new();
    let fake = harness.fake_connection("finish");
    let (path, object) = harness.fake_dispatch_operation(&[HANDLER]);
    let channel_path = format!("{}/text{}", fake.path, next_id());
    object.set_properties(
        IFACE_CHANNEL_DISPATCH_OPERATION,
        operation_props(&harness, &fake.path, &[channel_path.clone()]),
    );
    object.on_method(IFACE_CHANNEL_DISPATCH_OPERATION, "HandleWith", |_| Ok(vec![]));
    let operation = ChannelDispatchOperation::new(&harness.daemon, &path, &asv! {}).expect("valid operation");
    assert!(operation.connection().is_none());

    let prepared = Arc::new(Mutex::new(None));
    let slot = Arc::clone(&prepared);
    operation
        .proxy()
        .prepare(&[ChannelDispatchOperation::FEATURE_CORE], move |r| *slot.lock() = Some(r));
    harness.dispatch();
    assert!(prepared.lock().take().expect("prepared").is_ok());
    assert_eq!(object.count("GetAll"), 1);
    assert_eq!(operation.connection().map(|c| c.object_path().to_owned()), Some(fake.path.clone()));
    assert!(operation.account().is_some());
    let channels = operation.channels().expect("channels known");
    assert_eq!(channels[0].object_path(), channel_path);

    let handled = Arc::new(Mutex::new(None));
    let slot = Arc::clone(&handled);
    operation
        .handle_with(Some(HANDLER), move |r| *slot.lock() = Some(r))
        .expect("operation is valid");
    harness.dispatch();
    assert!(handled.lock().take().expect("reply delivered").is_ok());
    let call = object
        .calls()
        .into_iter()
        .find(|c| c.member == "HandleWith")
        .expect("handler chosen");
    assert_eq!(call.args, vec![Value::from(HANDLER)]);

    harness
        .service
        .emit_signal(&path, IFACE_CHANNEL_DISPATCH_OPERATION, "Finished", vec![]);
    harness.dispatch();
    assert!(operation.proxy().invalidated().expect("finished").is_object_removed());
}

#[test]
fn dispatch_operation_without_mandatory_properties_is_invalid() {
    let harness = Harness::new();
    let (path, _object) = harness.fake_dispatch_operation(&[HANDLER]);
    let operation = ChannelDispatchOperation::new(&harness.daemon, &path, &asv! {}).expect("valid operation");

    let prepared = Arc::new(Mutex::new(None));
    let slot = Arc::clone(&prepared);
    operation
        .proxy()
        .prepare(&[ChannelDispatchOperation::FEATURE_CORE], move |r| *slot.lock() = Some(r));
    harness.dispatch();

    let error = operation.proxy().invalidated().expect("operation rejected");
    assert_eq!(error.kind, ErrorKind::InvalidArgument);
    assert!(prepared.lock().take().is_some());
}
