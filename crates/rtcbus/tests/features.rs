// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Feature preparation against scripted remote objects.

mod common;

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;
use rtcbus::account::Account;
use rtcbus::bus::BusError;
use rtcbus::BusConnection;
use rtcbus::channel::Channel;
use rtcbus::config::{IFACE_CHANNEL_INTERFACE_GROUP, IFACE_CHANNEL_TYPE_TEXT, IFACE_PROPERTIES};
use rtcbus::connection::{Connection, ConnectionStatus};
use rtcbus::proxy::FeatureState;
use rtcbus::value::Value;
use rtcbus::{ErrorKind, ProxyError, Result};

use common::{channel_props, FakeObject, Harness};

type Results = Arc<Mutex<Vec<Result<()>>>>;

fn collect(results: &Results) -> impl FnOnce(Result<()>) + Send + 'static {
    let results = Arc::clone(results);
    move |result| results.lock().push(result)
}

#[test]
fn concurrent_prepares_share_one_get_all() {
    let harness = Harness::new();
    let fake = harness.fake_connection("coalesce");
    let connection = Connection::new(&harness.daemon, None, &fake.path).expect("connection name is owned");
    let statuses = Arc::new(AtomicUsize::new(0));
    let counter = Arc::clone(&statuses);
    connection.connect_status_changed(move |_| {
        counter.fetch_add(1, Ordering::SeqCst);
    });

    let results: Results = Arc::new(Mutex::new(Vec::new()));
    connection.proxy().prepare(&[Connection::FEATURE_CORE], collect(&results));
    connection.proxy().prepare(&[], collect(&results));
    assert!(results.lock().is_empty());
    assert_eq!(connection.proxy().feature_state(Connection::FEATURE_CORE), FeatureState::Preparing);

    harness.dispatch();
    assert_eq!(fake.object.count("GetAll"), 1);
    assert_eq!(results.lock().len(), 2);
    assert!(results.lock().iter().all(Result::is_ok));

    assert!(connection.proxy().is_prepared(Connection::FEATURE_CORE));
    assert_eq!(connection.status(), Some(ConnectionStatus::Connected));
    assert_eq!(connection.self_handle(), Some(1));
    assert_eq!(
        connection.contact_repository().inspect(1).as_deref(),
        Some("me@example.com")
    );
    assert_eq!(statuses.load(Ordering::SeqCst), 1);

    // already prepared: answered synchronously, no new round trip
    connection.proxy().prepare(&[Connection::FEATURE_CORE], collect(&results));
    assert_eq!(results.lock().len(), 3);
    assert_eq!(fake.object.count("GetAll"), 1);
}

#[test]
fn failed_core_feature_is_unavailable_not_fatal() {
    let harness = Harness::new();
    let fake = harness.fake_connection("broken");
    fake.object.on_method(IFACE_PROPERTIES, "GetAll", |_| {
        Err(BusError::new("org.freedesktop.Telepathy.Error.NotAvailable", "later"))
    });
    let connection = Connection::new(&harness.daemon, None, &fake.path).expect("connection name is owned");

    let results: Results = Arc::new(Mutex::new(Vec::new()));
    connection.proxy().prepare(&[], collect(&results));
    harness.dispatch();

    assert!(results.lock()[0].is_ok());
    assert_eq!(
        connection.proxy().feature_state(Connection::FEATURE_CORE),
        FeatureState::Unavailable
    );
    assert_eq!(connection.status(), None);
    assert!(connection.proxy().invalidated().is_none());
}

#[test]
fn invalidation_fails_waiting_prepares() {
    let harness = Harness::new();
    let fake = harness.fake_connection("drop");
    let connection = Connection::new(&harness.daemon, None, &fake.path).expect("connection name is owned");

    let results: Results = Arc::new(Mutex::new(Vec::new()));
    connection.proxy().prepare(&[Connection::FEATURE_CORE], collect(&results));
    connection
        .proxy()
        .invalidate(ProxyError::telepathy(ErrorKind::Cancelled, "shutting down"));

    {
        let results = results.lock();
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].as_ref().unwrap_err().kind, ErrorKind::Cancelled);
    }
    harness.dispatch();
    assert_eq!(results.lock().len(), 1);
    assert!(!connection.proxy().is_prepared(Connection::FEATURE_CORE));
}

#[tokio::test]
async fn account_core_prepares_through_the_future() {
    let harness = Harness::new();
    let (path, _object) = harness.fake_account("Work");
    let account = Account::new(&harness.daemon, &path).expect("account path is well formed");
    assert_eq!(account.cm_name(), "fake");
    assert_eq!(account.protocol_name(), "proto");

    let prepared = account.proxy().prepare_async(&[Account::FEATURE_CORE]);
    harness.dispatch();
    prepared.await.expect("account prepared");

    assert_eq!(account.display_name(), "Work");
    assert!(account.is_enabled());
    assert!(account.is_valid());
    assert_eq!(account.connection_path(), None);
}

#[test]
fn group_feature_tracks_members() {
    let harness = Harness::new();
    let fake = harness.fake_connection("group");
    let connection = Connection::new(&harness.daemon, None, &fake.path).expect("connection name is owned");
    let path = format!("{}/room1", fake.path);
    let object = FakeObject::with_properties(
        IFACE_CHANNEL_INTERFACE_GROUP,
        rtcbus::asv! {
            "GroupFlags" => 0u32,
            "SelfHandle" => 1u32,
            "Members" => vec![1u32, 2],
            "LocalPendingMembers" => Value::Array(vec![]),
            "RemotePendingMembers" => vec![3u32],
        },
    );
    harness.export(&path, Arc::clone(&object));
    let channel = Channel::new(
        &connection,
        &path,
        channel_props(IFACE_CHANNEL_TYPE_TEXT, &[IFACE_CHANNEL_INTERFACE_GROUP], "room@example.com"),
    )
    .expect("channel on a live connection");

    let results: Results = Arc::new(Mutex::new(Vec::new()));
    channel.proxy().prepare(&[Channel::FEATURE_GROUP], collect(&results));
    harness.dispatch();
    assert!(results.lock()[0].is_ok());
    assert!(channel.proxy().is_prepared(Channel::FEATURE_GROUP));
    assert_eq!(channel.members().map(|m| m.to_vec()), Some(vec![1, 2]));
    assert_eq!(channel.remote_pending_members().map(|m| m.to_vec()), Some(vec![3]));
    assert_eq!(channel.group_self_handle(), Some(1));

    let changes = Arc::new(Mutex::new(Vec::new()));
    let log = Arc::clone(&changes);
    channel
        .connect_members_changed(move |change| log.lock().push(change.clone()))
        .expect("group channel");
    harness.service.emit_signal(
        &path,
        IFACE_CHANNEL_INTERFACE_GROUP,
        "MembersChanged",
        vec![
            Value::from("welcome"),
            Value::from(vec![3u32]),
            Value::from(vec![2u32]),
            Value::from(Vec::<u32>::new()),
            Value::from(Vec::<u32>::new()),
            Value::U32(1),
            Value::U32(0),
        ],
    );
    harness.dispatch();

    assert_eq!(channel.members().map(|m| m.to_vec()), Some(vec![1, 3]));
    assert_eq!(channel.remote_pending_members().map(|m| m.is_empty()), Some(true));
    let changes = changes.lock();
    assert_eq!(changes.len(), 1);
    assert_eq!(changes[0].message, "welcome");
    assert_eq!(changes[0].removed, vec![2]);
}

#[test]
fn group_feature_is_unavailable_without_the_interface() {
    let harness = Harness::new();
    let fake = harness.fake_connection("nogroup");
    let connection = Connection::new(&harness.daemon, None, &fake.path).expect("connection name is owned");
    let channel = Channel::new(
        &connection,
        &format!("{}/text3", fake.path),
        channel_props(IFACE_CHANNEL_TYPE_TEXT, &[], "dave@example.com"),
    )
    .expect("channel on a live connection");

    let results: Results = Arc::new(Mutex::new(Vec::new()));
    channel.proxy().prepare(&[Channel::FEATURE_GROUP], collect(&results));
    harness.dispatch();

    assert!(results.lock()[0].is_ok());
    assert!(channel.proxy().is_prepared(Channel::FEATURE_CORE));
    assert_eq!(channel.proxy().feature_state(Channel::FEATURE_GROUP), FeatureState::Unavailable);
    assert_eq!(channel.members(), None);
    assert!(channel.add_members(&[2], "", |_| {}).is_err());
}
