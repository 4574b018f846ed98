// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Handle reference counting under random workloads, and handles obtained
//! from a remote connection.

mod common;

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::Mutex;
use rtcbus::config::IFACE_CONNECTION;
use rtcbus::connection::Connection;
use rtcbus::handle::{Handle, HandleRepository, HandleSet, HandleType};
use rtcbus::intset::IntSet;
use rtcbus::value::Value;
use rtcbus::{ErrorKind, Result};

use common::Harness;

const IDS: usize = 12;

fn id(n: usize) -> String {
    format!("user{}@example.com", n)
}

/// Refcounts must match a plain model after every step, and a handle is
/// valid exactly while its count is positive.
fn check_model(repo: &HandleRepository, model: &HashMap<Handle, (String, u32)>) {
    let live = model.values().filter(|(_, count)| *count > 0).count();
    assert_eq!(repo.len(), live);
    for (handle, (ident, count)) in model {
        assert_eq!(repo.refcount(*handle), *count, "refcount of {}", handle);
        assert_eq!(repo.is_valid(*handle), *count > 0);
        if *count > 0 {
            assert_eq!(repo.inspect(*handle).as_deref(), Some(ident.as_str()));
            assert_eq!(repo.lookup(ident), Some(*handle));
        } else {
            assert_eq!(repo.inspect(*handle), None);
        }
    }
}

#[test]
fn random_ref_unref_matches_model() {
    let mut rng = fastrand::Rng::with_seed(0x5eed);
    let repo = HandleRepository::new("/test/random", HandleType::Contact);
    let mut model: HashMap<Handle, (String, u32)> = HashMap::new();

    for _ in 0..2000 {
        match rng.u8(..3) {
            0 => {
                let ident = id(rng.usize(..IDS));
                let handle = repo.ensure(&ident).expect("valid identifier");
                let entry = model.entry(handle).or_insert_with(|| (ident.clone(), 0));
                if entry.1 == 0 {
                    entry.0 = ident;
                }
                entry.1 += 1;
            }
            1 => {
                let live: Vec<Handle> = model.iter().filter(|(_, e)| e.1 > 0).map(|(h, _)| *h).collect();
                if live.is_empty() {
                    continue;
                }
                let handle = live[rng.usize(..live.len())];
                repo.ref_handle(handle).expect("live handle");
                if let Some(entry) = model.get_mut(&handle) {
                    entry.1 += 1;
                }
            }
            _ => {
                let live: Vec<Handle> = model.iter().filter(|(_, e)| e.1 > 0).map(|(h, _)| *h).collect();
                if live.is_empty() {
                    assert!(repo.unref_handle(12345).is_err());
                    continue;
                }
                let handle = live[rng.usize(..live.len())];
                repo.unref_handle(handle).expect("live handle");
                if let Some(entry) = model.get_mut(&handle) {
                    entry.1 -= 1;
                }
            }
        }
        check_model(&repo, &model);
    }

    // release everything that is left
    for (handle, (_, count)) in model.iter_mut() {
        while *count > 0 {
            repo.unref_handle(*handle).expect("live handle");
            *count -= 1;
        }
    }
    assert!(repo.is_empty());
}

#[test]
fn random_handle_set_operations_hold_one_ref_per_member() {
    let mut rng = fastrand::Rng::with_seed(42);
    let repo = Arc::new(HandleRepository::new("/test/sets", HandleType::Contact));
    let handles: Vec<Handle> = (0..IDS)
        .map(|n| repo.ensure(&id(n)).expect("valid identifier"))
        .collect();

    let mut set = HandleSet::new(Arc::clone(&repo));
    let mut members = IntSet::new();
    for _ in 0..1000 {
        let handle = handles[rng.usize(..handles.len())];
        match rng.u8(..4) {
            0 => {
                let changed = set.add(handle).expect("live handle");
                assert_eq!(changed, members.add(handle));
            }
            1 => assert_eq!(set.remove(handle), members.remove(handle)),
            2 => {
                let batch: IntSet = (0..3).map(|_| handles[rng.usize(..handles.len())]).collect();
                let added = set.update(&batch);
                assert_eq!(added, batch.difference(&members));
                members = members.union(&batch);
            }
            _ => {
                let batch: IntSet = (0..3).map(|_| handles[rng.usize(..handles.len())]).collect();
                let removed = set.difference_update(&batch);
                assert_eq!(removed, members.intersection(&batch));
                members = members.difference(&batch);
            }
        }
        assert_eq!(set.peek(), &members);
        for &h in &handles {
            let expected = 1 + u32::from(members.contains(h));
            assert_eq!(repo.refcount(h), expected);
        }
    }

    let copy = set.clone();
    for h in members.iter() {
        assert_eq!(repo.refcount(h), 3);
    }
    drop(copy);
    drop(set);
    for &h in &handles {
        assert_eq!(repo.refcount(h), 1);
    }
}

#[test]
fn requested_handles_are_held_for_the_caller() {
    let harness = Harness::new();
    let fake = harness.fake_connection("handles");
    fake.object.on_method(IFACE_CONNECTION, "RequestHandles", |call| {
        let ids = call.args.get(1).and_then(Value::to_string_vec).unwrap_or_default();
        let handles: Vec<u32> = (0..ids.len() as u32).map(|n| 10 + n).collect();
        Ok(vec![Value::from(handles)])
    });
    let connection = Connection::new(&harness.daemon, None, &fake.path).expect("connection name is owned");

    let outcome: Arc<Mutex<Option<Result<Vec<Handle>>>>> = Arc::new(Mutex::new(None));
    let slot = Arc::clone(&outcome);
    connection
        .request_handles(
            HandleType::Contact,
            vec!["Alice@Example.com/phone".to_owned(), "bob@example.com".to_owned()],
            move |result| *slot.lock() = Some(result),
        )
        .expect("connection is valid");
    harness.dispatch();

    let handles = outcome.lock().take().expect("reply delivered").expect("handles");
    assert_eq!(handles, vec![10, 11]);
    let repo = connection.contact_repository();
    assert_eq!(repo.inspect(10).as_deref(), Some("alice@example.com"));
    assert_eq!(repo.refcount(11), 1);

    let contact = connection.contact_for_handle(11).expect("held handle");
    assert_eq!(contact.identifier(), "bob@example.com");
    assert_eq!(repo.refcount(11), 2);
    drop(contact);
    assert_eq!(repo.refcount(11), 1);

    connection.release_handle(HandleType::Contact, 11).expect("held handle");
    assert!(!repo.is_valid(11));
    assert_eq!(
        connection.contact_for_handle(11).unwrap_err().kind,
        ErrorKind::InvalidHandle
    );
}

#[test]
fn short_request_handles_reply_is_inconsistent() {
    let harness = Harness::new();
    let fake = harness.fake_connection("short");
    fake.object.on_method(IFACE_CONNECTION, "RequestHandles", |_| {
        Ok(vec![Value::from(vec![7u32])])
    });
    let connection = Connection::new(&harness.daemon, None, &fake.path).expect("connection name is owned");

    let outcome: Arc<Mutex<Option<Result<Vec<Handle>>>>> = Arc::new(Mutex::new(None));
    let slot = Arc::clone(&outcome);
    connection
        .request_handles(
            HandleType::Contact,
            vec!["a@example.com".to_owned(), "b@example.com".to_owned()],
            move |result| *slot.lock() = Some(result),
        )
        .expect("connection is valid");
    harness.dispatch();

    let error = outcome.lock().take().expect("reply delivered").unwrap_err();
    assert_eq!(error.kind, ErrorKind::Inconsistent);
    assert!(!connection.contact_repository().is_valid(7));
}

#[test]
fn handle_survives_until_its_last_set_is_dropped() {
    let repo = Arc::new(HandleRepository::new("/test/lifetime", HandleType::Contact));
    let alice = repo.ensure("alice").expect("valid identifier");
    assert_eq!(repo.refcount(alice), 1);

    let mut a = HandleSet::new(Arc::clone(&repo));
    let mut b = HandleSet::new(Arc::clone(&repo));
    assert!(a.add(alice).expect("live handle"));
    assert!(b.add(alice).expect("live handle"));
    assert!(!b.add(alice).expect("live handle"));
    repo.unref_handle(alice).expect("caller's reference");
    assert_eq!(repo.refcount(alice), 2);

    drop(a);
    assert_eq!(repo.refcount(alice), 1);
    assert_eq!(repo.inspect(alice).as_deref(), Some("alice"));

    drop(b);
    assert!(!repo.is_valid(alice));
    assert_eq!(repo.lookup("alice"), None);
}
