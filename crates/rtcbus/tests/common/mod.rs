// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Shared fixtures for the integration tests: scriptable fake objects and a
//! harness that plays the connection manager, the account manager and the
//! channel dispatcher on one service connection.

#![allow(dead_code)]

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Once};

use parking_lot::Mutex;
use rtcbus::bus::{
    BusConnection, BusDaemon, BusError, IncomingCall, MemoryBus, MemoryConnection, MethodCall, ObjectHandler, Reply,
    Responder,
};
use rtcbus::config::{
    ACCOUNT_MANAGER_BUS_NAME, ACCOUNT_OBJECT_PATH_BASE, CHANNEL_DISPATCHER_BUS_NAME, CHANNEL_DISPATCHER_OBJECT_PATH,
    CONN_OBJECT_PATH_BASE, DBUS_ERROR_INVALID_ARGS, DBUS_ERROR_UNKNOWN_METHOD, IFACE_ACCOUNT,
    IFACE_CHANNEL_DISPATCH_OPERATION, IFACE_CONNECTION, IFACE_PROPERTIES, PROP_CHANNEL_INTERFACES,
    PROP_CHANNEL_REQUESTED, PROP_CHANNEL_TARGET_HANDLE, PROP_CHANNEL_TARGET_HANDLE_TYPE, PROP_CHANNEL_TARGET_ID,
    PROP_CHANNEL_TYPE,
};
use rtcbus::util::bus_name_from_object_path;
use rtcbus::value::{Asv, Value};

pub fn init_logging() {
    static INIT: Once = Once::new();
    INIT.call_once(|| {
        let _ = env_logger::builder().is_test(true).try_init();
    });
}

static NEXT_ID: AtomicUsize = AtomicUsize::new(1);

/// Process-wide counter so tests running in parallel never share object
/// paths (handle repositories are keyed by connection path).
pub fn next_id() -> usize {
    NEXT_ID.fetch_add(1, Ordering::Relaxed)
}

pub fn unique_connection_path(tag: &str) -> String {
    format!("{}fake/proto/{}_{}", CONN_OBJECT_PATH_BASE, tag, next_id())
}

pub fn unique_account_path(tag: &str) -> String {
    format!("{}fake/proto/{}_{}", ACCOUNT_OBJECT_PATH_BASE, tag, next_id())
}

pub type MethodFn = Arc<dyn Fn(&IncomingCall) -> Reply + Send + Sync>;

/// Exported object answering `Properties.Get`/`GetAll` from a table and
/// any other method from scripted closures. Every call is recorded.
#[derive(Default)]
pub struct FakeObject {
    properties: Mutex<HashMap<String, Asv>>,
    methods: Mutex<HashMap<String, MethodFn>>,
    calls: Mutex<Vec<IncomingCall>>,
}

impl FakeObject {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn with_properties(interface: &str, props: Asv) -> Arc<Self> {
        let object = Self::new();
        object.set_properties(interface, props);
        object
    }

    pub fn set_properties(&self, interface: &str, props: Asv) {
        self.properties.lock().insert(interface.to_owned(), props);
    }

    pub fn on_method<F>(&self, interface: &str, member: &str, method: F)
    where
        F: Fn(&IncomingCall) -> Reply + Send + Sync + 'static,
    {
        self.methods
            .lock()
            .insert(format!("{}.{}", interface, member), Arc::new(method));
    }

    pub fn calls(&self) -> Vec<IncomingCall> {
        self.calls.lock().clone()
    }

    /// Calls to `member`, on any interface.
    pub fn count(&self, member: &str) -> usize {
        self.calls.lock().iter().filter(|c| c.member == member).count()
    }

    fn properties_call(&self, call: &IncomingCall) -> Reply {
        let interface = call.args.first().and_then(Value::as_str).unwrap_or_default();
        let props = self.properties.lock().get(interface).cloned().unwrap_or_default();
        match call.member.as_str() {
            "GetAll" => Ok(vec![Value::Dict(props)]),
            "Get" => {
                let name = call.args.get(1).and_then(Value::as_str).unwrap_or_default();
                props.get(name).cloned().map(|v| vec![v]).ok_or_else(|| {
                    BusError::new(
                        DBUS_ERROR_INVALID_ARGS,
                        format!("No property {} on {}", name, interface),
                    )
                })
            }
            member => Err(BusError::new(DBUS_ERROR_UNKNOWN_METHOD, member)),
        }
    }
}

impl ObjectHandler for FakeObject {
    fn handle_call(&self, call: IncomingCall, responder: Responder) {
        self.calls.lock().push(call.clone());
        let key = format!("{}.{}", call.interface, call.member);
        let method = self.methods.lock().get(&key).cloned();
        let reply = match method {
            Some(method) => method(&call),
            None if call.interface == IFACE_PROPERTIES => self.properties_call(&call),
            None => Err(BusError::new(
                DBUS_ERROR_UNKNOWN_METHOD,
                format!("No such method {}", key),
            )),
        };
        match reply {
            Ok(values) => responder.reply(values),
            Err(e) => responder.error(e),
        }
    }
}

/// Slot filled by the reply of a call made through [`Harness::call`].
pub type ReplySlot = Arc<Mutex<Option<Reply>>>;

pub struct FakeConnection {
    pub path: String,
    pub bus_name: String,
    pub object: Arc<FakeObject>,
}

pub struct Harness {
    pub bus: Arc<MemoryBus>,
    /// Plays every remote service
    pub service: Arc<MemoryConnection>,
    /// Client side daemon the proxies under test are built on
    pub daemon: BusDaemon,
}

impl Harness {
    pub fn new() -> Self {
        init_logging();
        let bus = MemoryBus::new();
        let service = bus.connect();
        let daemon = BusDaemon::new(bus.connect());
        service
            .request_name(ACCOUNT_MANAGER_BUS_NAME)
            .expect("account manager name is free");
        service
            .request_name(CHANNEL_DISPATCHER_BUS_NAME)
            .expect("dispatcher name is free");
        bus.dispatch();
        Self { bus, service, daemon }
    }

    pub fn dispatch(&self) -> usize {
        self.bus.dispatch()
    }

    pub fn export(&self, path: &str, object: Arc<FakeObject>) {
        self.service
            .export_object(path, object)
            .expect("object path is free");
    }

    /// A connection object owning the bus name derived from its path, with
    /// core properties and self handle 1 (`me@example.com`).
    pub fn fake_connection(&self, tag: &str) -> FakeConnection {
        let path = unique_connection_path(tag);
        let bus_name = bus_name_from_object_path(&path).expect("connection paths derive a bus name");
        self.service.request_name(&bus_name).expect("connection name is free");
        let object = FakeObject::with_properties(
            IFACE_CONNECTION,
            rtcbus::asv! {
                "Interfaces" => Vec::<String>::new(),
                "Status" => 0u32,
                "SelfHandle" => 1u32,
                "SelfID" => "me@example.com",
            },
        );
        self.export(&path, Arc::clone(&object));
        self.dispatch();
        FakeConnection { path, bus_name, object }
    }

    /// An account of the account manager, enabled and valid.
    pub fn fake_account(&self, tag: &str) -> (String, Arc<FakeObject>) {
        let path = unique_account_path(tag);
        let object = FakeObject::with_properties(
            IFACE_ACCOUNT,
            rtcbus::asv! {
                "DisplayName" => tag,
                "Enabled" => true,
                "Valid" => true,
                "Connection" => Value::ObjectPath("/".to_owned()),
            },
        );
        self.export(&path, Arc::clone(&object));
        (path, object)
    }

    /// A dispatch operation object of the dispatcher.
    pub fn fake_dispatch_operation(&self, possible_handlers: &[&str]) -> (String, Arc<FakeObject>) {
        let path = format!("{}/DispatchOperation/op{}", CHANNEL_DISPATCHER_OBJECT_PATH, next_id());
        let object = FakeObject::with_properties(
            IFACE_CHANNEL_DISPATCH_OPERATION,
            rtcbus::asv! { "PossibleHandlers" => possible_handlers },
        );
        self.export(&path, Arc::clone(&object));
        (path, object)
    }

    /// Call `call` from the service side; the slot fills once the bus is
    /// dispatched.
    pub fn call(&self, call: MethodCall) -> ReplySlot {
        let slot: ReplySlot = Arc::new(Mutex::new(None));
        let filled = Arc::clone(&slot);
        self.service.call(
            call,
            Box::new(move |reply: Reply| {
                *filled.lock() = Some(reply);
            }),
        );
        slot
    }
}

/// Immutable properties of a channel, complete enough that the channel
/// core feature needs no bus round trip.
pub fn channel_props(channel_type: &str, interfaces: &[&str], target_id: &str) -> Asv {
    rtcbus::asv! {
        PROP_CHANNEL_TYPE => channel_type,
        PROP_CHANNEL_INTERFACES => interfaces,
        PROP_CHANNEL_TARGET_HANDLE_TYPE => 1u32,
        PROP_CHANNEL_TARGET_HANDLE => 2u32,
        PROP_CHANNEL_TARGET_ID => target_id,
        PROP_CHANNEL_REQUESTED => false,
    }
}

/// One `(oa{sv})` entry of a channel details list.
pub fn channel_entry(path: &str, props: Asv) -> Value {
    Value::Struct(vec![Value::ObjectPath(path.to_owned()), Value::Dict(props)])
}

pub fn object_path(path: &str) -> Value {
    Value::ObjectPath(path.to_owned())
}
