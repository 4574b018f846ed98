// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! In-process bus daemon.
//!
//! # Architecture
//!
//! ```text
//! MemoryBus
//! +-- state: Mutex<BusState>
//! |   +-- connections      unique names (":B.N", B unique per bus)
//! |   +-- names            well-known -> unique
//! |   +-- objects          (unique, path) -> ObjectHandler
//! |   +-- matches          MatchId -> (rule, SignalHandler)
//! |   +-- pending          CallSerial -> ReplyHandler
//! +-- queue: crossbeam unbounded channel of jobs
//! ```
//!
//! Every routing step (call delivery, reply delivery, signal fan-out) is a
//! job on the queue; nothing runs until [`MemoryBus::dispatch`] pumps it.
//! This gives one FIFO order for all replies and signals, and user code never
//! runs inside `call()` or `emit_signal()`. Jobs run with no bus lock held.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Weak};

use crossbeam::channel::{unbounded, Receiver, Sender};
use parking_lot::Mutex;

use super::{
    BusConnection, BusError, CallSerial, IncomingCall, MatchId, MatchRule, MethodCall,
    ObjectHandler, Reply, ReplyHandler, Responder, SignalHandler, SignalMessage,
};
use crate::config::{
    DBUS_ERROR_NAME_HAS_NO_OWNER, DBUS_ERROR_PREFIX, DBUS_ERROR_SERVICE_UNKNOWN,
    DBUS_ERROR_UNKNOWN_METHOD, DBUS_ERROR_UNKNOWN_OBJECT, DBUS_INTERFACE, DBUS_PATH, DBUS_SERVICE,
    ERROR_PREFIX,
};
use crate::logging::DebugFlags;
use crate::rtc_debug;
use crate::util::is_unique_name;
use crate::value::Value;

type Job = Box<dyn FnOnce() + Send>;

struct MatchEntry {
    owner: String,
    rule: MatchRule,
    handler: SignalHandler,
}

struct PendingEntry {
    caller: String,
    reply: ReplyHandler,
}

#[derive(Default)]
struct BusState {
    connections: HashSet<String>,
    names: HashMap<String, String>,
    objects: HashMap<(String, String), Arc<dyn ObjectHandler>>,
    matches: HashMap<MatchId, MatchEntry>,
    pending: HashMap<CallSerial, PendingEntry>,
    next_serial: CallSerial,
    next_match: MatchId,
}

impl BusState {
    fn resolve(&self, name: &str) -> Option<String> {
        if is_unique_name(name) {
            self.connections.contains(name).then(|| name.to_owned())
        } else {
            self.names.get(name).cloned()
        }
    }
}

/// In-process bus daemon. See the module docs.
pub struct MemoryBus {
    state: Mutex<BusState>,
    tx: Sender<Job>,
    rx: Receiver<Job>,
    /// Process-unique bus number, the first part of every unique name
    id: u64,
    next_connection: AtomicU64,
    weak_self: Weak<MemoryBus>,
}

impl MemoryBus {
    pub fn new() -> Arc<Self> {
        static NEXT_BUS: AtomicU64 = AtomicU64::new(1);
        let (tx, rx) = unbounded();
        Arc::new_cyclic(|weak| Self {
            state: Mutex::new(BusState::default()),
            tx,
            rx,
            id: NEXT_BUS.fetch_add(1, Ordering::Relaxed),
            next_connection: AtomicU64::new(1),
            weak_self: weak.clone(),
        })
    }

    /// Open a new connection with a fresh unique name.
    pub fn connect(&self) -> Arc<MemoryConnection> {
        let n = self.next_connection.fetch_add(1, Ordering::Relaxed);
        let unique = format!(":{}.{}", self.id, n);
        self.state.lock().connections.insert(unique.clone());
        self.emit_name_owner_changed(&unique, "", &unique);
        rtc_debug!(DebugFlags::BUS, "[MemoryBus::connect] {}", unique);
        Arc::new(MemoryConnection {
            bus: self.weak_self.upgrade().unwrap_or_else(MemoryBus::new),
            unique_name: unique,
            closed: AtomicBool::new(false),
        })
    }

    /// Run queued jobs until the queue is empty. Returns how many ran.
    pub fn dispatch(&self) -> usize {
        let mut ran = 0;
        while let Ok(job) = self.rx.try_recv() {
            job();
            ran += 1;
        }
        ran
    }

    /// Run at most one queued job. Returns false if the queue was empty.
    pub fn dispatch_one(&self) -> bool {
        match self.rx.try_recv() {
            Ok(job) => {
                job();
                true
            }
            Err(_) => false,
        }
    }

    /// Jobs waiting in the queue.
    pub fn queued(&self) -> usize {
        self.rx.len()
    }

    /// Calls sent but not yet answered or cancelled.
    pub fn pending_calls(&self) -> usize {
        self.state.lock().pending.len()
    }

    /// Installed match rules across all connections.
    pub fn match_count(&self) -> usize {
        self.state.lock().matches.len()
    }

    fn enqueue(&self, job: Job) {
        // the receiver lives as long as self
        let _ = self.tx.send(job);
    }

    fn get_name_owner(&self, name: &str) -> Result<String, BusError> {
        if name == DBUS_SERVICE {
            return Ok(DBUS_SERVICE.to_owned());
        }
        self.state.lock().resolve(name).ok_or_else(|| {
            BusError::new(
                DBUS_ERROR_NAME_HAS_NO_OWNER,
                format!("Could not get owner of name '{}': no such name", name),
            )
        })
    }

    fn request_name(&self, unique: &str, name: &str) -> Result<(), BusError> {
        {
            let mut state = self.state.lock();
            match state.names.get(name) {
                Some(owner) if owner == unique => return Ok(()),
                Some(_) => {
                    return Err(BusError::new(
                        format!("{}NotAvailable", ERROR_PREFIX),
                        format!("Name '{}' already in use by another process", name),
                    ))
                }
                None => {
                    state.names.insert(name.to_owned(), unique.to_owned());
                }
            }
        }
        rtc_debug!(DebugFlags::BUS, "[MemoryBus::request_name] {} now owns {}", unique, name);
        self.emit_name_owner_changed(name, "", unique);
        Ok(())
    }

    fn release_name(&self, unique: &str, name: &str) -> Result<(), BusError> {
        {
            let mut state = self.state.lock();
            if state.names.get(name).map(String::as_str) != Some(unique) {
                return Err(BusError::new(
                    format!("{}NotAvailable", ERROR_PREFIX),
                    format!("Name '{}' is not owned by {}", name, unique),
                ));
            }
            state.names.remove(name);
        }
        self.emit_name_owner_changed(name, unique, "");
        Ok(())
    }

    fn call(&self, caller: &str, call: MethodCall, reply: ReplyHandler) -> CallSerial {
        let serial = {
            let mut state = self.state.lock();
            state.next_serial += 1;
            let serial = state.next_serial;
            state.pending.insert(
                serial,
                PendingEntry {
                    caller: caller.to_owned(),
                    reply,
                },
            );
            serial
        };
        rtc_debug!(
            DebugFlags::BUS,
            "[MemoryBus::call] #{} {} -> {} {} {}.{}",
            serial,
            caller,
            call.destination,
            call.path,
            call.interface,
            call.member
        );
        let bus = self.weak_self.clone();
        let sender = caller.to_owned();
        self.enqueue(Box::new(move || {
            if let Some(bus) = bus.upgrade() {
                bus.route_call(serial, sender, call);
            }
        }));
        serial
    }

    fn route_call(self: &Arc<Self>, serial: CallSerial, sender: String, call: MethodCall) {
        let target = {
            let state = self.state.lock();
            if !state.pending.contains_key(&serial) {
                // cancelled before delivery
                return;
            }
            match state.resolve(&call.destination) {
                None => Err(BusError::new(
                    DBUS_ERROR_SERVICE_UNKNOWN,
                    format!("The name {} was not provided by any service", call.destination),
                )),
                Some(owner) => state
                    .objects
                    .get(&(owner, call.path.clone()))
                    .cloned()
                    .ok_or_else(|| {
                        BusError::new(
                            DBUS_ERROR_UNKNOWN_OBJECT,
                            format!("No such object path '{}'", call.path),
                        )
                    }),
            }
        };
        let target = if call.destination == DBUS_SERVICE {
            Err(BusError::new(
                DBUS_ERROR_UNKNOWN_METHOD,
                format!("{} is not served by the in-memory daemon", call.member),
            ))
        } else {
            target
        };

        match target {
            Err(e) => self.complete(serial, Err(e)),
            Ok(handler) => {
                let bus = Arc::downgrade(self);
                let responder = Responder::new(Box::new(move |reply: Reply| {
                    if let Some(bus) = bus.upgrade() {
                        let inner = Arc::downgrade(&bus);
                        bus.enqueue(Box::new(move || {
                            if let Some(bus) = inner.upgrade() {
                                bus.complete(serial, reply);
                            }
                        }));
                    }
                }));
                handler.handle_call(
                    IncomingCall {
                        sender,
                        path: call.path,
                        interface: call.interface,
                        member: call.member,
                        args: call.args,
                    },
                    responder,
                );
            }
        }
    }

    fn complete(&self, serial: CallSerial, reply: Reply) {
        let entry = self.state.lock().pending.remove(&serial);
        if let Some(entry) = entry {
            (entry.reply)(reply);
        }
    }

    fn cancel_call(&self, serial: CallSerial) {
        // dropped outside the lock: the handler may own proxies
        let entry = self.state.lock().pending.remove(&serial);
        drop(entry);
    }

    fn add_match(&self, owner: &str, rule: MatchRule, handler: SignalHandler) -> MatchId {
        let mut state = self.state.lock();
        state.next_match += 1;
        let id = state.next_match;
        state.matches.insert(
            id,
            MatchEntry {
                owner: owner.to_owned(),
                rule,
                handler,
            },
        );
        id
    }

    fn remove_match(&self, id: MatchId) {
        let entry = self.state.lock().matches.remove(&id);
        drop(entry);
    }

    fn emit(&self, msg: SignalMessage) {
        let bus = self.weak_self.clone();
        self.enqueue(Box::new(move || {
            if let Some(bus) = bus.upgrade() {
                bus.deliver_signal(&msg);
            }
        }));
    }

    fn deliver_signal(&self, msg: &SignalMessage) {
        let mut handlers: Vec<(MatchId, SignalHandler)> = {
            let state = self.state.lock();
            state
                .matches
                .iter()
                .filter(|(_, entry)| {
                    let owner = entry
                        .rule
                        .sender
                        .as_deref()
                        .filter(|s| !is_unique_name(s))
                        .and_then(|s| state.names.get(s).map(String::as_str));
                    entry.rule.matches(msg, owner)
                })
                .map(|(id, entry)| (*id, Arc::clone(&entry.handler)))
                .collect()
        };
        handlers.sort_unstable_by_key(|(id, _)| *id);
        for (id, handler) in handlers {
            // a handler may have removed later matches
            if self.state.lock().matches.contains_key(&id) {
                handler(msg);
            }
        }
    }

    fn emit_name_owner_changed(&self, name: &str, old: &str, new: &str) {
        self.emit(SignalMessage {
            sender: DBUS_SERVICE.to_owned(),
            path: DBUS_PATH.to_owned(),
            interface: DBUS_INTERFACE.to_owned(),
            member: "NameOwnerChanged".to_owned(),
            args: vec![Value::from(name), Value::from(old), Value::from(new)],
        });
    }

    fn export_object(
        &self,
        owner: &str,
        path: &str,
        handler: Arc<dyn ObjectHandler>,
    ) -> Result<(), BusError> {
        let mut state = self.state.lock();
        let key = (owner.to_owned(), path.to_owned());
        if state.objects.contains_key(&key) {
            return Err(BusError::new(
                format!("{}ObjectPathInUse", DBUS_ERROR_PREFIX),
                format!("An object is already exported at {}", path),
            ));
        }
        state.objects.insert(key, handler);
        Ok(())
    }

    fn unexport_object(&self, owner: &str, path: &str) {
        let handler = self
            .state
            .lock()
            .objects
            .remove(&(owner.to_owned(), path.to_owned()));
        drop(handler);
    }

    fn disconnect(&self, unique: &str) {
        let (released, objects, matches, pending) = {
            let mut state = self.state.lock();
            state.connections.remove(unique);
            let released: Vec<String> = state
                .names
                .iter()
                .filter(|(_, owner)| owner.as_str() == unique)
                .map(|(name, _)| name.clone())
                .collect();
            for name in &released {
                state.names.remove(name);
            }
            let object_keys: Vec<(String, String)> = state
                .objects
                .keys()
                .filter(|(owner, _)| owner == unique)
                .cloned()
                .collect();
            let objects: Vec<_> = object_keys
                .iter()
                .filter_map(|k| state.objects.remove(k))
                .collect();
            let match_ids: Vec<MatchId> = state
                .matches
                .iter()
                .filter(|(_, m)| m.owner == unique)
                .map(|(id, _)| *id)
                .collect();
            let matches: Vec<_> = match_ids
                .iter()
                .filter_map(|id| state.matches.remove(id))
                .collect();
            let serials: Vec<CallSerial> = state
                .pending
                .iter()
                .filter(|(_, p)| p.caller == unique)
                .map(|(s, _)| *s)
                .collect();
            let pending: Vec<_> = serials
                .iter()
                .filter_map(|s| state.pending.remove(s))
                .collect();
            (released, objects, matches, pending)
        };
        drop((objects, matches, pending));
        rtc_debug!(DebugFlags::BUS, "[MemoryBus::disconnect] {}", unique);
        for name in released {
            self.emit_name_owner_changed(&name, unique, "");
        }
        self.emit_name_owner_changed(unique, unique, "");
    }
}

impl std::fmt::Debug for MemoryBus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.state.lock();
        f.debug_struct("MemoryBus")
            .field("connections", &state.connections.len())
            .field("names", &state.names.len())
            .field("pending", &state.pending.len())
            .finish()
    }
}

/// One connection to a [`MemoryBus`].
pub struct MemoryConnection {
    bus: Arc<MemoryBus>,
    unique_name: String,
    closed: AtomicBool,
}

impl MemoryConnection {
    pub fn bus(&self) -> &Arc<MemoryBus> {
        &self.bus
    }

    /// Drop off the bus: names are released, objects unexported and match
    /// rules removed. Outstanding calls made by this connection are dropped.
    pub fn close(&self) {
        if !self.closed.swap(true, Ordering::AcqRel) {
            self.bus.disconnect(&self.unique_name);
        }
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }
}

impl Drop for MemoryConnection {
    fn drop(&mut self) {
        self.close();
    }
}

impl std::fmt::Debug for MemoryConnection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MemoryConnection")
            .field("unique_name", &self.unique_name)
            .field("closed", &self.is_closed())
            .finish()
    }
}

impl BusConnection for MemoryConnection {
    fn unique_name(&self) -> String {
        self.unique_name.clone()
    }

    fn get_name_owner(&self, name: &str) -> Result<String, BusError> {
        self.bus.get_name_owner(name)
    }

    fn request_name(&self, name: &str) -> Result<(), BusError> {
        self.bus.request_name(&self.unique_name, name)
    }

    fn release_name(&self, name: &str) -> Result<(), BusError> {
        self.bus.release_name(&self.unique_name, name)
    }

    fn call(&self, call: MethodCall, reply: ReplyHandler) -> CallSerial {
        self.bus.call(&self.unique_name, call, reply)
    }

    fn cancel_call(&self, serial: CallSerial) {
        self.bus.cancel_call(serial);
    }

    fn add_match(&self, rule: MatchRule, handler: SignalHandler) -> MatchId {
        self.bus.add_match(&self.unique_name, rule, handler)
    }

    fn remove_match(&self, id: MatchId) {
        self.bus.remove_match(id);
    }

    fn emit_signal(&self, path: &str, interface: &str, member: &str, args: Vec<Value>) {
        self.bus.emit(SignalMessage {
            sender: self.unique_name.clone(),
            path: path.to_owned(),
            interface: interface.to_owned(),
            member: member.to_owned(),
            args,
        });
    }

    fn export_object(&self, path: &str, handler: Arc<dyn ObjectHandler>) -> Result<(), BusError> {
        self.bus.export_object(&self.unique_name, path, handler)
    }

    fn unexport_object(&self, path: &str) {
        self.bus.unexport_object(&self.unique_name, path);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Echo;

    impl ObjectHandler for Echo {
        fn handle_call(&self, call: IncomingCall, responder: Responder) {
            match call.member.as_str() {
                "Echo" => responder.reply(call.args),
                "Silent" => drop(responder),
                _ => responder.error(BusError::new(DBUS_ERROR_UNKNOWN_METHOD, "no")),
            }
        }
    }

    fn capture() -> (Arc<Mutex<Vec<Reply>>>, impl Fn() -> ReplyHandler) {
        let got = Arc::new(Mutex::new(Vec::new()));
        let g = got.clone();
        (got, move || {
            let g = g.clone();
            Box::new(move |r| g.lock().push(r)) as ReplyHandler
        })
    }

    #[test]
    fn call_round_trip_is_queued() {
        let bus = MemoryBus::new();
        let service = bus.connect();
        let client = bus.connect();
        service.request_name("org.example.Echo").expect("free name");
        service.export_object("/echo", Arc::new(Echo)).expect("free path");

        let (got, handler) = capture();
        client.call(
            MethodCall::new("org.example.Echo", "/echo", "org.example.Echo", "Echo", vec![Value::U32(3)]),
            handler(),
        );
        assert!(got.lock().is_empty());
        bus.dispatch();
        assert_eq!(got.lock().as_slice(), &[Ok(vec![Value::U32(3)])]);
    }

    #[test]
    fn routing_errors() {
        let bus = MemoryBus::new();
        let service = bus.connect();
        let client = bus.connect();
        service.export_object("/echo", Arc::new(Echo)).expect("free path");
        let (got, handler) = capture();
        client.call(MethodCall::new("org.nobody", "/", "a.b", "X", vec![]), handler());
        client.call(MethodCall::new(service.unique_name(), "/nope", "a.b", "X", vec![]), handler());
        client.call(MethodCall::new(service.unique_name(), "/echo", "a.b", "Silent", vec![]), handler());
        bus.dispatch();
        let names: Vec<String> = got
            .lock()
            .iter()
            .map(|r| r.as_ref().unwrap_err().name.clone())
            .collect();
        assert_eq!(
            names,
            vec![
                DBUS_ERROR_SERVICE_UNKNOWN.to_owned(),
                DBUS_ERROR_UNKNOWN_OBJECT.to_owned(),
                crate::config::DBUS_ERROR_NO_REPLY.to_owned(),
            ]
        );
    }

    #[test]
    fn cancelled_calls_never_reply() {
        let bus = MemoryBus::new();
        let service = bus.connect();
        service.export_object("/echo", Arc::new(Echo)).expect("free path");
        let (got, handler) = capture();
        let serial = service.call(
            MethodCall::new(service.unique_name(), "/echo", "a.b", "Echo", vec![]),
            handler(),
        );
        service.cancel_call(serial);
        bus.dispatch();
        assert!(got.lock().is_empty());
        assert_eq!(bus.pending_calls(), 0);
    }

    #[test]
    fn name_ownership_and_signals() {
        let bus = MemoryBus::new();
        let a = bus.connect();
        let b = bus.connect();
        a.request_name("org.example.Name").expect("free");
        assert!(b.request_name("org.example.Name").is_err());
        assert_eq!(b.get_name_owner("org.example.Name"), Ok(a.unique_name()));

        let seen = Arc::new(Mutex::new(Vec::new()));
        let s = seen.clone();
        b.add_match(
            MatchRule::signal("org.example", "Ping").sender("org.example.Name"),
            Arc::new(move |m: &SignalMessage| s.lock().push(m.args.clone())),
        );
        bus.dispatch();
        a.emit_signal("/x", "org.example", "Ping", vec![Value::U32(1)]);
        b.emit_signal("/x", "org.example", "Ping", vec![Value::U32(2)]);
        bus.dispatch();
        assert_eq!(seen.lock().as_slice(), &[vec![Value::U32(1)]]);
    }

    #[test]
    fn closing_releases_names() {
        let bus = MemoryBus::new();
        let a = bus.connect();
        let watcher = bus.connect();
        a.request_name("org.example.Gone").expect("free");
        bus.dispatch();

        let changes = Arc::new(Mutex::new(Vec::new()));
        let c = changes.clone();
        watcher.add_match(
            MatchRule::name_owner_changed("org.example.Gone"),
            Arc::new(move |m: &SignalMessage| {
                c.lock().push(m.args[2].as_str().unwrap_or_default().to_owned())
            }),
        );
        a.close();
        bus.dispatch();
        assert_eq!(changes.lock().as_slice(), &["".to_owned()]);
        assert!(watcher.get_name_owner("org.example.Gone").is_err());
    }
}
