// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Message bus seam.
//!
//! Proxies never talk to a socket; they talk to a [`BusConnection`]. The
//! crate ships [`MemoryBus`], an in-process daemon used by the tests and by
//! applications that embed services in the same process. A real
//! wire-protocol backend implements the same trait.
//!
//! # Delivery model
//!
//! ```text
//! proxy --call()--------> BusConnection --(queue)--> ObjectHandler
//!   ^                                                    |
//!   +------ ReplyHandler <----(queue)---- Responder <----+
//!
//! service --emit_signal()--> BusConnection --(queue)--> every matching SignalHandler
//! ```
//!
//! Replies and signals are always delivered from the connection's dispatch
//! context, never from inside `call()` or `emit_signal()`.

mod daemon;
mod memory;

pub use daemon::{BusDaemon, NameOwnerWatch};
pub use memory::{MemoryBus, MemoryConnection};

use std::fmt;
use std::sync::Arc;

use crate::config::{DBUS_ERROR_NO_REPLY, DBUS_INTERFACE, DBUS_PATH, DBUS_SERVICE};
use crate::value::Value;

/// Serial of an outstanding method call.
pub type CallSerial = u64;

/// Identifier of an installed match rule.
pub type MatchId = u64;

/// Error carried by a bus reply.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{name}: {message}")]
pub struct BusError {
    pub name: String,
    pub message: String,
}

impl BusError {
    pub fn new(name: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            message: message.into(),
        }
    }
}

impl From<&crate::error::ProxyError> for BusError {
    fn from(e: &crate::error::ProxyError) -> Self {
        BusError::new(e.bus_name(), e.message.clone())
    }
}

/// Method reply: out-arguments or an error.
pub type Reply = Result<Vec<Value>, BusError>;

/// Invoked once with the reply of a call, unless the call is cancelled.
pub type ReplyHandler = Box<dyn FnOnce(Reply) + Send>;

/// Invoked for every signal matching a rule.
pub type SignalHandler = Arc<dyn Fn(&SignalMessage) + Send + Sync>;

/// Outgoing method call.
#[derive(Debug, Clone, PartialEq)]
pub struct MethodCall {
    pub destination: String,
    pub path: String,
    pub interface: String,
    pub member: String,
    pub args: Vec<Value>,
}

impl MethodCall {
    pub fn new(
        destination: impl Into<String>,
        path: impl Into<String>,
        interface: impl Into<String>,
        member: impl Into<String>,
        args: Vec<Value>,
    ) -> Self {
        Self {
            destination: destination.into(),
            path: path.into(),
            interface: interface.into(),
            member: member.into(),
            args,
        }
    }
}

/// A method call as seen by the exported object.
#[derive(Debug, Clone, PartialEq)]
pub struct IncomingCall {
    /// Unique name of the caller
    pub sender: String,
    pub path: String,
    pub interface: String,
    pub member: String,
    pub args: Vec<Value>,
}

/// A broadcast signal.
#[derive(Debug, Clone, PartialEq)]
pub struct SignalMessage {
    /// Unique name of the emitter (or the daemon's name)
    pub sender: String,
    pub path: String,
    pub interface: String,
    pub member: String,
    pub args: Vec<Value>,
}

/// Signal filter. `None` fields match anything.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MatchRule {
    /// Unique or well-known name; well-known names match their current owner
    pub sender: Option<String>,
    pub path: Option<String>,
    pub interface: Option<String>,
    pub member: Option<String>,
    /// First argument, compared as a string
    pub arg0: Option<String>,
}

impl MatchRule {
    pub fn signal(interface: impl Into<String>, member: impl Into<String>) -> Self {
        Self {
            interface: Some(interface.into()),
            member: Some(member.into()),
            ..Default::default()
        }
    }

    pub fn sender(mut self, sender: impl Into<String>) -> Self {
        self.sender = Some(sender.into());
        self
    }

    pub fn path(mut self, path: impl Into<String>) -> Self {
        self.path = Some(path.into());
        self
    }

    pub fn arg0(mut self, arg0: impl Into<String>) -> Self {
        self.arg0 = Some(arg0.into());
        self
    }

    /// Rule for `NameOwnerChanged` about `name`.
    pub fn name_owner_changed(name: &str) -> Self {
        MatchRule::signal(DBUS_INTERFACE, "NameOwnerChanged")
            .sender(DBUS_SERVICE)
            .path(DBUS_PATH)
            .arg0(name)
    }

    /// Match `msg`. `sender_owner` is the current owner of `self.sender`
    /// when that is a well-known name.
    pub fn matches(&self, msg: &SignalMessage, sender_owner: Option<&str>) -> bool {
        if let Some(sender) = &self.sender {
            let owner_matches = sender_owner == Some(msg.sender.as_str());
            if *sender != msg.sender && !owner_matches {
                return false;
            }
        }
        if self.path.as_deref().is_some_and(|p| p != msg.path) {
            return false;
        }
        if self.interface.as_deref().is_some_and(|i| i != msg.interface) {
            return false;
        }
        if self.member.as_deref().is_some_and(|m| m != msg.member) {
            return false;
        }
        if let Some(arg0) = &self.arg0 {
            if msg.args.first().and_then(Value::as_str) != Some(arg0.as_str()) {
                return false;
            }
        }
        true
    }
}

impl fmt::Display for MatchRule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut parts = vec!["type='signal'".to_owned()];
        for (key, value) in [
            ("sender", &self.sender),
            ("path", &self.path),
            ("interface", &self.interface),
            ("member", &self.member),
            ("arg0", &self.arg0),
        ] {
            if let Some(v) = value {
                parts.push(format!("{}='{}'", key, v));
            }
        }
        f.write_str(&parts.join(","))
    }
}

/// Reply channel for one incoming call.
///
/// Dropping a responder without replying answers the caller with
/// `org.freedesktop.DBus.Error.NoReply`.
pub struct Responder {
    send: Option<ReplyHandler>,
}

impl Responder {
    pub fn new(send: ReplyHandler) -> Self {
        Self { send: Some(send) }
    }

    /// Successful return with out-arguments.
    pub fn reply(mut self, values: Vec<Value>) {
        if let Some(send) = self.send.take() {
            send(Ok(values));
        }
    }

    pub fn error(mut self, error: BusError) {
        if let Some(send) = self.send.take() {
            send(Err(error));
        }
    }
}

impl Drop for Responder {
    fn drop(&mut self) {
        if let Some(send) = self.send.take() {
            send(Err(BusError::new(
                DBUS_ERROR_NO_REPLY,
                "method returned without a reply",
            )));
        }
    }
}

impl fmt::Debug for Responder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Responder")
            .field("answered", &self.send.is_none())
            .finish()
    }
}

/// Service-side object exported at a path.
pub trait ObjectHandler: Send + Sync {
    /// Handle one call. The responder may be kept and answered later.
    fn handle_call(&self, call: IncomingCall, responder: Responder);
}

/// One connection to a message bus.
pub trait BusConnection: Send + Sync {
    /// Unique name the daemon assigned to this connection (`:1.N`).
    fn unique_name(&self) -> String;

    /// Current owner of `name`, or `NameHasNoOwner`.
    fn get_name_owner(&self, name: &str) -> Result<String, BusError>;

    /// Take ownership of a well-known name. Fails if someone else owns it.
    fn request_name(&self, name: &str) -> Result<(), BusError>;

    fn release_name(&self, name: &str) -> Result<(), BusError>;

    /// Send a method call; `reply` runs later from the dispatch context.
    fn call(&self, call: MethodCall, reply: ReplyHandler) -> CallSerial;

    /// Forget an outstanding call; its reply handler is dropped uncalled.
    fn cancel_call(&self, serial: CallSerial);

    fn add_match(&self, rule: MatchRule, handler: SignalHandler) -> MatchId;

    fn remove_match(&self, id: MatchId);

    /// Broadcast a signal from this connection.
    fn emit_signal(&self, path: &str, interface: &str, member: &str, args: Vec<Value>);

    fn export_object(&self, path: &str, handler: Arc<dyn ObjectHandler>) -> Result<(), BusError>;

    fn unexport_object(&self, path: &str);
}
