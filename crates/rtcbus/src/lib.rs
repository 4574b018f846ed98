// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! # rtcbus - typed client proxies for a bus-based RTC framework
//!
//! Client-side runtime for a Telepathy-style real-time communication
//! framework: remote objects living on a message bus (connection
//! managers, connections, channels, accounts, the channel dispatcher) are
//! reached through reference-counted proxies that track invalidation,
//! prepare optional features on demand and deliver typed signals.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use rtcbus::bus::{BusDaemon, MemoryBus};
//! use rtcbus::connection::Connection;
//! use rtcbus::Result;
//!
//! fn main() -> Result<()> {
//!     let bus = MemoryBus::new();
//!     let daemon = BusDaemon::new(bus.connect());
//!
//!     let connection = Connection::new(&daemon, None, "/org/freedesktop/Telepathy/Connection/cm/proto/me")?;
//!     connection.proxy().prepare(&[Connection::FEATURE_CORE], |result| {
//!         if let Err(e) = result {
//!             log::warn!("connection could not be prepared: {}", e);
//!         }
//!     });
//!     connection.proxy().connect_invalidated(|error| {
//!         log::info!("connection is gone: {}", error);
//!     });
//!
//!     // replies and signals are delivered when the bus is pumped
//!     bus.dispatch();
//!     Ok(())
//! }
//! ```
//!
//! ## Architecture
//!
//! ```text
//! +---------------------------------------------------------------------+
//! |                          Client framework                           |
//! |   BaseClient -> Observe / Approve / Handle contexts | ClientFactory |
//! +---------------------------------------------------------------------+
//! |                           Typed proxies                             |
//! |   Account | Connection | Channel (Group, Text) | ChannelDispatcher  |
//! |   ChannelRequest | ChannelDispatchOperation | AccountChannelRequest |
//! +---------------------------------------------------------------------+
//! |                            Proxy core                               |
//! |   invalidation | features | pending calls | signal connections     |
//! |   properties | error registry | handle repository                  |
//! +---------------------------------------------------------------------+
//! |                               Bus                                   |
//! |   BusConnection trait | BusDaemon | MemoryBus (in-process)         |
//! +---------------------------------------------------------------------+
//! ```
//!
//! ## Key Types
//!
//! | Type | Description |
//! |------|-------------|
//! | [`Proxy`] | Handle on one remote object, invalidated at most once |
//! | [`BusDaemon`] | Name ownership and resolution on a bus connection |
//! | [`Connection`] | A protocol connection and its self contact |
//! | [`Channel`] | A communication channel (text, call, tube, ...) |
//! | [`BaseClient`] | Observer, approver and/or handler exported on the bus |
//! | [`ProxyError`] | Error with a domain, a kind and a bus error name |
//!
//! ## Logging
//!
//! Everything logs through the `log` facade. Debug output is grouped in
//! categories ([`logging::DebugFlags`]) switched on with
//! [`logging::set_debug_flags`] or [`logging::set_debug_flags_from_str`].

/// Bus abstraction, bus daemon helpers and the in-process memory bus.
pub mod bus;
/// Well-known names, interfaces, properties and runtime settings.
pub mod config;
/// Proxy error model and the bus error name registry.
pub mod error;
/// Listener lists used for every local notification.
pub mod event;
/// Handle types, reference-counted handle repository and handle sets.
pub mod handle;
/// Sparse set of unsigned integers.
pub mod intset;
/// Debug categories over the `log` facade.
pub mod logging;
/// Proxy core: invalidation, features, pending calls and signals.
pub mod proxy;
/// Helpers for bus names, object paths and identifiers.
pub mod util;
/// Dynamically typed bus values and string-keyed maps of them.
pub mod value;
/// Accessors and matching helpers for `a{sv}` maps.
pub mod asv;

/// Accounts held by the account manager.
pub mod account;
/// Requesting channels through an account.
pub mod account_channel_request;
/// Channels and their group and text interfaces.
pub mod channel;
/// Dispatch operations offered to approvers.
pub mod channel_dispatch_operation;
/// The channel dispatcher.
pub mod channel_dispatcher;
/// Requests in progress at the channel dispatcher.
pub mod channel_request;
/// Observers, approvers and handlers.
pub mod client;
/// Protocol connections.
pub mod connection;
/// Contacts of a connection.
pub mod contact;
/// Multi-part messages.
pub mod message;

#[doc(hidden)]
pub use log as __log;

pub use bus::{BusConnection, BusDaemon, BusError, MemoryBus};
pub use channel::Channel;
pub use client::BaseClient;
pub use connection::Connection;
pub use error::{ErrorDomain, ErrorKind, ProxyError, Result};
pub use proxy::{FeatureId, Proxy};
pub use value::{Asv, Value};
