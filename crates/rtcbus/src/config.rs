// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! rtcbus Global Configuration - Single Source of Truth
//!
//! This module centralizes ALL bus names, interface names, object-path
//! prefixes and error prefixes consumed verbatim on the bus.
//! **NEVER hardcode them elsewhere!**
//!
//! # Architecture
//!
//! - **Level 1 (Static)**: Compile-time constants (interface names, prefixes)
//! - **Level 2 (Dynamic)**: [`RuntimeConfig`] for the few knobs the embedding
//!   application may change at runtime (debug categories, counters)
//!
//! # Performance
//!
//! - **Lock-free reads**: `ArcSwap` snapshot, readers never block writers
//! - **Atomic counters**: unique client-name suffixes without locking
//!
//! # Example
//!
//! ```
//! use rtcbus::config;
//!
//! assert_eq!(config::IFACE_CHANNEL, "org.freedesktop.Telepathy.Channel");
//! let name = format!("{}{}", config::CLIENT_BUS_NAME_BASE, "Logger");
//! assert_eq!(name, "org.freedesktop.Telepathy.Client.Logger");
//! ```

use crate::logging::DebugFlags;
use arc_swap::ArcSwap;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, OnceLock};

// =======================================================================
// Bus daemon
// =======================================================================

/// Well-known name of the bus daemon itself.
pub const DBUS_SERVICE: &str = "org.freedesktop.DBus";

/// Object path of the bus daemon.
pub const DBUS_PATH: &str = "/org/freedesktop/DBus";

/// Interface of the bus daemon (NameOwnerChanged, GetNameOwner...).
pub const DBUS_INTERFACE: &str = "org.freedesktop.DBus";

/// Generic properties interface implemented by every remote object.
pub const IFACE_PROPERTIES: &str = "org.freedesktop.DBus.Properties";

/// Prefix of the errors emitted by the bus daemon itself.
pub const DBUS_ERROR_PREFIX: &str = "org.freedesktop.DBus.Error.";

/// Bus error returned when a name has no owner.
pub const DBUS_ERROR_NAME_HAS_NO_OWNER: &str = "org.freedesktop.DBus.Error.NameHasNoOwner";

/// Bus error returned when the destination name is not on the bus.
pub const DBUS_ERROR_SERVICE_UNKNOWN: &str = "org.freedesktop.DBus.Error.ServiceUnknown";

/// Bus error returned when no object is exported at the destination path.
pub const DBUS_ERROR_UNKNOWN_OBJECT: &str = "org.freedesktop.DBus.Error.UnknownObject";

/// Bus error returned when the object has no such method.
pub const DBUS_ERROR_UNKNOWN_METHOD: &str = "org.freedesktop.DBus.Error.UnknownMethod";

/// Bus error returned for a malformed call or an unknown property.
pub const DBUS_ERROR_INVALID_ARGS: &str = "org.freedesktop.DBus.Error.InvalidArgs";

/// Bus error returned when an implementation drops a call without replying.
pub const DBUS_ERROR_NO_REPLY: &str = "org.freedesktop.DBus.Error.NoReply";

// =======================================================================
// Framework interfaces (verbatim on the bus)
// =======================================================================

/// Namespace shared by every framework interface and bus name.
pub const FRAMEWORK_NAMESPACE: &str = "org.freedesktop.Telepathy";

/// Connection manager interface.
pub const IFACE_CONNECTION_MANAGER: &str = "org.freedesktop.Telepathy.ConnectionManager";
/// Connection interface.
pub const IFACE_CONNECTION: &str = "org.freedesktop.Telepathy.Connection";
/// Base channel interface.
pub const IFACE_CHANNEL: &str = "org.freedesktop.Telepathy.Channel";
/// Text channel type.
pub const IFACE_CHANNEL_TYPE_TEXT: &str = "org.freedesktop.Telepathy.Channel.Type.Text";
/// Call channel type.
pub const IFACE_CHANNEL_TYPE_CALL: &str = "org.freedesktop.Telepathy.Channel.Type.Call1";
/// Contact-list channel type.
pub const IFACE_CHANNEL_TYPE_CONTACT_LIST: &str =
    "org.freedesktop.Telepathy.Channel.Type.ContactList";
/// File-transfer channel type.
pub const IFACE_CHANNEL_TYPE_FILE_TRANSFER: &str =
    "org.freedesktop.Telepathy.Channel.Type.FileTransfer";
/// Stream tube channel type.
pub const IFACE_CHANNEL_TYPE_STREAM_TUBE: &str =
    "org.freedesktop.Telepathy.Channel.Type.StreamTube";
/// D-Bus tube channel type.
pub const IFACE_CHANNEL_TYPE_DBUS_TUBE: &str = "org.freedesktop.Telepathy.Channel.Type.DBusTube";
/// Channel group interface.
pub const IFACE_CHANNEL_INTERFACE_GROUP: &str =
    "org.freedesktop.Telepathy.Channel.Interface.Group";
/// Channel messages interface.
pub const IFACE_CHANNEL_INTERFACE_MESSAGES: &str =
    "org.freedesktop.Telepathy.Channel.Interface.Messages";
/// Account interface.
pub const IFACE_ACCOUNT: &str = "org.freedesktop.Telepathy.Account";
/// Account manager interface.
pub const IFACE_ACCOUNT_MANAGER: &str = "org.freedesktop.Telepathy.AccountManager";
/// Channel dispatcher interface.
pub const IFACE_CHANNEL_DISPATCHER: &str = "org.freedesktop.Telepathy.ChannelDispatcher";
/// Channel request interface.
pub const IFACE_CHANNEL_REQUEST: &str = "org.freedesktop.Telepathy.ChannelRequest";
/// Channel dispatch operation interface.
pub const IFACE_CHANNEL_DISPATCH_OPERATION: &str =
    "org.freedesktop.Telepathy.ChannelDispatchOperation";
/// Client base interface.
pub const IFACE_CLIENT: &str = "org.freedesktop.Telepathy.Client";
/// Observer role.
pub const IFACE_CLIENT_OBSERVER: &str = "org.freedesktop.Telepathy.Client.Observer";
/// Approver role.
pub const IFACE_CLIENT_APPROVER: &str = "org.freedesktop.Telepathy.Client.Approver";
/// Handler role.
pub const IFACE_CLIENT_HANDLER: &str = "org.freedesktop.Telepathy.Client.Handler";
/// Handler request notification interface.
pub const IFACE_CLIENT_INTERFACE_REQUESTS: &str =
    "org.freedesktop.Telepathy.Client.Interface.Requests";

// =======================================================================
// Well-known names and object paths
// =======================================================================

/// Prefix of connection-manager bus names (`CM.<cmname>`).
pub const CM_BUS_NAME_BASE: &str = "org.freedesktop.Telepathy.ConnectionManager.";
/// Prefix of connection-manager object paths.
pub const CM_OBJECT_PATH_BASE: &str = "/org/freedesktop/Telepathy/ConnectionManager/";
/// Prefix of connection bus names.
pub const CONN_BUS_NAME_BASE: &str = "org.freedesktop.Telepathy.Connection.";
/// Prefix of connection object paths.
pub const CONN_OBJECT_PATH_BASE: &str = "/org/freedesktop/Telepathy/Connection/";
/// Prefix of registered client bus names (`Client.<shortname>[.<suffix>]`).
pub const CLIENT_BUS_NAME_BASE: &str = "org.freedesktop.Telepathy.Client.";
/// Prefix of registered client object paths.
pub const CLIENT_OBJECT_PATH_BASE: &str = "/org/freedesktop/Telepathy/Client/";
/// Well-known name of the account manager (also hosts accounts).
pub const ACCOUNT_MANAGER_BUS_NAME: &str = "org.freedesktop.Telepathy.AccountManager";
/// Object path of the account manager.
pub const ACCOUNT_MANAGER_OBJECT_PATH: &str = "/org/freedesktop/Telepathy/AccountManager";
/// Prefix of account object paths.
pub const ACCOUNT_OBJECT_PATH_BASE: &str = "/org/freedesktop/Telepathy/Account/";
/// Well-known name of the channel dispatcher.
pub const CHANNEL_DISPATCHER_BUS_NAME: &str = "org.freedesktop.Telepathy.ChannelDispatcher";
/// Object path of the channel dispatcher.
pub const CHANNEL_DISPATCHER_OBJECT_PATH: &str = "/org/freedesktop/Telepathy/ChannelDispatcher";

/// Placeholder object path meaning "no object".
pub const NULL_OBJECT_PATH: &str = "/";

// =======================================================================
// Errors
// =======================================================================

/// Prefix of the framework's bus error names.
pub const ERROR_PREFIX: &str = "org.freedesktop.Telepathy.Error.";

/// Prefix used when runtime (proxy-level) errors are sent over the bus.
pub const PROXY_ERROR_PREFIX: &str = "org.freedesktop.Telepathy.DBus.Error.";

// =======================================================================
// Immutable property keys used by filters and channel inflation
// =======================================================================

/// `Channel.ChannelType` property key.
pub const PROP_CHANNEL_TYPE: &str = "org.freedesktop.Telepathy.Channel.ChannelType";
/// `Channel.TargetHandleType` property key.
pub const PROP_CHANNEL_TARGET_HANDLE_TYPE: &str =
    "org.freedesktop.Telepathy.Channel.TargetHandleType";
/// `Channel.TargetHandle` property key.
pub const PROP_CHANNEL_TARGET_HANDLE: &str = "org.freedesktop.Telepathy.Channel.TargetHandle";
/// `Channel.TargetID` property key.
pub const PROP_CHANNEL_TARGET_ID: &str = "org.freedesktop.Telepathy.Channel.TargetID";
/// `Channel.Requested` property key.
pub const PROP_CHANNEL_REQUESTED: &str = "org.freedesktop.Telepathy.Channel.Requested";
/// `Channel.InitiatorHandle` property key.
pub const PROP_CHANNEL_INITIATOR_HANDLE: &str =
    "org.freedesktop.Telepathy.Channel.InitiatorHandle";
/// `Channel.InitiatorID` property key.
pub const PROP_CHANNEL_INITIATOR_ID: &str = "org.freedesktop.Telepathy.Channel.InitiatorID";
/// `Channel.Interfaces` property key.
pub const PROP_CHANNEL_INTERFACES: &str = "org.freedesktop.Telepathy.Channel.Interfaces";
/// `ChannelDispatchOperation.Account` property key.
pub const PROP_DISPATCH_OPERATION_ACCOUNT: &str =
    "org.freedesktop.Telepathy.ChannelDispatchOperation.Account";
/// `ChannelDispatchOperation.Connection` property key.
pub const PROP_DISPATCH_OPERATION_CONNECTION: &str =
    "org.freedesktop.Telepathy.ChannelDispatchOperation.Connection";
/// `ChannelRequest.Account` property key.
pub const PROP_CHANNEL_REQUEST_ACCOUNT: &str = "org.freedesktop.Telepathy.ChannelRequest.Account";
/// `StreamTube.Service` property key.
pub const PROP_STREAM_TUBE_SERVICE: &str = "org.freedesktop.Telepathy.Channel.Type.StreamTube.Service";
/// `DBusTube.ServiceName` property key.
pub const PROP_DBUS_TUBE_SERVICE_NAME: &str =
    "org.freedesktop.Telepathy.Channel.Type.DBusTube.ServiceName";
/// `FileTransfer.ServiceName` property key.
pub const PROP_FILE_TRANSFER_SERVICE_NAME: &str =
    "org.freedesktop.Telepathy.Channel.Type.FileTransfer.ServiceName";

// =======================================================================
// Runtime configuration
// =======================================================================

/// Snapshot of the runtime-tunable settings.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Settings {
    /// Debug categories currently enabled.
    pub debug_flags: DebugFlags,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            debug_flags: DebugFlags::NONE,
        }
    }
}

/// Runtime configuration shared by the whole process.
///
/// Reads are lock-free; updates swap the whole snapshot.
pub struct RuntimeConfig {
    settings: ArcSwap<Settings>,
    unique_counter: AtomicU32,
}

impl RuntimeConfig {
    /// Create a configuration holding the default settings.
    pub fn new() -> Self {
        Self {
            settings: ArcSwap::from_pointee(Settings::default()),
            unique_counter: AtomicU32::new(0),
        }
    }

    /// Process-wide configuration instance.
    pub fn global() -> &'static RuntimeConfig {
        static GLOBAL: OnceLock<RuntimeConfig> = OnceLock::new();
        GLOBAL.get_or_init(RuntimeConfig::new)
    }

    /// Current settings snapshot.
    pub fn settings(&self) -> Settings {
        **self.settings.load()
    }

    /// Replace the settings snapshot.
    pub fn store(&self, settings: Settings) {
        self.settings.store(Arc::new(settings));
    }

    /// Update the settings with a closure.
    pub fn update(&self, f: impl Fn(&mut Settings)) {
        self.settings.rcu(|current| {
            let mut next = **current;
            f(&mut next);
            next
        });
    }

    /// Next value of the counter appended to uniquified client names.
    pub fn next_unique_suffix(&self) -> u32 {
        self.unique_counter.fetch_add(1, Ordering::Relaxed)
    }
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self::new()
    }
}
