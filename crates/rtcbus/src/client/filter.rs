// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Channel filters a client declares for each of its roles.
//!
//! ```
//! use rtcbus::client::ChannelFilter;
//! use rtcbus::config::{IFACE_CHANNEL_TYPE_TEXT, PROP_CHANNEL_TYPE, PROP_CHANNEL_TARGET_HANDLE_TYPE};
//! use rtcbus::asv;
//!
//! let filter = ChannelFilter::text_chats().require_locally_requested(false);
//! assert!(filter.matches(&asv! {
//!     PROP_CHANNEL_TYPE => IFACE_CHANNEL_TYPE_TEXT,
//!     PROP_CHANNEL_TARGET_HANDLE_TYPE => 1u32,
//!     "org.freedesktop.Telepathy.Channel.Requested" => false,
//! }));
//! ```

use crate::asv::contains_all;
use crate::config::{
    IFACE_CHANNEL_TYPE_CALL, IFACE_CHANNEL_TYPE_DBUS_TUBE, IFACE_CHANNEL_TYPE_FILE_TRANSFER,
    IFACE_CHANNEL_TYPE_STREAM_TUBE, IFACE_CHANNEL_TYPE_TEXT, PROP_CHANNEL_REQUESTED,
    PROP_CHANNEL_TARGET_HANDLE_TYPE, PROP_CHANNEL_TYPE, PROP_DBUS_TUBE_SERVICE_NAME,
    PROP_FILE_TRANSFER_SERVICE_NAME, PROP_STREAM_TUBE_SERVICE,
};
use crate::handle::HandleType;
use crate::value::{Asv, Value};

/// A set of immutable channel properties a channel must carry to match.
///
/// The empty filter matches every channel.
#[derive(Debug, Clone, Default, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct ChannelFilter {
    properties: Asv,
}

impl ChannelFilter {
    /// Matches channels of every type.
    pub fn all_types() -> Self {
        Self::default()
    }

    /// One-to-one text conversations.
    pub fn text_chats() -> Self {
        Self::all_types()
            .require_target_is_contact()
            .require_channel_type(IFACE_CHANNEL_TYPE_TEXT)
    }

    /// Multi-user text rooms.
    pub fn text_chatrooms() -> Self {
        Self::all_types()
            .require_target_is_room()
            .require_channel_type(IFACE_CHANNEL_TYPE_TEXT)
    }

    /// Calls whose target is of `target_type`.
    pub fn calls(target_type: HandleType) -> Self {
        Self::all_types()
            .require_target_type(target_type)
            .require_channel_type(IFACE_CHANNEL_TYPE_CALL)
    }

    /// Stream tubes, optionally for one service only.
    pub fn stream_tubes(service: Option<&str>) -> Self {
        let filter = Self::all_types().require_channel_type(IFACE_CHANNEL_TYPE_STREAM_TUBE);
        match service {
            Some(service) => filter.require_property(PROP_STREAM_TUBE_SERVICE, service),
            None => filter,
        }
    }

    /// D-Bus tubes, optionally for one service name only.
    pub fn dbus_tubes(service: Option<&str>) -> Self {
        let filter = Self::all_types().require_channel_type(IFACE_CHANNEL_TYPE_DBUS_TUBE);
        match service {
            Some(service) => filter.require_property(PROP_DBUS_TUBE_SERVICE_NAME, service),
            None => filter,
        }
    }

    /// File transfers with a contact, optionally tagged with a service name.
    pub fn file_transfers(service: Option<&str>) -> Self {
        let filter = Self::all_types()
            .require_target_is_contact()
            .require_channel_type(IFACE_CHANNEL_TYPE_FILE_TRANSFER);
        match service {
            Some(service) => filter.require_property(PROP_FILE_TRANSFER_SERVICE_NAME, service),
            None => filter,
        }
    }

    pub fn require_channel_type(self, channel_type: &str) -> Self {
        self.require_property(PROP_CHANNEL_TYPE, channel_type)
    }

    pub fn require_target_type(self, target_type: HandleType) -> Self {
        self.require_property(PROP_CHANNEL_TARGET_HANDLE_TYPE, target_type.as_u32())
    }

    pub fn require_target_is_contact(self) -> Self {
        self.require_target_type(HandleType::Contact)
    }

    pub fn require_target_is_room(self) -> Self {
        self.require_target_type(HandleType::Room)
    }

    pub fn require_no_target(self) -> Self {
        self.require_target_type(HandleType::None)
    }

    /// Only channels the local user asked for (`true`) or did not (`false`).
    pub fn require_locally_requested(self, requested: bool) -> Self {
        self.require_property(PROP_CHANNEL_REQUESTED, requested)
    }

    /// Require an arbitrary property, by fully qualified name.
    pub fn require_property(mut self, name: &str, value: impl Into<Value>) -> Self {
        self.properties.insert(name.to_owned(), value.into());
        self
    }

    pub fn properties(&self) -> &Asv {
        &self.properties
    }

    /// True if every property of the filter is among `immutable` with the
    /// same value. Integers compare by value whatever their width.
    pub fn matches(&self, immutable: &Asv) -> bool {
        contains_all(immutable, &self.properties)
    }
}

impl From<Asv> for ChannelFilter {
    fn from(properties: Asv) -> Self {
        Self { properties }
    }
}

impl From<ChannelFilter> for Value {
    fn from(filter: ChannelFilter) -> Self {
        Value::Dict(filter.properties)
    }
}
