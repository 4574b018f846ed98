// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

use std::fmt;
use std::sync::Arc;

use super::{BusConnection, BusError, MatchId, MatchRule, SignalMessage};
use crate::logging::DebugFlags;
use crate::rtc_debug;
use crate::util::is_unique_name;
use crate::value::Value;

/// Shared handle on a bus connection, with the daemon-level helpers proxies
/// need (owner lookup, name requests, owner watches).
#[derive(Clone)]
pub struct BusDaemon {
    connection: Arc<dyn BusConnection>,
}

impl BusDaemon {
    pub fn new(connection: Arc<dyn BusConnection>) -> Self {
        Self { connection }
    }

    pub fn connection(&self) -> &Arc<dyn BusConnection> {
        &self.connection
    }

    pub fn unique_name(&self) -> String {
        self.connection.unique_name()
    }

    pub fn get_name_owner(&self, name: &str) -> Result<String, BusError> {
        self.connection.get_name_owner(name)
    }

    /// Resolve `name` to a unique name. Unique names resolve to themselves
    /// without a round-trip.
    pub fn resolve_unique_name(&self, name: &str) -> Result<String, BusError> {
        if is_unique_name(name) {
            return Ok(name.to_owned());
        }
        let owner = self.get_name_owner(name)?;
        rtc_debug!(
            DebugFlags::PROXY,
            "[BusDaemon::resolve_unique_name] {} is owned by {}",
            name,
            owner
        );
        Ok(owner)
    }

    pub fn request_name(&self, name: &str) -> Result<(), BusError> {
        self.connection.request_name(name)
    }

    pub fn release_name(&self, name: &str) -> Result<(), BusError> {
        self.connection.release_name(name)
    }

    /// Watch ownership changes of `name`. `callback(name, new_owner)` runs for
    /// every `NameOwnerChanged`; `new_owner` is empty when the name is lost.
    /// The watch lasts as long as the returned guard.
    pub fn watch_name_owner<F>(&self, name: &str, callback: F) -> NameOwnerWatch
    where
        F: Fn(&str, &str) + Send + Sync + 'static,
    {
        let handler = move |msg: &SignalMessage| {
            let arg = |i: usize| msg.args.get(i).and_then(Value::as_str).unwrap_or_default();
            callback(arg(0), arg(2));
        };
        let id = self
            .connection
            .add_match(MatchRule::name_owner_changed(name), Arc::new(handler));
        NameOwnerWatch {
            connection: Arc::clone(&self.connection),
            id,
        }
    }
}

impl fmt::Debug for BusDaemon {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BusDaemon")
            .field("unique_name", &self.connection.unique_name())
            .finish()
    }
}

/// Active `NameOwnerChanged` subscription; removed on drop.
pub struct NameOwnerWatch {
    connection: Arc<dyn BusConnection>,
    id: MatchId,
}

impl Drop for NameOwnerWatch {
    fn drop(&mut self) {
        self.connection.remove_match(self.id);
    }
}

impl fmt::Debug for NameOwnerWatch {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("NameOwnerWatch").field("id", &self.id).finish()
    }
}
