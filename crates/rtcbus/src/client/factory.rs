// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Proxy cache for a client.
//!
//! The dispatcher names the same account and connection in call after
//! call; the factory hands back the proxy it built last time as long as
//! someone still holds it, so features prepared once stay prepared.

use std::fmt;
use std::sync::{Arc, Weak};

use dashmap::DashMap;

use crate::account::Account;
use crate::bus::BusDaemon;
use crate::channel::{AutomaticChannelFactory, Channel, ChannelFactory};
use crate::connection::Connection;
use crate::error::Result;
use crate::logging::DebugFlags;
use crate::proxy::Proxy;
use crate::rtc_debug;
use crate::value::Asv;

pub struct ClientFactory {
    daemon: BusDaemon,
    channel_factory: Arc<dyn ChannelFactory>,
    accounts: DashMap<String, Weak<Proxy>>,
    connections: DashMap<String, Weak<Proxy>>,
    channels: DashMap<String, Weak<Proxy>>,
}

impl ClientFactory {
    pub fn new(daemon: &BusDaemon) -> Self {
        Self::with_channel_factory(daemon, Arc::new(AutomaticChannelFactory))
    }

    pub fn with_channel_factory(daemon: &BusDaemon, channel_factory: Arc<dyn ChannelFactory>) -> Self {
        Self {
            daemon: daemon.clone(),
            channel_factory,
            accounts: DashMap::new(),
            connections: DashMap::new(),
            channels: DashMap::new(),
        }
    }

    pub fn daemon(&self) -> &BusDaemon {
        &self.daemon
    }

    pub fn channel_factory(&self) -> &Arc<dyn ChannelFactory> {
        &self.channel_factory
    }

    /// The live account proxy for `object_path`, created if needed.
    pub fn ensure_account(&self, object_path: &str) -> Result<Account> {
        if let Some(account) = cached(&self.accounts, object_path).and_then(|p| Account::from_proxy(&p)) {
            return Ok(account);
        }
        let account = Account::new(&self.daemon, object_path)?;
        remember(&self.accounts, object_path, account.proxy());
        rtc_debug!(DebugFlags::CLIENT, "[ClientFactory::ensure_account] new {}", object_path);
        Ok(account)
    }

    pub fn ensure_connection(&self, object_path: &str) -> Result<Connection> {
        if let Some(connection) = cached(&self.connections, object_path).and_then(|p| Connection::from_proxy(&p)) {
            return Ok(connection);
        }
        let connection = Connection::new(&self.daemon, None, object_path)?;
        remember(&self.connections, object_path, connection.proxy());
        rtc_debug!(DebugFlags::CLIENT, "[ClientFactory::ensure_connection] new {}", object_path);
        Ok(connection)
    }

    /// The live channel proxy for `object_path`, built by the channel
    /// factory when there is none.
    pub fn ensure_channel(&self, connection: &Connection, object_path: &str, immutable: &Asv) -> Result<Channel> {
        if let Some(channel) = cached(&self.channels, object_path).and_then(|p| Channel::from_proxy(&p)) {
            if channel.connection().object_path() == connection.object_path() {
                return Ok(channel);
            }
        }
        let channel = self
            .channel_factory
            .create_channel(connection, object_path, immutable)?;
        remember(&self.channels, object_path, channel.proxy());
        Ok(channel)
    }

    /// Drop entries whose proxy is gone.
    pub fn purge(&self) {
        for map in [&self.accounts, &self.connections, &self.channels] {
            map.retain(|_, weak| weak.strong_count() > 0);
        }
    }

    /// Number of stored entries, live or not.
    #[cfg(test)]
    pub(crate) fn stored(&self) -> usize {
        self.accounts.len() + self.connections.len() + self.channels.len()
    }

    /// Number of live cached proxies.
    pub fn len(&self) -> usize {
        [&self.accounts, &self.connections, &self.channels]
            .iter()
            .map(|map| map.iter().filter(|e| e.value().strong_count() > 0).count())
            .sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Live, not invalidated proxy cached under `key`. Stale entries are
/// evicted on the way.
fn cached(map: &DashMap<String, Weak<Proxy>>, key: &str) -> Option<Arc<Proxy>> {
    let found = map.get(key)?.upgrade();
    match found {
        Some(proxy) if !proxy.is_invalidated() => Some(proxy),
        _ => {
            drop(map.remove(key));
            None
        }
    }
}

/// Cache `proxy` under `key`, dropping entries whose proxy is gone.
fn remember(map: &DashMap<String, Weak<Proxy>>, key: &str, proxy: &Arc<Proxy>) {
    map.retain(|_, weak| weak.strong_count() > 0);
    map.insert(key.to_owned(), Arc::downgrade(proxy));
}

impl fmt::Debug for ClientFactory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ClientFactory")
            .field("daemon", &self.daemon)
            .field("live", &self.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bus::{BusConnection, MemoryBus, MemoryConnection};
    use crate::config::CONN_OBJECT_PATH_BASE;
    use crate::error::ProxyError;
    use crate::util::bus_name_from_object_path;

    struct Scene {
        _bus: Arc<MemoryBus>,
        _service: Arc<MemoryConnection>,
        factory: ClientFactory,
        path: String,
    }

    /// Factory plus a service owning the connection named `tag`.
    fn scene(tag: &str) -> Scene {
        let bus = MemoryBus::new();
        let path = format!("{}cm/proto/{}", CONN_OBJECT_PATH_BASE, tag);
        let service = bus.connect();
        let name = bus_name_from_object_path(&path).expect("connection path");
        service.request_name(&name).expect("free");
        let factory = ClientFactory::new(&BusDaemon::new(bus.connect()));
        Scene {
            _bus: bus,
            _service: service,
            factory,
            path,
        }
    }

    #[test]
    fn live_proxies_are_shared() {
        let scene = scene("shared");
        let a = scene.factory.ensure_connection(&scene.path).expect("owned");
        let b = scene.factory.ensure_connection(&scene.path).expect("owned");
        assert!(Arc::ptr_eq(a.proxy(), b.proxy()));
        assert_eq!(scene.factory.len(), 1);
    }

    #[test]
    fn dropped_proxies_do_not_accumulate() {
        let scene = scene("churn");
        let connection = scene.factory.ensure_connection(&scene.path).expect("owned");
        for i in 0..500 {
            let channel_path = format!("{}/chan{}", scene.path, i);
            let channel = scene
                .factory
                .ensure_channel(&connection, &channel_path, &Asv::new())
                .expect("owned");
            drop(channel);
        }
        assert_eq!(scene.factory.len(), 1);
        assert!(scene.factory.stored() <= 2, "stored {}", scene.factory.stored());
    }

    #[test]
    fn invalidated_proxies_are_replaced() {
        let scene = scene("gone");
        let old = scene.factory.ensure_connection(&scene.path).expect("owned");
        old.proxy().invalidate(ProxyError::object_removed("connection went away"));
        let new = scene.factory.ensure_connection(&scene.path).expect("owned");
        assert!(!Arc::ptr_eq(old.proxy(), new.proxy()));
        assert_eq!(scene.factory.stored(), 1);
    }
}
