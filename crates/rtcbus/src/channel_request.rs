// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Channel request proxy.
//!
//! A request lives until the dispatcher reports its outcome:
//!
//! ```text
//! SucceededWithChannel(conn, conn_props, chan, chan_props)
//!     -> succeeded_with_channel(Connection, Channel)     (channel built by the factory)
//! Succeeded()
//!     -> succeeded, then invalidated(ObjectRemoved)
//! Failed(error, message)
//!     -> invalidated(mapped error)
//! ```

use std::fmt;
use std::sync::Arc;

use parking_lot::Mutex;

use crate::asv::AsvExt;
use crate::bus::{BusDaemon, BusError};
use crate::channel::{AutomaticChannelFactory, Channel, ChannelFactory};
use crate::config::{CHANNEL_DISPATCHER_BUS_NAME, IFACE_CHANNEL_REQUEST};
use crate::connection::Connection;
use crate::error::{ErrorKind, ProxyError, Result};
use crate::event::{ListenerId, Signal};
use crate::logging::DebugFlags;
use crate::proxy::{AsProxy, Feature, FeatureCompleter, FeatureId, Proxy, ProxyClass, BASE_CLASS};
use crate::rtc_debug;
use crate::value::{Asv, Value};

struct ChannelRequestInner {
    factory: Arc<dyn ChannelFactory>,
    properties: Mutex<Asv>,
    result: Mutex<Option<(Connection, Channel)>>,
    succeeded: Signal<()>,
    succeeded_with_channel: Signal<(Connection, Channel)>,
}

static CHANNEL_REQUEST_FEATURES: [Feature; 1] = [Feature::core(ChannelRequest::FEATURE_CORE, prepare_core)];

pub static CHANNEL_REQUEST_CLASS: ProxyClass = ProxyClass {
    name: "ChannelRequest",
    primary_interface: IFACE_CHANNEL_REQUEST,
    must_have_unique_name: true,
    parent: Some(&BASE_CLASS),
    features: &CHANNEL_REQUEST_FEATURES,
    interface_added: None,
    errors: &[],
};

/// Proxy for a request the channel dispatcher is working on.
#[derive(Clone)]
pub struct ChannelRequest {
    proxy: Arc<Proxy>,
    inner: Arc<ChannelRequestInner>,
}

impl ChannelRequest {
    /// Account, requests, hints and user action time are known.
    pub const FEATURE_CORE: FeatureId = FeatureId("channel-request-core");

    /// Bind to the request at `object_path`. `immutable` holds the
    /// properties announced with it (qualified names), possibly empty.
    pub fn new(daemon: &BusDaemon, object_path: &str, immutable: Asv) -> Result<ChannelRequest> {
        Self::with_factory(daemon, object_path, immutable, Arc::new(AutomaticChannelFactory))
    }

    pub fn with_factory(
        daemon: &BusDaemon,
        object_path: &str,
        immutable: Asv,
        factory: Arc<dyn ChannelFactory>,
    ) -> Result<ChannelRequest> {
        let proxy = Proxy::new(&CHANNEL_REQUEST_CLASS, daemon, CHANNEL_DISPATCHER_BUS_NAME, object_path)?;
        let inner = Arc::new(ChannelRequestInner {
            factory,
            properties: Mutex::new(immutable),
            result: Mutex::new(None),
            succeeded: Signal::new(),
            succeeded_with_channel: Signal::new(),
        });
        proxy.set_extension(Arc::clone(&inner));

        proxy.connect_signal(IFACE_CHANNEL_REQUEST, "Failed", |proxy, args| {
            let name = args.first().and_then(Value::as_str).unwrap_or_default();
            let message = args.get(1).and_then(Value::as_str).unwrap_or_default();
            let error = proxy.map_bus_error(&BusError::new(name, message));
            proxy.invalidate(error);
        })?;
        proxy.connect_signal(IFACE_CHANNEL_REQUEST, "Succeeded", |proxy, _| {
            if let Some(request) = ChannelRequest::from_proxy(proxy) {
                request.inner.succeeded.emit(&());
            }
            proxy.invalidate(ProxyError::object_removed("ChannelRequest succeeded"));
        })?;
        proxy.connect_signal(IFACE_CHANNEL_REQUEST, "SucceededWithChannel", |proxy, args| {
            if let Some(request) = ChannelRequest::from_proxy(proxy) {
                request.on_succeeded_with_channel(args);
            }
        })?;
        Ok(ChannelRequest { proxy, inner })
    }

    pub fn from_proxy(proxy: &Arc<Proxy>) -> Option<ChannelRequest> {
        let inner = proxy.extension::<ChannelRequestInner>()?;
        Some(ChannelRequest {
            proxy: Arc::clone(proxy),
            inner,
        })
    }

    pub fn proxy(&self) -> &Arc<Proxy> {
        &self.proxy
    }

    pub fn object_path(&self) -> &str {
        self.proxy.object_path()
    }

    pub fn properties(&self) -> Asv {
        self.inner.properties.lock().clone()
    }

    fn property<T>(&self, name: &str, get: impl FnOnce(&Asv, &str) -> Option<T>) -> Option<T> {
        let key = format!("{}.{}", IFACE_CHANNEL_REQUEST, name);
        get(&*self.inner.properties.lock(), &key)
    }

    pub fn account_path(&self) -> Option<String> {
        self.property("Account", |p, k| p.get_object_path(k).map(str::to_owned))
    }

    pub fn user_action_time(&self) -> Option<i64> {
        self.property("UserActionTime", |p, k| p.get_i64(k))
    }

    pub fn preferred_handler(&self) -> Option<String> {
        self.property("PreferredHandler", |p, k| p.get_str(k).map(str::to_owned))
    }

    /// Requested channel property bundles.
    pub fn requests(&self) -> Vec<Asv> {
        self.property("Requests", |p, k| {
            let items = p.get_value(k)?.as_array()?;
            Some(items.iter().filter_map(|v| v.as_dict().cloned()).collect())
        })
        .unwrap_or_default()
    }

    pub fn hints(&self) -> Asv {
        self.property("Hints", |p, k| p.get_asv(k).cloned()).unwrap_or_default()
    }

    /// The channel reported by `SucceededWithChannel`, once it arrived.
    pub fn channel(&self) -> Option<(Connection, Channel)> {
        self.inner.result.lock().clone()
    }

    pub fn connect_succeeded<F>(&self, listener: F) -> ListenerId
    where
        F: Fn(&()) + Send + Sync + 'static,
    {
        self.inner.succeeded.connect(listener)
    }

    pub fn connect_succeeded_with_channel<F>(&self, listener: F) -> ListenerId
    where
        F: Fn(&(Connection, Channel)) + Send + Sync + 'static,
    {
        self.inner.succeeded_with_channel.connect(listener)
    }

    /// Let the dispatcher go ahead with the request.
    pub fn proceed<F>(&self, callback: F) -> Result<()>
    where
        F: FnOnce(Result<()>) + Send + 'static,
    {
        self.proxy
            .call(IFACE_CHANNEL_REQUEST, "Proceed", vec![], move |_, r| callback(r.map(drop)))
            .map(drop)
    }

    /// Withdraw the request. It then fails with `Cancelled`.
    pub fn cancel<F>(&self, callback: F) -> Result<()>
    where
        F: FnOnce(Result<()>) + Send + 'static,
    {
        self.proxy
            .call(IFACE_CHANNEL_REQUEST, "Cancel", vec![], move |_, r| callback(r.map(drop)))
            .map(drop)
    }

    fn on_succeeded_with_channel(&self, args: &[Value]) {
        let conn_path = args.first().and_then(Value::as_object_path).unwrap_or_default();
        let chan_path = args.get(2).and_then(Value::as_object_path).unwrap_or_default();
        let chan_props = args.get(3).and_then(Value::as_dict).cloned().unwrap_or_default();

        let built = Connection::new(self.proxy.daemon(), None, conn_path).and_then(|connection| {
            let channel = self.inner.factory.create_channel(&connection, chan_path, &chan_props)?;
            Ok((connection, channel))
        });
        match built {
            Ok(result) => {
                *self.inner.result.lock() = Some(result.clone());
                self.inner.succeeded_with_channel.emit(&result);
            }
            Err(e) => rtc_debug!(
                DebugFlags::DISPATCH,
                "[ChannelRequest::succeeded_with_channel] {}: cannot build {}: {}",
                self.object_path(),
                chan_path,
                e
            ),
        }
    }
}

fn prepare_core(proxy: &Arc<Proxy>, done: FeatureCompleter) {
    let Some(request) = ChannelRequest::from_proxy(proxy) else {
        done.fail(&ProxyError::proxy(ErrorKind::Inconsistent, "not a channel request proxy"));
        return;
    };
    if request.account_path().is_some() {
        done.succeed();
        return;
    }
    proxy.get_all_properties(IFACE_CHANNEL_REQUEST, move |proxy, result| match result {
        Ok(props) => {
            if let Some(request) = ChannelRequest::from_proxy(proxy) {
                let mut known = request.inner.properties.lock();
                for (key, value) in props {
                    known.insert(format!("{}.{}", IFACE_CHANNEL_REQUEST, key), value);
                }
            }
            done.succeed();
        }
        Err(e) => done.fail(&e),
    });
}

impl AsProxy for ChannelRequest {
    fn as_proxy(&self) -> &Arc<Proxy> {
        &self.proxy
    }
}

impl fmt::Debug for ChannelRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ChannelRequest")
            .field("object_path", &self.object_path())
            .field("invalidated", &self.proxy.invalidated())
            .finish()
    }
}
