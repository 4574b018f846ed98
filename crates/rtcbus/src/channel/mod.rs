// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Channel proxies.
//!
//! # Architecture
//!
//! ```text
//! Channel (Arc<Proxy> + ChannelInner extension)
//! +-- connection, immutable properties, channel type, target
//! +-- interface_added hook
//! |   +-- ...Channel.Interface.Group     -> group::attach    (GroupInner extension)
//! |   +-- ...Channel.Interface.Messages  -> text::attach     (TextInner extension)
//! +-- features
//!     +-- FEATURE_CORE                (GetAll Channel unless the immutable properties suffice)
//!     +-- FEATURE_GROUP               (GetAll Group, depends on core)
//!     +-- FEATURE_INCOMING_MESSAGES   (GetAll Messages, depends on core)
//! ```
//!
//! Capabilities are optional: a channel without the Group interface simply
//! has no group state, and `FEATURE_GROUP` ends up unavailable.

mod factory;
mod group;
mod text;

pub use factory::{AutomaticChannelFactory, ChannelFactory};
pub use group::{GroupChangeReason, MembersChanged};
pub use text::TextChannel;

use std::fmt;
use std::sync::Arc;

use parking_lot::Mutex;

use crate::asv::AsvExt;
use crate::config::{
    IFACE_CHANNEL, IFACE_CHANNEL_INTERFACE_GROUP, IFACE_CHANNEL_INTERFACE_MESSAGES, PROP_CHANNEL_INITIATOR_HANDLE,
    PROP_CHANNEL_INITIATOR_ID, PROP_CHANNEL_INTERFACES, PROP_CHANNEL_REQUESTED, PROP_CHANNEL_TARGET_HANDLE,
    PROP_CHANNEL_TARGET_HANDLE_TYPE, PROP_CHANNEL_TARGET_ID, PROP_CHANNEL_TYPE,
};
use crate::connection::Connection;
use crate::error::{ErrorKind, ProxyError, Result};
use crate::handle::{Handle, HandleType};
use crate::logging::DebugFlags;
use crate::proxy::{AsProxy, Feature, FeatureCompleter, FeatureId, Proxy, ProxyClass, BASE_CLASS};
use crate::value::{Asv, Value};
use crate::{programming_error, rtc_debug};

struct ChannelInner {
    connection: Connection,
    properties: Mutex<Asv>,
}

static CHANNEL_FEATURES: [Feature; 3] = [
    Feature::core(Channel::FEATURE_CORE, prepare_core),
    Feature::optional(Channel::FEATURE_GROUP, &[Channel::FEATURE_CORE], Some(group::prepare)),
    Feature::optional(
        Channel::FEATURE_INCOMING_MESSAGES,
        &[Channel::FEATURE_CORE],
        Some(text::prepare_incoming),
    ),
];

pub static CHANNEL_CLASS: ProxyClass = ProxyClass {
    name: "Channel",
    primary_interface: IFACE_CHANNEL,
    must_have_unique_name: true,
    parent: Some(&BASE_CLASS),
    features: &CHANNEL_FEATURES,
    interface_added: Some(channel_interface_added),
    errors: &[],
};

fn channel_interface_added(proxy: &Arc<Proxy>, interface: &str) {
    let attached = match interface {
        IFACE_CHANNEL_INTERFACE_GROUP => group::attach(proxy),
        IFACE_CHANNEL_INTERFACE_MESSAGES => text::attach(proxy),
        _ => Ok(()),
    };
    if let Err(e) = attached {
        programming_error!(
            "[Channel::interface_added] {} on {}: {}",
            interface,
            proxy.object_path(),
            e
        );
    }
}

/// Proxy for a channel of a connection.
#[derive(Clone)]
pub struct Channel {
    proxy: Arc<Proxy>,
    inner: Arc<ChannelInner>,
}

impl Channel {
    /// Channel type, interfaces and target are known.
    pub const FEATURE_CORE: FeatureId = FeatureId("channel-core");
    /// Group membership is tracked.
    pub const FEATURE_GROUP: FeatureId = FeatureId("channel-group");
    /// Messages pending at preparation time were retrieved.
    pub const FEATURE_INCOMING_MESSAGES: FeatureId = FeatureId("channel-incoming-messages");

    /// Bind to the channel at `object_path` on `connection`. `immutable` are
    /// the properties announced with the channel, possibly empty.
    pub fn new(connection: &Connection, object_path: &str, immutable: Asv) -> Result<Channel> {
        let proxy = Proxy::new(
            &CHANNEL_CLASS,
            connection.proxy().daemon(),
            connection.proxy().bus_name(),
            object_path,
        )?;
        let inner = Arc::new(ChannelInner {
            connection: connection.clone(),
            properties: Mutex::new(immutable),
        });
        proxy.set_extension(Arc::clone(&inner));
        let channel = Channel { proxy, inner };

        channel
            .proxy
            .connect_signal(IFACE_CHANNEL, "Closed", |proxy, _| {
                proxy.invalidate(ProxyError::object_removed("Channel closed"));
            })?;
        // channels die with their connection
        let weak = Arc::downgrade(&channel.proxy);
        let listener = connection.proxy().connect_invalidated(move |error| {
            if let Some(proxy) = weak.upgrade() {
                proxy.invalidate(error.clone());
            }
        });
        let owner = connection.clone();
        channel.proxy.connect_invalidated(move |_| {
            owner.proxy().disconnect_invalidated(listener);
        });
        if let Some(error) = connection.proxy().invalidated() {
            channel.proxy.invalidate(error);
        }
        channel.add_interfaces_from_properties();
        Ok(channel)
    }

    pub fn from_proxy(proxy: &Arc<Proxy>) -> Option<Channel> {
        let inner = proxy.extension::<ChannelInner>()?;
        Some(Channel {
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

    pub fn connection(&self) -> &Connection {
        &self.inner.connection
    }

    /// Known channel properties (immutable ones plus what the core feature
    /// fetched), keyed by fully qualified name.
    pub fn properties(&self) -> Asv {
        self.inner.properties.lock().clone()
    }

    pub fn channel_type(&self) -> Option<String> {
        self.inner.properties.lock().get_str(PROP_CHANNEL_TYPE).map(str::to_owned)
    }

    pub fn target_handle_type(&self) -> HandleType {
        self.inner
            .properties
            .lock()
            .get_u32(PROP_CHANNEL_TARGET_HANDLE_TYPE)
            .and_then(HandleType::from_u32)
            .unwrap_or(HandleType::None)
    }

    pub fn target_handle(&self) -> Handle {
        self.inner.properties.lock().get_u32(PROP_CHANNEL_TARGET_HANDLE).unwrap_or(0)
    }

    pub fn target_id(&self) -> Option<String> {
        self.inner.properties.lock().get_str(PROP_CHANNEL_TARGET_ID).map(str::to_owned)
    }

    /// True if the local user asked for this channel.
    pub fn is_requested(&self) -> bool {
        self.inner.properties.lock().get_bool(PROP_CHANNEL_REQUESTED).unwrap_or(false)
    }

    pub fn initiator_handle(&self) -> Handle {
        self.inner.properties.lock().get_u32(PROP_CHANNEL_INITIATOR_HANDLE).unwrap_or(0)
    }

    pub fn initiator_id(&self) -> Option<String> {
        self.inner.properties.lock().get_str(PROP_CHANNEL_INITIATOR_ID).map(str::to_owned)
    }

    /// Close the channel. The proxy invalidates when `Closed` arrives.
    pub fn close<F>(&self, callback: F) -> Result<()>
    where
        F: FnOnce(Result<()>) + Send + 'static,
    {
        self.proxy
            .call(IFACE_CHANNEL, "Close", vec![], move |_, r| callback(r.map(drop)))
            .map(drop)
    }

    fn has_core_properties(&self) -> bool {
        let props = self.inner.properties.lock();
        props.contains_key(PROP_CHANNEL_TYPE) && props.contains_key(PROP_CHANNEL_INTERFACES)
    }

    fn add_interfaces_from_properties(&self) {
        let (channel_type, interfaces) = {
            let props = self.inner.properties.lock();
            (
                props.get_str(PROP_CHANNEL_TYPE).map(str::to_owned),
                props.get_strv(PROP_CHANNEL_INTERFACES).unwrap_or_default(),
            )
        };
        if let Some(channel_type) = channel_type {
            self.proxy.add_interface(&channel_type);
        }
        self.proxy.add_interfaces(interfaces);
    }

    /// Merge `GetAll(Channel)` output, qualifying short names.
    fn apply_core_properties(&self, props: &Asv) {
        {
            let mut known = self.inner.properties.lock();
            for (key, value) in props {
                let qualified = format!("{}.{}", IFACE_CHANNEL, key);
                known.entry(qualified).or_insert_with(|| value.clone());
            }
        }
        self.add_interfaces_from_properties();
    }
}

fn prepare_core(proxy: &Arc<Proxy>, done: FeatureCompleter) {
    let Some(channel) = Channel::from_proxy(proxy) else {
        done.fail(&ProxyError::proxy(ErrorKind::Inconsistent, "not a channel proxy"));
        return;
    };
    if channel.has_core_properties() {
        rtc_debug!(
            DebugFlags::FEATURES,
            "[Channel::prepare_core] {}: immutable properties suffice",
            channel.object_path()
        );
        done.succeed();
        return;
    }
    proxy.get_all_properties(IFACE_CHANNEL, move |proxy, result| match result {
        Ok(props) => {
            if let Some(channel) = Channel::from_proxy(proxy) {
                channel.apply_core_properties(&props);
            }
            done.succeed();
        }
        Err(e) => done.fail(&e),
    });
}

/// `au` argument helper shared by the capability modules.
pub(crate) fn handles_arg(args: &[Value], index: usize) -> Vec<Handle> {
    args.get(index).and_then(Value::to_u32_vec).unwrap_or_default()
}

/// Decode a channel details list, `a(oa{sv})`. Malformed entries are skipped.
pub(crate) fn channel_details(value: &Value) -> Vec<(String, Asv)> {
    value
        .as_array()
        .unwrap_or_default()
        .iter()
        .filter_map(|entry| {
            let fields = entry.as_array()?;
            let path = fields.first()?.as_object_path()?.to_owned();
            let props = fields.get(1)?.as_dict()?.clone();
            Some((path, props))
        })
        .collect()
}

impl AsProxy for Channel {
    fn as_proxy(&self) -> &Arc<Proxy> {
        &self.proxy
    }
}

impl PartialEq for Channel {
    fn eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.proxy, &other.proxy)
    }
}

impl fmt::Debug for Channel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Channel")
            .field("object_path", &self.object_path())
            .field("channel_type", &self.channel_type())
            .field("invalidated", &self.proxy.is_invalidated())
            .finish()
    }
}
