// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Channel dispatch operation proxy.
//!
//! Approvers get one of these for each batch of incoming channels. The core
//! feature reads `Connection`, `Account`, `Channels`, `PossibleHandlers` and
//! `Interfaces` in a single `GetAll`; properties announced up front by the
//! dispatcher are used as they are.
//!
//! The operation ends with `Finished` or once its last channel is lost;
//! both invalidate it with `ObjectRemoved`.

use std::fmt;
use std::sync::Arc;

use parking_lot::Mutex;

use crate::account::Account;
use crate::asv::AsvExt;
use crate::bus::{BusDaemon, BusError};
use crate::channel::{channel_details, Channel};
use crate::config::{CHANNEL_DISPATCHER_BUS_NAME, IFACE_CHANNEL_DISPATCH_OPERATION};
use crate::connection::Connection;
use crate::error::{ErrorKind, ProxyError, Result};
use crate::event::{ListenerId, Signal};
use crate::logging::DebugFlags;
use crate::proxy::{AsProxy, Feature, FeatureCompleter, FeatureId, Proxy, ProxyClass, BASE_CLASS};
use crate::rtc_debug;
use crate::value::{Asv, Value};

#[derive(Default)]
struct OperationState {
    connection: Option<Connection>,
    account: Option<Account>,
    possible_handlers: Option<Vec<String>>,
    /// `None` until fetched or supplied
    channels: Option<Vec<Channel>>,
}

struct DispatchOperationInner {
    state: Mutex<OperationState>,
    channel_lost: Signal<(Channel, ProxyError)>,
}

static DISPATCH_OPERATION_FEATURES: [Feature; 1] =
    [Feature::core(ChannelDispatchOperation::FEATURE_CORE, prepare_core)];

pub static DISPATCH_OPERATION_CLASS: ProxyClass = ProxyClass {
    name: "ChannelDispatchOperation",
    primary_interface: IFACE_CHANNEL_DISPATCH_OPERATION,
    must_have_unique_name: true,
    parent: Some(&BASE_CLASS),
    features: &DISPATCH_OPERATION_FEATURES,
    interface_added: None,
    errors: &[],
};

#[derive(Clone)]
pub struct ChannelDispatchOperation {
    proxy: Arc<Proxy>,
    inner: Arc<DispatchOperationInner>,
}

impl ChannelDispatchOperation {
    /// Connection, account, channels and possible handlers are known.
    pub const FEATURE_CORE: FeatureId = FeatureId("channel-dispatch-operation-core");

    /// Bind to the operation at `object_path`. `immutable` may carry its
    /// properties, with qualified or short names.
    pub fn new(daemon: &BusDaemon, object_path: &str, immutable: &Asv) -> Result<ChannelDispatchOperation> {
        Self::build(daemon, object_path, immutable, OperationState::default())
    }

    /// Bind to the operation announced by `AddDispatchOperation`, reusing
    /// the objects the caller already built.
    pub(crate) fn with_objects(
        daemon: &BusDaemon,
        object_path: &str,
        immutable: &Asv,
        account: Account,
        connection: Connection,
        channels: Vec<Channel>,
    ) -> Result<ChannelDispatchOperation> {
        let state = OperationState {
            connection: Some(connection),
            account: Some(account),
            possible_handlers: None,
            channels: Some(channels),
        };
        Self::build(daemon, object_path, immutable, state)
    }

    fn build(
        daemon: &BusDaemon,
        object_path: &str,
        immutable: &Asv,
        state: OperationState,
    ) -> Result<ChannelDispatchOperation> {
        let proxy = Proxy::new(
            &DISPATCH_OPERATION_CLASS,
            daemon,
            CHANNEL_DISPATCHER_BUS_NAME,
            object_path,
        )?;
        let inner = Arc::new(DispatchOperationInner {
            state: Mutex::new(state),
            channel_lost: Signal::new(),
        });
        proxy.set_extension(Arc::clone(&inner));
        let operation = ChannelDispatchOperation { proxy, inner };

        operation
            .proxy
            .connect_signal(IFACE_CHANNEL_DISPATCH_OPERATION, "Finished", |proxy, _| {
                proxy.invalidate(ProxyError::object_removed(
                    "ChannelDispatchOperation finished and was removed",
                ));
            })?;
        operation
            .proxy
            .connect_signal(IFACE_CHANNEL_DISPATCH_OPERATION, "ChannelLost", |proxy, args| {
                if let Some(operation) = ChannelDispatchOperation::from_proxy(proxy) {
                    operation.on_channel_lost(args);
                }
            })?;

        let short: Asv = immutable
            .iter()
            .map(|(k, v)| {
                let key = k
                    .strip_prefix(IFACE_CHANNEL_DISPATCH_OPERATION)
                    .and_then(|rest| rest.strip_prefix('.'))
                    .unwrap_or(k);
                (key.to_owned(), v.clone())
            })
            .collect();
        operation.apply(&short)?;
        Ok(operation)
    }

    pub fn from_proxy(proxy: &Arc<Proxy>) -> Option<ChannelDispatchOperation> {
        let inner = proxy.extension::<DispatchOperationInner>()?;
        Some(ChannelDispatchOperation {
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

    pub fn connection(&self) -> Option<Connection> {
        self.inner.state.lock().connection.clone()
    }

    pub fn account(&self) -> Option<Account> {
        self.inner.state.lock().account.clone()
    }

    /// Well-known names of the handlers that could take the channels, most
    /// preferred first.
    pub fn possible_handlers(&self) -> Vec<String> {
        self.inner.state.lock().possible_handlers.clone().unwrap_or_default()
    }

    /// Channels still to be dispatched.
    pub fn channels(&self) -> Option<Vec<Channel>> {
        self.inner.state.lock().channels.clone()
    }

    pub fn connect_channel_lost<F>(&self, listener: F) -> ListenerId
    where
        F: Fn(&(Channel, ProxyError)) + Send + Sync + 'static,
    {
        self.inner.channel_lost.connect(listener)
    }

    /// Hand the channels to `handler` (well-known name), or to the
    /// dispatcher's choice when `None`.
    pub fn handle_with<F>(&self, handler: Option<&str>, callback: F) -> Result<()>
    where
        F: FnOnce(Result<()>) + Send + 'static,
    {
        let args = vec![Value::from(handler.unwrap_or_default())];
        self.proxy
            .call(IFACE_CHANNEL_DISPATCH_OPERATION, "HandleWith", args, move |_, r| {
                callback(r.map(drop))
            })
            .map(drop)
    }

    /// Take the channels for the caller, bypassing handlers.
    pub fn claim<F>(&self, callback: F) -> Result<()>
    where
        F: FnOnce(Result<()>) + Send + 'static,
    {
        self.proxy
            .call(IFACE_CHANNEL_DISPATCH_OPERATION, "Claim", vec![], move |_, r| {
                callback(r.map(drop))
            })
            .map(drop)
    }

    /// Apply short-named properties.
    fn apply(&self, props: &Asv) -> Result<()> {
        let daemon = self.proxy.daemon();
        let connection = match props.get_object_path("Connection") {
            Some(path) if self.connection().is_none() => Some(Connection::new(daemon, None, path)?),
            _ => None,
        };
        let account = match props.get_object_path("Account") {
            Some(path) if self.account().is_none() => Some(Account::new(daemon, path)?),
            _ => None,
        };
        if let Some(interfaces) = props.get_strv("Interfaces") {
            self.proxy.add_interfaces(interfaces);
        }

        let mut state = self.inner.state.lock();
        if connection.is_some() {
            state.connection = connection;
        }
        if account.is_some() {
            state.account = account;
        }
        if let Some(handlers) = props.get_strv("PossibleHandlers") {
            state.possible_handlers = Some(handlers);
        }
        let connection = state.connection.clone().filter(|_| state.channels.is_none());
        drop(state);
        if let (Some(details), Some(connection)) = (props.get_value("Channels"), connection) {
            let mut channels = Vec::new();
            for (path, chan_props) in channel_details(details) {
                match Channel::new(&connection, &path, chan_props) {
                    Ok(channel) => channels.push(channel),
                    Err(e) => rtc_debug!(
                        DebugFlags::DISPATCH,
                        "[ChannelDispatchOperation::apply] failed to create channel {}: {}",
                        path,
                        e
                    ),
                }
            }
            self.inner.state.lock().channels = Some(channels);
        }
        Ok(())
    }

    fn missing_property(&self) -> Option<&'static str> {
        let state = self.inner.state.lock();
        if state.connection.is_none() {
            Some("Connection")
        } else if state.account.is_none() {
            Some("Account")
        } else if state.possible_handlers.is_none() {
            Some("PossibleHandlers")
        } else if state.channels.is_none() {
            Some("Channels")
        } else {
            None
        }
    }

    fn on_channel_lost(&self, args: &[Value]) {
        let path = args.first().and_then(Value::as_object_path).unwrap_or_default();
        let error = self.proxy.map_bus_error(&BusError::new(
            args.get(1).and_then(Value::as_str).unwrap_or_default(),
            args.get(2).and_then(Value::as_str).unwrap_or_default(),
        ));
        let (lost, now_empty) = {
            let mut state = self.inner.state.lock();
            let Some(channels) = state.channels.as_mut() else {
                // not fetched yet
                return;
            };
            let Some(index) = channels.iter().position(|c| c.object_path() == path) else {
                rtc_debug!(
                    DebugFlags::DISPATCH,
                    "[ChannelDispatchOperation::channel_lost] unknown channel {}",
                    path
                );
                return;
            };
            let lost = channels.remove(index);
            (lost, channels.is_empty())
        };
        self.inner.channel_lost.emit(&(lost, error));
        if now_empty {
            self.proxy.invalidate(ProxyError::object_removed(
                "ChannelDispatchOperation has no channels left",
            ));
        }
    }
}

fn prepare_core(proxy: &Arc<Proxy>, done: FeatureCompleter) {
    let Some(operation) = ChannelDispatchOperation::from_proxy(proxy) else {
        done.fail(&ProxyError::proxy(ErrorKind::Inconsistent, "not a dispatch operation proxy"));
        return;
    };
    if operation.missing_property().is_none() {
        done.succeed();
        return;
    }
    proxy.get_all_properties(IFACE_CHANNEL_DISPATCH_OPERATION, move |proxy, result| {
        let checked = result.and_then(|props| {
            let operation = ChannelDispatchOperation::from_proxy(proxy)
                .ok_or_else(|| ProxyError::proxy(ErrorKind::Inconsistent, "not a dispatch operation proxy"))?;
            operation.apply(&props)?;
            match operation.missing_property() {
                Some(name) => Err(ProxyError::telepathy(
                    ErrorKind::InvalidArgument,
                    format!("Mandatory '{}' property is missing", name),
                )),
                None => Ok(()),
            }
        });
        match checked {
            Ok(()) => done.succeed(),
            Err(e) => {
                rtc_debug!(
                    DebugFlags::DISPATCH,
                    "[ChannelDispatchOperation::prepare_core] {}: {}",
                    proxy.object_path(),
                    e
                );
                done.fail(&e);
                proxy.invalidate(e);
            }
        }
    });
}

impl AsProxy for ChannelDispatchOperation {
    fn as_proxy(&self) -> &Arc<Proxy> {
        &self.proxy
    }
}

impl fmt::Debug for ChannelDispatchOperation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ChannelDispatchOperation")
            .field("object_path", &self.object_path())
            .field("possible_handlers", &self.possible_handlers())
            .finish()
    }
}
