// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Client framework: observers, approvers and handlers the channel
//! dispatcher calls into.
//!
//! # Architecture
//!
//! ```text
//! BaseClient (Arc<ClientInner>)
//! +-- bus name    org.freedesktop.Telepathy.Client.<name>[.<unique>.n<N>]
//! +-- object path /org/freedesktop/Telepathy/Client/<name>[/<unique>/n<N>]
//! +-- roles + filters + per-role features
//! +-- ClientFactory (account / connection / channel proxy cache)
//! +-- exported ClientObject (Weak<ClientInner>)
//!     +-- Client.Observer.ObserveChannels          -> ObserveChannelsContext
//!     +-- Client.Approver.AddDispatchOperation     -> ApproveChannelsContext
//!     +-- Client.Handler.HandleChannels            -> HandleChannelsContext
//!     +-- Client.Interface.Requests.{Add,Remove}Request
//!     +-- DBus.Properties.{Get,GetAll}
//! ```
//!
//! Every role method builds its context, lets the implementation decide
//! (`accept`, `fail` or `delay`) and answers the dispatcher from the
//! context.
//!
//! # Example
//!
//! ```no_run
//! use rtcbus::bus::{BusDaemon, MemoryBus};
//! use rtcbus::client::{BaseClient, ChannelFilter};
//!
//! let bus = MemoryBus::new();
//! let daemon = BusDaemon::new(bus.connect());
//! let logger = BaseClient::new(&daemon, "Logger", false).expect("valid name");
//! logger.add_observer_filter(ChannelFilter::text_chats());
//! logger.implement_observe_channels(|_client, context| {
//!     for channel in context.channels() {
//!         log::info!("observing {}", channel.object_path());
//!     }
//!     context.accept();
//! });
//! logger.register().expect("name is free");
//! ```

mod approve;
mod context;
mod factory;
mod filter;
mod handle;
mod observe;

pub use context::{ApproveChannelsContext, ContextState, HandleChannelsContext, ObserveChannelsContext};
pub use factory::ClientFactory;
pub use filter::ChannelFilter;

use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, OnceLock, Weak};

use dashmap::DashMap;
use parking_lot::Mutex;

use crate::account::Account;
use crate::bus::{BusDaemon, BusError, IncomingCall, ObjectHandler, Responder};
use crate::channel::{channel_details, AutomaticChannelFactory, Channel, ChannelFactory};
use crate::channel_request::ChannelRequest;
use crate::connection::Connection;
use crate::config::{
    RuntimeConfig, CLIENT_BUS_NAME_BASE, DBUS_ERROR_INVALID_ARGS, DBUS_ERROR_UNKNOWN_METHOD, IFACE_CLIENT,
    IFACE_CLIENT_APPROVER, IFACE_CLIENT_HANDLER, IFACE_CLIENT_INTERFACE_REQUESTS, IFACE_CLIENT_OBSERVER,
    IFACE_PROPERTIES,
};
use crate::error::{ErrorKind, ErrorRegistry, ProxyError, Result};
use crate::event::{ListenerId, Signal};
use crate::logging::DebugFlags;
use crate::proxy::FeatureId;
use crate::util::{escape_as_identifier, is_valid_bus_name};
use crate::value::{Asv, Value};
use crate::{programming_error, rtc_debug};

use context::RoleFeatures;

/// Observer implementation: decide on every `ObserveChannels` call.
pub type ObserveChannelsImpl = Arc<dyn Fn(&BaseClient, &ObserveChannelsContext) + Send + Sync>;
/// Approver implementation: decide on every `AddDispatchOperation` call.
pub type AddDispatchOperationImpl = Arc<dyn Fn(&BaseClient, &ApproveChannelsContext) + Send + Sync>;
/// Handler implementation: decide on every `HandleChannels` call.
pub type HandleChannelsImpl = Arc<dyn Fn(&BaseClient, &HandleChannelsContext) + Send + Sync>;

/// A request the dispatcher withdrew from a handler.
#[derive(Debug, Clone)]
pub struct RequestRemoved {
    pub request: ChannelRequest,
    /// Bus error name the request failed with
    pub error: String,
    pub message: String,
}

#[derive(Default)]
struct ClientState {
    is_observer: bool,
    is_approver: bool,
    is_handler: bool,
    observer_recover: bool,
    bypass_approval: bool,
    request_notification: bool,
    registered: bool,
    observer_filters: Vec<ChannelFilter>,
    approver_filters: Vec<ChannelFilter>,
    handler_filters: Vec<ChannelFilter>,
    capabilities: Vec<String>,
    features: RoleFeatures,
    observe_impl: Option<ObserveChannelsImpl>,
    approve_impl: Option<AddDispatchOperationImpl>,
    handle_impl: Option<HandleChannelsImpl>,
    pending_requests: Vec<ChannelRequest>,
    /// object path -> (channel, invalidation listener)
    handled: HashMap<String, (Channel, ListenerId)>,
}

struct ClientInner {
    daemon: BusDaemon,
    name: String,
    uniquify: bool,
    bus_name: String,
    object_path: String,
    factory: ClientFactory,
    state: Mutex<ClientState>,
    request_added: Signal<(Account, ChannelRequest)>,
    request_removed: Signal<RequestRemoved>,
}

/// Handlers registered on each bus connection, keyed by its unique name.
fn handlers() -> &'static DashMap<String, Vec<Weak<ClientInner>>> {
    static HANDLERS: OnceLock<DashMap<String, Vec<Weak<ClientInner>>>> = OnceLock::new();
    HANDLERS.get_or_init(DashMap::new)
}

/// An observer, approver and/or handler exported on the bus.
#[derive(Clone)]
pub struct BaseClient {
    inner: Arc<ClientInner>,
}

impl BaseClient {
    /// Client called `name` (the part after the client bus-name prefix).
    /// With `uniquify`, a suffix derived from the bus connection and a
    /// process-wide counter lets several instances coexist.
    pub fn new(daemon: &BusDaemon, name: &str, uniquify: bool) -> Result<BaseClient> {
        Self::with_channel_factory(daemon, name, uniquify, Arc::new(AutomaticChannelFactory))
    }

    pub fn with_channel_factory(
        daemon: &BusDaemon,
        name: &str,
        uniquify: bool,
        channel_factory: Arc<dyn ChannelFactory>,
    ) -> Result<BaseClient> {
        let mut bus_name = format!("{}{}", CLIENT_BUS_NAME_BASE, name);
        if uniquify {
            let unique = escape_as_identifier(&daemon.unique_name());
            let counter = RuntimeConfig::global().next_unique_suffix();
            bus_name.push_str(&format!(".{}.n{}", unique, counter));
        }
        if !is_valid_bus_name(&bus_name) {
            return Err(ProxyError::proxy(
                ErrorKind::InvalidBusName,
                format!("'{}' is not a valid client bus name", bus_name),
            ));
        }
        let object_path = format!("/{}", bus_name.replace('.', "/"));
        rtc_debug!(DebugFlags::CLIENT, "[BaseClient::new] {} at {}", bus_name, object_path);

        Ok(BaseClient {
            inner: Arc::new(ClientInner {
                daemon: daemon.clone(),
                name: name.to_owned(),
                uniquify,
                bus_name,
                object_path,
                factory: ClientFactory::with_channel_factory(daemon, channel_factory),
                state: Mutex::new(ClientState::default()),
                request_added: Signal::new(),
                request_removed: Signal::new(),
            }),
        })
    }

    pub fn name(&self) -> &str {
        &self.inner.name
    }

    pub fn uniquify_name(&self) -> bool {
        self.inner.uniquify
    }

    pub fn bus_name(&self) -> &str {
        &self.inner.bus_name
    }

    pub fn object_path(&self) -> &str {
        &self.inner.object_path
    }

    pub fn daemon(&self) -> &BusDaemon {
        &self.inner.daemon
    }

    pub fn factory(&self) -> &ClientFactory {
        &self.inner.factory
    }

    pub fn is_registered(&self) -> bool {
        self.inner.state.lock().registered
    }

    /// Run `f` on the state unless the client is already registered.
    fn configure(&self, what: &str, f: impl FnOnce(&mut ClientState)) {
        let mut state = self.inner.state.lock();
        if state.registered {
            programming_error!(
                "[BaseClient::{}] {} is already registered; change ignored",
                what,
                self.inner.bus_name
            );
            return;
        }
        f(&mut *state);
    }

    // -- roles ------------------------------------------------------------

    /// Become an observer of channels matching `filter`.
    pub fn add_observer_filter(&self, filter: ChannelFilter) {
        self.configure("add_observer_filter", |s| {
            s.is_observer = true;
            s.observer_filters.push(filter);
        });
    }

    /// Ask the dispatcher to replay existing channels when it (or this
    /// observer) restarts.
    pub fn set_observer_recover(&self, recover: bool) {
        self.configure("set_observer_recover", |s| {
            s.is_observer = true;
            s.observer_recover = recover;
        });
    }

    pub fn add_approver_filter(&self, filter: ChannelFilter) {
        self.configure("add_approver_filter", |s| {
            s.is_approver = true;
            s.approver_filters.push(filter);
        });
    }

    /// Be a handler even without filters (for channels requested with this
    /// client as preferred handler).
    pub fn be_a_handler(&self) {
        self.configure("be_a_handler", |s| s.is_handler = true);
    }

    pub fn add_handler_filter(&self, filter: ChannelFilter) {
        self.configure("add_handler_filter", |s| {
            s.is_handler = true;
            s.handler_filters.push(filter);
        });
    }

    /// Channels matching this handler's filters skip approvers.
    pub fn set_handler_bypass_approval(&self, bypass: bool) {
        self.configure("set_handler_bypass_approval", |s| {
            s.is_handler = true;
            s.bypass_approval = bypass;
        });
    }

    /// Get told about requests this handler is likely to be asked to
    /// handle, through [`connect_request_added`](Self::connect_request_added).
    pub fn set_handler_request_notification(&self) {
        self.configure("set_handler_request_notification", |s| {
            s.is_handler = true;
            s.request_notification = true;
        });
    }

    pub fn add_handler_capability(&self, token: &str) {
        self.add_handler_capabilities([token]);
    }

    pub fn add_handler_capabilities<I, S>(&self, tokens: I)
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        self.configure("add_handler_capabilities", |s| {
            s.is_handler = true;
            for token in tokens {
                let token = token.as_ref();
                if !s.capabilities.iter().any(|t| t == token) {
                    s.capabilities.push(token.to_owned());
                }
            }
        });
    }

    /// Features prepared on every account handed to the implementation.
    pub fn add_account_features(&self, features: &[FeatureId]) {
        self.inner.state.lock().features.account.extend_from_slice(features);
    }

    pub fn add_connection_features(&self, features: &[FeatureId]) {
        self.inner.state.lock().features.connection.extend_from_slice(features);
    }

    pub fn add_channel_features(&self, features: &[FeatureId]) {
        self.inner.state.lock().features.channel.extend_from_slice(features);
    }

    pub fn implement_observe_channels<F>(&self, implementation: F)
    where
        F: Fn(&BaseClient, &ObserveChannelsContext) + Send + Sync + 'static,
    {
        self.inner.state.lock().observe_impl = Some(Arc::new(implementation));
    }

    pub fn implement_add_dispatch_operation<F>(&self, implementation: F)
    where
        F: Fn(&BaseClient, &ApproveChannelsContext) + Send + Sync + 'static,
    {
        self.inner.state.lock().approve_impl = Some(Arc::new(implementation));
    }

    pub fn implement_handle_channels<F>(&self, implementation: F)
    where
        F: Fn(&BaseClient, &HandleChannelsContext) + Send + Sync + 'static,
    {
        self.inner.state.lock().handle_impl = Some(Arc::new(implementation));
    }

    pub fn observer_filters(&self) -> Vec<ChannelFilter> {
        self.inner.state.lock().observer_filters.clone()
    }

    pub fn approver_filters(&self) -> Vec<ChannelFilter> {
        self.inner.state.lock().approver_filters.clone()
    }

    pub fn handler_filters(&self) -> Vec<ChannelFilter> {
        self.inner.state.lock().handler_filters.clone()
    }

    /// Client interfaces this client implements.
    pub fn interfaces(&self) -> Vec<String> {
        let state = self.inner.state.lock();
        let mut interfaces = Vec::new();
        for (enabled, iface) in [
            (state.is_observer, IFACE_CLIENT_OBSERVER),
            (state.is_approver, IFACE_CLIENT_APPROVER),
            (state.is_handler, IFACE_CLIENT_HANDLER),
            (state.request_notification, IFACE_CLIENT_INTERFACE_REQUESTS),
        ] {
            if enabled {
                interfaces.push(iface.to_owned());
            }
        }
        interfaces
    }

    // -- registration -----------------------------------------------------

    /// Claim the client's bus name and export it.
    ///
    /// Fails if the name is taken. Registering twice, or registering a
    /// client without any role, is a programming error.
    pub fn register(&self) -> Result<()> {
        {
            let state = self.inner.state.lock();
            if state.registered {
                programming_error!("[BaseClient::register] {} is already registered", self.inner.bus_name);
                return Err(ProxyError::telepathy(
                    ErrorKind::NotAvailable,
                    format!("{} is already registered", self.inner.bus_name),
                ));
            }
            if !(state.is_observer || state.is_approver || state.is_handler) {
                programming_error!(
                    "[BaseClient::register] {} is neither observer, approver nor handler",
                    self.inner.bus_name
                );
                return Err(ProxyError::telepathy(
                    ErrorKind::InvalidArgument,
                    "A client must be an observer, an approver or a handler",
                ));
            }
        }

        rtc_debug!(DebugFlags::CLIENT, "[BaseClient::register] request name {}", self.inner.bus_name);
        let daemon = &self.inner.daemon;
        daemon.request_name(&self.inner.bus_name).map_err(|e| {
            rtc_debug!(
                DebugFlags::CLIENT,
                "[BaseClient::register] failed to register bus name {}: {}",
                self.inner.bus_name,
                e
            );
            ErrorRegistry::global().map_default(&e.name, &e.message)
        })?;
        let object = Arc::new(ClientObject {
            client: Arc::downgrade(&self.inner),
        });
        if let Err(e) = daemon.connection().export_object(&self.inner.object_path, object) {
            let _ = daemon.release_name(&self.inner.bus_name);
            return Err(ErrorRegistry::global().map_default(&e.name, &e.message));
        }

        let is_handler = {
            let mut state = self.inner.state.lock();
            state.registered = true;
            state.is_handler
        };
        if is_handler {
            handlers()
                .entry(daemon.unique_name())
                .or_default()
                .push(Arc::downgrade(&self.inner));
        }
        Ok(())
    }

    /// Release the bus name and stop answering the dispatcher. The client
    /// may be registered again afterwards.
    pub fn unregister(&self) {
        self.inner.unregister();
    }

    // -- requests and handled channels ------------------------------------

    /// Requests announced through `AddRequest` and not yet removed.
    pub fn pending_requests(&self) -> Vec<ChannelRequest> {
        let state = self.inner.state.lock();
        if !state.is_handler {
            programming_error!("[BaseClient::pending_requests] {} is not a handler", self.inner.bus_name);
            return Vec::new();
        }
        state.pending_requests.clone()
    }

    pub fn connect_request_added<F>(&self, listener: F) -> ListenerId
    where
        F: Fn(&(Account, ChannelRequest)) + Send + Sync + 'static,
    {
        self.inner.request_added.connect(listener)
    }

    pub fn connect_request_removed<F>(&self, listener: F) -> ListenerId
    where
        F: Fn(&RequestRemoved) + Send + Sync + 'static,
    {
        self.inner.request_removed.connect(listener)
    }

    /// Channels being handled by any handler sharing this client's bus
    /// connection, this one included. A channel stops being handled when
    /// it is invalidated.
    pub fn handled_channels(&self) -> Vec<Channel> {
        let mut channels: Vec<Channel> = self.inner.state.lock().handled.values().map(|(c, _)| c.clone()).collect();
        let others: Vec<Arc<ClientInner>> = handlers()
            .get(&self.inner.daemon.unique_name())
            .map(|list| list.iter().filter_map(Weak::upgrade).collect())
            .unwrap_or_default();
        for other in others {
            if Arc::ptr_eq(&other, &self.inner) {
                continue;
            }
            for (channel, _) in other.state.lock().handled.values() {
                if !channels.iter().any(|c| c.object_path() == channel.object_path()) {
                    channels.push(channel.clone());
                }
            }
        }
        channels
    }

    /// Start tracking `channels` as handled by this client.
    fn add_handled_channels(&self, channels: &[Channel]) {
        for channel in channels {
            if channel.proxy().is_invalidated() {
                continue;
            }
            let path = channel.object_path().to_owned();
            let weak = Arc::downgrade(&self.inner);
            let key = path.clone();
            let listener = channel.proxy().connect_invalidated(move |_| {
                if let Some(inner) = weak.upgrade() {
                    rtc_debug!(DebugFlags::CLIENT, "[BaseClient::handled] {} has been invalidated", key);
                    let removed = inner.state.lock().handled.remove(&key);
                    drop(removed);
                }
            });
            let replaced = self
                .inner
                .state
                .lock()
                .handled
                .insert(path, (channel.clone(), listener));
            if let Some((old, id)) = replaced {
                old.proxy().disconnect_invalidated(id);
            }
        }
    }

    // -- bus side ---------------------------------------------------------

    fn dispatch_call(&self, call: IncomingCall, responder: Responder) {
        rtc_debug!(
            DebugFlags::CLIENT,
            "[BaseClient::dispatch_call] {} {}.{} from {}",
            self.inner.object_path,
            call.interface,
            call.member,
            call.sender
        );
        match (call.interface.as_str(), call.member.as_str()) {
            (IFACE_CLIENT_OBSERVER, "ObserveChannels") => self.observe_channels(&call.args, responder),
            (IFACE_CLIENT_APPROVER, "AddDispatchOperation") => self.add_dispatch_operation(&call.args, responder),
            (IFACE_CLIENT_HANDLER, "HandleChannels") => self.handle_channels(&call.args, responder),
            (IFACE_CLIENT_INTERFACE_REQUESTS, "AddRequest") => self.add_request(&call.args, responder),
            (IFACE_CLIENT_INTERFACE_REQUESTS, "RemoveRequest") => self.remove_request(&call.args, responder),
            (IFACE_PROPERTIES, "Get") => self.get_property(&call.args, responder),
            (IFACE_PROPERTIES, "GetAll") => {
                let iface = call.args.first().and_then(Value::as_str).unwrap_or_default();
                responder.reply(vec![Value::Dict(self.dbus_properties(iface))]);
            }
            (iface, member) => responder.error(BusError::new(
                DBUS_ERROR_UNKNOWN_METHOD,
                format!("No such method {}.{} on {}", iface, member, self.inner.object_path),
            )),
        }
    }

    fn get_property(&self, args: &[Value], responder: Responder) {
        let iface = args.first().and_then(Value::as_str).unwrap_or_default();
        let name = args.get(1).and_then(Value::as_str).unwrap_or_default();
        match self.dbus_properties(iface).remove(name) {
            Some(value) => responder.reply(vec![value]),
            None => responder.error(BusError::new(
                DBUS_ERROR_INVALID_ARGS,
                format!("No property {} on interface {}", name, iface),
            )),
        }
    }

    /// Properties of `iface` as served on the bus. Interfaces of roles the
    /// client does not have are empty.
    fn dbus_properties(&self, iface: &str) -> Asv {
        let filters = |filters: &[ChannelFilter]| {
            Value::Array(filters.iter().cloned().map(Value::from).collect())
        };
        let mut props = Asv::new();
        match iface {
            IFACE_CLIENT => {
                props.insert("Interfaces".to_owned(), Value::Strv(self.interfaces()));
            }
            IFACE_CLIENT_OBSERVER => {
                let state = self.inner.state.lock();
                if state.is_observer {
                    props.insert("ObserverChannelFilter".to_owned(), filters(&state.observer_filters));
                    props.insert("Recover".to_owned(), Value::Bool(state.observer_recover));
                }
            }
            IFACE_CLIENT_APPROVER => {
                let state = self.inner.state.lock();
                if state.is_approver {
                    props.insert("ApproverChannelFilter".to_owned(), filters(&state.approver_filters));
                }
            }
            IFACE_CLIENT_HANDLER => {
                let (is_handler, handler_filters, bypass, capabilities) = {
                    let state = self.inner.state.lock();
                    (
                        state.is_handler,
                        filters(&state.handler_filters),
                        state.bypass_approval,
                        state.capabilities.clone(),
                    )
                };
                if is_handler {
                    let handled = self
                        .handled_channels()
                        .iter()
                        .map(|c| Value::ObjectPath(c.object_path().to_owned()))
                        .collect();
                    props.insert("HandlerChannelFilter".to_owned(), handler_filters);
                    props.insert("BypassApproval".to_owned(), Value::Bool(bypass));
                    props.insert("Capabilities".to_owned(), Value::Strv(capabilities));
                    props.insert("HandledChannels".to_owned(), Value::Array(handled));
                }
            }
            _ => {}
        }
        props
    }
}

impl ClientInner {
    fn unregister(&self) {
        let was_handler = {
            let mut state = self.state.lock();
            if !state.registered {
                return;
            }
            state.registered = false;
            state.is_handler
        };
        rtc_debug!(DebugFlags::CLIENT, "[BaseClient::unregister] {}", self.bus_name);
        if let Err(e) = self.daemon.release_name(&self.bus_name) {
            log::warn!(
                "[BaseClient::unregister] failed to release bus name ({}): {}",
                self.bus_name,
                e
            );
        }
        self.daemon.connection().unexport_object(&self.object_path);

        if was_handler {
            if let Some(mut list) = handlers().get_mut(&self.daemon.unique_name()) {
                list.retain(|weak| weak.upgrade().is_some_and(|other| !std::ptr::eq(&*other, self)));
            }
        }
    }
}

impl Drop for ClientInner {
    fn drop(&mut self) {
        self.unregister();
        if let Some(mut list) = handlers().get_mut(&self.daemon.unique_name()) {
            list.retain(|weak| weak.strong_count() > 0);
        }
    }
}

/// What the bus holds for a registered client.
struct ClientObject {
    client: Weak<ClientInner>,
}

impl ObjectHandler for ClientObject {
    fn handle_call(&self, call: IncomingCall, responder: Responder) {
        match self.client.upgrade() {
            Some(inner) => BaseClient { inner }.dispatch_call(call, responder),
            None => responder.error(BusError::new(
                DBUS_ERROR_UNKNOWN_METHOD,
                format!("Client at {} is gone", call.path),
            )),
        }
    }
}

/// `NotImplemented` for a role method the client does not have.
fn not_implemented(method: &str) -> BusError {
    BusError::from(&ProxyError::telepathy(
        ErrorKind::NotImplemented,
        format!("{} is not implemented", method),
    ))
}

fn invalid_argument(message: impl Into<String>) -> ProxyError {
    ProxyError::telepathy(ErrorKind::InvalidArgument, message)
}

/// Object-path argument `index` of `method`.
fn object_path_arg<'a>(args: &'a [Value], index: usize, method: &str) -> Result<&'a str> {
    args.get(index)
        .and_then(Value::as_object_path)
        .ok_or_else(|| invalid_argument(format!("{}: argument {} must be an object path", method, index)))
}

impl BaseClient {
    /// Inflate a channel details list through the channel factory. At least
    /// one channel is required.
    fn channels_arg(&self, connection: &Connection, details: Option<&Value>) -> Result<Vec<Channel>> {
        let details = details.map(channel_details).unwrap_or_default();
        if details.is_empty() {
            return Err(invalid_argument("Channels should contain at least one channel"));
        }
        details
            .into_iter()
            .map(|(path, props)| {
                self.inner.factory.ensure_channel(connection, &path, &props).map_err(|e| {
                    rtc_debug!(
                        DebugFlags::CLIENT,
                        "[BaseClient::channels_arg] failed to create channel {}: {}",
                        path,
                        e
                    );
                    e
                })
            })
            .collect()
    }

    fn features(&self) -> RoleFeatures {
        self.inner.state.lock().features.clone()
    }
}

impl fmt::Debug for BaseClient {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BaseClient")
            .field("bus_name", &self.inner.bus_name)
            .field("interfaces", &self.interfaces())
            .field("registered", &self.is_registered())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bus::MemoryBus;

    #[test]
    fn bus_name_and_object_path() {
        let bus = MemoryBus::new();
        let daemon = BusDaemon::new(bus.connect());
        let client = BaseClient::new(&daemon, "Logger", false).expect("valid");
        assert_eq!(client.bus_name(), "org.freedesktop.Telepathy.Client.Logger");
        assert_eq!(client.object_path(), "/org/freedesktop/Telepathy/Client/Logger");

        let a = BaseClient::new(&daemon, "Logger", true).expect("valid");
        let b = BaseClient::new(&daemon, "Logger", true).expect("valid");
        assert_ne!(a.bus_name(), b.bus_name());
        let unique = escape_as_identifier(&daemon.unique_name());
        assert!(a.bus_name().contains(&format!(".{}.n", unique)));
        assert_eq!(a.object_path(), format!("/{}", a.bus_name().replace('.', "/")));
    }

    #[test]
    fn invalid_names_are_rejected() {
        let bus = MemoryBus::new();
        let daemon = BusDaemon::new(bus.connect());
        let err = BaseClient::new(&daemon, "no spaces", false).unwrap_err();
        assert_eq!(err.kind, ErrorKind::InvalidBusName);
    }

    #[test]
    fn roles_drive_interfaces() {
        let bus = MemoryBus::new();
        let daemon = BusDaemon::new(bus.connect());
        let client = BaseClient::new(&daemon, "Roles", false).expect("valid");
        assert!(client.interfaces().is_empty());
        client.add_observer_filter(ChannelFilter::text_chats());
        client.set_handler_request_notification();
        assert_eq!(
            client.interfaces(),
            vec![
                IFACE_CLIENT_OBSERVER.to_owned(),
                IFACE_CLIENT_HANDLER.to_owned(),
                IFACE_CLIENT_INTERFACE_REQUESTS.to_owned(),
            ]
        );
    }

    #[test]
    fn register_requires_a_role_and_happens_once() {
        let bus = MemoryBus::new();
        let daemon = BusDaemon::new(bus.connect());
        let client = BaseClient::new(&daemon, "Once", false).expect("valid");
        assert_eq!(client.register().unwrap_err().kind, ErrorKind::InvalidArgument);

        client.be_a_handler();
        client.register().expect("name is free");
        assert!(client.is_registered());
        assert_eq!(client.register().unwrap_err().kind, ErrorKind::NotAvailable);

        // filters are frozen once registered
        client.add_handler_filter(ChannelFilter::text_chats());
        assert!(client.handler_filters().is_empty());

        client.unregister();
        assert!(!client.is_registered());
        client.register().expect("registers again");
    }

    #[test]
    fn name_collision_is_an_error() {
        let bus = MemoryBus::new();
        let first = BaseClient::new(&BusDaemon::new(bus.connect()), "Taken", false).expect("valid");
        let second = BaseClient::new(&BusDaemon::new(bus.connect()), "Taken", false).expect("valid");
        first.be_a_handler();
        second.be_a_handler();
        first.register().expect("free");
        let err = second.register().unwrap_err();
        assert_eq!(err.kind, ErrorKind::NotAvailable);
        assert!(!second.is_registered());
    }

    #[test]
    fn properties_reflect_roles() {
        let bus = MemoryBus::new();
        let daemon = BusDaemon::new(bus.connect());
        let client = BaseClient::new(&daemon, "Props", false).expect("valid");
        client.add_handler_filter(ChannelFilter::text_chats());
        client.set_handler_bypass_approval(true);
        client.add_handler_capabilities(["org.example.cap/a", "org.example.cap/a", "org.example.cap/b"]);

        let props = client.dbus_properties(IFACE_CLIENT_HANDLER);
        assert_eq!(props.get("BypassApproval"), Some(&Value::Bool(true)));
        assert_eq!(
            props.get("Capabilities"),
            Some(&Value::Strv(vec!["org.example.cap/a".into(), "org.example.cap/b".into()]))
        );
        assert_eq!(props.get("HandledChannels"), Some(&Value::Array(vec![])));
        assert!(client.dbus_properties(IFACE_CLIENT_OBSERVER).is_empty());
    }
}
