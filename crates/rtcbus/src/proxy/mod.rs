// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Proxy runtime: one local stand-in per remote object.
//!
//! # Architecture
//!
//! ```text
//! ProxyClass (static, one per proxy kind)
//! +-- primary_interface, must_have_unique_name
//! +-- parent          -> base class chain
//! +-- features        -> declarative readiness states
//! +-- interface_added -> hook run once per interface added
//! +-- errors          -> bus error prefixes -> ErrorKind
//!
//! Proxy (Arc, shared)
//! +-- bus_name, object_path (immutable)
//! +-- state: Mutex<ProxyState>
//! |   +-- interfaces       grows until invalidation
//! |   +-- invalidated      set once, terminal
//! |   +-- pending_calls    id -> PendingCall   (each call holds the proxy)
//! |   +-- signals          id -> SignalConnection (each holds a Weak proxy)
//! |   +-- features         per-feature state + waiters
//! +-- extensions          capability state attached by subclasses
//! ```
//!
//! # Invalidation
//!
//! [`Proxy::invalidate`] takes effect once. In order: the error is stored,
//! pending calls are completed with it, signal connections are torn down,
//! feature waiters are failed, and finally `invalidated` listeners run.
//! Afterwards every call fails synchronously with the stored error.
//!
//! # Thread Safety
//!
//! All state is behind `parking_lot` locks that are released before any user
//! callback runs. Signal delivery additionally holds a per-connection
//! reentrant lock so that `disconnect()` can wait out an in-flight callback.
//!
//! Proxies are driven from one thread, the one pumping the bus. A callback
//! may disconnect or invalidate its own proxy on that thread. Delivering
//! signals of one proxy on two threads at once while a callback invalidates
//! it is unsupported: each teardown waits on the other's delivery lock.

mod cancellable;
mod feature;
mod pending_call;
mod properties;
mod signal_connection;

pub use cancellable::Cancellable;
pub use feature::{Feature, FeatureCompleter, FeatureId, FeatureState, PrepareCallback, PrepareFn};
pub use pending_call::{CallOptions, DestroyNotify, PendingCall, ReplyCallback};
pub use properties::PropertiesCallback;
pub use signal_connection::{SignalCallback, SignalConnection, SignalOptions};

use std::any::{Any, TypeId};
use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::sync::{Arc, Weak};

use parking_lot::Mutex;

use crate::bus::{BusDaemon, BusError, NameOwnerWatch};
use crate::config::IFACE_PROPERTIES;
use crate::error::{ErrorKind, ErrorMapping, ErrorRegistry, ProxyError, Result, BUILTIN_ERRORS};
use crate::event::{ListenerId, Signal};
use crate::logging::DebugFlags;
use crate::util::{is_unique_name, is_valid_bus_name, is_valid_interface_name, is_valid_object_path};
use crate::{programming_error, rtc_debug};

/// Weakly-held auxiliary object a call or signal connection is bound to.
pub type WeakObject = Weak<dyn Any + Send + Sync>;

/// Runs once per interface added to a proxy of the class.
pub type InterfaceAddedHook = fn(&Arc<Proxy>, &str);

/// Static description of a proxy kind.
#[derive(Debug)]
pub struct ProxyClass {
    pub name: &'static str,
    pub primary_interface: &'static str,
    /// Resolve well-known names to the owner's unique name at construction
    pub must_have_unique_name: bool,
    pub parent: Option<&'static ProxyClass>,
    pub features: &'static [Feature],
    pub interface_added: Option<InterfaceAddedHook>,
    pub errors: &'static [ErrorMapping],
}

/// Root of every class chain.
pub static BASE_CLASS: ProxyClass = ProxyClass {
    name: "Proxy",
    primary_interface: IFACE_PROPERTIES,
    must_have_unique_name: false,
    parent: None,
    features: &[],
    interface_added: None,
    errors: &BUILTIN_ERRORS,
};

impl ProxyClass {
    /// `self`, then its parent, up to [`BASE_CLASS`].
    pub fn ancestors(&'static self) -> impl Iterator<Item = &'static ProxyClass> {
        std::iter::successors(Some(self), |c| c.parent)
    }

    /// True if `self` is `other` or derives from it.
    pub fn is_a(&'static self, other: &'static ProxyClass) -> bool {
        self.ancestors().any(|c| std::ptr::eq(c, other))
    }

    pub fn find_feature(&'static self, id: FeatureId) -> Option<&'static Feature> {
        self.ancestors()
            .flat_map(|c| c.features.iter())
            .find(|f| f.id == id)
    }

    /// Core features of the whole chain, base class first.
    pub fn core_features(&'static self) -> Vec<FeatureId> {
        let mut chain: Vec<&'static ProxyClass> = self.ancestors().collect();
        chain.reverse();
        chain
            .into_iter()
            .flat_map(|c| c.features.iter())
            .filter(|f| f.core)
            .map(|f| f.id)
            .collect()
    }

    /// Map a bus error through this class chain, most derived first.
    pub fn map_bus_error(&'static self, error: &BusError) -> ProxyError {
        ErrorRegistry::global().map(
            self.ancestors().map(|c| (c.name, c.errors)),
            &error.name,
            &error.message,
        )
    }
}

/// Access the [`Proxy`] behind a typed wrapper.
pub trait AsProxy {
    fn as_proxy(&self) -> &Arc<Proxy>;
}

impl AsProxy for Arc<Proxy> {
    fn as_proxy(&self) -> &Arc<Proxy> {
        self
    }
}

#[derive(Default)]
struct ProxyState {
    interfaces: Vec<String>,
    invalidated: Option<ProxyError>,
    pending_calls: BTreeMap<u64, Arc<PendingCall>>,
    signals: BTreeMap<u64, Arc<SignalConnection>>,
    features: feature::FeatureTable,
    property_fetches: HashMap<String, Vec<PropertiesCallback>>,
    owner_watch: Option<NameOwnerWatch>,
    next_id: u64,
}

/// A bound remote object. See the module docs.
pub struct Proxy {
    class: &'static ProxyClass,
    daemon: BusDaemon,
    bus_name: String,
    object_path: String,
    weak_self: Weak<Proxy>,
    state: Mutex<ProxyState>,
    invalidated_event: Signal<ProxyError>,
    interface_added_event: Signal<String>,
    extensions: Mutex<HashMap<TypeId, Arc<dyn Any + Send + Sync>>>,
}

impl Proxy {
    /// Bind a proxy of `class` to `bus_name` and `object_path`.
    ///
    /// If the class must have a unique name and `bus_name` is well-known,
    /// the current owner is looked up synchronously; no owner is an error
    /// mapped through the class chain.
    pub fn new(
        class: &'static ProxyClass,
        daemon: &BusDaemon,
        bus_name: &str,
        object_path: &str,
    ) -> Result<Arc<Proxy>> {
        if !is_valid_bus_name(bus_name) {
            return Err(ProxyError::proxy(
                ErrorKind::InvalidBusName,
                format!("Invalid bus name '{}'", bus_name),
            ));
        }
        if !is_valid_object_path(object_path) {
            return Err(ProxyError::proxy(
                ErrorKind::InvalidObjectPath,
                format!("Invalid object path '{}'", object_path),
            ));
        }

        let bus_name = if class.must_have_unique_name {
            daemon
                .resolve_unique_name(bus_name)
                .map_err(|e| class.map_bus_error(&e))?
        } else {
            bus_name.to_owned()
        };

        let proxy = Arc::new_cyclic(|weak| Proxy {
            class,
            daemon: daemon.clone(),
            bus_name,
            object_path: object_path.to_owned(),
            weak_self: weak.clone(),
            state: Mutex::new(ProxyState::default()),
            invalidated_event: Signal::new(),
            interface_added_event: Signal::new(),
            extensions: Mutex::new(HashMap::new()),
        });
        rtc_debug!(
            DebugFlags::PROXY,
            "[Proxy::new] {} {} {}",
            class.name,
            proxy.bus_name,
            proxy.object_path
        );

        if is_unique_name(&proxy.bus_name) {
            let weak = Arc::downgrade(&proxy);
            let watch = daemon.watch_name_owner(&proxy.bus_name, move |name, new_owner| {
                if !new_owner.is_empty() {
                    return;
                }
                if let Some(proxy) = weak.upgrade() {
                    proxy.invalidate(ProxyError::name_owner_lost(format!(
                        "Name owner of {} lost (service crashed?)",
                        name
                    )));
                }
            });
            proxy.state.lock().owner_watch = Some(watch);
        }

        let mut chain: Vec<&'static ProxyClass> = class.ancestors().collect();
        chain.reverse();
        for c in chain {
            proxy.add_interface(c.primary_interface);
        }
        Ok(proxy)
    }

    pub fn class(&self) -> &'static ProxyClass {
        self.class
    }

    pub fn daemon(&self) -> &BusDaemon {
        &self.daemon
    }

    pub fn bus_name(&self) -> &str {
        &self.bus_name
    }

    pub fn object_path(&self) -> &str {
        &self.object_path
    }

    pub fn primary_interface(&self) -> &'static str {
        self.class.primary_interface
    }

    /// Strong reference to `self`, if any owner is still alive.
    pub fn upgrade(&self) -> Option<Arc<Proxy>> {
        self.weak_self.upgrade()
    }

    /// Map a bus error through this proxy's class chain.
    pub fn map_bus_error(&self, error: &BusError) -> ProxyError {
        self.class.map_bus_error(error)
    }

    /// Known interfaces, in the order they were added.
    pub fn interfaces(&self) -> Vec<String> {
        self.state.lock().interfaces.clone()
    }

    pub fn has_interface(&self, interface: &str) -> bool {
        self.state.lock().interfaces.iter().any(|i| i == interface)
    }

    /// Ok if a call on `interface` may be issued now.
    pub fn check_interface(&self, interface: &str) -> Result<()> {
        let state = self.state.lock();
        if let Some(error) = &state.invalidated {
            return Err(error.clone());
        }
        if state.interfaces.iter().any(|i| i == interface) {
            Ok(())
        } else {
            Err(ProxyError::no_interface(interface))
        }
    }

    /// Record that the remote object implements `interface`. Runs the class
    /// hooks (base to derived) and then `interface_added` listeners, once per
    /// new interface. Returns false if nothing changed.
    pub fn add_interface(self: &Arc<Self>, interface: &str) -> bool {
        if !is_valid_interface_name(interface) {
            programming_error!(
                "[Proxy::add_interface] '{}' is not a valid interface name",
                interface
            );
            return false;
        }
        {
            let mut state = self.state.lock();
            if state.invalidated.is_some() || state.interfaces.iter().any(|i| i == interface) {
                return false;
            }
            state.interfaces.push(interface.to_owned());
        }
        rtc_debug!(
            DebugFlags::PROXY,
            "[Proxy::add_interface] {}: {}",
            self.object_path,
            interface
        );

        let mut chain: Vec<&'static ProxyClass> = self.class.ancestors().collect();
        chain.reverse();
        for hook in chain.into_iter().filter_map(|c| c.interface_added) {
            hook(self, interface);
        }
        self.interface_added_event.emit(&interface.to_owned());
        true
    }

    pub fn add_interfaces<I, S>(self: &Arc<Self>, interfaces: I)
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        for interface in interfaces {
            self.add_interface(interface.as_ref());
        }
    }

    pub fn connect_interface_added<F>(&self, listener: F) -> ListenerId
    where
        F: Fn(&String) + Send + Sync + 'static,
    {
        self.interface_added_event.connect(listener)
    }

    /// The invalidation error, once invalidated.
    pub fn invalidated(&self) -> Option<ProxyError> {
        self.state.lock().invalidated.clone()
    }

    pub fn is_invalidated(&self) -> bool {
        self.state.lock().invalidated.is_some()
    }

    /// Listen for invalidation. Runs at most once. Connecting after the
    /// proxy was invalidated never fires; check [`invalidated`](Self::invalidated).
    pub fn connect_invalidated<F>(&self, listener: F) -> ListenerId
    where
        F: Fn(&ProxyError) + Send + Sync + 'static,
    {
        self.invalidated_event.connect(listener)
    }

    pub fn disconnect_invalidated(&self, id: ListenerId) -> bool {
        self.invalidated_event.disconnect(id)
    }

    /// Make the proxy terminal. Only the first call has any effect.
    pub fn invalidate(self: &Arc<Self>, error: ProxyError) {
        let (calls, signals, waiters, watch) = {
            let mut state = self.state.lock();
            if state.invalidated.is_some() {
                return;
            }
            state.invalidated = Some(error.clone());
            (
                std::mem::take(&mut state.pending_calls),
                std::mem::take(&mut state.signals),
                state.features.take_waiters(),
                state.owner_watch.take(),
            )
        };
        rtc_debug!(
            DebugFlags::PROXY,
            "[Proxy::invalidate] {} {}: {}",
            self.class.name,
            self.object_path,
            error
        );
        drop(watch);

        for call in calls.into_values() {
            call.fail_invalidated(&error);
        }
        for connection in signals.into_values() {
            connection.teardown();
        }
        for waiter in waiters {
            waiter(Err(error.clone()));
        }

        self.invalidated_event.emit(&error);
        self.invalidated_event.clear();
        self.interface_added_event.clear();
    }

    /// Attach capability state. One value per type.
    ///
    /// Values must not hold a strong reference to this proxy.
    pub fn set_extension<T: Any + Send + Sync>(&self, value: Arc<T>) {
        self.extensions.lock().insert(TypeId::of::<T>(), value);
    }

    pub fn extension<T: Any + Send + Sync>(&self) -> Option<Arc<T>> {
        let value = self.extensions.lock().get(&TypeId::of::<T>()).cloned()?;
        value.downcast::<T>().ok()
    }

    fn next_id(&self) -> u64 {
        let mut state = self.state.lock();
        state.next_id += 1;
        state.next_id
    }

    fn forget_pending(&self, id: u64) {
        let call = self.state.lock().pending_calls.remove(&id);
        drop(call);
    }

    fn forget_signal(&self, id: u64) {
        let connection = self.state.lock().signals.remove(&id);
        drop(connection);
    }

    /// Calls issued and not completed yet.
    pub fn pending_call_count(&self) -> usize {
        self.state.lock().pending_calls.len()
    }

    /// Live signal connections.
    pub fn signal_connection_count(&self) -> usize {
        self.state.lock().signals.len()
    }
}

impl Drop for Proxy {
    fn drop(&mut self) {
        let state = self.state.get_mut();
        let signals = std::mem::take(&mut state.signals);
        let waiters = state.features.take_waiters();
        let watch = state.owner_watch.take();
        drop(watch);
        for connection in signals.into_values() {
            connection.teardown();
        }
        for waiter in waiters {
            waiter(Err(ProxyError::proxy(
                ErrorKind::ProxyUnreferenced,
                "Proxy dropped while preparing features",
            )));
        }
    }
}

impl fmt::Debug for Proxy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Proxy")
            .field("class", &self.class.name)
            .field("bus_name", &self.bus_name)
            .field("object_path", &self.object_path)
            .field("invalidated", &self.is_invalidated())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bus::{BusConnection, MemoryBus};
    use std::sync::atomic::{AtomicUsize, Ordering};

    static TEST_CLASS: ProxyClass = ProxyClass {
        name: "TestProxy",
        primary_interface: "org.example.Test",
        must_have_unique_name: true,
        parent: Some(&BASE_CLASS),
        features: &[],
        interface_added: Some(count_hook),
        errors: &[],
    };

    static HOOK_RUNS: AtomicUsize = AtomicUsize::new(0);

    fn count_hook(_: &Arc<Proxy>, interface: &str) {
        if interface == "org.example.Extra" {
            HOOK_RUNS.fetch_add(1, Ordering::SeqCst);
        }
    }

    #[test]
    fn construction_resolves_unique_names() {
        let bus = MemoryBus::new();
        let service = bus.connect();
        service.request_name("org.example.Service").expect("free");
        let daemon = BusDaemon::new(bus.connect());

        let proxy = Proxy::new(&TEST_CLASS, &daemon, "org.example.Service", "/obj").expect("owned");
        assert_eq!(proxy.bus_name(), service.unique_name());
        assert_eq!(
            proxy.interfaces(),
            vec![IFACE_PROPERTIES.to_owned(), "org.example.Test".to_owned()]
        );

        let err = Proxy::new(&TEST_CLASS, &daemon, "org.example.Nobody", "/obj").unwrap_err();
        assert_eq!(err.domain, crate::error::ErrorDomain::Bus);
        assert_eq!(
            err.bus_error_name.as_deref(),
            Some(crate::config::DBUS_ERROR_NAME_HAS_NO_OWNER)
        );
    }

    #[test]
    fn invalid_names_are_rejected() {
        let bus = MemoryBus::new();
        let daemon = BusDaemon::new(bus.connect());
        let err = Proxy::new(&BASE_CLASS, &daemon, "nodots", "/obj").unwrap_err();
        assert_eq!(err.kind, ErrorKind::InvalidBusName);
        let err = Proxy::new(&BASE_CLASS, &daemon, "org.example.X", "obj").unwrap_err();
        assert_eq!(err.kind, ErrorKind::InvalidObjectPath);
    }

    #[test]
    fn interfaces_grow_once_and_hooks_run_once() {
        let bus = MemoryBus::new();
        let service = bus.connect();
        let daemon = BusDaemon::new(bus.connect());
        let proxy = Proxy::new(&TEST_CLASS, &daemon, &service.unique_name(), "/obj").expect("valid");

        let before = HOOK_RUNS.load(Ordering::SeqCst);
        assert!(proxy.add_interface("org.example.Extra"));
        assert!(!proxy.add_interface("org.example.Extra"));
        assert!(!proxy.add_interface("not an interface"));
        assert_eq!(HOOK_RUNS.load(Ordering::SeqCst), before + 1);
        assert!(proxy.check_interface("org.example.Extra").is_ok());
        assert_eq!(
            proxy.check_interface("org.example.Missing").unwrap_err().kind,
            ErrorKind::NoInterface
        );
    }

    #[test]
    fn losing_the_owner_invalidates() {
        let bus = MemoryBus::new();
        let service = bus.connect();
        let daemon = BusDaemon::new(bus.connect());
        let proxy = Proxy::new(&TEST_CLASS, &daemon, &service.unique_name(), "/obj").expect("valid");
        bus.dispatch();

        let fired = Arc::new(AtomicUsize::new(0));
        let f = fired.clone();
        proxy.connect_invalidated(move |e| {
            assert_eq!(e.kind, ErrorKind::NameOwnerLost);
            f.fetch_add(1, Ordering::SeqCst);
        });
        service.close();
        bus.dispatch();
        assert_eq!(fired.load(Ordering::SeqCst), 1);
        assert!(!proxy.add_interface("org.example.Late"));
    }

    #[test]
    fn extensions_are_typed() {
        let bus = MemoryBus::new();
        let daemon = BusDaemon::new(bus.connect());
        let proxy = Proxy::new(&BASE_CLASS, &daemon, "org.example.X", "/x").expect("valid");
        proxy.set_extension(Arc::new(41u32));
        assert_eq!(proxy.extension::<u32>().as_deref(), Some(&41));
        assert!(proxy.extension::<String>().is_none());
    }
}
