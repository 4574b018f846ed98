// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Account proxy.

use std::fmt;
use std::sync::Arc;

use parking_lot::Mutex;

use crate::asv::AsvExt;
use crate::bus::BusDaemon;
use crate::config::{ACCOUNT_MANAGER_BUS_NAME, ACCOUNT_OBJECT_PATH_BASE, IFACE_ACCOUNT, NULL_OBJECT_PATH};
use crate::connection::{Connection, ConnectionStatus, ConnectionStatusReason};
use crate::error::{ErrorKind, ProxyError, Result};
use crate::event::{ListenerId, Signal};
use crate::logging::DebugFlags;
use crate::proxy::{AsProxy, Feature, FeatureCompleter, FeatureId, Proxy, ProxyClass, BASE_CLASS};
use crate::rtc_debug;
use crate::value::{Asv, Value};

/// Last known account properties.
#[derive(Debug, Clone, Default, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct AccountProperties {
    pub display_name: String,
    pub enabled: bool,
    pub valid: bool,
    /// Object path of the current connection, if any
    pub connection: Option<String>,
    pub normalized_name: String,
    pub nickname: String,
    pub connection_status: Option<ConnectionStatus>,
    pub connection_status_reason: Option<ConnectionStatusReason>,
}

impl AccountProperties {
    fn apply(&mut self, props: &Asv) {
        if let Some(v) = props.get_str("DisplayName") {
            self.display_name = v.to_owned();
        }
        if let Some(v) = props.get_bool("Enabled") {
            self.enabled = v;
        }
        if let Some(v) = props.get_bool("Valid") {
            self.valid = v;
        }
        if let Some(v) = props.get_object_path("Connection") {
            self.connection = (v != NULL_OBJECT_PATH).then(|| v.to_owned());
        }
        if let Some(v) = props.get_str("NormalizedName") {
            self.normalized_name = v.to_owned();
        }
        if let Some(v) = props.get_str("Nickname") {
            self.nickname = v.to_owned();
        }
        if let Some(v) = props.get_u32("ConnectionStatus") {
            self.connection_status = ConnectionStatus::from_u32(v);
        }
        if let Some(v) = props.get_u32("ConnectionStatusReason") {
            self.connection_status_reason = Some(ConnectionStatusReason::from_u32(v));
        }
    }
}

struct AccountInner {
    cm_name: String,
    protocol_name: String,
    properties: Mutex<AccountProperties>,
    property_changed: Signal<Asv>,
}

static ACCOUNT_FEATURES: [Feature; 1] = [Feature::core(Account::FEATURE_CORE, prepare_core)];

pub static ACCOUNT_CLASS: ProxyClass = ProxyClass {
    name: "Account",
    primary_interface: IFACE_ACCOUNT,
    must_have_unique_name: true,
    parent: Some(&BASE_CLASS),
    features: &ACCOUNT_FEATURES,
    interface_added: None,
    errors: &[],
};

/// Proxy for an account held by the account manager.
#[derive(Clone)]
pub struct Account {
    proxy: Arc<Proxy>,
    inner: Arc<AccountInner>,
}

impl Account {
    /// The account property bundle is known.
    pub const FEATURE_CORE: FeatureId = FeatureId("account-core");

    /// Bind to `object_path`, which must live under the account prefix
    /// (`.../Account/<cm>/<protocol>/<id>`).
    pub fn new(daemon: &BusDaemon, object_path: &str) -> Result<Account> {
        let suffix = object_path.strip_prefix(ACCOUNT_OBJECT_PATH_BASE).unwrap_or_default();
        let mut components = suffix.split('/');
        let (Some(cm), Some(protocol), Some(_), None) =
            (components.next(), components.next(), components.next(), components.next())
        else {
            return Err(ProxyError::proxy(
                ErrorKind::InvalidObjectPath,
                format!("'{}' is not an account object path", object_path),
            ));
        };
        let inner = Arc::new(AccountInner {
            cm_name: cm.to_owned(),
            protocol_name: protocol.replace('_', "-"),
            properties: Mutex::new(AccountProperties::default()),
            property_changed: Signal::new(),
        });
        let proxy = Proxy::new(&ACCOUNT_CLASS, daemon, ACCOUNT_MANAGER_BUS_NAME, object_path)?;
        proxy.set_extension(Arc::clone(&inner));

        proxy.connect_signal(IFACE_ACCOUNT, "AccountPropertyChanged", |proxy, args| {
            let (Some(account), Some(props)) = (Account::from_proxy(proxy), args.first().and_then(Value::as_dict)) else {
                return;
            };
            account.apply(props);
            account.inner.property_changed.emit(props);
        })?;
        proxy.connect_signal(IFACE_ACCOUNT, "Removed", |proxy, _| {
            proxy.invalidate(ProxyError::object_removed("Account removed"));
        })?;
        Ok(Account { proxy, inner })
    }

    pub fn from_proxy(proxy: &Arc<Proxy>) -> Option<Account> {
        let inner = proxy.extension::<AccountInner>()?;
        Some(Account {
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

    pub fn cm_name(&self) -> &str {
        &self.inner.cm_name
    }

    /// Protocol name, with `_` unescaped to `-`.
    pub fn protocol_name(&self) -> &str {
        &self.inner.protocol_name
    }

    pub fn properties(&self) -> AccountProperties {
        self.inner.properties.lock().clone()
    }

    pub fn display_name(&self) -> String {
        self.inner.properties.lock().display_name.clone()
    }

    pub fn is_enabled(&self) -> bool {
        self.inner.properties.lock().enabled
    }

    pub fn is_valid(&self) -> bool {
        self.inner.properties.lock().valid
    }

    pub fn normalized_name(&self) -> String {
        self.inner.properties.lock().normalized_name.clone()
    }

    pub fn connection_path(&self) -> Option<String> {
        self.inner.properties.lock().connection.clone()
    }

    /// Proxy for the account's current connection.
    pub fn connection(&self) -> Option<Result<Connection>> {
        let path = self.connection_path()?;
        Some(Connection::new(self.proxy.daemon(), None, &path))
    }

    /// Changed properties, as announced by `AccountPropertyChanged`.
    pub fn connect_property_changed<F>(&self, listener: F) -> ListenerId
    where
        F: Fn(&Asv) + Send + Sync + 'static,
    {
        self.inner.property_changed.connect(listener)
    }

    pub fn set_enabled<F>(&self, enabled: bool, callback: F) -> Result<()>
    where
        F: FnOnce(Result<()>) + Send + 'static,
    {
        self.proxy
            .set_property(IFACE_ACCOUNT, "Enabled", Value::Bool(enabled), move |_, r| callback(r))
    }

    pub fn remove<F>(&self, callback: F) -> Result<()>
    where
        F: FnOnce(Result<()>) + Send + 'static,
    {
        self.proxy
            .call(IFACE_ACCOUNT, "Remove", vec![], move |_, r| callback(r.map(drop)))
            .map(drop)
    }

    fn apply(&self, props: &Asv) {
        rtc_debug!(
            DebugFlags::PROXY,
            "[Account::apply] {}: {}",
            self.object_path(),
            crate::asv::dump(props)
        );
        if let Some(interfaces) = props.get_strv("Interfaces") {
            self.proxy.add_interfaces(interfaces);
        }
        self.inner.properties.lock().apply(props);
    }
}

fn prepare_core(proxy: &Arc<Proxy>, done: FeatureCompleter) {
    proxy.get_all_properties(IFACE_ACCOUNT, move |proxy, result| match result {
        Ok(props) => {
            if let Some(account) = Account::from_proxy(proxy) {
                account.apply(&props);
            }
            done.succeed();
        }
        Err(e) => done.fail(&e),
    });
}

impl AsProxy for Account {
    fn as_proxy(&self) -> &Arc<Proxy> {
        &self.proxy
    }
}

impl fmt::Debug for Account {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Account")
            .field("object_path", &self.object_path())
            .field("properties", &*self.inner.properties.lock())
            .finish()
    }
}
