// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Connection proxy.
//!
//! A connection owns the handle repositories of its object path (one per
//! handle type) and is the only component that takes or releases handle
//! references on them. It invalidates itself when the remote connection
//! reports `StatusChanged(Disconnected, reason)`.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use parking_lot::Mutex;

use crate::asv::AsvExt;
use crate::bus::{BusDaemon, BusError};
use crate::config::{CONN_OBJECT_PATH_BASE, IFACE_CONNECTION};
use crate::contact::Contact;
use crate::error::{ErrorKind, ProxyError, Result};
use crate::event::{ListenerId, Signal};
use crate::handle::{Handle, HandleRepository, HandleType};
use crate::logging::DebugFlags;
use crate::proxy::{AsProxy, Feature, FeatureCompleter, FeatureId, Proxy, ProxyClass, BASE_CLASS};
use crate::rtc_debug;
use crate::util::bus_name_from_object_path;
use crate::value::{Asv, Value};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum ConnectionStatus {
    Connected = 0,
    Connecting = 1,
    Disconnected = 2,
}

impl ConnectionStatus {
    pub fn from_u32(value: u32) -> Option<Self> {
        match value {
            0 => Some(ConnectionStatus::Connected),
            1 => Some(ConnectionStatus::Connecting),
            2 => Some(ConnectionStatus::Disconnected),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum ConnectionStatusReason {
    NoneSpecified = 0,
    Requested = 1,
    NetworkError = 2,
    AuthenticationFailed = 3,
    EncryptionError = 4,
    NameInUse = 5,
    CertNotProvided = 6,
    CertUntrusted = 7,
    CertExpired = 8,
    CertNotActivated = 9,
    CertHostnameMismatch = 10,
    CertFingerprintMismatch = 11,
    CertSelfSigned = 12,
    CertOtherError = 13,
}

impl ConnectionStatusReason {
    pub fn from_u32(value: u32) -> Self {
        use ConnectionStatusReason::*;
        match value {
            1 => Requested,
            2 => NetworkError,
            3 => AuthenticationFailed,
            4 => EncryptionError,
            5 => NameInUse,
            6 => CertNotProvided,
            7 => CertUntrusted,
            8 => CertExpired,
            9 => CertNotActivated,
            10 => CertHostnameMismatch,
            11 => CertFingerprintMismatch,
            12 => CertSelfSigned,
            13 => CertOtherError,
            _ => NoneSpecified,
        }
    }

    /// Invalidation error for a disconnection with this reason.
    pub fn to_error(self) -> ProxyError {
        use ConnectionStatusReason::*;
        let kind = match self {
            NoneSpecified => ErrorKind::Disconnected,
            Requested => ErrorKind::Cancelled,
            NetworkError => ErrorKind::NetworkError,
            AuthenticationFailed => ErrorKind::AuthenticationFailed,
            EncryptionError => ErrorKind::EncryptionError,
            NameInUse => ErrorKind::NotYours,
            CertNotProvided => ErrorKind::CertNotProvided,
            CertUntrusted | CertSelfSigned => ErrorKind::CertUntrusted,
            CertExpired => ErrorKind::CertExpired,
            CertNotActivated | CertHostnameMismatch | CertFingerprintMismatch | CertOtherError => {
                ErrorKind::CertInvalid
            }
        };
        ProxyError::telepathy(kind, format!("Disconnected: {:?}", self))
    }
}

#[derive(Default)]
struct ConnectionState {
    status: Option<ConnectionStatus>,
    reason: Option<ConnectionStatusReason>,
    self_handle: Option<Handle>,
    /// Last `ConnectionError` (name, details), used as the invalidation error
    connection_error: Option<(String, Asv)>,
}

struct ConnectionInner {
    repositories: HashMap<HandleType, Arc<HandleRepository>>,
    contacts: Arc<HandleRepository>,
    state: Mutex<ConnectionState>,
    status_changed: Signal<(ConnectionStatus, ConnectionStatusReason)>,
}

static CONNECTION_FEATURES: [Feature; 1] = [Feature::core(Connection::FEATURE_CORE, prepare_core)];

pub static CONNECTION_CLASS: ProxyClass = ProxyClass {
    name: "Connection",
    primary_interface: IFACE_CONNECTION,
    must_have_unique_name: true,
    parent: Some(&BASE_CLASS),
    features: &CONNECTION_FEATURES,
    interface_added: None,
    errors: &[],
};

/// Proxy for a connection object.
#[derive(Clone)]
pub struct Connection {
    proxy: Arc<Proxy>,
    inner: Arc<ConnectionInner>,
}

impl Connection {
    /// Interfaces, status and self handle are known.
    pub const FEATURE_CORE: FeatureId = FeatureId("connection-core");

    /// Bind to the connection at `object_path`. The bus name defaults to the
    /// one derived from the path.
    pub fn new(daemon: &BusDaemon, bus_name: Option<&str>, object_path: &str) -> Result<Connection> {
        let bus_name = match bus_name {
            Some(name) => name.to_owned(),
            None => bus_name_from_object_path(object_path).ok_or_else(|| {
                ProxyError::proxy(
                    ErrorKind::InvalidObjectPath,
                    format!("Cannot derive a bus name from '{}'", object_path),
                )
            })?,
        };
        let proxy = Proxy::new(&CONNECTION_CLASS, daemon, &bus_name, object_path)?;

        let mut repositories = HashMap::new();
        for handle_type in HandleType::ALL {
            repositories.insert(
                handle_type,
                HandleRepository::for_connection(object_path, handle_type)?,
            );
        }
        let contacts = HandleRepository::for_connection(object_path, HandleType::Contact)?;
        let inner = Arc::new(ConnectionInner {
            repositories,
            contacts,
            state: Mutex::new(ConnectionState::default()),
            status_changed: Signal::new(),
        });
        proxy.set_extension(Arc::clone(&inner));

        proxy.connect_signal(IFACE_CONNECTION, "StatusChanged", |proxy, args| {
            let status = args.first().and_then(Value::as_u32).and_then(ConnectionStatus::from_u32);
            let reason = args.get(1).and_then(Value::as_u32).map(ConnectionStatusReason::from_u32);
            if let (Some(connection), Some(status), Some(reason)) = (Connection::from_proxy(proxy), status, reason) {
                connection.on_status_changed(status, reason);
            }
        })?;
        proxy.connect_signal(IFACE_CONNECTION, "ConnectionError", |proxy, args| {
            let name = args.first().and_then(Value::as_str).unwrap_or_default().to_owned();
            let details = args.get(1).and_then(Value::as_dict).cloned().unwrap_or_default();
            if let Some(connection) = Connection::from_proxy(proxy) {
                rtc_debug!(
                    DebugFlags::PROXY,
                    "[Connection::on_connection_error] {}: {}",
                    connection.proxy.object_path(),
                    name
                );
                connection.inner.state.lock().connection_error = Some((name, details));
            }
        })?;

        Ok(Connection { proxy, inner })
    }

    /// Rebuild the typed view of a proxy created by [`Connection::new`].
    pub fn from_proxy(proxy: &Arc<Proxy>) -> Option<Connection> {
        let inner = proxy.extension::<ConnectionInner>()?;
        Some(Connection {
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

    /// Connection manager name, from the object path.
    pub fn cm_name(&self) -> Option<&str> {
        self.path_component(0)
    }

    /// Protocol name, from the object path.
    pub fn protocol_name(&self) -> Option<&str> {
        self.path_component(1)
    }

    fn path_component(&self, n: usize) -> Option<&str> {
        self.object_path()
            .strip_prefix(CONN_OBJECT_PATH_BASE)?
            .split('/')
            .nth(n)
    }

    /// `None` until the core feature or a `StatusChanged` reported it.
    pub fn status(&self) -> Option<ConnectionStatus> {
        self.inner.state.lock().status
    }

    pub fn status_reason(&self) -> Option<ConnectionStatusReason> {
        self.inner.state.lock().reason
    }

    pub fn self_handle(&self) -> Option<Handle> {
        self.inner.state.lock().self_handle
    }

    pub fn handle_repository(&self, handle_type: HandleType) -> Option<&Arc<HandleRepository>> {
        self.inner.repositories.get(&handle_type)
    }

    pub fn contact_repository(&self) -> &Arc<HandleRepository> {
        &self.inner.contacts
    }

    /// Take a reference on a handle the remote side assigned to `id`.
    pub fn hold_handle(&self, handle_type: HandleType, handle: Handle, id: &str) -> Result<()> {
        let repo = self
            .handle_repository(handle_type)
            .ok_or(crate::handle::HandleError::UnsupportedType(handle_type))?;
        repo.hold(handle, id)?;
        Ok(())
    }

    pub fn release_handle(&self, handle_type: HandleType, handle: Handle) -> Result<()> {
        let repo = self
            .handle_repository(handle_type)
            .ok_or(crate::handle::HandleError::UnsupportedType(handle_type))?;
        repo.unref_handle(handle)?;
        Ok(())
    }

    /// Contact for a remote handle and its identifier.
    pub fn ensure_contact(&self, handle: Handle, id: &str) -> Result<Contact> {
        self.hold_handle(HandleType::Contact, handle, id)?;
        let identifier = self.contact_repository().inspect(handle).unwrap_or_else(|| id.to_owned());
        Ok(Contact::new_held(self.clone(), handle, identifier))
    }

    /// Contact for a handle already known to the repository.
    pub fn contact_for_handle(&self, handle: Handle) -> Result<Contact> {
        let repo = self.contact_repository();
        repo.ref_handle(handle)?;
        let identifier = repo.inspect(handle).unwrap_or_default();
        Ok(Contact::new_held(self.clone(), handle, identifier))
    }

    /// Resolve identifiers to handles through the remote connection. The
    /// returned handles are held on behalf of the caller.
    pub fn request_handles<F>(&self, handle_type: HandleType, ids: Vec<String>, callback: F) -> Result<()>
    where
        F: FnOnce(Result<Vec<Handle>>) + Send + 'static,
    {
        let args = vec![Value::U32(handle_type.as_u32()), Value::Strv(ids.clone())];
        self.proxy
            .call(IFACE_CONNECTION, "RequestHandles", args, move |proxy, reply| {
                let result = reply.and_then(|out| {
                    let handles = out.first().and_then(Value::to_u32_vec).ok_or_else(|| {
                        ProxyError::proxy(ErrorKind::Inconsistent, "RequestHandles returned no handles")
                    })?;
                    if handles.len() != ids.len() {
                        return Err(ProxyError::proxy(
                            ErrorKind::Inconsistent,
                            "RequestHandles returned the wrong number of handles",
                        ));
                    }
                    let connection = Connection::from_proxy(proxy).ok_or_else(|| {
                        ProxyError::proxy(ErrorKind::Inconsistent, "not a connection proxy")
                    })?;
                    for (handle, id) in handles.iter().zip(&ids) {
                        connection.hold_handle(handle_type, *handle, id)?;
                    }
                    Ok(handles)
                });
                callback(result);
            })
            .map(drop)
    }

    /// Ask the remote connection to disconnect.
    pub fn disconnect<F>(&self, callback: F) -> Result<()>
    where
        F: FnOnce(Result<()>) + Send + 'static,
    {
        self.proxy
            .call(IFACE_CONNECTION, "Disconnect", vec![], move |_, reply| callback(reply.map(drop)))
            .map(drop)
    }

    pub fn connect_status_changed<F>(&self, listener: F) -> ListenerId
    where
        F: Fn(&(ConnectionStatus, ConnectionStatusReason)) + Send + Sync + 'static,
    {
        self.inner.status_changed.connect(listener)
    }

    fn on_status_changed(&self, status: ConnectionStatus, reason: ConnectionStatusReason) {
        rtc_debug!(
            DebugFlags::PROXY,
            "[Connection::on_status_changed] {}: {:?} ({:?})",
            self.object_path(),
            status,
            reason
        );
        let connection_error = {
            let mut state = self.inner.state.lock();
            state.status = Some(status);
            state.reason = Some(reason);
            state.connection_error.take()
        };
        self.inner.status_changed.emit(&(status, reason));

        if status == ConnectionStatus::Disconnected {
            let error = match connection_error {
                Some((name, details)) => {
                    let message = details.get_str("debug-message").unwrap_or(&name).to_owned();
                    self.proxy.map_bus_error(&BusError::new(name, message))
                }
                None => reason.to_error(),
            };
            self.proxy.invalidate(error);
        }
    }

    fn apply_core_properties(&self, props: &Asv) -> Result<()> {
        if let Some(interfaces) = props.get_strv("Interfaces") {
            self.proxy.add_interfaces(interfaces);
        }
        let status = props.get_u32("Status").and_then(ConnectionStatus::from_u32);
        if let Some(handle) = props.get_u32("SelfHandle").filter(|h| *h != 0) {
            if let Some(id) = props.get_str("SelfID") {
                self.hold_handle(HandleType::Contact, handle, id)?;
            }
            self.inner.state.lock().self_handle = Some(handle);
        }
        if let Some(status) = status {
            let first = self.inner.state.lock().status.is_none();
            if first {
                self.on_status_changed(status, ConnectionStatusReason::NoneSpecified);
            }
        }
        Ok(())
    }
}

fn prepare_core(proxy: &Arc<Proxy>, done: FeatureCompleter) {
    proxy.get_all_properties(IFACE_CONNECTION, move |proxy, result| {
        let applied = result.and_then(|props| match Connection::from_proxy(proxy) {
            Some(connection) => connection.apply_core_properties(&props),
            None => Ok(()),
        });
        match applied {
            Ok(()) => done.succeed(),
            Err(e) => done.fail(&e),
        }
    });
}

impl AsProxy for Connection {
    fn as_proxy(&self) -> &Arc<Proxy> {
        &self.proxy
    }
}

impl PartialEq for Connection {
    fn eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.proxy, &other.proxy)
    }
}

impl fmt::Debug for Connection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Connection")
            .field("object_path", &self.object_path())
            .field("status", &self.status())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reasons_map_to_errors() {
        assert_eq!(ConnectionStatusReason::from_u32(1).to_error().kind, ErrorKind::Cancelled);
        assert_eq!(ConnectionStatusReason::from_u32(5).to_error().kind, ErrorKind::NotYours);
        assert_eq!(ConnectionStatusReason::from_u32(99), ConnectionStatusReason::NoneSpecified);
        assert_eq!(ConnectionStatusReason::NoneSpecified.to_error().kind, ErrorKind::Disconnected);
    }
}
