// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

use std::collections::HashMap;
use std::sync::OnceLock;

use parking_lot::RwLock;

use super::{ErrorDomain, ErrorKind, ProxyError};
use crate::config::{DBUS_ERROR_PREFIX, ERROR_PREFIX, PROXY_ERROR_PREFIX};

/// Maps bus error names under `prefix` to kinds of one domain.
#[derive(Debug, Clone, Copy)]
pub struct ErrorMapping {
    pub prefix: &'static str,
    pub domain: ErrorDomain,
    /// (suffix after `prefix`, kind)
    pub kinds: &'static [(&'static str, ErrorKind)],
}

impl ErrorMapping {
    fn kind_for(&self, name: &str) -> Option<ErrorKind> {
        let suffix = name.strip_prefix(self.prefix)?;
        self.kinds
            .iter()
            .find(|(s, _)| *s == suffix)
            .map(|(_, kind)| *kind)
    }

    fn name_for(&self, domain: ErrorDomain, kind: ErrorKind) -> Option<String> {
        if self.domain != domain {
            return None;
        }
        self.kinds
            .iter()
            .find(|(_, k)| *k == kind)
            .map(|(suffix, _)| format!("{}{}", self.prefix, suffix))
    }
}

/// Framework error names.
pub const TELEPATHY_ERRORS: ErrorMapping = ErrorMapping {
    prefix: ERROR_PREFIX,
    domain: ErrorDomain::Telepathy,
    kinds: &[
        ("NetworkError", ErrorKind::NetworkError),
        ("NotImplemented", ErrorKind::NotImplemented),
        ("InvalidArgument", ErrorKind::InvalidArgument),
        ("NotAvailable", ErrorKind::NotAvailable),
        ("PermissionDenied", ErrorKind::PermissionDenied),
        ("Disconnected", ErrorKind::Disconnected),
        ("InvalidHandle", ErrorKind::InvalidHandle),
        ("Channel.Banned", ErrorKind::ChannelBanned),
        ("Channel.Full", ErrorKind::ChannelFull),
        ("Channel.InviteOnly", ErrorKind::ChannelInviteOnly),
        ("Channel.Kicked", ErrorKind::ChannelKicked),
        ("NotYours", ErrorKind::NotYours),
        ("Cancelled", ErrorKind::Cancelled),
        ("AuthenticationFailed", ErrorKind::AuthenticationFailed),
        ("EncryptionNotAvailable", ErrorKind::EncryptionNotAvailable),
        ("EncryptionError", ErrorKind::EncryptionError),
        ("Cert.NotProvided", ErrorKind::CertNotProvided),
        ("Cert.Untrusted", ErrorKind::CertUntrusted),
        ("Cert.Expired", ErrorKind::CertExpired),
        ("Cert.Invalid", ErrorKind::CertInvalid),
        ("NotCapable", ErrorKind::NotCapable),
        ("Offline", ErrorKind::Offline),
        ("Busy", ErrorKind::Busy),
        ("NoAnswer", ErrorKind::NoAnswer),
        ("DoesNotExist", ErrorKind::DoesNotExist),
        ("Terminated", ErrorKind::Terminated),
        ("ConnectionRefused", ErrorKind::ConnectionRefused),
        ("ConnectionFailed", ErrorKind::ConnectionFailed),
        ("ConnectionLost", ErrorKind::ConnectionLost),
        ("AlreadyConnected", ErrorKind::AlreadyConnected),
        ("ConnectionReplaced", ErrorKind::ConnectionReplaced),
        ("RegistrationExists", ErrorKind::RegistrationExists),
        ("ServiceBusy", ErrorKind::ServiceBusy),
        ("ResourceUnavailable", ErrorKind::ResourceUnavailable),
        ("WouldBreakAnonymity", ErrorKind::WouldBreakAnonymity),
        ("NotYet", ErrorKind::NotYet),
        ("Rejected", ErrorKind::Rejected),
        ("PickedUpElsewhere", ErrorKind::PickedUpElsewhere),
        ("Confused", ErrorKind::Confused),
        ("ServiceConfused", ErrorKind::ServiceConfused),
        ("InsufficientBalance", ErrorKind::InsufficientBalance),
    ],
};

/// Proxy runtime error names.
pub const PROXY_ERRORS: ErrorMapping = ErrorMapping {
    prefix: PROXY_ERROR_PREFIX,
    domain: ErrorDomain::Proxy,
    kinds: &[
        ("UnknownRemoteError", ErrorKind::UnknownRemoteError),
        ("ProxyUnreferenced", ErrorKind::ProxyUnreferenced),
        ("NoInterface", ErrorKind::NoInterface),
        ("NameOwnerLost", ErrorKind::NameOwnerLost),
        ("InvalidBusName", ErrorKind::InvalidBusName),
        ("InvalidInterfaceName", ErrorKind::InvalidInterfaceName),
        ("InvalidObjectPath", ErrorKind::InvalidObjectPath),
        ("InvalidMemberName", ErrorKind::InvalidMemberName),
        ("ObjectRemoved", ErrorKind::ObjectRemoved),
        ("Cancelled", ErrorKind::Cancelled),
        ("Inconsistent", ErrorKind::Inconsistent),
    ],
};

/// Mappings every proxy class inherits.
pub static BUILTIN_ERRORS: [ErrorMapping; 2] = [TELEPATHY_ERRORS, PROXY_ERRORS];

/// Mappings added at runtime, keyed by proxy class name.
///
/// Static per-class mappings live on the class itself; this registry holds
/// what applications add on top (vendor error namespaces, typically).
pub struct ErrorRegistry {
    extra: RwLock<HashMap<&'static str, Vec<ErrorMapping>>>,
}

impl ErrorRegistry {
    pub fn new() -> Self {
        Self {
            extra: RwLock::new(HashMap::new()),
        }
    }

    /// Process-wide registry.
    pub fn global() -> &'static ErrorRegistry {
        static GLOBAL: OnceLock<ErrorRegistry> = OnceLock::new();
        GLOBAL.get_or_init(ErrorRegistry::new)
    }

    /// Add `mapping` for proxies of class `class_name` (and its subclasses).
    pub fn register(&self, class_name: &'static str, mapping: ErrorMapping) {
        log::debug!(
            "[ErrorRegistry::register] {} maps {}* to {}",
            class_name,
            mapping.prefix,
            mapping.domain
        );
        self.extra.write().entry(class_name).or_default().push(mapping);
    }

    /// Map a bus error using the class chain `chain` (most derived first,
    /// each entry the class name and its static mappings). The first
    /// mapping that knows the name wins; unknown names land in
    /// [`ErrorDomain::Bus`] with the name preserved.
    pub fn map<I>(&self, chain: I, name: &str, message: &str) -> ProxyError
    where
        I: IntoIterator<Item = (&'static str, &'static [ErrorMapping])>,
    {
        let extra = self.extra.read();
        for (class_name, statics) in chain {
            let registered = extra.get(class_name).map(Vec::as_slice).unwrap_or_default();
            for mapping in statics.iter().chain(registered) {
                if let Some(kind) = mapping.kind_for(name) {
                    return ProxyError::new(mapping.domain, kind, message).with_bus_name(name);
                }
            }
        }
        ProxyError::bus(name, message)
    }

    /// Map with the framework and runtime tables only.
    pub fn map_default(&self, name: &str, message: &str) -> ProxyError {
        self.map([("", &BUILTIN_ERRORS[..])], name, message)
    }

    /// Reverse mapping, used when replying to the bus with an in-process
    /// error.
    pub fn to_bus_name(&self, domain: ErrorDomain, kind: ErrorKind) -> String {
        if let Some(name) = BUILTIN_ERRORS.iter().find_map(|m| m.name_for(domain, kind)) {
            return name;
        }
        let extra = self.extra.read();
        extra
            .values()
            .flatten()
            .find_map(|m| m.name_for(domain, kind))
            .unwrap_or_else(|| format!("{}Failed", DBUS_ERROR_PREFIX))
    }
}

impl Default for ErrorRegistry {
    fn default() -> Self {
        Self::new()
    }
}
