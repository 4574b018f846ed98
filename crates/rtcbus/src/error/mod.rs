// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! In-process error model for proxies.
//!
//! Every failure a proxy reports is a [`ProxyError`]: a domain, a kind and a
//! message, plus the bus error name when the error came off the bus. Bus
//! errors are mapped once, at reply time, by the [`ErrorRegistry`].
//!
//! | Domain | Bus prefix | Kinds |
//! |--------|------------|-------|
//! | [`ErrorDomain::Telepathy`] | `org.freedesktop.Telepathy.Error.` | framework errors |
//! | [`ErrorDomain::Proxy`] | `org.freedesktop.Telepathy.DBus.Error.` | runtime errors (`ObjectRemoved`, `NameOwnerLost`, ...) |
//! | [`ErrorDomain::Bus`] | anything else | [`ErrorKind::UnknownRemoteError`], name preserved |

mod registry;

pub use registry::{ErrorMapping, ErrorRegistry, BUILTIN_ERRORS, PROXY_ERRORS, TELEPATHY_ERRORS};

use std::fmt;

/// Error domain, also usable as a numeric tag.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum ErrorDomain {
    /// Framework errors (`org.freedesktop.Telepathy.Error.*`)
    Telepathy = 1,
    /// Proxy runtime errors (`org.freedesktop.Telepathy.DBus.Error.*`)
    Proxy = 2,
    /// Errors no registered prefix matched
    Bus = 3,
}

impl fmt::Display for ErrorDomain {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ErrorDomain::Telepathy => "telepathy",
            ErrorDomain::Proxy => "proxy",
            ErrorDomain::Bus => "bus",
        };
        f.write_str(name)
    }
}

/// Error kinds across all domains.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum ErrorKind {
    // Framework
    NetworkError,
    NotImplemented,
    InvalidArgument,
    NotAvailable,
    PermissionDenied,
    Disconnected,
    InvalidHandle,
    ChannelBanned,
    ChannelFull,
    ChannelInviteOnly,
    ChannelKicked,
    NotYours,
    Cancelled,
    AuthenticationFailed,
    EncryptionNotAvailable,
    EncryptionError,
    CertNotProvided,
    CertUntrusted,
    CertExpired,
    CertInvalid,
    NotCapable,
    Offline,
    Busy,
    NoAnswer,
    DoesNotExist,
    Terminated,
    ConnectionRefused,
    ConnectionFailed,
    ConnectionLost,
    AlreadyConnected,
    ConnectionReplaced,
    RegistrationExists,
    ServiceBusy,
    ResourceUnavailable,
    WouldBreakAnonymity,
    NotYet,
    Rejected,
    PickedUpElsewhere,
    Confused,
    ServiceConfused,
    InsufficientBalance,
    // Proxy runtime
    UnknownRemoteError,
    ProxyUnreferenced,
    NoInterface,
    NameOwnerLost,
    InvalidBusName,
    InvalidInterfaceName,
    InvalidObjectPath,
    InvalidMemberName,
    ObjectRemoved,
    Inconsistent,
}

/// The error every proxy operation reports.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{message} ({domain}: {kind:?})")]
pub struct ProxyError {
    pub domain: ErrorDomain,
    pub kind: ErrorKind,
    pub message: String,
    /// Bus error name this error was mapped from, if any
    pub bus_error_name: Option<String>,
}

impl ProxyError {
    pub fn new(domain: ErrorDomain, kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            domain,
            kind,
            message: message.into(),
            bus_error_name: None,
        }
    }

    /// Framework-domain error.
    pub fn telepathy(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self::new(ErrorDomain::Telepathy, kind, message)
    }

    /// Proxy-runtime-domain error.
    pub fn proxy(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self::new(ErrorDomain::Proxy, kind, message)
    }

    /// Unmatched bus error; `name` is preserved.
    pub fn bus(name: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            domain: ErrorDomain::Bus,
            kind: ErrorKind::UnknownRemoteError,
            message: message.into(),
            bus_error_name: Some(name.into()),
        }
    }

    /// The remote object's lifecycle ended. Not a failure.
    pub fn object_removed(message: impl Into<String>) -> Self {
        Self::proxy(ErrorKind::ObjectRemoved, message)
    }

    pub fn name_owner_lost(message: impl Into<String>) -> Self {
        Self::proxy(ErrorKind::NameOwnerLost, message)
    }

    pub fn no_interface(interface: &str) -> Self {
        Self::proxy(
            ErrorKind::NoInterface,
            format!("Object does not have interface {}", interface),
        )
    }

    pub fn cancelled(message: impl Into<String>) -> Self {
        Self::proxy(ErrorKind::Cancelled, message)
    }

    pub fn with_bus_name(mut self, name: impl Into<String>) -> Self {
        self.bus_error_name = Some(name.into());
        self
    }

    pub fn matches(&self, domain: ErrorDomain, kind: ErrorKind) -> bool {
        self.domain == domain && self.kind == kind
    }

    /// True for the "object went away normally" invalidation.
    pub fn is_object_removed(&self) -> bool {
        self.matches(ErrorDomain::Proxy, ErrorKind::ObjectRemoved)
    }

    /// Bus name to send when reporting this error over the bus.
    pub fn bus_name(&self) -> String {
        if let Some(name) = &self.bus_error_name {
            return name.clone();
        }
        ErrorRegistry::global().to_bus_name(self.domain, self.kind)
    }
}

impl From<crate::handle::HandleError> for ProxyError {
    fn from(e: crate::handle::HandleError) -> Self {
        use crate::handle::HandleError;
        let kind = match e {
            HandleError::InvalidHandle { .. } => ErrorKind::InvalidHandle,
            HandleError::UnsupportedType(_) => ErrorKind::NotImplemented,
            HandleError::InvalidIdentifier { .. } | HandleError::Inconsistent { .. } => ErrorKind::InvalidArgument,
        };
        ProxyError::telepathy(kind, e.to_string())
    }
}

/// Result type for proxy operations.
pub type Result<T> = std::result::Result<T, ProxyError>;
