// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Runtime-switchable debug categories on top of the `log` facade.
//!
//! The library never installs a logger; the embedding application picks one
//! (`env_logger`, `tracing-log`, ...) and decides which categories are noisy:
//!
//! ```
//! use rtcbus::logging::{set_debug_flags_from_str, debug_flags, DebugFlags};
//!
//! set_debug_flags_from_str("proxy,client");
//! assert!(debug_flags().contains(DebugFlags::PROXY));
//! # rtcbus::logging::set_debug_flags(DebugFlags::NONE);
//! ```
//!
//! Category lines go through [`rtc_debug!`](crate::rtc_debug) and are emitted
//! with `target: "rtcbus::<category>"`. Programming errors are always logged
//! through [`programming_error!`](crate::programming_error) at `warn` level.

use crate::config::RuntimeConfig;

/// Bit mask of debug categories.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct DebugFlags(u32);

impl DebugFlags {
    /// No category enabled
    pub const NONE: DebugFlags = DebugFlags(0);
    /// Proxy construction, interfaces and invalidation
    pub const PROXY: DebugFlags = DebugFlags(1 << 0);
    /// Pending method calls
    pub const PENDING_CALLS: DebugFlags = DebugFlags(1 << 1);
    /// Signal connections
    pub const SIGNALS: DebugFlags = DebugFlags(1 << 2);
    /// Feature preparation
    pub const FEATURES: DebugFlags = DebugFlags(1 << 3);
    /// Handle repositories and handle sets
    pub const HANDLES: DebugFlags = DebugFlags(1 << 4);
    /// Message parsing and rendering
    pub const MESSAGES: DebugFlags = DebugFlags(1 << 5);
    /// Client registration
    pub const CLIENT: DebugFlags = DebugFlags(1 << 6);
    /// Dispatch contexts, requests and dispatch operations
    pub const DISPATCH: DebugFlags = DebugFlags(1 << 7);
    /// In-memory bus routing
    pub const BUS: DebugFlags = DebugFlags(1 << 8);
    /// Every category
    pub const ALL: DebugFlags = DebugFlags(0x1FF);

    const NAMES: [(&'static str, DebugFlags); 9] = [
        ("proxy", DebugFlags::PROXY),
        ("pending-calls", DebugFlags::PENDING_CALLS),
        ("signals", DebugFlags::SIGNALS),
        ("features", DebugFlags::FEATURES),
        ("handles", DebugFlags::HANDLES),
        ("messages", DebugFlags::MESSAGES),
        ("client", DebugFlags::CLIENT),
        ("dispatch", DebugFlags::DISPATCH),
        ("bus", DebugFlags::BUS),
    ];

    /// Raw bits.
    pub const fn bits(self) -> u32 {
        self.0
    }

    /// True if every bit of `other` is set in `self`.
    pub const fn contains(self, other: DebugFlags) -> bool {
        self.0 & other.0 == other.0
    }

    /// True if no bit is set.
    pub const fn is_empty(self) -> bool {
        self.0 == 0
    }

    /// Parse a comma, colon or space separated list of category names.
    ///
    /// `"all"` enables everything; unknown names are ignored.
    pub fn parse(spec: &str) -> DebugFlags {
        let mut flags = DebugFlags::NONE;
        for word in spec
            .split([',', ':', ' ', ';'])
            .map(str::trim)
            .filter(|w| !w.is_empty())
        {
            if word.eq_ignore_ascii_case("all") {
                return DebugFlags::ALL;
            }
            match Self::NAMES.iter().find(|(name, _)| word.eq_ignore_ascii_case(name)) {
                Some((_, flag)) => flags = flags | *flag,
                None => log::debug!("[DebugFlags::parse] ignoring unknown category '{}'", word),
            }
        }
        flags
    }

    /// Log target used for this category (first set bit wins).
    pub fn target(self) -> &'static str {
        match Self::NAMES.iter().find(|(_, flag)| self.contains(*flag)) {
            Some(("proxy", _)) => "rtcbus::proxy",
            Some(("pending-calls", _)) => "rtcbus::pending-calls",
            Some(("signals", _)) => "rtcbus::signals",
            Some(("features", _)) => "rtcbus::features",
            Some(("handles", _)) => "rtcbus::handles",
            Some(("messages", _)) => "rtcbus::messages",
            Some(("client", _)) => "rtcbus::client",
            Some(("dispatch", _)) => "rtcbus::dispatch",
            Some(("bus", _)) => "rtcbus::bus",
            _ => "rtcbus",
        }
    }
}

impl std::ops::BitOr for DebugFlags {
    type Output = DebugFlags;

    fn bitor(self, rhs: DebugFlags) -> DebugFlags {
        DebugFlags(self.0 | rhs.0)
    }
}

impl std::ops::BitAnd for DebugFlags {
    type Output = DebugFlags;

    fn bitand(self, rhs: DebugFlags) -> DebugFlags {
        DebugFlags(self.0 & rhs.0)
    }
}

/// Enable exactly `flags`.
pub fn set_debug_flags(flags: DebugFlags) {
    RuntimeConfig::global().update(|s| s.debug_flags = flags);
}

/// Enable the categories named in `spec` (see [`DebugFlags::parse`]).
pub fn set_debug_flags_from_str(spec: &str) {
    set_debug_flags(DebugFlags::parse(spec));
}

/// Currently enabled categories.
pub fn debug_flags() -> DebugFlags {
    RuntimeConfig::global().settings().debug_flags
}

/// True if `category` is enabled.
#[inline]
pub fn enabled(category: DebugFlags) -> bool {
    debug_flags().contains(category)
}

/// Category debug line.
///
/// ```ignore
/// rtc_debug!(DebugFlags::PROXY, "[Proxy::invalidate] {}: {}", path, error);
/// ```
#[macro_export]
macro_rules! rtc_debug {
    ($category:expr, $($arg:tt)*) => {
        if $crate::logging::enabled($category) {
            $crate::__log::debug!(target: $category.target(), $($arg)*);
        }
    };
}

/// Programming error: logged, never fatal.
#[macro_export]
macro_rules! programming_error {
    ($($arg:tt)*) => {
        $crate::__log::warn!(target: "rtcbus::programming-error", $($arg)*);
    };
}
