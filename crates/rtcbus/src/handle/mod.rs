// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Handles: connection-scoped integer aliases for normalized identifiers.
//!
//! # Architecture
//!
//! ```text
//! REPOSITORIES (process-wide DashMap)
//! +-- (connection path, HandleType) -> Weak<HandleRepository>
//!
//! HandleRepository (one per connection and type, held by the Connection)
//! +-- by_handle: Handle -> { identifier, refcount }
//! +-- by_id:     identifier -> Handle
//!
//! HandleSet
//! +-- Arc<HandleRepository> + IntSet of held handles (one ref each)
//! ```
//!
//! A handle is only meaningful inside its repository; handles from two
//! repositories are never compared.

mod normalize;
mod repository;
mod set;

pub use normalize::normalize;
pub use repository::HandleRepository;
pub use set::HandleSet;

use std::fmt;

/// Integer alias for a normalized identifier. `0` is never a valid handle.
pub type Handle = u32;

/// Kind of entity a handle names.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum HandleType {
    None = 0,
    Contact = 1,
    Room = 2,
    List = 3,
    Group = 4,
}

impl HandleType {
    /// Every type a connection keeps a repository for.
    pub const ALL: [HandleType; 4] = [
        HandleType::Contact,
        HandleType::Room,
        HandleType::List,
        HandleType::Group,
    ];

    pub fn from_u32(value: u32) -> Option<Self> {
        match value {
            0 => Some(HandleType::None),
            1 => Some(HandleType::Contact),
            2 => Some(HandleType::Room),
            3 => Some(HandleType::List),
            4 => Some(HandleType::Group),
            _ => None,
        }
    }

    pub const fn as_u32(self) -> u32 {
        self as u32
    }
}

impl fmt::Display for HandleType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            HandleType::None => "none",
            HandleType::Contact => "contact",
            HandleType::Room => "room",
            HandleType::List => "list",
            HandleType::Group => "group",
        };
        f.write_str(name)
    }
}

/// Handle repository errors.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum HandleError {
    #[error("invalid {handle_type} handle {handle}")]
    InvalidHandle { handle_type: HandleType, handle: Handle },

    #[error("invalid {handle_type} identifier '{id}': {reason}")]
    InvalidIdentifier {
        handle_type: HandleType,
        id: String,
        reason: &'static str,
    },

    #[error("{handle_type} handle {handle} already names '{existing}', not '{id}'")]
    Inconsistent {
        handle_type: HandleType,
        handle: Handle,
        existing: String,
        id: String,
    },

    #[error("handles of type {0} are not supported")]
    UnsupportedType(HandleType),
}

pub type HandleResult<T> = Result<T, HandleError>;
