// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Per-type identifier normalization.

use super::{HandleError, HandleResult, HandleType};

/// Contact lists every connection may expose.
pub const LIST_NAMES: [&str; 4] = ["subscribe", "publish", "stored", "deny"];

/// Normalize `id` for a repository of type `handle_type`.
///
/// - contacts: trimmed, lower-cased, `/resource` stripped
/// - rooms: trimmed, lower-cased
/// - lists: one of [`LIST_NAMES`]
/// - groups: trimmed, non-empty, case preserved
pub fn normalize(handle_type: HandleType, id: &str) -> HandleResult<String> {
    let invalid = |reason| HandleError::InvalidIdentifier {
        handle_type,
        id: id.to_owned(),
        reason,
    };

    let trimmed = id.trim();
    match handle_type {
        HandleType::Contact => {
            let bare = trimmed.split('/').next().unwrap_or_default();
            if bare.is_empty() {
                return Err(invalid("empty contact identifier"));
            }
            if bare.chars().any(char::is_whitespace) {
                return Err(invalid("contact identifiers cannot contain whitespace"));
            }
            Ok(bare.to_lowercase())
        }
        HandleType::Room => {
            if trimmed.is_empty() {
                return Err(invalid("empty room name"));
            }
            Ok(trimmed.to_lowercase())
        }
        HandleType::List => {
            let lowered = trimmed.to_lowercase();
            if LIST_NAMES.contains(&lowered.as_str()) {
                Ok(lowered)
            } else {
                Err(invalid("unknown contact list"))
            }
        }
        HandleType::Group => {
            if trimmed.is_empty() {
                return Err(invalid("empty group name"));
            }
            Ok(trimmed.to_owned())
        }
        HandleType::None => Err(HandleError::UnsupportedType(handle_type)),
    }
}
