// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Name validation and escaping helpers.

/// Escape an arbitrary string into something usable as a bus name element
/// or object-path component.
///
/// ASCII letters and digits are kept; everything else (and a leading digit)
/// becomes `_xx` with the lower-case hex byte. The empty string maps to `_`.
pub fn escape_as_identifier(name: &str) -> String {
    if name.is_empty() {
        return "_".to_owned();
    }
    let mut out = String::with_capacity(name.len());
    for (i, byte) in name.bytes().enumerate() {
        let keep = byte.is_ascii_alphabetic() || (i > 0 && byte.is_ascii_digit());
        if keep {
            out.push(byte as char);
        } else {
            out.push_str(&format!("_{:02x}", byte));
        }
    }
    out
}

fn is_name_element(elem: &str, allow_leading_digit: bool, allow_dash: bool) -> bool {
    let mut chars = elem.chars();
    let Some(first) = chars.next() else {
        return false;
    };
    if first.is_ascii_digit() && !allow_leading_digit {
        return false;
    }
    std::iter::once(first).chain(chars).all(|c| {
        c.is_ascii_alphanumeric() || c == '_' || (allow_dash && c == '-')
    })
}

/// Unique names look like `:1.42`.
pub fn is_unique_name(name: &str) -> bool {
    name.starts_with(':')
}

/// Well-known or unique bus name.
pub fn is_valid_bus_name(name: &str) -> bool {
    if name.is_empty() || name.len() > 255 {
        return false;
    }
    let (body, unique) = match name.strip_prefix(':') {
        Some(rest) => (rest, true),
        None => (name, false),
    };
    let elements: Vec<&str> = body.split('.').collect();
    elements.len() >= 2 && elements.iter().all(|e| is_name_element(e, unique, true))
}

pub fn is_valid_interface_name(name: &str) -> bool {
    if name.is_empty() || name.len() > 255 {
        return false;
    }
    let elements: Vec<&str> = name.split('.').collect();
    elements.len() >= 2 && elements.iter().all(|e| is_name_element(e, false, false))
}

pub fn is_valid_member_name(name: &str) -> bool {
    name.len() <= 255 && is_name_element(name, false, false)
}

pub fn is_valid_object_path(path: &str) -> bool {
    if path == "/" {
        return true;
    }
    let Some(rest) = path.strip_prefix('/') else {
        return false;
    };
    !rest.is_empty()
        && rest
            .split('/')
            .all(|e| !e.is_empty() && e.chars().all(|c| c.is_ascii_alphanumeric() || c == '_'))
}

/// Bus name a service exporting `path` is expected to own: the path with
/// `/` turned into `.` (`/a/b/c` becomes `a.b.c`).
pub fn bus_name_from_object_path(path: &str) -> Option<String> {
    let rest = path.strip_prefix('/')?;
    if rest.is_empty() {
        return None;
    }
    Some(rest.replace('/', "."))
}

/// Case-sensitive membership test on a string list.
pub fn strv_contains<S: AsRef<str>>(strv: &[S], needle: &str) -> bool {
    strv.iter().any(|s| s.as_ref() == needle)
}
