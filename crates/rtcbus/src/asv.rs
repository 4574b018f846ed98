// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Typed getters over `a{sv}` maps.
//!
//! ```
//! use rtcbus::asv;
//! use rtcbus::asv::AsvExt;
//!
//! let props = asv! {
//!     "Requested" => true,
//!     "TargetHandle" => 5u32,
//! };
//! assert_eq!(props.get_bool("Requested"), Some(true));
//! assert_eq!(props.get_u64("TargetHandle"), Some(5));
//! ```

use crate::value::{Asv, Value};

/// Build an [`Asv`] from `key => value` pairs (values go through `Value::from`).
#[macro_export]
macro_rules! asv {
    () => { $crate::value::Asv::new() };
    ($($key:expr => $value:expr),+ $(,)?) => {{
        let mut map = $crate::value::Asv::new();
        $(
            map.insert(::std::string::String::from($key), $crate::value::Value::from($value));
        )+
        map
    }};
}

/// Typed lookups. Every getter returns `None` when the key is missing or the
/// value has an incompatible type.
pub trait AsvExt {
    fn get_value(&self, key: &str) -> Option<&Value>;

    fn get_bool(&self, key: &str) -> Option<bool> {
        self.get_value(key).and_then(Value::as_bool)
    }

    fn get_str(&self, key: &str) -> Option<&str> {
        self.get_value(key).and_then(Value::as_string)
    }

    fn get_object_path(&self, key: &str) -> Option<&str> {
        self.get_value(key).and_then(Value::as_object_path)
    }

    fn get_u32(&self, key: &str) -> Option<u32> {
        self.get_value(key).and_then(Value::as_u32)
    }

    fn get_i32(&self, key: &str) -> Option<i32> {
        self.get_value(key).and_then(Value::as_i32)
    }

    fn get_u64(&self, key: &str) -> Option<u64> {
        self.get_value(key).and_then(Value::as_u64)
    }

    fn get_i64(&self, key: &str) -> Option<i64> {
        self.get_value(key).and_then(Value::as_i64)
    }

    fn get_f64(&self, key: &str) -> Option<f64> {
        self.get_value(key).and_then(Value::as_f64)
    }

    fn get_bytes(&self, key: &str) -> Option<&[u8]> {
        self.get_value(key).and_then(Value::as_bytes)
    }

    fn get_strv(&self, key: &str) -> Option<Vec<String>> {
        self.get_value(key).and_then(Value::to_string_vec)
    }

    fn get_asv(&self, key: &str) -> Option<&Asv> {
        self.get_value(key).and_then(Value::as_dict)
    }
}

impl AsvExt for Asv {
    fn get_value(&self, key: &str) -> Option<&Value> {
        self.get(key)
    }
}

/// Keys sorted, one `key=value` per entry. Deterministic for logs and tests.
pub fn dump(map: &Asv) -> String {
    let mut keys: Vec<&String> = map.keys().collect();
    keys.sort();
    let entries: Vec<String> = keys.into_iter().map(|k| format!("{}={}", k, map[k])).collect();
    format!("{{{}}}", entries.join(", "))
}

/// True if `map` contains every key of `subset` with a loosely equal value.
pub fn contains_all(map: &Asv, subset: &Asv) -> bool {
    subset
        .iter()
        .all(|(key, want)| map.get(key).is_some_and(|have| have.loose_eq(want)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::asv;

    #[test]
    fn typed_getters_reject_wrong_types() {
        let map = asv! {
            "s" => "text",
            "n" => 3i32,
            "path" => Value::ObjectPath("/x".into()),
        };
        assert_eq!(map.get_str("s"), Some("text"));
        assert_eq!(map.get_str("path"), None);
        assert_eq!(map.get_object_path("path"), Some("/x"));
        assert_eq!(map.get_u32("n"), Some(3));
        assert_eq!(map.get_bool("n"), None);
        assert_eq!(map.get_u32("missing"), None);
    }

    #[test]
    fn dump_is_sorted() {
        let map = asv! { "b" => 2u32, "a" => 1u32 };
        assert_eq!(dump(&map), "{a=1, b=2}");
    }

    #[test]
    fn subset_matching() {
        let map = asv! { "type" => "text", "handle" => 1u32, "extra" => true };
        assert!(contains_all(&map, &asv! { "handle" => 1i64 }));
        assert!(!contains_all(&map, &asv! { "handle" => 2u32 }));
        assert!(!contains_all(&map, &asv! { "absent" => true }));
        assert!(contains_all(&map, &Asv::new()));
    }
}
