// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Variant values carried in bus messages.
//!
//! Mirrors the subset of the bus type system the proxies need. Integer
//! accessors coerce between widths when the value fits, so a `u32` property
//! sent as `i64` by a sloppy service still reads back.

use std::collections::HashMap;
use std::fmt;

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

/// String to variant map (`a{sv}` on the bus).
pub type Asv = HashMap<String, Value>;

/// One bus value.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub enum Value {
    Bool(bool),
    Byte(u8),
    I32(i32),
    U32(u32),
    I64(i64),
    U64(u64),
    F64(f64),
    Str(String),
    ObjectPath(String),
    Bytes(Vec<u8>),
    Strv(Vec<String>),
    Array(Vec<Value>),
    Struct(Vec<Value>),
    Dict(Asv),
    /// Multipart message (`aa{sv}`)
    Parts(Vec<Asv>),
}

impl Value {
    /// Bus signature-ish name, used in debug output and error messages.
    pub fn type_name(&self) -> &'static str {
        match self {
            Value::Bool(_) => "b",
            Value::Byte(_) => "y",
            Value::I32(_) => "i",
            Value::U32(_) => "u",
            Value::I64(_) => "x",
            Value::U64(_) => "t",
            Value::F64(_) => "d",
            Value::Str(_) => "s",
            Value::ObjectPath(_) => "o",
            Value::Bytes(_) => "ay",
            Value::Strv(_) => "as",
            Value::Array(_) => "av",
            Value::Struct(_) => "(v)",
            Value::Dict(_) => "a{sv}",
            Value::Parts(_) => "aa{sv}",
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Value::Bool(b) => Some(*b),
            _ => None,
        }
    }

    /// String content. Object paths are strings too.
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::Str(s) | Value::ObjectPath(s) => Some(s),
            _ => None,
        }
    }

    /// Strict string: object paths are rejected.
    pub fn as_string(&self) -> Option<&str> {
        match self {
            Value::Str(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_object_path(&self) -> Option<&str> {
        match self {
            Value::ObjectPath(s) => Some(s),
            _ => None,
        }
    }

    fn as_wide(&self) -> Option<i128> {
        match self {
            Value::Byte(v) => Some(i128::from(*v)),
            Value::I32(v) => Some(i128::from(*v)),
            Value::U32(v) => Some(i128::from(*v)),
            Value::I64(v) => Some(i128::from(*v)),
            Value::U64(v) => Some(i128::from(*v)),
            _ => None,
        }
    }

    pub fn as_u32(&self) -> Option<u32> {
        self.as_wide().and_then(|v| u32::try_from(v).ok())
    }

    pub fn as_i32(&self) -> Option<i32> {
        self.as_wide().and_then(|v| i32::try_from(v).ok())
    }

    pub fn as_u64(&self) -> Option<u64> {
        self.as_wide().and_then(|v| u64::try_from(v).ok())
    }

    pub fn as_i64(&self) -> Option<i64> {
        self.as_wide().and_then(|v| i64::try_from(v).ok())
    }

    /// Floating point; integers are widened.
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Value::F64(v) => Some(*v),
            Value::I32(v) => Some(f64::from(*v)),
            Value::U32(v) => Some(f64::from(*v)),
            Value::Byte(v) => Some(f64::from(*v)),
            _ => None,
        }
    }

    pub fn as_bytes(&self) -> Option<&[u8]> {
        match self {
            Value::Bytes(b) => Some(b),
            _ => None,
        }
    }

    pub fn as_strv(&self) -> Option<&[String]> {
        match self {
            Value::Strv(v) => Some(v),
            _ => None,
        }
    }

    pub fn as_array(&self) -> Option<&[Value]> {
        match self {
            Value::Array(v) | Value::Struct(v) => Some(v),
            _ => None,
        }
    }

    pub fn as_dict(&self) -> Option<&Asv> {
        match self {
            Value::Dict(d) => Some(d),
            _ => None,
        }
    }

    pub fn as_parts(&self) -> Option<&[Asv]> {
        match self {
            Value::Parts(p) => Some(p),
            _ => None,
        }
    }

    /// `au` encoded either as an array of integers or as a struct.
    pub fn to_u32_vec(&self) -> Option<Vec<u32>> {
        self.as_array()?.iter().map(Value::as_u32).collect()
    }

    /// `ao` / `as` encoded either as `Strv` or as an array of strings.
    pub fn to_string_vec(&self) -> Option<Vec<String>> {
        match self {
            Value::Strv(v) => Some(v.clone()),
            Value::Array(items) => items.iter().map(|v| v.as_str().map(str::to_owned)).collect(),
            _ => None,
        }
    }

    /// Equality where integers compare by numeric value regardless of width.
    ///
    /// Channel filters are written with whatever integer type the author had
    /// at hand; the dispatcher compares them loosely.
    pub fn loose_eq(&self, other: &Value) -> bool {
        match (self.as_wide(), other.as_wide()) {
            (Some(a), Some(b)) => a == b,
            _ => match (self, other) {
                (Value::Str(a), Value::Str(b)) => a == b,
                (Value::ObjectPath(a), Value::ObjectPath(b)) => a == b,
                _ => self == other,
            },
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Bool(v) => write!(f, "{}", v),
            Value::Byte(v) => write!(f, "{}", v),
            Value::I32(v) => write!(f, "{}", v),
            Value::U32(v) => write!(f, "{}", v),
            Value::I64(v) => write!(f, "{}", v),
            Value::U64(v) => write!(f, "{}", v),
            Value::F64(v) => write!(f, "{}", v),
            Value::Str(v) => write!(f, "'{}'", v),
            Value::ObjectPath(v) => write!(f, "{}", v),
            Value::Bytes(v) => write!(f, "<{} bytes>", v.len()),
            Value::Strv(v) => write!(f, "{:?}", v),
            Value::Array(v) | Value::Struct(v) => {
                write!(f, "[")?;
                for (i, item) in v.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{}", item)?;
                }
                write!(f, "]")
            }
            Value::Dict(d) => write!(f, "{{{} entries}}", d.len()),
            Value::Parts(p) => write!(f, "<{} parts>", p.len()),
        }
    }
}

macro_rules! impl_from {
    ($($ty:ty => $variant:ident),* $(,)?) => {
        $(
            impl From<$ty> for Value {
                fn from(v: $ty) -> Self {
                    Value::$variant(v)
                }
            }
        )*
    };
}

impl_from! {
    bool => Bool,
    u8 => Byte,
    i32 => I32,
    u32 => U32,
    i64 => I64,
    u64 => U64,
    f64 => F64,
    String => Str,
    Vec<u8> => Bytes,
    Vec<String> => Strv,
    Asv => Dict,
    Vec<Asv> => Parts,
}

impl From<&str> for Value {
    fn from(v: &str) -> Self {
        Value::Str(v.to_owned())
    }
}

impl From<&[u8]> for Value {
    fn from(v: &[u8]) -> Self {
        Value::Bytes(v.to_vec())
    }
}

impl From<&[&str]> for Value {
    fn from(v: &[&str]) -> Self {
        Value::Strv(v.iter().map(|s| (*s).to_owned()).collect())
    }
}

impl From<Vec<u32>> for Value {
    fn from(v: Vec<u32>) -> Self {
        Value::Array(v.into_iter().map(Value::U32).collect())
    }
}
