// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Multi-part messages.
//!
//! ```text
//! part 0   header   message-type, message-sent, scrollback, message-token, ...
//! part 1   body     content-type, content, alternative, truncated, ...
//! part N   body
//! ```
//!
//! A [`Message`] is mutable until [`Message::freeze`]. Every mutator on a
//! frozen message is a programming error: it is logged and reported as
//! [`MessageError::Frozen`], and the message is left untouched.

mod signalled;
mod text;

pub use signalled::SignalledMessage;
pub use text::TextMessageFlags;

use std::fmt;

use crate::asv::AsvExt;
use crate::handle::Handle;
use crate::logging::DebugFlags;
use crate::value::{Asv, Value};
use crate::{programming_error, rtc_debug};

/// `message-type` header values.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum MessageType {
    #[default]
    Normal = 0,
    Action = 1,
    Notice = 2,
    AutoReply = 3,
    DeliveryReport = 4,
}

impl MessageType {
    pub fn from_u32(value: u32) -> Option<Self> {
        match value {
            0 => Some(MessageType::Normal),
            1 => Some(MessageType::Action),
            2 => Some(MessageType::Notice),
            3 => Some(MessageType::AutoReply),
            4 => Some(MessageType::DeliveryReport),
            _ => None,
        }
    }

    pub const fn as_u32(self) -> u32 {
        self as u32
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum MessageError {
    #[error("message is frozen")]
    Frozen,
    #[error("the header part cannot be deleted")]
    HeaderUndeletable,
    #[error("message has no part {0}")]
    NoSuchPart(usize),
}

/// Ordered list of parts; part 0 is the header.
#[derive(Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(from = "MessageData"))]
pub struct Message {
    parts: Vec<Asv>,
    frozen: bool,
}

/// Serialized form; decoding goes through [`Message::from_parts`] so part 0
/// always exists.
#[cfg(feature = "serde")]
#[derive(serde::Deserialize)]
struct MessageData {
    parts: Vec<Asv>,
    #[serde(default)]
    frozen: bool,
}

#[cfg(feature = "serde")]
impl From<MessageData> for Message {
    fn from(data: MessageData) -> Self {
        let mut message = Message::from_parts(data.parts);
        message.frozen = data.frozen;
        message
    }
}

impl Message {
    /// Header-only mutable message.
    pub fn new() -> Self {
        Self {
            parts: vec![Asv::new()],
            frozen: false,
        }
    }

    /// Message with one `text/plain` body part.
    pub fn new_text(message_type: MessageType, text: &str) -> Self {
        let mut header = Asv::new();
        if message_type != MessageType::Normal {
            header.insert("message-type".to_owned(), Value::U32(message_type.as_u32()));
        }
        let mut body = Asv::new();
        body.insert("content-type".to_owned(), Value::from("text/plain"));
        body.insert("content".to_owned(), Value::from(text));
        Self {
            parts: vec![header, body],
            frozen: false,
        }
    }

    /// Adopt parts received from the bus. An empty list gets a header.
    pub fn from_parts(mut parts: Vec<Asv>) -> Self {
        if parts.is_empty() {
            parts.push(Asv::new());
        }
        Self {
            parts,
            frozen: false,
        }
    }

    pub fn parts(&self) -> &[Asv] {
        &self.parts
    }

    pub fn into_parts(self) -> Vec<Asv> {
        self.parts
    }

    pub fn count_parts(&self) -> usize {
        self.parts.len()
    }

    /// Read-only view of one part.
    pub fn peek(&self, part: usize) -> Option<&Asv> {
        self.parts.get(part)
    }

    pub fn header(&self) -> &Asv {
        &self.parts[0]
    }

    pub fn is_frozen(&self) -> bool {
        self.frozen
    }

    /// Make the message immutable. Idempotent.
    pub fn freeze(&mut self) {
        if !self.frozen {
            rtc_debug!(DebugFlags::MESSAGES, "[Message::freeze] {} parts", self.parts.len());
        }
        self.frozen = true;
    }

    fn check_mutable(&self, op: &str) -> Result<(), MessageError> {
        if self.frozen {
            programming_error!("[Message::{}] message is frozen", op);
            return Err(MessageError::Frozen);
        }
        Ok(())
    }

    fn part_mut(&mut self, part: usize, op: &str) -> Result<&mut Asv, MessageError> {
        self.check_mutable(op)?;
        let count = self.parts.len();
        self.parts.get_mut(part).ok_or_else(|| {
            programming_error!("[Message::{}] part {} of {} does not exist", op, part, count);
            MessageError::NoSuchPart(part)
        })
    }

    /// Append an empty body part; returns its index.
    pub fn append_part(&mut self) -> Result<usize, MessageError> {
        self.check_mutable("append_part")?;
        self.parts.push(Asv::new());
        Ok(self.parts.len() - 1)
    }

    /// Delete body part `part`; later parts shift down.
    pub fn delete_part(&mut self, part: usize) -> Result<(), MessageError> {
        self.check_mutable("delete_part")?;
        if part == 0 {
            programming_error!("[Message::delete_part] the header cannot be deleted");
            return Err(MessageError::HeaderUndeletable);
        }
        if part >= self.parts.len() {
            return Err(MessageError::NoSuchPart(part));
        }
        self.parts.remove(part);
        Ok(())
    }

    pub fn set(&mut self, part: usize, key: &str, value: impl Into<Value>) -> Result<(), MessageError> {
        self.part_mut(part, "set")?.insert(key.to_owned(), value.into());
        Ok(())
    }

    /// Nest another message, as for delivery reports.
    pub fn set_message(&mut self, part: usize, key: &str, message: Message) -> Result<(), MessageError> {
        self.set(part, key, Value::Parts(message.parts))
    }

    /// Remove `key`; returns whether it was present.
    pub fn delete_key(&mut self, part: usize, key: &str) -> Result<bool, MessageError> {
        Ok(self.part_mut(part, "delete_key")?.remove(key).is_some())
    }

    pub fn message_type(&self) -> MessageType {
        self.header()
            .get_u32("message-type")
            .and_then(MessageType::from_u32)
            .unwrap_or_default()
    }

    /// `message-sent`, seconds since the epoch.
    pub fn sent_timestamp(&self) -> Option<i64> {
        self.header().get_i64("message-sent")
    }

    pub fn received_timestamp(&self) -> Option<i64> {
        self.header().get_i64("message-received")
    }

    pub fn token(&self) -> Option<&str> {
        self.header().get_str("message-token")
    }

    pub fn is_scrollback(&self) -> bool {
        self.header().get_bool("scrollback").unwrap_or(false)
    }

    pub fn is_rescued(&self) -> bool {
        self.header().get_bool("rescued").unwrap_or(false)
    }

    pub fn pending_message_id(&self) -> Option<u32> {
        self.header().get_u32("pending-message-id")
    }

    pub fn sender_handle(&self) -> Option<Handle> {
        self.header().get_u32("message-sender").filter(|h| *h != 0)
    }

    pub fn set_sender_handle(&mut self, handle: Handle) -> Result<(), MessageError> {
        self.set(0, "message-sender", handle)
    }
}

impl Default for Message {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for Message {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let parts: Vec<String> = self.parts.iter().map(crate::asv::dump).collect();
        f.debug_struct("Message")
            .field("frozen", &self.frozen)
            .field("parts", &parts)
            .finish()
    }
}
