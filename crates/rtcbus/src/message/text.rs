// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Plain-text rendering of multi-part messages.

use std::collections::HashSet;
use std::fmt;
use std::ops::{BitOr, BitOrAssign};

use super::Message;
use crate::asv::AsvExt;
use crate::logging::DebugFlags;
use crate::rtc_debug;
use crate::value::Value;

/// Flags describing what [`Message::to_text`] could not represent.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct TextMessageFlags(u32);

impl TextMessageFlags {
    pub const NONE: TextMessageFlags = TextMessageFlags(0);
    /// Some text was cut short
    pub const TRUNCATED: TextMessageFlags = TextMessageFlags(1);
    /// Some content could not be rendered as text
    pub const NON_TEXT_CONTENT: TextMessageFlags = TextMessageFlags(2);
    pub const SCROLLBACK: TextMessageFlags = TextMessageFlags(4);
    pub const RESCUED: TextMessageFlags = TextMessageFlags(8);

    pub const fn bits(self) -> u32 {
        self.0
    }

    pub const fn from_bits(bits: u32) -> Self {
        TextMessageFlags(bits & 0xF)
    }

    pub const fn contains(self, other: TextMessageFlags) -> bool {
        self.0 & other.0 == other.0
    }

    pub const fn is_empty(self) -> bool {
        self.0 == 0
    }
}

impl BitOr for TextMessageFlags {
    type Output = TextMessageFlags;

    fn bitor(self, rhs: TextMessageFlags) -> TextMessageFlags {
        TextMessageFlags(self.0 | rhs.0)
    }
}

impl BitOrAssign for TextMessageFlags {
    fn bitor_assign(&mut self, rhs: TextMessageFlags) {
        self.0 |= rhs.0;
    }
}

impl fmt::Debug for TextMessageFlags {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let names: Vec<&str> = [
            (Self::TRUNCATED, "TRUNCATED"),
            (Self::NON_TEXT_CONTENT, "NON_TEXT_CONTENT"),
            (Self::SCROLLBACK, "SCROLLBACK"),
            (Self::RESCUED, "RESCUED"),
        ]
        .iter()
        .filter(|(flag, _)| self.contains(*flag))
        .map(|(_, name)| *name)
        .collect();
        write!(f, "TextMessageFlags({})", names.join(" | "))
    }
}

impl Message {
    /// Concatenate the `text/plain` body parts.
    ///
    /// Within one `alternative` group the first `text/plain` part wins.
    /// `NON_TEXT_CONTENT` is set when a body part has no text rendering,
    /// when there is no body at all, or when the header names an extended
    /// `interface`. `TRUNCATED` is set when a consumed part carries a
    /// `truncated` key that is not `false`.
    pub fn to_text(&self) -> (String, TextMessageFlags) {
        let header = self.header();
        let mut flags = TextMessageFlags::NONE;
        let mut text = String::new();

        if header.get_bool("scrollback").unwrap_or(false) {
            flags |= TextMessageFlags::SCROLLBACK;
        }
        if header.get_bool("rescued").unwrap_or(false) {
            flags |= TextMessageFlags::RESCUED;
        }
        if self.parts.len() <= 1 || header.contains_key("interface") {
            flags |= TextMessageFlags::NON_TEXT_CONTENT;
        }

        // alternative groups already rendered, and groups still owed a text rendering
        let mut used: HashSet<&str> = HashSet::new();
        let mut needed: HashSet<&str> = HashSet::new();

        for (i, part) in self.parts.iter().enumerate().skip(1) {
            let content_type = part.get_str("content-type").or_else(|| part.get_str("type"));
            let alternative = part.get_str("alternative").filter(|a| !a.is_empty());

            if content_type == Some("text/plain") {
                if let Some(alt) = alternative {
                    if !used.insert(alt) {
                        continue;
                    }
                }
                match part.get_value("content").and_then(Value::as_string) {
                    Some(content) => {
                        text.push_str(content);
                        let truncated = part
                            .get_value("truncated")
                            .is_some_and(|v| v.as_bool() != Some(false));
                        if truncated {
                            flags |= TextMessageFlags::TRUNCATED;
                        }
                    }
                    None => {
                        rtc_debug!(
                            DebugFlags::MESSAGES,
                            "[Message::to_text] part {} is text/plain without string content",
                            i
                        );
                        flags |= TextMessageFlags::NON_TEXT_CONTENT;
                        needed.clear();
                    }
                }
            } else if !flags.contains(TextMessageFlags::NON_TEXT_CONTENT) {
                match alternative {
                    None => {
                        flags |= TextMessageFlags::NON_TEXT_CONTENT;
                        needed.clear();
                    }
                    Some(alt) if used.contains(alt) => {}
                    Some(alt) => {
                        needed.insert(alt);
                    }
                }
            }
        }

        if !flags.contains(TextMessageFlags::NON_TEXT_CONTENT) && needed.iter().any(|a| !used.contains(a)) {
            flags |= TextMessageFlags::NON_TEXT_CONTENT;
        }
        (text, flags)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::asv;
    use crate::message::MessageType;

    fn message(parts: Vec<crate::value::Asv>) -> Message {
        Message::from_parts(parts)
    }

    #[test]
    fn alternatives_pick_the_first_text_part() {
        let msg = message(vec![
            asv! {},
            asv! { "alternative" => "main", "content-type" => "text/html", "content" => "<b>hi</b>" },
            asv! { "alternative" => "main", "content-type" => "text/plain", "content" => "hi" },
            asv! { "alternative" => "main", "content-type" => "text/plain", "content" => "HI" },
        ]);
        assert_eq!(msg.to_text(), ("hi".to_owned(), TextMessageFlags::NONE));
    }

    #[test]
    fn alternative_without_text_is_non_text() {
        let msg = message(vec![
            asv! {},
            asv! { "content-type" => "text/plain", "content" => "see: " },
            asv! { "alternative" => "pic", "content-type" => "image/png", "content" => vec![1u8, 2] },
        ]);
        let (text, flags) = msg.to_text();
        assert_eq!(text, "see: ");
        assert_eq!(flags, TextMessageFlags::NON_TEXT_CONTENT);
    }

    #[test]
    fn header_flags_and_truncation() {
        let msg = message(vec![
            asv! { "scrollback" => true, "rescued" => true },
            asv! { "type" => "text/plain", "content" => "old", "truncated" => 1u32 },
        ]);
        let (text, flags) = msg.to_text();
        assert_eq!(text, "old");
        assert_eq!(
            flags,
            TextMessageFlags::SCROLLBACK | TextMessageFlags::RESCUED | TextMessageFlags::TRUNCATED
        );
    }

    #[test]
    fn extended_interface_and_empty_bodies() {
        assert!(Message::new().to_text().1.contains(TextMessageFlags::NON_TEXT_CONTENT));
        let msg = message(vec![
            asv! { "interface" => "org.example.Game" },
            asv! { "content-type" => "text/plain", "content" => "move e4" },
        ]);
        assert_eq!(msg.to_text(), ("move e4".to_owned(), TextMessageFlags::NON_TEXT_CONTENT));

        let odd = message(vec![asv! {}, asv! { "content-type" => "text/plain", "content" => 3u32 }]);
        assert_eq!(odd.to_text(), (String::new(), TextMessageFlags::NON_TEXT_CONTENT));
    }

    #[test]
    fn text_rendering_round_trips() {
        let msg = Message::new_text(MessageType::Notice, "hello");
        let (text, flags) = msg.to_text();
        let again = Message::new_text(msg.message_type(), &text);
        assert_eq!(again.to_text(), (text, flags));
    }

    #[test]
    fn flags_debug_lists_names() {
        let flags = TextMessageFlags::TRUNCATED | TextMessageFlags::RESCUED;
        assert_eq!(format!("{:?}", flags), "TextMessageFlags(TRUNCATED | RESCUED)");
        assert_eq!(TextMessageFlags::from_bits(0x13).bits(), 3);
    }
}
