// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

use std::ops::Deref;

use super::Message;
use crate::contact::Contact;
use crate::value::Asv;

/// A received message: frozen, with the sender resolved to a [`Contact`]
/// when the header named one.
#[derive(Debug, Clone)]
pub struct SignalledMessage {
    message: Message,
    sender: Option<Contact>,
}

impl SignalledMessage {
    pub fn new(parts: Vec<Asv>, sender: Option<Contact>) -> Self {
        let mut message = Message::from_parts(parts);
        message.freeze();
        Self { message, sender }
    }

    pub fn sender(&self) -> Option<&Contact> {
        self.sender.as_ref()
    }

    pub fn message(&self) -> &Message {
        &self.message
    }
}

impl Deref for SignalledMessage {
    type Target = Message;

    fn deref(&self) -> &Message {
        &self.message
    }
}
