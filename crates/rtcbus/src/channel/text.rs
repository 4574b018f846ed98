// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Text capability (`Channel.Type.Text` with `Channel.Interface.Messages`).
//!
//! ```text
//! MessageReceived(aa{sv}) --> resolve sender --> SignalledMessage (frozen)
//!                                                 |-- pending list (by pending-message-id)
//!                                                 +-- message_received listeners
//! PendingMessagesRemoved(au) --> drop from pending list --> pending_removed listeners
//! ```

use std::ops::Deref;
use std::sync::Arc;

use parking_lot::Mutex;

use super::{handles_arg, Channel};
use crate::asv::AsvExt;
use crate::config::{IFACE_CHANNEL_INTERFACE_MESSAGES, IFACE_CHANNEL_TYPE_TEXT};
use crate::connection::Connection;
use crate::error::{ErrorKind, ProxyError, Result};
use crate::event::{ListenerId, Signal};
use crate::logging::DebugFlags;
use crate::message::{Message, SignalledMessage};
use crate::proxy::{FeatureCompleter, FeatureId, Proxy};
use crate::rtc_debug;
use crate::value::{Asv, Value};

struct TextInner {
    pending: Mutex<Vec<SignalledMessage>>,
    message_received: Signal<SignalledMessage>,
    pending_removed: Signal<Vec<u32>>,
}

impl TextInner {
    /// Queue `message` unless its pending id is already known.
    fn push_pending(&self, message: &SignalledMessage) -> bool {
        let mut pending = self.pending.lock();
        if let Some(id) = message.pending_message_id() {
            if pending.iter().any(|m| m.pending_message_id() == Some(id)) {
                return false;
            }
        }
        pending.push(message.clone());
        true
    }
}

/// Resolve the sender named by the header: `message-sender`, with
/// `message-sender-id` when the connection does not know the handle yet.
fn signalled_message(connection: &Connection, parts: Vec<Asv>) -> SignalledMessage {
    let header = parts.first().cloned().unwrap_or_default();
    let sender = header.get_u32("message-sender").filter(|h| *h != 0).and_then(|handle| {
        let resolved = match header.get_str("message-sender-id") {
            Some(id) => connection.ensure_contact(handle, id),
            None => connection.contact_for_handle(handle),
        };
        match resolved {
            Ok(contact) => Some(contact),
            Err(e) => {
                rtc_debug!(
                    DebugFlags::MESSAGES,
                    "[TextChannel::resolve_sender] handle {}: {}",
                    handle,
                    e
                );
                None
            }
        }
    });
    SignalledMessage::new(parts, sender)
}

/// Interface-added hook for the Messages interface.
pub(super) fn attach(proxy: &Arc<Proxy>) -> Result<()> {
    proxy.set_extension(Arc::new(TextInner {
        pending: Mutex::new(Vec::new()),
        message_received: Signal::new(),
        pending_removed: Signal::new(),
    }));
    proxy.connect_signal(IFACE_CHANNEL_INTERFACE_MESSAGES, "MessageReceived", |proxy, args| {
        let (Some(text), Some(channel)) = (proxy.extension::<TextInner>(), Channel::from_proxy(proxy)) else {
            return;
        };
        let Some(parts) = args.first().and_then(Value::as_parts) else {
            rtc_debug!(
                DebugFlags::MESSAGES,
                "[TextChannel::message_received] {}: malformed message",
                proxy.object_path()
            );
            return;
        };
        let message = signalled_message(channel.connection(), parts.to_vec());
        if text.push_pending(&message) {
            text.message_received.emit(&message);
        }
    })?;
    proxy.connect_signal(
        IFACE_CHANNEL_INTERFACE_MESSAGES,
        "PendingMessagesRemoved",
        |proxy, args| {
            let Some(text) = proxy.extension::<TextInner>() else {
                return;
            };
            let ids = handles_arg(args, 0);
            text.pending
                .lock()
                .retain(|m| m.pending_message_id().map_or(true, |id| !ids.contains(&id)));
            text.pending_removed.emit(&ids);
        },
    )?;
    Ok(())
}

/// Fetch the messages that were already pending when the feature was asked for.
pub(super) fn prepare_incoming(proxy: &Arc<Proxy>, done: FeatureCompleter) {
    if proxy.extension::<TextInner>().is_none() {
        done.fail(&ProxyError::no_interface(IFACE_CHANNEL_INTERFACE_MESSAGES));
        return;
    }
    let requested = proxy.get_property(
        IFACE_CHANNEL_INTERFACE_MESSAGES,
        "PendingMessages",
        move |proxy, result| {
            let (Some(text), Some(channel)) = (proxy.extension::<TextInner>(), Channel::from_proxy(proxy)) else {
                done.fail(&ProxyError::proxy(ErrorKind::Inconsistent, "not a text channel"));
                return;
            };
            let value = match result {
                Ok(value) => value,
                Err(e) => {
                    done.fail(&e);
                    return;
                }
            };
            let messages: Vec<Vec<Asv>> = match &value {
                Value::Array(items) => items.iter().filter_map(|m| m.as_parts().map(<[Asv]>::to_vec)).collect(),
                Value::Parts(single) => vec![single.clone()],
                _ => Vec::new(),
            };
            rtc_debug!(
                DebugFlags::MESSAGES,
                "[TextChannel::prepare_incoming] {}: {} pending",
                proxy.object_path(),
                messages.len()
            );
            let fetched: Vec<SignalledMessage> = messages
                .into_iter()
                .map(|parts| signalled_message(channel.connection(), parts))
                .collect();
            {
                // older messages first, then whatever arrived meanwhile
                let mut pending = text.pending.lock();
                let arrived = std::mem::take(&mut *pending);
                *pending = fetched;
                for message in arrived {
                    let id = message.pending_message_id();
                    if id.is_none() || !pending.iter().any(|m| m.pending_message_id() == id) {
                        pending.push(message);
                    }
                }
            }
            done.succeed();
        },
    );
    if let Err(e) = requested {
        rtc_debug!(DebugFlags::MESSAGES, "[TextChannel::prepare_incoming] {}", e);
    }
}

/// View of a [`Channel`] that carries the text capability.
#[derive(Clone, Debug)]
pub struct TextChannel {
    channel: Channel,
    inner: Arc<TextInner>,
}

impl TextChannel {
    pub const FEATURE_INCOMING_MESSAGES: FeatureId = Channel::FEATURE_INCOMING_MESSAGES;

    /// Fails with `NoInterface` unless `channel` implements Messages.
    pub fn new(channel: Channel) -> Result<TextChannel> {
        if let Some(error) = channel.proxy().invalidated() {
            return Err(error);
        }
        let inner = channel
            .proxy()
            .extension::<TextInner>()
            .ok_or_else(|| ProxyError::no_interface(IFACE_CHANNEL_INTERFACE_MESSAGES))?;
        Ok(TextChannel { channel, inner })
    }

    pub fn channel(&self) -> &Channel {
        &self.channel
    }

    /// Received and not yet acknowledged, oldest first.
    pub fn pending_messages(&self) -> Vec<SignalledMessage> {
        self.inner.pending.lock().clone()
    }

    pub fn connect_message_received<F>(&self, listener: F) -> ListenerId
    where
        F: Fn(&SignalledMessage) + Send + Sync + 'static,
    {
        self.inner.message_received.connect(listener)
    }

    /// Pending ids the remote side dropped (acknowledged by anyone).
    pub fn connect_pending_message_removed<F>(&self, listener: F) -> ListenerId
    where
        F: Fn(&Vec<u32>) + Send + Sync + 'static,
    {
        self.inner.pending_removed.connect(listener)
    }

    /// Send `message`; the callback gets the message token.
    pub fn send_message<F>(&self, message: &Message, flags: u32, callback: F) -> Result<()>
    where
        F: FnOnce(Result<String>) + Send + 'static,
    {
        if message.count_parts() < 2 {
            return Err(ProxyError::telepathy(
                ErrorKind::InvalidArgument,
                "A message needs at least one content part",
            ));
        }
        let args = vec![Value::Parts(message.parts().to_vec()), Value::U32(flags)];
        self.channel
            .proxy()
            .call(IFACE_CHANNEL_INTERFACE_MESSAGES, "SendMessage", args, move |_, reply| {
                callback(reply.map(|out| {
                    out.first()
                        .and_then(Value::as_str)
                        .unwrap_or_default()
                        .to_owned()
                }))
            })
            .map(drop)
    }

    /// Acknowledge received messages. They leave the pending list once the
    /// remote side confirms with `PendingMessagesRemoved`.
    pub fn acknowledge<F>(&self, messages: &[SignalledMessage], callback: F) -> Result<()>
    where
        F: FnOnce(Result<()>) + Send + 'static,
    {
        let ids: Vec<u32> = messages.iter().filter_map(|m| m.pending_message_id()).collect();
        if ids.len() != messages.len() {
            return Err(ProxyError::telepathy(
                ErrorKind::InvalidArgument,
                "Only messages with a pending-message-id can be acknowledged",
            ));
        }
        self.channel
            .proxy()
            .call(
                IFACE_CHANNEL_TYPE_TEXT,
                "AcknowledgePendingMessages",
                vec![Value::from(ids)],
                move |_, reply| callback(reply.map(drop)),
            )
            .map(drop)
    }
}

impl Deref for TextChannel {
    type Target = Channel;

    fn deref(&self) -> &Channel {
        &self.channel
    }
}

impl std::fmt::Debug for TextInner {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TextInner")
            .field("pending", &self.pending.lock().len())
            .finish()
    }
}
