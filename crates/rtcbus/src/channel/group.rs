// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Group capability: membership of a multi-user channel.
//!
//! Membership is three disjoint [`IntSet`]s of contact handles (current,
//! local-pending, remote-pending) kept in step with `MembersChanged`
//! deltas. A handle moves between sets; it is never in two at once.

use std::sync::Arc;

use parking_lot::Mutex;

use super::{handles_arg, Channel};
use crate::asv::AsvExt;
use crate::config::IFACE_CHANNEL_INTERFACE_GROUP;
use crate::error::{ErrorKind, ProxyError, Result};
use crate::event::{ListenerId, Signal};
use crate::handle::Handle;
use crate::intset::IntSet;
use crate::logging::DebugFlags;
use crate::proxy::{FeatureCompleter, Proxy};
use crate::rtc_debug;
use crate::value::{Asv, Value};

/// Why membership changed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum GroupChangeReason {
    None = 0,
    Offline = 1,
    Kicked = 2,
    Busy = 3,
    Invited = 4,
    Banned = 5,
    Error = 6,
    InvalidContact = 7,
    NoAnswer = 8,
    Renamed = 9,
    PermissionDenied = 10,
    Separated = 11,
}

impl GroupChangeReason {
    pub fn from_u32(value: u32) -> Self {
        use GroupChangeReason::*;
        match value {
            1 => Offline,
            2 => Kicked,
            3 => Busy,
            4 => Invited,
            5 => Banned,
            6 => Error,
            7 => InvalidContact,
            8 => NoAnswer,
            9 => Renamed,
            10 => PermissionDenied,
            11 => Separated,
            _ => None,
        }
    }
}

/// One `MembersChanged` delta, after it was applied.
#[derive(Debug, Clone, PartialEq)]
pub struct MembersChanged {
    pub message: String,
    pub added: Vec<Handle>,
    pub removed: Vec<Handle>,
    pub local_pending: Vec<Handle>,
    pub remote_pending: Vec<Handle>,
    pub actor: Handle,
    pub reason: GroupChangeReason,
}

#[derive(Default)]
struct GroupState {
    members: IntSet,
    local_pending: IntSet,
    remote_pending: IntSet,
    self_handle: Handle,
    flags: u32,
}

impl GroupState {
    fn apply(&mut self, change: &MembersChanged) {
        for &h in &change.added {
            self.local_pending.remove(h);
            self.remote_pending.remove(h);
            self.members.add(h);
        }
        for &h in &change.removed {
            self.members.remove(h);
            self.local_pending.remove(h);
            self.remote_pending.remove(h);
        }
        for &h in &change.local_pending {
            self.members.remove(h);
            self.remote_pending.remove(h);
            self.local_pending.add(h);
        }
        for &h in &change.remote_pending {
            self.members.remove(h);
            self.local_pending.remove(h);
            self.remote_pending.add(h);
        }
    }

    fn reset(&mut self, props: &Asv) {
        if let Some(flags) = props.get_u32("GroupFlags") {
            self.flags = flags;
        }
        if let Some(handle) = props.get_u32("SelfHandle") {
            self.self_handle = handle;
        }
        if let Some(members) = props.get_value("Members").and_then(Value::to_u32_vec) {
            self.members = IntSet::from_slice(&members);
        }
        if let Some(pending) = props.get_value("LocalPendingMembers").and_then(Value::as_array) {
            // a(uuus): (handle, actor, reason, message)
            self.local_pending = pending
                .iter()
                .filter_map(|info| info.as_array()?.first()?.as_u32())
                .collect();
        }
        if let Some(pending) = props.get_value("RemotePendingMembers").and_then(Value::to_u32_vec) {
            self.remote_pending = IntSet::from_slice(&pending);
        }
    }
}

struct GroupInner {
    state: Mutex<GroupState>,
    members_changed: Signal<MembersChanged>,
}

/// Interface-added hook for the Group interface.
pub(super) fn attach(proxy: &Arc<Proxy>) -> Result<()> {
    proxy.set_extension(Arc::new(GroupInner {
        state: Mutex::new(GroupState::default()),
        members_changed: Signal::new(),
    }));
    proxy.connect_signal(IFACE_CHANNEL_INTERFACE_GROUP, "MembersChanged", |proxy, args| {
        let Some(group) = proxy.extension::<GroupInner>() else {
            return;
        };
        let change = MembersChanged {
            message: args.first().and_then(Value::as_str).unwrap_or_default().to_owned(),
            added: handles_arg(args, 1),
            removed: handles_arg(args, 2),
            local_pending: handles_arg(args, 3),
            remote_pending: handles_arg(args, 4),
            actor: args.get(5).and_then(Value::as_u32).unwrap_or(0),
            reason: GroupChangeReason::from_u32(args.get(6).and_then(Value::as_u32).unwrap_or(0)),
        };
        rtc_debug!(
            DebugFlags::SIGNALS,
            "[Channel::members_changed] {}: +{:?} -{:?} lp{:?} rp{:?}",
            proxy.object_path(),
            change.added,
            change.removed,
            change.local_pending,
            change.remote_pending
        );
        group.state.lock().apply(&change);
        group.members_changed.emit(&change);
    })?;
    Ok(())
}

pub(super) fn prepare(proxy: &Arc<Proxy>, done: FeatureCompleter) {
    if proxy.extension::<GroupInner>().is_none() {
        done.fail(&ProxyError::no_interface(IFACE_CHANNEL_INTERFACE_GROUP));
        return;
    }
    proxy.get_all_properties(IFACE_CHANNEL_INTERFACE_GROUP, move |proxy, result| match result {
        Ok(props) => {
            if let Some(group) = proxy.extension::<GroupInner>() {
                group.state.lock().reset(&props);
            }
            done.succeed();
        }
        Err(e) => done.fail(&e),
    });
}

impl Channel {
    fn group(&self) -> Result<Arc<GroupInner>> {
        self.proxy
            .extension::<GroupInner>()
            .ok_or_else(|| ProxyError::no_interface(IFACE_CHANNEL_INTERFACE_GROUP))
    }

    /// Current members, or `None` if the channel is not a group.
    pub fn members(&self) -> Option<IntSet> {
        Some(self.group().ok()?.state.lock().members.clone())
    }

    pub fn local_pending_members(&self) -> Option<IntSet> {
        Some(self.group().ok()?.state.lock().local_pending.clone())
    }

    pub fn remote_pending_members(&self) -> Option<IntSet> {
        Some(self.group().ok()?.state.lock().remote_pending.clone())
    }

    /// Our own handle in this group (0 until known).
    pub fn group_self_handle(&self) -> Option<Handle> {
        Some(self.group().ok()?.state.lock().self_handle)
    }

    pub fn group_flags(&self) -> Option<u32> {
        Some(self.group().ok()?.state.lock().flags)
    }

    pub fn connect_members_changed<F>(&self, listener: F) -> Result<ListenerId>
    where
        F: Fn(&MembersChanged) + Send + Sync + 'static,
    {
        Ok(self.group()?.members_changed.connect(listener))
    }

    /// Invite or accept `handles`.
    pub fn add_members<F>(&self, handles: &[Handle], message: &str, callback: F) -> Result<()>
    where
        F: FnOnce(Result<()>) + Send + 'static,
    {
        self.change_members("AddMembers", handles, message, callback)
    }

    /// Remove, reject or cancel the invitation of `handles`.
    pub fn remove_members<F>(&self, handles: &[Handle], message: &str, callback: F) -> Result<()>
    where
        F: FnOnce(Result<()>) + Send + 'static,
    {
        self.change_members("RemoveMembers", handles, message, callback)
    }

    fn change_members<F>(&self, method: &str, handles: &[Handle], message: &str, callback: F) -> Result<()>
    where
        F: FnOnce(Result<()>) + Send + 'static,
    {
        if handles.is_empty() {
            return Err(ProxyError::telepathy(
                ErrorKind::InvalidArgument,
                format!("{} needs at least one handle", method),
            ));
        }
        let args = vec![Value::from(handles.to_vec()), Value::from(message)];
        self.proxy
            .call(IFACE_CHANNEL_INTERFACE_GROUP, method, args, move |_, r| callback(r.map(drop)))
            .map(drop)
    }
}
