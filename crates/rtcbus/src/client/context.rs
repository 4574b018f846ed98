// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Dispatch contexts: one per `ObserveChannels`, `AddDispatchOperation` or
//! `HandleChannels` call.
//!
//! ```text
//!            accept()            fail()
//!   Pending ---------> Accepted  -----> (programming error)
//!      |  \
//!      |   \ fail()
//!      |    +-------> Failed
//!      | delay()
//!      v
//!   Delayed --accept()--> Accepted
//!           --fail()----> Failed
//! ```
//!
//! The dispatcher's call is answered exactly once: on `accept`, on `fail`,
//! or with `NotImplemented` when the implementation leaves the context
//! pending or drops it uncompleted.

use std::fmt;
use std::sync::Arc;

use parking_lot::Mutex;

use crate::account::Account;
use crate::asv::AsvExt;
use crate::bus::{BusError, Responder};
use crate::channel::{Channel, ChannelFactory};
use crate::channel_dispatch_operation::ChannelDispatchOperation;
use crate::channel_request::ChannelRequest;
use crate::connection::Connection;
use crate::error::{ErrorKind, ProxyError, Result};
use crate::logging::DebugFlags;
use crate::proxy::{FeatureId, Proxy};
use crate::value::Asv;
use crate::{programming_error, rtc_debug};

/// Where a dispatch context is in its life.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ContextState {
    /// The implementation has not decided yet
    Pending,
    Accepted,
    Failed,
    /// The implementation will accept or fail later
    Delayed,
}

type AcceptHook = Box<dyn FnOnce() + Send>;

struct CoreState {
    state: ContextState,
    responder: Option<Responder>,
    on_accept: Option<AcceptHook>,
}

/// Reply side shared by the three contexts.
struct ContextCore {
    method: &'static str,
    inner: Mutex<CoreState>,
}

impl ContextCore {
    fn new(method: &'static str, responder: Responder) -> Self {
        Self {
            method,
            inner: Mutex::new(CoreState {
                state: ContextState::Pending,
                responder: Some(responder),
                on_accept: None,
            }),
        }
    }

    fn state(&self) -> ContextState {
        self.inner.lock().state
    }

    fn accept(&self) {
        let (responder, hook) = {
            let mut inner = self.inner.lock();
            match inner.state {
                ContextState::Pending | ContextState::Delayed => {
                    inner.state = ContextState::Accepted;
                    (inner.responder.take(), inner.on_accept.take())
                }
                state => {
                    programming_error!("[{}Context::accept] context already {:?}", self.method, state);
                    return;
                }
            }
        };
        rtc_debug!(DebugFlags::CLIENT, "[{}Context::accept] accepted", self.method);
        if let Some(responder) = responder {
            responder.reply(vec![]);
        }
        if let Some(hook) = hook {
            hook();
        }
    }

    fn fail(&self, error: &ProxyError) {
        let responder = {
            let mut inner = self.inner.lock();
            match inner.state {
                ContextState::Pending | ContextState::Delayed => {
                    inner.state = ContextState::Failed;
                    inner.on_accept = None;
                    inner.responder.take()
                }
                state => {
                    programming_error!("[{}Context::fail] context already {:?}", self.method, state);
                    return;
                }
            }
        };
        rtc_debug!(DebugFlags::CLIENT, "[{}Context::fail] {}", self.method, error);
        if let Some(responder) = responder {
            responder.error(BusError::from(error));
        }
    }

    fn delay(&self) {
        let mut inner = self.inner.lock();
        if inner.state != ContextState::Pending {
            programming_error!("[{}Context::delay] context already {:?}", self.method, inner.state);
            return;
        }
        inner.state = ContextState::Delayed;
    }

    fn set_on_accept(&self, hook: AcceptHook) {
        self.inner.lock().on_accept = Some(hook);
    }

    /// The implementation returned: a context still pending is answered
    /// with `NotImplemented`.
    fn check_returned(&self, client_name: &str) {
        if self.state() != ContextState::Pending {
            return;
        }
        programming_error!(
            "[{}Context::check_returned] implementation of {} in {} didn't call accept, fail or delay",
            self.method,
            self.method,
            client_name
        );
        self.fail(&ProxyError::telepathy(
            ErrorKind::NotImplemented,
            format!(
                "Implementation of {} in {} didn't call accept, fail or delay",
                self.method, client_name
            ),
        ));
    }
}

impl Drop for ContextCore {
    fn drop(&mut self) {
        let inner = self.inner.get_mut();
        let Some(responder) = inner.responder.take() else {
            return;
        };
        programming_error!(
            "[{}Context::drop] context dropped while {:?}; failing the call",
            self.method,
            inner.state
        );
        let error = ProxyError::telepathy(
            ErrorKind::NotImplemented,
            format!("{} context was dropped without being completed", self.method),
        );
        responder.error(BusError::from(&error));
    }
}

/// Features a client wants prepared on the objects it is handed.
#[derive(Clone, Default)]
pub(crate) struct RoleFeatures {
    pub(crate) account: Vec<FeatureId>,
    pub(crate) connection: Vec<FeatureId>,
    pub(crate) channel: Vec<FeatureId>,
}

/// Prepare every target; `callback` gets the first error, or `Ok` once all
/// are done.
fn prepare_all<F>(targets: Vec<(Arc<Proxy>, Vec<FeatureId>)>, callback: F)
where
    F: FnOnce(Result<()>) + Send + 'static,
{
    struct Join {
        remaining: usize,
        error: Option<ProxyError>,
        callback: Option<Box<dyn FnOnce(Result<()>) + Send>>,
    }

    if targets.is_empty() {
        callback(Ok(()));
        return;
    }
    let join = Arc::new(Mutex::new(Join {
        remaining: targets.len(),
        error: None,
        callback: Some(Box::new(callback)),
    }));
    for (proxy, features) in targets {
        let join = Arc::clone(&join);
        proxy.prepare(&features, move |result| {
            let finished = {
                let mut join = join.lock();
                join.remaining -= 1;
                if let Err(e) = result {
                    join.error.get_or_insert(e);
                }
                if join.remaining == 0 {
                    join.callback.take().map(|cb| (cb, join.error.take()))
                } else {
                    None
                }
            };
            if let Some((callback, error)) = finished {
                callback(error.map_or(Ok(()), Err));
            }
        });
    }
}

fn prepare_targets(
    account: &Account,
    connection: &Connection,
    channels: &[Channel],
    extra: Option<&Arc<Proxy>>,
    features: &RoleFeatures,
    factory: &dyn ChannelFactory,
) -> Vec<(Arc<Proxy>, Vec<FeatureId>)> {
    let mut targets = vec![
        (Arc::clone(account.proxy()), features.account.clone()),
        (Arc::clone(connection.proxy()), features.connection.clone()),
    ];
    for channel in channels {
        let mut wanted = features.channel.clone();
        for feature in factory.channel_features(channel) {
            if !wanted.contains(&feature) {
                wanted.push(feature);
            }
        }
        targets.push((Arc::clone(channel.proxy()), wanted));
    }
    if let Some(proxy) = extra {
        targets.push((Arc::clone(proxy), Vec::new()));
    }
    targets
}

// ---------------------------------------------------------------------------
// ObserveChannels
// ---------------------------------------------------------------------------

struct ObserveInner {
    core: ContextCore,
    account: Account,
    connection: Connection,
    channels: Vec<Channel>,
    dispatch_operation: Option<ChannelDispatchOperation>,
    requests: Vec<ChannelRequest>,
    observer_info: Asv,
}

/// Context of one `ObserveChannels` call.
///
/// Clone it to keep it past the implementation callback after `delay()`.
#[derive(Clone)]
pub struct ObserveChannelsContext {
    inner: Arc<ObserveInner>,
}

impl ObserveChannelsContext {
    pub(crate) fn new(
        responder: Responder,
        account: Account,
        connection: Connection,
        channels: Vec<Channel>,
        dispatch_operation: Option<ChannelDispatchOperation>,
        requests: Vec<ChannelRequest>,
        observer_info: Asv,
    ) -> Self {
        Self {
            inner: Arc::new(ObserveInner {
                core: ContextCore::new("ObserveChannels", responder),
                account,
                connection,
                channels,
                dispatch_operation,
                requests,
                observer_info,
            }),
        }
    }

    pub fn account(&self) -> &Account {
        &self.inner.account
    }

    pub fn connection(&self) -> &Connection {
        &self.inner.connection
    }

    pub fn channels(&self) -> &[Channel] {
        &self.inner.channels
    }

    /// `None` when the channels are not being dispatched to approvers
    /// (for instance when they were requested).
    pub fn dispatch_operation(&self) -> Option<&ChannelDispatchOperation> {
        self.inner.dispatch_operation.as_ref()
    }

    /// Requests the channels satisfy.
    pub fn requests(&self) -> &[ChannelRequest] {
        &self.inner.requests
    }

    pub fn observer_info(&self) -> &Asv {
        &self.inner.observer_info
    }

    /// True when the dispatcher is replaying channels that already existed
    /// (the observer or the dispatcher restarted). Recovered channels may
    /// have been observed before.
    pub fn is_recovering(&self) -> bool {
        self.inner.observer_info.get_bool("recovering").unwrap_or(false)
    }

    pub fn state(&self) -> ContextState {
        self.inner.core.state()
    }

    /// Let the dispatcher go on.
    pub fn accept(&self) {
        self.inner.core.accept();
    }

    /// Report an error to the dispatcher.
    pub fn fail(&self, error: &ProxyError) {
        self.inner.core.fail(error);
    }

    /// Take responsibility for calling [`accept`](Self::accept) or
    /// [`fail`](Self::fail) later.
    pub fn delay(&self) {
        self.inner.core.delay();
    }

    /// Queue preparation of the wanted features. Observers are told about
    /// channels straight away; failures are only logged.
    pub(crate) fn queue_prepare(&self, features: &RoleFeatures, factory: &dyn ChannelFactory) {
        let extra = self.inner.dispatch_operation.as_ref().map(ChannelDispatchOperation::proxy);
        let targets = prepare_targets(
            &self.inner.account,
            &self.inner.connection,
            &self.inner.channels,
            extra,
            features,
            factory,
        );
        prepare_all(targets, |result| {
            if let Err(e) = result {
                rtc_debug!(
                    DebugFlags::CLIENT,
                    "[ObserveChannelsContext::queue_prepare] preparation failed: {}",
                    e
                );
            }
        });
    }

    pub(crate) fn check_returned(&self, client_name: &str) {
        self.inner.core.check_returned(client_name);
    }
}

impl fmt::Debug for ObserveChannelsContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ObserveChannelsContext")
            .field("account", &self.inner.account.object_path())
            .field("channels", &self.inner.channels.len())
            .field("recovering", &self.is_recovering())
            .field("state", &self.state())
            .finish()
    }
}

// ---------------------------------------------------------------------------
// AddDispatchOperation
// ---------------------------------------------------------------------------

struct ApproveInner {
    core: ContextCore,
    account: Account,
    connection: Connection,
    channels: Vec<Channel>,
    dispatch_operation: ChannelDispatchOperation,
}

/// Context of one `AddDispatchOperation` call.
#[derive(Clone)]
pub struct ApproveChannelsContext {
    inner: Arc<ApproveInner>,
}

impl ApproveChannelsContext {
    pub(crate) fn new(
        responder: Responder,
        account: Account,
        connection: Connection,
        channels: Vec<Channel>,
        dispatch_operation: ChannelDispatchOperation,
    ) -> Self {
        Self {
            inner: Arc::new(ApproveInner {
                core: ContextCore::new("AddDispatchOperation", responder),
                account,
                connection,
                channels,
                dispatch_operation,
            }),
        }
    }

    pub fn account(&self) -> &Account {
        &self.inner.account
    }

    pub fn connection(&self) -> &Connection {
        &self.inner.connection
    }

    pub fn channels(&self) -> &[Channel] {
        &self.inner.channels
    }

    pub fn dispatch_operation(&self) -> &ChannelDispatchOperation {
        &self.inner.dispatch_operation
    }

    pub fn state(&self) -> ContextState {
        self.inner.core.state()
    }

    pub fn accept(&self) {
        self.inner.core.accept();
    }

    pub fn fail(&self, error: &ProxyError) {
        self.inner.core.fail(error);
    }

    pub fn delay(&self) {
        self.inner.core.delay();
    }

    /// Prepare everything, then run `ready` (or fail the context).
    pub(crate) fn prepare<F>(&self, features: &RoleFeatures, factory: &dyn ChannelFactory, ready: F)
    where
        F: FnOnce(ApproveChannelsContext) + Send + 'static,
    {
        let targets = prepare_targets(
            &self.inner.account,
            &self.inner.connection,
            &self.inner.channels,
            Some(self.inner.dispatch_operation.proxy()),
            features,
            factory,
        );
        let context = self.clone();
        prepare_all(targets, move |result| match result {
            Ok(()) => ready(context),
            Err(e) => {
                rtc_debug!(
                    DebugFlags::CLIENT,
                    "[ApproveChannelsContext::prepare] preparation failed: {}",
                    e
                );
                context.fail(&e);
            }
        });
    }

    pub(crate) fn check_returned(&self, client_name: &str) {
        self.inner.core.check_returned(client_name);
    }
}

impl fmt::Debug for ApproveChannelsContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ApproveChannelsContext")
            .field("dispatch_operation", &self.inner.dispatch_operation.object_path())
            .field("channels", &self.inner.channels.len())
            .field("state", &self.state())
            .finish()
    }
}

// ---------------------------------------------------------------------------
// HandleChannels
// ---------------------------------------------------------------------------

struct HandleInner {
    core: ContextCore,
    account: Account,
    connection: Connection,
    channels: Vec<Channel>,
    requests_satisfied: Vec<ChannelRequest>,
    user_action_time: i64,
    handler_info: Asv,
}

/// Context of one `HandleChannels` call.
#[derive(Clone)]
pub struct HandleChannelsContext {
    inner: Arc<HandleInner>,
}

impl HandleChannelsContext {
    pub(crate) fn new(
        responder: Responder,
        account: Account,
        connection: Connection,
        channels: Vec<Channel>,
        requests_satisfied: Vec<ChannelRequest>,
        user_action_time: i64,
        handler_info: Asv,
    ) -> Self {
        Self {
            inner: Arc::new(HandleInner {
                core: ContextCore::new("HandleChannels", responder),
                account,
                connection,
                channels,
                requests_satisfied,
                user_action_time,
                handler_info,
            }),
        }
    }

    pub fn account(&self) -> &Account {
        &self.inner.account
    }

    pub fn connection(&self) -> &Connection {
        &self.inner.connection
    }

    pub fn channels(&self) -> &[Channel] {
        &self.inner.channels
    }

    pub fn requests_satisfied(&self) -> &[ChannelRequest] {
        &self.inner.requests_satisfied
    }

    /// Time of the user action that led to the channels, or 0.
    pub fn user_action_time(&self) -> i64 {
        self.inner.user_action_time
    }

    pub fn handler_info(&self) -> &Asv {
        &self.inner.handler_info
    }

    pub fn state(&self) -> ContextState {
        self.inner.core.state()
    }

    /// Take the channels. They count as handled from now on.
    pub fn accept(&self) {
        self.inner.core.accept();
    }

    pub fn fail(&self, error: &ProxyError) {
        self.inner.core.fail(error);
    }

    pub fn delay(&self) {
        self.inner.core.delay();
    }

    /// `hook` runs once, right after the context is accepted.
    pub(crate) fn on_accepted(&self, hook: impl FnOnce() + Send + 'static) {
        self.inner.core.set_on_accept(Box::new(hook));
    }

    pub(crate) fn prepare<F>(&self, features: &RoleFeatures, factory: &dyn ChannelFactory, ready: F)
    where
        F: FnOnce(HandleChannelsContext) + Send + 'static,
    {
        let targets = prepare_targets(
            &self.inner.account,
            &self.inner.connection,
            &self.inner.channels,
            None,
            features,
            factory,
        );
        let context = self.clone();
        prepare_all(targets, move |result| match result {
            Ok(()) => ready(context),
            Err(e) => {
                rtc_debug!(
                    DebugFlags::CLIENT,
                    "[HandleChannelsContext::prepare] preparation failed: {}",
                    e
                );
                context.fail(&e);
            }
        });
    }

    pub(crate) fn check_returned(&self, client_name: &str) {
        self.inner.core.check_returned(client_name);
    }
}

impl fmt::Debug for HandleChannelsContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HandleChannelsContext")
            .field("account", &self.inner.account.object_path())
            .field("channels", &self.inner.channels.len())
            .field("user_action_time", &self.inner.user_action_time)
            .field("state", &self.state())
            .finish()
    }
}
