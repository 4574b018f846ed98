// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! One-shot channel request on behalf of an account.
//!
//! ```text
//! create_channel / ensure_channel
//!   -> ChannelDispatcher.{Create,Ensure}Channel   -> request path
//!   -> ChannelRequest (listen for invalidation)
//!   -> ChannelRequest.Proceed
//!   ...
//!   invalidated(ObjectRemoved) -> callback(Ok(channel, if the dispatcher reported one))
//!   invalidated(other)         -> callback(Err(other))
//! ```
//!
//! Each request object runs at most one request. Cancelling the
//! [`Cancellable`] asks the dispatcher to cancel; the callback still runs
//! once, with the outcome the request ends with.

use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;

use crate::account::Account;
use crate::bus::BusDaemon;
use crate::channel::{AutomaticChannelFactory, Channel, ChannelFactory};
use crate::channel_dispatcher::ChannelDispatcher;
use crate::channel_request::ChannelRequest;
use crate::connection::Connection;
use crate::error::{ErrorKind, ProxyError, Result};
use crate::logging::DebugFlags;
use crate::proxy::Cancellable;
use crate::value::Asv;
use crate::{programming_error, rtc_debug};

/// What a finished request yields: the channel, when the dispatcher said
/// which one it was.
pub type RequestOutcome = Option<(Connection, Channel)>;

type OutcomeCallback = Box<dyn FnOnce(Result<RequestOutcome>) + Send>;

struct CompletionState {
    callback: Option<OutcomeCallback>,
    /// Keeps the followed request alive until it finishes
    request: Option<ChannelRequest>,
    cancel_hook: Option<(Cancellable, u64)>,
}

/// Runs its callback at most once, whichever path finishes first.
#[derive(Clone)]
struct Completion(Arc<Mutex<CompletionState>>);

impl Completion {
    fn new(callback: OutcomeCallback) -> Self {
        Self(Arc::new(Mutex::new(CompletionState {
            callback: Some(callback),
            request: None,
            cancel_hook: None,
        })))
    }

    fn complete(&self, result: Result<RequestOutcome>) {
        let (callback, request, hook) = {
            let mut state = self.0.lock();
            (state.callback.take(), state.request.take(), state.cancel_hook.take())
        };
        if let Some((cancellable, id)) = hook {
            cancellable.disconnect(id);
        }
        drop(request);
        if let Some(callback) = callback {
            callback(result);
        }
    }

    fn is_done(&self) -> bool {
        self.0.lock().callback.is_none()
    }
}

pub struct AccountChannelRequest {
    account: Account,
    request: Asv,
    user_action_time: i64,
    preferred_handler: Option<String>,
    factory: Arc<dyn ChannelFactory>,
    requested: AtomicBool,
}

impl AccountChannelRequest {
    pub fn new(account: &Account, request: Asv, user_action_time: i64) -> Self {
        Self {
            account: account.clone(),
            request,
            user_action_time,
            preferred_handler: None,
            factory: Arc::new(AutomaticChannelFactory),
            requested: AtomicBool::new(false),
        }
    }

    /// Well-known name of the handler that should get the channel.
    pub fn with_preferred_handler(mut self, handler: &str) -> Self {
        self.preferred_handler = Some(handler.to_owned());
        self
    }

    pub fn with_channel_factory(mut self, factory: Arc<dyn ChannelFactory>) -> Self {
        self.factory = factory;
        self
    }

    pub fn account(&self) -> &Account {
        &self.account
    }

    pub fn request(&self) -> &Asv {
        &self.request
    }

    pub fn user_action_time(&self) -> i64 {
        self.user_action_time
    }

    pub fn create_channel<F>(&self, cancellable: Option<&Cancellable>, callback: F) -> Result<()>
    where
        F: FnOnce(Result<RequestOutcome>) + Send + 'static,
    {
        self.start(false, cancellable, Box::new(callback))
    }

    pub fn ensure_channel<F>(&self, cancellable: Option<&Cancellable>, callback: F) -> Result<()>
    where
        F: FnOnce(Result<RequestOutcome>) + Send + 'static,
    {
        self.start(true, cancellable, Box::new(callback))
    }

    fn start(&self, ensure: bool, cancellable: Option<&Cancellable>, callback: OutcomeCallback) -> Result<()> {
        if self.requested.swap(true, Ordering::AcqRel) {
            programming_error!(
                "[AccountChannelRequest::start] {}: request already made",
                self.account.object_path()
            );
            return Err(ProxyError::telepathy(
                ErrorKind::NotAvailable,
                "This AccountChannelRequest was already used",
            ));
        }
        if cancellable.is_some_and(Cancellable::is_cancelled) {
            return Err(ProxyError::cancelled("Operation has been cancelled"));
        }

        let daemon = self.account.proxy().daemon().clone();
        let dispatcher = ChannelDispatcher::new(&daemon)?;
        let completion = Completion::new(callback);
        let factory = Arc::clone(&self.factory);
        let cancellable = cancellable.cloned();

        let on_path = {
            let completion = completion.clone();
            move |reply: Result<String>| {
                let path = match reply {
                    Ok(path) => path,
                    Err(e) => {
                        rtc_debug!(
                            DebugFlags::DISPATCH,
                            "[AccountChannelRequest::start] {} failed: {}",
                            if ensure { "EnsureChannel" } else { "CreateChannel" },
                            e
                        );
                        completion.complete(Err(e));
                        return;
                    }
                };
                rtc_debug!(DebugFlags::DISPATCH, "[AccountChannelRequest::start] got request {}", path);
                follow_request(&daemon, &path, factory, cancellable, completion);
            }
        };

        let account_path = self.account.object_path();
        let handler = self.preferred_handler.as_deref();
        let request = self.request.clone();
        if ensure {
            dispatcher.ensure_channel(account_path, request, self.user_action_time, handler, on_path)
        } else {
            dispatcher.create_channel(account_path, request, self.user_action_time, handler, on_path)
        }
    }
}

fn follow_request(
    daemon: &BusDaemon,
    path: &str,
    factory: Arc<dyn ChannelFactory>,
    cancellable: Option<Cancellable>,
    completion: Completion,
) {
    let request = match ChannelRequest::with_factory(daemon, path, Asv::new(), factory) {
        Ok(request) => request,
        Err(e) => {
            completion.complete(Err(e));
            return;
        }
    };

    let weak = Arc::downgrade(request.proxy());
    let finished = completion.clone();
    request.proxy().connect_invalidated(move |error| {
        if error.is_object_removed() {
            let outcome = weak
                .upgrade()
                .and_then(|proxy| ChannelRequest::from_proxy(&proxy))
                .and_then(|request| request.channel());
            finished.complete(Ok(outcome));
        } else {
            rtc_debug!(DebugFlags::DISPATCH, "[AccountChannelRequest::follow] request failed: {}", error);
            finished.complete(Err(error.clone()));
        }
    });
    if completion.is_done() {
        return;
    }
    completion.0.lock().request = Some(request.clone());

    if let Some(cancellable) = cancellable {
        let target = request.clone();
        let hook = cancellable.connect(move || {
            rtc_debug!(
                DebugFlags::DISPATCH,
                "[AccountChannelRequest::follow] cancelling {}",
                target.object_path()
            );
            if let Err(e) = target.cancel(|_| {}) {
                rtc_debug!(DebugFlags::DISPATCH, "[AccountChannelRequest::follow] cancel: {}", e);
            }
        });
        match hook {
            Some(id) => completion.0.lock().cancel_hook = Some((cancellable, id)),
            // cancelled already: the request ends through Cancel
            None => return,
        }
    }

    let proceeding = completion.clone();
    let proceeded = request.proceed(move |result| {
        if let Err(e) = result {
            proceeding.complete(Err(e));
        }
    });
    if let Err(e) = proceeded {
        completion.complete(Err(e));
    }
}

impl fmt::Debug for AccountChannelRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AccountChannelRequest")
            .field("account", &self.account.object_path())
            .field("user_action_time", &self.user_action_time)
            .field("requested", &self.requested.load(Ordering::Acquire))
            .finish()
    }
}
