// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Signal subscriptions.
//!
//! A [`SignalConnection`] owns one match rule on the bus. The bus handler only
//! holds a `Weak` reference to the connection, and the connection only holds
//! a `Weak` reference to its proxy: subscriptions never keep a proxy alive.
//!
//! # Thread Safety
//!
//! Delivery runs under a per-connection reentrant lock. `disconnect()` takes
//! the same lock, so once it returns no callback is running and none will
//! start. A callback may disconnect its own connection (same thread).

use std::fmt;
use std::sync::{Arc, Weak};

use parking_lot::{Mutex, ReentrantMutex};

use super::{CallOptions, Cancellable, DestroyNotify, Proxy, WeakObject};
use crate::bus::{BusConnection, MatchId, MatchRule, SignalMessage};
use crate::error::{ProxyError, Result};
use crate::logging::DebugFlags;
use crate::rtc_debug;
use crate::value::Value;

/// Invoked with the arguments of each matching signal.
pub type SignalCallback = Arc<dyn Fn(&Arc<Proxy>, &[Value]) + Send + Sync>;

/// Bindings for [`Proxy::connect_signal_with`]; same shape as for calls.
pub type SignalOptions = CallOptions;

enum SignalBinding {
    Connected {
        callback: SignalCallback,
        weak_object: Option<WeakObject>,
        destroy: Option<DestroyNotify>,
    },
    Disconnected,
}

struct SignalState {
    binding: SignalBinding,
    match_id: Option<MatchId>,
    cancellable: Option<(Cancellable, u64)>,
}

/// One subscription to a signal of a proxy.
pub struct SignalConnection {
    id: u64,
    proxy: Weak<Proxy>,
    connection: Arc<dyn BusConnection>,
    interface: String,
    member: String,
    delivery: ReentrantMutex<()>,
    state: Mutex<SignalState>,
}

impl SignalConnection {
    pub fn interface(&self) -> &str {
        &self.interface
    }

    pub fn member(&self) -> &str {
        &self.member
    }

    pub fn is_connected(&self) -> bool {
        matches!(self.state.lock().binding, SignalBinding::Connected { .. })
    }

    /// Stop delivery. The destroy notifier runs once, after any in-flight
    /// callback has returned. Idempotent.
    pub fn disconnect(&self) {
        if self.teardown() {
            if let Some(proxy) = self.proxy.upgrade() {
                proxy.forget_signal(self.id);
            }
        }
    }

    /// Tear down without touching the proxy table. Returns false if already
    /// disconnected.
    pub(crate) fn teardown(&self) -> bool {
        let (callback, destroy, match_id, hook) = {
            let _delivering = self.delivery.lock();
            let mut state = self.state.lock();
            match std::mem::replace(&mut state.binding, SignalBinding::Disconnected) {
                SignalBinding::Connected {
                    callback, destroy, ..
                } => (callback, destroy, state.match_id.take(), state.cancellable.take()),
                SignalBinding::Disconnected => return false,
            }
        };
        rtc_debug!(
            DebugFlags::SIGNALS,
            "[SignalConnection::disconnect] {}.{}",
            self.interface,
            self.member
        );
        if let Some(id) = match_id {
            self.connection.remove_match(id);
        }
        if let Some((cancellable, id)) = hook {
            cancellable.disconnect(id);
        }
        drop(callback);
        if let Some(destroy) = destroy {
            destroy();
        }
        true
    }

    /// Runs the callback under the delivery lock. Same-thread reentry is
    /// fine; see the thread-safety notes on [`Proxy`] for the cross-thread
    /// case.
    fn deliver(&self, msg: &SignalMessage) {
        let _delivering = self.delivery.lock();
        let bound = match &self.state.lock().binding {
            SignalBinding::Disconnected => return,
            SignalBinding::Connected {
                callback,
                weak_object,
                ..
            } => match weak_object {
                None => Some((Arc::clone(callback), None)),
                Some(weak) => weak.upgrade().map(|object| (Arc::clone(callback), Some(object))),
            },
        };
        let Some((callback, keep_alive)) = bound else {
            rtc_debug!(
                DebugFlags::SIGNALS,
                "[SignalConnection::deliver] {}.{}: weak object gone",
                self.interface,
                self.member
            );
            self.disconnect();
            return;
        };
        let Some(proxy) = self.proxy.upgrade() else {
            return;
        };
        if proxy.is_invalidated() {
            return;
        }
        callback(&proxy, &msg.args);
        drop(keep_alive);
    }

    fn set_match(&self, id: MatchId) {
        let stale = {
            let mut state = self.state.lock();
            if matches!(state.binding, SignalBinding::Disconnected) {
                true
            } else {
                state.match_id = Some(id);
                false
            }
        };
        if stale {
            self.connection.remove_match(id);
        }
    }
}

impl fmt::Debug for SignalConnection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SignalConnection")
            .field("interface", &self.interface)
            .field("member", &self.member)
            .field("connected", &self.is_connected())
            .finish()
    }
}

impl Proxy {
    /// Subscribe to `interface.member` emitted by the remote object.
    pub fn connect_signal<F>(
        self: &Arc<Self>,
        interface: &str,
        member: &str,
        callback: F,
    ) -> Result<Arc<SignalConnection>>
    where
        F: Fn(&Arc<Proxy>, &[Value]) + Send + Sync + 'static,
    {
        self.connect_signal_with(interface, member, SignalOptions::default(), callback)
    }

    /// [`connect_signal`](Self::connect_signal) with a weak object, destroy
    /// notifier or cancellable. A dead weak object disconnects the
    /// subscription at the next delivery.
    pub fn connect_signal_with<F>(
        self: &Arc<Self>,
        interface: &str,
        member: &str,
        options: SignalOptions,
        callback: F,
    ) -> Result<Arc<SignalConnection>>
    where
        F: Fn(&Arc<Proxy>, &[Value]) + Send + Sync + 'static,
    {
        if let Err(e) = self.check_interface(interface) {
            options.run_destroy();
            return Err(e);
        }
        if options.cancellable.as_ref().is_some_and(Cancellable::is_cancelled) {
            options.run_destroy();
            return Err(ProxyError::cancelled(format!(
                "{}.{} cancelled before connecting",
                interface, member
            )));
        }

        let CallOptions {
            weak_object,
            destroy,
            cancellable,
        } = options;
        let id = self.next_id();
        let connection = Arc::new(SignalConnection {
            id,
            proxy: Arc::downgrade(self),
            connection: Arc::clone(self.daemon().connection()),
            interface: interface.to_owned(),
            member: member.to_owned(),
            delivery: ReentrantMutex::new(()),
            state: Mutex::new(SignalState {
                binding: SignalBinding::Connected {
                    callback: Arc::new(callback),
                    weak_object,
                    destroy,
                },
                match_id: None,
                cancellable: None,
            }),
        });

        let registered = {
            let mut state = self.state.lock();
            match &state.invalidated {
                Some(error) => Err(error.clone()),
                None => {
                    state.signals.insert(id, Arc::clone(&connection));
                    Ok(())
                }
            }
        };
        if let Err(error) = registered {
            connection.teardown();
            return Err(error);
        }

        let weak = Arc::downgrade(&connection);
        let rule = MatchRule::signal(interface, member)
            .sender(self.bus_name())
            .path(self.object_path());
        rtc_debug!(DebugFlags::SIGNALS, "[Proxy::connect_signal] {}", rule);
        let match_id = self.daemon().connection().add_match(
            rule,
            Arc::new(move |msg: &SignalMessage| {
                if let Some(connection) = weak.upgrade() {
                    connection.deliver(msg);
                }
            }),
        );
        connection.set_match(match_id);

        if let Some(token) = cancellable {
            let weak = Arc::downgrade(&connection);
            let hook = token.connect(move || {
                if let Some(connection) = weak.upgrade() {
                    connection.disconnect();
                }
            });
            if let Some(hook) = hook {
                connection.state.lock().cancellable = Some((token, hook));
            }
        }
        Ok(connection)
    }
}
