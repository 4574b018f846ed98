// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Outstanding method calls.
//!
//! ```text
//! Proxy::call_with()
//!   |-- interface missing / invalidated --> Err, destroy runs now
//!   |-- register PendingCall in proxy table
//!   +-- bus.call() ----------------------> reply ----> complete_from_bus()
//!                                                       |
//!        cancel() / Cancellable  ---> bus.cancel_call   +--> callback (unless the
//!        Proxy::invalidate ----------> fail_invalidated      weak object died)
//!                                                       +--> destroy (always, once)
//! ```
//!
//! A call holds a strong reference to its proxy until it completes, so a
//! proxy stays alive while it has calls in flight.

use std::any::Any;
use std::fmt;
use std::sync::Arc;

use parking_lot::Mutex;

use super::{Cancellable, Proxy, WeakObject};
use crate::bus::{CallSerial, MethodCall, Reply};
use crate::error::{ProxyError, Result};
use crate::logging::DebugFlags;
use crate::rtc_debug;
use crate::value::Value;

/// Invoked with the reply (or the error) of a call.
pub type ReplyCallback = Box<dyn FnOnce(&Arc<Proxy>, Result<Vec<Value>>) + Send>;

/// Runs exactly once when a call or signal connection is finished with its
/// user data, whatever the outcome.
pub type DestroyNotify = Box<dyn FnOnce() + Send>;

/// Optional bindings for [`Proxy::call_with`] and
/// [`Proxy::connect_signal_with`](super::Proxy::connect_signal_with).
#[derive(Default)]
pub struct CallOptions {
    pub(crate) weak_object: Option<WeakObject>,
    pub(crate) destroy: Option<DestroyNotify>,
    pub(crate) cancellable: Option<Cancellable>,
}

impl CallOptions {
    pub fn new() -> Self {
        Self::default()
    }

    /// Suppress the callback if `object` is gone by the time it would run.
    pub fn weak_object<T: Any + Send + Sync>(mut self, object: &Arc<T>) -> Self {
        let weak: std::sync::Weak<T> = Arc::downgrade(object);
        let weak: WeakObject = weak;
        self.weak_object = Some(weak);
        self
    }

    pub fn on_destroy<F>(mut self, destroy: F) -> Self
    where
        F: FnOnce() + Send + 'static,
    {
        self.destroy = Some(Box::new(destroy));
        self
    }

    pub fn cancellable(mut self, cancellable: &Cancellable) -> Self {
        self.cancellable = Some(cancellable.clone());
        self
    }

    pub(crate) fn run_destroy(self) {
        if let Some(destroy) = self.destroy {
            destroy();
        }
    }
}

impl fmt::Debug for CallOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CallOptions")
            .field("weak_object", &self.weak_object.is_some())
            .field("destroy", &self.destroy.is_some())
            .field("cancellable", &self.cancellable)
            .finish()
    }
}

struct CallContext {
    callback: Option<ReplyCallback>,
    destroy: Option<DestroyNotify>,
}

enum Binding {
    Strong(CallContext),
    Weak(WeakObject, CallContext),
    Cancelled,
}

struct CallState {
    binding: Binding,
    serial: Option<CallSerial>,
    completed: bool,
    cancellable: Option<(Cancellable, u64)>,
}

/// Handle on an outstanding call.
pub struct PendingCall {
    id: u64,
    proxy: Arc<Proxy>,
    interface: String,
    member: String,
    state: Mutex<CallState>,
}

impl PendingCall {
    pub fn proxy(&self) -> &Arc<Proxy> {
        &self.proxy
    }

    pub fn interface(&self) -> &str {
        &self.interface
    }

    pub fn member(&self) -> &str {
        &self.member
    }

    /// True once the call was answered, failed, or cancelled.
    pub fn is_completed(&self) -> bool {
        self.state.lock().completed
    }

    /// Cancel the call. The callback never runs; the destroy notifier runs
    /// now. No effect once the call has completed.
    pub fn cancel(&self) {
        let (context, serial, hook) = {
            let mut state = self.state.lock();
            if state.completed {
                return;
            }
            state.completed = true;
            let context = match std::mem::replace(&mut state.binding, Binding::Cancelled) {
                Binding::Strong(ctx) | Binding::Weak(_, ctx) => ctx,
                Binding::Cancelled => return,
            };
            (context, state.serial.take(), state.cancellable.take())
        };
        rtc_debug!(
            DebugFlags::PENDING_CALLS,
            "[PendingCall::cancel] {}.{} on {}",
            self.interface,
            self.member,
            self.proxy.object_path()
        );
        if let Some(serial) = serial {
            self.proxy.daemon().connection().cancel_call(serial);
        }
        if let Some((cancellable, id)) = hook {
            cancellable.disconnect(id);
        }
        self.proxy.forget_pending(self.id);
        drop(context.callback);
        if let Some(destroy) = context.destroy {
            destroy();
        }
    }

    fn complete_from_bus(&self, reply: Reply) {
        let result = reply.map_err(|e| self.proxy.map_bus_error(&e));
        self.proxy.forget_pending(self.id);
        self.finish(result);
    }

    pub(crate) fn fail_invalidated(&self, error: &ProxyError) {
        let serial = self.state.lock().serial;
        if let Some(serial) = serial {
            self.proxy.daemon().connection().cancel_call(serial);
        }
        self.finish(Err(error.clone()));
    }

    fn finish(&self, result: Result<Vec<Value>>) {
        enum Delivery {
            Deliver(Option<Arc<dyn Any + Send + Sync>>),
            Suppress,
        }

        let (context, delivery, hook) = {
            let mut state = self.state.lock();
            if state.completed {
                return;
            }
            state.completed = true;
            state.serial = None;
            let hook = state.cancellable.take();
            match std::mem::replace(&mut state.binding, Binding::Cancelled) {
                Binding::Strong(ctx) => (ctx, Delivery::Deliver(None), hook),
                Binding::Weak(weak, ctx) => match weak.upgrade() {
                    Some(object) => (ctx, Delivery::Deliver(Some(object)), hook),
                    None => (ctx, Delivery::Suppress, hook),
                },
                Binding::Cancelled => return,
            }
        };
        if let Some((cancellable, id)) = hook {
            cancellable.disconnect(id);
        }

        let CallContext { callback, destroy } = context;
        match delivery {
            Delivery::Deliver(keep_alive) => {
                if let Some(callback) = callback {
                    callback(&self.proxy, result);
                }
                drop(keep_alive);
            }
            Delivery::Suppress => {
                rtc_debug!(
                    DebugFlags::PENDING_CALLS,
                    "[PendingCall::finish] {}.{}: weak object gone, callback suppressed",
                    self.interface,
                    self.member
                );
                drop(callback);
            }
        }
        if let Some(destroy) = destroy {
            destroy();
        }
    }

    fn set_serial(&self, serial: CallSerial) {
        let stale = {
            let mut state = self.state.lock();
            if state.completed {
                true
            } else {
                state.serial = Some(serial);
                false
            }
        };
        if stale {
            self.proxy.daemon().connection().cancel_call(serial);
        }
    }
}

impl fmt::Debug for PendingCall {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PendingCall")
            .field("interface", &self.interface)
            .field("member", &self.member)
            .field("path", &self.proxy.object_path())
            .field("completed", &self.is_completed())
            .finish()
    }
}

impl Proxy {
    /// Call `interface.member` on the remote object.
    ///
    /// Fails synchronously (the callback never runs) if the proxy is
    /// invalidated or lacks `interface`.
    pub fn call<F>(
        self: &Arc<Self>,
        interface: &str,
        member: &str,
        args: Vec<Value>,
        callback: F,
    ) -> Result<Arc<PendingCall>>
    where
        F: FnOnce(&Arc<Proxy>, Result<Vec<Value>>) + Send + 'static,
    {
        self.call_with(interface, member, args, CallOptions::default(), callback)
    }

    /// [`call`](Self::call) with a weak object, destroy notifier or
    /// cancellable. On synchronous failure the destroy notifier runs before
    /// this returns.
    pub fn call_with<F>(
        self: &Arc<Self>,
        interface: &str,
        member: &str,
        args: Vec<Value>,
        options: CallOptions,
        callback: F,
    ) -> Result<Arc<PendingCall>>
    where
        F: FnOnce(&Arc<Proxy>, Result<Vec<Value>>) + Send + 'static,
    {
        if let Err(e) = self.check_interface(interface) {
            options.run_destroy();
            return Err(e);
        }
        if options.cancellable.as_ref().is_some_and(Cancellable::is_cancelled) {
            options.run_destroy();
            return Err(ProxyError::cancelled(format!(
                "{}.{} cancelled before it was sent",
                interface, member
            )));
        }

        let CallOptions {
            weak_object,
            destroy,
            cancellable,
        } = options;
        let context = CallContext {
            callback: Some(Box::new(callback)),
            destroy,
        };
        let binding = match weak_object {
            Some(weak) => Binding::Weak(weak, context),
            None => Binding::Strong(context),
        };
        let id = self.next_id();
        let call = Arc::new(PendingCall {
            id,
            proxy: Arc::clone(self),
            interface: interface.to_owned(),
            member: member.to_owned(),
            state: Mutex::new(CallState {
                binding,
                serial: None,
                completed: false,
                cancellable: None,
            }),
        });

        let registered = {
            let mut state = self.state.lock();
            match &state.invalidated {
                Some(error) => Err(error.clone()),
                None => {
                    state.pending_calls.insert(id, Arc::clone(&call));
                    Ok(())
                }
            }
        };
        if let Err(error) = registered {
            // lost a race with invalidation: finish without a callback
            call.cancel();
            return Err(error);
        }

        if let Some(token) = cancellable {
            let weak = Arc::downgrade(&call);
            let hook = token.connect(move || {
                if let Some(call) = weak.upgrade() {
                    call.cancel();
                }
            });
            if let Some(hook) = hook {
                call.state.lock().cancellable = Some((token, hook));
            }
        }
        if call.is_completed() {
            return Ok(call);
        }

        rtc_debug!(
            DebugFlags::PENDING_CALLS,
            "[Proxy::call] {}.{} on {} {}",
            interface,
            member,
            self.bus_name(),
            self.object_path()
        );
        let on_reply = Arc::clone(&call);
        let serial = self.daemon().connection().call(
            MethodCall::new(self.bus_name(), self.object_path(), interface, member, args),
            Box::new(move |reply| on_reply.complete_from_bus(reply)),
        );
        call.set_serial(serial);
        Ok(call)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bus::{BusConnection, BusDaemon, BusError, IncomingCall, MemoryBus, ObjectHandler, Responder};
    use crate::error::ErrorKind;
    use crate::proxy::{ProxyClass, BASE_CLASS};
    use std::sync::atomic::{AtomicUsize, Ordering};

    static ECHO_CLASS: ProxyClass = ProxyClass {
        name: "EchoProxy",
        primary_interface: "org.example.Echo",
        must_have_unique_name: true,
        parent: Some(&BASE_CLASS),
        features: &[],
        interface_added: None,
        errors: &[],
    };

    struct Echo;

    impl ObjectHandler for Echo {
        fn handle_call(&self, call: IncomingCall, responder: Responder) {
            match call.member.as_str() {
                "Echo" => responder.reply(call.args),
                _ => responder.error(BusError::new(
                    "org.freedesktop.Telepathy.Error.NotAvailable",
                    "nope",
                )),
            }
        }
    }

    fn setup() -> (Arc<MemoryBus>, Arc<crate::bus::MemoryConnection>, Arc<Proxy>) {
        let bus = MemoryBus::new();
        let service = bus.connect();
        service.export_object("/echo", Arc::new(Echo)).expect("free path");
        let daemon = BusDaemon::new(bus.connect());
        let proxy = Proxy::new(&ECHO_CLASS, &daemon, &service.unique_name(), "/echo").expect("valid");
        bus.dispatch();
        (bus, service, proxy)
    }

    fn counter() -> (Arc<AtomicUsize>, impl FnOnce() + Send + 'static) {
        let n = Arc::new(AtomicUsize::new(0));
        let c = n.clone();
        (n, move || {
            c.fetch_add(1, Ordering::SeqCst);
        })
    }

    #[test]
    fn reply_and_mapped_error() {
        let (bus, _service, proxy) = setup();
        let got = Arc::new(Mutex::new(Vec::new()));
        let g = got.clone();
        proxy
            .call("org.example.Echo", "Echo", vec![Value::U32(7)], move |_, r| g.lock().push(r))
            .expect("sent");
        let g = got.clone();
        proxy
            .call("org.example.Echo", "Fail", vec![], move |_, r| g.lock().push(r))
            .expect("sent");
        assert_eq!(proxy.pending_call_count(), 2);
        bus.dispatch();

        let got = got.lock();
        assert_eq!(got[0], Ok(vec![Value::U32(7)]));
        assert_eq!(got[1].as_ref().unwrap_err().kind, ErrorKind::NotAvailable);
        assert_eq!(proxy.pending_call_count(), 0);
    }

    #[test]
    fn missing_interface_fails_synchronously() {
        let (_bus, _service, proxy) = setup();
        let (destroyed, destroy) = counter();
        let err = proxy
            .call_with(
                "org.example.Missing",
                "X",
                vec![],
                CallOptions::new().on_destroy(destroy),
                |_, _| panic!("callback must not run"),
            )
            .unwrap_err();
        assert_eq!(err.kind, ErrorKind::NoInterface);
        assert_eq!(destroyed.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn cancel_drops_callback_and_runs_destroy_once() {
        let (bus, _service, proxy) = setup();
        let (destroyed, destroy) = counter();
        let call = proxy
            .call_with(
                "org.example.Echo",
                "Echo",
                vec![],
                CallOptions::new().on_destroy(destroy),
                |_, _| panic!("cancelled call replied"),
            )
            .expect("sent");
        call.cancel();
        call.cancel();
        bus.dispatch();
        assert_eq!(destroyed.load(Ordering::SeqCst), 1);
        assert!(call.is_completed());
        assert_eq!(bus.pending_calls(), 0);
    }

    #[test]
    fn cancellable_token_cancels() {
        let (bus, _service, proxy) = setup();
        let token = Cancellable::new();
        let (destroyed, destroy) = counter();
        proxy
            .call_with(
                "org.example.Echo",
                "Echo",
                vec![],
                CallOptions::new().cancellable(&token).on_destroy(destroy),
                |_, _| panic!("cancelled call replied"),
            )
            .expect("sent");
        token.cancel();
        bus.dispatch();
        assert_eq!(destroyed.load(Ordering::SeqCst), 1);

        let err = proxy
            .call_with("org.example.Echo", "Echo", vec![], CallOptions::new().cancellable(&token), |_, _| {})
            .unwrap_err();
        assert_eq!(err.kind, ErrorKind::Cancelled);
    }

    #[test]
    fn dead_weak_object_suppresses_callback() {
        let (bus, _service, proxy) = setup();
        let owner = Arc::new(String::from("owner"));
        let (destroyed, destroy) = counter();
        proxy
            .call_with(
                "org.example.Echo",
                "Echo",
                vec![],
                CallOptions::new().weak_object(&owner).on_destroy(destroy),
                |_, _| panic!("weak object is gone"),
            )
            .expect("sent");
        drop(owner);
        bus.dispatch();
        assert_eq!(destroyed.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn invalidation_fails_pending_calls() {
        let (bus, _service, proxy) = setup();
        let got = Arc::new(Mutex::new(None));
        let g = got.clone();
        proxy
            .call("org.example.Echo", "Echo", vec![], move |_, r| *g.lock() = Some(r))
            .expect("sent");
        proxy.invalidate(ProxyError::object_removed("gone"));
        bus.dispatch();
        let result = got.lock().take().expect("callback ran during invalidation");
        assert!(result.unwrap_err().is_object_removed());
        assert_eq!(bus.pending_calls(), 0);
    }
}
