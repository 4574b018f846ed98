// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! `org.freedesktop.DBus.Properties` helpers.
//!
//! Concurrent `GetAll` requests for the same interface share one bus call.

use std::sync::Arc;

use super::Proxy;
use crate::config::IFACE_PROPERTIES;
use crate::error::{ErrorKind, ProxyError, Result};
use crate::value::{Asv, Value};

/// Receives the result of a `GetAll`.
pub type PropertiesCallback = Box<dyn FnOnce(&Arc<Proxy>, Result<Asv>) + Send>;

fn inconsistent(what: &str) -> ProxyError {
    ProxyError::proxy(ErrorKind::Inconsistent, format!("{} returned an unexpected reply", what))
}

impl Proxy {
    /// Fetch every property of `interface`.
    pub fn get_all_properties<F>(self: &Arc<Self>, interface: &str, callback: F)
    where
        F: FnOnce(&Arc<Proxy>, Result<Asv>) + Send + 'static,
    {
        {
            let mut state = self.state.lock();
            if let Some(waiters) = state.property_fetches.get_mut(interface) {
                waiters.push(Box::new(callback));
                return;
            }
            state
                .property_fetches
                .insert(interface.to_owned(), vec![Box::new(callback)]);
        }

        let key = interface.to_owned();
        let sent = self.call(
            IFACE_PROPERTIES,
            "GetAll",
            vec![Value::from(interface)],
            move |proxy, reply| {
                let result = reply.and_then(|args| {
                    args.into_iter()
                        .next()
                        .and_then(|v| match v {
                            Value::Dict(props) => Some(props),
                            _ => None,
                        })
                        .ok_or_else(|| inconsistent("GetAll"))
                });
                proxy.finish_property_fetch(&key, result);
            },
        );
        if let Err(error) = sent {
            self.finish_property_fetch(interface, Err(error));
        }
    }

    fn finish_property_fetch(self: &Arc<Self>, interface: &str, result: Result<Asv>) {
        let waiters = self
            .state
            .lock()
            .property_fetches
            .remove(interface)
            .unwrap_or_default();
        for waiter in waiters {
            waiter(self, result.clone());
        }
    }

    /// Fetch one property.
    pub fn get_property<F>(self: &Arc<Self>, interface: &str, name: &str, callback: F) -> Result<()>
    where
        F: FnOnce(&Arc<Proxy>, Result<Value>) + Send + 'static,
    {
        self.call(
            IFACE_PROPERTIES,
            "Get",
            vec![Value::from(interface), Value::from(name)],
            move |proxy, reply| {
                let result = reply
                    .and_then(|args| args.into_iter().next().ok_or_else(|| inconsistent("Get")));
                callback(proxy, result);
            },
        )
        .map(drop)
    }

    /// Set one property.
    pub fn set_property<F>(
        self: &Arc<Self>,
        interface: &str,
        name: &str,
        value: Value,
        callback: F,
    ) -> Result<()>
    where
        F: FnOnce(&Arc<Proxy>, Result<()>) + Send + 'static,
    {
        self.call(
            IFACE_PROPERTIES,
            "Set",
            vec![Value::from(interface), Value::from(name), value],
            move |proxy, reply| callback(proxy, reply.map(drop)),
        )
        .map(drop)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::asv;
    use crate::bus::{BusConnection, BusDaemon, IncomingCall, MemoryBus, ObjectHandler, Responder};
    use crate::proxy::BASE_CLASS;
    use parking_lot::Mutex;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[derive(Default)]
    struct Props {
        calls: AtomicUsize,
    }

    impl ObjectHandler for Props {
        fn handle_call(&self, call: IncomingCall, responder: Responder) {
            self.calls.fetch_add(1, Ordering::SeqCst);
            match call.member.as_str() {
                "GetAll" => responder.reply(vec![Value::Dict(asv! { "Answer" => 42u32 })]),
                "Get" => responder.reply(vec![Value::U32(42)]),
                _ => responder.reply(vec![]),
            }
        }
    }

    #[test]
    fn concurrent_get_all_shares_one_call() {
        let bus = MemoryBus::new();
        let service = bus.connect();
        let props = Arc::new(Props::default());
        service.export_object("/p", props.clone()).expect("free path");
        let daemon = BusDaemon::new(bus.connect());
        let proxy = Proxy::new(&BASE_CLASS, &daemon, &service.unique_name(), "/p").expect("valid");

        let got = Arc::new(Mutex::new(Vec::new()));
        for _ in 0..3 {
            let g = got.clone();
            proxy.get_all_properties("org.example.Thing", move |_, r| g.lock().push(r));
        }
        bus.dispatch();
        assert_eq!(props.calls.load(Ordering::SeqCst), 1);
        assert_eq!(got.lock().len(), 3);
        assert!(got.lock().iter().all(|r| r.as_ref().ok() == Some(&asv! { "Answer" => 42u32 })));

        let one = Arc::new(Mutex::new(None));
        let o = one.clone();
        proxy
            .get_property("org.example.Thing", "Answer", move |_, r| *o.lock() = Some(r))
            .expect("sent");
        bus.dispatch();
        assert_eq!(one.lock().take(), Some(Ok(Value::U32(42))));
    }
}
