// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

use std::sync::Arc;

use crate::bus::BusDaemon;
use crate::config::{CHANNEL_DISPATCHER_BUS_NAME, CHANNEL_DISPATCHER_OBJECT_PATH, IFACE_CHANNEL_DISPATCHER};
use crate::error::{ErrorKind, ProxyError, Result};
use crate::proxy::{AsProxy, Proxy, ProxyClass, BASE_CLASS};
use crate::value::{Asv, Value};

pub static CHANNEL_DISPATCHER_CLASS: ProxyClass = ProxyClass {
    name: "ChannelDispatcher",
    primary_interface: IFACE_CHANNEL_DISPATCHER,
    must_have_unique_name: true,
    parent: Some(&BASE_CLASS),
    features: &[],
    interface_added: None,
    errors: &[],
};

/// Proxy for the channel dispatcher. Requests made here come back as the
/// object path of a channel request to follow.
#[derive(Clone, Debug)]
pub struct ChannelDispatcher {
    proxy: Arc<Proxy>,
}

impl ChannelDispatcher {
    pub fn new(daemon: &BusDaemon) -> Result<ChannelDispatcher> {
        let proxy = Proxy::new(
            &CHANNEL_DISPATCHER_CLASS,
            daemon,
            CHANNEL_DISPATCHER_BUS_NAME,
            CHANNEL_DISPATCHER_OBJECT_PATH,
        )?;
        Ok(ChannelDispatcher { proxy })
    }

    pub fn proxy(&self) -> &Arc<Proxy> {
        &self.proxy
    }

    /// Request a new channel for `account`.
    pub fn create_channel<F>(
        &self,
        account_path: &str,
        request: Asv,
        user_action_time: i64,
        preferred_handler: Option<&str>,
        callback: F,
    ) -> Result<()>
    where
        F: FnOnce(Result<String>) + Send + 'static,
    {
        self.request("CreateChannel", account_path, request, user_action_time, preferred_handler, callback)
    }

    /// Request a channel for `account`, reusing a matching one if it exists.
    pub fn ensure_channel<F>(
        &self,
        account_path: &str,
        request: Asv,
        user_action_time: i64,
        preferred_handler: Option<&str>,
        callback: F,
    ) -> Result<()>
    where
        F: FnOnce(Result<String>) + Send + 'static,
    {
        self.request("EnsureChannel", account_path, request, user_action_time, preferred_handler, callback)
    }

    fn request<F>(
        &self,
        method: &str,
        account_path: &str,
        request: Asv,
        user_action_time: i64,
        preferred_handler: Option<&str>,
        callback: F,
    ) -> Result<()>
    where
        F: FnOnce(Result<String>) + Send + 'static,
    {
        let args = vec![
            Value::ObjectPath(account_path.to_owned()),
            Value::Dict(request),
            Value::I64(user_action_time),
            Value::from(preferred_handler.unwrap_or_default()),
        ];
        let method_name = method.to_owned();
        self.proxy
            .call(IFACE_CHANNEL_DISPATCHER, method, args, move |_, reply| {
                callback(reply.and_then(|out| {
                    out.first()
                        .and_then(Value::as_object_path)
                        .map(str::to_owned)
                        .ok_or_else(|| {
                            ProxyError::proxy(
                                ErrorKind::Inconsistent,
                                format!("{} did not return a request path", method_name),
                            )
                        })
                }))
            })
            .map(drop)
    }
}

impl AsProxy for ChannelDispatcher {
    fn as_proxy(&self) -> &Arc<Proxy> {
        &self.proxy
    }
}
