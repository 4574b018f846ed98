// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! `Client.Handler.HandleChannels` and `Client.Interface.Requests`.

use std::sync::Arc;

use crate::account::Account;
use crate::asv::AsvExt;
use crate::bus::{BusError, Responder};
use crate::channel::Channel;
use crate::channel_request::ChannelRequest;
use crate::config::PROP_CHANNEL_REQUEST_ACCOUNT;
use crate::connection::Connection;
use crate::error::Result;
use crate::logging::DebugFlags;
use crate::rtc_debug;
use crate::value::{Asv, Value};

use super::{invalid_argument, not_implemented, object_path_arg, BaseClient, HandleChannelsContext, RequestRemoved};

const HANDLE_CHANNELS: &str = "HandleChannels";
const ADD_REQUEST: &str = "AddRequest";
const REMOVE_REQUEST: &str = "RemoveRequest";

struct HandleParts {
    account: Account,
    connection: Connection,
    channels: Vec<Channel>,
    requests: Vec<ChannelRequest>,
    user_action_time: i64,
    handler_info: Asv,
}

impl BaseClient {
    /// Arguments: `(o account, o connection, a(oa{sv}) channels,
    /// ao requests_satisfied, t user_action_time, a{sv} handler_info)`.
    pub(super) fn handle_channels(&self, args: &[Value], responder: Responder) {
        let (is_handler, implementation) = {
            let state = self.inner.state.lock();
            (state.is_handler, state.handle_impl.clone())
        };
        if !is_handler {
            responder.error(not_implemented(HANDLE_CHANNELS));
            return;
        }
        let Some(implementation) = implementation else {
            log::warn!(
                "[BaseClient::handle_channels] {} does not implement HandleChannels",
                self.inner.bus_name
            );
            responder.error(not_implemented(HANDLE_CHANNELS));
            return;
        };

        let parts = match self.handle_parts(args) {
            Ok(parts) => parts,
            Err(e) => {
                rtc_debug!(DebugFlags::CLIENT, "[BaseClient::handle_channels] {}", e);
                responder.error(BusError::from(&e));
                return;
            }
        };
        let channels = parts.channels.clone();
        let context = HandleChannelsContext::new(
            responder,
            parts.account,
            parts.connection,
            parts.channels,
            parts.requests,
            parts.user_action_time,
            parts.handler_info,
        );

        let weak = Arc::downgrade(&self.inner);
        context.on_accepted(move || {
            if let Some(inner) = weak.upgrade() {
                BaseClient { inner }.add_handled_channels(&channels);
            }
        });

        let weak = Arc::downgrade(&self.inner);
        context.prepare(
            &self.features(),
            self.inner.factory.channel_factory().as_ref(),
            move |context| {
                let Some(inner) = weak.upgrade() else {
                    return;
                };
                let client = BaseClient { inner };
                implementation(&client, &context);
                context.check_returned(client.bus_name());
            },
        );
    }

    fn handle_parts(&self, args: &[Value]) -> Result<HandleParts> {
        let account_path = object_path_arg(args, 0, HANDLE_CHANNELS)?;
        let connection_path = object_path_arg(args, 1, HANDLE_CHANNELS)?;
        let request_paths = args.get(3).and_then(Value::to_string_vec).unwrap_or_default();
        let user_action_time = args.get(4).and_then(Value::as_i64).unwrap_or(0);
        let handler_info = args.get(5).and_then(Value::as_dict).cloned().unwrap_or_default();

        let factory = &self.inner.factory;
        let account = factory.ensure_account(account_path)?;
        let connection = factory.ensure_connection(connection_path)?;
        let channels = self.channels_arg(&connection, args.get(2))?;

        // requests announced through AddRequest keep their properties
        let pending = self.inner.state.lock().pending_requests.clone();
        let requests = request_paths
            .iter()
            .map(|path| match pending.iter().find(|r| r.object_path() == path) {
                Some(request) => Ok(request.clone()),
                None => ChannelRequest::new(&self.inner.daemon, path, Asv::new()),
            })
            .collect::<Result<Vec<_>>>()?;

        Ok(HandleParts {
            account,
            connection,
            channels,
            requests,
            user_action_time,
            handler_info,
        })
    }

    /// Arguments: `(o request, a{sv} properties)`.
    pub(super) fn add_request(&self, args: &[Value], responder: Responder) {
        if !self.inner.state.lock().request_notification {
            responder.error(not_implemented(ADD_REQUEST));
            return;
        }
        let (account, request) = match self.request_parts(args) {
            Ok(parts) => parts,
            Err(e) => {
                rtc_debug!(DebugFlags::CLIENT, "[BaseClient::add_request] {}", e);
                responder.error(BusError::from(&e));
                return;
            }
        };
        rtc_debug!(
            DebugFlags::CLIENT,
            "[BaseClient::add_request] {} for {}",
            request.object_path(),
            account.object_path()
        );
        self.inner.state.lock().pending_requests.push(request.clone());
        responder.reply(vec![]);

        let features = self.features().account;
        let weak = Arc::downgrade(&self.inner);
        let proxy = Arc::clone(account.proxy());
        proxy.prepare(&features, move |result| {
            if let Err(e) = result {
                log::warn!(
                    "[BaseClient::add_request] failed to prepare account {}: {}",
                    account.object_path(),
                    e
                );
            }
            if let Some(inner) = weak.upgrade() {
                inner.request_added.emit(&(account, request));
            }
        });
    }

    fn request_parts(&self, args: &[Value]) -> Result<(Account, ChannelRequest)> {
        let path = object_path_arg(args, 0, ADD_REQUEST)?;
        let properties = args.get(1).and_then(Value::as_dict).cloned().unwrap_or_default();
        let account_path = properties
            .get_object_path(PROP_CHANNEL_REQUEST_ACCOUNT)
            .map(str::to_owned)
            .ok_or_else(|| invalid_argument("Mandatory 'Account' property is missing"))?;

        let request = ChannelRequest::new(&self.inner.daemon, path, properties)?;
        let account = self.inner.factory.ensure_account(&account_path)?;
        Ok((account, request))
    }

    /// Arguments: `(o request, s error, s message)`.
    pub(super) fn remove_request(&self, args: &[Value], responder: Responder) {
        if !self.inner.state.lock().request_notification {
            responder.error(not_implemented(REMOVE_REQUEST));
            return;
        }
        let path = match object_path_arg(args, 0, REMOVE_REQUEST) {
            Ok(path) => path,
            Err(e) => {
                responder.error(BusError::from(&e));
                return;
            }
        };
        let removed = {
            let mut state = self.inner.state.lock();
            let index = state.pending_requests.iter().position(|r| r.object_path() == path);
            index.map(|i| state.pending_requests.remove(i))
        };
        let Some(request) = removed else {
            rtc_debug!(DebugFlags::CLIENT, "[BaseClient::remove_request] unknown request {}", path);
            responder.error(BusError::from(&invalid_argument("Unknown ChannelRequest")));
            return;
        };

        let error = args.get(1).and_then(Value::as_str).unwrap_or_default().to_owned();
        let message = args.get(2).and_then(Value::as_str).unwrap_or_default().to_owned();
        rtc_debug!(
            DebugFlags::CLIENT,
            "[BaseClient::remove_request] {} removed: {} ({})",
            path,
            error,
            message
        );
        responder.reply(vec![]);
        self.inner.request_removed.emit(&RequestRemoved {
            request,
            error,
            message,
        });
    }
}
