// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! `Client.Observer.ObserveChannels`.
//!
//! Arguments: `(o account, o connection, a(oa{sv}) channels,
//! o dispatch_operation, ao requests_satisfied, a{sv} observer_info)`.
//! A dispatch operation of `/` means the channels are not being
//! dispatched to approvers.

use crate::account::Account;
use crate::asv::AsvExt;
use crate::bus::{BusError, Responder};
use crate::channel::Channel;
use crate::channel_dispatch_operation::ChannelDispatchOperation;
use crate::channel_request::ChannelRequest;
use crate::config::NULL_OBJECT_PATH;
use crate::connection::Connection;
use crate::error::Result;
use crate::logging::DebugFlags;
use crate::rtc_debug;
use crate::value::{Asv, Value};

use super::{invalid_argument, not_implemented, object_path_arg, BaseClient, ObserveChannelsContext};

const METHOD: &str = "ObserveChannels";

struct ObserveParts {
    account: Account,
    connection: Connection,
    channels: Vec<Channel>,
    dispatch_operation: Option<ChannelDispatchOperation>,
    requests: Vec<ChannelRequest>,
    observer_info: Asv,
}

impl BaseClient {
    pub(super) fn observe_channels(&self, args: &[Value], responder: Responder) {
        let (is_observer, implementation) = {
            let state = self.inner.state.lock();
            (state.is_observer, state.observe_impl.clone())
        };
        if !is_observer {
            responder.error(not_implemented(METHOD));
            return;
        }
        let Some(implementation) = implementation else {
            log::warn!(
                "[BaseClient::observe_channels] {} does not implement ObserveChannels",
                self.inner.bus_name
            );
            responder.error(not_implemented(METHOD));
            return;
        };

        let parts = match self.observe_parts(args) {
            Ok(parts) => parts,
            Err(e) => {
                rtc_debug!(DebugFlags::CLIENT, "[BaseClient::observe_channels] {}", e);
                responder.error(BusError::from(&e));
                return;
            }
        };
        let context = ObserveChannelsContext::new(
            responder,
            parts.account,
            parts.connection,
            parts.channels,
            parts.dispatch_operation,
            parts.requests,
            parts.observer_info,
        );

        context.queue_prepare(&self.features(), self.inner.factory.channel_factory().as_ref());
        implementation(self, &context);
        context.check_returned(&self.inner.bus_name);
    }

    fn observe_parts(&self, args: &[Value]) -> Result<ObserveParts> {
        let account_path = object_path_arg(args, 0, METHOD)?;
        let connection_path = object_path_arg(args, 1, METHOD)?;
        let dispatch_operation_path = object_path_arg(args, 3, METHOD)?;
        let request_paths = args.get(4).and_then(Value::to_string_vec).unwrap_or_default();
        let observer_info = args.get(5).and_then(Value::as_dict).cloned().unwrap_or_default();

        if args.get(2).and_then(Value::as_array).map_or(true, <[Value]>::is_empty) {
            return Err(invalid_argument("Channels should contain at least one channel"));
        }
        let factory = &self.inner.factory;
        let account = factory.ensure_account(account_path)?;
        let connection = factory.ensure_connection(connection_path)?;
        let channels = self.channels_arg(&connection, args.get(2))?;

        let dispatch_operation = if dispatch_operation_path == NULL_OBJECT_PATH {
            None
        } else {
            // share the observed proxies; only PossibleHandlers is fetched
            Some(ChannelDispatchOperation::with_objects(
                &self.inner.daemon,
                dispatch_operation_path,
                &Asv::new(),
                account.clone(),
                connection.clone(),
                channels.clone(),
            )?)
        };

        // immutable request properties may come along in the observer info
        let request_props = observer_info.get_asv("request-properties").cloned().unwrap_or_default();
        let requests = request_paths
            .iter()
            .map(|path| {
                let props = request_props.get_asv(path).cloned().unwrap_or_default();
                ChannelRequest::new(&self.inner.daemon, path, props)
            })
            .collect::<Result<Vec<_>>>()?;

        Ok(ObserveParts {
            account,
            connection,
            channels,
            dispatch_operation,
            requests,
            observer_info,
        })
    }
}
