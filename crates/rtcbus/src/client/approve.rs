// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! `Client.Approver.AddDispatchOperation`.

use std::sync::Arc;

use crate::account::Account;
use crate::asv::AsvExt;
use crate::bus::{BusError, Responder};
use crate::channel::Channel;
use crate::channel_dispatch_operation::ChannelDispatchOperation;
use crate::config::{PROP_DISPATCH_OPERATION_ACCOUNT, PROP_DISPATCH_OPERATION_CONNECTION};
use crate::connection::Connection;
use crate::error::Result;
use crate::logging::DebugFlags;
use crate::rtc_debug;
use crate::value::Value;

use super::{invalid_argument, not_implemented, object_path_arg, ApproveChannelsContext, BaseClient};

const METHOD: &str = "AddDispatchOperation";

type ApproveParts = (Account, Connection, Vec<Channel>, ChannelDispatchOperation);

impl BaseClient {
    /// Arguments: `(a(oa{sv}) channels, o dispatch_operation, a{sv} properties)`.
    pub(super) fn add_dispatch_operation(&self, args: &[Value], responder: Responder) {
        let (is_approver, implementation) = {
            let state = self.inner.state.lock();
            (state.is_approver, state.approve_impl.clone())
        };
        if !is_approver {
            responder.error(not_implemented(METHOD));
            return;
        }
        let Some(implementation) = implementation else {
            log::warn!(
                "[BaseClient::add_dispatch_operation] {} does not implement AddDispatchOperation",
                self.inner.bus_name
            );
            responder.error(not_implemented(METHOD));
            return;
        };

        let context = match self.approve_parts(args) {
            Ok((account, connection, channels, operation)) => {
                ApproveChannelsContext::new(responder, account, connection, channels, operation)
            }
            Err(e) => {
                rtc_debug!(DebugFlags::CLIENT, "[BaseClient::add_dispatch_operation] {}", e);
                responder.error(BusError::from(&e));
                return;
            }
        };

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

    fn approve_parts(&self, args: &[Value]) -> Result<ApproveParts> {
        let path = object_path_arg(args, 1, METHOD)?;
        let properties = args.get(2).and_then(Value::as_dict).cloned().unwrap_or_default();

        let account_path = properties
            .get_object_path(PROP_DISPATCH_OPERATION_ACCOUNT)
            .ok_or_else(|| invalid_argument("Properties doesn't contain 'Account'"))?;
        let connection_path = properties
            .get_object_path(PROP_DISPATCH_OPERATION_CONNECTION)
            .ok_or_else(|| invalid_argument("Properties doesn't contain 'Connection'"))?;

        let factory = &self.inner.factory;
        let account = factory.ensure_account(account_path)?;
        let connection = factory.ensure_connection(connection_path)?;
        let channels = self.channels_arg(&connection, args.first())?;

        let operation = ChannelDispatchOperation::with_objects(
            &self.inner.daemon,
            path,
            &properties,
            account.clone(),
            connection.clone(),
            channels.clone(),
        )?;
        Ok((account, connection, channels, operation))
    }
}
