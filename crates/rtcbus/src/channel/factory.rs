// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

use crate::asv::AsvExt;
use crate::config::{
    IFACE_CHANNEL_INTERFACE_GROUP, IFACE_CHANNEL_INTERFACE_MESSAGES, IFACE_CHANNEL_TYPE_TEXT, PROP_CHANNEL_INTERFACES,
    PROP_CHANNEL_TYPE,
};
use crate::connection::Connection;
use crate::error::Result;
use crate::proxy::FeatureId;
use crate::value::Asv;

use super::Channel;

/// Builds channel proxies for dispatch contexts and channel requests, and
/// picks the features they get prepared with.
pub trait ChannelFactory: Send + Sync {
    fn create_channel(&self, connection: &Connection, object_path: &str, immutable: &Asv) -> Result<Channel> {
        Channel::new(connection, object_path, immutable.clone())
    }

    /// Features to prepare on `channel` before handing it out.
    fn channel_features(&self, channel: &Channel) -> Vec<FeatureId> {
        let _ = channel;
        vec![Channel::FEATURE_CORE]
    }
}

/// Prepares what each known capability offers: group membership for
/// groups, pending messages for text channels with Messages.
#[derive(Debug, Default, Clone, Copy)]
pub struct AutomaticChannelFactory;

impl ChannelFactory for AutomaticChannelFactory {
    fn channel_features(&self, channel: &Channel) -> Vec<FeatureId> {
        let props = channel.properties();
        let interfaces = props.get_strv(PROP_CHANNEL_INTERFACES).unwrap_or_default();
        let has = |iface: &str| interfaces.iter().any(|i| i == iface) || channel.proxy().has_interface(iface);

        let mut features = vec![Channel::FEATURE_CORE];
        if has(IFACE_CHANNEL_INTERFACE_GROUP) {
            features.push(Channel::FEATURE_GROUP);
        }
        if props.get_str(PROP_CHANNEL_TYPE) == Some(IFACE_CHANNEL_TYPE_TEXT) && has(IFACE_CHANNEL_INTERFACE_MESSAGES) {
            features.push(Channel::FEATURE_INCOMING_MESSAGES);
        }
        features
    }
}

