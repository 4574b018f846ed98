// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

use std::fmt;

use crate::connection::Connection;
use crate::handle::Handle;

/// A remote contact on one connection.
///
/// Holds one reference on its contact handle for as long as it lives; clones
/// take their own reference.
pub struct Contact {
    connection: Connection,
    handle: Handle,
    identifier: String,
}

impl Contact {
    /// Wrap a handle whose reference the caller already took.
    pub(crate) fn new_held(connection: Connection, handle: Handle, identifier: String) -> Self {
        Self {
            connection,
            handle,
            identifier,
        }
    }

    pub fn connection(&self) -> &Connection {
        &self.connection
    }

    pub fn handle(&self) -> Handle {
        self.handle
    }

    /// Normalized identifier (e.g. a JID).
    pub fn identifier(&self) -> &str {
        &self.identifier
    }
}

impl Clone for Contact {
    fn clone(&self) -> Self {
        // the handle stays valid while self holds it
        let _ = self.connection.contact_repository().ref_handle(self.handle);
        Self {
            connection: self.connection.clone(),
            handle: self.handle,
            identifier: self.identifier.clone(),
        }
    }
}

impl Drop for Contact {
    fn drop(&mut self) {
        let _ = self.connection.contact_repository().unref_handle(self.handle);
    }
}

impl PartialEq for Contact {
    fn eq(&self, other: &Self) -> bool {
        self.handle == other.handle && self.connection == other.connection
    }
}

impl fmt::Debug for Contact {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Contact")
            .field("handle", &self.handle)
            .field("identifier", &self.identifier)
            .field("connection", &self.connection.object_path())
            .finish()
    }
}
