// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

use std::collections::HashMap;
use std::sync::{Arc, OnceLock, Weak};

use dashmap::DashMap;
use parking_lot::Mutex;

use super::{normalize, Handle, HandleError, HandleResult, HandleType};
use crate::logging::DebugFlags;
use crate::rtc_debug;

type RepoKey = (String, HandleType);

static REPOSITORIES: OnceLock<DashMap<RepoKey, Weak<HandleRepository>>> = OnceLock::new();

fn registry() -> &'static DashMap<RepoKey, Weak<HandleRepository>> {
    REPOSITORIES.get_or_init(DashMap::new)
}

struct Entry {
    id: String,
    refcount: u32,
}

#[derive(Default)]
struct Inner {
    next_handle: Handle,
    by_handle: HashMap<Handle, Entry>,
    by_id: HashMap<String, Handle>,
}

/// Refcounted handle table for one (connection, handle type) pair.
pub struct HandleRepository {
    owner: String,
    handle_type: HandleType,
    inner: Mutex<Inner>,
}

impl HandleRepository {
    /// Get the repository for `owner` (a connection object path) and
    /// `handle_type`, creating it if no live one exists.
    ///
    /// The registry only holds weak references: the repository goes away when
    /// the last connection and handle set using it are dropped.
    pub fn for_connection(owner: &str, handle_type: HandleType) -> HandleResult<Arc<Self>> {
        if handle_type == HandleType::None {
            return Err(HandleError::UnsupportedType(handle_type));
        }
        let key = (owner.to_owned(), handle_type);
        let mut slot = registry().entry(key).or_default();
        if let Some(repo) = slot.upgrade() {
            return Ok(repo);
        }
        let repo = Arc::new(Self::new(owner, handle_type));
        *slot = Arc::downgrade(&repo);
        rtc_debug!(
            DebugFlags::HANDLES,
            "[HandleRepository::for_connection] new {} repository for {}",
            handle_type,
            owner
        );
        Ok(repo)
    }

    /// Standalone repository, not shared through the process registry.
    pub fn new(owner: &str, handle_type: HandleType) -> Self {
        Self {
            owner: owner.to_owned(),
            handle_type,
            inner: Mutex::new(Inner {
                next_handle: 1,
                ..Default::default()
            }),
        }
    }

    pub fn owner(&self) -> &str {
        &self.owner
    }

    pub fn handle_type(&self) -> HandleType {
        self.handle_type
    }

    pub fn normalize(&self, id: &str) -> HandleResult<String> {
        normalize(self.handle_type, id)
    }

    fn invalid(&self, handle: Handle) -> HandleError {
        HandleError::InvalidHandle {
            handle_type: self.handle_type,
            handle,
        }
    }

    /// Handle for `id`, allocating one if needed. Takes one reference.
    pub fn ensure(&self, id: &str) -> HandleResult<Handle> {
        let normalized = self.normalize(id)?;
        let mut inner = self.inner.lock();
        let existing = inner.by_id.get(&normalized).copied();
        if let Some(handle) = existing {
            if let Some(entry) = inner.by_handle.get_mut(&handle) {
                entry.refcount += 1;
            }
            return Ok(handle);
        }
        let mut handle = inner.next_handle;
        while handle == 0 || inner.by_handle.contains_key(&handle) {
            handle = handle.wrapping_add(1);
        }
        inner.next_handle = handle.wrapping_add(1);
        inner.by_id.insert(normalized.clone(), handle);
        inner.by_handle.insert(
            handle,
            Entry {
                id: normalized,
                refcount: 1,
            },
        );
        Ok(handle)
    }

    /// Register a handle assigned elsewhere (by the remote connection) for
    /// `id`. Takes one reference.
    pub fn hold(&self, handle: Handle, id: &str) -> HandleResult<()> {
        if handle == 0 {
            return Err(self.invalid(handle));
        }
        let normalized = self.normalize(id)?;
        let mut inner = self.inner.lock();
        if let Some(entry) = inner.by_handle.get_mut(&handle) {
            if entry.id != normalized {
                return Err(HandleError::Inconsistent {
                    handle_type: self.handle_type,
                    handle,
                    existing: entry.id.clone(),
                    id: normalized,
                });
            }
            entry.refcount += 1;
            return Ok(());
        }
        if let Some(&other) = inner.by_id.get(&normalized) {
            return Err(HandleError::Inconsistent {
                handle_type: self.handle_type,
                handle: other,
                existing: normalized.clone(),
                id: normalized,
            });
        }
        inner.by_id.insert(normalized.clone(), handle);
        inner.by_handle.insert(
            handle,
            Entry {
                id: normalized,
                refcount: 1,
            },
        );
        Ok(())
    }

    /// Existing handle for `id`, without taking a reference.
    pub fn lookup(&self, id: &str) -> Option<Handle> {
        let normalized = self.normalize(id).ok()?;
        self.inner.lock().by_id.get(&normalized).copied()
    }

    /// Normalized identifier of `handle`.
    pub fn inspect(&self, handle: Handle) -> Option<String> {
        self.inner.lock().by_handle.get(&handle).map(|e| e.id.clone())
    }

    pub fn is_valid(&self, handle: Handle) -> bool {
        self.inner.lock().by_handle.contains_key(&handle)
    }

    /// Current reference count, 0 for unknown handles.
    pub fn refcount(&self, handle: Handle) -> u32 {
        self.inner
            .lock()
            .by_handle
            .get(&handle)
            .map_or(0, |e| e.refcount)
    }

    /// Number of live handles.
    pub fn len(&self) -> usize {
        self.inner.lock().by_handle.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Take one more reference on an existing handle.
    pub fn ref_handle(&self, handle: Handle) -> HandleResult<()> {
        let mut inner = self.inner.lock();
        match inner.by_handle.get_mut(&handle) {
            Some(entry) => {
                entry.refcount += 1;
                Ok(())
            }
            None => Err(self.invalid(handle)),
        }
    }

    /// Release one reference. The identifier is forgotten when the count
    /// reaches zero.
    pub fn unref_handle(&self, handle: Handle) -> HandleResult<()> {
        let mut inner = self.inner.lock();
        let Some(entry) = inner.by_handle.get_mut(&handle) else {
            return Err(self.invalid(handle));
        };
        entry.refcount -= 1;
        if entry.refcount == 0 {
            if let Some(entry) = inner.by_handle.remove(&handle) {
                inner.by_id.remove(&entry.id);
                rtc_debug!(
                    DebugFlags::HANDLES,
                    "[HandleRepository::unref_handle] freed {} handle {} ({})",
                    self.handle_type,
                    handle,
                    entry.id
                );
            }
        }
        Ok(())
    }
}

impl Drop for HandleRepository {
    fn drop(&mut self) {
        // the slot may already hold a live successor
        let key = (std::mem::take(&mut self.owner), self.handle_type);
        registry().remove_if(&key, |_, weak| weak.strong_count() == 0);
    }
}

impl std::fmt::Debug for HandleRepository {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HandleRepository")
            .field("owner", &self.owner)
            .field("handle_type", &self.handle_type)
            .field("handles", &self.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ensure_is_idempotent_per_identifier() {
        let repo = HandleRepository::new("/conn", HandleType::Contact);
        let a = repo.ensure("Alice@x").expect("valid id");
        let b = repo.ensure("alice@x/phone").expect("valid id");
        assert_eq!(a, b);
        assert_eq!(repo.refcount(a), 2);
        assert_eq!(repo.inspect(a).as_deref(), Some("alice@x"));
        assert_eq!(repo.lookup("ALICE@X"), Some(a));
    }

    #[test]
    fn unref_to_zero_frees() {
        let repo = HandleRepository::new("/conn", HandleType::Room);
        let h = repo.ensure("lobby").expect("valid id");
        repo.unref_handle(h).expect("held");
        assert!(!repo.is_valid(h));
        assert_eq!(repo.lookup("lobby"), None);
        assert!(repo.unref_handle(h).is_err());
    }

    #[test]
    fn hold_checks_consistency() {
        let repo = HandleRepository::new("/conn", HandleType::Contact);
        repo.hold(7, "alice").expect("new handle");
        repo.hold(7, "Alice").expect("same identity");
        assert_eq!(repo.refcount(7), 2);
        assert!(matches!(repo.hold(7, "bob"), Err(HandleError::Inconsistent { .. })));
        assert!(matches!(repo.hold(8, "alice"), Err(HandleError::Inconsistent { .. })));
        assert!(repo.hold(0, "zero").is_err());
    }

    #[test]
    fn registry_shares_live_repositories() {
        let a = HandleRepository::for_connection("/repo/shared", HandleType::List).expect("list repo");
        let b = HandleRepository::for_connection("/repo/shared", HandleType::List).expect("list repo");
        assert!(Arc::ptr_eq(&a, &b));
        let other = HandleRepository::for_connection("/repo/shared", HandleType::Group).expect("group repo");
        assert!(!Arc::ptr_eq(&a, &other));
        drop((a, b));
        assert!(HandleRepository::for_connection("/repo/x", HandleType::None).is_err());
    }

    #[test]
    fn registry_forgets_dropped_repositories() {
        let key = |i: usize| (format!("/repo/dropped{}", i), HandleType::Contact);
        for i in 0..100 {
            let repo = HandleRepository::for_connection(&key(i).0, HandleType::Contact).expect("contact repo");
            assert!(registry().contains_key(&key(i)));
            drop(repo);
        }
        assert!((0..100).all(|i| !registry().contains_key(&key(i))));

        let kept = HandleRepository::for_connection("/repo/kept", HandleType::Contact).expect("contact repo");
        drop(HandleRepository::new("/repo/kept", HandleType::Contact));
        let again = HandleRepository::for_connection("/repo/kept", HandleType::Contact).expect("contact repo");
        assert!(Arc::ptr_eq(&kept, &again));
    }
}
