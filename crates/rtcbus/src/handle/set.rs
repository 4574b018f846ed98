// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

use std::fmt;
use std::sync::Arc;

use super::{Handle, HandleRepository, HandleResult};
use crate::intset::IntSet;
use crate::logging::DebugFlags;
use crate::rtc_debug;

/// Set of handles from one repository, holding one reference per member.
///
/// Dropping the set releases every reference it still holds.
pub struct HandleSet {
    repo: Arc<HandleRepository>,
    set: IntSet,
}

impl HandleSet {
    pub fn new(repo: Arc<HandleRepository>) -> Self {
        Self {
            repo,
            set: IntSet::new(),
        }
    }

    /// Set holding exactly `handle`.
    pub fn new_containing(repo: Arc<HandleRepository>, handle: Handle) -> HandleResult<Self> {
        let mut set = Self::new(repo);
        set.add(handle)?;
        Ok(set)
    }

    /// Set holding every valid member of `handles`; invalid ones are skipped.
    pub fn from_intset(repo: Arc<HandleRepository>, handles: &IntSet) -> Self {
        let mut set = Self::new(repo);
        set.update(handles);
        set
    }

    pub fn repository(&self) -> &Arc<HandleRepository> {
        &self.repo
    }

    /// Add `handle`, taking a reference if it was not already a member.
    /// Returns whether the set changed.
    pub fn add(&mut self, handle: Handle) -> HandleResult<bool> {
        if self.set.contains(handle) {
            return Ok(false);
        }
        self.repo.ref_handle(handle)?;
        self.set.add(handle);
        Ok(true)
    }

    /// Remove `handle`, releasing its reference. Returns whether it was a member.
    pub fn remove(&mut self, handle: Handle) -> bool {
        if !self.set.remove(handle) {
            return false;
        }
        if let Err(e) = self.repo.unref_handle(handle) {
            log::warn!("[HandleSet::remove] {}", e);
        }
        true
    }

    pub fn is_member(&self, handle: Handle) -> bool {
        self.set.contains(handle)
    }

    pub fn len(&self) -> usize {
        self.set.len()
    }

    pub fn is_empty(&self) -> bool {
        self.set.is_empty()
    }

    /// Members, unspecified order.
    pub fn iter(&self) -> impl Iterator<Item = Handle> + '_ {
        self.set.iter_fast()
    }

    /// Members in ascending order.
    pub fn to_vec(&self) -> Vec<Handle> {
        self.set.to_vec()
    }

    /// Underlying membership.
    pub fn peek(&self) -> &IntSet {
        &self.set
    }

    /// Add every member of `add`. Returns the handles that were newly added;
    /// each of them took one reference.
    pub fn update(&mut self, add: &IntSet) -> IntSet {
        let mut added = IntSet::new();
        for handle in add.iter() {
            if self.set.contains(handle) {
                continue;
            }
            match self.repo.ref_handle(handle) {
                Ok(()) => {
                    self.set.add(handle);
                    added.add(handle);
                }
                Err(e) => rtc_debug!(DebugFlags::HANDLES, "[HandleSet::update] skipping: {}", e),
            }
        }
        added
    }

    /// Remove every member of `remove`. Returns the handles actually removed;
    /// each of them released one reference.
    pub fn difference_update(&mut self, remove: &IntSet) -> IntSet {
        let removed = self.set.intersection(remove);
        for handle in removed.iter() {
            self.remove(handle);
        }
        removed
    }

    /// Release every member.
    pub fn clear(&mut self) {
        let members = std::mem::take(&mut self.set);
        for handle in members.iter() {
            if let Err(e) = self.repo.unref_handle(handle) {
                log::warn!("[HandleSet::clear] {}", e);
            }
        }
    }
}

impl Clone for HandleSet {
    /// The copy takes its own reference on every member.
    fn clone(&self) -> Self {
        HandleSet::from_intset(self.repo.clone(), &self.set)
    }
}

impl Drop for HandleSet {
    fn drop(&mut self) {
        self.clear();
    }
}

impl fmt::Display for HandleSet {
    /// Members as `handle:identifier`, ascending.
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let rendered: Vec<String> = self
            .set
            .iter()
            .map(|h| format!("{}:{}", h, self.repo.inspect(h).unwrap_or_else(|| "?".to_owned())))
            .collect();
        write!(f, "[{}]", rendered.join(", "))
    }
}

impl fmt::Debug for HandleSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HandleSet")
            .field("type", &self.repo.handle_type())
            .field("members", &self.set)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::handle::HandleType;

    fn repo() -> Arc<HandleRepository> {
        Arc::new(HandleRepository::new("/test", HandleType::Contact))
    }

    #[test]
    fn adding_twice_takes_one_ref() {
        let repo = repo();
        let h = repo.ensure("alice").expect("valid");
        let mut set = HandleSet::new(repo.clone());
        assert_eq!(set.add(h), Ok(true));
        assert_eq!(set.add(h), Ok(false));
        assert_eq!(repo.refcount(h), 2);
        drop(set);
        assert_eq!(repo.refcount(h), 1);
    }

    #[test]
    fn invalid_handles_are_rejected() {
        let mut set = HandleSet::new(repo());
        assert!(set.add(99).is_err());
        assert!(set.is_empty());
    }

    #[test]
    fn update_and_difference_report_changes() {
        let repo = repo();
        let a = repo.ensure("a").expect("valid");
        let b = repo.ensure("b").expect("valid");
        let mut set = HandleSet::new_containing(repo.clone(), a).expect("valid");

        let added = set.update(&IntSet::from_slice(&[a, b, 404]));
        assert_eq!(added.to_vec(), vec![b]);
        assert_eq!(repo.refcount(b), 2);

        let removed = set.difference_update(&IntSet::from_slice(&[a, 404]));
        assert_eq!(removed.to_vec(), vec![a]);
        assert_eq!(repo.refcount(a), 1);
        assert_eq!(set.to_vec(), vec![b]);
    }

    #[test]
    fn clone_takes_its_own_refs() {
        let repo = repo();
        let a = repo.ensure("a").expect("valid");
        let set = HandleSet::new_containing(repo.clone(), a).expect("valid");
        let copy = set.clone();
        assert_eq!(repo.refcount(a), 3);
        drop(set);
        assert!(copy.is_member(a));
        assert_eq!(repo.refcount(a), 2);
        assert_eq!(copy.to_string(), format!("[{}:a]", a));
    }
}
