// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;

type Hook = Box<dyn FnOnce() + Send>;

struct Inner {
    cancelled: AtomicBool,
    next_id: AtomicU64,
    hooks: Mutex<Vec<(u64, Hook)>>,
}

/// Shared cancellation token.
///
/// Cloning shares the token. Cancelling runs every connected hook once, on
/// the cancelling thread; hooks connected afterwards run immediately.
#[derive(Clone)]
pub struct Cancellable {
    inner: Arc<Inner>,
}

impl Cancellable {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(Inner {
                cancelled: AtomicBool::new(false),
                next_id: AtomicU64::new(1),
                hooks: Mutex::new(Vec::new()),
            }),
        }
    }

    pub fn is_cancelled(&self) -> bool {
        self.inner.cancelled.load(Ordering::Acquire)
    }

    /// Cancel. Idempotent.
    pub fn cancel(&self) {
        if self.inner.cancelled.swap(true, Ordering::AcqRel) {
            return;
        }
        let hooks = std::mem::take(&mut *self.inner.hooks.lock());
        for (_, hook) in hooks {
            hook();
        }
    }

    /// Run `hook` on cancellation. Returns `None` (after running the hook)
    /// if already cancelled.
    pub fn connect<F>(&self, hook: F) -> Option<u64>
    where
        F: FnOnce() + Send + 'static,
    {
        {
            let mut hooks = self.inner.hooks.lock();
            if !self.is_cancelled() {
                let id = self.inner.next_id.fetch_add(1, Ordering::Relaxed);
                hooks.push((id, Box::new(hook)));
                return Some(id);
            }
        }
        hook();
        None
    }

    /// Remove a hook that has not run yet.
    pub fn disconnect(&self, id: u64) {
        let removed: Vec<(u64, Hook)> = {
            let mut hooks = self.inner.hooks.lock();
            let (gone, kept) = std::mem::take(&mut *hooks)
                .into_iter()
                .partition(|(hid, _)| *hid == id);
            *hooks = kept;
            gone
        };
        drop(removed);
    }
}

impl Default for Cancellable {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for Cancellable {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Cancellable")
            .field("cancelled", &self.is_cancelled())
            .finish()
    }
}
