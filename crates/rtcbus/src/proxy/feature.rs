// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Declarative readiness ("features").
//!
//! Each [`ProxyClass`](super::ProxyClass) declares features: a name, whether
//! it is core (always requested), the features it depends on, and an
//! optional prepare function. A feature without a prepare function is driven
//! by its owner through [`Proxy::set_feature_prepared`].
//!
//! ```text
//! Unrequested --prepare()--> Preparing --succeed--> Prepared
//!                                |
//!                                +--fail / dep unavailable / unknown--> Unavailable
//! ```
//!
//! States only move forward. A `prepare()` request completes once every
//! requested feature (plus core features and dependencies) is terminal;
//! it fails only if the proxy is invalidated first.

use std::collections::{HashMap, HashSet};
use std::fmt;
use std::future::Future;
use std::sync::{Arc, Weak};

use super::Proxy;
use crate::error::{ErrorKind, ProxyError, Result};
use crate::logging::DebugFlags;
use crate::{programming_error, rtc_debug};

/// Feature name. Compared by value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct FeatureId(pub &'static str);

impl fmt::Display for FeatureId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.0)
    }
}

/// Starts preparing a feature. Must eventually consume the completer.
pub type PrepareFn = fn(&Arc<Proxy>, FeatureCompleter);

/// Notified when a `prepare()` request completes.
pub type PrepareCallback = Box<dyn FnOnce(Result<()>) + Send>;

/// Static feature declaration.
#[derive(Debug, Clone, Copy)]
pub struct Feature {
    pub id: FeatureId,
    pub core: bool,
    pub depends_on: &'static [FeatureId],
    pub prepare: Option<PrepareFn>,
}

impl Feature {
    pub const fn core(id: FeatureId, prepare: PrepareFn) -> Self {
        Self {
            id,
            core: true,
            depends_on: &[],
            prepare: Some(prepare),
        }
    }

    pub const fn optional(id: FeatureId, depends_on: &'static [FeatureId], prepare: Option<PrepareFn>) -> Self {
        Self {
            id,
            core: false,
            depends_on,
            prepare,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FeatureState {
    Unrequested,
    Preparing,
    Prepared,
    Unavailable,
}

impl FeatureState {
    pub fn is_terminal(self) -> bool {
        matches!(self, FeatureState::Prepared | FeatureState::Unavailable)
    }
}

struct Waiter {
    features: Vec<FeatureId>,
    callback: PrepareCallback,
}

#[derive(Default)]
pub(crate) struct FeatureTable {
    states: HashMap<FeatureId, FeatureState>,
    started: HashSet<FeatureId>,
    waiters: Vec<Waiter>,
}

impl FeatureTable {
    fn state(&self, id: FeatureId) -> FeatureState {
        self.states.get(&id).copied().unwrap_or(FeatureState::Unrequested)
    }

    /// Move `id` forward; terminal states never change.
    fn advance(&mut self, id: FeatureId, next: FeatureState) -> bool {
        let current = self.state(id);
        if current.is_terminal() || current == next {
            return false;
        }
        self.states.insert(id, next);
        true
    }

    pub(crate) fn take_waiters(&mut self) -> Vec<PrepareCallback> {
        std::mem::take(&mut self.waiters)
            .into_iter()
            .map(|w| w.callback)
            .collect()
    }
}

/// One-shot completion of a feature's preparation.
///
/// Dropping it without calling [`succeed`](Self::succeed) or
/// [`fail`](Self::fail) marks the feature unavailable.
pub struct FeatureCompleter {
    proxy: Weak<Proxy>,
    feature: FeatureId,
    done: bool,
}

impl FeatureCompleter {
    pub(crate) fn new(proxy: &Arc<Proxy>, feature: FeatureId) -> Self {
        Self {
            proxy: Arc::downgrade(proxy),
            feature,
            done: false,
        }
    }

    pub fn feature(&self) -> FeatureId {
        self.feature
    }

    pub fn succeed(mut self) {
        self.finish(FeatureState::Prepared);
    }

    pub fn fail(mut self, reason: &ProxyError) {
        rtc_debug!(
            DebugFlags::FEATURES,
            "[FeatureCompleter::fail] {}: {}",
            self.feature,
            reason
        );
        self.finish(FeatureState::Unavailable);
    }

    fn finish(&mut self, state: FeatureState) {
        self.done = true;
        if let Some(proxy) = self.proxy.upgrade() {
            proxy.complete_feature(self.feature, state);
        }
    }
}

impl Drop for FeatureCompleter {
    fn drop(&mut self) {
        if !self.done {
            programming_error!(
                "[FeatureCompleter::drop] {} dropped without completing",
                self.feature
            );
            self.finish(FeatureState::Unavailable);
        }
    }
}

impl fmt::Debug for FeatureCompleter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FeatureCompleter")
            .field("feature", &self.feature)
            .finish()
    }
}

impl Proxy {
    pub fn feature_state(&self, feature: FeatureId) -> FeatureState {
        self.state.lock().features.state(feature)
    }

    /// True once `feature` finished preparing successfully.
    pub fn is_prepared(&self, feature: FeatureId) -> bool {
        self.feature_state(feature) == FeatureState::Prepared
    }

    /// Prepare `features`, the class's core features and their dependencies.
    ///
    /// `callback` runs once: `Ok` when every one of them is prepared or
    /// unavailable, `Err` if the proxy is invalidated first. If everything
    /// is already terminal the callback runs before this returns.
    pub fn prepare<F>(self: &Arc<Self>, features: &[FeatureId], callback: F)
    where
        F: FnOnce(Result<()>) + Send + 'static,
    {
        let waiter = Waiter {
            features: self.expand_features(features),
            callback: Box::new(callback),
        };
        let rejected = {
            let mut state = self.state.lock();
            match &state.invalidated {
                Some(error) => Some((error.clone(), waiter)),
                None => {
                    for id in &waiter.features {
                        if state.features.state(*id) == FeatureState::Unrequested {
                            state.features.states.insert(*id, FeatureState::Preparing);
                        }
                    }
                    state.features.waiters.push(waiter);
                    None
                }
            }
        };
        if let Some((error, waiter)) = rejected {
            rtc_debug!(
                DebugFlags::FEATURES,
                "[Proxy::prepare] {:?} on invalidated proxy: {}",
                features,
                error
            );
            (waiter.callback)(Err(error));
            return;
        }
        self.drive_features();
    }

    /// Future form of [`prepare`](Self::prepare).
    pub fn prepare_async(
        self: &Arc<Self>,
        features: &[FeatureId],
    ) -> impl Future<Output = Result<()>> + Send + 'static {
        let (tx, rx) = tokio::sync::oneshot::channel();
        self.prepare(features, move |result| {
            let _ = tx.send(result);
        });
        async move {
            match rx.await {
                Ok(result) => result,
                Err(_) => Err(ProxyError::proxy(
                    ErrorKind::ProxyUnreferenced,
                    "Proxy dropped while preparing features",
                )),
            }
        }
    }

    /// Complete a feature that has no prepare function.
    pub fn set_feature_prepared(self: &Arc<Self>, feature: FeatureId, prepared: bool) {
        let state = if prepared {
            FeatureState::Prepared
        } else {
            FeatureState::Unavailable
        };
        self.complete_feature(feature, state);
    }

    fn complete_feature(self: &Arc<Self>, feature: FeatureId, next: FeatureState) {
        let changed = self.state.lock().features.advance(feature, next);
        if changed {
            rtc_debug!(
                DebugFlags::FEATURES,
                "[Proxy::complete_feature] {} {}: {:?}",
                self.object_path(),
                feature,
                next
            );
            self.drive_features();
        }
    }

    /// Core features plus `requested`, dependencies first.
    fn expand_features(&self, requested: &[FeatureId]) -> Vec<FeatureId> {
        fn visit(class: &'static super::ProxyClass, id: FeatureId, out: &mut Vec<FeatureId>, seen: &mut HashSet<FeatureId>) {
            if !seen.insert(id) {
                return;
            }
            if let Some(feature) = class.find_feature(id) {
                for dep in feature.depends_on {
                    visit(class, *dep, out, seen);
                }
            }
            out.push(id);
        }

        let mut out = Vec::new();
        let mut seen = HashSet::new();
        for id in self.class.core_features().into_iter().chain(requested.iter().copied()) {
            visit(self.class, id, &mut out, &mut seen);
        }
        out
    }

    /// Start whatever is ready and complete whatever waiters are done, until
    /// nothing changes. No lock is held while prepare functions or waiter
    /// callbacks run.
    fn drive_features(self: &Arc<Self>) {
        loop {
            let (to_start, done) = {
                let mut state = self.state.lock();
                if state.invalidated.is_some() {
                    return;
                }
                let table = &mut state.features;
                let preparing: Vec<FeatureId> = table
                    .states
                    .iter()
                    .filter(|(_, s)| **s == FeatureState::Preparing)
                    .map(|(id, _)| *id)
                    .collect();

                let mut to_start = Vec::new();
                let mut changed = true;
                while changed {
                    changed = false;
                    for id in &preparing {
                        if table.state(*id) != FeatureState::Preparing || table.started.contains(id) {
                            continue;
                        }
                        let Some(feature) = self.class.find_feature(*id) else {
                            programming_error!(
                                "[Proxy::prepare] {} has no feature '{}'",
                                self.class.name,
                                id
                            );
                            table.advance(*id, FeatureState::Unavailable);
                            changed = true;
                            continue;
                        };
                        let deps: Vec<FeatureState> =
                            feature.depends_on.iter().map(|d| table.state(*d)).collect();
                        if deps.contains(&FeatureState::Unavailable) {
                            table.advance(*id, FeatureState::Unavailable);
                            changed = true;
                        } else if deps.iter().all(|s| *s == FeatureState::Prepared) {
                            table.started.insert(*id);
                            if let Some(prepare) = feature.prepare {
                                to_start.push((*id, prepare));
                            }
                        }
                    }
                }

                let (done, pending): (Vec<Waiter>, Vec<Waiter>) = std::mem::take(&mut table.waiters)
                    .into_iter()
                    .partition(|w| w.features.iter().all(|f| table.state(*f).is_terminal()));
                table.waiters = pending;
                (to_start, done)
            };

            if to_start.is_empty() && done.is_empty() {
                break;
            }
            for (id, prepare) in to_start {
                rtc_debug!(
                    DebugFlags::FEATURES,
                    "[Proxy::drive_features] preparing {} on {}",
                    id,
                    self.object_path()
                );
                prepare(self, FeatureCompleter::new(self, id));
            }
            for waiter in done {
                (waiter.callback)(Ok(()));
            }
        }
    }
}
