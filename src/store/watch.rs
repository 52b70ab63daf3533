//! Watch registry
//!
//! Path-keyed subscriptions, notified by the store on every successful
//! mutation. Each registered path holds an ordered chain of watches
//! (insertion order, duplicates of distinct identity permitted).
//!
//! ## Firing Order
//!
//! For a mutation at path P: first every watch registered exactly at P, in
//! registration order, then every watch registered on an ancestor of P,
//! ordered from the root down to P's immediate parent. All deliveries carry
//! P, re-spelled per watch into the registering caller's original form.

use std::collections::BTreeMap;
use std::rc::Rc;

use crate::error::{Result, XsError};
use crate::path;
use crate::perms::Caller;

/// Delivery callback: `(path_in_caller_spelling, token)`
///
/// Handler identity (`Rc::ptr_eq`) participates in unwatch matching, so a
/// session should reuse one handler for all of its watches.
pub type WatchHandler = Rc<dyn Fn(&str, &str)>;

/// A single subscription
pub struct Watch {
    /// Caller-supplied opaque token, echoed in every event
    token: String,

    /// Owning domain
    owner: u32,

    /// Byte offset stripped from event paths to recover the caller's
    /// original (possibly relative) spelling
    rel_offset: usize,

    /// Delivery callback
    handler: WatchHandler,
}

impl Watch {
    /// Rebuild a watch without firing it, used by snapshot restore
    pub(crate) fn from_parts(
        token: String,
        owner: u32,
        rel_offset: usize,
        handler: WatchHandler,
    ) -> Self {
        Self {
            token,
            owner,
            rel_offset,
            handler,
        }
    }

    /// The caller-supplied token
    pub fn token(&self) -> &str {
        &self.token
    }

    /// The caller-spelling offset
    pub fn rel_offset(&self) -> usize {
        self.rel_offset
    }

    /// Deliver one event for `event_path`, re-spelled for this watch
    fn deliver(&self, event_path: &str) {
        let spelled = if self.rel_offset < event_path.len() {
            &event_path[self.rel_offset..]
        } else {
            event_path
        };
        (self.handler)(spelled, &self.token);
    }
}

/// Path-keyed watch chains plus per-domain quota accounting
#[derive(Default)]
pub struct WatchRegistry {
    /// Watch chains by absolute (or `@`-special) path
    watches: BTreeMap<String, Vec<Watch>>,

    /// Outstanding watch count per domain
    domain_watches: BTreeMap<u32, usize>,
}

impl WatchRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a subscription and fire its initial event
    ///
    /// The initial event delivers the watched path itself, synchronously,
    /// before this returns. A duplicate (path, token, handler, owner)
    /// registration fails with already-exists; an unprivileged owner at its
    /// watch quota fails with quota-exceeded.
    pub fn register(
        &mut self,
        caller: Caller,
        abs_path: &str,
        rel_offset: usize,
        token: &str,
        handler: WatchHandler,
        max_domain_watches: usize,
    ) -> Result<()> {
        let duplicate = self.watches.get(abs_path).is_some_and(|chain| {
            chain.iter().any(|w| {
                w.owner == caller.domid && w.token == token && Rc::ptr_eq(&w.handler, &handler)
            })
        });
        if duplicate {
            return Err(XsError::AlreadyExists);
        }

        let count = self.domain_watches.entry(caller.domid).or_insert(0);
        if !caller.privileged && *count >= max_domain_watches {
            return Err(XsError::QuotaExceeded("watches".to_string()));
        }
        *count += 1;

        let watch = Watch {
            token: token.to_string(),
            owner: caller.domid,
            rel_offset,
            handler,
        };
        watch.deliver(abs_path);
        self.watches.entry(abs_path.to_string()).or_default().push(watch);
        tracing::trace!("watch registered: domid={} path={}", caller.domid, abs_path);
        Ok(())
    }

    /// Remove a previously registered subscription
    ///
    /// Matching is exact: path, token, handler identity, and owner.
    pub fn unregister(
        &mut self,
        caller: Caller,
        abs_path: &str,
        token: &str,
        handler: &WatchHandler,
    ) -> Result<()> {
        let chain = self.watches.get_mut(abs_path).ok_or(XsError::NotFound)?;
        let idx = chain
            .iter()
            .position(|w| {
                w.owner == caller.domid && w.token == token && Rc::ptr_eq(&w.handler, handler)
            })
            .ok_or(XsError::NotFound)?;
        chain.remove(idx);
        if chain.is_empty() {
            self.watches.remove(abs_path);
        }
        self.decrement(caller.domid);
        Ok(())
    }

    /// Remove every subscription owned by a domain
    pub fn reset_owner(&mut self, owner: u32) {
        self.watches.retain(|_, chain| {
            chain.retain(|w| w.owner != owner);
            !chain.is_empty()
        });
        self.domain_watches.remove(&owner);
    }

    /// Fire all watches matching a mutation at `abs_path`
    pub fn fire_mutation(&self, abs_path: &str) {
        if let Some(chain) = self.watches.get(abs_path) {
            for watch in chain {
                watch.deliver(abs_path);
            }
        }
        for ancestor in path::ancestors_from_root(abs_path) {
            if let Some(chain) = self.watches.get(ancestor) {
                for watch in chain {
                    watch.deliver(abs_path);
                }
            }
        }
    }

    /// Fire watches registered on a `@`-special path
    ///
    /// Special paths bypass canonicalization and never match tree
    /// mutations; the embedder fires them for domain lifecycle events.
    pub fn fire_special(&self, name: &str) {
        debug_assert!(name.starts_with('@'));
        if let Some(chain) = self.watches.get(name) {
            for watch in chain {
                watch.deliver(name);
            }
        }
    }

    /// Outstanding watches for a domain
    pub fn count_for(&self, domid: u32) -> usize {
        self.domain_watches.get(&domid).copied().unwrap_or(0)
    }

    /// Total registered watches
    pub fn len(&self) -> usize {
        self.watches.values().map(Vec::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.watches.is_empty()
    }

    /// Reattach a restored watch without firing its initial event
    pub(crate) fn insert_restored(&mut self, abs_path: String, watch: Watch) {
        *self.domain_watches.entry(watch.owner).or_insert(0) += 1;
        self.watches.entry(abs_path).or_default().push(watch);
    }

    /// Iterate `(path, watch)` pairs, used by the snapshot codec
    pub(crate) fn iter(&self) -> impl Iterator<Item = (&str, &Watch)> {
        self.watches
            .iter()
            .flat_map(|(p, chain)| chain.iter().map(move |w| (p.as_str(), w)))
    }

    fn decrement(&mut self, domid: u32) {
        if let Some(count) = self.domain_watches.get_mut(&domid) {
            *count = count.saturating_sub(1);
            if *count == 0 {
                self.domain_watches.remove(&domid);
            }
        }
    }
}
