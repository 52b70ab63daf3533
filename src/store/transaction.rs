//! Transaction Manager
//!
//! An open transaction is an isolated, point-in-time view of the store:
//! `begin` clones one `Rc` to the live root (no data copy; isolation comes
//! from the COW discipline) plus the quota counters. Mutations through the
//! transaction are invisible to the live store and to every other
//! transaction until commit.
//!
//! ## Conflict Policy
//!
//! Commit succeeds only if no path the transaction touched (read or
//! written) is prefix-related to a live mutation recorded since `begin`.
//! This is deliberately coarse: any intervening external write to the
//! affected region fails the commit, not just byte-overlapping writes.
//! On success the recorded mutations are replayed onto the current live
//! tree, so unrelated live writes made while the transaction was open
//! survive the commit; watches fire once per replayed mutation, the same
//! way the operations would have fired had they run live.

use std::collections::{BTreeMap, BTreeSet};
use std::rc::Rc;

use crate::error::{Result, XsError};
use crate::path;
use crate::perms::Caller;
use crate::store::node::Node;
use crate::store::tree::{lookup, remove_in, set_perms_in, write_in, Store, TreeView, WriteMode};

/// An isolated snapshot of the store under mutation
pub struct Transaction {
    /// Caller-visible id; never 0 (the "no transaction" sentinel)
    pub(crate) id: u32,

    /// Owning domain; only the owner (or a privileged caller) may operate
    /// on or end the transaction
    pub(crate) owner: u32,

    /// Private root, forked from the live root at `begin`
    pub(crate) root: Rc<Node>,

    /// Live generation the transaction forked from
    pub(crate) base_generation: u64,

    /// Private node count for in-transaction quota checks
    pub(crate) nr_nodes: usize,

    /// Private per-domain node counts
    pub(crate) domain_nodes: BTreeMap<u32, usize>,

    /// Every path touched (read or written) through this transaction
    pub(crate) accessed: BTreeSet<String>,

    /// Paths of successful mutations, in operation order; replayed onto
    /// the live tree (and fed to the conflict log) on commit
    pub(crate) written: Vec<String>,
}

impl Transaction {
    /// The caller-visible id
    pub fn id(&self) -> u32 {
        self.id
    }

    /// The owning domain
    pub fn owner(&self) -> u32 {
        self.owner
    }

    pub(crate) fn note_access(&mut self, abs_path: &str) {
        self.accessed.insert(abs_path.to_string());
    }

    pub(crate) fn note_write(&mut self, abs_path: &str) {
        self.written.push(abs_path.to_string());
    }
}

impl Store {
    // =========================================================================
    // Transaction Operations
    // =========================================================================

    /// Open a transaction and return its id
    pub fn transaction_start(&mut self, caller: Caller) -> Result<u32> {
        let count = self
            .domain_transactions
            .entry(caller.domid)
            .or_insert(0);
        if !caller.privileged && *count >= self.config.max_domain_transactions {
            return Err(XsError::QuotaExceeded("transactions".to_string()));
        }
        *count += 1;

        // Allocate an id, skipping 0 and ids still in use (resolved ids
        // may be reused)
        loop {
            self.next_tx_id = self.next_tx_id.wrapping_add(1);
            if self.next_tx_id != 0 && !self.transactions.contains_key(&self.next_tx_id) {
                break;
            }
        }
        let id = self.next_tx_id;

        let tx = Transaction {
            id,
            owner: caller.domid,
            root: Rc::clone(&self.root),
            base_generation: self.generation,
            nr_nodes: self.nr_nodes,
            domain_nodes: self.domain_nodes.clone(),
            accessed: BTreeSet::new(),
            written: Vec::new(),
        };
        self.transactions.insert(id, tx);
        tracing::debug!("transaction {} started by domid {}", id, caller.domid);
        Ok(id)
    }

    /// Resolve a transaction: commit its effects or discard them
    ///
    /// Abort always succeeds. Commit fails with a conflict (and still
    /// discards the transaction) if live mutations since `begin` overlap
    /// the paths the transaction touched. Either way the id becomes
    /// invalid and may be reused.
    pub fn transaction_end(&mut self, caller: Caller, id: u32, commit: bool) -> Result<()> {
        {
            let tx = self.transactions.get(&id).ok_or(XsError::NotFound)?;
            if tx.owner != caller.domid && !caller.privileged {
                return Err(XsError::PermissionDenied);
            }
        }
        let tx = self
            .transactions
            .remove(&id)
            .expect("presence checked above");

        if let Some(count) = self.domain_transactions.get_mut(&tx.owner) {
            *count = count.saturating_sub(1);
            if *count == 0 {
                self.domain_transactions.remove(&tx.owner);
            }
        }

        if !commit {
            tracing::debug!("transaction {} aborted", id);
            self.prune_mutation_log();
            return Ok(());
        }

        if self.conflicts(&tx) {
            tracing::debug!("transaction {} commit lost the race", id);
            self.prune_mutation_log();
            return Err(XsError::Conflict);
        }

        // Replay the recorded mutations onto the current live tree. The
        // conflict check guarantees every replayed region is unchanged
        // since the fork, so terminal state can be grafted straight from
        // the private tree; live mutations elsewhere stay intact. Each
        // replayed path fires its watches the same way the operation
        // would have fired live, including writes that stored the bytes
        // already present.
        let config = self.config.clone();
        let replayer = Caller::privileged(tx.owner);
        let mut events = Vec::new();
        {
            let mut view = TreeView {
                root: &mut self.root,
                nr_nodes: &mut self.nr_nodes,
                domain_nodes: &mut self.domain_nodes,
            };
            for path in &tx.written {
                match lookup(&tx.root, path) {
                    Ok(node) => {
                        let content = node.content().to_vec();
                        let perms = node.perms().to_vec();
                        write_in(&mut view, replayer, path, &content, WriteMode::Write, &config)?;
                        set_perms_in(&mut view, replayer, path, &perms)?;
                        events.push(path.clone());
                    }
                    // Absent from the private tree: the transaction
                    // removed it
                    Err(_) => {
                        let removed = remove_in(&mut view, replayer, path)?;
                        if removed.is_empty() {
                            events.push(path.clone());
                        } else {
                            events.extend(removed);
                        }
                    }
                }
            }
        }
        self.generation += 1;
        if !self.transactions.is_empty() {
            for written in &tx.written {
                self.mutation_log
                    .push_back((self.generation, written.clone()));
            }
        }
        self.prune_mutation_log();

        tracing::debug!("transaction {} committed ({} watch paths)", id, events.len());
        for event_path in &events {
            self.watches.fire_mutation(event_path);
        }
        Ok(())
    }

    /// Coarse conflict test against the live mutation log
    fn conflicts(&self, tx: &Transaction) -> bool {
        self.mutation_log.iter().any(|(gen, mutated)| {
            *gen > tx.base_generation
                && tx
                    .accessed
                    .iter()
                    .any(|touched| path::prefix_related(mutated, touched))
        })
    }
}
