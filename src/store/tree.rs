//! Store Module
//!
//! The copy-on-write tree of named, byte-valued nodes, together with all
//! registry state: the watch table, the transaction table, and the quota
//! counters. Everything lives in one explicitly constructed `Store` passed
//! by reference to every operation; there are no process-wide singletons.
//!
//! ## Concurrency Model: Single-Threaded by Contract
//!
//! The store is driven by one cooperative event loop. Reference counts and
//! generation counters are plain counters; the only "locking discipline" is
//! the COW rule (never mutate a multiply-referenced node), which substitutes
//! for mutual exclusion between the live view and open transaction views.
//!
//! ## The COW Walk
//!
//! Mutating walks descend from the root toward the leaf through
//! `Rc::make_mut`: at each level a node shared with another tree is cloned
//! (shallowly) before descending, and the clone is spliced into its own
//! parent in place. Nodes newly created for "mkdir -p" semantics start
//! uniquely owned, so they are never cloned. Any reader holding an older
//! root reference observes the tree exactly as it was.

use std::collections::{BTreeMap, VecDeque};
use std::rc::Rc;

use crate::config::Config;
use crate::error::{Result, XsError};
use crate::path::{self, ROOT_PATH};
use crate::perms::{self, Caller, Perm, PermMode};
use crate::store::node::Node;
use crate::store::transaction::Transaction;
use crate::store::watch::{WatchHandler, WatchRegistry};

/// The hierarchical configuration store
pub struct Store {
    /// Engine configuration (quotas and size limits)
    pub(crate) config: Config,

    /// Current live root; always exists, never destroyed
    pub(crate) root: Rc<Node>,

    /// Bumped on every successful live mutation; transactions fork from it
    pub(crate) generation: u64,

    /// Total live node count (root included)
    pub(crate) nr_nodes: usize,

    /// Live node count per owning domain
    pub(crate) domain_nodes: BTreeMap<u32, usize>,

    /// Path-keyed watch chains
    pub(crate) watches: WatchRegistry,

    /// Open transactions by id
    pub(crate) transactions: BTreeMap<u32, Transaction>,

    /// Last allocated transaction id (0 is the "no transaction" sentinel)
    pub(crate) next_tx_id: u32,

    /// Open transaction count per domain
    pub(crate) domain_transactions: BTreeMap<u32, usize>,

    /// Live mutations `(generation, path)` recorded while transactions are
    /// open, consulted by commit-time conflict detection
    pub(crate) mutation_log: VecDeque<(u64, String)>,
}

/// Mutable handles on one tree and its quota counters
pub(crate) struct TreeView<'a> {
    pub(crate) root: &'a mut Rc<Node>,
    pub(crate) nr_nodes: &'a mut usize,
    pub(crate) domain_nodes: &'a mut BTreeMap<u32, usize>,
}

pub(crate) enum WriteMode {
    /// Set terminal content
    Write,
    /// Ensure the terminal node exists, content untouched
    Mkdir,
}

impl Store {
    /// Create a store with only the root node
    ///
    /// The root is owned by domain 0 with the conventional "owner full,
    /// others none" default.
    pub fn new(config: Config) -> Self {
        let root = Rc::new(Node::new(vec![Perm::new(0, PermMode::None)]));
        let mut domain_nodes = BTreeMap::new();
        domain_nodes.insert(0, 1);
        Self {
            config,
            root,
            generation: 0,
            nr_nodes: 1,
            domain_nodes,
            watches: WatchRegistry::new(),
            transactions: BTreeMap::new(),
            next_tx_id: 0,
            domain_transactions: BTreeMap::new(),
            mutation_log: VecDeque::new(),
        }
    }

    // =========================================================================
    // Node Operations
    // =========================================================================

    /// Read the terminal node's content
    pub fn read(&mut self, caller: Caller, tx_id: Option<u32>, path: &str) -> Result<Vec<u8>> {
        path::validate_abs(path, &self.config)?;
        let root = self.view_root(caller, tx_id, path)?;
        let node = lookup(&root, path)?;
        perms::check_read(caller, node.perms())?;
        Ok(node.content().to_vec())
    }

    /// Write content at `path`, creating missing intermediate nodes
    ///
    /// Newly created nodes inherit the nearest existing ancestor's
    /// permission list and are charged against that owner's node quota;
    /// exceeding it fails the whole operation without partial effect.
    pub fn write(
        &mut self,
        caller: Caller,
        tx_id: Option<u32>,
        path: &str,
        value: &[u8],
    ) -> Result<()> {
        path::validate_abs(path, &self.config)?;
        if value.len() > self.config.max_node_size {
            return Err(XsError::TooLarge("value".to_string()));
        }
        self.mutate(caller, tx_id, path, |view, config| {
            write_in(view, caller, path, value, WriteMode::Write, config)?;
            // A write always fires, even when it stores the same bytes
            Ok(vec![path.to_string()])
        })
    }

    /// Ensure a node exists at `path` ("mkdir -p")
    ///
    /// A no-op (and no watch event) if the node already exists.
    pub fn mkdir(&mut self, caller: Caller, tx_id: Option<u32>, path: &str) -> Result<()> {
        path::validate_abs(path, &self.config)?;
        self.mutate(caller, tx_id, path, |view, config| {
            let created = write_in(view, caller, path, &[], WriteMode::Mkdir, config)?;
            Ok(if created { vec![path.to_string()] } else { Vec::new() })
        })
    }

    /// Remove the terminal node and its entire subtree
    ///
    /// A missing terminal node is not an error; a missing parent is.
    /// Watches fire once per removed node, descendants before the removal
    /// root, each with that specific node's path.
    pub fn remove(&mut self, caller: Caller, tx_id: Option<u32>, path: &str) -> Result<()> {
        path::validate_abs(path, &self.config)?;
        if path == ROOT_PATH {
            return Err(XsError::MalformedRequest("cannot remove root".to_string()));
        }
        self.mutate(caller, tx_id, path, |view, _config| {
            remove_in(view, caller, path)
        })
    }

    /// Immediate children of the terminal node, plus its generation token
    pub fn directory(
        &mut self,
        caller: Caller,
        tx_id: Option<u32>,
        path: &str,
    ) -> Result<(Vec<String>, u64)> {
        path::validate_abs(path, &self.config)?;
        let root = self.view_root(caller, tx_id, path)?;
        let node = lookup(&root, path)?;
        perms::check_read(caller, node.perms())?;
        Ok((node.child_names(), node.generation()))
    }

    /// Paginated directory listing
    ///
    /// Returns the generation token and the NUL-joined child listing from
    /// byte `offset` onward, so a caller can detect whether the directory
    /// changed between successive paginated reads. An offset at or past the
    /// end yields empty data.
    pub fn directory_part(
        &mut self,
        caller: Caller,
        tx_id: Option<u32>,
        path: &str,
        offset: usize,
    ) -> Result<(u64, Vec<u8>)> {
        let (names, generation) = self.directory(caller, tx_id, path)?;
        let mut joined = Vec::new();
        for name in &names {
            joined.extend_from_slice(name.as_bytes());
            joined.push(0);
        }
        let data = if offset < joined.len() {
            joined[offset..].to_vec()
        } else {
            Vec::new()
        };
        Ok((generation, data))
    }

    /// Read the terminal node's permission list
    pub fn get_perms(
        &mut self,
        caller: Caller,
        tx_id: Option<u32>,
        path: &str,
    ) -> Result<Vec<Perm>> {
        path::validate_abs(path, &self.config)?;
        let root = self.view_root(caller, tx_id, path)?;
        let node = lookup(&root, path)?;
        perms::check_read(caller, node.perms())?;
        Ok(node.perms().to_vec())
    }

    /// Replace the terminal node's permission list
    pub fn set_perms(
        &mut self,
        caller: Caller,
        tx_id: Option<u32>,
        path: &str,
        new_perms: Vec<Perm>,
    ) -> Result<()> {
        path::validate_abs(path, &self.config)?;
        if new_perms.is_empty() {
            return Err(XsError::MalformedRequest("empty permission list".to_string()));
        }
        self.mutate(caller, tx_id, path, |view, _config| {
            set_perms_in(view, caller, path, &new_perms)?;
            Ok(vec![path.to_string()])
        })
    }

    // =========================================================================
    // Watch Operations
    // =========================================================================

    /// Register a watch; fires immediately once with the watched path
    ///
    /// `@`-prefixed special paths are accepted verbatim; ordinary paths
    /// must already be canonical (the wire layer resolves relative
    /// spellings and supplies `rel_offset`).
    pub fn watch(
        &mut self,
        caller: Caller,
        abs_path: &str,
        rel_offset: usize,
        token: &str,
        handler: WatchHandler,
    ) -> Result<()> {
        if !abs_path.starts_with('@') {
            path::validate_abs(abs_path, &self.config)?;
        }
        self.watches.register(
            caller,
            abs_path,
            rel_offset,
            token,
            handler,
            self.config.max_domain_watches,
        )
    }

    /// Remove a watch; exact (path, token, handler, owner) match required
    pub fn unwatch(
        &mut self,
        caller: Caller,
        abs_path: &str,
        token: &str,
        handler: &WatchHandler,
    ) -> Result<()> {
        self.watches.unregister(caller, abs_path, token, handler)
    }

    /// Remove every watch owned by a domain
    pub fn reset_watches(&mut self, owner: u32) {
        self.watches.reset_owner(owner);
    }

    /// Fire watches on a `@`-special path (domain lifecycle events)
    pub fn fire_special(&self, name: &str) {
        self.watches.fire_special(name);
    }

    // =========================================================================
    // Accessors
    // =========================================================================

    /// Total live node count
    pub fn nr_nodes(&self) -> usize {
        self.nr_nodes
    }

    /// Live nodes owned by a domain
    pub fn domain_node_count(&self, domid: u32) -> usize {
        self.domain_nodes.get(&domid).copied().unwrap_or(0)
    }

    /// Current live generation
    pub fn generation(&self) -> u64 {
        self.generation
    }

    /// Number of open transactions
    pub fn open_transactions(&self) -> usize {
        self.transactions.len()
    }

    /// Registered watch count
    pub fn watch_count(&self) -> usize {
        self.watches.len()
    }

    /// The configuration
    pub fn config(&self) -> &Config {
        &self.config
    }

    // =========================================================================
    // Internal Plumbing
    // =========================================================================

    /// The root to read through, recording transaction path access
    fn view_root(&mut self, caller: Caller, tx_id: Option<u32>, path: &str) -> Result<Rc<Node>> {
        match tx_id {
            None => Ok(Rc::clone(&self.root)),
            Some(id) => {
                let tx = self.lookup_tx(caller, id)?;
                tx.note_access(path);
                Ok(Rc::clone(&tx.root))
            }
        }
    }

    /// Run a mutation against the selected view and do the follow-up
    /// bookkeeping: live mutations bump the generation, feed the conflict
    /// log, and fire watches; transaction mutations record touched paths.
    ///
    /// The closure returns the list of paths whose watches should fire,
    /// in firing order (empty when nothing observable changed).
    fn mutate<F>(&mut self, caller: Caller, tx_id: Option<u32>, path: &str, op: F) -> Result<()>
    where
        F: FnOnce(&mut TreeView<'_>, &Config) -> Result<Vec<String>>,
    {
        match tx_id {
            None => {
                let config = self.config.clone();
                let mut view = TreeView {
                    root: &mut self.root,
                    nr_nodes: &mut self.nr_nodes,
                    domain_nodes: &mut self.domain_nodes,
                };
                let fired = op(&mut view, &config)?;
                if !fired.is_empty() {
                    self.note_live_mutation(path, &fired);
                }
                Ok(())
            }
            Some(id) => {
                let config = self.config.clone();
                let tx = self.lookup_tx(caller, id)?;
                tx.note_access(path);
                let mut view = TreeView {
                    root: &mut tx.root,
                    nr_nodes: &mut tx.nr_nodes,
                    domain_nodes: &mut tx.domain_nodes,
                };
                let fired = op(&mut view, &config)?;
                if !fired.is_empty() {
                    tx.note_write(path);
                }
                Ok(())
            }
        }
    }

    fn lookup_tx(&mut self, caller: Caller, id: u32) -> Result<&mut Transaction> {
        let tx = self.transactions.get_mut(&id).ok_or(XsError::NotFound)?;
        if tx.owner != caller.domid && !caller.privileged {
            return Err(XsError::PermissionDenied);
        }
        Ok(tx)
    }

    /// Bookkeeping after a successful live mutation at `path`
    fn note_live_mutation(&mut self, path: &str, fired: &[String]) {
        self.generation += 1;
        if !self.transactions.is_empty() {
            self.mutation_log
                .push_back((self.generation, path.to_string()));
        }
        tracing::trace!("mutation at {} (generation {})", path, self.generation);
        for event_path in fired {
            self.watches.fire_mutation(event_path);
        }
    }

    /// Drop conflict-log entries no open transaction can still see
    pub(crate) fn prune_mutation_log(&mut self) {
        if self.transactions.is_empty() {
            self.mutation_log.clear();
            return;
        }
        let oldest = self
            .transactions
            .values()
            .map(|tx| tx.base_generation)
            .min()
            .unwrap_or(self.generation);
        while matches!(self.mutation_log.front(), Some((gen, _)) if *gen <= oldest) {
            self.mutation_log.pop_front();
        }
    }
}

// =============================================================================
// Tree Walks
// =============================================================================

/// Read-only walk to the terminal node
pub(crate) fn lookup<'a>(root: &'a Rc<Node>, path: &str) -> Result<&'a Node> {
    let mut cur: &'a Node = root;
    for seg in path::segments(path) {
        cur = cur.child(seg).ok_or(XsError::NotFound)?;
    }
    Ok(cur)
}

/// Write or mkdir at `path` in one view; returns whether nodes were created
///
/// Runs a read-only pre-check pass (permissions, quota) before touching the
/// tree, so a failure has no partial effect.
pub(crate) fn write_in(
    view: &mut TreeView<'_>,
    caller: Caller,
    path: &str,
    value: &[u8],
    mode: WriteMode,
    config: &Config,
) -> Result<bool> {
    let segs = path::segments(path);

    // Pre-check pass: find the deepest existing node on the path
    let mut cur: &Node = view.root;
    let mut depth = 0;
    for seg in &segs {
        match cur.child(seg) {
            Some(child) => {
                cur = child;
                depth += 1;
            }
            None => break,
        }
    }
    let missing = segs.len() - depth;

    // Permission check against the node itself, or the nearest existing
    // ancestor when intermediate nodes must be created
    perms::check_write(caller, cur.perms())?;

    // Created nodes inherit this owner; charge its quota up front
    let owner = cur.owner();
    if missing > 0 && !caller.privileged {
        let current = view.domain_nodes.get(&owner).copied().unwrap_or(0);
        if current + missing > config.max_domain_nodes {
            return Err(XsError::QuotaExceeded("nodes".to_string()));
        }
    }

    // Mutation pass
    write_walk(view.root, &segs, value, &mode);
    if missing > 0 {
        *view.nr_nodes += missing;
        *view.domain_nodes.entry(owner).or_insert(0) += missing;
    }
    Ok(missing > 0)
}

/// The recursive COW descent for write/mkdir
fn write_walk(rc: &mut Rc<Node>, segs: &[&str], value: &[u8], mode: &WriteMode) {
    if segs.is_empty() {
        if matches!(mode, WriteMode::Write) {
            Rc::make_mut(rc).content = value.to_vec();
        }
        return;
    }
    let node = Rc::make_mut(rc);
    let name = segs[0];
    if !node.children.contains_key(name) {
        let child = Node::new(node.perms.clone());
        node.children.insert(name.to_string(), Rc::new(child));
        node.generation += 1;
    }
    let child = node
        .children
        .get_mut(name)
        .expect("child present or just inserted");
    write_walk(child, &segs[1..], value, mode);
}

/// Remove the subtree at `path`; returns removed paths in firing order
/// (post-order: descendants first, the removal root last)
pub(crate) fn remove_in(view: &mut TreeView<'_>, caller: Caller, path: &str) -> Result<Vec<String>> {
    let segs = path::segments(path);
    let (parent_segs, name) = segs.split_at(segs.len() - 1);
    let name = name[0];

    // Walk to the parent; a missing parent is an error
    let mut parent: &Node = view.root;
    for seg in parent_segs {
        parent = parent.child(seg).ok_or(XsError::NotFound)?;
    }

    // A missing terminal node is not an error
    let Some(target) = parent.child(name) else {
        return Ok(Vec::new());
    };
    perms::check_write(caller, target.perms())?;

    let mut removed = Vec::new();
    let mut owner_counts: BTreeMap<u32, usize> = BTreeMap::new();
    collect_postorder(target, path, &mut removed, &mut owner_counts);

    remove_walk(view.root, &segs);

    *view.nr_nodes -= removed.len();
    for (owner, count) in owner_counts {
        if let Some(have) = view.domain_nodes.get_mut(&owner) {
            *have = have.saturating_sub(count);
            if *have == 0 {
                view.domain_nodes.remove(&owner);
            }
        }
    }
    Ok(removed)
}

/// Post-order path collection over a doomed subtree
fn collect_postorder(
    node: &Node,
    node_path: &str,
    out: &mut Vec<String>,
    owner_counts: &mut BTreeMap<u32, usize>,
) {
    for (name, child) in &node.children {
        let child_path = join_path(node_path, name);
        collect_postorder(child, &child_path, out, owner_counts);
    }
    out.push(node_path.to_string());
    *owner_counts.entry(node.owner()).or_insert(0) += 1;
}

/// COW descent that unlinks the terminal child from its parent
fn remove_walk(rc: &mut Rc<Node>, segs: &[&str]) {
    let node = Rc::make_mut(rc);
    if segs.len() == 1 {
        node.children.remove(segs[0]);
        node.generation += 1;
        return;
    }
    if let Some(child) = node.children.get_mut(segs[0]) {
        remove_walk(child, &segs[1..]);
    }
}

/// Replace a node's permission list, adjusting ownership accounting
pub(crate) fn set_perms_in(
    view: &mut TreeView<'_>,
    caller: Caller,
    path: &str,
    new_perms: &[Perm],
) -> Result<()> {
    let node = lookup(view.root, path)?;
    perms::check_write(caller, node.perms())?;
    let old_owner = node.owner();
    let new_owner = new_perms[0].id;

    set_perms_walk(view.root, &path::segments(path), new_perms);

    if old_owner != new_owner {
        if let Some(have) = view.domain_nodes.get_mut(&old_owner) {
            *have = have.saturating_sub(1);
            if *have == 0 {
                view.domain_nodes.remove(&old_owner);
            }
        }
        *view.domain_nodes.entry(new_owner).or_insert(0) += 1;
    }
    Ok(())
}

/// COW descent that replaces the terminal node's permission list
fn set_perms_walk(rc: &mut Rc<Node>, segs: &[&str], new_perms: &[Perm]) {
    let node = Rc::make_mut(rc);
    if segs.is_empty() {
        node.perms = new_perms.to_vec();
        return;
    }
    if let Some(child) = node.children.get_mut(segs[0]) {
        set_perms_walk(child, &segs[1..], new_perms);
    }
}

/// Join an absolute path and a child name
pub(crate) fn join_path(path: &str, name: &str) -> String {
    if path == ROOT_PATH {
        format!("/{name}")
    } else {
        format!("{path}/{name}")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn store() -> Store {
        Store::new(Config::default())
    }

    const DOM0: Caller = Caller {
        domid: 0,
        privileged: true,
    };

    #[test]
    fn write_then_read_round_trip() {
        let mut s = store();
        s.write(DOM0, None, "/local/domain/1/data/x", b"hello")
            .unwrap();
        assert_eq!(s.read(DOM0, None, "/local/domain/1/data/x").unwrap(), b"hello");
    }

    #[test]
    fn read_missing_is_not_found() {
        let mut s = store();
        assert_eq!(s.read(DOM0, None, "/nope"), Err(XsError::NotFound));
    }

    #[test]
    fn write_creates_intermediates_with_empty_content() {
        let mut s = store();
        s.write(DOM0, None, "/a/b/c", b"v").unwrap();
        assert_eq!(s.read(DOM0, None, "/a").unwrap(), b"");
        assert_eq!(s.read(DOM0, None, "/a/b").unwrap(), b"");
        assert_eq!(s.nr_nodes(), 4); // root + a + b + c
    }

    #[test]
    fn cow_non_interference() {
        let mut s = store();
        s.write(DOM0, None, "/a/b", b"old").unwrap();

        // A reader holding the old root is unaffected by later writes
        let retained = Rc::clone(&s.root);
        s.write(DOM0, None, "/a/b", b"new").unwrap();

        let old = lookup(&retained, "/a/b").unwrap();
        assert_eq!(old.content(), b"old");
        assert_eq!(s.read(DOM0, None, "/a/b").unwrap(), b"new");
    }

    #[test]
    fn remove_subtree_updates_count() {
        let mut s = store();
        s.write(DOM0, None, "/a/b/c", b"1").unwrap();
        s.write(DOM0, None, "/a/b/d", b"2").unwrap();
        let before = s.nr_nodes();
        s.remove(DOM0, None, "/a/b").unwrap();
        assert_eq!(s.nr_nodes(), before - 3); // b, c, d
        assert_eq!(s.read(DOM0, None, "/a/b"), Err(XsError::NotFound));
        assert_eq!(s.read(DOM0, None, "/a").unwrap(), b"");
    }

    #[test]
    fn remove_missing_terminal_is_ok_missing_parent_is_not() {
        let mut s = store();
        s.mkdir(DOM0, None, "/a").unwrap();
        assert!(s.remove(DOM0, None, "/a/nope").is_ok());
        assert_eq!(s.remove(DOM0, None, "/b/nope"), Err(XsError::NotFound));
        assert!(s.remove(DOM0, None, "/").is_err());
    }

    #[test]
    fn directory_listing_is_sorted_with_generation_token() {
        let mut s = store();
        s.mkdir(DOM0, None, "/dir/zeta").unwrap();
        s.mkdir(DOM0, None, "/dir/alpha").unwrap();
        let (names, gen1) = s.directory(DOM0, None, "/dir").unwrap();
        assert_eq!(names, vec!["alpha".to_string(), "zeta".to_string()]);

        s.mkdir(DOM0, None, "/dir/mid").unwrap();
        let (_, gen2) = s.directory(DOM0, None, "/dir").unwrap();
        assert!(gen2 > gen1, "child-set change must advance the token");

        // Content writes alone do not advance it
        s.write(DOM0, None, "/dir/mid", b"x").unwrap();
        let (_, gen3) = s.directory(DOM0, None, "/dir").unwrap();
        assert_eq!(gen3, gen2);
    }

    #[test]
    fn directory_part_pages_through_listing() {
        let mut s = store();
        s.mkdir(DOM0, None, "/dir/aa").unwrap();
        s.mkdir(DOM0, None, "/dir/bb").unwrap();
        let (gen, all) = s.directory_part(DOM0, None, "/dir", 0).unwrap();
        assert_eq!(all, b"aa\0bb\0");
        let (gen2, rest) = s.directory_part(DOM0, None, "/dir", 3).unwrap();
        assert_eq!(gen, gen2);
        assert_eq!(rest, b"bb\0");
        let (_, end) = s.directory_part(DOM0, None, "/dir", 100).unwrap();
        assert!(end.is_empty());
    }

    #[test]
    fn node_quota_blocks_creation_not_update() {
        let config = Config::builder().max_domain_nodes(3).build();
        let mut s = Store::new(config);
        let guest = Caller::unprivileged(1);

        // Give domain 1 a writable home owned by itself
        s.mkdir(DOM0, None, "/home").unwrap();
        s.set_perms(DOM0, None, "/home", vec![Perm::new(1, PermMode::None)])
            .unwrap();

        s.write(guest, None, "/home/a", b"1").unwrap();
        s.write(guest, None, "/home/b", b"2").unwrap();
        assert_eq!(
            s.write(guest, None, "/home/c", b"3"),
            Err(XsError::QuotaExceeded("nodes".to_string()))
        );
        // Updating an existing node still succeeds
        s.write(guest, None, "/home/a", b"updated").unwrap();
        // Privileged creation is exempt
        s.write(DOM0, None, "/home/c", b"3").unwrap();
    }

    #[test]
    fn quota_failure_has_no_partial_effect() {
        let config = Config::builder().max_domain_nodes(2).build();
        let mut s = Store::new(config);
        let guest = Caller::unprivileged(1);
        s.mkdir(DOM0, None, "/home").unwrap();
        s.set_perms(DOM0, None, "/home", vec![Perm::new(1, PermMode::None)])
            .unwrap();

        let before = s.nr_nodes();
        assert!(s.write(guest, None, "/home/a/b/c", b"deep").is_err());
        assert_eq!(s.nr_nodes(), before);
        assert_eq!(s.read(DOM0, None, "/home/a"), Err(XsError::NotFound));
    }

    #[test]
    fn unprivileged_access_respects_perms() {
        let mut s = store();
        let guest = Caller::unprivileged(7);
        s.write(DOM0, None, "/secret", b"x").unwrap();
        assert_eq!(s.read(guest, None, "/secret"), Err(XsError::PermissionDenied));
        assert_eq!(
            s.write(guest, None, "/secret", b"y"),
            Err(XsError::PermissionDenied)
        );

        s.set_perms(
            DOM0,
            None,
            "/secret",
            vec![Perm::new(0, PermMode::None), Perm::new(7, PermMode::Read)],
        )
        .unwrap();
        assert_eq!(s.read(guest, None, "/secret").unwrap(), b"x");
        assert_eq!(
            s.write(guest, None, "/secret", b"y"),
            Err(XsError::PermissionDenied)
        );
    }

    #[test]
    fn oversize_value_rejected() {
        let mut s = store();
        let big = vec![0u8; s.config().max_node_size + 1];
        assert_eq!(
            s.write(DOM0, None, "/big", &big),
            Err(XsError::TooLarge("value".to_string()))
        );
    }

    #[test]
    fn set_perms_moves_ownership_accounting() {
        let mut s = store();
        s.mkdir(DOM0, None, "/n").unwrap();
        assert_eq!(s.domain_node_count(0), 2);
        s.set_perms(DOM0, None, "/n", vec![Perm::new(4, PermMode::None)])
            .unwrap();
        assert_eq!(s.domain_node_count(0), 1);
        assert_eq!(s.domain_node_count(4), 1);
    }
}
