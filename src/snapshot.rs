//! Snapshot Codec
//!
//! Serializes the entire store (tree, open transactions, watch
//! registrations, and counters) into one self-describing blob, and
//! restores a store from it. Built for save/resume of the whole embedding
//! process, not for incremental persistence.
//!
//! ## Blob Format
//!
//! ```text
//! ┌───────────┬─────────────┬───────────┬──────────────────────┐
//! │ Magic (4) │ Version (4) │ CRC32 (4) │  Body (bincode doc)  │
//! └───────────┴─────────────┴───────────┴──────────────────────┘
//! ```
//! `Magic` is the literal bytes `XSDB`; `Version` and `CRC32` are
//! little-endian `u32`; the checksum covers the body only.
//!
//! ## Structure Sharing
//!
//! Nodes are interned by pointer identity into a flat table, children
//! referenced by index. A subtree shared between the live root and an open
//! transaction (the common case, given COW forking) is stored once, and
//! restore rebuilds the same `Rc` sharing, so a restored store costs no
//! more memory than the original. The table is emitted post-order, so a
//! valid body only ever references indices below the referencing record;
//! decode enforces that.

use std::collections::{BTreeMap, HashMap, VecDeque};
use std::rc::Rc;

use serde::{Deserialize, Serialize};

use crate::config::Config;
use crate::error::{Result, XsError};
use crate::perms::Perm;
use crate::store::{Node, Store, Transaction, Watch, WatchHandler, WatchRegistry};

/// Blob magic bytes
const MAGIC: &[u8; 4] = b"XSDB";

/// Current blob format version
const VERSION: u32 = 1;

/// Bytes before the bincode body: magic, version, checksum
const PREAMBLE: usize = 12;

// =============================================================================
// Document Schema
// =============================================================================

/// One interned node: children point into the node table
#[derive(Serialize, Deserialize)]
struct NodeRec {
    content: Vec<u8>,
    perms: Vec<Perm>,
    generation: u64,
    children: Vec<(String, u32)>,
}

/// One open transaction
#[derive(Serialize, Deserialize)]
struct TxRec {
    id: u32,
    owner: u32,
    root: u32,
    base_generation: u64,
    accessed: Vec<String>,
    written: Vec<String>,
}

/// One watch registration
///
/// The delivery handler is a live callback and cannot be serialized; the
/// restoring embedder supplies replacements.
#[derive(Serialize, Deserialize)]
struct WatchRec {
    path: String,
    token: String,
    rel_offset: usize,
}

/// The complete serialized store
#[derive(Serialize, Deserialize)]
struct SnapshotDoc {
    generation: u64,
    next_tx_id: u32,
    nodes: Vec<NodeRec>,
    root: u32,
    transactions: Vec<TxRec>,
    watches: Vec<WatchRec>,
    mutation_log: Vec<(u64, String)>,
}

// =============================================================================
// Serialize
// =============================================================================

/// Serialize a store into a snapshot blob
pub fn serialize(store: &Store) -> Result<Vec<u8>> {
    let mut nodes = Vec::new();
    let mut interned: HashMap<*const Node, u32> = HashMap::new();

    let root = intern(&store.root, &mut nodes, &mut interned);
    let transactions = store
        .transactions
        .values()
        .map(|tx| TxRec {
            id: tx.id,
            owner: tx.owner,
            root: intern(&tx.root, &mut nodes, &mut interned),
            base_generation: tx.base_generation,
            accessed: tx.accessed.iter().cloned().collect(),
            written: tx.written.clone(),
        })
        .collect();
    let watches = store
        .watches
        .iter()
        .map(|(path, watch)| WatchRec {
            path: path.to_string(),
            token: watch.token().to_string(),
            rel_offset: watch.rel_offset(),
        })
        .collect();

    let doc = SnapshotDoc {
        generation: store.generation,
        next_tx_id: store.next_tx_id,
        nodes,
        root,
        transactions,
        watches,
        mutation_log: store.mutation_log.iter().cloned().collect(),
    };

    let body = bincode::serialize(&doc)
        .map_err(|e| XsError::Snapshot(format!("body encoding failed: {e}")))?;
    let mut blob = Vec::with_capacity(PREAMBLE + body.len());
    blob.extend_from_slice(MAGIC);
    blob.extend_from_slice(&VERSION.to_le_bytes());
    blob.extend_from_slice(&crc32fast::hash(&body).to_le_bytes());
    blob.extend_from_slice(&body);
    tracing::debug!(
        "snapshot: {} nodes, {} transactions, {} watches, {} bytes",
        doc.nodes.len(),
        doc.transactions.len(),
        doc.watches.len(),
        blob.len()
    );
    Ok(blob)
}

/// Intern a subtree post-order, deduplicating by pointer identity
fn intern(node: &Rc<Node>, nodes: &mut Vec<NodeRec>, interned: &mut HashMap<*const Node, u32>) -> u32 {
    let key = Rc::as_ptr(node);
    if let Some(idx) = interned.get(&key) {
        return *idx;
    }
    let children = node
        .children
        .iter()
        .map(|(name, child)| (name.clone(), intern(child, nodes, interned)))
        .collect();
    let idx = nodes.len() as u32;
    nodes.push(NodeRec {
        content: node.content().to_vec(),
        perms: node.perms().to_vec(),
        generation: node.generation(),
        children,
    });
    interned.insert(key, idx);
    idx
}

// =============================================================================
// Restore
// =============================================================================

/// Rebuild a store from a snapshot blob
///
/// Watches are reattached through `rebind`, which maps `(path, token)` to
/// a fresh delivery handler, and re-owned to `owner` (the original owning
/// domains are gone with the process that held their channels). Restored
/// watches do not fire an initial event.
pub fn restore(
    config: Config,
    blob: &[u8],
    owner: u32,
    mut rebind: impl FnMut(&str, &str) -> WatchHandler,
) -> Result<Store> {
    let doc = decode_doc(blob)?;
    let nodes = link_nodes(&doc.nodes)?;
    let root = Rc::clone(pick(&nodes, doc.root)?);
    let (nr_nodes, domain_nodes) = count_nodes(&root);

    let mut transactions = BTreeMap::new();
    let mut domain_transactions: BTreeMap<u32, usize> = BTreeMap::new();
    for rec in doc.transactions {
        if rec.id == 0 || transactions.contains_key(&rec.id) {
            return Err(XsError::Snapshot(format!(
                "invalid transaction id {}",
                rec.id
            )));
        }
        let tx_root = Rc::clone(pick(&nodes, rec.root)?);
        let (tx_nr, tx_domains) = count_nodes(&tx_root);
        transactions.insert(
            rec.id,
            Transaction {
                id: rec.id,
                owner: rec.owner,
                root: tx_root,
                base_generation: rec.base_generation,
                nr_nodes: tx_nr,
                domain_nodes: tx_domains,
                accessed: rec.accessed.into_iter().collect(),
                written: rec.written,
            },
        );
        *domain_transactions.entry(rec.owner).or_insert(0) += 1;
    }

    let mut watches = WatchRegistry::new();
    for rec in doc.watches {
        let handler = rebind(&rec.path, &rec.token);
        let watch = Watch::from_parts(rec.token, owner, rec.rel_offset, handler);
        watches.insert_restored(rec.path, watch);
    }

    tracing::debug!(
        "restored store: {} nodes, {} transactions, generation {}",
        nr_nodes,
        transactions.len(),
        doc.generation
    );
    Ok(Store {
        config,
        root,
        generation: doc.generation,
        nr_nodes,
        domain_nodes,
        watches,
        transactions,
        next_tx_id: doc.next_tx_id,
        domain_transactions,
        mutation_log: VecDeque::from(doc.mutation_log),
    })
}

/// Validate the preamble and decode the body
fn decode_doc(blob: &[u8]) -> Result<SnapshotDoc> {
    if blob.len() < PREAMBLE || &blob[0..4] != MAGIC {
        return Err(XsError::Snapshot("bad magic".to_string()));
    }
    let version = u32::from_le_bytes([blob[4], blob[5], blob[6], blob[7]]);
    if version != VERSION {
        return Err(XsError::Snapshot(format!(
            "unsupported version {version}"
        )));
    }
    let expected = u32::from_le_bytes([blob[8], blob[9], blob[10], blob[11]]);
    let body = &blob[PREAMBLE..];
    let actual = crc32fast::hash(body);
    if actual != expected {
        return Err(XsError::Snapshot(format!(
            "checksum mismatch: stored {expected:#010x}, computed {actual:#010x}"
        )));
    }
    bincode::deserialize(body).map_err(|e| XsError::Snapshot(format!("body decoding failed: {e}")))
}

/// Rebuild the node table, restoring `Rc` sharing
///
/// Post-order emission means a record may only reference earlier indices;
/// anything else is a corrupt or adversarial body.
fn link_nodes(recs: &[NodeRec]) -> Result<Vec<Rc<Node>>> {
    let mut nodes: Vec<Rc<Node>> = Vec::with_capacity(recs.len());
    for (idx, rec) in recs.iter().enumerate() {
        if rec.perms.is_empty() {
            return Err(XsError::Snapshot(format!("node {idx} without an owner")));
        }
        let mut children = BTreeMap::new();
        for (name, child_idx) in &rec.children {
            if *child_idx as usize >= idx {
                return Err(XsError::Snapshot(format!(
                    "node {idx} references forward index {child_idx}"
                )));
            }
            children.insert(name.clone(), Rc::clone(&nodes[*child_idx as usize]));
        }
        nodes.push(Rc::new(Node {
            content: rec.content.clone(),
            children,
            perms: rec.perms.clone(),
            generation: rec.generation,
        }));
    }
    Ok(nodes)
}

fn pick(nodes: &[Rc<Node>], idx: u32) -> Result<&Rc<Node>> {
    nodes
        .get(idx as usize)
        .ok_or_else(|| XsError::Snapshot(format!("root index {idx} out of range")))
}

/// Recount a tree's nodes and per-domain ownership
fn count_nodes(root: &Rc<Node>) -> (usize, BTreeMap<u32, usize>) {
    fn walk(node: &Rc<Node>, total: &mut usize, domains: &mut BTreeMap<u32, usize>) {
        *total += 1;
        *domains.entry(node.owner()).or_insert(0) += 1;
        for child in node.children.values() {
            walk(child, total, domains);
        }
    }
    let mut total = 0;
    let mut domains = BTreeMap::new();
    walk(root, &mut total, &mut domains);
    (total, domains)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::perms::Caller;

    const DOM0: Caller = Caller {
        domid: 0,
        privileged: true,
    };

    fn null_handler() -> WatchHandler {
        Rc::new(|_: &str, _: &str| {})
    }

    #[test]
    fn round_trip_preserves_tree_and_counters() {
        let mut s = Store::new(Config::default());
        s.write(DOM0, None, "/a/b", b"hello").unwrap();
        s.write(DOM0, None, "/a/c", b"world").unwrap();

        let blob = serialize(&s).unwrap();
        let mut r = restore(Config::default(), &blob, 0, |_, _| null_handler()).unwrap();

        assert_eq!(r.read(DOM0, None, "/a/b").unwrap(), b"hello");
        assert_eq!(r.read(DOM0, None, "/a/c").unwrap(), b"world");
        assert_eq!(r.nr_nodes(), s.nr_nodes());
        assert_eq!(r.generation(), s.generation());
    }

    #[test]
    fn open_transactions_survive_with_sharing() {
        let mut s = Store::new(Config::default());
        s.write(DOM0, None, "/shared/deep/leaf", b"v").unwrap();
        let tx = s.transaction_start(DOM0).unwrap();
        s.write(DOM0, Some(tx), "/private", b"mine").unwrap();

        let blob = serialize(&s).unwrap();
        let mut r = restore(Config::default(), &blob, 0, |_, _| null_handler()).unwrap();

        assert_eq!(r.open_transactions(), 1);
        assert_eq!(r.read(DOM0, Some(tx), "/private").unwrap(), b"mine");
        assert_eq!(r.read(DOM0, None, "/private"), Err(XsError::NotFound));
        r.transaction_end(DOM0, tx, true).unwrap();
        assert_eq!(r.read(DOM0, None, "/private").unwrap(), b"mine");
    }

    #[test]
    fn shared_subtrees_are_stored_once() {
        let mut s = Store::new(Config::default());
        s.write(DOM0, None, "/big/sub/tree", b"x").unwrap();
        let baseline = serialize(&s).unwrap().len();

        // Forking five transactions shares the whole tree by pointer
        for _ in 0..5 {
            s.transaction_start(DOM0).unwrap();
        }
        let forked = serialize(&s).unwrap().len();
        // Five more roots cost only five records-worth of metadata, not
        // five copies of the tree
        assert!(forked < baseline * 2);
    }

    #[test]
    fn watches_restore_to_the_resuming_owner_without_firing() {
        let mut s = Store::new(Config::default());
        let fired = Rc::new(std::cell::RefCell::new(0usize));
        let sink = Rc::clone(&fired);
        let handler: WatchHandler = Rc::new(move |_: &str, _: &str| {
            *sink.borrow_mut() += 1;
        });
        s.watch(Caller::unprivileged(5), "/a", 0, "tok", handler).unwrap();
        assert_eq!(*fired.borrow(), 1, "initial event on live registration");

        let blob = serialize(&s).unwrap();
        let fired2 = Rc::new(std::cell::RefCell::new(Vec::new()));
        let sink2 = Rc::clone(&fired2);
        let mut r = restore(Config::default(), &blob, 7, move |_, _| {
            let inner = Rc::clone(&sink2);
            Rc::new(move |p: &str, t: &str| {
                inner.borrow_mut().push((p.to_string(), t.to_string()));
            })
        })
        .unwrap();

        assert_eq!(r.watch_count(), 1);
        assert!(fired2.borrow().is_empty(), "no initial event on restore");
        r.write(DOM0, None, "/a", b"poke").unwrap();
        assert_eq!(
            fired2.borrow().as_slice(),
            &[("/a".to_string(), "tok".to_string())]
        );
    }

    #[test]
    fn corruption_is_rejected() {
        let mut s = Store::new(Config::default());
        s.write(DOM0, None, "/k", b"v").unwrap();
        let blob = serialize(&s).unwrap();

        let mut flipped = blob.clone();
        let last = flipped.len() - 1;
        flipped[last] ^= 0xff;
        assert!(matches!(
            restore(Config::default(), &flipped, 0, |_, _| null_handler()),
            Err(XsError::Snapshot(_))
        ));

        let mut bad_magic = blob.clone();
        bad_magic[0] = b'Y';
        assert!(matches!(
            restore(Config::default(), &bad_magic, 0, |_, _| null_handler()),
            Err(XsError::Snapshot(_))
        ));

        let mut bad_version = blob;
        bad_version[4] = 9;
        assert!(matches!(
            restore(Config::default(), &bad_version, 0, |_, _| null_handler()),
            Err(XsError::Snapshot(_))
        ));
    }

    #[test]
    fn truncated_blob_is_rejected() {
        assert!(matches!(
            restore(Config::default(), b"XS", 0, |_, _| null_handler()),
            Err(XsError::Snapshot(_))
        ));
    }
}
