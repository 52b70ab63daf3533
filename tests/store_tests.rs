//! End-to-end store behavior: racing transactions, watch fan-out on
//! subtree removal, and cross-domain permission enforcement.

use std::cell::RefCell;
use std::rc::Rc;

use xsdb::path;
use xsdb::store::WatchHandler;
use xsdb::{Caller, Config, Perm, PermMode, Store, XsError};

const DOM0: Caller = Caller {
    domid: 0,
    privileged: true,
};

fn recording_handler() -> (WatchHandler, Rc<RefCell<Vec<(String, String)>>>) {
    let log = Rc::new(RefCell::new(Vec::new()));
    let sink = Rc::clone(&log);
    let handler: WatchHandler = Rc::new(move |p: &str, t: &str| {
        sink.borrow_mut().push((p.to_string(), t.to_string()));
    });
    (handler, log)
}

// =============================================================================
// Racing Transactions
// =============================================================================

#[test]
fn racing_commits_first_wins_second_conflicts() {
    let mut s = Store::new(Config::default());
    let dom1 = Caller::unprivileged(1);
    let config = Config::default();
    let (abs, _) = path::canonicalize(1, "data/x", &config).unwrap();
    assert_eq!(abs, "/local/domain/1/data/x");

    // The guest's home must exist and belong to it before it can write
    s.mkdir(DOM0, None, "/local/domain/1").unwrap();
    s.set_perms(
        DOM0,
        None,
        "/local/domain/1",
        vec![Perm::new(1, PermMode::None)],
    )
    .unwrap();

    let t1 = s.transaction_start(dom1).unwrap();
    let t2 = s.transaction_start(dom1).unwrap();

    s.write(dom1, Some(t1), &abs, b"hello").unwrap();
    s.write(dom1, Some(t2), &abs, b"world").unwrap();

    // Neither write is visible live while both are open
    assert_eq!(s.read(dom1, None, &abs), Err(XsError::NotFound));

    s.transaction_end(dom1, t1, true).unwrap();
    assert_eq!(s.read(dom1, None, &abs).unwrap(), b"hello");

    // The second commit lost the race over the same region
    assert_eq!(s.transaction_end(dom1, t2, true), Err(XsError::Conflict));
    assert_eq!(s.read(dom1, None, &abs).unwrap(), b"hello");
}

#[test]
fn commit_then_lose_the_race_then_abort() {
    let mut s = Store::new(Config::default());
    let p = "/local/domain/1/data/x";

    s.write(DOM0, None, p, b"hello").unwrap();
    assert_eq!(s.read(DOM0, None, p).unwrap(), b"hello");

    let t1 = s.transaction_start(DOM0).unwrap();
    s.write(DOM0, Some(t1), p, b"world").unwrap();
    assert_eq!(s.read(DOM0, None, p).unwrap(), b"hello");
    assert_eq!(s.read(DOM0, Some(t1), p).unwrap(), b"world");
    s.transaction_end(DOM0, t1, true).unwrap();
    assert_eq!(s.read(DOM0, None, p).unwrap(), b"world");

    // A fork off the post-commit state loses to an external write
    let t2 = s.transaction_start(DOM0).unwrap();
    assert_eq!(s.read(DOM0, Some(t2), p).unwrap(), b"world");
    s.write(DOM0, None, p, b"other").unwrap();
    assert_eq!(s.transaction_end(DOM0, t2, true), Err(XsError::Conflict));
    assert_eq!(s.read(DOM0, None, p).unwrap(), b"other");

    // Abort, by contrast, always succeeds and leaves nothing behind
    let t3 = s.transaction_start(DOM0).unwrap();
    s.write(DOM0, Some(t3), p, b"discarded").unwrap();
    s.transaction_end(DOM0, t3, false).unwrap();
    assert_eq!(s.read(DOM0, None, p).unwrap(), b"other");
}

#[test]
fn sequential_transactions_do_not_conflict() {
    let mut s = Store::new(Config::default());
    let t1 = s.transaction_start(DOM0).unwrap();
    s.write(DOM0, Some(t1), "/seq", b"one").unwrap();
    s.transaction_end(DOM0, t1, true).unwrap();

    let t2 = s.transaction_start(DOM0).unwrap();
    s.write(DOM0, Some(t2), "/seq", b"two").unwrap();
    s.transaction_end(DOM0, t2, true).unwrap();
    assert_eq!(s.read(DOM0, None, "/seq").unwrap(), b"two");
}

#[test]
fn commit_fires_watches_for_transaction_effects() {
    let mut s = Store::new(Config::default());
    let (handler, log) = recording_handler();
    s.watch(DOM0, "/app", 0, "tok", handler).unwrap();
    log.borrow_mut().clear();

    let tx = s.transaction_start(DOM0).unwrap();
    s.write(DOM0, Some(tx), "/app/a/b", b"v").unwrap();
    assert!(log.borrow().is_empty(), "no events while the tx is open");

    s.transaction_end(DOM0, tx, true).unwrap();
    let paths: Vec<String> = log.borrow().iter().map(|(p, _)| p.clone()).collect();
    // Same firing as the live operation: one event for the written path
    assert_eq!(paths, vec!["/app/a/b"]);
    log.borrow_mut().clear();

    // A transactional subtree removal fans out on commit just like a
    // live removal: descendants first, the removal root last
    let tx = s.transaction_start(DOM0).unwrap();
    s.remove(DOM0, Some(tx), "/app/a").unwrap();
    s.transaction_end(DOM0, tx, true).unwrap();
    let paths: Vec<String> = log.borrow().iter().map(|(p, _)| p.clone()).collect();
    assert_eq!(paths, vec!["/app/a/b", "/app/a"]);
}

// =============================================================================
// Removal Fan-out
// =============================================================================

#[test]
fn subtree_removal_fires_descendants_first_and_drops_counts() {
    let mut s = Store::new(Config::default());
    s.write(DOM0, None, "/top/a/leaf1", b"1").unwrap();
    s.write(DOM0, None, "/top/a/leaf2", b"2").unwrap();
    s.write(DOM0, None, "/top/b", b"3").unwrap();
    let before = s.nr_nodes();

    let (handler, log) = recording_handler();
    s.watch(DOM0, "/top", 0, "t", handler).unwrap();
    log.borrow_mut().clear();

    s.remove(DOM0, None, "/top").unwrap();

    // One event per removed node, every descendant before its parent
    let paths: Vec<String> = log.borrow().iter().map(|(p, _)| p.clone()).collect();
    assert_eq!(
        paths,
        vec!["/top/a/leaf1", "/top/a/leaf2", "/top/a", "/top/b", "/top"]
    );
    assert_eq!(s.nr_nodes(), before - 5);
    assert_eq!(s.read(DOM0, None, "/top"), Err(XsError::NotFound));
}

#[test]
fn removing_a_missing_node_under_an_existing_parent_is_quiet() {
    let mut s = Store::new(Config::default());
    s.mkdir(DOM0, None, "/present").unwrap();
    let (handler, log) = recording_handler();
    s.watch(DOM0, "/present", 0, "t", handler).unwrap();
    log.borrow_mut().clear();

    s.remove(DOM0, None, "/present/absent").unwrap();
    assert!(log.borrow().is_empty());

    // A missing parent, by contrast, is an error
    assert_eq!(
        s.remove(DOM0, None, "/absent/deeper"),
        Err(XsError::NotFound)
    );
}

// =============================================================================
// Cross-domain Permissions
// =============================================================================

#[test]
fn guests_are_confined_by_node_permissions() {
    let mut s = Store::new(Config::default());
    let dom1 = Caller::unprivileged(1);
    let dom2 = Caller::unprivileged(2);

    s.write(DOM0, None, "/guest/data", b"secret").unwrap();
    s.set_perms(
        DOM0,
        None,
        "/guest/data",
        vec![Perm::new(1, PermMode::None), Perm::new(2, PermMode::Read)],
    )
    .unwrap();

    // Owner reads and writes; the explicit entry grants dom2 read only
    assert_eq!(s.read(dom1, None, "/guest/data").unwrap(), b"secret");
    s.write(dom1, None, "/guest/data", b"mine").unwrap();
    assert_eq!(s.read(dom2, None, "/guest/data").unwrap(), b"mine");
    assert_eq!(
        s.write(dom2, None, "/guest/data", b"no"),
        Err(XsError::PermissionDenied)
    );

    // Unlisted domains get the default (the owner entry's mode)
    let dom3 = Caller::unprivileged(3);
    assert_eq!(
        s.read(dom3, None, "/guest/data"),
        Err(XsError::PermissionDenied)
    );

    // A privileged caller ignores all of it
    assert_eq!(s.read(DOM0, None, "/guest/data").unwrap(), b"mine");
}

#[test]
fn node_quota_counts_against_the_inheriting_owner() {
    let config = Config::builder().max_domain_nodes(3).build();
    let mut s = Store::new(config);
    let dom1 = Caller::unprivileged(1);

    s.mkdir(DOM0, None, "/home").unwrap();
    s.set_perms(DOM0, None, "/home", vec![Perm::new(1, PermMode::None)])
        .unwrap();
    assert_eq!(s.domain_node_count(1), 1);

    s.write(dom1, None, "/home/a", b"1").unwrap();
    s.write(dom1, None, "/home/b", b"2").unwrap();
    assert_eq!(s.domain_node_count(1), 3);
    assert_eq!(
        s.write(dom1, None, "/home/c", b"3"),
        Err(XsError::QuotaExceeded("nodes".to_string()))
    );

    // A multi-node creation that would land over quota is refused whole
    s.remove(DOM0, None, "/home/a").unwrap();
    assert_eq!(
        s.write(dom1, None, "/home/deep/leaf", b"x"),
        Err(XsError::QuotaExceeded("nodes".to_string()))
    );
    assert_eq!(s.read(dom1, None, "/home/deep"), Err(XsError::NotFound));
}
