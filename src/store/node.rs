//! Node definitions
//!
//! One named entry in the hierarchical store.
//!
//! ## Ownership Model
//!
//! Nodes are held behind `Rc`. A node is shared by every tree (the live
//! store and every open transaction's private view) that reached it without
//! needing to copy it; `Rc::make_mut` supplies the copy-on-write step, so a
//! node with more than one strong reference is never mutated in place. The
//! derived `Clone` is exactly the required shallow copy: the child map is
//! cloned entry-by-entry, retaining a new `Rc` to each existing child.
//! Cycles cannot occur (children never reference ancestors), so dropping
//! the last `Rc` to a subtree frees it recursively.

use std::collections::BTreeMap;
use std::rc::Rc;

use crate::perms::Perm;

/// A named entry in the store tree
#[derive(Debug, Clone, PartialEq)]
pub struct Node {
    /// Content blob; empty for bare directories
    pub(crate) content: Vec<u8>,

    /// Children by name, lexically ordered
    pub(crate) children: BTreeMap<String, Rc<Node>>,

    /// Ordered permission list; entry 0 is the owner
    pub(crate) perms: Vec<Perm>,

    /// Bumped whenever the child set changes; handed out with directory
    /// listings so paginated readers can detect intervening changes
    pub(crate) generation: u64,
}

impl Node {
    /// Create an empty node with the given permission list
    pub fn new(perms: Vec<Perm>) -> Self {
        Self {
            content: Vec::new(),
            children: BTreeMap::new(),
            perms,
            generation: 0,
        }
    }

    /// The node's content blob
    pub fn content(&self) -> &[u8] {
        &self.content
    }

    /// The node's permission list
    pub fn perms(&self) -> &[Perm] {
        &self.perms
    }

    /// The owning domain (entry 0 of the permission list)
    pub fn owner(&self) -> u32 {
        self.perms.first().map(|p| p.id).unwrap_or(0)
    }

    /// Child-set generation counter
    pub fn generation(&self) -> u64 {
        self.generation
    }

    /// Immediate child names in ascending lexical order
    pub fn child_names(&self) -> Vec<String> {
        self.children.keys().cloned().collect()
    }

    /// Look up an immediate child
    pub fn child(&self, name: &str) -> Option<&Rc<Node>> {
        self.children.get(name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::perms::PermMode;

    fn perms() -> Vec<Perm> {
        vec![Perm::new(0, PermMode::None)]
    }

    #[test]
    fn clone_is_shallow_and_shares_children() {
        let child = Rc::new(Node::new(perms()));
        let mut parent = Node::new(perms());
        parent.children.insert("a".to_string(), Rc::clone(&child));

        let copy = parent.clone();
        assert!(Rc::ptr_eq(
            parent.children.get("a").unwrap(),
            copy.children.get("a").unwrap()
        ));
        assert_eq!(Rc::strong_count(&child), 3);
    }

    #[test]
    fn make_mut_copies_only_when_shared() {
        let mut rc = Rc::new(Node::new(perms()));
        let before = Rc::as_ptr(&rc);
        Rc::make_mut(&mut rc).content = b"x".to_vec();
        // Uniquely owned: mutated in place
        assert_eq!(before, Rc::as_ptr(&rc));

        let other = Rc::clone(&rc);
        Rc::make_mut(&mut rc).content = b"y".to_vec();
        // Shared: copy-on-write intervened
        assert_ne!(Rc::as_ptr(&other), Rc::as_ptr(&rc));
        assert_eq!(other.content(), b"x");
        assert_eq!(rc.content(), b"y");
    }

}
