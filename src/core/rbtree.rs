//! Intrusive red-black tree over index-addressed nodes
//!
//! The shared ordered container behind the ready queue, the thread-queue
//! wait lists, and the per-processor deadline sets. Nodes are records in a
//! caller-owned slice addressed by stable index; the tree itself stores
//! only the root. A node embeds its key so comparisons never need a second
//! borrow of the slice.
//!
//! Callers serialize access; there is no concurrency here. Every failure
//! mode is a caller contract violation caught by a debug assertion.

use crate::types::OsTick;

/// Index of a node in the caller's slice
pub type RbIndex = u16;

type Link = Option<RbIndex>;

/// Balance color plus the distinguishable off-tree state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RbState {
    /// Not linked into any tree
    Off,
    Red,
    Black,
}

/// A tree node embedded in a larger record
#[derive(Debug, Clone, Copy)]
pub struct RbNode<K> {
    parent: Link,
    left: Link,
    right: Link,
    state: RbState,
    /// Ordering key, written by the caller before insertion
    pub key: K,
}

impl<K> RbNode<K> {
    pub const fn new(key: K) -> Self {
        RbNode {
            parent: None,
            left: None,
            right: None,
            state: RbState::Off,
            key,
        }
    }

    /// Whether the node is currently linked into a tree
    #[inline(always)]
    pub fn is_linked(&self) -> bool {
        self.state != RbState::Off
    }
}

impl RbNode<OsTick> {
    pub const fn zeroed() -> Self {
        Self::new(0)
    }
}

/// Red-black tree control: just the root index
pub struct RbTree {
    root: Link,
}

impl RbTree {
    pub const fn new() -> Self {
        RbTree { root: None }
    }

    pub fn init(&mut self) {
        self.root = None;
    }

    #[inline(always)]
    pub fn is_empty(&self) -> bool {
        self.root.is_none()
    }

    #[inline(always)]
    pub fn root(&self) -> Link {
        self.root
    }

    /// Insert a node, keeping search-tree order under `less`.
    ///
    /// Returns true if the node became the new minimum. Equal-key placement
    /// is decided by the comparator: a strict `<` lands the node behind
    /// existing equals (FIFO), `<=` lands it ahead of them (LIFO).
    pub fn insert<K: Copy, F>(&mut self, nodes: &mut [RbNode<K>], this: RbIndex, less: F) -> bool
    where
        F: Fn(&K, &K) -> bool,
    {
        let t = this as usize;
        debug_assert!(!nodes[t].is_linked(), "inserting a node that is already on a tree");

        let key = nodes[t].key;
        let mut is_min = true;
        let mut parent: Link = None;
        let mut go_left = false;
        let mut cur = self.root;

        while let Some(c) = cur {
            parent = Some(c);
            go_left = less(&key, &nodes[c as usize].key);
            if go_left {
                cur = nodes[c as usize].left;
            } else {
                is_min = false;
                cur = nodes[c as usize].right;
            }
        }

        nodes[t].parent = parent;
        nodes[t].left = None;
        nodes[t].right = None;
        nodes[t].state = RbState::Red;

        match parent {
            None => self.root = Some(this),
            Some(p) => {
                if go_left {
                    nodes[p as usize].left = Some(this);
                } else {
                    nodes[p as usize].right = Some(this);
                }
            }
        }

        self.insert_fixup(nodes, this);
        is_min
    }

    /// Remove a node and rebalance.
    ///
    /// Extracting an off-tree node is a caller contract violation.
    pub fn extract<K: Copy>(&mut self, nodes: &mut [RbNode<K>], this: RbIndex) {
        let z = this as usize;
        debug_assert!(nodes[z].is_linked(), "extracting an off-tree node");

        let (x, x_parent, removed_black) = match (nodes[z].left, nodes[z].right) {
            (None, right) => {
                let p = nodes[z].parent;
                let black = nodes[z].state == RbState::Black;
                self.transplant(nodes, this, right);
                (right, p, black)
            }
            (left, None) => {
                let p = nodes[z].parent;
                let black = nodes[z].state == RbState::Black;
                self.transplant(nodes, this, left);
                (left, p, black)
            }
            (Some(zl), Some(zr)) => {
                // replace with the successor, the minimum of the right subtree
                let mut y = zr;
                while let Some(l) = nodes[y as usize].left {
                    y = l;
                }
                let y_black = nodes[y as usize].state == RbState::Black;
                let x = nodes[y as usize].right;
                let x_parent;
                if nodes[y as usize].parent == Some(this) {
                    x_parent = Some(y);
                } else {
                    x_parent = nodes[y as usize].parent;
                    self.transplant(nodes, y, x);
                    nodes[y as usize].right = Some(zr);
                    nodes[zr as usize].parent = Some(y);
                }
                self.transplant(nodes, this, Some(y));
                nodes[y as usize].left = Some(zl);
                nodes[zl as usize].parent = Some(y);
                nodes[y as usize].state = nodes[z].state;
                (x, x_parent, y_black)
            }
        };

        nodes[z].parent = None;
        nodes[z].left = None;
        nodes[z].right = None;
        nodes[z].state = RbState::Off;

        if removed_black {
            self.extract_fixup(nodes, x, x_parent);
        }
    }

    /// The node with the smallest key, or `None`.
    pub fn minimum<K>(&self, nodes: &[RbNode<K>]) -> Link {
        let mut cur = self.root?;
        while let Some(l) = nodes[cur as usize].left {
            cur = l;
        }
        Some(cur)
    }

    /// The node with the largest key, or `None`.
    pub fn maximum<K>(&self, nodes: &[RbNode<K>]) -> Link {
        let mut cur = self.root?;
        while let Some(r) = nodes[cur as usize].right {
            cur = r;
        }
        Some(cur)
    }

    /// The in-order neighbor with the next-larger key.
    pub fn successor<K>(&self, nodes: &[RbNode<K>], this: RbIndex) -> Link {
        if let Some(r) = nodes[this as usize].right {
            let mut cur = r;
            while let Some(l) = nodes[cur as usize].left {
                cur = l;
            }
            return Some(cur);
        }
        let mut child = this;
        let mut cur = nodes[this as usize].parent;
        while let Some(p) = cur {
            if nodes[p as usize].left == Some(child) {
                return Some(p);
            }
            child = p;
            cur = nodes[p as usize].parent;
        }
        None
    }

    /// The in-order neighbor with the next-smaller key.
    pub fn predecessor<K>(&self, nodes: &[RbNode<K>], this: RbIndex) -> Link {
        if let Some(l) = nodes[this as usize].left {
            let mut cur = l;
            while let Some(r) = nodes[cur as usize].right {
                cur = r;
            }
            return Some(cur);
        }
        let mut child = this;
        let mut cur = nodes[this as usize].parent;
        while let Some(p) = cur {
            if nodes[p as usize].right == Some(child) {
                return Some(p);
            }
            child = p;
            cur = nodes[p as usize].parent;
        }
        None
    }

    /// First node of a bottom-up (post-order) walk.
    ///
    /// Together with [`RbTree::postorder_next`] this visits every node
    /// after both of its children, so a caller may destroy each node
    /// exactly once while walking.
    pub fn postorder_first<K>(&self, nodes: &[RbNode<K>]) -> Link {
        self.root.map(|r| Self::leftmost_deepest(nodes, r))
    }

    /// Next node of a bottom-up walk.
    pub fn postorder_next<K>(&self, nodes: &[RbNode<K>], this: RbIndex) -> Link {
        let p = nodes[this as usize].parent?;
        if nodes[p as usize].left == Some(this) {
            if let Some(r) = nodes[p as usize].right {
                return Some(Self::leftmost_deepest(nodes, r));
            }
        }
        Some(p)
    }

    fn leftmost_deepest<K>(nodes: &[RbNode<K>], from: RbIndex) -> RbIndex {
        let mut cur = from;
        loop {
            if let Some(l) = nodes[cur as usize].left {
                cur = l;
            } else if let Some(r) = nodes[cur as usize].right {
                cur = r;
            } else {
                return cur;
            }
        }
    }

    // ============ Rebalancing ============

    /// Replace the subtree rooted at `u` with the subtree rooted at `v`,
    /// fixing `u`'s parent's child link and `v`'s parent pointer.
    fn transplant<K>(&mut self, nodes: &mut [RbNode<K>], u: RbIndex, v: Link) {
        let up = nodes[u as usize].parent;
        match up {
            None => self.root = v,
            Some(p) => {
                if nodes[p as usize].left == Some(u) {
                    nodes[p as usize].left = v;
                } else {
                    nodes[p as usize].right = v;
                }
            }
        }
        if let Some(v) = v {
            nodes[v as usize].parent = up;
        }
    }

    fn rotate_left<K>(&mut self, nodes: &mut [RbNode<K>], x: RbIndex) {
        let y = nodes[x as usize].right.expect("left rotation without right child");
        let yl = nodes[y as usize].left;

        nodes[x as usize].right = yl;
        if let Some(yl) = yl {
            nodes[yl as usize].parent = Some(x);
        }
        let xp = nodes[x as usize].parent;
        nodes[y as usize].parent = xp;
        match xp {
            None => self.root = Some(y),
            Some(p) => {
                if nodes[p as usize].left == Some(x) {
                    nodes[p as usize].left = Some(y);
                } else {
                    nodes[p as usize].right = Some(y);
                }
            }
        }
        nodes[y as usize].left = Some(x);
        nodes[x as usize].parent = Some(y);
    }

    fn rotate_right<K>(&mut self, nodes: &mut [RbNode<K>], x: RbIndex) {
        let y = nodes[x as usize].left.expect("right rotation without left child");
        let yr = nodes[y as usize].right;

        nodes[x as usize].left = yr;
        if let Some(yr) = yr {
            nodes[yr as usize].parent = Some(x);
        }
        let xp = nodes[x as usize].parent;
        nodes[y as usize].parent = xp;
        match xp {
            None => self.root = Some(y),
            Some(p) => {
                if nodes[p as usize].left == Some(x) {
                    nodes[p as usize].left = Some(y);
                } else {
                    nodes[p as usize].right = Some(y);
                }
            }
        }
        nodes[y as usize].right = Some(x);
        nodes[x as usize].parent = Some(y);
    }

    fn insert_fixup<K>(&mut self, nodes: &mut [RbNode<K>], mut z: RbIndex) {
        loop {
            let p = match nodes[z as usize].parent {
                Some(p) if nodes[p as usize].state == RbState::Red => p,
                _ => break,
            };
            // a red node always has a parent
            let g = nodes[p as usize].parent.expect("red node at root");

            if nodes[g as usize].left == Some(p) {
                let uncle = nodes[g as usize].right;
                if uncle.is_some_and(|u| nodes[u as usize].state == RbState::Red) {
                    let u = uncle.unwrap();
                    nodes[p as usize].state = RbState::Black;
                    nodes[u as usize].state = RbState::Black;
                    nodes[g as usize].state = RbState::Red;
                    z = g;
                } else {
                    if nodes[p as usize].right == Some(z) {
                        z = p;
                        self.rotate_left(nodes, z);
                    }
                    let p = nodes[z as usize].parent.expect("fixup lost parent");
                    let g = nodes[p as usize].parent.expect("fixup lost grandparent");
                    nodes[p as usize].state = RbState::Black;
                    nodes[g as usize].state = RbState::Red;
                    self.rotate_right(nodes, g);
                }
            } else {
                let uncle = nodes[g as usize].left;
                if uncle.is_some_and(|u| nodes[u as usize].state == RbState::Red) {
                    let u = uncle.unwrap();
                    nodes[p as usize].state = RbState::Black;
                    nodes[u as usize].state = RbState::Black;
                    nodes[g as usize].state = RbState::Red;
                    z = g;
                } else {
                    if nodes[p as usize].left == Some(z) {
                        z = p;
                        self.rotate_right(nodes, z);
                    }
                    let p = nodes[z as usize].parent.expect("fixup lost parent");
                    let g = nodes[p as usize].parent.expect("fixup lost grandparent");
                    nodes[p as usize].state = RbState::Black;
                    nodes[g as usize].state = RbState::Red;
                    self.rotate_left(nodes, g);
                }
            }
        }
        if let Some(r) = self.root {
            nodes[r as usize].state = RbState::Black;
        }
    }

    /// Iterative double-black resolution after removing a black node.
    ///
    /// `x` is the child that replaced the removed node (possibly absent),
    /// `parent` its parent. Iterative rather than recursive so stack use
    /// is bounded.
    fn extract_fixup<K>(&mut self, nodes: &mut [RbNode<K>], mut x: Link, mut parent: Link) {
        fn is_black<K>(nodes: &[RbNode<K>], link: Link) -> bool {
            link.map_or(true, |i| nodes[i as usize].state == RbState::Black)
        }

        while x != self.root && is_black(nodes, x) {
            let p = match parent {
                Some(p) => p,
                None => break,
            };

            if nodes[p as usize].left == x {
                // sibling exists: the removed node was black
                let mut w = nodes[p as usize].right.expect("black node without sibling");
                if nodes[w as usize].state == RbState::Red {
                    nodes[w as usize].state = RbState::Black;
                    nodes[p as usize].state = RbState::Red;
                    self.rotate_left(nodes, p);
                    w = nodes[p as usize].right.expect("rotation lost sibling");
                }
                if is_black(nodes, nodes[w as usize].left) && is_black(nodes, nodes[w as usize].right) {
                    nodes[w as usize].state = RbState::Red;
                    x = Some(p);
                    parent = nodes[p as usize].parent;
                } else {
                    if is_black(nodes, nodes[w as usize].right) {
                        if let Some(wl) = nodes[w as usize].left {
                            nodes[wl as usize].state = RbState::Black;
                        }
                        nodes[w as usize].state = RbState::Red;
                        self.rotate_right(nodes, w);
                        w = nodes[p as usize].right.expect("rotation lost sibling");
                    }
                    nodes[w as usize].state = nodes[p as usize].state;
                    nodes[p as usize].state = RbState::Black;
                    if let Some(wr) = nodes[w as usize].right {
                        nodes[wr as usize].state = RbState::Black;
                    }
                    self.rotate_left(nodes, p);
                    x = self.root;
                    parent = None;
                }
            } else {
                let mut w = nodes[p as usize].left.expect("black node without sibling");
                if nodes[w as usize].state == RbState::Red {
                    nodes[w as usize].state = RbState::Black;
                    nodes[p as usize].state = RbState::Red;
                    self.rotate_right(nodes, p);
                    w = nodes[p as usize].left.expect("rotation lost sibling");
                }
                if is_black(nodes, nodes[w as usize].left) && is_black(nodes, nodes[w as usize].right) {
                    nodes[w as usize].state = RbState::Red;
                    x = Some(p);
                    parent = nodes[p as usize].parent;
                } else {
                    if is_black(nodes, nodes[w as usize].left) {
                        if let Some(wr) = nodes[w as usize].right {
                            nodes[wr as usize].state = RbState::Black;
                        }
                        nodes[w as usize].state = RbState::Red;
                        self.rotate_left(nodes, w);
                        w = nodes[p as usize].left.expect("rotation lost sibling");
                    }
                    nodes[w as usize].state = nodes[p as usize].state;
                    nodes[p as usize].state = RbState::Black;
                    if let Some(wl) = nodes[w as usize].left {
                        nodes[wl as usize].state = RbState::Black;
                    }
                    self.rotate_right(nodes, p);
                    x = self.root;
                    parent = None;
                }
            }
        }
        if let Some(x) = x {
            nodes[x as usize].state = RbState::Black;
        }
    }
}

impl Default for RbTree {
    fn default() -> Self {
        Self::new()
    }
}
