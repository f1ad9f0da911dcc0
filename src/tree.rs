use alloc::vec::Vec;
use core::fmt;

/// A value that can summarize itself together with its subtrees.
///
/// The tree caches one augment per node and keeps it equal to
/// `value.augment(left_augment, right_augment)` after every structural change and after
/// [`RbTree::mark_dirty`].
pub(crate) trait Augmented {
    type Augment: Clone;

    fn augment(&self, left: Option<&Self::Augment>, right: Option<&Self::Augment>)
    -> Self::Augment;
}

/// Handle to a node of an [`RbTree`].
///
/// Handles stay valid until the node is removed. Slots are reused afterwards, so a stale handle
/// may alias a newer node.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub(crate) struct NodeId(usize);

#[derive(Clone, Copy)]
enum Side {
    Left,
    Right,
}

struct Node<T: Augmented> {
    value: T,
    augment: T::Augment,
    parent: Option<NodeId>,
    left: Option<NodeId>,
    right: Option<NodeId>,
    red: bool,
}

/// An arena-backed red-black tree whose in-order traversal is the sequence it stores.
///
/// There is no key: callers position new nodes relative to existing ones with
/// [`Self::insert_before`] / [`Self::insert_after`], and search by walking augments from
/// [`Self::root`].
pub(crate) struct RbTree<T: Augmented> {
    nodes: Vec<Option<Node<T>>>,
    free: Vec<usize>,
    root: Option<NodeId>,
    len: usize,
}

impl<T: Augmented> RbTree<T> {
    pub(crate) fn new() -> Self {
        Self {
            nodes: Vec::new(),
            free: Vec::new(),
            root: None,
            len: 0,
        }
    }

    pub(crate) fn len(&self) -> usize {
        self.len
    }

    pub(crate) fn root(&self) -> Option<NodeId> {
        self.root
    }

    pub(crate) fn first(&self) -> Option<NodeId> {
        self.root.map(|root| self.leftmost(root))
    }

    pub(crate) fn last(&self) -> Option<NodeId> {
        self.root.map(|root| self.rightmost(root))
    }

    pub(crate) fn parent(&self, id: NodeId) -> Option<NodeId> {
        self.node(id).parent
    }

    pub(crate) fn left(&self, id: NodeId) -> Option<NodeId> {
        self.node(id).left
    }

    pub(crate) fn right(&self, id: NodeId) -> Option<NodeId> {
        self.node(id).right
    }

    pub(crate) fn next(&self, id: NodeId) -> Option<NodeId> {
        if let Some(right) = self.node(id).right {
            return Some(self.leftmost(right));
        }
        let mut cur = id;
        let mut parent = self.node(cur).parent;
        while let Some(p) = parent {
            if self.node(p).left == Some(cur) {
                return Some(p);
            }
            cur = p;
            parent = self.node(p).parent;
        }
        None
    }

    pub(crate) fn previous(&self, id: NodeId) -> Option<NodeId> {
        if let Some(left) = self.node(id).left {
            return Some(self.rightmost(left));
        }
        let mut cur = id;
        let mut parent = self.node(cur).parent;
        while let Some(p) = parent {
            if self.node(p).right == Some(cur) {
                return Some(p);
            }
            cur = p;
            parent = self.node(p).parent;
        }
        None
    }

    pub(crate) fn get(&self, id: NodeId) -> &T {
        &self.node(id).value
    }

    /// Mutable access to a payload.
    ///
    /// Call [`Self::mark_dirty`] afterwards if the change affects the augment.
    pub(crate) fn get_mut(&mut self, id: NodeId) -> &mut T {
        &mut self.node_mut(id).value
    }

    pub(crate) fn augment(&self, id: NodeId) -> &T::Augment {
        &self.node(id).augment
    }

    /// Recomputes the augments of `id` and all of its ancestors.
    pub(crate) fn mark_dirty(&mut self, id: NodeId) {
        self.recompute_upward(Some(id));
    }

    /// Inserts `value` right before `reference`, or at the start when `reference` is `None`.
    pub(crate) fn insert_before(&mut self, reference: Option<NodeId>, value: T) -> NodeId {
        let reference = match reference {
            Some(id) => Some(id),
            None => self.first(),
        };
        match reference {
            None => self.link(None, Side::Left, value),
            Some(id) => match self.node(id).left {
                None => self.link(Some(id), Side::Left, value),
                Some(left) => {
                    let parent = self.rightmost(left);
                    self.link(Some(parent), Side::Right, value)
                }
            },
        }
    }

    /// Inserts `value` right after `reference`, or at the end when `reference` is `None`.
    pub(crate) fn insert_after(&mut self, reference: Option<NodeId>, value: T) -> NodeId {
        let reference = match reference {
            Some(id) => Some(id),
            None => self.last(),
        };
        match reference {
            None => self.link(None, Side::Right, value),
            Some(id) => match self.node(id).right {
                None => self.link(Some(id), Side::Right, value),
                Some(right) => {
                    let parent = self.leftmost(right);
                    self.link(Some(parent), Side::Left, value)
                }
            },
        }
    }

    /// Detaches `id` and returns its payload.
    ///
    /// Panics if `id` is not a live node.
    pub(crate) fn remove(&mut self, z: NodeId) -> T {
        let (z_left, z_right, z_parent, z_red) = {
            let n = self.node(z);
            (n.left, n.right, n.parent, n.red)
        };

        let x;
        let x_parent;
        let removed_red;
        match (z_left, z_right) {
            (None, _) => {
                x = z_right;
                x_parent = z_parent;
                removed_red = z_red;
                self.transplant(z, z_right);
            }
            (_, None) => {
                x = z_left;
                x_parent = z_parent;
                removed_red = z_red;
                self.transplant(z, z_left);
            }
            (Some(l), Some(r)) => {
                let y = self.leftmost(r);
                removed_red = self.node(y).red;
                x = self.node(y).right;
                if self.node(y).parent == Some(z) {
                    x_parent = Some(y);
                } else {
                    x_parent = self.node(y).parent;
                    self.transplant(y, x);
                    self.node_mut(y).right = Some(r);
                    self.node_mut(r).parent = Some(y);
                }
                self.transplant(z, Some(y));
                self.node_mut(y).left = Some(l);
                self.node_mut(l).parent = Some(y);
                self.node_mut(y).red = z_red;
            }
        }

        let Some(node) = self.nodes[z.0].take() else {
            unreachable!("rb-tree: {z:?} vanished during removal");
        };
        self.free.push(z.0);
        self.len -= 1;

        self.recompute_upward(x_parent);
        if !removed_red {
            self.remove_fixup(x, x_parent);
        }
        node.value
    }

    /// Empties the tree, handing every payload to `finalize` in sequence order.
    pub(crate) fn remove_all(&mut self, mut finalize: impl FnMut(T)) {
        let mut order = Vec::with_capacity(self.len);
        let mut cur = self.first();
        while let Some(id) = cur {
            order.push(id);
            cur = self.next(id);
        }
        for id in order {
            if let Some(node) = self.nodes[id.0].take() {
                finalize(node.value);
            }
        }
        self.nodes.clear();
        self.free.clear();
        self.root = None;
        self.len = 0;
    }

    pub(crate) fn iter(&self) -> Iter<'_, T> {
        Iter {
            tree: self,
            next: self.first(),
        }
    }

    fn node(&self, id: NodeId) -> &Node<T> {
        match self.nodes.get(id.0) {
            Some(Some(node)) => node,
            _ => panic!("rb-tree: {id:?} is not a live node"),
        }
    }

    fn node_mut(&mut self, id: NodeId) -> &mut Node<T> {
        match self.nodes.get_mut(id.0) {
            Some(Some(node)) => node,
            _ => panic!("rb-tree: {id:?} is not a live node"),
        }
    }

    fn is_red(&self, id: Option<NodeId>) -> bool {
        id.is_some_and(|id| self.node(id).red)
    }

    fn set_red(&mut self, id: NodeId, red: bool) {
        self.node_mut(id).red = red;
    }

    fn leftmost(&self, mut id: NodeId) -> NodeId {
        while let Some(left) = self.node(id).left {
            id = left;
        }
        id
    }

    fn rightmost(&self, mut id: NodeId) -> NodeId {
        while let Some(right) = self.node(id).right {
            id = right;
        }
        id
    }

    fn alloc(&mut self, node: Node<T>) -> NodeId {
        if let Some(index) = self.free.pop() {
            self.nodes[index] = Some(node);
            NodeId(index)
        } else {
            self.nodes.push(Some(node));
            NodeId(self.nodes.len() - 1)
        }
    }

    fn link(&mut self, parent: Option<NodeId>, side: Side, value: T) -> NodeId {
        let augment = value.augment(None, None);
        let id = self.alloc(Node {
            value,
            augment,
            parent,
            left: None,
            right: None,
            red: true,
        });
        match parent {
            None => {
                debug_assert!(self.root.is_none(), "rb-tree: linking a second root");
                self.root = Some(id);
            }
            Some(p) => {
                let pn = self.node_mut(p);
                let slot = match side {
                    Side::Left => &mut pn.left,
                    Side::Right => &mut pn.right,
                };
                debug_assert!(slot.is_none(), "rb-tree: linking over an existing child");
                *slot = Some(id);
            }
        }
        self.len += 1;

        self.recompute_upward(parent);
        self.insert_fixup(id);
        id
    }

    fn recompute(&mut self, id: NodeId) {
        let augment = {
            let n = self.node(id);
            let left = n.left.map(|l| &self.node(l).augment);
            let right = n.right.map(|r| &self.node(r).augment);
            n.value.augment(left, right)
        };
        self.node_mut(id).augment = augment;
    }

    fn recompute_upward(&mut self, mut cur: Option<NodeId>) {
        while let Some(id) = cur {
            self.recompute(id);
            cur = self.node(id).parent;
        }
    }

    fn replace_child(&mut self, parent: Option<NodeId>, old: NodeId, new: Option<NodeId>) {
        match parent {
            None => self.root = new,
            Some(p) => {
                let pn = self.node_mut(p);
                if pn.left == Some(old) {
                    pn.left = new;
                } else {
                    debug_assert_eq!(pn.right, Some(old));
                    pn.right = new;
                }
            }
        }
    }

    fn transplant(&mut self, u: NodeId, v: Option<NodeId>) {
        let parent = self.node(u).parent;
        self.replace_child(parent, u, v);
        if let Some(v) = v {
            self.node_mut(v).parent = parent;
        }
    }

    fn rotate_left(&mut self, x: NodeId) {
        let Some(y) = self.node(x).right else {
            unreachable!("rb-tree: rotate_left without a right child");
        };
        let y_left = self.node(y).left;
        self.node_mut(x).right = y_left;
        if let Some(b) = y_left {
            self.node_mut(b).parent = Some(x);
        }
        let x_parent = self.node(x).parent;
        self.node_mut(y).parent = x_parent;
        self.replace_child(x_parent, x, Some(y));
        self.node_mut(y).left = Some(x);
        self.node_mut(x).parent = Some(y);

        self.recompute(x);
        self.recompute(y);
    }

    fn rotate_right(&mut self, x: NodeId) {
        let Some(y) = self.node(x).left else {
            unreachable!("rb-tree: rotate_right without a left child");
        };
        let y_right = self.node(y).right;
        self.node_mut(x).left = y_right;
        if let Some(b) = y_right {
            self.node_mut(b).parent = Some(x);
        }
        let x_parent = self.node(x).parent;
        self.node_mut(y).parent = x_parent;
        self.replace_child(x_parent, x, Some(y));
        self.node_mut(y).right = Some(x);
        self.node_mut(x).parent = Some(y);

        self.recompute(x);
        self.recompute(y);
    }

    fn insert_fixup(&mut self, mut z: NodeId) {
        loop {
            let Some(p) = self.node(z).parent else {
                break;
            };
            if !self.node(p).red {
                break;
            }
            // A red node is never the root, so `p` has a parent.
            let Some(g) = self.node(p).parent else {
                break;
            };

            if self.node(g).left == Some(p) {
                let uncle = self.node(g).right;
                if let Some(u) = uncle.filter(|&u| self.node(u).red) {
                    self.set_red(p, false);
                    self.set_red(u, false);
                    self.set_red(g, true);
                    z = g;
                    continue;
                }
                let mut p = p;
                if self.node(p).right == Some(z) {
                    z = p;
                    self.rotate_left(z);
                    p = self.node(z).parent.unwrap_or(z);
                }
                self.set_red(p, false);
                self.set_red(g, true);
                self.rotate_right(g);
            } else {
                let uncle = self.node(g).left;
                if let Some(u) = uncle.filter(|&u| self.node(u).red) {
                    self.set_red(p, false);
                    self.set_red(u, false);
                    self.set_red(g, true);
                    z = g;
                    continue;
                }
                let mut p = p;
                if self.node(p).left == Some(z) {
                    z = p;
                    self.rotate_right(z);
                    p = self.node(z).parent.unwrap_or(z);
                }
                self.set_red(p, false);
                self.set_red(g, true);
                self.rotate_left(g);
            }
        }
        if let Some(root) = self.root {
            self.set_red(root, false);
        }
    }

    fn remove_fixup(&mut self, mut x: Option<NodeId>, mut parent: Option<NodeId>) {
        while x != self.root && !self.is_red(x) {
            let Some(p) = parent else {
                break;
            };
            if self.node(p).left == x {
                let Some(mut w) = self.node(p).right else {
                    unreachable!("rb-tree: black height violated at {p:?}");
                };
                if self.node(w).red {
                    self.set_red(w, false);
                    self.set_red(p, true);
                    self.rotate_left(p);
                    let Some(sibling) = self.node(p).right else {
                        unreachable!("rb-tree: black height violated at {p:?}");
                    };
                    w = sibling;
                }
                let (wl, wr) = (self.node(w).left, self.node(w).right);
                if !self.is_red(wl) && !self.is_red(wr) {
                    self.set_red(w, true);
                    x = Some(p);
                    parent = self.node(p).parent;
                } else {
                    if !self.is_red(wr) {
                        if let Some(wl) = wl {
                            self.set_red(wl, false);
                        }
                        self.set_red(w, true);
                        self.rotate_right(w);
                        let Some(sibling) = self.node(p).right else {
                            unreachable!("rb-tree: black height violated at {p:?}");
                        };
                        w = sibling;
                    }
                    let p_red = self.node(p).red;
                    self.set_red(w, p_red);
                    self.set_red(p, false);
                    if let Some(wr) = self.node(w).right {
                        self.set_red(wr, false);
                    }
                    self.rotate_left(p);
                    x = self.root;
                    parent = None;
                }
            } else {
                let Some(mut w) = self.node(p).left else {
                    unreachable!("rb-tree: black height violated at {p:?}");
                };
                if self.node(w).red {
                    self.set_red(w, false);
                    self.set_red(p, true);
                    self.rotate_right(p);
                    let Some(sibling) = self.node(p).left else {
                        unreachable!("rb-tree: black height violated at {p:?}");
                    };
                    w = sibling;
                }
                let (wl, wr) = (self.node(w).left, self.node(w).right);
                if !self.is_red(wl) && !self.is_red(wr) {
                    self.set_red(w, true);
                    x = Some(p);
                    parent = self.node(p).parent;
                } else {
                    if !self.is_red(wl) {
                        if let Some(wr) = wr {
                            self.set_red(wr, false);
                        }
                        self.set_red(w, true);
                        self.rotate_left(w);
                        let Some(sibling) = self.node(p).left else {
                            unreachable!("rb-tree: black height violated at {p:?}");
                        };
                        w = sibling;
                    }
                    let p_red = self.node(p).red;
                    self.set_red(w, p_red);
                    self.set_red(p, false);
                    if let Some(wl) = self.node(w).left {
                        self.set_red(wl, false);
                    }
                    self.rotate_right(p);
                    x = self.root;
                    parent = None;
                }
            }
        }
        if let Some(x) = x {
            self.set_red(x, false);
        }
    }
}

#[cfg(test)]
impl<T: Augmented> RbTree<T>
where
    T::Augment: PartialEq + fmt::Debug,
{
    /// Asserts the red-black shape, parent links, and augment freshness of the whole tree.
    pub(crate) fn check(&self) {
        if let Some(root) = self.root {
            assert!(!self.node(root).red, "red root");
            assert_eq!(self.node(root).parent, None, "root has a parent");
        }
        let mut count = 0;
        self.check_node(self.root, None, &mut count);
        assert_eq!(count, self.len, "len out of sync");
    }

    fn check_node(&self, id: Option<NodeId>, parent: Option<NodeId>, count: &mut usize) -> usize {
        let Some(id) = id else {
            return 1;
        };
        *count += 1;
        let n = self.node(id);
        assert_eq!(n.parent, parent, "broken parent link at {id:?}");
        if n.red {
            assert!(
                !self.is_red(n.left) && !self.is_red(n.right),
                "red-red at {id:?}"
            );
        }
        let lh = self.check_node(n.left, Some(id), count);
        let rh = self.check_node(n.right, Some(id), count);
        assert_eq!(lh, rh, "black height mismatch at {id:?}");
        let expected = n.value.augment(
            n.left.map(|l| &self.node(l).augment),
            n.right.map(|r| &self.node(r).augment),
        );
        assert_eq!(expected, n.augment, "stale augment at {id:?}");
        lh + usize::from(!n.red)
    }

    pub(crate) fn height(&self) -> usize {
        fn walk<T: Augmented>(tree: &RbTree<T>, id: Option<NodeId>) -> usize {
            match id {
                None => 0,
                Some(id) => 1 + walk(tree, tree.left(id)).max(walk(tree, tree.right(id))),
            }
        }
        walk(self, self.root)
    }
}

impl<T: Augmented + fmt::Debug> fmt::Debug for RbTree<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_list().entries(self.iter().map(|(_, v)| v)).finish()
    }
}

pub(crate) struct Iter<'a, T: Augmented> {
    tree: &'a RbTree<T>,
    next: Option<NodeId>,
}

impl<'a, T: Augmented> Iterator for Iter<'a, T> {
    type Item = (NodeId, &'a T);

    fn next(&mut self) -> Option<Self::Item> {
        let id = self.next?;
        self.next = self.tree.next(id);
        Some((id, self.tree.get(id)))
    }
}
