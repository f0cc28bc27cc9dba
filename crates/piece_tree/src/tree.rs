//! Red-black balancing and aggregate maintenance.
//!
//! Every node's `size_left` / `lf_left` pair is the tree's implicit key, so
//! every rotation and splice below is responsible for keeping the pair exact.
//! Rotations fix exactly the two rotated nodes; structural changes propagate
//! either a known delta (`update_tree_metadata`) or a recomputed left-spine
//! value (`recompute_tree_metadata`) up to the root.

use crate::node::{NodeColor, NodeIdx, TreeNode, NIL};
use crate::piece_tree::{Piece, PieceTree};

fn add_signed(base: usize, delta: isize) -> usize {
    debug_assert!(delta >= 0 || base >= delta.unsigned_abs());
    (base as isize + delta) as usize
}

impl PieceTree {
    pub(crate) fn alloc_node(&mut self, piece: Piece) -> NodeIdx {
        let node = TreeNode::new(piece);
        match self.free.pop() {
            Some(idx) => {
                self.nodes[idx] = node;
                idx
            }
            None => {
                self.nodes.push(node);
                self.nodes.len() - 1
            }
        }
    }

    fn free_node(&mut self, z: NodeIdx) {
        debug_assert_ne!(z, NIL);
        self.nodes[z] = TreeNode::sentinel();
        self.free.push(z);
    }

    /// The delete fixup parks a parent pointer on the sentinel; clear it once
    /// the tree is consistent again.
    fn reset_sentinel(&mut self) {
        self.nodes[NIL].parent = NIL;
    }

    pub(crate) fn leftest(&self, mut x: NodeIdx) -> NodeIdx {
        while self.nodes[x].left != NIL {
            x = self.nodes[x].left;
        }
        x
    }

    pub(crate) fn rightest(&self, mut x: NodeIdx) -> NodeIdx {
        while self.nodes[x].right != NIL {
            x = self.nodes[x].right;
        }
        x
    }

    /// In-order successor, NIL when `x` is the last node.
    pub(crate) fn next(&self, x: NodeIdx) -> NodeIdx {
        if self.nodes[x].right != NIL {
            return self.leftest(self.nodes[x].right);
        }
        let mut cur = x;
        loop {
            let parent = self.nodes[cur].parent;
            if parent == NIL || self.nodes[parent].left == cur {
                return parent;
            }
            cur = parent;
        }
    }

    /// In-order predecessor, NIL when `x` is the first node.
    pub(crate) fn prev(&self, x: NodeIdx) -> NodeIdx {
        if self.nodes[x].left != NIL {
            return self.rightest(self.nodes[x].left);
        }
        let mut cur = x;
        loop {
            let parent = self.nodes[cur].parent;
            if parent == NIL || self.nodes[parent].right == cur {
                return parent;
            }
            cur = parent;
        }
    }

    /// Total byte length of the subtree rooted at `x`, O(h) via `size_left`.
    fn calculate_size(&self, x: NodeIdx) -> usize {
        if x == NIL {
            return 0;
        }
        self.nodes[x].size_left + self.nodes[x].piece.length + self.calculate_size(self.nodes[x].right)
    }

    /// Total terminator count of the subtree rooted at `x`.
    fn calculate_lf(&self, x: NodeIdx) -> usize {
        if x == NIL {
            return 0;
        }
        self.nodes[x].lf_left
            + self.nodes[x].piece.line_feed_cnt
            + self.calculate_lf(self.nodes[x].right)
    }

    /// Apply a known size/terminator delta of `x`'s subtree to every ancestor
    /// holding `x` in its left subtree.
    pub(crate) fn update_tree_metadata(&mut self, mut x: NodeIdx, delta: isize, lf_delta: isize) {
        if delta == 0 && lf_delta == 0 {
            return;
        }
        while x != self.root && x != NIL {
            let parent = self.nodes[x].parent;
            if self.nodes[parent].left == x {
                self.nodes[parent].size_left = add_signed(self.nodes[parent].size_left, delta);
                self.nodes[parent].lf_left = add_signed(self.nodes[parent].lf_left, lf_delta);
            }
            x = parent;
        }
    }

    /// Recompute the aggregates of the lowest ancestor whose left subtree
    /// changed, then push the resulting delta to the root.
    pub(crate) fn recompute_tree_metadata(&mut self, mut x: NodeIdx) {
        if x == self.root {
            return;
        }
        while x != self.root && x == self.nodes[self.nodes[x].parent].right {
            x = self.nodes[x].parent;
        }
        if x == self.root {
            return;
        }
        x = self.nodes[x].parent;
        let left = self.nodes[x].left;
        let delta = self.calculate_size(left) as isize - self.nodes[x].size_left as isize;
        let lf_delta = self.calculate_lf(left) as isize - self.nodes[x].lf_left as isize;
        self.nodes[x].size_left = add_signed(self.nodes[x].size_left, delta);
        self.nodes[x].lf_left = add_signed(self.nodes[x].lf_left, lf_delta);
        while x != self.root && (delta != 0 || lf_delta != 0) {
            let parent = self.nodes[x].parent;
            if self.nodes[parent].left == x {
                self.nodes[parent].size_left = add_signed(self.nodes[parent].size_left, delta);
                self.nodes[parent].lf_left = add_signed(self.nodes[parent].lf_left, lf_delta);
            }
            x = parent;
        }
    }

    fn left_rotate(&mut self, x: NodeIdx) {
        let y = self.nodes[x].right;

        // y absorbs x and x's left subtree into its left aggregates
        let moved_size = self.nodes[x].size_left + self.nodes[x].piece.length;
        let moved_lf = self.nodes[x].lf_left + self.nodes[x].piece.line_feed_cnt;
        self.nodes[y].size_left += moved_size;
        self.nodes[y].lf_left += moved_lf;

        let y_left = self.nodes[y].left;
        self.nodes[x].right = y_left;
        if y_left != NIL {
            self.nodes[y_left].parent = x;
        }
        let x_parent = self.nodes[x].parent;
        self.nodes[y].parent = x_parent;
        if x_parent == NIL {
            self.root = y;
        } else if self.nodes[x_parent].left == x {
            self.nodes[x_parent].left = y;
        } else {
            self.nodes[x_parent].right = y;
        }
        self.nodes[y].left = x;
        self.nodes[x].parent = y;
    }

    fn right_rotate(&mut self, y: NodeIdx) {
        let x = self.nodes[y].left;

        let x_right = self.nodes[x].right;
        self.nodes[y].left = x_right;
        if x_right != NIL {
            self.nodes[x_right].parent = y;
        }
        let y_parent = self.nodes[y].parent;
        self.nodes[x].parent = y_parent;

        // y gives up x and x's left subtree from its left aggregates
        let moved_size = self.nodes[x].size_left + self.nodes[x].piece.length;
        let moved_lf = self.nodes[x].lf_left + self.nodes[x].piece.line_feed_cnt;
        self.nodes[y].size_left -= moved_size;
        self.nodes[y].lf_left -= moved_lf;

        if y_parent == NIL {
            self.root = x;
        } else if self.nodes[y_parent].left == y {
            self.nodes[y_parent].left = x;
        } else {
            self.nodes[y_parent].right = x;
        }
        self.nodes[x].right = y;
        self.nodes[y].parent = x;
    }

    /// Splice `piece` in as the in-order predecessor of `node`.
    pub(crate) fn rb_insert_left(&mut self, node: NodeIdx, piece: Piece) -> NodeIdx {
        let z = self.alloc_node(piece);
        if self.root == NIL {
            self.root = z;
            self.nodes[z].color = NodeColor::Black;
            return z;
        }
        if self.nodes[node].left == NIL {
            self.nodes[node].left = z;
            self.nodes[z].parent = node;
        } else {
            let prev = self.rightest(self.nodes[node].left);
            self.nodes[prev].right = z;
            self.nodes[z].parent = prev;
        }
        self.fix_insert(z);
        z
    }

    /// Splice `piece` in as the in-order successor of `node`.
    pub(crate) fn rb_insert_right(&mut self, node: NodeIdx, piece: Piece) -> NodeIdx {
        let z = self.alloc_node(piece);
        if self.root == NIL {
            self.root = z;
            self.nodes[z].color = NodeColor::Black;
            return z;
        }
        if self.nodes[node].right == NIL {
            self.nodes[node].right = z;
            self.nodes[z].parent = node;
        } else {
            let next = self.leftest(self.nodes[node].right);
            self.nodes[next].left = z;
            self.nodes[z].parent = next;
        }
        self.fix_insert(z);
        z
    }

    fn fix_insert(&mut self, mut x: NodeIdx) {
        self.recompute_tree_metadata(x);

        while x != self.root && self.nodes[self.nodes[x].parent].color == NodeColor::Red {
            let parent = self.nodes[x].parent;
            let grand = self.nodes[parent].parent;

            if parent == self.nodes[grand].left {
                let uncle = self.nodes[grand].right;
                if self.nodes[uncle].color == NodeColor::Red {
                    self.nodes[parent].color = NodeColor::Black;
                    self.nodes[uncle].color = NodeColor::Black;
                    self.nodes[grand].color = NodeColor::Red;
                    x = grand;
                } else {
                    if x == self.nodes[parent].right {
                        x = parent;
                        self.left_rotate(x);
                    }
                    let parent = self.nodes[x].parent;
                    let grand = self.nodes[parent].parent;
                    self.nodes[parent].color = NodeColor::Black;
                    self.nodes[grand].color = NodeColor::Red;
                    self.right_rotate(grand);
                }
            } else {
                let uncle = self.nodes[grand].left;
                if self.nodes[uncle].color == NodeColor::Red {
                    self.nodes[parent].color = NodeColor::Black;
                    self.nodes[uncle].color = NodeColor::Black;
                    self.nodes[grand].color = NodeColor::Red;
                    x = grand;
                } else {
                    if x == self.nodes[parent].left {
                        x = parent;
                        self.right_rotate(x);
                    }
                    let parent = self.nodes[x].parent;
                    let grand = self.nodes[parent].parent;
                    self.nodes[parent].color = NodeColor::Black;
                    self.nodes[grand].color = NodeColor::Red;
                    self.left_rotate(grand);
                }
            }
        }

        let root = self.root;
        self.nodes[root].color = NodeColor::Black;
    }

    /// Unlink `z`, splice its successor into its place if needed, restore the
    /// red-black properties and every aggregate on the touched paths.
    pub(crate) fn rb_delete(&mut self, z: NodeIdx) {
        let y;
        let x;
        if self.nodes[z].left == NIL {
            y = z;
            x = self.nodes[y].right;
        } else if self.nodes[z].right == NIL {
            y = z;
            x = self.nodes[y].left;
        } else {
            y = self.leftest(self.nodes[z].right);
            x = self.nodes[y].right;
        }

        if y == self.root {
            self.root = x;
            self.nodes[x].color = NodeColor::Black;
            self.free_node(z);
            self.reset_sentinel();
            let root = self.root;
            self.nodes[root].parent = NIL;
            return;
        }

        let y_was_red = self.nodes[y].color == NodeColor::Red;

        let y_parent = self.nodes[y].parent;
        if y == self.nodes[y_parent].left {
            self.nodes[y_parent].left = x;
        } else {
            self.nodes[y_parent].right = x;
        }

        if y == z {
            self.nodes[x].parent = y_parent;
            self.recompute_tree_metadata(x);
        } else {
            if y_parent == z {
                self.nodes[x].parent = y;
            } else {
                self.nodes[x].parent = y_parent;
            }
            // x's position changed; settle its path before moving y
            self.recompute_tree_metadata(x);

            self.nodes[y].left = self.nodes[z].left;
            self.nodes[y].right = self.nodes[z].right;
            self.nodes[y].parent = self.nodes[z].parent;
            self.nodes[y].color = self.nodes[z].color;
            if z == self.root {
                self.root = y;
            } else {
                let z_parent = self.nodes[z].parent;
                if z == self.nodes[z_parent].left {
                    self.nodes[z_parent].left = y;
                } else {
                    self.nodes[z_parent].right = y;
                }
            }
            let y_left = self.nodes[y].left;
            if y_left != NIL {
                self.nodes[y_left].parent = y;
            }
            let y_right = self.nodes[y].right;
            if y_right != NIL {
                self.nodes[y_right].parent = y;
            }
            self.nodes[y].size_left = self.nodes[z].size_left;
            self.nodes[y].lf_left = self.nodes[z].lf_left;
            self.recompute_tree_metadata(y);
        }

        self.free_node(z);

        let x_parent = self.nodes[x].parent;
        if self.nodes[x_parent].left == x {
            let new_size_left = self.calculate_size(x);
            let new_lf_left = self.calculate_lf(x);
            if new_size_left != self.nodes[x_parent].size_left
                || new_lf_left != self.nodes[x_parent].lf_left
            {
                let delta = new_size_left as isize - self.nodes[x_parent].size_left as isize;
                let lf_delta = new_lf_left as isize - self.nodes[x_parent].lf_left as isize;
                self.nodes[x_parent].size_left = new_size_left;
                self.nodes[x_parent].lf_left = new_lf_left;
                self.update_tree_metadata(x_parent, delta, lf_delta);
            }
        }
        let x_parent = self.nodes[x].parent;
        self.recompute_tree_metadata(x_parent);

        if y_was_red {
            self.reset_sentinel();
            return;
        }

        self.rb_delete_fixup(x);
    }

    fn rb_delete_fixup(&mut self, mut x: NodeIdx) {
        while x != self.root && self.nodes[x].color == NodeColor::Black {
            let x_parent = self.nodes[x].parent;
            if x == self.nodes[x_parent].left {
                let mut w = self.nodes[x_parent].right;
                if self.nodes[w].color == NodeColor::Red {
                    self.nodes[w].color = NodeColor::Black;
                    self.nodes[x_parent].color = NodeColor::Red;
                    self.left_rotate(x_parent);
                    w = self.nodes[self.nodes[x].parent].right;
                }
                if self.nodes[self.nodes[w].left].color == NodeColor::Black
                    && self.nodes[self.nodes[w].right].color == NodeColor::Black
                {
                    self.nodes[w].color = NodeColor::Red;
                    x = self.nodes[x].parent;
                } else {
                    if self.nodes[self.nodes[w].right].color == NodeColor::Black {
                        let w_left = self.nodes[w].left;
                        self.nodes[w_left].color = NodeColor::Black;
                        self.nodes[w].color = NodeColor::Red;
                        self.right_rotate(w);
                        w = self.nodes[self.nodes[x].parent].right;
                    }
                    let x_parent = self.nodes[x].parent;
                    self.nodes[w].color = self.nodes[x_parent].color;
                    self.nodes[x_parent].color = NodeColor::Black;
                    let w_right = self.nodes[w].right;
                    self.nodes[w_right].color = NodeColor::Black;
                    self.left_rotate(x_parent);
                    x = self.root;
                }
            } else {
                let mut w = self.nodes[x_parent].left;
                if self.nodes[w].color == NodeColor::Red {
                    self.nodes[w].color = NodeColor::Black;
                    self.nodes[x_parent].color = NodeColor::Red;
                    self.right_rotate(x_parent);
                    w = self.nodes[self.nodes[x].parent].left;
                }
                if self.nodes[self.nodes[w].left].color == NodeColor::Black
                    && self.nodes[self.nodes[w].right].color == NodeColor::Black
                {
                    self.nodes[w].color = NodeColor::Red;
                    x = self.nodes[x].parent;
                } else {
                    if self.nodes[self.nodes[w].left].color == NodeColor::Black {
                        let w_right = self.nodes[w].right;
                        self.nodes[w_right].color = NodeColor::Black;
                        self.nodes[w].color = NodeColor::Red;
                        self.left_rotate(w);
                        w = self.nodes[self.nodes[x].parent].left;
                    }
                    let x_parent = self.nodes[x].parent;
                    self.nodes[w].color = self.nodes[x_parent].color;
                    self.nodes[x_parent].color = NodeColor::Black;
                    let w_left = self.nodes[w].left;
                    self.nodes[w_left].color = NodeColor::Black;
                    self.right_rotate(x_parent);
                    x = self.root;
                }
            }
        }
        self.nodes[x].color = NodeColor::Black;
        self.reset_sentinel();
    }

    /// Panic if any red-black property, aggregate, total or per-piece
    /// bookkeeping is wrong. Compiled into tests and debug builds only.
    #[cfg(any(test, debug_assertions))]
    pub fn assert_invariants(&self) {
        let sentinel = &self.nodes[NIL];
        assert_eq!(sentinel.color, NodeColor::Black, "sentinel must be black");
        assert_eq!(sentinel.size_left, 0, "sentinel aggregates must be zero");
        assert_eq!(sentinel.lf_left, 0, "sentinel aggregates must be zero");
        assert_eq!(sentinel.parent, NIL, "sentinel parent left dangling");

        if self.root == NIL {
            assert_eq!(self.length, 0, "cached length of an empty tree");
            assert_eq!(self.line_feed_cnt, 0, "cached line feeds of an empty tree");
            return;
        }
        assert_eq!(
            self.nodes[self.root].color,
            NodeColor::Black,
            "root must be black"
        );
        assert_eq!(self.nodes[self.root].parent, NIL, "root has a parent");

        let (size, lf, _) = self.check_subtree(self.root);
        assert_eq!(size, self.length, "cached length out of date");
        assert_eq!(lf, self.line_feed_cnt, "cached line feed count out of date");
    }

    #[cfg(any(test, debug_assertions))]
    fn check_subtree(&self, x: NodeIdx) -> (usize, usize, usize) {
        if x == NIL {
            return (0, 0, 1);
        }
        let n = &self.nodes[x];
        if n.color == NodeColor::Red {
            assert_ne!(
                self.nodes[n.left].color,
                NodeColor::Red,
                "red node with red left child"
            );
            assert_ne!(
                self.nodes[n.right].color,
                NodeColor::Red,
                "red node with red right child"
            );
        }
        if n.left != NIL {
            assert_eq!(self.nodes[n.left].parent, x, "broken left parent link");
        }
        if n.right != NIL {
            assert_eq!(self.nodes[n.right].parent, x, "broken right parent link");
        }

        let (left_size, left_lf, left_bh) = self.check_subtree(n.left);
        let (right_size, right_lf, right_bh) = self.check_subtree(n.right);
        assert_eq!(n.size_left, left_size, "size_left out of date");
        assert_eq!(n.lf_left, left_lf, "lf_left out of date");
        assert_eq!(left_bh, right_bh, "unequal black heights");

        let piece = &n.piece;
        assert!(piece.length > 0, "empty piece left in the tree");
        let start = self.offset_in_buffer(piece.buffer_index, piece.start);
        let end = self.offset_in_buffer(piece.buffer_index, piece.end);
        assert_eq!(piece.length, end - start, "piece length out of sync");
        assert_eq!(
            piece.line_feed_cnt,
            self.get_line_feed_cnt(piece.buffer_index, piece.start, piece.end),
            "piece line feed count out of sync"
        );

        let bh = if n.color == NodeColor::Black {
            left_bh + 1
        } else {
            left_bh
        };
        (
            left_size + piece.length + right_size,
            left_lf + piece.line_feed_cnt + right_lf,
            bh,
        )
    }
}
