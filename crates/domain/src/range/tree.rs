//! Point-stab index over L4 port ranges.
//!
//! An AVL tree keyed on `(start, end)` and augmented with `max_end`, the
//! largest range end in each subtree. `max_end` lets a stab query skip any
//! subtree that ends before the probe point. Identical ranges share one
//! node and stack their rule ids. Nodes live in the same slab arena the
//! prefix trie uses.

use crate::common::arena::{Arena, ArenaError};
use crate::common::entity::RuleId;

#[derive(Debug, Clone)]
struct IntervalNode {
    start: u16,
    end: u16,
    ids: Vec<RuleId>,
    /// Max range end over the subtree rooted here.
    max_end: u16,
    height: u8,
    left: Option<u32>,
    right: Option<u32>,
}

impl IntervalNode {
    fn new(start: u16, end: u16, id: RuleId) -> Self {
        Self {
            start,
            end,
            ids: vec![id],
            max_end: end,
            height: 1,
            left: None,
            right: None,
        }
    }
}

#[derive(Debug, Clone)]
pub struct IntervalTree {
    arena: Arena<IntervalNode>,
    root: Option<u32>,
}

impl IntervalTree {
    /// Create a tree whose arena holds at most `node_capacity` nodes. One
    /// node per distinct `(start, end)` range is enough.
    pub fn with_node_capacity(node_capacity: usize) -> Self {
        Self {
            arena: Arena::with_capacity(node_capacity.max(1)),
            root: None,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.root.is_none()
    }

    /// Live nodes (distinct ranges currently stored).
    pub fn node_count(&self) -> usize {
        self.arena.len()
    }

    /// Associate `id` with the inclusive range `[start, end]`.
    /// Callers validate `start <= end` at the rule boundary.
    pub fn insert(&mut self, start: u16, end: u16, id: RuleId) -> Result<(), ArenaError> {
        debug_assert!(start <= end, "inverted range {start}..{end}");
        let new_root = self.insert_rec(self.root, start, end, id)?;
        self.root = Some(new_root);
        Ok(())
    }

    /// Drop the association of `id` with `[start, end]`. The node is
    /// deleted and the tree re-balanced once its id list empties.
    /// Returns `false` if the association was not present.
    pub fn remove(&mut self, start: u16, end: u16, id: RuleId) -> bool {
        let mut removed = false;
        self.root = self.remove_rec(self.root, start, end, id, &mut removed);
        removed
    }

    /// All rule ids whose range contains `point`.
    pub fn stab(&self, point: u16) -> Vec<RuleId> {
        let mut out = Vec::new();
        self.stab_rec(self.root, point, &mut out);
        out
    }

    /// All rule ids whose range overlaps `[a, b]`.
    pub fn overlap(&self, a: u16, b: u16) -> Vec<RuleId> {
        debug_assert!(a <= b, "inverted query {a}..{b}");
        let mut out = Vec::new();
        self.overlap_rec(self.root, a, b, &mut out);
        out
    }

    // ── Private helpers ────────────────────────────────────────────

    fn height(&self, node: Option<u32>) -> u8 {
        node.map_or(0, |n| self.arena[n].height)
    }

    fn max_end(&self, node: Option<u32>) -> Option<u16> {
        node.map(|n| self.arena[n].max_end)
    }

    fn balance_factor(&self, n: u32) -> i16 {
        i16::from(self.height(self.arena[n].left)) - i16::from(self.height(self.arena[n].right))
    }

    /// Recompute `height` and `max_end` from the children. Must run after
    /// any child link change, including inside rotations.
    fn update(&mut self, n: u32) {
        let left = self.arena[n].left;
        let right = self.arena[n].right;
        let height = 1 + self.height(left).max(self.height(right));
        let mut max_end = self.arena[n].end;
        if let Some(m) = self.max_end(left) {
            max_end = max_end.max(m);
        }
        if let Some(m) = self.max_end(right) {
            max_end = max_end.max(m);
        }
        let node = &mut self.arena[n];
        node.height = height;
        node.max_end = max_end;
    }

    fn rotate_right(&mut self, y: u32) -> u32 {
        let x = self.arena[y].left.unwrap_or_else(|| unreachable!("rotate_right without left child"));
        self.arena[y].left = self.arena[x].right;
        self.arena[x].right = Some(y);
        self.update(y);
        self.update(x);
        x
    }

    fn rotate_left(&mut self, x: u32) -> u32 {
        let y = self.arena[x].right.unwrap_or_else(|| unreachable!("rotate_left without right child"));
        self.arena[x].right = self.arena[y].left;
        self.arena[y].left = Some(x);
        self.update(x);
        self.update(y);
        y
    }

    fn rebalance(&mut self, n: u32) -> u32 {
        let bf = self.balance_factor(n);
        if bf > 1 {
            let left = self.arena[n].left.unwrap_or_else(|| unreachable!("positive balance without left child"));
            if self.balance_factor(left) < 0 {
                let new_left = self.rotate_left(left);
                self.arena[n].left = Some(new_left);
                self.update(n);
            }
            return self.rotate_right(n);
        }
        if bf < -1 {
            let right = self.arena[n].right.unwrap_or_else(|| unreachable!("negative balance without right child"));
            if self.balance_factor(right) > 0 {
                let new_right = self.rotate_right(right);
                self.arena[n].right = Some(new_right);
                self.update(n);
            }
            return self.rotate_left(n);
        }
        n
    }

    fn insert_rec(
        &mut self,
        node: Option<u32>,
        start: u16,
        end: u16,
        id: RuleId,
    ) -> Result<u32, ArenaError> {
        let Some(n) = node else {
            return self.arena.alloc(IntervalNode::new(start, end, id));
        };

        let key = (self.arena[n].start, self.arena[n].end);
        match (start, end).cmp(&key) {
            std::cmp::Ordering::Equal => {
                let ids = &mut self.arena[n].ids;
                if !ids.contains(&id) {
                    ids.push(id);
                }
                return Ok(n);
            }
            std::cmp::Ordering::Less => {
                let new_left = self.insert_rec(self.arena[n].left, start, end, id)?;
                self.arena[n].left = Some(new_left);
            }
            std::cmp::Ordering::Greater => {
                let new_right = self.insert_rec(self.arena[n].right, start, end, id)?;
                self.arena[n].right = Some(new_right);
            }
        }
        self.update(n);
        Ok(self.rebalance(n))
    }

    fn remove_rec(
        &mut self,
        node: Option<u32>,
        start: u16,
        end: u16,
        id: RuleId,
        removed: &mut bool,
    ) -> Option<u32> {
        let n = node?;
        let key = (self.arena[n].start, self.arena[n].end);
        match (start, end).cmp(&key) {
            std::cmp::Ordering::Less => {
                let new_left = self.remove_rec(self.arena[n].left, start, end, id, removed);
                self.arena[n].left = new_left;
            }
            std::cmp::Ordering::Greater => {
                let new_right = self.remove_rec(self.arena[n].right, start, end, id, removed);
                self.arena[n].right = new_right;
            }
            std::cmp::Ordering::Equal => {
                let ids = &mut self.arena[n].ids;
                let Some(pos) = ids.iter().position(|&i| i == id) else {
                    return Some(n);
                };
                ids.remove(pos);
                *removed = true;
                if !ids.is_empty() {
                    return Some(n);
                }

                // The range is gone; delete the node.
                match (self.arena[n].left, self.arena[n].right) {
                    (None, None) => {
                        self.arena.free(n);
                        return None;
                    }
                    (Some(child), None) | (None, Some(child)) => {
                        self.arena.free(n);
                        return Some(child);
                    }
                    (Some(_), Some(right)) => {
                        // Two children: adopt the in-order successor's
                        // range and ids, then drop its old node.
                        let (new_right, s, e, ids) = self.detach_min(right);
                        let node = &mut self.arena[n];
                        node.start = s;
                        node.end = e;
                        node.ids = ids;
                        node.right = new_right;
                    }
                }
            }
        }
        self.update(n);
        Some(self.rebalance(n))
    }

    /// Unlink the smallest node of the subtree, returning the new subtree
    /// root and the detached node's contents.
    fn detach_min(&mut self, n: u32) -> (Option<u32>, u16, u16, Vec<RuleId>) {
        match self.arena[n].left {
            None => {
                let right = self.arena[n].right;
                let freed = self.arena.free(n);
                (right, freed.start, freed.end, freed.ids)
            }
            Some(left) => {
                let (new_left, s, e, ids) = self.detach_min(left);
                self.arena[n].left = new_left;
                self.update(n);
                (Some(self.rebalance(n)), s, e, ids)
            }
        }
    }

    fn stab_rec(&self, node: Option<u32>, point: u16, out: &mut Vec<RuleId>) {
        let Some(n) = node else { return };
        let node = &self.arena[n];
        // Nothing in this subtree reaches the probe point.
        if point > node.max_end {
            return;
        }
        self.stab_rec(node.left, point, out);
        if node.start <= point && point <= node.end {
            out.extend_from_slice(&node.ids);
        }
        // Ranges to the right all start at or after node.start.
        if point >= node.start {
            self.stab_rec(node.right, point, out);
        }
    }

    fn overlap_rec(&self, node: Option<u32>, a: u16, b: u16, out: &mut Vec<RuleId>) {
        let Some(n) = node else { return };
        let node = &self.arena[n];
        if a > node.max_end {
            return;
        }
        self.overlap_rec(node.left, a, b, out);
        if node.start <= b && a <= node.end {
            out.extend_from_slice(&node.ids);
        }
        if node.start <= b {
            self.overlap_rec(node.right, a, b, out);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ids(mut v: Vec<RuleId>) -> Vec<u32> {
        v.sort_unstable();
        v.into_iter().map(|r| r.0).collect()
    }

    /// Recursively assert AVL balance, BST order, and the max_end
    /// augmentation invariant.
    fn check_invariants(tree: &IntervalTree) {
        fn walk(tree: &IntervalTree, node: Option<u32>) -> (u8, u16, Option<(u16, u16)>, Option<(u16, u16)>) {
            let Some(n) = node else {
                return (0, 0, None, None);
            };
            let nd = &tree.arena[n];
            assert!(!nd.ids.is_empty(), "node without ids survived");
            let (lh, lmax, lmin_key, lmax_key) = walk(tree, nd.left);
            let (rh, rmax, rmin_key, rmax_key) = walk(tree, nd.right);

            let bf = i16::from(lh) - i16::from(rh);
            assert!(bf.abs() <= 1, "unbalanced node ({},{}) bf={bf}", nd.start, nd.end);
            assert_eq!(nd.height, 1 + lh.max(rh), "stale height");

            let mut expect_max = nd.end;
            if nd.left.is_some() {
                expect_max = expect_max.max(lmax);
            }
            if nd.right.is_some() {
                expect_max = expect_max.max(rmax);
            }
            assert_eq!(nd.max_end, expect_max, "stale max_end");

            if let Some(k) = lmax_key {
                assert!(k < (nd.start, nd.end), "BST order violated on the left");
            }
            if let Some(k) = rmin_key {
                assert!(k > (nd.start, nd.end), "BST order violated on the right");
            }

            let min_key = lmin_key.unwrap_or((nd.start, nd.end));
            let max_key = rmax_key.unwrap_or((nd.start, nd.end));
            (nd.height, nd.max_end, Some(min_key), Some(max_key))
        }
        walk(tree, tree.root);
    }

    // ── Basic stab tests ──────────────────────────────────────────

    #[test]
    fn empty_tree_stabs_nothing() {
        let tree = IntervalTree::with_node_capacity(8);
        assert!(tree.stab(80).is_empty());
        assert!(tree.is_empty());
    }

    #[test]
    fn single_range_boundaries() {
        let mut tree = IntervalTree::with_node_capacity(8);
        tree.insert(80, 443, RuleId(1)).unwrap();
        assert_eq!(ids(tree.stab(80)), vec![1]);
        assert_eq!(ids(tree.stab(443)), vec![1]);
        assert_eq!(ids(tree.stab(200)), vec![1]);
        assert!(tree.stab(79).is_empty());
        assert!(tree.stab(444).is_empty());
    }

    #[test]
    fn degenerate_range_is_a_single_port() {
        let mut tree = IntervalTree::with_node_capacity(8);
        tree.insert(80, 80, RuleId(7)).unwrap();
        assert_eq!(ids(tree.stab(80)), vec![7]);
        assert!(tree.stab(79).is_empty());
        assert!(tree.stab(81).is_empty());
    }

    #[test]
    fn full_range_sentinel_matches_every_port() {
        let mut tree = IntervalTree::with_node_capacity(8);
        tree.insert(0, u16::MAX, RuleId(1)).unwrap();
        assert_eq!(ids(tree.stab(0)), vec![1]);
        assert_eq!(ids(tree.stab(80)), vec![1]);
        assert_eq!(ids(tree.stab(u16::MAX)), vec![1]);
    }

    #[test]
    fn overlapping_ranges_all_reported() {
        let mut tree = IntervalTree::with_node_capacity(16);
        tree.insert(0, 1023, RuleId(1)).unwrap();
        tree.insert(80, 80, RuleId(2)).unwrap();
        tree.insert(80, 443, RuleId(3)).unwrap();
        tree.insert(1024, u16::MAX, RuleId(4)).unwrap();

        assert_eq!(ids(tree.stab(80)), vec![1, 2, 3]);
        assert_eq!(ids(tree.stab(100)), vec![1, 3]);
        assert_eq!(ids(tree.stab(2000)), vec![4]);
        check_invariants(&tree);
    }

    #[test]
    fn identical_ranges_stack_ids_on_one_node() {
        let mut tree = IntervalTree::with_node_capacity(8);
        tree.insert(80, 80, RuleId(1)).unwrap();
        tree.insert(80, 80, RuleId(2)).unwrap();
        tree.insert(80, 80, RuleId(2)).unwrap(); // idempotent
        assert_eq!(tree.node_count(), 1);
        assert_eq!(ids(tree.stab(80)), vec![1, 2]);
    }

    // ── Overlap query tests ───────────────────────────────────────

    #[test]
    fn overlap_query_reports_touching_ranges() {
        let mut tree = IntervalTree::with_node_capacity(16);
        tree.insert(10, 20, RuleId(1)).unwrap();
        tree.insert(30, 40, RuleId(2)).unwrap();
        tree.insert(15, 35, RuleId(3)).unwrap();

        assert_eq!(ids(tree.overlap(18, 32)), vec![1, 2, 3]);
        assert_eq!(ids(tree.overlap(21, 29)), vec![3]);
        assert_eq!(ids(tree.overlap(40, 50)), vec![2]);
        assert!(tree.overlap(41, 50).is_empty());
    }

    // ── Remove tests ──────────────────────────────────────────────

    #[test]
    fn remove_id_keeps_shared_node_until_empty() {
        let mut tree = IntervalTree::with_node_capacity(8);
        tree.insert(80, 80, RuleId(1)).unwrap();
        tree.insert(80, 80, RuleId(2)).unwrap();

        assert!(tree.remove(80, 80, RuleId(1)));
        assert_eq!(ids(tree.stab(80)), vec![2]);
        assert_eq!(tree.node_count(), 1);

        assert!(tree.remove(80, 80, RuleId(2)));
        assert!(tree.stab(80).is_empty());
        assert_eq!(tree.node_count(), 0);
    }

    #[test]
    fn remove_missing_association_is_false() {
        let mut tree = IntervalTree::with_node_capacity(8);
        tree.insert(80, 443, RuleId(1)).unwrap();
        assert!(!tree.remove(80, 443, RuleId(2)));
        assert!(!tree.remove(80, 444, RuleId(1)));
        assert!(!tree.remove(0, 0, RuleId(1)));
        assert_eq!(ids(tree.stab(100)), vec![1]);
    }

    #[test]
    fn remove_two_child_node_keeps_order_and_balance() {
        let mut tree = IntervalTree::with_node_capacity(16);
        for (i, (s, e)) in [(50u16, 60u16), (20, 30), (80, 90), (10, 15), (40, 45), (70, 75), (95, 99)]
            .into_iter()
            .enumerate()
        {
            tree.insert(s, e, RuleId(i as u32)).unwrap();
        }
        check_invariants(&tree);

        // Root-ish node with two children.
        assert!(tree.remove(50, 60, RuleId(0)));
        check_invariants(&tree);
        assert!(tree.stab(55).is_empty());
        assert_eq!(ids(tree.stab(42)), vec![4]);
        assert_eq!(ids(tree.stab(97)), vec![6]);
    }

    #[test]
    fn ascending_inserts_stay_balanced() {
        let mut tree = IntervalTree::with_node_capacity(128);
        for i in 0..100u16 {
            tree.insert(i * 10, i * 10 + 5, RuleId(u32::from(i))).unwrap();
            check_invariants(&tree);
        }
        // A perfectly unbalanced insert order would make height 100; AVL
        // keeps it logarithmic.
        let height = tree.root.map(|r| tree.arena[r].height).unwrap_or(0);
        assert!(height <= 9, "height {height} too large for 100 nodes");
    }

    #[test]
    fn interleaved_insert_remove_stays_consistent() {
        let mut tree = IntervalTree::with_node_capacity(256);
        let mut model: Vec<(u16, u16, RuleId)> = Vec::new();
        let mut seed = 0xDEAD_BEEFu32;
        let mut next = move || {
            seed = seed.wrapping_mul(1_664_525).wrapping_add(1_013_904_223);
            seed
        };

        for i in 0..200u32 {
            let a = (next() % 1000) as u16;
            let b = (next() % 1000) as u16;
            let (s, e) = if a <= b { (a, b) } else { (b, a) };
            tree.insert(s, e, RuleId(i)).unwrap();
            model.push((s, e, RuleId(i)));

            if i % 3 == 0 {
                let victim = model.remove((next() as usize) % model.len());
                assert!(tree.remove(victim.0, victim.1, victim.2));
            }
            check_invariants(&tree);
        }

        for probe in (0..1000u16).step_by(37) {
            let mut expected: Vec<u32> = model
                .iter()
                .filter(|(s, e, _)| *s <= probe && probe <= *e)
                .map(|(_, _, id)| id.0)
                .collect();
            expected.sort_unstable();
            assert_eq!(ids(tree.stab(probe)), expected, "probe {probe}");
        }
    }

    // ── Capacity tests ────────────────────────────────────────────

    #[test]
    fn arena_exhaustion_surfaces_and_leaves_tree_usable() {
        let mut tree = IntervalTree::with_node_capacity(1);
        tree.insert(80, 80, RuleId(1)).unwrap();
        assert!(matches!(
            tree.insert(443, 443, RuleId(2)),
            Err(ArenaError::Exhausted { .. })
        ));
        assert_eq!(ids(tree.stab(80)), vec![1]);

        // Same range still accepts more ids: no new node needed.
        tree.insert(80, 80, RuleId(3)).unwrap();
        assert_eq!(ids(tree.stab(80)), vec![1, 3]);
    }
}
