//! Weight-keyed splay tree mapping visible offsets to sequence nodes.
//!
//! Each entry carries its own visible weight (0 for tombstones); the
//! in-order traversal matches the sequence's linked-list order. Lookups
//! splay the touched entry, giving amortised O(log n) offset→node and
//! node→offset queries.

use std::collections::HashMap;
use std::hash::Hash;

#[derive(Debug, Clone)]
struct Link<K> {
    parent: Option<K>,
    left: Option<K>,
    right: Option<K>,
    own: usize,
    subtree: usize,
}

#[derive(Debug, Clone)]
pub struct IndexTree<K: Copy + Eq + Hash> {
    nodes: HashMap<K, Link<K>>,
    root: Option<K>,
}

impl<K: Copy + Eq + Hash> Default for IndexTree<K> {
    fn default() -> Self {
        Self {
            nodes: HashMap::new(),
            root: None,
        }
    }
}

impl<K: Copy + Eq + Hash> IndexTree<K> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Total visible weight.
    pub fn total(&self) -> usize {
        self.root.map_or(0, |r| self.nodes[&r].subtree)
    }

    pub fn contains(&self, key: K) -> bool {
        self.nodes.contains_key(&key)
    }

    pub fn weight_of(&self, key: K) -> usize {
        self.nodes[&key].own
    }

    fn subtree_weight(&self, key: Option<K>) -> usize {
        key.map_or(0, |k| self.nodes[&k].subtree)
    }

    fn refresh(&mut self, key: K) {
        let left = self.subtree_weight(self.nodes[&key].left);
        let right = self.subtree_weight(self.nodes[&key].right);
        let link = self.nodes.get_mut(&key).unwrap();
        link.subtree = link.own + left + right;
    }

    fn is_left_child(&self, parent: K, child: K) -> bool {
        self.nodes[&parent].left == Some(child)
    }

    /// Rotates `x` above its parent. Does not touch `self.root`.
    fn rotate(&mut self, x: K) {
        let p = self.nodes[&x].parent.unwrap();
        let g = self.nodes[&p].parent;
        if self.is_left_child(p, x) {
            let b = self.nodes[&x].right;
            self.nodes.get_mut(&p).unwrap().left = b;
            if let Some(b) = b {
                self.nodes.get_mut(&b).unwrap().parent = Some(p);
            }
            self.nodes.get_mut(&x).unwrap().right = Some(p);
        } else {
            let b = self.nodes[&x].left;
            self.nodes.get_mut(&p).unwrap().right = b;
            if let Some(b) = b {
                self.nodes.get_mut(&b).unwrap().parent = Some(p);
            }
            self.nodes.get_mut(&x).unwrap().left = Some(p);
        }
        self.nodes.get_mut(&p).unwrap().parent = Some(x);
        self.nodes.get_mut(&x).unwrap().parent = g;
        if let Some(g) = g {
            let g_link = self.nodes.get_mut(&g).unwrap();
            if g_link.left == Some(p) {
                g_link.left = Some(x);
            } else {
                g_link.right = Some(x);
            }
        }
        self.refresh(p);
        self.refresh(x);
    }

    /// Splays `x` to the root of whatever tree contains it.
    fn splay(&mut self, x: K) {
        while let Some(p) = self.nodes[&x].parent {
            match self.nodes[&p].parent {
                None => self.rotate(x),
                Some(g) => {
                    if self.is_left_child(p, x) == self.is_left_child(g, p) {
                        self.rotate(p);
                        self.rotate(x);
                    } else {
                        self.rotate(x);
                        self.rotate(x);
                    }
                }
            }
        }
    }

    fn splay_to_root(&mut self, x: K) {
        self.splay(x);
        self.root = Some(x);
    }

    /// Inserts `key` immediately after `anchor` in sequence order
    /// (`None` = the new first entry).
    pub fn insert_after(&mut self, anchor: Option<K>, key: K, weight: usize) {
        self.nodes.insert(
            key,
            Link {
                parent: None,
                left: None,
                right: None,
                own: weight,
                subtree: weight,
            },
        );
        match anchor {
            None => {
                if let Some(old_root) = self.root {
                    self.nodes.get_mut(&old_root).unwrap().parent = Some(key);
                    self.nodes.get_mut(&key).unwrap().right = Some(old_root);
                }
                self.refresh(key);
                self.root = Some(key);
            }
            Some(anchor) => {
                self.splay_to_root(anchor);
                let old_right = self.nodes[&anchor].right;
                if let Some(r) = old_right {
                    self.nodes.get_mut(&r).unwrap().parent = Some(key);
                }
                {
                    let link = self.nodes.get_mut(&key).unwrap();
                    link.right = old_right;
                    link.parent = Some(anchor);
                }
                self.nodes.get_mut(&anchor).unwrap().right = Some(key);
                self.refresh(key);
                self.refresh(anchor);
            }
        }
    }

    /// Replaces the entry's own weight (a tombstoned node drops to 0).
    pub fn update_weight(&mut self, key: K, weight: usize) {
        self.splay_to_root(key);
        self.nodes.get_mut(&key).unwrap().own = weight;
        self.refresh(key);
    }

    /// Unlinks a purged entry.
    pub fn remove(&mut self, key: K) {
        self.splay_to_root(key);
        let left = self.nodes[&key].left;
        let right = self.nodes[&key].right;
        if let Some(l) = left {
            self.nodes.get_mut(&l).unwrap().parent = None;
        }
        if let Some(r) = right {
            self.nodes.get_mut(&r).unwrap().parent = None;
        }
        self.nodes.remove(&key);
        self.root = match (left, right) {
            (None, r) => r,
            (l, None) => l,
            (Some(l), Some(r)) => {
                let mut m = l;
                while let Some(next) = self.nodes[&m].right {
                    m = next;
                }
                self.splay(m);
                self.nodes.get_mut(&r).unwrap().parent = Some(m);
                self.nodes.get_mut(&m).unwrap().right = Some(r);
                self.refresh(m);
                Some(m)
            }
        };
    }

    /// Finds the entry containing visible offset `offset`, 1-based:
    /// returns `(key, relative)` such that the entry's span covers the
    /// offset and `relative` is in `1..=own_weight`.
    pub fn find_by_offset(&mut self, offset: usize) -> Option<(K, usize)> {
        if offset == 0 || offset > self.total() {
            return None;
        }
        let mut cur = self.root?;
        let mut acc = 0usize;
        loop {
            let left = self.nodes[&cur].left;
            let left_weight = self.subtree_weight(left);
            if offset <= acc + left_weight {
                cur = left.unwrap();
                continue;
            }
            let own = self.nodes[&cur].own;
            if offset <= acc + left_weight + own {
                let relative = offset - acc - left_weight;
                self.splay_to_root(cur);
                return Some((cur, relative));
            }
            acc += left_weight + own;
            cur = self.nodes[&cur].right?;
        }
    }

    /// Visible offset of the entry's first unit (its prefix weight).
    pub fn index_of(&mut self, key: K) -> Option<usize> {
        if !self.contains(key) {
            return None;
        }
        self.splay_to_root(key);
        Some(self.subtree_weight(self.nodes[&key].left))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn build(weights: &[usize]) -> IndexTree<usize> {
        let mut tree = IndexTree::new();
        for (i, w) in weights.iter().enumerate() {
            let anchor = (i > 0).then(|| i - 1);
            tree.insert_after(anchor, i, *w);
        }
        tree
    }

    #[test]
    fn total_is_sum_of_weights() {
        let tree = build(&[5, 0, 3, 2]);
        assert_eq!(tree.total(), 10);
    }

    #[test]
    fn find_by_offset_lands_in_owning_entry() {
        let mut tree = build(&[5, 0, 3]);
        assert_eq!(tree.find_by_offset(1), Some((0, 1)));
        assert_eq!(tree.find_by_offset(5), Some((0, 5)));
        // Zero-weight entries are transparent.
        assert_eq!(tree.find_by_offset(6), Some((2, 1)));
        assert_eq!(tree.find_by_offset(8), Some((2, 3)));
        assert_eq!(tree.find_by_offset(9), None);
        assert_eq!(tree.find_by_offset(0), None);
    }

    #[test]
    fn index_of_is_prefix_weight() {
        let mut tree = build(&[5, 0, 3, 2]);
        assert_eq!(tree.index_of(0), Some(0));
        assert_eq!(tree.index_of(1), Some(5));
        assert_eq!(tree.index_of(2), Some(5));
        assert_eq!(tree.index_of(3), Some(8));
    }

    #[test]
    fn insert_in_middle_shifts_suffix() {
        let mut tree = build(&[4, 4]);
        tree.insert_after(Some(0), 9, 2);
        assert_eq!(tree.index_of(9), Some(4));
        assert_eq!(tree.index_of(1), Some(6));
        assert_eq!(tree.total(), 10);
    }

    #[test]
    fn update_weight_tombstone() {
        let mut tree = build(&[4, 4, 4]);
        tree.update_weight(1, 0);
        assert_eq!(tree.total(), 8);
        assert_eq!(tree.index_of(2), Some(4));
        assert_eq!(tree.find_by_offset(5), Some((2, 1)));
    }

    #[test]
    fn remove_unlinks_entry() {
        let mut tree = build(&[4, 4, 4]);
        tree.remove(1);
        assert!(!tree.contains(1));
        assert_eq!(tree.total(), 8);
        assert_eq!(tree.index_of(2), Some(4));
        tree.remove(0);
        assert_eq!(tree.index_of(2), Some(0));
        tree.remove(2);
        assert_eq!(tree.total(), 0);
    }

    #[test]
    fn interleaved_operations_stay_consistent() {
        // Mirror against a plain vector of (key, weight).
        let mut tree: IndexTree<usize> = IndexTree::new();
        let mut mirror: Vec<(usize, usize)> = Vec::new();
        let weights = [3usize, 1, 4, 1, 5, 9, 2, 6];
        for (i, w) in weights.iter().enumerate() {
            let at = (i * 7) % (mirror.len() + 1);
            let anchor = at.checked_sub(1).map(|p| mirror[p].0);
            tree.insert_after(anchor, 100 + i, *w);
            mirror.insert(at, (100 + i, *w));
        }
        let total: usize = mirror.iter().map(|(_, w)| w).sum();
        assert_eq!(tree.total(), total);
        let mut prefix = 0;
        for (key, w) in &mirror {
            assert_eq!(tree.index_of(*key), Some(prefix));
            prefix += w;
        }
    }
}
