use std::collections::BTreeMap;
use std::ops::Bound;
use std::sync::atomic::{AtomicU64, Ordering};

use log::debug;

use super::{IndexKey, IndexKind, IndexStats, IndexStructure, InsertOutcome};
use crate::config::BTreeConfig;
use crate::error::{MemDbError, MemDbResult};

/// Arena slot of a node. Children and sibling links are indices, never pointers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct NodeId(u32);

impl NodeId {
    fn index(self) -> usize {
        self.0 as usize
    }
}

#[derive(Debug)]
struct InternalNode<K> {
    keys: Vec<K>,
    /// Always `keys.len() + 1` entries. `children[i]` holds keys `< keys[i]`.
    children: Vec<NodeId>,
}

#[derive(Debug)]
struct LeafNode<K, V> {
    keys: Vec<K>,
    values: Vec<V>,
    prev: Option<NodeId>,
    next: Option<NodeId>,
}

#[derive(Debug)]
enum Node<K, V> {
    Internal(InternalNode<K>),
    Leaf(LeafNode<K, V>),
    Free,
}

/// Coarse histogram of inserted keys, bucketed by a fixed width.
#[derive(Debug, Clone, Default)]
pub struct KeyHistogram {
    bucket_width: f64,
    buckets: BTreeMap<i64, u64>,
    unbucketed: u64,
}

impl KeyHistogram {
    fn new(bucket_width: f64) -> Self {
        Self {
            bucket_width,
            ..Default::default()
        }
    }

    fn record(&mut self, bucket: Option<i64>) {
        match bucket {
            Some(b) => *self.buckets.entry(b).or_insert(0) += 1,
            None => self.unbucketed += 1,
        }
    }

    pub fn buckets(&self) -> &BTreeMap<i64, u64> {
        &self.buckets
    }

    /// Keys without a numeric position (strings).
    pub fn unbucketed(&self) -> u64 {
        self.unbucketed
    }

    /// Inserted keys whose bucket overlaps `[lo, hi]`.
    pub fn estimate_range(&self, lo: f64, hi: f64) -> u64 {
        if self.bucket_width <= 0.0 || lo > hi {
            return 0;
        }
        let first = (lo / self.bucket_width).floor() as i64;
        let last = (hi / self.bucket_width).floor() as i64;
        self.buckets.range(first..=last).map(|(_, c)| *c).sum()
    }
}

#[derive(Debug, Default)]
struct TreeCounters {
    searches: AtomicU64,
    search_depth: AtomicU64,
    splits: u64,
    merges: u64,
}

/// B+Tree over an arena of nodes.
///
/// A node splits when it reaches `order` keys. Deletes rebalance underflowed
/// nodes by borrowing from a sibling or coalescing with one; the root collapses
/// when it is left with a single child.
#[derive(Debug)]
pub struct BPlusTree<K, V> {
    order: usize,
    nodes: Vec<Node<K, V>>,
    free_list: Vec<NodeId>,
    root: NodeId,
    head: NodeId,
    height: usize,
    len: usize,
    counters: TreeCounters,
    histogram: KeyHistogram,
}

fn corrupt(id: NodeId, expected: &str) -> MemDbError {
    MemDbError::Internal(format!("b+tree node {} is not a live {expected}", id.0))
}

/// Split `total` items into the fewest chunks of at most `max`, as even as possible.
fn even_chunks(total: usize, max: usize) -> Vec<usize> {
    let count = total.div_ceil(max);
    let base = total / count;
    let extra = total % count;
    (0..count)
        .map(|i| if i < extra { base + 1 } else { base })
        .collect()
}

impl<K: IndexKey, V: Clone + std::fmt::Debug + Send + Sync> BPlusTree<K, V> {
    pub fn new(order: usize) -> MemDbResult<Self> {
        Self::new_with_config(BTreeConfig {
            order,
            ..Default::default()
        })
    }

    pub fn new_with_config(config: BTreeConfig) -> MemDbResult<Self> {
        if config.order < 3 {
            return Err(MemDbError::NotSupport(format!(
                "b+tree order must be at least 3, got {}",
                config.order
            )));
        }
        let mut tree = Self {
            order: config.order,
            nodes: Vec::new(),
            free_list: Vec::new(),
            root: NodeId(0),
            head: NodeId(0),
            height: 1,
            len: 0,
            counters: TreeCounters::default(),
            histogram: KeyHistogram::new(config.histogram_bucket_width),
        };
        tree.start_new_tree();
        Ok(tree)
    }

    fn start_new_tree(&mut self) {
        self.nodes.clear();
        self.free_list.clear();
        let root = self.alloc(Node::Leaf(LeafNode {
            keys: Vec::new(),
            values: Vec::new(),
            prev: None,
            next: None,
        }));
        self.root = root;
        self.head = root;
        self.height = 1;
        self.len = 0;
    }

    pub fn order(&self) -> usize {
        self.order
    }

    pub fn height(&self) -> usize {
        self.height
    }

    pub fn histogram(&self) -> &KeyHistogram {
        &self.histogram
    }

    fn min_keys(&self) -> usize {
        ((self.order - 1) / 2).max(1)
    }

    fn alloc(&mut self, node: Node<K, V>) -> NodeId {
        match self.free_list.pop() {
            Some(id) => {
                self.nodes[id.index()] = node;
                id
            }
            None => {
                self.nodes.push(node);
                NodeId((self.nodes.len() - 1) as u32)
            }
        }
    }

    fn release(&mut self, id: NodeId) -> Node<K, V> {
        self.free_list.push(id);
        std::mem::replace(&mut self.nodes[id.index()], Node::Free)
    }

    fn is_leaf(&self, id: NodeId) -> bool {
        matches!(self.nodes.get(id.index()), Some(Node::Leaf(_)))
    }

    fn leaf(&self, id: NodeId) -> MemDbResult<&LeafNode<K, V>> {
        match self.nodes.get(id.index()) {
            Some(Node::Leaf(leaf)) => Ok(leaf),
            _ => Err(corrupt(id, "leaf")),
        }
    }

    fn leaf_mut(&mut self, id: NodeId) -> MemDbResult<&mut LeafNode<K, V>> {
        match self.nodes.get_mut(id.index()) {
            Some(Node::Leaf(leaf)) => Ok(leaf),
            _ => Err(corrupt(id, "leaf")),
        }
    }

    fn internal(&self, id: NodeId) -> MemDbResult<&InternalNode<K>> {
        match self.nodes.get(id.index()) {
            Some(Node::Internal(node)) => Ok(node),
            _ => Err(corrupt(id, "internal node")),
        }
    }

    fn internal_mut(&mut self, id: NodeId) -> MemDbResult<&mut InternalNode<K>> {
        match self.nodes.get_mut(id.index()) {
            Some(Node::Internal(node)) => Ok(node),
            _ => Err(corrupt(id, "internal node")),
        }
    }

    fn key_count(&self, id: NodeId) -> MemDbResult<usize> {
        match self.nodes.get(id.index()) {
            Some(Node::Leaf(leaf)) => Ok(leaf.keys.len()),
            Some(Node::Internal(node)) => Ok(node.keys.len()),
            _ => Err(corrupt(id, "node")),
        }
    }

    /// Descend to the leaf that may hold `key`, remembering `(parent, child slot)` pairs.
    fn find_leaf(&self, key: &K) -> MemDbResult<(NodeId, Vec<(NodeId, usize)>)> {
        let mut path = Vec::with_capacity(self.height);
        let mut current = self.root;
        loop {
            match self.nodes.get(current.index()) {
                Some(Node::Internal(node)) => {
                    let slot = node.keys.partition_point(|k| k <= key);
                    path.push((current, slot));
                    current = node.children[slot];
                }
                Some(Node::Leaf(_)) => return Ok((current, path)),
                _ => return Err(corrupt(current, "node")),
            }
        }
    }

    fn record_search(&self, depth: usize) {
        self.counters.searches.fetch_add(1, Ordering::Relaxed);
        self.counters
            .search_depth
            .fetch_add(depth as u64, Ordering::Relaxed);
    }

    pub fn get(&self, key: &K) -> MemDbResult<Option<&V>> {
        let (leaf_id, path) = self.find_leaf(key)?;
        self.record_search(path.len() + 1);
        let leaf = self.leaf(leaf_id)?;
        Ok(leaf
            .keys
            .binary_search(key)
            .ok()
            .map(|pos| &leaf.values[pos]))
    }

    pub fn insert(&mut self, key: K, value: V) -> MemDbResult<InsertOutcome> {
        let bucket = key.histogram_bucket(self.histogram.bucket_width);
        let order = self.order;
        let (leaf_id, path) = self.find_leaf(&key)?;
        let leaf = self.leaf_mut(leaf_id)?;
        match leaf.keys.binary_search(&key) {
            Ok(pos) => {
                leaf.values[pos] = value;
                return Ok(InsertOutcome::Updated);
            }
            Err(pos) => {
                leaf.keys.insert(pos, key);
                leaf.values.insert(pos, value);
            }
        }
        let overflow = leaf.keys.len() >= order;
        self.len += 1;
        self.histogram.record(bucket);
        if overflow {
            self.split_leaf(leaf_id, path)?;
        }
        Ok(InsertOutcome::Inserted)
    }

    fn split_leaf(&mut self, leaf_id: NodeId, path: Vec<(NodeId, usize)>) -> MemDbResult<()> {
        let (right_keys, right_values, old_next) = {
            let leaf = self.leaf_mut(leaf_id)?;
            let mid = leaf.keys.len() / 2;
            (leaf.keys.split_off(mid), leaf.values.split_off(mid), leaf.next)
        };
        let separator = right_keys
            .first()
            .cloned()
            .ok_or_else(|| MemDbError::Internal("split of an empty leaf".to_string()))?;
        let right_id = self.alloc(Node::Leaf(LeafNode {
            keys: right_keys,
            values: right_values,
            prev: Some(leaf_id),
            next: old_next,
        }));
        self.leaf_mut(leaf_id)?.next = Some(right_id);
        if let Some(next) = old_next {
            self.leaf_mut(next)?.prev = Some(right_id);
        }
        self.counters.splits += 1;
        debug!("b+tree leaf {} split into {}", leaf_id.0, right_id.0);
        self.insert_into_parent(leaf_id, separator, right_id, path)
    }

    fn split_internal(&mut self, node_id: NodeId, path: Vec<(NodeId, usize)>) -> MemDbResult<()> {
        let (separator, right_keys, right_children) = {
            let node = self.internal_mut(node_id)?;
            let mid = node.keys.len() / 2;
            let mut right_keys = node.keys.split_off(mid);
            let separator = right_keys.remove(0);
            let right_children = node.children.split_off(mid + 1);
            (separator, right_keys, right_children)
        };
        let right_id = self.alloc(Node::Internal(InternalNode {
            keys: right_keys,
            children: right_children,
        }));
        self.counters.splits += 1;
        debug!("b+tree internal {} split into {}", node_id.0, right_id.0);
        self.insert_into_parent(node_id, separator, right_id, path)
    }

    fn insert_into_parent(
        &mut self,
        left: NodeId,
        separator: K,
        right: NodeId,
        mut path: Vec<(NodeId, usize)>,
    ) -> MemDbResult<()> {
        let Some((parent_id, slot)) = path.pop() else {
            let new_root = self.alloc(Node::Internal(InternalNode {
                keys: vec![separator],
                children: vec![left, right],
            }));
            self.root = new_root;
            self.height += 1;
            return Ok(());
        };
        let order = self.order;
        let parent = self.internal_mut(parent_id)?;
        parent.keys.insert(slot, separator);
        parent.children.insert(slot + 1, right);
        if parent.keys.len() >= order {
            self.split_internal(parent_id, path)?;
        }
        Ok(())
    }

    pub fn remove(&mut self, key: &K) -> MemDbResult<bool> {
        let (leaf_id, path) = self.find_leaf(key)?;
        let leaf = self.leaf_mut(leaf_id)?;
        let Ok(pos) = leaf.keys.binary_search(key) else {
            return Ok(false);
        };
        leaf.keys.remove(pos);
        leaf.values.remove(pos);
        let remaining = leaf.keys.len();
        self.len -= 1;
        if !path.is_empty() && remaining < self.min_keys() {
            self.handle_underflow(leaf_id, path)?;
        }
        Ok(true)
    }

    fn handle_underflow(&mut self, node_id: NodeId, mut path: Vec<(NodeId, usize)>) -> MemDbResult<()> {
        let Some((parent_id, slot)) = path.pop() else {
            return Ok(());
        };
        let min = self.min_keys();
        let (left_sibling, right_sibling) = {
            let parent = self.internal(parent_id)?;
            let left = slot.checked_sub(1).map(|i| parent.children[i]);
            (left, parent.children.get(slot + 1).copied())
        };

        if let Some(left) = left_sibling {
            if self.key_count(left)? > min {
                return self.redistribute_from_left(node_id, left, parent_id, slot);
            }
        }
        if let Some(right) = right_sibling {
            if self.key_count(right)? > min {
                return self.redistribute_from_right(node_id, right, parent_id, slot);
            }
        }

        match (left_sibling, right_sibling) {
            (Some(left), _) => self.coalesce(left, node_id, parent_id, slot - 1)?,
            (None, Some(right)) => self.coalesce(node_id, right, parent_id, slot)?,
            (None, None) => {
                return Err(MemDbError::Internal(format!(
                    "b+tree node {} has no siblings under parent {}",
                    node_id.0, parent_id.0
                )))
            }
        }

        let parent_keys = self.internal(parent_id)?.keys.len();
        if path.is_empty() {
            if parent_keys == 0 {
                self.adjust_root(parent_id)?;
            }
        } else if parent_keys < min {
            self.handle_underflow(parent_id, path)?;
        }
        Ok(())
    }

    fn redistribute_from_left(
        &mut self,
        node_id: NodeId,
        left: NodeId,
        parent_id: NodeId,
        slot: usize,
    ) -> MemDbResult<()> {
        if self.is_leaf(node_id) {
            let (key, value) = {
                let sibling = self.leaf_mut(left)?;
                match (sibling.keys.pop(), sibling.values.pop()) {
                    (Some(k), Some(v)) => (k, v),
                    _ => return Err(corrupt(left, "non-empty leaf")),
                }
            };
            let node = self.leaf_mut(node_id)?;
            node.keys.insert(0, key.clone());
            node.values.insert(0, value);
            self.internal_mut(parent_id)?.keys[slot - 1] = key;
        } else {
            let (key, child) = {
                let sibling = self.internal_mut(left)?;
                match (sibling.keys.pop(), sibling.children.pop()) {
                    (Some(k), Some(c)) => (k, c),
                    _ => return Err(corrupt(left, "non-empty internal node")),
                }
            };
            let separator = std::mem::replace(&mut self.internal_mut(parent_id)?.keys[slot - 1], key);
            let node = self.internal_mut(node_id)?;
            node.keys.insert(0, separator);
            node.children.insert(0, child);
        }
        Ok(())
    }

    fn redistribute_from_right(
        &mut self,
        node_id: NodeId,
        right: NodeId,
        parent_id: NodeId,
        slot: usize,
    ) -> MemDbResult<()> {
        if self.is_leaf(node_id) {
            let (key, value, new_first) = {
                let sibling = self.leaf_mut(right)?;
                if sibling.keys.len() < 2 {
                    return Err(corrupt(right, "leaf with spare keys"));
                }
                let key = sibling.keys.remove(0);
                let value = sibling.values.remove(0);
                (key, value, sibling.keys[0].clone())
            };
            let node = self.leaf_mut(node_id)?;
            node.keys.push(key);
            node.values.push(value);
            self.internal_mut(parent_id)?.keys[slot] = new_first;
        } else {
            let (key, child) = {
                let sibling = self.internal_mut(right)?;
                if sibling.keys.is_empty() {
                    return Err(corrupt(right, "internal node with spare keys"));
                }
                (sibling.keys.remove(0), sibling.children.remove(0))
            };
            let separator = std::mem::replace(&mut self.internal_mut(parent_id)?.keys[slot], key);
            let node = self.internal_mut(node_id)?;
            node.keys.push(separator);
            node.children.push(child);
        }
        Ok(())
    }

    /// Fold `right` into `left`. `separator_slot` is the parent key between them.
    fn coalesce(
        &mut self,
        left: NodeId,
        right: NodeId,
        parent_id: NodeId,
        separator_slot: usize,
    ) -> MemDbResult<()> {
        let separator = {
            let parent = self.internal_mut(parent_id)?;
            parent.children.remove(separator_slot + 1);
            parent.keys.remove(separator_slot)
        };
        match self.release(right) {
            Node::Leaf(right_leaf) => {
                let next = right_leaf.next;
                {
                    let left_leaf = self.leaf_mut(left)?;
                    left_leaf.keys.extend(right_leaf.keys);
                    left_leaf.values.extend(right_leaf.values);
                    left_leaf.next = next;
                }
                if let Some(next) = next {
                    self.leaf_mut(next)?.prev = Some(left);
                }
            }
            Node::Internal(right_node) => {
                let left_node = self.internal_mut(left)?;
                left_node.keys.push(separator);
                left_node.keys.extend(right_node.keys);
                left_node.children.extend(right_node.children);
            }
            Node::Free => return Err(corrupt(right, "node")),
        }
        self.counters.merges += 1;
        debug!("b+tree node {} merged into {}", right.0, left.0);
        Ok(())
    }

    fn adjust_root(&mut self, root_id: NodeId) -> MemDbResult<()> {
        let only_child = self.internal(root_id)?.children[0];
        self.release(root_id);
        self.root = only_child;
        self.height -= 1;
        Ok(())
    }

    /// Replace the tree contents with strictly ascending `pairs`, building
    /// leaves left to right and internal levels bottom-up.
    pub fn bulk_load(&mut self, pairs: Vec<(K, V)>) -> MemDbResult<()> {
        if pairs.windows(2).any(|w| w[0].0 >= w[1].0) {
            return Err(MemDbError::IntegrityViolation(
                "bulk load input must be strictly ascending".to_string(),
            ));
        }
        self.start_new_tree();
        self.histogram = KeyHistogram::new(self.histogram.bucket_width);
        if pairs.is_empty() {
            return Ok(());
        }
        let width = self.histogram.bucket_width;
        for (key, _) in pairs.iter() {
            self.histogram.record(key.histogram_bucket(width));
        }
        self.len = pairs.len();
        // the empty root leaf from start_new_tree becomes the first leaf
        let first_leaf = self.root;
        let mut level: Vec<(NodeId, K)> = Vec::new();
        let mut entries = pairs.into_iter();
        let mut prev: Option<NodeId> = None;
        for size in even_chunks(self.len, self.order - 1) {
            let (keys, values): (Vec<K>, Vec<V>) = entries.by_ref().take(size).unzip();
            let low = keys
                .first()
                .cloned()
                .ok_or_else(|| MemDbError::Internal("empty bulk load chunk".to_string()))?;
            let id = match prev {
                None => {
                    let leaf = self.leaf_mut(first_leaf)?;
                    leaf.keys = keys;
                    leaf.values = values;
                    first_leaf
                }
                Some(prev_id) => {
                    let id = self.alloc(Node::Leaf(LeafNode {
                        keys,
                        values,
                        prev: Some(prev_id),
                        next: None,
                    }));
                    self.leaf_mut(prev_id)?.next = Some(id);
                    id
                }
            };
            level.push((id, low));
            prev = Some(id);
        }

        while level.len() > 1 {
            let mut upper = Vec::new();
            let mut members = level.into_iter();
            for size in even_chunks(members.len(), self.order) {
                let group: Vec<(NodeId, K)> = members.by_ref().take(size).collect();
                let low = group[0].1.clone();
                let keys = group.iter().skip(1).map(|(_, k)| k.clone()).collect();
                let children = group.iter().map(|(id, _)| *id).collect();
                let id = self.alloc(Node::Internal(InternalNode { keys, children }));
                upper.push((id, low));
            }
            level = upper;
            self.height += 1;
        }
        self.root = level[0].0;
        debug!(
            "b+tree bulk loaded {} entries, height {}",
            self.len, self.height
        );
        Ok(())
    }

    /// Lazy in-order scan starting at the head leaf. Each call restarts from the head.
    pub fn scan(&self) -> BTreeScan<'_, K, V> {
        BTreeScan {
            tree: self,
            leaf: Some(self.head),
            pos: 0,
        }
    }

    fn range_entries(&self, lo: Bound<&K>, hi: Bound<&K>) -> MemDbResult<Vec<(K, V)>> {
        let lower = match lo {
            Bound::Included(k) | Bound::Excluded(k) => Some(k),
            Bound::Unbounded => None,
        };
        let upper = match hi {
            Bound::Included(k) | Bound::Excluded(k) => Some(k),
            Bound::Unbounded => None,
        };
        if let (Some(l), Some(h)) = (lower, upper) {
            if l > h {
                return Ok(Vec::new());
            }
        }

        let (mut leaf_id, mut pos) = match lo {
            Bound::Unbounded => (self.head, 0),
            Bound::Included(k) => {
                let (id, path) = self.find_leaf(k)?;
                self.record_search(path.len() + 1);
                (id, self.leaf(id)?.keys.partition_point(|x| x < k))
            }
            Bound::Excluded(k) => {
                let (id, path) = self.find_leaf(k)?;
                self.record_search(path.len() + 1);
                (id, self.leaf(id)?.keys.partition_point(|x| x <= k))
            }
        };

        let mut out = Vec::new();
        loop {
            let leaf = self.leaf(leaf_id)?;
            while pos < leaf.keys.len() {
                let key = &leaf.keys[pos];
                let within = match hi {
                    Bound::Unbounded => true,
                    Bound::Included(h) => key <= h,
                    Bound::Excluded(h) => key < h,
                };
                if !within {
                    return Ok(out);
                }
                out.push((key.clone(), leaf.values[pos].clone()));
                pos += 1;
            }
            match leaf.next {
                Some(next) => {
                    leaf_id = next;
                    pos = 0;
                }
                None => return Ok(out),
            }
        }
    }

    pub fn statistics(&self) -> IndexStats {
        IndexStats {
            entries: self.len,
            searches: self.counters.searches.load(Ordering::Relaxed),
            total_search_depth: self.counters.search_depth.load(Ordering::Relaxed),
            splits: self.counters.splits,
            merges: self.counters.merges,
            height: self.height,
            ..Default::default()
        }
    }

    /// Structural self-check used by tests.
    #[cfg(test)]
    pub(crate) fn check_invariants(&self) -> MemDbResult<()> {
        let mut leaf_depths = Vec::new();
        self.check_node(self.root, None, None, 1, &mut leaf_depths)?;
        if leaf_depths.iter().any(|d| *d != self.height) {
            return Err(MemDbError::Internal(format!(
                "leaf depths {leaf_depths:?} differ from height {}",
                self.height
            )));
        }
        let scanned: Vec<&K> = self.scan().map(|(k, _)| k).collect();
        if scanned.len() != self.len || scanned.windows(2).any(|w| w[0] >= w[1]) {
            return Err(MemDbError::Internal("leaf chain out of order".to_string()));
        }
        Ok(())
    }

    #[cfg(test)]
    fn check_node(
        &self,
        id: NodeId,
        lower: Option<&K>,
        upper: Option<&K>,
        depth: usize,
        leaf_depths: &mut Vec<usize>,
    ) -> MemDbResult<()> {
        let is_root = id == self.root;
        let count = self.key_count(id)?;
        if count >= self.order || (!is_root && count < self.min_keys()) {
            return Err(MemDbError::Internal(format!(
                "node {} holds {count} keys",
                id.0
            )));
        }
        let keys: Vec<&K> = match &self.nodes[id.index()] {
            Node::Leaf(leaf) => leaf.keys.iter().collect(),
            Node::Internal(node) => node.keys.iter().collect(),
            Node::Free => return Err(corrupt(id, "node")),
        };
        for key in keys.iter() {
            if lower.is_some_and(|l| *key < l) || upper.is_some_and(|u| *key >= u) {
                return Err(MemDbError::Internal(format!("node {} key out of bounds", id.0)));
            }
        }
        if let Node::Internal(node) = &self.nodes[id.index()] {
            if node.children.len() != node.keys.len() + 1 {
                return Err(corrupt(id, "internal node with matching fan-out"));
            }
            for (i, child) in node.children.iter().enumerate() {
                let lo = if i == 0 { lower } else { Some(&node.keys[i - 1]) };
                let hi = node.keys.get(i).or(upper);
                self.check_node(*child, lo, hi, depth + 1, leaf_depths)?;
            }
        } else {
            leaf_depths.push(depth);
        }
        Ok(())
    }
}

pub struct BTreeScan<'a, K, V> {
    tree: &'a BPlusTree<K, V>,
    leaf: Option<NodeId>,
    pos: usize,
}

impl<'a, K, V> Iterator for BTreeScan<'a, K, V> {
    type Item = (&'a K, &'a V);

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            let leaf_id = self.leaf?;
            let Some(Node::Leaf(leaf)) = self.tree.nodes.get(leaf_id.index()) else {
                self.leaf = None;
                return None;
            };
            if self.pos < leaf.keys.len() {
                let item = (&leaf.keys[self.pos], &leaf.values[self.pos]);
                self.pos += 1;
                return Some(item);
            }
            self.leaf = leaf.next;
            self.pos = 0;
        }
    }
}

impl<K: IndexKey, V: Clone + std::fmt::Debug + Send + Sync> IndexStructure<K, V> for BPlusTree<K, V> {
    fn kind(&self) -> IndexKind {
        IndexKind::BTree
    }

    fn search(&self, key: &K) -> MemDbResult<Option<&V>> {
        self.get(key)
    }

    fn insert(&mut self, key: K, value: V) -> MemDbResult<InsertOutcome> {
        BPlusTree::insert(self, key, value)
    }

    fn delete(&mut self, key: &K) -> MemDbResult<bool> {
        self.remove(key)
    }

    fn range(&self, lo: Bound<&K>, hi: Bound<&K>) -> MemDbResult<Vec<(K, V)>> {
        self.range_entries(lo, hi)
    }

    fn len(&self) -> usize {
        self.len
    }

    fn stats(&self) -> IndexStats {
        self.statistics()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::StdRng;
    use rand::seq::SliceRandom;
    use rand::{Rng, SeedableRng};

    #[test]
    fn test_basic_insert() {
        let mut tree: BPlusTree<i64, u64> = BPlusTree::new(4).unwrap();
        for key in [5, 1, 9, 3, 7, 2, 8] {
            assert_eq!(tree.insert(key, key as u64 * 10).unwrap(), InsertOutcome::Inserted);
        }
        assert_eq!(tree.insert(3, 33).unwrap(), InsertOutcome::Updated);
        assert_eq!(tree.len, 7);
        assert_eq!(tree.get(&3).unwrap(), Some(&33));
        assert_eq!(tree.get(&4).unwrap(), None);
        assert!(tree.height() > 1);
        assert!(tree.statistics().splits > 0);
        tree.check_invariants().unwrap();
    }

    #[test]
    fn test_order_too_small() {
        assert!(BPlusTree::<i64, u64>::new(2).is_err());
    }

    #[test]
    fn test_range_matches_reference() {
        let mut rng = StdRng::seed_from_u64(7);
        let mut tree: BPlusTree<i64, i64> = BPlusTree::new(5).unwrap();
        let mut reference = BTreeMap::new();
        for _ in 0..2000 {
            let key = rng.random_range(-500..500);
            tree.insert(key, key * 2).unwrap();
            reference.insert(key, key * 2);
        }
        tree.check_invariants().unwrap();
        for _ in 0..200 {
            let a = rng.random_range(-600..600);
            let b = rng.random_range(-600..600);
            let (lo, hi) = (a.min(b), a.max(b));
            let got = tree.range_search(&lo, &hi, true).unwrap();
            let expected: Vec<(i64, i64)> =
                reference.range(lo..=hi).map(|(k, v)| (*k, *v)).collect();
            assert_eq!(got, expected);

            let got = tree.range_search(&lo, &hi, false).unwrap();
            let expected: Vec<(i64, i64)> = reference
                .range((Bound::Excluded(lo), Bound::Excluded(hi)))
                .map(|(k, v)| (*k, *v))
                .collect();
            assert_eq!(got, expected);
        }
        assert!(tree.range_search(&10, &1, true).unwrap().is_empty());
    }

    #[test]
    fn test_bulk_load_matches_incremental() {
        let pairs: Vec<(i64, u64)> = (0..1000).map(|k| (k * 3, k as u64)).collect();
        let mut loaded: BPlusTree<i64, u64> = BPlusTree::new(6).unwrap();
        loaded.bulk_load(pairs.clone()).unwrap();
        loaded.check_invariants().unwrap();

        let mut incremental: BPlusTree<i64, u64> = BPlusTree::new(6).unwrap();
        let mut shuffled = pairs.clone();
        shuffled.shuffle(&mut StdRng::seed_from_u64(3));
        for (k, v) in shuffled {
            incremental.insert(k, v).unwrap();
        }

        let a: Vec<(i64, u64)> = loaded.scan().map(|(k, v)| (*k, *v)).collect();
        let b: Vec<(i64, u64)> = incremental.scan().map(|(k, v)| (*k, *v)).collect();
        assert_eq!(a, b);
        assert_eq!(a, pairs);
        // restartable
        assert_eq!(loaded.scan().count(), 1000);
        assert_eq!(loaded.get(&300).unwrap(), Some(&100));
    }

    #[test]
    fn test_bulk_load_rejects_unsorted() {
        let mut tree: BPlusTree<i64, u64> = BPlusTree::new(4).unwrap();
        assert!(matches!(
            tree.bulk_load(vec![(2, 0), (1, 0)]),
            Err(MemDbError::IntegrityViolation(_))
        ));
        assert!(matches!(
            tree.bulk_load(vec![(1, 0), (1, 0)]),
            Err(MemDbError::IntegrityViolation(_))
        ));
        tree.bulk_load(Vec::new()).unwrap();
        assert_eq!(tree.scan().count(), 0);
    }

    #[test]
    fn test_delete_rebalances() {
        let mut tree: BPlusTree<i64, i64> = BPlusTree::new(4).unwrap();
        let mut keys: Vec<i64> = (0..500).collect();
        for k in keys.iter() {
            tree.insert(*k, *k).unwrap();
        }
        let grown = tree.height();
        keys.shuffle(&mut StdRng::seed_from_u64(11));
        let (gone, kept) = keys.split_at(450);
        for k in gone {
            assert!(tree.remove(k).unwrap());
            assert!(!tree.remove(k).unwrap());
        }
        tree.check_invariants().unwrap();
        assert!(tree.statistics().merges > 0);
        // sparse nodes at order 4 can keep every level
        assert!(tree.height() <= grown);
        let mut kept = kept.to_vec();
        kept.sort();
        let scanned: Vec<i64> = tree.scan().map(|(k, _)| *k).collect();
        assert_eq!(scanned, kept);

        for k in kept {
            tree.remove(&k).unwrap();
            tree.check_invariants().unwrap();
        }
        assert!(grown > 1);
        assert_eq!(tree.height(), 1);
        assert_eq!(tree.scan().count(), 0);
        tree.insert(1, 1).unwrap();
        assert_eq!(tree.get(&1).unwrap(), Some(&1));
    }

    #[test]
    fn test_sequential_edge_mix() {
        let mut rng = StdRng::seed_from_u64(42);
        let mut tree: BPlusTree<i64, i64> = BPlusTree::new(3).unwrap();
        let mut reference = BTreeMap::new();
        for _ in 0..3000 {
            let key = rng.random_range(0..200);
            if rng.random_bool(0.55) {
                tree.insert(key, key).unwrap();
                reference.insert(key, key);
            } else {
                assert_eq!(tree.remove(&key).unwrap(), reference.remove(&key).is_some());
            }
        }
        tree.check_invariants().unwrap();
        let scanned: Vec<i64> = tree.scan().map(|(k, _)| *k).collect();
        let expected: Vec<i64> = reference.keys().copied().collect();
        assert_eq!(scanned, expected);
    }

    #[test]
    fn test_search_statistics_and_histogram() {
        let mut tree: BPlusTree<i64, ()> = BPlusTree::new_with_config(BTreeConfig {
            order: 8,
            histogram_bucket_width: 10.0,
        })
        .unwrap();
        for k in 0..100 {
            tree.insert(k, ()).unwrap();
        }
        for k in 0..10 {
            tree.get(&k).unwrap();
        }
        let stats = tree.statistics();
        assert_eq!(stats.searches, 10);
        assert_eq!(stats.total_search_depth, 10 * tree.height() as u64);
        assert_eq!(tree.histogram().buckets().len(), 10);
        assert_eq!(tree.histogram().estimate_range(0.0, 19.0), 20);
    }
}
