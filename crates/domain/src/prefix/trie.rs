//! Longest-prefix-match index over IPv4 prefixes.
//!
//! A path-compressed binary radix trie: every node stores the full prefix
//! bits from the root, so a compressed edge is just the gap between the
//! parent's and the child's prefix length. Nodes live in a slab arena and
//! reference each other by handle, never by pointer.

use crate::common::arena::{Arena, ArenaError};
use crate::common::entity::RuleId;
use crate::rule::entity::IpPrefix;

#[derive(Debug, Clone)]
struct TrieNode {
    /// Prefix bits from the root, top-aligned and normalized.
    key: u32,
    /// Significant bit count of `key`, 0-32.
    key_len: u8,
    /// Child handle per next-bit value.
    children: [Option<u32>; 2],
    /// Rule ids whose exact prefix terminates here. May be empty for a
    /// pure branch point.
    ids: Vec<RuleId>,
}

impl TrieNode {
    fn new(key: u32, key_len: u8) -> Self {
        Self {
            key,
            key_len,
            children: [None, None],
            ids: Vec::new(),
        }
    }

    fn child_count(&self) -> usize {
        self.children.iter().flatten().count()
    }
}

/// Bit `i` of `x`, counting from the most significant bit.
fn bit(x: u32, i: u8) -> usize {
    ((x >> (31 - i)) & 1) as usize
}

fn truncate(bits: u32, len: u8) -> u32 {
    IpPrefix { addr: 0, len }.mask() & bits
}

/// Length of the shared leading bit run of `a` and `b`, capped at `cap`.
fn common_len(a: u32, b: u32, cap: u8) -> u8 {
    ((a ^ b).leading_zeros() as u8).min(cap)
}

#[derive(Debug, Clone)]
pub struct PrefixTrie {
    arena: Arena<TrieNode>,
    root: u32,
    prefix_count: usize,
}

impl PrefixTrie {
    /// Create a trie whose arena holds at most `node_capacity` nodes.
    /// Each inserted prefix needs at most two new nodes (a fork and a
    /// terminator), so `2 * expected_prefixes + 1` is always enough.
    pub fn with_node_capacity(node_capacity: usize) -> Self {
        let mut arena = Arena::with_capacity(node_capacity.max(1));
        let root = arena
            .alloc(TrieNode::new(0, 0))
            .unwrap_or_else(|_| unreachable!("capacity is at least 1"));
        Self {
            arena,
            root,
            prefix_count: 0,
        }
    }

    /// Number of distinct prefixes carrying at least one rule id.
    pub fn prefix_count(&self) -> usize {
        self.prefix_count
    }

    /// Live arena nodes, including branch points. Exposed so compaction
    /// after removal is observable.
    pub fn node_count(&self) -> usize {
        self.arena.len()
    }

    /// Associate `id` with `prefix`, creating the path as needed.
    pub fn insert(&mut self, prefix: IpPrefix, id: RuleId) -> Result<(), ArenaError> {
        let mut cur = self.root;
        loop {
            if self.arena[cur].key_len == prefix.len {
                let node = &mut self.arena[cur];
                if node.ids.is_empty() {
                    self.prefix_count += 1;
                }
                if !node.ids.contains(&id) {
                    node.ids.push(id);
                }
                return Ok(());
            }

            let branch = bit(prefix.addr, self.arena[cur].key_len);
            let Some(child) = self.arena[cur].children[branch] else {
                let leaf = self.alloc_terminator(prefix, id)?;
                self.arena[cur].children[branch] = Some(leaf);
                return Ok(());
            };

            let (child_key, child_len) = {
                let c = &self.arena[child];
                (c.key, c.key_len)
            };
            let common = common_len(child_key, prefix.addr, child_len.min(prefix.len));

            if common == child_len {
                // The child's prefix covers ours; keep walking.
                cur = child;
                continue;
            }

            // The edge to `child` skips past where our prefix diverges or
            // ends: split it.
            if common == prefix.len {
                // Our prefix ends inside the edge; the split node is the
                // terminator and keeps the old child below it.
                let mid = self.alloc_terminator(prefix, id)?;
                self.arena[mid].children[bit(child_key, common)] = Some(child);
                self.arena[cur].children[branch] = Some(mid);
            } else {
                // Genuine fork: a branch point at the divergence, with the
                // old child on one side and our new terminator on the other.
                let mid = self
                    .arena
                    .alloc(TrieNode::new(truncate(prefix.addr, common), common))?;
                let leaf = match self.alloc_terminator(prefix, id) {
                    Ok(leaf) => leaf,
                    Err(e) => {
                        self.arena.free(mid);
                        return Err(e);
                    }
                };
                self.arena[mid].children[bit(child_key, common)] = Some(child);
                self.arena[mid].children[bit(prefix.addr, common)] = Some(leaf);
                self.arena[cur].children[branch] = Some(mid);
            }
            return Ok(());
        }
    }

    /// Drop the association of `id` with `prefix`. Nodes left without ids
    /// and with fewer than two children are pruned or merged away.
    /// Returns `false` if the association was not present.
    pub fn remove(&mut self, prefix: IpPrefix, id: RuleId) -> bool {
        let mut path = vec![self.root];
        let mut cur = self.root;
        while self.arena[cur].key_len < prefix.len {
            let branch = bit(prefix.addr, self.arena[cur].key_len);
            let Some(child) = self.arena[cur].children[branch] else {
                return false;
            };
            let c = &self.arena[child];
            if c.key_len > prefix.len || truncate(prefix.addr, c.key_len) != c.key {
                return false;
            }
            path.push(child);
            cur = child;
        }

        let node = &mut self.arena[cur];
        let Some(pos) = node.ids.iter().position(|&i| i == id) else {
            return false;
        };
        node.ids.remove(pos);
        if node.ids.is_empty() {
            self.prefix_count -= 1;
        }

        self.prune(&path, prefix.addr);
        true
    }

    /// All terminating sets along the path of `addr`, longest prefix
    /// first. The facade re-sorts ids by rule priority.
    pub fn lookup(&self, addr: u32) -> impl Iterator<Item = (u8, &[RuleId])> {
        let mut found: Vec<(u8, &[RuleId])> = Vec::new();
        let mut cur = self.root;
        loop {
            let node = &self.arena[cur];
            if !node.ids.is_empty() {
                found.push((node.key_len, node.ids.as_slice()));
            }
            if node.key_len >= 32 {
                break;
            }
            match node.children[bit(addr, node.key_len)] {
                Some(child)
                    if truncate(addr, self.arena[child].key_len) == self.arena[child].key =>
                {
                    cur = child;
                }
                _ => break,
            }
        }
        found.reverse();
        found.into_iter()
    }

    /// Union of every terminating set covering `addr`.
    pub fn covering_ids(&self, addr: u32) -> Vec<RuleId> {
        let mut ids = Vec::new();
        for (_, set) in self.lookup(addr) {
            ids.extend_from_slice(set);
        }
        ids
    }

    // ── Private helpers ────────────────────────────────────────────

    fn alloc_terminator(&mut self, prefix: IpPrefix, id: RuleId) -> Result<u32, ArenaError> {
        let mut node = TrieNode::new(prefix.addr, prefix.len);
        node.ids.push(id);
        let handle = self.arena.alloc(node)?;
        self.prefix_count += 1;
        Ok(handle)
    }

    /// Walk `path` bottom-up, detaching empty leaves and merging empty
    /// single-child nodes into their parent edge.
    fn prune(&mut self, path: &[u32], addr: u32) {
        for i in (1..path.len()).rev() {
            let node = path[i];
            if !self.arena[node].ids.is_empty() {
                break;
            }
            let parent = path[i - 1];
            let branch = bit(addr, self.arena[parent].key_len);
            match self.arena[node].child_count() {
                0 => {
                    self.arena[parent].children[branch] = None;
                    self.arena.free(node);
                    // The parent may now be prunable itself; keep walking.
                }
                1 => {
                    let only = self.arena[node]
                        .children
                        .iter()
                        .flatten()
                        .next()
                        .copied()
                        .unwrap_or_else(|| unreachable!("child_count is 1"));
                    self.arena[parent].children[branch] = Some(only);
                    self.arena.free(node);
                    break;
                }
                _ => break,
            }
        }
    }
}
