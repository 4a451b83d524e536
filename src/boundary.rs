use rustc_hash::{FxHashMap, FxHashSet};

use crate::graph::Graph;

/// Boundary vertices and edge cut of one pair of adjacent blocks.
///
/// Stored under the canonical key `(lhs, rhs)` with `lhs < rhs`;
/// `lhs_boundary` holds the vertices of `lhs` with a neighbor in `rhs` and
/// `rhs_boundary` the reverse direction.
#[derive(Default)]
struct PairBoundary {
    lhs_boundary: FxHashSet<usize>,
    rhs_boundary: FxHashSet<usize>,
    edge_cut: i64,
}

impl PairBoundary {
    fn is_empty(&self) -> bool {
        self.lhs_boundary.is_empty() && self.rhs_boundary.is_empty()
    }
}

/// Index over all directed block boundaries of a partitioned graph.
///
/// Maintains, for every pair of adjacent blocks, the two directed boundary
/// vertex sets and the weight of the edges crossing the pair, and for every
/// block its total vertex weight and vertex count. The index is mutated only
/// through `post_moved_boundary_node_updates` and the block setters, which is
/// what keeps it consistent while the move applier replays speculative logs.
pub struct Boundary {
    k: usize,
    block_weights: Vec<i64>,
    block_counts: Vec<usize>,
    pairs: FxHashMap<(usize, usize), PairBoundary>,
}

fn canonical(lhs: usize, rhs: usize) -> (usize, usize) {
    if lhs < rhs { (lhs, rhs) } else { (rhs, lhs) }
}

impl Boundary {
    /// Build the boundary index for `partition` from scratch.
    pub fn build(graph: &Graph, partition: &[usize], k: usize) -> Self {
        debug_assert_eq!(graph.len(), partition.len());

        let mut boundary = Self {
            k,
            block_weights: vec![0; k],
            block_counts: vec![0; k],
            pairs: FxHashMap::default(),
        };

        for vertex in 0..graph.len() {
            let block = partition[vertex];
            boundary.block_weights[block] += graph.node_weight(vertex);
            boundary.block_counts[block] += 1;

            for (target, edge_weight) in graph.neighbors(vertex) {
                let target_block = partition[target];
                if target_block == block {
                    continue;
                }
                let entry = boundary.pairs.entry(canonical(block, target_block)).or_default();
                if block < target_block {
                    entry.lhs_boundary.insert(vertex);
                } else {
                    entry.rhs_boundary.insert(vertex);
                }
                // each undirected cut edge is visited from both endpoints
                if vertex < target {
                    entry.edge_cut += edge_weight;
                }
            }
        }

        boundary
    }

    pub fn k(&self) -> usize {
        self.k
    }

    pub fn block_weight(&self, block: usize) -> i64 {
        self.block_weights[block]
    }

    pub fn set_block_weight(&mut self, block: usize, weight: i64) {
        self.block_weights[block] = weight;
    }

    /// Number of vertices currently assigned to `block`.
    pub fn block_count(&self, block: usize) -> usize {
        self.block_counts[block]
    }

    pub fn set_block_count(&mut self, block: usize, count: usize) {
        self.block_counts[block] = count;
    }

    /// Number of boundary vertices of `lhs` towards `rhs`.
    pub fn size(&self, lhs: usize, rhs: usize) -> usize {
        self.directed(lhs, rhs).map_or(0, |set| set.len())
    }

    /// The vertices of `lhs` with at least one neighbor in `rhs`.
    pub fn directed_boundary(&self, lhs: usize, rhs: usize) -> Vec<usize> {
        self.directed(lhs, rhs)
            .map_or_else(Vec::new, |set| set.iter().cloned().collect())
    }

    /// Sum of edge weights between `lhs` and `rhs`.
    pub fn edge_cut_between(&self, lhs: usize, rhs: usize) -> i64 {
        self.pairs
            .get(&canonical(lhs, rhs))
            .map_or(0, |pair| pair.edge_cut)
    }

    /// Total edge cut over all block pairs.
    pub fn total_edge_cut(&self) -> i64 {
        self.pairs.values().map(|pair| pair.edge_cut).sum()
    }

    /// The edges of the quotient graph, sorted for stable scheduling.
    pub fn quotient_graph_edges(&self) -> Vec<(usize, usize)> {
        let mut edges: Vec<(usize, usize)> = self
            .pairs
            .iter()
            .filter(|(_, pair)| !pair.is_empty())
            .map(|(&key, _)| key)
            .collect();
        edges.sort_unstable();
        edges
    }

    /// Every vertex of the graph that lies on some directed boundary.
    pub fn all_boundary_nodes(&self) -> Vec<usize> {
        let mut nodes: FxHashSet<usize> = FxHashSet::default();
        for pair in self.pairs.values() {
            nodes.extend(pair.lhs_boundary.iter().cloned());
            nodes.extend(pair.rhs_boundary.iter().cloned());
        }
        let mut nodes: Vec<usize> = nodes.into_iter().collect();
        nodes.sort_unstable();
        nodes
    }

    /// Repair every directed boundary incident to `node` after its partition
    /// id changed from `from` to `to`. Must be called after the partition
    /// array has been updated; block weights and counts are the caller's
    /// responsibility.
    pub fn post_moved_boundary_node_updates(
        &mut self,
        graph: &Graph,
        partition: &[usize],
        node: usize,
        from: usize,
        to: usize,
    ) {
        debug_assert_eq!(partition[node], to);
        debug_assert_ne!(from, to);

        for (target, edge_weight) in graph.neighbors(node) {
            let target_block = partition[target];

            // edge (node, target) crossed (from, target_block) before the
            // move and crosses (to, target_block) now
            if target_block != from {
                self.pair_mut(from, target_block).edge_cut -= edge_weight;
                self.remove_directed(from, target_block, node);
            }
            if target_block != to {
                self.pair_mut(to, target_block).edge_cut += edge_weight;
                self.insert_directed(to, target_block, node);
            }

            if target_block == from {
                // target kept its block but gained a neighbor in `to`
                self.insert_directed(from, to, target);
            } else if target_block == to {
                // target may have lost its only neighbor in `from`
                if !Self::has_neighbor_in(graph, partition, target, from) {
                    self.remove_directed(to, from, target);
                }
            } else {
                self.insert_directed(target_block, to, target);
                if !Self::has_neighbor_in(graph, partition, target, from) {
                    self.remove_directed(target_block, from, target);
                }
            }
        }

        self.prune(from, to);
        for (target, _) in graph.neighbors(node) {
            self.prune(partition[target], from);
            self.prune(partition[target], to);
        }
    }

    /// True iff every recorded boundary vertex really is one.
    pub fn assert_bnodes_in_boundaries(&self, graph: &Graph, partition: &[usize]) -> bool {
        for (&(lhs, rhs), pair) in &self.pairs {
            for &node in &pair.lhs_boundary {
                if partition[node] != lhs || !Self::has_neighbor_in(graph, partition, node, rhs) {
                    return false;
                }
            }
            for &node in &pair.rhs_boundary {
                if partition[node] != rhs || !Self::has_neighbor_in(graph, partition, node, lhs) {
                    return false;
                }
            }
        }
        true
    }

    /// True iff every actual boundary vertex is recorded.
    pub fn assert_boundaries_are_bnodes(&self, graph: &Graph, partition: &[usize]) -> bool {
        for vertex in 0..graph.len() {
            let block = partition[vertex];
            for (target, _) in graph.neighbors(vertex) {
                let target_block = partition[target];
                if target_block == block {
                    continue;
                }
                let present = self
                    .directed(block, target_block)
                    .map_or(false, |set| set.contains(&vertex));
                if !present {
                    return false;
                }
            }
        }
        true
    }

    fn directed(&self, lhs: usize, rhs: usize) -> Option<&FxHashSet<usize>> {
        let key = canonical(lhs, rhs);
        self.pairs.get(&key).map(|pair| {
            if lhs < rhs { &pair.lhs_boundary } else { &pair.rhs_boundary }
        })
    }

    fn pair_mut(&mut self, lhs: usize, rhs: usize) -> &mut PairBoundary {
        self.pairs.entry(canonical(lhs, rhs)).or_default()
    }

    fn insert_directed(&mut self, lhs: usize, rhs: usize, node: usize) {
        let forward = lhs < rhs;
        let pair = self.pair_mut(lhs, rhs);
        if forward {
            pair.lhs_boundary.insert(node);
        } else {
            pair.rhs_boundary.insert(node);
        }
    }

    fn remove_directed(&mut self, lhs: usize, rhs: usize, node: usize) {
        let forward = lhs < rhs;
        if let Some(pair) = self.pairs.get_mut(&canonical(lhs, rhs)) {
            if forward {
                pair.lhs_boundary.remove(&node);
            } else {
                pair.rhs_boundary.remove(&node);
            }
        }
    }

    fn prune(&mut self, lhs: usize, rhs: usize) {
        if lhs == rhs {
            return;
        }
        let key = canonical(lhs, rhs);
        if let Some(pair) = self.pairs.get(&key) {
            if pair.is_empty() {
                debug_assert_eq!(pair.edge_cut, 0);
                self.pairs.remove(&key);
            }
        }
    }

    fn has_neighbor_in(graph: &Graph, partition: &[usize], node: usize, block: usize) -> bool {
        graph.neighbors(node).any(|(target, _)| partition[target] == block)
    }
}
