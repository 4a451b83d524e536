// Cluster contraction: build the coarser graph for a vertex -> cluster
// mapping by aggregating inter-cluster edge weights in hash tables. The
// multi-thread path claims vertex blocks through a shared atomic offset and
// sinks each pair key into the concurrent map owned by its source cluster's
// residue class, so the later per-map passes touch disjoint coarse rows.

use std::sync::atomic::{AtomicI64, AtomicUsize, Ordering};

use rayon::prelude::*;
use rustc_hash::FxHashMap;
use sprs::{CsMat, TriMat};

use crate::config::{MatchingType, PartitionConfig};
use crate::graph::Graph;
use crate::hashmap::ConcurrentGrowingHashMap;

/// Contract `graph` along `coarse_mapping`. Coarse node weights are the sums
/// of their members' weights; coarse edges aggregate the inter-cluster edge
/// weights, stored in both directions like every graph in this crate.
pub fn contract_clustering(
    config: &PartitionConfig,
    pool: &rayon::ThreadPool,
    graph: &Graph,
    coarse_mapping: &[usize],
    no_of_coarse_vertices: usize,
) -> Graph {
    debug_assert_eq!(graph.len(), coarse_mapping.len());
    debug_assert_eq!(config.matching_type, MatchingType::Clustering);
    debug_assert!(coarse_mapping.iter().all(|&cluster| cluster < no_of_coarse_vertices));

    if config.num_threads > 1 && config.fast_contract_clustering {
        contract_clustering_multiple_threads(pool, graph, coarse_mapping, no_of_coarse_vertices)
    } else {
        contract_clustering_single_thread(graph, coarse_mapping, no_of_coarse_vertices)
    }
}

fn contract_clustering_single_thread(
    graph: &Graph,
    coarse_mapping: &[usize],
    no_of_coarse_vertices: usize,
) -> Graph {
    let mut block_infos = vec![0i64; no_of_coarse_vertices];

    let num_cut_edges = estimate_num_cut_edges(graph, no_of_coarse_vertices, 2);
    let mut new_edges: FxHashMap<u64, i64> =
        FxHashMap::with_capacity_and_hasher(num_cut_edges, Default::default());

    for node in 0..graph.len() {
        let source_cluster = coarse_mapping[node];
        block_infos[source_cluster] += graph.node_weight(node);

        for (target, edge_weight) in graph.neighbors(node) {
            let target_cluster = coarse_mapping[target];
            if source_cluster != target_cluster {
                // sorted key: both directions land on one entry
                *new_edges
                    .entry(pack_pair_sorted(source_cluster, target_cluster))
                    .or_insert(0) += edge_weight;
            }
        }
    }

    let mut triplets = TriMat::with_capacity(
        (no_of_coarse_vertices, no_of_coarse_vertices),
        2 * new_edges.len(),
    );
    for (&key, &doubled_weight) in &new_edges {
        let (lhs, rhs) = unpack_pair(key);
        // every undirected edge was visited from both endpoints
        let edge_weight = doubled_weight / 2;
        triplets.add_triplet(lhs, rhs, edge_weight);
        triplets.add_triplet(rhs, lhs, edge_weight);
    }

    Graph::from_csr(triplets.to_csr(), block_infos)
}

fn contract_clustering_multiple_threads(
    pool: &rayon::ThreadPool,
    graph: &Graph,
    coarse_mapping: &[usize],
    no_of_coarse_vertices: usize,
) -> Graph {
    let num_threads = pool.current_num_threads();
    let num_cut_edges = estimate_num_cut_edges(graph, no_of_coarse_vertices, 10);

    let new_edges: Vec<ConcurrentGrowingHashMap> = (0..num_threads)
        .map(|_| ConcurrentGrowingHashMap::with_capacity(2 * num_cut_edges / num_threads + 16))
        .collect();

    // vertex blocks are claimed through a shared offset
    let offset = AtomicUsize::new(0);
    let block_size = ((graph.len() as f64).sqrt().ceil() as usize).max(1000);

    let per_thread_block_infos = pool.broadcast(|_context| {
        let mut my_block_infos = vec![0i64; no_of_coarse_vertices];
        loop {
            let begin = offset.fetch_add(block_size, Ordering::Relaxed);
            if begin >= graph.len() {
                break;
            }
            let end = (begin + block_size).min(graph.len());

            for node in begin..end {
                let source_cluster = coarse_mapping[node];
                my_block_infos[source_cluster] += graph.node_weight(node);

                for (target, edge_weight) in graph.neighbors(node) {
                    let target_cluster = coarse_mapping[target];
                    if source_cluster != target_cluster {
                        // unsorted key: each direction accumulates the full
                        // pair weight in its owner's map
                        let key = pack_pair_unsorted(source_cluster, target_cluster);
                        new_edges[source_cluster % num_threads].insert_or_update(
                            key,
                            edge_weight,
                            |stored, value| *stored += value,
                            edge_weight,
                        );
                    }
                }
            }
        }
        my_block_infos
    });

    let mut block_infos = vec![0i64; no_of_coarse_vertices];
    for my_block_infos in per_thread_block_infos {
        for (cluster, weight) in my_block_infos.into_iter().enumerate() {
            block_infos[cluster] += weight;
        }
    }

    // per-coarse-vertex out-degrees, counted over each thread's own map
    let offsets: Vec<AtomicUsize> =
        (0..no_of_coarse_vertices).map(|_| AtomicUsize::new(0)).collect();
    let num_edges: usize = pool
        .broadcast(|context| {
            let mut count = 0usize;
            new_edges[context.index()].for_each(|key, _| {
                let (first, _) = unpack_pair(key);
                offsets[first].fetch_add(1, Ordering::Relaxed);
                count += 1;
            });
            count
        })
        .into_iter()
        .sum();

    // prefix-sum the degrees into CSR offsets
    let mut indptr = Vec::with_capacity(no_of_coarse_vertices + 1);
    let mut prefix = 0usize;
    for cluster_offset in offsets.iter() {
        let degree = cluster_offset.load(Ordering::Relaxed);
        cluster_offset.store(prefix, Ordering::Relaxed);
        indptr.push(prefix);
        prefix += degree;
    }
    indptr.push(prefix);
    debug_assert_eq!(prefix, num_edges);

    // populate the edge slots in parallel; slots of one coarse row are only
    // ever touched by the thread owning its residue class
    let slot_targets: Vec<AtomicUsize> = (0..num_edges).map(|_| AtomicUsize::new(0)).collect();
    let slot_weights: Vec<AtomicI64> = (0..num_edges).map(|_| AtomicI64::new(0)).collect();
    pool.broadcast(|context| {
        new_edges[context.index()].for_each(|key, weight_sum| {
            let (first, second) = unpack_pair(key);
            let slot = offsets[first].fetch_add(1, Ordering::Relaxed);
            slot_targets[slot].store(second, Ordering::Relaxed);
            slot_weights[slot].store(weight_sum, Ordering::Relaxed);
        });
    });

    // tear the hash tables down in parallel
    pool.install(|| new_edges.into_par_iter().for_each(drop));

    let mut indices: Vec<usize> = slot_targets.into_iter().map(AtomicUsize::into_inner).collect();
    let mut data: Vec<i64> = slot_weights.into_iter().map(AtomicI64::into_inner).collect();

    // sprs wants each adjacency row sorted by target
    let mut row_scratch: Vec<(usize, i64)> = Vec::new();
    for row in 0..no_of_coarse_vertices {
        let range = indptr[row]..indptr[row + 1];
        row_scratch.clear();
        row_scratch.extend(indices[range.clone()].iter().copied().zip(data[range.clone()].iter().copied()));
        row_scratch.sort_unstable_by_key(|&(target, _)| target);
        for (slot, &(target, weight)) in range.zip(row_scratch.iter()) {
            indices[slot] = target;
            data[slot] = weight;
        }
    }

    let coarse_csr = CsMat::new(
        (no_of_coarse_vertices, no_of_coarse_vertices),
        indptr,
        indices,
        data,
    );
    Graph::from_csr(coarse_csr, block_infos)
}

fn estimate_num_cut_edges(graph: &Graph, no_of_coarse_vertices: usize, divisor: usize) -> usize {
    let avg_degree = graph.number_of_edges() as f64 / graph.len().max(1) as f64;
    ((avg_degree * no_of_coarse_vertices as f64) as usize)
        .min(graph.number_of_edges() / divisor)
        .max(16)
}

fn pack_pair_sorted(lhs: usize, rhs: usize) -> u64 {
    if lhs < rhs {
        pack_pair_unsorted(lhs, rhs)
    } else {
        pack_pair_unsorted(rhs, lhs)
    }
}

fn pack_pair_unsorted(first: usize, second: usize) -> u64 {
    debug_assert!(first <= u32::MAX as usize && second <= u32::MAX as usize);
    ((first as u64) << 32) | second as u64
}

fn unpack_pair(key: u64) -> (usize, usize) {
    ((key >> 32) as usize, (key & u32::MAX as u64) as usize)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn square_graph() -> Graph {
        Graph::from_edges(4, &[(0, 1, 3), (1, 2, 2), (2, 3, 4), (0, 3, 1)], vec![1; 4])
    }

    #[test]
    fn test_contract_square_into_two_clusters() {
        // Arrange
        let graph = square_graph();
        let coarse_mapping = [0, 0, 1, 1];
        let config = PartitionConfig::default();
        let pool = rayon::ThreadPoolBuilder::new().num_threads(1).build().unwrap();

        // Act
        let coarser = contract_clustering(&config, &pool, &graph, &coarse_mapping, 2);

        // Assert: two coarse vertices of weight 2, one edge of weight 2+1.
        assert_eq!(coarser.len(), 2);
        assert_eq!(coarser.node_weights, vec![2, 2]);
        assert_eq!(coarser.get_edge_weight(0, 1), Some(3));
        assert_eq!(coarser.get_edge_weight(1, 0), Some(3));
        assert_eq!(coarser.number_of_edges(), 2);
    }

    #[test]
    fn test_parallel_contraction_matches_single_thread() {
        // Arrange: a ring of 12 vertices contracted into 4 clusters of 3.
        let mut edges = Vec::new();
        for vertex in 0..12usize {
            edges.push((vertex, (vertex + 1) % 12, vertex as i64 + 1));
        }
        let graph = Graph::from_edges(12, &edges, (1..=12).collect());
        let coarse_mapping: Vec<usize> = (0..12).map(|vertex| vertex / 3).collect();

        let serial_config = PartitionConfig { num_threads: 1, ..Default::default() };
        let parallel_config = PartitionConfig { num_threads: 3, ..Default::default() };
        let serial_pool = rayon::ThreadPoolBuilder::new().num_threads(1).build().unwrap();
        let parallel_pool = rayon::ThreadPoolBuilder::new().num_threads(3).build().unwrap();

        // Act
        let coarse_serial =
            contract_clustering(&serial_config, &serial_pool, &graph, &coarse_mapping, 4);
        let coarse_parallel =
            contract_clustering(&parallel_config, &parallel_pool, &graph, &coarse_mapping, 4);

        // Assert: identical coarse graphs from both paths.
        assert_eq!(coarse_serial.node_weights, coarse_parallel.node_weights);
        assert_eq!(coarse_serial.len(), coarse_parallel.len());
        for lhs in 0..4 {
            for rhs in 0..4 {
                assert_eq!(
                    coarse_serial.get_edge_weight(lhs, rhs),
                    coarse_parallel.get_edge_weight(lhs, rhs),
                    "edge ({lhs}, {rhs})"
                );
            }
        }
    }

    #[test]
    fn test_contraction_preserves_total_node_weight() {
        // Arrange
        let graph = square_graph();
        let coarse_mapping = [0, 1, 1, 0];
        let config = PartitionConfig::default();
        let pool = rayon::ThreadPoolBuilder::new().num_threads(1).build().unwrap();

        // Act
        let coarser = contract_clustering(&config, &pool, &graph, &coarse_mapping, 2);

        // Assert
        assert_eq!(coarser.total_node_weight(), graph.total_node_weight());
        // edges 0-1 and 2-3 cross the clusters: 3 + 4
        assert_eq!(coarser.get_edge_weight(0, 1), Some(7));
    }

    #[test]
    fn test_contraction_with_intra_cluster_edges_only() {
        // Arrange: everything collapses into one coarse vertex.
        let graph = square_graph();
        let coarse_mapping = [0, 0, 0, 0];
        let config = PartitionConfig::default();
        let pool = rayon::ThreadPoolBuilder::new().num_threads(1).build().unwrap();

        // Act
        let coarser = contract_clustering(&config, &pool, &graph, &coarse_mapping, 1);

        // Assert
        assert_eq!(coarser.len(), 1);
        assert_eq!(coarser.node_weights, vec![4]);
        assert_eq!(coarser.number_of_edges(), 0);
    }
}
