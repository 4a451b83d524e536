// Parallel multi-try driver around the k-way local search: distributes
// boundary vertices to the workers, runs the speculative searches on a
// scoped thread pool, then replays the logs serially in completion order.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

use crossbeam::queue::SegQueue;
use crossbeam::utils::CachePadded;
use rustc_hash::FxHashSet;

use crate::algorithms::kway_refinement_core::{
    apply_moves, apply_moves_serial, single_kway_refinement_round, MovedNodes, ThreadData,
};
use crate::algorithms::Error;
use crate::boundary::Boundary;
use crate::config::PartitionConfig;
use crate::graph::Graph;
use crate::hashmap::max_size_to_fit_l1;
use crate::Partition;

/// Diagnostic data of one refinement call.
#[derive(Debug, Clone, Copy, Default)]
pub struct RefinementMetadata {
    /// Total edge-cut reduction achieved by the call.
    pub cut_improvement: i64,
    /// Number of vertices the apply phase committed.
    pub moved_nodes: usize,
    /// Number of global multitry rounds that ran.
    pub rounds: usize,
}

/// Run global multitry rounds seeded with every boundary vertex until a
/// round brings no improvement. Returns the total improvement and the
/// metadata of the call.
pub fn perform_refinement(
    config: &PartitionConfig,
    pool: &rayon::ThreadPool,
    graph: &Graph,
    partition: &mut [usize],
    boundary: &mut Boundary,
) -> RefinementMetadata {
    let moved_idx: Vec<AtomicBool> = (0..graph.len()).map(|_| AtomicBool::new(false)).collect();
    let mut reactivated_vertices = Vec::new();
    let mut metadata = RefinementMetadata::default();

    for _round in 0..config.global_multitry_rounds {
        let start_nodes = boundary.all_boundary_nodes();
        if start_nodes.is_empty() {
            break;
        }
        metadata.rounds += 1;

        let (improvement, moved) = start_more_localized_search(
            config,
            pool,
            graph,
            partition,
            boundary,
            &moved_idx,
            &start_nodes,
            config.step_limit,
            None,
            &mut reactivated_vertices,
        );
        metadata.cut_improvement += improvement;
        metadata.moved_nodes += moved;

        if improvement == 0 {
            break;
        }
    }

    metadata
}

/// Run multitry rounds seeded with the boundary of one scheduled block pair
/// (or the whole boundary under `kway_all_boundary_nodes_refinement`),
/// recording every block a committed move touched.
#[allow(clippy::too_many_arguments)]
pub fn perform_refinement_around_parts(
    config: &PartitionConfig,
    pool: &rayon::ThreadPool,
    graph: &Graph,
    partition: &mut [usize],
    boundary: &mut Boundary,
    lhs: usize,
    rhs: usize,
    touched_blocks: &mut FxHashSet<usize>,
) -> i64 {
    let moved_idx: Vec<AtomicBool> = (0..graph.len()).map(|_| AtomicBool::new(false)).collect();
    let step_limit = (config.local_multitry_fm_alpha * config.step_limit as f64).ceil() as usize;

    let mut total_improvement = 0;
    let mut reactivated_vertices: Vec<usize> = Vec::new();

    for _round in 0..config.global_multitry_rounds {
        let start_nodes = if !reactivated_vertices.is_empty() {
            // conflict strategy handed vertices back for another pass
            let mut nodes = std::mem::take(&mut reactivated_vertices);
            nodes.sort_unstable();
            nodes.dedup();
            nodes
        } else if config.kway_all_boundary_nodes_refinement {
            boundary.all_boundary_nodes()
        } else {
            let mut nodes = boundary.directed_boundary(lhs, rhs);
            nodes.extend(boundary.directed_boundary(rhs, lhs));
            nodes
        };
        if start_nodes.is_empty() {
            break;
        }

        let (improvement, _moved) = start_more_localized_search(
            config,
            pool,
            graph,
            partition,
            boundary,
            &moved_idx,
            &start_nodes,
            step_limit,
            Some(touched_blocks),
            &mut reactivated_vertices,
        );
        total_improvement += improvement;

        if improvement == 0 {
            break;
        }
    }

    total_improvement
}

/// One parallel phase: every worker is seeded with the whole start-node pool
/// in its own random order, the atomic claim on `moved_idx` distributes the
/// vertices between the racing searches, and the first worker to finish
/// winds the others down. Afterwards the logs are replayed serially, thread
/// 0 first and the rest in completion order.
#[allow(clippy::too_many_arguments)]
fn start_more_localized_search(
    config: &PartitionConfig,
    pool: &rayon::ThreadPool,
    graph: &Graph,
    partition: &mut [usize],
    boundary: &mut Boundary,
    moved_idx: &[AtomicBool],
    start_nodes: &[usize],
    step_limit: usize,
    mut touched_blocks: Option<&mut FxHashSet<usize>>,
    reactivated_vertices: &mut Vec<usize>,
) -> (i64, usize) {
    let num_threads = config.num_threads;

    let mut tds: Vec<CachePadded<ThreadData>> = (0..num_threads)
        .map(|id| {
            let mut td = ThreadData::new(id, config.k, step_limit, config.seed);
            td.load_block_state(boundary);
            // every worker sees the whole pool; the atomic claim on
            // moved_idx is what distributes the vertices between them
            td.start_nodes = start_nodes.to_vec();
            CachePadded::new(td)
        })
        .collect();

    let num_threads_finished = AtomicUsize::new(0);
    let finished_threads: SegQueue<usize> = SegQueue::new();

    {
        let partition_view: &[usize] = partition;
        let worker = |td: &mut ThreadData| {
            single_kway_refinement_round(
                td,
                graph,
                partition_view,
                moved_idx,
                &num_threads_finished,
                config,
            );
            // lets the other workers wind down so the apply phase starts
            num_threads_finished.fetch_add(1, Ordering::Relaxed);
        };

        pool.scope(|scope| {
            let (first, rest) = tds.split_at_mut(1);
            for td in rest.iter_mut() {
                let worker = &worker;
                let finished_threads = &finished_threads;
                scope.spawn(move |_| {
                    worker(&mut *td);
                    finished_threads.push(td.id);
                });
            }
            worker(&mut first[0]);
        });
    }

    // serial apply phase
    let mut overall_gain = 0;
    let overall_moved;

    if num_threads == 1 {
        let accepted_before = tds[0].accepted_movements;
        overall_gain += apply_moves_serial(
            &mut tds[0],
            graph,
            partition,
            boundary,
            config,
            touched_blocks.as_deref_mut(),
        );
        overall_moved = accepted_before;
    } else {
        let mut order = vec![0];
        while let Some(id) = finished_threads.pop() {
            order.push(id);
        }
        debug_assert_eq!(order.len(), num_threads);

        let mut moved_nodes =
            MovedNodes::with_capacity_and_hasher(max_size_to_fit_l1::<usize, (usize, usize)>(), Default::default());
        for id in order {
            overall_gain += apply_moves(
                &mut tds[id],
                graph,
                partition,
                boundary,
                config,
                &mut moved_nodes,
                touched_blocks.as_deref_mut(),
                reactivated_vertices,
            );
        }
        overall_moved = moved_nodes.len();
    }

    // release the claims so the next round starts from a clean slate
    for td in tds.iter_mut() {
        for &node in &td.moved {
            moved_idx[node].store(false, Ordering::Relaxed);
        }
        td.moved.clear();
        td.clear_log();
    }

    (overall_gain, overall_moved)
}

/// Parallel multi-try k-way FM refinement of an existing partition.
///
/// # Example
///
/// ```rust
/// use KwayFM::algorithms::MultitryKwayRefinement;
/// use KwayFM::config::PartitionConfig;
/// use KwayFM::graph::Graph;
/// use KwayFM::Partition;
/// # fn main() -> Result<(), Box<dyn std::error::Error>> {
///
///     let graph = Graph::from_edges(
///         6,
///         &[(0, 1, 1), (1, 2, 1), (0, 2, 1), (3, 4, 1), (4, 5, 1), (3, 5, 1), (2, 3, 1)],
///         vec![1; 6],
///     );
///     let mut partition = vec![0, 0, 1, 0, 1, 1];
///     let config = PartitionConfig {
///         k: 2,
///         upper_bound_partition: 5,
///         seed: Some(11),
///         ..Default::default()
///     };
///
///     let metadata = MultitryKwayRefinement { config }.partition(&mut partition, &graph)?;
///
///     assert_eq!(graph.edge_cut(&partition), 1);
///     assert_eq!(metadata.cut_improvement, 4);
///     Ok(())
/// }
/// ```
#[derive(Debug, Clone)]
pub struct MultitryKwayRefinement {
    pub config: PartitionConfig,
}

impl<'a> Partition<&'a Graph> for MultitryKwayRefinement {
    type Metadata = RefinementMetadata;
    type Error = Error;

    fn partition(
        &mut self,
        part_ids: &mut [usize],
        graph: &'a Graph,
    ) -> Result<Self::Metadata, Self::Error> {
        self.config.validate()?;

        if part_ids.len() != graph.len() {
            return Err(Error::InputLenMismatch {
                expected: part_ids.len(),
                actual: graph.len(),
            });
        }
        debug_assert!(part_ids.iter().all(|&block| block < self.config.k));

        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(self.config.num_threads)
            .build()
            .map_err(|_| Error::InvalidConfiguration { option: "num_threads" })?;

        let mut boundary = Boundary::build(graph, part_ids, self.config.k);
        let metadata = perform_refinement(&self.config, &pool, graph, part_ids, &mut boundary);

        debug_assert!(boundary.assert_bnodes_in_boundaries(graph, part_ids));
        debug_assert!(boundary.assert_boundaries_are_bnodes(graph, part_ids));

        Ok(metadata)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{ApplyMoveStrategy, KwayStopRule, PermutationQuality};

    fn two_triangles() -> Graph {
        Graph::from_edges(
            6,
            &[(0, 1, 1), (1, 2, 1), (0, 2, 1), (3, 4, 1), (4, 5, 1), (3, 5, 1), (2, 3, 1)],
            vec![1; 6],
        )
    }

    /// 4x4 grid of unit-weight vertices with a column-interleaved initial
    /// partition, which a round of refinement should untangle considerably.
    fn grid4x4() -> (Graph, Vec<usize>) {
        let mut edges = Vec::new();
        for row in 0..4usize {
            for col in 0..4usize {
                let vertex = 4 * row + col;
                if col + 1 < 4 {
                    edges.push((vertex, vertex + 1, 1));
                }
                if row + 1 < 4 {
                    edges.push((vertex, vertex + 4, 1));
                }
            }
        }
        let graph = Graph::from_edges(16, &edges, vec![1; 16]);
        let partition = (0..16).map(|vertex| vertex % 2).collect();
        (graph, partition)
    }

    #[test]
    fn test_refines_two_triangles_single_thread() {
        // Arrange
        let graph = two_triangles();
        let mut partition = vec![0, 0, 1, 0, 1, 1];
        let config = PartitionConfig {
            k: 2,
            upper_bound_partition: 5,
            use_bucket_queues: true,
            seed: Some(11),
            ..Default::default()
        };

        // Act
        let metadata = MultitryKwayRefinement { config }
            .partition(&mut partition, &graph)
            .unwrap();

        // Assert
        assert_eq!(metadata.cut_improvement, 4);
        assert_eq!(graph.edge_cut(&partition), 1);
    }

    #[test]
    fn test_refines_with_two_threads_and_conflict_strategy() {
        // Arrange
        let (graph, mut partition) = grid4x4();
        let cut_before = graph.edge_cut(&partition);
        let config = PartitionConfig {
            k: 2,
            upper_bound_partition: 10,
            num_threads: 2,
            apply_move_strategy: ApplyMoveStrategy::GainRecalculation,
            kway_stop_rule: KwayStopRule::Adaptive,
            global_multitry_rounds: 3,
            seed: Some(5),
            ..Default::default()
        };

        // Act
        let metadata = MultitryKwayRefinement { config: config.clone() }
            .partition(&mut partition, &graph)
            .unwrap();

        // Assert: the accounting matches whatever the interleaving did.
        let cut_after = graph.edge_cut(&partition);
        assert_eq!(cut_after, cut_before - metadata.cut_improvement);
        assert!(cut_after <= cut_before);

        // hard constraints hold afterwards
        let boundary = Boundary::build(&graph, &partition, 2);
        assert!(boundary.block_weight(0) < config.upper_bound_partition);
        assert!(boundary.block_weight(1) < config.upper_bound_partition);
        assert!(boundary.block_count(0) >= 1);
        assert!(boundary.block_count(1) >= 1);
        assert_eq!(boundary.block_weight(0) + boundary.block_weight(1), 16);
    }

    #[test]
    fn test_grid_improves_single_threaded() {
        // Arrange: the interleaved grid has plateau moves everywhere, and
        // every plateau move exposes a strictly positive follow-up.
        let (graph, mut partition) = grid4x4();
        let cut_before = graph.edge_cut(&partition);
        assert_eq!(cut_before, 12);
        let config = PartitionConfig {
            k: 2,
            upper_bound_partition: 10,
            global_multitry_rounds: 3,
            seed: Some(19),
            ..Default::default()
        };

        // Act
        let metadata = MultitryKwayRefinement { config }
            .partition(&mut partition, &graph)
            .unwrap();

        // Assert
        let cut_after = graph.edge_cut(&partition);
        assert!(cut_after < cut_before);
        assert_eq!(cut_after, cut_before - metadata.cut_improvement);
    }

    #[test]
    fn test_second_refinement_pass_is_idempotent() {
        // Arrange
        let graph = two_triangles();
        let mut partition = vec![0, 0, 1, 0, 1, 1];
        let config = PartitionConfig {
            k: 2,
            upper_bound_partition: 5,
            permutation_during_refinement: PermutationQuality::Good,
            seed: Some(3),
            ..Default::default()
        };
        MultitryKwayRefinement { config: config.clone() }
            .partition(&mut partition, &graph)
            .unwrap();

        // Act: refining the refined partition again changes nothing.
        let partition_before = partition.clone();
        let metadata = MultitryKwayRefinement { config }
            .partition(&mut partition, &graph)
            .unwrap();

        // Assert
        assert_eq!(metadata.cut_improvement, 0);
        assert_eq!(partition, partition_before);
    }

    #[test]
    fn test_around_parts_reports_touched_blocks() {
        // Arrange
        let graph = two_triangles();
        let mut partition = vec![0, 0, 1, 0, 1, 1];
        let config = PartitionConfig {
            k: 2,
            upper_bound_partition: 5,
            seed: Some(7),
            ..Default::default()
        };
        let pool = rayon::ThreadPoolBuilder::new().num_threads(1).build().unwrap();
        let mut boundary = Boundary::build(&graph, &partition, 2);
        let mut touched_blocks = FxHashSet::default();

        // Act
        let improvement = perform_refinement_around_parts(
            &config, &pool, &graph, &mut partition, &mut boundary, 0, 1, &mut touched_blocks,
        );

        // Assert
        assert_eq!(improvement, 4);
        assert!(touched_blocks.contains(&0));
        assert!(touched_blocks.contains(&1));
        assert_eq!(boundary.total_edge_cut(), 1);
    }

    #[test]
    fn test_partition_rejects_length_mismatch() {
        // Arrange
        let graph = two_triangles();
        let mut partition = vec![0, 0, 1];
        let config = PartitionConfig { k: 2, upper_bound_partition: 5, ..Default::default() };

        // Act
        let result = MultitryKwayRefinement { config }.partition(&mut partition, &graph);

        // Assert
        assert!(matches!(result, Err(Error::InputLenMismatch { .. })));
    }

    #[test]
    fn test_partition_rejects_invalid_configuration() {
        // Arrange
        let graph = two_triangles();
        let mut partition = vec![0, 0, 1, 0, 1, 1];
        let config = PartitionConfig { k: 1, ..Default::default() };

        // Act
        let result = MultitryKwayRefinement { config }.partition(&mut partition, &graph);

        // Assert
        assert!(matches!(result, Err(Error::InvalidConfiguration { option: "k" })));
    }
}
