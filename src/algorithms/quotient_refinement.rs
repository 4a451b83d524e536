// Scheduling of pairwise refinement over the quotient graph: pick the next
// pair of adjacent blocks, run the 2-way collaborator and/or the k-way
// multitry engine around it, and feed the outcome back into the schedule.

use std::collections::VecDeque;

use rustc_hash::FxHashSet;

use crate::algorithms::multitry_kway_fm::perform_refinement_around_parts;
use crate::boundary::Boundary;
use crate::config::{PartitionConfig, RefinementSchedulingAlgorithm};
use crate::graph::Graph;

/// Outcome of refining one quotient edge, fed back to the scheduler.
#[derive(Debug, Clone, Copy)]
pub struct QgraphEdgeStatistics {
    pub pair: (usize, usize),
    pub improvement: i64,
    pub something_changed: bool,
}

/// Interface of the pairwise 2-way refinement collaborators (FM and flow).
/// Their internals live outside this crate; the scheduler only hands them a
/// pair, its directed boundaries and the recorded cut.
pub trait TwoWayRefinement {
    #[allow(clippy::too_many_arguments)]
    fn perform_refinement(
        &mut self,
        config: &PartitionConfig,
        graph: &Graph,
        partition: &mut [usize],
        boundary: &mut Boundary,
        lhs: usize,
        rhs: usize,
        lhs_start_nodes: &[usize],
        rhs_start_nodes: &[usize],
        initial_cut: i64,
    ) -> (i64, bool);
}

/// Selects the order in which quotient edges are refined.
pub enum QuotientGraphScheduler {
    /// Round-robin over the quotient edges; a pair that improved is
    /// re-enqueued until the bank-account budget is spent.
    Simple {
        queue: VecDeque<(usize, usize)>,
        bank_account_factor: usize,
        pushes: usize,
    },
    /// Pairs touching an active block are refined round after round; a pair
    /// refinement with improvement re-activates its blocks for the next
    /// round, and the schedule ends when no block stays active.
    ActiveBlocks {
        queue: VecDeque<(usize, usize)>,
        active: Vec<bool>,
    },
}

impl QuotientGraphScheduler {
    pub fn new(config: &PartitionConfig, qgraph_edges: Vec<(usize, usize)>, factor: usize) -> Self {
        match config.refinement_scheduling_algorithm {
            RefinementSchedulingAlgorithm::Fast => QuotientGraphScheduler::Simple {
                queue: qgraph_edges.into(),
                bank_account_factor: factor,
                pushes: 0,
            },
            RefinementSchedulingAlgorithm::ActiveBlocks
            | RefinementSchedulingAlgorithm::ActiveBlocksRefKway => {
                QuotientGraphScheduler::ActiveBlocks {
                    queue: qgraph_edges.into(),
                    active: vec![false; config.k],
                }
            }
        }
    }

    /// Whether the schedule is exhausted. For the active-block scheduler
    /// this is also where a new round is built from the blocks the previous
    /// round re-activated.
    pub fn has_finished(&mut self, boundary: &Boundary) -> bool {
        match self {
            QuotientGraphScheduler::Simple { queue, .. } => queue.is_empty(),
            QuotientGraphScheduler::ActiveBlocks { queue, active } => {
                if !queue.is_empty() {
                    return false;
                }
                if active.iter().any(|&is_active| is_active) {
                    for (lhs, rhs) in boundary.quotient_graph_edges() {
                        if active[lhs] || active[rhs] {
                            queue.push_back((lhs, rhs));
                        }
                    }
                    active.fill(false);
                }
                queue.is_empty()
            }
        }
    }

    pub fn next(&mut self) -> (usize, usize) {
        match self {
            QuotientGraphScheduler::Simple { queue, .. }
            | QuotientGraphScheduler::ActiveBlocks { queue, .. } => {
                queue.pop_front().expect("scheduler queried after it finished")
            }
        }
    }

    pub fn push_statistics(&mut self, statistics: QgraphEdgeStatistics) {
        match self {
            QuotientGraphScheduler::Simple { queue, bank_account_factor, pushes } => {
                if statistics.improvement > 0 && *pushes < *bank_account_factor {
                    queue.push_back(statistics.pair);
                    *pushes += 1;
                }
            }
            QuotientGraphScheduler::ActiveBlocks { active, .. } => {
                if statistics.improvement > 0 {
                    let (lhs, rhs) = statistics.pair;
                    active[lhs] = true;
                    active[rhs] = true;
                }
            }
        }
    }

    /// Keep the given blocks active for the next round.
    pub fn activate_blocks(&mut self, touched_blocks: &FxHashSet<usize>) {
        if let QuotientGraphScheduler::ActiveBlocks { active, .. } = self {
            for &block in touched_blocks {
                active[block] = true;
            }
        }
    }
}

/// Drive pairwise refinement over the quotient graph until the scheduler
/// runs out of pairs. Returns the total edge-cut improvement.
pub fn perform_quotient_graph_refinement(
    config: &PartitionConfig,
    pool: &rayon::ThreadPool,
    graph: &Graph,
    partition: &mut [usize],
    boundary: &mut Boundary,
    mut two_way_refinement: Option<&mut dyn TwoWayRefinement>,
) -> i64 {
    let qgraph_edges = boundary.quotient_graph_edges();
    let factor = (config.bank_account_factor * qgraph_edges.len() as f64).ceil() as usize;
    let mut scheduler = QuotientGraphScheduler::new(config, qgraph_edges, factor);

    let mut overall_improvement = 0;

    loop {
        debug_assert!(boundary.assert_bnodes_in_boundaries(graph, partition));
        debug_assert!(boundary.assert_boundaries_are_bnodes(graph, partition));

        if scheduler.has_finished(boundary) {
            break;
        }
        let (lhs, rhs) = scheduler.next();

        let initial_cut_value = boundary.edge_cut_between(lhs, rhs);
        if initial_cut_value < 0 {
            // degenerate combine corner case on the coarsest level
            continue;
        }

        let mut improvement = 0;
        let mut something_changed = false;
        if config.quotient_graph_two_way_refinement {
            if let Some(refiner) = two_way_refinement.as_deref_mut() {
                let lhs_start_nodes = boundary.directed_boundary(lhs, rhs);
                let rhs_start_nodes = boundary.directed_boundary(rhs, lhs);
                let (two_way_improvement, changed) = refiner.perform_refinement(
                    config,
                    graph,
                    partition,
                    boundary,
                    lhs,
                    rhs,
                    &lhs_start_nodes,
                    &rhs_start_nodes,
                    initial_cut_value,
                );
                improvement = two_way_improvement;
                something_changed = changed;
            }
        }
        overall_improvement += improvement;

        if config.refinement_scheduling_algorithm
            == RefinementSchedulingAlgorithm::ActiveBlocksRefKway
        {
            let mut touched_blocks = FxHashSet::default();
            let multitry_improvement = perform_refinement_around_parts(
                config,
                pool,
                graph,
                partition,
                boundary,
                lhs,
                rhs,
                &mut touched_blocks,
            );
            overall_improvement += multitry_improvement;

            if multitry_improvement > 0 {
                scheduler.activate_blocks(&touched_blocks);
            }
        }

        scheduler.push_statistics(QgraphEdgeStatistics {
            pair: (lhs, rhs),
            improvement,
            something_changed,
        });

        debug_assert!(boundary.block_count(lhs) > 0);
        debug_assert!(boundary.block_count(rhs) > 0);
        debug_assert!(boundary.block_weight(lhs) > 0);
        debug_assert!(boundary.block_weight(rhs) > 0);
    }

    overall_improvement
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Three triangles bridged into a ring, with the blocks of the first two
    /// bridge endpoints swapped. All vertices have unit weight.
    fn triangle_ring() -> (Graph, Vec<usize>) {
        let edges = [
            (0, 1, 1), (1, 2, 1), (0, 2, 1),
            (3, 4, 1), (4, 5, 1), (3, 5, 1),
            (6, 7, 1), (7, 8, 1), (6, 8, 1),
            (2, 3, 1), (5, 6, 1), (8, 0, 1),
        ];
        let graph = Graph::from_edges(9, &edges, vec![1; 9]);
        let partition = vec![0, 0, 1, 0, 1, 1, 2, 2, 2];
        (graph, partition)
    }

    #[test]
    fn test_simple_scheduler_bank_account_budget() {
        // Arrange
        let config = PartitionConfig {
            k: 3,
            refinement_scheduling_algorithm: RefinementSchedulingAlgorithm::Fast,
            ..Default::default()
        };
        let edges = vec![(0, 1), (1, 2)];
        let mut scheduler = QuotientGraphScheduler::new(&config, edges, 1);
        let (graph, partition) = triangle_ring();
        let boundary = Boundary::build(&graph, &partition, 3);

        // Act and Assert: improvements re-enqueue, but only once in total.
        assert!(!scheduler.has_finished(&boundary));
        let first = scheduler.next();
        scheduler.push_statistics(QgraphEdgeStatistics {
            pair: first,
            improvement: 5,
            something_changed: true,
        });
        let second = scheduler.next();
        scheduler.push_statistics(QgraphEdgeStatistics {
            pair: second,
            improvement: 5,
            something_changed: true,
        });

        // (0, 1) came back, (1, 2) no longer fits the budget
        assert_eq!(scheduler.next(), (0, 1));
        scheduler.push_statistics(QgraphEdgeStatistics {
            pair: (0, 1),
            improvement: 0,
            something_changed: false,
        });
        assert!(scheduler.has_finished(&boundary));
    }

    #[test]
    fn test_active_block_scheduler_rebuilds_rounds() {
        // Arrange
        let config = PartitionConfig { k: 3, ..Default::default() };
        let (graph, partition) = triangle_ring();
        let boundary = Boundary::build(&graph, &partition, 3);
        let edges = boundary.quotient_graph_edges();
        let mut scheduler = QuotientGraphScheduler::new(&config, edges.clone(), 10);

        // Act: drain round one, reporting improvement only on the last pair.
        let mut drained = Vec::new();
        while !scheduler.has_finished(&boundary) {
            let pair = scheduler.next();
            drained.push(pair);
            scheduler.push_statistics(QgraphEdgeStatistics {
                pair,
                improvement: if drained.len() == edges.len() { 1 } else { 0 },
                something_changed: false,
            });
            if drained.len() == edges.len() {
                break;
            }
        }

        // Assert: a second round starts with the pairs touching the
        // re-activated blocks of the last edge.
        let last_pair = *drained.last().unwrap();
        assert!(!scheduler.has_finished(&boundary));
        let revisited = scheduler.next();
        assert!(revisited.0 == last_pair.0
            || revisited.1 == last_pair.0
            || revisited.0 == last_pair.1
            || revisited.1 == last_pair.1);
    }

    #[test]
    fn test_quotient_refinement_untangles_triangle_ring() {
        // Arrange
        let (graph, mut partition) = triangle_ring();
        assert_eq!(graph.edge_cut(&partition), 7);
        let config = PartitionConfig {
            k: 3,
            upper_bound_partition: 5,
            refinement_scheduling_algorithm: RefinementSchedulingAlgorithm::ActiveBlocksRefKway,
            seed: Some(13),
            ..Default::default()
        };
        let pool = rayon::ThreadPoolBuilder::new().num_threads(1).build().unwrap();
        let mut boundary = Boundary::build(&graph, &partition, 3);

        // Act
        let improvement = perform_quotient_graph_refinement(
            &config, &pool, &graph, &mut partition, &mut boundary, None,
        );

        // Assert: the ring settles on its three bridges.
        assert_eq!(improvement, 4);
        assert_eq!(graph.edge_cut(&partition), 3);
        assert_eq!(boundary.total_edge_cut(), 3);
        for block in 0..3 {
            assert_eq!(boundary.block_count(block), 3);
            assert_eq!(boundary.block_weight(block), 3);
        }
    }

    #[test]
    fn test_two_way_collaborator_is_consulted_per_pair() {
        // Arrange: a stub that only records the pairs it was handed.
        struct RecordingRefinement {
            pairs: Vec<(usize, usize)>,
        }
        impl TwoWayRefinement for RecordingRefinement {
            fn perform_refinement(
                &mut self,
                _config: &PartitionConfig,
                _graph: &Graph,
                _partition: &mut [usize],
                _boundary: &mut Boundary,
                lhs: usize,
                rhs: usize,
                lhs_start_nodes: &[usize],
                rhs_start_nodes: &[usize],
                initial_cut: i64,
            ) -> (i64, bool) {
                assert!(!lhs_start_nodes.is_empty());
                assert!(!rhs_start_nodes.is_empty());
                assert!(initial_cut > 0);
                self.pairs.push((lhs, rhs));
                (0, false)
            }
        }

        let (graph, mut partition) = triangle_ring();
        let config = PartitionConfig {
            k: 3,
            upper_bound_partition: 5,
            quotient_graph_two_way_refinement: true,
            ..Default::default()
        };
        let pool = rayon::ThreadPoolBuilder::new().num_threads(1).build().unwrap();
        let mut boundary = Boundary::build(&graph, &partition, 3);
        let mut recorder = RecordingRefinement { pairs: Vec::new() };

        // Act
        perform_quotient_graph_refinement(
            &config, &pool, &graph, &mut partition, &mut boundary, Some(&mut recorder),
        );

        // Assert: every quotient edge was offered to the collaborator once.
        assert_eq!(recorder.pairs, vec![(0, 1), (0, 2), (1, 2)]);
    }
}
