// Speculative k-way FM local search and the serializing move applier.
//
// Each worker rolls a sequence of moves forward against a thread-local view
// of the partition (single_kway_refinement_round), keeping the best prefix
// per segment. The applier later replays the per-thread logs against the
// real graph and boundary, resolving conflicts between threads with the
// configured strategy.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::{Duration, Instant};

use rand::rngs::SmallRng;
use rand::seq::SliceRandom;
use rand::{Rng, SeedableRng};
use rustc_hash::{FxHashMap, FxHashSet};

use crate::boundary::Boundary;
use crate::config::{ApplyMoveStrategy, PartitionConfig, PermutationQuality};
use crate::graph::Graph;
use crate::hashmap::max_size_to_fit_l1;
use crate::pqueue::RefinementQueue;
use crate::stop_rule::StopRule;

pub const INVALID_PARTITION: usize = usize::MAX;

/// Log sentinel terminating each search segment.
pub const SENTINEL: usize = usize::MAX;
pub const GAIN_SENTINEL: i64 = i64::MIN;

/// Owner id recorded for vertices moved by a conflict-resolution search;
/// such vertices count as moved for every thread.
pub const CONFLICT_RESOLUTION_OWNER: usize = usize::MAX;

/// Vertex -> (owning thread id, original block) for every vertex the applier
/// has committed so far.
pub type MovedNodes = FxHashMap<usize, (usize, usize)>;

/// Thread-local state of one k-way local search worker. Lives for one
/// refinement call; the move log survives until the serial apply phase has
/// replayed it.
pub struct ThreadData {
    pub id: usize,
    pub rnd: SmallRng,
    pub step_limit: usize,

    /// Vertices this worker's searches start from.
    pub start_nodes: Vec<usize>,

    // move log: parallel ordered sequences, one sentinel row per segment
    pub transpositions: Vec<usize>,
    pub from_partitions: Vec<usize>,
    pub to_partitions: Vec<usize>,
    pub gains: Vec<i64>,
    /// Per segment: (index of the best prefix, or -1 for "no improvement",
    /// and the index of the segment's sentinel row).
    pub min_cut_indices: Vec<(isize, usize)>,

    /// Vertices claimed through `moved_idx`; used to reset the shared flags
    /// between global rounds.
    pub moved: Vec<usize>,

    // speculative view of the partition
    nodes_partitions: FxHashMap<usize, usize>,
    pub parts_weights: Vec<i64>,
    pub parts_sizes: Vec<usize>,

    // per-block connectivity scratch for gain computation, reset by stamping
    conn: Vec<i64>,
    conn_round: Vec<u64>,
    round: u64,

    // statistics
    pub accepted_movements: usize,
    pub stop_empty_queue: usize,
    pub stop_stopping_rule: usize,
    pub stop_max_number_of_swaps: usize,
    pub scanned_neighbours: usize,
    pub affected_movements: usize,
    pub transpositions_size: usize,
    pub performed_gain: i64,
    pub unperformed_gain: i64,
    pub time_move_nodes: Duration,
}

impl ThreadData {
    pub fn new(id: usize, k: usize, step_limit: usize, seed: Option<u64>) -> Self {
        let rnd = match seed {
            // distinct streams per worker
            Some(seed) => SmallRng::seed_from_u64(seed.wrapping_add(id as u64)),
            None => SmallRng::from_entropy(),
        };
        Self {
            id,
            rnd,
            step_limit,
            start_nodes: Vec::new(),
            transpositions: Vec::new(),
            from_partitions: Vec::new(),
            to_partitions: Vec::new(),
            gains: Vec::new(),
            min_cut_indices: Vec::new(),
            moved: Vec::new(),
            nodes_partitions: FxHashMap::default(),
            parts_weights: vec![0; k],
            parts_sizes: vec![0; k],
            conn: vec![0; k],
            conn_round: vec![0; k],
            round: 0,
            accepted_movements: 0,
            stop_empty_queue: 0,
            stop_stopping_rule: 0,
            stop_max_number_of_swaps: 0,
            scanned_neighbours: 0,
            affected_movements: 0,
            transpositions_size: 0,
            performed_gain: 0,
            unperformed_gain: 0,
            time_move_nodes: Duration::ZERO,
        }
    }

    /// Snapshot the real block weights and counts into the speculative view.
    pub fn load_block_state(&mut self, boundary: &Boundary) {
        for block in 0..self.parts_weights.len() {
            self.parts_weights[block] = boundary.block_weight(block);
            self.parts_sizes[block] = boundary.block_count(block);
        }
    }

    /// Forget the move log of previous phases.
    pub fn clear_log(&mut self) {
        self.transpositions.clear();
        self.from_partitions.clear();
        self.to_partitions.clear();
        self.gains.clear();
        self.min_cut_indices.clear();
    }

    /// Partition of `node` under the speculative view.
    pub fn local_partition(&self, partition: &[usize], node: usize) -> usize {
        *self.nodes_partitions.get(&node).unwrap_or(&partition[node])
    }

    fn set_local_partition(&mut self, node: usize, block: usize) {
        self.nodes_partitions.insert(node, block);
    }

    /// Gain of moving `node` out of `from` under the speculative view.
    /// Returns (gain, target block, external connectivity of the target);
    /// a vertex without external neighbors yields `INVALID_PARTITION` and 0.
    pub fn compute_gain(
        &mut self,
        graph: &Graph,
        partition: &[usize],
        node: usize,
        from: usize,
    ) -> (i64, usize, i64) {
        self.gain_of(graph, partition, node, from, INVALID_PARTITION, true)
    }

    /// Gain of moving `node` out of `from` against the real partition.
    /// Ties are resolved towards `expected_to` when it is attainable.
    pub fn compute_gain_actual(
        &mut self,
        graph: &Graph,
        partition: &[usize],
        node: usize,
        from: usize,
        expected_to: usize,
    ) -> (i64, usize, i64) {
        self.gain_of(graph, partition, node, from, expected_to, false)
    }

    fn gain_of(
        &mut self,
        graph: &Graph,
        partition: &[usize],
        node: usize,
        from: usize,
        expected_to: usize,
        local_view: bool,
    ) -> (i64, usize, i64) {
        self.round += 1;
        let round = self.round;

        let mut internal = 0i64;
        let mut max_conn = 0i64;
        let mut max_gainer = INVALID_PARTITION;

        for (target, edge_weight) in graph.neighbors(node) {
            let block = if local_view {
                self.local_partition(partition, target)
            } else {
                partition[target]
            };
            if block == from {
                internal += edge_weight;
                continue;
            }
            let connectivity = if self.conn_round[block] == round {
                self.conn[block] + edge_weight
            } else {
                edge_weight
            };
            self.conn[block] = connectivity;
            self.conn_round[block] = round;

            if connectivity > max_conn
                || (connectivity == max_conn && block != max_gainer && self.rnd.gen::<bool>())
            {
                max_conn = connectivity;
                max_gainer = block;
            }
        }

        if max_gainer == INVALID_PARTITION {
            return (0, INVALID_PARTITION, 0);
        }

        if expected_to != INVALID_PARTITION
            && expected_to != from
            && self.conn_round[expected_to] == round
            && self.conn[expected_to] == max_conn
        {
            max_gainer = expected_to;
        }

        (max_conn - internal, max_gainer, max_conn)
    }

    fn push_sentinel(&mut self) {
        self.transpositions.push(SENTINEL);
        self.from_partitions.push(SENTINEL);
        self.to_partitions.push(SENTINEL);
        self.gains.push(GAIN_SENTINEL);
    }
}

/// One speculative roll-forward/roll-back pass over this worker's start
/// nodes. Appends a sentinel-terminated segment to the move log and returns
/// (cut improvement of the best prefix, its log index, movements spent).
pub fn single_kway_refinement_round(
    td: &mut ThreadData,
    graph: &Graph,
    partition: &[usize],
    moved_idx: &[AtomicBool],
    num_threads_finished: &AtomicUsize,
    config: &PartitionConfig,
) -> (i64, isize, u32) {
    let mut queue = RefinementQueue::new(config.use_bucket_queues, graph.max_degree());
    init_queue_with_boundary(td, graph, partition, moved_idx, &mut queue, config);

    let previously_moved = td.transpositions.len() as isize;

    if queue.is_empty() {
        td.push_sentinel();
        td.min_cut_indices.push((-1, td.transpositions.len() - 1));
        return (0, -1, 0);
    }

    let max_number_of_swaps = if config.max_number_of_moves != -1 {
        config.max_number_of_moves as usize
    } else {
        graph.len()
    };

    // only deltas matter, so start from a large dummy cut
    let cut_start = i64::MAX / 2;
    let mut cut = cut_start;
    let initial_cut = cut;
    let mut best_cut = cut;
    let mut number_of_swaps: usize = 0;
    let mut movements: u32 = 0;

    let mut stopping_rule = StopRule::new(config, graph.len());

    // minus 1 for the previous segment's sentinel
    let mut min_cut_index = previously_moved - 1;

    while (movements as usize) < max_number_of_swaps {
        if queue.is_empty() {
            td.stop_empty_queue += 1;
            break;
        }

        if num_threads_finished.load(Ordering::Relaxed) > 0 {
            break;
        }

        let local_min_cut_index = (min_cut_index - previously_moved).max(0) as usize;
        if stopping_rule.search_should_stop(local_min_cut_index, number_of_swaps, td.step_limit) {
            td.stop_stopping_rule += 1;
            break;
        }

        let gain = queue.max_value();
        let node = queue.delete_max();
        let from = td.local_partition(partition, node);

        let (successful, to) =
            local_move_node(td, graph, partition, moved_idx, &mut queue, node, from, gain, config);

        if successful {
            td.accepted_movements += 1;
            cut -= gain;
            stopping_rule.push_statistics(gain);

            let accept_equal = td.rnd.gen::<bool>();
            if cut < best_cut || (cut == best_cut && accept_equal) {
                if cut < best_cut {
                    stopping_rule.reset_statistics();
                }
                best_cut = cut;
                min_cut_index = previously_moved + number_of_swaps as isize;
            }
            td.from_partitions.push(from);
            td.to_partitions.push(to);
            td.transpositions.push(node);
            td.gains.push(gain);
            number_of_swaps += 1;

            debug_assert!(min_cut_index < td.transpositions.len() as isize);
        }
        movements += 1;
    }

    if movements as usize == max_number_of_swaps {
        td.stop_max_number_of_swaps += 1;
    }

    let unrolled_moves = unroll_moves(td, graph, min_cut_index);
    td.accepted_movements -= unrolled_moves;
    td.nodes_partitions.clear();

    td.push_sentinel();
    td.min_cut_indices.push((min_cut_index, td.transpositions.len() - 1));

    (initial_cut - best_cut, min_cut_index, movements)
}

fn init_queue_with_boundary(
    td: &mut ThreadData,
    graph: &Graph,
    partition: &[usize],
    moved_idx: &[AtomicBool],
    queue: &mut RefinementQueue,
    config: &PartitionConfig,
) {
    match config.permutation_during_refinement {
        PermutationQuality::Fast => {
            // one pass of random swaps
            let len = td.start_nodes.len();
            for i in 0..len {
                let j = td.rnd.gen_range(0..len);
                td.start_nodes.swap(i, j);
            }
        }
        PermutationQuality::Good => {
            let ThreadData { start_nodes, rnd, .. } = td;
            start_nodes.shuffle(rnd);
        }
    }

    for i in 0..td.start_nodes.len() {
        let node = td.start_nodes[i];
        if moved_idx[node]
            .compare_exchange(false, true, Ordering::Relaxed, Ordering::Relaxed)
            .is_ok()
        {
            let from = td.local_partition(partition, node);
            let (gain, _max_gainer, ext_degree) = td.compute_gain(graph, partition, node, from);
            if ext_degree > 0 {
                queue.insert(node, gain);
            }
            td.moved.push(node);
        }
    }
}

/// Apply one move to the speculative view. Fails when the source block would
/// run empty or the target block would reach the weight bound.
#[allow(clippy::too_many_arguments)]
fn local_move_node(
    td: &mut ThreadData,
    graph: &Graph,
    partition: &[usize],
    moved_idx: &[AtomicBool],
    queue: &mut RefinementQueue,
    node: usize,
    from: usize,
    queued_gain: i64,
    config: &PartitionConfig,
) -> (bool, usize) {
    let (expected_gain, to, _ext_degree) = td.compute_gain(graph, partition, node, from);
    debug_assert_eq!(expected_gain, queued_gain);
    debug_assert_ne!(to, INVALID_PARTITION);

    let node_weight = graph.node_weight(node);

    if td.parts_sizes[from] == 1 {
        return (false, to);
    }

    let part_weight = td.parts_weights[to];
    if part_weight + node_weight >= config.upper_bound_partition {
        return (false, to);
    }
    td.parts_weights[to] = part_weight + node_weight;

    td.set_local_partition(node, to);
    td.parts_weights[from] -= node_weight;
    td.parts_sizes[to] += 1;
    td.parts_sizes[from] -= 1;

    // refresh the gains of the neighborhood under the updated local view
    for (target, _edge_weight) in graph.neighbors(node) {
        td.scanned_neighbours += 1;

        if queue.contains(target) {
            let target_from = td.local_partition(partition, target);
            let (gain, _to, ext_degree) = td.compute_gain(graph, partition, target, target_from);
            debug_assert!(moved_idx[target].load(Ordering::Relaxed));
            if ext_degree > 0 {
                queue.change_key(target, gain);
            } else {
                queue.delete_node(target);
            }
        } else {
            // a set flag means the target was already consumed by a search
            if moved_idx[target].load(Ordering::Relaxed) {
                continue;
            }

            let target_from = td.local_partition(partition, target);
            let (gain, _to, ext_degree) = td.compute_gain(graph, partition, target, target_from);

            if ext_degree > 0
                && moved_idx[target]
                    .compare_exchange(false, true, Ordering::Relaxed, Ordering::Relaxed)
                    .is_ok()
            {
                queue.insert(target, gain);
                td.moved.push(target);
            }
        }
    }

    (true, to)
}

/// Reverse one speculative move's weight and size bookkeeping.
fn local_move_back_node(td: &mut ThreadData, graph: &Graph, node: usize, from: usize, to: usize) {
    let node_weight = graph.node_weight(node);
    td.parts_weights[from] += node_weight;
    td.parts_weights[to] -= node_weight;
    td.parts_sizes[to] -= 1;
    td.parts_sizes[from] += 1;
}

/// Roll the tail of the log beyond `min_cut_index` back out of the
/// speculative view. The log itself is preserved for the apply phase.
pub fn unroll_moves(td: &mut ThreadData, graph: &Graph, min_cut_index: isize) -> usize {
    let keep = (min_cut_index + 1) as usize;
    let mut unrolled_moves = 0;
    while keep + unrolled_moves < td.transpositions.len() {
        let index = td.transpositions.len() - 1 - unrolled_moves;
        let node = td.transpositions[index];
        let from = td.from_partitions[index];
        let to = td.to_partitions[index];
        local_move_back_node(td, graph, node, from, to);
        unrolled_moves += 1;
    }
    unrolled_moves
}

/// Move a vertex on the real graph, with the same weight and count gates as
/// the speculative move. Keeps the boundary index consistent.
pub fn relaxed_move_node(
    graph: &Graph,
    partition: &mut [usize],
    boundary: &mut Boundary,
    node: usize,
    from: usize,
    to: usize,
    config: &PartitionConfig,
) -> bool {
    debug_assert_eq!(partition[node], from);

    let node_weight = graph.node_weight(node);

    if boundary.block_weight(to) + node_weight >= config.upper_bound_partition {
        return false;
    }

    // assure that no block accidentally runs empty
    if boundary.block_count(from) == 1 {
        return false;
    }

    partition[node] = to;
    boundary.post_moved_boundary_node_updates(graph, partition, node, from, to);

    boundary.set_block_count(from, boundary.block_count(from) - 1);
    boundary.set_block_count(to, boundary.block_count(to) + 1);
    boundary.set_block_weight(from, boundary.block_weight(from) - node_weight);
    boundary.set_block_weight(to, boundary.block_weight(to) + node_weight);

    true
}

/// Exact inverse of `relaxed_move_node`.
pub fn relaxed_move_node_back(
    graph: &Graph,
    partition: &mut [usize],
    boundary: &mut Boundary,
    node: usize,
    from: usize,
    to: usize,
) {
    debug_assert_eq!(partition[node], to);

    partition[node] = from;
    boundary.post_moved_boundary_node_updates(graph, partition, node, to, from);

    let node_weight = graph.node_weight(node);
    boundary.set_block_count(from, boundary.block_count(from) + 1);
    boundary.set_block_count(to, boundary.block_count(to) - 1);
    boundary.set_block_weight(from, boundary.block_weight(from) + node_weight);
    boundary.set_block_weight(to, boundary.block_weight(to) - node_weight);
}

/// Replay one thread's log against the real graph without conflict tracking.
/// Used when speculation is decoupled, i.e. on the single-thread path.
pub fn apply_moves_serial(
    td: &mut ThreadData,
    graph: &Graph,
    partition: &mut [usize],
    boundary: &mut Boundary,
    config: &PartitionConfig,
    touched_blocks: Option<&mut FxHashSet<usize>>,
) -> i64 {
    let clock = Instant::now();
    debug_assert_eq!(td.transpositions.len(), td.from_partitions.len());
    debug_assert_eq!(td.transpositions.len(), td.to_partitions.len());
    debug_assert_eq!(td.transpositions.len(), td.gains.len());
    td.transpositions_size += td.transpositions.len();

    let mut touched_blocks = touched_blocks;
    let mut cut_improvement = 0i64;
    let mut total_expected_gain = 0i64;

    // moves applied since the last committed best prefix
    let mut pending_transpositions: Vec<usize> = Vec::new();
    let mut pending_from: Vec<usize> = Vec::new();
    let mut pending_gains: Vec<i64> = Vec::new();

    let mut segment = 0;
    let mut index = 0;
    while index < td.transpositions.len() {
        let (min_cut_index, next_index) = td.min_cut_indices[segment];
        segment += 1;

        if min_cut_index < 0 {
            index = next_index + 1;
            continue;
        }
        let min_cut_index = min_cut_index as usize;

        let mut best_total_gain = 0i64;
        let mut total_gain = 0i64;
        pending_transpositions.clear();
        pending_from.clear();
        pending_gains.clear();

        while index <= min_cut_index {
            let node = td.transpositions[index];
            let expected_from = td.from_partitions[index];
            let expected_to = td.to_partitions[index];
            let expected_gain = td.gains[index];

            let from = partition[node];
            let (gain, to, _ext_degree) =
                td.compute_gain_actual(graph, partition, node, from, expected_to);

            let same_move = expected_from == from && expected_to == to && expected_gain == gain;
            if !same_move {
                td.affected_movements += 1;
            }

            if to == INVALID_PARTITION {
                index += 1;
                continue;
            }

            total_expected_gain += expected_gain;

            if relaxed_move_node(graph, partition, boundary, node, from, to, config) {
                pending_transpositions.push(node);
                pending_from.push(from);
                pending_gains.push(gain);

                if let Some(touched) = touched_blocks.as_deref_mut() {
                    touched.insert(from);
                    touched.insert(to);
                }

                cut_improvement += gain;
                total_gain += gain;

                if total_gain > best_total_gain
                    || (total_gain == best_total_gain && (td.rnd.gen::<bool>() || same_move))
                {
                    best_total_gain = total_gain;
                    // everything up to here is committed
                    pending_transpositions.clear();
                    pending_from.clear();
                    pending_gains.clear();
                }
            }
            index += 1;
        }

        // drop the applied tail past the best prefix
        for i in (0..pending_transpositions.len()).rev() {
            let node = pending_transpositions[i];
            let from = pending_from[i];
            let to = partition[node];
            cut_improvement -= pending_gains[i];
            relaxed_move_node_back(graph, partition, boundary, node, from, to);
        }

        index = next_index + 1;
    }

    td.time_move_nodes += clock.elapsed();
    td.unperformed_gain += total_expected_gain - cut_improvement;
    td.performed_gain += cut_improvement;
    cut_improvement
}

pub fn is_moved(moved_nodes: &MovedNodes, node: usize, thread_id: usize) -> bool {
    moved_nodes
        .get(&node)
        .map_or(false, |entry| entry.0 != thread_id)
}

/// Replay one thread's log against the real graph, aborting segments on
/// speculation conflicts with other threads and dispatching the configured
/// conflict strategy on the aborted tail.
#[allow(clippy::too_many_arguments)]
pub fn apply_moves(
    td: &mut ThreadData,
    graph: &Graph,
    partition: &mut [usize],
    boundary: &mut Boundary,
    config: &PartitionConfig,
    moved_nodes: &mut MovedNodes,
    touched_blocks: Option<&mut FxHashSet<usize>>,
    reactivated_vertices: &mut Vec<usize>,
) -> i64 {
    let clock = Instant::now();
    debug_assert_eq!(td.transpositions.len(), td.from_partitions.len());
    debug_assert_eq!(td.transpositions.len(), td.to_partitions.len());
    debug_assert_eq!(td.transpositions.len(), td.gains.len());
    td.transpositions_size += td.transpositions.len();

    let mut touched_blocks = touched_blocks;
    let mut cut_improvement = 0i64;
    let mut total_expected_gain = 0i64;

    // vertices which should have been moved but were not; their presence can
    // invalidate the logged gains of their neighbors
    let mut not_moved: FxHashSet<usize> = FxHashSet::default();

    let mut segment = 0;
    let mut index = 0;
    while index < td.transpositions.len() {
        let (min_cut_index, next_index) = td.min_cut_indices[segment];
        segment += 1;

        if min_cut_index < 0 {
            index = next_index + 1;
            continue;
        }
        let min_cut_index = min_cut_index as usize;

        let start_index = index;
        let mut best_cut_index = start_index as isize - 1;
        let mut best_total_gain = 0i64;
        let mut total_gain = 0i64;

        while index <= min_cut_index {
            let node = td.transpositions[index];
            let from = td.from_partitions[index];
            let to = td.to_partitions[index];
            let gain = td.gains[index];

            // another thread owns this vertex
            if is_moved(moved_nodes, node, td.id) {
                let strategy_gain = apply_move_strategy_for_conflict(
                    td,
                    graph,
                    partition,
                    boundary,
                    config,
                    moved_nodes,
                    &mut not_moved,
                    touched_blocks.as_deref_mut(),
                    reactivated_vertices,
                    best_cut_index,
                    index,
                    min_cut_index,
                    next_index,
                    &mut cut_improvement,
                );
                cut_improvement += strategy_gain;
                break;
            }

            // a neighbor moved by another thread, or held back by this one,
            // invalidates the logged gain whenever either block matches
            let mut no_move = false;
            for (target, _edge_weight) in graph.neighbors(node) {
                let target_partition = partition[target];
                let target_not_moved = not_moved.contains(&target);
                if is_moved(moved_nodes, target, td.id) || target_not_moved {
                    let prev_target_partition = moved_nodes.get(&target).map(|entry| entry.1);
                    if target_not_moved
                        || target_partition == to
                        || target_partition == from
                        || prev_target_partition == Some(to)
                        || prev_target_partition == Some(from)
                    {
                        no_move = true;
                        break;
                    }
                }
            }
            if no_move {
                let strategy_gain = apply_move_strategy_for_conflict(
                    td,
                    graph,
                    partition,
                    boundary,
                    config,
                    moved_nodes,
                    &mut not_moved,
                    touched_blocks.as_deref_mut(),
                    reactivated_vertices,
                    best_cut_index,
                    index,
                    min_cut_index,
                    next_index,
                    &mut cut_improvement,
                );
                cut_improvement += strategy_gain;
                break;
            }

            total_expected_gain += gain;

            if relaxed_move_node(graph, partition, boundary, node, from, to, config) {
                moved_nodes.insert(node, (td.id, from));

                if let Some(touched) = touched_blocks.as_deref_mut() {
                    touched.insert(from);
                    touched.insert(to);
                }

                if config.apply_move_strategy == ApplyMoveStrategy::ReactiveVertices
                    && config.kway_all_boundary_nodes_refinement
                {
                    reactivated_vertices.push(node);
                    for (target, _) in graph.neighbors(node) {
                        reactivated_vertices.push(target);
                    }
                }

                cut_improvement += gain;
                total_gain += gain;

                if total_gain > best_total_gain
                    || (total_gain == best_total_gain && td.rnd.gen::<bool>())
                {
                    best_total_gain = total_gain;
                    best_cut_index = index as isize;
                }
            } else {
                let strategy_gain = apply_move_strategy_for_conflict(
                    td,
                    graph,
                    partition,
                    boundary,
                    config,
                    moved_nodes,
                    &mut not_moved,
                    touched_blocks.as_deref_mut(),
                    reactivated_vertices,
                    best_cut_index,
                    index,
                    min_cut_index,
                    next_index,
                    &mut cut_improvement,
                );
                cut_improvement += strategy_gain;
                break;
            }
            index += 1;
        }

        index = next_index + 1;
    }

    td.time_move_nodes += clock.elapsed();
    td.unperformed_gain += total_expected_gain - cut_improvement;
    td.performed_gain += cut_improvement;
    cut_improvement
}

/// Unroll this segment's applied tail down to the best prefix, mark the
/// unapplied remainder as `not_moved`, then dispatch the configured strategy.
/// Returns the improvement attributed to the strategy.
#[allow(clippy::too_many_arguments)]
fn apply_move_strategy_for_conflict(
    td: &mut ThreadData,
    graph: &Graph,
    partition: &mut [usize],
    boundary: &mut Boundary,
    config: &PartitionConfig,
    moved_nodes: &mut MovedNodes,
    not_moved: &mut FxHashSet<usize>,
    touched_blocks: Option<&mut FxHashSet<usize>>,
    reactivated_vertices: &mut Vec<usize>,
    best_cut_index: isize,
    index: usize,
    min_cut_index: usize,
    next_index: usize,
    cut_improvement: &mut i64,
) -> i64 {
    let resume_index = (best_cut_index + 1) as usize;
    unroll_relaxed_moves(td, graph, partition, boundary, moved_nodes, resume_index, index, cut_improvement);

    for i in resume_index..=min_cut_index {
        not_moved.insert(td.transpositions[i]);
    }

    match config.apply_move_strategy {
        ApplyMoveStrategy::LocalSearch => {
            // restart from the conflicting vertex with the work amount the
            // aborted tail would have spent
            let start_node = td.transpositions[resume_index];
            let budget = next_index - resume_index;
            let (gain, _movements) = local_search_from_one_node(
                td,
                graph,
                partition,
                boundary,
                config,
                moved_nodes,
                start_node,
                budget,
                touched_blocks,
            );
            gain
        }
        ApplyMoveStrategy::GainRecalculation => {
            let (gain, _movements) = gain_recalculation(
                td,
                graph,
                partition,
                boundary,
                config,
                moved_nodes,
                resume_index,
                next_index,
                touched_blocks,
            );
            gain
        }
        ApplyMoveStrategy::ReactiveVertices => {
            let start_node = td.transpositions[resume_index];
            reactivated_vertices.push(start_node);
            for (target, _) in graph.neighbors(start_node) {
                reactivated_vertices.push(target);
            }
            0
        }
        ApplyMoveStrategy::Skip => 0,
    }
}

/// Undo the applied log rows [start, end), erasing their ownership records
/// and subtracting their gains from the running improvement.
fn unroll_relaxed_moves(
    td: &ThreadData,
    graph: &Graph,
    partition: &mut [usize],
    boundary: &mut Boundary,
    moved_nodes: &mut MovedNodes,
    start: usize,
    end: usize,
    cut_improvement: &mut i64,
) {
    for index in (start..end).rev() {
        let node = td.transpositions[index];
        let from = td.from_partitions[index];
        let to = td.to_partitions[index];
        *cut_improvement -= td.gains[index];
        moved_nodes.remove(&node);
        relaxed_move_node_back(graph, partition, boundary, node, from, to);
    }
}

/// Fresh FM search on the real graph, started from a single conflict vertex.
/// Kept moves are recorded in `moved_nodes` under the sentinel owner id.
#[allow(clippy::too_many_arguments)]
pub fn local_search_from_one_node(
    td: &mut ThreadData,
    graph: &Graph,
    partition: &mut [usize],
    boundary: &mut Boundary,
    config: &PartitionConfig,
    moved_nodes: &mut MovedNodes,
    start_node: usize,
    max_number_of_swaps: usize,
    touched_blocks: Option<&mut FxHashSet<usize>>,
) -> (i64, u32) {
    // increasing number of swaps for better quality
    let max_number_of_swaps = 2 * max_number_of_swaps + 100;

    let mut queue = RefinementQueue::new(config.use_bucket_queues, graph.max_degree());

    let from = partition[start_node];
    let (gain, _max_gainer, ext_degree) =
        td.compute_gain_actual(graph, partition, start_node, from, INVALID_PARTITION);

    // node is not a border node
    if ext_degree == 0 {
        return (0, 0);
    }
    queue.insert(start_node, gain);

    let cut_start = i64::MAX / 2;
    let mut cut = cut_start;
    let initial_cut = cut;
    let mut best_cut = cut;
    let mut number_of_swaps: isize = 0;
    let mut movements: u32 = 0;
    let mut min_cut_index: isize = -1;

    let mut stopping_rule = StopRule::new(config, graph.len());

    let capacity = max_size_to_fit_l1::<usize, ()>().min(max_number_of_swaps.next_power_of_two());
    let mut moved_by_local_search: FxHashSet<usize> =
        FxHashSet::with_capacity_and_hasher(capacity, Default::default());
    moved_by_local_search.insert(start_node);

    let mut transpositions: Vec<usize> = Vec::new();
    let mut from_partitions: Vec<usize> = Vec::new();
    let mut to_partitions: Vec<usize> = Vec::new();

    while (movements as usize) < max_number_of_swaps {
        if queue.is_empty() {
            break;
        }
        if stopping_rule.search_should_stop(
            min_cut_index.max(0) as usize,
            number_of_swaps as usize,
            td.step_limit,
        ) {
            break;
        }

        let gain = queue.max_value();
        let node = queue.delete_max();
        let from = partition[node];

        let successful = move_node(
            td,
            graph,
            partition,
            boundary,
            config,
            &mut moved_by_local_search,
            &mut queue,
            node,
        );

        if successful {
            cut -= gain;
            stopping_rule.push_statistics(gain);

            let accept_equal = td.rnd.gen::<bool>();
            if cut < best_cut || (cut == best_cut && accept_equal) {
                if cut < best_cut {
                    stopping_rule.reset_statistics();
                }
                best_cut = cut;
                min_cut_index = number_of_swaps;
            }

            from_partitions.push(from);
            to_partitions.push(partition[node]);
            transpositions.push(node);
            number_of_swaps += 1;
        }
        movements += 1;
    }

    // roll backwards
    while number_of_swaps - 1 > min_cut_index {
        let node = transpositions.pop().unwrap();
        let to = to_partitions.pop().unwrap();
        let from = from_partitions.pop().unwrap();
        relaxed_move_node_back(graph, partition, boundary, node, from, to);
        number_of_swaps -= 1;
    }

    debug_assert_eq!(transpositions.len(), from_partitions.len());
    for i in 0..transpositions.len() {
        // the vertex counts as moved for every thread from now on
        moved_nodes.insert(transpositions[i], (CONFLICT_RESOLUTION_OWNER, from_partitions[i]));
    }

    if let Some(touched) = touched_blocks {
        debug_assert_eq!(from_partitions.len(), to_partitions.len());
        for i in 0..from_partitions.len() {
            touched.insert(from_partitions[i]);
            touched.insert(to_partitions[i]);
        }
    }

    (initial_cut - best_cut, movements)
}

/// Move a vertex to its best block on the real graph and refresh the gains
/// of its neighborhood in the queue.
fn move_node(
    td: &mut ThreadData,
    graph: &Graph,
    partition: &mut [usize],
    boundary: &mut Boundary,
    config: &PartitionConfig,
    moved: &mut FxHashSet<usize>,
    queue: &mut RefinementQueue,
    node: usize,
) -> bool {
    let from = partition[node];
    let (_gain, to, _ext_degree) =
        td.compute_gain_actual(graph, partition, node, from, INVALID_PARTITION);
    debug_assert_ne!(to, INVALID_PARTITION);

    if !relaxed_move_node(graph, partition, boundary, node, from, to, config) {
        return false;
    }

    // the boundaries have already been updated
    for (target, _edge_weight) in graph.neighbors(node) {
        let target_from = partition[target];
        let (gain, _to, ext_degree) =
            td.compute_gain_actual(graph, partition, target, target_from, INVALID_PARTITION);

        if queue.contains(target) {
            debug_assert!(moved.contains(&target));
            if ext_degree > 0 {
                queue.change_key(target, gain);
            } else {
                queue.delete_node(target);
            }
        } else if ext_degree > 0 && !moved.contains(&target) {
            queue.insert(target, gain);
            moved.insert(target);
        }
    }

    true
}

/// Re-examine an aborted tail with freshly computed gains, applying the best
/// prefix of the recomputed sequence.
#[allow(clippy::too_many_arguments)]
pub fn gain_recalculation(
    td: &mut ThreadData,
    graph: &Graph,
    partition: &mut [usize],
    boundary: &mut Boundary,
    config: &PartitionConfig,
    moved_nodes: &mut MovedNodes,
    start: usize,
    end: usize,
    touched_blocks: Option<&mut FxHashSet<usize>>,
) -> (i64, u32) {
    let mut best_gain_index: isize = -1;
    let mut total_gain = 0i64;
    let mut best_total_gain = 0i64;

    let mut transpositions: Vec<usize> = Vec::with_capacity(end - start);
    let mut from_partitions: Vec<usize> = Vec::with_capacity(end - start);
    let mut to_partitions: Vec<usize> = Vec::with_capacity(end - start);

    let mut num_moves: isize = 0;
    for index in start..end {
        let node = td.transpositions[index];

        let from = partition[node];
        let (gain, to, _ext_degree) =
            td.compute_gain_actual(graph, partition, node, from, INVALID_PARTITION);

        if to == INVALID_PARTITION {
            continue;
        }

        if relaxed_move_node(graph, partition, boundary, node, from, to, config) {
            total_gain += gain;
            let accept_equal = td.rnd.gen::<bool>();
            if total_gain > best_total_gain || (total_gain == best_total_gain && accept_equal) {
                best_total_gain = total_gain;
                best_gain_index = num_moves;
            }

            transpositions.push(node);
            from_partitions.push(from);
            to_partitions.push(to);
            num_moves += 1;
        }
    }

    while num_moves - 1 > best_gain_index {
        let node = transpositions.pop().unwrap();
        let to = to_partitions.pop().unwrap();
        let from = from_partitions.pop().unwrap();
        relaxed_move_node_back(graph, partition, boundary, node, from, to);
        num_moves -= 1;
    }

    debug_assert_eq!(transpositions.len(), from_partitions.len());
    for i in 0..transpositions.len() {
        // the vertex counts as moved for every thread from now on
        moved_nodes.insert(transpositions[i], (CONFLICT_RESOLUTION_OWNER, from_partitions[i]));
    }

    if let Some(touched) = touched_blocks {
        for i in 0..from_partitions.len() {
            touched.insert(from_partitions[i]);
            touched.insert(to_partitions[i]);
        }
    }

    (best_total_gain, (end - start) as u32)
}
