use rayon::prelude::*;
use rustc_hash::FxHashSet;

use crate::graph::Graph;
use crate::imbalance::compute_parts_load;

/// Number of vertices with at least one neighbor in another block.
pub fn boundary_nodes(graph: &Graph, partition: &[usize]) -> usize {
    debug_assert_eq!(graph.len(), partition.len());

    (0..graph.len())
        .into_par_iter()
        .filter(|&vertex| {
            graph
                .neighbors(vertex)
                .any(|(target, _)| partition[target] != partition[vertex])
        })
        .count()
}

/// Communication volume of the heaviest block: for each vertex the number of
/// distinct foreign blocks among its neighbors, summed per block.
pub fn max_communication_volume(graph: &Graph, partition: &[usize], num_parts: usize) -> usize {
    debug_assert_eq!(graph.len(), partition.len());

    let mut volume = vec![0usize; num_parts];
    let mut foreign_blocks = FxHashSet::default();

    for vertex in 0..graph.len() {
        let block = partition[vertex];
        foreign_blocks.clear();
        for (target, _) in graph.neighbors(vertex) {
            if partition[target] != block {
                foreign_blocks.insert(partition[target]);
            }
        }
        volume[block] += foreign_blocks.len();
    }

    volume.into_iter().max().unwrap_or(0)
}

/// Ratio of the heaviest block to the ideal block weight; 1.0 is perfect.
pub fn balance(num_parts: usize, partition: &[usize], weights: &[i64]) -> f64 {
    if num_parts == 0 {
        return 1.0;
    }
    let loads = compute_parts_load(partition, num_parts, weights);
    let total: i64 = loads.iter().sum();
    if total == 0 {
        return 1.0;
    }
    let ideal = total as f64 / num_parts as f64;
    let heaviest = loads.into_iter().max().unwrap_or(0);
    heaviest as f64 / ideal
}

#[cfg(test)]
mod tests {
    use approx::assert_ulps_eq;
    use super::*;

    fn path_graph() -> Graph {
        Graph::from_edges(6, &[(0, 1, 1), (1, 2, 1), (2, 3, 1), (3, 4, 1), (4, 5, 1)], vec![1; 6])
    }

    #[test]
    fn test_boundary_nodes_on_path() {
        // Arrange
        let graph = path_graph();
        let partition = [0, 0, 0, 1, 1, 1];

        // Act
        let count = boundary_nodes(&graph, &partition);

        // Assert
        assert_eq!(count, 2);
    }

    #[test]
    fn test_max_communication_volume() {
        // Arrange: center of the star sees two foreign blocks.
        let graph = Graph::from_edges(4, &[(0, 1, 1), (0, 2, 1), (0, 3, 1)], vec![1; 4]);
        let partition = [0, 0, 1, 2];

        // Act
        let volume = max_communication_volume(&graph, &partition, 3);

        // Assert: block 0 contributes 2 (vertex 0) + 0 (vertex 1).
        assert_eq!(volume, 2);
    }

    #[test]
    fn test_balance_of_even_partition() {
        // Arrange
        let partition = [0, 0, 1, 1];
        let weights = [1i64, 2, 1, 2];

        // Act
        let b = balance(2, &partition, &weights);

        // Assert
        assert_ulps_eq!(b, 1.0);
    }

    #[test]
    fn test_balance_of_skewed_partition() {
        // Arrange
        let partition = [0, 0, 0, 1];
        let weights = [1i64, 1, 1, 1];

        // Act
        let b = balance(2, &partition, &weights);

        // Assert
        assert_ulps_eq!(b, 1.5);
    }
}
