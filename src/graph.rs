// This file has code from https://github.com/LIHPC-Computational-Geometry/coupe

use rayon::iter::IndexedParallelIterator;
use rayon::iter::ParallelIterator as _;
use rayon::prelude::IntoParallelRefIterator;
use std::iter::{Cloned, Zip};
use std::slice::Iter;
use ::sprs::{CsMat, TriMat};

/// Struct that represents an undirected vertex- and edge-weighted graph.
///
/// Each undirected edge is stored twice, once per direction. The CsMat (from
/// sprs) stores the adjacency as a sparse matrix in CSR format; vertex
/// weights live in a parallel array.
pub struct Graph {
    /// The adjacency structure with edge weights as values.
    pub graph_csr: CsMat<i64>,
    /// The weight of each vertex.
    pub node_weights: Vec<i64>,
    /// Largest weighted vertex degree, i.e. the maximum over all vertices of
    /// the sum of incident edge weights. Bounds the gain of any single move.
    max_degree: i64,
}

impl Graph {
    /// Create an empty graph.
    pub fn new() -> Self {
        Self {
            graph_csr: CsMat::empty(sprs::CSR, 0),
            node_weights: Vec::new(),
            max_degree: 0,
        }
    }

    /// Build a graph from a list of undirected edges; both directions are
    /// inserted. `edges` entries are `(vertex, vertex, edge_weight)`.
    pub fn from_edges(num_nodes: usize, edges: &[(usize, usize, i64)], node_weights: Vec<i64>) -> Self {
        debug_assert_eq!(num_nodes, node_weights.len());

        let mut triplets = TriMat::with_capacity((num_nodes, num_nodes), 2 * edges.len());
        for &(vertex1, vertex2, edge_weight) in edges {
            triplets.add_triplet(vertex1, vertex2, edge_weight);
            triplets.add_triplet(vertex2, vertex1, edge_weight);
        }

        let mut graph = Self {
            graph_csr: triplets.to_csr(),
            node_weights,
            max_degree: 0,
        };
        graph.max_degree = graph.compute_max_degree();
        graph
    }

    /// Build a graph directly from CSR storage. The caller guarantees that
    /// every undirected edge appears in both directions.
    pub fn from_csr(graph_csr: CsMat<i64>, node_weights: Vec<i64>) -> Self {
        debug_assert_eq!(graph_csr.rows(), node_weights.len());
        let mut graph = Self { graph_csr, node_weights, max_degree: 0 };
        graph.max_degree = graph.compute_max_degree();
        graph
    }

    /// The number of vertices in the graph.
    pub fn len(&self) -> usize {
        debug_assert_eq!(self.graph_csr.rows(), self.graph_csr.cols());
        self.graph_csr.rows()
    }

    /// Whether the graph has no vertices.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// The number of stored half-edges (twice the undirected edge count).
    pub fn number_of_edges(&self) -> usize {
        self.graph_csr.nnz()
    }

    /// The weight of the given vertex.
    pub fn node_weight(&self, vertex: usize) -> i64 {
        self.node_weights[vertex]
    }

    /// Sum of all vertex weights.
    pub fn total_node_weight(&self) -> i64 {
        self.node_weights.iter().sum()
    }

    /// The number of neighbors of the given vertex.
    pub fn degree(&self, vertex: usize) -> usize {
        self.graph_csr.outer_view(vertex).map_or(0, |row| row.nnz())
    }

    /// Largest weighted vertex degree.
    pub fn max_degree(&self) -> i64 {
        self.max_degree
    }

    /// An iterator over the neighbors of the given vertex and the weights of
    /// the connecting edges.
    pub fn neighbors(&self, vertex: usize) -> Zip<Cloned<Iter<'_, usize>>, Cloned<Iter<'_, i64>>> {
        let (indices, data) = self.graph_csr.outer_view(vertex).unwrap().into_raw_storage();
        indices.iter().cloned().zip(data.iter().cloned())
    }

    /// Insert an edge with two vertices on either ends. Intended for small
    /// hand-built graphs (the caller inserts both directions); large graphs
    /// should use `from_edges`.
    pub fn insert(&mut self, vertex1: usize, vertex2: usize, edge_weight: i64) {
        self.graph_csr.insert(vertex1, vertex2, edge_weight);
        // the matrix may be momentarily non-square until the reverse
        // direction arrives, so size off the larger dimension
        let num_nodes = self.graph_csr.rows().max(self.graph_csr.cols());
        while self.node_weights.len() < num_nodes {
            self.node_weights.push(1);
        }
        let weighted_degree: i64 = self
            .graph_csr
            .outer_view(vertex1)
            .map_or(0, |row| row.iter().map(|(_, weight)| *weight).sum());
        self.max_degree = self.max_degree.max(weighted_degree);
    }

    /// Get edge weight for a pair of vertices.
    pub fn get_edge_weight(&self, vertex1: usize, vertex2: usize) -> Option<i64> {
        self.graph_csr.get(vertex1, vertex2).cloned()
    }

    /// The edge cut of a partition: the total weight of the edges that link
    /// vertices of different parts. Each undirected edge is counted once.
    pub fn edge_cut(&self, partition: &[usize]) -> i64 {
        debug_assert_eq!(self.len(), partition.len());

        let indptr = self.graph_csr.indptr().into_raw_storage();
        let indices = self.graph_csr.indices();
        let data = self.graph_csr.data();
        indptr
            .par_iter()
            .zip(&indptr[1..])
            .enumerate()
            .map(|(vertex, (start, end))| {
                let neighbors = &indices[*start..*end];
                let edge_weights = &data[*start..*end];
                let vertex_part = partition[vertex];
                neighbors
                    .iter()
                    .zip(edge_weights)
                    .take_while(|(neighbor, _edge_weight)| **neighbor < vertex)
                    .filter(|(neighbor, _edge_weight)| vertex_part != partition[**neighbor])
                    .map(|(_neighbor, edge_weight)| *edge_weight)
                    .sum::<i64>()
            })
            .sum()
    }

    fn compute_max_degree(&self) -> i64 {
        (0..self.len())
            .map(|vertex| self.neighbors(vertex).map(|(_, w)| w).sum())
            .max()
            .unwrap_or(0)
    }

    /// Clone the graph.
    pub fn clone(&self) -> Self {
        Self {
            graph_csr: self.graph_csr.clone(),
            node_weights: self.node_weights.clone(),
            max_degree: self.max_degree,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_from_edges_stores_both_directions() {
        // Arrange
        let edges = [(0, 1, 2), (1, 2, 3)];

        // Act
        let graph = Graph::from_edges(3, &edges, vec![1, 1, 1]);

        // Assert
        assert_eq!(graph.len(), 3);
        assert_eq!(graph.number_of_edges(), 4);
        assert_eq!(graph.get_edge_weight(0, 1), Some(2));
        assert_eq!(graph.get_edge_weight(1, 0), Some(2));
        assert_eq!(graph.get_edge_weight(2, 1), Some(3));
    }

    #[test]
    fn test_max_degree_is_weighted() {
        // Arrange
        let edges = [(0, 1, 2), (1, 2, 3), (0, 2, 1)];

        // Act
        let graph = Graph::from_edges(3, &edges, vec![1, 1, 1]);

        // Assert: vertex 1 carries 2 + 3 = 5.
        assert_eq!(graph.max_degree(), 5);
    }

    #[test]
    fn test_edge_cut_counts_each_edge_once() {
        // Arrange
        let edges = [(0, 1, 1), (1, 2, 4), (2, 3, 1)];
        let graph = Graph::from_edges(4, &edges, vec![1; 4]);
        let partition = [0, 0, 1, 1];

        // Act
        let cut = graph.edge_cut(&partition);

        // Assert
        assert_eq!(cut, 4);
    }

    #[test]
    fn test_neighbors_yields_targets_and_weights() {
        // Arrange
        let edges = [(0, 1, 2), (0, 2, 7)];
        let graph = Graph::from_edges(3, &edges, vec![1, 1, 1]);

        // Act
        let neighbors: Vec<(usize, i64)> = graph.neighbors(0).collect();

        // Assert
        assert_eq!(neighbors, vec![(1, 2), (2, 7)]);
    }

    #[test]
    fn test_insert_grows_hand_built_graph() {
        // Arrange
        let mut graph = Graph::new();

        // Act
        graph.insert(0, 1, 5);
        graph.insert(1, 0, 5);
        graph.insert(1, 2, 2);
        graph.insert(2, 1, 2);

        // Assert
        assert_eq!(graph.len(), 3);
        assert_eq!(graph.get_edge_weight(0, 1), Some(5));
        assert_eq!(graph.max_degree(), 7);
    }

    #[test]
    fn test_total_node_weight() {
        // Arrange
        let graph = Graph::from_edges(3, &[(0, 1, 1)], vec![2, 3, 4]);

        // Act and Assert
        assert_eq!(graph.total_node_weight(), 9);
    }
}
