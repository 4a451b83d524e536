// This file has code from https://github.com/LIHPC-Computational-Geometry/coupe
use std::fmt;

mod kway_refinement_core;
mod multitry_kway_fm;
mod quotient_refinement;
mod contraction;

pub use contraction::contract_clustering;
pub use kway_refinement_core::{
    apply_moves, apply_moves_serial, relaxed_move_node, relaxed_move_node_back,
    single_kway_refinement_round, MovedNodes, ThreadData, INVALID_PARTITION,
};
pub use multitry_kway_fm::{
    perform_refinement, perform_refinement_around_parts, MultitryKwayRefinement,
    RefinementMetadata,
};
pub use quotient_refinement::{
    perform_quotient_graph_refinement, QgraphEdgeStatistics, QuotientGraphScheduler,
    TwoWayRefinement,
};

/// Common errors thrown by algorithms.
#[derive(Clone, Copy, Debug)]
#[non_exhaustive]
pub enum Error {
    /// No partition that matches the given criteria could been found.
    NotFound,

    /// Input sets don't have matching lengths.
    InputLenMismatch { expected: usize, actual: usize },

    /// A configuration option is outside its legal range.
    InvalidConfiguration { option: &'static str },
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Error::NotFound => write!(f, "no partition found"),
            Error::InputLenMismatch { expected, actual } => write!(
                f,
                "input sets don't have the same length (expected {expected} items, got {actual})",
            ),
            Error::InvalidConfiguration { option } => {
                write!(f, "configuration option '{option}' is out of range")
            }
        }
    }
}

impl std::error::Error for Error {}
