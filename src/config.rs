use crate::algorithms::Error;

/// Which stopping rule terminates a k-way local search.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KwayStopRule {
    /// Stop after a fixed number of moves without improvement.
    Simple,
    /// Stop when the variance-based estimate of the expected improvement
    /// drops below the adaptive threshold.
    Adaptive,
    /// Stop when a Chernoff-style tail bound says further improvement is
    /// unlikely; the step limit is tuned by gradient descent.
    ChernoffAdaptive,
}

/// How the move applier resolves a speculation conflict between threads.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ApplyMoveStrategy {
    /// Restart a local search from the conflicting vertex against the real
    /// graph, with a budget derived from the aborted segment.
    LocalSearch,
    /// Re-examine the aborted tail with freshly computed gains.
    GainRecalculation,
    /// Hand the conflicting vertex and its neighborhood back to the caller
    /// for reactivation in a later round.
    ReactiveVertices,
    /// Drop the aborted tail.
    Skip,
}

/// Quality of the start-node permutation applied before a local search.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PermutationQuality {
    Fast,
    Good,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RefinementSchedulingAlgorithm {
    /// Round-robin over the quotient edges with a bank-account budget.
    Fast,
    /// Keep refining pairs touching an active block until no block is active.
    ActiveBlocks,
    /// Active blocks plus the k-way multitry pass around each pair.
    ActiveBlocksRefKway,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RefinementType {
    Fm,
    Flow,
    FmFlow,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MatchingType {
    Clustering,
}

/// Configuration of the refinement engine.
///
/// Every option mirrors a command-line switch of the partitioner driver; the
/// defaults are the driver's defaults.
#[derive(Debug, Clone)]
pub struct PartitionConfig {
    /// Number of blocks.
    pub k: usize,

    /// Hard cap on the weight of any block. A move whose target block would
    /// reach this bound is rejected.
    pub upper_bound_partition: i64,

    /// Allowed imbalance epsilon, in percent. Only used to derive
    /// `upper_bound_partition` when the caller does not set it explicitly.
    pub imbalance: f64,

    /// Number of worker threads of the refinement session.
    pub num_threads: usize,

    /// Core to pin the main thread to. Recorded for compatibility with the
    /// driver's option set; pinning itself is not performed.
    pub main_core: usize,

    /// Search budget per local round; -1 means the number of nodes.
    pub max_number_of_moves: i64,

    pub kway_stop_rule: KwayStopRule,

    /// Coefficient of the adaptive stopping rule.
    pub kway_adaptive_limits_alpha: f64,

    pub chernoff_stop_probability: f64,
    pub chernoff_gradient_descent_num_steps: usize,
    pub chernoff_gradient_descent_step_size: f64,
    pub chernoff_min_step_limit: usize,
    pub chernoff_max_step_limit: usize,

    pub apply_move_strategy: ApplyMoveStrategy,

    /// Select the bucket priority queue instead of the binary heap.
    pub use_bucket_queues: bool,

    pub permutation_during_refinement: PermutationQuality,

    pub refinement_scheduling_algorithm: RefinementSchedulingAlgorithm,

    pub refinement_type: RefinementType,

    /// Run the pairwise 2-way refinement pass inside the quotient loop.
    pub quotient_graph_two_way_refinement: bool,

    /// Seed local searches with every boundary vertex instead of the
    /// boundary of the scheduled pair only.
    pub kway_all_boundary_nodes_refinement: bool,

    /// Multiplier applied to the number of quotient edges to obtain the
    /// scheduler's re-enqueue budget.
    pub bank_account_factor: f64,

    pub matching_type: MatchingType,

    /// Use the hash-table-based cluster contraction.
    pub fast_contract_clustering: bool,

    /// Number of global multitry rounds per refinement call.
    pub global_multitry_rounds: usize,

    /// Multiplier on `step_limit` for the localized multitry searches.
    pub local_multitry_fm_alpha: f64,

    /// Base step limit handed to the stopping rules.
    pub step_limit: usize,

    /// Seed for the per-thread random sources; `None` draws from entropy.
    pub seed: Option<u64>,
}

impl Default for PartitionConfig {
    fn default() -> Self {
        PartitionConfig {
            k: 2,
            upper_bound_partition: i64::MAX,
            imbalance: 3.0,
            num_threads: 1,
            main_core: 0,
            max_number_of_moves: -1,
            kway_stop_rule: KwayStopRule::Simple,
            kway_adaptive_limits_alpha: 10.0,
            chernoff_stop_probability: 0.1,
            chernoff_gradient_descent_num_steps: 10,
            chernoff_gradient_descent_step_size: 0.1,
            chernoff_min_step_limit: 10,
            chernoff_max_step_limit: 100,
            apply_move_strategy: ApplyMoveStrategy::Skip,
            use_bucket_queues: false,
            permutation_during_refinement: PermutationQuality::Fast,
            refinement_scheduling_algorithm: RefinementSchedulingAlgorithm::ActiveBlocks,
            refinement_type: RefinementType::Fm,
            quotient_graph_two_way_refinement: false,
            kway_all_boundary_nodes_refinement: false,
            bank_account_factor: 1.5,
            matching_type: MatchingType::Clustering,
            fast_contract_clustering: true,
            global_multitry_rounds: 1,
            local_multitry_fm_alpha: 1.0,
            step_limit: 15,
            seed: None,
        }
    }
}

impl PartitionConfig {
    /// Derive the hard block-weight bound from the total node weight and the
    /// configured imbalance epsilon.
    pub fn set_upper_bound_from_imbalance(&mut self, total_node_weight: i64) {
        let avg = total_node_weight as f64 / self.k as f64;
        self.upper_bound_partition = ((1.0 + self.imbalance / 100.0) * avg).ceil() as i64;
    }

    /// Check the configuration for values outside their legal range.
    /// Out-of-range options are fatal before any refinement starts.
    pub fn validate(&self) -> Result<(), Error> {
        if self.k < 2 {
            return Err(Error::InvalidConfiguration { option: "k" });
        }
        if self.upper_bound_partition <= 0 {
            return Err(Error::InvalidConfiguration { option: "upper_bound_partition" });
        }
        if self.num_threads == 0 {
            return Err(Error::InvalidConfiguration { option: "num_threads" });
        }
        if self.imbalance < 0.0 {
            return Err(Error::InvalidConfiguration { option: "imbalance" });
        }
        if self.max_number_of_moves < -1 {
            return Err(Error::InvalidConfiguration { option: "max_number_of_moves" });
        }
        if !(self.chernoff_stop_probability > 0.0 && self.chernoff_stop_probability < 1.0) {
            return Err(Error::InvalidConfiguration { option: "chernoff_stop_probability" });
        }
        if self.chernoff_min_step_limit > self.chernoff_max_step_limit {
            return Err(Error::InvalidConfiguration { option: "chernoff_min_step_limit" });
        }
        if self.bank_account_factor < 0.0 {
            return Err(Error::InvalidConfiguration { option: "bank_account_factor" });
        }
        if self.local_multitry_fm_alpha <= 0.0 {
            return Err(Error::InvalidConfiguration { option: "local_multitry_fm_alpha" });
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_is_valid() {
        // Arrange
        let config = PartitionConfig::default();

        // Act and Assert
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_validate_rejects_degenerate_k() {
        // Arrange
        let config = PartitionConfig { k: 1, ..Default::default() };

        // Act
        let result = config.validate();

        // Assert
        assert!(matches!(result, Err(Error::InvalidConfiguration { option: "k" })));
    }

    #[test]
    fn test_validate_rejects_bad_chernoff_probability() {
        // Arrange
        let config = PartitionConfig { chernoff_stop_probability: 1.5, ..Default::default() };

        // Act
        let result = config.validate();

        // Assert
        assert!(result.is_err());
    }

    #[test]
    fn test_upper_bound_from_imbalance() {
        // Arrange
        let mut config = PartitionConfig { k: 4, imbalance: 3.0, ..Default::default() };

        // Act
        config.set_upper_bound_from_imbalance(400);

        // Assert
        assert_eq!(config.upper_bound_partition, 103);
    }
}
