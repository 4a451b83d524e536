use crate::config::{KwayStopRule, PartitionConfig};

/// Stopping rule of a k-way local search. Consumes the stream of accepted
/// move gains and decides when rolling further forward is no longer worth it.
///
/// `search_should_stop` takes the index of the best prefix so far, the number
/// of accepted moves so far and the configured step limit; statistics are
/// reset whenever the search finds a new strictly better cut.
pub enum StopRule {
    Simple(SimpleStopRule),
    Adaptive(AdaptiveStopRule),
    ChernoffAdaptive(ChernoffAdaptiveStopRule),
}

impl StopRule {
    pub fn new(config: &PartitionConfig, num_nodes: usize) -> Self {
        match config.kway_stop_rule {
            KwayStopRule::Simple => StopRule::Simple(SimpleStopRule),
            KwayStopRule::Adaptive => StopRule::Adaptive(AdaptiveStopRule::new(
                config.kway_adaptive_limits_alpha,
                (num_nodes.max(2) as f64).ln(),
            )),
            KwayStopRule::ChernoffAdaptive => {
                StopRule::ChernoffAdaptive(ChernoffAdaptiveStopRule::new(config))
            }
        }
    }

    pub fn search_should_stop(
        &mut self,
        min_cut_index: usize,
        number_of_swaps: usize,
        step_limit: usize,
    ) -> bool {
        match self {
            StopRule::Simple(rule) => rule.search_should_stop(min_cut_index, number_of_swaps, step_limit),
            StopRule::Adaptive(rule) => rule.search_should_stop(),
            StopRule::ChernoffAdaptive(rule) => rule.search_should_stop(min_cut_index, number_of_swaps),
        }
    }

    pub fn push_statistics(&mut self, gain: i64) {
        match self {
            StopRule::Simple(_) => {}
            StopRule::Adaptive(rule) => rule.push_statistics(gain),
            StopRule::ChernoffAdaptive(rule) => rule.push_statistics(gain),
        }
    }

    pub fn reset_statistics(&mut self) {
        match self {
            StopRule::Simple(_) => {}
            StopRule::Adaptive(rule) => rule.reset_statistics(),
            StopRule::ChernoffAdaptive(rule) => rule.reset_statistics(),
        }
    }
}

/// Stop once a fixed number of moves passed without improving the best cut.
pub struct SimpleStopRule;

impl SimpleStopRule {
    fn search_should_stop(&self, min_cut_index: usize, number_of_swaps: usize, step_limit: usize) -> bool {
        number_of_swaps - min_cut_index > step_limit
    }
}

/// Stop when the variance-based estimate of further improvement falls below
/// the threshold: p * mu^2 > alpha * sigma^2 + beta, with p the number of
/// moves since the statistics were last reset and beta = ln n.
pub struct AdaptiveStopRule {
    alpha: f64,
    beta: f64,
    steps: usize,
    expected_gain: f64,
    sum_squared_deviations: f64,
}

impl AdaptiveStopRule {
    fn new(alpha: f64, beta: f64) -> Self {
        Self {
            alpha,
            beta,
            steps: 0,
            expected_gain: 0.0,
            sum_squared_deviations: 0.0,
        }
    }

    fn search_should_stop(&self) -> bool {
        if self.steps <= 1 {
            return false;
        }
        let variance = self.sum_squared_deviations / (self.steps - 1) as f64;
        self.steps as f64 * self.expected_gain * self.expected_gain
            > self.alpha * variance + self.beta
    }

    fn push_statistics(&mut self, gain: i64) {
        // Welford's online mean and variance
        self.steps += 1;
        let gain = gain as f64;
        let delta = gain - self.expected_gain;
        self.expected_gain += delta / self.steps as f64;
        self.sum_squared_deviations += delta * (gain - self.expected_gain);
    }

    fn reset_statistics(&mut self) {
        self.steps = 0;
        self.expected_gain = 0.0;
        self.sum_squared_deviations = 0.0;
    }
}

/// Stop when a Chernoff-style tail bound on the probability of recovering a
/// positive total gain drops below the configured probability. The step
/// limit is tuned by a fixed number of gradient-descent iterations against
/// that bound and clamped to the configured window.
pub struct ChernoffAdaptiveStopRule {
    stop_probability: f64,
    descent_num_steps: usize,
    descent_step_size: f64,
    min_step_limit: usize,
    max_step_limit: usize,
    steps: usize,
    expected_gain: f64,
    sum_squared_deviations: f64,
    max_abs_gain: f64,
    tuned_step_limit: f64,
}

impl ChernoffAdaptiveStopRule {
    fn new(config: &PartitionConfig) -> Self {
        Self {
            stop_probability: config.chernoff_stop_probability,
            descent_num_steps: config.chernoff_gradient_descent_num_steps,
            descent_step_size: config.chernoff_gradient_descent_step_size,
            min_step_limit: config.chernoff_min_step_limit,
            max_step_limit: config.chernoff_max_step_limit,
            steps: 0,
            expected_gain: 0.0,
            sum_squared_deviations: 0.0,
            max_abs_gain: 0.0,
            tuned_step_limit: config.chernoff_max_step_limit as f64,
        }
    }

    fn search_should_stop(&mut self, min_cut_index: usize, number_of_swaps: usize) -> bool {
        if self.steps <= 1 || self.expected_gain >= 0.0 {
            return false;
        }
        self.tune_step_limit();
        let since_best = number_of_swaps - min_cut_index;
        since_best > self.tuned_step_limit.round() as usize
    }

    fn push_statistics(&mut self, gain: i64) {
        self.steps += 1;
        let gain = gain as f64;
        let delta = gain - self.expected_gain;
        self.expected_gain += delta / self.steps as f64;
        self.sum_squared_deviations += delta * (gain - self.expected_gain);
        self.max_abs_gain = self.max_abs_gain.max(gain.abs());
    }

    fn reset_statistics(&mut self) {
        self.steps = 0;
        self.expected_gain = 0.0;
        self.sum_squared_deviations = 0.0;
        self.max_abs_gain = 0.0;
        self.tuned_step_limit = self.max_step_limit as f64;
    }

    /// Bernstein-style bound on the probability that a run of `t` further
    /// moves with the observed gain distribution sums to something positive.
    fn tail_bound(&self, t: f64) -> f64 {
        let variance = self.sum_squared_deviations / (self.steps - 1) as f64;
        let mu = self.expected_gain;
        let denominator = 2.0 * variance + (2.0 / 3.0) * self.max_abs_gain * mu.abs();
        if denominator <= 0.0 {
            return 0.0;
        }
        (-t * mu * mu / denominator).exp()
    }

    /// Descend on (bound(t) - p)^2 to find the step budget at which further
    /// search stops paying off.
    fn tune_step_limit(&mut self) {
        let mut t = self.tuned_step_limit;
        for _ in 0..self.descent_num_steps {
            let bound = self.tail_bound(t);
            let variance = self.sum_squared_deviations / (self.steps - 1) as f64;
            let mu = self.expected_gain;
            let denominator = 2.0 * variance + (2.0 / 3.0) * self.max_abs_gain * mu.abs();
            if denominator <= 0.0 {
                t = self.min_step_limit as f64;
                break;
            }
            let derivative = 2.0 * (bound - self.stop_probability) * bound * (-mu * mu / denominator);
            t -= self.descent_step_size * derivative;
            t = t.clamp(self.min_step_limit as f64, self.max_step_limit as f64);
        }
        self.tuned_step_limit = t.clamp(self.min_step_limit as f64, self.max_step_limit as f64);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{KwayStopRule, PartitionConfig};

    #[test]
    fn test_simple_rule_stops_after_step_limit() {
        // Arrange
        let config = PartitionConfig::default();
        let mut rule = StopRule::new(&config, 100);

        // Act and Assert
        assert!(!rule.search_should_stop(0, 15, 15));
        assert!(rule.search_should_stop(0, 16, 15));
        assert!(!rule.search_should_stop(10, 20, 15));
    }

    #[test]
    fn test_adaptive_rule_stops_on_consistent_losses() {
        // Arrange
        let config = PartitionConfig {
            kway_stop_rule: KwayStopRule::Adaptive,
            ..Default::default()
        };
        let mut rule = StopRule::new(&config, 100);

        // Act: a long run of identical negative gains has zero variance.
        let mut stopped = false;
        for _ in 0..100 {
            rule.push_statistics(-3);
            if rule.search_should_stop(0, 0, 0) {
                stopped = true;
                break;
            }
        }

        // Assert
        assert!(stopped);
    }

    #[test]
    fn test_adaptive_rule_keeps_going_on_improvements() {
        // Arrange
        let config = PartitionConfig {
            kway_stop_rule: KwayStopRule::Adaptive,
            ..Default::default()
        };
        let mut rule = StopRule::new(&config, 100);

        // Act: high-variance stream centered near zero
        for gain in [5i64, -5, 4, -4, 6, -6, 5, -5] {
            rule.push_statistics(gain);
        }

        // Assert
        assert!(!rule.search_should_stop(0, 8, 0));
    }

    #[test]
    fn test_adaptive_reset_clears_statistics() {
        // Arrange
        let config = PartitionConfig {
            kway_stop_rule: KwayStopRule::Adaptive,
            ..Default::default()
        };
        let mut rule = StopRule::new(&config, 100);
        for _ in 0..50 {
            rule.push_statistics(-3);
        }

        // Act
        rule.reset_statistics();

        // Assert: one fresh sample is never enough to stop.
        rule.push_statistics(-3);
        assert!(!rule.search_should_stop(0, 1, 0));
    }

    #[test]
    fn test_chernoff_rule_respects_clamp_window() {
        // Arrange
        let config = PartitionConfig {
            kway_stop_rule: KwayStopRule::ChernoffAdaptive,
            chernoff_min_step_limit: 5,
            chernoff_max_step_limit: 20,
            ..Default::default()
        };
        let mut rule = StopRule::new(&config, 100);
        for _ in 0..30 {
            rule.push_statistics(-2);
        }

        // Act: far past the widest possible window the rule must fire,
        // inside the narrowest it must not.
        let stops_beyond_max = rule.search_should_stop(0, 21, 0);
        let stops_below_min = rule.search_should_stop(0, 4, 0);

        // Assert
        assert!(stops_beyond_max);
        assert!(!stops_below_min);
    }

    #[test]
    fn test_chernoff_rule_never_stops_while_gaining() {
        // Arrange
        let config = PartitionConfig {
            kway_stop_rule: KwayStopRule::ChernoffAdaptive,
            ..Default::default()
        };
        let mut rule = StopRule::new(&config, 100);
        for _ in 0..50 {
            rule.push_statistics(1);
        }

        // Act and Assert
        assert!(!rule.search_should_stop(0, 1000, 0));
    }
}
