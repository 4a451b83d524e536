// This file has code from https://github.com/LIHPC-Computational-Geometry/coupe

// Calculates the total weight for each part of a given partition.
pub fn compute_parts_load(partition: &[usize], num_parts: usize, weights: &[i64]) -> Vec<i64> {
    debug_assert_eq!(partition.len(), weights.len());

    let mut loads = vec![0; num_parts];

    for (&part, &weight) in partition.iter().zip(weights) {
        if part < num_parts {
            loads[part] += weight;
        }
    }

    loads
}

/// Compute the imbalance of the given partition: the largest relative
/// deviation of a block load from the ideal load.
pub fn imbalance(num_parts: usize, partition: &[usize], weights: &[i64]) -> f64 {
    if num_parts == 0 {
        return 0.0;
    }

    let part_loads = compute_parts_load(partition, num_parts, weights);

    let total_weight: i64 = part_loads.iter().sum();

    let ideal_part_weight = total_weight as f64 / num_parts as f64;
    if ideal_part_weight == 0.0 {
        return 0.0;
    }

    part_loads
        .into_iter()
        .map(|part_weight| (part_weight as f64 - ideal_part_weight) / ideal_part_weight)
        .fold(0.0f64, |acc, dev| acc.max(dev))
}
