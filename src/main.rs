use std::env;
use std::path::Path;
use std::time::Instant;
use KwayFM::algorithms::perform_quotient_graph_refinement;
use KwayFM::boundary::Boundary;
use KwayFM::config::{PartitionConfig, RefinementSchedulingAlgorithm};
use KwayFM::imbalance::imbalance;
use KwayFM::io::{read_metis_graph, read_partition_file, write_partition_data_to_file};
use KwayFM::metrics::{balance, boundary_nodes, max_communication_volume};

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args: Vec<String> = env::args().collect();
    if args.len() < 3 {
        eprintln!("usage: {} <graph file> <k> [num_threads] [partition file]", args[0]);
        std::process::exit(1);
    }

    let graph = read_metis_graph(Path::new(&args[1]))?;
    let k: usize = args[2].parse()?;
    let num_threads: usize = if args.len() > 3 { args[3].parse()? } else { 1 };

    let mut config = PartitionConfig {
        k,
        num_threads,
        refinement_scheduling_algorithm: RefinementSchedulingAlgorithm::ActiveBlocksRefKway,
        ..Default::default()
    };
    config.set_upper_bound_from_imbalance(graph.total_node_weight());
    config.validate()?;

    let mut partition = if args.len() > 4 {
        read_partition_file(Path::new(&args[4]), graph.len())?
    } else {
        balanced_chunk_partition(&graph, k)
    };

    let pool = rayon::ThreadPoolBuilder::new().num_threads(num_threads).build()?;
    let mut boundary = Boundary::build(&graph, &partition, k);

    let start = Instant::now();
    let improvement =
        perform_quotient_graph_refinement(&config, &pool, &graph, &mut partition, &mut boundary, None);
    let elapsed_time = start.elapsed();

    println!("cut_improvement {:?}", improvement);
    println!("edge_cut {:?}", graph.edge_cut(&partition));
    println!("boundary_nodes {:?}", boundary_nodes(&graph, &partition));
    println!("balance {:?}", balance(k, &partition, &graph.node_weights));
    println!("imbalance {:?}", imbalance(k, &partition, &graph.node_weights));
    println!(
        "max_communication_volume {:?}",
        max_communication_volume(&graph, &partition, k)
    );
    println!("refinement time {:?}", elapsed_time);

    write_partition_data_to_file(&partition, &format!("tmppartition{}", k))?;
    Ok(())
}

// Contiguous chunks of roughly equal weight stand in for a real initial
// partitioning when no partition file is given.
fn balanced_chunk_partition(graph: &KwayFM::graph::Graph, k: usize) -> Vec<usize> {
    let total_weight = graph.total_node_weight();
    let target = (total_weight as f64 / k as f64).ceil() as i64;

    let mut partition = vec![0; graph.len()];
    let mut block = 0;
    let mut block_weight = 0;
    for vertex in 0..graph.len() {
        if block_weight >= target && block + 1 < k {
            block += 1;
            block_weight = 0;
        }
        partition[vertex] = block;
        block_weight += graph.node_weight(vertex);
    }
    partition
}
