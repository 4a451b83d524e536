use std::fs::File;
use std::io::{BufRead, BufReader, Error, ErrorKind, Write};
use std::path::Path;
use sprs::TriMat;

use crate::graph::Graph;

/// Read a graph in METIS format.
///
/// The header line holds `n m [fmt]`; `fmt` 1 carries edge weights, 10 node
/// weights and 11 both. Adjacency lines are 1-indexed and list each
/// undirected edge from both endpoints. Comment lines start with '%'.
pub fn read_metis_graph(file_path: &Path) -> Result<Graph, Error> {
    let file = File::open(file_path)?;
    let reader = BufReader::new(file);
    let mut lines = reader
        .lines()
        .filter(|line| !matches!(line, Ok(content) if content.trim_start().starts_with('%')));

    let header = lines
        .next()
        .ok_or_else(|| invalid_data("empty graph file"))??;
    let mut header_fields = header.split_whitespace();
    let num_nodes: usize = parse_field(header_fields.next(), "number of nodes")?;
    let num_edges: usize = parse_field(header_fields.next(), "number of edges")?;
    let format: u32 = match header_fields.next() {
        Some(field) => field.parse().map_err(|_| invalid_data("malformed format field"))?,
        None => 0,
    };
    let has_edge_weights = format % 10 == 1;
    let has_node_weights = format / 10 == 1;

    let mut node_weights = Vec::with_capacity(num_nodes);
    let mut triplets = TriMat::with_capacity((num_nodes, num_nodes), 2 * num_edges);

    for vertex in 0..num_nodes {
        let line = lines
            .next()
            .ok_or_else(|| invalid_data("fewer adjacency lines than the header announces"))??;
        let mut fields = line.split_whitespace();

        if has_node_weights {
            let weight: i64 = parse_field(fields.next(), "node weight")?;
            node_weights.push(weight);
        } else {
            node_weights.push(1);
        }

        while let Some(field) = fields.next() {
            let target: usize = field
                .parse()
                .map_err(|_| invalid_data("malformed edge target"))?;
            if target == 0 || target > num_nodes {
                return Err(invalid_data("edge target out of range"));
            }
            let edge_weight: i64 = if has_edge_weights {
                parse_field(fields.next(), "edge weight")?
            } else {
                1
            };
            triplets.add_triplet(vertex, target - 1, edge_weight);
        }
    }

    Ok(Graph::from_csr(triplets.to_csr(), node_weights))
}

/// Read a partition file: one block id per vertex, one per line.
pub fn read_partition_file(file_path: &Path, num_nodes: usize) -> Result<Vec<usize>, Error> {
    let file = File::open(file_path)?;
    let reader = BufReader::new(file);
    let mut partition = Vec::with_capacity(num_nodes);

    for line in reader.lines() {
        let line = line?;
        let content = line.trim();
        if content.is_empty() {
            continue;
        }
        let block: usize = content
            .parse()
            .map_err(|_| invalid_data("malformed partition id"))?;
        partition.push(block);
    }

    if partition.len() != num_nodes {
        return Err(invalid_data("partition file length does not match the graph"));
    }
    Ok(partition)
}

/// Write the partition array to a file, one block id per vertex per line.
pub fn write_partition_data_to_file(partition: &[usize], file_name: &str) -> Result<(), Error> {
    let mut file = File::create(file_name)?;
    for &block in partition {
        writeln!(file, "{}", block)?;
    }
    Ok(())
}

fn parse_field<T: std::str::FromStr>(field: Option<&str>, what: &str) -> Result<T, Error> {
    field
        .ok_or_else(|| invalid_data(&format!("missing {}", what)))?
        .parse()
        .map_err(|_| invalid_data(&format!("malformed {}", what)))
}

fn invalid_data(message: &str) -> Error {
    Error::new(ErrorKind::InvalidData, message.to_string())
}

#[cfg(test)]
mod tests {
    use std::fs::File;
    use std::io::Write;
    use std::path::Path;
    use tempfile::tempdir;
    use super::*;

    fn create_mock_file(dir: &Path, filename: &str, content: &str) -> String {
        let file_path = dir.join(filename);
        let mut file = File::create(&file_path).unwrap();
        file.write_all(content.as_bytes()).unwrap();
        file_path.to_str().unwrap().to_string()
    }

    #[test]
    fn test_read_unweighted_metis_graph() -> Result<(), Error> {
        let temp_dir = tempdir()?;

        let content = "\
% a path on three vertices
3 2
2
1 3
2";
        let path = create_mock_file(temp_dir.path(), "path.graph", content);

        let graph = read_metis_graph(Path::new(&path))?;

        assert_eq!(graph.len(), 3);
        assert_eq!(graph.number_of_edges(), 4);
        assert_eq!(graph.get_edge_weight(1, 2), Some(1));
        assert_eq!(graph.node_weight(0), 1);
        Ok(())
    }

    #[test]
    fn test_read_fully_weighted_metis_graph() -> Result<(), Error> {
        let temp_dir = tempdir()?;

        let content = "\
3 2 11
4 2 3
5 1 3 3 2
6 2 2";
        let path = create_mock_file(temp_dir.path(), "weighted.graph", content);

        let graph = read_metis_graph(Path::new(&path))?;

        assert_eq!(graph.node_weights, vec![4, 5, 6]);
        assert_eq!(graph.get_edge_weight(0, 1), Some(3));
        assert_eq!(graph.get_edge_weight(1, 2), Some(2));
        Ok(())
    }

    #[test]
    fn test_read_rejects_out_of_range_target() {
        let temp_dir = tempdir().unwrap();

        let content = "\
2 1
2
5";
        let path = create_mock_file(temp_dir.path(), "broken.graph", content);

        let result = read_metis_graph(Path::new(&path));

        assert!(result.is_err());
    }

    #[test]
    fn test_partition_file_round_trip() -> Result<(), Error> {
        let temp_dir = tempdir()?;
        let file_path = temp_dir.path().join("partition.txt");
        let partition = [0usize, 1, 1, 0];

        write_partition_data_to_file(&partition, file_path.to_str().unwrap())?;
        let read_back = read_partition_file(&file_path, 4)?;

        assert_eq!(read_back, vec![0, 1, 1, 0]);
        Ok(())
    }
}
