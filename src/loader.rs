//! Plain-text network descriptions.
//!
//! Values file: one real number per line, the i-th line belonging to peer i.
//! Topology file: one `u v kind` record per line, `kind` being 0 (reliable),
//! 1 (probabilistic) or 2 (delayed). Blank lines and `#` comments are skipped
//! in both.

use std::path::Path;

use crate::{common::error::LoadError, network::Topology};

pub type EdgeRecord = (u32, u32, u8);

fn content_lines(input: &str) -> impl Iterator<Item = (usize, &str)> {
    input
        .lines()
        .enumerate()
        .map(|(i, line)| (i + 1, line.split('#').next().unwrap_or("").trim()))
        .filter(|(_, line)| !line.is_empty())
}

pub fn parse_values(input: &str) -> Result<Vec<f64>, LoadError> {
    content_lines(input)
        .map(|(line, text)| match text.parse::<f64>() {
            Ok(value) if value.is_finite() => Ok(value),
            Ok(_) => Err(LoadError::Malformed {
                line,
                reason: format!("value {text:?} is not finite"),
            }),
            Err(err) => Err(LoadError::Malformed {
                line,
                reason: format!("invalid value {text:?}: {err}"),
            }),
        })
        .collect()
}

pub fn parse_edges(input: &str) -> Result<Vec<EdgeRecord>, LoadError> {
    content_lines(input)
        .map(|(line, text)| {
            let malformed = |reason: String| LoadError::Malformed { line, reason };
            match text.split_whitespace().collect::<Vec<_>>().as_slice() {
                [u, v, kind] => {
                    let u = u.parse::<u32>().map_err(|err| malformed(format!("invalid peer id {u:?}: {err}")))?;
                    let v = v.parse::<u32>().map_err(|err| malformed(format!("invalid peer id {v:?}: {err}")))?;
                    let kind = kind
                        .parse::<u8>()
                        .map_err(|err| malformed(format!("invalid edge kind {kind:?}: {err}")))?;
                    Ok((u, v, kind))
                }
                _ => Err(malformed(format!("expected `u v kind`, got {text:?}"))),
            }
        })
        .collect()
}

fn read(path: &Path) -> Result<String, LoadError> {
    std::fs::read_to_string(path).map_err(|source| LoadError::Io {
        path: path.to_path_buf(),
        source,
    })
}

pub fn load_values(path: impl AsRef<Path>) -> Result<Vec<f64>, LoadError> {
    parse_values(&read(path.as_ref())?)
}

pub fn load_edges(path: impl AsRef<Path>) -> Result<Vec<EdgeRecord>, LoadError> {
    parse_edges(&read(path.as_ref())?)
}

/// Reads both files. The number of values fixes the number of peers.
pub fn load_network(
    values_path: impl AsRef<Path>,
    topology_path: impl AsRef<Path>,
) -> Result<(Topology, Vec<f64>), LoadError> {
    let values = load_values(values_path)?;
    let edges = load_edges(topology_path)?;
    let peer_count = u32::try_from(values.len()).map_err(|_| LoadError::Malformed {
        line: values.len(),
        reason: "too many peers".to_string(),
    })?;
    let topology = Topology::from_records(peer_count, &edges)?;
    Ok((topology, values))
}
