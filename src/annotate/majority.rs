//! 過剰クラスタリングに基づく多数決によるラベル平滑化。
use std::collections::BTreeMap;

use tracing::info;

use crate::error::{AnnotateError, Result};

/// クラスタ × 予測ラベルの分割表。
///
/// ラベルは文字列の辞書順で保持し、同数のときは辞書順で先のラベルを多数派とする。
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ContingencyTable {
    counts: BTreeMap<String, BTreeMap<String, usize>>,
}

impl ContingencyTable {
    /// # Errors
    /// 長さが一致しない場合は [`AnnotateError::ClusterLengthMismatch`]。
    pub fn new(labels: &[String], clusters: &[String]) -> Result<Self> {
        if labels.len() != clusters.len() {
            return Err(AnnotateError::ClusterLengthMismatch {
                expected: labels.len(),
                found: clusters.len(),
            });
        }
        let mut counts: BTreeMap<String, BTreeMap<String, usize>> = BTreeMap::new();
        for (label, cluster) in labels.iter().zip(clusters) {
            *counts
                .entry(cluster.clone())
                .or_default()
                .entry(label.clone())
                .or_default() += 1;
        }
        Ok(Self { counts })
    }

    /// 該当するセルの数。
    #[must_use]
    pub fn count(&self, label: &str, cluster: &str) -> usize {
        self.counts
            .get(cluster)
            .and_then(|row| row.get(label))
            .copied()
            .unwrap_or(0)
    }

    #[must_use]
    pub fn clusters(&self) -> impl Iterator<Item = &str> {
        self.counts.keys().map(String::as_str)
    }

    /// クラスタごとの多数派ラベル。
    #[must_use]
    pub fn majority(&self) -> BTreeMap<&str, &str> {
        self.counts
            .iter()
            .filter_map(|(cluster, labels)| {
                let mut best: Option<(&str, usize)> = None;
                for (label, &count) in labels {
                    if best.is_none_or(|(_, best_count)| count > best_count) {
                        best = Some((label.as_str(), count));
                    }
                }
                best.map(|(label, _)| (cluster.as_str(), label))
            })
            .collect()
    }
}

/// 各細胞に所属クラスタの多数派ラベルを割り当てる。
///
/// # Errors
/// `labels` と `clusters` の長さが異なる場合。
pub fn majority_vote(labels: &[String], clusters: &[String]) -> Result<Vec<String>> {
    info!("majority voting");
    let table = ContingencyTable::new(labels, clusters)?;
    let majority = table.majority();
    let voted = clusters
        .iter()
        .map(|cluster| {
            majority
                .get(cluster.as_str())
                .map_or_else(String::new, |label| (*label).to_string())
        })
        .collect();
    info!(clusters = majority.len(), "majority voting done");
    Ok(voted)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn names(values: &[&str]) -> Vec<String> {
        values.iter().map(ToString::to_string).collect()
    }

    #[test]
    fn every_cell_in_a_cluster_gets_the_majority_label() {
        let labels = names(&["T", "T", "B", "B", "B", "NK"]);
        let clusters = names(&["0", "0", "0", "1", "1", "1"]);
        let voted = majority_vote(&labels, &clusters).unwrap();
        assert_eq!(voted, names(&["T", "T", "T", "B", "B", "B"]));
    }

    #[test]
    fn ties_go_to_the_lexicographically_smallest_label() {
        let labels = names(&["T", "B", "NK", "B", "NK"]);
        let clusters = names(&["x", "x", "x", "x", "x"]);
        let voted = majority_vote(&labels, &clusters).unwrap();
        assert!(voted.iter().all(|label| label == "B"));
    }

    #[test]
    fn counts_are_tabulated_per_cluster() {
        let labels = names(&["T", "T", "B"]);
        let clusters = names(&["1", "2", "2"]);
        let table = ContingencyTable::new(&labels, &clusters).unwrap();
        assert_eq!(table.count("T", "1"), 1);
        assert_eq!(table.count("T", "2"), 1);
        assert_eq!(table.count("B", "1"), 0);
        assert_eq!(table.clusters().collect::<Vec<_>>(), vec!["1", "2"]);
    }

    #[test]
    fn length_mismatch_is_an_error() {
        let err = majority_vote(&names(&["A", "B"]), &names(&["0"])).unwrap_err();
        assert!(matches!(
            err,
            AnnotateError::ClusterLengthMismatch {
                expected: 2,
                found: 1
            }
        ));
    }
}
