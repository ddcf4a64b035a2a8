//! 多数決の入力となる過剰クラスタリング（over-clustering）。
//!
//! 生物学的なクラスタよりも細かい分割を再現可能な形で作ることだけが責務。
//! 既定実装はシード固定の K-Means で、近傍グラフがあれば特徴量を 1 ステップ平滑化してから分割する。
use ndarray::{Array1, Array2, ArrayView2, Axis};
use rustc_hash::FxHashMap;
use sprs::CsMat;
use tracing::info;

pub mod kmeans;

use kmeans::KMeans;

use crate::data::ExpressionMatrix;
use crate::error::{AnnotateError, Result};

/// スケーリング後の値の上限。
const MAX_SCALED_VALUE: f64 = 10.0;

/// 細胞数に応じた既定の解像度。
#[must_use]
pub fn default_resolution(n_cells: usize) -> f64 {
    if n_cells < 5_000 {
        5.0
    } else if n_cells < 20_000 {
        10.0
    } else if n_cells < 40_000 {
        15.0
    } else {
        20.0
    }
}

/// 細胞 × 細胞の接続重み（CSR）。
#[derive(Debug, Clone)]
pub struct NeighborGraph {
    connectivities: CsMat<f64>,
}

impl NeighborGraph {
    /// # Errors
    /// `n_cells` × `n_cells` でない場合は [`AnnotateError::GraphShapeMismatch`]。
    pub fn new(connectivities: CsMat<f64>, n_cells: usize) -> Result<Self> {
        let (rows, cols) = connectivities.shape();
        if rows != n_cells || cols != n_cells {
            return Err(AnnotateError::GraphShapeMismatch {
                expected: n_cells,
                rows,
                cols,
            });
        }
        let connectivities = if connectivities.is_csr() {
            connectivities
        } else {
            connectivities.to_other_storage()
        };
        Ok(Self { connectivities })
    }

    #[must_use]
    pub fn n_cells(&self) -> usize {
        self.connectivities.rows()
    }

    /// 自己ループを加えた行正規化重み `D⁻¹(A + I)` で特徴量を平均化する。
    fn smooth(&self, features: ArrayView2<'_, f64>) -> Array2<f64> {
        let mut smoothed = features.to_owned();
        for (i, row) in self.connectivities.outer_iterator().enumerate() {
            let mut acc = features.row(i).to_owned();
            let mut total = 1.0;
            for (j, &weight) in row.iter() {
                if j == i || weight <= 0.0 {
                    continue;
                }
                acc.scaled_add(weight, &features.row(j));
                total += weight;
            }
            smoothed.row_mut(i).assign(&(acc / total));
        }
        smoothed
    }
}

/// 過剰クラスタリングの実装。
pub trait OverClusterer {
    /// 細胞ごとのクラスタ ID（入力の細胞順）を返す。
    ///
    /// # Errors
    /// 近傍グラフの形状が行列と一致しない場合など。
    fn over_cluster(
        &self,
        matrix: &ExpressionMatrix,
        graph: Option<&NeighborGraph>,
        resolution: f64,
    ) -> Result<Vec<String>>;
}

/// 変動の大きい遺伝子に絞ってスケーリングし、シード固定の K-Means で分割する。
#[derive(Debug, Clone)]
pub struct KMeansOverClusterer {
    /// 発現細胞数がこれ未満の遺伝子は除く。
    pub min_cells: usize,
    pub n_top_genes: usize,
    /// 解像度 1 あたりのクラスタ数。
    pub clusters_per_resolution: f64,
    pub max_iterations: usize,
    pub seed: u64,
}

impl Default for KMeansOverClusterer {
    fn default() -> Self {
        Self {
            min_cells: 5,
            n_top_genes: 500,
            clusters_per_resolution: 10.0,
            max_iterations: 50,
            seed: 0,
        }
    }
}

impl KMeansOverClusterer {
    /// 解像度から求めるクラスタ数。
    #[must_use]
    pub fn cluster_count(&self, resolution: f64, n_cells: usize) -> usize {
        let k = (resolution * self.clusters_per_resolution).round();
        if k.is_finite() && k >= 1.0 {
            (k as usize).min(n_cells.max(1))
        } else {
            1
        }
    }

    fn select_genes(&self, matrix: &ExpressionMatrix) -> Vec<usize> {
        let detected = matrix.gene_detection_counts();
        let mut candidates: Vec<usize> = (0..matrix.n_genes())
            .filter(|&j| detected[j] >= self.min_cells)
            .collect();
        if candidates.is_empty() {
            candidates = (0..matrix.n_genes()).collect();
        }

        let all_variances = matrix.gene_variances();
        let variances: Vec<f64> = candidates.iter().map(|&j| all_variances[j]).collect();
        let mut order: Vec<usize> = (0..candidates.len()).collect();
        order.sort_by(|&a, &b| variances[b].total_cmp(&variances[a]).then(a.cmp(&b)));
        let mut selected: Vec<usize> = order
            .into_iter()
            .take(self.n_top_genes.max(1))
            .map(|idx| candidates[idx])
            .collect();
        selected.sort_unstable();
        selected
    }
}

impl OverClusterer for KMeansOverClusterer {
    fn over_cluster(
        &self,
        matrix: &ExpressionMatrix,
        graph: Option<&NeighborGraph>,
        resolution: f64,
    ) -> Result<Vec<String>> {
        let n_cells = matrix.n_cells();
        if n_cells == 0 {
            return Ok(Vec::new());
        }
        if let Some(graph) = graph {
            if graph.n_cells() != n_cells {
                return Err(AnnotateError::GraphShapeMismatch {
                    expected: n_cells,
                    rows: graph.n_cells(),
                    cols: graph.n_cells(),
                });
            }
        }

        let genes = self.select_genes(matrix);
        let mut features = matrix.dense_columns(&genes);
        scale_columns(&mut features);
        let features = match graph {
            Some(graph) => graph.smooth(features.view()),
            None => features,
        };

        let k = self.cluster_count(resolution, n_cells);
        let result = KMeans::fit(features.view(), k, self.max_iterations, self.seed);
        info!(
            genes = genes.len(),
            clusters = k,
            iterations = result.iterations,
            with_graph = graph.is_some(),
            "over-clustering finished"
        );
        Ok(relabel_by_size(&result.assignments))
    }
}

/// 解像度の既定値を補って過剰クラスタリングを実行する。
///
/// # Errors
/// 実装側のエラーをそのまま返す。
pub fn over_cluster(
    clusterer: &dyn OverClusterer,
    matrix: &ExpressionMatrix,
    graph: Option<&NeighborGraph>,
    resolution: Option<f64>,
) -> Result<Vec<String>> {
    if graph.is_some() {
        info!("using the supplied neighborhood graph for over-clustering");
    } else {
        info!("no neighborhood graph supplied, clustering on scaled expression");
    }
    let resolution = resolution.unwrap_or_else(|| default_resolution(matrix.n_cells()));
    info!(resolution, "over-clustering input data");
    clusterer.over_cluster(matrix, graph, resolution)
}

/// 各列を平均 0・分散 1 に揃え、上限 10 でクリップする。
fn scale_columns(features: &mut Array2<f64>) {
    let means: Array1<f64> = features
        .mean_axis(Axis(0))
        .unwrap_or_else(|| Array1::zeros(features.ncols()));
    let stds: Array1<f64> = features
        .std_axis(Axis(0), 0.0)
        .mapv(|s| if s > 0.0 { s } else { 1.0 });
    *features -= &means;
    *features /= &stds;
    features.mapv_inplace(|v| v.min(MAX_SCALED_VALUE));
}

/// クラスタ ID を大きい順に `"0"`, `"1"`, … へ振り直す。同数なら先に現れた方を前にする。
fn relabel_by_size(assignments: &[usize]) -> Vec<String> {
    let mut stats: FxHashMap<usize, (usize, usize)> = FxHashMap::default();
    for (position, &cluster) in assignments.iter().enumerate() {
        stats
            .entry(cluster)
            .and_modify(|(count, _)| *count += 1)
            .or_insert((1, position));
    }
    let mut ordered: Vec<(usize, usize, usize)> = stats
        .into_iter()
        .map(|(cluster, (count, first))| (cluster, count, first))
        .collect();
    ordered.sort_by(|a, b| b.1.cmp(&a.1).then(a.2.cmp(&b.2)));
    let names: FxHashMap<usize, String> = ordered
        .into_iter()
        .enumerate()
        .map(|(rank, (cluster, _, _))| (cluster, rank.to_string()))
        .collect();
    assignments
        .iter()
        .map(|cluster| names[cluster].clone())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::array;
    use rstest::rstest;
    use sprs::TriMat;

    fn matrix(values: Array2<f64>) -> ExpressionMatrix {
        let cells = (0..values.nrows()).map(|i| format!("c{i}")).collect();
        let genes = (0..values.ncols()).map(|j| format!("g{j}")).collect();
        ExpressionMatrix::new(cells, genes, values).unwrap()
    }

    #[rstest]
    #[case(0, 5.0)]
    #[case(4_999, 5.0)]
    #[case(5_000, 10.0)]
    #[case(19_999, 10.0)]
    #[case(20_000, 15.0)]
    #[case(39_999, 15.0)]
    #[case(40_000, 20.0)]
    #[case(1_000_000, 20.0)]
    fn resolution_schedule(#[case] cells: usize, #[case] expected: f64) {
        assert_eq!(default_resolution(cells), expected);
    }

    #[test]
    fn relabels_largest_cluster_first() {
        let labels = relabel_by_size(&[7, 3, 3, 9, 3, 7]);
        assert_eq!(labels, vec!["1", "0", "0", "2", "0", "1"]);
    }

    #[test]
    fn cluster_count_follows_resolution() {
        let clusterer = KMeansOverClusterer::default();
        assert_eq!(clusterer.cluster_count(5.0, 3_000), 50);
        assert_eq!(clusterer.cluster_count(5.0, 20), 20);
        assert_eq!(clusterer.cluster_count(0.0, 20), 1);
    }

    #[test]
    fn output_is_aligned_and_reproducible() {
        let m = matrix(array![
            [5.0, 0.0, 1.0],
            [5.1, 0.0, 1.0],
            [4.9, 0.1, 1.0],
            [0.0, 5.0, 1.0],
            [0.1, 5.2, 1.0],
            [0.0, 4.8, 1.0],
        ]);
        let clusterer = KMeansOverClusterer {
            min_cells: 1,
            clusters_per_resolution: 1.0,
            ..KMeansOverClusterer::default()
        };
        let first = over_cluster(&clusterer, &m, None, Some(2.0)).unwrap();
        let second = over_cluster(&clusterer, &m, None, Some(2.0)).unwrap();
        assert_eq!(first.len(), 6);
        assert_eq!(first, second);
        assert_eq!(first[0], first[1]);
        assert_eq!(first[3], first[4]);
        assert_ne!(first[0], first[3]);
    }

    #[test]
    fn graph_must_match_cell_count() {
        let m = matrix(array![[1.0], [2.0]]);
        let mut tri = TriMat::new((3, 3));
        tri.add_triplet(0, 1, 1.0);
        let err = NeighborGraph::new(tri.to_csr(), 2).unwrap_err();
        assert!(matches!(err, AnnotateError::GraphShapeMismatch { .. }));

        let mut tri = TriMat::new((2, 2));
        tri.add_triplet(0, 1, 1.0);
        let graph = NeighborGraph::new(tri.to_csr(), 2).unwrap();
        let labels = KMeansOverClusterer::default()
            .over_cluster(&m, Some(&graph), 0.1)
            .unwrap();
        assert_eq!(labels, vec!["0", "0"]);
    }

    #[test]
    fn smoothing_averages_neighbors() {
        let mut tri = TriMat::new((2, 2));
        tri.add_triplet(0, 1, 1.0);
        let graph = NeighborGraph::new(tri.to_csr(), 2).unwrap();
        let smoothed = graph.smooth(array![[0.0], [2.0]].view());
        assert_eq!(smoothed, array![[1.0], [2.0]]);
    }
}
