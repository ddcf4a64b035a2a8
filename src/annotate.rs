//! 細胞種アノテーションの本体。
//!
//! 入力行列をモデルの特徴空間へ合わせて再スケーリングし、スコアとラベルを求める。
//! 必要に応じて過剰クラスタリングに基づく多数決でラベルを平滑化する。
use std::path::{Path, PathBuf};

use tracing::info;

pub mod align;
pub mod majority;
mod result;
pub mod scoring;

pub use result::{AnnotationResult, LabelColumn, LABELS_SHEET, PROBABILITY_SHEET};
pub use scoring::{PredictionMode, UNASSIGNED};

use crate::cluster::{self, KMeansOverClusterer, NeighborGraph, OverClusterer};
use crate::data::{self, ExpressionMatrix, InputOptions};
use crate::error::Result;
use crate::model::Model;

/// 正規化済みの入力行列とモデルの組。
///
/// モデルは借用するだけで、予測によって変更されない。
#[derive(Debug, Clone)]
pub struct Classifier<'m> {
    matrix: ExpressionMatrix,
    model: &'m Model,
}

impl<'m> Classifier<'m> {
    #[must_use]
    pub fn new(matrix: ExpressionMatrix, model: &'m Model) -> Self {
        Self { matrix, model }
    }

    /// 入力ファイルを読み込み、正規化してから分類器を作る。
    ///
    /// # Errors
    /// 入力の読み込みまたは正規化に失敗した場合。
    pub fn from_file(path: &Path, options: &InputOptions, model: &'m Model) -> Result<Self> {
        let matrix = data::load_expression(path, options)?;
        Ok(Self::new(matrix, model))
    }

    #[must_use]
    pub fn matrix(&self) -> &ExpressionMatrix {
        &self.matrix
    }

    #[must_use]
    pub fn model(&self) -> &Model {
        self.model
    }

    /// 各細胞の細胞種を予測する。
    ///
    /// # Errors
    /// 入力遺伝子とモデル特徴量に共通部分がない場合。
    pub fn celltype(&self, mode: PredictionMode) -> Result<AnnotationResult> {
        let aligned = align::align(self.model, self.matrix.genes())?;
        info!("scaling input data");
        let scaled = aligned.rescale(&self.matrix);
        info!(cells = self.matrix.n_cells(), mode = %mode, "predicting labels");
        let prediction = scoring::predict(aligned.classifier(), scaled.view(), mode);
        info!("prediction done");
        Ok(AnnotationResult::new(
            self.matrix.cells().to_vec(),
            aligned.classifier().classes().to_vec(),
            prediction.decision,
            prediction.probability,
            prediction.labels,
        ))
    }

    /// 入力行列を過剰クラスタリングする。`resolution` が `None` なら細胞数から決める。
    ///
    /// # Errors
    /// 近傍グラフの形状が一致しない場合など。
    pub fn over_cluster(
        &self,
        clusterer: &dyn OverClusterer,
        graph: Option<&NeighborGraph>,
        resolution: Option<f64>,
    ) -> Result<Vec<String>> {
        cluster::over_cluster(clusterer, &self.matrix, graph, resolution)
    }

    /// 予測結果に多数決の列を追加する。
    ///
    /// # Errors
    /// クラスタ割り当ての長さが細胞数と異なる場合。
    pub fn majority_vote(
        &self,
        predictions: AnnotationResult,
        over_clustering: &[String],
    ) -> Result<AnnotationResult> {
        predictions.with_majority_vote(over_clustering.to_vec())
    }
}

/// [`annotate`] の入力。
#[derive(Debug, Clone, Default)]
pub struct AnnotateOptions {
    pub input: PathBuf,
    pub input_options: InputOptions,
    pub mode: PredictionMode,
    pub majority_voting: bool,
    /// 細胞ごとのクラスタ ID を 1 行 1 つ並べたファイル。指定時は過剰クラスタリングを行わない。
    pub over_clustering_file: Option<PathBuf>,
    /// 過剰クラスタリングに使う細胞 × 細胞の接続行列（Matrix Market）。
    pub neighbor_graph: Option<PathBuf>,
    pub resolution: Option<f64>,
}

/// 入力の読み込みから予測、必要なら多数決までを一度に行う。
///
/// # Errors
/// 読み込み・予測・クラスタリング・多数決のいずれかに失敗した場合。
pub fn annotate(options: &AnnotateOptions, model: &Model) -> Result<AnnotationResult> {
    let classifier = Classifier::from_file(&options.input, &options.input_options, model)?;
    let predictions = classifier.celltype(options.mode)?;
    if !options.majority_voting {
        return Ok(predictions);
    }

    let over_clustering = match &options.over_clustering_file {
        Some(path) => {
            info!(path = %path.display(), "using the supplied over-clustering");
            data::read_name_list(path)?
        }
        None => {
            let n_cells = classifier.matrix().n_cells();
            let graph = options
                .neighbor_graph
                .as_deref()
                .map(|path| {
                    data::read_neighbor_graph(path, n_cells)
                        .and_then(|csmat| NeighborGraph::new(csmat, n_cells))
                })
                .transpose()?;
            classifier.over_cluster(
                &KMeansOverClusterer::default(),
                graph.as_ref(),
                options.resolution,
            )?
        }
    };
    classifier.majority_vote(predictions, &over_clustering)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{LinearClassifier, ModelDescription, StandardScaler};
    use ndarray::array;

    fn names(values: &[&str]) -> Vec<String> {
        values.iter().map(ToString::to_string).collect()
    }

    fn model() -> Model {
        let classifier = LinearClassifier::new(
            names(&["A", "B", "C"]),
            names(&["g1", "g2"]),
            array![[1.0, 0.0], [0.0, 1.0], [-1.0, -1.0]],
            array![0.0, 0.0, 0.0],
        )
        .unwrap();
        let scaler = StandardScaler::new(array![0.0, 0.0], array![1.0, 1.0]).unwrap();
        Model::new(classifier, scaler, ModelDescription::default()).unwrap()
    }

    #[test]
    fn celltype_uses_model_order_regardless_of_input_order() {
        let model = model();
        let matrix = ExpressionMatrix::new(
            names(&["c1", "c2"]),
            names(&["g2", "extra", "g1"]),
            array![[0.0, 9.0, 2.0], [3.0, 0.0, 0.0]],
        )
        .unwrap();
        let result = Classifier::new(matrix, &model)
            .celltype(PredictionMode::BestMatch)
            .unwrap();
        assert_eq!(result.predicted_labels(), ["A", "B"]);
        assert_eq!(result.classes(), ["A", "B", "C"]);
        assert_eq!(result.decision_matrix().row(0).to_vec(), vec![2.0, 0.0, -2.0]);
    }

    #[test]
    fn annotate_reads_supplied_over_clustering() {
        let dir = tempfile::tempdir().unwrap();
        let input = dir.path().join("counts.csv");
        std::fs::write(&input, "cell,g1,g2\nc1,9,1\nc2,8,2\nc3,1,9\n").unwrap();
        let clusters = dir.path().join("clusters.txt");
        std::fs::write(&clusters, "0\n0\n0\n").unwrap();

        let options = AnnotateOptions {
            input,
            majority_voting: true,
            over_clustering_file: Some(clusters),
            ..AnnotateOptions::default()
        };
        let result = annotate(&options, &model()).unwrap();
        assert_eq!(result.predicted_labels(), ["A", "A", "B"]);
        assert_eq!(result.majority_voting().unwrap(), ["A", "A", "A"]);
    }
}
