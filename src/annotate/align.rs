//! 入力遺伝子とモデル特徴量の突き合わせ、および特徴空間への再スケーリング。
use ndarray::{Array1, Array2};
use rustc_hash::FxHashMap;
use tracing::info;

use crate::data::ExpressionMatrix;
use crate::error::{AnnotateError, Result};
use crate::model::{LinearClassifier, Model, StandardScaler};

/// 再スケーリング後の値の上限（下限はなし）。
pub const MAX_SCALED_VALUE: f64 = 10.0;

/// 入力データと共通する特徴量だけに絞ったモデルパラメータのコピー。
///
/// 特徴量の順序は常にモデル側の順序。元の [`Model`] は変更されない。
#[derive(Debug, Clone)]
pub struct AlignedModel {
    classifier: LinearClassifier,
    scaler: StandardScaler,
    /// 特徴量ごとの入力行列の列番号。
    input_columns: Vec<usize>,
}

impl AlignedModel {
    #[must_use]
    pub fn classifier(&self) -> &LinearClassifier {
        &self.classifier
    }

    #[must_use]
    pub fn scaler(&self) -> &StandardScaler {
        &self.scaler
    }

    /// 予測に使う遺伝子（モデルの順序）。
    #[must_use]
    pub fn features(&self) -> &[String] {
        self.classifier.features()
    }

    #[must_use]
    pub fn input_columns(&self) -> &[usize] {
        &self.input_columns
    }

    /// 入力行列から共通遺伝子の列をモデル順に取り出し、平均を引いてスケールで割る。
    /// 10 を超える値は 10 に丸める。スケール 0 の特徴量は 1 として扱う。
    /// 疎行列の入力でも密にするのは共通遺伝子の列だけ。
    #[must_use]
    pub fn rescale(&self, matrix: &ExpressionMatrix) -> Array2<f64> {
        let mut scaled = matrix.dense_columns(&self.input_columns);
        let scale: Array1<f64> = self
            .scaler
            .scale()
            .mapv(|s| if s == 0.0 { 1.0 } else { s });
        scaled -= &self.scaler.mean();
        scaled /= &scale;
        scaled.mapv_inplace(|v| if v > MAX_SCALED_VALUE { MAX_SCALED_VALUE } else { v });
        scaled
    }
}

/// モデルの特徴量と入力遺伝子の共通部分で、モデルを並べ替え・絞り込んだコピーを作る。
///
/// # Errors
/// 共通する遺伝子が 1 つもない場合は [`AnnotateError::NoGeneOverlap`]。
pub fn align(model: &Model, input_genes: &[String]) -> Result<AlignedModel> {
    info!("matching reference genes");
    let mut positions: FxHashMap<&str, usize> = FxHashMap::default();
    for (column, gene) in input_genes.iter().enumerate() {
        positions.entry(gene.as_str()).or_insert(column);
    }

    let mut model_indices = Vec::new();
    let mut input_columns = Vec::new();
    for (index, feature) in model.features().iter().enumerate() {
        if let Some(&column) = positions.get(feature.as_str()) {
            model_indices.push(index);
            input_columns.push(column);
        }
    }

    if model_indices.is_empty() {
        return Err(AnnotateError::NoGeneOverlap {
            model_features: model.features().len(),
            input_genes: input_genes.len(),
        });
    }
    info!(features = model_indices.len(), "features used for prediction");

    Ok(AlignedModel {
        classifier: model.classifier().select_features(&model_indices),
        scaler: model.scaler().select_features(&model_indices),
        input_columns,
    })
}
