//! 細胞ごとの総カウント正規化と log1p 変換、および正規化済み入力の検証。
use ndarray::Axis;
use tracing::{info, warn};

use super::matrix::Expression;
use super::ExpressionMatrix;
use crate::error::{AnnotateError, Result};

/// 正規化後の細胞あたり総カウント。
pub const TARGET_SUM: f64 = 10_000.0;

/// 正規化済みとみなす総カウントの許容誤差。
const TARGET_SUM_TOLERANCE: f64 = 1.0;

/// 各細胞のカウント合計を [`TARGET_SUM`] に揃えてから log1p を適用する。
/// 合計が 0 の細胞はそのまま残す。疎行列は疎のまま変換する。
pub fn normalize_log1p(matrix: &mut ExpressionMatrix) {
    match matrix.values_mut() {
        Expression::Dense(values) => {
            for mut row in values.axis_iter_mut(Axis(0)) {
                let total: f64 = row.sum();
                if total > 0.0 {
                    let factor = TARGET_SUM / total;
                    row.mapv_inplace(|v| (v * factor).ln_1p());
                } else {
                    row.mapv_inplace(f64::ln_1p);
                }
            }
        }
        Expression::Sparse(values) => {
            for mut row in values.outer_iterator_mut() {
                let total: f64 = row.data().iter().sum();
                if total > 0.0 {
                    let factor = TARGET_SUM / total;
                    row.map_inplace(|v| (v * factor).ln_1p());
                } else {
                    row.map_inplace(|v| v.ln_1p());
                }
            }
        }
    }
}

/// 負の値を含む（スケーリング済みの）行列かどうか。
#[must_use]
pub fn is_scaled(matrix: &ExpressionMatrix) -> bool {
    matrix.min_value().is_some_and(|min| min < 0.0)
}

/// 先頭細胞の `expm1` 合計が 10,000 ± 1 であることを確認する。
///
/// # Errors
/// 合計が許容範囲外なら [`AnnotateError::InvalidNormalization`]、空行列なら [`AnnotateError::EmptyMatrix`]。
pub fn validate_log1p(matrix: &ExpressionMatrix) -> Result<()> {
    if matrix.n_cells() == 0 {
        return Err(AnnotateError::EmptyMatrix);
    }
    let sum: f64 = match matrix.values() {
        Expression::Dense(values) => values.row(0).iter().map(|v| v.exp_m1()).sum(),
        Expression::Sparse(values) => values
            .outer_view(0)
            .map_or(0.0, |row| row.data().iter().map(|v| v.exp_m1()).sum()),
    };
    if (sum - TARGET_SUM).abs() > TARGET_SUM_TOLERANCE {
        return Err(AnnotateError::InvalidNormalization { sum });
    }
    Ok(())
}

/// 正規化済みとして渡された入力から予測に使う層を選ぶ。
///
/// 主層がスケーリング済みなら raw 層に切り替える。選んだ層は [`validate_log1p`] で検証する。
///
/// # Errors
/// スケーリング済みで raw 層がない場合、raw 層の細胞数が異なる場合、検証に失敗した場合。
pub fn select_normalized_layer(
    main: ExpressionMatrix,
    raw: Option<ExpressionMatrix>,
) -> Result<ExpressionMatrix> {
    let layer = if is_scaled(&main) {
        info!("detected scaled expression in the input data, trying the raw layer");
        let Some(raw) = raw else {
            return Err(AnnotateError::ScaledExpression);
        };
        if raw.n_cells() != main.n_cells() {
            return Err(AnnotateError::RawLayerMismatch {
                expected: main.n_cells(),
                found: raw.n_cells(),
            });
        }
        if raw.cells() != main.cells() {
            warn!("raw layer cell names differ from the main layer, keeping main layer names");
            raw.with_cells(main.cells().to_vec())?
        } else {
            raw
        }
    } else {
        main
    };
    validate_log1p(&layer)?;
    Ok(layer)
}
