//! 学習済み線形分類器（クラスごとの重みベクトルと切片）。
use ndarray::{Array1, Array2, ArrayView1, ArrayView2, Axis};
use rustc_hash::FxHashSet;
use serde::{Deserialize, Serialize};

use super::ModelError;

/// シリアライズ形式の分類器パラメータ。
#[derive(Debug, Clone, Serialize, Deserialize)]
pub(crate) struct ClassifierWeights {
    pub(crate) classes: Vec<String>,
    pub(crate) features: Vec<String>,
    pub(crate) coef: Vec<Vec<f64>>,
    pub(crate) intercept: Vec<f64>,
}

/// クラス × 特徴量の重み行列を持つ線形決定関数。
#[derive(Debug, Clone, PartialEq)]
pub struct LinearClassifier {
    classes: Vec<String>,
    features: Vec<String>,
    coef: Array2<f64>,
    intercept: Array1<f64>,
}

impl LinearClassifier {
    /// 形状を検証して分類器を構築する。
    ///
    /// # Errors
    /// クラス数・特徴量数と重み行列／切片の形状が一致しない場合、
    /// 名前が重複している場合、非有限値を含む場合は [`ModelError::Invalid`] を返す。
    pub fn new(
        classes: Vec<String>,
        features: Vec<String>,
        coef: Array2<f64>,
        intercept: Array1<f64>,
    ) -> Result<Self, ModelError> {
        if classes.is_empty() {
            return Err(ModelError::invalid("classifier has no classes"));
        }
        ensure_unique(&classes, "class")?;
        ensure_unique(&features, "feature")?;
        if coef.dim() != (classes.len(), features.len()) {
            return Err(ModelError::invalid(format!(
                "coefficient matrix is {}x{}, expected {}x{}",
                coef.nrows(),
                coef.ncols(),
                classes.len(),
                features.len()
            )));
        }
        if intercept.len() != classes.len() {
            return Err(ModelError::invalid(format!(
                "intercept length {} does not match {} classes",
                intercept.len(),
                classes.len()
            )));
        }
        if coef.iter().chain(intercept.iter()).any(|v| !v.is_finite()) {
            return Err(ModelError::invalid("classifier weights contain non-finite values"));
        }
        Ok(Self {
            classes,
            features,
            coef,
            intercept,
        })
    }

    #[must_use]
    pub fn classes(&self) -> &[String] {
        &self.classes
    }

    #[must_use]
    pub fn features(&self) -> &[String] {
        &self.features
    }

    #[must_use]
    pub fn coef(&self) -> ArrayView2<'_, f64> {
        self.coef.view()
    }

    #[must_use]
    pub fn intercept(&self) -> ArrayView1<'_, f64> {
        self.intercept.view()
    }

    /// 決定関数 `X · Wᵀ + b` を計算する。`x` は細胞 × 特徴量で、列は `features()` と同順。
    #[must_use]
    pub fn decision_function(&self, x: ArrayView2<'_, f64>) -> Array2<f64> {
        x.dot(&self.coef.t()) + &self.intercept
    }

    /// 指定した特徴量列のみを残した新しい分類器を返す。
    pub(crate) fn select_features(&self, indices: &[usize]) -> Self {
        Self {
            classes: self.classes.clone(),
            features: indices.iter().map(|&i| self.features[i].clone()).collect(),
            coef: self.coef.select(Axis(1), indices),
            intercept: self.intercept.clone(),
        }
    }

    pub(crate) fn to_weights(&self) -> ClassifierWeights {
        ClassifierWeights {
            classes: self.classes.clone(),
            features: self.features.clone(),
            coef: self.coef.rows().into_iter().map(|row| row.to_vec()).collect(),
            intercept: self.intercept.to_vec(),
        }
    }
}

impl TryFrom<ClassifierWeights> for LinearClassifier {
    type Error = ModelError;

    fn try_from(weights: ClassifierWeights) -> Result<Self, Self::Error> {
        let n_features = weights.features.len();
        for (idx, row) in weights.coef.iter().enumerate() {
            if row.len() != n_features {
                return Err(ModelError::invalid(format!(
                    "coefficient row {idx} has {} values, expected {n_features}",
                    row.len()
                )));
            }
        }
        let n_rows = weights.coef.len();
        let flat: Vec<f64> = weights.coef.into_iter().flatten().collect();
        let coef = Array2::from_shape_vec((n_rows, n_features), flat)
            .map_err(|err| ModelError::invalid(format!("coefficient matrix: {err}")))?;
        Self::new(
            weights.classes,
            weights.features,
            coef,
            Array1::from_vec(weights.intercept),
        )
    }
}

fn ensure_unique(names: &[String], kind: &str) -> Result<(), ModelError> {
    let mut seen = FxHashSet::default();
    for name in names {
        if !seen.insert(name.as_str()) {
            return Err(ModelError::invalid(format!("duplicate {kind} name `{name}`")));
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::array;

    fn names(values: &[&str]) -> Vec<String> {
        values.iter().map(ToString::to_string).collect()
    }

    #[test]
    fn decision_function_is_linear() {
        let clf = LinearClassifier::new(
            names(&["A", "B"]),
            names(&["g1", "g2"]),
            array![[1.0, 2.0], [-1.0, 0.5]],
            array![0.5, -0.5],
        )
        .unwrap();
        let scores = clf.decision_function(array![[1.0, 1.0], [0.0, 2.0]].view());
        assert_eq!(scores, array![[3.5, -1.0], [4.5, 0.5]]);
    }

    #[test]
    fn rejects_mismatched_shapes() {
        let err = LinearClassifier::new(
            names(&["A", "B"]),
            names(&["g1", "g2"]),
            array![[1.0, 2.0]],
            array![0.0, 0.0],
        )
        .unwrap_err();
        assert!(err.to_string().contains("coefficient matrix is 1x2"));
    }

    #[test]
    fn rejects_duplicate_features() {
        let err = LinearClassifier::new(
            names(&["A"]),
            names(&["g1", "g1"]),
            array![[1.0, 2.0]],
            array![0.0],
        )
        .unwrap_err();
        assert!(err.to_string().contains("duplicate feature"));
    }

    #[test]
    fn select_features_keeps_requested_order() {
        let clf = LinearClassifier::new(
            names(&["A"]),
            names(&["g1", "g2", "g3"]),
            array![[1.0, 2.0, 3.0]],
            array![0.0],
        )
        .unwrap();
        let subset = clf.select_features(&[2, 0]);
        assert_eq!(subset.features(), names(&["g3", "g1"]).as_slice());
        assert_eq!(subset.coef(), array![[3.0, 1.0]]);
    }

    #[test]
    fn ragged_weight_rows_are_rejected() {
        let weights = ClassifierWeights {
            classes: names(&["A", "B"]),
            features: names(&["g1", "g2"]),
            coef: vec![vec![1.0, 2.0], vec![1.0]],
            intercept: vec![0.0, 0.0],
        };
        assert!(LinearClassifier::try_from(weights).is_err());
    }
}
