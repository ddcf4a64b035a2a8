use ndarray::{Array1, ArrayView1};
use serde::{Deserialize, Serialize};

use super::ModelError;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub(crate) struct ScalerParams {
    pub(crate) mean: Vec<f64>,
    pub(crate) scale: Vec<f64>,
}

/// 特徴量ごとの平均・スケールによる標準化変換。
#[derive(Debug, Clone, PartialEq)]
pub struct StandardScaler {
    mean: Array1<f64>,
    scale: Array1<f64>,
}

impl StandardScaler {
    /// # Errors
    /// 平均とスケールの長さが異なる場合、または非有限値を含む場合は [`ModelError::Invalid`] を返す。
    pub fn new(mean: Array1<f64>, scale: Array1<f64>) -> Result<Self, ModelError> {
        if mean.len() != scale.len() {
            return Err(ModelError::invalid(format!(
                "scaler mean has {} values but scale has {}",
                mean.len(),
                scale.len()
            )));
        }
        if mean.iter().chain(scale.iter()).any(|v| !v.is_finite()) {
            return Err(ModelError::invalid("scaler parameters contain non-finite values"));
        }
        Ok(Self { mean, scale })
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.mean.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.mean.is_empty()
    }

    #[must_use]
    pub fn mean(&self) -> ArrayView1<'_, f64> {
        self.mean.view()
    }

    #[must_use]
    pub fn scale(&self) -> ArrayView1<'_, f64> {
        self.scale.view()
    }

    pub(crate) fn select_features(&self, indices: &[usize]) -> Self {
        Self {
            mean: indices.iter().map(|&i| self.mean[i]).collect(),
            scale: indices.iter().map(|&i| self.scale[i]).collect(),
        }
    }

    pub(crate) fn to_params(&self) -> ScalerParams {
        ScalerParams {
            mean: self.mean.to_vec(),
            scale: self.scale.to_vec(),
        }
    }
}

impl TryFrom<ScalerParams> for StandardScaler {
    type Error = ModelError;

    fn try_from(params: ScalerParams) -> Result<Self, Self::Error> {
        Self::new(Array1::from_vec(params.mean), Array1::from_vec(params.scale))
    }
}
