//! 決定関数スコア・確率・ラベルの計算。
use std::fmt;
use std::str::FromStr;

use ndarray::{Array2, ArrayView1, ArrayView2};

use crate::error::{AnnotateError, Result};
use crate::model::LinearClassifier;

/// どのクラスも閾値を超えなかった細胞のラベル。
pub const UNASSIGNED: &str = "Unassigned";

/// 複数ラベルの区切り文字。
pub const LABEL_SEPARATOR: &str = "|";

pub const DEFAULT_PROBABILITY_THRESHOLD: f64 = 0.5;

/// ラベル付けの方式。
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub enum PredictionMode {
    /// スコア最大のクラスを 1 つ選ぶ。
    #[default]
    BestMatch,
    /// 確率が閾値を超えたクラスをすべて選ぶ（0 個なら [`UNASSIGNED`]）。
    ProbMatch { threshold: f64 },
}

impl PredictionMode {
    /// # Errors
    /// 閾値が [0, 1] の外なら [`AnnotateError::InvalidThreshold`]。
    pub fn prob_match(threshold: f64) -> Result<Self> {
        if !(0.0..=1.0).contains(&threshold) {
            return Err(AnnotateError::InvalidThreshold(threshold));
        }
        Ok(Self::ProbMatch { threshold })
    }

    /// モード名と閾値から組み立てる。閾値は `prob match` のときだけ使う。
    ///
    /// # Errors
    /// 未知のモード名、または不正な閾値。
    pub fn parse_with_threshold(mode: &str, threshold: f64) -> Result<Self> {
        match mode.parse::<Self>()? {
            Self::BestMatch => Ok(Self::BestMatch),
            Self::ProbMatch { .. } => Self::prob_match(threshold),
        }
    }
}

impl FromStr for PredictionMode {
    type Err = AnnotateError;

    fn from_str(s: &str) -> Result<Self> {
        let normalized = s.trim().to_lowercase().replace(['-', '_'], " ");
        match normalized.as_str() {
            "best match" => Ok(Self::BestMatch),
            "prob match" => Ok(Self::ProbMatch {
                threshold: DEFAULT_PROBABILITY_THRESHOLD,
            }),
            _ => Err(AnnotateError::UnknownMode(s.to_string())),
        }
    }
}

impl fmt::Display for PredictionMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::BestMatch => f.write_str("best match"),
            Self::ProbMatch { threshold } => write!(f, "prob match (p > {threshold})"),
        }
    }
}

/// 予測結果の行列とラベル。
#[derive(Debug, Clone, PartialEq)]
pub struct Prediction {
    /// 細胞 × クラスの決定関数スコア。
    pub decision: Array2<f64>,
    /// 細胞 × クラスの確率（スコアのシグモイド）。
    pub probability: Array2<f64>,
    pub labels: Vec<String>,
}

/// ロジスティック関数。大きな負値でもオーバーフローしない形で計算する。
#[must_use]
pub fn sigmoid(x: f64) -> f64 {
    if x >= 0.0 {
        1.0 / (1.0 + (-x).exp())
    } else {
        let e = x.exp();
        e / (1.0 + e)
    }
}

/// 再スケーリング済みの行列をスコアリングし、ラベルを付ける。
#[must_use]
pub fn predict(
    classifier: &LinearClassifier,
    scaled: ArrayView2<'_, f64>,
    mode: PredictionMode,
) -> Prediction {
    let decision = classifier.decision_function(scaled);
    let probability = decision.mapv(sigmoid);
    let classes = classifier.classes();
    let labels = match mode {
        PredictionMode::BestMatch => decision
            .rows()
            .into_iter()
            .map(|row| classes[argmax(row)].clone())
            .collect(),
        PredictionMode::ProbMatch { threshold } => probability
            .rows()
            .into_iter()
            .map(|row| multi_label(classes, row, threshold))
            .collect(),
    };
    Prediction {
        decision,
        probability,
        labels,
    }
}

/// 最大値の位置。同点ならクラス順で先のもの。
fn argmax(row: ArrayView1<'_, f64>) -> usize {
    let mut best = 0;
    let mut best_score = f64::NEG_INFINITY;
    for (idx, &score) in row.iter().enumerate() {
        if score > best_score {
            best = idx;
            best_score = score;
        }
    }
    best
}

fn multi_label(classes: &[String], row: ArrayView1<'_, f64>, threshold: f64) -> String {
    let mut hits: Vec<&str> = row
        .iter()
        .zip(classes)
        .filter(|(p, _)| **p > threshold)
        .map(|(_, class)| class.as_str())
        .collect();
    if hits.is_empty() {
        return UNASSIGNED.to_string();
    }
    hits.sort_unstable();
    hits.join(LABEL_SEPARATOR)
}
