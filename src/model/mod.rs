//! 学習済みモデル（線形分類器・標準化変換・説明メタデータ）の読み書き。
use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, info};

mod classifier;
mod description;
mod scaler;

pub use classifier::LinearClassifier;
pub use description::ModelDescription;
pub use scaler::StandardScaler;

use classifier::ClassifierWeights;
use scaler::ScalerParams;

/// モデル成果物の拡張子。
pub const MODEL_EXTENSION: &str = "json";

#[derive(Debug, Error)]
pub enum ModelError {
    #[error("no such model file: {0}")]
    NotFound(PathBuf),
    #[error("failed to read model {path}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to write model {path}")]
    Write {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("invalid model {path}")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
    #[error("failed to serialize model {path}")]
    Serialize {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
    #[error("invalid model: {0}")]
    Invalid(String),
}

impl ModelError {
    pub(crate) fn invalid(reason: impl Into<String>) -> Self {
        Self::Invalid(reason.into())
    }
}

/// ディスク上のモデル成果物の形式。
#[derive(Debug, Serialize, Deserialize)]
struct ModelArtifact {
    classifier: ClassifierWeights,
    scaler: ScalerParams,
    #[serde(default)]
    description: ModelDescription,
}

/// 線形分類器と標準化変換をまとめた学習済みモデル。
///
/// 読み込み後は不変で、予測時の遺伝子合わせは [`crate::annotate::align`] が
/// 別のコピーを作るため、同じインスタンスを何度でも再利用できる。
#[derive(Debug, Clone, PartialEq)]
pub struct Model {
    classifier: LinearClassifier,
    scaler: StandardScaler,
    description: ModelDescription,
}

impl Model {
    /// # Errors
    /// 標準化変換の次元が分類器の特徴量数と異なる場合、または説明が不正な場合。
    pub fn new(
        classifier: LinearClassifier,
        scaler: StandardScaler,
        description: ModelDescription,
    ) -> Result<Self, ModelError> {
        if scaler.len() != classifier.features().len() {
            return Err(ModelError::invalid(format!(
                "scaler covers {} features but the classifier has {}",
                scaler.len(),
                classifier.features().len()
            )));
        }
        description.validate(classifier.classes().len())?;
        Ok(Self {
            classifier,
            scaler,
            description,
        })
    }

    /// JSON 文字列からモデルを復元する。
    ///
    /// # Errors
    /// JSON の構文エラー、または形状検証に失敗した場合。
    pub fn from_json(raw: &str) -> Result<Self, ModelError> {
        let artifact: ModelArtifact = serde_json::from_str(raw).map_err(|source| {
            ModelError::Parse {
                path: PathBuf::from("<memory>"),
                source,
            }
        })?;
        Self::from_artifact(artifact)
    }

    /// ファイルからモデルを読み込む。
    ///
    /// # Errors
    /// ファイルが存在しない、読めない、または内容が不正な場合。
    pub fn from_path(path: impl AsRef<Path>) -> Result<Self, ModelError> {
        let path = path.as_ref();
        if !path.is_file() {
            return Err(ModelError::NotFound(path.to_path_buf()));
        }
        let raw = fs::read_to_string(path).map_err(|source| ModelError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        let artifact: ModelArtifact =
            serde_json::from_str(&raw).map_err(|source| ModelError::Parse {
                path: path.to_path_buf(),
                source,
            })?;
        let model = Self::from_artifact(artifact)?;
        debug!(
            path = %path.display(),
            classes = model.cell_types().len(),
            features = model.features().len(),
            "model loaded"
        );
        Ok(model)
    }

    fn from_artifact(artifact: ModelArtifact) -> Result<Self, ModelError> {
        let classifier = LinearClassifier::try_from(artifact.classifier)?;
        let scaler = StandardScaler::try_from(artifact.scaler)?;
        Self::new(classifier, scaler, artifact.description)
    }

    /// モデルを書き出す。拡張子は常に `.json` に置き換える。
    ///
    /// # Errors
    /// シリアライズまたは書き込みに失敗した場合。
    pub fn write(&self, path: impl AsRef<Path>) -> Result<PathBuf, ModelError> {
        let path = path.as_ref().with_extension(MODEL_EXTENSION);
        let artifact = ModelArtifact {
            classifier: self.classifier.to_weights(),
            scaler: self.scaler.to_params(),
            description: self.description.clone(),
        };
        let body =
            serde_json::to_vec_pretty(&artifact).map_err(|source| ModelError::Serialize {
                path: path.clone(),
                source,
            })?;
        fs::write(&path, body).map_err(|source| ModelError::Write {
            path: path.clone(),
            source,
        })?;
        info!(path = %path.display(), "model written");
        Ok(path)
    }

    #[must_use]
    pub fn classifier(&self) -> &LinearClassifier {
        &self.classifier
    }

    #[must_use]
    pub fn scaler(&self) -> &StandardScaler {
        &self.scaler
    }

    #[must_use]
    pub fn description(&self) -> &ModelDescription {
        &self.description
    }

    /// モデルに含まれる細胞種。
    #[must_use]
    pub fn cell_types(&self) -> &[String] {
        self.classifier.classes()
    }

    /// モデルに含まれる遺伝子。
    #[must_use]
    pub fn features(&self) -> &[String] {
        self.classifier.features()
    }
}
