//! モデルの説明メタデータ。
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

use super::ModelError;

/// モデルに付随する記述情報。すべて任意項目。
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ModelDescription {
    /// 学習日 (`YYYY-MM-DD`)。
    #[serde(skip_serializing_if = "Option::is_none")]
    pub date: Option<String>,
    /// 自由記述の説明文。
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    /// 学習データの出典。
    #[serde(skip_serializing_if = "Option::is_none")]
    pub source: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub number_celltypes: Option<usize>,
}

impl ModelDescription {
    /// 分類器のクラス数と照合して記述内容を検証する。
    ///
    /// # Errors
    /// 日付が `YYYY-MM-DD` でない場合、または `number_celltypes` がクラス数と一致しない場合。
    pub fn validate(&self, n_classes: usize) -> Result<(), ModelError> {
        if let Some(date) = self.date.as_deref() {
            NaiveDate::parse_from_str(date, "%Y-%m-%d").map_err(|err| {
                ModelError::invalid(format!("description date `{date}` is not YYYY-MM-DD: {err}"))
            })?;
        }
        if let Some(declared) = self.number_celltypes {
            if declared != n_classes {
                return Err(ModelError::invalid(format!(
                    "description declares {declared} cell types but the classifier has {n_classes}"
                )));
            }
        }
        Ok(())
    }

    /// 一覧表示用の説明文。未設定なら空文字列。
    #[must_use]
    pub fn summary(&self) -> &str {
        self.details.as_deref().unwrap_or_default()
    }
}
