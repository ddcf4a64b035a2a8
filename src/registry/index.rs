//! モデル一覧（`models.json`）の形式。
use serde::{Deserialize, Serialize};
use tracing::warn;

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModelIndex {
    pub models: Vec<ModelEntry>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModelEntry {
    pub filename: String,
    pub url: String,
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub default: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub details: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub date: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source: Option<String>,
}

impl ModelEntry {
    /// `name` がファイル名、または拡張子を除いたファイル名と一致するか。
    #[must_use]
    pub fn matches(&self, name: &str) -> bool {
        self.filename == name || self.stem() == name
    }

    #[must_use]
    pub fn stem(&self) -> &str {
        self.filename
            .rsplit_once('.')
            .map_or(self.filename.as_str(), |(stem, _)| stem)
    }
}

impl ModelIndex {
    /// 既定モデルのエントリ。
    ///
    /// `default` 指定が複数あれば先頭、1 つもなければ一覧の先頭を使い、いずれも警告を出す。
    #[must_use]
    pub fn default_entry(&self) -> Option<&ModelEntry> {
        let mut flagged = self.models.iter().filter(|entry| entry.default);
        match flagged.next() {
            Some(first) => {
                if flagged.next().is_some() {
                    warn!(model = %first.filename, "more than one model marked as default");
                }
                Some(first)
            }
            None => {
                let first = self.models.first()?;
                warn!(model = %first.filename, "no model marked as default, using the first one");
                Some(first)
            }
        }
    }

    #[must_use]
    pub fn find(&self, name: &str) -> Option<&ModelEntry> {
        self.models.iter().find(|entry| entry.matches(name))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(filename: &str, default: bool) -> ModelEntry {
        ModelEntry {
            filename: filename.to_string(),
            url: format!("https://models.example.org/{filename}"),
            default,
            details: None,
            version: None,
            date: None,
            source: None,
        }
    }

    #[test]
    fn parses_index_with_optional_fields() {
        let raw = r#"{"models":[
            {"filename":"Immune_All_Low.json","url":"https://x/a.json","default":true,
             "details":"immune sub-populations","version":"v2","date":"2022-07-16"},
            {"filename":"Adult_Lung.json","url":"https://x/b.json"}
        ]}"#;
        let index: ModelIndex = serde_json::from_str(raw).unwrap();
        assert_eq!(index.models.len(), 2);
        assert!(index.models[0].default);
        assert_eq!(index.models[0].details.as_deref(), Some("immune sub-populations"));
        assert!(!index.models[1].default);
        assert!(index.models[1].details.is_none());
    }

    #[test]
    fn default_selection_rules() {
        let index = ModelIndex {
            models: vec![entry("a.json", false), entry("b.json", true), entry("c.json", true)],
        };
        assert_eq!(index.default_entry().unwrap().filename, "b.json");

        let none_flagged = ModelIndex {
            models: vec![entry("a.json", false), entry("b.json", false)],
        };
        assert_eq!(none_flagged.default_entry().unwrap().filename, "a.json");

        assert!(ModelIndex::default().default_entry().is_none());
    }

    #[test]
    fn entries_match_with_or_without_extension() {
        let index = ModelIndex {
            models: vec![entry("Immune_All_Low.json", false)],
        };
        assert!(index.find("Immune_All_Low").is_some());
        assert!(index.find("Immune_All_Low.json").is_some());
        assert!(index.find("Immune").is_none());
    }
}
