//! ローカルのモデル置き場と、リモートのモデル一覧からのダウンロード。
//!
//! 置き場は `<home>/data/models/` で、モデル成果物（`*.json`）と一覧ファイル `models.json` を持つ。
use std::fs;
use std::io;
use std::path::{Component, Path, PathBuf};

use thiserror::Error;
use tracing::{error, info};

mod fetch;
mod index;

pub use fetch::{Fetcher, HttpFetcher};
pub use index::{ModelEntry, ModelIndex};

use crate::config::Config;
use crate::model::{MODEL_EXTENSION, Model, ModelError};

/// 一覧ファイル名。
pub const INDEX_FILE: &str = "models.json";

#[derive(Debug, Error)]
pub enum RegistryError {
    #[error("no model index URL configured (set CELL_ANNOTATOR_MODELS_URL)")]
    NoIndexUrl,
    #[error("failed to fetch {url}")]
    Fetch {
        url: String,
        #[source]
        source: anyhow::Error,
    },
    #[error("filesystem error at {path}")]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("invalid model index {path}")]
    InvalidIndex {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
    #[error("model index lists no models")]
    EmptyIndex,
    #[error("model index entry `{filename}` is not a plain file name")]
    UnsafeFileName { filename: String },
    #[error(transparent)]
    Model(#[from] ModelError),
}

/// [`ModelStore::download_models`] の結果。
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DownloadReport {
    pub downloaded: Vec<String>,
    pub skipped: Vec<String>,
    pub failed: Vec<String>,
}

/// モデル置き場。
pub struct ModelStore {
    models_dir: PathBuf,
    index_url: Option<String>,
    fetcher: Box<dyn Fetcher>,
}

impl ModelStore {
    #[must_use]
    pub fn new(home: impl AsRef<Path>, index_url: Option<String>, fetcher: Box<dyn Fetcher>) -> Self {
        Self {
            models_dir: home.as_ref().join("data").join("models"),
            index_url,
            fetcher,
        }
    }

    /// 設定からストアと HTTP フェッチャを組み立てる。
    ///
    /// # Errors
    /// HTTP クライアントの構築に失敗した場合。
    pub fn from_config(config: &Config) -> Result<Self, RegistryError> {
        let fetcher = HttpFetcher::from_config(config).map_err(|source| RegistryError::Fetch {
            url: config.models_url().unwrap_or_default().to_string(),
            source,
        })?;
        Ok(Self::new(
            config.home(),
            config.models_url().map(ToString::to_string),
            Box::new(fetcher),
        ))
    }

    #[must_use]
    pub fn models_dir(&self) -> &Path {
        &self.models_dir
    }

    #[must_use]
    pub fn model_path(&self, file: &str) -> PathBuf {
        self.models_dir.join(file)
    }

    /// 一覧のファイル名から置き場内のパスを作る。区切りや `..` を含む名前は拒否する。
    fn entry_path(&self, filename: &str) -> Result<PathBuf, RegistryError> {
        if is_plain_file_name(filename) {
            Ok(self.model_path(filename))
        } else {
            Err(RegistryError::UnsafeFileName {
                filename: filename.to_string(),
            })
        }
    }

    #[must_use]
    pub fn index_path(&self) -> PathBuf {
        self.model_path(INDEX_FILE)
    }

    /// 一覧ファイルを読み込む。ない場合、または `force_update` のときは取得し直す。
    ///
    /// # Errors
    /// 取得・読み込み・パースに失敗した場合。
    pub fn index(&self, force_update: bool) -> Result<ModelIndex, RegistryError> {
        let path = self.index_path();
        if force_update || !path.is_file() {
            return self.download_index();
        }
        let raw = fs::read(&path).map_err(|source| RegistryError::Io {
            path: path.clone(),
            source,
        })?;
        serde_json::from_slice(&raw).map_err(|source| RegistryError::InvalidIndex { path, source })
    }

    /// リモートの一覧を取得して保存する。内容が正しく読めた場合のみ書き込む。
    ///
    /// # Errors
    /// URL 未設定、取得失敗、または一覧として解釈できない場合。
    pub fn download_index(&self) -> Result<ModelIndex, RegistryError> {
        let url = self.index_url.as_deref().ok_or(RegistryError::NoIndexUrl)?;
        info!(url, "retrieving model list from server");
        let body = self.fetcher.fetch(url).map_err(|source| RegistryError::Fetch {
            url: url.to_string(),
            source,
        })?;
        let index: ModelIndex =
            serde_json::from_slice(&body).map_err(|source| RegistryError::InvalidIndex {
                path: PathBuf::from(url),
                source,
            })?;
        self.write_file(&self.index_path(), &body)?;
        info!(models = index.models.len(), "model list stored");
        Ok(index)
    }

    /// 既定モデルのファイル名。
    ///
    /// # Errors
    /// 一覧の取得に失敗した場合、一覧が空の場合、またはファイル名が置き場の外を指す場合。
    pub fn default_model(&self) -> Result<String, RegistryError> {
        let index = self.index(false)?;
        let filename = index
            .default_entry()
            .map(|entry| entry.filename.clone())
            .ok_or(RegistryError::EmptyIndex)?;
        self.entry_path(&filename)?;
        Ok(filename)
    }

    /// 置き場にあるモデル成果物のファイル名（ソート済み）。ダウンロードは行わない。
    ///
    /// # Errors
    /// ディレクトリの読み込みに失敗した場合。
    pub fn local_models(&self) -> Result<Vec<String>, RegistryError> {
        if !self.models_dir.is_dir() {
            return Ok(Vec::new());
        }
        let entries = fs::read_dir(&self.models_dir).map_err(|source| RegistryError::Io {
            path: self.models_dir.clone(),
            source,
        })?;
        let mut models = Vec::new();
        for entry in entries {
            let entry = entry.map_err(|source| RegistryError::Io {
                path: self.models_dir.clone(),
                source,
            })?;
            let path = entry.path();
            let is_model = path.is_file()
                && path.extension().is_some_and(|ext| ext == MODEL_EXTENSION)
                && path.file_name().is_some_and(|name| name != INDEX_FILE);
            if is_model {
                models.push(entry.file_name().to_string_lossy().into_owned());
            }
        }
        models.sort();
        Ok(models)
    }

    /// 置き場が空ならすべてのモデルをダウンロードする。
    ///
    /// # Errors
    /// 置き場の読み込み、または一覧の取得に失敗した場合。
    pub fn download_if_required(&self) -> Result<(), RegistryError> {
        if self.local_models()?.is_empty() {
            info!("no available models, downloading");
            self.download_models(false, &[])?;
        }
        Ok(())
    }

    /// 利用可能なモデルのファイル名。置き場が空ならダウンロードしてから列挙する。
    ///
    /// # Errors
    /// [`Self::download_if_required`] と同じ。
    pub fn all_models(&self) -> Result<Vec<String>, RegistryError> {
        self.download_if_required()?;
        self.local_models()
    }

    /// 一覧にあるモデルをダウンロードする。`names` が空ならすべて。
    ///
    /// 既存のファイルは `force_update` でない限りスキップする。個々の失敗は
    /// ログに残して続行し、[`DownloadReport::failed`] に記録する。
    ///
    /// # Errors
    /// 一覧の取得に失敗した場合、または置き場を作れない場合。
    pub fn download_models(
        &self,
        force_update: bool,
        names: &[String],
    ) -> Result<DownloadReport, RegistryError> {
        let index = self.index(force_update)?;
        info!(dir = %self.models_dir.display(), "storing models");

        let entries: Vec<&ModelEntry> = if names.is_empty() {
            index.models.iter().collect()
        } else {
            info!(?names, "filtering model list");
            for name in names {
                if index.find(name).is_none() {
                    error!(model = %name, "no model in the list matches this name");
                }
            }
            let selected: Vec<&ModelEntry> = index
                .models
                .iter()
                .filter(|entry| names.iter().any(|name| entry.matches(name)))
                .collect();
            if selected.is_empty() {
                error!(?names, "all models filtered out");
            }
            selected
        };

        let mut report = DownloadReport::default();
        let total = entries.len();
        for (idx, entry) in entries.into_iter().enumerate() {
            let path = match self.entry_path(&entry.filename) {
                Ok(path) => path,
                Err(err) => {
                    error!(model = %entry.filename, error = %err, "refusing model entry");
                    report.failed.push(entry.filename.clone());
                    continue;
                }
            };
            if path.exists() && !force_update {
                info!(
                    model = %entry.filename,
                    position = idx + 1,
                    total,
                    "skipping model, file exists"
                );
                report.skipped.push(entry.filename.clone());
                continue;
            }
            info!(model = %entry.filename, position = idx + 1, total, "downloading model");
            match self.download_entry(entry, &path) {
                Ok(()) => report.downloaded.push(entry.filename.clone()),
                Err(err) => {
                    error!(model = %entry.filename, error = %err, "model download failed");
                    report.failed.push(entry.filename.clone());
                }
            }
        }
        Ok(report)
    }

    fn download_entry(&self, entry: &ModelEntry, path: &Path) -> Result<(), RegistryError> {
        let body = self
            .fetcher
            .fetch(&entry.url)
            .map_err(|source| RegistryError::Fetch {
                url: entry.url.clone(),
                source,
            })?;
        self.write_file(path, &body)
    }

    /// モデル名と説明の組。`on_the_fly` なら手元のモデル成果物から、そうでなければ一覧から読む。
    ///
    /// # Errors
    /// モデルまたは一覧の読み込みに失敗した場合。
    pub fn describe(&self, on_the_fly: bool) -> Result<Vec<(String, String)>, RegistryError> {
        if on_the_fly {
            self.all_models()?
                .into_iter()
                .map(|name| -> Result<(String, String), RegistryError> {
                    let model = Model::from_path(self.model_path(&name))?;
                    let details = model.description().summary().to_string();
                    Ok((name, details))
                })
                .collect()
        } else {
            Ok(self
                .index(false)?
                .models
                .into_iter()
                .map(|entry| (entry.filename, entry.details.unwrap_or_default()))
                .collect())
        }
    }

    /// 置き場にある名前ならそのパス。拡張子は省略できる。
    ///
    /// # Errors
    /// 置き場の読み込みに失敗した場合。
    pub fn resolve(&self, name: &str) -> Result<Option<PathBuf>, RegistryError> {
        let with_extension = format!("{name}.{MODEL_EXTENSION}");
        Ok(self
            .local_models()?
            .into_iter()
            .find(|model| model == name || *model == with_extension)
            .map(|model| self.model_path(&model)))
    }

    fn write_file(&self, path: &Path, body: &[u8]) -> Result<(), RegistryError> {
        fs::create_dir_all(&self.models_dir).map_err(|source| RegistryError::Io {
            path: self.models_dir.clone(),
            source,
        })?;
        fs::write(path, body).map_err(|source| RegistryError::Io {
            path: path.to_path_buf(),
            source,
        })
    }
}

fn is_plain_file_name(name: &str) -> bool {
    let mut components = Path::new(name).components();
    matches!(
        (components.next(), components.next()),
        (Some(Component::Normal(_)), None)
    )
}

impl Model {
    /// 名前またはパスからモデルを読み込む。
    ///
    /// `None` なら既定モデル（手元になければダウンロード）。置き場にある名前ならそのファイル、
    /// それ以外はファイルパスとして扱う。
    ///
    /// # Errors
    /// ファイルが存在しない場合は [`ModelError::NotFound`]、内容が不正な場合はパースまたは検証のエラー。
    pub fn load(name: Option<&str>, store: &ModelStore) -> Result<Self, RegistryError> {
        let path = match name {
            None => {
                let default = store.default_model()?;
                info!(model = %default, "using the default model");
                let path = store.model_path(&default);
                if !path.is_file() {
                    store.download_models(false, std::slice::from_ref(&default))?;
                }
                path
            }
            Some(name) => match store.resolve(name)? {
                Some(path) => path,
                None => PathBuf::from(name),
            },
        };
        Ok(Self::from_path(path)?)
    }
}
