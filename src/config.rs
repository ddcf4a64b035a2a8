use std::{env, path::PathBuf, str::FromStr, time::Duration};

use thiserror::Error;

/// ログの出力形式。
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum LogFormat {
    #[default]
    Text,
    Json,
}

impl FromStr for LogFormat {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "text" | "pretty" => Ok(Self::Text),
            "json" => Ok(Self::Json),
            other => Err(anyhow::anyhow!("unknown log format `{other}`")),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Config {
    home: PathBuf,
    models_url: Option<String>,
    http_connect_timeout: Duration,
    http_total_timeout: Duration,
    log_format: LogFormat,
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("missing environment variable: {0}")]
    Missing(&'static str),
    #[error("invalid value for {name}: {source}")]
    Invalid {
        name: &'static str,
        #[source]
        source: anyhow::Error,
    },
}

impl Config {
    /// 環境変数から設定値を読み込み、検証する。
    ///
    /// # Errors
    /// `CELL_ANNOTATOR_HOME` と `HOME` がどちらも未設定、もしくは各種値のパースに失敗した場合は [`ConfigError`] を返す。
    pub fn from_env() -> Result<Self, ConfigError> {
        let home = match env::var_os("CELL_ANNOTATOR_HOME") {
            Some(home) => PathBuf::from(home),
            None => env::var_os("HOME")
                .map(|home| PathBuf::from(home).join(".cell-annotator"))
                .ok_or(ConfigError::Missing("CELL_ANNOTATOR_HOME"))?,
        };
        let models_url = env::var("CELL_ANNOTATOR_MODELS_URL")
            .ok()
            .filter(|url| !url.trim().is_empty());
        if let Some(url) = &models_url {
            if !(url.starts_with("http://") || url.starts_with("https://")) {
                return Err(ConfigError::Invalid {
                    name: "CELL_ANNOTATOR_MODELS_URL",
                    source: anyhow::anyhow!("expected an http(s) URL, got `{url}`"),
                });
            }
        }

        let http_connect_timeout =
            parse_duration_ms("CELL_ANNOTATOR_HTTP_CONNECT_TIMEOUT_MS", 3000)?;
        let http_total_timeout = parse_duration_ms("CELL_ANNOTATOR_HTTP_TOTAL_TIMEOUT_MS", 60000)?;
        let log_format = parse_log_format("CELL_ANNOTATOR_LOG_FORMAT")?;

        Ok(Self {
            home,
            models_url,
            http_connect_timeout,
            http_total_timeout,
            log_format,
        })
    }

    /// モデル保存先のルート。
    #[must_use]
    pub fn home(&self) -> &PathBuf {
        &self.home
    }

    #[must_use]
    pub fn models_url(&self) -> Option<&str> {
        self.models_url.as_deref()
    }

    #[must_use]
    pub fn http_connect_timeout(&self) -> Duration {
        self.http_connect_timeout
    }

    #[must_use]
    pub fn http_total_timeout(&self) -> Duration {
        self.http_total_timeout
    }

    #[must_use]
    pub fn log_format(&self) -> LogFormat {
        self.log_format
    }
}

fn parse_duration_ms(name: &'static str, default_ms: u64) -> Result<Duration, ConfigError> {
    let raw = env::var(name).unwrap_or_else(|_| default_ms.to_string());
    let ms = raw.parse::<u64>().map_err(|error| ConfigError::Invalid {
        name,
        source: anyhow::Error::new(error),
    })?;
    if ms == 0 {
        return Err(ConfigError::Invalid {
            name,
            source: anyhow::anyhow!("timeout must be greater than zero"),
        });
    }
    Ok(Duration::from_millis(ms))
}

fn parse_log_format(name: &'static str) -> Result<LogFormat, ConfigError> {
    match env::var(name) {
        Ok(raw) => raw
            .parse::<LogFormat>()
            .map_err(|source| ConfigError::Invalid { name, source }),
        Err(_) => Ok(LogFormat::default()),
    }
}
