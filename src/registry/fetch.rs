use std::time::Duration;

use anyhow::{Context, Result};
use reqwest::blocking::Client;
use tracing::debug;

use crate::config::Config;

/// リモートからファイル本体を取得する。
pub trait Fetcher {
    /// `url` の内容をすべて読み込んで返す。
    ///
    /// # Errors
    /// 接続・ステータス・読み込みのいずれかに失敗した場合。
    fn fetch(&self, url: &str) -> Result<Vec<u8>>;
}

/// `reqwest` のブロッキングクライアントによる [`Fetcher`]。
#[derive(Debug, Clone)]
pub struct HttpFetcher {
    client: Client,
}

impl HttpFetcher {
    /// # Errors
    /// HTTP クライアントの構築に失敗した場合。
    pub fn new(connect_timeout: Duration, total_timeout: Duration) -> Result<Self> {
        let client = Client::builder()
            .connect_timeout(connect_timeout)
            .timeout(total_timeout)
            .user_agent(concat!(env!("CARGO_PKG_NAME"), "/", env!("CARGO_PKG_VERSION")))
            .build()
            .context("failed to build model registry HTTP client")?;
        Ok(Self { client })
    }

    /// # Errors
    /// HTTP クライアントの構築に失敗した場合。
    pub fn from_config(config: &Config) -> Result<Self> {
        Self::new(config.http_connect_timeout(), config.http_total_timeout())
    }
}

impl Fetcher for HttpFetcher {
    fn fetch(&self, url: &str) -> Result<Vec<u8>> {
        debug!(url, "fetching");
        let response = self
            .client
            .get(url)
            .send()
            .with_context(|| format!("request to {url} failed"))?
            .error_for_status()
            .with_context(|| format!("{url} returned an error status"))?;
        let body = response
            .bytes()
            .with_context(|| format!("failed to read response body from {url}"))?;
        Ok(body.to_vec())
    }
}
