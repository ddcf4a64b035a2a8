use anyhow::{Error, Result};
use once_cell::sync::OnceCell;
use tracing::debug;
use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

use crate::config::LogFormat;

static TRACING_INIT: OnceCell<()> = OnceCell::new();

/// Tracing サブスクライバを一度だけ初期化する。
///
/// フィルタは `RUST_LOG`（未設定なら `info`）。ログは標準エラーへ出力し、
/// 標準出力はコマンドの結果表示に残す。
///
/// # Errors
/// サブスクライバの初期化に失敗した場合はエラーを返す。
pub fn init(format: LogFormat) -> Result<()> {
    TRACING_INIT.get_or_try_init(|| {
        let env_filter =
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
        let fmt_layer = tracing_subscriber::fmt::layer()
            .with_target(false)
            .with_writer(std::io::stderr);

        let registry = tracing_subscriber::registry().with(env_filter);
        match format {
            LogFormat::Json => registry.with(fmt_layer.json()).try_init(),
            LogFormat::Text => registry.with(fmt_layer).try_init(),
        }
        .map_err(|e: tracing_subscriber::util::TryInitError| Error::msg(e.to_string()))?;

        debug!(?format, "tracing initialized");
        Ok::<(), Error>(())
    })?;
    Ok(())
}
