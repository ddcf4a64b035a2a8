use anyhow::Context;
use clap::Parser;
use tracing::error;

use cell_annotator::{cli::Cli, config::Config, observability};

fn main() -> anyhow::Result<()> {
    std::panic::set_hook(Box::new(|panic_info| {
        let message = panic_info
            .payload()
            .downcast_ref::<&str>()
            .copied()
            .or_else(|| {
                panic_info
                    .payload()
                    .downcast_ref::<String>()
                    .map(String::as_str)
            })
            .unwrap_or("unknown panic payload");

        if let Some(location) = panic_info.location() {
            error!(
                file = location.file(),
                line = location.line(),
                message,
                "panic occurred"
            );
        } else {
            error!(message, "panic occurred without location information");
        }
    }));

    let cli = Cli::parse();
    let config = Config::from_env().context("failed to load configuration")?;
    observability::init(config.log_format()).context("failed to initialize tracing")?;
    cell_annotator::cli::run(cli, &config)
}
