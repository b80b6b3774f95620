use std::process::ExitCode;

use clap::Parser;
use depot::CachedDownloader;
use tokio_util::sync::CancellationToken;
use tracing::{error, warn};
use tracing_subscriber::EnvFilter;

mod cli;

use cli::app::App;

#[tokio::main]
async fn main() -> ExitCode {
    let app = App::parse();

    let default_level = if app.verbose { "debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    let cancel = CancellationToken::new();
    tokio::spawn({
        let cancel = cancel.clone();
        async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                warn!("interrupted, cancelling downloads");
                cancel.cancel();
            }
        }
    });

    match try_main(app, &cancel).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!("{e:#}");
            ExitCode::FAILURE
        }
    }
}

async fn try_main(app: App, cancel: &CancellationToken) -> anyhow::Result<()> {
    let config = cli::run::load_config(app.config.as_deref())?;
    let downloader = CachedDownloader::from_config(&config)?;
    cli::run::run(&downloader, app.cmd, cancel).await
}
