use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};
use depot::Checksum;
use url::Url;

#[derive(Clone, Debug, Parser)]
#[command(name = "depot", version = env!("CARGO_PKG_VERSION"), about, long_about = None, propagate_version = true)]
pub struct App {
    /// TOML file with cache and transport settings
    #[arg(short, long, global = true)]
    pub config: Option<PathBuf>,

    /// Enable debug logging (overridden by RUST_LOG)
    #[arg(short, long, global = true)]
    pub verbose: bool,

    #[command(subcommand)]
    pub cmd: Commands,
}

#[derive(Clone, Debug, Subcommand)]
pub enum Commands {
    #[command(alias = "f", name = "fetch", about = "Download a file through the cache")]
    Fetch(FetchArg),
    #[command(alias = "d", name = "fetch-dir", about = "Download an archive and expand it in the cache")]
    FetchDir(FetchArg),
    #[command(name = "prune", about = "Evict entries until the cache fits its budget")]
    Prune,
}

#[derive(Args, Clone, Debug)]
pub struct FetchArg {
    pub url: Url,

    /// Cache key; omit to bypass the cache
    #[arg(short, long, default_value = "")]
    pub key: String,

    /// Expected digest as `algorithm:hex`, e.g. `sha256:ab12...`
    #[arg(long)]
    pub checksum: Option<Checksum>,

    /// Copy the result here
    #[arg(short, long)]
    pub output: Option<PathBuf>,
}
