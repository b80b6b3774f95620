use std::fs;
use std::io;
use std::path::Path;

use anyhow::{Context, Result};
use depot::{CachedDownloader, Checksum, Config, HttpClient};
use tokio_util::sync::CancellationToken;
use tracing::info;

use super::app::{Commands, FetchArg};

pub fn load_config(path: Option<&Path>) -> Result<Config> {
    match path {
        Some(path) => Config::from_toml_file(path)
            .with_context(|| format!("Failed to load config from {}", path.display())),
        None => Ok(Config::new()),
    }
}

/// Run one command against a downloader whose state has been recovered,
/// saving the table afterwards whether or not the command succeeded.
pub async fn run<C: HttpClient>(
    downloader: &CachedDownloader<C>,
    cmd: Commands,
    cancel: &CancellationToken,
) -> Result<()> {
    downloader
        .recover_state()
        .context("Failed to recover cache state")?;

    let result = match cmd {
        Commands::Fetch(arg) => fetch(downloader, arg, cancel).await,
        Commands::FetchDir(arg) => fetch_dir(downloader, arg, cancel).await,
        Commands::Prune => {
            downloader.prune();
            Ok(())
        }
    };

    let (used, entries) = downloader.cache().usage();
    info!(used, entries, max = downloader.cache().max_size(), "cache usage");

    downloader
        .save_state()
        .context("Failed to save cache state")?;
    result
}

async fn fetch<C: HttpClient>(
    downloader: &CachedDownloader<C>,
    arg: FetchArg,
    cancel: &CancellationToken,
) -> Result<()> {
    let checksum = arg.checksum.unwrap_or_default();
    let (mut file, bytes) = downloader
        .fetch(&arg.url, &arg.key, &checksum, cancel)
        .await
        .with_context(|| format!("Failed to fetch {}", arg.url))?;
    info!(url = %arg.url, bytes, path = %file.path().display(), "fetched");

    match arg.output {
        Some(output) => {
            let mut out = fs::File::create(&output)
                .with_context(|| format!("Failed to create {}", output.display()))?;
            io::copy(&mut file, &mut out)?;
            println!("{}", output.display());
        }
        None => println!("{}", file.path().display()),
    }
    file.close()?;
    Ok(())
}

async fn fetch_dir<C: HttpClient>(
    downloader: &CachedDownloader<C>,
    arg: FetchArg,
    cancel: &CancellationToken,
) -> Result<()> {
    let checksum: Checksum = arg.checksum.unwrap_or_default();
    let (dir, bytes) = downloader
        .fetch_as_directory(&arg.url, &arg.key, &checksum, cancel)
        .await
        .with_context(|| format!("Failed to fetch {}", arg.url))?;
    info!(url = %arg.url, bytes, path = %dir.display(), "fetched directory");

    let copied = match &arg.output {
        Some(output) => copy_tree(&dir, output)
            .with_context(|| format!("Failed to copy into {}", output.display())),
        None => {
            println!("{}", dir.display());
            Ok(())
        }
    };
    downloader.close_directory(&arg.key, &dir)?;
    copied?;
    if let Some(output) = arg.output {
        println!("{}", output.display());
    }
    Ok(())
}

fn copy_tree(from: &Path, to: &Path) -> io::Result<()> {
    fs::create_dir_all(to)?;
    for entry in fs::read_dir(from)? {
        let entry = entry?;
        let target = to.join(entry.file_name());
        let file_type = entry.file_type()?;
        if file_type.is_dir() {
            copy_tree(&entry.path(), &target)?;
        } else if file_type.is_symlink() {
            #[cfg(unix)]
            std::os::unix::fs::symlink(fs::read_link(entry.path())?, &target)?;
        } else {
            fs::copy(entry.path(), &target)?;
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_config_falls_back_to_defaults() {
        assert_eq!(load_config(None).unwrap(), Config::new());
    }

    #[test]
    fn bad_config_path_is_reported() {
        let err = load_config(Some(Path::new("/nonexistent/depot.toml"))).unwrap_err();
        assert!(err.to_string().contains("/nonexistent/depot.toml"));
    }

    #[test]
    fn copies_nested_trees() {
        let scratch = tempfile::tempdir().unwrap();
        let from = scratch.path().join("from");
        fs::create_dir_all(from.join("bin")).unwrap();
        fs::write(from.join("bin/run"), "echo").unwrap();
        fs::write(from.join("README"), "docs").unwrap();

        let to = scratch.path().join("to");
        copy_tree(&from, &to).unwrap();

        assert_eq!(fs::read_to_string(to.join("bin/run")).unwrap(), "echo");
        assert_eq!(fs::read_to_string(to.join("README")).unwrap(), "docs");
    }
}
