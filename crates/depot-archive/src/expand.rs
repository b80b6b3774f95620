use std::fs::{self, File};
use std::io;
use std::path::{Path, PathBuf};

use tracing::debug;

use crate::error::{Error, Result};
use crate::sanitize::{sanitize_path, sanitize_symlink_target};

/// Expand the uncompressed tar at `source` into `destination`, creating it
/// if needed. Every entry must resolve inside `destination`.
pub fn extract_tar_to_directory(source: &Path, destination: &Path) -> Result<()> {
    fs::create_dir_all(destination).map_err(|source| Error::DirectoryCreationFailed {
        path: destination.to_path_buf(),
        source,
    })?;

    let mut archive = tar::Archive::new(File::open(source)?);
    let mut directories: Vec<(PathBuf, u32)> = Vec::new();

    for entry in archive.entries().map_err(|_| Error::Corrupted)? {
        let mut entry = entry.map_err(|_| Error::Corrupted)?;
        let raw_path = entry.path().map_err(|_| Error::InvalidPath)?.into_owned();
        let target = sanitize_path(&raw_path, destination)?.resolved;
        let mode = entry.header().mode().ok();
        let entry_type = entry.header().entry_type();

        if entry_type.is_dir() {
            create_dir(&target)?;
            if let Some(mode) = mode {
                directories.push((target, mode));
            }
        } else if entry_type.is_file() {
            create_parent(&target)?;
            let written = File::create(&target).and_then(|mut file| io::copy(&mut entry, &mut file));
            written.map_err(|source| Error::ExtractionFailed {
                path: target.clone(),
                source,
            })?;
            if let Some(mode) = mode {
                set_mode(&target, mode)?;
            }
        } else if entry_type.is_symlink() {
            let link = entry
                .link_name()
                .map_err(|_| Error::InvalidPath)?
                .ok_or(Error::InvalidPath)?
                .into_owned();
            sanitize_symlink_target(&link, &target, destination)?;
            create_parent(&target)?;
            symlink(&link, &target)?;
        } else if entry_type.is_hard_link() {
            let link = entry
                .link_name()
                .map_err(|_| Error::InvalidPath)?
                .ok_or(Error::InvalidPath)?
                .into_owned();
            let original = sanitize_path(&link, destination)?.resolved;
            create_parent(&target)?;
            fs::hard_link(&original, &target).map_err(|source| Error::ExtractionFailed {
                path: target.clone(),
                source,
            })?;
        } else {
            debug!(path = ?raw_path, kind = ?entry_type, "skipping unsupported tar entry");
        }
    }

    // Deepest first, so restrictive parent modes do not block children.
    directories.sort_by_key(|(path, _)| std::cmp::Reverse(path.components().count()));
    for (path, mode) in directories {
        set_mode(&path, mode)?;
    }

    Ok(())
}

fn create_dir(path: &Path) -> Result<()> {
    fs::create_dir_all(path).map_err(|source| Error::DirectoryCreationFailed {
        path: path.to_path_buf(),
        source,
    })
}

fn create_parent(path: &Path) -> Result<()> {
    match path.parent() {
        Some(parent) => create_dir(parent),
        None => Ok(()),
    }
}

#[cfg(unix)]
fn set_mode(path: &Path, mode: u32) -> Result<()> {
    use std::os::unix::fs::PermissionsExt;
    fs::set_permissions(path, fs::Permissions::from_mode(mode & 0o7777)).map_err(|source| {
        Error::ExtractionFailed {
            path: path.to_path_buf(),
            source,
        }
    })
}

#[cfg(not(unix))]
fn set_mode(_path: &Path, _mode: u32) -> Result<()> {
    Ok(())
}

#[cfg(unix)]
fn symlink(link: &Path, at: &Path) -> Result<()> {
    std::os::unix::fs::symlink(link, at).map_err(|source| Error::ExtractionFailed {
        path: at.to_path_buf(),
        source,
    })
}

#[cfg(not(unix))]
fn symlink(link: &Path, at: &Path) -> Result<()> {
    debug!(path = ?at, target = ?link, "symlinks are not materialized on this platform");
    Ok(())
}
