use std::fs::{self, File};
use std::io::{self, Read, Write};
use std::path::Path;

use tracing::debug;

use crate::error::{Error, Result};
use crate::format::{ArchiveFormat, TarCompress, detect_from_path};

const S_IFMT: u32 = 0o170000;
const S_IFLNK: u32 = 0o120000;

/// Turns a freshly downloaded file at `source` into the artifact stored at
/// `destination`, returning the artifact's size in bytes. `source` is gone
/// afterwards, whether or not the transform succeeded.
pub trait Transformer: Send + Sync {
    fn transform(&self, source: &Path, destination: &Path) -> Result<u64>;
}

impl<F> Transformer for F
where
    F: Fn(&Path, &Path) -> Result<u64> + Send + Sync,
{
    fn transform(&self, source: &Path, destination: &Path) -> Result<u64> {
        self(source, destination)
    }
}

/// Move `source` to `destination` unchanged.
pub fn noop_transform(source: &Path, destination: &Path) -> Result<u64> {
    fs::rename(source, destination)?;
    Ok(fs::metadata(destination)?.len())
}

/// Normalize `source` into an uncompressed tar at `destination`.
///
/// A plain tar is moved as-is, gzip is decompressed, and a zip is re-packed
/// entry by entry (symlinks included). Anything else fails with
/// [`Error::UnknownArchiveFormat`].
pub fn tar_transform(source: &Path, destination: &Path) -> Result<u64> {
    let result = detect_from_path(source)
        .map_err(Error::from)
        .and_then(|format| match format {
            Some(ArchiveFormat::Tar(TarCompress::None)) => {
                fs::rename(source, destination).map_err(Error::from)
            }
            Some(ArchiveFormat::Tar(codec)) => gunzip(source, destination, codec),
            Some(ArchiveFormat::Zip) => repack_zip(source, destination),
            None => Err(Error::UnknownArchiveFormat),
        });

    if let Err(e) = fs::remove_file(source)
        && e.kind() != io::ErrorKind::NotFound
    {
        debug!(path = ?source, error = %e, "failed to remove transform source");
    }

    result?;
    Ok(fs::metadata(destination)?.len())
}

fn gunzip(source: &Path, destination: &Path, codec: TarCompress) -> Result<()> {
    let mut decoder = codec.decoder(File::open(source)?);
    let mut output = File::create(destination)?;
    io::copy(&mut decoder, &mut output)?;
    output.flush()?;
    Ok(())
}

fn repack_zip(source: &Path, destination: &Path) -> Result<()> {
    let mut archive = zip::ZipArchive::new(File::open(source)?).map_err(|_| Error::Corrupted)?;
    let mut builder = tar::Builder::new(File::create(destination)?);

    for index in 0..archive.len() {
        let mut file = archive.by_index(index).map_err(|_| Error::Corrupted)?;
        let path = file.enclosed_name().ok_or(Error::InvalidPath)?;
        let unix_mode = file.unix_mode();

        let mut header = tar::Header::new_gnu();
        header.set_mode(unix_mode.map(|m| m & 0o7777).unwrap_or(if file.is_dir() {
            0o755
        } else {
            0o644
        }));

        if file.is_dir() {
            header.set_entry_type(tar::EntryType::Directory);
            header.set_size(0);
            builder.append_data(&mut header, &path, io::empty())?;
        } else if unix_mode.is_some_and(|m| m & S_IFMT == S_IFLNK) {
            let mut target = String::new();
            file.read_to_string(&mut target)?;
            header.set_entry_type(tar::EntryType::Symlink);
            header.set_size(0);
            builder.append_link(&mut header, &path, target)?;
        } else {
            header.set_entry_type(tar::EntryType::Regular);
            header.set_size(file.size());
            builder.append_data(&mut header, &path, &mut file)?;
        }
    }

    let mut output = builder.into_inner()?;
    output.flush()?;
    Ok(())
}
