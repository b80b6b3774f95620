use std::fs::{self, File};
use std::io::Write;
use std::path::Path;

use depot_archive::{
    ArchiveFormat, Error, TarCompress, Transformer, detect_from_path, extract_tar_to_directory,
    noop_transform, tar_transform,
};

struct ArchiveFile<'a> {
    name: &'a str,
    body: &'a str,
    link: Option<&'a str>,
}

const FILES: &[ArchiveFile<'static>] = &[
    ArchiveFile { name: "some-file", body: "some-contents", link: None },
    ArchiveFile { name: "some-symlink", body: "", link: Some("some-symlink-target") },
    ArchiveFile { name: "some-symlink-target", body: "some-other-contents", link: None },
];

fn append_files<W: Write>(builder: &mut tar::Builder<W>) {
    for file in FILES {
        let mut header = tar::Header::new_gnu();
        header.set_mode(0o644);
        match file.link {
            Some(target) => {
                header.set_entry_type(tar::EntryType::Symlink);
                header.set_size(0);
                builder.append_link(&mut header, file.name, target).unwrap();
            }
            None => {
                header.set_entry_type(tar::EntryType::Regular);
                header.set_size(file.body.len() as u64);
                builder.append_data(&mut header, file.name, file.body.as_bytes()).unwrap();
            }
        }
    }
}

fn create_tar(path: &Path) {
    let mut builder = tar::Builder::new(File::create(path).unwrap());
    append_files(&mut builder);
    builder.finish().unwrap();
}

fn create_tar_gz(path: &Path) {
    let encoder = flate2::write::GzEncoder::new(File::create(path).unwrap(), flate2::Compression::default());
    let mut builder = tar::Builder::new(encoder);
    append_files(&mut builder);
    builder.into_inner().unwrap().finish().unwrap();
}

fn create_zip(path: &Path) {
    let mut writer = zip::ZipWriter::new(File::create(path).unwrap());
    let options = zip::write::SimpleFileOptions::default()
        .compression_method(zip::CompressionMethod::Deflated)
        .unix_permissions(0o644);
    for file in FILES {
        match file.link {
            Some(target) => writer.add_symlink(file.name, target, options).unwrap(),
            None => {
                writer.start_file(file.name, options).unwrap();
                writer.write_all(file.body.as_bytes()).unwrap();
            }
        }
    }
    writer.finish().unwrap();
}

/// The first entry of the produced tar is `some-file` with its full body.
fn verify_tar_file(path: &Path) {
    let mut archive = tar::Archive::new(File::open(path).unwrap());
    let entry = archive.entries().unwrap().next().unwrap().unwrap();
    assert_eq!(entry.path().unwrap(), Path::new("some-file"));
    assert_eq!(entry.header().size().unwrap(), "some-contents".len() as u64);
}

fn assert_transformed(source: &Path, destination: &Path, size: u64) {
    verify_tar_file(destination);
    assert!(!source.exists(), "source should be removed");
    assert_eq!(size, fs::metadata(destination).unwrap().len());
}

#[test]
fn tar_is_moved_as_is() {
    let scratch = tempfile::tempdir().unwrap();
    let source = scratch.path().join("file.tar");
    let destination = scratch.path().join("destination");
    File::create(&destination).unwrap();
    create_tar(&source);
    let original = fs::read(&source).unwrap();

    let size = tar_transform(&source, &destination).unwrap();

    assert_transformed(&source, &destination, size);
    assert_eq!(fs::read(&destination).unwrap(), original);
}

#[test]
fn tar_gz_is_decompressed() {
    let scratch = tempfile::tempdir().unwrap();
    let source = scratch.path().join("file.tar.gz");
    let destination = scratch.path().join("destination");
    create_tar_gz(&source);

    let size = tar_transform(&source, &destination).unwrap();

    assert_transformed(&source, &destination, size);
}

#[test]
fn zip_is_repacked_with_symlinks() {
    let scratch = tempfile::tempdir().unwrap();
    let source = scratch.path().join("file.zip");
    let destination = scratch.path().join("destination");
    create_zip(&source);

    let size = tar_transform(&source, &destination).unwrap();
    assert_transformed(&source, &destination, size);

    let mut archive = tar::Archive::new(File::open(&destination).unwrap());
    let link = archive
        .entries()
        .unwrap()
        .map(|e| e.unwrap())
        .find(|e| e.path().unwrap() == Path::new("some-symlink"))
        .unwrap();
    assert!(link.header().entry_type().is_symlink());
    assert_eq!(link.link_name().unwrap().unwrap(), Path::new("some-symlink-target"));
}

#[test]
fn unknown_format_is_rejected() {
    let scratch = tempfile::tempdir().unwrap();
    let source = scratch.path().join("bogus");
    let destination = scratch.path().join("destination");
    fs::write(&source, b"bogus").unwrap();

    let err = tar_transform(&source, &destination).unwrap_err();
    assert!(matches!(err, Error::UnknownArchiveFormat));
    assert!(!source.exists());
}

#[test]
fn noop_moves_and_reports_size() {
    let scratch = tempfile::tempdir().unwrap();
    let source = scratch.path().join("download");
    let destination = scratch.path().join("stored");
    fs::write(&source, b"twelve bytes").unwrap();

    let size = noop_transform(&source, &destination).unwrap();

    assert_eq!(size, 12);
    assert!(!source.exists());
    assert_eq!(fs::read(&destination).unwrap(), b"twelve bytes");
}

#[test]
fn closures_are_transformers() {
    let scratch = tempfile::tempdir().unwrap();
    let source = scratch.path().join("download");
    let destination = scratch.path().join("stored");
    fs::write(&source, b"abc").unwrap();

    let upper = |src: &Path, dst: &Path| -> depot_archive::Result<u64> {
        let body = fs::read(src)?.to_ascii_uppercase();
        fs::write(dst, &body)?;
        fs::remove_file(src)?;
        Ok(body.len() as u64)
    };
    let transformer: &dyn Transformer = &upper;

    assert_eq!(transformer.transform(&source, &destination).unwrap(), 3);
    assert_eq!(fs::read(&destination).unwrap(), b"ABC");
}

#[test]
fn transformed_archives_expand() {
    let scratch = tempfile::tempdir().unwrap();
    let source = scratch.path().join("file.zip");
    let normalized = scratch.path().join("normalized.tar");
    create_zip(&source);
    tar_transform(&source, &normalized).unwrap();
    assert_eq!(
        detect_from_path(&normalized).unwrap(),
        Some(ArchiveFormat::Tar(TarCompress::None))
    );

    let out = scratch.path().join("expanded");
    extract_tar_to_directory(&normalized, &out).unwrap();

    assert_eq!(fs::read_to_string(out.join("some-file")).unwrap(), "some-contents");
    assert_eq!(
        fs::read_to_string(out.join("some-symlink-target")).unwrap(),
        "some-other-contents"
    );
    #[cfg(unix)]
    assert_eq!(
        fs::read_to_string(out.join("some-symlink")).unwrap(),
        "some-other-contents"
    );
}
