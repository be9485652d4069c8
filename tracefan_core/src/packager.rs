use std::fs::{self, File};
use std::io::{BufReader, BufWriter};
use std::path::{Path, PathBuf};
use thiserror::Error;
use zip::CompressionMethod;
use zip::write::{FileOptions, ZipWriter};

pub const PACKAGE_EXTENSION: &str = "zip";

#[derive(Error, Debug)]
pub enum PackagingError {
    #[error("Packaging I/O error at {path:?}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("Zip error for {path:?}: {source}")]
    Zip {
        path: PathBuf,
        source: zip::result::ZipError,
    },
    #[error("Artifact path {0:?} has no file name")]
    NoFileName(PathBuf),
}

/// Replaces `artifact` by `<artifact>.zip`, a bzip2-compressed archive holding
/// the artifact under its base name.
///
/// The original is removed only once the archive is complete. On failure the
/// partial archive is removed and the original left in place.
pub fn package(artifact: &Path) -> Result<PathBuf, PackagingError> {
    let file_name = artifact
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .ok_or_else(|| PackagingError::NoFileName(artifact.to_path_buf()))?;
    let archive_path = PathBuf::from(format!("{}.{PACKAGE_EXTENSION}", artifact.display()));

    if let Err(e) = write_archive(artifact, &archive_path, &file_name) {
        let _ = fs::remove_file(&archive_path);
        return Err(e);
    }

    fs::remove_file(artifact).map_err(|source| PackagingError::Io {
        path: artifact.to_path_buf(),
        source,
    })?;
    Ok(archive_path)
}

fn write_archive(src: &Path, dst: &Path, entry_name: &str) -> Result<(), PackagingError> {
    let io_err = |path: &Path| {
        let path = path.to_path_buf();
        move |source| PackagingError::Io { path, source }
    };
    let zip_err = |source| PackagingError::Zip {
        path: dst.to_path_buf(),
        source,
    };

    let mut reader = BufReader::new(File::open(src).map_err(io_err(src))?);
    let out = File::create(dst).map_err(io_err(dst))?;
    let mut zip = ZipWriter::new(BufWriter::new(out));
    let options = FileOptions::default()
        .compression_method(CompressionMethod::Bzip2)
        .large_file(true);
    zip.start_file(entry_name, options).map_err(zip_err)?;
    std::io::copy(&mut reader, &mut zip).map_err(io_err(dst))?;
    let writer = zip.finish().map_err(zip_err)?;
    let file = writer
        .into_inner()
        .map_err(|e| io_err(dst)(e.into_error()))?;
    file.sync_all().map_err(io_err(dst))
}
