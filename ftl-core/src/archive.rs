//! Artifact extraction
//!
//! Downloaded artifacts are unpacked in place inside the revision directory,
//! picked by file extension. Archives are removed once unpacked; anything not
//! recognised is left untouched.

use flate2::read::GzDecoder;
use std::fs::{self, File};
use std::io::{self, BufReader, Read};
use std::path::Path;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArchiveKind {
    TarGz,
    TarZst,
    Tar,
    Gz,
    Zst,
    Plain,
}

impl ArchiveKind {
    pub fn detect(file_name: &str) -> Self {
        if file_name.ends_with(".tar.gz") || file_name.ends_with(".tgz") {
            ArchiveKind::TarGz
        } else if file_name.ends_with(".tar.zst") {
            ArchiveKind::TarZst
        } else if file_name.ends_with(".tar") {
            ArchiveKind::Tar
        } else if file_name.ends_with(".gz") {
            ArchiveKind::Gz
        } else if file_name.ends_with(".zst") {
            ArchiveKind::Zst
        } else {
            ArchiveKind::Plain
        }
    }
}

/// Unpack `dir/file_name` into `dir` according to its extension.
pub fn extract(dir: &Path, file_name: &str) -> io::Result<ArchiveKind> {
    let kind = ArchiveKind::detect(file_name);
    let path = dir.join(file_name);

    match kind {
        ArchiveKind::Plain => return Ok(kind),
        ArchiveKind::TarGz => untar(GzDecoder::new(open(&path)?), dir)?,
        ArchiveKind::TarZst => untar(zstd::stream::read::Decoder::new(open(&path)?)?, dir)?,
        ArchiveKind::Tar => untar(open(&path)?, dir)?,
        ArchiveKind::Gz => decompress_to(GzDecoder::new(open(&path)?), dir, file_name, ".gz")?,
        ArchiveKind::Zst => decompress_to(
            zstd::stream::read::Decoder::new(open(&path)?)?,
            dir,
            file_name,
            ".zst",
        )?,
    }

    fs::remove_file(&path)?;
    tracing::debug!("Extracted {} ({:?})", path.display(), kind);
    Ok(kind)
}

fn open(path: &Path) -> io::Result<BufReader<File>> {
    Ok(BufReader::new(File::open(path)?))
}

fn untar<R: Read>(reader: R, dir: &Path) -> io::Result<()> {
    let mut archive = tar::Archive::new(reader);
    archive.set_preserve_permissions(true);
    archive.unpack(dir)
}

fn decompress_to<R: Read>(
    mut reader: R,
    dir: &Path,
    file_name: &str,
    suffix: &str,
) -> io::Result<()> {
    let target = file_name.strip_suffix(suffix).unwrap_or(file_name);
    let mut out = File::create(dir.join(target))?;
    io::copy(&mut reader, &mut out)?;
    Ok(())
}
