//! Bundle packaging.
//!
//! Packs a bundle directory into a single zip archive and unpacks it again.
//! Entry names are relative to the bundle root's parent, so every entry
//! starts with the root directory name:
//!
//! ```text
//! lecture-42/index.xml
//! lecture-42/tracks/track-1/video.mp4
//! lecture-42/metadata/catalog-1/dublincore.xml
//! ```
//!
//! A CRC-32 is computed for each entry on the way in and checked on the way
//! out. A failed pack or unpack leaves no usable output behind.

use std::fmt;
use std::fs::{self, File};
use std::io::{Read, Seek, Write};
use std::path::{Component, Path, PathBuf};
use std::str::FromStr;

use serde::Serialize;
use tracing::{debug, info, warn};
use walkdir::WalkDir;
use zip::write::FileOptions;
use zip::{CompressionMethod, ZipArchive, ZipWriter};

use crate::bundle::{Bundle, LOCK_FILENAME};
use crate::error::{BundleError, BundleResult};

/// Buffer size for streaming entry data (64KB).
const BUFFER_SIZE: usize = 64 * 1024;

/// Serializes bundles to and from an archive stream.
pub trait BundlePackager {
    /// Write every file of `bundle` into `output`.
    fn pack<W: Write + Seek>(&self, bundle: &Bundle, output: W) -> BundleResult<PackReport>;

    /// Extract an archive into `work_dir` and return the bundle root.
    fn unpack<R: Read + Seek>(&self, input: R, work_dir: &Path) -> BundleResult<PathBuf>;
}

/// Result of packing a bundle.
#[derive(Debug, Clone, Default, Serialize)]
pub struct PackReport {
    /// Name of the root directory inside the archive.
    pub root: String,

    /// Files written, in archive order.
    pub entries: Vec<PackEntry>,
}

impl PackReport {
    /// Uncompressed size of all entries in bytes.
    pub fn total_size(&self) -> u64 {
        self.entries.iter().map(|e| e.size).sum()
    }
}

/// A single file entry of a packed bundle.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PackEntry {
    /// Entry name, e.g. `lecture-42/index.xml`.
    pub name: String,

    /// Uncompressed size in bytes.
    pub size: u64,

    /// CRC-32 of the uncompressed data.
    pub crc32: u32,
}

/// Entry compression.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Compression {
    Stored,
    #[default]
    Deflated,
}

impl Compression {
    pub fn as_str(&self) -> &'static str {
        match self {
            Compression::Stored => "stored",
            Compression::Deflated => "deflated",
        }
    }

    fn method(&self) -> CompressionMethod {
        match self {
            Compression::Stored => CompressionMethod::Stored,
            Compression::Deflated => CompressionMethod::Deflated,
        }
    }
}

impl fmt::Display for Compression {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Compression {
    type Err = BundleError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "stored" | "none" => Ok(Compression::Stored),
            "deflated" | "deflate" => Ok(Compression::Deflated),
            other => Err(BundleError::InvalidConfig(format!(
                "unknown compression '{}'",
                other
            ))),
        }
    }
}

/// Zip based packager.
#[derive(Debug, Clone, Copy, Default)]
pub struct ZipPackager {
    compression: Compression,
}

impl ZipPackager {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_compression(mut self, compression: Compression) -> Self {
        self.compression = compression;
        self
    }

    pub fn compression(&self) -> Compression {
        self.compression
    }
}

impl BundlePackager for ZipPackager {
    fn pack<W: Write + Seek>(&self, bundle: &Bundle, output: W) -> BundleResult<PackReport> {
        let root = bundle.root();
        let root_name = root
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .ok_or_else(|| BundleError::Archive(format!("{} has no name", root.display())))?;
        if bundle.manifest().is_dirty() {
            warn!(root = %root.display(), "Packing bundle with unsaved manifest changes");
        }

        let options = FileOptions::default().compression_method(self.compression.method());
        let mut zip = ZipWriter::new(output);
        let mut report = PackReport {
            root: root_name.clone(),
            entries: Vec::new(),
        };

        zip.add_directory(format!("{}/", root_name), options)
            .map_err(archive_error)?;

        for entry in WalkDir::new(root).min_depth(1).sort_by_file_name() {
            let entry = entry.map_err(|e| {
                let path = e.path().unwrap_or(root).to_path_buf();
                BundleError::read(path, e.into())
            })?;
            let relative = entry
                .path()
                .strip_prefix(root)
                .map_err(|_| BundleError::Archive(format!("{} escapes the bundle", entry.path().display())))?;
            if relative.as_os_str() == LOCK_FILENAME {
                continue;
            }
            let name = entry_name(&root_name, relative);

            if entry.file_type().is_dir() {
                zip.add_directory(format!("{}/", name), options)
                    .map_err(archive_error)?;
                continue;
            }

            let len = entry
                .metadata()
                .map(|m| m.len())
                .map_err(|e| BundleError::read(entry.path(), e.into()))?;
            let file_options = options.large_file(len >= u64::from(u32::MAX));
            zip.start_file(name.clone(), file_options)
                .map_err(archive_error)?;
            let (size, crc32) = copy_with_crc(entry.path(), &mut zip)?;
            debug!(entry = %name, size, crc32, "Packed entry");
            report.entries.push(PackEntry { name, size, crc32 });
        }

        zip.finish().map_err(archive_error)?;
        info!(
            root = %root.display(),
            entries = report.entries.len(),
            bytes = report.total_size(),
            "Bundle packed"
        );
        Ok(report)
    }

    fn unpack<R: Read + Seek>(&self, input: R, work_dir: &Path) -> BundleResult<PathBuf> {
        let mut archive = ZipArchive::new(input).map_err(archive_error)?;

        let mut root_name: Option<String> = None;
        for i in 0..archive.len() {
            let entry = archive.by_index(i).map_err(archive_error)?;
            let path = safe_entry_path(entry.name(), entry.enclosed_name())?;
            let first = match path.components().next() {
                Some(Component::Normal(first)) => first.to_string_lossy().into_owned(),
                _ => return Err(BundleError::Archive(format!("invalid entry '{}'", entry.name()))),
            };
            match &root_name {
                Some(root) if *root != first => {
                    return Err(BundleError::Archive(format!(
                        "entries do not share a common root ('{}' and '{}')",
                        root, first
                    )));
                }
                Some(_) => {}
                None => root_name = Some(first),
            }
        }
        let root_name = root_name.ok_or_else(|| BundleError::Archive("archive is empty".to_string()))?;

        let root = work_dir.join(&root_name);
        if root.exists() {
            return Err(BundleError::AlreadyExists(root));
        }
        fs::create_dir_all(work_dir).map_err(|e| BundleError::create_dir(work_dir, e))?;

        if let Err(e) = extract_all(&mut archive, work_dir) {
            let _ = fs::remove_dir_all(&root);
            return Err(e);
        }
        info!(root = %root.display(), entries = archive.len(), "Bundle unpacked");
        Ok(root)
    }
}

fn extract_all<R: Read + Seek>(archive: &mut ZipArchive<R>, work_dir: &Path) -> BundleResult<()> {
    for i in 0..archive.len() {
        let mut entry = archive.by_index(i).map_err(archive_error)?;
        let relative = safe_entry_path(entry.name(), entry.enclosed_name())?;
        let target = work_dir.join(relative);

        if entry.is_dir() {
            fs::create_dir_all(&target).map_err(|e| BundleError::create_dir(&target, e))?;
            continue;
        }
        if let Some(parent) = target.parent() {
            fs::create_dir_all(parent).map_err(|e| BundleError::create_dir(parent, e))?;
        }

        let expected = entry.crc32();
        let mut file = File::create(&target).map_err(|e| BundleError::write(&target, e))?;
        let mut hasher = crc32fast::Hasher::new();
        let mut buffer = vec![0u8; BUFFER_SIZE];
        loop {
            let n = entry
                .read(&mut buffer)
                .map_err(|e| BundleError::Archive(format!("failed to read '{}': {}", entry.name(), e)))?;
            if n == 0 {
                break;
            }
            hasher.update(&buffer[..n]);
            file.write_all(&buffer[..n])
                .map_err(|e| BundleError::write(&target, e))?;
        }
        let actual = hasher.finalize();
        if actual != expected {
            return Err(BundleError::Archive(format!(
                "CRC mismatch for '{}': expected {:08x}, got {:08x}",
                entry.name(),
                expected,
                actual
            )));
        }
        debug!(entry = %entry.name(), crc32 = actual, "Extracted entry");
    }
    Ok(())
}

/// Reject entries that would land outside the work directory.
fn safe_entry_path(name: &str, enclosed: Option<&Path>) -> BundleResult<PathBuf> {
    enclosed
        .map(Path::to_path_buf)
        .ok_or_else(|| BundleError::Archive(format!("entry '{}' escapes the archive root", name)))
}

fn entry_name(root_name: &str, relative: &Path) -> String {
    let mut name = root_name.to_string();
    for component in relative.components() {
        name.push('/');
        name.push_str(&component.as_os_str().to_string_lossy());
    }
    name
}

fn copy_with_crc<W: Write>(path: &Path, out: &mut W) -> BundleResult<(u64, u32)> {
    let mut file = File::open(path).map_err(|e| BundleError::read(path, e))?;
    let mut hasher = crc32fast::Hasher::new();
    let mut buffer = vec![0u8; BUFFER_SIZE];
    let mut size = 0u64;
    loop {
        let n = file.read(&mut buffer).map_err(|e| BundleError::read(path, e))?;
        if n == 0 {
            break;
        }
        hasher.update(&buffer[..n]);
        out.write_all(&buffer[..n])
            .map_err(|e| BundleError::Archive(format!("failed to write {}: {}", path.display(), e)))?;
        size += n as u64;
    }
    Ok((size, hasher.finalize()))
}

fn archive_error(e: zip::result::ZipError) -> BundleError {
    BundleError::Archive(e.to_string())
}
