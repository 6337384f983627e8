//! Common types and utilities shared across CLI commands.

use std::path::Path;

use clap::ValueEnum;
use mediabundle::{Bundle, BundleBuilder, BundleConfig, Compression, ElementKind, MergeMode};

use crate::error::CliError;

/// Element kind selection for CLI arguments.
#[derive(Debug, Clone, Copy, ValueEnum, PartialEq)]
pub enum KindArg {
    /// Media track (audio or video)
    Track,
    /// Metadata catalog
    Catalog,
    /// Any other attached file
    Attachment,
}

impl From<KindArg> for ElementKind {
    fn from(kind: KindArg) -> Self {
        match kind {
            KindArg::Track => ElementKind::Track,
            KindArg::Catalog => ElementKind::Catalog,
            KindArg::Attachment => ElementKind::Attachment,
        }
    }
}

/// Archive compression selection for CLI arguments.
#[derive(Debug, Clone, Copy, ValueEnum, PartialEq)]
pub enum CompressionArg {
    /// Store entries uncompressed
    Stored,
    /// Deflate every entry
    Deflated,
}

impl From<CompressionArg> for Compression {
    fn from(compression: CompressionArg) -> Self {
        match compression {
            CompressionArg::Stored => Compression::Stored,
            CompressionArg::Deflated => Compression::Deflated,
        }
    }
}

/// Conflict handling selection for `merge`.
#[derive(Debug, Clone, Copy, ValueEnum, PartialEq)]
pub enum MergeModeArg {
    /// Give conflicting source elements a fresh identifier
    Merge,
    /// Replace the target's element with the source's
    Replace,
    /// Keep the target's element
    Skip,
    /// Abort without touching the target
    Fail,
}

impl From<MergeModeArg> for MergeMode {
    fn from(mode: MergeModeArg) -> Self {
        match mode {
            MergeModeArg::Merge => MergeMode::Merge,
            MergeModeArg::Replace => MergeMode::Replace,
            MergeModeArg::Skip => MergeMode::Skip,
            MergeModeArg::Fail => MergeMode::Fail,
        }
    }
}

/// Builder configured from the settings file.
pub fn builder(config: &BundleConfig) -> BundleBuilder {
    BundleBuilder::from_config(config)
}

/// Strictly open the bundle at `path`.
pub fn open(path: &Path) -> Result<Bundle, CliError> {
    Ok(Bundle::open(path)?)
}

/// Format a millisecond duration as `h:mm:ss.mmm`.
pub fn format_duration(millis: u64) -> String {
    let seconds = millis / 1000;
    format!(
        "{}:{:02}:{:02}.{:03}",
        seconds / 3600,
        (seconds / 60) % 60,
        seconds % 60,
        millis % 1000
    )
}

/// Format a byte count with a binary unit.
pub fn format_size(bytes: u64) -> String {
    const UNITS: [&str; 4] = ["KiB", "MiB", "GiB", "TiB"];
    if bytes < 1024 {
        return format!("{} B", bytes);
    }
    let mut size = bytes as f64 / 1024.0;
    let mut unit = 0;
    while size >= 1024.0 && unit < UNITS.len() - 1 {
        size /= 1024.0;
        unit += 1;
    }
    format!("{:.1} {}", size, UNITS[unit])
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_format_duration() {
        assert_eq!(format_duration(0), "0:00:00.000");
        assert_eq!(format_duration(61_500), "0:01:01.500");
        assert_eq!(format_duration(3_723_004), "1:02:03.004");
    }

    #[test]
    fn test_format_size() {
        assert_eq!(format_size(512), "512 B");
        assert_eq!(format_size(2048), "2.0 KiB");
        assert_eq!(format_size(5 * 1024 * 1024), "5.0 MiB");
    }

    #[test]
    fn test_arg_conversions() {
        assert_eq!(ElementKind::from(KindArg::Catalog), ElementKind::Catalog);
        assert_eq!(Compression::from(CompressionArg::Stored), Compression::Stored);
        assert_eq!(MergeMode::from(MergeModeArg::Fail), MergeMode::Fail);
    }
}
