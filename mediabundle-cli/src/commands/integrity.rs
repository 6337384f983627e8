//! `verify`, `wrap` and `rebuild` commands.

use std::path::Path;

use mediabundle::bundle::MANIFEST_FILENAME;
use mediabundle::{Bundle, BundleConfig, LoadOptions, Manifest};

use super::common::builder;
use crate::error::CliError;

/// Check every element of the bundle against its stored checksum.
pub fn run_verify(path: &Path) -> Result<(), CliError> {
    let bundle = open_unverified(path)?;
    bundle.verify()?;

    println!(
        "OK: {} elements verified in {}",
        bundle.elements().len(),
        path.display()
    );
    Ok(())
}

/// Recompute every checksum and save the manifest.
pub fn run_wrap(path: &Path) -> Result<(), CliError> {
    let mut bundle = open_unverified(path)?;
    let changed = bundle.wrap()?;
    bundle.save()?;

    if changed {
        println!("Updated checksums of {}", path.display());
    } else {
        println!("Checksums of {} are up to date", path.display());
    }
    Ok(())
}

/// Drop entries whose files are gone and save the repaired manifest.
pub fn run_rebuild(
    path: &Path,
    ignore_checksums: bool,
    verify: bool,
    config: &BundleConfig,
) -> Result<(), CliError> {
    let bundle = builder(config).rebuild_from_directory(path, ignore_checksums, verify)?;

    println!(
        "Rebuilt {}: {} elements kept",
        path.display(),
        bundle.elements().len()
    );
    Ok(())
}

/// Load a bundle without checking its checksums.
fn open_unverified(path: &Path) -> Result<Bundle, CliError> {
    let manifest = Manifest::load(&path.join(MANIFEST_FILENAME), LoadOptions::unverified())?;
    Ok(Bundle::from_manifest(manifest))
}
