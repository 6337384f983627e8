//! `merge` command.

use std::path::Path;

use mediabundle::{merge, MergeMode};

use crate::error::CliError;

/// Merge the bundle at `source` into the bundle at `target`.
pub fn run(target: &Path, source: &Path, mode: MergeMode, move_files: bool) -> Result<(), CliError> {
    let (bundle, report) = merge(target, source, move_files, mode)?;

    println!(
        "Merged {} into {} ({} mode)",
        source.display(),
        target.display(),
        mode
    );
    println!("  Added:    {}", report.added.len());
    if !report.renamed.is_empty() {
        println!("  Renamed:  {}", report.renamed.len());
        for (old, new) in &report.renamed {
            println!("    {} -> {}", old, new);
        }
    }
    if !report.replaced.is_empty() {
        println!("  Replaced: {}", report.replaced.join(", "));
    }
    if !report.skipped.is_empty() {
        println!("  Skipped:  {}", report.skipped.join(", "));
    }
    println!("  Elements: {}", bundle.elements().len());
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use mediabundle::{Bundle, BundleError, Element, Flavor};
    use tempfile::TempDir;

    fn bundle_with_track(temp: &TempDir, name: &str) -> Bundle {
        let file = temp.path().join(format!("{}.mp4", name));
        std::fs::write(&file, name.as_bytes()).unwrap();
        let mut bundle = Bundle::create(&temp.path().join(name)).unwrap();
        bundle
            .add(
                Element::track(Flavor::parse("presenter/source").unwrap(), &file, 1000)
                    .unwrap()
                    .with_id("track-1"),
                false,
            )
            .unwrap();
        bundle.save().unwrap();
        bundle
    }

    #[test]
    fn test_merge_renames_conflicts() {
        let temp = TempDir::new().unwrap();
        let target = bundle_with_track(&temp, "target");
        let source = bundle_with_track(&temp, "source");

        run(target.root(), source.root(), MergeMode::Merge, false).unwrap();
        assert_eq!(Bundle::open(target.root()).unwrap().elements().len(), 2);
    }

    #[test]
    fn test_merge_fail_mode() {
        let temp = TempDir::new().unwrap();
        let target = bundle_with_track(&temp, "target");
        let source = bundle_with_track(&temp, "source");

        let err = run(target.root(), source.root(), MergeMode::Fail, false).unwrap_err();
        assert!(matches!(err, CliError::Bundle(BundleError::MergeConflict(_))));
        assert_eq!(err.exit_code(), 4);
    }
}
