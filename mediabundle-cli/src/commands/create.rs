//! `create` and `import` commands.

use std::path::{Path, PathBuf};

use mediabundle::BundleConfig;

use super::common::builder;
use crate::error::CliError;

/// Create an empty bundle at `path`, or under the work directory.
pub fn run_create(path: Option<PathBuf>, config: &BundleConfig) -> Result<(), CliError> {
    let builder = builder(config);
    let bundle = match path {
        Some(path) => builder.create_new_at(&path)?,
        None => builder.create_new()?,
    };

    println!("Created bundle {}", bundle.identifier().unwrap_or("-"));
    println!("  Root: {}", bundle.root().display());
    Ok(())
}

/// Wrap the raw files in `dir` into a bundle.
pub fn run_import(dir: &Path, ignore_unknown: bool, config: &BundleConfig) -> Result<(), CliError> {
    let bundle = builder(config).create_from_elements(dir, ignore_unknown)?;

    println!(
        "Imported {} elements into bundle {}",
        bundle.elements().len(),
        bundle.identifier().unwrap_or("-")
    );
    for element in bundle.elements() {
        println!("  {}", element);
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use mediabundle::bundle::MANIFEST_FILENAME;
    use mediabundle::Bundle;
    use tempfile::TempDir;

    fn config(temp: &TempDir) -> BundleConfig {
        BundleConfig {
            work_dir: temp.path().join("work"),
            ..BundleConfig::default()
        }
    }

    #[test]
    fn test_create_at_path() {
        let temp = TempDir::new().unwrap();
        let root = temp.path().join("bundle");

        run_create(Some(root.clone()), &config(&temp)).unwrap();
        assert!(root.join(MANIFEST_FILENAME).is_file());
        assert!(run_create(Some(root), &config(&temp)).is_err());
    }

    #[test]
    fn test_create_in_work_dir() {
        let temp = TempDir::new().unwrap();
        run_create(None, &config(&temp)).unwrap();

        let created: Vec<_> = std::fs::read_dir(temp.path().join("work"))
            .unwrap()
            .collect();
        assert_eq!(created.len(), 1);
    }

    #[test]
    fn test_import() {
        let temp = TempDir::new().unwrap();
        let dir = temp.path().join("raw");
        std::fs::create_dir_all(&dir).unwrap();
        std::fs::write(dir.join("talk.mp4"), b"video").unwrap();
        std::fs::write(dir.join("notes.txt"), b"notes").unwrap();

        assert!(run_import(&dir, false, &config(&temp)).is_err());
        run_import(&dir, true, &config(&temp)).unwrap();

        let bundle = Bundle::open(&dir).unwrap();
        assert_eq!(bundle.tracks(None).len(), 1);
    }
}
