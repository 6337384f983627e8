//! `add` and `remove` commands.

use std::path::{Path, PathBuf};

use mediabundle::{BundleConfig, Element, ElementBody, ElementKind, Flavor, Reference};
use tracing::info;

use super::common::{builder, open, KindArg};
use crate::error::CliError;

/// Arguments for the add command.
pub struct AddArgs {
    pub path: PathBuf,
    pub file: PathBuf,
    pub flavor: Option<Flavor>,
    pub kind: Option<KindArg>,
    pub id: Option<String>,
    pub duration: Option<u64>,
    pub reference: Option<Reference>,
    pub move_file: bool,
}

/// Add a file to a bundle and save it.
///
/// Without `--flavor` the file is classified by the configured registry.
pub fn run_add(args: AddArgs, config: &BundleConfig) -> Result<(), CliError> {
    let mut bundle = open(&args.path)?;

    let mut element = match args.flavor {
        Some(flavor) => {
            let kind = args.kind.map(ElementKind::from).ok_or_else(|| {
                CliError::InvalidArgument("--kind is required together with --flavor".to_string())
            })?;
            Element::from_file(ElementBody::empty(kind), flavor, &args.file, config.checksum)?
        }
        None => builder(config)
            .registry()
            .classify(&args.file, config.checksum)?,
    };

    if let Some(duration) = args.duration {
        let track = element.track_info_mut().ok_or_else(|| {
            CliError::InvalidArgument("--duration only applies to tracks".to_string())
        })?;
        track.duration = duration;
    }
    if let Some(id) = args.id {
        element = element.with_id(id);
    }
    if let Some(reference) = args.reference {
        element = element.with_reference(reference);
    }

    let id = bundle.add(element, args.move_file)?;
    bundle.save()?;

    info!(bundle = %args.path.display(), id = %id, "Element added");
    if let Some(element) = bundle.element_by_id(&id) {
        println!("Added {}", element);
    }
    Ok(())
}

/// Remove an element from a bundle and save it.
pub fn run_remove(path: &Path, id: &str) -> Result<(), CliError> {
    let mut bundle = open(path)?;
    let element = bundle.remove(id)?;
    bundle.save()?;

    println!("Removed {}", element);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use mediabundle::Bundle;
    use tempfile::TempDir;

    fn setup(temp: &TempDir) -> (PathBuf, PathBuf) {
        let root = temp.path().join("bundle");
        Bundle::create(&root).unwrap();
        let file = temp.path().join("talk.mp4");
        std::fs::write(&file, b"video").unwrap();
        (root, file)
    }

    fn args(path: PathBuf, file: PathBuf) -> AddArgs {
        AddArgs {
            path,
            file,
            flavor: None,
            kind: None,
            id: None,
            duration: None,
            reference: None,
            move_file: false,
        }
    }

    #[test]
    fn test_add_classified() {
        let temp = TempDir::new().unwrap();
        let (root, file) = setup(&temp);

        run_add(
            AddArgs {
                duration: Some(90_000),
                ..args(root.clone(), file)
            },
            &BundleConfig::default(),
        )
        .unwrap();

        let bundle = Bundle::open(&root).unwrap();
        let tracks = bundle.tracks(None);
        assert_eq!(tracks.len(), 1);
        assert_eq!(tracks[0].flavor().to_string(), "track/presenter");
        assert_eq!(bundle.duration(), 90_000);
    }

    #[test]
    fn test_add_with_flavor_and_id() {
        let temp = TempDir::new().unwrap();
        let (root, file) = setup(&temp);

        run_add(
            AddArgs {
                flavor: Some(Flavor::parse("slides/source").unwrap()),
                kind: Some(KindArg::Attachment),
                id: Some("slides".to_string()),
                move_file: true,
                ..args(root.clone(), file.clone())
            },
            &BundleConfig::default(),
        )
        .unwrap();

        assert!(!file.exists());
        let bundle = Bundle::open(&root).unwrap();
        let element = bundle.element_by_id("slides").unwrap();
        assert_eq!(element.kind(), ElementKind::Attachment);
    }

    #[test]
    fn test_duration_on_attachment_rejected() {
        let temp = TempDir::new().unwrap();
        let (root, file) = setup(&temp);

        let result = run_add(
            AddArgs {
                flavor: Some(Flavor::parse("slides/source").unwrap()),
                kind: Some(KindArg::Attachment),
                duration: Some(10),
                ..args(root, file)
            },
            &BundleConfig::default(),
        );
        assert!(matches!(result, Err(CliError::InvalidArgument(_))));
    }

    #[test]
    fn test_remove() {
        let temp = TempDir::new().unwrap();
        let (root, file) = setup(&temp);
        run_add(
            AddArgs {
                id: Some("track-1".to_string()),
                ..args(root.clone(), file)
            },
            &BundleConfig::default(),
        )
        .unwrap();

        run_remove(&root, "track-1").unwrap();
        assert!(Bundle::open(&root).unwrap().elements().is_empty());
        assert!(run_remove(&root, "track-1").is_err());
    }
}
