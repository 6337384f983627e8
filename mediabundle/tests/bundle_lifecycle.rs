//! Integration tests for the bundle lifecycle.
//!
//! These tests drive the public API end to end:
//! - create, add, save and reopen with known digests
//! - integrity checks after tampering, and `wrap()` repair
//! - merging in every conflict mode
//! - packing to a zip archive and unpacking it again
//! - building bundles from raw files and rebuilding damaged ones
//!
//! Run with: `cargo test --test bundle_lifecycle`

use std::io::Cursor;
use std::path::{Path, PathBuf};

use rand::Rng;
use tempfile::TempDir;

use mediabundle::bundle::{is_locked, lock_bundle, MANIFEST_FILENAME};
use mediabundle::{
    merge, Bundle, BundleBuilder, BundleError, ChecksumType, Element, ElementKind, Flavor,
    MergeMode, Reference, ZipPackager,
};

// ============================================================================
// Helper Functions
// ============================================================================

const HELLO_SHA256: &str = "b94d27b9934d3e08a52e52d7da7dabfac484efe37a5380ee9088f7ace2efcde9";

fn write_file(dir: &Path, name: &str, content: &[u8]) -> PathBuf {
    let path = dir.join(name);
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent).unwrap();
    }
    std::fs::write(&path, content).unwrap();
    path
}

fn random_bytes(len: usize) -> Vec<u8> {
    let mut data = vec![0u8; len];
    rand::rng().fill(&mut data[..]);
    data
}

fn flavor(s: &str) -> Flavor {
    Flavor::parse(s).unwrap()
}

/// Bundle at `root` holding one presenter track and one dublin core catalog.
fn lecture(temp: &TempDir, root: &str) -> Bundle {
    let sources = temp.path().join(format!("{}-sources", root));
    let video = write_file(&sources, "talk.mp4", &random_bytes(8192));
    let catalog = write_file(&sources, "episode.xml", b"<dublincore/>");

    let mut bundle = Bundle::create(&temp.path().join(root)).unwrap();
    bundle
        .add(
            Element::track(flavor("presenter/source"), &video, 60_000)
                .unwrap()
                .with_id("track-1"),
            false,
        )
        .unwrap();
    bundle
        .add(
            Element::catalog(flavor("dublincore/episode"), &catalog)
                .unwrap()
                .with_id("catalog-1"),
            false,
        )
        .unwrap();
    bundle.save().unwrap();
    bundle
}

// ============================================================================
// Create, Save and Reopen
// ============================================================================

#[test]
fn test_end_to_end_known_digest() {
    let temp = TempDir::new().unwrap();
    let source = write_file(temp.path(), "hello.mp4", b"hello world");

    let mut bundle = Bundle::create(&temp.path().join("bundle")).unwrap();
    let id = bundle
        .add(Element::track(flavor("presenter/source"), &source, 5000).unwrap(), false)
        .unwrap();
    bundle.save().unwrap();

    let reopened = Bundle::open(bundle.root()).unwrap();
    let track = reopened.element_by_id(&id).unwrap();
    let checksum = track.checksum().unwrap();
    assert_eq!(checksum.kind(), ChecksumType::Sha256);
    assert_eq!(checksum.value(), HELLO_SHA256);
    assert_eq!(track.flavor(), &flavor("presenter/source"));
    assert_eq!(track.track_info().unwrap().duration, 5000);
    assert_eq!(reopened.duration(), 5000);
    assert_eq!(reopened.identifier(), bundle.identifier());

    // The source is copied, not moved.
    assert!(source.exists());
    assert!(track.file().starts_with(bundle.root().join("tracks").join(&id)));
}

#[test]
fn test_round_trip_preserves_elements() {
    let temp = TempDir::new().unwrap();
    let mut bundle = lecture(&temp, "lecture");
    let cover = write_file(temp.path(), "cover.png", &random_bytes(512));
    bundle
        .add(
            Element::attachment(flavor("cover/source"), &cover)
                .unwrap()
                .with_reference(Reference::new("track", "track-1")),
            false,
        )
        .unwrap();
    bundle.save().unwrap();

    let reopened = Bundle::open(bundle.root()).unwrap();
    assert_eq!(reopened.elements().len(), bundle.elements().len());
    for original in bundle.elements() {
        let loaded = reopened.element_by_id(original.id().unwrap()).unwrap();
        assert_eq!(loaded.kind(), original.kind());
        assert_eq!(loaded.flavor(), original.flavor());
        assert_eq!(loaded.checksum(), original.checksum());
        assert_eq!(loaded.reference(), original.reference());
        assert_eq!(loaded.file(), original.file());
    }

    let referenced = reopened.element_by_reference(&Reference::new("track", "track-1"));
    assert_eq!(referenced.len(), 1);
    assert_eq!(referenced[0].id(), Some("track-1"));
}

#[test]
fn test_remove_then_reopen() {
    let temp = TempDir::new().unwrap();
    let mut bundle = lecture(&temp, "lecture");

    let removed = bundle.remove("track-1").unwrap();
    assert!(!removed.file().exists());
    assert_eq!(bundle.duration(), 0);
    bundle.save().unwrap();

    let reopened = Bundle::open(bundle.root()).unwrap();
    assert!(reopened.tracks(None).is_empty());
    assert_eq!(reopened.catalogs(None).len(), 1);
}

// ============================================================================
// Integrity
// ============================================================================

#[test]
fn test_tampered_file_fails_verification() {
    let temp = TempDir::new().unwrap();
    let mut bundle = lecture(&temp, "lecture");
    let file = bundle.element_by_id("track-1").unwrap().file();

    bundle.verify().unwrap();
    std::fs::write(&file, random_bytes(100)).unwrap();
    assert!(matches!(
        bundle.verify(),
        Err(BundleError::IntegrityError { .. })
    ));
    assert!(matches!(
        Bundle::open(bundle.root()),
        Err(BundleError::IntegrityError { .. })
    ));

    assert!(bundle.wrap().unwrap());
    bundle.verify().unwrap();
}

#[test]
fn test_wrap_is_idempotent() {
    let temp = TempDir::new().unwrap();
    let mut bundle = lecture(&temp, "lecture");

    assert!(!bundle.wrap().unwrap());
    let first: Vec<_> = bundle.elements().iter().map(|e| e.checksum().cloned()).collect();
    assert!(!bundle.wrap().unwrap());
    let second: Vec<_> = bundle.elements().iter().map(|e| e.checksum().cloned()).collect();
    assert_eq!(first, second);
}

// ============================================================================
// Merging
// ============================================================================

#[test]
fn test_merge_modes() {
    let cases = [
        (MergeMode::Merge, 4, 0),
        (MergeMode::Replace, 2, 2),
        (MergeMode::Skip, 2, 0),
    ];
    for (mode, expected_len, expected_replaced) in cases {
        let temp = TempDir::new().unwrap();
        let target = lecture(&temp, "target");
        let source = lecture(&temp, "source");

        let (merged, report) = merge(target.root(), source.root(), false, mode).unwrap();
        assert_eq!(merged.elements().len(), expected_len, "mode {}", mode);
        assert_eq!(report.replaced.len(), expected_replaced, "mode {}", mode);
        assert!(!is_locked(target.root()));
        assert!(!is_locked(source.root()));
        assert!(source.root().exists());

        Bundle::open(target.root()).unwrap();
    }
}

#[test]
fn test_merge_fail_leaves_target_untouched() {
    let temp = TempDir::new().unwrap();
    let target = lecture(&temp, "target");
    let source = lecture(&temp, "source");
    let before = std::fs::read(target.root().join(MANIFEST_FILENAME)).unwrap();

    let result = merge(target.root(), source.root(), false, MergeMode::Fail);
    assert!(matches!(result, Err(BundleError::MergeConflict(_))));
    assert_eq!(std::fs::read(target.root().join(MANIFEST_FILENAME)).unwrap(), before);
    assert!(!is_locked(target.root()));
    assert!(!is_locked(source.root()));
}

#[test]
fn test_merge_with_locked_target() {
    let temp = TempDir::new().unwrap();
    let target = lecture(&temp, "target");
    let source = lecture(&temp, "source");
    assert!(lock_bundle(target.root(), false).unwrap());

    let result = merge(target.root(), source.root(), false, MergeMode::Merge);
    assert!(matches!(result, Err(BundleError::LockUnavailable(_))));
    assert!(!is_locked(source.root()));
}

// ============================================================================
// Path Containment
// ============================================================================

/// Apply `edit` to the saved manifest of `bundle`.
fn edit_manifest(bundle: &Bundle, edit: impl Fn(String) -> String) {
    let path = bundle.root().join(MANIFEST_FILENAME);
    let xml = std::fs::read_to_string(&path).unwrap();
    std::fs::write(&path, edit(xml)).unwrap();
}

#[test]
fn test_merge_refuses_escaping_source_ids() {
    let temp = TempDir::new().unwrap();
    let target = lecture(&temp, "target");
    let source = lecture(&temp, "source");
    let outside = temp.path().join("outside");
    let escaping = outside.to_string_lossy().into_owned();
    edit_manifest(&source, |xml| {
        xml.replace("id=\"track-1\"", &format!("id=\"{}\"", escaping))
    });
    let before = std::fs::read(target.root().join(MANIFEST_FILENAME)).unwrap();

    for mode in [MergeMode::Merge, MergeMode::Replace, MergeMode::Skip] {
        let result = merge(target.root(), source.root(), false, mode);
        assert!(matches!(result, Err(BundleError::Manifest { .. })), "mode {}", mode);
    }
    assert!(!outside.exists());
    assert_eq!(std::fs::read(target.root().join(MANIFEST_FILENAME)).unwrap(), before);
    assert!(!is_locked(target.root()));
    assert!(!is_locked(source.root()));
}

#[test]
fn test_foreign_file_never_loaded_or_removed() {
    let temp = TempDir::new().unwrap();
    let bundle = lecture(&temp, "lecture");
    let victim = write_file(temp.path(), "victim.xml", b"<dublincore/>");
    edit_manifest(&bundle, |xml| {
        xml.replace(
            "<File>metadata/catalog-1/episode.xml</File>",
            "<File>../victim.xml</File>",
        )
    });

    assert!(matches!(
        Bundle::open(bundle.root()),
        Err(BundleError::Manifest { .. })
    ));

    let builder = BundleBuilder::new(temp.path());
    let mut rebuilt = builder
        .rebuild_from_directory(bundle.root(), false, true)
        .unwrap();
    assert!(!rebuilt.contains("catalog-1"));
    for id in rebuilt
        .elements()
        .iter()
        .filter_map(|e| e.id().map(str::to_string))
        .collect::<Vec<_>>()
    {
        rebuilt.remove(&id).unwrap();
    }
    assert!(victim.exists());
}

#[test]
fn test_unpacked_manifest_cannot_point_outside() {
    use std::io::Write;
    use zip::write::FileOptions;

    let temp = TempDir::new().unwrap();
    let work_dir = temp.path().join("work");
    let victim = write_file(&work_dir, "victim.mp4", b"keep me");

    let manifest = r#"<?xml version="1.0" encoding="UTF-8"?>
<Bundle id="b1">
    <Media>
        <Track id="track-1" type="presenter/source">
            <MimeType>video/mp4</MimeType>
            <File>../victim.mp4</File>
        </Track>
    </Media>
</Bundle>
"#;
    let mut archive = Cursor::new(Vec::new());
    {
        let mut zip = zip::ZipWriter::new(&mut archive);
        zip.start_file(format!("evil/{}", MANIFEST_FILENAME), FileOptions::default())
            .unwrap();
        zip.write_all(manifest.as_bytes()).unwrap();
        zip.finish().unwrap();
    }
    archive.set_position(0);

    let result = BundleBuilder::new(&work_dir).load_from_package(&ZipPackager::new(), archive);
    assert!(matches!(result, Err(BundleError::Manifest { .. })));
    assert_eq!(std::fs::read(&victim).unwrap(), b"keep me");
}

// ============================================================================
// Packaging
// ============================================================================

#[test]
fn test_pack_and_unpack() {
    let temp = TempDir::new().unwrap();
    let bundle = lecture(&temp, "lecture");
    let packager = ZipPackager::new();

    let mut archive = Cursor::new(Vec::new());
    let report = bundle.pack(&packager, &mut archive).unwrap();
    assert_eq!(report.root, "lecture");
    assert!(report.entries.iter().all(|e| e.name.starts_with("lecture/")));
    assert!(report
        .entries
        .iter()
        .any(|e| e.name == format!("lecture/{}", MANIFEST_FILENAME)));

    let work_dir = temp.path().join("work");
    archive.set_position(0);
    let unpacked = BundleBuilder::new(&work_dir)
        .load_from_package(&packager, archive)
        .unwrap();
    assert_eq!(unpacked.root(), work_dir.join("lecture"));
    assert_eq!(unpacked.identifier(), bundle.identifier());
    assert_eq!(unpacked.elements().len(), 2);
    unpacked.verify().unwrap();
}

#[test]
fn test_pack_excludes_lock() {
    let temp = TempDir::new().unwrap();
    let bundle = lecture(&temp, "lecture");
    assert!(lock_bundle(bundle.root(), false).unwrap());

    let mut archive = Cursor::new(Vec::new());
    let report = bundle.pack(&ZipPackager::new(), &mut archive).unwrap();
    assert!(report.entries.iter().all(|e| !e.name.ends_with("__lock.lck")));
}

// ============================================================================
// Builder
// ============================================================================

#[test]
fn test_import_raw_files() {
    let temp = TempDir::new().unwrap();
    let dir = temp.path().join("inbox");
    write_file(&dir, "presenter.mp4", &random_bytes(2048));
    write_file(&dir, "slides/screen.mkv", &random_bytes(2048));
    write_file(&dir, "cover.jpg", &random_bytes(256));
    write_file(&dir, "readme.txt", b"notes");

    let builder = BundleBuilder::new(temp.path());
    assert!(matches!(
        builder.create_from_elements(&dir, false),
        Err(BundleError::UnsupportedElement(_))
    ));

    let bundle = builder.create_from_elements(&dir, true).unwrap();
    assert_eq!(bundle.tracks(Some(&flavor("track/presenter"))).len(), 2);
    assert!(bundle.cover().is_some());
    assert!(dir.join("readme.txt").exists());

    let reopened = builder.load_from_directory(&dir).unwrap();
    assert_eq!(reopened.elements().len(), 3);
    assert!(reopened
        .elements()
        .iter()
        .all(|e| e.kind() != ElementKind::Unclassified));
}

#[test]
fn test_rebuild_after_lost_file() {
    let temp = TempDir::new().unwrap();
    let bundle = lecture(&temp, "lecture");
    std::fs::remove_file(bundle.element_by_id("catalog-1").unwrap().file()).unwrap();

    let builder = BundleBuilder::new(temp.path());
    assert!(matches!(
        builder.load_from_directory(bundle.root()),
        Err(BundleError::NotFound(_))
    ));

    let rebuilt = builder
        .rebuild_from_directory(bundle.root(), false, true)
        .unwrap();
    assert_eq!(rebuilt.elements().len(), 1);

    let reopened = builder.load_from_directory(bundle.root()).unwrap();
    assert_eq!(reopened.elements().len(), 1);
    assert!(reopened.contains("track-1"));
}
