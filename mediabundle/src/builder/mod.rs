//! Bundle construction.
//!
//! [`BundleBuilder`] is the entry point for obtaining a [`Bundle`]: create an
//! empty one, load an existing manifest with a chosen tolerance, rebuild a
//! damaged bundle, or wrap a directory of raw files using an
//! [`ElementRegistry`].

mod registry;

pub use registry::{ElementRegistry, ElementRule, Matcher, CATALOG_PRIORITY, DEFAULT_PRIORITY};

use std::io::{Read, Seek};
use std::path::{Path, PathBuf};

use tracing::{debug, info, warn};
use walkdir::WalkDir;

use crate::bundle::{Bundle, LOCK_FILENAME, MANIFEST_FILENAME, TEMP_DIR};
use crate::checksum::ChecksumType;
use crate::config::BundleConfig;
use crate::element::Element;
use crate::error::{BundleError, BundleResult};
use crate::manifest::{LoadOptions, Manifest};
use crate::packager::BundlePackager;

/// Creates and loads bundles.
#[derive(Debug, Clone)]
pub struct BundleBuilder {
    work_dir: PathBuf,
    registry: ElementRegistry,
    checksum_type: ChecksumType,
}

impl Default for BundleBuilder {
    fn default() -> Self {
        Self::from_config(&BundleConfig::default())
    }
}

impl BundleBuilder {
    /// Builder creating bundles under `work_dir` with the default registry.
    pub fn new(work_dir: impl Into<PathBuf>) -> Self {
        Self {
            work_dir: work_dir.into(),
            registry: ElementRegistry::with_defaults(),
            checksum_type: ChecksumType::default(),
        }
    }

    pub fn from_config(config: &BundleConfig) -> Self {
        Self::new(config.work_dir.clone()).with_checksum_type(config.checksum)
    }

    pub fn with_registry(mut self, registry: ElementRegistry) -> Self {
        self.registry = registry;
        self
    }

    pub fn with_checksum_type(mut self, checksum_type: ChecksumType) -> Self {
        self.checksum_type = checksum_type;
        self
    }

    pub fn work_dir(&self) -> &Path {
        &self.work_dir
    }

    pub fn registry(&self) -> &ElementRegistry {
        &self.registry
    }

    pub fn checksum_type(&self) -> ChecksumType {
        self.checksum_type
    }

    /// Create an empty bundle in a fresh directory under the work directory.
    pub fn create_new(&self) -> BundleResult<Bundle> {
        let root = self.work_dir.join(uuid::Uuid::new_v4().to_string());
        self.create_new_at(&root)
    }

    /// Create an empty bundle at `root`.
    pub fn create_new_at(&self, root: &Path) -> BundleResult<Bundle> {
        Bundle::create(root)
    }

    /// Load the bundle described by a manifest file.
    ///
    /// Strict loading verifies every checksum and fails on the first broken
    /// entry. With `tolerant`, files that changed since the manifest was
    /// written are accepted and their checksums recomputed; the manifest is
    /// then marked dirty but not saved. Missing or malformed entries fail
    /// either way, use [`BundleBuilder::rebuild_from_directory`] to drop them.
    pub fn load_from_manifest(&self, file: &Path, tolerant: bool) -> BundleResult<Bundle> {
        let options = LoadOptions::strict().with_ignore_checksums(tolerant);
        let manifest = Manifest::load(file, options)?;
        if manifest.is_dirty() {
            debug!(path = %file.display(), "Loaded manifest differs from its file");
        }
        Ok(Bundle::from_manifest(manifest))
    }

    /// Strictly load the bundle rooted at `dir`.
    pub fn load_from_directory(&self, dir: &Path) -> BundleResult<Bundle> {
        self.load_from_manifest(&dir.join(MANIFEST_FILENAME), false)
    }

    /// Load the bundle at `dir`, dropping entries whose file is gone.
    ///
    /// With `ignore_checksums` the stored checksums are recomputed from the
    /// files; otherwise they are verified when `verify` is set. The repaired
    /// manifest is saved when anything changed.
    pub fn rebuild_from_directory(
        &self,
        dir: &Path,
        ignore_checksums: bool,
        verify: bool,
    ) -> BundleResult<Bundle> {
        let options = LoadOptions::strict()
            .with_ignore_missing(true)
            .with_ignore_checksums(ignore_checksums)
            .with_verify(verify);
        let manifest = Manifest::load(&dir.join(MANIFEST_FILENAME), options)?;
        let mut bundle = Bundle::from_manifest(manifest);

        if bundle.manifest().is_dirty() {
            bundle.save()?;
            info!(root = %dir.display(), elements = bundle.elements().len(), "Rebuilt bundle manifest");
        }
        Ok(bundle)
    }

    /// Turn a directory of raw files into a bundle.
    ///
    /// Every file below `dir` is classified through the registry and moved
    /// into the bundle layout, then a fresh manifest is written. Nothing is
    /// moved unless every file could be classified, or `ignore_unknown` is
    /// set, in which case unrecognised files are left in place.
    ///
    /// # Errors
    ///
    /// - [`BundleError::AlreadyExists`] if `dir` already holds a manifest
    /// - [`BundleError::UnsupportedElement`] or [`BundleError::UnknownFileType`]
    ///   for an unrecognised file without `ignore_unknown`
    pub fn create_from_elements(&self, dir: &Path, ignore_unknown: bool) -> BundleResult<Bundle> {
        if !dir.is_dir() {
            return Err(BundleError::NotFound(dir.to_path_buf()));
        }
        let manifest_file = dir.join(MANIFEST_FILENAME);
        if manifest_file.exists() {
            return Err(BundleError::AlreadyExists(manifest_file));
        }

        let mut elements = Vec::new();
        for file in raw_files(dir)? {
            match self.registry.classify(&file, self.checksum_type) {
                Ok(element) => elements.push(element),
                Err(e @ (BundleError::UnsupportedElement(_) | BundleError::UnknownFileType(_)))
                    if ignore_unknown =>
                {
                    warn!(file = %file.display(), error = %e, "Skipping unrecognised file");
                }
                Err(e) => return Err(e),
            }
        }

        let mut bundle = Bundle::create(dir)?;
        for element in elements {
            add_element(&mut bundle, element)?;
        }
        bundle.save()?;

        info!(
            root = %dir.display(),
            elements = bundle.elements().len(),
            "Created bundle from files"
        );
        Ok(bundle)
    }

    /// Extract a packaged bundle into the work directory and load it.
    pub fn load_from_package<P: BundlePackager, R: Read + Seek>(
        &self,
        packager: &P,
        input: R,
    ) -> BundleResult<Bundle> {
        std::fs::create_dir_all(&self.work_dir)
            .map_err(|e| BundleError::create_dir(&self.work_dir, e))?;
        let root = packager.unpack(input, &self.work_dir)?;
        self.load_from_directory(&root)
    }
}

fn add_element(bundle: &mut Bundle, element: Element) -> BundleResult<()> {
    let file = element.file();
    let id = bundle.add(element, true)?;
    debug!(id = %id, file = %file.display(), "Added file to new bundle");
    Ok(())
}

/// Regular files below `dir` in name order, skipping bundle bookkeeping.
fn raw_files(dir: &Path) -> BundleResult<Vec<PathBuf>> {
    let mut files = Vec::new();
    let walker = WalkDir::new(dir)
        .sort_by_file_name()
        .into_iter()
        .filter_entry(|entry| !(entry.depth() == 1 && entry.file_name() == TEMP_DIR));
    for entry in walker {
        let entry = entry.map_err(|e| {
            let path = e.path().unwrap_or(dir).to_path_buf();
            BundleError::read(&path, e.into())
        })?;
        if !entry.file_type().is_file() {
            continue;
        }
        if entry.depth() == 1
            && (entry.file_name() == MANIFEST_FILENAME || entry.file_name() == LOCK_FILENAME)
        {
            continue;
        }
        files.push(entry.into_path());
    }
    Ok(files)
}
