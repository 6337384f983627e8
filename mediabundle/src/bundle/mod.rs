//! On-disk media bundles.
//!
//! # Overview
//!
//! A bundle is a directory holding a manifest and the files it describes:
//!
//! ```text
//! <root>/
//! ├── index.xml              # the manifest
//! ├── tracks/<id>/...        # track files
//! ├── metadata/<id>/...      # catalog files
//! ├── attachments/<id>/...   # attachment files
//! ├── temp/                  # scratch area
//! └── __lock.lck             # present while the bundle is locked
//! ```
//!
//! Mutations touch the filesystem first and the manifest second, so a
//! failed copy, move or delete leaves the manifest describing the last
//! known good state. Nothing is persisted until [`Bundle::save`] is called.
//!
//! A [`Bundle`] is a plain single-threaded value. Share one between threads
//! through [`SharedBundle`], which serializes writers.

mod lock;
mod merge;

pub use lock::{is_locked, lock_bundle, lock_file, unlock_bundle, BundleLock};
pub use merge::{merge, MergeMode, MergeReport};

use std::fmt;
use std::fs;
use std::io::{self, Read, Seek, Write};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::{RwLock, RwLockReadGuard, RwLockWriteGuard};
use tracing::{debug, error, info, warn};
use walkdir::WalkDir;

use crate::builder::ElementRegistry;
use crate::checksum::ChecksumType;
use crate::element::{check_identifier, Element, ElementBody, ElementKind};
use crate::error::{BundleError, BundleResult};
use crate::flavor::Flavor;
use crate::manifest::{LoadOptions, Manifest};
use crate::packager::{BundlePackager, PackReport};
use crate::reference::Reference;

/// Manifest file name at the bundle root.
pub const MANIFEST_FILENAME: &str = "index.xml";

/// Lock marker file name at the bundle root.
pub const LOCK_FILENAME: &str = "__lock.lck";

/// Directory for track files.
pub const TRACKS_DIR: &str = "tracks";

/// Directory for catalog files.
pub const METADATA_DIR: &str = "metadata";

/// Directory for attachment files.
pub const ATTACHMENTS_DIR: &str = "attachments";

/// Scratch directory.
pub const TEMP_DIR: &str = "temp";

/// Flavor of the bundle cover image.
pub const COVER_FLAVOR: (&str, &str) = ("cover", "source");

const SIZE_UNKNOWN: u64 = u64::MAX;

/// Result of an observer callback.
pub type ObserverResult = Result<(), Box<dyn std::error::Error + Send + Sync>>;

/// Receives notifications about bundle mutations.
///
/// Callbacks run synchronously, in registration order, after the mutation
/// has completed. A failing observer is logged and does not affect the
/// mutation or the remaining observers.
pub trait BundleObserver: Send + Sync {
    fn element_added(&self, _bundle: &Path, _element: &Element) -> ObserverResult {
        Ok(())
    }

    fn element_removed(&self, _bundle: &Path, _element: &Element) -> ObserverResult {
        Ok(())
    }

    fn bundle_moved(&self, _from: &Path, _to: &Path) -> ObserverResult {
        Ok(())
    }
}

/// Handle returned by [`Bundle::add_observer`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ObserverId(u64);

/// A media bundle rooted at a directory.
pub struct Bundle {
    root: PathBuf,
    manifest: Manifest,
    size: AtomicU64,
    observers: Vec<(ObserverId, Box<dyn BundleObserver>)>,
    next_observer: u64,
}

impl Bundle {
    /// Wrap an already loaded manifest.
    pub fn from_manifest(manifest: Manifest) -> Self {
        Self {
            root: manifest.root().to_path_buf(),
            manifest,
            size: AtomicU64::new(SIZE_UNKNOWN),
            observers: Vec::new(),
            next_observer: 0,
        }
    }

    /// Create an empty bundle at `root` and save its manifest.
    ///
    /// # Errors
    ///
    /// [`BundleError::AlreadyExists`] if `root` already holds a manifest.
    pub fn create(root: &Path) -> BundleResult<Self> {
        let manifest_file = root.join(MANIFEST_FILENAME);
        if manifest_file.exists() {
            return Err(BundleError::AlreadyExists(manifest_file));
        }
        create_layout(root)?;

        let mut manifest = Manifest::new(root, Some(uuid::Uuid::new_v4().to_string()));
        manifest.save()?;
        info!(root = %root.display(), id = ?manifest.identifier(), "Created bundle");
        Ok(Self::from_manifest(manifest))
    }

    /// Open the bundle at `root`, verifying every element.
    pub fn open(root: &Path) -> BundleResult<Self> {
        let manifest = Manifest::load(&root.join(MANIFEST_FILENAME), LoadOptions::strict())?;
        Ok(Self::from_manifest(manifest))
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn identifier(&self) -> Option<&str> {
        self.manifest.identifier()
    }

    pub fn manifest(&self) -> &Manifest {
        &self.manifest
    }

    /// Mutable access to bundle level metadata.
    ///
    /// Element membership must go through [`Bundle::add`] and
    /// [`Bundle::remove`] so files and manifest stay in step.
    pub fn manifest_mut(&mut self) -> &mut Manifest {
        &mut self.manifest
    }

    /// Duration of the bundle in milliseconds.
    pub fn duration(&self) -> u64 {
        self.manifest.duration()
    }

    /// Scratch directory of the bundle.
    pub fn temp_dir(&self) -> PathBuf {
        self.root.join(TEMP_DIR)
    }

    pub fn is_locked(&self) -> bool {
        is_locked(&self.root)
    }

    // ------------------------------------------------------------------------
    // Queries
    // ------------------------------------------------------------------------

    pub fn elements(&self) -> &[Element] {
        self.manifest.elements()
    }

    pub fn element_by_id(&self, id: &str) -> Option<&Element> {
        self.manifest.get(id)
    }

    /// Elements a reference resolves to.
    pub fn element_by_reference(&self, reference: &Reference) -> Vec<&Element> {
        self.manifest.resolve(reference)
    }

    pub fn contains(&self, id: &str) -> bool {
        self.manifest.contains(id)
    }

    /// Tracks, optionally restricted to a flavor.
    pub fn tracks(&self, flavor: Option<&Flavor>) -> Vec<&Element> {
        self.manifest.select(ElementKind::Track, flavor, None)
    }

    pub fn catalogs(&self, flavor: Option<&Flavor>) -> Vec<&Element> {
        self.manifest.select(ElementKind::Catalog, flavor, None)
    }

    pub fn attachments(&self, flavor: Option<&Flavor>) -> Vec<&Element> {
        self.manifest.select(ElementKind::Attachment, flavor, None)
    }

    /// Elements loaded from the manifest that no kind could be assigned to.
    pub fn unclassified(&self, flavor: Option<&Flavor>) -> Vec<&Element> {
        self.manifest.select(ElementKind::Unclassified, flavor, None)
    }

    /// Elements of `kind` matching both a flavor and a reference.
    pub fn select(
        &self,
        kind: ElementKind,
        flavor: Option<&Flavor>,
        reference: Option<&Reference>,
    ) -> Vec<&Element> {
        self.manifest.select(kind, flavor, reference)
    }

    pub fn has_tracks(&self) -> bool {
        self.manifest.has_tracks()
    }

    pub fn has_catalogs(&self) -> bool {
        self.manifest.has_catalogs()
    }

    pub fn has_attachments(&self) -> bool {
        self.manifest.has_attachments()
    }

    /// Total size of all element files in bytes.
    ///
    /// Missing files count as zero. The value is cached until the next
    /// mutation.
    pub fn size(&self) -> u64 {
        let cached = self.size.load(Ordering::Relaxed);
        if cached != SIZE_UNKNOWN {
            return cached;
        }
        let total = self
            .manifest
            .elements()
            .iter()
            .map(|e| e.size().unwrap_or(0))
            .sum();
        self.size.store(total, Ordering::Relaxed);
        total
    }

    fn invalidate_size(&self) {
        self.size.store(SIZE_UNKNOWN, Ordering::Relaxed);
    }

    // ------------------------------------------------------------------------
    // Membership
    // ------------------------------------------------------------------------

    /// Integrate an element and register it in the manifest.
    ///
    /// The file is copied, or moved when `move_file` is set, to
    /// `<kind dir>/<id>/<name>`. A taken name is uniquified as `name-1.ext`,
    /// `name-2.ext` and so on. Returns the element's identifier.
    ///
    /// # Errors
    ///
    /// - [`BundleError::UnsupportedElement`] for unclassified elements
    /// - [`BundleError::InvalidIdentifier`] if the explicit id is not a plain name
    /// - [`BundleError::DuplicateIdentifier`] if the element's explicit id is taken
    /// - [`BundleError::NotFound`] if the element's file does not exist
    pub fn add(&mut self, mut element: Element, move_file: bool) -> BundleResult<String> {
        let Some(kind_dir) = element.kind().directory() else {
            return Err(BundleError::UnsupportedElement(format!(
                "{} cannot be integrated into a bundle",
                element
            )));
        };
        let id = match element.id() {
            Some(id) if self.manifest.contains(id) => {
                return Err(BundleError::DuplicateIdentifier(id.to_string()));
            }
            Some(id) => {
                check_identifier(id)?;
                id.to_string()
            }
            None => self.manifest.next_id(element.kind()),
        };

        let source = element.file();
        if !source.is_file() {
            return Err(BundleError::NotFound(source));
        }

        let dir = self.root.join(kind_dir).join(&id);
        if !dir.starts_with(&self.root) {
            return Err(BundleError::InvalidIdentifier(id));
        }
        let created_dir = !dir.exists();
        fs::create_dir_all(&dir).map_err(|e| BundleError::create_dir(&dir, e))?;
        let destination = unique_destination(&dir, element.filename());

        let integrated = if move_file {
            move_file_to(&source, &destination).map(|()| element.set_file(&destination))
        } else {
            element.integrate(&destination)
        };
        if let Err(e) = integrated {
            if created_dir {
                let _ = fs::remove_dir(&dir);
            }
            return Err(e);
        }

        element.set_id(Some(id));
        let id = self.manifest.add(element)?;
        self.invalidate_size();
        debug!(root = %self.root.display(), id = %id, moved = move_file, "Element integrated");

        if let Some(element) = self.manifest.get(&id) {
            notify(&self.observers, |o| o.element_added(&self.root, element));
        }
        Ok(id)
    }

    /// Classify a file through `registry` and add it.
    pub fn add_file(
        &mut self,
        file: &Path,
        registry: &ElementRegistry,
        checksum_type: ChecksumType,
        move_file: bool,
    ) -> BundleResult<String> {
        let element = registry.classify(file, checksum_type)?;
        self.add(element, move_file)
    }

    /// Delete an element's file and unregister it.
    ///
    /// The manifest entry is only removed once the file is gone; a file that
    /// is already missing counts as deleted.
    pub fn remove(&mut self, id: &str) -> BundleResult<Element> {
        let element = self
            .manifest
            .get(id)
            .ok_or_else(|| BundleError::ElementNotFound(id.to_string()))?;
        let file = element.file();
        let dir = element.path().to_path_buf();

        match fs::remove_file(&file) {
            Ok(()) => {}
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                warn!(id = %id, path = %file.display(), "Element file already missing");
            }
            Err(e) => return Err(BundleError::write(&file, e)),
        }
        if dir.parent().and_then(Path::parent) == Some(self.root.as_path()) {
            // Per-element directory; only removed when empty
            let _ = fs::remove_dir(&dir);
        }

        let element = self.manifest.remove(id)?;
        self.invalidate_size();
        debug!(root = %self.root.display(), id = %id, "Element removed");
        notify(&self.observers, |o| o.element_removed(&self.root, &element));
        Ok(element)
    }

    // ------------------------------------------------------------------------
    // Cover
    // ------------------------------------------------------------------------

    fn cover_flavor() -> BundleResult<Flavor> {
        Flavor::new(COVER_FLAVOR.0, COVER_FLAVOR.1)
    }

    /// The cover image attachment, if any.
    pub fn cover(&self) -> Option<&Element> {
        let flavor = Self::cover_flavor().ok()?;
        self.attachments(Some(&flavor)).into_iter().next()
    }

    /// Replace the cover image with `file`.
    pub fn set_cover(&mut self, file: &Path, checksum_type: ChecksumType) -> BundleResult<String> {
        let element = Element::from_file(
            ElementBody::Attachment,
            Self::cover_flavor()?,
            file,
            checksum_type,
        )?;
        self.remove_cover()?;
        self.add(element, false)
    }

    /// Remove every cover image. Returns how many were removed.
    pub fn remove_cover(&mut self) -> BundleResult<usize> {
        let flavor = Self::cover_flavor()?;
        let ids: Vec<String> = self
            .attachments(Some(&flavor))
            .into_iter()
            .filter_map(|e| e.id().map(str::to_string))
            .collect();
        for id in &ids {
            self.remove(id)?;
        }
        Ok(ids.len())
    }

    // ------------------------------------------------------------------------
    // Integrity
    // ------------------------------------------------------------------------

    /// Recompute every element's checksum from its current file.
    ///
    /// Returns whether any checksum changed.
    pub fn wrap(&mut self) -> BundleResult<bool> {
        let changed = self.manifest.wrap()?;
        self.invalidate_size();
        Ok(changed)
    }

    /// Verify every element against its stored checksum.
    pub fn verify(&self) -> BundleResult<()> {
        for element in self.manifest.elements() {
            element.verify()?;
        }
        Ok(())
    }

    /// Persist the manifest.
    pub fn save(&mut self) -> BundleResult<()> {
        self.manifest.save()
    }

    // ------------------------------------------------------------------------
    // Relocation
    // ------------------------------------------------------------------------

    /// Move the bundle directory to `destination`.
    ///
    /// The bundle is locked for the duration. Only the directory is renamed;
    /// elements are repointed by rewriting their path prefix. On failure the
    /// bundle keeps its old root.
    ///
    /// # Errors
    ///
    /// - [`BundleError::AlreadyExists`] if `destination` is taken
    /// - [`BundleError::InvalidDestination`] if `destination` is inside the bundle
    /// - [`BundleError::LockUnavailable`] if the bundle is locked
    pub fn move_to(&mut self, destination: &Path) -> BundleResult<()> {
        if destination.exists() {
            return Err(BundleError::AlreadyExists(destination.to_path_buf()));
        }
        if is_within(&self.root, destination) {
            return Err(BundleError::InvalidDestination(destination.to_path_buf()));
        }
        if let Some(parent) = destination.parent() {
            fs::create_dir_all(parent).map_err(|e| BundleError::create_dir(parent, e))?;
        }

        let mut lock = BundleLock::acquire(&self.root)?;
        if let Err(e) = move_dir(&self.root, destination) {
            // Lock is released at the old root by the guard
            return Err(e);
        }
        lock.moved_to(destination);

        let old_root = std::mem::replace(&mut self.root, destination.to_path_buf());
        self.manifest.relocate(destination);
        info!(from = %old_root.display(), to = %destination.display(), "Bundle moved");
        notify(&self.observers, |o| o.bundle_moved(&old_root, destination));
        lock.release()
    }

    /// Rename the bundle directory within its parent.
    pub fn rename_to(&mut self, name: &str) -> BundleResult<()> {
        let parent = self.root.parent().unwrap_or_else(|| Path::new(""));
        let destination = parent.join(name);
        self.move_to(&destination)
    }

    /// Copy the bundle to `destination` and return the copy.
    ///
    /// The lock file is not copied. A partial copy is removed on failure.
    pub fn copy_to(&self, destination: &Path) -> BundleResult<Bundle> {
        if destination.exists() {
            return Err(BundleError::AlreadyExists(destination.to_path_buf()));
        }
        if is_within(&self.root, destination) {
            return Err(BundleError::InvalidDestination(destination.to_path_buf()));
        }
        copy_tree_or_clean(&self.root, destination)?;

        let mut manifest = self.manifest.clone();
        manifest.relocate(destination);
        manifest.save()?;
        info!(from = %self.root.display(), to = %destination.display(), "Bundle copied");
        Ok(Bundle::from_manifest(manifest))
    }

    /// Delete the bundle directory.
    ///
    /// # Errors
    ///
    /// [`BundleError::LockUnavailable`] if the bundle is locked.
    pub fn delete(self) -> BundleResult<()> {
        if self.is_locked() {
            return Err(BundleError::LockUnavailable(self.root));
        }
        fs::remove_dir_all(&self.root).map_err(|e| BundleError::write(&self.root, e))?;
        info!(root = %self.root.display(), "Bundle deleted");
        Ok(())
    }

    /// Write the bundle into an archive.
    pub fn pack<P, W>(&self, packager: &P, output: W) -> BundleResult<PackReport>
    where
        P: BundlePackager,
        W: Write + Seek,
    {
        packager.pack(self, output)
    }

    /// Extract an archive into `work_dir` and open the bundle it holds.
    pub fn unpack<P, R>(packager: &P, input: R, work_dir: &Path) -> BundleResult<Bundle>
    where
        P: BundlePackager,
        R: Read + Seek,
    {
        let root = packager.unpack(input, work_dir)?;
        Bundle::open(&root)
    }

    // ------------------------------------------------------------------------
    // Observers
    // ------------------------------------------------------------------------

    pub fn add_observer(&mut self, observer: Box<dyn BundleObserver>) -> ObserverId {
        let id = ObserverId(self.next_observer);
        self.next_observer += 1;
        self.observers.push((id, observer));
        id
    }

    /// Unregister an observer. Returns false if it was not registered.
    pub fn remove_observer(&mut self, id: ObserverId) -> bool {
        let before = self.observers.len();
        self.observers.retain(|(oid, _)| *oid != id);
        self.observers.len() != before
    }
}

impl fmt::Debug for Bundle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Bundle")
            .field("root", &self.root)
            .field("identifier", &self.identifier())
            .field("elements", &self.manifest.len())
            .field("observers", &self.observers.len())
            .finish()
    }
}

impl fmt::Display for Bundle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "Bundle {}", self.identifier().unwrap_or("<unidentified>"))?;
        writeln!(f, "  root:     {}", self.root.display())?;
        if let Some(start) = self.manifest.start() {
            writeln!(f, "  start:    {}", start.to_rfc3339())?;
        }
        writeln!(f, "  duration: {} ms", self.duration())?;
        for kind in ElementKind::ALL {
            let elements = self.manifest.select(kind, None, None);
            if elements.is_empty() {
                continue;
            }
            writeln!(f, "  {}:", kind.section_tag())?;
            for element in elements {
                write!(
                    f,
                    "    {} {} [{}] {}",
                    element.id().unwrap_or("?"),
                    element.flavor(),
                    element.mime_type(),
                    element.filename()
                )?;
                if let Some(reference) = element.reference() {
                    write!(f, " -> {}", reference)?;
                }
                writeln!(f)?;
            }
        }
        Ok(())
    }
}

fn notify(
    observers: &[(ObserverId, Box<dyn BundleObserver>)],
    call: impl Fn(&dyn BundleObserver) -> ObserverResult,
) {
    for (id, observer) in observers {
        if let Err(e) = call(observer.as_ref()) {
            error!(observer = id.0, error = %e, "Bundle observer failed");
        }
    }
}

/// Create the standard bundle directories under `root`.
pub(crate) fn create_layout(root: &Path) -> BundleResult<()> {
    for dir in [TRACKS_DIR, METADATA_DIR, ATTACHMENTS_DIR, TEMP_DIR] {
        let path = root.join(dir);
        fs::create_dir_all(&path).map_err(|e| BundleError::create_dir(&path, e))?;
    }
    Ok(())
}

/// First free path for `filename` in `dir`: `name.ext`, `name-1.ext`, ...
fn unique_destination(dir: &Path, filename: &str) -> PathBuf {
    let candidate = dir.join(filename);
    if !candidate.exists() {
        return candidate;
    }
    let (stem, ext) = match filename.rsplit_once('.') {
        Some((stem, ext)) if !stem.is_empty() => (stem, Some(ext)),
        _ => (filename, None),
    };
    (1..)
        .map(|n| match ext {
            Some(ext) => dir.join(format!("{}-{}.{}", stem, n, ext)),
            None => dir.join(format!("{}-{}", stem, n)),
        })
        .find(|p| !p.exists())
        .unwrap_or(candidate)
}

/// Move a file, falling back to copy and delete across filesystems.
fn move_file_to(source: &Path, destination: &Path) -> BundleResult<()> {
    if destination.exists() {
        return Err(BundleError::AlreadyExists(destination.to_path_buf()));
    }
    if fs::rename(source, destination).is_ok() {
        return Ok(());
    }
    fs::copy(source, destination).map_err(|e| BundleError::write(destination, e))?;
    if let Err(e) = fs::remove_file(source) {
        let _ = fs::remove_file(destination);
        return Err(BundleError::write(source, e));
    }
    Ok(())
}

/// Move a directory, falling back to copy and delete across filesystems.
fn move_dir(source: &Path, destination: &Path) -> BundleResult<()> {
    if fs::rename(source, destination).is_ok() {
        return Ok(());
    }
    copy_tree_or_clean(source, destination)?;
    // The lock file stays behind in the copy source and is dropped with it
    fs::remove_dir_all(source).map_err(|e| BundleError::write(source, e))?;
    let lock = lock_file(destination);
    let _ = fs::File::create(&lock);
    Ok(())
}

/// Whether `path` is `root` or lies below it, after resolving symlinks and
/// `..` in the parts of `path` that already exist.
fn is_within(root: &Path, path: &Path) -> bool {
    let root = fs::canonicalize(root).unwrap_or_else(|_| root.to_path_buf());
    let mut existing = path;
    let mut rest = Vec::new();
    let resolved = loop {
        if let Ok(canonical) = fs::canonicalize(existing) {
            break canonical;
        }
        match (existing.parent(), existing.file_name()) {
            (Some(parent), Some(name)) => {
                rest.push(name.to_os_string());
                existing = if parent.as_os_str().is_empty() {
                    Path::new(".")
                } else {
                    parent
                };
            }
            _ => break existing.to_path_buf(),
        }
    };
    let resolved = rest.iter().rev().fold(resolved, |acc, name| acc.join(name));
    resolved.starts_with(&root)
}

/// [`copy_tree`], removing whatever was copied when it fails.
fn copy_tree_or_clean(source: &Path, destination: &Path) -> BundleResult<()> {
    copy_tree(source, destination).map_err(|e| {
        if let Err(cleanup) = fs::remove_dir_all(destination) {
            warn!(path = %destination.display(), error = %cleanup, "Failed to remove partial copy");
        }
        e
    })
}

/// Recursively copy `source` to `destination`, leaving out lock files.
pub(crate) fn copy_tree(source: &Path, destination: &Path) -> BundleResult<()> {
    for entry in WalkDir::new(source) {
        let entry = entry.map_err(|e| {
            let path = e.path().unwrap_or(source).to_path_buf();
            BundleError::read(path, e.into())
        })?;
        let relative = entry
            .path()
            .strip_prefix(source)
            .map_err(|_| BundleError::NotFound(entry.path().to_path_buf()))?;
        if relative.as_os_str() == LOCK_FILENAME {
            continue;
        }
        let target = destination.join(relative);
        if entry.file_type().is_dir() {
            fs::create_dir_all(&target).map_err(|e| BundleError::create_dir(&target, e))?;
        } else {
            fs::copy(entry.path(), &target).map_err(|e| BundleError::write(&target, e))?;
        }
    }
    Ok(())
}

/// A bundle shared between threads behind a single-writer lock.
#[derive(Clone)]
pub struct SharedBundle {
    inner: Arc<RwLock<Bundle>>,
}

impl SharedBundle {
    pub fn new(bundle: Bundle) -> Self {
        Self {
            inner: Arc::new(RwLock::new(bundle)),
        }
    }

    /// Shared read access.
    pub fn read(&self) -> RwLockReadGuard<'_, Bundle> {
        self.inner.read()
    }

    /// Exclusive write access; blocks until other readers and writers leave.
    pub fn write(&self) -> RwLockWriteGuard<'_, Bundle> {
        self.inner.write()
    }

    /// Run `f` with exclusive access.
    pub fn with_mut<T>(&self, f: impl FnOnce(&mut Bundle) -> T) -> T {
        f(&mut self.inner.write())
    }
}

impl fmt::Debug for SharedBundle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("SharedBundle").field(&*self.inner.read()).finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::checksum::Checksum;
    use std::sync::atomic::AtomicUsize;
    use tempfile::TempDir;

    fn write(dir: &Path, name: &str, contents: &[u8]) -> PathBuf {
        let path = dir.join(name);
        fs::write(&path, contents).unwrap();
        path
    }

    fn setup() -> (TempDir, Bundle) {
        let temp = TempDir::new().unwrap();
        fs::create_dir(temp.path().join("incoming")).unwrap();
        let bundle = Bundle::create(&temp.path().join("bundle")).unwrap();
        (temp, bundle)
    }

    fn track(temp: &TempDir, name: &str, contents: &[u8]) -> Element {
        let file = write(&temp.path().join("incoming"), name, contents);
        Element::track(Flavor::parse("track/presenter").unwrap(), &file, 2000).unwrap()
    }

    #[test]
    fn test_create_layout() {
        let (_temp, bundle) = setup();
        for dir in [TRACKS_DIR, METADATA_DIR, ATTACHMENTS_DIR, TEMP_DIR] {
            assert!(bundle.root().join(dir).is_dir(), "missing {}", dir);
        }
        assert!(bundle.root().join(MANIFEST_FILENAME).is_file());
        assert!(bundle.identifier().is_some());
    }

    #[test]
    fn test_create_twice_fails() {
        let (_temp, bundle) = setup();
        assert!(matches!(
            Bundle::create(bundle.root()),
            Err(BundleError::AlreadyExists(_))
        ));
    }

    #[test]
    fn test_add_copies_into_layout() {
        let (temp, mut bundle) = setup();
        let element = track(&temp, "video.mp4", b"frames");
        let source = element.file();

        let id = bundle.add(element, false).unwrap();
        assert_eq!(id, "track-1");
        let added = bundle.element_by_id(&id).unwrap();
        assert_eq!(added.file(), bundle.root().join("tracks/track-1/video.mp4"));
        assert!(source.exists());
        added.verify().unwrap();
    }

    #[test]
    fn test_add_moves() {
        let (temp, mut bundle) = setup();
        let element = track(&temp, "video.mp4", b"frames");
        let source = element.file();

        let id = bundle.add(element, true).unwrap();
        assert!(!source.exists());
        assert!(bundle.element_by_id(&id).unwrap().file().exists());
    }

    #[test]
    fn test_add_uniquifies_filename() {
        let (temp, mut bundle) = setup();
        let dir = bundle.root().join(TRACKS_DIR).join("track-1");
        fs::create_dir_all(&dir).unwrap();
        write(&dir, "video.mp4", b"leftover");

        let id = bundle.add(track(&temp, "video.mp4", b"frames"), false).unwrap();
        assert_eq!(bundle.element_by_id(&id).unwrap().filename(), "video-1.mp4");
    }

    #[test]
    fn test_add_duplicate_id_leaves_files_alone() {
        let (temp, mut bundle) = setup();
        bundle
            .add(track(&temp, "a.mp4", b"a").with_id("main"), false)
            .unwrap();
        let err = bundle
            .add(track(&temp, "b.mp4", b"b").with_id("main"), false)
            .unwrap_err();
        assert!(matches!(err, BundleError::DuplicateIdentifier(_)));
        assert_eq!(bundle.elements().len(), 1);
        assert!(!bundle.root().join(TRACKS_DIR).join("main").join("b.mp4").exists());
    }

    #[test]
    fn test_add_rejects_escaping_ids() {
        let (temp, mut bundle) = setup();
        for id in ["../../escaped", "..", "a/b", "", "/tmp/abs"] {
            let element = track(&temp, "video.mp4", b"frames").with_id(id);
            let err = bundle.add(element, false).unwrap_err();
            assert!(matches!(err, BundleError::InvalidIdentifier(_)), "{:?}", id);
        }
        assert!(bundle.elements().is_empty());
        assert!(!temp.path().join("escaped").exists());
        assert!(temp.path().join("incoming").join("video.mp4").exists());
    }

    #[test]
    fn test_add_missing_file_leaves_manifest_unchanged() {
        let (temp, mut bundle) = setup();
        let element = track(&temp, "video.mp4", b"frames");
        fs::remove_file(element.file()).unwrap();

        assert!(matches!(bundle.add(element, false), Err(BundleError::NotFound(_))));
        assert!(bundle.elements().is_empty());
        assert!(!bundle.root().join(TRACKS_DIR).join("track-1").exists());
    }

    #[test]
    fn test_add_unclassified_unsupported() {
        let (temp, mut bundle) = setup();
        let file = write(&temp.path().join("incoming"), "blob.bin", b"?");
        let element = Element::new(
            ElementBody::Unclassified,
            Flavor::parse("other/blob").unwrap(),
            crate::mimetype::MimeType::octet_stream(),
            &file,
        );
        assert!(matches!(
            bundle.add(element, false),
            Err(BundleError::UnsupportedElement(_))
        ));
    }

    #[test]
    fn test_remove_deletes_file_then_entry() {
        let (temp, mut bundle) = setup();
        let id = bundle.add(track(&temp, "video.mp4", b"frames"), false).unwrap();
        let file = bundle.element_by_id(&id).unwrap().file();

        let removed = bundle.remove(&id).unwrap();
        assert_eq!(removed.id(), Some(id.as_str()));
        assert!(!file.exists());
        assert!(!bundle.contains(&id));
        assert!(!bundle.root().join(TRACKS_DIR).join(&id).exists());
        assert_eq!(bundle.duration(), 0);
    }

    #[test]
    fn test_remove_unknown() {
        let (_temp, mut bundle) = setup();
        assert!(matches!(
            bundle.remove("track-1"),
            Err(BundleError::ElementNotFound(_))
        ));
    }

    #[cfg(unix)]
    #[test]
    fn test_remove_failure_keeps_entry() {
        use std::os::unix::fs::PermissionsExt;

        let (temp, mut bundle) = setup();
        let id = bundle.add(track(&temp, "video.mp4", b"frames"), false).unwrap();
        let dir = bundle.root().join(TRACKS_DIR).join(&id);
        fs::set_permissions(&dir, fs::Permissions::from_mode(0o555)).unwrap();

        let result = bundle.remove(&id);
        fs::set_permissions(&dir, fs::Permissions::from_mode(0o755)).unwrap();

        // Running as root bypasses directory permissions
        if result.is_err() {
            assert!(bundle.contains(&id));
        }
    }

    #[test]
    fn test_queries_by_kind_flavor_and_reference() {
        let (temp, mut bundle) = setup();
        assert!(!bundle.has_tracks());
        assert!(!bundle.has_catalogs());
        assert!(!bundle.has_attachments());

        let id = bundle.add(track(&temp, "a.mp4", b"frames"), false).unwrap();
        let catalog = write(&temp.path().join("incoming"), "dc.xml", b"<dublincore/>");
        let dublin_core = Flavor::parse("metadata/dublincore").unwrap();
        bundle
            .add(
                Element::catalog(dublin_core.clone(), &catalog)
                    .unwrap()
                    .with_reference(Reference::new("track", id.clone())),
                false,
            )
            .unwrap();
        bundle
            .add(Element::catalog(dublin_core.clone(), &catalog).unwrap(), false)
            .unwrap();

        assert!(bundle.has_tracks());
        assert!(bundle.has_catalogs());
        assert!(!bundle.has_attachments());
        assert!(bundle.unclassified(None).is_empty());

        let reference = Reference::new("track", id);
        let both = bundle.select(ElementKind::Catalog, Some(&dublin_core), Some(&reference));
        assert_eq!(both.len(), 1);
        assert_eq!(both[0].reference(), Some(&reference));
        assert_eq!(bundle.select(ElementKind::Catalog, Some(&dublin_core), None).len(), 2);
        let other = Flavor::parse("metadata/mpeg-7").unwrap();
        assert!(bundle
            .select(ElementKind::Catalog, Some(&other), Some(&reference))
            .is_empty());
    }

    #[test]
    fn test_size_cached_and_invalidated() {
        let (temp, mut bundle) = setup();
        assert_eq!(bundle.size(), 0);
        bundle.add(track(&temp, "a.mp4", b"12345"), false).unwrap();
        assert_eq!(bundle.size(), 5);
        bundle.add(track(&temp, "b.mp4", b"123"), false).unwrap();
        assert_eq!(bundle.size(), 8);
    }

    #[test]
    fn test_wrap_then_verify() {
        let (temp, mut bundle) = setup();
        let id = bundle.add(track(&temp, "a.mp4", b"original"), false).unwrap();
        let file = bundle.element_by_id(&id).unwrap().file();
        fs::write(&file, b"changed").unwrap();

        assert!(matches!(bundle.verify(), Err(BundleError::IntegrityError { .. })));
        bundle.wrap().unwrap();
        bundle.verify().unwrap();
        assert_eq!(
            bundle.element_by_id(&id).unwrap().checksum(),
            Some(&Checksum::of_bytes(ChecksumType::Sha256, b"changed"))
        );
    }

    #[test]
    fn test_cover_helpers() {
        let (temp, mut bundle) = setup();
        let first = write(&temp.path().join("incoming"), "cover.png", b"one");
        let second = write(&temp.path().join("incoming"), "cover2.png", b"two");

        bundle.set_cover(&first, ChecksumType::Sha256).unwrap();
        bundle.set_cover(&second, ChecksumType::Sha256).unwrap();

        assert_eq!(bundle.attachments(None).len(), 1);
        assert_eq!(bundle.cover().unwrap().filename(), "cover2.png");
        assert_eq!(bundle.remove_cover().unwrap(), 1);
        assert!(bundle.cover().is_none());
    }

    #[test]
    fn test_move_to_relocates_elements() {
        let (temp, mut bundle) = setup();
        let id = bundle.add(track(&temp, "a.mp4", b"frames"), false).unwrap();
        bundle.save().unwrap();
        let destination = temp.path().join("elsewhere").join("moved");

        bundle.move_to(&destination).unwrap();

        assert_eq!(bundle.root(), destination.as_path());
        assert!(!temp.path().join("bundle").exists());
        assert!(!bundle.is_locked());
        let element = bundle.element_by_id(&id).unwrap();
        assert!(element.file().starts_with(&destination));
        element.verify().unwrap();
        assert_eq!(bundle.manifest().file(), destination.join(MANIFEST_FILENAME));
    }

    #[test]
    fn test_move_to_locked_bundle_fails() {
        let (temp, mut bundle) = setup();
        lock_bundle(bundle.root(), false).unwrap();

        let result = bundle.move_to(&temp.path().join("moved"));
        assert!(matches!(result, Err(BundleError::LockUnavailable(_))));
        assert_eq!(bundle.root(), temp.path().join("bundle").as_path());
    }

    #[test]
    fn test_move_to_existing_destination_fails() {
        let (temp, mut bundle) = setup();
        let result = bundle.move_to(&temp.path().join("incoming"));
        assert!(matches!(result, Err(BundleError::AlreadyExists(_))));
        assert!(!bundle.is_locked());
    }

    #[test]
    fn test_move_into_itself_fails() {
        let (temp, mut bundle) = setup();
        bundle.add(track(&temp, "a.mp4", b"frames"), false).unwrap();
        bundle.save().unwrap();
        let root = bundle.root().to_path_buf();

        for destination in [root.join("sub"), root.join(TRACKS_DIR).join("nested")] {
            let result = bundle.move_to(&destination);
            assert!(matches!(result, Err(BundleError::InvalidDestination(_))));
            assert!(!destination.exists());
        }
        let result = bundle.copy_to(&root.join("copy"));
        assert!(matches!(result, Err(BundleError::InvalidDestination(_))));
        assert!(!root.join("copy").exists());

        assert_eq!(bundle.root(), root.as_path());
        assert!(!bundle.is_locked());
        bundle.verify().unwrap();
    }

    #[test]
    fn test_move_into_itself_through_parent_path() {
        let (temp, mut bundle) = setup();
        let sneaky = temp.path().join("incoming").join("..").join("bundle").join("sub");

        let result = bundle.move_to(&sneaky);
        assert!(matches!(result, Err(BundleError::InvalidDestination(_))));
        assert!(!bundle.root().join("sub").exists());
    }

    #[cfg(unix)]
    #[test]
    fn test_copy_failure_removes_partial_copy() {
        use std::os::unix::fs::PermissionsExt;

        let (temp, mut bundle) = setup();
        let id = bundle.add(track(&temp, "a.mp4", b"frames"), false).unwrap();
        bundle.save().unwrap();
        let file = bundle.element_by_id(&id).unwrap().file();
        fs::set_permissions(&file, fs::Permissions::from_mode(0o000)).unwrap();

        let destination = temp.path().join("copy");
        let result = bundle.copy_to(&destination);
        fs::set_permissions(&file, fs::Permissions::from_mode(0o644)).unwrap();

        // Running as root bypasses file permissions
        if result.is_err() {
            assert!(!destination.exists());
        }
    }

    #[test]
    fn test_rename_to() {
        let (temp, mut bundle) = setup();
        bundle.rename_to("renamed").unwrap();
        assert_eq!(bundle.root(), temp.path().join("renamed").as_path());
    }

    #[test]
    fn test_copy_to_skips_lock() {
        let (temp, mut bundle) = setup();
        let id = bundle.add(track(&temp, "a.mp4", b"frames"), false).unwrap();
        bundle.save().unwrap();
        lock_bundle(bundle.root(), false).unwrap();

        let copy = bundle.copy_to(&temp.path().join("copy")).unwrap();
        assert!(!copy.is_locked());
        assert!(bundle.is_locked());
        copy.element_by_id(&id).unwrap().verify().unwrap();

        let reopened = Bundle::open(copy.root()).unwrap();
        assert_eq!(reopened.identifier(), bundle.identifier());
    }

    #[test]
    fn test_delete() {
        let (temp, bundle) = setup();
        bundle.delete().unwrap();
        assert!(!temp.path().join("bundle").exists());
    }

    #[test]
    fn test_delete_locked_fails() {
        let (_temp, bundle) = setup();
        lock_bundle(bundle.root(), false).unwrap();
        assert!(matches!(bundle.delete(), Err(BundleError::LockUnavailable(_))));
    }

    struct Counting {
        added: Arc<AtomicUsize>,
        fail: bool,
    }

    impl BundleObserver for Counting {
        fn element_added(&self, _bundle: &Path, _element: &Element) -> ObserverResult {
            self.added.fetch_add(1, Ordering::SeqCst);
            if self.fail {
                return Err("observer exploded".into());
            }
            Ok(())
        }
    }

    #[test]
    fn test_failing_observer_does_not_abort() {
        let (temp, mut bundle) = setup();
        let added = Arc::new(AtomicUsize::new(0));
        bundle.add_observer(Box::new(Counting {
            added: Arc::clone(&added),
            fail: true,
        }));
        let second = bundle.add_observer(Box::new(Counting {
            added: Arc::clone(&added),
            fail: false,
        }));

        bundle.add(track(&temp, "a.mp4", b"a"), false).unwrap();
        assert_eq!(added.load(Ordering::SeqCst), 2);
        assert_eq!(bundle.elements().len(), 1);

        assert!(bundle.remove_observer(second));
        assert!(!bundle.remove_observer(second));
        bundle.add(track(&temp, "b.mp4", b"b"), false).unwrap();
        assert_eq!(added.load(Ordering::SeqCst), 3);
    }

    #[test]
    fn test_display_lists_elements() {
        let (temp, mut bundle) = setup();
        bundle.add(track(&temp, "a.mp4", b"a"), false).unwrap();
        let dump = bundle.to_string();
        assert!(dump.contains("Media:"));
        assert!(dump.contains("track-1 track/presenter [video/mp4] a.mp4"));
    }

    #[test]
    fn test_shared_bundle_serializes_writers() {
        let (temp, bundle) = setup();
        let shared = SharedBundle::new(bundle);
        let files: Vec<PathBuf> = (0..4)
            .map(|i| write(&temp.path().join("incoming"), &format!("t{}.mp4", i), b"x"))
            .collect();

        std::thread::scope(|scope| {
            for file in &files {
                let shared = shared.clone();
                scope.spawn(move || {
                    let element =
                        Element::track(Flavor::parse("track/presenter").unwrap(), file, 10).unwrap();
                    shared.write().add(element, false).unwrap();
                });
            }
        });

        let bundle = shared.read();
        assert_eq!(bundle.tracks(None).len(), 4);
    }

    #[test]
    fn test_unique_destination() {
        let temp = TempDir::new().unwrap();
        assert_eq!(unique_destination(temp.path(), "a.mp4"), temp.path().join("a.mp4"));
        write(temp.path(), "a.mp4", b"");
        write(temp.path(), "a-1.mp4", b"");
        assert_eq!(unique_destination(temp.path(), "a.mp4"), temp.path().join("a-2.mp4"));
        write(temp.path(), "README", b"");
        assert_eq!(unique_destination(temp.path(), "README"), temp.path().join("README-1"));
    }
}
