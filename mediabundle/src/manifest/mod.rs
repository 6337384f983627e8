//! The bundle manifest.
//!
//! # Overview
//!
//! The manifest is the authoritative index of a bundle: its identifier,
//! start time and duration, and an insertion-ordered list of elements. It
//! allocates identifiers for new elements and persists itself as a single
//! XML document (`index.xml`) at the bundle root.
//!
//! Loading is tolerant in three independently selectable ways, see
//! [`LoadOptions`]. Anything the tolerant modes repair marks the manifest
//! dirty so the caller knows a re-save is due.

mod xml;

use std::collections::HashSet;
use std::fs;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use tracing::{debug, info, warn};

use crate::bundle::MANIFEST_FILENAME;
use crate::element::{check_identifier, Element, ElementKind};
use crate::error::{BundleError, BundleResult};
use crate::flavor::Flavor;
use crate::reference::{Reference, BUNDLE_TYPE};

/// How to treat problems found while loading a manifest.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LoadOptions {
    /// Drop entries that are malformed or whose backing file is missing.
    pub ignore_missing: bool,
    /// Accept changed files and recompute their checksums.
    pub ignore_checksums: bool,
    /// Compare backing files against stored checksums.
    pub verify: bool,
}

impl LoadOptions {
    /// Any missing file or checksum mismatch fails the load.
    pub fn strict() -> Self {
        Self {
            ignore_missing: false,
            ignore_checksums: false,
            verify: true,
        }
    }

    /// Parse as-is without touching backing files beyond existence checks.
    pub fn unverified() -> Self {
        Self {
            verify: false,
            ..Self::strict()
        }
    }

    pub fn with_ignore_missing(mut self, ignore: bool) -> Self {
        self.ignore_missing = ignore;
        self
    }

    pub fn with_ignore_checksums(mut self, ignore: bool) -> Self {
        self.ignore_checksums = ignore;
        self
    }

    pub fn with_verify(mut self, verify: bool) -> Self {
        self.verify = verify;
        self
    }
}

impl Default for LoadOptions {
    fn default() -> Self {
        Self::strict()
    }
}

/// Index of a bundle's elements plus bundle level metadata.
#[derive(Debug, Clone)]
pub struct Manifest {
    identifier: Option<String>,
    file: PathBuf,
    start: Option<DateTime<Utc>>,
    duration: u64,
    elements: Vec<Element>,
    counts: [usize; 4],
    dirty: bool,
}

impl Manifest {
    /// Create an empty manifest for the bundle rooted at `root`.
    pub fn new(root: &Path, identifier: Option<String>) -> Self {
        Self {
            identifier,
            file: root.join(MANIFEST_FILENAME),
            start: None,
            duration: 0,
            elements: Vec::new(),
            counts: [0; 4],
            dirty: true,
        }
    }

    pub fn identifier(&self) -> Option<&str> {
        self.identifier.as_deref()
    }

    pub fn set_identifier(&mut self, identifier: impl Into<String>) {
        self.identifier = Some(identifier.into());
        self.dirty = true;
    }

    /// Path of the manifest document.
    pub fn file(&self) -> &Path {
        &self.file
    }

    /// Directory the manifest describes.
    pub fn root(&self) -> &Path {
        self.file.parent().unwrap_or_else(|| Path::new(""))
    }

    pub fn start(&self) -> Option<DateTime<Utc>> {
        self.start
    }

    pub fn set_start(&mut self, start: Option<DateTime<Utc>>) {
        self.start = start;
        self.dirty = true;
    }

    /// Bundle duration in milliseconds.
    pub fn duration(&self) -> u64 {
        self.duration
    }

    pub fn set_duration(&mut self, duration: u64) {
        self.duration = duration;
        self.dirty = true;
    }

    /// Whether in-memory state differs from what was last loaded or saved.
    pub fn is_dirty(&self) -> bool {
        self.dirty
    }

    pub fn elements(&self) -> &[Element] {
        &self.elements
    }

    pub fn len(&self) -> usize {
        self.elements.len()
    }

    pub fn is_empty(&self) -> bool {
        self.elements.is_empty()
    }

    /// Number of elements of `kind`.
    pub fn count(&self, kind: ElementKind) -> usize {
        self.counts[slot(kind)]
    }

    pub fn get(&self, id: &str) -> Option<&Element> {
        self.elements.iter().find(|e| e.id() == Some(id))
    }

    /// Recompute every element checksum. Returns whether any changed.
    pub fn wrap(&mut self) -> BundleResult<bool> {
        let mut changed = false;
        for element in &mut self.elements {
            let before = element.checksum().cloned();
            element.wrap()?;
            changed |= element.checksum() != before.as_ref();
        }
        self.dirty |= changed;
        Ok(changed)
    }

    pub fn contains(&self, id: &str) -> bool {
        self.get(id).is_some()
    }

    /// Register an element and return its identifier.
    ///
    /// Elements without an identifier get `<kind>-<n>`, skipping identifiers
    /// already taken. A reference to the owning bundle is stored as no
    /// reference, which is how it reads back from disk.
    ///
    /// # Errors
    ///
    /// - [`BundleError::InvalidIdentifier`] if the element's identifier is
    ///   not a single plain path component
    /// - [`BundleError::DuplicateIdentifier`] if the element carries an
    ///   identifier that is already present
    pub fn add(&mut self, mut element: Element) -> BundleResult<String> {
        let id = match element.id() {
            Some(id) if self.contains(id) => {
                return Err(BundleError::DuplicateIdentifier(id.to_string()));
            }
            Some(id) => {
                check_identifier(id)?;
                id.to_string()
            }
            None => self.next_id(element.kind()),
        };
        element.set_id(Some(id.clone()));

        if element
            .reference()
            .is_some_and(|r| self.points_at_self(r))
        {
            element.clear_reference();
        }

        let kind = element.kind();
        if let Some(track) = element.track_info() {
            if self.duration == 0 {
                self.duration = track.duration;
            }
        }
        self.counts[slot(kind)] += 1;
        self.elements.push(element);
        self.dirty = true;
        debug!(id = %id, kind = %kind, "Element added to manifest");
        Ok(id)
    }

    /// Unregister an element.
    ///
    /// Removing the last track resets the duration to zero.
    pub fn remove(&mut self, id: &str) -> BundleResult<Element> {
        let index = self
            .elements
            .iter()
            .position(|e| e.id() == Some(id))
            .ok_or_else(|| BundleError::ElementNotFound(id.to_string()))?;
        let element = self.elements.remove(index);
        let kind = element.kind();
        self.counts[slot(kind)] = self.counts[slot(kind)].saturating_sub(1);
        if kind == ElementKind::Track && self.counts[slot(kind)] == 0 {
            self.duration = 0;
        }
        self.dirty = true;
        debug!(id = %id, kind = %kind, "Element removed from manifest");
        Ok(element)
    }

    /// Next free generated identifier for `kind`.
    pub fn next_id(&self, kind: ElementKind) -> String {
        let mut n = self.count(kind) + 1;
        loop {
            let candidate = format!("{}-{}", kind.as_str(), n);
            if !self.contains(&candidate) {
                return candidate;
            }
            n += 1;
        }
    }

    fn points_at_self(&self, reference: &Reference) -> bool {
        reference.is_bundle()
            || (reference.ty() == BUNDLE_TYPE
                && Some(reference.identifier()) == self.identifier.as_deref())
    }

    // ------------------------------------------------------------------------
    // Queries
    // ------------------------------------------------------------------------

    /// Elements of `kind`, optionally filtered by flavor and reference.
    pub fn select(
        &self,
        kind: ElementKind,
        flavor: Option<&Flavor>,
        reference: Option<&Reference>,
    ) -> Vec<&Element> {
        self.elements
            .iter()
            .filter(|e| e.kind() == kind)
            .filter(|e| flavor.map_or(true, |f| f.matches(e.flavor())))
            .filter(|e| {
                reference.map_or(true, |r| e.reference().is_some_and(|own| r.matches(own)))
            })
            .collect()
    }

    pub fn tracks(&self) -> Vec<&Element> {
        self.select(ElementKind::Track, None, None)
    }

    pub fn tracks_by_flavor(&self, flavor: &Flavor) -> Vec<&Element> {
        self.select(ElementKind::Track, Some(flavor), None)
    }

    pub fn tracks_by_reference(&self, reference: &Reference) -> Vec<&Element> {
        self.select(ElementKind::Track, None, Some(reference))
    }

    pub fn catalogs(&self) -> Vec<&Element> {
        self.select(ElementKind::Catalog, None, None)
    }

    pub fn catalogs_by_flavor(&self, flavor: &Flavor) -> Vec<&Element> {
        self.select(ElementKind::Catalog, Some(flavor), None)
    }

    pub fn catalogs_by_reference(&self, reference: &Reference) -> Vec<&Element> {
        self.select(ElementKind::Catalog, None, Some(reference))
    }

    pub fn attachments(&self) -> Vec<&Element> {
        self.select(ElementKind::Attachment, None, None)
    }

    pub fn attachments_by_flavor(&self, flavor: &Flavor) -> Vec<&Element> {
        self.select(ElementKind::Attachment, Some(flavor), None)
    }

    pub fn attachments_by_reference(&self, reference: &Reference) -> Vec<&Element> {
        self.select(ElementKind::Attachment, None, Some(reference))
    }

    pub fn unclassified(&self) -> Vec<&Element> {
        self.select(ElementKind::Unclassified, None, None)
    }

    /// Elements that `reference` resolves to.
    pub fn resolve(&self, reference: &Reference) -> Vec<&Element> {
        self.elements
            .iter()
            .filter(|e| {
                e.id()
                    .is_some_and(|id| reference.resolves_to(e.kind().as_str(), id))
            })
            .collect()
    }

    pub fn has_tracks(&self) -> bool {
        self.count(ElementKind::Track) > 0
    }

    pub fn has_catalogs(&self) -> bool {
        self.count(ElementKind::Catalog) > 0
    }

    pub fn has_attachments(&self) -> bool {
        self.count(ElementKind::Attachment) > 0
    }

    // ------------------------------------------------------------------------
    // Relocation
    // ------------------------------------------------------------------------

    /// Point the manifest and every element at a new bundle root.
    pub(crate) fn relocate(&mut self, new_root: &Path) {
        let old_root = self.root().to_path_buf();
        for element in &mut self.elements {
            element.relocate(&old_root, new_root);
        }
        self.file = new_root.join(MANIFEST_FILENAME);
    }

    // ------------------------------------------------------------------------
    // Persistence
    // ------------------------------------------------------------------------

    /// Serialize the manifest to its XML form.
    pub fn to_xml(&self) -> BundleResult<Vec<u8>> {
        let header = xml::Header {
            identifier: self.identifier.as_deref(),
            start: self.start,
            duration: self.duration,
        };
        xml::write(&header, &self.elements, self.root()).map_err(|reason| BundleError::Manifest {
            path: self.file.clone(),
            reason,
        })
    }

    /// Write the manifest to disk.
    ///
    /// The document is written next to its final location and renamed over
    /// it, so an interrupted save leaves the previous manifest intact.
    pub fn save(&mut self) -> BundleResult<()> {
        let bytes = self.to_xml()?;
        let tmp = self.file.with_extension("xml.tmp");
        fs::write(&tmp, &bytes).map_err(|e| BundleError::write(&tmp, e))?;
        fs::rename(&tmp, &self.file).map_err(|e| BundleError::write(&self.file, e))?;
        self.dirty = false;
        debug!(path = %self.file.display(), elements = self.elements.len(), "Manifest saved");
        Ok(())
    }

    /// Load a manifest document.
    ///
    /// Element files are resolved relative to the directory holding `file`.
    ///
    /// # Errors
    ///
    /// - [`BundleError::NotFound`] if `file` or (strictly) a backing file is missing
    /// - [`BundleError::Manifest`] if the document or (strictly) an entry is malformed
    /// - [`BundleError::IntegrityError`] on a checksum mismatch when verifying
    /// - [`BundleError::DuplicateIdentifier`] if (strictly) two entries share an id
    pub fn load(file: &Path, options: LoadOptions) -> BundleResult<Self> {
        if !file.is_file() {
            return Err(BundleError::NotFound(file.to_path_buf()));
        }
        let content = fs::read_to_string(file).map_err(|e| BundleError::read(file, e))?;
        let document = xml::read(&content).map_err(|reason| BundleError::Manifest {
            path: file.to_path_buf(),
            reason,
        })?;

        let root = file.parent().unwrap_or_else(|| Path::new(""));
        let mut manifest = Manifest::new(root, document.identifier);
        manifest.file = file.to_path_buf();
        manifest.start = document.start;
        manifest.duration = document.duration;
        manifest.dirty = false;

        if manifest.identifier.is_none() {
            let id = uuid::Uuid::new_v4().to_string();
            info!(id = %id, path = %file.display(), "Created identifier for manifest");
            manifest.identifier = Some(id);
            manifest.dirty = true;
        }

        // Entries with an identifier go first so generated ones cannot collide.
        let (identified, anonymous): (Vec<_>, Vec<_>) =
            document.entries.iter().partition(|e| e.id.is_some());

        let mut seen = HashSet::new();
        for entry in identified.into_iter().chain(anonymous) {
            if let Some(id) = &entry.id {
                if !seen.insert(id.clone()) {
                    if options.ignore_missing {
                        warn!(id = %id, path = %file.display(), "Dropping duplicate manifest entry");
                        manifest.dirty = true;
                        continue;
                    }
                    return Err(BundleError::DuplicateIdentifier(id.clone()));
                }
            }

            match manifest.load_entry(entry, root, options, file) {
                Ok(()) => {}
                Err(e) if options.ignore_missing && is_droppable(&e) => {
                    warn!(
                        kind = %entry.kind,
                        id = ?entry.id,
                        error = %e,
                        "Dropping manifest entry"
                    );
                    manifest.dirty = true;
                }
                Err(e) => return Err(e),
            }
        }

        debug!(
            path = %file.display(),
            elements = manifest.elements.len(),
            dirty = manifest.dirty,
            "Manifest loaded"
        );
        Ok(manifest)
    }

    fn load_entry(
        &mut self,
        entry: &xml::Entry,
        root: &Path,
        options: LoadOptions,
        file: &Path,
    ) -> BundleResult<()> {
        let mut element = entry.decode(root).map_err(|reason| BundleError::Manifest {
            path: file.to_path_buf(),
            reason,
        })?;

        let backing = element.file();
        if !backing.is_file() {
            return Err(BundleError::NotFound(backing));
        }

        if options.ignore_checksums {
            let before = element.checksum().cloned();
            element.wrap()?;
            if element.checksum() != before.as_ref() {
                debug!(id = ?element.id(), "Checksum recomputed while loading");
                self.dirty = true;
            }
        } else if options.verify {
            element.verify()?;
        }

        let dirty = self.dirty || entry.id.is_none();
        self.add(element)?;
        self.dirty = dirty;
        Ok(())
    }
}

/// Errors tolerated in ignore-missing mode.
fn is_droppable(error: &BundleError) -> bool {
    matches!(
        error,
        BundleError::NotFound(_) | BundleError::Manifest { .. }
    )
}

fn slot(kind: ElementKind) -> usize {
    match kind {
        ElementKind::Track => 0,
        ElementKind::Catalog => 1,
        ElementKind::Attachment => 2,
        ElementKind::Unclassified => 3,
    }
}
