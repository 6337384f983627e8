//! Bundle elements.
//!
//! # Overview
//!
//! An element is one artifact inside a bundle: a media track, a metadata
//! catalog, a binary attachment, or something that could not be classified.
//! The kind is carried by [`ElementBody`], a sum type whose track variant
//! holds the track specific payload.
//!
//! Elements store their backing file as a parent directory plus a file name
//! so a bundle can be relocated by rewriting the directory prefix only. An
//! element holds no pointer to its bundle; operations that need the owning
//! bundle receive it explicitly.

mod track;

pub use track::{AudioSettings, DeviceInfo, ScanOrder, ScanType, TrackInfo, VideoSettings};

use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};

use serde::Serialize;
use tracing::debug;

use crate::checksum::{Checksum, ChecksumType};
use crate::error::{BundleError, BundleResult};
use crate::flavor::Flavor;
use crate::mimetype::MimeType;
use crate::reference::Reference;

/// The four element kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ElementKind {
    Track,
    Catalog,
    Attachment,
    Unclassified,
}

impl ElementKind {
    pub const ALL: [ElementKind; 4] = [
        ElementKind::Track,
        ElementKind::Catalog,
        ElementKind::Attachment,
        ElementKind::Unclassified,
    ];

    /// Lowercase name, also the prefix of generated identifiers.
    pub fn as_str(&self) -> &'static str {
        match self {
            ElementKind::Track => "track",
            ElementKind::Catalog => "catalog",
            ElementKind::Attachment => "attachment",
            ElementKind::Unclassified => "unclassified",
        }
    }

    /// Manifest tag of a single element of this kind.
    pub fn xml_tag(&self) -> &'static str {
        match self {
            ElementKind::Track => "Track",
            ElementKind::Catalog => "Catalog",
            ElementKind::Attachment => "Attachment",
            ElementKind::Unclassified => "Element",
        }
    }

    /// Manifest section holding elements of this kind.
    pub fn section_tag(&self) -> &'static str {
        match self {
            ElementKind::Track => "Media",
            ElementKind::Catalog => "Metadata",
            ElementKind::Attachment => "Attachments",
            ElementKind::Unclassified => "Unclassified",
        }
    }

    /// Bundle subdirectory for elements of this kind.
    ///
    /// Unclassified elements have no place in the bundle layout.
    pub fn directory(&self) -> Option<&'static str> {
        match self {
            ElementKind::Track => Some(crate::bundle::TRACKS_DIR),
            ElementKind::Catalog => Some(crate::bundle::METADATA_DIR),
            ElementKind::Attachment => Some(crate::bundle::ATTACHMENTS_DIR),
            ElementKind::Unclassified => None,
        }
    }

    /// Look a kind up by its lowercase name.
    pub fn from_name(name: &str) -> Option<Self> {
        Self::ALL
            .into_iter()
            .find(|k| k.as_str().eq_ignore_ascii_case(name.trim()))
    }
}

impl fmt::Display for ElementKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Kind specific element payload.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum ElementBody {
    Track(TrackInfo),
    Catalog,
    Attachment,
    Unclassified,
}

impl ElementBody {
    /// Empty payload for `kind`.
    pub fn empty(kind: ElementKind) -> Self {
        match kind {
            ElementKind::Track => ElementBody::Track(TrackInfo::default()),
            ElementKind::Catalog => ElementBody::Catalog,
            ElementKind::Attachment => ElementBody::Attachment,
            ElementKind::Unclassified => ElementBody::Unclassified,
        }
    }

    pub fn kind(&self) -> ElementKind {
        match self {
            ElementBody::Track(_) => ElementKind::Track,
            ElementBody::Catalog => ElementKind::Catalog,
            ElementBody::Attachment => ElementKind::Attachment,
            ElementBody::Unclassified => ElementKind::Unclassified,
        }
    }
}

/// One artifact of a bundle.
#[derive(Debug, Clone, Serialize)]
pub struct Element {
    id: Option<String>,
    #[serde(flatten)]
    body: ElementBody,
    flavor: Flavor,
    mime_type: MimeType,
    checksum: Option<Checksum>,
    #[serde(skip)]
    path: PathBuf,
    filename: String,
    description: Option<String>,
    reference: Option<Reference>,
}

impl Element {
    /// Describe an existing file without computing its checksum.
    pub fn new(body: ElementBody, flavor: Flavor, mime_type: MimeType, file: &Path) -> Self {
        let (path, filename) = split_file(file);
        Self {
            id: None,
            body,
            flavor,
            mime_type,
            checksum: None,
            path,
            filename,
            description: None,
            reference: None,
        }
    }

    /// Wrap an existing file: detect its mime type and compute its checksum.
    ///
    /// # Errors
    ///
    /// [`BundleError::NotFound`] if the file does not exist,
    /// [`BundleError::UnknownFileType`] if its type cannot be detected.
    pub fn from_file(
        body: ElementBody,
        flavor: Flavor,
        file: &Path,
        checksum_type: ChecksumType,
    ) -> BundleResult<Self> {
        if !file.is_file() {
            return Err(BundleError::NotFound(file.to_path_buf()));
        }
        let mime_type = MimeType::from_path(file)?;
        let checksum = Checksum::of_file(checksum_type, file)?;
        Ok(Self::new(body, flavor, mime_type, file).with_checksum(checksum))
    }

    /// Wrap a file as a track with the given duration in milliseconds.
    pub fn track(flavor: Flavor, file: &Path, duration: u64) -> BundleResult<Self> {
        Self::from_file(
            ElementBody::Track(TrackInfo::with_duration(duration)),
            flavor,
            file,
            ChecksumType::default(),
        )
    }

    /// Wrap a file as a catalog.
    pub fn catalog(flavor: Flavor, file: &Path) -> BundleResult<Self> {
        Self::from_file(ElementBody::Catalog, flavor, file, ChecksumType::default())
    }

    /// Wrap a file as an attachment.
    pub fn attachment(flavor: Flavor, file: &Path) -> BundleResult<Self> {
        Self::from_file(ElementBody::Attachment, flavor, file, ChecksumType::default())
    }

    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        self.id = Some(id.into());
        self
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    pub fn with_checksum(mut self, checksum: Checksum) -> Self {
        self.checksum = Some(checksum);
        self
    }

    pub fn with_reference(mut self, reference: Reference) -> Self {
        self.reference = Some(reference);
        self
    }

    pub fn id(&self) -> Option<&str> {
        self.id.as_deref()
    }

    pub(crate) fn set_id(&mut self, id: Option<String>) {
        self.id = id;
    }

    pub fn kind(&self) -> ElementKind {
        self.body.kind()
    }

    pub fn body(&self) -> &ElementBody {
        &self.body
    }

    pub fn flavor(&self) -> &Flavor {
        &self.flavor
    }

    /// Replace the flavor.
    pub fn set_flavor(&mut self, flavor: Flavor) {
        self.flavor = flavor;
    }

    pub fn mime_type(&self) -> &MimeType {
        &self.mime_type
    }

    pub fn checksum(&self) -> Option<&Checksum> {
        self.checksum.as_ref()
    }

    pub fn description(&self) -> Option<&str> {
        self.description.as_deref()
    }

    pub fn set_description(&mut self, description: Option<String>) {
        self.description = description;
    }

    pub fn reference(&self) -> Option<&Reference> {
        self.reference.as_ref()
    }

    /// Point this element at `target`, replacing any previous reference.
    pub fn refer_to(&mut self, target: Reference) {
        self.reference = Some(target);
    }

    pub fn clear_reference(&mut self) {
        self.reference = None;
    }

    /// Track payload, if this element is a track.
    pub fn track_info(&self) -> Option<&TrackInfo> {
        match &self.body {
            ElementBody::Track(info) => Some(info),
            _ => None,
        }
    }

    pub fn track_info_mut(&mut self) -> Option<&mut TrackInfo> {
        match &mut self.body {
            ElementBody::Track(info) => Some(info),
            _ => None,
        }
    }

    /// Reference pointing at this element, once it has an identifier.
    pub fn as_reference(&self) -> Option<Reference> {
        self.id
            .as_ref()
            .map(|id| Reference::new(self.kind().as_str(), id.clone()))
    }

    /// Directory holding the backing file.
    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn filename(&self) -> &str {
        &self.filename
    }

    /// Full path of the backing file.
    pub fn file(&self) -> PathBuf {
        self.path.join(&self.filename)
    }

    pub(crate) fn set_file(&mut self, file: &Path) {
        let (path, filename) = split_file(file);
        self.path = path;
        self.filename = filename;
    }

    /// Size of the backing file in bytes.
    pub fn size(&self) -> BundleResult<u64> {
        let file = self.file();
        fs::metadata(&file)
            .map(|m| m.len())
            .map_err(|e| not_found_or_read(&file, e))
    }

    /// Recompute the checksum from the current backing file.
    ///
    /// Any stored checksum is replaced. The algorithm of the stored checksum
    /// is kept; SHA-256 is used when there is none.
    pub fn wrap(&mut self) -> BundleResult<()> {
        let kind = self
            .checksum
            .as_ref()
            .map(Checksum::kind)
            .unwrap_or_default();
        let current = self.compute_checksum(kind)?;
        if self.checksum.as_ref() != Some(&current) {
            debug!(id = ?self.id, checksum = %current, "Element checksum updated");
            self.checksum = Some(current);
        }
        Ok(())
    }

    /// Check the backing file against the stored checksum.
    ///
    /// An element without a stored checksum only needs its file to exist.
    pub fn verify(&self) -> BundleResult<()> {
        let file = self.file();
        let Some(expected) = &self.checksum else {
            if !file.is_file() {
                return Err(BundleError::NotFound(file));
            }
            return Ok(());
        };
        let actual = self.compute_checksum(expected.kind())?;
        if &actual != expected {
            return Err(BundleError::IntegrityError {
                path: file,
                expected: expected.value().to_string(),
                actual: actual.value().to_string(),
            });
        }
        Ok(())
    }

    fn compute_checksum(&self, kind: ChecksumType) -> BundleResult<Checksum> {
        let file = self.file();
        if !file.is_file() {
            return Err(BundleError::NotFound(file));
        }
        Checksum::of_file(kind, &file)
    }

    /// Copy the backing file to `destination` and point the element at it.
    ///
    /// The source file is left in place.
    ///
    /// # Errors
    ///
    /// [`BundleError::NotFound`] if the destination's parent directory does
    /// not exist, [`BundleError::AlreadyExists`] if the destination is taken.
    pub fn integrate(&mut self, destination: &Path) -> BundleResult<()> {
        let parent = destination.parent().unwrap_or_else(|| Path::new(""));
        if !parent.is_dir() {
            return Err(BundleError::NotFound(parent.to_path_buf()));
        }
        if destination.exists() {
            return Err(BundleError::AlreadyExists(destination.to_path_buf()));
        }
        let source = self.file();
        fs::copy(&source, destination).map_err(|e| not_found_or_read(&source, e))?;
        self.set_file(destination);
        Ok(())
    }

    /// Rewrite the backing file location after its bundle root moved.
    pub(crate) fn relocate(&mut self, old_root: &Path, new_root: &Path) {
        if let Ok(relative) = self.path.strip_prefix(old_root) {
            self.path = new_root.join(relative);
        }
    }
}

impl fmt::Display for Element {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.id {
            Some(id) => write!(f, "{} '{}' ({})", self.kind(), id, self.flavor),
            None => write!(f, "{} ({})", self.kind(), self.flavor),
        }
    }
}

/// Whether `id` can name an element directory inside a bundle.
///
/// Identifiers become a single path component, so separators, `.`, `..`
/// and the empty string are rejected.
pub fn is_valid_identifier(id: &str) -> bool {
    !id.is_empty()
        && id != "."
        && id != ".."
        && !id.contains(['/', '\\', '\0'])
        && !id.chars().any(char::is_control)
}

/// Fail with [`BundleError::InvalidIdentifier`] unless `id` is usable.
pub(crate) fn check_identifier(id: &str) -> BundleResult<()> {
    if is_valid_identifier(id) {
        Ok(())
    } else {
        Err(BundleError::InvalidIdentifier(id.to_string()))
    }
}

fn split_file(file: &Path) -> (PathBuf, String) {
    let path = file.parent().map(Path::to_path_buf).unwrap_or_default();
    let filename = file
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    (path, filename)
}

fn not_found_or_read(path: &Path, e: std::io::Error) -> BundleError {
    if e.kind() == std::io::ErrorKind::NotFound {
        BundleError::NotFound(path.to_path_buf())
    } else {
        BundleError::read(path, e)
    }
}
