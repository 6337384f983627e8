//! Mime types and extension based detection.

use std::fmt;
use std::path::Path;
use std::str::FromStr;

use serde::{Serialize, Serializer};

use crate::error::{BundleError, BundleResult};

/// Known file extensions and their mime types.
const EXTENSIONS: &[(&str, &str, &str)] = &[
    ("mov", "video", "quicktime"),
    ("mp4", "video", "mp4"),
    ("m4v", "video", "x-m4v"),
    ("avi", "video", "x-msvideo"),
    ("mpg", "video", "mpeg"),
    ("mpeg", "video", "mpeg"),
    ("flv", "video", "x-flv"),
    ("mkv", "video", "x-matroska"),
    ("webm", "video", "webm"),
    ("mp3", "audio", "mpeg"),
    ("m4a", "audio", "mp4"),
    ("wav", "audio", "x-wav"),
    ("aac", "audio", "aac"),
    ("ogg", "audio", "ogg"),
    ("flac", "audio", "flac"),
    ("xml", "text", "xml"),
    ("txt", "text", "plain"),
    ("pdf", "application", "pdf"),
    ("jpg", "image", "jpeg"),
    ("jpeg", "image", "jpeg"),
    ("png", "image", "png"),
    ("gif", "image", "gif"),
    ("zip", "application", "zip"),
    ("json", "application", "json"),
];

/// A `type/subtype` mime type.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct MimeType {
    ty: String,
    subtype: String,
}

impl MimeType {
    pub fn new(ty: &str, subtype: &str) -> Self {
        Self {
            ty: ty.trim().to_lowercase(),
            subtype: subtype.trim().to_lowercase(),
        }
    }

    /// `application/octet-stream`, used when nothing better is known.
    pub fn octet_stream() -> Self {
        Self::new("application", "octet-stream")
    }

    /// Parse a `type/subtype` string. Parameters after `;` are dropped.
    pub fn parse(s: &str) -> BundleResult<Self> {
        let essence = s.split(';').next().unwrap_or_default();
        match essence.split_once('/') {
            Some((ty, subtype)) if !ty.trim().is_empty() && !subtype.trim().is_empty() => {
                Ok(Self::new(ty, subtype))
            }
            _ => Err(BundleError::MalformedMimeType(s.to_string())),
        }
    }

    /// Detect the mime type of a file from its extension.
    ///
    /// # Errors
    ///
    /// Returns [`BundleError::UnknownFileType`] when the extension is missing
    /// or not known.
    pub fn from_path(path: &Path) -> BundleResult<Self> {
        let ext = path
            .extension()
            .and_then(|e| e.to_str())
            .map(|e| e.to_lowercase())
            .ok_or_else(|| BundleError::UnknownFileType(path.to_path_buf()))?;

        EXTENSIONS
            .iter()
            .find(|(known, _, _)| *known == ext)
            .map(|(_, ty, subtype)| Self::new(ty, subtype))
            .ok_or_else(|| BundleError::UnknownFileType(path.to_path_buf()))
    }

    pub fn ty(&self) -> &str {
        &self.ty
    }

    pub fn subtype(&self) -> &str {
        &self.subtype
    }

    pub fn is_audio(&self) -> bool {
        self.ty == "audio"
    }

    pub fn is_video(&self) -> bool {
        self.ty == "video"
    }

    pub fn is_image(&self) -> bool {
        self.ty == "image"
    }

    pub fn is_xml(&self) -> bool {
        self.subtype == "xml" || self.subtype.ends_with("+xml")
    }
}

impl fmt::Display for MimeType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.ty, self.subtype)
    }
}

impl FromStr for MimeType {
    type Err = BundleError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl Serialize for MimeType {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}
