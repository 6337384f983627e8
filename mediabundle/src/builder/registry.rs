//! Element classification rules.
//!
//! An [`ElementRegistry`] is a table of [`ElementRule`]s, each pairing a
//! predicate over a file (its path and detected mime type) with the element
//! kind and flavor to create when it matches. The highest priority match
//! wins; at equal priority the rule registered first wins.

use std::fmt;
use std::path::Path;

use quick_xml::events::Event;
use quick_xml::Reader;
use tracing::{debug, warn};

use crate::checksum::ChecksumType;
use crate::element::{Element, ElementBody, ElementKind};
use crate::error::{BundleError, BundleResult};
use crate::flavor::Flavor;
use crate::mimetype::MimeType;

/// Predicate deciding whether a rule applies to a file.
pub type Matcher = fn(&Path, &MimeType) -> bool;

/// Default priority of the built-in rules.
pub const DEFAULT_PRIORITY: i32 = 0;

/// Priority of the catalog rules, which must beat generic XML handling.
pub const CATALOG_PRIORITY: i32 = 10;

/// One classification strategy.
#[derive(Clone)]
pub struct ElementRule {
    name: String,
    kind: ElementKind,
    flavor: Flavor,
    priority: i32,
    matcher: Matcher,
}

impl ElementRule {
    pub fn new(name: impl Into<String>, kind: ElementKind, flavor: Flavor, matcher: Matcher) -> Self {
        Self {
            name: name.into(),
            kind,
            flavor,
            priority: DEFAULT_PRIORITY,
            matcher,
        }
    }

    pub fn with_priority(mut self, priority: i32) -> Self {
        self.priority = priority;
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn kind(&self) -> ElementKind {
        self.kind
    }

    pub fn flavor(&self) -> &Flavor {
        &self.flavor
    }

    pub fn priority(&self) -> i32 {
        self.priority
    }

    /// Whether this rule accepts the file.
    pub fn matches(&self, file: &Path, mime_type: &MimeType) -> bool {
        (self.matcher)(file, mime_type)
    }
}

impl fmt::Debug for ElementRule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ElementRule")
            .field("name", &self.name)
            .field("kind", &self.kind)
            .field("flavor", &self.flavor.to_string())
            .field("priority", &self.priority)
            .finish()
    }
}

/// Table of classification rules consulted when wrapping raw files.
#[derive(Debug, Clone, Default)]
pub struct ElementRegistry {
    rules: Vec<ElementRule>,
}

impl ElementRegistry {
    /// A registry without any rules.
    pub fn empty() -> Self {
        Self::default()
    }

    /// A registry holding the built-in rules:
    ///
    /// | rule           | matches                    | creates                       |
    /// |----------------|----------------------------|-------------------------------|
    /// | `dublincore`   | XML with root `dublincore` | catalog `metadata/dublincore` |
    /// | `mpeg7`        | XML with root `Mpeg7`      | catalog `metadata/mpeg-7`     |
    /// | `timeline`     | XML with root `timeline`   | catalog `metadata/timeline`   |
    /// | `cover`        | `image/*`                  | attachment `cover/source`     |
    /// | `audio`        | `audio/*`                  | track `track/audio`           |
    /// | `video`        | `video/*`                  | track `track/presenter`       |
    pub fn with_defaults() -> Self {
        Self::empty()
            .with_rule(
                ElementRule::new(
                    "dublincore",
                    ElementKind::Catalog,
                    Flavor::from_static("metadata", "dublincore"),
                    is_dublin_core,
                )
                .with_priority(CATALOG_PRIORITY),
            )
            .with_rule(
                ElementRule::new(
                    "mpeg7",
                    ElementKind::Catalog,
                    Flavor::from_static("metadata", "mpeg-7"),
                    is_mpeg7,
                )
                .with_priority(CATALOG_PRIORITY),
            )
            .with_rule(
                ElementRule::new(
                    "timeline",
                    ElementKind::Catalog,
                    Flavor::from_static("metadata", "timeline"),
                    is_timeline,
                )
                .with_priority(CATALOG_PRIORITY),
            )
            .with_rule(ElementRule::new(
                "cover",
                ElementKind::Attachment,
                Flavor::from_static("cover", "source"),
                |_, mime| mime.is_image(),
            ))
            .with_rule(ElementRule::new(
                "audio",
                ElementKind::Track,
                Flavor::from_static("track", "audio"),
                |_, mime| mime.is_audio(),
            ))
            .with_rule(ElementRule::new(
                "video",
                ElementKind::Track,
                Flavor::from_static("track", "presenter"),
                |_, mime| mime.is_video(),
            ))
    }

    pub fn with_rule(mut self, rule: ElementRule) -> Self {
        self.register(rule);
        self
    }

    /// Append a rule. Earlier rules win ties.
    pub fn register(&mut self, rule: ElementRule) {
        debug!(rule = %rule.name, kind = %rule.kind, priority = rule.priority, "Registered element rule");
        self.rules.push(rule);
    }

    pub fn rules(&self) -> &[ElementRule] {
        &self.rules
    }

    pub fn len(&self) -> usize {
        self.rules.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }

    /// The rule that would classify `file`, if any.
    pub fn find(&self, file: &Path, mime_type: &MimeType) -> Option<&ElementRule> {
        let mut best: Option<&ElementRule> = None;
        let mut tied = false;
        for rule in self.rules.iter().filter(|r| r.matches(file, mime_type)) {
            match best {
                Some(current) if rule.priority > current.priority => {
                    best = Some(rule);
                    tied = false;
                }
                Some(current) if rule.priority == current.priority => tied = true,
                Some(_) => {}
                None => best = Some(rule),
            }
        }

        if let (true, Some(rule)) = (tied, best) {
            warn!(
                file = %file.display(),
                rule = %rule.name,
                priority = rule.priority,
                "Several element rules match with equal priority, using the first registered"
            );
        }
        best
    }

    /// Wrap `file` as the element its best matching rule describes.
    ///
    /// # Errors
    ///
    /// - [`BundleError::NotFound`] if the file does not exist
    /// - [`BundleError::UnknownFileType`] if its type cannot be detected
    /// - [`BundleError::UnsupportedElement`] if no rule accepts it
    pub fn classify(&self, file: &Path, checksum_type: ChecksumType) -> BundleResult<Element> {
        if !file.is_file() {
            return Err(BundleError::NotFound(file.to_path_buf()));
        }
        let mime_type = MimeType::from_path(file)?;
        let rule = self.find(file, &mime_type).ok_or_else(|| {
            BundleError::UnsupportedElement(format!(
                "no element rule accepts {} ({})",
                file.display(),
                mime_type
            ))
        })?;

        debug!(file = %file.display(), rule = %rule.name, "Classified file");
        Element::from_file(
            ElementBody::empty(rule.kind),
            rule.flavor.clone(),
            file,
            checksum_type,
        )
    }
}

fn is_dublin_core(file: &Path, mime_type: &MimeType) -> bool {
    mime_type.is_xml() && xml_root(file).as_deref() == Some("dublincore")
}

fn is_mpeg7(file: &Path, mime_type: &MimeType) -> bool {
    mime_type.is_xml() && xml_root(file).as_deref() == Some("Mpeg7")
}

fn is_timeline(file: &Path, mime_type: &MimeType) -> bool {
    mime_type.is_xml() && xml_root(file).as_deref() == Some("timeline")
}

/// Local name of the document element, or `None` if the file is not XML.
fn xml_root(file: &Path) -> Option<String> {
    let mut reader = Reader::from_file(file).ok()?;
    let mut buf = Vec::new();
    loop {
        match reader.read_event_into(&mut buf) {
            Ok(Event::Start(e)) | Ok(Event::Empty(e)) => {
                return Some(String::from_utf8_lossy(e.local_name().as_ref()).into_owned());
            }
            Ok(Event::Eof) | Err(_) => return None,
            Ok(_) => buf.clear(),
        }
    }
}
