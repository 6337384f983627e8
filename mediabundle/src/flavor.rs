//! Element flavors.
//!
//! A flavor is a two-part `type/subtype` tag such as `track/presenter` or
//! `metadata/dublincore`. It classifies what an element *means* inside a
//! bundle, independent of its kind (track, catalog, ...) and mime type.
//!
//! Both halves are trimmed and lower-cased on construction, so
//! `Track/Presenter` and `track/presenter` are the same flavor. A flavor may
//! additionally list equivalents, used when older manifests name the same
//! content differently.

use std::fmt;
use std::hash::{Hash, Hasher};
use std::str::FromStr;

use serde::{Serialize, Serializer};

use crate::error::{BundleError, BundleResult};

/// Separator between type and subtype.
pub const SEPARATOR: char = '/';

/// A `type/subtype` classification tag.
#[derive(Debug, Clone)]
pub struct Flavor {
    ty: String,
    subtype: String,
    description: Option<String>,
    equivalents: Vec<(String, String)>,
}

impl Flavor {
    /// Create a flavor from its two halves.
    ///
    /// # Errors
    ///
    /// Returns [`BundleError::MalformedFlavor`] if either half is empty after
    /// trimming or contains the `/` separator.
    pub fn new(ty: &str, subtype: &str) -> BundleResult<Self> {
        let (ty, subtype) = normalize(ty, subtype)
            .ok_or_else(|| BundleError::MalformedFlavor(format!("{}{}{}", ty, SEPARATOR, subtype)))?;
        Ok(Self {
            ty,
            subtype,
            description: None,
            equivalents: Vec::new(),
        })
    }

    /// Build a flavor from lowercase literals known to be well formed.
    pub(crate) fn from_static(ty: &'static str, subtype: &'static str) -> Self {
        Self {
            ty: ty.to_string(),
            subtype: subtype.to_string(),
            description: None,
            equivalents: Vec::new(),
        }
    }

    /// Parse a flavor from its `type/subtype` string form.
    pub fn parse(s: &str) -> BundleResult<Self> {
        let (ty, subtype) = s
            .split_once(SEPARATOR)
            .ok_or_else(|| BundleError::MalformedFlavor(s.to_string()))?;
        Self::new(ty, subtype).map_err(|_| BundleError::MalformedFlavor(s.to_string()))
    }

    /// Attach a human readable description.
    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    /// Register an equivalent flavor for matching.
    pub fn with_equivalent(mut self, ty: &str, subtype: &str) -> BundleResult<Self> {
        let pair = normalize(ty, subtype)
            .ok_or_else(|| BundleError::MalformedFlavor(format!("{}{}{}", ty, SEPARATOR, subtype)))?;
        if !self.equivalents.contains(&pair) {
            self.equivalents.push(pair);
        }
        Ok(self)
    }

    pub fn ty(&self) -> &str {
        &self.ty
    }

    pub fn subtype(&self) -> &str {
        &self.subtype
    }

    pub fn description(&self) -> Option<&str> {
        self.description.as_deref()
    }

    pub fn equivalents(&self) -> &[(String, String)] {
        &self.equivalents
    }

    /// Whether this flavor and `other` name the same content.
    ///
    /// True when the normalized pairs are equal, or when either flavor lists
    /// the other among its equivalents.
    pub fn matches(&self, other: &Flavor) -> bool {
        if self == other {
            return true;
        }
        self.lists(&other.ty, &other.subtype) || other.lists(&self.ty, &self.subtype)
    }

    fn lists(&self, ty: &str, subtype: &str) -> bool {
        self.equivalents
            .iter()
            .any(|(t, s)| t == ty && s == subtype)
    }
}

fn normalize(ty: &str, subtype: &str) -> Option<(String, String)> {
    let ty = ty.trim().to_lowercase();
    let subtype = subtype.trim().to_lowercase();
    if ty.is_empty() || subtype.is_empty() || ty.contains(SEPARATOR) || subtype.contains(SEPARATOR) {
        return None;
    }
    Some((ty, subtype))
}

impl PartialEq for Flavor {
    fn eq(&self, other: &Self) -> bool {
        self.ty == other.ty && self.subtype == other.subtype
    }
}

impl Eq for Flavor {}

impl Hash for Flavor {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.ty.hash(state);
        self.subtype.hash(state);
    }
}

impl fmt::Display for Flavor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{}{}", self.ty, SEPARATOR, self.subtype)
    }
}

impl FromStr for Flavor {
    type Err = BundleError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl Serialize for Flavor {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}
