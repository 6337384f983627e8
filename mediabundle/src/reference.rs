//! References between elements.
//!
//! A reference is a `(type, identifier)` pair. It is resolved by looking the
//! identifier up in the owning bundle, never by holding a pointer.

use std::fmt;
use std::str::FromStr;

use serde::{Serialize, Serializer};

use crate::error::{BundleError, BundleResult};

/// Identifier naming the owning bundle.
pub const SELF: &str = "self";

/// Identifier matching any element of the referenced type.
pub const ANY: &str = "*";

/// Reference type of the bundle itself.
pub const BUNDLE_TYPE: &str = "bundle";

/// A typed pointer to an element or to the bundle.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Reference {
    ty: String,
    identifier: String,
}

impl Reference {
    pub fn new(ty: impl Into<String>, identifier: impl Into<String>) -> Self {
        Self {
            ty: ty.into().trim().to_lowercase(),
            identifier: identifier.into().trim().to_string(),
        }
    }

    /// Reference to the owning bundle, `bundle:self`.
    pub fn to_bundle() -> Self {
        Self::new(BUNDLE_TYPE, SELF)
    }

    /// Parse `type:identifier`, or the `self` shorthand.
    pub fn parse(s: &str) -> BundleResult<Self> {
        let s = s.trim();
        if s == SELF {
            return Ok(Self::to_bundle());
        }
        match s.split_once(':') {
            Some((ty, id)) if !ty.trim().is_empty() && !id.trim().is_empty() => {
                Ok(Self::new(ty, id))
            }
            _ => Err(BundleError::MalformedReference(s.to_string())),
        }
    }

    pub fn ty(&self) -> &str {
        &self.ty
    }

    pub fn identifier(&self) -> &str {
        &self.identifier
    }

    /// Whether this reference points at the owning bundle.
    pub fn is_bundle(&self) -> bool {
        self.ty == BUNDLE_TYPE && self.identifier == SELF
    }

    /// Whether two references point at the same target.
    ///
    /// Types must be equal. Identifiers must be equal unless either side is
    /// the `*` wildcard, or the `self` token of a bundle reference.
    pub fn matches(&self, other: &Reference) -> bool {
        if self.ty != other.ty {
            return false;
        }
        if self.identifier == other.identifier {
            return true;
        }
        if self.identifier == ANY || other.identifier == ANY {
            return true;
        }
        self.ty == BUNDLE_TYPE && (self.identifier == SELF || other.identifier == SELF)
    }

    /// Whether this reference resolves to an element of type `ty` with `id`.
    pub fn resolves_to(&self, ty: &str, id: &str) -> bool {
        self.ty == ty && (self.identifier == ANY || self.identifier == id)
    }
}

impl fmt::Display for Reference {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_bundle() {
            f.write_str(SELF)
        } else {
            write!(f, "{}:{}", self.ty, self.identifier)
        }
    }
}

impl FromStr for Reference {
    type Err = BundleError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl Serialize for Reference {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_typed() {
        let r = Reference::parse("track:abc").unwrap();
        assert_eq!(r.ty(), "track");
        assert_eq!(r.identifier(), "abc");
        assert_eq!(r.to_string(), "track:abc");
    }

    #[test]
    fn test_parse_self_shorthand() {
        let r = Reference::parse("self").unwrap();
        assert!(r.is_bundle());
        assert_eq!(r, Reference::parse("bundle:self").unwrap());
        assert_eq!(r.to_string(), "self");
    }

    #[test]
    fn test_parse_malformed() {
        assert!(Reference::parse("track").is_err());
        assert!(Reference::parse(":abc").is_err());
        assert!(Reference::parse("track:").is_err());
    }

    #[test]
    fn test_matches_concrete() {
        let a = Reference::parse("track:abc").unwrap();
        assert!(a.matches(&Reference::parse("track:abc").unwrap()));
        assert!(!a.matches(&Reference::parse("track:xyz").unwrap()));
        assert!(!a.matches(&Reference::parse("catalog:abc").unwrap()));
    }

    #[test]
    fn test_matches_wildcard() {
        let any = Reference::parse("track:*").unwrap();
        assert!(any.matches(&Reference::parse("track:abc").unwrap()));
        assert!(Reference::parse("track:abc").unwrap().matches(&any));
        assert!(!any.matches(&Reference::parse("attachment:abc").unwrap()));
    }

    #[test]
    fn test_bundle_self_matches_bundle_id() {
        let own = Reference::to_bundle();
        assert!(own.matches(&Reference::new(BUNDLE_TYPE, "b-42")));
    }

    #[test]
    fn test_resolves_to() {
        let r = Reference::parse("track:abc").unwrap();
        assert!(r.resolves_to("track", "abc"));
        assert!(!r.resolves_to("catalog", "abc"));
        assert!(Reference::parse("track:*").unwrap().resolves_to("track", "anything"));
    }
}
