//! mediabundle - On-disk media bundles
//!
//! A bundle is a directory of media files (tracks, catalogs and attachments)
//! described by an XML manifest. This library creates, loads, verifies,
//! mutates, merges and archives bundles.
//!
//! ```no_run
//! use mediabundle::{Bundle, Element, Flavor};
//! use std::path::Path;
//!
//! # fn main() -> mediabundle::BundleResult<()> {
//! let mut bundle = Bundle::create(Path::new("/srv/bundles/lecture-1"))?;
//! let flavor = Flavor::parse("presenter/source")?;
//! let track = Element::track(flavor, Path::new("/tmp/talk.mp4"), 3_600_000)?;
//! bundle.add(track, false)?;
//! bundle.save()?;
//! # Ok(())
//! # }
//! ```

pub mod builder;
pub mod bundle;
pub mod checksum;
pub mod config;
pub mod element;
pub mod error;
pub mod flavor;
pub mod manifest;
pub mod mimetype;
pub mod packager;
pub mod reference;

pub use builder::{BundleBuilder, ElementRegistry, ElementRule};
pub use bundle::{
    merge, Bundle, BundleLock, BundleObserver, MergeMode, MergeReport, ObserverId, SharedBundle,
};
pub use checksum::{Checksum, ChecksumType};
pub use config::BundleConfig;
pub use element::{Element, ElementBody, ElementKind};
pub use error::{BundleError, BundleResult};
pub use flavor::Flavor;
pub use manifest::{LoadOptions, Manifest};
pub use mimetype::MimeType;
pub use packager::{BundlePackager, Compression, PackReport, ZipPackager};
pub use reference::Reference;
