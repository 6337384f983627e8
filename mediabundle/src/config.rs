//! Persistent settings read from an INI file.
//!
//! The default location is `<config_dir>/mediabundle/config.ini`:
//!
//! ```ini
//! [bundle]
//! work_dir = /var/lib/mediabundle
//! checksum = sha256
//!
//! [packaging]
//! compression = deflated
//!
//! [builder]
//! ignore_unknown = false
//! ```
//!
//! Missing keys fall back to their defaults.

use std::path::{Path, PathBuf};

use ini::Ini;
use tracing::debug;

use crate::checksum::ChecksumType;
use crate::error::{BundleError, BundleResult};
use crate::packager::Compression;

const BUNDLE_SECTION: &str = "bundle";
const PACKAGING_SECTION: &str = "packaging";
const BUILDER_SECTION: &str = "builder";

/// Settings shared by the builder, the packager and the CLI.
#[derive(Debug, Clone, PartialEq)]
pub struct BundleConfig {
    /// Directory under which new bundles are created and archives unpacked.
    pub work_dir: PathBuf,

    /// Algorithm used for checksums of newly added elements.
    pub checksum: ChecksumType,

    /// Compression applied to archive entries.
    pub compression: Compression,

    /// Skip files no registry rule recognises instead of failing.
    pub ignore_unknown: bool,
}

impl Default for BundleConfig {
    fn default() -> Self {
        Self {
            work_dir: default_work_dir(),
            checksum: ChecksumType::default(),
            compression: Compression::default(),
            ignore_unknown: false,
        }
    }
}

impl BundleConfig {
    /// Path of the default configuration file.
    pub fn default_path() -> PathBuf {
        dirs::config_dir()
            .unwrap_or_else(std::env::temp_dir)
            .join("mediabundle")
            .join("config.ini")
    }

    /// Load from the default location, or defaults if there is no file.
    pub fn load() -> BundleResult<Self> {
        let path = Self::default_path();
        if !path.exists() {
            debug!(path = %path.display(), "No configuration file, using defaults");
            return Ok(Self::default());
        }
        Self::load_from(&path)
    }

    /// Load from an explicit file.
    ///
    /// # Errors
    ///
    /// [`BundleError::NotFound`] if the file does not exist,
    /// [`BundleError::InvalidConfig`] if it cannot be parsed or holds an
    /// invalid value.
    pub fn load_from(path: &Path) -> BundleResult<Self> {
        if !path.exists() {
            return Err(BundleError::NotFound(path.to_path_buf()));
        }
        let ini = Ini::load_from_file(path).map_err(|e| {
            BundleError::InvalidConfig(format!("{}: {}", path.display(), e))
        })?;

        let mut config = Self::default();
        if let Some(section) = ini.section(Some(BUNDLE_SECTION)) {
            if let Some(dir) = section.get("work_dir").filter(|v| !v.trim().is_empty()) {
                config.work_dir = expand_home(dir.trim());
            }
            if let Some(kind) = section.get("checksum") {
                config.checksum = kind
                    .parse()
                    .map_err(|_| invalid(BUNDLE_SECTION, "checksum", kind))?;
            }
        }
        if let Some(section) = ini.section(Some(PACKAGING_SECTION)) {
            if let Some(compression) = section.get("compression") {
                config.compression = compression.parse()?;
            }
        }
        if let Some(section) = ini.section(Some(BUILDER_SECTION)) {
            if let Some(flag) = section.get("ignore_unknown") {
                config.ignore_unknown = parse_bool(flag)
                    .ok_or_else(|| invalid(BUILDER_SECTION, "ignore_unknown", flag))?;
            }
        }

        debug!(path = %path.display(), ?config, "Configuration loaded");
        Ok(config)
    }

    /// Write every setting to `path`, creating parent directories.
    pub fn save_to(&self, path: &Path) -> BundleResult<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| BundleError::create_dir(parent, e))?;
        }

        let mut ini = Ini::new();
        ini.with_section(Some(BUNDLE_SECTION))
            .set("work_dir", self.work_dir.to_string_lossy())
            .set("checksum", self.checksum.name());
        ini.with_section(Some(PACKAGING_SECTION))
            .set("compression", self.compression.as_str());
        ini.with_section(Some(BUILDER_SECTION))
            .set("ignore_unknown", self.ignore_unknown.to_string());

        ini.write_to_file(path)
            .map_err(|e| BundleError::write(path, e))
    }
}

fn default_work_dir() -> PathBuf {
    dirs::data_local_dir()
        .unwrap_or_else(std::env::temp_dir)
        .join("mediabundle")
}

fn expand_home(value: &str) -> PathBuf {
    match value.strip_prefix("~/") {
        Some(rest) => match dirs::home_dir() {
            Some(home) => home.join(rest),
            None => PathBuf::from(value),
        },
        None => PathBuf::from(value),
    }
}

fn parse_bool(value: &str) -> Option<bool> {
    match value.trim().to_lowercase().as_str() {
        "true" | "yes" | "1" | "on" => Some(true),
        "false" | "no" | "0" | "off" => Some(false),
        _ => None,
    }
}

fn invalid(section: &str, key: &str, value: &str) -> BundleError {
    BundleError::InvalidConfig(format!("invalid value '{}' for {}.{}", value, section, key))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_defaults() {
        let config = BundleConfig::default();
        assert_eq!(config.checksum, ChecksumType::Sha256);
        assert_eq!(config.compression, Compression::Deflated);
        assert!(!config.ignore_unknown);
        assert!(config.work_dir.ends_with("mediabundle"));
    }

    #[test]
    fn test_load_from_file() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("config.ini");
        std::fs::write(
            &path,
            "[bundle]\nwork_dir = /srv/bundles\nchecksum = md5\n\n\
             [packaging]\ncompression = stored\n\n[builder]\nignore_unknown = yes\n",
        )
        .unwrap();

        let config = BundleConfig::load_from(&path).unwrap();
        assert_eq!(config.work_dir, PathBuf::from("/srv/bundles"));
        assert_eq!(config.checksum, ChecksumType::Md5);
        assert_eq!(config.compression, Compression::Stored);
        assert!(config.ignore_unknown);
    }

    #[test]
    fn test_partial_file_keeps_defaults() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("config.ini");
        std::fs::write(&path, "[packaging]\ncompression = none\n").unwrap();

        let config = BundleConfig::load_from(&path).unwrap();
        assert_eq!(config.compression, Compression::Stored);
        assert_eq!(config.checksum, ChecksumType::Sha256);
    }

    #[test]
    fn test_invalid_values() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("config.ini");

        std::fs::write(&path, "[bundle]\nchecksum = crc\n").unwrap();
        assert!(matches!(
            BundleConfig::load_from(&path),
            Err(BundleError::InvalidConfig(_))
        ));

        std::fs::write(&path, "[builder]\nignore_unknown = maybe\n").unwrap();
        assert!(matches!(
            BundleConfig::load_from(&path),
            Err(BundleError::InvalidConfig(_))
        ));
    }

    #[test]
    fn test_missing_file() {
        let temp = TempDir::new().unwrap();
        let result = BundleConfig::load_from(&temp.path().join("absent.ini"));
        assert!(matches!(result, Err(BundleError::NotFound(_))));
    }

    #[test]
    fn test_save_then_load() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("nested").join("config.ini");
        let config = BundleConfig {
            work_dir: temp.path().join("work"),
            checksum: ChecksumType::Md5,
            compression: Compression::Stored,
            ignore_unknown: true,
        };

        config.save_to(&path).unwrap();
        assert_eq!(BundleConfig::load_from(&path).unwrap(), config);
    }
}
