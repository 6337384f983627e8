//! Merging one bundle into another.

use std::collections::{HashMap, HashSet};
use std::fmt;
use std::fs;
use std::path::Path;
use std::str::FromStr;

use serde::Serialize;
use tracing::{debug, info, warn};

use super::{Bundle, BundleLock};
use crate::element::{Element, ElementKind};
use crate::error::{BundleError, BundleResult};
use crate::reference::Reference;

/// What to do when both bundles contain an element with the same identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum MergeMode {
    /// Add the source element under a fresh identifier.
    #[default]
    Merge,
    /// Replace the target element with the source element.
    Replace,
    /// Keep the target element.
    Skip,
    /// Abort the merge without touching the target.
    Fail,
}

impl MergeMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            MergeMode::Merge => "merge",
            MergeMode::Replace => "replace",
            MergeMode::Skip => "skip",
            MergeMode::Fail => "fail",
        }
    }
}

impl fmt::Display for MergeMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for MergeMode {
    type Err = BundleError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "merge" => Ok(MergeMode::Merge),
            "replace" => Ok(MergeMode::Replace),
            "skip" => Ok(MergeMode::Skip),
            "fail" => Ok(MergeMode::Fail),
            other => Err(BundleError::InvalidConfig(format!("unknown merge mode '{}'", other))),
        }
    }
}

/// What a merge did with each source element.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct MergeReport {
    /// Source elements added under their own identifier.
    pub added: Vec<String>,
    /// Target elements replaced by the source element of the same identifier.
    pub replaced: Vec<String>,
    /// Source elements left out because the target already had them.
    pub skipped: Vec<String>,
    /// Source elements added under a new identifier, as `(old, new)`.
    pub renamed: Vec<(String, String)>,
}

/// Merge the bundle at `source` into the bundle at `target`.
///
/// Both bundles are locked for the duration and unlocked on every exit
/// path. With `move_files`, files are moved out of the source and the source
/// directory is deleted once the merged manifest has been saved.
///
/// # Errors
///
/// - [`BundleError::LockUnavailable`] if either bundle is locked
/// - [`BundleError::MergeConflict`] in [`MergeMode::Fail`] when an
///   identifier exists on both sides; the target is left unchanged
pub fn merge(
    target: &Path,
    source: &Path,
    move_files: bool,
    mode: MergeMode,
) -> BundleResult<(Bundle, MergeReport)> {
    let target_lock = BundleLock::acquire(target)?;
    let source_lock = BundleLock::acquire(source)?;

    let mut target_bundle = Bundle::open(target)?;
    let source_bundle = Bundle::open(source)?;
    info!(
        target = %target.display(),
        source = %source.display(),
        mode = %mode,
        "Merging bundles"
    );

    let conflicts: HashSet<&str> = source_bundle
        .elements()
        .iter()
        .filter_map(Element::id)
        .filter(|id| target_bundle.contains(id))
        .collect();

    if mode == MergeMode::Fail {
        if let Some(id) = source_bundle
            .elements()
            .iter()
            .filter_map(Element::id)
            .find(|id| conflicts.contains(id))
        {
            return Err(BundleError::MergeConflict(id.to_string()));
        }
    }

    let renames = if mode == MergeMode::Merge {
        plan_renames(&target_bundle, &source_bundle, &conflicts)
    } else {
        HashMap::new()
    };

    let mut report = MergeReport::default();
    for element in source_bundle.elements() {
        let Some(id) = element.id() else { continue };
        if element.kind() == ElementKind::Unclassified {
            warn!(id = %id, "Skipping unclassified element during merge");
            report.skipped.push(id.to_string());
            continue;
        }

        let mut element = element.clone();
        rewrite_reference(&mut element, &renames, &source_bundle);

        if !conflicts.contains(id) {
            target_bundle.add(element, move_files)?;
            report.added.push(id.to_string());
            continue;
        }

        match mode {
            MergeMode::Skip => {
                debug!(id = %id, "Keeping target element");
                report.skipped.push(id.to_string());
            }
            MergeMode::Replace => {
                target_bundle.remove(id)?;
                target_bundle.add(element, move_files)?;
                report.replaced.push(id.to_string());
            }
            MergeMode::Merge => {
                let new_id = renames
                    .get(id)
                    .cloned()
                    .unwrap_or_else(|| target_bundle.manifest().next_id(element.kind()));
                element.set_id(Some(new_id.clone()));
                target_bundle.add(element, move_files)?;
                report.renamed.push((id.to_string(), new_id));
            }
            MergeMode::Fail => return Err(BundleError::MergeConflict(id.to_string())),
        }
    }

    target_bundle.save()?;

    if move_files {
        drop(source_bundle);
        fs::remove_dir_all(source).map_err(|e| BundleError::write(source, e))?;
        source_lock.disarm();
        debug!(source = %source.display(), "Removed merged source bundle");
    } else {
        source_lock.release()?;
    }
    target_lock.release()?;

    info!(
        added = report.added.len(),
        replaced = report.replaced.len(),
        skipped = report.skipped.len(),
        renamed = report.renamed.len(),
        "Merge complete"
    );
    Ok((target_bundle, report))
}

/// Choose fresh identifiers for conflicting source elements.
///
/// New identifiers avoid everything present in either bundle.
fn plan_renames(
    target: &Bundle,
    source: &Bundle,
    conflicts: &HashSet<&str>,
) -> HashMap<String, String> {
    let mut taken: HashSet<String> = target
        .elements()
        .iter()
        .chain(source.elements())
        .filter_map(|e| e.id().map(str::to_string))
        .collect();

    let mut renames = HashMap::new();
    for element in source.elements() {
        let Some(id) = element.id() else { continue };
        if !conflicts.contains(id) {
            continue;
        }
        let kind = element.kind().as_str();
        let new_id = (1..)
            .map(|n| format!("{}-{}", kind, n))
            .find(|candidate| !taken.contains(candidate))
            .unwrap_or_else(|| format!("{}-{}", kind, uuid::Uuid::new_v4()));
        taken.insert(new_id.clone());
        renames.insert(id.to_string(), new_id);
    }
    renames
}

/// Point references between source elements at their renamed targets.
fn rewrite_reference(element: &mut Element, renames: &HashMap<String, String>, source: &Bundle) {
    let Some(reference) = element.reference() else {
        return;
    };
    let Some(new_id) = renames.get(reference.identifier()) else {
        return;
    };
    let points_into_source = source
        .element_by_id(reference.identifier())
        .is_some_and(|target| target.kind().as_str() == reference.ty());
    if points_into_source {
        let rewritten = Reference::new(reference.ty(), new_id.clone());
        element.refer_to(rewritten);
    }
}
