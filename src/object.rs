//! Inbound object classification.
//!
//! The wire-level receiver hands the station plain files; before the [`Store`]
//! can file them it has to know whether a file is a manifest (a rollup
//! document listing required instance IDs) or a leaf instance. The dissection
//! of real DICOM datasets lives behind the [`ObjectClassifier`] seam so the
//! engine can be exercised without a DICOM toolkit on the test machine.
//!
//! [`Store`]: crate::store::Store

use std::fs;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::{Result, StationError};

/// A manifest document: a rollup object naming the instances that must all
/// be present before the group is forwarded.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ManifestDoc {
    /// Unique manifest ID; doubles as the manifest's file name in the store.
    pub id: String,
    /// Ordered list of referenced instance IDs.
    pub instances: Vec<String>,
}

/// Result of classifying one inbound file.
#[derive(Debug, Clone)]
pub enum ClassifiedObject {
    Manifest(ManifestDoc),
    Instance { id: String },
    Unrecognized,
}

/// Classifies a file on disk as a manifest, an instance, or neither.
///
/// Implementations must be cheap enough to call once per file per
/// reconciliation pass; the store re-classifies manifests on every recheck
/// and during garbage collection rather than keeping an in-memory index.
pub trait ObjectClassifier: Send + Sync {
    fn classify(&self, path: &Path) -> Result<ClassifiedObject>;
}

/// Default classifier for the JSON manifest format.
///
/// A file is a manifest iff it parses as a [`ManifestDoc`] JSON object.
/// Any other readable file is an instance whose ID is its file name.
#[derive(Debug, Default, Clone)]
pub struct JsonManifestClassifier;

impl ObjectClassifier for JsonManifestClassifier {
    fn classify(&self, path: &Path) -> Result<ClassifiedObject> {
        let bytes = fs::read(path).map_err(|e| {
            StationError::classify(format!("cannot read {}: {}", path.display(), e))
        })?;

        if let Ok(doc) = serde_json::from_slice::<ManifestDoc>(&bytes) {
            if !doc.id.trim().is_empty() {
                return Ok(ClassifiedObject::Manifest(doc));
            }
        }

        match path.file_name().and_then(|n| n.to_str()) {
            Some(name) => Ok(ClassifiedObject::Instance {
                id: name.to_string(),
            }),
            None => Ok(ClassifiedObject::Unrecognized),
        }
    }
}
