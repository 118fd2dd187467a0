//! De-identification seam.
//!
//! The actual transform is an external collaborator; the engine only cares
//! about its verdict. A clean or warnings-only run lets the payload proceed
//! to export; a quarantine or error verdict condemns the whole manifest.

use std::path::Path;

use async_trait::async_trait;

use crate::error::Result;

/// Verdict from one anonymization run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AnonymizerOutcome {
    /// No exceptions; the output file is ready to export.
    Clean,
    /// The transform produced warnings but no hard failure; the output is
    /// still usable. Logged, not fatal.
    Warnings(Vec<String>),
    /// The transform demands the object be quarantined.
    Quarantine,
    /// The transform itself failed; treated like a quarantine demand.
    Error(String),
}

/// De-identifies `input` into `output` and reports a verdict.
///
/// Implementations must write `output` in full before returning a non-fatal
/// outcome; `output` is handed straight to the export queues.
#[async_trait]
pub trait Anonymizer: Send + Sync {
    async fn anonymize(&self, input: &Path, output: &Path) -> Result<AnonymizerOutcome>;
}

/// No-op anonymizer: copies the payload through unchanged.
///
/// Used when de-identification is disabled, so the processor always has a
/// pool file to point export queue elements at.
#[derive(Debug, Default, Clone)]
pub struct PassthroughAnonymizer;

#[async_trait]
impl Anonymizer for PassthroughAnonymizer {
    async fn anonymize(&self, input: &Path, output: &Path) -> Result<AnonymizerOutcome> {
        tokio::fs::copy(input, output).await?;
        Ok(AnonymizerOutcome::Clean)
    }
}
