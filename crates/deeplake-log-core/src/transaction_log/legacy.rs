//! Opaque fallback loader for legacy format 3 datasets.
//!
//! Format 3 predates the branch-aware commit log; its state lives in a
//! single `dataset_meta.json` document. This module does not interpret that
//! document, it only detects the format and hands the raw bytes to callers
//! that still need them.
use crate::storage::{self, LogLocation};
use crate::transaction_log::LogResult;

/// Marker file of a legacy format 3 dataset.
pub const DATASET_META_FILE: &str = "dataset_meta.json";

/// Handle to a legacy format 3 dataset.
#[derive(Debug, Clone)]
pub struct LegacyLog {
    location: LogLocation,
}

impl LegacyLog {
    pub(crate) fn attach(location: LogLocation) -> Self {
        Self { location }
    }

    pub fn log_format(&self) -> u32 {
        3
    }

    /// The raw `dataset_meta.json` bytes; the single entry point into the
    /// legacy format.
    pub async fn dataset_meta(&self) -> LogResult<Vec<u8>> {
        Ok(storage::get_bytes(&self.location, DATASET_META_FILE).await?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    type TestResult = Result<(), Box<dyn std::error::Error>>;

    #[tokio::test]
    async fn dataset_meta_returns_raw_bytes() -> TestResult {
        let tmp = TempDir::new()?;
        let location = LogLocation::local(tmp.path());
        storage::set_bytes(&location, DATASET_META_FILE, br#"{"version": 3}"#).await?;

        let log = LegacyLog::attach(location);

        assert_eq!(log.log_format(), 3);
        assert_eq!(log.dataset_meta().await?, br#"{"version": 3}"#);
        Ok(())
    }
}
