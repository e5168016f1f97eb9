//! ---
//! ra_section: "01-core-functionality"
//! ra_subsection: "module"
//! ra_type: "source"
//! ra_scope: "code"
//! ra_description: "Shared primitives and utilities for the admin runtime."
//! ra_version: "v0.1.0"
//! ra_owner: "tbd"
//! ---
use std::path::Path;

use tracing::warn;

pub use relay_versioning::VersionInfo;

/// Read the deployed version label from `path`.
///
/// A missing, unreadable or blank file yields `baseline`.
pub async fn read_version_label(path: &Path, baseline: &str) -> String {
    match tokio::fs::read_to_string(path).await {
        Ok(contents) => {
            let label = contents.trim();
            if label.is_empty() {
                warn!(path = %path.display(), baseline, "version file is empty; using baseline");
                baseline.to_owned()
            } else {
                label.to_owned()
            }
        }
        Err(err) => {
            warn!(path = %path.display(), baseline, error = %err, "version file unavailable; using baseline");
            baseline.to_owned()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn trims_label_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("VERSION");
        std::fs::write(&path, "1.4.2\n").unwrap();
        assert_eq!(read_version_label(&path, "1.0.0").await, "1.4.2");
    }

    #[tokio::test]
    async fn missing_or_blank_file_uses_baseline() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("VERSION");
        assert_eq!(read_version_label(&path, "1.0.0").await, "1.0.0");
        std::fs::write(&path, "  \n").unwrap();
        assert_eq!(read_version_label(&path, "1.0.0").await, "1.0.0");
    }
}
