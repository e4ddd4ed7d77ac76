//! Fetch functions - collect source extracts from a local directory
//!
//! Each extract is expected as `<source_type>.csv` (e.g. `weams.csv`,
//! `va_crosswalk.csv`). Files for unknown types are ignored.

use crate::ingestion::types::{RawUpload, SourceType};
use anyhow::{Context, Result};
use std::path::Path;
use tracing::{info, warn};

/// Read every recognised extract in `dir`, ordered by source type
pub async fn fetch_directory(dir: &Path) -> Result<Vec<RawUpload>> {
    info!("Scanning {:?} for source extracts", dir);

    let mut entries = tokio::fs::read_dir(dir)
        .await
        .with_context(|| format!("Failed to read directory {:?}", dir))?;

    let mut uploads = Vec::new();

    while let Some(entry) = entries.next_entry().await? {
        let path = entry.path();

        let is_csv = path
            .extension()
            .is_some_and(|ext| ext.eq_ignore_ascii_case("csv"));
        if !is_csv {
            continue;
        }

        let Some(stem) = path.file_stem().and_then(|s| s.to_str()) else {
            continue;
        };

        let source = match stem.parse::<SourceType>() {
            Ok(source) => source,
            Err(_) => {
                warn!("Skipping {:?}: not a known source type", path);
                continue;
            }
        };

        let content = tokio::fs::read(&path)
            .await
            .with_context(|| format!("Failed to read {:?}", path))?;
        info!("Read {} ({} bytes)", source, content.len());

        uploads.push(RawUpload::new(source, content));
    }

    uploads.sort_by_key(|u| u.source_type);

    Ok(uploads)
}
