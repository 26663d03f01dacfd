// Copyright 2023-, GraphOps and Semiotic Labs.
// SPDX-License-Identifier: Apache-2.0

//! Receipt attachment persistence. Blobs live under
//! `<blob_receipts_dir>/<pledge_id>/<filename>`; the storage link returned
//! is that relative path.

use tracing::instrument;

use crate::ids::PledgeId;

#[instrument(skip(bytes))]
pub async fn persist_attachment(
    blob_receipts_dir: &str,
    pledge_id: &PledgeId,
    filename: &str,
    bytes: &[u8],
) -> Result<String, std::io::Error> {
    let dir = std::path::Path::new(blob_receipts_dir).join(pledge_id.as_str());
    tokio::fs::create_dir_all(&dir).await?;
    let path = dir.join(filename);
    tokio::fs::write(&path, bytes).await?;
    Ok(path.display().to_string())
}

/// Normalises a filename for duplicate detection: lower-cased,
/// whitespace collapsed, anything but alphanumerics/dot/dash/underscore
/// stripped.
pub fn normalise_filename(filename: &str) -> String {
    filename
        .to_lowercase()
        .chars()
        .filter(|c| c.is_alphanumeric() || matches!(c, '.' | '-' | '_'))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn normalise_strips_case_and_punctuation() {
        assert_eq!(normalise_filename("Receipt (1).PDF"), "receipt1.pdf");
    }
}
