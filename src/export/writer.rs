// src/export/writer.rs
//! Writes target groups as Prometheus file_sd JSON

use std::path::Path;

use tokio::fs::File;
use tokio::io::AsyncWriteExt;

use super::target::Target;

#[derive(thiserror::Error, Debug)]
pub enum ExportError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("failed to encode targets: {0}")]
    Encode(#[from] serde_json::Error),
}

/// Serialize targets as a JSON array followed by a newline
pub fn encode_targets(targets: &[Target]) -> Result<Vec<u8>, ExportError> {
    let mut buf = serde_json::to_vec(targets)?;
    buf.push(b'\n');
    Ok(buf)
}

/// Replace the whole file content with `targets`.
///
/// The file is created if missing and truncated otherwise; an empty slice
/// writes `[]`.
pub async fn write_targets(path: &Path, targets: &[Target]) -> Result<(), ExportError> {
    let contents = encode_targets(targets)?;

    let mut file = File::create(path).await?;
    file.write_all(&contents).await?;
    file.flush().await?;

    Ok(())
}
