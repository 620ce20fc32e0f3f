use cubegrid_common::PositionSnapshot;
use std::path::Path;

/// Errors from tooling file output.
#[derive(Debug, thiserror::Error)]
pub enum ToolsError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Write a snapshot as pretty JSON (`count`, `stride`, flat `data`).
pub fn write_snapshot_json(
    path: impl AsRef<Path>,
    snapshot: &PositionSnapshot,
) -> Result<(), ToolsError> {
    let path = path.as_ref();
    let json = serde_json::to_string_pretty(snapshot)?;
    std::fs::write(path, json)?;
    tracing::info!(path = %path.display(), count = snapshot.count, "snapshot written");
    Ok(())
}
