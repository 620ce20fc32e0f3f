//! Developer tooling: snapshot inspector, layout verification, JSON export.
//!
//! # Invariants
//! - Tools only read snapshots; they never touch device state.
//! - Host recomputation of the layout is for diagnostics, never for rendering.

mod export;
mod inspector;

pub use export::{ToolsError, write_snapshot_json};
pub use inspector::{SnapshotInspector, SnapshotSummary, VerifyReport};

pub fn crate_info() -> &'static str {
    "cubegrid-tools v0.1.0"
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn crate_loads() {
        assert!(crate_info().contains("tools"));
    }
}
