//! Rendering adapter: renderer-agnostic view and interface.
//!
//! # Invariants
//! - Renderers only read positions; they never write the position buffer.
//! - The view is fixed per frame and carries no interaction state.

mod renderer;

pub use renderer::{DebugTextRenderer, RenderView, Renderer};

pub fn crate_info() -> &'static str {
    "cubegrid-render v0.1.0"
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn crate_loads() {
        assert!(crate_info().contains("render"));
    }
}
