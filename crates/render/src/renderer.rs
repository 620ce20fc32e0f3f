use cubegrid_common::PositionSnapshot;
use glam::{Mat4, Vec3};

/// Camera/view configuration for rendering.
#[derive(Debug, Clone, Copy)]
pub struct RenderView {
    /// Camera position in world space.
    pub eye: Vec3,
    /// Point the camera is looking at.
    pub target: Vec3,
    /// Vertical field of view in degrees.
    pub fov_degrees: f32,
    pub near: f32,
    pub far: f32,
}

impl Default for RenderView {
    fn default() -> Self {
        Self {
            eye: Vec3::new(2.5, 2.0, 4.0),
            target: Vec3::ZERO,
            fov_degrees: 60.0,
            near: 0.1,
            far: 100.0,
        }
    }
}

impl RenderView {
    pub fn view_matrix(&self) -> Mat4 {
        Mat4::look_at_rh(self.eye, self.target, Vec3::Y)
    }

    pub fn projection_matrix(&self, aspect: f32) -> Mat4 {
        Mat4::perspective_rh(self.fov_degrees.to_radians(), aspect, self.near, self.far)
    }

    pub fn view_projection(&self, aspect: f32) -> Mat4 {
        self.projection_matrix(aspect) * self.view_matrix()
    }
}

/// Renderer-agnostic interface over a host copy of the position buffer.
pub trait Renderer {
    /// The output type produced by this renderer.
    type Output;

    /// Render one frame from the given positions and view.
    fn render(&self, positions: &PositionSnapshot, view: &RenderView) -> Self::Output;
}

/// Text renderer for position snapshots.
///
/// Produces a human-readable dump of a readback: a header followed by up to
/// `max_rows` records. Used for CLI output and logging.
#[derive(Debug)]
pub struct DebugTextRenderer {
    pub max_rows: usize,
}

impl Default for DebugTextRenderer {
    fn default() -> Self {
        Self { max_rows: 16 }
    }
}

impl DebugTextRenderer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_max_rows(max_rows: usize) -> Self {
        Self { max_rows }
    }
}

impl Renderer for DebugTextRenderer {
    type Output = String;

    fn render(&self, positions: &PositionSnapshot, view: &RenderView) -> String {
        let mut out = String::new();
        out.push_str(&format!(
            "=== Positions (count={}, stride={}, bytes={}) ===\n",
            positions.count,
            positions.stride,
            positions.byte_len()
        ));
        out.push_str(&format!(
            "Camera: eye=({:.1}, {:.1}, {:.1}) target=({:.1}, {:.1}, {:.1}) fov={:.0}\n",
            view.eye.x,
            view.eye.y,
            view.eye.z,
            view.target.x,
            view.target.y,
            view.target.z,
            view.fov_degrees
        ));

        for (i, p) in positions.positions().enumerate().take(self.max_rows) {
            out.push_str(&format!("  [{i:>6}] pos=({:.3}, {:.3}, {:.3})\n", p.x, p.y, p.z));
        }
        let shown = (positions.count as usize).min(self.max_rows);
        if shown < positions.count as usize {
            out.push_str(&format!("  ... {} more\n", positions.count as usize - shown));
        }

        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use cubegrid_common::Stride;
    use cubegrid_layout::GridLayout;

    #[test]
    fn debug_renderer_single_instance() {
        let snap = GridLayout::new(1).unwrap().snapshot(Stride::Vec3);
        let renderer = DebugTextRenderer::new();
        let output = renderer.render(&snap, &RenderView::default());

        assert!(output.contains("count=1"));
        assert!(output.contains("stride=vec3"));
        assert!(output.contains("pos=(0.000, 0.000, 0.000)"));
        assert!(!output.contains("more"));
    }

    #[test]
    fn debug_renderer_truncates() {
        let snap = GridLayout::new(1000).unwrap().snapshot(Stride::Vec4);
        let renderer = DebugTextRenderer::with_max_rows(4);
        let output = renderer.render(&snap, &RenderView::default());

        assert_eq!(output.matches("pos=").count(), 4);
        assert!(output.contains("... 996 more"));
        assert!(output.contains("bytes=16000"));
    }

    #[test]
    fn render_view_default() {
        let view = RenderView::default();
        assert_eq!(view.fov_degrees, 60.0);
        assert_eq!(view.target, Vec3::ZERO);
    }

    #[test]
    fn view_projection_is_finite() {
        let vp = RenderView::default().view_projection(16.0 / 9.0);
        assert!(vp.is_finite());
        // Target lands in front of the camera, inside clip space.
        let clip = vp * glam::Vec4::new(0.0, 0.0, 0.0, 1.0);
        assert!(clip.w > 0.0);
        let ndc = clip.truncate() / clip.w;
        assert!(ndc.x.abs() < 1e-4 && ndc.y.abs() < 1e-4);
    }
}
