use cubegrid_common::{PositionSnapshot, Stride};
use glam::Vec3;

/// Errors from constructing a [`GridLayout`].
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum LayoutError {
    #[error("grid layout needs at least one instance")]
    EmptyCount,
}

/// Integer cell coordinate inside the `dim x dim x dim` cube.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct GridCoord {
    pub x: u32,
    pub y: u32,
    pub z: u32,
}

impl GridCoord {
    pub fn new(x: u32, y: u32, z: u32) -> Self {
        Self { x, y, z }
    }
}

/// Side length of the smallest cube of cells that holds `count` instances,
/// i.e. the exact integer `ceil(count^(1/3))`.
///
/// The float estimate is only a starting point; the integer correction makes
/// the result independent of how `powf` rounds. The WGSL kernel runs the same
/// correction so host and device always agree.
pub fn cube_dim(count: u32) -> u32 {
    let cube = |d: u32| (d as u64).pow(3);
    let mut dim = (count as f32).powf(1.0 / 3.0).ceil() as u32;
    while dim > 1 && cube(dim - 1) >= count as u64 {
        dim -= 1;
    }
    while cube(dim) < count as u64 {
        dim += 1;
    }
    dim
}

/// Map a cell coordinate `c` in `[0, dim - 1]` onto `[-1, 1]`.
///
/// `dim` must be at least 2; a one-cell grid has no extent to normalize.
pub fn normalize_axis(c: u32, dim: u32) -> f32 {
    debug_assert!(dim > 1, "normalize_axis needs dim > 1");
    (c as f32 / (dim - 1) as f32) * 2.0 - 1.0
}

/// Deterministic cube-packed layout for `count` instances.
///
/// Index `i` fills x first, then y, then z. Pure and stateless; every index
/// can be evaluated independently and in any order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GridLayout {
    count: u32,
    dim: u32,
}

impl GridLayout {
    pub fn new(count: u32) -> Result<Self, LayoutError> {
        if count == 0 {
            return Err(LayoutError::EmptyCount);
        }
        Ok(Self {
            count,
            dim: cube_dim(count),
        })
    }

    /// Number of instances (N).
    pub fn count(&self) -> u32 {
        self.count
    }

    /// Cube side length (`GridDimension`).
    pub fn dim(&self) -> u32 {
        self.dim
    }

    /// Cells in the cube left empty because `count` is not a perfect cube.
    pub fn unused_cells(&self) -> u64 {
        (self.dim as u64).pow(3) - self.count as u64
    }

    /// Integer cell of instance `index`.
    pub fn decode(&self, index: u32) -> GridCoord {
        debug_assert!(index < self.count, "index {index} out of range");
        let d = self.dim;
        GridCoord {
            x: index % d,
            y: (index / d) % d,
            z: index / (d * d),
        }
    }

    /// Normalized position of instance `index`, each axis in `[-1, 1]`.
    /// A single instance sits at the origin.
    pub fn position(&self, index: u32) -> Vec3 {
        if self.dim <= 1 {
            return Vec3::ZERO;
        }
        let c = self.decode(index);
        Vec3::new(
            normalize_axis(c.x, self.dim),
            normalize_axis(c.y, self.dim),
            normalize_axis(c.z, self.dim),
        )
    }

    /// Checked variant of [`GridLayout::position`].
    pub fn try_position(&self, index: u32) -> Option<Vec3> {
        (index < self.count).then(|| self.position(index))
    }

    /// Positions of all instances in index order.
    pub fn positions(&self) -> impl Iterator<Item = Vec3> + '_ {
        (0..self.count).map(|i| self.position(i))
    }

    /// Host reference buffer: what a completed dispatch should contain.
    pub fn snapshot(&self, stride: Stride) -> PositionSnapshot {
        let mut data = Vec::with_capacity(self.count as usize * stride.components() as usize);
        for p in self.positions() {
            data.extend_from_slice(&[p.x, p.y, p.z]);
            if stride == Stride::Vec4 {
                data.push(0.0);
            }
        }
        PositionSnapshot::new(self.count, stride, data)
    }
}
