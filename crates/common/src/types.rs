use glam::Vec3;
use serde::{Deserialize, Serialize};

use crate::config::ConfigError;

/// Largest supported instance count.
///
/// Every index and grid coordinate below this bound is exactly representable
/// as `f32`, and `cube_dim^3` stays inside `u32` arithmetic on the device.
pub const MAX_INSTANCE_COUNT: u32 = 1 << 24;

/// Number of `f32` components stored per position record.
///
/// `Vec4` carries an unused fourth slot that is always written as `0.0`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "u32", into = "u32")]
pub enum Stride {
    #[default]
    Vec3,
    Vec4,
}

impl Stride {
    /// Components per record (3 or 4).
    pub fn components(self) -> u32 {
        match self {
            Stride::Vec3 => 3,
            Stride::Vec4 => 4,
        }
    }

    /// Bytes per record.
    pub fn record_bytes(self) -> u64 {
        self.components() as u64 * std::mem::size_of::<f32>() as u64
    }
}

impl TryFrom<u32> for Stride {
    type Error = ConfigError;

    fn try_from(value: u32) -> Result<Self, Self::Error> {
        match value {
            3 => Ok(Stride::Vec3),
            4 => Ok(Stride::Vec4),
            other => Err(ConfigError::InvalidStride(other)),
        }
    }
}

impl From<Stride> for u32 {
    fn from(stride: Stride) -> Self {
        stride.components()
    }
}

impl std::fmt::Display for Stride {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "vec{}", self.components())
    }
}

/// Host-side copy of a position buffer: `count` records of `stride` floats.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PositionSnapshot {
    pub count: u32,
    pub stride: Stride,
    pub data: Vec<f32>,
}

impl PositionSnapshot {
    /// Wrap raw floats. `data.len()` must equal `count * stride`.
    pub fn new(count: u32, stride: Stride, data: Vec<f32>) -> Self {
        debug_assert_eq!(
            data.len(),
            count as usize * stride.components() as usize,
            "snapshot length does not match count * stride"
        );
        Self {
            count,
            stride,
            data,
        }
    }

    /// All-zero snapshot, the contents of a buffer nobody has written yet.
    pub fn zeroed(count: u32, stride: Stride) -> Self {
        Self::new(
            count,
            stride,
            vec![0.0; count as usize * stride.components() as usize],
        )
    }

    /// Raw components of record `index`.
    pub fn record(&self, index: u32) -> &[f32] {
        let s = self.stride.components() as usize;
        let base = index as usize * s;
        &self.data[base..base + s]
    }

    /// The xyz part of record `index`.
    pub fn position(&self, index: u32) -> Vec3 {
        let r = self.record(index);
        Vec3::new(r[0], r[1], r[2])
    }

    /// Iterate the xyz part of every record in index order.
    pub fn positions(&self) -> impl Iterator<Item = Vec3> + '_ {
        self.data
            .chunks_exact(self.stride.components() as usize)
            .map(|r| Vec3::new(r[0], r[1], r[2]))
    }

    /// Size of the equivalent device buffer in bytes.
    pub fn byte_len(&self) -> u64 {
        self.count as u64 * self.stride.record_bytes()
    }

    pub fn is_empty(&self) -> bool {
        self.count == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stride_sizes() {
        assert_eq!(Stride::Vec3.components(), 3);
        assert_eq!(Stride::Vec4.components(), 4);
        assert_eq!(Stride::Vec3.record_bytes(), 12);
        assert_eq!(Stride::Vec4.record_bytes(), 16);
    }

    #[test]
    fn stride_from_u32() {
        assert_eq!(Stride::try_from(3).unwrap(), Stride::Vec3);
        assert_eq!(Stride::try_from(4).unwrap(), Stride::Vec4);
        assert!(matches!(
            Stride::try_from(2),
            Err(ConfigError::InvalidStride(2))
        ));
    }

    #[test]
    fn stride_serializes_as_integer() {
        assert_eq!(serde_json::to_string(&Stride::Vec4).unwrap(), "4");
        let s: Stride = serde_json::from_str("3").unwrap();
        assert_eq!(s, Stride::Vec3);
        assert!(serde_json::from_str::<Stride>("5").is_err());
    }

    #[test]
    fn snapshot_record_access() {
        let snap = PositionSnapshot::new(
            2,
            Stride::Vec4,
            vec![1.0, 2.0, 3.0, 0.0, -1.0, -2.0, -3.0, 0.0],
        );
        assert_eq!(snap.record(1), &[-1.0, -2.0, -3.0, 0.0]);
        assert_eq!(snap.position(0), Vec3::new(1.0, 2.0, 3.0));
        assert_eq!(snap.positions().count(), 2);
        assert_eq!(snap.byte_len(), 32);
    }

    #[test]
    fn zeroed_snapshot() {
        let snap = PositionSnapshot::zeroed(5, Stride::Vec3);
        assert_eq!(snap.data.len(), 15);
        assert!(snap.positions().all(|p| p == Vec3::ZERO));
    }
}
