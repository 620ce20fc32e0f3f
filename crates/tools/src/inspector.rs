use cubegrid_common::{PositionSnapshot, Stride};
use cubegrid_layout::GridLayout;
use glam::Vec3;
use sha2::{Digest, Sha256};
use std::collections::HashSet;

/// Read-only queries over a host copy of the position buffer.
pub struct SnapshotInspector;

impl SnapshotInspector {
    /// Produce a summary of the snapshot.
    pub fn summary(snapshot: &PositionSnapshot) -> SnapshotSummary {
        let (min, max) = if snapshot.data.is_empty() {
            (Vec3::ZERO, Vec3::ZERO)
        } else {
            snapshot.positions().fold(
                (Vec3::splat(f32::INFINITY), Vec3::splat(f32::NEG_INFINITY)),
                |(lo, hi), p| (lo.min(p), hi.max(p)),
            )
        };
        SnapshotSummary {
            count: snapshot.count,
            stride: snapshot.stride,
            bytes: snapshot.byte_len(),
            min,
            max,
            digest: Self::digest(snapshot),
        }
    }

    /// SHA-256 over count, stride and the little-endian record bytes.
    /// Two dispatches of the same count and stride must agree.
    pub fn digest(snapshot: &PositionSnapshot) -> String {
        let mut hasher = Sha256::new();
        hasher.update(snapshot.count.to_le_bytes());
        hasher.update(snapshot.stride.components().to_le_bytes());
        for v in &snapshot.data {
            hasher.update(v.to_le_bytes());
        }
        format!("{:x}", hasher.finalize())
    }

    /// Compare a readback against the host-computed layout.
    ///
    /// Checks every record within `tolerance` per axis, the fourth component
    /// of vec4 records is zero, and no two instances share a position.
    pub fn verify(snapshot: &PositionSnapshot, tolerance: f32) -> VerifyReport {
        let components = snapshot.stride.components() as usize;
        let expected_len = snapshot.count as usize * components;
        let mut report = VerifyReport {
            count: snapshot.count,
            length_mismatch: snapshot.data.len() != expected_len,
            ..VerifyReport::default()
        };
        if report.length_mismatch {
            tracing::warn!(
                expected = expected_len,
                actual = snapshot.data.len(),
                "snapshot length does not match count and stride"
            );
            return report;
        }
        let Ok(layout) = GridLayout::new(snapshot.count) else {
            return report;
        };

        let mut seen = HashSet::with_capacity(snapshot.count as usize);
        for i in 0..snapshot.count {
            let actual = snapshot.position(i);
            let error = if actual.is_nan() {
                f32::NAN
            } else {
                (actual - layout.position(i)).abs().max_element()
            };
            if error.is_nan() || error > tolerance {
                report.mismatches += 1;
                if report.first_mismatch.is_none() {
                    report.first_mismatch = Some(i);
                }
            }
            if error.is_nan() {
                report.max_error = f32::NAN;
            } else if !report.max_error.is_nan() {
                report.max_error = report.max_error.max(error);
            }

            if snapshot.stride == Stride::Vec4 && snapshot.record(i)[3] != 0.0 {
                report.padding_violations += 1;
            }

            // Adding 0.0 folds -0.0 into +0.0 so both hash alike.
            let key = (actual + Vec3::ZERO).to_array().map(f32::to_bits);
            if !seen.insert(key) {
                report.duplicates += 1;
            }
        }

        if !report.is_ok() {
            tracing::warn!(
                mismatches = report.mismatches,
                padding = report.padding_violations,
                duplicates = report.duplicates,
                "snapshot verification failed"
            );
        }
        report
    }
}

/// Summary of a position snapshot.
#[derive(Debug, Clone)]
pub struct SnapshotSummary {
    pub count: u32,
    pub stride: Stride,
    pub bytes: u64,
    /// Per-axis minimum over all positions.
    pub min: Vec3,
    /// Per-axis maximum over all positions.
    pub max: Vec3,
    pub digest: String,
}

impl std::fmt::Display for SnapshotSummary {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "Snapshot: count={} stride={} bytes={} min=({:.3}, {:.3}, {:.3}) max=({:.3}, {:.3}, {:.3}) sha256={:.16}",
            self.count,
            self.stride,
            self.bytes,
            self.min.x,
            self.min.y,
            self.min.z,
            self.max.x,
            self.max.y,
            self.max.z,
            self.digest,
        )
    }
}

/// Outcome of [`SnapshotInspector::verify`].
#[derive(Debug, Clone, Default)]
pub struct VerifyReport {
    pub count: u32,
    /// Data length disagrees with `count * stride`; no records were checked.
    pub length_mismatch: bool,
    pub mismatches: u32,
    pub first_mismatch: Option<u32>,
    pub max_error: f32,
    /// vec4 records whose fourth component is non-zero.
    pub padding_violations: u32,
    pub duplicates: u32,
}

impl VerifyReport {
    pub fn is_ok(&self) -> bool {
        !self.length_mismatch
            && self.mismatches == 0
            && self.padding_violations == 0
            && self.duplicates == 0
    }
}

impl std::fmt::Display for VerifyReport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if self.length_mismatch {
            return write!(f, "Verify: FAILED (data length does not match count={})", self.count);
        }
        write!(
            f,
            "Verify: {} count={} mismatches={} max_error={:.2e} padding_violations={} duplicates={}",
            if self.is_ok() { "OK" } else { "FAILED" },
            self.count,
            self.mismatches,
            self.max_error,
            self.padding_violations,
            self.duplicates,
        )?;
        if let Some(i) = self.first_mismatch {
            write!(f, " first_mismatch={i}")?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn reference(count: u32, stride: Stride) -> PositionSnapshot {
        GridLayout::new(count).unwrap().snapshot(stride)
    }

    #[test]
    fn summary_bounds_full_cube() {
        let summary = SnapshotInspector::summary(&reference(1000, Stride::Vec3));
        assert_eq!(summary.count, 1000);
        assert_eq!(summary.bytes, 12_000);
        assert_eq!(summary.min, Vec3::splat(-1.0));
        assert_eq!(summary.max, Vec3::splat(1.0));
        assert_eq!(summary.digest.len(), 64);
    }

    #[test]
    fn summary_single_instance_at_origin() {
        let summary = SnapshotInspector::summary(&reference(1, Stride::Vec4));
        assert_eq!(summary.min, Vec3::ZERO);
        assert_eq!(summary.max, Vec3::ZERO);
        assert_eq!(summary.bytes, 16);
    }

    #[test]
    fn summary_display() {
        let s = format!("{}", SnapshotInspector::summary(&reference(8, Stride::Vec3)));
        assert!(s.contains("count=8"));
        assert!(s.contains("stride=vec3"));
        assert!(s.contains("min=(-1.000, -1.000, -1.000)"));
    }

    #[test]
    fn digest_stable_and_sensitive() {
        let a = reference(64, Stride::Vec3);
        let b = reference(64, Stride::Vec3);
        assert_eq!(SnapshotInspector::digest(&a), SnapshotInspector::digest(&b));

        let mut c = a.clone();
        c.data[5] += 1e-6;
        assert_ne!(SnapshotInspector::digest(&a), SnapshotInspector::digest(&c));

        let d = reference(64, Stride::Vec4);
        assert_ne!(SnapshotInspector::digest(&a), SnapshotInspector::digest(&d));
    }

    #[test]
    fn verify_accepts_reference() {
        for stride in [Stride::Vec3, Stride::Vec4] {
            for count in [1, 5, 8, 1000] {
                let report = SnapshotInspector::verify(&reference(count, stride), 1e-5);
                assert!(report.is_ok(), "{count} {stride}: {report}");
                assert_eq!(report.max_error, 0.0);
            }
        }
    }

    #[test]
    fn verify_flags_displaced_record() {
        let mut snap = reference(27, Stride::Vec3);
        snap.data[3 * 4 + 1] += 0.25;
        let report = SnapshotInspector::verify(&snap, 1e-5);
        assert!(!report.is_ok());
        assert_eq!(report.mismatches, 1);
        assert_eq!(report.first_mismatch, Some(4));
        assert!((report.max_error - 0.25).abs() < 1e-6);
    }

    #[test]
    fn verify_flags_zeroed_buffer() {
        // An undispatched buffer: every instance at the origin.
        let snap = PositionSnapshot::zeroed(8, Stride::Vec4);
        let report = SnapshotInspector::verify(&snap, 1e-5);
        assert_eq!(report.mismatches, 8);
        assert_eq!(report.duplicates, 7);
        assert_eq!(report.padding_violations, 0);
    }

    #[test]
    fn verify_flags_padding() {
        let mut snap = reference(8, Stride::Vec4);
        snap.data[4 * 2 + 3] = 1.0;
        let report = SnapshotInspector::verify(&snap, 1e-5);
        assert_eq!(report.padding_violations, 1);
        assert_eq!(report.mismatches, 0);
        assert!(!report.is_ok());
    }

    #[test]
    fn verify_flags_nan() {
        let mut snap = reference(8, Stride::Vec3);
        snap.data[0] = f32::NAN;
        let report = SnapshotInspector::verify(&snap, 1e-5);
        assert_eq!(report.mismatches, 1);
        assert!(report.max_error.is_nan());
    }

    #[test]
    fn verify_rejects_short_data() {
        let mut snap = reference(8, Stride::Vec3);
        snap.data.truncate(20);
        let report = SnapshotInspector::verify(&snap, 1e-5);
        assert!(report.length_mismatch);
        assert!(!report.is_ok());
        assert!(format!("{report}").contains("FAILED"));
    }
}
