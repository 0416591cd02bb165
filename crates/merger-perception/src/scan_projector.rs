//! Scan Projector – turns one [`RangeScan`] into target-frame points.
//!
//! Each valid ray `i` becomes the point `T · Rz(angle_min + i·increment) ·
//! (range, 0, 0)`, where `T` is the sensor→target transform.  Rays at or
//! beyond either range limit carry no measurement and are skipped.

use std::sync::Arc;

use merger_types::{MergeError, Point, PointSet, RangeScan};

use crate::geometry::{Matrix4, Vec3};
use crate::transform::TransformProvider;

/// Projects range scans into a common frame using a [`TransformProvider`].
#[derive(Clone)]
pub struct ScanProjector {
    provider: Arc<dyn TransformProvider>,
}

impl ScanProjector {
    pub fn new(provider: Arc<dyn TransformProvider>) -> Self {
        Self { provider }
    }

    /// Convert `scan` into points expressed in `target_frame`, in ray order.
    ///
    /// The output tracks intensity iff the scan carries one intensity per
    /// ray.
    ///
    /// # Errors
    ///
    /// Propagates [`MergeError::TransformUnavailable`] from the provider; no
    /// points are produced in that case.
    pub fn project(&self, scan: &RangeScan, target_frame: &str) -> Result<PointSet, MergeError> {
        let sensor_to_target = self
            .provider
            .lookup(target_frame, &scan.header.frame_id)?
            .to_matrix();

        let intensities = scan.intensities.as_deref().filter(|_| scan.has_intensity());
        let mut points = PointSet::with_capacity(intensities.is_some(), scan.ranges.len());

        for (i, &range) in scan.ranges.iter().enumerate() {
            if !is_valid_return(range, scan.range_min, scan.range_max) {
                continue;
            }
            let ray = sensor_to_target.mul(&Matrix4::rotation_z(scan.ray_angle(i)));
            let p = ray.transform_point(Vec3::new(range, 0.0, 0.0));

            let mut point = Point::new(p.x, p.y, p.z);
            if let Some(intensities) = intensities {
                point = point.with_intensity(intensities[i]);
            }
            points.push(point);
        }

        Ok(points)
    }
}

/// A ray is a real return only strictly inside `(range_min, range_max)`.
fn is_valid_return(range: f64, range_min: f64, range_max: f64) -> bool {
    range.is_finite() && range > range_min && range < range_max
}
