//! Scan Rasterizer – re-projects an unordered [`PointSet`] into a fixed
//! resolution angular range scan.
//!
//! Every point is binned by its bearing `atan2(y, x)` in the target frame's
//! XY plane; each bin keeps the nearest planar range `hypot(x, y)` seen.
//! Bins nobody hits keep the "no obstacle" value: `+∞` when
//! [`ScanShape::use_inf`] is set, `range_max + inf_epsilon` otherwise.
//!
//! The per-bin minimum is independent of point order.  Which point's
//! intensity wins an exact range tie is not: the first point keeps the bin.

use merger_types::{Header, PointSet, RangeScan};

/// Geometry of the synthesized scan.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ScanShape {
    pub angle_min: f64,
    pub angle_max: f64,
    pub angle_increment: f64,
    pub range_min: f64,
    pub range_max: f64,
    /// Reported in the output scan; does not affect binning.
    pub scan_time: f64,
    /// Empty bins hold `+∞` instead of `range_max + inf_epsilon`.
    pub use_inf: bool,
    pub inf_epsilon: f64,
}

/// Largest number of bins a synthesized scan may have.
pub const MAX_RANGES_SIZE: usize = u32::MAX as usize;

impl ScanShape {
    /// `ceil((angle_max - angle_min) / angle_increment)`, or `None` when the
    /// shape is degenerate or needs more than [`MAX_RANGES_SIZE`] bins.
    pub fn checked_ranges_size(&self) -> Option<usize> {
        let bins = ((self.angle_max - self.angle_min) / self.angle_increment).ceil();
        (bins.is_finite() && bins > 0.0 && bins <= MAX_RANGES_SIZE as f64).then_some(bins as usize)
    }

    /// Bin count of the output scan: `0` for a degenerate shape (including a
    /// zero increment), otherwise capped at [`MAX_RANGES_SIZE`].
    pub fn ranges_size(&self) -> usize {
        let bins = ((self.angle_max - self.angle_min) / self.angle_increment).ceil();
        if bins.is_finite() && bins > 0.0 {
            bins.min(MAX_RANGES_SIZE as f64) as usize
        } else {
            0
        }
    }

    /// Value of a bin with no qualifying point.
    pub fn no_obstacle_range(&self) -> f64 {
        if self.use_inf {
            f64::INFINITY
        } else {
            self.range_max + self.inf_epsilon
        }
    }
}

/// Nearest-range-per-bin rasterizer.
#[derive(Debug, Clone, Copy)]
pub struct ScanRasterizer {
    shape: ScanShape,
}

impl ScanRasterizer {
    pub fn new(shape: ScanShape) -> Self {
        Self { shape }
    }

    pub fn shape(&self) -> &ScanShape {
        &self.shape
    }

    /// Build a complete scan from `points`.  The result always has
    /// [`ScanShape::ranges_size`] bins; intensities are present iff `points`
    /// tracks intensity.
    pub fn rasterize(&self, points: &PointSet, header: Header) -> RangeScan {
        let shape = &self.shape;
        let size = shape.ranges_size();

        let mut ranges = vec![shape.no_obstacle_range(); size];
        let mut intensities = points.has_intensity().then(|| vec![0.0f32; size]);

        for point in points.iter() {
            let range = point.x.hypot(point.y);
            let angle = point.y.atan2(point.x);
            if !range.is_finite()
                || !angle.is_finite()
                || range < shape.range_min
                || range > shape.range_max
                || angle < shape.angle_min
                || angle > shape.angle_max
            {
                continue;
            }

            // A point exactly on angle_max would land one past the end when
            // the window is a whole number of increments.
            let index = (((angle - shape.angle_min) / shape.angle_increment).floor() as usize)
                .min(size.saturating_sub(1));
            let Some(cell) = ranges.get_mut(index) else {
                continue;
            };
            if range < *cell {
                *cell = range;
                if let Some(intensities) = intensities.as_mut() {
                    intensities[index] = point.intensity;
                }
            }
        }

        RangeScan {
            header,
            angle_min: shape.angle_min,
            angle_max: shape.angle_max,
            angle_increment: shape.angle_increment,
            time_increment: 0.0,
            scan_time: shape.scan_time,
            range_min: shape.range_min,
            range_max: shape.range_max,
            ranges,
            intensities,
        }
    }
}
