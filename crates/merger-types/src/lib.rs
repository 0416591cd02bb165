//! `merger-types` – shared data model for the laser merger.
//!
//! Input readings ([`RangeScan`], [`Cloud3D`]) arrive tagged by their native
//! frame, are flattened into a [`PointSet`] in the target frame, and leave the
//! pipeline wrapped in an [`Event`] on the output bus.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

/// Name of the optional per-point intensity channel of a [`Cloud3D`].
pub const INTENSITY_CHANNEL: &str = "intensity";

/// Coordinate frame and acquisition time of a reading or an output.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Header {
    /// Frame the data is expressed in (e.g. "laser_front", "base_link").
    pub frame_id: String,
    pub stamp: DateTime<Utc>,
}

impl Header {
    pub fn new(frame_id: impl Into<String>, stamp: DateTime<Utc>) -> Self {
        Self {
            frame_id: frame_id.into(),
            stamp,
        }
    }
}

// ────────────────────────────────────────────────────────────────────────────
// Points
// ────────────────────────────────────────────────────────────────────────────

/// A single 3-D point.  `intensity` is only meaningful when the owning
/// [`PointSet`] tracks intensity; otherwise it is always `0.0`.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct Point {
    pub x: f64,
    pub y: f64,
    pub z: f64,
    pub intensity: f32,
}

impl Point {
    pub fn new(x: f64, y: f64, z: f64) -> Self {
        Self {
            x,
            y,
            z,
            intensity: 0.0,
        }
    }

    pub fn with_intensity(mut self, intensity: f32) -> Self {
        self.intensity = intensity;
        self
    }
}

/// An ordered sequence of [`Point`]s with a single intensity flag for the
/// whole set.
///
/// Intensity presence is decided once per originating reading rather than
/// per point.  Merging a set that tracks intensity into one that does not
/// turns tracking on; points from the untracked set read as intensity `0`.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PointSet {
    has_intensity: bool,
    points: Vec<Point>,
}

impl PointSet {
    pub fn new(has_intensity: bool) -> Self {
        Self::with_capacity(has_intensity, 0)
    }

    pub fn with_capacity(has_intensity: bool, capacity: usize) -> Self {
        Self {
            has_intensity,
            points: Vec::with_capacity(capacity),
        }
    }

    pub fn has_intensity(&self) -> bool {
        self.has_intensity
    }

    /// Append a point.  The point's intensity is zeroed when this set does
    /// not track intensity.
    pub fn push(&mut self, mut point: Point) {
        if !self.has_intensity {
            point.intensity = 0.0;
        }
        self.points.push(point);
    }

    /// Append every point of `other`, preserving its order.
    pub fn append(&mut self, other: PointSet) {
        self.has_intensity |= other.has_intensity;
        self.points.extend(other.points);
    }

    pub fn points(&self) -> &[Point] {
        &self.points
    }

    pub fn iter(&self) -> std::slice::Iter<'_, Point> {
        self.points.iter()
    }

    pub fn len(&self) -> usize {
        self.points.len()
    }

    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }

    /// Lay the set out as an unordered cloud (height 1, width N) with
    /// `x`, `y`, `z` channels and, when tracked, an `intensity` channel.
    pub fn to_cloud(&self, header: Header) -> Cloud3D {
        let mut cloud = Cloud3D::new(header)
            .with_channel("x", self.points.iter().map(|p| p.x as f32).collect())
            .with_channel("y", self.points.iter().map(|p| p.y as f32).collect())
            .with_channel("z", self.points.iter().map(|p| p.z as f32).collect());
        if self.has_intensity {
            cloud = cloud.with_channel(
                INTENSITY_CHANNEL,
                self.points.iter().map(|p| p.intensity).collect(),
            );
        }
        cloud
    }
}

// ────────────────────────────────────────────────────────────────────────────
// Readings
// ────────────────────────────────────────────────────────────────────────────

/// A planar range scan: one range per ray, rays evenly spaced from
/// `angle_min` in steps of `angle_increment` (radians, counter-clockwise
/// around the sensor's Z axis).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RangeScan {
    pub header: Header,
    pub angle_min: f64,
    pub angle_max: f64,
    pub angle_increment: f64,
    /// Time between two consecutive measurements (seconds).
    #[serde(default)]
    pub time_increment: f64,
    /// Time for one complete scan (seconds).
    #[serde(default)]
    pub scan_time: f64,
    pub range_min: f64,
    pub range_max: f64,
    /// `null` on the wire reads as `+∞`: a ray with no return.
    #[serde(deserialize_with = "ranges_with_no_return")]
    pub ranges: Vec<f64>,
    /// Per-ray intensities; absent when the sensor does not report them.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub intensities: Option<Vec<f32>>,
}

/// JSON cannot carry non-finite numbers, so serializers write them as
/// `null`.
fn ranges_with_no_return<'de, D>(deserializer: D) -> Result<Vec<f64>, D::Error>
where
    D: serde::Deserializer<'de>,
{
    let raw = Vec::<Option<f64>>::deserialize(deserializer)?;
    Ok(raw.into_iter().map(|r| r.unwrap_or(f64::INFINITY)).collect())
}

impl RangeScan {
    /// Bearing of ray `index` in the sensor frame.
    pub fn ray_angle(&self, index: usize) -> f64 {
        self.angle_min + index as f64 * self.angle_increment
    }

    /// `true` when an intensity is available for every ray.
    pub fn has_intensity(&self) -> bool {
        self.intensities
            .as_ref()
            .is_some_and(|i| i.len() == self.ranges.len())
    }
}

/// One named per-point channel of a [`Cloud3D`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Channel {
    pub name: String,
    pub values: Vec<f32>,
}

/// An unordered 3-D point cloud stored column-wise: every channel holds one
/// value per point.  `x`, `y` and `z` are mandatory; any other channel
/// (`intensity`, `ring`, ...) is optional.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Cloud3D {
    pub header: Header,
    #[serde(default)]
    pub channels: Vec<Channel>,
}

impl Cloud3D {
    /// An empty cloud with no channels.
    pub fn new(header: Header) -> Self {
        Self {
            header,
            channels: Vec::new(),
        }
    }

    /// Build a cloud with only `x`, `y`, `z` channels.
    pub fn from_xyz(header: Header, points: &[[f32; 3]]) -> Self {
        Self::new(header)
            .with_channel("x", points.iter().map(|p| p[0]).collect())
            .with_channel("y", points.iter().map(|p| p[1]).collect())
            .with_channel("z", points.iter().map(|p| p[2]).collect())
    }

    /// Add a channel, replacing any existing channel of the same name.
    pub fn with_channel(mut self, name: impl Into<String>, values: Vec<f32>) -> Self {
        let name = name.into();
        match self.channels.iter_mut().find(|c| c.name == name) {
            Some(existing) => existing.values = values,
            None => self.channels.push(Channel { name, values }),
        }
        self
    }

    pub fn channel(&self, name: &str) -> Option<&[f32]> {
        self.channels
            .iter()
            .find(|c| c.name == name)
            .map(|c| c.values.as_slice())
    }

    pub fn has_channel(&self, name: &str) -> bool {
        self.channels.iter().any(|c| c.name == name)
    }

    /// Number of points (length of the first channel).
    pub fn len(&self) -> usize {
        self.channels.first().map_or(0, |c| c.values.len())
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Borrow the coordinate channels.
    ///
    /// # Errors
    ///
    /// [`MergeError::MalformedCloud`] if a coordinate channel is missing or
    /// any channel's length differs from the point count.
    pub fn xyz(&self) -> Result<(&[f32], &[f32], &[f32]), MergeError> {
        let get = |name: &str| {
            self.channel(name).ok_or_else(|| {
                MergeError::MalformedCloud(format!(
                    "cloud in frame '{}' has no '{name}' channel",
                    self.header.frame_id
                ))
            })
        };
        let (x, y, z) = (get("x")?, get("y")?, get("z")?);
        let n = self.len();
        if let Some(ragged) = self.channels.iter().find(|c| c.values.len() != n) {
            return Err(MergeError::MalformedCloud(format!(
                "channel '{}' has {} values, expected {n}",
                ragged.name,
                ragged.values.len()
            )));
        }
        Ok((x, y, z))
    }
}

/// Latest reading from one source: either a planar scan or a 3-D cloud.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Reading {
    Scan(RangeScan),
    Cloud(Cloud3D),
}

impl Reading {
    pub fn header(&self) -> &Header {
        match self {
            Reading::Scan(scan) => &scan.header,
            Reading::Cloud(cloud) => &cloud.header,
        }
    }

    /// The source identifier: the sensor's native frame name.
    pub fn source_id(&self) -> &str {
        &self.header().frame_id
    }

    pub fn stamp(&self) -> DateTime<Utc> {
        self.header().stamp
    }
}

impl From<RangeScan> for Reading {
    fn from(scan: RangeScan) -> Self {
        Reading::Scan(scan)
    }
}

impl From<Cloud3D> for Reading {
    fn from(cloud: Cloud3D) -> Self {
        Reading::Cloud(cloud)
    }
}

// ────────────────────────────────────────────────────────────────────────────
// Output events
// ────────────────────────────────────────────────────────────────────────────

/// Envelope for everything published on the output bus.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Event {
    pub id: Uuid,
    pub timestamp: DateTime<Utc>,
    /// e.g., "merger-runtime::scheduler"
    pub source: String,
    pub payload: EventPayload,
}

impl Event {
    pub fn new(source: impl Into<String>, payload: EventPayload) -> Self {
        Self {
            id: Uuid::new_v4(),
            timestamp: Utc::now(),
            source: source.into(),
            payload,
        }
    }
}

/// Outputs of one merge cycle.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum EventPayload {
    /// All merged points in the target frame.
    MergedCloud(Cloud3D),
    /// The synthesized range scan in the target frame.
    MergedScan(RangeScan),
}

/// Global error type for configuration, transform and publication failures.
#[derive(Error, Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum MergeError {
    #[error("Configuration Error: {0}")]
    Config(String),

    #[error("Could not transform {source_frame} to {target}: {reason}")]
    TransformUnavailable {
        target: String,
        source_frame: String,
        reason: String,
    },

    #[error("Could not transform point cloud: {0}")]
    CloudTransform(String),

    #[error("Malformed point cloud: {0}")]
    MalformedCloud(String),

    /// `kind` is the message type that arrived.
    #[error("Topic '{topic}' is not subscribed for {kind} messages")]
    TopicMismatch { topic: String, kind: String },

    #[error("Output Channel Error: {0}")]
    Channel(String),
}
