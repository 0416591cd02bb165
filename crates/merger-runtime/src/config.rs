//! Merger configuration – read once at startup from a TOML file.
//!
//! Every option has a default so an empty file (or no file at all) yields a
//! working configuration.  After loading, `LASER_MERGER_*` environment
//! variables may override a few fields, and [`MergerConfig::validate`]
//! rejects configurations the merger cannot run with.

use std::f64::consts::PI;
use std::fs;
use std::path::Path;
use std::time::{Duration, Instant};

use merger_perception::geometry::{Quaternion, Vec3};
use merger_perception::{MAX_RANGES_SIZE, ScanShape, TfEngine, Transform3D};
use merger_types::MergeError;
use serde::{Deserialize, Serialize};

/// A fixed sensor mounting: pose of `child` in `parent`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StaticTransform {
    pub parent: String,
    pub child: String,
    /// Metres, `[x, y, z]`.
    #[serde(default)]
    pub translation: [f64; 3],
    /// Radians, `[roll, pitch, yaw]`.
    #[serde(default)]
    pub rotation_rpy: [f64; 3],
}

impl StaticTransform {
    pub fn to_transform(&self) -> Transform3D {
        let [x, y, z] = self.translation;
        let [roll, pitch, yaw] = self.rotation_rpy;
        Transform3D::new(Vec3::new(x, y, z), Quaternion::from_rpy(roll, pitch, yaw))
    }
}

/// Immutable node configuration shared by every merger component.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MergerConfig {
    /// Frame every output is expressed in.
    #[serde(default = "default_target_frame")]
    pub target_frame: String,

    /// Topics carrying range scans.  Empty names are ignored.
    #[serde(default = "default_scan_topics")]
    pub scan_topics: Vec<String>,

    /// Topics carrying point clouds.  Empty names are ignored.
    #[serde(default = "default_point_cloud_topics")]
    pub point_cloud_topics: Vec<String>,

    /// Accepted for compatibility; lookups always use the latest transform.
    #[serde(default = "default_transform_tolerance")]
    pub transform_tolerance: f64,

    /// Merge frequency (Hz).
    #[serde(default = "default_rate")]
    pub rate: f64,

    /// Capacity of each output channel.
    #[serde(default = "default_queue_size")]
    pub queue_size: usize,

    #[serde(default = "default_max_range")]
    pub max_range: f64,
    #[serde(default = "default_min_range")]
    pub min_range: f64,
    #[serde(default = "default_max_angle")]
    pub max_angle: f64,
    #[serde(default = "default_min_angle")]
    pub min_angle: f64,
    #[serde(default = "default_scan_time")]
    pub scan_time: f64,
    #[serde(default = "default_angle_increment")]
    pub angle_increment: f64,

    /// Added to `max_range` for empty bins when `use_inf` is off.
    #[serde(default = "default_inf_epsilon")]
    pub inf_epsilon: f64,

    /// Empty bins report `+inf` instead of `max_range + inf_epsilon`.
    #[serde(default = "default_use_inf")]
    pub use_inf: bool,

    /// Sensor mountings loaded into the transform tree at startup.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub static_transforms: Vec<StaticTransform>,
}

fn default_target_frame() -> String {
    "base_link".to_string()
}
fn default_scan_topics() -> Vec<String> {
    vec![
        "/sick_s30b/laser/scan0".to_string(),
        "/sick_s30b/laser/scan1".to_string(),
    ]
}
fn default_point_cloud_topics() -> Vec<String> {
    vec![
        "/sick_s30b/laser/points0".to_string(),
        "/sick_s30b/laser/points1".to_string(),
    ]
}
fn default_transform_tolerance() -> f64 {
    0.01
}
fn default_rate() -> f64 {
    30.0
}
fn default_queue_size() -> usize {
    20
}
fn default_max_range() -> f64 {
    30.0
}
fn default_min_range() -> f64 {
    0.06
}
fn default_max_angle() -> f64 {
    PI
}
fn default_min_angle() -> f64 {
    -PI
}
fn default_scan_time() -> f64 {
    1.0 / 30.0
}
fn default_angle_increment() -> f64 {
    PI / 180.0
}
fn default_inf_epsilon() -> f64 {
    1.0
}
fn default_use_inf() -> bool {
    true
}

impl Default for MergerConfig {
    fn default() -> Self {
        Self {
            target_frame: default_target_frame(),
            scan_topics: default_scan_topics(),
            point_cloud_topics: default_point_cloud_topics(),
            transform_tolerance: default_transform_tolerance(),
            rate: default_rate(),
            queue_size: default_queue_size(),
            max_range: default_max_range(),
            min_range: default_min_range(),
            max_angle: default_max_angle(),
            min_angle: default_min_angle(),
            scan_time: default_scan_time(),
            angle_increment: default_angle_increment(),
            inf_epsilon: default_inf_epsilon(),
            use_inf: default_use_inf(),
            static_transforms: Vec::new(),
        }
    }
}

impl MergerConfig {
    /// Scan topics with a non-empty name.
    pub fn active_scan_topics(&self) -> impl Iterator<Item = &str> {
        self.scan_topics.iter().map(String::as_str).filter(|t| !t.is_empty())
    }

    /// Point cloud topics with a non-empty name.
    pub fn active_point_cloud_topics(&self) -> impl Iterator<Item = &str> {
        self.point_cloud_topics
            .iter()
            .map(String::as_str)
            .filter(|t| !t.is_empty())
    }

    /// Reject configurations the merger cannot run with.
    ///
    /// # Errors
    ///
    /// [`MergeError::Config`] naming the first offending option.
    pub fn validate(&self) -> Result<(), MergeError> {
        if self.active_scan_topics().next().is_none() && self.active_point_cloud_topics().next().is_none() {
            return Err(MergeError::Config(
                "No topic was provided to read input laser scans or point clouds".to_string(),
            ));
        }
        if self.target_frame.is_empty() {
            return Err(MergeError::Config("target_frame must not be empty".to_string()));
        }
        if !(self.rate.is_finite() && self.rate > 0.0) {
            return Err(MergeError::Config(format!("rate must be positive, got {}", self.rate)));
        }
        let schedulable = Duration::try_from_secs_f64(1.0 / self.rate)
            .ok()
            .and_then(|period| Instant::now().checked_add(period))
            .is_some();
        if !schedulable {
            return Err(MergeError::Config(format!(
                "rate {} Hz gives a period too long to schedule",
                self.rate
            )));
        }
        if !(self.angle_increment.is_finite() && self.angle_increment > 0.0) {
            return Err(MergeError::Config(format!(
                "angle_increment must be positive, got {}",
                self.angle_increment
            )));
        }
        if !(self.max_angle > self.min_angle) {
            return Err(MergeError::Config(format!(
                "max_angle ({}) must exceed min_angle ({})",
                self.max_angle, self.min_angle
            )));
        }
        if !(self.min_range >= 0.0 && self.max_range > self.min_range) {
            return Err(MergeError::Config(format!(
                "range window [{}, {}] is invalid",
                self.min_range, self.max_range
            )));
        }
        if self.scan_shape().checked_ranges_size().is_none() {
            return Err(MergeError::Config(format!(
                "angular window [{}, {}] at increment {} needs more than {} bins",
                self.min_angle, self.max_angle, self.angle_increment, MAX_RANGES_SIZE
            )));
        }
        Ok(())
    }

    /// Shape of the synthesized scan.
    pub fn scan_shape(&self) -> ScanShape {
        ScanShape {
            angle_min: self.min_angle,
            angle_max: self.max_angle,
            angle_increment: self.angle_increment,
            range_min: self.min_range,
            range_max: self.max_range,
            scan_time: self.scan_time,
            use_inf: self.use_inf,
            inf_epsilon: self.inf_epsilon,
        }
    }

    /// Wall-clock period between merge ticks.
    ///
    /// # Panics
    ///
    /// If `rate` has not passed [`MergerConfig::validate`].
    pub fn period(&self) -> Duration {
        Duration::from_secs_f64(1.0 / self.rate)
    }

    /// Transform tree holding every configured static transform.
    pub fn build_tf_engine(&self) -> TfEngine {
        let mut tf = TfEngine::new();
        for st in &self.static_transforms {
            tf.set_transform(&st.parent, &st.child, st.to_transform());
        }
        tf
    }
}

/// Load, override from the environment, and validate.  `None` starts from
/// [`MergerConfig::default`].
///
/// # Errors
///
/// [`MergeError::Config`] for an unreadable or unparsable file, or a
/// configuration that fails validation.
pub fn load(path: Option<&Path>) -> Result<MergerConfig, MergeError> {
    let mut cfg = match path {
        Some(path) => load_from(path)?,
        None => MergerConfig::default(),
    };
    apply_env_overrides(&mut cfg);
    cfg.validate()?;
    Ok(cfg)
}

/// Parse the config at `path` without applying overrides or validation.
pub fn load_from(path: &Path) -> Result<MergerConfig, MergeError> {
    let raw = fs::read_to_string(path).map_err(|e| {
        MergeError::Config(format!("Failed to read config at {}: {}", path.display(), e))
    })?;
    toml::from_str(&raw).map_err(|e| MergeError::Config(format!("Failed to parse config: {}", e)))
}

/// Apply `LASER_MERGER_*` environment variable overrides to `cfg`.
///
/// | Variable | Config field |
/// |---|---|
/// | `LASER_MERGER_TARGET_FRAME` | `target_frame` |
/// | `LASER_MERGER_RATE` | `rate` |
/// | `LASER_MERGER_USE_INF` | `use_inf` |
///
/// Values that do not parse are ignored.
pub fn apply_env_overrides(cfg: &mut MergerConfig) {
    if let Ok(v) = std::env::var("LASER_MERGER_TARGET_FRAME") {
        cfg.target_frame = v;
    }
    if let Ok(v) = std::env::var("LASER_MERGER_RATE")
        && let Ok(rate) = v.parse::<f64>()
    {
        cfg.rate = rate;
    }
    if let Ok(v) = std::env::var("LASER_MERGER_USE_INF")
        && let Ok(use_inf) = v.parse::<bool>()
    {
        cfg.use_inf = use_inf;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use merger_perception::TransformProvider;

    fn write_config(contents: &str) -> (tempfile::TempDir, std::path::PathBuf) {
        let dir = tempfile::tempdir().expect("tmp dir");
        let path = dir.path().join("merger.toml");
        fs::write(&path, contents).expect("write config");
        (dir, path)
    }

    #[test]
    fn defaults_match_reference_node() {
        let cfg = MergerConfig::default();
        assert_eq!(cfg.target_frame, "base_link");
        assert_eq!(cfg.scan_topics.len(), 2);
        assert_eq!(cfg.queue_size, 20);
        assert!((cfg.rate - 30.0).abs() < 1e-12);
        assert!((cfg.min_range - 0.06).abs() < 1e-12);
        assert!(cfg.use_inf);
        assert!(cfg.validate().is_ok());
    }

    #[test]
    fn empty_file_yields_defaults() {
        let (_dir, path) = write_config("");
        assert_eq!(load_from(&path).expect("parse"), MergerConfig::default());
    }

    #[test]
    fn partial_file_overrides_only_given_fields() {
        let (_dir, path) = write_config(
            r#"
target_frame = "odom"
scan_topics = ["/front/scan"]
point_cloud_topics = []
use_inf = false

[[static_transforms]]
parent = "odom"
child = "front_laser"
translation = [0.3, 0.0, 0.1]
rotation_rpy = [0.0, 0.0, 1.5707963267948966]
"#,
        );
        let cfg = load_from(&path).expect("parse");
        assert_eq!(cfg.target_frame, "odom");
        assert_eq!(cfg.active_scan_topics().collect::<Vec<_>>(), vec!["/front/scan"]);
        assert_eq!(cfg.active_point_cloud_topics().count(), 0);
        assert!(!cfg.use_inf);
        assert_eq!(cfg.max_range, 30.0);
        assert_eq!(cfg.static_transforms.len(), 1);

        let t = cfg.build_tf_engine().lookup("odom", "front_laser").expect("mounted");
        assert!((t.translation.x - 0.3).abs() < 1e-12);
    }

    #[test]
    fn missing_file_is_a_config_error() {
        let dir = tempfile::tempdir().expect("tmp dir");
        let err = load_from(&dir.path().join("absent.toml")).unwrap_err();
        assert!(matches!(err, MergeError::Config(_)));
    }

    #[test]
    fn garbage_file_is_a_config_error() {
        let (_dir, path) = write_config("rate = \"fast\"");
        assert!(matches!(load_from(&path), Err(MergeError::Config(_))));
    }

    #[test]
    fn no_topics_is_fatal() {
        let cfg = MergerConfig {
            scan_topics: vec![String::new()],
            point_cloud_topics: vec![],
            ..MergerConfig::default()
        };
        let err = cfg.validate().unwrap_err();
        assert!(err.to_string().contains("No topic was provided"));
    }

    #[test]
    fn invalid_shapes_are_rejected() {
        let bad = [
            MergerConfig { rate: 0.0, ..MergerConfig::default() },
            MergerConfig { angle_increment: -0.1, ..MergerConfig::default() },
            MergerConfig { min_angle: 1.0, max_angle: 1.0, ..MergerConfig::default() },
            MergerConfig { min_range: 5.0, max_range: 1.0, ..MergerConfig::default() },
            MergerConfig { target_frame: String::new(), ..MergerConfig::default() },
            MergerConfig { rate: 1e-30, ..MergerConfig::default() },
            MergerConfig { angle_increment: 1e-12, ..MergerConfig::default() },
        ];
        for cfg in bad {
            assert!(matches!(cfg.validate(), Err(MergeError::Config(_))), "{cfg:?}");
        }
    }

    #[test]
    fn scan_shape_and_period_follow_config() {
        let cfg = MergerConfig {
            rate: 10.0,
            use_inf: false,
            inf_epsilon: 2.0,
            ..MergerConfig::default()
        };
        let shape = cfg.scan_shape();
        assert_eq!(shape.range_max, 30.0);
        assert_eq!(shape.no_obstacle_range(), 32.0);
        assert_eq!(cfg.period(), Duration::from_millis(100));
    }

    #[test]
    fn apply_env_overrides_changes_target_frame() {
        // SAFETY: single-threaded test; no other test reads this variable.
        unsafe { std::env::set_var("LASER_MERGER_TARGET_FRAME", "map") };
        let mut cfg = MergerConfig::default();
        apply_env_overrides(&mut cfg);
        assert_eq!(cfg.target_frame, "map");
        unsafe { std::env::remove_var("LASER_MERGER_TARGET_FRAME") };
    }

    #[test]
    fn apply_env_overrides_ignores_invalid_rate() {
        // SAFETY: single-threaded test; no other test reads this variable.
        unsafe { std::env::set_var("LASER_MERGER_RATE", "often") };
        let mut cfg = MergerConfig::default();
        apply_env_overrides(&mut cfg);
        assert_eq!(cfg.rate, 30.0);
        unsafe { std::env::remove_var("LASER_MERGER_RATE") };
    }
}
