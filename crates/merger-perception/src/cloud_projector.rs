//! Cloud Projector – turns one [`Cloud3D`] into target-frame points.

use std::sync::Arc;

use merger_types::{Cloud3D, INTENSITY_CHANNEL, MergeError, Point, PointSet};
use tracing::warn;

use crate::transform::CloudTransformService;

/// Projects point clouds into a common frame by delegating the whole-cloud
/// transform to a [`CloudTransformService`].
#[derive(Clone)]
pub struct CloudProjector {
    service: Arc<dyn CloudTransformService>,
}

impl CloudProjector {
    pub fn new(service: Arc<dyn CloudTransformService>) -> Self {
        Self { service }
    }

    /// Convert `cloud` into points expressed in `target_frame`, preserving
    /// the order of whatever points the transform service returns.
    ///
    /// Intensity is tracked iff the *original* cloud has an intensity
    /// channel.
    ///
    /// # Errors
    ///
    /// Any error from the transform service, or
    /// [`MergeError::MalformedCloud`] if the transformed cloud lacks
    /// coordinate channels.
    pub fn project(&self, cloud: &Cloud3D, target_frame: &str) -> Result<PointSet, MergeError> {
        let has_intensity = cloud.has_channel(INTENSITY_CHANNEL);
        let transformed = self.service.transform_cloud(target_frame, cloud)?;
        let (xs, ys, zs) = transformed.xyz()?;

        let intensities = if has_intensity {
            intensity_channel(cloud, &transformed)
        } else {
            None
        };
        let mut points = PointSet::with_capacity(intensities.is_some(), xs.len());

        for i in 0..xs.len() {
            let mut point = Point::new(xs[i] as f64, ys[i] as f64, zs[i] as f64);
            if let Some(intensities) = intensities {
                point = point.with_intensity(intensities[i]);
            }
            points.push(point);
        }

        Ok(points)
    }
}

/// Prefer the transformed cloud's intensity channel; fall back to the
/// original's when the service dropped it but kept every point.
fn intensity_channel<'a>(original: &'a Cloud3D, transformed: &'a Cloud3D) -> Option<&'a [f32]> {
    let n = transformed.len();
    transformed
        .channel(INTENSITY_CHANNEL)
        .or_else(|| original.channel(INTENSITY_CHANNEL))
        .filter(|values| values.len() == n)
        .or_else(|| {
            warn!(
                frame = %original.header.frame_id,
                "intensity channel lost by cloud transform; emitting points without intensity"
            );
            None
        })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::geometry::{Quaternion, Vec3};
    use crate::transform::{TfCloudTransformer, TfEngine, Transform3D};
    use chrono::Utc;
    use merger_types::Header;

    /// Transform service that strips every channel but the coordinates and
    /// drops the last point.
    struct LossyService;

    impl CloudTransformService for LossyService {
        fn transform_cloud(&self, target_frame: &str, cloud: &Cloud3D) -> Result<Cloud3D, MergeError> {
            let (x, y, z) = cloud.xyz()?;
            let keep = x.len().saturating_sub(1);
            Ok(Cloud3D::new(Header::new(target_frame, cloud.header.stamp))
                .with_channel("x", x[..keep].to_vec())
                .with_channel("y", y[..keep].to_vec())
                .with_channel("z", z[..keep].to_vec()))
        }
    }

    fn velodyne_cloud(points: &[[f32; 3]]) -> Cloud3D {
        Cloud3D::from_xyz(Header::new("velodyne", Utc::now()), points)
    }

    fn tf_projector() -> CloudProjector {
        let mut tf = TfEngine::new();
        tf.set_transform(
            "base_link",
            "velodyne",
            Transform3D::new(Vec3::new(0.0, 0.0, 1.0), Quaternion::identity()),
        );
        CloudProjector::new(Arc::new(TfCloudTransformer::new(Arc::new(tf))))
    }

    #[test]
    fn preserves_point_count_and_order() {
        let cloud = velodyne_cloud(&[[1.0, 0.0, 0.0], [2.0, 0.0, 0.0], [3.0, 0.0, 0.0]]);
        let points = tf_projector().project(&cloud, "base_link").unwrap();
        assert!(!points.has_intensity());
        let xs: Vec<f64> = points.iter().map(|p| p.x).collect();
        assert_eq!(xs, vec![1.0, 2.0, 3.0]);
        assert!(points.iter().all(|p| (p.z - 1.0).abs() < 1e-6));
    }

    #[test]
    fn intensity_channel_is_carried() {
        let cloud = velodyne_cloud(&[[1.0, 0.0, 0.0], [2.0, 0.0, 0.0]])
            .with_channel(INTENSITY_CHANNEL, vec![10.0, 20.0]);
        let points = tf_projector().project(&cloud, "base_link").unwrap();
        assert!(points.has_intensity());
        assert_eq!(points.points()[1].intensity, 20.0);
    }

    #[test]
    fn other_channels_do_not_imply_intensity() {
        let cloud = velodyne_cloud(&[[1.0, 0.0, 0.0]]).with_channel("ring", vec![3.0]);
        let points = tf_projector().project(&cloud, "base_link").unwrap();
        assert!(!points.has_intensity());
    }

    #[test]
    fn points_dropped_by_service_are_not_emitted() {
        let cloud = velodyne_cloud(&[[1.0, 0.0, 0.0], [2.0, 0.0, 0.0]])
            .with_channel(INTENSITY_CHANNEL, vec![10.0, 20.0]);
        let points = CloudProjector::new(Arc::new(LossyService))
            .project(&cloud, "base_link")
            .unwrap();
        assert_eq!(points.len(), 1);
        // Intensity could not be matched up after the drop.
        assert!(!points.has_intensity());
    }

    #[test]
    fn intensity_recovered_from_original_when_stripped() {
        struct StripIntensity;
        impl CloudTransformService for StripIntensity {
            fn transform_cloud(&self, target_frame: &str, cloud: &Cloud3D) -> Result<Cloud3D, MergeError> {
                let (x, y, z) = cloud.xyz()?;
                Ok(Cloud3D::new(Header::new(target_frame, cloud.header.stamp))
                    .with_channel("x", x.to_vec())
                    .with_channel("y", y.to_vec())
                    .with_channel("z", z.to_vec()))
            }
        }

        let cloud = velodyne_cloud(&[[1.0, 0.0, 0.0]]).with_channel(INTENSITY_CHANNEL, vec![4.0]);
        let points = CloudProjector::new(Arc::new(StripIntensity))
            .project(&cloud, "base_link")
            .unwrap();
        assert!(points.has_intensity());
        assert_eq!(points.points()[0].intensity, 4.0);
    }

    #[test]
    fn transform_failure_is_reported() {
        let projector = CloudProjector::new(Arc::new(TfCloudTransformer::new(Arc::new(TfEngine::new()))));
        let err = projector
            .project(&velodyne_cloud(&[[1.0, 0.0, 0.0]]), "base_link")
            .unwrap_err();
        assert!(matches!(err, MergeError::CloudTransform(_)));
    }
}
