//! Transform Frame (TF) Engine.
//!
//! Maintains a graph of named reference frames and the 3-D rigid-body
//! transforms (translation + quaternion rotation) that relate them.  Given any
//! two frame names the engine composes a chain of transforms via BFS,
//! walking parent→child edges forwards and child→parent edges through their
//! inverse, to produce the combined [`Transform3D`].
//!
//! The merge pipeline does not depend on [`TfEngine`] directly; it talks to
//! the two collaborator traits defined here:
//!
//! - [`TransformProvider`] – "latest available" rigid transform between two
//!   frames.
//! - [`CloudTransformService`] – re-express a whole [`Cloud3D`] in another
//!   frame.
//!
//! # Example
//!
//! ```rust
//! use merger_perception::geometry::{Quaternion, Vec3};
//! use merger_perception::transform::{TfEngine, Transform3D, TransformProvider};
//!
//! let mut tf = TfEngine::new();
//!
//! // laser is mounted 0.2 m ahead of base_link.
//! tf.set_transform("base_link", "laser",
//!     Transform3D::new(Vec3::new(0.2, 0.0, 0.0), Quaternion::identity()));
//!
//! let t = tf.lookup("base_link", "laser").unwrap();
//! assert!((t.translation.x - 0.2).abs() < 1e-9);
//!
//! // The reverse direction is resolved through the inverse edge.
//! let back = tf.lookup("laser", "base_link").unwrap();
//! assert!((back.translation.x + 0.2).abs() < 1e-9);
//! ```

use std::collections::{BTreeMap, HashSet, VecDeque};
use std::sync::Arc;

use merger_types::{Cloud3D, MergeError};

use crate::geometry::{Matrix4, Quaternion, Vec3};

// ────────────────────────────────────────────────────────────────────────────
// Transform3D
// ────────────────────────────────────────────────────────────────────────────

/// A rigid-body 3-D transform: rotation followed by translation.
///
/// Represents the pose of frame B relative to frame A: to convert a point
/// expressed in frame B into frame A, rotate it by `rotation` then add
/// `translation`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Transform3D {
    pub translation: Vec3,
    pub rotation: Quaternion,
}

impl Transform3D {
    pub fn new(translation: Vec3, rotation: Quaternion) -> Self {
        Self {
            translation,
            rotation,
        }
    }

    /// The identity transform (no translation, no rotation).
    pub fn identity() -> Self {
        Self::new(Vec3::zero(), Quaternion::identity())
    }

    /// Compose two transforms.
    ///
    /// If `self` = T_A_B and `other` = T_B_C, the result is T_A_C.
    pub fn compose(self, other: Self) -> Self {
        let translated = self.translation.add(self.rotation.rotate(other.translation));
        let rotated = self.rotation.mul(other.rotation);
        Self::new(translated, rotated)
    }

    /// T_A_B → T_B_A.
    pub fn inverse(self) -> Self {
        let rotation = self.rotation.conjugate();
        Self::new(rotation.rotate(self.translation).neg(), rotation)
    }

    /// Homogeneous matrix form, for applying to many points.
    pub fn to_matrix(self) -> Matrix4 {
        Matrix4::from_pose(self.translation, self.rotation)
    }
}

// ────────────────────────────────────────────────────────────────────────────
// Collaborator traits
// ────────────────────────────────────────────────────────────────────────────

/// Source of rigid transforms between named frames.
pub trait TransformProvider: Send + Sync {
    /// The most recent known transform mapping points in `source_frame` into
    /// `target_frame`.
    ///
    /// # Errors
    ///
    /// [`MergeError::TransformUnavailable`] when no transform is known.
    fn lookup(&self, target_frame: &str, source_frame: &str) -> Result<Transform3D, MergeError>;
}

/// Re-expresses a whole point cloud in another frame.
pub trait CloudTransformService: Send + Sync {
    /// Return `cloud` with every point in `target_frame`.  Channels other
    /// than the coordinates are carried through unchanged.
    ///
    /// # Errors
    ///
    /// [`MergeError::CloudTransform`] or [`MergeError::MalformedCloud`].
    fn transform_cloud(&self, target_frame: &str, cloud: &Cloud3D) -> Result<Cloud3D, MergeError>;
}

// ────────────────────────────────────────────────────────────────────────────
// TfEngine
// ────────────────────────────────────────────────────────────────────────────

/// A graph of named reference frames and the [`Transform3D`]s that relate
/// them.
///
/// Each edge is registered once as `parent → child` (the child's pose in the
/// parent frame).  Lookups may traverse an edge in either direction.
#[derive(Debug, Default)]
pub struct TfEngine {
    /// `children[parent][child] = T_parent_child`
    children: BTreeMap<String, BTreeMap<String, Transform3D>>,
    /// `parents[child][parent] = T_parent_child`
    parents: BTreeMap<String, BTreeMap<String, Transform3D>>,
}

impl TfEngine {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register or update the transform from `parent_frame` to `child_frame`.
    pub fn set_transform(&mut self, parent_frame: &str, child_frame: &str, transform: Transform3D) {
        self.children
            .entry(parent_frame.to_string())
            .or_default()
            .insert(child_frame.to_string(), transform);
        self.parents
            .entry(child_frame.to_string())
            .or_default()
            .insert(parent_frame.to_string(), transform);
    }

    /// Every frame that appears in at least one edge.
    pub fn frames(&self) -> Vec<&str> {
        let mut frames: Vec<&str> = self
            .children
            .keys()
            .chain(self.parents.keys())
            .map(String::as_str)
            .collect();
        frames.sort_unstable();
        frames.dedup();
        frames
    }

    /// BFS from `target_frame` to `source_frame`, returning T_target_source.
    fn resolve(&self, target_frame: &str, source_frame: &str) -> Option<Transform3D> {
        if target_frame == source_frame {
            return Some(Transform3D::identity());
        }

        // Each queue item carries the transform accumulated from
        // target_frame to the current node.
        let mut queue: VecDeque<(&str, Transform3D)> = VecDeque::new();
        let mut visited: HashSet<&str> = HashSet::new();

        queue.push_back((target_frame, Transform3D::identity()));
        visited.insert(target_frame);

        while let Some((current, accumulated)) = queue.pop_front() {
            let forward = self
                .children
                .get(current)
                .into_iter()
                .flatten()
                .map(|(next, tf)| (next.as_str(), *tf));
            let backward = self
                .parents
                .get(current)
                .into_iter()
                .flatten()
                .map(|(next, tf)| (next.as_str(), tf.inverse()));

            for (next, edge_tf) in forward.chain(backward) {
                if !visited.insert(next) {
                    continue;
                }
                let composed = accumulated.compose(edge_tf);
                if next == source_frame {
                    return Some(composed);
                }
                queue.push_back((next, composed));
            }
        }

        None
    }
}

impl TransformProvider for TfEngine {
    fn lookup(&self, target_frame: &str, source_frame: &str) -> Result<Transform3D, MergeError> {
        self.resolve(target_frame, source_frame)
            .ok_or_else(|| MergeError::TransformUnavailable {
                target: target_frame.to_string(),
                source_frame: source_frame.to_string(),
                reason: "frames are not connected in the transform tree".to_string(),
            })
    }
}

// ────────────────────────────────────────────────────────────────────────────
// TfCloudTransformer
// ────────────────────────────────────────────────────────────────────────────

/// [`CloudTransformService`] that applies the rigid transform reported by a
/// [`TransformProvider`] to the `x`, `y`, `z` channels of a cloud.
#[derive(Clone)]
pub struct TfCloudTransformer {
    provider: Arc<dyn TransformProvider>,
}

impl TfCloudTransformer {
    pub fn new(provider: Arc<dyn TransformProvider>) -> Self {
        Self { provider }
    }
}

impl CloudTransformService for TfCloudTransformer {
    fn transform_cloud(&self, target_frame: &str, cloud: &Cloud3D) -> Result<Cloud3D, MergeError> {
        let (xs, ys, zs) = cloud.xyz()?;
        let tf = self
            .provider
            .lookup(target_frame, &cloud.header.frame_id)
            .map_err(|e| MergeError::CloudTransform(e.to_string()))?
            .to_matrix();

        let n = xs.len();
        let (mut tx, mut ty, mut tz) = (
            Vec::with_capacity(n),
            Vec::with_capacity(n),
            Vec::with_capacity(n),
        );
        for i in 0..n {
            let p = tf.transform_point(Vec3::new(xs[i] as f64, ys[i] as f64, zs[i] as f64));
            tx.push(p.x as f32);
            ty.push(p.y as f32);
            tz.push(p.z as f32);
        }

        let mut out = cloud
            .clone()
            .with_channel("x", tx)
            .with_channel("y", ty)
            .with_channel("z", tz);
        out.header.frame_id = target_frame.to_string();
        Ok(out)
    }
}

// ────────────────────────────────────────────────────────────────────────────
// Tests
// ────────────────────────────────────────────────────────────────────────────
