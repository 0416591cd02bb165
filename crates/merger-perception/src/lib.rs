//! `merger-perception` – the geometric core of the laser merger.
//!
//! Turns heterogeneous sensor readings into one point set in a common frame,
//! and that point set back into a synthetic planar scan.
//!
//! # Modules
//!
//! - [`geometry`] – [`Vec3`][geometry::Vec3], [`Quaternion`][geometry::Quaternion]
//!   and the homogeneous [`Matrix4`][geometry::Matrix4] used to apply rigid
//!   transforms.
//! - [`transform`] – [`TfEngine`][transform::TfEngine]: graph of named frames,
//!   plus the [`TransformProvider`][transform::TransformProvider] and
//!   [`CloudTransformService`][transform::CloudTransformService] seams the
//!   projectors depend on.
//! - [`scan_projector`] – [`ScanProjector`][scan_projector::ScanProjector]:
//!   range scan → target-frame points.
//! - [`cloud_projector`] – [`CloudProjector`][cloud_projector::CloudProjector]:
//!   point cloud → target-frame points.
//! - [`rasterizer`] – [`ScanRasterizer`][rasterizer::ScanRasterizer]:
//!   point set → fixed-resolution angular range scan.

pub mod cloud_projector;
pub mod geometry;
pub mod rasterizer;
pub mod scan_projector;
pub mod transform;

pub use cloud_projector::CloudProjector;
pub use rasterizer::{MAX_RANGES_SIZE, ScanRasterizer, ScanShape};
pub use scan_projector::ScanProjector;
pub use transform::{CloudTransformService, TfCloudTransformer, TfEngine, Transform3D, TransformProvider};
