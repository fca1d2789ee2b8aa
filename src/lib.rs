//! Synthetic plane clouds and the filters that clean them up: statistical and radius
//! outlier removal, voxel-grid downsampling and seeded random subsampling.

pub mod cloud_io;
pub mod config;
pub mod error;
pub mod pipeline;
pub mod point_set;
pub mod preview;
pub mod radius_outlier;
pub mod random_sample;
pub mod report;
pub mod spatial_index;
pub mod statistical_outlier;
pub mod synthetic;
pub mod voxel_downsample;

pub use error::{CloudError, Result};
pub use point_set::{Bounds, PointSet, VoxelKey};
pub use radius_outlier::remove_radius_outliers;
pub use random_sample::{random_sample, seeded_rng};
pub use spatial_index::{BruteForceIndex, GridIndex, Neighbor, NeighborSearch};
pub use statistical_outlier::remove_statistical_outliers;
pub use voxel_downsample::voxel_downsample;
