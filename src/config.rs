//! One typed configuration per tool.
//!
//! Every field has a default, so a JSON config file only needs the fields it changes.
//! A stage whose trigger field (`sor_k`, `ror_radius`, `voxel`, `target`) is unset or
//! zero is skipped.

use std::fs;
use std::path::{Path, PathBuf};

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use crate::error::{CloudError, Result};
use crate::synthetic::{OutlierParams, PlaneParams};

/// Reads a config struct from a JSON file. Missing fields keep their defaults.
pub fn load_json<T: DeserializeOwned>(path: impl AsRef<Path>) -> Result<T> {
    let path = path.as_ref();
    let text = fs::read_to_string(path).map_err(|e| CloudError::io(path, e))?;
    Ok(serde_json::from_str(&text)?)
}

/// Preview image path for a point cloud artifact.
pub fn preview_path(out: &Path) -> PathBuf {
    out.with_extension("png")
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GenerateConfig {
    pub n: usize,
    pub size: f64,
    pub noise: f64,
    pub hole: f64,
    pub outliers: usize,
    /// Side of the outlier square; the plane size when unset.
    pub outlier_box: Option<f64>,
    pub outlier_z_min: f64,
    pub outlier_z_max: f64,
    pub seed: u64,
    pub out: PathBuf,
    pub preview: bool,
}

impl Default for GenerateConfig {
    fn default() -> Self {
        GenerateConfig {
            n: 200_000,
            size: 10.0,
            noise: 0.005,
            hole: 0.0,
            outliers: 0,
            outlier_box: None,
            outlier_z_min: 0.3,
            outlier_z_max: 1.0,
            seed: 42,
            out: PathBuf::from("data/plane_raw.ply"),
            preview: true,
        }
    }
}

impl GenerateConfig {
    pub fn plane_params(&self) -> PlaneParams {
        PlaneParams {
            point_count: self.n,
            size: self.size,
            noise: self.noise,
            hole_ratio: self.hole,
        }
    }

    /// `None` when no outliers are requested.
    pub fn outlier_params(&self) -> Option<OutlierParams> {
        if self.outliers == 0 {
            return None;
        }
        Some(OutlierParams {
            count: self.outliers,
            box_xy: self.outlier_box.filter(|b| *b != 0.0).unwrap_or(self.size),
            z_min: self.outlier_z_min,
            z_max: self.outlier_z_max,
        })
    }

    pub fn validate(&self) -> Result<()> {
        self.plane_params().validate()?;
        if let Some(outliers) = self.outlier_params() {
            outliers.validate()?;
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DenoiseConfig {
    #[serde(rename = "in")]
    pub input: PathBuf,
    pub out: PathBuf,
    pub sor_k: Option<usize>,
    pub sor_sigma: f64,
    pub ror_radius: Option<f64>,
    pub ror_min: usize,
    pub preview: bool,
}

impl Default for DenoiseConfig {
    fn default() -> Self {
        DenoiseConfig {
            input: PathBuf::from("data/plane_raw.ply"),
            out: PathBuf::from("data/plane_denoised.ply"),
            sor_k: None,
            sor_sigma: 2.0,
            ror_radius: None,
            ror_min: 8,
            preview: true,
        }
    }
}

impl DenoiseConfig {
    /// `(k, sigma)` when SOR is enabled.
    pub fn sor_stage(&self) -> Option<(usize, f64)> {
        self.sor_k.filter(|&k| k > 0).map(|k| (k, self.sor_sigma))
    }

    /// `(radius, min_neighbors)` when ROR is enabled.
    pub fn ror_stage(&self) -> Option<(f64, usize)> {
        self.ror_radius
            .filter(|&r| r != 0.0)
            .map(|r| (r, self.ror_min))
    }

    pub fn validate(&self) -> Result<()> {
        if self.sor_stage().is_some() && !(self.sor_sigma.is_finite() && self.sor_sigma >= 0.0) {
            return Err(CloudError::invalid(
                "sor_sigma",
                format!("must be finite and non-negative, got {}", self.sor_sigma),
            ));
        }
        if let Some((radius, _)) = self.ror_stage() {
            if !(radius.is_finite() && radius > 0.0) {
                return Err(CloudError::invalid(
                    "ror_radius",
                    format!("must be positive, got {radius}"),
                ));
            }
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DownsampleConfig {
    #[serde(rename = "in")]
    pub input: PathBuf,
    pub out: PathBuf,
    pub voxel: Option<f64>,
    pub target: Option<usize>,
    /// Random sample seed; `None` draws one from the OS.
    pub seed: Option<u64>,
    pub preview: bool,
}

impl Default for DownsampleConfig {
    fn default() -> Self {
        DownsampleConfig {
            input: PathBuf::from("data/plane_raw.ply"),
            out: PathBuf::from("data/plane_down.ply"),
            voxel: None,
            target: None,
            seed: Some(7),
            preview: true,
        }
    }
}

impl DownsampleConfig {
    pub fn voxel_stage(&self) -> Option<f64> {
        self.voxel.filter(|&v| v != 0.0)
    }

    pub fn target_stage(&self) -> Option<usize> {
        self.target.filter(|&t| t > 0)
    }

    pub fn validate(&self) -> Result<()> {
        if let Some(voxel) = self.voxel_stage() {
            if !(voxel.is_finite() && voxel > 0.0) {
                return Err(CloudError::invalid(
                    "voxel",
                    format!("must be positive, got {voxel}"),
                ));
            }
        }
        Ok(())
    }
}
