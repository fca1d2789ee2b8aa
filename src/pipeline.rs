//! Stage composition for the three tools.
//!
//! `generate`, `denoise` and `downsample` are pure: they take a cloud (or config) and
//! return a new cloud with per-stage counts. The `run_*` functions add the single load,
//! the single save and the preview around them.

use std::path::Path;
use std::time::Instant;

use log::info;
use rand::Rng;

use crate::cloud_io::{read_point_set, write_point_set};
use crate::config::{preview_path, DenoiseConfig, DownsampleConfig, GenerateConfig};
use crate::error::Result;
use crate::point_set::PointSet;
use crate::preview::{render_density_preview, PreviewSummary, DEFAULT_MAX_SAMPLE_POINTS};
use crate::radius_outlier::remove_radius_outliers;
use crate::random_sample::{random_sample, seeded_rng};
use crate::report::{steps_label, RunReport, StageReport};
use crate::statistical_outlier::remove_statistical_outliers;
use crate::synthetic::{generate_outliers, generate_plane};
use crate::voxel_downsample::voxel_downsample;

#[derive(Debug, Clone)]
pub struct PipelineOutput {
    pub points: PointSet,
    pub stages: Vec<StageReport>,
}

/// Plane from `seed`, outliers from `seed + 1`, concatenated in that order.
pub fn generate(config: &GenerateConfig) -> Result<PipelineOutput> {
    config.validate()?;
    let mut stages = Vec::new();

    let started = Instant::now();
    let mut rng = seeded_rng(Some(config.seed));
    let mut points = generate_plane(&config.plane_params(), &mut rng)?;
    stages.push(StageReport::finish(
        format!(
            "plane(n={},size={},noise={},hole={})",
            config.n, config.size, config.noise, config.hole
        ),
        config.n,
        points.len(),
        started,
    ));

    if let Some(params) = config.outlier_params() {
        let started = Instant::now();
        let before = points.len();
        let mut rng = seeded_rng(Some(config.seed.wrapping_add(1)));
        let outliers = generate_outliers(&params, &mut rng)?;
        points.extend_from(&outliers);
        stages.push(StageReport::finish(
            format!(
                "outliers(m={},box={},z=[{},{}])",
                params.count, params.box_xy, params.z_min, params.z_max
            ),
            before,
            points.len(),
            started,
        ));
    }

    Ok(PipelineOutput { points, stages })
}

/// SOR (when `sor_k` is set) followed by ROR (when `ror_radius` is set).
pub fn denoise(points: PointSet, config: &DenoiseConfig) -> Result<PipelineOutput> {
    config.validate()?;
    let mut current = points;
    let mut stages = Vec::new();

    if let Some((k, sigma)) = config.sor_stage() {
        let started = Instant::now();
        let before = current.len();
        current = remove_statistical_outliers(&current, k, sigma)?;
        stages.push(StageReport::finish(
            format!("SOR(k={k},σ={sigma})"),
            before,
            current.len(),
            started,
        ));
    }

    if let Some((radius, min_neighbors)) = config.ror_stage() {
        let started = Instant::now();
        let before = current.len();
        current = remove_radius_outliers(&current, radius, min_neighbors)?;
        stages.push(StageReport::finish(
            format!("ROR(r={radius},min={min_neighbors})"),
            before,
            current.len(),
            started,
        ));
    }

    Ok(PipelineOutput {
        points: current,
        stages,
    })
}

/// Voxel grid (when `voxel` is set) followed by random subsampling (when `target` is set).
pub fn downsample<R: Rng + ?Sized>(
    points: PointSet,
    config: &DownsampleConfig,
    rng: &mut R,
) -> Result<PipelineOutput> {
    config.validate()?;
    let mut current = points;
    let mut stages = Vec::new();

    if let Some(voxel) = config.voxel_stage() {
        let started = Instant::now();
        let before = current.len();
        current = voxel_downsample(&current, voxel)?;
        stages.push(StageReport::finish(
            format!("voxel={voxel}"),
            before,
            current.len(),
            started,
        ));
    }

    if let Some(target) = config.target_stage() {
        let started = Instant::now();
        let before = current.len();
        current = random_sample(&current, target, rng);
        stages.push(StageReport::finish(
            format!("target={target}"),
            before,
            current.len(),
            started,
        ));
    }

    Ok(PipelineOutput {
        points: current,
        stages,
    })
}

pub fn run_generate(config: &GenerateConfig) -> Result<RunReport> {
    let started = Instant::now();
    let output = generate(config)?;
    write_point_set(&config.out, &output.points)?;
    info!(
        "saved raw plane(+outliers) to {} with {} points",
        config.out.display(),
        output.points.len()
    );

    let preview = maybe_preview(
        config.preview,
        &config.out,
        &output.points,
        format!("Raw plane (+outliers): {} pts", output.points.len()),
    )?;

    Ok(RunReport {
        tool: "generate_plane",
        input: None,
        output: config.out.clone(),
        original_count: config.n,
        final_count: output.points.len(),
        stages: output.stages,
        preview,
        processing_time: started.elapsed().as_secs_f64() * 1000.0,
    })
}

pub fn run_denoise(config: &DenoiseConfig) -> Result<RunReport> {
    config.validate()?;
    let started = Instant::now();
    let points = read_point_set(&config.input)?;
    let original_count = points.len();

    let output = denoise(points, config)?;
    write_point_set(&config.out, &output.points)?;
    let steps = steps_label(&output.stages);
    info!(
        "denoised {} -> {} | {} -> {} points | steps: {}",
        config.input.display(),
        config.out.display(),
        original_count,
        output.points.len(),
        steps
    );

    let preview = maybe_preview(
        config.preview,
        &config.out,
        &output.points,
        format!("Denoised: {} pts {}", output.points.len(), steps),
    )?;

    Ok(RunReport {
        tool: "denoise",
        input: Some(config.input.clone()),
        output: config.out.clone(),
        original_count,
        final_count: output.points.len(),
        stages: output.stages,
        preview,
        processing_time: started.elapsed().as_secs_f64() * 1000.0,
    })
}

pub fn run_downsample(config: &DownsampleConfig) -> Result<RunReport> {
    config.validate()?;
    let started = Instant::now();
    let points = read_point_set(&config.input)?;
    let original_count = points.len();

    let mut rng = seeded_rng(config.seed);
    let output = downsample(points, config, &mut rng)?;
    write_point_set(&config.out, &output.points)?;
    let steps = steps_label(&output.stages);
    info!(
        "saved downsampled to {} with {} points | steps: {}",
        config.out.display(),
        output.points.len(),
        steps
    );

    let label = if output.stages.is_empty() { "raw".to_string() } else { steps };
    let preview = maybe_preview(
        config.preview,
        &config.out,
        &output.points,
        format!("Downsampled: {} pts {}", output.points.len(), label),
    )?;

    Ok(RunReport {
        tool: "downsample",
        input: Some(config.input.clone()),
        output: config.out.clone(),
        original_count,
        final_count: output.points.len(),
        stages: output.stages,
        preview,
        processing_time: started.elapsed().as_secs_f64() * 1000.0,
    })
}

fn maybe_preview(
    enabled: bool,
    out: &Path,
    points: &PointSet,
    title: String,
) -> Result<Option<PreviewSummary>> {
    if !enabled {
        return Ok(None);
    }
    render_density_preview(points, preview_path(out), &title, DEFAULT_MAX_SAMPLE_POINTS).map(Some)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn small_generate(outliers: usize) -> GenerateConfig {
        GenerateConfig {
            n: 300,
            size: 10.0,
            noise: 0.0,
            outliers,
            preview: false,
            ..Default::default()
        }
    }

    #[test]
    fn test_generate_flat_plane() {
        let output = generate(&small_generate(0)).unwrap();
        assert_eq!(output.points.len(), 300);
        assert!(output.points.iter().all(|p| p[2] == 0.0));
        assert_eq!(output.stages.len(), 1);
    }

    #[test]
    fn test_outliers_do_not_perturb_plane() {
        let plain = generate(&small_generate(0)).unwrap().points;
        let with_outliers = generate(&small_generate(25)).unwrap().points;
        assert_eq!(with_outliers.len(), 325);
        for i in 0..300 {
            assert_eq!(plain.point(i), with_outliers.point(i));
        }
        for i in 300..325 {
            let z = with_outliers.point(i)[2];
            assert!((0.3..=1.0).contains(&z));
        }
    }

    #[test]
    fn test_denoise_without_triggers_is_identity() {
        let points = generate(&small_generate(5)).unwrap().points;
        let output = denoise(points.clone(), &DenoiseConfig::default()).unwrap();
        assert_eq!(output.points, points);
        assert!(output.stages.is_empty());
    }

    #[test]
    fn test_denoise_runs_sor_before_ror() {
        let points = generate(&small_generate(10)).unwrap().points;
        let config = DenoiseConfig {
            sor_k: Some(8),
            ror_radius: Some(1.0),
            ror_min: 2,
            ..Default::default()
        };
        let output = denoise(points, &config).unwrap();
        let names: Vec<&str> = output.stages.iter().map(|s| s.stage.as_str()).collect();
        assert_eq!(names, vec!["SOR(k=8,σ=2)", "ROR(r=1,min=2)"]);
        assert_eq!(output.stages[0].output_count, output.stages[1].input_count);
        assert!(output.stages.iter().all(|s| s.output_count <= s.input_count));
    }

    #[test]
    fn test_downsample_runs_voxel_before_target() {
        let points = generate(&small_generate(0)).unwrap().points;
        let config = DownsampleConfig {
            voxel: Some(1.0),
            target: Some(20),
            preview: false,
            ..Default::default()
        };
        let output = downsample(points, &config, &mut seeded_rng(Some(7))).unwrap();
        assert_eq!(output.stages.len(), 2);
        assert!(output.stages[0].stage.starts_with("voxel"));
        assert_eq!(output.points.len(), 20);
    }

    #[test]
    fn test_invalid_config_is_rejected_before_work() {
        let config = DownsampleConfig {
            voxel: Some(-1.0),
            ..Default::default()
        };
        assert!(downsample(PointSet::new(), &config, &mut seeded_rng(Some(1))).is_err());
    }
}
