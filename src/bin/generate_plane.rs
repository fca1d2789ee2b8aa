use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Parser;

use pointcloud_denoise::config::{load_json, GenerateConfig};
use pointcloud_denoise::pipeline::run_generate;

/// Generate a z≈0 plane point cloud with optional noise, holes and outliers
#[derive(Parser, Debug)]
#[command(name = "generate_plane", version, about)]
struct Cli {
    /// JSON config file; flags given here override its values
    #[arg(long, value_name = "FILE")]
    config: Option<PathBuf>,

    /// Output point cloud (.ply or .xyz) [default: data/plane_raw.ply]
    #[arg(long, value_name = "FILE")]
    out: Option<PathBuf>,

    /// Number of plane points [default: 200000]
    #[arg(long)]
    n: Option<usize>,

    /// Side length of the square plane [default: 10]
    #[arg(long, allow_negative_numbers = true)]
    size: Option<f64>,

    /// Standard deviation of the z noise [default: 0.005]
    #[arg(long, allow_negative_numbers = true)]
    noise: Option<f64>,

    /// Fraction of plane points to drop, in [0, 1) [default: 0]
    #[arg(long, allow_negative_numbers = true)]
    hole: Option<f64>,

    /// Number of outlier points [default: 0]
    #[arg(long)]
    outliers: Option<usize>,

    /// Side of the square the outliers are scattered over [default: plane size]
    #[arg(long, allow_negative_numbers = true)]
    outlier_box: Option<f64>,

    /// Lowest outlier z [default: 0.3]
    #[arg(long, allow_negative_numbers = true)]
    outlier_z_min: Option<f64>,

    /// Highest outlier z [default: 1.0]
    #[arg(long, allow_negative_numbers = true)]
    outlier_z_max: Option<f64>,

    /// Random seed; outliers use seed + 1 [default: 42]
    #[arg(long)]
    seed: Option<u64>,

    /// Skip the PNG preview
    #[arg(long)]
    no_preview: bool,
}

impl Cli {
    fn into_config(self) -> Result<GenerateConfig> {
        let mut config: GenerateConfig = match &self.config {
            Some(path) => load_json(path)
                .with_context(|| format!("failed to load config {}", path.display()))?,
            None => GenerateConfig::default(),
        };
        if let Some(out) = self.out {
            config.out = out;
        }
        if let Some(n) = self.n {
            config.n = n;
        }
        if let Some(size) = self.size {
            config.size = size;
        }
        if let Some(noise) = self.noise {
            config.noise = noise;
        }
        if let Some(hole) = self.hole {
            config.hole = hole;
        }
        if let Some(outliers) = self.outliers {
            config.outliers = outliers;
        }
        if self.outlier_box.is_some() {
            config.outlier_box = self.outlier_box;
        }
        if let Some(z_min) = self.outlier_z_min {
            config.outlier_z_min = z_min;
        }
        if let Some(z_max) = self.outlier_z_max {
            config.outlier_z_max = z_max;
        }
        if let Some(seed) = self.seed {
            config.seed = seed;
        }
        if self.no_preview {
            config.preview = false;
        }
        Ok(config)
    }
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    let config = Cli::parse().into_config()?;
    config.validate().context("invalid generation parameters")?;

    let report = run_generate(&config).context("plane generation failed")?;
    println!("{}", serde_json::to_string(&report)?);
    Ok(())
}
