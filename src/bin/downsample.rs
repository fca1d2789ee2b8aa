use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Parser;

use pointcloud_denoise::config::{load_json, DownsampleConfig};
use pointcloud_denoise::pipeline::run_downsample;

/// Reduce point density with a voxel grid and/or a random sample of fixed size.
/// The voxel grid runs first when both are enabled.
#[derive(Parser, Debug)]
#[command(name = "downsample", version, about)]
struct Cli {
    /// JSON config file; flags given here override its values
    #[arg(long, value_name = "FILE")]
    config: Option<PathBuf>,

    /// Input point cloud [default: data/plane_raw.ply]
    #[arg(long = "in", value_name = "FILE")]
    input: Option<PathBuf>,

    /// Output point cloud [default: data/plane_down.ply]
    #[arg(long, value_name = "FILE")]
    out: Option<PathBuf>,

    /// Voxel edge length; skipped when unset or 0
    #[arg(long, allow_negative_numbers = true)]
    voxel: Option<f64>,

    /// Target point count for random sampling; skipped when unset or 0
    #[arg(long)]
    target: Option<usize>,

    /// Random sampling seed [default: 7]
    #[arg(long)]
    seed: Option<u64>,

    /// Skip the PNG preview
    #[arg(long)]
    no_preview: bool,
}

impl Cli {
    fn into_config(self) -> Result<DownsampleConfig> {
        let mut config: DownsampleConfig = match &self.config {
            Some(path) => load_json(path)
                .with_context(|| format!("failed to load config {}", path.display()))?,
            None => DownsampleConfig::default(),
        };
        if let Some(input) = self.input {
            config.input = input;
        }
        if let Some(out) = self.out {
            config.out = out;
        }
        if self.voxel.is_some() {
            config.voxel = self.voxel;
        }
        if self.target.is_some() {
            config.target = self.target;
        }
        if self.seed.is_some() {
            config.seed = self.seed;
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
    config.validate().context("invalid downsample parameters")?;

    let report = run_downsample(&config)
        .with_context(|| format!("downsampling {} failed", config.input.display()))?;
    println!("{}", serde_json::to_string(&report)?);
    Ok(())
}
