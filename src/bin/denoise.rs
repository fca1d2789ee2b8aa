use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Parser;

use pointcloud_denoise::config::{load_json, DenoiseConfig};
use pointcloud_denoise::pipeline::run_denoise;

/// Remove outliers with statistical (SOR) and/or radius (ROR) filtering.
/// SOR runs first when both are enabled.
#[derive(Parser, Debug)]
#[command(name = "denoise", version, about)]
struct Cli {
    /// JSON config file; flags given here override its values
    #[arg(long, value_name = "FILE")]
    config: Option<PathBuf>,

    /// Input point cloud [default: data/plane_raw.ply]
    #[arg(long = "in", value_name = "FILE")]
    input: Option<PathBuf>,

    /// Output point cloud [default: data/plane_denoised.ply]
    #[arg(long, value_name = "FILE")]
    out: Option<PathBuf>,

    /// SOR neighbor count, e.g. 20-50; SOR is skipped when unset or 0
    #[arg(long)]
    sor_k: Option<usize>,

    /// SOR standard deviation multiplier, smaller is stricter [default: 2.0]
    #[arg(long, allow_negative_numbers = true)]
    sor_sigma: Option<f64>,

    /// ROR search radius; ROR is skipped when unset or 0
    #[arg(long, allow_negative_numbers = true)]
    ror_radius: Option<f64>,

    /// ROR minimum neighbor count [default: 8]
    #[arg(long)]
    ror_min: Option<usize>,

    /// Skip the PNG preview
    #[arg(long)]
    no_preview: bool,
}

impl Cli {
    fn into_config(self) -> Result<DenoiseConfig> {
        let mut config: DenoiseConfig = match &self.config {
            Some(path) => load_json(path)
                .with_context(|| format!("failed to load config {}", path.display()))?,
            None => DenoiseConfig::default(),
        };
        if let Some(input) = self.input {
            config.input = input;
        }
        if let Some(out) = self.out {
            config.out = out;
        }
        if self.sor_k.is_some() {
            config.sor_k = self.sor_k;
        }
        if let Some(sigma) = self.sor_sigma {
            config.sor_sigma = sigma;
        }
        if self.ror_radius.is_some() {
            config.ror_radius = self.ror_radius;
        }
        if let Some(min) = self.ror_min {
            config.ror_min = min;
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
    config.validate().context("invalid denoise parameters")?;

    let report = run_denoise(&config)
        .with_context(|| format!("denoising {} failed", config.input.display()))?;
    println!("{}", serde_json::to_string(&report)?);
    Ok(())
}
