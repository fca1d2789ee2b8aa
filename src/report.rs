use std::path::PathBuf;
use std::time::Instant;

use serde::Serialize;

use crate::preview::PreviewSummary;

#[derive(Debug, Clone, Serialize)]
pub struct StageReport {
    pub stage: String,
    pub input_count: usize,
    pub output_count: usize,
    pub elapsed_ms: f64,
}

impl StageReport {
    pub(crate) fn finish(
        stage: String,
        input_count: usize,
        output_count: usize,
        started: Instant,
    ) -> Self {
        StageReport {
            stage,
            input_count,
            output_count,
            elapsed_ms: started.elapsed().as_secs_f64() * 1000.0,
        }
    }
}

/// Summary printed as JSON by each tool once its artifact is written.
#[derive(Debug, Clone, Serialize)]
pub struct RunReport {
    pub tool: &'static str,
    pub input: Option<PathBuf>,
    pub output: PathBuf,
    pub original_count: usize,
    pub final_count: usize,
    pub stages: Vec<StageReport>,
    pub preview: Option<PreviewSummary>,
    pub processing_time: f64, // milliseconds
}

/// `"SOR(k=20,σ=2) + ROR(r=0.05,min=8)"`, or `"none"` when no stage ran.
pub fn steps_label(stages: &[StageReport]) -> String {
    if stages.is_empty() {
        return "none".to_string();
    }
    stages
        .iter()
        .map(|s| s.stage.as_str())
        .collect::<Vec<_>>()
        .join(" + ")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_steps_label() {
        assert_eq!(steps_label(&[]), "none");
        let stages = vec![
            StageReport::finish("voxel=0.5".into(), 10, 4, Instant::now()),
            StageReport::finish("target=2".into(), 4, 2, Instant::now()),
        ];
        assert_eq!(steps_label(&stages), "voxel=0.5 + target=2");
    }

    #[test]
    fn test_report_serializes_counts() {
        let report = RunReport {
            tool: "denoise",
            input: Some(PathBuf::from("in.ply")),
            output: PathBuf::from("out.ply"),
            original_count: 10,
            final_count: 8,
            stages: vec![],
            preview: None,
            processing_time: 1.5,
        };
        let json: serde_json::Value = serde_json::to_value(&report).unwrap();
        assert_eq!(json["original_count"], 10);
        assert_eq!(json["final_count"], 8);
        assert_eq!(json["input"], "in.ply");
        assert!(json["preview"].is_null());
    }
}
