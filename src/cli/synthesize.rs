//! # synthesize 子命令 CLI 定义
//!
//! ## 依赖关系
//! - 被 `cli/mod.rs` 使用
//! - 参数传递给 `commands/synthesize.rs`

use super::refine::PlotOptions;
use super::OutputFormat;

use clap::Args;
use std::path::PathBuf;

/// synthesize 子命令参数
#[derive(Args, Debug)]
pub struct SynthesizeArgs {
    /// Candidate phase library (JSON)
    #[arg(short, long)]
    pub candidates: PathBuf,

    /// Phase ids to include (repeatable; default: every phase in the library)
    #[arg(short, long = "phase")]
    pub phases: Vec<String>,

    /// Scale factor per selected phase, in the same order (default 1)
    #[arg(short, long = "scale")]
    pub scales: Vec<f64>,

    /// Output file
    #[arg(short, long, default_value = "synthetic.xy")]
    pub output: PathBuf,

    /// Output format (auto-detected from extension if not specified)
    #[arg(short, long, value_enum)]
    pub format: Option<OutputFormat>,

    /// 2θ range in degrees (e.g., "5-90")
    #[arg(short, long, default_value = "5-90")]
    pub range: String,

    /// Grid step in degrees 2θ
    #[arg(long, default_value_t = 0.02)]
    pub step: f64,

    /// Caglioti U
    #[arg(long, default_value_t = 0.0)]
    pub u: f64,

    /// Caglioti V
    #[arg(long, default_value_t = 0.0)]
    pub v: f64,

    /// Caglioti W
    #[arg(long, default_value_t = 0.01)]
    pub w: f64,

    /// Lorentzian fraction η of the pseudo-Voigt
    #[arg(long, default_value_t = 0.3)]
    pub eta: f64,

    /// Zero shift added to every peak position (degrees)
    #[arg(long, default_value_t = 0.0)]
    pub zero_shift: f64,

    /// Also write one column per phase (CSV / XY)
    #[arg(long, default_value_t = false)]
    pub per_phase: bool,

    #[command(flatten)]
    pub plot: PlotOptions,
}
