//! # refine 子命令 CLI 定义
//!
//! 同时定义 `identify` 复用的精修选项与绘图选项。
//!
//! ## 依赖关系
//! - 被 `cli/mod.rs`, `cli/identify.rs` 使用
//! - 参数传递给 `commands/refine.rs`, `commands/identify.rs`

use super::OutputFormat;

use clap::Args;
use std::path::PathBuf;

/// Le Bail 精修选项（覆盖配置文件中的对应字段）
#[derive(Args, Debug, Clone, Default)]
pub struct RefinementOptions {
    /// Maximum number of refinement cycles
    #[arg(long)]
    pub cycles: Option<usize>,

    /// Convergence threshold on |ΔRwp|
    #[arg(long)]
    pub convergence: Option<f64>,

    /// Restrict refinement to a 2θ window (e.g., "20-60")
    #[arg(long)]
    pub window: Option<String>,

    /// Rescale observed intensities so the maximum is 100 before refining
    #[arg(long, default_value_t = false)]
    pub normalize: bool,

    /// Refine with the profile frozen for the first cycles
    #[arg(long, default_value_t = false)]
    pub staged: bool,

    /// Reject phase fits whose optimizer did not converge
    #[arg(long, default_value_t = false)]
    pub strict: bool,
}

/// 绘图选项
#[derive(Args, Debug, Clone)]
pub struct PlotOptions {
    /// Figure width in pixels (PNG) or points (SVG)
    #[arg(long, default_value_t = 1200)]
    pub width: u32,

    /// Figure height in pixels (PNG) or points (SVG)
    #[arg(long, default_value_t = 800)]
    pub height: u32,

    /// Title for the plot (default: pattern name)
    #[arg(long)]
    pub title: Option<String>,
}

/// refine 子命令参数
#[derive(Args, Debug)]
pub struct RefineArgs {
    /// Input pattern file (.xy, .dat, .txt, .csv)
    pub input: PathBuf,

    /// Candidate phase library (JSON)
    #[arg(short, long)]
    pub candidates: PathBuf,

    /// Phase ids to refine (repeatable; default: every phase in the library)
    #[arg(short, long = "phase")]
    pub phases: Vec<String>,

    /// Output file for the fit
    #[arg(short, long, default_value = "lebail_fit.png")]
    pub output: PathBuf,

    /// Output format (auto-detected from extension if not specified)
    #[arg(short, long, value_enum)]
    pub format: Option<OutputFormat>,

    /// Analysis configuration (JSON); its `refinement` section is used
    #[arg(long)]
    pub config: Option<PathBuf>,

    #[command(flatten)]
    pub refinement: RefinementOptions,

    /// Keep the unit cell fixed
    #[arg(long, default_value_t = false)]
    pub fix_cell: bool,

    /// Keep U, V, W and η fixed
    #[arg(long, default_value_t = false)]
    pub fix_profile: bool,

    /// Keep the scale factor fixed
    #[arg(long, default_value_t = false)]
    pub fix_scale: bool,

    /// Keep the zero shift fixed
    #[arg(long, default_value_t = false)]
    pub fix_zero: bool,

    /// Refine one intensity multiplier per peak (Pawley-style)
    #[arg(long, default_value_t = false)]
    pub refine_intensities: bool,

    /// Write the text report to this file
    #[arg(long)]
    pub report: Option<PathBuf>,

    /// Refined-phase cache (JSON); refined phases are stored in it
    #[arg(long)]
    pub cache: Option<PathBuf>,

    #[command(flatten)]
    pub plot: PlotOptions,
}
