//! # identify 子命令 CLI 定义
//!
//! ## 依赖关系
//! - 被 `cli/mod.rs` 使用
//! - 参数传递给 `commands/identify.rs`

use super::refine::{PlotOptions, RefinementOptions};
use super::OutputFormat;
use crate::batch::collector::DEFAULT_PATTERN;

use clap::Args;
use std::path::PathBuf;

/// identify 子命令参数
#[derive(Args, Debug)]
pub struct IdentifyArgs {
    /// Input: pattern file or directory containing pattern files
    pub input: PathBuf,

    /// Candidate phase library (JSON)
    #[arg(short, long)]
    pub candidates: PathBuf,

    /// Output: file path (single mode) or directory (batch mode)
    #[arg(short, long, default_value = "phase_fit.png")]
    pub output: PathBuf,

    /// Output format (auto-detected from extension if not specified)
    #[arg(short, long, value_enum)]
    pub format: Option<OutputFormat>,

    /// Analysis configuration (JSON); command-line flags override it
    #[arg(long)]
    pub config: Option<PathBuf>,

    /// Maximum number of phases to identify
    #[arg(long)]
    pub max_phases: Option<usize>,

    /// Stop when the residue falls below this fraction of the original maximum
    #[arg(long)]
    pub residue_threshold: Option<f64>,

    /// Skip Le Bail refinement after decomposition
    #[arg(long, default_value_t = false)]
    pub no_refine: bool,

    #[command(flatten)]
    pub refinement: RefinementOptions,

    /// Write the text report to this file (single mode)
    #[arg(long)]
    pub report: Option<PathBuf>,

    /// Refined-phase cache (JSON); loaded before and saved after the session
    #[arg(long)]
    pub cache: Option<PathBuf>,

    #[command(flatten)]
    pub plot: PlotOptions,

    // ─────────────────────────────────────────────────────────────
    // 批量处理参数
    // ─────────────────────────────────────────────────────────────
    /// Glob pattern for input files (batch mode)
    #[arg(long, default_value = DEFAULT_PATTERN)]
    pub pattern: String,

    /// Number of parallel jobs (0 = auto, batch mode only)
    #[arg(short, long, default_value_t = 0)]
    pub jobs: usize,

    /// Recurse into subdirectories (batch mode)
    #[arg(long, default_value_t = false)]
    pub recursive: bool,

    /// Overwrite existing output files (batch mode)
    #[arg(long, default_value_t = false)]
    pub overwrite: bool,
}
