//! # CLI 模块
//!
//! 使用 `clap` 定义命令行参数和子命令。
//!
//! ## 命令结构
//! - `identify`: 多物相鉴定（分解 + 可选 Le Bail 精修），支持目录批量
//! - `refine`: 对指定物相做 Le Bail 精修
//! - `synthesize`: 由候选峰集合合成图谱
//!
//! ## 依赖关系
//! - 被 `main.rs` 使用
//! - 子模块: identify, refine, synthesize

pub mod identify;
pub mod refine;
pub mod synthesize;

use crate::error::{PhaseMatchError, Result};

use clap::{ArgAction, Parser, Subcommand, ValueEnum};
use std::path::Path;

/// PhaseMatch - 多物相 XRD 鉴定与 Le Bail 精修
#[derive(Parser)]
#[command(name = "phasematch")]
#[command(version)]
#[command(about = "Multi-phase XRD identification and Le Bail refinement", long_about = None)]
#[command(propagate_version = true)]
pub struct Cli {
    /// Increase log verbosity (-v info, -vv debug); RUST_LOG applies otherwise
    #[arg(short, long, action = ArgAction::Count, global = true)]
    pub verbose: u8,

    #[command(subcommand)]
    pub command: Commands,
}

/// 可用的子命令
#[derive(Subcommand)]
pub enum Commands {
    /// Identify the phases in a pattern (or a directory of patterns)
    Identify(identify::IdentifyArgs),

    /// Run Le Bail refinement of selected phases against a pattern
    Refine(refine::RefineArgs),

    /// Synthesize a pattern from candidate peak sets
    Synthesize(synthesize::SynthesizeArgs),
}

/// 输出文件格式
#[derive(Debug, Clone, Copy, ValueEnum, PartialEq, Eq)]
pub enum OutputFormat {
    /// PNG image
    Png,
    /// SVG vector image
    Svg,
    /// CSV data file
    Csv,
    /// XY data file
    Xy,
}

impl OutputFormat {
    /// 从文件扩展名推断；未知扩展名按 `fallback`
    pub fn from_extension(path: &Path, fallback: OutputFormat) -> OutputFormat {
        match path
            .extension()
            .and_then(|e| e.to_str())
            .map(|s| s.to_lowercase())
            .as_deref()
        {
            Some("png") => OutputFormat::Png,
            Some("svg") => OutputFormat::Svg,
            Some("csv") => OutputFormat::Csv,
            Some("xy") | Some("dat") | Some("txt") => OutputFormat::Xy,
            _ => fallback,
        }
    }

    pub fn extension(&self) -> &'static str {
        match self {
            OutputFormat::Png => "png",
            OutputFormat::Svg => "svg",
            OutputFormat::Csv => "csv",
            OutputFormat::Xy => "xy",
        }
    }
}

/// 解析 2θ 范围，如 "5-90"
pub fn parse_range(range: &str) -> Result<(f64, f64)> {
    let (lo, hi) = range
        .split_once('-')
        .ok_or_else(|| PhaseMatchError::InvalidRange(range.to_string()))?;

    let min: f64 = lo
        .trim()
        .parse()
        .map_err(|_| PhaseMatchError::InvalidRange(range.to_string()))?;
    let max: f64 = hi
        .trim()
        .parse()
        .map_err(|_| PhaseMatchError::InvalidRange(range.to_string()))?;

    if min < 0.0 || max <= min || max > 180.0 {
        return Err(PhaseMatchError::InvalidRange(format!(
            "{} (must be 0 <= min < max <= 180)",
            range
        )));
    }

    Ok((min, max))
}
