//! # 命令执行模块
//!
//! 实现各子命令的业务逻辑：读取文件、调用引擎、打印表格、写出结果。
//!
//! ## 依赖关系
//! - 被 `main.rs` 调用
//! - 使用 `cli/`, `parsers/`, `analysis/`, `xrd/`, `batch/`, `utils/`
//! - 子模块: identify, refine, synthesize

pub mod identify;
pub mod refine;
pub mod synthesize;

use crate::analysis::decomposition::DecompositionResult;
use crate::analysis::lebail::{RefinementConfig, RefinementOutcome};
use crate::analysis::AnalysisConfig;
use crate::cli::refine::{PlotOptions, RefinementOptions};
use crate::cli::{parse_range, Commands, OutputFormat};
use crate::error::{PhaseMatchError, Result};
use crate::models::CandidatePhase;
use crate::parsers;
use crate::xrd::export::{self, CurveTable};
use crate::xrd::plot::{self, PhaseTicks};

use std::path::Path;

/// 执行命令
pub fn run(cmd: Commands) -> Result<()> {
    match cmd {
        Commands::Identify(args) => identify::execute(args),
        Commands::Refine(args) => refine::execute(args),
        Commands::Synthesize(args) => synthesize::execute(args),
    }
}

/// 读取配置文件（未指定时取默认值）
fn load_config(path: Option<&Path>) -> Result<AnalysisConfig> {
    match path {
        Some(path) => parsers::load_analysis_config(path),
        None => Ok(AnalysisConfig::default()),
    }
}

/// 用命令行选项覆盖精修配置
fn apply_refinement_options(config: &mut RefinementConfig, options: &RefinementOptions) -> Result<()> {
    if let Some(cycles) = options.cycles {
        config.max_cycles = cycles;
    }
    if let Some(threshold) = options.convergence {
        if !(threshold > 0.0) {
            return Err(PhaseMatchError::InvalidArgument(format!(
                "convergence threshold must be positive, got {}",
                threshold
            )));
        }
        config.convergence_threshold = threshold;
    }
    if let Some(window) = &options.window {
        config.two_theta_range = Some(parse_range(window)?);
    }
    config.normalize |= options.normalize;
    config.staged |= options.staged;
    config.strict_convergence |= options.strict;
    Ok(())
}

/// 按 ID 挑选物相；`ids` 为空时返回整个库
fn select_phases(library: Vec<CandidatePhase>, ids: &[String]) -> Result<Vec<CandidatePhase>> {
    if ids.is_empty() {
        return Ok(library);
    }
    ids.iter()
        .map(|id| {
            library
                .iter()
                .find(|p| &p.id == id)
                .cloned()
                .ok_or_else(|| {
                    PhaseMatchError::InvalidArgument(format!("phase '{}' not found in library", id))
                })
        })
        .collect()
}

/// 精修结果的峰位标记
fn refinement_ticks(outcome: &RefinementOutcome) -> Vec<PhaseTicks> {
    outcome
        .phases
        .iter()
        .map(|refined| PhaseTicks {
            label: refined.phase.display_name().to_string(),
            positions: refined.peaks.two_theta.clone(),
        })
        .collect()
}

/// 分解结果的峰位标记
fn decomposition_ticks(result: &DecompositionResult) -> Vec<PhaseTicks> {
    result
        .identified_phases
        .iter()
        .map(|record| PhaseTicks {
            label: record.phase.display_name().to_string(),
            positions: record.phase.peaks.two_theta.clone(),
        })
        .collect()
}

/// 按格式写出曲线：图像或数据文件
fn write_curves(
    table: &CurveTable,
    ticks: &[PhaseTicks],
    output: &Path,
    format: OutputFormat,
    plot_options: &PlotOptions,
) -> Result<()> {
    match format {
        OutputFormat::Png | OutputFormat::Svg => plot::generate_fit_plot(
            table,
            ticks,
            output,
            plot_options.width,
            plot_options.height,
            format == OutputFormat::Svg,
        ),
        OutputFormat::Csv => export::to_csv(table, output),
        OutputFormat::Xy => export::to_xy(table, output),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{TheoreticalPeakSet, UnitCell};

    fn library() -> Vec<CandidatePhase> {
        ["a", "b", "c"]
            .iter()
            .map(|id| {
                CandidatePhase::new(
                    *id,
                    id.to_uppercase(),
                    "",
                    UnitCell::default(),
                    TheoreticalPeakSet::default(),
                )
            })
            .collect()
    }

    #[test]
    fn test_select_phases() {
        assert_eq!(select_phases(library(), &[]).unwrap().len(), 3);

        let picked = select_phases(library(), &["c".to_string(), "a".to_string()]).unwrap();
        let ids: Vec<&str> = picked.iter().map(|p| p.id.as_str()).collect();
        assert_eq!(ids, vec!["c", "a"]);

        assert!(select_phases(library(), &["z".to_string()]).is_err());
    }

    #[test]
    fn test_apply_refinement_options() {
        let mut config = RefinementConfig::default();
        let options = RefinementOptions {
            cycles: Some(5),
            window: Some("20-60".to_string()),
            staged: true,
            ..Default::default()
        };
        apply_refinement_options(&mut config, &options).unwrap();
        assert_eq!(config.max_cycles, 5);
        assert_eq!(config.two_theta_range, Some((20.0, 60.0)));
        assert!(config.staged);
        assert!(!config.normalize);

        let bad = RefinementOptions {
            convergence: Some(0.0),
            ..Default::default()
        };
        assert!(apply_refinement_options(&mut config, &bad).is_err());
    }

    #[test]
    fn test_flags_do_not_clear_config() {
        let mut config = RefinementConfig {
            normalize: true,
            ..Default::default()
        };
        apply_refinement_options(&mut config, &RefinementOptions::default()).unwrap();
        assert!(config.normalize);
    }
}
