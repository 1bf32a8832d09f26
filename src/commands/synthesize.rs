//! # synthesize 子命令实现
//!
//! 将选定物相的峰集合按给定标度与峰形合成到均匀 2θ 网格上，
//! 用于构造测试数据或检查候选库。
//!
//! ## 依赖关系
//! - 使用 `cli/synthesize.rs` 定义的 SynthesizeArgs
//! - 使用 `xrd/synthesizer.rs`, `xrd/export.rs`, `xrd/plot.rs`

use super::{select_phases, write_curves};
use crate::cli::synthesize::SynthesizeArgs;
use crate::cli::{parse_range, OutputFormat};
use crate::error::{PhaseMatchError, Result};
use crate::models::CandidatePhase;
use crate::parsers;
use crate::utils::output;
use crate::xrd::export::CurveTable;
use crate::xrd::plot::PhaseTicks;
use crate::xrd::profile::CagliotiParams;
use crate::xrd::synthesizer::{synthesize, uniform_grid};

/// 合成设置
#[derive(Debug, Clone, Copy)]
struct SynthesisSettings {
    range: (f64, f64),
    step: f64,
    caglioti: CagliotiParams,
    eta: f64,
    zero_shift: f64,
}

/// 执行图谱合成
pub fn execute(args: SynthesizeArgs) -> Result<()> {
    output::print_header("Pattern Synthesis");

    let library = parsers::load_candidates(&args.candidates)?;
    let phases = select_phases(library, &args.phases)?;
    let scales = expand_scales(&args.scales, phases.len())?;

    if !(args.step > 0.0) {
        return Err(PhaseMatchError::InvalidArgument(format!(
            "step must be positive, got {}",
            args.step
        )));
    }
    if !(0.0..=1.0).contains(&args.eta) {
        return Err(PhaseMatchError::InvalidArgument(format!(
            "eta must be within [0, 1], got {}",
            args.eta
        )));
    }

    let settings = SynthesisSettings {
        range: parse_range(&args.range)?,
        step: args.step,
        caglioti: CagliotiParams::new(args.u, args.v, args.w),
        eta: args.eta,
        zero_shift: args.zero_shift,
    };

    let title = args
        .plot
        .title
        .clone()
        .unwrap_or_else(|| "synthetic".to_string());
    let table = build_table(title, &phases, &scales, &settings, args.per_phase);
    output::print_success(&format!(
        "Synthesized {} phase(s) on {} points",
        phases.len(),
        table.two_theta.len()
    ));

    let ticks: Vec<PhaseTicks> = phases
        .iter()
        .map(|phase| PhaseTicks {
            label: phase.display_name().to_string(),
            positions: phase
                .peaks
                .two_theta
                .iter()
                .map(|x| x + settings.zero_shift)
                .collect(),
        })
        .collect();

    let format = args
        .format
        .unwrap_or_else(|| OutputFormat::from_extension(&args.output, OutputFormat::Xy));
    write_curves(&table, &ticks, &args.output, format, &args.plot)?;
    output::print_written("pattern", &args.output);

    Ok(())
}

/// 每个物相一个标度；未给出时为 1
fn expand_scales(scales: &[f64], n_phases: usize) -> Result<Vec<f64>> {
    if scales.len() > n_phases {
        return Err(PhaseMatchError::InvalidArgument(format!(
            "{} scales given for {} phases",
            scales.len(),
            n_phases
        )));
    }
    if let Some(bad) = scales.iter().find(|s| !(**s >= 0.0) || !s.is_finite()) {
        return Err(PhaseMatchError::InvalidArgument(format!(
            "scale must be a finite non-negative number, got {}",
            bad
        )));
    }
    let mut expanded = scales.to_vec();
    expanded.resize(n_phases, 1.0);
    Ok(expanded)
}

/// 合成总图谱；`per_phase` 时附加各物相列
///
/// 总图谱列名为 `observed`，以便绘图与重新读入。
fn build_table(
    title: String,
    phases: &[CandidatePhase],
    scales: &[f64],
    settings: &SynthesisSettings,
    per_phase: bool,
) -> CurveTable {
    let (lo, hi) = settings.range;
    let grid = uniform_grid(lo, hi, settings.step);

    let curves: Vec<Vec<f64>> = phases
        .iter()
        .zip(scales)
        .map(|(phase, scale)| {
            synthesize(
                &grid,
                &phase.peaks,
                &settings.caglioti,
                *scale,
                settings.zero_shift,
                settings.eta,
            )
        })
        .collect();

    let mut total = vec![0.0; grid.len()];
    for curve in &curves {
        for (t, y) in total.iter_mut().zip(curve) {
            *t += y;
        }
    }

    let mut table = CurveTable::new(title, grid).with_column("observed", total);
    if per_phase {
        for (phase, curve) in phases.iter().zip(curves) {
            table = table.with_column(phase.id.clone(), curve);
        }
    }
    table
}
