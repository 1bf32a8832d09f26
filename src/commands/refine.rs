//! # refine 子命令实现
//!
//! 对指定物相做 Le Bail 精修，不经过分解。每个物相的初始标度按强度比估计。
//!
//! ## 依赖关系
//! - 使用 `cli/refine.rs` 定义的 RefineArgs
//! - 使用 `analysis/lebail.rs`, `analysis/report.rs`
//! - 使用 `xrd/export.rs`, `xrd/plot.rs` 输出

use super::{apply_refinement_options, load_config, refinement_ticks, select_phases, write_curves};
use crate::analysis::lebail::{
    run_le_bail_refinement, RefinementConfig, RefinementFlags, RefinementOutcome,
    RefinementParameters, RefinementPhase,
};
use crate::analysis::report::{build_refinement_report, RefinementQuality};
use crate::cli::refine::RefineArgs;
use crate::cli::OutputFormat;
use crate::error::{PhaseMatchError, Result};
use crate::models::{CandidatePhase, ExperimentalPattern};
use crate::parsers;
use crate::utils::{output, progress};
use crate::xrd::export::{self, CurveTable};

use tabled::{Table, Tabled};

/// 执行 Le Bail 精修
pub fn execute(args: RefineArgs) -> Result<()> {
    output::print_header("Le Bail Refinement");

    let mut config = load_config(args.config.as_deref())?.refinement;
    apply_refinement_options(&mut config, &args.refinement)?;

    let library = parsers::load_candidates(&args.candidates)?;
    let phases = select_phases(library, &args.phases)?;
    if phases.is_empty() {
        return Err(PhaseMatchError::InvalidArgument(
            "no phases to refine".to_string(),
        ));
    }

    let pattern = parsers::parse_pattern_file(&args.input)?;
    output::print_success(&format!(
        "Loaded pattern '{}' ({} points)",
        pattern.name,
        pattern.len()
    ));

    let flags = RefinementFlags {
        cell: !args.fix_cell,
        profile: !args.fix_profile,
        scale: !args.fix_scale,
        zero_shift: !args.fix_zero,
        intensities: args.refine_intensities,
    };
    let seeds = seed_phases(&pattern, phases, &config, flags);
    for seed in &seeds {
        output::print_info(&format!(
            "{}: initial scale {:.4}",
            seed.phase.display_name(),
            seed.parameters.scale_factor
        ));
    }

    let spinner = progress::create_spinner("Refining...");
    let outcome = run_le_bail_refinement(&pattern, &seeds, &config);
    spinner.finish_and_clear();

    if !outcome.success {
        return Err(PhaseMatchError::Other(format!(
            "Le Bail refinement failed: {}",
            outcome.error_message.as_deref().unwrap_or("unknown error")
        )));
    }

    print_cycle_table(&outcome);
    print_phase_table(&outcome);

    let report = build_refinement_report(&outcome);
    println!();
    println!("{}", report);

    let format = args
        .format
        .unwrap_or_else(|| OutputFormat::from_extension(&args.output, OutputFormat::Png));
    let title = args.plot.title.clone().unwrap_or_else(|| pattern.name.clone());
    let table = CurveTable::from_refinement(title, &outcome);
    write_curves(&table, &refinement_ticks(&outcome), &args.output, format, &args.plot)?;
    output::print_written("fit", &args.output);

    if let Some(path) = &args.report {
        export::write_report(&report, path)?;
        output::print_written("report", path);
    }

    if let Some(path) = &args.cache {
        let mut cache = parsers::load_refined_cache(path)?;
        for refined in &outcome.phases {
            cache.store(refined.clone());
        }
        parsers::save_refined_cache(&cache, path)?;
        output::print_written("cache", path);
    }

    Ok(())
}

/// 构造精修起点；归一化时按归一化后的强度估计标度
fn seed_phases(
    pattern: &ExperimentalPattern,
    phases: Vec<CandidatePhase>,
    config: &RefinementConfig,
    flags: RefinementFlags,
) -> Vec<RefinementPhase> {
    let basis = if config.normalize {
        pattern.normalized(100.0)
    } else {
        pattern.clone()
    };

    phases
        .into_iter()
        .map(|phase| {
            let parameters = RefinementParameters::estimated_for(&basis, &phase).with_flags(flags);
            RefinementPhase::new(phase, parameters)
        })
        .collect()
}

#[derive(Tabled)]
struct CycleRow {
    #[tabled(rename = "Cycle")]
    cycle: usize,
    #[tabled(rename = "Stage")]
    stage: String,
    #[tabled(rename = "Rp (%)")]
    rp: String,
    #[tabled(rename = "Rwp (%)")]
    rwp: String,
    #[tabled(rename = "GoF")]
    gof: String,
    #[tabled(rename = "Warnings")]
    warnings: usize,
}

fn print_cycle_table(outcome: &RefinementOutcome) {
    let rows: Vec<CycleRow> = outcome
        .history
        .iter()
        .map(|record| CycleRow {
            cycle: record.cycle,
            stage: record.stage.to_string(),
            rp: format!("{:.3}", record.statistics.rp),
            rwp: format!("{:.3}", record.statistics.rwp),
            gof: format!("{:.3}", record.statistics.gof),
            warnings: record.warnings.len(),
        })
        .collect();

    if rows.is_empty() {
        return;
    }
    output::print_header(&format!(
        "Refinement Cycles ({})",
        if outcome.converged { "converged" } else { "not converged" }
    ));
    println!("{}", Table::new(&rows));

    for warning in outcome.history.iter().flat_map(|c| c.warnings.iter()) {
        output::print_warning(warning);
    }
}

#[derive(Tabled)]
struct RefinedRow {
    #[tabled(rename = "Phase")]
    name: String,
    #[tabled(rename = "Scale")]
    scale: String,
    #[tabled(rename = "U")]
    u: String,
    #[tabled(rename = "V")]
    v: String,
    #[tabled(rename = "W")]
    w: String,
    #[tabled(rename = "η")]
    eta: String,
    #[tabled(rename = "Zero (°)")]
    zero: String,
    #[tabled(rename = "a, b, c (Å)")]
    cell: String,
    #[tabled(rename = "Share (%)")]
    share: String,
}

fn print_phase_table(outcome: &RefinementOutcome) {
    let contributions = outcome
        .history
        .last()
        .map(|c| c.contributions.as_slice())
        .unwrap_or(&[]);

    let rows: Vec<RefinedRow> = outcome
        .phases
        .iter()
        .map(|refined| {
            let p = &refined.parameters;
            let share = contributions
                .iter()
                .find(|c| c.phase_id == refined.phase.id)
                .map(|c| format!("{:.1}", c.contribution_percent))
                .unwrap_or_else(|| "-".to_string());
            RefinedRow {
                name: refined.phase.display_name().to_string(),
                scale: format!("{:.4}", p.scale_factor),
                u: format!("{:.5}", p.caglioti.u),
                v: format!("{:.5}", p.caglioti.v),
                w: format!("{:.5}", p.caglioti.w),
                eta: format!("{:.3}", p.eta),
                zero: format!("{:.4}", p.zero_shift),
                cell: format!("{:.4}, {:.4}, {:.4}", p.cell.a, p.cell.b, p.cell.c),
                share,
            }
        })
        .collect();

    output::print_header("Refined Phases");
    println!("{}", Table::new(&rows));

    if let Some(stats) = &outcome.statistics {
        output::print_metric(
            "Rwp",
            &format!("{:.3}% ({})", stats.rwp, RefinementQuality::from_rwp(stats.rwp)),
            stats.rwp < 20.0,
        );
        output::print_metric("GoF", &format!("{:.3}", stats.gof), stats.gof < 2.0);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{TheoreticalPeakSet, UnitCell};
    use approx::assert_relative_eq;

    fn phase() -> CandidatePhase {
        CandidatePhase::new(
            "halite",
            "Halite",
            "NaCl",
            UnitCell::cubic(5.64),
            TheoreticalPeakSet::new(vec![27.4, 31.7, 45.5], vec![13.0, 100.0, 55.0]).unwrap(),
        )
    }

    fn pattern() -> ExperimentalPattern {
        ExperimentalPattern::new(
            "p",
            vec![25.0, 30.0, 31.7, 40.0, 50.0],
            vec![10.0, 20.0, 400.0, 30.0, 10.0],
        )
        .unwrap()
    }

    #[test]
    fn test_seed_uses_estimate_and_flags() {
        let flags = RefinementFlags {
            cell: false,
            ..Default::default()
        };
        let seeds = seed_phases(&pattern(), vec![phase()], &RefinementConfig::default(), flags);
        assert_eq!(seeds.len(), 1);
        assert_relative_eq!(seeds[0].parameters.scale_factor, 0.8 * 400.0 / 100.0);
        assert!(!seeds[0].parameters.flags.cell);
        assert_eq!(seeds[0].parameters.cell, UnitCell::cubic(5.64));
    }

    #[test]
    fn test_seed_on_normalized_intensities() {
        let config = RefinementConfig {
            normalize: true,
            ..Default::default()
        };
        let seeds = seed_phases(&pattern(), vec![phase()], &config, RefinementFlags::default());
        assert_relative_eq!(seeds[0].parameters.scale_factor, 0.8, epsilon = 1e-12);
    }
}
