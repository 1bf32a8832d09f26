//! # identify 子命令实现
//!
//! 对一条图谱或整个目录执行多物相鉴定。
//!
//! ## 流程
//! 1. 读取候选库、配置与精修缓存（整个会话共享一份）
//! 2. 每条图谱：顺序分解 → 可选 Le Bail 精修 → 报告
//! 3. 写出拟合图或数据文件，保存缓存
//!
//! 批量模式下各文件并行分析；每个文件使用缓存的快照排序候选，
//! 精修成功的物相再写回共享缓存。
//!
//! ## 依赖关系
//! - 使用 `cli/identify.rs` 定义的 IdentifyArgs
//! - 使用 `analysis/pipeline.rs`
//! - 使用 `batch/` 模块进行批量处理

use super::{apply_refinement_options, decomposition_ticks, load_config, refinement_ticks, write_curves};
use crate::analysis::report::{phase_fractions, RefinementQuality, ResidueQuality};
use crate::analysis::{analyze, AnalysisConfig, AnalysisResult, RefinedPhaseCache};
use crate::batch::{BatchRunner, FileCollector, ProcessResult};
use crate::cli::identify::IdentifyArgs;
use crate::cli::refine::PlotOptions;
use crate::cli::OutputFormat;
use crate::error::{PhaseMatchError, Result};
use crate::models::{CandidatePhase, ExperimentalPattern};
use crate::parsers;
use crate::utils::{output, progress};
use crate::xrd::export::{self, CurveTable};

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use tabled::{Table, Tabled};

/// 执行多物相鉴定
pub fn execute(args: IdentifyArgs) -> Result<()> {
    output::print_header("Multi-Phase Identification");

    let config = build_config(&args)?;
    let candidates = parsers::load_candidates(&args.candidates)?;
    output::print_info(&format!(
        "Loaded {} candidate phases from '{}'",
        candidates.len(),
        args.candidates.display()
    ));

    let cache = match &args.cache {
        Some(path) => {
            let cache = parsers::load_refined_cache(path)?;
            if !cache.is_empty() {
                output::print_info(&format!("Using {} cached refined phases", cache.len()));
            }
            cache
        }
        None => RefinedPhaseCache::new(),
    };

    let cache = if args.input.is_file() {
        execute_single_file(&args, &config, candidates, cache)?
    } else if args.input.is_dir() {
        execute_batch(&args, &config, candidates, cache)?
    } else {
        return Err(PhaseMatchError::FileNotFound {
            path: args.input.display().to_string(),
        });
    };

    if let Some(path) = &args.cache {
        parsers::save_refined_cache(&cache, path)?;
        output::print_written("cache", path);
    }

    Ok(())
}

/// 配置文件 + 命令行覆盖
fn build_config(args: &IdentifyArgs) -> Result<AnalysisConfig> {
    let mut config = load_config(args.config.as_deref())?;

    if let Some(max_phases) = args.max_phases {
        config.decomposition.max_phases = max_phases;
    }
    if let Some(threshold) = args.residue_threshold {
        if !(0.0..=1.0).contains(&threshold) {
            return Err(PhaseMatchError::InvalidArgument(format!(
                "residue threshold must be within [0, 1], got {}",
                threshold
            )));
        }
        config.decomposition.residue_threshold = threshold;
    }
    if args.no_refine {
        config.refine = false;
    }
    apply_refinement_options(&mut config.refinement, &args.refinement)?;

    Ok(config)
}

// ─────────────────────────────────────────────────────────────
// 单文件模式
// ─────────────────────────────────────────────────────────────

fn execute_single_file(
    args: &IdentifyArgs,
    config: &AnalysisConfig,
    candidates: Vec<CandidatePhase>,
    mut cache: RefinedPhaseCache,
) -> Result<RefinedPhaseCache> {
    let pattern = parsers::parse_pattern_file(&args.input)?;
    print_pattern_summary(&pattern);

    let spinner = progress::create_spinner(if config.refine {
        "Decomposing and refining..."
    } else {
        "Decomposing..."
    });
    let result = analyze(&pattern, candidates, config, &mut cache);
    spinner.finish_and_clear();
    let result = result?;

    print_decomposition_table(&result);
    print_refinement_summary(&result);

    println!();
    println!("{}", result.report);

    let format = args
        .format
        .unwrap_or_else(|| OutputFormat::from_extension(&args.output, OutputFormat::Png));
    write_result(&pattern, &result, &args.output, format, &args.plot)?;
    output::print_written("fit", &args.output);

    if let Some(path) = &args.report {
        export::write_report(&result.report, path)?;
        output::print_written("report", path);
    }

    Ok(cache)
}

fn print_pattern_summary(pattern: &ExperimentalPattern) {
    let (lo, hi) = pattern.range().unwrap_or((0.0, 0.0));
    output::print_success(&format!(
        "Loaded pattern '{}' ({} points, 2θ {:.2}° to {:.2}°)",
        pattern.name,
        pattern.len(),
        lo,
        hi
    ));
}

#[derive(Tabled)]
struct PhaseRow {
    #[tabled(rename = "#")]
    index: usize,
    #[tabled(rename = "Phase")]
    name: String,
    #[tabled(rename = "Formula")]
    formula: String,
    #[tabled(rename = "Score")]
    score: String,
    #[tabled(rename = "Scale")]
    scale: String,
    #[tabled(rename = "Fraction (%)")]
    fraction: String,
}

fn print_decomposition_table(result: &AnalysisResult) {
    let decomposition = &result.decomposition;
    if decomposition.identified_phases.is_empty() {
        output::print_warning(&format!(
            "No phase identified ({})",
            decomposition.stop_reason
        ));
        return;
    }

    let fractions = phase_fractions(&decomposition.identified_phases);
    let rows: Vec<PhaseRow> = decomposition
        .identified_phases
        .iter()
        .enumerate()
        .map(|(i, record)| {
            let name = record.phase.display_name();
            PhaseRow {
                index: i + 1,
                name: name.to_string(),
                formula: record.phase.formula.clone(),
                score: format!("{:.3}", record.match_score),
                scale: format!("{:.3}", record.optimized_scaling),
                fraction: format!("{:.1}", fractions.get(name).copied().unwrap_or(0.0) * 100.0),
            }
        })
        .collect();

    output::print_header(&format!("Identified Phases ({})", rows.len()));
    println!("{}", Table::new(&rows));

    let quality = ResidueQuality::from_fraction(decomposition.residue_fraction);
    output::print_metric(
        "Residue",
        &format!("{:.1}% ({})", decomposition.residue_fraction * 100.0, quality),
        matches!(quality, ResidueQuality::Excellent | ResidueQuality::Good),
    );
    output::print_metric("Stopped", &decomposition.stop_reason.to_string(), true);
}

fn print_refinement_summary(result: &AnalysisResult) {
    let Some(outcome) = &result.refinement else {
        return;
    };

    match (&outcome.statistics, outcome.success) {
        (Some(stats), true) => {
            let quality = RefinementQuality::from_rwp(stats.rwp);
            output::print_header("Le Bail Refinement");
            output::print_metric(
                "Cycles",
                &format!(
                    "{} ({})",
                    outcome.cycles(),
                    if outcome.converged { "converged" } else { "not converged" }
                ),
                outcome.converged,
            );
            output::print_metric("Rwp", &format!("{:.3}% ({})", stats.rwp, quality), stats.rwp < 20.0);
            output::print_metric("Rp", &format!("{:.3}%", stats.rp), stats.rp < 20.0);
            output::print_metric("GoF", &format!("{:.3}", stats.gof), stats.gof < 2.0);

            let warnings: usize = outcome.history.iter().map(|c| c.warnings.len()).sum();
            if warnings > 0 {
                output::print_warning(&format!(
                    "{} phase fit(s) kept their previous parameters",
                    warnings
                ));
            }
        }
        _ => output::print_warning(&format!(
            "Le Bail refinement failed: {}",
            outcome.error_message.as_deref().unwrap_or("unknown error")
        )),
    }
}

/// 精修成功时输出精修拟合，否则输出分解结果
fn write_result(
    pattern: &ExperimentalPattern,
    result: &AnalysisResult,
    output_path: &Path,
    format: OutputFormat,
    plot_options: &PlotOptions,
) -> Result<()> {
    let title = plot_options
        .title
        .clone()
        .unwrap_or_else(|| pattern.name.clone());

    match &result.refinement {
        Some(outcome) if outcome.success => {
            let table = CurveTable::from_refinement(title, outcome);
            write_curves(&table, &refinement_ticks(outcome), output_path, format, plot_options)
        }
        _ => {
            let table = CurveTable::from_decomposition(title, &result.decomposition);
            let ticks = decomposition_ticks(&result.decomposition);
            write_curves(&table, &ticks, output_path, format, plot_options)
        }
    }
}

// ─────────────────────────────────────────────────────────────
// 批量模式
// ─────────────────────────────────────────────────────────────

/// 批量会话共享的状态
struct BatchSession<'a> {
    config: &'a AnalysisConfig,
    candidates: Vec<CandidatePhase>,
    cache: Mutex<RefinedPhaseCache>,
    output_dir: PathBuf,
    format: OutputFormat,
    plot: &'a PlotOptions,
    overwrite: bool,
}

impl BatchSession<'_> {
    fn cache_snapshot(&self) -> RefinedPhaseCache {
        self.cache
            .lock()
            .map(|c| c.clone())
            .unwrap_or_else(|e| e.into_inner().clone())
    }

    fn store_refined(&self, result: &AnalysisResult) {
        let Some(outcome) = result.refinement.as_ref().filter(|o| o.success) else {
            return;
        };
        let mut cache = self.cache.lock().unwrap_or_else(|e| e.into_inner());
        for refined in &outcome.phases {
            cache.store(refined.clone());
        }
    }

    fn process(&self, input: &Path) -> ProcessResult {
        let stem = input
            .file_stem()
            .and_then(|s| s.to_str())
            .unwrap_or("pattern");
        let output_file = self
            .output_dir
            .join(format!("{}_fit.{}", stem, self.format.extension()));
        let file = input.display().to_string();

        if output_file.exists() && !self.overwrite {
            return ProcessResult::Skipped(file, format!("{} exists", output_file.display()));
        }

        match self.analyze_file(input, &output_file) {
            Ok(summary) => ProcessResult::Success(file, summary),
            Err(e) => ProcessResult::Failed(file, e.to_string()),
        }
    }

    fn analyze_file(&self, input: &Path, output_file: &Path) -> Result<String> {
        let pattern = parsers::parse_pattern_file(input)?;

        let mut cache = self.cache_snapshot();
        let result = analyze(&pattern, self.candidates.clone(), self.config, &mut cache)?;
        self.store_refined(&result);

        write_result(&pattern, &result, output_file, self.format, self.plot)?;
        let report_file = output_file.with_extension("txt");
        export::write_report(&result.report, &report_file)?;

        Ok(summarize(&result))
    }
}

/// 一行摘要：物相、残差与 Rwp
fn summarize(result: &AnalysisResult) -> String {
    let decomposition = &result.decomposition;
    let names: Vec<&str> = decomposition
        .identified_phases
        .iter()
        .map(|r| r.phase.display_name())
        .collect();
    let mut summary = if names.is_empty() {
        "no phase".to_string()
    } else {
        names.join(" + ")
    };
    summary.push_str(&format!(
        "; residue {:.1}%",
        decomposition.residue_fraction * 100.0
    ));
    if let Some(stats) = result
        .refinement
        .as_ref()
        .filter(|o| o.success)
        .and_then(|o| o.statistics.as_ref())
    {
        summary.push_str(&format!("; Rwp {:.2}%", stats.rwp));
    }
    summary
}

#[derive(Tabled)]
struct BatchRow {
    #[tabled(rename = "File")]
    file: String,
    #[tabled(rename = "Result")]
    summary: String,
}

fn execute_batch(
    args: &IdentifyArgs,
    config: &AnalysisConfig,
    candidates: Vec<CandidatePhase>,
    cache: RefinedPhaseCache,
) -> Result<RefinedPhaseCache> {
    output::print_info(&format!("Batch mode: directory '{}'", args.input.display()));

    let files = FileCollector::new(args.input.clone())
        .with_pattern(&args.pattern)?
        .recursive(args.recursive)
        .collect()?;

    if files.is_empty() {
        output::print_warning(&format!(
            "No matching files found with pattern '{}'",
            args.pattern
        ));
        return Ok(cache);
    }
    output::print_info(&format!("Found {} pattern files", files.len()));

    fs::create_dir_all(&args.output).map_err(|e| PhaseMatchError::FileWriteError {
        path: args.output.display().to_string(),
        source: e,
    })?;

    let format = args.format.unwrap_or(OutputFormat::Png);
    output::print_info(&format!("Output format: {:?}", format));

    let session = BatchSession {
        config,
        candidates,
        cache: Mutex::new(cache),
        output_dir: args.output.clone(),
        format,
        plot: &args.plot,
        overwrite: args.overwrite,
    };

    let runner = BatchRunner::new(args.jobs);
    let result = runner.run(&files, |file| session.process(file))?;

    if !result.succeeded.is_empty() {
        let rows: Vec<BatchRow> = result
            .succeeded
            .iter()
            .map(|(file, summary)| BatchRow {
                file: Path::new(file)
                    .file_name()
                    .map(|n| n.to_string_lossy().to_string())
                    .unwrap_or_else(|| file.clone()),
                summary: summary.clone(),
            })
            .collect();
        println!("{}", Table::new(&rows));
    }

    output::print_separator();
    output::print_success(&format!(
        "Batch complete: {} success, {} skipped, {} failed",
        result.succeeded.len(),
        result.skipped.len(),
        result.failures.len()
    ));

    for (path, reason) in &result.skipped {
        output::print_skip(&format!("{}: {}", path, reason));
    }

    if !result.failures.is_empty() {
        output::print_warning("Failed files:");
        for (path, err) in result.failures.iter().take(10) {
            output::print_error(&format!("  {}: {}", path, err));
        }
        if result.failures.len() > 10 {
            output::print_warning(&format!("  ... and {} more", result.failures.len() - 10));
        }
    }

    Ok(session
        .cache
        .into_inner()
        .unwrap_or_else(|e| e.into_inner()))
}
