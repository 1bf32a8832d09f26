//! # 质量评估与报告
//!
//! 由分解与精修结果派生物相分数、质量等级，并生成确定性的文本报告。
//! 这里只格式化已计算好的数值，不做额外的算法处理。
//!
//! ## 依赖关系
//! - 被 `analysis/pipeline.rs`, `commands/` 调用
//! - 使用 `analysis/decomposition.rs`, `analysis/lebail.rs`

use super::decomposition::{DecompositionResult, IdentifiedPhase};
use super::lebail::RefinementOutcome;

use std::collections::BTreeMap;
use std::fmt;
use std::fmt::Write as _;

/// 物相分数：各物相贡献 ÷ 全部贡献之和
///
/// 同名物相的贡献合并；结果与输入顺序无关，空输入得到空表。
pub fn phase_fractions(records: &[IdentifiedPhase]) -> BTreeMap<String, f64> {
    let mut contributions: BTreeMap<String, f64> = BTreeMap::new();
    for record in records {
        *contributions
            .entry(record.phase.display_name().to_string())
            .or_insert(0.0) += record.total_contribution();
    }

    let total: f64 = contributions.values().sum();
    contributions
        .into_iter()
        .map(|(name, c)| (name, if total > 0.0 { c / total } else { 0.0 }))
        .collect()
}

/// 按最终残差比例划分的分解质量
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResidueQuality {
    Excellent,
    Good,
    Fair,
    Poor,
}

impl ResidueQuality {
    pub fn from_fraction(residue_fraction: f64) -> Self {
        if residue_fraction < 0.05 {
            ResidueQuality::Excellent
        } else if residue_fraction < 0.15 {
            ResidueQuality::Good
        } else if residue_fraction < 0.30 {
            ResidueQuality::Fair
        } else {
            ResidueQuality::Poor
        }
    }

    pub fn description(&self) -> &'static str {
        match self {
            ResidueQuality::Excellent => "Very low residue",
            ResidueQuality::Good => "Acceptable residue",
            ResidueQuality::Fair => "Moderate residue remains",
            ResidueQuality::Poor => "High residue suggests missing phases",
        }
    }
}

impl fmt::Display for ResidueQuality {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            ResidueQuality::Excellent => "Excellent",
            ResidueQuality::Good => "Good",
            ResidueQuality::Fair => "Fair",
            ResidueQuality::Poor => "Poor",
        };
        write!(f, "{}", label)
    }
}

/// 按 Rwp（%）划分的精修质量
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RefinementQuality {
    Excellent,
    VeryGood,
    Good,
    Acceptable,
    Poor,
}

impl RefinementQuality {
    pub fn from_rwp(rwp: f64) -> Self {
        if rwp < 5.0 {
            RefinementQuality::Excellent
        } else if rwp < 10.0 {
            RefinementQuality::VeryGood
        } else if rwp < 15.0 {
            RefinementQuality::Good
        } else if rwp < 25.0 {
            RefinementQuality::Acceptable
        } else {
            RefinementQuality::Poor
        }
    }
}

impl fmt::Display for RefinementQuality {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            RefinementQuality::Excellent => "Excellent",
            RefinementQuality::VeryGood => "Very Good",
            RefinementQuality::Good => "Good",
            RefinementQuality::Acceptable => "Acceptable",
            RefinementQuality::Poor => "Poor",
        };
        write!(f, "{}", label)
    }
}

/// 生成分解（及可选精修）的文本报告
pub fn build_report(decomposition: &DecompositionResult, refinement: Option<&RefinementOutcome>) -> String {
    let mut out = String::new();
    write_decomposition(&mut out, decomposition);
    if let Some(outcome) = refinement {
        out.push('\n');
        write_refinement(&mut out, outcome);
    }
    out
}

/// 仅精修的文本报告
pub fn build_refinement_report(outcome: &RefinementOutcome) -> String {
    let mut out = String::new();
    write_refinement(&mut out, outcome);
    out
}

fn write_decomposition(out: &mut String, result: &DecompositionResult) {
    let fractions = phase_fractions(&result.identified_phases);

    let _ = writeln!(out, "=== Multi-Phase Analysis Report ===");
    let _ = writeln!(out);
    let _ = writeln!(out, "Phases Identified: {}", result.identified_phases.len());
    let _ = writeln!(
        out,
        "Final Residue: {:.1}% of original intensity",
        result.residue_fraction * 100.0
    );
    let _ = writeln!(out, "Stopped: {}", result.stop_reason);
    let _ = writeln!(out);

    for (i, record) in result.identified_phases.iter().enumerate() {
        let name = record.phase.display_name();
        let fraction = fractions.get(name).copied().unwrap_or(0.0);
        let _ = writeln!(out, "Phase {}: {}", i + 1, name);
        if !record.phase.formula.is_empty() {
            let _ = writeln!(out, "  - Formula: {}", record.phase.formula);
        }
        let _ = writeln!(out, "  - Match Score: {:.3}", record.match_score);
        let _ = writeln!(out, "  - Optimized Scaling: {:.3}", record.optimized_scaling);
        let _ = writeln!(out, "  - Estimated Fraction: {:.1}%", fraction * 100.0);
        let _ = writeln!(out);
    }

    let quality = ResidueQuality::from_fraction(result.residue_fraction);
    let _ = writeln!(out, "Analysis Quality: {} - {}", quality, quality.description());
}

fn write_refinement(out: &mut String, outcome: &RefinementOutcome) {
    let _ = writeln!(out, "=== Le Bail Refinement Report ===");
    let _ = writeln!(out);

    let stats = match (&outcome.statistics, outcome.success) {
        (Some(stats), true) => stats,
        _ => {
            let _ = writeln!(
                out,
                "Refinement failed: {}",
                outcome.error_message.as_deref().unwrap_or("unknown error")
            );
            return;
        }
    };

    let _ = writeln!(
        out,
        "Refinement completed after {} cycles ({})",
        outcome.cycles(),
        if outcome.converged { "converged" } else { "not converged" }
    );
    let _ = writeln!(out, "Final R-factors:");
    let _ = writeln!(out, "  Rp   = {:.3}%", stats.rp);
    let _ = writeln!(out, "  Rwp  = {:.3}%", stats.rwp);
    let _ = writeln!(out, "  Rexp = {:.3}%", stats.rexp);
    let _ = writeln!(out, "  GoF  = {:.3}", stats.gof);
    let _ = writeln!(out, "  χ²   = {:.3}", stats.chi_squared);
    let _ = writeln!(out);

    for (i, refined) in outcome.phases.iter().enumerate() {
        let p = &refined.parameters;
        let _ = writeln!(out, "Phase {}: {}", i + 1, refined.phase.display_name());
        let _ = writeln!(out, "  Scale factor: {:.4}", p.scale_factor);
        let _ = writeln!(out, "  Profile parameters:");
        let _ = writeln!(out, "    U = {:.6}", p.caglioti.u);
        let _ = writeln!(out, "    V = {:.6}", p.caglioti.v);
        let _ = writeln!(out, "    W = {:.6}", p.caglioti.w);
        let _ = writeln!(out, "    η = {:.3}", p.eta);
        let _ = writeln!(out, "  Zero shift: {:.4}°", p.zero_shift);
        if !p.intensity_multipliers.is_empty() {
            let multipliers: Vec<String> =
                p.intensity_multipliers.iter().map(|m| format!("{:.3}", m)).collect();
            let _ = writeln!(out, "  Intensity multipliers: {}", multipliers.join(", "));
        }

        if p.flags.cell {
            let cell = &p.cell;
            let _ = writeln!(out, "  Unit cell:");
            let _ = writeln!(out, "    a = {:.4} Å", cell.a);
            let _ = writeln!(out, "    b = {:.4} Å", cell.b);
            let _ = writeln!(out, "    c = {:.4} Å", cell.c);
            let _ = writeln!(out, "    α = {:.3}°", cell.alpha);
            let _ = writeln!(out, "    β = {:.3}°", cell.beta);
            let _ = writeln!(out, "    γ = {:.3}°", cell.gamma);
            let _ = writeln!(out, "    V = {:.3} Å³", cell.volume());
        }
        if let Some(space_group) = &refined.phase.space_group {
            let _ = writeln!(out, "  Space group: {}", space_group);
        }
        let _ = writeln!(out, "  Search priority: {:.3}", refined.search_priority);
        let _ = writeln!(out);
    }

    let _ = writeln!(out, "Refinement Quality: {}", RefinementQuality::from_rwp(stats.rwp));
}
