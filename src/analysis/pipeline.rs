//! # 分析流程
//!
//! 顺序分解 → Le Bail 精修 → 报告。
//!
//! 精修以分解结果为起点：标度取扣除阶段拟合值，峰形取缺省值，全部参数组放开。
//! 精修失败不会丢弃分解结果。
//!
//! ## 依赖关系
//! - 被 `commands/identify.rs` 调用
//! - 使用 `analysis/` 下全部引擎模块

use super::cache::RefinedPhaseCache;
use super::decomposition::{run_sequential_decomposition, CandidatePool, DecompositionConfig, DecompositionResult};
use super::lebail::{run_le_bail_refinement, RefinementConfig, RefinementOutcome, RefinementParameters, RefinementPhase};
use super::report::build_report;
use crate::error::Result;
use crate::models::{CandidatePhase, ExperimentalPattern};

use serde::{Deserialize, Serialize};

/// 完整分析配置
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AnalysisConfig {
    pub decomposition: DecompositionConfig,
    pub refinement: RefinementConfig,
    /// 分解后是否执行 Le Bail 精修
    pub refine: bool,
}

impl Default for AnalysisConfig {
    fn default() -> Self {
        AnalysisConfig {
            decomposition: DecompositionConfig::default(),
            refinement: RefinementConfig::default(),
            refine: true,
        }
    }
}

/// 分析结果
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AnalysisResult {
    pub decomposition: DecompositionResult,
    pub refinement: Option<RefinementOutcome>,
    pub report: String,
}

/// 由分解记录构造精修起点
pub fn seed_refinement(decomposition: &DecompositionResult, intensity_factor: f64) -> Vec<RefinementPhase> {
    decomposition
        .identified_phases
        .iter()
        .map(|record| {
            let parameters = RefinementParameters::for_phase(&record.phase)
                .with_scale(record.optimized_scaling * intensity_factor);
            RefinementPhase::new(record.phase.clone(), parameters)
        })
        .collect()
}

/// 对一条图谱执行完整分析
///
/// 候选先经缓存排序（命中的物相使用精修峰位）；精修成功的物相写回缓存。
pub fn analyze(
    pattern: &ExperimentalPattern,
    candidates: Vec<CandidatePhase>,
    config: &AnalysisConfig,
    cache: &mut RefinedPhaseCache,
) -> Result<AnalysisResult> {
    let ordered: Vec<CandidatePhase> = cache
        .prioritize(candidates)
        .into_iter()
        .map(|c| c.phase)
        .collect();
    let mut pool = CandidatePool::new(ordered);

    let decomposition = run_sequential_decomposition(pattern, &mut pool, &config.decomposition)?;

    let refinement = if config.refine && !decomposition.identified_phases.is_empty() {
        // 精修前若归一化，初始标度随之缩放
        let factor = if config.refinement.normalize && pattern.max_intensity() > 0.0 {
            100.0 / pattern.max_intensity()
        } else {
            1.0
        };
        let phases = seed_refinement(&decomposition, factor);
        let outcome = run_le_bail_refinement(pattern, &phases, &config.refinement);

        if outcome.success {
            for refined in &outcome.phases {
                cache.store(refined.clone());
            }
        }
        Some(outcome)
    } else {
        None
    };

    let report = build_report(&decomposition, refinement.as_ref());

    Ok(AnalysisResult {
        decomposition,
        refinement,
        report,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{TheoreticalPeakSet, UnitCell};
    use crate::xrd::profile::ProfileShape;
    use crate::xrd::synthesizer::{synthesize_with_shape, uniform_grid};

    fn quartz() -> CandidatePhase {
        CandidatePhase::new(
            "quartz",
            "Quartz",
            "SiO2",
            UnitCell::new(4.913, 4.913, 5.405, 90.0, 90.0, 120.0),
            TheoreticalPeakSet::new(vec![20.9, 26.6, 36.5, 50.1], vec![22.0, 100.0, 8.0, 14.0])
                .unwrap(),
        )
    }

    fn calcite() -> CandidatePhase {
        CandidatePhase::new(
            "calcite",
            "Calcite",
            "CaCO3",
            UnitCell::new(4.99, 4.99, 17.06, 90.0, 90.0, 120.0),
            TheoreticalPeakSet::new(vec![23.1, 29.4, 39.4, 43.2], vec![8.0, 100.0, 18.0, 15.0])
                .unwrap(),
        )
    }

    fn pattern() -> ExperimentalPattern {
        let grid = uniform_grid(15.0, 55.0, 0.02);
        let intensity = synthesize_with_shape(&grid, &quartz().peaks, &ProfileShape::default(), 1.0);
        ExperimentalPattern::new("quartz", grid, intensity).unwrap()
    }

    #[test]
    fn test_analyze_without_refinement() {
        let config = AnalysisConfig {
            refine: false,
            ..Default::default()
        };
        let mut cache = RefinedPhaseCache::new();
        let result = analyze(&pattern(), vec![calcite(), quartz()], &config, &mut cache).unwrap();

        assert_eq!(result.decomposition.identified_phases.len(), 1);
        assert!(result.refinement.is_none());
        assert!(cache.is_empty());
        assert!(result.report.contains("Phase 1: Quartz"));
    }

    #[test]
    fn test_analyze_with_refinement_fills_cache() {
        let mut config = AnalysisConfig::default();
        config.refinement.max_cycles = 2;
        let mut cache = RefinedPhaseCache::new();

        let result = analyze(&pattern(), vec![quartz(), calcite()], &config, &mut cache).unwrap();

        let outcome = result.refinement.unwrap();
        assert!(outcome.success);
        assert!(!outcome.history.is_empty());
        assert!(cache.get("quartz").is_some());
        assert!(result.report.contains("=== Le Bail Refinement Report ==="));
    }

    #[test]
    fn test_seed_uses_optimized_scaling() {
        let mut pool = CandidatePool::new(vec![quartz()]);
        let decomposition =
            run_sequential_decomposition(&pattern(), &mut pool, &DecompositionConfig::default())
                .unwrap();
        let seeds = seed_refinement(&decomposition, 2.0);
        assert_eq!(seeds.len(), 1);
        let expected = decomposition.identified_phases[0].optimized_scaling * 2.0;
        assert_eq!(seeds[0].parameters.scale_factor, expected);
        assert_eq!(seeds[0].parameters.eta, 0.5);
        assert_eq!(seeds[0].parameters.cell, quartz().cell);
    }

    #[test]
    fn test_analyze_rejects_invalid_pattern() {
        let bad = ExperimentalPattern {
            name: "bad".to_string(),
            two_theta: Vec::new(),
            intensity: Vec::new(),
            uncertainty: None,
        };
        let mut cache = RefinedPhaseCache::new();
        let err = analyze(&bad, vec![quartz()], &AnalysisConfig::default(), &mut cache).unwrap_err();
        assert!(err.is_invalid_input());
    }
}
