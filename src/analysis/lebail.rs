//! # Le Bail 精修
//!
//! 对所有已选物相的标度、峰形、零点与晶胞参数做循环的逐相有界拟合。
//!
//! ## 流程（每个循环）
//! 1. 依次对每个物相：固定其余物相，合成其贡献之和，
//!    以有界 L-BFGS 极小化 `Σ((obs − (本相 + 其余))/σ)²`
//! 2. 若精修晶胞，峰位更新为 原始峰位 + 当前零点偏移
//!    （仅零点修正，不由晶胞重新计算峰位）
//! 3. 计算总图谱与 R 因子，追加历史记录
//! 4. |ΔRwp| 小于阈值时收敛，或达到最大循环数
//!
//! 单个物相拟合失败时保留其循环前参数并记录警告，不会中止整个精修。
//!
//! ## 逐峰强度（Pawley 式）
//! `RefinementFlags::intensities` 开启时，每个峰额外带一个强度乘子，
//! 有效强度 = 理论强度 × 标度 × 乘子，乘子有界（缺省 [0.1, 10]）。
//!
//! ## 分阶段精修
//! 开启时前 max(3, N/3) 个循环冻结峰形参数与强度乘子，之后全部放开；
//! 只在第二阶段判断收敛。
//!
//! ## 预处理
//! 先按全谱最大值归一化，再截取 2θ 窗口。
//!
//! ## 依赖关系
//! - 被 `analysis/pipeline.rs`, `commands/refine.rs` 调用
//! - 使用 `analysis/optimizer.rs`, `analysis/statistics.rs`, `xrd/synthesizer.rs`

use super::optimizer::{LbfgsbOptimizer, ObjectiveFunction, OptimizerConfig};
use super::statistics::AgreementStatistics;
use crate::error::{PhaseMatchError, Result};
use crate::models::{CandidatePhase, ExperimentalPattern, TheoreticalPeakSet, UnitCell};
use crate::xrd::profile::CagliotiParams;
use crate::xrd::synthesizer::accumulate;

use serde::{Deserialize, Serialize};
use std::borrow::Cow;
use std::fmt;

// ─────────────────────────────────────────────────────────────
// 参数与配置
// ─────────────────────────────────────────────────────────────

/// 各参数组的边界
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ParameterBounds {
    pub scale: (f64, f64),
    pub u: (f64, f64),
    pub v: (f64, f64),
    pub w: (f64, f64),
    pub eta: (f64, f64),
    pub zero_shift: (f64, f64),
    /// 晶胞长度相对精修起点的允许偏离比例
    pub cell_fraction: f64,
    /// 逐峰强度乘子
    pub intensity_multiplier: (f64, f64),
}

impl Default for ParameterBounds {
    fn default() -> Self {
        ParameterBounds {
            scale: (0.01, 10.0),
            u: (0.0, 1.0),
            v: (-0.1, 0.1),
            w: (0.001, 1.0),
            eta: (0.0, 1.0),
            zero_shift: (-0.5, 0.5),
            cell_fraction: 0.05,
            intensity_multiplier: (0.1, 10.0),
        }
    }
}

/// 可精修的参数组
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RefinementFlags {
    pub cell: bool,
    pub profile: bool,
    pub scale: bool,
    pub zero_shift: bool,
    /// 逐峰强度乘子，默认关闭
    pub intensities: bool,
}

impl Default for RefinementFlags {
    fn default() -> Self {
        RefinementFlags {
            cell: true,
            profile: true,
            scale: true,
            zero_shift: true,
            intensities: false,
        }
    }
}

/// 单个物相的精修参数
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RefinementParameters {
    pub scale_factor: f64,
    pub caglioti: CagliotiParams,
    pub eta: f64,
    pub zero_shift: f64,
    pub cell: UnitCell,
    pub flags: RefinementFlags,
    /// 逐峰强度乘子，与峰集合等长；为空表示全为 1
    pub intensity_multipliers: Vec<f64>,
}

impl Default for RefinementParameters {
    fn default() -> Self {
        RefinementParameters {
            scale_factor: 1.0,
            caglioti: CagliotiParams::new(0.01, -0.001, 0.01),
            eta: 0.5,
            zero_shift: 0.0,
            cell: UnitCell::default(),
            flags: RefinementFlags::default(),
            intensity_multipliers: Vec::new(),
        }
    }
}

impl RefinementParameters {
    /// 以物相自身晶胞为起点的缺省参数
    pub fn for_phase(phase: &CandidatePhase) -> Self {
        RefinementParameters {
            cell: phase.cell,
            ..Default::default()
        }
    }

    /// 按重叠 2θ 范围内的强度比估计初始标度
    ///
    /// scale = 0.8 × 实验最大值 / 理论最大值；无重叠或理论强度为零时为 1.0。
    pub fn estimated_for(pattern: &ExperimentalPattern, phase: &CandidatePhase) -> Self {
        RefinementParameters {
            scale_factor: estimate_scale(pattern, &phase.peaks),
            ..Self::for_phase(phase)
        }
    }

    pub fn with_scale(mut self, scale_factor: f64) -> Self {
        self.scale_factor = scale_factor;
        self
    }

    pub fn with_flags(mut self, flags: RefinementFlags) -> Self {
        self.flags = flags;
        self
    }
}

fn estimate_scale(pattern: &ExperimentalPattern, peaks: &TheoreticalPeakSet) -> f64 {
    let (exp_min, exp_max) = match pattern.range() {
        Some(r) => r,
        None => return 1.0,
    };
    let theo_min = peaks.two_theta.iter().copied().fold(f64::INFINITY, f64::min);
    let theo_max = peaks.two_theta.iter().copied().fold(f64::NEG_INFINITY, f64::max);

    let lo = exp_min.max(theo_min);
    let hi = exp_max.min(theo_max);
    if !(lo < hi) {
        return 1.0;
    }

    let observed_max = pattern
        .two_theta
        .iter()
        .zip(&pattern.intensity)
        .filter(|(x, _)| **x >= lo && **x <= hi)
        .map(|(_, y)| *y)
        .fold(f64::NEG_INFINITY, f64::max);
    let theoretical_max = peaks
        .iter()
        .filter(|(x, _)| *x >= lo && *x <= hi)
        .map(|(_, y)| y)
        .fold(f64::NEG_INFINITY, f64::max);

    if theoretical_max > 0.0 && observed_max.is_finite() {
        0.8 * observed_max / theoretical_max
    } else {
        1.0
    }
}

/// 参与精修的物相
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RefinementPhase {
    pub phase: CandidatePhase,
    pub parameters: RefinementParameters,
}

impl RefinementPhase {
    pub fn new(phase: CandidatePhase, parameters: RefinementParameters) -> Self {
        RefinementPhase { phase, parameters }
    }

    /// 以估计标度为起点
    pub fn estimated(pattern: &ExperimentalPattern, phase: CandidatePhase) -> Self {
        let parameters = RefinementParameters::estimated_for(pattern, &phase);
        RefinementPhase { phase, parameters }
    }
}

/// 精修配置
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RefinementConfig {
    /// 最大循环数
    pub max_cycles: usize,
    /// |ΔRwp| 收敛阈值（百分数单位）
    pub convergence_threshold: f64,
    pub bounds: ParameterBounds,
    pub optimizer: OptimizerConfig,
    /// 只在 min ≤ 2θ ≤ max 上精修
    pub two_theta_range: Option<(f64, f64)>,
    /// 精修前将观测强度缩放到最大值 100
    pub normalize: bool,
    /// 分阶段精修，默认关闭
    pub staged: bool,
    /// 子拟合未报告收敛时一律保留循环前参数
    pub strict_convergence: bool,
}

impl Default for RefinementConfig {
    fn default() -> Self {
        RefinementConfig {
            max_cycles: 20,
            convergence_threshold: 1e-5,
            bounds: ParameterBounds::default(),
            optimizer: OptimizerConfig::default(),
            two_theta_range: None,
            normalize: false,
            staged: false,
            strict_convergence: false,
        }
    }
}

// ─────────────────────────────────────────────────────────────
// 结果
// ─────────────────────────────────────────────────────────────

/// 精修阶段
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RefinementStage {
    /// 非分阶段精修
    Full,
    /// 第一阶段：峰形冻结
    ProfileFrozen,
    /// 第二阶段：全部放开
    ProfileFree,
}

impl fmt::Display for RefinementStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RefinementStage::Full => write!(f, "full"),
            RefinementStage::ProfileFrozen => write!(f, "stage 1"),
            RefinementStage::ProfileFree => write!(f, "stage 2"),
        }
    }
}

/// 单相贡献
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PhaseContribution {
    pub phase_id: String,
    /// 占总计算强度的百分比
    pub contribution_percent: f64,
    /// 仅用该相计算的 Rwp（%）
    pub rwp: f64,
}

/// 一个精修循环的记录
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CycleRecord {
    /// 循环序号（从 1 开始）
    pub cycle: usize,
    pub stage: RefinementStage,
    /// 各物相参数快照
    pub parameters: Vec<RefinementParameters>,
    pub statistics: AgreementStatistics,
    /// 计算图谱
    pub calculated: Vec<f64>,
    pub contributions: Vec<PhaseContribution>,
    /// 本循环被恢复的数值失败
    pub warnings: Vec<String>,
}

/// 精修后的物相
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RefinedPhase {
    pub phase: CandidatePhase,
    pub parameters: RefinementParameters,
    /// 精修结束时使用的峰集合
    pub peaks: TheoreticalPeakSet,
    /// 供检索模块排序的优先级
    pub search_priority: f64,
}

/// 精修结果
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RefinementOutcome {
    pub success: bool,
    pub converged: bool,
    /// 最终 R 因子（失败时为 None）
    pub statistics: Option<AgreementStatistics>,
    pub history: Vec<CycleRecord>,
    pub phases: Vec<RefinedPhase>,
    /// 实际参与精修的 2θ 网格
    pub two_theta: Vec<f64>,
    /// 实际参与精修的观测强度
    pub observed: Vec<f64>,
    /// 最终计算图谱
    pub calculated: Vec<f64>,
    /// 各物相的最终计算图谱
    pub phase_patterns: Vec<Vec<f64>>,
    pub error_message: Option<String>,
}

impl RefinementOutcome {
    /// 失败结果
    pub fn failed(message: impl Into<String>) -> Self {
        RefinementOutcome {
            success: false,
            converged: false,
            statistics: None,
            history: Vec::new(),
            phases: Vec::new(),
            two_theta: Vec::new(),
            observed: Vec::new(),
            calculated: Vec::new(),
            phase_patterns: Vec::new(),
            error_message: Some(message.into()),
        }
    }

    /// 已执行的循环数
    pub fn cycles(&self) -> usize {
        self.history.len()
    }

    /// 差值曲线 obs − calc
    pub fn difference(&self) -> Vec<f64> {
        self.observed
            .iter()
            .zip(&self.calculated)
            .map(|(o, c)| o - c)
            .collect()
    }
}

/// 搜索优先级 = 标度 · (100 / max(Rwp, 1)) · (1 / max(GoF, 1))
pub fn search_priority(scale_factor: f64, statistics: &AgreementStatistics) -> f64 {
    scale_factor * (100.0 / statistics.rwp.max(1.0)) * (1.0 / statistics.gof.max(1.0))
}

// ─────────────────────────────────────────────────────────────
// 参数向量
// ─────────────────────────────────────────────────────────────

/// 参数向量中的一个分量
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Slot {
    Scale,
    U,
    V,
    W,
    Eta,
    ZeroShift,
    CellA,
    CellB,
    CellC,
    /// 第 i 个峰的强度乘子
    Intensity(usize),
}

/// 参与拟合的分量；`profile_enabled` 为假时峰形与强度乘子都冻结
fn layout(flags: &RefinementFlags, profile_enabled: bool, n_peaks: usize) -> Vec<Slot> {
    let mut slots = Vec::with_capacity(9 + n_peaks);
    if flags.scale {
        slots.push(Slot::Scale);
    }
    if flags.profile && profile_enabled {
        slots.extend([Slot::U, Slot::V, Slot::W, Slot::Eta]);
    }
    if flags.zero_shift {
        slots.push(Slot::ZeroShift);
    }
    if flags.cell {
        slots.extend([Slot::CellA, Slot::CellB, Slot::CellC]);
    }
    if flags.intensities && profile_enabled {
        slots.extend((0..n_peaks).map(Slot::Intensity));
    }
    slots
}

fn pack(params: &RefinementParameters, slots: &[Slot]) -> Vec<f64> {
    slots
        .iter()
        .map(|slot| match slot {
            Slot::Scale => params.scale_factor,
            Slot::U => params.caglioti.u,
            Slot::V => params.caglioti.v,
            Slot::W => params.caglioti.w,
            Slot::Eta => params.eta,
            Slot::ZeroShift => params.zero_shift,
            Slot::CellA => params.cell.a,
            Slot::CellB => params.cell.b,
            Slot::CellC => params.cell.c,
            Slot::Intensity(i) => params.intensity_multipliers.get(*i).copied().unwrap_or(1.0),
        })
        .collect()
}

fn unpack(params: &mut RefinementParameters, slots: &[Slot], values: &[f64]) {
    for (slot, &value) in slots.iter().zip(values) {
        match slot {
            Slot::Scale => params.scale_factor = value,
            Slot::U => params.caglioti.u = value,
            Slot::V => params.caglioti.v = value,
            Slot::W => params.caglioti.w = value,
            Slot::Eta => params.eta = value,
            Slot::ZeroShift => params.zero_shift = value,
            Slot::CellA => params.cell.a = value,
            Slot::CellB => params.cell.b = value,
            Slot::CellC => params.cell.c = value,
            Slot::Intensity(i) => {
                if let Some(m) = params.intensity_multipliers.get_mut(*i) {
                    *m = value;
                }
            }
        }
    }
}

fn slot_bounds(slots: &[Slot], bounds: &ParameterBounds, start_cell: &UnitCell) -> Vec<(f64, f64)> {
    let around = |x: f64| {
        let d = (x * bounds.cell_fraction).abs();
        (x - d, x + d)
    };
    slots
        .iter()
        .map(|slot| match slot {
            Slot::Scale => bounds.scale,
            Slot::U => bounds.u,
            Slot::V => bounds.v,
            Slot::W => bounds.w,
            Slot::Eta => bounds.eta,
            Slot::ZeroShift => bounds.zero_shift,
            Slot::CellA => around(start_cell.a),
            Slot::CellB => around(start_cell.b),
            Slot::CellC => around(start_cell.c),
            Slot::Intensity(_) => bounds.intensity_multiplier,
        })
        .collect()
}

// ─────────────────────────────────────────────────────────────
// 目标函数
// ─────────────────────────────────────────────────────────────

/// 乘上逐峰强度乘子后的峰集合
fn weighted_peaks<'a>(
    peaks: &'a TheoreticalPeakSet,
    params: &RefinementParameters,
) -> Cow<'a, TheoreticalPeakSet> {
    if params.intensity_multipliers.is_empty() {
        return Cow::Borrowed(peaks);
    }
    let mut weighted = peaks.clone();
    for (y, m) in weighted.intensity.iter_mut().zip(&params.intensity_multipliers) {
        *y *= m;
    }
    Cow::Owned(weighted)
}

fn accumulate_phase(
    curve: &mut [f64],
    grid: &[f64],
    peaks: &TheoreticalPeakSet,
    params: &RefinementParameters,
) {
    let peaks = weighted_peaks(peaks, params);
    accumulate(
        curve,
        grid,
        &peaks,
        &params.caglioti,
        params.scale_factor,
        params.zero_shift,
        params.eta,
    );
}

fn phase_pattern(grid: &[f64], peaks: &TheoreticalPeakSet, params: &RefinementParameters) -> Vec<f64> {
    let mut curve = vec![0.0; grid.len()];
    accumulate_phase(&mut curve, grid, peaks, params);
    curve
}

/// 固定其余物相后单相的加权残差平方和
struct PhaseObjective<'a> {
    grid: &'a [f64],
    observed: &'a [f64],
    sigma: &'a [f64],
    others: &'a [f64],
    peaks: &'a TheoreticalPeakSet,
    base: RefinementParameters,
    slots: &'a [Slot],
}

impl ObjectiveFunction for PhaseObjective<'_> {
    fn eval(&self, values: &[f64]) -> f64 {
        let mut params = self.base.clone();
        unpack(&mut params, self.slots, values);

        let mut calc = self.others.to_vec();
        accumulate_phase(&mut calc, self.grid, self.peaks, &params);

        self.observed
            .iter()
            .zip(&calc)
            .zip(self.sigma)
            .map(|((o, c), s)| ((o - c) / s).powi(2))
            .sum()
    }
}

// ─────────────────────────────────────────────────────────────
// 控制器
// ─────────────────────────────────────────────────────────────

/// 精修中的物相状态
struct ActivePhase {
    phase: CandidatePhase,
    params: RefinementParameters,
    start_cell: UnitCell,
    peaks: TheoreticalPeakSet,
}

/// Le Bail 精修控制器
#[derive(Debug, Clone, Default)]
pub struct LeBailRefinement {
    config: RefinementConfig,
}

impl LeBailRefinement {
    pub fn new(config: RefinementConfig) -> Self {
        LeBailRefinement { config }
    }

    pub fn config(&self) -> &RefinementConfig {
        &self.config
    }

    /// 精修
    ///
    /// 仅在输入不合法时返回 `InvalidInput`；数值失败在循环内部恢复。
    pub fn refine(
        &self,
        pattern: &ExperimentalPattern,
        phases: &[RefinementPhase],
    ) -> Result<RefinementOutcome> {
        pattern.validate()?;
        if phases.is_empty() {
            return Err(PhaseMatchError::InvalidInput(
                "no phases given for refinement".to_string(),
            ));
        }
        for p in phases {
            p.phase.peaks.validate()?;
        }

        let normalized;
        let pattern = if self.config.normalize {
            normalized = pattern.normalized(100.0);
            &normalized
        } else {
            pattern
        };
        let prepared = match self.config.two_theta_range {
            Some((min, max)) => pattern.window(min, max)?,
            None => pattern.clone(),
        };

        let grid = &prepared.two_theta;
        let observed = &prepared.intensity;
        let sigma = prepared.sigma();

        let mut active = Vec::with_capacity(phases.len());
        for p in phases {
            let mut params = p.parameters.clone();
            let n_peaks = p.phase.peaks.len();
            if params.intensity_multipliers.is_empty() && params.flags.intensities {
                params.intensity_multipliers = vec![1.0; n_peaks];
            } else if !params.intensity_multipliers.is_empty()
                && params.intensity_multipliers.len() != n_peaks
            {
                return Err(PhaseMatchError::InvalidInput(format!(
                    "{}: {} intensity multipliers for {} peaks",
                    p.phase.display_name(),
                    params.intensity_multipliers.len(),
                    n_peaks
                )));
            }
            active.push(ActivePhase {
                phase: p.phase.clone(),
                start_cell: params.cell,
                params,
                peaks: p.phase.peaks.clone(),
            });
        }

        tracing::info!(
            "Le Bail refinement of {} phase(s) on {} points ({} cycles max)",
            active.len(),
            grid.len(),
            self.config.max_cycles
        );

        let stage_one_cycles = if self.config.staged {
            (self.config.max_cycles / 3).max(3).min(self.config.max_cycles)
        } else {
            0
        };

        let mut history = Vec::new();
        let mut previous_rwp = f64::INFINITY;
        let mut converged = false;

        for cycle in 0..self.config.max_cycles {
            let stage = if !self.config.staged {
                RefinementStage::Full
            } else if cycle < stage_one_cycles {
                RefinementStage::ProfileFrozen
            } else {
                RefinementStage::ProfileFree
            };
            let profile_enabled = stage != RefinementStage::ProfileFrozen;

            let mut warnings = Vec::new();
            for index in 0..active.len() {
                if let Err(e) =
                    self.refine_phase(&mut active, index, grid, observed, &sigma, profile_enabled)
                {
                    let message = format!("{}: {}", active[index].phase.display_name(), e);
                    tracing::warn!("Cycle {}: {}", cycle + 1, message);
                    warnings.push(message);
                }

                let current = &mut active[index];
                if current.params.flags.cell {
                    let shifted: Vec<f64> = current
                        .phase
                        .peaks
                        .two_theta
                        .iter()
                        .map(|x| x + current.params.zero_shift)
                        .collect();
                    current.peaks = current.phase.peaks.with_positions(shifted);
                }
            }

            let patterns: Vec<Vec<f64>> = active
                .iter()
                .map(|p| phase_pattern(grid, &p.peaks, &p.params))
                .collect();
            let calculated = sum_patterns(&patterns, grid.len());
            // 自由度只计本循环实际参与拟合的分量
            let n_params: usize = active
                .iter()
                .map(|p| layout(&p.params.flags, profile_enabled, p.peaks.len()).len())
                .sum();
            let statistics = AgreementStatistics::compute(observed, &calculated, &sigma, n_params);
            let contributions = contributions(&active, &patterns, &calculated, observed, &sigma);

            tracing::debug!(
                "Cycle {} ({}): Rp={:.3} Rwp={:.3} GoF={:.3}",
                cycle + 1,
                stage,
                statistics.rp,
                statistics.rwp,
                statistics.gof
            );

            history.push(CycleRecord {
                cycle: cycle + 1,
                stage,
                parameters: active.iter().map(|p| p.params.clone()).collect(),
                statistics,
                calculated,
                contributions,
                warnings,
            });

            if stage != RefinementStage::ProfileFrozen {
                if (previous_rwp - statistics.rwp).abs() < self.config.convergence_threshold {
                    converged = true;
                    tracing::info!("Converged after {} cycles", cycle + 1);
                    break;
                }
                previous_rwp = statistics.rwp;
            }
        }

        let phase_patterns: Vec<Vec<f64>> = active
            .iter()
            .map(|p| phase_pattern(grid, &p.peaks, &p.params))
            .collect();
        let calculated = sum_patterns(&phase_patterns, grid.len());
        let statistics = match history.last() {
            Some(record) => record.statistics,
            None => {
                let n_params: usize = active
                    .iter()
                    .map(|p| layout(&p.params.flags, true, p.peaks.len()).len())
                    .sum();
                AgreementStatistics::compute(observed, &calculated, &sigma, n_params)
            }
        };

        let refined = active
            .into_iter()
            .map(|p| RefinedPhase {
                search_priority: search_priority(p.params.scale_factor, &statistics),
                phase: p.phase,
                parameters: p.params,
                peaks: p.peaks,
            })
            .collect();

        tracing::info!(
            "Refinement finished after {} cycles: Rwp={:.3}%, converged={}",
            history.len(),
            statistics.rwp,
            converged
        );

        Ok(RefinementOutcome {
            success: true,
            converged,
            statistics: Some(statistics),
            history,
            phases: refined,
            two_theta: prepared.two_theta.clone(),
            observed: prepared.intensity.clone(),
            calculated,
            phase_patterns,
            error_message: None,
        })
    }

    /// 拟合单个物相；失败时参数保持不变
    fn refine_phase(
        &self,
        active: &mut [ActivePhase],
        index: usize,
        grid: &[f64],
        observed: &[f64],
        sigma: &[f64],
        profile_enabled: bool,
    ) -> Result<()> {
        let mut others = vec![0.0; grid.len()];
        for (j, other) in active.iter().enumerate() {
            if j != index {
                accumulate_phase(&mut others, grid, &other.peaks, &other.params);
            }
        }

        let current = &active[index];
        let slots = layout(&current.params.flags, profile_enabled, current.peaks.len());
        if slots.is_empty() {
            return Ok(());
        }
        let bounds = slot_bounds(&slots, &self.config.bounds, &current.start_cell);
        let initial = pack(&current.params, &slots);

        let objective = PhaseObjective {
            grid,
            observed,
            sigma,
            others: &others,
            peaks: &current.peaks,
            base: current.params.clone(),
            slots: &slots,
        };
        let initial_cost = objective.eval(&initial);

        let result = LbfgsbOptimizer::new(self.config.optimizer).minimize(&objective, &initial, &bounds)?;

        if !result.fval.is_finite() || result.fval > initial_cost {
            return Err(PhaseMatchError::numeric(
                "phase fit",
                format!(
                    "objective did not improve ({:.4e} -> {:.4e})",
                    initial_cost, result.fval
                ),
            ));
        }
        if !result.converged && self.config.strict_convergence {
            return Err(PhaseMatchError::numeric(
                "phase fit",
                format!("did not converge: {}", result.message),
            ));
        }
        if !result.converged {
            tracing::debug!(
                "{}: fit stopped without convergence ({}), keeping improved parameters",
                current.phase.display_name(),
                result.message
            );
        }

        let mut params = current.params.clone();
        unpack(&mut params, &slots, &result.parameters);
        active[index].params = params;
        Ok(())
    }
}

fn sum_patterns(patterns: &[Vec<f64>], len: usize) -> Vec<f64> {
    let mut total = vec![0.0; len];
    for pattern in patterns {
        for (t, y) in total.iter_mut().zip(pattern) {
            *t += y;
        }
    }
    total
}

fn contributions(
    active: &[ActivePhase],
    patterns: &[Vec<f64>],
    calculated: &[f64],
    observed: &[f64],
    sigma: &[f64],
) -> Vec<PhaseContribution> {
    let total: f64 = calculated.iter().sum();
    active
        .iter()
        .zip(patterns)
        .map(|(p, pattern)| {
            let own: f64 = pattern.iter().sum();
            PhaseContribution {
                phase_id: p.phase.id.clone(),
                contribution_percent: if total > 0.0 { own / total * 100.0 } else { 0.0 },
                rwp: AgreementStatistics::weighted_profile(observed, pattern, sigma),
            }
        })
        .collect()
}

/// 运行 Le Bail 精修
///
/// 任何错误都折叠为 `success == false` 的结果，不向调用方抛出。
pub fn run_le_bail_refinement(
    pattern: &ExperimentalPattern,
    phases: &[RefinementPhase],
    config: &RefinementConfig,
) -> RefinementOutcome {
    match LeBailRefinement::new(*config).refine(pattern, phases) {
        Ok(outcome) => outcome,
        Err(e) => {
            tracing::warn!("Refinement failed: {}", e);
            RefinementOutcome::failed(e.to_string())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::xrd::synthesizer::{synthesize, uniform_grid};
    use approx::assert_relative_eq;

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

    fn pattern_of(phase: &CandidatePhase, params: &RefinementParameters) -> ExperimentalPattern {
        let grid = uniform_grid(15.0, 55.0, 0.02);
        let intensity = synthesize(
            &grid,
            &phase.peaks,
            &params.caglioti,
            params.scale_factor,
            params.zero_shift,
            params.eta,
        );
        ExperimentalPattern::new("synthetic", grid, intensity).unwrap()
    }

    #[test]
    fn test_single_cycle_gives_one_history_entry() {
        let q = quartz();
        let truth = RefinementParameters::for_phase(&q).with_scale(2.0);
        let pattern = pattern_of(&q, &truth);
        let phases = vec![RefinementPhase::new(
            q.clone(),
            RefinementParameters::for_phase(&q).with_scale(1.5),
        )];
        let config = RefinementConfig {
            max_cycles: 1,
            ..Default::default()
        };

        let outcome = run_le_bail_refinement(&pattern, &phases, &config);

        assert!(outcome.success);
        assert_eq!(outcome.history.len(), 1);
        let stats = outcome.statistics.unwrap();
        assert!(stats.rwp.is_finite());
        assert_eq!(outcome.history[0].parameters.len(), 1);
        assert_eq!(outcome.history[0].calculated.len(), pattern.len());
    }

    #[test]
    fn test_zero_cycles() {
        let q = quartz();
        let pattern = pattern_of(&q, &RefinementParameters::for_phase(&q));
        let phases = vec![RefinementPhase::new(q.clone(), RefinementParameters::for_phase(&q))];
        let config = RefinementConfig {
            max_cycles: 0,
            ..Default::default()
        };

        let outcome = run_le_bail_refinement(&pattern, &phases, &config);

        assert!(outcome.success);
        assert!(outcome.history.is_empty());
        assert!(!outcome.converged);
        assert_eq!(outcome.phases.len(), 1);
    }

    #[test]
    fn test_scale_recovered() {
        let q = quartz();
        let truth = RefinementParameters::for_phase(&q).with_scale(2.0);
        let pattern = pattern_of(&q, &truth);
        let flags = RefinementFlags {
            cell: false,
            profile: false,
            scale: true,
            zero_shift: false,
            intensities: false,
        };
        let phases = vec![RefinementPhase::new(
            q.clone(),
            RefinementParameters::for_phase(&q)
                .with_scale(1.2)
                .with_flags(flags),
        )];

        let outcome = run_le_bail_refinement(&pattern, &phases, &RefinementConfig::default());

        assert!(outcome.success);
        assert_relative_eq!(outcome.phases[0].parameters.scale_factor, 2.0, epsilon = 1e-2);
        assert!(outcome.statistics.unwrap().rwp < 1.0);
        assert!(outcome.phases[0].search_priority > 0.0);
    }

    #[test]
    fn test_rwp_does_not_increase() {
        let q = quartz();
        let truth = RefinementParameters {
            scale_factor: 1.5,
            caglioti: CagliotiParams::new(0.02, -0.002, 0.015),
            eta: 0.4,
            ..RefinementParameters::for_phase(&q)
        };
        let pattern = pattern_of(&q, &truth);
        let phases = vec![RefinementPhase::new(q.clone(), RefinementParameters::for_phase(&q))];
        let initial = AgreementStatistics::compute(
            &pattern.intensity,
            &phase_pattern(&pattern.two_theta, &q.peaks, &phases[0].parameters),
            &pattern.sigma(),
            0,
        );
        let config = RefinementConfig {
            max_cycles: 3,
            ..Default::default()
        };

        let outcome = run_le_bail_refinement(&pattern, &phases, &config);

        assert!(outcome.success);
        let first = outcome.history[0].statistics.rwp;
        assert!(first <= initial.rwp + 1e-9);
    }

    #[test]
    fn test_cell_stays_within_bounds() {
        let q = quartz();
        let pattern = pattern_of(&q, &RefinementParameters::for_phase(&q).with_scale(1.3));
        let phases = vec![RefinementPhase::new(q.clone(), RefinementParameters::for_phase(&q))];
        let config = RefinementConfig {
            max_cycles: 2,
            ..Default::default()
        };

        let outcome = run_le_bail_refinement(&pattern, &phases, &config);

        let cell = outcome.phases[0].parameters.cell;
        for (refined, start) in cell.lengths().iter().zip(q.cell.lengths()) {
            assert!((refined - start).abs() <= 0.05 * start + 1e-12);
        }
    }

    #[test]
    fn test_two_phase_contributions() {
        let q = quartz();
        let c = CandidatePhase::new(
            "calcite",
            "Calcite",
            "CaCO3",
            UnitCell::new(4.99, 4.99, 17.06, 90.0, 90.0, 120.0),
            TheoreticalPeakSet::new(vec![23.1, 29.4, 39.4, 43.2], vec![8.0, 100.0, 18.0, 15.0])
                .unwrap(),
        );
        let base = RefinementParameters::for_phase(&q);
        let grid = uniform_grid(15.0, 55.0, 0.02);
        let mut intensity = synthesize(&grid, &q.peaks, &base.caglioti, 1.0, 0.0, base.eta);
        for (y, v) in intensity
            .iter_mut()
            .zip(synthesize(&grid, &c.peaks, &base.caglioti, 1.0, 0.0, base.eta))
        {
            *y += v;
        }
        let pattern = ExperimentalPattern::new("mix", grid, intensity).unwrap();
        let phases = vec![
            RefinementPhase::new(q.clone(), RefinementParameters::for_phase(&q)),
            RefinementPhase::new(c.clone(), RefinementParameters::for_phase(&c)),
        ];
        let config = RefinementConfig {
            max_cycles: 1,
            ..Default::default()
        };

        let outcome = run_le_bail_refinement(&pattern, &phases, &config);

        let record = &outcome.history[0];
        assert_eq!(record.contributions.len(), 2);
        let total: f64 = record.contributions.iter().map(|c| c.contribution_percent).sum();
        assert_relative_eq!(total, 100.0, epsilon = 1e-6);
        assert_eq!(outcome.phase_patterns.len(), 2);
    }

    #[test]
    fn test_staged_refinement_freezes_profile() {
        let q = quartz();
        let pattern = pattern_of(&q, &RefinementParameters::for_phase(&q).with_scale(1.1));
        let start = RefinementParameters::for_phase(&q);
        let phases = vec![RefinementPhase::new(q.clone(), start.clone())];
        let config = RefinementConfig {
            max_cycles: 4,
            staged: true,
            convergence_threshold: 0.0,
            ..Default::default()
        };

        let outcome = run_le_bail_refinement(&pattern, &phases, &config);

        assert_eq!(outcome.history.len(), 4);
        for record in &outcome.history[..3] {
            assert_eq!(record.stage, RefinementStage::ProfileFrozen);
            assert_eq!(record.parameters[0].caglioti, start.caglioti);
            assert_eq!(record.parameters[0].eta, start.eta);
        }
        assert_eq!(outcome.history[3].stage, RefinementStage::ProfileFree);
    }

    #[test]
    fn test_two_theta_window() {
        let q = quartz();
        let pattern = pattern_of(&q, &RefinementParameters::for_phase(&q));
        let phases = vec![RefinementPhase::new(q.clone(), RefinementParameters::for_phase(&q))];

        let config = RefinementConfig {
            max_cycles: 1,
            two_theta_range: Some((20.0, 30.0)),
            ..Default::default()
        };
        let outcome = run_le_bail_refinement(&pattern, &phases, &config);
        assert!(outcome.success);
        assert!(outcome.two_theta.iter().all(|x| *x >= 20.0 && *x <= 30.0));

        let empty = RefinementConfig {
            two_theta_range: Some((80.0, 90.0)),
            ..config
        };
        let outcome = run_le_bail_refinement(&pattern, &phases, &empty);
        assert!(!outcome.success);
        assert!(outcome.error_message.is_some());
    }

    #[test]
    fn test_normalization() {
        let q = quartz();
        let pattern = pattern_of(&q, &RefinementParameters::for_phase(&q).with_scale(7.0));
        let phases = vec![RefinementPhase::estimated(&pattern.normalized(100.0), q.clone())];
        let config = RefinementConfig {
            max_cycles: 1,
            normalize: true,
            ..Default::default()
        };
        let outcome = run_le_bail_refinement(&pattern, &phases, &config);
        let max = outcome.observed.iter().copied().fold(0.0, f64::max);
        assert_relative_eq!(max, 100.0, epsilon = 1e-9);
    }

    #[test]
    fn test_normalization_uses_full_pattern_maximum() {
        // 最强峰位于窗口之外
        let phase = CandidatePhase::new(
            "two",
            "Two",
            "",
            UnitCell::default(),
            TheoreticalPeakSet::new(vec![20.0, 40.0], vec![5.0, 50.0]).unwrap(),
        );
        let pattern = pattern_of(&phase, &RefinementParameters::for_phase(&phase));
        let phases = vec![RefinementPhase::new(phase.clone(), RefinementParameters::for_phase(&phase))];
        let config = RefinementConfig {
            max_cycles: 1,
            normalize: true,
            two_theta_range: Some((15.0, 30.0)),
            ..Default::default()
        };

        let outcome = run_le_bail_refinement(&pattern, &phases, &config);

        assert!(outcome.success);
        assert!(outcome.two_theta.iter().all(|x| *x <= 30.0));
        let max = outcome.observed.iter().copied().fold(0.0, f64::max);
        assert_relative_eq!(max, 10.0, epsilon = 1e-3);
    }

    #[test]
    fn test_failed_phase_fit_keeps_parameters() {
        let q = quartz();
        let pattern = pattern_of(&q, &RefinementParameters::for_phase(&q).with_scale(2.0));
        let start = RefinementParameters::for_phase(&q).with_scale(1.0);
        let phases = vec![RefinementPhase::new(q.clone(), start.clone())];
        let config = RefinementConfig {
            max_cycles: 1,
            strict_convergence: true,
            optimizer: OptimizerConfig {
                max_iter: 1,
                ..Default::default()
            },
            ..Default::default()
        };

        let outcome = run_le_bail_refinement(&pattern, &phases, &config);

        assert!(outcome.success);
        assert_eq!(outcome.history.len(), 1);
        assert!(!outcome.history[0].warnings.is_empty());
        assert!(outcome.history[0].warnings[0].starts_with("Quartz"));
        assert_eq!(outcome.history[0].parameters[0], start);
        assert_eq!(outcome.phases[0].parameters.scale_factor, 1.0);
    }

    #[test]
    fn test_intensity_multiplier_recovered() {
        let q = quartz();
        let mut altered = q.clone();
        altered.peaks.intensity[2] *= 2.0;
        let pattern = pattern_of(&altered, &RefinementParameters::for_phase(&q));
        let flags = RefinementFlags {
            cell: false,
            profile: false,
            scale: false,
            zero_shift: false,
            intensities: true,
        };
        let phases = vec![RefinementPhase::new(
            q.clone(),
            RefinementParameters::for_phase(&q).with_flags(flags),
        )];

        let outcome = run_le_bail_refinement(&pattern, &phases, &RefinementConfig::default());

        assert!(outcome.success);
        let multipliers = &outcome.phases[0].parameters.intensity_multipliers;
        assert_eq!(multipliers.len(), 4);
        assert_relative_eq!(multipliers[2], 2.0, epsilon = 1e-2);
        for i in [0, 1, 3] {
            assert_relative_eq!(multipliers[i], 1.0, epsilon = 1e-2);
        }
        assert!(outcome.statistics.unwrap().rwp < 1.0);
    }

    #[test]
    fn test_staged_refinement_freezes_intensities() {
        let q = quartz();
        let pattern = pattern_of(&q, &RefinementParameters::for_phase(&q).with_scale(1.5));
        let flags = RefinementFlags {
            intensities: true,
            ..Default::default()
        };
        let phases = vec![RefinementPhase::new(
            q.clone(),
            RefinementParameters::for_phase(&q).with_flags(flags),
        )];
        let config = RefinementConfig {
            max_cycles: 3,
            staged: true,
            ..Default::default()
        };

        let outcome = run_le_bail_refinement(&pattern, &phases, &config);

        assert_eq!(outcome.history.len(), 3);
        for record in &outcome.history {
            assert_eq!(record.stage, RefinementStage::ProfileFrozen);
            assert_eq!(record.parameters[0].intensity_multipliers, vec![1.0; 4]);
        }
    }

    #[test]
    fn test_multiplier_length_mismatch_fails() {
        let q = quartz();
        let pattern = pattern_of(&q, &RefinementParameters::for_phase(&q));
        let params = RefinementParameters {
            intensity_multipliers: vec![1.0, 1.0],
            ..RefinementParameters::for_phase(&q)
        };
        let phases = vec![RefinementPhase::new(q.clone(), params)];

        let outcome = run_le_bail_refinement(&pattern, &phases, &RefinementConfig::default());

        assert!(!outcome.success);
        assert!(outcome.error_message.unwrap().contains("intensity multipliers"));
    }

    #[test]
    fn test_goodness_of_fit_counts_refined_slots_only() {
        let q = quartz();
        let pattern = pattern_of(&q, &RefinementParameters::for_phase(&q).with_scale(2.0));
        let flags = RefinementFlags {
            cell: false,
            profile: false,
            scale: true,
            zero_shift: false,
            intensities: false,
        };
        let phases = vec![RefinementPhase::new(
            q.clone(),
            RefinementParameters::for_phase(&q).with_flags(flags),
        )];
        let config = RefinementConfig {
            max_cycles: 1,
            ..Default::default()
        };

        let outcome = run_le_bail_refinement(&pattern, &phases, &config);

        let record = &outcome.history[0];
        let expected =
            AgreementStatistics::compute(&outcome.observed, &record.calculated, &pattern.sigma(), 1);
        assert_relative_eq!(record.statistics.gof, expected.gof, epsilon = 1e-12);
        assert_relative_eq!(record.statistics.rexp, expected.rexp, epsilon = 1e-12);
    }

    #[test]
    fn test_default_config() {
        let config = RefinementConfig::default();
        assert_eq!(config.max_cycles, 20);
        assert!(!config.staged);
        assert!(!config.normalize);
        assert!(!RefinementFlags::default().intensities);
        assert_eq!(config.bounds.intensity_multiplier, (0.1, 10.0));
    }

    #[test]
    fn test_empty_phase_list_fails() {
        let q = quartz();
        let pattern = pattern_of(&q, &RefinementParameters::for_phase(&q));
        let outcome = run_le_bail_refinement(&pattern, &[], &RefinementConfig::default());
        assert!(!outcome.success);
        assert!(outcome.history.is_empty());
    }

    #[test]
    fn test_estimated_scale() {
        let q = quartz();
        let pattern = pattern_of(&q, &RefinementParameters::for_phase(&q).with_scale(3.0));
        let params = RefinementParameters::estimated_for(&pattern, &q);
        // 峰高 = 强度 × 标度
        assert_relative_eq!(params.scale_factor, 0.8 * 3.0, epsilon = 1e-3);

        let far = CandidatePhase::new(
            "far",
            "Far",
            "",
            UnitCell::default(),
            TheoreticalPeakSet::new(vec![80.0, 90.0], vec![10.0, 20.0]).unwrap(),
        );
        assert_eq!(RefinementParameters::estimated_for(&pattern, &far).scale_factor, 1.0);
    }

    #[test]
    fn test_search_priority() {
        let stats = AgreementStatistics {
            rp: 5.0,
            rwp: 10.0,
            rexp: 5.0,
            gof: 2.0,
            chi_squared: 4.0,
        };
        assert_relative_eq!(search_priority(2.0, &stats), 2.0 * 10.0 * 0.5);

        let good = AgreementStatistics {
            rwp: 0.5,
            gof: 0.5,
            ..stats
        };
        assert_relative_eq!(search_priority(1.0, &good), 100.0);
    }
}
