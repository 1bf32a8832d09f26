//! # 顺序分解
//!
//! 贪心地从残差中逐个识别并扣除最匹配的候选物相。
//!
//! ## 状态机
//! ```text
//! Idle → Selecting → Subtracting → (Selecting | Done)
//! ```
//! - `Selecting`: 对池中每个候选合成图谱并评分，取相关最高者；
//!   最高分不超过下限、残差已低于阈值、达到最大物相数或池为空时进入 `Done`
//! - `Subtracting`: 在 [0.01, 5] 上拟合扣除标度，目标为
//!   `Σmax(r − s·p, 0)² + 10·Σmax(s·p − r, 0)²`，
//!   随后 `r = max(r − s·p, 0)`，记录物相并将其移出候选池
//!
//! 残差在每次扣除后保持非负，且总和单调不增。
//!
//! ## 依赖关系
//! - 被 `analysis/pipeline.rs`, `commands/identify.rs` 调用
//! - 使用 `analysis/matcher.rs`, `analysis/optimizer.rs`, `xrd/synthesizer.rs`

use super::matcher::{score, MatchConfig, MatchScore};
use super::optimizer::minimize_scalar;
use crate::error::Result;
use crate::models::pattern::max_value;
use crate::models::{CandidatePhase, ExperimentalPattern};
use crate::xrd::profile::ProfileShape;
use crate::xrd::synthesizer::synthesize_with_shape;

use serde::{Deserialize, Serialize};
use std::fmt;

/// 分解配置
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DecompositionConfig {
    /// 最多识别的物相数
    pub max_phases: usize,
    /// 残差最大值低于 原始最大值 × 该比例 时停止
    pub residue_threshold: f64,
    /// 接受匹配所需的最低相关
    pub score_floor: f64,
    /// 过度扣除惩罚权重
    pub over_subtraction_penalty: f64,
    /// 扣除标度下限
    pub scale_min: f64,
    /// 扣除标度上限
    pub scale_max: f64,
    /// 候选合成使用的峰形
    pub profile: ProfileShape,
    /// 评分配置
    pub matching: MatchConfig,
}

impl Default for DecompositionConfig {
    fn default() -> Self {
        DecompositionConfig {
            max_phases: 5,
            residue_threshold: 0.05,
            score_floor: 0.1,
            over_subtraction_penalty: 10.0,
            scale_min: 0.01,
            scale_max: 5.0,
            profile: ProfileShape::default(),
            matching: MatchConfig::default(),
        }
    }
}

/// 单次会话独占的候选池
///
/// 分解过程中被识别的物相会从池中移除，因此并发会话各自持有一个实例。
#[derive(Debug, Clone, Default)]
pub struct CandidatePool {
    phases: Vec<CandidatePhase>,
}

impl CandidatePool {
    pub fn new(phases: Vec<CandidatePhase>) -> Self {
        CandidatePool { phases }
    }

    pub fn len(&self) -> usize {
        self.phases.len()
    }

    pub fn is_empty(&self) -> bool {
        self.phases.is_empty()
    }

    pub fn phases(&self) -> &[CandidatePhase] {
        &self.phases
    }

    /// 按 ID 移除
    pub fn remove(&mut self, id: &str) -> Option<CandidatePhase> {
        let index = self.phases.iter().position(|p| p.id == id)?;
        Some(self.phases.remove(index))
    }

    fn take(&mut self, index: usize) -> CandidatePhase {
        self.phases.remove(index)
    }
}

impl From<Vec<CandidatePhase>> for CandidatePool {
    fn from(phases: Vec<CandidatePhase>) -> Self {
        CandidatePool::new(phases)
    }
}

/// 分解终止原因
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum StopReason {
    /// 候选池为空
    EmptyPool,
    /// 达到最大物相数
    MaxPhasesReached,
    /// 残差已低于阈值
    ResidueBelowThreshold,
    /// 没有评分超过下限的候选
    NoAcceptableMatch,
    /// 实验图谱无正信号
    ZeroSignal,
}

impl fmt::Display for StopReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let text = match self {
            StopReason::EmptyPool => "candidate pool exhausted",
            StopReason::MaxPhasesReached => "maximum number of phases reached",
            StopReason::ResidueBelowThreshold => "residue below threshold",
            StopReason::NoAcceptableMatch => "no acceptable match",
            StopReason::ZeroSignal => "pattern has no signal",
        };
        write!(f, "{}", text)
    }
}

/// 选中待扣除的候选
#[derive(Debug, Clone)]
pub struct Selection {
    /// 在候选池中的位置
    pub index: usize,
    /// 评分
    pub score: MatchScore,
    /// 合成图谱（标度 1）
    pub pattern: Vec<f64>,
}

/// 分解状态
#[derive(Debug, Clone)]
pub enum DecompositionState {
    Idle,
    Selecting,
    Subtracting(Selection),
    Done(StopReason),
}

impl DecompositionState {
    pub fn is_done(&self) -> bool {
        matches!(self, DecompositionState::Done(_))
    }
}

/// 已识别物相记录
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IdentifiedPhase {
    pub phase: CandidatePhase,
    /// 选中时的相关系数
    pub match_score: f64,
    /// 评分阶段的归一标度
    pub initial_scaling: f64,
    /// 扣除阶段拟合的标度（相对合成图谱）
    pub optimized_scaling: f64,
    /// 第几次识别（从 1 开始）
    pub iteration: usize,
    /// 扣除前的残差
    pub residue_before: Vec<f64>,
    /// 本次扣除量（扣除前 − 扣除后）
    pub contribution: Vec<f64>,
}

impl IdentifiedPhase {
    /// 贡献总强度
    pub fn total_contribution(&self) -> f64 {
        self.contribution.iter().sum()
    }
}

/// 分解结果
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DecompositionResult {
    /// 2θ 网格
    pub two_theta: Vec<f64>,
    /// 原始强度
    pub observed: Vec<f64>,
    /// 按识别顺序排列的物相
    pub identified_phases: Vec<IdentifiedPhase>,
    /// 残差历史（首项为原始强度）
    pub residue_history: Vec<Vec<f64>>,
    /// 最终残差
    pub final_residue: Vec<f64>,
    /// 最终残差最大值 / 原始最大值
    pub residue_fraction: f64,
    pub stop_reason: StopReason,
}

impl DecompositionResult {
    /// 原始总强度中被已识别物相解释的比例
    pub fn explained_fraction(&self) -> f64 {
        let total: f64 = self.observed.iter().map(|y| y.max(0.0)).sum();
        if total <= 0.0 {
            return 0.0;
        }
        let explained: f64 = self
            .identified_phases
            .iter()
            .map(IdentifiedPhase::total_contribution)
            .sum();
        explained / total
    }
}

/// 顺序分解会话
pub struct SequentialDecomposition<'a> {
    pattern: &'a ExperimentalPattern,
    pool: &'a mut CandidatePool,
    config: DecompositionConfig,
    state: DecompositionState,
    residue: Vec<f64>,
    original_max: f64,
    identified: Vec<IdentifiedPhase>,
    residue_history: Vec<Vec<f64>>,
}

impl<'a> SequentialDecomposition<'a> {
    /// 创建会话；图谱不合法时返回 `InvalidInput`
    pub fn new(
        pattern: &'a ExperimentalPattern,
        pool: &'a mut CandidatePool,
        config: DecompositionConfig,
    ) -> Result<Self> {
        pattern.validate()?;

        // 负强度视为无信号
        let residue: Vec<f64> = pattern.intensity.iter().map(|y| y.max(0.0)).collect();
        let original_max = max_value(&residue);

        Ok(SequentialDecomposition {
            pattern,
            pool,
            config,
            state: DecompositionState::Idle,
            residue_history: vec![residue.clone()],
            residue,
            original_max,
            identified: Vec::new(),
        })
    }

    pub fn state(&self) -> &DecompositionState {
        &self.state
    }

    pub fn residue(&self) -> &[f64] {
        &self.residue
    }

    pub fn identified(&self) -> &[IdentifiedPhase] {
        &self.identified
    }

    /// 推进一步，返回新状态
    pub fn step(&mut self) -> &DecompositionState {
        let current = std::mem::replace(&mut self.state, DecompositionState::Idle);
        self.state = match current {
            DecompositionState::Idle => {
                tracing::info!(
                    "Decomposing '{}' with {} candidates",
                    self.pattern.name,
                    self.pool.len()
                );
                if self.original_max <= 0.0 {
                    DecompositionState::Done(StopReason::ZeroSignal)
                } else {
                    DecompositionState::Selecting
                }
            }
            DecompositionState::Selecting => self.select(),
            DecompositionState::Subtracting(selection) => {
                self.subtract(selection);
                DecompositionState::Selecting
            }
            DecompositionState::Done(reason) => DecompositionState::Done(reason),
        };
        &self.state
    }

    /// 运行到 `Done`
    pub fn run(mut self) -> DecompositionResult {
        while !self.state.is_done() {
            self.step();
        }
        self.into_result()
    }

    fn select(&mut self) -> DecompositionState {
        if self.identified.len() >= self.config.max_phases {
            return DecompositionState::Done(StopReason::MaxPhasesReached);
        }
        if self.pool.is_empty() {
            return DecompositionState::Done(StopReason::EmptyPool);
        }

        let residue_max = max_value(&self.residue);
        if residue_max < self.config.residue_threshold * self.original_max {
            tracing::debug!(
                "Residue fraction {:.3} below threshold {}",
                residue_max / self.original_max,
                self.config.residue_threshold
            );
            return DecompositionState::Done(StopReason::ResidueBelowThreshold);
        }

        let grid = &self.pattern.two_theta;
        let mut best: Option<Selection> = None;

        for (index, candidate) in self.pool.phases().iter().enumerate() {
            if candidate.peaks.is_empty() {
                continue;
            }
            let pattern = synthesize_with_shape(grid, &candidate.peaks, &self.config.profile, 1.0);
            let match_score = score(&self.residue, &pattern, &self.config.matching);

            let better = best
                .as_ref()
                .map_or(true, |b| match_score.correlation > b.score.correlation);
            if better {
                best = Some(Selection {
                    index,
                    score: match_score,
                    pattern,
                });
            }
        }

        match best {
            Some(selection) if selection.score.correlation > self.config.score_floor => {
                tracing::debug!(
                    "Selected {} (score {:.3}, scaling {:.3})",
                    self.pool.phases()[selection.index].display_name(),
                    selection.score.correlation,
                    selection.score.scaling
                );
                DecompositionState::Subtracting(selection)
            }
            other => {
                tracing::debug!(
                    "No acceptable match (best score {:.3})",
                    other.map_or(0.0, |s| s.score.correlation)
                );
                DecompositionState::Done(StopReason::NoAcceptableMatch)
            }
        }
    }

    fn subtract(&mut self, selection: Selection) {
        let penalty = self.config.over_subtraction_penalty;
        let residue = &self.residue;
        let pattern = &selection.pattern;

        let objective = |s: f64| {
            residue
                .iter()
                .zip(pattern.iter())
                .map(|(r, p)| {
                    let d = r - s * p;
                    if d >= 0.0 {
                        d * d
                    } else {
                        penalty * d * d
                    }
                })
                .sum::<f64>()
        };

        let scaling = match minimize_scalar(objective, self.config.scale_min, self.config.scale_max) {
            Ok((s, _)) => s,
            Err(e) => {
                tracing::warn!("Subtraction scale fit failed, using match scaling: {}", e);
                selection
                    .score
                    .scaling
                    .clamp(self.config.scale_min, self.config.scale_max)
            }
        };

        let before = self.residue.clone();
        for (r, p) in self.residue.iter_mut().zip(pattern.iter()) {
            *r = (*r - scaling * p).max(0.0);
        }
        let contribution: Vec<f64> = before
            .iter()
            .zip(self.residue.iter())
            .map(|(b, a)| b - a)
            .collect();

        let phase = self.pool.take(selection.index);
        tracing::debug!(
            "Subtracted {} (scaling {:.4}); residue max {:.1}",
            phase.display_name(),
            scaling,
            max_value(&self.residue)
        );

        self.identified.push(IdentifiedPhase {
            phase,
            match_score: selection.score.correlation,
            initial_scaling: selection.score.scaling,
            optimized_scaling: scaling,
            iteration: self.identified.len() + 1,
            residue_before: before,
            contribution,
        });
        self.residue_history.push(self.residue.clone());
    }

    fn into_result(self) -> DecompositionResult {
        let stop_reason = match self.state {
            DecompositionState::Done(reason) => reason,
            _ => StopReason::NoAcceptableMatch,
        };
        let residue_fraction = if self.original_max > 0.0 {
            max_value(&self.residue) / self.original_max
        } else {
            0.0
        };

        tracing::info!(
            "Decomposition finished: {} phase(s), residue fraction {:.3} ({})",
            self.identified.len(),
            residue_fraction,
            stop_reason
        );

        DecompositionResult {
            two_theta: self.pattern.two_theta.clone(),
            observed: self.pattern.intensity.clone(),
            identified_phases: self.identified,
            residue_history: self.residue_history,
            final_residue: self.residue,
            residue_fraction,
            stop_reason,
        }
    }
}

/// 对一条实验图谱运行顺序分解
///
/// 识别出的物相从 `pool` 中移除。
pub fn run_sequential_decomposition(
    pattern: &ExperimentalPattern,
    pool: &mut CandidatePool,
    config: &DecompositionConfig,
) -> Result<DecompositionResult> {
    Ok(SequentialDecomposition::new(pattern, pool, *config)?.run())
}
