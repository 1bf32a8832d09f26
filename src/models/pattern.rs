//! # 实验衍射图谱数据模型
//!
//! 有序的 (2θ, 强度, 可选不确定度) 三元组。引擎只读，不修改调用方的数据。
//!
//! ## 不变量
//! - 至少一个点
//! - 2θ 严格递增且有限
//! - 不确定度（若提供）与强度等长、非负
//!
//! ## 依赖关系
//! - 被 `xrd/`, `analysis/`, `parsers/pattern.rs` 使用
//! - 无外部模块依赖

use crate::error::{PhaseMatchError, Result};

use serde::{Deserialize, Serialize};

/// 实验衍射图谱
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExperimentalPattern {
    /// 图谱名称（通常为文件名）
    pub name: String,

    /// 衍射角 2θ（度），严格递增
    pub two_theta: Vec<f64>,

    /// 观测强度
    pub intensity: Vec<f64>,

    /// 可选：每点不确定度 σ
    pub uncertainty: Option<Vec<f64>>,
}

impl ExperimentalPattern {
    /// 从 2θ 与强度数组创建并校验
    pub fn new(name: impl Into<String>, two_theta: Vec<f64>, intensity: Vec<f64>) -> Result<Self> {
        let pattern = ExperimentalPattern {
            name: name.into(),
            two_theta,
            intensity,
            uncertainty: None,
        };
        pattern.validate()?;
        Ok(pattern)
    }

    /// 附加不确定度并重新校验
    pub fn with_uncertainty(mut self, uncertainty: Vec<f64>) -> Result<Self> {
        self.uncertainty = Some(uncertainty);
        self.validate()?;
        Ok(self)
    }

    /// 校验图谱不变量
    pub fn validate(&self) -> Result<()> {
        if self.two_theta.is_empty() {
            return Err(PhaseMatchError::InvalidInput(format!(
                "pattern '{}' is empty",
                self.name
            )));
        }

        if self.two_theta.len() != self.intensity.len() {
            return Err(PhaseMatchError::InvalidInput(format!(
                "pattern '{}': {} 2θ values but {} intensities",
                self.name,
                self.two_theta.len(),
                self.intensity.len()
            )));
        }

        if let Some(i) = self.two_theta.iter().position(|x| !x.is_finite()) {
            return Err(PhaseMatchError::InvalidInput(format!(
                "pattern '{}': non-finite 2θ at index {}",
                self.name, i
            )));
        }

        if let Some(i) = self.intensity.iter().position(|y| !y.is_finite()) {
            return Err(PhaseMatchError::InvalidInput(format!(
                "pattern '{}': non-finite intensity at index {}",
                self.name, i
            )));
        }

        if let Some(i) = self.two_theta.windows(2).position(|w| w[1] <= w[0]) {
            return Err(PhaseMatchError::InvalidInput(format!(
                "pattern '{}': 2θ not strictly increasing at index {} ({} -> {})",
                self.name,
                i + 1,
                self.two_theta[i],
                self.two_theta[i + 1]
            )));
        }

        if let Some(sigma) = &self.uncertainty {
            if sigma.len() != self.intensity.len() {
                return Err(PhaseMatchError::InvalidInput(format!(
                    "pattern '{}': {} uncertainties for {} points",
                    self.name,
                    sigma.len(),
                    self.intensity.len()
                )));
            }
            if let Some(i) = sigma.iter().position(|s| !s.is_finite() || *s < 0.0) {
                return Err(PhaseMatchError::InvalidInput(format!(
                    "pattern '{}': uncertainty must be finite and >= 0 (index {})",
                    self.name, i
                )));
            }
        }

        Ok(())
    }

    /// 点数
    pub fn len(&self) -> usize {
        self.two_theta.len()
    }

    /// 是否为空
    pub fn is_empty(&self) -> bool {
        self.two_theta.is_empty()
    }

    /// 最大观测强度（空图谱为 0）
    pub fn max_intensity(&self) -> f64 {
        max_value(&self.intensity)
    }

    /// 2θ 范围
    pub fn range(&self) -> Option<(f64, f64)> {
        Some((*self.two_theta.first()?, *self.two_theta.last()?))
    }

    /// 用于加权的 σ：优先使用给定值，否则 √max(I, 1)
    ///
    /// 给定 σ 中的 0 会被抬到 1，避免除零。
    pub fn sigma(&self) -> Vec<f64> {
        match &self.uncertainty {
            Some(sigma) => sigma.iter().map(|s| if *s > 0.0 { *s } else { 1.0 }).collect(),
            None => self.intensity.iter().map(|y| y.max(1.0).sqrt()).collect(),
        }
    }

    /// 缩放强度（及不确定度）使最大值为 `target`；无正信号时原样返回
    pub fn normalized(&self, target: f64) -> Self {
        let max = self.max_intensity();
        if max <= 0.0 {
            return self.clone();
        }
        let factor = target / max;
        ExperimentalPattern {
            name: self.name.clone(),
            two_theta: self.two_theta.clone(),
            intensity: self.intensity.iter().map(|y| y * factor).collect(),
            uncertainty: self
                .uncertainty
                .as_ref()
                .map(|s| s.iter().map(|v| v * factor).collect()),
        }
    }

    /// 截取 min ≤ 2θ ≤ max 的子图谱
    pub fn window(&self, min: f64, max: f64) -> Result<Self> {
        let keep: Vec<usize> = self
            .two_theta
            .iter()
            .enumerate()
            .filter(|(_, x)| **x >= min && **x <= max)
            .map(|(i, _)| i)
            .collect();

        if keep.is_empty() {
            return Err(PhaseMatchError::InvalidInput(format!(
                "2θ window {:.2}-{:.2} contains no points of '{}'",
                min, max, self.name
            )));
        }

        Ok(ExperimentalPattern {
            name: self.name.clone(),
            two_theta: keep.iter().map(|&i| self.two_theta[i]).collect(),
            intensity: keep.iter().map(|&i| self.intensity[i]).collect(),
            uncertainty: self
                .uncertainty
                .as_ref()
                .map(|s| keep.iter().map(|&i| s[i]).collect()),
        })
    }
}

/// 数组最大值（空数组为 0）
pub fn max_value(values: &[f64]) -> f64 {
    values.iter().copied().fold(f64::NEG_INFINITY, f64::max).max(0.0)
}
