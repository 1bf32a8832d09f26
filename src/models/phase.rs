//! # 候选物相数据模型
//!
//! 候选物相由外部检索模块提供：身份信息、晶胞参数与理论衍射峰集合。
//! 引擎从不原地修改候选物相。
//!
//! ## 依赖关系
//! - 被 `xrd/synthesizer.rs`, `analysis/` 使用
//! - 被 `parsers/candidates.rs` 反序列化
//! - 无外部模块依赖

use crate::error::{PhaseMatchError, Result};

use serde::{Deserialize, Serialize};

/// 晶胞参数（长度 Å，角度 度）
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct UnitCell {
    pub a: f64,
    pub b: f64,
    pub c: f64,
    #[serde(default = "right_angle")]
    pub alpha: f64,
    #[serde(default = "right_angle")]
    pub beta: f64,
    #[serde(default = "right_angle")]
    pub gamma: f64,
}

fn right_angle() -> f64 {
    90.0
}

impl Default for UnitCell {
    /// 缺省晶胞：10 Å 立方
    fn default() -> Self {
        UnitCell::new(10.0, 10.0, 10.0, 90.0, 90.0, 90.0)
    }
}

impl UnitCell {
    pub fn new(a: f64, b: f64, c: f64, alpha: f64, beta: f64, gamma: f64) -> Self {
        UnitCell {
            a,
            b,
            c,
            alpha,
            beta,
            gamma,
        }
    }

    /// 立方晶胞
    pub fn cubic(a: f64) -> Self {
        UnitCell::new(a, a, a, 90.0, 90.0, 90.0)
    }

    /// 晶胞体积
    ///
    /// V = abc·√(1 − cos²α − cos²β − cos²γ + 2·cosα·cosβ·cosγ)
    pub fn volume(&self) -> f64 {
        let ca = self.alpha.to_radians().cos();
        let cb = self.beta.to_radians().cos();
        let cg = self.gamma.to_radians().cos();
        let factor = 1.0 - ca * ca - cb * cb - cg * cg + 2.0 * ca * cb * cg;
        self.a * self.b * self.c * factor.max(0.0).sqrt()
    }

    /// 晶格长度 (a, b, c)
    pub fn lengths(&self) -> [f64; 3] {
        [self.a, self.b, self.c]
    }
}

/// 理论衍射峰集合（平行数组）
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TheoreticalPeakSet {
    /// 峰位 2θ（度，固定参考波长）
    pub two_theta: Vec<f64>,

    /// 峰强度
    pub intensity: Vec<f64>,

    /// 可选：Miller 指数 (h, k, l)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub hkl: Option<Vec<[i32; 3]>>,
}

impl TheoreticalPeakSet {
    /// 创建并校验峰集合
    pub fn new(two_theta: Vec<f64>, intensity: Vec<f64>) -> Result<Self> {
        let peaks = TheoreticalPeakSet {
            two_theta,
            intensity,
            hkl: None,
        };
        peaks.validate()?;
        Ok(peaks)
    }

    /// 附加 Miller 指数
    pub fn with_hkl(mut self, hkl: Vec<[i32; 3]>) -> Result<Self> {
        self.hkl = Some(hkl);
        self.validate()?;
        Ok(self)
    }

    /// 校验平行数组长度与数值有限性
    pub fn validate(&self) -> Result<()> {
        if self.two_theta.len() != self.intensity.len() {
            return Err(PhaseMatchError::InvalidInput(format!(
                "peak set has {} positions but {} intensities",
                self.two_theta.len(),
                self.intensity.len()
            )));
        }
        if let Some(hkl) = &self.hkl {
            if hkl.len() != self.two_theta.len() {
                return Err(PhaseMatchError::InvalidInput(format!(
                    "peak set has {} positions but {} Miller indices",
                    self.two_theta.len(),
                    hkl.len()
                )));
            }
        }
        if self
            .two_theta
            .iter()
            .chain(self.intensity.iter())
            .any(|v| !v.is_finite())
        {
            return Err(PhaseMatchError::InvalidInput(
                "peak set contains non-finite values".to_string(),
            ));
        }
        Ok(())
    }

    /// 峰数
    pub fn len(&self) -> usize {
        self.two_theta.len().min(self.intensity.len())
    }

    /// 是否没有峰
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// 遍历 (2θ, 强度)
    pub fn iter(&self) -> impl Iterator<Item = (f64, f64)> + '_ {
        self.two_theta
            .iter()
            .copied()
            .zip(self.intensity.iter().copied())
    }

    /// 最大峰强度（无峰为 0）
    pub fn max_intensity(&self) -> f64 {
        self.intensity.iter().copied().fold(0.0, f64::max)
    }

    /// 用新的峰位替换，强度与指数保持不变
    pub fn with_positions(&self, two_theta: Vec<f64>) -> Self {
        TheoreticalPeakSet {
            two_theta,
            intensity: self.intensity.clone(),
            hkl: self.hkl.clone(),
        }
    }
}

/// 候选物相
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CandidatePhase {
    /// 唯一标识（数据库 ID）
    pub id: String,

    /// 物相名称（矿物名）
    pub name: String,

    /// 化学式
    #[serde(default)]
    pub formula: String,

    /// 晶胞参数
    #[serde(default)]
    pub cell: UnitCell,

    /// 可选：空间群
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub space_group: Option<String>,

    /// 理论衍射峰
    #[serde(default)]
    pub peaks: TheoreticalPeakSet,
}

impl CandidatePhase {
    pub fn new(
        id: impl Into<String>,
        name: impl Into<String>,
        formula: impl Into<String>,
        cell: UnitCell,
        peaks: TheoreticalPeakSet,
    ) -> Self {
        CandidatePhase {
            id: id.into(),
            name: name.into(),
            formula: formula.into(),
            cell,
            space_group: None,
            peaks,
        }
    }

    pub fn with_space_group(mut self, space_group: impl Into<String>) -> Self {
        self.space_group = Some(space_group.into());
        self
    }

    /// 显示名：名称为空时退回到 ID
    pub fn display_name(&self) -> &str {
        if self.name.is_empty() {
            &self.id
        } else {
            &self.name
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn test_cubic_volume() {
        assert_relative_eq!(UnitCell::cubic(5.0).volume(), 125.0, epsilon = 1e-9);
    }

    #[test]
    fn test_hexagonal_volume() {
        // V = a²c·sin(120°)
        let cell = UnitCell::new(3.0, 3.0, 5.0, 90.0, 90.0, 120.0);
        let expected = 9.0 * 5.0 * 120.0_f64.to_radians().sin();
        assert_relative_eq!(cell.volume(), expected, epsilon = 1e-9);
    }

    #[test]
    fn test_peak_set_length_mismatch() {
        assert!(TheoreticalPeakSet::new(vec![10.0, 20.0], vec![1.0]).is_err());
        let peaks = TheoreticalPeakSet::new(vec![10.0, 20.0], vec![1.0, 2.0]).unwrap();
        assert!(peaks.clone().with_hkl(vec![[1, 0, 0]]).is_err());
        assert!(peaks.with_hkl(vec![[1, 0, 0], [1, 1, 0]]).is_ok());
    }

    #[test]
    fn test_peak_set_accessors() {
        let peaks = TheoreticalPeakSet::new(vec![10.0, 20.0], vec![40.0, 100.0]).unwrap();
        assert_eq!(peaks.len(), 2);
        assert_eq!(peaks.max_intensity(), 100.0);
        let moved = peaks.with_positions(vec![10.1, 20.1]);
        assert_eq!(moved.intensity, peaks.intensity);
        assert_eq!(moved.two_theta, vec![10.1, 20.1]);
    }

    #[test]
    fn test_candidate_from_json() {
        let json = r#"{
            "id": "cal-1",
            "name": "Calcite",
            "formula": "CaCO3",
            "cell": {"a": 4.99, "b": 4.99, "c": 17.06, "gamma": 120.0},
            "peaks": {"two_theta": [29.4, 39.4], "intensity": [100.0, 18.0]}
        }"#;
        let phase: CandidatePhase = serde_json::from_str(json).unwrap();
        assert_eq!(phase.display_name(), "Calcite");
        assert_eq!(phase.cell.alpha, 90.0);
        assert_eq!(phase.cell.gamma, 120.0);
        assert_eq!(phase.peaks.len(), 2);
        assert!(phase.peaks.hkl.is_none());
    }
}
