//! # 残差匹配
//!
//! 计算当前残差与候选物相合成图谱之间的最优标度与相关系数。
//!
//! ## 算法
//! 1. 两条曲线各自除以最大值归一
//! 2. 在残差 > 1% 的点上，以有界一维极小化求
//!    `min_s Σ(r_i − s·c_i)²`，s ∈ [0.1, 10]
//! 3. 在两者均 > 1% 的点上计算 Pearson 相关，至少 10 个点，否则记 0
//!
//! 返回相关系数绝对值与拟合标度。退化输入（全零、可比点不足）一律记 0 分，不报错。
//!
//! ## 依赖关系
//! - 被 `analysis/decomposition.rs` 调用
//! - 使用 `analysis/optimizer.rs`

use super::optimizer::minimize_scalar;
use crate::models::pattern::max_value;

use serde::{Deserialize, Serialize};

/// 匹配评分配置
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MatchConfig {
    /// 信号阈值（相对各自最大值）
    pub signal_floor: f64,
    /// 计算相关所需的最少可比点数
    pub min_points: usize,
    /// 标度下限
    pub scale_min: f64,
    /// 标度上限
    pub scale_max: f64,
}

impl Default for MatchConfig {
    fn default() -> Self {
        MatchConfig {
            signal_floor: 0.01,
            min_points: 10,
            scale_min: 0.1,
            scale_max: 10.0,
        }
    }
}

/// 匹配结果
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct MatchScore {
    /// |Pearson 相关系数|，∈ [0, 1]
    pub correlation: f64,
    /// 归一后的最优标度
    pub scaling: f64,
}

impl MatchScore {
    /// 退化情形
    pub fn degenerate() -> Self {
        MatchScore {
            correlation: 0.0,
            scaling: 1.0,
        }
    }
}

/// 对残差与候选图谱评分
///
/// 两条曲线须等长（同一 2θ 网格）。
pub fn score(residue: &[f64], candidate: &[f64], config: &MatchConfig) -> MatchScore {
    let residue_max = max_value(residue);
    let candidate_max = max_value(candidate);
    if residue_max <= 0.0 || candidate_max <= 0.0 || residue.len() != candidate.len() {
        return MatchScore::degenerate();
    }

    let norm_residue: Vec<f64> = residue.iter().map(|r| r / residue_max).collect();
    let norm_candidate: Vec<f64> = candidate.iter().map(|c| c / candidate_max).collect();

    // 归一后最大值为 1，阈值即 signal_floor
    let fit_mask: Vec<usize> = (0..norm_residue.len())
        .filter(|&i| norm_residue[i] > config.signal_floor)
        .collect();
    if fit_mask.len() < config.min_points {
        return MatchScore::degenerate();
    }

    let objective = |s: f64| {
        fit_mask
            .iter()
            .map(|&i| (norm_residue[i] - s * norm_candidate[i]).powi(2))
            .sum::<f64>()
    };
    let scaling = match minimize_scalar(objective, config.scale_min, config.scale_max) {
        Ok((s, _)) => s,
        Err(e) => {
            tracing::debug!("scale fit failed: {}", e);
            return MatchScore::degenerate();
        }
    };

    // 标度不改变各自的相对阈值
    let (xs, ys): (Vec<f64>, Vec<f64>) = norm_residue
        .iter()
        .zip(norm_candidate.iter())
        .filter(|(r, c)| **r > config.signal_floor && **c > config.signal_floor)
        .map(|(r, c)| (*r, scaling * c))
        .unzip();

    if xs.len() < config.min_points {
        return MatchScore {
            correlation: 0.0,
            scaling,
        };
    }

    MatchScore {
        correlation: pearson(&xs, &ys).abs(),
        scaling,
    }
}

/// Pearson 相关系数；任一序列方差为零时返回 0
pub fn pearson(xs: &[f64], ys: &[f64]) -> f64 {
    let n = xs.len().min(ys.len());
    if n < 2 {
        return 0.0;
    }

    let mean_x = xs[..n].iter().sum::<f64>() / n as f64;
    let mean_y = ys[..n].iter().sum::<f64>() / n as f64;

    let mut cov = 0.0;
    let mut var_x = 0.0;
    let mut var_y = 0.0;
    for (x, y) in xs[..n].iter().zip(&ys[..n]) {
        let dx = x - mean_x;
        let dy = y - mean_y;
        cov += dx * dy;
        var_x += dx * dx;
        var_y += dy * dy;
    }

    let denom = (var_x * var_y).sqrt();
    if denom <= 0.0 || !denom.is_finite() {
        return 0.0;
    }
    let r = cov / denom;
    if r.is_finite() {
        r.clamp(-1.0, 1.0)
    } else {
        0.0
    }
}
