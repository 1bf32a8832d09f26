//! # 一致性因子
//!
//! 观测图谱与计算图谱之间的晶体学 R 因子。
//!
//! - Rp   = Σ|obs − calc| / Σobs
//! - Rwp  = √(Σ((obs − calc)/σ)² / Σ(obs/σ)²)
//! - Rexp = √((Nobs − Nparam) / Σ(obs/σ)²)
//! - GoF  = Rwp / Rexp
//! - χ²   = Σ((obs − calc)/σ)² / (Nobs − Nparam)
//!
//! Rp、Rwp、Rexp 以百分数给出；分母为零或自由度不足时记为 +∞。
//!
//! ## 依赖关系
//! - 被 `analysis/lebail.rs`, `analysis/report.rs` 使用

use serde::{Deserialize, Serialize};

/// R 因子集合
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct AgreementStatistics {
    /// 剖面 R 因子（%）
    pub rp: f64,
    /// 加权剖面 R 因子（%）
    pub rwp: f64,
    /// 期望 R 因子（%）
    pub rexp: f64,
    /// 拟合优度
    pub gof: f64,
    /// 约化 χ²
    pub chi_squared: f64,
}

impl AgreementStatistics {
    /// 计算 R 因子
    ///
    /// `sigma` 须为正；三个数组等长。
    pub fn compute(observed: &[f64], calculated: &[f64], sigma: &[f64], n_params: usize) -> Self {
        let mut abs_diff = 0.0;
        let mut obs_sum = 0.0;
        let mut weighted_diff = 0.0;
        let mut weighted_obs = 0.0;

        for ((obs, calc), s) in observed.iter().zip(calculated).zip(sigma) {
            abs_diff += (obs - calc).abs();
            obs_sum += obs;
            weighted_diff += ((obs - calc) / s).powi(2);
            weighted_obs += (obs / s).powi(2);
        }

        let n_obs = observed.len();
        let dof = n_obs.saturating_sub(n_params);

        let rp = if obs_sum > 0.0 {
            abs_diff / obs_sum
        } else {
            f64::INFINITY
        };
        let rwp = if weighted_obs > 0.0 {
            (weighted_diff / weighted_obs).sqrt()
        } else {
            f64::INFINITY
        };
        let rexp = if weighted_obs > 0.0 && dof > 0 {
            (dof as f64 / weighted_obs).sqrt()
        } else {
            f64::INFINITY
        };
        let gof = if rexp > 0.0 && rexp.is_finite() {
            rwp / rexp
        } else {
            f64::INFINITY
        };
        let chi_squared = if dof > 0 {
            weighted_diff / dof as f64
        } else {
            f64::INFINITY
        };

        AgreementStatistics {
            rp: rp * 100.0,
            rwp: rwp * 100.0,
            rexp: rexp * 100.0,
            gof,
            chi_squared,
        }
    }

    /// 只计算 Rwp（%），用于单相评估
    pub fn weighted_profile(observed: &[f64], calculated: &[f64], sigma: &[f64]) -> f64 {
        Self::compute(observed, calculated, sigma, 0).rwp
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn test_perfect_fit() {
        let obs = vec![10.0, 40.0, 90.0, 40.0, 10.0];
        let sigma: Vec<f64> = obs.iter().map(|y: &f64| y.sqrt()).collect();
        let stats = AgreementStatistics::compute(&obs, &obs, &sigma, 1);
        assert_eq!(stats.rp, 0.0);
        assert_eq!(stats.rwp, 0.0);
        assert_eq!(stats.gof, 0.0);
        assert!(stats.rexp.is_finite() && stats.rexp > 0.0);
    }

    #[test]
    fn test_known_values() {
        let obs = vec![4.0, 4.0, 4.0, 4.0];
        let calc = vec![2.0, 2.0, 2.0, 2.0];
        let sigma = vec![2.0; 4];
        let stats = AgreementStatistics::compute(&obs, &calc, &sigma, 2);

        // Σ|Δ| = 8, Σobs = 16
        assert_relative_eq!(stats.rp, 50.0);
        // Σ(Δ/σ)² = 4, Σ(obs/σ)² = 16
        assert_relative_eq!(stats.rwp, 50.0);
        // √(2/16)
        assert_relative_eq!(stats.rexp, (2.0f64 / 16.0).sqrt() * 100.0);
        assert_relative_eq!(stats.gof, 0.5 / (2.0f64 / 16.0).sqrt());
        assert_relative_eq!(stats.chi_squared, 2.0);
    }

    #[test]
    fn test_degenerate_denominators() {
        let obs = vec![0.0, 0.0];
        let calc = vec![1.0, 1.0];
        let sigma = vec![1.0, 1.0];
        let stats = AgreementStatistics::compute(&obs, &calc, &sigma, 5);
        assert!(stats.rp.is_infinite());
        assert!(stats.rwp.is_infinite());
        assert!(stats.rexp.is_infinite());
        assert!(stats.gof.is_infinite());
        assert!(stats.chi_squared.is_infinite());
    }
}
