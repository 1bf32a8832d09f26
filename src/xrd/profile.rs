//! # 峰形模型
//!
//! 角度相关峰宽（Caglioti 函数）与赝 Voigt 峰形，均为纯函数。
//!
//! ## 公式
//! - FWHM² = U·tan²θ + V·tanθ + W，θ = 2θ/2（弧度），平方值下限 0.001
//! - I(x) = I₀·[(1−η)·G(x) + η·L(x)]
//!   - G: σ = FWHM / (2√(2 ln 2))
//!   - L: γ = FWHM / 2
//!
//! 峰形以峰高归一（中心处值为 I₀），只在 |x − x₀| ≤ 5·FWHM 内计算。
//!
//! ## 依赖关系
//! - 被 `xrd/synthesizer.rs` 调用
//! - 无外部模块依赖

use serde::{Deserialize, Serialize};
use std::f64::consts::LN_2;

/// FWHM² 的下限
pub const MIN_FWHM_SQUARED: f64 = 0.001;

/// 峰形截断距离（以 FWHM 为单位）
pub const PROFILE_CUTOFF_FWHM: f64 = 5.0;

/// Caglioti 峰宽系数
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct CagliotiParams {
    pub u: f64,
    pub v: f64,
    pub w: f64,
}

impl CagliotiParams {
    pub fn new(u: f64, v: f64, w: f64) -> Self {
        CagliotiParams { u, v, w }
    }

    /// 给定 2θ 处的 FWHM
    pub fn fwhm(&self, two_theta: f64) -> f64 {
        peak_width(two_theta, self.u, self.v, self.w)
    }
}

/// 峰形描述：峰宽系数 + Lorentz 混合分数
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ProfileShape {
    pub caglioti: CagliotiParams,
    pub eta: f64,
}

impl Default for ProfileShape {
    /// 检索阶段使用的固定峰形：FWHM ≈ 0.1°，30% Lorentz
    fn default() -> Self {
        ProfileShape {
            caglioti: CagliotiParams::new(0.0, 0.0, 0.01),
            eta: 0.3,
        }
    }
}

/// Caglioti 峰宽
///
/// 对任意系数（含全零与非有限值）都返回有限正值。
pub fn peak_width(two_theta: f64, u: f64, v: f64, w: f64) -> f64 {
    let tan_theta = (two_theta / 2.0).to_radians().tan();
    let fwhm_sq = u * tan_theta * tan_theta + v * tan_theta + w;
    // NaN.max(x) == x
    fwhm_sq.max(MIN_FWHM_SQUARED).min(f64::MAX).sqrt()
}

/// 赝 Voigt 峰形在 x 处的值
pub fn profile_value(x: f64, center: f64, fwhm: f64, intensity: f64, eta: f64) -> f64 {
    if fwhm <= 0.0 || intensity <= 0.0 || !fwhm.is_finite() {
        return 0.0;
    }

    let dx = x - center;
    if dx.abs() > PROFILE_CUTOFF_FWHM * fwhm {
        return 0.0;
    }

    let eta = eta.clamp(0.0, 1.0);
    let sigma = fwhm / (2.0 * (2.0 * LN_2).sqrt());
    let gamma = fwhm / 2.0;

    let gaussian = (-0.5 * (dx / sigma).powi(2)).exp();
    let lorentzian = 1.0 / (1.0 + (dx / gamma).powi(2));

    intensity * ((1.0 - eta) * gaussian + eta * lorentzian)
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn test_peak_width_always_positive_finite() {
        let coefficients = [
            (0.0, 0.0, 0.0),
            (0.01, -0.001, 0.01),
            (-1.0, -1.0, -1.0),
            (1.0, 0.1, 1.0),
            (0.0, -0.1, 0.001),
            (f64::NAN, 0.0, 0.0),
            (1e308, 1e308, 1e308),
        ];
        for (u, v, w) in coefficients {
            for two_theta in [0.0, 5.0, 30.0, 90.0, 150.0, 179.9] {
                let fwhm = peak_width(two_theta, u, v, w);
                assert!(
                    fwhm.is_finite() && fwhm > 0.0,
                    "fwhm({}, {}, {}, {}) = {}",
                    two_theta,
                    u,
                    v,
                    w,
                    fwhm
                );
            }
        }
    }

    #[test]
    fn test_peak_width_floor() {
        assert_relative_eq!(peak_width(30.0, 0.0, 0.0, 0.0), MIN_FWHM_SQUARED.sqrt());
    }

    #[test]
    fn test_peak_width_constant_w() {
        assert_relative_eq!(peak_width(40.0, 0.0, 0.0, 0.01), 0.1, epsilon = 1e-12);
    }

    #[test]
    fn test_profile_peak_height_and_half_maximum() {
        for eta in [0.0, 0.3, 1.0] {
            assert_relative_eq!(profile_value(20.0, 20.0, 0.2, 50.0, eta), 50.0);
            assert_relative_eq!(
                profile_value(20.1, 20.0, 0.2, 50.0, eta),
                25.0,
                epsilon = 1e-9
            );
        }
    }

    #[test]
    fn test_profile_zero_for_degenerate_inputs() {
        assert_eq!(profile_value(20.0, 20.0, 0.0, 10.0, 0.5), 0.0);
        assert_eq!(profile_value(20.0, 20.0, -0.1, 10.0, 0.5), 0.0);
        assert_eq!(profile_value(20.0, 20.0, 0.1, 0.0, 0.5), 0.0);
        assert_eq!(profile_value(20.0, 20.0, 0.1, -3.0, 0.5), 0.0);
    }

    #[test]
    fn test_profile_cutoff() {
        let fwhm = 0.1;
        assert!(profile_value(20.0 + 4.9 * fwhm, 20.0, fwhm, 1.0, 1.0) > 0.0);
        assert_eq!(profile_value(20.0 + 5.1 * fwhm, 20.0, fwhm, 1.0, 1.0), 0.0);
    }
}
