//! # 图谱合成器
//!
//! 将一组理论衍射峰按 Caglioti 峰宽与赝 Voigt 峰形累加到实验 2θ 网格上。
//!
//! ## 算法
//! 1. 峰位加零点偏移
//! 2. 按峰位计算 FWHM
//! 3. 在 ±5·FWHM 窗口内累加 `profile_value(x, 峰位, FWHM, 强度·标度, η)`
//!
//! 网格须严格递增（由 `ExperimentalPattern::validate` 保证），
//! 窗口边界用二分查找定位。
//!
//! ## 依赖关系
//! - 被 `analysis/decomposition.rs`, `analysis/lebail.rs`, `commands/synthesize.rs` 调用
//! - 使用 `xrd/profile.rs`, `models/phase.rs`

use crate::models::TheoreticalPeakSet;
use crate::xrd::profile::{profile_value, CagliotiParams, ProfileShape, PROFILE_CUTOFF_FWHM};

/// 合成图谱，返回与网格等长的新数组
pub fn synthesize(
    grid: &[f64],
    peaks: &TheoreticalPeakSet,
    width: &CagliotiParams,
    scale_factor: f64,
    zero_shift: f64,
    eta: f64,
) -> Vec<f64> {
    let mut curve = vec![0.0; grid.len()];
    accumulate(&mut curve, grid, peaks, width, scale_factor, zero_shift, eta);
    curve
}

/// 以峰形描述合成（无零点偏移）
pub fn synthesize_with_shape(
    grid: &[f64],
    peaks: &TheoreticalPeakSet,
    shape: &ProfileShape,
    scale_factor: f64,
) -> Vec<f64> {
    synthesize(grid, peaks, &shape.caglioti, scale_factor, 0.0, shape.eta)
}

/// 将合成结果累加到已有曲线
pub fn accumulate(
    curve: &mut [f64],
    grid: &[f64],
    peaks: &TheoreticalPeakSet,
    width: &CagliotiParams,
    scale_factor: f64,
    zero_shift: f64,
    eta: f64,
) {
    debug_assert_eq!(curve.len(), grid.len());

    for (position, intensity) in peaks.iter() {
        let amplitude = intensity * scale_factor;
        if amplitude <= 0.0 {
            continue;
        }

        let center = position + zero_shift;
        let fwhm = width.fwhm(center);
        let reach = PROFILE_CUTOFF_FWHM * fwhm;

        let start = grid.partition_point(|x| *x < center - reach);
        let end = grid.partition_point(|x| *x <= center + reach);

        for (y, x) in curve[start..end].iter_mut().zip(&grid[start..end]) {
            *y += profile_value(*x, center, fwhm, amplitude, eta);
        }
    }
}

/// 均匀 2θ 网格 [min, max]，步长 step
pub fn uniform_grid(min: f64, max: f64, step: f64) -> Vec<f64> {
    if step <= 0.0 || max < min {
        return Vec::new();
    }
    let n_points = ((max - min) / step).round() as usize + 1;
    (0..n_points).map(|i| min + i as f64 * step).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    fn grid() -> Vec<f64> {
        uniform_grid(10.0, 30.0, 0.02)
    }

    #[test]
    fn test_empty_peak_list_gives_zero_curve() {
        let grid = grid();
        let curve = synthesize(
            &grid,
            &TheoreticalPeakSet::default(),
            &CagliotiParams::new(0.01, -0.001, 0.01),
            1.0,
            0.0,
            0.5,
        );
        assert_eq!(curve.len(), grid.len());
        assert!(curve.iter().all(|y| *y == 0.0));
    }

    #[test]
    fn test_single_peak_height_and_position() {
        let grid = grid();
        let peaks = TheoreticalPeakSet::new(vec![20.0], vec![100.0]).unwrap();
        let curve = synthesize(&grid, &peaks, &CagliotiParams::new(0.0, 0.0, 0.01), 2.0, 0.0, 0.3);

        let (imax, ymax) = curve
            .iter()
            .enumerate()
            .fold((0, 0.0), |acc, (i, y)| if *y > acc.1 { (i, *y) } else { acc });
        assert_relative_eq!(grid[imax], 20.0, epsilon = 1e-9);
        assert_relative_eq!(ymax, 200.0, epsilon = 1e-6);
    }

    #[test]
    fn test_zero_shift_moves_peak() {
        let grid = grid();
        let peaks = TheoreticalPeakSet::new(vec![20.0], vec![1.0]).unwrap();
        let curve = synthesize(&grid, &peaks, &CagliotiParams::new(0.0, 0.0, 0.01), 1.0, 0.2, 0.0);
        let imax = curve
            .iter()
            .enumerate()
            .max_by(|a, b| a.1.partial_cmp(b.1).unwrap())
            .map(|(i, _)| i)
            .unwrap();
        assert_relative_eq!(grid[imax], 20.2, epsilon = 1e-9);
    }

    #[test]
    fn test_inputs_not_mutated() {
        let grid = grid();
        let peaks = TheoreticalPeakSet::new(vec![15.0, 25.0], vec![10.0, 20.0]).unwrap();
        let before = peaks.clone();
        let _ = synthesize(&grid, &peaks, &CagliotiParams::new(0.0, 0.0, 0.01), 1.0, 0.1, 0.5);
        assert_eq!(peaks, before);
    }

    #[test]
    fn test_peaks_outside_grid_ignored() {
        let grid = grid();
        let peaks = TheoreticalPeakSet::new(vec![50.0], vec![100.0]).unwrap();
        let curve = synthesize(&grid, &peaks, &CagliotiParams::new(0.0, 0.0, 0.01), 1.0, 0.0, 0.5);
        assert!(curve.iter().all(|y| *y == 0.0));
    }

    #[test]
    fn test_uniform_grid() {
        let g = uniform_grid(5.0, 6.0, 0.25);
        assert_eq!(g.len(), 5);
        assert_relative_eq!(g[4], 6.0);
        assert!(uniform_grid(5.0, 4.0, 0.1).is_empty());
        assert!(uniform_grid(5.0, 6.0, 0.0).is_empty());
    }
}
