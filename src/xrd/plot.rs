//! # 拟合图生成
//!
//! 使用 `plotters` 绘制观测与计算图谱、差值曲线和各物相峰位标记。
//!
//! ## 版式
//! - 上部：观测（点线）与计算（实线）
//! - 下部：差值曲线，整体下移到零线以下
//! - 最底部：每个物相一行竖线，标记其峰位
//!
//! 支持 PNG 与 SVG 输出。
//!
//! ## 依赖关系
//! - 被 `commands/identify.rs`, `commands/refine.rs`, `commands/synthesize.rs` 调用
//! - 使用 `xrd/export.rs` 的 CurveTable
//! - 使用 `plotters` 渲染图表

use crate::error::{PhaseMatchError, Result};
use crate::xrd::export::CurveTable;

use plotters::prelude::*;
use std::path::Path;

/// 每个物相的峰位标记
#[derive(Debug, Clone)]
pub struct PhaseTicks {
    pub label: String,
    pub positions: Vec<f64>,
}

const PHASE_COLORS: [RGBColor; 6] = [
    RGBColor(0, 102, 204),
    RGBColor(204, 51, 0),
    RGBColor(0, 153, 76),
    RGBColor(153, 51, 153),
    RGBColor(204, 153, 0),
    RGBColor(0, 153, 153),
];

/// 生成拟合图
///
/// `table` 须包含 `observed` 列；若含 `calculated` 列则同时绘制计算曲线与差值。
pub fn generate_fit_plot(
    table: &CurveTable,
    ticks: &[PhaseTicks],
    output_path: &Path,
    width: u32,
    height: u32,
    use_svg: bool,
) -> Result<()> {
    if use_svg {
        let root = SVGBackend::new(output_path, (width, height)).into_drawing_area();
        draw_fit_chart(&root, table, ticks)?;
        root.present()
            .map_err(|e| PhaseMatchError::Other(e.to_string()))?;
    } else {
        let root = BitMapBackend::new(output_path, (width, height)).into_drawing_area();
        draw_fit_chart(&root, table, ticks)?;
        root.present()
            .map_err(|e| PhaseMatchError::Other(e.to_string()))?;
    }
    Ok(())
}

/// 绘制拟合图的核心逻辑
fn draw_fit_chart<DB: DrawingBackend>(
    root: &DrawingArea<DB, plotters::coord::Shift>,
    table: &CurveTable,
    ticks: &[PhaseTicks],
) -> Result<()>
where
    DB::ErrorType: 'static,
{
    let observed = table.column("observed").ok_or_else(|| {
        PhaseMatchError::InvalidArgument("plot requires an observed column".to_string())
    })?;
    let calculated = table.column("calculated");

    root.fill(&WHITE)
        .map_err(|e| PhaseMatchError::Other(format!("{:?}", e)))?;

    let x_min = table.two_theta.first().copied().unwrap_or(5.0);
    let x_max = table.two_theta.last().copied().unwrap_or(90.0);
    let x_max = if x_max > x_min { x_max } else { x_min + 1.0 };

    let y_top = observed
        .iter()
        .chain(calculated.unwrap_or(&[]).iter())
        .copied()
        .fold(1.0, f64::max);

    // 差值与峰位标记区域放在零线以下
    let difference: Option<Vec<f64>> =
        calculated.map(|c| observed.iter().zip(c).map(|(o, c)| o - c).collect());
    let diff_offset = -0.15 * y_top;
    let diff_span = difference
        .as_ref()
        .map(|d| d.iter().fold(0.0_f64, |m, v| m.max(v.abs())))
        .unwrap_or(0.0);
    let tick_top = diff_offset - diff_span.max(0.05 * y_top) - 0.03 * y_top;
    let tick_row = 0.05 * y_top;
    let y_bottom = tick_top - tick_row * (ticks.len() as f64 + 0.5);

    let mut chart = ChartBuilder::on(root)
        .caption(&table.title, ("sans-serif", 28).into_font())
        .margin(30)
        .x_label_area_size(50)
        .y_label_area_size(70)
        .build_cartesian_2d(x_min..x_max, y_bottom..(y_top * 1.1))
        .map_err(|e| PhaseMatchError::Other(format!("{:?}", e)))?;

    chart
        .configure_mesh()
        .x_desc("2θ (°)")
        .y_desc("Intensity")
        .x_label_style(("sans-serif", 16))
        .y_label_style(("sans-serif", 16))
        .axis_desc_style(("sans-serif", 18))
        .disable_y_mesh()
        .draw()
        .map_err(|e| PhaseMatchError::Other(format!("{:?}", e)))?;

    // 观测：细点线
    let obs_color = RGBColor(40, 40, 40);
    chart
        .draw_series(
            table
                .two_theta
                .iter()
                .zip(observed)
                .map(|(x, y)| Circle::new((*x, *y), 1, obs_color.filled())),
        )
        .map_err(|e| PhaseMatchError::Other(format!("{:?}", e)))?
        .label("observed")
        .legend(move |(x, y)| Circle::new((x + 10, y), 3, obs_color.filled()));

    if let Some(calc) = calculated {
        let calc_color = RGBColor(204, 0, 0);
        chart
            .draw_series(LineSeries::new(
                table.two_theta.iter().zip(calc).map(|(x, y)| (*x, *y)),
                calc_color.stroke_width(2),
            ))
            .map_err(|e| PhaseMatchError::Other(format!("{:?}", e)))?
            .label("calculated")
            .legend(move |(x, y)| PathElement::new(vec![(x, y), (x + 20, y)], calc_color));
    }

    if let Some(diff) = &difference {
        let diff_color = RGBColor(0, 102, 204);
        chart
            .draw_series(LineSeries::new(
                table
                    .two_theta
                    .iter()
                    .zip(diff)
                    .map(|(x, d)| (*x, diff_offset + d)),
                diff_color.stroke_width(1),
            ))
            .map_err(|e| PhaseMatchError::Other(format!("{:?}", e)))?
            .label("difference")
            .legend(move |(x, y)| PathElement::new(vec![(x, y), (x + 20, y)], diff_color));
    }

    for (row, phase) in ticks.iter().enumerate() {
        let color = PHASE_COLORS[row % PHASE_COLORS.len()];
        let top = tick_top - tick_row * row as f64;
        let bottom = top - 0.7 * tick_row;

        chart
            .draw_series(
                phase
                    .positions
                    .iter()
                    .filter(|x| **x >= x_min && **x <= x_max)
                    .map(|x| PathElement::new(vec![(*x, bottom), (*x, top)], color.stroke_width(1))),
            )
            .map_err(|e| PhaseMatchError::Other(format!("{:?}", e)))?
            .label(phase.label.clone())
            .legend(move |(x, y)| PathElement::new(vec![(x + 10, y - 5), (x + 10, y + 5)], color));
    }

    chart
        .configure_series_labels()
        .background_style(WHITE.mix(0.8))
        .border_style(BLACK)
        .label_font(("sans-serif", 14))
        .draw()
        .map_err(|e| PhaseMatchError::Other(format!("{:?}", e)))?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_svg_plot_written() {
        let table = CurveTable::new("fit", vec![10.0, 10.5, 11.0, 11.5])
            .with_column("observed", vec![1.0, 10.0, 3.0, 1.0])
            .with_column("calculated", vec![1.2, 9.0, 3.1, 0.9]);
        let ticks = vec![PhaseTicks {
            label: "Quartz".to_string(),
            positions: vec![10.5],
        }];

        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("fit.svg");
        generate_fit_plot(&table, &ticks, &path, 800, 600, true).unwrap();

        let text = std::fs::read_to_string(&path).unwrap();
        assert!(text.contains("<svg"));
    }

    #[test]
    fn test_plot_requires_observed() {
        let table = CurveTable::new("fit", vec![10.0, 11.0]).with_column("calculated", vec![1.0, 2.0]);
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("fit.svg");
        assert!(generate_fit_plot(&table, &[], &path, 400, 300, true).is_err());
    }
}
