//! # 数据导出
//!
//! 将拟合曲线或合成图谱导出为 CSV 与 XY 格式。
//!
//! ## 支持格式
//! - CSV: 表头 + 多列（2θ, observed, calculated, difference, 每个物相一列）
//! - XY: `#` 注释头 + 制表符分隔的同样各列
//!
//! ## 依赖关系
//! - 被 `commands/identify.rs`, `commands/refine.rs`, `commands/synthesize.rs` 调用
//! - 使用 `analysis/` 的结果结构
//! - 使用 `csv` 库写入 CSV 文件

use crate::analysis::decomposition::DecompositionResult;
use crate::analysis::lebail::RefinementOutcome;
use crate::error::{PhaseMatchError, Result};

use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::Path;

/// 以 2θ 为首列的曲线表
#[derive(Debug, Clone)]
pub struct CurveTable {
    pub title: String,
    pub two_theta: Vec<f64>,
    pub columns: Vec<(String, Vec<f64>)>,
}

impl CurveTable {
    pub fn new(title: impl Into<String>, two_theta: Vec<f64>) -> Self {
        CurveTable {
            title: title.into(),
            two_theta,
            columns: Vec::new(),
        }
    }

    /// 追加一列；长度须与 2θ 一致
    pub fn with_column(mut self, name: impl Into<String>, values: Vec<f64>) -> Self {
        debug_assert_eq!(values.len(), self.two_theta.len());
        self.columns.push((name.into(), values));
        self
    }

    /// 精修结果：观测、计算、差值与各物相
    pub fn from_refinement(title: impl Into<String>, outcome: &RefinementOutcome) -> Self {
        let mut table = CurveTable::new(title, outcome.two_theta.clone())
            .with_column("observed", outcome.observed.clone())
            .with_column("calculated", outcome.calculated.clone())
            .with_column("difference", outcome.difference());
        for (refined, pattern) in outcome.phases.iter().zip(&outcome.phase_patterns) {
            table = table.with_column(refined.phase.id.clone(), pattern.clone());
        }
        table
    }

    /// 分解结果：观测、已解释部分、残差与各物相贡献
    pub fn from_decomposition(title: impl Into<String>, result: &DecompositionResult) -> Self {
        let explained: Vec<f64> = result
            .observed
            .iter()
            .zip(&result.final_residue)
            .map(|(o, r)| o.max(0.0) - r)
            .collect();
        let mut table = CurveTable::new(title, result.two_theta.clone())
            .with_column("observed", result.observed.clone())
            .with_column("calculated", explained)
            .with_column("residue", result.final_residue.clone());
        for record in &result.identified_phases {
            table = table.with_column(record.phase.id.clone(), record.contribution.clone());
        }
        table
    }

    pub fn column(&self, name: &str) -> Option<&[f64]> {
        self.columns
            .iter()
            .find(|(n, _)| n == name)
            .map(|(_, v)| v.as_slice())
    }
}

fn write_error(path: &Path) -> impl Fn(std::io::Error) -> PhaseMatchError {
    let path = path.display().to_string();
    move |e| PhaseMatchError::FileWriteError {
        path: path.clone(),
        source: e,
    }
}

/// 导出为 CSV
pub fn to_csv(table: &CurveTable, output_path: &Path) -> Result<()> {
    let mut wtr = csv::Writer::from_path(output_path)?;

    let mut header = vec!["2theta".to_string()];
    header.extend(table.columns.iter().map(|(name, _)| name.clone()));
    wtr.write_record(&header)?;

    for (i, two_theta) in table.two_theta.iter().enumerate() {
        let mut record = vec![format!("{:.4}", two_theta)];
        record.extend(
            table
                .columns
                .iter()
                .map(|(_, values)| format!("{:.4}", values.get(i).copied().unwrap_or(0.0))),
        );
        wtr.write_record(&record)?;
    }

    wtr.flush().map_err(write_error(output_path))?;

    Ok(())
}

/// 导出为 XY
pub fn to_xy(table: &CurveTable, output_path: &Path) -> Result<()> {
    let file = File::create(output_path).map_err(write_error(output_path))?;
    let mut out = BufWriter::new(file);

    let names: Vec<&str> = table.columns.iter().map(|(n, _)| n.as_str()).collect();
    writeln!(out, "# Pattern: {}", table.title).map_err(write_error(output_path))?;
    writeln!(out, "# Columns: 2theta (degrees), {}", names.join(", "))
        .map_err(write_error(output_path))?;
    writeln!(out, "#").map_err(write_error(output_path))?;

    for (i, two_theta) in table.two_theta.iter().enumerate() {
        let mut line = format!("{:.4}", two_theta);
        for (_, values) in &table.columns {
            line.push_str(&format!("\t{:.4}", values.get(i).copied().unwrap_or(0.0)));
        }
        writeln!(out, "{}", line).map_err(write_error(output_path))?;
    }

    out.flush().map_err(write_error(output_path))?;

    Ok(())
}

/// 导出文本报告
pub fn write_report(report: &str, output_path: &Path) -> Result<()> {
    std::fs::write(output_path, report).map_err(write_error(output_path))
}
