//! # 实验图谱解析器
//!
//! 读取两列或三列的数值文本：2θ、强度、可选 σ。
//!
//! ## 格式说明
//! ```text
//! # 注释行（也接受 ! 与 ;）
//! 2theta,intensity          <- 非数值表头，跳过
//! 10.00  123.4  11.1
//! 10.02  130.2  11.4
//! ```
//! 分隔符可为空白、逗号或分号。超过三列时只取前三列。
//! 只有当每个数据行都带第三列时才作为 σ 读入。
//!
//! ## 依赖关系
//! - 被 `commands/` 调用
//! - 使用 `models/pattern.rs`
//! - 使用 `regex` 切分字段

use super::read_text;
use crate::error::{PhaseMatchError, Result};
use crate::models::ExperimentalPattern;

use regex::Regex;
use std::path::Path;

/// 支持的扩展名
pub const SUPPORTED_EXTENSIONS: [&str; 4] = ["xy", "dat", "txt", "csv"];

/// 解析图谱文件，名称取文件名主干
pub fn parse_pattern_file(path: &Path) -> Result<ExperimentalPattern> {
    let ext = path
        .extension()
        .and_then(|e| e.to_str())
        .map(|s| s.to_lowercase())
        .unwrap_or_default();

    if !SUPPORTED_EXTENSIONS.contains(&ext.as_str()) {
        return Err(PhaseMatchError::UnsupportedFormat(format!(
            "Cannot read pattern from {} (expected .xy, .dat, .txt or .csv)",
            path.display()
        )));
    }

    let content = read_text(path)?;
    let name = path
        .file_stem()
        .and_then(|s| s.to_str())
        .unwrap_or("pattern");

    parse_pattern_content(&content, name).map_err(|e| PhaseMatchError::ParseError {
        format: ext,
        path: path.display().to_string(),
        reason: e.to_string(),
    })
}

/// 从字符串内容解析图谱
pub fn parse_pattern_content(content: &str, name: &str) -> Result<ExperimentalPattern> {
    let separator = Regex::new(r"[\s,;]+")
        .map_err(|e| PhaseMatchError::Other(format!("separator pattern: {}", e)))?;

    let mut two_theta = Vec::new();
    let mut intensity = Vec::new();
    let mut sigma = Vec::new();
    let mut all_have_sigma = true;

    for (line_no, raw) in content.lines().enumerate() {
        let line = raw.trim();
        if line.is_empty() || line.starts_with('#') || line.starts_with('!') || line.starts_with(';')
        {
            continue;
        }

        let fields: Vec<&str> = separator.split(line).filter(|s| !s.is_empty()).collect();
        let Some(x) = fields.first().and_then(|s| s.parse::<f64>().ok()) else {
            // 表头或其他文字行
            continue;
        };

        let y = fields
            .get(1)
            .and_then(|s| s.parse::<f64>().ok())
            .ok_or_else(|| {
                PhaseMatchError::InvalidInput(format!(
                    "line {}: expected at least two numeric columns",
                    line_no + 1
                ))
            })?;

        two_theta.push(x);
        intensity.push(y);

        match fields.get(2).and_then(|s| s.parse::<f64>().ok()) {
            Some(s) => sigma.push(s),
            None => all_have_sigma = false,
        }
    }

    if two_theta.is_empty() {
        return Err(PhaseMatchError::InvalidInput(
            "no numeric data rows found".to_string(),
        ));
    }

    let pattern = ExperimentalPattern::new(name, two_theta, intensity)?;
    if all_have_sigma {
        pattern.with_uncertainty(sigma)
    } else {
        Ok(pattern)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    #[test]
    fn test_two_columns_with_header() {
        let content = "# scan 1\n2theta intensity\n10.0 5\n10.5 7.5\n11.0 6\n";
        let pattern = parse_pattern_content(content, "scan").unwrap();
        assert_eq!(pattern.name, "scan");
        assert_eq!(pattern.two_theta, vec![10.0, 10.5, 11.0]);
        assert_eq!(pattern.intensity, vec![5.0, 7.5, 6.0]);
        assert!(pattern.uncertainty.is_none());
    }

    #[test]
    fn test_three_columns_csv() {
        let content = "2theta,intensity,sigma\n10.0,100,10\n10.5,400,20\n";
        let pattern = parse_pattern_content(content, "csv").unwrap();
        assert_eq!(pattern.uncertainty, Some(vec![10.0, 20.0]));
    }

    #[test]
    fn test_mixed_separators_and_comments() {
        let content = "! instrument\n; note\n10.0; 1.0\n10.1\t2.0\n10.2 ,3.0\n";
        let pattern = parse_pattern_content(content, "mixed").unwrap();
        assert_eq!(pattern.intensity, vec![1.0, 2.0, 3.0]);
    }

    #[test]
    fn test_partial_sigma_ignored() {
        let content = "10.0 1.0 0.5\n10.1 2.0\n";
        let pattern = parse_pattern_content(content, "p").unwrap();
        assert!(pattern.uncertainty.is_none());
    }

    #[test]
    fn test_missing_intensity_is_error() {
        assert!(parse_pattern_content("10.0\n", "p").is_err());
    }

    #[test]
    fn test_no_data_is_error() {
        assert!(parse_pattern_content("# only comments\n", "p").is_err());
    }

    #[test]
    fn test_non_increasing_rejected() {
        let err = parse_pattern_content("10.0 1\n9.0 2\n", "p").unwrap_err();
        assert!(err.is_invalid_input());
    }

    #[test]
    fn test_file_roundtrip_and_extension() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("sample.dat");
        fs::write(&path, "20 1\n21 2\n").unwrap();
        let pattern = parse_pattern_file(&path).unwrap();
        assert_eq!(pattern.name, "sample");
        assert_eq!(pattern.len(), 2);

        let bad = dir.path().join("sample.raw");
        fs::write(&bad, "20 1\n").unwrap();
        assert!(matches!(
            parse_pattern_file(&bad),
            Err(PhaseMatchError::UnsupportedFormat(_))
        ));

        let missing = dir.path().join("missing.xy");
        assert!(matches!(
            parse_pattern_file(&missing),
            Err(PhaseMatchError::FileNotFound { .. })
        ));
    }
}
