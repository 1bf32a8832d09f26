//! # 图谱文件收集器
//!
//! 根据输入路径和 glob 模式收集待分析的图谱文件。
//!
//! ## 依赖关系
//! - 被 `commands/identify.rs`, `commands/refine.rs` 调用
//! - 使用 `walkdir` 遍历目录，`glob` 匹配文件名

use crate::error::{PhaseMatchError, Result};

use glob::{MatchOptions, Pattern};
use std::path::{Path, PathBuf};
use walkdir::WalkDir;

/// 缺省匹配的图谱扩展名
pub const DEFAULT_PATTERN: &str = "*.xy,*.csv,*.dat,*.txt";

/// 文件收集器
pub struct FileCollector {
    input: PathBuf,
    patterns: Vec<Pattern>,
    recursive: bool,
}

impl FileCollector {
    pub fn new(input: PathBuf) -> Self {
        Self {
            input,
            patterns: parse_patterns(DEFAULT_PATTERN),
            recursive: false,
        }
    }

    /// 设置匹配模式（逗号分隔的多模式）
    pub fn with_pattern(mut self, pattern: &str) -> Result<Self> {
        let mut patterns = Vec::new();
        for raw in pattern.split(',').map(str::trim).filter(|s| !s.is_empty()) {
            let compiled = Pattern::new(raw).map_err(|e| {
                PhaseMatchError::InvalidArgument(format!("bad file pattern '{}': {}", raw, e))
            })?;
            patterns.push(compiled);
        }
        if !patterns.is_empty() {
            self.patterns = patterns;
        }
        Ok(self)
    }

    pub fn recursive(mut self, recursive: bool) -> Self {
        self.recursive = recursive;
        self
    }

    pub fn is_directory(&self) -> bool {
        self.input.is_dir()
    }

    /// 收集所有匹配的文件，按路径排序
    ///
    /// 单文件输入直接返回，不检查模式。
    pub fn collect(&self) -> Result<Vec<PathBuf>> {
        if self.input.is_file() {
            return Ok(vec![self.input.clone()]);
        }

        if !self.input.is_dir() {
            return Err(PhaseMatchError::FileNotFound {
                path: self.input.display().to_string(),
            });
        }

        let max_depth = if self.recursive { usize::MAX } else { 1 };

        let mut files: Vec<PathBuf> = WalkDir::new(&self.input)
            .max_depth(max_depth)
            .into_iter()
            .filter_map(|e| e.ok())
            .filter(|e| e.file_type().is_file())
            .filter(|e| self.matches(e.path()))
            .map(|e| e.path().to_path_buf())
            .collect();
        files.sort();

        Ok(files)
    }

    fn matches(&self, path: &Path) -> bool {
        let Some(filename) = path.file_name().and_then(|n| n.to_str()) else {
            return false;
        };

        let options = MatchOptions {
            case_sensitive: false,
            ..MatchOptions::new()
        };
        self.patterns
            .iter()
            .any(|p| p.matches_with(filename, options))
    }
}

fn parse_patterns(list: &str) -> Vec<Pattern> {
    list.split(',')
        .filter_map(|s| Pattern::new(s.trim()).ok())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    fn touch(dir: &Path, name: &str) {
        fs::write(dir.join(name), "10 1\n").unwrap();
    }

    #[test]
    fn test_default_patterns() {
        let dir = tempfile::tempdir().unwrap();
        touch(dir.path(), "a.xy");
        touch(dir.path(), "b.CSV");
        touch(dir.path(), "notes.md");
        fs::create_dir(dir.path().join("sub")).unwrap();
        touch(&dir.path().join("sub"), "c.dat");

        let files = FileCollector::new(dir.path().to_path_buf()).collect().unwrap();
        let names: Vec<String> = files
            .iter()
            .map(|p| p.file_name().unwrap().to_string_lossy().to_string())
            .collect();
        assert_eq!(names, vec!["a.xy", "b.CSV"]);

        let all = FileCollector::new(dir.path().to_path_buf())
            .recursive(true)
            .collect()
            .unwrap();
        assert_eq!(all.len(), 3);
    }

    #[test]
    fn test_custom_pattern() {
        let dir = tempfile::tempdir().unwrap();
        touch(dir.path(), "run1.xy");
        touch(dir.path(), "run12.xy");
        touch(dir.path(), "ref.xy");

        let files = FileCollector::new(dir.path().to_path_buf())
            .with_pattern("run?.xy")
            .unwrap()
            .collect()
            .unwrap();
        assert_eq!(files.len(), 1);
        assert!(files[0].ends_with("run1.xy"));
    }

    #[test]
    fn test_single_file_and_missing() {
        let dir = tempfile::tempdir().unwrap();
        touch(dir.path(), "scan.raw");
        let file = dir.path().join("scan.raw");
        assert_eq!(FileCollector::new(file.clone()).collect().unwrap(), vec![file]);

        let missing = FileCollector::new(dir.path().join("nope")).collect();
        assert!(matches!(missing, Err(PhaseMatchError::FileNotFound { .. })));
    }

    #[test]
    fn test_bad_pattern() {
        assert!(FileCollector::new(PathBuf::from(".")).with_pattern("[").is_err());
    }
}
