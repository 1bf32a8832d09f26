//! # 解析器模块
//!
//! 引擎之外的文件适配层：读取实验图谱、候选物相库、缓存与配置文件。
//!
//! ## 依赖关系
//! - 被 `commands/` 模块使用
//! - 使用 `models/` 数据模型
//! - 子模块: pattern, candidates

pub mod candidates;
pub mod pattern;

pub use candidates::{load_analysis_config, load_candidates, load_refined_cache, save_refined_cache};
pub use pattern::parse_pattern_file;

use crate::error::{PhaseMatchError, Result};

use serde::de::DeserializeOwned;
use std::fs;
use std::path::Path;

/// 读取文本文件，区分“不存在”与其他读取错误
fn read_text(path: &Path) -> Result<String> {
    if !path.exists() {
        return Err(PhaseMatchError::FileNotFound {
            path: path.display().to_string(),
        });
    }
    fs::read_to_string(path).map_err(|e| PhaseMatchError::FileReadError {
        path: path.display().to_string(),
        source: e,
    })
}

/// 读取 JSON 文件并反序列化
fn read_json<T: DeserializeOwned>(path: &Path, format: &str) -> Result<T> {
    let content = read_text(path)?;
    serde_json::from_str(&content).map_err(|e| PhaseMatchError::ParseError {
        format: format.to_string(),
        path: path.display().to_string(),
        reason: e.to_string(),
    })
}
