//! # 物相库与缓存文件
//!
//! JSON 格式的候选物相库、精修缓存与分析配置。
//!
//! ## 候选库格式
//! ```json
//! [
//!   {
//!     "id": "quartz-001",
//!     "name": "Quartz",
//!     "formula": "SiO2",
//!     "cell": { "a": 4.913, "b": 4.913, "c": 5.405, "gamma": 120.0 },
//!     "space_group": "P3221",
//!     "peaks": { "two_theta": [20.86, 26.64], "intensity": [22.0, 100.0] }
//!   }
//! ]
//! ```
//!
//! ## 依赖关系
//! - 被 `commands/` 调用
//! - 使用 `models/phase.rs`, `analysis/cache.rs`, `analysis/pipeline.rs`
//! - 使用 `serde_json`

use super::{read_json, read_text};
use crate::analysis::{AnalysisConfig, RefinedPhaseCache};
use crate::error::{PhaseMatchError, Result};
use crate::models::CandidatePhase;

use std::collections::HashSet;
use std::fs;
use std::path::Path;

/// 读取候选物相库并校验
pub fn load_candidates(path: &Path) -> Result<Vec<CandidatePhase>> {
    let phases: Vec<CandidatePhase> = read_json(path, "candidate JSON")?;
    validate_candidates(&phases).map_err(|e| PhaseMatchError::ParseError {
        format: "candidate JSON".to_string(),
        path: path.display().to_string(),
        reason: e.to_string(),
    })?;
    Ok(phases)
}

/// 检查 ID 非空且唯一、峰集合平行数组一致
pub fn validate_candidates(phases: &[CandidatePhase]) -> Result<()> {
    let mut seen = HashSet::new();
    for (i, phase) in phases.iter().enumerate() {
        if phase.id.trim().is_empty() {
            return Err(PhaseMatchError::InvalidInput(format!(
                "candidate #{} has an empty id",
                i + 1
            )));
        }
        if !seen.insert(phase.id.as_str()) {
            return Err(PhaseMatchError::InvalidInput(format!(
                "duplicate candidate id '{}'",
                phase.id
            )));
        }
        phase.peaks.validate().map_err(|e| {
            PhaseMatchError::InvalidInput(format!("candidate '{}': {}", phase.id, e))
        })?;
    }
    Ok(())
}

/// 读取精修缓存；文件不存在时返回空缓存
pub fn load_refined_cache(path: &Path) -> Result<RefinedPhaseCache> {
    if !path.exists() {
        return Ok(RefinedPhaseCache::new());
    }
    read_json(path, "cache JSON")
}

/// 写出精修缓存
pub fn save_refined_cache(cache: &RefinedPhaseCache, path: &Path) -> Result<()> {
    let json = serde_json::to_string_pretty(cache)?;
    fs::write(path, json).map_err(|e| PhaseMatchError::FileWriteError {
        path: path.display().to_string(),
        source: e,
    })
}

/// 读取分析配置，缺省字段取默认值
pub fn load_analysis_config(path: &Path) -> Result<AnalysisConfig> {
    let content = read_text(path)?;
    if content.trim().is_empty() {
        return Ok(AnalysisConfig::default());
    }
    serde_json::from_str(&content).map_err(|e| PhaseMatchError::ParseError {
        format: "config JSON".to_string(),
        path: path.display().to_string(),
        reason: e.to_string(),
    })
}
