//! # 数据模型模块
//!
//! 定义实验图谱与候选物相的统一数据模型。
//!
//! ## 依赖关系
//! - 被 `parsers/`, `xrd/`, `analysis/` 使用
//! - 子模块: pattern, phase

pub mod pattern;
pub mod phase;

pub use pattern::ExperimentalPattern;
pub use phase::{CandidatePhase, TheoreticalPeakSet, UnitCell};
