//! # 批量处理模块
//!
//! 对目录中的多条图谱并行执行同一分析。
//!
//! ## 依赖关系
//! - 被 `commands/identify.rs`, `commands/refine.rs` 使用
//! - 使用 `rayon` 进行并行处理
//! - 使用 `indicatif` 显示进度

pub mod collector;
pub mod runner;

pub use collector::FileCollector;
pub use runner::{BatchResult, BatchRunner, ProcessResult};
