//! # XRD 图谱模块
//!
//! 峰形模型、图谱合成以及结果导出。
//!
//! ## 子模块
//! - `profile`: Caglioti 峰宽与 pseudo-Voigt 峰形
//! - `synthesizer`: 由峰集合合成连续图谱
//! - `export`: CSV / XY 导出
//! - `plot`: 拟合图生成
//!
//! ## 依赖关系
//! - `profile`, `synthesizer` 被 `analysis/` 使用
//! - `export`, `plot` 被 `commands/` 使用

pub mod export;
pub mod plot;
pub mod profile;
pub mod synthesizer;

pub use profile::{CagliotiParams, ProfileShape};
pub use synthesizer::{synthesize, synthesize_with_shape, uniform_grid};
