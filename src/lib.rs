//! # PhaseMatch - 多物相 XRD 鉴定与 Le Bail 精修
//!
//! 给定一条实验粉末衍射图谱和一组候选物相的理论峰集合，
//! 逐个找出最匹配的物相并从残差中扣除，再对鉴定出的物相做 Le Bail 全谱精修。
//!
//! ## 模块结构
//! ```text
//! lib.rs
//!   ├── analysis/   (分解、精修、报告、缓存：引擎本体，不做文件读写)
//!   ├── xrd/        (峰形、合成、导出、绘图)
//!   ├── models/     (图谱与物相数据模型)
//!   ├── parsers/    (图谱、候选库、缓存与配置文件)
//!   ├── batch/      (目录批量分析)
//!   ├── cli/        (命令行参数定义)
//!   ├── commands/   (命令执行逻辑)
//!   ├── utils/      (终端输出、进度条、日志)
//!   └── error.rs    (错误处理)
//! ```

pub mod analysis;
pub mod batch;
pub mod cli;
pub mod commands;
pub mod error;
pub mod models;
pub mod parsers;
pub mod utils;
pub mod xrd;

pub use error::{PhaseMatchError, Result};
