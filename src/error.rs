//! # 统一错误处理模块
//!
//! 定义 PhaseMatch 的所有错误类型，使用 `thiserror` 派生。
//!
//! ## 错误分级
//! - `InvalidInput`: 引擎唯一会中止调用的错误（空图谱、2θ 非递增等）
//! - `NumericFailure`: 优化器未能给出可用解，由 Le Bail 控制器就地恢复
//! - 其余为文件、解析与参数错误，只出现在引擎外层
//!
//! ## 依赖关系
//! - 被所有其他模块使用
//! - 无外部模块依赖

use thiserror::Error;

/// PhaseMatch 统一错误类型
#[derive(Error, Debug)]
pub enum PhaseMatchError {
    // ─────────────────────────────────────────────────────────────
    // I/O 错误
    // ─────────────────────────────────────────────────────────────
    #[error("Failed to read file: {path}")]
    FileReadError {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to write file: {path}")]
    FileWriteError {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Directory not found: {path}")]
    DirectoryNotFound { path: String },

    #[error("File not found: {path}")]
    FileNotFound { path: String },

    // ─────────────────────────────────────────────────────────────
    // 解析错误
    // ─────────────────────────────────────────────────────────────
    #[error("Failed to parse {format} file: {path}\nReason: {reason}")]
    ParseError {
        format: String,
        path: String,
        reason: String,
    },

    #[error("Unsupported format: {0}")]
    UnsupportedFormat(String),

    // ─────────────────────────────────────────────────────────────
    // 引擎错误
    // ─────────────────────────────────────────────────────────────
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Numeric failure in {context}: {reason}")]
    NumericFailure { context: String, reason: String },

    // ─────────────────────────────────────────────────────────────
    // 参数错误
    // ─────────────────────────────────────────────────────────────
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    #[error("Invalid range format: {0}")]
    InvalidRange(String),

    // ─────────────────────────────────────────────────────────────
    // 序列化错误
    // ─────────────────────────────────────────────────────────────
    #[error("CSV error: {0}")]
    CsvError(#[from] csv::Error),

    #[error("JSON error: {0}")]
    JsonError(#[from] serde_json::Error),

    // ─────────────────────────────────────────────────────────────
    // 其他
    // ─────────────────────────────────────────────────────────────
    #[error("{0}")]
    Other(String),
}

impl PhaseMatchError {
    /// 构造数值失败错误
    pub fn numeric(context: impl Into<String>, reason: impl Into<String>) -> Self {
        PhaseMatchError::NumericFailure {
            context: context.into(),
            reason: reason.into(),
        }
    }

    /// 是否为输入校验错误
    pub fn is_invalid_input(&self) -> bool {
        matches!(self, PhaseMatchError::InvalidInput(_))
    }
}

/// Result 类型别名
pub type Result<T> = std::result::Result<T, PhaseMatchError>;
